use drift_behavior::Language;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

const MAX_FILE_SIZE_BYTES: u64 = 2 * 1024 * 1024;

/// What a scan collects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanTarget {
    /// Files with a behavioral-model frontend
    Source,
    /// Specification documents: Markdown, reStructuredText, plain text
    Specification,
}

impl ScanTarget {
    pub fn accepts(self, path: &Path) -> bool {
        match self {
            ScanTarget::Source => Language::from_path(path).is_supported(),
            ScanTarget::Specification => path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    SPEC_EXTENSIONS
                        .iter()
                        .any(|candidate| ext.eq_ignore_ascii_case(candidate))
                }),
        }
    }
}

const SPEC_EXTENSIONS: &[&str] = &["md", "markdown", "rst", "txt"];

/// `.gitignore`-aware file discovery
pub struct FileScanner {
    root: PathBuf,
    target: ScanTarget,
}

impl FileScanner {
    pub fn new(root: impl AsRef<Path>, target: ScanTarget) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            target,
        }
    }

    /// Matching files under the root, sorted. A root that is itself a file is
    /// returned when it matches.
    pub fn scan(&self) -> Vec<PathBuf> {
        if self.root.is_file() {
            return if self.target.accepts(&self.root) {
                vec![self.root.clone()]
            } else {
                Vec::new()
            };
        }

        let mut files = Vec::new();
        let root = self.root.clone();
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true);
        builder.filter_entry(move |entry| !is_ignored_scope(entry.path(), &root));

        for result in builder.build() {
            match result {
                Ok(entry) => {
                    if !entry.file_type().is_some_and(|t| t.is_file()) {
                        continue;
                    }
                    let path = entry.path();
                    if let Ok(meta) = entry.metadata() {
                        if meta.len() > MAX_FILE_SIZE_BYTES {
                            log::debug!(
                                "Skipping large file {} ({} bytes > {})",
                                path.display(),
                                meta.len(),
                                MAX_FILE_SIZE_BYTES
                            );
                            continue;
                        }
                    }
                    if self.target.accepts(path) {
                        files.push(path.to_path_buf());
                    }
                }
                Err(e) => log::warn!("Failed to read entry: {e}"),
            }
        }

        files.sort();
        log::info!(
            "Found {} {} files under {}",
            files.len(),
            match self.target {
                ScanTarget::Source => "source",
                ScanTarget::Specification => "specification",
            },
            self.root.display()
        );
        files
    }
}

fn is_ignored_scope(path: &Path, root: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    relative.components().any(|component| match component {
        std::path::Component::Normal(name) => {
            let lowered = name.to_string_lossy().to_lowercase();
            IGNORED_SCOPES.iter().any(|ignored| *ignored == lowered)
        }
        _ => false,
    })
}

const IGNORED_SCOPES: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".idea",
    ".vscode",
    ".cache",
    "node_modules",
    "build",
    "dist",
    "coverage",
    "target",
    ".venv",
    "venv",
    "__pycache__",
    "vendor",
    "third_party",
    "third-party",
];

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn finds_sources_and_specs_separately() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        std::fs::create_dir_all(root.join("specs")).unwrap();
        std::fs::write(root.join("src/vault.py"), "def f():\n    pass\n").unwrap();
        std::fs::write(root.join("src/lib.rs"), "fn f() {}\n").unwrap();
        std::fs::write(root.join("src/notes.bin"), "x").unwrap();
        std::fs::write(root.join("node_modules/pkg/index.js"), "x").unwrap();
        std::fs::write(root.join("specs/cancun.md"), "# Cancun\n").unwrap();
        std::fs::write(root.join("specs/paris.rst"), "Paris\n=====\n").unwrap();

        let relative = |files: Vec<PathBuf>| -> Vec<String> {
            files
                .iter()
                .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
                .collect()
        };
        assert_eq!(
            relative(FileScanner::new(root, ScanTarget::Source).scan()),
            vec!["src/lib.rs", "src/vault.py"]
        );
        assert_eq!(
            relative(FileScanner::new(root, ScanTarget::Specification).scan()),
            vec!["specs/cancun.md", "specs/paris.rst"]
        );
    }

    #[test]
    fn single_file_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("vault.py");
        std::fs::write(&file, "def f():\n    pass\n").unwrap();
        assert_eq!(FileScanner::new(&file, ScanTarget::Source).scan(), vec![file.clone()]);
        assert!(FileScanner::new(&file, ScanTarget::Specification).scan().is_empty());
    }
}
