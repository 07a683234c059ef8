use crate::error::{EngineError, Result};
use std::path::Path;
use std::process::Command;

/// `HEAD` of the repository containing `path`, if it is a git checkout
pub fn git_head(path: &Path) -> Option<String> {
    let dir = if path.is_file() { path.parent()? } else { path };
    let value = run_git(dir, &["rev-parse", "HEAD"]).ok()?;
    let value = value.trim().to_string();
    (!value.is_empty()).then_some(value)
}

/// Paths tracked at `rev` under `repo`, relative to `repo`
pub fn list_files_at(repo: &Path, rev: &str) -> Result<Vec<String>> {
    let listing = run_git(repo, &["ls-tree", "-r", "--name-only", rev])?;
    Ok(listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Contents of `path` at `rev`; `path` is relative to `repo`, which need not
/// be the repository root.
pub fn read_file_at(repo: &Path, rev: &str, path: &str) -> Result<String> {
    run_git(repo, &["show", &format!("{rev}:./{path}")])
}

fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .map_err(|e| EngineError::Git(format!("cannot run git: {e}")))?;
    if !output.status.success() {
        return Err(EngineError::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
