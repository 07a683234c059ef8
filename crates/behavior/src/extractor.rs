use crate::error::{ExtractionError, Result};
use crate::frontends::frontend_for;
use crate::language::Language;
use crate::reduce::{reduce, UnitContext};
use drift_protocol::{BehavioralUnit, Fork};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Source → behavioral units. Pure: no state between calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct BehaviorExtractor;

impl BehaviorExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract one unit per function or method, in source order.
    ///
    /// `path` becomes part of every unit id and source location.
    pub fn extract(
        &self,
        source: &str,
        language: Language,
        path: &str,
        fork: &Fork,
    ) -> Result<Vec<BehavioralUnit>> {
        let frontend = frontend_for(language)?;
        if source.trim().is_empty() {
            return Err(ExtractionError::EmptySource(path.to_string()));
        }
        let module = frontend.parse(source)?;
        let ctx = UnitContext {
            path,
            language,
            fork,
            module: &module,
            rules: frontend.rules(),
        };

        let mut units: Vec<BehavioralUnit> = module
            .functions
            .iter()
            .map(|function| {
                let cfg = frontend.lower_to_cfg(function);
                let facts = frontend.dataflow(&cfg);
                reduce(&ctx, function, &cfg, &facts)
            })
            .collect();
        disambiguate_ids(&mut units);

        log::debug!(
            "Extracted {} units from {} ({})",
            units.len(),
            path,
            language.as_str()
        );
        Ok(units)
    }

    /// Read and extract a file; the language comes from its extension and the
    /// unit path is `path` relative to `root`.
    pub fn extract_file(&self, root: &Path, path: &Path, fork: &Fork) -> Result<Vec<BehavioralUnit>> {
        let language = Language::from_path(path);
        if !language.is_supported() {
            return Err(ExtractionError::unsupported_language(
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .unwrap_or("<none>"),
            ));
        }
        let source = std::fs::read_to_string(path)?;
        let relative = path.strip_prefix(root).unwrap_or(path);
        let display = relative.to_string_lossy().replace('\\', "/");
        self.extract(&source, language, &display, fork)
    }
}

/// Give every unit of one file a distinct id.
///
/// Trait impls of the same method, property accessors and redefinitions share
/// a qualified name; each of them gets `#<line>` appended.
fn disambiguate_ids(units: &mut [BehavioralUnit]) {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for unit in units.iter() {
        *counts.entry(unit.id.clone()).or_default() += 1;
    }
    let mut taken: HashSet<String> = HashSet::new();
    for unit in units.iter_mut() {
        if counts.get(&unit.id).copied().unwrap_or(0) > 1 {
            let base = format!("{}#{}", unit.id, unit.source_location.line_start);
            let mut candidate = base.clone();
            let mut n = 2;
            while taken.contains(&candidate) || counts.contains_key(&candidate) {
                candidate = format!("{base}.{n}");
                n += 1;
            }
            unit.id = candidate;
        }
        taken.insert(unit.id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_language_is_rejected() {
        let err = BehaviorExtractor::new().extract("x", Language::Unknown, "x.txt", &Fork::default());
        assert!(matches!(err, Err(ExtractionError::UnsupportedLanguage(_))));
    }

    #[test]
    fn syntax_error_fails_extraction() {
        let err = BehaviorExtractor::new().extract(
            "def f(:\n  pass\n",
            Language::Python,
            "bad.py",
            &Fork::default(),
        );
        assert!(matches!(err, Err(ExtractionError::Syntax { .. })));
    }
}
