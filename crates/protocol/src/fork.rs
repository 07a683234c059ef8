use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Protocol forks in activation order.
pub const KNOWN_FORKS: &[&str] = &[
    "frontier",
    "homestead",
    "tangerine_whistle",
    "spurious_dragon",
    "byzantium",
    "constantinople",
    "petersburg",
    "istanbul",
    "muir_glacier",
    "berlin",
    "london",
    "arrow_glacier",
    "gray_glacier",
    "paris",
    "shanghai",
    "cancun",
    "prague",
];

pub const DEFAULT_FORK: &str = "cancun";

/// A versioned variant of the protocol specification.
///
/// Names are case-insensitive and `-` is treated as `_`, so `Gray-Glacier`
/// and `gray_glacier` are the same fork. Names outside [`KNOWN_FORKS`] are
/// allowed (custom or devnet forks) but have no ancestry.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct Fork(String);

impl Fork {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_ascii_lowercase().replace('-', "_"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Position in [`KNOWN_FORKS`], if this is a known fork.
    pub fn ordinal(&self) -> Option<usize> {
        KNOWN_FORKS.iter().position(|known| *known == self.0)
    }

    pub fn is_known(&self) -> bool {
        self.ordinal().is_some()
    }

    /// Every known fork activated strictly before this one, oldest first.
    pub fn ancestors(&self) -> Vec<Fork> {
        match self.ordinal() {
            Some(idx) => KNOWN_FORKS[..idx].iter().map(Fork::new).collect(),
            None => Vec::new(),
        }
    }
}

impl Default for Fork {
    fn default() -> Self {
        Self::new(DEFAULT_FORK)
    }
}

impl fmt::Display for Fork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fork {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

/// The set of forks a run may retrieve specification text from.
///
/// The default scope is exactly one fork. Retrieval across forks happens only
/// when the caller widens the scope explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ForkScope {
    target: Fork,
    #[serde(default)]
    widened: BTreeSet<Fork>,
}

impl ForkScope {
    pub fn exact(target: Fork) -> Self {
        Self {
            target,
            widened: BTreeSet::new(),
        }
    }

    pub fn widen(mut self, forks: impl IntoIterator<Item = Fork>) -> Self {
        for fork in forks {
            if fork != self.target {
                self.widened.insert(fork);
            }
        }
        self
    }

    /// Widen to every known ancestor of the target fork.
    pub fn with_ancestors(self) -> Self {
        let ancestors = self.target.ancestors();
        self.widen(ancestors)
    }

    pub fn target(&self) -> &Fork {
        &self.target
    }

    pub fn widened(&self) -> &BTreeSet<Fork> {
        &self.widened
    }

    pub fn is_widened(&self) -> bool {
        !self.widened.is_empty()
    }

    pub fn admits(&self, fork: &Fork) -> bool {
        *fork == self.target || self.widened.contains(fork)
    }

    /// Target first, then widened forks in name order.
    pub fn forks(&self) -> impl Iterator<Item = &Fork> {
        std::iter::once(&self.target).chain(self.widened.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_names_are_normalized() {
        assert_eq!(Fork::new(" Gray-Glacier "), Fork::new("gray_glacier"));
        assert_eq!(Fork::default().as_str(), "cancun");
    }

    #[test]
    fn ancestors_follow_activation_order() {
        let ancestors = Fork::new("byzantium").ancestors();
        let names: Vec<_> = ancestors.iter().map(Fork::as_str).collect();
        assert_eq!(
            names,
            vec!["frontier", "homestead", "tangerine_whistle", "spurious_dragon"]
        );
        assert!(Fork::new("devnet-7").ancestors().is_empty());
    }

    #[test]
    fn exact_scope_rejects_other_forks() {
        let scope = ForkScope::exact(Fork::new("cancun"));
        assert!(scope.admits(&Fork::new("cancun")));
        assert!(!scope.admits(&Fork::new("shanghai")));
        assert!(!scope.is_widened());
    }

    #[test]
    fn widened_scope_admits_named_forks_only() {
        let scope = ForkScope::exact(Fork::new("cancun")).widen([Fork::new("shanghai")]);
        assert!(scope.admits(&Fork::new("shanghai")));
        assert!(!scope.admits(&Fork::new("paris")));

        let with_history = ForkScope::exact(Fork::new("cancun")).with_ancestors();
        assert!(with_history.admits(&Fork::new("paris")));
        assert!(!with_history.admits(&Fork::new("prague")));
    }
}
