//! Topic tags and requirement-type detection.

use drift_protocol::NORMATIVE_TAG;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::OnceLock;

const INVARIANT_KEYWORDS: &[&str] = &[
    "always",
    "never",
    "invariant",
    "constant",
    "immutable",
    "unchanging",
];

const CONSTRAINT_KEYWORDS: &[&str] = &[
    "maximum",
    "minimum",
    "limit",
    "bound",
    "range",
    "at most",
    "at least",
    "no more than",
    "no less than",
];

const REQUIREMENT_KEYWORDS: &[&str] = &["must", "shall", "should", "will", "required", "mandatory"];

const EDGE_CASE_KEYWORDS: &[&str] = &["edge case", "corner case", "exception", "error"];

const NORMATIVE_KEYWORDS: &[&str] = &["must", "shall", "required", "mandatory"];

/// What kind of statement a chunk makes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequirementType {
    Invariant,
    Constraint,
    Requirement,
    EdgeCase,
    Precondition,
    Postcondition,
}

impl RequirementType {
    pub fn as_str(self) -> &'static str {
        match self {
            RequirementType::Invariant => "invariant",
            RequirementType::Constraint => "constraint",
            RequirementType::Requirement => "requirement",
            RequirementType::EdgeCase => "edge-case",
            RequirementType::Precondition => "precondition",
            RequirementType::Postcondition => "postcondition",
        }
    }

    /// Most specific type whose keywords appear in the text; plain
    /// requirement when nothing matches.
    pub fn detect(text: &str) -> Self {
        let lower = text.to_lowercase();
        if contains_any(&lower, INVARIANT_KEYWORDS) {
            RequirementType::Invariant
        } else if contains_any(&lower, CONSTRAINT_KEYWORDS) {
            RequirementType::Constraint
        } else if contains_any(&lower, REQUIREMENT_KEYWORDS) {
            RequirementType::Requirement
        } else if contains_any(&lower, EDGE_CASE_KEYWORDS) {
            RequirementType::EdgeCase
        } else if contains_any(&lower, &["before", "prior"]) {
            RequirementType::Precondition
        } else if contains_any(&lower, &["after", "result"]) {
            RequirementType::Postcondition
        } else {
            RequirementType::Requirement
        }
    }
}

/// Whole-word (or whole-phrase) match on lowercased text.
fn contains_any(lower: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| {
        lower.match_indices(keyword).any(|(at, _)| {
            let before = lower[..at].chars().next_back();
            let after = lower[at + keyword.len()..].chars().next();
            !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
        })
    })
}

/// The text states a requirement (RFC 2119 style).
pub fn is_normative(text: &str) -> bool {
    contains_any(&text.to_lowercase(), NORMATIVE_KEYWORDS)
}

pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut dash = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
            dash = false;
        } else if !dash && !slug.is_empty() {
            slug.push('-');
            dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// `UPPER_SNAKE` constants and backticked identifiers mentioned in the text.
pub fn identifiers(text: &str) -> BTreeSet<String> {
    static UPPER: OnceLock<Option<Regex>> = OnceLock::new();
    static TICKED: OnceLock<Option<Regex>> = OnceLock::new();

    let mut out = BTreeSet::new();
    if let Some(re) = UPPER
        .get_or_init(|| Regex::new(r"\b[A-Z][A-Z0-9]*(?:_[A-Z0-9]+)+\b").ok())
        .as_ref()
    {
        out.extend(re.find_iter(text).map(|m| m.as_str().to_string()));
    }
    if let Some(re) = TICKED
        .get_or_init(|| Regex::new(r"`([A-Za-z_][A-Za-z0-9_.:]*)(?:\(\))?`").ok())
        .as_ref()
    {
        out.extend(re.captures_iter(text).map(|caps| caps[1].to_string()));
    }
    out
}

fn eip_refs(text: &str) -> BTreeSet<String> {
    static EIP: OnceLock<Option<Regex>> = OnceLock::new();
    EIP.get_or_init(|| Regex::new(r"(?i)\bEIP[-\s]?(\d{1,5})\b").ok())
        .as_ref()
        .map(|re| {
            re.captures_iter(text)
                .map(|caps| format!("eip-{}", &caps[1]))
                .collect()
        })
        .unwrap_or_default()
}

/// Every tag a chunk carries.
pub fn topic_tags(text: &str, section: &[String]) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    if !section.is_empty() {
        let path: Vec<String> = section.iter().map(|heading| slugify(heading)).collect();
        tags.insert(format!("section:{}", path.join("/")));
    }
    tags.insert(format!("type:{}", RequirementType::detect(text).as_str()));
    if is_normative(text) {
        tags.insert(NORMATIVE_TAG.to_string());
    }
    tags.extend(eip_refs(text));
    // Headings often name the EIP the section implements.
    for heading in section {
        tags.extend(eip_refs(heading));
    }
    tags.extend(identifiers(text).into_iter().map(|id| format!("ident:{id}")));
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn detection_prefers_invariants() {
        assert_eq!(
            RequirementType::detect("The total supply must never decrease."),
            RequirementType::Invariant
        );
        assert_eq!(
            RequirementType::detect("At most 6 blobs per block."),
            RequirementType::Constraint
        );
        assert_eq!(
            RequirementType::detect("Clients MUST reject the block."),
            RequirementType::Requirement
        );
    }

    #[test]
    fn keywords_match_whole_words() {
        assert!(!is_normative("a mustard seed"));
        assert!(is_normative("It MUST be rejected"));
        assert_eq!(
            RequirementType::detect("arrange the bytes"),
            RequirementType::Requirement
        );
    }

    #[test]
    fn tags_collect_sections_eips_and_identifiers() {
        let tags = topic_tags(
            "Per EIP-4844 the `blob_gas_used` MUST not exceed MAX_BLOB_GAS_PER_BLOCK.",
            &["Block Validation".to_string(), "Blob gas".to_string()],
        );
        for expected in [
            "section:block-validation/blob-gas",
            "eip-4844",
            "normative",
            "ident:blob_gas_used",
            "ident:MAX_BLOB_GAS_PER_BLOCK",
            "type:requirement",
        ] {
            assert!(tags.contains(expected), "missing {expected} in {tags:?}");
        }
    }
}
