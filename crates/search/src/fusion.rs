use crate::query::UnitQuery;
use drift_vector_store::tokenize;
use std::collections::BTreeSet;

/// Linear blend of dense (cosine) and lexical (term coverage) relevance.
///
/// Both inputs live in `[0, 1]`, so the output does too and a single
/// relevance threshold means the same thing for every unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreFusion {
    dense_weight: f32,
    lexical_weight: f32,
}

impl ScoreFusion {
    pub fn new(dense_weight: f32, lexical_weight: f32) -> Self {
        let total = (dense_weight + lexical_weight).max(f32::EPSILON);
        Self {
            dense_weight: dense_weight / total,
            lexical_weight: lexical_weight / total,
        }
    }

    /// Weights by query shape:
    /// - few terms (a setter, a single guard) → lexical-heavy (40/60)
    /// - richer units → dense-heavy (60/40)
    pub fn adaptive(query: &UnitQuery) -> Self {
        let fusion = if query.terms.len() <= 4 {
            Self::new(0.4, 0.6)
        } else {
            Self::new(0.6, 0.4)
        };
        log::debug!(
            "Fusion weights for '{}': dense={:.0}%, lexical={:.0}%",
            query.text,
            fusion.dense_weight * 100.0,
            fusion.lexical_weight * 100.0
        );
        fusion
    }

    pub fn fuse(&self, dense: f32, lexical: f32) -> f32 {
        (self.dense_weight * dense + self.lexical_weight * lexical).clamp(0.0, 1.0)
    }
}

impl Default for ScoreFusion {
    fn default() -> Self {
        Self::new(0.6, 0.4)
    }
}

/// Pre-tokenized chunk, built once per retrieval run
#[derive(Debug, Clone, Default)]
pub(crate) struct ChunkTerms {
    pub terms: BTreeSet<String>,
    /// Parts of each `ident:` tag
    pub idents: Vec<Vec<String>>,
}

impl ChunkTerms {
    pub fn new(text: &str, tags: &BTreeSet<String>) -> Self {
        Self {
            terms: tokenize(text).into_iter().collect(),
            idents: tags
                .iter()
                .filter_map(|tag| tag.strip_prefix("ident:"))
                .map(tokenize)
                .filter(|parts| !parts.is_empty())
                .collect(),
        }
    }
}

/// Square root of the share of query terms the chunk mentions, plus a bonus
/// when the chunk names an identifier the unit touches.
pub(crate) fn lexical_score(query: &UnitQuery, chunk: &ChunkTerms) -> f32 {
    if query.terms.is_empty() {
        return 0.0;
    }
    let matched = query.terms.intersection(&chunk.terms).count();
    let coverage = (matched as f32 / query.terms.len() as f32).sqrt();
    let names_identifier = chunk
        .idents
        .iter()
        .any(|parts| parts.iter().all(|part| query.terms.contains(part)));
    let bonus = if names_identifier { 0.25 } else { 0.0 };
    (coverage + bonus).min(1.0)
}

pub(crate) fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f32 / union as f32
}
