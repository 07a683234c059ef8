use crate::error::{Result, VectorStoreError};
use async_trait::async_trait;
use ndarray::ArrayView1;

/// Turns text into fixed-size vectors.
///
/// Implementations must be deterministic for a given `id()`: the store
/// persists vectors and only re-embeds when the id changes.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn id(&self) -> &str;

    fn dimension(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| VectorStoreError::Embedding("embedder returned no vector".into()))
    }
}

/// Signed feature hashing over normalized terms and term bigrams.
///
/// Offline and deterministic; texts sharing vocabulary land close together,
/// which is what matching identifiers in code against prose needs.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    id: String,
    dimension: usize,
}

impl HashingEmbedder {
    pub const DEFAULT_DIMENSION: usize = 384;

    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(8);
        Self {
            id: format!("hashing-v1-{dimension}"),
            dimension,
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dimension];
        let terms = tokenize(text);
        for term in &terms {
            self.accumulate(&mut vec, term, 1.0);
        }
        for pair in terms.windows(2) {
            self.accumulate(&mut vec, &format!("{} {}", pair[0], pair[1]), 0.5);
        }
        normalize(&mut vec);
        vec
    }

    fn accumulate(&self, vec: &mut [f32], feature: &str, weight: f32) {
        let hash = fnv1a_64(feature.as_bytes());
        let mut state = hash;
        let sign = if splitmix64(&mut state) & 1 == 0 {
            1.0
        } else {
            -1.0
        };
        let slot = (hash % self.dimension as u64) as usize;
        vec[slot] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it", "of", "on",
    "or", "that", "the", "this", "to", "with",
];

/// Lowercased terms with identifiers split into their parts:
/// `blobGasUsed`, `blob_gas_used` and "blob gas used" all yield
/// `blob gas used`.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        for part in split_camel(word) {
            let term = stem(&part.to_lowercase());
            if term.len() >= 2 && !STOPWORDS.contains(&term.as_str()) {
                terms.push(term);
            }
        }
    }
    terms
}

fn split_camel(word: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let chars: Vec<(usize, char)> = word.char_indices().collect();
    for window in chars.windows(2) {
        let (_, prev) = window[0];
        let (at, next) = window[1];
        if prev.is_lowercase() && next.is_uppercase() {
            parts.push(&word[start..at]);
            start = at;
        }
    }
    if start < word.len() {
        parts.push(&word[start..]);
    }
    parts
}

/// Plural folding only; anything smarter hurts identifier matching.
fn stem(term: &str) -> String {
    if term.len() > 3 && term.ends_with('s') && !term.ends_with("ss") {
        term[..term.len() - 1].to_string()
    } else {
        term.to_string()
    }
}

#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let a = ArrayView1::from(a);
    let b = ArrayView1::from(b);
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    a.dot(&b) / (norm_a * norm_b)
}

fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vec {
        *value /= norm;
    }
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

const fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tokenize_splits_identifiers() {
        assert_eq!(tokenize("blobGasUsed"), vec!["blob", "gas", "used"]);
        assert_eq!(tokenize("self.blob_gas_used"), vec!["self", "blob", "gas", "used"]);
        assert_eq!(tokenize("The balances of an account"), vec!["balance", "account"]);
    }

    #[tokio::test]
    async fn hashing_embedder_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("transfer balance").await.unwrap();
        let b = embedder.embed("transfer balance").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn shared_vocabulary_scores_higher() {
        let embedder = HashingEmbedder::default();
        let code = embedder.embed("self.balances[sender] -= amount").await.unwrap();
        let related = embedder
            .embed("The sender balance MUST be reduced by the amount.")
            .await
            .unwrap();
        let unrelated = embedder
            .embed("Blob headers carry a versioned hash.")
            .await
            .unwrap();
        assert!(cosine_similarity(&code, &related) > cosine_similarity(&code, &unrelated));
    }

    #[test]
    fn cosine_handles_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
    }
}
