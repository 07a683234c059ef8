use crate::error::{ChunkerError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for specification chunking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Blocks are packed together up to this size (soft limit)
    pub target_tokens: usize,

    /// Hard window; anything larger is split, at sentences first
    pub max_tokens: usize,

    /// Chunks below this size keep absorbing following blocks of the same
    /// section
    pub min_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_tokens: 256,
            max_tokens: 512,
            min_tokens: 16,
        }
    }
}

impl ChunkerConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(ChunkerError::invalid_config("max_tokens must be > 0"));
        }

        if self.min_tokens > self.target_tokens {
            return Err(ChunkerError::invalid_config(format!(
                "min_tokens ({}) cannot exceed target_tokens ({})",
                self.min_tokens, self.target_tokens
            )));
        }

        if self.target_tokens > self.max_tokens {
            return Err(ChunkerError::invalid_config(format!(
                "target_tokens ({}) cannot exceed max_tokens ({})",
                self.target_tokens, self.max_tokens
            )));
        }

        Ok(())
    }
}

/// Rough estimate: 4 chars per token on average for prose
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() / 4).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ChunkerConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_limits() {
        let config = ChunkerConfig {
            target_tokens: 600,
            max_tokens: 512,
            min_tokens: 16,
        };
        assert!(matches!(config.validate(), Err(ChunkerError::InvalidConfig(_))));

        let zero = ChunkerConfig {
            target_tokens: 0,
            max_tokens: 0,
            min_tokens: 0,
        };
        assert!(zero.validate().is_err());
    }
}
