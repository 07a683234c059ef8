use thiserror::Error;

/// Result type for extraction
pub type Result<T> = std::result::Result<T, ExtractionError>;

/// Errors that make a source unit unextractable.
///
/// Callers treat these as per-unit failures: the unit is skipped and logged,
/// the run continues.
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// No frontend exists for the language
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// The source does not parse
    #[error("Syntax error at line {line}, column {column}")]
    Syntax { line: usize, column: usize },

    /// Nothing to parse
    #[error("Empty source: {0}")]
    EmptySource(String),

    /// Tree-sitter could not be configured or returned no tree
    #[error("Tree-sitter error: {0}")]
    TreeSitter(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractionError {
    pub fn unsupported_language(lang: impl Into<String>) -> Self {
        Self::UnsupportedLanguage(lang.into())
    }

    pub fn tree_sitter(msg: impl Into<String>) -> Self {
        Self::TreeSitter(msg.into())
    }
}
