//! Template error definitions

use thiserror::Error;

/// Template-specific error type
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unclosed block: {{{{#{0}}}}}")]
    UnclosedBlock(String),

    #[error("Mismatched block: expected {{{{/{expected}}}}}, found {{{{/{found}}}}}")]
    MismatchedBlock { expected: String, found: String },

    #[error("Unknown helper: {0}")]
    UnknownHelper(String),

    #[error("Helper '{helper}' expects {expected} argument(s), got {got}")]
    Arity {
        helper: String,
        expected: usize,
        got: usize,
    },

    #[error("Failed to read template: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for template operations
pub type TemplateResult<T> = Result<T, TemplateError>;
