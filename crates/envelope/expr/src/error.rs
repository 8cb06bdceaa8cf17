//! Expression error types

/// Errors that can occur while lexing, parsing, or evaluating a gate expression
#[derive(Debug, thiserror::Error)]
pub enum ExprError {
    #[error("Parse error at line {line}, column {col}: {message}")]
    ParseError {
        line: usize,
        col: usize,
        message: String,
    },

    #[error("Unexpected token: expected {expected}, found '{found}'")]
    UnexpectedToken { expected: String, found: String },

    #[error("Unexpected end of input: expected {0}")]
    UnexpectedEof(String),

    #[error("Unknown reference function: '{0}'")]
    UnknownRefKind(String),

    #[error("Unknown checklist item: '{0}'")]
    UnknownItem(String),

    #[error("Unknown gate: '{0}'")]
    UnknownGate(String),

    #[error("Unknown signal: '{0}'")]
    UnknownSignal(String),
}

/// Result type alias for expression operations
pub type ExprResult<T> = Result<T, ExprError>;
