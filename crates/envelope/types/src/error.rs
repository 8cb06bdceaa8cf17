//! Error taxonomy for the settlement envelope engine

use serde::{Deserialize, Serialize};

use crate::checklist::ChecklistItemStatus;
use crate::envelope::EnvelopeStatus;

/// A single field validation failure.
///
/// Validation collects one of these per invalid field instead of stopping
/// at the first failure, so callers can surface the full list at once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    /// The field (JSON pointer) that failed
    pub field: String,
    /// Machine-readable failure code: "type", "min", "max", "one_of", "pattern"
    pub code: String,
    /// Human-readable message
    pub message: String,
}

impl FieldError {
    pub fn new(
        field: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Errors raised while decoding or compiling a driver definition.
///
/// These are fatal for the operation that triggered the load — there is
/// no fallback to a stale driver version.
#[derive(Debug, thiserror::Error)]
pub enum DriverParseError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Duplicate checklist key: '{0}'")]
    DuplicateChecklistKey(String),

    #[error("Duplicate gate: '{0}'")]
    DuplicateGate(String),

    #[error("Gate name '{0}' is reserved")]
    ReservedGate(String),

    #[error("Gate '{gate}' references unknown gate '{target}'")]
    UnknownGateReference { gate: String, target: String },

    #[error("Cyclic gate dependencies: {0}")]
    CyclicGates(String),

    #[error("Cyclic driver inheritance: {0}")]
    CyclicExtends(String),

    #[error("Checklist item '{key}': {message}")]
    InvalidItem { key: String, message: String },

    #[error("Invalid rule for field '{field}': {message}")]
    InvalidRule { field: String, message: String },

    #[error("Invalid expression for {context}: {source}")]
    Expression {
        context: String,
        #[source]
        source: envelope_expr::ExprError,
    },

    #[error("Malformed driver document: {0}")]
    Document(String),
}

/// Errors surfaced by envelope operations
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Driver not found: '{0}'")]
    DriverNotFound(String),

    #[error("Driver parse error: {0}")]
    DriverParse(#[from] DriverParseError),

    #[error("Validation failed with {} error(s)", .0.len())]
    Validation(Vec<FieldError>),

    #[error("Invalid transition: cannot {operation} while {status}")]
    InvalidTransition {
        operation: String,
        status: EnvelopeStatus,
    },

    #[error("Envelope is not lockable: {0}")]
    NotLockable(String),

    #[error("Envelope is not settleable: status is {0}")]
    NotSettleable(EnvelopeStatus),

    #[error("Unknown checklist item: '{0}'")]
    UnknownChecklistItem(String),

    #[error("Checklist item '{0}' is not a document item")]
    NotADocumentItem(String),

    #[error("Checklist item '{0}' is a document item; review its latest attachment instead")]
    DocumentItemReview(String),

    #[error("Document type '{0}' is not allowed for this driver")]
    DocumentTypeNotAllowed(String),

    #[error("Document type '{submitted}' does not match item '{item}' (expects '{expected}')")]
    DocumentTypeMismatch {
        item: String,
        expected: String,
        submitted: String,
    },

    #[error("Checklist item '{key}' is not awaiting review (status: {status})")]
    ReviewNotPending {
        key: String,
        status: ChecklistItemStatus,
    },

    #[error("Attachment not found: '{0}'")]
    AttachmentNotFound(String),

    #[error("Envelope not found: '{0}'")]
    EnvelopeNotFound(String),

    #[error("Signal '{key}' rejected: {message}")]
    InvalidSignal { key: String, message: String },

    #[error("Storage error: {0}")]
    Store(String),
}

/// Result type alias for envelope operations
pub type EnvelopeResult<T> = Result<T, EnvelopeError>;
