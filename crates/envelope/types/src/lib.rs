//! Core types for the settlement envelope engine
//!
//! An envelope wraps a business object (a loan, a trade, a payout) in a
//! driver-configured checklist and only unlocks settlement once every
//! required item is accepted. This crate holds the shared vocabulary:
//!
//! - [`Envelope`] and its lifecycle ([`EnvelopeStatus`])
//! - [`ChecklistItem`] instances and their derived statuses
//! - [`Attachment`] submissions and review decisions
//! - [`DriverSpec`] (raw definition) and [`Driver`] (compiled schema)
//! - [`AuditEntry`] / [`EnvelopeEvent`] for the mutation trail
//! - The [`EnvelopeError`] taxonomy
//!
//! # Example
//!
//! ```rust
//! use envelope_types::{Driver, DriverSpec};
//!
//! let spec: DriverSpec = serde_yaml::from_str(r#"
//! id: wire
//! version: 1.0.0
//! checklist:
//!   - key: funds_confirmed
//!     kind: signal
//! gates:
//!   - name: ready
//!     rule: accepted(funds_confirmed)
//! "#).unwrap();
//!
//! let driver = Driver::compile(spec).unwrap();
//! assert_eq!(driver.gates.len(), 1);
//!
//! let item = driver.item("funds_confirmed").unwrap().instantiate();
//! assert!(!item.is_satisfied());
//! ```

#![deny(unsafe_code)]

pub mod attachment;
pub mod audit;
pub mod checklist;
pub mod driver;
pub mod envelope;
pub mod error;
pub mod event;

// Re-export main types
pub use attachment::{Attachment, AttachmentId, AttachmentUpload, ReviewDecision};
pub use audit::{ActorId, AuditAction, AuditEntry};
pub use checklist::{
    ChecklistItem, ChecklistItemKind, ChecklistItemStatus, ChecklistSummary, ItemChange,
    ReviewMode,
};
pub use driver::{
    parse_extends, ChecklistItemSpec, CompiledGate, DocumentTypeSpec, Driver, DriverSpec,
    FieldRule, FieldRuleSpec, FieldType, GateSpec, ItemTemplate, RequiredRule, RequiredSpec,
    SignalSpec, SignalType, GATE_LOCKABLE, GATE_SETTLEABLE,
};
pub use envelope::{resolve_pointer, Envelope, EnvelopeId, EnvelopeStatus, Reference};
pub use error::{DriverParseError, EnvelopeError, EnvelopeResult, FieldError};
pub use event::EnvelopeEvent;
