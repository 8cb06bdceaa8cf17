//! Settlement envelope engine
//!
//! Wraps a business object (a loan, a trade, a payout) in a
//! driver-configured checklist and only unlocks settlement once every
//! required item is accepted. The pieces:
//!
//! - [`DriverRegistry`] — loads, compiles and caches driver definitions
//!   from a [`DriverSource`] (in-memory or YAML files on disk)
//! - [`payload_validator`] — field rules, merge-patch application, diffs
//! - [`ChecklistManager`] — derives item statuses and `required` flags
//!   from the envelope's payload, signals and attachments
//! - [`GateEvaluator`] — computes the built-in `lockable`/`settleable`
//!   gates plus the driver's own gate expressions
//! - [`EnvelopeOrchestrator`] — the mutation pipeline: guards, working
//!   copy, recompute, audit entry, event
//! - [`EnvelopeStore`] — in-memory records with per-envelope locking
//! - [`EnvelopeBinding`] — host-facing adapter scoped to one reference
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use envelope_engine::{DriverRegistry, EnvelopeOrchestrator, MemoryDriverSource, NullEventSink};
//! use envelope_types::Reference;
//! use serde_json::json;
//!
//! let source = MemoryDriverSource::new();
//! source.insert(serde_yaml::from_str(r#"
//! id: wire
//! version: 1.0.0
//! checklist:
//!   - key: funds_confirmed
//!     kind: signal
//! "#).unwrap());
//!
//! let registry = Arc::new(DriverRegistry::new(Arc::new(source)));
//! let orchestrator = EnvelopeOrchestrator::new(registry, Arc::new(NullEventSink));
//!
//! let envelope = orchestrator
//!     .create(Reference::new("loan", "L-100"), "wire", None, None, None)
//!     .unwrap();
//! orchestrator
//!     .set_signal(&envelope.id, "funds_confirmed", json!(true), None)
//!     .unwrap();
//!
//! let envelope = orchestrator.envelope(&envelope.id).unwrap();
//! assert!(envelope.gate_bool("lockable"));
//! ```

#![deny(unsafe_code)]

pub mod binding;
pub mod checklist_manager;
pub mod driver_registry;
pub mod events;
pub mod fs_source;
pub mod gate_evaluator;
pub mod orchestrator;
pub mod payload_validator;
pub mod store;

// Re-export main types
pub use binding::EnvelopeBinding;
pub use checklist_manager::{ChecklistManager, RecomputeOutcome};
pub use driver_registry::{normalize_version, DriverRegistry, DriverSource, MemoryDriverSource};
pub use events::{EventSink, NullEventSink, RecordingEventSink};
pub use fs_source::FsDriverSource;
pub use gate_evaluator::{EnvelopeView, GateEvaluator, GateReport, GateWarning};
pub use orchestrator::EnvelopeOrchestrator;
pub use store::{lock_record, EnvelopeRecord, EnvelopeStore};
