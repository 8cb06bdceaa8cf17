//! Audit trail entries recorded for every successful mutation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::EnvelopeId;

/// Identity of the actor performing an operation.
///
/// Operations triggered by automation (signal feeds, scheduled jobs)
/// carry no actor, so audit entries store `Option<ActorId>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(pub String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The operation an audit entry records
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    PayloadPatched,
    AttachmentUploaded,
    AttachmentReviewed,
    ItemReviewed,
    SignalSet,
    Locked,
    Settled,
    Cancelled,
    GateWarning,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditAction::Created => "created",
            AuditAction::PayloadPatched => "payload_patched",
            AuditAction::AttachmentUploaded => "attachment_uploaded",
            AuditAction::AttachmentReviewed => "attachment_reviewed",
            AuditAction::ItemReviewed => "item_reviewed",
            AuditAction::SignalSet => "signal_set",
            AuditAction::Locked => "locked",
            AuditAction::Settled => "settled",
            AuditAction::Cancelled => "cancelled",
            AuditAction::GateWarning => "gate_warning",
        };
        write!(f, "{}", s)
    }
}

/// A single audit trail entry.
///
/// Entries are append-only and numbered contiguously from zero within
/// each envelope. `before` and `after` hold operation-specific snapshots
/// of the state that changed, not the whole envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the envelope's audit trail, starting at 0
    pub sequence: u64,
    pub envelope_id: EnvelopeId,
    pub action: AuditAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<ActorId>,
    /// State relevant to the operation, before it ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,
    /// State relevant to the operation, after it ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<serde_json::Value>,
    /// Operation-specific detail (item key, attachment id, reason, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(sequence: u64, envelope_id: EnvelopeId, action: AuditAction) -> Self {
        Self {
            sequence,
            envelope_id,
            action,
            actor: None,
            before: None,
            after: None,
            metadata: None,
            at: Utc::now(),
        }
    }

    pub fn with_actor(mut self, actor: Option<ActorId>) -> Self {
        self.actor = actor;
        self
    }

    pub fn with_before(mut self, before: serde_json::Value) -> Self {
        self.before = Some(before);
        self
    }

    pub fn with_after(mut self, after: serde_json::Value) -> Self {
        self.after = Some(after);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
