//! Domain events published to the host after successful mutations

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::attachment::{AttachmentId, ReviewDecision};
use crate::checklist::ItemChange;
use crate::envelope::{EnvelopeId, Reference};

/// Events emitted by the orchestrator, exactly one per successful
/// mutation (gate warnings add their own).
///
/// Published while the envelope's lock is held, so per-envelope order
/// matches mutation order.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnvelopeEvent {
    EnvelopeCreated {
        envelope_id: EnvelopeId,
        reference: Reference,
        driver_id: String,
        driver_version: String,
    },
    PayloadUpdated {
        envelope_id: EnvelopeId,
        payload_version: u64,
        /// Computed diff: `added` / `removed` / `changed {from, to}`
        diff: Value,
        changed_items: Vec<ItemChange>,
    },
    AttachmentUploaded {
        envelope_id: EnvelopeId,
        item_key: String,
        attachment_id: AttachmentId,
        doc_type: String,
        changed_items: Vec<ItemChange>,
    },
    AttachmentReviewed {
        envelope_id: EnvelopeId,
        item_key: String,
        attachment_id: AttachmentId,
        decision: ReviewDecision,
        changed_items: Vec<ItemChange>,
    },
    ItemReviewed {
        envelope_id: EnvelopeId,
        item_key: String,
        decision: ReviewDecision,
        changed_items: Vec<ItemChange>,
    },
    SignalChanged {
        envelope_id: EnvelopeId,
        key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        old: Option<Value>,
        new: Value,
        changed_items: Vec<ItemChange>,
    },
    EnvelopeLocked {
        envelope_id: EnvelopeId,
    },
    EnvelopeSettled {
        envelope_id: EnvelopeId,
    },
    EnvelopeCancelled {
        envelope_id: EnvelopeId,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    GateEvaluationWarning {
        envelope_id: EnvelopeId,
        gate: String,
        message: String,
    },
}

impl EnvelopeEvent {
    pub fn envelope_id(&self) -> &EnvelopeId {
        match self {
            EnvelopeEvent::EnvelopeCreated { envelope_id, .. }
            | EnvelopeEvent::PayloadUpdated { envelope_id, .. }
            | EnvelopeEvent::AttachmentUploaded { envelope_id, .. }
            | EnvelopeEvent::AttachmentReviewed { envelope_id, .. }
            | EnvelopeEvent::ItemReviewed { envelope_id, .. }
            | EnvelopeEvent::SignalChanged { envelope_id, .. }
            | EnvelopeEvent::EnvelopeLocked { envelope_id }
            | EnvelopeEvent::EnvelopeSettled { envelope_id }
            | EnvelopeEvent::EnvelopeCancelled { envelope_id, .. }
            | EnvelopeEvent::GateEvaluationWarning { envelope_id, .. } => envelope_id,
        }
    }

    /// Stable wire name, matching the serialized `type` tag
    pub fn name(&self) -> &'static str {
        match self {
            EnvelopeEvent::EnvelopeCreated { .. } => "envelope_created",
            EnvelopeEvent::PayloadUpdated { .. } => "payload_updated",
            EnvelopeEvent::AttachmentUploaded { .. } => "attachment_uploaded",
            EnvelopeEvent::AttachmentReviewed { .. } => "attachment_reviewed",
            EnvelopeEvent::ItemReviewed { .. } => "item_reviewed",
            EnvelopeEvent::SignalChanged { .. } => "signal_changed",
            EnvelopeEvent::EnvelopeLocked { .. } => "envelope_locked",
            EnvelopeEvent::EnvelopeSettled { .. } => "envelope_settled",
            EnvelopeEvent::EnvelopeCancelled { .. } => "envelope_cancelled",
            EnvelopeEvent::GateEvaluationWarning { .. } => "gate_evaluation_warning",
        }
    }
}
