//! Reference binding: envelope access scoped to one host record
//!
//! Hosts compose an [`EnvelopeBinding`] into their repository layer
//! instead of inheriting envelope behavior: the binding holds the
//! orchestrator and a fixed `Reference`, and every call is scoped to
//! the envelopes attached to that reference. Accessors without an
//! explicit envelope target the latest one.

use std::sync::Arc;

use serde_json::Value;

use envelope_types::{
    ActorId, ChecklistItem, ChecklistSummary, Envelope, EnvelopeError, EnvelopeId, EnvelopeResult,
    EnvelopeStatus, Reference,
};

use crate::orchestrator::EnvelopeOrchestrator;

/// Envelope operations scoped to one owning record
#[derive(Clone)]
pub struct EnvelopeBinding {
    orchestrator: Arc<EnvelopeOrchestrator>,
    reference: Reference,
}

impl EnvelopeBinding {
    pub fn new(orchestrator: Arc<EnvelopeOrchestrator>, reference: Reference) -> Self {
        Self {
            orchestrator,
            reference,
        }
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    /// Create a new envelope attached to the bound reference
    pub fn create_envelope(
        &self,
        driver_id: &str,
        version: Option<&str>,
        initial_payload: Option<serde_json::Map<String, Value>>,
        actor: Option<ActorId>,
    ) -> EnvelopeResult<Envelope> {
        self.orchestrator.create(
            self.reference.clone(),
            driver_id,
            version,
            initial_payload,
            actor,
        )
    }

    /// Ids of every envelope attached to the reference, in creation order
    pub fn envelopes(&self) -> EnvelopeResult<Vec<EnvelopeId>> {
        self.orchestrator.envelopes_for(&self.reference)
    }

    /// The most recently created envelope, if any
    pub fn latest(&self) -> EnvelopeResult<Option<Envelope>> {
        match self.envelopes()?.pop() {
            Some(id) => Ok(Some(self.orchestrator.envelope(&id)?)),
            None => Ok(None),
        }
    }

    /// Status of the latest envelope
    pub fn status(&self) -> EnvelopeResult<EnvelopeStatus> {
        let id = self.require_latest()?;
        self.orchestrator.status(&id)
    }

    /// Gate value on the latest envelope
    pub fn gate(&self, name: &str) -> EnvelopeResult<Option<Value>> {
        let id = self.require_latest()?;
        self.orchestrator.gate(&id, name)
    }

    /// Signal value on the latest envelope
    pub fn signal(&self, key: &str) -> EnvelopeResult<Option<Value>> {
        let id = self.require_latest()?;
        self.orchestrator.signal(&id, key)
    }

    /// Checklist of the latest envelope
    pub fn checklist(&self) -> EnvelopeResult<Vec<ChecklistItem>> {
        let id = self.require_latest()?;
        self.orchestrator.checklist(&id)
    }

    /// Checklist progress of the latest envelope
    pub fn checklist_summary(&self) -> EnvelopeResult<ChecklistSummary> {
        let id = self.require_latest()?;
        self.orchestrator.checklist_summary(&id)
    }

    fn require_latest(&self) -> EnvelopeResult<EnvelopeId> {
        self.envelopes()?
            .pop()
            .ok_or_else(|| EnvelopeError::EnvelopeNotFound(self.reference.to_string()))
    }
}
