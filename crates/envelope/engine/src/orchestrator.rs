//! Envelope orchestrator: the single entry point for every mutation
//!
//! Wires the driver registry, store, checklist manager and gate
//! evaluator into one pipeline. Every mutation follows the same shape:
//!
//! - Guards run against the committed record; a failed guard leaves the
//!   record untouched and publishes nothing.
//! - The mutation applies to a working copy that replaces the record
//!   only after checklist and gate recompute, so a stored record never
//!   mixes pre- and post-operation state.
//! - Each successful mutation appends exactly one audit entry and
//!   publishes exactly one event; gate warnings append their own.
//! - Audit entries and events go out while the envelope's record lock
//!   is held, so per-envelope order matches mutation order. Operations
//!   on different envelopes proceed in parallel.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tracing::{info, warn};

use envelope_types::{
    ActorId, Attachment, AttachmentId, AttachmentUpload, AuditAction, AuditEntry, ChecklistItem,
    ChecklistItemKind, ChecklistItemStatus, ChecklistSummary, Driver, Envelope, EnvelopeError,
    EnvelopeEvent, EnvelopeId, EnvelopeResult, EnvelopeStatus, ItemChange, Reference,
    ReviewDecision, GATE_LOCKABLE,
};

use crate::checklist_manager::ChecklistManager;
use crate::driver_registry::DriverRegistry;
use crate::events::EventSink;
use crate::gate_evaluator::{EnvelopeView, GateEvaluator, GateWarning};
use crate::payload_validator;
use crate::store::{lock_record, EnvelopeRecord, EnvelopeStore};

/// Coordinates every envelope operation against the in-memory store
pub struct EnvelopeOrchestrator {
    registry: Arc<DriverRegistry>,
    store: EnvelopeStore,
    checklist: ChecklistManager,
    gates: GateEvaluator,
    events: Arc<dyn EventSink>,
}

impl EnvelopeOrchestrator {
    pub fn new(registry: Arc<DriverRegistry>, events: Arc<dyn EventSink>) -> Self {
        Self {
            registry,
            store: EnvelopeStore::new(),
            checklist: ChecklistManager::new(),
            gates: GateEvaluator::new(),
            events,
        }
    }

    pub fn registry(&self) -> &Arc<DriverRegistry> {
        &self.registry
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Create an envelope in `Draft` under the given driver.
    ///
    /// Signals with defaults are seeded first, then the initial payload
    /// (validated against the driver's field rules) is merged in, the
    /// checklist is instantiated and the first recompute runs. The
    /// payload version stays at 0; only later patches bump it.
    pub fn create(
        &self,
        reference: Reference,
        driver_id: &str,
        version: Option<&str>,
        initial_payload: Option<serde_json::Map<String, Value>>,
        actor: Option<ActorId>,
    ) -> EnvelopeResult<Envelope> {
        let driver = self.registry.get(driver_id, version)?;

        let mut envelope = Envelope::new(reference, driver.id.clone(), driver.version.clone());
        for signal in &driver.signals {
            if let Some(default) = &signal.default {
                envelope.signals.insert(signal.key.clone(), default.clone());
            }
        }
        if let Some(patch) = initial_payload {
            let (normalized, errors) = payload_validator::validate(&driver, &patch);
            if !errors.is_empty() {
                return Err(EnvelopeError::Validation(errors));
            }
            payload_validator::merge_patch(&mut envelope.payload, &normalized);
        }

        let items = self.checklist.seed(&driver);
        let mut record = EnvelopeRecord::new(envelope, items);
        let (_, warnings) = self.recompute(&driver, &mut record);

        let entry = audit_entry(&record, AuditAction::Created, &actor)
            .with_after(json!({
                "status": record.envelope.status,
                "driver_id": record.envelope.driver_id,
                "driver_version": record.envelope.driver_version,
            }))
            .with_metadata(json!({"reference": record.envelope.reference}));
        record.audit.push(entry);
        let warning_events = self.append_warnings(&mut record, warnings);

        let envelope = record.envelope.clone();
        let handle = Arc::new(Mutex::new(record));
        // Lock before indexing: a concurrent caller that resolves the id
        // must queue behind the creation event, not ahead of it
        let _guard = lock_record(&handle)?;
        self.store.insert(
            envelope.id.clone(),
            envelope.reference.clone(),
            Arc::clone(&handle),
        )?;
        self.events.publish(&EnvelopeEvent::EnvelopeCreated {
            envelope_id: envelope.id.clone(),
            reference: envelope.reference.clone(),
            driver_id: envelope.driver_id.clone(),
            driver_version: envelope.driver_version.clone(),
        });
        for event in &warning_events {
            self.events.publish(event);
        }

        info!(
            envelope_id = %envelope.id,
            driver = %envelope.driver_id,
            version = %envelope.driver_version,
            reference = %envelope.reference,
            "Envelope created"
        );
        Ok(envelope)
    }

    /// Apply a merge patch to the payload (`Draft` or `Active` only).
    ///
    /// Objects merge recursively, scalars and arrays replace, explicit
    /// `null` removes the key. A draft becomes active on its first
    /// payload change.
    pub fn update_payload(
        &self,
        id: &EnvelopeId,
        patch: serde_json::Map<String, Value>,
        actor: Option<ActorId>,
    ) -> EnvelopeResult<Envelope> {
        let handle = self.store.get(id)?;
        let mut guard = lock_record(&handle)?;

        ensure_editable(&guard.envelope, "update payload")?;
        let driver = self.driver_for(&guard.envelope)?;

        let (normalized, errors) = payload_validator::validate(&driver, &patch);
        if !errors.is_empty() {
            return Err(EnvelopeError::Validation(errors));
        }

        let mut work = guard.clone();
        let before_version = work.envelope.payload_version;
        let before_payload = work.envelope.payload.clone();
        payload_validator::merge_patch(&mut work.envelope.payload, &normalized);
        work.envelope.payload_version += 1;
        activate_if_draft(&mut work.envelope);

        let (changes, warnings) = self.recompute(&driver, &mut work);
        let diff = payload_validator::compute_diff(&before_payload, &work.envelope.payload);

        let entry = audit_entry(&work, AuditAction::PayloadPatched, &actor)
            .with_before(json!({"payload_version": before_version}))
            .with_after(json!({"payload_version": work.envelope.payload_version}))
            .with_metadata(json!({"diff": &diff, "changed_items": &changes}));
        work.audit.push(entry);
        let warning_events = self.append_warnings(&mut work, warnings);

        let envelope = work.envelope.clone();
        *guard = work;
        self.events.publish(&EnvelopeEvent::PayloadUpdated {
            envelope_id: envelope.id.clone(),
            payload_version: envelope.payload_version,
            diff,
            changed_items: changes,
        });
        for event in &warning_events {
            self.events.publish(event);
        }

        info!(
            envelope_id = %envelope.id,
            payload_version = envelope.payload_version,
            "Payload updated"
        );
        Ok(envelope)
    }

    /// Submit a document against a checklist item (`Draft` or `Active`).
    ///
    /// The item must be a document item and the document type must be
    /// allowed by the driver and agree with the type the item declares.
    /// Attachments are append-only; the newest one governs the item's
    /// status.
    pub fn submit_attachment(
        &self,
        id: &EnvelopeId,
        item_key: &str,
        doc_type: &str,
        upload: AttachmentUpload,
        actor: Option<ActorId>,
    ) -> EnvelopeResult<Attachment> {
        let handle = self.store.get(id)?;
        let mut guard = lock_record(&handle)?;

        ensure_editable(&guard.envelope, "submit attachment")?;
        let driver = self.driver_for(&guard.envelope)?;

        let template = driver
            .item(item_key)
            .ok_or_else(|| EnvelopeError::UnknownChecklistItem(item_key.to_string()))?;
        if template.kind != ChecklistItemKind::Document {
            return Err(EnvelopeError::NotADocumentItem(item_key.to_string()));
        }
        if !driver.allows_doc_type(doc_type) {
            return Err(EnvelopeError::DocumentTypeNotAllowed(doc_type.to_string()));
        }
        // A registered type still has to be the one the item declares
        if let Some(expected) = template.doc_type.as_deref() {
            if expected != doc_type {
                return Err(EnvelopeError::DocumentTypeMismatch {
                    item: item_key.to_string(),
                    expected: expected.to_string(),
                    submitted: doc_type.to_string(),
                });
            }
        }

        let mut work = guard.clone();
        let attachment = Attachment::new(
            work.envelope.id.clone(),
            item_key,
            doc_type,
            upload,
            actor.clone(),
        );
        work.attachments.push(attachment.clone());
        activate_if_draft(&mut work.envelope);

        let (changes, warnings) = self.recompute(&driver, &mut work);

        let entry = audit_entry(&work, AuditAction::AttachmentUploaded, &actor)
            .with_after(json!({
                "item_key": item_key,
                "attachment_id": attachment.id,
                "doc_type": doc_type,
                "storage_ref": attachment.storage_ref,
            }))
            .with_metadata(json!({"changed_items": &changes}));
        work.audit.push(entry);
        let warning_events = self.append_warnings(&mut work, warnings);

        *guard = work;
        self.events.publish(&EnvelopeEvent::AttachmentUploaded {
            envelope_id: attachment.envelope_id.clone(),
            item_key: attachment.item_key.clone(),
            attachment_id: attachment.id.clone(),
            doc_type: attachment.doc_type.clone(),
            changed_items: changes,
        });
        for event in &warning_events {
            self.events.publish(event);
        }

        info!(
            envelope_id = %attachment.envelope_id,
            item = item_key,
            attachment_id = %attachment.id,
            "Attachment submitted"
        );
        Ok(attachment)
    }

    /// Record a review decision on a submitted attachment.
    ///
    /// The backing item must be awaiting review: `NeedsReview`, or
    /// `Uploaded` when review is optional. The item's next status is
    /// derived from its latest attachment, which need not be the one
    /// reviewed here.
    pub fn review_attachment(
        &self,
        id: &EnvelopeId,
        attachment_id: &AttachmentId,
        decision: ReviewDecision,
        note: Option<String>,
        actor: Option<ActorId>,
    ) -> EnvelopeResult<Envelope> {
        let handle = self.store.get(id)?;
        let mut guard = lock_record(&handle)?;

        ensure_editable(&guard.envelope, "review attachment")?;
        let driver = self.driver_for(&guard.envelope)?;

        let position = guard
            .attachments
            .iter()
            .position(|a| &a.id == attachment_id)
            .ok_or_else(|| EnvelopeError::AttachmentNotFound(attachment_id.to_string()))?;
        let item_key = guard.attachments[position].item_key.clone();
        let item = guard
            .item(&item_key)
            .ok_or_else(|| EnvelopeError::UnknownChecklistItem(item_key.clone()))?;

        let reviewable = item.status == ChecklistItemStatus::NeedsReview
            || (item.status == ChecklistItemStatus::Uploaded && item.review_mode.allows_review());
        if !reviewable || !guard.attachments[position].is_pending() {
            return Err(EnvelopeError::ReviewNotPending {
                key: item_key,
                status: item.status,
            });
        }
        let from = item.status;

        let mut work = guard.clone();
        work.attachments[position].review(decision, actor.clone(), note.clone());
        work.envelope.touch();

        let (changes, warnings) = self.recompute(&driver, &mut work);

        let after = work.item(&item_key).map(|i| i.status);
        let entry = audit_entry(&work, AuditAction::AttachmentReviewed, &actor)
            .with_before(json!({"item_status": from}))
            .with_after(json!({"item_status": after, "decision": decision}))
            .with_metadata(json!({"attachment_id": attachment_id, "note": note}));
        work.audit.push(entry);
        let warning_events = self.append_warnings(&mut work, warnings);

        let envelope = work.envelope.clone();
        *guard = work;
        self.events.publish(&EnvelopeEvent::AttachmentReviewed {
            envelope_id: envelope.id.clone(),
            item_key: item_key.clone(),
            attachment_id: attachment_id.clone(),
            decision,
            changed_items: changes,
        });
        for event in &warning_events {
            self.events.publish(event);
        }

        info!(
            envelope_id = %envelope.id,
            item = %item_key,
            decision = %decision,
            "Attachment reviewed"
        );
        Ok(envelope)
    }

    /// Record a review decision directly on a non-document item.
    ///
    /// Only items sitting in `NeedsReview` accept a decision; document
    /// items are reviewed through their attachments. The decision pins
    /// to the item's current backing value and holds until that value
    /// changes.
    pub fn review_item(
        &self,
        id: &EnvelopeId,
        item_key: &str,
        decision: ReviewDecision,
        note: Option<String>,
        actor: Option<ActorId>,
    ) -> EnvelopeResult<Envelope> {
        let handle = self.store.get(id)?;
        let mut guard = lock_record(&handle)?;

        ensure_editable(&guard.envelope, "review item")?;
        let driver = self.driver_for(&guard.envelope)?;

        let item = guard
            .item(item_key)
            .ok_or_else(|| EnvelopeError::UnknownChecklistItem(item_key.to_string()))?;
        if item.kind == ChecklistItemKind::Document {
            return Err(EnvelopeError::DocumentItemReview(item_key.to_string()));
        }
        if item.status != ChecklistItemStatus::NeedsReview {
            return Err(EnvelopeError::ReviewNotPending {
                key: item_key.to_string(),
                status: item.status,
            });
        }
        let from = item.status;

        let mut work = guard.clone();
        let backing = item_backing_value(&work, item_key);
        if let Some(item) = work.item_mut(item_key) {
            item.record_review(
                decision == ReviewDecision::Accepted,
                actor.clone(),
                note.clone(),
                backing,
            );
        }
        work.envelope.touch();

        let (mut changes, warnings) = self.recompute(&driver, &mut work);
        // The decision pins through recompute, so record the transition
        // explicitly.
        let to = decided_status(decision);
        changes.insert(
            0,
            ItemChange {
                key: item_key.to_string(),
                from,
                to,
            },
        );

        let entry = audit_entry(&work, AuditAction::ItemReviewed, &actor)
            .with_before(json!({"item_status": from}))
            .with_after(json!({"item_status": to, "decision": decision}))
            .with_metadata(json!({"note": note}));
        work.audit.push(entry);
        let warning_events = self.append_warnings(&mut work, warnings);

        let envelope = work.envelope.clone();
        *guard = work;
        self.events.publish(&EnvelopeEvent::ItemReviewed {
            envelope_id: envelope.id.clone(),
            item_key: item_key.to_string(),
            decision,
            changed_items: changes,
        });
        for event in &warning_events {
            self.events.publish(event);
        }

        info!(
            envelope_id = %envelope.id,
            item = item_key,
            decision = %decision,
            "Item reviewed"
        );
        Ok(envelope)
    }

    /// Set a signal (`Draft`, `Active` or `Locked`).
    ///
    /// Values for declared signals are type-checked; undeclared keys
    /// pass through as opaque host data. Signals may change on a locked
    /// envelope without reopening it.
    pub fn set_signal(
        &self,
        id: &EnvelopeId,
        key: &str,
        value: Value,
        actor: Option<ActorId>,
    ) -> EnvelopeResult<Envelope> {
        let handle = self.store.get(id)?;
        let mut guard = lock_record(&handle)?;

        if guard.envelope.status.is_terminal() {
            return Err(EnvelopeError::InvalidTransition {
                operation: "set signal".to_string(),
                status: guard.envelope.status,
            });
        }
        let driver = self.driver_for(&guard.envelope)?;

        if let Some(spec) = driver.signals.iter().find(|s| s.key == key) {
            spec.check(&value)
                .map_err(|message| EnvelopeError::InvalidSignal {
                    key: key.to_string(),
                    message,
                })?;
        }

        let mut work = guard.clone();
        let old = work.envelope.signals.insert(key.to_string(), value.clone());
        activate_if_draft(&mut work.envelope);

        let (changes, warnings) = self.recompute(&driver, &mut work);

        let entry = audit_entry(&work, AuditAction::SignalSet, &actor)
            .with_before(json!({"value": &old}))
            .with_after(json!({"value": &value}))
            .with_metadata(json!({"key": key, "changed_items": &changes}));
        work.audit.push(entry);
        let warning_events = self.append_warnings(&mut work, warnings);

        let envelope = work.envelope.clone();
        *guard = work;
        self.events.publish(&EnvelopeEvent::SignalChanged {
            envelope_id: envelope.id.clone(),
            key: key.to_string(),
            old,
            new: value,
            changed_items: changes,
        });
        for event in &warning_events {
            self.events.publish(event);
        }

        info!(envelope_id = %envelope.id, key = key, "Signal set");
        Ok(envelope)
    }

    /// Lock an active envelope for settlement.
    ///
    /// Requires the `lockable` gate; the error names the blocking items
    /// so callers can surface what is still outstanding.
    pub fn lock(&self, id: &EnvelopeId, actor: Option<ActorId>) -> EnvelopeResult<Envelope> {
        let handle = self.store.get(id)?;
        let mut guard = lock_record(&handle)?;

        if guard.envelope.status != EnvelopeStatus::Active {
            return Err(EnvelopeError::InvalidTransition {
                operation: "lock".to_string(),
                status: guard.envelope.status,
            });
        }
        if !guard.envelope.gate_bool(GATE_LOCKABLE) {
            return Err(EnvelopeError::NotLockable(lock_blockers(&guard)));
        }
        let driver = self.driver_for(&guard.envelope)?;

        let mut work = guard.clone();
        let from = work.envelope.status;
        work.envelope.lock();
        let (_, warnings) = self.recompute(&driver, &mut work);

        let entry = audit_entry(&work, AuditAction::Locked, &actor)
            .with_before(json!({"status": from}))
            .with_after(json!({"status": work.envelope.status}));
        work.audit.push(entry);
        let warning_events = self.append_warnings(&mut work, warnings);

        let envelope = work.envelope.clone();
        *guard = work;
        self.events.publish(&EnvelopeEvent::EnvelopeLocked {
            envelope_id: envelope.id.clone(),
        });
        for event in &warning_events {
            self.events.publish(event);
        }

        info!(envelope_id = %envelope.id, "Envelope locked");
        Ok(envelope)
    }

    /// Settle a locked envelope. Terminal afterwards.
    pub fn settle(&self, id: &EnvelopeId, actor: Option<ActorId>) -> EnvelopeResult<Envelope> {
        let handle = self.store.get(id)?;
        let mut guard = lock_record(&handle)?;

        match guard.envelope.status {
            EnvelopeStatus::Locked => {}
            status if status.is_terminal() => {
                return Err(EnvelopeError::InvalidTransition {
                    operation: "settle".to_string(),
                    status,
                });
            }
            status => return Err(EnvelopeError::NotSettleable(status)),
        }
        let driver = self.driver_for(&guard.envelope)?;

        let mut work = guard.clone();
        let from = work.envelope.status;
        work.envelope.settle();
        let (_, warnings) = self.recompute(&driver, &mut work);

        let entry = audit_entry(&work, AuditAction::Settled, &actor)
            .with_before(json!({"status": from}))
            .with_after(json!({"status": work.envelope.status}));
        work.audit.push(entry);
        let warning_events = self.append_warnings(&mut work, warnings);

        let envelope = work.envelope.clone();
        *guard = work;
        self.events.publish(&EnvelopeEvent::EnvelopeSettled {
            envelope_id: envelope.id.clone(),
        });
        for event in &warning_events {
            self.events.publish(event);
        }

        info!(envelope_id = %envelope.id, "Envelope settled");
        Ok(envelope)
    }

    /// Cancel an envelope from any non-terminal status.
    pub fn cancel(
        &self,
        id: &EnvelopeId,
        reason: Option<String>,
        actor: Option<ActorId>,
    ) -> EnvelopeResult<Envelope> {
        let handle = self.store.get(id)?;
        let mut guard = lock_record(&handle)?;

        if guard.envelope.status.is_terminal() {
            return Err(EnvelopeError::InvalidTransition {
                operation: "cancel".to_string(),
                status: guard.envelope.status,
            });
        }
        let driver = self.driver_for(&guard.envelope)?;

        let mut work = guard.clone();
        let from = work.envelope.status;
        work.envelope.cancel(reason.clone());
        let (_, warnings) = self.recompute(&driver, &mut work);

        let entry = audit_entry(&work, AuditAction::Cancelled, &actor)
            .with_before(json!({"status": from}))
            .with_after(json!({"status": work.envelope.status}))
            .with_metadata(json!({"reason": &reason}));
        work.audit.push(entry);
        let warning_events = self.append_warnings(&mut work, warnings);

        let envelope = work.envelope.clone();
        *guard = work;
        self.events.publish(&EnvelopeEvent::EnvelopeCancelled {
            envelope_id: envelope.id.clone(),
            reason,
        });
        for event in &warning_events {
            self.events.publish(event);
        }

        info!(envelope_id = %envelope.id, "Envelope cancelled");
        Ok(envelope)
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn envelope(&self, id: &EnvelopeId) -> EnvelopeResult<Envelope> {
        let handle = self.store.get(id)?;
        let guard = lock_record(&handle)?;
        Ok(guard.envelope.clone())
    }

    pub fn status(&self, id: &EnvelopeId) -> EnvelopeResult<EnvelopeStatus> {
        let handle = self.store.get(id)?;
        let guard = lock_record(&handle)?;
        Ok(guard.envelope.status)
    }

    /// Latest evaluated value of a gate; `None` if the driver does not
    /// declare it
    pub fn gate(&self, id: &EnvelopeId, name: &str) -> EnvelopeResult<Option<Value>> {
        let handle = self.store.get(id)?;
        let guard = lock_record(&handle)?;
        Ok(guard.envelope.gate(name).cloned())
    }

    pub fn signal(&self, id: &EnvelopeId, key: &str) -> EnvelopeResult<Option<Value>> {
        let handle = self.store.get(id)?;
        let guard = lock_record(&handle)?;
        Ok(guard.envelope.signal(key).cloned())
    }

    pub fn checklist(&self, id: &EnvelopeId) -> EnvelopeResult<Vec<ChecklistItem>> {
        let handle = self.store.get(id)?;
        let guard = lock_record(&handle)?;
        Ok(guard.items.clone())
    }

    pub fn checklist_summary(&self, id: &EnvelopeId) -> EnvelopeResult<ChecklistSummary> {
        let handle = self.store.get(id)?;
        let guard = lock_record(&handle)?;
        Ok(ChecklistSummary::from_items(&guard.items))
    }

    pub fn attachments(&self, id: &EnvelopeId) -> EnvelopeResult<Vec<Attachment>> {
        let handle = self.store.get(id)?;
        let guard = lock_record(&handle)?;
        Ok(guard.attachments.clone())
    }

    pub fn audit(&self, id: &EnvelopeId) -> EnvelopeResult<Vec<AuditEntry>> {
        let handle = self.store.get(id)?;
        let guard = lock_record(&handle)?;
        Ok(guard.audit.clone())
    }

    /// Envelope ids attached to a reference, in creation order
    pub fn envelopes_for(&self, reference: &Reference) -> EnvelopeResult<Vec<EnvelopeId>> {
        self.store.by_reference(reference)
    }

    // ── Internals ────────────────────────────────────────────────────

    fn driver_for(&self, envelope: &Envelope) -> EnvelopeResult<Arc<Driver>> {
        self.registry
            .get(&envelope.driver_id, Some(&envelope.driver_version))
    }

    /// Recompute checklist statuses and gates on a working copy
    fn recompute(
        &self,
        driver: &Driver,
        record: &mut EnvelopeRecord,
    ) -> (Vec<ItemChange>, Vec<GateWarning>) {
        let outcome = self.checklist.recompute(
            driver,
            &record.envelope.payload,
            &record.envelope.signals,
            &record.attachments,
            record.envelope.status,
            &mut record.items,
        );

        let report = {
            let view = EnvelopeView {
                payload: &record.envelope.payload,
                signals: &record.envelope.signals,
                items: &record.items,
                status: record.envelope.status,
            };
            self.gates.evaluate(driver, &view)
        };
        record.envelope.gates = report.gates;

        let mut warnings = outcome.warnings;
        warnings.extend(report.warnings);
        (outcome.changes, warnings)
    }

    /// Turn gate warnings into audit entries and events. Warnings carry
    /// no actor; they belong to the evaluation, not the caller.
    fn append_warnings(
        &self,
        record: &mut EnvelopeRecord,
        warnings: Vec<GateWarning>,
    ) -> Vec<EnvelopeEvent> {
        let mut events = Vec::with_capacity(warnings.len());
        for warning in warnings {
            warn!(
                envelope_id = %record.envelope.id,
                gate = %warning.gate,
                "Gate evaluation warning: {}",
                warning.message
            );
            let entry = AuditEntry::new(
                record.next_sequence(),
                record.envelope.id.clone(),
                AuditAction::GateWarning,
            )
            .with_metadata(json!({"gate": &warning.gate, "message": &warning.message}));
            record.audit.push(entry);
            events.push(EnvelopeEvent::GateEvaluationWarning {
                envelope_id: record.envelope.id.clone(),
                gate: warning.gate,
                message: warning.message,
            });
        }
        events
    }
}

fn audit_entry(record: &EnvelopeRecord, action: AuditAction, actor: &Option<ActorId>) -> AuditEntry {
    AuditEntry::new(record.next_sequence(), record.envelope.id.clone(), action)
        .with_actor(actor.clone())
}

fn ensure_editable(envelope: &Envelope, operation: &str) -> EnvelopeResult<()> {
    if envelope.status.can_edit() {
        Ok(())
    } else {
        Err(EnvelopeError::InvalidTransition {
            operation: operation.to_string(),
            status: envelope.status,
        })
    }
}

/// First content mutation moves a draft to active; later mutations only
/// refresh the timestamp
fn activate_if_draft(envelope: &mut Envelope) {
    if envelope.status == EnvelopeStatus::Draft {
        envelope.activate();
    } else {
        envelope.touch();
    }
}

fn decided_status(decision: ReviewDecision) -> ChecklistItemStatus {
    match decision {
        ReviewDecision::Accepted => ChecklistItemStatus::Accepted,
        ReviewDecision::Rejected => ChecklistItemStatus::Rejected,
    }
}

/// Current backing value for a non-document item, captured as the
/// review fingerprint. Resolution must match what the checklist manager
/// sees on recompute, or the pin would dissolve immediately.
fn item_backing_value(record: &EnvelopeRecord, key: &str) -> Value {
    let Some(item) = record.item(key) else {
        return Value::Null;
    };
    let view = EnvelopeView {
        payload: &record.envelope.payload,
        signals: &record.envelope.signals,
        items: &record.items,
        status: record.envelope.status,
    };
    match item.kind {
        ChecklistItemKind::PayloadField => view.field(item.field.as_deref().unwrap_or("")),
        _ => view.signal(item.backing_signal_key()),
    }
}

/// Required items holding the lock back, for the `NotLockable` message
fn lock_blockers(record: &EnvelopeRecord) -> String {
    let blocking: Vec<&str> = record
        .items
        .iter()
        .filter(|i| i.required && !i.status.is_accepted())
        .map(|i| i.key.as_str())
        .collect();
    if blocking.is_empty() {
        "gate 'lockable' is false".to_string()
    } else {
        format!("required items not accepted: {}", blocking.join(", "))
    }
}
