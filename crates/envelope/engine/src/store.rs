//! In-memory envelope store
//!
//! One `Arc<Mutex<EnvelopeRecord>>` per envelope: the outer map lock is
//! held only for lookup and insert, and each operation then serializes
//! on the single envelope's mutex for its full
//! validate → apply → recompute → commit span. Operations on different
//! envelopes run in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use envelope_types::{
    Attachment, AuditEntry, ChecklistItem, Envelope, EnvelopeError, EnvelopeId, EnvelopeResult,
    Reference,
};

/// Everything owned by one envelope: the aggregate plus its checklist,
/// attachments and audit trail. Held behind a single mutex so mutations
/// never interleave partial recomputation.
#[derive(Clone, Debug)]
pub struct EnvelopeRecord {
    pub envelope: Envelope,
    pub items: Vec<ChecklistItem>,
    pub attachments: Vec<Attachment>,
    pub audit: Vec<AuditEntry>,
}

impl EnvelopeRecord {
    pub fn new(envelope: Envelope, items: Vec<ChecklistItem>) -> Self {
        Self {
            envelope,
            items,
            attachments: Vec::new(),
            audit: Vec::new(),
        }
    }

    /// Next audit sequence number; entries are contiguous from 0
    pub fn next_sequence(&self) -> u64 {
        self.audit.len() as u64
    }

    /// Latest attachment submitted against an item
    pub fn latest_attachment(&self, item_key: &str) -> Option<&Attachment> {
        self.attachments
            .iter()
            .rev()
            .find(|a| a.item_key == item_key)
    }

    pub fn item(&self, key: &str) -> Option<&ChecklistItem> {
        self.items.iter().find(|i| i.key == key)
    }

    pub fn item_mut(&mut self, key: &str) -> Option<&mut ChecklistItem> {
        self.items.iter_mut().find(|i| i.key == key)
    }
}

/// In-memory store keyed by envelope id, with a reference index
#[derive(Default)]
pub struct EnvelopeStore {
    envelopes: RwLock<HashMap<EnvelopeId, Arc<Mutex<EnvelopeRecord>>>>,
    by_reference: RwLock<HashMap<Reference, Vec<EnvelopeId>>>,
}

impl EnvelopeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a record handle under its id and reference.
    ///
    /// Only the outer maps are locked here, so the caller may already
    /// hold the record's mutex; creation does exactly that to keep the
    /// envelope locked from before it becomes discoverable.
    pub fn insert(
        &self,
        id: EnvelopeId,
        reference: Reference,
        handle: Arc<Mutex<EnvelopeRecord>>,
    ) -> EnvelopeResult<()> {
        {
            let mut envelopes = self.envelopes.write().map_err(|_| poisoned("envelopes"))?;
            envelopes.insert(id.clone(), handle);
        }

        let mut index = self
            .by_reference
            .write()
            .map_err(|_| poisoned("reference index"))?;
        index.entry(reference).or_default().push(id);
        Ok(())
    }

    /// Handle to one envelope's record
    pub fn get(&self, id: &EnvelopeId) -> EnvelopeResult<Arc<Mutex<EnvelopeRecord>>> {
        let envelopes = self.envelopes.read().map_err(|_| poisoned("envelopes"))?;
        envelopes
            .get(id)
            .cloned()
            .ok_or_else(|| EnvelopeError::EnvelopeNotFound(id.to_string()))
    }

    /// Envelope ids attached to a reference, in creation order
    pub fn by_reference(&self, reference: &Reference) -> EnvelopeResult<Vec<EnvelopeId>> {
        let index = self
            .by_reference
            .read()
            .map_err(|_| poisoned("reference index"))?;
        Ok(index.get(reference).cloned().unwrap_or_default())
    }

    pub fn ids(&self) -> EnvelopeResult<Vec<EnvelopeId>> {
        let envelopes = self.envelopes.read().map_err(|_| poisoned("envelopes"))?;
        Ok(envelopes.keys().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.envelopes.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lock one record for a full operation span
pub fn lock_record(
    handle: &Arc<Mutex<EnvelopeRecord>>,
) -> EnvelopeResult<MutexGuard<'_, EnvelopeRecord>> {
    handle.lock().map_err(|_| poisoned("envelope record"))
}

pub(crate) fn poisoned(what: &str) -> EnvelopeError {
    EnvelopeError::Store(format!("{} lock poisoned", what))
}
