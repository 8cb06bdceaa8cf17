//! Checklist items and their derived statuses

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::ActorId;

/// What kind of evidence a checklist item tracks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecklistItemKind {
    /// Satisfied by an uploaded document of a configured type
    Document,
    /// Satisfied by the presence of a payload field
    PayloadField,
    /// Satisfied by a human acknowledging via the backing signal
    Attestation,
    /// Satisfied by an external boolean signal
    Signal,
}

impl std::fmt::Display for ChecklistItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecklistItemKind::Document => write!(f, "document"),
            ChecklistItemKind::PayloadField => write!(f, "payload_field"),
            ChecklistItemKind::Attestation => write!(f, "attestation"),
            ChecklistItemKind::Signal => write!(f, "signal"),
        }
    }
}

/// Whether a checklist item needs a manual review pass
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewMode {
    /// Backing evidence is accepted as soon as it is present
    None,
    /// Evidence is accepted immediately but can still be reviewed
    Optional,
    /// Evidence must be explicitly accepted by a reviewer
    Required,
}

impl ReviewMode {
    /// True when evidence may not auto-accept without a reviewer
    pub fn requires_review(&self) -> bool {
        matches!(self, ReviewMode::Required)
    }

    /// True when a review decision is meaningful for this item
    pub fn allows_review(&self) -> bool {
        !matches!(self, ReviewMode::None)
    }
}

impl Default for ReviewMode {
    fn default() -> Self {
        ReviewMode::None
    }
}

/// Lifecycle status of a checklist item.
///
/// Rejected is re-enterable: fresh evidence moves the item back through
/// the pipeline instead of leaving it stuck.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecklistItemStatus {
    Missing,
    Uploaded,
    NeedsReview,
    Accepted,
    Rejected,
}

impl ChecklistItemStatus {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ChecklistItemStatus::Accepted)
    }
}

impl Default for ChecklistItemStatus {
    fn default() -> Self {
        ChecklistItemStatus::Missing
    }
}

impl std::fmt::Display for ChecklistItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecklistItemStatus::Missing => write!(f, "missing"),
            ChecklistItemStatus::Uploaded => write!(f, "uploaded"),
            ChecklistItemStatus::NeedsReview => write!(f, "needs_review"),
            ChecklistItemStatus::Accepted => write!(f, "accepted"),
            ChecklistItemStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// A single checklist item instance on an envelope.
///
/// Items are seeded from the driver when the envelope is created and
/// their statuses are recomputed after every mutation. The `required`
/// flag is re-evaluated too when the driver declares it as a predicate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub key: String,
    pub label: String,
    pub kind: ChecklistItemKind,
    /// Document type this item accepts (document items only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    /// JSON pointer into the payload (payload field items only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Backing signal key (signal and attestation items)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_key: Option<String>,
    pub required: bool,
    pub review_mode: ReviewMode,
    pub status: ChecklistItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<ActorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_note: Option<String>,
    /// Snapshot of the backing value at review time. A review decision
    /// stays pinned until the backing value diverges from this snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_value: Option<serde_json::Value>,
}

impl ChecklistItem {
    pub fn new(key: impl Into<String>, label: impl Into<String>, kind: ChecklistItemKind) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            kind,
            doc_type: None,
            field: None,
            signal_key: None,
            required: true,
            review_mode: ReviewMode::default(),
            status: ChecklistItemStatus::default(),
            reviewed_by: None,
            reviewed_at: None,
            review_note: None,
            reviewed_value: None,
        }
    }

    /// The signal that backs this item (signal and attestation kinds).
    /// Falls back to the item key when the driver names no explicit signal.
    pub fn backing_signal_key(&self) -> &str {
        self.signal_key.as_deref().unwrap_or(&self.key)
    }

    pub fn is_satisfied(&self) -> bool {
        self.status.is_accepted()
    }

    /// Record a manual review decision against this item's current
    /// backing value.
    pub fn record_review(
        &mut self,
        accepted: bool,
        reviewer: Option<ActorId>,
        note: Option<String>,
        backing_value: serde_json::Value,
    ) {
        self.status = if accepted {
            ChecklistItemStatus::Accepted
        } else {
            ChecklistItemStatus::Rejected
        };
        self.reviewed_by = reviewer;
        self.reviewed_at = Some(Utc::now());
        self.review_note = note;
        self.reviewed_value = Some(backing_value);
    }

    /// Drop any recorded review, e.g. when the backing value changed
    pub fn reset_review(&mut self) {
        self.reviewed_by = None;
        self.reviewed_at = None;
        self.review_note = None;
        self.reviewed_value = None;
    }
}

/// A single item status transition produced by a recompute pass
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemChange {
    pub key: String,
    pub from: ChecklistItemStatus,
    pub to: ChecklistItemStatus,
}

/// Aggregate view over an envelope's checklist
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChecklistSummary {
    pub total: usize,
    pub required: usize,
    pub accepted: usize,
    pub required_accepted: usize,
    /// Required items neither accepted nor rejected
    pub pending: usize,
    pub rejected: usize,
    /// True when every required item is accepted
    pub complete: bool,
}

impl ChecklistSummary {
    pub fn from_items(items: &[ChecklistItem]) -> Self {
        let total = items.len();
        let required = items.iter().filter(|i| i.required).count();
        let accepted = items.iter().filter(|i| i.status.is_accepted()).count();
        let required_accepted = items
            .iter()
            .filter(|i| i.required && i.status.is_accepted())
            .count();
        let pending = items
            .iter()
            .filter(|i| {
                i.required
                    && !matches!(
                        i.status,
                        ChecklistItemStatus::Accepted | ChecklistItemStatus::Rejected
                    )
            })
            .count();
        let rejected = items
            .iter()
            .filter(|i| i.status == ChecklistItemStatus::Rejected)
            .count();

        Self {
            total,
            required,
            accepted,
            required_accepted,
            pending,
            rejected,
            complete: required_accepted == required,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_item(key: &str, kind: ChecklistItemKind) -> ChecklistItem {
        ChecklistItem::new(key, key.to_uppercase(), kind)
    }

    #[test]
    fn test_new_item_defaults() {
        let item = make_item("kyc", ChecklistItemKind::Document);
        assert_eq!(item.status, ChecklistItemStatus::Missing);
        assert_eq!(item.review_mode, ReviewMode::None);
        assert!(item.required);
        assert!(!item.is_satisfied());
    }

    #[test]
    fn test_review_mode_predicates() {
        assert!(!ReviewMode::None.requires_review());
        assert!(!ReviewMode::None.allows_review());
        assert!(!ReviewMode::Optional.requires_review());
        assert!(ReviewMode::Optional.allows_review());
        assert!(ReviewMode::Required.requires_review());
        assert!(ReviewMode::Required.allows_review());
    }

    #[test]
    fn test_backing_signal_key_falls_back_to_item_key() {
        let mut item = make_item("ops_ack", ChecklistItemKind::Attestation);
        assert_eq!(item.backing_signal_key(), "ops_ack");
        item.signal_key = Some("ops.acknowledged".to_string());
        assert_eq!(item.backing_signal_key(), "ops.acknowledged");
    }

    #[test]
    fn test_record_review_sets_fields() {
        let mut item = make_item("kyc", ChecklistItemKind::Document);
        item.record_review(
            true,
            Some(ActorId::new("reviewer-1")),
            None,
            json!("att-123"),
        );
        assert_eq!(item.status, ChecklistItemStatus::Accepted);
        assert!(item.reviewed_at.is_some());
        assert_eq!(item.reviewed_value, Some(json!("att-123")));

        item.reset_review();
        assert!(item.reviewed_by.is_none());
        assert!(item.reviewed_value.is_none());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&ChecklistItemStatus::NeedsReview).unwrap();
        assert_eq!(json, "\"needs_review\"");
        let json = serde_json::to_string(&ChecklistItemKind::PayloadField).unwrap();
        assert_eq!(json, "\"payload_field\"");
    }

    #[test]
    fn test_summary_counts() {
        let mut a = make_item("a", ChecklistItemKind::Document);
        a.status = ChecklistItemStatus::Accepted;
        let mut b = make_item("b", ChecklistItemKind::Signal);
        b.status = ChecklistItemStatus::Rejected;
        let mut c = make_item("c", ChecklistItemKind::PayloadField);
        c.required = false;
        c.status = ChecklistItemStatus::Accepted;
        let d = make_item("d", ChecklistItemKind::Attestation);

        let summary = ChecklistSummary::from_items(&[a, b, c, d]);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.required, 3);
        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.required_accepted, 1);
        // d is the only required item still in flight; b is rejected, not pending
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.rejected, 1);
        assert!(!summary.complete);
    }

    #[test]
    fn test_summary_complete_when_all_required_accepted() {
        let mut a = make_item("a", ChecklistItemKind::Document);
        a.status = ChecklistItemStatus::Accepted;
        let mut b = make_item("b", ChecklistItemKind::Signal);
        b.required = false;

        let summary = ChecklistSummary::from_items(&[a, b]);
        assert!(summary.complete);
        assert_eq!(summary.pending, 0);
    }
}
