//! Document attachments submitted against checklist items

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::ActorId;
use crate::envelope::EnvelopeId;

/// Unique identifier for an attachment
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentId(pub String);

impl AttachmentId {
    pub fn generate() -> Self {
        Self(format!("att-{}", Uuid::new_v4()))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl std::fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a manual attachment review
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Accepted,
    Rejected,
}

impl std::fmt::Display for ReviewDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewDecision::Accepted => write!(f, "accepted"),
            ReviewDecision::Rejected => write!(f, "rejected"),
        }
    }
}

/// File metadata supplied when submitting an attachment.
///
/// The engine never touches file bytes; `storage_ref` is an opaque
/// pointer into whatever blob store the caller uses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttachmentUpload {
    pub filename: String,
    pub mime: String,
    pub size: u64,
    pub storage_ref: String,
}

/// A document submitted against a checklist item.
///
/// Attachments are append-only: a new upload supersedes the previous one
/// for status purposes but earlier attachments and their review outcomes
/// stay on record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Attachment {
    pub id: AttachmentId,
    pub envelope_id: EnvelopeId,
    /// Checklist item this attachment was submitted against
    pub item_key: String,
    /// Document type, from the item's driver configuration
    pub doc_type: String,
    pub filename: String,
    pub mime: String,
    pub size: u64,
    pub storage_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_by: Option<ActorId>,
    pub uploaded_at: DateTime<Utc>,
    /// Review outcome; `None` while the attachment awaits review
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_decision: Option<ReviewDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<ActorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_note: Option<String>,
}

impl Attachment {
    pub fn new(
        envelope_id: EnvelopeId,
        item_key: impl Into<String>,
        doc_type: impl Into<String>,
        upload: AttachmentUpload,
        uploaded_by: Option<ActorId>,
    ) -> Self {
        Self {
            id: AttachmentId::generate(),
            envelope_id,
            item_key: item_key.into(),
            doc_type: doc_type.into(),
            filename: upload.filename,
            mime: upload.mime,
            size: upload.size,
            storage_ref: upload.storage_ref,
            uploaded_by,
            uploaded_at: Utc::now(),
            review_decision: None,
            reviewed_by: None,
            reviewed_at: None,
            review_note: None,
        }
    }

    /// True while no review decision has been recorded
    pub fn is_pending(&self) -> bool {
        self.review_decision.is_none()
    }

    pub fn review(
        &mut self,
        decision: ReviewDecision,
        reviewer: Option<ActorId>,
        note: Option<String>,
    ) {
        self.review_decision = Some(decision);
        self.reviewed_by = reviewer;
        self.reviewed_at = Some(Utc::now());
        self.review_note = note;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_upload() -> AttachmentUpload {
        AttachmentUpload {
            filename: "passport.pdf".to_string(),
            mime: "application/pdf".to_string(),
            size: 48_221,
            storage_ref: "s3://docs/passport.pdf".to_string(),
        }
    }

    fn make_attachment() -> Attachment {
        Attachment::new(
            EnvelopeId::new("env-1"),
            "kyc",
            "passport",
            make_upload(),
            None,
        )
    }

    #[test]
    fn test_new_attachment_is_pending() {
        let att = make_attachment();
        assert!(att.is_pending());
        assert!(att.review_decision.is_none());
        assert_eq!(att.item_key, "kyc");
        assert_eq!(att.doc_type, "passport");
    }

    #[test]
    fn test_review_records_decision_and_reviewer() {
        let mut att = make_attachment();
        att.review(
            ReviewDecision::Rejected,
            Some(ActorId::new("reviewer-1")),
            Some("Photo page illegible".to_string()),
        );

        assert!(!att.is_pending());
        assert_eq!(att.review_decision, Some(ReviewDecision::Rejected));
        assert_eq!(att.reviewed_by.as_ref().unwrap().0, "reviewer-1");
        assert!(att.reviewed_at.is_some());
        assert_eq!(att.review_note.as_deref(), Some("Photo page illegible"));
    }

    #[test]
    fn test_attachment_ids_are_unique() {
        let a = AttachmentId::generate();
        let b = AttachmentId::generate();
        assert_ne!(a, b);
        assert!(a.0.starts_with("att-"));
    }

    #[test]
    fn test_review_decision_serializes_snake_case() {
        let json = serde_json::to_string(&ReviewDecision::Accepted).unwrap();
        assert_eq!(json, "\"accepted\"");
    }
}
