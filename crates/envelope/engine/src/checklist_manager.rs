//! Checklist derivation
//!
//! Re-derives every item's `required` flag and status from the envelope
//! snapshot after each mutation. Manual review decisions are pinned to
//! the backing value they were made against and dissolve as soon as
//! that value changes, sending the item back through the normal rule.

use std::collections::BTreeMap;

use envelope_expr::truthy;
use envelope_types::{
    Attachment, ChecklistItem, ChecklistItemKind, ChecklistItemStatus, Driver, EnvelopeStatus,
    ItemChange, ItemTemplate, RequiredRule, ReviewDecision, ReviewMode,
};
use serde_json::Value;

use crate::gate_evaluator::{evaluate_predicate, EnvelopeView, GateWarning};
use crate::payload_validator;

/// Status changes and non-fatal warnings from one recompute pass
#[derive(Clone, Debug, Default)]
pub struct RecomputeOutcome {
    pub changes: Vec<ItemChange>,
    pub warnings: Vec<GateWarning>,
}

/// Derives checklist state from a driver and an envelope snapshot
#[derive(Clone, Debug, Default)]
pub struct ChecklistManager;

impl ChecklistManager {
    pub fn new() -> Self {
        Self
    }

    /// One fresh item per driver template, every status `Missing`.
    ///
    /// The caller recomputes immediately afterwards, which settles
    /// `required` predicates against the creation payload.
    pub fn seed(&self, driver: &Driver) -> Vec<ChecklistItem> {
        driver
            .checklist
            .iter()
            .map(ItemTemplate::instantiate)
            .collect()
    }

    /// Re-derive `required` flags and statuses for every item.
    ///
    /// Requirement predicates are evaluated against the checklist as of
    /// the previous recompute; statuses are then derived from the new
    /// payload, signals, and attachments.
    pub fn recompute(
        &self,
        driver: &Driver,
        payload: &serde_json::Map<String, Value>,
        signals: &BTreeMap<String, Value>,
        attachments: &[Attachment],
        status: EnvelopeStatus,
        items: &mut [ChecklistItem],
    ) -> RecomputeOutcome {
        let mut outcome = RecomputeOutcome::default();

        let previous = items.to_vec();
        let view = EnvelopeView {
            payload,
            signals,
            items: &previous,
            status,
        };

        for item in items.iter_mut() {
            let Some(template) = driver.item(&item.key) else {
                continue;
            };
            item.required = match &template.required {
                RequiredRule::Fixed(value) => *value,
                RequiredRule::Predicate(expr) => match evaluate_predicate(expr, &view) {
                    Ok(value) => value,
                    Err(err) => {
                        outcome.warnings.push(GateWarning {
                            gate: item.key.clone(),
                            message: err.to_string(),
                        });
                        false
                    }
                },
            };
        }

        for item in items.iter_mut() {
            let Some(template) = driver.item(&item.key) else {
                continue;
            };
            let from = item.status;
            let to = match item.kind {
                ChecklistItemKind::Document => document_status(item, attachments),
                ChecklistItemKind::PayloadField => field_status(item, template, &view),
                ChecklistItemKind::Attestation | ChecklistItemKind::Signal => {
                    signal_status(item, &view)
                }
            };
            if to != from {
                item.status = to;
                outcome.changes.push(ItemChange {
                    key: item.key.clone(),
                    from,
                    to,
                });
            }
        }

        outcome
    }
}

/// A document item tracks the latest attachment submitted for it
fn document_status(item: &ChecklistItem, attachments: &[Attachment]) -> ChecklistItemStatus {
    let latest = attachments.iter().rev().find(|a| a.item_key == item.key);
    match latest {
        None => ChecklistItemStatus::Missing,
        Some(attachment) => match attachment.review_decision {
            Some(ReviewDecision::Accepted) => ChecklistItemStatus::Accepted,
            Some(ReviewDecision::Rejected) => ChecklistItemStatus::Rejected,
            None => match item.review_mode {
                ReviewMode::Required => ChecklistItemStatus::NeedsReview,
                ReviewMode::Optional => ChecklistItemStatus::Uploaded,
                // Upload is acceptance when no review is declared
                ReviewMode::None => ChecklistItemStatus::Accepted,
            },
        },
    }
}

fn field_status(
    item: &mut ChecklistItem,
    template: &ItemTemplate,
    view: &EnvelopeView<'_>,
) -> ChecklistItemStatus {
    let pointer = template.field.as_deref().unwrap_or("");
    let backing = view.field(pointer);
    if let Some(pinned) = pinned_status(item, &backing) {
        return pinned;
    }
    if backing.is_null() {
        return ChecklistItemStatus::Missing;
    }
    if let Some(rule) = &template.rule {
        if payload_validator::check_field(pointer, rule, backing).is_err() {
            return ChecklistItemStatus::Missing;
        }
    }
    if item.review_mode.requires_review() {
        ChecklistItemStatus::NeedsReview
    } else {
        ChecklistItemStatus::Accepted
    }
}

fn signal_status(item: &mut ChecklistItem, view: &EnvelopeView<'_>) -> ChecklistItemStatus {
    let backing = view.signal(item.backing_signal_key());
    if let Some(pinned) = pinned_status(item, &backing) {
        return pinned;
    }
    if !truthy(&backing) {
        return ChecklistItemStatus::Missing;
    }
    if item.review_mode.requires_review() {
        ChecklistItemStatus::NeedsReview
    } else {
        ChecklistItemStatus::Accepted
    }
}

/// A manual decision holds while the backing value still equals the
/// fingerprint it was made against; otherwise the review is dropped
fn pinned_status(item: &mut ChecklistItem, backing: &Value) -> Option<ChecklistItemStatus> {
    let fingerprint = item.reviewed_value.as_ref()?;
    if fingerprint == backing {
        return Some(item.status);
    }
    item.reset_review();
    None
}
