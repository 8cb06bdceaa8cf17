//! Envelope aggregate and lifecycle status

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier for an envelope
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvelopeId(pub String);

impl EnvelopeId {
    pub fn generate() -> Self {
        Self(format!("env-{}", Uuid::new_v4()))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl std::fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The business object an envelope settles, e.g. a loan or a trade.
///
/// Multiple envelopes may point at the same reference over time
/// (re-issues after cancellation); the store indexes them by it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub reference_type: String,
    pub reference_id: String,
}

impl Reference {
    pub fn new(reference_type: impl Into<String>, reference_id: impl Into<String>) -> Self {
        Self {
            reference_type: reference_type.into(),
            reference_id: reference_id.into(),
        }
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.reference_type, self.reference_id)
    }
}

/// Envelope lifecycle status.
///
/// Settled and Cancelled are terminal; no operation may leave them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    Draft,
    Active,
    Locked,
    Settled,
    Cancelled,
}

impl EnvelopeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EnvelopeStatus::Settled | EnvelopeStatus::Cancelled)
    }

    /// Payload and attachments may only change before the lock
    pub fn can_edit(&self) -> bool {
        matches!(self, EnvelopeStatus::Draft | EnvelopeStatus::Active)
    }

    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }
}

impl Default for EnvelopeStatus {
    fn default() -> Self {
        EnvelopeStatus::Draft
    }
}

impl std::fmt::Display for EnvelopeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvelopeStatus::Draft => write!(f, "draft"),
            EnvelopeStatus::Active => write!(f, "active"),
            EnvelopeStatus::Locked => write!(f, "locked"),
            EnvelopeStatus::Settled => write!(f, "settled"),
            EnvelopeStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A settlement envelope: the payload under settlement, its external
/// signals, and the latest evaluation of the driver's gates.
///
/// Checklist items, attachments and the audit trail live beside the
/// envelope in its store record rather than inside this struct.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub id: EnvelopeId,
    pub reference: Reference,
    /// Driver that configures this envelope
    pub driver_id: String,
    /// Exact driver version pinned at creation
    pub driver_version: String,
    pub status: EnvelopeStatus,
    /// Structured deal data, patched via JSON merge patch
    pub payload: serde_json::Map<String, Value>,
    /// Incremented on every accepted payload patch
    pub payload_version: u64,
    /// External facts keyed by signal name
    pub signals: BTreeMap<String, Value>,
    /// Latest gate evaluation results, in driver declaration order
    pub gates: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Envelope {
    pub fn new(
        reference: Reference,
        driver_id: impl Into<String>,
        driver_version: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: EnvelopeId::generate(),
            reference,
            driver_id: driver_id.into(),
            driver_version: driver_version.into(),
            status: EnvelopeStatus::default(),
            payload: serde_json::Map::new(),
            payload_version: 0,
            signals: BTreeMap::new(),
            gates: BTreeMap::new(),
            locked_at: None,
            settled_at: None,
            cancelled_at: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn activate(&mut self) {
        self.status = EnvelopeStatus::Active;
        self.touch();
    }

    pub fn lock(&mut self) {
        self.status = EnvelopeStatus::Locked;
        self.locked_at = Some(Utc::now());
        self.touch();
    }

    pub fn settle(&mut self) {
        self.status = EnvelopeStatus::Settled;
        self.settled_at = Some(Utc::now());
        self.touch();
    }

    pub fn cancel(&mut self, reason: Option<String>) {
        self.status = EnvelopeStatus::Cancelled;
        self.cancelled_at = Some(Utc::now());
        self.cancel_reason = reason;
        self.touch();
    }

    /// Latest evaluated value of a gate
    pub fn gate(&self, name: &str) -> Option<&Value> {
        self.gates.get(name)
    }

    /// Latest evaluated value of a gate, coerced to a boolean
    pub fn gate_bool(&self, name: &str) -> bool {
        self.gates.get(name).map(envelope_expr::truthy).unwrap_or(false)
    }

    pub fn signal(&self, key: &str) -> Option<&Value> {
        self.signals.get(key)
    }

    pub fn signal_bool(&self, key: &str) -> bool {
        self.signals.get(key).map(envelope_expr::truthy).unwrap_or(false)
    }

    /// Resolve a JSON pointer against the payload
    pub fn field(&self, pointer: &str) -> Option<&Value> {
        resolve_pointer(&self.payload, pointer)
    }
}

/// Resolve a JSON pointer (RFC 6901) against a payload map.
///
/// Accepts pointers with or without the leading slash and descends
/// through nested objects and array indices. Returns `None` for any
/// missing step or for an empty pointer.
pub fn resolve_pointer<'a>(
    map: &'a serde_json::Map<String, Value>,
    pointer: &str,
) -> Option<&'a Value> {
    let pointer = pointer.strip_prefix('/').unwrap_or(pointer);
    if pointer.is_empty() {
        return None;
    }

    let mut current: Option<&Value> = None;
    for raw in pointer.split('/') {
        // Unescape in RFC order: ~1 then ~0
        let token = raw.replace("~1", "/").replace("~0", "~");
        current = Some(match current {
            None => map.get(&token)?,
            Some(Value::Object(obj)) => obj.get(&token)?,
            Some(Value::Array(arr)) => {
                let idx: usize = token.parse().ok()?;
                arr.get(idx)?
            }
            Some(_) => return None,
        });
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_envelope() -> Envelope {
        Envelope::new(Reference::new("loan", "L-1001"), "mortgage", "1.2.0")
    }

    #[test]
    fn test_new_envelope_is_draft() {
        let env = make_envelope();
        assert_eq!(env.status, EnvelopeStatus::Draft);
        assert_eq!(env.payload_version, 0);
        assert!(env.payload.is_empty());
        assert!(env.id.0.starts_with("env-"));
    }

    #[test]
    fn test_status_predicates() {
        assert!(EnvelopeStatus::Draft.can_edit());
        assert!(EnvelopeStatus::Active.can_edit());
        assert!(!EnvelopeStatus::Locked.can_edit());
        assert!(!EnvelopeStatus::Settled.can_edit());

        assert!(EnvelopeStatus::Locked.can_cancel());
        assert!(!EnvelopeStatus::Cancelled.can_cancel());

        assert!(EnvelopeStatus::Settled.is_terminal());
        assert!(EnvelopeStatus::Cancelled.is_terminal());
        assert!(!EnvelopeStatus::Locked.is_terminal());
    }

    #[test]
    fn test_lifecycle_mutators_stamp_timestamps() {
        let mut env = make_envelope();
        env.activate();
        assert_eq!(env.status, EnvelopeStatus::Active);

        env.lock();
        assert_eq!(env.status, EnvelopeStatus::Locked);
        assert!(env.locked_at.is_some());

        env.settle();
        assert_eq!(env.status, EnvelopeStatus::Settled);
        assert!(env.settled_at.is_some());
    }

    #[test]
    fn test_cancel_records_reason() {
        let mut env = make_envelope();
        env.cancel(Some("Counterparty withdrew".to_string()));
        assert_eq!(env.status, EnvelopeStatus::Cancelled);
        assert!(env.cancelled_at.is_some());
        assert_eq!(env.cancel_reason.as_deref(), Some("Counterparty withdrew"));
    }

    #[test]
    fn test_signal_and_gate_truthiness() {
        let mut env = make_envelope();
        env.signals.insert("funds_confirmed".to_string(), json!(true));
        env.signals.insert("notes".to_string(), json!(""));
        env.gates.insert("lockable".to_string(), json!(false));

        assert!(env.signal_bool("funds_confirmed"));
        assert!(!env.signal_bool("notes"));
        assert!(!env.signal_bool("unknown"));
        assert!(!env.gate_bool("lockable"));
        assert!(!env.gate_bool("settleable"));
        assert_eq!(env.gate("lockable"), Some(&json!(false)));
    }

    #[test]
    fn test_resolve_pointer_nested_and_arrays() {
        let payload: serde_json::Map<String, Value> = serde_json::from_value(json!({
            "borrower": {"name": "Ada", "accounts": [{"iban": "DE44"}]},
            "amount": 125000
        }))
        .unwrap();

        assert_eq!(
            resolve_pointer(&payload, "/borrower/name"),
            Some(&json!("Ada"))
        );
        assert_eq!(
            resolve_pointer(&payload, "/borrower/accounts/0/iban"),
            Some(&json!("DE44"))
        );
        assert_eq!(resolve_pointer(&payload, "amount"), Some(&json!(125000)));
        assert_eq!(resolve_pointer(&payload, "/borrower/accounts/3"), None);
        assert_eq!(resolve_pointer(&payload, "/missing"), None);
        assert_eq!(resolve_pointer(&payload, ""), None);
    }

    #[test]
    fn test_resolve_pointer_unescapes_tokens() {
        let payload: serde_json::Map<String, Value> = serde_json::from_value(json!({
            "a/b": 1,
            "c~d": 2
        }))
        .unwrap();

        assert_eq!(resolve_pointer(&payload, "/a~1b"), Some(&json!(1)));
        assert_eq!(resolve_pointer(&payload, "/c~0d"), Some(&json!(2)));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&EnvelopeStatus::Locked).unwrap();
        assert_eq!(json, "\"locked\"");
    }
}
