//! Driver definitions: the per-deal-type schema for envelopes
//!
//! A driver configures everything an envelope checks before settlement:
//! - Checklist items (what evidence is needed)
//! - Gates (boolean conditions over payload, signals and item statuses)
//! - Signal and document type declarations
//!
//! Two representations exist. `DriverSpec` is the raw host-authored
//! document (YAML/JSON, fully serde). `Driver` is the compiled form with
//! parsed expressions and validated references. Compiled drivers are
//! immutable; to modify one, publish a new version.

use std::collections::{BTreeSet, HashMap, HashSet};

use envelope_expr::Expr;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::checklist::{ChecklistItem, ChecklistItemKind, ChecklistItemStatus, ReviewMode};
use crate::error::DriverParseError;

/// Built-in gate computed on every recompute: all required checklist
/// items accepted.
pub const GATE_LOCKABLE: &str = "lockable";
/// Built-in gate computed on every recompute: envelope status is Locked.
pub const GATE_SETTLEABLE: &str = "settleable";

// ── Raw definition (host-authored) ───────────────────────────────────

/// A raw driver definition as decoded from the host's document format
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DriverSpec {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Parent driver reference: `"driver_id"` or `"driver_id@version"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    #[serde(default)]
    pub checklist: Vec<ChecklistItemSpec>,
    #[serde(default)]
    pub gates: Vec<GateSpec>,
    #[serde(default)]
    pub signals: Vec<SignalSpec>,
    #[serde(default)]
    pub documents: Vec<DocumentTypeSpec>,
}

impl DriverSpec {
    /// Reject duplicate checklist keys and gate names.
    ///
    /// Called by `Driver::compile`, and by the registry on each member of
    /// an `extends` chain before merging (a duplicate inside one document
    /// must not masquerade as an override).
    pub fn ensure_unique_keys(&self) -> Result<(), DriverParseError> {
        let mut seen = HashSet::new();
        for item in &self.checklist {
            if !seen.insert(item.key.as_str()) {
                return Err(DriverParseError::DuplicateChecklistKey(item.key.clone()));
            }
        }
        let mut seen = HashSet::new();
        for gate in &self.gates {
            if !seen.insert(gate.name.as_str()) {
                return Err(DriverParseError::DuplicateGate(gate.name.clone()));
            }
        }
        Ok(())
    }

    /// Merge a parent definition under this one.
    ///
    /// Child entries win on key collision and keep the parent's position;
    /// parent-only entries stay in parent order, child-only entries are
    /// appended in child order. Identity fields (`id`, `version`, `title`,
    /// `description`) always come from the child.
    pub fn merge_parent(mut self, parent: DriverSpec) -> DriverSpec {
        self.checklist = merge_by_key(parent.checklist, std::mem::take(&mut self.checklist), |i| {
            &i.key
        });
        self.gates = merge_by_key(parent.gates, std::mem::take(&mut self.gates), |g| &g.name);
        self.signals = merge_by_key(parent.signals, std::mem::take(&mut self.signals), |s| &s.key);
        self.documents = merge_by_key(parent.documents, std::mem::take(&mut self.documents), |d| {
            &d.doc_type
        });
        self
    }
}

fn merge_by_key<T, F>(parent: Vec<T>, child: Vec<T>, key_of: F) -> Vec<T>
where
    F: Fn(&T) -> &str,
{
    let mut merged = parent;
    for entry in child {
        match merged
            .iter()
            .position(|existing| key_of(existing) == key_of(&entry))
        {
            Some(pos) => merged[pos] = entry,
            None => merged.push(entry),
        }
    }
    merged
}

/// Split an `extends` reference into `(driver_id, version)`
pub fn parse_extends(reference: &str) -> (&str, Option<&str>) {
    match reference.split_once('@') {
        Some((id, version)) => (id, Some(version)),
        None => (reference, None),
    }
}

/// One checklist item in a raw driver definition
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChecklistItemSpec {
    pub key: String,
    /// Display label; defaults to the key when omitted
    #[serde(default)]
    pub label: String,
    pub kind: ChecklistItemKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    /// Payload path, dotted (`a.b`) or JSON pointer (`/a/b`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_key: Option<String>,
    #[serde(default)]
    pub required: RequiredSpec,
    #[serde(default)]
    pub review: ReviewMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<FieldRuleSpec>,
}

/// `required` in a raw definition: a plain boolean or a predicate
/// expression re-evaluated on every recompute
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequiredSpec {
    Fixed(bool),
    Predicate(String),
}

impl Default for RequiredSpec {
    fn default() -> Self {
        RequiredSpec::Fixed(true)
    }
}

/// A custom gate in a raw driver definition
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GateSpec {
    pub name: String,
    /// Expression over `field/signal/accepted/rejected/missing/gate`
    pub rule: String,
}

/// Declared type of a signal value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Boolean,
    String,
    Number,
}

impl Default for SignalType {
    fn default() -> Self {
        SignalType::Boolean
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalType::Boolean => write!(f, "boolean"),
            SignalType::String => write!(f, "string"),
            SignalType::Number => write!(f, "number"),
        }
    }
}

/// A signal declared by the driver.
///
/// Declared signals are type-checked on `set_signal`; undeclared keys
/// pass through as opaque host data. Requiredness of a signal is modeled
/// by a `Signal` checklist item; the `required` flag here is host
/// metadata only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignalSpec {
    pub key: String,
    #[serde(default)]
    pub value_type: SignalType,
    /// Seeded into the envelope at creation when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
}

impl SignalSpec {
    /// Check a proposed value against the declared type
    pub fn check(&self, value: &Value) -> Result<(), String> {
        let ok = match self.value_type {
            SignalType::Boolean => value.is_boolean(),
            SignalType::String => value.is_string(),
            SignalType::Number => value.is_number(),
        };
        if ok {
            Ok(())
        } else {
            Err(format!(
                "expected a {} value, got {}",
                self.value_type,
                json_type_name(value)
            ))
        }
    }
}

/// A document type the driver accepts.
///
/// `allowed_mimes`, `max_size_mb` and `multiple` are hints for upload
/// hosts; the engine enforces doc type membership only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentTypeSpec {
    #[serde(rename = "type")]
    pub doc_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_mimes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size_mb: Option<u64>,
    #[serde(default)]
    pub multiple: bool,
}

/// Expected type of a payload field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "string"),
            FieldType::Integer => write!(f, "integer"),
            FieldType::Number => write!(f, "number"),
            FieldType::Boolean => write!(f, "boolean"),
        }
    }
}

/// Per-field validation in a raw definition (`PayloadField` items only)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldRuleSpec {
    #[serde(rename = "type")]
    pub value_type: FieldType,
    /// Numeric lower bound, or minimum character length for strings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Numeric upper bound, or maximum character length for strings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub one_of: Vec<Value>,
    /// Regex the whole value must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// Human-readable name of a JSON value's type
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ── Compiled driver ──────────────────────────────────────────────────

/// `required` compiled: fixed, or a predicate re-evaluated per recompute
#[derive(Clone, Debug)]
pub enum RequiredRule {
    Fixed(bool),
    Predicate(Expr),
}

/// A compiled field rule, pattern pre-anchored for whole-value matching
#[derive(Clone, Debug)]
pub struct FieldRule {
    pub value_type: FieldType,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub one_of: Vec<Value>,
    pub pattern: Option<regex::Regex>,
}

/// A compiled checklist item template, seeded into every new envelope
#[derive(Clone, Debug)]
pub struct ItemTemplate {
    pub key: String,
    pub label: String,
    pub kind: ChecklistItemKind,
    pub doc_type: Option<String>,
    /// Normalized JSON pointer with leading slash
    pub field: Option<String>,
    pub signal_key: Option<String>,
    pub required: RequiredRule,
    pub review_mode: ReviewMode,
    pub rule: Option<FieldRule>,
}

impl ItemTemplate {
    /// Build a fresh checklist item from this template.
    ///
    /// `required` predicates start pessimistic (true) and settle on the
    /// first recompute against the creation payload.
    pub fn instantiate(&self) -> ChecklistItem {
        ChecklistItem {
            key: self.key.clone(),
            label: self.label.clone(),
            kind: self.kind,
            doc_type: self.doc_type.clone(),
            field: self.field.clone(),
            signal_key: self.signal_key.clone(),
            required: !matches!(self.required, RequiredRule::Fixed(false)),
            review_mode: self.review_mode,
            status: ChecklistItemStatus::Missing,
            reviewed_by: None,
            reviewed_at: None,
            review_note: None,
            reviewed_value: None,
        }
    }
}

/// A compiled custom gate
#[derive(Clone, Debug)]
pub struct CompiledGate {
    pub name: String,
    pub rule: Expr,
}

/// A compiled, immutable driver
#[derive(Clone, Debug)]
pub struct Driver {
    pub id: String,
    pub version: String,
    pub title: String,
    pub description: String,
    pub checklist: Vec<ItemTemplate>,
    /// Custom gates in evaluation order: topologically sorted with
    /// declaration order preserved among independent gates
    pub gates: Vec<CompiledGate>,
    pub signals: Vec<SignalSpec>,
    pub documents: Vec<DocumentTypeSpec>,
}

impl Driver {
    /// Compile a raw definition, validating every cross-reference
    pub fn compile(spec: DriverSpec) -> Result<Driver, DriverParseError> {
        if spec.id.trim().is_empty() {
            return Err(DriverParseError::MissingField("id".to_string()));
        }
        if spec.version.trim().is_empty() {
            return Err(DriverParseError::MissingField("version".to_string()));
        }
        spec.ensure_unique_keys()?;

        let mut checklist = Vec::with_capacity(spec.checklist.len());
        for item in &spec.checklist {
            checklist.push(compile_item(item, &spec.documents)?);
        }

        let gates = compile_gates(&spec.gates)?;

        Ok(Driver {
            id: spec.id,
            version: spec.version,
            title: spec.title,
            description: spec.description,
            checklist,
            gates,
            signals: spec.signals,
            documents: spec.documents,
        })
    }

    pub fn item(&self, key: &str) -> Option<&ItemTemplate> {
        self.checklist.iter().find(|i| i.key == key)
    }

    pub fn document_type(&self, doc_type: &str) -> Option<&DocumentTypeSpec> {
        self.documents.iter().find(|d| d.doc_type == doc_type)
    }

    pub fn signal(&self, key: &str) -> Option<&SignalSpec> {
        self.signals.iter().find(|s| s.key == key)
    }

    /// An empty document registry places no restriction on doc types
    pub fn allows_doc_type(&self, doc_type: &str) -> bool {
        self.documents.is_empty() || self.document_type(doc_type).is_some()
    }
}

fn compile_item(
    item: &ChecklistItemSpec,
    documents: &[DocumentTypeSpec],
) -> Result<ItemTemplate, DriverParseError> {
    let invalid = |message: String| DriverParseError::InvalidItem {
        key: item.key.clone(),
        message,
    };

    if item.key.trim().is_empty() {
        return Err(DriverParseError::MissingField("checklist.key".to_string()));
    }

    let mut field = None;
    match item.kind {
        ChecklistItemKind::Document => {
            let doc_type = item
                .doc_type
                .as_deref()
                .ok_or_else(|| invalid("document items require doc_type".to_string()))?;
            if !documents.is_empty() && !documents.iter().any(|d| d.doc_type == doc_type) {
                return Err(invalid(format!(
                    "doc_type '{}' is not declared in documents",
                    doc_type
                )));
            }
        }
        ChecklistItemKind::PayloadField => {
            let raw = item
                .field
                .as_deref()
                .ok_or_else(|| invalid("payload_field items require field".to_string()))?;
            field = Some(normalize_pointer(raw));
        }
        ChecklistItemKind::Attestation | ChecklistItemKind::Signal => {}
    }

    if item.rule.is_some() && item.kind != ChecklistItemKind::PayloadField {
        return Err(invalid(
            "rule is only valid for payload_field items".to_string(),
        ));
    }

    let required = match &item.required {
        RequiredSpec::Fixed(value) => RequiredRule::Fixed(*value),
        RequiredSpec::Predicate(source) => {
            let expr =
                Expr::parse(source).map_err(|source| DriverParseError::Expression {
                    context: format!("checklist item '{}' required", item.key),
                    source,
                })?;
            if !expr.gate_refs().is_empty() {
                return Err(invalid(
                    "required predicates may not reference gates".to_string(),
                ));
            }
            RequiredRule::Predicate(expr)
        }
    };

    let rule = match &item.rule {
        Some(rule_spec) => Some(compile_rule(rule_spec, field.as_deref().unwrap_or(&item.key))?),
        None => None,
    };

    Ok(ItemTemplate {
        key: item.key.clone(),
        label: if item.label.is_empty() {
            item.key.clone()
        } else {
            item.label.clone()
        },
        kind: item.kind,
        doc_type: item.doc_type.clone(),
        field,
        signal_key: item.signal_key.clone(),
        required,
        review_mode: item.review,
        rule,
    })
}

fn compile_rule(spec: &FieldRuleSpec, field: &str) -> Result<FieldRule, DriverParseError> {
    let pattern = match &spec.pattern {
        // Anchor so the whole value must match
        Some(raw) => Some(regex::Regex::new(&format!("^(?:{})$", raw)).map_err(|e| {
            DriverParseError::InvalidRule {
                field: field.to_string(),
                message: e.to_string(),
            }
        })?),
        None => None,
    };

    Ok(FieldRule {
        value_type: spec.value_type,
        min: spec.min,
        max: spec.max,
        one_of: spec.one_of.clone(),
        pattern,
    })
}

/// Parse gate rules, resolve gate-to-gate references and order gates so
/// every reference points backwards.
fn compile_gates(specs: &[GateSpec]) -> Result<Vec<CompiledGate>, DriverParseError> {
    for gate in specs {
        if gate.name == GATE_LOCKABLE || gate.name == GATE_SETTLEABLE {
            return Err(DriverParseError::ReservedGate(gate.name.clone()));
        }
    }

    let mut compiled = Vec::with_capacity(specs.len());
    for gate in specs {
        let rule = Expr::parse(&gate.rule).map_err(|source| DriverParseError::Expression {
            context: format!("gate '{}'", gate.name),
            source,
        })?;
        compiled.push(CompiledGate {
            name: gate.name.clone(),
            rule,
        });
    }

    let index_of: HashMap<&str, usize> = compiled
        .iter()
        .enumerate()
        .map(|(i, g)| (g.name.as_str(), i))
        .collect();

    let n = compiled.len();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree = vec![0usize; n];
    for (i, gate) in compiled.iter().enumerate() {
        for target in gate.rule.gate_refs() {
            // Built-ins are computed before any custom gate
            if target == GATE_LOCKABLE || target == GATE_SETTLEABLE {
                continue;
            }
            match index_of.get(target.as_str()) {
                Some(&j) => {
                    dependents[j].push(i);
                    in_degree[i] += 1;
                }
                None => {
                    return Err(DriverParseError::UnknownGateReference {
                        gate: gate.name.clone(),
                        target,
                    })
                }
            }
        }
    }

    // Stable Kahn: always pick the lowest declaration index that is ready
    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(&i) = ready.iter().next() {
        ready.remove(&i);
        order.push(i);
        for &d in &dependents[i] {
            in_degree[d] -= 1;
            if in_degree[d] == 0 {
                ready.insert(d);
            }
        }
    }

    if order.len() != n {
        let stuck: Vec<&str> = (0..n)
            .filter(|i| !order.contains(i))
            .map(|i| compiled[i].name.as_str())
            .collect();
        return Err(DriverParseError::CyclicGates(stuck.join(", ")));
    }

    let mut by_position: Vec<Option<CompiledGate>> = compiled.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|i| by_position[i].take())
        .collect())
}

/// Normalize a payload path to a JSON pointer with a leading slash
fn normalize_pointer(raw: &str) -> String {
    if raw.starts_with('/') {
        raw.to_string()
    } else {
        format!("/{}", raw.replace('.', "/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_item(key: &str, doc_type: &str) -> ChecklistItemSpec {
        ChecklistItemSpec {
            key: key.to_string(),
            label: String::new(),
            kind: ChecklistItemKind::Document,
            doc_type: Some(doc_type.to_string()),
            field: None,
            signal_key: None,
            required: RequiredSpec::default(),
            review: ReviewMode::Required,
            rule: None,
        }
    }

    fn field_item(key: &str, field: &str) -> ChecklistItemSpec {
        ChecklistItemSpec {
            key: key.to_string(),
            label: String::new(),
            kind: ChecklistItemKind::PayloadField,
            doc_type: None,
            field: Some(field.to_string()),
            signal_key: None,
            required: RequiredSpec::default(),
            review: ReviewMode::None,
            rule: None,
        }
    }

    fn signal_item(key: &str) -> ChecklistItemSpec {
        ChecklistItemSpec {
            key: key.to_string(),
            label: String::new(),
            kind: ChecklistItemKind::Signal,
            doc_type: None,
            field: None,
            signal_key: None,
            required: RequiredSpec::default(),
            review: ReviewMode::None,
            rule: None,
        }
    }

    fn gate(name: &str, rule: &str) -> GateSpec {
        GateSpec {
            name: name.to_string(),
            rule: rule.to_string(),
        }
    }

    fn make_spec() -> DriverSpec {
        DriverSpec {
            id: "mortgage".to_string(),
            version: "1.0.0".to_string(),
            title: "Mortgage settlement".to_string(),
            description: String::new(),
            extends: None,
            checklist: vec![
                doc_item("kyc", "passport"),
                field_item("country", "borrower.country"),
                signal_item("funds_confirmed"),
            ],
            gates: vec![
                gate("docs_complete", "accepted(kyc)"),
                gate(
                    "ready",
                    "gate(docs_complete) && signal(funds_confirmed)",
                ),
            ],
            signals: vec![SignalSpec {
                key: "funds_confirmed".to_string(),
                value_type: SignalType::Boolean,
                default: Some(serde_json::json!(false)),
                required: false,
            }],
            documents: vec![DocumentTypeSpec {
                doc_type: "passport".to_string(),
                title: "Passport".to_string(),
                allowed_mimes: vec!["application/pdf".to_string()],
                max_size_mb: Some(10),
                multiple: false,
            }],
        }
    }

    #[test]
    fn test_compile_representative_driver() {
        let driver = Driver::compile(make_spec()).unwrap();
        assert_eq!(driver.id, "mortgage");
        assert_eq!(driver.checklist.len(), 3);
        assert_eq!(driver.gates.len(), 2);

        // Dotted field path normalized to a pointer
        let country = driver.item("country").unwrap();
        assert_eq!(country.field.as_deref(), Some("/borrower/country"));
        // Label defaults to the key
        assert_eq!(country.label, "country");

        assert!(driver.allows_doc_type("passport"));
        assert!(!driver.allows_doc_type("utility_bill"));
        assert!(driver.signal("funds_confirmed").is_some());
    }

    #[test]
    fn test_compile_missing_id_and_version() {
        let mut spec = make_spec();
        spec.id = "  ".to_string();
        assert!(matches!(
            Driver::compile(spec),
            Err(DriverParseError::MissingField(f)) if f == "id"
        ));

        let mut spec = make_spec();
        spec.version = String::new();
        assert!(matches!(
            Driver::compile(spec),
            Err(DriverParseError::MissingField(f)) if f == "version"
        ));
    }

    #[test]
    fn test_duplicate_checklist_key_rejected() {
        let mut spec = make_spec();
        spec.checklist.push(doc_item("kyc", "passport"));
        assert!(matches!(
            Driver::compile(spec),
            Err(DriverParseError::DuplicateChecklistKey(k)) if k == "kyc"
        ));
    }

    #[test]
    fn test_duplicate_gate_rejected() {
        let mut spec = make_spec();
        spec.gates.push(gate("ready", "true"));
        assert!(matches!(
            Driver::compile(spec),
            Err(DriverParseError::DuplicateGate(g)) if g == "ready"
        ));
    }

    #[test]
    fn test_reserved_gate_names_rejected() {
        let mut spec = make_spec();
        spec.gates.push(gate("lockable", "true"));
        assert!(matches!(
            Driver::compile(spec),
            Err(DriverParseError::ReservedGate(g)) if g == "lockable"
        ));
    }

    #[test]
    fn test_document_item_requires_doc_type() {
        let mut spec = make_spec();
        spec.checklist[0].doc_type = None;
        assert!(matches!(
            Driver::compile(spec),
            Err(DriverParseError::InvalidItem { key, .. }) if key == "kyc"
        ));
    }

    #[test]
    fn test_document_item_doc_type_must_be_declared() {
        let mut spec = make_spec();
        spec.checklist[0].doc_type = Some("deed".to_string());
        assert!(matches!(
            Driver::compile(spec),
            Err(DriverParseError::InvalidItem { key, .. }) if key == "kyc"
        ));
    }

    #[test]
    fn test_payload_field_item_requires_field() {
        let mut spec = make_spec();
        spec.checklist[1].field = None;
        assert!(matches!(
            Driver::compile(spec),
            Err(DriverParseError::InvalidItem { key, .. }) if key == "country"
        ));
    }

    #[test]
    fn test_rule_only_on_payload_field_items() {
        let mut spec = make_spec();
        spec.checklist[2].rule = Some(FieldRuleSpec {
            value_type: FieldType::Boolean,
            min: None,
            max: None,
            one_of: vec![],
            pattern: None,
        });
        assert!(matches!(
            Driver::compile(spec),
            Err(DriverParseError::InvalidItem { key, .. }) if key == "funds_confirmed"
        ));
    }

    #[test]
    fn test_required_predicate_compiles() {
        let mut spec = make_spec();
        spec.checklist[0].required =
            RequiredSpec::Predicate("field(country) != 'PH'".to_string());
        let driver = Driver::compile(spec).unwrap();
        assert!(matches!(
            driver.item("kyc").unwrap().required,
            RequiredRule::Predicate(_)
        ));
    }

    #[test]
    fn test_required_predicate_may_not_reference_gates() {
        let mut spec = make_spec();
        spec.checklist[0].required = RequiredSpec::Predicate("gate(ready)".to_string());
        assert!(matches!(
            Driver::compile(spec),
            Err(DriverParseError::InvalidItem { key, .. }) if key == "kyc"
        ));
    }

    #[test]
    fn test_invalid_expression_names_its_context() {
        let mut spec = make_spec();
        spec.gates[0].rule = "accepted(".to_string();
        match Driver::compile(spec) {
            Err(DriverParseError::Expression { context, .. }) => {
                assert_eq!(context, "gate 'docs_complete'");
            }
            other => panic!("expected expression error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_gate_reference_rejected() {
        let mut spec = make_spec();
        spec.gates[1].rule = "gate(nonexistent)".to_string();
        assert!(matches!(
            Driver::compile(spec),
            Err(DriverParseError::UnknownGateReference { gate, target })
                if gate == "ready" && target == "nonexistent"
        ));
    }

    #[test]
    fn test_cyclic_gates_rejected() {
        let mut spec = make_spec();
        spec.gates = vec![
            gate("a", "gate(b)"),
            gate("b", "gate(a)"),
        ];
        assert!(matches!(
            Driver::compile(spec),
            Err(DriverParseError::CyclicGates(_))
        ));
    }

    #[test]
    fn test_self_referencing_gate_is_a_cycle() {
        let mut spec = make_spec();
        spec.gates = vec![gate("a", "gate(a)")];
        assert!(matches!(
            Driver::compile(spec),
            Err(DriverParseError::CyclicGates(names)) if names == "a"
        ));
    }

    #[test]
    fn test_gates_sorted_into_dependency_order() {
        let mut spec = make_spec();
        // Declared out of order: ready depends on docs_complete
        spec.gates = vec![
            gate("ready", "gate(docs_complete) && signal(funds_confirmed)"),
            gate("docs_complete", "accepted(kyc)"),
        ];
        let driver = Driver::compile(spec).unwrap();
        let order: Vec<&str> = driver.gates.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(order, vec!["docs_complete", "ready"]);
    }

    #[test]
    fn test_independent_gates_keep_declaration_order() {
        let mut spec = make_spec();
        spec.gates = vec![
            gate("zulu", "true"),
            gate("alpha", "false"),
            gate("mike", "signal(funds_confirmed)"),
        ];
        let driver = Driver::compile(spec).unwrap();
        let order: Vec<&str> = driver.gates.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(order, vec!["zulu", "alpha", "mike"]);
    }

    #[test]
    fn test_gate_may_reference_builtins() {
        let mut spec = make_spec();
        spec.gates = vec![gate("ops_ready", "gate(lockable) && signal(funds_confirmed)")];
        let driver = Driver::compile(spec).unwrap();
        assert_eq!(driver.gates.len(), 1);
    }

    #[test]
    fn test_bad_regex_rejected() {
        let mut spec = make_spec();
        spec.checklist[1].rule = Some(FieldRuleSpec {
            value_type: FieldType::String,
            min: None,
            max: None,
            one_of: vec![],
            pattern: Some("(unclosed".to_string()),
        });
        assert!(matches!(
            Driver::compile(spec),
            Err(DriverParseError::InvalidRule { field, .. }) if field == "/borrower/country"
        ));
    }

    #[test]
    fn test_pattern_is_anchored() {
        let mut spec = make_spec();
        spec.checklist[1].rule = Some(FieldRuleSpec {
            value_type: FieldType::String,
            min: None,
            max: None,
            one_of: vec![],
            pattern: Some("[A-Z]{2}".to_string()),
        });
        let driver = Driver::compile(spec).unwrap();
        let rule = driver.item("country").unwrap().rule.as_ref().unwrap();
        let pattern = rule.pattern.as_ref().unwrap();
        assert!(pattern.is_match("US"));
        assert!(!pattern.is_match("USA"));
        assert!(!pattern.is_match("xUS"));
    }

    #[test]
    fn test_instantiate_predicate_items_start_required() {
        let mut spec = make_spec();
        spec.checklist[0].required = RequiredSpec::Predicate("missing(country)".to_string());
        spec.checklist[2].required = RequiredSpec::Fixed(false);
        let driver = Driver::compile(spec).unwrap();

        let kyc = driver.item("kyc").unwrap().instantiate();
        assert!(kyc.required);
        assert_eq!(kyc.status, ChecklistItemStatus::Missing);

        let funds = driver.item("funds_confirmed").unwrap().instantiate();
        assert!(!funds.required);
    }

    #[test]
    fn test_merge_parent_child_wins_in_place() {
        let parent = DriverSpec {
            id: "base".to_string(),
            version: "1.0.0".to_string(),
            checklist: vec![
                doc_item("kyc", "passport"),
                signal_item("funds_confirmed"),
            ],
            gates: vec![gate("docs_complete", "accepted(kyc)")],
            documents: vec![DocumentTypeSpec {
                doc_type: "passport".to_string(),
                title: "Passport".to_string(),
                allowed_mimes: vec![],
                max_size_mb: None,
                multiple: false,
            }],
            ..DriverSpec::default()
        };
        let child = DriverSpec {
            id: "mortgage".to_string(),
            version: "2.0.0".to_string(),
            checklist: vec![
                // Overrides the parent's kyc in place
                ChecklistItemSpec {
                    review: ReviewMode::Optional,
                    ..doc_item("kyc", "passport")
                },
                field_item("country", "country"),
            ],
            ..DriverSpec::default()
        };

        let merged = child.merge_parent(parent);
        assert_eq!(merged.id, "mortgage");
        assert_eq!(merged.version, "2.0.0");

        let keys: Vec<&str> = merged.checklist.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["kyc", "funds_confirmed", "country"]);
        assert_eq!(merged.checklist[0].review, ReviewMode::Optional);
        // Parent-only sections survive
        assert_eq!(merged.gates.len(), 1);
        assert_eq!(merged.documents.len(), 1);
    }

    #[test]
    fn test_parse_extends_reference() {
        assert_eq!(parse_extends("base"), ("base", None));
        assert_eq!(parse_extends("base@1.2.0"), ("base", Some("1.2.0")));
    }

    #[test]
    fn test_signal_type_check() {
        let spec = SignalSpec {
            key: "funds_confirmed".to_string(),
            value_type: SignalType::Boolean,
            default: None,
            required: false,
        };
        assert!(spec.check(&serde_json::json!(true)).is_ok());
        let err = spec.check(&serde_json::json!("yes")).unwrap_err();
        assert!(err.contains("expected a boolean"));
        assert!(err.contains("string"));
    }

    #[test]
    fn test_driver_document_decodes_from_yaml() {
        let yaml = r#"
id: mortgage
version: 1.2.0
title: Mortgage settlement
checklist:
  - key: kyc
    label: Identity check
    kind: document
    doc_type: passport
    review: required
  - key: country
    kind: payload_field
    field: borrower.country
    rule:
      type: string
      one_of: [US, GB, DE]
  - key: secondary_id
    kind: document
    doc_type: passport
    required: "field(borrower.country) != 'US'"
  - key: funds_confirmed
    kind: signal
gates:
  - name: docs_complete
    rule: accepted(kyc)
  - name: ready
    rule: gate(docs_complete) && signal(funds_confirmed)
signals:
  - key: funds_confirmed
    value_type: boolean
    default: false
documents:
  - type: passport
    title: Passport
    allowed_mimes: [application/pdf, image/png]
    max_size_mb: 10
"#;
        let spec: DriverSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.checklist.len(), 4);
        assert!(matches!(
            spec.checklist[2].required,
            RequiredSpec::Predicate(_)
        ));
        assert!(matches!(spec.checklist[0].required, RequiredSpec::Fixed(true)));

        let driver = Driver::compile(spec).unwrap();
        assert_eq!(driver.gates.len(), 2);
        assert_eq!(
            driver.item("country").unwrap().field.as_deref(),
            Some("/borrower/country")
        );
        let rule = driver.item("country").unwrap().rule.as_ref().unwrap();
        assert_eq!(rule.one_of.len(), 3);
    }
}
