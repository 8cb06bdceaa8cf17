//! Gate evaluation over an envelope snapshot
//!
//! Gates are pure: identical snapshots yield identical results. The two
//! built-ins are always computed first; driver gates follow in compiled
//! order and may reference gates computed before them. Unknown
//! references fail closed — the gate records `false` and a warning is
//! surfaced instead of the mutation failing.

use std::collections::BTreeMap;

use envelope_expr::{truthy, EvalContext, Expr, ExprError, ExprResult, RefKind};
use envelope_types::{
    resolve_pointer, ChecklistItem, ChecklistItemStatus, Driver, EnvelopeStatus, GATE_LOCKABLE,
    GATE_SETTLEABLE,
};
use serde_json::Value;

/// Read-only snapshot a recompute evaluates against
pub struct EnvelopeView<'a> {
    pub payload: &'a serde_json::Map<String, Value>,
    pub signals: &'a BTreeMap<String, Value>,
    pub items: &'a [ChecklistItem],
    pub status: EnvelopeStatus,
}

impl EnvelopeView<'_> {
    /// Resolve a dotted expression key against the payload; absent → null
    pub fn field(&self, key: &str) -> Value {
        let pointer = if key.starts_with('/') {
            key.to_string()
        } else {
            format!("/{}", key.replace('.', "/"))
        };
        resolve_pointer(self.payload, &pointer)
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Resolve a signal; absent → null
    pub fn signal(&self, key: &str) -> Value {
        self.signals.get(key).cloned().unwrap_or(Value::Null)
    }

    pub fn item_status(&self, key: &str) -> Option<ChecklistItemStatus> {
        self.items.iter().find(|i| i.key == key).map(|i| i.status)
    }
}

/// Expression resolution scope: the snapshot plus gates computed so far
struct GateScope<'a> {
    view: &'a EnvelopeView<'a>,
    computed: &'a BTreeMap<String, Value>,
}

impl GateScope<'_> {
    fn item_bool(&self, key: &str, status: ChecklistItemStatus) -> ExprResult<Value> {
        match self.view.item_status(key) {
            Some(current) => Ok(Value::Bool(current == status)),
            None => Err(ExprError::UnknownItem(key.to_string())),
        }
    }
}

impl EvalContext for GateScope<'_> {
    fn resolve(&self, kind: RefKind, key: &str) -> ExprResult<Value> {
        match kind {
            RefKind::Field => Ok(self.view.field(key)),
            RefKind::Signal => Ok(self.view.signal(key)),
            RefKind::Accepted => self.item_bool(key, ChecklistItemStatus::Accepted),
            RefKind::Rejected => self.item_bool(key, ChecklistItemStatus::Rejected),
            RefKind::Missing => self.item_bool(key, ChecklistItemStatus::Missing),
            RefKind::Gate => self
                .computed
                .get(key)
                .cloned()
                .ok_or_else(|| ExprError::UnknownGate(key.to_string())),
        }
    }
}

/// A non-fatal evaluation problem, surfaced on the audit trail instead
/// of failing the mutation
#[derive(Clone, Debug, PartialEq)]
pub struct GateWarning {
    /// Gate name, or checklist item key for required-predicate failures
    pub gate: String,
    pub message: String,
}

/// Outcome of one full gate pass
#[derive(Clone, Debug, Default)]
pub struct GateReport {
    /// Every gate's value, built-ins included
    pub gates: BTreeMap<String, Value>,
    pub warnings: Vec<GateWarning>,
}

/// Evaluates the built-in and driver gates against a snapshot
#[derive(Clone, Debug, Default)]
pub struct GateEvaluator;

impl GateEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, driver: &Driver, view: &EnvelopeView<'_>) -> GateReport {
        let mut report = GateReport::default();

        // Built-ins first so driver gates may reference them
        let lockable = view
            .items
            .iter()
            .filter(|i| i.required)
            .all(|i| i.status.is_accepted());
        report
            .gates
            .insert(GATE_LOCKABLE.to_string(), Value::Bool(lockable));
        report.gates.insert(
            GATE_SETTLEABLE.to_string(),
            Value::Bool(view.status == EnvelopeStatus::Locked),
        );

        for gate in &driver.gates {
            let scope = GateScope {
                view,
                computed: &report.gates,
            };
            let value = match gate.rule.evaluate(&scope) {
                Ok(value) => value,
                Err(err) => {
                    report.warnings.push(GateWarning {
                        gate: gate.name.clone(),
                        message: err.to_string(),
                    });
                    Value::Bool(false)
                }
            };
            report.gates.insert(gate.name.clone(), value);
        }

        report
    }
}

/// Evaluate a requirement predicate against the snapshot.
///
/// Gate references are never in scope for predicates; requiredness is
/// settled before any gate runs.
pub fn evaluate_predicate(expr: &Expr, view: &EnvelopeView<'_>) -> ExprResult<bool> {
    let no_gates = BTreeMap::new();
    let scope = GateScope {
        view,
        computed: &no_gates,
    };
    expr.evaluate(&scope).map(|v| truthy(&v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use envelope_types::{ChecklistItemKind, DriverSpec, GateSpec};
    use serde_json::json;

    fn make_item(key: &str, status: ChecklistItemStatus, required: bool) -> ChecklistItem {
        let mut item = ChecklistItem::new(key, key, ChecklistItemKind::Document);
        item.status = status;
        item.required = required;
        item
    }

    fn make_driver(gates: Vec<(&str, &str)>) -> Driver {
        let spec = DriverSpec {
            id: "mortgage".to_string(),
            version: "1.0.0".to_string(),
            gates: gates
                .into_iter()
                .map(|(name, rule)| GateSpec {
                    name: name.to_string(),
                    rule: rule.to_string(),
                })
                .collect(),
            ..DriverSpec::default()
        };
        Driver::compile(spec).unwrap()
    }

    struct Fixture {
        payload: serde_json::Map<String, Value>,
        signals: BTreeMap<String, Value>,
        items: Vec<ChecklistItem>,
        status: EnvelopeStatus,
    }

    impl Fixture {
        fn new() -> Self {
            let payload = match json!({"borrower": {"country": "US"}, "amount": 5000}) {
                Value::Object(map) => map,
                _ => unreachable!(),
            };
            let mut signals = BTreeMap::new();
            signals.insert("funds_confirmed".to_string(), json!(true));

            Self {
                payload,
                signals,
                items: vec![
                    make_item("kyc", ChecklistItemStatus::Accepted, true),
                    make_item("proof_of_address", ChecklistItemStatus::Missing, true),
                    make_item("extra", ChecklistItemStatus::Missing, false),
                ],
                status: EnvelopeStatus::Active,
            }
        }

        fn view(&self) -> EnvelopeView<'_> {
            EnvelopeView {
                payload: &self.payload,
                signals: &self.signals,
                items: &self.items,
                status: self.status,
            }
        }
    }

    #[test]
    fn test_builtin_lockable_tracks_required_items() {
        let evaluator = GateEvaluator::new();
        let mut fixture = Fixture::new();
        let driver = make_driver(vec![]);

        let report = evaluator.evaluate(&driver, &fixture.view());
        assert_eq!(report.gates["lockable"], json!(false));

        fixture.items[1].status = ChecklistItemStatus::Accepted;
        let report = evaluator.evaluate(&driver, &fixture.view());
        // Optional "extra" stays missing but does not block
        assert_eq!(report.gates["lockable"], json!(true));
    }

    #[test]
    fn test_builtin_settleable_is_a_pure_status_check() {
        let evaluator = GateEvaluator::new();
        let mut fixture = Fixture::new();
        let driver = make_driver(vec![]);

        let report = evaluator.evaluate(&driver, &fixture.view());
        assert_eq!(report.gates["settleable"], json!(false));

        fixture.status = EnvelopeStatus::Locked;
        let report = evaluator.evaluate(&driver, &fixture.view());
        assert_eq!(report.gates["settleable"], json!(true));
    }

    #[test]
    fn test_custom_gates_see_earlier_gates() {
        let evaluator = GateEvaluator::new();
        let fixture = Fixture::new();
        let driver = make_driver(vec![
            ("kyc_done", "accepted(kyc)"),
            ("ready", "gate(kyc_done) && signal(funds_confirmed)"),
        ]);

        let report = evaluator.evaluate(&driver, &fixture.view());
        assert_eq!(report.gates["kyc_done"], json!(true));
        assert_eq!(report.gates["ready"], json!(true));
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_bare_reference_gate_stores_raw_value() {
        let evaluator = GateEvaluator::new();
        let fixture = Fixture::new();
        let driver = make_driver(vec![("region", "field(borrower.country)")]);

        let report = evaluator.evaluate(&driver, &fixture.view());
        assert_eq!(report.gates["region"], json!("US"));
    }

    #[test]
    fn test_unknown_item_fails_closed_with_warning() {
        let evaluator = GateEvaluator::new();
        let fixture = Fixture::new();
        let driver = make_driver(vec![("bad", "accepted(kyb)")]);

        let report = evaluator.evaluate(&driver, &fixture.view());
        assert_eq!(report.gates["bad"], json!(false));
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].gate, "bad");
        assert!(report.warnings[0].message.contains("kyb"));
    }

    #[test]
    fn test_short_circuit_skips_bad_reference() {
        let evaluator = GateEvaluator::new();
        let fixture = Fixture::new();
        let driver = make_driver(vec![("guarded", "missing(kyc) && accepted(kyb)")]);

        // missing(kyc) is false, so accepted(kyb) is never resolved
        let report = evaluator.evaluate(&driver, &fixture.view());
        assert_eq!(report.gates["guarded"], json!(false));
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_absent_field_and_signal_resolve_to_null() {
        let evaluator = GateEvaluator::new();
        let fixture = Fixture::new();
        let driver = make_driver(vec![
            ("has_iban", "field(iban)"),
            ("waived", "signal(waiver)"),
        ]);

        let report = evaluator.evaluate(&driver, &fixture.view());
        assert_eq!(report.gates["has_iban"], Value::Null);
        assert_eq!(report.gates["waived"], Value::Null);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let evaluator = GateEvaluator::new();
        let fixture = Fixture::new();
        let driver = make_driver(vec![
            ("kyc_done", "accepted(kyc)"),
            ("ready", "gate(kyc_done) && field(amount) == 5000"),
        ]);

        let first = evaluator.evaluate(&driver, &fixture.view());
        let second = evaluator.evaluate(&driver, &fixture.view());
        assert_eq!(first.gates, second.gates);
    }

    #[test]
    fn test_predicate_has_no_gate_scope() {
        let fixture = Fixture::new();

        let expr = Expr::parse("field(borrower.country) != 'PH'").unwrap();
        assert!(evaluate_predicate(&expr, &fixture.view()).unwrap());

        let expr = Expr::parse("gate(anything)").unwrap();
        assert!(evaluate_predicate(&expr, &fixture.view()).is_err());
    }
}
