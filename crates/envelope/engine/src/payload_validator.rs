//! Payload validation, merge-patch application and diffing
//!
//! Field rules come from the driver and apply per field in isolation;
//! fields without a rule pass through as opaque host data. Merge
//! semantics are JSON Merge Patch shaped: objects merge recursively,
//! scalars and arrays replace, explicit `null` removes the key.

use envelope_expr::loose_eq;
use envelope_types::driver::json_type_name;
use envelope_types::{Driver, FieldError, FieldRule, FieldType};
use serde_json::Value;

type JsonMap = serde_json::Map<String, Value>;

/// Validate a patch against the driver's field rules.
///
/// Returns the normalized patch (strings trimmed, declared coercions
/// applied) together with every rule violation found; callers need the
/// full list, so validation never short-circuits.
pub fn validate(driver: &Driver, patch: &JsonMap) -> (JsonMap, Vec<FieldError>) {
    let mut normalized = Value::Object(patch.clone());
    let mut errors = Vec::new();

    for template in &driver.checklist {
        let (Some(pointer), Some(rule)) = (template.field.as_deref(), template.rule.as_ref())
        else {
            continue;
        };
        let Some(value) = normalized.pointer_mut(pointer) else {
            continue;
        };
        // An explicit null retracts the field and is never validated
        if value.is_null() {
            continue;
        }
        match check_field(pointer, rule, value.clone()) {
            Ok(clean) => *value = clean,
            Err(error) => errors.push(error),
        }
    }

    (into_object(normalized), errors)
}

// `normalized` starts as an object and pointer writes cannot change that
fn into_object(value: Value) -> JsonMap {
    match value {
        Value::Object(map) => map,
        _ => JsonMap::new(),
    }
}

/// Check one value against one field rule, returning the normalized value
pub fn check_field(pointer: &str, rule: &FieldRule, value: Value) -> Result<Value, FieldError> {
    let value = coerce(rule.value_type, value);

    let type_ok = match rule.value_type {
        FieldType::String => value.is_string(),
        FieldType::Integer => value.as_i64().is_some() || value.as_u64().is_some(),
        FieldType::Number => value.is_number(),
        FieldType::Boolean => value.is_boolean(),
    };
    if !type_ok {
        return Err(FieldError::new(
            pointer,
            "type",
            format!(
                "expected {}, got {}",
                rule.value_type,
                json_type_name(&value)
            ),
        ));
    }

    // min/max bound the numeric value, or the character length of strings
    if rule.min.is_some() || rule.max.is_some() {
        let (measure, unit) = match &value {
            Value::String(s) => (Some(s.chars().count() as f64), " characters"),
            v => (v.as_f64(), ""),
        };
        if let Some(measure) = measure {
            if let Some(min) = rule.min {
                if measure < min {
                    return Err(FieldError::new(
                        pointer,
                        "min",
                        format!("must be at least {}{}", min, unit),
                    ));
                }
            }
            if let Some(max) = rule.max {
                if measure > max {
                    return Err(FieldError::new(
                        pointer,
                        "max",
                        format!("must be at most {}{}", max, unit),
                    ));
                }
            }
        }
    }

    if !rule.one_of.is_empty() && !rule.one_of.iter().any(|allowed| loose_eq(allowed, &value)) {
        return Err(FieldError::new(
            pointer,
            "one_of",
            format!("is not one of the {} allowed values", rule.one_of.len()),
        ));
    }

    if let Some(pattern) = &rule.pattern {
        if let Some(s) = value.as_str() {
            if !pattern.is_match(s) {
                return Err(FieldError::new(
                    pointer,
                    "pattern",
                    "does not match the required pattern",
                ));
            }
        }
    }

    Ok(value)
}

/// String inputs are trimmed; numeric and boolean strings coerce when
/// the rule expects those types. Anything else passes through untouched.
fn coerce(expected: FieldType, value: Value) -> Value {
    let raw = match value {
        Value::String(s) => s,
        other => return other,
    };

    match expected {
        FieldType::String => Value::String(raw.trim().to_string()),
        FieldType::Integer => match raw.trim().parse::<i64>() {
            Ok(n) => Value::from(n),
            Err(_) => Value::String(raw),
        },
        FieldType::Number => match raw.trim().parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            Some(n) => Value::Number(n),
            None => Value::String(raw),
        },
        FieldType::Boolean => match raw.trim() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(raw),
        },
    }
}

/// Apply a JSON merge patch: objects merge recursively, scalars and
/// arrays replace, explicit `null` removes the key.
pub fn merge_patch(target: &mut JsonMap, patch: &JsonMap) {
    for (key, patch_value) in patch {
        match patch_value {
            Value::Null => {
                target.remove(key);
            }
            Value::Object(patch_obj) => {
                let entry = target
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(JsonMap::new()));
                if !entry.is_object() {
                    *entry = Value::Object(JsonMap::new());
                }
                if let Value::Object(target_obj) = entry {
                    merge_patch(target_obj, patch_obj);
                }
            }
            other => {
                target.insert(key.clone(), other.clone());
            }
        }
    }
}

/// Field-level diff between two payload snapshots, keyed by JSON pointer:
/// `{added: {ptr: new}, removed: {ptr: old}, changed: {ptr: {from, to}}}`
pub fn compute_diff(before: &JsonMap, after: &JsonMap) -> Value {
    let mut before_flat = std::collections::BTreeMap::new();
    flatten("", before, &mut before_flat);
    let mut after_flat = std::collections::BTreeMap::new();
    flatten("", after, &mut after_flat);

    let mut added = JsonMap::new();
    let mut removed = JsonMap::new();
    let mut changed = JsonMap::new();

    for (pointer, after_value) in &after_flat {
        match before_flat.get(pointer) {
            None => {
                added.insert(pointer.clone(), after_value.clone());
            }
            Some(before_value) if before_value != after_value => {
                changed.insert(
                    pointer.clone(),
                    serde_json::json!({"from": before_value, "to": after_value}),
                );
            }
            Some(_) => {}
        }
    }
    for (pointer, before_value) in &before_flat {
        if !after_flat.contains_key(pointer) {
            removed.insert(pointer.clone(), before_value.clone());
        }
    }

    serde_json::json!({"added": added, "removed": removed, "changed": changed})
}

fn flatten(
    prefix: &str,
    map: &JsonMap,
    out: &mut std::collections::BTreeMap<String, Value>,
) {
    for (key, value) in map {
        let escaped = key.replace('~', "~0").replace('/', "~1");
        let pointer = format!("{}/{}", prefix, escaped);
        match value {
            Value::Object(obj) => flatten(&pointer, obj, out),
            other => {
                out.insert(pointer, other.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envelope_types::{ChecklistItemKind, ChecklistItemSpec, DriverSpec, FieldRuleSpec, RequiredSpec, ReviewMode};
    use proptest::prelude::*;
    use serde_json::json;

    fn ruled_item(key: &str, field: &str, rule: FieldRuleSpec) -> ChecklistItemSpec {
        ChecklistItemSpec {
            key: key.to_string(),
            label: String::new(),
            kind: ChecklistItemKind::PayloadField,
            doc_type: None,
            field: Some(field.to_string()),
            signal_key: None,
            required: RequiredSpec::default(),
            review: ReviewMode::None,
            rule: Some(rule),
        }
    }

    fn make_driver() -> Driver {
        let spec = DriverSpec {
            id: "mortgage".to_string(),
            version: "1.0.0".to_string(),
            checklist: vec![
                ruled_item(
                    "country",
                    "borrower.country",
                    FieldRuleSpec {
                        value_type: FieldType::String,
                        min: None,
                        max: None,
                        one_of: vec![json!("US"), json!("GB"), json!("DE")],
                        pattern: None,
                    },
                ),
                ruled_item(
                    "amount",
                    "amount",
                    FieldRuleSpec {
                        value_type: FieldType::Integer,
                        min: Some(1000.0),
                        max: Some(5_000_000.0),
                        one_of: vec![],
                        pattern: None,
                    },
                ),
                ruled_item(
                    "iban",
                    "iban",
                    FieldRuleSpec {
                        value_type: FieldType::String,
                        min: Some(15.0),
                        max: Some(34.0),
                        one_of: vec![],
                        pattern: Some("[A-Z]{2}[0-9A-Z]+".to_string()),
                    },
                ),
            ],
            ..DriverSpec::default()
        };
        Driver::compile(spec).unwrap()
    }

    fn obj(value: Value) -> JsonMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_validate_trims_and_coerces() {
        let driver = make_driver();
        let patch = obj(json!({
            "borrower": {"country": "  US  "},
            "amount": "250000",
            "note": "  untouched opaque field  "
        }));

        let (normalized, errors) = validate(&driver, &patch);
        assert!(errors.is_empty());
        assert_eq!(normalized["borrower"]["country"], json!("US"));
        assert_eq!(normalized["amount"], json!(250000));
        // No rule, no normalization
        assert_eq!(normalized["note"], json!("  untouched opaque field  "));
    }

    #[test]
    fn test_validate_collects_every_error() {
        let driver = make_driver();
        let patch = obj(json!({
            "borrower": {"country": "FR"},
            "amount": 50
        }));

        let (_, errors) = validate(&driver, &patch);
        assert_eq!(errors.len(), 2);
        let codes: Vec<&str> = errors.iter().map(|e| e.code.as_str()).collect();
        assert!(codes.contains(&"one_of"));
        assert!(codes.contains(&"min"));
        assert_eq!(errors[0].field, "/borrower/country");
    }

    #[test]
    fn test_validate_type_mismatch() {
        let driver = make_driver();
        let patch = obj(json!({"amount": {"nested": true}}));
        let (_, errors) = validate(&driver, &patch);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, "type");
        assert!(errors[0].message.contains("expected integer"));
    }

    #[test]
    fn test_validate_pattern_and_length() {
        let driver = make_driver();

        let (_, errors) = validate(&driver, &obj(json!({"iban": "DE44500105175407324931"})));
        assert!(errors.is_empty());

        let (_, errors) = validate(&driver, &obj(json!({"iban": "de44500105175407324931"})));
        assert_eq!(errors[0].code, "pattern");

        let (_, errors) = validate(&driver, &obj(json!({"iban": "DE44"})));
        assert_eq!(errors[0].code, "min");
        assert!(errors[0].message.contains("characters"));
    }

    #[test]
    fn test_validate_null_retraction_skips_rules() {
        let driver = make_driver();
        let patch = obj(json!({"amount": null}));
        let (normalized, errors) = validate(&driver, &patch);
        assert!(errors.is_empty());
        assert_eq!(normalized["amount"], Value::Null);
    }

    #[test]
    fn test_one_of_compares_numbers_loosely() {
        let rule = FieldRule {
            value_type: FieldType::Number,
            min: None,
            max: None,
            one_of: vec![json!(5), json!(10)],
            pattern: None,
        };
        assert!(check_field("/n", &rule, json!(5.0)).is_ok());
        assert!(check_field("/n", &rule, json!(7)).is_err());
    }

    #[test]
    fn test_boolean_coercion() {
        let rule = FieldRule {
            value_type: FieldType::Boolean,
            min: None,
            max: None,
            one_of: vec![],
            pattern: None,
        };
        assert_eq!(check_field("/b", &rule, json!("true")).unwrap(), json!(true));
        assert_eq!(
            check_field("/b", &rule, json!("false")).unwrap(),
            json!(false)
        );
        assert!(check_field("/b", &rule, json!("yes")).is_err());
    }

    #[test]
    fn test_merge_patch_semantics() {
        let mut target = obj(json!({
            "borrower": {"name": "Ada", "country": "US"},
            "amount": 1000,
            "note": "keep"
        }));
        let patch = obj(json!({
            "borrower": {"country": "GB"},
            "amount": null,
            "tags": ["a", "b"]
        }));

        merge_patch(&mut target, &patch);
        assert_eq!(target["borrower"]["name"], json!("Ada"));
        assert_eq!(target["borrower"]["country"], json!("GB"));
        assert!(!target.contains_key("amount"));
        assert_eq!(target["note"], json!("keep"));
        assert_eq!(target["tags"], json!(["a", "b"]));
    }

    #[test]
    fn test_merge_patch_replaces_scalar_with_object() {
        let mut target = obj(json!({"borrower": "plain"}));
        let patch = obj(json!({"borrower": {"name": "Ada"}}));
        merge_patch(&mut target, &patch);
        assert_eq!(target["borrower"], json!({"name": "Ada"}));
    }

    #[test]
    fn test_compute_diff() {
        let before = obj(json!({
            "borrower": {"name": "Ada", "country": "US"},
            "amount": 1000
        }));
        let after = obj(json!({
            "borrower": {"name": "Ada", "country": "GB"},
            "iban": "DE44"
        }));

        let diff = compute_diff(&before, &after);
        assert_eq!(diff["added"], json!({"/iban": "DE44"}));
        assert_eq!(diff["removed"], json!({"/amount": 1000}));
        assert_eq!(
            diff["changed"],
            json!({"/borrower/country": {"from": "US", "to": "GB"}})
        );
    }

    #[test]
    fn test_compute_diff_escapes_pointer_tokens() {
        let before = obj(json!({}));
        let after = obj(json!({"a/b": 1}));
        let diff = compute_diff(&before, &after);
        assert_eq!(diff["added"], json!({"/a~1b": 1}));
    }

    fn scalar_strategy() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|n| json!(n)),
            "[a-z]{0,6}".prop_map(Value::String),
        ]
    }

    fn flat_map_strategy() -> impl Strategy<Value = JsonMap> {
        prop::collection::btree_map("[a-e]", scalar_strategy(), 0..5)
            .prop_map(|m| m.into_iter().collect())
    }

    proptest! {
        #[test]
        fn property_merge_patch_applies_every_key(
            base in flat_map_strategy(),
            patch in flat_map_strategy(),
        ) {
            let mut merged = base.clone();
            merge_patch(&mut merged, &patch);

            for (key, value) in &patch {
                match value {
                    Value::Null => prop_assert!(!merged.contains_key(key)),
                    other => prop_assert_eq!(merged.get(key), Some(other)),
                }
            }
            for (key, value) in &base {
                if !patch.contains_key(key) {
                    prop_assert_eq!(merged.get(key), Some(value));
                }
            }
        }

        #[test]
        fn property_diff_of_identical_maps_is_empty(map in flat_map_strategy()) {
            let diff = compute_diff(&map, &map);
            prop_assert_eq!(&diff["added"], &json!({}));
            prop_assert_eq!(&diff["removed"], &json!({}));
            prop_assert_eq!(&diff["changed"], &json!({}));
        }
    }
}
