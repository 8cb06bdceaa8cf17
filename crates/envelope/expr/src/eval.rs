//! Evaluator: resolves gate expressions against a read-only snapshot
//!
//! Evaluation is deterministic and side-effect-free. The context only
//! answers lookups; identical inputs always produce identical output,
//! which is what makes gate recomputation replayable.

use serde_json::Value;

use crate::error::{ExprError, ExprResult};
use crate::parser::{Expr, RefKind};

/// Read-only resolution of whitelisted references.
///
/// Implementors decide what an absent key means. The engine resolves
/// absent payload fields and signals to `Value::Null`, while undeclared
/// checklist items and gates are errors that the caller maps to its
/// fail-closed policy.
pub trait EvalContext {
    fn resolve(&self, kind: RefKind, key: &str) -> ExprResult<Value>;
}

impl Expr {
    /// Evaluate the expression against a context.
    ///
    /// Logical operators (`&&`, `||`, `!`) and comparisons always yield
    /// booleans; a bare reference or literal yields its resolved value,
    /// which is how drivers declare enum-valued gates.
    pub fn evaluate(&self, ctx: &dyn EvalContext) -> ExprResult<Value> {
        match self {
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Number(n) => Ok(Value::Number(n.clone())),
            Expr::Str(s) => Ok(Value::String(s.clone())),
            Expr::Ref { kind, key } => ctx.resolve(*kind, key),
            Expr::Not(inner) => Ok(Value::Bool(!truthy(&inner.evaluate(ctx)?))),
            Expr::And(a, b) => {
                if !truthy(&a.evaluate(ctx)?) {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(truthy(&b.evaluate(ctx)?)))
            }
            Expr::Or(a, b) => {
                if truthy(&a.evaluate(ctx)?) {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(truthy(&b.evaluate(ctx)?)))
            }
            Expr::Eq(a, b) => Ok(Value::Bool(loose_eq(
                &a.evaluate(ctx)?,
                &b.evaluate(ctx)?,
            ))),
            Expr::Ne(a, b) => Ok(Value::Bool(!loose_eq(
                &a.evaluate(ctx)?,
                &b.evaluate(ctx)?,
            ))),
        }
    }
}

/// Truthiness of a resolved value: `null`, `false`, zero, the empty string,
/// and empty collections are false; everything else is true.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Loose equality: numbers compare numerically (5 equals 5.0), everything
/// else must match in type and content. Mismatched types are not equal.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(xf), Some(yf)) => xf == yf,
            _ => x == y,
        },
        _ => a == b,
    }
}
