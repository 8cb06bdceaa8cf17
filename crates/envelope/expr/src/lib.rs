//! Gate expression language for settlement envelopes
//!
//! Drivers declare gates and requirement predicates as small boolean
//! expressions over a closed reference whitelist:
//!
//! - `field(name)` — a payload field (dotted paths reach into the tree)
//! - `signal(key)` — an explicitly set signal
//! - `accepted(key)` / `rejected(key)` / `missing(key)` — checklist item status
//! - `gate(name)` — a previously computed gate of the same driver
//!
//! combined with `&&`, `||`, `!`, `==`, `!=`, literals, and parentheses.
//! Expressions never execute host code and never mutate anything, so gate
//! recomputation is pure, deterministic, and safe to run on untrusted
//! driver definitions.
//!
//! ```rust
//! use envelope_expr::Expr;
//!
//! let expr = Expr::parse("accepted(proof_of_address) && field(country) != 'PH'").unwrap();
//! assert_eq!(expr.gate_refs().len(), 0);
//! ```

#![deny(unsafe_code)]

pub mod error;
pub mod eval;
pub mod lexer;
pub mod parser;

// Re-export main types
pub use error::{ExprError, ExprResult};
pub use eval::{loose_eq, truthy, EvalContext};
pub use lexer::{Lexer, Token, TokenKind};
pub use parser::{Expr, Parser, RefKind};
