//! Parser: recursive descent parser for gate expressions
//!
//! Consumes tokens from the lexer and produces an [`Expr`] tree.
//! Precedence, loosest to tightest: `||`, `&&`, `==`/`!=`, `!`.

use crate::error::{ExprError, ExprResult};
use crate::lexer::{Lexer, Token, TokenKind};

/// The reference functions an expression may call.
///
/// This is the entire whitelist: driver-authored expressions can observe
/// payload fields, signals, checklist item statuses, and previously
/// computed gates — nothing else.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefKind {
    Field,
    Signal,
    Accepted,
    Rejected,
    Missing,
    Gate,
}

impl RefKind {
    fn from_ident(ident: &str) -> Option<Self> {
        match ident {
            "field" => Some(Self::Field),
            "signal" => Some(Self::Signal),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "missing" => Some(Self::Missing),
            "gate" => Some(Self::Gate),
            _ => None,
        }
    }
}

impl std::fmt::Display for RefKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Field => write!(f, "field"),
            Self::Signal => write!(f, "signal"),
            Self::Accepted => write!(f, "accepted"),
            Self::Rejected => write!(f, "rejected"),
            Self::Missing => write!(f, "missing"),
            Self::Gate => write!(f, "gate"),
        }
    }
}

/// A parsed gate expression
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Bool(bool),
    Number(serde_json::Number),
    Str(String),
    /// A whitelisted reference call, e.g. `accepted(proof_of_address)`
    Ref { kind: RefKind, key: String },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Parse expression source text
    pub fn parse(input: &str) -> ExprResult<Expr> {
        Parser::parse(input)
    }

    /// Collect the names of all `gate(...)` references, in source order
    pub fn gate_refs(&self) -> Vec<String> {
        let mut refs = Vec::new();
        self.collect_gate_refs(&mut refs);
        refs
    }

    fn collect_gate_refs(&self, out: &mut Vec<String>) {
        match self {
            Expr::Ref {
                kind: RefKind::Gate,
                key,
            } => out.push(key.clone()),
            Expr::Not(inner) => inner.collect_gate_refs(out),
            Expr::And(a, b) | Expr::Or(a, b) | Expr::Eq(a, b) | Expr::Ne(a, b) => {
                a.collect_gate_refs(out);
                b.collect_gate_refs(out);
            }
            _ => {}
        }
    }
}

/// Parser for gate expressions
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// Parse expression input text into an [`Expr`]
    pub fn parse(input: &str) -> ExprResult<Expr> {
        let mut lexer = Lexer::new(input);
        let tokens = lexer.tokenize()?;
        let mut parser = Self { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        parser.expect(TokenKind::Eof)?;
        Ok(expr)
    }

    fn parse_or(&mut self) -> ExprResult<Expr> {
        let mut left = self.parse_and()?;
        while self.check(TokenKind::OrOr) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ExprResult<Expr> {
        let mut left = self.parse_cmp()?;
        while self.check(TokenKind::AndAnd) {
            self.advance();
            let right = self.parse_cmp()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_cmp(&mut self) -> ExprResult<Expr> {
        let left = self.parse_unary()?;

        if self.check(TokenKind::EqEq) {
            self.advance();
            let right = self.parse_unary()?;
            return Ok(Expr::Eq(Box::new(left), Box::new(right)));
        }
        if self.check(TokenKind::NotEq) {
            self.advance();
            let right = self.parse_unary()?;
            return Ok(Expr::Ne(Box::new(left), Box::new(right)));
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> ExprResult<Expr> {
        if self.check(TokenKind::Bang) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> ExprResult<Expr> {
        match self.peek_kind() {
            TokenKind::True => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            TokenKind::NumberLiteral => {
                let tok = self.advance();
                let text = tok.text.clone();
                let (line, col) = (tok.line, tok.col);
                self.parse_number(&text, line, col)
            }
            TokenKind::StringLiteral => {
                let text = self.advance().text.clone();
                Ok(Expr::Str(text))
            }
            TokenKind::OpenParen => {
                self.advance();
                let expr = self.parse_or()?;
                self.expect(TokenKind::CloseParen)?;
                Ok(expr)
            }
            TokenKind::Identifier => self.parse_ref(),
            TokenKind::Eof => Err(ExprError::UnexpectedEof("expression".into())),
            _ => {
                let tok = self.peek();
                Err(ExprError::UnexpectedToken {
                    expected: "expression".into(),
                    found: tok.text.clone(),
                })
            }
        }
    }

    fn parse_ref(&mut self) -> ExprResult<Expr> {
        let ident = self.expect(TokenKind::Identifier)?.text.clone();
        let kind = RefKind::from_ident(&ident).ok_or(ExprError::UnknownRefKind(ident))?;

        self.expect(TokenKind::OpenParen)?;
        let key = self.parse_ref_key()?;
        self.expect(TokenKind::CloseParen)?;

        Ok(Expr::Ref { kind, key })
    }

    /// A reference key is a dotted path of bare segments, or a quoted string
    fn parse_ref_key(&mut self) -> ExprResult<String> {
        if self.check(TokenKind::StringLiteral) {
            return Ok(self.advance().text.clone());
        }

        let mut key = self.expect_segment()?;
        while self.check(TokenKind::Dot) {
            self.advance();
            key.push('.');
            key.push_str(&self.expect_segment()?);
        }
        Ok(key)
    }

    fn expect_segment(&mut self) -> ExprResult<String> {
        // Numeric segments are allowed so paths can index into arrays
        if self.check(TokenKind::Identifier) || self.check(TokenKind::NumberLiteral) {
            return Ok(self.advance().text.clone());
        }
        let tok = self.peek();
        Err(ExprError::UnexpectedToken {
            expected: "path segment".into(),
            found: tok.text.clone(),
        })
    }

    fn parse_number(&self, text: &str, line: usize, col: usize) -> ExprResult<Expr> {
        let number = if text.contains('.') {
            text.parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
        } else {
            text.parse::<i64>().ok().map(serde_json::Number::from)
        };

        number.map(Expr::Number).ok_or(ExprError::ParseError {
            line,
            col,
            message: format!("'{}' is not a valid number", text),
        })
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind.clone()
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn advance(&mut self) -> &Token {
        let tok = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind) -> ExprResult<&Token> {
        if self.check(kind.clone()) {
            Ok(self.advance())
        } else if self.check(TokenKind::Eof) {
            Err(ExprError::UnexpectedEof(format!("{}", kind)))
        } else {
            let tok = self.peek();
            Err(ExprError::UnexpectedToken {
                expected: format!("{}", kind),
                found: tok.text.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literal() {
        assert_eq!(Expr::parse("true").unwrap(), Expr::Bool(true));
        assert_eq!(Expr::parse("false").unwrap(), Expr::Bool(false));
        assert_eq!(
            Expr::parse("'PH'").unwrap(),
            Expr::Str("PH".to_string())
        );
    }

    #[test]
    fn test_parse_ref_call() {
        let expr = Expr::parse("accepted(proof_of_address)").unwrap();
        assert_eq!(
            expr,
            Expr::Ref {
                kind: RefKind::Accepted,
                key: "proof_of_address".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_dotted_key() {
        let expr = Expr::parse("field(loan.tcp)").unwrap();
        assert_eq!(
            expr,
            Expr::Ref {
                kind: RefKind::Field,
                key: "loan.tcp".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_quoted_key() {
        let expr = Expr::parse("signal(\"kyc.cleared\")").unwrap();
        assert_eq!(
            expr,
            Expr::Ref {
                kind: RefKind::Signal,
                key: "kyc.cleared".to_string(),
            }
        );
    }

    #[test]
    fn test_precedence_or_binds_loosest() {
        // a || b && c  ==>  a || (b && c)
        let expr = Expr::parse("missing(a) || missing(b) && missing(c)").unwrap();
        match expr {
            Expr::Or(_, right) => assert!(matches!(*right, Expr::And(_, _))),
            other => panic!("expected Or at the root, got {:?}", other),
        }
    }

    #[test]
    fn test_parens_override_precedence() {
        let expr = Expr::parse("(missing(a) || missing(b)) && missing(c)").unwrap();
        assert!(matches!(expr, Expr::And(_, _)));
    }

    #[test]
    fn test_comparison() {
        let expr = Expr::parse("field(country) != 'PH'").unwrap();
        match expr {
            Expr::Ne(left, right) => {
                assert!(matches!(*left, Expr::Ref { .. }));
                assert_eq!(*right, Expr::Str("PH".to_string()));
            }
            other => panic!("expected Ne, got {:?}", other),
        }
    }

    #[test]
    fn test_not() {
        let expr = Expr::parse("!rejected(kyc)").unwrap();
        assert!(matches!(expr, Expr::Not(_)));
    }

    #[test]
    fn test_double_not() {
        let expr = Expr::parse("!!signal(ok)").unwrap();
        match expr {
            Expr::Not(inner) => assert!(matches!(*inner, Expr::Not(_))),
            other => panic!("expected Not, got {:?}", other),
        }
    }

    #[test]
    fn test_number_literals() {
        assert_eq!(
            Expr::parse("42").unwrap(),
            Expr::Number(serde_json::Number::from(42))
        );
        let expr = Expr::parse("3.5").unwrap();
        match expr {
            Expr::Number(n) => assert_eq!(n.as_f64(), Some(3.5)),
            other => panic!("expected number, got {:?}", other),
        }
    }

    #[test]
    fn test_gate_refs_collection() {
        let expr =
            Expr::parse("gate(docs_complete) && (gate(kyc_done) || signal(waived))").unwrap();
        assert_eq!(expr.gate_refs(), vec!["docs_complete", "kyc_done"]);
    }

    #[test]
    fn test_unknown_ref_kind() {
        let result = Expr::parse("payload(country)");
        assert!(matches!(result, Err(ExprError::UnknownRefKind(_))));
    }

    #[test]
    fn test_bare_identifier_rejected() {
        assert!(Expr::parse("country").is_err());
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        assert!(Expr::parse("true true").is_err());
    }

    #[test]
    fn test_missing_close_paren() {
        let result = Expr::parse("accepted(kyc");
        assert!(matches!(result, Err(ExprError::UnexpectedEof(_))));
    }

    #[test]
    fn test_empty_input() {
        assert!(Expr::parse("").is_err());
    }

    #[test]
    fn test_chained_comparison_rejected() {
        assert!(Expr::parse("1 == 1 == 1").is_err());
    }
}
