//! Lexer: tokenizes gate expression input
//!
//! Produces a stream of tokens that the parser consumes.
//! Handles the boolean operators, comparison operators, literals,
//! reference calls such as `accepted(key)`, and parentheses.

use crate::error::{ExprError, ExprResult};

/// A token produced by the lexer
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// The raw text of the token
    pub text: String,
    /// Line number (1-based)
    pub line: usize,
    /// Column number (1-based)
    pub col: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
            col,
        }
    }
}

/// Token types
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenKind {
    // Keywords
    True,
    False,

    // Identifiers and literals
    Identifier,
    StringLiteral,
    NumberLiteral,

    // Operators
    AndAnd,   // &&
    OrOr,     // ||
    EqEq,     // ==
    NotEq,    // !=
    Bang,     // !

    // Structural
    OpenParen,
    CloseParen,
    Dot,

    // End of input
    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "true"),
            Self::False => write!(f, "false"),
            Self::Identifier => write!(f, "identifier"),
            Self::StringLiteral => write!(f, "string literal"),
            Self::NumberLiteral => write!(f, "number"),
            Self::AndAnd => write!(f, "&&"),
            Self::OrOr => write!(f, "||"),
            Self::EqEq => write!(f, "=="),
            Self::NotEq => write!(f, "!="),
            Self::Bang => write!(f, "!"),
            Self::OpenParen => write!(f, "("),
            Self::CloseParen => write!(f, ")"),
            Self::Dot => write!(f, "."),
            Self::Eof => write!(f, "end of input"),
        }
    }
}

/// Lexer for gate expressions
pub struct Lexer {
    input: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    /// Create a new lexer from input text
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    /// Tokenize the entire input
    pub fn tokenize(&mut self) -> ExprResult<Vec<Token>> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace_and_comments();

            if self.pos >= self.input.len() {
                tokens.push(Token::new(TokenKind::Eof, "", self.line, self.col));
                break;
            }

            let token = self.next_token()?;
            tokens.push(token);
        }

        Ok(tokens)
    }

    fn next_token(&mut self) -> ExprResult<Token> {
        let ch = self.input[self.pos];
        let line = self.line;
        let col = self.col;

        match ch {
            '(' => {
                self.advance();
                Ok(Token::new(TokenKind::OpenParen, "(", line, col))
            }
            ')' => {
                self.advance();
                Ok(Token::new(TokenKind::CloseParen, ")", line, col))
            }
            '.' => {
                self.advance();
                Ok(Token::new(TokenKind::Dot, ".", line, col))
            }
            '&' if self.peek_at(1) == Some('&') => {
                self.advance();
                self.advance();
                Ok(Token::new(TokenKind::AndAnd, "&&", line, col))
            }
            '|' if self.peek_at(1) == Some('|') => {
                self.advance();
                self.advance();
                Ok(Token::new(TokenKind::OrOr, "||", line, col))
            }
            '=' if self.peek_at(1) == Some('=') => {
                self.advance();
                self.advance();
                Ok(Token::new(TokenKind::EqEq, "==", line, col))
            }
            '!' if self.peek_at(1) == Some('=') => {
                self.advance();
                self.advance();
                Ok(Token::new(TokenKind::NotEq, "!=", line, col))
            }
            '!' => {
                self.advance();
                Ok(Token::new(TokenKind::Bang, "!", line, col))
            }
            '"' | '\'' => self.read_string_literal(ch),
            c if c.is_ascii_digit() => self.read_number(),
            c if c.is_ascii_alphabetic() || c == '_' => self.read_identifier_or_keyword(),
            _ => Err(ExprError::ParseError {
                line,
                col,
                message: format!("Unexpected character: '{}'", ch),
            }),
        }
    }

    fn read_string_literal(&mut self, quote: char) -> ExprResult<Token> {
        let line = self.line;
        let col = self.col;
        self.advance(); // skip opening quote

        let mut text = String::new();
        while self.pos < self.input.len() && self.input[self.pos] != quote {
            if self.input[self.pos] == '\\' {
                match self.peek_at(1) {
                    Some(c) if c == quote => {
                        self.advance();
                        text.push(quote);
                    }
                    Some('\\') => {
                        self.advance();
                        text.push('\\');
                    }
                    Some('n') => {
                        self.advance();
                        text.push('\n');
                    }
                    Some('t') => {
                        self.advance();
                        text.push('\t');
                    }
                    _ => text.push('\\'),
                }
            } else {
                text.push(self.input[self.pos]);
            }
            self.advance();
        }

        if self.pos >= self.input.len() {
            return Err(ExprError::ParseError {
                line,
                col,
                message: "Unterminated string literal".into(),
            });
        }

        self.advance(); // skip closing quote
        Ok(Token::new(TokenKind::StringLiteral, text, line, col))
    }

    fn read_number(&mut self) -> ExprResult<Token> {
        let line = self.line;
        let col = self.col;
        let mut text = String::new();

        while self.pos < self.input.len() && self.input[self.pos].is_ascii_digit() {
            text.push(self.input[self.pos]);
            self.advance();
        }

        // Fractional part only when a digit follows the dot, so a dotted
        // reference path after a number stays two tokens.
        if self.pos < self.input.len()
            && self.input[self.pos] == '.'
            && self.peek_at(1).map(|c| c.is_ascii_digit()).unwrap_or(false)
        {
            text.push('.');
            self.advance();
            while self.pos < self.input.len() && self.input[self.pos].is_ascii_digit() {
                text.push(self.input[self.pos]);
                self.advance();
            }
        }

        Ok(Token::new(TokenKind::NumberLiteral, text, line, col))
    }

    fn read_identifier_or_keyword(&mut self) -> ExprResult<Token> {
        let line = self.line;
        let col = self.col;
        let mut text = String::new();

        while self.pos < self.input.len()
            && (self.input[self.pos].is_ascii_alphanumeric() || self.input[self.pos] == '_')
        {
            text.push(self.input[self.pos]);
            self.advance();
        }

        let kind = match text.as_str() {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            _ => TokenKind::Identifier,
        };

        Ok(Token::new(kind, text, line, col))
    }

    fn skip_whitespace_and_comments(&mut self) {
        while self.pos < self.input.len() {
            let ch = self.input[self.pos];
            if ch.is_whitespace() {
                self.advance();
            } else if ch == '#' || (ch == '/' && self.peek_at(1) == Some('/')) {
                // Line comment
                while self.pos < self.input.len() && self.input[self.pos] != '\n' {
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    fn advance(&mut self) {
        if self.pos < self.input.len() {
            if self.input[self.pos] == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
            self.pos += 1;
        }
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).copied()
    }
}
