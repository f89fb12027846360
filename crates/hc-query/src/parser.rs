//! Where-clause lexer and recursive-descent parser.
//!
//! ```text
//! expr    := or
//! or      := and ("OR" and)*
//! and     := not ("AND" not)*
//! not     := "NOT" not | primary
//! primary := "(" expr ")" | field op literal
//! ```
//!
//! Both the nesting of `(`/`NOT` and the depth of the resulting predicate
//! tree are capped at [`MAX_DEPTH`].

use hc_types::AttrValue;

use crate::error::{QueryError, QueryResult};
use crate::predicate::{CompareOp, Predicate};

/// Deepest predicate a where-clause may produce.
pub const MAX_DEPTH: usize = 128;

fn too_deep(offset: usize) -> QueryError {
    QueryError::parse(offset, format!("predicate nested deeper than {MAX_DEPTH} levels"))
}

/// One level up the predicate tree.
fn deeper(depth: usize, offset: usize) -> QueryResult<usize> {
    if depth >= MAX_DEPTH {
        Err(too_deep(offset))
    } else {
        Ok(depth + 1)
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Field(String),
    Literal(AttrValue),
    Op(CompareOp),
    LParen,
    RParen,
    And,
    Or,
    Not,
    End,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Field(name) => format!("field `{name}`"),
            Self::Literal(value) => format!("literal {value}"),
            Self::Op(op) => format!("operator `{op}`"),
            Self::LParen => "`(`".to_string(),
            Self::RParen => "`)`".to_string(),
            Self::And => "AND".to_string(),
            Self::Or => "OR".to_string(),
            Self::Not => "NOT".to_string(),
            Self::End => "end of input".to_string(),
        }
    }
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn peek_byte(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn byte_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek_byte().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn tokenize(mut self) -> QueryResult<Vec<(Token, usize)>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let start = self.pos;
            let Some(b) = self.peek_byte() else {
                tokens.push((Token::End, start));
                return Ok(tokens);
            };
            let token = match b {
                b'(' => {
                    self.pos += 1;
                    Token::LParen
                }
                b')' => {
                    self.pos += 1;
                    Token::RParen
                }
                b'=' | b'!' | b'<' | b'>' => Token::Op(self.operator()?),
                b'\'' => Token::Literal(AttrValue::String(self.string()?)),
                b'"' => Token::Field(self.quoted_field()?),
                b'x' | b'X' if self.byte_at(1) == Some(b'\'') => {
                    Token::Literal(AttrValue::Binary(self.hex()?))
                }
                b'{' => Token::Literal(AttrValue::Timestamp(self.timestamp()?)),
                b'-' | b'0'..=b'9' => Token::Literal(self.number()?),
                b if b.is_ascii_alphabetic() || b == b'_' => self.word(),
                _ => {
                    let c = self.src[start..].chars().next().unwrap_or('?');
                    return Err(QueryError::parse(start, format!("unexpected character `{c}`")));
                }
            };
            tokens.push((token, start));
        }
    }

    fn operator(&mut self) -> QueryResult<CompareOp> {
        let start = self.pos;
        let (op, len) = match (self.byte_at(0), self.byte_at(1)) {
            (Some(b'='), _) => (CompareOp::Eq, 1),
            (Some(b'!'), Some(b'=')) => (CompareOp::Ne, 2),
            (Some(b'<'), Some(b'>')) => (CompareOp::Ne, 2),
            (Some(b'<'), Some(b'=')) => (CompareOp::Le, 2),
            (Some(b'<'), _) => (CompareOp::Lt, 1),
            (Some(b'>'), Some(b'=')) => (CompareOp::Ge, 2),
            (Some(b'>'), _) => (CompareOp::Gt, 1),
            _ => return Err(QueryError::parse(start, "expected `!=`")),
        };
        self.pos += len;
        Ok(op)
    }

    /// Body of a `'...'` string; `''` is an escaped quote.
    fn string(&mut self) -> QueryResult<String> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        loop {
            let rest = &self.src[self.pos..];
            let Some(quote) = rest.find('\'') else {
                return Err(QueryError::parse(start, "unterminated string literal"));
            };
            out.push_str(&rest[..quote]);
            self.pos += quote + 1;
            if self.peek_byte() == Some(b'\'') {
                out.push('\'');
                self.pos += 1;
            } else {
                return Ok(out);
            }
        }
    }

    fn quoted_field(&mut self) -> QueryResult<String> {
        let start = self.pos;
        self.pos += 1;
        let rest = &self.src[self.pos..];
        let Some(end) = rest.find('"') else {
            return Err(QueryError::parse(start, "unterminated quoted field"));
        };
        if end == 0 {
            return Err(QueryError::parse(start, "empty field name"));
        }
        let name = rest[..end].to_string();
        self.pos += end + 1;
        Ok(name)
    }

    fn hex(&mut self) -> QueryResult<Vec<u8>> {
        let start = self.pos;
        self.pos += 2;
        let rest = &self.src[self.pos..];
        let Some(end) = rest.find('\'') else {
            return Err(QueryError::parse(start, "unterminated binary literal"));
        };
        let bytes = hex::decode(&rest[..end])
            .map_err(|e| QueryError::parse(start, format!("invalid binary literal: {e}")))?;
        self.pos += end + 1;
        Ok(bytes)
    }

    /// `{ts <millis>}`
    fn timestamp(&mut self) -> QueryResult<u64> {
        let start = self.pos;
        self.pos += 1;
        self.skip_whitespace();
        let keyword = self.src.get(self.pos..self.pos + 2).unwrap_or("");
        if !keyword.eq_ignore_ascii_case("ts") {
            return Err(QueryError::parse(start, "expected `{ts <millis>}`"));
        }
        self.pos += 2;
        self.skip_whitespace();
        let digits = self.take_while(|b| b.is_ascii_digit());
        let millis = digits
            .parse::<u64>()
            .map_err(|_| QueryError::parse(start, "invalid timestamp literal"))?;
        self.skip_whitespace();
        if self.peek_byte() != Some(b'}') {
            return Err(QueryError::parse(self.pos, "expected `}`"));
        }
        self.pos += 1;
        Ok(millis)
    }

    fn number(&mut self) -> QueryResult<AttrValue> {
        let start = self.pos;
        if self.peek_byte() == Some(b'-') {
            self.pos += 1;
        }
        if self.take_while(|b| b.is_ascii_digit()).is_empty() {
            return Err(QueryError::parse(start, "expected digits"));
        }
        let mut decimal = false;
        if self.peek_byte() == Some(b'.') {
            decimal = true;
            self.pos += 1;
            if self.take_while(|b| b.is_ascii_digit()).is_empty() {
                return Err(QueryError::parse(start, "expected digits after `.`"));
            }
        }
        if matches!(self.peek_byte(), Some(b'e' | b'E')) {
            decimal = true;
            self.pos += 1;
            if matches!(self.peek_byte(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            if self.take_while(|b| b.is_ascii_digit()).is_empty() {
                return Err(QueryError::parse(start, "expected exponent digits"));
            }
        }

        let text = &self.src[start..self.pos];
        if decimal {
            text.parse::<f64>()
                .map(AttrValue::Double)
                .map_err(|_| QueryError::parse(start, format!("invalid number `{text}`")))
        } else {
            text.parse::<i64>()
                .map(AttrValue::Long)
                .map_err(|_| QueryError::parse(start, format!("integer out of range `{text}`")))
        }
    }

    fn word(&mut self) -> Token {
        let word = self.take_while(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.');
        match word.to_ascii_lowercase().as_str() {
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            _ => Token::Field(word.to_string()),
        }
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek_byte().is_some_and(&pred) {
            self.pos += 1;
        }
        let src = self.src;
        &src[start..self.pos]
    }
}

pub(crate) struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    nesting: usize,
}

impl Parser {
    pub(crate) fn new(input: &str) -> QueryResult<Self> {
        Ok(Self {
            tokens: Lexer::new(input).tokenize()?,
            pos: 0,
            nesting: 0,
        })
    }

    pub(crate) fn parse(mut self) -> QueryResult<Predicate> {
        let (expr, _) = self.or()?;
        match self.peek() {
            (Token::End, _) => Ok(expr),
            (token, offset) => Err(QueryError::parse(
                *offset,
                format!("unexpected {}", token.describe()),
            )),
        }
    }

    fn peek(&self) -> &(Token, usize) {
        // The token list always ends with `End`.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> (Token, usize) {
        let next = self.peek().clone();
        if next.0 != Token::End {
            self.pos += 1;
        }
        next
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek().0 == *token {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Recursion guard for `(` and `NOT`.
    fn enter(&mut self, offset: usize) -> QueryResult<()> {
        if self.nesting >= MAX_DEPTH {
            return Err(too_deep(offset));
        }
        self.nesting += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting -= 1;
    }

    // Each rule returns the predicate and its tree depth.

    fn or(&mut self) -> QueryResult<(Predicate, usize)> {
        let (mut left, mut depth) = self.and()?;
        while self.eat(&Token::Or) {
            let offset = self.peek().1;
            let (right, right_depth) = self.and()?;
            depth = deeper(depth.max(right_depth), offset)?;
            left = left.or(right);
        }
        Ok((left, depth))
    }

    fn and(&mut self) -> QueryResult<(Predicate, usize)> {
        let (mut left, mut depth) = self.not()?;
        while self.eat(&Token::And) {
            let offset = self.peek().1;
            let (right, right_depth) = self.not()?;
            depth = deeper(depth.max(right_depth), offset)?;
            left = left.and(right);
        }
        Ok((left, depth))
    }

    fn not(&mut self) -> QueryResult<(Predicate, usize)> {
        let offset = self.peek().1;
        if self.eat(&Token::Not) {
            self.enter(offset)?;
            let (inner, depth) = self.not()?;
            self.leave();
            Ok((inner.not(), deeper(depth, offset)?))
        } else {
            self.primary()
        }
    }

    fn primary(&mut self) -> QueryResult<(Predicate, usize)> {
        match self.advance() {
            (Token::LParen, offset) => {
                self.enter(offset)?;
                let expr = self.or()?;
                self.leave();
                match self.advance() {
                    (Token::RParen, _) => Ok(expr),
                    (token, offset) => Err(QueryError::parse(
                        offset,
                        format!("expected `)`, found {}", token.describe()),
                    )),
                }
            }
            (Token::Field(field), _) => {
                let op = match self.advance() {
                    (Token::Op(op), _) => op,
                    (token, offset) => {
                        return Err(QueryError::parse(
                            offset,
                            format!("expected comparison operator, found {}", token.describe()),
                        ))
                    }
                };
                match self.advance() {
                    (Token::Literal(value), _) => Ok((Predicate::Compare { field, op, value }, 1)),
                    (token, offset) => Err(QueryError::parse(
                        offset,
                        format!("expected literal, found {}", token.describe()),
                    )),
                }
            }
            (token, offset) => Err(QueryError::parse(
                offset,
                format!("expected field or `(`, found {}", token.describe()),
            )),
        }
    }
}
