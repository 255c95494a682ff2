//! Automatic answer evaluation
//!
//! The traverser asks an [`AutomaticAnswerEvaluator`] for every entry under
//! the cursor that carries an automatic-answer expression, and for every
//! child-scope gate. A `None` result is never an error: the entry is simply
//! presented for manual input, or the gate stays closed.
//!
//! [`ExpressionEvaluator`] is the default implementation. It parses a small
//! expression language into a tagged [`Expr`] tree and evaluates it against
//! the ledger and the level context. It has no side effects.
//!
//! ```text
//! expr    := or
//! or      := and ( "||" and )*
//! and     := cmp ( "&&" cmp )*
//! cmp     := unary ( ( "==" | "!=" ) unary )?
//! unary   := "!" unary | primary
//! primary := string | integer | "true" | "false"
//!          | "context." key | entry_id | "(" expr ")"
//! ```

use async_trait::async_trait;
use thiserror::Error;
use traversal_types::{EntryId, FeedbackLedger, LevelContext, Value};

/// Boundary queried for automatic answers and gate predicates
#[async_trait]
pub trait AutomaticAnswerEvaluator: Send + Sync {
    /// Evaluate an expression. A missing reference, a type mismatch or an
    /// evaluator failure all produce `None`.
    async fn evaluate(
        &self,
        expression: &str,
        ledger: &FeedbackLedger,
        context: &LevelContext,
    ) -> Option<Value>;
}

// ── Expression Tree ──────────────────────────────────────────────────

/// Parse failures for the expression language
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("Unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("Unterminated string literal")]
    UnterminatedString,

    #[error("Integer literal out of range")]
    IntegerOverflow,

    #[error("Unexpected token: {0}")]
    UnexpectedToken(String),

    #[error("Unexpected end of expression")]
    UnexpectedEnd,
}

/// Parsed expression
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    Literal(Value),
    /// Current answer for an entry, falling back to the context key of the
    /// same name
    Answer(EntryId),
    Context(String),
    Not(Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let tokens = Lexer::new(source).tokenize()?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        match parser.peek() {
            None => Ok(expr),
            Some(tok) => Err(ExprError::UnexpectedToken(tok.describe())),
        }
    }

    /// Evaluate against the ledger and context
    pub fn eval(&self, ledger: &FeedbackLedger, context: &LevelContext) -> Option<Value> {
        match self {
            Expr::Literal(v) => Some(v.clone()),
            Expr::Answer(id) => ledger
                .current_answer(id)
                .map(|f| f.answer().clone())
                .or_else(|| context.get(id.as_str()).cloned()),
            Expr::Context(key) => context.get(key).cloned(),
            Expr::Not(inner) => inner
                .eval(ledger, context)?
                .as_bool()
                .map(|b| Value::Boolean(!b)),
            Expr::Eq(l, r) => compare(l, r, ledger, context).map(Value::Boolean),
            Expr::Ne(l, r) => compare(l, r, ledger, context).map(|eq| Value::Boolean(!eq)),
            Expr::And(l, r) => {
                if !l.eval(ledger, context)?.as_bool()? {
                    return Some(Value::Boolean(false));
                }
                r.eval(ledger, context)?.as_bool().map(Value::Boolean)
            }
            Expr::Or(l, r) => {
                if l.eval(ledger, context)?.as_bool()? {
                    return Some(Value::Boolean(true));
                }
                r.eval(ledger, context)?.as_bool().map(Value::Boolean)
            }
        }
    }
}

/// Equality over same-typed literals. Secrets never compare.
fn compare(
    l: &Expr,
    r: &Expr,
    ledger: &FeedbackLedger,
    context: &LevelContext,
) -> Option<bool> {
    let l = l.eval(ledger, context)?;
    let r = r.eval(ledger, context)?;
    match (&l, &r) {
        (Value::Secret { .. }, _) | (_, Value::Secret { .. }) => None,
        _ if l.type_name() == r.type_name() => Some(l == r),
        _ => None,
    }
}

// ── Lexer ────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    EqEq,
    NotEq,
    Bang,
    AndAnd,
    OrOr,
    OpenParen,
    CloseParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(s) => format!("identifier '{}'", s),
            Token::Str(_) => "string literal".into(),
            Token::Int(_) => "integer literal".into(),
            Token::EqEq => "'=='".into(),
            Token::NotEq => "'!='".into(),
            Token::Bang => "'!'".into(),
            Token::AndAnd => "'&&'".into(),
            Token::OrOr => "'||'".into(),
            Token::OpenParen => "'('".into(),
            Token::CloseParen => "')'".into(),
        }
    }
}

struct Lexer {
    input: Vec<char>,
    pos: usize,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            input: source.chars().collect(),
            pos: 0,
        }
    }

    fn tokenize(&mut self) -> Result<Vec<Token>, ExprError> {
        let mut tokens = Vec::new();
        while let Some(ch) = self.peek() {
            match ch {
                c if c.is_whitespace() => self.pos += 1,
                '(' => {
                    self.pos += 1;
                    tokens.push(Token::OpenParen);
                }
                ')' => {
                    self.pos += 1;
                    tokens.push(Token::CloseParen);
                }
                '=' => tokens.push(self.pair('=', Token::EqEq)?),
                '&' => tokens.push(self.pair('&', Token::AndAnd)?),
                '|' => tokens.push(self.pair('|', Token::OrOr)?),
                '!' => {
                    self.pos += 1;
                    if self.peek() == Some('=') {
                        self.pos += 1;
                        tokens.push(Token::NotEq);
                    } else {
                        tokens.push(Token::Bang);
                    }
                }
                '"' | '\'' => tokens.push(self.string(ch)?),
                c if c.is_ascii_digit() || c == '-' => tokens.push(self.integer()?),
                c if is_ident_start(c) => tokens.push(self.identifier()),
                other => {
                    return Err(ExprError::UnexpectedChar {
                        ch: other,
                        offset: self.pos,
                    })
                }
            }
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    /// Two-character operator whose characters are identical
    fn pair(&mut self, ch: char, token: Token) -> Result<Token, ExprError> {
        if self.input.get(self.pos + 1) == Some(&ch) {
            self.pos += 2;
            Ok(token)
        } else {
            Err(ExprError::UnexpectedChar {
                ch,
                offset: self.pos,
            })
        }
    }

    fn string(&mut self, quote: char) -> Result<Token, ExprError> {
        self.pos += 1;
        let mut out = String::new();
        while let Some(ch) = self.peek() {
            self.pos += 1;
            match ch {
                c if c == quote => return Ok(Token::Str(out)),
                '\\' => {
                    let escaped = self.peek().ok_or(ExprError::UnterminatedString)?;
                    self.pos += 1;
                    out.push(escaped);
                }
                c => out.push(c),
            }
        }
        Err(ExprError::UnterminatedString)
    }

    fn integer(&mut self) -> Result<Token, ExprError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let text: String = self.input[start..self.pos].iter().collect();
        if text == "-" {
            return Err(ExprError::UnexpectedChar {
                ch: '-',
                offset: start,
            });
        }
        text.parse()
            .map(Token::Int)
            .map_err(|_| ExprError::IntegerOverflow)
    }

    fn identifier(&mut self) -> Token {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_continue) {
            self.pos += 1;
        }
        Token::Ident(self.input[start..self.pos].iter().collect())
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

// ── Parser ───────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::OrOr) {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_cmp()?;
        while self.eat(&Token::AndAnd) {
            let right = self.parse_cmp()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_cmp(&mut self) -> Result<Expr, ExprError> {
        let left = self.parse_unary()?;
        if self.eat(&Token::EqEq) {
            let right = self.parse_unary()?;
            return Ok(Expr::Eq(Box::new(left), Box::new(right)));
        }
        if self.eat(&Token::NotEq) {
            let right = self.parse_unary()?;
            return Ok(Expr::Ne(Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Bang) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        match self.next().ok_or(ExprError::UnexpectedEnd)? {
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Int(i) => Ok(Expr::Literal(Value::Integer(i))),
            Token::Ident(name) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Boolean(true)),
                "false" => Expr::Literal(Value::Boolean(false)),
                other => match other.strip_prefix("context.") {
                    Some(key) if !key.is_empty() => Expr::Context(key.to_string()),
                    _ => Expr::Answer(EntryId::new(other)),
                },
            }),
            Token::OpenParen => {
                let inner = self.parse_or()?;
                if self.eat(&Token::CloseParen) {
                    Ok(inner)
                } else {
                    Err(self
                        .peek()
                        .map(|t| ExprError::UnexpectedToken(t.describe()))
                        .unwrap_or(ExprError::UnexpectedEnd))
                }
            }
            other => Err(ExprError::UnexpectedToken(other.describe())),
        }
    }
}

// ── Default Evaluator ────────────────────────────────────────────────

/// Evaluates the built-in expression language
#[derive(Clone, Debug, Default)]
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AutomaticAnswerEvaluator for ExpressionEvaluator {
    async fn evaluate(
        &self,
        expression: &str,
        ledger: &FeedbackLedger,
        context: &LevelContext,
    ) -> Option<Value> {
        match Expr::parse(expression) {
            Ok(expr) => expr.eval(ledger, context),
            Err(err) => {
                tracing::debug!(error = %err, "Expression did not parse; falling back to manual");
                None
            }
        }
    }
}
