//! XMD expression lexer, parser, and evaluator.
//!
//! Operator precedence (lowest → highest):
//!   `x => e`  →  `c ? a : b`  →  `||`  →  `&&`  →  `== !=`  →  `< <= > >=`  →
//!   `..`  →  `+ -`  →  `* / %`  →  unary `- !`  →
//!   postfix (`.name`, `.name(…)`, `[i]`)  →  primary
//!
//! A lambda (`x => x * 2`, `(a, b) => a + b`) is a value.  Calling it binds
//! the parameters in a fresh frame; the defining scope is not captured.
//!
//! In *command position* (start of a statement, value of `set`, inside
//! `{{ … }}`) a name followed by whitespace and an argument is a
//! space-separated call: `greet "Ann" 3`.  Arguments are unary-level
//! expressions, so `f -1` passes `-1` while `x - 1` subtracts.  Keywords are
//! never treated as call names.
//!
//! `File.read` / `File.write` / `File.exists` / `File.delete` / `File.list`
//! produce dedicated [`ExprKind::File`] nodes and `Date.now` becomes a plain
//! call of the `Date.now` builtin.

use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::{trace, warn};

use super::ast::{BinOp, Expr, ExprKind, FileOp, Lambda, Location, UnaryOp};
use super::builtins::value_method;
use super::cursor::Cursor;
use super::expand::{has_interpolation, parse_template, render};
use super::value::Value;
use crate::error::{EvalError, ResourceKind};

/// Reserved words: never parsed as call names or call arguments.
pub const KEYWORDS: &[&str] = &[
    "if", "elif", "else", "endif", "then", "for", "endfor", "in", "while", "endwhile", "loop",
    "endloop", "times", "break", "continue", "return", "set", "print", "function",
    "endfunction", "class", "endclass", "extends", "method", "endmethod", "constructor",
    "private", "import", "export", "from", "as", "include",
];

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

fn is_literal_word(word: &str) -> bool {
    matches!(word, "true" | "false" | "null")
}

/// Deepest nesting of unary/parenthesized expressions the parser accepts.
const MAX_DEPTH: usize = 128;

// ── EvalContext ───────────────────────────────────────────────────────────────

/// Interface between the expression evaluator and its host.
///
/// [`Interpreter`](super::interp::Interpreter) implements this to give the
/// evaluator variable lookup, user functions, class methods, and the
/// sandboxed file builtins.
pub trait EvalContext {
    /// Look up a variable (innermost frame first, then globals).
    fn get_var(&self, name: &str) -> Option<Value>;

    /// `true` if a bare `name` with no variable binding should be called.
    fn has_callable(&self, name: &str) -> bool;

    /// Invoke a user-defined function, class constructor, or builtin.
    fn call_fn(&mut self, name: &str, args: Vec<Value>, loc: &Location) -> Result<Value, EvalError>;

    /// `true` if `receiver` is a class instance whose class defines `method`.
    fn has_method(&self, receiver: &Value, method: &str) -> bool;

    /// Invoke a class method.  `binding` names the variable holding the
    /// receiver so changes to `self` can be written back.
    fn call_method(
        &mut self,
        receiver: Value,
        binding: Option<&str>,
        method: &str,
        args: Vec<Value>,
        loc: &Location,
    ) -> Result<Value, EvalError>;

    /// Run a `File.*` builtin after the security check.
    fn file_op(
        &mut self,
        op: FileOp,
        path: Value,
        content: Option<Value>,
        loc: &Location,
    ) -> Result<Value, EvalError>;

    /// Invoke a lambda value.
    fn call_lambda(&mut self, lambda: &Lambda, args: Vec<Value>, loc: &Location) -> Result<Value, EvalError>;

    /// Upper bound on the length of a materialized range.
    fn max_iterations(&self) -> usize;
}

// ── Token ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Assign,
    Arrow,
    Question,
    Dot,
    DotDot,
    Comma,
    Colon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    /// A string literal with no closing quote.
    Unterminated,
    Unknown(char),
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    loc: Location,
    /// Whitespace (or start of input) precedes this token.
    spaced: bool,
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

struct Lexer<'a> {
    cur: Cursor<'a>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str, origin: &Location) -> Self {
        Lexer {
            cur: Cursor::at(src, origin),
        }
    }

    fn tokenize(mut self) -> Vec<Token> {
        let mut tokens: Vec<Token> = Vec::new();
        loop {
            let skipped = !self.cur.take_while(char::is_whitespace).is_empty();
            let loc = self.cur.location();
            let kind = self.next_kind();
            let done = kind == TokenKind::Eof;
            tokens.push(Token {
                kind,
                loc,
                spaced: skipped || tokens.is_empty(),
            });
            if done {
                break;
            }
        }
        tokens
    }

    fn next_kind(&mut self) -> TokenKind {
        let Some(ch) = self.cur.bump() else {
            return TokenKind::Eof;
        };
        match ch {
            '0'..='9' => self.read_number(ch),
            '"' | '\'' => self.read_string(ch),
            c if c.is_alphabetic() || c == '_' => self.read_ident(c),
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '!' => {
                if self.cur.eat('=') {
                    TokenKind::Ne
                } else {
                    TokenKind::Bang
                }
            }
            '=' => {
                if self.cur.eat('=') {
                    TokenKind::EqEq
                } else if self.cur.eat('>') {
                    TokenKind::Arrow
                } else {
                    TokenKind::Assign
                }
            }
            '<' => {
                if self.cur.eat('=') {
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.cur.eat('=') {
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            '&' if self.cur.eat('&') => TokenKind::AndAnd,
            '|' if self.cur.eat('|') => TokenKind::OrOr,
            '.' => {
                if self.cur.eat('.') {
                    TokenKind::DotDot
                } else {
                    TokenKind::Dot
                }
            }
            '?' => TokenKind::Question,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            c => TokenKind::Unknown(c),
        }
    }

    /// Digits with at most one decimal point.  `1..5` lexes as `1`, `..`, `5`.
    fn read_number(&mut self, first: char) -> TokenKind {
        let mut s = String::new();
        s.push(first);
        s.push_str(self.cur.take_while(|c| c.is_ascii_digit()));
        if self.cur.peek() == Some('.') && matches!(self.cur.peek_nth(1), Some(c) if c.is_ascii_digit()) {
            self.cur.bump();
            s.push('.');
            s.push_str(self.cur.take_while(|c| c.is_ascii_digit()));
        }
        TokenKind::Number(s.parse().unwrap_or(0.0))
    }

    fn read_string(&mut self, quote: char) -> TokenKind {
        let mut s = String::new();
        loop {
            match self.cur.bump() {
                None => return TokenKind::Unterminated,
                Some('\\') => match self.cur.bump() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('r') => s.push('\r'),
                    Some(c) => s.push(c),
                    None => return TokenKind::Unterminated,
                },
                Some(c) if c == quote => break,
                Some(c) => s.push(c),
            }
        }
        TokenKind::Str(s)
    }

    fn read_ident(&mut self, first: char) -> TokenKind {
        let mut s = String::new();
        s.push(first);
        s.push_str(self.cur.take_while(|c| c.is_alphanumeric() || c == '_'));
        TokenKind::Ident(s)
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(src: &str, origin: &Location) -> Self {
        Parser {
            tokens: Lexer::new(src, origin).tokenize(),
            pos: 0,
            depth: 0,
        }
    }

    // `tokens` always ends with `Eof`, so these never index out of range.
    fn peek_at(&self, n: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)]
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn advance(&mut self) -> Token {
        let t = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == kind {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, msg: impl std::fmt::Display) -> EvalError {
        EvalError::Syntax(format!("{}: {msg}", self.peek().loc))
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<(), EvalError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}, found {:?}", self.peek_kind())))
        }
    }

    fn expect_end(&self) -> Result<(), EvalError> {
        match self.peek_kind() {
            TokenKind::Eof => Ok(()),
            other => Err(self.error(format!("unexpected {other:?}"))),
        }
    }

    // ── Command position ──────────────────────────────────────────────────────

    fn parse_command(&mut self) -> Result<Expr, EvalError> {
        if let Some(call) = self.try_space_call()? {
            return self.ternary_tail(call);
        }
        self.parse_expr()
    }

    /// `name[.name…] arg arg…`.  Rewinds and returns `None` when the name is
    /// not followed by an argument.
    fn try_space_call(&mut self) -> Result<Option<Expr>, EvalError> {
        let start = self.pos;
        let (first, loc) = match &self.peek().kind {
            TokenKind::Ident(w) if !is_keyword(w) && !is_literal_word(w) => {
                (w.clone(), self.peek().loc.clone())
            }
            _ => return Ok(None),
        };
        self.pos += 1;
        let mut path = vec![first];
        while self.peek_kind() == &TokenKind::Dot && !self.peek().spaced {
            match &self.peek_at(1).kind {
                TokenKind::Ident(name) if !self.peek_at(1).spaced => {
                    path.push(name.clone());
                    self.pos += 2;
                }
                _ => break,
            }
        }
        if !self.at_arg_start() {
            self.pos = start;
            return Ok(None);
        }
        let mut args = Vec::new();
        while self.at_arg_start() {
            args.push(self.parse_unary()?);
        }
        make_call(path, args, loc).map(Some)
    }

    fn at_arg_start(&self) -> bool {
        let t = self.peek();
        if !t.spaced {
            return false;
        }
        match &t.kind {
            TokenKind::Number(_)
            | TokenKind::Str(_)
            | TokenKind::Unterminated
            | TokenKind::LParen
            | TokenKind::LBracket
            | TokenKind::LBrace => true,
            TokenKind::Ident(w) => !is_keyword(w),
            TokenKind::Minus | TokenKind::Bang => {
                let next = self.peek_at(1);
                !next.spaced
                    && matches!(
                        next.kind,
                        TokenKind::Number(_) | TokenKind::Ident(_) | TokenKind::LParen
                    )
            }
            _ => false,
        }
    }

    // ── Grammar ───────────────────────────────────────────────────────────────

    fn parse_expr(&mut self) -> Result<Expr, EvalError> {
        let loc = self.peek().loc.clone();
        if let Some(params) = self.lambda_params() {
            let body = self.parse_nested()?;
            return Ok(Expr::new(ExprKind::Lambda(Rc::new(Lambda { params, body })), loc));
        }
        let cond = self.parse_or()?;
        self.ternary_tail(cond)
    }

    /// `? then : otherwise` after an already parsed condition.  Right
    /// associative: `a ? b : c ? d : e` nests in the else branch.
    fn ternary_tail(&mut self, cond: Expr) -> Result<Expr, EvalError> {
        if !self.eat(&TokenKind::Question) {
            return Ok(cond);
        }
        let then = self.parse_nested()?;
        self.expect(&TokenKind::Colon, "':' in conditional expression")?;
        let otherwise = self.parse_nested()?;
        let loc = cond.loc.clone();
        Ok(Expr::new(
            ExprKind::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            loc,
        ))
    }

    /// `parse_expr` under the nesting guard.
    fn parse_nested(&mut self) -> Result<Expr, EvalError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        self.depth += 1;
        let result = self.parse_expr();
        self.depth -= 1;
        result
    }

    /// Parameter list of a lambda starting at the current token, consumed up
    /// to and including `=>`.  Leaves the position alone otherwise.
    fn lambda_params(&mut self) -> Option<Vec<String>> {
        let start = self.pos;
        let mut params = Vec::new();
        match self.advance().kind {
            TokenKind::Ident(name) if !is_keyword(&name) && !is_literal_word(&name) => params.push(name),
            TokenKind::LParen => {
                if !self.eat(&TokenKind::RParen) {
                    loop {
                        match self.advance().kind {
                            TokenKind::Ident(name) if !is_keyword(&name) && !is_literal_word(&name) => {
                                params.push(name)
                            }
                            _ => {
                                self.pos = start;
                                return None;
                            }
                        }
                        if self.eat(&TokenKind::RParen) {
                            break;
                        }
                        if !self.eat(&TokenKind::Comma) {
                            self.pos = start;
                            return None;
                        }
                    }
                }
            }
            _ => {
                self.pos = start;
                return None;
            }
        }
        if self.eat(&TokenKind::Arrow) {
            Some(params)
        } else {
            self.pos = start;
            None
        }
    }

    fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        let loc = lhs.loc.clone();
        Expr::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            loc,
        )
    }

    fn parse_or(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&TokenKind::OrOr) {
            let rhs = self.parse_and()?;
            lhs = Self::binary(BinOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_equality()?;
        while self.eat(&TokenKind::AndAnd) {
            let rhs = self.parse_equality()?;
            lhs = Self::binary(BinOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqEq => BinOp::Eq,
                TokenKind::Ne => BinOp::Ne,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_comparison()?;
            lhs = Self::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_range()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Le => BinOp::Le,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::Ge => BinOp::Ge,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_range()?;
            lhs = Self::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_range(&mut self) -> Result<Expr, EvalError> {
        let start = self.parse_additive()?;
        if !self.eat(&TokenKind::DotDot) {
            return Ok(start);
        }
        let end = self.parse_additive()?;
        let loc = start.loc.clone();
        Ok(Expr::new(
            ExprKind::Range {
                start: Box::new(start),
                end: Box::new(end),
                ascending_only: false,
            },
            loc,
        ))
    }

    fn parse_additive(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_multiplicative()?;
            lhs = Self::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Self::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        self.depth += 1;
        let result = self.parse_unary_inner();
        self.depth -= 1;
        result
    }

    fn parse_unary_inner(&mut self) -> Result<Expr, EvalError> {
        let loc = self.peek().loc.clone();
        let op = match self.peek_kind() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.parse_postfix(),
        };
        self.pos += 1;
        let operand = self.parse_unary()?;
        // Fold `-<number>` into a literal.
        if let (UnaryOp::Neg, ExprKind::Literal(Value::Number(x))) = (op, &operand.kind) {
            return Ok(Expr::new(ExprKind::Literal(Value::Number(-x)), loc));
        }
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            loc,
        ))
    }

    fn parse_postfix(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.parse_primary()?;
        loop {
            let spaced = self.peek().spaced;
            match self.peek_kind() {
                TokenKind::Dot if !spaced => {
                    let TokenKind::Ident(name) = self.peek_at(1).kind.clone() else {
                        return Err(self.error("expected a name after '.'"));
                    };
                    self.pos += 2;
                    let loc = expr.loc.clone();
                    if self.peek_kind() == &TokenKind::LParen && !self.peek().spaced {
                        self.pos += 1;
                        let args = self.parse_args_until(&TokenKind::RParen, ")")?;
                        expr = make_method_call(expr, name, args, loc)?;
                    } else {
                        expr = make_member(expr, name, loc);
                    }
                }
                TokenKind::LBracket if !spaced => {
                    self.pos += 1;
                    let index = self.parse_expr()?;
                    self.expect(&TokenKind::RBracket, "']'")?;
                    let loc = expr.loc.clone();
                    expr = Expr::new(
                        ExprKind::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                        },
                        loc,
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// Comma-separated expressions up to `close` (consumed).  A trailing
    /// comma is allowed.
    fn parse_args_until(&mut self, close: &TokenKind, what: &str) -> Result<Vec<Expr>, EvalError> {
        let mut args = Vec::new();
        loop {
            if self.eat(close) {
                return Ok(args);
            }
            args.push(self.parse_expr()?);
            if !self.eat(&TokenKind::Comma) {
                self.expect(close, &format!("',' or '{what}'"))?;
                return Ok(args);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, EvalError> {
        let tok = self.advance();
        let loc = tok.loc;
        match tok.kind {
            TokenKind::Number(x) => Ok(Expr::new(ExprKind::Literal(Value::Number(x)), loc)),
            TokenKind::Str(s) => {
                if has_interpolation(&s) {
                    let mut malformed = Vec::new();
                    let template = parse_template(&s, &loc, &mut malformed);
                    for d in malformed {
                        warn!(loc = %d.loc, "{}", d.message);
                    }
                    Ok(Expr::new(ExprKind::Interpolated(template), loc))
                } else {
                    Ok(Expr::new(ExprKind::Literal(Value::from(s)), loc))
                }
            }
            TokenKind::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::new(ExprKind::Literal(Value::Bool(true)), loc)),
                "false" => Ok(Expr::new(ExprKind::Literal(Value::Bool(false)), loc)),
                "null" => Ok(Expr::new(ExprKind::Literal(Value::Null), loc)),
                _ => {
                    if self.peek_kind() == &TokenKind::LParen && !self.peek().spaced {
                        self.pos += 1;
                        let args = self.parse_args_until(&TokenKind::RParen, ")")?;
                        make_call(vec![name], args, loc)
                    } else {
                        Ok(Expr::new(ExprKind::Ident(name), loc))
                    }
                }
            },
            TokenKind::LParen => {
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::LBracket => {
                let items = self.parse_args_until(&TokenKind::RBracket, "]")?;
                Ok(Expr::new(ExprKind::Array(items), loc))
            }
            TokenKind::LBrace => self.parse_object(loc),
            TokenKind::Unterminated => Err(EvalError::Syntax(format!("{loc}: unterminated string"))),
            TokenKind::Eof => Err(EvalError::Syntax(format!("{loc}: expected an expression"))),
            other => Err(EvalError::Syntax(format!("{loc}: unexpected {other:?}"))),
        }
    }

    fn parse_object(&mut self, loc: Location) -> Result<Expr, EvalError> {
        let mut pairs = Vec::new();
        loop {
            if self.eat(&TokenKind::RBrace) {
                break;
            }
            let key = match self.advance().kind {
                TokenKind::Ident(k) | TokenKind::Str(k) => k,
                other => return Err(self.error(format!("expected an object key, found {other:?}"))),
            };
            self.expect(&TokenKind::Colon, "':'")?;
            pairs.push((key, self.parse_expr()?));
            if !self.eat(&TokenKind::Comma) {
                self.expect(&TokenKind::RBrace, "',' or '}'")?;
                break;
            }
        }
        Ok(Expr::new(ExprKind::Object(pairs), loc))
    }
}

// ── Call construction ─────────────────────────────────────────────────────────

fn file_node(op: FileOp, mut args: Vec<Expr>, loc: Location) -> Result<Expr, EvalError> {
    let want = if op == FileOp::Write { 2 } else { 1 };
    if args.len() != want {
        return Err(EvalError::Syntax(format!(
            "{loc}: {} takes {want} argument(s), got {}",
            op.name(),
            args.len()
        )));
    }
    let content = if op == FileOp::Write {
        args.pop().map(Box::new)
    } else {
        None
    };
    let path = match args.pop() {
        Some(p) => Box::new(p),
        None => return Err(EvalError::Syntax(format!("{loc}: {} needs a path", op.name()))),
    };
    Ok(Expr::new(ExprKind::File { op, path, content }, loc))
}

/// Build a call from a dotted name path and its arguments.
fn make_call(path: Vec<String>, args: Vec<Expr>, loc: Location) -> Result<Expr, EvalError> {
    let mut path = path.into_iter();
    let Some(head) = path.next() else {
        return Err(EvalError::Syntax(format!("{loc}: missing function name")));
    };
    let mut receiver = Expr::new(ExprKind::Ident(head.clone()), loc.clone());
    let rest: Vec<String> = path.collect();
    let Some((method, members)) = rest.split_last() else {
        return Ok(Expr::new(ExprKind::Call { name: head, args }, loc));
    };
    for name in members {
        receiver = make_member(receiver, name.clone(), loc.clone());
    }
    make_method_call(receiver, method.clone(), args, loc)
}

fn make_method_call(receiver: Expr, method: String, args: Vec<Expr>, loc: Location) -> Result<Expr, EvalError> {
    if let ExprKind::Ident(obj) = &receiver.kind {
        if obj == "File" {
            if let Some(op) = FileOp::from_name(&method) {
                return file_node(op, args, loc);
            }
        }
        if obj == "Date" && method == "now" {
            return Ok(Expr::new(
                ExprKind::Call {
                    name: "Date.now".to_owned(),
                    args,
                },
                loc,
            ));
        }
    }
    Ok(Expr::new(
        ExprKind::MethodCall {
            receiver: Box::new(receiver),
            method,
            args,
        },
        loc,
    ))
}

fn make_member(object: Expr, name: String, loc: Location) -> Expr {
    if matches!(&object.kind, ExprKind::Ident(obj) if obj == "Date") && name == "now" {
        return Expr::new(
            ExprKind::Call {
                name: "Date.now".to_owned(),
                args: Vec::new(),
            },
            loc,
        );
    }
    Expr::new(
        ExprKind::Member {
            object: Box::new(object),
            name,
        },
        loc,
    )
}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Parse a complete expression located at `origin`.
pub fn parse_expr_at(src: &str, origin: &Location) -> Result<Expr, EvalError> {
    let mut parser = Parser::new(src, origin);
    let expr = parser.parse_expr()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parse an expression in command position (space-separated calls allowed).
pub fn parse_command_at(src: &str, origin: &Location) -> Result<Expr, EvalError> {
    let mut parser = Parser::new(src, origin);
    let expr = parser.parse_command()?;
    parser.expect_end()?;
    Ok(expr)
}

pub fn parse_expr(src: &str) -> Result<Expr, EvalError> {
    parse_expr_at(src, &Location::default())
}

pub fn parse_command(src: &str) -> Result<Expr, EvalError> {
    parse_command_at(src, &Location::default())
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

fn binding_name(expr: &Expr) -> Option<&str> {
    match &expr.kind {
        ExprKind::Ident(name) => Some(name),
        _ => None,
    }
}

fn eval_args(args: &[Expr], ctx: &mut dyn EvalContext) -> Result<Vec<Value>, EvalError> {
    args.iter().map(|a| eval_expr(a, ctx)).collect()
}

/// Evaluate an [`Expr`] against the given context.
pub fn eval_expr(expr: &Expr, ctx: &mut dyn EvalContext) -> Result<Value, EvalError> {
    match &expr.kind {
        ExprKind::Literal(v) => Ok(v.clone()),

        ExprKind::Interpolated(template) => Ok(Value::from(render(template, ctx)?)),

        ExprKind::Array(items) => Ok(Value::from(eval_args(items, ctx)?)),

        ExprKind::Object(pairs) => {
            let mut map = BTreeMap::new();
            for (k, e) in pairs {
                map.insert(k.clone(), eval_expr(e, ctx)?);
            }
            Ok(Value::from(map))
        }

        ExprKind::Ident(name) => match ctx.get_var(name) {
            Some(v) => Ok(v),
            None if ctx.has_callable(name) => ctx.call_fn(name, Vec::new(), &expr.loc),
            None => {
                trace!(%name, loc = %expr.loc, "undefined identifier evaluates to null");
                Ok(Value::Null)
            }
        },

        ExprKind::Range {
            start,
            end,
            ascending_only,
        } => {
            let a = eval_expr(start, ctx)?;
            let b = eval_expr(end, ctx)?;
            materialize_range(&a, &b, *ascending_only, ctx.max_iterations())
        }

        ExprKind::Member { object, name } => {
            let recv = eval_expr(object, ctx)?;
            if ctx.has_method(&recv, name) {
                return ctx.call_method(recv, binding_name(object), name, Vec::new(), &expr.loc);
            }
            if let Some(v) = recv.get_field(name) {
                return Ok(v.clone());
            }
            match value_method(&recv, name, &[]) {
                Some(result) => result,
                None => Ok(Value::Null),
            }
        }

        ExprKind::Index { object, index } => {
            let obj = eval_expr(object, ctx)?;
            let idx = eval_expr(index, ctx)?;
            Ok(obj.index(&idx))
        }

        ExprKind::Unary { op, operand } => {
            let v = eval_expr(operand, ctx)?;
            match op {
                UnaryOp::Neg => v.neg(),
                UnaryOp::Not => Ok(Value::Bool(!v.as_bool())),
            }
        }

        ExprKind::Binary { op, lhs, rhs } => {
            // Short-circuit for && and ||
            match op {
                BinOp::And => {
                    if !eval_expr(lhs, ctx)?.as_bool() {
                        return Ok(Value::Bool(false));
                    }
                    return Ok(Value::Bool(eval_expr(rhs, ctx)?.as_bool()));
                }
                BinOp::Or => {
                    if eval_expr(lhs, ctx)?.as_bool() {
                        return Ok(Value::Bool(true));
                    }
                    return Ok(Value::Bool(eval_expr(rhs, ctx)?.as_bool()));
                }
                _ => {}
            }
            let l = eval_expr(lhs, ctx)?;
            let r = eval_expr(rhs, ctx)?;
            eval_binop(*op, &l, &r)
        }

        ExprKind::Call { name, args } => {
            let args = eval_args(args, ctx)?;
            match ctx.get_var(name) {
                Some(Value::Lambda(lambda)) => ctx.call_lambda(&lambda, args, &expr.loc),
                _ => ctx.call_fn(name, args, &expr.loc),
            }
        }

        ExprKind::MethodCall {
            receiver,
            method,
            args,
        } => {
            let recv = eval_expr(receiver, ctx)?;
            let args = eval_args(args, ctx)?;
            if ctx.has_method(&recv, method) {
                return ctx.call_method(recv, binding_name(receiver), method, args, &expr.loc);
            }
            if let Some(Value::Lambda(lambda)) = recv.get_field(method) {
                let lambda = Rc::clone(lambda);
                return ctx.call_lambda(&lambda, args, &expr.loc);
            }
            if let (Value::Array(items), [Value::Lambda(f)]) = (&recv, args.as_slice()) {
                if let Some(result) = map_with(method, items, f, ctx, &expr.loc) {
                    return result;
                }
            }
            match value_method(&recv, method, &args) {
                Some(result) => result,
                None => Err(EvalError::UnknownFunction(format!(
                    "{}.{method}",
                    recv.class_name().unwrap_or(recv.type_name())
                ))),
            }
        }

        ExprKind::File { op, path, content } => {
            let path = eval_expr(path, ctx)?;
            let content = match content {
                Some(c) => Some(eval_expr(c, ctx)?),
                None => None,
            };
            ctx.file_op(*op, path, content, &expr.loc)
        }

        ExprKind::Ternary {
            cond,
            then,
            otherwise,
        } => {
            if eval_expr(cond, ctx)?.as_bool() {
                eval_expr(then, ctx)
            } else {
                eval_expr(otherwise, ctx)
            }
        }

        ExprKind::Lambda(lambda) => Ok(Value::Lambda(Rc::clone(lambda))),
    }
}

/// `items.map(f)`, `items.filter(f)` and `items.find(f)`.  `None` for any
/// other method.
fn map_with(
    method: &str,
    items: &[Value],
    f: &Lambda,
    ctx: &mut dyn EvalContext,
    loc: &Location,
) -> Option<Result<Value, EvalError>> {
    if !matches!(method, "map" | "filter" | "find") {
        return None;
    }
    let mut out = Vec::new();
    for item in items {
        let r = match ctx.call_lambda(f, vec![item.clone()], loc) {
            Ok(r) => r,
            Err(e) => return Some(Err(e)),
        };
        match method {
            "map" => out.push(r),
            "find" if r.as_bool() => return Some(Ok(item.clone())),
            "filter" if r.as_bool() => out.push(item.clone()),
            _ => {}
        }
    }
    Some(Ok(if method == "find" { Value::Null } else { Value::from(out) }))
}

fn eval_binop(op: BinOp, l: &Value, r: &Value) -> Result<Value, EvalError> {
    use std::cmp::Ordering;
    Ok(match op {
        BinOp::Add => l.add(r)?,
        BinOp::Sub => l.sub(r)?,
        BinOp::Mul => l.mul(r)?,
        BinOp::Div => l.div(r)?,
        BinOp::Rem => l.rem(r)?,
        BinOp::Eq => Value::Bool(l.loose_eq(r)),
        BinOp::Ne => Value::Bool(!l.loose_eq(r)),
        BinOp::Lt => Value::Bool(l.compare(r) == Ordering::Less),
        BinOp::Le => Value::Bool(l.compare(r) != Ordering::Greater),
        BinOp::Gt => Value::Bool(l.compare(r) == Ordering::Greater),
        BinOp::Ge => Value::Bool(l.compare(r) != Ordering::Less),
        BinOp::And => Value::Bool(l.as_bool() && r.as_bool()),
        BinOp::Or => Value::Bool(l.as_bool() || r.as_bool()),
    })
}

/// Expand `start..end` (inclusive) into an array, counting down when
/// `end < start` unless `ascending_only`.
pub fn materialize_range(
    start: &Value,
    end: &Value,
    ascending_only: bool,
    limit: usize,
) -> Result<Value, EvalError> {
    let bound = |v: &Value| match v.as_number() {
        Some(x) if x.is_finite() => Ok(x.trunc() as i64),
        _ => Err(EvalError::Type(format!("range bound must be a number, got {}", v.type_name()))),
    };
    let a = bound(start)?;
    let b = bound(end)?;
    if ascending_only && b < a {
        return Ok(Value::from(Vec::new()));
    }
    let count = a.abs_diff(b).saturating_add(1);
    if count > limit as u64 {
        return Err(EvalError::ResourceLimit {
            kind: ResourceKind::LoopIterations,
            limit,
        });
    }
    let items: Vec<Value> = if a <= b {
        (a..=b).map(Value::from).collect()
    } else {
        (b..=a).rev().map(Value::from).collect()
    };
    Ok(Value::from(items))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct TestCtx {
        vars: HashMap<String, Value>,
        calls: Vec<String>,
    }

    impl TestCtx {
        fn new() -> Self {
            TestCtx {
                vars: HashMap::new(),
                calls: Vec::new(),
            }
        }

        fn with(mut self, k: &str, v: Value) -> Self {
            self.vars.insert(k.to_owned(), v);
            self
        }
    }

    impl EvalContext for TestCtx {
        fn get_var(&self, name: &str) -> Option<Value> {
            self.vars.get(name).cloned()
        }
        fn has_callable(&self, name: &str) -> bool {
            name == "answer"
        }
        fn call_fn(&mut self, name: &str, args: Vec<Value>, _loc: &Location) -> Result<Value, EvalError> {
            self.calls.push(name.to_owned());
            match name {
                "answer" => Ok(Value::from(42.0)),
                "double" => Ok(Value::Number(args[0].as_number().unwrap_or(0.0) * 2.0)),
                "Date.now" => Ok(Value::from(1000.0)),
                other => Err(EvalError::UnknownFunction(other.to_owned())),
            }
        }
        fn has_method(&self, _receiver: &Value, _method: &str) -> bool {
            false
        }
        fn call_method(
            &mut self,
            _receiver: Value,
            _binding: Option<&str>,
            method: &str,
            _args: Vec<Value>,
            _loc: &Location,
        ) -> Result<Value, EvalError> {
            Err(EvalError::UnknownFunction(method.to_owned()))
        }
        fn file_op(
            &mut self,
            op: FileOp,
            path: Value,
            _content: Option<Value>,
            _loc: &Location,
        ) -> Result<Value, EvalError> {
            Ok(Value::from(format!("{}:{path}", op.name())))
        }
        fn call_lambda(&mut self, lambda: &Lambda, args: Vec<Value>, _loc: &Location) -> Result<Value, EvalError> {
            let saved = self.vars.clone();
            for (param, arg) in lambda.params.iter().zip(args) {
                self.vars.insert(param.clone(), arg);
            }
            let result = eval_expr(&lambda.body, self);
            self.vars = saved;
            result
        }
        fn max_iterations(&self) -> usize {
            100
        }
    }

    fn eval(src: &str) -> Value {
        eval_ctx(src, &mut TestCtx::new())
    }

    fn eval_ctx(src: &str, ctx: &mut TestCtx) -> Value {
        let expr = parse_command(src).unwrap_or_else(|e| panic!("parse {src:?}: {e}"));
        eval_expr(&expr, ctx).unwrap_or_else(|e| panic!("eval {src:?}: {e}"))
    }

    #[test]
    fn literals() {
        assert_eq!(eval("42"), Value::from(42.0));
        assert_eq!(eval("-1.5"), Value::from(-1.5));
        assert_eq!(eval(r#""hi\n""#), Value::from("hi\n"));
        assert_eq!(eval("'single'"), Value::from("single"));
        assert_eq!(eval("true"), Value::Bool(true));
        assert_eq!(eval("null"), Value::Null);
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(eval("2 + 3 * 4"), Value::from(14.0));
        assert_eq!(eval("(2 + 3) * 4"), Value::from(20.0));
        assert_eq!(eval("7 % 4 - 1"), Value::from(2.0));
        assert_eq!(eval(r#""a" + 1"#), Value::from("a1"));
    }

    #[test]
    fn comparison_and_logic() {
        assert_eq!(eval("3 > 2 && 1 == 1"), Value::Bool(true));
        assert_eq!(eval("!(1 < 0) || false"), Value::Bool(true));
        assert_eq!(eval(r#""b" >= "a""#), Value::Bool(true));
    }

    #[test]
    fn short_circuit_skips_rhs() {
        let mut ctx = TestCtx::new();
        eval_ctx("false && double(1)", &mut ctx);
        assert!(ctx.calls.is_empty());
    }

    #[test]
    fn variable_lookup_and_miss() {
        let mut ctx = TestCtx::new().with("x", Value::from(5.0));
        assert_eq!(eval_ctx("x * 2", &mut ctx), Value::from(10.0));
        assert_eq!(eval_ctx("missing", &mut ctx), Value::Null);
    }

    #[test]
    fn bare_callable_is_called() {
        assert_eq!(eval("answer"), Value::from(42.0));
    }

    #[test]
    fn space_separated_call() {
        let expr = parse_command(r#"greet "Ann" 3"#).unwrap();
        match expr.kind {
            ExprKind::Call { name, args } => {
                assert_eq!(name, "greet");
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected call, got {other:?}"),
        }
        assert_eq!(eval("double 4"), Value::from(8.0));
        assert_eq!(eval("double -4"), Value::from(-8.0));
    }

    #[test]
    fn subtraction_is_not_a_call() {
        let mut ctx = TestCtx::new().with("x", Value::from(5.0));
        assert_eq!(eval_ctx("x - 1", &mut ctx), Value::from(4.0));
        assert_eq!(eval_ctx("x", &mut ctx), Value::from(5.0));
    }

    #[test]
    fn keyword_is_not_a_call() {
        assert!(!matches!(
            parse_command("print x").map(|e| e.kind),
            Ok(ExprKind::Call { .. })
        ));
    }

    #[test]
    fn paren_call() {
        assert_eq!(eval("double(2) + 1"), Value::from(5.0));
    }

    #[test]
    fn file_nodes() {
        let expr = parse_command(r#"File.write "out.txt" "data""#).unwrap();
        assert!(matches!(
            expr.kind,
            ExprKind::File {
                op: FileOp::Write,
                content: Some(_),
                ..
            }
        ));
        assert_eq!(eval(r#"File.read("a.md")"#), Value::from("File.read:a.md"));
        assert!(parse_command(r#"File.write "only-path""#).is_err());
    }

    #[test]
    fn date_now_is_a_call() {
        assert_eq!(eval("Date.now"), Value::from(1000.0));
    }

    #[test]
    fn ranges() {
        assert_eq!(eval("1..3").to_string(), "1, 2, 3");
        assert_eq!(eval("3..1").to_string(), "3, 2, 1");
        let err = eval_expr(&parse_expr("1..500").unwrap(), &mut TestCtx::new()).unwrap_err();
        assert!(err.is_resource_limit());
    }

    #[test]
    fn ascending_only_range_is_empty() {
        let v = materialize_range(&Value::from(1.0), &Value::from(0.0), true, 10).unwrap();
        assert_eq!(v.len(), Some(0));
    }

    #[test]
    fn arrays_objects_members() {
        assert_eq!(eval("[1, 2, 3][1]"), Value::from(2.0));
        assert_eq!(eval(r#"{name: "Ann", "age": 3}.name"#), Value::from("Ann"));
        assert_eq!(eval("[1, 2, 3].length"), Value::from(3.0));
        assert_eq!(eval(r#""abc".upper()"#), Value::from("ABC"));
    }

    #[test]
    fn interpolated_string() {
        let mut ctx = TestCtx::new().with("name", Value::from("Bo"));
        assert_eq!(eval_ctx(r#""Hi ${name}!""#, &mut ctx), Value::from("Hi Bo!"));
    }

    #[test]
    fn syntax_errors() {
        assert!(parse_expr(r#""open"#).is_err());
        assert!(parse_expr("1 +").is_err());
        assert!(parse_expr("(1").is_err());
        assert!(parse_expr("1 2").is_err());
        assert!(parse_expr(&"(".repeat(500)).is_err());
    }

    #[test]
    fn unknown_method_errors() {
        let expr = parse_expr("(5).frobnicate()").unwrap();
        assert!(matches!(
            eval_expr(&expr, &mut TestCtx::new()),
            Err(EvalError::UnknownFunction(_))
        ));
    }

    #[test]
    fn ternary() {
        let mut ctx = TestCtx::new().with("ok", Value::Bool(true)).with("n", Value::from(0.0));
        assert_eq!(eval_ctx(r#"ok ? "y" : "n""#, &mut ctx), Value::from("y"));
        assert_eq!(eval_ctx(r#"n ? "y" : "n""#, &mut ctx), Value::from("n"));
        assert_eq!(eval_ctx("n > 1 ? 1 : n < 0 ? -1 : 0", &mut ctx), Value::from(0.0));
        assert_eq!(eval_ctx("double 2 ? 1 : 2", &mut ctx), Value::from(1.0));
        assert_eq!(eval_ctx("{a: ok ? 1 : 2}.a", &mut ctx), Value::from(1.0));
        assert!(parse_expr("ok ? 1").is_err());
    }

    #[test]
    fn lambdas() {
        let v = eval("x => x * 2");
        assert_eq!(v.type_name(), "function");
        assert_eq!(v.to_string(), "(x) => ...");

        let mut ctx = TestCtx::new()
            .with("twice", eval("x => x * 2"))
            .with("add", eval("(a, b) => a + b"))
            .with("items", Value::from(vec![Value::from(1.0), Value::from(2.0), Value::from(3.0)]));
        assert_eq!(eval_ctx("twice(4)", &mut ctx), Value::from(8.0));
        assert_eq!(eval_ctx("twice 5", &mut ctx), Value::from(10.0));
        assert_eq!(eval_ctx("add(2, 3)", &mut ctx), Value::from(5.0));
        assert_eq!(eval_ctx("items.map(twice)", &mut ctx).to_string(), "2, 4, 6");
        assert_eq!(eval_ctx("items.filter(x => x % 2 == 1)", &mut ctx).to_string(), "1, 3");
        assert_eq!(eval_ctx("items.find(x => x > 1)", &mut ctx), Value::from(2.0));
    }
}
