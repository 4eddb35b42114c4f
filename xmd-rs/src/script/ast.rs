//! Syntax tree for XMD documents.
//!
//! Expressions and statements are separate sum types, each node carrying
//! the [`Location`] it was parsed from.  Function and class definitions are
//! reference counted so the interpreter can keep them in its tables without
//! cloning bodies.

use std::fmt;
use std::rc::Rc;

use super::expand::Template;
use super::value::Value;

/// Source position of a node (1-based line and column).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub column: usize,
    pub file: Option<Rc<str>>,
}

impl Default for Location {
    fn default() -> Self {
        Location {
            line: 1,
            column: 1,
            file: None,
        }
    }
}

impl Location {
    pub fn new(line: usize, column: usize, file: Option<Rc<str>>) -> Self {
        Location { line, column, file }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{file}:{}:{}", self.line, self.column),
            None => write!(f, "{}:{}", self.line, self.column),
        }
    }
}

// ── Expressions ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// The `File.*` builtins.  The first argument is always a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Read,
    Write,
    Exists,
    Delete,
    List,
}

impl FileOp {
    pub fn from_name(name: &str) -> Option<FileOp> {
        match name {
            "read" => Some(FileOp::Read),
            "write" => Some(FileOp::Write),
            "exists" => Some(FileOp::Exists),
            "delete" => Some(FileOp::Delete),
            "list" => Some(FileOp::List),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FileOp::Read => "File.read",
            FileOp::Write => "File.write",
            FileOp::Exists => "File.exists",
            FileOp::Delete => "File.delete",
            FileOp::List => "File.list",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Value),
    /// String literal containing `${…}` or `{{…}}` interpolations.
    Interpolated(Template),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Ident(String),
    /// `start..end`, inclusive.  With `ascending_only`, `end < start` is empty
    /// instead of counting down (`loop N times`).
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
        ascending_only: bool,
    },
    Member {
        object: Box<Expr>,
        name: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    MethodCall {
        receiver: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    File {
        op: FileOp,
        path: Box<Expr>,
        content: Option<Box<Expr>>,
    },
    /// `cond ? then : otherwise`
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// `x => expr` or `(a, b) => expr`.  Evaluates to [`Value::Lambda`].
    Lambda(Rc<Lambda>),
}

/// An anonymous function.  The body sees its parameters and the globals;
/// nothing from the defining scope is captured.
#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub params: Vec<String>,
    pub body: Expr,
}

impl Expr {
    pub fn new(kind: ExprKind, loc: Location) -> Self {
        Expr { kind, loc }
    }

    /// Numeric value of a literal number node.
    pub fn as_number_literal(&self) -> Option<f64> {
        match &self.kind {
            ExprKind::Literal(Value::Number(x)) => Some(*x),
            ExprKind::Unary {
                op: UnaryOp::Neg,
                operand,
            } => operand.as_number_literal().map(|x| -x),
            _ => None,
        }
    }
}

// ── Statements ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub loc: Location,
}

impl Stmt {
    pub fn new(kind: StmtKind, loc: Location) -> Self {
        Stmt { kind, loc }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// Markdown passed through with `{{ … }}` substitution.
    Text(Template),
    /// `set name[.field…] value`
    Assign { target: AssignTarget, value: Expr },
    /// `print expr`
    Print(Expr),
    /// A bare expression, usually a call.
    Expr(Expr),
    /// `if` / `elif` chain with optional `else`.
    If {
        branches: Vec<Branch>,
        otherwise: Option<Vec<Stmt>>,
    },
    /// Canonical loop: every `for`, range and `loop N times` form.
    Loop {
        var: String,
        iterable: Expr,
        body: Vec<Stmt>,
    },
    While { cond: Expr, body: Vec<Stmt> },
    Break,
    Continue,
    Return(Option<Expr>),
    Function(Rc<FunctionDef>),
    Class(Rc<ClassDef>),
    Import(ImportSpec),
    /// `export name` or `export name = expr`
    Export { name: String, value: Option<Expr> },
    /// Statement-level command handled by the interpreter (`include`, `exec`).
    Directive { name: String, args: Vec<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignTarget {
    pub name: String,
    pub path: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub cond: Expr,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    pub func: Rc<FunctionDef>,
    pub private: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: String,
    pub parent: Option<String>,
    pub constructor: Option<Rc<FunctionDef>>,
    pub methods: Vec<MethodDef>,
    pub loc: Location,
}

impl ClassDef {
    pub fn method(&self, name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.func.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportSpec {
    pub items: ImportItems,
    pub module: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportItems {
    /// `import * from m`
    All,
    Symbols(Vec<ImportItem>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportItem {
    pub name: String,
    pub alias: Option<String>,
}

/// Module names referenced by `import` statements anywhere in `stmts`.
pub fn imported_modules(stmts: &[Stmt]) -> Vec<String> {
    fn walk(stmts: &[Stmt], out: &mut Vec<String>) {
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::Import(spec) => {
                    if !out.contains(&spec.module) {
                        out.push(spec.module.clone());
                    }
                }
                StmtKind::If { branches, otherwise } => {
                    for b in branches {
                        walk(&b.body, out);
                    }
                    if let Some(body) = otherwise {
                        walk(body, out);
                    }
                }
                StmtKind::Loop { body, .. } | StmtKind::While { body, .. } => walk(body, out),
                StmtKind::Function(def) => walk(&def.body, out),
                StmtKind::Class(class) => {
                    if let Some(ctor) = &class.constructor {
                        walk(&ctor.body, out);
                    }
                    for m in &class.methods {
                        walk(&m.func.body, out);
                    }
                }
                _ => {}
            }
        }
    }
    let mut out = Vec::new();
    walk(stmts, &mut out);
    out
}
