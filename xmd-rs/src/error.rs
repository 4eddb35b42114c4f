//! Error taxonomies.
//!
//! | Type | Raised by |
//! |------|-----------|
//! | [`ModuleError`] | module registry, dependency graph, import/export resolver |
//! | [`EvalError`]   | expression parser entry points and the evaluator |
//! | [`ErrorCode`]   | the processing entry point ([`crate::processor`]) |
//!
//! Successful module operations are `Ok(_)`; [`ModuleResultKind::Success`]
//! only exists so the numeric result codes can be reported.

use std::fmt;

use thiserror::Error;

// ── Module results ────────────────────────────────────────────────────────────

/// Result kind of a registry / graph / resolver operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleResultKind {
    Success,
    Error,
    NotFound,
    CircularDependency,
    AlreadyLoaded,
    InvalidPath,
}

impl ModuleResultKind {
    /// Numeric result code (`0` for success, negative otherwise).
    pub fn code(self) -> i32 {
        match self {
            ModuleResultKind::Success => 0,
            ModuleResultKind::Error => -1,
            ModuleResultKind::NotFound => -2,
            ModuleResultKind::CircularDependency => -3,
            ModuleResultKind::AlreadyLoaded => -4,
            ModuleResultKind::InvalidPath => -5,
        }
    }
}

/// A failed module operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleError {
    #[error("module error: {0}")]
    Error(String),
    #[error("module not found: {name}")]
    NotFound { name: String },
    #[error("circular dependency: {}", .path.join(" -> "))]
    CircularDependency { path: Vec<String> },
    #[error("module already registered: {name}")]
    AlreadyLoaded { name: String },
    #[error("invalid module path: {path:?}")]
    InvalidPath { path: String },
}

impl ModuleError {
    pub fn kind(&self) -> ModuleResultKind {
        match self {
            ModuleError::Error(_) => ModuleResultKind::Error,
            ModuleError::NotFound { .. } => ModuleResultKind::NotFound,
            ModuleError::CircularDependency { .. } => ModuleResultKind::CircularDependency,
            ModuleError::AlreadyLoaded { .. } => ModuleResultKind::AlreadyLoaded,
            ModuleError::InvalidPath { .. } => ModuleResultKind::InvalidPath,
        }
    }

    /// Outer processing code this failure surfaces as.
    pub fn code(&self) -> ErrorCode {
        match self {
            ModuleError::NotFound { .. } => ErrorCode::ModuleNotFound,
            ModuleError::CircularDependency { .. } => ErrorCode::CircularDependency,
            ModuleError::InvalidPath { .. } => ErrorCode::FileNotFound,
            ModuleError::Error(_) | ModuleError::AlreadyLoaded { .. } => ErrorCode::InvalidArgument,
        }
    }
}

// ── Processing codes ──────────────────────────────────────────────────────────

/// Status code carried by every [`ProcessResult`](crate::processor::ProcessResult).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorCode {
    #[default]
    Success,
    ParseError,
    SyntaxError,
    PermissionDenied,
    ModuleNotFound,
    CircularDependency,
    CommandFailed,
    OutOfMemory,
    Timeout,
    InvalidArgument,
    FileNotFound,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Success => "success",
            ErrorCode::ParseError => "parse error",
            ErrorCode::SyntaxError => "syntax error",
            ErrorCode::PermissionDenied => "permission denied",
            ErrorCode::ModuleNotFound => "module not found",
            ErrorCode::CircularDependency => "circular dependency",
            ErrorCode::CommandFailed => "command failed",
            ErrorCode::OutOfMemory => "out of memory",
            ErrorCode::Timeout => "timeout",
            ErrorCode::InvalidArgument => "invalid argument",
            ErrorCode::FileNotFound => "file not found",
        }
    }

    pub fn is_success(self) -> bool {
        self == ErrorCode::Success
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Evaluation errors ─────────────────────────────────────────────────────────

/// Which bounded counter ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    LoopIterations,
    RecursionDepth,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::LoopIterations => f.write_str("loop iteration"),
            ResourceKind::RecursionDepth => f.write_str("recursion depth"),
        }
    }
}

/// Typed failure produced while evaluating a document.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("type error: {0}")]
    Type(String),
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("{name}: {message}")]
    Argument { name: String, message: String },
    #[error("division by zero")]
    DivisionByZero,
    #[error("{kind} limit of {limit} exceeded")]
    ResourceLimit { kind: ResourceKind, limit: usize },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("{path}: {message}")]
    Io { path: String, message: String },
    #[error("command failed: {0}")]
    CommandFailed(String),
    #[error("data import failed: {0}")]
    DataImport(String),
    #[error(transparent)]
    Module(#[from] ModuleError),
}

impl EvalError {
    pub fn argument(name: &str, message: impl Into<String>) -> Self {
        EvalError::Argument {
            name: name.to_owned(),
            message: message.into(),
        }
    }

    /// Outer processing code this failure surfaces as.
    pub fn code(&self) -> ErrorCode {
        match self {
            EvalError::Syntax(_) => ErrorCode::SyntaxError,
            EvalError::Type(_)
            | EvalError::UnknownFunction(_)
            | EvalError::Argument { .. }
            | EvalError::DivisionByZero
            | EvalError::DataImport(_) => ErrorCode::InvalidArgument,
            EvalError::ResourceLimit { kind: ResourceKind::LoopIterations, .. } => ErrorCode::Timeout,
            EvalError::ResourceLimit { kind: ResourceKind::RecursionDepth, .. } => {
                ErrorCode::OutOfMemory
            }
            EvalError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            EvalError::FileNotFound(_) | EvalError::Io { .. } => ErrorCode::FileNotFound,
            EvalError::CommandFailed(_) => ErrorCode::CommandFailed,
            EvalError::Module(e) => e.code(),
        }
    }

    pub fn is_resource_limit(&self) -> bool {
        matches!(self, EvalError::ResourceLimit { .. })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
