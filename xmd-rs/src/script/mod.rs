//! The XMD template language.
//!
//! | Module | Role |
//! |--------|------|
//! | [`value`] | runtime values |
//! | [`cursor`] | bounds-checked text cursor |
//! | [`ast`] | statement and expression trees |
//! | [`expr`] | expression parser and evaluator |
//! | [`expand`] | `{{ expr }}` / `${name}` substitution |
//! | [`stmt`] | document segmentation and statement parser |
//! | [`builtins`] | string, math, and date builtins |
//! | [`fileio`] | sandboxed `File.*`, `exec`, and `load` |
//! | [`interp`] | tree-walking interpreter |
//!
//! # Quick start
//!
//! ```rust
//! use xmd::script::Interpreter;
//!
//! let mut interp = Interpreter::new();
//! interp.exec_script("set x 6\nprint x * 7").unwrap();
//! assert_eq!(interp.take_output(), "42\n");
//! ```

pub mod ast;
pub mod builtins;
pub mod cursor;
pub mod expand;
pub mod expr;
pub mod fileio;
pub mod interp;
pub mod stmt;
pub mod value;

pub use expr::EvalContext;
pub use interp::Interpreter;
pub use stmt::{parse_document, parse_script, Diagnostic, ParsedDocument};
pub use value::Value;
