//! XMD: programmable markdown templates.
//!
//! Markdown documents carry script in `<!-- xmd: ... -->` comments and
//! ```` ```xmd ```` fences.  A [`Processor`] parses the document, runs the
//! script against a persistent variable store, and returns the rendered text.
//!
//! ```rust
//! use xmd::Processor;
//!
//! let mut p = Processor::new();
//! let r = p.process("<!-- xmd: set who \"world\" -->\nHello, {{who}}!\n");
//! assert!(r.is_success());
//! assert_eq!(r.output, "Hello, world!\n");
//! ```
//!
//! | Module | Role |
//! |--------|------|
//! | [`script`] | value model, parser, interpreter |
//! | [`module`] | registry, dependency graph, import/export |
//! | [`processor`] | processing entry point |
//! | [`config`] | config file and environment overrides |
//! | [`sandbox`] | filesystem / process security policy |

pub mod cli;
pub mod config;
pub mod error;
pub mod module;
pub mod pattern;
pub mod processor;
pub mod sandbox;
pub mod script;
pub mod store;

pub use config::Config;
pub use error::{ErrorCode, EvalError, ModuleError, ModuleResultKind};
pub use processor::{ProcessResult, Processor, SourceMode};
pub use script::{Interpreter, Value};
pub use store::Store;
