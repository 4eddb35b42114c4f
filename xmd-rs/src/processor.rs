//! Processing entry point.
//!
//! A [`Processor`] owns one interpreter session.  Variables set by one call
//! to [`Processor::process`] are visible to the next; modules are evaluated
//! at most once per processor.
//!
//! Every call returns a [`ProcessResult`].  On failure its `output` is empty
//! and `code`/`message` say why; rendered text is never returned half-done.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ErrorCode, EvalError, ModuleError};
use crate::module::{build_graph, validate_all, Module};
use crate::pattern::PatternError;
use crate::sandbox::{SandboxPolicy, SecurityPolicy};
use crate::script::ast::imported_modules;
use crate::script::{parse_document, parse_script, Diagnostic, Interpreter, ParsedDocument, Value};

/// How the input text is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceMode {
    /// Markdown with embedded directives.
    #[default]
    Document,
    /// Bare script, one statement per line.
    Script,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessResult {
    pub output: String,
    pub code: ErrorCode,
    pub message: Option<String>,
    pub elapsed: Duration,
    /// Recovered parse problems.  Only fatal in strict mode.
    pub diagnostics: Vec<Diagnostic>,
}

impl ProcessResult {
    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }
}

pub struct Processor {
    interp: Interpreter,
    config: Config,
}

impl Default for Processor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor {
    pub fn new() -> Self {
        Processor {
            interp: Interpreter::new(),
            config: Config::default(),
        }
    }

    /// Build a session from `config`.  Fails only on a malformed sandbox
    /// pattern.
    pub fn with_config(config: Config) -> Result<Self, PatternError> {
        let policy = SandboxPolicy::from_config(&config.sandbox)?;
        let mut interp = Interpreter::new();
        interp.set_policy(Box::new(policy));
        interp.set_limits(config.limits);
        for dir in &config.search_paths {
            interp.registry_mut().add_search_path(dir);
        }
        if let Some(dir) = Config::default_module_dir() {
            interp.registry_mut().add_search_path(dir);
        }
        debug!(search_paths = ?interp.registry().search_paths(), "processor configured");
        Ok(Processor { interp, config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interp
    }

    /// Replace the security policy built from the config.
    pub fn set_policy(&mut self, policy: Box<dyn SecurityPolicy>) {
        self.interp.set_policy(policy);
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.interp.set_global_var(name, value);
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.interp.get_global_var(name)
    }

    pub fn add_search_path(&mut self, dir: impl Into<PathBuf>) {
        self.interp.registry_mut().add_search_path(dir);
    }

    pub fn set_base_dir(&mut self, dir: impl Into<PathBuf>) {
        self.interp.set_base_dir(dir);
    }

    /// Register an in-memory module.  Its imports are recorded as declared
    /// dependencies.
    pub fn register_module(&mut self, name: &str, content: &str) -> Result<(), ModuleError> {
        let mut module = Module::with_content(name, content);
        for dep in imported_modules(&parse_document(content, Some(name)).stmts) {
            module.add_dependency(dep);
        }
        self.interp.registry_mut().register(module)
    }

    // ── Processing ────────────────────────────────────────────────────────────

    /// Process a markdown document.
    pub fn process(&mut self, src: &str) -> ProcessResult {
        self.process_as(src, SourceMode::Document)
    }

    /// Process bare script.
    pub fn process_script(&mut self, src: &str) -> ProcessResult {
        self.process_as(src, SourceMode::Script)
    }

    pub fn process_as(&mut self, src: &str, mode: SourceMode) -> ProcessResult {
        let start = Instant::now();
        let doc = match mode {
            SourceMode::Document => parse_document(src, None),
            SourceMode::Script => parse_script(src, None),
        };
        let mut result = self.run(&doc);
        result.elapsed = start.elapsed();
        info!(
            code = %result.code,
            bytes = result.output.len(),
            elapsed_us = result.elapsed.as_micros() as u64,
            "processed"
        );
        result
    }

    /// Process a file.  Relative paths and module names in it resolve
    /// against the file's directory.
    pub fn process_file(&mut self, path: &Path, mode: SourceMode) -> ProcessResult {
        let src = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                let code = match e.kind() {
                    std::io::ErrorKind::NotFound => ErrorCode::FileNotFound,
                    std::io::ErrorKind::PermissionDenied => ErrorCode::PermissionDenied,
                    _ => ErrorCode::InvalidArgument,
                };
                return ProcessResult {
                    code,
                    message: Some(format!("{}: {e}", path.display())),
                    ..ProcessResult::default()
                };
            }
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            self.interp.set_base_dir(dir);
            self.interp.registry_mut().prepend_search_path(dir);
        }
        let start = Instant::now();
        let name = path.display().to_string();
        let doc = match mode {
            SourceMode::Document => parse_document(&src, Some(&name)),
            SourceMode::Script => parse_script(&src, Some(&name)),
        };
        let mut result = self.run(&doc);
        result.elapsed = start.elapsed();
        info!(file = %name, code = %result.code, "processed");
        result
    }

    fn run(&mut self, doc: &ParsedDocument) -> ProcessResult {
        if self.config.strict {
            if let Some(first) = doc.diagnostics.first() {
                return ProcessResult {
                    code: ErrorCode::ParseError,
                    message: Some(first.to_string()),
                    diagnostics: doc.diagnostics.clone(),
                    ..ProcessResult::default()
                };
            }
        }
        let outcome = self.interp.exec_document(doc);
        let output = self.interp.take_output();
        let diagnostics = self.interp.take_diagnostics();
        match outcome {
            Ok(_) => ProcessResult {
                output,
                diagnostics,
                ..ProcessResult::default()
            },
            Err(e) => {
                warn!(error = %e, "processing failed");
                failure(&e, diagnostics)
            }
        }
    }

    // ── Modules ───────────────────────────────────────────────────────────────

    /// Every registered module, prerequisites first.
    pub fn module_load_order(&self) -> Result<Vec<String>, ModuleError> {
        let mut graph = build_graph(self.interp.registry())?;
        Ok(graph.topological_sort()?.to_vec())
    }

    /// Fail if any declared dependency is not registered.
    pub fn validate_modules(&self) -> Result<(), ModuleError> {
        validate_all(self.interp.registry())
    }
}

fn failure(e: &EvalError, diagnostics: Vec<Diagnostic>) -> ProcessResult {
    ProcessResult {
        output: String::new(),
        code: e.code(),
        message: Some(e.to_string()),
        elapsed: Duration::ZERO,
        diagnostics,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use pretty_assertions::assert_eq;

    #[test]
    fn store_persists_between_calls() {
        let mut p = Processor::new();
        assert!(p.process("<!-- xmd: set x 3 -->\n").is_success());
        let r = p.process("x is {{x}}");
        assert_eq!(r.output, "x is 3");
        assert_eq!(r.code, ErrorCode::Success);
        assert!(r.message.is_none());
    }

    #[test]
    fn preset_variables() {
        let mut p = Processor::new();
        p.set_variable("name", Value::from("World"));
        assert_eq!(p.process("Hello, {{name}}!").output, "Hello, World!");
        assert_eq!(p.variable("name"), Some(&Value::from("World")));
    }

    #[test]
    fn error_leaves_no_partial_output() {
        let mut p = Processor::new();
        let r = p.process("before\n<!-- xmd: import x from nowhere -->\nafter\n");
        assert_eq!(r.output, "");
        assert_eq!(r.code, ErrorCode::ModuleNotFound);
        assert!(r.message.unwrap().contains("nowhere"));
    }

    #[test]
    fn limits_come_from_config() {
        let config = Config {
            limits: Limits {
                max_loop_iterations: 3,
                ..Limits::default()
            },
            ..Config::default()
        };
        let mut p = Processor::with_config(config).unwrap();
        let r = p.process_script("for i in 1..4\n  print i");
        assert_eq!(r.code, ErrorCode::Timeout);
        assert_eq!(r.output, "");
    }

    #[test]
    fn strict_mode_rejects_diagnostics() {
        let mut lenient = Processor::new();
        let r = lenient.process("<!-- xmd: for -->\nok\n");
        assert!(r.is_success());
        assert!(!r.diagnostics.is_empty());

        let config = Config {
            strict: true,
            ..Config::default()
        };
        let mut strict = Processor::with_config(config).unwrap();
        let r = strict.process("<!-- xmd: for -->\nok\n");
        assert_eq!(r.code, ErrorCode::ParseError);
    }

    #[test]
    fn malformed_substitution_is_local() {
        let src = "<!-- xmd: set x 3 -->\nx={{x}}\n\n```sh\necho ${HOME:-/tmp}\n```\n";
        let mut p = Processor::new();
        let r = p.process(src);
        assert_eq!(r.code, ErrorCode::Success);
        assert_eq!(r.output, "x=3\n\n```sh\necho ${HOME:-/tmp}\n```\n");
        assert_eq!(r.diagnostics.len(), 1);
        assert_eq!(r.diagnostics[0].loc.line, 5);

        let config = Config {
            strict: true,
            ..Config::default()
        };
        let r = Processor::with_config(config).unwrap().process(src);
        assert_eq!(r.code, ErrorCode::ParseError);
        let message = r.message.unwrap();
        assert!(message.contains("${HOME:-/tmp}"), "{message}");
        assert!(!message.contains("syntax error: syntax error"));
    }

    #[test]
    fn in_memory_modules_and_load_order() {
        let mut p = Processor::new();
        p.register_module("A", "<!-- xmd: export greeting = \"hi\" -->\n").unwrap();
        p.register_module("B", "<!-- xmd: import greeting from A -->\n{{greeting}}\n")
            .unwrap();
        assert_eq!(p.module_load_order().unwrap(), ["A", "B"]);
        assert_eq!(p.validate_modules(), Ok(()));
        let r = p.process("<!-- xmd: import greeting from A -->\nsays {{greeting}}");
        assert_eq!(r.output, "says hi");
    }

    #[test]
    fn validate_reports_missing_dependency() {
        let mut p = Processor::new();
        p.register_module("M", "<!-- xmd: import x from N -->\n").unwrap();
        assert_eq!(
            p.validate_modules(),
            Err(ModuleError::NotFound { name: "N".into() })
        );
    }

    #[test]
    fn missing_file() {
        let mut p = Processor::new();
        let r = p.process_file(Path::new("/definitely/not/here.md"), SourceMode::Document);
        assert_eq!(r.code, ErrorCode::FileNotFound);
    }
}
