//! XMD script interpreter.
//!
//! The [`Interpreter`] holds one session: global variables, the call-frame
//! stack, user functions and classes, the module registry, and the security
//! policy.  It executes parsed [`Stmt`] trees and implements [`EvalContext`]
//! so the expression evaluator can call back into it for variable lookups,
//! calls, and the sandboxed builtins.
//!
//! Names resolve in the innermost frame, then in globals.  Function and
//! class definitions are session-wide, so a function defined by an imported
//! module is callable by the importer.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, trace, warn};

use super::ast::{
    imported_modules, AssignTarget, Branch, ClassDef, Expr, FileOp, FunctionDef, ImportItems,
    ImportSpec, Lambda, Location, MethodDef, Stmt, StmtKind,
};
use super::builtins::{call_builtin, is_nullary_builtin};
use super::expand::render;
use super::expr::{eval_expr, materialize_range, EvalContext};
use super::fileio;
use super::stmt::{parse_document, parse_script, Diagnostic, ParsedDocument};
use super::value::{Value, CLASS_KEY};
use crate::config::Limits;
use crate::error::{EvalError, ModuleError, ResourceKind};
use crate::module::{
    build_graph, export_symbol, import_all_symbols, import_symbol, DependencyDetector, Module,
    ModuleRegistry,
};
use crate::sandbox::{SandboxPolicy, SecurityPolicy};
use crate::store::Store;

// ── ControlFlow ───────────────────────────────────────────────────────────────

/// Non-error control-flow signals that unwind statement execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlFlow {
    Break,
    Continue,
    Return(Value),
}

// ── Variable scope frame ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Frame {
    locals: Store,
    /// Function or method being run.
    name: String,
    /// Class whose method is running; private methods check this.
    class: Option<String>,
}

/// Session state swapped out while a module body runs.
struct SavedScope {
    globals: Store,
    frames: Vec<Frame>,
    output: String,
    module: Option<String>,
    base_dir: PathBuf,
}

// ── Interpreter ───────────────────────────────────────────────────────────────

pub struct Interpreter {
    globals: Store,
    /// Call frames, innermost last.
    frames: Vec<Frame>,
    functions: HashMap<String, Rc<FunctionDef>>,
    classes: HashMap<String, Rc<ClassDef>>,
    registry: ModuleRegistry,
    policy: Box<dyn SecurityPolicy>,
    limits: Limits,
    /// Rendered text of the current document.
    output: String,
    depth: usize,
    /// Module whose body is being evaluated; `export` writes to its table.
    current_module: Option<String>,
    /// Modules mid-evaluation, outermost first.
    loading: Vec<String>,
    /// Directory relative file paths resolve against.
    base_dir: PathBuf,
    diagnostics: Vec<Diagnostic>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_registry(ModuleRegistry::new())
    }

    pub fn with_registry(registry: ModuleRegistry) -> Self {
        Interpreter {
            globals: Store::new(),
            frames: Vec::new(),
            functions: HashMap::new(),
            classes: HashMap::new(),
            registry,
            policy: Box::new(SandboxPolicy::default()),
            limits: Limits::default(),
            output: String::new(),
            depth: 0,
            current_module: None,
            loading: Vec::new(),
            base_dir: PathBuf::from("."),
            diagnostics: Vec::new(),
        }
    }

    pub fn set_policy(&mut self, policy: Box<dyn SecurityPolicy>) {
        self.policy = policy;
    }

    pub fn set_limits(&mut self, limits: Limits) {
        self.limits = limits;
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ModuleRegistry {
        &mut self.registry
    }

    pub fn set_base_dir(&mut self, dir: impl Into<PathBuf>) {
        self.base_dir = dir.into();
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Set a global variable.
    pub fn set_global_var(&mut self, name: impl Into<String>, value: Value) {
        self.globals.set(name, value);
    }

    /// Get a global variable.
    pub fn get_global_var(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    /// Drain the rendered text.
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    /// Drain the parse diagnostics collected so far.
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    // ── Execution ─────────────────────────────────────────────────────────────

    /// Parse and execute raw script.  Returns the value of a top-level
    /// `return`, or null.
    pub fn exec_script(&mut self, src: &str) -> Result<Value, EvalError> {
        let doc = parse_script(src, None);
        self.exec_document(&doc)
    }

    /// Execute a parsed document.  Top-level functions and classes are
    /// defined before the first statement runs.
    pub fn exec_document(&mut self, doc: &ParsedDocument) -> Result<Value, EvalError> {
        self.diagnostics.extend(doc.diagnostics.iter().cloned());
        for stmt in &doc.stmts {
            match &stmt.kind {
                StmtKind::Function(def) => self.define_function(def),
                StmtKind::Class(def) => self.define_class(def),
                _ => {}
            }
        }
        match self.exec_block(&doc.stmts)? {
            Some(ControlFlow::Return(v)) => Ok(v),
            _ => Ok(Value::Null),
        }
    }

    /// Execute a block of statements.
    pub fn exec_block(&mut self, stmts: &[Stmt]) -> Result<Option<ControlFlow>, EvalError> {
        for stmt in stmts {
            if let Some(cf) = self.exec_stmt(stmt)? {
                return Ok(Some(cf));
            }
        }
        Ok(None)
    }

    /// Execute a single statement.
    pub fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Option<ControlFlow>, EvalError> {
        match &stmt.kind {
            StmtKind::Text(template) => {
                let text = render(template, self)?;
                self.output.push_str(&text);
            }

            StmtKind::Assign { target, value } => {
                let v = eval_expr(value, self)?;
                self.assign(target, v)?;
            }

            StmtKind::Print(expr) => {
                let v = eval_expr(expr, self)?;
                self.output.push_str(&v.to_string());
                self.output.push('\n');
            }

            StmtKind::Expr(expr) => {
                let v = eval_expr(expr, self)?;
                trace!(value = %v, loc = %stmt.loc, "discarding expression result");
            }

            StmtKind::If { branches, otherwise } => {
                self.enter("if")?;
                let flow = self.exec_if(branches, otherwise.as_deref());
                self.leave();
                return flow;
            }

            StmtKind::Loop { var, iterable, body } => {
                self.enter("for")?;
                let flow = self.exec_loop(var, iterable, body);
                self.leave();
                return flow;
            }

            StmtKind::While { cond, body } => {
                self.enter("while")?;
                let flow = self.exec_while(cond, body);
                self.leave();
                return flow;
            }

            StmtKind::Break => return Ok(Some(ControlFlow::Break)),
            StmtKind::Continue => return Ok(Some(ControlFlow::Continue)),
            StmtKind::Return(expr) => {
                let v = match expr {
                    Some(e) => eval_expr(e, self)?,
                    None => Value::Null,
                };
                return Ok(Some(ControlFlow::Return(v)));
            }

            StmtKind::Function(def) => self.define_function(def),
            StmtKind::Class(def) => self.define_class(def),

            StmtKind::Import(spec) => self.exec_import(spec)?,
            StmtKind::Export { name, value } => self.exec_export(name, value.as_ref())?,

            StmtKind::Directive { name, args } => self.exec_directive(name, args, &stmt.loc)?,
        }
        Ok(None)
    }

    fn exec_if(&mut self, branches: &[Branch], otherwise: Option<&[Stmt]>) -> Result<Option<ControlFlow>, EvalError> {
        for branch in branches {
            if eval_expr(&branch.cond, self)?.as_bool() {
                return self.exec_block(&branch.body);
            }
        }
        match otherwise {
            Some(body) => self.exec_block(body),
            None => Ok(None),
        }
    }

    fn define_function(&mut self, def: &Rc<FunctionDef>) {
        trace!(name = %def.name, "define function");
        self.functions.insert(def.name.clone(), Rc::clone(def));
    }

    fn define_class(&mut self, def: &Rc<ClassDef>) {
        trace!(name = %def.name, parent = ?def.parent, "define class");
        self.classes.insert(def.name.clone(), Rc::clone(def));
    }

    // ── Loops ─────────────────────────────────────────────────────────────────

    fn loop_limit(&self) -> EvalError {
        let limit = self.limits.max_loop_iterations;
        warn!(limit, "loop iteration limit reached");
        EvalError::ResourceLimit {
            kind: ResourceKind::LoopIterations,
            limit,
        }
    }

    /// The sequence is materialized once; the loop variable is bound in the
    /// current scope and stays bound afterwards.
    fn exec_loop(&mut self, var: &str, iterable: &Expr, body: &[Stmt]) -> Result<Option<ControlFlow>, EvalError> {
        let items = eval_expr(iterable, self)?.to_items()?;
        if items.len() > self.limits.max_loop_iterations {
            return Err(self.loop_limit());
        }
        for item in items {
            self.set_var(var, item);
            match self.exec_block(body)? {
                Some(ControlFlow::Break) => break,
                Some(ControlFlow::Continue) | None => {}
                Some(ret @ ControlFlow::Return(_)) => return Ok(Some(ret)),
            }
        }
        Ok(None)
    }

    fn exec_while(&mut self, cond: &Expr, body: &[Stmt]) -> Result<Option<ControlFlow>, EvalError> {
        let mut ticks = 0usize;
        while eval_expr(cond, self)?.as_bool() {
            ticks += 1;
            if ticks > self.limits.max_loop_iterations {
                return Err(self.loop_limit());
            }
            match self.exec_block(body)? {
                Some(ControlFlow::Break) => break,
                Some(ControlFlow::Continue) | None => {}
                Some(ret @ ControlFlow::Return(_)) => return Ok(Some(ret)),
            }
        }
        Ok(None)
    }

    // ── Variables ─────────────────────────────────────────────────────────────

    /// Bind in the innermost frame, or globals at top level.
    fn set_var(&mut self, name: &str, value: Value) {
        match self.frames.last_mut() {
            Some(frame) => frame.locals.set(name, value),
            None => self.globals.set(name, value),
        };
    }

    /// Overwrite `name` where it currently lives.
    fn update_var(&mut self, name: &str, value: Value) {
        match self.frames.last_mut() {
            Some(frame) if frame.locals.contains(name) || !self.globals.contains(name) => {
                frame.locals.set(name, value);
            }
            _ => {
                self.globals.set(name, value);
            }
        }
    }

    /// `set name v` binds in the current scope; `set name.field v` updates
    /// the object where it lives.
    fn assign(&mut self, target: &AssignTarget, value: Value) -> Result<(), EvalError> {
        if target.path.is_empty() {
            self.set_var(&target.name, value);
            return Ok(());
        }
        let current = self.get_var(&target.name).unwrap_or_default();
        let updated = current.set_path(&target.path, value)?;
        self.update_var(&target.name, updated);
        Ok(())
    }

    // ── Calls ─────────────────────────────────────────────────────────────────

    fn enter(&mut self, what: &str) -> Result<(), EvalError> {
        let limit = self.limits.max_recursion_depth;
        if self.depth >= limit {
            warn!(what, limit, "recursion depth limit reached");
            return Err(EvalError::ResourceLimit {
                kind: ResourceKind::RecursionDepth,
                limit,
            });
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Run `def` in a fresh frame.  Returns the result and, for methods, the
    /// final value of `self`.
    fn call_function(
        &mut self,
        def: &FunctionDef,
        args: Vec<Value>,
        this: Option<Value>,
        class: Option<&str>,
    ) -> Result<(Value, Option<Value>), EvalError> {
        if args.len() > def.params.len() {
            return Err(EvalError::argument(
                &def.name,
                format!("expected at most {} arguments, got {}", def.params.len(), args.len()),
            ));
        }
        self.enter(&def.name)?;
        trace!(function = %def.name, depth = self.depth, "call");
        let mut frame = Frame {
            locals: Store::new(),
            name: def.name.clone(),
            class: class.map(str::to_owned),
        };
        let mut args = args.into_iter();
        for param in &def.params {
            frame.locals.set(param.as_str(), args.next().unwrap_or_default());
        }
        if let Some(this) = this {
            frame.locals.set("self", this);
        }
        self.frames.push(frame);
        let result = self.exec_block(&def.body);
        let frame = self.frames.pop();
        self.leave();

        let ret = match result? {
            Some(ControlFlow::Return(v)) => v,
            _ => Value::Null,
        };
        let this = frame.and_then(|mut f| {
            trace!(function = %f.name, "return");
            f.locals.remove("self")
        });
        Ok((ret, this))
    }

    /// `class` and its ancestors, nearest first.  Stops at an unknown or
    /// repeated name.
    fn lineage(&self, class: &str) -> Vec<Rc<ClassDef>> {
        let mut chain: Vec<Rc<ClassDef>> = Vec::new();
        let mut next = Some(class.to_owned());
        while let Some(name) = next {
            let Some(def) = self.classes.get(&name) else { break };
            if chain.iter().any(|c| c.name == def.name) {
                break;
            }
            next = def.parent.clone();
            chain.push(Rc::clone(def));
        }
        chain
    }

    fn find_method(&self, class: &str, method: &str) -> Option<(String, MethodDef)> {
        self.lineage(class)
            .into_iter()
            .find_map(|c| c.method(method).map(|m| (c.name.clone(), m.clone())))
    }

    fn find_constructor(&self, class: &str) -> Option<(String, Rc<FunctionDef>)> {
        self.lineage(class)
            .into_iter()
            .find_map(|c| c.constructor.clone().map(|f| (c.name.clone(), f)))
    }

    /// Build an instance and run the nearest constructor on it.
    fn construct(&mut self, class: &ClassDef, args: Vec<Value>) -> Result<Value, EvalError> {
        let mut fields = BTreeMap::new();
        fields.insert(CLASS_KEY.to_owned(), Value::from(class.name.as_str()));
        let instance = Value::from(fields);
        match self.find_constructor(&class.name) {
            Some((owner, ctor)) => {
                let (_, this) = self.call_function(&ctor, args, Some(instance.clone()), Some(owner.as_str()))?;
                Ok(this.unwrap_or(instance))
            }
            None if args.is_empty() => Ok(instance),
            None => Err(EvalError::argument(
                &class.name,
                "class has no constructor but was given arguments",
            )),
        }
    }

    /// `true` while running a method of `owner` or of the receiver's class.
    fn inside_class(&self, owner: &str, class: &str) -> bool {
        self.frames
            .last()
            .and_then(|f| f.class.as_deref())
            .is_some_and(|c| c == owner || c == class)
    }

    /// Builtins that need the session.
    fn call_session_builtin(&mut self, name: &str, args: &[Value]) -> Option<Result<Value, EvalError>> {
        let result = match name {
            "exec" => single(name, args)
                .and_then(|cmd| fileio::exec_command(&*self.policy, &self.base_dir, &cmd.to_string())),
            "load" => single(name, args).and_then(|path| fileio::load_data(&*self.policy, &self.base_dir, path)),
            "range" => match args {
                [start, end] => materialize_range(start, end, false, self.limits.max_loop_iterations),
                _ => Err(EvalError::argument(name, format!("expected 2 arguments, got {}", args.len()))),
            },
            "defined" => single(name, args).map(|v| Value::Bool(self.get_var(&v.to_string()).is_some())),
            _ => return None,
        };
        Some(result)
    }

    // ── Directives ────────────────────────────────────────────────────────────

    fn exec_directive(&mut self, name: &str, args: &[Expr], loc: &Location) -> Result<(), EvalError> {
        let arg = match args.first() {
            Some(e) => eval_expr(e, self)?,
            None => Value::Null,
        };
        match name {
            "exec" => {
                let out = fileio::exec_command(&*self.policy, &self.base_dir, &arg.to_string())?;
                self.output.push_str(&out.to_string());
                Ok(())
            }
            "include" => self.include(&arg),
            other => {
                debug!(directive = other, %loc, "unknown directive");
                Err(EvalError::UnknownFunction(other.to_owned()))
            }
        }
    }

    /// Process another document inline, sharing this scope.
    fn include(&mut self, path: &Value) -> Result<(), EvalError> {
        let content = fileio::file_op(&*self.policy, &self.base_dir, FileOp::Read, path, None)?;
        let name = path.to_string();
        debug!(file = %name, "include");
        let doc = parse_document(&content.to_string(), Some(&name));
        self.enter(&name)?;
        let result = self.exec_document(&doc);
        self.leave();
        result.map(|_| ())
    }

    // ── Modules ───────────────────────────────────────────────────────────────

    fn exec_import(&mut self, spec: &ImportSpec) -> Result<(), EvalError> {
        self.load_module(&spec.module)?;
        let scope = match self.frames.last_mut() {
            Some(frame) => &mut frame.locals,
            None => &mut self.globals,
        };
        match &spec.items {
            ImportItems::All => {
                import_all_symbols(&self.registry, scope, &spec.module)?;
            }
            ImportItems::Symbols(items) => {
                for item in items {
                    import_symbol(&self.registry, scope, &spec.module, &item.name, item.alias.as_deref())?;
                }
            }
        }
        Ok(())
    }

    fn exec_export(&mut self, name: &str, value: Option<&Expr>) -> Result<(), EvalError> {
        let v = match value {
            Some(expr) => {
                let v = eval_expr(expr, self)?;
                self.set_var(name, v.clone());
                v
            }
            None => self.get_var(name).unwrap_or_default(),
        };
        match &self.current_module {
            Some(module) => export_symbol(&mut self.registry, module, name, v)?,
            None => debug!(name, "export outside a module has no effect"),
        }
        Ok(())
    }

    /// Resolve, check, and evaluate module `name`.  A module is evaluated at
    /// most once per session; later calls return immediately.
    pub fn load_module(&mut self, name: &str) -> Result<(), EvalError> {
        match self.registry.find(name) {
            Some(m) if m.is_loaded() => return Ok(()),
            Some(m) if m.is_loading() => {
                let from = self.loading.iter().position(|n| n == name).unwrap_or(0);
                let mut path = self.loading[from..].to_vec();
                path.push(name.to_owned());
                return Err(ModuleError::CircularDependency { path }.into());
            }
            Some(_) => {}
            None => {
                let path = self.registry.resolve_path(name)?;
                self.registry.register(Module::with_path(name, path))?;
            }
        }

        let content = self.registry.load_content(name)?;
        let doc = parse_document(&content, Some(name));
        for dep in imported_modules(&doc.stmts) {
            if !self.registry.contains(&dep) {
                match self.registry.resolve_path(&dep) {
                    Ok(path) => self.registry.register(Module::with_path(dep.as_str(), path))?,
                    Err(e) => debug!(module = name, dependency = %dep, error = %e, "dependency not resolvable yet"),
                }
            }
            if let Some(m) = self.registry.find_mut(name) {
                m.add_dependency(dep);
            }
        }
        DependencyDetector::new(build_graph(&self.registry)?).check_circular_from(name)?;

        debug!(module = name, "evaluating module");
        let dir = self
            .registry
            .find(name)
            .and_then(|m| m.path.as_deref())
            .and_then(Path::parent)
            .map(Path::to_path_buf);
        if let Some(m) = self.registry.find_mut(name) {
            m.set_loading(true);
        }
        self.loading.push(name.to_owned());
        let saved = self.enter_module(name, dir);
        let result = match self.enter(name) {
            Ok(()) => {
                let r = self.exec_document(&doc);
                self.leave();
                r
            }
            Err(e) => Err(e),
        };
        self.leave_module(saved);
        self.loading.pop();

        if let Some(m) = self.registry.find_mut(name) {
            if result.is_ok() {
                m.mark_loaded();
            } else {
                m.set_loading(false);
            }
        }
        result.map(|_| ())
    }

    /// Give the module fresh globals, frames, and output.
    fn enter_module(&mut self, name: &str, dir: Option<PathBuf>) -> SavedScope {
        let base_dir = match dir {
            Some(d) => std::mem::replace(&mut self.base_dir, d),
            None => self.base_dir.clone(),
        };
        SavedScope {
            globals: std::mem::take(&mut self.globals),
            frames: std::mem::take(&mut self.frames),
            output: std::mem::take(&mut self.output),
            module: self.current_module.replace(name.to_owned()),
            base_dir,
        }
    }

    /// Restore the importer's state.  The module's output is discarded.
    fn leave_module(&mut self, saved: SavedScope) {
        self.globals = saved.globals;
        self.frames = saved.frames;
        self.output = saved.output;
        self.current_module = saved.module;
        self.base_dir = saved.base_dir;
    }
}

fn single<'a>(name: &str, args: &'a [Value]) -> Result<&'a Value, EvalError> {
    match args {
        [v] => Ok(v),
        _ => Err(EvalError::argument(name, format!("expected 1 argument, got {}", args.len()))),
    }
}

// ── EvalContext impl ──────────────────────────────────────────────────────────

impl EvalContext for Interpreter {
    fn get_var(&self, name: &str) -> Option<Value> {
        self.frames
            .last()
            .and_then(|f| f.locals.get(name))
            .or_else(|| self.globals.get(name))
            .cloned()
    }

    fn has_callable(&self, name: &str) -> bool {
        self.functions.contains_key(name) || self.classes.contains_key(name) || is_nullary_builtin(name)
    }

    fn call_fn(&mut self, name: &str, args: Vec<Value>, loc: &Location) -> Result<Value, EvalError> {
        if let Some(def) = self.functions.get(name).cloned() {
            return self.call_function(&def, args, None, None).map(|(v, _)| v);
        }
        if let Some(class) = self.classes.get(name).cloned() {
            return self.construct(&class, args);
        }
        if let Some(result) = self.call_session_builtin(name, &args) {
            return result;
        }
        match call_builtin(name, &args) {
            Some(result) => result,
            None => {
                debug!(name, %loc, "unknown function");
                Err(EvalError::UnknownFunction(name.to_owned()))
            }
        }
    }

    fn has_method(&self, receiver: &Value, method: &str) -> bool {
        receiver
            .class_name()
            .is_some_and(|class| self.find_method(class, method).is_some())
    }

    fn call_method(
        &mut self,
        receiver: Value,
        binding: Option<&str>,
        method: &str,
        args: Vec<Value>,
        loc: &Location,
    ) -> Result<Value, EvalError> {
        let Some(class) = receiver.class_name().map(str::to_owned) else {
            return Err(EvalError::UnknownFunction(method.to_owned()));
        };
        let (owner, def) = self
            .find_method(&class, method)
            .ok_or_else(|| EvalError::UnknownFunction(format!("{class}.{method}")))?;
        if def.private && !self.inside_class(&owner, &class) {
            return Err(EvalError::argument(
                method,
                format!("private method of class '{owner}' called from outside it"),
            ));
        }
        trace!(%class, method, %loc, "method call");
        let (ret, this) = self.call_function(&def.func, args, Some(receiver), Some(owner.as_str()))?;
        if let (Some(name), Some(this)) = (binding, this) {
            self.update_var(name, this);
        }
        Ok(ret)
    }

    fn file_op(
        &mut self,
        op: FileOp,
        path: Value,
        content: Option<Value>,
        _loc: &Location,
    ) -> Result<Value, EvalError> {
        fileio::file_op(&*self.policy, &self.base_dir, op, &path, content.as_ref())
    }

    fn call_lambda(&mut self, lambda: &Lambda, args: Vec<Value>, loc: &Location) -> Result<Value, EvalError> {
        if args.len() > lambda.params.len() {
            return Err(EvalError::argument(
                "lambda",
                format!("expected at most {} arguments, got {}", lambda.params.len(), args.len()),
            ));
        }
        self.enter("lambda")?;
        trace!(%loc, depth = self.depth, "lambda call");
        let mut frame = Frame {
            name: "lambda".to_owned(),
            ..Frame::default()
        };
        let mut args = args.into_iter();
        for param in &lambda.params {
            frame.locals.set(param.as_str(), args.next().unwrap_or_default());
        }
        self.frames.push(frame);
        let result = eval_expr(&lambda.body, self);
        self.frames.pop();
        self.leave();
        result
    }

    fn max_iterations(&self) -> usize {
        self.limits.max_loop_iterations
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::MemoryLoader;
    use crate::sandbox::DenyAll;

    fn run(src: &str) -> Interpreter {
        let mut interp = Interpreter::new();
        interp.exec_script(src).expect("exec failed");
        interp
    }

    fn output(src: &str) -> String {
        run(src).take_output()
    }

    fn render_doc(interp: &mut Interpreter, src: &str) -> Result<String, EvalError> {
        interp.exec_document(&parse_document(src, None))?;
        Ok(interp.take_output())
    }

    #[test]
    fn set_then_reference() {
        let mut interp = Interpreter::new();
        let out = render_doc(&mut interp, "<!-- xmd: set x 3 -->\nx is {{x}}\n").unwrap();
        assert_eq!(out, "x is 3\n");
        assert_eq!(interp.get_global_var("x"), Some(&Value::from(3.0)));
    }

    #[test]
    fn print_appends_line() {
        assert_eq!(output("set name \"Ann\"\nprint \"Hi ${name}\""), "Hi Ann\n");
    }

    #[test]
    fn ascending_and_descending_ranges() {
        assert_eq!(output("for i in 1..5\n  print i"), "1\n2\n3\n4\n5\n");
        assert_eq!(output("for i in 5..1\n  print i"), "5\n4\n3\n2\n1\n");
    }

    #[test]
    fn loop_times_and_zero() {
        assert_eq!(output("loop 3 times\n  print \"x\""), "x\nx\nx\n");
        assert_eq!(output("loop 0 times\n  print \"x\""), "");
    }

    #[test]
    fn loop_variable_stays_bound() {
        let interp = run("for v in [\"a\", \"b\"]\n  set last v");
        assert_eq!(interp.get_global_var("v"), Some(&Value::from("b")));
        assert_eq!(interp.get_global_var("last"), Some(&Value::from("b")));
    }

    #[test]
    fn break_and_continue() {
        let src = "for i in 1..6\n  if i == 2\n    continue\n  if i == 4\n    break\n  print i";
        assert_eq!(output(src), "1\n3\n");
    }

    #[test]
    fn while_loop() {
        assert_eq!(output("set i 0\nwhile i < 3\n  set i = i + 1\n  print i"), "1\n2\n3\n");
    }

    #[test]
    fn loop_limit_is_an_error() {
        let mut interp = Interpreter::new();
        interp.set_limits(Limits {
            max_loop_iterations: 5,
            ..Limits::default()
        });
        let err = interp.exec_script("for i in 1..10\n  print i").unwrap_err();
        assert_eq!(
            err,
            EvalError::ResourceLimit {
                kind: ResourceKind::LoopIterations,
                limit: 5
            }
        );
        let err = interp.exec_script("while true\n  set x 1").unwrap_err();
        assert!(err.is_resource_limit());
    }

    #[test]
    fn recursion_limit_is_an_error() {
        let mut interp = Interpreter::new();
        interp.set_limits(Limits {
            max_recursion_depth: 10,
            ..Limits::default()
        });
        let err = interp.exec_script("function down n\n  return down(n + 1)\ndown 0").unwrap_err();
        assert_eq!(
            err,
            EvalError::ResourceLimit {
                kind: ResourceKind::RecursionDepth,
                limit: 10
            }
        );
    }

    #[test]
    fn nested_blocks_count_toward_recursion_limit() {
        fn nested(levels: usize) -> String {
            let mut src = String::new();
            for i in 0..levels {
                src.push_str(&format!("{}if true\n", "  ".repeat(i)));
            }
            src.push_str(&format!("{}print \"deep\"", "  ".repeat(levels)));
            src
        }
        let limits = Limits {
            max_recursion_depth: 5,
            ..Limits::default()
        };

        let mut interp = Interpreter::new();
        interp.set_limits(limits);
        interp.exec_script(&nested(4)).unwrap();
        assert_eq!(interp.take_output(), "deep\n");

        let mut interp = Interpreter::new();
        interp.set_limits(limits);
        let err = interp.exec_script(&nested(8)).unwrap_err();
        assert_eq!(
            err,
            EvalError::ResourceLimit {
                kind: ResourceKind::RecursionDepth,
                limit: 5
            }
        );
        assert_eq!(interp.take_output(), "");
        interp.exec_script("for i in 1..2\n  while false\n    print i").unwrap();
    }

    #[test]
    fn ternary_in_templates() {
        let mut interp = Interpreter::new();
        let out = render_doc(&mut interp, "<!-- xmd: set ok true -->\n{{ ok ? \"y\" : \"n\" }} ${ok ? 1 : 2}\n").unwrap();
        assert_eq!(out, "y 1\n");
    }

    #[test]
    fn lambdas_see_params_and_globals_only() {
        let src = "set rate 3\nset scale = x => x * rate\nfunction f n\n  set local 10\n  set peek = y => local\n  return peek(1)\nprint scale(2)\nprint [1, 2].map(scale)\nprint f(0)";
        assert_eq!(output(src), "6\n3, 6\n\n");
    }

    #[test]
    fn bare_date_is_called() {
        assert_eq!(output("set t Date\nprint type(t)\nprint t > 0"), "number\ntrue\n");
    }

    #[test]
    fn lambda_recursion_is_limited() {
        let mut interp = Interpreter::new();
        interp.set_limits(Limits {
            max_recursion_depth: 10,
            ..Limits::default()
        });
        let err = interp.exec_script("set f = n => f(n + 1)\nf 0").unwrap_err();
        assert!(err.is_resource_limit());
    }

    #[test]
    fn functions_get_their_own_frame() {
        let interp = run("set x 1\nfunction f a\n  set x = a * 2\n  return x\nset y = f(5)");
        assert_eq!(interp.get_global_var("y"), Some(&Value::from(10.0)));
        assert_eq!(interp.get_global_var("x"), Some(&Value::from(1.0)));
    }

    #[test]
    fn function_hoisting_and_space_calls() {
        assert_eq!(
            output("print greet(\"Ann\")\nfunction greet who\n  return \"hi \" + who"),
            "hi Ann\n"
        );
        assert_eq!(output("function add a b\n  return a + b\nset s add 2 3\nprint s"), "5\n");
    }

    #[test]
    fn recursion_within_limit() {
        let src = "function fact n\n  if n <= 1\n    return 1\n  return n * fact(n - 1)\nprint fact(5)";
        assert_eq!(output(src), "120\n");
    }

    #[test]
    fn classes_and_self_write_back() {
        let src = "class Counter\n  constructor start\n    set self.n start\n  method inc\n    set self.n = self.n + 1\n    return self.n\nset c = Counter(5)\nc.inc\nc.inc()\nprint c.n";
        assert_eq!(output(src), "7\n");
    }

    #[test]
    fn inheritance_and_override() {
        let src = "class Animal\n  method speak\n    return \"...\"\n  method name\n    return \"animal\"\nclass Dog extends Animal\n  method speak\n    return \"woof\"\nset d = Dog()\nprint d.speak\nprint d.name";
        assert_eq!(output(src), "woof\nanimal\n");
    }

    #[test]
    fn private_methods() {
        let src = "class Safe\n  private method code\n    return 42\n  method open\n    return self.code\nset s = Safe()\nprint s.open";
        assert_eq!(output(src), "42\n");
        let mut interp = Interpreter::new();
        let err = interp
            .exec_script("class Safe\n  private method code\n    return 42\nset s = Safe()\nprint s.code")
            .unwrap_err();
        assert!(matches!(err, EvalError::Argument { .. }));
    }

    #[test]
    fn field_assignment_updates_global_from_function() {
        let interp = run("set p.name \"Ann\"\nfunction rename\n  set p.name \"Bo\"\nrename()");
        assert_eq!(interp.get_global_var("p").and_then(|p| p.get_field("name")), Some(&Value::from("Bo")));
    }

    #[test]
    fn unknown_function_is_an_error() {
        let mut interp = Interpreter::new();
        assert_eq!(
            interp.exec_script("nosuch(1)").unwrap_err(),
            EvalError::UnknownFunction("nosuch".into())
        );
    }

    #[test]
    fn undefined_identifier_renders_empty() {
        assert_eq!(output("print missing"), "\n");
    }

    #[test]
    fn exec_needs_permission() {
        let mut interp = Interpreter::new();
        let err = interp.exec_script("exec \"echo hi\"").unwrap_err();
        assert!(matches!(err, EvalError::PermissionDenied(_)));
        interp.set_policy(Box::new(SandboxPolicy::permissive()));
        let out = render_doc(&mut interp, "<!-- xmd: exec \"echo hi\" -->\n").unwrap();
        assert_eq!(out, "hi");
    }

    #[test]
    fn file_builtins_respect_policy() {
        let dir = tempfile::tempdir().unwrap();
        let mut interp = Interpreter::new();
        interp.set_base_dir(dir.path());
        interp
            .exec_script("File.write \"note.txt\" \"saved\"\nset t File.read \"note.txt\"")
            .unwrap();
        assert_eq!(interp.get_global_var("t"), Some(&Value::from("saved")));
        interp.set_policy(Box::new(DenyAll));
        assert!(matches!(
            interp.exec_script("File.exists \"note.txt\""),
            Err(EvalError::PermissionDenied(_))
        ));
    }

    #[test]
    fn include_shares_scope() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("part.md"), "Hi {{name}}!\n").unwrap();
        let mut interp = Interpreter::new();
        interp.set_base_dir(dir.path());
        interp.set_global_var("name", Value::from("Ann"));
        let out = render_doc(&mut interp, "<!-- xmd: include \"part.md\" -->\nbye\n").unwrap();
        assert_eq!(out, "Hi Ann!\nbye\n");
    }

    fn memory_interp(files: &[(&str, &str)]) -> Interpreter {
        let mut loader = MemoryLoader::new();
        for (name, content) in files {
            loader.insert(*name, *content);
        }
        Interpreter::with_registry(ModuleRegistry::with_loader(Box::new(loader)))
    }

    #[test]
    fn import_exported_value() {
        let mut interp = memory_interp(&[("A", "<!-- xmd: export greeting = \"hi\" -->\n")]);
        let out = render_doc(&mut interp, "<!-- xmd: import greeting from A -->\n{{greeting}}").unwrap();
        assert_eq!(out, "hi");
        assert!(interp.registry().find("A").is_some_and(|m| m.is_loaded()));
    }

    #[test]
    fn alias_and_star_imports() {
        let module = "```xmd\nset a 1\nset b 2\nexport a\nexport b\n```\n";
        let mut interp = memory_interp(&[("m", module)]);
        interp.exec_script("import a as first from m\nimport * from m").unwrap();
        assert_eq!(interp.get_global_var("first"), Some(&Value::from(1.0)));
        assert_eq!(interp.get_global_var("a"), Some(&Value::from(1.0)));
        assert_eq!(interp.get_global_var("b"), Some(&Value::from(2.0)));
    }

    #[test]
    fn module_scope_is_isolated_and_evaluated_once() {
        let module = "```xmd\nset hidden 1\nexport shown = 2\nprint \"module output\"\n```\n";
        let mut interp = memory_interp(&[("m", module)]);
        interp.exec_script("import shown from m\nimport shown as again from m").unwrap();
        assert!(interp.get_global_var("hidden").is_none());
        assert_eq!(interp.get_global_var("again"), Some(&Value::from(2.0)));
        assert_eq!(interp.take_output(), "");
    }

    #[test]
    fn module_functions_are_shared() {
        let module = "```xmd\nfunction shout s\n  return upper(s)\n```\n";
        let mut interp = memory_interp(&[("util", module)]);
        interp.exec_script("import * from util\nprint shout(\"hey\")").unwrap();
        assert_eq!(interp.take_output(), "HEY\n");
    }

    #[test]
    fn circular_import_names_the_cycle() {
        let mut interp = memory_interp(&[
            ("A", "<!-- xmd: import x from B -->\n"),
            ("B", "<!-- xmd: import y from A -->\n"),
        ]);
        let err = interp.exec_script("import x from A").unwrap_err();
        assert_eq!(
            err,
            EvalError::Module(ModuleError::CircularDependency {
                path: vec!["B".into(), "A".into(), "B".into()]
            })
        );
        assert!(interp.registry().find("A").is_some_and(|m| !m.is_loading()));
    }

    #[test]
    fn missing_module_and_symbol() {
        let mut interp = memory_interp(&[("m", "<!-- xmd: export a = 1 -->")]);
        assert!(matches!(
            interp.exec_script("import a from nope"),
            Err(EvalError::Module(ModuleError::NotFound { .. }))
        ));
        assert!(matches!(
            interp.exec_script("import zzz from m"),
            Err(EvalError::Module(ModuleError::Error(_)))
        ));
    }

    #[test]
    fn export_outside_module_binds_locally() {
        let interp = run("export answer = 42");
        assert_eq!(interp.get_global_var("answer"), Some(&Value::from(42.0)));
    }

    #[test]
    fn session_builtins() {
        assert_eq!(output("print join(range(1, 3), \"-\")"), "1-2-3\n");
        assert_eq!(output("set x 1\nprint defined(\"x\")\nprint defined(\"y\")"), "true\nfalse\n");
    }
}
