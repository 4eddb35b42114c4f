//! Module registry and name → file resolution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::debug;

use crate::error::ModuleError;
use crate::store::Store;

// ── Module ────────────────────────────────────────────────────────────────────

/// A named, file-backed unit with its own export table.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub name: String,
    /// Resolved source path; `None` until resolved (or for in-memory modules).
    pub path: Option<PathBuf>,
    content: Option<Rc<str>>,
    pub exports: Store,
    /// Declared dependencies in declaration order, without duplicates.
    pub dependencies: Vec<String>,
    loaded: bool,
    loading: bool,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            ..Module::default()
        }
    }

    pub fn with_path(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Module {
            path: Some(path.into()),
            ..Module::new(name)
        }
    }

    /// A module whose source is already in memory.
    pub fn with_content(name: impl Into<String>, content: &str) -> Self {
        Module {
            content: Some(Rc::from(content)),
            ..Module::new(name)
        }
    }

    pub fn add_dependency(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.dependencies.contains(&name) {
            self.dependencies.push(name);
        }
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
    }

    /// Mark evaluation finished.  A loaded module is never evaluated again.
    pub fn mark_loaded(&mut self) {
        self.loading = false;
        self.loaded = true;
    }
}

// ── Loaders ───────────────────────────────────────────────────────────────────

/// Resolves module names to sources.  The registry only needs
/// "name → path" and "path → text"; the walk itself can be swapped.
pub trait ModuleLoader {
    fn resolve(&self, name: &str, search_paths: &[PathBuf]) -> Option<PathBuf>;
    fn read(&self, path: &Path) -> Result<String, ModuleError>;
}

/// Filesystem loader: `<dir>/<name>.xmd`, then `<dir>/<name>` for each
/// search path, then `name` itself as a path.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLoader;

impl ModuleLoader for FsLoader {
    fn resolve(&self, name: &str, search_paths: &[PathBuf]) -> Option<PathBuf> {
        let direct = Path::new(name);
        if direct.is_absolute() {
            return direct.is_file().then(|| direct.to_path_buf());
        }
        for dir in search_paths {
            let with_ext = dir.join(format!("{name}.xmd"));
            if with_ext.is_file() {
                return Some(with_ext);
            }
            let bare = dir.join(name);
            if bare.is_file() {
                return Some(bare);
            }
        }
        direct.is_file().then(|| direct.to_path_buf())
    }

    fn read(&self, path: &Path) -> Result<String, ModuleError> {
        std::fs::read_to_string(path).map_err(|e| {
            ModuleError::Error(format!("cannot read {}: {e}", path.display()))
        })
    }
}

/// In-memory loader keyed by path text, following the same lookup order as
/// [`FsLoader`].
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    files: HashMap<PathBuf, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }
}

impl ModuleLoader for MemoryLoader {
    fn resolve(&self, name: &str, search_paths: &[PathBuf]) -> Option<PathBuf> {
        search_paths
            .iter()
            .flat_map(|dir| [dir.join(format!("{name}.xmd")), dir.join(name)])
            .chain(std::iter::once(PathBuf::from(name)))
            .find(|p| self.files.contains_key(p))
    }

    fn read(&self, path: &Path) -> Result<String, ModuleError> {
        self.files.get(path).cloned().ok_or_else(|| ModuleError::NotFound {
            name: path.display().to_string(),
        })
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Owns every module of a session.  Names are unique.
pub struct ModuleRegistry {
    modules: Vec<Module>,
    by_name: HashMap<String, usize>,
    search_paths: Vec<PathBuf>,
    loader: Box<dyn ModuleLoader>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.modules.iter().map(|m| &m.name).collect::<Vec<_>>())
            .field("search_paths", &self.search_paths)
            .finish()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::with_loader(Box::new(FsLoader))
    }

    pub fn with_loader(loader: Box<dyn ModuleLoader>) -> Self {
        ModuleRegistry {
            modules: Vec::new(),
            by_name: HashMap::new(),
            search_paths: Vec::new(),
            loader,
        }
    }

    /// Add a module.  A duplicate name leaves the registry unchanged.
    pub fn register(&mut self, module: Module) -> Result<(), ModuleError> {
        if self.by_name.contains_key(&module.name) {
            return Err(ModuleError::AlreadyLoaded { name: module.name });
        }
        debug!(module = %module.name, "registered module");
        self.by_name.insert(module.name.clone(), self.modules.len());
        self.modules.push(module);
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&Module> {
        self.by_name.get(name).map(|&i| &self.modules[i])
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Module> {
        self.by_name.get(name).map(|&i| &mut self.modules[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Modules in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    pub fn add_search_path(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.search_paths.contains(&path) {
            self.search_paths.push(path);
        }
    }

    /// Search `path` before every existing search path.
    pub fn prepend_search_path(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.search_paths.retain(|p| *p != path);
        self.search_paths.insert(0, path);
    }

    /// Resolve a module name or relative path to a source file.
    pub fn resolve_path(&self, name: &str) -> Result<PathBuf, ModuleError> {
        if name.trim().is_empty() || name.contains('\0') {
            return Err(ModuleError::InvalidPath { path: name.to_owned() });
        }
        let found = self.loader.resolve(name, &self.search_paths);
        debug!(module = name, path = ?found, "resolved module path");
        found.ok_or_else(|| ModuleError::NotFound { name: name.to_owned() })
    }

    /// Return the module's source, reading it on first use.
    pub fn load_content(&mut self, name: &str) -> Result<Rc<str>, ModuleError> {
        let module = self
            .find(name)
            .ok_or_else(|| ModuleError::NotFound { name: name.to_owned() })?;
        if let Some(content) = &module.content {
            return Ok(Rc::clone(content));
        }
        let path = match &module.path {
            Some(p) => p.clone(),
            None => self.resolve_path(name)?,
        };
        let text: Rc<str> = Rc::from(self.loader.read(&path)?);
        if let Some(module) = self.find_mut(name) {
            module.path = Some(path);
            module.content = Some(Rc::clone(&text));
        }
        Ok(text)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
