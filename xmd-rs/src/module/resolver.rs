//! Import/export binding between module export tables and a scope.
//!
//! Imported values are shared with the exporter's table, not copied.

use tracing::trace;

use super::registry::ModuleRegistry;
use crate::error::ModuleError;
use crate::script::value::Value;
use crate::store::Store;

/// Bind `symbol` from `module`'s exports into `scope` as `alias` (or its own
/// name).  Unknown module is `NotFound`; a missing export is `Error`.
pub fn import_symbol(
    registry: &ModuleRegistry,
    scope: &mut Store,
    module: &str,
    symbol: &str,
    alias: Option<&str>,
) -> Result<(), ModuleError> {
    let m = registry
        .find(module)
        .ok_or_else(|| ModuleError::NotFound { name: module.to_owned() })?;
    let value = m.exports.get(symbol).ok_or_else(|| {
        ModuleError::Error(format!("module '{module}' does not export '{symbol}'"))
    })?;
    let name = alias.unwrap_or(symbol);
    trace!(module, symbol, name, "import");
    scope.set(name, value.clone());
    Ok(())
}

/// Bind every export of `module` under its own name.  Returns how many
/// symbols were imported.
pub fn import_all_symbols(
    registry: &ModuleRegistry,
    scope: &mut Store,
    module: &str,
) -> Result<usize, ModuleError> {
    let m = registry
        .find(module)
        .ok_or_else(|| ModuleError::NotFound { name: module.to_owned() })?;
    for (name, value) in m.exports.iter() {
        scope.set(name, value.clone());
    }
    trace!(module, count = m.exports.len(), "import *");
    Ok(m.exports.len())
}

/// Write `name = value` into `module`'s own export table.
pub fn export_symbol(
    registry: &mut ModuleRegistry,
    module: &str,
    name: &str,
    value: Value,
) -> Result<(), ModuleError> {
    let m = registry
        .find_mut(module)
        .ok_or_else(|| ModuleError::NotFound { name: module.to_owned() })?;
    trace!(module, name, "export");
    m.exports.set(name, value);
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
