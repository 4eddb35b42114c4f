//! Builtins with side effects: `File.*`, `exec`, and structured-data `load`.
//!
//! Every operation asks the [`SecurityPolicy`] first.  Relative paths are
//! checked as written and then resolved against the document's base
//! directory.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use super::ast::FileOp;
use super::value::Value;
use crate::error::EvalError;
use crate::sandbox::{Request, SecurityPolicy};

fn approve(policy: &dyn SecurityPolicy, request: Request<'_>) -> Result<(), EvalError> {
    policy
        .check(&request)
        .map_err(|denied| EvalError::PermissionDenied(denied.to_string()))
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn io_error(path: &Path, e: io::Error) -> EvalError {
    if e.kind() == io::ErrorKind::NotFound {
        EvalError::FileNotFound(path.display().to_string())
    } else {
        EvalError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        }
    }
}

fn path_arg(op: &str, path: &Value) -> Result<PathBuf, EvalError> {
    match path {
        Value::Str(s) if !s.is_empty() => Ok(PathBuf::from(s.as_ref())),
        other => Err(EvalError::argument(
            op,
            format!("expected a path, got {}", other.type_name()),
        )),
    }
}

/// Perform a `File.*` operation.
///
/// | Op | Result |
/// |----|--------|
/// | `read` | file contents |
/// | `write` | `true`; parent directories are not created |
/// | `exists` | bool |
/// | `delete` | `true` |
/// | `list` | sorted entry names |
pub fn file_op(
    policy: &dyn SecurityPolicy,
    base: &Path,
    op: FileOp,
    path: &Value,
    content: Option<&Value>,
) -> Result<Value, EvalError> {
    let rel = path_arg(op.name(), path)?;
    let full = resolve(base, &rel);
    debug!(op = op.name(), path = %full.display(), "file operation");
    match op {
        FileOp::Read => {
            approve(policy, Request::FileRead(&rel))?;
            std::fs::read_to_string(&full)
                .map(Value::from)
                .map_err(|e| io_error(&rel, e))
        }
        FileOp::Write => {
            approve(policy, Request::FileWrite(&rel))?;
            let text = content.map(Value::to_string).unwrap_or_default();
            std::fs::write(&full, text).map_err(|e| io_error(&rel, e))?;
            Ok(Value::Bool(true))
        }
        FileOp::Exists => {
            approve(policy, Request::FileRead(&rel))?;
            Ok(Value::Bool(full.exists()))
        }
        FileOp::Delete => {
            approve(policy, Request::FileDelete(&rel))?;
            std::fs::remove_file(&full).map_err(|e| io_error(&rel, e))?;
            Ok(Value::Bool(true))
        }
        FileOp::List => {
            approve(policy, Request::FileList(&rel))?;
            let mut names = Vec::new();
            for entry in std::fs::read_dir(&full).map_err(|e| io_error(&rel, e))? {
                let entry = entry.map_err(|e| io_error(&rel, e))?;
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
            names.sort();
            Ok(Value::from(names.into_iter().map(Value::from).collect::<Vec<_>>()))
        }
    }
}

/// Run `cmd` through `sh -c` and return its stdout without the trailing
/// newline.
pub fn exec_command(policy: &dyn SecurityPolicy, base: &Path, cmd: &str) -> Result<Value, EvalError> {
    approve(policy, Request::Exec(cmd))?;
    debug!(%cmd, "exec");
    let mut command = Command::new("sh");
    command.arg("-c").arg(cmd);
    if base.is_dir() {
        command.current_dir(base);
    }
    let out = command
        .output()
        .map_err(|e| EvalError::CommandFailed(format!("{cmd}: {e}")))?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        let status = out
            .status
            .code()
            .map_or_else(|| "signal".to_owned(), |c| c.to_string());
        return Err(EvalError::CommandFailed(format!(
            "{cmd}: exit status {status}: {}",
            stderr.trim_end()
        )));
    }
    let text = String::from_utf8_lossy(&out.stdout);
    Ok(Value::from(text.trim_end_matches(['\n', '\r'])))
}

/// Import a structured data file.  `.yaml` and `.yml` files are decoded with
/// `serde_yaml`, everything else as JSON.
pub fn load_data(policy: &dyn SecurityPolicy, base: &Path, path: &Value) -> Result<Value, EvalError> {
    let rel = path_arg("load", path)?;
    let ext = rel
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    approve(policy, Request::FileRead(&rel))?;
    let text = std::fs::read_to_string(resolve(base, &rel)).map_err(|e| io_error(&rel, e))?;
    let import_error = |e: &dyn std::fmt::Display| EvalError::DataImport(format!("{}: {e}", rel.display()));
    let json: serde_json::Value = if ext == "yaml" || ext == "yml" {
        serde_yaml::from_str(&text).map_err(|e| import_error(&e))?
    } else {
        serde_json::from_str(&text).map_err(|e| import_error(&e))?
    };
    Ok(Value::from_json(&json))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
