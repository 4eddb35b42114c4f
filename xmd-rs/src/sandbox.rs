//! Security gate for filesystem and process side effects.
//!
//! Every `File.*` builtin, `exec`, `load`, and `include` asks a
//! [`SecurityPolicy`] before touching the outside world.  A denial becomes
//! [`EvalError::PermissionDenied`](crate::error::EvalError::PermissionDenied).
//!
//! | Policy | Behaviour |
//! |--------|-----------|
//! | [`SandboxPolicy`] | configured from [`SandboxConfig`] |
//! | [`SandboxPolicy::permissive`] | approves everything |
//! | [`DenyAll`] | refuses everything |

use std::path::{Component, Path};

use thiserror::Error;
use tracing::debug;

use crate::config::SandboxConfig;
use crate::pattern::{Pattern, PatternError};

// ── Requests ──────────────────────────────────────────────────────────────────

/// A side effect awaiting approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    /// Read or stat a file (`File.read`, `File.exists`, `load`, `include`).
    FileRead(&'a Path),
    FileWrite(&'a Path),
    FileDelete(&'a Path),
    FileList(&'a Path),
    /// Run a shell command line.
    Exec(&'a str),
}

impl Request<'_> {
    fn describe(&self) -> String {
        match self {
            Request::FileRead(p) => format!("read {}", p.display()),
            Request::FileWrite(p) => format!("write {}", p.display()),
            Request::FileDelete(p) => format!("delete {}", p.display()),
            Request::FileList(p) => format!("list {}", p.display()),
            Request::Exec(cmd) => format!("exec {cmd:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{request}: {reason}")]
pub struct Denied {
    pub request: String,
    pub reason: String,
}

impl Denied {
    fn new(request: &Request<'_>, reason: impl Into<String>) -> Self {
        Denied {
            request: request.describe(),
            reason: reason.into(),
        }
    }
}

/// Approves or refuses side effects.
pub trait SecurityPolicy {
    fn check(&self, request: &Request<'_>) -> Result<(), Denied>;
}

// ── Policies ──────────────────────────────────────────────────────────────────

pub struct DenyAll;

impl SecurityPolicy for DenyAll {
    fn check(&self, request: &Request<'_>) -> Result<(), Denied> {
        Err(Denied::new(request, "all side effects are disabled"))
    }
}

/// Policy built from the `sandbox` configuration block.
#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    enabled: bool,
    allow_read: bool,
    allow_write: bool,
    allow_exec: bool,
    /// Empty means every path is reachable.
    allowed_paths: Vec<Pattern>,
    exec_whitelist: Vec<Pattern>,
    exec_blacklist: Vec<Pattern>,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        let cfg = SandboxConfig::default();
        SandboxPolicy {
            enabled: cfg.enabled,
            allow_read: cfg.allow_file_access,
            allow_write: cfg.allow_file_write,
            allow_exec: cfg.allow_exec,
            allowed_paths: Vec::new(),
            exec_whitelist: Vec::new(),
            exec_blacklist: Vec::new(),
        }
    }
}

impl SandboxPolicy {
    pub fn from_config(cfg: &SandboxConfig) -> Result<Self, PatternError> {
        let compile = |list: &[String]| -> Result<Vec<Pattern>, PatternError> {
            list.iter().map(|s| Pattern::parse(s)).collect()
        };
        Ok(SandboxPolicy {
            enabled: cfg.enabled,
            allow_read: cfg.allow_file_access,
            allow_write: cfg.allow_file_access && cfg.allow_file_write,
            allow_exec: cfg.allow_exec,
            allowed_paths: compile(&cfg.allowed_paths)?,
            exec_whitelist: compile(&cfg.exec_whitelist)?,
            exec_blacklist: compile(&cfg.exec_blacklist)?,
        })
    }

    /// A disabled sandbox: every request is approved.
    pub fn permissive() -> Self {
        SandboxPolicy {
            enabled: false,
            allow_read: true,
            allow_write: true,
            allow_exec: true,
            allowed_paths: Vec::new(),
            exec_whitelist: Vec::new(),
            exec_blacklist: Vec::new(),
        }
    }

    fn check_path(&self, request: &Request<'_>, path: &Path, allowed: bool) -> Result<(), Denied> {
        if !allowed {
            return Err(Denied::new(request, "file access is disabled"));
        }
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(Denied::new(request, "path escapes with '..'"));
        }
        if self.allowed_paths.is_empty() {
            return Ok(());
        }
        let text = path.to_string_lossy();
        let text = text.strip_prefix("./").unwrap_or(&text);
        if self.allowed_paths.iter().any(|p| p.matches_path(text)) {
            Ok(())
        } else {
            Err(Denied::new(request, "path is outside allowed_paths"))
        }
    }

    fn check_exec(&self, request: &Request<'_>, cmd: &str) -> Result<(), Denied> {
        if !self.allow_exec {
            return Err(Denied::new(request, "command execution is disabled"));
        }
        let program = cmd.split_whitespace().next().unwrap_or("");
        let base = program.rsplit('/').next().unwrap_or(program);
        let hit = |p: &Pattern| p.matches(program) || p.matches(base);
        if self.exec_blacklist.iter().any(hit) {
            return Err(Denied::new(request, format!("'{base}' is blacklisted")));
        }
        if !self.exec_whitelist.is_empty() && !self.exec_whitelist.iter().any(hit) {
            return Err(Denied::new(request, format!("'{base}' is not whitelisted")));
        }
        Ok(())
    }
}

impl SecurityPolicy for SandboxPolicy {
    fn check(&self, request: &Request<'_>) -> Result<(), Denied> {
        if !self.enabled {
            return Ok(());
        }
        let result = match *request {
            Request::FileRead(p) | Request::FileList(p) => self.check_path(request, p, self.allow_read),
            Request::FileWrite(p) | Request::FileDelete(p) => {
                self.check_path(request, p, self.allow_write)
            }
            Request::Exec(cmd) => self.check_exec(request, cmd),
        };
        if let Err(ref denied) = result {
            debug!(%denied, "sandbox refused request");
        }
        result
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(edit: impl FnOnce(&mut SandboxConfig)) -> SandboxPolicy {
        let mut cfg = SandboxConfig::default();
        edit(&mut cfg);
        SandboxPolicy::from_config(&cfg).unwrap()
    }

    #[test]
    fn default_allows_files_but_not_exec() {
        let p = SandboxPolicy::default();
        assert!(p.check(&Request::FileRead(Path::new("notes.md"))).is_ok());
        assert!(p.check(&Request::FileWrite(Path::new("out.md"))).is_ok());
        assert!(p.check(&Request::Exec("echo hi")).is_err());
    }

    #[test]
    fn parent_dir_rejected() {
        let p = SandboxPolicy::default();
        let err = p.check(&Request::FileRead(Path::new("../secret"))).unwrap_err();
        assert_eq!(err.reason, "path escapes with '..'");
    }

    #[test]
    fn allowed_paths_restrict() {
        let p = policy(|c| c.allowed_paths = vec!["docs".into(), "data/*.json".into()]);
        assert!(p.check(&Request::FileRead(Path::new("docs/a/b.md"))).is_ok());
        assert!(p.check(&Request::FileRead(Path::new("./data/x.json"))).is_ok());
        assert!(p.check(&Request::FileRead(Path::new("src/main.rs"))).is_err());
    }

    #[test]
    fn write_can_be_disabled_separately() {
        let p = policy(|c| c.allow_file_write = false);
        assert!(p.check(&Request::FileRead(Path::new("a"))).is_ok());
        assert!(p.check(&Request::FileDelete(Path::new("a"))).is_err());
    }

    #[test]
    fn exec_lists() {
        let p = policy(|c| {
            c.allow_exec = true;
            c.exec_whitelist = vec!["echo".into(), "date".into()];
        });
        assert!(p.check(&Request::Exec("echo hi")).is_ok());
        assert!(p.check(&Request::Exec("/bin/echo hi")).is_ok());
        assert!(p.check(&Request::Exec("rm -rf x")).is_err());

        let p = policy(|c| {
            c.allow_exec = true;
            c.exec_blacklist = vec!["rm".into()];
        });
        assert!(p.check(&Request::Exec("ls")).is_ok());
        assert!(p.check(&Request::Exec("rm x")).is_err());
    }

    #[test]
    fn disabled_sandbox_and_deny_all() {
        let p = policy(|c| c.enabled = false);
        assert!(p.check(&Request::Exec("anything")).is_ok());
        assert!(p.check(&Request::FileRead(Path::new("../x"))).is_ok());
        assert!(DenyAll.check(&Request::FileRead(Path::new("a"))).is_err());
    }
}
