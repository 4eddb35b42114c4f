//! Configuration file parser and `XMD_*` environment overrides.
//!
//! One setting per line:
//!
//! | Form | Example |
//! |------|---------|
//! | `key = value` | `max_loop_iterations = 500` |
//! | `set key value` | `set allow_exec true` |
//! | Lines starting with `#` or `;` | comment, ignored |
//!
//! | Key | Type | Default |
//! |-----|------|---------|
//! | `max_recursion_depth` | count | 100 |
//! | `max_loop_iterations` | count | 10000 |
//! | `module_path` | comma list, appended | empty |
//! | `sandbox` | bool | true |
//! | `allow_file_access` / `allow_file_write` / `allow_exec` | bool | true / true / false |
//! | `allowed_paths` / `exec_whitelist` / `exec_blacklist` | comma list | empty |
//! | `strict` | bool | false |
//!
//! Bad lines are collected as [`ConfigError`]s; the rest of the file still
//! loads.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use thiserror::Error;

use crate::pattern::Pattern;

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("line {line}: {message}")]
    Line { line: usize, message: String },
    #[error("{var}: {message}")]
    Env { var: String, message: String },
}

/// Evaluation guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_recursion_depth: usize,
    pub max_loop_iterations: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_recursion_depth: 100,
            max_loop_iterations: 10_000,
        }
    }
}

/// Settings for [`SandboxPolicy`](crate::sandbox::SandboxPolicy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    pub enabled: bool,
    pub allow_file_access: bool,
    pub allow_file_write: bool,
    pub allow_exec: bool,
    pub allowed_paths: Vec<String>,
    pub exec_whitelist: Vec<String>,
    pub exec_blacklist: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            enabled: true,
            allow_file_access: true,
            allow_file_write: true,
            allow_exec: false,
            allowed_paths: Vec::new(),
            exec_whitelist: Vec::new(),
            exec_blacklist: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub limits: Limits,
    pub search_paths: Vec<PathBuf>,
    pub sandbox: SandboxConfig,
    /// Parse diagnostics fail processing with `ParseError`.
    pub strict: bool,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config string.  Returns the config and any per-line errors.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let errors = config.merge_str(s);
        (config, errors)
    }

    /// Read and parse a config file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }

    /// Apply the settings in `s` on top of `self`.
    pub fn merge_str(&mut self, s: &str) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        for (i, raw) in s.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let (key, value) = match split_setting(line) {
                Some(kv) => kv,
                None => {
                    errors.push(ConfigError::Line {
                        line: i + 1,
                        message: format!("expected `key = value`, got {line:?}"),
                    });
                    continue;
                }
            };
            if let Err(message) = self.set(key, value) {
                errors.push(ConfigError::Line { line: i + 1, message });
            }
        }
        errors
    }

    /// Set one key.  Lists replace the current value except `module_path`,
    /// which appends.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "max_recursion_depth" => self.limits.max_recursion_depth = parse_count(key, value)?,
            "max_loop_iterations" => self.limits.max_loop_iterations = parse_count(key, value)?,
            "module_path" | "search_paths" => {
                self.search_paths.extend(parse_list(value).into_iter().map(PathBuf::from));
            }
            "sandbox" | "enable_sandbox" => self.sandbox.enabled = parse_bool(key, value)?,
            "allow_file_access" => self.sandbox.allow_file_access = parse_bool(key, value)?,
            "allow_file_write" => self.sandbox.allow_file_write = parse_bool(key, value)?,
            "allow_exec" => self.sandbox.allow_exec = parse_bool(key, value)?,
            "allowed_paths" => {
                let paths = parse_list(value);
                for p in &paths {
                    Pattern::parse(p).map_err(|e| format!("{key}: {e}"))?;
                }
                self.sandbox.allowed_paths = paths;
            }
            "exec_whitelist" => self.sandbox.exec_whitelist = parse_list(value),
            "exec_blacklist" => self.sandbox.exec_blacklist = parse_list(value),
            "strict" => self.strict = parse_bool(key, value)?,
            _ => return Err(format!("unknown setting '{key}'")),
        }
        Ok(())
    }

    /// Apply `XMD_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Vec<ConfigError> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    /// Apply `XMD_*` overrides using `lookup` as the environment.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Vec<ConfigError> {
        const VARS: &[(&str, &str)] = &[
            ("XMD_MAX_RECURSION_DEPTH", "max_recursion_depth"),
            ("XMD_MAX_LOOP_ITERATIONS", "max_loop_iterations"),
            ("XMD_ENABLE_SANDBOX", "sandbox"),
            ("XMD_ALLOW_FILE_ACCESS", "allow_file_access"),
            ("XMD_ALLOW_EXEC", "allow_exec"),
        ];
        let mut errors = Vec::new();
        for (var, key) in VARS {
            let Some(value) = lookup(var) else { continue };
            if let Err(message) = self.set(key, &value) {
                errors.push(ConfigError::Env {
                    var: (*var).to_owned(),
                    message,
                });
            }
        }
        if let Some(paths) = lookup("XMD_MODULE_PATH") {
            self.search_paths.extend(
                paths
                    .split(':')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from),
            );
        }
        errors
    }

    /// `config.conf` in the platform configuration directory.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "xmd").map(|dirs| dirs.config_dir().join("config.conf"))
    }

    /// Per-user module directory, searched after configured paths.
    pub fn default_module_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "xmd").map(|dirs| dirs.data_dir().join("modules"))
    }
}

// ── Value parsers ─────────────────────────────────────────────────────────────

/// `key = value` or `set key value`.
fn split_setting(line: &str) -> Option<(&str, &str)> {
    if let Some((key, value)) = line.split_once('=') {
        let key = key.trim();
        return (!key.is_empty() && !key.contains(char::is_whitespace)).then(|| (key, value.trim()));
    }
    let rest = line.strip_prefix("set")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let (key, value) = rest.trim().split_once(char::is_whitespace)?;
    Some((key, value.trim()))
}

fn parse_count(key: &str, value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("{key} must be a positive integer, got {value:?}")),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(format!("{key} must be a boolean, got {value:?}")),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
