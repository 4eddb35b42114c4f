//! Path patterns for sandbox allow-lists and exec white/black lists.
//!
//! ## Match modes
//!
//! | Mode | Written as | Description |
//! |------|------------|-------------|
//! | [`MatchMode::Exact`]  | `docs/a.md`     | Whole-string comparison |
//! | [`MatchMode::Glob`]   | `docs/**/*.md`  | `*` (one path component), `**` (any depth), `?`, `[…]` |
//! | [`MatchMode::Regexp`] | `re:^docs/.*$`  | [`regex`] crate, unanchored unless the pattern anchors |
//!
//! [`Pattern::parse`] picks the mode from the text; [`Pattern::new`] takes it
//! explicitly.

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;

/// Deepest nesting of `*` the glob matcher will follow.
const MAX_GLOB_DEPTH: usize = 64;

// ── Public types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Exact,
    Glob,
    Regexp,
}

/// Error returned when a pattern cannot be compiled.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("regex error: {0}")]
    InvalidRegex(#[from] regex::Error),
    #[error("glob error: {0}")]
    InvalidGlob(String),
}

// Arc so cloning a pattern never recompiles the regex.
#[derive(Clone)]
enum Compiled {
    Exact,
    Glob,
    Regex(Arc<Regex>),
}

/// A compiled pattern ready for matching.
#[derive(Clone)]
pub struct Pattern {
    src: String,
    mode: MatchMode,
    compiled: Compiled,
}

impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pattern")
            .field("src", &self.src)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Pattern {
    /// Compile `src` using `mode`.
    pub fn new(src: &str, mode: MatchMode) -> Result<Self, PatternError> {
        let compiled = match mode {
            MatchMode::Exact => Compiled::Exact,
            MatchMode::Glob => {
                check_glob(src).map_err(PatternError::InvalidGlob)?;
                Compiled::Glob
            }
            MatchMode::Regexp => Compiled::Regex(Arc::new(Regex::new(src)?)),
        };
        Ok(Self {
            src: src.to_owned(),
            mode,
            compiled,
        })
    }

    /// `re:` prefix → regexp; any of `* ? [` → glob; otherwise exact.
    pub fn parse(src: &str) -> Result<Self, PatternError> {
        if let Some(re) = src.strip_prefix("re:") {
            return Self::new(re, MatchMode::Regexp);
        }
        if src.contains(|c| matches!(c, '*' | '?' | '[')) {
            return Self::new(src, MatchMode::Glob);
        }
        Self::new(src, MatchMode::Exact)
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn matches(&self, text: &str) -> bool {
        match &self.compiled {
            Compiled::Exact => self.src == text,
            Compiled::Glob => glob_match(&self.src, text),
            Compiled::Regex(re) => re.is_match(text),
        }
    }

    /// `true` if `text` is matched by this pattern or lies beneath a
    /// directory it matches exactly (`docs` admits `docs/a.md`).
    pub fn matches_path(&self, text: &str) -> bool {
        if self.matches(text) {
            return true;
        }
        let prefix = self.src.trim_end_matches('/');
        self.mode == MatchMode::Exact
            && !prefix.is_empty()
            && text
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

// ── Glob matching ────────────────────────────────────────────────────────────

/// Match `text` against glob `pat`.  `*` and `?` never match `/`; `**`
/// matches any run of characters including `/`.
pub fn glob_match(pat: &str, text: &str) -> bool {
    let pat: Vec<char> = pat.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let mut glob = Glob {
        pat: &pat,
        text: &text,
        failed: HashSet::new(),
    };
    glob.at(0, 0, 0)
}

/// Backtracking matcher.  `failed` memoizes `(pattern, text)` positions
/// already known not to match, which keeps runs of `*` polynomial.
struct Glob<'a> {
    pat: &'a [char],
    text: &'a [char],
    failed: HashSet<(usize, usize)>,
}

impl Glob<'_> {
    fn at(&mut self, p: usize, t: usize, depth: usize) -> bool {
        if depth > MAX_GLOB_DEPTH || self.failed.contains(&(p, t)) {
            return false;
        }
        let ok = self.step(p, t, depth);
        if !ok {
            self.failed.insert((p, t));
        }
        ok
    }

    fn step(&mut self, mut p: usize, mut t: usize, depth: usize) -> bool {
        let (pat, text) = (self.pat, self.text);
        while p < pat.len() {
            match pat[p] {
                '*' => {
                    let deep = pat.get(p + 1) == Some(&'*');
                    let mut rest = p + if deep { 2 } else { 1 };
                    // `**/` also matches zero directories.
                    if deep && pat.get(rest) == Some(&'/') && self.at(rest + 1, t, depth + 1) {
                        return true;
                    }
                    while pat.get(rest) == Some(&'*') {
                        rest += 1;
                    }
                    let mut i = t;
                    loop {
                        if self.at(rest, i, depth + 1) {
                            return true;
                        }
                        if i >= text.len() || (!deep && text[i] == '/') {
                            return false;
                        }
                        i += 1;
                    }
                }
                '?' => {
                    if t >= text.len() || text[t] == '/' {
                        return false;
                    }
                    p += 1;
                    t += 1;
                }
                '[' => {
                    let Some(&ch) = text.get(t) else { return false };
                    match class_match(&pat[p + 1..], ch) {
                        Some((true, used)) => {
                            p += used + 1;
                            t += 1;
                        }
                        _ => return false,
                    }
                }
                '\\' if p + 1 < pat.len() => {
                    if text.get(t) != Some(&pat[p + 1]) {
                        return false;
                    }
                    p += 2;
                    t += 1;
                }
                c => {
                    if text.get(t) != Some(&c) {
                        return false;
                    }
                    p += 1;
                    t += 1;
                }
            }
        }
        t == text.len()
    }
}

/// Match `ch` against the class body following `[`.  Returns whether it
/// matched and how many pattern chars the class used (including `]`).
fn class_match(class: &[char], ch: char) -> Option<(bool, usize)> {
    let mut i = 0;
    let negate = matches!(class.first(), Some('!') | Some('^'));
    if negate {
        i += 1;
    }
    let mut matched = false;
    let mut first = true;
    while i < class.len() {
        let c = class[i];
        if c == ']' && !first {
            return Some((matched != negate, i + 1));
        }
        first = false;
        let lo = if c == '\\' {
            i += 1;
            *class.get(i)?
        } else {
            c
        };
        if class.get(i + 1) == Some(&'-') && class.get(i + 2).is_some_and(|&n| n != ']') {
            let hi = class[i + 2];
            matched |= lo <= ch && ch <= hi;
            i += 3;
        } else {
            matched |= lo == ch;
            i += 1;
        }
    }
    None
}

/// Validate glob syntax: every `[` closes and no pattern ends in a lone `\`.
pub fn check_glob(pat: &str) -> Result<(), String> {
    let chars: Vec<char> = pat.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                if i + 1 >= chars.len() {
                    return Err("pattern ends with '\\'".to_owned());
                }
                i += 2;
            }
            '[' => match class_match(&chars[i + 1..], '\0') {
                Some((_, used)) => i += used + 1,
                None => return Err(format!("unmatched '[' in {pat:?}")),
            },
            _ => i += 1,
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_from_text() {
        assert_eq!(Pattern::parse("docs/a.md").unwrap().mode(), MatchMode::Exact);
        assert_eq!(Pattern::parse("docs/*.md").unwrap().mode(), MatchMode::Glob);
        assert_eq!(Pattern::parse("re:^docs/").unwrap().mode(), MatchMode::Regexp);
    }

    #[test]
    fn star_stays_in_component() {
        assert!(glob_match("docs/*.md", "docs/a.md"));
        assert!(!glob_match("docs/*.md", "docs/sub/a.md"));
        assert!(glob_match("*", "file"));
        assert!(!glob_match("*", "dir/file"));
    }

    #[test]
    fn double_star_crosses_directories() {
        assert!(glob_match("docs/**/*.md", "docs/a/b/c.md"));
        assert!(glob_match("docs/**/*.md", "docs/c.md"));
        assert!(glob_match("**", "any/thing/at/all"));
    }

    #[test]
    fn question_and_classes() {
        assert!(glob_match("file?.txt", "file1.txt"));
        assert!(!glob_match("file?.txt", "file10.txt"));
        assert!(glob_match("[a-c]x", "bx"));
        assert!(!glob_match("[!a-c]x", "bx"));
        assert!(glob_match(r"\*", "*"));
        assert!(!glob_match(r"\*", "a"));
    }

    #[test]
    fn invalid_globs() {
        assert!(Pattern::new("[abc", MatchMode::Glob).is_err());
        assert!(Pattern::new("abc\\", MatchMode::Glob).is_err());
        assert!(Pattern::new("(", MatchMode::Regexp).is_err());
    }

    #[test]
    fn exact_directory_prefix() {
        let p = Pattern::parse("/srv/docs/").unwrap();
        assert!(p.matches_path("/srv/docs/a.md"));
        assert!(!p.matches_path("/srv/docsx/a.md"));
        assert!(!p.matches_path("/srv/other"));
    }

    #[test]
    fn regex_mode() {
        let p = Pattern::parse(r"re:\.json$").unwrap();
        assert!(p.matches("data/x.json"));
        assert!(!p.matches("x.yaml"));
    }

    #[test]
    fn pathological_glob_terminates() {
        let pat = "*a".repeat(40);
        let text = "a".repeat(60) + "b";
        assert!(!glob_match(&pat, &text));
    }
}
