//! Document segmentation and statement parser.
//!
//! A document is markdown with embedded script.  Script lives in
//!
//! - `<!-- xmd: STATEMENT -->` directives (one line or several),
//! - fenced blocks opened by a ```` ```xmd ```` line and closed by ```` ``` ````.
//!
//! Everything else is text, copied with `{{ expr }}` substitution.  A
//! directive that is alone on its line swallows that line's newline so
//! control-flow directives do not leave blank lines behind.
//!
//! Inside a code segment, blocks are delimited by indentation: lines indented
//! deeper than the block header form its body.  When the header is not
//! followed by a deeper line in the same segment, the block runs until its
//! terminator (`endif`, `endfor`, …), which may be several directives later.
//!
//! Malformed statements never abort parsing: they are recorded as
//! [`Diagnostic`]s and skipped.

use std::fmt;
use std::rc::Rc;

use aho_corasick::AhoCorasickBuilder;
use tracing::{debug, warn};

use super::ast::{
    AssignTarget, Branch, ClassDef, Expr, ExprKind, FunctionDef, ImportItem, ImportItems,
    ImportSpec, Location, MethodDef, Stmt, StmtKind,
};
use super::expand::parse_template;
use super::expr::{parse_command_at, parse_expr_at};
use super::value::Value;

/// Segment openers.  Index 2 is the fence.
const MARKERS: [&str; 3] = ["<!-- xmd:", "<!--xmd:", "```xmd"];
const FENCE: usize = 2;

const IF_ENDERS: &[&str] = &["elif", "else", "endif"];

/// Deepest block nesting the parser accepts.  Statements below it are
/// dropped with a diagnostic.
const MAX_NESTING: usize = 64;

/// A recoverable parse problem.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub loc: Location,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.loc, self.message)
    }
}

fn record(diagnostics: &mut Vec<Diagnostic>, loc: Location, message: impl Into<String>) {
    let d = Diagnostic {
        loc,
        message: message.into(),
    };
    warn!(loc = %d.loc, "{}", d.message);
    diagnostics.push(d);
}

#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub stmts: Vec<Stmt>,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Line index ────────────────────────────────────────────────────────────────

struct LineIndex<'a> {
    src: &'a str,
    starts: Vec<usize>,
    file: Option<Rc<str>>,
}

impl<'a> LineIndex<'a> {
    fn new(src: &'a str, file: Option<&str>) -> Self {
        let mut starts = vec![0];
        starts.extend(src.match_indices('\n').map(|(i, _)| i + 1));
        LineIndex {
            src,
            starts,
            file: file.map(Rc::from),
        }
    }

    fn loc(&self, offset: usize) -> Location {
        let line = self.starts.partition_point(|&s| s <= offset).max(1);
        let start = self.starts[line - 1];
        let column = self.src.get(start..offset).map_or(1, |s| s.chars().count() + 1);
        Location::new(line, column, self.file.clone())
    }
}

// ── Segmentation ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Line {
    /// A run of markdown between directives.
    Text { text: String, loc: Location },
    /// One non-blank, non-comment line of script.
    Code {
        text: String,
        indent: usize,
        loc: Location,
        segment: usize,
    },
}

fn line_start(src: &str, pos: usize) -> usize {
    src[..pos].rfind('\n').map_or(0, |i| i + 1)
}

/// Offset of the `\n` ending the line containing `pos` (or `src.len()`).
fn line_end(src: &str, pos: usize) -> usize {
    src[pos..].find('\n').map_or(src.len(), |i| pos + i)
}

fn split_segments(src: &str, file: Option<&str>, diagnostics: &mut Vec<Diagnostic>) -> Vec<Line> {
    let ac = AhoCorasickBuilder::new()
        .ascii_case_insensitive(true)
        .build(MARKERS);
    let index = LineIndex::new(src, file);
    let mut lines = Vec::new();
    let mut segment = 0;
    let mut text_start = 0;
    let mut pos = 0;

    while let Some(m) = ac.find(&src[pos..]) {
        let start = pos + m.start();
        let open_end = pos + m.end();
        let ls = line_start(src, start);
        let lead_blank = src[ls..start].trim().is_empty();

        let (body_start, body_end, end, whole_line) = if m.pattern() == FENCE {
            let le = line_end(src, open_end);
            if !lead_blank || !src[open_end..le].trim().is_empty() {
                pos = open_end;
                continue;
            }
            let body_start = (le + 1).min(src.len());
            let mut cursor = body_start;
            let mut close = None;
            while cursor < src.len() {
                let e = line_end(src, cursor);
                if src[cursor..e].trim() == "```" {
                    close = Some((cursor, e));
                    break;
                }
                cursor = e + 1;
            }
            match close {
                Some((cs, ce)) => (body_start, cs, (ce + 1).min(src.len()), true),
                None => {
                    record(diagnostics, index.loc(start), "unterminated ```xmd block");
                    (body_start, src.len(), src.len(), true)
                }
            }
        } else {
            match src[open_end..].find("-->") {
                Some(rel) => {
                    let body_end = open_end + rel;
                    let close_end = body_end + 3;
                    let le = line_end(src, close_end);
                    if lead_blank && src[close_end..le].trim().is_empty() {
                        (open_end, body_end, (le + 1).min(src.len()), true)
                    } else {
                        (open_end, body_end, close_end, false)
                    }
                }
                None => {
                    record(diagnostics, index.loc(start), "unterminated xmd directive");
                    (open_end, src.len(), src.len(), false)
                }
            }
        };

        let text_end = if whole_line { ls.max(text_start) } else { start };
        if text_end > text_start {
            lines.push(Line::Text {
                text: src[text_start..text_end].to_owned(),
                loc: index.loc(text_start),
            });
        }
        let inline_first = m.pattern() != FENCE;
        push_code(&mut lines, &index, body_start, body_end, inline_first, segment);
        segment += 1;
        text_start = end;
        pos = end;
        if pos >= src.len() {
            break;
        }
    }
    if text_start < src.len() {
        lines.push(Line::Text {
            text: src[text_start..].to_owned(),
            loc: index.loc(text_start),
        });
    }
    lines
}

/// Split `src[start..end]` into code lines.  `#` and `//` lines are
/// comments.  When `inline_first` is set the first line shares its physical
/// line with the directive opener and counts as unindented.
fn push_code(
    lines: &mut Vec<Line>,
    index: &LineIndex<'_>,
    start: usize,
    end: usize,
    inline_first: bool,
    segment: usize,
) {
    let mut offset = start;
    for (i, raw) in index.src[start..end].split('\n').enumerate() {
        let trimmed = raw.trim_start_matches(|c: char| c == ' ' || c == '\t');
        let indent_len = raw.len() - trimmed.len();
        let text = trimmed.trim_end();
        if !text.is_empty() && !text.starts_with('#') && !text.starts_with("//") {
            lines.push(Line::Code {
                text: text.to_owned(),
                indent: if i == 0 && inline_first { 0 } else { indent_len },
                loc: index.loc(offset + indent_len),
                segment,
            });
        }
        offset += raw.len() + 1;
    }
}

// ── Small lexical helpers ─────────────────────────────────────────────────────

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_') && chars.all(is_ident_char)
}

/// Leading word and the remainder with leading whitespace removed.
fn first_word(text: &str) -> (&str, &str) {
    let end = text.find(|c: char| !is_ident_char(c)).unwrap_or(text.len());
    (&text[..end], text[end..].trim_start())
}

/// Location of `rest`, a suffix of `text` which starts at `loc`.
fn rest_loc(loc: &Location, text: &str, rest: &str) -> Location {
    let consumed = &text[..text.len() - rest.len()];
    Location::new(loc.line, loc.column + consumed.chars().count(), loc.file.clone())
}

/// Split at the first whole-word `kw` outside string literals.
fn split_keyword<'s>(src: &'s str, kw: &str) -> Option<(&'s str, &'s str)> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in src.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        if c == '"' || c == '\'' {
            quote = Some(c);
            continue;
        }
        if src[i..].starts_with(kw)
            && src[..i].chars().next_back().map_or(true, |p| !is_ident_char(p))
            && src[i + kw.len()..].chars().next().map_or(true, |n| !is_ident_char(n))
        {
            return Some((src[..i].trim_end(), src[i + kw.len()..].trim_start()));
        }
    }
    None
}

fn unquote(s: &str) -> &str {
    for q in ['"', '\''] {
        if let Some(inner) = s.strip_prefix(q).and_then(|r| r.strip_suffix(q)) {
            return inner;
        }
    }
    s
}

// ── Statement parser ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum BodyMode {
    Indented { indent: usize, segment: usize },
    Terminated,
}

/// The line that ended a block body (`elif …`, `else`, `endfor`, …).
struct Term {
    word: String,
    rest: String,
    loc: Location,
    indent: usize,
    segment: usize,
}

enum Step {
    Line,
    End(Option<Term>),
}

enum Pending {
    Branch(Option<Expr>),
    Else,
    Discard,
}

struct StmtParser {
    lines: Vec<Line>,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
    loop_serial: usize,
    depth: usize,
    too_deep: bool,
}

impl StmtParser {
    fn new(lines: Vec<Line>, diagnostics: Vec<Diagnostic>) -> Self {
        StmtParser {
            lines,
            pos: 0,
            diagnostics,
            loop_serial: 0,
            depth: 0,
            too_deep: false,
        }
    }

    fn diag(&mut self, loc: Location, message: impl Into<String>) {
        record(&mut self.diagnostics, loc, message);
    }

    fn parse_all(&mut self) -> Vec<Stmt> {
        let mut stmts = Vec::new();
        while self.pos < self.lines.len() {
            if let Some(stmt) = self.parse_one() {
                stmts.push(stmt);
            }
        }
        stmts
    }

    fn parse_one(&mut self) -> Option<Stmt> {
        let line = self.lines.get(self.pos)?.clone();
        self.pos += 1;
        match line {
            Line::Text { text, loc } => {
                let mut malformed = Vec::new();
                let template = parse_template(&text, &loc, &mut malformed);
                for d in malformed {
                    self.diag(d.loc, d.message);
                }
                Some(Stmt::new(StmtKind::Text(template), loc))
            }
            Line::Code {
                text,
                indent,
                loc,
                segment,
            } => {
                if self.depth >= MAX_NESTING {
                    // Reported once; the rest of the overflow is skipped quietly.
                    if !self.too_deep {
                        self.too_deep = true;
                        let message = format!("blocks nested deeper than {MAX_NESTING} levels are skipped");
                        self.diag(loc, message);
                    }
                    return None;
                }
                self.depth += 1;
                let stmt = self.parse_statement(&text, indent, &loc, segment);
                self.depth -= 1;
                stmt
            }
        }
    }

    fn expr(&mut self, src: &str, loc: &Location, command: bool) -> Option<Expr> {
        let parsed = if command {
            parse_command_at(src, loc)
        } else {
            parse_expr_at(src, loc)
        };
        match parsed {
            Ok(expr) => Some(expr),
            Err(e) => {
                self.diag(loc.clone(), e.to_string());
                None
            }
        }
    }

    // ── Block bodies ──────────────────────────────────────────────────────────

    fn body_mode(&self, indent: usize, segment: usize) -> BodyMode {
        match self.lines.get(self.pos) {
            Some(Line::Code {
                indent: i,
                segment: s,
                ..
            }) if *s == segment && *i > indent => BodyMode::Indented { indent, segment },
            _ => BodyMode::Terminated,
        }
    }

    /// Consume the next line if it is one of `enders` (at exactly
    /// `(indent, segment)` when given).
    fn take_term(&mut self, enders: &[&str], at: Option<(usize, usize)>) -> Option<Term> {
        let Some(Line::Code {
            text,
            indent,
            loc,
            segment,
        }) = self.lines.get(self.pos)
        else {
            return None;
        };
        if let Some((want_indent, want_segment)) = at {
            if *indent != want_indent || *segment != want_segment {
                return None;
            }
        }
        let (word, rest) = first_word(text);
        if !enders.contains(&word) {
            return None;
        }
        let term = Term {
            word: word.to_owned(),
            rest: rest.to_owned(),
            loc: rest_loc(loc, text, rest),
            indent: *indent,
            segment: *segment,
        };
        self.pos += 1;
        Some(term)
    }

    fn body_step(&mut self, mode: BodyMode, enders: &[&str], opener: &Location) -> Step {
        if self.pos >= self.lines.len() {
            if let BodyMode::Terminated = mode {
                let closer = enders.last().copied().unwrap_or("end");
                self.diag(
                    opener.clone(),
                    format!("missing `{closer}`; block closed at end of input"),
                );
            }
            return Step::End(None);
        }
        match mode {
            BodyMode::Indented { indent, segment } => {
                let inside = matches!(
                    &self.lines[self.pos],
                    Line::Code { indent: i, segment: s, .. } if *s == segment && *i > indent
                );
                if inside {
                    Step::Line
                } else {
                    Step::End(self.take_term(enders, Some((indent, segment))))
                }
            }
            BodyMode::Terminated => match self.take_term(enders, None) {
                Some(term) => Step::End(Some(term)),
                None => Step::Line,
            },
        }
    }

    fn parse_body(&mut self, mode: BodyMode, enders: &[&str], opener: &Location) -> (Vec<Stmt>, Option<Term>) {
        let mut body = Vec::new();
        loop {
            match self.body_step(mode, enders, opener) {
                Step::End(term) => return (body, term),
                Step::Line => {
                    if let Some(stmt) = self.parse_one() {
                        body.push(stmt);
                    }
                }
            }
        }
    }

    fn block(&mut self, indent: usize, segment: usize, enders: &[&str], opener: &Location) -> Vec<Stmt> {
        let mode = self.body_mode(indent, segment);
        self.parse_body(mode, enders, opener).0
    }

    // ── Statements ────────────────────────────────────────────────────────────

    fn parse_statement(&mut self, text: &str, indent: usize, loc: &Location, segment: usize) -> Option<Stmt> {
        let (word, rest) = first_word(text);
        let rloc = rest_loc(loc, text, rest);
        let kind = match word {
            "set" => self.parse_set(rest, &rloc)?,
            "print" => StmtKind::Print(self.expr(rest, &rloc, true)?),
            "if" => return self.parse_if(rest, &rloc, loc, indent, segment),
            "for" => return self.parse_for(rest, &rloc, loc, indent, segment),
            "while" => {
                let cond = self.expr(rest, &rloc, true);
                let body = self.block(indent, segment, &["endwhile"], loc);
                StmtKind::While { cond: cond?, body }
            }
            "loop" => return self.parse_loop(rest, &rloc, loc, indent, segment),
            "break" => StmtKind::Break,
            "continue" => StmtKind::Continue,
            "return" if rest.is_empty() => StmtKind::Return(None),
            "return" => StmtKind::Return(Some(self.expr(rest, &rloc, true)?)),
            "function" => {
                let sig = self.parse_signature(rest, &rloc);
                let body = self.block(indent, segment, &["endfunction"], loc);
                let (name, params) = sig?;
                StmtKind::Function(Rc::new(FunctionDef {
                    name,
                    params,
                    body,
                    loc: loc.clone(),
                }))
            }
            "class" => return self.parse_class(rest, &rloc, loc, indent, segment),
            "import" => StmtKind::Import(self.parse_import(rest, &rloc)?),
            "export" => self.parse_export(rest, &rloc)?,
            "include" | "exec" => StmtKind::Directive {
                name: word.to_owned(),
                args: vec![self.expr(rest, &rloc, true)?],
            },
            "elif" | "else" | "endif" | "endfor" | "endwhile" | "endloop" | "endfunction"
            | "endclass" | "endmethod" | "method" | "constructor" | "private" | "then" | "times"
            | "in" | "from" | "as" | "extends" => {
                self.diag(loc.clone(), format!("unexpected `{word}`"));
                return None;
            }
            _ => StmtKind::Expr(self.expr(text, loc, true)?),
        };
        Some(Stmt::new(kind, loc.clone()))
    }

    /// `set NAME[.FIELD…] [=] EXPR`
    fn parse_set(&mut self, rest: &str, rloc: &Location) -> Option<StmtKind> {
        let end = rest
            .find(|c: char| !(is_ident_char(c) || c == '.'))
            .unwrap_or(rest.len());
        let (path_src, after) = rest.split_at(end);
        let mut parts = path_src.split('.');
        let name = parts.next().unwrap_or_default();
        let path: Vec<String> = parts.map(str::to_owned).collect();
        if !is_ident(name) || path.iter().any(|p| !is_ident(p)) {
            self.diag(rloc.clone(), format!("invalid assignment target `{path_src}`"));
            return None;
        }
        let mut value_src = after.trim_start();
        if let Some(v) = value_src.strip_prefix('=') {
            if !v.starts_with('=') {
                value_src = v.trim_start();
            }
        }
        if value_src.is_empty() {
            self.diag(rloc.clone(), format!("`set {path_src}` needs a value"));
            return None;
        }
        let vloc = rest_loc(rloc, rest, value_src);
        let value = self.expr(value_src, &vloc, true)?;
        Some(StmtKind::Assign {
            target: AssignTarget {
                name: name.to_owned(),
                path,
            },
            value,
        })
    }

    fn parse_if(
        &mut self,
        rest: &str,
        rloc: &Location,
        loc: &Location,
        indent: usize,
        segment: usize,
    ) -> Option<Stmt> {
        if let Some((cond_src, then_src)) = split_keyword(rest, "then") {
            let cond = self.expr(cond_src, rloc, true)?;
            if then_src.is_empty() {
                self.diag(loc.clone(), "`then` needs a statement");
                return None;
            }
            let then_loc = rest_loc(rloc, rest, then_src);
            let body: Vec<Stmt> = self
                .parse_statement(then_src, indent, &then_loc, segment)
                .into_iter()
                .collect();
            return Some(Stmt::new(
                StmtKind::If {
                    branches: vec![Branch { cond, body }],
                    otherwise: None,
                },
                loc.clone(),
            ));
        }

        let mut branches = Vec::new();
        let mut otherwise = None;
        let mut pending = Pending::Branch(self.expr(rest, rloc, true));
        let mut broken = matches!(pending, Pending::Branch(None));
        let mut mode = self.body_mode(indent, segment);
        loop {
            let (body, term) = self.parse_body(mode, IF_ENDERS, loc);
            match pending {
                Pending::Branch(Some(cond)) => branches.push(Branch { cond, body }),
                Pending::Else => otherwise = Some(body),
                Pending::Branch(None) | Pending::Discard => {}
            }
            let Some(term) = term else { break };
            pending = match term.word.as_str() {
                "endif" => break,
                _ if otherwise.is_some() => {
                    self.diag(term.loc.clone(), format!("`{}` after `else`", term.word));
                    Pending::Discard
                }
                "elif" => {
                    let cond = self.expr(&term.rest, &term.loc, true);
                    broken |= cond.is_none();
                    Pending::Branch(cond)
                }
                _ => Pending::Else,
            };
            mode = self.body_mode(term.indent, term.segment);
        }
        if broken {
            return None;
        }
        Some(Stmt::new(StmtKind::If { branches, otherwise }, loc.clone()))
    }

    /// `for NAME in EXPR`; `EXPR` may be a range `A..B`.
    fn parse_for(
        &mut self,
        rest: &str,
        rloc: &Location,
        loc: &Location,
        indent: usize,
        segment: usize,
    ) -> Option<Stmt> {
        let header = match split_keyword(rest, "in") {
            Some((var, iter_src)) if is_ident(var) => {
                let iloc = rest_loc(rloc, rest, iter_src);
                self.expr(iter_src, &iloc, true).map(|e| (var.to_owned(), e))
            }
            _ => {
                self.diag(rloc.clone(), "expected `for NAME in EXPR`");
                None
            }
        };
        let body = self.block(indent, segment, &["endfor"], loc);
        let (var, iterable) = header?;
        Some(Stmt::new(StmtKind::Loop { var, iterable, body }, loc.clone()))
    }

    /// `loop N times` desugars to a loop over `1..N` with a hidden variable.
    /// A literal count below one yields no statement.
    fn parse_loop(
        &mut self,
        rest: &str,
        rloc: &Location,
        loc: &Location,
        indent: usize,
        segment: usize,
    ) -> Option<Stmt> {
        let count = match split_keyword(rest, "times") {
            Some((count_src, "")) => self.expr(count_src, rloc, false),
            _ => {
                self.diag(rloc.clone(), "expected `loop N times`");
                None
            }
        };
        let body = self.block(indent, segment, &["endloop", "endfor"], loc);
        let count = count?;
        if matches!(count.as_number_literal(), Some(n) if n < 1.0) {
            debug!(%loc, "loop count below one; no loop emitted");
            return None;
        }
        self.loop_serial += 1;
        let one = Expr::new(ExprKind::Literal(Value::from(1.0)), rloc.clone());
        let iterable = Expr::new(
            ExprKind::Range {
                start: Box::new(one),
                end: Box::new(count),
                ascending_only: true,
            },
            rloc.clone(),
        );
        Some(Stmt::new(
            StmtKind::Loop {
                var: format!("__loop{}", self.loop_serial),
                iterable,
                body,
            },
            loc.clone(),
        ))
    }

    fn parse_params(&mut self, src: &str, loc: &Location) -> Option<Vec<String>> {
        let words: Vec<&str> = src
            .split(|c: char| c.is_whitespace() || c == ',' || c == '(' || c == ')')
            .filter(|w| !w.is_empty())
            .collect();
        if let Some(bad) = words.iter().find(|w| !is_ident(w)) {
            self.diag(loc.clone(), format!("invalid parameter name `{bad}`"));
            return None;
        }
        Some(words.into_iter().map(str::to_owned).collect())
    }

    /// `NAME p1 p2 …` or `NAME(p1, p2)`
    fn parse_signature(&mut self, src: &str, loc: &Location) -> Option<(String, Vec<String>)> {
        let end = src.find(|c: char| !is_ident_char(c)).unwrap_or(src.len());
        let (name, params) = src.split_at(end);
        if !is_ident(name) {
            self.diag(loc.clone(), "missing or invalid name");
            return None;
        }
        let params = self.parse_params(params, loc)?;
        Some((name.to_owned(), params))
    }

    fn parse_class(
        &mut self,
        rest: &str,
        rloc: &Location,
        loc: &Location,
        indent: usize,
        segment: usize,
    ) -> Option<Stmt> {
        let (name, parent) = match split_keyword(rest, "extends") {
            Some((name, parent)) => (name, Some(parent)),
            None => (rest, None),
        };
        let header_ok = is_ident(name) && parent.map_or(true, is_ident);
        if !header_ok {
            self.diag(rloc.clone(), "expected `class NAME [extends PARENT]`");
        }

        let mode = self.body_mode(indent, segment);
        let mut constructor: Option<Rc<FunctionDef>> = None;
        let mut methods: Vec<MethodDef> = Vec::new();
        while let Step::Line = self.body_step(mode, &["endclass"], loc) {
            let line = self.lines[self.pos].clone();
            self.pos += 1;
            let (text, mindent, mloc, msegment) = match line {
                Line::Code {
                    text,
                    indent,
                    loc,
                    segment,
                } => (text, indent, loc, segment),
                Line::Text { text, loc } => {
                    if !text.trim().is_empty() {
                        self.diag(loc, "text inside a class body is ignored");
                    }
                    continue;
                }
            };
            let (word, mrest) = first_word(&text);
            let (private, word, mrest) = if word == "private" {
                let (w, r) = first_word(mrest);
                (true, w, r)
            } else {
                (false, word, mrest)
            };
            let mrloc = rest_loc(&mloc, &text, mrest);
            match word {
                "constructor" => {
                    let params = self.parse_params(mrest, &mrloc);
                    let body = self.block(mindent, msegment, &["endmethod"], &mloc);
                    let Some(params) = params else { continue };
                    if constructor.is_some() {
                        self.diag(mloc.clone(), "duplicate constructor");
                    }
                    constructor = Some(Rc::new(FunctionDef {
                        name: "constructor".to_owned(),
                        params,
                        body,
                        loc: mloc,
                    }));
                }
                "method" => {
                    let sig = self.parse_signature(mrest, &mrloc);
                    let body = self.block(mindent, msegment, &["endmethod"], &mloc);
                    let Some((name, params)) = sig else { continue };
                    methods.push(MethodDef {
                        func: Rc::new(FunctionDef {
                            name,
                            params,
                            body,
                            loc: mloc,
                        }),
                        private,
                    });
                }
                _ => self.diag(mloc, "expected `method` or `constructor` in class body"),
            }
        }
        if !header_ok {
            return None;
        }
        Some(Stmt::new(
            StmtKind::Class(Rc::new(ClassDef {
                name: name.to_owned(),
                parent: parent.map(str::to_owned),
                constructor,
                methods,
                loc: loc.clone(),
            })),
            loc.clone(),
        ))
    }

    /// `import a [as b], c from M` or `import * from M`
    fn parse_import(&mut self, rest: &str, rloc: &Location) -> Option<ImportSpec> {
        let Some((items_src, module_src)) = split_keyword(rest, "from") else {
            self.diag(rloc.clone(), "expected `import NAME from MODULE`");
            return None;
        };
        let module = unquote(module_src.trim());
        if module.is_empty() {
            self.diag(rloc.clone(), "missing module name");
            return None;
        }
        let items = if items_src.trim() == "*" {
            ImportItems::All
        } else {
            let mut items = Vec::new();
            for part in items_src.split(',') {
                let words: Vec<&str> = part.split_whitespace().collect();
                match words.as_slice() {
                    [name] if is_ident(name) => items.push(ImportItem {
                        name: (*name).to_owned(),
                        alias: None,
                    }),
                    [name, "as", alias] if is_ident(name) && is_ident(alias) => {
                        items.push(ImportItem {
                            name: (*name).to_owned(),
                            alias: Some((*alias).to_owned()),
                        })
                    }
                    _ => {
                        self.diag(rloc.clone(), format!("invalid import item `{}`", part.trim()));
                        return None;
                    }
                }
            }
            ImportItems::Symbols(items)
        };
        Some(ImportSpec {
            items,
            module: module.to_owned(),
        })
    }

    /// `export NAME` or `export NAME = EXPR`
    fn parse_export(&mut self, rest: &str, rloc: &Location) -> Option<StmtKind> {
        let (name, after) = first_word(rest);
        if !is_ident(name) {
            self.diag(rloc.clone(), "expected `export NAME [= EXPR]`");
            return None;
        }
        if after.is_empty() {
            return Some(StmtKind::Export {
                name: name.to_owned(),
                value: None,
            });
        }
        let Some(value_src) = after.strip_prefix('=').map(str::trim_start) else {
            self.diag(rloc.clone(), format!("unexpected `{after}` after export name"));
            return None;
        };
        let vloc = rest_loc(rloc, rest, value_src);
        let value = self.expr(value_src, &vloc, true)?;
        Some(StmtKind::Export {
            name: name.to_owned(),
            value: Some(value),
        })
    }
}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Parse a markdown document with embedded directives.
pub fn parse_document(src: &str, file: Option<&str>) -> ParsedDocument {
    let mut diagnostics = Vec::new();
    let lines = split_segments(src, file, &mut diagnostics);
    finish(lines, diagnostics)
}

/// Parse `src` as a single block of script with no surrounding markdown.
pub fn parse_script(src: &str, file: Option<&str>) -> ParsedDocument {
    let index = LineIndex::new(src, file);
    let mut lines = Vec::new();
    push_code(&mut lines, &index, 0, src.len(), false, 0);
    finish(lines, Vec::new())
}

fn finish(lines: Vec<Line>, diagnostics: Vec<Diagnostic>) -> ParsedDocument {
    let mut parser = StmtParser::new(lines, diagnostics);
    let stmts = parser.parse_all();
    ParsedDocument {
        stmts,
        diagnostics: parser.diagnostics,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
