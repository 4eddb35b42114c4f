//! Bounds-checked text cursor.
//!
//! Every scanner in the crate walks source text through a [`Cursor`]: it
//! only ever advances by whole characters, tracks the 1-based line and
//! column of its position, and hands out sub-slices of the original text.

use std::rc::Rc;

use super::ast::Location;

#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    column: usize,
    file: Option<Rc<str>>,
}

impl<'a> Cursor<'a> {
    pub fn new(src: &'a str) -> Self {
        Cursor {
            src,
            pos: 0,
            line: 1,
            column: 1,
            file: None,
        }
    }

    /// A cursor whose positions are reported relative to `origin`.
    pub fn at(src: &'a str, origin: &Location) -> Self {
        Cursor {
            src,
            pos: 0,
            line: origin.line,
            column: origin.column,
            file: origin.file.clone(),
        }
    }

    pub fn location(&self) -> Location {
        Location::new(self.line, self.column, self.file.clone())
    }

    /// Byte offset into the source.
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.src.len()
    }

    pub fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    pub fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// The character `n` positions ahead (`peek_nth(0) == peek()`).
    pub fn peek_nth(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    pub fn starts_with(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    pub fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    pub fn eat(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.bump();
            true
        } else {
            false
        }
    }

    /// Consume `s` if the remaining input starts with it.
    pub fn eat_str(&mut self, s: &str) -> bool {
        if !self.starts_with(s) {
            return false;
        }
        for _ in s.chars() {
            self.bump();
        }
        true
    }

    /// Consume characters while `pred` holds and return them.
    pub fn take_while(&mut self, mut pred: impl FnMut(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if !pred(ch) {
                break;
            }
            self.bump();
        }
        &self.src[start..self.pos]
    }

    /// Skip spaces and tabs, stopping at a line break.  Returns `true` if
    /// anything was skipped.
    pub fn skip_inline_ws(&mut self) -> bool {
        !self.take_while(|c| c == ' ' || c == '\t' || c == '\r').is_empty()
    }

    /// Advance to `offset` (a byte offset at or after the current position).
    pub fn advance_to(&mut self, offset: usize) {
        while self.pos < offset.min(self.src.len()) {
            self.bump();
        }
    }

    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        let end = end.min(self.src.len());
        self.src.get(start.min(end)..end).unwrap_or("")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_lines_and_columns() {
        let mut c = Cursor::new("ab\ncd");
        c.bump();
        c.bump();
        assert_eq!((c.location().line, c.location().column), (1, 3));
        c.bump();
        assert_eq!((c.location().line, c.location().column), (2, 1));
    }

    #[test]
    fn multibyte_chars_advance_whole() {
        let mut c = Cursor::new("é!");
        assert_eq!(c.bump(), Some('é'));
        assert_eq!(c.pos(), 2);
        assert_eq!(c.peek(), Some('!'));
    }

    #[test]
    fn eat_str_and_take_while() {
        let mut c = Cursor::new("set  x");
        assert!(c.eat_str("set"));
        assert!(!c.eat_str("get"));
        assert!(c.skip_inline_ws());
        assert_eq!(c.take_while(|ch| ch.is_alphanumeric()), "x");
        assert!(c.is_eof());
        assert_eq!(c.bump(), None);
    }

    #[test]
    fn relative_origin() {
        let origin = Location::new(10, 5, Some(Rc::from("doc.md")));
        let c = Cursor::at("x", &origin);
        assert_eq!(c.location().to_string(), "doc.md:10:5");
    }

    #[test]
    fn slice_clamps() {
        let c = Cursor::new("hello");
        assert_eq!(c.slice(1, 3), "el");
        assert_eq!(c.slice(3, 99), "lo");
        assert_eq!(c.slice(9, 99), "");
    }
}
