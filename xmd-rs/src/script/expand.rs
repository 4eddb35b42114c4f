//! Markdown text substitution.
//!
//! Text segments of a document and interpolated string literals are parsed
//! once into a [`Template`] and rendered every time they are executed:
//!
//! | Sequence      | Meaning                                                   |
//! |---------------|-----------------------------------------------------------|
//! | `{{ expr }}`  | Evaluate `expr` in command position and substitute it     |
//! | `${expr}`     | Evaluate `expr` and substitute it                         |
//! | `\{{`         | Literal `{{`                                              |
//! | `$${`         | Literal `${`                                              |
//!
//! Undefined names render as the empty string.  A `{{` with no closing `}}`
//! is kept as literal text.  So is a substitution whose expression fails to
//! parse; the parser reports it as a [`Diagnostic`].

use super::ast::{Expr, Location};
use super::cursor::Cursor;
use super::expr::{eval_expr, parse_command_at, parse_expr_at, EvalContext};
use super::stmt::Diagnostic;
use crate::error::EvalError;

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Literal(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Template {
    parts: Vec<Part>,
}

impl Template {
    pub fn literal(text: impl Into<String>) -> Self {
        Template {
            parts: vec![Part::Literal(text.into())],
        }
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// `true` if rendering cannot evaluate anything.
    pub fn is_literal(&self) -> bool {
        self.parts.iter().all(|p| matches!(p, Part::Literal(_)))
    }
}

/// Cheap pre-check: does `s` contain anything [`parse_template`] would
/// substitute?
pub fn has_interpolation(s: &str) -> bool {
    s.contains("{{") || s.contains("${")
}

/// Parse `src` (which starts at `origin`) into a [`Template`].  Malformed
/// substitutions stay in the template as text and are appended to
/// `diagnostics`.
pub fn parse_template(src: &str, origin: &Location, diagnostics: &mut Vec<Diagnostic>) -> Template {
    let mut cur = Cursor::at(src, origin);
    let mut parts = Vec::new();
    let mut lit = String::new();

    while let Some(ch) = cur.peek() {
        if cur.starts_with("\\{{") {
            cur.bump();
            cur.eat_str("{{");
            lit.push_str("{{");
            continue;
        }
        if cur.eat_str("$${") {
            lit.push_str("${");
            continue;
        }
        let (open, close, command) = if cur.starts_with("{{") {
            ("{{", "}}", true)
        } else if cur.starts_with("${") {
            ("${", "}", false)
        } else {
            lit.push(ch);
            cur.bump();
            continue;
        };

        let loc = cur.location();
        let span_start = cur.pos();
        let body_start = span_start + open.len();
        let Some(rel) = cur.rest()[open.len()..].find(close) else {
            // Unterminated: keep the opener as text.
            cur.eat_str(open);
            lit.push_str(open);
            continue;
        };
        let body_end = body_start + rel;
        let body = cur.slice(body_start, body_end);
        let span = cur.slice(span_start, body_end + close.len());
        cur.advance_to(body_end + close.len());

        if body.trim().is_empty() {
            continue;
        }
        let parsed = if command {
            parse_command_at(body, &loc)
        } else {
            parse_expr_at(body, &loc)
        };
        match parsed {
            Ok(expr) => {
                if !lit.is_empty() {
                    parts.push(Part::Literal(std::mem::take(&mut lit)));
                }
                parts.push(Part::Expr(expr));
            }
            Err(e) => {
                let detail = match e {
                    EvalError::Syntax(msg) => msg,
                    other => other.to_string(),
                };
                diagnostics.push(Diagnostic {
                    loc,
                    message: format!("`{span}` kept as text: {detail}"),
                });
                lit.push_str(span);
            }
        }
    }
    if !lit.is_empty() {
        parts.push(Part::Literal(lit));
    }
    Template { parts }
}

/// Render a template, substituting each expression's display form.
pub fn render(template: &Template, ctx: &mut dyn EvalContext) -> Result<String, EvalError> {
    let mut out = String::new();
    for part in &template.parts {
        match part {
            Part::Literal(s) => out.push_str(s),
            Part::Expr(expr) => out.push_str(&eval_expr(expr, ctx)?.to_string()),
        }
    }
    Ok(out)
}

/// Parse and render in one step.  Malformed substitutions come out as text.
pub fn expand(src: &str, ctx: &mut dyn EvalContext) -> Result<String, EvalError> {
    render(&parse_template(src, &Location::default(), &mut Vec::new()), ctx)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ast::{FileOp, Lambda};
    use crate::script::value::Value;
    use std::collections::HashMap;

    struct Vars(HashMap<String, Value>);

    impl EvalContext for Vars {
        fn get_var(&self, name: &str) -> Option<Value> {
            self.0.get(name).cloned()
        }
        fn has_callable(&self, _name: &str) -> bool {
            false
        }
        fn call_fn(&mut self, name: &str, args: Vec<Value>, _loc: &Location) -> Result<Value, EvalError> {
            match name {
                "shout" => Ok(Value::from(format!("{}!", args[0]))),
                other => Err(EvalError::UnknownFunction(other.to_owned())),
            }
        }
        fn has_method(&self, _receiver: &Value, _method: &str) -> bool {
            false
        }
        fn call_method(
            &mut self,
            _receiver: Value,
            _binding: Option<&str>,
            method: &str,
            _args: Vec<Value>,
            _loc: &Location,
        ) -> Result<Value, EvalError> {
            Err(EvalError::UnknownFunction(method.to_owned()))
        }
        fn file_op(
            &mut self,
            _op: FileOp,
            _path: Value,
            _content: Option<Value>,
            _loc: &Location,
        ) -> Result<Value, EvalError> {
            Ok(Value::Null)
        }
        fn call_lambda(&mut self, _lambda: &Lambda, _args: Vec<Value>, _loc: &Location) -> Result<Value, EvalError> {
            Err(EvalError::UnknownFunction("lambda".to_owned()))
        }
        fn max_iterations(&self) -> usize {
            100
        }
    }

    fn ctx() -> Vars {
        let mut m = HashMap::new();
        m.insert("name".to_owned(), Value::from("World"));
        m.insert("n".to_owned(), Value::from(3.0));
        Vars(m)
    }

    #[test]
    fn plain_text_unchanged() {
        assert_eq!(expand("# Title\nbody", &mut ctx()).unwrap(), "# Title\nbody");
        assert!(parse_template("no subs", &Location::default(), &mut Vec::new()).is_literal());
    }

    #[test]
    fn double_brace() {
        assert_eq!(expand("Hello {{name}}!", &mut ctx()).unwrap(), "Hello World!");
        assert_eq!(expand("{{ n * 2 }}", &mut ctx()).unwrap(), "6");
    }

    #[test]
    fn command_call_inside_braces() {
        assert_eq!(expand("{{ shout name }}", &mut ctx()).unwrap(), "World!");
    }

    #[test]
    fn dollar_brace() {
        assert_eq!(expand("n=${n + 1}", &mut ctx()).unwrap(), "n=4");
    }

    #[test]
    fn undefined_is_empty() {
        assert_eq!(expand("[{{nope}}]", &mut ctx()).unwrap(), "[]");
    }

    #[test]
    fn escapes() {
        assert_eq!(expand(r"\{{name}}", &mut ctx()).unwrap(), "{{name}}");
        assert_eq!(expand("$${name}", &mut ctx()).unwrap(), "${name}");
        assert_eq!(expand("cost: $$5", &mut ctx()).unwrap(), "cost: $$5");
    }

    #[test]
    fn unterminated_kept() {
        assert_eq!(expand("a {{ b", &mut ctx()).unwrap(), "a {{ b");
    }

    #[test]
    fn empty_braces_vanish() {
        assert_eq!(expand("a{{ }}b", &mut ctx()).unwrap(), "ab");
    }

    #[test]
    fn display_math_untouched() {
        let src = "Area: $$ \\pi r^2 $$";
        assert!(!has_interpolation(src));
        assert_eq!(expand(src, &mut ctx()).unwrap(), src);
    }

    #[test]
    fn malformed_substitution_kept_as_text() {
        let mut found = Vec::new();
        let t = parse_template("n={{n}} echo ${HOME:-/tmp} {{ 1 + }}", &Location::default(), &mut found);
        assert_eq!(found.len(), 2);
        assert!(found[0].message.starts_with("`${HOME:-/tmp}` kept as text"), "{}", found[0].message);
        assert!(!found[0].message.contains("syntax error"));
        assert_eq!(render(&t, &mut ctx()).unwrap(), "n=3 echo ${HOME:-/tmp} {{ 1 + }}");
    }
}
