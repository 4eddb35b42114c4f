//! Pure built-in functions and value methods.
//!
//! Each function receives already-evaluated arguments and returns
//! `Result<Value, EvalError>`.  [`call_builtin`] is reached from the
//! interpreter's `call_fn` after user functions and classes; builtins that
//! need the session (`exec`, `load`, `range`, `defined`) live in the
//! interpreter.
//!
//! Dates are numbers of milliseconds since the Unix epoch (UTC).

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use super::value::{Value, CLASS_KEY};
use crate::error::EvalError;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Names of the methods [`value_method`] answers to.
const METHODS: &[&str] = &[
    "upper", "lower", "trim", "len", "length", "join", "split", "replace", "contains", "substr",
    "starts_with", "ends_with", "abs", "round", "floor", "ceil", "keys", "values", "to_json",
];

/// Builtins a bare name calls with no arguments.
pub fn is_nullary_builtin(name: &str) -> bool {
    matches!(name, "Date" | "Date.now")
}

/// Dispatch a built-in function call.
///
/// Returns `None` if the function name is not a built-in (caller should then
/// report an unknown function).
pub fn call_builtin(name: &str, args: &[Value]) -> Option<Result<Value, EvalError>> {
    let result = match name {
        // ── String ────────────────────────────────────────────────────────────
        "upper" => arity(name, args, 1, 1).map(|_| Value::from(args[0].to_string().to_uppercase())),
        "lower" => arity(name, args, 1, 1).map(|_| Value::from(args[0].to_string().to_lowercase())),
        "trim" => arity(name, args, 1, 1).map(|_| Value::from(args[0].to_string().trim())),
        "str" => arity(name, args, 1, 1).map(|_| Value::from(args[0].to_string())),
        "num" => arity(name, args, 1, 1).map(|_| match &args[0] {
            Value::Number(x) => Value::Number(*x),
            other => other.as_number().map_or(Value::Null, Value::Number),
        }),
        "len" | "length" => arity(name, args, 1, 1).and_then(|_| match &args[0] {
            Value::Null => Ok(Value::from(0.0)),
            v => v
                .len()
                .map(Value::from)
                .ok_or_else(|| EvalError::argument(name, format!("a {} has no length", v.type_name()))),
        }),
        "type" => arity(name, args, 1, 1)
            .map(|_| Value::from(args[0].class_name().unwrap_or(args[0].type_name()))),
        "join" => arity(name, args, 1, 2).and_then(|_| {
            let sep = args.get(1).map_or_else(|| ", ".to_owned(), Value::to_string);
            let items = args[0].to_items()?;
            let parts: Vec<String> = items.iter().map(Value::to_string).collect();
            Ok(Value::from(parts.join(&sep)))
        }),
        "split" => arity(name, args, 1, 2).map(|_| {
            let s = args[0].to_string();
            let sep = args.get(1).map_or_else(|| " ".to_owned(), Value::to_string);
            let parts: Vec<Value> = if sep.is_empty() {
                s.chars().map(|c| Value::from(c.to_string())).collect()
            } else {
                s.split(sep.as_str()).map(Value::from).collect()
            };
            Value::from(parts)
        }),
        "replace" => arity(name, args, 3, 3).map(|_| {
            let from = args[1].to_string();
            let s = args[0].to_string();
            if from.is_empty() {
                Value::from(s)
            } else {
                Value::from(s.replace(&from, &args[2].to_string()))
            }
        }),
        "contains" => arity(name, args, 2, 2).map(|_| Value::Bool(contains(&args[0], &args[1]))),
        "substr" => arity(name, args, 2, 3).and_then(|_| {
            let start = index_arg(name, args, 1)?;
            let s = args[0].to_string();
            let tail = s.chars().skip(start);
            let out: String = match args.get(2) {
                Some(_) => tail.take(index_arg(name, args, 2)?).collect(),
                None => tail.collect(),
            };
            Ok(Value::from(out))
        }),
        "starts_with" => arity(name, args, 2, 2)
            .map(|_| Value::Bool(args[0].to_string().starts_with(&args[1].to_string()))),
        "ends_with" => arity(name, args, 2, 2)
            .map(|_| Value::Bool(args[0].to_string().ends_with(&args[1].to_string()))),

        // ── Math ──────────────────────────────────────────────────────────────
        "abs" => arity(name, args, 1, 1).and_then(|_| Ok(Value::Number(num_arg(name, args, 0)?.abs()))),
        "floor" => arity(name, args, 1, 1).and_then(|_| Ok(Value::Number(num_arg(name, args, 0)?.floor()))),
        "ceil" => arity(name, args, 1, 1).and_then(|_| Ok(Value::Number(num_arg(name, args, 0)?.ceil()))),
        "round" => arity(name, args, 1, 2).and_then(|_| {
            let x = num_arg(name, args, 0)?;
            let digits = match args.get(1) {
                Some(_) => num_arg(name, args, 1)?.clamp(0.0, 15.0) as i32,
                None => 0,
            };
            let scale = 10f64.powi(digits);
            Ok(Value::Number((x * scale).round() / scale))
        }),
        "min" | "max" => extremum(name, args),

        // ── Collections ───────────────────────────────────────────────────────
        "keys" => arity(name, args, 1, 1).and_then(|_| match &args[0] {
            Value::Object(map) => Ok(Value::from(
                map.keys()
                    .filter(|k| k.as_str() != CLASS_KEY)
                    .map(|k| Value::from(k.as_str()))
                    .collect::<Vec<_>>(),
            )),
            Value::Array(items) => Ok(Value::from((0..items.len()).map(Value::from).collect::<Vec<_>>())),
            other => Err(EvalError::argument(name, format!("a {} has no keys", other.type_name()))),
        }),
        "values" => arity(name, args, 1, 1).and_then(|_| match &args[0] {
            Value::Object(map) => Ok(Value::from(
                map.iter()
                    .filter(|(k, _)| k.as_str() != CLASS_KEY)
                    .map(|(_, v)| v.clone())
                    .collect::<Vec<_>>(),
            )),
            Value::Array(_) => Ok(args[0].clone()),
            other => Err(EvalError::argument(name, format!("a {} has no values", other.type_name()))),
        }),
        "to_json" => arity(name, args, 1, 1).map(|_| Value::from(args[0].to_json().to_string())),
        "from_json" => arity(name, args, 1, 1).and_then(|_| {
            serde_json::from_str::<serde_json::Value>(&args[0].to_string())
                .map(|json| Value::from_json(&json))
                .map_err(|e| EvalError::DataImport(e.to_string()))
        }),

        // ── Date ──────────────────────────────────────────────────────────────
        "Date.now" => arity(name, args, 0, 0).map(|_| Value::Number(now_ms())),
        "Date" => arity(name, args, 0, 1).and_then(|_| match args.first() {
            None => Ok(Value::Number(now_ms())),
            Some(Value::Number(ms)) => Ok(Value::Number(*ms)),
            Some(v) => {
                let s = v.to_string();
                parse_date(&s)
                    .map(Value::Number)
                    .ok_or_else(|| EvalError::argument(name, format!("unrecognized date '{s}'")))
            }
        }),

        _ => return None,
    };
    Some(result)
}

/// Methods available on every value: `"abc".upper()`, `list.length`,
/// `d.diff(other, "days")`.  Returns `None` for names that are not methods.
pub fn value_method(recv: &Value, name: &str, args: &[Value]) -> Option<Result<Value, EvalError>> {
    match name {
        "diff" => Some(date_diff(recv, args)),
        "format" => Some(date_format(recv, args)),
        _ if METHODS.contains(&name) => {
            let mut all = Vec::with_capacity(args.len() + 1);
            all.push(recv.clone());
            all.extend_from_slice(args);
            call_builtin(name, &all)
        }
        _ => None,
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), EvalError> {
    if args.len() < min || args.len() > max {
        let want = if min == max {
            format!("{min}")
        } else {
            format!("{min} to {max}")
        };
        return Err(EvalError::argument(
            name,
            format!("expected {want} argument(s), got {}", args.len()),
        ));
    }
    Ok(())
}

fn num_arg(name: &str, args: &[Value], idx: usize) -> Result<f64, EvalError> {
    let Some(v) = args.get(idx) else {
        return Err(EvalError::argument(name, format!("missing argument {}", idx + 1)));
    };
    match v {
        Value::Null | Value::Array(_) | Value::Object(_) | Value::Lambda(_) => Err(EvalError::argument(
            name,
            format!("argument {} must be a number, got {}", idx + 1, v.type_name()),
        )),
        _ => v
            .as_number()
            .ok_or_else(|| EvalError::argument(name, format!("'{v}' is not a number"))),
    }
}

fn index_arg(name: &str, args: &[Value], idx: usize) -> Result<usize, EvalError> {
    let x = num_arg(name, args, idx)?;
    Ok(if x > 0.0 { x as usize } else { 0 })
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|v| v.loose_eq(needle)),
        Value::Object(map) => map.contains_key(&needle.to_string()),
        other => other.to_string().contains(&needle.to_string()),
    }
}

/// `min`/`max` over the arguments, or over the elements of a single array.
fn extremum(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    let items: Vec<Value> = match args {
        [Value::Array(items)] => items.as_ref().clone(),
        _ => args.to_vec(),
    };
    let mut best: Option<f64> = None;
    for (i, v) in items.iter().enumerate() {
        let x = v
            .as_number()
            .ok_or_else(|| EvalError::argument(name, format!("argument {} is not a number", i + 1)))?;
        best = Some(match best {
            None => x,
            Some(b) if name == "min" => b.min(x),
            Some(b) => b.max(x),
        });
    }
    best.map(Value::Number)
        .ok_or_else(|| EvalError::argument(name, "needs at least one number"))
}

// ── Dates ─────────────────────────────────────────────────────────────────────

fn now_ms() -> f64 {
    Utc::now().timestamp_millis() as f64
}

/// Parse RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS`, or
/// `YYYY-MM-DD` (UTC) into epoch milliseconds.
pub fn parse_date(s: &str) -> Option<f64> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis() as f64);
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&ndt).timestamp_millis() as f64);
        }
    }
    let day = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    let ndt = day.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&ndt).timestamp_millis() as f64)
}

/// Length of one `unit` in milliseconds.  Months and years use the fixed
/// approximations of 30.44 and 365.25 days.
pub fn unit_ms(unit: &str) -> Option<f64> {
    Some(match unit {
        "ms" | "millisecond" | "milliseconds" => 1.0,
        "s" | "second" | "seconds" => 1000.0,
        "minute" | "minutes" => 60_000.0,
        "hour" | "hours" => 3_600_000.0,
        "day" | "days" => MS_PER_DAY,
        "week" | "weeks" => 7.0 * MS_PER_DAY,
        "month" | "months" => 30.44 * MS_PER_DAY,
        "year" | "years" => 365.25 * MS_PER_DAY,
        _ => return None,
    })
}

fn date_value(name: &str, v: &Value) -> Result<f64, EvalError> {
    match v {
        Value::Number(ms) => Ok(*ms),
        other => {
            let s = other.to_string();
            parse_date(&s).ok_or_else(|| EvalError::argument(name, format!("unrecognized date '{s}'")))
        }
    }
}

/// `a.diff(b[, unit])` → `(a - b)` in `unit` (default seconds).
fn date_diff(recv: &Value, args: &[Value]) -> Result<Value, EvalError> {
    arity("diff", args, 1, 2)?;
    let a = date_value("diff", recv)?;
    let b = date_value("diff", &args[0])?;
    let unit = args.get(1).map_or_else(|| "seconds".to_owned(), Value::to_string);
    let per = unit_ms(&unit).ok_or_else(|| EvalError::argument("diff", format!("unknown unit '{unit}'")))?;
    Ok(Value::Number((a - b) / per))
}

/// `d.format([fmt])` with strftime-style patterns (default RFC 3339).
fn date_format(recv: &Value, args: &[Value]) -> Result<Value, EvalError> {
    arity("format", args, 0, 1)?;
    let ms = date_value("format", recv)?;
    let dt = Utc
        .timestamp_millis_opt(ms as i64)
        .single()
        .ok_or_else(|| EvalError::argument("format", format!("date {ms} out of range")))?;
    let Some(fmt) = args.first() else {
        return Ok(Value::from(dt.to_rfc3339()));
    };
    let fmt = fmt.to_string();
    let mut out = String::new();
    write!(out, "{}", dt.format(&fmt))
        .map_err(|_| EvalError::argument("format", format!("invalid format '{fmt}'")))?;
    Ok(Value::from(out))
}

/// Object from `(key, value)` pairs; used by builtins that build records.
pub fn record<'a>(pairs: impl IntoIterator<Item = (&'a str, Value)>) -> Value {
    Value::from(
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v))
            .collect::<BTreeMap<_, _>>(),
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Value]) -> Value {
        call_builtin(name, args)
            .unwrap_or_else(|| panic!("{name} is not a builtin"))
            .unwrap_or_else(|e| panic!("{name}: {e}"))
    }

    fn s(x: &str) -> Value {
        Value::from(x)
    }

    fn n(x: f64) -> Value {
        Value::from(x)
    }

    #[test]
    fn string_functions() {
        assert_eq!(call("upper", &[s("abc")]), s("ABC"));
        assert_eq!(call("trim", &[s("  x ")]), s("x"));
        assert_eq!(call("replace", &[s("a-b-c"), s("-"), s("+")]), s("a+b+c"));
        assert_eq!(call("substr", &[s("héllo"), n(1.0), n(3.0)]), s("éll"));
        assert_eq!(call("substr", &[s("hello"), n(3.0)]), s("lo"));
        assert_eq!(call("len", &[s("héllo")]), n(5.0));
        assert_eq!(call("starts_with", &[s("readme.md"), s("read")]), Value::Bool(true));
    }

    #[test]
    fn split_and_join() {
        let parts = call("split", &[s("a,b,c"), s(",")]);
        assert_eq!(parts.len(), Some(3));
        assert_eq!(call("join", &[parts, s("|")]), s("a|b|c"));
    }

    #[test]
    fn contains_on_each_type() {
        assert_eq!(call("contains", &[s("hello"), s("ell")]), Value::Bool(true));
        let list = Value::from(vec![n(1.0), n(2.0)]);
        assert_eq!(call("contains", &[list, n(2.0)]), Value::Bool(true));
        let obj = record([("k", n(1.0))]);
        assert_eq!(call("contains", &[obj, s("k")]), Value::Bool(true));
    }

    #[test]
    fn math() {
        assert_eq!(call("abs", &[n(-3.0)]), n(3.0));
        assert_eq!(call("round", &[n(2.456), n(2.0)]), n(2.46));
        assert_eq!(call("max", &[n(1.0), n(7.0), n(3.0)]), n(7.0));
        assert_eq!(call("min", &[Value::from(vec![n(4.0), n(2.0)])]), n(2.0));
        assert!(call_builtin("abs", &[s("x")]).is_some_and(|r| r.is_err()));
    }

    #[test]
    fn type_and_num() {
        assert_eq!(call("type", &[n(1.0)]), s("number"));
        let inst = record([(CLASS_KEY, s("Dog"))]);
        assert_eq!(call("type", &[inst]), s("Dog"));
        assert_eq!(call("num", &[s("12.5")]), n(12.5));
        assert_eq!(call("num", &[s("abc")]), Value::Null);
    }

    #[test]
    fn keys_skip_class_tag() {
        let inst = record([(CLASS_KEY, s("Dog")), ("name", s("Rex"))]);
        assert_eq!(call("keys", &[inst]).to_string(), "name");
    }

    #[test]
    fn json_round_trip() {
        let v = call("from_json", &[s(r#"{"a": [1, 2]}"#)]);
        assert_eq!(call("to_json", &[v]), s(r#"{"a":[1,2]}"#));
        assert!(matches!(
            call_builtin("from_json", &[s("{")]),
            Some(Err(EvalError::DataImport(_)))
        ));
    }

    #[test]
    fn arity_errors() {
        assert!(matches!(
            call_builtin("upper", &[]),
            Some(Err(EvalError::Argument { .. }))
        ));
        assert!(call_builtin("nope", &[]).is_none());
    }

    #[test]
    fn dates() {
        let a = call("Date", &[s("2024-01-02")]);
        let b = call("Date", &[s("2024-01-01T00:00:00Z")]);
        let days = value_method(&a, "diff", &[b.clone(), s("days")]).map(|r| r.ok());
        assert_eq!(days, Some(Some(n(1.0))));
        let secs = value_method(&a, "diff", &[b]).map(|r| r.ok());
        assert_eq!(secs, Some(Some(n(86_400.0))));
        let text = value_method(&a, "format", &[s("%Y/%m/%d")]).map(|r| r.ok());
        assert_eq!(text, Some(Some(s("2024/01/02"))));
        assert!(call_builtin("Date", &[s("not a date")]).is_some_and(|r| r.is_err()));
    }

    #[test]
    fn month_and_year_approximations() {
        assert_eq!(unit_ms("months"), Some(30.44 * MS_PER_DAY));
        assert_eq!(unit_ms("year"), Some(365.25 * MS_PER_DAY));
        assert_eq!(unit_ms("fortnight"), None);
    }

    #[test]
    fn methods_delegate_to_builtins() {
        assert_eq!(value_method(&s("abc"), "upper", &[]).map(|r| r.ok()), Some(Some(s("ABC"))));
        assert_eq!(
            value_method(&Value::from(vec![n(1.0), n(2.0)]), "length", &[]).map(|r| r.ok()),
            Some(Some(n(2.0)))
        );
        assert!(value_method(&s("x"), "name", &[]).is_none());
    }
}
