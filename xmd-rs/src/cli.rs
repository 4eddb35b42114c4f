//! Command-line argument parsing.
//!
//! Usage:
//!   xmd [-c <config>] [-I <dir>]... [-D NAME=VALUE]... [--script] [--deps]
//!       [-o <file>] [-v|-vv|-q] [<file>|-]

use std::path::PathBuf;

use crate::script::value::parse_number;
use crate::script::Value;

pub const USAGE: &str = "\
Usage: xmd [options] [FILE|-]

Options:
  -c FILE        read configuration from FILE
  -I DIR         add DIR to the module search path (repeatable)
  -D NAME=VALUE  pre-set a variable (repeatable)
  -o FILE        write output to FILE instead of stdout
  --script       treat input as bare script instead of markdown
  --deps         print the module load order after processing
  -v, -vv        more log output on stderr
  -q             only log errors
  -h, --help     show this help
  -V, --version  show the version";

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// Config file (`-c`); the platform default is used when absent.
    pub config: Option<PathBuf>,
    /// Module search paths (`-I`), in order.
    pub include: Vec<PathBuf>,
    /// Pre-set variables (`-D NAME=VALUE`).
    pub defines: Vec<(String, Value)>,
    pub output: Option<PathBuf>,
    /// Input file; `None` reads stdin.
    pub input: Option<PathBuf>,
    pub script: bool,
    pub deps: bool,
    /// `-q` is -1, each `-v` adds one.
    pub verbosity: i8,
    pub action: Action,
}

/// What to do besides processing.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum Action {
    #[default]
    Process,
    Help,
    Version,
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()` and return [`CliArgs`] or an error message.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(raw.get(1..).unwrap_or_default())
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut positional: Vec<String> = Vec::new();
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        // `--` ends flag processing.
        if arg == "--" {
            positional.extend(argv[i + 1..].iter().cloned());
            break;
        }

        match arg {
            "--script" => args.script = true,
            "--deps" => args.deps = true,
            "--help" => args.action = Action::Help,
            "--version" => args.action = Action::Version,
            _ if arg.starts_with("--") => return Err(format!("unknown option: {arg}")),
            _ if !arg.starts_with('-') || arg == "-" => positional.push(arg.to_owned()),
            _ => {
                // Short flags: `-vq`, `-Idir`, `-I dir`.
                let chars: Vec<char> = arg[1..].chars().collect();
                let mut j = 0;
                while j < chars.len() {
                    let flag = chars[j];
                    match flag {
                        'v' => args.verbosity = args.verbosity.max(0) + 1,
                        'q' => args.verbosity = -1,
                        'h' => args.action = Action::Help,
                        'V' => args.action = Action::Version,
                        'c' | 'I' | 'D' | 'o' => {
                            let value = if j + 1 < chars.len() {
                                let s: String = chars[j + 1..].iter().collect();
                                j = chars.len();
                                s
                            } else if i + 1 < argv.len() {
                                i += 1;
                                argv[i].clone()
                            } else {
                                return Err(format!("-{flag} requires an argument"));
                            };
                            match flag {
                                'c' => args.config = Some(PathBuf::from(value)),
                                'I' => args.include.push(PathBuf::from(value)),
                                'o' => args.output = Some(PathBuf::from(value)),
                                _ => args.defines.push(parse_define(&value)?),
                            }
                        }
                        c => return Err(format!("unknown option: -{c}")),
                    }
                    j += 1;
                }
            }
        }
        i += 1;
    }

    match positional.len() {
        0 => {}
        1 => {
            let input = positional.remove(0);
            if input != "-" {
                args.input = Some(PathBuf::from(input));
            }
        }
        n => return Err(format!("too many arguments ({n})")),
    }

    Ok(args)
}

/// `NAME=VALUE`; numeric values become numbers.
fn parse_define(s: &str) -> Result<(String, Value), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("-D expects NAME=VALUE, got `{s}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("-D expects NAME=VALUE, got `{s}`"));
    }
    let value = match parse_number(value) {
        Some(n) => Value::from(n),
        None => Value::from(value),
    };
    Ok((name.to_owned(), value))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|&s| s.to_owned()).collect()
    }

    #[test]
    fn empty_args_read_stdin() {
        let a = parse_argv(&argv(&[])).unwrap();
        assert!(a.input.is_none());
        assert_eq!(a.action, Action::Process);
        assert_eq!(a.verbosity, 0);
    }

    #[test]
    fn dash_is_stdin() {
        let a = parse_argv(&argv(&["-"])).unwrap();
        assert!(a.input.is_none());
    }

    #[test]
    fn input_and_output() {
        let a = parse_argv(&argv(&["-o", "out.md", "in.md"])).unwrap();
        assert_eq!(a.input, Some(PathBuf::from("in.md")));
        assert_eq!(a.output, Some(PathBuf::from("out.md")));
    }

    #[test]
    fn include_embedded_and_separate() {
        let a = parse_argv(&argv(&["-Ilib", "-I", "/usr/share/xmd"])).unwrap();
        assert_eq!(a.include, [PathBuf::from("lib"), PathBuf::from("/usr/share/xmd")]);
    }

    #[test]
    fn defines_parse_numbers() {
        let a = parse_argv(&argv(&["-D", "n=42", "-Dname=Ann"])).unwrap();
        assert_eq!(a.defines[0], ("n".to_owned(), Value::from(42.0)));
        assert_eq!(a.defines[1], ("name".to_owned(), Value::from("Ann")));
        assert!(parse_argv(&argv(&["-D", "novalue"])).is_err());
    }

    #[test]
    fn verbosity() {
        assert_eq!(parse_argv(&argv(&["-vv"])).unwrap().verbosity, 2);
        assert_eq!(parse_argv(&argv(&["-v", "-v"])).unwrap().verbosity, 2);
        assert_eq!(parse_argv(&argv(&["-q"])).unwrap().verbosity, -1);
    }

    #[test]
    fn long_flags() {
        let a = parse_argv(&argv(&["--script", "--deps", "x.xmd"])).unwrap();
        assert!(a.script && a.deps);
        assert_eq!(parse_argv(&argv(&["--help"])).unwrap().action, Action::Help);
        assert_eq!(parse_argv(&argv(&["-V"])).unwrap().action, Action::Version);
    }

    #[test]
    fn double_dash_ends_flags() {
        let a = parse_argv(&argv(&["--", "-odd-name.md"])).unwrap();
        assert_eq!(a.input, Some(PathBuf::from("-odd-name.md")));
    }

    #[test]
    fn errors() {
        assert!(parse_argv(&argv(&["-z"])).is_err());
        assert!(parse_argv(&argv(&["--frobnicate"])).is_err());
        assert!(parse_argv(&argv(&["-c"])).is_err());
        assert!(parse_argv(&argv(&["a", "b"])).is_err());
    }
}
