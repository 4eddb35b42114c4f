use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use tracing::{debug, warn};

use xmd::cli::{self, Action, CliArgs, USAGE};
use xmd::{Config, Processor, SourceMode};

fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("xmd: {e}");
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };
    match args.action {
        Action::Help => {
            println!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        Action::Version => {
            println!("xmd {}", env!("CARGO_PKG_VERSION"));
            return ExitCode::SUCCESS;
        }
        Action::Process => {}
    }

    init_tracing(args.verbosity);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("xmd: {message}");
            ExitCode::from(1)
        }
    }
}

/// `XMD_LOG` wins; otherwise the level follows `-v` / `-q`.
fn init_tracing(verbosity: i8) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default = match verbosity {
        i8::MIN..=-1 => "error",
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("XMD_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

fn load_config(explicit: Option<&PathBuf>) -> Result<Config, String> {
    let path = match explicit {
        Some(p) => Some(p.clone()),
        None => Config::default_path().filter(|p| p.is_file()),
    };
    let mut config = match path {
        Some(path) => {
            let (config, errors) =
                Config::load_file(&path).map_err(|e| format!("{}: {e}", path.display()))?;
            for e in errors {
                warn!(file = %path.display(), "{e}");
            }
            debug!(file = %path.display(), "loaded config");
            config
        }
        None => Config::new(),
    };
    for e in config.apply_env() {
        warn!("{e}");
    }
    Ok(config)
}

fn run(args: CliArgs) -> Result<(), String> {
    let mut config = load_config(args.config.as_ref())?;
    for (i, dir) in args.include.iter().enumerate() {
        config.search_paths.insert(i, dir.clone());
    }

    let mut processor = Processor::with_config(config).map_err(|e| e.to_string())?;
    for (name, value) in args.defines {
        processor.set_variable(name, value);
    }

    let mode = if args.script {
        SourceMode::Script
    } else {
        SourceMode::Document
    };
    let result = match &args.input {
        Some(path) => processor.process_file(path, mode),
        None => {
            let mut src = String::new();
            std::io::stdin()
                .read_to_string(&mut src)
                .map_err(|e| format!("stdin: {e}"))?;
            processor.process_as(&src, mode)
        }
    };
    if !result.is_success() {
        return Err(result.message.unwrap_or_else(|| result.code.to_string()));
    }

    match &args.output {
        Some(path) => std::fs::write(path, &result.output)
            .map_err(|e| format!("{}: {e}", path.display()))?,
        None => {
            let mut out = std::io::stdout().lock();
            out.write_all(result.output.as_bytes())
                .and_then(|()| out.flush())
                .map_err(|e| format!("stdout: {e}"))?;
        }
    }

    if args.deps {
        let order = processor.module_load_order().map_err(|e| e.to_string())?;
        for name in order {
            println!("{name}");
        }
    }
    Ok(())
}
