//! This is the `arbor` binary. It compiles Python source through the arbor
//! pipeline and either runs the result on the reference executor or dumps an
//! intermediate stage.
//!
//! ```text
//! arbor -c 'print(sum(x * x for x in range(4)))'
//! arbor --dump symbols prog.py
//! arbor --mode eval -c '1 + 2'
//! ```
//!
//! Set `RUST_LOG=debug` (or `trace`) to follow the resolver, translator and
//! generator lowering.

#[macro_use]
extern crate log;

mod settings;

use arbor_compiler::{CompileError, CompileOpts, Mode};
use arbor_vm::{Interpreter, RunError};
use std::{
    io::{self, Read},
    process::ExitCode,
};

pub use arbor_compiler;
pub use arbor_vm;
pub use settings::{Dump, RunMode, Settings, parse_opts};

/// The main cli of the `arbor` interpreter.
pub fn run() -> ExitCode {
    env_logger::init();

    let (settings, run_mode) = match parse_opts() {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("arbor: {e}");
            eprint!("{}", settings::USAGE);
            return ExitCode::from(2);
        }
    };
    debug!("settings: {settings:?}, run mode: {run_mode:?}");

    let (source, source_path) = match run_mode {
        RunMode::Help => {
            print!("{}", settings::USAGE);
            return ExitCode::SUCCESS;
        }
        RunMode::Version => {
            println!("arbor {}", env!("CARGO_PKG_VERSION"));
            return ExitCode::SUCCESS;
        }
        RunMode::Command(command) => (command, "<string>".to_owned()),
        RunMode::Script(path) => match std::fs::read_to_string(&path) {
            Ok(source) => (source, path),
            Err(e) => {
                error!("failed to read {path}: {e}");
                eprintln!("arbor: can't open file '{path}': {e}");
                return ExitCode::from(2);
            }
        },
        RunMode::Stdin => {
            let mut source = String::new();
            if let Err(e) = io::stdin().read_to_string(&mut source) {
                eprintln!("arbor: failed to read stdin: {e}");
                return ExitCode::from(2);
            }
            (source, "<stdin>".to_owned())
        }
    };

    let result = match settings.dump {
        Some(dump) => dump_source(&source, &source_path, &settings, dump),
        None => run_source(&source, &source_path, &settings),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}

/// Prints the resolved scopes or the translated tree of `source`.
pub fn dump_source(
    source: &str,
    source_path: &str,
    settings: &Settings,
    dump: Dump,
) -> Result<(), RunError> {
    match dump {
        Dump::Symbols => {
            let scopes = arbor_compiler::compile_symtable(source, settings.mode, source_path)?;
            print!("{scopes}");
        }
        Dump::Tree => {
            let opts = CompileOpts {
                optimize: settings.optimize,
            };
            let code = arbor_compiler::compile(source, settings.mode, source_path, opts)?;
            print!("{code}");
        }
    }
    Ok(())
}

/// Compiles `source` and runs it as `__main__`; `eval` mode prints the
/// value of the expression.
pub fn run_source(source: &str, source_path: &str, settings: &Settings) -> Result<(), RunError> {
    let vm_settings = arbor_vm::Settings {
        optimize: settings.optimize,
        ..Default::default()
    };
    Interpreter::new(vm_settings).enter(|vm| {
        let scope = vm.new_scope("__main__");
        let value = vm.run_in_scope(source, settings.mode, source_path, scope)?;
        if settings.mode == Mode::Eval && !value.is_none() {
            let repr = vm.repr(&value).map_err(|unwind| vm.run_error(unwind))?;
            println!("{repr}");
        }
        Ok(())
    })
}

fn report_error(error: &RunError) {
    match error {
        RunError::Compile(CompileError::Parse(e)) => {
            eprintln!(
                "  File \"{}\", line {}\nSyntaxError: {}",
                e.source_path, e.location.line, e.error
            );
        }
        RunError::Compile(e @ CompileError::Codegen(_)) => {
            let (line, _) = e.python_location();
            eprintln!("  File \"{}\", line {line}\nSyntaxError: {e}", e.source_path());
        }
        RunError::Exception { message, .. } => {
            eprintln!("Traceback (most recent call last):\n{message}");
        }
    }
}
