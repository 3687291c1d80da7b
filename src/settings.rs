use arbor_compiler::Mode;
use lexopt::prelude::*;
use std::ffi::OsString;

pub(crate) const USAGE: &str = "\
usage: arbor [OPTIONS] [-c CMD | FILE | -]

Options:
  -c CMD          program passed in as string
  -O              remove assert and __debug__-dependent statements; -OO also drops docstrings
  --mode MODE     compile as exec (default), eval or single
  --dump KIND     print the resolved scopes (symbols) or the translated tree (tree) instead of running
  -h, --help      print this help message and exit
  -V, --version   print the version number and exit
";

/// What to show instead of running the program.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Dump {
    Symbols,
    Tree,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunMode {
    Command(String),
    Script(String),
    Stdin,
    Help,
    Version,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub optimize: u8,
    pub mode: Mode,
    pub dump: Option<Dump>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            optimize: 0,
            mode: Mode::Exec,
            dump: None,
        }
    }
}

pub fn parse_opts() -> Result<(Settings, RunMode), lexopt::Error> {
    parse_args(std::env::args_os().skip(1))
}

pub(crate) fn parse_args(
    args: impl IntoIterator<Item = OsString>,
) -> Result<(Settings, RunMode), lexopt::Error> {
    let mut parser = lexopt::Parser::from_args(args);
    let mut settings = Settings::default();
    let mut run_mode = None;

    while let Some(arg) = parser.next()? {
        match arg {
            Short('c') => {
                run_mode = Some(RunMode::Command(parser.value()?.string()?));
                break;
            }
            Short('O') => settings.optimize = settings.optimize.saturating_add(1),
            Long("mode") => {
                settings.mode = match parser.value()?.string()?.as_str() {
                    "exec" => Mode::Exec,
                    "eval" => Mode::Eval,
                    "single" => Mode::Single,
                    other => {
                        return Err(lexopt::Error::UnexpectedValue {
                            option: "--mode".to_owned(),
                            value: other.into(),
                        });
                    }
                };
            }
            Long("dump") => {
                settings.dump = Some(match parser.value()?.string()?.as_str() {
                    "symbols" => Dump::Symbols,
                    "tree" => Dump::Tree,
                    other => {
                        return Err(lexopt::Error::UnexpectedValue {
                            option: "--dump".to_owned(),
                            value: other.into(),
                        });
                    }
                });
            }
            Short('h') | Long("help") => return Ok((settings, RunMode::Help)),
            Short('V') | Long("version") => return Ok((settings, RunMode::Version)),
            Value(value) => {
                let value = value.string()?;
                run_mode = Some(if value == "-" {
                    RunMode::Stdin
                } else {
                    RunMode::Script(value)
                });
                break;
            }
            _ => return Err(arg.unexpected()),
        }
    }
    if let Some(extra) = parser.raw_args()?.next() {
        return Err(lexopt::Error::UnexpectedArgument(extra));
    }
    Ok((settings, run_mode.unwrap_or(RunMode::Stdin)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<(Settings, RunMode), lexopt::Error> {
        parse_args(args.iter().map(OsString::from))
    }

    #[test]
    fn command_with_options() {
        let (settings, run_mode) = parse(&["-OO", "--mode", "eval", "-c", "1 + 1"]).unwrap();
        assert_eq!(settings.optimize, 2);
        assert_eq!(settings.mode, Mode::Eval);
        assert_eq!(run_mode, RunMode::Command("1 + 1".to_owned()));
    }

    #[test]
    fn dump_and_script() {
        let (settings, run_mode) = parse(&["--dump=symbols", "prog.py"]).unwrap();
        assert_eq!(settings.dump, Some(Dump::Symbols));
        assert_eq!(run_mode, RunMode::Script("prog.py".to_owned()));
    }

    #[test]
    fn defaults_to_stdin() {
        let (settings, run_mode) = parse(&[]).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(run_mode, RunMode::Stdin);
    }

    #[test]
    fn rejects_unknown_values() {
        assert!(parse(&["--dump", "bytecode"]).is_err());
        assert!(parse(&["--mode", "block"]).is_err());
        assert!(parse(&["--frobnicate"]).is_err());
        assert!(parse(&["a.py", "extra"]).is_err());
    }
}
