use core::fmt;

/// How a source unit is compiled and what its code object returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// A module: statements run for effect, the result is `None`.
    Exec,
    /// A single expression whose value is the result.
    Eval,
    /// An interactive line: top-level expression statements are echoed.
    Single,
    /// Statements whose trailing expression statement is the result.
    BlockExpr,
}

impl core::str::FromStr for Mode {
    type Err = ModeParseError;

    // To support `builtins.compile()` `mode` argument
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exec" => Ok(Self::Exec),
            "eval" => Ok(Self::Eval),
            "single" => Ok(Self::Single),
            _ => Err(ModeParseError),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Exec => "exec",
            Self::Eval => "eval",
            Self::Single => "single",
            Self::BlockExpr => "block_expr",
        })
    }
}

/// Returned when a given mode is not valid.
#[derive(Debug)]
pub struct ModeParseError;

impl fmt::Display for ModeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, r#"mode must be "exec", "eval", or "single""#)
    }
}

impl core::error::Error for ModeParseError {}
