use arbor_compiler_core::SourceLocation;
use core::fmt::{self, Display};
use ruff_text_size::TextRange;
use thiserror::Error;

#[derive(Error, Debug)]
pub struct CodegenError {
    pub location: Option<SourceLocation>,
    pub range: TextRange,
    #[source]
    pub error: CodegenErrorType,
    pub source_path: String,
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl CodegenError {
    /// Hands the error to `reporter` as a range, a message key and its
    /// formatting arguments.
    pub fn report_to(&self, reporter: &mut dyn ErrorReporter) {
        reporter.report(self.range, self.error.key(), &self.error.args());
    }
}

/// Receives diagnostics without any user-facing formatting applied.
pub trait ErrorReporter {
    fn report(&mut self, range: TextRange, key: &'static str, args: &[String]);
}

/// One diagnostic as seen by an [`ErrorReporter`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportedError {
    pub range: TextRange,
    pub key: &'static str,
    pub args: Vec<String>,
}

impl ErrorReporter for Vec<ReportedError> {
    fn report(&mut self, range: TextRange, key: &'static str, args: &[String]) {
        self.push(ReportedError {
            range,
            key,
            args: args.to_vec(),
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Declaration {
    Global,
    Nonlocal,
}

impl Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Global => "global",
            Self::Nonlocal => "nonlocal",
        })
    }
}

/// Defects of the compiler itself; user input never triggers these.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InternalError {
    MissingSymbol(String),
    UnresolvedFree(String),
    ScopeMismatch { expected: String, found: String },
    YieldIndexCollision(u32),
    /// A generator body handed to the transformer a second time.
    ResumableInput,
}

impl Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSymbol(s) => write!(
                f,
                "The symbol '{s}' must be present in the symbol table, even when it is undefined in python."
            ),
            Self::UnresolvedFree(s) => {
                write!(f, "free variable '{s}' has no enclosing scope providing it")
            }
            Self::ScopeMismatch { expected, found } => {
                write!(f, "expected scope '{expected}' but the next scope is '{found}'")
            }
            Self::YieldIndexCollision(index) => {
                write!(f, "yield index {index} assigned twice")
            }
            Self::ResumableInput => write!(f, "generator body is already resumable"),
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum CodegenErrorType {
    /// Invalid assignment, cannot store value in target.
    Assign(&'static str),
    /// Invalid delete
    Delete(&'static str),
    SyntaxError(String),
    /// Multiple `*` detected
    MultipleStarArgs,
    /// Misplaced `*` expression
    InvalidStarExpr,
    /// A lone starred name as an assignment target
    StarredAssignTarget,
    /// Break statement outside of loop.
    InvalidBreak,
    /// Continue statement outside of loop.
    InvalidContinue,
    InvalidReturn,
    InvalidYield,
    InvalidYieldFrom,
    YieldInComprehension(&'static str),
    FunctionImportStar,
    TooManyStarUnpack,
    DuplicateParameter(String),
    DefaultBeforeNonDefault,
    NonlocalNotFound(String),
    NonlocalAtModuleLevel(String),
    UsedBeforeDeclaration {
        name: String,
        declaration: Declaration,
    },
    AssignedBeforeDeclaration {
        name: String,
        declaration: Declaration,
    },
    ParameterDeclared {
        name: String,
        declaration: Declaration,
    },
    AnnotatedDeclared {
        name: String,
        declaration: Declaration,
    },
    NonlocalAndGlobal(String),
    ComprehensionRebind(String),
    NamedExprInIterable,
    NamedExprInClassComprehension,
    NotImplementedYet,
    InternalError(InternalError),
}

impl core::error::Error for CodegenErrorType {}

impl CodegenErrorType {
    /// Stable identifier of the message, independent of its arguments.
    pub fn key(&self) -> &'static str {
        use CodegenErrorType::*;
        match self {
            Assign(_) => "assign-target",
            Delete(_) => "delete-target",
            SyntaxError(_) => "syntax-error",
            MultipleStarArgs => "multiple-starred",
            InvalidStarExpr => "invalid-starred",
            StarredAssignTarget => "starred-outside-target-list",
            InvalidBreak => "break-outside-loop",
            InvalidContinue => "continue-outside-loop",
            InvalidReturn => "return-outside-function",
            InvalidYield => "yield-outside-function",
            InvalidYieldFrom => "yield-from-outside-function",
            YieldInComprehension(_) => "yield-in-comprehension",
            FunctionImportStar => "import-star-in-function",
            TooManyStarUnpack => "too-many-star-unpack",
            DuplicateParameter(_) => "duplicate-parameter",
            DefaultBeforeNonDefault => "default-before-non-default",
            NonlocalNotFound(_) => "nonlocal-not-found",
            NonlocalAtModuleLevel(_) => "nonlocal-at-module-level",
            UsedBeforeDeclaration { .. } => "used-before-declaration",
            AssignedBeforeDeclaration { .. } => "assigned-before-declaration",
            ParameterDeclared { .. } => "parameter-declared",
            AnnotatedDeclared { .. } => "annotated-declared",
            NonlocalAndGlobal(_) => "nonlocal-and-global",
            ComprehensionRebind(_) => "comprehension-rebind",
            NamedExprInIterable => "named-expr-in-iterable",
            NamedExprInClassComprehension => "named-expr-in-class-comprehension",
            NotImplementedYet => "not-implemented",
            InternalError(_) => "internal-error",
        }
    }

    /// Formatting arguments of the message, in order of appearance.
    pub fn args(&self) -> Vec<String> {
        use CodegenErrorType::*;
        match self {
            Assign(target) | Delete(target) | YieldInComprehension(target) => {
                vec![(*target).to_owned()]
            }
            SyntaxError(message) => vec![message.clone()],
            DuplicateParameter(name)
            | NonlocalNotFound(name)
            | NonlocalAtModuleLevel(name)
            | NonlocalAndGlobal(name)
            | ComprehensionRebind(name) => vec![name.clone()],
            UsedBeforeDeclaration { name, declaration }
            | AssignedBeforeDeclaration { name, declaration }
            | ParameterDeclared { name, declaration }
            | AnnotatedDeclared { name, declaration } => {
                vec![name.clone(), declaration.to_string()]
            }
            InternalError(error) => vec![error.to_string()],
            MultipleStarArgs
            | InvalidStarExpr
            | StarredAssignTarget
            | InvalidBreak
            | InvalidContinue
            | InvalidReturn
            | InvalidYield
            | InvalidYieldFrom
            | FunctionImportStar
            | TooManyStarUnpack
            | DefaultBeforeNonDefault
            | NamedExprInIterable
            | NamedExprInClassComprehension
            | NotImplementedYet => Vec::new(),
        }
    }
}

impl fmt::Display for CodegenErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use CodegenErrorType::*;
        match self {
            Assign(target) => write!(f, "cannot assign to {target}"),
            Delete(target) => write!(f, "cannot delete {target}"),
            SyntaxError(err) => write!(f, "{}", err.as_str()),
            MultipleStarArgs => {
                write!(f, "multiple starred expressions in assignment")
            }
            InvalidStarExpr => write!(f, "can't use starred expression here"),
            StarredAssignTarget => {
                write!(f, "starred assignment target must be in a list or tuple")
            }
            InvalidBreak => write!(f, "'break' outside loop"),
            InvalidContinue => write!(f, "'continue' not properly in loop"),
            InvalidReturn => write!(f, "'return' outside function"),
            InvalidYield => write!(f, "'yield' outside function"),
            InvalidYieldFrom => write!(f, "'yield from' outside function"),
            YieldInComprehension(kind) => write!(f, "'yield' inside {kind}"),
            FunctionImportStar => {
                write!(f, "import * only allowed at module level")
            }
            TooManyStarUnpack => {
                write!(f, "too many expressions in star-unpacking assignment")
            }
            DuplicateParameter(name) => {
                write!(f, "duplicate argument '{name}' in function definition")
            }
            DefaultBeforeNonDefault => {
                write!(f, "parameter without a default follows parameter with a default")
            }
            NonlocalNotFound(name) => write!(f, "no binding for nonlocal '{name}' found"),
            NonlocalAtModuleLevel(name) => {
                write!(f, "nonlocal declaration not allowed at module level: '{name}'")
            }
            UsedBeforeDeclaration { name, declaration } => {
                write!(f, "name '{name}' is used prior to {declaration} declaration")
            }
            AssignedBeforeDeclaration { name, declaration } => {
                write!(
                    f,
                    "name '{name}' is assigned to before {declaration} declaration"
                )
            }
            ParameterDeclared { name, declaration } => {
                write!(f, "name '{name}' is parameter and {declaration}")
            }
            AnnotatedDeclared { name, declaration } => {
                write!(f, "annotated name '{name}' can't be {declaration}")
            }
            NonlocalAndGlobal(name) => write!(f, "name '{name}' is nonlocal and global"),
            ComprehensionRebind(name) => write!(
                f,
                "assignment expression cannot rebind comprehension iteration variable '{name}'"
            ),
            NamedExprInIterable => write!(
                f,
                "assignment expression cannot be used in a comprehension iterable expression"
            ),
            NamedExprInClassComprehension => write!(
                f,
                "assignment expression within a comprehension cannot be used in a class body"
            ),
            NotImplementedYet => {
                write!(f, "arbor does not implement this feature yet")
            }
            InternalError(error) => write!(f, "internal compiler error: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_and_args_match_display() {
        let error = CodegenErrorType::UsedBeforeDeclaration {
            name: "x".to_owned(),
            declaration: Declaration::Global,
        };
        assert_eq!(error.key(), "used-before-declaration");
        assert_eq!(error.args(), vec!["x".to_owned(), "global".to_owned()]);
        assert_eq!(
            error.to_string(),
            "name 'x' is used prior to global declaration"
        );
    }

    #[test]
    fn reporter_receives_range_key_and_args() {
        let error = CodegenError {
            location: None,
            range: TextRange::default(),
            error: CodegenErrorType::NonlocalNotFound("y".to_owned()),
            source_path: "<test>".to_owned(),
        };
        let mut reported = Vec::<ReportedError>::new();
        error.report_to(&mut reported);
        assert_eq!(
            reported,
            vec![ReportedError {
                range: TextRange::default(),
                key: "nonlocal-not-found",
                args: vec!["y".to_owned()],
            }]
        );
    }
}
