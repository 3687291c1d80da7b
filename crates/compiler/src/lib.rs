use ruff_source_file::{PositionEncoding, SourceFile, SourceFileBuilder, SourceLocation};
use arbor_codegen::{compile, symboltable::ScopeTree};

pub use arbor_codegen::compile::CompileOpts;
pub use arbor_compiler_core::{Mode, tree::CodeObject};

// these modules are out of repository. re-exporting them here for convenience.
pub use ruff_python_ast as ast;
pub use ruff_python_parser as parser;
pub use arbor_codegen as codegen;
pub use arbor_compiler_core as core;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompileErrorType {
    #[error(transparent)]
    Codegen(#[from] codegen::error::CodegenErrorType),
    #[error(transparent)]
    Parse(#[from] parser::ParseErrorType),
}

#[derive(Error, Debug)]
pub struct ParseError {
    #[source]
    pub error: parser::ParseErrorType,
    pub raw_location: ruff_text_size::TextRange,
    pub location: SourceLocation,
    pub end_location: SourceLocation,
    pub source_path: String,
}

impl ::core::fmt::Display for ParseError {
    fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
        self.error.fmt(f)
    }
}

#[derive(Error, Debug)]
pub enum CompileError {
    #[error(transparent)]
    Codegen(#[from] codegen::error::CodegenError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl CompileError {
    pub fn from_ruff_parse_error(error: parser::ParseError, source_file: &SourceFile) -> Self {
        let source_code = source_file.to_source_code();
        let location = source_code.source_location(error.location.start(), PositionEncoding::Utf8);
        let mut end_location =
            source_code.source_location(error.location.end(), PositionEncoding::Utf8);

        // A range ending at the start of a line ends with the previous one.
        if end_location.character_offset.get() == 1 && end_location.line > location.line {
            let prev_line_end = error.location.end() - ruff_text_size::TextSize::from(1);
            end_location = source_code.source_location(prev_line_end, PositionEncoding::Utf8);
            end_location.character_offset = end_location.character_offset.saturating_add(1);
        }

        Self::Parse(ParseError {
            error: error.error,
            raw_location: error.location,
            location,
            end_location,
            source_path: source_file.name().to_owned(),
        })
    }

    pub const fn location(&self) -> Option<SourceLocation> {
        match self {
            Self::Codegen(codegen_error) => codegen_error.location,
            Self::Parse(parse_error) => Some(parse_error.location),
        }
    }

    pub const fn python_location(&self) -> (usize, usize) {
        if let Some(location) = self.location() {
            (location.line.get(), location.character_offset.get())
        } else {
            (0, 0)
        }
    }

    pub fn source_path(&self) -> &str {
        match self {
            Self::Codegen(codegen_error) => &codegen_error.source_path,
            Self::Parse(parse_error) => &parse_error.source_path,
        }
    }
}

/// Compile a given source code into an executable tree.
pub fn compile(
    source: &str,
    mode: Mode,
    source_path: &str,
    opts: CompileOpts,
) -> Result<CodeObject, CompileError> {
    let source_file = SourceFileBuilder::new(source_path, source).finish();
    _compile(source_file, mode, opts)
}

fn _compile(
    source_file: SourceFile,
    mode: Mode,
    opts: CompileOpts,
) -> Result<CodeObject, CompileError> {
    let parser_mode = match mode {
        Mode::Exec => parser::Mode::Module,
        Mode::Eval => parser::Mode::Expression,
        // ruff does not have an interactive mode, which is fine,
        // since these are only different in terms of compilation
        Mode::Single | Mode::BlockExpr => parser::Mode::Module,
    };
    let parsed = parser::parse(source_file.source_text(), parser_mode.into())
        .map_err(|err| CompileError::from_ruff_parse_error(err, &source_file))?;
    let ast = parsed.into_syntax();
    compile::compile_top(ast, source_file, mode, opts).map_err(|e| e.into())
}

/// Resolve the scopes of a given source code without translating it.
pub fn compile_symtable(
    source: &str,
    mode: Mode,
    source_path: &str,
) -> Result<ScopeTree, CompileError> {
    let source_file = SourceFileBuilder::new(source_path, source).finish();
    _compile_symtable(source_file, mode)
}

fn _compile_symtable(source_file: SourceFile, mode: Mode) -> Result<ScopeTree, CompileError> {
    let res = match mode {
        Mode::Exec | Mode::Single | Mode::BlockExpr => {
            let ast = parser::parse_module(source_file.source_text())
                .map_err(|e| CompileError::from_ruff_parse_error(e, &source_file))?;
            ScopeTree::scan_program(ast.syntax(), source_file.clone())
        }
        Mode::Eval => {
            let ast = parser::parse_expression(source_file.source_text())
                .map_err(|e| CompileError::from_ruff_parse_error(e, &source_file))?;
            ScopeTree::scan_expr(ast.syntax(), source_file.clone())
        }
    };
    res.map_err(|e| e.into_codegen_error(&source_file).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_compiler_core::tree::{Expr, Stmt};

    fn compile_ok(source: &str, mode: Mode) -> CodeObject {
        compile(source, mode, "<test>", CompileOpts::default()).expect("compile error")
    }

    #[test]
    fn test_compile() {
        let code = compile_ok("x = 'abc'", Mode::Single);
        assert_eq!(code.qualname, "<module>");
        assert_eq!(code.source_path, "<test>");
    }

    #[test]
    fn test_compile_phello() {
        let code = r#"
initialized = True
def main():
    print("Hello world!")
if __name__ == '__main__':
    main()
"#;
        compile_ok(code, Mode::Exec);
    }

    #[test]
    fn test_compile_if_elif_else() {
        let code = r#"
if False:
    pass
elif False:
    pass
elif False:
    pass
else:
    pass
"#;
        compile_ok(code, Mode::Exec);
    }

    #[test]
    fn test_compile_lambda() {
        let code = r#"
def g():
    pass
def f():
    if False:
        return lambda x: g(x)
    elif False:
        return g
    else:
        return g
"#;
        compile_ok(code, Mode::Exec);
    }

    #[test]
    fn test_compile_fstring() {
        for code in [
            "assert f'1' == '1'",
            "assert f'{1+1}' == '2'",
            "assert f\"{{{(lambda: f'{1}')}\" == '{1'",
            "assert f\"{{{(lambda x: f'hello, {x}')('world}')}\" == '{hello, world}'",
        ] {
            compile_ok(code, Mode::Exec);
        }
    }

    #[test]
    fn test_eval_returns_value() {
        let code = compile_ok("1 + 2", Mode::Eval);
        assert!(matches!(code.body, Stmt::Return(Some(Expr::BinOp { .. }))));
    }

    #[test]
    fn test_single_echoes_expressions() {
        let code = compile_ok("x = 1\nx", Mode::Single);
        let Stmt::Block(body) = &code.body else {
            panic!("expected block");
        };
        assert!(matches!(body[1], Stmt::PrintExpr(_)));
    }

    #[test]
    fn test_block_expression_returns_last_value() {
        let code = compile_ok("x = 1\ndef f(): pass", Mode::BlockExpr);
        let Stmt::Block(body) = &code.body else {
            panic!("expected block");
        };
        assert!(matches!(
            body.last(),
            Some(Stmt::Return(Some(Expr::Load(_))))
        ));
    }

    #[test]
    fn test_parse_error_location() {
        let error = compile("x = (1,\n", Mode::Exec, "<test>", CompileOpts::default())
            .unwrap_err();
        assert!(matches!(error, CompileError::Parse(_)));
        assert_eq!(error.source_path(), "<test>");
        assert_eq!(error.python_location().0, 1);
    }

    #[test]
    fn test_codegen_error_location() {
        let error = compile(
            "x = 1\ndef f():\n    nonlocal y\n",
            Mode::Exec,
            "<test>",
            CompileOpts::default(),
        )
        .unwrap_err();
        let CompileError::Codegen(codegen) = &error else {
            panic!("expected codegen error: {error}");
        };
        assert_eq!(codegen.error.key(), "nonlocal-not-found");
        assert_eq!(error.python_location().0, 3);
        assert_eq!(error.to_string(), "no binding for nonlocal 'y' found");
    }

    #[test]
    fn test_symtable() {
        let tree = compile_symtable("def f(a):\n    return a\n", Mode::Exec, "<test>").unwrap();
        let (_, f) = tree.iter().nth(1).unwrap();
        assert_eq!(f.name, "f");
        assert_eq!(f.varnames, ["a"]);
        let tree = compile_symtable("[x for x in y]", Mode::Eval, "<test>").unwrap();
        assert_eq!(tree.len(), 2);
    }
}
