//!
//! Take an AST and translate it into an executable tree.
//!
//! Inspirational code:
//!   <https://github.com/python/cpython/blob/main/Python/compile.c>

use crate::{
    IndexSet, ToPythonName,
    error::{CodegenError, CodegenErrorType, InternalError},
    generator,
    loops::{LoopKind, LoopStack, wire_loop},
    symboltable::{CompilerScope, ComprehensionType, ScopeId, ScopeTree, Symbol, SymbolScope},
};
use alloc::{borrow::Cow, sync::Arc};
use arbor_compiler_core::{
    Mode, OneIndexed, PositionEncoding, SourceFile,
    tree::{
        BinaryOperator, BoolOperator, CodeFlags, CodeObject, CollectionKind, ComparisonOperator,
        ConstantData, Conversion, DictEntry, ExceptHandler, Expr, Keyword, MakeClass,
        MakeFunction, NameRef, Stmt, Target, UnaryOperator,
    },
};
use core::mem;
use malachite_bigint::BigInt;
use num_complex::Complex;
use num_traits::Num;
use ruff_python_ast as ast;
use ruff_text_size::{Ranged, TextRange};

type CompileResult<T> = Result<T, CodegenError>;

#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOpts {
    /// How much to strip: `1` removes asserts and `__debug__` blocks, `2`
    /// additionally drops docstrings.
    pub optimize: u8,
}

/// Per code object state while its body is being translated.
struct CodeInfo {
    scope: ScopeId,
    flags: CodeFlags,
    obj_name: String,
    qualname: String,
    /// Class name used for private name mangling.
    private: Option<String>,
    first_line_number: Option<OneIndexed>,
    posonlyarg_count: u32,
    arg_count: u32,
    kwonlyarg_count: u32,
    doc: Option<String>,
    varnames: IndexSet<String>,
    cellvars: IndexSet<String>,
    freevars: IndexSet<String>,
    loops: LoopStack,
    temporaries: u32,
}

struct Compiler {
    code: CodeInfo,
    parents: Vec<CodeInfo>,
    scopes: ScopeTree,
    source_file: SourceFile,
    current_source_range: TextRange,
    opts: CompileOpts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameUsage {
    Load,
    Store,
    Delete,
}

enum FunctionBody<'a> {
    Statements(&'a [ast::Stmt]),
    Lambda(&'a ast::Expr),
}

/// Compile an Mod produced from ruff parser
pub fn compile_top(
    ast: ast::Mod,
    source_file: SourceFile,
    mode: Mode,
    opts: CompileOpts,
) -> CompileResult<CodeObject> {
    match ast {
        ast::Mod::Module(module) => match mode {
            Mode::Exec | Mode::Eval => compile_program(&module, source_file, opts),
            Mode::Single => compile_program_single(&module, source_file, opts),
            Mode::BlockExpr => compile_block_expression(&module, source_file, opts),
        },
        ast::Mod::Expression(expr) => compile_expression(&expr, source_file, opts),
    }
}

fn scan_program(ast: &ast::ModModule, source_file: &SourceFile) -> CompileResult<ScopeTree> {
    ScopeTree::scan_program(ast, source_file.clone())
        .map_err(|e| e.into_codegen_error(source_file))
}

/// Compile a standard Python program
pub fn compile_program(
    ast: &ast::ModModule,
    source_file: SourceFile,
    opts: CompileOpts,
) -> CompileResult<CodeObject> {
    let scopes = scan_program(ast, &source_file)?;
    let mut compiler = Compiler::new(opts, source_file, scopes);
    let body = compiler.compile_program(&ast.body)?;
    let code = compiler.finish(body)?;
    trace!("compilation completed: {}", code.qualname);
    Ok(code)
}

/// Compile a Python program for the context of a REPL
pub fn compile_program_single(
    ast: &ast::ModModule,
    source_file: SourceFile,
    opts: CompileOpts,
) -> CompileResult<CodeObject> {
    let scopes = scan_program(ast, &source_file)?;
    let mut compiler = Compiler::new(opts, source_file, scopes);
    let body = compiler.compile_program_single(&ast.body)?;
    let code = compiler.finish(body)?;
    trace!("compilation completed: {}", code.qualname);
    Ok(code)
}

pub fn compile_block_expression(
    ast: &ast::ModModule,
    source_file: SourceFile,
    opts: CompileOpts,
) -> CompileResult<CodeObject> {
    let scopes = scan_program(ast, &source_file)?;
    let mut compiler = Compiler::new(opts, source_file, scopes);
    let body = compiler.compile_block_expr(&ast.body)?;
    let code = compiler.finish(body)?;
    trace!("compilation completed: {}", code.qualname);
    Ok(code)
}

pub fn compile_expression(
    ast: &ast::ModExpression,
    source_file: SourceFile,
    opts: CompileOpts,
) -> CompileResult<CodeObject> {
    let scopes = ScopeTree::scan_expr(ast, source_file.clone())
        .map_err(|e| e.into_codegen_error(&source_file))?;
    let mut compiler = Compiler::new(opts, source_file, scopes);
    let body = Stmt::Return(Some(compiler.compile_expression(&ast.body)?));
    compiler.finish(body)
}

fn name_assign(name: &str, value: Expr) -> Stmt {
    Stmt::Assign {
        target: Target::Name(NameRef::Name(name.to_owned())),
        value,
    }
}

fn str_constant(value: impl Into<String>) -> Expr {
    Expr::Constant(ConstantData::Str {
        value: value.into(),
    })
}

fn extend_body(body: &mut Vec<Stmt>, stmt: Stmt) {
    match stmt {
        Stmt::Block(stmts) => body.extend(stmts),
        stmt => body.push(stmt),
    }
}

fn is_debug_name(expr: &ast::Expr) -> bool {
    matches!(expr, ast::Expr::Name(ast::ExprName { id, .. }) if id.as_str() == "__debug__")
}

impl Compiler {
    fn new(opts: CompileOpts, source_file: SourceFile, scopes: ScopeTree) -> Self {
        let module = CodeInfo {
            scope: ScopeId::ROOT,
            flags: CodeFlags::empty(),
            obj_name: "<module>".to_owned(),
            qualname: "<module>".to_owned(),
            private: None,
            first_line_number: Some(OneIndexed::MIN),
            posonlyarg_count: 0,
            arg_count: 0,
            kwonlyarg_count: 0,
            doc: None,
            varnames: scopes.root().varnames.iter().cloned().collect(),
            cellvars: scopes.root().cellvars.iter().cloned().collect(),
            freevars: IndexSet::default(),
            loops: LoopStack::default(),
            temporaries: 0,
        };
        Self {
            code: module,
            parents: Vec::new(),
            scopes,
            source_file,
            current_source_range: TextRange::default(),
            opts,
        }
    }

    fn error(&self, error: CodegenErrorType) -> CodegenError {
        self.error_ranged(error, self.current_source_range)
    }

    fn error_ranged(&self, error: CodegenErrorType, range: TextRange) -> CodegenError {
        let location = self
            .source_file
            .to_source_code()
            .source_location(range.start(), PositionEncoding::Utf8);
        CodegenError {
            location: Some(location),
            range,
            error,
            source_path: self.source_file.name().to_owned(),
        }
    }

    fn internal_error(&self, error: InternalError) -> CodegenError {
        error!("internal compiler error: {error}");
        self.error(CodegenErrorType::InternalError(error))
    }

    fn in_function_like(&self) -> bool {
        self.scopes[self.code.scope].is_function_like()
    }

    fn mangle<'a>(&self, name: &'a str) -> Cow<'a, str> {
        crate::symboltable::mangle_name(self.code.private.as_deref(), name)
    }

    /// The scope the resolver created for the definition spanning `range`.
    fn child_scope(&self, name: &str, range: TextRange) -> CompileResult<ScopeId> {
        self.scopes
            .child_at(self.code.scope, range)
            .ok_or_else(|| {
                self.internal_error(InternalError::ScopeMismatch {
                    expected: name.to_owned(),
                    found: self.scopes[self.code.scope].name.clone(),
                })
            })
    }

    // = compiler_set_qualname
    fn make_qualname(&self, name: &str) -> String {
        let parent = &self.code;
        let parent_table = &self.scopes[parent.scope];
        if parent_table.typ == CompilerScope::Module {
            return name.to_owned();
        }
        let mangled = self.mangle(name);
        let force_global = parent_table
            .lookup(&mangled)
            .is_some_and(|symbol| symbol.scope == SymbolScope::GlobalExplicit);
        if force_global {
            name.to_owned()
        } else if parent_table.is_function_like() {
            format!("{}.<locals>.{name}", parent.qualname)
        } else {
            format!("{}.{name}", parent.qualname)
        }
    }

    fn enter_scope(&mut self, name: &str, scope: ScopeId) {
        let qualname = self.make_qualname(name);
        let table = &self.scopes[scope];
        let mut flags = CodeFlags::empty();
        if table.is_function_like() {
            flags |= CodeFlags::NEWLOCALS;
        }
        if table.is_generator {
            flags |= CodeFlags::GENERATOR;
        }
        let private = if table.typ == CompilerScope::Class {
            flags |= CodeFlags::IS_CLASS_BODY;
            Some(name.to_owned())
        } else {
            self.code.private.clone()
        };
        trace!("entering {} scope {qualname}", table.typ);
        let info = CodeInfo {
            scope,
            flags,
            obj_name: name.to_owned(),
            qualname,
            private,
            first_line_number: OneIndexed::new(table.line_number as usize),
            posonlyarg_count: 0,
            arg_count: 0,
            kwonlyarg_count: 0,
            doc: None,
            varnames: table.varnames.iter().cloned().collect(),
            cellvars: table.cellvars.iter().cloned().collect(),
            freevars: table.freevars.iter().cloned().collect(),
            loops: LoopStack::default(),
            temporaries: 0,
        };
        let parent = mem::replace(&mut self.code, info);
        self.parents.push(parent);
    }

    fn exit_scope(&mut self, body: Stmt) -> CompileResult<CodeObject> {
        let Some(parent) = self.parents.pop() else {
            return Err(self.internal_error(InternalError::ScopeMismatch {
                expected: "an enclosing scope".to_owned(),
                found: self.code.qualname.clone(),
            }));
        };
        let info = mem::replace(&mut self.code, parent);
        self.finalize_code(info, body)
    }

    fn finish(mut self, body: Stmt) -> CompileResult<CodeObject> {
        if !self.parents.is_empty() {
            return Err(self.internal_error(InternalError::ScopeMismatch {
                expected: "<module>".to_owned(),
                found: self.code.qualname.clone(),
            }));
        }
        let module = mem::replace(
            &mut self.code,
            CodeInfo {
                scope: ScopeId::ROOT,
                flags: CodeFlags::empty(),
                obj_name: String::new(),
                qualname: String::new(),
                private: None,
                first_line_number: None,
                posonlyarg_count: 0,
                arg_count: 0,
                kwonlyarg_count: 0,
                doc: None,
                varnames: IndexSet::default(),
                cellvars: IndexSet::default(),
                freevars: IndexSet::default(),
                loops: LoopStack::default(),
                temporaries: 0,
            },
        );
        self.finalize_code(module, body)
    }

    fn finalize_code(&self, info: CodeInfo, body: Stmt) -> CompileResult<CodeObject> {
        let CodeInfo {
            flags,
            obj_name,
            qualname,
            first_line_number,
            posonlyarg_count,
            arg_count,
            kwonlyarg_count,
            doc,
            varnames,
            cellvars,
            freevars,
            ..
        } = info;
        let mut varnames: Vec<String> = varnames.into_iter().collect();

        let (body, generator) = if flags.contains(CodeFlags::GENERATOR) {
            let (body, descriptor) = generator::transform(body, &mut varnames)
                .map_err(|e| self.internal_error(e))?;
            (body, Some(descriptor))
        } else {
            (body, None)
        };

        let mut total_args = arg_count + kwonlyarg_count;
        if flags.contains(CodeFlags::VARARGS) {
            total_args += 1;
        }
        if flags.contains(CodeFlags::VARKEYWORDS) {
            total_args += 1;
        }
        let cell2arg: Vec<i32> = cellvars
            .iter()
            .map(|cell| {
                varnames
                    .iter()
                    .take(total_args as usize)
                    .position(|var| var == cell)
                    .map_or(-1, |index| index as i32)
            })
            .collect();
        let cell2arg = cell2arg
            .iter()
            .any(|&arg| arg >= 0)
            .then(|| cell2arg.into_boxed_slice());

        Ok(CodeObject {
            body,
            flags,
            posonlyarg_count,
            arg_count,
            kwonlyarg_count,
            source_path: self.source_file.name().to_owned(),
            first_line_number,
            obj_name,
            qualname,
            doc,
            varnames: varnames.into_boxed_slice(),
            cellvars: cellvars.into_iter().collect(),
            freevars: freevars.into_iter().collect(),
            cell2arg,
            generator,
        })
    }

    /// A fresh fast slot, appended after every source-level name.
    fn new_temporary(&mut self) -> NameRef {
        let name = format!(".t{}", self.code.temporaries);
        self.code.temporaries += 1;
        let (index, _) = self.code.varnames.insert_full(name);
        NameRef::Fast(index as u32)
    }

    /// Evaluates `expr` into a temporary unless reading it twice is harmless.
    fn hold(&mut self, expr: Expr, setup: &mut Vec<Stmt>) -> Expr {
        if expr.is_side_effect_free() {
            return expr;
        }
        let temp = self.new_temporary();
        setup.push(Stmt::Assign {
            target: Target::Name(temp.clone()),
            value: expr,
        });
        Expr::Load(temp)
    }

    fn check_forbidden_name(&self, name: &str, usage: NameUsage) -> CompileResult<()> {
        if name == "__debug__" {
            match usage {
                NameUsage::Store => return Err(self.error(CodegenErrorType::Assign("__debug__"))),
                NameUsage::Delete => return Err(self.error(CodegenErrorType::Delete("__debug__"))),
                NameUsage::Load => {}
            }
        }
        Ok(())
    }

    fn resolve_name(&mut self, name: &str, usage: NameUsage) -> CompileResult<NameRef> {
        self.check_forbidden_name(name, usage)?;
        let name = self.mangle(name).into_owned();
        let table = &self.scopes[self.code.scope];
        let symbol = table.lookup(&name);
        debug_assert!(
            symbol.is_some(),
            "symbol '{name}' missing from scope '{}'",
            table.name
        );
        let Some(scope) = symbol.map(|symbol| symbol.scope) else {
            return Err(self.internal_error(InternalError::MissingSymbol(name)));
        };
        let function_like = table.is_function_like();
        let in_class = table.typ == CompilerScope::Class;

        let name_ref = match scope {
            SymbolScope::Free => {
                let Some(index) = self.code.freevars.get_index_of(&name) else {
                    return Err(self.internal_error(InternalError::UnresolvedFree(name)));
                };
                let index = (index + self.code.cellvars.len()) as u32;
                if in_class && usage == NameUsage::Load {
                    NameRef::DictOrDeref { name, index }
                } else {
                    NameRef::Deref(index)
                }
            }
            SymbolScope::Cell => {
                let Some(index) = self.code.cellvars.get_index_of(&name) else {
                    return Err(self.internal_error(InternalError::MissingSymbol(name)));
                };
                NameRef::Deref(index as u32)
            }
            SymbolScope::Local if function_like => {
                let index = self
                    .code
                    .varnames
                    .get_index_of(&name)
                    .unwrap_or_else(|| self.code.varnames.insert_full(name).0);
                NameRef::Fast(index as u32)
            }
            SymbolScope::GlobalImplicit if function_like => NameRef::Global(name),
            SymbolScope::GlobalExplicit => NameRef::Global(name),
            SymbolScope::Local | SymbolScope::GlobalImplicit | SymbolScope::Unknown => {
                NameRef::Name(name)
            }
        };
        Ok(name_ref)
    }

    fn load_name(&mut self, name: &str) -> CompileResult<Expr> {
        if name == "__debug__" {
            return Ok(Expr::Constant(ConstantData::Boolean {
                value: self.opts.optimize == 0,
            }));
        }
        Ok(Expr::Load(self.resolve_name(name, NameUsage::Load)?))
    }

    fn store_name(&mut self, name: &str) -> CompileResult<NameRef> {
        self.resolve_name(name, NameUsage::Store)
    }

    /// Statements run at the start of a module or class body.
    fn body_prologue(&mut self, body: &[ast::Stmt], prologue: &mut Vec<Stmt>) -> usize {
        let (doc, rest) = split_doc(body, &self.opts);
        if let Some(doc) = doc {
            self.code.flags |= CodeFlags::HAS_DOCSTRING;
            prologue.push(name_assign("__doc__", str_constant(doc)));
        }
        if find_ann(body) {
            prologue.push(name_assign("__annotations__", Expr::Dict(Vec::new())));
        }
        body.len() - rest.len()
    }

    fn compile_program(&mut self, body: &[ast::Stmt]) -> CompileResult<Stmt> {
        let mut stmts = Vec::new();
        let skip = self.body_prologue(body, &mut stmts);
        let rest = self.compile_statements(&body[skip..])?;
        extend_body(&mut stmts, rest);
        Ok(stmts.into())
    }

    fn compile_program_single(&mut self, body: &[ast::Stmt]) -> CompileResult<Stmt> {
        let mut stmts = Vec::new();
        if find_ann(body) {
            stmts.push(name_assign("__annotations__", Expr::Dict(Vec::new())));
        }
        for statement in body {
            if let ast::Stmt::Expr(ast::StmtExpr { value, .. }) = statement {
                self.current_source_range = statement.range();
                let value = self.compile_expression(value)?;
                stmts.push(Stmt::PrintExpr(value));
            } else {
                let stmt = self.compile_statement(statement)?;
                extend_body(&mut stmts, stmt);
            }
        }
        Ok(stmts.into())
    }

    fn compile_block_expr(&mut self, body: &[ast::Stmt]) -> CompileResult<Stmt> {
        let mut stmts = Vec::new();
        let Some((last, init)) = body.split_last() else {
            return Ok(Stmt::Return(None));
        };
        for statement in init {
            let stmt = self.compile_statement(statement)?;
            extend_body(&mut stmts, stmt);
        }
        self.current_source_range = last.range();
        let result = match last {
            ast::Stmt::Expr(ast::StmtExpr { value, .. }) => self.compile_expression(value)?,
            ast::Stmt::FunctionDef(ast::StmtFunctionDef { name, .. })
            | ast::Stmt::ClassDef(ast::StmtClassDef { name, .. }) => {
                let stmt = self.compile_statement(last)?;
                extend_body(&mut stmts, stmt);
                self.load_name(name.as_str())?
            }
            // A trailing statement still runs; the block's value is `None`.
            _ => Expr::from(self.compile_statement(last)?),
        };
        stmts.push(Stmt::Return(Some(result)));
        Ok(Stmt::Block(stmts))
    }

    fn compile_statements(&mut self, body: &[ast::Stmt]) -> CompileResult<Stmt> {
        let mut stmts = Vec::with_capacity(body.len());
        for statement in body {
            let stmt = self.compile_statement(statement)?;
            if !matches!(&stmt, Stmt::Block(inner) if inner.is_empty()) {
                stmts.push(stmt);
            }
        }
        Ok(stmts.into())
    }

    fn compile_statement(&mut self, statement: &ast::Stmt) -> CompileResult<Stmt> {
        trace!("compiling {:?}", statement.range());
        self.current_source_range = statement.range();

        let stmt = match statement {
            ast::Stmt::Expr(ast::StmtExpr { value, .. }) => {
                Stmt::from(self.compile_expression(value)?)
            }
            ast::Stmt::Assign(ast::StmtAssign { targets, value, .. }) => {
                self.compile_assign(targets, value)?
            }
            ast::Stmt::AugAssign(ast::StmtAugAssign {
                target, op, value, ..
            }) => self.compile_augassign(target, *op, value)?,
            ast::Stmt::AnnAssign(ast::StmtAnnAssign {
                target,
                annotation,
                value,
                simple,
                ..
            }) => self.compile_annotated_assign(target, annotation, value.as_deref(), *simple)?,
            ast::Stmt::Delete(ast::StmtDelete { targets, .. }) => {
                let mut stmts = Vec::with_capacity(targets.len());
                for target in targets {
                    extend_body(&mut stmts, self.compile_delete(target)?);
                }
                stmts.into()
            }
            ast::Stmt::If(ast::StmtIf {
                test,
                body,
                elif_else_clauses,
                ..
            }) => self.compile_if(test, body, elif_else_clauses)?,
            ast::Stmt::While(ast::StmtWhile {
                test, body, orelse, ..
            }) => self.compile_while(test, body, orelse)?,
            ast::Stmt::For(ast::StmtFor {
                target,
                iter,
                body,
                orelse,
                is_async,
                ..
            }) => {
                if *is_async {
                    return Err(self.error(CodegenErrorType::NotImplementedYet));
                }
                self.compile_for(target, iter, body, orelse)?
            }
            ast::Stmt::Break(_) => {
                self.code
                    .loops
                    .mark_break()
                    .map_err(|e| self.error_ranged(e, statement.range()))?;
                Stmt::Break
            }
            ast::Stmt::Continue(_) => {
                self.code
                    .loops
                    .mark_continue()
                    .map_err(|e| self.error_ranged(e, statement.range()))?;
                Stmt::Continue
            }
            ast::Stmt::Return(ast::StmtReturn { value, .. }) => {
                if !self.in_function_like() {
                    return Err(self.error_ranged(
                        CodegenErrorType::InvalidReturn,
                        statement.range(),
                    ));
                }
                let value = value
                    .as_deref()
                    .map(|value| self.compile_expression(value))
                    .transpose()?;
                Stmt::Return(value)
            }
            ast::Stmt::Raise(ast::StmtRaise { exc, cause, .. }) => {
                let exc = exc
                    .as_deref()
                    .map(|exc| self.compile_expression(exc))
                    .transpose()?;
                let cause = cause
                    .as_deref()
                    .map(|cause| self.compile_expression(cause))
                    .transpose()?;
                Stmt::Raise { exc, cause }
            }
            ast::Stmt::Assert(ast::StmtAssert { test, msg, .. }) => {
                if self.opts.optimize > 0 {
                    Stmt::empty()
                } else {
                    let test = self.compile_expression(test)?;
                    let msg = msg
                        .as_deref()
                        .map(|msg| self.compile_expression(msg))
                        .transpose()?;
                    Stmt::Assert { test, msg }
                }
            }
            ast::Stmt::Try(try_stmt) => self.compile_try(try_stmt)?,
            ast::Stmt::With(ast::StmtWith {
                items,
                body,
                is_async,
                ..
            }) => {
                if *is_async {
                    return Err(self.error(CodegenErrorType::NotImplementedYet));
                }
                self.compile_with(items, body)?
            }
            ast::Stmt::FunctionDef(function) => self.compile_function_def(function)?,
            ast::Stmt::ClassDef(class) => self.compile_class_def(class)?,
            ast::Stmt::Import(ast::StmtImport { names, .. }) => self.compile_import(names)?,
            ast::Stmt::ImportFrom(ast::StmtImportFrom {
                module,
                names,
                level,
                ..
            }) => self.compile_import_from(module.as_ref(), names, *level)?,
            ast::Stmt::Global(_) | ast::Stmt::Nonlocal(_) => Stmt::empty(),
            ast::Stmt::Pass(_) => Stmt::Pass,
            ast::Stmt::Match(_) | ast::Stmt::TypeAlias(_) | ast::Stmt::IpyEscapeCommand(_) => {
                return Err(self.error(CodegenErrorType::NotImplementedYet));
            }
        };
        Ok(stmt)
    }

    fn compile_assign(&mut self, targets: &[ast::Expr], value: &ast::Expr) -> CompileResult<Stmt> {
        let value = self.compile_expression(value)?;
        match targets {
            [target @ (ast::Expr::Name(_) | ast::Expr::Attribute(_) | ast::Expr::Subscript(_))] => {
                Ok(Stmt::Assign {
                    target: self.compile_store(target)?,
                    value,
                })
            }
            targets => {
                // Unpacking and chained assignment read the value from one temporary.
                let temp = self.new_temporary();
                let mut stmts = vec![Stmt::Assign {
                    target: Target::Name(temp.clone()),
                    value,
                }];
                for target in targets {
                    stmts.push(Stmt::Assign {
                        target: self.compile_store(target)?,
                        value: Expr::Load(temp.clone()),
                    });
                }
                Ok(Stmt::Block(stmts))
            }
        }
    }

    fn compile_augassign(
        &mut self,
        target: &ast::Expr,
        op: ast::Operator,
        value: &ast::Expr,
    ) -> CompileResult<Stmt> {
        let mut stmts = Vec::new();
        let (load, store) = match target {
            // A name target has no operand to hold; the read happens once,
            // as the left side of the in-place operation.
            ast::Expr::Name(ast::ExprName { id, .. }) => {
                let store = Target::Name(self.store_name(id.as_str())?);
                (self.load_name(id.as_str())?, store)
            }
            ast::Expr::Attribute(ast::ExprAttribute { value, attr, .. }) => {
                let object = self.compile_expression(value)?;
                let object = self.hold(object, &mut stmts);
                let attr = self.mangle(attr.as_str()).into_owned();
                let load = Expr::Attribute {
                    value: Box::new(object.clone()),
                    attr: attr.clone(),
                };
                (
                    load,
                    Target::Attribute {
                        value: object,
                        attr,
                    },
                )
            }
            ast::Expr::Subscript(ast::ExprSubscript { value, slice, .. }) => {
                let object = self.compile_expression(value)?;
                let object = self.hold(object, &mut stmts);
                let index = self.compile_expression(slice)?;
                let index = self.hold(index, &mut stmts);
                let load = Expr::Subscript {
                    value: Box::new(object.clone()),
                    index: Box::new(index.clone()),
                };
                (
                    load,
                    Target::Subscript {
                        value: object,
                        index,
                    },
                )
            }
            _ => {
                return Err(self.error_ranged(
                    CodegenErrorType::Assign(target.python_name()),
                    target.range(),
                ));
            }
        };
        let value = self.compile_expression(value)?;
        stmts.push(Stmt::Assign {
            target: store,
            value: Expr::BinOp {
                op: binary_operator(op),
                left: Box::new(load),
                right: Box::new(value),
                inplace: true,
            },
        });
        Ok(stmts.into())
    }

    fn compile_annotated_assign(
        &mut self,
        target: &ast::Expr,
        annotation: &ast::Expr,
        value: Option<&ast::Expr>,
        simple: bool,
    ) -> CompileResult<Stmt> {
        let mut stmts = Vec::new();
        if let Some(value) = value {
            let value = self.compile_expression(value)?;
            stmts.push(Stmt::Assign {
                target: self.compile_store(target)?,
                value,
            });
        } else if let ast::Expr::Name(ast::ExprName { id, .. }) = target {
            self.check_forbidden_name(id.as_str(), NameUsage::Store)?;
        }

        if let ast::Expr::Name(ast::ExprName { id, .. }) = target
            && simple
            && !self.in_function_like()
        {
            let name = self.mangle(id.as_str()).into_owned();
            let annotation = self.compile_expression(annotation)?;
            stmts.push(Stmt::Assign {
                target: Target::Subscript {
                    value: Expr::Load(NameRef::Name("__annotations__".to_owned())),
                    index: str_constant(name),
                },
                value: annotation,
            });
        }
        Ok(stmts.into())
    }

    fn compile_store(&mut self, target: &ast::Expr) -> CompileResult<Target> {
        match target {
            ast::Expr::Name(ast::ExprName { id, .. }) => {
                Ok(Target::Name(self.store_name(id.as_str())?))
            }
            ast::Expr::Attribute(ast::ExprAttribute { value, attr, .. }) => {
                let value = self.compile_expression(value)?;
                Ok(Target::Attribute {
                    value,
                    attr: self.mangle(attr.as_str()).into_owned(),
                })
            }
            ast::Expr::Subscript(ast::ExprSubscript { value, slice, .. }) => {
                let value = self.compile_expression(value)?;
                let index = self.compile_expression(slice)?;
                Ok(Target::Subscript { value, index })
            }
            ast::Expr::List(ast::ExprList { elts, .. })
            | ast::Expr::Tuple(ast::ExprTuple { elts, .. }) => self.compile_unpack(elts),
            ast::Expr::Starred(_) => Err(self.error_ranged(
                CodegenErrorType::StarredAssignTarget,
                target.range(),
            )),
            _ => Err(self.error_ranged(
                CodegenErrorType::Assign(target.python_name()),
                target.range(),
            )),
        }
    }

    fn compile_unpack(&mut self, elts: &[ast::Expr]) -> CompileResult<Target> {
        let mut star_index = None;
        let mut targets = Vec::with_capacity(elts.len());
        for (i, elt) in elts.iter().enumerate() {
            if let ast::Expr::Starred(ast::ExprStarred { value, .. }) = elt {
                if star_index.replace(i).is_some() {
                    return Err(
                        self.error_ranged(CodegenErrorType::MultipleStarArgs, elt.range())
                    );
                }
                let after = elts.len() - i - 1;
                if i >= 1 << 8 || after >= 1 << 24 {
                    return Err(
                        self.error_ranged(CodegenErrorType::TooManyStarUnpack, elt.range())
                    );
                }
                targets.push(self.compile_store(value)?);
            } else {
                targets.push(self.compile_store(elt)?);
            }
        }
        Ok(Target::Unpack {
            targets,
            star_index,
        })
    }

    fn compile_delete(&mut self, target: &ast::Expr) -> CompileResult<Stmt> {
        let target = match target {
            ast::Expr::Name(ast::ExprName { id, .. }) => {
                Target::Name(self.resolve_name(id.as_str(), NameUsage::Delete)?)
            }
            ast::Expr::Attribute(ast::ExprAttribute { value, attr, .. }) => Target::Attribute {
                value: self.compile_expression(value)?,
                attr: self.mangle(attr.as_str()).into_owned(),
            },
            ast::Expr::Subscript(ast::ExprSubscript { value, slice, .. }) => {
                let value = self.compile_expression(value)?;
                let index = self.compile_expression(slice)?;
                Target::Subscript { value, index }
            }
            ast::Expr::List(ast::ExprList { elts, .. })
            | ast::Expr::Tuple(ast::ExprTuple { elts, .. }) => {
                let mut stmts = Vec::with_capacity(elts.len());
                for elt in elts {
                    extend_body(&mut stmts, self.compile_delete(elt)?);
                }
                return Ok(Stmt::Block(stmts));
            }
            _ => {
                return Err(self.error_ranged(
                    CodegenErrorType::Delete(target.python_name()),
                    target.range(),
                ));
            }
        };
        Ok(Stmt::Delete(target))
    }

    fn compile_if(
        &mut self,
        test: &ast::Expr,
        body: &[ast::Stmt],
        clauses: &[ast::ElifElseClause],
    ) -> CompileResult<Stmt> {
        let compile_orelse = |compiler: &mut Self| match clauses.split_first() {
            None => Ok(Stmt::empty()),
            Some((clause, rest)) => match &clause.test {
                Some(test) => compiler.compile_if(test, &clause.body, rest),
                None => compiler.compile_statements(&clause.body),
            },
        };
        if is_debug_name(test) {
            return if self.opts.optimize == 0 {
                self.compile_statements(body)
            } else {
                compile_orelse(self)
            };
        }
        let test = self.compile_expression(test)?;
        let body = self.compile_statements(body)?;
        let orelse = compile_orelse(self)?;
        Ok(Stmt::If {
            test,
            body: Box::new(body),
            orelse: Box::new(orelse),
        })
    }

    fn compile_loop_body(&mut self, kind: LoopKind, body: &[ast::Stmt]) -> CompileResult<(Stmt, crate::loops::LoopInfo)> {
        self.code
            .loops
            .push(kind)
            .map_err(|e| self.error(e))?;
        let body = self.compile_statements(body);
        let info = self.code.loops.pop();
        let (body, Some(info)) = (body?, info) else {
            return Err(self.internal_error(InternalError::ScopeMismatch {
                expected: "loop".to_owned(),
                found: self.code.qualname.clone(),
            }));
        };
        Ok((body, info))
    }

    fn compile_while(
        &mut self,
        test: &ast::Expr,
        body: &[ast::Stmt],
        orelse: &[ast::Stmt],
    ) -> CompileResult<Stmt> {
        let test = self.compile_expression(test)?;
        let (body, info) = self.compile_loop_body(LoopKind::While, body)?;
        let orelse = self.compile_statements(orelse)?;
        Ok(wire_loop(info, body, orelse, |body| Stmt::While { test, body }))
    }

    fn compile_for(
        &mut self,
        target: &ast::Expr,
        iter: &ast::Expr,
        body: &[ast::Stmt],
        orelse: &[ast::Stmt],
    ) -> CompileResult<Stmt> {
        let iter = self.compile_expression(iter)?;
        let target = self.compile_store(target)?;
        let (body, info) = self.compile_loop_body(LoopKind::For, body)?;
        let orelse = self.compile_statements(orelse)?;
        Ok(wire_loop(info, body, orelse, |body| Stmt::For {
            target,
            iter,
            body,
        }))
    }

    fn compile_try(&mut self, try_stmt: &ast::StmtTry) -> CompileResult<Stmt> {
        let ast::StmtTry {
            body,
            handlers,
            orelse,
            finalbody,
            is_star,
            ..
        } = try_stmt;
        if *is_star {
            return Err(self.error(CodegenErrorType::NotImplementedYet));
        }
        let body = self.compile_statements(body)?;
        let handlers = handlers
            .iter()
            .map(|handler| self.compile_handler(handler))
            .collect::<CompileResult<Vec<_>>>()?;
        let orelse = self.compile_statements(orelse)?;
        let finalbody = if finalbody.is_empty() {
            None
        } else {
            Some(Box::new(self.compile_statements(finalbody)?))
        };
        Ok(Stmt::Try {
            body: Box::new(body),
            handlers,
            orelse: Box::new(orelse),
            finalbody,
        })
    }

    fn compile_handler(&mut self, handler: &ast::ExceptHandler) -> CompileResult<ExceptHandler> {
        let ast::ExceptHandler::ExceptHandler(ast::ExceptHandlerExceptHandler {
            type_,
            name,
            body,
            ..
        }) = handler;
        let typ = type_
            .as_deref()
            .map(|typ| self.compile_expression(typ))
            .transpose()?;
        let mut body = self.compile_statements(body)?;
        let name = match name {
            Some(name) => {
                let name = self.store_name(name.as_str())?;
                // `except E as e` unbinds `e` however the handler exits.
                let cleanup = Stmt::Block(vec![
                    Stmt::Assign {
                        target: Target::Name(name.clone()),
                        value: Expr::none(),
                    },
                    Stmt::Delete(Target::Name(name.clone())),
                ]);
                body = Stmt::Try {
                    body: Box::new(body),
                    handlers: Vec::new(),
                    orelse: Box::new(Stmt::empty()),
                    finalbody: Some(Box::new(cleanup)),
                };
                Some(name)
            }
            None => None,
        };
        Ok(ExceptHandler { typ, name, body })
    }

    fn compile_with(&mut self, items: &[ast::WithItem], body: &[ast::Stmt]) -> CompileResult<Stmt> {
        let mut managers = Vec::with_capacity(items.len());
        for item in items {
            let context = self.compile_expression(&item.context_expr)?;
            let target = item
                .optional_vars
                .as_deref()
                .map(|target| self.compile_store(target))
                .transpose()?;
            managers.push((context, target));
        }
        let mut body = self.compile_statements(body)?;
        for (context, target) in managers.into_iter().rev() {
            body = Stmt::With {
                context,
                target,
                body: Box::new(body),
            };
        }
        Ok(body)
    }

    fn compile_import(&mut self, names: &[ast::Alias]) -> CompileResult<Stmt> {
        let mut stmts = Vec::with_capacity(names.len());
        for alias in names {
            let module = alias.name.as_str();
            let import = Expr::Import {
                name: module.to_owned(),
                fromlist: Vec::new(),
                level: 0,
            };
            let stmt = match &alias.asname {
                Some(asname) => {
                    // `import a.b as c` binds the submodule itself.
                    let value = module.split('.').skip(1).fold(import, |value, part| {
                        Expr::Attribute {
                            value: Box::new(value),
                            attr: part.to_owned(),
                        }
                    });
                    Stmt::Assign {
                        target: Target::Name(self.store_name(asname.as_str())?),
                        value,
                    }
                }
                None => {
                    let top = module.split('.').next().unwrap_or(module);
                    Stmt::Assign {
                        target: Target::Name(self.store_name(top)?),
                        value: import,
                    }
                }
            };
            stmts.push(stmt);
        }
        Ok(stmts.into())
    }

    fn compile_import_from(
        &mut self,
        module: Option<&ast::Identifier>,
        names: &[ast::Alias],
        level: u32,
    ) -> CompileResult<Stmt> {
        if names.iter().any(|alias| alias.name.as_str() == "*") {
            return Err(self.error(CodegenErrorType::NotImplementedYet));
        }
        let module = module.map_or("", |module| module.as_str());
        let temp = self.new_temporary();
        let mut stmts = vec![Stmt::Assign {
            target: Target::Name(temp.clone()),
            value: Expr::Import {
                name: module.to_owned(),
                fromlist: names
                    .iter()
                    .map(|alias| alias.name.as_str().to_owned())
                    .collect(),
                level,
            },
        }];
        for alias in names {
            let bound = alias.asname.as_ref().unwrap_or(&alias.name);
            stmts.push(Stmt::Assign {
                target: Target::Name(self.store_name(bound.as_str())?),
                value: Expr::ImportFrom {
                    module: Box::new(Expr::Load(temp.clone())),
                    name: alias.name.as_str().to_owned(),
                },
            });
        }
        Ok(Stmt::Block(stmts))
    }

    fn compile_decorators(&mut self, decorator_list: &[ast::Decorator]) -> CompileResult<Vec<Expr>> {
        decorator_list
            .iter()
            .map(|decorator| self.compile_expression(&decorator.expression))
            .collect()
    }

    fn apply_decorators(decorators: Vec<Expr>, value: Expr) -> Expr {
        decorators
            .into_iter()
            .rev()
            .fold(value, |value, decorator| Expr::Call {
                func: Box::new(decorator),
                args: vec![value],
                keywords: Vec::new(),
            })
    }

    fn compile_function_def(&mut self, function: &ast::StmtFunctionDef) -> CompileResult<Stmt> {
        let ast::StmtFunctionDef {
            name,
            parameters,
            body,
            decorator_list,
            is_async,
            type_params,
            range,
            ..
        } = function;
        if *is_async || type_params.is_some() {
            return Err(self.error(CodegenErrorType::NotImplementedYet));
        }
        let decorators = self.compile_decorators(decorator_list)?;
        let function = self.compile_function(
            name.as_str(),
            parameters,
            *range,
            FunctionBody::Statements(body),
        )?;
        Ok(Stmt::Assign {
            target: Target::Name(self.store_name(name.as_str())?),
            value: Self::apply_decorators(decorators, function),
        })
    }

    fn compile_function(
        &mut self,
        name: &str,
        parameters: &ast::Parameters,
        range: TextRange,
        body: FunctionBody<'_>,
    ) -> CompileResult<Expr> {
        let mut seen_default = false;
        for parameter in parameters.posonlyargs.iter().chain(&parameters.args) {
            if parameter.default.is_some() {
                seen_default = true;
            } else if seen_default {
                return Err(self.error_ranged(
                    CodegenErrorType::DefaultBeforeNonDefault,
                    parameter.range(),
                ));
            }
        }

        let defaults = parameters
            .posonlyargs
            .iter()
            .chain(&parameters.args)
            .filter_map(|parameter| parameter.default.as_deref())
            .map(|default| self.compile_expression(default))
            .collect::<CompileResult<Vec<_>>>()?;
        let mut kw_defaults = Vec::new();
        for parameter in &parameters.kwonlyargs {
            if let Some(default) = parameter.default.as_deref() {
                let name = self.mangle(parameter.parameter.name.as_str()).into_owned();
                kw_defaults.push((name, self.compile_expression(default)?));
            }
        }

        let scope = self.child_scope(name, range)?;
        self.enter_scope(name, scope);
        self.code.posonlyarg_count = parameters.posonlyargs.len() as u32;
        self.code.arg_count = (parameters.posonlyargs.len() + parameters.args.len()) as u32;
        self.code.kwonlyarg_count = parameters.kwonlyargs.len() as u32;
        if parameters.vararg.is_some() {
            self.code.flags |= CodeFlags::VARARGS;
        }
        if parameters.kwarg.is_some() {
            self.code.flags |= CodeFlags::VARKEYWORDS;
        }

        let body = match body {
            FunctionBody::Statements(body) => {
                let (doc, rest) = split_doc(body, &self.opts);
                if doc.is_some() {
                    self.code.flags |= CodeFlags::HAS_DOCSTRING;
                }
                self.code.doc = doc;
                self.compile_statements(rest)
            }
            FunctionBody::Lambda(expr) => self
                .compile_expression(expr)
                .map(|value| Stmt::Return(Some(value))),
        };
        // Leave the scope even on error so the stack stays balanced.
        let code = match body {
            Ok(body) => self.exit_scope(body)?,
            Err(error) => {
                let _ = self.exit_scope(Stmt::empty());
                return Err(error);
            }
        };
        let closure = self.make_closure(&code)?;
        Ok(Expr::MakeFunction(Box::new(MakeFunction {
            code: Arc::new(code),
            defaults,
            kw_defaults,
            closure,
        })))
    }

    /// Reads every free variable of `code` from the current scope.
    // = compiler_make_closure
    fn make_closure(&self, code: &CodeObject) -> CompileResult<Vec<NameRef>> {
        code.freevars
            .iter()
            .map(|var| {
                if let Some(index) = self.code.cellvars.get_index_of(var) {
                    Ok(NameRef::Deref(index as u32))
                } else if let Some(index) = self.code.freevars.get_index_of(var) {
                    Ok(NameRef::Deref((index + self.code.cellvars.len()) as u32))
                } else {
                    Err(self.internal_error(InternalError::UnresolvedFree(var.clone())))
                }
            })
            .collect()
    }

    fn compile_class_def(&mut self, class: &ast::StmtClassDef) -> CompileResult<Stmt> {
        let ast::StmtClassDef {
            name,
            arguments,
            body,
            decorator_list,
            type_params,
            range,
            ..
        } = class;
        if type_params.is_some() {
            return Err(self.error(CodegenErrorType::NotImplementedYet));
        }
        let decorators = self.compile_decorators(decorator_list)?;
        let (bases, keywords) = match arguments.as_deref() {
            Some(arguments) => (
                self.compile_elements(&arguments.args)?,
                self.compile_keywords(&arguments.keywords)?,
            ),
            None => (Vec::new(), Vec::new()),
        };

        let scope = self.child_scope(name.as_str(), *range)?;
        self.enter_scope(name.as_str(), scope);
        let body = self.compile_class_body(body);
        let code = match body {
            Ok(body) => self.exit_scope(body)?,
            Err(error) => {
                let _ = self.exit_scope(Stmt::empty());
                return Err(error);
            }
        };
        let closure = self.make_closure(&code)?;
        let class = Expr::MakeClass(Box::new(MakeClass {
            code: Arc::new(code),
            name: name.as_str().to_owned(),
            bases,
            keywords,
            closure,
        }));
        Ok(Stmt::Assign {
            target: Target::Name(self.store_name(name.as_str())?),
            value: Self::apply_decorators(decorators, class),
        })
    }

    // = compiler_class_body
    fn compile_class_body(&mut self, body: &[ast::Stmt]) -> CompileResult<Stmt> {
        let mut stmts = vec![
            name_assign(
                "__module__",
                Expr::Load(NameRef::Name("__name__".to_owned())),
            ),
            name_assign("__qualname__", str_constant(self.code.qualname.clone())),
        ];
        let skip = self.body_prologue(body, &mut stmts);
        let rest = self.compile_statements(&body[skip..])?;
        extend_body(&mut stmts, rest);
        Ok(Stmt::Block(stmts))
    }

    fn compile_comprehension(
        &mut self,
        kind: ComprehensionType,
        element: &ast::Expr,
        value: Option<&ast::Expr>,
        generators: &[ast::Comprehension],
        range: TextRange,
    ) -> CompileResult<Expr> {
        let Some(outermost) = generators.first() else {
            return Err(self.error_ranged(
                CodegenErrorType::SyntaxError("comprehension without a for clause".to_owned()),
                range,
            ));
        };
        if generators.iter().any(|generator| generator.is_async) {
            return Err(self.error_ranged(CodegenErrorType::NotImplementedYet, range));
        }
        // The outermost iterable belongs to the enclosing scope.
        let iterable = self.compile_expression(&outermost.iter)?;

        let scope = self.child_scope(kind.description(), range)?;
        let name = self.scopes[scope].name.clone();
        self.enter_scope(&name, scope);
        self.code.arg_count = 1;
        let body = self.compile_comprehension_body(element, value, generators);
        let code = match body {
            Ok(body) => self.exit_scope(body)?,
            Err(error) => {
                let _ = self.exit_scope(Stmt::empty());
                return Err(error);
            }
        };
        let closure = self.make_closure(&code)?;

        let generator = Expr::Call {
            func: Box::new(Expr::MakeFunction(Box::new(MakeFunction {
                code: Arc::new(code),
                defaults: Vec::new(),
                kw_defaults: Vec::new(),
                closure,
            }))),
            args: vec![Expr::GetIter(Box::new(iterable))],
            keywords: Vec::new(),
        };
        let collect = |kind| Expr::Collect {
            kind,
            iterable: Box::new(generator.clone()),
        };
        Ok(match kind {
            ComprehensionType::Generator => generator,
            ComprehensionType::List => collect(CollectionKind::List),
            ComprehensionType::Set => collect(CollectionKind::Set),
            ComprehensionType::Dict => collect(CollectionKind::Dict),
        })
    }

    fn compile_comprehension_body(
        &mut self,
        element: &ast::Expr,
        value: Option<&ast::Expr>,
        generators: &[ast::Comprehension],
    ) -> CompileResult<Stmt> {
        let mut levels = Vec::with_capacity(generators.len());
        for (i, generator) in generators.iter().enumerate() {
            let iter = if i == 0 {
                self.load_name(".0")?
            } else {
                self.compile_expression(&generator.iter)?
            };
            let target = self.compile_store(&generator.target)?;
            let guards = generator
                .ifs
                .iter()
                .map(|guard| self.compile_expression(guard))
                .collect::<CompileResult<Vec<_>>>()?;
            levels.push((target, iter, guards));
        }

        let element = match value {
            Some(value) => Expr::Tuple(vec![
                self.compile_expression(element)?,
                self.compile_expression(value)?,
            ]),
            None => self.compile_expression(element)?,
        };
        let mut body = Stmt::Expr(Expr::Yield {
            value: Some(Box::new(element)),
            index: None,
        });
        for (target, iter, guards) in levels.into_iter().rev() {
            let guard = guards.into_iter().reduce(|left, right| Expr::BoolOp {
                op: BoolOperator::And,
                left: Box::new(left),
                right: Box::new(right),
            });
            if let Some(test) = guard {
                body = Stmt::If {
                    test,
                    body: Box::new(body),
                    orelse: Box::new(Stmt::empty()),
                };
            }
            body = Stmt::For {
                target,
                iter,
                body: Box::new(body),
            };
        }
        Ok(body)
    }

    fn compile_elements(&mut self, elts: &[ast::Expr]) -> CompileResult<Vec<Expr>> {
        elts.iter()
            .map(|elt| match elt {
                ast::Expr::Starred(ast::ExprStarred { value, .. }) => {
                    Ok(Expr::Starred(Box::new(self.compile_expression(value)?)))
                }
                elt => self.compile_expression(elt),
            })
            .collect()
    }

    fn compile_keywords(&mut self, keywords: &[ast::Keyword]) -> CompileResult<Vec<Keyword>> {
        keywords
            .iter()
            .map(|keyword| {
                Ok(Keyword {
                    name: keyword.arg.as_ref().map(|arg| arg.as_str().to_owned()),
                    value: self.compile_expression(&keyword.value)?,
                })
            })
            .collect()
    }

    /// Arguments for a bare `super()` call inside a method.
    fn super_arguments(
        &mut self,
        func: &ast::Expr,
        arguments: &ast::Arguments,
    ) -> CompileResult<Option<Vec<Expr>>> {
        let ast::Expr::Name(ast::ExprName { id, .. }) = func else {
            return Ok(None);
        };
        if id.as_str() != "super" || !arguments.is_empty() {
            return Ok(None);
        }
        let table = &self.scopes[self.code.scope];
        if table.typ != CompilerScope::Function
            || !table.lookup("super").is_some_and(Symbol::is_global)
            || !table.lookup("__class__").is_some_and(Symbol::is_free)
            || self.code.arg_count == 0
        {
            return Ok(None);
        }
        let Some(first) = self.code.varnames.get_index(0).cloned() else {
            return Ok(None);
        };
        Ok(Some(vec![
            self.load_name("__class__")?,
            self.load_name(&first)?,
        ]))
    }

    fn compile_call(&mut self, func: &ast::Expr, arguments: &ast::Arguments) -> CompileResult<Expr> {
        let callee = self.compile_expression(func)?;
        let (args, keywords) = match self.super_arguments(func, arguments)? {
            Some(args) => (args, Vec::new()),
            None => (
                self.compile_elements(&arguments.args)?,
                self.compile_keywords(&arguments.keywords)?,
            ),
        };
        Ok(Expr::Call {
            func: Box::new(callee),
            args,
            keywords,
        })
    }

    /// `a < b <= c` becomes `a < (t := b) and t <= c`.
    fn compile_compare(
        &mut self,
        left: &ast::Expr,
        ops: &[ast::CmpOp],
        comparators: &[ast::Expr],
    ) -> CompileResult<Expr> {
        let mut previous = self.compile_expression(left)?;
        let mut links = Vec::with_capacity(ops.len());
        for (i, (op, comparator)) in ops.iter().zip(comparators).enumerate() {
            let right = self.compile_expression(comparator)?;
            let is_last = i + 1 == ops.len();
            let (operand, next) = if is_last || right.is_side_effect_free() {
                (right.clone(), right)
            } else {
                let temp = self.new_temporary();
                (
                    Expr::NamedExpr {
                        target: temp.clone(),
                        value: Box::new(right),
                    },
                    Expr::Load(temp),
                )
            };
            links.push(Expr::Compare {
                op: comparison_operator(*op),
                left: Box::new(mem::replace(&mut previous, next)),
                right: Box::new(operand),
            });
        }
        links
            .into_iter()
            .rev()
            .reduce(|rest, link| Expr::BoolOp {
                op: BoolOperator::And,
                left: Box::new(link),
                right: Box::new(rest),
            })
            .ok_or_else(|| {
                self.error(CodegenErrorType::SyntaxError(
                    "comparison without operators".to_owned(),
                ))
            })
    }

    fn compile_expression(&mut self, expression: &ast::Expr) -> CompileResult<Expr> {
        trace!("compiling {:?}", expression.range());
        let expr = match expression {
            ast::Expr::BoolOp(ast::ExprBoolOp { op, values, .. }) => {
                let op = match op {
                    ast::BoolOp::And => BoolOperator::And,
                    ast::BoolOp::Or => BoolOperator::Or,
                };
                let mut values = values.iter().rev();
                let Some(last) = values.next() else {
                    return Ok(Expr::none());
                };
                let last = self.compile_expression(last)?;
                values.try_fold(last, |right, value| {
                    Ok(Expr::BoolOp {
                        op,
                        left: Box::new(self.compile_expression(value)?),
                        right: Box::new(right),
                    })
                })?
            }
            ast::Expr::Named(ast::ExprNamed { target, value, .. }) => {
                let ast::Expr::Name(ast::ExprName { id, .. }) = &**target else {
                    return Err(self.error_ranged(
                        CodegenErrorType::Assign(target.python_name()),
                        target.range(),
                    ));
                };
                let value = self.compile_expression(value)?;
                Expr::NamedExpr {
                    target: self.store_name(id.as_str())?,
                    value: Box::new(value),
                }
            }
            ast::Expr::BinOp(ast::ExprBinOp {
                left, op, right, ..
            }) => Expr::BinOp {
                op: binary_operator(*op),
                left: Box::new(self.compile_expression(left)?),
                right: Box::new(self.compile_expression(right)?),
                inplace: false,
            },
            ast::Expr::UnaryOp(ast::ExprUnaryOp { op, operand, .. }) => Expr::UnaryOp {
                op: match op {
                    ast::UnaryOp::Invert => UnaryOperator::Invert,
                    ast::UnaryOp::Not => UnaryOperator::Not,
                    ast::UnaryOp::UAdd => UnaryOperator::Plus,
                    ast::UnaryOp::USub => UnaryOperator::Minus,
                },
                operand: Box::new(self.compile_expression(operand)?),
            },
            ast::Expr::Lambda(ast::ExprLambda {
                parameters,
                body,
                range,
                ..
            }) => {
                let default_params = ast::Parameters::default();
                let parameters = parameters.as_deref().unwrap_or(&default_params);
                self.compile_function("<lambda>", parameters, *range, FunctionBody::Lambda(body))?
            }
            ast::Expr::If(ast::ExprIf {
                test, body, orelse, ..
            }) => Expr::IfExp {
                test: Box::new(self.compile_expression(test)?),
                body: Box::new(self.compile_expression(body)?),
                orelse: Box::new(self.compile_expression(orelse)?),
            },
            ast::Expr::Dict(ast::ExprDict { items, .. }) => {
                let mut entries = Vec::with_capacity(items.len());
                for ast::DictItem { key, value } in items {
                    let key = key
                        .as_ref()
                        .map(|key| self.compile_expression(key))
                        .transpose()?;
                    let value = self.compile_expression(value)?;
                    entries.push(DictEntry { key, value });
                }
                Expr::Dict(entries)
            }
            ast::Expr::Set(ast::ExprSet { elts, .. }) => Expr::Set(self.compile_elements(elts)?),
            ast::Expr::List(ast::ExprList { elts, .. }) => {
                Expr::List(self.compile_elements(elts)?)
            }
            ast::Expr::Tuple(ast::ExprTuple { elts, .. }) => {
                Expr::Tuple(self.compile_elements(elts)?)
            }
            ast::Expr::ListComp(ast::ExprListComp {
                elt,
                generators,
                range,
                ..
            }) => {
                self.compile_comprehension(ComprehensionType::List, elt, None, generators, *range)?
            }
            ast::Expr::SetComp(ast::ExprSetComp {
                elt,
                generators,
                range,
                ..
            }) => {
                self.compile_comprehension(ComprehensionType::Set, elt, None, generators, *range)?
            }
            ast::Expr::DictComp(ast::ExprDictComp {
                key,
                value,
                generators,
                range,
                ..
            }) => self.compile_comprehension(
                ComprehensionType::Dict,
                key,
                Some(value),
                generators,
                *range,
            )?,
            ast::Expr::Generator(ast::ExprGenerator {
                elt,
                generators,
                range,
                ..
            }) => self.compile_comprehension(
                ComprehensionType::Generator,
                elt,
                None,
                generators,
                *range,
            )?,
            ast::Expr::Yield(ast::ExprYield { value, .. }) => Expr::Yield {
                value: value
                    .as_deref()
                    .map(|value| self.compile_expression(value).map(Box::new))
                    .transpose()?,
                index: None,
            },
            ast::Expr::YieldFrom(ast::ExprYieldFrom { value, .. }) => Expr::YieldFrom {
                value: Box::new(self.compile_expression(value)?),
                index: None,
                iterator: None,
            },
            ast::Expr::Compare(ast::ExprCompare {
                left,
                ops,
                comparators,
                ..
            }) => self.compile_compare(left, ops, comparators)?,
            ast::Expr::Call(ast::ExprCall {
                func, arguments, ..
            }) => self.compile_call(func, arguments)?,
            ast::Expr::FString(fstring) => self.compile_expr_fstring(fstring)?,
            ast::Expr::StringLiteral(string) => str_constant(string.value.to_str()),
            ast::Expr::BytesLiteral(bytes) => {
                let value = bytes.value.iter().flat_map(|x| x.iter().copied()).collect();
                Expr::Constant(ConstantData::Bytes { value })
            }
            ast::Expr::NumberLiteral(number) => Expr::Constant(match &number.value {
                ast::Number::Int(int) => ConstantData::Integer {
                    value: ruff_int_to_bigint(int).map_err(|e| self.error(e))?,
                },
                ast::Number::Float(value) => ConstantData::Float { value: *value },
                ast::Number::Complex { real, imag } => ConstantData::Complex {
                    value: Complex::new(*real, *imag),
                },
            }),
            ast::Expr::BooleanLiteral(boolean) => Expr::Constant(ConstantData::Boolean {
                value: boolean.value,
            }),
            ast::Expr::NoneLiteral(_) => Expr::none(),
            ast::Expr::EllipsisLiteral(_) => Expr::Constant(ConstantData::Ellipsis),
            ast::Expr::Attribute(ast::ExprAttribute { value, attr, .. }) => Expr::Attribute {
                value: Box::new(self.compile_expression(value)?),
                attr: self.mangle(attr.as_str()).into_owned(),
            },
            ast::Expr::Subscript(ast::ExprSubscript { value, slice, .. }) => Expr::Subscript {
                value: Box::new(self.compile_expression(value)?),
                index: Box::new(self.compile_expression(slice)?),
            },
            ast::Expr::Slice(ast::ExprSlice {
                lower, upper, step, ..
            }) => {
                let mut part = |part: &Option<Box<ast::Expr>>| {
                    part.as_deref()
                        .map(|part| self.compile_expression(part).map(Box::new))
                        .transpose()
                };
                Expr::Slice {
                    lower: part(lower)?,
                    upper: part(upper)?,
                    step: part(step)?,
                }
            }
            ast::Expr::Name(ast::ExprName { id, .. }) => self.load_name(id.as_str())?,
            ast::Expr::Starred(_) => {
                return Err(
                    self.error_ranged(CodegenErrorType::InvalidStarExpr, expression.range())
                );
            }
            ast::Expr::Await(_) | ast::Expr::TString(_) | ast::Expr::IpyEscapeCommand(_) => {
                return Err(
                    self.error_ranged(CodegenErrorType::NotImplementedYet, expression.range())
                );
            }
        };
        Ok(expr)
    }

    fn compile_expr_fstring(&mut self, fstring: &ast::ExprFString) -> CompileResult<Expr> {
        let mut parts = Vec::new();
        for part in &fstring.value {
            match part {
                ast::FStringPart::Literal(string) => {
                    parts.push(str_constant(string.value.to_string()));
                }
                ast::FStringPart::FString(fstring) => {
                    self.compile_fstring_elements(&fstring.elements, &mut parts)?;
                }
            }
        }
        Ok(match parts.as_slice() {
            [Expr::Constant(ConstantData::Str { .. })] => parts.remove(0),
            _ => Expr::JoinedStr(parts),
        })
    }

    fn compile_fstring_elements(
        &mut self,
        elements: &ast::InterpolatedStringElements,
        parts: &mut Vec<Expr>,
    ) -> CompileResult<()> {
        for element in elements {
            match element {
                ast::InterpolatedStringElement::Literal(string) => {
                    parts.push(str_constant(string.value.to_string()));
                }
                ast::InterpolatedStringElement::Interpolation(interpolation) => {
                    let mut conversion = match interpolation.conversion {
                        ast::ConversionFlag::None => Conversion::None,
                        ast::ConversionFlag::Str => Conversion::Str,
                        ast::ConversionFlag::Repr => Conversion::Repr,
                        ast::ConversionFlag::Ascii => Conversion::Ascii,
                    };

                    if let Some(ast::DebugText { leading, trailing }) = &interpolation.debug_text {
                        let range = interpolation.expression.range();
                        let source = self.source_file.slice(range);
                        parts.push(str_constant([leading, source, trailing].concat()));

                        // `f"{x=}"` shows the repr unless a conversion or spec is given.
                        if conversion == Conversion::None && interpolation.format_spec.is_none() {
                            conversion = Conversion::Repr;
                        }
                    }

                    let value = self.compile_expression(&interpolation.expression)?;
                    let spec = match &interpolation.format_spec {
                        Some(format_spec) => {
                            let mut spec_parts = Vec::new();
                            self.compile_fstring_elements(&format_spec.elements, &mut spec_parts)?;
                            Some(Box::new(Expr::JoinedStr(spec_parts)))
                        }
                        None => None,
                    };
                    parts.push(Expr::FormatValue {
                        value: Box::new(value),
                        conversion,
                        spec,
                    });
                }
            }
        }
        Ok(())
    }
}

fn binary_operator(op: ast::Operator) -> BinaryOperator {
    match op {
        ast::Operator::Add => BinaryOperator::Add,
        ast::Operator::Sub => BinaryOperator::Subtract,
        ast::Operator::Mult => BinaryOperator::Multiply,
        ast::Operator::MatMult => BinaryOperator::MatrixMultiply,
        ast::Operator::Div => BinaryOperator::Divide,
        ast::Operator::Mod => BinaryOperator::Remainder,
        ast::Operator::Pow => BinaryOperator::Power,
        ast::Operator::LShift => BinaryOperator::Lshift,
        ast::Operator::RShift => BinaryOperator::Rshift,
        ast::Operator::BitOr => BinaryOperator::Or,
        ast::Operator::BitXor => BinaryOperator::Xor,
        ast::Operator::BitAnd => BinaryOperator::And,
        ast::Operator::FloorDiv => BinaryOperator::FloorDivide,
    }
}

fn comparison_operator(op: ast::CmpOp) -> ComparisonOperator {
    match op {
        ast::CmpOp::Eq => ComparisonOperator::Equal,
        ast::CmpOp::NotEq => ComparisonOperator::NotEqual,
        ast::CmpOp::Lt => ComparisonOperator::Less,
        ast::CmpOp::LtE => ComparisonOperator::LessOrEqual,
        ast::CmpOp::Gt => ComparisonOperator::Greater,
        ast::CmpOp::GtE => ComparisonOperator::GreaterOrEqual,
        ast::CmpOp::Is => ComparisonOperator::Is,
        ast::CmpOp::IsNot => ComparisonOperator::IsNot,
        ast::CmpOp::In => ComparisonOperator::In,
        ast::CmpOp::NotIn => ComparisonOperator::NotIn,
    }
}

// Python/compile.c find_ann
fn find_ann(body: &[ast::Stmt]) -> bool {
    body.iter().any(|statement| match statement {
        ast::Stmt::AnnAssign(_) => true,
        ast::Stmt::For(ast::StmtFor { body, orelse, .. })
        | ast::Stmt::While(ast::StmtWhile { body, orelse, .. }) => {
            find_ann(body) || find_ann(orelse)
        }
        ast::Stmt::If(ast::StmtIf {
            body,
            elif_else_clauses,
            ..
        }) => find_ann(body) || elif_else_clauses.iter().any(|x| find_ann(&x.body)),
        ast::Stmt::With(ast::StmtWith { body, .. }) => find_ann(body),
        ast::Stmt::Try(ast::StmtTry {
            body,
            handlers,
            orelse,
            finalbody,
            ..
        }) => {
            find_ann(body)
                || handlers.iter().any(|handler| {
                    let ast::ExceptHandler::ExceptHandler(handler) = handler;
                    find_ann(&handler.body)
                })
                || find_ann(orelse)
                || find_ann(finalbody)
        }
        _ => false,
    })
}

/// Strips leading whitespace from a docstring.
///
/// `inspect.cleandoc` is a good reference, but has a few incompatibilities.
// = _PyCompile_CleanDoc
fn clean_doc(doc: &str) -> String {
    let doc = expandtabs(doc, 8);
    // Minimum indentation of any non-blank line after the first.
    let margin = doc
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.chars().take_while(|c| c == &' ').count())
        .min();
    let mut lines = doc.split('\n');
    let mut cleaned = String::with_capacity(doc.len());
    if let Some(first_line) = lines.next() {
        cleaned.push_str(first_line.trim_start());
    }
    for line in lines {
        cleaned.push('\n');
        cleaned.extend(line.chars().skip(margin.unwrap_or(0)));
    }
    cleaned
}

fn expandtabs(input: &str, tab_size: usize) -> String {
    let mut expanded = String::with_capacity(input.len());
    let mut column = 0usize;
    for ch in input.chars() {
        match ch {
            '\t' => {
                let spaces = tab_size - column % tab_size;
                expanded.extend(core::iter::repeat_n(' ', spaces));
                column += spaces;
            }
            '\r' | '\n' => {
                expanded.push(ch);
                column = 0;
            }
            _ => {
                expanded.push(ch);
                column += 1;
            }
        }
    }
    expanded
}

fn split_doc<'a>(body: &'a [ast::Stmt], opts: &CompileOpts) -> (Option<String>, &'a [ast::Stmt]) {
    if let Some((ast::Stmt::Expr(expr), body_rest)) = body.split_first()
        && let ast::Expr::StringLiteral(doc) = &*expr.value
    {
        return if opts.optimize < 2 {
            (Some(clean_doc(doc.value.to_str())), body_rest)
        } else {
            (None, body_rest)
        };
    }
    (None, body)
}

pub fn ruff_int_to_bigint(int: &ast::Int) -> Result<BigInt, CodegenErrorType> {
    if let Some(small) = int.as_u64() {
        Ok(BigInt::from(small))
    } else {
        parse_big_integer(int)
    }
}

/// Converts a `ruff` ast integer into a `BigInt`.
/// Unlike small integers, big integers may be stored in one of four possible radix representations.
fn parse_big_integer(int: &ast::Int) -> Result<BigInt, CodegenErrorType> {
    let s = format!("{int}");
    let s = s.replace('_', "");
    // See: https://peps.python.org/pep-0515/#literal-grammar
    let (digits, radix) = match s.get(0..2) {
        Some("0b" | "0B") => (&s[2..], 2),
        Some("0o" | "0O") => (&s[2..], 8),
        Some("0x" | "0X") => (&s[2..], 16),
        _ => (s.as_str(), 10),
    };

    BigInt::from_str_radix(digits, radix).map_err(|e| {
        CodegenErrorType::SyntaxError(format!(
            "unparsed integer literal (radix {radix}): {digits} ({e})"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_compiler_core::SourceFileBuilder;

    fn compile_with(source: &str, opts: CompileOpts) -> Result<CodeObject, CodegenError> {
        let source_file = SourceFileBuilder::new("source_path", source).finish();
        let parsed = ruff_python_parser::parse(
            source_file.source_text(),
            ruff_python_parser::Mode::Module.into(),
        )
        .unwrap();
        let ast = match parsed.into_syntax() {
            ast::Mod::Module(module) => module,
            _ => unreachable!(),
        };
        compile_program(&ast, source_file, opts)
    }

    fn compile_exec(source: &str) -> CodeObject {
        compile_with(source, CompileOpts::default()).unwrap()
    }

    fn compile_error(source: &str) -> CodegenErrorType {
        compile_with(source, CompileOpts::default()).unwrap_err().error
    }

    /// The code object created by the first statement of `code`'s body.
    fn first_nested(code: &CodeObject) -> &CodeObject {
        let stmt = match &code.body {
            Stmt::Block(body) => &body[0],
            stmt => stmt,
        };
        match stmt {
            Stmt::Assign {
                value: Expr::MakeFunction(make),
                ..
            } => &make.code,
            Stmt::Assign {
                value: Expr::MakeClass(make),
                ..
            } => &make.code,
            other => panic!("no code object in {other:?}"),
        }
    }

    #[test]
    fn test_unpacking_goes_through_a_temporary() {
        insta::assert_snapshot!(compile_exec("a, *b, c = x\n").to_string(), @r"
        code <module>
          varnames: .t0
          fast:.t0 = name:x
          (name:a, *name:b, name:c) = fast:.t0
        ");
    }

    #[test]
    fn test_chained_assignment() {
        insta::assert_snapshot!(compile_exec("a = b.c = f()\n").to_string(), @r"
        code <module>
          varnames: .t0
          fast:.t0 = name:f()
          name:a = fast:.t0
          name:b.c = fast:.t0
        ");
    }

    #[test]
    fn test_bad_unpacking() {
        assert!(matches!(
            compile_error("a, *b, *c = x\n"),
            CodegenErrorType::MultipleStarArgs
        ));
    }

    #[test]
    fn test_chained_comparison() {
        insta::assert_snapshot!(compile_exec("\
def f(a):
    return a < g() <= 3
").to_string(), @r"
        code <module>
          name:f = <function f>
        code f
          varnames: a, .t0
          return ((fast:a < (fast:.t0 := global:g())) and (fast:.t0 <= 3))
        ");
    }

    #[test]
    fn test_call_temporaries_follow_source_order() {
        insta::assert_snapshot!(compile_exec("p(a < f() < b)(c < g() < d)\n").to_string(), @r"
        code <module>
          varnames: .t0, .t1
          name:p(((name:a < (fast:.t0 := name:f())) and (fast:.t0 < name:b)))(((name:c < (fast:.t1 := name:g())) and (fast:.t1 < name:d)))
        ");
    }

    #[test]
    fn test_augmented_subscript_evaluates_index_once() {
        insta::assert_snapshot!(compile_exec("a[f()] += 1\n").to_string(), @r"
        code <module>
          varnames: .t0
          fast:.t0 = name:f()
          name:a[fast:.t0] = (name:a[fast:.t0] += 1)
        ");
    }

    #[test]
    fn test_augmented_name_needs_no_temporary() {
        insta::assert_snapshot!(compile_exec("x += f()\n").to_string(), @r"
        code <module>
          name:x = (name:x += name:f())
        ");
    }

    #[test]
    fn test_loop_targets() {
        insta::assert_snapshot!(compile_exec("\
for x in y:
    if x:
        continue
    break
else:
    z = 1
while w:
    pass
").to_string(), @r"
        code <module>
          break_target:
            for name:x in name:y:
              continue_target:
                if name:x:
                  continue
                break
          else:
            name:z = 1
          while name:w:
            pass
        ");
    }

    #[test]
    fn test_jumps_outside_loops() {
        assert!(matches!(compile_error("break\n"), CodegenErrorType::InvalidBreak));
        assert!(matches!(
            compile_error("def f():\n    continue\n"),
            CodegenErrorType::InvalidContinue
        ));
        // The loop does not extend into a nested function.
        assert!(matches!(
            compile_error("while x:\n    def f():\n        break\n"),
            CodegenErrorType::InvalidBreak
        ));
        assert!(matches!(
            compile_error("return 1\n"),
            CodegenErrorType::InvalidReturn
        ));
    }

    #[test]
    fn test_break_in_loop_else_belongs_to_outer_loop() {
        let code = compile_exec("\
while a:
    for x in y:
        pass
    else:
        break
");
        let Stmt::BreakTarget { body, .. } = &code.body else {
            panic!("outer loop has no break target: {:?}", code.body);
        };
        let Stmt::While { body, .. } = &**body else {
            panic!("expected while loop");
        };
        assert!(matches!(&**body, Stmt::Block(stmts) if matches!(stmts[0], Stmt::For { .. })));
    }

    #[test]
    fn test_class_cell_and_zero_argument_super() {
        insta::assert_snapshot!(compile_exec("\
class C:
    def f(self):
        return super().f()
").to_string(), @r"
        code <module>
          name:C = <class C>()
        code C
          cellvars: __class__
          name:__module__ = name:__name__
          name:__qualname__ = 'C'
          name:f = <function C.f>
        code C.f
          varnames: self
          freevars: __class__
          return global:super(deref:__class__, fast:self).f()
        ");
    }

    #[test]
    fn test_closures_read_cells() {
        let code = compile_exec("\
def f(a):
    def g():
        return a
    return g
");
        let f = first_nested(&code);
        assert_eq!(&*f.cellvars, ["a".to_owned()]);
        assert_eq!(f.cell2arg.as_deref(), Some(&[0][..]));
        let Stmt::Block(body) = &f.body else {
            panic!("expected block");
        };
        let Stmt::Assign {
            value: Expr::MakeFunction(make),
            ..
        } = &body[0]
        else {
            panic!("expected function");
        };
        assert_eq!(make.closure, vec![NameRef::Deref(0)]);
        assert_eq!(&*make.code.freevars, ["a".to_owned()]);
        assert_eq!(make.code.qualname, "f.<locals>.g");
        assert_eq!(
            make.code.body,
            Stmt::Return(Some(Expr::Load(NameRef::Deref(0))))
        );
    }

    #[test]
    fn test_class_body_free_loads() {
        let code = compile_exec("\
def f():
    x = 1
    class C:
        y = x
");
        let f = first_nested(&code);
        let Stmt::Block(body) = &f.body else {
            panic!("expected block");
        };
        let Stmt::Assign {
            value: Expr::MakeClass(make),
            ..
        } = &body[1]
        else {
            panic!("expected class");
        };
        assert_eq!(make.code.qualname, "f.<locals>.C");
        let Stmt::Block(class_body) = &make.code.body else {
            panic!("expected block");
        };
        assert_eq!(
            class_body[2],
            Stmt::Assign {
                target: Target::Name(NameRef::Name("y".to_owned())),
                value: Expr::Load(NameRef::DictOrDeref {
                    name: "x".to_owned(),
                    index: 0,
                }),
            }
        );
    }

    #[test]
    fn test_global_declaration_resets_qualname() {
        let code = compile_exec("\
def f():
    global g
    def g():
        pass
    def h():
        pass
");
        let f = first_nested(&code);
        let Stmt::Block(body) = &f.body else {
            panic!("expected block");
        };
        let qualnames: Vec<_> = body
            .iter()
            .map(|stmt| match stmt {
                Stmt::Assign {
                    value: Expr::MakeFunction(make),
                    ..
                } => make.code.qualname.as_str(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(qualnames, ["g", "f.<locals>.h"]);
    }

    #[test]
    fn test_list_comprehension_lowering() {
        let code = compile_exec("\
def f(xs):
    return [x * 2 for x in xs if x]
");
        let f = first_nested(&code);
        let Stmt::Return(Some(Expr::Collect { kind, iterable })) = &f.body else {
            panic!("expected collected comprehension: {:?}", f.body);
        };
        assert_eq!(*kind, CollectionKind::List);
        let Expr::Call { func, args, .. } = &**iterable else {
            panic!("expected call");
        };
        assert_eq!(
            args,
            &[Expr::GetIter(Box::new(Expr::Load(NameRef::Fast(0))))]
        );
        let Expr::MakeFunction(make) = &**func else {
            panic!("expected function");
        };
        let listcomp = &make.code;
        assert_eq!(listcomp.qualname, "f.<locals>.<listcomp>");
        assert_eq!(listcomp.arg_count, 1);
        assert_eq!(&listcomp.varnames[..2], [".0".to_owned(), "x".to_owned()]);
        assert!(listcomp.is_generator());
        assert!(make.closure.is_empty());
    }

    #[test]
    fn test_yield_in_comprehension() {
        assert!(matches!(
            compile_error("def f():\n    return [(yield x) for x in y]\n"),
            CodegenErrorType::YieldInComprehension("list comprehension")
        ));
    }

    #[test]
    fn test_functions_without_yield_are_not_transformed() {
        let code = compile_exec("def f(x):\n    return x + 1\n");
        let f = first_nested(&code);
        assert!(f.generator.is_none());
        assert!(!f.flags.contains(CodeFlags::GENERATOR));
        assert!(!f.body.is_resumable());
    }

    #[test]
    fn test_defaults_and_decorators() {
        insta::assert_snapshot!(compile_exec("\
@d1
@d2(3)
def f(a, b=1, *args, c=2, **kw):
    '''Doc.'''
").to_string(), @r"
        code <module>
          name:f = name:d1(name:d2(3)(<function f>))
        code f
          varnames: a, b, c, args, kw
        ");
        let code = compile_exec("def f(a, b=1, *args, c=2, **kw):\n    '''Doc.'''\n");
        let f = first_nested(&code);
        assert_eq!(f.doc.as_deref(), Some("Doc."));
        assert_eq!((f.posonlyarg_count, f.arg_count, f.kwonlyarg_count), (0, 2, 1));
        assert!(f.flags.contains(CodeFlags::VARARGS | CodeFlags::VARKEYWORDS));
    }

    #[test]
    fn test_optimize_levels() {
        let source = "\
'''Module doc.'''
assert x, 'message'
if __debug__:
    y = 1
";
        insta::assert_snapshot!(compile_exec(source).to_string(), @r"
        code <module>
          name:__doc__ = 'Module doc.'
          assert name:x, 'message'
          name:y = 1
        ");
        let code = compile_with(source, CompileOpts { optimize: 1 }).unwrap();
        insta::assert_snapshot!(code.to_string(), @r"
        code <module>
          name:__doc__ = 'Module doc.'
        ");
        let code = compile_with(source, CompileOpts { optimize: 2 }).unwrap();
        assert_eq!(code.body, Stmt::Block(Vec::new()));
        assert!(matches!(
            compile_error("__debug__ = 1\n"),
            CodegenErrorType::Assign("__debug__")
        ));
    }

    #[test]
    fn test_handler_name_is_unbound() {
        insta::assert_snapshot!(compile_exec("\
try:
    pass
except E as e:
    f(e)
").to_string(), @r"
        code <module>
          try:
            pass
          except name:E as name:e:
            try:
              name:f(name:e)
            finally:
              name:e = None
              del name:e
        ");
    }

    #[test]
    fn test_block_expression_wraps_trailing_statement() {
        let source_file = SourceFileBuilder::new("source_path", "x = 1\ny = x\n").finish();
        let parsed = ruff_python_parser::parse(
            source_file.source_text(),
            ruff_python_parser::Mode::Module.into(),
        )
        .unwrap();
        let ast::Mod::Module(module) = parsed.into_syntax() else {
            panic!("expected a module");
        };
        let code = compile_block_expression(&module, source_file, CompileOpts::default()).unwrap();
        let Stmt::Block(body) = &code.body else {
            panic!("expected block");
        };
        assert_eq!(body.len(), 2);
        let Some(Stmt::Return(Some(Expr::StmtExpr(stmt)))) = body.last() else {
            panic!("expected the last statement as the value, got {:?}", body.last());
        };
        assert!(matches!(**stmt, Stmt::Assign { .. }));
        assert!(matches!(Stmt::from(Expr::StmtExpr(stmt.clone())), Stmt::Assign { .. }));
    }

    #[test]
    fn test_with_items_nest() {
        insta::assert_snapshot!(compile_exec("with a as x, b:\n    pass\n").to_string(), @r"
        code <module>
          with name:a as name:x:
            with name:b:
              pass
        ");
    }

    #[test]
    fn test_imports() {
        insta::assert_snapshot!(compile_exec("\
import a.b.c
import a.b.c as d
from .m import x as y, z
").to_string(), @r"
        code <module>
          varnames: .t0
          name:a = import(a.b.c, level=0)
          name:d = import(a.b.c, level=0).b.c
          fast:.t0 = import(m, from=[x, z], level=1)
          name:y = import_from(fast:.t0, x)
          name:z = import_from(fast:.t0, z)
        ");
    }

    #[test]
    fn test_fstrings() {
        let code = compile_exec("f'{x!r:>{w}} {y=}'\n");
        let Stmt::Expr(expr) = &code.body else {
            panic!("expected expression statement");
        };
        assert_eq!(
            *expr,
            Expr::JoinedStr(vec![
                Expr::FormatValue {
                    value: Box::new(Expr::Load(NameRef::Name("x".to_owned()))),
                    conversion: Conversion::Repr,
                    spec: Some(Box::new(Expr::JoinedStr(vec![
                        str_constant(">"),
                        Expr::FormatValue {
                            value: Box::new(Expr::Load(NameRef::Name("w".to_owned()))),
                            conversion: Conversion::None,
                            spec: None,
                        },
                    ]))),
                },
                str_constant(" "),
                str_constant("y="),
                Expr::FormatValue {
                    value: Box::new(Expr::Load(NameRef::Name("y".to_owned()))),
                    conversion: Conversion::Repr,
                    spec: None,
                },
            ])
        );
    }

    #[test]
    fn test_annotations_at_module_level() {
        insta::assert_snapshot!(compile_exec("x: int = 1\ny: str\n").to_string(), @r"
        code <module>
          name:__annotations__ = {}
          name:x = 1
          name:__annotations__['x'] = name:int
          name:__annotations__['y'] = name:str
        ");
    }

    #[test]
    fn test_big_integers() {
        let code = compile_exec("x = 123_456_789_012_345_678_901_234_567_890\n");
        let Stmt::Assign {
            value: Expr::Constant(ConstantData::Integer { value }),
            ..
        } = &code.body
        else {
            panic!("expected integer constant");
        };
        assert_eq!(value.to_string(), "123456789012345678901234567890");
    }

    #[test]
    fn test_unsupported_constructs() {
        for source in [
            "async def f():\n    pass\n",
            "match x:\n    case 1:\n        pass\n",
            "from m import *\n",
        ] {
            assert!(
                matches!(compile_error(source), CodegenErrorType::NotImplementedYet),
                "{source}"
            );
        }
    }
}
