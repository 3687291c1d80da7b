/* Source is pre-scanned for symbols before translation.

The first pass records every binding, use and `global`/`nonlocal`
declaration per lexical scope. The second pass walks the finished scope
tree bottom-up and decides which names live in cells, which are captured
as free variables and which are globals. The translator then resolves
each name in constant time.
*/

use crate::{
    IndexMap,
    error::{CodegenError, CodegenErrorType, Declaration},
};
use alloc::borrow::Cow;
use arbor_compiler_core::{PositionEncoding, SourceFile};
use bitflags::bitflags;
use core::{fmt, mem, ops};
use ruff_python_ast as ast;
use ruff_text_size::{Ranged, TextRange};
use std::collections::HashSet;

/// Index of a scope inside its [`ScopeTree`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(usize);

impl ScopeId {
    pub const ROOT: Self = Self(0);

    pub const fn index(self) -> usize {
        self.0
    }
}

/// Every scope of one compilation unit. The module scope is the root.
#[derive(Clone, Debug)]
pub struct ScopeTree {
    scopes: Vec<SymbolTable>,
}

impl ScopeTree {
    pub fn scan_program(
        program: &ast::ModModule,
        source_file: SourceFile,
    ) -> SymbolTableResult<Self> {
        let mut builder = SymbolTableBuilder::new(source_file);
        builder.scan_statements(program.body.as_ref())?;
        builder.finish()
    }

    pub fn scan_expr(
        expr: &ast::ModExpression,
        source_file: SourceFile,
    ) -> SymbolTableResult<Self> {
        let mut builder = SymbolTableBuilder::new(source_file);
        builder.scan_expression(expr.body.as_ref(), ExpressionContext::Load)?;
        builder.finish()
    }

    pub fn root(&self) -> &SymbolTable {
        &self[ScopeId::ROOT]
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ScopeId, &SymbolTable)> + '_ {
        self.scopes
            .iter()
            .enumerate()
            .map(|(index, table)| (ScopeId(index), table))
    }

    /// Enclosing scopes of `id`, nearest first.
    pub fn ancestors(&self, id: ScopeId) -> impl Iterator<Item = ScopeId> + '_ {
        core::iter::successors(self[id].parent, |&scope| self[scope].parent)
    }

    /// The child of `parent` created for the definition spanning `range`.
    pub fn child_at(&self, parent: ScopeId, range: TextRange) -> Option<ScopeId> {
        self[parent]
            .children
            .iter()
            .copied()
            .find(|&child| self[child].range == range)
    }
}

impl ops::Index<ScopeId> for ScopeTree {
    type Output = SymbolTable;

    fn index(&self, id: ScopeId) -> &SymbolTable {
        &self.scopes[id.0]
    }
}

impl ops::IndexMut<ScopeId> for ScopeTree {
    fn index_mut(&mut self, id: ScopeId) -> &mut SymbolTable {
        &mut self.scopes[id.0]
    }
}

/// Captures all symbols in the current scope, and links to the enclosing
/// scope and the scopes nested in it.
#[derive(Clone)]
pub struct SymbolTable {
    /// The name of this symbol table. Often the name of the class or function.
    pub name: String,

    /// The type of symbol table
    pub typ: CompilerScope,

    /// The line number in the source code where this symboltable begins.
    pub line_number: u32,

    /// Source range of the definition that opened this scope.
    pub range: TextRange,

    // Return True if the block is a nested class or function
    pub is_nested: bool,

    /// Whether a `yield` appears directly in this scope.
    pub is_generator: bool,

    /// A set of symbols present on this scope level, in first-mention order.
    pub symbols: IndexMap<String, Symbol>,

    pub parent: Option<ScopeId>,

    /// Nested scopes in source order.
    pub children: Vec<ScopeId>,

    /// Fast local slots: parameters first, then the other locals.
    pub varnames: Vec<String>,

    pub cellvars: Vec<String>,

    pub freevars: Vec<String>,

    /// Whether this class scope needs an implicit __class__ cell
    pub needs_class_closure: bool,
}

impl SymbolTable {
    fn new(
        name: String,
        typ: CompilerScope,
        line_number: u32,
        range: TextRange,
        is_nested: bool,
        parent: Option<ScopeId>,
    ) -> Self {
        Self {
            name,
            typ,
            line_number,
            range,
            is_nested,
            is_generator: false,
            symbols: IndexMap::default(),
            parent,
            children: Vec::new(),
            varnames: Vec::new(),
            cellvars: Vec::new(),
            freevars: Vec::new(),
            needs_class_closure: false,
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    /// Function, lambda and comprehension scopes keep their locals in fast
    /// slots; module and class scopes use a namespace.
    pub const fn is_function_like(&self) -> bool {
        matches!(
            self.typ,
            CompilerScope::Function | CompilerScope::Lambda | CompilerScope::Comprehension(_)
        )
    }

    /// Every slot of this scope in numbering order: fast locals, then cells,
    /// then free variables. Deref indices count cells first.
    pub fn iter_slots(&self) -> impl Iterator<Item = (Slot, &str)> + '_ {
        let fast = self
            .varnames
            .iter()
            .enumerate()
            .map(|(i, name)| (Slot::Fast(i as u32), name.as_str()));
        let cells = self
            .cellvars
            .iter()
            .enumerate()
            .map(|(i, name)| (Slot::Cell(i as u32), name.as_str()));
        let offset = self.cellvars.len();
        let frees = self
            .freevars
            .iter()
            .enumerate()
            .map(move |(i, name)| (Slot::Free((offset + i) as u32), name.as_str()));
        fast.chain(cells).chain(frees)
    }
}

impl fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SymbolTable({} {:?}, {:?} symbols, {:?} sub scopes)",
            self.typ,
            self.name,
            self.symbols.len(),
            self.children.len()
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Slot {
    Fast(u32),
    Cell(u32),
    Free(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerScope {
    Module,
    Class,
    Function,
    Lambda,
    Comprehension(ComprehensionType),
}

impl fmt::Display for CompilerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Module => write!(f, "module"),
            Self::Class => write!(f, "class"),
            Self::Function => write!(f, "function"),
            Self::Lambda => write!(f, "lambda"),
            Self::Comprehension(kind) => write!(f, "{}", kind.description()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComprehensionType {
    Generator,
    List,
    Set,
    Dict,
}

impl ComprehensionType {
    pub const fn description(self) -> &'static str {
        match self {
            Self::Generator => "generator expression",
            Self::List => "list comprehension",
            Self::Set => "set comprehension",
            Self::Dict => "dict comprehension",
        }
    }

    const fn scope_name(self) -> &'static str {
        match self {
            Self::Generator => "<genexpr>",
            Self::List => "<listcomp>",
            Self::Set => "<setcomp>",
            Self::Dict => "<dictcomp>",
        }
    }
}

/// Indicator for a single symbol what the scope of this symbol is.
/// The scope can be unknown, which is unfortunate, but not impossible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    Unknown,
    Local,
    GlobalExplicit,
    GlobalImplicit,
    Free,
    Cell,
}

impl fmt::Display for SymbolScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Local => "local",
            Self::GlobalExplicit => "global explicit",
            Self::GlobalImplicit => "global implicit",
            Self::Free => "free",
            Self::Cell => "cell",
        })
    }
}

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq)]
    pub struct SymbolFlags: u16 {
        const REFERENCED = 0x001;
        const ASSIGNED = 0x002;
        const PARAMETER = 0x004;
        const ANNOTATED = 0x008;
        const IMPORTED = 0x010;
        const NONLOCAL = 0x020;
        // bound as a comprehension iteration variable; walrus may not rebind it
        const ITER = 0x040;
        /// A class scope passes this name through to its methods:
        /// ```python
        /// def foo(x):
        ///     class A:
        ///         def method(self):
        ///             return x
        /// ```
        const FREE_CLASS = 0x080;
        const GLOBAL = 0x100;
        const BOUND = Self::ASSIGNED.bits() | Self::PARAMETER.bits() | Self::IMPORTED.bits() | Self::ITER.bits();
    }
}

/// A single symbol in a table. Has various properties such as the scope
/// of the symbol, and also the various uses of the symbol.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub flags: SymbolFlags,
    /// Range of the first mention.
    pub range: TextRange,
}

impl Symbol {
    fn new(name: &str, range: TextRange) -> Self {
        Self {
            name: name.to_owned(),
            scope: SymbolScope::Unknown,
            flags: SymbolFlags::empty(),
            range,
        }
    }

    pub const fn is_global(&self) -> bool {
        matches!(
            self.scope,
            SymbolScope::GlobalExplicit | SymbolScope::GlobalImplicit
        )
    }

    pub const fn is_local(&self) -> bool {
        matches!(self.scope, SymbolScope::Local | SymbolScope::Cell)
    }

    pub const fn is_bound(&self) -> bool {
        self.flags.intersects(SymbolFlags::BOUND)
    }

    /// Whether the owning scope must hand this name to nested scopes.
    pub const fn is_free(&self) -> bool {
        matches!(self.scope, SymbolScope::Free) || self.flags.contains(SymbolFlags::FREE_CLASS)
    }
}

#[derive(Debug)]
pub struct SymbolTableError {
    pub error: CodegenErrorType,
    pub range: TextRange,
}

impl SymbolTableError {
    pub fn into_codegen_error(self, source_file: &SourceFile) -> CodegenError {
        let location = source_file
            .to_source_code()
            .source_location(self.range.start(), PositionEncoding::Utf8);
        CodegenError {
            location: Some(location),
            range: self.range,
            error: self.error,
            source_path: source_file.name().to_owned(),
        }
    }
}

pub type SymbolTableResult<T = ()> = Result<T, SymbolTableError>;

impl fmt::Display for ScopeTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_scope(ScopeId::ROOT, 0, f)
    }
}

impl ScopeTree {
    fn fmt_scope(&self, id: ScopeId, level: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = &self[id];
        let indent = "  ".repeat(level);
        writeln!(f, "{indent}{} {}", table.typ, table.name)?;
        for (label, names) in [
            ("varnames", &table.varnames),
            ("cellvars", &table.cellvars),
            ("freevars", &table.freevars),
        ] {
            if !names.is_empty() {
                writeln!(f, "{indent}  {label}: {}", names.join(", "))?;
            }
        }
        for symbol in table.symbols.values() {
            let flags = symbol
                .flags
                .iter_names()
                .map(|(name, _)| name.to_ascii_lowercase())
                .collect::<Vec<_>>();
            writeln!(
                f,
                "{indent}  {}: {} [{}]",
                symbol.name,
                symbol.scope,
                flags.join(", ")
            )?;
        }
        for &child in &table.children {
            self.fmt_scope(child, level + 1, f)?;
        }
        Ok(())
    }
}

/* Perform some sort of analysis on nonlocals, globals etc..
  See also: https://github.com/python/cpython/blob/main/Python/symtable.c#L410
*/
fn analyze_symbol_table(tree: &mut ScopeTree) -> SymbolTableResult {
    let mut analyzer = SymbolTableAnalyzer { tree };
    // the free names of the module scope have nowhere left to go
    let _newfree = analyzer.analyze_symbol_table(ScopeId::ROOT)?;
    Ok(())
}

/* Drop __class__ from the free variables collected from the methods and
   remember that the class body has to provide the cell.
*/
fn drop_class_free(symbol_table: &mut SymbolTable, newfree: &mut HashSet<String>) {
    if newfree.remove("__class__") {
        symbol_table.needs_class_closure = true;
    }
}

struct SymbolTableAnalyzer<'a> {
    tree: &'a mut ScopeTree,
}

impl SymbolTableAnalyzer<'_> {
    /// Analyzes `id` after all of its children and returns the names its
    /// subtree needs from enclosing scopes.
    fn analyze_symbol_table(&mut self, id: ScopeId) -> SymbolTableResult<HashSet<String>> {
        let mut newfree = HashSet::new();
        let children = self.tree[id].children.clone();
        for child in children {
            let child_free = self.analyze_symbol_table(child)?;
            newfree.extend(child_free);
        }

        // Own symbols are only ever inserted by the scope itself, so they can
        // leave the arena while the ancestors are being updated.
        let mut symbols = mem::take(&mut self.tree[id].symbols);
        let result = self.analyze_symbols(id, &mut symbols, &mut newfree);
        self.tree[id].symbols = symbols;
        result?;

        if self.tree[id].typ == CompilerScope::Class {
            drop_class_free(&mut self.tree[id], &mut newfree);
        }
        Ok(newfree)
    }

    fn analyze_symbols(
        &mut self,
        id: ScopeId,
        symbols: &mut IndexMap<String, Symbol>,
        newfree: &mut HashSet<String>,
    ) -> SymbolTableResult {
        let st_typ = self.tree[id].typ;
        for symbol in symbols.values_mut() {
            self.analyze_symbol(id, symbol, st_typ)?;
            if symbol.is_free() {
                newfree.insert(symbol.name.clone());
            }
        }
        Ok(())
    }

    fn analyze_symbol(
        &mut self,
        id: ScopeId,
        symbol: &mut Symbol,
        st_typ: CompilerScope,
    ) -> SymbolTableResult {
        match symbol.scope {
            SymbolScope::Free if symbol.flags.contains(SymbolFlags::NONLOCAL) => {
                if self.found_in_outer_scope(id, &symbol.name) != Some(SymbolScope::Free) {
                    return Err(SymbolTableError {
                        error: CodegenErrorType::NonlocalNotFound(symbol.name.clone()),
                        range: symbol.range,
                    });
                }
            }
            SymbolScope::Free
            | SymbolScope::GlobalExplicit
            | SymbolScope::GlobalImplicit
            | SymbolScope::Local
            | SymbolScope::Cell => {
                // all is well
            }
            SymbolScope::Unknown => {
                // Try hard to figure out what the scope of this symbol is.
                let scope = if symbol.is_bound() {
                    self.found_in_inner_scope(id, &symbol.name, st_typ)
                        .unwrap_or(SymbolScope::Local)
                } else if let Some(scope) = self.found_in_outer_scope(id, &symbol.name) {
                    scope
                } else if self.tree[id].parent.is_none() {
                    // Don't make assumptions when we don't know.
                    SymbolScope::Unknown
                } else {
                    // If there are scopes above we assume global.
                    SymbolScope::GlobalImplicit
                };
                symbol.scope = scope;
            }
        }
        Ok(())
    }

    fn found_in_outer_scope(&mut self, id: ScopeId, name: &str) -> Option<SymbolScope> {
        let ancestors: Vec<ScopeId> = self.tree.ancestors(id).collect();
        let mut decl_depth = None;
        for (depth, &scope) in ancestors.iter().enumerate() {
            let table = &self.tree[scope];
            match table.typ {
                CompilerScope::Module => continue,
                CompilerScope::Class if name == "__class__" => {
                    decl_depth = Some(depth);
                    break;
                }
                // class scopes are not visible to the code nested in them
                CompilerScope::Class => continue,
                _ => {}
            }
            if let Some(sym) = table.symbols.get(name) {
                match sym.scope {
                    SymbolScope::GlobalExplicit => return Some(SymbolScope::GlobalExplicit),
                    SymbolScope::GlobalImplicit => {}
                    _ => {
                        if sym.is_bound() {
                            decl_depth = Some(depth);
                            break;
                        }
                    }
                }
            }
        }

        let depth = decl_depth?;
        // every scope between the use and the declaration passes the name on
        for &scope in &ancestors[..depth] {
            let table = &mut self.tree[scope];
            if table.typ == CompilerScope::Class {
                if let Some(free_class) = table.symbols.get_mut(name) {
                    free_class.flags.insert(SymbolFlags::FREE_CLASS);
                } else {
                    let mut symbol = Symbol::new(name, table.range);
                    symbol.flags.insert(SymbolFlags::FREE_CLASS);
                    symbol.scope = SymbolScope::Free;
                    table.symbols.insert(name.to_owned(), symbol);
                }
            } else if !table.symbols.contains_key(name) {
                let mut symbol = Symbol::new(name, table.range);
                symbol.scope = SymbolScope::Free;
                table.symbols.insert(name.to_owned(), symbol);
            }
        }
        Some(SymbolScope::Free)
    }

    fn found_in_inner_scope(
        &self,
        id: ScopeId,
        name: &str,
        st_typ: CompilerScope,
    ) -> Option<SymbolScope> {
        let is_module = self.tree[id].parent.is_none();
        self.tree[id].children.iter().find_map(|&child| {
            let sym = self.tree[child].symbols.get(name)?;
            if sym.is_free() {
                if st_typ == CompilerScope::Class && name != "__class__" {
                    None
                } else {
                    Some(SymbolScope::Cell)
                }
            } else if sym.scope == SymbolScope::GlobalExplicit && is_module {
                // the symbol is defined on the module level, and an inner scope declares
                // a global that points to it
                Some(SymbolScope::GlobalExplicit)
            } else {
                None
            }
        })
    }
}

/// Fixes the slot sets of a scope once every symbol is classified.
fn finalize_slots(table: &mut SymbolTable) {
    if table.needs_class_closure {
        let range = table.range;
        let class_cell = table
            .symbols
            .entry("__class__".to_owned())
            .or_insert_with(|| Symbol::new("__class__", range));
        class_cell.scope = SymbolScope::Cell;
    }
    if table.is_function_like() {
        for symbol in table.symbols.values() {
            if symbol.scope == SymbolScope::Local && !table.varnames.contains(&symbol.name) {
                table.varnames.push(symbol.name.clone());
            }
        }
    }
    table.cellvars = table
        .symbols
        .values()
        .filter(|symbol| symbol.scope == SymbolScope::Cell)
        .map(|symbol| symbol.name.clone())
        .collect();
    table.freevars = table
        .symbols
        .values()
        .filter(|symbol| symbol.is_free())
        .map(|symbol| symbol.name.clone())
        .collect();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SymbolUsage {
    Global,
    Nonlocal,
    Used,
    Assigned,
    Imported,
    AnnotationAssigned,
    Parameter,
    Iter,
}

#[derive(Copy, Clone, PartialEq)]
enum ExpressionContext {
    Load,
    Store,
    Delete,
    Iter,
    IterDefinitionExp,
}

struct SymbolTableBuilder {
    class_name: Option<String>,
    tree: ScopeTree,
    current: ScopeId,
    source_file: SourceFile,
    in_iter_def_exp: bool,
}

impl SymbolTableBuilder {
    fn new(source_file: SourceFile) -> Self {
        let module = SymbolTable::new(
            "<module>".to_owned(),
            CompilerScope::Module,
            0,
            TextRange::default(),
            false,
            None,
        );
        Self {
            class_name: None,
            tree: ScopeTree {
                scopes: vec![module],
            },
            current: ScopeId::ROOT,
            source_file,
            in_iter_def_exp: false,
        }
    }

    fn finish(mut self) -> SymbolTableResult<ScopeTree> {
        debug_assert_eq!(self.current, ScopeId::ROOT);
        analyze_symbol_table(&mut self.tree)?;
        for table in &mut self.tree.scopes {
            finalize_slots(table);
        }
        debug!("resolved {} scopes", self.tree.len());
        Ok(self.tree)
    }

    fn table(&mut self) -> &mut SymbolTable {
        &mut self.tree[self.current]
    }

    fn enter_scope(&mut self, name: &str, typ: CompilerScope, range: TextRange) {
        let parent = &self.tree[self.current];
        let is_nested = parent.is_nested || parent.is_function_like();
        let line_number = self.line_index_start(range);
        let id = ScopeId(self.tree.scopes.len());
        self.tree.scopes.push(SymbolTable::new(
            name.to_owned(),
            typ,
            line_number,
            range,
            is_nested,
            Some(self.current),
        ));
        self.tree[self.current].children.push(id);
        trace!("entering {typ} scope {name}");
        self.current = id;
    }

    fn leave_scope(&mut self) {
        self.current = self.tree[self.current].parent.unwrap_or(ScopeId::ROOT);
    }

    fn line_index_start(&self, range: TextRange) -> u32 {
        self.source_file
            .to_source_code()
            .line_index(range.start())
            .get() as _
    }

    fn scan_statements(&mut self, statements: &[ast::Stmt]) -> SymbolTableResult {
        for statement in statements {
            self.scan_statement(statement)?;
        }
        Ok(())
    }

    fn scan_parameters(&mut self, parameters: &[ast::ParameterWithDefault]) -> SymbolTableResult {
        for parameter in parameters {
            self.scan_parameter(&parameter.parameter)?;
        }
        Ok(())
    }

    fn scan_parameter(&mut self, parameter: &ast::Parameter) -> SymbolTableResult {
        self.register_ident(&parameter.name, SymbolUsage::Parameter)?;
        let name = parameter.name.as_str().to_owned();
        self.table().varnames.push(name);
        Ok(())
    }

    fn scan_statement(&mut self, statement: &ast::Stmt) -> SymbolTableResult {
        use ast::*;
        match &statement {
            Stmt::Global(StmtGlobal { names, .. }) => {
                for name in names {
                    self.register_ident(name, SymbolUsage::Global)?;
                }
            }
            Stmt::Nonlocal(StmtNonlocal { names, range, .. }) => {
                if self.tree[self.current].typ == CompilerScope::Module {
                    return Err(SymbolTableError {
                        error: CodegenErrorType::NonlocalAtModuleLevel(
                            names.first().map(|n| n.as_str()).unwrap_or_default().to_owned(),
                        ),
                        range: *range,
                    });
                }
                for name in names {
                    self.register_ident(name, SymbolUsage::Nonlocal)?;
                }
            }
            Stmt::FunctionDef(StmtFunctionDef {
                name,
                body,
                parameters,
                decorator_list,
                range,
                ..
            }) => {
                self.scan_decorators(decorator_list)?;
                self.register_ident(name, SymbolUsage::Assigned)?;
                self.enter_scope_with_parameters(
                    name.as_str(),
                    parameters,
                    CompilerScope::Function,
                    *range,
                )?;
                self.scan_statements(body)?;
                self.leave_scope();
            }
            Stmt::ClassDef(StmtClassDef {
                name,
                body,
                arguments,
                decorator_list,
                range,
                ..
            }) => {
                self.scan_decorators(decorator_list)?;
                if let Some(arguments) = arguments {
                    self.scan_expressions(&arguments.args, ExpressionContext::Load)?;
                    for keyword in &arguments.keywords {
                        self.scan_expression(&keyword.value, ExpressionContext::Load)?;
                    }
                }
                self.register_ident(name, SymbolUsage::Assigned)?;
                self.enter_scope(name.as_str(), CompilerScope::Class, *range);
                let prev_class = self.class_name.replace(name.to_string());
                self.scan_statements(body)?;
                self.class_name = prev_class;
                self.leave_scope();
            }
            Stmt::Expr(StmtExpr { value, .. }) => {
                self.scan_expression(value, ExpressionContext::Load)?
            }
            Stmt::If(StmtIf {
                test,
                body,
                elif_else_clauses,
                ..
            }) => {
                self.scan_expression(test, ExpressionContext::Load)?;
                self.scan_statements(body)?;
                for elif in elif_else_clauses {
                    if let Some(test) = &elif.test {
                        self.scan_expression(test, ExpressionContext::Load)?;
                    }
                    self.scan_statements(&elif.body)?;
                }
            }
            Stmt::For(StmtFor {
                target,
                iter,
                body,
                orelse,
                ..
            }) => {
                self.scan_expression(iter, ExpressionContext::Load)?;
                self.scan_expression(target, ExpressionContext::Store)?;
                self.scan_statements(body)?;
                self.scan_statements(orelse)?;
            }
            Stmt::While(StmtWhile {
                test, body, orelse, ..
            }) => {
                self.scan_expression(test, ExpressionContext::Load)?;
                self.scan_statements(body)?;
                self.scan_statements(orelse)?;
            }
            Stmt::Break(_) | Stmt::Continue(_) | Stmt::Pass(_) => {
                // No symbols here.
            }
            Stmt::Import(StmtImport { names, .. }) => {
                for alias in names {
                    if let Some(asname) = &alias.asname {
                        self.register_ident(asname, SymbolUsage::Imported)?;
                    } else {
                        // `import a.b` binds `a`
                        let top = alias.name.as_str().split('.').next().unwrap_or_default();
                        self.register_name(top, SymbolUsage::Imported, alias.name.range)?;
                    }
                }
            }
            Stmt::ImportFrom(StmtImportFrom { names, range, .. }) => {
                for alias in names {
                    if alias.name.as_str() == "*" {
                        if self.tree[self.current].typ != CompilerScope::Module {
                            return Err(SymbolTableError {
                                error: CodegenErrorType::FunctionImportStar,
                                range: *range,
                            });
                        }
                    } else {
                        let binding = alias.asname.as_ref().unwrap_or(&alias.name);
                        self.register_ident(binding, SymbolUsage::Imported)?;
                    }
                }
            }
            Stmt::Return(StmtReturn { value, .. }) => {
                if let Some(expression) = value {
                    self.scan_expression(expression, ExpressionContext::Load)?;
                }
            }
            Stmt::Assert(StmtAssert { test, msg, .. }) => {
                self.scan_expression(test, ExpressionContext::Load)?;
                if let Some(expression) = msg {
                    self.scan_expression(expression, ExpressionContext::Load)?;
                }
            }
            Stmt::Delete(StmtDelete { targets, .. }) => {
                self.scan_expressions(targets, ExpressionContext::Delete)?;
            }
            Stmt::Assign(StmtAssign { targets, value, .. }) => {
                self.scan_expression(value, ExpressionContext::Load)?;
                self.scan_expressions(targets, ExpressionContext::Store)?;
            }
            Stmt::AugAssign(StmtAugAssign { target, value, .. }) => {
                self.scan_expression(target, ExpressionContext::Store)?;
                self.scan_expression(value, ExpressionContext::Load)?;
            }
            Stmt::AnnAssign(StmtAnnAssign {
                target,
                annotation,
                value,
                simple,
                ..
            }) => {
                if let Some(value) = value {
                    self.scan_expression(value, ExpressionContext::Load)?;
                }
                match &**target {
                    Expr::Name(ExprName { id, range, .. }) if *simple => {
                        self.register_name(id.as_str(), SymbolUsage::AnnotationAssigned, *range)?;
                        // only module and class bodies evaluate their annotations
                        if !self.tree[self.current].is_function_like() {
                            self.scan_expression(annotation, ExpressionContext::Load)?;
                        }
                    }
                    _ if value.is_some() => {
                        self.scan_expression(target, ExpressionContext::Store)?;
                    }
                    _ => {}
                }
            }
            Stmt::With(StmtWith { items, body, .. }) => {
                for item in items {
                    self.scan_expression(&item.context_expr, ExpressionContext::Load)?;
                    if let Some(expression) = &item.optional_vars {
                        self.scan_expression(expression, ExpressionContext::Store)?;
                    }
                }
                self.scan_statements(body)?;
            }
            Stmt::Try(StmtTry {
                body,
                handlers,
                orelse,
                finalbody,
                ..
            }) => {
                self.scan_statements(body)?;
                for handler in handlers {
                    let ExceptHandler::ExceptHandler(ExceptHandlerExceptHandler {
                        type_,
                        name,
                        body,
                        ..
                    }) = &handler;
                    if let Some(expression) = type_ {
                        self.scan_expression(expression, ExpressionContext::Load)?;
                    }
                    if let Some(name) = name {
                        self.register_ident(name, SymbolUsage::Assigned)?;
                    }
                    self.scan_statements(body)?;
                }
                self.scan_statements(orelse)?;
                self.scan_statements(finalbody)?;
            }
            Stmt::Raise(StmtRaise { exc, cause, .. }) => {
                if let Some(expression) = exc {
                    self.scan_expression(expression, ExpressionContext::Load)?;
                }
                if let Some(expression) = cause {
                    self.scan_expression(expression, ExpressionContext::Load)?;
                }
            }
            // rejected by the translator
            Stmt::Match(_) | Stmt::TypeAlias(_) | Stmt::IpyEscapeCommand(_) => {}
        }
        Ok(())
    }

    fn scan_decorators(&mut self, decorators: &[ast::Decorator]) -> SymbolTableResult {
        for decorator in decorators {
            self.scan_expression(&decorator.expression, ExpressionContext::Load)?;
        }
        Ok(())
    }

    fn scan_expressions(
        &mut self,
        expressions: &[ast::Expr],
        context: ExpressionContext,
    ) -> SymbolTableResult {
        for expression in expressions {
            self.scan_expression(expression, context)?;
        }
        Ok(())
    }

    fn scan_expression(
        &mut self,
        expression: &ast::Expr,
        context: ExpressionContext,
    ) -> SymbolTableResult {
        use ast::*;

        // subexpressions of targets are loads
        let load = ExpressionContext::Load;
        match expression {
            Expr::BinOp(ExprBinOp { left, right, .. }) => {
                self.scan_expression(left, context)?;
                self.scan_expression(right, context)?;
            }
            Expr::BoolOp(ExprBoolOp { values, .. }) => {
                self.scan_expressions(values, context)?;
            }
            Expr::Compare(ExprCompare {
                left, comparators, ..
            }) => {
                self.scan_expression(left, context)?;
                self.scan_expressions(comparators, context)?;
            }
            Expr::Subscript(ExprSubscript { value, slice, .. }) => {
                self.scan_expression(value, load)?;
                self.scan_expression(slice, load)?;
            }
            Expr::Attribute(ExprAttribute { value, .. }) => {
                self.scan_expression(value, load)?;
            }
            Expr::Dict(ExprDict { items, .. }) => {
                for item in items {
                    if let Some(key) = &item.key {
                        self.scan_expression(key, context)?;
                    }
                    self.scan_expression(&item.value, context)?;
                }
            }
            Expr::Await(ExprAwait { value, .. }) => {
                self.scan_expression(value, context)?;
            }
            Expr::Yield(ExprYield { value, range, .. }) => {
                self.mark_generator(CodegenErrorType::InvalidYield, *range)?;
                if let Some(expression) = value {
                    self.scan_expression(expression, context)?;
                }
            }
            Expr::YieldFrom(ExprYieldFrom { value, range, .. }) => {
                self.mark_generator(CodegenErrorType::InvalidYieldFrom, *range)?;
                self.scan_expression(value, context)?;
            }
            Expr::UnaryOp(ExprUnaryOp { operand, .. }) => {
                self.scan_expression(operand, context)?;
            }
            Expr::Starred(ExprStarred { value, .. }) => {
                self.scan_expression(value, context)?;
            }
            Expr::Tuple(ExprTuple { elts, .. })
            | Expr::Set(ExprSet { elts, .. })
            | Expr::List(ExprList { elts, .. }) => {
                self.scan_expressions(elts, context)?;
            }
            Expr::Slice(ExprSlice {
                lower, upper, step, ..
            }) => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.scan_expression(part, context)?;
                }
            }
            Expr::Generator(ExprGenerator {
                elt,
                generators,
                range,
                ..
            }) => {
                self.scan_comprehension(ComprehensionType::Generator, elt, None, generators, *range)?;
            }
            Expr::ListComp(ExprListComp {
                elt,
                generators,
                range,
                ..
            }) => {
                self.scan_comprehension(ComprehensionType::List, elt, None, generators, *range)?;
            }
            Expr::SetComp(ExprSetComp {
                elt,
                generators,
                range,
                ..
            }) => {
                self.scan_comprehension(ComprehensionType::Set, elt, None, generators, *range)?;
            }
            Expr::DictComp(ExprDictComp {
                key,
                value,
                generators,
                range,
                ..
            }) => {
                self.scan_comprehension(
                    ComprehensionType::Dict,
                    key,
                    Some(value.as_ref()),
                    generators,
                    *range,
                )?;
            }
            Expr::Call(ExprCall {
                func, arguments, ..
            }) => {
                self.scan_expression(func, load)?;
                self.scan_expressions(&arguments.args, load)?;
                for keyword in &arguments.keywords {
                    self.scan_expression(&keyword.value, load)?;
                }
            }
            Expr::Name(ExprName { id, range, .. }) => {
                let id = id.as_str();
                match context {
                    ExpressionContext::Delete | ExpressionContext::Store => {
                        self.register_name(id, SymbolUsage::Assigned, *range)?;
                    }
                    ExpressionContext::Iter => {
                        self.register_name(id, SymbolUsage::Iter, *range)?;
                    }
                    ExpressionContext::Load | ExpressionContext::IterDefinitionExp => {
                        self.register_name(id, SymbolUsage::Used, *range)?;
                    }
                }
                // Interesting stuff about the __class__ variable:
                // https://docs.python.org/3/reference/datamodel.html?highlight=__class__#creating-the-class-object
                if context == ExpressionContext::Load
                    && matches!(
                        self.tree[self.current].typ,
                        CompilerScope::Function | CompilerScope::Lambda
                    )
                    && id == "super"
                {
                    self.register_name("__class__", SymbolUsage::Used, *range)?;
                }
            }
            Expr::Lambda(ExprLambda {
                body,
                parameters,
                range,
                ..
            }) => {
                if let Some(parameters) = parameters {
                    self.enter_scope_with_parameters(
                        "<lambda>",
                        parameters,
                        CompilerScope::Lambda,
                        *range,
                    )?;
                } else {
                    self.enter_scope("<lambda>", CompilerScope::Lambda, *range);
                }
                self.scan_expression(body, load)?;
                self.leave_scope();
            }
            Expr::FString(ExprFString { value, .. }) => {
                for expr in value.elements().filter_map(|x| x.as_interpolation()) {
                    self.scan_expression(&expr.expression, load)?;
                    if let Some(format_spec) = &expr.format_spec {
                        for element in format_spec.elements.interpolations() {
                            self.scan_expression(&element.expression, load)?
                        }
                    }
                }
            }
            // rejected by the translator
            Expr::TString(_) | Expr::IpyEscapeCommand(_) => {}
            Expr::StringLiteral(_)
            | Expr::BytesLiteral(_)
            | Expr::NumberLiteral(_)
            | Expr::BooleanLiteral(_)
            | Expr::NoneLiteral(_)
            | Expr::EllipsisLiteral(_) => {}
            Expr::If(ExprIf {
                test, body, orelse, ..
            }) => {
                self.scan_expression(test, load)?;
                self.scan_expression(body, load)?;
                self.scan_expression(orelse, load)?;
            }
            Expr::Named(ExprNamed {
                target,
                value,
                range,
                ..
            }) => {
                // named expressions are not allowed in the definition of
                // comprehension iterator definitions
                if self.in_iter_def_exp {
                    return Err(SymbolTableError {
                        error: CodegenErrorType::NamedExprInIterable,
                        range: *range,
                    });
                }

                self.scan_expression(value, load)?;

                if let Expr::Name(ExprName { id, .. }) = &**target {
                    if matches!(
                        self.tree[self.current].typ,
                        CompilerScope::Comprehension(_)
                    ) {
                        self.bind_named_expr_in_comprehension(id.as_str(), target.range())?;
                    } else {
                        self.register_name(id.as_str(), SymbolUsage::Assigned, target.range())?;
                    }
                } else {
                    self.scan_expression(target, ExpressionContext::Store)?;
                }
            }
        }
        Ok(())
    }

    fn mark_generator(&mut self, outside: CodegenErrorType, range: TextRange) -> SymbolTableResult {
        match self.tree[self.current].typ {
            CompilerScope::Function | CompilerScope::Lambda => {
                self.table().is_generator = true;
                Ok(())
            }
            CompilerScope::Comprehension(kind) => Err(SymbolTableError {
                error: CodegenErrorType::YieldInComprehension(kind.description()),
                range,
            }),
            CompilerScope::Module | CompilerScope::Class => Err(SymbolTableError {
                error: outside,
                range,
            }),
        }
    }

    fn scan_comprehension(
        &mut self,
        kind: ComprehensionType,
        elt1: &ast::Expr,
        elt2: Option<&ast::Expr>,
        generators: &[ast::Comprehension],
        range: TextRange,
    ) -> SymbolTableResult {
        // The first iterable is evaluated in the enclosing scope.
        if let Some(first) = generators.first() {
            let was_in_iter_def_exp = mem::replace(&mut self.in_iter_def_exp, true);
            let result = self.scan_expression(&first.iter, ExpressionContext::IterDefinitionExp);
            self.in_iter_def_exp = was_in_iter_def_exp;
            result?;
        }

        self.enter_scope(kind.scope_name(), CompilerScope::Comprehension(kind), range);

        // Register the passed argument to the generator function as the name ".0"
        self.register_name(".0", SymbolUsage::Parameter, range)?;
        self.table().varnames.push(".0".to_owned());
        self.table().is_generator = true;

        for (i, generator) in generators.iter().enumerate() {
            if i > 0 {
                let was_in_iter_def_exp = mem::replace(&mut self.in_iter_def_exp, true);
                let result = self.scan_expression(&generator.iter, ExpressionContext::Load);
                self.in_iter_def_exp = was_in_iter_def_exp;
                result?;
            }
            self.scan_expression(&generator.target, ExpressionContext::Iter)?;
            for if_expr in &generator.ifs {
                self.scan_expression(if_expr, ExpressionContext::Load)?;
            }
        }

        self.scan_expression(elt1, ExpressionContext::Load)?;
        if let Some(elt2) = elt2 {
            self.scan_expression(elt2, ExpressionContext::Load)?;
        }

        self.leave_scope();
        Ok(())
    }

    /// A walrus inside a comprehension binds in the nearest enclosing scope
    /// that is not a comprehension; every comprehension on the way treats
    /// the name as declared `nonlocal` (or `global` at module level).
    fn bind_named_expr_in_comprehension(
        &mut self,
        name: &str,
        range: TextRange,
    ) -> SymbolTableResult {
        let mut comprehensions = Vec::new();
        let mut scope = self.current;
        let (owner, owner_typ) = loop {
            let table = &self.tree[scope];
            match table.typ {
                CompilerScope::Comprehension(_) => {
                    if table
                        .symbols
                        .get(name)
                        .is_some_and(|symbol| symbol.flags.contains(SymbolFlags::ITER))
                    {
                        return Err(SymbolTableError {
                            error: CodegenErrorType::ComprehensionRebind(name.to_owned()),
                            range,
                        });
                    }
                    comprehensions.push(scope);
                    match table.parent {
                        Some(parent) => scope = parent,
                        None => break (scope, table.typ),
                    }
                }
                CompilerScope::Class => {
                    return Err(SymbolTableError {
                        error: CodegenErrorType::NamedExprInClassComprehension,
                        range,
                    });
                }
                typ => break (scope, typ),
            }
        };

        for comprehension in comprehensions {
            let symbol = self.tree[comprehension]
                .symbols
                .entry(name.to_owned())
                .or_insert_with(|| Symbol::new(name, range));
            if owner_typ == CompilerScope::Module {
                symbol.scope = SymbolScope::GlobalExplicit;
                symbol.flags.insert(SymbolFlags::GLOBAL | SymbolFlags::ASSIGNED);
            } else {
                symbol.scope = SymbolScope::Free;
                symbol.flags.insert(SymbolFlags::NONLOCAL | SymbolFlags::ASSIGNED);
            }
        }
        let symbol = self.tree[owner]
            .symbols
            .entry(name.to_owned())
            .or_insert_with(|| Symbol::new(name, range));
        symbol.flags.insert(SymbolFlags::ASSIGNED);
        Ok(())
    }

    fn enter_scope_with_parameters(
        &mut self,
        name: &str,
        parameters: &ast::Parameters,
        typ: CompilerScope,
        range: TextRange,
    ) -> SymbolTableResult {
        // Evaluate defaults in the enclosing scope.
        for default in parameters
            .posonlyargs
            .iter()
            .chain(parameters.args.iter())
            .chain(parameters.kwonlyargs.iter())
            .filter_map(|arg| arg.default.as_deref())
        {
            self.scan_expression(default, ExpressionContext::Load)?;
        }

        self.enter_scope(name, typ, range);

        // Fill scope with parameter names:
        self.scan_parameters(&parameters.posonlyargs)?;
        self.scan_parameters(&parameters.args)?;
        self.scan_parameters(&parameters.kwonlyargs)?;
        if let Some(name) = &parameters.vararg {
            self.scan_parameter(name)?;
        }
        if let Some(name) = &parameters.kwarg {
            self.scan_parameter(name)?;
        }
        Ok(())
    }

    fn register_ident(&mut self, ident: &ast::Identifier, role: SymbolUsage) -> SymbolTableResult {
        self.register_name(ident.as_str(), role, ident.range)
    }

    fn register_name(
        &mut self,
        name: &str,
        role: SymbolUsage,
        range: TextRange,
    ) -> SymbolTableResult {
        let name = mangle_name(self.class_name.as_deref(), name);
        let table = &mut self.tree[self.current];

        // Some checks for the symbol that present on this scope level:
        if let Some(symbol) = table.symbols.get(name.as_ref()) {
            let flags = symbol.flags;
            let declaration_error = |declaration| {
                if flags.contains(SymbolFlags::PARAMETER) {
                    Some(CodegenErrorType::ParameterDeclared {
                        name: name.to_string(),
                        declaration,
                    })
                } else if flags.contains(SymbolFlags::REFERENCED) {
                    Some(CodegenErrorType::UsedBeforeDeclaration {
                        name: name.to_string(),
                        declaration,
                    })
                } else if flags.contains(SymbolFlags::ANNOTATED) {
                    Some(CodegenErrorType::AnnotatedDeclared {
                        name: name.to_string(),
                        declaration,
                    })
                } else if flags.contains(SymbolFlags::ASSIGNED) {
                    Some(CodegenErrorType::AssignedBeforeDeclaration {
                        name: name.to_string(),
                        declaration,
                    })
                } else {
                    None
                }
            };
            let error = match role {
                SymbolUsage::Global if flags.contains(SymbolFlags::NONLOCAL) => {
                    Some(CodegenErrorType::NonlocalAndGlobal(name.to_string()))
                }
                SymbolUsage::Global if !symbol.is_global() => {
                    declaration_error(Declaration::Global)
                }
                SymbolUsage::Nonlocal if flags.contains(SymbolFlags::GLOBAL) => {
                    Some(CodegenErrorType::NonlocalAndGlobal(name.to_string()))
                }
                SymbolUsage::Nonlocal if !flags.contains(SymbolFlags::NONLOCAL) => {
                    declaration_error(Declaration::Nonlocal)
                }
                SymbolUsage::Parameter if flags.contains(SymbolFlags::PARAMETER) => {
                    Some(CodegenErrorType::DuplicateParameter(name.to_string()))
                }
                _ => None,
            };
            if let Some(error) = error {
                return Err(SymbolTableError { error, range });
            }
        }

        // Insert symbol when required:
        let symbol = table
            .symbols
            .entry(name.to_string())
            .or_insert_with(|| Symbol::new(&name, range));

        // Set proper scope and flags on symbol:
        let flags = &mut symbol.flags;
        match role {
            SymbolUsage::Nonlocal => {
                symbol.scope = SymbolScope::Free;
                flags.insert(SymbolFlags::NONLOCAL);
            }
            SymbolUsage::Imported => {
                flags.insert(SymbolFlags::ASSIGNED | SymbolFlags::IMPORTED);
            }
            SymbolUsage::Parameter => {
                flags.insert(SymbolFlags::PARAMETER);
            }
            SymbolUsage::AnnotationAssigned => {
                flags.insert(SymbolFlags::ASSIGNED | SymbolFlags::ANNOTATED);
            }
            SymbolUsage::Assigned => {
                flags.insert(SymbolFlags::ASSIGNED);
            }
            SymbolUsage::Global => {
                symbol.scope = SymbolScope::GlobalExplicit;
                flags.insert(SymbolFlags::GLOBAL);
            }
            SymbolUsage::Used => {
                flags.insert(SymbolFlags::REFERENCED);
            }
            SymbolUsage::Iter => {
                flags.insert(SymbolFlags::ITER);
            }
        }

        Ok(())
    }
}

/// Private-name mangling: `__spam` inside `class Ham` becomes `_Ham__spam`.
pub fn mangle_name<'a>(class_name: Option<&str>, name: &'a str) -> Cow<'a, str> {
    let class_name = match class_name {
        Some(n) => n,
        None => return name.into(),
    };
    if !name.starts_with("__") || name.ends_with("__") || name.contains('.') {
        return name.into();
    }
    let class_name = class_name.trim_start_matches('_');
    if class_name.is_empty() {
        return name.into();
    }
    let mut ret = String::with_capacity(1 + class_name.len() + name.len());
    ret.push('_');
    ret.push_str(class_name);
    ret.push_str(name);
    ret.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_compiler_core::SourceFileBuilder;

    fn scan(source: &str) -> SymbolTableResult<ScopeTree> {
        let program = ruff_python_parser::parse_module(source)
            .unwrap()
            .into_syntax();
        let source_file = SourceFileBuilder::new("<test>", source).finish();
        ScopeTree::scan_program(&program, source_file)
    }

    fn scope<'a>(tree: &'a ScopeTree, path: &[&str]) -> &'a SymbolTable {
        let mut id = ScopeId::ROOT;
        for name in path {
            id = *tree[id]
                .children
                .iter()
                .find(|&&child| tree[child].name == *name)
                .unwrap_or_else(|| panic!("no scope {name}"));
        }
        &tree[id]
    }

    fn scope_of(tree: &ScopeTree, path: &[&str], name: &str) -> SymbolScope {
        scope(tree, path).lookup(name).unwrap().scope
    }

    fn error_message(source: &str) -> String {
        scan(source).unwrap_err().error.to_string()
    }

    #[test]
    fn captured_names_are_cells_and_free_along_the_path() {
        let tree = scan(
            "\
def outer():
    x = 1
    def mid():
        def inner():
            return x
        return inner
    return mid
",
        )
        .unwrap();
        assert_eq!(scope_of(&tree, &["outer"], "x"), SymbolScope::Cell);
        assert_eq!(scope_of(&tree, &["outer", "mid"], "x"), SymbolScope::Free);
        assert_eq!(
            scope_of(&tree, &["outer", "mid", "inner"], "x"),
            SymbolScope::Free
        );
        assert_eq!(scope(&tree, &["outer"]).cellvars, ["x"]);
        assert_eq!(scope(&tree, &["outer", "mid"]).freevars, ["x"]);
        assert_eq!(scope(&tree, &["outer"]).varnames, ["mid"]);
    }

    #[test]
    fn unbound_names_are_implicit_globals() {
        let tree = scan("def f():\n    return len(y)\n").unwrap();
        assert_eq!(scope_of(&tree, &["f"], "len"), SymbolScope::GlobalImplicit);
        assert_eq!(scope_of(&tree, &["f"], "y"), SymbolScope::GlobalImplicit);
        assert!(scope(&tree, &["f"]).freevars.is_empty());
    }

    #[test]
    fn class_scopes_are_skipped_by_methods() {
        let tree = scan(
            "\
def f():
    x = 1
    class A:
        x = 2
        def m(self):
            return x
    return A
",
        )
        .unwrap();
        assert_eq!(scope_of(&tree, &["f"], "x"), SymbolScope::Cell);
        let class = scope(&tree, &["f", "A"]);
        let x = class.lookup("x").unwrap();
        assert_eq!(x.scope, SymbolScope::Local);
        assert!(x.flags.contains(SymbolFlags::FREE_CLASS));
        assert_eq!(class.freevars, ["x"]);
        assert_eq!(scope_of(&tree, &["f", "A", "m"], "x"), SymbolScope::Free);
    }

    #[test]
    fn slots_are_deterministic() {
        let source = "\
def f(a, /, b, *args, c, **kw):
    d = 1
    e = a
    def g():
        return e + b
    return g
";
        let first = scan(source).unwrap();
        let second = scan(source).unwrap();
        let f = scope(&first, &["f"]);
        assert_eq!(f.varnames, ["a", "b", "c", "args", "kw", "d", "g"]);
        assert_eq!(f.cellvars, ["b", "e"]);
        for ((_, a), (_, b)) in first.iter().zip(second.iter()) {
            assert_eq!(a.varnames, b.varnames);
            assert_eq!(a.cellvars, b.cellvars);
            assert_eq!(a.freevars, b.freevars);
            assert_eq!(
                a.iter_slots().collect::<Vec<_>>(),
                b.iter_slots().collect::<Vec<_>>()
            );
        }
        let g = scope(&first, &["f", "g"]);
        assert_eq!(
            g.iter_slots().collect::<Vec<_>>(),
            [(Slot::Free(0), "e"), (Slot::Free(1), "b")]
        );
    }

    #[test]
    fn class_cell_only_for_methods_that_need_it() {
        let tree = scan(
            "\
class A:
    def f(self):
        return super().f()
    def g(self):
        return 1
",
        )
        .unwrap();
        let class = scope(&tree, &["A"]);
        assert!(class.needs_class_closure);
        assert_eq!(class.cellvars, ["__class__"]);
        assert_eq!(scope(&tree, &["A", "f"]).freevars, ["__class__"]);
        assert!(scope(&tree, &["A", "g"]).freevars.is_empty());
    }

    #[test]
    fn comprehension_scopes() {
        let tree = scan("def f(xs):\n    return [x + y for x in xs]\n").unwrap();
        let comp = scope(&tree, &["f", "<listcomp>"]);
        assert_eq!(comp.typ, CompilerScope::Comprehension(ComprehensionType::List));
        assert_eq!(comp.varnames, [".0", "x"]);
        assert!(comp.is_generator);
        assert_eq!(comp.lookup("y").unwrap().scope, SymbolScope::GlobalImplicit);
        // the outermost iterable is read by the enclosing function
        assert!(comp.lookup("xs").is_none());
        assert_eq!(scope_of(&tree, &["f"], "xs"), SymbolScope::Local);
    }

    #[test]
    fn walrus_in_comprehension_binds_in_function() {
        let tree = scan("def f(xs):\n    [last := x for x in xs]\n    return last\n").unwrap();
        assert_eq!(scope_of(&tree, &["f"], "last"), SymbolScope::Cell);
        assert_eq!(
            scope_of(&tree, &["f", "<listcomp>"], "last"),
            SymbolScope::Free
        );
        assert_eq!(
            error_message("def f(xs):\n    [x := 1 for x in xs]\n"),
            "assignment expression cannot rebind comprehension iteration variable 'x'"
        );
    }

    #[test]
    fn global_declarations() {
        let tree = scan("x = 1\ndef f():\n    global x\n    x = 2\n").unwrap();
        assert_eq!(scope_of(&tree, &["f"], "x"), SymbolScope::GlobalExplicit);
        assert_eq!(scope_of(&tree, &[], "x"), SymbolScope::GlobalExplicit);
        assert_eq!(
            error_message("def f():\n    print(x)\n    global x\n"),
            "name 'x' is used prior to global declaration"
        );
        assert_eq!(
            error_message("def f():\n    x = 1\n    nonlocal x\n"),
            "name 'x' is assigned to before nonlocal declaration"
        );
        assert_eq!(
            error_message("def f(x):\n    global x\n"),
            "name 'x' is parameter and global"
        );
        assert_eq!(
            error_message("def f():\n    y = 1\n    def g():\n        global y\n        nonlocal y\n"),
            "name 'y' is nonlocal and global"
        );
    }

    #[test]
    fn nonlocal_resolution() {
        let tree = scan(
            "\
def counter():
    n = 0
    def bump():
        nonlocal n
        n += 1
        return n
    return bump
",
        )
        .unwrap();
        assert_eq!(scope_of(&tree, &["counter"], "n"), SymbolScope::Cell);
        assert_eq!(
            scope_of(&tree, &["counter", "bump"], "n"),
            SymbolScope::Free
        );
        assert_eq!(
            error_message("def f():\n    nonlocal y\n"),
            "no binding for nonlocal 'y' found"
        );
        assert_eq!(
            error_message("nonlocal z\n"),
            "nonlocal declaration not allowed at module level: 'z'"
        );
    }

    #[test]
    fn yield_placement() {
        let tree = scan("def g():\n    yield 1\ndef h():\n    return 1\n").unwrap();
        assert!(scope(&tree, &["g"]).is_generator);
        assert!(!scope(&tree, &["h"]).is_generator);
        assert_eq!(
            error_message("def f(xs):\n    return [(yield x) for x in xs]\n"),
            "'yield' inside list comprehension"
        );
        assert_eq!(error_message("yield 1\n"), "'yield' outside function");
    }

    #[test]
    fn private_names_are_mangled() {
        assert_eq!(mangle_name(Some("_Ham"), "__spam"), "_Ham__spam");
        assert_eq!(mangle_name(Some("Ham"), "__init__"), "__init__");
        assert_eq!(mangle_name(None, "__spam"), "__spam");
        let tree = scan("class Ham:\n    __spam = 1\n").unwrap();
        assert!(scope(&tree, &["Ham"]).lookup("_Ham__spam").is_some());
    }

    #[test]
    fn scope_dump() {
        let tree = scan("def f(a):\n    return a + b\n").unwrap();
        insta::assert_snapshot!(tree.to_string(), @r"
        module <module>
          f: local [assigned]
          function f
            varnames: a
            a: local [parameter]
            b: global implicit [referenced]
        ");
    }
}
