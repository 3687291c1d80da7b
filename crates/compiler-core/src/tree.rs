//! The executable tree produced by the compiler.
//!
//! A [`CodeObject`] owns the body of one module, class or function as a tree of
//! [`Stmt`] and [`Expr`] nodes. Every name access has already been resolved to
//! a [`NameRef`], so the executor never consults a symbol table.

mod display;
pub mod visitor;

use crate::OneIndexed;
use alloc::sync::Arc;
use bitflags::bitflags;
use core::{hash, mem};
use malachite_bigint::BigInt;
use num_complex::Complex64;

pub use visitor::Visitor;

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct CodeFlags: u16 {
        const NEWLOCALS = 0x0002;
        const VARARGS = 0x0004;
        const VARKEYWORDS = 0x0008;
        const GENERATOR = 0x0020;
        const IS_CLASS_BODY = 0x0100;
        const HAS_DOCSTRING = 0x0200;
    }
}

/// Primary container of a single code unit: module, class body, function,
/// lambda or comprehension.
#[derive(Clone, Debug)]
pub struct CodeObject {
    pub body: Stmt,
    pub flags: CodeFlags,
    /// Number of positional-only arguments
    pub posonlyarg_count: u32,
    /// Number of positional arguments, positional-only ones included
    pub arg_count: u32,
    pub kwonlyarg_count: u32,
    pub source_path: String,
    pub first_line_number: Option<OneIndexed>,
    /// Name of the object that created this code object
    pub obj_name: String,
    /// Qualified name of the object (like CPython's co_qualname)
    pub qualname: String,
    pub doc: Option<String>,
    /// Fast local slots: parameters first (positional, keyword-only, `*args`,
    /// `**kwargs`), then the other locals, then compiler temporaries.
    pub varnames: Box<[String]>,
    pub cellvars: Box<[String]>,
    pub freevars: Box<[String]>,
    /// For each cell, the index of the parameter it is initialized from.
    pub cell2arg: Option<Box<[i32]>>,
    pub generator: Option<GeneratorDescriptor>,
}

impl CodeObject {
    pub fn is_generator(&self) -> bool {
        self.flags.contains(CodeFlags::GENERATOR)
    }

    /// Total number of parameter slots, `*args` and `**kwargs` included.
    pub fn total_arg_count(&self) -> usize {
        let mut count = (self.arg_count + self.kwonlyarg_count) as usize;
        if self.flags.contains(CodeFlags::VARARGS) {
            count += 1;
        }
        if self.flags.contains(CodeFlags::VARKEYWORDS) {
            count += 1;
        }
        count
    }

    /// Name of a deref slot; cells come first, then free variables.
    pub fn deref_name(&self, index: u32) -> &str {
        let index = index as usize;
        match self.cellvars.get(index) {
            Some(name) => name,
            None => &self.freevars[index - self.cellvars.len()],
        }
    }
}

/// Shape of the persistent storage a generator instance needs.
///
/// Shared by every call of the same generator function; instances only
/// allocate storage of this shape.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GeneratorDescriptor {
    pub yields: Vec<YieldPoint>,
    pub flag_slots: u32,
    pub position_slots: u32,
    pub iterator_slots: u32,
    pub exception_slots: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct YieldPoint {
    pub index: u32,
    pub kind: YieldKind,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum YieldKind {
    Yield,
    YieldFrom,
}

/// Where a name lives at runtime.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NameRef {
    /// A slot of the frame's fast locals.
    Fast(u32),
    /// A fast local kept in the storage of a generator instance.
    Persistent(u32),
    /// A cell (`index < cellvars.len()`) or a free variable.
    Deref(u32),
    Global(String),
    /// Looked up in the local namespace, then globals, then builtins.
    Name(String),
    /// Class body read of a free variable: the namespace wins over the cell.
    DictOrDeref { name: String, index: u32 },
}

impl NameRef {
    pub fn is_fast(&self) -> bool {
        matches!(self, Self::Fast(_) | Self::Persistent(_))
    }
}

/// A constant value embedded in the tree.
#[derive(Debug, Clone)]
pub enum ConstantData {
    Tuple { elements: Vec<ConstantData> },
    Integer { value: BigInt },
    Float { value: f64 },
    Complex { value: Complex64 },
    Boolean { value: bool },
    Str { value: String },
    Bytes { value: Vec<u8> },
    None,
    Ellipsis,
}

impl PartialEq for ConstantData {
    fn eq(&self, other: &Self) -> bool {
        use ConstantData::*;

        match (self, other) {
            (Integer { value: a }, Integer { value: b }) => a == b,
            // we want to compare floats *by actual value*
            (Float { value: a }, Float { value: b }) => a.to_bits() == b.to_bits(),
            (Complex { value: a }, Complex { value: b }) => {
                a.re.to_bits() == b.re.to_bits() && a.im.to_bits() == b.im.to_bits()
            }
            (Boolean { value: a }, Boolean { value: b }) => a == b,
            (Str { value: a }, Str { value: b }) => a == b,
            (Bytes { value: a }, Bytes { value: b }) => a == b,
            (Tuple { elements: a }, Tuple { elements: b }) => a == b,
            (None, None) => true,
            (Ellipsis, Ellipsis) => true,
            _ => false,
        }
    }
}

impl Eq for ConstantData {}

impl hash::Hash for ConstantData {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        use ConstantData::*;

        mem::discriminant(self).hash(state);
        match self {
            Integer { value } => value.hash(state),
            Float { value } => value.to_bits().hash(state),
            Complex { value } => {
                value.re.to_bits().hash(state);
                value.im.to_bits().hash(state);
            }
            Boolean { value } => value.hash(state),
            Str { value } => value.hash(state),
            Bytes { value } => value.hash(state),
            Tuple { elements } => elements.hash(state),
            None => {}
            Ellipsis => {}
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    MatrixMultiply,
    Divide,
    FloorDivide,
    Remainder,
    Power,
    Lshift,
    Rshift,
    And,
    Or,
    Xor,
}

impl BinaryOperator {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::MatrixMultiply => "@",
            Self::Divide => "/",
            Self::FloorDivide => "//",
            Self::Remainder => "%",
            Self::Power => "**",
            Self::Lshift => "<<",
            Self::Rshift => ">>",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Invert,
    Minus,
    Plus,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BoolOperator {
    And,
    Or,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ComparisonOperator {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    In,
    NotIn,
    Is,
    IsNot,
}

impl ComparisonOperator {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::Is => "is",
            Self::IsNot => "is not",
        }
    }
}

/// Target collection of a comprehension.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CollectionKind {
    List,
    Set,
    Dict,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Conversion {
    None,
    Str,
    Repr,
    Ascii,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Keyword {
    /// `None` for a `**mapping` argument.
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DictEntry {
    /// `None` for a `**mapping` entry.
    pub key: Option<Expr>,
    pub value: Expr,
}

#[derive(Clone, Debug)]
pub struct MakeFunction {
    pub code: Arc<CodeObject>,
    pub defaults: Vec<Expr>,
    pub kw_defaults: Vec<(String, Expr)>,
    /// One entry per free variable of `code`, read in the defining scope.
    pub closure: Vec<NameRef>,
}

#[derive(Clone, Debug)]
pub struct MakeClass {
    pub code: Arc<CodeObject>,
    pub name: String,
    pub bases: Vec<Expr>,
    pub keywords: Vec<Keyword>,
    pub closure: Vec<NameRef>,
}

impl PartialEq for MakeFunction {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.code, &other.code)
            && self.defaults == other.defaults
            && self.kw_defaults == other.kw_defaults
            && self.closure == other.closure
    }
}

impl PartialEq for MakeClass {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.code, &other.code)
            && self.name == other.name
            && self.bases == other.bases
            && self.keywords == other.keywords
            && self.closure == other.closure
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Constant(ConstantData),
    Load(NameRef),
    /// Elements may be [`Expr::Starred`].
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Set(Vec<Expr>),
    Dict(Vec<DictEntry>),
    Starred(Box<Expr>),
    BinOp {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
        inplace: bool,
    },
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expr>,
    },
    /// Short-circuiting; evaluates to the deciding operand.
    BoolOp {
        op: BoolOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        op: ComparisonOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    /// Stores `value` into `target` and evaluates to it.
    NamedExpr {
        target: NameRef,
        value: Box<Expr>,
    },
    MakeFunction(Box<MakeFunction>),
    MakeClass(Box<MakeClass>),
    /// `index` is assigned when the enclosing body is made resumable.
    Yield {
        value: Option<Box<Expr>>,
        index: Option<u32>,
    },
    YieldFrom {
        value: Box<Expr>,
        index: Option<u32>,
        iterator: Option<u32>,
    },
    GetIter(Box<Expr>),
    /// Drives an iterator to exhaustion into a new collection.
    Collect {
        kind: CollectionKind,
        iterable: Box<Expr>,
    },
    JoinedStr(Vec<Expr>),
    FormatValue {
        value: Box<Expr>,
        conversion: Conversion,
        spec: Option<Box<Expr>>,
    },
    Import {
        name: String,
        fromlist: Vec<String>,
        level: u32,
    },
    /// `from module import name`, reading `name` off an imported module.
    ImportFrom {
        module: Box<Expr>,
        name: String,
    },
    /// A statement evaluated for its effect; the value is `None`.
    StmtExpr(Box<Stmt>),
    /// Runs `effects` once, tracked by a position slot, then evaluates `value`.
    SideEffects {
        effects: Vec<Stmt>,
        value: Box<Expr>,
        position: u32,
    },
}

impl Expr {
    pub fn none() -> Self {
        Self::Constant(ConstantData::None)
    }

    /// Whether evaluating this expression can have no observable effect.
    ///
    /// Only constants and plain name reads qualify; anything else may call
    /// into user code.
    pub fn is_side_effect_free(&self) -> bool {
        matches!(self, Self::Constant(_) | Self::Load(_))
    }

    pub fn contains_yield(&self) -> bool {
        struct Finder(bool);
        impl Visitor<'_> for Finder {
            fn visit_expr(&mut self, expr: &Expr) {
                if matches!(expr, Expr::Yield { .. } | Expr::YieldFrom { .. }) {
                    self.0 = true;
                } else if !self.0 {
                    visitor::walk_expr(self, expr);
                }
            }
        }
        let mut finder = Finder(false);
        finder.visit_expr(self);
        finder.0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Target {
    Name(NameRef),
    Attribute {
        value: Expr,
        attr: String,
    },
    Subscript {
        value: Expr,
        index: Expr,
    },
    /// Destructuring; `star_index` marks the element collecting the rest.
    Unpack {
        targets: Vec<Target>,
        star_index: Option<usize>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExceptHandler {
    /// `None` for a bare `except:`.
    pub typ: Option<Expr>,
    pub name: Option<NameRef>,
    pub body: Stmt,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    /// Interactive echo of an expression statement.
    PrintExpr(Expr),
    Assign {
        target: Target,
        value: Expr,
    },
    Delete(Target),
    Block(Vec<Stmt>),
    If {
        test: Expr,
        body: Box<Stmt>,
        orelse: Box<Stmt>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    For {
        target: Target,
        iter: Expr,
        body: Box<Stmt>,
    },
    /// Catches `continue` raised in its body.
    ContinueTarget(Box<Stmt>),
    /// Catches `break` raised in `body`; `orelse` runs only when `body`
    /// completes normally.
    BreakTarget {
        body: Box<Stmt>,
        orelse: Box<Stmt>,
    },
    Try {
        body: Box<Stmt>,
        handlers: Vec<ExceptHandler>,
        orelse: Box<Stmt>,
        finalbody: Option<Box<Stmt>>,
    },
    With {
        context: Expr,
        target: Option<Target>,
        body: Box<Stmt>,
    },
    Raise {
        exc: Option<Expr>,
        cause: Option<Expr>,
    },
    Return(Option<Expr>),
    Break,
    Continue,
    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
    Pass,

    // Resumable variants, produced only inside generator bodies.
    GeneratorBlock {
        body: Vec<Stmt>,
        position: u32,
    },
    GeneratorIf {
        test: Expr,
        body: Box<Stmt>,
        orelse: Box<Stmt>,
        then_flag: u32,
        else_flag: u32,
    },
    GeneratorWhile {
        test: Expr,
        body: Box<Stmt>,
        flag: u32,
    },
    GeneratorFor {
        target: Target,
        iter: Expr,
        body: Box<Stmt>,
        flag: u32,
        iterator: u32,
    },
    /// `position`: 0 not entered, 1 in body, `2 + i` in handler `i`,
    /// `2 + handlers.len()` in `orelse`.
    GeneratorTryExcept {
        body: Box<Stmt>,
        handlers: Vec<ExceptHandler>,
        orelse: Box<Stmt>,
        position: u32,
        exception: u32,
    },
    GeneratorTryFinally {
        body: Box<Stmt>,
        finalbody: Box<Stmt>,
        flag: u32,
        pending: u32,
    },
    GeneratorWith {
        context: Expr,
        target: Option<Target>,
        body: Box<Stmt>,
        flag: u32,
        manager: u32,
    },
}

impl Stmt {
    pub fn empty() -> Self {
        Self::Block(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Block(body) | Self::GeneratorBlock { body, .. } => {
                body.iter().all(Self::is_empty)
            }
            Self::Pass => true,
            _ => false,
        }
    }

    /// Whether this statement is one of the resumable generator variants.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            Self::GeneratorBlock { .. }
                | Self::GeneratorIf { .. }
                | Self::GeneratorWhile { .. }
                | Self::GeneratorFor { .. }
                | Self::GeneratorTryExcept { .. }
                | Self::GeneratorTryFinally { .. }
                | Self::GeneratorWith { .. }
        )
    }

    pub fn contains_yield(&self) -> bool {
        struct Finder(bool);
        impl Visitor<'_> for Finder {
            fn visit_expr(&mut self, expr: &Expr) {
                if self.0 {
                    return;
                }
                if expr.contains_yield() {
                    self.0 = true;
                }
            }
        }
        let mut finder = Finder(false);
        finder.visit_stmt(self);
        finder.0
    }
}

impl From<Vec<Stmt>> for Stmt {
    fn from(mut body: Vec<Stmt>) -> Self {
        if body.len() == 1 {
            body.pop().unwrap_or(Self::Pass)
        } else {
            Self::Block(body)
        }
    }
}

impl From<Expr> for Stmt {
    fn from(expr: Expr) -> Self {
        match expr {
            Expr::StmtExpr(stmt) => *stmt,
            expr => Self::Expr(expr),
        }
    }
}

impl From<Stmt> for Expr {
    fn from(stmt: Stmt) -> Self {
        Self::StmtExpr(Box::new(stmt))
    }
}
