//! Runtime values.

use crate::{
    class::{PyClass, PyInstance},
    dict::{PyDict, PySet},
    function::{PyBoundMethod, PyBuiltinFunction, PyFunction},
    generator::PyGenerator,
};
use alloc::rc::Rc;
use arbor_compiler_core::tree::ConstantData;
use core::{
    cell::RefCell,
    fmt::{self, Debug},
};
use malachite_bigint::BigInt;
use num_complex::Complex64;

pub type CellRef = Rc<RefCell<Option<Value>>>;
pub type DictRef = Rc<RefCell<PyDict>>;
pub type ListRef = Rc<RefCell<Vec<Value>>>;
pub type SetRef = Rc<RefCell<PySet>>;

#[derive(Clone)]
pub enum Value {
    None,
    Ellipsis,
    NotImplemented,
    Bool(bool),
    Int(BigInt),
    Float(f64),
    Complex(Complex64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    Tuple(Rc<[Value]>),
    List(ListRef),
    Dict(DictRef),
    Set(SetRef),
    Range(Rc<PyRange>),
    Slice(Rc<PySlice>),
    Function(Rc<PyFunction>),
    BoundMethod(Rc<PyBoundMethod>),
    Builtin(Rc<PyBuiltinFunction>),
    Class(Rc<PyClass>),
    Instance(Rc<PyInstance>),
    Generator(Rc<PyGenerator>),
    Iterator(Rc<PyIterator>),
    Module(Rc<PyModule>),
    Super(Rc<PySuper>),
    Descriptor(Rc<PyDescriptor>),
}

impl Value {
    pub fn new_str(value: impl AsRef<str>) -> Self {
        Self::Str(Rc::from(value.as_ref()))
    }

    pub fn new_tuple(elements: Vec<Self>) -> Self {
        Self::Tuple(elements.into())
    }

    pub fn new_list(elements: Vec<Self>) -> Self {
        Self::List(Rc::new(RefCell::new(elements)))
    }

    pub fn new_dict(dict: PyDict) -> Self {
        Self::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn new_set(set: PySet) -> Self {
        Self::Set(Rc::new(RefCell::new(set)))
    }

    pub fn new_iterator(state: IterState) -> Self {
        Self::Iterator(Rc::new(PyIterator {
            state: RefCell::new(state),
        }))
    }

    pub fn from_constant(constant: &ConstantData) -> Self {
        match constant {
            ConstantData::Tuple { elements } => {
                Self::new_tuple(elements.iter().map(Self::from_constant).collect())
            }
            ConstantData::Integer { value } => Self::Int(value.clone()),
            ConstantData::Float { value } => Self::Float(*value),
            ConstantData::Complex { value } => Self::Complex(*value),
            ConstantData::Boolean { value } => Self::Bool(*value),
            ConstantData::Str { value } => Self::new_str(value),
            ConstantData::Bytes { value } => Self::Bytes(value.as_slice().into()),
            ConstantData::None => Self::None,
            ConstantData::Ellipsis => Self::Ellipsis,
        }
    }

    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Identity comparison, the `is` operator.
    ///
    /// Numbers and strings compare by value, as if every one of them were
    /// interned.
    pub fn is(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None)
            | (Self::Ellipsis, Self::Ellipsis)
            | (Self::NotImplemented, Self::NotImplemented) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Complex(a), Self::Complex(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Tuple(a), Self::Tuple(b)) => Rc::ptr_eq(a, b) || a.is_empty() && b.is_empty(),
            _ => match (self.address(), other.address()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Address of the shared allocation behind a reference value.
    pub fn address(&self) -> Option<usize> {
        fn addr<T: ?Sized>(rc: &Rc<T>) -> usize {
            Rc::as_ptr(rc).cast::<()>() as usize
        }
        Some(match self {
            Self::Tuple(v) => addr(v),
            Self::List(v) => addr(v),
            Self::Dict(v) => addr(v),
            Self::Set(v) => addr(v),
            Self::Range(v) => addr(v),
            Self::Slice(v) => addr(v),
            Self::Function(v) => addr(v),
            Self::BoundMethod(v) => addr(v),
            Self::Builtin(v) => addr(v),
            Self::Class(v) => addr(v),
            Self::Instance(v) => addr(v),
            Self::Generator(v) => addr(v),
            Self::Iterator(v) => addr(v),
            Self::Module(v) => addr(v),
            Self::Super(v) => addr(v),
            Self::Descriptor(v) => addr(v),
            _ => return None,
        })
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<BigInt> for Value {
    fn from(value: BigInt) -> Self {
        Self::Int(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(BigInt::from(value))
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Self::Int(BigInt::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::new_str(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(Rc::from(value))
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Ellipsis => f.write_str("Ellipsis"),
            Self::NotImplemented => f.write_str("NotImplemented"),
            Self::Bool(value) => write!(f, "Bool({value})"),
            Self::Int(value) => write!(f, "Int({value})"),
            Self::Float(value) => write!(f, "Float({value})"),
            Self::Complex(value) => write!(f, "Complex({value})"),
            Self::Str(value) => write!(f, "Str({value:?})"),
            Self::Bytes(value) => write!(f, "Bytes({value:?})"),
            Self::Tuple(elements) => f.debug_tuple("Tuple").field(elements).finish(),
            Self::List(elements) => f.debug_tuple("List").field(&elements.borrow()).finish(),
            Self::Function(function) => write!(f, "Function({})", function.qualname),
            Self::Class(class) => write!(f, "Class({})", class.name),
            Self::Instance(instance) => write!(f, "Instance({})", instance.class.name),
            Self::Module(module) => write!(f, "Module({})", module.name),
            _ => write!(f, "<{} at {:#x}>", self.kind_name(), self.address().unwrap_or(0)),
        }
    }
}

impl Value {
    /// Short name of the variant, for diagnostics that must not call back
    /// into the interpreter.
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Ellipsis => "ellipsis",
            Self::NotImplemented => "NotImplementedType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Complex(_) => "complex",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::Tuple(_) => "tuple",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
            Self::Set(_) => "set",
            Self::Range(_) => "range",
            Self::Slice(_) => "slice",
            Self::Function(_) => "function",
            Self::BoundMethod(_) => "method",
            Self::Builtin(_) => "builtin_function_or_method",
            Self::Class(_) => "type",
            Self::Instance(_) => "object",
            Self::Generator(_) => "generator",
            Self::Iterator(_) => "iterator",
            Self::Module(_) => "module",
            Self::Super(_) => "super",
            Self::Descriptor(_) => "descriptor",
        }
    }
}

#[derive(Debug)]
pub struct PyRange {
    pub start: BigInt,
    pub stop: BigInt,
    pub step: BigInt,
}

#[derive(Debug)]
pub struct PySlice {
    pub start: Value,
    pub stop: Value,
    pub step: Value,
}

#[derive(Debug)]
pub struct PyModule {
    pub name: String,
    pub globals: DictRef,
}

/// `super(class, obj)`: attribute lookup continues after `class` in the MRO
/// of `obj`'s type.
#[derive(Debug)]
pub struct PySuper {
    pub class: Rc<PyClass>,
    pub obj: Value,
}

#[derive(Debug)]
pub enum PyDescriptor {
    Property {
        getter: Value,
        setter: Option<Value>,
    },
    StaticMethod(Value),
    ClassMethod(Value),
}

#[derive(Debug)]
pub struct PyIterator {
    pub(crate) state: RefCell<IterState>,
}

/// Progress of a native iterator.
#[derive(Debug)]
pub enum IterState {
    /// A list, tuple, str or bytes walked by position; lists are read live.
    Sequence { sequence: Value, index: usize },
    /// A snapshot, used for dicts, sets and computed results.
    Items { items: Rc<[Value]>, index: usize },
    Range {
        next: BigInt,
        stop: BigInt,
        step: BigInt,
    },
    Enumerate { iterator: Value, count: BigInt },
    Zip(Vec<Value>),
    Exhausted,
}
