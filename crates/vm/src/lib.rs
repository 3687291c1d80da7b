//! A small tree-walking executor for arbor code objects.
//!
//! It exists so the output of the compiler can be run end to end: a resumed
//! generator replays its resumable body against the slots kept in its
//! [`GeneratorStorage`], exactly the way the lowering expects.

#![doc(html_root_url = "https://docs.rs/arbor-vm/")]

#[macro_use]
extern crate log;

extern crate alloc;

type IndexMap<K, V> = indexmap::IndexMap<K, V, ahash::RandomState>;

pub mod builtins;
pub mod class;
pub mod dict;
pub mod exceptions;
mod format;
mod frame;
pub mod function;
pub mod generator;
mod protocol;
pub mod value;
mod vm;

#[cfg(feature = "compiler")]
pub use arbor_compiler as compiler;
pub use arbor_compiler_core::tree;

pub use generator::{GeneratorStorage, IterReturn, PyGenerator};
pub use value::Value;
pub use vm::{Interpreter, RunError, Settings, VirtualMachine};

/// Non-local exits travelling up through statement execution.
#[derive(Debug)]
pub enum Unwind {
    /// A Python exception instance.
    Exception(Value),
    Return(Value),
    Break,
    Continue,
    /// A generator body suspended with the given value.
    Suspend(Value),
}

pub type PyResult<T = Value> = Result<T, Unwind>;
