//! Generator instances and the protocol that drives them.
//!
//! A generator does not keep a suspended stack. Every resumption runs the
//! resumable body from the top; the statements skip what already ran by
//! consulting the slots in [`GeneratorStorage`], and the `yield` that
//! suspended last evaluates to the value sent in.

use crate::{
    PyResult, Unwind, VirtualMachine,
    frame::Frame,
    function::PyFunction,
    value::{CellRef, DictRef, Value},
};
use alloc::sync::Arc;
use arbor_compiler_core::tree::CodeObject;
use core::{
    cell::{Cell, RefCell},
    fmt, mem,
};

/// What a resumed `yield` evaluates to.
#[derive(Debug)]
pub enum Resume {
    Send(Value),
    /// Raised at the `yield` instead of producing a value.
    Throw(Value),
}

/// Outcome of advancing an iterator one step.
#[derive(Debug)]
pub enum IterReturn {
    Yield(Value),
    /// The iterator is exhausted; a generator's `return` value.
    Return(Value),
}

/// Per-instance state of a resumable body.
#[derive(Debug, Default)]
pub struct GeneratorStorage {
    /// Locals of the body, parameters first.
    pub locals: Vec<Option<Value>>,
    pub flags: Vec<bool>,
    pub positions: Vec<u32>,
    /// Live iterators of loops, delegates of `yield from` and context
    /// managers.
    pub iterators: Vec<Option<Value>>,
    /// Exceptions being handled and unwinds held across a `finally`.
    pub exceptions: Vec<Option<Unwind>>,
    pub(crate) resume: Option<(u32, Resume)>,
    pub(crate) suspended_at: Option<u32>,
}

impl GeneratorStorage {
    pub fn new(code: &CodeObject) -> Self {
        let descriptor = code.generator.clone().unwrap_or_default();
        Self {
            locals: vec![None; code.varnames.len()],
            flags: vec![false; descriptor.flag_slots as usize],
            positions: vec![0; descriptor.position_slots as usize],
            iterators: vec![None; descriptor.iterator_slots as usize],
            exceptions: (0..descriptor.exception_slots).map(|_| None).collect(),
            resume: None,
            suspended_at: None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum GeneratorState {
    Created,
    /// Suspended at the yield with this index.
    Suspended(u32),
    Finished,
}

pub struct PyGenerator {
    pub name: String,
    pub qualname: String,
    code: Arc<CodeObject>,
    globals: DictRef,
    cells: Vec<CellRef>,
    storage: RefCell<GeneratorStorage>,
    state: Cell<GeneratorState>,
    running: Cell<bool>,
}

impl fmt::Debug for PyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PyGenerator")
            .field("qualname", &self.qualname)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl PyGenerator {
    pub(crate) fn new(function: &PyFunction, storage: GeneratorStorage, cells: Vec<CellRef>) -> Self {
        Self {
            name: function.name.clone(),
            qualname: function.qualname.clone(),
            code: function.code.clone(),
            globals: function.globals.clone(),
            cells,
            storage: RefCell::new(storage),
            state: Cell::new(GeneratorState::Created),
            running: Cell::new(false),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state.get() == GeneratorState::Finished
    }

    fn check_not_running(&self, vm: &VirtualMachine) -> PyResult<()> {
        if self.running.get() {
            return Err(vm.new_value_error("generator already executing"));
        }
        Ok(())
    }

    pub fn send(&self, vm: &VirtualMachine, value: Value) -> PyResult<IterReturn> {
        self.check_not_running(vm)?;
        match self.state.get() {
            GeneratorState::Finished => Ok(IterReturn::Return(Value::None)),
            GeneratorState::Created if !value.is_none() => Err(vm.new_type_error(
                "can't send non-None value to a just-started generator",
            )),
            GeneratorState::Created => self.resume(vm, None),
            GeneratorState::Suspended(_) => self.resume(vm, Some(Resume::Send(value))),
        }
    }

    /// Raises `exc` at the point of suspension.
    pub fn throw(&self, vm: &VirtualMachine, exc: Value) -> PyResult<IterReturn> {
        self.check_not_running(vm)?;
        let exc = vm.normalize_exception(exc)?;
        match self.state.get() {
            GeneratorState::Suspended(_) => self.resume(vm, Some(Resume::Throw(exc))),
            GeneratorState::Created | GeneratorState::Finished => {
                self.state.set(GeneratorState::Finished);
                Err(Unwind::Exception(exc))
            }
        }
    }

    pub fn close(&self, vm: &VirtualMachine) -> PyResult<()> {
        self.check_not_running(vm)?;
        if !matches!(self.state.get(), GeneratorState::Suspended(_)) {
            self.state.set(GeneratorState::Finished);
            return Ok(());
        }
        let exit = vm.new_exception(vm.exceptions.generator_exit.clone(), Vec::new());
        match self.resume(vm, Some(Resume::Throw(exit))) {
            Ok(IterReturn::Yield(_)) => Err(vm.new_runtime_error("generator ignored GeneratorExit")),
            Ok(IterReturn::Return(_)) => Ok(()),
            Err(Unwind::Exception(exc))
                if vm.is_instance(&exc, &vm.exceptions.generator_exit)
                    || vm.is_instance(&exc, &vm.exceptions.stop_iteration) =>
            {
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    fn resume(&self, vm: &VirtualMachine, resume: Option<Resume>) -> PyResult<IterReturn> {
        self.running.set(true);
        let result = self.run(vm, resume);
        self.running.set(false);
        result
    }

    fn run(&self, vm: &VirtualMachine, resume: Option<Resume>) -> PyResult<IterReturn> {
        let mut storage = mem::take(&mut *self.storage.borrow_mut());
        if let (Some(resume), GeneratorState::Suspended(index)) = (resume, self.state.get()) {
            storage.resume = Some((index, resume));
        }
        storage.suspended_at = None;

        let result = vm.with_recursion(|| {
            let mut frame = Frame::new(
                &self.code,
                Vec::new(),
                self.cells.clone(),
                None,
                self.globals.clone(),
            )
            .with_generator(&mut storage);
            frame.exec(vm, &self.code.body)
        });

        let value = match result {
            Err(Unwind::Suspend(value)) => {
                let Some(index) = storage.suspended_at.take() else {
                    self.state.set(GeneratorState::Finished);
                    return Err(vm.new_system_error("generator suspended outside of a yield"));
                };
                trace!("{} suspended at yield {index}", self.qualname);
                storage.resume = None;
                *self.storage.borrow_mut() = storage;
                self.state.set(GeneratorState::Suspended(index));
                return Ok(IterReturn::Yield(value));
            }
            Ok(()) => Value::None,
            Err(Unwind::Return(value)) => value,
            Err(Unwind::Exception(exc)) => {
                self.state.set(GeneratorState::Finished);
                if vm.is_instance(&exc, &vm.exceptions.stop_iteration) {
                    let error = vm.new_exception(
                        vm.exceptions.runtime_error.clone(),
                        vec![Value::from("generator raised StopIteration")],
                    );
                    vm.set_cause(&error, exc);
                    return Err(Unwind::Exception(error));
                }
                return Err(Unwind::Exception(exc));
            }
            Err(Unwind::Break | Unwind::Continue) => {
                self.state.set(GeneratorState::Finished);
                return Err(vm.new_system_error("loop control escaped a generator body"));
            }
        };
        debug!("{} finished", self.qualname);
        self.state.set(GeneratorState::Finished);
        Ok(IterReturn::Return(value))
    }
}

impl VirtualMachine {
    /// Sends `value` into the delegate of a `yield from`.
    pub(crate) fn delegate_send(&self, delegate: &Value, value: Value) -> PyResult<IterReturn> {
        let result = match delegate {
            Value::Generator(generator) => return generator.send(self, value),
            Value::Iterator(_) if value.is_none() => {
                return Ok(match self.next(delegate)? {
                    Some(item) => IterReturn::Yield(item),
                    None => IterReturn::Return(Value::None),
                });
            }
            _ if value.is_none() => match self.get_special_method(delegate, "__next__")? {
                Some(next) => self.call(&next, Vec::new()),
                None => {
                    return Err(self.new_type_error(format!(
                        "'{}' object is not an iterator",
                        self.class_of(delegate).name
                    )));
                }
            },
            _ => self.call_method(delegate, "send", vec![value]),
        };
        self.stop_iteration_to_return(result)
    }

    /// Throws `exc` into the delegate of a `yield from`.
    pub(crate) fn delegate_throw(&self, delegate: &Value, exc: Value) -> PyResult<IterReturn> {
        if self.is_instance(&exc, &self.exceptions.generator_exit) {
            match delegate {
                Value::Generator(generator) => generator.close(self)?,
                _ => {
                    if let Some(close) = self.get_attribute_opt(delegate, "close")? {
                        self.call(&close, Vec::new())?;
                    }
                }
            }
            return Err(Unwind::Exception(exc));
        }
        match delegate {
            Value::Generator(generator) => generator.throw(self, exc),
            _ => match self.get_attribute_opt(delegate, "throw")? {
                Some(throw) => {
                    let result = self.call(&throw, vec![exc]);
                    self.stop_iteration_to_return(result)
                }
                None => Err(Unwind::Exception(exc)),
            },
        }
    }

    fn stop_iteration_to_return(&self, result: PyResult) -> PyResult<IterReturn> {
        match result {
            Ok(value) => Ok(IterReturn::Yield(value)),
            Err(Unwind::Exception(exc)) if self.is_instance(&exc, &self.exceptions.stop_iteration) => {
                let value = self.get_attribute_opt(&exc, "value")?.unwrap_or(Value::None);
                Ok(IterReturn::Return(value))
            }
            Err(error) => Err(error),
        }
    }
}
