//! The interpreter state and its entry points.

use crate::{
    IndexMap, PyResult, Unwind,
    builtins,
    class::{PyClass, PyInstance, TypeZoo},
    dict::PyDict,
    exceptions::ExceptionZoo,
    frame::Frame,
    function::{FuncArgs, PyFunction},
    generator::{GeneratorStorage, PyGenerator},
    value::{CellRef, DictRef, PyModule, Value},
};
use alloc::{rc::Rc, sync::Arc};
use arbor_compiler_core::tree::CodeObject;
use core::{
    cell::{Cell, RefCell},
    mem,
};
use std::io::Write;
use thiserror::Error;

/// Knobs of one interpreter.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Passed to the compiler: `1` strips asserts, `2` docstrings as well.
    pub optimize: u8,
    /// Collect `print` output instead of writing to stdout; see
    /// [`VirtualMachine::take_output`].
    pub capture_output: bool,
    /// Nesting depth of Python frames before `RecursionError`.
    pub recursion_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            optimize: 0,
            capture_output: false,
            recursion_limit: 200,
        }
    }
}

/// Failure of a whole program run.
#[derive(Debug, Error)]
pub enum RunError {
    #[cfg(feature = "compiler")]
    #[error(transparent)]
    Compile(#[from] arbor_compiler::CompileError),
    /// An exception nobody caught, rendered as the last line of a traceback.
    #[error("{message}")]
    Exception { message: String, exception: Value },
}

pub struct VirtualMachine {
    pub builtins: DictRef,
    pub types: TypeZoo,
    pub exceptions: ExceptionZoo,
    pub settings: Settings,
    modules: RefCell<IndexMap<String, Value>>,
    module_sources: RefCell<IndexMap<String, String>>,
    output: RefCell<String>,
    recursion_depth: Cell<usize>,
    /// Containers whose repr is being computed, to cut cycles.
    pub(crate) repr_guard: RefCell<Vec<usize>>,
}

/// Owns a [`VirtualMachine`] and hands it out to closures.
///
/// ```
/// use arbor_vm::{Interpreter, Settings};
/// let settings = Settings { capture_output: true, ..Settings::default() };
/// Interpreter::new(settings).enter(|vm| {
///     vm.run_source("print(6 * 7)", "<embedded>").unwrap();
///     assert_eq!(vm.take_output(), "42\n");
/// });
/// ```
pub struct Interpreter {
    vm: VirtualMachine,
}

impl Interpreter {
    pub fn new(settings: Settings) -> Self {
        Self {
            vm: VirtualMachine::new(settings),
        }
    }

    pub fn enter<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&VirtualMachine) -> R,
    {
        f(&self.vm)
    }
}

impl VirtualMachine {
    fn new(settings: Settings) -> Self {
        let types = TypeZoo::new();
        let exceptions = ExceptionZoo::new(&types.object);
        let vm = Self {
            builtins: Rc::new(RefCell::new(PyDict::default())),
            types,
            exceptions,
            settings,
            modules: RefCell::default(),
            module_sources: RefCell::default(),
            output: RefCell::default(),
            recursion_depth: Cell::new(0),
            repr_guard: RefCell::default(),
        };
        builtins::init(&vm);
        vm
    }

    /// Globals of a fresh module.
    pub fn new_scope(&self, name: &str) -> DictRef {
        let mut globals = PyDict::default();
        globals.set_str("__name__", Value::from(name));
        Rc::new(RefCell::new(globals))
    }

    /// Runs `f` one Python frame deeper.
    pub(crate) fn with_recursion<R>(&self, f: impl FnOnce() -> PyResult<R>) -> PyResult<R> {
        let depth = self.recursion_depth.get();
        if depth >= self.settings.recursion_limit {
            return Err(self.new_recursion_error());
        }
        self.recursion_depth.set(depth + 1);
        let result = f();
        self.recursion_depth.set(depth);
        result
    }

    pub fn call(&self, callable: &Value, args: impl Into<FuncArgs>) -> PyResult {
        let mut args = args.into();
        match callable {
            Value::Function(function) => self.invoke_function(function, args),
            Value::BoundMethod(method) => {
                args.prepend_arg(method.receiver.clone());
                self.call(&method.function, args)
            }
            Value::Builtin(builtin) => {
                if let Some(receiver) = &builtin.receiver {
                    args.prepend_arg(receiver.clone());
                }
                (builtin.func)(self, args)
            }
            Value::Class(class) => self.construct(class, args),
            Value::Instance(_) => match self.get_special_method(callable, "__call__")? {
                Some(method) => self.call(&method, args),
                None => Err(self.not_callable(callable)),
            },
            _ => Err(self.not_callable(callable)),
        }
    }

    fn not_callable(&self, value: &Value) -> Unwind {
        self.new_type_error(format!(
            "'{}' object is not callable",
            self.class_of(value).name
        ))
    }

    fn invoke_function(&self, function: &Rc<PyFunction>, args: FuncArgs) -> PyResult {
        let code = &*function.code;
        let slots = function.bind_arguments(args, self)?;
        let cells = function.frame_cells(&slots);
        if code.is_generator() {
            let mut storage = GeneratorStorage::new(code);
            for (local, slot) in storage.locals.iter_mut().zip(slots) {
                *local = slot;
            }
            trace!("created generator {}", function.qualname);
            let generator = PyGenerator::new(function, storage, cells);
            return Ok(Value::Generator(Rc::new(generator)));
        }
        let mut fast = slots;
        fast.resize(code.varnames.len(), None);
        self.with_recursion(|| {
            Frame::new(code, fast, cells, None, function.globals.clone()).run(self)
        })
    }

    /// Calls a class: builtin types build their value, other classes make
    /// an instance and run `__init__` on it.
    pub fn construct(&self, class: &Rc<PyClass>, args: FuncArgs) -> PyResult {
        use crate::class::BuiltinType;
        if !matches!(
            class.native_type(),
            BuiltinType::Object | BuiltinType::BaseException
        ) {
            return builtins::construct_builtin(self, class, args);
        }
        let instance = Rc::new(PyInstance::new(class.clone()));
        if self.is_exception_class(class) {
            instance.set_attr("__cause__", Value::None);
            instance.set_attr("__context__", Value::None);
            self.init_exception(&instance, args.args.clone());
        }
        let obj = Value::Instance(instance);
        let init_owner = class
            .iter_mro()
            .find(|ancestor| ancestor.attributes.borrow().contains_key("__init__"));
        let default_init = init_owner.is_none_or(|owner| Rc::ptr_eq(owner, &self.types.object));
        if default_init {
            if !args.args.is_empty() || !args.kwargs.is_empty() {
                return Err(self.new_type_error(format!("{}() takes no arguments", class.name)));
            }
            return Ok(obj);
        }
        let result = self.call_method(&obj, "__init__", args)?;
        if !result.is_none() {
            return Err(self.new_type_error(format!(
                "__init__() should return None, not '{}'",
                self.class_of(&result).name
            )));
        }
        Ok(obj)
    }

    /// Runs a module-level code object with `globals` as its namespace.
    pub fn run_code_obj(&self, code: Arc<CodeObject>, globals: DictRef) -> PyResult {
        let cells: Vec<CellRef> = (0..code.cellvars.len())
            .map(|_| Rc::new(RefCell::new(None)))
            .collect();
        let fast = vec![None; code.varnames.len()];
        self.with_recursion(|| Frame::new(&code, fast, cells, None, globals).run(self))
    }

    /// Makes `source` importable as module `name`.
    pub fn add_module_source(&self, name: &str, source: &str) {
        self.module_sources
            .borrow_mut()
            .insert(name.to_owned(), source.to_owned());
    }

    /// `import name`: loads every package on the dotted path and returns
    /// the top one, or the named module itself when `fromlist` is given.
    pub(crate) fn import(
        &self,
        name: &str,
        fromlist: &[String],
        level: u32,
        globals: &DictRef,
    ) -> PyResult {
        let absolute = self.resolve_module_name(name, level, globals)?;
        let mut parent: Option<Value> = None;
        let mut top = None;
        let mut path = String::new();
        for part in absolute.split('.') {
            if !path.is_empty() {
                path.push('.');
            }
            path.push_str(part);
            let module = self.load_module(&path)?;
            if let Some(parent) = &parent {
                self.set_attribute(parent, part, module.clone())?;
            }
            top.get_or_insert_with(|| module.clone());
            parent = Some(module);
        }
        let (Some(module), Some(top)) = (parent, top) else {
            return Err(self.new_import_error("Empty module name"));
        };
        if fromlist.is_empty() && level == 0 {
            return Ok(top);
        }
        for item in fromlist {
            let submodule = format!("{absolute}.{item}");
            if item != "*"
                && self.get_attribute_opt(&module, item)?.is_none()
                && self.module_sources.borrow().contains_key(&submodule)
            {
                let loaded = self.load_module(&submodule)?;
                self.set_attribute(&module, item, loaded)?;
            }
        }
        Ok(module)
    }

    fn resolve_module_name(&self, name: &str, level: u32, globals: &DictRef) -> PyResult<String> {
        if level == 0 {
            return Ok(name.to_owned());
        }
        let current = match globals.borrow().get_str("__name__") {
            Some(Value::Str(current)) => current.to_string(),
            _ => String::new(),
        };
        let mut parts: Vec<&str> = current.split('.').filter(|part| !part.is_empty()).collect();
        if parts.len() < level as usize {
            return Err(self.new_import_error("attempted relative import beyond top-level package"));
        }
        parts.truncate(parts.len() - level as usize);
        if !name.is_empty() {
            parts.push(name);
        }
        if parts.is_empty() {
            return Err(self.new_import_error("attempted relative import with no known parent package"));
        }
        Ok(parts.join("."))
    }

    fn load_module(&self, name: &str) -> PyResult {
        if let Some(module) = self.modules.borrow().get(name) {
            return Ok(module.clone());
        }
        let source = self.module_sources.borrow().get(name).cloned();
        let Some(source) = source else {
            return Err(self.new_import_error(format!("No module named '{name}'")));
        };
        debug!("importing {name}");
        let globals = self.new_scope(name);
        let module = Value::Module(Rc::new(PyModule {
            name: name.to_owned(),
            globals: globals.clone(),
        }));
        self.modules
            .borrow_mut()
            .insert(name.to_owned(), module.clone());
        if let Err(error) = self.exec_module(name, &source, globals) {
            self.modules.borrow_mut().shift_remove(name);
            return Err(error);
        }
        Ok(module)
    }

    #[cfg(feature = "compiler")]
    fn exec_module(&self, name: &str, source: &str, globals: DictRef) -> PyResult<()> {
        let code = self
            .compile(source, crate::compiler::Mode::Exec, &format!("<{name}>"))
            .map_err(|error| self.new_exception_msg(&self.exceptions.import_error, error.to_string()))?;
        self.run_code_obj(Arc::new(code), globals)?;
        Ok(())
    }

    #[cfg(not(feature = "compiler"))]
    fn exec_module(&self, name: &str, _source: &str, _globals: DictRef) -> PyResult<()> {
        Err(self.new_import_error(format!(
            "cannot import '{name}': built without the compiler"
        )))
    }

    #[cfg(feature = "compiler")]
    pub fn compile(
        &self,
        source: &str,
        mode: crate::compiler::Mode,
        source_path: &str,
    ) -> Result<CodeObject, arbor_compiler::CompileError> {
        let opts = crate::compiler::CompileOpts {
            optimize: self.settings.optimize,
        };
        crate::compiler::compile(source, mode, source_path, opts)
    }

    /// Compiles and runs a module as `__main__`.
    #[cfg(feature = "compiler")]
    pub fn run_source(&self, source: &str, source_path: &str) -> Result<Value, RunError> {
        let code = self.compile(source, crate::compiler::Mode::Exec, source_path)?;
        let scope = self.new_scope("__main__");
        self.run_code_obj(Arc::new(code), scope)
            .map_err(|unwind| self.run_error(unwind))
    }

    /// Compiles `source` in `mode` and runs it in `scope`.
    #[cfg(feature = "compiler")]
    pub fn run_in_scope(
        &self,
        source: &str,
        mode: crate::compiler::Mode,
        source_path: &str,
        scope: DictRef,
    ) -> Result<Value, RunError> {
        let code = self.compile(source, mode, source_path)?;
        self.run_code_obj(Arc::new(code), scope)
            .map_err(|unwind| self.run_error(unwind))
    }

    pub fn run_error(&self, unwind: Unwind) -> RunError {
        let exception = match unwind {
            Unwind::Exception(exc) => exc,
            Unwind::Return(_) | Unwind::Suspend(_) => {
                self.unwrap_exception(self.new_system_error("frame exited with a stray unwind"))
            }
            Unwind::Break | Unwind::Continue => {
                self.unwrap_exception(self.new_system_error("loop control outside of a loop"))
            }
        };
        RunError::Exception {
            message: self.format_exception(&exception),
            exception,
        }
    }

    fn unwrap_exception(&self, unwind: Unwind) -> Value {
        match unwind {
            Unwind::Exception(exc) => exc,
            _ => Value::None,
        }
    }

    pub(crate) fn write_stdout(&self, text: &str) -> PyResult<()> {
        if self.settings.capture_output {
            self.output.borrow_mut().push_str(text);
            return Ok(());
        }
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(text.as_bytes())
            .and_then(|()| stdout.flush())
            .map_err(|error| self.new_runtime_error(format!("lost sys.stdout: {error}")))
    }

    /// Everything printed so far while output is captured.
    pub fn take_output(&self) -> String {
        mem::take(&mut *self.output.borrow_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recursion_is_bounded() {
        let settings = Settings {
            recursion_limit: 3,
            ..Settings::default()
        };
        Interpreter::new(settings).enter(|vm| {
            let depth = |n| {
                fn nest(vm: &VirtualMachine, n: usize) -> PyResult<()> {
                    if n == 0 {
                        return Ok(());
                    }
                    vm.with_recursion(|| nest(vm, n - 1))
                }
                nest(vm, n)
            };
            assert!(depth(3).is_ok());
            let Err(Unwind::Exception(exc)) = depth(4) else {
                panic!("expected RecursionError");
            };
            assert!(vm.is_instance(&exc, &vm.exceptions.recursion_error));
            assert_eq!(vm.recursion_depth.get(), 0);
        });
    }

    #[test]
    fn relative_names_resolve_against_the_package() {
        Interpreter::new(Settings::default()).enter(|vm| {
            let globals = vm.new_scope("pkg.sub.mod");
            assert_eq!(vm.resolve_module_name("x", 1, &globals).unwrap(), "pkg.sub.x");
            assert_eq!(vm.resolve_module_name("", 2, &globals).unwrap(), "pkg");
            assert!(vm.resolve_module_name("x", 4, &globals).is_err());
        });
    }

    #[test]
    fn classes_without_init_reject_arguments() {
        Interpreter::new(Settings::default()).enter(|vm| {
            let class = vm
                .new_class("A", Vec::new(), &vm.new_scope("m"))
                .unwrap();
            assert!(vm.construct(&class, FuncArgs::default()).is_ok());
            let Err(Unwind::Exception(exc)) =
                vm.construct(&class, FuncArgs::from(vec![Value::from(1i64)]))
            else {
                panic!("expected TypeError");
            };
            assert_eq!(vm.format_exception(&exc), "TypeError: A() takes no arguments");
        });
    }
}
