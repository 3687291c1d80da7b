//! Builtin exception classes and the helpers that raise them.

use crate::{
    PyResult, Unwind, VirtualMachine,
    builtins::native,
    class::{BuiltinType, PyClass, PyInstance},
    function::FuncArgs,
    value::Value,
};
use alloc::rc::Rc;

pub struct ExceptionZoo {
    pub base_exception: Rc<PyClass>,
    pub system_exit: Rc<PyClass>,
    pub keyboard_interrupt: Rc<PyClass>,
    pub generator_exit: Rc<PyClass>,
    pub exception: Rc<PyClass>,
    pub stop_iteration: Rc<PyClass>,
    pub arithmetic_error: Rc<PyClass>,
    pub zero_division_error: Rc<PyClass>,
    pub overflow_error: Rc<PyClass>,
    pub assertion_error: Rc<PyClass>,
    pub attribute_error: Rc<PyClass>,
    pub lookup_error: Rc<PyClass>,
    pub index_error: Rc<PyClass>,
    pub key_error: Rc<PyClass>,
    pub name_error: Rc<PyClass>,
    pub unbound_local_error: Rc<PyClass>,
    pub runtime_error: Rc<PyClass>,
    pub not_implemented_error: Rc<PyClass>,
    pub recursion_error: Rc<PyClass>,
    pub type_error: Rc<PyClass>,
    pub value_error: Rc<PyClass>,
    pub import_error: Rc<PyClass>,
    pub system_error: Rc<PyClass>,
}

impl ExceptionZoo {
    pub(crate) fn new(object: &Rc<PyClass>) -> Self {
        let base_exception =
            PyClass::new_builtin("BaseException", Some(object), Some(BuiltinType::BaseException));
        base_exception.set_attr("__init__", native("__init__", base_exception_init));
        let sub = |name, base: &Rc<PyClass>| PyClass::new_builtin(name, Some(base), None);

        let exception = sub("Exception", &base_exception);
        let arithmetic_error = sub("ArithmeticError", &exception);
        let lookup_error = sub("LookupError", &exception);
        let name_error = sub("NameError", &exception);
        let runtime_error = sub("RuntimeError", &exception);
        Self {
            system_exit: sub("SystemExit", &base_exception),
            keyboard_interrupt: sub("KeyboardInterrupt", &base_exception),
            generator_exit: sub("GeneratorExit", &base_exception),
            stop_iteration: sub("StopIteration", &exception),
            zero_division_error: sub("ZeroDivisionError", &arithmetic_error),
            overflow_error: sub("OverflowError", &arithmetic_error),
            assertion_error: sub("AssertionError", &exception),
            attribute_error: sub("AttributeError", &exception),
            index_error: sub("IndexError", &lookup_error),
            key_error: sub("KeyError", &lookup_error),
            unbound_local_error: sub("UnboundLocalError", &name_error),
            not_implemented_error: sub("NotImplementedError", &runtime_error),
            recursion_error: sub("RecursionError", &runtime_error),
            type_error: sub("TypeError", &exception),
            value_error: sub("ValueError", &exception),
            import_error: sub("ImportError", &exception),
            system_error: sub("SystemError", &exception),
            base_exception,
            exception,
            arithmetic_error,
            lookup_error,
            name_error,
            runtime_error,
        }
    }

    /// Every class, for registration in the builtins namespace.
    pub fn classes(&self) -> [&Rc<PyClass>; 23] {
        [
            &self.base_exception,
            &self.system_exit,
            &self.keyboard_interrupt,
            &self.generator_exit,
            &self.exception,
            &self.stop_iteration,
            &self.arithmetic_error,
            &self.zero_division_error,
            &self.overflow_error,
            &self.assertion_error,
            &self.attribute_error,
            &self.lookup_error,
            &self.index_error,
            &self.key_error,
            &self.name_error,
            &self.unbound_local_error,
            &self.runtime_error,
            &self.not_implemented_error,
            &self.recursion_error,
            &self.type_error,
            &self.value_error,
            &self.import_error,
            &self.system_error,
        ]
    }
}

fn base_exception_init(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    if let Some(name) = args.kwargs.keys().next() {
        return Err(vm.new_type_error(format!(
            "BaseException.__init__() got an unexpected keyword argument '{name}'"
        )));
    }
    if args.args.is_empty() {
        return Err(vm.new_type_error("descriptor '__init__' needs an argument"));
    }
    let zelf = args.args.remove(0);
    if let Value::Instance(instance) = &zelf {
        vm.init_exception(instance, args.args);
    }
    Ok(Value::None)
}

impl VirtualMachine {
    pub(crate) fn init_exception(&self, instance: &PyInstance, args: Vec<Value>) {
        if instance.class.is_subclass(&self.exceptions.stop_iteration) {
            instance.set_attr("value", args.first().cloned().unwrap_or(Value::None));
        }
        instance.set_attr("args", Value::new_tuple(args));
    }

    pub fn new_exception(&self, class: Rc<PyClass>, args: Vec<Value>) -> Value {
        let instance = PyInstance::new(class);
        instance.set_attr("__cause__", Value::None);
        instance.set_attr("__context__", Value::None);
        self.init_exception(&instance, args);
        Value::Instance(Rc::new(instance))
    }

    pub fn new_exception_msg(&self, class: &Rc<PyClass>, message: impl Into<String>) -> Unwind {
        let message: String = message.into();
        Unwind::Exception(self.new_exception(class.clone(), vec![Value::from(message)]))
    }

    pub fn new_type_error(&self, message: impl Into<String>) -> Unwind {
        self.new_exception_msg(&self.exceptions.type_error, message)
    }

    pub fn new_value_error(&self, message: impl Into<String>) -> Unwind {
        self.new_exception_msg(&self.exceptions.value_error, message)
    }

    pub fn new_index_error(&self, message: impl Into<String>) -> Unwind {
        self.new_exception_msg(&self.exceptions.index_error, message)
    }

    pub fn new_key_error(&self, key: Value) -> Unwind {
        Unwind::Exception(self.new_exception(self.exceptions.key_error.clone(), vec![key]))
    }

    pub fn new_name_error(&self, name: &str) -> Unwind {
        self.new_exception_msg(
            &self.exceptions.name_error,
            format!("name '{name}' is not defined"),
        )
    }

    pub fn new_unbound_local_error(&self, name: &str) -> Unwind {
        self.new_exception_msg(
            &self.exceptions.unbound_local_error,
            format!("cannot access local variable '{name}' where it is not associated with a value"),
        )
    }

    pub fn new_attribute_error(&self, message: impl Into<String>) -> Unwind {
        self.new_exception_msg(&self.exceptions.attribute_error, message)
    }

    pub fn new_runtime_error(&self, message: impl Into<String>) -> Unwind {
        self.new_exception_msg(&self.exceptions.runtime_error, message)
    }

    pub fn new_zero_division_error(&self, message: impl Into<String>) -> Unwind {
        self.new_exception_msg(&self.exceptions.zero_division_error, message)
    }

    pub fn new_overflow_error(&self, message: impl Into<String>) -> Unwind {
        self.new_exception_msg(&self.exceptions.overflow_error, message)
    }

    pub fn new_system_error(&self, message: impl Into<String>) -> Unwind {
        self.new_exception_msg(&self.exceptions.system_error, message)
    }

    pub fn new_import_error(&self, message: impl Into<String>) -> Unwind {
        self.new_exception_msg(&self.exceptions.import_error, message)
    }

    pub fn new_recursion_error(&self) -> Unwind {
        self.new_exception_msg(
            &self.exceptions.recursion_error,
            "maximum recursion depth exceeded",
        )
    }

    pub fn new_stop_iteration(&self, value: Value) -> Unwind {
        let args = if value.is_none() { Vec::new() } else { vec![value] };
        Unwind::Exception(self.new_exception(self.exceptions.stop_iteration.clone(), args))
    }

    pub fn is_exception_class(&self, class: &Rc<PyClass>) -> bool {
        class.is_subclass(&self.exceptions.base_exception)
    }

    /// Whether `exc` is caught by the `except` clause type `typ`, a class or
    /// a tuple of them.
    pub fn exception_matches(&self, exc: &Value, typ: &Value) -> PyResult<bool> {
        match typ {
            Value::Class(class) if self.is_exception_class(class) => {
                Ok(self.is_instance(exc, class))
            }
            Value::Tuple(types) => {
                for typ in types.iter() {
                    if self.exception_matches(exc, typ)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Err(self.new_type_error(
                "catching classes that do not inherit from BaseException is not allowed",
            )),
        }
    }

    /// Turns the operand of `raise` into an exception instance.
    pub fn normalize_exception(&self, value: Value) -> PyResult<Value> {
        match &value {
            Value::Class(class) if self.is_exception_class(class) => {
                self.construct(class, FuncArgs::default())
            }
            Value::Instance(instance) if self.is_exception_class(&instance.class) => Ok(value),
            _ => Err(self.new_type_error("exceptions must derive from BaseException")),
        }
    }

    /// Records `context` as the exception being handled when `exc` was
    /// raised.
    pub fn chain_context(&self, exc: &Value, context: &Value) {
        if exc.is(context) {
            return;
        }
        if let Value::Instance(instance) = exc
            && instance.get_attr("__context__").is_none_or(|current| current.is_none())
        {
            instance.set_attr("__context__", context.clone());
        }
    }

    /// `raise exc from cause`.
    pub fn set_cause(&self, exc: &Value, cause: Value) {
        if let Value::Instance(instance) = exc {
            instance.set_attr("__suppress_context__", Value::Bool(true));
            instance.set_attr("__cause__", cause);
        }
    }

    pub(crate) fn exception_str(&self, instance: &PyInstance) -> PyResult<String> {
        let args = match instance.get_attr("args") {
            Some(Value::Tuple(args)) => args,
            _ => return Ok(String::new()),
        };
        match &*args {
            [] => Ok(String::new()),
            [arg] if instance.class.is_subclass(&self.exceptions.key_error) => self.repr(arg),
            [arg] => self.to_str(arg),
            _ => self.repr(&Value::Tuple(args.clone())),
        }
    }

    /// `Name: message`, the last line of a traceback.
    pub fn format_exception(&self, exc: &Value) -> String {
        let class = self.class_of(exc);
        let message = match self.to_str(exc) {
            Ok(message) => message,
            Err(_) => "<exception str() failed>".to_owned(),
        };
        if message.is_empty() {
            class.name.clone()
        } else {
            format!("{}: {message}", class.name)
        }
    }

    pub fn exception_value(&self, unwind: &Unwind) -> Option<Value> {
        match unwind {
            Unwind::Exception(exc) => Some(exc.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Interpreter, Settings, Unwind, Value};

    #[test]
    fn hierarchy_matches_python() {
        Interpreter::new(Settings::default()).enter(|vm| {
            let zoo = &vm.exceptions;
            assert!(zoo.key_error.is_subclass(&zoo.lookup_error));
            assert!(zoo.unbound_local_error.is_subclass(&zoo.name_error));
            assert!(!zoo.generator_exit.is_subclass(&zoo.exception));
            assert!(zoo.recursion_error.is_subclass(&zoo.runtime_error));
        });
    }

    #[test]
    fn key_errors_show_the_key() {
        Interpreter::new(Settings::default()).enter(|vm| {
            let Unwind::Exception(exc) = vm.new_key_error(Value::from("k")) else {
                unreachable!()
            };
            assert_eq!(vm.format_exception(&exc), "KeyError: 'k'");
        });
    }

    #[test]
    fn matching_accepts_tuples_and_rejects_non_exceptions() {
        Interpreter::new(Settings::default()).enter(|vm| {
            let Unwind::Exception(exc) = vm.new_type_error("boom") else {
                unreachable!()
            };
            let types = Value::new_tuple(vec![
                Value::Class(vm.exceptions.value_error.clone()),
                Value::Class(vm.exceptions.exception.clone()),
            ]);
            assert!(vm.exception_matches(&exc, &types).unwrap());
            assert!(vm.exception_matches(&exc, &Value::from(1i64)).is_err());
        });
    }
}
