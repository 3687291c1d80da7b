//! The `builtins` namespace and the methods of builtin types.

use crate::{
    PyResult, Unwind, VirtualMachine,
    class::{BuiltinType, PyClass},
    dict::{PyDict, PySet},
    format::{format_template, join_str},
    function::{FuncArgs, NativeFn, PyBuiltinFunction},
    generator::IterReturn,
    value::{IterState, ListRef, PyDescriptor, PyRange, PySuper, Value},
};
use alloc::rc::Rc;
use arbor_compiler_core::tree::{BinaryOperator, ComparisonOperator};
use malachite_bigint::BigInt;
use num_traits::{FromPrimitive, Signed, ToPrimitive, Zero};

pub(crate) fn native(name: &'static str, func: NativeFn) -> Value {
    Value::Builtin(Rc::new(PyBuiltinFunction::new(name, func)))
}

const FUNCTIONS: &[(&str, NativeFn)] = &[
    ("abs", builtin_abs),
    ("all", builtin_all),
    ("any", builtin_any),
    ("ascii", builtin_ascii),
    ("bin", builtin_bin),
    ("callable", builtin_callable),
    ("chr", builtin_chr),
    ("delattr", builtin_delattr),
    ("divmod", builtin_divmod),
    ("enumerate", builtin_enumerate),
    ("format", builtin_format),
    ("getattr", builtin_getattr),
    ("hasattr", builtin_hasattr),
    ("hash", builtin_hash),
    ("hex", builtin_hex),
    ("id", builtin_id),
    ("isinstance", builtin_isinstance),
    ("issubclass", builtin_issubclass),
    ("iter", builtin_iter),
    ("len", builtin_len),
    ("max", builtin_max),
    ("min", builtin_min),
    ("next", builtin_next),
    ("oct", builtin_oct),
    ("ord", builtin_ord),
    ("pow", builtin_pow),
    ("print", builtin_print),
    ("repr", builtin_repr),
    ("reversed", builtin_reversed),
    ("round", builtin_round),
    ("setattr", builtin_setattr),
    ("sorted", builtin_sorted),
    ("sum", builtin_sum),
    ("zip", builtin_zip),
];

/// Fills `vm.builtins` and attaches methods to the builtin types.
pub(crate) fn init(vm: &VirtualMachine) {
    let types = &vm.types;
    add_methods(&types.object, &[("__init__", object_init)]);
    add_methods(
        &types.list,
        &[
            ("append", list_append),
            ("clear", list_clear),
            ("copy", list_copy),
            ("count", sequence_count),
            ("extend", list_extend),
            ("index", sequence_index),
            ("insert", list_insert),
            ("pop", list_pop),
            ("remove", list_remove),
            ("reverse", list_reverse),
            ("sort", list_sort),
        ],
    );
    add_methods(
        &types.tuple,
        &[("count", sequence_count), ("index", sequence_index)],
    );
    add_methods(
        &types.dict,
        &[
            ("clear", dict_clear),
            ("copy", dict_copy),
            ("get", dict_get),
            ("items", dict_items),
            ("keys", dict_keys),
            ("pop", dict_pop),
            ("setdefault", dict_setdefault),
            ("update", dict_update),
            ("values", dict_values),
        ],
    );
    add_methods(
        &types.set,
        &[
            ("add", set_add),
            ("clear", set_clear),
            ("copy", set_copy),
            ("difference", set_difference),
            ("discard", set_discard),
            ("intersection", set_intersection),
            ("pop", set_pop),
            ("remove", set_remove),
            ("union", set_union),
            ("update", set_update),
        ],
    );
    add_methods(
        &types.str_,
        &[
            ("count", str_count),
            ("endswith", str_endswith),
            ("find", str_find),
            ("format", str_format),
            ("isalpha", str_isalpha),
            ("isdigit", str_isdigit),
            ("isspace", str_isspace),
            ("join", str_join),
            ("lower", str_lower),
            ("lstrip", str_lstrip),
            ("replace", str_replace),
            ("rstrip", str_rstrip),
            ("split", str_split),
            ("startswith", str_startswith),
            ("strip", str_strip),
            ("upper", str_upper),
        ],
    );
    add_methods(
        &types.generator,
        &[
            ("__iter__", iter_self),
            ("__next__", generator_next),
            ("close", generator_close),
            ("send", generator_send),
            ("throw", generator_throw),
        ],
    );
    add_methods(
        &types.iterator,
        &[("__iter__", iter_self), ("__next__", iterator_next)],
    );
    add_methods(
        &types.property,
        &[("getter", property_getter), ("setter", property_setter)],
    );

    let mut builtins = vm.builtins.borrow_mut();
    for &(name, func) in FUNCTIONS {
        builtins.set_str(name, native(name, func));
    }
    let classes = [
        &types.object,
        &types.type_,
        &types.bool_,
        &types.int,
        &types.float,
        &types.complex,
        &types.str_,
        &types.bytes,
        &types.tuple,
        &types.list,
        &types.dict,
        &types.set,
        &types.range,
        &types.slice,
        &types.super_,
        &types.property,
        &types.staticmethod,
        &types.classmethod,
    ];
    for class in classes.into_iter().chain(vm.exceptions.classes()) {
        builtins.set_str(&class.name, Value::Class(class.clone()));
    }
    builtins.set_str("Ellipsis", Value::Ellipsis);
    builtins.set_str("NotImplemented", Value::NotImplemented);
    builtins.set_str("__name__", Value::from("builtins"));
}

fn add_methods(class: &PyClass, methods: &[(&'static str, NativeFn)]) {
    for &(name, func) in methods {
        class.set_attr(name, native(name, func));
    }
}

/// Calls of builtin types such as `int(x)` or `range(3)`.
pub(crate) fn construct_builtin(vm: &VirtualMachine, class: &Rc<PyClass>, mut args: FuncArgs) -> PyResult {
    let name = class.name.as_str();
    match class.native_type() {
        BuiltinType::Type => {
            let args = args.bind_positional("type", 1, 3, vm)?;
            match <[Value; 3]>::try_from(args) {
                Ok([Value::Str(name), bases, Value::Dict(namespace)]) => {
                    let bases = vm
                        .collect(&bases)?
                        .into_iter()
                        .map(|base| match base {
                            Value::Class(class) => Ok(class),
                            _ => Err(vm.new_type_error("bases must be types")),
                        })
                        .collect::<PyResult<Vec<_>>>()?;
                    vm.new_class(&name, bases, &namespace).map(Value::Class)
                }
                Ok(_) => Err(vm.new_type_error("type() argument types must be str, tuple and dict")),
                Err(args) if args.len() == 1 => Ok(Value::Class(vm.class_of(&args[0]))),
                Err(_) => Err(vm.new_type_error("type() takes 1 or 3 arguments")),
            }
        }
        BuiltinType::Bool => {
            let args = args.bind_positional("bool", 0, 1, vm)?;
            match args.first() {
                Some(value) => vm.is_true(value).map(Value::Bool),
                None => Ok(Value::Bool(false)),
            }
        }
        BuiltinType::Int => {
            let base = args.take_keyword("base");
            let mut args = args.bind_positional("int", 0, 2, vm)?.into_iter();
            let value = args.next();
            let base = args.next().or(base);
            int_new(vm, value, base)
        }
        BuiltinType::Float => {
            let args = args.bind_positional("float", 0, 1, vm)?;
            match args.first() {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(text)) => parse_float(text)
                    .map(Value::Float)
                    .ok_or_else(|| {
                        vm.new_value_error(format!(
                            "could not convert string to float: {}",
                            crate::format::quote_str(text)
                        ))
                    }),
                Some(value) => vm.to_f64(value).map(Value::Float),
            }
        }
        BuiltinType::Str => {
            let args = args.bind_positional("str", 0, 1, vm)?;
            match args.first() {
                Some(value) => vm.to_str(value).map(Value::from),
                None => Ok(Value::from("")),
            }
        }
        BuiltinType::List => {
            let args = args.bind_positional("list", 0, 1, vm)?;
            let items = match args.first() {
                Some(iterable) => vm.collect(iterable)?,
                None => Vec::new(),
            };
            Ok(Value::new_list(items))
        }
        BuiltinType::Tuple => {
            let args = args.bind_positional("tuple", 0, 1, vm)?;
            match args.into_iter().next() {
                Some(tuple @ Value::Tuple(_)) => Ok(tuple),
                Some(iterable) => Ok(Value::new_tuple(vm.collect(&iterable)?)),
                None => Ok(Value::new_tuple(Vec::new())),
            }
        }
        BuiltinType::Set => {
            let args = args.bind_positional("set", 0, 1, vm)?;
            let items = match args.first() {
                Some(iterable) => vm.collect(iterable)?,
                None => Vec::new(),
            };
            Ok(Value::new_set(vm.set_from_values(items)?))
        }
        BuiltinType::Dict => {
            let kwargs = core::mem::take(&mut args.kwargs);
            let args = args.bind_positional("dict", 0, 1, vm)?;
            let mut dict = PyDict::default();
            if let Some(source) = args.first() {
                vm.dict_update(&mut dict, source)?;
            }
            for (key, value) in kwargs {
                dict.set_str(&key, value);
            }
            Ok(Value::new_dict(dict))
        }
        BuiltinType::Range => {
            let args = args.bind_positional("range", 1, 3, vm)?;
            let ints = args
                .iter()
                .map(|arg| vm.to_bigint(arg))
                .collect::<PyResult<Vec<_>>>()?;
            let (start, stop, step) = match <[BigInt; 3]>::try_from(ints) {
                Ok([start, stop, step]) => (start, stop, step),
                Err(mut ints) if ints.len() == 2 => {
                    let stop = ints.pop().unwrap_or_default();
                    (ints.pop().unwrap_or_default(), stop, BigInt::from(1))
                }
                Err(mut ints) => (BigInt::zero(), ints.pop().unwrap_or_default(), BigInt::from(1)),
            };
            if step.is_zero() {
                return Err(vm.new_value_error("range() arg 3 must not be zero"));
            }
            Ok(Value::Range(Rc::new(PyRange { start, stop, step })))
        }
        BuiltinType::Super => {
            let args = args.bind_positional("super", 2, 2, vm)?;
            let [class, obj] = <[Value; 2]>::try_from(args).map_err(|_| arity_error(vm))?;
            let Value::Class(class) = class else {
                return Err(vm.new_type_error("super() argument 1 must be a type"));
            };
            let bound = match &obj {
                Value::Class(obj_class) => obj_class.is_subclass(&class),
                obj => vm.is_instance(obj, &class),
            };
            if !bound {
                return Err(vm.new_type_error("super(type, obj): obj must be an instance or subtype of type"));
            }
            Ok(Value::Super(Rc::new(PySuper { class, obj })))
        }
        BuiltinType::Property => {
            let fset = args.take_keyword("fset");
            let fget = args.take_keyword("fget");
            let mut args = args.bind_positional("property", 0, 2, vm)?.into_iter();
            let getter = args.next().or(fget).unwrap_or(Value::None);
            let setter = args.next().or(fset).filter(|setter| !setter.is_none());
            Ok(Value::Descriptor(Rc::new(PyDescriptor::Property { getter, setter })))
        }
        native @ (BuiltinType::StaticMethod | BuiltinType::ClassMethod) => {
            let args = args.bind_positional(name, 1, 1, vm)?;
            let function = args.into_iter().next().unwrap_or(Value::None);
            Ok(Value::Descriptor(Rc::new(if native == BuiltinType::StaticMethod {
                PyDescriptor::StaticMethod(function)
            } else {
                PyDescriptor::ClassMethod(function)
            })))
        }
        _ => Err(vm.new_type_error(format!("cannot create '{name}' instances"))),
    }
}

fn arity_error(vm: &VirtualMachine) -> Unwind {
    vm.new_system_error("argument count changed after binding")
}

/// Positional arguments of a builtin taking exactly `N` of them.
fn exact<const N: usize>(vm: &VirtualMachine, args: FuncArgs, name: &str) -> PyResult<[Value; N]> {
    args.bind_positional(name, N, N, vm)?
        .try_into()
        .map_err(|_| arity_error(vm))
}

/// Splits off the receiver of a method call and checks the rest.
fn method(
    vm: &VirtualMachine,
    mut args: FuncArgs,
    name: &str,
    min: usize,
    max: usize,
) -> PyResult<(Value, Vec<Value>)> {
    if args.args.is_empty() {
        return Err(vm.new_type_error(format!("unbound method {name}() needs an argument")));
    }
    let zelf = args.args.remove(0);
    Ok((zelf, args.bind_positional(name, min, max, vm)?))
}

fn wrong_receiver(vm: &VirtualMachine, expected: &str, got: &Value) -> Unwind {
    vm.new_type_error(format!(
        "descriptor requires a '{expected}' object but received a '{}'",
        vm.class_of(got).name
    ))
}

fn int_new(vm: &VirtualMachine, value: Option<Value>, base: Option<Value>) -> PyResult {
    let Some(value) = value else {
        return Ok(Value::Int(BigInt::zero()));
    };
    if let Some(base) = base {
        let Value::Str(text) = &value else {
            return Err(vm.new_type_error("int() can't convert non-string with explicit base"));
        };
        let base = vm.to_bigint(&base)?.to_u32().unwrap_or(1);
        if base == 1 || base > 36 {
            return Err(vm.new_value_error("int() base must be >= 2 and <= 36, or 0"));
        }
        return parse_int(vm, text, base);
    }
    match &value {
        Value::Int(value) => Ok(Value::Int(value.clone())),
        Value::Bool(value) => Ok(Value::from(i64::from(*value))),
        Value::Float(float) => {
            if float.is_nan() {
                return Err(vm.new_value_error("cannot convert float NaN to integer"));
            }
            BigInt::from_f64(float.trunc())
                .map(Value::Int)
                .ok_or_else(|| vm.new_overflow_error("cannot convert float infinity to integer"))
        }
        Value::Str(text) => parse_int(vm, text, 10),
        _ => vm.to_bigint(&value).map(Value::Int).map_err(|_| {
            vm.new_type_error(format!(
                "int() argument must be a string or a real number, not '{}'",
                vm.class_of(&value).name
            ))
        }),
    }
}

fn parse_int(vm: &VirtualMachine, text: &str, base: u32) -> PyResult {
    let invalid = || {
        vm.new_value_error(format!(
            "invalid literal for int() with base {base}: {}",
            crate::format::quote_str(text)
        ))
    };
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let prefixed = |prefix: &str| {
        digits
            .get(..2)
            .filter(|head| head.eq_ignore_ascii_case(prefix))
            .map(|_| &digits[2..])
    };
    let (base, digits) = match base {
        0 => match (prefixed("0x"), prefixed("0o"), prefixed("0b")) {
            (Some(rest), _, _) => (16, rest),
            (_, Some(rest), _) => (8, rest),
            (_, _, Some(rest)) => (2, rest),
            _ => (10, digits),
        },
        16 => (16, prefixed("0x").unwrap_or(digits)),
        8 => (8, prefixed("0o").unwrap_or(digits)),
        2 => (2, prefixed("0b").unwrap_or(digits)),
        base => (base, digits),
    };
    if digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') || digits.contains("__") {
        return Err(invalid());
    }
    let mut value = BigInt::zero();
    for c in digits.chars().filter(|&c| c != '_') {
        let digit = c.to_digit(base).ok_or_else(invalid)?;
        value = value * BigInt::from(base) + BigInt::from(digit);
    }
    Ok(Value::Int(if negative { -value } else { value }))
}

fn parse_float(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    let (sign, body) = match trimmed.as_bytes().first() {
        Some(b'-') => (-1.0, &trimmed[1..]),
        Some(b'+') => (1.0, &trimmed[1..]),
        _ => (1.0, trimmed),
    };
    let lower = body.to_ascii_lowercase();
    let magnitude = match lower.as_str() {
        "inf" | "infinity" => f64::INFINITY,
        "nan" => f64::NAN,
        _ if lower.contains("inf") || lower.contains("nan") => return None,
        _ => lower.replace('_', "").parse::<f64>().ok()?,
    };
    Some(sign * magnitude)
}

fn object_init(_vm: &VirtualMachine, _args: FuncArgs) -> PyResult {
    Ok(Value::None)
}

fn builtin_print(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let text_option = |value: Option<Value>, default: &str| -> PyResult<String> {
        match value {
            None | Some(Value::None) => Ok(default.to_owned()),
            Some(Value::Str(text)) => Ok(text.to_string()),
            Some(other) => Err(vm.new_type_error(format!(
                "sep must be None or a string, not {}",
                vm.class_of(&other).name
            ))),
        }
    };
    let sep = text_option(args.take_keyword("sep"), " ")?;
    let end = text_option(args.take_keyword("end"), "\n")?;
    let values = args.bind_positional("print", 0, usize::MAX, vm)?;
    let mut line = values
        .iter()
        .map(|value| vm.to_str(value))
        .collect::<PyResult<Vec<_>>>()?
        .join(&sep);
    line.push_str(&end);
    vm.write_stdout(&line)?;
    Ok(Value::None)
}

fn builtin_len(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [value] = exact(vm, args, "len")?;
    vm.len(&value).map(Value::from)
}

fn builtin_repr(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [value] = exact(vm, args, "repr")?;
    vm.repr(&value).map(Value::from)
}

fn builtin_ascii(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [value] = exact(vm, args, "ascii")?;
    vm.ascii(&value).map(Value::from)
}

fn builtin_format(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let args = args.bind_positional("format", 1, 2, vm)?;
    let spec = match args.get(1) {
        Some(Value::Str(spec)) => spec.to_string(),
        Some(other) => {
            return Err(vm.new_type_error(format!(
                "format() argument 2 must be str, not {}",
                vm.class_of(other).name
            )));
        }
        None => String::new(),
    };
    vm.format_value(&args[0], &spec).map(Value::from)
}

fn radix(vm: &VirtualMachine, args: FuncArgs, name: &str, spec: &str) -> PyResult {
    let [value] = exact(vm, args, name)?;
    let value = Value::Int(vm.to_bigint(&value)?);
    vm.format_value(&value, spec).map(Value::from)
}

fn builtin_hex(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    radix(vm, args, "hex", "#x")
}

fn builtin_oct(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    radix(vm, args, "oct", "#o")
}

fn builtin_bin(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    radix(vm, args, "bin", "#b")
}

fn builtin_iter(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [value] = exact(vm, args, "iter")?;
    vm.get_iter(&value)
}

fn builtin_next(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let mut args = args.bind_positional("next", 1, 2, vm)?.into_iter();
    let iterator = args.next().unwrap_or(Value::None);
    let is_iterator = matches!(iterator, Value::Iterator(_) | Value::Generator(_))
        || vm.get_special_method(&iterator, "__next__")?.is_some();
    if !is_iterator {
        return Err(vm.new_type_error(format!(
            "'{}' object is not an iterator",
            vm.class_of(&iterator).name
        )));
    }
    match (vm.next(&iterator)?, args.next()) {
        (Some(item), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(vm.new_stop_iteration(Value::None)),
    }
}

fn builtin_enumerate(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let start = args.take_keyword("start");
    let mut args = args.bind_positional("enumerate", 1, 2, vm)?.into_iter();
    let iterator = vm.get_iter(&args.next().unwrap_or(Value::None))?;
    let count = match args.next().or(start) {
        Some(start) => vm.to_bigint(&start)?,
        None => BigInt::zero(),
    };
    Ok(Value::new_iterator(IterState::Enumerate { iterator, count }))
}

fn builtin_zip(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let iterables = args.bind_positional("zip", 0, usize::MAX, vm)?;
    let iterators = iterables
        .iter()
        .map(|iterable| vm.get_iter(iterable))
        .collect::<PyResult<Vec<_>>>()?;
    Ok(Value::new_iterator(IterState::Zip(iterators)))
}

fn builtin_reversed(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [value] = exact(vm, args, "reversed")?;
    let mut items = match &value {
        Value::List(_) | Value::Tuple(_) | Value::Str(_) | Value::Range(_) => vm.collect(&value)?,
        Value::Instance(_) => {
            if let Some(method) = vm.get_special_method(&value, "__reversed__")? {
                return vm.call(&method, Vec::new());
            }
            if vm.get_special_method(&value, "__getitem__")?.is_none() {
                return Err(not_reversible(vm, &value));
            }
            let len = vm.len(&value)?;
            let items = (0..len)
                .rev()
                .map(|index| vm.get_item(&value, Value::from(index)))
                .collect::<PyResult<Vec<_>>>()?;
            return Ok(Value::new_iterator(IterState::Items {
                items: items.into(),
                index: 0,
            }));
        }
        _ => return Err(not_reversible(vm, &value)),
    };
    items.reverse();
    Ok(Value::new_iterator(IterState::Items {
        items: items.into(),
        index: 0,
    }))
}

fn not_reversible(vm: &VirtualMachine, value: &Value) -> Unwind {
    vm.new_type_error(format!(
        "'{}' object is not reversible",
        vm.class_of(value).name
    ))
}

fn class_matches(
    vm: &VirtualMachine,
    classinfo: &Value,
    check: &dyn Fn(&Rc<PyClass>) -> bool,
    name: &str,
) -> PyResult<bool> {
    match classinfo {
        Value::Class(class) => Ok(check(class)),
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if class_matches(vm, class, check, name)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(vm.new_type_error(format!(
            "{name}() arg 2 must be a type or tuple of types"
        ))),
    }
}

fn builtin_isinstance(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [obj, classinfo] = exact(vm, args, "isinstance")?;
    let class = vm.class_of(&obj);
    class_matches(vm, &classinfo, &|other: &Rc<PyClass>| class.is_subclass(other), "isinstance").map(Value::Bool)
}

fn builtin_issubclass(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [class, classinfo] = exact(vm, args, "issubclass")?;
    let Value::Class(class) = class else {
        return Err(vm.new_type_error("issubclass() arg 1 must be a class"));
    };
    class_matches(vm, &classinfo, &|other: &Rc<PyClass>| class.is_subclass(other), "issubclass").map(Value::Bool)
}

fn attr_name(vm: &VirtualMachine, name: &Value) -> PyResult<Rc<str>> {
    match name {
        Value::Str(name) => Ok(name.clone()),
        other => Err(vm.new_type_error(format!(
            "attribute name must be string, not '{}'",
            vm.class_of(other).name
        ))),
    }
}

fn builtin_getattr(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let args = args.bind_positional("getattr", 2, 3, vm)?;
    let name = attr_name(vm, &args[1])?;
    match args.get(2) {
        None => vm.get_attribute(&args[0], &name),
        Some(default) => match vm.get_attribute(&args[0], &name) {
            Err(Unwind::Exception(exc)) if vm.is_instance(&exc, &vm.exceptions.attribute_error) => {
                Ok(default.clone())
            }
            result => result,
        },
    }
}

fn builtin_hasattr(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [obj, name] = exact(vm, args, "hasattr")?;
    let name = attr_name(vm, &name)?;
    match vm.get_attribute(&obj, &name) {
        Ok(_) => Ok(Value::Bool(true)),
        Err(Unwind::Exception(exc)) if vm.is_instance(&exc, &vm.exceptions.attribute_error) => {
            Ok(Value::Bool(false))
        }
        Err(error) => Err(error),
    }
}

fn builtin_setattr(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [obj, name, value] = exact(vm, args, "setattr")?;
    vm.set_attribute(&obj, &attr_name(vm, &name)?, value)?;
    Ok(Value::None)
}

fn builtin_delattr(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [obj, name] = exact(vm, args, "delattr")?;
    vm.del_attribute(&obj, &attr_name(vm, &name)?)?;
    Ok(Value::None)
}

fn builtin_callable(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [value] = exact(vm, args, "callable")?;
    let callable = match &value {
        Value::Function(_) | Value::BoundMethod(_) | Value::Builtin(_) | Value::Class(_) => true,
        Value::Instance(_) => vm.get_special_method(&value, "__call__")?.is_some(),
        _ => false,
    };
    Ok(Value::Bool(callable))
}

fn truth_scan(vm: &VirtualMachine, args: FuncArgs, name: &str, stop_on: bool) -> PyResult {
    let [iterable] = exact(vm, args, name)?;
    let iterator = vm.get_iter(&iterable)?;
    while let Some(item) = vm.next(&iterator)? {
        if vm.is_true(&item)? == stop_on {
            return Ok(Value::Bool(stop_on));
        }
    }
    Ok(Value::Bool(!stop_on))
}

fn builtin_any(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    truth_scan(vm, args, "any", true)
}

fn builtin_all(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    truth_scan(vm, args, "all", false)
}

fn builtin_sum(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let start = args.take_keyword("start");
    let mut args = args.bind_positional("sum", 1, 2, vm)?.into_iter();
    let iterable = args.next().unwrap_or(Value::None);
    let mut total = args.next().or(start).unwrap_or(Value::from(0i64));
    if matches!(total, Value::Str(_)) {
        return Err(vm.new_type_error("sum() can't sum strings [use ''.join(seq) instead]"));
    }
    let iterator = vm.get_iter(&iterable)?;
    while let Some(item) = vm.next(&iterator)? {
        total = vm.binary_op(BinaryOperator::Add, &total, &item, false)?;
    }
    Ok(total)
}

fn builtin_abs(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [value] = exact(vm, args, "abs")?;
    match &value {
        Value::Bool(value) => Ok(Value::from(i64::from(*value))),
        Value::Int(value) => Ok(Value::Int(value.abs())),
        Value::Float(value) => Ok(Value::Float(value.abs())),
        Value::Complex(value) => Ok(Value::Float(value.norm())),
        _ => match vm.get_special_method(&value, "__abs__")? {
            Some(method) => vm.call(&method, Vec::new()),
            None => Err(vm.new_type_error(format!(
                "bad operand type for abs(): '{}'",
                vm.class_of(&value).name
            ))),
        },
    }
}

fn min_max(vm: &VirtualMachine, mut args: FuncArgs, name: &str, op: ComparisonOperator) -> PyResult {
    let key = args.take_keyword("key").filter(|key| !key.is_none());
    let default = args.take_keyword("default");
    let args = args.bind_positional(name, 1, usize::MAX, vm)?;
    let items = if args.len() == 1 {
        vm.collect(&args[0])?
    } else {
        if default.is_some() {
            return Err(vm.new_type_error(format!(
                "Cannot specify a default for {name}() with multiple positional arguments"
            )));
        }
        args
    };
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let rank = match &key {
            Some(key) => vm.call(key, vec![item.clone()])?,
            None => item.clone(),
        };
        let better = match &best {
            None => true,
            Some((best_rank, _)) => vm.compare_bool(op, &rank, best_rank)?,
        };
        if better {
            best = Some((rank, item));
        }
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(vm.new_value_error(format!("{name}() iterable argument is empty"))),
    }
}

fn builtin_min(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    min_max(vm, args, "min", ComparisonOperator::Less)
}

fn builtin_max(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    min_max(vm, args, "max", ComparisonOperator::Greater)
}

fn builtin_sorted(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let key = args.take_keyword("key");
    let reverse = match args.take_keyword("reverse") {
        Some(reverse) => vm.is_true(&reverse)?,
        None => false,
    };
    let [iterable] = exact(vm, args, "sorted")?;
    let items = vm.collect(&iterable)?;
    Ok(Value::new_list(vm.sort_values(items, key.as_ref(), reverse)?))
}

fn builtin_chr(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [code] = exact(vm, args, "chr")?;
    vm.to_bigint(&code)?
        .to_u32()
        .and_then(char::from_u32)
        .map(|c| Value::from(c.to_string()))
        .ok_or_else(|| vm.new_value_error("chr() arg not in range(0x110000)"))
}

fn builtin_ord(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [value] = exact(vm, args, "ord")?;
    let Value::Str(text) = &value else {
        return Err(vm.new_type_error(format!(
            "ord() expected string of length 1, but {} found",
            vm.class_of(&value).name
        )));
    };
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Value::from(i64::from(u32::from(c)))),
        _ => Err(vm.new_type_error(format!(
            "ord() expected a character, but string of length {} found",
            text.chars().count()
        ))),
    }
}

fn builtin_hash(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [value] = exact(vm, args, "hash")?;
    if let Value::Instance(_) = &value
        && let Some(method) = vm.get_special_method(&value, "__hash__")?
    {
        return vm.call(&method, Vec::new());
    }
    let key = vm.hash_key(&value)?;
    if let crate::dict::HashKey::Int(int) = &key
        && let Some(small) = int.to_i64()
    {
        return Ok(Value::from(if small == -1 { -2 } else { small }));
    }
    let hash = ahash::RandomState::with_seeds(1, 2, 3, 4).hash_one(&key);
    Ok(Value::from(hash as i64))
}

fn builtin_id(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [value] = exact(vm, args, "id")?;
    match value.address() {
        Some(address) => Ok(Value::from(address)),
        None => builtin_hash(vm, FuncArgs::from(vec![value])),
    }
}

fn builtin_divmod(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [a, b] = exact(vm, args, "divmod")?;
    let quotient = vm.binary_op(BinaryOperator::FloorDivide, &a, &b, false)?;
    let remainder = vm.binary_op(BinaryOperator::Remainder, &a, &b, false)?;
    Ok(Value::new_tuple(vec![quotient, remainder]))
}

fn builtin_pow(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let [base, exponent] = exact(vm, args, "pow")?;
    vm.binary_op(BinaryOperator::Power, &base, &exponent, false)
}

fn builtin_round(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let ndigits = args.take_keyword("ndigits");
    let mut args = args.bind_positional("round", 1, 2, vm)?.into_iter();
    let value = args.next().unwrap_or(Value::None);
    let ndigits = args.next().or(ndigits).filter(|ndigits| !ndigits.is_none());
    match (&value, ndigits) {
        (Value::Int(_) | Value::Bool(_), None) => Ok(Value::Int(vm.to_bigint(&value)?)),
        (Value::Int(_) | Value::Bool(_), Some(_)) => Ok(value.clone()),
        (Value::Float(float), None) => {
            if !float.is_finite() {
                return Err(vm.new_overflow_error("cannot convert float infinity or NaN to integer"));
            }
            BigInt::from_f64(float.round_ties_even())
                .map(Value::Int)
                .ok_or_else(|| vm.new_overflow_error("cannot convert float to integer"))
        }
        (Value::Float(float), Some(ndigits)) => {
            let ndigits = vm.to_isize(&ndigits)?.clamp(-308, 308) as i32;
            let scale = 10f64.powi(ndigits);
            let scaled = float * scale;
            if !scaled.is_finite() {
                return Ok(Value::Float(*float));
            }
            Ok(Value::Float(scaled.round_ties_even() / scale))
        }
        _ => match vm.get_special_method(&value, "__round__")? {
            Some(method) => vm.call(&method, Vec::new()),
            None => Err(vm.new_type_error(format!(
                "type {} doesn't define __round__ method",
                vm.class_of(&value).name
            ))),
        },
    }
}

fn list_of(vm: &VirtualMachine, value: &Value) -> PyResult<ListRef> {
    match value {
        Value::List(list) => Ok(list.clone()),
        other => Err(wrong_receiver(vm, "list", other)),
    }
}

fn list_append(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, args) = method(vm, args, "append", 1, 1)?;
    list_of(vm, &zelf)?.borrow_mut().extend(args);
    Ok(Value::None)
}

fn list_extend(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, args) = method(vm, args, "extend", 1, 1)?;
    let list = list_of(vm, &zelf)?;
    let items = vm.collect(&args[0])?;
    list.borrow_mut().extend(items);
    Ok(Value::None)
}

fn list_insert(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, args) = method(vm, args, "insert", 2, 2)?;
    let list = list_of(vm, &zelf)?;
    let mut list = list.borrow_mut();
    let len = list.len() as isize;
    let index = vm.to_isize(&args[0])?;
    let index = if index < 0 { (index + len).max(0) } else { index.min(len) };
    list.insert(index as usize, args[1].clone());
    Ok(Value::None)
}

fn list_pop(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, args) = method(vm, args, "pop", 0, 1)?;
    let list = list_of(vm, &zelf)?;
    let mut list = list.borrow_mut();
    if list.is_empty() {
        return Err(vm.new_index_error("pop from empty list"));
    }
    let len = list.len() as isize;
    let index = match args.first() {
        Some(index) => vm.to_isize(index)?,
        None => -1,
    };
    let index = if index < 0 { index + len } else { index };
    if !(0..len).contains(&index) {
        return Err(vm.new_index_error("pop index out of range"));
    }
    Ok(list.remove(index as usize))
}

/// Position of the first element equal to `needle`.
fn position(vm: &VirtualMachine, items: &[Value], needle: &Value) -> PyResult<Option<usize>> {
    for (index, item) in items.iter().enumerate() {
        if item.is(needle) || vm.eq(item, needle)? {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

fn list_remove(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, args) = method(vm, args, "remove", 1, 1)?;
    let list = list_of(vm, &zelf)?;
    let items = list.borrow().clone();
    match position(vm, &items, &args[0])? {
        Some(index) => {
            list.borrow_mut().remove(index);
            Ok(Value::None)
        }
        None => Err(vm.new_value_error("list.remove(x): x not in list")),
    }
}

fn list_reverse(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, _) = method(vm, args, "reverse", 0, 0)?;
    list_of(vm, &zelf)?.borrow_mut().reverse();
    Ok(Value::None)
}

fn list_clear(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, _) = method(vm, args, "clear", 0, 0)?;
    list_of(vm, &zelf)?.borrow_mut().clear();
    Ok(Value::None)
}

fn list_copy(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, _) = method(vm, args, "copy", 0, 0)?;
    let items = list_of(vm, &zelf)?.borrow().clone();
    Ok(Value::new_list(items))
}

fn list_sort(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let key = args.take_keyword("key");
    let reverse = match args.take_keyword("reverse") {
        Some(reverse) => vm.is_true(&reverse)?,
        None => false,
    };
    let (zelf, _) = method(vm, args, "sort", 0, 0)?;
    let list = list_of(vm, &zelf)?;
    let items = core::mem::take(&mut *list.borrow_mut());
    let sorted = vm.sort_values(items.clone(), key.as_ref(), reverse);
    let mut list = list.borrow_mut();
    match sorted {
        Ok(sorted) => *list = sorted,
        Err(error) => {
            *list = items;
            return Err(error);
        }
    }
    Ok(Value::None)
}

fn sequence_items(vm: &VirtualMachine, value: &Value) -> PyResult<Vec<Value>> {
    match value {
        Value::List(list) => Ok(list.borrow().clone()),
        Value::Tuple(items) => Ok(items.to_vec()),
        other => Err(wrong_receiver(vm, "list", other)),
    }
}

fn sequence_count(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, args) = method(vm, args, "count", 1, 1)?;
    let mut count = 0usize;
    for item in sequence_items(vm, &zelf)? {
        if item.is(&args[0]) || vm.eq(&item, &args[0])? {
            count += 1;
        }
    }
    Ok(Value::from(count))
}

fn sequence_index(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, args) = method(vm, args, "index", 1, 1)?;
    let items = sequence_items(vm, &zelf)?;
    match position(vm, &items, &args[0])? {
        Some(index) => Ok(Value::from(index)),
        None => {
            let kind = vm.class_of(&zelf).name.clone();
            Err(vm.new_value_error(format!("{kind}.index(x): x not in {kind}")))
        }
    }
}

fn dict_of(vm: &VirtualMachine, value: &Value) -> PyResult<crate::value::DictRef> {
    match value {
        Value::Dict(dict) => Ok(dict.clone()),
        other => Err(wrong_receiver(vm, "dict", other)),
    }
}

fn dict_get(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, args) = method(vm, args, "get", 1, 2)?;
    let dict = dict_of(vm, &zelf)?;
    let key = vm.hash_key(&args[0])?;
    let found = dict.borrow().get(&key).cloned();
    Ok(found.or_else(|| args.get(1).cloned()).unwrap_or(Value::None))
}

fn dict_keys(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, _) = method(vm, args, "keys", 0, 0)?;
    Ok(Value::new_list(dict_of(vm, &zelf)?.borrow().keys()))
}

fn dict_values(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, _) = method(vm, args, "values", 0, 0)?;
    Ok(Value::new_list(dict_of(vm, &zelf)?.borrow().values()))
}

fn dict_items(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, _) = method(vm, args, "items", 0, 0)?;
    let items = dict_of(vm, &zelf)?
        .borrow()
        .items()
        .map(|(_, key, value)| Value::new_tuple(vec![key.clone(), value.clone()]))
        .collect();
    Ok(Value::new_list(items))
}

fn dict_pop(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, args) = method(vm, args, "pop", 1, 2)?;
    let dict = dict_of(vm, &zelf)?;
    let key = vm.hash_key(&args[0])?;
    let removed = dict.borrow_mut().remove(&key);
    match (removed, args.get(1)) {
        (Some((_, value)), _) => Ok(value),
        (None, Some(default)) => Ok(default.clone()),
        (None, None) => Err(vm.new_key_error(args[0].clone())),
    }
}

fn dict_setdefault(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, args) = method(vm, args, "setdefault", 1, 2)?;
    let dict = dict_of(vm, &zelf)?;
    let key = vm.hash_key(&args[0])?;
    if let Some(value) = dict.borrow().get(&key) {
        return Ok(value.clone());
    }
    let default = args.get(1).cloned().unwrap_or(Value::None);
    dict.borrow_mut().insert(key, args[0].clone(), default.clone());
    Ok(default)
}

fn dict_update(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let kwargs = core::mem::take(&mut args.kwargs);
    let (zelf, args) = method(vm, args, "update", 0, 1)?;
    let dict = dict_of(vm, &zelf)?;
    let mut updated = dict.borrow().clone();
    if let Some(source) = args.first() {
        vm.dict_update(&mut updated, source)?;
    }
    for (key, value) in kwargs {
        updated.set_str(&key, value);
    }
    *dict.borrow_mut() = updated;
    Ok(Value::None)
}

fn dict_copy(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, _) = method(vm, args, "copy", 0, 0)?;
    let copy = dict_of(vm, &zelf)?.borrow().clone();
    Ok(Value::new_dict(copy))
}

fn dict_clear(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, _) = method(vm, args, "clear", 0, 0)?;
    dict_of(vm, &zelf)?.borrow_mut().clear();
    Ok(Value::None)
}

fn set_of(vm: &VirtualMachine, value: &Value) -> PyResult<crate::value::SetRef> {
    match value {
        Value::Set(set) => Ok(set.clone()),
        other => Err(wrong_receiver(vm, "set", other)),
    }
}

fn set_add(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, args) = method(vm, args, "add", 1, 1)?;
    let set = set_of(vm, &zelf)?;
    let key = vm.hash_key(&args[0])?;
    set.borrow_mut().insert(key, args[0].clone());
    Ok(Value::None)
}

fn set_discard(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, args) = method(vm, args, "discard", 1, 1)?;
    let key = vm.hash_key(&args[0])?;
    set_of(vm, &zelf)?.borrow_mut().remove(&key);
    Ok(Value::None)
}

fn set_remove(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, args) = method(vm, args, "remove", 1, 1)?;
    let key = vm.hash_key(&args[0])?;
    match set_of(vm, &zelf)?.borrow_mut().remove(&key) {
        Some(_) => Ok(Value::None),
        None => Err(vm.new_key_error(args[0].clone())),
    }
}

fn set_pop(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, _) = method(vm, args, "pop", 0, 0)?;
    let popped = set_of(vm, &zelf)?.borrow_mut().pop();
    popped.ok_or_else(|| {
        vm.new_exception_msg(&vm.exceptions.key_error, "pop from an empty set")
    })
}

fn set_clear(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, _) = method(vm, args, "clear", 0, 0)?;
    set_of(vm, &zelf)?.borrow_mut().clear();
    Ok(Value::None)
}

fn set_copy(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, _) = method(vm, args, "copy", 0, 0)?;
    let copy = set_of(vm, &zelf)?.borrow().clone();
    Ok(Value::new_set(copy))
}

/// Receiver and argument sets of a multi-argument set method.
fn set_operands(vm: &VirtualMachine, args: FuncArgs, name: &str) -> PyResult<(crate::value::SetRef, Vec<PySet>)> {
    let (zelf, others) = method(vm, args, name, 0, usize::MAX)?;
    let set = set_of(vm, &zelf)?;
    let others = others
        .iter()
        .map(|other| vm.collect(other).and_then(|items| vm.set_from_values(items)))
        .collect::<PyResult<Vec<_>>>()?;
    Ok((set, others))
}

fn set_update(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (set, others) = set_operands(vm, args, "update")?;
    let mut set = set.borrow_mut();
    for other in others {
        for (key, value) in other.iter() {
            set.insert(key.clone(), value.clone());
        }
    }
    Ok(Value::None)
}

fn set_union(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (set, others) = set_operands(vm, args, "union")?;
    let mut result = set.borrow().clone();
    for other in others {
        for (key, value) in other.iter() {
            result.insert(key.clone(), value.clone());
        }
    }
    Ok(Value::new_set(result))
}

fn set_intersection(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (set, others) = set_operands(vm, args, "intersection")?;
    let mut result = PySet::default();
    for (key, value) in set.borrow().iter() {
        if others.iter().all(|other| other.contains(key)) {
            result.insert(key.clone(), value.clone());
        }
    }
    Ok(Value::new_set(result))
}

fn set_difference(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (set, others) = set_operands(vm, args, "difference")?;
    let mut result = PySet::default();
    for (key, value) in set.borrow().iter() {
        if !others.iter().any(|other| other.contains(key)) {
            result.insert(key.clone(), value.clone());
        }
    }
    Ok(Value::new_set(result))
}

fn str_of(vm: &VirtualMachine, value: &Value) -> PyResult<Rc<str>> {
    match value {
        Value::Str(text) => Ok(text.clone()),
        other => Err(wrong_receiver(vm, "str", other)),
    }
}

fn str_arg(vm: &VirtualMachine, value: &Value, name: &str) -> PyResult<Rc<str>> {
    match value {
        Value::Str(text) => Ok(text.clone()),
        other => Err(vm.new_type_error(format!(
            "{name}() argument must be str, not {}",
            vm.class_of(other).name
        ))),
    }
}

/// `None` or a string argument.
fn optional_str(vm: &VirtualMachine, value: Option<&Value>, name: &str) -> PyResult<Option<Rc<str>>> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(value) => str_arg(vm, value, name).map(Some),
    }
}

fn str_join(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, args) = method(vm, args, "join", 1, 1)?;
    let separator = str_of(vm, &zelf)?;
    let items = vm.collect(&args[0])?;
    join_str(vm, &separator, &items).map(Value::from)
}

fn str_format(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    if args.args.is_empty() {
        return Err(vm.new_type_error("unbound method format() needs an argument"));
    }
    let template = str_of(vm, &args.args.remove(0))?;
    format_template(vm, &template, &args).map(Value::from)
}

fn str_split(vm: &VirtualMachine, mut args: FuncArgs) -> PyResult {
    let maxsplit = args.take_keyword("maxsplit");
    let sep = args.take_keyword("sep");
    let (zelf, args) = method(vm, args, "split", 0, 2)?;
    let text = str_of(vm, &zelf)?;
    let sep = optional_str(vm, args.first().or(sep.as_ref()), "split")?;
    let maxsplit = match args.get(1).or(maxsplit.as_ref()) {
        Some(limit) => vm.to_isize(limit)?,
        None => -1,
    };
    let limit = usize::try_from(maxsplit).ok();
    let parts: Vec<Value> = match sep.as_deref() {
        Some("") => return Err(vm.new_value_error("empty separator")),
        Some(sep) => match limit {
            Some(limit) => text.splitn(limit + 1, sep).map(Value::from).collect(),
            None => text.split(sep).map(Value::from).collect(),
        },
        None => {
            let mut parts = Vec::new();
            let mut rest = text.trim_start();
            while !rest.is_empty() {
                if limit.is_some_and(|limit| parts.len() == limit) {
                    parts.push(Value::from(rest.trim_end()));
                    break;
                }
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                parts.push(Value::from(&rest[..end]));
                rest = rest[end..].trim_start();
            }
            parts
        }
    };
    Ok(Value::new_list(parts))
}

fn strip_with(vm: &VirtualMachine, args: FuncArgs, name: &str, left: bool, right: bool) -> PyResult {
    let (zelf, args) = method(vm, args, name, 0, 1)?;
    let text = str_of(vm, &zelf)?;
    let chars = optional_str(vm, args.first(), name)?;
    let matches = |c: char| match &chars {
        Some(chars) => chars.contains(c),
        None => c.is_whitespace(),
    };
    let mut stripped: &str = &text;
    if left {
        stripped = stripped.trim_start_matches(matches);
    }
    if right {
        stripped = stripped.trim_end_matches(matches);
    }
    Ok(Value::from(stripped))
}

fn str_strip(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    strip_with(vm, args, "strip", true, true)
}

fn str_lstrip(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    strip_with(vm, args, "lstrip", true, false)
}

fn str_rstrip(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    strip_with(vm, args, "rstrip", false, true)
}

fn affix_test(vm: &VirtualMachine, args: FuncArgs, name: &str, test: fn(&str, &str) -> bool) -> PyResult {
    let (zelf, args) = method(vm, args, name, 1, 1)?;
    let text = str_of(vm, &zelf)?;
    let candidates = match &args[0] {
        Value::Tuple(candidates) => candidates.to_vec(),
        other => vec![other.clone()],
    };
    for candidate in &candidates {
        if test(&text, &str_arg(vm, candidate, name)?) {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn str_startswith(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    affix_test(vm, args, "startswith", |text, prefix| text.starts_with(prefix))
}

fn str_endswith(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    affix_test(vm, args, "endswith", |text, suffix| text.ends_with(suffix))
}

fn str_map(vm: &VirtualMachine, args: FuncArgs, name: &str, map: fn(&str) -> String) -> PyResult {
    let (zelf, _) = method(vm, args, name, 0, 0)?;
    Ok(Value::from(map(&str_of(vm, &zelf)?)))
}

fn str_upper(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    str_map(vm, args, "upper", str::to_uppercase)
}

fn str_lower(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    str_map(vm, args, "lower", str::to_lowercase)
}

fn str_class(vm: &VirtualMachine, args: FuncArgs, name: &str, class: fn(char) -> bool) -> PyResult {
    let (zelf, _) = method(vm, args, name, 0, 0)?;
    let text = str_of(vm, &zelf)?;
    Ok(Value::Bool(!text.is_empty() && text.chars().all(class)))
}

fn str_isdigit(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    str_class(vm, args, "isdigit", |c| c.is_ascii_digit())
}

fn str_isalpha(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    str_class(vm, args, "isalpha", char::is_alphabetic)
}

fn str_isspace(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    str_class(vm, args, "isspace", char::is_whitespace)
}

fn str_replace(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, args) = method(vm, args, "replace", 2, 3)?;
    let text = str_of(vm, &zelf)?;
    let old = str_arg(vm, &args[0], "replace")?;
    let new = str_arg(vm, &args[1], "replace")?;
    let count = match args.get(2) {
        Some(count) => vm.to_isize(count)?,
        None => -1,
    };
    Ok(Value::from(match usize::try_from(count) {
        Ok(count) => text.replacen(&*old, &new, count),
        Err(_) => text.replace(&*old, &new),
    }))
}

fn str_find(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, args) = method(vm, args, "find", 1, 1)?;
    let text = str_of(vm, &zelf)?;
    let needle = str_arg(vm, &args[0], "find")?;
    Ok(match text.find(&*needle) {
        Some(byte) => Value::from(text[..byte].chars().count()),
        None => Value::from(-1i64),
    })
}

fn str_count(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, args) = method(vm, args, "count", 1, 1)?;
    let text = str_of(vm, &zelf)?;
    let needle = str_arg(vm, &args[0], "count")?;
    let count = if needle.is_empty() {
        text.chars().count() + 1
    } else {
        text.matches(&*needle).count()
    };
    Ok(Value::from(count))
}

fn iter_self(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, _) = method(vm, args, "__iter__", 0, 0)?;
    Ok(zelf)
}

fn iterator_next(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, _) = method(vm, args, "__next__", 0, 0)?;
    vm.next(&zelf)?
        .ok_or_else(|| vm.new_stop_iteration(Value::None))
}

fn generator_of(vm: &VirtualMachine, value: &Value) -> PyResult<Rc<crate::PyGenerator>> {
    match value {
        Value::Generator(generator) => Ok(generator.clone()),
        other => Err(wrong_receiver(vm, "generator", other)),
    }
}

fn yielded(vm: &VirtualMachine, result: PyResult<IterReturn>) -> PyResult {
    match result? {
        IterReturn::Yield(value) => Ok(value),
        IterReturn::Return(value) => Err(vm.new_stop_iteration(value)),
    }
}

fn generator_next(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, _) = method(vm, args, "__next__", 0, 0)?;
    yielded(vm, generator_of(vm, &zelf)?.send(vm, Value::None))
}

fn generator_send(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, args) = method(vm, args, "send", 1, 1)?;
    let value = args.into_iter().next().unwrap_or(Value::None);
    yielded(vm, generator_of(vm, &zelf)?.send(vm, value))
}

fn generator_throw(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, args) = method(vm, args, "throw", 1, 2)?;
    let generator = generator_of(vm, &zelf)?;
    let mut args = args.into_iter();
    let typ = args.next().unwrap_or(Value::None);
    let exc = match (typ, args.next()) {
        (Value::Class(class), Some(value)) if !value.is_none() && vm.is_exception_class(&class) => {
            if vm.is_instance(&value, &class) {
                value
            } else {
                vm.construct(&class, FuncArgs::from(vec![value]))?
            }
        }
        (typ, _) => typ,
    };
    yielded(vm, generator.throw(vm, exc))
}

fn generator_close(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, _) = method(vm, args, "close", 0, 0)?;
    generator_of(vm, &zelf)?.close(vm)?;
    Ok(Value::None)
}

fn property_getter(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, args) = method(vm, args, "getter", 1, 1)?;
    let Value::Descriptor(descriptor) = &zelf else {
        return Err(wrong_receiver(vm, "property", &zelf));
    };
    let PyDescriptor::Property { setter, .. } = &**descriptor else {
        return Err(wrong_receiver(vm, "property", &zelf));
    };
    Ok(Value::Descriptor(Rc::new(PyDescriptor::Property {
        getter: args[0].clone(),
        setter: setter.clone(),
    })))
}

fn property_setter(vm: &VirtualMachine, args: FuncArgs) -> PyResult {
    let (zelf, args) = method(vm, args, "setter", 1, 1)?;
    let Value::Descriptor(descriptor) = &zelf else {
        return Err(wrong_receiver(vm, "property", &zelf));
    };
    let PyDescriptor::Property { getter, .. } = &**descriptor else {
        return Err(wrong_receiver(vm, "property", &zelf));
    };
    Ok(Value::Descriptor(Rc::new(PyDescriptor::Property {
        getter: getter.clone(),
        setter: Some(args[0].clone()),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Interpreter, Settings};

    fn call(vm: &VirtualMachine, name: &str, args: Vec<Value>) -> PyResult {
        let func = vm.builtins.borrow().get_str(name).unwrap();
        vm.call(&func, args)
    }

    fn repr(vm: &VirtualMachine, result: PyResult) -> String {
        vm.repr(&result.unwrap()).unwrap()
    }

    #[test]
    fn int_parses_prefixes_and_underscores() {
        Interpreter::new(Settings::default()).enter(|vm| {
            assert!(matches!(parse_int(vm, " -1_000 ", 10), Ok(Value::Int(v)) if v == BigInt::from(-1000)));
            assert!(matches!(parse_int(vm, "0x1f", 0), Ok(Value::Int(v)) if v == BigInt::from(31)));
            assert!(matches!(parse_int(vm, "ff", 16), Ok(Value::Int(v)) if v == BigInt::from(255)));
            assert!(parse_int(vm, "1__0", 10).is_err());
            assert!(parse_int(vm, "", 10).is_err());
        });
    }

    #[test]
    fn floats_parse_specials() {
        assert_eq!(parse_float(" 1.5 "), Some(1.5));
        assert_eq!(parse_float("-inf"), Some(f64::NEG_INFINITY));
        assert!(parse_float("nan").is_some_and(f64::is_nan));
        assert_eq!(parse_float("1e"), None);
    }

    #[test]
    fn min_and_max_take_keys() {
        Interpreter::new(Settings::default()).enter(|vm| {
            let items = Value::new_list(vec![Value::from(3i64), Value::from(-5i64), Value::from(4i64)]);
            assert_eq!(repr(vm, call(vm, "min", vec![items.clone()])), "-5");
            assert_eq!(repr(vm, call(vm, "max", vec![items.clone()])), "4");
            let abs = vm.builtins.borrow().get_str("abs").unwrap();
            let mut args = FuncArgs::from(vec![items]);
            args.kwargs.insert("key".to_owned(), abs);
            let max = vm.builtins.borrow().get_str("max").unwrap();
            assert_eq!(repr(vm, vm.call(&max, args)), "-5");
            assert!(call(vm, "min", vec![Value::new_list(Vec::new())]).is_err());
        });
    }

    #[test]
    fn rounding_is_bankers() {
        Interpreter::new(Settings::default()).enter(|vm| {
            assert_eq!(repr(vm, call(vm, "round", vec![Value::Float(2.5)])), "2");
            assert_eq!(repr(vm, call(vm, "round", vec![Value::Float(3.5)])), "4");
            assert_eq!(
                repr(vm, call(vm, "round", vec![Value::Float(1.25), Value::from(1i64)])),
                "1.2"
            );
        });
    }

    #[test]
    fn string_methods() {
        Interpreter::new(Settings::default()).enter(|vm| {
            let text = Value::from("  a b  c ");
            assert_eq!(repr(vm, vm.call_method(&text, "split", Vec::new())), "['a', 'b', 'c']");
            assert_eq!(repr(vm, vm.call_method(&text, "strip", Vec::new())), "'a b  c'");
            let csv = Value::from("x,y,,z");
            assert_eq!(
                repr(vm, vm.call_method(&csv, "split", vec![Value::from(","), Value::from(1i64)])),
                "['x', 'y,,z']"
            );
            assert_eq!(repr(vm, vm.call_method(&csv, "find", vec![Value::from("z")])), "5");
        });
    }

    #[test]
    fn hex_and_friends() {
        Interpreter::new(Settings::default()).enter(|vm| {
            assert_eq!(repr(vm, call(vm, "hex", vec![Value::from(255i64)])), "'0xff'");
            assert_eq!(repr(vm, call(vm, "bin", vec![Value::from(-5i64)])), "'-0b101'");
            assert_eq!(repr(vm, call(vm, "oct", vec![Value::from(8i64)])), "'0o10'");
        });
    }
}
