//! Classes, instances and attribute access.

use crate::{
    IndexMap, PyResult, Unwind, VirtualMachine,
    function::{FuncArgs, PyBoundMethod},
    value::{DictRef, PyDescriptor, PySuper, Value},
};
use alloc::rc::Rc;
use core::{cell::RefCell, fmt, iter};

pub type AttrMap = IndexMap<String, Value>;

/// The native layout behind a class; user classes inherit theirs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BuiltinType {
    Object,
    Type,
    NoneType,
    Bool,
    Int,
    Float,
    Complex,
    Str,
    Bytes,
    Tuple,
    List,
    Dict,
    Set,
    Range,
    Slice,
    Function,
    BuiltinFunction,
    Method,
    Generator,
    Iterator,
    Module,
    Super,
    Property,
    StaticMethod,
    ClassMethod,
    Ellipsis,
    NotImplementedType,
    BaseException,
}

pub struct PyClass {
    pub name: String,
    pub qualname: String,
    pub bases: Vec<Rc<PyClass>>,
    /// Linearized ancestors, nearest first, not including the class itself.
    mro: Vec<Rc<PyClass>>,
    pub attributes: RefCell<AttrMap>,
    pub native: Option<BuiltinType>,
}

impl fmt::Debug for PyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class '{}'>", self.name)
    }
}

/// C3 linearization of `bases`.
fn linearize(bases: &[Rc<PyClass>]) -> Option<Vec<Rc<PyClass>>> {
    let mut sequences: Vec<Vec<Rc<PyClass>>> = bases
        .iter()
        .map(|base| base.iter_mro().cloned().collect())
        .collect();
    sequences.push(bases.to_vec());
    let mut result = Vec::new();
    loop {
        sequences.retain(|sequence| !sequence.is_empty());
        if sequences.is_empty() {
            return Some(result);
        }
        let candidate = sequences
            .iter()
            .map(|sequence| &sequence[0])
            .find(|head| {
                !sequences
                    .iter()
                    .any(|sequence| sequence[1..].iter().any(|class| Rc::ptr_eq(class, head)))
            })?
            .clone();
        for sequence in &mut sequences {
            if Rc::ptr_eq(&sequence[0], &candidate) {
                sequence.remove(0);
            }
        }
        result.push(candidate);
    }
}

impl PyClass {
    pub(crate) fn new_builtin(
        name: &str,
        base: Option<&Rc<Self>>,
        native: Option<BuiltinType>,
    ) -> Rc<Self> {
        let bases: Vec<Rc<Self>> = base.into_iter().cloned().collect();
        let mro = bases
            .first()
            .map(|base| base.iter_mro().cloned().collect())
            .unwrap_or_default();
        Rc::new(Self {
            name: name.to_owned(),
            qualname: name.to_owned(),
            bases,
            mro,
            attributes: RefCell::default(),
            native,
        })
    }

    pub fn new(
        name: String,
        qualname: String,
        bases: Vec<Rc<Self>>,
        attributes: AttrMap,
    ) -> Option<Rc<Self>> {
        let mro = linearize(&bases)?;
        Some(Rc::new(Self {
            name,
            qualname,
            bases,
            mro,
            attributes: RefCell::new(attributes),
            native: None,
        }))
    }

    pub fn iter_mro<'a>(self: &'a Rc<Self>) -> impl Iterator<Item = &'a Rc<Self>> {
        iter::once(self).chain(self.mro.iter())
    }

    pub fn lookup(self: &Rc<Self>, name: &str) -> Option<Value> {
        self.iter_mro()
            .find_map(|class| class.attributes.borrow().get(name).cloned())
    }

    pub fn is_subclass(self: &Rc<Self>, other: &Rc<Self>) -> bool {
        self.iter_mro().any(|class| Rc::ptr_eq(class, other))
    }

    pub fn native_type(self: &Rc<Self>) -> BuiltinType {
        self.iter_mro()
            .find_map(|class| class.native)
            .unwrap_or(BuiltinType::Object)
    }

    pub fn set_attr(&self, name: &str, value: Value) {
        self.attributes.borrow_mut().insert(name.to_owned(), value);
    }
}

#[derive(Debug)]
pub struct PyInstance {
    pub class: Rc<PyClass>,
    pub attributes: RefCell<AttrMap>,
}

impl PyInstance {
    pub fn new(class: Rc<PyClass>) -> Self {
        Self {
            class,
            attributes: RefCell::default(),
        }
    }

    pub fn get_attr(&self, name: &str) -> Option<Value> {
        self.attributes.borrow().get(name).cloned()
    }

    pub fn set_attr(&self, name: &str, value: Value) {
        self.attributes.borrow_mut().insert(name.to_owned(), value);
    }
}

/// Type objects of every builtin value kind.
pub struct TypeZoo {
    pub object: Rc<PyClass>,
    pub type_: Rc<PyClass>,
    pub none: Rc<PyClass>,
    pub bool_: Rc<PyClass>,
    pub int: Rc<PyClass>,
    pub float: Rc<PyClass>,
    pub complex: Rc<PyClass>,
    pub str_: Rc<PyClass>,
    pub bytes: Rc<PyClass>,
    pub tuple: Rc<PyClass>,
    pub list: Rc<PyClass>,
    pub dict: Rc<PyClass>,
    pub set: Rc<PyClass>,
    pub range: Rc<PyClass>,
    pub slice: Rc<PyClass>,
    pub function: Rc<PyClass>,
    pub builtin_function: Rc<PyClass>,
    pub method: Rc<PyClass>,
    pub generator: Rc<PyClass>,
    pub iterator: Rc<PyClass>,
    pub module: Rc<PyClass>,
    pub super_: Rc<PyClass>,
    pub property: Rc<PyClass>,
    pub staticmethod: Rc<PyClass>,
    pub classmethod: Rc<PyClass>,
    pub ellipsis: Rc<PyClass>,
    pub not_implemented: Rc<PyClass>,
}

impl TypeZoo {
    pub(crate) fn new() -> Self {
        use BuiltinType::*;
        let object = PyClass::new_builtin("object", None, Some(Object));
        let new = |name, native| PyClass::new_builtin(name, Some(&object), Some(native));
        let int = new("int", Int);
        Self {
            type_: new("type", Type),
            none: new("NoneType", NoneType),
            bool_: PyClass::new_builtin("bool", Some(&int), Some(Bool)),
            float: new("float", Float),
            complex: new("complex", Complex),
            str_: new("str", Str),
            bytes: new("bytes", Bytes),
            tuple: new("tuple", Tuple),
            list: new("list", List),
            dict: new("dict", Dict),
            set: new("set", Set),
            range: new("range", Range),
            slice: new("slice", Slice),
            function: new("function", Function),
            builtin_function: new("builtin_function_or_method", BuiltinFunction),
            method: new("method", Method),
            generator: new("generator", Generator),
            iterator: new("iterator", Iterator),
            module: new("module", Module),
            super_: new("super", Super),
            property: new("property", Property),
            staticmethod: new("staticmethod", StaticMethod),
            classmethod: new("classmethod", ClassMethod),
            ellipsis: new("ellipsis", Ellipsis),
            not_implemented: new("NotImplementedType", NotImplementedType),
            int,
            object,
        }
    }
}

impl VirtualMachine {
    pub fn class_of(&self, value: &Value) -> Rc<PyClass> {
        let types = &self.types;
        match value {
            Value::None => &types.none,
            Value::Ellipsis => &types.ellipsis,
            Value::NotImplemented => &types.not_implemented,
            Value::Bool(_) => &types.bool_,
            Value::Int(_) => &types.int,
            Value::Float(_) => &types.float,
            Value::Complex(_) => &types.complex,
            Value::Str(_) => &types.str_,
            Value::Bytes(_) => &types.bytes,
            Value::Tuple(_) => &types.tuple,
            Value::List(_) => &types.list,
            Value::Dict(_) => &types.dict,
            Value::Set(_) => &types.set,
            Value::Range(_) => &types.range,
            Value::Slice(_) => &types.slice,
            Value::Function(_) => &types.function,
            Value::BoundMethod(_) => &types.method,
            Value::Builtin(_) => &types.builtin_function,
            Value::Class(_) => &types.type_,
            Value::Instance(instance) => &instance.class,
            Value::Generator(_) => &types.generator,
            Value::Iterator(_) => &types.iterator,
            Value::Module(_) => &types.module,
            Value::Super(_) => &types.super_,
            Value::Descriptor(descriptor) => match **descriptor {
                PyDescriptor::Property { .. } => &types.property,
                PyDescriptor::StaticMethod(_) => &types.staticmethod,
                PyDescriptor::ClassMethod(_) => &types.classmethod,
            },
        }
        .clone()
    }

    pub fn is_instance(&self, value: &Value, class: &Rc<PyClass>) -> bool {
        self.class_of(value).is_subclass(class)
    }

    /// Creates a class from the namespace its body filled.
    pub fn new_class(
        &self,
        name: &str,
        mut bases: Vec<Rc<PyClass>>,
        namespace: &DictRef,
    ) -> PyResult<Rc<PyClass>> {
        for base in &bases {
            let native = base.native_type();
            if !matches!(native, BuiltinType::Object | BuiltinType::BaseException) {
                return Err(self.new_type_error(format!(
                    "arbor cannot subclass builtin type '{}'",
                    base.name
                )));
            }
        }
        if bases.is_empty() {
            bases.push(self.types.object.clone());
        }
        let mut attributes = AttrMap::default();
        for (_, key, value) in namespace.borrow().items() {
            if let Value::Str(key) = key {
                attributes.insert(key.to_string(), value.clone());
            }
        }
        let qualname = match attributes.get("__qualname__") {
            Some(Value::Str(qualname)) => qualname.to_string(),
            _ => name.to_owned(),
        };
        PyClass::new(name.to_owned(), qualname, bases, attributes).ok_or_else(|| {
            self.new_type_error(
                "Cannot create a consistent method resolution order (MRO) for bases",
            )
        })
    }

    /// What a class attribute turns into when read through an instance.
    fn bind_attribute(&self, attr: Value, obj: &Value, class: &Rc<PyClass>) -> PyResult {
        Ok(match attr {
            Value::Function(_) => Value::BoundMethod(Rc::new(PyBoundMethod {
                receiver: obj.clone(),
                function: attr,
            })),
            Value::Builtin(builtin) if builtin.receiver.is_none() => {
                Value::Builtin(Rc::new(builtin.bind(obj.clone())))
            }
            Value::Descriptor(descriptor) => match &*descriptor {
                PyDescriptor::Property { getter, .. } => self.call(getter, vec![obj.clone()])?,
                PyDescriptor::StaticMethod(function) => function.clone(),
                PyDescriptor::ClassMethod(function) => Value::BoundMethod(Rc::new(PyBoundMethod {
                    receiver: Value::Class(class.clone()),
                    function: function.clone(),
                })),
            },
            attr => attr,
        })
    }

    /// Reads a class attribute off the class itself.
    fn class_attribute(&self, class: &Rc<PyClass>, attr: Value) -> Value {
        match &attr {
            Value::Descriptor(descriptor) => match &**descriptor {
                PyDescriptor::StaticMethod(function) => function.clone(),
                PyDescriptor::ClassMethod(function) => Value::BoundMethod(Rc::new(PyBoundMethod {
                    receiver: Value::Class(class.clone()),
                    function: function.clone(),
                })),
                PyDescriptor::Property { .. } => attr,
            },
            _ => attr,
        }
    }

    pub fn get_attribute(&self, obj: &Value, name: &str) -> PyResult {
        self.get_attribute_opt(obj, name)?.ok_or_else(|| {
            let message = match obj {
                Value::Class(class) => {
                    format!("type object '{}' has no attribute '{name}'", class.name)
                }
                Value::Module(module) => {
                    format!("module '{}' has no attribute '{name}'", module.name)
                }
                _ => format!(
                    "'{}' object has no attribute '{name}'",
                    self.class_of(obj).name
                ),
            };
            self.new_attribute_error(message)
        })
    }

    pub fn get_attribute_opt(&self, obj: &Value, name: &str) -> PyResult<Option<Value>> {
        if name == "__class__" {
            return Ok(Some(Value::Class(self.class_of(obj))));
        }
        match obj {
            Value::Instance(instance) => {
                let class_attr = instance.class.lookup(name);
                if let Some(Value::Descriptor(descriptor)) = &class_attr
                    && let PyDescriptor::Property { getter, .. } = &**descriptor
                {
                    return self.call(getter, vec![obj.clone()]).map(Some);
                }
                if let Some(value) = instance.get_attr(name) {
                    return Ok(Some(value));
                }
                if let Some(attr) = class_attr {
                    return self.bind_attribute(attr, obj, &instance.class).map(Some);
                }
                if name != "__getattr__"
                    && let Some(getattr) = instance.class.lookup("__getattr__")
                {
                    let getattr = self.bind_attribute(getattr, obj, &instance.class)?;
                    return match self.call(&getattr, vec![Value::new_str(name)]) {
                        Ok(value) => Ok(Some(value)),
                        Err(Unwind::Exception(exc))
                            if self.is_instance(&exc, &self.exceptions.attribute_error) =>
                        {
                            Ok(None)
                        }
                        Err(error) => Err(error),
                    };
                }
                Ok(None)
            }
            Value::Class(class) => Ok(match name {
                "__name__" => Some(Value::new_str(&class.name)),
                "__qualname__" => Some(Value::new_str(&class.qualname)),
                "__bases__" => Some(Value::new_tuple(
                    class.bases.iter().cloned().map(Value::Class).collect(),
                )),
                "__mro__" => Some(Value::new_tuple(
                    class.iter_mro().cloned().map(Value::Class).collect(),
                )),
                _ => class
                    .lookup(name)
                    .map(|attr| self.class_attribute(class, attr)),
            }),
            Value::Module(module) => Ok(module.globals.borrow().get_str(name)),
            Value::Super(sup) => self.super_attribute(sup, name),
            Value::Function(function) => Ok(match name {
                "__name__" => Some(Value::new_str(&function.name)),
                "__qualname__" => Some(Value::new_str(&function.qualname)),
                "__doc__" => Some(function.doc.as_deref().map_or(Value::None, Value::from)),
                _ => None,
            }),
            Value::BoundMethod(method) => Ok(match name {
                "__self__" => Some(method.receiver.clone()),
                "__func__" => Some(method.function.clone()),
                _ => self.get_attribute_opt(&method.function, name)?,
            }),
            Value::Builtin(builtin) => Ok(match name {
                "__name__" => Some(Value::new_str(builtin.name)),
                "__self__" => builtin.receiver.clone(),
                _ => None,
            }),
            _ => {
                let class = self.class_of(obj);
                match class.lookup(name) {
                    Some(attr) => self.bind_attribute(attr, obj, &class).map(Some),
                    None => Ok(None),
                }
            }
        }
    }

    fn super_attribute(&self, sup: &PySuper, name: &str) -> PyResult<Option<Value>> {
        let start = match &sup.obj {
            Value::Class(class) => class.clone(),
            obj => self.class_of(obj),
        };
        let found = start
            .iter_mro()
            .skip_while(|class| !Rc::ptr_eq(class, &sup.class))
            .skip(1)
            .find_map(|class| class.attributes.borrow().get(name).cloned());
        let Some(attr) = found else {
            return Ok(None);
        };
        if matches!(sup.obj, Value::Class(_)) {
            return Ok(Some(self.class_attribute(&start, attr)));
        }
        self.bind_attribute(attr, &sup.obj, &start).map(Some)
    }

    pub fn set_attribute(&self, obj: &Value, name: &str, value: Value) -> PyResult<()> {
        match obj {
            Value::Instance(instance) => {
                if let Some(Value::Descriptor(descriptor)) = instance.class.lookup(name)
                    && let PyDescriptor::Property { setter, .. } = &*descriptor
                {
                    let Some(setter) = setter else {
                        return Err(self.new_attribute_error(format!(
                            "property '{name}' of '{}' object has no setter",
                            instance.class.name
                        )));
                    };
                    self.call(setter, vec![obj.clone(), value])?;
                    return Ok(());
                }
                instance.set_attr(name, value);
                Ok(())
            }
            Value::Class(class) if class.native.is_none() => {
                class.set_attr(name, value);
                Ok(())
            }
            Value::Module(module) => {
                module.globals.borrow_mut().set_str(name, value);
                Ok(())
            }
            _ => Err(self.new_attribute_error(format!(
                "'{}' object has no attribute '{name}' and no __dict__ for setting new attributes",
                self.class_of(obj).name
            ))),
        }
    }

    pub fn del_attribute(&self, obj: &Value, name: &str) -> PyResult<()> {
        let removed = match obj {
            Value::Instance(instance) => instance.attributes.borrow_mut().shift_remove(name),
            Value::Class(class) if class.native.is_none() => {
                class.attributes.borrow_mut().shift_remove(name)
            }
            Value::Module(module) => module.globals.borrow_mut().remove_str(name),
            _ => None,
        };
        match removed {
            Some(_) => Ok(()),
            None => Err(self.new_attribute_error(format!(
                "'{}' object has no attribute '{name}'",
                self.class_of(obj).name
            ))),
        }
    }

    /// Looks `name` up on the type of `obj`, the way special methods are
    /// found.
    pub fn get_special_method(&self, obj: &Value, name: &str) -> PyResult<Option<Value>> {
        let class = self.class_of(obj);
        match class.lookup(name) {
            Some(attr) => self.bind_attribute(attr, obj, &class).map(Some),
            None => Ok(None),
        }
    }

    pub fn call_method(&self, obj: &Value, name: &str, args: impl Into<FuncArgs>) -> PyResult {
        let method = self.get_attribute(obj, name)?;
        self.call(&method, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(name: &str, bases: &[&Rc<PyClass>]) -> Rc<PyClass> {
        PyClass::new(
            name.to_owned(),
            name.to_owned(),
            bases.iter().map(|&base| base.clone()).collect(),
            AttrMap::default(),
        )
        .unwrap()
    }

    fn names(class: &Rc<PyClass>) -> Vec<&str> {
        class.iter_mro().map(|class| class.name.as_str()).collect()
    }

    #[test]
    fn diamond_linearizes_like_c3() {
        let object = PyClass::new_builtin("object", None, Some(BuiltinType::Object));
        let a = class("A", &[&object]);
        let b = class("B", &[&a]);
        let c = class("C", &[&a]);
        let d = class("D", &[&b, &c]);
        assert_eq!(names(&d), ["D", "B", "C", "A", "object"]);
        assert!(d.is_subclass(&a));
        assert!(!a.is_subclass(&d));
    }

    #[test]
    fn inconsistent_order_is_rejected() {
        let object = PyClass::new_builtin("object", None, Some(BuiltinType::Object));
        let a = class("A", &[&object]);
        let b = class("B", &[&a]);
        assert!(
            PyClass::new("C".to_owned(), "C".to_owned(), vec![a, b], AttrMap::default()).is_none()
        );
    }

    #[test]
    fn native_type_is_inherited() {
        let types = TypeZoo::new();
        assert_eq!(types.bool_.native_type(), BuiltinType::Bool);
        assert!(types.bool_.is_subclass(&types.int));
        let user = class("A", &[&types.object]);
        assert_eq!(user.native_type(), BuiltinType::Object);
    }
}
