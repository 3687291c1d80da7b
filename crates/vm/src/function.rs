//! Callables and argument binding.

use crate::{
    IndexMap, PyResult, VirtualMachine,
    dict::PyDict,
    value::{CellRef, DictRef, Value},
};
use alloc::{rc::Rc, sync::Arc};
use arbor_compiler_core::tree::{CodeFlags, CodeObject};
use itertools::Itertools;

pub type NativeFn = fn(&VirtualMachine, FuncArgs) -> PyResult;

/// Arguments of one call, after `*` and `**` unpacking.
#[derive(Debug, Default, Clone)]
pub struct FuncArgs {
    pub args: Vec<Value>,
    pub kwargs: IndexMap<String, Value>,
}

impl From<Vec<Value>> for FuncArgs {
    fn from(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: IndexMap::default(),
        }
    }
}

impl FuncArgs {
    pub fn new(args: Vec<Value>, kwargs: IndexMap<String, Value>) -> Self {
        Self { args, kwargs }
    }

    pub fn prepend_arg(&mut self, arg: Value) {
        self.args.insert(0, arg);
    }

    pub fn take_keyword(&mut self, name: &str) -> Option<Value> {
        self.kwargs.shift_remove(name)
    }

    /// Checks the positional count of a builtin and rejects leftover
    /// keyword arguments.
    pub fn bind_positional(
        self,
        name: &str,
        min: usize,
        max: usize,
        vm: &VirtualMachine,
    ) -> PyResult<Vec<Value>> {
        if let Some(keyword) = self.kwargs.keys().next() {
            return Err(vm.new_type_error(format!(
                "{name}() got an unexpected keyword argument '{keyword}'"
            )));
        }
        let given = self.args.len();
        if given < min || given > max {
            let expected = if min == max {
                format!("exactly {min}")
            } else if given < min {
                format!("at least {min}")
            } else {
                format!("at most {max}")
            };
            let plural = if expected.ends_with(" 1") { "" } else { "s" };
            return Err(vm.new_type_error(format!(
                "{name}() takes {expected} argument{plural} ({given} given)"
            )));
        }
        Ok(self.args)
    }
}

pub struct PyFunction {
    pub code: Arc<CodeObject>,
    pub globals: DictRef,
    pub defaults: Vec<Value>,
    pub kw_defaults: Vec<(String, Value)>,
    pub closure: Vec<CellRef>,
    pub name: String,
    pub qualname: String,
    pub doc: Option<String>,
}

pub struct PyBoundMethod {
    pub receiver: Value,
    pub function: Value,
}

pub struct PyBuiltinFunction {
    pub name: &'static str,
    pub func: NativeFn,
    /// Set for a method of a builtin type bound to its instance.
    pub receiver: Option<Value>,
}

impl PyBuiltinFunction {
    pub fn new(name: &'static str, func: NativeFn) -> Self {
        Self {
            name,
            func,
            receiver: None,
        }
    }

    pub fn bind(&self, receiver: Value) -> Self {
        Self {
            name: self.name,
            func: self.func,
            receiver: Some(receiver),
        }
    }
}

fn name_list(names: &[&str]) -> String {
    let quoted: Vec<String> = names.iter().map(|name| format!("'{name}'")).collect();
    match quoted.as_slice() {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => {
            let sep = if init.len() > 1 { ", and " } else { " and " };
            format!("{}{sep}{last}", init.iter().join(", "))
        }
    }
}

impl PyFunction {
    /// Distributes `args` over the parameter slots of the code object:
    /// positional, keyword-only, then `*args` and `**kwargs`.
    pub fn bind_arguments(
        &self,
        args: FuncArgs,
        vm: &VirtualMachine,
    ) -> PyResult<Vec<Option<Value>>> {
        let code = &*self.code;
        let nargs = code.arg_count as usize;
        let nkwonly = code.kwonlyarg_count as usize;
        let posonly = code.posonlyarg_count as usize;
        let has_varargs = code.flags.contains(CodeFlags::VARARGS);
        let has_varkw = code.flags.contains(CodeFlags::VARKEYWORDS);
        let mut slots: Vec<Option<Value>> = vec![None; code.total_arg_count()];

        let FuncArgs { args, kwargs } = args;
        let given = args.len();
        let mut args = args.into_iter();
        for (slot, arg) in slots.iter_mut().zip(args.by_ref().take(nargs)) {
            *slot = Some(arg);
        }
        let extra: Vec<Value> = args.collect();
        if has_varargs {
            slots[nargs + nkwonly] = Some(Value::new_tuple(extra));
        } else if !extra.is_empty() {
            let plural = if nargs == 1 { "" } else { "s" };
            let was = if given == 1 { "was" } else { "were" };
            return Err(vm.new_type_error(format!(
                "{}() takes {nargs} positional argument{plural} but {given} {was} given",
                self.qualname
            )));
        }

        let mut extra_kwargs = PyDict::default();
        for (name, value) in kwargs {
            let position = code.varnames[posonly..nargs + nkwonly]
                .iter()
                .position(|var| *var == name)
                .map(|index| index + posonly);
            match position {
                Some(index) if slots[index].is_some() => {
                    return Err(vm.new_type_error(format!(
                        "{}() got multiple values for argument '{name}'",
                        self.qualname
                    )));
                }
                Some(index) => slots[index] = Some(value),
                None if has_varkw => extra_kwargs.set_str(&name, value),
                None => {
                    return Err(vm.new_type_error(format!(
                        "{}() got an unexpected keyword argument '{name}'",
                        self.qualname
                    )));
                }
            }
        }

        let first_default = nargs.saturating_sub(self.defaults.len());
        for (slot, default) in slots[first_default..nargs].iter_mut().zip(&self.defaults) {
            if slot.is_none() {
                *slot = Some(default.clone());
            }
        }
        for (slot, name) in slots[nargs..nargs + nkwonly]
            .iter_mut()
            .zip(&code.varnames[nargs..nargs + nkwonly])
        {
            if slot.is_none()
                && let Some((_, default)) = self.kw_defaults.iter().find(|(kw, _)| kw == name)
            {
                *slot = Some(default.clone());
            }
        }

        for (range, kind) in [(0..nargs, "positional"), (nargs..nargs + nkwonly, "keyword-only")] {
            let missing: Vec<&str> = range
                .filter(|&index| slots[index].is_none())
                .map(|index| code.varnames[index].as_str())
                .collect();
            if !missing.is_empty() {
                let plural = if missing.len() == 1 { "" } else { "s" };
                return Err(vm.new_type_error(format!(
                    "{}() missing {} required {kind} argument{plural}: {}",
                    self.qualname,
                    missing.len(),
                    name_list(&missing)
                )));
            }
        }

        if has_varkw {
            let index = nargs + nkwonly + usize::from(has_varargs);
            slots[index] = Some(Value::new_dict(extra_kwargs));
        }
        Ok(slots)
    }

    /// Cells of a new frame: fresh cells, initialized from the parameter
    /// they shadow, followed by the closure.
    pub(crate) fn frame_cells(&self, slots: &[Option<Value>]) -> Vec<CellRef> {
        let code = &*self.code;
        let mut cells: Vec<CellRef> = Vec::with_capacity(code.cellvars.len() + self.closure.len());
        for index in 0..code.cellvars.len() {
            let initial = code
                .cell2arg
                .as_deref()
                .and_then(|cell2arg| usize::try_from(cell2arg[index]).ok())
                .and_then(|arg| slots.get(arg).cloned().flatten());
            cells.push(Rc::new(core::cell::RefCell::new(initial)));
        }
        cells.extend(self.closure.iter().cloned());
        cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_names_read_like_prose() {
        assert_eq!(name_list(&["a"]), "'a'");
        assert_eq!(name_list(&["a", "b"]), "'a' and 'b'");
        assert_eq!(name_list(&["a", "b", "c"]), "'a', 'b', and 'c'");
    }
}
