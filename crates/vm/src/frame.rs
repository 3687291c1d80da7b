//! Execution of statement and expression trees.

use crate::{
    IndexMap, PyResult, Unwind, VirtualMachine,
    dict::PyDict,
    function::{FuncArgs, PyFunction},
    generator::{GeneratorStorage, IterReturn, Resume},
    value::{CellRef, DictRef, PySlice, Value},
};
use alloc::rc::Rc;
use arbor_compiler_core::tree::{
    BoolOperator, CodeObject, CollectionKind, Conversion, DictEntry, ExceptHandler, Expr, Keyword,
    MakeClass, MakeFunction, NameRef, Stmt, Target,
};
use core::cell::RefCell;

fn suspended<T>(result: &PyResult<T>) -> bool {
    matches!(result, Err(Unwind::Suspend(_)))
}

/// One activation of a code object.
pub(crate) struct Frame<'a> {
    code: &'a CodeObject,
    fast: Vec<Option<Value>>,
    /// Cell variables followed by free variables.
    cells: Vec<CellRef>,
    /// The namespace of a class body; module bodies use `globals`.
    locals: Option<DictRef>,
    globals: DictRef,
    generator: Option<&'a mut GeneratorStorage>,
    /// Exceptions whose handlers are running, innermost last.
    handled: Vec<Value>,
}

impl<'a> Frame<'a> {
    pub(crate) fn new(
        code: &'a CodeObject,
        fast: Vec<Option<Value>>,
        cells: Vec<CellRef>,
        locals: Option<DictRef>,
        globals: DictRef,
    ) -> Self {
        Self {
            code,
            fast,
            cells,
            locals,
            globals,
            generator: None,
            handled: Vec::new(),
        }
    }

    pub(crate) fn with_generator(mut self, storage: &'a mut GeneratorStorage) -> Self {
        self.generator = Some(storage);
        self
    }

    /// Runs the body to completion and returns what it returned.
    pub(crate) fn run(&mut self, vm: &VirtualMachine) -> PyResult {
        let code = self.code;
        match self.exec(vm, &code.body) {
            Ok(()) => Ok(Value::None),
            Err(Unwind::Return(value)) => Ok(value),
            Err(Unwind::Exception(exc)) => Err(Unwind::Exception(exc)),
            Err(Unwind::Break | Unwind::Continue) => {
                Err(vm.new_system_error("loop control escaped its loop"))
            }
            Err(Unwind::Suspend(_)) => Err(vm.new_system_error("'yield' outside of a generator")),
        }
    }

    fn storage(&mut self, vm: &VirtualMachine) -> PyResult<&mut GeneratorStorage> {
        match self.generator.as_deref_mut() {
            Some(storage) => Ok(storage),
            None => Err(vm.new_system_error("resumable code run outside of a generator")),
        }
    }

    fn cell(&self, vm: &VirtualMachine, index: u32) -> PyResult<&CellRef> {
        self.cells
            .get(index as usize)
            .ok_or_else(|| vm.new_system_error(format!("no cell at index {index}")))
    }

    fn local_slot(&mut self, vm: &VirtualMachine, name: &NameRef) -> PyResult<&mut Option<Value>> {
        let slot = match (name, self.generator.as_deref_mut()) {
            (NameRef::Persistent(index), Some(storage)) => storage.locals.get_mut(*index as usize),
            (NameRef::Fast(index) | NameRef::Persistent(index), _) => {
                self.fast.get_mut(*index as usize)
            }
            _ => None,
        };
        slot.ok_or_else(|| vm.new_system_error(format!("no local slot for {name:?}")))
    }

    fn varname<'s>(&'s self, name: &'s NameRef) -> &'s str {
        match name {
            NameRef::Fast(index) | NameRef::Persistent(index) => self
                .code
                .varnames
                .get(*index as usize)
                .map_or("?", String::as_str),
            NameRef::Deref(index) | NameRef::DictOrDeref { index, .. } => {
                self.code.deref_name(*index)
            }
            NameRef::Global(name) | NameRef::Name(name) => name,
        }
    }

    fn load_global(&self, vm: &VirtualMachine, name: &str) -> PyResult {
        if let Some(value) = self.globals.borrow().get_str(name) {
            return Ok(value);
        }
        vm.builtins
            .borrow()
            .get_str(name)
            .ok_or_else(|| vm.new_name_error(name))
    }

    fn load(&mut self, vm: &VirtualMachine, name: &NameRef) -> PyResult {
        match name {
            NameRef::Fast(_) | NameRef::Persistent(_) => match self.local_slot(vm, name)? {
                Some(value) => Ok(value.clone()),
                None => Err(vm.new_unbound_local_error(self.varname(name))),
            },
            NameRef::Deref(index) => {
                let value = self.cell(vm, *index)?.borrow().clone();
                value.ok_or_else(|| self.unbound_deref(vm, *index))
            }
            NameRef::Global(name) => self.load_global(vm, name),
            NameRef::Name(name) => {
                if let Some(locals) = &self.locals
                    && let Some(value) = locals.borrow().get_str(name)
                {
                    return Ok(value);
                }
                self.load_global(vm, name)
            }
            NameRef::DictOrDeref { name, index } => {
                if let Some(locals) = &self.locals
                    && let Some(value) = locals.borrow().get_str(name)
                {
                    return Ok(value);
                }
                let value = self.cell(vm, *index)?.borrow().clone();
                value.ok_or_else(|| self.unbound_deref(vm, *index))
            }
        }
    }

    fn unbound_deref(&self, vm: &VirtualMachine, index: u32) -> Unwind {
        let name = self.code.deref_name(index);
        if (index as usize) < self.code.cellvars.len() {
            vm.new_unbound_local_error(name)
        } else {
            vm.new_exception_msg(
                &vm.exceptions.name_error,
                format!("cannot access free variable '{name}' where it is not associated with a value in enclosing scope"),
            )
        }
    }

    fn namespace(&self) -> &DictRef {
        self.locals.as_ref().unwrap_or(&self.globals)
    }

    fn store_name(&mut self, vm: &VirtualMachine, name: &NameRef, value: Value) -> PyResult<()> {
        match name {
            NameRef::Fast(_) | NameRef::Persistent(_) => {
                *self.local_slot(vm, name)? = Some(value);
            }
            NameRef::Deref(index) | NameRef::DictOrDeref { index, .. } => {
                *self.cell(vm, *index)?.borrow_mut() = Some(value);
            }
            NameRef::Global(name) => self.globals.borrow_mut().set_str(name, value),
            NameRef::Name(name) => self.namespace().borrow_mut().set_str(name, value),
        }
        Ok(())
    }

    fn delete_name(&mut self, vm: &VirtualMachine, name: &NameRef) -> PyResult<()> {
        let removed = match name {
            NameRef::Fast(_) | NameRef::Persistent(_) => self.local_slot(vm, name)?.take().is_some(),
            NameRef::Deref(index) | NameRef::DictOrDeref { index, .. } => {
                self.cell(vm, *index)?.borrow_mut().take().is_some()
            }
            NameRef::Global(name) => self.globals.borrow_mut().remove_str(name).is_some(),
            NameRef::Name(name) => self.namespace().borrow_mut().remove_str(name).is_some(),
        };
        if removed {
            return Ok(());
        }
        Err(match name {
            NameRef::Global(name) | NameRef::Name(name) => vm.new_name_error(name),
            NameRef::Deref(index) | NameRef::DictOrDeref { index, .. } => {
                self.unbound_deref(vm, *index)
            }
            _ => vm.new_unbound_local_error(self.varname(name)),
        })
    }

    fn store(&mut self, vm: &VirtualMachine, target: &Target, value: Value) -> PyResult<()> {
        match target {
            Target::Name(name) => self.store_name(vm, name, value),
            Target::Attribute { value: obj, attr } => {
                let obj = self.eval(vm, obj)?;
                vm.set_attribute(&obj, attr, value)
            }
            Target::Subscript { value: obj, index } => {
                let obj = self.eval(vm, obj)?;
                let index = self.eval(vm, index)?;
                vm.set_item(&obj, index, value)
            }
            Target::Unpack {
                targets,
                star_index,
            } => {
                let values = vm.unpack(&value, targets.len(), *star_index)?;
                for (target, value) in targets.iter().zip(values) {
                    self.store(vm, target, value)?;
                }
                Ok(())
            }
        }
    }

    fn delete(&mut self, vm: &VirtualMachine, target: &Target) -> PyResult<()> {
        match target {
            Target::Name(name) => self.delete_name(vm, name),
            Target::Attribute { value, attr } => {
                let obj = self.eval(vm, value)?;
                vm.del_attribute(&obj, attr)
            }
            Target::Subscript { value, index } => {
                let obj = self.eval(vm, value)?;
                let index = self.eval(vm, index)?;
                vm.del_item(&obj, index)
            }
            Target::Unpack { targets, .. } => {
                for target in targets {
                    self.delete(vm, target)?;
                }
                Ok(())
            }
        }
    }

    pub(crate) fn exec(&mut self, vm: &VirtualMachine, stmt: &Stmt) -> PyResult<()> {
        match stmt {
            Stmt::Expr(value) => {
                self.eval(vm, value)?;
            }
            Stmt::PrintExpr(value) => {
                let value = self.eval(vm, value)?;
                if !value.is_none() {
                    let repr = vm.repr(&value)?;
                    vm.write_stdout(&format!("{repr}\n"))?;
                    vm.builtins.borrow_mut().set_str("_", value);
                }
            }
            Stmt::Assign { target, value } => {
                let value = self.eval(vm, value)?;
                self.store(vm, target, value)?;
            }
            Stmt::Delete(target) => self.delete(vm, target)?,
            Stmt::Block(body) => {
                for stmt in body {
                    self.exec(vm, stmt)?;
                }
            }
            Stmt::If { test, body, orelse } => {
                let test = self.eval(vm, test)?;
                if vm.is_true(&test)? {
                    self.exec(vm, body)?;
                } else {
                    self.exec(vm, orelse)?;
                }
            }
            Stmt::While { test, body } => loop {
                let value = self.eval(vm, test)?;
                if !vm.is_true(&value)? {
                    break;
                }
                self.exec(vm, body)?;
            },
            Stmt::For { target, iter, body } => {
                let iterable = self.eval(vm, iter)?;
                let iterator = vm.get_iter(&iterable)?;
                while let Some(item) = vm.next(&iterator)? {
                    self.store(vm, target, item)?;
                    self.exec(vm, body)?;
                }
            }
            Stmt::ContinueTarget(body) => match self.exec(vm, body) {
                Err(Unwind::Continue) => {}
                result => result?,
            },
            Stmt::BreakTarget { body, orelse } => match self.exec(vm, body) {
                Ok(()) => self.exec(vm, orelse)?,
                Err(Unwind::Break) => {}
                Err(error) => return Err(error),
            },
            Stmt::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                let result = self.exec_try_except(vm, body, handlers, orelse);
                if let Some(finalbody) = finalbody {
                    self.exec_finally(vm, finalbody, &result)?;
                }
                result?;
            }
            Stmt::With {
                context,
                target,
                body,
            } => {
                let manager = self.eval(vm, context)?;
                let (enter, exit) = context_methods(vm, &manager)?;
                let entered = vm.call(&enter, Vec::new())?;
                let result = match target {
                    Some(target) => self.store(vm, target, entered),
                    None => Ok(()),
                }
                .and_then(|()| self.exec(vm, body));
                exit_context(vm, &exit, result)?;
            }
            Stmt::Raise { exc, cause } => return Err(self.raise(vm, exc.as_ref(), cause.as_ref())?),
            Stmt::Return(value) => {
                let value = match value {
                    Some(value) => self.eval(vm, value)?,
                    None => Value::None,
                };
                return Err(Unwind::Return(value));
            }
            Stmt::Break => return Err(Unwind::Break),
            Stmt::Continue => return Err(Unwind::Continue),
            Stmt::Assert { test, msg } => {
                let value = self.eval(vm, test)?;
                if !vm.is_true(&value)? {
                    let args = match msg {
                        Some(msg) => vec![self.eval(vm, msg)?],
                        None => Vec::new(),
                    };
                    let exc = vm.new_exception(vm.exceptions.assertion_error.clone(), args);
                    return Err(self.raised(vm, exc));
                }
            }
            Stmt::Pass => {}

            Stmt::GeneratorBlock { body, position } => {
                let position = *position as usize;
                let start = self.storage(vm)?.positions[position] as usize;
                for (index, stmt) in body.iter().enumerate().skip(start) {
                    self.storage(vm)?.positions[position] = index as u32;
                    let result = self.exec(vm, stmt);
                    if let Err(error) = result {
                        if !matches!(error, Unwind::Suspend(_)) {
                            self.storage(vm)?.positions[position] = 0;
                        }
                        return Err(error);
                    }
                }
                self.storage(vm)?.positions[position] = 0;
            }
            Stmt::GeneratorIf {
                test,
                body,
                orelse,
                then_flag,
                else_flag,
            } => {
                let (then_flag, else_flag) = (*then_flag as usize, *else_flag as usize);
                let flags = &self.storage(vm)?.flags;
                let taken = if flags[then_flag] {
                    true
                } else if flags[else_flag] {
                    false
                } else {
                    let value = self.eval(vm, test)?;
                    let taken = vm.is_true(&value)?;
                    let flag = if taken { then_flag } else { else_flag };
                    self.storage(vm)?.flags[flag] = true;
                    taken
                };
                let result = self.exec(vm, if taken { body } else { orelse });
                if !suspended(&result) {
                    let flags = &mut self.storage(vm)?.flags;
                    flags[then_flag] = false;
                    flags[else_flag] = false;
                }
                result?;
            }
            Stmt::GeneratorWhile { test, body, flag } => {
                let flag = *flag as usize;
                loop {
                    if !self.storage(vm)?.flags[flag] {
                        let value = self.eval(vm, test)?;
                        if !vm.is_true(&value)? {
                            break;
                        }
                        self.storage(vm)?.flags[flag] = true;
                    }
                    let result = self.exec(vm, body);
                    if suspended(&result) {
                        return result;
                    }
                    self.storage(vm)?.flags[flag] = false;
                    result?;
                }
            }
            Stmt::GeneratorFor {
                target,
                iter,
                body,
                flag,
                iterator,
            } => {
                let (flag, slot) = (*flag as usize, *iterator as usize);
                if self.storage(vm)?.iterators[slot].is_none() {
                    let iterable = self.eval(vm, iter)?;
                    let iterator = vm.get_iter(&iterable)?;
                    self.storage(vm)?.iterators[slot] = Some(iterator);
                }
                let result = self.generator_for(vm, target, body, flag, slot);
                if !suspended(&result) {
                    let storage = self.storage(vm)?;
                    storage.flags[flag] = false;
                    storage.iterators[slot] = None;
                }
                result?;
            }
            Stmt::GeneratorTryExcept {
                body,
                handlers,
                orelse,
                position,
                exception,
            } => {
                let (position, exception) = (*position as usize, *exception as usize);
                let result = self.generator_try_except(vm, body, handlers, orelse, position, exception);
                if !suspended(&result) {
                    let storage = self.storage(vm)?;
                    storage.positions[position] = 0;
                    storage.exceptions[exception] = None;
                }
                result?;
            }
            Stmt::GeneratorTryFinally {
                body,
                finalbody,
                flag,
                pending,
            } => {
                let (flag, pending) = (*flag as usize, *pending as usize);
                if !self.storage(vm)?.flags[flag] {
                    let result = self.exec(vm, body);
                    if suspended(&result) {
                        return result;
                    }
                    let storage = self.storage(vm)?;
                    storage.exceptions[pending] = result.err();
                    storage.flags[flag] = true;
                }
                let handling = match &self.storage(vm)?.exceptions[pending] {
                    Some(Unwind::Exception(exc)) => Some(exc.clone()),
                    _ => None,
                };
                let pushed = handling.is_some();
                self.handled.extend(handling);
                let result = self.exec(vm, finalbody);
                if pushed {
                    self.handled.pop();
                }
                if suspended(&result) {
                    return result;
                }
                let storage = self.storage(vm)?;
                storage.flags[flag] = false;
                let pending = storage.exceptions[pending].take();
                result?;
                if let Some(unwind) = pending {
                    return Err(unwind);
                }
            }
            Stmt::GeneratorWith {
                context,
                target,
                body,
                flag,
                manager,
            } => {
                let (flag, slot) = (*flag as usize, *manager as usize);
                let mut result = Ok(());
                if !self.storage(vm)?.flags[flag] {
                    let manager = self.eval(vm, context)?;
                    let (enter, _) = context_methods(vm, &manager)?;
                    let entered = vm.call(&enter, Vec::new())?;
                    let storage = self.storage(vm)?;
                    storage.iterators[slot] = Some(manager);
                    storage.flags[flag] = true;
                    if let Some(target) = target {
                        result = self.store(vm, target, entered);
                    }
                }
                if result.is_ok() {
                    result = self.exec(vm, body);
                }
                if suspended(&result) {
                    return result;
                }
                let storage = self.storage(vm)?;
                storage.flags[flag] = false;
                let manager = storage.iterators[slot].take().unwrap_or(Value::None);
                let (_, exit) = context_methods(vm, &manager)?;
                exit_context(vm, &exit, result)?;
            }
        }
        Ok(())
    }

    fn generator_for(
        &mut self,
        vm: &VirtualMachine,
        target: &Target,
        body: &Stmt,
        flag: usize,
        slot: usize,
    ) -> PyResult<()> {
        loop {
            if !self.storage(vm)?.flags[flag] {
                let iterator = self.storage(vm)?.iterators[slot].clone().unwrap_or(Value::None);
                let Some(item) = vm.next(&iterator)? else {
                    return Ok(());
                };
                self.store(vm, target, item)?;
                self.storage(vm)?.flags[flag] = true;
            }
            self.exec(vm, body)?;
            self.storage(vm)?.flags[flag] = false;
        }
    }

    fn generator_try_except(
        &mut self,
        vm: &VirtualMachine,
        body: &Stmt,
        handlers: &[ExceptHandler],
        orelse: &Stmt,
        position: usize,
        exception: usize,
    ) -> PyResult<()> {
        let orelse_position = 2 + handlers.len() as u32;
        if self.storage(vm)?.positions[position] == 0 {
            self.storage(vm)?.positions[position] = 1;
        }
        loop {
            let storage = self.storage(vm)?;
            match storage.positions[position] {
                1 => {
                    let caught = match &storage.exceptions[exception] {
                        Some(Unwind::Exception(exc)) => Some(exc.clone()),
                        _ => None,
                    };
                    let Some(exc) = caught else {
                        match self.exec(vm, body) {
                            Ok(()) => self.storage(vm)?.positions[position] = orelse_position,
                            Err(Unwind::Exception(exc)) => {
                                self.storage(vm)?.exceptions[exception] =
                                    Some(Unwind::Exception(exc));
                            }
                            Err(error) => return Err(error),
                        }
                        continue;
                    };
                    let Some(index) = self.match_handler(vm, handlers, &exc)? else {
                        return Err(Unwind::Exception(exc));
                    };
                    self.storage(vm)?.positions[position] = 2 + index as u32;
                }
                current if current < orelse_position => {
                    let handler = &handlers[(current - 2) as usize];
                    let exc = match &storage.exceptions[exception] {
                        Some(Unwind::Exception(exc)) => exc.clone(),
                        _ => return Err(vm.new_system_error("handler resumed without an exception")),
                    };
                    return self.run_handler(vm, handler, exc);
                }
                _ => return self.exec(vm, orelse),
            }
        }
    }

    /// Finds the handler catching `exc` and binds its name.
    fn match_handler(
        &mut self,
        vm: &VirtualMachine,
        handlers: &[ExceptHandler],
        exc: &Value,
    ) -> PyResult<Option<usize>> {
        for (index, handler) in handlers.iter().enumerate() {
            let matched = match &handler.typ {
                None => true,
                Some(typ) => {
                    let typ = self.eval(vm, typ)?;
                    vm.exception_matches(exc, &typ)?
                }
            };
            if matched {
                if let Some(name) = &handler.name {
                    self.store_name(vm, name, exc.clone())?;
                }
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    fn run_handler(&mut self, vm: &VirtualMachine, handler: &ExceptHandler, exc: Value) -> PyResult<()> {
        self.handled.push(exc.clone());
        let result = self.exec(vm, &handler.body);
        self.handled.pop();
        if let Err(Unwind::Exception(raised)) = &result {
            vm.chain_context(raised, &exc);
        }
        result
    }

    fn exec_try_except(
        &mut self,
        vm: &VirtualMachine,
        body: &Stmt,
        handlers: &[ExceptHandler],
        orelse: &Stmt,
    ) -> PyResult<()> {
        match self.exec(vm, body) {
            Ok(()) => self.exec(vm, orelse),
            Err(Unwind::Exception(exc)) if !handlers.is_empty() => {
                match self.match_handler(vm, handlers, &exc)? {
                    Some(index) => self.run_handler(vm, &handlers[index], exc),
                    None => Err(Unwind::Exception(exc)),
                }
            }
            Err(error) => Err(error),
        }
    }

    fn exec_finally(&mut self, vm: &VirtualMachine, finalbody: &Stmt, pending: &PyResult<()>) -> PyResult<()> {
        let handling = match pending {
            Err(Unwind::Exception(exc)) => Some(exc.clone()),
            _ => None,
        };
        let pushed = handling.is_some();
        self.handled.extend(handling);
        let result = self.exec(vm, finalbody);
        if pushed {
            self.handled.pop();
        }
        result
    }

    /// Builds the exception thrown by a `raise` statement.
    fn raise(&mut self, vm: &VirtualMachine, exc: Option<&Expr>, cause: Option<&Expr>) -> PyResult<Unwind> {
        let Some(exc) = exc else {
            return Ok(match self.handled.last() {
                Some(exc) => Unwind::Exception(exc.clone()),
                None => vm.new_runtime_error("No active exception to reraise"),
            });
        };
        let exc = self.eval(vm, exc)?;
        let exc = vm.normalize_exception(exc)?;
        if let Some(cause) = cause {
            let cause = match self.eval(vm, cause)? {
                Value::None => Value::None,
                cause => vm.normalize_exception(cause)?,
            };
            vm.set_cause(&exc, cause);
        }
        Ok(self.raised(vm, exc))
    }

    fn raised(&self, vm: &VirtualMachine, exc: Value) -> Unwind {
        if let Some(context) = self.handled.last() {
            vm.chain_context(&exc, context);
        }
        Unwind::Exception(exc)
    }

    fn eval_elements(&mut self, vm: &VirtualMachine, elements: &[Expr]) -> PyResult<Vec<Value>> {
        let mut values = Vec::with_capacity(elements.len());
        for element in elements {
            match element {
                Expr::Starred(value) => {
                    let iterable = self.eval(vm, value)?;
                    values.extend(vm.collect(&iterable)?);
                }
                element => values.push(self.eval(vm, element)?),
            }
        }
        Ok(values)
    }

    fn eval_dict(&mut self, vm: &VirtualMachine, entries: &[DictEntry]) -> PyResult {
        let mut dict = PyDict::default();
        for entry in entries {
            match &entry.key {
                Some(key) => {
                    let key = self.eval(vm, key)?;
                    let value = self.eval(vm, &entry.value)?;
                    dict.insert(vm.hash_key(&key)?, key, value);
                }
                None => {
                    let mapping = self.eval(vm, &entry.value)?;
                    vm.dict_update(&mut dict, &mapping)?;
                }
            }
        }
        Ok(Value::new_dict(dict))
    }

    fn eval_call_args(
        &mut self,
        vm: &VirtualMachine,
        args: &[Expr],
        keywords: &[Keyword],
    ) -> PyResult<FuncArgs> {
        let args = self.eval_elements(vm, args)?;
        let mut kwargs: IndexMap<String, Value> = IndexMap::default();
        let mut add = |name: String, value: Value| {
            if kwargs.contains_key(&name) {
                return Err(vm.new_type_error(format!(
                    "got multiple values for keyword argument '{name}'"
                )));
            }
            kwargs.insert(name, value);
            Ok(())
        };
        for keyword in keywords {
            let value = self.eval(vm, &keyword.value)?;
            match &keyword.name {
                Some(name) => add(name.clone(), value)?,
                None => {
                    let mut mapping = PyDict::default();
                    vm.dict_update(&mut mapping, &value)?;
                    for (_, key, value) in mapping.items() {
                        let Value::Str(key) = key else {
                            return Err(vm.new_type_error("keywords must be strings"));
                        };
                        add(key.to_string(), value.clone())?;
                    }
                }
            }
        }
        Ok(FuncArgs::new(args, kwargs))
    }

    fn closure_cells(&self, vm: &VirtualMachine, closure: &[NameRef]) -> PyResult<Vec<CellRef>> {
        closure
            .iter()
            .map(|name| match name {
                NameRef::Deref(index) | NameRef::DictOrDeref { index, .. } => {
                    self.cell(vm, *index).cloned()
                }
                other => Err(vm.new_system_error(format!("cannot close over {other:?}"))),
            })
            .collect()
    }

    fn make_function(&mut self, vm: &VirtualMachine, make: &MakeFunction) -> PyResult {
        let defaults = self.eval_elements(vm, &make.defaults)?;
        let mut kw_defaults = Vec::with_capacity(make.kw_defaults.len());
        for (name, value) in &make.kw_defaults {
            kw_defaults.push((name.clone(), self.eval(vm, value)?));
        }
        let code = make.code.clone();
        Ok(Value::Function(Rc::new(PyFunction {
            name: code.obj_name.clone(),
            qualname: code.qualname.clone(),
            doc: code.doc.clone(),
            globals: self.globals.clone(),
            defaults,
            kw_defaults,
            closure: self.closure_cells(vm, &make.closure)?,
            code,
        })))
    }

    fn make_class(&mut self, vm: &VirtualMachine, make: &MakeClass) -> PyResult {
        let bases = self
            .eval_elements(vm, &make.bases)?
            .into_iter()
            .map(|base| match base {
                Value::Class(class) => Ok(class),
                other => Err(vm.new_type_error(format!(
                    "bases must be types, not '{}'",
                    vm.class_of(&other).name
                ))),
            })
            .collect::<PyResult<Vec<_>>>()?;
        if let Some(keyword) = make.keywords.first() {
            self.eval(vm, &keyword.value)?;
            return Err(match keyword.name.as_deref() {
                Some("metaclass") => vm.new_type_error("custom metaclasses are not supported"),
                _ => vm.new_type_error(format!(
                    "{}.__init_subclass__() takes no keyword arguments",
                    make.name
                )),
            });
        }

        let code = &*make.code;
        let mut cells: Vec<CellRef> = (0..code.cellvars.len())
            .map(|_| Rc::new(RefCell::new(None)))
            .collect();
        cells.extend(self.closure_cells(vm, &make.closure)?);
        let namespace: DictRef = Rc::new(RefCell::new(PyDict::default()));
        vm.with_recursion(|| {
            Frame::new(
                code,
                vec![None; code.varnames.len()],
                cells.clone(),
                Some(namespace.clone()),
                self.globals.clone(),
            )
            .run(vm)
        })?;

        let class = vm.new_class(&make.name, bases, &namespace)?;
        if let Some(index) = code.cellvars.iter().position(|name| name == "__class__") {
            *cells[index].borrow_mut() = Some(Value::Class(class.clone()));
        }
        debug!("created class {}", class.qualname);
        Ok(Value::Class(class))
    }

    fn eval_yield(&mut self, vm: &VirtualMachine, value: Option<&Expr>, index: Option<u32>) -> PyResult {
        let index = index.ok_or_else(|| vm.new_system_error("'yield' outside of a generator"))?;
        if let Some(resume) = self.take_resume(vm, index)? {
            return match resume {
                Resume::Send(value) => Ok(value),
                Resume::Throw(exc) => Err(Unwind::Exception(exc)),
            };
        }
        // A resumption aimed at a yield nested in the operand is consumed here.
        let value = match value {
            Some(value) => self.eval(vm, value)?,
            None => Value::None,
        };
        self.suspend_at(vm, index)?;
        Err(Unwind::Suspend(value))
    }

    /// The pending resumption, if it targets yield `index`.
    fn take_resume(&mut self, vm: &VirtualMachine, index: u32) -> PyResult<Option<Resume>> {
        let storage = self.storage(vm)?;
        match &storage.resume {
            Some((target, _)) if *target == index => Ok(storage.resume.take().map(|(_, resume)| resume)),
            _ => Ok(None),
        }
    }

    /// Records yield `index` as the suspension point. Any resumption still
    /// pending was aimed at a yield this run never reached.
    fn suspend_at(&mut self, vm: &VirtualMachine, index: u32) -> PyResult<()> {
        let storage = self.storage(vm)?;
        if let Some((target, _)) = &storage.resume {
            return Err(vm.new_system_error(format!(
                "resumed generator reached yield {index} instead of yield {target}"
            )));
        }
        storage.suspended_at = Some(index);
        Ok(())
    }

    fn eval_yield_from(
        &mut self,
        vm: &VirtualMachine,
        value: &Expr,
        index: Option<u32>,
        iterator: Option<u32>,
    ) -> PyResult {
        let (Some(index), Some(slot)) = (index, iterator) else {
            return Err(vm.new_system_error("'yield from' outside of a generator"));
        };
        let slot = slot as usize;
        let outcome = match self.take_resume(vm, index)? {
            Some(resume) => {
                let delegate = self.storage(vm)?.iterators[slot]
                    .clone()
                    .ok_or_else(|| vm.new_system_error("'yield from' resumed without a delegate"))?;
                match resume {
                    Resume::Send(value) => vm.delegate_send(&delegate, value),
                    Resume::Throw(exc) => vm.delegate_throw(&delegate, exc),
                }
            }
            None => {
                let iterable = self.eval(vm, value)?;
                let delegate = vm.get_iter(&iterable)?;
                self.storage(vm)?.iterators[slot] = Some(delegate.clone());
                vm.delegate_send(&delegate, Value::None)
            }
        };
        match outcome {
            Ok(IterReturn::Yield(value)) => {
                self.suspend_at(vm, index)?;
                Err(Unwind::Suspend(value))
            }
            Ok(IterReturn::Return(value)) => {
                self.storage(vm)?.iterators[slot] = None;
                Ok(value)
            }
            Err(error) => {
                self.storage(vm)?.iterators[slot] = None;
                Err(error)
            }
        }
    }

    fn collect(&mut self, vm: &VirtualMachine, kind: CollectionKind, iterable: &Expr) -> PyResult {
        let iterable = self.eval(vm, iterable)?;
        let items = vm.collect(&iterable)?;
        Ok(match kind {
            CollectionKind::List => Value::new_list(items),
            CollectionKind::Set => Value::new_set(vm.set_from_values(items)?),
            CollectionKind::Dict => {
                let mut dict = PyDict::default();
                for item in items {
                    let mut pair = vm.unpack(&item, 2, None)?.into_iter();
                    let (Some(key), Some(value)) = (pair.next(), pair.next()) else {
                        return Err(vm.new_system_error("dict comprehension produced a bad item"));
                    };
                    dict.insert(vm.hash_key(&key)?, key, value);
                }
                Value::new_dict(dict)
            }
        })
    }

    pub(crate) fn eval(&mut self, vm: &VirtualMachine, expr: &Expr) -> PyResult {
        match expr {
            Expr::Constant(constant) => Ok(Value::from_constant(constant)),
            Expr::Load(name) => self.load(vm, name),
            Expr::Tuple(elements) => Ok(Value::new_tuple(self.eval_elements(vm, elements)?)),
            Expr::List(elements) => Ok(Value::new_list(self.eval_elements(vm, elements)?)),
            Expr::Set(elements) => {
                let values = self.eval_elements(vm, elements)?;
                Ok(Value::new_set(vm.set_from_values(values)?))
            }
            Expr::Dict(entries) => self.eval_dict(vm, entries),
            Expr::Starred(_) => Err(vm.new_system_error("can't use starred expression here")),
            Expr::BinOp {
                op,
                left,
                right,
                inplace,
            } => {
                let left = self.eval(vm, left)?;
                let right = self.eval(vm, right)?;
                vm.binary_op(*op, &left, &right, *inplace)
            }
            Expr::UnaryOp { op, operand } => {
                let operand = self.eval(vm, operand)?;
                vm.unary_op(*op, &operand)
            }
            Expr::BoolOp { op, left, right } => {
                let left = self.eval(vm, left)?;
                let decided = match op {
                    BoolOperator::And => !vm.is_true(&left)?,
                    BoolOperator::Or => vm.is_true(&left)?,
                };
                if decided { Ok(left) } else { self.eval(vm, right) }
            }
            Expr::Compare { op, left, right } => {
                let left = self.eval(vm, left)?;
                let right = self.eval(vm, right)?;
                vm.compare(*op, &left, &right)
            }
            Expr::Call {
                func,
                args,
                keywords,
            } => {
                let func = self.eval(vm, func)?;
                let args = self.eval_call_args(vm, args, keywords)?;
                vm.call(&func, args)
            }
            Expr::Attribute { value, attr } => {
                let value = self.eval(vm, value)?;
                vm.get_attribute(&value, attr)
            }
            Expr::Subscript { value, index } => {
                let value = self.eval(vm, value)?;
                let index = self.eval(vm, index)?;
                vm.get_item(&value, index)
            }
            Expr::Slice { lower, upper, step } => {
                let mut bound = |part: &Option<Box<Expr>>| match part {
                    Some(part) => self.eval(vm, part),
                    None => Ok(Value::None),
                };
                Ok(Value::Slice(Rc::new(PySlice {
                    start: bound(lower)?,
                    stop: bound(upper)?,
                    step: bound(step)?,
                })))
            }
            Expr::IfExp { test, body, orelse } => {
                let test = self.eval(vm, test)?;
                if vm.is_true(&test)? {
                    self.eval(vm, body)
                } else {
                    self.eval(vm, orelse)
                }
            }
            Expr::NamedExpr { target, value } => {
                let value = self.eval(vm, value)?;
                self.store_name(vm, target, value.clone())?;
                Ok(value)
            }
            Expr::MakeFunction(make) => self.make_function(vm, make),
            Expr::MakeClass(make) => self.make_class(vm, make),
            Expr::Yield { value, index } => self.eval_yield(vm, value.as_deref(), *index),
            Expr::YieldFrom {
                value,
                index,
                iterator,
            } => self.eval_yield_from(vm, value, *index, *iterator),
            Expr::GetIter(value) => {
                let value = self.eval(vm, value)?;
                vm.get_iter(&value)
            }
            Expr::Collect { kind, iterable } => self.collect(vm, *kind, iterable),
            Expr::JoinedStr(parts) => {
                let mut joined = String::new();
                for part in parts {
                    let part = self.eval(vm, part)?;
                    joined.push_str(&vm.to_str(&part)?);
                }
                Ok(Value::from(joined))
            }
            Expr::FormatValue {
                value,
                conversion,
                spec,
            } => {
                let value = self.eval(vm, value)?;
                let value = match conversion {
                    Conversion::None => value,
                    Conversion::Str => Value::from(vm.to_str(&value)?),
                    Conversion::Repr => Value::from(vm.repr(&value)?),
                    Conversion::Ascii => Value::from(vm.ascii(&value)?),
                };
                let spec = match spec {
                    Some(spec) => {
                        let spec = self.eval(vm, spec)?;
                        vm.to_str(&spec)?
                    }
                    None => String::new(),
                };
                Ok(Value::from(vm.format_value(&value, &spec)?))
            }
            Expr::Import {
                name,
                fromlist,
                level,
            } => vm.import(name, fromlist, *level, &self.globals),
            Expr::ImportFrom { module, name } => {
                let module = self.eval(vm, module)?;
                match vm.get_attribute_opt(&module, name)? {
                    Some(value) => Ok(value),
                    None => {
                        let module_name = match &module {
                            Value::Module(module) => module.name.clone(),
                            _ => "?".to_owned(),
                        };
                        Err(vm.new_import_error(format!(
                            "cannot import name '{name}' from '{module_name}'"
                        )))
                    }
                }
            }
            Expr::StmtExpr(stmt) => {
                self.exec(vm, stmt)?;
                Ok(Value::None)
            }
            Expr::SideEffects {
                effects,
                value,
                position,
            } => {
                let position = *position as usize;
                let done = self.storage(vm)?.positions[position] as usize;
                for (index, effect) in effects.iter().enumerate().skip(done) {
                    let result = self.exec(vm, effect);
                    if let Err(error) = result {
                        if !matches!(error, Unwind::Suspend(_)) {
                            self.storage(vm)?.positions[position] = 0;
                        }
                        return Err(error);
                    }
                    self.storage(vm)?.positions[position] = index as u32 + 1;
                }
                let result = self.eval(vm, value);
                if !suspended(&result) {
                    self.storage(vm)?.positions[position] = 0;
                }
                result
            }
        }
    }
}

fn context_methods(vm: &VirtualMachine, manager: &Value) -> PyResult<(Value, Value)> {
    let enter = vm.get_special_method(manager, "__enter__")?;
    let exit = vm.get_special_method(manager, "__exit__")?;
    match (enter, exit) {
        (Some(enter), Some(exit)) => Ok((enter, exit)),
        _ => Err(vm.new_type_error(format!(
            "'{}' object does not support the context manager protocol",
            vm.class_of(manager).name
        ))),
    }
}

/// Calls `__exit__` with the outcome of a `with` body.
fn exit_context(vm: &VirtualMachine, exit: &Value, result: PyResult<()>) -> PyResult<()> {
    match result {
        Err(Unwind::Exception(exc)) => {
            let typ = Value::Class(vm.class_of(&exc));
            let suppress = vm.call(exit, vec![typ, exc.clone(), Value::None])?;
            if vm.is_true(&suppress)? {
                Ok(())
            } else {
                Err(Unwind::Exception(exc))
            }
        }
        result => {
            vm.call(exit, vec![Value::None, Value::None, Value::None])?;
            result
        }
    }
}
