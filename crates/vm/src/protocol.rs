//! Operators, comparisons, item access and iteration.

use crate::{
    PyResult, Unwind, VirtualMachine,
    dict::PySet,
    generator::IterReturn,
    value::{IterState, PyIterator, PyRange, PySlice, Value},
};
use alloc::rc::Rc;
use arbor_compiler_core::tree::{BinaryOperator, ComparisonOperator, UnaryOperator};
use core::{cmp::Ordering, iter};
use malachite_bigint::BigInt;
use num_complex::Complex64;
use num_integer::Integer;
use num_traits::{Pow, Signed, ToPrimitive, Zero};

enum Number {
    Int(BigInt),
    Float(f64),
    Complex(Complex64),
}

fn number(value: &Value) -> Option<Number> {
    Some(match value {
        Value::Bool(value) => Number::Int(BigInt::from(u8::from(*value))),
        Value::Int(value) => Number::Int(value.clone()),
        Value::Float(value) => Number::Float(*value),
        Value::Complex(value) => Number::Complex(*value),
        _ => return None,
    })
}

impl Number {
    fn to_float(&self, vm: &VirtualMachine) -> PyResult<f64> {
        match self {
            Self::Int(value) => vm.int_to_float(value),
            Self::Float(value) => Ok(*value),
            Self::Complex(_) => Err(vm.new_type_error("must be real number, not complex")),
        }
    }

    fn to_complex(&self, vm: &VirtualMachine) -> PyResult<Complex64> {
        match self {
            Self::Complex(value) => Ok(*value),
            other => Ok(Complex64::new(other.to_float(vm)?, 0.0)),
        }
    }
}

const fn binary_method(op: BinaryOperator) -> (&'static str, &'static str, &'static str) {
    match op {
        BinaryOperator::Add => ("__add__", "__radd__", "__iadd__"),
        BinaryOperator::Subtract => ("__sub__", "__rsub__", "__isub__"),
        BinaryOperator::Multiply => ("__mul__", "__rmul__", "__imul__"),
        BinaryOperator::MatrixMultiply => ("__matmul__", "__rmatmul__", "__imatmul__"),
        BinaryOperator::Divide => ("__truediv__", "__rtruediv__", "__itruediv__"),
        BinaryOperator::FloorDivide => ("__floordiv__", "__rfloordiv__", "__ifloordiv__"),
        BinaryOperator::Remainder => ("__mod__", "__rmod__", "__imod__"),
        BinaryOperator::Power => ("__pow__", "__rpow__", "__ipow__"),
        BinaryOperator::Lshift => ("__lshift__", "__rlshift__", "__ilshift__"),
        BinaryOperator::Rshift => ("__rshift__", "__rrshift__", "__irshift__"),
        BinaryOperator::And => ("__and__", "__rand__", "__iand__"),
        BinaryOperator::Or => ("__or__", "__ror__", "__ior__"),
        BinaryOperator::Xor => ("__xor__", "__rxor__", "__ixor__"),
    }
}

const fn compare_method(op: ComparisonOperator) -> Option<(&'static str, &'static str)> {
    Some(match op {
        ComparisonOperator::Equal => ("__eq__", "__eq__"),
        ComparisonOperator::NotEqual => ("__ne__", "__ne__"),
        ComparisonOperator::Less => ("__lt__", "__gt__"),
        ComparisonOperator::LessOrEqual => ("__le__", "__ge__"),
        ComparisonOperator::Greater => ("__gt__", "__lt__"),
        ComparisonOperator::GreaterOrEqual => ("__ge__", "__le__"),
        _ => return None,
    })
}

fn ordering_holds(op: ComparisonOperator, ordering: Option<Ordering>) -> bool {
    match (op, ordering) {
        (_, None) => false,
        (ComparisonOperator::Less, Some(ordering)) => ordering.is_lt(),
        (ComparisonOperator::LessOrEqual, Some(ordering)) => ordering.is_le(),
        (ComparisonOperator::Greater, Some(ordering)) => ordering.is_gt(),
        (ComparisonOperator::GreaterOrEqual, Some(ordering)) => ordering.is_ge(),
        (ComparisonOperator::Equal, Some(ordering)) => ordering.is_eq(),
        (_, Some(ordering)) => ordering.is_ne(),
    }
}

fn repeat<T: Clone>(items: &[T], count: usize) -> Vec<T> {
    iter::repeat_n(items, count).flatten().cloned().collect()
}

fn float_mod(a: f64, b: f64) -> f64 {
    let m = a % b;
    if m != 0.0 && (m < 0.0) != (b < 0.0) {
        m + b
    } else {
        m
    }
}

pub(crate) fn range_len(range: &PyRange) -> BigInt {
    let PyRange { start, stop, step } = range;
    let len = -(start - stop).div_floor(step);
    if len.is_negative() { BigInt::zero() } else { len }
}

/// Positions selected by normalized slice bounds.
pub(crate) fn slice_positions(start: isize, stop: isize, step: isize) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut index = start;
    while (step > 0 && index < stop) || (step < 0 && index > stop) {
        positions.push(index as usize);
        index += step;
    }
    positions
}

impl VirtualMachine {
    pub(crate) fn int_to_float(&self, value: &BigInt) -> PyResult<f64> {
        value
            .to_f64()
            .filter(|float| float.is_finite())
            .ok_or_else(|| self.new_overflow_error("int too large to convert to float"))
    }

    pub fn to_bigint(&self, value: &Value) -> PyResult<BigInt> {
        match value {
            Value::Int(value) => Ok(value.clone()),
            Value::Bool(value) => Ok(BigInt::from(u8::from(*value))),
            Value::Instance(_) => match self.get_special_method(value, "__index__")? {
                Some(index) => {
                    let result = self.call(&index, Vec::new())?;
                    match result {
                        Value::Int(value) => Ok(value),
                        other => Err(self.new_type_error(format!(
                            "__index__ returned non-int (type {})",
                            self.class_of(&other).name
                        ))),
                    }
                }
                None => Err(self.not_an_integer(value)),
            },
            _ => Err(self.not_an_integer(value)),
        }
    }

    fn not_an_integer(&self, value: &Value) -> Unwind {
        self.new_type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            self.class_of(value).name
        ))
    }

    pub fn to_isize(&self, value: &Value) -> PyResult<isize> {
        self.to_bigint(value)?.to_isize().ok_or_else(|| {
            self.new_overflow_error("Python int too large to convert to C ssize_t")
        })
    }

    pub fn to_f64(&self, value: &Value) -> PyResult<f64> {
        match number(value) {
            Some(number @ (Number::Int(_) | Number::Float(_))) => number.to_float(self),
            _ => Err(self.new_type_error(format!(
                "must be real number, not {}",
                self.class_of(value).name
            ))),
        }
    }

    pub fn is_true(&self, value: &Value) -> PyResult<bool> {
        Ok(match value {
            Value::None => false,
            Value::Bool(value) => *value,
            Value::Int(value) => !value.is_zero(),
            Value::Float(value) => *value != 0.0,
            Value::Complex(value) => !value.is_zero(),
            Value::Str(value) => !value.is_empty(),
            Value::Bytes(value) => !value.is_empty(),
            Value::Tuple(value) => !value.is_empty(),
            Value::List(value) => !value.borrow().is_empty(),
            Value::Dict(value) => !value.borrow().is_empty(),
            Value::Set(value) => !value.borrow().is_empty(),
            Value::Range(range) => range_len(range).is_positive(),
            Value::Instance(_) => {
                if let Some(method) = self.get_special_method(value, "__bool__")? {
                    return match self.call(&method, Vec::new())? {
                        Value::Bool(value) => Ok(value),
                        other => Err(self.new_type_error(format!(
                            "__bool__ should return bool, returned {}",
                            self.class_of(&other).name
                        ))),
                    };
                }
                if self.get_special_method(value, "__len__")?.is_some() {
                    return Ok(self.len(value)? > 0);
                }
                true
            }
            _ => true,
        })
    }

    pub fn len(&self, value: &Value) -> PyResult<usize> {
        Ok(match value {
            Value::Str(value) => value.chars().count(),
            Value::Bytes(value) => value.len(),
            Value::Tuple(value) => value.len(),
            Value::List(value) => value.borrow().len(),
            Value::Dict(value) => value.borrow().len(),
            Value::Set(value) => value.borrow().len(),
            Value::Range(range) => range_len(range)
                .to_usize()
                .ok_or_else(|| self.new_overflow_error("range too large"))?,
            _ => {
                let Some(method) = self.get_special_method(value, "__len__")? else {
                    return Err(self.new_type_error(format!(
                        "object of type '{}' has no len()",
                        self.class_of(value).name
                    )));
                };
                let len = self.call(&method, Vec::new())?;
                let len = self.to_bigint(&len)?;
                if len.is_negative() {
                    return Err(self.new_value_error("__len__() should return >= 0"));
                }
                len.to_usize()
                    .ok_or_else(|| self.new_overflow_error("cannot fit 'int' into an index-sized integer"))?
            }
        })
    }

    pub fn binary_op(
        &self,
        op: BinaryOperator,
        a: &Value,
        b: &Value,
        inplace: bool,
    ) -> PyResult {
        let (method, reflected, inplace_method) = binary_method(op);
        if inplace {
            if let Some(result) = self.inplace_native_op(op, a, b)? {
                return Ok(result);
            }
            if let Value::Instance(_) = a
                && let Some(method) = self.get_special_method(a, inplace_method)?
            {
                let result = self.call(&method, vec![b.clone()])?;
                if !matches!(result, Value::NotImplemented) {
                    return Ok(result);
                }
            }
        }
        if let Some(result) = self.native_binary_op(op, a, b)? {
            return Ok(result);
        }
        if let Value::Instance(_) = a
            && let Some(method) = self.get_special_method(a, method)?
        {
            let result = self.call(&method, vec![b.clone()])?;
            if !matches!(result, Value::NotImplemented) {
                return Ok(result);
            }
        }
        if let Value::Instance(_) = b
            && let Some(method) = self.get_special_method(b, reflected)?
        {
            let result = self.call(&method, vec![a.clone()])?;
            if !matches!(result, Value::NotImplemented) {
                return Ok(result);
            }
        }
        let symbol = op.as_str();
        let eq = if inplace { "=" } else { "" };
        Err(self.new_type_error(format!(
            "unsupported operand type(s) for {symbol}{eq}: '{}' and '{}'",
            self.class_of(a).name,
            self.class_of(b).name
        )))
    }

    /// Mutating forms of `+=` and friends on builtin containers.
    fn inplace_native_op(&self, op: BinaryOperator, a: &Value, b: &Value) -> PyResult<Option<Value>> {
        match (op, a) {
            (BinaryOperator::Add, Value::List(list)) => {
                let items = self.collect(b)?;
                list.borrow_mut().extend(items);
                Ok(Some(a.clone()))
            }
            (BinaryOperator::Or, Value::Dict(dict)) => {
                let mut updated = dict.borrow().clone();
                self.dict_update(&mut updated, b)?;
                *dict.borrow_mut() = updated;
                Ok(Some(a.clone()))
            }
            (
                BinaryOperator::Or | BinaryOperator::And | BinaryOperator::Subtract | BinaryOperator::Xor,
                Value::Set(set),
            ) if matches!(b, Value::Set(_)) => {
                let Some(Value::Set(result)) = self.native_binary_op(op, a, b)? else {
                    return Ok(None);
                };
                let result = result.borrow().clone();
                *set.borrow_mut() = result;
                Ok(Some(a.clone()))
            }
            _ => Ok(None),
        }
    }

    fn native_binary_op(&self, op: BinaryOperator, a: &Value, b: &Value) -> PyResult<Option<Value>> {
        if let (Some(x), Some(y)) = (number(a), number(b)) {
            return self.number_op(op, x, y);
        }
        use BinaryOperator::{Add, And, Multiply, Or, Remainder, Subtract, Xor};
        Ok(Some(match (op, a, b) {
            (Add, Value::Str(x), Value::Str(y)) => Value::from(format!("{x}{y}")),
            (Add, Value::Bytes(x), Value::Bytes(y)) => Value::Bytes([&x[..], &y[..]].concat().into()),
            (Add, Value::Tuple(x), Value::Tuple(y)) => {
                Value::new_tuple(x.iter().chain(y.iter()).cloned().collect())
            }
            (Add, Value::List(x), Value::List(y)) => {
                let mut items = x.borrow().clone();
                items.extend(y.borrow().iter().cloned());
                Value::new_list(items)
            }
            (Multiply, seq, count) | (Multiply, count, seq)
                if matches!(count, Value::Int(_) | Value::Bool(_))
                    && matches!(seq, Value::Str(_) | Value::Bytes(_) | Value::Tuple(_) | Value::List(_)) =>
            {
                let count = self.to_bigint(count)?;
                let count = if count.is_negative() {
                    0
                } else {
                    count.to_usize().ok_or_else(|| {
                        self.new_overflow_error("cannot fit 'int' into an index-sized integer")
                    })?
                };
                match seq {
                    Value::Str(value) => Value::from(value.repeat(count)),
                    Value::Bytes(value) => Value::Bytes(value.repeat(count).into()),
                    Value::Tuple(value) => Value::new_tuple(repeat(&value[..], count)),
                    Value::List(value) => Value::new_list(repeat(&value.borrow()[..], count)),
                    _ => return Ok(None),
                }
            }
            (Remainder, Value::Str(template), args) => {
                Value::from(crate::format::printf(self, template, args)?)
            }
            (Or, Value::Dict(x), Value::Dict(y)) => {
                let mut merged = x.borrow().clone();
                self.dict_update(&mut merged, &Value::Dict(y.clone()))?;
                Value::new_dict(merged)
            }
            (Or | And | Subtract | Xor, Value::Set(x), Value::Set(y)) => {
                let x = x.borrow();
                let y = y.borrow();
                let mut result = PySet::default();
                match op {
                    Or => {
                        for (hash, value) in x.iter().chain(y.iter()) {
                            result.insert(hash.clone(), value.clone());
                        }
                    }
                    And => {
                        for (hash, value) in x.iter().filter(|(hash, _)| y.contains(hash)) {
                            result.insert(hash.clone(), value.clone());
                        }
                    }
                    Subtract => {
                        for (hash, value) in x.iter().filter(|(hash, _)| !y.contains(hash)) {
                            result.insert(hash.clone(), value.clone());
                        }
                    }
                    _ => {
                        let left = x.iter().filter(|(hash, _)| !y.contains(hash));
                        let right = y.iter().filter(|(hash, _)| !x.contains(hash));
                        for (hash, value) in left.chain(right) {
                            result.insert(hash.clone(), value.clone());
                        }
                    }
                }
                Value::new_set(result)
            }
            _ => return Ok(None),
        }))
    }

    fn number_op(&self, op: BinaryOperator, a: Number, b: Number) -> PyResult<Option<Value>> {
        match (a, b) {
            (Number::Int(a), Number::Int(b)) => self.int_op(op, &a, &b),
            (a @ Number::Complex(_), b) | (a, b @ Number::Complex(_)) => {
                self.complex_op(op, a.to_complex(self)?, b.to_complex(self)?)
            }
            (a, b) => self.float_op(op, a.to_float(self)?, b.to_float(self)?),
        }
    }

    fn int_op(&self, op: BinaryOperator, a: &BigInt, b: &BigInt) -> PyResult<Option<Value>> {
        use BinaryOperator::*;
        let result = match op {
            Add => a + b,
            Subtract => a - b,
            Multiply => a * b,
            Divide => {
                if b.is_zero() {
                    return Err(self.new_zero_division_error("division by zero"));
                }
                let quotient = self.int_to_float(a)? / self.int_to_float(b)?;
                if quotient.is_infinite() {
                    return Err(self.new_overflow_error(
                        "integer division result too large for a float",
                    ));
                }
                return Ok(Some(Value::Float(quotient)));
            }
            FloorDivide => {
                if b.is_zero() {
                    return Err(self.new_zero_division_error("integer division or modulo by zero"));
                }
                a.div_floor(b)
            }
            Remainder => {
                if b.is_zero() {
                    return Err(self.new_zero_division_error("integer modulo by zero"));
                }
                a.mod_floor(b)
            }
            Power => {
                if b.is_negative() {
                    return self.float_op(Power, self.int_to_float(a)?, self.int_to_float(b)?);
                }
                let Some(exponent) = b.to_u64() else {
                    return Err(self.new_overflow_error("exponent too large"));
                };
                Pow::pow(a, exponent)
            }
            Lshift | Rshift => {
                if b.is_negative() {
                    return Err(self.new_value_error("negative shift count"));
                }
                if a.is_zero() {
                    BigInt::zero()
                } else if op == Lshift {
                    let bits = b.to_usize().ok_or_else(|| {
                        self.new_overflow_error("the number is too large to convert to int")
                    })?;
                    a << bits
                } else {
                    a >> b.to_usize().unwrap_or(usize::MAX)
                }
            }
            And => a & b,
            Or => a | b,
            Xor => a ^ b,
            MatrixMultiply => return Ok(None),
        };
        Ok(Some(Value::Int(result)))
    }

    fn float_op(&self, op: BinaryOperator, a: f64, b: f64) -> PyResult<Option<Value>> {
        use BinaryOperator::*;
        let result = match op {
            Add => a + b,
            Subtract => a - b,
            Multiply => a * b,
            Divide => {
                if b == 0.0 {
                    return Err(self.new_zero_division_error("float division by zero"));
                }
                a / b
            }
            FloorDivide => {
                if b == 0.0 {
                    return Err(self.new_zero_division_error("float floor division by zero"));
                }
                ((a - float_mod(a, b)) / b).round()
            }
            Remainder => {
                if b == 0.0 {
                    return Err(self.new_zero_division_error("float modulo by zero"));
                }
                float_mod(a, b)
            }
            Power => {
                if a == 0.0 && b < 0.0 {
                    return Err(self.new_zero_division_error(
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                if a < 0.0 && b.fract() != 0.0 {
                    let result = Complex64::new(a, 0.0).powc(Complex64::new(b, 0.0));
                    return Ok(Some(Value::Complex(result)));
                }
                a.powf(b)
            }
            _ => return Ok(None),
        };
        Ok(Some(Value::Float(result)))
    }

    fn complex_op(&self, op: BinaryOperator, a: Complex64, b: Complex64) -> PyResult<Option<Value>> {
        use BinaryOperator::*;
        let result = match op {
            Add => a + b,
            Subtract => a - b,
            Multiply => a * b,
            Divide => {
                if b.is_zero() {
                    return Err(self.new_zero_division_error("complex division by zero"));
                }
                a / b
            }
            Power => {
                if a.is_zero() && (b.re < 0.0 || b.im != 0.0) {
                    return Err(self.new_zero_division_error(
                        "0.0 to a negative or complex power",
                    ));
                }
                if b.is_zero() {
                    Complex64::new(1.0, 0.0)
                } else {
                    a.powc(b)
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(Value::Complex(result)))
    }

    pub fn unary_op(&self, op: UnaryOperator, value: &Value) -> PyResult {
        let (symbol, method) = match op {
            UnaryOperator::Not => return Ok(Value::Bool(!self.is_true(value)?)),
            UnaryOperator::Minus => ("-", "__neg__"),
            UnaryOperator::Plus => ("+", "__pos__"),
            UnaryOperator::Invert => ("~", "__invert__"),
        };
        let native = match (op, number(value)) {
            (UnaryOperator::Minus, Some(Number::Int(value))) => Some(Value::Int(-value)),
            (UnaryOperator::Minus, Some(Number::Float(value))) => Some(Value::Float(-value)),
            (UnaryOperator::Minus, Some(Number::Complex(value))) => Some(Value::Complex(-value)),
            (UnaryOperator::Plus, Some(Number::Int(value))) => Some(Value::Int(value)),
            (UnaryOperator::Plus, Some(Number::Float(value))) => Some(Value::Float(value)),
            (UnaryOperator::Plus, Some(Number::Complex(value))) => Some(Value::Complex(value)),
            (UnaryOperator::Invert, Some(Number::Int(value))) => {
                Some(Value::Int(-value - BigInt::from(1)))
            }
            _ => None,
        };
        if let Some(result) = native {
            return Ok(result);
        }
        if let Value::Instance(_) = value
            && let Some(method) = self.get_special_method(value, method)?
        {
            return self.call(&method, Vec::new());
        }
        Err(self.new_type_error(format!(
            "bad operand type for unary {symbol}: '{}'",
            self.class_of(value).name
        )))
    }

    pub fn compare(&self, op: ComparisonOperator, a: &Value, b: &Value) -> PyResult {
        match op {
            ComparisonOperator::Is => Ok(Value::Bool(a.is(b))),
            ComparisonOperator::IsNot => Ok(Value::Bool(!a.is(b))),
            ComparisonOperator::In => Ok(Value::Bool(self.contains(b, a)?)),
            ComparisonOperator::NotIn => Ok(Value::Bool(!self.contains(b, a)?)),
            _ => self.rich_compare(op, a, b),
        }
    }

    pub fn compare_bool(&self, op: ComparisonOperator, a: &Value, b: &Value) -> PyResult<bool> {
        match self.compare(op, a, b)? {
            Value::Bool(value) => Ok(value),
            other => self.is_true(&other),
        }
    }

    fn rich_compare(&self, op: ComparisonOperator, a: &Value, b: &Value) -> PyResult {
        let Some((method, reflected)) = compare_method(op) else {
            return Err(self.new_system_error(format!("'{}' is not a rich comparison", op.as_str())));
        };
        if let Value::Instance(_) = a
            && let Some(method) = self.get_special_method(a, method)?
        {
            let result = self.call(&method, vec![b.clone()])?;
            if !matches!(result, Value::NotImplemented) {
                return Ok(result);
            }
        }
        if let Value::Instance(_) = b
            && let Some(method) = self.get_special_method(b, reflected)?
        {
            let result = self.call(&method, vec![a.clone()])?;
            if !matches!(result, Value::NotImplemented) {
                return Ok(result);
            }
        }
        match op {
            ComparisonOperator::Equal => Ok(Value::Bool(self.native_eq(a, b)?)),
            ComparisonOperator::NotEqual => Ok(Value::Bool(
                !self.compare_bool(ComparisonOperator::Equal, a, b)?,
            )),
            _ => match self.native_order(op, a, b)? {
                Some(result) => Ok(Value::Bool(result)),
                None => Err(self.new_type_error(format!(
                    "'{}' not supported between instances of '{}' and '{}'",
                    op.as_str(),
                    self.class_of(a).name,
                    self.class_of(b).name
                ))),
            },
        }
    }

    /// `==` as containers use it: identity implies equality.
    pub fn eq(&self, a: &Value, b: &Value) -> PyResult<bool> {
        if a.is(b) {
            return Ok(true);
        }
        self.compare_bool(ComparisonOperator::Equal, a, b)
    }

    fn sequence_eq(&self, a: &[Value], b: &[Value]) -> PyResult<bool> {
        if a.len() != b.len() {
            return Ok(false);
        }
        for (a, b) in a.iter().zip(b) {
            if !self.eq(a, b)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn native_eq(&self, a: &Value, b: &Value) -> PyResult<bool> {
        if let (Some(x), Some(y)) = (number(a), number(b)) {
            return Ok(match (x, y) {
                (Number::Int(x), Number::Int(y)) => x == y,
                (x @ Number::Complex(_), y) | (x, y @ Number::Complex(_)) => {
                    x.to_complex(self)? == y.to_complex(self)?
                }
                (x, y) => x.to_float(self)? == y.to_float(self)?,
            });
        }
        Ok(match (a, b) {
            (Value::Str(x), Value::Str(y)) => x == y,
            (Value::Bytes(x), Value::Bytes(y)) => x == y,
            (Value::Tuple(x), Value::Tuple(y)) => self.sequence_eq(x, y)?,
            (Value::List(x), Value::List(y)) => {
                let x = x.borrow().clone();
                let y = y.borrow().clone();
                self.sequence_eq(&x, &y)?
            }
            (Value::Dict(x), Value::Dict(y)) => {
                let x = x.borrow().clone();
                let y = y.borrow().clone();
                if x.len() != y.len() {
                    return Ok(false);
                }
                for (hash, _, value) in x.items() {
                    match y.get(hash) {
                        Some(other) if self.eq(value, other)? => {}
                        _ => return Ok(false),
                    }
                }
                true
            }
            (Value::Set(x), Value::Set(y)) => {
                let x = x.borrow();
                let y = y.borrow();
                x.len() == y.len() && x.is_subset(&y)
            }
            (Value::Range(x), Value::Range(y)) => {
                let (lx, ly) = (range_len(x), range_len(y));
                lx == ly
                    && (lx.is_zero()
                        || x.start == y.start && (lx == BigInt::from(1) || x.step == y.step))
            }
            (Value::BoundMethod(x), Value::BoundMethod(y)) => {
                x.receiver.is(&y.receiver) && x.function.is(&y.function)
            }
            _ => a.is(b),
        })
    }

    fn sequence_order(&self, op: ComparisonOperator, a: &[Value], b: &[Value]) -> PyResult<bool> {
        for (x, y) in a.iter().zip(b) {
            if !self.eq(x, y)? {
                return self.compare_bool(op, x, y);
            }
        }
        Ok(ordering_holds(op, Some(a.len().cmp(&b.len()))))
    }

    fn native_order(&self, op: ComparisonOperator, a: &Value, b: &Value) -> PyResult<Option<bool>> {
        if let (Some(x), Some(y)) = (number(a), number(b)) {
            let ordering = match (x, y) {
                (Number::Complex(_), _) | (_, Number::Complex(_)) => return Ok(None),
                (Number::Int(x), Number::Int(y)) => Some(x.cmp(&y)),
                (x, y) => x.to_float(self)?.partial_cmp(&y.to_float(self)?),
            };
            return Ok(Some(ordering_holds(op, ordering)));
        }
        Ok(Some(match (a, b) {
            (Value::Str(x), Value::Str(y)) => ordering_holds(op, Some(x.cmp(y))),
            (Value::Bytes(x), Value::Bytes(y)) => ordering_holds(op, Some(x.cmp(y))),
            (Value::Tuple(x), Value::Tuple(y)) => self.sequence_order(op, x, y)?,
            (Value::List(x), Value::List(y)) => {
                let x = x.borrow().clone();
                let y = y.borrow().clone();
                self.sequence_order(op, &x, &y)?
            }
            (Value::Set(x), Value::Set(y)) => {
                let x = x.borrow();
                let y = y.borrow();
                match op {
                    ComparisonOperator::LessOrEqual => x.is_subset(&y),
                    ComparisonOperator::Less => x.len() < y.len() && x.is_subset(&y),
                    ComparisonOperator::GreaterOrEqual => y.is_subset(&x),
                    _ => y.len() < x.len() && y.is_subset(&x),
                }
            }
            _ => return Ok(None),
        }))
    }

    pub fn lt(&self, a: &Value, b: &Value) -> PyResult<bool> {
        self.compare_bool(ComparisonOperator::Less, a, b)
    }

    pub fn contains(&self, container: &Value, item: &Value) -> PyResult<bool> {
        match container {
            Value::Str(haystack) => match item {
                Value::Str(needle) => Ok(haystack.contains(&**needle)),
                _ => Err(self.new_type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    self.class_of(item).name
                ))),
            },
            Value::Bytes(haystack) => match item {
                Value::Bytes(needle) => Ok(needle.is_empty()
                    || haystack.windows(needle.len()).any(|window| window == &needle[..])),
                _ => {
                    let byte = self.to_bigint(item)?;
                    Ok(byte.to_u8().is_some_and(|byte| haystack.contains(&byte)))
                }
            },
            Value::Dict(dict) => Ok(dict.borrow().contains(&self.hash_key(item)?)),
            Value::Set(set) => Ok(set.borrow().contains(&self.hash_key(item)?)),
            Value::Range(range) => {
                let Some(Number::Int(value)) = number(item) else {
                    return self.contains_by_iteration(container, item);
                };
                let PyRange { start, stop, step } = &**range;
                let in_bounds = if step.is_positive() {
                    start <= &value && &value < stop
                } else {
                    stop < &value && &value <= start
                };
                Ok(in_bounds && (&value - start).mod_floor(step).is_zero())
            }
            Value::Tuple(items) => {
                for element in items.iter() {
                    if self.eq(element, item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Value::List(items) => {
                let items = items.borrow().clone();
                for element in &items {
                    if self.eq(element, item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Value::Instance(_) => match self.get_special_method(container, "__contains__")? {
                Some(method) => {
                    let result = self.call(&method, vec![item.clone()])?;
                    self.is_true(&result)
                }
                None => self.contains_by_iteration(container, item),
            },
            _ => self.contains_by_iteration(container, item),
        }
    }

    fn contains_by_iteration(&self, container: &Value, item: &Value) -> PyResult<bool> {
        let iterator = self.get_iter(container)?;
        while let Some(element) = self.next(&iterator)? {
            if self.eq(&element, item)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Normalizes an integer index against `len`.
    fn sequence_index(&self, index: &Value, len: usize, what: &str) -> PyResult<usize> {
        let index = match index {
            Value::Int(_) | Value::Bool(_) | Value::Instance(_) => self.to_bigint(index)?,
            _ => {
                return Err(self.new_type_error(format!(
                    "{what} indices must be integers or slices, not {}",
                    self.class_of(index).name
                )));
            }
        };
        let len_int = BigInt::from(len);
        let index = if index.is_negative() { index + &len_int } else { index };
        if index.is_negative() || index >= len_int {
            return Err(self.new_index_error(format!("{what} index out of range")));
        }
        index
            .to_usize()
            .ok_or_else(|| self.new_index_error(format!("{what} index out of range")))
    }

    fn slice_bound(&self, value: &Value) -> PyResult<Option<isize>> {
        if value.is_none() {
            return Ok(None);
        }
        let value = self.to_bigint(value).map_err(|_| {
            self.new_type_error(
                "slice indices must be integers or None or have an __index__ method",
            )
        })?;
        Ok(Some(value.to_isize().unwrap_or(if value.is_negative() {
            isize::MIN
        } else {
            isize::MAX
        })))
    }

    /// `(start, stop, step)` of `slice` clamped to a sequence of `len`.
    pub fn slice_indices(&self, slice: &PySlice, len: usize) -> PyResult<(isize, isize, isize)> {
        let len = len as isize;
        let step = self.slice_bound(&slice.step)?.unwrap_or(1);
        if step == 0 {
            return Err(self.new_value_error("slice step cannot be zero"));
        }
        let clamp = |bound: Option<isize>, default: isize| match bound {
            None => default,
            Some(index) if index < 0 => {
                let index = index.saturating_add(len);
                if index < 0 {
                    if step < 0 { -1 } else { 0 }
                } else {
                    index
                }
            }
            Some(index) if index >= len => {
                if step < 0 {
                    len - 1
                } else {
                    len
                }
            }
            Some(index) => index,
        };
        let start = clamp(self.slice_bound(&slice.start)?, if step < 0 { len - 1 } else { 0 });
        let stop = clamp(self.slice_bound(&slice.stop)?, if step < 0 { -1 } else { len });
        Ok((start, stop, step))
    }

    fn slice_items<T: Clone>(&self, items: &[T], slice: &PySlice) -> PyResult<Vec<T>> {
        let (start, stop, step) = self.slice_indices(slice, items.len())?;
        Ok(slice_positions(start, stop, step)
            .into_iter()
            .map(|position| items[position].clone())
            .collect())
    }

    pub fn get_item(&self, obj: &Value, index: Value) -> PyResult {
        match (obj, &index) {
            (Value::List(items), Value::Slice(slice)) => {
                let items = items.borrow().clone();
                Ok(Value::new_list(self.slice_items(&items[..], slice)?))
            }
            (Value::List(items), _) => {
                let len = items.borrow().len();
                let position = self.sequence_index(&index, len, "list")?;
                Ok(items.borrow()[position].clone())
            }
            (Value::Tuple(items), Value::Slice(slice)) => {
                Ok(Value::new_tuple(self.slice_items(&items[..], slice)?))
            }
            (Value::Tuple(items), _) => {
                let position = self.sequence_index(&index, items.len(), "tuple")?;
                Ok(items[position].clone())
            }
            (Value::Str(value), Value::Slice(slice)) => {
                let chars: Vec<char> = value.chars().collect();
                Ok(Value::from(self.slice_items(&chars[..], slice)?.into_iter().collect::<String>()))
            }
            (Value::Str(value), _) => {
                let chars: Vec<char> = value.chars().collect();
                let position = self.sequence_index(&index, chars.len(), "string")?;
                Ok(Value::from(chars[position].to_string()))
            }
            (Value::Bytes(value), Value::Slice(slice)) => {
                Ok(Value::Bytes(self.slice_items(&value[..], slice)?.into()))
            }
            (Value::Bytes(value), _) => {
                let position = self.sequence_index(&index, value.len(), "index")?;
                Ok(Value::from(i64::from(value[position])))
            }
            (Value::Range(range), Value::Slice(slice)) => {
                let len = self.len(obj)?;
                let (start, stop, step) = self.slice_indices(slice, len)?;
                Ok(Value::Range(Rc::new(PyRange {
                    start: &range.start + BigInt::from(start) * &range.step,
                    stop: &range.start + BigInt::from(stop) * &range.step,
                    step: &range.step * BigInt::from(step),
                })))
            }
            (Value::Range(range), _) => {
                let len = self.len(obj)?;
                let position = self.sequence_index(&index, len, "range object")?;
                Ok(Value::Int(&range.start + BigInt::from(position) * &range.step))
            }
            (Value::Dict(dict), _) => {
                let key = self.hash_key(&index)?;
                let found = dict.borrow().get(&key).cloned();
                found.ok_or_else(|| self.new_key_error(index))
            }
            _ => match self.get_special_method(obj, "__getitem__")? {
                Some(method) if matches!(obj, Value::Instance(_)) => self.call(&method, vec![index]),
                _ => Err(self.new_type_error(format!(
                    "'{}' object is not subscriptable",
                    self.class_of(obj).name
                ))),
            },
        }
    }

    pub fn set_item(&self, obj: &Value, index: Value, value: Value) -> PyResult<()> {
        match (obj, &index) {
            (Value::List(items), Value::Slice(slice)) => {
                let replacement = self.collect(&value)?;
                let len = items.borrow().len();
                let (start, stop, step) = self.slice_indices(slice, len)?;
                if step == 1 {
                    let stop = stop.max(start) as usize;
                    items.borrow_mut().splice(start as usize..stop, replacement);
                    return Ok(());
                }
                let positions = slice_positions(start, stop, step);
                if positions.len() != replacement.len() {
                    return Err(self.new_value_error(format!(
                        "attempt to assign sequence of size {} to extended slice of size {}",
                        replacement.len(),
                        positions.len()
                    )));
                }
                let mut items = items.borrow_mut();
                for (position, value) in positions.into_iter().zip(replacement) {
                    items[position] = value;
                }
                Ok(())
            }
            (Value::List(items), _) => {
                let len = items.borrow().len();
                let position = self.sequence_index(&index, len, "list assignment")?;
                items.borrow_mut()[position] = value;
                Ok(())
            }
            (Value::Dict(dict), _) => {
                let hash = self.hash_key(&index)?;
                dict.borrow_mut().insert(hash, index, value);
                Ok(())
            }
            (Value::Instance(_), _) => match self.get_special_method(obj, "__setitem__")? {
                Some(method) => self.call(&method, vec![index, value]).map(drop),
                None => Err(self.no_item_assignment(obj)),
            },
            _ => Err(self.no_item_assignment(obj)),
        }
    }

    fn no_item_assignment(&self, obj: &Value) -> Unwind {
        self.new_type_error(format!(
            "'{}' object does not support item assignment",
            self.class_of(obj).name
        ))
    }

    pub fn del_item(&self, obj: &Value, index: Value) -> PyResult<()> {
        match (obj, &index) {
            (Value::List(items), Value::Slice(slice)) => {
                let len = items.borrow().len();
                let (start, stop, step) = self.slice_indices(slice, len)?;
                let mut positions = slice_positions(start, stop, step);
                positions.sort_unstable();
                let mut items = items.borrow_mut();
                for position in positions.into_iter().rev() {
                    items.remove(position);
                }
                Ok(())
            }
            (Value::List(items), _) => {
                let len = items.borrow().len();
                let position = self.sequence_index(&index, len, "list assignment")?;
                items.borrow_mut().remove(position);
                Ok(())
            }
            (Value::Dict(dict), _) => {
                let hash = self.hash_key(&index)?;
                match dict.borrow_mut().remove(&hash) {
                    Some(_) => Ok(()),
                    None => Err(self.new_key_error(index)),
                }
            }
            (Value::Instance(_), _) => match self.get_special_method(obj, "__delitem__")? {
                Some(method) => self.call(&method, vec![index]).map(drop),
                None => Err(self.no_item_deletion(obj)),
            },
            _ => Err(self.no_item_deletion(obj)),
        }
    }

    fn no_item_deletion(&self, obj: &Value) -> Unwind {
        self.new_type_error(format!(
            "'{}' object doesn't support item deletion",
            self.class_of(obj).name
        ))
    }

    pub fn get_iter(&self, obj: &Value) -> PyResult {
        let state = match obj {
            Value::Iterator(_) | Value::Generator(_) => return Ok(obj.clone()),
            Value::List(_) => IterState::Sequence {
                sequence: obj.clone(),
                index: 0,
            },
            Value::Tuple(items) => IterState::Items {
                items: items.clone(),
                index: 0,
            },
            Value::Str(value) => IterState::Items {
                items: value.chars().map(|c| Value::from(c.to_string())).collect(),
                index: 0,
            },
            Value::Bytes(value) => IterState::Items {
                items: value.iter().map(|&byte| Value::from(i64::from(byte))).collect(),
                index: 0,
            },
            Value::Dict(dict) => IterState::Items {
                items: dict.borrow().keys().into(),
                index: 0,
            },
            Value::Set(set) => IterState::Items {
                items: set.borrow().values().into(),
                index: 0,
            },
            Value::Range(range) => IterState::Range {
                next: range.start.clone(),
                stop: range.stop.clone(),
                step: range.step.clone(),
            },
            Value::Instance(_) => {
                if let Some(method) = self.get_special_method(obj, "__iter__")? {
                    let iterator = self.call(&method, Vec::new())?;
                    let is_iterator = matches!(iterator, Value::Iterator(_) | Value::Generator(_))
                        || self.get_special_method(&iterator, "__next__")?.is_some();
                    if !is_iterator {
                        return Err(self.new_type_error(format!(
                            "iter() returned non-iterator of type '{}'",
                            self.class_of(&iterator).name
                        )));
                    }
                    return Ok(iterator);
                }
                if self.get_special_method(obj, "__getitem__")?.is_none() {
                    return Err(self.not_iterable(obj));
                }
                IterState::Sequence {
                    sequence: obj.clone(),
                    index: 0,
                }
            }
            _ => return Err(self.not_iterable(obj)),
        };
        Ok(Value::new_iterator(state))
    }

    fn not_iterable(&self, obj: &Value) -> Unwind {
        self.new_type_error(format!(
            "'{}' object is not iterable",
            self.class_of(obj).name
        ))
    }

    /// Advances an iterator; `None` once it is exhausted.
    pub fn next(&self, iterator: &Value) -> PyResult<Option<Value>> {
        match iterator {
            Value::Iterator(iterator) => self.iterator_next(iterator),
            Value::Generator(generator) => match generator.send(self, Value::None)? {
                IterReturn::Yield(value) => Ok(Some(value)),
                IterReturn::Return(_) => Ok(None),
            },
            _ => {
                let Some(method) = self.get_special_method(iterator, "__next__")? else {
                    return Err(self.new_type_error(format!(
                        "'{}' object is not an iterator",
                        self.class_of(iterator).name
                    )));
                };
                match self.call(&method, Vec::new()) {
                    Ok(value) => Ok(Some(value)),
                    Err(Unwind::Exception(exc))
                        if self.is_instance(&exc, &self.exceptions.stop_iteration) =>
                    {
                        Ok(None)
                    }
                    Err(error) => Err(error),
                }
            }
        }
    }

    fn iterator_next(&self, iterator: &PyIterator) -> PyResult<Option<Value>> {
        let mut state = iterator.state.borrow_mut();
        let item = match &mut *state {
            IterState::Exhausted => None,
            IterState::Items { items, index } => {
                let item = items.get(*index).cloned();
                *index += 1;
                item
            }
            IterState::Range { next, stop, step } => {
                if (step.is_positive() && &*next < stop) || (step.is_negative() && &*next > stop) {
                    let item = next.clone();
                    *next += &*step;
                    Some(Value::Int(item))
                } else {
                    None
                }
            }
            IterState::Sequence {
                sequence: Value::List(items),
                index,
            } => {
                let item = items.borrow().get(*index).cloned();
                *index += 1;
                item
            }
            IterState::Sequence { sequence, index } => {
                let (sequence, position) = (sequence.clone(), *index);
                drop(state);
                let item = match self.get_item(&sequence, Value::from(position)) {
                    Ok(item) => Some(item),
                    Err(Unwind::Exception(exc))
                        if self.is_instance(&exc, &self.exceptions.index_error)
                            || self.is_instance(&exc, &self.exceptions.stop_iteration) =>
                    {
                        None
                    }
                    Err(error) => return Err(error),
                };
                state = iterator.state.borrow_mut();
                if let IterState::Sequence { index, .. } = &mut *state {
                    *index += 1;
                }
                item
            }
            IterState::Enumerate { iterator: inner, .. } => {
                let inner = inner.clone();
                drop(state);
                let item = self.next(&inner)?;
                state = iterator.state.borrow_mut();
                match (item, &mut *state) {
                    (Some(item), IterState::Enumerate { count, .. }) => {
                        let pair = Value::new_tuple(vec![Value::Int(count.clone()), item]);
                        *count += BigInt::from(1);
                        Some(pair)
                    }
                    _ => None,
                }
            }
            IterState::Zip(iterators) => {
                let iterators = iterators.clone();
                drop(state);
                let mut items = Vec::with_capacity(iterators.len());
                for inner in &iterators {
                    match self.next(inner)? {
                        Some(item) => items.push(item),
                        None => break,
                    }
                }
                state = iterator.state.borrow_mut();
                (items.len() == iterators.len() && !items.is_empty())
                    .then(|| Value::new_tuple(items))
            }
        };
        if item.is_none() {
            *state = IterState::Exhausted;
        }
        Ok(item)
    }

    pub fn collect(&self, iterable: &Value) -> PyResult<Vec<Value>> {
        match iterable {
            Value::List(items) => Ok(items.borrow().clone()),
            Value::Tuple(items) => Ok(items.to_vec()),
            _ => {
                let iterator = self.get_iter(iterable)?;
                let mut items = Vec::new();
                while let Some(item) = self.next(&iterator)? {
                    items.push(item);
                }
                Ok(items)
            }
        }
    }

    /// Splits `value` for an unpacking assignment of `count` targets, the
    /// one at `star` collecting the rest into a list.
    pub fn unpack(&self, value: &Value, count: usize, star: Option<usize>) -> PyResult<Vec<Value>> {
        let items = match self.collect(value) {
            Ok(items) => items,
            Err(Unwind::Exception(exc))
                if self.is_instance(&exc, &self.exceptions.type_error)
                    && self.get_iter(value).is_err() =>
            {
                return Err(self.new_type_error(format!(
                    "cannot unpack non-iterable {} object",
                    self.class_of(value).name
                )));
            }
            Err(error) => return Err(error),
        };
        let len = items.len();
        match star {
            None if len < count => Err(self.new_value_error(format!(
                "not enough values to unpack (expected {count}, got {len})"
            ))),
            None if len > count => Err(self.new_value_error(format!(
                "too many values to unpack (expected {count})"
            ))),
            None => Ok(items),
            Some(star) => {
                let required = count - 1;
                if len < required {
                    return Err(self.new_value_error(format!(
                        "not enough values to unpack (expected at least {required}, got {len})"
                    )));
                }
                let after = required - star;
                let mut items = items;
                let tail = items.split_off(len - after);
                let middle = items.split_off(star);
                items.push(Value::new_list(middle));
                items.extend(tail);
                Ok(items)
            }
        }
    }

    /// Stable sort that stops at the first failing comparison.
    pub fn sort_values(
        &self,
        values: Vec<Value>,
        key: Option<&Value>,
        reverse: bool,
    ) -> PyResult<Vec<Value>> {
        let keyed = values
            .into_iter()
            .map(|value| {
                let key = match key {
                    Some(key) if !key.is_none() => self.call(key, vec![value.clone()])?,
                    _ => value.clone(),
                };
                Ok((key, value))
            })
            .collect::<PyResult<Vec<_>>>()?;
        let sorted = self.merge_sort(keyed, reverse)?;
        Ok(sorted.into_iter().map(|(_, value)| value).collect())
    }

    fn merge_sort(&self, mut items: Vec<(Value, Value)>, reverse: bool) -> PyResult<Vec<(Value, Value)>> {
        if items.len() <= 1 {
            return Ok(items);
        }
        let right = items.split_off(items.len() / 2);
        let left = self.merge_sort(items, reverse)?;
        let right = self.merge_sort(right, reverse)?;
        let mut merged = Vec::with_capacity(left.len() + right.len());
        let mut left = left.into_iter().peekable();
        let mut right = right.into_iter().peekable();
        while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
            let take_right = if reverse {
                self.lt(&l.0, &r.0)?
            } else {
                self.lt(&r.0, &l.0)?
            };
            let next = if take_right { right.next() } else { left.next() };
            merged.extend(next);
        }
        merged.extend(left);
        merged.extend(right);
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Interpreter, Settings};

    fn int(value: i64) -> Value {
        Value::from(value)
    }

    fn error_message(vm: &VirtualMachine, result: PyResult) -> String {
        match result {
            Err(Unwind::Exception(exc)) => vm.format_exception(&exc),
            other => panic!("expected an exception, got {other:?}"),
        }
    }

    #[test]
    fn floor_division_and_modulo_round_down() {
        Interpreter::new(Settings::default()).enter(|vm| {
            let div = vm.binary_op(BinaryOperator::FloorDivide, &int(-7), &int(2), false);
            assert!(matches!(div, Ok(Value::Int(v)) if v == BigInt::from(-4)));
            let rem = vm.binary_op(BinaryOperator::Remainder, &int(-7), &int(2), false);
            assert!(matches!(rem, Ok(Value::Int(v)) if v == BigInt::from(1)));
            let rem = vm.binary_op(BinaryOperator::Remainder, &Value::Float(-7.0), &int(2), false);
            assert!(matches!(rem, Ok(Value::Float(v)) if v == 1.0));
        });
    }

    #[test]
    fn division_by_zero_messages() {
        Interpreter::new(Settings::default()).enter(|vm| {
            let result = vm.binary_op(BinaryOperator::Divide, &int(1), &int(0), false);
            assert_eq!(error_message(vm, result), "ZeroDivisionError: division by zero");
            let result = vm.binary_op(BinaryOperator::Remainder, &int(1), &int(0), false);
            assert_eq!(
                error_message(vm, result),
                "ZeroDivisionError: integer modulo by zero"
            );
        });
    }

    #[test]
    fn unsupported_operands_name_both_types() {
        Interpreter::new(Settings::default()).enter(|vm| {
            let result = vm.binary_op(BinaryOperator::Add, &int(1), &Value::from("a"), false);
            assert_eq!(
                error_message(vm, result),
                "TypeError: unsupported operand type(s) for +: 'int' and 'str'"
            );
        });
    }

    #[test]
    fn star_unpacking_collects_the_middle() {
        Interpreter::new(Settings::default()).enter(|vm| {
            let value = Value::new_list((1..=5).map(int).collect());
            let parts = vm.unpack(&value, 3, Some(1)).unwrap();
            assert_eq!(parts.len(), 3);
            assert!(matches!(&parts[1], Value::List(middle) if middle.borrow().len() == 3));
            let short = vm.unpack(&Value::new_list(vec![int(1)]), 3, Some(1));
            assert!(short.is_err());
        });
    }

    #[test]
    fn slices_clamp_like_python() {
        Interpreter::new(Settings::default()).enter(|vm| {
            let slice = PySlice {
                start: int(-100),
                stop: Value::None,
                step: int(-2),
            };
            assert_eq!(vm.slice_indices(&slice, 5).unwrap(), (-1, -1, -2));
            let slice = PySlice {
                start: Value::None,
                stop: Value::None,
                step: int(-2),
            };
            let (start, stop, step) = vm.slice_indices(&slice, 5).unwrap();
            assert_eq!(slice_positions(start, stop, step), [4, 2, 0]);
        });
    }

    #[test]
    fn ranges_know_their_length() {
        let range = |start: i64, stop: i64, step: i64| PyRange {
            start: start.into(),
            stop: stop.into(),
            step: step.into(),
        };
        assert_eq!(range_len(&range(0, 10, 3)), BigInt::from(4));
        assert_eq!(range_len(&range(10, 0, -3)), BigInt::from(4));
        assert_eq!(range_len(&range(5, 0, 1)), BigInt::zero());
    }

    #[test]
    fn sorting_is_stable_in_both_directions() {
        Interpreter::new(Settings::default()).enter(|vm| {
            let pairs: Vec<Value> = [(1, "a"), (0, "b"), (1, "c"), (0, "d")]
                .into_iter()
                .map(|(k, v)| Value::new_tuple(vec![int(k), Value::from(v)]))
                .collect();
            let sorted = vm.sort_values(pairs.clone(), None, true).unwrap();
            let names: Vec<String> = sorted.iter().map(|v| vm.repr(v).unwrap()).collect();
            assert_eq!(names, ["(1, 'c')", "(1, 'a')", "(0, 'd')", "(0, 'b')"]);
        });
    }
}
