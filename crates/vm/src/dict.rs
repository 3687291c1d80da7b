//! Insertion-ordered dictionaries and sets keyed by hashable values.

use crate::{IndexMap, PyResult, VirtualMachine, value::Value};
use alloc::rc::Rc;
use malachite_bigint::BigInt;
use num_traits::FromPrimitive;

/// The hashable identity of a key.
///
/// Numbers that compare equal share a key, so `1`, `1.0` and `True` find
/// the same entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Ellipsis,
    Int(BigInt),
    Float(u64),
    Complex(u64, u64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    Tuple(Vec<HashKey>),
    /// Objects hashed by identity.
    Identity(usize),
}

impl HashKey {
    pub fn str(name: &str) -> Self {
        Self::Str(Rc::from(name))
    }

    fn float(value: f64) -> Self {
        if value.fract() == 0.0
            && let Some(int) = BigInt::from_f64(value)
        {
            Self::Int(int)
        } else {
            Self::Float(value.to_bits())
        }
    }
}

impl VirtualMachine {
    pub fn hash_key(&self, value: &Value) -> PyResult<HashKey> {
        Ok(match value {
            Value::None => HashKey::None,
            Value::Ellipsis => HashKey::Ellipsis,
            Value::Bool(value) => HashKey::Int(BigInt::from(u8::from(*value))),
            Value::Int(value) => HashKey::Int(value.clone()),
            Value::Float(value) => HashKey::float(*value),
            Value::Complex(value) if value.im == 0.0 => HashKey::float(value.re),
            Value::Complex(value) => HashKey::Complex(value.re.to_bits(), value.im.to_bits()),
            Value::Str(value) => HashKey::Str(value.clone()),
            Value::Bytes(value) => HashKey::Bytes(value.clone()),
            Value::Tuple(elements) => HashKey::Tuple(
                elements
                    .iter()
                    .map(|element| self.hash_key(element))
                    .collect::<PyResult<_>>()?,
            ),
            Value::List(_) | Value::Dict(_) | Value::Set(_) | Value::Slice(_) => {
                return Err(self.new_type_error(format!(
                    "unhashable type: '{}'",
                    self.class_of(value).name
                )));
            }
            other => HashKey::Identity(other.address().unwrap_or_default()),
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct PyDict {
    entries: IndexMap<HashKey, (Value, Value)>,
}

impl PyDict {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &HashKey) -> Option<&Value> {
        self.entries.get(key).map(|(_, value)| value)
    }

    pub fn contains(&self, key: &HashKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Keeps the original key object when the entry already exists.
    pub fn insert(&mut self, hash: HashKey, key: Value, value: Value) {
        match self.entries.get_mut(&hash) {
            Some(entry) => entry.1 = value,
            None => {
                self.entries.insert(hash, (key, value));
            }
        }
    }

    pub fn remove(&mut self, key: &HashKey) -> Option<(Value, Value)> {
        self.entries.shift_remove(key)
    }

    pub fn get_str(&self, name: &str) -> Option<Value> {
        self.get(&HashKey::str(name)).cloned()
    }

    pub fn set_str(&mut self, name: &str, value: Value) {
        self.insert(HashKey::str(name), Value::new_str(name), value);
    }

    pub fn remove_str(&mut self, name: &str) -> Option<Value> {
        self.remove(&HashKey::str(name)).map(|(_, value)| value)
    }

    pub fn pop_last(&mut self) -> Option<(Value, Value)> {
        self.entries.pop().map(|(_, entry)| entry)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.values().map(|(key, _)| key.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.values().map(|(_, value)| value.clone()).collect()
    }

    pub fn items(&self) -> impl Iterator<Item = (&HashKey, &Value, &Value)> {
        self.entries
            .iter()
            .map(|(hash, (key, value))| (hash, key, value))
    }
}

#[derive(Clone, Debug, Default)]
pub struct PySet {
    entries: IndexMap<HashKey, Value>,
}

impl PySet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &HashKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, hash: HashKey, value: Value) {
        self.entries.entry(hash).or_insert(value);
    }

    pub fn remove(&mut self, key: &HashKey) -> Option<Value> {
        self.entries.shift_remove(key)
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.entries.shift_remove_index(0).map(|(_, value)| value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HashKey, &Value)> {
        self.entries.iter()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.values().cloned().collect()
    }

    pub fn is_subset(&self, other: &Self) -> bool {
        self.entries.keys().all(|key| other.contains(key))
    }
}

impl VirtualMachine {
    pub fn set_from_values(&self, values: impl IntoIterator<Item = Value>) -> PyResult<PySet> {
        let mut set = PySet::default();
        for value in values {
            set.insert(self.hash_key(&value)?, value);
        }
        Ok(set)
    }

    pub fn dict_get_item(&self, dict: &PyDict, key: &Value) -> PyResult<Value> {
        dict.get(&self.hash_key(key)?)
            .cloned()
            .ok_or_else(|| self.new_key_error(key.clone()))
    }

    /// `dict.update`: a mapping or an iterable of pairs.
    pub fn dict_update(&self, dict: &mut PyDict, source: &Value) -> PyResult<()> {
        if let Value::Dict(other) = source {
            let other = other.borrow().clone();
            for (hash, key, value) in other.items() {
                dict.insert(hash.clone(), key.clone(), value.clone());
            }
            return Ok(());
        }
        if let Some(keys) = self.get_attribute_opt(source, "keys")? {
            let keys = self.call(&keys, Vec::new())?;
            for key in self.collect(&keys)? {
                let value = self.get_item(source, key.clone())?;
                dict.insert(self.hash_key(&key)?, key, value);
            }
            return Ok(());
        }
        for pair in self.collect(source)? {
            let [key, value]: [Value; 2] = self.collect(&pair)?.try_into().map_err(|pair: Vec<_>| {
                self.new_value_error(format!(
                    "dictionary update sequence element has length {}; 2 is required",
                    pair.len()
                ))
            })?;
            dict.insert(self.hash_key(&key)?, key, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Interpreter, Settings};

    #[test]
    fn equal_numbers_share_a_key() {
        Interpreter::new(Settings::default()).enter(|vm| {
            let one = vm.hash_key(&Value::from(1i64)).unwrap();
            assert_eq!(vm.hash_key(&Value::Float(1.0)).unwrap(), one);
            assert_eq!(vm.hash_key(&Value::Bool(true)).unwrap(), one);
            assert_ne!(vm.hash_key(&Value::Float(1.5)).unwrap(), one);
        });
    }

    #[test]
    fn lists_are_unhashable() {
        Interpreter::new(Settings::default()).enter(|vm| {
            assert!(vm.hash_key(&Value::new_list(Vec::new())).is_err());
            let nested = Value::new_tuple(vec![Value::new_list(Vec::new())]);
            assert!(vm.hash_key(&nested).is_err());
        });
    }

    #[test]
    fn reinserting_keeps_order_and_first_key() {
        let mut dict = PyDict::default();
        dict.set_str("a", Value::from(1i64));
        dict.set_str("b", Value::from(2i64));
        dict.set_str("a", Value::from(3i64));
        let keys: Vec<_> = dict.keys().into_iter().map(|key| format!("{key:?}")).collect();
        assert_eq!(keys, ["Str(\"a\")", "Str(\"b\")"]);
        assert!(matches!(dict.get_str("a"), Some(Value::Int(v)) if v == BigInt::from(3)));
    }
}
