//! Runtime values and the heap arena that owns mutable containers.
//!
//! Immediate values (numbers, strings, ranges, builtins) live inline in [`Value`].
//! Lists, tuples, dicts and user functions live in the [`Heap`] and are referenced by
//! [`HeapId`], so aliasing (`b = a; b.append(1)`) behaves like Python. The heap is
//! reset together with the globals, so no collector is needed.

use std::{cmp::Ordering, fmt::Write, sync::Arc};

use ahash::AHashMap;
use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive};

use super::{
    ast::FunctionDef,
    builtins::Builtin,
    exception::{ExcType, RunResult, raise},
    format::{float_repr, string_repr},
    modules::{Module, ModuleFunction},
};

/// Container nesting beyond which `repr` elides and comparisons raise `RecursionError`.
pub(crate) const MAX_DATA_DEPTH: usize = 1000;

/// Index of an object stored in the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct HeapId(usize);

/// A user-defined function or lambda.
#[derive(Debug)]
pub(crate) struct UserFunction {
    pub def: Arc<FunctionDef>,
    /// Evaluated default values, aligned with the trailing parameters that declare one.
    pub defaults: Vec<Value>,
    /// Snapshot of the enclosing function's locals at definition time.
    pub captured: AHashMap<String, Value>,
}

#[derive(Debug)]
pub(crate) enum HeapData {
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(IndexMap<DictKey, Value>),
    Function(Arc<UserFunction>),
}

#[derive(Debug, Default)]
pub(crate) struct Heap {
    objects: Vec<HeapData>,
}

impl Heap {
    pub fn allocate(&mut self, data: HeapData) -> HeapId {
        let id = HeapId(self.objects.len());
        self.objects.push(data);
        id
    }

    pub fn get(&self, id: HeapId) -> &HeapData {
        &self.objects[id.0]
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self.objects[id.0]
    }

    pub fn clear(&mut self) {
        self.objects.clear();
    }

    pub fn new_list(&mut self, items: Vec<Value>) -> Value {
        Value::Ref(self.allocate(HeapData::List(items)))
    }

    pub fn new_tuple(&mut self, items: Vec<Value>) -> Value {
        Value::Ref(self.allocate(HeapData::Tuple(items)))
    }

    pub fn new_dict(&mut self, entries: IndexMap<DictKey, Value>) -> Value {
        Value::Ref(self.allocate(HeapData::Dict(entries)))
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Value {
    None,
    Bool(bool),
    Int(i64),
    /// An int outside the `i64` range; anything that fits is always `Int`.
    BigInt(BigInt),
    Float(f64),
    Str(String),
    Range { start: i64, stop: i64, step: i64 },
    Ref(HeapId),
    Builtin(Builtin),
    Module(Module),
    ModuleFunction(ModuleFunction),
    /// An exception class such as `ValueError`, callable to build an instance.
    ExcClass(ExcType),
    /// An exception instance.
    Exception(ExcType, String),
}

/// Hashable projection of a value, used for dict keys.
///
/// Integral floats collapse onto `Int`, so `d[1]` and `d[1.0]` address the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum DictKey {
    None,
    Bool(bool),
    Int(i64),
    BigInt(BigInt),
    Float(u64),
    Str(String),
    Tuple(Vec<DictKey>),
}

fn int_key(value: BigInt) -> DictKey {
    match value.to_i64() {
        Some(i) => DictKey::Int(i),
        None => DictKey::BigInt(value),
    }
}

fn nested(depth: usize) -> RunResult<usize> {
    if depth >= MAX_DATA_DEPTH {
        raise(ExcType::RecursionError, "maximum recursion depth exceeded in comparison")
    } else {
        Ok(depth + 1)
    }
}

impl DictKey {
    pub fn to_value(&self, heap: &mut Heap) -> Value {
        match self {
            Self::None => Value::None,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::BigInt(i) => Value::BigInt(i.clone()),
            Self::Float(bits) => Value::Float(f64::from_bits(*bits)),
            Self::Str(s) => Value::Str(s.clone()),
            Self::Tuple(items) => {
                let items = items.iter().map(|item| item.to_value(heap)).collect();
                heap.new_tuple(items)
            }
        }
    }
}

/// Number of elements in a `range(start, stop, step)`.
pub(crate) fn range_len(start: i64, stop: i64, step: i64) -> usize {
    let (lo, hi, step) = if step > 0 {
        (i128::from(start), i128::from(stop), i128::from(step))
    } else {
        (i128::from(stop), i128::from(start), -i128::from(step))
    };
    if hi <= lo {
        0
    } else {
        usize::try_from((hi - lo + step - 1) / step).unwrap_or(usize::MAX)
    }
}

impl Value {
    /// Wraps an integer result, narrowing to `Int` when it fits.
    pub fn from_bigint(value: BigInt) -> Self {
        match value.to_i64() {
            Some(i) => Self::Int(i),
            None => Self::BigInt(value),
        }
    }

    pub fn type_name(&self, heap: &Heap) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::BigInt(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Range { .. } => "range",
            Self::Ref(id) => match heap.get(*id) {
                HeapData::List(_) => "list",
                HeapData::Tuple(_) => "tuple",
                HeapData::Dict(_) => "dict",
                HeapData::Function(_) => "function",
            },
            Self::Builtin(_) | Self::ModuleFunction(_) => "builtin_function_or_method",
            Self::Module(_) => "module",
            Self::ExcClass(_) => "type",
            Self::Exception(exc_type, _) => (*exc_type).into(),
        }
    }

    pub fn truthy(&self, heap: &Heap) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Range { start, stop, step } => range_len(*start, *stop, *step) > 0,
            Self::Ref(id) => match heap.get(*id) {
                HeapData::List(items) | HeapData::Tuple(items) => !items.is_empty(),
                HeapData::Dict(entries) => !entries.is_empty(),
                HeapData::Function(_) => true,
            },
            _ => true,
        }
    }

    pub fn to_key(&self, heap: &Heap) -> RunResult<DictKey> {
        self.key_at(heap, 0)
    }

    fn key_at(&self, heap: &Heap, depth: usize) -> RunResult<DictKey> {
        Ok(match self {
            Self::None => DictKey::None,
            Self::Bool(b) => DictKey::Bool(*b),
            Self::Int(i) => DictKey::Int(*i),
            Self::BigInt(i) => DictKey::BigInt(i.clone()),
            Self::Float(f) if f.fract() == 0.0 => BigInt::from_f64(*f).map_or(DictKey::Float(f.to_bits()), int_key),
            Self::Float(f) => DictKey::Float(f.to_bits()),
            Self::Str(s) => DictKey::Str(s.clone()),
            Self::Ref(id) => match heap.get(*id) {
                HeapData::Tuple(items) => {
                    let depth = nested(depth)?;
                    DictKey::Tuple(
                        items
                            .iter()
                            .map(|item| item.key_at(heap, depth))
                            .collect::<RunResult<_>>()?,
                    )
                }
                _ => return raise(ExcType::TypeError, format!("unhashable type: '{}'", self.type_name(heap))),
            },
            _ => return raise(ExcType::TypeError, format!("unhashable type: '{}'", self.type_name(heap))),
        })
    }

    /// Numeric view used by arithmetic and comparisons; bools count as ints.
    pub fn as_number(&self) -> Option<Number> {
        match self {
            Self::Bool(b) => Some(Number::Int(i64::from(*b))),
            Self::Int(i) => Some(Number::Int(*i)),
            Self::BigInt(i) => Some(Number::Big(i.clone())),
            Self::Float(f) => Some(Number::Float(*f)),
            _ => None,
        }
    }

    /// Integer view for indices and counts; floats and ints beyond `i64` are rejected.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn py_str(&self, heap: &Heap) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Exception(_, message) => message.clone(),
            _ => self.py_repr(heap),
        }
    }

    pub fn py_repr(&self, heap: &Heap) -> String {
        let mut out = String::new();
        let mut active = Vec::new();
        self.repr_into(heap, &mut out, &mut active);
        out
    }

    fn repr_into(&self, heap: &Heap, out: &mut String, active: &mut Vec<HeapId>) {
        match self {
            Self::None => out.push_str("None"),
            Self::Bool(true) => out.push_str("True"),
            Self::Bool(false) => out.push_str("False"),
            Self::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Self::BigInt(i) => {
                let _ = write!(out, "{i}");
            }
            Self::Float(f) => out.push_str(&float_repr(*f)),
            Self::Str(s) => out.push_str(&string_repr(s)),
            Self::Range { start, stop, step } => {
                if *step == 1 {
                    let _ = write!(out, "range({start}, {stop})");
                } else {
                    let _ = write!(out, "range({start}, {stop}, {step})");
                }
            }
            Self::Builtin(builtin) => {
                let name: &'static str = builtin.into();
                let _ = write!(out, "<built-in function {name}>");
            }
            Self::ModuleFunction(function) => {
                let _ = write!(out, "<built-in function {}>", function.name());
            }
            Self::Module(module) => {
                let name: &'static str = module.into();
                let _ = write!(out, "<module '{name}'>");
            }
            Self::ExcClass(exc_type) => {
                let _ = write!(out, "<class '{exc_type}'>");
            }
            Self::Exception(exc_type, message) => {
                let _ = write!(out, "{exc_type}({})", string_repr(message));
            }
            Self::Ref(id) => {
                if active.contains(id) || active.len() >= MAX_DATA_DEPTH {
                    out.push_str(match heap.get(*id) {
                        HeapData::Dict(_) => "{...}",
                        HeapData::Tuple(_) => "(...)",
                        _ => "[...]",
                    });
                    return;
                }
                active.push(*id);
                match heap.get(*id) {
                    HeapData::List(items) => {
                        out.push('[');
                        repr_items(items, heap, out, active);
                        out.push(']');
                    }
                    HeapData::Tuple(items) => {
                        out.push('(');
                        repr_items(items, heap, out, active);
                        if items.len() == 1 {
                            out.push(',');
                        }
                        out.push(')');
                    }
                    HeapData::Dict(entries) => {
                        out.push('{');
                        for (i, (key, value)) in entries.iter().enumerate() {
                            if i > 0 {
                                out.push_str(", ");
                            }
                            key_repr(key, out);
                            out.push_str(": ");
                            value.repr_into(heap, out, active);
                        }
                        out.push('}');
                    }
                    HeapData::Function(function) => {
                        let _ = write!(out, "<function {}>", function.def.name);
                    }
                }
                active.pop();
            }
        }
    }
}

fn repr_items(items: &[Value], heap: &Heap, out: &mut String, active: &mut Vec<HeapId>) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.repr_into(heap, out, active);
    }
}

pub(crate) fn key_repr(key: &DictKey, out: &mut String) {
    match key {
        DictKey::None => out.push_str("None"),
        DictKey::Bool(true) => out.push_str("True"),
        DictKey::Bool(false) => out.push_str("False"),
        DictKey::Int(i) => {
            let _ = write!(out, "{i}");
        }
        DictKey::BigInt(i) => {
            let _ = write!(out, "{i}");
        }
        DictKey::Float(bits) => out.push_str(&float_repr(f64::from_bits(*bits))),
        DictKey::Str(s) => out.push_str(&string_repr(s)),
        DictKey::Tuple(items) => {
            out.push('(');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                key_repr(item, out);
            }
            if items.len() == 1 {
                out.push(',');
            }
            out.push(')');
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Number {
    Int(i64),
    Big(BigInt),
    Float(f64),
}

impl Number {
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Int(i) => *i as f64,
            Self::Big(i) => i.to_f64().unwrap_or(f64::NAN),
            Self::Float(f) => *f,
        }
    }

    /// Exact integer value; `None` for floats.
    pub fn to_bigint(&self) -> Option<BigInt> {
        match self {
            Self::Int(i) => Some(BigInt::from(*i)),
            Self::Big(i) => Some(i.clone()),
            Self::Float(_) => None,
        }
    }
}

fn number_cmp(left: &Number, right: &Number) -> Option<Ordering> {
    match (left, right) {
        (Number::Int(a), Number::Int(b)) => Some(a.cmp(b)),
        (Number::Float(_), _) | (_, Number::Float(_)) => left.as_f64().partial_cmp(&right.as_f64()),
        _ => Some(left.to_bigint()?.cmp(&right.to_bigint()?)),
    }
}

/// Python `==`.
///
/// Raises `RecursionError` for containers nested deeper than [`MAX_DATA_DEPTH`].
pub(crate) fn py_eq(left: &Value, right: &Value, heap: &Heap) -> RunResult<bool> {
    eq_at(left, right, heap, 0)
}

fn eq_at(left: &Value, right: &Value, heap: &Heap, depth: usize) -> RunResult<bool> {
    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        return Ok(number_cmp(&a, &b) == Some(Ordering::Equal));
    }
    Ok(match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Str(a), Value::Str(b)) => a == b,
        (
            Value::Range { start, stop, step },
            Value::Range {
                start: s2,
                stop: e2,
                step: st2,
            },
        ) => (start, stop, step) == (s2, e2, st2),
        (Value::Builtin(a), Value::Builtin(b)) => a == b,
        (Value::Module(a), Value::Module(b)) => a == b,
        (Value::ModuleFunction(a), Value::ModuleFunction(b)) => a == b,
        (Value::ExcClass(a), Value::ExcClass(b)) => a == b,
        (Value::Ref(a), Value::Ref(b)) => {
            if a == b {
                return Ok(true);
            }
            match (heap.get(*a), heap.get(*b)) {
                (HeapData::List(x), HeapData::List(y)) | (HeapData::Tuple(x), HeapData::Tuple(y)) => {
                    if x.len() != y.len() {
                        return Ok(false);
                    }
                    let depth = nested(depth)?;
                    for (p, q) in x.iter().zip(y) {
                        if !eq_at(p, q, heap, depth)? {
                            return Ok(false);
                        }
                    }
                    true
                }
                (HeapData::Dict(x), HeapData::Dict(y)) => {
                    if x.len() != y.len() {
                        return Ok(false);
                    }
                    let depth = nested(depth)?;
                    for (key, value) in x {
                        let Some(other) = y.get(key) else {
                            return Ok(false);
                        };
                        if !eq_at(value, other, heap, depth)? {
                            return Ok(false);
                        }
                    }
                    true
                }
                _ => false,
            }
        }
        _ => false,
    })
}

/// Python `is`: identity for heap objects, equality for immutable immediates.
pub(crate) fn py_is(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::BigInt(a), Value::BigInt(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Ref(a), Value::Ref(b)) => a == b,
        (Value::Builtin(a), Value::Builtin(b)) => a == b,
        (Value::ExcClass(a), Value::ExcClass(b)) => a == b,
        _ => false,
    }
}

/// Python ordering; `Ok(None)` means the operands are not orderable.
pub(crate) fn py_cmp(left: &Value, right: &Value, heap: &Heap) -> RunResult<Option<Ordering>> {
    cmp_at(left, right, heap, 0)
}

fn cmp_at(left: &Value, right: &Value, heap: &Heap, depth: usize) -> RunResult<Option<Ordering>> {
    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        return Ok(number_cmp(&a, &b));
    }
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(Some(a.cmp(b))),
        (Value::Ref(a), Value::Ref(b)) => match (heap.get(*a), heap.get(*b)) {
            (HeapData::List(x), HeapData::List(y)) | (HeapData::Tuple(x), HeapData::Tuple(y)) => {
                let depth = nested(depth)?;
                for (p, q) in x.iter().zip(y) {
                    if !eq_at(p, q, heap, depth)? {
                        return cmp_at(p, q, heap, depth);
                    }
                }
                Ok(Some(x.len().cmp(&y.len())))
            }
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::{super::exception::Unwind, *};

    #[test]
    fn range_lengths() {
        assert_eq!(range_len(0, 5, 1), 5);
        assert_eq!(range_len(0, 5, 2), 3);
        assert_eq!(range_len(5, 0, -1), 5);
        assert_eq!(range_len(5, 5, 1), 0);
        assert_eq!(range_len(0, -3, 1), 0);
    }

    #[test]
    fn containers_compare_structurally() {
        let mut heap = Heap::default();
        let a = heap.new_list(vec![Value::Int(1), Value::Float(2.0)]);
        let b = heap.new_list(vec![Value::Bool(true), Value::Int(2)]);
        assert!(py_eq(&a, &b, &heap).unwrap());
        assert!(!py_is(&a, &b));
        let c = heap.new_list(vec![Value::Int(1), Value::Int(3)]);
        assert_eq!(py_cmp(&a, &c, &heap).unwrap(), Some(Ordering::Less));
        assert_eq!(py_cmp(&a, &Value::Int(1), &heap).unwrap(), None);
    }

    #[test]
    fn bigints_compare_with_every_number() {
        let heap = Heap::default();
        let big = Value::from_bigint(BigInt::from(i64::MAX) + 1);
        assert!(matches!(big, Value::BigInt(_)));
        assert!(matches!(Value::from_bigint(BigInt::from(7)), Value::Int(7)));
        assert_eq!(py_cmp(&big, &Value::Int(i64::MAX), &heap).unwrap(), Some(Ordering::Greater));
        assert!(py_eq(&big, &Value::Float(9_223_372_036_854_775_808.0), &heap).unwrap());
        assert_eq!(big.py_repr(&heap), "9223372036854775808");
        assert_eq!(
            Value::Float(9_223_372_036_854_775_808.0).to_key(&heap).unwrap(),
            big.to_key(&heap).unwrap()
        );
    }

    fn nest_lists(heap: &mut Heap, depth: usize) -> Value {
        let mut value = heap.new_list(Vec::new());
        for _ in 0..depth {
            value = heap.new_list(vec![value]);
        }
        value
    }

    #[test]
    fn deep_nesting_is_bounded() {
        // The evaluation thread's stack, not the test harness default.
        std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(deep_nesting_checks)
            .unwrap()
            .join()
            .unwrap();
    }

    fn deep_nesting_checks() {
        let mut heap = Heap::default();
        let a = nest_lists(&mut heap, MAX_DATA_DEPTH * 3);
        let b = nest_lists(&mut heap, MAX_DATA_DEPTH * 3);
        let repr = a.py_repr(&heap);
        assert!(repr.starts_with("[[[["));
        assert!(repr.contains("[...]"));
        assert!(py_eq(&a, &a, &heap).unwrap());
        let Err(Unwind::Error(error)) = py_eq(&a, &b, &heap) else {
            panic!("expected a RecursionError");
        };
        assert_eq!(error.exc_type, ExcType::RecursionError);
        assert!(py_cmp(&a, &b, &heap).is_err());
    }

    #[test]
    fn repr_handles_nesting_and_cycles() {
        let mut heap = Heap::default();
        let inner = heap.new_tuple(vec![Value::Int(1)]);
        let list = heap.new_list(vec![Value::Str("a".into()), inner, Value::None]);
        assert_eq!(list.py_repr(&heap), "['a', (1,), None]");
        let Value::Ref(id) = &list else { unreachable!() };
        let id = *id;
        if let HeapData::List(items) = heap.get_mut(id) {
            items.push(Value::Ref(id));
        }
        assert_eq!(list.py_repr(&heap), "['a', (1,), None, [...]]");
    }

    #[test]
    fn integral_float_keys_match_int_keys() {
        let heap = Heap::default();
        assert_eq!(Value::Float(2.0).to_key(&heap).unwrap(), Value::Int(2).to_key(&heap).unwrap());
        let mut heap = Heap::default();
        let list = heap.new_list(Vec::new());
        assert!(list.to_key(&heap).is_err());
    }
}
