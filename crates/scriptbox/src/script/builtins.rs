//! Builtin functions and the methods of `str`, `list` and `dict`.

use std::cmp::Ordering;

use indexmap::IndexMap;
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{FromPrimitive, Num, Signed};
use strum::{EnumString, IntoStaticStr};

use super::{
    eval::{Eval, input_exhausted, normalize_index},
    exception::{ExcType, RunResult, ScriptError, Unwind, raise},
    format::FormatSpec,
    value::{DictKey, HeapData, HeapId, Number, Value, py_cmp, py_eq},
};

/// Builtin functions, looked up by name after globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum Builtin {
    Abs,
    Bool,
    Chr,
    Dict,
    Enumerate,
    Exit,
    Float,
    Input,
    Int,
    Len,
    List,
    Max,
    Min,
    Ord,
    Print,
    Quit,
    Range,
    Reversed,
    Round,
    Sorted,
    Str,
    Sum,
    Tuple,
    Zip,
}

type Kwargs = Vec<(String, Value)>;

/// Removes and returns the keyword argument `name`.
fn take_kwarg(kwargs: &mut Kwargs, name: &str) -> Option<Value> {
    let position = kwargs.iter().position(|(key, _)| key == name)?;
    Some(kwargs.remove(position).1)
}

fn reject_kwargs(function: &str, kwargs: &Kwargs) -> RunResult<()> {
    match kwargs.first() {
        Some((key, _)) => raise(
            ExcType::TypeError,
            format!("{function}() got an unexpected keyword argument '{key}'"),
        ),
        None => Ok(()),
    }
}

fn arity(function: &str, args: &[Value], min: usize, max: usize) -> RunResult<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("exactly {min}")
        } else if args.len() < min {
            format!("at least {min}")
        } else {
            format!("at most {max}")
        };
        return raise(
            ExcType::TypeError,
            format!(
                "{function}() takes {expected} argument{} ({} given)",
                if expected.ends_with(" 1") { "" } else { "s" },
                args.len()
            ),
        );
    }
    Ok(())
}

impl Eval<'_> {
    pub(super) fn call_builtin(&mut self, builtin: Builtin, mut args: Vec<Value>, mut kwargs: Kwargs) -> RunResult<Value> {
        let name: &'static str = builtin.into();
        if builtin == Builtin::Print {
            let sep = self.optional_str_kwarg(&mut kwargs, "sep", " ")?;
            let end = self.optional_str_kwarg(&mut kwargs, "end", "\n")?;
            reject_kwargs(name, &kwargs)?;
            let mut text = String::new();
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    text.push_str(&sep);
                }
                text.push_str(&arg.py_str(&self.rt.heap));
            }
            text.push_str(&end);
            self.io.write_stdout(&text);
            return Ok(Value::None);
        }
        reject_kwargs_unless(builtin, &kwargs)?;
        match builtin {
            Builtin::Print => Ok(Value::None),
            Builtin::Input => {
                arity(name, &args, 0, 1)?;
                let prompt = args.first().map(|p| p.py_str(&self.rt.heap)).unwrap_or_default();
                match self.io.read_line(&prompt) {
                    Some(line) => Ok(Value::Str(line)),
                    None => Err(input_exhausted(prompt, self.line)),
                }
            }
            Builtin::Int => {
                arity(name, &args, 0, 2)?;
                let base = take_kwarg(&mut kwargs, "base").or_else(|| args.get(1).cloned());
                match (args.first(), base) {
                    (None, _) => Ok(Value::Int(0)),
                    (Some(value), None) => self.to_int(value),
                    (Some(Value::Str(text)), Some(base)) => {
                        let Some(radix) = base.as_int().and_then(|b| u32::try_from(b).ok()).filter(|b| (2..=36).contains(b)) else {
                            return raise(ExcType::ValueError, "int() base must be >= 2 and <= 36, or 0");
                        };
                        let cleaned = text.trim().replace('_', "");
                        BigInt::from_str_radix(&cleaned, radix).map(Value::from_bigint).or_else(|_| {
                            raise(
                                ExcType::ValueError,
                                format!(
                                    "invalid literal for int() with base {radix}: {}",
                                    super::format::string_repr(text)
                                ),
                            )
                        })
                    }
                    (Some(_), Some(_)) => raise(ExcType::TypeError, "int() can't convert non-string with explicit base"),
                }
            }
            Builtin::Float => {
                arity(name, &args, 0, 1)?;
                match args.first() {
                    None => Ok(Value::Float(0.0)),
                    Some(value) => self.to_float(value),
                }
            }
            Builtin::Str => {
                arity(name, &args, 0, 1)?;
                Ok(Value::Str(args.first().map(|v| v.py_str(&self.rt.heap)).unwrap_or_default()))
            }
            Builtin::Bool => {
                arity(name, &args, 0, 1)?;
                Ok(Value::Bool(args.first().is_some_and(|v| v.truthy(&self.rt.heap))))
            }
            Builtin::Len => {
                arity(name, &args, 1, 1)?;
                let len = self.len_of(&args[0])?;
                Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
            }
            Builtin::Range => {
                arity(name, &args, 1, 3)?;
                let mut bounds = Vec::with_capacity(3);
                for arg in &args {
                    let Some(i) = arg.as_int() else {
                        return raise(
                            ExcType::TypeError,
                            format!(
                                "'{}' object cannot be interpreted as an integer",
                                arg.type_name(&self.rt.heap)
                            ),
                        );
                    };
                    bounds.push(i);
                }
                let (start, stop, step) = match bounds.as_slice() {
                    [stop] => (0, *stop, 1),
                    [start, stop] => (*start, *stop, 1),
                    [start, stop, step] => (*start, *stop, *step),
                    _ => unreachable!("arity checked above"),
                };
                if step == 0 {
                    return raise(ExcType::ValueError, "range() arg 3 must not be zero");
                }
                Ok(Value::Range { start, stop, step })
            }
            Builtin::Abs => {
                arity(name, &args, 1, 1)?;
                match args[0].as_number() {
                    Some(Number::Int(i)) => Ok(i
                        .checked_abs()
                        .map_or_else(|| Value::from_bigint(BigInt::from(i).abs()), Value::Int)),
                    Some(Number::Big(i)) => Ok(Value::BigInt(i.abs())),
                    Some(Number::Float(f)) => Ok(Value::Float(f.abs())),
                    None => raise(
                        ExcType::TypeError,
                        format!("bad operand type for abs(): '{}'", args[0].type_name(&self.rt.heap)),
                    ),
                }
            }
            Builtin::Min | Builtin::Max => self.min_max(builtin, args, kwargs),
            Builtin::Sum => {
                arity(name, &args, 1, 2)?;
                let start = take_kwarg(&mut kwargs, "start").or_else(|| args.get(1).cloned());
                if let Some(Value::Str(_)) = start {
                    return raise(ExcType::TypeError, "sum() can't sum strings [use ''.join(seq) instead]");
                }
                let items = self.collect(&args[0])?;
                let mut total = start.unwrap_or(Value::Int(0));
                for item in items {
                    total = self.binary_op(super::ast::BinOp::Add, total, item)?;
                }
                Ok(total)
            }
            Builtin::Round => {
                arity(name, &args, 1, 2)?;
                let digits = take_kwarg(&mut kwargs, "ndigits").or_else(|| args.get(1).cloned());
                round(&args[0], digits.as_ref(), &self.rt.heap)
            }
            Builtin::Sorted => {
                arity(name, &args, 1, 1)?;
                let key = take_kwarg(&mut kwargs, "key");
                let reverse = take_kwarg(&mut kwargs, "reverse").is_some_and(|r| r.truthy(&self.rt.heap));
                let items = self.collect(&args[0])?;
                let sorted = self.sort_values(items, key, reverse)?;
                Ok(self.rt.heap.new_list(sorted))
            }
            Builtin::List | Builtin::Tuple => {
                arity(name, &args, 0, 1)?;
                let items = match args.first() {
                    Some(value) => self.collect(value)?,
                    None => Vec::new(),
                };
                Ok(if builtin == Builtin::List {
                    self.rt.heap.new_list(items)
                } else {
                    self.rt.heap.new_tuple(items)
                })
            }
            Builtin::Dict => {
                arity(name, &args, 0, 1)?;
                let mut entries = IndexMap::new();
                if let Some(source) = args.first() {
                    if let Value::Ref(id) = source
                        && let HeapData::Dict(existing) = self.rt.heap.get(*id)
                    {
                        entries = existing.clone();
                    } else {
                        for pair in self.collect(source)? {
                            let items = self.collect(&pair)?;
                            let [key, value] = <[Value; 2]>::try_from(items).map_err(|_| {
                                ScriptError::new(
                                    ExcType::ValueError,
                                    "dictionary update sequence element has wrong length; 2 is required",
                                )
                            })?;
                            entries.insert(key.to_key(&self.rt.heap)?, value);
                        }
                    }
                }
                for (key, value) in kwargs.drain(..) {
                    entries.insert(DictKey::Str(key), value);
                }
                Ok(self.rt.heap.new_dict(entries))
            }
            Builtin::Enumerate => {
                arity(name, &args, 1, 2)?;
                let start = take_kwarg(&mut kwargs, "start")
                    .or_else(|| args.get(1).cloned())
                    .and_then(|s| s.as_int())
                    .unwrap_or(0);
                let items = self.collect(&args[0])?;
                let mut pairs = Vec::with_capacity(items.len());
                for (offset, item) in (start..).zip(items) {
                    pairs.push(self.rt.heap.new_tuple(vec![Value::Int(offset), item]));
                }
                Ok(self.rt.heap.new_list(pairs))
            }
            Builtin::Zip => {
                let mut columns = Vec::with_capacity(args.len());
                for arg in &args {
                    columns.push(self.collect(arg)?);
                }
                let len = columns.iter().map(Vec::len).min().unwrap_or(0);
                let mut rows = Vec::with_capacity(len);
                for i in 0..len {
                    let row = columns.iter().map(|column| column[i].clone()).collect();
                    rows.push(self.rt.heap.new_tuple(row));
                }
                Ok(self.rt.heap.new_list(rows))
            }
            Builtin::Reversed => {
                arity(name, &args, 1, 1)?;
                let mut items = self.collect(&args[0])?;
                items.reverse();
                Ok(self.rt.heap.new_list(items))
            }
            Builtin::Chr => {
                arity(name, &args, 1, 1)?;
                let code = args[0].as_int().and_then(|c| u32::try_from(c).ok()).and_then(char::from_u32);
                match code {
                    Some(c) => Ok(Value::Str(c.to_string())),
                    None => raise(ExcType::ValueError, "chr() arg not in range(0x110000)"),
                }
            }
            Builtin::Ord => {
                arity(name, &args, 1, 1)?;
                match &args[0] {
                    Value::Str(s) if s.chars().count() == 1 => {
                        Ok(Value::Int(i64::from(s.chars().next().map_or(0, u32::from))))
                    }
                    Value::Str(s) => raise(
                        ExcType::TypeError,
                        format!("ord() expected a character, but string of length {} found", s.chars().count()),
                    ),
                    other => raise(
                        ExcType::TypeError,
                        format!(
                            "ord() expected string of length 1, but {} found",
                            other.type_name(&self.rt.heap)
                        ),
                    ),
                }
            }
            Builtin::Exit | Builtin::Quit => {
                arity(name, &args, 0, 1)?;
                let code = args.pop().map(|code| code.py_str(&self.rt.heap)).unwrap_or_default();
                raise(ExcType::SystemExit, code)
            }
        }
    }

    fn optional_str_kwarg(&self, kwargs: &mut Kwargs, name: &str, default: &str) -> RunResult<String> {
        match take_kwarg(kwargs, name) {
            None | Some(Value::None) => Ok(default.to_owned()),
            Some(Value::Str(s)) => Ok(s),
            Some(other) => raise(
                ExcType::TypeError,
                format!(
                    "{name} must be None or a string, not {}",
                    other.type_name(&self.rt.heap)
                ),
            ),
        }
    }

    fn to_int(&self, value: &Value) -> RunResult<Value> {
        match value {
            Value::Int(i) => Ok(Value::Int(*i)),
            Value::BigInt(i) => Ok(Value::BigInt(i.clone())),
            Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
            Value::Float(f) => float_to_int(*f),
            Value::Str(text) => {
                let cleaned = text.trim().replace('_', "");
                cleaned.parse::<BigInt>().map(Value::from_bigint).or_else(|_| {
                    raise(
                        ExcType::ValueError,
                        format!(
                            "invalid literal for int() with base 10: {}",
                            super::format::string_repr(text)
                        ),
                    )
                })
            }
            other => raise(
                ExcType::TypeError,
                format!(
                    "int() argument must be a string, a bytes-like object or a real number, not '{}'",
                    other.type_name(&self.rt.heap)
                ),
            ),
        }
    }

    fn to_float(&self, value: &Value) -> RunResult<Value> {
        match value.as_number() {
            Some(number) => Ok(Value::Float(number.as_f64())),
            None => match value {
                Value::Str(text) => {
                    let cleaned = text.trim().replace('_', "");
                    let lowered = cleaned.to_ascii_lowercase();
                    let valid = !cleaned.is_empty()
                        && (cleaned.chars().any(|c| c.is_ascii_digit())
                            || matches!(lowered.trim_start_matches(['+', '-']), "inf" | "infinity" | "nan"));
                    match cleaned.parse::<f64>() {
                        Ok(parsed) if valid => Ok(Value::Float(parsed)),
                        _ => raise(
                            ExcType::ValueError,
                            format!(
                                "could not convert string to float: {}",
                                super::format::string_repr(text)
                            ),
                        ),
                    }
                }
                other => raise(
                    ExcType::TypeError,
                    format!(
                        "float() argument must be a string or a real number, not '{}'",
                        other.type_name(&self.rt.heap)
                    ),
                ),
            },
        }
    }

    pub(super) fn len_of(&self, value: &Value) -> RunResult<usize> {
        match value {
            Value::Str(s) => Ok(s.chars().count()),
            Value::Range { start, stop, step } => Ok(super::value::range_len(*start, *stop, *step)),
            Value::Ref(id) => match self.rt.heap.get(*id) {
                HeapData::List(items) | HeapData::Tuple(items) => Ok(items.len()),
                HeapData::Dict(entries) => Ok(entries.len()),
                HeapData::Function(_) => self.no_len(value),
            },
            _ => self.no_len(value),
        }
    }

    fn no_len<T>(&self, value: &Value) -> RunResult<T> {
        raise(
            ExcType::TypeError,
            format!("object of type '{}' has no len()", value.type_name(&self.rt.heap)),
        )
    }

    fn min_max(&mut self, builtin: Builtin, args: Vec<Value>, mut kwargs: Kwargs) -> RunResult<Value> {
        let name: &'static str = builtin.into();
        let key = take_kwarg(&mut kwargs, "key");
        let default = take_kwarg(&mut kwargs, "default");
        reject_kwargs(name, &kwargs)?;
        let items = match args.as_slice() {
            [] => return raise(ExcType::TypeError, format!("{name} expected at least 1 argument, got 0")),
            [single] => self.collect(single)?,
            _ => args,
        };
        if items.is_empty() {
            return default.map_or_else(
                || raise(ExcType::ValueError, format!("{name}() arg is an empty sequence")),
                Ok,
            );
        }
        let keys = self.sort_keys(&items, key.as_ref())?;
        let want = if builtin == Builtin::Max { Ordering::Greater } else { Ordering::Less };
        let mut best = 0;
        for i in 1..items.len() {
            let ordering = self.ordering(&keys[i], &keys[best])?;
            if ordering == want {
                best = i;
            }
        }
        Ok(items[best].clone())
    }

    fn sort_keys(&mut self, items: &[Value], key: Option<&Value>) -> RunResult<Vec<Value>> {
        match key {
            None | Some(Value::None) => Ok(items.to_vec()),
            Some(function) => {
                let mut keys = Vec::with_capacity(items.len());
                for item in items {
                    keys.push(self.call_value(function, vec![item.clone()], Vec::new())?);
                }
                Ok(keys)
            }
        }
    }

    fn ordering(&self, left: &Value, right: &Value) -> RunResult<Ordering> {
        py_cmp(left, right, &self.rt.heap)?.ok_or_else(|| {
            ScriptError::new(
                ExcType::TypeError,
                format!(
                    "'<' not supported between instances of '{}' and '{}'",
                    left.type_name(&self.rt.heap),
                    right.type_name(&self.rt.heap)
                ),
            )
            .into()
        })
    }

    /// Stable sort with optional key function; the first comparison error wins.
    fn sort_values(&mut self, items: Vec<Value>, key: Option<Value>, reverse: bool) -> RunResult<Vec<Value>> {
        let keys = self.sort_keys(&items, key.as_ref())?;
        let mut order: Vec<usize> = (0..items.len()).collect();
        let mut failure: Option<Unwind> = None;
        order.sort_by(|&a, &b| {
            let (left, right) = if reverse { (&keys[b], &keys[a]) } else { (&keys[a], &keys[b]) };
            match self.ordering(left, right) {
                Ok(ordering) => ordering,
                Err(error) => {
                    failure.get_or_insert(error);
                    Ordering::Equal
                }
            }
        });
        if let Some(error) = failure {
            return Err(error);
        }
        Ok(order.into_iter().map(|i| items[i].clone()).collect())
    }

    // =========================================================================
    // Methods
    // =========================================================================

    pub(super) fn call_method(&mut self, object: &Value, method: &str, args: Vec<Value>, kwargs: Kwargs) -> RunResult<Value> {
        match object {
            Value::Module(module) => {
                let Some(Value::ModuleFunction(function)) = module.attribute(method) else {
                    let module: &'static str = module.into();
                    return raise(
                        ExcType::AttributeError,
                        format!("module '{module}' has no attribute '{method}'"),
                    );
                };
                self.call_module_function(function, args, kwargs)
            }
            Value::Str(text) => {
                let text = text.clone();
                self.str_method(&text, method, args, kwargs)
            }
            Value::Ref(id) => match self.rt.heap.get(*id) {
                HeapData::List(_) => self.list_method(*id, method, args, kwargs),
                HeapData::Dict(_) => self.dict_method(*id, method, args, kwargs),
                _ => self.no_method(object, method),
            },
            _ => self.no_method(object, method),
        }
    }

    fn no_method<T>(&self, object: &Value, method: &str) -> RunResult<T> {
        raise(
            ExcType::AttributeError,
            format!(
                "'{}' object has no attribute '{method}'",
                object.type_name(&self.rt.heap)
            ),
        )
    }

    fn str_arg(&self, method: &str, value: &Value) -> RunResult<String> {
        match value {
            Value::Str(s) => Ok(s.clone()),
            other => raise(
                ExcType::TypeError,
                format!(
                    "{method}() argument must be str, not {}",
                    other.type_name(&self.rt.heap)
                ),
            ),
        }
    }

    fn bad_affix<T>(&self, method: &str, value: &Value) -> RunResult<T> {
        raise(
            ExcType::TypeError,
            format!(
                "{method} first arg must be str or a tuple of str, not {}",
                value.type_name(&self.rt.heap)
            ),
        )
    }

    fn str_method(&mut self, text: &str, method: &str, args: Vec<Value>, mut kwargs: Kwargs) -> RunResult<Value> {
        if method == "format" {
            return self.str_format(text, &args, &kwargs).map(Value::Str);
        }
        let maxsplit = take_kwarg(&mut kwargs, "maxsplit");
        let sep = take_kwarg(&mut kwargs, "sep");
        reject_kwargs(method, &kwargs)?;
        let heap = &self.rt.heap;
        let result = match method {
            "upper" => Value::Str(text.to_uppercase()),
            "lower" => Value::Str(text.to_lowercase()),
            "strip" | "lstrip" | "rstrip" => {
                arity(method, &args, 0, 1)?;
                let chars: Option<Vec<char>> = match args.first() {
                    None | Some(Value::None) => None,
                    Some(value) => Some(self.str_arg(method, value)?.chars().collect()),
                };
                let matches = |c: char| chars.as_ref().map_or(c.is_whitespace(), |set| set.contains(&c));
                Value::Str(
                    match method {
                        "strip" => text.trim_matches(matches),
                        "lstrip" => text.trim_start_matches(matches),
                        _ => text.trim_end_matches(matches),
                    }
                    .to_owned(),
                )
            }
            "split" => {
                arity(method, &args, 0, 2)?;
                let sep = sep.or_else(|| args.first().cloned());
                let limit = maxsplit
                    .or_else(|| args.get(1).cloned())
                    .and_then(|m| m.as_int())
                    .and_then(|m| usize::try_from(m).ok());
                let parts: Vec<Value> = match sep {
                    None | Some(Value::None) => split_whitespace(text, limit),
                    Some(sep) => {
                        let sep = self.str_arg(method, &sep)?;
                        if sep.is_empty() {
                            return raise(ExcType::ValueError, "empty separator");
                        }
                        match limit {
                            Some(limit) => text.splitn(limit + 1, sep.as_str()).map(|p| Value::Str(p.to_owned())).collect(),
                            None => text.split(sep.as_str()).map(|p| Value::Str(p.to_owned())).collect(),
                        }
                    }
                };
                return Ok(self.rt.heap.new_list(parts));
            }
            "join" => {
                arity(method, &args, 1, 1)?;
                let items = self.collect(&args[0])?;
                let mut parts = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Value::Str(s) => parts.push(s.as_str()),
                        other => {
                            return raise(
                                ExcType::TypeError,
                                format!(
                                    "sequence item {i}: expected str instance, {} found",
                                    other.type_name(&self.rt.heap)
                                ),
                            );
                        }
                    }
                }
                Value::Str(parts.join(text))
            }
            "replace" => {
                arity(method, &args, 2, 3)?;
                let old = self.str_arg(method, &args[0])?;
                let new = self.str_arg(method, &args[1])?;
                match args.get(2).and_then(Value::as_int) {
                    Some(count) if count >= 0 => {
                        Value::Str(text.replacen(old.as_str(), &new, usize::try_from(count).unwrap_or(usize::MAX)))
                    }
                    _ => Value::Str(text.replace(old.as_str(), &new)),
                }
            }
            "startswith" | "endswith" => {
                arity(method, &args, 1, 1)?;
                let candidates: Vec<String> = match &args[0] {
                    Value::Str(s) => vec![s.clone()],
                    Value::Ref(id) => match heap.get(*id) {
                        HeapData::Tuple(items) => items
                            .iter()
                            .map(|item| self.str_arg(method, item))
                            .collect::<RunResult<_>>()?,
                        _ => return self.bad_affix(method, &args[0]),
                    },
                    other => return self.bad_affix(method, other),
                };
                let hit = candidates.iter().any(|c| {
                    if method == "startswith" {
                        text.starts_with(c.as_str())
                    } else {
                        text.ends_with(c.as_str())
                    }
                });
                Value::Bool(hit)
            }
            "find" | "index" => {
                arity(method, &args, 1, 1)?;
                let needle = self.str_arg(method, &args[0])?;
                match text.find(needle.as_str()) {
                    Some(byte) => Value::Int(i64::try_from(text[..byte].chars().count()).unwrap_or(i64::MAX)),
                    None if method == "find" => Value::Int(-1),
                    None => return raise(ExcType::ValueError, "substring not found"),
                }
            }
            "count" => {
                arity(method, &args, 1, 1)?;
                let needle = self.str_arg(method, &args[0])?;
                let count = if needle.is_empty() {
                    text.chars().count() + 1
                } else {
                    text.matches(needle.as_str()).count()
                };
                Value::Int(i64::try_from(count).unwrap_or(i64::MAX))
            }
            "isdigit" => Value::Bool(!text.is_empty() && text.chars().all(|c| c.is_ascii_digit())),
            "isalpha" => Value::Bool(!text.is_empty() && text.chars().all(char::is_alphabetic)),
            "isalnum" => Value::Bool(!text.is_empty() && text.chars().all(char::is_alphanumeric)),
            "isspace" => Value::Bool(!text.is_empty() && text.chars().all(char::is_whitespace)),
            "isupper" => Value::Bool(text.chars().any(char::is_alphabetic) && !text.chars().any(char::is_lowercase)),
            "islower" => Value::Bool(text.chars().any(char::is_alphabetic) && !text.chars().any(char::is_uppercase)),
            "title" => {
                let mut out = String::with_capacity(text.len());
                let mut previous_cased = false;
                for c in text.chars() {
                    if previous_cased {
                        out.extend(c.to_lowercase());
                    } else {
                        out.extend(c.to_uppercase());
                    }
                    previous_cased = c.is_alphabetic();
                }
                Value::Str(out)
            }
            "capitalize" => {
                let mut chars = text.chars();
                Value::Str(match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
                    None => String::new(),
                })
            }
            "center" | "ljust" | "rjust" | "zfill" => {
                arity(method, &args, 1, 2)?;
                let width = args[0].as_int().and_then(|w| usize::try_from(w).ok()).unwrap_or(0);
                let fill = match args.get(1) {
                    Some(value) => self.str_arg(method, value)?.chars().next().unwrap_or(' '),
                    None => ' ',
                };
                let spec = FormatSpec {
                    fill: Some(if method == "zfill" { '0' } else { fill }),
                    align: Some(match method {
                        "center" => '^',
                        "ljust" => '<',
                        _ => '>',
                    }),
                    width,
                    zero_pad: method == "zfill",
                    ..FormatSpec::default()
                };
                if method == "zfill" {
                    let bare = FormatSpec {
                        align: None,
                        ..spec
                    };
                    Value::Str(bare.pad(text.to_owned(), true))
                } else {
                    Value::Str(spec.pad(text.to_owned(), false))
                }
            }
            _ => return self.no_method(&Value::Str(text.to_owned()), method),
        };
        Ok(result)
    }

    /// `str.format` with positional `{}`/`{0}`, keyword `{name}` and `:spec` fields.
    fn str_format(&self, template: &str, args: &[Value], kwargs: &Kwargs) -> RunResult<String> {
        let mut out = String::new();
        let mut auto_index = 0;
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '}' => return raise(ExcType::ValueError, "Single '}' encountered in format string"),
                '{' => {
                    let mut field = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => field.push(ch),
                            None => return raise(ExcType::ValueError, "Single '{' encountered in format string"),
                        }
                    }
                    let (name, spec) = match field.split_once(':') {
                        Some((name, spec)) => (name, Some(spec)),
                        None => (field.as_str(), None),
                    };
                    let value = if name.is_empty() {
                        let value = args.get(auto_index);
                        auto_index += 1;
                        value
                    } else if let Ok(position) = name.parse::<usize>() {
                        args.get(position)
                    } else {
                        match kwargs.iter().find(|(key, _)| key == name) {
                            Some((_, value)) => Some(value),
                            None => return raise(ExcType::KeyError, super::format::string_repr(name)),
                        }
                    };
                    let Some(value) = value else {
                        return raise(
                            ExcType::IndexError,
                            format!("Replacement index {} out of range for positional args tuple", auto_index.saturating_sub(1)),
                        );
                    };
                    out.push_str(&self.format_value(value, spec)?);
                }
                other => out.push(other),
            }
        }
        Ok(out)
    }

    fn list_items(&self, id: HeapId) -> &Vec<Value> {
        match self.rt.heap.get(id) {
            HeapData::List(items) => items,
            _ => unreachable!("list_method is only dispatched for lists"),
        }
    }

    fn list_items_mut(&mut self, id: HeapId) -> &mut Vec<Value> {
        match self.rt.heap.get_mut(id) {
            HeapData::List(items) => items,
            _ => unreachable!("list_method is only dispatched for lists"),
        }
    }

    fn list_method(&mut self, id: HeapId, method: &str, mut args: Vec<Value>, mut kwargs: Kwargs) -> RunResult<Value> {
        if method == "sort" {
            arity(method, &args, 0, 0)?;
            let key = take_kwarg(&mut kwargs, "key");
            let reverse = take_kwarg(&mut kwargs, "reverse").is_some_and(|r| r.truthy(&self.rt.heap));
            reject_kwargs(method, &kwargs)?;
            let items = std::mem::take(self.list_items_mut(id));
            let sorted = self.sort_values(items.clone(), key, reverse);
            *self.list_items_mut(id) = match sorted {
                Ok(sorted) => sorted,
                Err(error) => {
                    *self.list_items_mut(id) = items;
                    return Err(error);
                }
            };
            return Ok(Value::None);
        }
        reject_kwargs(method, &kwargs)?;
        match method {
            "append" => {
                arity(method, &args, 1, 1)?;
                let item = args.remove(0);
                self.list_items_mut(id).push(item);
                Ok(Value::None)
            }
            "extend" => {
                arity(method, &args, 1, 1)?;
                let items = self.collect(&args[0])?;
                self.list_items_mut(id).extend(items);
                Ok(Value::None)
            }
            "pop" => {
                arity(method, &args, 0, 1)?;
                let len = self.list_items(id).len();
                if len == 0 {
                    return raise(ExcType::IndexError, "pop from empty list");
                }
                let index = match args.first() {
                    Some(value) => value.as_int().and_then(|i| normalize_index(i, len)),
                    None => Some(len - 1),
                };
                match index {
                    Some(index) => Ok(self.list_items_mut(id).remove(index)),
                    None => raise(ExcType::IndexError, "pop index out of range"),
                }
            }
            "insert" => {
                arity(method, &args, 2, 2)?;
                let item = args.remove(1);
                let len = i64::try_from(self.list_items(id).len()).unwrap_or(i64::MAX);
                let Some(index) = args[0].as_int() else {
                    return raise(ExcType::TypeError, "'float' object cannot be interpreted as an integer");
                };
                let resolved = if index < 0 { (index + len).max(0) } else { index.min(len) };
                let position = usize::try_from(resolved).unwrap_or(0);
                self.list_items_mut(id).insert(position, item);
                Ok(Value::None)
            }
            "remove" | "index" | "count" => {
                arity(method, &args, 1, 1)?;
                let heap = &self.rt.heap;
                let mut count = 0;
                let mut position = None;
                for (i, item) in self.list_items(id).iter().enumerate() {
                    if py_eq(item, &args[0], heap)? {
                        count += 1;
                        position.get_or_insert(i);
                        if method != "count" {
                            break;
                        }
                    }
                }
                if method == "count" {
                    return Ok(Value::Int(i64::try_from(count).unwrap_or(i64::MAX)));
                }
                match (position, method) {
                    (Some(position), "remove") => {
                        self.list_items_mut(id).remove(position);
                        Ok(Value::None)
                    }
                    (Some(position), _) => Ok(Value::Int(i64::try_from(position).unwrap_or(i64::MAX))),
                    (None, "remove") => raise(ExcType::ValueError, "list.remove(x): x not in list"),
                    (None, _) => raise(
                        ExcType::ValueError,
                        format!("{} is not in list", args[0].py_repr(&self.rt.heap)),
                    ),
                }
            }
            "reverse" => {
                arity(method, &args, 0, 0)?;
                self.list_items_mut(id).reverse();
                Ok(Value::None)
            }
            "clear" => {
                arity(method, &args, 0, 0)?;
                self.list_items_mut(id).clear();
                Ok(Value::None)
            }
            "copy" => {
                arity(method, &args, 0, 0)?;
                let items = self.list_items(id).clone();
                Ok(self.rt.heap.new_list(items))
            }
            _ => self.no_method(&Value::Ref(id), method),
        }
    }

    fn dict_entries_mut(&mut self, id: HeapId) -> &mut IndexMap<DictKey, Value> {
        match self.rt.heap.get_mut(id) {
            HeapData::Dict(entries) => entries,
            _ => unreachable!("dict_method is only dispatched for dicts"),
        }
    }

    fn dict_entries(&self, id: HeapId) -> &IndexMap<DictKey, Value> {
        match self.rt.heap.get(id) {
            HeapData::Dict(entries) => entries,
            _ => unreachable!("dict_method is only dispatched for dicts"),
        }
    }

    fn dict_method(&mut self, id: HeapId, method: &str, mut args: Vec<Value>, kwargs: Kwargs) -> RunResult<Value> {
        if method != "update" {
            reject_kwargs(method, &kwargs)?;
        }
        match method {
            "get" => {
                arity(method, &args, 1, 2)?;
                let key = args[0].to_key(&self.rt.heap)?;
                let default = args.get(1).cloned().unwrap_or(Value::None);
                Ok(self.dict_entries(id).get(&key).cloned().unwrap_or(default))
            }
            "keys" | "values" => {
                arity(method, &args, 0, 0)?;
                let items = if method == "keys" {
                    let keys: Vec<DictKey> = self.dict_entries(id).keys().cloned().collect();
                    keys.iter().map(|key| key.to_value(&mut self.rt.heap)).collect()
                } else {
                    self.dict_entries(id).values().cloned().collect()
                };
                Ok(self.rt.heap.new_list(items))
            }
            "items" => {
                arity(method, &args, 0, 0)?;
                let entries: Vec<(DictKey, Value)> =
                    self.dict_entries(id).iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                let mut pairs = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    let key = key.to_value(&mut self.rt.heap);
                    pairs.push(self.rt.heap.new_tuple(vec![key, value]));
                }
                Ok(self.rt.heap.new_list(pairs))
            }
            "pop" => {
                arity(method, &args, 1, 2)?;
                let key = args[0].to_key(&self.rt.heap)?;
                match self.dict_entries_mut(id).shift_remove(&key) {
                    Some(value) => Ok(value),
                    None if args.len() == 2 => Ok(args.remove(1)),
                    None => raise(ExcType::KeyError, args[0].py_repr(&self.rt.heap)),
                }
            }
            "setdefault" => {
                arity(method, &args, 1, 2)?;
                let key = args[0].to_key(&self.rt.heap)?;
                let default = args.get(1).cloned().unwrap_or(Value::None);
                Ok(self.dict_entries_mut(id).entry(key).or_insert(default).clone())
            }
            "update" => {
                arity(method, &args, 0, 1)?;
                let mut incoming: Vec<(DictKey, Value)> = Vec::new();
                if let Some(source) = args.first() {
                    match source {
                        Value::Ref(other) if matches!(self.rt.heap.get(*other), HeapData::Dict(_)) => {
                            incoming.extend(self.dict_entries(*other).iter().map(|(k, v)| (k.clone(), v.clone())));
                        }
                        other => {
                            return raise(
                                ExcType::TypeError,
                                format!("'{}' object is not a mapping", other.type_name(&self.rt.heap)),
                            );
                        }
                    }
                }
                incoming.extend(kwargs.into_iter().map(|(k, v)| (DictKey::Str(k), v)));
                self.dict_entries_mut(id).extend(incoming);
                Ok(Value::None)
            }
            "copy" => {
                arity(method, &args, 0, 0)?;
                let entries = self.dict_entries(id).clone();
                Ok(self.rt.heap.new_dict(entries))
            }
            "clear" => {
                arity(method, &args, 0, 0)?;
                self.dict_entries_mut(id).clear();
                Ok(Value::None)
            }
            _ => self.no_method(&Value::Ref(id), method),
        }
    }
}

/// Keyword arguments accepted per builtin; anything else is a `TypeError`.
fn reject_kwargs_unless(builtin: Builtin, kwargs: &Kwargs) -> RunResult<()> {
    let allowed: &[&str] = match builtin {
        Builtin::Int => &["base"],
        Builtin::Sum | Builtin::Enumerate => &["start"],
        Builtin::Round => &["ndigits"],
        Builtin::Sorted => &["key", "reverse"],
        Builtin::Min | Builtin::Max => &["key", "default"],
        Builtin::Dict => return Ok(()),
        _ => &[],
    };
    match kwargs.iter().find(|(key, _)| !allowed.contains(&key.as_str())) {
        Some((key, _)) => {
            let name: &'static str = builtin.into();
            raise(
                ExcType::TypeError,
                format!("{name}() got an unexpected keyword argument '{key}'"),
            )
        }
        None => Ok(()),
    }
}

fn split_whitespace(text: &str, limit: Option<usize>) -> Vec<Value> {
    let Some(limit) = limit else {
        return text.split_whitespace().map(|p| Value::Str(p.to_owned())).collect();
    };
    let mut parts = Vec::new();
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        if parts.len() == limit {
            parts.push(Value::Str(rest.to_owned()));
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        parts.push(Value::Str(rest[..end].to_owned()));
        rest = rest[end..].trim_start();
    }
    parts
}

pub(super) fn float_to_int(value: f64) -> RunResult<Value> {
    if value.is_nan() {
        return raise(ExcType::ValueError, "cannot convert float NaN to integer");
    }
    if value.is_infinite() {
        return raise(ExcType::OverflowError, "cannot convert float infinity to integer");
    }
    match BigInt::from_f64(value.trunc()) {
        Some(int) => Ok(Value::from_bigint(int)),
        None => raise(ExcType::OverflowError, "cannot convert float to integer"),
    }
}

/// Integer `round()` with a digit count, rounding half to even.
fn round_int(value: BigInt, digits: i64) -> Value {
    if digits >= 0 {
        return Value::from_bigint(value);
    }
    let exponent = digits.unsigned_abs();
    // 10**exponent exceeds twice the magnitude, so everything rounds to zero.
    if exponent > value.bits() {
        return Value::Int(0);
    }
    let Ok(exponent) = u32::try_from(exponent) else {
        return Value::Int(0);
    };
    let factor = BigInt::from(10).pow(exponent);
    let (mut quotient, remainder) = value.div_mod_floor(&factor);
    let twice = remainder * 2;
    if twice > factor || (twice == factor && quotient.is_odd()) {
        quotient += 1;
    }
    Value::from_bigint(quotient * factor)
}

fn round(value: &Value, digits: Option<&Value>, heap: &super::value::Heap) -> RunResult<Value> {
    let digits = match digits {
        None | Some(Value::None) => None,
        Some(d) => match d.as_int() {
            Some(d) => Some(d),
            None => {
                return raise(
                    ExcType::TypeError,
                    format!("'{}' object cannot be interpreted as an integer", d.type_name(heap)),
                );
            }
        },
    };
    match (value.as_number(), digits) {
        (Some(Number::Int(i)), d) => Ok(round_int(BigInt::from(i), d.unwrap_or(0))),
        (Some(Number::Big(i)), d) => Ok(round_int(i, d.unwrap_or(0))),
        (Some(Number::Float(f)), None) => float_to_int(f.round_ties_even()),
        (Some(Number::Float(f)), Some(d)) if d >= 0 => {
            if !f.is_finite() {
                return Ok(Value::Float(f));
            }
            let places = usize::try_from(d.min(300)).unwrap_or(0);
            let text = format!("{f:.places$}");
            Ok(Value::Float(text.parse().unwrap_or(f)))
        }
        (Some(Number::Float(f)), Some(d)) => {
            let factor = 10_f64.powi(i32::try_from(-d).unwrap_or(i32::MAX));
            Ok(Value::Float((f / factor).round_ties_even() * factor))
        }
        (None, _) => raise(
            ExcType::TypeError,
            format!("type {} doesn't define __round__ method", value.type_name(heap)),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_split_with_limit() {
        let parts = split_whitespace("  a b   c ", Some(1));
        let texts: Vec<String> = parts
            .into_iter()
            .map(|p| match p {
                Value::Str(s) => s,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(texts, vec!["a".to_owned(), "b   c ".to_owned()]);
    }

    #[test]
    fn rounding_is_half_even() {
        let heap = super::super::value::Heap::default();
        assert!(matches!(round(&Value::Float(2.5), None, &heap), Ok(Value::Int(2))));
        assert!(matches!(round(&Value::Float(3.5), None, &heap), Ok(Value::Int(4))));
        assert!(matches!(
            round(&Value::Float(3.14159), Some(&Value::Int(2)), &heap),
            Ok(Value::Float(f)) if (f - 3.14).abs() < 1e-12
        ));
        assert!(matches!(round(&Value::Int(25), Some(&Value::Int(-1)), &heap), Ok(Value::Int(20))));
        assert!(matches!(round(&Value::Int(-15), Some(&Value::Int(-1)), &heap), Ok(Value::Int(-20))));
        assert!(matches!(round(&Value::Int(1234), Some(&Value::Int(-9)), &heap), Ok(Value::Int(0))));
    }

    #[test]
    fn large_floats_convert_to_bigints() {
        let Ok(Value::BigInt(int)) = float_to_int(1e20) else {
            panic!("expected a bigint");
        };
        assert_eq!(int.to_string(), "100000000000000000000");
        assert!(matches!(float_to_int(-7.9), Ok(Value::Int(-7))));
        assert!(float_to_int(f64::INFINITY).is_err());
    }

    #[test]
    fn builtin_names_parse() {
        use std::str::FromStr;
        assert_eq!(Builtin::from_str("print").unwrap(), Builtin::Print);
        assert!(Builtin::from_str("Print").is_err());
    }
}
