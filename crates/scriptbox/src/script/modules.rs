//! The importable `random` and `math` modules.
//!
//! `random` draws from the runtime's seeded generator, so two runs with the same
//! seed and the same calls produce the same values.

use rand::{Rng, SeedableRng, seq::SliceRandom};
use rand_chacha::ChaCha8Rng;
use strum::{EnumString, IntoStaticStr};

use super::{
    builtins::float_to_int,
    eval::Eval,
    exception::{ExcType, RunResult, raise},
    value::{HeapData, Number, Value},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum Module {
    Random,
    Math,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ModuleFunction {
    Seed,
    Random,
    Randint,
    Randrange,
    Choice,
    Shuffle,
    Uniform,
    Sqrt,
    Floor,
    Ceil,
}

impl ModuleFunction {
    pub fn name(self) -> &'static str {
        match self {
            Self::Seed => "seed",
            Self::Random => "random",
            Self::Randint => "randint",
            Self::Randrange => "randrange",
            Self::Choice => "choice",
            Self::Shuffle => "shuffle",
            Self::Uniform => "uniform",
            Self::Sqrt => "sqrt",
            Self::Floor => "floor",
            Self::Ceil => "ceil",
        }
    }
}

impl Module {
    pub fn attribute(self, name: &str) -> Option<Value> {
        let function = match (self, name) {
            (Self::Random, "seed") => ModuleFunction::Seed,
            (Self::Random, "random") => ModuleFunction::Random,
            (Self::Random, "randint") => ModuleFunction::Randint,
            (Self::Random, "randrange") => ModuleFunction::Randrange,
            (Self::Random, "choice") => ModuleFunction::Choice,
            (Self::Random, "shuffle") => ModuleFunction::Shuffle,
            (Self::Random, "uniform") => ModuleFunction::Uniform,
            (Self::Math, "sqrt") => ModuleFunction::Sqrt,
            (Self::Math, "floor") => ModuleFunction::Floor,
            (Self::Math, "ceil") => ModuleFunction::Ceil,
            (Self::Math, "pi") => return Some(Value::Float(std::f64::consts::PI)),
            (Self::Math, "e") => return Some(Value::Float(std::f64::consts::E)),
            (Self::Math, "inf") => return Some(Value::Float(f64::INFINITY)),
            _ => return None,
        };
        Some(Value::ModuleFunction(function))
    }
}

/// FNV-1a, so string seeds map to the same generator state on every platform.
fn stable_hash(text: &str) -> u64 {
    text.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

impl Eval<'_> {
    pub(super) fn call_module_function(
        &mut self,
        function: ModuleFunction,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> RunResult<Value> {
        let name = function.name();
        if let Some((key, _)) = kwargs.first() {
            return raise(
                ExcType::TypeError,
                format!("{name}() got an unexpected keyword argument '{key}'"),
            );
        }
        let expected = match function {
            ModuleFunction::Random => 0..=0,
            ModuleFunction::Seed => 0..=1,
            ModuleFunction::Randrange => 1..=3,
            ModuleFunction::Randint | ModuleFunction::Uniform => 2..=2,
            _ => 1..=1,
        };
        if !expected.contains(&args.len()) {
            return raise(
                ExcType::TypeError,
                format!("{name}() takes {} arguments ({} given)", expected_text(&expected), args.len()),
            );
        }
        match function {
            ModuleFunction::Seed => {
                let seed = match args.first() {
                    None | Some(Value::None) => self.rt.seed,
                    Some(Value::Str(text)) => stable_hash(text),
                    Some(value) => match value.as_number() {
                        Some(Number::Int(i)) => i.cast_unsigned(),
                        Some(Number::Big(i)) => stable_hash(&i.to_string()),
                        Some(Number::Float(f)) => f.to_bits(),
                        None => {
                            return raise(
                                ExcType::TypeError,
                                format!(
                                    "The only supported seed types are: None, int, float and str, not {}",
                                    value.type_name(&self.rt.heap)
                                ),
                            );
                        }
                    },
                };
                self.rt.rng = ChaCha8Rng::seed_from_u64(seed);
                Ok(Value::None)
            }
            ModuleFunction::Random => Ok(Value::Float(self.rt.rng.gen_range(0.0..1.0))),
            ModuleFunction::Uniform => {
                let low = self.float_arg(name, &args[0])?;
                let high = self.float_arg(name, &args[1])?;
                let unit: f64 = self.rt.rng.gen_range(0.0..1.0);
                Ok(Value::Float(low + (high - low) * unit))
            }
            ModuleFunction::Randint => {
                let low = self.int_arg(name, &args[0])?;
                let high = self.int_arg(name, &args[1])?;
                if low > high {
                    return raise(
                        ExcType::ValueError,
                        format!("empty range in randrange({low}, {})", high.saturating_add(1)),
                    );
                }
                Ok(Value::Int(self.rt.rng.gen_range(low..=high)))
            }
            ModuleFunction::Randrange => {
                let bounds = args
                    .iter()
                    .map(|arg| self.int_arg(name, arg))
                    .collect::<RunResult<Vec<_>>>()?;
                let (start, stop, step) = match bounds.as_slice() {
                    [stop] => (0, *stop, 1),
                    [start, stop] => (*start, *stop, 1),
                    [start, stop, step] => (*start, *stop, *step),
                    _ => unreachable!("arity checked above"),
                };
                if step == 0 {
                    return raise(ExcType::ValueError, "zero step for randrange()");
                }
                let count = super::value::range_len(start, stop, step);
                if count == 0 {
                    return raise(ExcType::ValueError, format!("empty range in randrange({start}, {stop})"));
                }
                let offset = i64::try_from(self.rt.rng.gen_range(0..count)).unwrap_or(0);
                Ok(Value::Int(start + offset * step))
            }
            ModuleFunction::Choice => {
                let items = self.collect(&args[0])?;
                if items.is_empty() {
                    return raise(ExcType::IndexError, "Cannot choose from an empty sequence");
                }
                let index = self.rt.rng.gen_range(0..items.len());
                Ok(items[index].clone())
            }
            ModuleFunction::Shuffle => {
                let Value::Ref(id) = &args[0] else {
                    return self.not_a_list(&args[0]);
                };
                let id = *id;
                let mut items = match self.rt.heap.get_mut(id) {
                    HeapData::List(items) => std::mem::take(items),
                    _ => return self.not_a_list(&args[0]),
                };
                items.shuffle(&mut self.rt.rng);
                if let HeapData::List(slot) = self.rt.heap.get_mut(id) {
                    *slot = items;
                }
                Ok(Value::None)
            }
            ModuleFunction::Sqrt => {
                let x = self.float_arg(name, &args[0])?;
                if x < 0.0 {
                    return raise(ExcType::ValueError, "math domain error");
                }
                Ok(Value::Float(x.sqrt()))
            }
            ModuleFunction::Floor | ModuleFunction::Ceil => match args[0].as_number() {
                Some(Number::Int(i)) => Ok(Value::Int(i)),
                Some(Number::Big(i)) => Ok(Value::BigInt(i)),
                Some(Number::Float(f)) => {
                    float_to_int(if function == ModuleFunction::Floor { f.floor() } else { f.ceil() })
                }
                None => raise(
                    ExcType::TypeError,
                    format!("must be real number, not {}", args[0].type_name(&self.rt.heap)),
                ),
            },
        }
    }

    fn not_a_list<T>(&self, value: &Value) -> RunResult<T> {
        raise(
            ExcType::TypeError,
            format!("'{}' object does not support item assignment", value.type_name(&self.rt.heap)),
        )
    }

    fn float_arg(&self, function: &str, value: &Value) -> RunResult<f64> {
        match value.as_number() {
            Some(number) => Ok(number.as_f64()),
            None => raise(
                ExcType::TypeError,
                format!("{function}() must be real number, not {}", value.type_name(&self.rt.heap)),
            ),
        }
    }

    fn int_arg(&self, function: &str, value: &Value) -> RunResult<i64> {
        match value {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(i64::from(*b)),
            Value::BigInt(_) => raise(ExcType::OverflowError, "Python int too large to convert to C int"),
            other => raise(
                ExcType::TypeError,
                format!(
                    "{function}() argument must be int, not '{}'",
                    other.type_name(&self.rt.heap)
                ),
            ),
        }
    }
}

fn expected_text(range: &std::ops::RangeInclusive<usize>) -> String {
    if range.start() == range.end() {
        format!("exactly {}", range.start())
    } else {
        format!("from {} to {}", range.start(), range.end())
    }
}
