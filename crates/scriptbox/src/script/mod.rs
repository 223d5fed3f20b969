//! Tree-walking interpreter for the Python subset student programs are written in.
//!
//! Only [`ScriptInterpreter`] is public; everything else is reached through the
//! [`Interpreter`] trait.

mod ast;
mod builtins;
mod eval;
mod exception;
mod format;
mod modules;
mod parse;
mod value;

use std::{any::Any, thread};

use indexmap::IndexMap;

pub(crate) use format::{float_repr, string_repr};

use self::{
    ast::StmtKind,
    eval::{Eval, Runtime},
    exception::{ExcType, RunResult, Signal, Unwind},
    parse::parse_program,
    value::{DictKey, Heap, HeapData, HeapId, MAX_DATA_DEPTH, Value, key_repr, range_len},
};
use crate::{
    interpreter::{CallError, InitError, Interpreter, RunOutcome},
    io::{HostIo, ReplayIo},
    object::HostValue,
    resource::{LimitedTracker, ResourceLimits},
};

/// Stack for the evaluation thread; deep enough for the default recursion limit.
const EVAL_STACK_SIZE: usize = 64 * 1024 * 1024;

/// The built-in [`Interpreter`].
///
/// Globals and heap values persist across `execute` and `call` until [`Interpreter::reset`].
#[derive(Debug, Default)]
pub struct ScriptInterpreter {
    runtime: Option<Runtime>,
}

impl ScriptInterpreter {
    /// Creates an uninitialized interpreter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Interpreter for ScriptInterpreter {
    fn name(&self) -> &str {
        "scriptbox"
    }

    fn initialize(&mut self) -> Result<(), InitError> {
        if self.runtime.is_none() {
            self.runtime = Some(Runtime::default());
        }
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        let Some(rt) = self.runtime.as_mut() else {
            return false;
        };
        let Ok(program) = parse_program("1 + 1") else {
            return false;
        };
        let Some(StmtKind::Expr(expr)) = program.first().map(|stmt| &stmt.kind) else {
            return false;
        };
        let mut io = ReplayIo::silent();
        let mut eval = Eval::new(rt, &mut io, LimitedTracker::new(ResourceLimits::new()));
        matches!(eval.eval(expr), Ok(Value::Int(2)))
    }

    fn reseed(&mut self, seed: u64) {
        if let Some(rt) = self.runtime.as_mut() {
            rt.reseed(seed);
        }
    }

    fn reset(&mut self) {
        if let Some(rt) = self.runtime.as_mut() {
            rt.reset();
        }
    }

    fn execute(&mut self, source: &str, io: &mut dyn HostIo, limits: &ResourceLimits) -> RunOutcome {
        let Some(rt) = self.runtime.as_mut() else {
            return RunOutcome::Crashed("interpreter is not initialized".to_owned());
        };
        let tracker = LimitedTracker::new(limits.clone());
        // Parsing recurses as deeply as the source nests, so it runs on the big stack too.
        let result = on_eval_thread(|| -> RunResult<HostValue> {
            let program = parse_program(source)?;
            let mut eval = Eval::new(rt, io, tracker);
            eval.exec_block(&program).map(|_| HostValue::None)
        });
        outcome(result)
    }

    fn call(
        &mut self,
        function: &str,
        args: &[HostValue],
        io: &mut dyn HostIo,
        limits: &ResourceLimits,
    ) -> Result<RunOutcome, CallError> {
        let rt = self.runtime.as_mut().ok_or(CallError::NotInitialized)?;
        let Some(target) = rt.globals.get(function) else {
            return Err(CallError::Undefined(function.to_owned()));
        };
        let callable = match target {
            Value::Builtin(_) | Value::ModuleFunction(_) | Value::ExcClass(_) => true,
            Value::Ref(id) => matches!(rt.heap.get(*id), HeapData::Function(_)),
            _ => false,
        };
        if !callable {
            return Err(CallError::NotCallable {
                name: function.to_owned(),
                type_name: target.type_name(&rt.heap).to_owned(),
            });
        }
        let target = target.clone();
        let tracker = LimitedTracker::new(limits.clone());
        let result = on_eval_thread(|| -> RunResult<HostValue> {
            let args = args.iter().map(|arg| to_value(arg, &mut rt.heap)).collect();
            let mut eval = Eval::new(rt, io, tracker);
            let value = eval.call_value(&target, args, Vec::new())?;
            Ok(to_host(&value, &eval.rt.heap, &mut Vec::new()))
        });
        Ok(outcome(result))
    }
}

/// Runs `f` on a scoped thread with [`EVAL_STACK_SIZE`]; a panic becomes `Err`.
fn on_eval_thread<T: Send>(f: impl FnOnce() -> T + Send) -> Result<T, String> {
    thread::scope(|scope| {
        let handle = thread::Builder::new()
            .name("scriptbox-eval".to_owned())
            .stack_size(EVAL_STACK_SIZE)
            .spawn_scoped(scope, f)
            .map_err(|error| format!("failed to start evaluation thread: {error}"))?;
        handle.join().map_err(|payload| panic_message(payload.as_ref()))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "interpreter panicked".to_owned()
    }
}

fn outcome(result: Result<RunResult<HostValue>, String>) -> RunOutcome {
    match result {
        Err(message) => {
            log::error!("evaluation thread failed: {message}");
            RunOutcome::Crashed(message)
        }
        Ok(Ok(value)) => RunOutcome::Completed(value),
        Ok(Err(Unwind::Error(error))) => {
            // `exit()` and `exit(0)` end the program normally.
            if error.exc_type == ExcType::SystemExit && matches!(error.message.as_str(), "" | "0" | "None") {
                RunOutcome::Completed(HostValue::None)
            } else {
                RunOutcome::Raised(error.into_raised())
            }
        }
        Ok(Err(Unwind::Signal(Signal::InputExhausted { prompt, line }))) => RunOutcome::InputExhausted { prompt, line },
        Ok(Err(Unwind::Signal(Signal::Resource(error)))) => RunOutcome::ResourceExceeded(error),
    }
}

fn to_value(value: &HostValue, heap: &mut Heap) -> Value {
    match value {
        HostValue::None => Value::None,
        HostValue::Bool(b) => Value::Bool(*b),
        HostValue::Int(i) => Value::Int(*i),
        HostValue::Float(f) => Value::Float(*f),
        HostValue::Str(s) => Value::Str(s.clone()),
        HostValue::List(items) => {
            let items = items.iter().map(|item| to_value(item, heap)).collect();
            heap.new_list(items)
        }
        HostValue::Dict(entries) => {
            let entries: IndexMap<DictKey, Value> = entries
                .iter()
                .map(|(key, item)| (DictKey::Str(key.clone()), to_value(item, heap)))
                .collect();
            heap.new_dict(entries)
        }
    }
}

/// Converts a script value for the host.
///
/// Cycles, containers nested past [`MAX_DATA_DEPTH`], ints beyond `i64` and non-data
/// values become their repr.
fn to_host(value: &Value, heap: &Heap, active: &mut Vec<HeapId>) -> HostValue {
    match value {
        Value::None => HostValue::None,
        Value::Bool(b) => HostValue::Bool(*b),
        Value::Int(i) => HostValue::Int(*i),
        Value::Float(f) => HostValue::Float(*f),
        Value::Str(s) => HostValue::Str(s.clone()),
        Value::Range { start, stop, step } => {
            let len = range_len(*start, *stop, *step);
            HostValue::List((0..len).map(|i| HostValue::Int(start + step * i64::try_from(i).unwrap_or(0))).collect())
        }
        Value::Ref(id) if !active.contains(id) && active.len() < MAX_DATA_DEPTH => {
            active.push(*id);
            let converted = match heap.get(*id) {
                HeapData::List(items) | HeapData::Tuple(items) => {
                    HostValue::List(items.iter().map(|item| to_host(item, heap, active)).collect())
                }
                HeapData::Dict(entries) => HostValue::Dict(
                    entries
                        .iter()
                        .map(|(key, item)| (key_text(key), to_host(item, heap, active)))
                        .collect(),
                ),
                HeapData::Function(_) => HostValue::Str(value.py_repr(heap)),
            };
            active.pop();
            converted
        }
        other => HostValue::Str(other.py_repr(heap)),
    }
}

fn key_text(key: &DictKey) -> String {
    match key {
        DictKey::Str(s) => s.clone(),
        other => {
            let mut text = String::new();
            key_repr(other, &mut text);
            text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str, inputs: &[String]) -> (RunOutcome, String) {
        let mut interpreter = ScriptInterpreter::new();
        interpreter.initialize().unwrap();
        let mut io = ReplayIo::new(inputs, false);
        let outcome = interpreter.execute(source, &mut io, &ResourceLimits::new());
        (outcome, io.into_output().stdout)
    }

    #[test]
    fn prints_and_completes() {
        let (outcome, stdout) = run("x = [1, 2, 3]\nprint(sum(x), len(x), x[-1])\n", &[]);
        assert_eq!(outcome, RunOutcome::Completed(HostValue::None));
        assert_eq!(stdout, "6 3 3\n");
    }

    #[test]
    fn try_except_cannot_catch_input_exhaustion() {
        let source = "try:\n    name = input('Name: ')\nexcept:\n    print('caught')\n";
        let (outcome, stdout) = run(source, &[]);
        assert_eq!(
            outcome,
            RunOutcome::InputExhausted {
                prompt: "Name: ".to_owned(),
                line: Some(2)
            }
        );
        assert_eq!(stdout, "");
    }

    #[test]
    fn exceptions_carry_their_line() {
        let (outcome, _) = run("x = 1\n\ny = x / 0\n", &[]);
        let RunOutcome::Raised(raised) = outcome else {
            panic!("expected a raised exception, got {outcome:?}");
        };
        assert_eq!(raised.exc_type, "ZeroDivisionError");
        assert_eq!(raised.innermost().unwrap().line, 3);
    }

    #[test]
    fn deep_recursion_hits_the_limit_not_the_stack() {
        let source = "def down(n):\n    return down(n + 1)\ndown(0)\n";
        let (outcome, _) = run(source, &[]);
        let RunOutcome::Raised(raised) = outcome else {
            panic!("expected RecursionError, got {outcome:?}");
        };
        assert_eq!(raised.exc_type, "RecursionError");
    }

    #[test]
    fn exit_zero_is_a_normal_completion() {
        let (outcome, stdout) = run("print('a')\nexit()\nprint('b')\n", &[]);
        assert_eq!(outcome, RunOutcome::Completed(HostValue::None));
        assert_eq!(stdout, "a\n");
    }

    #[test]
    fn call_converts_arguments_and_results() {
        let mut interpreter = ScriptInterpreter::new();
        interpreter.initialize().unwrap();
        let mut io = ReplayIo::silent();
        let limits = ResourceLimits::new();
        interpreter.execute("def pair(a, b):\n    return {'a': a, 'b': [b, b]}\n", &mut io, &limits);
        let outcome = interpreter
            .call("pair", &[HostValue::Int(1), HostValue::from("x")], &mut io, &limits)
            .unwrap();
        let expected = HostValue::from_json_value(serde_json::json!({"a": 1, "b": ["x", "x"]}));
        assert_eq!(outcome, RunOutcome::Completed(expected));
        assert_eq!(
            interpreter.call("missing", &[], &mut io, &limits),
            Err(CallError::Undefined("missing".to_owned()))
        );
    }

    #[test]
    fn same_seed_same_random_sequence() {
        let source = "import random\nprint(random.randint(1, 1000000), random.random())\n";
        let mut outputs = Vec::new();
        for _ in 0..2 {
            let mut interpreter = ScriptInterpreter::new();
            interpreter.initialize().unwrap();
            interpreter.reseed(42);
            let mut io = ReplayIo::silent();
            interpreter.execute(source, &mut io, &ResourceLimits::new());
            outputs.push(io.into_output().stdout);
        }
        assert_eq!(outputs[0], outputs[1]);
    }

    #[test]
    fn deep_source_nesting_is_a_syntax_error() {
        let source = format!("x = {}1{}\nprint(x)\n", "(".repeat(300), ")".repeat(300));
        let (outcome, _) = run(&source, &[]);
        let RunOutcome::Raised(raised) = outcome else {
            panic!("expected SyntaxError, got {outcome:?}");
        };
        assert_eq!(raised.exc_type, "SyntaxError");
        assert_eq!(raised.message, "too many nested parentheses");
    }

    #[test]
    fn deeply_nested_data_does_not_overflow_the_stack() {
        let source = "a = []\nfor i in range(300000):\n    a = [a]\nb = []\nfor i in range(300000):\n    b = [b]\n\
                      s = str(a)\nprint(len(s) > 1000, s[:3])\nprint(a == a)\ntry:\n    a == b\n\
                      except RecursionError:\n    print('too deep')\n";
        let (outcome, stdout) = run(source, &[]);
        assert_eq!(outcome, RunOutcome::Completed(HostValue::None));
        assert_eq!(stdout, "True [[[\nTrue\ntoo deep\n");
    }

    #[test]
    fn deep_results_convert_for_the_host() {
        let mut interpreter = ScriptInterpreter::new();
        interpreter.initialize().unwrap();
        let mut io = ReplayIo::silent();
        let limits = ResourceLimits::new();
        let source = "def deep():\n    a = []\n    for i in range(5000):\n        a = [a]\n    return a\n";
        interpreter.execute(source, &mut io, &limits);
        let outcome = interpreter.call("deep", &[], &mut io, &limits).unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(HostValue::List(_))));
    }

    #[test]
    fn liveness_requires_initialization() {
        let mut interpreter = ScriptInterpreter::new();
        assert!(!interpreter.is_alive());
        interpreter.initialize().unwrap();
        assert!(interpreter.is_alive());
    }
}
