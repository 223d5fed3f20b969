//! The capability interface the engine drives.
//!
//! The engine never touches interpreter internals; it only initializes, checks,
//! reseeds, resets, executes and calls through [`Interpreter`]. The built-in
//! implementation is [`ScriptInterpreter`](crate::ScriptInterpreter); tests substitute fakes.

use std::fmt;

use crate::{
    exception::RaisedException,
    io::HostIo,
    object::HostValue,
    resource::{ResourceError, ResourceLimits},
};

/// How one `execute` or `call` ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Ran to the end. `execute` always returns `HostValue::None`; `call` returns the
    /// function's result.
    Completed(HostValue),
    /// An exception escaped the program.
    Raised(RaisedException),
    /// `input()` was called with no value available.
    InputExhausted { prompt: String, line: Option<usize> },
    /// A time or operation budget ran out.
    ResourceExceeded(ResourceError),
    /// The interpreter itself failed; its state can no longer be trusted.
    Crashed(String),
}

/// The interpreter could not be brought up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitError {
    pub message: String,
}

impl InitError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "interpreter failed to initialize: {}", self.message)
    }
}

impl std::error::Error for InitError {}

/// Why a named function could not be called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// No global with that name exists.
    Undefined(String),
    /// The global exists but is not callable; carries its type name.
    NotCallable { name: String, type_name: String },
    /// The interpreter was never initialized.
    NotInitialized,
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined(name) => write!(f, "function '{name}' is not defined"),
            Self::NotCallable { name, type_name } => {
                write!(f, "'{name}' is a {type_name}, not a function")
            }
            Self::NotInitialized => write!(f, "interpreter is not initialized"),
        }
    }
}

impl std::error::Error for CallError {}

/// A script interpreter the engine can drive.
pub trait Interpreter: Send {
    /// Human-readable implementation name, used in logs.
    fn name(&self) -> &str;

    /// Brings the interpreter up. Calling it again on a live interpreter is a no-op.
    fn initialize(&mut self) -> Result<(), InitError>;

    /// Evaluates a trivial constant expression; `false` means the handle must be replaced.
    fn is_alive(&mut self) -> bool;

    /// Replaces the PRNG state with one derived from `seed`.
    fn reseed(&mut self, seed: u64);

    /// Drops all globals and heap state.
    fn reset(&mut self);

    /// Runs a whole program against the interpreter's current globals.
    fn execute(&mut self, source: &str, io: &mut dyn HostIo, limits: &ResourceLimits) -> RunOutcome;

    /// Calls a top-level function defined by an earlier `execute`.
    fn call(
        &mut self,
        function: &str,
        args: &[HostValue],
        io: &mut dyn HostIo,
        limits: &ResourceLimits,
    ) -> Result<RunOutcome, CallError>;
}

/// Creates interpreter handles for the session registry.
pub trait InterpreterFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Interpreter>, InitError>;
}

/// Factory for the built-in [`ScriptInterpreter`](crate::ScriptInterpreter).
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptFactory;

impl InterpreterFactory for ScriptFactory {
    fn create(&self) -> Result<Box<dyn Interpreter>, InitError> {
        Ok(Box::new(crate::script::ScriptInterpreter::new()))
    }
}
