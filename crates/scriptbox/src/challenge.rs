//! Persistent challenge sessions.
//!
//! A challenge program is loaded once; afterwards the host calls its top-level
//! functions repeatedly (e.g. one call per game turn). Globals persist between
//! calls, so a function can keep state in module-level variables.

use std::{fmt, sync::Arc};

use crate::{
    config::EngineConfig,
    coordinator::{ExecutionCoordinator, ExecutionMode, ExecutionResult, ExecutionStatus},
    determinism::DeterminismGuard,
    interpreter::{CallError, InterpreterFactory, RunOutcome},
    io::ReplayIo,
    object::HostValue,
    registry::{SessionError, SessionId, SessionRegistry},
    source::SourceUnit,
    translate::{ErrorInfo, translate},
};

/// Errors from a [`ChallengeSession`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChallengeError {
    /// `invoke` was called before `initialize` or after `teardown`.
    NotInitialized,
    UndefinedFunction(String),
    NotCallable { name: String, type_name: String },
    /// The function raised; the line is relative to the challenge program.
    Raised(ErrorInfo),
    /// The function called `input()`; nobody can answer inside a turn.
    InputRequested { prompt: String },
    /// The call exceeded its time or operation budget.
    Timeout,
    /// The program failed while loading.
    Load(Box<ExecutionResult>),
    Session(SessionError),
}

impl fmt::Display for ChallengeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => f.write_str("challenge session is not initialized"),
            Self::UndefinedFunction(name) => write!(f, "function '{name}' is not defined"),
            Self::NotCallable { name, type_name } => write!(f, "'{name}' is a {type_name}, not a function"),
            Self::Raised(error) => write!(f, "{error}"),
            Self::InputRequested { prompt } => {
                write!(f, "input() is not available during a challenge call (prompt {prompt:?})")
            }
            Self::Timeout => f.write_str("challenge call timed out"),
            Self::Load(result) => match &result.error {
                Some(error) => write!(f, "challenge program failed to load: {error}"),
                None => write!(f, "challenge program failed to load: {:?}", result.status),
            },
            Self::Session(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for ChallengeError {}

impl From<SessionError> for ChallengeError {
    fn from(error: SessionError) -> Self {
        Self::Session(error)
    }
}

impl From<CallError> for ChallengeError {
    fn from(error: CallError) -> Self {
        match error {
            CallError::Undefined(name) => Self::UndefinedFunction(name),
            CallError::NotCallable { name, type_name } => Self::NotCallable { name, type_name },
            CallError::NotInitialized => Self::NotInitialized,
        }
    }
}

/// One interpreter kept alive across many function calls.
#[derive(Debug)]
pub struct ChallengeSession {
    registry: SessionRegistry,
    coordinator: ExecutionCoordinator,
    fixed_seed: Option<u64>,
    loaded: Option<Loaded>,
    invocations: u64,
    output: String,
}

#[derive(Debug)]
struct Loaded {
    session: SessionId,
    unit: SourceUnit,
}

impl ChallengeSession {
    #[must_use]
    pub fn new(factory: Arc<dyn InterpreterFactory>, config: &EngineConfig) -> Self {
        Self {
            registry: SessionRegistry::new(factory),
            coordinator: ExecutionCoordinator::new(config),
            fixed_seed: config.fixed_seed,
            loaded: None,
            invocations: 0,
            output: String::new(),
        }
    }

    /// Loads `source` into a fresh session, replacing any program loaded earlier.
    ///
    /// Output printed while loading is retained like call output.
    pub fn initialize(&mut self, source: impl Into<String>) -> Result<(), ChallengeError> {
        self.teardown();
        let unit = SourceUnit::new(source);
        let session = self.registry.create();
        let mut guard = DeterminismGuard::with_fixed_seed(self.fixed_seed);
        let result = self
            .coordinator
            .execute(&mut self.registry, session, &unit, &[], &mut guard, ExecutionMode::Batch);
        let result = match result {
            Ok(result) => result,
            Err(error) => {
                self.registry.destroy(session)?;
                return Err(error.into());
            }
        };
        self.output.push_str(&result.stdout);
        if result.status != ExecutionStatus::Success {
            log::warn!("challenge program failed to load: {:?}", result.status);
            self.registry.destroy(session)?;
            return Err(ChallengeError::Load(Box::new(result)));
        }
        log::info!("challenge program loaded into session {session}");
        self.loaded = Some(Loaded { session, unit });
        Ok(())
    }

    /// Calls the top-level function `function` with `args`.
    pub fn invoke(&mut self, function: &str, args: &[HostValue]) -> Result<HostValue, ChallengeError> {
        let Some(loaded) = &self.loaded else {
            return Err(ChallengeError::NotInitialized);
        };
        let session = loaded.session;
        let mut io = ReplayIo::silent();
        let call = {
            let interpreter = self.registry.acquire_live(session)?;
            interpreter.call(function, args, &mut io, self.coordinator.limits())
        };
        match &call {
            Ok(RunOutcome::Crashed(_)) => self.registry.mark_corrupted(session)?,
            _ => self.registry.release(session)?,
        }
        self.output.push_str(io.stdout());
        match call? {
            RunOutcome::Completed(value) => {
                self.invocations += 1;
                log::debug!("challenge call {function} #{} returned", self.invocations);
                Ok(value)
            }
            RunOutcome::Raised(raised) => Err(ChallengeError::Raised(translate(&raised, &loaded.unit))),
            RunOutcome::InputExhausted { prompt, .. } => Err(ChallengeError::InputRequested { prompt }),
            RunOutcome::ResourceExceeded(_) => Err(ChallengeError::Timeout),
            RunOutcome::Crashed(message) => {
                log::error!("challenge call {function} crashed the interpreter: {message}");
                Err(ChallengeError::Session(SessionError::Corrupted(session)))
            }
        }
    }

    /// Output printed since the last call to this method.
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    /// Number of successful `invoke` calls since the program was loaded.
    #[must_use]
    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.loaded.is_some()
    }

    /// Releases the session. Safe to call more than once.
    pub fn teardown(&mut self) {
        if let Some(loaded) = self.loaded.take() {
            if let Err(error) = self.registry.destroy(loaded.session) {
                log::warn!("challenge teardown: {error}");
            }
            log::debug!("challenge session {} torn down", loaded.session);
        }
        self.invocations = 0;
    }
}
