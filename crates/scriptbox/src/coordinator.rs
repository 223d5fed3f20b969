//! Runs one source unit in one session and classifies how it ended.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::{
    config::EngineConfig,
    determinism::DeterminismGuard,
    interpreter::RunOutcome,
    io::ReplayIo,
    registry::{SessionError, SessionId, SessionRegistry},
    resource::{ResourceError, ResourceLimits},
    source::SourceUnit,
    translate::{ErrorInfo, translate, translate_line},
};

/// Final classification of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    RuntimeError,
    Timeout,
    AwaitingInput,
}

/// Where an attempt ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Local,
    Remote,
}

/// How `input()` with no queued value is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Suspend with [`ExecutionStatus::AwaitingInput`].
    Interactive,
    /// Fail with `EOFError`, since nobody can answer.
    Batch,
}

/// The authoritative result of one attempt.
///
/// Output is not accumulated across attempts: a replay produces the full transcript
/// again. `echo` carries the newest consumed input for terminal-style UIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    pub pending_prompt: Option<String>,
    pub error: Option<ErrorInfo>,
    pub echo: Option<String>,
    pub duration: Duration,
    pub backend: Backend,
    /// Queued values the attempt consumed; fewer than queued means trailing inputs
    /// went unused.
    pub inputs_consumed: usize,
}

impl ExecutionResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    #[must_use]
    pub fn is_awaiting_input(&self) -> bool {
        self.status == ExecutionStatus::AwaitingInput
    }
}

/// Executes source units against sessions from a [`SessionRegistry`].
#[derive(Debug, Clone)]
pub struct ExecutionCoordinator {
    limits: ResourceLimits,
    echo_inputs: bool,
    script_name: String,
}

impl ExecutionCoordinator {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            limits: config.limits(),
            echo_inputs: config.echo_inputs,
            script_name: config.script_name.clone(),
        }
    }

    /// A copy with a different per-attempt time limit.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            limits: self.limits.clone().max_duration(timeout),
            ..self.clone()
        }
    }

    /// A copy with a different echo setting.
    #[must_use]
    pub fn with_echo(&self, echo_inputs: bool) -> Self {
        Self {
            echo_inputs,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    #[must_use]
    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    /// Runs `unit` from the top in `session`, answering `input()` from `inputs`.
    ///
    /// The session's globals are cleared and its PRNG reseeded from `guard` first, so
    /// an attempt never sees state from an earlier one. Only session acquisition can
    /// fail; everything the program does is reported in the result.
    pub fn execute(
        &self,
        registry: &mut SessionRegistry,
        session: SessionId,
        unit: &SourceUnit,
        inputs: &[String],
        guard: &mut DeterminismGuard,
        mode: ExecutionMode,
    ) -> Result<ExecutionResult, SessionError> {
        let started = Instant::now();
        let mut io = ReplayIo::new(inputs, self.echo_inputs);
        let outcome = {
            let interpreter = registry.acquire(session)?;
            interpreter.reset();
            let seed = guard.apply_seed(interpreter);
            log::debug!(
                "session {session}: executing with {} queued input(s), seed {seed:#018x}",
                inputs.len()
            );
            interpreter.execute(unit.text(), &mut io, &self.limits)
        };
        if matches!(outcome, RunOutcome::Crashed(_)) {
            registry.mark_corrupted(session)?;
        } else {
            registry.release(session)?;
        }
        let output = io.into_output();
        let mut result = ExecutionResult {
            status: ExecutionStatus::Success,
            stdout: output.stdout,
            stderr: output.stderr,
            pending_prompt: None,
            error: None,
            echo: inputs[..output.consumed].last().cloned(),
            duration: started.elapsed(),
            backend: Backend::Local,
            inputs_consumed: output.consumed,
        };
        self.classify(&mut result, outcome, unit, mode);
        log::debug!("session {session}: {:?} in {:?}", result.status, result.duration);
        Ok(result)
    }

    fn classify(&self, result: &mut ExecutionResult, outcome: RunOutcome, unit: &SourceUnit, mode: ExecutionMode) {
        match outcome {
            RunOutcome::Completed(_) => {}
            RunOutcome::Raised(raised) => self.fail(result, translate(&raised, unit)),
            RunOutcome::InputExhausted { prompt, line } => match mode {
                ExecutionMode::Interactive => {
                    result.status = ExecutionStatus::AwaitingInput;
                    result.pending_prompt = Some(prompt);
                }
                ExecutionMode::Batch => {
                    // CPython writes the prompt before raising.
                    result.stdout.push_str(&prompt);
                    let error = ErrorInfo::new("EOFError", "EOF when reading a line", translate_line(line, unit));
                    self.fail(result, error);
                }
            },
            RunOutcome::ResourceExceeded(ResourceError::Recursion { .. }) => {
                self.fail(result, ErrorInfo::new("RecursionError", "maximum recursion depth exceeded", None));
            }
            RunOutcome::ResourceExceeded(error) => {
                result.status = ExecutionStatus::Timeout;
                result.stderr.push_str(&format!("{error}\n"));
            }
            RunOutcome::Crashed(message) => {
                self.fail(result, ErrorInfo::new("InternalError", message, None));
            }
        }
    }

    fn fail(&self, result: &mut ExecutionResult, error: ErrorInfo) {
        result.status = ExecutionStatus::RuntimeError;
        result.stderr.push_str(&error.traceback(&self.script_name));
        result.error = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::interpreter::ScriptFactory;

    fn setup() -> (ExecutionCoordinator, SessionRegistry, SessionId) {
        let mut registry = SessionRegistry::new(Arc::new(ScriptFactory));
        let session = registry.create();
        let config = EngineConfig::default().timeout(Duration::from_millis(500));
        (ExecutionCoordinator::new(&config), registry, session)
    }

    #[test]
    fn interactive_mode_suspends_with_prompt() {
        let (coordinator, mut registry, session) = setup();
        let unit = SourceUnit::new("print('hello')\nname = input('Name: ')\n");
        let result = coordinator
            .execute(&mut registry, session, &unit, &[], &mut DeterminismGuard::fixed(1), ExecutionMode::Interactive)
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::AwaitingInput);
        assert_eq!(result.pending_prompt.as_deref(), Some("Name: "));
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(registry.state(session), Some(crate::registry::SessionState::Ready));
    }

    #[test]
    fn batch_mode_turns_exhaustion_into_eof_error() {
        let (coordinator, mut registry, session) = setup();
        let unit = SourceUnit::new("a = input('a? ')\nb = input('b? ')\n");
        let inputs = vec!["1".to_owned()];
        let result = coordinator
            .execute(&mut registry, session, &unit, &inputs, &mut DeterminismGuard::fixed(1), ExecutionMode::Batch)
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::RuntimeError);
        assert_eq!(result.stdout, "a? b? ");
        assert_eq!(result.error, Some(ErrorInfo::new("EOFError", "EOF when reading a line", Some(2))));
        assert_eq!(result.inputs_consumed, 1);
        assert_eq!(result.echo.as_deref(), Some("1"));
    }

    #[test]
    fn infinite_loop_times_out_with_partial_output() {
        let (coordinator, mut registry, session) = setup();
        let unit = SourceUnit::new("print('start')\nwhile True:\n    pass\n");
        let result = coordinator
            .execute(&mut registry, session, &unit, &[], &mut DeterminismGuard::fixed(1), ExecutionMode::Batch)
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert_eq!(result.stdout, "start\n");
    }

    #[test]
    fn globals_do_not_leak_between_attempts() {
        let (coordinator, mut registry, session) = setup();
        let mut guard = DeterminismGuard::fixed(1);
        let first = SourceUnit::new("leftover = 1\n");
        coordinator
            .execute(&mut registry, session, &first, &[], &mut guard, ExecutionMode::Batch)
            .unwrap();
        let second = SourceUnit::new("print(leftover)\n");
        let result = coordinator
            .execute(&mut registry, session, &second, &[], &mut guard, ExecutionMode::Batch)
            .unwrap();
        assert_eq!(result.error.map(|e| e.exc_type), Some("NameError".to_owned()));
    }
}
