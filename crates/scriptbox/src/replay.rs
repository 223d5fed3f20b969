//! Input queue and replay engine.
//!
//! The runtime cannot suspend a call stack, so waiting for input is simulated: an
//! attempt that reaches an unanswered `input()` ends with
//! [`ExecutionStatus::AwaitingInput`]. When the human answers, the value is appended
//! to the run's queue and the whole program runs again from the top, in the same
//! session with freshly cleared globals and the same seed. Every earlier value is
//! replayed in order, so execution arrives at the new value with identical state.

use serde::{Deserialize, Serialize};

use crate::{
    coordinator::{ExecutionCoordinator, ExecutionMode, ExecutionResult, ExecutionStatus},
    determinism::DeterminismGuard,
    error::EngineError,
    registry::{SessionId, SessionRegistry},
    source::SourceUnit,
};

/// Ordered, append-only values supplied for `input()` calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputQueue {
    values: Vec<String>,
}

impl InputQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// One value per line of `buffer`, as stdin would deliver them.
    #[must_use]
    pub fn from_stdin(buffer: &str) -> Self {
        Self {
            values: buffer.lines().map(str::to_owned).collect(),
        }
    }

    pub fn push(&mut self, value: impl Into<String>) {
        self.values.push(value.into());
    }

    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The values joined as a stdin buffer, one per line.
    #[must_use]
    pub fn to_stdin(&self) -> String {
        let mut buffer = String::new();
        for value in &self.values {
            buffer.push_str(value);
            buffer.push('\n');
        }
        buffer
    }

    /// Whether `self` starts with every value of `other`, in order.
    #[must_use]
    pub fn extends(&self, other: &Self) -> bool {
        self.values.starts_with(&other.values)
    }
}

impl<S: Into<String>> FromIterator<S> for InputQueue {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// One logical interactive run: a program, its session, its queue and its seed.
#[derive(Debug)]
pub struct InteractiveRun {
    session: SessionId,
    unit: SourceUnit,
    queue: InputQueue,
    guard: DeterminismGuard,
    last: Option<ExecutionResult>,
    attempts: usize,
}

impl InteractiveRun {
    pub(crate) fn new(session: SessionId, unit: SourceUnit, queue: InputQueue, mut guard: DeterminismGuard) -> Self {
        guard.reset();
        guard.initialize();
        Self {
            session,
            unit,
            queue,
            guard,
            last: None,
            attempts: 0,
        }
    }

    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }

    #[must_use]
    pub fn source(&self) -> &SourceUnit {
        &self.unit
    }

    #[must_use]
    pub fn inputs(&self) -> &InputQueue {
        &self.queue
    }

    /// The seed every attempt of this run uses.
    #[must_use]
    pub fn seed(&self) -> Option<u64> {
        self.guard.seed()
    }

    /// Number of attempts executed so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// The result of the latest attempt.
    #[must_use]
    pub fn last_result(&self) -> Option<&ExecutionResult> {
        self.last.as_ref()
    }

    #[must_use]
    pub fn is_awaiting_input(&self) -> bool {
        self.last.as_ref().is_some_and(ExecutionResult::is_awaiting_input)
    }

    /// Appends the answer to the outstanding `input()` call.
    pub(crate) fn push_input(&mut self, value: String) -> Result<(), EngineError> {
        if !self.is_awaiting_input() {
            return Err(EngineError::NotAwaitingInput);
        }
        self.queue.push(value);
        Ok(())
    }

    /// Replaces the queue with one that extends it; the seed is kept.
    pub(crate) fn extend_queue(&mut self, queue: InputQueue) {
        debug_assert!(queue.extends(&self.queue));
        self.queue = queue;
    }

    /// Runs the program from the top with the whole queue.
    pub(crate) fn attempt(
        &mut self,
        coordinator: &ExecutionCoordinator,
        registry: &mut SessionRegistry,
    ) -> Result<ExecutionResult, EngineError> {
        self.attempts += 1;
        log::debug!(
            "run in session {}: attempt {} with {} input(s)",
            self.session,
            self.attempts,
            self.queue.len()
        );
        let result = coordinator.execute(
            registry,
            self.session,
            &self.unit,
            self.queue.as_slice(),
            &mut self.guard,
            ExecutionMode::Interactive,
        )?;
        if result.status != ExecutionStatus::AwaitingInput && result.inputs_consumed < self.queue.len() {
            log::info!(
                "run in session {}: {} queued input(s) were never read",
                self.session,
                self.queue.len() - result.inputs_consumed
            );
        }
        self.last = Some(result.clone());
        Ok(result)
    }

    /// Ends the run, handing back its session for cleanup.
    pub(crate) fn into_session(self) -> SessionId {
        self.session
    }

    /// Records the result of the current attempt when it was produced elsewhere, e.g.
    /// by the remote fallback.
    pub(crate) fn record(&mut self, result: ExecutionResult) {
        self.last = Some(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdin_buffer_splits_into_lines() {
        let queue = InputQueue::from_stdin("3\r\nAda\n\nlast");
        assert_eq!(queue.as_slice(), ["3", "Ada", "", "last"]);
        assert_eq!(queue.to_stdin(), "3\nAda\n\nlast\n");
    }

    #[test]
    fn extension_is_prefix_based() {
        let short: InputQueue = ["a"].into_iter().collect();
        let long: InputQueue = ["a", "b"].into_iter().collect();
        assert!(long.extends(&short));
        assert!(!short.extends(&long));
        assert!(short.extends(&InputQueue::new()));
    }
}
