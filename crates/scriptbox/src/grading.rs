//! Batch grading: fixed stdin, no suspension, one fresh session per case.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    coordinator::{ExecutionCoordinator, ExecutionMode, ExecutionResult, ExecutionStatus},
    determinism::DeterminismGuard,
    error::EngineError,
    registry::SessionRegistry,
    remote::RemoteFallback,
    replay::InputQueue,
    source::SourceUnit,
    translate::ErrorInfo,
};

/// One grading case: a stdin buffer and, optionally, the output it must produce.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub expected_output: Option<String>,
}

impl TestCase {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: None,
        }
    }

    #[must_use]
    pub fn expect(mut self, output: impl Into<String>) -> Self {
        self.expected_output = Some(output.into());
        self
    }
}

/// Options shared by every case of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    /// Write consumed input after its prompt, reproducing an interactive transcript.
    pub echo_input: bool,
    /// Scaffold run before the student's code.
    pub prepend: String,
    /// Scaffold run after the student's code.
    pub postpend: String,
    /// Per-case time limit; the engine's `timeout_ms` when unset.
    pub timeout_ms: Option<u64>,
}

/// Result of one grading case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseResult {
    pub actual_output: String,
    pub passed: bool,
    pub error: Option<ErrorInfo>,
    pub time_ms: u64,
    pub status: ExecutionStatus,
    pub stderr: String,
}

impl CaseResult {
    fn from_execution(result: ExecutionResult, expected_output: Option<&str>) -> Self {
        let passed = match expected_output {
            _ if result.status != ExecutionStatus::Success => false,
            Some(expected) => outputs_match(&result.stdout, expected),
            None => true,
        };
        Self {
            passed,
            time_ms: u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX),
            status: result.status,
            error: result.error,
            actual_output: result.stdout,
            stderr: result.stderr,
        }
    }
}

/// Passed/total counts for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub passed: usize,
    pub total: usize,
}

impl BatchSummary {
    #[must_use]
    pub fn of(results: &[CaseResult]) -> Self {
        Self {
            passed: results.iter().filter(|result| result.passed).count(),
            total: results.len(),
        }
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }
}

/// Compares program output ignoring line-ending style, trailing whitespace on each
/// line, and trailing blank lines.
#[must_use]
pub fn outputs_match(actual: &str, expected: &str) -> bool {
    normalize(actual) == normalize(expected)
}

fn normalize(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines
}

/// The coordinator every case of a batch runs on: `options` override the engine's
/// echo setting, and its time limit when one is given.
#[must_use]
pub fn batch_coordinator(coordinator: &ExecutionCoordinator, options: &BatchOptions) -> ExecutionCoordinator {
    let coordinator = coordinator.with_echo(options.echo_input);
    match options.timeout_ms {
        Some(timeout_ms) => coordinator.with_timeout(Duration::from_millis(timeout_ms)),
        None => coordinator,
    }
}

/// Runs `unit` once against `stdin` in a fresh session that is destroyed afterwards.
///
/// When the session cannot be initialized and `fallback` is given, the case runs
/// remotely instead.
pub fn run(
    coordinator: &ExecutionCoordinator,
    registry: &mut SessionRegistry,
    unit: &SourceUnit,
    stdin: &str,
    expected_output: Option<&str>,
    guard: &mut DeterminismGuard,
    fallback: Option<&RemoteFallback<'_>>,
) -> Result<CaseResult, EngineError> {
    let session = registry.create();
    let queue = InputQueue::from_stdin(stdin);
    let executed = coordinator.execute(registry, session, unit, queue.as_slice(), guard, ExecutionMode::Batch);
    registry.destroy(session)?;
    let result = match (executed.map_err(EngineError::from), fallback) {
        (Err(EngineError::Initialization(error)), Some(fallback)) => {
            log::warn!("local interpreter unavailable ({error}); grading remotely");
            fallback.run(coordinator, unit, stdin.to_owned())?
        }
        (executed, _) => executed?,
    };
    Ok(CaseResult::from_execution(result, expected_output))
}

/// Runs every case, isolating each one in its own session and seed.
///
/// A case that times out or crashes does not affect the others.
pub fn run_batch(
    coordinator: &ExecutionCoordinator,
    registry: &mut SessionRegistry,
    unit: &SourceUnit,
    cases: &[TestCase],
    options: &BatchOptions,
    fixed_seed: Option<u64>,
    fallback: Option<&RemoteFallback<'_>>,
) -> Result<Vec<CaseResult>, EngineError> {
    let coordinator = batch_coordinator(coordinator, options);
    let mut results = Vec::with_capacity(cases.len());
    for (index, case) in cases.iter().enumerate() {
        let mut guard = DeterminismGuard::with_fixed_seed(fixed_seed);
        let result = run(
            &coordinator,
            registry,
            unit,
            &case.input,
            case.expected_output.as_deref(),
            &mut guard,
            fallback,
        )?;
        log::info!(
            "case {}/{}: {:?}, passed={} in {}ms",
            index + 1,
            cases.len(),
            result.status,
            result.passed,
            result.time_ms
        );
        results.push(result);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_options_override_the_coordinator() {
        let base = ExecutionCoordinator::new(&crate::EngineConfig::default());
        let options = BatchOptions {
            timeout_ms: Some(40),
            ..BatchOptions::default()
        };
        let coordinator = batch_coordinator(&base, &options);
        assert_eq!(coordinator.limits().max_duration, Some(Duration::from_millis(40)));
        assert_eq!(
            batch_coordinator(&base, &BatchOptions::default()).limits().max_duration,
            base.limits().max_duration
        );
    }

    #[test]
    fn comparison_ignores_trailing_whitespace_and_line_endings() {
        assert!(outputs_match("a  \r\nb\n\n\n", "a\nb"));
        assert!(!outputs_match("a\n\nb", "a\nb"));
        assert!(!outputs_match("A", "a"));
    }

    #[test]
    fn summary_counts_passes() {
        let case = |passed| CaseResult {
            actual_output: String::new(),
            passed,
            error: None,
            time_ms: 1,
            status: ExecutionStatus::Success,
            stderr: String::new(),
        };
        let summary = BatchSummary::of(&[case(true), case(false), case(true)]);
        assert_eq!(summary, BatchSummary { passed: 2, total: 3 });
        assert!(!summary.all_passed());
    }
}
