//! The engine facade hosts talk to.

use std::{fmt, sync::Arc};

use crate::{
    challenge::ChallengeSession,
    config::EngineConfig,
    coordinator::{ExecutionCoordinator, ExecutionResult},
    determinism::DeterminismGuard,
    error::EngineError,
    grading::{self, BatchOptions, CaseResult, TestCase},
    interpreter::{InterpreterFactory, ScriptFactory},
    registry::SessionRegistry,
    remote::{CancelToken, Judge0Client, RemoteExecutor, RemoteFallback},
    replay::{InputQueue, InteractiveRun},
    source::SourceUnit,
};

/// Runs student programs interactively, in batch, or as challenge sessions.
///
/// Calls are synchronous; a host running the engine off its UI thread gets one
/// call at a time through `&mut self`.
pub struct Engine {
    config: EngineConfig,
    factory: Arc<dyn InterpreterFactory>,
    registry: SessionRegistry,
    coordinator: ExecutionCoordinator,
    remote: Option<Box<dyn RemoteExecutor>>,
    cancel: CancelToken,
    /// The run `submit_run` continues.
    current: Option<InteractiveRun>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("remote", &self.remote.is_some())
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine on the built-in interpreter, with a Judge0 client when
    /// `config.remote` is set.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_factory(config, Arc::new(ScriptFactory))
    }

    /// Creates an engine whose sessions come from `factory`.
    pub fn with_factory(config: EngineConfig, factory: Arc<dyn InterpreterFactory>) -> Result<Self, EngineError> {
        config.validate()?;
        let remote = match &config.remote {
            Some(remote) => Some(Box::new(Judge0Client::new(remote)?) as Box<dyn RemoteExecutor>),
            None => None,
        };
        Ok(Self {
            coordinator: ExecutionCoordinator::new(&config),
            registry: SessionRegistry::new(Arc::clone(&factory)),
            factory,
            config,
            remote,
            cancel: CancelToken::new(),
            current: None,
        })
    }

    /// Replaces the remote backend, e.g. with an in-process fake.
    ///
    /// `config.remote` still supplies the polling settings; the defaults are used when
    /// it is unset.
    #[must_use]
    pub fn with_remote(mut self, remote: Box<dyn RemoteExecutor>) -> Self {
        self.remote = Some(remote);
        self
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Token that cancels an in-flight remote poll from another thread.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Primary interactive entry point.
    ///
    /// The first call for a program passes empty `prior_inputs` and no
    /// `new_input_value`, which starts a brand-new run. Later calls with the same
    /// source, and inputs extending the current run's queue, replay within that run
    /// (same seed). Anything else starts a new run, resetting the old session first.
    pub fn submit_run(
        &mut self,
        source: &str,
        prior_inputs: &[String],
        new_input_value: Option<&str>,
    ) -> Result<ExecutionResult, EngineError> {
        let mut queue: InputQueue = prior_inputs.iter().cloned().collect();
        if let Some(value) = new_input_value {
            queue.push(value);
        }
        let fresh_start = prior_inputs.is_empty() && new_input_value.is_none();
        let continues = !fresh_start
            && self
                .current
                .as_ref()
                .is_some_and(|run| run.source().text() == source && queue.extends(run.inputs()));
        let mut run = match self.current.take() {
            Some(mut run) if continues => {
                run.extend_queue(queue);
                run
            }
            previous => {
                if let Some(previous) = previous {
                    self.finish(previous);
                }
                log::info!("starting a new interactive run");
                self.new_run(SourceUnit::new(source), queue)
            }
        };
        let result = self.attempt(&mut run);
        self.current = Some(run);
        result
    }

    /// Starts a typed interactive run; its first result is in
    /// [`InteractiveRun::last_result`].
    pub fn start(&mut self, unit: SourceUnit) -> Result<InteractiveRun, EngineError> {
        let mut run = self.new_run(unit, InputQueue::new());
        match self.attempt(&mut run) {
            Ok(_) => Ok(run),
            Err(error) => {
                self.finish(run);
                Err(error)
            }
        }
    }

    /// Answers the outstanding `input()` of `run` and replays it.
    pub fn resume(&mut self, run: &mut InteractiveRun, value: impl Into<String>) -> Result<ExecutionResult, EngineError> {
        run.push_input(value.into())?;
        self.attempt(run)
    }

    /// Releases the session of a typed run.
    pub fn finish(&mut self, run: InteractiveRun) {
        if let Err(error) = self.registry.destroy(run.into_session()) {
            log::debug!("finishing run: {error}");
        }
    }

    /// Abandons the current `submit_run` run and its session.
    pub fn reset(&mut self) {
        if let Some(run) = self.current.take() {
            self.finish(run);
        }
    }

    /// Grades `source` against every case.
    ///
    /// With a remote backend, a case whose local interpreter cannot be initialized
    /// runs remotely with the case input as stdin.
    pub fn run_batch(
        &mut self,
        source: &str,
        cases: &[TestCase],
        options: &BatchOptions,
    ) -> Result<Vec<CaseResult>, EngineError> {
        let unit = SourceUnit::scaffolded(&options.prepend, source, &options.postpend);
        let fallback = remote_fallback(self.remote.as_deref(), &self.config, &self.cancel);
        grading::run_batch(
            &self.coordinator,
            &mut self.registry,
            &unit,
            cases,
            options,
            self.config.fixed_seed,
            fallback.as_ref(),
        )
    }

    /// Runs `source` once against `stdin` without suspension.
    ///
    /// `options` supplies the echo setting, the time limit and any scaffold, as it
    /// does for every case of [`run_batch`](Self::run_batch).
    pub fn run_once(
        &mut self,
        source: &str,
        stdin: &str,
        expected_output: Option<&str>,
        options: &BatchOptions,
    ) -> Result<CaseResult, EngineError> {
        let unit = SourceUnit::scaffolded(&options.prepend, source, &options.postpend);
        let coordinator = grading::batch_coordinator(&self.coordinator, options);
        let fallback = remote_fallback(self.remote.as_deref(), &self.config, &self.cancel);
        let mut guard = DeterminismGuard::with_fixed_seed(self.config.fixed_seed);
        grading::run(
            &coordinator,
            &mut self.registry,
            &unit,
            stdin,
            expected_output,
            &mut guard,
            fallback.as_ref(),
        )
    }

    /// A challenge session on this engine's interpreter factory and limits.
    #[must_use]
    pub fn challenge(&self) -> ChallengeSession {
        ChallengeSession::new(Arc::clone(&self.factory), &self.config)
    }

    fn new_run(&mut self, unit: SourceUnit, queue: InputQueue) -> InteractiveRun {
        let session = self.registry.create();
        InteractiveRun::new(session, unit, queue, DeterminismGuard::with_fixed_seed(self.config.fixed_seed))
    }

    /// One attempt of `run`, falling back to the remote backend only when the local
    /// interpreter cannot be initialized.
    fn attempt(&mut self, run: &mut InteractiveRun) -> Result<ExecutionResult, EngineError> {
        let attempted = run.attempt(&self.coordinator, &mut self.registry);
        match (attempted, remote_fallback(self.remote.as_deref(), &self.config, &self.cancel)) {
            (Err(EngineError::Initialization(error)), Some(fallback)) => {
                log::warn!("local interpreter unavailable ({error}); using remote fallback");
                let result = fallback.run(&self.coordinator, run.source(), run.inputs().to_stdin())?;
                run.record(result.clone());
                Ok(result)
            }
            (other, _) => other,
        }
    }
}

/// `config.remote` supplies the polling settings; the defaults apply when it is unset.
fn remote_fallback<'a>(
    executor: Option<&'a dyn RemoteExecutor>,
    config: &EngineConfig,
    cancel: &'a CancelToken,
) -> Option<RemoteFallback<'a>> {
    executor.map(|executor| RemoteFallback {
        executor,
        config: config.remote.clone().unwrap_or_default(),
        cancel,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::ExecutionStatus;

    fn engine() -> Engine {
        Engine::new(EngineConfig::default().fixed_seed(5)).unwrap()
    }

    #[test]
    fn submit_run_continues_only_matching_runs() {
        let mut engine = engine();
        let source = "a = input('a? ')\nb = input('b? ')\nprint(a + b)\n";
        let first = engine.submit_run(source, &[], None).unwrap();
        assert_eq!(first.status, ExecutionStatus::AwaitingInput);
        let session = engine.current.as_ref().unwrap().session();

        let second = engine.submit_run(source, &[], Some("x")).unwrap();
        assert_eq!(second.pending_prompt.as_deref(), Some("b? "));
        assert_eq!(engine.current.as_ref().unwrap().session(), session);

        let third = engine.submit_run(source, &["x".to_owned()], Some("y")).unwrap();
        assert_eq!(third.status, ExecutionStatus::Success);
        assert_eq!(third.stdout, "a? b? xy\n");

        engine.submit_run("print(1)\n", &[], None).unwrap();
        assert_ne!(engine.current.as_ref().unwrap().session(), session);
        assert_eq!(engine.registry().len(), 1);
    }

    #[test]
    fn resume_requires_a_pending_input() {
        let mut engine = engine();
        let mut run = engine.start(SourceUnit::new("print('done')\n")).unwrap();
        assert_eq!(run.last_result().map(|r| r.status), Some(ExecutionStatus::Success));
        assert_eq!(engine.resume(&mut run, "late"), Err(EngineError::NotAwaitingInput));
        engine.finish(run);
        assert!(engine.registry().is_empty());
    }
}
