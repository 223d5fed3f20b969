//! Tests for session healing and seed handling across the coordinator, using fake
//! interpreters that crash or go stale on demand.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use pretty_assertions::assert_eq;
use scriptbox::{
    CallError, DeterminismGuard, EngineConfig, ExecutionCoordinator, ExecutionMode, ExecutionStatus, HostIo,
    HostValue, InitError, Interpreter, InterpreterFactory, ResourceLimits, RunOutcome, SessionRegistry, SessionState,
    SourceUnit,
};

/// Crashes on the first `execute` of the first handle it hands out.
#[derive(Default)]
struct FlakyFactory {
    created: AtomicUsize,
    seeds: Arc<Mutex<Vec<u64>>>,
}

struct FlakyInterpreter {
    generation: usize,
    seeds: Arc<Mutex<Vec<u64>>>,
    alive: bool,
}

impl InterpreterFactory for FlakyFactory {
    fn create(&self) -> Result<Box<dyn Interpreter>, InitError> {
        let generation = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(FlakyInterpreter {
            generation,
            seeds: Arc::clone(&self.seeds),
            alive: false,
        }))
    }
}

impl Interpreter for FlakyInterpreter {
    fn name(&self) -> &str {
        "flaky"
    }

    fn initialize(&mut self) -> Result<(), InitError> {
        self.alive = true;
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.alive
    }

    fn reseed(&mut self, seed: u64) {
        self.seeds.lock().unwrap().push(seed);
    }

    fn reset(&mut self) {}

    fn execute(&mut self, source: &str, io: &mut dyn HostIo, _limits: &ResourceLimits) -> RunOutcome {
        if self.generation == 1 {
            return RunOutcome::Crashed("native stack overflow".to_owned());
        }
        if source == "die" {
            self.alive = false;
        }
        io.write_stdout(&format!("gen {}\n", self.generation));
        RunOutcome::Completed(HostValue::None)
    }

    fn call(
        &mut self,
        function: &str,
        _args: &[HostValue],
        _io: &mut dyn HostIo,
        _limits: &ResourceLimits,
    ) -> Result<RunOutcome, CallError> {
        Err(CallError::Undefined(function.to_owned()))
    }
}

fn batch(
    coordinator: &ExecutionCoordinator,
    registry: &mut SessionRegistry,
    id: scriptbox::SessionId,
    source: &str,
    guard: &mut DeterminismGuard,
) -> scriptbox::ExecutionResult {
    coordinator
        .execute(registry, id, &SourceUnit::new(source), &[], guard, ExecutionMode::Batch)
        .unwrap()
}

#[test]
fn a_crash_corrupts_the_session_and_the_next_attempt_replaces_it() {
    let factory = Arc::new(FlakyFactory::default());
    let mut registry = SessionRegistry::new(Arc::clone(&factory) as Arc<dyn InterpreterFactory>);
    let coordinator = ExecutionCoordinator::new(&EngineConfig::default());
    let id = registry.create();
    let mut guard = DeterminismGuard::fixed(99);

    let crashed = batch(&coordinator, &mut registry, id, "print(1)", &mut guard);
    assert_eq!(crashed.status, ExecutionStatus::RuntimeError);
    assert_eq!(crashed.error.map(|e| e.exc_type), Some("InternalError".to_owned()));
    assert_eq!(registry.state(id), Some(SessionState::Corrupted));

    let healed = batch(&coordinator, &mut registry, id, "print(1)", &mut guard);
    assert_eq!(healed.status, ExecutionStatus::Success);
    assert_eq!(healed.stdout, "gen 2\n");
    assert_eq!(registry.state(id), Some(SessionState::Ready));
    assert_eq!(factory.created.load(Ordering::SeqCst), 2);
}

#[test]
fn a_handle_failing_its_liveness_check_is_replaced() {
    let factory = Arc::new(FlakyFactory::default());
    factory.created.store(1, Ordering::SeqCst);
    let mut registry = SessionRegistry::new(Arc::clone(&factory) as Arc<dyn InterpreterFactory>);
    let coordinator = ExecutionCoordinator::new(&EngineConfig::default());
    let id = registry.create();
    let mut guard = DeterminismGuard::fixed(5);

    assert_eq!(batch(&coordinator, &mut registry, id, "die", &mut guard).stdout, "gen 2\n");
    assert_eq!(batch(&coordinator, &mut registry, id, "live", &mut guard).stdout, "gen 3\n");
    assert_eq!(batch(&coordinator, &mut registry, id, "live", &mut guard).stdout, "gen 3\n");
}

#[test]
fn every_attempt_is_reseeded_with_the_same_seed() {
    let factory = Arc::new(FlakyFactory::default());
    factory.created.store(1, Ordering::SeqCst);
    let seeds = Arc::clone(&factory.seeds);
    let mut registry = SessionRegistry::new(factory);
    let coordinator = ExecutionCoordinator::new(&EngineConfig::default());
    let id = registry.create();
    let mut guard = DeterminismGuard::new();

    for _ in 0..3 {
        batch(&coordinator, &mut registry, id, "x", &mut guard);
    }
    let seeds = seeds.lock().unwrap().clone();
    assert_eq!(seeds.len(), 3);
    assert!(seeds.iter().all(|seed| *seed == seeds[0]));
    assert_eq!(guard.seed(), Some(seeds[0]));
}
