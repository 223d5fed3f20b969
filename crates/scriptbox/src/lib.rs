#![doc = include_str!("../../../README.md")]

mod challenge;
mod config;
mod coordinator;
mod determinism;
mod engine;
mod error;
mod exception;
mod grading;
mod interpreter;
mod io;
mod object;
mod registry;
pub mod remote;
mod replay;
mod resource;
mod script;
mod source;
mod translate;

pub use crate::{
    challenge::{ChallengeError, ChallengeSession},
    config::{ConfigError, EngineConfig, RemoteConfig},
    coordinator::{Backend, ExecutionCoordinator, ExecutionMode, ExecutionResult, ExecutionStatus},
    determinism::DeterminismGuard,
    engine::Engine,
    error::EngineError,
    exception::{RaisedException, StackFrame},
    grading::{BatchOptions, BatchSummary, CaseResult, TestCase, outputs_match},
    interpreter::{CallError, InitError, Interpreter, InterpreterFactory, RunOutcome, ScriptFactory},
    io::{CapturedOutput, HostIo, ReplayIo},
    object::HostValue,
    registry::{SessionError, SessionId, SessionRegistry, SessionState},
    remote::{CancelToken, RemoteError, RemoteExecutor},
    replay::{InputQueue, InteractiveRun},
    resource::{DEFAULT_MAX_RECURSION_DEPTH, ResourceError, ResourceLimits},
    script::ScriptInterpreter,
    source::SourceUnit,
    translate::{ErrorInfo, translate, translate_line, translate_traceback},
};
