//! Interpreter session registry.
//!
//! Sessions are owned slots in an arena keyed by [`SessionId`]. A slot holds at most
//! one interpreter handle, created lazily by the registry's [`InterpreterFactory`] on
//! the first [`SessionRegistry::acquire`]. An acquired session is `Busy` until it is
//! released or marked corrupted; a corrupted or unresponsive handle is replaced on
//! the next acquire.

use std::{fmt, sync::Arc};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::interpreter::{InitError, Interpreter, InterpreterFactory};

/// How many times the registry tries to bring up a handle before giving up.
const INIT_ATTEMPTS: usize = 2;

/// Identifier of one execution session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No interpreter handle yet, or the handle was torn down.
    Uninitialized,
    /// A live handle is available.
    Ready,
    /// The handle is in use by an execution.
    Busy,
    /// The last run failed inside the interpreter; the handle must not be reused.
    Corrupted,
}

/// Errors from session registry operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The requested session was not found.
    NotFound(SessionId),
    /// The session is already in use.
    Busy(SessionId),
    /// The session's handle is unusable and healing it would lose its state.
    Corrupted(SessionId),
    /// No interpreter handle could be brought up.
    Initialization(InitError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "session not found: {id}"),
            Self::Busy(id) => write!(f, "session is busy: {id}"),
            Self::Corrupted(id) => write!(f, "session is corrupted: {id}"),
            Self::Initialization(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<InitError> for SessionError {
    fn from(error: InitError) -> Self {
        Self::Initialization(error)
    }
}

struct SessionSlot {
    state: SessionState,
    interpreter: Option<Box<dyn Interpreter>>,
}

/// Owns every interpreter handle the engine uses.
pub struct SessionRegistry {
    factory: Arc<dyn InterpreterFactory>,
    sessions: AHashMap<SessionId, SessionSlot>,
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    #[must_use]
    pub fn new(factory: Arc<dyn InterpreterFactory>) -> Self {
        Self {
            factory,
            sessions: AHashMap::new(),
        }
    }

    /// Allocates a new, uninitialized session.
    pub fn create(&mut self) -> SessionId {
        let id = SessionId::new();
        self.sessions.insert(
            id,
            SessionSlot {
                state: SessionState::Uninitialized,
                interpreter: None,
            },
        );
        log::debug!("created session {id}");
        id
    }

    /// Removes a session and drops its handle.
    pub fn destroy(&mut self, id: SessionId) -> Result<(), SessionError> {
        self.sessions.remove(&id).ok_or(SessionError::NotFound(id))?;
        log::debug!("destroyed session {id}");
        Ok(())
    }

    #[must_use]
    pub fn state(&self, id: SessionId) -> Option<SessionState> {
        self.sessions.get(&id).map(|slot| slot.state)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Returns a live handle and marks the session busy.
    ///
    /// Creates the handle if absent. An existing handle that is corrupted or fails its
    /// liveness check is discarded and replaced.
    pub fn acquire(&mut self, id: SessionId) -> Result<&mut dyn Interpreter, SessionError> {
        let slot = self.sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        if slot.state == SessionState::Busy {
            return Err(SessionError::Busy(id));
        }
        let healthy = match slot.interpreter.as_mut() {
            Some(existing) => slot.state != SessionState::Corrupted && existing.is_alive(),
            None => false,
        };
        let interpreter = match slot.interpreter.take() {
            Some(existing) if healthy => existing,
            stale => {
                if let Some(stale) = stale {
                    log::warn!("session {id}: replacing unhealthy {} handle", stale.name());
                }
                match create_initialized(self.factory.as_ref()) {
                    Ok(fresh) => fresh,
                    Err(error) => {
                        slot.state = SessionState::Uninitialized;
                        return Err(error.into());
                    }
                }
            }
        };
        slot.state = SessionState::Busy;
        Ok(&mut **slot.interpreter.insert(interpreter))
    }

    /// Like [`acquire`](Self::acquire) but never replaces an existing handle, so state
    /// held by the interpreter survives or the call fails.
    pub fn acquire_live(&mut self, id: SessionId) -> Result<&mut dyn Interpreter, SessionError> {
        let slot = self.sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        match slot.state {
            SessionState::Busy => return Err(SessionError::Busy(id)),
            SessionState::Corrupted => return Err(SessionError::Corrupted(id)),
            SessionState::Uninitialized | SessionState::Ready => {}
        }
        let Some(interpreter) = slot.interpreter.as_mut() else {
            return Err(SessionError::Corrupted(id));
        };
        if !interpreter.is_alive() {
            slot.state = SessionState::Corrupted;
            return Err(SessionError::Corrupted(id));
        }
        slot.state = SessionState::Busy;
        Ok(&mut **interpreter)
    }

    /// Returns a busy session to `Ready`.
    pub fn release(&mut self, id: SessionId) -> Result<(), SessionError> {
        let slot = self.sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        if slot.state == SessionState::Busy {
            slot.state = SessionState::Ready;
        }
        Ok(())
    }

    /// Flags the handle as untrustworthy; the next `acquire` replaces it.
    pub fn mark_corrupted(&mut self, id: SessionId) -> Result<(), SessionError> {
        let slot = self.sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        log::warn!("session {id} marked corrupted");
        slot.state = SessionState::Corrupted;
        Ok(())
    }

    /// Tears down the session's handle unconditionally; the session id stays valid.
    pub fn reset(&mut self, id: SessionId) -> Result<(), SessionError> {
        let slot = self.sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        slot.interpreter = None;
        slot.state = SessionState::Uninitialized;
        log::debug!("reset session {id}");
        Ok(())
    }
}

fn create_initialized(factory: &dyn InterpreterFactory) -> Result<Box<dyn Interpreter>, InitError> {
    let mut last_error = None;
    for attempt in 1..=INIT_ATTEMPTS {
        let result = factory.create().and_then(|mut interpreter| {
            interpreter.initialize()?;
            Ok(interpreter)
        });
        match result {
            Ok(interpreter) => {
                log::debug!("initialized {} interpreter (attempt {attempt})", interpreter.name());
                return Ok(interpreter);
            }
            Err(error) => {
                log::warn!("interpreter initialization failed (attempt {attempt}/{INIT_ATTEMPTS}): {error}");
                last_error = Some(error);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| InitError::new("no initialization attempt was made")))
}
