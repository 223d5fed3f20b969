use std::fmt;

use strum::{Display, EnumString, IntoStaticStr};

use crate::{exception::{RaisedException, StackFrame}, resource::ResourceError};

/// Exception types the runtime can raise.
///
/// Uses strum derives for `Display`, `FromStr` and `Into<&'static str>`; the string form
/// matches the Python class name exactly (e.g. `ValueError` -> "ValueError").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub(crate) enum ExcType {
    BaseException,
    Exception,
    SystemExit,
    KeyboardInterrupt,

    ArithmeticError,
    ZeroDivisionError,
    OverflowError,

    LookupError,
    IndexError,
    KeyError,

    RuntimeError,
    RecursionError,
    NotImplementedError,

    AttributeError,
    NameError,
    UnboundLocalError,
    TypeError,
    ValueError,
    AssertionError,
    EOFError,
    ImportError,
    StopIteration,
    SyntaxError,
    IndentationError,
}

impl ExcType {
    /// Direct parent in the exception hierarchy, `None` for `BaseException`.
    fn parent(self) -> Option<Self> {
        match self {
            Self::BaseException => None,
            Self::Exception | Self::SystemExit | Self::KeyboardInterrupt => Some(Self::BaseException),
            Self::ZeroDivisionError | Self::OverflowError => Some(Self::ArithmeticError),
            Self::IndexError | Self::KeyError => Some(Self::LookupError),
            Self::RecursionError | Self::NotImplementedError => Some(Self::RuntimeError),
            Self::UnboundLocalError => Some(Self::NameError),
            Self::IndentationError => Some(Self::SyntaxError),
            _ => Some(Self::Exception),
        }
    }

    /// Returns true if an `except other:` clause catches an exception of this type.
    pub fn is_subclass_of(self, other: Self) -> bool {
        let mut current = Some(self);
        while let Some(exc_type) = current {
            if exc_type == other {
                return true;
            }
            current = exc_type.parent();
        }
        false
    }
}

/// An exception raised by script code (or by the runtime on its behalf).
///
/// `frames` is built innermost-first while the error unwinds: the statement executor
/// records its line the first time the error passes through it, and each call boundary
/// re-arms `located` so the caller's statement records the call site too.
#[derive(Debug, Clone)]
pub(crate) struct ScriptError {
    pub exc_type: ExcType,
    pub message: String,
    frames: Vec<StackFrame>,
    located: bool,
}

impl ScriptError {
    pub fn new(exc_type: ExcType, message: impl Into<String>) -> Self {
        Self {
            exc_type,
            message: message.into(),
            frames: Vec::new(),
            located: false,
        }
    }

    /// Creates an error that already knows its line (used when lowering the syntax tree).
    pub fn at_line(exc_type: ExcType, message: impl Into<String>, line: usize) -> Self {
        let mut error = Self::new(exc_type, message);
        error.locate(line, "<module>");
        error
    }

    /// Records the innermost unrecorded frame.
    pub fn locate(&mut self, line: usize, function: &str) {
        if !self.located {
            self.frames.push(StackFrame {
                line,
                function: function.to_owned(),
            });
            self.located = true;
        }
    }

    /// Marks a call boundary so the calling statement records its own frame.
    pub fn leave_frame(&mut self) {
        self.located = false;
    }

    pub fn into_raised(mut self) -> RaisedException {
        self.frames.reverse();
        RaisedException {
            exc_type: self.exc_type.to_string(),
            message: self.message,
            frames: self.frames,
        }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.exc_type)
        } else {
            write!(f, "{}: {}", self.exc_type, self.message)
        }
    }
}

/// Control signals that unwind through script code without being catchable by it.
#[derive(Debug, Clone)]
pub(crate) enum Signal {
    /// `input()` was called and the host had no value to give.
    InputExhausted { prompt: String, line: Option<usize> },
    /// A time or operation budget ran out.
    Resource(ResourceError),
}

/// Everything that can unwind out of a statement.
#[derive(Debug, Clone)]
pub(crate) enum Unwind {
    Error(ScriptError),
    Signal(Signal),
}

impl From<ScriptError> for Unwind {
    fn from(error: ScriptError) -> Self {
        Self::Error(error)
    }
}

impl From<Signal> for Unwind {
    fn from(signal: Signal) -> Self {
        Self::Signal(signal)
    }
}

impl From<ResourceError> for Unwind {
    fn from(error: ResourceError) -> Self {
        // RecursionError stays catchable, matching CPython; time and operation budgets
        // must never be swallowed by a bare `except:`.
        match error {
            ResourceError::Recursion { .. } => Self::Error(ScriptError::new(
                ExcType::RecursionError,
                "maximum recursion depth exceeded",
            )),
            other => Self::Signal(Signal::Resource(other)),
        }
    }
}

pub(crate) type RunResult<T> = Result<T, Unwind>;

/// Shorthand for building an `Err` with a fresh `ScriptError`.
pub(crate) fn raise<T>(exc_type: ExcType, message: impl Into<String>) -> RunResult<T> {
    Err(Unwind::Error(ScriptError::new(exc_type, message)))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn hierarchy_matches_python() {
        assert!(ExcType::ZeroDivisionError.is_subclass_of(ExcType::ArithmeticError));
        assert!(ExcType::KeyError.is_subclass_of(ExcType::Exception));
        assert!(!ExcType::SystemExit.is_subclass_of(ExcType::Exception));
        assert!(!ExcType::ValueError.is_subclass_of(ExcType::LookupError));
    }

    #[test]
    fn names_round_trip_through_strum() {
        assert_eq!(ExcType::from_str("EOFError").unwrap(), ExcType::EOFError);
        assert_eq!(ExcType::IndexError.to_string(), "IndexError");
    }

    #[test]
    fn frames_are_reported_outermost_first() {
        let mut error = ScriptError::new(ExcType::ValueError, "bad");
        error.locate(7, "helper");
        error.locate(99, "ignored");
        error.leave_frame();
        error.locate(2, "<module>");
        let raised = error.into_raised();
        assert_eq!(raised.frames[0].line, 2);
        assert_eq!(raised.frames[1].function, "helper");
    }
}
