use std::fmt;

use serde::{Deserialize, Serialize};

/// One frame of a script traceback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// 1-based line in the executed program text (scaffold included).
    pub line: usize,
    /// Enclosing function name, `<module>` for top-level code.
    pub function: String,
}

/// An exception that escaped a script, in the interpreter's own coordinates.
///
/// Line numbers here still count injected scaffold lines; pass the value through
/// [`crate::translate`] before showing it to a student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaisedException {
    /// Exception class name, e.g. `ValueError`.
    pub exc_type: String,
    /// Exception message, possibly empty.
    pub message: String,
    /// Traceback frames, outermost first.
    pub frames: Vec<StackFrame>,
}

impl RaisedException {
    /// The innermost frame, where the exception was raised.
    #[must_use]
    pub fn innermost(&self) -> Option<&StackFrame> {
        self.frames.last()
    }
}

impl fmt::Display for RaisedException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Traceback (most recent call last):\n")?;
        for frame in &self.frames {
            writeln!(f, "  line {}, in {}", frame.line, frame.function)?;
        }
        if self.message.is_empty() {
            write!(f, "{}", self.exc_type)
        } else {
            write!(f, "{}: {}", self.exc_type, self.message)
        }
    }
}
