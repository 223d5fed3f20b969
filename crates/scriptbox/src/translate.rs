//! Maps interpreter-reported errors back onto the student's source.
//!
//! Two inputs are supported: a structured [`RaisedException`] from the local
//! interpreter, and CPython-style traceback text from a remote backend. Both reduce
//! to an [`ErrorInfo`] carrying only the final exception type, its message, and the
//! student-relative line. Interpreter-internal frames never survive translation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{exception::RaisedException, source::SourceUnit};

/// A student-facing error: final exception type and message, plus the line in the
/// student's own code when it has one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub exc_type: String,
    pub message: String,
    pub line: Option<usize>,
}

impl ErrorInfo {
    pub fn new(exc_type: impl Into<String>, message: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            exc_type: exc_type.into(),
            message: message.into(),
            line,
        }
    }

    /// The `Type: message` summary line.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.message.is_empty() {
            self.exc_type.clone()
        } else {
            format!("{}: {}", self.exc_type, self.message)
        }
    }

    /// Renders a short traceback naming only the student's file.
    #[must_use]
    pub fn traceback(&self, script_name: &str) -> String {
        match self.line {
            Some(line) => format!(
                "Traceback (most recent call last):\n  File \"{script_name}\", line {line}\n{}\n",
                self.summary()
            ),
            None => format!("{}\n", self.summary()),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {line}: {}", self.summary()),
            None => f.write_str(&self.summary()),
        }
    }
}

/// Translates a structured exception.
///
/// The reported line is the innermost frame that lies in the student's code; when
/// no frame does, the innermost frame is mapped (clamping prepend lines to 1 and
/// dropping postpend lines).
#[must_use]
pub fn translate(raised: &RaisedException, unit: &SourceUnit) -> ErrorInfo {
    let line = raised
        .frames
        .iter()
        .rev()
        .find(|frame| unit.is_student_line(frame.line))
        .or_else(|| raised.innermost())
        .and_then(|frame| unit.student_line(frame.line));
    ErrorInfo::new(raised.exc_type.clone(), raised.message.clone(), line)
}

/// Translates an interpreter line with no traceback attached, e.g. the line of an
/// unanswered `input()` call.
#[must_use]
pub fn translate_line(line: Option<usize>, unit: &SourceUnit) -> Option<usize> {
    line.and_then(|line| unit.student_line(line))
}

/// Translates CPython traceback text.
///
/// Uses the last `File "<script_name>", line N` entry (falling back to the last
/// `File` entry of any name) and the final `Type: message` line. Returns `None`
/// when the text has no exception line.
#[must_use]
pub fn translate_traceback(text: &str, unit: &SourceUnit, script_name: &str) -> Option<ErrorInfo> {
    let mut own_line = None;
    let mut any_line = None;
    let mut summary = None;
    for raw in text.lines() {
        let trimmed = raw.trim_start();
        if let Some((file, line)) = parse_file_entry(trimmed) {
            any_line = Some(line);
            if file == script_name || file.ends_with(&format!("/{script_name}")) {
                own_line = Some(line);
            }
        } else if !raw.starts_with(char::is_whitespace) && !trimmed.is_empty() && !trimmed.starts_with("Traceback") {
            summary = Some(trimmed);
        }
    }
    let summary = summary?;
    let (exc_type, message) = match summary.split_once(':') {
        Some((exc_type, message)) if is_exception_name(exc_type) => (exc_type, message.trim_start()),
        _ if is_exception_name(summary) => (summary, ""),
        _ => return None,
    };
    let line = own_line.or(any_line).and_then(|line| unit.student_line(line));
    Some(ErrorInfo::new(exc_type, message, line))
}

/// Parses `File "name", line N[, in fn]`.
fn parse_file_entry(line: &str) -> Option<(&str, usize)> {
    let rest = line.strip_prefix("File \"")?;
    let (file, rest) = rest.split_once('"')?;
    let rest = rest.strip_prefix(", line ")?;
    let digits: &str = rest.split(|c: char| !c.is_ascii_digit()).next()?;
    Some((file, digits.parse().ok()?))
}

/// `ValueError`, `json.decoder.JSONDecodeError` and similar dotted class names.
fn is_exception_name(text: &str) -> bool {
    !text.is_empty()
        && text
            .split('.')
            .all(|part| part.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_')
                && part.chars().all(|c| c.is_alphanumeric() || c == '_'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::StackFrame;

    fn frame(line: usize, function: &str) -> StackFrame {
        StackFrame {
            line,
            function: function.to_owned(),
        }
    }

    #[test]
    fn structured_errors_drop_scaffold_lines() {
        let unit = SourceUnit::scaffolded("a = 1\nb = 2\nc = 3", "x = 1\nraise ValueError('no')\n", "");
        let raised = RaisedException {
            exc_type: "ValueError".to_owned(),
            message: "no".to_owned(),
            frames: vec![frame(5, "<module>")],
        };
        assert_eq!(translate(&raised, &unit), ErrorInfo::new("ValueError", "no", Some(2)));
    }

    #[test]
    fn innermost_student_frame_wins_over_postpend_caller() {
        let unit = SourceUnit::scaffolded("", "def f():\n    return 1 / 0\n", "f()\n");
        let raised = RaisedException {
            exc_type: "ZeroDivisionError".to_owned(),
            message: "division by zero".to_owned(),
            frames: vec![frame(3, "<module>"), frame(2, "f")],
        };
        assert_eq!(translate(&raised, &unit).line, Some(2));

        let only_postpend = RaisedException {
            frames: vec![frame(3, "<module>")],
            ..raised
        };
        assert_eq!(translate(&only_postpend, &unit).line, None);
    }

    #[test]
    fn traceback_text_uses_last_user_frame_and_final_line() {
        let unit = SourceUnit::scaffolded("import sys", "n = int(input())\nprint(10 / n)\n", "");
        let text = "Traceback (most recent call last):\n  File \"/box/main.py\", line 3, in <module>\n    print(10 / n)\n          ~~~^~~\nZeroDivisionError: division by zero\n";
        assert_eq!(
            translate_traceback(text, &unit, "main.py"),
            Some(ErrorInfo::new("ZeroDivisionError", "division by zero", Some(2)))
        );
    }

    #[test]
    fn traceback_without_exception_line_is_rejected() {
        let unit = SourceUnit::new("print(1)");
        assert_eq!(translate_traceback("Segmentation fault (core dumped)", &unit, "main.py"), None);
        assert_eq!(
            translate_traceback("KeyboardInterrupt\n", &unit, "main.py"),
            Some(ErrorInfo::new("KeyboardInterrupt", "", None))
        );
    }

    #[test]
    fn rendered_traceback_names_only_the_student_file() {
        let error = ErrorInfo::new("NameError", "name 'x' is not defined", Some(4));
        assert_eq!(
            error.traceback("main.py"),
            "Traceback (most recent call last):\n  File \"main.py\", line 4\nNameError: name 'x' is not defined\n"
        );
    }
}
