use serde::{Deserialize, Serialize};

/// A complete program plus the scaffold line counts needed to map errors back to
/// the student's own lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUnit {
    text: String,
    prepend_lines: usize,
    student_lines: usize,
    postpend_lines: usize,
}

impl SourceUnit {
    /// Wraps raw student text with no scaffold.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let student_lines = line_count(&text);
        Self {
            text,
            prepend_lines: 0,
            student_lines,
            postpend_lines: 0,
        }
    }

    /// Joins `prepend`, `student` and `postpend`, each starting on a fresh line.
    #[must_use]
    pub fn scaffolded(prepend: &str, student: &str, postpend: &str) -> Self {
        let mut text = String::with_capacity(prepend.len() + student.len() + postpend.len() + 2);
        for part in [prepend, student, postpend] {
            if part.is_empty() {
                continue;
            }
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(part);
        }
        Self {
            text,
            prepend_lines: line_count(prepend),
            student_lines: line_count(student),
            postpend_lines: line_count(postpend),
        }
    }

    /// The full program as executed.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn prepend_lines(&self) -> usize {
        self.prepend_lines
    }

    #[must_use]
    pub fn student_lines(&self) -> usize {
        self.student_lines
    }

    #[must_use]
    pub fn postpend_lines(&self) -> usize {
        self.postpend_lines
    }

    /// Maps an executed line to the student's numbering.
    ///
    /// Lines inside the prepend scaffold clamp to 1. Lines inside the postpend scaffold
    /// have no student line; without a postpend, lines past the end clamp to the last line.
    #[must_use]
    pub fn student_line(&self, executed: usize) -> Option<usize> {
        let last = self.prepend_lines + self.student_lines;
        if executed > last {
            if self.postpend_lines > 0 {
                return None;
            }
            return Some(self.student_lines.max(1));
        }
        Some(executed.saturating_sub(self.prepend_lines).max(1))
    }

    /// Whether `executed` falls on one of the student's own lines.
    #[must_use]
    pub fn is_student_line(&self, executed: usize) -> bool {
        executed > self.prepend_lines && executed <= self.prepend_lines + self.student_lines
    }
}

fn line_count(text: &str) -> usize {
    text.lines().count()
}
