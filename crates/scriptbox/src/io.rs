/// Host side of a script's standard streams.
///
/// Implement this trait to capture output from and feed input to sandboxed script code.
/// Implementations must be `Send`: the interpreter evaluates on a dedicated thread with
/// a larger stack.
pub trait HostIo: Send {
    /// Called with the full text of each `print()` call, separators and terminator included.
    fn write_stdout(&mut self, text: &str);

    /// Called for diagnostics the runtime writes on the script's behalf.
    fn write_stderr(&mut self, text: &str);

    /// Called by `input(prompt)`.
    ///
    /// Returns `None` when no value is available; the interpreter then unwinds with an
    /// uncatchable input-exhausted signal carrying `prompt`. Implementations are
    /// responsible for writing the prompt (and any echo) only when they return a value.
    fn read_line(&mut self, prompt: &str) -> Option<String>;
}

/// Output captured by a [`ReplayIo`] during one attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    /// Number of queued values the attempt consumed.
    pub consumed: usize,
}

/// `HostIo` that collects output into strings and answers `input()` from a fixed queue.
///
/// Each answered call writes its prompt to stdout, followed by the value and a newline
/// when `echo` is on. The prompt of the first unanswered call is not written.
#[derive(Debug)]
pub struct ReplayIo<'a> {
    inputs: &'a [String],
    cursor: usize,
    echo: bool,
    stdout: String,
    stderr: String,
}

impl<'a> ReplayIo<'a> {
    /// Starts a replay with the cursor at the first queued value.
    #[must_use]
    pub fn new(inputs: &'a [String], echo: bool) -> Self {
        Self {
            inputs,
            cursor: 0,
            echo,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// A replay with no queued input; every `input()` call is unanswered.
    #[must_use]
    pub fn silent() -> Self {
        Self::new(&[], false)
    }

    /// Returns the stdout collected so far.
    #[must_use]
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    /// Number of queued values consumed so far.
    #[must_use]
    pub fn consumed(&self) -> usize {
        self.cursor
    }

    /// Consumes the writer and returns everything it captured.
    #[must_use]
    pub fn into_output(self) -> CapturedOutput {
        CapturedOutput {
            stdout: self.stdout,
            stderr: self.stderr,
            consumed: self.cursor,
        }
    }
}

impl HostIo for ReplayIo<'_> {
    fn write_stdout(&mut self, text: &str) {
        self.stdout.push_str(text);
    }

    fn write_stderr(&mut self, text: &str) {
        self.stderr.push_str(text);
    }

    fn read_line(&mut self, prompt: &str) -> Option<String> {
        let value = self.inputs.get(self.cursor)?.clone();
        self.cursor += 1;
        self.stdout.push_str(prompt);
        if self.echo {
            self.stdout.push_str(&value);
            self.stdout.push('\n');
        }
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answered_prompts_are_written_pending_prompt_is_not() {
        let inputs = vec!["Ada".to_owned()];
        let mut io = ReplayIo::new(&inputs, false);
        assert_eq!(io.read_line("Name: ").as_deref(), Some("Ada"));
        assert_eq!(io.read_line("Age: "), None);
        let output = io.into_output();
        assert_eq!(output.stdout, "Name: ");
        assert_eq!(output.consumed, 1);
    }

    #[test]
    fn echo_writes_the_value_after_the_prompt() {
        let inputs = vec!["3".to_owned()];
        let mut io = ReplayIo::new(&inputs, true);
        io.read_line("n? ");
        io.write_stdout("9\n");
        assert_eq!(io.stdout(), "n? 3\n9\n");
    }
}
