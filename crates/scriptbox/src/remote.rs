//! Remote execution fallback over the Judge0 submission API.
//!
//! Used only when the local interpreter cannot be brought up. A submission runs
//! with batch semantics: every queued input is joined into one stdin buffer and a
//! missing value is an `EOFError`, never a suspension.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use url::Url;

use crate::{
    config::RemoteConfig,
    coordinator::{Backend, ExecutionCoordinator, ExecutionResult, ExecutionStatus},
    error::EngineError,
    source::SourceUnit,
    translate::{ErrorInfo, translate_traceback},
};

/// Longest single sleep between cancellation checks while waiting to poll.
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(25);

/// Errors from the remote backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The request did not complete.
    Transport(String),
    /// The service answered with something this client does not understand.
    Protocol(String),
    /// Polling was cancelled through a [`CancelToken`].
    Cancelled,
    /// The submission did not finish within `max_wait_ms`.
    TimedOut,
    /// The service reported an internal failure for the submission.
    Failed { status: String },
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(message) => write!(f, "transport error: {message}"),
            Self::Protocol(message) => write!(f, "protocol error: {message}"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::TimedOut => f.write_str("timed out waiting for the remote result"),
            Self::Failed { status } => write!(f, "remote failure: {status}"),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Shared cancellation flag for remote polling.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clears the flag so the token can guard the next poll.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Body of `POST /submissions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub source_code: String,
    pub language_id: u32,
    pub stdin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_time_limit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wall_time_limit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<u64>,
}

impl Submission {
    /// Builds a submission for `unit`, with `stdin` and the limits from `config`.
    #[must_use]
    pub fn new(unit: &SourceUnit, stdin: String, config: &RemoteConfig, wall_time: Duration) -> Self {
        Self {
            source_code: unit.text().to_owned(),
            language_id: config.language_id,
            stdin,
            cpu_time_limit: config.cpu_time_limit_s,
            wall_time_limit: Some(wall_time.as_secs_f64()),
            memory_limit: config.memory_limit_kb,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionStatus {
    pub id: u32,
    pub description: String,
}

/// Body of `GET /submissions/{token}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub status: SubmissionStatus,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub compile_output: Option<String>,
    /// CPU seconds as a decimal string, e.g. `"0.012"`.
    #[serde(default)]
    pub time: Option<String>,
    /// Kilobytes.
    #[serde(default)]
    pub memory: Option<u64>,
}

impl SubmissionResult {
    /// Status ids 1 (in queue) and 2 (processing).
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self.status.id, 1 | 2)
    }
}

/// The submit/poll protocol a remote backend speaks.
pub trait RemoteExecutor: Send {
    /// Queues a submission and returns its token.
    fn submit(&self, submission: &Submission) -> Result<String, RemoteError>;

    /// Fetches the current state of a submission.
    fn poll(&self, token: &str) -> Result<SubmissionResult, RemoteError>;
}

/// HTTP client for a Judge0 CE compatible service.
#[derive(Debug, Clone)]
pub struct Judge0Client {
    client: Client,
    base: Url,
    auth_token: Option<String>,
}

impl Judge0Client {
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let base = Url::parse(&config.base_url)
            .map_err(|error| RemoteError::Protocol(format!("invalid base url {:?}: {error}", config.base_url)))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("scriptbox/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(map_http_err)?;
        Ok(Self {
            client,
            base,
            auth_token: config.auth_token.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| RemoteError::Protocol(format!("base url {} cannot have a path", self.base)))?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut().append_pair("base64_encoded", "false");
        Ok(url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.header("X-Auth-Token", token),
            None => builder,
        }
    }
}

impl RemoteExecutor for Judge0Client {
    fn submit(&self, submission: &Submission) -> Result<String, RemoteError> {
        let mut url = self.endpoint(&["submissions"])?;
        url.query_pairs_mut().append_pair("wait", "false");
        let response = self
            .authorized(self.client.post(url))
            .json(submission)
            .send()
            .map_err(map_http_err)?;
        let body: TokenResponse = decode(response)?;
        log::debug!("remote submission queued as {}", body.token);
        Ok(body.token)
    }

    fn poll(&self, token: &str) -> Result<SubmissionResult, RemoteError> {
        let url = self.endpoint(&["submissions", token])?;
        let response = self.authorized(self.client.get(url)).send().map_err(map_http_err)?;
        decode(response)
    }
}

fn map_http_err(error: reqwest::Error) -> RemoteError {
    if error.is_decode() {
        RemoteError::Protocol(error.to_string())
    } else {
        RemoteError::Transport(error.to_string())
    }
}

fn decode<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(RemoteError::Transport(format!("HTTP {status}: {}", body.trim())));
    }
    response.json().map_err(map_http_err)
}

/// Submits and polls until the submission leaves the pending states.
pub fn run_to_completion(
    executor: &dyn RemoteExecutor,
    submission: &Submission,
    config: &RemoteConfig,
    cancel: &CancelToken,
) -> Result<SubmissionResult, RemoteError> {
    let started = Instant::now();
    let max_wait = Duration::from_millis(config.max_wait_ms);
    let interval = Duration::from_millis(config.poll_interval_ms);
    if cancel.is_cancelled() {
        return Err(RemoteError::Cancelled);
    }
    let token = executor.submit(submission)?;
    loop {
        if cancel.is_cancelled() {
            log::info!("remote poll for {token} cancelled");
            return Err(RemoteError::Cancelled);
        }
        let result = executor.poll(&token)?;
        if !result.is_pending() {
            log::debug!("remote submission {token} finished: {}", result.status.description);
            return Ok(result);
        }
        if started.elapsed() >= max_wait {
            log::warn!("remote submission {token} still pending after {max_wait:?}");
            return Err(RemoteError::TimedOut);
        }
        sleep_unless_cancelled(interval, cancel);
    }
}

fn sleep_unless_cancelled(total: Duration, cancel: &CancelToken) {
    let deadline = Instant::now() + total;
    loop {
        let now = Instant::now();
        if now >= deadline || cancel.is_cancelled() {
            return;
        }
        thread::sleep((deadline - now).min(CANCEL_CHECK_INTERVAL));
    }
}

/// A remote backend borrowed for the length of one engine call.
pub struct RemoteFallback<'a> {
    pub executor: &'a dyn RemoteExecutor,
    pub config: RemoteConfig,
    pub cancel: &'a CancelToken,
}

impl RemoteFallback<'_> {
    /// Runs `unit` remotely against `stdin`, within the coordinator's time limit.
    ///
    /// A submission still pending after `max_wait_ms` is a
    /// [`ExecutionStatus::Timeout`] result, not an error.
    pub fn run(
        &self,
        coordinator: &ExecutionCoordinator,
        unit: &SourceUnit,
        stdin: String,
    ) -> Result<ExecutionResult, EngineError> {
        let wall_time = coordinator.limits().max_duration.unwrap_or_default();
        let submission = Submission::new(unit, stdin, &self.config, wall_time);
        let started = Instant::now();
        let result = match run_to_completion(self.executor, &submission, &self.config, self.cancel) {
            Ok(finished) => to_execution_result(finished, unit, coordinator.script_name(), started.elapsed())?,
            Err(RemoteError::TimedOut) => timed_out_result(started.elapsed()),
            Err(error) => return Err(error.into()),
        };
        log::info!("remote execution finished: {:?}", result.status);
        Ok(result)
    }
}

/// The result reported when a submission is still pending after `max_wait_ms`.
#[must_use]
pub fn timed_out_result(waited: Duration) -> ExecutionResult {
    ExecutionResult {
        status: ExecutionStatus::Timeout,
        stdout: String::new(),
        stderr: format!("{}\n", RemoteError::TimedOut),
        pending_prompt: None,
        error: None,
        echo: None,
        duration: waited,
        backend: Backend::Remote,
        inputs_consumed: 0,
    }
}

/// Converts a finished submission into an [`ExecutionResult`].
///
/// Status 3 (accepted) and 4 (wrong answer; no expected output is sent, so this only
/// appears with services that compare anyway) are successes. 5 is a timeout, 6 a
/// compile error, 7 to 12 runtime errors. 13 and 14 are failures of the service.
pub fn to_execution_result(
    result: SubmissionResult,
    unit: &SourceUnit,
    script_name: &str,
    duration: Duration,
) -> Result<ExecutionResult, RemoteError> {
    let stdout = result.stdout.unwrap_or_default();
    let mut stderr = result.stderr.unwrap_or_default();
    let (status, error) = match result.status.id {
        3 | 4 => (ExecutionStatus::Success, None),
        5 => (ExecutionStatus::Timeout, None),
        6 => {
            let output = result.compile_output.unwrap_or_default();
            let error = translate_traceback(&output, unit, script_name)
                .unwrap_or_else(|| ErrorInfo::new("SyntaxError", output.trim(), None));
            stderr.push_str(&output);
            (ExecutionStatus::RuntimeError, Some(error))
        }
        7..=12 => {
            let error = translate_traceback(&stderr, unit, script_name)
                .unwrap_or_else(|| ErrorInfo::new("RuntimeError", result.status.description.clone(), None));
            stderr = error.traceback(script_name);
            (ExecutionStatus::RuntimeError, Some(error))
        }
        _ => {
            return Err(RemoteError::Failed {
                status: result.status.description,
            });
        }
    };
    Ok(ExecutionResult {
        status,
        stdout,
        stderr,
        pending_prompt: None,
        error,
        echo: None,
        duration,
        backend: Backend::Remote,
        inputs_consumed: 0,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct ScriptedRemote {
        polls: Mutex<Vec<SubmissionResult>>,
    }

    fn status(id: u32, description: &str) -> SubmissionResult {
        SubmissionResult {
            status: SubmissionStatus {
                id,
                description: description.to_owned(),
            },
            stdout: Some("out\n".to_owned()),
            stderr: None,
            compile_output: None,
            time: None,
            memory: None,
        }
    }

    impl RemoteExecutor for ScriptedRemote {
        fn submit(&self, _submission: &Submission) -> Result<String, RemoteError> {
            Ok("tok".to_owned())
        }

        fn poll(&self, _token: &str) -> Result<SubmissionResult, RemoteError> {
            let mut polls = self.polls.lock().unwrap();
            if polls.len() > 1 {
                Ok(polls.remove(0))
            } else {
                Ok(polls[0].clone())
            }
        }
    }

    fn fast_config() -> RemoteConfig {
        RemoteConfig::new("http://localhost:2358")
            .poll_interval(Duration::from_millis(1))
            .max_wait(Duration::from_millis(200))
    }

    fn submission() -> Submission {
        Submission::new(&SourceUnit::new("print(1)"), String::new(), &fast_config(), Duration::from_secs(1))
    }

    #[test]
    fn polls_until_terminal_status() {
        let remote = ScriptedRemote {
            polls: Mutex::new(vec![status(1, "In Queue"), status(2, "Processing"), status(3, "Accepted")]),
        };
        let result = run_to_completion(&remote, &submission(), &fast_config(), &CancelToken::new()).unwrap();
        assert_eq!(result.status.id, 3);
    }

    #[test]
    fn pending_forever_times_out() {
        let remote = ScriptedRemote {
            polls: Mutex::new(vec![status(1, "In Queue")]),
        };
        let error = run_to_completion(&remote, &submission(), &fast_config(), &CancelToken::new()).unwrap_err();
        assert_eq!(error, RemoteError::TimedOut);
    }

    #[test]
    fn timed_out_result_is_a_remote_timeout() {
        let result = timed_out_result(Duration::from_millis(200));
        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert_eq!(result.backend, Backend::Remote);
        assert_eq!(result.stderr, "timed out waiting for the remote result\n");
        assert!(result.error.is_none());
    }

    #[test]
    fn cancelled_token_stops_polling() {
        let remote = ScriptedRemote {
            polls: Mutex::new(vec![status(2, "Processing")]),
        };
        let cancel = CancelToken::new();
        cancel.cancel();
        let error = run_to_completion(&remote, &submission(), &fast_config(), &cancel).unwrap_err();
        assert_eq!(error, RemoteError::Cancelled);
    }

    #[test]
    fn runtime_error_status_translates_the_traceback() {
        let unit = SourceUnit::scaffolded("x = 0", "print(1 / x)\n", "");
        let mut result = status(11, "Runtime Error (NZEC)");
        result.stderr = Some(
            "Traceback (most recent call last):\n  File \"script.py\", line 2, in <module>\nZeroDivisionError: division by zero\n"
                .to_owned(),
        );
        let converted = to_execution_result(result, &unit, "script.py", Duration::ZERO).unwrap();
        assert_eq!(converted.status, ExecutionStatus::RuntimeError);
        assert_eq!(converted.backend, Backend::Remote);
        assert_eq!(
            converted.error,
            Some(ErrorInfo::new("ZeroDivisionError", "division by zero", Some(1)))
        );
    }

    #[test]
    fn internal_error_status_is_a_remote_failure() {
        let unit = SourceUnit::new("print(1)");
        let error = to_execution_result(status(13, "Internal Error"), &unit, "main.py", Duration::ZERO).unwrap_err();
        assert_eq!(
            error,
            RemoteError::Failed {
                status: "Internal Error".to_owned()
            }
        );
    }

    #[test]
    fn endpoints_keep_the_base_path() {
        let client = Judge0Client::new(&RemoteConfig::new("https://judge.example.com/api/")).unwrap();
        let url = client.endpoint(&["submissions", "abc"]).unwrap();
        assert_eq!(url.as_str(), "https://judge.example.com/api/submissions/abc?base64_encoded=false");
    }
}
