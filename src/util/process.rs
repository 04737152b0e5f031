//! Subprocess execution.
//!
//! The executor runs a command and reports what happened. It never treats a
//! non-zero exit as a failure; callers classify results with
//! [`ExecResult::classify`] and an explicit [`FailurePolicy`].

use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::core::error::BuildError;
use crate::util::shell::BuildLog;

/// How often a running child is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Parameters for a single command invocation.
///
/// Environment overrides and the working directory apply to this invocation
/// only.
#[derive(Debug, Clone, Default)]
pub struct ExecParams {
    command: Vec<String>,
    env: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
    timeout: Option<Duration>,
    stream: bool,
}

impl ExecParams {
    /// Create parameters from a program followed by its arguments.
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ExecParams {
            command: command.into_iter().map(Into::into).collect(),
            ..ExecParams::default()
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.command.push(arg.into());
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    /// Bound the run time. The child is killed when it expires.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Write output lines to the build log as they arrive.
    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Get the program followed by its arguments.
    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Get the environment overrides.
    pub fn env_vars(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Get the working directory.
    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Get the timeout.
    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether output is streamed live.
    pub fn is_streamed(&self) -> bool {
        self.stream
    }

    /// Apply a timeout unless one is already set.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        if self.timeout.is_none() {
            self.timeout = timeout;
        }
        self
    }

    /// Display the command for messages.
    pub fn display_command(&self) -> String {
        self.command.join(" ")
    }

    fn program(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or("")
    }
}

/// Output of a command that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Both streams interleaved in arrival order.
    pub combined: String,
    /// Process exit code; -1 when the process was terminated by a signal.
    pub exit_code: i32,
}

impl ExecResult {
    /// Whether the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Classify this result under a caller-declared policy.
    pub fn classify(self, command: &str, policy: FailurePolicy) -> ExecOutcome {
        if self.success() {
            return ExecOutcome::Success(self);
        }

        match policy {
            FailurePolicy::Tolerate => {
                let diagnostic = format!(
                    "`{}` returned non-zero exit code {}. Ignoring.",
                    command, self.exit_code
                );
                ExecOutcome::ToleratedFailure {
                    result: self,
                    diagnostic,
                }
            }
            FailurePolicy::User => {
                let message = failure_message(command, &self);
                ExecOutcome::FatalFailure(BuildError::user(message))
            }
            FailurePolicy::Internal => {
                let message = failure_message(command, &self);
                ExecOutcome::FatalFailure(BuildError::internal(message))
            }
        }
    }
}

fn failure_message(command: &str, result: &ExecResult) -> String {
    let output = result.combined.trim();
    if output.is_empty() {
        format!("`{}` failed with exit code {}", command, result.exit_code)
    } else {
        format!(
            "`{}` failed with exit code {}\n{}",
            command, result.exit_code, output
        )
    }
}

/// What a non-zero exit code means for a particular command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// The application is at fault (e.g. its build script failed).
    User,
    /// The toolchain is at fault.
    Internal,
    /// A non-zero exit is expected and only warned about.
    Tolerate,
}

/// Classified outcome of a command.
#[derive(Debug)]
pub enum ExecOutcome {
    /// Exit code 0.
    Success(ExecResult),
    /// Non-zero exit that the caller declared tolerable.
    ToleratedFailure {
        result: ExecResult,
        diagnostic: String,
    },
    /// Non-zero exit that fails the build.
    FatalFailure(BuildError),
}

impl ExecOutcome {
    /// Convert into a result, logging tolerated failures as warnings.
    pub fn into_result(self, log: &BuildLog) -> Result<ExecResult, BuildError> {
        match self {
            ExecOutcome::Success(result) => Ok(result),
            ExecOutcome::ToleratedFailure { result, diagnostic } => {
                log.warnf(diagnostic);
                Ok(result)
            }
            ExecOutcome::FatalFailure(err) => Err(err),
        }
    }
}

/// Failure to run a command at all.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("empty command")]
    EmptyCommand,

    #[error("failed to start `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` timed out after {}s", .after.as_secs())]
    Timeout {
        command: String,
        after: Duration,
        /// Output captured before the process was killed.
        partial: ExecResult,
    },

    #[error("i/o error while running `{command}`")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },
}

impl ExecError {
    /// Output captured before a timeout, if any.
    pub fn partial_output(&self) -> Option<&ExecResult> {
        match self {
            ExecError::Timeout { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

impl From<ExecError> for BuildError {
    fn from(err: ExecError) -> Self {
        let message = match &err {
            ExecError::Timeout { partial, .. } if !partial.combined.trim().is_empty() => {
                format!("{}\n{}", err, partial.combined.trim())
            }
            _ => err.to_string(),
        };
        BuildError::internal(message).with_source(err)
    }
}

/// Runs external commands.
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion. A non-zero exit is not an error.
    fn run(&self, params: &ExecParams, log: &BuildLog) -> Result<ExecResult, ExecError>;
}

/// Run a command, failing with an internal error when it cannot be started
/// or does not finish.
pub fn run_or_fail(
    runner: &dyn CommandRunner,
    params: &ExecParams,
    log: &BuildLog,
) -> Result<ExecResult, BuildError> {
    runner.run(params, log).map_err(BuildError::from)
}

/// [`CommandRunner`] backed by real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    /// Create a new system runner.
    pub fn new() -> Self {
        SystemRunner
    }

    fn build_command(params: &ExecParams) -> Command {
        let mut cmd = Command::new(params.program());
        cmd.args(&params.command[1..]);
        cmd.envs(&params.env);
        if let Some(cwd) = &params.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group, so a timeout can take down grandchildren.
            cmd.process_group(0);
        }
        cmd
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, params: &ExecParams, log: &BuildLog) -> Result<ExecResult, ExecError> {
        if params.command.is_empty() {
            return Err(ExecError::EmptyCommand);
        }

        let shown = params.display_command();
        if log.is_verbose() {
            log.logf(format!("Running `{}`", shown));
        }
        tracing::debug!(
            command = %shown,
            cwd = ?params.cwd,
            resolved = ?find_executable(params.program()),
            "spawning"
        );

        let mut child = Self::build_command(params)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                program: params.program().to_string(),
                source,
            })?;

        // Readers are detached: a grandchild holding a pipe open must not
        // keep the caller waiting past the deadline.
        let (tx, rx) = mpsc::channel();
        if let Some(pipe) = child.stdout.take() {
            spawn_reader(pipe, tx.clone(), Chunk::Stdout);
        }
        if let Some(pipe) = child.stderr.take() {
            spawn_reader(pipe, tx.clone(), Chunk::Stderr);
        }
        drop(tx);

        let mut output = Output::new(params.stream, log);
        let start = Instant::now();
        let waited = wait_for(&mut child, params.timeout, &rx, &mut output).map_err(|source| {
            ExecError::Io {
                command: shown.clone(),
                source,
            }
        })?;

        let drain_until = match (&waited, params.timeout) {
            (Wait::Exited(_), Some(timeout)) => {
                Some(Instant::now() + timeout.saturating_sub(start.elapsed()).max(DRAIN_GRACE))
            }
            (Wait::Exited(_), None) => None,
            (Wait::TimedOut(_), _) => Some(Instant::now() + DRAIN_GRACE),
        };
        if !output.drain(&rx, drain_until) {
            tracing::debug!(command = %shown, "output pipes still open, readers detached");
        }
        let result = output.into_result();

        match waited {
            Wait::Exited(code) => {
                tracing::debug!(command = %shown, exit_code = code, "exited");
                Ok(ExecResult {
                    exit_code: code,
                    ..result
                })
            }
            Wait::TimedOut(after) => {
                tracing::debug!(command = %shown, "timed out");
                Err(ExecError::Timeout {
                    command: shown,
                    after,
                    partial: result,
                })
            }
        }
    }
}

/// How long to keep collecting output once the child is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

enum Wait {
    Exited(i32),
    TimedOut(Duration),
}

enum Chunk {
    Stdout(String),
    Stderr(String),
}

/// Output collected on the calling thread, in arrival order.
struct Output<'a> {
    stdout: String,
    stderr: String,
    combined: String,
    stream: bool,
    log: &'a BuildLog,
}

impl<'a> Output<'a> {
    fn new(stream: bool, log: &'a BuildLog) -> Self {
        Output {
            stdout: String::new(),
            stderr: String::new(),
            combined: String::new(),
            stream,
            log,
        }
    }

    fn push(&mut self, chunk: Chunk) {
        let line = match chunk {
            Chunk::Stdout(line) => {
                self.stdout.push_str(&line);
                line
            }
            Chunk::Stderr(line) => {
                self.stderr.push_str(&line);
                line
            }
        };
        self.combined.push_str(&line);
        if self.stream {
            self.log.line(line.trim_end_matches(['\r', '\n']));
        }
    }

    /// Collect until every reader is done or `until` passes. Returns whether
    /// all readers finished.
    fn drain(&mut self, rx: &Receiver<Chunk>, until: Option<Instant>) -> bool {
        loop {
            let next = match until {
                Some(until) => rx.recv_timeout(until.saturating_duration_since(Instant::now())),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match next {
                Ok(chunk) => self.push(chunk),
                Err(RecvTimeoutError::Disconnected) => return true,
                Err(RecvTimeoutError::Timeout) => return false,
            }
        }
    }

    fn into_result(self) -> ExecResult {
        ExecResult {
            stdout: self.stdout,
            stderr: self.stderr,
            combined: self.combined,
            exit_code: -1,
        }
    }
}

fn wait_for(
    child: &mut Child,
    timeout: Option<Duration>,
    rx: &Receiver<Chunk>,
    output: &mut Output<'_>,
) -> io::Result<Wait> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Wait::Exited(status.code().unwrap_or(-1)));
        }
        if let Some(timeout) = timeout {
            if start.elapsed() >= timeout {
                kill_tree(child);
                child.wait()?;
                return Ok(Wait::TimedOut(timeout));
            }
        }
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(chunk) => output.push(chunk),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => thread::sleep(POLL_INTERVAL),
        }
    }
}

/// Kill the child and everything in its process group.
#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    let group = format!("-{}", child.id());
    let killed = Command::new("kill")
        .args(["-9", "--", &group])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if !matches!(killed, Ok(status) if status.success()) {
        tracing::debug!(pid = child.id(), "could not kill process group");
    }
    // The child may exit between try_wait and kill.
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
}

fn spawn_reader<R>(pipe: R, tx: Sender<Chunk>, wrap: fn(String) -> Chunk)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    if tx.send(wrap(line)).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// Find an executable in PATH.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    fn sh(script: &str) -> ExecParams {
        ExecParams::new(["sh", "-c", script])
    }

    #[test]
    fn test_display_command() {
        let params = ExecParams::new(["composer", "install"]).arg("--no-dev");
        assert_eq!(params.display_command(), "composer install --no-dev");
    }

    #[test]
    fn test_default_timeout_does_not_override() {
        let params = ExecParams::new(["npm", "ci"])
            .timeout(Duration::from_secs(5))
            .with_default_timeout(Some(Duration::from_secs(60)));
        assert_eq!(params.get_timeout(), Some(Duration::from_secs(5)));

        let params = ExecParams::new(["npm", "ci"]).with_default_timeout(Some(Duration::from_secs(60)));
        assert_eq!(params.get_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_classify_success() {
        let result = ExecResult::default();
        assert!(matches!(
            result.classify("true", FailurePolicy::User),
            ExecOutcome::Success(_)
        ));
    }

    #[test]
    fn test_classify_non_zero_by_policy() {
        let result = ExecResult {
            combined: "Script gcp-build handling the event returned with error code 1".into(),
            exit_code: 1,
            ..ExecResult::default()
        };

        match result.clone().classify("composer run-script", FailurePolicy::User) {
            ExecOutcome::FatalFailure(err) => {
                assert_eq!(err.kind(), ErrorKind::User);
                assert!(err.message().contains("exit code 1"));
                assert!(err.message().contains("returned with error code 1"));
            }
            other => panic!("expected fatal failure, got {:?}", other),
        }

        match result.clone().classify("npm --version", FailurePolicy::Internal) {
            ExecOutcome::FatalFailure(err) => assert_eq!(err.kind(), ErrorKind::Internal),
            other => panic!("expected fatal failure, got {:?}", other),
        }

        match result.classify("bin/rails assets:precompile", FailurePolicy::Tolerate) {
            ExecOutcome::ToleratedFailure { result, diagnostic } => {
                assert_eq!(result.exit_code, 1);
                assert!(diagnostic.contains("non-zero exit code 1. Ignoring."));
            }
            other => panic!("expected tolerated failure, got {:?}", other),
        }
    }

    #[test]
    fn test_tolerated_failure_warns() {
        let log = BuildLog::capture();
        let outcome = ExecResult {
            exit_code: 3,
            ..ExecResult::default()
        }
        .classify("flaky", FailurePolicy::Tolerate);

        let result = outcome.into_result(&log).unwrap();
        assert_eq!(result.exit_code, 3);
        assert!(log.captured()[0].contains("non-zero exit code 3"));
    }

    #[test]
    fn test_empty_command() {
        let log = BuildLog::capture();
        let err = SystemRunner::new()
            .run(&ExecParams::default(), &log)
            .unwrap_err();
        assert!(matches!(err, ExecError::EmptyCommand));
    }

    #[test]
    fn test_missing_binary_is_internal_error() {
        let log = BuildLog::capture();
        let params = ExecParams::new(["packhand-definitely-not-a-real-binary", "--version"]);

        let err = SystemRunner::new().run(&params, &log).unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));

        let err = run_or_fail(&SystemRunner::new(), &params, &log).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.message().contains("packhand-definitely-not-a-real-binary"));
    }

    #[cfg(unix)]
    #[test]
    fn test_captures_streams_and_exit_code() {
        let log = BuildLog::capture();
        let result = SystemRunner::new()
            .run(&sh("echo out; echo err 1>&2; exit 3"), &log)
            .unwrap();

        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
        assert!(result.combined.contains("out\n"));
        assert!(result.combined.contains("err\n"));
        assert_eq!(result.exit_code, 3);
        assert!(!result.success());
    }

    #[cfg(unix)]
    #[test]
    fn test_env_and_cwd_are_scoped() {
        let tmp = tempfile::TempDir::new().unwrap();
        let log = BuildLog::capture();
        let runner = SystemRunner::new();

        let scoped = sh("printf '%s:%s' \"$PACKHAND_TEST_VAR\" \"$(basename \"$PWD\")\"")
            .env("PACKHAND_TEST_VAR", "set")
            .cwd(tmp.path());
        let first = runner.run(&scoped, &log).unwrap();
        let dir_name = tmp.path().file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(first.stdout, format!("set:{}", dir_name));

        let second = runner
            .run(&sh("printf '%s' \"$PACKHAND_TEST_VAR\""), &log)
            .unwrap();
        assert_eq!(second.stdout, "");
    }

    #[cfg(unix)]
    #[test]
    fn test_stream_writes_lines_to_log() {
        let log = BuildLog::capture();
        let result = SystemRunner::new()
            .run(&sh("echo one; echo two").stream(true), &log)
            .unwrap();

        assert!(result.success());
        let lines = log.captured();
        assert!(lines.contains(&"one".to_string()));
        assert!(lines.contains(&"two".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_and_keeps_partial_output() {
        let log = BuildLog::capture();
        let params = sh("echo started; exec sleep 5").timeout(Duration::from_millis(300));

        let start = Instant::now();
        let err = SystemRunner::new().run(&params, &log).unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(4));

        let partial = err.partial_output().expect("partial output");
        assert_eq!(partial.stdout, "started\n");

        let classified = BuildError::from(err);
        assert_eq!(classified.kind(), ErrorKind::Internal);
        assert!(classified.message().contains("timed out"));
        assert!(classified.message().contains("started"));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_with_running_grandchild() {
        let log = BuildLog::capture();
        let params = sh("echo started; sleep 5; echo done").timeout(Duration::from_millis(300));

        let start = Instant::now();
        let err = SystemRunner::new().run(&params, &log).unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(2));

        let partial = err.partial_output().expect("partial output");
        assert_eq!(partial.stdout, "started\n");
        assert!(!partial.combined.contains("done"));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_background_jobs() {
        let tmp = tempfile::TempDir::new().unwrap();
        let marker = tmp.path().join("marker");
        let log = BuildLog::capture();
        let params = sh(&format!("(sleep 1; touch '{}') & sleep 5", marker.display()))
            .timeout(Duration::from_millis(200));

        let start = Instant::now();
        SystemRunner::new().run(&params, &log).unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(2));

        thread::sleep(Duration::from_millis(1500));
        assert!(!marker.exists());
    }
}
