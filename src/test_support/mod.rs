//! Test utilities and mocks for packhand unit tests.
//!
//! [`ScriptedRunner`] stands in for [`SystemRunner`](crate::util::process::SystemRunner):
//! it answers commands from a list of expectations and records every call.
//! [`fixtures`] builds application trees on disk and a [`Harness`] that
//! wires a plugin to a config, a capture log, the scripted runner and a
//! cache.
//!
//! # Example
//!
//! ```rust,ignore
//! use packhand::test_support::{ScriptedRunner, MockProcessOutput};
//!
//! let runner = ScriptedRunner::new()
//!     .on("npm --version", 0, "6.14.8")
//!     .expect_prefix("npm ci", MockProcessOutput::success(""));
//! ```

pub mod fixtures;

use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};

use crate::util::process::{CommandRunner, ExecError, ExecParams, ExecResult};
use crate::util::shell::BuildLog;

pub use fixtures::*;

/// Mock process output for testing command execution.
#[derive(Debug, Clone)]
pub struct MockProcessOutput {
    /// Exit status code (0 = success).
    pub status: i32,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl MockProcessOutput {
    /// Create a successful output with the given stdout.
    pub fn success(stdout: impl Into<String>) -> Self {
        MockProcessOutput {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Create a failure output with the given stderr and status code.
    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        MockProcessOutput {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    fn to_result(&self) -> ExecResult {
        let mut combined = self.stdout.clone();
        combined.push_str(&self.stderr);
        ExecResult {
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            combined,
            exit_code: self.status,
        }
    }
}

impl Default for MockProcessOutput {
    fn default() -> Self {
        MockProcessOutput::success("")
    }
}

/// Pattern for matching commands in [`ScriptedRunner`].
#[derive(Debug, Clone)]
pub enum CommandPattern {
    /// Exact match on full command string.
    Exact(String),
    /// Match if command starts with prefix.
    StartsWith(String),
    /// Match if command contains substring.
    Contains(String),
    /// Match using a regex pattern.
    Regex(String),
    /// Match any command.
    Any,
}

impl CommandPattern {
    /// Check if this pattern matches the given command.
    pub fn matches(&self, cmd: &str) -> bool {
        match self {
            CommandPattern::Exact(s) => cmd == s,
            CommandPattern::StartsWith(s) => cmd.starts_with(s),
            CommandPattern::Contains(s) => cmd.contains(s),
            CommandPattern::Regex(pattern) => regex::Regex::new(pattern)
                .map(|re| re.is_match(cmd))
                .unwrap_or(false),
            CommandPattern::Any => true,
        }
    }
}

type Effect = Arc<dyn Fn(&ExecParams) + Send + Sync>;

/// What a matched command does.
#[derive(Clone)]
enum Response {
    Output(MockProcessOutput),
    SpawnFailure,
    Timeout(MockProcessOutput),
}

/// Expectation for a command execution.
#[derive(Clone)]
pub struct CommandExpectation {
    pattern: CommandPattern,
    response: Response,
    effect: Option<Effect>,
    times: Option<usize>,
    used: usize,
}

impl CommandExpectation {
    fn new(pattern: CommandPattern, response: Response) -> Self {
        CommandExpectation {
            pattern,
            response,
            effect: None,
            times: None,
            used: 0,
        }
    }

    fn available(&self) -> bool {
        match self.times {
            Some(n) => self.used < n,
            None => true,
        }
    }
}

impl fmt::Debug for CommandExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandExpectation")
            .field("pattern", &self.pattern)
            .field("times", &self.times)
            .field("used", &self.used)
            .finish()
    }
}

#[derive(Debug, Default)]
struct State {
    expectations: Vec<CommandExpectation>,
    calls: Vec<ExecParams>,
}

/// Scripted [`CommandRunner`] for tests.
///
/// Expectations are matched in insertion order against the displayed
/// command. An unmatched command fails to spawn.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    state: Mutex<State>,
}

impl ScriptedRunner {
    /// Create a runner with no expectations.
    pub fn new() -> Self {
        ScriptedRunner::default()
    }

    /// Answer commands starting with `prefix` with an exit code and stdout.
    pub fn on(self, prefix: &str, status: i32, stdout: &str) -> Self {
        self.expect_prefix(
            prefix,
            MockProcessOutput {
                status,
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        )
    }

    /// Add an expectation for an exact command match.
    pub fn expect(self, cmd: &str, output: MockProcessOutput) -> Self {
        self.push(CommandExpectation::new(
            CommandPattern::Exact(cmd.to_string()),
            Response::Output(output),
        ))
    }

    /// Add an expectation for a command starting with a prefix.
    pub fn expect_prefix(self, prefix: &str, output: MockProcessOutput) -> Self {
        self.push(CommandExpectation::new(
            CommandPattern::StartsWith(prefix.to_string()),
            Response::Output(output),
        ))
    }

    /// Answer `prefix` with `output` after running `effect`, e.g. to create
    /// files the real tool would write.
    pub fn expect_with_effect<F>(self, prefix: &str, output: MockProcessOutput, effect: F) -> Self
    where
        F: Fn(&ExecParams) + Send + Sync + 'static,
    {
        let mut exp = CommandExpectation::new(
            CommandPattern::StartsWith(prefix.to_string()),
            Response::Output(output),
        );
        exp.effect = Some(Arc::new(effect));
        self.push(exp)
    }

    /// Make commands starting with `prefix` fail to start.
    pub fn fail_spawn(self, prefix: &str) -> Self {
        self.push(CommandExpectation::new(
            CommandPattern::StartsWith(prefix.to_string()),
            Response::SpawnFailure,
        ))
    }

    /// Make commands starting with `prefix` time out with partial output.
    pub fn time_out(self, prefix: &str, partial: MockProcessOutput) -> Self {
        self.push(CommandExpectation::new(
            CommandPattern::StartsWith(prefix.to_string()),
            Response::Timeout(partial),
        ))
    }

    /// Answer every command that matches nothing else.
    pub fn default_output(self, output: MockProcessOutput) -> Self {
        self.push(CommandExpectation::new(CommandPattern::Any, Response::Output(output)))
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<ExecParams> {
        self.state
            .lock()
            .map(|s| s.calls.clone())
            .unwrap_or_default()
    }

    /// Displayed commands made so far.
    pub fn commands(&self) -> Vec<String> {
        self.calls().iter().map(ExecParams::display_command).collect()
    }

    fn push(self, exp: CommandExpectation) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.expectations.push(exp);
        }
        self
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, params: &ExecParams, log: &BuildLog) -> Result<ExecResult, ExecError> {
        if params.command().is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        let display = params.display_command();

        let matched = {
            let mut state = self.state.lock().map_err(|_| ExecError::Io {
                command: display.clone(),
                source: io::Error::new(io::ErrorKind::Other, "runner state poisoned"),
            })?;
            state.calls.push(params.clone());
            state
                .expectations
                .iter_mut()
                .find(|exp| exp.available() && exp.pattern.matches(&display))
                .map(|exp| {
                    exp.used += 1;
                    (exp.response.clone(), exp.effect.clone())
                })
        };

        let Some((response, effect)) = matched else {
            return Err(ExecError::Spawn {
                program: params.command()[0].clone(),
                source: io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("unexpected command: {}", display),
                ),
            });
        };

        if let Some(effect) = effect {
            effect(params);
        }

        match response {
            Response::Output(output) => {
                let result = output.to_result();
                if params.is_streamed() {
                    for line in result.combined.lines() {
                        log.line(line);
                    }
                }
                Ok(result)
            }
            Response::SpawnFailure => Err(ExecError::Spawn {
                program: params.command()[0].clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "not found"),
            }),
            Response::Timeout(partial) => Err(ExecError::Timeout {
                command: display,
                after: params.get_timeout().unwrap_or_default(),
                partial: ExecResult {
                    exit_code: -1,
                    ..partial.to_result()
                },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_runner_matches_in_order() {
        let runner = ScriptedRunner::new()
            .expect("npm --version", MockProcessOutput::success("6.14.8\n"))
            .on("npm", 1, "");
        let log = BuildLog::capture();

        let version = runner.run(&ExecParams::new(["npm", "--version"]), &log).unwrap();
        assert_eq!(version.stdout, "6.14.8\n");

        let other = runner.run(&ExecParams::new(["npm", "ci"]), &log).unwrap();
        assert_eq!(other.exit_code, 1);

        assert_eq!(runner.commands(), vec!["npm --version", "npm ci"]);
    }

    #[test]
    fn test_scripted_runner_unexpected_command() {
        let runner = ScriptedRunner::new();
        let log = BuildLog::capture();
        let err = runner.run(&ExecParams::new(["gcc"]), &log).unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn test_scripted_runner_timeout_and_effect() {
        let tmp = tempfile::TempDir::new().unwrap();
        let marker = tmp.path().join("package-lock.json");
        let written = marker.clone();
        let runner = ScriptedRunner::new()
            .expect_with_effect("npm install", MockProcessOutput::success(""), move |_| {
                std::fs::write(&written, "{}").unwrap();
            })
            .time_out("bundle", MockProcessOutput::success("compiling"));
        let log = BuildLog::capture();

        runner.run(&ExecParams::new(["npm", "install"]), &log).unwrap();
        assert!(marker.exists());

        let err = runner.run(&ExecParams::new(["bundle", "exec"]), &log).unwrap_err();
        assert_eq!(err.partial_output().unwrap().stdout, "compiling");
    }

    #[test]
    fn test_pattern_kinds() {
        assert!(CommandPattern::Contains("assets".into()).matches("bin/rails assets:precompile"));
        assert!(CommandPattern::Regex(r"^pip3? install".into()).matches("pip install -r x"));
        assert!(!CommandPattern::Exact("npm".into()).matches("npm ci"));
        assert!(CommandPattern::Any.matches(""));
    }
}
