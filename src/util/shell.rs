//! Build log: the user-visible output of a build.
//!
//! Plugins write through [`BuildLog`] rather than printing directly. It
//! provides:
//! - Status messages with consistent formatting
//! - Live tool output when a command is streamed
//! - A spinner (via indicatif) while a buffered command runs
//! - A capture mode so tests can assert on what a user would see
//!
//! Output is best-effort: nothing here returns an error or affects control
//! flow.

use std::fmt::Display;
use std::io::{self, IsTerminal, Write};
use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Output verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// --quiet: errors and warnings only
    Quiet,
    /// Default: status messages and spinners
    #[default]
    Normal,
    /// --verbose: also echo every command before it runs
    Verbose,
}

/// Color output mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorChoice {
    /// Detect TTY and use colors if available.
    #[default]
    Auto,
    /// Always use ANSI colors.
    Always,
    /// Never use ANSI colors.
    Never,
}

impl std::str::FromStr for ColorChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(ColorChoice::Auto),
            "always" => Ok(ColorChoice::Always),
            "never" => Ok(ColorChoice::Never),
            _ => Err(format!(
                "invalid color choice '{}'; expected 'auto', 'always', or 'never'",
                s
            )),
        }
    }
}

/// Status types for output messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    // Success (green)
    Finished,
    Cached,

    // In progress (cyan)
    Detecting,
    Building,
    Running,

    // Warning (yellow)
    Skipped,
    Warning,
}

impl Status {
    fn as_str(&self) -> &'static str {
        match self {
            Status::Finished => "Finished",
            Status::Cached => "Cached",
            Status::Detecting => "Detecting",
            Status::Building => "Building",
            Status::Running => "Running",
            Status::Skipped => "Skipped",
            Status::Warning => "Warning",
        }
    }

    fn color_code(&self) -> &'static str {
        match self {
            Status::Finished | Status::Cached => "\x1b[1;32m",
            Status::Detecting | Status::Building | Status::Running => "\x1b[1;36m",
            Status::Skipped | Status::Warning => "\x1b[1;33m",
        }
    }

    fn always_shown(&self) -> bool {
        matches!(self, Status::Warning)
    }
}

const STATUS_WIDTH: usize = 12;

/// Sink for everything the user sees during a build.
#[derive(Debug)]
pub struct BuildLog {
    verbosity: Verbosity,
    use_color: bool,
    interactive: bool,
    /// Captured lines (capture mode only)
    captured: Option<Mutex<Vec<String>>>,
}

impl BuildLog {
    /// Create a log writing to stderr.
    pub fn new(verbosity: Verbosity, color: ColorChoice) -> Self {
        let is_tty = io::stderr().is_terminal();
        let use_color = match color {
            ColorChoice::Auto => is_tty,
            ColorChoice::Always => true,
            ColorChoice::Never => false,
        };

        BuildLog {
            verbosity,
            use_color,
            interactive: is_tty,
            captured: None,
        }
    }

    /// Create a log that records lines instead of printing them.
    pub fn capture() -> Self {
        BuildLog {
            verbosity: Verbosity::Verbose,
            use_color: false,
            interactive: false,
            captured: Some(Mutex::new(Vec::new())),
        }
    }

    /// Lines recorded so far in capture mode.
    pub fn captured(&self) -> Vec<String> {
        self.captured
            .as_ref()
            .and_then(|c| c.lock().ok().map(|lines| lines.clone()))
            .unwrap_or_default()
    }

    /// Check if the log is in quiet mode.
    pub fn is_quiet(&self) -> bool {
        self.verbosity == Verbosity::Quiet
    }

    /// Check if the log is in verbose mode.
    pub fn is_verbose(&self) -> bool {
        self.verbosity == Verbosity::Verbose
    }

    /// Check if colors are enabled.
    pub fn use_color(&self) -> bool {
        self.use_color
    }

    /// Print a status message.
    ///
    /// Format: `{status:>12} {message}`. Quiet mode only shows warnings and
    /// errors.
    pub fn status(&self, status: Status, msg: impl Display) {
        if self.is_quiet() && !status.always_shown() {
            return;
        }
        let line = format!("{} {}", self.format_status(status), msg);
        self.write_line(&line);
    }

    /// Informational build message.
    pub fn logf(&self, msg: impl Display) {
        if self.is_quiet() {
            return;
        }
        self.write_line(&msg.to_string());
    }

    /// Warning shown even in quiet mode.
    pub fn warnf(&self, msg: impl Display) {
        self.status(Status::Warning, msg);
    }

    /// One line of live tool output.
    pub fn line(&self, line: &str) {
        if self.is_quiet() {
            return;
        }
        self.write_line(line);
    }

    /// Start a spinner for a long-running step.
    ///
    /// Only animates on an interactive terminal in normal verbosity; otherwise
    /// the message is printed once as a status line.
    pub fn spinner(&self, msg: impl Display) -> Spinner {
        let msg = msg.to_string();
        if self.interactive && self.verbosity == Verbosity::Normal && self.captured.is_none() {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
                pb.set_style(style);
            }
            pb.set_message(msg);
            pb.enable_steady_tick(Duration::from_millis(120));
            Spinner { pb: Some(pb) }
        } else {
            self.status(Status::Running, &msg);
            Spinner { pb: None }
        }
    }

    fn format_status(&self, status: Status) -> String {
        let text = status.as_str();
        if self.use_color {
            format!(
                "{}{:>width$}\x1b[0m",
                status.color_code(),
                text,
                width = STATUS_WIDTH
            )
        } else {
            format!("{:>width$}", text, width = STATUS_WIDTH)
        }
    }

    fn write_line(&self, line: &str) {
        if let Some(captured) = &self.captured {
            if let Ok(mut lines) = captured.lock() {
                lines.push(line.to_string());
            }
            return;
        }
        let stderr = io::stderr();
        let mut handle = stderr.lock();
        let _ = writeln!(handle, "{}", line);
    }
}

impl Default for BuildLog {
    fn default() -> Self {
        BuildLog::new(Verbosity::Normal, ColorChoice::Auto)
    }
}

/// Handle for a running spinner. Clears itself when dropped.
pub struct Spinner {
    pb: Option<ProgressBar>,
}

impl Drop for Spinner {
    fn drop(&mut self) {
        if let Some(pb) = self.pb.take() {
            pb.finish_and_clear();
        }
    }
}

/// Format a duration in a human-readable way.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 60.0 {
        format!("{:.2}s", secs)
    } else {
        format!("{:.1}m", secs / 60.0)
    }
}
