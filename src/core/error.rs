//! Classified build errors.
//!
//! Every failure that leaves a plugin is a [`BuildError`] carrying one of the
//! three [`ErrorKind`]s. The lifecycle driver is the only place that turns a
//! kind into a process exit code.

use std::fmt;

use thiserror::Error;

use crate::util::diagnostic::Diagnostic;

/// Exit code for a successful build.
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code for user and internal errors. Both share the same exit-code space.
pub const EXIT_FAILURE: i32 = 1;

/// Exit code when no plugin applies to the source tree.
pub const EXIT_NOT_APPLICABLE: i32 = 100;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The three classified outcomes of plugin evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The application's own source or configuration is at fault.
    User,
    /// The orchestrator or the underlying toolchain failed unexpectedly.
    Internal,
    /// The plugin does not apply to this source tree. Not a failure.
    OptOut,
}

impl ErrorKind {
    /// Stable name used in diagnostics and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::User => "user error",
            ErrorKind::Internal => "internal error",
            ErrorKind::OptOut => "opt-out",
        }
    }

    /// Intended process exit code for this kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::User | ErrorKind::Internal => EXIT_FAILURE,
            ErrorKind::OptOut => EXIT_NOT_APPLICABLE,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ErrorKind::User => "packhand::user",
            ErrorKind::Internal => "packhand::internal",
            ErrorKind::OptOut => "packhand::opt_out",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified error crossing a plugin boundary.
///
/// The message is what the end user sees. The optional source is a
/// developer-facing cause and is never shown for user errors.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct BuildError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl BuildError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        BuildError {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// The application source or configuration is at fault.
    pub fn user(message: impl Into<String>) -> Self {
        BuildError::new(ErrorKind::User, message)
    }

    /// The orchestrator or toolchain failed.
    pub fn internal(message: impl Into<String>) -> Self {
        BuildError::new(ErrorKind::Internal, message)
    }

    /// The plugin does not apply.
    pub fn opt_out(reason: impl Into<String>) -> Self {
        BuildError::new(ErrorKind::OptOut, reason)
    }

    /// Attach a lower-level cause.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// The classification of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The user-facing message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether this error is an opt-out rather than a failure.
    pub fn is_opt_out(&self) -> bool {
        self.kind == ErrorKind::OptOut
    }

    /// Intended process exit code.
    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }

    /// The chain of underlying causes, outermost first.
    pub fn causes(&self) -> Vec<String> {
        let mut causes = Vec::new();
        let mut next = std::error::Error::source(self);
        while let Some(err) = next {
            causes.push(err.to_string());
            next = err.source();
        }
        causes
    }

    /// Convert to a terminal diagnostic.
    ///
    /// User errors render their message verbatim. Internal errors also list
    /// the cause chain.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self.kind {
            ErrorKind::User => Diagnostic::error(&self.message),
            ErrorKind::Internal => {
                let mut diag = Diagnostic::error(format!("internal: {}", self.message));
                for cause in self.causes() {
                    diag = diag.with_context(format!("caused by: {}", cause));
                }
                diag
            }
            ErrorKind::OptOut => Diagnostic::note(&self.message),
        }
    }
}

impl miette::Diagnostic for BuildError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.kind.code()))
    }

    fn severity(&self) -> Option<miette::Severity> {
        match self.kind {
            ErrorKind::OptOut => Some(miette::Severity::Advice),
            ErrorKind::User | ErrorKind::Internal => Some(miette::Severity::Error),
        }
    }
}

/// Classify a lower-level `Result` at the failure site.
pub trait Classify<T> {
    /// Wrap the error as a [`ErrorKind::User`] error.
    fn user_err(self, message: impl Into<String>) -> Result<T, BuildError>;

    /// Wrap the error as an [`ErrorKind::Internal`] error.
    fn internal_err(self, message: impl Into<String>) -> Result<T, BuildError>;
}

impl<T, E> Classify<T> for Result<T, E>
where
    E: Into<BoxError>,
{
    fn user_err(self, message: impl Into<String>) -> Result<T, BuildError> {
        self.map_err(|e| BuildError::user(message).with_source(e))
    }

    fn internal_err(self, message: impl Into<String>) -> Result<T, BuildError> {
        self.map_err(|e| BuildError::internal(message).with_source(e))
    }
}
