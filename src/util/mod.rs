//! Shared utilities

pub mod config;
pub mod diagnostic;
pub mod fs;
pub mod hash;
pub mod process;
pub mod shell;

pub use config::{BuildConfig, BuildEnv};
pub use diagnostic::Diagnostic;
pub use process::{CommandRunner, ExecParams, ExecResult, SystemRunner};
pub use shell::BuildLog;
