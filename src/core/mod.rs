//! Core types for packhand.
//!
//! This module contains the pieces every plugin touches:
//! - Classified errors and exit codes
//! - The plugin contract and its detect/build contexts
//! - Version parsing, comparison and runtime catalogs

pub mod context;
pub mod error;
pub mod plugin;
pub mod version;

pub use context::{BuildContext, BuildSummary, DetectContext};
pub use error::{BuildError, Classify, ErrorKind};
pub use plugin::{DetectOutcome, DetectPolicy, Plugin, PluginId};
