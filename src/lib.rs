//! packhand - detect/build lifecycle for per-ecosystem build plugins
//!
//! This crate provides the library behind the `packhand` binary: the
//! process executor, error classification, version gating, tagged caches,
//! the plugin contract and the lifecycle driver that ties them together.

pub mod cache;
pub mod core;
pub mod ops;
pub mod plugins;
pub mod util;

/// Test utilities and mocks for packhand unit tests.
///
/// This module is only available when compiling with `--cfg test`. It
/// provides a scripted command runner and application fixtures.
#[cfg(test)]
pub mod test_support;

pub use crate::cache::{CacheEntry, CacheManager};
pub use crate::core::error::{BuildError, ErrorKind};
pub use crate::core::plugin::{DetectOutcome, DetectPolicy, Plugin, PluginId};
pub use crate::ops::lifecycle::{Lifecycle, LifecycleOutcome};
pub use crate::util::config::BuildConfig;
