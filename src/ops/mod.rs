//! High-level operations.
//!
//! This module contains the lifecycle driver behind `packhand detect` and
//! `packhand build`.

pub mod lifecycle;

pub use lifecycle::{
    DetectReport, Lifecycle, LifecycleOutcome, PluginReport, PluginState, LAUNCH_FILE,
};
