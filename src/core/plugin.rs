//! The plugin contract.
//!
//! A plugin is evaluated in two phases. `detect` decides whether it applies
//! to a source tree and sees the tree read-only; `build` runs only for the
//! selected plugin and is the only phase that may execute commands, use
//! caches, or write files.

use std::fmt;
use std::str::FromStr;

use crate::core::context::{BuildContext, DetectContext};
use crate::core::error::BuildError;

/// Shipped plugins, in selection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PluginId {
    /// Runs a composer build script for PHP apps
    ComposerBuild,
    /// Precompiles Rails assets
    RailsAssets,
    /// Installs Node.js dependencies with npm
    NpmInstall,
    /// Serves a Python function with the functions framework
    FunctionsFramework,
    /// Installs Python requirements for a pinned runtime
    PythonRuntime,
}

impl PluginId {
    /// All plugins in selection order.
    pub const ALL: [PluginId; 5] = [
        PluginId::ComposerBuild,
        PluginId::RailsAssets,
        PluginId::NpmInstall,
        PluginId::FunctionsFramework,
        PluginId::PythonRuntime,
    ];

    /// Get the plugin name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginId::ComposerBuild => "composer-build",
            PluginId::RailsAssets => "rails-assets",
            PluginId::NpmInstall => "npm-install",
            PluginId::FunctionsFramework => "functions-framework",
            PluginId::PythonRuntime => "python-runtime",
        }
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for PluginId {
    type Err = PluginIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PluginId::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| PluginIdParseError(s.to_string()))
    }
}

/// Error returned when parsing an unknown plugin name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginIdParseError(pub String);

impl fmt::Display for PluginIdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = PluginId::ALL.iter().map(PluginId::as_str).collect();
        write!(
            f,
            "unknown plugin '{}', valid values: {}",
            self.0,
            names.join(", ")
        )
    }
}

impl std::error::Error for PluginIdParseError {}

/// Result of a plugin's detect phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectOutcome {
    /// The plugin applies.
    Pass,
    /// The plugin does not apply, with a reason for the report.
    OptOut(String),
}

impl DetectOutcome {
    /// Opt out with a reason.
    pub fn opt_out(reason: impl Into<String>) -> Self {
        DetectOutcome::OptOut(reason.into())
    }

    /// Whether the plugin applies.
    pub fn is_pass(&self) -> bool {
        matches!(self, DetectOutcome::Pass)
    }
}

/// How many plugins the driver evaluates during detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectPolicy {
    /// Stop at the first eligible plugin.
    #[default]
    FirstEligible,
    /// Evaluate every plugin, in parallel, and report all of them.
    EvaluateAll,
}

impl FromStr for DetectPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "first" | "first-eligible" => Ok(DetectPolicy::FirstEligible),
            "all" | "evaluate-all" => Ok(DetectPolicy::EvaluateAll),
            _ => Err(format!(
                "invalid detect policy '{}'; expected 'first' or 'all'",
                s
            )),
        }
    }
}

/// A build plugin.
pub trait Plugin: Send + Sync {
    /// Identity of this plugin.
    fn id(&self) -> PluginId;

    /// Runtime this plugin serves, matched against `BP_RUNTIME`.
    fn runtime(&self) -> &'static str;

    /// Decide whether the plugin applies. Must not modify anything.
    ///
    /// Returning an error other than an opt-out fails the whole invocation.
    fn detect(&self, ctx: &DetectContext<'_>) -> Result<DetectOutcome, BuildError>;

    /// Build the application.
    fn build(&self, ctx: &mut BuildContext<'_>) -> Result<(), BuildError>;
}

impl fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin").field("id", &self.id()).finish()
    }
}
