//! Command implementations.

pub mod build;
pub mod cache;
pub mod detect;
pub mod plugins;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use packhand::core::plugin::{DetectPolicy, PluginId};
use packhand::util::config::BuildConfig;
use packhand::util::shell::BuildLog;

use crate::cli::Output;

/// Resolve the application root to an absolute path.
pub fn app_root(app: &Path) -> Result<PathBuf> {
    app.canonicalize()
        .with_context(|| format!("application directory {} not found", app.display()))
}

/// Load settings for an application, then apply a policy override.
pub fn load_config(app: &Path, policy: Option<&str>) -> Result<BuildConfig> {
    let mut config = BuildConfig::load(app_root(app)?)?;
    if let Some(policy) = policy {
        config.detect_policy = policy
            .parse::<DetectPolicy>()
            .map_err(|e| anyhow::anyhow!(e))?;
    }
    Ok(config)
}

/// Parse a `--plugin` argument.
pub fn parse_plugin(name: Option<&str>) -> Result<Option<PluginId>> {
    name.map(|n| n.parse::<PluginId>().map_err(anyhow::Error::from))
        .transpose()
}

/// Build log for the global output flags.
pub fn build_log(output: &Output) -> BuildLog {
    BuildLog::new(output.verbosity, output.color)
}
