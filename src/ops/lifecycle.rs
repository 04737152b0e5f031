//! The detect/build lifecycle.
//!
//! Each plugin moves through `Pending -> {OptedOut | Eligible}` during
//! detect. The first eligible plugin in list order is selected and built,
//! ending `Succeeded` or `Failed`. Only the selected plugin is built and a
//! failed build is never retried with another plugin.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;

use crate::cache::CacheManager;
use crate::core::context::{BuildContext, BuildSummary, DetectContext};
use crate::core::error::{
    BuildError, Classify, ErrorKind, EXIT_FAILURE, EXIT_NOT_APPLICABLE, EXIT_SUCCESS,
};
use crate::core::plugin::{DetectOutcome, DetectPolicy, Plugin, PluginId};
use crate::plugins;
use crate::util::config::BuildConfig;
use crate::util::fs::write_string;
use crate::util::process::CommandRunner;
use crate::util::shell::{format_duration, BuildLog, Status};

/// File the launch command is written to, under the output directory.
pub const LAUNCH_FILE: &str = "launch.toml";

/// Where a plugin is in the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginState {
    /// Not evaluated (detect stopped earlier, or narrowed away)
    Pending,
    /// Detect declined
    OptedOut(String),
    /// Detect passed
    Eligible,
    /// Built successfully
    Succeeded,
    /// Build failed
    Failed(ErrorKind),
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginState::Pending => f.write_str("not evaluated"),
            PluginState::OptedOut(reason) => write!(f, "opted out: {}", reason),
            PluginState::Eligible => f.write_str("eligible"),
            PluginState::Succeeded => f.write_str("succeeded"),
            PluginState::Failed(kind) => write!(f, "failed ({})", kind),
        }
    }
}

/// State of one plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginReport {
    pub id: PluginId,
    pub state: PluginState,
}

/// Result of the detect phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectReport {
    /// Every candidate, in selection order
    pub plugins: Vec<PluginReport>,
    /// First eligible plugin
    pub selected: Option<PluginId>,
}

impl DetectReport {
    /// State of a plugin, if it was a candidate.
    pub fn state(&self, id: PluginId) -> Option<&PluginState> {
        self.plugins.iter().find(|r| r.id == id).map(|r| &r.state)
    }

    /// All eligible plugins.
    pub fn eligible(&self) -> impl Iterator<Item = PluginId> + '_ {
        self.plugins
            .iter()
            .filter(|r| r.state == PluginState::Eligible)
            .map(|r| r.id)
    }

    fn set_state(&mut self, id: PluginId, state: PluginState) {
        if let Some(report) = self.plugins.iter_mut().find(|r| r.id == id) {
            report.state = state;
        }
    }
}

/// How an invocation ended.
#[derive(Debug)]
pub enum LifecycleOutcome {
    /// A plugin built the application.
    Built {
        report: DetectReport,
        summary: BuildSummary,
        /// Launch metadata, when the plugin recorded an entrypoint
        launch_file: Option<PathBuf>,
    },
    /// No plugin applies.
    NothingApplies(DetectReport),
    /// Detect or build failed.
    Failed {
        report: Option<DetectReport>,
        error: BuildError,
    },
}

impl LifecycleOutcome {
    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            LifecycleOutcome::Built { .. } => EXIT_SUCCESS,
            LifecycleOutcome::NothingApplies(_) => EXIT_NOT_APPLICABLE,
            LifecycleOutcome::Failed { error, .. } => match error.kind() {
                ErrorKind::OptOut => EXIT_NOT_APPLICABLE,
                ErrorKind::User | ErrorKind::Internal => EXIT_FAILURE,
            },
        }
    }

    /// The detect report, when detect completed.
    pub fn report(&self) -> Option<&DetectReport> {
        match self {
            LifecycleOutcome::Built { report, .. } => Some(report),
            LifecycleOutcome::NothingApplies(report) => Some(report),
            LifecycleOutcome::Failed { report, .. } => report.as_ref(),
        }
    }
}

#[derive(Serialize)]
struct LaunchFile<'a> {
    plugin: &'a str,
    processes: Vec<LaunchProcess<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    env: Option<&'a BTreeMap<String, String>>,
}

#[derive(Serialize)]
struct LaunchProcess<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    command: &'a str,
}

/// Drives plugins through detect and build for one application.
pub struct Lifecycle<'a> {
    config: &'a BuildConfig,
    log: &'a BuildLog,
    runner: &'a dyn CommandRunner,
    cache: &'a CacheManager,
    plugins: Vec<&'a dyn Plugin>,
}

impl<'a> Lifecycle<'a> {
    /// Create a driver over the shipped plugins.
    pub fn new(
        config: &'a BuildConfig,
        log: &'a BuildLog,
        runner: &'a dyn CommandRunner,
        cache: &'a CacheManager,
    ) -> Self {
        Lifecycle {
            config,
            log,
            runner,
            cache,
            plugins: plugins::registry(),
        }
    }

    /// Replace the candidate plugins. Order is selection order.
    pub fn with_plugins(mut self, plugins: Vec<&'a dyn Plugin>) -> Self {
        self.plugins = plugins;
        self
    }

    /// Consider only one plugin.
    pub fn only(mut self, id: PluginId) -> Self {
        self.plugins.retain(|p| p.id() == id);
        self
    }

    /// Run detect under the configured policy.
    ///
    /// An error that is not an opt-out aborts detect.
    pub fn detect(&self) -> Result<DetectReport, BuildError> {
        let ctx = DetectContext::new(self.config, self.log);
        let states = match self.config.detect_policy {
            DetectPolicy::FirstEligible => {
                let mut states = Vec::with_capacity(self.plugins.len());
                let mut found = false;
                for plugin in &self.plugins {
                    if found {
                        states.push(PluginState::Pending);
                        continue;
                    }
                    let state = detect_one(*plugin, &ctx)?;
                    found = state == PluginState::Eligible;
                    states.push(state);
                }
                states
            }
            DetectPolicy::EvaluateAll => self
                .plugins
                .par_iter()
                .map(|plugin| detect_one(*plugin, &ctx))
                .collect::<Vec<_>>()
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?,
        };

        let plugins: Vec<PluginReport> = self
            .plugins
            .iter()
            .zip(states)
            .map(|(plugin, state)| PluginReport {
                id: plugin.id(),
                state,
            })
            .collect();
        let selected = plugins
            .iter()
            .find(|r| r.state == PluginState::Eligible)
            .map(|r| r.id);

        Ok(DetectReport { plugins, selected })
    }

    /// Build one plugin.
    pub fn build(&self, plugin: &dyn Plugin) -> Result<BuildSummary, BuildError> {
        let start = Instant::now();
        let mut ctx = BuildContext::new(plugin.id(), self.config, self.log, self.runner, self.cache);
        plugin.build(&mut ctx)?;
        let mut summary = ctx.into_summary();
        summary.elapsed = start.elapsed();
        Ok(summary)
    }

    /// Detect, then build the selected plugin.
    pub fn run(&self) -> LifecycleOutcome {
        self.log.status(
            Status::Detecting,
            self.config.app_root.display(),
        );
        let mut report = match self.detect() {
            Ok(report) => report,
            Err(error) => return self.fail(None, error),
        };

        for r in &report.plugins {
            if let PluginState::OptedOut(reason) = &r.state {
                tracing::debug!(plugin = %r.id, "opted out: {}", reason);
            }
        }

        let Some(id) = report.selected else {
            self.log.status(Status::Skipped, "no plugin applies to this application");
            return LifecycleOutcome::NothingApplies(report);
        };
        let Some(plugin) = self.plugins.iter().copied().find(|p| p.id() == id) else {
            let error = BuildError::internal(format!("selected plugin {} is not registered", id));
            return self.fail(Some(report), error);
        };

        self.log.status(Status::Building, format!("with {}", id));
        let summary = match self.build(plugin) {
            Ok(summary) => summary,
            Err(error) if error.is_opt_out() => {
                report.set_state(id, PluginState::OptedOut(error.message().to_string()));
                self.log.status(Status::Skipped, error.message());
                return LifecycleOutcome::NothingApplies(report);
            }
            Err(error) => {
                report.set_state(id, PluginState::Failed(error.kind()));
                return self.fail(Some(report), error);
            }
        };
        report.set_state(id, PluginState::Succeeded);

        let launch_file = match write_launch(&self.config.output_dir, &summary) {
            Ok(path) => path,
            Err(error) => return self.fail(Some(report), error),
        };

        self.log.status(
            Status::Finished,
            format!("{} in {}", id, format_duration(summary.elapsed)),
        );
        LifecycleOutcome::Built {
            report,
            summary,
            launch_file,
        }
    }

    fn fail(&self, report: Option<DetectReport>, error: BuildError) -> LifecycleOutcome {
        tracing::debug!(kind = %error.kind(), causes = ?error.causes(), "build failed");
        if let Some(path) = &self.config.termination_log {
            if let Err(e) = write_termination_log(path, &error) {
                tracing::warn!("failed to write termination log {}: {:#}", path.display(), e);
            }
        }
        LifecycleOutcome::Failed { report, error }
    }
}

fn detect_one(plugin: &dyn Plugin, ctx: &DetectContext<'_>) -> Result<PluginState, BuildError> {
    if let Some(reason) = ctx.runtime_mismatch(plugin.runtime()) {
        return Ok(PluginState::OptedOut(reason));
    }

    match plugin.detect(ctx) {
        Ok(DetectOutcome::Pass) => Ok(PluginState::Eligible),
        Ok(DetectOutcome::OptOut(reason)) => Ok(PluginState::OptedOut(reason)),
        Err(e) if e.is_opt_out() => Ok(PluginState::OptedOut(e.message().to_string())),
        Err(e) => Err(e),
    }
}

/// Write `launch.toml` when the build recorded an entrypoint.
fn write_launch(output_dir: &Path, summary: &BuildSummary) -> Result<Option<PathBuf>, BuildError> {
    let Some(command) = summary.entrypoint.as_deref() else {
        return Ok(None);
    };

    let launch = LaunchFile {
        plugin: summary.plugin.as_str(),
        processes: vec![LaunchProcess {
            kind: "web",
            command,
        }],
        env: (!summary.launch_env.is_empty()).then_some(&summary.launch_env),
    };
    let contents = toml::to_string(&launch).internal_err("serializing launch metadata")?;
    let path = output_dir.join(LAUNCH_FILE);
    write_string(&path, &contents).internal_err(format!("writing {}", path.display()))?;
    Ok(Some(path))
}

fn write_termination_log(path: &Path, error: &BuildError) -> anyhow::Result<()> {
    let message = match error.kind() {
        ErrorKind::Internal => format!("internal: {}", error.message()),
        ErrorKind::User | ErrorKind::OptOut => error.message().to_string(),
    };
    write_string(path, &message)
}
