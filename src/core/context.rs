//! Contexts handed to plugins.
//!
//! [`DetectContext`] is read-only: it can inspect the source tree and the
//! application environment but has no executor, no cache and no way to write.
//! [`BuildContext`] adds those capabilities for the build phase.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{CacheEntry, CacheManager};
use crate::core::error::{BuildError, Classify};
use crate::core::plugin::PluginId;
use crate::core::version::RuntimeCatalog;
use crate::util::config::{BuildConfig, BuildEnv};
use crate::util::fs::{glob_relative, remove_all, write_string};
use crate::util::process::{run_or_fail, CommandRunner, ExecParams, ExecResult, FailurePolicy};
use crate::util::shell::BuildLog;

/// Read-only view of the application for the detect phase.
#[derive(Debug, Clone, Copy)]
pub struct DetectContext<'a> {
    config: &'a BuildConfig,
    log: &'a BuildLog,
}

impl<'a> DetectContext<'a> {
    /// Create a detect context.
    pub fn new(config: &'a BuildConfig, log: &'a BuildLog) -> Self {
        DetectContext { config, log }
    }

    /// Application source root.
    pub fn app_root(&self) -> &'a Path {
        &self.config.app_root
    }

    /// Application environment.
    pub fn env(&self) -> &'a BuildEnv {
        &self.config.env
    }

    /// Invocation settings.
    pub fn config(&self) -> &'a BuildConfig {
        self.config
    }

    /// Build log.
    pub fn log(&self) -> &'a BuildLog {
        self.log
    }

    /// Absolute path of a file under the app root.
    pub fn path(&self, segments: &[&str]) -> PathBuf {
        segments
            .iter()
            .fold(self.app_root().to_path_buf(), |p, s| p.join(s))
    }

    /// Whether a file or directory exists under the app root.
    pub fn file_exists(&self, segments: &[&str]) -> bool {
        self.path(segments).exists()
    }

    /// Whether a directory exists under the app root.
    pub fn dir_exists(&self, segments: &[&str]) -> bool {
        self.path(segments).is_dir()
    }

    /// Paths matching `pattern`, relative to the app root and sorted.
    pub fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>, BuildError> {
        glob_relative(self.app_root(), pattern)
            .internal_err(format!("matching {:?}", pattern))
    }

    /// Whether anything matches `pattern`.
    pub fn has_match(&self, pattern: &str) -> Result<bool, BuildError> {
        Ok(!self.glob(pattern)?.is_empty())
    }

    /// Read a file under the app root.
    pub fn read_to_string(&self, segments: &[&str]) -> Result<String, BuildError> {
        let path = self.path(segments);
        std::fs::read_to_string(&path).internal_err(format!("reading {}", path.display()))
    }

    /// Catalog of known versions for a runtime.
    pub fn catalog(&self, runtime: &str) -> Result<&'a RuntimeCatalog, BuildError> {
        self.config
            .catalog(runtime)
            .ok_or_else(|| BuildError::internal(format!("no version catalog for {}", runtime)))
    }

    /// Reason to opt out when `BP_RUNTIME` selects a different runtime.
    pub fn runtime_mismatch(&self, runtime: &str) -> Option<String> {
        match self.env().runtime() {
            Some(selected) if selected != runtime => Some(format!(
                "BP_RUNTIME is {}, not {}",
                selected, runtime
            )),
            _ => None,
        }
    }
}

/// A cache tag used during a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheUse {
    pub tag: String,
    pub hit: bool,
}

/// What a build did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSummary {
    /// Plugin that built the application
    pub plugin: PluginId,
    /// Launch command recorded by the plugin
    pub entrypoint: Option<String>,
    /// Environment the launch command needs
    pub launch_env: BTreeMap<String, String>,
    /// Cache tags acquired, in order
    pub caches: Vec<CacheUse>,
    /// Commands run, in order
    pub commands: Vec<String>,
    /// Wall time of the build phase
    pub elapsed: Duration,
}

impl BuildSummary {
    /// Empty summary for a plugin.
    pub fn new(plugin: PluginId) -> Self {
        BuildSummary {
            plugin,
            entrypoint: None,
            launch_env: BTreeMap::new(),
            caches: Vec::new(),
            commands: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }
}

/// Full access to the application for the build phase.
pub struct BuildContext<'a> {
    source: DetectContext<'a>,
    runner: &'a dyn CommandRunner,
    cache: &'a CacheManager,
    summary: BuildSummary,
}

impl<'a> BuildContext<'a> {
    /// Create a build context for `plugin`.
    pub fn new(
        plugin: PluginId,
        config: &'a BuildConfig,
        log: &'a BuildLog,
        runner: &'a dyn CommandRunner,
        cache: &'a CacheManager,
    ) -> Self {
        BuildContext {
            source: DetectContext::new(config, log),
            runner,
            cache,
            summary: BuildSummary::new(plugin),
        }
    }

    /// Read-only view of the same application.
    pub fn source(&self) -> DetectContext<'a> {
        self.source
    }

    /// Application source root.
    pub fn app_root(&self) -> &'a Path {
        self.source.app_root()
    }

    /// Application environment.
    pub fn env(&self) -> &'a BuildEnv {
        self.source.env()
    }

    /// Build log.
    pub fn log(&self) -> &'a BuildLog {
        self.source.log()
    }

    /// Whether a file or directory exists under the app root.
    pub fn file_exists(&self, segments: &[&str]) -> bool {
        self.source.file_exists(segments)
    }

    /// Read a file under the app root.
    pub fn read_to_string(&self, segments: &[&str]) -> Result<String, BuildError> {
        self.source.read_to_string(segments)
    }

    /// Informational message.
    pub fn logf(&self, msg: impl std::fmt::Display) {
        self.log().logf(msg);
    }

    /// Warning message.
    pub fn warnf(&self, msg: impl std::fmt::Display) {
        self.log().warnf(msg);
    }

    /// Run a command and classify a non-zero exit with `policy`.
    ///
    /// The command runs in the app root unless it names its own directory,
    /// and inherits the configured timeout and streaming.
    pub fn exec(&mut self, params: ExecParams, policy: FailurePolicy) -> Result<ExecResult, BuildError> {
        let config = self.source.config();
        let mut params = params.with_default_timeout(config.timeout);
        if params.working_dir().is_none() {
            params = params.cwd(self.app_root());
        }
        if config.stream && !params.is_streamed() {
            params = params.stream(true);
        }

        let display = params.display_command();
        self.summary.commands.push(display.clone());

        let log = self.log();
        let _spinner = (!params.is_streamed() && !log.is_verbose())
            .then(|| log.spinner(format!("`{}`", display)));

        run_or_fail(self.runner, &params, log)?
            .classify(&display, policy)
            .into_result(log)
    }

    /// Run a command whose failure is the application's fault.
    pub fn exec_user(&mut self, params: ExecParams) -> Result<ExecResult, BuildError> {
        self.exec(params, FailurePolicy::User)
    }

    /// Run a command whose failure is the toolchain's fault.
    pub fn exec_internal(&mut self, params: ExecParams) -> Result<ExecResult, BuildError> {
        self.exec(params, FailurePolicy::Internal)
    }

    /// Run a command whose non-zero exit is only warned about.
    pub fn exec_tolerant(&mut self, params: ExecParams) -> Result<ExecResult, BuildError> {
        self.exec(params, FailurePolicy::Tolerate)
    }

    /// Acquire a cache entry and record its use.
    pub fn cache(&mut self, tag: &str, key: &str) -> Result<CacheEntry, BuildError> {
        let entry = self.cache.acquire(tag, key)?;
        self.summary.caches.push(CacheUse {
            tag: entry.tag.clone(),
            hit: entry.hit,
        });
        Ok(entry)
    }

    /// Fill a cache entry, invalidating it when `fill` fails.
    pub fn populate<T, F>(&mut self, entry: &CacheEntry, fill: F) -> Result<T, BuildError>
    where
        F: FnOnce(&mut Self, &Path) -> Result<T, BuildError>,
    {
        let cache = self.cache;
        cache.populate(entry, |dir| fill(self, dir))
    }

    /// Remove a file or directory under the app root.
    pub fn remove_all(&self, segments: &[&str]) -> Result<(), BuildError> {
        let path = self.source.path(segments);
        remove_all(&path).internal_err(format!("removing {}", path.display()))
    }

    /// Write a file under the app root.
    pub fn write_file(&self, segments: &[&str], contents: &str) -> Result<(), BuildError> {
        let path = self.source.path(segments);
        write_string(&path, contents).internal_err(format!("writing {}", path.display()))
    }

    /// Record the command that launches the built application.
    pub fn set_entrypoint(&mut self, command: impl Into<String>) {
        self.summary.entrypoint = Some(command.into());
    }

    /// Record an environment variable for the launch command.
    pub fn set_launch_env(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.summary.launch_env.insert(name.into(), value.into());
    }

    /// Finish the build and take the summary.
    pub fn into_summary(self) -> BuildSummary {
        self.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::test_support::ScriptedRunner;
    use crate::util::config::ENV_RUNTIME;
    use tempfile::TempDir;

    #[test]
    fn test_detect_inspection() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("bin")).unwrap();
        std::fs::write(tmp.path().join("bin/rails"), "").unwrap();
        std::fs::write(tmp.path().join("main.py"), "").unwrap();

        let config = BuildConfig::new(tmp.path());
        let log = BuildLog::capture();
        let ctx = DetectContext::new(&config, &log);

        assert!(ctx.file_exists(&["bin", "rails"]));
        assert!(ctx.dir_exists(&["bin"]));
        assert!(!ctx.file_exists(&["Gemfile"]));
        assert!(ctx.has_match("*.py").unwrap());
        assert_eq!(ctx.glob("*.py").unwrap(), vec![PathBuf::from("main.py")]);

        let err = ctx.read_to_string(&["missing.json"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_runtime_mismatch() {
        let tmp = TempDir::new().unwrap();
        let config = BuildConfig::new(tmp.path())
            .with_env(BuildEnv::from_pairs([(ENV_RUNTIME, "nodejs")]));
        let log = BuildLog::capture();
        let ctx = DetectContext::new(&config, &log);

        assert_eq!(ctx.runtime_mismatch("nodejs"), None);
        assert!(ctx.runtime_mismatch("python").unwrap().contains("nodejs"));
    }

    #[test]
    fn test_exec_defaults_and_summary() {
        let tmp = TempDir::new().unwrap();
        let config = BuildConfig::new(tmp.path());
        let log = BuildLog::capture();
        let runner = ScriptedRunner::new().on("npm ci", 0, "added 1 package");
        let cache = CacheManager::new(tmp.path().join("cache"));
        let mut ctx = BuildContext::new(PluginId::NpmInstall, &config, &log, &runner, &cache);

        let result = ctx.exec_user(ExecParams::new(["npm", "ci"])).unwrap();
        assert_eq!(result.stdout, "added 1 package");

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].working_dir(), Some(tmp.path()));
        assert_eq!(calls[0].get_timeout(), config.timeout);

        ctx.cache("npm modules", "k").unwrap();
        ctx.set_entrypoint("npm start");
        let summary = ctx.into_summary();
        assert_eq!(summary.commands, vec!["npm ci".to_string()]);
        assert_eq!(summary.caches, vec![CacheUse { tag: "npm modules".into(), hit: false }]);
        assert_eq!(summary.entrypoint.as_deref(), Some("npm start"));
    }

    #[test]
    fn test_exec_policy_applies() {
        let tmp = TempDir::new().unwrap();
        let config = BuildConfig::new(tmp.path());
        let log = BuildLog::capture();
        let runner = ScriptedRunner::new().on("false", 1, "");
        let cache = CacheManager::new(tmp.path().join("cache"));
        let mut ctx = BuildContext::new(PluginId::RailsAssets, &config, &log, &runner, &cache);

        let tolerated = ctx.exec_tolerant(ExecParams::new(["false"])).unwrap();
        assert_eq!(tolerated.exit_code, 1);

        let err = ctx.exec_user(ExecParams::new(["false"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::User);

        let err = ctx.exec_internal(ExecParams::new(["false"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_populate_failure_invalidates_entry() {
        let tmp = TempDir::new().unwrap();
        let config = BuildConfig::new(tmp.path());
        let log = BuildLog::capture();
        let runner = ScriptedRunner::new().on("pip install", 1, "no matching distribution");
        let cache = CacheManager::new(tmp.path().join("cache"));
        let mut ctx = BuildContext::new(PluginId::PythonRuntime, &config, &log, &runner, &cache);

        let entry = ctx.cache("pip packages", "k").unwrap();
        let err = ctx
            .populate(&entry, |ctx, _dir| {
                ctx.exec_user(ExecParams::new(["pip", "install", "flask"]))
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::User);
        assert!(cache.entries().unwrap().is_empty());
    }

    #[test]
    fn test_remove_and_write() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("vendor/autoload")).unwrap();
        let config = BuildConfig::new(tmp.path());
        let log = BuildLog::capture();
        let runner = ScriptedRunner::new();
        let cache = CacheManager::new(tmp.path().join("cache"));
        let ctx = BuildContext::new(PluginId::ComposerBuild, &config, &log, &runner, &cache);

        ctx.write_file(&["out", "a.txt"], "x").unwrap();
        assert!(tmp.path().join("out/a.txt").exists());

        ctx.remove_all(&["vendor"]).unwrap();
        assert!(!tmp.path().join("vendor").exists());
    }
}
