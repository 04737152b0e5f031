//! Configuration for a build invocation.
//!
//! Configuration is assembled once per invocation into a [`BuildConfig`] and
//! passed by reference to everything that needs it. Sources, lowest to
//! highest precedence:
//! 1. Built-in defaults
//! 2. Global config file (`~/.packhand/config.toml`)
//! 3. Project config file (`<app>/.packhand/config.toml`)
//! 4. Environment (`BP_CACHE_DIR`, `BP_TERMINATION_LOG`)
//! 5. Command-line flags
//!
//! The application environment that plugins read (`BP_RUNTIME`,
//! `BP_RUNTIME_VERSION`, `BP_ENTRYPOINT`, `FUNCTION_TARGET`) is captured
//! separately in [`BuildEnv`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::plugin::DetectPolicy;
use crate::core::version::RuntimeCatalog;
use crate::util::hash::Fingerprint;

/// Selects the language runtime, overriding detection.
pub const ENV_RUNTIME: &str = "BP_RUNTIME";
/// Pins the language runtime version.
pub const ENV_RUNTIME_VERSION: &str = "BP_RUNTIME_VERSION";
/// Overrides the entrypoint command.
pub const ENV_ENTRYPOINT: &str = "BP_ENTRYPOINT";
/// Names the function a functions-framework app serves.
pub const ENV_FUNCTION_TARGET: &str = "FUNCTION_TARGET";
/// Overrides the cache directory.
pub const ENV_CACHE_DIR: &str = "BP_CACHE_DIR";
/// File that receives the failure message of a failed build.
pub const ENV_TERMINATION_LOG: &str = "BP_TERMINATION_LOG";

const RECOGNIZED_VARS: &[&str] = &[
    ENV_RUNTIME,
    ENV_RUNTIME_VERSION,
    ENV_ENTRYPOINT,
    ENV_FUNCTION_TARGET,
];

/// Default per-command timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 1800;

const DEFAULT_PYTHON_VERSIONS: &[&str] = &["3.7.9", "3.8.0", "3.8.6", "3.9.0", "3.9.1"];
const DEFAULT_NODEJS_VERSIONS: &[&str] = &["10.23.0", "12.20.0", "14.15.1", "15.4.0"];

/// Application environment, read once per build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildEnv {
    vars: BTreeMap<String, String>,
}

impl BuildEnv {
    /// Capture the recognized variables from the process environment.
    pub fn from_process() -> Self {
        Self::from_pairs(
            RECOGNIZED_VARS
                .iter()
                .filter_map(|name| std::env::var(name).ok().map(|v| (name.to_string(), v))),
        )
    }

    /// Build from explicit pairs. Empty values are treated as unset.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let vars = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();
        BuildEnv { vars }
    }

    /// Look up a variable.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// The runtime selected by `BP_RUNTIME`, lowercased.
    pub fn runtime(&self) -> Option<String> {
        self.get(ENV_RUNTIME).map(|r| r.trim().to_lowercase())
    }

    /// The runtime version pin.
    pub fn runtime_version(&self) -> Option<&str> {
        self.get(ENV_RUNTIME_VERSION)
    }

    /// The entrypoint override.
    pub fn entrypoint(&self) -> Option<&str> {
        self.get(ENV_ENTRYPOINT)
    }

    /// The functions-framework target.
    pub fn function_target(&self) -> Option<&str> {
        self.get(ENV_FUNCTION_TARGET)
    }
}

/// Contents of a `config.toml` file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Lifecycle settings
    pub lifecycle: LifecycleConfig,

    /// Command execution settings
    pub exec: ExecConfig,

    /// Filesystem locations
    pub paths: PathsConfig,

    /// Runtime version catalogs, keyed by runtime name
    pub runtimes: BTreeMap<String, Vec<String>>,
}

/// Lifecycle settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// "first" or "all"
    pub detect_policy: Option<String>,
}

/// Command execution settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Default per-command timeout in seconds (0 disables)
    pub timeout_secs: Option<u64>,

    /// Stream tool output live
    pub stream: Option<bool>,
}

/// Filesystem locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Cache root
    pub cache_dir: Option<PathBuf>,

    /// Build output directory (launch metadata)
    pub output_dir: Option<PathBuf>,

    /// Termination log file
    pub termination_log: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {:#}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        if other.lifecycle.detect_policy.is_some() {
            self.lifecycle.detect_policy = other.lifecycle.detect_policy;
        }

        if other.exec.timeout_secs.is_some() {
            self.exec.timeout_secs = other.exec.timeout_secs;
        }
        if other.exec.stream.is_some() {
            self.exec.stream = other.exec.stream;
        }

        if other.paths.cache_dir.is_some() {
            self.paths.cache_dir = other.paths.cache_dir;
        }
        if other.paths.output_dir.is_some() {
            self.paths.output_dir = other.paths.output_dir;
        }
        if other.paths.termination_log.is_some() {
            self.paths.termination_log = other.paths.termination_log;
        }

        // Catalogs replace per runtime, not per version.
        self.runtimes.extend(other.runtimes);
    }

    /// Parsed detect policy, if configured.
    pub fn detect_policy(&self) -> Result<Option<DetectPolicy>> {
        self.lifecycle
            .detect_policy
            .as_deref()
            .map(|s| s.parse().map_err(|e: String| anyhow::anyhow!(e)))
            .transpose()
    }
}

/// Load merged configuration from global and project locations.
pub fn load_config(global_path: Option<&Path>, project_path: &Path) -> Config {
    let mut config = Config::default();

    if let Some(global) = global_path {
        config.merge(Config::load_or_default(global));
    }
    config.merge(Config::load_or_default(project_path));

    config
}

/// Get the global config directory (`~/.packhand`).
pub fn global_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".packhand"))
}

/// Get the global config path (`~/.packhand/config.toml`).
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the project state directory (`<app>/.packhand`).
pub fn project_dir(app_root: &Path) -> PathBuf {
    app_root.join(".packhand")
}

/// Get the project config path (`<app>/.packhand/config.toml`).
pub fn project_config_path(app_root: &Path) -> PathBuf {
    project_dir(app_root).join("config.toml")
}

/// Default cache root for an application.
///
/// Lives in the per-user cache directory, scoped by a fingerprint of the
/// application path so separate apps never share tags.
pub fn default_cache_dir(app_root: &Path) -> PathBuf {
    let mut fp = Fingerprint::new();
    fp.update_str(&app_root.to_string_lossy());
    let scope = fp.finish_short();
    match directories::ProjectDirs::from("dev", "packhand", "packhand") {
        Some(dirs) => dirs.cache_dir().join("apps").join(&scope),
        None => project_dir(app_root).join("cache"),
    }
}

/// Fully resolved settings for one build invocation.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Application source root
    pub app_root: PathBuf,
    /// Cache root for tagged entries
    pub cache_dir: PathBuf,
    /// Build output directory
    pub output_dir: PathBuf,
    /// Receives the failure message of a failed build
    pub termination_log: Option<PathBuf>,
    /// Detect evaluation policy
    pub detect_policy: DetectPolicy,
    /// Default per-command timeout
    pub timeout: Option<Duration>,
    /// Stream tool output live
    pub stream: bool,
    /// Runtime catalogs by runtime name
    pub catalogs: BTreeMap<String, RuntimeCatalog>,
    /// Application environment
    pub env: BuildEnv,
}

impl BuildConfig {
    /// Defaults for an application root, with no config files applied.
    pub fn new(app_root: impl Into<PathBuf>) -> Self {
        let app_root = app_root.into();
        let mut catalogs = BTreeMap::new();
        catalogs.insert(
            "python".to_string(),
            RuntimeCatalog::new("python", DEFAULT_PYTHON_VERSIONS.iter().copied()),
        );
        catalogs.insert(
            "nodejs".to_string(),
            RuntimeCatalog::new("nodejs", DEFAULT_NODEJS_VERSIONS.iter().copied()),
        );

        BuildConfig {
            cache_dir: default_cache_dir(&app_root),
            output_dir: project_dir(&app_root).join("output"),
            termination_log: None,
            detect_policy: DetectPolicy::default(),
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            stream: false,
            catalogs,
            env: BuildEnv::default(),
            app_root,
        }
    }

    /// Resolve settings from config files and the process environment.
    pub fn load(app_root: impl Into<PathBuf>) -> Result<Self> {
        let app_root = app_root.into();
        let file = load_config(
            global_config_path().as_deref(),
            &project_config_path(&app_root),
        );

        let mut config = BuildConfig::new(app_root).with_file(&file)?;
        config.env = BuildEnv::from_process();

        if let Ok(dir) = std::env::var(ENV_CACHE_DIR) {
            if !dir.is_empty() {
                config.cache_dir = PathBuf::from(dir);
            }
        }
        if let Ok(path) = std::env::var(ENV_TERMINATION_LOG) {
            if !path.is_empty() {
                config.termination_log = Some(PathBuf::from(path));
            }
        }

        Ok(config)
    }

    /// Apply a config file on top of the current settings.
    pub fn with_file(mut self, file: &Config) -> Result<Self> {
        if let Some(policy) = file.detect_policy()? {
            self.detect_policy = policy;
        }
        if let Some(secs) = file.exec.timeout_secs {
            self.timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(stream) = file.exec.stream {
            self.stream = stream;
        }
        if let Some(dir) = &file.paths.cache_dir {
            self.cache_dir = self.app_root.join(dir);
        }
        if let Some(dir) = &file.paths.output_dir {
            self.output_dir = self.app_root.join(dir);
        }
        if let Some(path) = &file.paths.termination_log {
            self.termination_log = Some(self.app_root.join(path));
        }
        for (runtime, versions) in &file.runtimes {
            self.catalogs.insert(
                runtime.clone(),
                RuntimeCatalog::new(runtime.clone(), versions.iter().map(String::as_str)),
            );
        }
        Ok(self)
    }

    /// Replace the application environment.
    pub fn with_env(mut self, env: BuildEnv) -> Self {
        self.env = env;
        self
    }

    /// Catalog for a runtime, if known.
    pub fn catalog(&self, runtime: &str) -> Option<&RuntimeCatalog> {
        self.catalogs.get(runtime)
    }
}
