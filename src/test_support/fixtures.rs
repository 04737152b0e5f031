//! Test fixtures: application trees and a plugin harness.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::cache::CacheManager;
use crate::core::context::{BuildContext, BuildSummary, DetectContext};
use crate::core::error::BuildError;
use crate::core::plugin::{DetectOutcome, Plugin};
use crate::util::config::{BuildConfig, BuildEnv};
use crate::util::fs::list_tree;
use crate::util::shell::BuildLog;

use super::ScriptedRunner;

/// Fixture for an application source tree.
#[derive(Debug, Clone, Default)]
pub struct AppFixture {
    /// Files (path relative to app root -> content).
    pub files: BTreeMap<PathBuf, String>,
    /// Empty directories.
    pub dirs: Vec<PathBuf>,
}

impl AppFixture {
    /// Create an empty app.
    pub fn new() -> Self {
        AppFixture::default()
    }

    /// A PHP app whose composer.json declares `scripts`.
    pub fn composer(scripts: &[(&str, &str)]) -> Self {
        AppFixture::new().with_file("composer.json", manifests::composer_json(scripts))
    }

    /// A Rails app with uncompiled assets.
    pub fn rails() -> Self {
        AppFixture::new()
            .with_file("bin/rails", "#!/usr/bin/env ruby\n")
            .with_file("Gemfile", "source 'https://rubygems.org'\ngem 'rails'\n")
            .with_file("app/assets/stylesheets/application.css", "body {}\n")
    }

    /// A Node.js app.
    pub fn npm() -> Self {
        AppFixture::new().with_file("package.json", manifests::package_json("app"))
    }

    /// A Python app with `main.py` and the given requirements.
    pub fn python(requirements: Option<&str>) -> Self {
        let app = AppFixture::new().with_file("main.py", "def main(request):\n    return 'ok'\n");
        match requirements {
            Some(reqs) => app.with_file("requirements.txt", reqs),
            None => app,
        }
    }

    /// Add a file.
    pub fn with_file(mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }

    /// Add an empty directory.
    pub fn with_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.dirs.push(path.into());
        self
    }

    /// Write this fixture to a real directory.
    pub fn write_to(&self, base_path: &Path) -> std::io::Result<()> {
        for dir in &self.dirs {
            std::fs::create_dir_all(base_path.join(dir))?;
        }
        for (rel_path, content) in &self.files {
            let full_path = base_path.join(rel_path);
            if let Some(parent) = full_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&full_path, content)?;
        }
        Ok(())
    }

    /// Write this fixture to a fresh temporary directory.
    pub fn create(&self) -> TempDir {
        let tmp = TempDir::new().expect("failed to create temp dir");
        self.write_to(tmp.path()).expect("failed to write fixture");
        tmp
    }
}

/// Common manifest templates.
pub mod manifests {
    /// A composer.json with the given scripts.
    pub fn composer_json(scripts: &[(&str, &str)]) -> String {
        let scripts: serde_json::Map<String, serde_json::Value> = scripts
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect();
        serde_json::json!({
            "name": "example/app",
            "require": { "php": ">=7.4" },
            "scripts": scripts,
        })
        .to_string()
    }

    /// A minimal package.json.
    pub fn package_json(name: &str) -> String {
        serde_json::json!({
            "name": name,
            "version": "1.0.0",
            "scripts": { "start": "node index.js" },
        })
        .to_string()
    }
}

/// Everything a plugin needs, backed by a temporary app directory.
pub struct Harness {
    pub app: TempDir,
    pub cache_root: TempDir,
    pub config: BuildConfig,
    pub log: BuildLog,
    pub runner: ScriptedRunner,
}

impl Harness {
    /// Create a harness for a fixture with no environment.
    pub fn new(fixture: &AppFixture) -> Self {
        Harness::with_env(fixture, BuildEnv::default())
    }

    /// Create a harness with an application environment.
    pub fn with_env(fixture: &AppFixture, env: BuildEnv) -> Self {
        let app = fixture.create();
        let cache_root = TempDir::new().expect("failed to create temp dir");
        let mut config = BuildConfig::new(app.path()).with_env(env);
        config.cache_dir = cache_root.path().to_path_buf();
        config.output_dir = cache_root.path().join("output");
        Harness {
            app,
            cache_root,
            config,
            log: BuildLog::capture(),
            runner: ScriptedRunner::new(),
        }
    }

    /// Replace the scripted runner.
    pub fn runner(mut self, runner: ScriptedRunner) -> Self {
        self.runner = runner;
        self
    }

    /// Application root.
    pub fn root(&self) -> &Path {
        self.app.path()
    }

    /// Run a plugin's detect phase.
    pub fn detect(&self, plugin: &dyn Plugin) -> Result<DetectOutcome, BuildError> {
        plugin.detect(&DetectContext::new(&self.config, &self.log))
    }

    /// Run a plugin's build phase with a cache rooted in the harness.
    pub fn build(&self, plugin: &dyn Plugin) -> Result<BuildSummary, BuildError> {
        let cache = CacheManager::new(&self.config.cache_dir);
        let mut ctx = BuildContext::new(plugin.id(), &self.config, &self.log, &self.runner, &cache);
        plugin.build(&mut ctx)?;
        Ok(ctx.into_summary())
    }

    /// Sorted listing of the app tree.
    pub fn tree(&self) -> Vec<PathBuf> {
        list_tree(self.root()).expect("failed to list app tree")
    }

    /// Whether the log captured a line containing `needle`.
    pub fn logged(&self, needle: &str) -> bool {
        self.log.captured().iter().any(|line| line.contains(needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_write() {
        let app = AppFixture::rails().with_dir("public").create();
        assert!(app.path().join("bin/rails").is_file());
        assert!(app.path().join("app/assets/stylesheets").is_dir());
        assert!(app.path().join("public").is_dir());
    }

    #[test]
    fn test_composer_manifest_has_scripts() {
        let json = manifests::composer_json(&[("packhand-build", "php build.php")]);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["scripts"]["packhand-build"], "php build.php");
    }
}
