//! PHP: run the application's composer build script.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::core::context::{BuildContext, DetectContext};
use crate::core::error::{BuildError, Classify};
use crate::core::plugin::{DetectOutcome, Plugin, PluginId};
use crate::util::fs::replace_dir;
use crate::util::hash::Fingerprint;
use crate::util::process::ExecParams;
use crate::util::shell::Status;

const COMPOSER_JSON: &str = "composer.json";
const COMPOSER_LOCK: &str = "composer.lock";
const VENDOR: &str = "vendor";

/// Script entry in composer.json that this plugin runs.
pub const BUILD_SCRIPT: &str = "packhand-build";

const CACHE_TAG: &str = "composer-build dependencies";

/// Dev dependencies are never installed for the build script.
const INSTALL_FLAGS: &[&str] = &["--no-dev", "--no-progress", "--no-suggest", "--no-interaction"];

#[derive(Debug, Default, Deserialize)]
struct ComposerJson {
    #[serde(default)]
    scripts: BTreeMap<String, serde_json::Value>,
}

impl ComposerJson {
    /// Whether a script is declared with a non-empty body.
    fn has_script(&self, name: &str) -> bool {
        match self.scripts.get(name) {
            Some(serde_json::Value::String(s)) => !s.trim().is_empty(),
            Some(serde_json::Value::Array(items)) => !items.is_empty(),
            _ => false,
        }
    }
}

/// Runs `composer run-script packhand-build` with production dependencies.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComposerPlugin;

impl ComposerPlugin {
    fn read_manifest(ctx: &DetectContext<'_>) -> Result<ComposerJson, BuildError> {
        let contents = ctx.read_to_string(&[COMPOSER_JSON])?;
        serde_json::from_str(&contents).user_err(format!(
            "reading composer.json in {:?}",
            ctx.app_root().display().to_string()
        ))
    }

    fn install(ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
        let root = ctx.app_root();
        let mut fp = Fingerprint::new();
        fp.update_file(&root.join(COMPOSER_JSON))
            .and_then(|fp| fp.update_file(&root.join(COMPOSER_LOCK)))
            .internal_err("fingerprinting composer files")?;
        let key = fp.finish();

        let entry = ctx.cache(CACHE_TAG, &key)?;
        let vendor = root.join(VENDOR);

        if entry.hit {
            ctx.log().status(Status::Cached, CACHE_TAG);
            return replace_dir(entry.path(), &vendor).internal_err("restoring cached vendor");
        }

        ctx.populate(&entry, |ctx, dir| {
            let params = ExecParams::new(["composer", "install"])
                .env("COMPOSER_NO_INTERACTION", "1");
            let params = INSTALL_FLAGS.iter().fold(params, |p, flag| p.arg(*flag));
            ctx.exec_user(params)?;

            if vendor.is_dir() {
                replace_dir(&vendor, dir).internal_err("caching vendor")?;
            }
            Ok(())
        })
    }
}

impl Plugin for ComposerPlugin {
    fn id(&self) -> PluginId {
        PluginId::ComposerBuild
    }

    fn runtime(&self) -> &'static str {
        "php"
    }

    fn detect(&self, ctx: &DetectContext<'_>) -> Result<DetectOutcome, BuildError> {
        if !ctx.file_exists(&[COMPOSER_JSON]) {
            return Ok(DetectOutcome::opt_out("composer.json not found."));
        }

        let manifest = Self::read_manifest(ctx)?;
        if !manifest.has_script(BUILD_SCRIPT) {
            return Ok(DetectOutcome::opt_out(format!(
                "{} script not found in composer.json.",
                BUILD_SCRIPT
            )));
        }

        Ok(DetectOutcome::Pass)
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
        Self::install(ctx).map_err(|e| {
            let message = format!("composer install: {}", e.message());
            BuildError::new(e.kind(), message).with_source(e)
        })?;

        ctx.exec_user(ExecParams::new([
            "composer",
            "run-script",
            "--timeout=600",
            "--no-dev",
            BUILD_SCRIPT,
        ]))?;

        ctx.remove_all(&[VENDOR])
    }
}
