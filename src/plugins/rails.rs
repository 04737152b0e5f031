//! Ruby: precompile Rails assets.

use crate::core::context::{BuildContext, DetectContext};
use crate::core::error::BuildError;
use crate::core::plugin::{DetectOutcome, Plugin, PluginId};
use crate::util::process::ExecParams;

/// Manifests that mean assets were already compiled.
const COMPILED_MANIFESTS: &[&str] = &[
    "public/assets/manifest-*.json",
    "public/assets/.sprockets-manifest-*.json",
];

/// Runs `bin/rails assets:precompile` when the app ships uncompiled assets.
#[derive(Debug, Clone, Copy, Default)]
pub struct RailsAssetsPlugin;

impl RailsAssetsPlugin {
    fn needs_precompile(ctx: &DetectContext<'_>) -> Result<bool, BuildError> {
        if !ctx.file_exists(&["app", "assets"]) {
            return Ok(false);
        }
        if ctx.file_exists(&["public", "assets", "manifest.yml"]) {
            return Ok(false);
        }
        for pattern in COMPILED_MANIFESTS {
            if ctx.has_match(pattern)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Plugin for RailsAssetsPlugin {
    fn id(&self) -> PluginId {
        PluginId::RailsAssets
    }

    fn runtime(&self) -> &'static str {
        "ruby"
    }

    fn detect(&self, ctx: &DetectContext<'_>) -> Result<DetectOutcome, BuildError> {
        if !ctx.file_exists(&["bin", "rails"]) {
            return Ok(DetectOutcome::opt_out("bin/rails not found."));
        }
        if !Self::needs_precompile(ctx)? {
            return Ok(DetectOutcome::opt_out(
                "Rails assets do not need precompilation.",
            ));
        }
        Ok(DetectOutcome::Pass)
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
        ctx.logf("Running Rails asset precompilation");

        // Asset tasks commonly exit non-zero on harmless warnings.
        let params = ExecParams::new(["bundle", "exec", "bin/rails", "assets:precompile"])
            .env("RAILS_ENV", "production");
        let result = ctx.exec_tolerant(params)?;
        tracing::debug!(exit_code = result.exit_code, "asset precompilation finished");
        Ok(())
    }
}
