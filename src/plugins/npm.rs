//! Node.js: install dependencies with npm.

use semver::Version;

use crate::core::context::{BuildContext, DetectContext};
use crate::core::error::{BuildError, Classify};
use crate::core::plugin::{DetectOutcome, Plugin, PluginId};
use crate::core::version::{self, Behavior};
use crate::util::fs::replace_dir;
use crate::util::hash::Fingerprint;
use crate::util::process::ExecParams;
use crate::util::shell::Status;

const PACKAGE_JSON: &str = "package.json";

/// The npm lock file.
pub const PACKAGE_LOCK: &str = "package-lock.json";

const NODE_MODULES: &str = "node_modules";
const CACHE_TAG: &str = "npm modules";
const DEFAULT_ENTRYPOINT: &str = "npm start";

/// Oldest npm whose `ci` leaves an existing node_modules in place.
const MIN_CI_VERSION: Version = Version::new(6, 12, 1);

/// Installs `node_modules` with `npm ci` or `npm install`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NpmPlugin;

impl NpmPlugin {
    /// Generate a lock file when the app does not commit one.
    fn ensure_package_lock(ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
        if ctx.file_exists(&[PACKAGE_LOCK]) {
            return Ok(());
        }
        ctx.logf(format!("Generating {}.", PACKAGE_LOCK));
        ctx.warnf(format!(
            "*** Improve build performance by generating and committing {}.",
            PACKAGE_LOCK
        ));
        ctx.exec_user(ExecParams::new([
            "npm",
            "install",
            "--package-lock-only",
            "--quiet",
        ]))?;
        Ok(())
    }

    /// `ci` on npm >= 6.12.1, `install` before that.
    fn install_command(ctx: &mut BuildContext<'_>) -> Result<&'static str, BuildError> {
        let raw = ctx.exec_internal(ExecParams::new(["npm", "--version"]))?.stdout;
        let installed = version::parse(&raw)?;
        Ok(match version::select_behavior(&installed, &MIN_CI_VERSION) {
            Behavior::Modern => "ci",
            Behavior::Legacy => "install",
        })
    }
}

impl Plugin for NpmPlugin {
    fn id(&self) -> PluginId {
        PluginId::NpmInstall
    }

    fn runtime(&self) -> &'static str {
        "nodejs"
    }

    fn detect(&self, ctx: &DetectContext<'_>) -> Result<DetectOutcome, BuildError> {
        if !ctx.file_exists(&[PACKAGE_JSON]) {
            return Ok(DetectOutcome::opt_out("package.json not found."));
        }
        Ok(DetectOutcome::Pass)
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
        Self::ensure_package_lock(ctx)?;
        let command = Self::install_command(ctx)?;

        let root = ctx.app_root();
        let mut fp = Fingerprint::new();
        fp.update_file(&root.join(PACKAGE_LOCK))
            .internal_err("fingerprinting package-lock.json")?
            .update_str(command);
        let entry = ctx.cache(CACHE_TAG, &fp.finish())?;
        let node_modules = root.join(NODE_MODULES);

        if entry.hit {
            ctx.log().status(Status::Cached, CACHE_TAG);
            replace_dir(entry.path(), &node_modules).internal_err("restoring node_modules")?;
        } else {
            ctx.logf(format!("Installing application dependencies with npm {}.", command));
            ctx.populate(&entry, |ctx, dir| {
                ctx.exec_user(
                    ExecParams::new(["npm", command, "--quiet"]).env("NODE_ENV", "production"),
                )?;
                if node_modules.is_dir() {
                    replace_dir(&node_modules, dir).internal_err("caching node_modules")?;
                }
                Ok(())
            })?;
        }

        let entrypoint = ctx.env().entrypoint().unwrap_or(DEFAULT_ENTRYPOINT);
        ctx.set_entrypoint(entrypoint);
        Ok(())
    }
}
