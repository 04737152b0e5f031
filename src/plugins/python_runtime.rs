//! Python: validate the runtime version and install requirements.

use semver::Version;

use crate::core::context::{BuildContext, DetectContext};
use crate::core::error::BuildError;
use crate::core::plugin::{DetectOutcome, Plugin, PluginId};
use crate::core::version;
use crate::util::hash::Fingerprint;
use crate::util::process::ExecParams;

use super::python::{self, PipInstall, REQUIREMENTS_TXT};

const RUNTIME: &str = "python";
const CACHE_TAG: &str = "pip packages";
const DEFAULT_ENTRYPOINT: &str = "gunicorn -b :8080 main:app";

/// Resolves the Python version and installs `requirements.txt`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PythonRuntimePlugin;

impl PythonRuntimePlugin {
    /// Check the interpreter on PATH against the resolved version.
    ///
    /// A pinned version must match the installed series; an unpinned build
    /// only warns.
    fn check_interpreter(
        ctx: &mut BuildContext<'_>,
        wanted: &Version,
        pinned: bool,
    ) -> Result<Version, BuildError> {
        let result = ctx.exec_internal(ExecParams::new(["python3", "--version"]))?;
        let installed = version::parse_tool_output(&result.combined)?;

        if (installed.major, installed.minor) != (wanted.major, wanted.minor) {
            let message = format!(
                "Python {} is installed but {} was requested",
                installed, wanted
            );
            if pinned {
                return Err(BuildError::user(message));
            }
            ctx.warnf(message);
        }
        Ok(installed)
    }
}

impl Plugin for PythonRuntimePlugin {
    fn id(&self) -> PluginId {
        PluginId::PythonRuntime
    }

    fn runtime(&self) -> &'static str {
        RUNTIME
    }

    fn detect(&self, ctx: &DetectContext<'_>) -> Result<DetectOutcome, BuildError> {
        if ctx.file_exists(&[REQUIREMENTS_TXT]) || ctx.has_match("*.py")? {
            return Ok(DetectOutcome::Pass);
        }
        Ok(DetectOutcome::opt_out(
            "No .py files or requirements.txt found.",
        ))
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
        let pin = ctx.env().runtime_version();
        let wanted = ctx.source().catalog(RUNTIME)?.resolve(pin)?;
        ctx.logf(format!("Using Python {}.", wanted));

        let installed = Self::check_interpreter(ctx, &wanted, pin.is_some())?;

        if ctx.file_exists(&[REQUIREMENTS_TXT]) {
            let requirements = ctx.read_to_string(&[REQUIREMENTS_TXT])?;
            let mut fp = Fingerprint::new();
            fp.update_str(&requirements)
                .update_str(&format!("{}.{}", installed.major, installed.minor));
            let install = PipInstall {
                requirements: true,
                packages: Vec::new(),
            };
            python::install_into_cache(ctx, CACHE_TAG, &fp.finish(), &install)?;
        }

        let entrypoint = ctx.env().entrypoint().unwrap_or(DEFAULT_ENTRYPOINT);
        ctx.set_entrypoint(entrypoint);
        Ok(())
    }
}
