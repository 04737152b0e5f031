//! Python: serve a function with the functions framework.

use crate::core::context::{BuildContext, DetectContext};
use crate::core::error::BuildError;
use crate::core::plugin::{DetectOutcome, Plugin, PluginId};
use crate::util::config::ENV_FUNCTION_TARGET;
use crate::util::hash::Fingerprint;

use super::python::{self, PipInstall, FUNCTIONS_FRAMEWORK, REQUIREMENTS_TXT};

const CACHE_TAG: &str = "functions-framework packages";

/// Installs the functions framework and points the entrypoint at the target.
#[derive(Debug, Clone, Copy, Default)]
pub struct FunctionsFrameworkPlugin;

impl Plugin for FunctionsFrameworkPlugin {
    fn id(&self) -> PluginId {
        PluginId::FunctionsFramework
    }

    fn runtime(&self) -> &'static str {
        "python"
    }

    fn detect(&self, ctx: &DetectContext<'_>) -> Result<DetectOutcome, BuildError> {
        if !ctx.has_match("*.py")? {
            return Ok(DetectOutcome::opt_out("No .py files found."));
        }
        if ctx.env().function_target().is_none() {
            return Ok(DetectOutcome::opt_out(format!(
                "{} not set.",
                ENV_FUNCTION_TARGET
            )));
        }
        Ok(DetectOutcome::Pass)
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
        let target = ctx
            .env()
            .function_target()
            .ok_or_else(|| BuildError::user(format!("{} is required", ENV_FUNCTION_TARGET)))?;

        let requirements = if ctx.file_exists(&[REQUIREMENTS_TXT]) {
            Some(ctx.read_to_string(&[REQUIREMENTS_TXT])?)
        } else {
            None
        };

        let mut install = PipInstall {
            requirements: requirements.is_some(),
            packages: Vec::new(),
        };
        let declared = requirements
            .as_deref()
            .is_some_and(python::contains_functions_framework);
        if declared {
            ctx.logf("Handling functions with dependency on functions-framework.");
        } else {
            ctx.logf("Handling functions without dependency on functions-framework.");
            install.packages.push(FUNCTIONS_FRAMEWORK.to_string());
        }

        let mut fp = Fingerprint::new();
        fp.update_str(requirements.as_deref().unwrap_or(""))
            .update_strs(install.packages.iter().map(String::as_str));
        python::install_into_cache(ctx, CACHE_TAG, &fp.finish(), &install)?;

        ctx.set_entrypoint(format!("{} --target={}", FUNCTIONS_FRAMEWORK, target));
        Ok(())
    }
}
