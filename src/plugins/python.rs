//! Helpers shared by the Python plugins.

use std::sync::OnceLock;

use regex::Regex;

use crate::core::context::BuildContext;
use crate::core::error::BuildError;
use crate::util::process::ExecParams;
use crate::util::shell::Status;

/// The requirements file.
pub const REQUIREMENTS_TXT: &str = "requirements.txt";

/// The functions framework package name.
pub const FUNCTIONS_FRAMEWORK: &str = "functions-framework";

/// Whether a requirements file declares the functions framework, either by
/// name or as the `#egg=` of a VCS requirement.
pub fn contains_functions_framework(requirements: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?m)^functions-framework([\s\[<>=!~#;]|$)|#egg=functions-framework[ \t]*$").ok()
    });
    match re {
        Some(re) => re.is_match(requirements),
        None => false,
    }
}

/// Packages to install into a cache entry.
#[derive(Debug, Clone, Default)]
pub struct PipInstall {
    /// Install everything in `requirements.txt`
    pub requirements: bool,
    /// Extra packages by name
    pub packages: Vec<String>,
}

impl PipInstall {
    fn is_empty(&self) -> bool {
        !self.requirements && self.packages.is_empty()
    }
}

/// Install packages into the cache entry `tag`, reusing it when `key` is
/// unchanged, and expose the install directory on `PYTHONPATH`.
pub fn install_into_cache(
    ctx: &mut BuildContext<'_>,
    tag: &str,
    key: &str,
    install: &PipInstall,
) -> Result<(), BuildError> {
    if install.is_empty() {
        return Ok(());
    }

    let entry = ctx.cache(tag, key)?;
    if entry.hit {
        ctx.log().status(Status::Cached, tag);
    } else {
        ctx.populate(&entry, |ctx, dir| {
            let mut params = ExecParams::new(["python3", "-m", "pip", "install"])
                .arg("--upgrade")
                .arg("--no-warn-script-location")
                .arg("--target")
                .arg(dir.to_string_lossy())
                .env("PIP_DISABLE_PIP_VERSION_CHECK", "1");
            if install.requirements {
                params = params.arg("--requirement").arg(REQUIREMENTS_TXT);
            }
            for package in &install.packages {
                params = params.arg(package.as_str());
            }
            ctx.exec_user(params)?;
            Ok(())
        })?;
    }

    ctx.set_launch_env("PYTHONPATH", entry.path().to_string_lossy());
    Ok(())
}
