//! `packhand detect` command

use anyhow::Result;

use packhand::cache::CacheManager;
use packhand::core::error::{EXIT_NOT_APPLICABLE, EXIT_SUCCESS};
use packhand::ops::lifecycle::Lifecycle;
use packhand::util::diagnostic::emit;
use packhand::util::process::SystemRunner;

use crate::cli::{DetectArgs, Output};

pub fn execute(args: DetectArgs, output: &Output) -> Result<i32> {
    let config = super::load_config(&args.app.app, args.policy.as_deref())?;
    let only = super::parse_plugin(args.plugin.as_deref())?;
    let log = super::build_log(output);
    let runner = SystemRunner::new();
    let cache = CacheManager::new(&config.cache_dir);

    let mut lifecycle = Lifecycle::new(&config, &log, &runner, &cache);
    if let Some(id) = only {
        lifecycle = lifecycle.only(id);
    }

    let report = match lifecycle.detect() {
        Ok(report) => report,
        Err(err) => {
            emit(&err.to_diagnostic(), log.use_color());
            return Ok(err.exit_code());
        }
    };

    for plugin in &report.plugins {
        let marker = if report.selected == Some(plugin.id) { "*" } else { " " };
        println!("{} {:<20} {}", marker, plugin.id, plugin.state);
    }

    Ok(match report.selected {
        Some(_) => EXIT_SUCCESS,
        None => EXIT_NOT_APPLICABLE,
    })
}
