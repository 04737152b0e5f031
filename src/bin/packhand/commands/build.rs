//! `packhand build` command

use std::time::Duration;

use anyhow::Result;

use packhand::cache::CacheManager;
use packhand::core::error::ErrorKind;
use packhand::ops::lifecycle::{Lifecycle, LifecycleOutcome};
use packhand::util::diagnostic::{emit, suggestions, Diagnostic};
use packhand::util::process::SystemRunner;

use crate::cli::{BuildArgs, Output};

pub fn execute(args: BuildArgs, output: &Output) -> Result<i32> {
    let mut config = super::load_config(&args.app.app, args.policy.as_deref())?;
    if let Some(secs) = args.timeout {
        config.timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    if args.stream {
        config.stream = true;
    }
    if let Some(dir) = args.cache_dir {
        config.cache_dir = dir;
    }
    let only = super::parse_plugin(args.plugin.as_deref())?;

    let log = super::build_log(output);
    let runner = SystemRunner::new();
    let cache = CacheManager::new(&config.cache_dir);

    let mut lifecycle = Lifecycle::new(&config, &log, &runner, &cache);
    if let Some(id) = only {
        lifecycle = lifecycle.only(id);
    }

    let outcome = lifecycle.run();
    let code = outcome.exit_code();

    match outcome {
        LifecycleOutcome::Built {
            summary,
            launch_file,
            ..
        } => {
            for cache in &summary.caches {
                tracing::debug!(tag = %cache.tag, hit = cache.hit, "cache");
            }
            if let Some(entrypoint) = &summary.entrypoint {
                println!("entrypoint: {}", entrypoint);
            }
            if let Some(path) = launch_file {
                tracing::info!("wrote {}", path.display());
            }
        }
        LifecycleOutcome::NothingApplies(_) => {
            let note = Diagnostic::note("no plugin applies to this application")
                .with_location(&config.app_root)
                .with_suggestion(suggestions::NOTHING_APPLIES);
            emit(&note, log.use_color());
        }
        LifecycleOutcome::Failed { error, .. } => {
            if log.is_verbose() && error.kind() == ErrorKind::Internal {
                eprintln!("{:?}", miette::Report::new(error));
            } else {
                let diag = error
                    .to_diagnostic()
                    .with_suggestion(suggestions::BUILD_FAILED);
                emit(&diag, log.use_color());
            }
        }
    }

    Ok(code)
}
