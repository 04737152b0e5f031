//! `packhand cache` command
//!
//! Inspect and clean the tagged build caches of an application.

use anyhow::Result;

use packhand::cache::CacheManager;

use crate::cli::{CacheArgs, CacheCommands, CacheTarget};

pub fn execute(args: CacheArgs) -> Result<i32> {
    let result = match args.command {
        CacheCommands::List(target) => list_cache(target),
        CacheCommands::Clean(target) => clean_cache(target),
        CacheCommands::Path(target) => show_path(target),
    };
    result.map(|()| 0)
}

fn open(target: CacheTarget) -> Result<CacheManager> {
    let config = super::load_config(&target.app.app, None)?;
    let root = target.cache_dir.unwrap_or(config.cache_dir);
    Ok(CacheManager::new(root))
}

/// List cache entries with their sizes.
fn list_cache(target: CacheTarget) -> Result<()> {
    let cache = open(target)?;
    println!("Cache directory: {}", cache.root().display());
    println!();

    let entries = cache.entries()?;
    if entries.is_empty() {
        println!("  (empty)");
        return Ok(());
    }

    let mut total: u64 = 0;
    for entry in &entries {
        total += entry.size;
        let state = if entry.complete { "" } else { "  (incomplete)" };
        println!(
            "  {:<32} {:>10}  {}{}",
            entry.tag,
            format_size(entry.size),
            short_key(&entry.key),
            state
        );
    }
    println!();
    println!("  Total: {}", format_size(total));
    Ok(())
}

fn clean_cache(target: CacheTarget) -> Result<()> {
    let cache = open(target)?;
    if cache.entries()?.is_empty() {
        eprintln!("     Nothing to clean");
        return Ok(());
    }
    cache.clear()?;
    eprintln!("     Removed {}", cache.root().display());
    Ok(())
}

fn show_path(target: CacheTarget) -> Result<()> {
    let cache = open(target)?;
    println!("{}", cache.root().display());
    Ok(())
}

fn short_key(key: &str) -> &str {
    key.get(..12).unwrap_or(key)
}

/// Format a size in bytes to a human-readable string.
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
