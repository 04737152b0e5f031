//! Filesystem utilities.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::glob;
use walkdir::WalkDir;

/// Recursively copy a directory.
///
/// Symlinks are recreated as links with the same target, dangling ones
/// included, so relative links such as `node_modules/.bin` entries keep
/// pointing inside the copy.
pub fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)
        .with_context(|| format!("failed to create directory: {}", dst.display()))?;

    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.with_context(|| format!("failed to read directory: {}", src.display()))?;
        let src_path = entry.path();
        let dst_path = dst.join(relative_path(src, src_path));
        let ty = entry.file_type();

        if ty.is_symlink() {
            copy_symlink(src_path, &dst_path)?;
        } else if ty.is_dir() {
            fs::create_dir_all(&dst_path)
                .with_context(|| format!("failed to create directory: {}", dst_path.display()))?;
        } else {
            fs::copy(src_path, &dst_path).with_context(|| {
                format!(
                    "failed to copy {} to {}",
                    src_path.display(),
                    dst_path.display()
                )
            })?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let target = fs::read_link(src)
        .with_context(|| format!("failed to read link: {}", src.display()))?;
    std::os::unix::fs::symlink(&target, dst).with_context(|| {
        format!(
            "failed to link {} to {}",
            dst.display(),
            target.display()
        )
    })
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    if src.is_dir() {
        copy_dir_all(src, dst)
    } else if src.exists() {
        fs::copy(src, dst)
            .map(|_| ())
            .with_context(|| format!("failed to copy {} to {}", src.display(), dst.display()))
    } else {
        tracing::warn!("skipping dangling link {}", src.display());
        Ok(())
    }
}

/// Replace `dst` with a copy of `src`.
pub fn replace_dir(src: &Path, dst: &Path) -> Result<()> {
    remove_dir_all_if_exists(dst)?;
    copy_dir_all(src, dst)
}

/// Remove a file, link, or directory tree, if it exists.
///
/// Links are removed, never followed.
pub fn remove_all(path: &Path) -> Result<()> {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return Ok(());
    };
    if meta.is_dir() {
        fs::remove_dir_all(path)
            .with_context(|| format!("failed to remove directory: {}", path.display()))?;
    } else {
        fs::remove_file(path)
            .with_context(|| format!("failed to remove file: {}", path.display()))?;
    }
    Ok(())
}

/// Remove a directory and all its contents, if it exists.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    remove_all(path)
}

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Write a string to a file, creating parent directories if needed.
pub fn write_string(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    fs::write(path, contents)
        .with_context(|| format!("failed to write file: {}", path.display()))
}

/// Find paths matching a glob pattern relative to `base`.
///
/// Results are relative to `base` and sorted.
pub fn glob_relative(base: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full_pattern = base.join(pattern);
    let pattern_str = full_pattern.to_string_lossy();

    let mut results = Vec::new();
    for entry in glob(&pattern_str).with_context(|| format!("invalid glob pattern: {}", pattern))? {
        match entry {
            Ok(path) => results.push(relative_path(base, &path)),
            Err(e) => tracing::warn!("glob error: {}", e),
        }
    }

    results.sort();
    results.dedup();
    Ok(results)
}

/// List every path under `root`, relative and sorted.
pub fn list_tree(root: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        paths.push(relative_path(root, entry.path()));
    }
    paths.sort();
    Ok(paths)
}

/// Total size in bytes of the files under `root`.
pub fn dir_size(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}

/// Get the relative path from `base` to `path`.
pub fn relative_path(base: &Path, path: &Path) -> PathBuf {
    pathdiff::diff_paths(path, base).unwrap_or_else(|| path.to_path_buf())
}
