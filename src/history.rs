// ABOUTME: Named-run library under $HOME/.mcp-stress/runs for saved NDJSON files
// ABOUTME: Validates names, lists saved runs, and removes them by name
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::io;
use std::path::{Path, PathBuf};

/// Directory under the home directory where named runs live
const RUNS_SUBDIR: &str = ".mcp-stress/runs";

/// Resolve the named-run directory from `HOME` (or `USERPROFILE`)
///
/// # Errors
///
/// Returns an error when neither variable is set.
pub fn runs_dir() -> Result<PathBuf, io::Error> {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "neither HOME nor USERPROFILE is set")
        })?;
    Ok(PathBuf::from(home).join(RUNS_SUBDIR))
}

/// True for names matching `[A-Za-z0-9_-]+`
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Path of a named run; validates the name first
///
/// # Errors
///
/// Returns an error for names outside `[A-Za-z0-9_-]+`.
pub fn run_path(name: &str) -> Result<PathBuf, io::Error> {
    if !is_valid_name(name) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid run name '{name}': use letters, digits, '-' and '_'"),
        ));
    }
    Ok(runs_dir()?.join(format!("{name}.ndjson")))
}

/// Copy an NDJSON file into the library under `name`
///
/// # Errors
///
/// Returns an error for an invalid name or on I/O failure.
pub fn save(name: &str, source: &Path) -> Result<PathBuf, io::Error> {
    let target = run_path(name)?;
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(source, &target)?;
    Ok(target)
}

/// Names of every saved run, sorted
///
/// # Errors
///
/// Returns an error on I/O failure; a missing directory lists as empty.
pub fn list() -> Result<Vec<String>, io::Error> {
    let dir = runs_dir()?;
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("ndjson") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_owned());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Delete a named run
///
/// # Errors
///
/// Returns an error when the name is invalid or the run does not exist.
pub fn remove(name: &str) -> Result<(), io::Error> {
    let path = run_path(name)?;
    if !path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no saved run named '{name}'"),
        ));
    }
    std::fs::remove_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation() {
        assert!(is_valid_name("baseline-2025_01"));
        assert!(is_valid_name("A1"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("has space"));
        assert!(!is_valid_name("dots.bad"));
        assert!(!is_valid_name("../escape"));
    }

    #[test]
    fn run_path_rejects_invalid_names() {
        assert!(run_path("../../etc/passwd").is_err());
    }
}
