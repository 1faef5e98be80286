// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Path resolution helpers shared by every runtime.
//!
//! Inputs may carry `~`, `~user`, Windows drive letters, or backslashes.
//! Remote runtimes pass the cached remote home; local runtimes pass the
//! current user's. Resolution never requires the target to exist.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    /// `~` present but no home directory is known for the runtime.
    #[error("path_unknown_home: cannot expand {path:?} without a home directory")]
    UnknownHome { path: String },
    /// Host path with no equivalent inside the container workspace.
    #[error("path_outside_workspace: {path:?} does not map into the workspace")]
    OutsideWorkspace { path: String },
}

/// Expand `~` and `~user` against the runtime's home directory.
///
/// Absolute and relative paths pass through untouched. `~user` resolves as a
/// sibling of the known home (`/home/alice` + `~bob` → `/home/bob`).
pub fn expand_tilde(path: &str, home: Option<&Path>) -> Result<PathBuf, PathError> {
    if !path.starts_with('~') {
        return Ok(PathBuf::from(path));
    }
    let home = home.ok_or_else(|| PathError::UnknownHome { path: path.to_string() })?;

    if path == "~" {
        return Ok(home.to_path_buf());
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return Ok(home.join(rest));
    }

    // ~user or ~user/rest
    let without_tilde = &path[1..];
    let (user, rest) = match without_tilde.split_once('/') {
        Some((user, rest)) => (user, Some(rest)),
        None => (without_tilde, None),
    };
    let users_root = home
        .parent()
        .ok_or_else(|| PathError::UnknownHome { path: path.to_string() })?;
    let mut resolved = users_root.join(user);
    if let Some(rest) = rest {
        resolved = resolved.join(rest);
    }
    Ok(resolved)
}

/// Resolve `target` relative to `base`.
///
/// `"."` means base itself. `~`-prefixed targets are returned untouched —
/// collapsing them here would bake in the wrong user's home when the command
/// later runs remotely.
pub fn normalize_against(target: &str, base: &Path) -> PathBuf {
    if target == "." {
        return base.to_path_buf();
    }
    if target.starts_with('~') {
        return PathBuf::from(target);
    }
    let path = Path::new(target);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    base.join(path)
}

/// True for backslashed or drive-lettered paths that cannot be a container
/// working directory. Callers fall back to the workspace folder.
pub fn looks_windowsish(path: &str) -> bool {
    if path.contains('\\') {
        return true;
    }
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

/// Map a host path into a Dev Container.
///
/// Backslashes are normalized first so Windows hosts map cleanly. Paths
/// outside the current workspace have no container equivalent.
pub fn map_host_path_to_container(
    host_path: &str,
    host_workspace: &Path,
    container_workspace_folder: &str,
) -> Option<String> {
    let normalized = host_path.replace('\\', "/");
    let workspace = host_workspace.to_string_lossy().replace('\\', "/");

    let suffix = normalized.strip_prefix(&workspace)?;
    if !suffix.is_empty() && !suffix.starts_with('/') {
        // Prefix ended mid-component (/srv/app vs /srv/app2).
        return None;
    }
    let folder = container_workspace_folder.trim_end_matches('/');
    Some(format!("{}{}", folder, suffix))
}

/// Quote a path for interpolation into a container shell command.
///
/// `~`-prefixed paths become `"$HOME/suffix"` so the substitution happens in
/// the container's shell, not on the host.
pub fn quote_for_container(path: &str) -> String {
    if path == "~" {
        return "\"$HOME\"".to_string();
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return format!("\"$HOME/{}\"", escape_double_quoted(rest));
    }
    format!("'{}'", path.replace('\'', r"'\''"))
}

fn escape_double_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
#[path = "paths_tests.rs"]
mod tests;
