//! Normalization of caller-supplied directory references and file keys

use std::path::{Component, Path};

/// Normalize a directory reference relative to the photo root.
///
/// Returns a `/`-separated path without leading or trailing slashes, or the
/// empty string for the root itself. Anything that could name a location
/// outside the root degrades to the root instead of failing.
pub fn sanitize_relative_dir(input: &str) -> String {
    normalize(input).unwrap_or_default()
}

/// Normalize a file key relative to the photo root.
///
/// Same rules as [`sanitize_relative_dir`], but a rejected or empty key yields
/// `None` since there is no sensible fallback file.
pub fn sanitize_relative_key(input: &str) -> Option<String> {
    normalize(input).filter(|key| !key.is_empty())
}

fn normalize(input: &str) -> Option<String> {
    let replaced = input.replace('\\', "/");
    let trimmed = replaced.trim().trim_start_matches('/');

    if trimmed == "." || trimmed.split('/').any(|segment| segment == "..") {
        return None;
    }
    if escapes_root(trimmed) {
        return None;
    }

    let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
    let joined = trimmed
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/");
    Some(joined)
}

/// Whether joining `relative` onto a root could leave it (drive prefixes on Windows).
fn escapes_root(relative: &str) -> bool {
    Path::new(relative).components().any(|component| {
        matches!(
            component,
            Component::Prefix(_) | Component::RootDir | Component::ParentDir
        )
    })
}
