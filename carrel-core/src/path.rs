//! Resource path parsing.
//!
//! A raw path is a slash-separated resource path optionally followed by
//! `;`-separated parameters, e.g. `/a/b;version:3` or `/a/b;comments:12`.
//! The portion before the first `;` is the resource path proper; the rest
//! is the fragment.

use crate::{PATH_SEPARATOR, ROOT_PATH};

/// Parameter naming an archived version.
pub const VERSION_PARAMETER: &str = "version";

/// Parameter naming a comment on a resource.
pub const COMMENTS_PARAMETER: &str = "comments";

/// A parsed resource path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourcePath {
    raw: String,
    path: String,
    fragment_start: usize,
    parameters: Vec<(String, Option<String>)>,
}

impl ResourcePath {
    /// Parse a raw path. Parsing never fails; malformed parameters are kept
    /// verbatim as keys without values.
    pub fn parse(raw: &str) -> Self {
        let fragment_start = raw.find(';').unwrap_or(raw.len());
        let path = normalize(&raw[..fragment_start]);
        let parameters = raw[fragment_start..]
            .split(';')
            .filter(|p| !p.is_empty())
            .map(|p| match p.split_once(':') {
                Some((key, value)) => (key.to_string(), Some(value.to_string())),
                None => (p.to_string(), None),
            })
            .collect();

        Self {
            raw: raw.to_string(),
            path,
            fragment_start,
            parameters,
        }
    }

    /// The string this path was parsed from.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The normalized resource path, without parameters.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Everything after the resource path in the raw string, including the
    /// leading `;`. Empty when there are no parameters.
    pub fn fragment(&self) -> &str {
        &self.raw[self.fragment_start..]
    }

    pub fn parameters(&self) -> &[(String, Option<String>)] {
        &self.parameters
    }

    /// Value of the first parameter with the given key.
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn has_parameter(&self, key: &str) -> bool {
        self.parameters.iter().any(|(k, _)| k == key)
    }

    /// True unless the path designates an archived version.
    pub fn is_current_version(&self) -> bool {
        !self.has_parameter(VERSION_PARAMETER)
    }

    pub fn version(&self) -> Option<u64> {
        self.parameter(VERSION_PARAMETER)?.parse().ok()
    }

    pub fn comment_id(&self) -> Option<u64> {
        self.parameter(COMMENTS_PARAMETER)?.parse().ok()
    }

    /// The resource path with the version parameter, if one was given.
    pub fn path_with_version(&self) -> String {
        match self.version() {
            Some(v) => versioned(&self.path, v),
            None => self.path.clone(),
        }
    }
}

impl std::fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

// ============================================================================
// PATH HELPERS
// ============================================================================

/// Normalize a resource path: leading separator, no empty components, no
/// trailing separator except for the root.
pub fn normalize(path: &str) -> String {
    let components: Vec<&str> = path
        .trim()
        .split(PATH_SEPARATOR)
        .filter(|c| !c.is_empty())
        .collect();
    if components.is_empty() {
        return ROOT_PATH.to_string();
    }
    let mut out = String::with_capacity(path.len() + 1);
    for component in components {
        out.push(PATH_SEPARATOR);
        out.push_str(component);
    }
    out
}

pub fn is_root(path: &str) -> bool {
    path == ROOT_PATH
}

/// Parent of a normalized path; `None` for the root.
pub fn parent(path: &str) -> Option<String> {
    if is_root(path) {
        return None;
    }
    match path.rfind(PATH_SEPARATOR) {
        Some(0) | None => Some(ROOT_PATH.to_string()),
        Some(idx) => Some(path[..idx].to_string()),
    }
}

/// Last component of a normalized path.
pub fn name(path: &str) -> &str {
    match path.rfind(PATH_SEPARATOR) {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

pub fn join(parent: &str, child: &str) -> String {
    let child = child.trim_start_matches(PATH_SEPARATOR);
    if is_root(parent) {
        format!("/{}", child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Strict descendant test on normalized paths.
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    if is_root(ancestor) {
        return !is_root(path);
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path[ancestor.len()..].starts_with(PATH_SEPARATOR)
}

/// Every ancestor of a normalized path, nearest first, ending at the root.
pub fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = parent(path);
    while let Some(p) = current {
        current = parent(&p);
        out.push(p);
    }
    out
}

/// `path` re-addressed from under `from` to under `to`; `None` when `path`
/// is outside `from`.
pub fn rebase(path: &str, from: &str, to: &str) -> Option<String> {
    let rest = if path == from {
        ""
    } else if is_descendant(path, from) {
        if is_root(from) {
            path
        } else {
            &path[from.len()..]
        }
    } else {
        return None;
    };
    if rest.is_empty() {
        Some(to.to_string())
    } else if is_root(to) {
        Some(rest.to_string())
    } else {
        Some(format!("{}{}", to, rest))
    }
}

/// A path with a version parameter appended.
pub fn versioned(path: &str, version: u64) -> String {
    format!("{};{}:{}", path, VERSION_PARAMETER, version)
}

/// Resolve `path` against a chroot base. Parameters are carried through.
pub fn absolute_path(chroot: Option<&str>, path: &str) -> String {
    let base = match chroot {
        Some(base) if !base.is_empty() && !is_root(base) => base.trim_end_matches(PATH_SEPARATOR),
        _ => return path.to_string(),
    };
    if path.is_empty() || is_root(path) {
        base.to_string()
    } else if path.starts_with(PATH_SEPARATOR) {
        format!("{}{}", base, path)
    } else if path.starts_with(';') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Inverse of [`absolute_path`]. Paths outside the chroot come back unchanged.
pub fn relative_path(chroot: Option<&str>, path: &str) -> String {
    let base = match chroot {
        Some(base) if !base.is_empty() && !is_root(base) => base.trim_end_matches(PATH_SEPARATOR),
        _ => return path.to_string(),
    };
    if path == base {
        return ROOT_PATH.to_string();
    }
    match path.strip_prefix(base) {
        Some(rest) if rest.starts_with(PATH_SEPARATOR) => rest.to_string(),
        Some(rest) if rest.starts_with(';') => format!("{}{}", ROOT_PATH, rest),
        _ => path.to_string(),
    }
}

// =============================================================================
// TESTS
// =============================================================================
