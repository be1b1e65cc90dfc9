//! Normalized slash-separated paths
//!
//! Every path handed to the resolver and cache goes through
//! [`normalize`] first so that `/a//b/`, `a/./b` and `/a/c/../b` all share
//! one cache key.

/// Normalize a path: leading slash, no trailing slash, no empty or `.`
/// segments, `..` pops a segment and stops at the root.
pub fn normalize(path: &str) -> String {
    let segments = segments(path);
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Split a path into its normalized segments
pub fn segments(path: &str) -> Vec<&str> {
    let mut out: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            name => out.push(name),
        }
    }
    out
}

pub fn is_root(path: &str) -> bool {
    segments(path).is_empty()
}

/// Split a path into its parent path and leaf name.
///
/// Returns `None` for the root, which has no leaf.
pub fn split_parent(path: &str) -> Option<(String, String)> {
    let mut segments = segments(path);
    let leaf = segments.pop()?.to_string();
    let parent = if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    };
    Some((parent, leaf))
}

/// Join `child` onto `base`. Absolute children replace the base.
pub fn join(base: &str, child: &str) -> String {
    if child.starts_with('/') {
        normalize(child)
    } else {
        normalize(&format!("{}/{}", base, child))
    }
}

/// True if `path` equals `prefix` or lies underneath it
pub fn is_within(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    path == prefix
        || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
}
