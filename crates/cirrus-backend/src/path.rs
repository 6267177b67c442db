//! Slash-separated path helpers shared by all backends.
//!
//! Backend paths are always `/`-separated regardless of the host platform.
//! A normalized path:
//! - has no empty, `.` or `..` components
//! - has no trailing slash (except the root `/` itself)
//! - is absolute when it starts with `/`

use crate::error::{BackendError, BackendResult};

/// Lexically normalize a path.
///
/// `..` components that would climb above the root of an absolute path are
/// dropped; in a relative path they are kept. An empty result is `"."`.
pub fn clean(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(last) if *last != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

pub fn is_abs(path: &str) -> bool {
    path.starts_with('/')
}

/// Normalize `path` and require it to be absolute.
pub fn absolute(path: &str) -> BackendResult<String> {
    if !is_abs(path) {
        return Err(BackendError::NonAbsolutePath {
            path: path.to_string(),
        });
    }
    Ok(clean(path))
}

/// Join two paths and normalize the result.
pub fn join(base: &str, rel: &str) -> String {
    if rel.is_empty() {
        return clean(base);
    }
    clean(&format!("{base}/{rel}"))
}

/// Parent directory of a normalized absolute path. The root is its own parent.
pub fn parent(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Last component of a path.
pub fn base(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Whether `path` lies strictly inside the subtree rooted at `ancestor`.
///
/// Both arguments must be normalized absolute paths.
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    if ancestor == "/" {
        return path != "/";
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

/// All ancestors of a normalized absolute path, from the root down, excluding
/// the path itself.
pub fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    if components.is_empty() {
        return out;
    }
    out.push("/".to_string());
    for component in &components[..components.len() - 1] {
        current.push('/');
        current.push_str(component);
        out.push(current.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn clean_examples() {
        assert_eq!(clean("/a/b/../c"), "/a/c");
        assert_eq!(clean("/a//b/./c/"), "/a/b/c");
        assert_eq!(clean("/../a"), "/a");
        assert_eq!(clean("a/../../b"), "../b");
        assert_eq!(clean(""), ".");
        assert_eq!(clean("/"), "/");
        assert_eq!(clean("//"), "/");
    }

    #[test]
    fn absolute_rejects_relative() {
        assert!(matches!(
            absolute("a/b"),
            Err(BackendError::NonAbsolutePath { .. })
        ));
        assert_eq!(absolute("/a/./b/").unwrap(), "/a/b");
    }

    #[test]
    fn parent_and_base() {
        assert_eq!(parent("/a/b/c"), "/a/b");
        assert_eq!(parent("/a"), "/");
        assert_eq!(parent("/"), "/");
        assert_eq!(base("/a/b/c.txt"), "c.txt");
        assert_eq!(base("/a/b/"), "b");
    }

    #[test]
    fn descendant_checks() {
        assert!(is_descendant("/a/b", "/a"));
        assert!(is_descendant("/a/b/a", "/a"));
        assert!(!is_descendant("/a", "/a"));
        assert!(!is_descendant("/ab", "/a"));
        assert!(!is_descendant("/c", "/a"));
        assert!(is_descendant("/x", "/"));
    }

    #[test]
    fn ancestors_of_nested_path() {
        assert_eq!(ancestors("/a/b/c"), vec!["/", "/a", "/a/b"]);
        assert!(ancestors("/").is_empty());
    }

    proptest! {
        #[test]
        fn clean_is_idempotent(segments in prop::collection::vec("[a-z.]{0,3}", 0..8)) {
            let raw = format!("/{}", segments.join("/"));
            let once = clean(&raw);
            prop_assert_eq!(clean(&once), once.clone());
            prop_assert!(once.starts_with('/'));
            prop_assert!(!once.contains("//"));
            prop_assert!(once == "/" || !once.ends_with('/'));
        }
    }
}
