//! Key path syntax.
//!
//! Paths are slash separated and rooted at `/`. Every segment is non-empty
//! and made of ASCII letters, digits, `.`, `_` or `-`. The root itself is
//! the bare `/`.

/// The root path.
pub const ROOT: &str = "/";

/// Errors that can occur while validating a path
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Path is empty
    #[error("path is empty")]
    Empty,
    /// Path does not start with '/'
    #[error("path '{0}' is not rooted at '/'")]
    NotRooted(String),
    /// Path has an empty segment (`//` or a trailing slash)
    #[error("path '{0}' has an empty segment")]
    EmptySegment(String),
    /// Segment contains a character outside `[A-Za-z0-9._-]`
    #[error("path '{path}' has invalid segment '{segment}'")]
    InvalidSegment { path: String, segment: String },
}

/// Validate a single path segment (the text between two slashes).
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-')
}

/// Validate a full path. The root `/` is valid.
pub fn validate(path: &str) -> Result<(), PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    if !path.starts_with('/') {
        return Err(PathError::NotRooted(path.to_string()));
    }
    if path == ROOT {
        return Ok(());
    }
    for segment in path[1..].split('/') {
        if segment.is_empty() {
            return Err(PathError::EmptySegment(path.to_string()));
        }
        if !is_valid_segment(segment) {
            return Err(PathError::InvalidSegment {
                path: path.to_string(),
                segment: segment.to_string(),
            });
        }
    }
    Ok(())
}

/// Join a parent path and a child segment or relative path.
///
/// ```
/// use paramz::path::join;
///
/// assert_eq!(join("/", "gain"), "/gain");
/// assert_eq!(join("/device", "gain"), "/device/gain");
/// assert_eq!(join("/device", "/tx/gain"), "/device/tx/gain");
/// ```
pub fn join(parent: &str, child: &str) -> String {
    let child = child.trim_start_matches('/');
    if child.is_empty() {
        return parent.to_string();
    }
    if parent == ROOT || parent.is_empty() {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Parent of a path, `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of a path, empty for the root.
pub fn leaf(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

/// Iterate over the segments of a path, root excluded.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Whether `path` lies strictly below `root`.
pub fn is_strictly_under(path: &str, root: &str) -> bool {
    if root == ROOT {
        return path != ROOT && path.starts_with('/');
    }
    path.len() > root.len() + 1 && path.starts_with(root) && path.as_bytes()[root.len()] == b'/'
}

/// Re-root `path` from `from` to `to`. Returns `None` unless `path` lies
/// strictly below `from`.
///
/// ```
/// use paramz::path::rebase;
///
/// assert_eq!(rebase("/x/gain", "/x", "/a").as_deref(), Some("/a/gain"));
/// assert_eq!(rebase("/gain", "/", "/b").as_deref(), Some("/b/gain"));
/// assert_eq!(rebase("/y/gain", "/x", "/a"), None);
/// ```
pub fn rebase(path: &str, from: &str, to: &str) -> Option<String> {
    if !is_strictly_under(path, from) {
        return None;
    }
    let relative = if from == ROOT { path } else { &path[from.len()..] };
    Some(join(to, relative))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_well_formed_paths() {
        assert!(validate("/").is_ok());
        assert!(validate("/device").is_ok());
        assert!(validate("/device/tx-1/gain_db.max").is_ok());
    }

    #[test]
    fn test_validate_rejects_malformed_paths() {
        assert_eq!(validate(""), Err(PathError::Empty));
        assert!(matches!(validate("device"), Err(PathError::NotRooted(_))));
        assert!(matches!(validate("/a//b"), Err(PathError::EmptySegment(_))));
        assert!(matches!(validate("/a/"), Err(PathError::EmptySegment(_))));
        assert!(matches!(
            validate("/a/b c"),
            Err(PathError::InvalidSegment { .. })
        ));
        assert!(matches!(
            validate("/a/ü"),
            Err(PathError::InvalidSegment { .. })
        ));
    }

    #[test]
    fn test_parent_and_leaf() {
        assert_eq!(parent("/"), None);
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/a/b/c"), Some("/a/b"));
        assert_eq!(leaf("/a/b/c"), "c");
        assert_eq!(leaf("/"), "");
    }

    #[test]
    fn test_strictly_under() {
        assert!(is_strictly_under("/a/b", "/a"));
        assert!(is_strictly_under("/a", "/"));
        assert!(!is_strictly_under("/a", "/a"));
        assert!(!is_strictly_under("/ab/c", "/a"));
        assert!(!is_strictly_under("/", "/"));
    }

    #[test]
    fn test_segments() {
        let parts: Vec<&str> = segments("/a/b/c").collect();
        assert_eq!(parts, vec!["a", "b", "c"]);
        assert_eq!(segments("/").count(), 0);
    }
}
