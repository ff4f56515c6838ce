//! Group path syntax.
//!
//! `/` separates group levels and `..` climbs to the parent group (the
//! parent of the root is the root itself). Empty segments are skipped, so
//! `a//b` and `a/b` name the same group. A valid group or parameter name is
//! non-empty and contains neither the separator nor the parent token.

use crate::error::{ConfigError, Result};

pub const GROUP_SEPARATOR: char = '/';
pub const PARENT_GROUP: &str = "..";

/// Validate a single group or parameter name.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(GROUP_SEPARATOR) && name != PARENT_GROUP
}

pub fn validate_name(name: &str) -> Result<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(ConfigError::InvalidName(name.to_owned()))
    }
}

/// Iterate the non-empty segments of a path.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(GROUP_SEPARATOR).filter(|s| !s.is_empty())
}

/// Split a path into its parent part and its last element.
///
/// Trailing separators are ignored; an empty or separator-only path yields
/// two empty parts.
pub fn split_last(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches(GROUP_SEPARATOR);
    match trimmed.rfind(GROUP_SEPARATOR) {
        Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
        None => ("", trimmed),
    }
}

/// Normalize a group path into a prefix ending with a single separator.
///
/// The empty path (the root group) stays empty.
pub fn as_prefix(path: &str) -> String {
    let trimmed = path.trim_end_matches(GROUP_SEPARATOR);
    if trimmed.is_empty() {
        String::new()
    } else {
        let mut prefix = trimmed.to_owned();
        prefix.push(GROUP_SEPARATOR);
        prefix
    }
}

/// Join a group path and a child name.
pub fn join(path: &str, name: &str) -> String {
    format!("{}{}", as_prefix(path), name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(is_valid_name("robot"));
        assert!(is_valid_name("sensor:0"));
        assert!(is_valid_name("."));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name(".."));
        assert!(!is_valid_name("a/b"));
        assert!(!is_valid_name("/"));
    }

    #[test]
    fn test_segments_skip_empty() {
        let segs: Vec<_> = segments("/a//b/").collect();
        assert_eq!(segs, vec!["a", "b"]);
        assert_eq!(segments("").count(), 0);
        assert_eq!(segments("///").count(), 0);
    }

    #[test]
    fn test_split_last() {
        assert_eq!(split_last("a/b/c"), ("a/b", "c"));
        assert_eq!(split_last("a"), ("", "a"));
        assert_eq!(split_last("/a"), ("", "a"));
        assert_eq!(split_last("a/b/"), ("a", "b"));
        assert_eq!(split_last(""), ("", ""));
        assert_eq!(split_last("///"), ("", ""));
    }

    #[test]
    fn test_prefix_and_join() {
        assert_eq!(as_prefix("a/b"), "a/b/");
        assert_eq!(as_prefix("a/b/"), "a/b/");
        assert_eq!(as_prefix(""), "");
        assert_eq!(join("", "x"), "x");
        assert_eq!(join("a", "x"), "a/x");
    }
}
