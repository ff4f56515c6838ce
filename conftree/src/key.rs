//! Ordering key for group and parameter names.
//!
//! Names may carry a numeric suffix separated by a colon (`sensor:0`,
//! `sensor:1`, ...), the convention used for parameters that allow multiple
//! values. Keys with the same base and a numeric suffix compare by the
//! numeric value of the suffix, so `sensor:1 == sensor:01` and
//! `sensor:3 < sensor:13`. Everything else compares lexically.

use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Default)]
pub struct ConfigKey(String);

impl ConfigKey {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn split_suffix(s: &str) -> (&str, Option<&str>) {
    match s.find(':') {
        Some(idx) => (&s[..idx], Some(&s[idx + 1..])),
        None => (s, None),
    }
}

impl Ord for ConfigKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let (base_a, suffix_a) = split_suffix(&self.0);
        let (base_b, suffix_b) = split_suffix(&other.0);

        match (suffix_a, suffix_b) {
            (Some(sa), Some(sb)) if base_a == base_b => {
                match (sa.parse::<u64>(), sb.parse::<u64>()) {
                    (Ok(na), Ok(nb)) => na.cmp(&nb),
                    // Numeric suffixes sort before non-numeric ones
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => sa.cmp(sb),
                }
            }
            _ => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for ConfigKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Equality must stay consistent with the ordering above, so it is defined in
// terms of it rather than derived.
impl PartialEq for ConfigKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ConfigKey {}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConfigKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ConfigKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> ConfigKey {
        ConfigKey::new(s)
    }

    #[test]
    fn test_numeric_suffix_equality() {
        assert_eq!(key("base:1"), key("base:01"));
        assert_eq!(key("base:10"), key("base:010"));
        assert_ne!(key("base:1"), key("base:2"));
        assert_ne!(key("base:1"), key("other:1"));
    }

    #[test]
    fn test_numeric_suffix_ordering() {
        assert!(key("base:3") < key("base:13"));
        assert!(key("base:2") > key("base:1"));
        assert!(key("base:0") < key("base:1"));
    }

    #[test]
    fn test_numeric_sorts_before_non_numeric() {
        assert!(key("base:7") < key("base:abc"));
        assert!(key("base:abc") > key("base:7"));
    }

    #[test]
    fn test_lexical_fallback() {
        assert!(key("alpha") < key("beta"));
        assert_eq!(key("alpha"), key("alpha"));
        assert_ne!(key("alpha"), key("alpha:"));
        // Different bases never compare numerically
        assert!(key("a:2") < key("b:1"));
    }

    #[test]
    fn test_plain_and_suffixed_mix() {
        assert_ne!(key("base"), key("base:0"));
        assert!(key("base") < key("base:0"));
    }
}
