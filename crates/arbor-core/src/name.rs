//! Qualified item names.
//!
//! Names are kept in their prefixed form (`jcr:primaryType`); namespace
//! resolution is outside this crate. [`Name::parse`] validates user input,
//! while `From<&str>` is an unchecked conversion for well-known constants.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::lexicon::RESIDUAL;

/// Characters that may never appear in a name.
const ILLEGAL: &[char] = &['/', '[', ']', '|', '*', '\t', '\n', '\r'];

/// A qualified item name such as `jcr:content` or `title`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Name(String);

impl Name {
    /// Parses and validates a name.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidName {
            name: s.to_string(),
            reason: reason.to_string(),
        };
        if s.is_empty() {
            return Err(invalid("empty"));
        }
        if s == "." || s == ".." {
            return Err(invalid("reserved"));
        }
        if let Some(c) = s.chars().find(|c| ILLEGAL.contains(c)) {
            return Err(invalid(&format!("illegal character {:?}", c)));
        }
        if s.matches(':').count() > 1 || s.starts_with(':') || s.ends_with(':') {
            return Err(invalid("malformed prefix"));
        }
        Ok(Name(s.to_string()))
    }

    /// The residual name `*` used by catch-all definitions.
    pub fn residual() -> Self {
        Name(RESIDUAL.to_string())
    }

    pub fn is_residual(&self) -> bool {
        self.0 == RESIDUAL
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespace prefix, if any.
    pub fn prefix(&self) -> Option<&str> {
        self.0.split_once(':').map(|(p, _)| p)
    }

    /// Name without its prefix.
    pub fn local_name(&self) -> &str {
        self.0.split_once(':').map(|(_, l)| l).unwrap_or(&self.0)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Name {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Name::parse(s)
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Name(s.to_string())
    }
}

impl Borrow<str> for Name {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Name {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Name {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_prefixed_and_plain() {
        assert_eq!(Name::parse("jcr:content").unwrap().prefix(), Some("jcr"));
        assert_eq!(Name::parse("jcr:content").unwrap().local_name(), "content");
        assert_eq!(Name::parse("title").unwrap().prefix(), None);
    }

    #[test]
    fn test_parse_rejects_illegal_characters() {
        for bad in ["", "a/b", "a[1]", "a|b", "*", "..", "a:b:c", ":a"] {
            assert!(Name::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_borrow_allows_str_lookup() {
        let mut map = std::collections::HashMap::new();
        map.insert(Name::from("jcr:uuid"), 1);
        assert_eq!(map.get("jcr:uuid"), Some(&1));
    }

    #[test]
    fn test_residual_name() {
        assert!(Name::residual().is_residual());
        assert!(!Name::from("x").is_residual());
    }
}
