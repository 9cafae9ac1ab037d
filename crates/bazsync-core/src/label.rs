//! Build labels
//!
//! Labels identify build targets (`//pkg:name`, `@repo//pkg:name`). Synthetic
//! labels live in the reserved `@synthetic` repository and name libraries that
//! have no backing build target (e.g. jars surfaced by jdeps analysis).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Repository name reserved for synthetic labels
pub const SYNTHETIC_REPO: &str = "synthetic";

static LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:@@?(?P<repo>[A-Za-z0-9_.~+\-]*))?//(?P<pkg>[^:]*)(?::(?P<name>[^:]+))?$")
        .expect("label regex is valid")
});

/// Errors produced when parsing a label
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelError {
    #[error("invalid label '{0}'")]
    Invalid(String),

    #[error("label '{0}' has no target name and an empty package")]
    MissingName(String),
}

/// A canonical build label.
///
/// Stored in its canonical string form; `//foo/bar` is normalised to
/// `//foo/bar:bar`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Label(String);

impl Label {
    /// Parse and canonicalise a label string
    pub fn parse(raw: &str) -> Result<Self, LabelError> {
        let raw = raw.trim();
        let caps = LABEL_RE
            .captures(raw)
            .ok_or_else(|| LabelError::Invalid(raw.to_string()))?;

        let repo = caps.name("repo").map(|m| m.as_str());
        let pkg = caps.name("pkg").map(|m| m.as_str()).unwrap_or_default();
        let name = match caps.name("name") {
            Some(m) => m.as_str().to_string(),
            None => pkg
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| LabelError::MissingName(raw.to_string()))?
                .to_string(),
        };

        let canonical = match repo {
            Some(repo) => format!("@{repo}//{pkg}:{name}"),
            None => format!("//{pkg}:{name}"),
        };
        Ok(Self(canonical))
    }

    /// Create a synthetic label for a fabricated library
    pub fn synthetic(name: &str) -> Self {
        Self(format!("@{SYNTHETIC_REPO}//:{name}"))
    }

    /// Whether this label names a fabricated library
    pub fn is_synthetic(&self) -> bool {
        self.repo() == Some(SYNTHETIC_REPO)
    }

    /// Repository part, if the label is qualified
    pub fn repo(&self) -> Option<&str> {
        let rest = self.0.strip_prefix('@')?;
        rest.split("//").next()
    }

    /// Package path (without leading `//`)
    pub fn package(&self) -> &str {
        let after = self.0.split_once("//").map(|(_, r)| r).unwrap_or(&self.0);
        after.split_once(':').map(|(p, _)| p).unwrap_or(after)
    }

    /// Target name
    pub fn name(&self) -> &str {
        self.0.rsplit_once(':').map(|(_, n)| n).unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Label {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Label {
    type Error = LabelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        label.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical() {
        let label = Label::parse("//java/com/foo:lib").unwrap();
        assert_eq!(label.as_str(), "//java/com/foo:lib");
        assert_eq!(label.package(), "java/com/foo");
        assert_eq!(label.name(), "lib");
        assert_eq!(label.repo(), None);
    }

    #[test]
    fn test_parse_shorthand_adds_name() {
        let label = Label::parse("//java/com/foo").unwrap();
        assert_eq!(label.as_str(), "//java/com/foo:foo");
    }

    #[test]
    fn test_parse_external_repo() {
        let label = Label::parse("@maven//:com_google_guava_guava").unwrap();
        assert_eq!(label.repo(), Some("maven"));
        assert_eq!(label.package(), "");
        assert_eq!(label.name(), "com_google_guava_guava");

        let canonical = Label::parse("@@rules_jvm//src:lib").unwrap();
        assert_eq!(canonical.as_str(), "@rules_jvm//src:lib");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(Label::parse("foo:bar"), Err(LabelError::Invalid(_))));
        assert!(matches!(Label::parse("//:"), Err(LabelError::Invalid(_))));
        assert!(matches!(Label::parse("//"), Err(LabelError::MissingName(_))));
    }

    #[test]
    fn test_synthetic() {
        let label = Label::synthetic("guava.jar-1a2b3c4");
        assert!(label.is_synthetic());
        assert_eq!(label.name(), "guava.jar-1a2b3c4");
        assert!(!Label::parse("//a:b").unwrap().is_synthetic());

        // Round-trips through the parser unchanged
        assert_eq!(Label::parse(label.as_str()).unwrap(), label);
    }

    #[test]
    fn test_serde_as_string() {
        let label = Label::parse("//a/b").unwrap();
        let json = serde_json::to_string(&label).unwrap();
        assert_eq!(json, "\"//a/b:b\"");
        let back: Label = serde_json::from_str(&json).unwrap();
        assert_eq!(back, label);
        assert!(serde_json::from_str::<Label>("\"nope\"").is_err());
    }
}
