//! Container image identity

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::DeckhandError;

const MAX_TAG_LEN: usize = 128;

/// Immutable image tag, derived from the commit that produced the image
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageTag(String);

impl ImageTag {
    /// Derive the tag for a commit. The commit SHA is used as-is so that the
    /// registry and the task definition always agree on what was built.
    pub fn from_commit(commit_sha: &str) -> Result<Self, DeckhandError> {
        Self::parse(commit_sha.trim())
    }

    fn parse(raw: &str) -> Result<Self, DeckhandError> {
        if raw.is_empty() {
            return Err(DeckhandError::ValidationError(
                "image tag cannot be empty".to_string(),
            ));
        }
        if raw.len() > MAX_TAG_LEN {
            return Err(DeckhandError::ValidationError(format!(
                "image tag longer than {} characters",
                MAX_TAG_LEN
            )));
        }
        if raw.eq_ignore_ascii_case("latest") {
            return Err(DeckhandError::ValidationError(
                "'latest' is mutable and cannot identify a deployment".to_string(),
            ));
        }
        if raw.starts_with(['.', '-']) {
            return Err(DeckhandError::ValidationError(format!(
                "image tag '{}' must start with a letter, digit or underscore",
                raw
            )));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(DeckhandError::ValidationError(format!(
                "invalid character '{}' in image tag '{}'",
                bad, raw
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ImageTag {
    type Error = DeckhandError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageTag> for String {
    fn from(tag: ImageTag) -> Self {
        tag.0
    }
}

/// Fully qualified image reference: `registry/repository:tag`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub registry: String,
    pub repository: String,
    pub tag: ImageTag,
}

impl ImageRef {
    pub fn new(registry: impl Into<String>, repository: impl Into<String>, tag: ImageTag) -> Self {
        Self {
            registry: registry.into().trim_end_matches('/').to_string(),
            repository: repository.into(),
            tag,
        }
    }

    /// Repository path without the tag
    pub fn name(&self) -> String {
        if self.registry.is_empty() {
            self.repository.clone()
        } else {
            format!("{}/{}", self.registry, self.repository)
        }
    }

    /// Reference as written into a task definition
    pub fn uri(&self) -> String {
        format!("{}:{}", self.name(), self.tag)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

/// Content digest of a built image (`sha256:<hex>`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageDigest(pub String);

impl ImageDigest {
    pub fn from_sha256_hex(hex: &str) -> Self {
        if hex.starts_with("sha256:") {
            Self(hex.to_string())
        } else {
            Self(format!("sha256:{}", hex))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
