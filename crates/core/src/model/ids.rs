use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised when a string cannot be used as a `SectionId`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SectionIdError {
    #[error("section id is empty")]
    Empty,

    #[error("section id contains whitespace: {raw:?}")]
    Whitespace { raw: String },
}

/// Stable key identifying one trackable content section (e.g. `es6-const-let`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SectionId(String);

impl SectionId {
    /// Creates a new `SectionId` after trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns `SectionIdError::Empty` for blank input and
    /// `SectionIdError::Whitespace` if whitespace remains inside the key.
    pub fn new(raw: impl Into<String>) -> Result<Self, SectionIdError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SectionIdError::Empty);
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(SectionIdError::Whitespace { raw });
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the underlying key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SectionId {
    type Error = SectionIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SectionId> for String {
    fn from(id: SectionId) -> Self {
        id.0
    }
}

impl FromStr for SectionId {
    type Err = SectionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Debug for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SectionId({})", self.0)
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────
