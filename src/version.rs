//! Semantic versions of APIs under test (`major.minor.patch[-rcN]`).

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid semantic version: {0:?}")]
pub struct VersionError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemanticVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub release_candidate: Option<u32>,
}

impl SemanticVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch, release_candidate: None }
    }

    pub fn parse(text: &str) -> Result<Self, VersionError> {
        let err = || VersionError(text.to_string());
        let text = text.trim();
        let text = text.strip_prefix('v').unwrap_or(text);
        let (numbers, rc) = match text.split_once('-') {
            Some((n, suffix)) => {
                let rc = suffix.strip_prefix("rc").ok_or_else(err)?;
                (n, Some(rc.parse::<u32>().map_err(|_| err())?))
            }
            None => (text, None),
        };
        let parts: Vec<&str> = numbers.split('.').collect();
        if parts.len() != 3 {
            return Err(err());
        }
        let parse = |s: &str| s.parse::<u32>().map_err(|_| err());
        Ok(Self {
            major: parse(parts[0])?,
            minor: parse(parts[1])?,
            patch: parse(parts[2])?,
            release_candidate: rc,
        })
    }

    pub fn is_release_candidate(&self) -> bool {
        self.release_candidate.is_some()
    }

    /// Same major version and not older than `other`.
    pub fn is_compatible_with(&self, other: &SemanticVersion) -> bool {
        self.major == other.major && self >= other
    }
}

impl Ord for SemanticVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (self.release_candidate, other.release_candidate) {
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(&b),
            })
    }
}

impl PartialOrd for SemanticVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(rc) = self.release_candidate {
            write!(f, "-rc{}", rc)?;
        }
        Ok(())
    }
}

impl FromStr for SemanticVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
