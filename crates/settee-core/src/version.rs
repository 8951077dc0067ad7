//! Server versions and API-compatibility directives.
//!
//! Servers report a semantic version triple; endpoint methods attach a
//! [`VersionSpan`] stating when the API surface appeared, when it was
//! deprecated and when it was removed. The dispatcher evaluates the
//! span against the client's configured expectation version once per
//! call, and evaluates `introduced` again per candidate connection.

use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::sync::Mutex;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CallError;

/// Semantic version triple as reported by a server's welcome document.
///
/// Suffixes after the patch segment ("3.3.3+fips") are tolerated and
/// ignored; missing segments count as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerVersion {
    major: u32,
    minor: u32,
    patch: u32,
}

impl ServerVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse "MAJOR.MINOR.PATCH", ignoring any non-digit tail per segment.
    pub fn parse(input: &str) -> Option<Self> {
        let mut segments = input.split('.');
        let major = leading_number(segments.next()?)?;
        let minor = segments.next().map_or(Some(0), leading_number)?;
        let patch = segments.next().map_or(Some(0), leading_number)?;
        Some(Self::new(major, minor, patch))
    }

    pub const fn major(self) -> u32 {
        self.major
    }

    pub const fn minor(self) -> u32 {
        self.minor
    }

    pub const fn patch(self) -> u32 {
        self.patch
    }
}

fn leading_number(segment: &str) -> Option<u32> {
    let digits: String = segment.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

impl Display for ServerVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Serialize for ServerVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ServerVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value)
            .ok_or_else(|| D::Error::custom(format!("not a server version: '{value}'")))
    }
}

/// Introduced/deprecated/removed bounds attached to a logical request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionSpan {
    pub introduced: Option<ServerVersion>,
    pub removed: Option<ServerVersion>,
    pub deprecated: Option<ServerVersion>,
}

impl VersionSpan {
    pub fn introduced(version: ServerVersion) -> Self {
        Self {
            introduced: Some(version),
            ..Self::default()
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.introduced.is_none() && self.removed.is_none() && self.deprecated.is_none()
    }

    /// Evaluate this span against the client's expectation version.
    ///
    /// `removed` is a hard failure. `deprecated` and a not-yet-available
    /// `introduced` emit a warning, deduplicated through the ledger.
    pub fn check(
        &self,
        expectation: Option<ServerVersion>,
        ledger: &WarningLedger,
    ) -> Result<(), CallError> {
        let Some(expectation) = expectation else {
            return Ok(());
        };

        if let Some(removed) = self.removed {
            if expectation >= removed {
                return Err(CallError::VersionIncompatible {
                    removed,
                    expectation,
                });
            }
        }

        if let Some(deprecated) = self.deprecated {
            if expectation >= deprecated {
                ledger.warn_once(format!(
                    "api is deprecated since {deprecated} (client expects {expectation})"
                ));
            }
        }

        if let Some(introduced) = self.introduced {
            if expectation < introduced {
                ledger.warn_once(format!(
                    "api was introduced in {introduced}, newer than the expected {expectation}"
                ));
            }
        }

        Ok(())
    }
}

/// Deduplicating sink for compatibility warnings.
///
/// Owned by the dispatcher and injectable in tests, so warning state
/// never leaks across clients.
#[derive(Debug, Default)]
pub struct WarningLedger {
    seen: Mutex<HashSet<String>>,
}

impl WarningLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `message` once; repeated identical messages are dropped.
    /// Returns whether the warning was actually emitted.
    pub fn warn_once(&self, message: impl Into<String>) -> bool {
        let message = message.into();
        let fresh = self.seen.lock().expect("ledger lock").insert(message.clone());
        if fresh {
            tracing::warn!(target: "settee::version", "{message}");
        }
        fresh
    }

    pub fn emitted(&self) -> usize {
        self.seen.lock().expect("ledger lock").len()
    }
}
