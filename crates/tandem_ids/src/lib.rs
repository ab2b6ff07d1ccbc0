//! Identifier wrappers shared across Tandem crates.
//!
//! Proposal ids travel out to reviewers and come back through
//! `resolve_proposal`, so parsing is strict: anything that is not a UUID is
//! rejected before it reaches the approval store.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Error returned when parsing a UUID-backed identifier fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdParseError {
    label: &'static str,
    input: String,
    reason: String,
}

impl IdParseError {
    fn new(label: &'static str, input: &str, reason: impl Into<String>) -> Self {
        Self {
            label,
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    /// The offending input, as given by the caller.
    pub fn input(&self) -> &str {
        &self.input
    }
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {} '{}': {}", self.label, self.input, self.reason)
    }
}

impl std::error::Error for IdParseError {}

macro_rules! define_uuid_id {
    ($(#[$meta:meta])* $name:ident, $label:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Parse and canonicalise (lowercase, hyphenated).
            pub fn parse(value: &str) -> Result<Self, IdParseError> {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return Err(IdParseError::new($label, value, "empty identifier"));
                }
                let uuid = Uuid::parse_str(trimmed)
                    .map_err(|e| IdParseError::new($label, value, e.to_string()))?;
                Ok(Self(uuid.hyphenated().to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_uuid_id!(
    /// Identifies one generated SQL proposal for its whole lifecycle.
    ProposalId,
    "proposal ID"
);
define_uuid_id!(
    /// Correlates log lines emitted while handling a single query.
    RequestId,
    "request ID"
);
