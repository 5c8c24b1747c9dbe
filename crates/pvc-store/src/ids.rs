//! Identifier types
//!
//! Records owned by the store are keyed by ULIDs (sortable by creation time).
//! Agents and users are owned by surrounding systems, so they are opaque strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Ulid);

        impl $name {
            /// Generate a new identifier
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
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

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ulid::from_string(s).map(Self)
            }
        }
    };
}

ulid_id!(
    /// Prompt version identifier
    VersionId
);
ulid_id!(
    /// Branch identifier
    BranchId
);
ulid_id!(
    /// Approval request identifier
    ApprovalId
);
ulid_id!(
    /// Approval vote identifier
    VoteId
);
ulid_id!(
    /// Deployment identifier
    DeploymentId
);
ulid_id!(
    /// Regression report identifier
    ReportId
);

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an externally issued identifier
            #[inline]
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw identifier
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True when the identifier is empty or whitespace
            #[inline]
            #[must_use]
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Agent whose prompt is being versioned
    AgentId
);
string_id!(
    /// User acting on the pipeline (author, reviewer, deployer)
    UserId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ulid_ids_are_unique_and_parse_back() {
        let a = VersionId::new();
        let b = VersionId::new();
        assert_ne!(a, b);

        let parsed: VersionId = a.to_string().parse().unwrap();
        assert_eq!(parsed, a);
    }

    #[test]
    fn ulid_id_rejects_garbage() {
        assert!("not-a-ulid".parse::<DeploymentId>().is_err());
    }

    #[test]
    fn string_ids_detect_blank() {
        assert!(UserId::new("  ").is_blank());
        assert!(!AgentId::from("support-bot").is_blank());
        assert_eq!(AgentId::from("support-bot").to_string(), "support-bot");
    }
}
