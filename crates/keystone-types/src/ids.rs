//! Identifier newtypes.
//!
//! Opaque string wrappers shared across the state and engine crates.
//! All serialize transparently as plain strings.

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the inner string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id! {
    /// Conformed entity type (e.g. `"team"`, `"security"`).
    EntityType
}

string_id! {
    /// Originating source system (e.g. `"crm"`, `"secmaster"`).
    SourceSystemId
}

string_id! {
    /// Canonical, source-agnostic key of one conformed entity.
    EnterpriseKey
}

string_id! {
    /// Identifier as assigned by the originating source system.
    SourceKey
}

string_id! {
    /// Ingestion batch identifier.
    BatchId
}

string_id! {
    /// Identifier space: a namespace of keys owned by one system
    /// (e.g. `"crm.team_id"`), the node type of the crosswalk graph.
    IdSpace
}

string_id! {
    /// Identifier of a crosswalk or validation rule (e.g. `"NAME_NOT_EMPTY"`).
    RuleId
}
