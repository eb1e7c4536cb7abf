//! Newtype identifiers for the allocation domain.
//!
//! All identifiers wrap a v4 UUID. They are `Ord` so they can serve as the
//! final tie-break key wherever a total order is required (request
//! ordering, audit query ordering).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

entity_id!(
    /// Identifier of an allocation cycle.
    CycleId
);
entity_id!(
    /// Identifier of a budget or resource pool.
    PoolId
);
entity_id!(
    /// Identifier of an allocation request.
    RequestId
);
entity_id!(
    /// Identifier of an allocation run.
    RunId
);
entity_id!(
    /// Identifier of an audit log entry.
    AuditEntryId
);
