//! Strongly-typed identifiers.
//!
//! All IDs are validated at construction time and implement common traits.
//! Session, event, and job identifiers are time-ordered (UUIDv7) so that
//! lexicographic and creation order coincide; petition and archon identifiers
//! reference external entities and keep the more common v4 form.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Defines a strongly-typed ID newtype wrapper backed by a UUID.
///
/// Generates: struct, `new()`, `from_uuid()`, `parse()`, `as_uuid()`, Display,
/// Serialize, Deserialize. The `v7` arm produces time-ordered identifiers;
/// the default arm produces the more common random (v4) form.
macro_rules! define_id {
    ($name:ident, v7) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(uuid::Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            pub fn from_uuid(id: uuid::Uuid) -> Self {
                Self(id)
            }

            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(uuid::Uuid::parse_str(s)?))
            }

            pub fn as_uuid(&self) -> uuid::Uuid {
                self.0
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
    };
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(uuid::Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            pub fn from_uuid(id: uuid::Uuid) -> Self {
                Self(id)
            }

            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(uuid::Uuid::parse_str(s)?))
            }

            pub fn as_uuid(&self) -> uuid::Uuid {
                self.0
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
    };
}

define_id!(SessionId, v7);
define_id!(EventId, v7);
define_id!(JobId, v7);
define_id!(PetitionId);
define_id!(ArchonId);
