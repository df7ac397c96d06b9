use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a UUID-backed identifier newtype.
///
/// Each identifier wraps a UUID to provide type safety and prevent mixing up
/// resource, allocation and subject IDs at call sites.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random ID.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an ID from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
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

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a bookable resource (an event).
    ResourceId
);

uuid_id!(
    /// Unique identifier for an allocation (a booking) in the ledger.
    AllocationId
);

uuid_id!(
    /// Identity of the caller making or holding allocations (a user).
    SubjectId
);

uuid_id!(
    /// Unique identifier for an audit journal entry.
    AuditId
);

/// Role granted to a subject by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Creates and manages resources.
    Organizer,
    /// Books seats on published resources.
    Attendee,
}

impl Role {
    /// Returns the role name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Organizer => "ORGANIZER",
            Role::Attendee => "ATTENDEE",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A verified caller identity.
///
/// Produced by the identity provider outside this workspace and trusted as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub subject_id: SubjectId,
    pub role: Role,
}

impl Principal {
    /// Creates a principal for the given subject and role.
    pub fn new(subject_id: SubjectId, role: Role) -> Self {
        Self { subject_id, role }
    }

    /// Creates an organizer principal with a fresh subject ID.
    pub fn organizer() -> Self {
        Self::new(SubjectId::new(), Role::Organizer)
    }

    /// Creates an attendee principal with a fresh subject ID.
    pub fn attendee() -> Self {
        Self::new(SubjectId::new(), Role::Attendee)
    }

    /// Returns true if this principal holds the given role.
    pub fn has_role(&self, role: Role) -> bool {
        self.role == role
    }
}
