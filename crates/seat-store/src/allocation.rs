//! Allocation rows owned by the booking ledger.

use chrono::{DateTime, Utc};
use common::{AllocationId, ResourceId, SubjectId};
use serde::{Deserialize, Serialize};

/// Status of an allocation.
///
/// `Active → Reversed` is the only transition; rows are never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationStatus {
    Active,
    Reversed,
}

impl AllocationStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, AllocationStatus::Active)
    }

    /// Returns the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationStatus::Active => "ACTIVE",
            AllocationStatus::Reversed => "REVERSED",
        }
    }
}

impl std::fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AllocationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(AllocationStatus::Active),
            "REVERSED" => Ok(AllocationStatus::Reversed),
            other => Err(format!("unknown allocation status '{other}'")),
        }
    }
}

/// A subject's claim against a resource's capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub resource_id: ResourceId,
    pub subject_id: SubjectId,
    pub quantity: i32,
    pub status: AllocationStatus,
    pub created_at: DateTime<Utc>,
    pub reversed_at: Option<DateTime<Utc>>,
}

impl Allocation {
    /// Creates a new Active allocation.
    pub fn new(
        resource_id: ResourceId,
        subject_id: SubjectId,
        quantity: i32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AllocationId::new(),
            resource_id,
            subject_id,
            quantity,
            status: AllocationStatus::Active,
            created_at,
            reversed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Returns this allocation transitioned to Reversed at `at`.
    pub fn reversed(mut self, at: DateTime<Utc>) -> Self {
        self.status = AllocationStatus::Reversed;
        self.reversed_at = Some(at);
        self
    }
}
