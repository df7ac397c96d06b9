//! Resource rows owned by the inventory store.

use chrono::{DateTime, Utc};
use common::{ResourceId, SubjectId};
use serde::{Deserialize, Serialize};

use crate::Version;

/// The lifecycle state of a resource.
///
/// State transitions:
/// ```text
/// Draft ──► Published ──► Cancelled
///   │                        ▲
///   └────────────────────────┘
/// ```
/// Transitions only move forward; a cancelled resource is never resurrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// Being prepared by its owner, not yet bookable.
    #[default]
    Draft,

    /// Open for allocations until its scheduled time.
    Published,

    /// Withdrawn by its owner (terminal state).
    Cancelled,
}

impl LifecycleState {
    /// Returns true if seats may be allocated in this state.
    pub fn accepts_allocations(&self) -> bool {
        matches!(self, LifecycleState::Published)
    }

    /// Returns true if the resource can be published from this state.
    pub fn can_publish(&self) -> bool {
        matches!(self, LifecycleState::Draft)
    }

    /// Returns true if the resource can be cancelled from this state.
    pub fn can_cancel(&self) -> bool {
        matches!(self, LifecycleState::Draft | LifecycleState::Published)
    }

    /// Returns true if `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        match next {
            LifecycleState::Draft => false,
            LifecycleState::Published => self.can_publish(),
            LifecycleState::Cancelled => self.can_cancel(),
        }
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Cancelled)
    }

    /// Returns the state name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Draft => "DRAFT",
            LifecycleState::Published => "PUBLISHED",
            LifecycleState::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LifecycleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(LifecycleState::Draft),
            "PUBLISHED" => Ok(LifecycleState::Published),
            "CANCELLED" => Ok(LifecycleState::Cancelled),
            other => Err(format!("unknown lifecycle state '{other}'")),
        }
    }
}

/// A bookable resource (an event) with finite seat capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub owner_id: SubjectId,
    pub title: String,
    pub description: String,
    pub location: String,
    /// Price of one seat in cents.
    pub ticket_price_cents: i64,
    /// When the resource takes place; allocation closes at this instant.
    pub scheduled_at: DateTime<Utc>,
    pub capacity_total: i32,
    pub capacity_remaining: i32,
    pub state: LifecycleState,
    pub version: Version,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    /// Number of seats held by Active allocations.
    pub fn booked(&self) -> i32 {
        self.capacity_total - self.capacity_remaining
    }

    /// Returns true if the scheduled time is strictly before `now`.
    pub fn is_past(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at < now
    }

    /// Returns true if the capacity fields satisfy `0 <= remaining <= total` and `total >= 1`.
    pub fn capacity_in_bounds(&self) -> bool {
        self.capacity_total >= 1
            && self.capacity_remaining >= 0
            && self.capacity_remaining <= self.capacity_total
    }
}
