use chrono::{DateTime, Utc};
use common::{ResourceId, SubjectId};

use crate::{AllocationStatus, LifecycleState};

/// Builder for filtering resources.
///
/// Results are ordered by scheduled time, earliest first.
#[derive(Debug, Clone, Default)]
pub struct ResourceQuery {
    /// Filter by lifecycle state.
    pub state: Option<LifecycleState>,

    /// Case-insensitive substring match on the location.
    pub location: Option<String>,

    /// Filter by owner.
    pub owner_id: Option<SubjectId>,

    /// Scheduled at or after this instant.
    pub scheduled_from: Option<DateTime<Utc>>,

    /// Scheduled strictly before this instant.
    pub scheduled_before: Option<DateTime<Utc>>,

    /// Maximum number of rows to return.
    pub limit: Option<usize>,

    /// Number of rows to skip.
    pub offset: Option<usize>,
}

impl ResourceQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(mut self, state: LifecycleState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn owner_id(mut self, owner_id: SubjectId) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    pub fn scheduled_from(mut self, from: DateTime<Utc>) -> Self {
        self.scheduled_from = Some(from);
        self
    }

    pub fn scheduled_before(mut self, before: DateTime<Utc>) -> Self {
        self.scheduled_before = Some(before);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Builder for filtering ledger rows.
///
/// Results are ordered by creation time, newest first.
#[derive(Debug, Clone, Default)]
pub struct AllocationQuery {
    pub resource_id: Option<ResourceId>,
    pub subject_id: Option<SubjectId>,
    pub status: Option<AllocationStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl AllocationQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for all allocations against a resource.
    pub fn for_resource(resource_id: ResourceId) -> Self {
        Self {
            resource_id: Some(resource_id),
            ..Default::default()
        }
    }

    /// Creates a query for all allocations held by a subject.
    pub fn for_subject(subject_id: SubjectId) -> Self {
        Self {
            subject_id: Some(subject_id),
            ..Default::default()
        }
    }

    pub fn status(mut self, status: AllocationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// One page of query results plus the unpaginated match count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl<T> Page<T> {
    /// Number of pages of size `limit` needed to cover `total`.
    ///
    /// An unlimited query is a single page.
    pub fn total_pages(&self) -> u64 {
        match self.limit {
            Some(0) => 0,
            Some(limit) => self.total.div_ceil(limit as u64),
            None => 1,
        }
    }

    /// Slices an already filtered and ordered result set.
    pub fn from_matches(matches: Vec<T>, limit: Option<usize>, offset: Option<usize>) -> Self {
        let total = matches.len() as u64;
        let offset = offset.unwrap_or(0);
        let items = matches
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .collect();
        Self {
            items,
            total,
            limit,
            offset,
        }
    }
}
