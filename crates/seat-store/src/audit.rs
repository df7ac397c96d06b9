//! Append-only audit journal written alongside every committed mutation.

use chrono::{DateTime, Utc};
use common::{AllocationId, AuditId, ResourceId, SubjectId};
use serde::{Deserialize, Serialize};

use crate::Resource;

/// What kind of mutation an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditKind {
    ResourceCreated,
    ResourcePublished,
    ResourceCancelled,
    ResourceUpdated,
    ResourceDeleted,
    Allocated,
    Reversed,
    Resized,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::ResourceCreated => "RESOURCE_CREATED",
            AuditKind::ResourcePublished => "RESOURCE_PUBLISHED",
            AuditKind::ResourceCancelled => "RESOURCE_CANCELLED",
            AuditKind::ResourceUpdated => "RESOURCE_UPDATED",
            AuditKind::ResourceDeleted => "RESOURCE_DELETED",
            AuditKind::Allocated => "ALLOCATED",
            AuditKind::Reversed => "REVERSED",
            AuditKind::Resized => "RESIZED",
        }
    }
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AuditKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "RESOURCE_CREATED" => AuditKind::ResourceCreated,
            "RESOURCE_PUBLISHED" => AuditKind::ResourcePublished,
            "RESOURCE_CANCELLED" => AuditKind::ResourceCancelled,
            "RESOURCE_UPDATED" => AuditKind::ResourceUpdated,
            "RESOURCE_DELETED" => AuditKind::ResourceDeleted,
            "ALLOCATED" => AuditKind::Allocated,
            "REVERSED" => AuditKind::Reversed,
            "RESIZED" => AuditKind::Resized,
            other => return Err(format!("unknown audit kind '{other}'")),
        };
        Ok(kind)
    }
}

/// One journal line: the capacity of a resource right after a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditId,
    pub resource_id: ResourceId,
    pub allocation_id: Option<AllocationId>,
    pub actor_id: SubjectId,
    pub kind: AuditKind,
    /// Change applied to `capacity_remaining` (negative for allocations).
    pub quantity_delta: i32,
    pub capacity_total: i32,
    pub capacity_remaining: i32,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Records `kind` against the post-mutation state of `resource`.
    pub fn new(
        kind: AuditKind,
        resource: &Resource,
        actor_id: SubjectId,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AuditId::new(),
            resource_id: resource.id,
            allocation_id: None,
            actor_id,
            kind,
            quantity_delta: 0,
            capacity_total: resource.capacity_total,
            capacity_remaining: resource.capacity_remaining,
            recorded_at,
        }
    }

    /// Attaches the allocation that caused the entry.
    pub fn with_allocation(mut self, allocation_id: AllocationId) -> Self {
        self.allocation_id = Some(allocation_id);
        self
    }

    /// Sets the change applied to remaining capacity.
    pub fn with_delta(mut self, quantity_delta: i32) -> Self {
        self.quantity_delta = quantity_delta;
        self
    }
}
