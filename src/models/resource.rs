use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::grant::PermissionGrant;
use super::ids::{GuildId, MemberId, ResourceId};

/// A live temporary channel.
///
/// Exists in the registry only while a persisted record and the platform
/// channel both exist. Reconciliation restores that agreement after restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempResource {
    pub resource_id: ResourceId,
    pub guild_id: GuildId,
    pub owner_id: MemberId,
    /// Paired text channel, if one was created.
    pub secondary_resource_id: Option<ResourceId>,
    pub created_at: DateTime<Utc>,
}

/// Read-only view of a temporary channel for the command layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub resource: TempResource,
    pub members: Vec<MemberId>,
    pub grants: Vec<PermissionGrant>,
}
