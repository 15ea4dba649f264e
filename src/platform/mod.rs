//! The chat platform that owns channels, membership and presence.
//!
//! The [`ExternalPlatform`] trait is the only way the lifecycle code touches
//! the outside world. [`memory::SimulatedPlatform`] implements it in memory
//! for tests and dry runs.

pub mod memory;

use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{GuildId, MemberId, MemberProfile, ResourceId};

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Platform call failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    /// The channel does not exist (or no longer exists).
    #[error("unknown channel {0}")]
    UnknownResource(ResourceId),

    /// The member is not part of the guild.
    #[error("unknown member {0}")]
    UnknownMember(MemberId),

    /// The platform refused the request.
    #[error("{operation} rejected: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },

    /// The platform could not be reached.
    #[error("platform unavailable: {0}")]
    Unavailable(String),
}

impl PlatformError {
    pub fn rejected(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Rejected {
            operation,
            reason: reason.into(),
        }
    }

    /// Whether the target is already gone, which deletions treat as success.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::UnknownResource(_))
    }
}

/// A permission a principal can hold on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    View,
    Connect,
    Manage,
    MoveMembers,
    MuteMembers,
    DeafenMembers,
    SendMessages,
    ReadHistory,
}

impl Capability {
    /// Moderation rights an owner holds on their channel.
    pub const ELEVATED: [Capability; 4] = [
        Capability::Manage,
        Capability::MoveMembers,
        Capability::MuteMembers,
        Capability::DeafenMembers,
    ];

    /// What a permitted or rejected member is allowed or denied.
    pub const ACCESS: [Capability; 2] = [Capability::View, Capability::Connect];

    /// What members get on a paired text channel.
    pub const CHAT: [Capability; 3] = [
        Capability::View,
        Capability::SendMessages,
        Capability::ReadHistory,
    ];
}

/// Who a permission overwrite applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Principal {
    Member(MemberId),
    /// The guild's default role.
    Everyone,
}

/// A change to one principal's overwrite on a channel.
///
/// Capabilities in `reset` fall back to inheritance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantEdit {
    pub allow: BTreeSet<Capability>,
    pub deny: BTreeSet<Capability>,
    pub reset: BTreeSet<Capability>,
}

impl GrantEdit {
    pub fn allow(caps: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            allow: caps.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn deny(caps: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            deny: caps.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn reset(caps: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            reset: caps.into_iter().collect(),
            ..Self::default()
        }
    }

    /// The owner's grant: access plus moderation.
    pub fn owner() -> Self {
        Self::allow(Capability::ACCESS.into_iter().chain(Capability::ELEVATED))
    }

    /// Moderation rights alone, for ownership hand-overs.
    pub fn elevate() -> Self {
        Self::allow(Capability::ELEVATED)
    }

    /// Strips moderation rights, leaving access alone.
    pub fn revoke_owner() -> Self {
        Self::reset(Capability::ELEVATED)
    }
}

/// A property owners may change on their channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceProperty {
    Name(String),
    /// Member limit, 0 = unlimited.
    Capacity(u32),
    /// Audio bitrate in bits per second.
    Quality(u32),
}

impl ResourceProperty {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Name(_) => "name",
            Self::Capacity(_) => "capacity",
            Self::Quality(_) => "quality",
        }
    }
}

/// Everything needed to allocate a voice channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    pub guild_id: GuildId,
    pub name: String,
    pub container_id: Option<ResourceId>,
    pub capacity: u32,
    pub quality: u32,
    pub grants: Vec<(Principal, GrantEdit)>,
}

/// A paired text channel visible only to `visible_to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondarySpec {
    pub guild_id: GuildId,
    pub name: String,
    pub container_id: Option<ResourceId>,
    pub visible_to: Vec<MemberId>,
}

/// Operations the lifecycle code needs from the chat platform.
#[async_trait]
pub trait ExternalPlatform: Send + Sync {
    /// Guilds the service is present in.
    async fn list_guilds(&self) -> PlatformResult<Vec<GuildId>>;

    async fn member_profile(
        &self,
        guild_id: GuildId,
        member_id: MemberId,
    ) -> PlatformResult<MemberProfile>;

    /// Highest audio quality the guild supports.
    async fn quality_ceiling(&self, guild_id: GuildId) -> PlatformResult<u32>;

    async fn create_resource(&self, spec: ResourceSpec) -> PlatformResult<ResourceId>;

    /// Fails with [`PlatformError::UnknownResource`] if already gone.
    async fn delete_resource(&self, resource_id: ResourceId) -> PlatformResult<()>;

    async fn resource_exists(&self, resource_id: ResourceId) -> PlatformResult<bool>;

    async fn set_resource_property(
        &self,
        resource_id: ResourceId,
        property: ResourceProperty,
    ) -> PlatformResult<()>;

    async fn edit_capability_grant(
        &self,
        resource_id: ResourceId,
        principal: Principal,
        edit: GrantEdit,
    ) -> PlatformResult<()>;

    /// Relocate a member's voice presence into `resource_id`.
    async fn move_member(
        &self,
        guild_id: GuildId,
        member_id: MemberId,
        resource_id: ResourceId,
    ) -> PlatformResult<()>;

    async fn evict_member(&self, resource_id: ResourceId, member_id: MemberId)
        -> PlatformResult<()>;

    /// Members currently connected to the channel.
    async fn list_members(&self, resource_id: ResourceId) -> PlatformResult<HashSet<MemberId>>;

    async fn create_secondary_resource(&self, spec: SecondarySpec) -> PlatformResult<ResourceId>;

    /// Fails with [`PlatformError::UnknownResource`] if already gone.
    async fn delete_secondary_resource(&self, resource_id: ResourceId) -> PlatformResult<()>;
}
