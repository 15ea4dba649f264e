//! Durable storage seen by the lifecycle code.
//!
//! [`crate::db::Database`] is the SQLite implementation. The trait exists so
//! components can be handed any store through an `Arc<dyn PersistentStore>`.

use anyhow::Result;

use crate::models::*;

pub trait PersistentStore: Send + Sync {
    fn get_guild_policy(&self, guild_id: GuildId) -> Result<Option<GuildPolicy>>;

    /// Insert or replace the guild's policy.
    fn set_guild_policy(&self, guild_id: GuildId, policy: &GuildPolicy) -> Result<()>;

    fn add_temp_resource(&self, resource: &TempResource) -> Result<()>;

    fn get_temp_resource(&self, resource_id: ResourceId) -> Result<Option<TempResource>>;

    /// Remove the record and its grants. Returns whether a record existed.
    fn remove_temp_resource(&self, resource_id: ResourceId) -> Result<bool>;

    fn list_temp_resources(&self, guild_id: GuildId) -> Result<Vec<TempResource>>;

    /// Guilds holding at least one record, sorted.
    fn list_temp_resource_guilds(&self) -> Result<Vec<GuildId>>;

    fn set_temp_resource_owner(&self, resource_id: ResourceId, owner_id: MemberId)
        -> Result<bool>;

    fn set_secondary_resource(
        &self,
        resource_id: ResourceId,
        secondary_resource_id: Option<ResourceId>,
    ) -> Result<bool>;

    /// Record a grant, replacing any earlier one for the same member.
    fn add_permission_grant(
        &self,
        resource_id: ResourceId,
        user_id: MemberId,
        mode: GrantMode,
    ) -> Result<PermissionGrant>;

    fn list_permission_grants(&self, resource_id: ResourceId) -> Result<Vec<PermissionGrant>>;
}
