//! Owner-facing operations on a live temporary channel.
//!
//! Every operation holds the channel's entry lock for its whole duration, so
//! a claim, a transfer and a deletion of the same channel never interleave.
//! Multi-step changes undo their earlier platform edits when a later step
//! fails.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::{
    secondary_resource_name, GrantMode, MemberId, PermissionGrant, ResourceId, ResourceSummary,
    TempResource,
};
use crate::platform::{
    Capability, ExternalPlatform, GrantEdit, Principal, ResourceProperty, SecondarySpec,
};
use crate::registry::{EntryGuard, TempResourceRegistry};
use crate::store::PersistentStore;

pub struct OwnershipManager {
    store: Arc<dyn PersistentStore>,
    platform: Arc<dyn ExternalPlatform>,
    registry: Arc<TempResourceRegistry>,
}

impl OwnershipManager {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        platform: Arc<dyn ExternalPlatform>,
        registry: Arc<TempResourceRegistry>,
    ) -> Self {
        Self {
            store,
            platform,
            registry,
        }
    }

    // ============================================================
    // Ownership
    // ============================================================

    /// Take over a channel whose owner has left it. The claimant must be
    /// connected to it.
    ///
    /// Claiming a channel one already owns is a no-op.
    pub async fn claim(&self, resource_id: ResourceId, claimant: MemberId) -> Result<TempResource> {
        let mut entry = self.entry(resource_id).await?;
        let owner_id = entry.owner_id();
        if owner_id == claimant {
            return Ok(entry.resource().clone());
        }

        let members = self.platform.list_members(resource_id).await?;
        if members.contains(&owner_id) {
            return Err(Error::OwnershipConflict {
                resource_id,
                owner_id,
            });
        }
        if !members.contains(&claimant) {
            return Err(Error::InvalidTarget {
                member_id: claimant,
                reason: "not connected to the channel",
            });
        }

        self.hand_over(&mut entry, claimant).await?;
        tracing::info!(
            "Member {} claimed channel {} from {}",
            claimant,
            resource_id,
            owner_id
        );
        Ok(entry.resource().clone())
    }

    /// Hand a channel to another connected member.
    pub async fn transfer(
        &self,
        resource_id: ResourceId,
        from: MemberId,
        to: MemberId,
    ) -> Result<TempResource> {
        let mut entry = self.owned_entry(resource_id, from).await?;
        if to == from {
            return Err(Error::InvalidTarget {
                member_id: to,
                reason: "already owns the channel",
            });
        }

        let members = self.platform.list_members(resource_id).await?;
        if !members.contains(&to) {
            return Err(Error::InvalidTarget {
                member_id: to,
                reason: "not connected to the channel",
            });
        }

        self.hand_over(&mut entry, to).await?;
        tracing::info!(
            "Channel {} transferred from {} to {}",
            resource_id,
            from,
            to
        );
        Ok(entry.resource().clone())
    }

    /// Move moderation rights from the current owner to `new_owner`.
    async fn hand_over(&self, entry: &mut EntryGuard, new_owner: MemberId) -> Result<()> {
        let resource_id = entry.resource_id();
        let old_owner = entry.owner_id();

        self.platform
            .edit_capability_grant(resource_id, Principal::Member(new_owner), GrantEdit::elevate())
            .await?;

        if let Err(e) = self
            .platform
            .edit_capability_grant(
                resource_id,
                Principal::Member(old_owner),
                GrantEdit::revoke_owner(),
            )
            .await
        {
            self.undo_grant(resource_id, Principal::Member(new_owner), GrantEdit::revoke_owner())
                .await;
            return Err(e.into());
        }

        let recorded = self
            .store
            .set_temp_resource_owner(resource_id, new_owner)
            .and_then(|updated| {
                if updated {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("no record for channel {}", resource_id))
                }
            });
        if let Err(e) = recorded {
            self.undo_grant(resource_id, Principal::Member(old_owner), GrantEdit::elevate())
                .await;
            self.undo_grant(resource_id, Principal::Member(new_owner), GrantEdit::revoke_owner())
                .await;
            return Err(Error::persistence(e));
        }

        self.registry.set_owner(entry, new_owner);
        Ok(())
    }

    // ============================================================
    // Access grants
    // ============================================================

    /// Let `user_id` see and join the channel.
    pub async fn permit(
        &self,
        resource_id: ResourceId,
        caller: MemberId,
        user_id: MemberId,
    ) -> Result<PermissionGrant> {
        let _entry = self.owned_entry(resource_id, caller).await?;
        let principal = Principal::Member(user_id);
        let previous = self.access_before(resource_id, user_id)?;

        self.platform
            .edit_capability_grant(resource_id, principal, GrantEdit::allow(Capability::ACCESS))
            .await?;

        match self
            .store
            .add_permission_grant(resource_id, user_id, GrantMode::Allow)
        {
            Ok(grant) => {
                tracing::info!("Member {} permitted on channel {}", user_id, resource_id);
                Ok(grant)
            }
            Err(e) => {
                self.undo_grant(resource_id, principal, previous).await;
                Err(Error::persistence(e))
            }
        }
    }

    /// Shut `user_id` out of the channel, disconnecting them if connected.
    pub async fn reject(
        &self,
        resource_id: ResourceId,
        caller: MemberId,
        user_id: MemberId,
    ) -> Result<PermissionGrant> {
        let entry = self.owned_entry(resource_id, caller).await?;
        if user_id == entry.owner_id() {
            return Err(Error::InvalidTarget {
                member_id: user_id,
                reason: "cannot reject the channel owner",
            });
        }
        let principal = Principal::Member(user_id);
        let previous = self.access_before(resource_id, user_id)?;

        self.platform
            .edit_capability_grant(resource_id, principal, GrantEdit::deny(Capability::ACCESS))
            .await?;

        let evicted = match self.platform.list_members(resource_id).await {
            Ok(members) if members.contains(&user_id) => {
                self.platform.evict_member(resource_id, user_id).await
            }
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = evicted {
            self.undo_grant(resource_id, principal, previous).await;
            return Err(e.into());
        }

        // An eviction cannot be undone, so the deny stays on the platform
        // even when the record fails to write.
        let grant = self
            .store
            .add_permission_grant(resource_id, user_id, GrantMode::Deny)
            .map_err(Error::persistence)?;
        tracing::info!("Member {} rejected from channel {}", user_id, resource_id);
        Ok(grant)
    }

    // ============================================================
    // Channel properties
    // ============================================================

    pub async fn rename(&self, resource_id: ResourceId, caller: MemberId, name: String) -> Result<()> {
        self.edit_property(resource_id, caller, ResourceProperty::Name(name))
            .await
    }

    /// Member limit, 0 for unlimited.
    pub async fn set_capacity(
        &self,
        resource_id: ResourceId,
        caller: MemberId,
        capacity: u32,
    ) -> Result<()> {
        self.edit_property(resource_id, caller, ResourceProperty::Capacity(capacity))
            .await
    }

    pub async fn set_quality(
        &self,
        resource_id: ResourceId,
        caller: MemberId,
        quality: u32,
    ) -> Result<()> {
        self.edit_property(resource_id, caller, ResourceProperty::Quality(quality))
            .await
    }

    /// Stop members without a grant from joining.
    pub async fn set_locked(
        &self,
        resource_id: ResourceId,
        caller: MemberId,
        locked: bool,
    ) -> Result<()> {
        self.edit_everyone(resource_id, caller, Capability::Connect, locked)
            .await
    }

    /// Hide the channel from members without a grant.
    pub async fn set_hidden(
        &self,
        resource_id: ResourceId,
        caller: MemberId,
        hidden: bool,
    ) -> Result<()> {
        self.edit_everyone(resource_id, caller, Capability::View, hidden)
            .await
    }

    /// Create or delete the channel's paired text channel.
    ///
    /// Returns the text channel now attached, if any.
    pub async fn set_secondary_resource(
        &self,
        resource_id: ResourceId,
        caller: MemberId,
        enabled: bool,
    ) -> Result<Option<ResourceId>> {
        let mut entry = self.editable_entry(resource_id, caller).await?;

        match (enabled, entry.resource().secondary_resource_id) {
            (true, Some(existing)) => Ok(Some(existing)),
            (false, None) => Ok(None),
            (true, None) => {
                let guild_id = entry.resource().guild_id;
                let policy = self
                    .store
                    .get_guild_policy(guild_id)
                    .map_err(Error::persistence)?
                    .ok_or(Error::ConfigMissing { guild_id })?;
                let profile = self
                    .platform
                    .member_profile(guild_id, entry.owner_id())
                    .await?;
                let mut visible_to: Vec<MemberId> = self
                    .platform
                    .list_members(resource_id)
                    .await?
                    .into_iter()
                    .collect();
                visible_to.sort();

                let secondary = self
                    .platform
                    .create_secondary_resource(SecondarySpec {
                        guild_id,
                        name: secondary_resource_name(&policy.render_name(&profile)),
                        container_id: policy.container_id,
                        visible_to,
                    })
                    .await?;

                if let Err(e) = self.store.set_secondary_resource(resource_id, Some(secondary)) {
                    if let Err(cleanup) = self.platform.delete_secondary_resource(secondary).await {
                        tracing::warn!("Text channel {} left orphaned: {}", secondary, cleanup);
                    }
                    return Err(Error::persistence(e));
                }
                entry.set_secondary_resource(Some(secondary));
                tracing::info!("Added text channel {} to {}", secondary, resource_id);
                Ok(Some(secondary))
            }
            (false, Some(secondary)) => {
                match self.platform.delete_secondary_resource(secondary).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
                // The text channel is gone, so the entry forgets it even if
                // the record write fails.
                entry.set_secondary_resource(None);
                self.store
                    .set_secondary_resource(resource_id, None)
                    .map_err(Error::persistence)?;
                tracing::info!("Removed text channel {} from {}", secondary, resource_id);
                Ok(None)
            }
        }
    }

    /// Current state of a channel. Anyone may ask.
    pub async fn describe(&self, resource_id: ResourceId) -> Result<ResourceSummary> {
        let entry = self.entry(resource_id).await?;
        let mut members: Vec<MemberId> = self
            .platform
            .list_members(resource_id)
            .await?
            .into_iter()
            .collect();
        members.sort();
        let grants = self
            .store
            .list_permission_grants(resource_id)
            .map_err(Error::persistence)?;

        Ok(ResourceSummary {
            resource: entry.resource().clone(),
            members,
            grants,
        })
    }

    async fn edit_property(
        &self,
        resource_id: ResourceId,
        caller: MemberId,
        property: ResourceProperty,
    ) -> Result<()> {
        let _entry = self.editable_entry(resource_id, caller).await?;
        let label = property.label();
        self.platform
            .set_resource_property(resource_id, property)
            .await?;
        tracing::info!("Updated {} of channel {}", label, resource_id);
        Ok(())
    }

    async fn edit_everyone(
        &self,
        resource_id: ResourceId,
        caller: MemberId,
        capability: Capability,
        restrict: bool,
    ) -> Result<()> {
        let _entry = self.editable_entry(resource_id, caller).await?;
        let edit = if restrict {
            GrantEdit::deny([capability])
        } else {
            GrantEdit::reset([capability])
        };
        self.platform
            .edit_capability_grant(resource_id, Principal::Everyone, edit)
            .await?;
        tracing::info!(
            "Channel {} {:?} {} for everyone",
            resource_id,
            capability,
            if restrict { "denied" } else { "restored" }
        );
        Ok(())
    }

    // ============================================================
    // Entry access
    // ============================================================

    async fn entry(&self, resource_id: ResourceId) -> Result<EntryGuard> {
        self.registry
            .lock(resource_id)
            .await
            .ok_or(Error::ResourceNotFound { resource_id })
    }

    async fn owned_entry(&self, resource_id: ResourceId, caller: MemberId) -> Result<EntryGuard> {
        let entry = self.entry(resource_id).await?;
        if entry.owner_id() != caller {
            return Err(Error::NotOwner {
                resource_id,
                member_id: caller,
            });
        }
        Ok(entry)
    }

    async fn editable_entry(
        &self,
        resource_id: ResourceId,
        caller: MemberId,
    ) -> Result<EntryGuard> {
        let entry = self.owned_entry(resource_id, caller).await?;
        let guild_id = entry.resource().guild_id;
        let policy = self
            .store
            .get_guild_policy(guild_id)
            .map_err(Error::persistence)?
            .ok_or(Error::ConfigMissing { guild_id })?;
        if !policy.editable {
            return Err(Error::EditingDisabled { guild_id });
        }
        Ok(entry)
    }

    /// The edit that puts a member's access back to its recorded grant.
    fn access_before(&self, resource_id: ResourceId, user_id: MemberId) -> Result<GrantEdit> {
        let recorded = self
            .store
            .list_permission_grants(resource_id)
            .map_err(Error::persistence)?
            .into_iter()
            .find(|grant| grant.user_id == user_id)
            .map(|grant| grant.mode);

        Ok(match recorded {
            Some(GrantMode::Allow) => GrantEdit::allow(Capability::ACCESS),
            Some(GrantMode::Deny) => GrantEdit::deny(Capability::ACCESS),
            None => GrantEdit::reset(Capability::ACCESS),
        })
    }

    async fn undo_grant(&self, resource_id: ResourceId, principal: Principal, edit: GrantEdit) {
        if let Err(e) = self
            .platform
            .edit_capability_grant(resource_id, principal, edit)
            .await
        {
            tracing::warn!(
                "Failed to roll back grant change on channel {}: {}",
                resource_id,
                e
            );
        }
    }
}
