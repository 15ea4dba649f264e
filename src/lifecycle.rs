//! Creation and deletion of temporary channels.
//!
//! Platform side effects come first and the durable record second. A channel
//! counts as owned by the service once its record is written; the registry
//! entry is inserted right after, still under the member's creation lock.
//! Anything allocated before a failed write is deleted on a best-effort basis.

use std::sync::Arc;

use chrono::Utc;

use crate::error::{Error, Result};
use crate::models::{secondary_resource_name, GuildId, MemberId, ResourceId, TempResource};
use crate::platform::{ExternalPlatform, GrantEdit, Principal, ResourceSpec, SecondarySpec};
use crate::registry::{EntryGuard, TempResourceRegistry};
use crate::store::PersistentStore;

/// What [`LifecycleController::create`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new channel was allocated and the member moved into it.
    Created(TempResource),
    /// The member already owned a channel and was moved back into it.
    Relocated(TempResource),
}

impl CreateOutcome {
    pub fn resource(&self) -> &TempResource {
        match self {
            Self::Created(resource) | Self::Relocated(resource) => resource,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

pub struct LifecycleController {
    store: Arc<dyn PersistentStore>,
    platform: Arc<dyn ExternalPlatform>,
    registry: Arc<TempResourceRegistry>,
}

impl LifecycleController {
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

    /// Give `owner_id` a temporary channel in `guild_id` and move them into it.
    ///
    /// A member who already owns a live channel in the guild is moved back
    /// into it instead of getting a second one.
    pub async fn create(&self, guild_id: GuildId, owner_id: MemberId) -> Result<CreateOutcome> {
        let _creation = self.registry.creation_lock(guild_id, owner_id).await;

        if let Some(existing) = self.registry.owned_by(guild_id, owner_id) {
            if let Some(entry) = self.registry.lock(existing).await {
                if entry.owner_id() == owner_id {
                    self.platform
                        .move_member(guild_id, owner_id, existing)
                        .await?;
                    tracing::info!(
                        "Member {} already owns channel {}, moved them back",
                        owner_id,
                        existing
                    );
                    return Ok(CreateOutcome::Relocated(entry.resource().clone()));
                }
            }
        }

        let policy = self
            .store
            .get_guild_policy(guild_id)
            .map_err(Error::persistence)?
            .ok_or(Error::ConfigMissing { guild_id })?;

        let profile = self.platform.member_profile(guild_id, owner_id).await?;
        let ceiling = self.platform.quality_ceiling(guild_id).await?;
        let name = policy.render_name(&profile);

        let resource_id = self
            .platform
            .create_resource(ResourceSpec {
                guild_id,
                name: name.clone(),
                container_id: policy.container_id,
                capacity: policy.default_capacity,
                quality: policy.default_quality.min(ceiling),
                grants: vec![(Principal::Member(owner_id), GrantEdit::owner())],
            })
            .await?;

        let secondary_resource_id = if policy.auto_secondary_resource {
            let spec = SecondarySpec {
                guild_id,
                name: secondary_resource_name(&name),
                container_id: policy.container_id,
                visible_to: vec![owner_id],
            };
            match self.platform.create_secondary_resource(spec).await {
                Ok(id) => Some(id),
                Err(e) => {
                    self.discard_allocation(resource_id, None).await;
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        let resource = TempResource {
            resource_id,
            guild_id,
            owner_id,
            secondary_resource_id,
            created_at: Utc::now(),
        };

        if let Err(e) = self.store.add_temp_resource(&resource) {
            tracing::error!("Failed to record channel {}: {:#}", resource_id, e);
            self.discard_allocation(resource_id, secondary_resource_id)
                .await;
            return Err(Error::persistence(e));
        }

        let entry = self.registry.insert(resource.clone()).await;

        if let Err(e) = self
            .platform
            .move_member(guild_id, owner_id, resource_id)
            .await
        {
            tracing::warn!(
                "Failed to move {} into new channel {}, deleting it: {}",
                owner_id,
                resource_id,
                e
            );
            if let Err(cleanup) = self.teardown(entry).await {
                tracing::warn!("Cleanup of channel {} failed: {}", resource_id, cleanup);
            }
            return Err(e.into());
        }

        tracing::info!(
            "Created temporary channel {} ({}) for {}",
            name,
            resource_id,
            owner_id
        );
        Ok(CreateOutcome::Created(resource))
    }

    /// Delete a temporary channel, its text channel, record and grants.
    ///
    /// Deleting an untracked channel succeeds without doing anything.
    pub async fn delete(&self, resource_id: ResourceId) -> Result<()> {
        let Some(entry) = self.registry.lock(resource_id).await else {
            tracing::debug!("Channel {} is not tracked, nothing to delete", resource_id);
            return Ok(());
        };
        self.teardown(entry).await.map(|_| ())
    }

    /// [`delete`](Self::delete) on behalf of a member, who must own the channel.
    pub async fn delete_owned(&self, resource_id: ResourceId, caller: MemberId) -> Result<()> {
        let Some(entry) = self.registry.lock(resource_id).await else {
            return Ok(());
        };
        if entry.owner_id() != caller {
            return Err(Error::NotOwner {
                resource_id,
                member_id: caller,
            });
        }
        self.teardown(entry).await.map(|_| ())
    }

    /// Delete the channel only if nobody is connected once its lock is held.
    ///
    /// Returns whether the channel was deleted.
    pub async fn delete_if_empty(&self, resource_id: ResourceId) -> Result<bool> {
        let Some(entry) = self.registry.lock(resource_id).await else {
            return Ok(false);
        };

        match self.platform.list_members(resource_id).await {
            Ok(members) if !members.is_empty() => {
                tracing::debug!(
                    "Channel {} still has {} member(s), keeping it",
                    resource_id,
                    members.len()
                );
                return Ok(false);
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        self.teardown(entry).await?;
        Ok(true)
    }

    /// Delete a locked channel everywhere and retire its entry.
    ///
    /// If the platform refuses to delete the channel nothing is changed.
    pub(crate) async fn teardown(&self, entry: EntryGuard) -> Result<TempResource> {
        let resource_id = entry.resource_id();

        match self.platform.delete_resource(resource_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!("Channel {} was already gone", resource_id);
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(secondary) = entry.resource().secondary_resource_id {
            match self.platform.delete_secondary_resource(secondary).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => tracing::warn!(
                    "Failed to delete text channel {} of {}: {}",
                    secondary,
                    resource_id,
                    e
                ),
            }
        }

        let removed = self.store.remove_temp_resource(resource_id);
        let resource = self.registry.retire(entry);

        match removed {
            Ok(_) => {
                tracing::info!("Deleted temporary channel {}", resource_id);
                Ok(resource)
            }
            Err(e) => {
                tracing::error!(
                    "Deleted channel {} but failed to remove its record: {:#}",
                    resource_id,
                    e
                );
                Err(Error::persistence(e))
            }
        }
    }

    /// Best-effort removal of channels allocated for a create that failed.
    async fn discard_allocation(&self, resource_id: ResourceId, secondary: Option<ResourceId>) {
        if let Err(e) = self.platform.delete_resource(resource_id).await {
            if !e.is_not_found() {
                tracing::warn!("Channel {} left orphaned: {}", resource_id, e);
            }
        }
        if let Some(secondary) = secondary {
            if let Err(e) = self.platform.delete_secondary_resource(secondary).await {
                if !e.is_not_found() {
                    tracing::warn!("Text channel {} left orphaned: {}", secondary, e);
                }
            }
        }
    }
}
