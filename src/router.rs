//! Turns presence transitions into lifecycle calls.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::{Error, Result};
use crate::lifecycle::{CreateOutcome, LifecycleController};
use crate::models::{GuildId, MemberId, PresenceEffect, PresenceTransition, ResourceId};
use crate::platform::ExternalPlatform;
use crate::registry::TempResourceRegistry;
use crate::store::PersistentStore;

/// What handling one presence effect led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectOutcome {
    Created(CreateOutcome),
    Deleted(ResourceId),
    /// A tracked channel was left but still has members.
    Kept(ResourceId),
    /// The effect did not concern a creator or temporary channel.
    Ignored,
    Failed(String),
}

pub struct PresenceEventRouter {
    store: Arc<dyn PersistentStore>,
    platform: Arc<dyn ExternalPlatform>,
    registry: Arc<TempResourceRegistry>,
    lifecycle: Arc<LifecycleController>,
}

impl PresenceEventRouter {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        platform: Arc<dyn ExternalPlatform>,
        registry: Arc<TempResourceRegistry>,
        lifecycle: Arc<LifecycleController>,
    ) -> Self {
        Self {
            store,
            platform,
            registry,
            lifecycle,
        }
    }

    /// Consume transitions until the sender side closes.
    ///
    /// Each transition is handled in its own task; work on one channel is
    /// serialized by the registry's entry locks.
    pub async fn run(self: Arc<Self>, mut events: UnboundedReceiver<PresenceTransition>) {
        while let Some(transition) = events.recv().await {
            let router = Arc::clone(&self);
            tokio::spawn(async move {
                router.handle(transition).await;
            });
        }
        tracing::info!("Presence stream closed, router stopping");
    }

    /// Apply a transition's effects in order, leaves before joins.
    pub async fn handle(&self, transition: PresenceTransition) -> Vec<EffectOutcome> {
        let mut outcomes = Vec::new();
        for effect in transition.effects() {
            let outcome = match self.apply(effect).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!("Failed to handle {:?}: {}", effect, e);
                    EffectOutcome::Failed(e.to_string())
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn apply(&self, effect: PresenceEffect) -> Result<EffectOutcome> {
        match effect {
            PresenceEffect::Leave { resource_id, .. } => self.on_leave(resource_id).await,
            PresenceEffect::Join {
                guild_id,
                member_id,
                resource_id,
            } => self.on_join(guild_id, member_id, resource_id).await,
        }
    }

    async fn on_join(
        &self,
        guild_id: GuildId,
        member_id: MemberId,
        resource_id: ResourceId,
    ) -> Result<EffectOutcome> {
        let Some(policy) = self
            .store
            .get_guild_policy(guild_id)
            .map_err(Error::persistence)?
        else {
            tracing::debug!("Guild {} has no policy, ignoring join", guild_id);
            return Ok(EffectOutcome::Ignored);
        };
        if resource_id != policy.creator_resource_id {
            return Ok(EffectOutcome::Ignored);
        }

        let outcome = self.lifecycle.create(guild_id, member_id).await?;
        Ok(EffectOutcome::Created(outcome))
    }

    async fn on_leave(&self, resource_id: ResourceId) -> Result<EffectOutcome> {
        if !self.registry.contains(resource_id) {
            return Ok(EffectOutcome::Ignored);
        }

        match self.platform.list_members(resource_id).await {
            Ok(members) if !members.is_empty() => return Ok(EffectOutcome::Kept(resource_id)),
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        if self.lifecycle.delete_if_empty(resource_id).await? {
            Ok(EffectOutcome::Deleted(resource_id))
        } else {
            Ok(EffectOutcome::Kept(resource_id))
        }
    }
}
