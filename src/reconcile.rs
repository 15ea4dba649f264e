//! Startup reconciliation of persisted records against the platform.
//!
//! Records whose channel vanished while the service was down are purged,
//! channels left empty are deleted, and the rest are registered again. A
//! failure is logged and counted, and never stops the remaining records or
//! guilds from being processed.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::lifecycle::LifecycleController;
use crate::models::{GuildId, ResourceId, TempResource};
use crate::platform::ExternalPlatform;
use crate::registry::TempResourceRegistry;
use crate::store::PersistentStore;

/// Counts of what a reconciliation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub guilds: usize,
    /// Records registered again because their channel still has members.
    pub restored: usize,
    /// Records dropped because their channel no longer exists.
    pub purged: usize,
    /// Empty channels deleted.
    pub orphans_removed: usize,
    pub failures: usize,
}

impl ReconciliationReport {
    fn absorb(&mut self, other: ReconciliationReport) {
        self.guilds += other.guilds;
        self.restored += other.restored;
        self.purged += other.purged;
        self.orphans_removed += other.orphans_removed;
        self.failures += other.failures;
    }
}

enum RecordOutcome {
    Restored,
    Purged,
    OrphanRemoved,
}

pub struct ReconciliationService {
    store: Arc<dyn PersistentStore>,
    platform: Arc<dyn ExternalPlatform>,
    registry: Arc<TempResourceRegistry>,
    lifecycle: Arc<LifecycleController>,
}

impl ReconciliationService {
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

    /// Reconcile every guild the platform reports and every guild that
    /// still has records. Records in a guild the service has left are
    /// purged, since their channels are gone from its view.
    pub async fn run(&self) -> ReconciliationReport {
        let mut report = ReconciliationReport::default();

        let mut guilds = BTreeSet::new();
        match self.platform.list_guilds().await {
            Ok(listed) => guilds.extend(listed),
            Err(e) => {
                tracing::error!("Failed to list guilds for reconciliation: {}", e);
                report.failures += 1;
                return report;
            }
        }
        match self.store.list_temp_resource_guilds() {
            Ok(recorded) => guilds.extend(recorded),
            Err(e) => {
                tracing::error!("Failed to list guilds with records: {}", e);
                report.failures += 1;
            }
        }

        for guild_id in guilds {
            match self.reconcile_guild(guild_id).await {
                Ok(guild_report) => report.absorb(guild_report),
                Err(e) => {
                    tracing::error!("Reconciliation failed for guild {}: {}", guild_id, e);
                    report.failures += 1;
                }
            }
        }

        tracing::info!(
            "Reconciled {} guild(s): {} restored, {} purged, {} orphan(s) removed, {} failure(s)",
            report.guilds,
            report.restored,
            report.purged,
            report.orphans_removed,
            report.failures
        );
        report
    }

    /// Reconcile the records of a single guild.
    pub async fn reconcile_guild(&self, guild_id: GuildId) -> Result<ReconciliationReport> {
        let records = self
            .store
            .list_temp_resources(guild_id)
            .map_err(Error::persistence)?;
        let creator = self
            .store
            .get_guild_policy(guild_id)
            .map_err(Error::persistence)?
            .map(|policy| policy.creator_resource_id);

        let mut report = ReconciliationReport {
            guilds: 1,
            ..Default::default()
        };

        for record in records {
            let resource_id = record.resource_id;
            match self.reconcile_record(record, creator).await {
                Ok(RecordOutcome::Restored) => report.restored += 1,
                Ok(RecordOutcome::Purged) => report.purged += 1,
                Ok(RecordOutcome::OrphanRemoved) => report.orphans_removed += 1,
                Err(e) => {
                    tracing::warn!(
                        "Failed to reconcile channel {} in guild {}: {}",
                        resource_id,
                        guild_id,
                        e
                    );
                    report.failures += 1;
                }
            }
        }

        Ok(report)
    }

    async fn reconcile_record(
        &self,
        record: TempResource,
        creator: Option<ResourceId>,
    ) -> Result<RecordOutcome> {
        let resource_id = record.resource_id;

        // A record pointing at the creator channel must never delete it.
        if Some(resource_id) == creator {
            tracing::warn!("Dropping record for creator channel {}", resource_id);
            self.purge(resource_id).await?;
            return Ok(RecordOutcome::Purged);
        }

        if !self.platform.resource_exists(resource_id).await? {
            tracing::debug!("Channel {} no longer exists, dropping its record", resource_id);
            self.purge(resource_id).await?;
            return Ok(RecordOutcome::Purged);
        }

        let members = match self.platform.list_members(resource_id).await {
            Ok(members) => members,
            Err(e) if e.is_not_found() => {
                self.purge(resource_id).await?;
                return Ok(RecordOutcome::Purged);
            }
            Err(e) => return Err(e.into()),
        };

        let entry = self.registry.insert(record).await;
        if members.is_empty() {
            self.lifecycle.teardown(entry).await?;
            Ok(RecordOutcome::OrphanRemoved)
        } else {
            tracing::debug!(
                "Restored channel {} with {} member(s)",
                resource_id,
                members.len()
            );
            Ok(RecordOutcome::Restored)
        }
    }

    async fn purge(&self, resource_id: ResourceId) -> Result<()> {
        self.store
            .remove_temp_resource(resource_id)
            .map_err(Error::persistence)?;
        if let Some(entry) = self.registry.lock(resource_id).await {
            self.registry.retire(entry);
        }
        Ok(())
    }
}
