#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tempvoice::db::Database;
use tempvoice::lifecycle::CreateOutcome;
use tempvoice::models::*;
use tempvoice::platform::memory::SimulatedPlatform;
use tempvoice::router::EffectOutcome;
use tempvoice::service::TempVoiceService;
use tempvoice::store::PersistentStore;

pub const GUILD: GuildId = GuildId(1);
pub const OWNER: MemberId = MemberId(11);
pub const OTHER: MemberId = MemberId(12);
pub const THIRD: MemberId = MemberId(13);

/// A [`Database`] whose writes can be made to fail.
pub struct FlakyStore {
    inner: Database,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Database) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        Ok(())
    }
}

impl PersistentStore for FlakyStore {
    fn get_guild_policy(&self, guild_id: GuildId) -> anyhow::Result<Option<GuildPolicy>> {
        self.inner.get_guild_policy(guild_id)
    }

    fn set_guild_policy(&self, guild_id: GuildId, policy: &GuildPolicy) -> anyhow::Result<()> {
        self.check()?;
        self.inner.set_guild_policy(guild_id, policy)
    }

    fn add_temp_resource(&self, resource: &TempResource) -> anyhow::Result<()> {
        self.check()?;
        self.inner.add_temp_resource(resource)
    }

    fn get_temp_resource(&self, resource_id: ResourceId) -> anyhow::Result<Option<TempResource>> {
        self.inner.get_temp_resource(resource_id)
    }

    fn remove_temp_resource(&self, resource_id: ResourceId) -> anyhow::Result<bool> {
        self.check()?;
        self.inner.remove_temp_resource(resource_id)
    }

    fn list_temp_resources(&self, guild_id: GuildId) -> anyhow::Result<Vec<TempResource>> {
        self.inner.list_temp_resources(guild_id)
    }

    fn list_temp_resource_guilds(&self) -> anyhow::Result<Vec<GuildId>> {
        self.inner.list_temp_resource_guilds()
    }

    fn set_temp_resource_owner(
        &self,
        resource_id: ResourceId,
        owner_id: MemberId,
    ) -> anyhow::Result<bool> {
        self.check()?;
        self.inner.set_temp_resource_owner(resource_id, owner_id)
    }

    fn set_secondary_resource(
        &self,
        resource_id: ResourceId,
        secondary_resource_id: Option<ResourceId>,
    ) -> anyhow::Result<bool> {
        self.check()?;
        self.inner
            .set_secondary_resource(resource_id, secondary_resource_id)
    }

    fn add_permission_grant(
        &self,
        resource_id: ResourceId,
        user_id: MemberId,
        mode: GrantMode,
    ) -> anyhow::Result<PermissionGrant> {
        self.check()?;
        self.inner.add_permission_grant(resource_id, user_id, mode)
    }

    fn list_permission_grants(&self, resource_id: ResourceId) -> anyhow::Result<Vec<PermissionGrant>> {
        self.inner.list_permission_grants(resource_id)
    }
}

/// A service over an in-memory database and a simulated guild with a
/// configured creator channel.
pub struct Harness {
    pub db: Database,
    pub store: Arc<FlakyStore>,
    pub platform: Arc<SimulatedPlatform>,
    pub service: TempVoiceService,
    pub creator: ResourceId,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(|_| {})
    }

    pub fn with_policy(configure: impl FnOnce(&mut GuildPolicy)) -> Self {
        let db = Database::open_memory().expect("Failed to create database");
        db.migrate().expect("Failed to migrate");
        let platform = Arc::new(SimulatedPlatform::new());
        let creator = platform.add_channel(GUILD, "Join to create");

        let mut policy = GuildPolicy::new(creator);
        policy.name_template = "{username}'s room".to_string();
        configure(&mut policy);
        db.set_guild_policy(GUILD, &policy)
            .expect("Failed to save policy");

        Self::assemble(db, platform, creator)
    }

    /// Build a fresh service over existing state, as after a restart.
    pub fn assemble(db: Database, platform: Arc<SimulatedPlatform>, creator: ResourceId) -> Self {
        let store = Arc::new(FlakyStore::new(db.clone()));
        let service = TempVoiceService::new(store.clone(), platform.clone());
        Self {
            db,
            store,
            platform,
            service,
            creator,
        }
    }

    /// Connect `member` to the creator channel and route the transition.
    pub async fn join_creator(&self, member_id: MemberId) -> Vec<EffectOutcome> {
        let transition = self
            .platform
            .connect(GUILD, member_id, self.creator)
            .expect("Failed to connect to creator");
        self.service.router().handle(transition).await
    }

    /// [`join_creator`](Self::join_creator), expecting a new channel.
    pub async fn spawn_channel(&self, member_id: MemberId) -> TempResource {
        match self.join_creator(member_id).await.as_slice() {
            [EffectOutcome::Created(CreateOutcome::Created(resource))] => resource.clone(),
            other => panic!("Expected a new channel, got {:?}", other),
        }
    }

    /// Connect `member` to a channel and route the transition.
    pub async fn connect(&self, member_id: MemberId, resource_id: ResourceId) -> Vec<EffectOutcome> {
        let transition = self
            .platform
            .connect(GUILD, member_id, resource_id)
            .expect("Failed to connect");
        self.service.router().handle(transition).await
    }

    /// Disconnect `member` from voice and route the transition.
    pub async fn disconnect(&self, member_id: MemberId) -> Vec<EffectOutcome> {
        let transition = self
            .platform
            .disconnect(GUILD, member_id)
            .expect("Member was not connected");
        self.service.router().handle(transition).await
    }

    pub fn record(&self, resource_id: ResourceId) -> Option<TempResource> {
        self.db
            .get_temp_resource(resource_id)
            .expect("Failed to read record")
    }

    pub async fn entry(&self, resource_id: ResourceId) -> Option<TempResource> {
        self.service.registry().snapshot(resource_id).await
    }
}
