//! In-memory view of live temporary channels.
//!
//! Each entry sits behind its own [`tokio::sync::Mutex`]. Every operation that
//! mutates a channel (delete, claim, transfer, edits) holds that lock across
//! its platform calls, so two operations on the same channel never both act
//! on the pre-mutation state. Operations on different channels never contend.
//!
//! Deletion marks an entry retired while holding its lock; anyone queued on
//! the lock sees the retirement and treats the channel as absent.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::models::{GuildId, MemberId, ResourceId, TempResource};

#[derive(Debug)]
struct Slot {
    resource: TempResource,
    retired: bool,
}

type SlotHandle = Arc<AsyncMutex<Slot>>;

type OwnerIndex = HashMap<(GuildId, MemberId), BTreeSet<ResourceId>>;

fn index_add(owners: &mut OwnerIndex, key: (GuildId, MemberId), resource_id: ResourceId) {
    owners.entry(key).or_default().insert(resource_id);
}

fn index_remove(owners: &mut OwnerIndex, key: (GuildId, MemberId), resource_id: ResourceId) {
    if let Some(owned) = owners.get_mut(&key) {
        owned.remove(&resource_id);
        if owned.is_empty() {
            owners.remove(&key);
        }
    }
}

/// Exclusive access to one live channel.
///
/// Obtained from [`TempResourceRegistry::lock`] or
/// [`TempResourceRegistry::insert`]. Owner changes and retirement go through
/// the registry so its owner index stays in step.
#[derive(Debug)]
pub struct EntryGuard {
    slot: OwnedMutexGuard<Slot>,
}

impl EntryGuard {
    pub fn resource(&self) -> &TempResource {
        &self.slot.resource
    }

    pub fn resource_id(&self) -> ResourceId {
        self.slot.resource.resource_id
    }

    pub fn owner_id(&self) -> MemberId {
        self.slot.resource.owner_id
    }

    pub fn set_secondary_resource(&mut self, secondary_resource_id: Option<ResourceId>) {
        self.slot.resource.secondary_resource_id = secondary_resource_id;
    }
}

/// Guard serializing channel creation for one member in one guild.
pub type CreationGuard = OwnedMutexGuard<()>;

#[derive(Debug, Default)]
pub struct TempResourceRegistry {
    entries: RwLock<HashMap<ResourceId, SlotHandle>>,
    owners: RwLock<OwnerIndex>,
    creations: Mutex<HashMap<(GuildId, MemberId), Arc<AsyncMutex<()>>>>,
}

impl TempResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, resource_id: ResourceId) -> bool {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .contains_key(&resource_id)
    }

    /// The live channel `owner_id` owns in `guild_id`, if any.
    ///
    /// A member handed a second channel owns both; the lowest id is returned.
    pub fn owned_by(&self, guild_id: GuildId, owner_id: MemberId) -> Option<ResourceId> {
        self.owners
            .read()
            .expect("registry lock poisoned")
            .get(&(guild_id, owner_id))
            .and_then(|owned| owned.first().copied())
    }

    /// Tracked channel ids, sorted.
    pub fn resource_ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<_> = self
            .entries
            .read()
            .expect("registry lock poisoned")
            .keys()
            .copied()
            .collect();
        ids.sort();
        ids
    }

    /// Wait for exclusive access to a channel.
    ///
    /// `None` if the channel is untracked or was retired while waiting.
    pub async fn lock(&self, resource_id: ResourceId) -> Option<EntryGuard> {
        let handle = self
            .entries
            .read()
            .expect("registry lock poisoned")
            .get(&resource_id)
            .cloned()?;

        let slot = handle.lock_owned().await;
        if slot.retired {
            return None;
        }
        Some(EntryGuard { slot })
    }

    /// Copy of a channel's current state, waiting for in-flight operations.
    pub async fn snapshot(&self, resource_id: ResourceId) -> Option<TempResource> {
        self.lock(resource_id)
            .await
            .map(|entry| entry.resource().clone())
    }

    /// Track a channel and return it locked.
    ///
    /// An existing entry for the same id is retired and replaced.
    pub async fn insert(&self, resource: TempResource) -> EntryGuard {
        let resource_id = resource.resource_id;
        let key = (resource.guild_id, resource.owner_id);
        let handle = Arc::new(AsyncMutex::new(Slot {
            resource,
            retired: false,
        }));
        let slot = Arc::clone(&handle).lock_owned().await;

        let previous = self
            .entries
            .write()
            .expect("registry lock poisoned")
            .insert(resource_id, handle);

        let mut stale_owner = None;
        if let Some(previous) = previous {
            if let Ok(mut old) = previous.try_lock() {
                old.retired = true;
                stale_owner = Some((old.resource.guild_id, old.resource.owner_id));
            }
        }

        let mut owners = self.owners.write().expect("registry lock poisoned");
        if let Some(stale) = stale_owner {
            index_remove(&mut owners, stale, resource_id);
        }
        index_add(&mut owners, key, resource_id);
        drop(owners);

        EntryGuard { slot }
    }

    /// Record a new owner for a locked channel.
    pub fn set_owner(&self, entry: &mut EntryGuard, owner_id: MemberId) {
        let resource = &mut entry.slot.resource;
        let mut owners = self.owners.write().expect("registry lock poisoned");
        index_remove(
            &mut owners,
            (resource.guild_id, resource.owner_id),
            resource.resource_id,
        );
        resource.owner_id = owner_id;
        index_add(&mut owners, (resource.guild_id, owner_id), resource.resource_id);
    }

    /// Stop tracking a locked channel. Later lockers see it as absent.
    pub fn retire(&self, mut entry: EntryGuard) -> TempResource {
        entry.slot.retired = true;
        let resource = entry.slot.resource.clone();

        let replaced = {
            let mut entries = self.entries.write().expect("registry lock poisoned");
            let replaced = entries
                .get(&resource.resource_id)
                .is_some_and(|handle| !Arc::ptr_eq(handle, OwnedMutexGuard::mutex(&entry.slot)));
            if !replaced {
                entries.remove(&resource.resource_id);
            }
            replaced
        };

        // A replacement already owns the index entry for this id
        if !replaced {
            let mut owners = self.owners.write().expect("registry lock poisoned");
            index_remove(
                &mut owners,
                (resource.guild_id, resource.owner_id),
                resource.resource_id,
            );
        }
        resource
    }

    /// Serialize creation for one member in one guild.
    pub async fn creation_lock(&self, guild_id: GuildId, owner_id: MemberId) -> CreationGuard {
        let lock = {
            let mut creations = self.creations.lock().expect("registry lock poisoned");
            // Drop locks nobody holds or waits on
            creations.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(creations.entry((guild_id, owner_id)).or_default())
        };
        lock.lock_owned().await
    }
}
