//! In-memory platform implementation for testing and dry runs.
//!
//! [`SimulatedPlatform`] keeps guilds, channels and voice presence in a
//! single map and emits [`PresenceTransition`]s the way a gateway would.
//!
//! ## Limitations
//!
//! - **NOT a real platform**: nothing leaves the process
//! - **Failure injection**: any operation can be made to fail with
//!   [`SimulatedPlatform::fail`] until [`SimulatedPlatform::recover`]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{
    Capability, ExternalPlatform, GrantEdit, PlatformError, PlatformResult, Principal,
    ResourceProperty, ResourceSpec, SecondarySpec,
};
use crate::models::{GuildId, MemberId, MemberProfile, PresenceTransition, ResourceId};

/// Quality ceiling for guilds added without an explicit one (no boosts).
pub const DEFAULT_QUALITY_CEILING: u32 = 96_000;

const MIN_QUALITY: u32 = 8_000;
const MAX_CAPACITY: u32 = 99;
const MAX_NAME_LEN: usize = 100;
const FIRST_ALLOCATED_ID: u64 = 1_000;

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformOp {
    CreateResource,
    DeleteResource,
    SetProperty,
    EditGrant,
    MoveMember,
    EvictMember,
    ListMembers,
    CreateSecondary,
    DeleteSecondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Voice,
    Text,
}

/// A principal's effective allow/deny sets on one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overwrite {
    pub allow: BTreeSet<Capability>,
    pub deny: BTreeSet<Capability>,
}

impl Overwrite {
    fn apply(&mut self, edit: &GrantEdit) {
        for cap in &edit.allow {
            self.deny.remove(cap);
            self.allow.insert(*cap);
        }
        for cap in &edit.deny {
            self.allow.remove(cap);
            self.deny.insert(*cap);
        }
        for cap in &edit.reset {
            self.allow.remove(cap);
            self.deny.remove(cap);
        }
    }

    fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }
}

/// Snapshot of a simulated channel.
#[derive(Debug, Clone)]
pub struct SimChannel {
    pub guild_id: GuildId,
    pub kind: ChannelKind,
    pub name: String,
    pub container_id: Option<ResourceId>,
    pub capacity: u32,
    pub quality: u32,
    pub overwrites: HashMap<Principal, Overwrite>,
}

impl SimChannel {
    pub fn overwrite(&self, principal: Principal) -> Overwrite {
        self.overwrites.get(&principal).cloned().unwrap_or_default()
    }

    fn edit(&mut self, principal: Principal, edit: &GrantEdit) {
        let overwrite = self.overwrites.entry(principal).or_default();
        overwrite.apply(edit);
        if overwrite.is_empty() {
            self.overwrites.remove(&principal);
        }
    }

    /// Whether `member` may connect, honouring member overwrites over the
    /// guild-wide one.
    fn admits(&self, member_id: MemberId) -> bool {
        let member = self.overwrite(Principal::Member(member_id));
        if member.deny.contains(&Capability::Connect) {
            return false;
        }
        if member.allow.contains(&Capability::Connect) {
            return true;
        }
        !self
            .overwrite(Principal::Everyone)
            .deny
            .contains(&Capability::Connect)
    }
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    ceilings: HashMap<GuildId, u32>,
    channels: HashMap<ResourceId, SimChannel>,
    presence: HashMap<(GuildId, MemberId), ResourceId>,
    profiles: HashMap<MemberId, MemberProfile>,
    failing: HashSet<PlatformOp>,
}

impl State {
    fn allocate_id(&mut self) -> ResourceId {
        if self.next_id < FIRST_ALLOCATED_ID {
            self.next_id = FIRST_ALLOCATED_ID;
        }
        let id = ResourceId(self.next_id);
        self.next_id += 1;
        id
    }

    fn ceiling(&self, guild_id: GuildId) -> u32 {
        self.ceilings
            .get(&guild_id)
            .copied()
            .unwrap_or(DEFAULT_QUALITY_CEILING)
    }

    fn members_of(&self, resource_id: ResourceId) -> HashSet<MemberId> {
        self.presence
            .iter()
            .filter(|(_, r)| **r == resource_id)
            .map(|((_, m), _)| *m)
            .collect()
    }

    fn check(&self, op: PlatformOp) -> PlatformResult<()> {
        if self.failing.contains(&op) {
            return Err(PlatformError::Unavailable(format!(
                "{:?} failure injected",
                op
            )));
        }
        Ok(())
    }

    fn validate(
        &self,
        guild_id: GuildId,
        property: &ResourceProperty,
    ) -> PlatformResult<()> {
        match property {
            ResourceProperty::Name(name) => {
                if name.trim().is_empty() || name.chars().count() > MAX_NAME_LEN {
                    return Err(PlatformError::rejected(
                        "set name",
                        format!("name must be 1-{} characters", MAX_NAME_LEN),
                    ));
                }
            }
            ResourceProperty::Capacity(capacity) => {
                if *capacity > MAX_CAPACITY {
                    return Err(PlatformError::rejected(
                        "set capacity",
                        format!("capacity must be 0-{}", MAX_CAPACITY),
                    ));
                }
            }
            ResourceProperty::Quality(quality) => {
                let ceiling = self.ceiling(guild_id);
                if *quality < MIN_QUALITY || *quality > ceiling {
                    return Err(PlatformError::rejected(
                        "set quality",
                        format!("quality must be {}-{}", MIN_QUALITY, ceiling),
                    ));
                }
            }
        }
        Ok(())
    }

    fn voice_channel(&self, resource_id: ResourceId) -> PlatformResult<&SimChannel> {
        match self.channels.get(&resource_id) {
            Some(channel) if channel.kind == ChannelKind::Voice => Ok(channel),
            _ => Err(PlatformError::UnknownResource(resource_id)),
        }
    }
}

/// In-memory [`ExternalPlatform`].
#[derive(Debug, Default)]
pub struct SimulatedPlatform {
    state: Mutex<State>,
    events: Mutex<Option<mpsc::UnboundedSender<PresenceTransition>>>,
}

impl SimulatedPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start receiving presence transitions. Replaces any earlier subscriber.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PresenceTransition> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().expect("platform lock poisoned") = Some(tx);
        rx
    }

    pub fn add_guild(&self, guild_id: GuildId, quality_ceiling: u32) {
        let mut state = self.state.lock().expect("platform lock poisoned");
        state.ceilings.insert(guild_id, quality_ceiling);
    }

    /// Create a plain voice channel, e.g. a guild's creator channel.
    pub fn add_channel(&self, guild_id: GuildId, name: &str) -> ResourceId {
        let mut state = self.state.lock().expect("platform lock poisoned");
        state.ceilings.entry(guild_id).or_insert(DEFAULT_QUALITY_CEILING);
        let id = state.allocate_id();
        state.channels.insert(
            id,
            SimChannel {
                guild_id,
                kind: ChannelKind::Voice,
                name: name.to_string(),
                container_id: None,
                capacity: 0,
                quality: 64_000,
                overwrites: HashMap::new(),
            },
        );
        id
    }

    pub fn set_profile(&self, member_id: MemberId, profile: MemberProfile) {
        let mut state = self.state.lock().expect("platform lock poisoned");
        state.profiles.insert(member_id, profile);
    }

    /// Make every call of `op` fail until [`recover`](Self::recover).
    pub fn fail(&self, op: PlatformOp) {
        let mut state = self.state.lock().expect("platform lock poisoned");
        state.failing.insert(op);
    }

    pub fn recover(&self, op: PlatformOp) {
        let mut state = self.state.lock().expect("platform lock poisoned");
        state.failing.remove(&op);
    }

    /// A member connecting (or switching) to a voice channel on their own.
    ///
    /// Honours deny overwrites and capacity, like a client would.
    pub fn connect(
        &self,
        guild_id: GuildId,
        member_id: MemberId,
        resource_id: ResourceId,
    ) -> PlatformResult<PresenceTransition> {
        let transition = {
            let mut state = self.state.lock().expect("platform lock poisoned");
            let channel = state.voice_channel(resource_id)?;
            if channel.guild_id != guild_id {
                return Err(PlatformError::UnknownResource(resource_id));
            }
            if !channel.admits(member_id) {
                return Err(PlatformError::rejected("connect", "missing connect permission"));
            }
            let capacity = channel.capacity;
            if capacity > 0 && state.members_of(resource_id).len() as u32 >= capacity {
                return Err(PlatformError::rejected("connect", "channel is full"));
            }
            let from = state.presence.insert((guild_id, member_id), resource_id);
            PresenceTransition {
                guild_id,
                member_id,
                from,
                to: Some(resource_id),
            }
        };
        self.emit([transition]);
        Ok(transition)
    }

    /// A member leaving voice entirely. `None` if they were not connected.
    pub fn disconnect(&self, guild_id: GuildId, member_id: MemberId) -> Option<PresenceTransition> {
        let from = {
            let mut state = self.state.lock().expect("platform lock poisoned");
            state.presence.remove(&(guild_id, member_id))?
        };
        let transition = PresenceTransition::left(guild_id, member_id, from);
        self.emit([transition]);
        Some(transition)
    }

    /// Delete a channel behind the service's back, dropping its members
    /// silently, as if it vanished while the service was offline.
    pub fn remove_externally(&self, resource_id: ResourceId) {
        let mut state = self.state.lock().expect("platform lock poisoned");
        state.channels.remove(&resource_id);
        state.presence.retain(|_, r| *r != resource_id);
    }

    /// Place a member in a channel without emitting a transition.
    pub fn seat(&self, guild_id: GuildId, member_id: MemberId, resource_id: ResourceId) {
        let mut state = self.state.lock().expect("platform lock poisoned");
        state.presence.insert((guild_id, member_id), resource_id);
    }

    pub fn channel(&self, resource_id: ResourceId) -> Option<SimChannel> {
        let state = self.state.lock().expect("platform lock poisoned");
        state.channels.get(&resource_id).cloned()
    }

    pub fn exists(&self, resource_id: ResourceId) -> bool {
        let state = self.state.lock().expect("platform lock poisoned");
        state.channels.contains_key(&resource_id)
    }

    /// Sorted members of a channel.
    pub fn members(&self, resource_id: ResourceId) -> Vec<MemberId> {
        let state = self.state.lock().expect("platform lock poisoned");
        let mut members: Vec<_> = state.members_of(resource_id).into_iter().collect();
        members.sort();
        members
    }

    pub fn location(&self, guild_id: GuildId, member_id: MemberId) -> Option<ResourceId> {
        let state = self.state.lock().expect("platform lock poisoned");
        state.presence.get(&(guild_id, member_id)).copied()
    }

    /// Number of channels of `kind` in a guild.
    pub fn channel_count(&self, guild_id: GuildId, kind: ChannelKind) -> usize {
        let state = self.state.lock().expect("platform lock poisoned");
        state
            .channels
            .values()
            .filter(|c| c.guild_id == guild_id && c.kind == kind)
            .count()
    }

    fn emit(&self, transitions: impl IntoIterator<Item = PresenceTransition>) {
        let events = self.events.lock().expect("platform lock poisoned");
        if let Some(tx) = events.as_ref() {
            for transition in transitions {
                // A dropped receiver only means nobody is listening anymore.
                let _ = tx.send(transition);
            }
        }
    }
}

#[async_trait]
impl ExternalPlatform for SimulatedPlatform {
    async fn list_guilds(&self) -> PlatformResult<Vec<GuildId>> {
        let state = self.state.lock().expect("platform lock poisoned");
        let mut guilds: Vec<_> = state.ceilings.keys().copied().collect();
        guilds.sort();
        Ok(guilds)
    }

    async fn member_profile(
        &self,
        _guild_id: GuildId,
        member_id: MemberId,
    ) -> PlatformResult<MemberProfile> {
        let state = self.state.lock().expect("platform lock poisoned");
        Ok(state.profiles.get(&member_id).cloned().unwrap_or_else(|| {
            let name = format!("member-{}", member_id);
            MemberProfile::new(name.clone(), name)
        }))
    }

    async fn quality_ceiling(&self, guild_id: GuildId) -> PlatformResult<u32> {
        let state = self.state.lock().expect("platform lock poisoned");
        Ok(state.ceiling(guild_id))
    }

    async fn create_resource(&self, spec: ResourceSpec) -> PlatformResult<ResourceId> {
        let mut state = self.state.lock().expect("platform lock poisoned");
        state.check(PlatformOp::CreateResource)?;
        state.validate(spec.guild_id, &ResourceProperty::Name(spec.name.clone()))?;
        state.validate(spec.guild_id, &ResourceProperty::Capacity(spec.capacity))?;
        state.validate(spec.guild_id, &ResourceProperty::Quality(spec.quality))?;

        let mut channel = SimChannel {
            guild_id: spec.guild_id,
            kind: ChannelKind::Voice,
            name: spec.name,
            container_id: spec.container_id,
            capacity: spec.capacity,
            quality: spec.quality,
            overwrites: HashMap::new(),
        };
        for (principal, edit) in &spec.grants {
            channel.edit(*principal, edit);
        }

        let id = state.allocate_id();
        state.channels.insert(id, channel);
        Ok(id)
    }

    async fn delete_resource(&self, resource_id: ResourceId) -> PlatformResult<()> {
        let transitions = {
            let mut state = self.state.lock().expect("platform lock poisoned");
            state.check(PlatformOp::DeleteResource)?;
            let channel = state.voice_channel(resource_id)?;
            let guild_id = channel.guild_id;
            state.channels.remove(&resource_id);

            let evicted: Vec<_> = state.members_of(resource_id).into_iter().collect();
            state.presence.retain(|_, r| *r != resource_id);
            evicted
                .into_iter()
                .map(|member_id| PresenceTransition::left(guild_id, member_id, resource_id))
                .collect::<Vec<_>>()
        };
        self.emit(transitions);
        Ok(())
    }

    async fn resource_exists(&self, resource_id: ResourceId) -> PlatformResult<bool> {
        let state = self.state.lock().expect("platform lock poisoned");
        Ok(state.channels.contains_key(&resource_id))
    }

    async fn set_resource_property(
        &self,
        resource_id: ResourceId,
        property: ResourceProperty,
    ) -> PlatformResult<()> {
        let mut state = self.state.lock().expect("platform lock poisoned");
        state.check(PlatformOp::SetProperty)?;
        let guild_id = state.voice_channel(resource_id)?.guild_id;
        state.validate(guild_id, &property)?;

        let channel = state
            .channels
            .get_mut(&resource_id)
            .ok_or(PlatformError::UnknownResource(resource_id))?;
        match property {
            ResourceProperty::Name(name) => channel.name = name,
            ResourceProperty::Capacity(capacity) => channel.capacity = capacity,
            ResourceProperty::Quality(quality) => channel.quality = quality,
        }
        Ok(())
    }

    async fn edit_capability_grant(
        &self,
        resource_id: ResourceId,
        principal: Principal,
        edit: GrantEdit,
    ) -> PlatformResult<()> {
        let mut state = self.state.lock().expect("platform lock poisoned");
        state.check(PlatformOp::EditGrant)?;
        let channel = state
            .channels
            .get_mut(&resource_id)
            .ok_or(PlatformError::UnknownResource(resource_id))?;
        channel.edit(principal, &edit);
        Ok(())
    }

    async fn move_member(
        &self,
        guild_id: GuildId,
        member_id: MemberId,
        resource_id: ResourceId,
    ) -> PlatformResult<()> {
        let transition = {
            let mut state = self.state.lock().expect("platform lock poisoned");
            state.check(PlatformOp::MoveMember)?;
            state.voice_channel(resource_id)?;
            let Some(from) = state.presence.get(&(guild_id, member_id)).copied() else {
                return Err(PlatformError::rejected(
                    "move member",
                    "member is not connected to voice",
                ));
            };
            if from == resource_id {
                return Ok(());
            }
            state.presence.insert((guild_id, member_id), resource_id);
            PresenceTransition::moved(guild_id, member_id, from, resource_id)
        };
        self.emit([transition]);
        Ok(())
    }

    async fn evict_member(
        &self,
        resource_id: ResourceId,
        member_id: MemberId,
    ) -> PlatformResult<()> {
        let transition = {
            let mut state = self.state.lock().expect("platform lock poisoned");
            state.check(PlatformOp::EvictMember)?;
            let guild_id = state.voice_channel(resource_id)?.guild_id;
            match state.presence.get(&(guild_id, member_id)) {
                Some(current) if *current == resource_id => {
                    state.presence.remove(&(guild_id, member_id));
                    PresenceTransition::left(guild_id, member_id, resource_id)
                }
                _ => return Ok(()),
            }
        };
        self.emit([transition]);
        Ok(())
    }

    async fn list_members(&self, resource_id: ResourceId) -> PlatformResult<HashSet<MemberId>> {
        let state = self.state.lock().expect("platform lock poisoned");
        state.check(PlatformOp::ListMembers)?;
        state.voice_channel(resource_id)?;
        Ok(state.members_of(resource_id))
    }

    async fn create_secondary_resource(&self, spec: SecondarySpec) -> PlatformResult<ResourceId> {
        let mut state = self.state.lock().expect("platform lock poisoned");
        state.check(PlatformOp::CreateSecondary)?;
        state.validate(spec.guild_id, &ResourceProperty::Name(spec.name.clone()))?;

        let mut channel = SimChannel {
            guild_id: spec.guild_id,
            kind: ChannelKind::Text,
            name: spec.name,
            container_id: spec.container_id,
            capacity: 0,
            quality: 0,
            overwrites: HashMap::new(),
        };
        channel.edit(Principal::Everyone, &GrantEdit::deny([Capability::View]));
        for member_id in spec.visible_to {
            channel.edit(Principal::Member(member_id), &GrantEdit::allow(Capability::CHAT));
        }

        let id = state.allocate_id();
        state.channels.insert(id, channel);
        Ok(id)
    }

    async fn delete_secondary_resource(&self, resource_id: ResourceId) -> PlatformResult<()> {
        let mut state = self.state.lock().expect("platform lock poisoned");
        state.check(PlatformOp::DeleteSecondary)?;
        match state.channels.get(&resource_id) {
            Some(channel) if channel.kind == ChannelKind::Text => {
                state.channels.remove(&resource_id);
                Ok(())
            }
            _ => Err(PlatformError::UnknownResource(resource_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUILD: GuildId = GuildId(1);

    fn spec(name: &str) -> ResourceSpec {
        ResourceSpec {
            guild_id: GUILD,
            name: name.to_string(),
            container_id: None,
            capacity: 0,
            quality: 64_000,
            grants: vec![(Principal::Member(MemberId(5)), GrantEdit::owner())],
        }
    }

    #[tokio::test]
    async fn creates_channels_with_grants() {
        let platform = SimulatedPlatform::new();
        let id = platform.create_resource(spec("Room")).await.unwrap();

        let channel = platform.channel(id).unwrap();
        assert_eq!(channel.name, "Room");
        assert!(channel
            .overwrite(Principal::Member(MemberId(5)))
            .allow
            .contains(&Capability::Manage));
    }

    #[tokio::test]
    async fn rejects_quality_above_ceiling() {
        let platform = SimulatedPlatform::new();
        platform.add_guild(GUILD, 96_000);
        let mut too_good = spec("Room");
        too_good.quality = 384_000;

        let err = platform.create_resource(too_good).await.unwrap_err();
        assert!(matches!(err, PlatformError::Rejected { .. }));
    }

    #[tokio::test]
    async fn connect_honours_deny_overwrites() {
        let platform = SimulatedPlatform::new();
        let id = platform.create_resource(spec("Room")).await.unwrap();
        platform
            .edit_capability_grant(id, Principal::Member(MemberId(9)), GrantEdit::deny(Capability::ACCESS))
            .await
            .unwrap();

        assert!(platform.connect(GUILD, MemberId(9), id).is_err());
        assert!(platform.connect(GUILD, MemberId(10), id).is_ok());
    }

    #[tokio::test]
    async fn move_reports_a_transition() {
        let platform = SimulatedPlatform::new();
        let mut events = platform.subscribe();
        let lobby = platform.add_channel(GUILD, "Lobby");
        let room = platform.create_resource(spec("Room")).await.unwrap();

        platform.connect(GUILD, MemberId(5), lobby).unwrap();
        platform.move_member(GUILD, MemberId(5), room).await.unwrap();

        assert_eq!(
            events.recv().await,
            Some(PresenceTransition::joined(GUILD, MemberId(5), lobby))
        );
        assert_eq!(
            events.recv().await,
            Some(PresenceTransition::moved(GUILD, MemberId(5), lobby, room))
        );
    }

    #[tokio::test]
    async fn injected_failures_last_until_recovered() {
        let platform = SimulatedPlatform::new();
        platform.fail(PlatformOp::CreateResource);
        assert!(platform.create_resource(spec("Room")).await.is_err());

        platform.recover(PlatformOp::CreateResource);
        assert!(platform.create_resource(spec("Room")).await.is_ok());
    }

    #[tokio::test]
    async fn deleting_twice_reports_unknown_resource() {
        let platform = SimulatedPlatform::new();
        let id = platform.create_resource(spec("Room")).await.unwrap();
        platform.delete_resource(id).await.unwrap();

        let err = platform.delete_resource(id).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
