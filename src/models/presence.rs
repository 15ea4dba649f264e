use serde::{Deserialize, Serialize};

use super::ids::{GuildId, MemberId, ResourceId};

/// A member's voice presence changing within a guild.
///
/// `from` is the channel they were in, `to` the channel they are in now.
/// Both set means the member moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceTransition {
    pub guild_id: GuildId,
    pub member_id: MemberId,
    pub from: Option<ResourceId>,
    pub to: Option<ResourceId>,
}

impl PresenceTransition {
    pub fn joined(guild_id: GuildId, member_id: MemberId, to: ResourceId) -> Self {
        Self {
            guild_id,
            member_id,
            from: None,
            to: Some(to),
        }
    }

    pub fn left(guild_id: GuildId, member_id: MemberId, from: ResourceId) -> Self {
        Self {
            guild_id,
            member_id,
            from: Some(from),
            to: None,
        }
    }

    pub fn moved(guild_id: GuildId, member_id: MemberId, from: ResourceId, to: ResourceId) -> Self {
        Self {
            guild_id,
            member_id,
            from: Some(from),
            to: Some(to),
        }
    }

    /// Split into effects, leaves first.
    ///
    /// A transition whose `from` and `to` are the same channel (mute, deafen,
    /// stream toggles) produces nothing.
    pub fn effects(&self) -> Vec<PresenceEffect> {
        if self.from == self.to {
            return Vec::new();
        }

        let mut effects = Vec::with_capacity(2);
        if let Some(resource_id) = self.from {
            effects.push(PresenceEffect::Leave {
                guild_id: self.guild_id,
                member_id: self.member_id,
                resource_id,
            });
        }
        if let Some(resource_id) = self.to {
            effects.push(PresenceEffect::Join {
                guild_id: self.guild_id,
                member_id: self.member_id,
                resource_id,
            });
        }
        effects
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceEffect {
    Leave {
        guild_id: GuildId,
        member_id: MemberId,
        resource_id: ResourceId,
    },
    Join {
        guild_id: GuildId,
        member_id: MemberId,
        resource_id: ResourceId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUILD: GuildId = GuildId(1);
    const MEMBER: MemberId = MemberId(2);

    #[test]
    fn move_yields_leave_before_join() {
        let effects =
            PresenceTransition::moved(GUILD, MEMBER, ResourceId(10), ResourceId(20)).effects();
        assert_eq!(
            effects,
            vec![
                PresenceEffect::Leave {
                    guild_id: GUILD,
                    member_id: MEMBER,
                    resource_id: ResourceId(10)
                },
                PresenceEffect::Join {
                    guild_id: GUILD,
                    member_id: MEMBER,
                    resource_id: ResourceId(20)
                },
            ]
        );
    }

    #[test]
    fn join_and_leave_yield_single_effects() {
        assert_eq!(
            PresenceTransition::joined(GUILD, MEMBER, ResourceId(10))
                .effects()
                .len(),
            1
        );
        assert!(matches!(
            PresenceTransition::left(GUILD, MEMBER, ResourceId(10)).effects()[..],
            [PresenceEffect::Leave { .. }]
        ));
    }

    #[test]
    fn same_channel_updates_are_ignored() {
        let t = PresenceTransition::moved(GUILD, MEMBER, ResourceId(10), ResourceId(10));
        assert!(t.effects().is_empty());
    }
}
