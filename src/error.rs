//! Error types for temporary channel operations.

use crate::models::{GuildId, MemberId, ResourceId};
use crate::platform::PlatformError;

/// The result type used throughout tempvoice.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned to the command layer.
///
/// Every variant except [`Error::Persistence`] after a successful allocation
/// guarantees that nothing was changed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The guild has no policy configured.
    #[error("no temporary channel policy configured for guild {guild_id}")]
    ConfigMissing { guild_id: GuildId },

    /// The channel is not a tracked temporary channel.
    #[error("channel {resource_id} is not a temporary channel")]
    ResourceNotFound { resource_id: ResourceId },

    /// The caller does not own the channel.
    #[error("member {member_id} does not own channel {resource_id}")]
    NotOwner {
        resource_id: ResourceId,
        member_id: MemberId,
    },

    /// A claim was attempted while the owner is still connected.
    #[error("owner {owner_id} is still connected to channel {resource_id}")]
    OwnershipConflict {
        resource_id: ResourceId,
        owner_id: MemberId,
    },

    /// The target member is not valid for this operation.
    #[error("invalid target {member_id}: {reason}")]
    InvalidTarget {
        member_id: MemberId,
        reason: &'static str,
    },

    /// The guild's policy does not allow owners to edit their channels.
    #[error("channel editing is disabled in guild {guild_id}")]
    EditingDisabled { guild_id: GuildId },

    /// A platform call failed.
    #[error("platform error: {0}")]
    ExternalPlatform(#[from] PlatformError),

    /// The store rejected a read or write.
    #[error("persistence error: {0}")]
    Persistence(#[source] anyhow::Error),
}

impl Error {
    pub(crate) fn persistence(e: anyhow::Error) -> Self {
        Self::Persistence(e)
    }

    /// Whether the error reflects a caller mistake rather than a failure.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigMissing { .. }
                | Self::ResourceNotFound { .. }
                | Self::NotOwner { .. }
                | Self::OwnershipConflict { .. }
                | Self::InvalidTarget { .. }
                | Self::EditingDisabled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_errors_convert() {
        let err: Error = PlatformError::UnknownResource(ResourceId(7)).into();
        assert!(matches!(err, Error::ExternalPlatform(_)));
        assert!(!err.is_user_error());
    }

    #[test]
    fn messages_name_the_resource() {
        let err = Error::NotOwner {
            resource_id: ResourceId(7),
            member_id: MemberId(3),
        };
        assert_eq!(err.to_string(), "member 3 does not own channel 7");
        assert!(err.is_user_error());
    }
}
