//! Member-issued commands on temporary channels.
//!
//! Each [`VoiceCommand`] maps onto one lifecycle or ownership operation.
//! Errors are returned to the caller unchanged so the command surface can
//! report them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::lifecycle::{CreateOutcome, LifecycleController};
use crate::models::{GuildId, MemberId, PermissionGrant, ResourceId, ResourceSummary, TempResource};
use crate::ownership::OwnershipManager;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum VoiceCommand {
    Create {
        guild_id: GuildId,
    },
    Delete {
        resource_id: ResourceId,
    },
    Claim {
        resource_id: ResourceId,
    },
    Transfer {
        resource_id: ResourceId,
        to: MemberId,
    },
    Permit {
        resource_id: ResourceId,
        user_id: MemberId,
    },
    Reject {
        resource_id: ResourceId,
        user_id: MemberId,
    },
    Rename {
        resource_id: ResourceId,
        name: String,
    },
    SetCapacity {
        resource_id: ResourceId,
        capacity: u32,
    },
    SetQuality {
        resource_id: ResourceId,
        quality: u32,
    },
    Lock {
        resource_id: ResourceId,
        locked: bool,
    },
    Hide {
        resource_id: ResourceId,
        hidden: bool,
    },
    SecondaryResource {
        resource_id: ResourceId,
        enabled: bool,
    },
    Describe {
        resource_id: ResourceId,
    },
}

impl VoiceCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Delete { .. } => "delete",
            Self::Claim { .. } => "claim",
            Self::Transfer { .. } => "transfer",
            Self::Permit { .. } => "permit",
            Self::Reject { .. } => "reject",
            Self::Rename { .. } => "rename",
            Self::SetCapacity { .. } => "set_capacity",
            Self::SetQuality { .. } => "set_quality",
            Self::Lock { .. } => "lock",
            Self::Hide { .. } => "hide",
            Self::SecondaryResource { .. } => "secondary_resource",
            Self::Describe { .. } => "describe",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Created(TempResource),
    Relocated(TempResource),
    Deleted(ResourceId),
    OwnerChanged(TempResource),
    Granted(PermissionGrant),
    Updated(ResourceId),
    SecondaryResource {
        resource_id: ResourceId,
        secondary_resource_id: Option<ResourceId>,
    },
    Summary(ResourceSummary),
}

pub struct CommandDispatcher {
    lifecycle: Arc<LifecycleController>,
    ownership: Arc<OwnershipManager>,
}

impl CommandDispatcher {
    pub fn new(lifecycle: Arc<LifecycleController>, ownership: Arc<OwnershipManager>) -> Self {
        Self {
            lifecycle,
            ownership,
        }
    }

    pub async fn dispatch(&self, invoker: MemberId, command: VoiceCommand) -> Result<CommandOutcome> {
        let name = command.name();
        let result = self.execute(invoker, command).await;
        match &result {
            Ok(_) => tracing::debug!("Command {} by {} succeeded", name, invoker),
            Err(e) if e.is_user_error() => {
                tracing::debug!("Command {} by {} refused: {}", name, invoker, e)
            }
            Err(e) => tracing::warn!("Command {} by {} failed: {}", name, invoker, e),
        }
        result
    }

    async fn execute(&self, invoker: MemberId, command: VoiceCommand) -> Result<CommandOutcome> {
        let ownership = &self.ownership;
        Ok(match command {
            VoiceCommand::Create { guild_id } => {
                match self.lifecycle.create(guild_id, invoker).await? {
                    CreateOutcome::Created(resource) => CommandOutcome::Created(resource),
                    CreateOutcome::Relocated(resource) => CommandOutcome::Relocated(resource),
                }
            }
            VoiceCommand::Delete { resource_id } => {
                self.lifecycle.delete_owned(resource_id, invoker).await?;
                CommandOutcome::Deleted(resource_id)
            }
            VoiceCommand::Claim { resource_id } => {
                CommandOutcome::OwnerChanged(ownership.claim(resource_id, invoker).await?)
            }
            VoiceCommand::Transfer { resource_id, to } => {
                CommandOutcome::OwnerChanged(ownership.transfer(resource_id, invoker, to).await?)
            }
            VoiceCommand::Permit {
                resource_id,
                user_id,
            } => CommandOutcome::Granted(ownership.permit(resource_id, invoker, user_id).await?),
            VoiceCommand::Reject {
                resource_id,
                user_id,
            } => CommandOutcome::Granted(ownership.reject(resource_id, invoker, user_id).await?),
            VoiceCommand::Rename { resource_id, name } => {
                ownership.rename(resource_id, invoker, name).await?;
                CommandOutcome::Updated(resource_id)
            }
            VoiceCommand::SetCapacity {
                resource_id,
                capacity,
            } => {
                ownership
                    .set_capacity(resource_id, invoker, capacity)
                    .await?;
                CommandOutcome::Updated(resource_id)
            }
            VoiceCommand::SetQuality {
                resource_id,
                quality,
            } => {
                ownership.set_quality(resource_id, invoker, quality).await?;
                CommandOutcome::Updated(resource_id)
            }
            VoiceCommand::Lock {
                resource_id,
                locked,
            } => {
                ownership.set_locked(resource_id, invoker, locked).await?;
                CommandOutcome::Updated(resource_id)
            }
            VoiceCommand::Hide {
                resource_id,
                hidden,
            } => {
                ownership.set_hidden(resource_id, invoker, hidden).await?;
                CommandOutcome::Updated(resource_id)
            }
            VoiceCommand::SecondaryResource {
                resource_id,
                enabled,
            } => {
                let secondary_resource_id = ownership
                    .set_secondary_resource(resource_id, invoker, enabled)
                    .await?;
                CommandOutcome::SecondaryResource {
                    resource_id,
                    secondary_resource_id,
                }
            }
            VoiceCommand::Describe { resource_id } => {
                CommandOutcome::Summary(ownership.describe(resource_id).await?)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_tagged_json() {
        let command: VoiceCommand =
            serde_json::from_str(r#"{"action":"transfer","resource_id":7,"to":9}"#).unwrap();
        assert_eq!(
            command,
            VoiceCommand::Transfer {
                resource_id: ResourceId(7),
                to: MemberId(9),
            }
        );
        assert_eq!(command.name(), "transfer");
    }

    #[test]
    fn unknown_action_is_rejected() {
        let parsed = serde_json::from_str::<VoiceCommand>(r#"{"action":"explode"}"#);
        assert!(parsed.is_err());
    }
}
