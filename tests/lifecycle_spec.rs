mod common;

use common::*;
use tempvoice::commands::{CommandOutcome, VoiceCommand};
use tempvoice::lifecycle::CreateOutcome;
use tempvoice::models::*;
use tempvoice::platform::memory::{ChannelKind, PlatformOp};
use tempvoice::platform::{Capability, Principal};
use tempvoice::router::EffectOutcome;
use tempvoice::store::PersistentStore;
use tempvoice::Error;

mod create {
    use super::*;

    #[tokio::test]
    async fn joining_the_creator_spawns_an_owned_channel() {
        let h = Harness::new();

        let resource = h.spawn_channel(OWNER).await;

        assert_eq!(resource.owner_id, OWNER);
        assert_eq!(resource.guild_id, GUILD);
        assert_eq!(h.platform.location(GUILD, OWNER), Some(resource.resource_id));

        let channel = h.platform.channel(resource.resource_id).unwrap();
        assert_eq!(channel.name, "member-11's room");
        assert_eq!(channel.capacity, 0);
        assert!(channel
            .overwrite(Principal::Member(OWNER))
            .allow
            .contains(&Capability::Manage));

        assert_eq!(h.record(resource.resource_id), Some(resource.clone()));
        assert_eq!(h.entry(resource.resource_id).await, Some(resource.clone()));
        assert_eq!(
            h.service.registry().owned_by(GUILD, OWNER),
            Some(resource.resource_id)
        );
    }

    #[tokio::test]
    async fn uses_the_member_profile_and_policy_defaults() {
        let h = Harness::with_policy(|policy| {
            policy.name_template = "{username} / {user}".to_string();
            policy.default_capacity = 4;
            policy.container_id = Some(ResourceId(77));
        });
        h.platform
            .set_profile(OWNER, MemberProfile::new("Ada", "ada_l"));

        let resource = h.spawn_channel(OWNER).await;

        let channel = h.platform.channel(resource.resource_id).unwrap();
        assert_eq!(channel.name, "Ada / ada_l");
        assert_eq!(channel.capacity, 4);
        assert_eq!(channel.container_id, Some(ResourceId(77)));
    }

    #[tokio::test]
    async fn clamps_quality_to_the_guild_ceiling() {
        let h = Harness::with_policy(|policy| policy.default_quality = 384_000);
        h.platform.add_guild(GUILD, 128_000);

        let resource = h.spawn_channel(OWNER).await;

        assert_eq!(h.platform.channel(resource.resource_id).unwrap().quality, 128_000);
    }

    #[tokio::test]
    async fn creates_a_private_text_channel_when_configured() {
        let h = Harness::with_policy(|policy| policy.auto_secondary_resource = true);

        let resource = h.spawn_channel(OWNER).await;

        let secondary_id = resource.secondary_resource_id.expect("No text channel");
        let secondary = h.platform.channel(secondary_id).unwrap();
        assert_eq!(secondary.kind, ChannelKind::Text);
        assert_eq!(secondary.name, "chat-member-11-s-room");
        assert!(secondary
            .overwrite(Principal::Member(OWNER))
            .allow
            .contains(&Capability::SendMessages));
        assert!(secondary
            .overwrite(Principal::Everyone)
            .deny
            .contains(&Capability::View));
        assert_eq!(
            h.record(resource.resource_id).unwrap().secondary_resource_id,
            Some(secondary_id)
        );
    }

    #[tokio::test]
    async fn fails_without_a_policy() {
        let h = Harness::new();

        let result = h.service.lifecycle().create(GuildId(2), OWNER).await;

        assert!(matches!(
            result,
            Err(Error::ConfigMissing { guild_id }) if guild_id == GuildId(2)
        ));
    }

    #[tokio::test]
    async fn moves_an_existing_owner_back_instead_of_duplicating() {
        let h = Harness::new();
        let resource = h.spawn_channel(OWNER).await;
        h.connect(OTHER, resource.resource_id).await;

        let outcomes = h.join_creator(OWNER).await;

        assert_eq!(
            outcomes,
            vec![
                EffectOutcome::Kept(resource.resource_id),
                EffectOutcome::Created(CreateOutcome::Relocated(resource.clone())),
            ]
        );
        assert_eq!(h.platform.location(GUILD, OWNER), Some(resource.resource_id));
        assert_eq!(h.platform.channel_count(GUILD, ChannelKind::Voice), 2);
        assert_eq!(h.service.registry().len(), 1);
    }

    #[tokio::test]
    async fn create_command_relocates_an_owner() {
        let h = Harness::new();
        let resource = h.spawn_channel(OWNER).await;

        let outcome = h
            .service
            .commands()
            .dispatch(OWNER, VoiceCommand::Create { guild_id: GUILD })
            .await
            .unwrap();

        assert_eq!(outcome, CommandOutcome::Relocated(resource));
        assert_eq!(h.db.list_temp_resources(GUILD).unwrap().len(), 1);
    }
}

mod create_failures {
    use super::*;

    async fn assert_nothing_left(h: &Harness) {
        assert!(h.service.registry().is_empty());
        assert!(h.db.list_temp_resources(GUILD).unwrap().is_empty());
        assert_eq!(h.platform.channel_count(GUILD, ChannelKind::Voice), 1);
        assert_eq!(h.platform.channel_count(GUILD, ChannelKind::Text), 0);
    }

    #[tokio::test]
    async fn allocation_failure_leaves_no_state() {
        let h = Harness::new();
        h.platform.fail(PlatformOp::CreateResource);

        let outcomes = h.join_creator(OWNER).await;

        assert!(matches!(outcomes.as_slice(), [EffectOutcome::Failed(_)]));
        assert_nothing_left(&h).await;
        assert_eq!(h.platform.location(GUILD, OWNER), Some(h.creator));
    }

    #[tokio::test]
    async fn text_channel_failure_releases_the_voice_channel() {
        let h = Harness::with_policy(|policy| policy.auto_secondary_resource = true);
        h.platform.fail(PlatformOp::CreateSecondary);

        let outcomes = h.join_creator(OWNER).await;

        assert!(matches!(outcomes.as_slice(), [EffectOutcome::Failed(_)]));
        assert_nothing_left(&h).await;
    }

    #[tokio::test]
    async fn relocation_failure_deletes_the_new_channel() {
        let h = Harness::new();
        h.platform.fail(PlatformOp::MoveMember);

        let outcomes = h.join_creator(OWNER).await;

        assert!(matches!(outcomes.as_slice(), [EffectOutcome::Failed(_)]));
        assert_nothing_left(&h).await;
    }

    #[tokio::test]
    async fn store_failure_releases_allocated_channels() {
        let h = Harness::with_policy(|policy| policy.auto_secondary_resource = true);
        h.platform.seat(GUILD, OWNER, h.creator);
        h.store.fail_writes(true);

        let result = h.service.lifecycle().create(GUILD, OWNER).await;

        assert!(matches!(result, Err(Error::Persistence(_))));
        assert_nothing_left(&h).await;
    }

    #[tokio::test]
    async fn a_failed_create_can_be_retried() {
        let h = Harness::new();
        h.platform.fail(PlatformOp::CreateResource);
        h.join_creator(OWNER).await;
        h.platform.recover(PlatformOp::CreateResource);

        let result = h.service.lifecycle().create(GUILD, OWNER).await.unwrap();

        assert!(result.is_new());
        assert_eq!(
            h.platform.location(GUILD, OWNER),
            Some(result.resource().resource_id)
        );
    }
}

mod delete {
    use super::*;

    #[tokio::test]
    async fn last_member_leaving_deletes_the_channel() {
        let h = Harness::new();
        let resource = h.spawn_channel(OWNER).await;

        let outcomes = h.disconnect(OWNER).await;

        assert_eq!(outcomes, vec![EffectOutcome::Deleted(resource.resource_id)]);
        assert!(!h.platform.exists(resource.resource_id));
        assert!(h.record(resource.resource_id).is_none());
        assert!(h.entry(resource.resource_id).await.is_none());
        assert_eq!(h.service.registry().owned_by(GUILD, OWNER), None);
    }

    #[tokio::test]
    async fn owner_leaving_an_occupied_channel_keeps_it() {
        let h = Harness::new();
        let resource = h.spawn_channel(OWNER).await;
        h.connect(OTHER, resource.resource_id).await;

        let outcomes = h.disconnect(OWNER).await;

        assert_eq!(outcomes, vec![EffectOutcome::Kept(resource.resource_id)]);
        assert!(h.platform.exists(resource.resource_id));
        assert_eq!(h.record(resource.resource_id).unwrap().owner_id, OWNER);
        assert_eq!(h.entry(resource.resource_id).await.unwrap().owner_id, OWNER);
    }

    #[tokio::test]
    async fn removes_the_text_channel_and_grants() {
        let h = Harness::with_policy(|policy| policy.auto_secondary_resource = true);
        let resource = h.spawn_channel(OWNER).await;
        let secondary_id = resource.secondary_resource_id.unwrap();
        h.service
            .ownership()
            .permit(resource.resource_id, OWNER, OTHER)
            .await
            .unwrap();

        h.service
            .lifecycle()
            .delete(resource.resource_id)
            .await
            .unwrap();

        assert!(!h.platform.exists(secondary_id));
        assert!(h
            .db
            .list_permission_grants(resource.resource_id)
            .unwrap()
            .is_empty());
        assert_eq!(h.platform.location(GUILD, OWNER), None);
    }

    #[tokio::test]
    async fn is_idempotent() {
        let h = Harness::new();
        let resource = h.spawn_channel(OWNER).await;
        let lifecycle = h.service.lifecycle();

        lifecycle.delete(resource.resource_id).await.unwrap();
        lifecycle.delete(resource.resource_id).await.unwrap();
        lifecycle.delete(ResourceId(424_242)).await.unwrap();

        assert!(h.service.registry().is_empty());
    }

    #[tokio::test]
    async fn concurrent_deletes_both_succeed() {
        let h = Harness::new();
        let resource = h.spawn_channel(OWNER).await;
        let lifecycle = h.service.lifecycle();

        let (first, second) = tokio::join!(
            lifecycle.delete(resource.resource_id),
            lifecycle.delete(resource.resource_id)
        );

        assert!(first.is_ok());
        assert!(second.is_ok());
        assert!(!h.platform.exists(resource.resource_id));
        assert!(h.record(resource.resource_id).is_none());
    }

    #[tokio::test]
    async fn treats_a_vanished_channel_as_deleted() {
        let h = Harness::new();
        let resource = h.spawn_channel(OWNER).await;
        h.platform.remove_externally(resource.resource_id);

        h.service
            .lifecycle()
            .delete(resource.resource_id)
            .await
            .unwrap();

        assert!(h.record(resource.resource_id).is_none());
        assert!(h.service.registry().is_empty());
    }

    #[tokio::test]
    async fn platform_refusal_changes_nothing() {
        let h = Harness::new();
        let resource = h.spawn_channel(OWNER).await;
        h.platform.fail(PlatformOp::DeleteResource);

        let result = h.service.lifecycle().delete(resource.resource_id).await;

        assert!(matches!(result, Err(Error::ExternalPlatform(_))));
        assert!(h.platform.exists(resource.resource_id));
        assert!(h.record(resource.resource_id).is_some());
        assert!(h.entry(resource.resource_id).await.is_some());
    }

    #[tokio::test]
    async fn store_failure_still_forgets_the_channel() {
        let h = Harness::new();
        let resource = h.spawn_channel(OWNER).await;
        h.store.fail_writes(true);

        let result = h.service.lifecycle().delete(resource.resource_id).await;

        assert!(matches!(result, Err(Error::Persistence(_))));
        assert!(!h.platform.exists(resource.resource_id));
        assert!(h.entry(resource.resource_id).await.is_none());
    }

    #[tokio::test]
    async fn delete_if_empty_keeps_occupied_channels() {
        let h = Harness::new();
        let resource = h.spawn_channel(OWNER).await;

        let deleted = h
            .service
            .lifecycle()
            .delete_if_empty(resource.resource_id)
            .await
            .unwrap();

        assert!(!deleted);
        assert!(h.platform.exists(resource.resource_id));
    }

    #[tokio::test]
    async fn delete_command_is_owner_only() {
        let h = Harness::new();
        let resource = h.spawn_channel(OWNER).await;
        let commands = h.service.commands();
        let command = VoiceCommand::Delete {
            resource_id: resource.resource_id,
        };

        let refused = commands.dispatch(OTHER, command.clone()).await;
        assert!(matches!(refused, Err(Error::NotOwner { .. })));
        assert!(h.platform.exists(resource.resource_id));

        let outcome = commands.dispatch(OWNER, command).await.unwrap();
        assert_eq!(outcome, CommandOutcome::Deleted(resource.resource_id));
        assert!(!h.platform.exists(resource.resource_id));
    }
}
