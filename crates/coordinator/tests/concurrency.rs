//! Batching and writer-race integration tests.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]

mod common;

use std::time::Duration;

use common::{Backend, TestTeams};
use futures::future::join_all;
use proptest::prelude::*;
use teamchain_test_utils::{assert_eventually_async, test_teams_config};
use teamchain_types::{ChangeType, InviteTarget, Role, TeamSettings};
use tokio_util::sync::CancellationToken;

// =============================================================================
// Batch atomicity
// =============================================================================

#[tokio::test]
async fn test_simultaneous_requests_produce_one_link() {
    let teams = TestTeams::new();
    let owner = teams.user("owner");
    let team_id = teams.create("acme", owner, TeamSettings::open(Role::Reader)).await;

    let joiners: Vec<_> = (0..8).map(|i| teams.user(&format!("joiner-{i}"))).collect();
    let acks =
        join_all(joiners.iter().map(|joiner| teams.service.request_access(team_id, joiner.principal)))
            .await;
    assert!(acks.into_iter().all(|ack| ack.unwrap().queued));

    let report = teams.service.trigger(team_id).await.unwrap();
    assert_eq!(report.links.len(), 1);
    assert_eq!(report.join_outcomes.len(), joiners.len());
    assert_eq!(teams.chain_len(team_id), 2);

    let members = teams.service.load_membership(team_id, true).await.unwrap();
    for joiner in &joiners {
        assert_eq!(members.get(joiner), Some(&Role::Reader));
    }
}

#[tokio::test]
async fn test_full_queue_triggers_eagerly() {
    let mut config = test_teams_config();
    config.join.max_pending_requests = 3;
    let teams = TestTeams::with_config(config);
    let owner = teams.user("owner");
    let team_id = teams.create("acme", owner, TeamSettings::open(Role::Reader)).await;

    for i in 0..3 {
        teams.service.request_access(team_id, teams.user(&format!("u{i}")).principal).await.unwrap();
    }

    assert_eq!(teams.chain_len(team_id), 2);
    assert_eq!(teams.service.coordinator().pending_len(team_id), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Any number of queued requests lands as exactly one link.
    #[test]
    fn prop_requests_coalesce(joiners in 1usize..24, keyless in 0usize..8) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let teams = TestTeams::new();
            let owner = teams.user("owner");
            let team_id = teams.create("acme", owner, TeamSettings::open(Role::Writer)).await;

            for i in 0..joiners {
                let principal = if i < keyless {
                    teams.keyless_user(&format!("k{i}"))
                } else {
                    teams.user(&format!("u{i}")).principal
                };
                teams.service.request_access(team_id, principal).await.unwrap();
            }

            let report = teams.service.trigger(team_id).await.unwrap();
            prop_assert_eq!(report.links.len(), 1);
            prop_assert_eq!(report.last_seqno(), Some(2));

            let state = teams.service.load_team(team_id, true).await.unwrap();
            let invited = keyless.min(joiners);
            prop_assert_eq!(state.members().len(), 1 + joiners - invited);
            prop_assert_eq!(state.invites().len(), invited);
            Ok::<(), TestCaseError>(())
        })?;
    }
}

// =============================================================================
// Writer races
// =============================================================================

#[tokio::test]
async fn test_two_writers_both_land() {
    let backend = Backend::new();
    let first = backend.service(test_teams_config());
    let second = backend.service(test_teams_config());

    let owner = backend.directory.register_provisioned("owner");
    let team_id = first.create_team("acme", owner, TeamSettings::open(Role::Reader)).await.unwrap();
    let x = backend.directory.register_provisioned("x");
    let y = backend.directory.register_provisioned("y");

    first.request_access(team_id, x.principal).await.unwrap();
    second.request_access(team_id, y.principal).await.unwrap();
    let (left, right) = tokio::join!(first.trigger(team_id), second.trigger(team_id));
    assert_eq!(left.unwrap().links.len(), 1);
    assert_eq!(right.unwrap().links.len(), 1);

    assert_eq!(backend.store.len(team_id), 3);
    for service in [&first, &second] {
        let members = service.load_membership(team_id, false).await.unwrap();
        assert_eq!(members.get(&x), Some(&Role::Reader));
        assert_eq!(members.get(&y), Some(&Role::Reader));
    }
}

// =============================================================================
// Background loop
// =============================================================================

#[tokio::test]
async fn test_background_loop_reconciles_reset() {
    let teams = TestTeams::new();
    let owner = teams.user("owner");
    let team_id = teams.create("acme", owner, TeamSettings::closed()).await;
    let admin = teams.user("admin");
    teams
        .service
        .submit_change(team_id, owner, ChangeType::AddMember {
            identity: admin,
            role: Role::Admin,
        })
        .await
        .unwrap();
    teams.service.load_team(team_id, false).await.unwrap();

    let cancel = CancellationToken::new();
    let handle = teams.service.start(cancel.clone());
    let service = &teams.service;

    let renewed = teams.backend.directory.reset(admin.principal).unwrap();
    teams.service.notify_identity_reset(admin.principal);
    let invited = assert_eventually_async(Duration::from_secs(2), || async move {
        service
            .active_invites(team_id)
            .await
            .is_ok_and(|invites| invites.iter().any(|invite| invite.target == InviteTarget::Direct(renewed)))
    })
    .await;
    assert!(invited, "reset never turned into an invite");

    teams.backend.directory.provision(admin.principal).unwrap();
    teams.service.notify_key_material_ready(admin.principal, renewed.epoch);
    let restored = assert_eventually_async(Duration::from_secs(2), || async move {
        service
            .load_membership(team_id, true)
            .await
            .is_ok_and(|members| members.get(&renewed) == Some(&Role::Admin))
    })
    .await;
    assert!(restored, "admin was not restored after key material");

    cancel.cancel();
    handle.await.unwrap();
}
