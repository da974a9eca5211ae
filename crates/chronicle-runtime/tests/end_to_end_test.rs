//! End-to-end tests: command bus, idempotent dispatch, repository and
//! stores wired through one `RuntimeContext`.

mod common;

use std::sync::{Arc, Mutex};

use chronicle_core::aggregate::AggregateImage;
use chronicle_core::error::DomainError;
use chronicle_core::identity::SourceKey;
use chronicle_core::store::{EventStore, SnapshotStore};
use chronicle_runtime::command_result::ReplyType;
use chronicle_runtime::config::RuntimeConfig;
use chronicle_runtime::handling::InterceptorChain;
use chronicle_runtime::repository::SaveOutcome;
use chronicle_test_support::{RecordingInterceptor, RegisterUser, UserAccount, UserEvent};

fn registered(email: &str) -> UserEvent {
    UserEvent::Registered {
        email: email.into(),
    }
}

#[tokio::test]
async fn test_register_user_save_is_idempotent_per_correlation_id() {
    // Arrange
    let ctx = common::build_test_context(RuntimeConfig::default());
    let repo = ctx.repository::<UserAccount>().unwrap();
    let mut user = repo.create("U1");
    user.raise_event(registered("ada@example.com"), repo.clock())
        .unwrap();
    assert_eq!(user.version(), 1);

    // Act
    let first = repo.save(&mut user, "cmd-1").await.unwrap();
    let mut replay = repo.create("U1");
    replay
        .raise_event(registered("ada@example.com"), repo.clock())
        .unwrap();
    let second = repo.save(&mut replay, "cmd-1").await.unwrap();

    // Assert
    assert!(first.is_committed());
    assert!(matches!(second, SaveOutcome::AlreadyApplied));
    let key = SourceKey::new("user", "U1");
    let events = ctx.event_store().find_after_version(&key, 0).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].version, 1);
    assert_eq!(events[0].correlation_id, "cmd-1");
}

#[tokio::test]
async fn test_concurrent_first_saves_have_exactly_one_winner() {
    // Arrange
    let ctx = common::build_test_context(RuntimeConfig::default());
    let repo = Arc::new(ctx.repository::<UserAccount>().unwrap());

    // Act
    let mut tasks = Vec::new();
    for correlation_id in ["cmd-a", "cmd-b"] {
        let repo = Arc::clone(&repo);
        tasks.push(tokio::spawn(async move {
            let mut user = repo.create("U1");
            user.raise_event(registered(correlation_id), repo.clock())?;
            repo.save(&mut user, correlation_id).await
        }));
    }
    let mut committed = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(outcome) if outcome.is_committed() => committed += 1,
            Err(DomainError::ConcurrencyConflict { .. }) => conflicts += 1,
            other => panic!("unexpected save result {other:?}"),
        }
    }

    // Assert
    assert_eq!(committed, 1);
    assert_eq!(conflicts, 1);
    let key = SourceKey::new("user", "U1");
    let events = ctx.event_store().find_after_version(&key, 0).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].version, 1);
}

#[tokio::test]
async fn test_cache_round_trip_follows_config_switch() {
    // Arrange
    let enabled = common::build_test_context(RuntimeConfig {
        caching_enabled: true,
        ..RuntimeConfig::default()
    });
    let disabled = common::build_test_context(RuntimeConfig::default());
    let image = AggregateImage {
        aggregate_id: "U1".to_owned(),
        version: 1,
        state: UserAccount {
            email: "ada@example.com".into(),
            ..UserAccount::default()
        },
    };

    // Act
    enabled.cache().set(&image, "user/U1").unwrap();
    disabled.cache().set(&image, "user/U1").unwrap();

    // Assert
    let cached: Option<AggregateImage<UserAccount>> = enabled.cache().get("user/U1").unwrap();
    assert_eq!(cached, Some(image));
    let missed: Option<AggregateImage<UserAccount>> = disabled.cache().get("user/U1").unwrap();
    assert!(missed.is_none());
}

#[tokio::test]
async fn test_command_round_trip_through_bus_and_dispatcher() {
    // Arrange
    let ctx = common::build_test_context(RuntimeConfig::default());
    let log = Arc::new(Mutex::new(Vec::new()));
    let chain = InterceptorChain::<RegisterUser>::new()
        .with(Arc::new(RecordingInterceptor::new("audit", log.clone())));
    let bus = ctx.command_bus(Arc::new(common::LoopbackSender::new(&ctx, chain)));
    let command = RegisterUser::new("cmd-1", "U1", "ada@example.com");

    // Act
    let result = bus
        .send_with_reply(&command, ReplyType::CommandExecuted)
        .unwrap()
        .wait()
        .await;

    // Assert
    assert!(result.is_ok());
    let user = ctx
        .repository::<UserAccount>()
        .unwrap()
        .get("U1")
        .await
        .unwrap();
    assert_eq!(user.version(), 1);
    assert_eq!(user.state().email, "ada@example.com");
    assert_eq!(
        *log.lock().unwrap(),
        vec!["audit:before:cmd-1", "audit:after:cmd-1:ok"]
    );
}

#[tokio::test]
async fn test_redelivered_command_is_skipped_and_still_completes() {
    // Arrange
    let ctx = common::build_test_context(RuntimeConfig::default());
    let bus = ctx.command_bus(Arc::new(common::LoopbackSender::new(
        &ctx,
        InterceptorChain::new(),
    )));
    let command = RegisterUser::new("cmd-1", "U1", "ada@example.com");
    bus.send_with_reply(&command, ReplyType::CommandExecuted)
        .unwrap()
        .wait()
        .await
        .unwrap();

    // Act
    let redelivery = bus
        .send_with_reply(&command, ReplyType::CommandExecuted)
        .unwrap()
        .wait()
        .await;

    // Assert
    assert!(redelivery.is_ok());
    let key = SourceKey::new("user", "U1");
    let events = ctx.event_store().find_after_version(&key, 0).await.unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn test_snapshot_threshold_from_yaml_config() {
    // Arrange
    let config = RuntimeConfig::from_yaml_str("snapshot_threshold: 2").unwrap();
    let ctx = common::build_test_context(config);
    let repo = ctx.repository::<UserAccount>().unwrap();
    let mut user = repo.create("U1");
    user.raise_event(registered("ada@example.com"), repo.clock())
        .unwrap();
    user.raise_event(
        UserEvent::PasswordChanged {
            password_hash: "h1".into(),
        },
        repo.clock(),
    )
    .unwrap();

    // Act
    repo.save(&mut user, "cmd-1").await.unwrap();

    // Assert
    let key = SourceKey::new("user", "U1");
    let snapshot = ctx
        .snapshot_store()
        .find(&key, u64::MAX)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.version, 2);
    assert_eq!(snapshot.timestamp, chronicle_test_support::fixed_clock().0);
}
