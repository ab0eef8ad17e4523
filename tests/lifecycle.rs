//! Lifecycle integration tests: ordering, failure isolation, timeouts,
//! bounded concurrency and teardown.

mod common;

use common::{config, DisposeBehavior, Gauge, InitBehavior, Journal, Stub};
use shard_host::shard::{FailureReason, LifecycleState, ShardRegistry};
use shard_host::{HostError, ShardContainer};
use std::time::Duration;

fn diamond(journal: &Journal) -> ShardRegistry {
    // Registered leaves-last on purpose: order must come from the graph
    ShardRegistry::new()
        .with(Stub::new(journal).definition("D", &["B", "C"]))
        .unwrap()
        .with(Stub::new(journal).definition("C", &["A"]))
        .unwrap()
        .with(Stub::new(journal).definition("B", &["A"]))
        .unwrap()
        .with(Stub::new(journal).definition("A", &[]))
        .unwrap()
}

#[tokio::test]
async fn diamond_initializes_in_dependency_order_and_disposes_in_reverse() {
    let journal = Journal::default();
    let container = ShardContainer::new(diamond(&journal), config(1));

    let report = container.start().await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.order, vec!["A", "C", "B", "D"]);
    assert!(container.table().is_ready());

    let disposal = container.dispose().await;
    assert_eq!(disposal.order, vec!["D", "B", "C", "A"]);
    assert!(disposal.failures.is_empty());
    assert_eq!(journal.with_prefix("dispose:"), vec!["D", "B", "C", "A"]);
    for id in ["A", "B", "C", "D"] {
        assert_eq!(container.table().state(id), Some(LifecycleState::Disposed));
    }
}

#[tokio::test]
async fn dependencies_are_ready_before_dependents_start() {
    let journal = Journal::default();
    let container = ShardContainer::new(diamond(&journal), config(4));
    container.start().await.unwrap().ensure_success().unwrap();

    let before = |a: &str, b: &str| journal.position(a).unwrap() < journal.position(b).unwrap();
    assert!(before("init-done:A", "construct:B"));
    assert!(before("init-done:A", "construct:C"));
    assert!(before("init-done:B", "construct:D"));
    assert!(before("init-done:C", "construct:D"));
}

#[tokio::test]
async fn failure_stays_on_its_branch() {
    let journal = Journal::default();
    let registry = ShardRegistry::new()
        .with(Stub::new(&journal).definition("A", &[]))
        .unwrap()
        .with(
            Stub::new(&journal)
                .init(InitBehavior::Fail)
                .definition("B", &["A"]),
        )
        .unwrap()
        .with(Stub::new(&journal).definition("C", &["A"]))
        .unwrap()
        .with(Stub::new(&journal).definition("D", &["B", "C"]))
        .unwrap();
    let container = ShardContainer::new(registry, config(1));

    let report = container.start().await.unwrap();
    let table = container.table();
    assert_eq!(table.state("A"), Some(LifecycleState::Ready));
    assert_eq!(table.state("C"), Some(LifecycleState::Ready));
    assert_eq!(table.state("B"), Some(LifecycleState::Failed));
    assert!(matches!(table.failure("B"), Some(FailureReason::InitFailure(_))));
    assert_eq!(table.state("D"), Some(LifecycleState::Failed));
    assert_eq!(
        table.failure("D"),
        Some(FailureReason::DependencyFailed("B".into()))
    );
    assert!(journal.position("construct:D").is_none());

    let failed: Vec<&str> = report.failed.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(failed, vec!["B", "D"]);
    match report.ensure_success() {
        Err(HostError::InitializationFailed { failed }) => {
            assert_eq!(failed.len(), 2);
            assert!(failed[0].starts_with("B"));
            assert!(failed[1].starts_with("D"));
        }
        other => panic!("expected InitializationFailed, got {other:?}"),
    }
    assert!(matches!(
        report.errors()[1],
        HostError::DependencyFailed { ref dependency_id, .. } if dependency_id == "B"
    ));

    let disposal = container.dispose().await;
    let disposed = journal.with_prefix("dispose:");
    assert!(disposed.contains(&"A".to_string()));
    assert!(disposed.contains(&"C".to_string()));
    assert!(!disposed.contains(&"D".to_string()));
    let pos = |id: &str| disposal.order.iter().position(|d| d == id).unwrap();
    assert!(pos("C") < pos("A"));
    assert_eq!(table.state("A"), Some(LifecycleState::Disposed));
    assert_eq!(table.state("C"), Some(LifecycleState::Disposed));
}

#[tokio::test]
async fn init_timeout_fails_the_shard() {
    let journal = Journal::default();
    let registry = ShardRegistry::new()
        .with(
            Stub::new(&journal)
                .init(InitBehavior::Delay(Duration::from_secs(5)))
                .definition("slow", &[])
                .with_init_timeout(Duration::from_millis(50)),
        )
        .unwrap()
        .with(Stub::new(&journal).definition("after", &["slow"]))
        .unwrap();
    let container = ShardContainer::new(registry, config(4));

    let report = container.start().await.unwrap();
    assert_eq!(
        container.table().failure("slow"),
        Some(FailureReason::InitTimeout {
            timeout: Duration::from_millis(50)
        })
    );
    assert_eq!(
        container.table().failure("after"),
        Some(FailureReason::DependencyFailed("slow".into()))
    );
    assert!(matches!(report.errors()[0], HostError::InitTimeout { .. }));
}

#[tokio::test]
async fn panicking_init_is_an_init_failure() {
    let journal = Journal::default();
    let registry = ShardRegistry::new()
        .with(
            Stub::new(&journal)
                .init(InitBehavior::Panic)
                .definition("boom", &[]),
        )
        .unwrap()
        .with(Stub::new(&journal).definition("fine", &[]))
        .unwrap();
    let container = ShardContainer::new(registry, config(4));

    let report = container.start().await.unwrap();
    assert!(matches!(
        container.table().failure("boom"),
        Some(FailureReason::InitFailure(_))
    ));
    assert_eq!(container.table().state("fine"), Some(LifecycleState::Ready));
    assert_eq!(report.order, vec!["fine"]);

    // Constructed before the panic, so it still owes a dispose
    let disposal = container.dispose().await;
    assert!(journal.position("dispose:boom").is_some());
    assert!(disposal.order.contains(&"boom".to_string()));
    assert_eq!(container.table().state("boom"), Some(LifecycleState::Failed));
}

#[tokio::test]
async fn refused_and_panicked_inits_are_both_disposed() {
    let journal = Journal::default();
    let registry = ShardRegistry::new()
        .with(
            Stub::new(&journal)
                .init(InitBehavior::Panic)
                .definition("boom", &[]),
        )
        .unwrap()
        .with(
            Stub::new(&journal)
                .init(InitBehavior::Fail)
                .definition("refuse", &[]),
        )
        .unwrap();
    let container = ShardContainer::new(registry, config(1));

    let report = container.start().await.unwrap();
    assert!(report.order.is_empty());
    assert_eq!(report.failed.len(), 2);

    let disposal = container.dispose().await;
    assert_eq!(disposal.order, vec!["refuse", "boom"]);
    assert_eq!(journal.with_prefix("dispose:"), vec!["refuse", "boom"]);
}

#[tokio::test]
async fn concurrent_inits_respect_the_limit() {
    let journal = Journal::default();
    let gauge = Gauge::default();
    let mut registry = ShardRegistry::new();
    for i in 0..6 {
        registry
            .register(
                Stub::new(&journal)
                    .gauge(&gauge)
                    .init(InitBehavior::Delay(Duration::from_millis(40)))
                    .definition(&format!("leaf-{i}"), &[]),
            )
            .unwrap();
    }
    let container = ShardContainer::new(registry, config(2));

    container.start().await.unwrap().ensure_success().unwrap();
    assert_eq!(gauge.peak(), 2);
}

#[tokio::test]
async fn independent_branches_initialize_concurrently() {
    let journal = Journal::default();
    let gauge = Gauge::default();
    let mut registry = ShardRegistry::new();
    for i in 0..3 {
        registry
            .register(
                Stub::new(&journal)
                    .gauge(&gauge)
                    .init(InitBehavior::Delay(Duration::from_millis(40)))
                    .definition(&format!("leaf-{i}"), &[]),
            )
            .unwrap();
    }
    let container = ShardContainer::new(registry, config(4));

    container.start().await.unwrap().ensure_success().unwrap();
    assert_eq!(gauge.peak(), 3);
}

#[tokio::test]
async fn cycle_aborts_before_any_init() {
    let journal = Journal::default();
    let registry = ShardRegistry::new()
        .with(Stub::new(&journal).definition("A", &["B"]))
        .unwrap()
        .with(Stub::new(&journal).definition("B", &["A"]))
        .unwrap()
        .with(Stub::new(&journal).definition("C", &[]))
        .unwrap();
    let container = ShardContainer::new(registry, config(4));

    match container.start().await {
        Err(HostError::DependencyCycle { cycle }) => {
            assert!(cycle.contains(&"A".to_string()));
            assert!(cycle.contains(&"B".to_string()));
            assert!(!cycle.contains(&"C".to_string()));
        }
        other => panic!("expected DependencyCycle, got {other:?}"),
    }
    assert!(journal.entries().is_empty());
    for id in ["A", "B", "C"] {
        assert_eq!(
            container.table().failure(id),
            Some(FailureReason::ResolutionAborted)
        );
    }
}

#[tokio::test]
async fn missing_dependency_aborts_startup() {
    let journal = Journal::default();
    let registry = ShardRegistry::new()
        .with(Stub::new(&journal).definition("orphan", &["ghost"]))
        .unwrap();
    let container = ShardContainer::new(registry, config(4));

    match container.start().await {
        Err(HostError::MissingDependency {
            shard_id,
            missing_id,
        }) => {
            assert_eq!(shard_id, "orphan");
            assert_eq!(missing_id, "ghost");
        }
        other => panic!("expected MissingDependency, got {other:?}"),
    }
    assert!(journal.entries().is_empty());
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let journal = Journal::default();
    let err = ShardRegistry::new()
        .with(Stub::new(&journal).definition("A", &[]))
        .unwrap()
        .with(Stub::new(&journal).definition("A", &[]))
        .unwrap_err();
    assert!(matches!(err, HostError::DuplicateShard { .. }));
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let journal = Journal::default();
    let container = ShardContainer::new(diamond(&journal), config(4));
    container.start().await.unwrap();
    assert!(matches!(
        container.start().await,
        Err(HostError::AlreadyStarted)
    ));
}

#[tokio::test]
async fn dispose_failures_are_recorded_and_teardown_continues() {
    let journal = Journal::default();
    let registry = ShardRegistry::new()
        .with(Stub::new(&journal).definition("base", &[]))
        .unwrap()
        .with(
            Stub::new(&journal)
                .dispose(DisposeBehavior::Fail)
                .definition("grumpy", &["base"]),
        )
        .unwrap()
        .with(
            Stub::new(&journal)
                .dispose(DisposeBehavior::Hang)
                .definition("stuck", &["grumpy"]),
        )
        .unwrap();
    let container = ShardContainer::new(registry, config(4));
    container.start().await.unwrap().ensure_success().unwrap();

    let disposal = container.dispose().await;
    assert_eq!(disposal.order, vec!["stuck", "grumpy", "base"]);
    assert_eq!(disposal.failures.len(), 2);
    assert!(disposal
        .failures
        .iter()
        .all(|f| matches!(f, HostError::DisposeFailure { .. })));
    assert_eq!(
        container.table().state("base"),
        Some(LifecycleState::Disposed)
    );

    // Second dispose has nothing left to do
    assert!(container.dispose().await.order.is_empty());
}
