use std::{
    collections::BTreeSet,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;

use crate::{
    DcrError, EventNode, NodeBuilder, Result,
    gateway::{LocalGateway, PeerGateway},
    graph::{EventKey, EventState, Flag, LockRecord, Marking, RelationKind, RelationSet, RelationTarget},
    model::{EventDefinition, RelationModel},
    store::{EventStore, MemStore},
};

fn uri(id: &str) -> String {
    format!("local://node-{id}")
}

fn key(id: &str) -> EventKey {
    EventKey::new("wf", id)
}

fn rel(id: &str) -> RelationModel {
    RelationModel {
        workflow_id: "wf".to_string(),
        event_id: id.to_string(),
        uri: uri(id),
        roles: vec![],
    }
}

fn definition(id: &str) -> EventDefinition {
    EventDefinition {
        workflow_id: "wf".to_string(),
        event_id: id.to_string(),
        name: id.to_uppercase(),
        roles: vec!["clerk".to_string()],
        executed: false,
        included: true,
        pending: false,
        ..Default::default()
    }
}

fn clerk() -> Vec<String> {
    vec!["clerk".to_string()]
}

async fn spawn(
    gateway: &LocalGateway,
    definition: EventDefinition,
) -> Arc<EventNode> {
    let node = NodeBuilder::new(uri(&definition.event_id)).local_gateway(gateway.clone()).build().await.unwrap();
    node.create_event(&definition).await.unwrap();
    node
}

async fn locked_by(
    node: &EventNode,
    id: &str,
) -> Option<String> {
    node.snapshot(&key(id)).await.unwrap().locked_by
}

#[tokio::test]
async fn test_condition_blocks_until_target_executed() {
    let gateway = LocalGateway::default();
    let a = spawn(&gateway, EventDefinition {
        conditions: vec![rel("b")],
        ..definition("a")
    })
    .await;
    let b = spawn(&gateway, definition("b")).await;

    let res = a.execute(&key("a"), &clerk()).await;
    assert!(matches!(res, Err(DcrError::NotExecutable(_))));
    assert!(!a.snapshot(&key("a")).await.unwrap().executed);
    assert_eq!(locked_by(&a, "a").await, None);
    assert_eq!(locked_by(&b, "b").await, None);

    b.execute(&key("b"), &clerk()).await.unwrap();
    let report = a.execute(&key("a"), &clerk()).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.peers_locked, 1);
    assert!(a.snapshot(&key("a")).await.unwrap().executed);
    assert_eq!(locked_by(&b, "b").await, None);
}

#[tokio::test]
async fn test_condition_on_excluded_target_is_satisfied() {
    let gateway = LocalGateway::default();
    let a = spawn(&gateway, EventDefinition {
        conditions: vec![rel("b")],
        ..definition("a")
    })
    .await;
    let _b = spawn(&gateway, EventDefinition {
        included: false,
        ..definition("b")
    })
    .await;

    a.execute(&key("a"), &clerk()).await.unwrap();
    assert!(a.snapshot(&key("a")).await.unwrap().executed);
}

#[tokio::test]
async fn test_response_sets_target_pending() {
    let gateway = LocalGateway::default();
    let a = spawn(&gateway, EventDefinition {
        responses: vec![rel("c")],
        ..definition("a")
    })
    .await;
    let c = spawn(&gateway, definition("c")).await;

    a.execute(&key("a"), &clerk()).await.unwrap();
    assert!(c.snapshot(&key("c")).await.unwrap().pending);
    assert!(!c.snapshot(&key("c")).await.unwrap().executed);
}

#[tokio::test]
async fn test_inclusion_and_exclusion() {
    let gateway = LocalGateway::default();
    let a = spawn(&gateway, EventDefinition {
        inclusions: vec![rel("b"), rel("d")],
        exclusions: vec![rel("c"), rel("d")],
        ..definition("a")
    })
    .await;
    let b = spawn(&gateway, EventDefinition {
        included: false,
        ..definition("b")
    })
    .await;
    let c = spawn(&gateway, definition("c")).await;
    let d = spawn(&gateway, definition("d")).await;

    let report = a.execute(&key("a"), &clerk()).await.unwrap();
    assert_eq!(report.peers_locked, 3);
    assert!(b.snapshot(&key("b")).await.unwrap().included);
    assert!(!c.snapshot(&key("c")).await.unwrap().included);
    // exclusions are applied after inclusions
    assert!(!d.snapshot(&key("d")).await.unwrap().included);
}

#[tokio::test]
async fn test_excluded_event_is_not_executable() {
    let gateway = LocalGateway::default();
    let a = spawn(&gateway, EventDefinition {
        included: false,
        responses: vec![rel("c")],
        ..definition("a")
    })
    .await;
    let c = spawn(&gateway, definition("c")).await;

    let res = a.execute(&key("a"), &clerk()).await;
    assert!(matches!(res, Err(DcrError::NotExecutable(_))));
    assert!(!a.snapshot(&key("a")).await.unwrap().executed);
    assert!(!c.snapshot(&key("c")).await.unwrap().pending);
}

#[tokio::test]
async fn test_unauthorized_caller_changes_nothing() {
    let gateway = LocalGateway::default();
    let a = spawn(&gateway, EventDefinition {
        responses: vec![rel("c")],
        ..definition("a")
    })
    .await;
    let c = spawn(&gateway, definition("c")).await;

    let res = a.execute(&key("a"), &["guest".to_string()]).await;
    assert!(matches!(res, Err(DcrError::Unauthorized(_))));
    let res = a.execute(&key("a"), &[]).await;
    assert!(matches!(res, Err(DcrError::Unauthorized(_))));

    assert!(!a.snapshot(&key("a")).await.unwrap().executed);
    assert!(!c.snapshot(&key("c")).await.unwrap().pending);
}

#[tokio::test]
async fn test_unknown_event() {
    let gateway = LocalGateway::default();
    let a = spawn(&gateway, definition("a")).await;
    assert!(matches!(a.execute(&key("zz"), &clerk()).await, Err(DcrError::NotFound(_))));
}

#[tokio::test]
async fn test_re_execution_propagates_again() {
    let gateway = LocalGateway::default();
    let a = spawn(&gateway, EventDefinition {
        responses: vec![rel("c")],
        ..definition("a")
    })
    .await;
    let c = spawn(&gateway, definition("c")).await;

    a.execute(&key("a"), &clerk()).await.unwrap();
    c.reset_event(&key("c")).await.unwrap();
    assert!(!c.snapshot(&key("c")).await.unwrap().pending);

    a.execute(&key("a"), &clerk()).await.unwrap();
    assert!(a.snapshot(&key("a")).await.unwrap().executed);
    assert!(c.snapshot(&key("c")).await.unwrap().pending);
}

#[tokio::test]
async fn test_lock_failure_rolls_back() {
    let gateway = LocalGateway::default();
    let a = spawn(&gateway, EventDefinition {
        responses: vec![rel("b"), rel("c"), rel("d")],
        ..definition("a")
    })
    .await;
    let b = spawn(&gateway, definition("b")).await;
    let c = spawn(&gateway, definition("c")).await;
    let d = spawn(&gateway, definition("d")).await;

    c.lock(&key("c"), "x").await.unwrap();

    let res = a.execute(&key("a"), &clerk()).await;
    match res {
        Err(DcrError::Locked {
            owner, ..
        }) => assert_eq!(owner, "x"),
        other => panic!("expected Locked, got {other:?}"),
    }

    assert_eq!(locked_by(&a, "a").await, None);
    assert_eq!(locked_by(&b, "b").await, None);
    assert_eq!(locked_by(&c, "c").await.as_deref(), Some("x"));
    assert_eq!(locked_by(&d, "d").await, None);
    assert!(!a.snapshot(&key("a")).await.unwrap().executed);
    assert!(!b.snapshot(&key("b")).await.unwrap().pending);

    c.unlock(&key("c"), "x").await.unwrap();
    a.execute(&key("a"), &clerk()).await.unwrap();
    assert!(d.snapshot(&key("d")).await.unwrap().pending);
}

#[tokio::test]
async fn test_locked_event_is_rejected() {
    let gateway = LocalGateway::default();
    let a = spawn(&gateway, definition("a")).await;
    a.lock(&key("a"), "x").await.unwrap();

    let res = a.execute(&key("a"), &clerk()).await;
    assert!(matches!(res, Err(DcrError::Locked { .. })));
    assert!(res.unwrap_err().is_retryable());
    assert_eq!(locked_by(&a, "a").await.as_deref(), Some("x"));
}

#[tokio::test]
async fn test_concurrent_executions_serialize_on_shared_peer() {
    let gateway = LocalGateway::default();
    let a = spawn(&gateway, EventDefinition {
        responses: vec![rel("d")],
        ..definition("a")
    })
    .await;
    let e = spawn(&gateway, EventDefinition {
        responses: vec![rel("d")],
        ..definition("e")
    })
    .await;
    let d = spawn(&gateway, definition("d")).await;
    gateway.set_latency(&uri("d"), Some(Duration::from_millis(100)));

    let (ka, ke, roles) = (key("a"), key("e"), clerk());
    let (ra, re) = tokio::join!(a.execute(&ka, &roles), e.execute(&ke, &roles));
    let (winner_id, winner, loser_id, loser) = match (&ra, &re) {
        (Ok(_), Err(DcrError::Locked { .. })) => ("a", &a, "e", &e),
        (Err(DcrError::Locked { .. }), Ok(_)) => ("e", &e, "a", &a),
        other => panic!("expected exactly one Locked, got {other:?}"),
    };
    assert!(winner.snapshot(&key(winner_id)).await.unwrap().executed);
    assert_eq!(locked_by(winner, winner_id).await, None);
    assert_eq!(locked_by(&d, "d").await, None);
    assert!(!loser.snapshot(&key(loser_id)).await.unwrap().executed);
    assert_eq!(locked_by(loser, loser_id).await, None);

    loser.execute(&key(loser_id), &clerk()).await.unwrap();
    assert!(d.snapshot(&key("d")).await.unwrap().pending);
}

#[tokio::test]
async fn test_unreachable_condition_peer() {
    let gateway = LocalGateway::default();
    let a = spawn(&gateway, EventDefinition {
        conditions: vec![rel("b")],
        ..definition("a")
    })
    .await;
    let _b = spawn(&gateway, definition("b")).await;
    gateway.set_reachable(&uri("b"), false);

    let res = a.execute(&key("a"), &clerk()).await;
    assert!(matches!(res, Err(DcrError::PeerUnreachable { .. })));
    assert_eq!(locked_by(&a, "a").await, None);
    assert!(!a.snapshot(&key("a")).await.unwrap().executed);
}

#[tokio::test]
async fn test_unreachable_peer_during_locking() {
    let gateway = LocalGateway::default();
    let a = spawn(&gateway, EventDefinition {
        responses: vec![rel("b"), rel("c")],
        ..definition("a")
    })
    .await;
    let b = spawn(&gateway, definition("b")).await;
    let _c = spawn(&gateway, definition("c")).await;
    gateway.set_reachable(&uri("c"), false);

    let res = a.execute(&key("a"), &clerk()).await;
    assert!(matches!(res, Err(DcrError::PeerUnreachable { .. })));
    assert_eq!(locked_by(&a, "a").await, None);
    assert_eq!(locked_by(&b, "b").await, None);
}

#[tokio::test]
async fn test_peer_timeout() {
    let gateway = LocalGateway::new(Duration::from_millis(50));
    let a = spawn(&gateway, EventDefinition {
        conditions: vec![rel("b")],
        ..definition("a")
    })
    .await;
    let b = spawn(&gateway, definition("b")).await;
    gateway.set_latency(&uri("b"), Some(Duration::from_millis(500)));

    let started = Instant::now();
    let res = a.execute(&key("a"), &clerk()).await;
    let elapsed = started.elapsed();
    match res {
        Err(DcrError::PeerUnreachable {
            message, ..
        }) => assert!(message.contains("timed out"), "{message}"),
        other => panic!("expected PeerUnreachable, got {other:?}"),
    }
    assert!(elapsed >= Duration::from_millis(50), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(500), "{elapsed:?}");
    assert_eq!(locked_by(&a, "a").await, None);
    assert_eq!(locked_by(&b, "b").await, None);
}

#[tokio::test]
async fn test_missing_condition_target() {
    let gateway = LocalGateway::default();
    let mut ghost = rel("ghost");
    ghost.uri = uri("b");
    let a = spawn(&gateway, EventDefinition {
        conditions: vec![ghost],
        ..definition("a")
    })
    .await;
    let _b = spawn(&gateway, definition("b")).await;

    assert!(matches!(a.execute(&key("a"), &clerk()).await, Err(DcrError::NotFound(_))));
}

#[tokio::test]
async fn test_self_relations_apply_locally() {
    let gateway = LocalGateway::default();
    let a = spawn(&gateway, EventDefinition {
        responses: vec![rel("a")],
        exclusions: vec![rel("a")],
        ..definition("a")
    })
    .await;

    let report = a.execute(&key("a"), &clerk()).await.unwrap();
    assert_eq!(report.peers_locked, 0);

    let snapshot = a.snapshot(&key("a")).await.unwrap();
    assert!(snapshot.executed);
    assert!(snapshot.pending);
    assert!(!snapshot.included);
    assert!(matches!(a.execute(&key("a"), &clerk()).await, Err(DcrError::NotExecutable(_))));
}

#[tokio::test]
async fn test_push_rejected_while_locked_by_other() {
    let gateway = LocalGateway::default();
    let b = spawn(&gateway, definition("b")).await;
    b.lock(&key("b"), "x").await.unwrap();

    assert!(matches!(b.set_pending(&key("b"), "a").await, Err(DcrError::Locked { .. })));
    b.set_pending(&key("b"), "x").await.unwrap();
    // reads ignore the lock
    assert!(b.is_included(&key("b"), "a").await.unwrap());
    assert!(matches!(b.unlock(&key("b"), "a").await, Err(DcrError::Locked { .. })));
    b.unlock(&key("b"), "x").await.unwrap();
    b.unlock(&key("b"), "x").await.unwrap();
}

fn connection_reset(peer: &RelationTarget) -> DcrError {
    DcrError::PeerUnreachable {
        uri: peer.uri.clone(),
        message: "connection reset".to_string(),
    }
}

/// Forwards to a `LocalGateway`, except for pending pushes to `pending_to`
/// and unlocks of `unlock_of`, which fail.
struct FlakyGateway {
    inner: LocalGateway,
    pending_to: Option<EventKey>,
    unlock_of: Option<EventKey>,
}

#[async_trait]
impl PeerGateway for FlakyGateway {
    async fn is_executed(
        &self,
        peer: &RelationTarget,
        caller: &str,
    ) -> Result<bool> {
        self.inner.is_executed(peer, caller).await
    }

    async fn is_included(
        &self,
        peer: &RelationTarget,
        caller: &str,
    ) -> Result<bool> {
        self.inner.is_included(peer, caller).await
    }

    async fn send_pending(
        &self,
        peer: &RelationTarget,
        caller: &str,
    ) -> Result<()> {
        if self.pending_to.as_ref() == Some(&peer.key) {
            return Err(connection_reset(peer));
        }
        self.inner.send_pending(peer, caller).await
    }

    async fn send_included(
        &self,
        peer: &RelationTarget,
        caller: &str,
    ) -> Result<()> {
        self.inner.send_included(peer, caller).await
    }

    async fn send_excluded(
        &self,
        peer: &RelationTarget,
        caller: &str,
    ) -> Result<()> {
        self.inner.send_excluded(peer, caller).await
    }

    async fn lock(
        &self,
        peer: &RelationTarget,
        owner: &str,
    ) -> Result<()> {
        self.inner.lock(peer, owner).await
    }

    async fn unlock(
        &self,
        peer: &RelationTarget,
        owner: &str,
    ) -> Result<()> {
        if self.unlock_of.as_ref() == Some(&peer.key) {
            return Err(connection_reset(peer));
        }
        self.inner.unlock(peer, owner).await
    }
}

#[tokio::test]
async fn test_propagation_failure_is_reported_and_locks_released() {
    let gateway = LocalGateway::default();
    let flaky = FlakyGateway {
        inner: gateway.clone(),
        pending_to: Some(key("b")),
        unlock_of: None,
    };
    let a = NodeBuilder::new(uri("a")).gateway(Arc::new(flaky)).build().await.unwrap();
    gateway.register(&a);
    a.create_event(&EventDefinition {
        responses: vec![rel("b")],
        inclusions: vec![rel("c")],
        ..definition("a")
    })
    .await
    .unwrap();
    let b = spawn(&gateway, definition("b")).await;
    let c = spawn(&gateway, EventDefinition {
        included: false,
        ..definition("c")
    })
    .await;

    let report = a.execute(&key("a"), &clerk()).await.unwrap();
    assert!(!report.is_complete());
    assert_eq!(report.propagation_failures.len(), 1);
    assert_eq!(report.propagation_failures[0].target, key("b"));
    assert_eq!(report.propagation_failures[0].kind, RelationKind::Response);
    assert!(report.unlock_failures.is_empty());

    assert!(a.snapshot(&key("a")).await.unwrap().executed);
    assert!(!b.snapshot(&key("b")).await.unwrap().pending);
    assert!(c.snapshot(&key("c")).await.unwrap().included);
    assert_eq!(locked_by(&a, "a").await, None);
    assert_eq!(locked_by(&b, "b").await, None);
    assert_eq!(locked_by(&c, "c").await, None);
}

#[tokio::test]
async fn test_deleted_condition_target() {
    let gateway = LocalGateway::default();
    let a = spawn(&gateway, EventDefinition {
        conditions: vec![rel("b")],
        ..definition("a")
    })
    .await;
    let b = spawn(&gateway, EventDefinition {
        executed: true,
        ..definition("b")
    })
    .await;

    a.execute(&key("a"), &clerk()).await.unwrap();
    b.delete_event(&key("b")).await.unwrap();

    // the check now fails on the missing target, before any lock is taken
    assert!(matches!(a.execute(&key("a"), &clerk()).await, Err(DcrError::NotFound(_))));
    assert_eq!(locked_by(&a, "a").await, None);
}

#[tokio::test]
async fn test_unlock_failure_does_not_fail_execution() {
    let gateway = LocalGateway::default();
    let flaky = FlakyGateway {
        inner: gateway.clone(),
        pending_to: None,
        unlock_of: Some(key("b")),
    };
    let a = NodeBuilder::new(uri("a")).gateway(Arc::new(flaky)).build().await.unwrap();
    gateway.register(&a);
    a.create_event(&EventDefinition {
        responses: vec![rel("b")],
        ..definition("a")
    })
    .await
    .unwrap();
    let b = spawn(&gateway, definition("b")).await;

    let report = a.execute(&key("a"), &clerk()).await.unwrap();
    assert!(!report.is_complete());
    assert!(report.propagation_failures.is_empty());
    assert_eq!(report.unlock_failures.len(), 1);
    assert_eq!(report.unlock_failures[0].target, key("b"));

    assert!(a.snapshot(&key("a")).await.unwrap().executed);
    assert!(b.snapshot(&key("b")).await.unwrap().pending);
    assert_eq!(locked_by(&a, "a").await, None);
    assert_eq!(locked_by(&b, "b").await.as_deref(), Some("wf/a"));
}

/// Mem store whose writes of the `Executed` flag fail.
struct ReadOnlyExecutedStore {
    inner: MemStore,
}

#[async_trait]
impl EventStore for ReadOnlyExecutedStore {
    async fn exists(
        &self,
        key: &EventKey,
    ) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn find(
        &self,
        key: &EventKey,
    ) -> Result<EventState> {
        self.inner.find(key).await
    }

    async fn create(
        &self,
        state: &EventState,
    ) -> Result<()> {
        self.inner.create(state).await
    }

    async fn delete(
        &self,
        key: &EventKey,
    ) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn flag(
        &self,
        key: &EventKey,
        flag: Flag,
    ) -> Result<bool> {
        self.inner.flag(key, flag).await
    }

    async fn set_flag(
        &self,
        key: &EventKey,
        flag: Flag,
        value: bool,
    ) -> Result<()> {
        if flag == Flag::Executed {
            return Err(DcrError::Store("disk full".to_string()));
        }
        self.inner.set_flag(key, flag, value).await
    }

    async fn push_flag(
        &self,
        key: &EventKey,
        flag: Flag,
        value: bool,
        caller: &str,
    ) -> Result<()> {
        self.inner.push_flag(key, flag, value, caller).await
    }

    async fn set_marking(
        &self,
        key: &EventKey,
        marking: Marking,
    ) -> Result<()> {
        self.inner.set_marking(key, marking).await
    }

    async fn roles(
        &self,
        key: &EventKey,
    ) -> Result<BTreeSet<String>> {
        self.inner.roles(key).await
    }

    async fn set_roles(
        &self,
        key: &EventKey,
        roles: &BTreeSet<String>,
    ) -> Result<()> {
        self.inner.set_roles(key, roles).await
    }

    async fn relations(
        &self,
        key: &EventKey,
        kind: RelationKind,
    ) -> Result<RelationSet> {
        self.inner.relations(key, kind).await
    }

    async fn insert_relation(
        &self,
        key: &EventKey,
        kind: RelationKind,
        target: &RelationTarget,
    ) -> Result<bool> {
        self.inner.insert_relation(key, kind, target).await
    }

    async fn remove_relation(
        &self,
        key: &EventKey,
        kind: RelationKind,
        target: &EventKey,
    ) -> Result<bool> {
        self.inner.remove_relation(key, kind, target).await
    }

    async fn lock_record(
        &self,
        key: &EventKey,
    ) -> Result<Option<LockRecord>> {
        self.inner.lock_record(key).await
    }

    async fn acquire_lock(
        &self,
        key: &EventKey,
        owner: &str,
    ) -> Result<LockRecord> {
        self.inner.acquire_lock(key, owner).await
    }

    async fn release_lock(
        &self,
        key: &EventKey,
        owner: &str,
    ) -> Result<()> {
        self.inner.release_lock(key, owner).await
    }

    async fn clear_lock(
        &self,
        key: &EventKey,
    ) -> Result<()> {
        self.inner.clear_lock(key).await
    }
}

#[tokio::test]
async fn test_commit_failure_releases_every_lock() {
    let gateway = LocalGateway::default();
    let store = ReadOnlyExecutedStore {
        inner: MemStore::new(),
    };
    let a = NodeBuilder::new(uri("a")).store(Arc::new(store)).local_gateway(gateway.clone()).build().await.unwrap();
    a.create_event(&EventDefinition {
        responses: vec![rel("b")],
        inclusions: vec![rel("c")],
        ..definition("a")
    })
    .await
    .unwrap();
    let b = spawn(&gateway, definition("b")).await;
    let c = spawn(&gateway, EventDefinition {
        included: false,
        ..definition("c")
    })
    .await;

    let res = a.execute(&key("a"), &clerk()).await;
    assert!(matches!(res, Err(DcrError::Store(_))));

    assert!(!a.snapshot(&key("a")).await.unwrap().executed);
    assert!(!b.snapshot(&key("b")).await.unwrap().pending);
    assert!(!c.snapshot(&key("c")).await.unwrap().included);
    assert_eq!(locked_by(&a, "a").await, None);
    assert_eq!(locked_by(&b, "b").await, None);
    assert_eq!(locked_by(&c, "c").await, None);
}

#[tokio::test]
async fn test_lock_owner_includes_workflow() {
    let gateway = LocalGateway::default();
    let a = spawn(&gateway, EventDefinition {
        responses: vec![rel("d")],
        ..definition("a")
    })
    .await;
    let d = spawn(&gateway, definition("d")).await;

    // held by an event with the same id in another workflow
    d.lock(&key("d"), "other/a").await.unwrap();

    match a.execute(&key("a"), &clerk()).await {
        Err(DcrError::Locked {
            owner, ..
        }) => assert_eq!(owner, "other/a"),
        other => panic!("expected Locked, got {other:?}"),
    }
    assert!(matches!(d.set_excluded(&key("d"), "wf/a").await, Err(DcrError::Locked { .. })));
    assert!(matches!(d.unlock(&key("d"), "wf/a").await, Err(DcrError::Locked { .. })));
    assert_eq!(locked_by(&d, "d").await.as_deref(), Some("other/a"));
    assert_eq!(locked_by(&a, "a").await, None);

    d.unlock(&key("d"), "other/a").await.unwrap();
    a.execute(&key("a"), &clerk()).await.unwrap();
    assert!(d.snapshot(&key("d")).await.unwrap().pending);
}
