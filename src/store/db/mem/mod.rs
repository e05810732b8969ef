use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use tracing::trace;

use crate::{
    DcrError, Result, ShareLock,
    graph::{EventKey, EventState, Flag, LockRecord, Marking, RelationKind, RelationSet, RelationTarget},
    store::{EventStore, not_found},
};

/// In-memory event store. Every operation runs under one lock, which makes
/// each call atomic with respect to the others.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    events: ShareLock<HashMap<EventKey, EventState>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn read<T>(
        &self,
        key: &EventKey,
        f: impl FnOnce(&EventState) -> T,
    ) -> Result<T> {
        let events = self.events.read().map_err(|_| DcrError::Store("mem store poisoned".to_string()))?;
        events.get(key).map(f).ok_or_else(|| not_found(key))
    }

    fn write<T>(
        &self,
        key: &EventKey,
        f: impl FnOnce(&mut EventState) -> Result<T>,
    ) -> Result<T> {
        let mut events = self.events.write().map_err(|_| DcrError::Store("mem store poisoned".to_string()))?;
        let state = events.get_mut(key).ok_or_else(|| not_found(key))?;
        f(state)
    }
}

#[async_trait]
impl EventStore for MemStore {
    async fn exists(
        &self,
        key: &EventKey,
    ) -> Result<bool> {
        let events = self.events.read().map_err(|_| DcrError::Store("mem store poisoned".to_string()))?;
        Ok(events.contains_key(key))
    }

    async fn find(
        &self,
        key: &EventKey,
    ) -> Result<EventState> {
        trace!("mem::find({key})");
        self.read(key, |s| s.clone())
    }

    async fn create(
        &self,
        state: &EventState,
    ) -> Result<()> {
        trace!("mem::create({})", state.key);
        let mut events = self.events.write().map_err(|_| DcrError::Store("mem store poisoned".to_string()))?;
        if events.contains_key(&state.key) {
            return Err(DcrError::Conflict(format!("event {} already exists", state.key)));
        }
        events.insert(state.key.clone(), state.clone());
        Ok(())
    }

    async fn delete(
        &self,
        key: &EventKey,
    ) -> Result<()> {
        trace!("mem::delete({key})");
        let mut events = self.events.write().map_err(|_| DcrError::Store("mem store poisoned".to_string()))?;
        events.remove(key).map(|_| ()).ok_or_else(|| not_found(key))
    }

    async fn flag(
        &self,
        key: &EventKey,
        flag: Flag,
    ) -> Result<bool> {
        self.read(key, |s| s.marking.get(flag))
    }

    async fn set_flag(
        &self,
        key: &EventKey,
        flag: Flag,
        value: bool,
    ) -> Result<()> {
        trace!("mem::set_flag({key}, {}, {value})", flag.as_ref());
        self.write(key, |s| {
            s.marking.set(flag, value);
            Ok(())
        })
    }

    async fn push_flag(
        &self,
        key: &EventKey,
        flag: Flag,
        value: bool,
        caller: &str,
    ) -> Result<()> {
        trace!("mem::push_flag({key}, {}, {value}, {caller})", flag.as_ref());
        self.write(key, |s| {
            s.ensure_writable_by(caller)?;
            s.marking.set(flag, value);
            Ok(())
        })
    }

    async fn set_marking(
        &self,
        key: &EventKey,
        marking: Marking,
    ) -> Result<()> {
        self.write(key, |s| {
            s.marking = marking;
            Ok(())
        })
    }

    async fn roles(
        &self,
        key: &EventKey,
    ) -> Result<BTreeSet<String>> {
        self.read(key, |s| s.roles.clone())
    }

    async fn set_roles(
        &self,
        key: &EventKey,
        roles: &BTreeSet<String>,
    ) -> Result<()> {
        self.write(key, |s| {
            s.roles = roles.clone();
            Ok(())
        })
    }

    async fn relations(
        &self,
        key: &EventKey,
        kind: RelationKind,
    ) -> Result<RelationSet> {
        self.read(key, |s| s.relations.get(kind).clone())
    }

    async fn insert_relation(
        &self,
        key: &EventKey,
        kind: RelationKind,
        target: &RelationTarget,
    ) -> Result<bool> {
        self.write(key, |s| Ok(s.relations.get_mut(kind).insert(target.clone())))
    }

    async fn remove_relation(
        &self,
        key: &EventKey,
        kind: RelationKind,
        target: &EventKey,
    ) -> Result<bool> {
        self.write(key, |s| Ok(s.relations.get_mut(kind).remove(target)))
    }

    async fn lock_record(
        &self,
        key: &EventKey,
    ) -> Result<Option<LockRecord>> {
        self.read(key, |s| s.lock.clone())
    }

    async fn acquire_lock(
        &self,
        key: &EventKey,
        owner: &str,
    ) -> Result<LockRecord> {
        trace!("mem::acquire_lock({key}, {owner})");
        self.write(key, |s| s.acquire_lock(owner))
    }

    async fn release_lock(
        &self,
        key: &EventKey,
        owner: &str,
    ) -> Result<()> {
        trace!("mem::release_lock({key}, {owner})");
        self.write(key, |s| s.release_lock(owner))
    }

    async fn clear_lock(
        &self,
        key: &EventKey,
    ) -> Result<()> {
        self.write(key, |s| {
            s.lock = None;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::graph::Relations;

    fn state(id: &str) -> EventState {
        EventState {
            key: EventKey::new("wf", id),
            name: id.to_uppercase(),
            uri: "http://node".to_string(),
            roles: BTreeSet::from(["manager".to_string()]),
            marking: Marking::new(false, true, false),
            initial: Marking::new(false, true, false),
            lock: None,
            relations: Relations::default(),
        }
    }

    #[tokio::test]
    async fn test_create_conflict_and_delete() {
        let store = MemStore::new();
        store.create(&state("a")).await.unwrap();
        assert!(matches!(store.create(&state("a")).await, Err(DcrError::Conflict(_))));

        let key = EventKey::new("wf", "a");
        assert!(store.exists(&key).await.unwrap());
        store.delete(&key).await.unwrap();
        assert!(!store.exists(&key).await.unwrap());
        assert!(matches!(store.delete(&key).await, Err(DcrError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_flags_and_missing_event() {
        let store = MemStore::new();
        store.create(&state("a")).await.unwrap();
        let key = EventKey::new("wf", "a");

        store.set_flag(&key, Flag::Pending, true).await.unwrap();
        assert!(store.flag(&key, Flag::Pending).await.unwrap());
        assert!(matches!(store.flag(&EventKey::new("wf", "nope"), Flag::Executed).await, Err(DcrError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_push_flag_respects_foreign_lock() {
        let store = MemStore::new();
        store.create(&state("c")).await.unwrap();
        let key = EventKey::new("wf", "c");

        store.acquire_lock(&key, "a").await.unwrap();
        assert!(matches!(store.push_flag(&key, Flag::Pending, true, "b").await, Err(DcrError::Locked { .. })));
        assert!(!store.flag(&key, Flag::Pending).await.unwrap());

        store.push_flag(&key, Flag::Pending, true, "a").await.unwrap();
        assert!(store.flag(&key, Flag::Pending).await.unwrap());
    }

    #[tokio::test]
    async fn test_relation_insert_is_set() {
        let store = MemStore::new();
        store.create(&state("a")).await.unwrap();
        let key = EventKey::new("wf", "a");
        let target = RelationTarget::new(EventKey::new("wf", "b"), "http://node-b");

        assert!(store.insert_relation(&key, RelationKind::Response, &target).await.unwrap());
        assert!(!store.insert_relation(&key, RelationKind::Response, &target).await.unwrap());
        assert_eq!(store.relations(&key, RelationKind::Response).await.unwrap().len(), 1);
        assert!(store.relations(&key, RelationKind::Inclusion).await.unwrap().is_empty());

        assert!(store.remove_relation(&key, RelationKind::Response, &target.key).await.unwrap());
        assert!(!store.remove_relation(&key, RelationKind::Response, &target.key).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_lock_race_has_one_winner() {
        let store = Arc::new(MemStore::new());
        store.create(&state("d")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.acquire_lock(&EventKey::new("wf", "d"), &format!("owner-{i}")).await }));
        }

        let mut winners = Vec::new();
        for handle in handles {
            if let Ok(record) = handle.await.unwrap() {
                winners.push(record.owner);
            }
        }
        assert_eq!(winners.len(), 1);

        let held = store.lock_record(&EventKey::new("wf", "d")).await.unwrap().unwrap();
        assert_eq!(held.owner, winners[0]);
    }
}
