use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{StoreError, TransportError};
use crate::model::{check_collection, Application, RecordId, Snapshot};
use crate::{record_path, RecordStore, StoreEvent, Subscription};

/// A record store that lives inside the process.
///
/// Every collection is a `watch` channel, so subscribers always see the latest snapshot.
/// The store can be switched to unreachable to exercise failure paths.
#[derive(Clone)]
pub struct MemoryStore {
    collections: Arc<Mutex<HashMap<String, watch::Sender<Snapshot>>>>,
    reachable: Arc<watch::Sender<bool>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: Arc::default(),
            reachable: Arc::new(watch::channel(true).0),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.send_replace(reachable);
    }

    fn is_reachable(&self) -> bool {
        *self.reachable.borrow()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, watch::Sender<Snapshot>>> {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn modify(&self, collection: &str, modify: impl FnOnce(&mut Snapshot)) {
        let mut collections = self.lock();
        let sender = collections
            .entry(collection.to_owned())
            .or_insert_with(|| watch::channel(Snapshot::new()).0);
        sender.send_modify(modify);
    }

    #[must_use]
    pub fn get(&self, collection: &str, id: &RecordId) -> Option<Application> {
        self.lock()
            .get(collection)
            .and_then(|sender| sender.borrow().get(id).cloned())
    }

    #[must_use]
    pub fn snapshot(&self, collection: &str) -> Snapshot {
        self.lock()
            .get(collection)
            .map(|sender| sender.borrow().clone())
            .unwrap_or_default()
    }

    /// Number of live subscriptions on `collection`.
    #[must_use]
    pub fn subscriber_count(&self, collection: &str) -> usize {
        self.lock()
            .get(collection)
            .map_or(0, watch::Sender::receiver_count)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create(
        &self,
        collection: &str,
        id: &RecordId,
        record: &Application,
    ) -> Result<(), StoreError> {
        check_collection(collection)?;
        let path = record_path(collection, id);
        if !self.is_reachable() {
            return Err(StoreError::write(path, TransportError::Unavailable));
        }
        self.modify(collection, |snapshot| {
            snapshot.insert(id.clone(), record.clone());
        });
        debug!("wrote {path}");
        Ok(())
    }

    async fn exists(&self, collection: &str, id: &RecordId) -> Result<bool, StoreError> {
        check_collection(collection)?;
        if !self.is_reachable() {
            return Err(StoreError::read(
                record_path(collection, id),
                TransportError::Unavailable,
            ));
        }
        Ok(self.get(collection, id).is_some())
    }

    fn subscribe(&self, collection: &str) -> Subscription {
        let mut snapshots = {
            let mut collections = self.lock();
            collections
                .entry(collection.to_owned())
                .or_insert_with(|| watch::channel(Snapshot::new()).0)
                .subscribe()
        };
        let mut reachable = self.reachable.subscribe();
        let collection = collection.to_owned();

        Subscription::spawn(move |events| async move {
            loop {
                let event = if *reachable.borrow_and_update() {
                    StoreEvent::Snapshot(snapshots.borrow_and_update().clone())
                } else {
                    StoreEvent::ReadFailed(StoreError::read(
                        collection.clone(),
                        TransportError::Unavailable,
                    ))
                };
                if events.send(event).await.is_err() {
                    return;
                }
                #[allow(clippy::redundant_pub_crate)]
                let closed = tokio::select! {
                    changed = snapshots.changed() => changed.is_err(),
                    changed = reachable.changed() => changed.is_err(),
                };
                if closed {
                    return;
                }
            }
        })
    }

    async fn remove(&self, collection: &str, id: &RecordId) -> Result<(), StoreError> {
        check_collection(collection)?;
        let path = record_path(collection, id);
        if !self.is_reachable() {
            return Err(StoreError::write(path, TransportError::Unavailable));
        }
        self.modify(collection, |snapshot| {
            snapshot.remove(id);
        });
        debug!("removed {path}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use super::*;
    use crate::model::Course;
    use crate::STUDENTS;

    fn application(id: &str, name: &str) -> Application {
        Application {
            id: RecordId::new(id).unwrap(),
            name: name.to_owned(),
            email: format!("{name}@example.com"),
            phone: "555".to_owned(),
            course: Course::Cco,
            message: String::new(),
        }
    }

    async fn next_snapshot(subscription: &mut Subscription) -> Snapshot {
        match tokio::time::timeout(Duration::from_secs(5), subscription.next()).await {
            Ok(Some(StoreEvent::Snapshot(snapshot))) => snapshot,
            other => panic!("expected a snapshot, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn subscription_starts_with_current_snapshot_and_follows_changes() {
        let store = MemoryStore::new();
        let ana = application("IT1111", "ana");
        store.create(STUDENTS, &ana.id, &ana).await.unwrap();

        let mut subscription = store.subscribe(STUDENTS);
        let first = next_snapshot(&mut subscription).await;
        assert_eq!(first.values().collect::<Vec<_>>(), vec![&ana]);

        let bob = application("IT2222", "bob");
        store.create(STUDENTS, &bob.id, &bob).await.unwrap();
        let second = next_snapshot(&mut subscription).await;
        assert_eq!(second.len(), 2);

        store.remove(STUDENTS, &ana.id).await.unwrap();
        let third = next_snapshot(&mut subscription).await;
        assert_eq!(third.keys().collect::<Vec<_>>(), vec![&bob.id]);
    }

    #[tokio::test]
    async fn empty_collection_yields_empty_snapshot() {
        let store = MemoryStore::new();
        let mut subscription = store.subscribe(STUDENTS);
        assert!(next_snapshot(&mut subscription).await.is_empty());
    }

    #[tokio::test]
    async fn create_overwrites_existing_key() {
        let store = MemoryStore::new();
        let first = application("IT1234", "ana");
        let second = application("IT1234", "bob");
        store.create(STUDENTS, &first.id, &first).await.unwrap();
        store.create(STUDENTS, &second.id, &second).await.unwrap();
        assert_eq!(store.get(STUDENTS, &first.id), Some(second));
    }

    #[tokio::test]
    async fn removing_a_missing_record_succeeds() {
        let store = MemoryStore::new();
        let id = RecordId::new("IT9998").unwrap();
        store.remove(STUDENTS, &id).await.unwrap();
        assert!(!store.exists(STUDENTS, &id).await.unwrap());
    }

    #[tokio::test]
    async fn unreachable_store_fails_writes_and_reads() {
        let store = MemoryStore::new();
        let ana = application("IT1111", "ana");
        store.set_reachable(false);

        let error = store.create(STUDENTS, &ana.id, &ana).await.unwrap_err();
        assert!(matches!(
            error,
            StoreError::Write {
                source: TransportError::Unavailable,
                ..
            }
        ));
        assert!(store.remove(STUDENTS, &ana.id).await.is_err());
        assert!(store.exists(STUDENTS, &ana.id).await.is_err());

        let mut subscription = store.subscribe(STUDENTS);
        let event = subscription.next().await;
        assert!(matches!(event, Some(StoreEvent::ReadFailed(_))));

        store.set_reachable(true);
        assert!(next_snapshot(&mut subscription).await.is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_releases_the_listener() {
        let store = MemoryStore::new();
        let mut subscription = store.subscribe(STUDENTS);
        next_snapshot(&mut subscription).await;
        assert_eq!(store.subscriber_count(STUDENTS), 1);

        subscription.unsubscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            while store.subscriber_count(STUDENTS) != 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
