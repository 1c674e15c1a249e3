//! Client side of the record store that holds submitted applications.
//!
//! The store itself is hosted elsewhere; this crate only knows how to write a record,
//! delete a record and keep a live view of a whole collection. [`RecordStore`] is the
//! capability the rest of the application is written against, with [`MemoryStore`] for
//! local development and tests and [`FirebaseStore`] for the hosted realtime database.

pub mod error;
pub mod event_stream;
pub mod firebase;
mod http_client;
pub mod memory;
pub mod model;

use core::future::Future;

use async_trait::async_trait;
pub use error::{StoreError, TransportError};
pub use firebase::FirebaseStore;
pub use memory::MemoryStore;
pub use model::{Application, Course, RecordId, Snapshot, UnknownCourse};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Collection all applications are written to.
pub const STUDENTS: &str = "students";

const SUBSCRIPTION_BUFFER: usize = 16;

#[must_use]
pub fn record_path(collection: &str, id: &RecordId) -> String {
    format!("{collection}/{id}")
}

#[derive(Debug)]
pub enum StoreEvent {
    /// Current contents of the subscribed collection.
    Snapshot(Snapshot),
    /// The live view could not be kept up to date. The subscription keeps retrying.
    ReadFailed(StoreError),
}

/// A live subscription to a collection.
///
/// The listener stays registered for exactly as long as this handle exists. Call
/// [`Subscription::unsubscribe`] or drop it to release the listener.
#[must_use = "dropping a subscription releases it immediately"]
pub struct Subscription {
    events: mpsc::Receiver<StoreEvent>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn spawn<F, Fut>(listener: F) -> Self
    where
        F: FnOnce(mpsc::Sender<StoreEvent>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (sender, events) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let task = tokio::spawn(listener(sender));
        Self { events, task }
    }

    /// Waits for the next event. `None` once the store side has shut down.
    pub async fn next(&mut self) -> Option<StoreEvent> {
        self.events.recv().await
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Writes `record` at `collection/id`, replacing whatever was there.
    async fn create(
        &self,
        collection: &str,
        id: &RecordId,
        record: &Application,
    ) -> Result<(), StoreError>;

    async fn exists(&self, collection: &str, id: &RecordId) -> Result<bool, StoreError>;

    /// Starts a live view of `collection`. The first event is the current snapshot.
    fn subscribe(&self, collection: &str) -> Subscription;

    /// Deletes `collection/id`. Deleting a missing record succeeds.
    async fn remove(&self, collection: &str, id: &RecordId) -> Result<(), StoreError>;
}
