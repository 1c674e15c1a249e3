//! Live table of all applications with message panel and delete action.

use core::time::Duration;
use std::collections::BTreeSet;
use std::sync::Arc;

use applicant_intake_store::{
    Application, RecordId, RecordStore, StoreError, StoreEvent, STUDENTS,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub const DELETE_FAILURE: &str = "Failed to delete application. Please try again.";
pub const READ_FAILURE: &str = "Applications could not be loaded. Retrying…";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DashboardState {
    /// In the store's key order.
    pub records: Vec<Application>,
    /// True until the first snapshot arrived.
    pub loading: bool,
    pub pending: BTreeSet<RecordId>,
    selected: Option<RecordId>,
    pub error: Option<String>,
    pub read_error: Option<String>,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            loading: true,
            pending: BTreeSet::new(),
            selected: None,
            error: None,
            read_error: None,
        }
    }
}

impl DashboardState {
    /// The record shown in the message panel, as long as it still exists.
    #[must_use]
    pub fn selected(&self) -> Option<&Application> {
        let selected = self.selected.as_ref()?;
        self.records.iter().find(|record| &record.id == selected)
    }

    #[must_use]
    pub fn is_pending(&self, id: &RecordId) -> bool {
        self.pending.contains(id)
    }
}

/// Clears the pending mark of one delete however the delete ends.
struct PendingGuard<'a> {
    state: &'a watch::Sender<DashboardState>,
    id: &'a RecordId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.state.send_modify(|state| {
            state.pending.remove(self.id);
        });
    }
}

/// One visitor's dashboard. The `students` subscription lives as long as this value.
pub struct AdminDashboard {
    store: Arc<dyn RecordStore>,
    state: Arc<watch::Sender<DashboardState>>,
    listener: JoinHandle<()>,
}

impl AdminDashboard {
    pub fn activate(store: Arc<dyn RecordStore>) -> Self {
        let mut subscription = store.subscribe(STUDENTS);
        let state = Arc::new(watch::channel(DashboardState::default()).0);
        let listener = tokio::spawn({
            let state = Arc::clone(&state);
            async move {
                while let Some(event) = subscription.next().await {
                    match event {
                        StoreEvent::Snapshot(snapshot) => state.send_modify(|state| {
                            state.loading = false;
                            state.read_error = None;
                            state.records = snapshot.into_values().collect();
                        }),
                        StoreEvent::ReadFailed(read_error) => {
                            warn!("applications could not be read: {read_error}");
                            state.send_modify(|state| {
                                state.read_error = Some(READ_FAILURE.to_owned());
                            });
                        }
                    }
                }
            }
        });
        Self {
            store,
            state,
            listener,
        }
    }

    #[must_use]
    pub fn state(&self) -> DashboardState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<DashboardState> {
        self.state.subscribe()
    }

    /// Waits up to `timeout` for the first snapshot or read failure. Returns whether one came.
    pub async fn wait_loaded(&self, timeout: Duration) -> bool {
        let mut state = self.state.subscribe();
        tokio::time::timeout(
            timeout,
            state.wait_for(|state| !state.loading || state.read_error.is_some()),
        )
        .await
        .is_ok_and(|loaded| loaded.is_ok())
    }

    /// Selects a record for the message panel. Unknown ids are ignored.
    pub fn show_message(&self, id: &RecordId) -> bool {
        self.state.send_if_modified(|state| {
            let known = state.records.iter().any(|record| &record.id == id);
            if known {
                state.selected = Some(id.clone());
            }
            known
        })
    }

    pub fn close_message(&self) {
        self.state.send_if_modified(|state| state.selected.take().is_some());
    }

    /// Deletes one application.
    ///
    /// On success the record is removed from the local table right away; the next snapshot
    /// replaces the table anyway. On failure the table is kept and an error is shown.
    pub async fn delete(&self, id: &RecordId) -> Result<(), StoreError> {
        self.state.send_modify(|state| {
            state.pending.insert(id.clone());
        });
        let _pending = PendingGuard {
            state: &self.state,
            id,
        };

        match self.store.remove(STUDENTS, id).await {
            Ok(()) => {
                info!("application {id} deleted");
                self.state.send_modify(|state| {
                    state.records.retain(|record| &record.id != id);
                    state.error = None;
                    if state.selected.as_ref() == Some(id) {
                        state.selected = None;
                    }
                });
                Ok(())
            }
            Err(store_error) => {
                error!("deleting application {id} failed: {store_error}");
                self.state.send_modify(|state| {
                    state.error = Some(DELETE_FAILURE.to_owned());
                });
                Err(store_error)
            }
        }
    }
}

impl Drop for AdminDashboard {
    fn drop(&mut self) {
        self.listener.abort();
    }
}
