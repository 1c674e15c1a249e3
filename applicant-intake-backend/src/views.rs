//! Per-visitor component instances, keyed by session id.

use core::time::Duration;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use applicant_intake_config::Config;
use applicant_intake_store::RecordStore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::components::admin_dashboard::AdminDashboard;
use crate::components::application_form::ApplicationForm;

struct Entry<T> {
    value: Arc<T>,
    last_used: Instant,
}

/// Instances of one component kind. An instance is torn down once the registry and every
/// request still using it have let go of it.
pub struct ViewRegistry<T> {
    entries: Mutex<HashMap<String, Entry<T>>>,
}

impl<T> Default for ViewRegistry<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::default(),
        }
    }
}

impl<T> ViewRegistry<T> {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_or_insert_with(&self, key: &str, create: impl FnOnce() -> T) -> Arc<T> {
        let mut entries = self.lock();
        let now = Instant::now();
        if let Some(entry) = entries.get_mut(key) {
            entry.last_used = now;
            return Arc::clone(&entry.value);
        }
        let value = Arc::new(create());
        entries.insert(
            key.to_owned(),
            Entry {
                value: Arc::clone(&value),
                last_used: now,
            },
        );
        value
    }

    pub fn remove(&self, key: &str) -> Option<Arc<T>> {
        self.lock().remove(key).map(|entry| entry.value)
    }

    /// Drops every instance unused for longer than `idle`. Returns how many were dropped.
    pub fn sweep(&self, idle: Duration) -> usize {
        let now = Instant::now();
        let removed: Vec<Arc<T>> = {
            let mut entries = self.lock();
            let expired: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| now.duration_since(entry.last_used) > idle)
                .map(|(key, _)| key.clone())
                .collect();
            expired
                .iter()
                .filter_map(|key| entries.remove(key))
                .map(|entry| entry.value)
                .collect()
        };
        // instances are dropped outside the lock
        removed.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewSettings {
    pub banner: Duration,
    pub idle: Duration,
    pub initial_load: Duration,
}

impl From<&Config> for ViewSettings {
    fn from(config: &Config) -> Self {
        Self {
            banner: Duration::from_secs(config.banner_seconds),
            idle: Duration::from_secs(config.view_idle_seconds),
            initial_load: Duration::from_millis(config.initial_load_millis),
        }
    }
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// The forms and dashboards of all current visitors.
pub struct Views {
    store: Arc<dyn RecordStore>,
    settings: ViewSettings,
    forms: ViewRegistry<ApplicationForm>,
    dashboards: ViewRegistry<AdminDashboard>,
}

impl Views {
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>, settings: ViewSettings) -> Self {
        Self {
            store,
            settings,
            forms: ViewRegistry::default(),
            dashboards: ViewRegistry::default(),
        }
    }

    #[must_use]
    pub const fn settings(&self) -> ViewSettings {
        self.settings
    }

    pub fn form(&self, session_id: &str) -> Arc<ApplicationForm> {
        self.forms.get_or_insert_with(session_id, || {
            ApplicationForm::new(Arc::clone(&self.store), self.settings.banner)
        })
    }

    /// The visitor's dashboard, subscribing to the store on first use.
    pub fn dashboard(&self, session_id: &str) -> Arc<AdminDashboard> {
        self.dashboards.get_or_insert_with(session_id, || {
            AdminDashboard::activate(Arc::clone(&self.store))
        })
    }

    pub fn sweep(&self) {
        let forms = self.forms.sweep(self.settings.idle);
        let dashboards = self.dashboards.sweep(self.settings.idle);
        if forms + dashboards > 0 {
            debug!("tore down {forms} idle forms and {dashboards} idle dashboards");
        }
    }

    /// Sweeps idle instances in the background until the returned task is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let views = Arc::downgrade(self);
        let period = (self.settings.idle / 4).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let Some(views) = views.upgrade() else {
                    return;
                };
                views.sweep();
            }
        })
    }
}
