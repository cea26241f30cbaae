//! The published dashboard snapshot and its reader/writer halves.
//!
//! There is exactly one writer per session (the session task). Every update is a
//! whole new `Arc<DashboardState>` sent through a `watch` channel, so readers
//! only ever observe complete snapshots.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::metrics::DerivedMetrics;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DashboardStatus {
    Loading,
    Ready,
    Stale,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Permission,
    Network,
    Timeout,
    Unknown,
}

/// Where the metrics' profile came from.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProfileSource {
    Stored,
    Bootstrap,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DashboardState {
    pub metrics: DerivedMetrics,
    pub status: DashboardStatus,
    /// When the metrics were last refreshed successfully.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_updated_at: Option<OffsetDateTime>,
    pub error_kind: Option<ErrorKind>,
    pub version: u64,
    pub profile_source: Option<ProfileSource>,
}

impl DashboardState {
    pub fn loading() -> Self {
        Self {
            metrics: DerivedMetrics::default(),
            status: DashboardStatus::Loading,
            last_updated_at: None,
            error_kind: None,
            version: 0,
            profile_source: None,
        }
    }
}

/// Write half, owned by the session task.
pub struct DashboardPublisher {
    tx: watch::Sender<Arc<DashboardState>>,
}

impl DashboardPublisher {
    pub fn new() -> (Self, DashboardHandle) {
        let (tx, rx) = watch::channel(Arc::new(DashboardState::loading()));
        (Self { tx }, DashboardHandle { rx })
    }

    #[cfg(test)]
    pub fn current(&self) -> Arc<DashboardState> {
        self.tx.borrow().clone()
    }

    /// Replace the snapshot as a whole.
    pub fn publish(&self, next: DashboardState) -> Arc<DashboardState> {
        let next = Arc::new(next);
        self.tx.send_replace(next.clone());
        next
    }
}

/// Read half, cloned freely by the presentation side.
#[derive(Clone)]
pub struct DashboardHandle {
    rx: watch::Receiver<Arc<DashboardState>>,
}

impl DashboardHandle {
    pub fn get(&self) -> Arc<DashboardState> {
        self.rx.borrow().clone()
    }

    /// Invoke `callback` with every snapshot published after this call.
    /// Dropping the returned guard stops delivery.
    pub fn on_change<F>(&self, mut callback: F) -> ChangeSubscription
    where
        F: FnMut(Arc<DashboardState>) + Send + 'static,
    {
        let mut rx = self.rx.clone();
        rx.borrow_and_update();
        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let snapshot = rx.borrow_and_update().clone();
                callback(snapshot);
            }
        });
        ChangeSubscription { task }
    }

    /// Wait for the first snapshot with a version above `version`.
    /// `None` when the writer is gone first.
    pub async fn wait_newer_than(&self, version: u64) -> Option<Arc<DashboardState>> {
        let mut rx = self.rx.clone();
        let snapshot = rx.wait_for(|s| s.version > version).await.ok()?;
        Some(snapshot.clone())
    }
}

pub struct ChangeSubscription {
    task: JoinHandle<()>,
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
