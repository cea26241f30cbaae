use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{ChangeEvent, ChangeKind, EventSink, RecordStore, StoreError, SubscriptionHandle};
use crate::profiles::{repo, AnalysisRecord, ProfileDefaults, UserProfile};

pub const PROFILE_CHANNEL: &str = "profile_changes";
pub const ANALYSIS_CHANNEL: &str = "analysis_inserts";

const LISTEN_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Per-user sinks fed by the process-wide listener.
#[derive(Default)]
struct Fanout {
    sinks: Mutex<HashMap<Uuid, (SubscriptionHandle, EventSink)>>,
}

impl Fanout {
    fn add(&self, user_id: Uuid, kind: ChangeKind, sink: EventSink) -> SubscriptionHandle {
        let handle = SubscriptionHandle {
            id: Uuid::new_v4(),
            user_id,
            kind,
        };
        self.lock().insert(handle.id, (handle.clone(), sink));
        handle
    }

    fn remove(&self, handle: &SubscriptionHandle) -> bool {
        self.lock().remove(&handle.id).is_some()
    }

    /// Deliver to every matching sink; sinks whose session is gone are dropped.
    fn dispatch(&self, event: &ChangeEvent) -> usize {
        let mut sinks = self.lock();
        let mut delivered = 0;
        sinks.retain(|_, (handle, sink)| {
            if handle.user_id != event.user_id || handle.kind != event.kind {
                return true;
            }
            if sink.send(event.clone()).is_err() {
                return false;
            }
            delivered += 1;
            true
        });
        delivered
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, (SubscriptionHandle, EventSink)>> {
        // a poisoned map is still consistent: every write is a single insert or remove
        self.sinks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Record store backed by the product database. Push events come from one
/// LISTEN connection per process, outside the query pool.
pub struct PgRecordStore {
    db: PgPool,
    fanout: Arc<Fanout>,
    listener: Option<JoinHandle<()>>,
}

impl PgRecordStore {
    /// Open the shared listener on its own connection and start forwarding.
    pub async fn connect(db: PgPool, database_url: &str) -> anyhow::Result<Self> {
        let mut listener = PgListener::connect(database_url)
            .await
            .context("open notification listener")?;
        listener
            .listen_all([PROFILE_CHANNEL, ANALYSIS_CHANNEL])
            .await
            .context("listen for change notifications")?;
        info!(channels = ?[PROFILE_CHANNEL, ANALYSIS_CHANNEL], "notification listener ready");

        let fanout = Arc::new(Fanout::default());
        let task = tokio::spawn(forward_notifications(listener, fanout.clone()));
        Ok(Self {
            db,
            fanout,
            listener: Some(task),
        })
    }

    #[cfg(test)]
    fn without_listener(db: PgPool) -> Self {
        Self {
            db,
            fanout: Arc::new(Fanout::default()),
            listener: None,
        }
    }

    fn subscribe(&self, kind: ChangeKind, user_id: Uuid, sink: EventSink) -> SubscriptionHandle {
        let handle = self.fanout.add(user_id, kind, sink);
        debug!(%user_id, id = %handle.id, ?kind, subscribers = self.fanout.len(), "subscribed");
        handle
    }
}

impl Drop for PgRecordStore {
    fn drop(&mut self) {
        if let Some(task) = self.listener.take() {
            task.abort();
        }
    }
}

fn channel_kind(channel: &str) -> Option<ChangeKind> {
    match channel {
        PROFILE_CHANNEL => Some(ChangeKind::ProfileChanged),
        ANALYSIS_CHANNEL => Some(ChangeKind::AnalysisInserted),
        _ => None,
    }
}

async fn forward_notifications(mut listener: PgListener, fanout: Arc<Fanout>) {
    loop {
        match listener.recv().await {
            Ok(n) => {
                let event = channel_kind(n.channel())
                    .and_then(|kind| ChangeEvent::from_payload(kind, n.payload()));
                match event {
                    Some(ev) => {
                        let delivered = fanout.dispatch(&ev);
                        debug!(user_id = %ev.user_id, kind = ?ev.kind, delivered, "notification");
                    }
                    None => warn!(channel = n.channel(), payload = n.payload(), "malformed notification"),
                }
            }
            Err(e) => {
                // the listener reconnects on the next recv; notifications in between are lost
                warn!(error = %e, "listener recv failed");
                tokio::time::sleep(LISTEN_RETRY_DELAY).await;
            }
        }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    #[instrument(skip(self))]
    async fn get_profile(&self, user_id: Uuid) -> Result<UserProfile, StoreError> {
        repo::find_profile(&self.db, user_id)
            .await?
            .map(UserProfile::from)
            .ok_or(StoreError::NotFound)
    }

    #[instrument(skip(self, defaults))]
    async fn create_profile_if_absent(
        &self,
        user_id: Uuid,
        defaults: &ProfileDefaults,
    ) -> Result<(), StoreError> {
        let created = repo::insert_profile_if_absent(&self.db, user_id, defaults).await?;
        debug!(%user_id, created, "create_profile_if_absent");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_recent_analyses(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AnalysisRecord>, StoreError> {
        Ok(repo::list_recent_analyses(&self.db, user_id, limit).await?)
    }

    async fn subscribe_profile_changes(
        &self,
        user_id: Uuid,
        sink: EventSink,
    ) -> Result<SubscriptionHandle, StoreError> {
        Ok(self.subscribe(ChangeKind::ProfileChanged, user_id, sink))
    }

    async fn subscribe_analysis_inserts(
        &self,
        user_id: Uuid,
        sink: EventSink,
    ) -> Result<SubscriptionHandle, StoreError> {
        Ok(self.subscribe(ChangeKind::AnalysisInserted, user_id, sink))
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) {
        if self.fanout.remove(&handle) {
            debug!(user_id = %handle.user_id, id = %handle.id, "unsubscribed");
        }
    }
}
