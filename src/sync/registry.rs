use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use super::session::DashboardSession;
use crate::config::SyncConfig;
use crate::store::RecordStore;

const MIN_SWEEP_PERIOD: Duration = Duration::from_secs(1);

struct Entry {
    session: Arc<DashboardSession>,
    last_access: Instant,
}

/// Open dashboard sessions, at most one per user. A session that no request
/// touched within `session_idle` is torn down by the idle sweeper.
#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn RecordStore>,
    config: SyncConfig,
    sessions: Arc<Mutex<HashMap<Uuid, Entry>>>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn RecordStore>, config: SyncConfig) -> Self {
        Self {
            store,
            config,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The user's session, mounting a new one if none is running.
    pub async fn open(&self, user_id: Uuid) -> Arc<DashboardSession> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        if let Some(entry) = sessions.get_mut(&user_id) {
            if !entry.session.is_closed() {
                entry.last_access = now;
                return entry.session.clone();
            }
        }
        info!(%user_id, "opening dashboard session");
        let session = Arc::new(DashboardSession::open(
            self.store.clone(),
            user_id,
            &self.config,
        ));
        sessions.insert(
            user_id,
            Entry {
                session: session.clone(),
                last_access: now,
            },
        );
        session
    }

    #[cfg(test)]
    pub async fn get(&self, user_id: Uuid) -> Option<Arc<DashboardSession>> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(&user_id)
            .filter(|e| !e.session.is_closed())
            .map(|e| e.session.clone())
    }

    /// Tear down the user's session; `false` when none was open.
    pub async fn close(&self, user_id: Uuid) -> bool {
        let removed = self.sessions.lock().await.remove(&user_id);
        match removed {
            Some(entry) => {
                entry.session.teardown().await;
                true
            }
            None => false,
        }
    }

    /// Tear down every session idle since before `now - session_idle`.
    pub async fn sweep_idle(&self, now: Instant) -> usize {
        let idle = self.config.session_idle;
        let expired: Vec<_> = {
            let mut sessions = self.sessions.lock().await;
            let users: Vec<Uuid> = sessions
                .iter()
                .filter(|(_, e)| {
                    e.session.is_closed() || now.saturating_duration_since(e.last_access) >= idle
                })
                .map(|(user_id, _)| *user_id)
                .collect();
            users
                .into_iter()
                .filter_map(|u| sessions.remove(&u).map(|e| (u, e.session)))
                .collect()
        };
        for (user_id, session) in &expired {
            session.teardown().await;
            info!(%user_id, "idle dashboard session closed");
        }
        expired.len()
    }

    /// Run `sweep_idle` on a fixed period for the life of the process.
    pub fn spawn_idle_sweeper(&self) -> JoinHandle<()> {
        let registry = self.clone();
        let period = (self.config.session_idle / 4).max(MIN_SWEEP_PERIOD);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let closed = registry.sweep_idle(Instant::now()).await;
                if closed > 0 {
                    debug!(closed, "idle sweep");
                }
            }
        })
    }

    pub async fn close_all(&self) {
        let drained: Vec<_> = self.sessions.lock().await.drain().collect();
        for (user_id, entry) in drained {
            entry.session.teardown().await;
            info!(%user_id, "dashboard session closed on shutdown");
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
