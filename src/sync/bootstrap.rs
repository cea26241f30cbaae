use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dashboard::ProfileSource;
use super::error::SyncError;
use crate::profiles::{AnalysisRecord, ProfileDefaults, UserProfile};
use crate::store::{RecordStore, StoreError};

/// Missing-profile policy of one session: fall back to in-memory defaults and
/// try a single create-if-absent write for the whole session.
#[derive(Debug, Default)]
pub struct Bootstrap {
    defaults: ProfileDefaults,
    write_attempted: AtomicBool,
}

impl Bootstrap {
    #[cfg(test)]
    pub fn write_attempted(&self) -> bool {
        self.write_attempted.load(Ordering::Acquire)
    }

    pub async fn on_missing_profile(&self, store: &dyn RecordStore, user_id: Uuid) {
        if self.write_attempted.swap(true, Ordering::AcqRel) {
            debug!(%user_id, "profile still missing; using in-memory default");
            return;
        }
        match store.create_profile_if_absent(user_id, &self.defaults).await {
            Ok(()) => info!(%user_id, "bootstrapped missing profile"),
            Err(e) => warn!(error = %e, %user_id, "profile bootstrap write failed; using in-memory default"),
        }
    }
}

/// Everything one fetch read from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub profile: Option<UserProfile>,
    pub analyses: Vec<AnalysisRecord>,
    pub source: ProfileSource,
}

/// Read profile and analysis window. Both reads must succeed for a snapshot.
pub async fn fetch_snapshot(
    store: &dyn RecordStore,
    bootstrap: &Bootstrap,
    user_id: Uuid,
    window: i64,
) -> Result<Snapshot, SyncError> {
    let (profile, source) = match store.get_profile(user_id).await {
        Ok(p) => (Some(p), ProfileSource::Stored),
        Err(StoreError::NotFound) => {
            bootstrap.on_missing_profile(store, user_id).await;
            (None, ProfileSource::Bootstrap)
        }
        Err(e) => return Err(e.into()),
    };
    let analyses = store.list_recent_analyses(user_id, window).await?;
    Ok(Snapshot {
        profile,
        analyses,
        source,
    })
}
