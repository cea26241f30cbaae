//! In-memory record store for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{ChangeEvent, ChangeKind, EventSink, RecordStore, StoreError, SubscriptionHandle};
use crate::profiles::{AnalysisRecord, Plan, ProfileDefaults, UserProfile};

#[derive(Default)]
struct Inner {
    profiles: HashMap<Uuid, UserProfile>,
    analyses: HashMap<Uuid, Vec<AnalysisRecord>>,
    profile_failures: VecDeque<StoreError>,
    analyses_failures: VecDeque<StoreError>,
    read_delays: VecDeque<Duration>,
    create_failure: Option<StoreError>,
    subscribers: HashMap<Uuid, (SubscriptionHandle, EventSink)>,
}

#[derive(Default)]
pub struct FakeStore {
    inner: Mutex<Inner>,
    profile_reads: AtomicUsize,
    create_calls: AtomicUsize,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profile(id: Uuid, scans_used: i64) -> UserProfile {
        UserProfile {
            id,
            email: Some("user@example.com".into()),
            display_name: Some("user".into()),
            plan: Plan::Free,
            scans_used: Some(scans_used),
            created_at: None,
        }
    }

    pub fn analysis(user_id: Uuid, score: f64) -> AnalysisRecord {
        AnalysisRecord {
            id: Uuid::new_v4(),
            user_id,
            product_name: Some("granola".into()),
            health_score: Some(score),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn put_profile(&self, profile: UserProfile) {
        self.inner.lock().unwrap().profiles.insert(profile.id, profile);
    }

    pub fn push_analysis(&self, record: AnalysisRecord) {
        self.inner
            .lock()
            .unwrap()
            .analyses
            .entry(record.user_id)
            .or_default()
            .insert(0, record);
    }

    /// The next profile read fails with `err` (queued, one per read).
    pub fn fail_next_profile_read(&self, err: StoreError) {
        self.inner.lock().unwrap().profile_failures.push_back(err);
    }

    pub fn fail_next_analyses_read(&self, err: StoreError) {
        self.inner.lock().unwrap().analyses_failures.push_back(err);
    }

    /// The next profile read sleeps for `d` before answering (queued, one per read).
    pub fn delay_next_read(&self, d: Duration) {
        self.inner.lock().unwrap().read_delays.push_back(d);
    }

    pub fn fail_creates(&self, err: StoreError) {
        self.inner.lock().unwrap().create_failure = Some(err);
    }

    pub fn has_profile(&self, user_id: Uuid) -> bool {
        self.inner.lock().unwrap().profiles.contains_key(&user_id)
    }

    pub fn profile_reads(&self) -> usize {
        self.profile_reads.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn active_subscriptions(&self) -> usize {
        self.inner.lock().unwrap().subscribers.len()
    }

    /// Deliver a change event to every matching subscriber.
    pub fn emit(&self, event: ChangeEvent) {
        let inner = self.inner.lock().unwrap();
        for (handle, sink) in inner.subscribers.values() {
            if handle.user_id == event.user_id && handle.kind == event.kind {
                let _ = sink.send(event.clone());
            }
        }
    }

    fn add_subscriber(&self, user_id: Uuid, kind: ChangeKind, sink: EventSink) -> SubscriptionHandle {
        let handle = SubscriptionHandle {
            id: Uuid::new_v4(),
            user_id,
            kind,
        };
        self.inner
            .lock()
            .unwrap()
            .subscribers
            .insert(handle.id, (handle.clone(), sink));
        handle
    }
}

#[async_trait]
impl RecordStore for FakeStore {
    async fn get_profile(&self, user_id: Uuid) -> Result<UserProfile, StoreError> {
        self.profile_reads.fetch_add(1, Ordering::SeqCst);
        let delay = self.inner.lock().unwrap().read_delays.pop_front();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        let mut inner = self.inner.lock().unwrap();
        if let Some(err) = inner.profile_failures.pop_front() {
            return Err(err);
        }
        inner.profiles.get(&user_id).cloned().ok_or(StoreError::NotFound)
    }

    async fn create_profile_if_absent(
        &self,
        user_id: Uuid,
        defaults: &ProfileDefaults,
    ) -> Result<(), StoreError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        if let Some(err) = inner.create_failure.clone() {
            return Err(err);
        }
        inner.profiles.entry(user_id).or_insert_with(|| UserProfile {
            id: user_id,
            email: None,
            display_name: None,
            plan: defaults.plan,
            scans_used: Some(i64::from(defaults.scans_used)),
            created_at: None,
        });
        Ok(())
    }

    async fn list_recent_analyses(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AnalysisRecord>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(err) = inner.analyses_failures.pop_front() {
            return Err(err);
        }
        let rows = inner.analyses.get(&user_id).cloned().unwrap_or_default();
        Ok(rows.into_iter().take(limit.max(0) as usize).collect())
    }

    async fn subscribe_profile_changes(
        &self,
        user_id: Uuid,
        sink: EventSink,
    ) -> Result<SubscriptionHandle, StoreError> {
        Ok(self.add_subscriber(user_id, ChangeKind::ProfileChanged, sink))
    }

    async fn subscribe_analysis_inserts(
        &self,
        user_id: Uuid,
        sink: EventSink,
    ) -> Result<SubscriptionHandle, StoreError> {
        Ok(self.add_subscriber(user_id, ChangeKind::AnalysisInserted, sink))
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.inner.lock().unwrap().subscribers.remove(&handle.id);
    }
}
