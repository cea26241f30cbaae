//! Access to the remote record store holding profiles and analyses.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::profiles::{AnalysisRecord, ProfileDefaults, UserProfile};

#[cfg(test)]
pub mod fake;
pub mod postgres;

pub use postgres::PgRecordStore;

/// SQLSTATEs that mean the caller is not allowed to read the record.
const PERMISSION_SQLSTATES: &[&str] = &["42501", "28000", "28P01"];

/// Classified failure of a store call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("network failure: {0}")]
    Network(String),
    #[error("unexpected store response: {0}")]
    Unexpected(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::Database(db)
                if db
                    .code()
                    .as_deref()
                    .is_some_and(|code| PERMISSION_SQLSTATES.contains(&code)) =>
            {
                Self::Permission(db.message().to_string())
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Network(e.to_string()),
            _ => Self::Unexpected(e.to_string()),
        }
    }
}

/// Which watched record changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    ProfileChanged,
    AnalysisInserted,
}

/// Row-level change delivered by the store for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub user_id: Uuid,
    pub kind: ChangeKind,
    pub record_id: Option<Uuid>,
}

/// JSON body of a change notification.
#[derive(Debug, Deserialize)]
struct ChangePayload {
    user_id: Uuid,
    #[serde(default)]
    record_id: Option<Uuid>,
}

impl ChangeEvent {
    /// Decode a notification payload; `None` when it is malformed.
    pub fn from_payload(kind: ChangeKind, payload: &str) -> Option<Self> {
        let p: ChangePayload = serde_json::from_str(payload).ok()?;
        Some(Self {
            user_id: p.user_id,
            kind,
            record_id: p.record_id,
        })
    }
}

/// Receiving side of a subscription.
pub type EventSink = mpsc::UnboundedSender<ChangeEvent>;

/// Opaque handle returned by the subscribe calls; pass it back to `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: ChangeKind,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_profile(&self, user_id: Uuid) -> Result<UserProfile, StoreError>;

    /// Best-effort conditional write; an existing record is left untouched.
    async fn create_profile_if_absent(
        &self,
        user_id: Uuid,
        defaults: &ProfileDefaults,
    ) -> Result<(), StoreError>;

    async fn list_recent_analyses(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AnalysisRecord>, StoreError>;

    async fn subscribe_profile_changes(
        &self,
        user_id: Uuid,
        sink: EventSink,
    ) -> Result<SubscriptionHandle, StoreError>;

    async fn subscribe_analysis_inserts(
        &self,
        user_id: Uuid,
        sink: EventSink,
    ) -> Result<SubscriptionHandle, StoreError>;

    async fn unsubscribe(&self, handle: SubscriptionHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_decodes_user_and_record() {
        let user = Uuid::new_v4();
        let record = Uuid::new_v4();
        let payload = format!(r#"{{"user_id":"{user}","record_id":"{record}","op":"INSERT"}}"#);
        let ev = ChangeEvent::from_payload(ChangeKind::AnalysisInserted, &payload).unwrap();
        assert_eq!(ev.user_id, user);
        assert_eq!(ev.record_id, Some(record));
        assert_eq!(ev.kind, ChangeKind::AnalysisInserted);
    }

    #[test]
    fn malformed_payload_is_rejected() {
        assert!(ChangeEvent::from_payload(ChangeKind::ProfileChanged, "not json").is_none());
        assert!(ChangeEvent::from_payload(ChangeKind::ProfileChanged, r#"{"op":"UPDATE"}"#).is_none());
    }

    #[test]
    fn sqlx_errors_are_classified() {
        assert_eq!(StoreError::from(sqlx::Error::RowNotFound), StoreError::NotFound);
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolTimedOut),
            StoreError::Network(_)
        ));
        assert!(matches!(
            StoreError::from(sqlx::Error::Protocol("bad frame".into())),
            StoreError::Unexpected(_)
        ));
    }
}
