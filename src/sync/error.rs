use std::time::Duration;

use thiserror::Error;

use super::dashboard::ErrorKind;
use crate::store::StoreError;

/// Why a dashboard fetch did not produce a snapshot.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("network failure: {0}")]
    Network(String),
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("unexpected store response: {0}")]
    Unknown(String),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Permission(_) => ErrorKind::Permission,
            SyncError::Network(_) => ErrorKind::Network,
            SyncError::Timeout(_) => ErrorKind::Timeout,
            SyncError::Unknown(_) => ErrorKind::Unknown,
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Permission(m) => SyncError::Permission(m),
            StoreError::Network(m) => SyncError::Network(m),
            StoreError::Unexpected(m) => SyncError::Unknown(m),
            // a missing profile is handled by bootstrap before it gets here
            StoreError::NotFound => SyncError::Unknown("record not found".into()),
        }
    }
}
