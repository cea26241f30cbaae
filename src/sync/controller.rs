//! The sync state machine.
//!
//! `SyncController` decides when a fetch may start and what a finished fetch
//! does to the published state. It performs no I/O: the session task starts
//! the fetches it hands out as [`FetchTicket`]s and feeds results back through
//! [`SyncController::complete`] / [`SyncController::expire`].

use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::bootstrap::Snapshot;
use super::dashboard::{DashboardState, DashboardStatus, ErrorKind};
use super::error::SyncError;
use super::trigger::{Trigger, TriggerClass};
use crate::metrics::aggregate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Fetching { seq: u64, deadline: Instant },
}

/// Permission to run fetch number `seq`; it is abandoned at `deadline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub seq: u64,
    pub deadline: Instant,
}

/// Result of settling a fetch: the snapshot to publish and the follow-up fetch to start.
#[derive(Debug, Default)]
pub struct Settled {
    pub published: Option<DashboardState>,
    pub next: Option<FetchTicket>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeriodicBlock {
    PermissionWall,
    Backoff,
}

pub struct SyncController {
    phase: Phase,
    last_issued: u64,
    pending: Option<TriggerClass>,
    priority: bool,
    fetch_timeout: Duration,
    backoff: Backoff,
    permission_wall: bool,
    state: DashboardState,
}

impl SyncController {
    pub fn new(fetch_timeout: Duration, backoff: Backoff) -> Self {
        Self {
            phase: Phase::Idle,
            last_issued: 0,
            pending: None,
            priority: false,
            fetch_timeout,
            backoff,
            permission_wall: false,
            state: DashboardState::loading(),
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_fetching(&self) -> bool {
        matches!(self.phase, Phase::Fetching { .. })
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Fetching { deadline, .. } => Some(deadline),
            Phase::Idle => None,
        }
    }

    /// Strongest trigger class coalesced while fetching, if any.
    #[cfg(test)]
    pub fn pending(&self) -> Option<TriggerClass> {
        self.pending
    }

    #[cfg(test)]
    pub fn has_priority_refresh(&self) -> bool {
        self.priority
    }

    #[cfg(test)]
    pub fn last_issued(&self) -> u64 {
        self.last_issued
    }

    #[cfg(test)]
    pub fn state(&self) -> &DashboardState {
        &self.state
    }

    /// Start a fetch when idle; otherwise coalesce the trigger into the pending refresh.
    pub fn request_sync(&mut self, trigger: Trigger, now: Instant) -> Option<FetchTicket> {
        let class = trigger.class();
        if self.is_fetching() {
            self.pending = self.pending.max(Some(class));
            if class == TriggerClass::Push {
                self.priority = true;
            }
            debug!(%trigger, "fetch in flight; refresh coalesced");
            return None;
        }
        if class == TriggerClass::Periodic {
            if let Some(block) = self.periodic_block(now) {
                debug!(?block, "periodic refresh held back");
                return None;
            }
        }
        let ticket = self.issue(now);
        debug!(%trigger, seq = ticket.seq, "fetch started");
        Some(ticket)
    }

    /// Apply the result of fetch `seq`. Results for anything but the fetch in flight are dropped.
    pub fn complete(
        &mut self,
        seq: u64,
        result: Result<Snapshot, SyncError>,
        now: Instant,
        wall: OffsetDateTime,
    ) -> Settled {
        match self.phase {
            Phase::Fetching { seq: current, .. } if current == seq => {}
            _ => {
                debug!(seq, latest = self.last_issued, "stale fetch result discarded");
                return Settled::default();
            }
        }
        self.phase = Phase::Idle;
        let next_state = match result {
            Ok(snapshot) => self.succeeded(snapshot, wall),
            Err(e) => self.failed(&e, now),
        };
        self.settle(next_state, now)
    }

    /// Abandon the fetch in flight once its deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Settled {
        match self.phase {
            Phase::Fetching { seq, deadline } if now >= deadline => {
                warn!(seq, timeout = ?self.fetch_timeout, "fetch abandoned after timeout");
                self.phase = Phase::Idle;
                let next_state = self.failed(&SyncError::Timeout(self.fetch_timeout), now);
                self.settle(next_state, now)
            }
            _ => Settled::default(),
        }
    }

    fn issue(&mut self, now: Instant) -> FetchTicket {
        self.last_issued += 1;
        let ticket = FetchTicket {
            seq: self.last_issued,
            deadline: now + self.fetch_timeout,
        };
        self.phase = Phase::Fetching {
            seq: ticket.seq,
            deadline: ticket.deadline,
        };
        ticket
    }

    fn periodic_block(&self, now: Instant) -> Option<PeriodicBlock> {
        if self.permission_wall {
            Some(PeriodicBlock::PermissionWall)
        } else if !self.backoff.allows(now) {
            Some(PeriodicBlock::Backoff)
        } else {
            None
        }
    }

    fn succeeded(&mut self, snapshot: Snapshot, wall: OffsetDateTime) -> DashboardState {
        self.backoff.reset();
        self.permission_wall = false;
        let metrics = aggregate(snapshot.profile.as_ref(), &snapshot.analyses);
        info!(
            total_scans = metrics.total_scans,
            free_scans_remaining = metrics.free_scans_remaining,
            source = ?snapshot.source,
            "dashboard refreshed"
        );
        DashboardState {
            metrics,
            status: DashboardStatus::Ready,
            last_updated_at: Some(wall),
            error_kind: None,
            version: self.state.version + 1,
            profile_source: Some(snapshot.source),
        }
    }

    fn failed(&mut self, err: &SyncError, now: Instant) -> DashboardState {
        let kind = err.kind();
        if kind == ErrorKind::Permission {
            self.permission_wall = true;
            warn!(error = %err, "dashboard fetch denied");
        } else {
            let delay = self.backoff.record_failure(now);
            warn!(error = %err, failures = self.backoff.failures(), retry_in = ?delay, "dashboard fetch failed");
        }
        let has_data = self.state.last_updated_at.is_some();
        let status = if kind != ErrorKind::Permission && has_data {
            DashboardStatus::Stale
        } else {
            DashboardStatus::Error
        };
        DashboardState {
            status,
            error_kind: Some(kind),
            version: self.state.version + 1,
            ..self.state.clone()
        }
    }

    fn settle(&mut self, next_state: DashboardState, now: Instant) -> Settled {
        self.state = next_state.clone();
        Settled {
            published: Some(next_state),
            next: self.follow_up(now),
        }
    }

    /// At most one extra fetch per completed cycle.
    fn follow_up(&mut self, now: Instant) -> Option<FetchTicket> {
        let class = self.pending.take()?;
        let priority = std::mem::take(&mut self.priority);
        if !priority && class == TriggerClass::Periodic {
            if let Some(block) = self.periodic_block(now) {
                debug!(?block, "coalesced periodic refresh dropped");
                return None;
            }
        }
        let ticket = self.issue(now);
        debug!(seq = ticket.seq, ?class, priority, "follow-up fetch started");
        Some(ticket)
    }
}
