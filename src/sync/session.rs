//! One dashboard session: a task owning the trigger bus, the sync controller,
//! the store subscriptions and the periodic ticker for a single user.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, debug_span, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::backoff::Backoff;
use super::bootstrap::{fetch_snapshot, Bootstrap, Snapshot};
use super::controller::{FetchTicket, Settled, SyncController};
use super::dashboard::{ChangeSubscription, DashboardHandle, DashboardPublisher, DashboardState};
use super::error::SyncError;
use super::trigger::{BusTimings, Trigger, TriggerBus};
use crate::config::SyncConfig;
use crate::store::{ChangeEvent, EventSink, RecordStore, SubscriptionHandle};

#[derive(Debug)]
enum Command {
    Visibility(bool),
    Focus,
    ForceRefresh,
    Teardown(oneshot::Sender<()>),
}

/// Handle to a running session. Dropping every handle stops the session task.
pub struct DashboardSession {
    user_id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    dashboard: DashboardHandle,
}

impl DashboardSession {
    /// Spawn the session task. The mount trigger fires as soon as the
    /// store subscriptions are in place.
    pub fn open(store: Arc<dyn RecordStore>, user_id: Uuid, config: &SyncConfig) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (publisher, dashboard) = DashboardPublisher::new();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let worker = Worker {
            store,
            user_id,
            window: config.analysis_window,
            periodic_interval: config.periodic_interval,
            bus: TriggerBus::new(BusTimings {
                focus_debounce: config.focus_debounce,
                periodic_interval: config.periodic_interval,
            }),
            controller: SyncController::new(
                config.fetch_timeout,
                Backoff::new(config.backoff_base, config.backoff_max),
            ),
            publisher,
            bootstrap: Arc::new(Bootstrap::default()),
            done_tx,
        };
        tokio::spawn(
            worker
                .run(rx, done_rx)
                .instrument(info_span!("dashboard_session", %user_id)),
        );
        Self {
            user_id,
            commands,
            dashboard,
        }
    }

    pub fn get_dashboard_state(&self) -> Arc<DashboardState> {
        self.dashboard.get()
    }

    #[allow(dead_code)] // in-process observers; HTTP clients long-poll instead
    pub fn on_dashboard_state_change<F>(&self, callback: F) -> ChangeSubscription
    where
        F: FnMut(Arc<DashboardState>) + Send + 'static,
    {
        self.dashboard.on_change(callback)
    }

    pub fn dashboard(&self) -> DashboardHandle {
        self.dashboard.clone()
    }

    pub fn force_refresh(&self) {
        self.send(Command::ForceRefresh);
    }

    pub fn visibility_changed(&self, visible: bool) {
        self.send(Command::Visibility(visible));
    }

    pub fn window_focused(&self) {
        self.send(Command::Focus);
    }

    /// Stop the session and wait until its subscriptions are released.
    pub async fn teardown(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Teardown(tx));
        let _ = rx.await;
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn send(&self, cmd: Command) {
        if self.commands.send(cmd).is_err() {
            debug!(user_id = %self.user_id, "session already closed");
        }
    }
}

type FetchDone = (u64, Result<Snapshot, SyncError>);

struct Worker {
    store: Arc<dyn RecordStore>,
    user_id: Uuid,
    window: i64,
    periodic_interval: std::time::Duration,
    bus: TriggerBus,
    controller: SyncController,
    publisher: DashboardPublisher,
    bootstrap: Arc<Bootstrap>,
    done_tx: mpsc::UnboundedSender<FetchDone>,
}

impl Worker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut done_rx: mpsc::UnboundedReceiver<FetchDone>,
    ) {
        let (push_tx, mut push_rx) = mpsc::unbounded_channel();
        let subscriptions = self.subscribe(push_tx).await;

        let start = Instant::now();
        if let Some(trigger) = self.bus.mount(start) {
            self.request(trigger, start);
        }
        let mut ticker = interval_at(start + self.periodic_interval, self.periodic_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reply = loop {
            let deadline = self.controller.deadline();
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Teardown(reply)) => break Some(reply),
                    Some(cmd) => self.on_command(cmd),
                    None => break None,
                },
                Some(event) = push_rx.recv() => self.on_push(event),
                Some((seq, result)) = done_rx.recv() => {
                    let settled = self.controller.complete(
                        seq,
                        result,
                        Instant::now(),
                        OffsetDateTime::now_utc(),
                    );
                    self.apply(settled);
                }
                _ = ticker.tick() => {
                    let now = Instant::now();
                    if let Some(trigger) = self.bus.periodic(now) {
                        self.request(trigger, now);
                    }
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let settled = self.controller.expire(Instant::now());
                    self.apply(settled);
                }
            }
        };

        for handle in subscriptions {
            self.store.unsubscribe(handle).await;
        }
        info!("dashboard session closed");
        if let Some(reply) = reply {
            let _ = reply.send(());
        }
    }

    async fn subscribe(&self, sink: EventSink) -> Vec<SubscriptionHandle> {
        let mut handles = Vec::with_capacity(2);
        match self
            .store
            .subscribe_profile_changes(self.user_id, sink.clone())
            .await
        {
            Ok(h) => handles.push(h),
            Err(e) => warn!(error = %e, "profile change subscription failed"),
        }
        match self.store.subscribe_analysis_inserts(self.user_id, sink).await {
            Ok(h) => handles.push(h),
            Err(e) => warn!(error = %e, "analysis insert subscription failed"),
        }
        handles
    }

    fn on_command(&mut self, cmd: Command) {
        let now = Instant::now();
        let trigger = match cmd {
            Command::Visibility(visible) => self.bus.visibility_changed(visible, now),
            Command::Focus => self.bus.focus(now),
            Command::ForceRefresh => Some(self.bus.force_refresh(now)),
            Command::Teardown(_) => None,
        };
        if let Some(trigger) = trigger {
            self.request(trigger, now);
        }
    }

    fn on_push(&mut self, event: ChangeEvent) {
        debug!(kind = ?event.kind, record_id = ?event.record_id, "change notification");
        let now = Instant::now();
        let trigger = self.bus.push(event.kind, now);
        self.request(trigger, now);
    }

    fn request(&mut self, trigger: Trigger, now: Instant) {
        if let Some(ticket) = self.controller.request_sync(trigger, now) {
            self.start_fetch(ticket);
        }
    }

    fn apply(&mut self, settled: Settled) {
        if let Some(state) = settled.published {
            self.publisher.publish(state);
        }
        if let Some(ticket) = settled.next {
            self.start_fetch(ticket);
        }
    }

    fn start_fetch(&self, ticket: FetchTicket) {
        let store = self.store.clone();
        let bootstrap = self.bootstrap.clone();
        let done = self.done_tx.clone();
        let (user_id, window) = (self.user_id, self.window);
        tokio::spawn(
            async move {
                let result = fetch_snapshot(store.as_ref(), &bootstrap, user_id, window).await;
                // the session may be gone already
                let _ = done.send((ticket.seq, result));
            }
            .instrument(debug_span!("dashboard_fetch", seq = ticket.seq)),
        );
    }
}
