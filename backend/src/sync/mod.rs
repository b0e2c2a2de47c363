//! Client synchronization loop
//!
//! Each client runs two independent polls against a [`SyncGateway`] while
//! its request is live:
//!
//! - **status**: fetch the request; report every newer version; on
//!   `completed` refresh the viewer's balance once
//! - **position**: while matched or in progress, fetch the counterpart and
//!   feed it through the smoother
//!
//! Both stop as soon as a terminal status is seen or the handle is stopped.
//!
//! # Critical Invariants
//!
//! 1. Stale or duplicate responses never surface as events
//! 2. The balance refresher runs at most once per loop
//! 3. No poll runs after a terminal status was observed

pub mod trackers;

use crate::core::config::{SyncConfig, TrackingConfig};
use crate::coordinator::{CounterpartFix, WithdrawalService};
use crate::error::{CoreError, ErrorClass};
use crate::models::{Actor, RequestStatus, WithdrawalRequest};
use crate::tracking::TrackedPosition;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub use trackers::{PositionTracker, StatusTracker};

const EVENT_BUFFER: usize = 32;

/// Transport between a client and the service
///
/// Polling is the default; a push channel can implement the same trait as
/// long as it delivers whole records carrying their version and timestamps.
#[async_trait]
pub trait SyncGateway: Send + Sync {
    async fn fetch_request(&self, request_id: &str) -> Result<WithdrawalRequest, CoreError>;

    async fn fetch_counterpart(
        &self,
        request_id: &str,
        viewer: &Actor,
    ) -> Result<CounterpartFix, CoreError>;
}

#[async_trait]
impl SyncGateway for WithdrawalService {
    async fn fetch_request(&self, request_id: &str) -> Result<WithdrawalRequest, CoreError> {
        self.get_status(request_id).await
    }

    async fn fetch_counterpart(
        &self,
        request_id: &str,
        viewer: &Actor,
    ) -> Result<CounterpartFix, CoreError> {
        self.track_counterpart(request_id, viewer).await
    }
}

/// Reloads a party's balance after money moved
#[async_trait]
pub trait BalanceRefresher: Send + Sync {
    async fn refresh_balance(&self, party: &Actor);
}

/// What the loop reports to its client
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A newer version of the request
    StatusChanged(WithdrawalRequest),
    /// A newer counterpart fix, with its smoothed position
    CounterpartMoved {
        fix: CounterpartFix,
        tracked: TrackedPosition,
    },
    /// The loop has stopped on a terminal status
    Finished(RequestStatus),
}

/// Configuration of one client's loop
pub struct SyncLoop {
    gateway: Arc<dyn SyncGateway>,
    refresher: Option<Arc<dyn BalanceRefresher>>,
    viewer: Actor,
    request_id: String,
    sync: SyncConfig,
    tracking: TrackingConfig,
}

impl SyncLoop {
    pub fn new(
        gateway: Arc<dyn SyncGateway>,
        viewer: Actor,
        request_id: impl Into<String>,
        sync: SyncConfig,
        tracking: TrackingConfig,
    ) -> Self {
        Self {
            gateway,
            refresher: None,
            viewer,
            request_id: request_id.into(),
            sync,
            tracking,
        }
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn BalanceRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Start both polls on the current tokio runtime
    pub fn spawn(self) -> Result<SyncHandle, CoreError> {
        self.spawn_with_token(CancellationToken::new())
    }

    /// Like [`SyncLoop::spawn`], also stopping when `parent` is cancelled
    pub fn spawn_with_token(self, parent: CancellationToken) -> Result<SyncHandle, CoreError> {
        let position_tracker = PositionTracker::new(&self.tracking)?;
        let token = parent.child_token();
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (status_tx, status_rx) = watch::channel(None);

        let status_task = tokio::spawn(status_poll(
            self.gateway.clone(),
            self.refresher,
            self.viewer.clone(),
            self.request_id.clone(),
            self.sync.status_poll_interval(),
            token.clone(),
            status_tx,
            event_tx.clone(),
        ));
        let position_task = tokio::spawn(position_poll(
            self.gateway,
            position_tracker,
            self.viewer,
            self.request_id,
            self.sync.position_poll_interval(),
            token.clone(),
            status_rx.clone(),
            event_tx,
        ));

        Ok(SyncHandle {
            token,
            events: event_rx,
            status: status_rx,
            tasks: vec![status_task, position_task],
        })
    }
}

/// A running loop
#[derive(Debug)]
pub struct SyncHandle {
    token: CancellationToken,
    events: mpsc::Receiver<SyncEvent>,
    status: watch::Receiver<Option<RequestStatus>>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncHandle {
    /// Next event; `None` once both polls have stopped
    pub async fn next_event(&mut self) -> Option<SyncEvent> {
        self.events.recv().await
    }

    /// Latest accepted status, `None` before the first successful poll
    pub fn latest_status(&self) -> Option<RequestStatus> {
        *self.status.borrow()
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stop and wait for both polls to exit
    pub async fn shutdown(mut self) {
        self.token.cancel();
        self.events.close();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(err) = task.await {
                warn!("Sync task ended abnormally: {}", err);
            }
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[allow(clippy::too_many_arguments)]
async fn status_poll(
    gateway: Arc<dyn SyncGateway>,
    refresher: Option<Arc<dyn BalanceRefresher>>,
    viewer: Actor,
    request_id: String,
    period: std::time::Duration,
    token: CancellationToken,
    status_tx: watch::Sender<Option<RequestStatus>>,
    events: mpsc::Sender<SyncEvent>,
) {
    let mut tracker = StatusTracker::new();
    let mut balance_refreshed = false;
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let request = match gateway.fetch_request(&request_id).await {
            Ok(request) => request,
            Err(err) if err.kind() == ErrorClass::NotFound => {
                warn!("Request {} is gone, stopping sync for {}", request_id, viewer);
                token.cancel();
                break;
            }
            Err(err) => {
                warn!("Status poll for {} failed: {}", request_id, err);
                continue;
            }
        };
        let Some(request) = tracker.observe(request) else {
            continue;
        };

        let status = request.status();
        debug!("{} sees request {} as {} (v{})", viewer, request_id, status, request.version());
        status_tx.send_replace(Some(status));
        if events.send(SyncEvent::StatusChanged(request)).await.is_err() {
            break;
        }

        if status == RequestStatus::Completed && !balance_refreshed {
            balance_refreshed = true;
            if let Some(refresher) = &refresher {
                refresher.refresh_balance(&viewer).await;
            }
        }

        if status.is_terminal() {
            info!("Request {} is {}, stopping sync for {}", request_id, status, viewer);
            token.cancel();
            let _ = events.send(SyncEvent::Finished(status)).await;
            break;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn position_poll(
    gateway: Arc<dyn SyncGateway>,
    mut tracker: PositionTracker,
    viewer: Actor,
    request_id: String,
    period: std::time::Duration,
    token: CancellationToken,
    status: watch::Receiver<Option<RequestStatus>>,
    events: mpsc::Sender<SyncEvent>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let current = *status.borrow();
        if !matches!(
            current,
            Some(RequestStatus::Matched | RequestStatus::InProgress)
        ) {
            continue;
        }

        let fix = match gateway.fetch_counterpart(&request_id, &viewer).await {
            Ok(fix) => fix,
            Err(CoreError::NotTracking(status)) => {
                debug!("Counterpart of {} not trackable while {}", request_id, status);
                continue;
            }
            Err(err) => {
                warn!("Position poll for {} failed: {}", request_id, err);
                continue;
            }
        };
        if token.is_cancelled() {
            break;
        }
        let Some(tracked) = tracker.observe(&fix) else {
            continue;
        };
        if events
            .send(SyncEvent::CounterpartMoved { fix, tracked })
            .await
            .is_err()
        {
            break;
        }
    }
    tracker.reset();
}
