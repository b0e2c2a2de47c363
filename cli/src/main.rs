//! Cash Courier demo
//!
//! Plays one withdrawal end to end against in-process collaborators: an
//! agent walks towards the requester while both clients run their sync
//! loops, then both confirm and the ledger settles.
//!
//! Environment:
//! - `CASH_COURIER_CONFIG`: path to a JSON config (defaults otherwise)
//! - `CASH_COURIER_REDIS_URL`: presence store on Redis (`redis-store` feature)
//! - `RUST_LOG`: log filter, `info` by default

use async_trait::async_trait;
use cash_courier_core_rs::geo::{destination_point, interpolate, Coordinate};
use cash_courier_core_rs::location::ReplaySource;
use cash_courier_core_rs::models::{Actor, MeetingType, NewWithdrawal};
use cash_courier_core_rs::store::{ExpiringStore, MemoryExpiringStore, MemoryRequestStore};
use cash_courier_core_rs::{
    AccuracyGate, AccuracyTier, BalanceRefresher, Clock, CoreConfig, CoreError, Eta,
    MemoryLedger, PositionSample, StraightLineRouting, SyncEvent, SyncHandle, SyncLoop, SystemClock,
    WithdrawalService,
};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const REQUESTER: &str = "USER_1";
const AGENT: &str = "AGENT_A";
const OPENING_BALANCE: i64 = 10_000;
const AMOUNT: i64 = 2_000;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run().await {
        error!("Demo failed: {}", err);
        if let Some(message) = err.user_message() {
            eprintln!("{}", message);
        }
        std::process::exit(1);
    }
}

/// Logs the ledger balance a client would reload
struct LedgerBalances {
    ledger: Arc<MemoryLedger>,
}

#[async_trait]
impl BalanceRefresher for LedgerBalances {
    async fn refresh_balance(&self, party: &Actor) {
        match self.ledger.balance(&party.id).await {
            Some(balance) => info!("[{}] balance is now {}", party, balance),
            None => warn!("[{}] has no ledger account", party),
        }
    }
}

fn load_config() -> Result<CoreConfig, CoreError> {
    match std::env::var("CASH_COURIER_CONFIG") {
        Ok(path) => {
            info!("Loading config from {}", path);
            Ok(CoreConfig::from_json_file(path)?)
        }
        Err(_) => Ok(CoreConfig::default()),
    }
}

#[cfg(feature = "redis-store")]
fn presence_store() -> Result<Arc<dyn ExpiringStore>, CoreError> {
    use cash_courier_core_rs::store::RedisExpiringStore;

    match std::env::var("CASH_COURIER_REDIS_URL") {
        Ok(url) => {
            info!("Presence store on {}", url);
            Ok(Arc::new(RedisExpiringStore::open(&url, "cash-courier")?))
        }
        Err(_) => Ok(Arc::new(MemoryExpiringStore::new())),
    }
}

#[cfg(not(feature = "redis-store"))]
fn presence_store() -> Result<Arc<dyn ExpiringStore>, CoreError> {
    Ok(Arc::new(MemoryExpiringStore::new()))
}

async fn run() -> Result<(), CoreError> {
    let config = load_config()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ledger = Arc::new(MemoryLedger::new());
    ledger.open_account(REQUESTER, OPENING_BALANCE).await;

    let service = Arc::new(WithdrawalService::new(
        config.clone(),
        clock.clone(),
        Arc::new(MemoryRequestStore::new()),
        presence_store()?,
        ledger.clone(),
        Some(Arc::new(StraightLineRouting::default())),
    )?);

    // Requester location fix
    let home = Coordinate::new(-1.2864, 36.8172);
    let device = ReplaySource::new()
        .then(Duration::from_millis(400), PositionSample::new(home, 180.0, clock.now()))
        .then(Duration::from_millis(400), PositionSample::new(home, 65.0, clock.now()))
        .then(Duration::from_millis(400), PositionSample::new(home, 35.0, clock.now()));
    let outcome = AccuracyGate::for_tier(AccuracyTier::Matching, &config)
        .acquire_from(device)
        .await?;
    let fix = *outcome.sample();
    info!(
        "Location fix at ({:.5}, {:.5}), accuracy {:.0} m{}",
        fix.coordinate.lat,
        fix.coordinate.lng,
        fix.accuracy_m,
        if outcome.is_precise() { "" } else { " (degraded)" }
    );

    // Agents around the requester
    let mut walk_from = home;
    for (agent_id, bearing, distance) in [(AGENT, 90.0, 800.0), ("AGENT_B", 200.0, 1_400.0)] {
        let position = destination_point(&home, bearing, distance);
        if agent_id == AGENT {
            walk_from = position;
        }
        service
            .set_availability(
                agent_id,
                true,
                Some(&PositionSample::new(position, 20.0, clock.now())),
            )
            .await?;
    }

    let request = service
        .create_request(NewWithdrawal {
            requester_id: REQUESTER.to_string(),
            amount: AMOUNT,
            location: fix.coordinate,
            location_description: "Outside the pharmacy".to_string(),
            meeting_type: Some(MeetingType::AgentTravels),
            selected_agent_id: None,
        })
        .await?;
    let request_id = request.id().to_string();

    let agents = service.find_nearby_agents(fix.coordinate, None).await?;
    for candidate in &agents {
        info!(
            "Nearby: {} at {} (ETA {})",
            candidate.agent_id,
            candidate.distance_label,
            Eta::label_or_unknown(candidate.eta.as_ref())
        );
    }
    let chosen = agents
        .first()
        .map(|c| c.agent_id.clone())
        .ok_or_else(|| CoreError::AgentUnavailable("any".to_string()))?;
    service.select_agent(&request_id, REQUESTER, &chosen).await?;

    // Both clients follow the request
    let session = CancellationToken::new();
    let refresher = Arc::new(LedgerBalances {
        ledger: ledger.clone(),
    });
    let requester = Actor::requester(REQUESTER);
    let agent = Actor::agent(chosen.as_str());
    let mut watchers = Vec::new();
    for viewer in [requester.clone(), agent.clone()] {
        let handle = SyncLoop::new(
            service.clone(),
            viewer.clone(),
            request_id.clone(),
            config.sync.clone(),
            config.tracking.clone(),
        )
        .with_refresher(refresher.clone())
        .spawn_with_token(session.clone())?;
        watchers.push(tokio::spawn(report_events(viewer, handle)));
    }

    // Agent walks to the meeting point
    let steps = 4;
    for step in 1..=steps {
        tokio::time::sleep(config.sync.position_poll_interval()).await;
        let position = interpolate(&walk_from, &home, step as f64 / steps as f64);
        service
            .report_position(&chosen, &PositionSample::new(position, 15.0, clock.now()))
            .await?;
    }

    service.mark_arrived(&request_id, &agent).await?;
    tokio::time::sleep(config.sync.status_poll_interval()).await;
    service.confirm(&request_id, &agent).await?;
    tokio::time::sleep(config.sync.status_poll_interval()).await;
    let done = service.confirm(&request_id, &requester).await?;
    info!("Request {} is {}", request_id, done.status());

    for watcher in watchers {
        if let Err(err) = watcher.await {
            warn!("Watcher ended abnormally: {}", err);
        }
    }
    session.cancel();

    info!(
        "{} events recorded; journal: {}",
        service.event_count(),
        serde_json::to_string(&ledger.journal().await).unwrap_or_default()
    );
    Ok(())
}

async fn report_events(viewer: Actor, mut handle: SyncHandle) {
    while let Some(event) = handle.next_event().await {
        match event {
            SyncEvent::StatusChanged(request) => {
                info!("[{}] status {} (v{})", viewer, request.status(), request.version());
            }
            SyncEvent::CounterpartMoved { fix, tracked } => {
                info!(
                    "[{}] {} is {} away, heading {:.0}, ETA {}",
                    viewer,
                    fix.counterpart,
                    fix.distance_label.as_deref().unwrap_or("?"),
                    tracked.heading_deg,
                    Eta::label_or_unknown(fix.eta.as_ref())
                );
            }
            SyncEvent::Finished(status) => info!("[{}] stopped on {}", viewer, status),
        }
    }
}
