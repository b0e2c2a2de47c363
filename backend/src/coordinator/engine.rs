//! Withdrawal service
//!
//! The single entry point both clients talk to. It owns no request state of
//! its own: every operation reads the authoritative record, applies one
//! transition on a copy, and writes it back with compare-and-swap. A lost
//! race re-reads and re-applies, so concurrent actions by the two parties
//! linearize per request.
//!
//! # Completion
//!
//! The second confirmation triggers completion:
//!
//! 1. Under a per-request lock, re-check that both confirmations are present
//! 2. Settle the ledger (debit requester, credit agent), each leg idempotent
//! 3. Write `completed`
//!
//! If step 2 fails the request stays `in_progress` and completion can be
//! retried by calling [`WithdrawalService::complete`] (or confirming again).
//! A retry replays any already-applied leg without moving money twice.

use crate::coordinator::checkpoint::{validate_snapshot, StoreSnapshot};
use crate::core::config::CoreConfig;
use crate::core::time::Clock;
use crate::directory::{AgentCandidate, DirectoryError, NearbyAgentDirectory, PresenceRegistry};
use crate::error::CoreError;
use crate::geo::{
    bearing_degrees, distance_meters, eta_from_route, format_distance, Coordinate, Eta,
    RoutingProvider,
};
use crate::ledger::{settle_withdrawal, Ledger};
use crate::location::{AccuracyTier, PositionSample};
use crate::models::{
    Actor, AgentPresence, CompletionCheck, Event, EventLog, MeetingType, NewWithdrawal, Party,
    RequestError, RequestStatus, RequesterPosition, TransitionOutcome, WithdrawalRequest,
};
use crate::store::{ExpiringStore, MemoryExpiringStore, MemoryRequestStore, RequestStore, StoreError};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Compare-and-swap retries before giving up on a busy request
const MAX_CAS_ATTEMPTS: u32 = 8;

// ============================================================================
// Tracking Types
// ============================================================================

/// Where the counterpart was last seen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterpartPosition {
    pub coordinate: Coordinate,
    /// `None` when this is the request's static meeting point
    pub accuracy_m: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

/// Answer to a position poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterpartFix {
    pub request_id: String,
    pub request_version: u64,
    pub status: RequestStatus,
    pub counterpart: Party,
    pub position: Option<CounterpartPosition>,
    pub distance_meters: Option<f64>,
    pub distance_label: Option<String>,
    /// From the viewer towards the counterpart
    pub bearing_deg: Option<f64>,
    pub eta: Option<Eta>,
}

// ============================================================================
// Service
// ============================================================================

pub struct WithdrawalService {
    config: CoreConfig,
    config_hash: String,
    clock: Arc<dyn Clock>,
    requests: Arc<dyn RequestStore>,
    ledger: Arc<dyn Ledger>,
    directory: NearbyAgentDirectory,
    routing: Option<Arc<dyn RoutingProvider>>,
    event_log: Mutex<EventLog>,
    completion_locks: tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for WithdrawalService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WithdrawalService")
            .field("config_hash", &self.config_hash)
            .field("clock", &self.clock)
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

impl WithdrawalService {
    /// Build a service over the given collaborators
    ///
    /// # Errors
    /// The config fails validation.
    pub fn new(
        config: CoreConfig,
        clock: Arc<dyn Clock>,
        requests: Arc<dyn RequestStore>,
        presence: Arc<dyn ExpiringStore>,
        ledger: Arc<dyn Ledger>,
        routing: Option<Arc<dyn RoutingProvider>>,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let config_hash = config.fingerprint()?;

        let registry = PresenceRegistry::new(presence, clock.clone(), config.presence_freshness());
        let directory = NearbyAgentDirectory::new(
            registry,
            routing.clone(),
            config.travel_mode,
            config.routing_timeout(),
        );

        let event_log = EventLog::with_retention(config.event_retention);

        Ok(Self {
            config,
            config_hash,
            clock,
            requests,
            ledger,
            directory,
            routing,
            event_log: Mutex::new(event_log),
            completion_locks: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Service over in-memory stores
    pub fn in_memory(
        config: CoreConfig,
        clock: Arc<dyn Clock>,
        ledger: Arc<dyn Ledger>,
        routing: Option<Arc<dyn RoutingProvider>>,
    ) -> Result<Self, CoreError> {
        Self::new(
            config,
            clock,
            Arc::new(MemoryRequestStore::new()),
            Arc::new(MemoryExpiringStore::new()),
            ledger,
            routing,
        )
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn directory(&self) -> &NearbyAgentDirectory {
        &self.directory
    }

    // ========================================================================
    // Request Lifecycle
    // ========================================================================

    /// Validate and store a new pending request
    ///
    /// With `selected_agent_id` set the request is matched to that agent
    /// straight away.
    pub async fn create_request(&self, input: NewWithdrawal) -> Result<WithdrawalRequest, CoreError> {
        let now = self.clock.now();
        let selected = input.selected_agent_id.clone();
        let request = WithdrawalRequest::create(
            input,
            (self.config.min_amount, self.config.max_amount),
            now,
            Some(now + self.config.request_expiry()),
        )?;
        if let Some(agent_id) = &selected {
            self.ensure_agent_available(agent_id, None).await?;
        }

        self.requests.insert(request.clone()).await?;
        info!(
            "Request {} created by {} for {}",
            request.id(),
            request.requester_id(),
            request.amount()
        );
        self.record(Event::RequestCreated {
            at: now,
            request_id: request.id().to_string(),
            requester_id: request.requester_id().to_string(),
            amount: request.amount(),
        });

        match selected {
            Some(agent_id) => {
                let requester = Actor::requester(request.requester_id());
                self.match_agent(request.id(), &requester, &agent_id).await
            }
            None => Ok(request),
        }
    }

    /// `pending → matched`
    ///
    /// `initiator` is either the agent accepting (its id must be `agent_id`)
    /// or the requester selecting an agent.
    pub async fn match_agent(
        &self,
        request_id: &str,
        initiator: &Actor,
        agent_id: &str,
    ) -> Result<WithdrawalRequest, CoreError> {
        if initiator.party == Party::Agent && initiator.id != agent_id {
            return Err(RequestError::NotParticipant(initiator.clone()).into());
        }
        self.ensure_agent_available(agent_id, Some(request_id)).await?;

        let agent = Actor::agent(agent_id);
        let (request, outcome) = self
            .transition(request_id, |request, now| {
                if initiator.party == Party::Requester {
                    request.ensure_participant(initiator)?;
                }
                request.match_agent(&agent, now)
            })
            .await?;

        if outcome == TransitionOutcome::Applied {
            info!("Request {} matched to agent {} by {}", request_id, agent_id, initiator.party);
            self.record(Event::AgentMatched {
                at: request.updated_at(),
                request_id: request_id.to_string(),
                agent_id: agent_id.to_string(),
                initiated_by: initiator.party,
            });
        }
        Ok(request)
    }

    /// Agent takes an open request
    pub async fn accept_request(
        &self,
        request_id: &str,
        agent_id: &str,
    ) -> Result<WithdrawalRequest, CoreError> {
        self.match_agent(request_id, &Actor::agent(agent_id), agent_id).await
    }

    /// Requester picks an agent for a pending request
    pub async fn select_agent(
        &self,
        request_id: &str,
        requester_id: &str,
        agent_id: &str,
    ) -> Result<WithdrawalRequest, CoreError> {
        self.match_agent(request_id, &Actor::requester(requester_id), agent_id)
            .await
    }

    /// `matched → in_progress`; either party
    pub async fn mark_arrived(
        &self,
        request_id: &str,
        actor: &Actor,
    ) -> Result<WithdrawalRequest, CoreError> {
        let (request, outcome) = self
            .transition(request_id, |request, now| request.mark_arrived(actor, now))
            .await?;

        if outcome == TransitionOutcome::Applied {
            info!("{} signalled arrival on request {}", actor, request_id);
            self.record(Event::ArrivalSignaled {
                at: request.updated_at(),
                request_id: request_id.to_string(),
                party: actor.party,
            });
        }
        Ok(request)
    }

    /// Record `actor`'s handover confirmation
    ///
    /// If this makes both confirmations present, completion runs before
    /// returning. A ledger failure is returned as an error; the confirmation
    /// itself stays recorded.
    pub async fn confirm(
        &self,
        request_id: &str,
        actor: &Actor,
    ) -> Result<WithdrawalRequest, CoreError> {
        let (request, outcome) = self
            .transition(request_id, |request, now| request.confirm(actor, now))
            .await?;

        if outcome == TransitionOutcome::Applied {
            info!("{} confirmed handover on request {}", actor, request_id);
            self.record(Event::Confirmed {
                at: request.updated_at(),
                request_id: request_id.to_string(),
                party: actor.party,
            });
        }

        match request.completion_check()? {
            CompletionCheck::Ready => self.complete(request_id).await,
            CompletionCheck::AlreadyCompleted | CompletionCheck::AwaitingConfirmation => Ok(request),
        }
    }

    /// `in_progress → completed`, settling the ledger exactly once
    ///
    /// A missing confirmation is not an error: the request is returned
    /// unchanged. An already completed request is returned as is.
    pub async fn complete(&self, request_id: &str) -> Result<WithdrawalRequest, CoreError> {
        let lock = self.completion_lock(request_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.complete_locked(request_id).await
        };
        self.release_completion_lock(request_id, lock).await;
        result
    }

    /// Completion attempts currently holding or awaiting a request lock
    pub async fn completions_in_flight(&self) -> usize {
        self.completion_locks.lock().await.len()
    }

    async fn complete_locked(&self, request_id: &str) -> Result<WithdrawalRequest, CoreError> {
        let request = self.get_status(request_id).await?;
        match request.completion_check()? {
            CompletionCheck::AlreadyCompleted => {
                debug!("Request {} already completed", request_id);
                return Ok(request);
            }
            CompletionCheck::AwaitingConfirmation => {
                debug!("Request {} awaits confirmation, completion deferred", request_id);
                return Ok(request);
            }
            CompletionCheck::Ready => {}
        }

        let commission = self.config.commission_for(request.amount());
        let settlement = match settle_withdrawal(self.ledger.as_ref(), &request, commission).await {
            Ok(settlement) => settlement,
            Err(err) => {
                error!("Completion of request {} failed, will stay in progress: {}", request_id, err);
                self.record(Event::CompletionFailed {
                    at: self.clock.now(),
                    request_id: request_id.to_string(),
                    reason: err.to_string(),
                });
                return Err(err.into());
            }
        };
        self.record(Event::LedgerSettled {
            at: self.clock.now(),
            request_id: request_id.to_string(),
            debited: settlement.debited,
            credited: settlement.credited,
        });

        let (completed, outcome) = self
            .transition(request_id, |request, now| match request.complete(now)? {
                CompletionCheck::Ready => Ok(TransitionOutcome::Applied),
                CompletionCheck::AlreadyCompleted | CompletionCheck::AwaitingConfirmation => {
                    Ok(TransitionOutcome::Unchanged)
                }
            })
            .await?;

        if outcome == TransitionOutcome::Applied {
            info!(
                "Request {} completed: {} paid out, commission {}",
                request_id, settlement.debited, settlement.commission
            );
            self.record(Event::Completed {
                at: completed.updated_at(),
                request_id: request_id.to_string(),
            });
            self.forget_requester_position(request_id).await;
        }
        Ok(completed)
    }

    /// Cancel a non-terminal request
    pub async fn cancel(
        &self,
        request_id: &str,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<WithdrawalRequest, CoreError> {
        let (request, outcome) = self
            .transition(request_id, |request, now| {
                request.cancel(actor, reason.clone(), now)
            })
            .await?;

        if outcome == TransitionOutcome::Applied {
            let reason = request.cancellation().and_then(|c| c.reason.clone());
            info!(
                "Request {} cancelled by {} ({})",
                request_id,
                actor,
                reason.as_deref().unwrap_or("no reason")
            );
            self.record(Event::Cancelled {
                at: request.updated_at(),
                request_id: request_id.to_string(),
                party: actor.party,
                reason,
            });
            self.forget_requester_position(request_id).await;
        }
        Ok(request)
    }

    /// Current authoritative record
    ///
    /// A pending request past its expiry is expired on the way.
    pub async fn get_status(&self, request_id: &str) -> Result<WithdrawalRequest, CoreError> {
        let (request, _) = self
            .transition(request_id, |_, _| Ok(TransitionOutcome::Unchanged))
            .await?;
        Ok(request)
    }

    /// Expire every overdue pending request; returns their ids
    pub async fn sweep_expired(&self) -> Result<Vec<String>, CoreError> {
        let now = self.clock.now();
        let mut expired = Vec::new();
        for request in self.requests.list_by_status(RequestStatus::Pending).await? {
            if !request.is_due_for_expiry(now) {
                continue;
            }
            if self.get_status(request.id()).await?.status() == RequestStatus::Expired {
                expired.push(request.id().to_string());
            }
        }
        if !expired.is_empty() {
            info!("Expired {} pending request(s)", expired.len());
        }
        Ok(expired)
    }

    /// Pending requests within `radius_km` of an agent, nearest first
    pub async fn open_requests_near(
        &self,
        center: Coordinate,
        radius_km: f64,
    ) -> Result<Vec<WithdrawalRequest>, CoreError> {
        let now = self.clock.now();
        let radius_m = radius_km * 1_000.0;
        let mut open: Vec<(f64, WithdrawalRequest)> = self
            .requests
            .list_by_status(RequestStatus::Pending)
            .await?
            .into_iter()
            .filter(|r| !r.is_due_for_expiry(now))
            .map(|r| (distance_meters(&center, &r.location()), r))
            .filter(|(distance, _)| *distance <= radius_m)
            .collect();
        open.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(open.into_iter().map(|(_, r)| r).collect())
    }

    // ========================================================================
    // Presence
    // ========================================================================

    pub async fn find_nearby_agents(
        &self,
        center: Coordinate,
        radius_km: Option<f64>,
    ) -> Result<Vec<AgentCandidate>, CoreError> {
        let radius_km = radius_km.unwrap_or(self.config.search_radius_km);
        let engaged = self.engaged_agents().await?;
        Ok(self
            .directory
            .find_excluding(center, radius_km, &engaged)
            .await?)
    }

    /// Passive scan on the configured interval; `None` if cancelled
    ///
    /// Agents already serving a request are left out on every pass, so one
    /// freed mid-scan shows up on the next.
    pub async fn scan_for_agents(
        &self,
        center: Coordinate,
        radius_km: Option<f64>,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<AgentCandidate>>, CoreError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let candidates = self.find_nearby_agents(center, radius_km).await?;
            if !candidates.is_empty() {
                info!("Found {} free agent(s) after {} scan(s)", candidates.len(), attempts);
                return Ok(Some(candidates));
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.config.scan_interval()) => {}
            }
        }
    }

    /// Agent position heartbeat
    pub async fn report_position(
        &self,
        agent_id: &str,
        sample: &PositionSample,
    ) -> Result<AgentPresence, CoreError> {
        Ok(self.directory.registry().report_agent(agent_id, sample).await?)
    }

    /// Take an agent online or offline
    ///
    /// Going online requires a position within the relaxed accuracy tier,
    /// either `sample` or the agent's last fresh report.
    pub async fn set_availability(
        &self,
        agent_id: &str,
        online: bool,
        sample: Option<&PositionSample>,
    ) -> Result<AgentPresence, CoreError> {
        let registry = self.directory.registry();
        if online {
            let accuracy_m = match sample {
                Some(sample) => sample.accuracy_m,
                None => registry
                    .agent(agent_id)
                    .await?
                    .map(|p| p.accuracy_m)
                    .ok_or_else(|| DirectoryError::NoPosition(agent_id.to_string()))?,
            };
            let required_m = AccuracyTier::GoOnline.threshold_m(&self.config.accuracy);
            if accuracy_m > required_m {
                warn!(
                    "Agent {} cannot go online with accuracy {:.0} m (needs {:.0} m)",
                    agent_id, accuracy_m, required_m
                );
                return Err(DirectoryError::AccuracyTooLow {
                    accuracy_m,
                    required_m,
                }
                .into());
            }
        }
        Ok(registry.set_availability(agent_id, online, sample).await?)
    }

    /// Requester live position while the meeting is underway
    pub async fn report_requester_position(
        &self,
        request_id: &str,
        requester_id: &str,
        sample: &PositionSample,
    ) -> Result<RequesterPosition, CoreError> {
        let request = self.get_status(request_id).await?;
        request.ensure_participant(&Actor::requester(requester_id))?;
        if request.is_terminal() {
            return Err(RequestError::TerminalState(request.status()).into());
        }
        Ok(self
            .directory
            .registry()
            .report_requester(request_id, sample)
            .await?)
    }

    /// Latest position of the other party, as seen by `viewer`
    ///
    /// Only while the request is matched or in progress.
    pub async fn track_counterpart(
        &self,
        request_id: &str,
        viewer: &Actor,
    ) -> Result<CounterpartFix, CoreError> {
        let request = self.get_status(request_id).await?;
        request.ensure_participant(viewer)?;
        let status = request.status();
        let agent_id = match (status, request.agent_id()) {
            (RequestStatus::Matched | RequestStatus::InProgress, Some(agent_id)) => agent_id,
            _ => return Err(CoreError::NotTracking(status)),
        };

        let registry = self.directory.registry();
        let agent = registry.agent(agent_id).await?.map(|p| CounterpartPosition {
            coordinate: p.coordinate,
            accuracy_m: Some(p.accuracy_m),
            updated_at: p.updated_at,
        });
        let requester = Some(match registry.requester(request_id).await? {
            Some(p) => CounterpartPosition {
                coordinate: p.coordinate,
                accuracy_m: Some(p.accuracy_m),
                updated_at: p.updated_at,
            },
            None => CounterpartPosition {
                coordinate: request.location(),
                accuracy_m: None,
                updated_at: request.created_at(),
            },
        });

        let (counterpart, theirs, own) = match viewer.party {
            Party::Requester => (Party::Agent, agent.clone(), requester.clone()),
            Party::Agent => (Party::Requester, requester.clone(), agent.clone()),
        };

        let (distance, bearing) = match (&own, &theirs) {
            (Some(own), Some(theirs)) => (
                Some(distance_meters(&own.coordinate, &theirs.coordinate)),
                Some(bearing_degrees(&own.coordinate, &theirs.coordinate)),
            ),
            _ => (None, None),
        };

        let eta = match (&self.routing, &agent, &requester) {
            (Some(routing), Some(agent), Some(requester)) => {
                let (origin, destination) = match request.meeting_type() {
                    Some(MeetingType::RequesterTravels) => (requester.coordinate, agent.coordinate),
                    Some(MeetingType::AgentTravels) | None => (agent.coordinate, requester.coordinate),
                };
                eta_from_route(
                    routing.as_ref(),
                    origin,
                    destination,
                    self.config.travel_mode,
                    self.config.routing_timeout(),
                )
                .await
            }
            _ => None,
        };

        Ok(CounterpartFix {
            request_id: request_id.to_string(),
            request_version: request.version(),
            status,
            counterpart,
            position: theirs,
            distance_meters: distance,
            distance_label: distance.map(format_distance),
            bearing_deg: bearing,
            eta,
        })
    }

    // ========================================================================
    // Events & Checkpoints
    // ========================================================================

    pub fn events_for_request(&self, request_id: &str) -> Vec<Event> {
        self.with_event_log(|log| log.events_for_request(request_id).into_iter().cloned().collect())
    }

    pub fn event_count(&self) -> usize {
        self.with_event_log(|log| log.len())
    }

    /// Hand every retained event to the caller and empty the log
    pub fn drain_events(&self) -> Vec<Event> {
        self.with_event_log(|log| log.drain())
    }

    /// Events dropped by the retention bound
    pub fn events_evicted(&self) -> u64 {
        self.with_event_log(|log| log.evicted())
    }

    /// Snapshot of every stored request
    pub async fn save_state(&self) -> Result<StoreSnapshot, CoreError> {
        Ok(StoreSnapshot {
            taken_at: self.clock.now(),
            config_hash: self.config_hash.clone(),
            requests: self.requests.all().await?,
        })
    }

    /// Replace the store with a validated snapshot
    pub async fn load_state(&self, snapshot: StoreSnapshot) -> Result<(), CoreError> {
        validate_snapshot(&snapshot, &self.config_hash)?;
        let count = snapshot.requests.len();
        self.requests.replace_all(snapshot.requests).await?;
        info!("Restored {} request(s) from snapshot taken at {}", count, snapshot.taken_at);
        Ok(())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Read, apply `action` to a copy, compare-and-swap, retry on conflict
    ///
    /// An overdue pending request is expired first, so no action ever sees
    /// a pending request past its expiry.
    async fn transition<F>(
        &self,
        request_id: &str,
        mut action: F,
    ) -> Result<(WithdrawalRequest, TransitionOutcome), CoreError>
    where
        F: FnMut(&mut WithdrawalRequest, DateTime<Utc>) -> Result<TransitionOutcome, RequestError>
            + Send,
    {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self
                .requests
                .get(request_id)
                .await?
                .ok_or_else(|| CoreError::RequestNotFound(request_id.to_string()))?;
            let now = self.clock.now();
            let mut next = current.clone();

            let outcome = if next.is_due_for_expiry(now) {
                next.expire(now)?
            } else {
                action(&mut next, now)?
            };
            if outcome == TransitionOutcome::Unchanged {
                return Ok((current, outcome));
            }

            match self.requests.compare_and_swap(current.version(), next.clone()).await {
                Ok(()) => {
                    if current.status() == RequestStatus::Pending
                        && next.status() == RequestStatus::Expired
                    {
                        info!("Request {} expired unmatched", request_id);
                        self.record(Event::Expired {
                            at: now,
                            request_id: request_id.to_string(),
                        });
                        continue;
                    }
                    return Ok((next, outcome));
                }
                Err(StoreError::VersionMismatch { .. }) => {
                    debug!(
                        "Request {} changed concurrently, retrying (attempt {})",
                        request_id, attempt
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        warn!("Giving up on request {} after {} attempts", request_id, MAX_CAS_ATTEMPTS);
        Err(CoreError::Contention {
            request_id: request_id.to_string(),
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    /// Online with fresh presence, and not assigned to another live request
    async fn ensure_agent_available(
        &self,
        agent_id: &str,
        for_request: Option<&str>,
    ) -> Result<(), CoreError> {
        match self.directory.registry().agent(agent_id).await? {
            Some(presence) if presence.available => {}
            _ => return Err(CoreError::AgentUnavailable(agent_id.to_string())),
        }
        if let Some(busy) = self.live_assignment(agent_id, for_request).await? {
            warn!("Agent {} is already assigned to request {}", agent_id, busy);
            return Err(CoreError::AgentBusy {
                agent_id: agent_id.to_string(),
                request_id: busy,
            });
        }
        Ok(())
    }

    /// Agents assigned to a matched or in-progress request
    async fn engaged_agents(&self) -> Result<HashSet<String>, CoreError> {
        let mut engaged = HashSet::new();
        for status in [RequestStatus::Matched, RequestStatus::InProgress] {
            for request in self.requests.list_by_status(status).await? {
                if let Some(agent_id) = request.agent_id() {
                    engaged.insert(agent_id.to_string());
                }
            }
        }
        Ok(engaged)
    }

    /// The live request `agent_id` is assigned to, other than `except`
    async fn live_assignment(
        &self,
        agent_id: &str,
        except: Option<&str>,
    ) -> Result<Option<String>, CoreError> {
        for status in [RequestStatus::Matched, RequestStatus::InProgress] {
            let busy = self
                .requests
                .list_by_status(status)
                .await?
                .into_iter()
                .find(|r| r.agent_id() == Some(agent_id) && Some(r.id()) != except);
            if let Some(request) = busy {
                return Ok(Some(request.id().to_string()));
            }
        }
        Ok(None)
    }

    async fn completion_lock(&self, request_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.completion_locks
            .lock()
            .await
            .entry(request_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the entry unless another attempt still holds a handle to it
    async fn release_completion_lock(&self, request_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.completion_locks.lock().await;
        // one handle in the map, one here
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(request_id);
        }
        // our handle goes while the map is still locked
        drop(lock);
    }

    async fn forget_requester_position(&self, request_id: &str) {
        if let Err(err) = self.directory.registry().forget_requester(request_id).await {
            warn!("Could not drop live position of request {}: {}", request_id, err);
        }
    }

    fn record(&self, event: Event) {
        debug!("Event {} on request {}", event.event_type(), event.request_id());
        self.with_event_log(|log| log.log(event));
    }

    fn with_event_log<R>(&self, f: impl FnOnce(&mut EventLog) -> R) -> R {
        let mut log = match self.event_log.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut log)
    }
}
