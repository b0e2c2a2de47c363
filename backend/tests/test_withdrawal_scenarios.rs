//! End-to-end withdrawal scenarios
//!
//! Each test walks one complete story through the public service API:
//! location gate, directory, state machine and ledger together.

use cash_courier_core_rs::core::time::ManualClock;
use cash_courier_core_rs::geo::{destination_point, Coordinate, StraightLineRouting};
use cash_courier_core_rs::ledger::LedgerLeg;
use cash_courier_core_rs::location::{
    AccuracyGate, AccuracyTier, GateOutcome, PositionSample, ReplaySource,
};
use cash_courier_core_rs::models::{Actor, Event, MeetingType, NewWithdrawal, RequestError, RequestStatus};
use cash_courier_core_rs::{
    Clock, CoreConfig, CoreError, ErrorClass, MemoryLedger, WithdrawalService,
};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Helpers
// ============================================================================

struct Platform {
    clock: Arc<ManualClock>,
    ledger: Arc<MemoryLedger>,
    service: WithdrawalService,
}

async fn platform() -> Platform {
    let clock = Arc::new(ManualClock::starting_at_epoch());
    let ledger = Arc::new(MemoryLedger::new());
    ledger.open_account("USER_1", 10_000).await;
    let service = WithdrawalService::in_memory(
        CoreConfig::default(),
        clock.clone(),
        ledger.clone(),
        Some(Arc::new(StraightLineRouting::default())),
    )
    .unwrap();
    Platform {
        clock,
        ledger,
        service,
    }
}

fn requester_home() -> Coordinate {
    Coordinate::new(-1.2864, 36.8172)
}

async fn agent_online(p: &Platform, agent_id: &str, bearing_deg: f64, distance_m: f64) {
    let position = destination_point(&requester_home(), bearing_deg, distance_m);
    p.service
        .set_availability(
            agent_id,
            true,
            Some(&PositionSample::new(position, 25.0, p.clock.now())),
        )
        .await
        .unwrap();
}

fn request_at(location: Coordinate, amount: i64) -> NewWithdrawal {
    NewWithdrawal {
        requester_id: "USER_1".to_string(),
        amount,
        location,
        location_description: "Outside the pharmacy".to_string(),
        meeting_type: Some(MeetingType::AgentTravels),
        selected_agent_id: None,
    }
}

// ============================================================================
// Scenario 1: Happy path from location fix to settlement
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_withdrawal_completes_after_both_confirm() {
    let p = platform().await;
    agent_online(&p, "AGENT_A", 90.0, 800.0).await;
    agent_online(&p, "AGENT_B", 200.0, 3_500.0).await;

    // Location fix: a coarse reading, then one at 40 m
    let fix = ReplaySource::new()
        .then(
            Duration::from_secs(2),
            PositionSample::new(requester_home(), 180.0, p.clock.now()),
        )
        .then(
            Duration::from_secs(2),
            PositionSample::new(requester_home(), 40.0, p.clock.now()),
        );
    let outcome = AccuracyGate::for_tier(AccuracyTier::Matching, p.service.config())
        .acquire_from(fix)
        .await
        .unwrap();
    assert!(matches!(outcome, GateOutcome::Precise(_)));
    let here = outcome.sample().coordinate;

    let request = p.service.create_request(request_at(here, 2_000)).await.unwrap();
    assert_eq!(request.status(), RequestStatus::Pending);

    let agents = p.service.find_nearby_agents(here, Some(2.0)).await.unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].agent_id, "AGENT_A");
    assert_eq!(agents[0].distance_label, "800 m");
    assert!(agents[0].eta.is_some());

    let matched = p
        .service
        .select_agent(request.id(), "USER_1", &agents[0].agent_id)
        .await
        .unwrap();
    assert_eq!(matched.status(), RequestStatus::Matched);
    assert_eq!(matched.agent_id(), Some("AGENT_A"));

    let agent = Actor::agent("AGENT_A");
    let requester = Actor::requester("USER_1");
    let arrived = p.service.mark_arrived(request.id(), &agent).await.unwrap();
    assert_eq!(arrived.status(), RequestStatus::InProgress);

    let half = p.service.confirm(request.id(), &agent).await.unwrap();
    assert_eq!(half.status(), RequestStatus::InProgress);
    let done = p.service.confirm(request.id(), &requester).await.unwrap();
    assert_eq!(done.status(), RequestStatus::Completed);

    let journal = p.ledger.journal().await;
    assert_eq!(journal.len(), 2);
    assert_eq!(journal[0].leg, LedgerLeg::Debit);
    assert_eq!(journal[0].account_id, "USER_1");
    assert_eq!(journal[0].amount, 2_000);
    assert_eq!(journal[1].leg, LedgerLeg::Credit);
    assert_eq!(journal[1].account_id, "AGENT_A");
    assert_eq!(journal[1].amount, 2_020);
    assert!(journal[0].sequence < journal[1].sequence);
    assert_eq!(p.ledger.balance("USER_1").await, Some(8_000));

    let kinds: Vec<&str> = p
        .service
        .events_for_request(request.id())
        .iter()
        .map(|e| e.event_type())
        .collect();
    assert_eq!(
        kinds,
        vec![
            "request_created",
            "agent_matched",
            "arrival_signaled",
            "confirmed",
            "confirmed",
            "ledger_settled",
            "completed",
        ]
    );
}

#[tokio::test]
async fn test_agent_picks_up_open_request() {
    let p = platform().await;
    agent_online(&p, "AGENT_A", 0.0, 600.0).await;
    let request = p
        .service
        .create_request(request_at(requester_home(), 500))
        .await
        .unwrap();

    let agent_spot = destination_point(&requester_home(), 0.0, 600.0);
    let open = p.service.open_requests_near(agent_spot, 2.0).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id(), request.id());

    let accepted = p.service.accept_request(request.id(), "AGENT_A").await.unwrap();
    assert_eq!(accepted.status(), RequestStatus::Matched);
    assert!(p
        .service
        .open_requests_near(agent_spot, 2.0)
        .await
        .unwrap()
        .is_empty());
}

// ============================================================================
// Scenario 2: Cancellation after matching
// ============================================================================

#[tokio::test]
async fn test_cancelled_request_rejects_agent_confirmation() {
    let p = platform().await;
    agent_online(&p, "AGENT_A", 90.0, 800.0).await;
    let request = p
        .service
        .create_request(NewWithdrawal {
            selected_agent_id: Some("AGENT_A".to_string()),
            ..request_at(requester_home(), 2_000)
        })
        .await
        .unwrap();
    assert_eq!(request.status(), RequestStatus::Matched);
    let requester = Actor::requester("USER_1");

    let err = p
        .service
        .cancel(request.id(), &requester, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Request(RequestError::ReasonRequired)
    ));
    assert_eq!(err.kind(), ErrorClass::Validation);

    let cancelled = p
        .service
        .cancel(
            request.id(),
            &requester,
            Some("found another agent".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(cancelled.status(), RequestStatus::Cancelled);
    let cancellation = cancelled.cancellation().unwrap();
    assert_eq!(cancellation.reason.as_deref(), Some("found another agent"));
    assert_eq!(cancellation.released_agent_id.as_deref(), Some("AGENT_A"));

    let err = p
        .service
        .confirm(request.id(), &Actor::agent("AGENT_A"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorClass::Conflict);
    assert_eq!(err.user_message(), None);
    assert_eq!(
        p.service.get_status(request.id()).await.unwrap(),
        cancelled
    );
    assert!(p.ledger.journal().await.is_empty());
}

// ============================================================================
// Scenario 3: Expiry without anyone acting
// ============================================================================

#[tokio::test]
async fn test_unmatched_request_expires() {
    let p = platform().await;
    let request = p
        .service
        .create_request(request_at(requester_home(), 1_000))
        .await
        .unwrap();

    p.clock.advance(chrono::Duration::minutes(10));
    assert!(p.service.sweep_expired().await.unwrap().is_empty());

    p.clock.advance(chrono::Duration::minutes(6));
    let expired = p.service.sweep_expired().await.unwrap();
    assert_eq!(expired, vec![request.id().to_string()]);

    let status = p.service.get_status(request.id()).await.unwrap();
    assert_eq!(status.status(), RequestStatus::Expired);
    assert!(p
        .service
        .events_for_request(request.id())
        .iter()
        .any(|e| matches!(e, Event::Expired { .. })));

    agent_online(&p, "AGENT_A", 0.0, 100.0).await;
    let err = p
        .service
        .accept_request(request.id(), "AGENT_A")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorClass::Conflict);
}

// ============================================================================
// Scenario 4: Long-running service keeps a bounded event log
// ============================================================================

#[tokio::test]
async fn test_event_log_is_bounded_and_drainable() {
    let clock = Arc::new(ManualClock::starting_at_epoch());
    let ledger = Arc::new(MemoryLedger::new());
    let service = WithdrawalService::in_memory(
        CoreConfig {
            event_retention: 5,
            ..CoreConfig::default()
        },
        clock,
        ledger,
        None,
    )
    .unwrap();

    let mut ids = Vec::new();
    for _ in 0..8 {
        let request = service
            .create_request(request_at(requester_home(), 1_000))
            .await
            .unwrap();
        ids.push(request.id().to_string());
    }

    assert_eq!(service.event_count(), 5);
    assert_eq!(service.events_evicted(), 3);
    assert!(service.events_for_request(&ids[0]).is_empty());
    assert_eq!(service.events_for_request(&ids[7]).len(), 1);

    let drained = service.drain_events();
    let drained_ids: Vec<&str> = drained.iter().map(|e| e.request_id()).collect();
    assert_eq!(drained_ids, ids[3..].iter().map(String::as_str).collect::<Vec<_>>());
    assert_eq!(service.event_count(), 0);
}
