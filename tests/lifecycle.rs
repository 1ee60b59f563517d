use salvor::dispatch::{DispatchConfig, Dispatcher};
use salvor::http::{HttpResponse, MockHttpClient};
use salvor::manager::{InMemoryStorage, ListQuery, Storage};
use salvor::{
    Actor, AnyRequest, CalculationResult, CallbackHandler, DetailsUpdate, ErrorKind,
    RecoveryDesk, RequestId, RequestStatus, ResolveAction, Strategy, StrategyId, StrategyStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const URL: &str = "http://compute.test/calculate";
const SECRET: &str = "internal-s3cret";

struct Harness {
    desk: RecoveryDesk<InMemoryStorage>,
    storage: Arc<InMemoryStorage>,
    http: Arc<MockHttpClient>,
    callbacks: CallbackHandler<InMemoryStorage>,
    shutdown: CancellationToken,
    /// Holds the queue open when the dispatcher is not running
    _parked: Option<Dispatcher<MockHttpClient>>,
}

impl Harness {
    /// Desk wired to a running dispatcher.
    fn running(config: DispatchConfig) -> Self {
        Self::build(config, true)
    }

    /// Desk wired to a dispatcher that is never started, so nothing drains the queue.
    fn stopped(config: DispatchConfig) -> Self {
        Self::build(config, false)
    }

    fn build(config: DispatchConfig, run: bool) -> Self {
        let storage = Arc::new(InMemoryStorage::new());
        storage.insert_strategy(strategy(1, 2.0, StrategyStatus::Active));
        storage.insert_strategy(strategy(2, 3.0, StrategyStatus::Active));
        storage.insert_strategy(strategy(3, 1.0, StrategyStatus::Inactive));

        let http = Arc::new(MockHttpClient::new());
        let (dispatcher, handle) = Dispatcher::new(http.clone(), config);
        let shutdown = CancellationToken::new();
        let parked = if run {
            dispatcher.spawn(shutdown.clone());
            None
        } else {
            Some(dispatcher)
        };

        Self {
            desk: RecoveryDesk::new(storage.clone(), handle),
            callbacks: CallbackHandler::new(storage.clone(), SECRET),
            storage,
            http,
            shutdown,
            _parked: parked,
        }
    }

    /// A formed request owned by `user` holding strategies 1 (60 GB) and 2 (40 GB).
    async fn formed_request(&self, user: &Actor) -> RequestId {
        let id = self
            .desk
            .add_to_cart(user, StrategyId(1), 60)
            .await
            .unwrap();
        self.desk
            .add_to_cart(user, StrategyId(2), 40)
            .await
            .unwrap();
        self.desk.form(user, id).await.unwrap();
        id
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn strategy(id: i64, hours: f64, status: StrategyStatus) -> Strategy {
    Strategy {
        id: StrategyId(id),
        title: format!("Strategy {id}"),
        description: "Recover from offsite backups".to_string(),
        image_url: None,
        base_recovery_hours: hours,
        status,
    }
}

fn dispatch_config() -> DispatchConfig {
    DispatchConfig {
        endpoint_url: URL.to_string(),
        timeout_ms: 1000,
        backoff_ms: 10,
        max_backoff_ms: 50,
        ..Default::default()
    }
}

fn ok() -> salvor::Result<HttpResponse> {
    Ok(HttpResponse {
        status: 200,
        body: "{}".to_string(),
    })
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 3s");
}

fn kind<T: std::fmt::Debug>(result: salvor::Result<T>) -> ErrorKind {
    result.unwrap_err().kind()
}

// ============================================================================
// Draft cart and ledger
// ============================================================================

#[test_log::test(tokio::test)]
async fn test_concurrent_cart_adds_share_one_draft() {
    let h = Harness::stopped(dispatch_config());
    let user = Actor::user(7);

    let adds = (0..20).map(|i| {
        let desk = &h.desk;
        async move { desk.add_to_cart(&user, StrategyId(1 + i % 2), 10).await }
    });
    let ids: Vec<RequestId> = futures::future::join_all(adds)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert!(ids.iter().all(|id| *id == ids[0]), "got {:?}", ids);
    let items = h.desk.list_line_items(&user, ids[0]).await.unwrap();
    assert_eq!(items.len(), 2);

    let badge = h.desk.cart_badge(&user).await;
    assert_eq!(badge.request_id, Some(ids[0]));
    assert_eq!(badge.count, 2);
}

#[test_log::test(tokio::test)]
async fn test_adding_an_attached_strategy_is_a_no_op() {
    let h = Harness::stopped(dispatch_config());
    let user = Actor::user(7);

    let id = h.desk.add_to_cart(&user, StrategyId(1), 10).await.unwrap();
    let again = h.desk.add_to_cart(&user, StrategyId(1), 99).await.unwrap();
    assert_eq!(id, again);

    let items = h.desk.list_line_items(&user, id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].data_to_recover_gb, 10);

    assert!(
        !h.desk
            .add_strategy(&user, id, StrategyId(1), 5)
            .await
            .unwrap()
    );
    assert!(
        h.desk
            .add_strategy(&user, id, StrategyId(2), 5)
            .await
            .unwrap()
    );
}

#[test_log::test(tokio::test)]
async fn test_cart_input_validation() {
    let h = Harness::stopped(dispatch_config());
    let user = Actor::user(7);

    assert_eq!(
        kind(h.desk.add_to_cart(&user, StrategyId(3), 10).await),
        ErrorKind::Validation
    );
    assert_eq!(
        kind(h.desk.add_to_cart(&user, StrategyId(404), 10).await),
        ErrorKind::NotFound
    );
    assert_eq!(
        kind(h.desk.add_to_cart(&user, StrategyId(1), -1).await),
        ErrorKind::Validation
    );

    // None of the refused adds opened a draft
    assert_eq!(h.desk.cart_badge(&user).await.request_id, None);
}

#[test_log::test(tokio::test)]
async fn test_ledger_updates_and_removals() {
    let h = Harness::stopped(dispatch_config());
    let user = Actor::user(7);
    let id = h.desk.add_to_cart(&user, StrategyId(1), 10).await.unwrap();

    h.desk
        .update_quantity(&user, id, StrategyId(1), 250)
        .await
        .unwrap();
    assert_eq!(
        h.desk.list_line_items(&user, id).await.unwrap()[0].data_to_recover_gb,
        250
    );

    assert_eq!(
        kind(h.desk.update_quantity(&user, id, StrategyId(2), 1).await),
        ErrorKind::NotFound
    );
    assert_eq!(
        kind(h.desk.update_quantity(&user, id, StrategyId(1), -5).await),
        ErrorKind::Validation
    );

    h.desk
        .remove_strategy(&user, id, StrategyId(1))
        .await
        .unwrap();
    assert_eq!(
        kind(h.desk.remove_strategy(&user, id, StrategyId(1)).await),
        ErrorKind::NotFound
    );
    assert_eq!(h.desk.cart_badge(&user).await.count, 0);
}

#[test_log::test(tokio::test)]
async fn test_ledger_guards_check_actor_before_status() {
    let h = Harness::stopped(dispatch_config());
    let owner = Actor::user(7);
    let stranger = Actor::user(8);
    let id = h.desk.add_to_cart(&owner, StrategyId(1), 10).await.unwrap();

    assert_eq!(
        kind(h.desk.update_quantity(&stranger, id, StrategyId(1), 1).await),
        ErrorKind::Authorization
    );
    assert_eq!(
        kind(h.desk.remove_strategy(&stranger, id, StrategyId(1)).await),
        ErrorKind::Authorization
    );

    h.desk.form(&owner, id).await.unwrap();

    assert_eq!(
        kind(h.desk.update_quantity(&owner, id, StrategyId(1), 1).await),
        ErrorKind::StateConflict
    );
    assert_eq!(
        kind(h.desk.add_strategy(&owner, id, StrategyId(2), 1).await),
        ErrorKind::StateConflict
    );
    // Wrong actor and wrong status at once reads as an authorization failure
    assert_eq!(
        kind(h.desk.update_quantity(&stranger, id, StrategyId(1), 1).await),
        ErrorKind::Authorization
    );
}

#[test_log::test(tokio::test)]
async fn test_update_details_only_touches_present_fields() {
    let h = Harness::stopped(dispatch_config());
    let user = Actor::user(7);
    let id = h.desk.add_to_cart(&user, StrategyId(1), 10).await.unwrap();

    h.desk
        .update_details(
            &user,
            id,
            DetailsUpdate {
                it_skill_level: Some("expert".into()),
                network_bandwidth_mbps: Some(100),
                documentation_quality: None,
            },
        )
        .await
        .unwrap();
    h.desk
        .update_details(
            &user,
            id,
            DetailsUpdate {
                documentation_quality: Some("good".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let view = h.desk.get_request(&user, id).await.unwrap();
    let details = &view.request.data().details;
    assert_eq!(details.it_skill_level.as_deref(), Some("expert"));
    assert_eq!(details.network_bandwidth_mbps, Some(100));
    assert_eq!(details.documentation_quality.as_deref(), Some("good"));

    let negative = DetailsUpdate {
        network_bandwidth_mbps: Some(-1),
        ..Default::default()
    };
    assert_eq!(
        kind(h.desk.update_details(&user, id, negative).await),
        ErrorKind::Validation
    );
    assert_eq!(
        kind(
            h.desk
                .update_details(&Actor::user(8), id, DetailsUpdate::default())
                .await
        ),
        ErrorKind::Authorization
    );

    h.desk.form(&user, id).await.unwrap();
    let late = DetailsUpdate {
        it_skill_level: Some("average".into()),
        ..Default::default()
    };
    assert_eq!(
        kind(h.desk.update_details(&user, id, late).await),
        ErrorKind::StateConflict
    );
}

// ============================================================================
// State machine
// ============================================================================

#[test_log::test(tokio::test)]
async fn test_form_and_delete_guards() {
    let h = Harness::stopped(dispatch_config());
    let owner = Actor::user(7);
    let stranger = Actor::user(8);

    let id = h.desk.add_to_cart(&owner, StrategyId(1), 10).await.unwrap();
    assert_eq!(
        kind(h.desk.form(&stranger, id).await),
        ErrorKind::Authorization
    );
    assert_eq!(
        kind(h.desk.form(&Actor::moderator(1), id).await),
        ErrorKind::Authorization
    );

    let formed = h.desk.form(&owner, id).await.unwrap();
    assert_eq!(formed.data.id, id);
    assert_eq!(kind(h.desk.form(&owner, id).await), ErrorKind::StateConflict);
    assert_eq!(
        kind(h.desk.delete(&owner, id).await),
        ErrorKind::StateConflict
    );

    // The user's next cart mutation opens a fresh draft
    let next = h.desk.add_to_cart(&owner, StrategyId(2), 5).await.unwrap();
    assert_ne!(next, id);
}

#[test_log::test(tokio::test)]
async fn test_soft_delete() {
    let h = Harness::stopped(dispatch_config());
    let owner = Actor::user(7);
    let id = h.desk.add_to_cart(&owner, StrategyId(1), 10).await.unwrap();

    assert_eq!(
        kind(h.desk.delete(&Actor::user(8), id).await),
        ErrorKind::Authorization
    );
    h.desk.delete(&owner, id).await.unwrap();

    // Still stored, but reads as missing
    let stored = h.storage.get_request(id).await.unwrap();
    assert_eq!(stored.status(), RequestStatus::Deleted);
    assert_eq!(
        kind(h.desk.get_request(&owner, id).await),
        ErrorKind::NotFound
    );
    assert_eq!(
        kind(h.desk.get_request(&Actor::moderator(1), id).await),
        ErrorKind::NotFound
    );

    assert_eq!(
        kind(h.desk.form(&owner, id).await),
        ErrorKind::StateConflict
    );
    assert_eq!(h.desk.cart_badge(&owner).await.request_id, None);
}

#[test_log::test(tokio::test)]
async fn test_resolve_guards() {
    let h = Harness::stopped(dispatch_config());
    let owner = Actor::user(7);
    let moderator = Actor::moderator(1);

    let draft = h.desk.add_to_cart(&owner, StrategyId(1), 10).await.unwrap();
    assert_eq!(
        kind(h.desk.resolve(&moderator, draft, ResolveAction::Reject).await),
        ErrorKind::StateConflict
    );

    h.desk.form(&owner, draft).await.unwrap();
    assert_eq!(
        kind(h.desk.resolve(&owner, draft, ResolveAction::Complete).await),
        ErrorKind::Authorization
    );

    let rejected = h
        .desk
        .resolve(&moderator, draft, ResolveAction::Reject)
        .await
        .unwrap();
    assert_eq!(rejected.status(), RequestStatus::Rejected);
    assert!(rejected.is_terminal());

    let err = h
        .desk
        .resolve(&moderator, draft, ResolveAction::Complete)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StateConflict);
    assert!(err.to_string().contains("rejected"), "got: {}", err);

    assert_eq!(
        kind(
            h.desk
                .resolve(&moderator, RequestId(999), ResolveAction::Complete)
                .await
        ),
        ErrorKind::NotFound
    );

    // Rejecting never calls the compute service
    assert_eq!(h.http.call_count(), 0);
    assert_eq!(h.desk.dispatch_stats().submitted, 0);
}

// ============================================================================
// Calculation, dispatch and callback
// ============================================================================

#[test_log::test(tokio::test)]
async fn test_preview_estimate() {
    let h = Harness::stopped(dispatch_config());
    let user = Actor::user(7);
    let id = h.desk.add_to_cart(&user, StrategyId(1), 60).await.unwrap();
    h.desk.add_to_cart(&user, StrategyId(2), 40).await.unwrap();
    h.desk
        .update_details(
            &user,
            id,
            DetailsUpdate {
                it_skill_level: Some("эксперт".into()),
                network_bandwidth_mbps: Some(100),
                documentation_quality: Some("отличная".into()),
            },
        )
        .await
        .unwrap();

    let hours = h.desk.preview_estimate(&user, id).await.unwrap();
    assert!((hours - 4.0744).abs() < 1e-3, "got {hours}");

    let same = h
        .desk
        .preview_estimate(&Actor::moderator(1), id)
        .await
        .unwrap();
    assert_eq!(hours, same);
    assert_eq!(
        kind(h.desk.preview_estimate(&Actor::user(8), id).await),
        ErrorKind::Authorization
    );

    // Previewing stores nothing
    let stored = h.storage.get_request(id).await.unwrap();
    assert_eq!(stored.calculated_recovery_time_hours(), None);
}

#[test_log::test(tokio::test)]
async fn test_complete_is_pending_then_resolved_by_callback() {
    let h = Harness::running(dispatch_config());
    h.http.add_response(URL, ok());
    let user = Actor::user(7);
    let moderator = Actor::moderator(1);

    let id = h.desk.add_to_cart(&user, StrategyId(1), 60).await.unwrap();
    h.desk.add_to_cart(&user, StrategyId(2), 40).await.unwrap();
    h.desk
        .update_details(
            &user,
            id,
            DetailsUpdate {
                it_skill_level: Some("expert".into()),
                network_bandwidth_mbps: Some(100),
                documentation_quality: Some("excellent".into()),
            },
        )
        .await
        .unwrap();
    h.desk.form(&user, id).await.unwrap();

    let completed = h
        .desk
        .resolve(&moderator, id, ResolveAction::Complete)
        .await
        .unwrap();
    assert_eq!(completed.status(), RequestStatus::Completed);
    assert_eq!(completed.calculated_recovery_time_hours(), None);

    wait_until(|| h.http.call_count() == 1).await;
    let call = &h.http.get_calls()[0];
    assert_eq!(call.url, URL);
    assert_eq!(call.timeout_ms, 1000);
    let body = call.json();
    assert_eq!(body["requestId"], id.0);
    assert_eq!(body["itSkillLevel"], "expert");
    assert_eq!(body["networkBandwidthMbps"], 100);
    assert_eq!(body["documentationQuality"], "excellent");
    assert_eq!(body["strategies"].as_array().unwrap().len(), 2);
    assert_eq!(body["strategies"][0]["dataToRecoverGB"], 60);
    wait_until(|| h.desk.dispatch_stats().sent == 1).await;

    // The compute service answers
    let ack = h
        .callbacks
        .handle(
            Some(SECRET),
            CalculationResult {
                request_id: id,
                calculated_time: 4.0744,
            },
        )
        .await
        .unwrap();
    assert_eq!(ack.request_id, id);

    let view = h.desk.get_request(&user, id).await.unwrap();
    assert_eq!(view.request.calculated_recovery_time_hours(), Some(4.0744));
    assert_eq!(view.line_items.len(), 2);

    // Repeated callbacks overwrite
    h.callbacks
        .handle(
            Some(SECRET),
            CalculationResult {
                request_id: id,
                calculated_time: 5.5,
            },
        )
        .await
        .unwrap();
    let stored = h.storage.get_request(id).await.unwrap();
    assert_eq!(stored.calculated_recovery_time_hours(), Some(5.5));
}

#[test_log::test(tokio::test)]
async fn test_absent_details_are_sent_as_empty_values() {
    let h = Harness::running(dispatch_config());
    h.http.add_response(URL, ok());
    let id = h.formed_request(&Actor::user(7)).await;

    h.desk
        .resolve(&Actor::moderator(1), id, ResolveAction::Complete)
        .await
        .unwrap();

    wait_until(|| h.http.call_count() == 1).await;
    let body = h.http.get_calls()[0].json();
    assert_eq!(body["itSkillLevel"], "");
    assert_eq!(body["networkBandwidthMbps"], 0);
    assert_eq!(body["documentationQuality"], "");
}

#[test_log::test(tokio::test)]
async fn test_dispatch_failure_does_not_fail_resolve() {
    let h = Harness::running(dispatch_config());
    h.http.add_response(
        URL,
        Ok(HttpResponse {
            status: 500,
            body: "boom".to_string(),
        }),
    );
    // Second request: no response configured, the mock errors like a dead host
    let first = h.formed_request(&Actor::user(7)).await;
    let second = h.formed_request(&Actor::user(8)).await;

    let moderator = Actor::moderator(1);
    h.desk
        .resolve(&moderator, first, ResolveAction::Complete)
        .await
        .unwrap();
    h.desk
        .resolve(&moderator, second, ResolveAction::Complete)
        .await
        .unwrap();

    wait_until(|| h.desk.dispatch_stats().failed == 2).await;
    let stats = h.desk.dispatch_stats();
    assert_eq!(stats.submitted, 2);
    assert_eq!(stats.sent, 0);
    // No retries by default
    assert_eq!(h.http.call_count(), 2);

    for id in [first, second] {
        let stored = h.storage.get_request(id).await.unwrap();
        assert_eq!(stored.status(), RequestStatus::Completed);
        assert_eq!(stored.calculated_recovery_time_hours(), None);
    }
}

#[test_log::test(tokio::test)]
async fn test_opt_in_retries_resend_after_failure() {
    let config = DispatchConfig {
        max_retries: 2,
        ..dispatch_config()
    };
    let h = Harness::running(config);
    h.http.add_response(
        URL,
        Ok(HttpResponse {
            status: 503,
            body: String::new(),
        }),
    );
    h.http.add_response(URL, ok());
    let id = h.formed_request(&Actor::user(7)).await;

    h.desk
        .resolve(&Actor::moderator(1), id, ResolveAction::Complete)
        .await
        .unwrap();

    wait_until(|| h.desk.dispatch_stats().sent == 1).await;
    assert_eq!(h.http.call_count(), 2);
    assert_eq!(h.desk.dispatch_stats().failed, 0);
}

#[test_log::test(tokio::test)]
async fn test_full_queue_does_not_fail_resolve() {
    let config = DispatchConfig {
        queue_capacity: 1,
        ..dispatch_config()
    };
    let h = Harness::stopped(config);
    let first = h.formed_request(&Actor::user(7)).await;
    let second = h.formed_request(&Actor::user(8)).await;

    let moderator = Actor::moderator(1);
    h.desk
        .resolve(&moderator, first, ResolveAction::Complete)
        .await
        .unwrap();
    let resolved = h
        .desk
        .resolve(&moderator, second, ResolveAction::Complete)
        .await
        .unwrap();
    assert_eq!(resolved.status(), RequestStatus::Completed);

    let stats = h.desk.dispatch_stats();
    assert_eq!(stats.submitted, 1);
    assert_eq!(stats.rejected, 1);
}

#[test_log::test(tokio::test)]
async fn test_worker_pool_respects_concurrency_limit() {
    let config = DispatchConfig {
        max_concurrent_dispatches: 2,
        ..dispatch_config()
    };
    let h = Harness::running(config);
    let triggers: Vec<_> = (0..5)
        .map(|_| h.http.add_response_with_trigger(URL, ok()))
        .collect();

    let moderator = Actor::moderator(1);
    for user in 10..15 {
        let id = h.formed_request(&Actor::user(user)).await;
        h.desk
            .resolve(&moderator, id, ResolveAction::Complete)
            .await
            .unwrap();
    }

    wait_until(|| h.http.in_flight_count() == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.http.call_count(), 2);

    for trigger in triggers {
        let _ = trigger.send(());
    }

    wait_until(|| h.desk.dispatch_stats().sent == 5).await;
    assert_eq!(h.http.call_count(), 5);
    assert_eq!(h.http.peak_in_flight_count(), 2);
}

#[test_log::test(tokio::test)]
async fn test_callback_policy() {
    let h = Harness::stopped(dispatch_config());
    let moderator = Actor::moderator(1);
    let result = |id: RequestId, hours: f64| CalculationResult {
        request_id: id,
        calculated_time: hours,
    };

    let completed = h.formed_request(&Actor::user(7)).await;
    h.desk
        .resolve(&moderator, completed, ResolveAction::Complete)
        .await
        .unwrap();

    // Wrong or missing secret: refused, nothing written
    for secret in [None, Some("guess")] {
        assert_eq!(
            kind(h.callbacks.handle(secret, result(completed, 3.0)).await),
            ErrorKind::Authorization
        );
    }
    assert_eq!(
        kind(
            h.callbacks
                .handle(Some(SECRET), result(completed, -3.0))
                .await
        ),
        ErrorKind::Validation
    );
    let stored = h.storage.get_request(completed).await.unwrap();
    assert_eq!(stored.calculated_recovery_time_hours(), None);

    // Unknown request
    assert_eq!(
        kind(
            h.callbacks
                .handle(Some(SECRET), result(RequestId(999), 3.0))
                .await
        ),
        ErrorKind::NotFound
    );

    // Requests that never had a calculation in flight
    let formed = h.formed_request(&Actor::user(8)).await;
    let rejected = h.formed_request(&Actor::user(9)).await;
    h.desk
        .resolve(&moderator, rejected, ResolveAction::Reject)
        .await
        .unwrap();
    let deleted = h
        .desk
        .add_to_cart(&Actor::user(10), StrategyId(1), 1)
        .await
        .unwrap();
    h.desk.delete(&Actor::user(10), deleted).await.unwrap();

    for id in [formed, rejected, deleted] {
        assert_eq!(
            kind(h.callbacks.handle(Some(SECRET), result(id, 3.0)).await),
            ErrorKind::StateConflict,
            "request {id}"
        );
        let stored = h.storage.get_request(id).await.unwrap();
        assert_eq!(stored.calculated_recovery_time_hours(), None);
    }

    h.callbacks
        .handle(Some(SECRET), result(completed, 3.0))
        .await
        .unwrap();
}

// ============================================================================
// Queries
// ============================================================================

#[test_log::test(tokio::test)]
async fn test_listing_visibility_and_filters() {
    let h = Harness::stopped(dispatch_config());
    let alice = Actor::user(7);
    let bob = Actor::user(8);
    let moderator = Actor::moderator(1);

    let a1 = h.formed_request(&alice).await;
    let a2 = h.formed_request(&alice).await;
    let b1 = h.formed_request(&bob).await;
    h.desk
        .resolve(&moderator, a2, ResolveAction::Complete)
        .await
        .unwrap();
    // Drafts and deleted requests never show up
    h.desk.add_to_cart(&alice, StrategyId(1), 1).await.unwrap();
    let gone = h.desk.add_to_cart(&bob, StrategyId(1), 1).await.unwrap();
    h.desk.delete(&bob, gone).await.unwrap();

    let ids = |requests: Vec<AnyRequest>| requests.iter().map(|r| r.id()).collect::<Vec<_>>();

    let all = h
        .desk
        .list_requests(&moderator, ListQuery::default())
        .await
        .unwrap();
    assert_eq!(ids(all), vec![a1, a2, b1]);

    let own = h
        .desk
        .list_requests(&alice, ListQuery::default())
        .await
        .unwrap();
    assert_eq!(ids(own), vec![a1, a2]);

    let completed = h
        .desk
        .list_requests(
            &moderator,
            ListQuery {
                status: Some("completed".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(ids(completed), vec![a2]);

    let today = chrono::Utc::now().date_naive();
    let tomorrow = today.succ_opt().unwrap();
    let formed_today = h
        .desk
        .list_requests(
            &moderator,
            ListQuery {
                date_from: Some(today.format("%Y-%m-%d").to_string()),
                date_to: Some(today.format("%Y-%m-%d").to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(formed_today.len(), 3);

    let formed_tomorrow = h
        .desk
        .list_requests(
            &moderator,
            ListQuery {
                date_from: Some(tomorrow.format("%Y-%m-%d").to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(formed_tomorrow.is_empty());

    let malformed = ListQuery {
        date_to: Some("yesterday".into()),
        ..Default::default()
    };
    assert_eq!(
        kind(h.desk.list_requests(&moderator, malformed).await),
        ErrorKind::Validation
    );
}

#[test_log::test(tokio::test)]
async fn test_get_request_visibility() {
    let h = Harness::stopped(dispatch_config());
    let owner = Actor::user(7);
    let id = h.formed_request(&owner).await;

    let view = h.desk.get_request(&owner, id).await.unwrap();
    assert_eq!(view.request.status(), RequestStatus::Formed);
    assert_eq!(view.line_items.len(), 2);
    assert_eq!(view.line_items[0].base_recovery_hours, 2.0);

    assert!(h.desk.get_request(&Actor::moderator(1), id).await.is_ok());
    assert_eq!(
        kind(h.desk.get_request(&Actor::user(8), id).await),
        ErrorKind::Authorization
    );
    assert_eq!(
        kind(h.desk.get_request(&owner, RequestId(999)).await),
        ErrorKind::NotFound
    );
}

#[test_log::test(tokio::test)]
async fn test_cart_badge_follows_the_draft() {
    let h = Harness::stopped(dispatch_config());
    let user = Actor::user(7);

    let empty = h.desk.cart_badge(&user).await;
    assert_eq!(empty.request_id, None);
    assert_eq!(empty.count, 0);

    let id = h.desk.add_to_cart(&user, StrategyId(1), 1).await.unwrap();
    h.desk.add_to_cart(&user, StrategyId(2), 1).await.unwrap();
    let badge = h.desk.cart_badge(&user).await;
    assert_eq!(badge.request_id, Some(id));
    assert_eq!(badge.count, 2);

    h.desk.form(&user, id).await.unwrap();
    assert_eq!(h.desk.cart_badge(&user).await.count, 0);
}
