use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use actix_web::{http::StatusCode, test, web, App};
use async_trait::async_trait;
use bandshare_domain::config::RelayConfig;
use bandshare_domain::model::{
    generate_hex_secret, hash_api_secret, ContributorId, HttpMethod, NewContributorToken,
    NewPartner, NewPayout, PartnerId, PaymentDetails, PaymentMethod, PayoutId, PayoutStatus,
    PricingTier, TokenHash,
};
use bandshare_domain::services::{
    metering::{format_amount, meter},
    rail::{PaymentRail, PayoutInstruction, RailError, RailReceipt, RailStatus},
    relay::{RelayError, RelayRequest, RelayResponse, TrafficRelay},
    telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard},
};
use bandshare_domain::storage::{
    EarningsStore, PartnerStore, PayoutStore, SessionStore, SettlementDraft, SettlementStore,
    TokenStore,
};
use bandshare_storage::SeaOrmStorage;
use chrono::Utc;
use serde_json::{json, Value};

use crate::application::{internal_routes, public_routes};
use crate::handlers::{json_config, query_config, API_KEY_HEADER, API_SECRET_HEADER};
use crate::state::AppState;

const TARGET: &str = "https://example.com/data";

/// Relay that answers every exchange with the same JSON document.
struct StubRelay {
    payload: Value,
    calls: AtomicUsize,
}

impl StubRelay {
    fn new(payload: Value) -> Arc<Self> {
        Arc::new(Self {
            payload,
            calls: AtomicUsize::new(0),
        })
    }

    fn response(&self) -> RelayResponse {
        RelayResponse::new(200, self.payload.clone())
    }
}

#[async_trait]
impl TrafficRelay for StubRelay {
    async fn relay(
        &self,
        _contributor: &ContributorId,
        _request: &RelayRequest,
    ) -> Result<RelayResponse, RelayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response())
    }
}

#[derive(Clone, Copy)]
enum RailMode {
    Accept,
    Reject,
    Hang,
    Unconfirmed,
}

struct StubRail {
    mode: RailMode,
    calls: AtomicUsize,
}

impl StubRail {
    fn new(mode: RailMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl PaymentRail for StubRail {
    async fn send(&self, instruction: &PayoutInstruction) -> Result<RailReceipt, RailError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            RailMode::Accept => Ok(RailReceipt {
                transaction_id: format!("TX-{}", instruction.payout_id),
            }),
            RailMode::Reject => Err(RailError::Rejected("receiver unregistered".into())),
            RailMode::Unconfirmed => Err(RailError::Unconfirmed(
                "rail responded with 503 Service Unavailable".into(),
            )),
            RailMode::Hang => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(RailReceipt {
                    transaction_id: "late".into(),
                })
            }
        }
    }

    async fn status(&self, _payout_id: &PayoutId) -> Result<RailStatus, RailError> {
        Ok(RailStatus::Unknown)
    }
}

async fn storage() -> SeaOrmStorage {
    SeaOrmStorage::connect("sqlite::memory:")
        .await
        .expect("storage inits")
}

fn telemetry() -> TelemetryGuard {
    let config = TelemetryConfig::from_env("API_TEST");
    init_telemetry(&config).expect("telemetry inits")
}

fn build_state(
    storage: SeaOrmStorage,
    relay: Arc<StubRelay>,
    rail: Option<Arc<StubRail>>,
) -> AppState {
    AppState::new(
        storage,
        relay,
        rail.map(|rail| rail as Arc<dyn PaymentRail>),
        &RelayConfig::default(),
        Duration::from_millis(200),
        telemetry(),
    )
}

fn default_relay() -> Arc<StubRelay> {
    StubRelay::new(json!({ "ok": true, "items": [1, 2, 3] }))
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state))
                .app_data(json_config())
                .app_data(query_config())
                .configure(internal_routes)
                .configure(public_routes),
        )
        .await
    };
}

struct PartnerKeys {
    id: PartnerId,
    key: String,
    secret: String,
}

async fn seed_partner(storage: &SeaOrmStorage, balance: f64) -> PartnerKeys {
    let id = PartnerId::generate().expect("entropy");
    let key = format!("key-{id}");
    let secret = format!("secret-{id}");
    storage
        .insert_partner(NewPartner {
            id: id.clone(),
            name: "Acme".into(),
            email: "ops@acme.test".into(),
            api_key: key.clone(),
            api_secret_hash: hash_api_secret(&secret),
            pricing_tier: PricingTier::Tier1,
            price_per_gb: PricingTier::Tier1.price_per_gb(),
            balance,
            created_at: Utc::now(),
        })
        .await
        .expect("insert partner");
    PartnerKeys { id, key, secret }
}

async fn issue_token(storage: &SeaOrmStorage, contributor: &ContributorId) -> String {
    let raw = generate_hex_secret(32).expect("entropy");
    storage
        .insert_token(NewContributorToken {
            token_hash: TokenHash::of(&raw),
            contributor_id: contributor.clone(),
            issued_at: Utc::now(),
        })
        .await
        .expect("insert token");
    storage
        .ensure_earnings(contributor, Utc::now())
        .await
        .expect("earnings account");
    raw
}

/// Credits `amount` of earnings through a settled synthetic exchange.
async fn credit(storage: &SeaOrmStorage, contributor: &ContributorId, amount: f64) {
    let funder = seed_partner(storage, 1_000_000.0).await;
    if storage
        .find_active_session(contributor)
        .await
        .expect("session lookup")
        .is_none()
    {
        storage
            .activate_session(contributor, 50.0, Utc::now())
            .await
            .expect("session");
    }
    let mut charge = meter(1024, 1024, PricingTier::Tier1.price_per_gb());
    charge.cost = amount / 0.70;
    charge.contributor_earnings = amount;
    storage
        .apply_settlement(SettlementDraft {
            partner_id: funder.id,
            contributor_id: contributor.clone(),
            target_url: TARGET.into(),
            method: HttpMethod::Get,
            headers: BTreeMap::new(),
            body: None,
            response_status: 200,
            response_size: 1024,
            charge,
            recorded_at: Utc::now(),
        })
        .await
        .expect("storage ok")
        .expect("settled");
}

macro_rules! partner_request {
    ($keys:expr, $body:expr $(,)?) => {
        test::TestRequest::post()
            .uri("/api/partner/request")
            .insert_header((API_KEY_HEADER, $keys.key.as_str()))
            .insert_header((API_SECRET_HEADER, $keys.secret.as_str()))
            .set_json($body)
            .to_request()
    };
}

fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {token}"))
}

macro_rules! start_sharing {
    ($app:expr, $token:expr $(,)?) => {{
        let req = test::TestRequest::post()
            .uri("/api/bandwidth/start")
            .insert_header(bearer($token))
            .set_json(json!({ "bandwidthLimitGB": 10 }))
            .to_request();
        let resp = test::call_service($app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }};
}

macro_rules! payout_request {
    ($app:expr, $token:expr, $body:expr $(,)?) => {{
        let req = test::TestRequest::post()
            .uri("/api/payout/request")
            .insert_header(bearer($token))
            .set_json($body)
            .to_request();
        test::call_service($app, req)
    }};
}

macro_rules! eligibility {
    ($app:expr, $token:expr $(,)?) => {{
        let req = test::TestRequest::get()
            .uri("/api/payout/eligibility")
            .insert_header(bearer($token))
            .to_request();
        let body: Value = test::call_and_read_body_json($app, req).await;
        body["data"].clone()
    }};
}

fn expected_charge(relay: &StubRelay) -> bandshare_domain::services::metering::UsageCharge {
    let request = RelayRequest::new(TARGET, HttpMethod::Get);
    meter(
        request.wire_size(),
        relay.response().wire_size(),
        PricingTier::Tier1.price_per_gb(),
    )
}

#[actix_web::test]
async fn partner_request_relays_and_settles_the_exchange() {
    let storage = storage().await;
    let relay = default_relay();
    let keys = seed_partner(&storage, 10.0).await;
    let contributor = ContributorId::from("contributor-a");
    let token = issue_token(&storage, &contributor).await;
    let app = app!(build_state(storage.clone(), relay.clone(), None));
    start_sharing!(&app, &token);

    let req = test::TestRequest::post()
        .uri("/api/partner/request")
        .insert_header((API_KEY_HEADER, keys.key.as_str()))
        .insert_header((API_SECRET_HEADER, keys.secret.as_str()))
        .set_json(json!({ "targetUrl": TARGET }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;

    let charge = expected_charge(&relay);
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], 200);
    assert_eq!(body["data"], json!({ "ok": true, "items": [1, 2, 3] }));
    assert_eq!(body["metadata"]["dataUsedMB"], format_amount(charge.billed_volume_mb));
    assert_eq!(body["metadata"]["cost"], format_amount(charge.cost));
    assert_eq!(
        body["metadata"]["userEarnings"],
        format_amount(charge.contributor_earnings)
    );

    let partner = storage.find_partner(&keys.id).await.unwrap().unwrap();
    assert!((partner.balance - (10.0 - charge.cost)).abs() < 1e-12);
    assert!((partner.total_spent - charge.cost).abs() < 1e-12);
    let earnings = storage.find_earnings(&contributor).await.unwrap().unwrap();
    assert!((earnings.total_earned - charge.contributor_earnings).abs() < 1e-12);
    assert!((earnings.today_earned - charge.contributor_earnings).abs() < 1e-12);
    assert_eq!(relay.calls.load(Ordering::SeqCst), 1);

    let req = test::TestRequest::get()
        .uri("/api/partner/stats")
        .insert_header((API_KEY_HEADER, keys.key.as_str()))
        .insert_header((API_SECRET_HEADER, keys.secret.as_str()))
        .to_request();
    let stats: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(stats["data"]["usage"]["totalRequests"], 1);
    assert_eq!(stats["data"]["partner"]["pricingTier"], "Basic");
}

#[actix_web::test]
async fn missing_or_wrong_credentials_are_unauthorized() {
    let storage = storage().await;
    let keys = seed_partner(&storage, 10.0).await;
    let app = app!(build_state(storage, default_relay(), None));

    let req = test::TestRequest::post()
        .uri("/api/partner/request")
        .set_json(json!({ "targetUrl": TARGET }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({ "success": false, "error": "API key and secret required" }));

    let wrong = PartnerKeys {
        id: keys.id.clone(),
        key: keys.key.clone(),
        secret: "not-the-secret".into(),
    };
    let resp = test::call_service(&app, partner_request!(wrong, json!({ "targetUrl": TARGET })))
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Invalid API credentials");
}

#[actix_web::test]
async fn missing_target_url_is_a_validation_error() {
    let storage = storage().await;
    let keys = seed_partner(&storage, 10.0).await;
    let relay = default_relay();
    let app = app!(build_state(storage, relay.clone(), None));

    let resp = test::call_service(&app, partner_request!(keys, json!({ "method": "GET" }))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "targetUrl is required");
    assert_eq!(relay.calls.load(Ordering::SeqCst), 0);
}

#[actix_web::test]
async fn no_sharing_contributor_means_service_unavailable_and_no_mutation() {
    let storage = storage().await;
    let keys = seed_partner(&storage, 10.0).await;
    let relay = default_relay();
    let app = app!(build_state(storage.clone(), relay.clone(), None));

    let resp =
        test::call_service(&app, partner_request!(keys, json!({ "targetUrl": TARGET }))).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "No users available for routing");

    let partner = storage.find_partner(&keys.id).await.unwrap().unwrap();
    assert_eq!(partner.balance, 10.0);
    assert_eq!(partner.total_spent, 0.0);
    assert_eq!(relay.calls.load(Ordering::SeqCst), 0);
}

#[actix_web::test]
async fn balance_too_low_for_the_exchange_is_rejected_without_charge() {
    let storage = storage().await;
    let relay = default_relay();
    let charge = expected_charge(&relay);
    let balance = charge.cost / 2.0;
    let keys = seed_partner(&storage, balance).await;
    let contributor = ContributorId::from("contributor-b");
    let token = issue_token(&storage, &contributor).await;
    let app = app!(build_state(storage.clone(), relay.clone(), None));
    start_sharing!(&app, &token);

    let resp =
        test::call_service(&app, partner_request!(keys, json!({ "targetUrl": TARGET }))).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Partner has insufficient balance for this request");

    let partner = storage.find_partner(&keys.id).await.unwrap().unwrap();
    assert_eq!(partner.balance, balance);
    let earnings = storage.find_earnings(&contributor).await.unwrap().unwrap();
    assert_eq!(earnings.total_earned, 0.0);
}

#[actix_web::test]
async fn exhausted_balance_is_rejected_before_relaying() {
    let storage = storage().await;
    let relay = default_relay();
    let keys = seed_partner(&storage, 0.0).await;
    let token = issue_token(&storage, &ContributorId::from("contributor-c")).await;
    let app = app!(build_state(storage, relay.clone(), None));
    start_sharing!(&app, &token);

    let resp =
        test::call_service(&app, partner_request!(keys, json!({ "targetUrl": TARGET }))).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Partner has insufficient balance");
    assert_eq!(relay.calls.load(Ordering::SeqCst), 0);
}

#[actix_web::test]
async fn concurrent_requests_keep_the_balance_invariant() {
    let storage = storage().await;
    let relay = default_relay();
    let charge = expected_charge(&relay);
    let keys = seed_partner(&storage, 10.0).await;
    let token = issue_token(&storage, &ContributorId::from("contributor-d")).await;
    let app = app!(build_state(storage.clone(), relay.clone(), None));
    start_sharing!(&app, &token);

    let body = json!({ "targetUrl": TARGET });
    let (a, b, c) = tokio::join!(
        test::call_service(&app, partner_request!(keys, body.clone())),
        test::call_service(&app, partner_request!(keys, body.clone())),
        test::call_service(&app, partner_request!(keys, body.clone())),
    );
    for resp in [a, b, c] {
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let partner = storage.find_partner(&keys.id).await.unwrap().unwrap();
    assert!((partner.balance + partner.total_spent - 10.0).abs() < 1e-9);
    assert!((partner.total_spent - 3.0 * charge.cost).abs() < 1e-12);
}

#[actix_web::test]
async fn contended_balance_settles_only_what_it_covers() {
    let storage = storage().await;
    let relay = default_relay();
    let charge = expected_charge(&relay);
    let balance = charge.cost * 1.5;
    let keys = seed_partner(&storage, balance).await;
    let contributor = ContributorId::from("contributor-d2");
    let token = issue_token(&storage, &contributor).await;
    let app = app!(build_state(storage.clone(), relay.clone(), None));
    start_sharing!(&app, &token);

    let body = json!({ "targetUrl": TARGET });
    let (a, b, c) = tokio::join!(
        test::call_service(&app, partner_request!(keys, body.clone())),
        test::call_service(&app, partner_request!(keys, body.clone())),
        test::call_service(&app, partner_request!(keys, body.clone())),
    );
    let mut settled = 0;
    for resp in [a, b, c] {
        if resp.status() == StatusCode::OK {
            settled += 1;
            continue;
        }
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("Partner has insufficient balance"));
    }
    assert_eq!(settled, 1);

    let partner = storage.find_partner(&keys.id).await.unwrap().unwrap();
    assert!(partner.balance >= 0.0);
    assert!((partner.balance - (balance - charge.cost)).abs() < 1e-15);
    assert!((partner.total_spent - charge.cost).abs() < 1e-15);
    let earnings = storage.find_earnings(&contributor).await.unwrap().unwrap();
    assert!((earnings.total_earned - charge.contributor_earnings).abs() < 1e-15);
}

#[actix_web::test]
async fn eligibility_nets_out_in_flight_payouts() {
    let storage = storage().await;
    let contributor = ContributorId::from("contributor-e");
    let token = issue_token(&storage, &contributor).await;
    credit(&storage, &contributor, 12.0).await;
    storage
        .reserve_payout(NewPayout {
            id: PayoutId::from("held"),
            contributor_id: contributor.clone(),
            amount: 8.0,
            credits: 8000.0,
            status: PayoutStatus::Processing,
            payment_method: PaymentMethod::Paypal,
            payment_details: PaymentDetails {
                paypal_email: Some("me@example.com".into()),
                ..PaymentDetails::default()
            },
            created_at: Utc::now(),
        })
        .await
        .expect("reserve");
    let app = app!(build_state(storage, default_relay(), None));

    let data = eligibility!(&app, &token);
    assert_eq!(data["eligible"], false);
    assert!((data["available"].as_f64().unwrap() - 4.0).abs() < 1e-9);
    assert_eq!(data["minimum"], 5.0);
    assert_eq!(data["message"], "Need $1.00 more to reach minimum");
}

#[actix_web::test]
async fn payouts_below_the_minimum_are_rejected() {
    let storage = storage().await;
    let contributor = ContributorId::from("contributor-f");
    let token = issue_token(&storage, &contributor).await;
    credit(&storage, &contributor, 10.0).await;
    let rail = StubRail::new(RailMode::Accept);
    let app = app!(build_state(storage.clone(), default_relay(), Some(rail.clone())));

    let resp = payout_request!(
        &app,
        &token,
        json!({
            "amount": 3.0,
            "paymentMethod": "paypal",
            "paymentDetails": { "paypalEmail": "me@example.com" }
        }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Minimum payout is $5.00");
    assert_eq!(rail.calls.load(Ordering::SeqCst), 0);
    assert!(storage.list_payouts(&contributor, 10).await.unwrap().is_empty());
}

#[actix_web::test]
async fn paypal_payout_completes_and_debits_earnings() {
    let storage = storage().await;
    let contributor = ContributorId::from("contributor-g");
    let token = issue_token(&storage, &contributor).await;
    credit(&storage, &contributor, 10.0).await;
    let rail = StubRail::new(RailMode::Accept);
    let app = app!(build_state(storage.clone(), default_relay(), Some(rail.clone())));

    let resp = payout_request!(
        &app,
        &token,
        json!({
            "amount": 6.0,
            "paymentMethod": "paypal",
            "paymentDetails": { "paypalEmail": "me@example.com" }
        }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    let payout_id = body["data"]["payoutId"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["status"], "completed");
    assert_eq!(body["data"]["credits"], 6000.0);
    assert_eq!(body["data"]["transactionId"], format!("TX-{payout_id}"));

    let earnings = storage.find_earnings(&contributor).await.unwrap().unwrap();
    assert!((earnings.total_earned - 4.0).abs() < 1e-9);

    let req = test::TestRequest::get()
        .uri("/api/payout/history?limit=5")
        .insert_header(bearer(&token))
        .to_request();
    let history: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(history["data"].as_array().unwrap().len(), 1);
    assert_eq!(history["data"][0]["id"], payout_id);
    assert_eq!(history["data"][0]["paymentMethod"], "paypal");
}

#[actix_web::test]
async fn rejected_paypal_payout_fails_and_releases_the_hold() {
    let storage = storage().await;
    let contributor = ContributorId::from("contributor-h");
    let token = issue_token(&storage, &contributor).await;
    credit(&storage, &contributor, 10.0).await;
    let app = app!(build_state(
        storage.clone(),
        default_relay(),
        Some(StubRail::new(RailMode::Reject))
    ));

    let resp = payout_request!(
        &app,
        &token,
        json!({
            "amount": 6.0,
            "paymentMethod": "paypal",
            "paymentDetails": { "paypalEmail": "me@example.com" }
        }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = test::read_body_json(resp).await;
    let message = body["error"].as_str().unwrap();
    assert!(message.starts_with("payout "));
    assert!(message.ends_with("failed: payout rejected: receiver unregistered"));

    let payouts = storage.list_payouts(&contributor, 10).await.unwrap();
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].status, PayoutStatus::Failed);
    assert!(message.contains(payouts[0].id.as_str()));

    let earnings = storage.find_earnings(&contributor).await.unwrap().unwrap();
    assert!((earnings.total_earned - 10.0).abs() < 1e-9);
    let data = eligibility!(&app, &token);
    assert!((data["available"].as_f64().unwrap() - 10.0).abs() < 1e-9);
}

#[actix_web::test]
async fn rail_timeout_leaves_the_payout_processing() {
    let storage = storage().await;
    let contributor = ContributorId::from("contributor-i");
    let token = issue_token(&storage, &contributor).await;
    credit(&storage, &contributor, 10.0).await;
    let app = app!(build_state(
        storage.clone(),
        default_relay(),
        Some(StubRail::new(RailMode::Hang))
    ));

    let resp = payout_request!(
        &app,
        &token,
        json!({
            "amount": 7.0,
            "paymentMethod": "paypal",
            "paymentDetails": { "paypalEmail": "me@example.com" }
        }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["status"], "processing");

    let earnings = storage.find_earnings(&contributor).await.unwrap().unwrap();
    assert!((earnings.total_earned - 10.0).abs() < 1e-9);
    let data = eligibility!(&app, &token);
    assert!((data["available"].as_f64().unwrap() - 3.0).abs() < 1e-9);
}

#[actix_web::test]
async fn unconfirmed_rail_outcome_keeps_the_hold() {
    let storage = storage().await;
    let contributor = ContributorId::from("contributor-i2");
    let token = issue_token(&storage, &contributor).await;
    credit(&storage, &contributor, 10.0).await;
    let app = app!(build_state(
        storage.clone(),
        default_relay(),
        Some(StubRail::new(RailMode::Unconfirmed))
    ));

    let resp = payout_request!(
        &app,
        &token,
        json!({
            "amount": 7.0,
            "paymentMethod": "paypal",
            "paymentDetails": { "paypalEmail": "me@example.com" }
        }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["status"], "processing");

    let payouts = storage.list_payouts(&contributor, 10).await.unwrap();
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].status, PayoutStatus::Processing);
    let earnings = storage.find_earnings(&contributor).await.unwrap().unwrap();
    assert!((earnings.total_earned - 10.0).abs() < 1e-9);

    let data = eligibility!(&app, &token);
    assert!((data["available"].as_f64().unwrap() - 3.0).abs() < 1e-9);
    let resp = payout_request!(
        &app,
        &token,
        json!({
            "amount": 7.0,
            "paymentMethod": "paypal",
            "paymentDetails": { "paypalEmail": "me@example.com" }
        }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn concurrent_payouts_cannot_double_spend() {
    let storage = storage().await;
    let contributor = ContributorId::from("contributor-j");
    let token = issue_token(&storage, &contributor).await;
    credit(&storage, &contributor, 10.0).await;
    let app = app!(build_state(storage.clone(), default_relay(), None));

    let body = json!({
        "amount": 8.0,
        "paymentMethod": "crypto",
        "paymentDetails": { "cryptoWallet": "bc1qexample" }
    });
    let (first, second) = tokio::join!(
        payout_request!(&app, &token, body.clone()),
        payout_request!(&app, &token, body.clone()),
    );
    let mut statuses = [first.status(), second.status()];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::BAD_REQUEST]);

    let payouts = storage.list_payouts(&contributor, 10).await.unwrap();
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].status, PayoutStatus::Pending);
}

#[actix_web::test]
async fn sharing_lifecycle_and_earnings_views() {
    let storage = storage().await;
    let contributor = ContributorId::from("contributor-k");
    let token = issue_token(&storage, &contributor).await;
    let app = app!(build_state(storage.clone(), default_relay(), None));

    let req = test::TestRequest::post()
        .uri("/api/bandwidth/start")
        .insert_header(bearer(&token))
        .to_request();
    let started: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(started["data"]["bandwidthLimitGB"], 50.0);
    assert!(storage.find_active_session(&contributor).await.unwrap().is_some());

    let req = test::TestRequest::get()
        .uri("/api/bandwidth/data-shared")
        .insert_header(bearer(&token))
        .to_request();
    let shared: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(shared["data"]["dataSharedMB"], 0.0);

    let req = test::TestRequest::post()
        .uri("/api/bandwidth/stop")
        .insert_header(bearer(&token))
        .to_request();
    let stopped: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(stopped["data"]["sessionsClosed"], 1);
    assert!(storage.find_active_session(&contributor).await.unwrap().is_none());

    let req = test::TestRequest::post()
        .uri("/api/bandwidth/start")
        .insert_header(bearer(&token))
        .set_json(json!({ "bandwidthLimitGB": -1 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::get()
        .uri("/api/earnings")
        .insert_header(bearer(&token))
        .to_request();
    let earnings: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(earnings["data"], json!({ "today": 0.0, "total": 0.0 }));
}

#[actix_web::test]
async fn revoked_tokens_stop_authenticating() {
    let storage = storage().await;
    let contributor = ContributorId::from("contributor-l");
    let token = issue_token(&storage, &contributor).await;
    let app = app!(build_state(storage, default_relay(), None));

    let req = test::TestRequest::post()
        .uri(&format!("/api/tokens/{token}/revoke"))
        .set_json(json!({ "reason": "device lost" }))
        .to_request();
    let revoked: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(revoked["data"]["status"], "revoked");
    assert_eq!(revoked["data"]["contributorId"], "contributor-l");
    assert_eq!(revoked["data"]["revokeReason"], "device lost");

    let req = test::TestRequest::get()
        .uri("/api/earnings")
        .insert_header(bearer(&token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Invalid or revoked token");

    let req = test::TestRequest::post()
        .uri("/api/tokens/unknown-token/revoke")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn health_and_metrics_respond() {
    let app = app!(build_state(storage().await, default_relay(), None));

    let req = test::TestRequest::get().uri("/api/health").to_request();
    let health: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(health["data"]["status"], "ok");

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_web::test]
async fn malformed_json_uses_the_error_envelope() {
    let storage = storage().await;
    let keys = seed_partner(&storage, 10.0).await;
    let app = app!(build_state(storage, default_relay(), None));

    let req = test::TestRequest::post()
        .uri("/api/partner/request")
        .insert_header((API_KEY_HEADER, keys.key.as_str()))
        .insert_header((API_SECRET_HEADER, keys.secret.as_str()))
        .insert_header(("content-type", "application/json"))
        .set_payload("{not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
}

#[actix_web::test]
async fn credentials_are_checked_before_the_body() {
    let storage = storage().await;
    let app = app!(build_state(storage, default_relay(), None));

    let req = test::TestRequest::post()
        .uri("/api/partner/request")
        .insert_header((API_KEY_HEADER, "unknown"))
        .insert_header((API_SECRET_HEADER, "wrong"))
        .insert_header(("content-type", "application/json"))
        .set_payload("{not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Invalid API credentials");

    let req = test::TestRequest::post()
        .uri("/api/payout/request")
        .insert_header(("content-type", "application/json"))
        .set_payload("{not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Authorization token required");
}
