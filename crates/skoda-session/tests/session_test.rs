// Session behaviour against a mocked vendor backend: 401 re-authentication,
// home-region caching, throttle gating and token refresh.

use std::time::{Duration, Instant};

use common::Secret;
use skoda_auth::{ClientProfile, Credentials, SessionTokens, TokenIssuer};
use skoda_http::Executor;
use skoda_session::{
    Endpoints, Error, RefreshOutcome, STATUS_UPDATE_INTERVAL, Session, Templater, refresh_cycle,
};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const VIN: &str = "TMBJJ7NE8L0000001";
const OTHER_VIN: &str = "TMBJJ7NE8L0000002";

fn session(server: &MockServer) -> Session {
    let profile = ClientProfile {
        openid_config_url: format!("{}/.well-known/openid-configuration", server.uri()),
        token_exchange_url: format!("{}/exchangeAuthCode", server.uri()),
        token_refresh_url: format!("{}/refreshTokens", server.uri()),
        vw_token_url: format!("{}/mbbcoauth/token", server.uri()),
        ..ClientProfile::default()
    };
    Session::new(
        Executor::new().unwrap(),
        profile,
        Credentials {
            email: "user@example.com".into(),
            password: Secret::new("hunter2".into()),
        },
        Endpoints {
            msg_base: server.uri(),
            mal_base: server.uri(),
        },
        Templater::new([("type", "skoda"), ("country", "CZ")]),
    )
}

fn stale_tokens() -> SessionTokens {
    issued_by(TokenIssuer::Vehicle)
}

fn issued_by(issuer: TokenIssuer) -> SessionTokens {
    SessionTokens {
        access_token: Secret::new("at_stale".into()),
        refresh_token: Secret::new("rt_stale".into()),
        obtained_at: Instant::now(),
        lifetime: Some(Duration::from_secs(100)),
        issuer,
    }
}

/// Mount a complete, successful login handshake issuing `vw_at`.
/// `expected_logins` is verified when the server drops.
async fn mount_login(server: &MockServer, expected_logins: u64) {
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "issuer": server.uri(),
            "authorization_endpoint": format!("{}/oidc/v1/authorize", server.uri()),
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/oidc/v1/authorize"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<form id="emailPasswordForm" action="/login/identifier">
               <input type="hidden" name="_csrf" value="c1"></form>"#,
        ))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/login/identifier"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<form id="credentialsForm" action="/login/authenticate">
               <input type="hidden" name="_csrf" value="c2"></form>"#,
        ))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/login/authenticate"))
        .respond_with(ResponseTemplate::new(302).insert_header(
            "location",
            "skodaconnect://oidc.login/#code=CODE&id_token=IDT",
        ))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/exchangeAuthCode"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "brand_at",
            "refresh_token": "brand_rt",
        })))
        .expect(expected_logins)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/mbbcoauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "vw_at",
            "refresh_token": "vw_rt",
            "expires_in": 3600,
        })))
        .mount(server)
        .await;
}

async fn mount_home_region(server: &MockServer, expected: u64) {
    mount_home_region_for(server, VIN, expected).await;
}

async fn mount_home_region_for(server: &MockServer, vin: &str, expected: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/api/cs/vds/v1/vehicles/{vin}/homeRegion")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "homeRegion": {"baseUri": {"content": format!("{}/api", server.uri())}}
        })))
        .expect(expected)
        .mount(server)
        .await;
}

fn status_path() -> String {
    format!("/fs-car/bs/vsr/v1/skoda/CZ/vehicles/{VIN}/status")
}

fn requests_path(vin: &str) -> String {
    format!("/fs-car/bs/vsr/v1/skoda/CZ/vehicles/{vin}/requests")
}

#[tokio::test]
async fn ensure_authenticated_runs_handshake_once() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;

    let session = session(&server);
    session.ensure_authenticated().await.unwrap();
    session.ensure_authenticated().await.unwrap();
    assert_eq!(session.access_token().await.unwrap(), "vw_at");
}

#[tokio::test]
async fn stale_token_triggers_one_reauth_and_one_retry() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    mount_home_region(&server, 1).await;

    Mock::given(method("GET"))
        .and(path(status_path()))
        .and(header("authorization", "Bearer at_stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(status_path()))
        .and(header("authorization", "Bearer vw_at"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "StoredVehicleDataResponse": {"vehicleData": {"data": []}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = session(&server);
    session.replace_tokens(stale_tokens()).await;

    let doc = session
        .with_reauth(VIN, || session.vehicle_status(VIN))
        .await
        .unwrap();
    assert!(doc.pointer("/StoredVehicleDataResponse/vehicleData").is_some());
    assert_eq!(session.access_token().await.unwrap(), "vw_at");
}

#[tokio::test]
async fn second_401_does_not_loop() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    mount_home_region(&server, 1).await;

    Mock::given(method("GET"))
        .and(path(status_path()))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let session = session(&server);
    session.replace_tokens(stale_tokens()).await;

    let err = session
        .with_reauth(VIN, || session.vehicle_status(VIN))
        .await
        .unwrap_err();
    match err {
        Error::Unauthorized { vin } => assert_eq!(vin, VIN),
        other => panic!("expected Unauthorized, got {other:?}"),
    }
}

#[tokio::test]
async fn home_region_is_cached() {
    let server = MockServer::start().await;
    mount_home_region(&server, 1).await;

    let session = session(&server);
    session.replace_tokens(stale_tokens()).await;

    let first = session.home_region(VIN).await.unwrap();
    let second = session.home_region(VIN).await.unwrap();
    assert_eq!(first, server.uri());
    assert_eq!(first, second);
}

#[tokio::test]
async fn list_vehicles_reads_vins() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fs-car/usermanagement/users/v1/skoda/CZ/vehicles"))
        .and(header("x-app-name", "cz.skodaauto.connect"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "userVehicles": {"vehicle": [VIN, "TMB2"]}
        })))
        .mount(&server)
        .await;

    let session = session(&server);
    session.replace_tokens(stale_tokens()).await;
    assert_eq!(session.list_vehicles().await.unwrap(), vec![VIN, "TMB2"]);
}

#[tokio::test]
async fn status_update_window_is_per_vehicle() {
    let server = MockServer::start().await;
    mount_home_region_for(&server, VIN, 1).await;
    mount_home_region_for(&server, OTHER_VIN, 1).await;

    Mock::given(method("POST"))
        .and(path(requests_path(VIN)))
        .respond_with(ResponseTemplate::new(202))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(requests_path(OTHER_VIN)))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let session = session(&server);
    session.replace_tokens(stale_tokens()).await;
    let now = Instant::now();

    assert!(session.request_status_update_at(VIN, now).await.unwrap());
    // A sent wake-up does not hold back other traffic.
    assert!(!session.executor().throttle().is_active());

    let soon = now + Duration::from_secs(60);
    assert!(!session.request_status_update_at(VIN, soon).await.unwrap());
    assert!(session.request_status_update_at(OTHER_VIN, soon).await.unwrap());

    let later = now + STATUS_UPDATE_INTERVAL;
    assert!(session.request_status_update_at(VIN, later).await.unwrap());
}

#[tokio::test]
async fn status_update_suppressed_while_throttled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(requests_path(VIN)))
        .respond_with(ResponseTemplate::new(202))
        .expect(0)
        .mount(&server)
        .await;

    let session = session(&server);
    session.replace_tokens(stale_tokens()).await;
    session.executor().throttle().engage();

    assert!(!session.request_status_update(VIN).await.unwrap());
}

#[tokio::test]
async fn throttled_status_update_engages_window() {
    let server = MockServer::start().await;
    mount_home_region(&server, 1).await;

    Mock::given(method("POST"))
        .and(path(requests_path(VIN)))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&server)
        .await;

    let session = session(&server);
    session.replace_tokens(stale_tokens()).await;

    assert!(!session.request_status_update(VIN).await.unwrap());
    assert!(session.executor().throttle().is_active());
}

#[tokio::test]
async fn vehicle_tokens_refresh_where_they_were_issued() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mbbcoauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt_stale"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at_refreshed",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/refreshTokens"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let session = session(&server);
    session.replace_tokens(issued_by(TokenIssuer::Vehicle)).await;

    let due = Instant::now() + Duration::from_secs(95);
    assert_eq!(refresh_cycle(&session, due).await, RefreshOutcome::Refreshed);

    let tokens = session.tokens().await.unwrap();
    assert_eq!(tokens.access_token.expose(), "at_refreshed");
    // Endpoint sent no new refresh token; the old one is kept.
    assert_eq!(tokens.refresh_token.expose(), "rt_stale");
    assert_eq!(tokens.issuer, TokenIssuer::Vehicle);
}

#[tokio::test]
async fn brand_tokens_refresh_at_brand_service() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/refreshTokens"))
        .and(body_string_contains("refresh_token=rt_stale"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "brand_at_2",
            "refresh_token": "brand_rt_2",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mbbcoauth/token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let session = session(&server);
    session.replace_tokens(issued_by(TokenIssuer::Brand)).await;

    let due = Instant::now() + Duration::from_secs(95);
    assert_eq!(refresh_cycle(&session, due).await, RefreshOutcome::Refreshed);

    let tokens = session.tokens().await.unwrap();
    assert_eq!(tokens.access_token.expose(), "brand_at_2");
    assert_eq!(tokens.refresh_token.expose(), "brand_rt_2");
    assert_eq!(tokens.issuer, TokenIssuer::Brand);
}

#[tokio::test]
async fn rejected_refresh_clears_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mbbcoauth/token"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let session = session(&server);
    session.replace_tokens(stale_tokens()).await;

    let due = Instant::now() + Duration::from_secs(95);
    assert_eq!(refresh_cycle(&session, due).await, RefreshOutcome::Rejected);
    assert!(!session.is_authenticated().await);
}
