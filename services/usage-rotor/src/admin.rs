//! Admin API
//!
//! Local HTTP surface for inspecting and steering rotation. Bind it to
//! loopback or protect it with a bearer token; when a token is configured
//! every route except `/health` requires `Authorization: Bearer <token>`.
//!
//! Endpoints:
//! - GET    /health: liveness plus last cycle summary
//! - GET    /metrics: Prometheus text exposition
//! - GET    /profiles: profiles with usage and capacity
//! - POST   /profiles: create a profile
//! - DELETE /profiles/{id}: remove a profile
//! - PUT    /profiles/{id}/usage: push a usage snapshot
//! - PUT    /profiles/{id}/auto-rotate: toggle rotation eligibility
//! - POST   /profiles/{id}/activate: manual activation
//! - GET    /rotation: dry-run evaluation
//! - POST   /refresh: run one refresh cycle now

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{Path, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use claude_profiles::{AccountTier, Profile, ProfileId, SessionCredentials, now_millis};
use common::Secret;
use metrics_exporter_prometheus::PrometheusHandle;
use profile_rotation::{Rotor, UsageReport};
use serde::Deserialize;
use tracing::{info, warn};

use crate::view;

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    rotor: Arc<Rotor>,
    prometheus: PrometheusHandle,
    token: Option<Arc<Secret<String>>>,
    started_at: Instant,
}

impl AdminState {
    pub fn new(rotor: Arc<Rotor>, prometheus: PrometheusHandle, token: Option<Secret<String>>) -> Self {
        Self {
            rotor,
            prometheus,
            token: token.map(Arc::new),
            started_at: Instant::now(),
        }
    }
}

/// Build the admin router. `max_connections` bounds concurrent requests.
pub fn build_router(state: AdminState, max_connections: usize) -> Router {
    let protected = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/profiles", get(list_profiles).post(create_profile))
        .route("/profiles/{id}", delete(delete_profile))
        .route("/profiles/{id}/usage", put(push_usage))
        .route("/profiles/{id}/auto-rotate", put(set_auto_rotate))
        .route("/profiles/{id}/activate", post(activate_profile))
        .route("/rotation", get(rotation_status))
        .route("/refresh", post(refresh_now))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/health", get(health_handler))
        .merge(protected)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn error_response(status: StatusCode, message: impl std::fmt::Display) -> Response {
    json_response(status, serde_json::json!({ "error": message.to_string() }))
}

fn store_error_response(err: &claude_profiles::Error) -> Response {
    match err {
        claude_profiles::Error::NotFound(id) => {
            error_response(StatusCode::NOT_FOUND, format!("unknown profile: {id}"))
        }
        claude_profiles::Error::MissingCredentials(id) => error_response(
            StatusCode::CONFLICT,
            format!("profile has no session credentials: {id}"),
        ),
        other => error_response(StatusCode::INTERNAL_SERVER_ERROR, other),
    }
}

/// Bearer token gate. A no-op when no token is configured.
async fn require_token(State(state): State<AdminState>, request: Request, next: Next) -> Response {
    let Some(token) = state.token.as_ref() else {
        return next.run(request).await;
    };

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|candidate| token.matches(candidate));

    if !authorized {
        warn!(path = %request.uri().path(), "admin request rejected: bad or missing token");
        return error_response(StatusCode::UNAUTHORIZED, "missing or invalid bearer token");
    }
    next.run(request).await
}

/// GET /health: always 200 while the process serves requests.
async fn health_handler(State(state): State<AdminState>) -> Response {
    let document = state.rotor.store().snapshot().await;
    let last_cycle = state.rotor.last_cycle().await;

    json_response(
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "profiles": document.profiles.len(),
            "active": document.active,
            "rotation_enabled": state.rotor.rotation_enabled(),
            "uptime_seconds": state.started_at.elapsed().as_secs(),
            "last_cycle": last_cycle.as_ref().map(view::cycle_json),
        }),
    )
}

/// GET /metrics: Prometheus text exposition format.
async fn metrics_handler(State(state): State<AdminState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.prometheus.render(),
    )
}

/// GET /profiles: never exposes session keys.
async fn list_profiles(State(state): State<AdminState>) -> Response {
    let document = state.rotor.store().snapshot().await;
    let point = state.rotor.weekly_exhaustion_point().await;
    json_response(StatusCode::OK, view::profiles_json(&document, point))
}

#[derive(Deserialize)]
struct CreateProfileRequest {
    name: String,
    session_key: String,
    #[serde(default)]
    organization_id: Option<String>,
    #[serde(default)]
    account_tier: Option<AccountTier>,
    #[serde(default)]
    auto_rotate_enabled: bool,
    #[serde(default)]
    auto_start_enabled: bool,
}

/// POST /profiles: create a profile under a generated id.
async fn create_profile(
    State(state): State<AdminState>,
    axum::Json(body): axum::Json<CreateProfileRequest>,
) -> Response {
    if body.name.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "name must not be empty");
    }
    if body.session_key.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "session_key must not be empty");
    }

    let id = ProfileId::new(format!("profile-{}", uuid::Uuid::new_v4().as_simple()));
    let mut credentials = SessionCredentials::new(body.session_key.trim());
    credentials.organization_id = body.organization_id;

    let mut profile = Profile::new(id.clone(), body.name.trim())
        .with_credentials(credentials)
        .with_auto_rotate(body.auto_rotate_enabled)
        .with_auto_start(body.auto_start_enabled);
    profile.account_tier = body.account_tier;

    if let Err(e) = state.rotor.store().upsert(profile.clone()).await {
        return store_error_response(&e);
    }
    info!(profile_id = %id, "profile created");

    let active = state.rotor.store().active_id().await;
    let point = state.rotor.weekly_exhaustion_point().await;
    json_response(
        StatusCode::CREATED,
        view::profile_json(&profile, active.as_ref(), point),
    )
}

/// DELETE /profiles/{id}
async fn delete_profile(State(state): State<AdminState>, Path(id): Path<String>) -> Response {
    let id = ProfileId::from(id);
    match state.rotor.store().remove(&id).await {
        Ok(Some(_)) => {
            info!(profile_id = %id, "profile removed");
            json_response(
                StatusCode::OK,
                serde_json::json!({ "id": id, "status": "removed" }),
            )
        }
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("unknown profile: {id}")),
        Err(e) => store_error_response(&e),
    }
}

/// PUT /profiles/{id}/usage: accepts the same report the usage adapter serves.
async fn push_usage(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    axum::Json(report): axum::Json<UsageReport>,
) -> Response {
    let id = ProfileId::from(id);
    let snapshot = match report.into_snapshot(now_millis()) {
        Ok(snapshot) => snapshot,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    if let Err(e) = state.rotor.store().update_usage(&id, Some(snapshot)).await {
        return store_error_response(&e);
    }
    crate::metrics::record_usage_push();

    let Some(profile) = state.rotor.store().get(&id).await else {
        return error_response(StatusCode::NOT_FOUND, format!("unknown profile: {id}"));
    };
    let active = state.rotor.store().active_id().await;
    let point = state.rotor.weekly_exhaustion_point().await;
    json_response(StatusCode::OK, view::profile_json(&profile, active.as_ref(), point))
}

#[derive(Deserialize)]
struct AutoRotateRequest {
    enabled: bool,
}

/// PUT /profiles/{id}/auto-rotate
async fn set_auto_rotate(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    axum::Json(body): axum::Json<AutoRotateRequest>,
) -> Response {
    let id = ProfileId::from(id);
    match state.rotor.store().set_auto_rotate(&id, body.enabled).await {
        Ok(()) => {
            info!(profile_id = %id, enabled = body.enabled, "auto-rotate updated");
            json_response(
                StatusCode::OK,
                serde_json::json!({ "id": id, "auto_rotate_enabled": body.enabled }),
            )
        }
        Err(e) => store_error_response(&e),
    }
}

/// POST /profiles/{id}/activate: does not start the rotation cooldown.
async fn activate_profile(State(state): State<AdminState>, Path(id): Path<String>) -> Response {
    let id = ProfileId::from(id);
    match state.rotor.activate(&id).await {
        Ok(()) => json_response(
            StatusCode::OK,
            serde_json::json!({ "id": id, "status": "active" }),
        ),
        Err(profile_rotation::Error::Store(e)) => store_error_response(&e),
        Err(e) => {
            warn!(profile_id = %id, error = %e, "manual activation failed");
            error_response(StatusCode::BAD_GATEWAY, e)
        }
    }
}

/// GET /rotation: what a refresh would decide right now, without side effects.
async fn rotation_status(State(state): State<AdminState>) -> Response {
    let decision = state.rotor.evaluate_now().await;
    let mut body = decision.to_json();
    body["enabled"] = serde_json::json!(state.rotor.rotation_enabled());
    body["cooldown_remaining_secs"] =
        serde_json::json!(state.rotor.cooldown_remaining().await.map(|d| d.as_secs()));
    json_response(StatusCode::OK, body)
}

/// POST /refresh: run one refresh cycle and return its report.
async fn refresh_now(State(state): State<AdminState>) -> Response {
    let report = state.rotor.refresh_cycle().await;
    json_response(StatusCode::OK, view::cycle_json(&report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use claude_profiles::{ProfileStore, UsageSnapshot};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use profile_rotation::{RotationConfig, RotationService, StoreActivation, UsageFetcher};
    use std::future::Future;
    use std::pin::Pin;
    use tower::ServiceExt;

    /// Fetcher that always fails; the admin tests drive usage by hand.
    struct OfflineFetcher;

    impl UsageFetcher for OfflineFetcher {
        fn fetch<'a>(
            &'a self,
            _profile: &'a Profile,
        ) -> Pin<Box<dyn Future<Output = profile_rotation::Result<UsageSnapshot>> + Send + 'a>> {
            Box::pin(async { Err(profile_rotation::Error::Fetch("offline".into())) })
        }
    }

    async fn test_rotor(dir: &std::path::Path) -> Arc<Rotor> {
        let store = Arc::new(
            ProfileStore::load(dir.join("profiles.json"))
                .await
                .unwrap(),
        );
        Arc::new(Rotor::new(
            store.clone(),
            Arc::new(OfflineFetcher),
            Arc::new(StoreActivation::new(store, dir.join("active-session.json"))),
            RotationService::new(RotationConfig::default()),
        ))
    }

    fn test_app(rotor: Arc<Rotor>, token: Option<&str>) -> Router {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let state = AdminState::new(rotor, handle, token.map(|t| Secret::new(t.to_string())));
        build_router(state, 16)
    }

    fn rotating(id: &str, session: f64, weekly: f64) -> Profile {
        Profile::new(id, id)
            .with_credentials(SessionCredentials::new(format!("sk-{id}")))
            .with_auto_rotate(true)
            .with_usage(UsageSnapshot::new(session, weekly))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_req(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_profiles_and_active() {
        let dir = tempfile::tempdir().unwrap();
        let rotor = test_rotor(dir.path()).await;
        rotor.store().upsert(rotating("work", 10.0, 10.0)).await.unwrap();
        rotor.store().set_active(&"work".into()).await.unwrap();
        let app = test_app(rotor, None);

        let (status, json) = send(&app, get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["profiles"], 1);
        assert_eq!(json["active"], "work");
        assert!(json["last_cycle"].is_null());
    }

    #[tokio::test]
    async fn token_guards_everything_but_health() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(test_rotor(dir.path()).await, Some("s3cret"));

        let (status, _) = send(&app, get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, get_req("/profiles")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let wrong = Request::builder()
            .uri("/profiles")
            .header("authorization", "Bearer nope")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, wrong).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let right = Request::builder()
            .uri("/profiles")
            .header("authorization", "Bearer s3cret")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(&app, right).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["profiles"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn create_list_and_delete_profile() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(test_rotor(dir.path()).await, None);

        let (status, created) = send(
            &app,
            json_req(
                "POST",
                "/profiles",
                serde_json::json!({
                    "name": "Work",
                    "session_key": "sk-ant-work",
                    "account_tier": "max_20x",
                    "auto_rotate_enabled": true
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().unwrap().to_string();
        assert!(id.starts_with("profile-"));
        assert_eq!(id.len(), "profile-".len() + 32);
        assert_eq!(created["account_tier"], "max_20x");
        assert!(!created.to_string().contains("sk-ant-work"));

        let (_, listed) = send(&app, get_req("/profiles")).await;
        assert_eq!(listed["profiles"].as_array().unwrap().len(), 1);
        assert_eq!(listed["profiles"][0]["eligible"], true);

        let delete = Request::builder()
            .method("DELETE")
            .uri(format!("/profiles/{id}"))
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(&app, delete).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "removed");

        let again = Request::builder()
            .method("DELETE")
            .uri(format!("/profiles/{id}"))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, again).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_profile_requires_session_key() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(test_rotor(dir.path()).await, None);

        let (status, json) = send(
            &app,
            json_req(
                "POST",
                "/profiles",
                serde_json::json!({ "name": "Work", "session_key": "  " }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("session_key"));
    }

    #[tokio::test]
    async fn pushed_usage_is_stored_and_scored() {
        let dir = tempfile::tempdir().unwrap();
        let rotor = test_rotor(dir.path()).await;
        rotor.store().upsert(rotating("work", 0.0, 0.0)).await.unwrap();
        let app = test_app(rotor.clone(), None);

        let (status, json) = send(
            &app,
            json_req(
                "PUT",
                "/profiles/work/usage",
                serde_json::json!({ "session_percentage": 50.0, "weekly_percentage": 50.0 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["capacity"], 25.0);
        let stored = rotor.store().get(&"work".into()).await.unwrap();
        assert_eq!(stored.usage.unwrap().session_percentage, 50.0);

        let (status, _) = send(
            &app,
            json_req(
                "PUT",
                "/profiles/ghost/usage",
                serde_json::json!({ "session_percentage": 1.0, "weekly_percentage": 1.0 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn auto_rotate_toggle() {
        let dir = tempfile::tempdir().unwrap();
        let rotor = test_rotor(dir.path()).await;
        rotor.store().upsert(rotating("work", 0.0, 0.0)).await.unwrap();
        let app = test_app(rotor.clone(), None);

        let (status, _) = send(
            &app,
            json_req("PUT", "/profiles/work/auto-rotate", serde_json::json!({ "enabled": false })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(!rotor.store().get(&"work".into()).await.unwrap().auto_rotate_enabled);
    }

    #[tokio::test]
    async fn manual_activation_and_its_errors() {
        let dir = tempfile::tempdir().unwrap();
        let rotor = test_rotor(dir.path()).await;
        rotor.store().upsert(rotating("work", 0.0, 0.0)).await.unwrap();
        rotor.store().upsert(Profile::new("bare", "Bare")).await.unwrap();
        let app = test_app(rotor.clone(), None);

        let post = |uri: &str| {
            Request::builder()
                .method("POST")
                .uri(uri.to_string())
                .body(Body::empty())
                .unwrap()
        };

        let (status, _) = send(&app, post("/profiles/work/activate")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rotor.store().active_id().await, Some("work".into()));
        assert!(dir.path().join("active-session.json").exists());
        // Manual activation does not start the cooldown
        assert!(rotor.cooldown_remaining().await.is_none());

        let (status, _) = send(&app, post("/profiles/bare/activate")).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(&app, post("/profiles/ghost/activate")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn rotation_endpoint_is_a_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        let rotor = test_rotor(dir.path()).await;
        rotor.store().upsert(rotating("alice", 95.0, 40.0)).await.unwrap();
        rotor.store().upsert(rotating("bob", 10.0, 20.0)).await.unwrap();
        rotor.store().set_active(&"alice".into()).await.unwrap();
        let app = test_app(rotor.clone(), None);

        let (status, json) = send(&app, get_req("/rotation")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["outcome"], "rotate");
        assert_eq!(json["target"], "bob");
        assert_eq!(json["enabled"], true);
        assert!(json["cooldown_remaining_secs"].is_null());
        assert_eq!(rotor.store().active_id().await, Some("alice".into()));
    }

    #[tokio::test]
    async fn refresh_runs_a_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let rotor = test_rotor(dir.path()).await;
        let mut stale = rotating("work", 10.0, 10.0);
        if let Some(usage) = stale.usage.as_mut() {
            usage.fetched_at = 0;
        }
        rotor.store().upsert(stale).await.unwrap();
        let app = test_app(rotor.clone(), None);

        let post = Request::builder()
            .method("POST")
            .uri("/refresh")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(&app, post).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["fetched"], 0);
        assert_eq!(json["failed"], 1);
        // A stale snapshot does not survive a failed fetch
        assert!(rotor.store().get(&"work".into()).await.unwrap().usage.is_none());

        let (_, health) = send(&app, get_req("/health")).await;
        assert_eq!(health["last_cycle"]["failed"], 1);
    }

    #[tokio::test]
    async fn pushed_usage_survives_a_failed_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let rotor = test_rotor(dir.path()).await;
        rotor.store().upsert(rotating("alice", 0.0, 0.0)).await.unwrap();
        rotor.store().upsert(rotating("bob", 0.0, 0.0)).await.unwrap();
        rotor.store().set_active(&"alice".into()).await.unwrap();
        let app = test_app(rotor.clone(), None);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        for (id, session, weekly) in [("alice", 95.0, 40.0), ("bob", 10.0, 20.0)] {
            let (status, _) = send(
                &app,
                json_req(
                    "PUT",
                    &format!("/profiles/{id}/usage"),
                    serde_json::json!({ "session_percentage": session, "weekly_percentage": weekly }),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let post = Request::builder()
            .method("POST")
            .uri("/refresh")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(&app, post).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["failed"], 2);
        assert_eq!(json["outcome"], "rotate");
        assert_eq!(json["rotated_to"], "bob");
        assert_eq!(rotor.store().active_id().await, Some("bob".into()));
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_text() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(test_rotor(dir.path()).await, None);

        let response = app.oneshot(get_req("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/plain"));
    }
}
