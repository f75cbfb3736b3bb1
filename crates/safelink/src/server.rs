//! Axum HTTP server: router, listener, graceful shutdown.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::config::SafelinkConfig;
use crate::link;
use crate::rules::{self, AccessConditions};
use crate::select::{self, DutyCycle, Selection};
use crate::stats::DecisionStats;
use crate::store::MuteStateStore;
use crate::variant;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: SafelinkConfig,
    pub store: MuteStateStore,
    pub stats: DecisionStats,
}

/// Build and run the HTTP server.
pub async fn run(state: AppState) -> anyhow::Result<()> {
    let listen_addr = state.config.server.listen_address.clone();

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "safelink listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("safelink shut down gracefully");
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/route", post(handle_route))
        .route("/go", get(handle_go))
        .route("/api/sign", post(handle_sign))
        .route("/api/verify", post(handle_verify))
        .route("/api/ab", post(handle_ab))
        .route("/api/simulate", post(handle_simulate))
        .route("/api/evaluate", post(handle_evaluate))
        .route("/api/detect-mobile", post(handle_detect_mobile))
        .route("/api/stats", get(handle_get_stats))
        .route("/health", get(handle_health))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

fn bad_request(error: &str, message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": error, "message": message })),
    )
        .into_response()
}

/// Main handler for POST /route.
///
/// 1. Validate the request body (JSON object, non-empty `ip_address`)
/// 2. Short-circuit when the system is off or inactive
/// 3. Evaluate access gates against configured flags
/// 4. On pass, select a destination under the configured rule type,
///    running the mute/unmute duty cycle under the state-file lock
async fn handle_route(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let started = Instant::now();
    let correlation_id = Uuid::new_v4().to_string();
    state.stats.inc_requests();

    let span = safelink_tracing::route_decision_span!(
        &correlation_id,
        &state.config.routing.rule_type
    );
    let _enter = span.enter();

    let parsed: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return bad_request("Invalid JSON", "Request body must be valid JSON"),
    };
    let data = match parsed.as_object() {
        Some(o) => o,
        None => return bad_request("Invalid request shape", "JSON payload must decode to an object"),
    };

    let ip_address = data
        .get("ip_address")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if ip_address.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Missing required field",
                "message": "ip_address field is required",
                "required_fields": ["ip_address"],
            })),
        )
            .into_response();
    }

    let response = decide_route(&state, data, started);

    let decision = response
        .get("decision")
        .and_then(|v| v.as_str())
        .unwrap_or("normal");
    span.record("decision", decision);
    if let Some(url) = response.get("target_url").and_then(|v| v.as_str()) {
        span.record("target_url", url);
    }
    span.record("duration_ms", started.elapsed().as_millis() as u64);

    if decision == "target" {
        state.stats.inc_redirects();
    } else {
        state.stats.inc_normal_flows();
    }

    Json(response).into_response()
}

/// Run the gate-then-select pipeline and build the decision body.
///
/// Never fails: every internal fault path (lock contention, failed save)
/// degrades to a `normal` decision — failing open to "no redirect" beats
/// an undecided 500 for a redirect-gating service.
fn decide_route(state: &AppState, data: &serde_json::Map<String, Value>, started: Instant) -> Value {
    let cfg = &state.config.routing;
    let now = Utc::now();

    if !cfg.system_on {
        return normal_body(
            started,
            "normal",
            &cfg.rule_type,
            json!({
                "system_on": false,
                "is_active": false,
                "conditions_met": false,
                "rule_type": cfg.rule_type,
                "reason": "System is disabled",
            }),
        );
    }

    if !cfg.is_active {
        return normal_body(
            started,
            "normal",
            &cfg.rule_type,
            json!({
                "system_on": true,
                "is_active": false,
                "conditions_met": false,
                "rule_type": cfg.rule_type,
                "reason": "System is inactive",
            }),
        );
    }

    let request_country = data
        .get("country")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_lowercase();
    let is_mobile = data.get("wap").and_then(|v| v.as_bool()).unwrap_or(false);
    let is_vpn = data.get("vpn").and_then(|v| v.as_bool()).unwrap_or(false);

    let conditions = AccessConditions {
        system_on: true,
        allowed_countries: state.config.allowed_countries_lower(),
        request_country: request_country.clone(),
        is_mobile,
        is_vpn,
        is_proxy: false,
        is_bot: false,
        flag_wap: cfg.flag_wap,
        flag_vpn: cfg.flag_vpn,
        flag_proxy: cfg.flag_proxy,
        flag_bot: cfg.flag_bot,
    };
    let outcome = rules::evaluate(&conditions);

    let system_state = state
        .store
        .load()
        .current_state
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|| "normal".to_string());

    if !outcome.pass {
        tracing::debug!(reasons = ?outcome.reasons, "access gates failed");
        return normal_body(
            started,
            &system_state,
            &cfg.rule_type,
            json!({
                "system_on": true,
                "is_active": true,
                "conditions_met": false,
                "rule_type": cfg.rule_type,
                "failure_reasons": outcome.reasons,
                "user_country": request_country,
                "allowed_countries": conditions.allowed_countries,
            }),
        );
    }

    let active_count = cfg.targets.iter().filter(|t| t.active).count();
    if active_count == 0 {
        return normal_body(
            started,
            &system_state,
            &cfg.rule_type,
            json!({
                "system_on": true,
                "is_active": true,
                "conditions_met": true,
                "rule_type": cfg.rule_type,
                "reason": "No active target URLs available",
            }),
        );
    }

    let duty = DutyCycle {
        mute_duration: cfg.mute_duration,
        unmute_duration: cfg.unmute_duration,
    };

    // The duty cycle mutates shared state: the whole load-check-toggle-save
    // cycle runs under the exclusive file lock so concurrent requests
    // cannot double-flip. Other rule types only read the state for display.
    let (selection, system_state) = if cfg.rule_type == "mute_unmute" {
        match state.store.lock() {
            Ok(mut guard) => {
                let mut mute_state = guard.load();
                let selection =
                    select::select_target(&cfg.rule_type, &cfg.targets, &mut mute_state, duty, now);
                if selection.state_changed {
                    if let Err(e) = guard.save(&mute_state) {
                        tracing::warn!(
                            error = %e,
                            "failed to persist duty-cycle state, continuing with in-memory state"
                        );
                    } else {
                        tracing::info!(
                            state = ?mute_state.current_state,
                            "duty-cycle state persisted"
                        );
                    }
                }
                (selection, cycle_label(&mute_state))
            }
            Err(e) => {
                // Availability beats durability: decide from an unlocked
                // snapshot rather than failing the request.
                tracing::warn!(error = %e, "state file lock unavailable, deciding from snapshot");
                let mut mute_state = state.store.load();
                let selection =
                    select::select_target(&cfg.rule_type, &cfg.targets, &mut mute_state, duty, now);
                (selection, cycle_label(&mute_state))
            }
        }
    } else {
        let mut mute_state = state.store.load();
        let selection =
            select::select_target(&cfg.rule_type, &cfg.targets, &mut mute_state, duty, now);
        (selection, system_state)
    };

    let Selection { url, .. } = selection;
    let mut body = json!({
        "decision": if url.is_some() { "target" } else { "normal" },
        "system_state": system_state,
        "rule_applied": cfg.rule_type,
        "processing_time_ms": started.elapsed().as_millis() as u64,
        "timestamp": Utc::now().to_rfc3339(),
        "debug": {
            "system_on": true,
            "is_active": true,
            "conditions_met": true,
            "rule_type": cfg.rule_type,
            "user_country": request_country,
            "is_wap": is_mobile,
            "is_vpn": is_vpn,
            "active_urls_count": active_count,
        },
    });
    if let Some(url) = url {
        body["target_url"] = Value::String(url);
    }
    body
}

fn cycle_label(state: &crate::store::MuteState) -> String {
    state
        .current_state
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|| "normal".to_string())
}

fn normal_body(started: Instant, system_state: &str, rule_type: &str, debug: Value) -> Value {
    json!({
        "decision": "normal",
        "system_state": system_state,
        "rule_applied": rule_type,
        "processing_time_ms": started.elapsed().as_millis() as u64,
        "timestamp": Utc::now().to_rfc3339(),
        "debug": debug,
    })
}

#[derive(Debug, Deserialize)]
struct GoParams {
    to: String,
    exp: i64,
    sig: String,
}

/// GET /go — consume a signed link: verify, then redirect.
async fn handle_go(State(state): State<Arc<AppState>>, Query(params): Query<GoParams>) -> Response {
    let secret = state.config.signing.effective_secret();
    let verification = link::verify_signature(&params.to, params.exp, &params.sig, secret);

    if !verification.valid {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "Invalid signature" })),
        )
            .into_response();
    }
    if verification.expired {
        return (
            StatusCode::GONE,
            Json(json!({ "error": "Link expired" })),
        )
            .into_response();
    }

    let location = match HeaderValue::from_str(&params.to) {
        Ok(v) => v,
        Err(_) => return bad_request("Invalid target", "Target URL is not a valid header value"),
    };

    let mut response = StatusCode::FOUND.into_response();
    response.headers_mut().insert(header::LOCATION, location);
    response
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest {
    base_url: String,
    target_url: String,
    expiration_minutes: Option<i64>,
    secret: Option<String>,
}

/// POST /api/sign — mint a signed redirect URL.
async fn handle_sign(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignRequest>,
) -> Response {
    let correlation_id = Uuid::new_v4().to_string();
    let span = safelink_tracing::link_sign_span!(&correlation_id, &req.target_url);
    let _enter = span.enter();

    if link::validate_http_url(&req.base_url).is_err() {
        return bad_request("Invalid base URL", "baseUrl must be an absolute http/https URL");
    }
    if link::validate_http_url(&req.target_url).is_err() {
        return bad_request("Invalid target URL", "targetUrl must be an absolute http/https URL");
    }

    let ttl = req
        .expiration_minutes
        .unwrap_or(state.config.signing.default_ttl_minutes);
    if ttl <= 0 {
        return bad_request("Invalid expiration", "expirationMinutes must be positive");
    }

    let secret = req
        .secret
        .as_deref()
        .unwrap_or_else(|| state.config.signing.effective_secret());

    match link::generate_signed_url(&req.base_url, &req.target_url, ttl, secret) {
        Ok(url) => {
            state.stats.inc_links_signed();
            Json(json!({ "url": url })).into_response()
        }
        Err(e) => bad_request("Signing failed", &e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequest {
    target_url: String,
    /// Accepts a number or a numeric string, like the form posts the
    /// dashboard used to send.
    expiration: Value,
    signature: String,
    secret: Option<String>,
}

/// POST /api/verify — report signature validity and expiry independently.
async fn handle_verify(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VerifyRequest>,
) -> Response {
    let expiration = coerce_epoch(&req.expiration);
    let secret = req
        .secret
        .as_deref()
        .unwrap_or_else(|| state.config.signing.effective_secret());

    let verification = link::verify_signature(&req.target_url, expiration, &req.signature, secret);
    Json(json!({
        "valid": verification.valid,
        "expired": verification.expired,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AbRequest {
    base_url: String,
    url_a: String,
    url_b: String,
    expiration_minutes: Option<i64>,
    secret: Option<String>,
}

/// POST /api/ab — mint a signed link per variant.
async fn handle_ab(State(state): State<Arc<AppState>>, Json(req): Json<AbRequest>) -> Response {
    if link::validate_http_url(&req.base_url).is_err() {
        return bad_request("Invalid base URL", "baseUrl must be an absolute http/https URL");
    }
    if link::validate_http_url(&req.url_a).is_err() {
        return bad_request("Invalid URL A", "urlA must be an absolute http/https URL");
    }
    if link::validate_http_url(&req.url_b).is_err() {
        return bad_request("Invalid URL B", "urlB must be an absolute http/https URL");
    }

    let ttl = req
        .expiration_minutes
        .unwrap_or(state.config.signing.default_ttl_minutes);
    if ttl <= 0 {
        return bad_request("Invalid expiration", "expirationMinutes must be positive");
    }

    let secret = req
        .secret
        .as_deref()
        .unwrap_or_else(|| state.config.signing.effective_secret());

    match link::generate_ab_pair(&req.base_url, &req.url_a, &req.url_b, ttl, secret) {
        Ok(pair) => {
            state.stats.inc_links_signed();
            Json(pair).into_response()
        }
        Err(e) => bad_request("Signing failed", &e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimulateRequest {
    #[serde(default)]
    visitor_key: String,
    weight_a: Option<i64>,
}

/// POST /api/simulate — deterministic A/B bucketing for a visitor key.
async fn handle_simulate(Json(req): Json<SimulateRequest>) -> Response {
    let picked = variant::pick_variant(&req.visitor_key, req.weight_a.unwrap_or(50));
    Json(json!({ "variant": picked })).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateRequest {
    system_on: Option<bool>,
    allowed_countries: Option<Vec<String>>,
    country: Option<String>,
    is_mobile: Option<bool>,
    is_vpn: Option<bool>,
    is_proxy: Option<bool>,
    is_bot: Option<bool>,
    flag_wap: Option<bool>,
    flag_vpn: Option<bool>,
    flag_proxy: Option<bool>,
    flag_bot: Option<bool>,
}

/// POST /api/evaluate — run the full gate set; request fields override
/// configured defaults.
async fn handle_evaluate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EvaluateRequest>,
) -> Response {
    let cfg = &state.config.routing;
    let conditions = AccessConditions {
        system_on: req.system_on.unwrap_or(cfg.system_on),
        allowed_countries: req
            .allowed_countries
            .map(|countries| {
                countries
                    .iter()
                    .map(|c| c.trim().to_lowercase())
                    .filter(|c| !c.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| state.config.allowed_countries_lower()),
        request_country: req.country.unwrap_or_default().trim().to_lowercase(),
        is_mobile: req.is_mobile.unwrap_or(false),
        is_vpn: req.is_vpn.unwrap_or(false),
        is_proxy: req.is_proxy.unwrap_or(false),
        is_bot: req.is_bot.unwrap_or(false),
        flag_wap: req.flag_wap.unwrap_or(cfg.flag_wap),
        flag_vpn: req.flag_vpn.unwrap_or(cfg.flag_vpn),
        flag_proxy: req.flag_proxy.unwrap_or(cfg.flag_proxy),
        flag_bot: req.flag_bot.unwrap_or(cfg.flag_bot),
    };

    Json(rules::evaluate(&conditions)).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectMobileRequest {
    #[serde(default)]
    user_agent: String,
}

/// POST /api/detect-mobile — classify a user agent.
async fn handle_detect_mobile(Json(req): Json<DetectMobileRequest>) -> Response {
    Json(json!({ "isMobile": rules::is_mobile_user_agent(&req.user_agent) })).into_response()
}

/// GET /api/stats — return current decision statistics.
async fn handle_get_stats(State(state): State<Arc<AppState>>) -> Response {
    Json(state.stats.snapshot()).into_response()
}

/// Health check endpoint.
async fn handle_health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Best-effort epoch coercion: number, or numeric string, else 0
/// (which reads as both expired and unverifiable).
fn coerce_epoch(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        Value::String(s) => s.trim().parse::<i64>().unwrap_or(0),
        _ => 0,
    }
}

/// Wait for SIGINT (Ctrl+C) for graceful shutdown.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
    tracing::info!("Shutdown signal received, draining connections...");
}
