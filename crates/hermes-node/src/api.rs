//! HTTP API server for the Hermes node.
//!
//! Exposes settlement state and history, manual settlement triggers, and
//! ingestion endpoints that feed promises and registrations onto the bus.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use hermes_core::{
    Address, AppEvent, ChannelSnapshot, HermesPromiseEvent, Identity, Promise, RegistrationEvent,
    RegistrationStatus,
};
use hermes_settlement::{MetricsSnapshot, SettlementError, SettlementHistoryEntry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::state::ApiState;

// --- Response types ---

#[derive(Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub hermes: String,
    pub threshold: f64,
    pub tracked_identities: Vec<Identity>,
    pub uptime_secs: u64,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct SettlementStateResponse {
    pub identity: Identity,
    pub registered: bool,
    pub settle_in_progress: bool,
    pub balance: u128,
    pub available_balance: u128,
    pub unsettled_balance: u128,
    pub last_promise_amount: u128,
    pub channel: ChannelSnapshot,
}

#[derive(Debug, Serialize)]
pub struct SettleResponse {
    pub identity: Identity,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub delivered: usize,
}

#[derive(Deserialize)]
pub struct PromiseRequest {
    pub identity: String,
    pub amount: u128,
    /// Defaults to the configured hermes.
    #[serde(default)]
    pub hermes: Option<String>,
}

#[derive(Deserialize)]
pub struct RegistrationRequest {
    pub identity: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl ToString) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

fn parse_identity(raw: &str) -> Result<Identity, ApiError> {
    Identity::new(raw).map_err(|e| api_error(StatusCode::BAD_REQUEST, e))
}

fn settlement_error(e: SettlementError) -> ApiError {
    let status = match &e {
        SettlementError::NotRegistered(_) => StatusCode::NOT_FOUND,
        SettlementError::SettleInProgress(_) | SettlementError::NothingToSettle(_) => {
            StatusCode::CONFLICT
        }
        SettlementError::Channel { .. }
        | SettlementError::Promise { .. }
        | SettlementError::Registration { .. } => StatusCode::BAD_GATEWAY,
        SettlementError::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, e)
}

// --- Handlers ---

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
    })
}

async fn handle_status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    let config = state.settler.config();
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        hermes: config.hermes_address.to_string(),
        threshold: config.threshold,
        tracked_identities: state.settler.tracked_identities(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        metrics: state.settler.metrics(),
    })
}

async fn handle_settlement_state(
    State(state): State<Arc<ApiState>>,
    Path(identity): Path<String>,
) -> Result<Json<SettlementStateResponse>, ApiError> {
    let identity = parse_identity(&identity)?;
    let s = state.settler.state(&identity).ok_or_else(|| {
        api_error(
            StatusCode::NOT_FOUND,
            format!("identity not tracked: {}", identity),
        )
    })?;

    Ok(Json(SettlementStateResponse {
        registered: s.registered,
        settle_in_progress: s.settle_in_progress,
        balance: s.balance(),
        available_balance: s.available_balance(),
        unsettled_balance: s.unsettled_balance(),
        last_promise_amount: s.last_promise.amount,
        channel: s.channel,
        identity,
    }))
}

async fn handle_history(
    State(state): State<Arc<ApiState>>,
    Path(identity): Path<String>,
) -> Result<Json<Vec<SettlementHistoryEntry>>, ApiError> {
    let identity = parse_identity(&identity)?;
    state
        .history
        .list(&identity)
        .await
        .map(Json)
        .map_err(|e| api_error(StatusCode::BAD_GATEWAY, e))
}

async fn handle_settle(
    State(state): State<Arc<ApiState>>,
    Path(identity): Path<String>,
) -> Result<(StatusCode, Json<SettleResponse>), ApiError> {
    let identity = parse_identity(&identity)?;
    state
        .settler
        .force_settle(&identity)
        .await
        .map_err(settlement_error)?;
    Ok(queued(identity))
}

async fn handle_settle_into_stake(
    State(state): State<Arc<ApiState>>,
    Path(identity): Path<String>,
) -> Result<(StatusCode, Json<SettleResponse>), ApiError> {
    let identity = parse_identity(&identity)?;
    state
        .settler
        .settle_into_stake(&identity)
        .await
        .map_err(settlement_error)?;
    Ok(queued(identity))
}

fn queued(identity: Identity) -> (StatusCode, Json<SettleResponse>) {
    (
        StatusCode::ACCEPTED,
        Json(SettleResponse {
            identity,
            status: "queued".into(),
        }),
    )
}

/// Record a promise issued to the hermes and announce it on the bus.
async fn handle_promise(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<PromiseRequest>,
) -> Result<(StatusCode, Json<PublishResponse>), ApiError> {
    let identity = parse_identity(&req.identity)?;
    let configured = state.settler.config().hermes_address;
    let hermes_id = match req.hermes {
        Some(raw) => raw
            .parse::<Address>()
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?,
        None => configured,
    };

    let promise = Promise::with_amount(req.amount);
    if hermes_id == configured {
        state.ledger.issue_promise(&identity, promise.clone());
    }
    let delivered = state.bus.publish(AppEvent::HermesPromise(HermesPromiseEvent {
        hermes_id,
        provider_id: identity,
        promise,
    }));
    Ok((StatusCode::ACCEPTED, Json(PublishResponse { delivered })))
}

/// Mark an identity registered and announce it on the bus.
async fn handle_registration(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<RegistrationRequest>,
) -> Result<(StatusCode, Json<PublishResponse>), ApiError> {
    let identity = parse_identity(&req.identity)?;
    state
        .ledger
        .set_registration(&identity, RegistrationStatus::Registered);
    let delivered = state
        .bus
        .publish(AppEvent::IdentityRegistration(RegistrationEvent {
            identity,
            status: RegistrationStatus::Registered,
        }));
    Ok((StatusCode::ACCEPTED, Json(PublishResponse { delivered })))
}

// --- Server ---

pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(handle_health))
        .route("/api/v1/status", get(handle_status))
        .route("/api/v1/settlement/{identity}", get(handle_settlement_state))
        .route("/api/v1/settlement/{identity}/history", get(handle_history))
        .route("/api/v1/settlement/{identity}/settle", post(handle_settle))
        .route(
            "/api/v1/settlement/{identity}/stake",
            post(handle_settle_into_stake),
        )
        .route("/api/v1/promises", post(handle_promise))
        .route("/api/v1/registrations", post(handle_registration))
        .with_state(state)
}

pub async fn start_api_server(listener: TcpListener, state: Arc<ApiState>) -> anyhow::Result<()> {
    let app = build_router(state);
    tracing::info!(listen_addr = %listener.local_addr()?, "HTTP API server started");
    axum::serve(listener, app).await?;
    Ok(())
}
