//! HTTP surface for the orchestration operations
//!
//! Thin request layer only: deserialization, routing, and mapping errors to
//! their external code and status. All business rules live in the
//! orchestrator and lifecycle manager.

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::metrics;
use crate::onboarding::OnboardingOrchestrator;
use crate::store::PgStore;
use crate::transactions::{ConfirmRequest, TransactionLifecycle};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<OnboardingOrchestrator>,
    pub lifecycle: Arc<TransactionLifecycle>,
    pub store: Arc<PgStore>,
}

/// Run the HTTP API server
pub async fn run_server(
    host: &str,
    port: u16,
    state: AppState,
) -> OrchestratorResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", host, port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| OrchestratorError::Internal(e.to_string()))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| OrchestratorError::Internal(e.to_string()))?;

    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/users/:user_id/onboard", post(onboard))
        .route("/users/:user_id/status", get(get_status))
        .route("/users/:user_id/vault/prepare", post(prepare_vault))
        .route("/users/:user_id/vault/submit", post(submit_vault))
        .route("/users/:user_id/deposits", post(prepare_deposit))
        .route("/users/:user_id/deposits/:tx_id/confirm", post(confirm_transaction))
        .route("/users/:user_id/withdrawals", post(prepare_withdraw))
        .route(
            "/users/:user_id/withdrawals/:tx_id/confirm",
            post(confirm_transaction),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error wrapper carrying the resolver's code and status to the client.
struct ApiError(OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.http_status();
        let code = self.0.error_code();

        // Internal causes are logged, never surfaced.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Internal error");
            "Internal error".to_string()
        } else {
            self.0.to_string()
        };

        let body = ErrorResponse {
            error_code: code,
            message,
            retryable: self.0.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(()) => {
            metrics::record_health_check();
            (StatusCode::OK, Json(ReadinessResponse { ready: true }))
        }
        Err(_) => {
            metrics::record_health_check_failure();
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse { ready: false }),
            )
        }
    }
}

async fn onboard(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<OnboardRequest>,
) -> ApiResult<impl Serialize> {
    let record = state.orchestrator.onboard_user(&user_id, &body.email).await?;
    Ok(Json(record))
}

async fn get_status(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<impl Serialize> {
    let record = state.orchestrator.get_status(&user_id).await?;
    Ok(Json(record))
}

async fn prepare_vault(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<impl Serialize> {
    let preparation = state.orchestrator.prepare_vault_creation(&user_id).await?;
    Ok(Json(preparation))
}

async fn submit_vault(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<SubmitVaultRequest>,
) -> ApiResult<impl Serialize> {
    let activation = state
        .orchestrator
        .submit_vault_creation(&user_id, body.transaction_id, &body.transaction_hash)
        .await?;
    Ok(Json(activation))
}

async fn prepare_deposit(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<DepositRequest>,
) -> ApiResult<impl Serialize> {
    let preparation = state.lifecycle.prepare_deposit(&user_id, &body.amount).await?;
    Ok(Json(preparation))
}

async fn prepare_withdraw(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<WithdrawRequest>,
) -> ApiResult<impl Serialize> {
    let preparation = state.lifecycle.prepare_withdraw(&user_id, &body.shares).await?;
    Ok(Json(preparation))
}

async fn confirm_transaction(
    State(state): State<AppState>,
    Path((user_id, tx_id)): Path<(String, Uuid)>,
    Json(body): Json<ConfirmRequest>,
) -> ApiResult<impl Serialize> {
    let record = state.lifecycle.confirm(&user_id, tx_id, &body).await?;
    Ok(Json(record))
}

// Request/response types

#[derive(Deserialize)]
struct OnboardRequest {
    email: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitVaultRequest {
    transaction_id: Uuid,
    transaction_hash: String,
}

#[derive(Deserialize)]
struct DepositRequest {
    amount: String,
}

#[derive(Deserialize)]
struct WithdrawRequest {
    shares: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error_code: &'static str,
    message: String,
    retryable: bool,
}
