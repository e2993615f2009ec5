//! Axum REST API handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ethers::types::TransactionReceipt;
use iot_client::form::FormState;
use iot_client::operation::PendingOperation;
use iot_client::pages::admin::{AdminAccess, VerificationRequest};
use iot_client::pages::devices::Device;
use iot_client::reconcile::ResolvedDispute;
use iot_client::{DappError, Notification, OperationStatus, Submission, WalletContext};
use serde::Serialize;
use tracing::warn;

use crate::app::AppState;

/// POST bodies: form field name to raw string value.
pub type FormInput = BTreeMap<String, String>;

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub wallet: WalletContext,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
}

#[derive(Serialize)]
pub struct NotificationsResponse {
    pub count: usize,
    pub notifications: Vec<Notification>,
}

#[derive(Serialize)]
pub struct SubmissionResponse {
    pub status: OperationStatus,
    pub operation: Option<PendingOperation>,
    pub receipt: Option<TransactionReceipt>,
    pub error: Option<ErrorResponse>,
    pub notifications: Vec<Notification>,
    /// Fields left in the form after the attempt; empty after a confirmed one.
    pub form: FormState,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminResponse {
    pub access: AdminAccess,
    pub pending_disputes: Vec<VerificationRequest>,
    pub resolved_disputes: Vec<ResolvedDispute>,
}

#[derive(Serialize)]
pub struct DevicesResponse {
    pub count: usize,
    pub devices: Vec<Device>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataResponse {
    pub count: usize,
    pub pending_requests: Vec<VerificationRequest>,
}

// ─────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────

fn error_status(err: &DappError) -> StatusCode {
    match err {
        DappError::Validation(_) | DappError::Abi(_) => StatusCode::BAD_REQUEST,
        DappError::NotConnected => StatusCode::UNAUTHORIZED,
        DappError::UserRejected(_) => StatusCode::FORBIDDEN,
        DappError::SimulationReverted(_) | DappError::InsufficientFunds(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        DappError::Network(_) | DappError::Rpc(_) | DappError::Storage(_) => StatusCode::BAD_GATEWAY,
        DappError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<&DappError> for ErrorResponse {
    fn from(err: &DappError) -> Self {
        Self {
            error: err.to_string(),
            kind: err.kind(),
        }
    }
}

fn error_response(err: DappError) -> Response {
    warn!("Request failed: {}", err);
    (error_status(&err), Json(ErrorResponse::from(&err))).into_response()
}

fn inputs(form: &FormInput) -> impl Iterator<Item = (&str, &str)> {
    form.iter().map(|(name, value)| (name.as_str(), value.as_str()))
}

fn submission_response(submission: Submission) -> Response {
    let Submission { outcome, form } = submission;
    let status = outcome
        .error
        .as_ref()
        .map(error_status)
        .unwrap_or(StatusCode::OK);

    (
        status,
        Json(SubmissionResponse {
            status: outcome.status(),
            error: outcome.error.as_ref().map(ErrorResponse::from),
            operation: outcome.operation,
            receipt: outcome.receipt,
            notifications: outcome.notifications,
            form,
        }),
    )
        .into_response()
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        wallet: state.wallet,
    })
}

/// `GET /notifications`
///
/// Recent toasts from submissions and event feeds, oldest first.
pub async fn notifications(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let notifications = state.notifications.recent();
    Json(NotificationsResponse {
        count: notifications.len(),
        notifications,
    })
}

/// `GET /admin`
pub async fn get_admin(State(state): State<Arc<AppState>>) -> Response {
    let access = match state.admin.access().await {
        Ok(access) => access,
        Err(e) => return error_response(e),
    };
    let pending_disputes = match state.admin.pending_disputes().await {
        Ok(disputes) => disputes,
        Err(e) => return error_response(e),
    };
    let resolved_disputes = state
        .admin
        .feed()
        .read()
        .await
        .resolved_disputes
        .iter()
        .cloned()
        .collect();

    (
        StatusCode::OK,
        Json(AdminResponse {
            access,
            pending_disputes,
            resolved_disputes,
        }),
    )
        .into_response()
}

/// `POST /admin/admins`
pub async fn add_admin(State(state): State<Arc<AppState>>, Json(form): Json<FormInput>) -> Response {
    submission_response(state.admin.add_admin(inputs(&form)).await)
}

/// `POST /admin/admins/remove`
pub async fn remove_admin(
    State(state): State<Arc<AppState>>,
    Json(form): Json<FormInput>,
) -> Response {
    submission_response(state.admin.remove_admin(inputs(&form)).await)
}

/// `POST /admin/oracle`
pub async fn set_oracle_address(
    State(state): State<Arc<AppState>>,
    Json(form): Json<FormInput>,
) -> Response {
    submission_response(state.admin.set_oracle_address(inputs(&form)).await)
}

/// `POST /admin/oracle/reset`
pub async fn reset_oracle_config(
    State(state): State<Arc<AppState>>,
    Json(form): Json<FormInput>,
) -> Response {
    submission_response(state.admin.reset_oracle_config(inputs(&form)).await)
}

/// `POST /admin/data-feed`
pub async fn set_data_feed_id(
    State(state): State<Arc<AppState>>,
    Json(form): Json<FormInput>,
) -> Response {
    submission_response(state.admin.set_data_feed_id(inputs(&form)).await)
}

/// `POST /admin/disputes/resolve`
pub async fn resolve_dispute(
    State(state): State<Arc<AppState>>,
    Json(form): Json<FormInput>,
) -> Response {
    submission_response(state.admin.resolve_dispute(inputs(&form)).await)
}

/// `GET /devices`
///
/// First page of devices owned by the connected wallet.
pub async fn get_devices(State(state): State<Arc<AppState>>) -> Response {
    match state.devices.devices().await {
        Ok(devices) => (
            StatusCode::OK,
            Json(DevicesResponse {
                count: devices.len(),
                devices,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /devices`
///
/// Uploads the metadata to IPFS, then registers the device on-chain.
pub async fn register_device(
    State(state): State<Arc<AppState>>,
    Json(form): Json<FormInput>,
) -> Response {
    submission_response(state.devices.register_device(inputs(&form)).await)
}

/// `GET /rewards`
pub async fn get_rewards(State(state): State<Arc<AppState>>) -> Response {
    match state.rewards.summary().await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /rewards/claim`
pub async fn claim_rewards(
    State(state): State<Arc<AppState>>,
    Json(form): Json<FormInput>,
) -> Response {
    submission_response(state.rewards.claim_rewards(inputs(&form)).await)
}

/// `GET /data`
pub async fn get_data(State(state): State<Arc<AppState>>) -> Response {
    match state.data.pending_requests().await {
        Ok(pending_requests) => (
            StatusCode::OK,
            Json(DataResponse {
                count: pending_requests.len(),
                pending_requests,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /data`
pub async fn submit_data(State(state): State<Arc<AppState>>, Json(form): Json<FormInput>) -> Response {
    submission_response(state.data.submit_data(inputs(&form)).await)
}
