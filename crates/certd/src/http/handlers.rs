//! Command handlers

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::service::{
    CertificateOutcome, ChallengeOutcome, CreateOrderOutcome, OrderView, RegisterOutcome,
    ServiceError,
};

use super::AppState;

/// Internal failure mapped to the generic envelope; the cause is logged,
/// never surfaced.
pub struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "Command handler failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"errCode": 500, "errMsg": "Internal Server Error"})),
        )
            .into_response()
    }
}

type ApiResult = Result<Json<serde_json::Value>, ApiError>;

fn ok(extra: serde_json::Value) -> Json<serde_json::Value> {
    let mut body = json!({"errCode": 0, "errMsg": "ok"});
    if let (Some(obj), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            obj.insert(k.clone(), v.clone());
        }
    }
    Json(body)
}

fn message(err_msg: &str) -> Json<serde_json::Value> {
    Json(json!({"errCode": 0, "errMsg": err_msg}))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    pub user_uuid: String,
    pub contact: Vec<String>,
}

pub async fn create_account(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateAccountRequest>,
) -> ApiResult {
    match state
        .accounts
        .register(&request.user_uuid, &request.contact)
        .await?
    {
        RegisterOutcome::Created(_) => Ok(ok(json!({}))),
        RegisterOutcome::AlreadyExists => Ok(message("account already exists")),
    }
}

pub async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> ApiResult {
    let account = state.accounts.get(&uuid).await?;
    Ok(ok(json!({"account": account})))
}

pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> ApiResult {
    state.accounts.delete(&uuid).await?;
    Ok(ok(json!({})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub user_uuid: String,
    pub domains: Vec<String>,
}

/// Query string carrying the owning account, e.g. `?userUuid=u1`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    pub user_uuid: String,
}

pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateOrderRequest>,
) -> ApiResult {
    match state
        .orders
        .create_order(&request.user_uuid, &request.domains)
        .await?
    {
        CreateOrderOutcome::Created { order, response } => Ok(ok(json!({
            "order": response,
            "orderUrl": order.order_url,
            "orderUuid": order.uuid,
        }))),
        CreateOrderOutcome::AlreadyExists { .. } => Ok(message("order already exists")),
    }
}

pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Query(query): Query<UserQuery>,
) -> ApiResult {
    match state.orders.get_order(&query.user_uuid, &uuid).await? {
        OrderView::Stored(order) => Ok(ok(json!({"order": order}))),
        OrderView::Live { response, .. } => Ok(ok(json!({"order": response}))),
    }
}

pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
) -> ApiResult {
    let orders = state.orders.list_orders(&query.user_uuid).await?;
    Ok(ok(json!({"orders": orders})))
}

pub async fn get_authorizations(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Query(query): Query<UserQuery>,
) -> ApiResult {
    let views = state.orders.authorizations(&query.user_uuid, &uuid).await?;

    let mut authorizations = Vec::new();
    let mut dns_challenges = Vec::new();
    for view in views {
        authorizations.push(json!(view.authorization));
        for record in view.records {
            dns_challenges.push(json!(record));
        }
    }

    Ok(ok(json!({
        "authorizations": authorizations,
        "dnsChallenges": dns_challenges,
    })))
}

pub async fn run_challenge(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Query(query): Query<UserQuery>,
) -> ApiResult {
    match state.orders.run_challenge(&query.user_uuid, &uuid).await? {
        ChallengeOutcome::AlreadyCompleted => Ok(message("challenge already completed")),
        ChallengeOutcome::Report(report) => {
            let err_msg = if report.pre_check_passed { "ok" } else { "fail" };
            Ok(Json(json!({
                "errCode": 0,
                "errMsg": err_msg,
                "authorizations": report.authorizations,
                "dnsChallenges": report.records,
                "preCheckAuthorizationChallenge": report.pre_check_passed,
            })))
        }
    }
}

pub async fn finalize_order(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Query(query): Query<UserQuery>,
) -> ApiResult {
    let response = state.orders.finalize(&query.user_uuid, &uuid).await?;
    Ok(ok(json!({"order": response})))
}

pub async fn get_certificate(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Query(query): Query<UserQuery>,
) -> ApiResult {
    match state.orders.certificate(&query.user_uuid, &uuid).await? {
        CertificateOutcome::Issued(order) => Ok(ok(json!({"order": order}))),
        CertificateOutcome::NotReady { status } => Ok(Json(json!({
            "errCode": 0,
            "errMsg": "certificate not ready",
            "status": status,
        }))),
    }
}
