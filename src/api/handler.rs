use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use base64::Engine;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::models::*;
use crate::{
    error::{AppError, AppResult, PayoutError},
    ledger::models::*,
    middleware::{validation_failed, Actor, ValidatedJson},
    queue::{
        executor::ExecutionOutcome,
        manager::{DrainReport, PayoutQueueManager},
        stats::QueueStats,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<PayoutQueueManager>,
}

fn decode_signature(body: Option<Json<ApproveBody>>) -> AppResult<Option<Vec<u8>>> {
    let Some(Json(body)) = body else {
        return Ok(None);
    };

    body.signature
        .map(|encoded| {
            base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| AppError::BadRequest(format!("Invalid base64 signature: {}", e)))
        })
        .transpose()
}

/// Queue a new payout request
/// POST /payouts
pub async fn create_payout(
    State(state): State<AppState>,
    Actor(actor): Actor,
    ValidatedJson(body): ValidatedJson<CreatePayoutBody>,
) -> AppResult<(StatusCode, Json<PayoutRequest>)> {
    info!("Creating payout request for {} on behalf of {}", body.recipient, actor);

    let request = state
        .manager
        .create_request(body.into_new_request(actor))
        .await?;

    Ok((StatusCode::CREATED, Json(request)))
}

/// Page through requests in one status, newest first
/// GET /payouts?status=&limit=&offset=
pub async fn list_payouts(
    State(state): State<AppState>,
    Query(query): Query<ListPayoutsQuery>,
) -> AppResult<Json<PayoutListResponse>> {
    query.validate().map_err(validation_failed)?;

    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);
    let requests = state
        .manager
        .get_requests_by_status(query.status, limit, offset)
        .await?;

    Ok(Json(PayoutListResponse {
        status: query.status,
        limit,
        offset,
        requests,
    }))
}

/// GET /payouts/:id
pub async fn get_payout(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<PayoutRequest>> {
    Ok(Json(state.manager.get_request(id).await?))
}

/// Record the caller's approval
/// POST /payouts/:id/approve
pub async fn approve_payout(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Actor(actor): Actor,
    body: Option<Json<ApproveBody>>,
) -> AppResult<Json<ApprovalOutcome>> {
    let signature = decode_signature(body)?;
    let outcome = state.manager.approve_request(id, &actor, signature).await?;
    Ok(Json(outcome))
}

/// POST /payouts/:id/cancel
pub async fn cancel_payout(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Actor(actor): Actor,
) -> AppResult<Json<CancelResponse>> {
    if !state.manager.cancel_request(id, &actor).await? {
        return Err(PayoutError::NotFound(format!("Payout request {}", id)).into());
    }

    Ok(Json(CancelResponse {
        id,
        cancelled: true,
    }))
}

/// Requeue a failed request
/// POST /payouts/:id/retry
pub async fn retry_payout(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Actor(actor): Actor,
) -> AppResult<Json<PayoutRequest>> {
    Ok(Json(state.manager.retry_request(id, &actor).await?))
}

/// Run one drain pass on demand
/// POST /drain
pub async fn drain(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Json(body): Json<DrainBody>,
) -> AppResult<Json<DrainReport>> {
    info!("Drain of {} treasury requested by {}", body.currency, actor);

    let report = state
        .manager
        .run_drain_cycle(body.currency, body.treasury_balance)
        .await?;

    Ok(Json(report))
}

/// Assemble approved requests into a batch
/// POST /batches
pub async fn create_batch(
    State(state): State<AppState>,
    Actor(actor): Actor,
    ValidatedJson(body): ValidatedJson<CreateBatchBody>,
) -> AppResult<(StatusCode, Json<PayoutBatch>)> {
    info!("Batch of {} requests requested by {}", body.request_ids.len(), actor);

    let batch = state
        .manager
        .assemble_batch(&body.request_ids, body.batch_type)
        .await?;

    Ok((StatusCode::CREATED, Json(batch)))
}

/// GET /batches/:id
pub async fn get_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<PayoutBatch>> {
    Ok(Json(state.manager.get_batch(id).await?))
}

/// POST /batches/:id/approve
pub async fn approve_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Actor(actor): Actor,
    body: Option<Json<ApproveBody>>,
) -> AppResult<Json<ApprovalOutcome>> {
    let signature = decode_signature(body)?;
    let outcome = state.manager.approve_batch(id, &actor, signature).await?;
    Ok(Json(outcome))
}

/// Submit an approved batch to the ledger; the caller is recorded as signer
/// POST /batches/:id/execute
pub async fn execute_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Actor(actor): Actor,
) -> AppResult<Json<ExecutionOutcome>> {
    Ok(Json(state.manager.execute_batch(id, &actor).await?))
}

/// GET /stats
pub async fn get_stats(State(state): State<AppState>) -> AppResult<Json<QueueStats>> {
    Ok(Json(state.manager.get_stats().await?))
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ledger_currencies: state.manager.ledger_currencies(),
        timestamp: chrono::Utc::now(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, QueueConfig};
    use crate::execution::router::LedgerRouter;
    use crate::execution::simulated::SimulatedLedgerClient;
    use crate::ledger::repository::InMemoryPayoutStore;
    use crate::middleware::actor::ACTOR_HEADER;
    use crate::server::create_app;
    use crate::test_utils::RECIPIENT;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request},
        Router,
    };
    use rust_decimal_macros::dec;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    async fn app() -> Router {
        let mut router = LedgerRouter::new();
        router.register_client(
            Currency::Gtt,
            Arc::new(SimulatedLedgerClient::with_balance(Currency::Gtt, dec!(1000))),
        );
        let manager = PayoutQueueManager::new(
            Arc::new(InMemoryPayoutStore::new()),
            Arc::new(router),
            &QueueConfig::default(),
            Duration::from_secs(5),
        );
        let state = AppState {
            manager: Arc::new(manager),
        };

        let mut config = Config::default();
        config.rate_limit.requests_per_second = 1_000;
        config.rate_limit.burst = 1_000;
        create_app(state, &config).await.unwrap()
    }

    async fn send(app: &Router, method: Method, uri: &str, actor: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(actor) = actor {
            builder = builder.header(ACTOR_HEADER, actor);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn payout(amount: &str) -> Value {
        json!({
            "payout_type": "validator_reward",
            "recipient": RECIPIENT,
            "amount": amount,
            "priority": "high",
        })
    }

    #[tokio::test]
    async fn test_create_and_approve_round_trip() {
        let app = app().await;

        let (status, created) = send(&app, Method::POST, "/api/v1/payouts", Some("bot"), Some(payout("150"))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "pending");
        assert_eq!(created["requested_by"], "bot");
        assert_eq!(created["currency"], "GTT");
        let id = created["id"].as_str().unwrap().to_string();

        let approve = format!("/api/v1/payouts/{}/approve", id);
        let (status, first) = send(&app, Method::POST, &approve, Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first, json!({ "approved": false, "required": 2, "current": 1 }));

        let (status, dup) = send(&app, Method::POST, &approve, Some("alice"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(dup["error_code"], "DUPLICATE_APPROVAL");

        let (_, second) = send(&app, Method::POST, &approve, Some("bob"), Some(json!({ "signature": "AQID" }))).await;
        assert_eq!(second["approved"], true);

        let (status, fetched) = send(&app, Method::GET, &format!("/api/v1/payouts/{}", id), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["status"], "approved");
        assert_eq!(fetched["approvals"][1]["signature"], "AQID");
    }

    #[tokio::test]
    async fn test_validation_and_identity_errors() {
        let app = app().await;

        let (status, _) = send(&app, Method::POST, "/api/v1/payouts", None, Some(payout("10"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let mut bad = payout("-5");
        bad["recipient"] = json!("alice");
        let (status, body) = send(&app, Method::POST, "/api/v1/payouts", Some("bot"), Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_code"], "VALIDATION_ERROR");
        assert_eq!(body["details"]["violations"].as_array().unwrap().len(), 2);

        let (status, _) = send(&app, Method::GET, "/api/v1/payouts?limit=0", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/api/v1/payouts/{}/cancel", Uuid::new_v4()),
            Some("ops"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error_code"], "NOT_FOUND");

        let (status, _) = send(&app, Method::POST, "/api/v1/batches", Some("ops"), Some(json!({ "request_ids": [] }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_drain_approve_and_execute_batch() {
        let app = app().await;

        let (_, created) = send(&app, Method::POST, "/api/v1/payouts", Some("bot"), Some(payout("40"))).await;
        let id = created["id"].as_str().unwrap().to_string();
        send(&app, Method::POST, &format!("/api/v1/payouts/{}/approve", id), Some("alice"), None).await;

        let (status, report) = send(&app, Method::POST, "/api/v1/drain", Some("ops"), Some(json!({ "currency": "GTT" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["plan"]["selected"].as_array().unwrap().len(), 1);
        let batch_id = report["batches"][0]["id"].as_str().unwrap().to_string();

        let (status, _) = send(&app, Method::POST, &format!("/api/v1/batches/{}/execute", batch_id), Some("signer"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, approval) = send(&app, Method::POST, &format!("/api/v1/batches/{}/approve", batch_id), Some("alice"), None).await;
        assert_eq!(approval["approved"], true);

        let (status, outcome) = send(&app, Method::POST, &format!("/api/v1/batches/{}/execute", batch_id), Some("signer"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["success"], true);
        assert!(outcome["tx_ref"].as_str().unwrap().starts_with("0x"));

        let (_, stats) = send(&app, Method::GET, "/api/v1/stats", None, None).await;
        assert_eq!(stats["total_requests"], 1);
        assert_eq!(stats["success_rate"], 1.0);

        let (status, list) = send(&app, Method::GET, "/api/v1/payouts?status=completed", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["requests"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_health() {
        let app = app().await;
        let (status, body) = send(&app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ledger_currencies"], json!(["GTT"]));
    }
}
