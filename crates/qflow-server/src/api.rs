//! HTTP routes.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use qflow_core::{CounterId, Requester, Ticket, TicketId, TopicId};
use qflow_engine::{CounterQueue, Dispatch, Dispatcher, EngineError, Reservation};
use qflow_hub::{serve_viewer, ConnectionLimiter, HubHandle};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::{bearer_token, IdentityVerifier};
use crate::error::{AppError, AppResult};

/// Shared state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub hub: HubHandle,
    pub limiter: Arc<ConnectionLimiter>,
    pub verifier: Arc<dyn IdentityVerifier>,
}

/// Success envelope: `{message: "success", data}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub message: &'static str,
    pub data: T,
}

fn success<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        message: "success",
        data,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveRequest {
    pub topic: i64,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallRequest {
    pub counter: i64,
}

#[derive(Debug, Deserialize)]
pub struct CounterParam {
    pub counter: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameParams {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/queues", post(reserve).get(counter_queue))
        .route("/api/v1/queues/mine", get(requester_ticket))
        .route(
            "/api/v1/queues/{id}",
            get(get_ticket).put(call_ticket).delete(delete_ticket),
        )
        .route("/api/v1/queues/{id}/feedback", post(submit_feedback))
        .route("/api/v1/counters/{id}/recall", post(recall))
        .route("/ws", get(ws_handler))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Walk-in when both names are given, otherwise the bearer identity.
async fn resolve_requester(
    state: &AppState,
    headers: &HeaderMap,
    body: &ReserveRequest,
) -> AppResult<Requester> {
    if let (Some(first_name), Some(last_name)) = (&body.first_name, &body.last_name) {
        return Requester::walk_in(first_name, last_name)
            .map_err(|e| AppError::Engine(e.into()));
    }
    let token = bearer_token(headers)?;
    let claims = state.verifier.verify(token).await?;
    Requester::from_claims(claims).map_err(|e| AppError::Engine(e.into()))
}

async fn reserve(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ReserveRequest>, JsonRejection>,
) -> AppResult<Json<ApiResponse<Reservation>>> {
    let Json(body) = body.map_err(|_| AppError::BadRequest("Invalid topic".to_string()))?;
    if body.topic <= 0 {
        return Err(AppError::BadRequest("Invalid topic".to_string()));
    }
    let requester = resolve_requester(&state, &headers, &body).await?;
    let reservation = state
        .dispatcher
        .reserve(TopicId(body.topic), requester, body.note)
        .await?;
    Ok(success(reservation))
}

async fn call_ticket(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Result<Json<CallRequest>, JsonRejection>,
) -> AppResult<Json<ApiResponse<Dispatch>>> {
    let Json(body) = body.map_err(|_| AppError::BadRequest("Invalid request body".to_string()))?;
    let dispatch = state
        .dispatcher
        .call(TicketId(id), CounterId(body.counter))
        .await?;
    Ok(success(dispatch))
}

async fn get_ticket(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<Ticket>>> {
    Ok(success(state.dispatcher.ticket(TicketId(id)).await?))
}

async fn delete_ticket(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<Ticket>>> {
    Ok(success(state.dispatcher.delete(TicketId(id)).await?))
}

async fn submit_feedback(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<Ticket>>> {
    Ok(success(state.dispatcher.submit_feedback(TicketId(id)).await?))
}

async fn recall(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<Ticket>>> {
    Ok(success(state.dispatcher.recall(CounterId(id)).await?))
}

async fn counter_queue(
    State(state): State<AppState>,
    Query(params): Query<CounterParam>,
) -> AppResult<Json<ApiResponse<CounterQueue>>> {
    let counter = params
        .counter
        .as_deref()
        .and_then(|c| c.parse::<i64>().ok())
        .ok_or_else(|| AppError::BadRequest("Counter must be a valid integer".to_string()))?;
    Ok(success(state.dispatcher.counter_queue(CounterId(counter)).await?))
}

async fn requester_ticket(
    State(state): State<AppState>,
    Query(params): Query<NameParams>,
) -> AppResult<Json<ApiResponse<Reservation>>> {
    let (Some(first_name), Some(last_name)) = (params.first_name, params.last_name) else {
        return Err(AppError::BadRequest(
            "Missing required parameters: firstName and lastName".to_string(),
        ));
    };
    let found = state
        .dispatcher
        .requester_ticket(&first_name, &last_name)
        .await?;
    found
        .map(success)
        .ok_or_else(|| EngineError::not_found("waiting ticket for", format!("{first_name} {last_name}")).into())
}

async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let Some(guard) = state.limiter.try_acquire() else {
        warn!(
            current = state.limiter.current_count(),
            max = state.limiter.max(),
            "Viewer connection limit reached"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    };
    info!(connections = state.limiter.current_count(), "New viewer connection");

    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| serve_viewer(socket, hub, guard))
}

async fn metrics() -> AppResult<Response> {
    let body = qflow_telemetry::render()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": if state.hub.is_closed() { "degraded" } else { "ok" },
        "viewers": state.limiter.current_count(),
    }))
}
