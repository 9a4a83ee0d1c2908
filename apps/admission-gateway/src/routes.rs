use crate::error::ApiError;
use crate::state::AppState;
use admission_controller::AdmissionError;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::time::{SystemTime, UNIX_EPOCH};
use webhook_processor::CallStartedResponse;

const SIGNATURE_HEADER: &str = "x-provider-signature";

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/healthz", get(healthz))
		.route("/metrics", get(metrics))
		.route("/v1/capacity", get(capacity))
		.route("/webhooks/call-started", post(call_started))
		.route("/webhooks/call-ended", post(call_ended))
		.route("/webhooks/post-call", post(call_ended))
		.route("/v1/outbound-calls", post(start_outbound_call))
		.with_state(state)
}

fn now_unix_secs() -> i64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0).try_into().unwrap_or(0)
}

/// `GET /healthz` — 503 until startup reconciliation has completed so a
/// load balancer never routes traffic into a process holding a cold/wrong
/// C1 counter (spec §2 SUPPLEMENT).
async fn healthz(State(state): State<AppState>) -> StatusCode {
	if state.ready.load(std::sync::atomic::Ordering::SeqCst) {
		StatusCode::OK
	} else {
		StatusCode::SERVICE_UNAVAILABLE
	}
}

/// `GET /metrics` — Prometheus text exposition (spec §9 SUPPLEMENT).
async fn metrics(State(state): State<AppState>) -> Result<String, StatusCode> {
	state.metrics.encode().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// `GET /v1/capacity` — wraps `C1.GlobalStatus` for dashboards (spec §2 SUPPLEMENT).
#[allow(clippy::cast_precision_loss)]
async fn capacity(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
	let snapshot = state.global.global_status().await.map_err(admission_controller::AdmissionError::from)?;
	state.metrics.global_capacity_current.set(snapshot.global_active as f64);
	Ok(Json(serde_json::json!({
		"globalActive": snapshot.global_active,
		"planActive": snapshot.plan_active,
		"activeCallCount": snapshot.active_call_count,
	})))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
	headers.get(name)?.to_str().ok()
}

async fn call_started(State(state): State<AppState>, headers: HeaderMap, body: axum::body::Bytes) -> Result<Response, ApiError> {
	let signature_header = header_str(&headers, SIGNATURE_HEADER);
	let outcome = state.processor.handle_call_started(&body, signature_header, now_unix_secs()).await?;

	Ok(match outcome {
		CallStartedResponse::Admitted(admitted) => {
			state.metrics.admission_acquire_total.with_label_values(&["admitted"]).inc();
			(StatusCode::OK, Json(admitted)).into_response()
		}
		CallStartedResponse::Rejected(rejected) => {
			state.metrics.admission_acquire_total.with_label_values(&["rejected"]).inc();
			(StatusCode::FORBIDDEN, Json(rejected)).into_response()
		}
		CallStartedResponse::CapacityExceeded(capacity) => {
			state.metrics.admission_acquire_total.with_label_values(&["capacity_exceeded"]).inc();
			(StatusCode::TOO_MANY_REQUESTS, Json(capacity)).into_response()
		}
	})
}

async fn call_ended(State(state): State<AppState>, headers: HeaderMap, body: axum::body::Bytes) -> Result<Response, ApiError> {
	let signature_header = header_str(&headers, SIGNATURE_HEADER);
	let outcome = state.processor.handle_call_ended(&body, signature_header, now_unix_secs()).await?;
	state.metrics.admission_release_total.inc();
	Ok((StatusCode::OK, Json(outcome)).into_response())
}

/// Request body for `POST /v1/outbound-calls`, the internal RPC-style
/// "Outbound admission API" from spec §6.
#[derive(Debug, Deserialize)]
pub struct StartOutboundCallRequest {
	pub tenant_id: i64,
	pub call_id: Option<String>,
	#[serde(default)]
	pub metadata: serde_json::Value,
}

/// `POST /v1/outbound-calls` — `Acquire` followed by the actual provider
/// call-placement request. A provider-side HTTP 429 here (spec §7, scenario
/// C in spec §8) rolls the acquired slot back before this responds; that
/// rollback is what distinguishes `provider_429_total` from the
/// `admission_acquire_total{result="capacity_exceeded"}` counted when this
/// system itself never had budget to place the call at all.
async fn start_outbound_call(State(state): State<AppState>, Json(request): Json<StartOutboundCallRequest>) -> Result<Response, ApiError> {
	match state.outbound.start_call(request.tenant_id, request.call_id, request.metadata).await {
		Ok(outcome) => {
			state.metrics.admission_acquire_total.with_label_values(&["admitted"]).inc();
			Ok((
				StatusCode::OK,
				Json(serde_json::json!({
					"success": true,
					"callId": outcome.call_id,
					"activeCalls": outcome.active_calls,
					"limit": outcome.limit,
				})),
			)
				.into_response())
		}
		Err(err @ AdmissionError::ProviderRateLimited { retry_after_ms }) => {
			state.metrics.provider_429_total.inc();
			Ok((
				StatusCode::TOO_MANY_REQUESTS,
				Json(serde_json::json!({
					"error": "PROVIDER_RATE_LIMITED",
					"retryAfterMs": retry_after_ms,
					"message": err.to_string(),
				})),
			)
				.into_response())
		}
		Err(err) => Err(err.into()),
	}
}
