use crate::analysis_hook::{AnalysisHook, CallAnalysisJob};
use crate::batch_sink::{BatchCallEvent, BatchEventSink};
use crate::error::WebhookError;
use crate::model::{
	CallEndedBody, CallEndedResponse, CallStartedAdmitted, CallStartedBody, CallStartedCapacityExceeded, CallStartedResponse, CallStartedRejected, EventMetadata, Usage,
};
use crate::signature;
use crate::tenant_directory::{InboundAssistant, TenantDirectory};
use admission_controller::{AdmissionController, AdmissionError};
use call_registry::{Direction, SessionRepository, SessionStatus, WebhookEventRepository};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Accepts the three provider-facing lifecycle events and dispatches them
/// through the admission controller (spec §4.5). Owns signature
/// verification, the idempotency ledger, tenant resolution, and the
/// inbound/outbound branch in spec §4.5 point 3 — the per-call state
/// machine itself lives in [`admission_controller::AdmissionController`].
pub struct WebhookProcessor {
	controller: AdmissionController,
	sessions: SessionRepository,
	events: WebhookEventRepository,
	directory: Arc<dyn TenantDirectory>,
	batch_sink: Arc<dyn BatchEventSink>,
	analysis_hook: Arc<dyn AnalysisHook>,
	provider_webhook_secret: Option<String>,
	phone_inbound_enabled: bool,
	analysis_timeout: Duration,
	/// Dev-mode escape hatch (spec §4.5 point 1: "In production, absence of
	/// the shared secret is a hard failure; in development it MAY be
	/// bypassed"). Never set this in a production deployment — it is what
	/// lets a developer exercise the webhook routes locally without
	/// `PROVIDER_WEBHOOK_SECRET` configured.
	allow_missing_signature: bool,
}

impl WebhookProcessor {
	#[must_use]
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		controller: AdmissionController,
		sessions: SessionRepository,
		events: WebhookEventRepository,
		directory: Arc<dyn TenantDirectory>,
		batch_sink: Arc<dyn BatchEventSink>,
		analysis_hook: Arc<dyn AnalysisHook>,
		provider_webhook_secret: Option<String>,
		phone_inbound_enabled: bool,
		analysis_timeout: Duration,
		allow_missing_signature: bool,
	) -> Self {
		Self {
			controller,
			sessions,
			events,
			directory,
			batch_sink,
			analysis_hook,
			provider_webhook_secret,
			phone_inbound_enabled,
			analysis_timeout,
			allow_missing_signature,
		}
	}

	fn verify(&self, raw_body: &[u8], signature_header: Option<&str>, now_unix_secs: i64) -> Result<(), WebhookError> {
		let Some(secret) = self.provider_webhook_secret.as_deref() else {
			return if self.allow_missing_signature {
				warn!("PROVIDER_WEBHOOK_SECRET is not configured; accepting an unsigned webhook because dev-mode signature bypass is enabled");
				Ok(())
			} else {
				Err(WebhookError::MissingSecret)
			};
		};
		let header = signature_header.ok_or(WebhookError::MalformedSignatureHeader)?;
		signature::verify(secret, header, raw_body, now_unix_secs)
	}

	async fn resolve_tenant(&self, metadata: &EventMetadata, agent_id: Option<&str>) -> Result<Option<i64>, WebhookError> {
		if let Some(tenant_id) = metadata.tenant_id {
			return Ok(Some(tenant_id));
		}

		if let Some(agent_id) = agent_id {
			if let Some(tenant_id) = self.directory.tenant_for_agent(agent_id).await? {
				return Ok(Some(tenant_id));
			}
		}

		let called_number = metadata.phone_call.as_ref().and_then(|p| p.external_number.as_deref().or(p.agent_phone_number_id.as_deref()));
		if let Some(number) = called_number {
			if let Some(tenant_id) = self.directory.tenant_for_phone_number(number).await? {
				return Ok(Some(tenant_id));
			}
		}

		Ok(None)
	}

	/// Handles `…/call-started` for both directions (spec §4.5 point 3,
	/// §6).
	///
	/// # Errors
	/// Returns [`WebhookError`] on signature failure, a malformed body, an
	/// unresolved outbound tenant, or any admission error other than the
	/// capacity class (which is folded into
	/// [`CallStartedResponse::CapacityExceeded`]).
	pub async fn handle_call_started(&self, raw_body: &[u8], signature_header: Option<&str>, now_unix_secs: i64) -> Result<CallStartedResponse, WebhookError> {
		self.verify(raw_body, signature_header, now_unix_secs)?;
		let body: CallStartedBody = serde_json::from_slice(raw_body)?;
		let call_id = body.conversation_id.clone();

		let direction = body.metadata.phone_call.as_ref().map_or(Direction::Outbound, |p| Direction::parse(&p.direction));

		if direction == Direction::Inbound {
			return self.handle_inbound_call_started(&body, &call_id).await;
		}

		let tenant_id = self.resolve_tenant(&body.metadata, body.agent_id.as_deref()).await?.ok_or(WebhookError::UnresolvedTenant)?;
		let fresh = self.events.record_if_new(Some(tenant_id), "call-started", &call_id).await?;
		if !fresh {
			info!(call_id, tenant_id, "duplicate call-started webhook, acknowledging without side effects");
			return self.admitted_from_existing(&call_id).await;
		}

		self.acquire_and_respond(tenant_id, call_id, Direction::Outbound, &body.metadata).await
	}

	async fn handle_inbound_call_started(&self, body: &CallStartedBody, call_id: &str) -> Result<CallStartedResponse, WebhookError> {
		let Some(phone_call) = body.metadata.phone_call.as_ref() else {
			return Ok(CallStartedResponse::Rejected(CallStartedRejected {
				error: "NO_INBOUND_ASSISTANT",
				action: "reject_call",
			}));
		};
		let Some(agent_phone_number_id) = phone_call.agent_phone_number_id.as_deref() else {
			return Ok(CallStartedResponse::Rejected(CallStartedRejected {
				error: "NO_INBOUND_ASSISTANT",
				action: "reject_call",
			}));
		};

		let tenant_id = match self.directory.inbound_assistant_for(agent_phone_number_id).await? {
			InboundAssistant::NotConfigured => {
				return Ok(CallStartedResponse::Rejected(CallStartedRejected {
					error: "NO_INBOUND_ASSISTANT",
					action: "reject_call",
				}));
			}
			InboundAssistant::Inactive => {
				return Ok(CallStartedResponse::Rejected(CallStartedRejected {
					error: "INBOUND_ASSISTANT_INACTIVE",
					action: "reject_call",
				}));
			}
			InboundAssistant::Active { tenant_id } => tenant_id,
		};

		if !self.phone_inbound_enabled {
			let plan = self.controller.tenant_status(tenant_id).await?.map_or(concurrency_core::Plan::Payg, |t| t.plan);
			if let Err(err) = self
				.controller
				.record_rejected(tenant_id, call_id, plan, Direction::Inbound, SessionStatus::TerminatedDisabled, serde_json::json!({"reason": "phone_inbound_disabled"}))
				.await
			{
				warn!(call_id, tenant_id, error = %err, "failed to persist terminated_disabled session");
			}
			return Ok(CallStartedResponse::Rejected(CallStartedRejected {
				error: "PHONE_INBOUND_DISABLED",
				action: "reject_call",
			}));
		}

		let fresh = self.events.record_if_new(Some(tenant_id), "call-started", call_id).await?;
		if !fresh {
			info!(call_id, tenant_id, "duplicate inbound call-started webhook, acknowledging without side effects");
			return self.admitted_from_existing(call_id).await;
		}

		self.acquire_and_respond(tenant_id, call_id.to_string(), Direction::Inbound, &body.metadata).await
	}

	async fn acquire_and_respond(&self, tenant_id: i64, call_id: String, direction: Direction, event_metadata: &EventMetadata) -> Result<CallStartedResponse, WebhookError> {
		let metadata = serde_json::to_value(event_metadata).unwrap_or(serde_json::Value::Null);
		match self.controller.acquire(tenant_id, Some(call_id.clone()), direction, metadata.clone()).await {
			Ok(outcome) => {
				self.dispatch_batch_in_progress(event_metadata, &call_id, direction).await;
				Ok(CallStartedResponse::Admitted(CallStartedAdmitted {
					success: true,
					active_calls: outcome.active_calls,
					limit: outcome.limit,
				}))
			}
			Err(AdmissionError::GlobalCapacityExceeded { current, limit, retry_after_ms }) => {
				self.persist_capacity_rejection(tenant_id, &call_id, direction, metadata).await;
				Ok(CallStartedResponse::CapacityExceeded(CallStartedCapacityExceeded {
					error: "CAPACITY_EXCEEDED",
					current_active: current,
					limit,
					retry_after_ms,
				}))
			}
			Err(AdmissionError::BusinessConcurrentLimitExceeded { current, limit, retry_after_ms, .. }) => {
				self.persist_capacity_rejection(tenant_id, &call_id, direction, metadata).await;
				Ok(CallStartedResponse::CapacityExceeded(CallStartedCapacityExceeded {
					error: "CAPACITY_EXCEEDED",
					current_active: i64::from(current),
					limit: i64::from(limit),
					retry_after_ms,
				}))
			}
			Err(other) => Err(other.into()),
		}
	}

	/// Propagates a live `call-started` admission to C7 (spec §4.7: "on each
	/// `call-started` / `call-ended` event whose metadata carries
	/// `batch_call_id` + `recipient_id`, the aggregator updates the
	/// recipient's status"). A call that's merely started is `in_progress`,
	/// not settled — `ended`/`succeeded` are only meaningful once the call
	/// has actually ended.
	async fn dispatch_batch_in_progress(&self, event_metadata: &EventMetadata, call_id: &str, direction: Direction) {
		let Some(batch) = &event_metadata.batch_call else { return };
		self.batch_sink
			.on_call_event(BatchCallEvent {
				batch_call_id: Some(batch.batch_call_id.clone()),
				recipient_id: batch.recipient_id.clone(),
				external_phone_number: event_metadata.phone_call.as_ref().and_then(|p| p.external_number.clone()),
				call_id: call_id.to_string(),
				direction,
				ended: false,
				succeeded: false,
			})
			.await;
	}

	async fn persist_capacity_rejection(&self, tenant_id: i64, call_id: &str, direction: Direction, metadata: serde_json::Value) {
		let plan = match self.controller.tenant_status(tenant_id).await {
			Ok(Some(tenant)) => tenant.plan,
			_ => concurrency_core::Plan::Payg,
		};
		if let Err(err) = self.controller.record_rejected(tenant_id, call_id, plan, direction, SessionStatus::TerminatedCapacity, metadata).await {
			warn!(call_id, tenant_id, error = %err, "failed to persist terminated_capacity session");
		}
	}

	async fn admitted_from_existing(&self, call_id: &str) -> Result<CallStartedResponse, WebhookError> {
		let Some(session) = self.sessions.get(call_id).await? else {
			return Ok(CallStartedResponse::Admitted(CallStartedAdmitted {
				success: true,
				active_calls: 0,
				limit: 0,
			}));
		};
		let tenant = self.controller.tenant_status(session.tenant_id).await?;
		let limit = tenant.as_ref().map_or(0, concurrency_core::TenantSubscription::effective_limit);
		let active_calls = tenant.map_or(0, |t| u32::try_from(t.active_calls.max(0)).unwrap_or(0));
		Ok(CallStartedResponse::Admitted(CallStartedAdmitted { success: true, active_calls, limit }))
	}

	/// Handles `…/call-ended` (spec §4.5 point 3, §6). `…/post-call` is the
	/// same semantic event under a different route name (spec §6) and
	/// should be wired to this same method by the gateway.
	///
	/// # Errors
	/// Returns [`WebhookError`] on signature failure or a malformed body.
	/// Release-path failures in C1/C2/C3 are logged, not propagated (spec
	/// §4.4 `Release` algorithm, step 3).
	pub async fn handle_call_ended(&self, raw_body: &[u8], signature_header: Option<&str>, now_unix_secs: i64) -> Result<CallEndedResponse, WebhookError> {
		self.verify(raw_body, signature_header, now_unix_secs)?;
		let body: CallEndedBody = serde_json::from_slice(raw_body)?;
		let call_id = body.conversation_id.clone();

		let tenant_id = self.resolve_tenant(&body.metadata, body.agent_id.as_deref()).await?;
		let fresh = self.events.record_if_new(tenant_id, "call-ended", &call_id).await?;

		let direction = body.metadata.phone_call.as_ref().map_or(Direction::Outbound, |p| Direction::parse(&p.direction));

		if fresh {
			match self.sessions.get(&call_id).await? {
				Some(session) if !session.status.is_terminal() => {
					self.controller.release(session.tenant_id, &call_id, SessionStatus::Ended).await;
				}
				Some(_) => {
					info!(call_id, "call-ended received for an already-terminal session, ignoring");
				}
				None => {
					warn!(call_id, "call-ended with no matching call-started, releasing counters defensively only");
					if let Some(tenant_id) = tenant_id {
						self.controller.release(tenant_id, &call_id, SessionStatus::Ended).await;
					}
				}
			}

			if let Some(batch) = &body.metadata.batch_call {
				self.batch_sink
					.on_call_event(BatchCallEvent {
						batch_call_id: Some(batch.batch_call_id.clone()),
						recipient_id: batch.recipient_id.clone(),
						external_phone_number: body.metadata.phone_call.as_ref().and_then(|p| p.external_number.clone()),
						call_id: call_id.clone(),
						direction,
						ended: true,
						succeeded: true,
					})
					.await;
			}

			self.dispatch_analysis(&call_id, body.transcript.clone(), body.analysis.clone());
		} else {
			info!(call_id, "duplicate call-ended webhook, acknowledging without side effects");
		}

		let duration_secs = body.data.metadata.call_duration_secs.unwrap_or(0).max(0);
		#[allow(clippy::cast_precision_loss)]
		let duration_minutes = duration_secs as f64 / 60.0;

		Ok(CallEndedResponse {
			success: true,
			usage: Usage { duration_minutes, source: "package" },
		})
	}

	fn dispatch_analysis(&self, call_id: &str, transcript: Option<String>, analysis: Option<serde_json::Value>) {
		if transcript.is_none() && analysis.is_none() {
			return;
		}
		let hook = Arc::clone(&self.analysis_hook);
		let job = CallAnalysisJob {
			call_id: call_id.to_string(),
			transcript,
			analysis,
		};
		let timeout = self.analysis_timeout;
		tokio::spawn(async move {
			if tokio::time::timeout(timeout, hook.run(job)).await.is_err() {
				warn!("off-critical-path call analysis timed out");
			}
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::analysis_hook::NoopAnalysisHook;
	use crate::batch_sink::NoopBatchEventSink;
	use crate::tenant_directory::SqlTenantDirectory;
	use call_registry::schema;
	use concurrency_core::{GlobalCapacityStore, TenantCounter};
	use sqlx::sqlite::SqlitePoolOptions;

	const SECRET: &str = "test-secret";

	fn sign(secret: &str, now: i64, body: &[u8]) -> String {
		use hmac::{Hmac, Mac};
		use sha2::Sha256;
		let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
		mac.update(now.to_string().as_bytes());
		mac.update(b".");
		mac.update(body);
		format!("t={now},v0={}", hex::encode(mac.finalize().into_bytes()))
	}

	async fn processor_with_tenant(tenant_id: i64, limit: Option<i64>) -> Option<WebhookProcessor> {
		processor_with_tenant_opts(tenant_id, limit, Some(SECRET.to_string()), false).await
	}

	async fn processor_with_tenant_opts(
		tenant_id: i64,
		limit: Option<i64>,
		provider_webhook_secret: Option<String>,
		allow_missing_signature: bool,
	) -> Option<WebhookProcessor> {
		let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
		schema::init_schema(&pool).await.unwrap();

		let tenants = TenantCounter::new(pool.clone());
		tenants.init_schema().await.unwrap();
		sqlx::query("INSERT INTO tenant_subscriptions (tenant_id, plan, status, concurrent_limit, active_calls) VALUES (?, 'PRO', 'ACTIVE', ?, 0)")
			.bind(tenant_id)
			.bind(limit)
			.execute(&pool)
			.await
			.unwrap();

		let sessions = SessionRepository::new(pool.clone());
		let events = WebhookEventRepository::new(pool.clone());

		let url = std::env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
		let global = GlobalCapacityStore::new(&url, 5).await.ok()?;
		global.force_reset().await.ok()?;

		let directory = SqlTenantDirectory::new(pool.clone());
		directory.init_schema().await.unwrap();

		let controller = AdmissionController::new(global, tenants, sessions.clone());

		Some(WebhookProcessor::new(
			controller,
			sessions,
			events,
			Arc::new(directory),
			Arc::new(NoopBatchEventSink),
			Arc::new(NoopAnalysisHook),
			provider_webhook_secret,
			true,
			Duration::from_secs(5),
			allow_missing_signature,
		))
	}

	#[derive(Default)]
	struct SpyBatchEventSink {
		events: std::sync::Mutex<Vec<BatchCallEvent>>,
	}

	#[async_trait::async_trait]
	impl BatchEventSink for SpyBatchEventSink {
		async fn on_call_event(&self, event: BatchCallEvent) {
			self.events.lock().unwrap().push(event);
		}
	}

	async fn processor_with_batch_sink(tenant_id: i64, sink: Arc<SpyBatchEventSink>) -> Option<WebhookProcessor> {
		let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
		schema::init_schema(&pool).await.unwrap();

		let tenants = TenantCounter::new(pool.clone());
		tenants.init_schema().await.unwrap();
		sqlx::query("INSERT INTO tenant_subscriptions (tenant_id, plan, status, concurrent_limit, active_calls) VALUES (?, 'PRO', 'ACTIVE', NULL, 0)")
			.bind(tenant_id)
			.execute(&pool)
			.await
			.unwrap();

		let sessions = SessionRepository::new(pool.clone());
		let events = WebhookEventRepository::new(pool.clone());

		let url = std::env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
		let global = GlobalCapacityStore::new(&url, 5).await.ok()?;
		global.force_reset().await.ok()?;

		let directory = SqlTenantDirectory::new(pool.clone());
		directory.init_schema().await.unwrap();

		let controller = AdmissionController::new(global, tenants, sessions.clone());

		Some(WebhookProcessor::new(
			controller,
			sessions,
			events,
			Arc::new(directory),
			sink,
			Arc::new(NoopAnalysisHook),
			Some(SECRET.to_string()),
			true,
			Duration::from_secs(5),
			false,
		))
	}

	#[tokio::test]
	async fn call_started_with_batch_metadata_marks_the_recipient_in_progress() {
		let sink = Arc::new(SpyBatchEventSink::default());
		let Some(processor) = processor_with_batch_sink(16, Arc::clone(&sink)).await else { return };

		let body = serde_json::json!({
			"conversation_id": "call-batch-1",
			"agent_id": null,
			"metadata": {
				"tenant_id": 16,
				"phone_call": {"direction": "outbound", "external_number": "+15555550100"},
				"batch_call": {"batch_call_id": "batch-1", "recipient_id": "r1"},
			}
		});
		let raw = serde_json::to_vec(&body).unwrap();
		let now = 1_700_000_000_i64;
		let header = sign(SECRET, now, &raw);

		let result = processor.handle_call_started(&raw, Some(&header), now).await.unwrap();
		assert!(matches!(result, CallStartedResponse::Admitted(_)));

		let events = sink.events.lock().unwrap();
		assert_eq!(events.len(), 1);
		assert_eq!(events[0].batch_call_id.as_deref(), Some("batch-1"));
		assert_eq!(events[0].recipient_id.as_deref(), Some("r1"));
		assert!(!events[0].ended);
	}

	#[tokio::test]
	async fn outbound_call_started_is_admitted_and_idempotent() {
		let Some(processor) = processor_with_tenant(11, None).await else { return };
		let body = serde_json::json!({
			"conversation_id": "call-out-1",
			"agent_id": null,
			"metadata": {"tenant_id": 11, "phone_call": {"direction": "outbound"}}
		});
		let raw = serde_json::to_vec(&body).unwrap();
		let now = 1_700_000_000_i64;
		let header = sign(SECRET, now, &raw);

		let first = processor.handle_call_started(&raw, Some(&header), now).await.unwrap();
		assert!(matches!(first, CallStartedResponse::Admitted(_)));

		let second = processor.handle_call_started(&raw, Some(&header), now).await.unwrap();
		assert!(matches!(second, CallStartedResponse::Admitted(_)));
	}

	#[tokio::test]
	async fn invalid_signature_is_rejected() {
		let Some(processor) = processor_with_tenant(12, None).await else { return };
		let raw = b"{}";
		let result = processor.handle_call_started(raw, Some("t=0,v0=deadbeef"), 0).await;
		assert!(matches!(result, Err(WebhookError::TimestampOutOfWindow) | Err(WebhookError::InvalidSignature)));
	}

	#[tokio::test]
	async fn unsigned_webhook_is_accepted_when_bypass_is_enabled() {
		let Some(processor) = processor_with_tenant_opts(14, None, None, true).await else { return };
		let body = serde_json::json!({
			"conversation_id": "call-dev-1",
			"agent_id": null,
			"metadata": {"tenant_id": 14, "phone_call": {"direction": "outbound"}}
		});
		let raw = serde_json::to_vec(&body).unwrap();
		let result = processor.handle_call_started(&raw, None, 1_700_000_000).await;
		assert!(matches!(result, Ok(CallStartedResponse::Admitted(_))));
	}

	#[tokio::test]
	async fn unsigned_webhook_is_rejected_when_bypass_is_disabled() {
		let Some(processor) = processor_with_tenant_opts(15, None, None, false).await else { return };
		let raw = b"{}";
		let result = processor.handle_call_started(raw, None, 1_700_000_000).await;
		assert!(matches!(result, Err(WebhookError::MissingSecret)));
	}

	#[tokio::test]
	async fn call_ended_without_a_start_is_logged_not_errored() {
		let Some(processor) = processor_with_tenant(13, None).await else { return };
		let body = serde_json::json!({
			"conversation_id": "never-started",
			"data": {"metadata": {"call_duration_secs": 30}},
			"metadata": {"tenant_id": 13}
		});
		let raw = serde_json::to_vec(&body).unwrap();
		let now = 1_700_000_000_i64;
		let header = sign(SECRET, now, &raw);

		let response = processor.handle_call_ended(&raw, Some(&header), now).await.unwrap();
		assert!(response.success);
	}
}
