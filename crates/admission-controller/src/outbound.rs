use crate::controller::AdmissionController;
use crate::error::AdmissionError;
use async_trait::async_trait;
use call_registry::{Direction, SessionStatus};
use std::sync::Arc;
use tracing::warn;

/// Average outbound/inbound call duration used to derive `retry_after_ms`
/// on a provider rate-limit, mirroring the same constant's role for the
/// capacity-class errors in `controller.rs`.
const AVERAGE_CALL_DURATION_MS: u64 = 90_000;

/// What the provider's call-placement API reported back, after a slot was
/// already acquired here (spec §7's "Provider rate-limit (HTTP 429) during
/// outbound initiation").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderCallError {
	RateLimited,
	Rejected,
}

/// Port to the upstream voice-agent provider's outbound call-placement API.
/// The provider itself is an external collaborator out of scope for this
/// crate (spec §1) — this trait is its well-defined interface, following the
/// same port-plus-no-op shape as `webhook_processor`'s `AnalysisHook` and
/// `BatchEventSink`.
#[async_trait]
pub trait ProviderClient: Send + Sync + 'static {
	async fn place_call(&self, call_id: &str, tenant_id: i64, metadata: &serde_json::Value) -> Result<(), ProviderCallError>;
}

/// Default binding: the provider always accepts. Real deployments swap in a
/// client that actually calls the provider's HTTP API; that client lives
/// outside this crate's concern, same as the analysis hook and batch sink.
pub struct NoopProviderClient;

#[async_trait]
impl ProviderClient for NoopProviderClient {
	async fn place_call(&self, _call_id: &str, _tenant_id: i64, _metadata: &serde_json::Value) -> Result<(), ProviderCallError> {
		Ok(())
	}
}

/// Successful placement: the `call_id` plus the tenant's observed counters,
/// matching [`crate::controller::AcquireOutcome`]'s shape.
#[derive(Debug, Clone)]
pub struct OutboundCallOutcome {
	pub call_id: String,
	pub active_calls: u32,
	pub limit: u32,
}

/// Implements spec §6's "Outbound admission API" end to end: `Acquire`
/// followed by the actual provider call-placement request, with the
/// provider-429 rollback spec §7 requires. [`AdmissionController`] alone only
/// covers the two-tier slot protocol; this layers the provider round trip
/// and its rollback on top, which is what scenario C in spec §8 exercises.
pub struct OutboundCallService {
	controller: AdmissionController,
	provider: Arc<dyn ProviderClient>,
}

impl OutboundCallService {
	#[must_use]
	pub const fn new(controller: AdmissionController, provider: Arc<dyn ProviderClient>) -> Self {
		Self { controller, provider }
	}

	/// # Errors
	/// Returns the same [`AdmissionError`] taxonomy as
	/// [`AdmissionController::acquire`] for admission-side rejections, plus
	/// [`AdmissionError::ProviderRateLimited`] / [`AdmissionError::ProviderRejected`]
	/// when the slot was acquired but the provider then refused the call —
	/// in both of those cases the slot has already been released by the
	/// time this returns.
	pub async fn start_call(&self, tenant_id: i64, call_id: Option<String>, metadata: serde_json::Value) -> Result<OutboundCallOutcome, AdmissionError> {
		let acquired = self.controller.acquire(tenant_id, call_id, Direction::Outbound, metadata.clone()).await?;

		match self.provider.place_call(&acquired.call_id, tenant_id, &metadata).await {
			Ok(()) => Ok(OutboundCallOutcome {
				call_id: acquired.call_id,
				active_calls: acquired.active_calls,
				limit: acquired.limit,
			}),
			Err(ProviderCallError::RateLimited) => {
				warn!(call_id = %acquired.call_id, tenant_id, "provider rate-limited outbound call placement, releasing the acquired slot");
				self.controller.release(tenant_id, &acquired.call_id, SessionStatus::Ended).await;
				Err(AdmissionError::ProviderRateLimited { retry_after_ms: AVERAGE_CALL_DURATION_MS })
			}
			Err(ProviderCallError::Rejected) => {
				warn!(call_id = %acquired.call_id, tenant_id, "provider rejected outbound call placement, releasing the acquired slot");
				self.controller.release(tenant_id, &acquired.call_id, SessionStatus::Ended).await;
				Err(AdmissionError::ProviderRejected)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use concurrency_core::{GlobalCapacityStore, Plan, TenantCounter};
	use sqlx::sqlite::SqlitePoolOptions;

	struct AlwaysRateLimited;

	#[async_trait]
	impl ProviderClient for AlwaysRateLimited {
		async fn place_call(&self, _call_id: &str, _tenant_id: i64, _metadata: &serde_json::Value) -> Result<(), ProviderCallError> {
			Err(ProviderCallError::RateLimited)
		}
	}

	async fn service_with_tenant(provider: Arc<dyn ProviderClient>) -> Option<(OutboundCallService, i64)> {
		let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
		let tenants = TenantCounter::new(pool.clone());
		tenants.init_schema().await.unwrap();
		let tenant_id = 21;
		sqlx::query("INSERT INTO tenant_subscriptions (tenant_id, plan, status, concurrent_limit, active_calls) VALUES (?, 'PRO', 'ACTIVE', NULL, 0)")
			.bind(tenant_id)
			.execute(&pool)
			.await
			.unwrap();

		call_registry::schema::init_schema(&pool).await.unwrap();
		let sessions = call_registry::SessionRepository::new(pool);

		let url = std::env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
		let global = GlobalCapacityStore::new(&url, 5).await.ok()?;
		global.force_reset().await.ok()?;

		let controller = AdmissionController::new(global, tenants.clone(), sessions);
		Some((OutboundCallService::new(controller, provider), tenant_id))
	}

	#[tokio::test]
	async fn noop_provider_admits_normally() {
		let Some((service, tenant_id)) = service_with_tenant(Arc::new(NoopProviderClient)).await else {
			return;
		};
		let outcome = service.start_call(tenant_id, None, serde_json::json!({})).await.unwrap();
		assert_eq!(outcome.limit, Plan::Pro.default_limit());
	}

	#[tokio::test]
	async fn provider_429_releases_the_acquired_slot() {
		let Some((service, tenant_id)) = service_with_tenant(Arc::new(AlwaysRateLimited)).await else {
			return;
		};

		let result = service.start_call(tenant_id, None, serde_json::json!({})).await;
		assert!(matches!(result, Err(AdmissionError::ProviderRateLimited { .. })));

		// the tenant's budget must not be left permanently consumed by the
		// rejected attempt.
		let second = service.start_call(tenant_id, None, serde_json::json!({})).await;
		assert!(matches!(second, Err(AdmissionError::ProviderRateLimited { .. })));
	}
}
