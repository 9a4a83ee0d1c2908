use thiserror::Error;

/// The structured taxonomy returned to callers of [`crate::AdmissionController::acquire`]
/// (spec §4.4, §7). Capacity-class variants carry the observed current/limit
/// and, where meaningful, a `retry_after_ms` hint — they are surfaced to
/// metrics but must never be logged as errors (spec §7).
#[derive(Error, Debug, Clone)]
pub enum AdmissionError {
	#[error("subscription not found for tenant {tenant_id}")]
	SubscriptionNotFound { tenant_id: i64 },

	#[error("subscription for tenant {tenant_id} is not active (status = {status})")]
	SubscriptionInactive { tenant_id: i64, status: String },

	#[error("concurrent calls are disabled for tenant {tenant_id}")]
	ConcurrentCallsDisabled { tenant_id: i64 },

	#[error("global capacity exceeded: {current}/{limit}")]
	GlobalCapacityExceeded { current: i64, limit: i64, retry_after_ms: u64 },

	#[error("tenant {tenant_id} is at its concurrent-call limit: {current}/{limit}")]
	BusinessConcurrentLimitExceeded { tenant_id: i64, current: u32, limit: u32, retry_after_ms: u64 },

	#[error("failed to acquire a global slot after the tenant budget was reserved")]
	GlobalSlotFailed,

	/// The upstream provider rejected outbound call placement with its own
	/// HTTP 429 after a slot was already acquired here (spec §7 "Provider
	/// rate-limit (HTTP 429) during outbound initiation"). The slot has
	/// already been released by the time this is returned.
	#[error("provider rate-limited outbound call placement")]
	ProviderRateLimited { retry_after_ms: u64 },

	/// The provider rejected outbound call placement for a reason other
	/// than rate-limiting. The slot has already been released.
	#[error("provider rejected outbound call placement")]
	ProviderRejected,

	#[error("infrastructure error: {0}")]
	Infrastructure(String),
}

impl AdmissionError {
	/// Whether this is a capacity-class error (spec §7: "surfaced to caller
	/// with retry hint; counted in metrics; never logged as error").
	#[must_use]
	pub const fn is_capacity_error(&self) -> bool {
		matches!(self, Self::GlobalCapacityExceeded { .. } | Self::BusinessConcurrentLimitExceeded { .. } | Self::ConcurrentCallsDisabled { .. })
	}
}

impl From<concurrency_core::Error> for AdmissionError {
	fn from(err: concurrency_core::Error) -> Self {
		Self::Infrastructure(err.to_string())
	}
}

impl From<call_registry::Error> for AdmissionError {
	fn from(err: call_registry::Error) -> Self {
		Self::Infrastructure(err.to_string())
	}
}
