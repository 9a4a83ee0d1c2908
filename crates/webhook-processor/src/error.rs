use thiserror::Error;

/// Protocol- and infrastructure-level failures surfaced by the webhook
/// processor (spec §7 "Protocol" and "Infrastructure" error kinds). Capacity
/// outcomes are not represented here — they come back as ordinary `Ok`
/// responses with a rejection payload, since a provider webhook is always
/// acknowledged with `200`/`403`/`429`, never a 5xx, once the signature
/// checks out.
#[derive(Error, Debug)]
pub enum WebhookError {
	#[error("missing or malformed X-Provider-Signature header")]
	MalformedSignatureHeader,

	#[error("signature timestamp outside the allowed window")]
	TimestampOutOfWindow,

	#[error("signature verification failed")]
	InvalidSignature,

	#[error("PROVIDER_WEBHOOK_SECRET is not configured")]
	MissingSecret,

	#[error("request body could not be parsed: {0}")]
	MalformedBody(#[from] serde_json::Error),

	#[error(transparent)]
	Admission(#[from] admission_controller::AdmissionError),

	#[error(transparent)]
	CallRegistry(#[from] call_registry::Error),

	#[error(transparent)]
	ConcurrencyCore(#[from] concurrency_core::Error),

	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("could not resolve a tenant for this event")]
	UnresolvedTenant,
}
