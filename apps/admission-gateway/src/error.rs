use axum::body::Body;
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

/// HTTP-facing error, wrapping `admission_controller::AdmissionError` and
/// `webhook_processor::WebhookError` behind a single `IntoResponse` (spec
/// §7), following `nest::http::error::Error`'s `status_code()` +
/// `IntoResponse` split — including its logging-on-response side effect for
/// infrastructure-class errors, withheld for capacity-class ones per spec
/// §7's "never logged as error" instruction.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
	#[error(transparent)]
	Admission(#[from] admission_controller::AdmissionError),

	#[error(transparent)]
	Webhook(#[from] webhook_processor::WebhookError),

	#[error("request path not found")]
	NotFound,
}

impl ApiError {
	const fn status_code(&self) -> StatusCode {
		match self {
			Self::Admission(err) => admission_status_code(err),
			Self::Webhook(err) => webhook_status_code(err),
			Self::NotFound => StatusCode::NOT_FOUND,
		}
	}
}

const fn admission_status_code(err: &admission_controller::AdmissionError) -> StatusCode {
	use admission_controller::AdmissionError as E;
	match err {
		E::GlobalCapacityExceeded { .. } | E::BusinessConcurrentLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
		E::ConcurrentCallsDisabled { .. } | E::SubscriptionInactive { .. } => StatusCode::FORBIDDEN,
		E::SubscriptionNotFound { .. } => StatusCode::NOT_FOUND,
		E::GlobalSlotFailed | E::Infrastructure(_) | E::ProviderRejected => StatusCode::INTERNAL_SERVER_ERROR,
		E::ProviderRateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
	}
}

const fn webhook_status_code(err: &webhook_processor::WebhookError) -> StatusCode {
	use webhook_processor::WebhookError as E;
	match err {
		E::MalformedSignatureHeader | E::InvalidSignature | E::TimestampOutOfWindow => StatusCode::UNAUTHORIZED,
		E::MissingSecret => StatusCode::INTERNAL_SERVER_ERROR,
		E::MalformedBody(_) => StatusCode::BAD_REQUEST,
		E::UnresolvedTenant => StatusCode::BAD_REQUEST,
		E::Admission(inner) => admission_status_code(inner),
		E::CallRegistry(_) | E::ConcurrencyCore(_) | E::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response<Body> {
		let is_capacity_error = matches!(&self, Self::Admission(err) if err.is_capacity_error())
			|| matches!(&self, Self::Webhook(webhook_processor::WebhookError::Admission(err)) if err.is_capacity_error());

		if !is_capacity_error {
			match &self {
				Self::Admission(err) => tracing::error!(error = %err, "admission error"),
				Self::Webhook(err) => tracing::error!(error = %err, "webhook processing error"),
				Self::NotFound => {}
			}
		}

		(self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
	}
}
