use serde::{Deserialize, Serialize};

/// `metadata.phone_call.*`, present on every call-lifecycle event (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoneCallMetadata {
	pub direction: String,
	pub external_number: Option<String>,
	pub agent_phone_number_id: Option<String>,
}

/// `metadata.batch_call.*`, present only when the call is part of an
/// outbound campaign (spec §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchCallMetadata {
	pub batch_call_id: String,
	pub recipient_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventMetadata {
	pub tenant_id: Option<i64>,
	pub phone_call: Option<PhoneCallMetadata>,
	pub batch_call: Option<BatchCallMetadata>,
}

/// Wire body for `…/call-started` (spec §6).
#[derive(Debug, Clone, Deserialize)]
pub struct CallStartedBody {
	pub conversation_id: String,
	pub agent_id: Option<String>,
	#[serde(default)]
	pub metadata: EventMetadata,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CallEndedData {
	#[serde(default)]
	pub metadata: CallEndedDataMetadata,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CallEndedDataMetadata {
	pub call_duration_secs: Option<i64>,
}

/// Wire body for `…/call-ended` (and its `…/post-call` alias — spec §6
/// calls that route "an alternative form of the same semantic event").
#[derive(Debug, Clone, Deserialize)]
pub struct CallEndedBody {
	pub conversation_id: String,
	pub agent_id: Option<String>,
	#[serde(default)]
	pub data: CallEndedData,
	pub transcript: Option<String>,
	pub analysis: Option<serde_json::Value>,
	#[serde(default)]
	pub metadata: EventMetadata,
}

/// `200 {success, usage: {durationMinutes, source}}` (spec §6).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
	pub duration_minutes: f64,
	pub source: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallEndedResponse {
	pub success: bool,
	pub usage: Usage,
}

/// `200 {success, activeCalls, limit}` on admit (spec §6).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStartedAdmitted {
	pub success: bool,
	pub active_calls: u32,
	pub limit: u32,
}

/// `403 {error, action: "reject_call"}` (spec §6).
#[derive(Debug, Clone, Serialize)]
pub struct CallStartedRejected {
	pub error: &'static str,
	pub action: &'static str,
}

/// `429 {error, currentActive, limit, retry_after_ms}` (spec §6).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStartedCapacityExceeded {
	pub error: &'static str,
	pub current_active: i64,
	pub limit: i64,
	pub retry_after_ms: u64,
}

/// The three shapes a `…/call-started` response can take, dispatched to the
/// matching HTTP status by the gateway's handler.
#[derive(Debug, Clone)]
pub enum CallStartedResponse {
	Admitted(CallStartedAdmitted),
	Rejected(CallStartedRejected),
	CapacityExceeded(CallStartedCapacityExceeded),
}
