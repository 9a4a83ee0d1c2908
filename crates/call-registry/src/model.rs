use chrono::{DateTime, Utc};
use concurrency_core::Plan;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
	Inbound,
	Outbound,
}

impl Direction {
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Inbound => "inbound",
			Self::Outbound => "outbound",
		}
	}

	#[must_use]
	pub fn parse(raw: &str) -> Self {
		if raw.eq_ignore_ascii_case("inbound") {
			Self::Inbound
		} else {
			Self::Outbound
		}
	}
}

/// A call's lifecycle state. `Active` is the only non-terminal state; every
/// transition out of a terminal state is ignored (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
	Active,
	Ended,
	TerminatedCapacity,
	TerminatedDisabled,
}

impl SessionStatus {
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Active => "active",
			Self::Ended => "ended",
			Self::TerminatedCapacity => "terminated_capacity",
			Self::TerminatedDisabled => "terminated_disabled",
		}
	}

	#[must_use]
	pub const fn is_terminal(self) -> bool {
		!matches!(self, Self::Active)
	}

	#[must_use]
	pub fn parse(raw: &str) -> Self {
		match raw {
			"ended" => Self::Ended,
			"terminated_capacity" => Self::TerminatedCapacity,
			"terminated_disabled" => Self::TerminatedDisabled,
			_ => Self::Active,
		}
	}
}

/// One row per admitted call attempt (C2, spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
	pub call_id: String,
	pub tenant_id: i64,
	pub plan: Plan,
	pub direction: Direction,
	pub status: SessionStatus,
	pub started_at: DateTime<Utc>,
	pub ended_at: Option<DateTime<Utc>>,
	pub metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct NewSession {
	pub call_id: String,
	pub tenant_id: i64,
	pub plan: Plan,
	pub direction: Direction,
	pub status: SessionStatus,
	pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
	Pending,
	InProgress,
	Completed,
	Failed,
}

impl RecipientStatus {
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::InProgress => "in_progress",
			Self::Completed => "completed",
			Self::Failed => "failed",
		}
	}

	#[must_use]
	pub fn parse(raw: &str) -> Self {
		match raw {
			"in_progress" => Self::InProgress,
			"completed" => Self::Completed,
			"failed" => Self::Failed,
			_ => Self::Pending,
		}
	}

	#[must_use]
	pub const fn is_settled(self) -> bool {
		matches!(self, Self::Completed | Self::Failed)
	}
}

/// One outbound recipient within a batch call (C7, spec §3, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
	pub recipient_id: String,
	pub external_phone_number: String,
	pub status: RecipientStatus,
	pub call_id: Option<String>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BatchStatus {
	Pending,
	InProgress,
	Completed,
}

impl BatchStatus {
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "PENDING",
			Self::InProgress => "IN_PROGRESS",
			Self::Completed => "COMPLETED",
		}
	}

	#[must_use]
	pub fn parse(raw: &str) -> Self {
		match raw {
			"IN_PROGRESS" => Self::InProgress,
			"COMPLETED" => Self::Completed,
			_ => Self::Pending,
		}
	}
}

/// A campaign of outbound recipients tracked as a single aggregate
/// (C7, spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchCall {
	pub batch_id: String,
	pub status: BatchStatus,
	pub recipients: Vec<Recipient>,
	pub completed: i64,
	pub failed: i64,
	pub successful: i64,
	pub completed_at: Option<DateTime<Utc>>,
}
