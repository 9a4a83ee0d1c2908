use serde::{Deserialize, Serialize};

/// Subscription tier. Drives the per-tenant default concurrent-call limit
/// enforced by [`crate::tenant_counter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Plan {
	Payg,
	Starter,
	Pro,
	Enterprise,
}

impl Plan {
	/// Default concurrent-call ceiling for this plan, before any
	/// tenant-specific override is applied.
	#[must_use]
	pub const fn default_limit(self) -> u32 {
		match self {
			Self::Payg | Self::Starter => 1,
			Self::Pro => 3,
			Self::Enterprise => 10,
		}
	}

	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Payg => "PAYG",
			Self::Starter => "STARTER",
			Self::Pro => "PRO",
			Self::Enterprise => "ENTERPRISE",
		}
	}
}

impl std::fmt::Display for Plan {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Resolves the limit that actually applies to a tenant: the per-tenant
/// override when present, else the plan default.
#[must_use]
pub const fn effective_limit(plan: Plan, override_limit: Option<u32>) -> u32 {
	match override_limit {
		Some(limit) => limit,
		None => plan.default_limit(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_plan_table() {
		assert_eq!(Plan::Payg.default_limit(), 1);
		assert_eq!(Plan::Starter.default_limit(), 1);
		assert_eq!(Plan::Pro.default_limit(), 3);
		assert_eq!(Plan::Enterprise.default_limit(), 10);
	}

	#[test]
	fn override_supersedes_default() {
		assert_eq!(effective_limit(Plan::Pro, Some(7)), 7);
		assert_eq!(effective_limit(Plan::Pro, None), 3);
		assert_eq!(effective_limit(Plan::Enterprise, Some(0)), 0);
	}
}
