use crate::error::Error;
use crate::plan::{effective_limit, Plan};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// A tenant's subscription row (C3), as read by the admission controller
/// before it attempts a conditional increment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSubscription {
	pub tenant_id: i64,
	pub plan: Plan,
	pub status: String,
	pub concurrent_limit: Option<i64>,
	pub active_calls: i64,
}

impl TenantSubscription {
	#[must_use]
	pub fn is_active(&self) -> bool {
		matches!(self.status.as_str(), "ACTIVE" | "TRIAL")
	}

	#[must_use]
	pub fn effective_limit(&self) -> u32 {
		effective_limit(self.plan, self.concurrent_limit.map(|l| l.max(0) as u32))
	}
}

/// Per-tenant active-call counter (C3), mutated only through conditional
/// `UPDATE ... WHERE active_calls < limit` statements so that concurrent
/// acquires for the same tenant never overshoot its budget.
#[derive(Clone)]
pub struct TenantCounter {
	pool: SqlitePool,
}

impl TenantCounter {
	#[must_use]
	pub const fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// # Errors
	/// Returns an error on a database failure.
	pub async fn init_schema(&self) -> Result<(), Error> {
		sqlx::query(
			r"
			CREATE TABLE IF NOT EXISTS tenant_subscriptions (
				tenant_id INTEGER PRIMARY KEY,
				plan TEXT NOT NULL,
				status TEXT NOT NULL,
				concurrent_limit INTEGER,
				active_calls INTEGER NOT NULL DEFAULT 0
			)
			",
		)
		.execute(&self.pool)
		.await
		.map_err(|e| Error::Conversion(e.to_string()))?;
		Ok(())
	}

	/// # Errors
	/// Returns an error on a database failure.
	pub async fn find(&self, tenant_id: i64) -> Result<Option<TenantSubscription>, Error> {
		let row = sqlx::query_as::<_, TenantRow>(
			"SELECT tenant_id, plan, status, concurrent_limit, active_calls FROM tenant_subscriptions WHERE tenant_id = ?",
		)
		.bind(tenant_id)
		.fetch_optional(&self.pool)
		.await
		.map_err(|e| Error::Conversion(e.to_string()))?;

		Ok(row.map(TenantRow::into_subscription))
	}

	/// Conditional increment: `UPDATE ... WHERE active_calls < limit`.
	/// Returns `true` iff a row was actually modified, i.e. the tenant had
	/// budget remaining (spec §4.3).
	///
	/// # Errors
	/// Returns an error on a database failure.
	pub async fn conditional_increment(&self, tenant_id: i64, limit: u32) -> Result<bool, Error> {
		let result = sqlx::query("UPDATE tenant_subscriptions SET active_calls = active_calls + 1 WHERE tenant_id = ? AND active_calls < ?")
			.bind(tenant_id)
			.bind(i64::from(limit))
			.execute(&self.pool)
			.await
			.map_err(|e| Error::Conversion(e.to_string()))?;

		Ok(result.rows_affected() > 0)
	}

	/// Decrement followed by a floor-at-zero sweep, tolerating mis-paired
	/// releases (spec §4.3).
	///
	/// # Errors
	/// Returns an error on a database failure.
	pub async fn decrement(&self, tenant_id: i64) -> Result<(), Error> {
		sqlx::query("UPDATE tenant_subscriptions SET active_calls = active_calls - 1 WHERE tenant_id = ? AND active_calls > 0")
			.bind(tenant_id)
			.execute(&self.pool)
			.await
			.map_err(|e| Error::Conversion(e.to_string()))?;

		sqlx::query("UPDATE tenant_subscriptions SET active_calls = 0 WHERE tenant_id = ? AND active_calls < 0")
			.bind(tenant_id)
			.execute(&self.pool)
			.await
			.map_err(|e| Error::Conversion(e.to_string()))?;

		Ok(())
	}
}

#[derive(sqlx::FromRow)]
struct TenantRow {
	tenant_id: i64,
	plan: String,
	status: String,
	concurrent_limit: Option<i64>,
	active_calls: i64,
}

impl TenantRow {
	fn into_subscription(self) -> TenantSubscription {
		let plan = match self.plan.as_str() {
			"PAYG" => Plan::Payg,
			"STARTER" => Plan::Starter,
			"PRO" => Plan::Pro,
			_ => Plan::Enterprise,
		};

		TenantSubscription {
			tenant_id: self.tenant_id,
			plan,
			status: self.status,
			concurrent_limit: self.concurrent_limit,
			active_calls: self.active_calls,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use sqlx::sqlite::SqlitePoolOptions;

	async fn counter_with_tenant(plan: Plan, limit: Option<i64>, active_calls: i64) -> (TenantCounter, i64) {
		let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
		let counter = TenantCounter::new(pool);
		counter.init_schema().await.unwrap();

		let tenant_id = 1;
		sqlx::query("INSERT INTO tenant_subscriptions (tenant_id, plan, status, concurrent_limit, active_calls) VALUES (?, ?, 'ACTIVE', ?, ?)")
			.bind(tenant_id)
			.bind(plan.as_str())
			.bind(limit)
			.bind(active_calls)
			.execute(&counter.pool)
			.await
			.unwrap();

		(counter, tenant_id)
	}

	#[tokio::test]
	async fn increment_succeeds_below_limit() {
		let (counter, tenant_id) = counter_with_tenant(Plan::Pro, None, 1).await;
		let admitted = counter.conditional_increment(tenant_id, 3).await.unwrap();
		assert!(admitted);

		let row = counter.find(tenant_id).await.unwrap().unwrap();
		assert_eq!(row.active_calls, 2);
	}

	#[tokio::test]
	async fn increment_rejected_at_limit() {
		let (counter, tenant_id) = counter_with_tenant(Plan::Starter, None, 1).await;
		let admitted = counter.conditional_increment(tenant_id, 1).await.unwrap();
		assert!(!admitted);

		let row = counter.find(tenant_id).await.unwrap().unwrap();
		assert_eq!(row.active_calls, 1);
	}

	#[tokio::test]
	async fn decrement_floors_at_zero() {
		let (counter, tenant_id) = counter_with_tenant(Plan::Pro, None, 0).await;
		counter.decrement(tenant_id).await.unwrap();

		let row = counter.find(tenant_id).await.unwrap().unwrap();
		assert_eq!(row.active_calls, 0);
	}

	#[tokio::test]
	async fn override_limit_supersedes_plan_default() {
		let (counter, tenant_id) = counter_with_tenant(Plan::Enterprise, Some(0), 0).await;
		let row = counter.find(tenant_id).await.unwrap().unwrap();
		assert_eq!(row.effective_limit(), 0);
	}
}
