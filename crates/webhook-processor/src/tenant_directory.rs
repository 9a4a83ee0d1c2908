use crate::error::WebhookError;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

/// Outcome of resolving the inbound assistant configured for a called
/// number, the gate in spec §4.5 point 3 ("resolve the tenant from the
/// called phone number → assistant mapping").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundAssistant {
	NotConfigured,
	Inactive,
	Active { tenant_id: i64 },
}

/// Port over the tenant/assistant/phone-number mapping consulted by the
/// event-resolution priority chain in spec §4.5 point 4. Kept as a trait so
/// the webhook processor does not hardcode a particular storage schema — the
/// gateway binds a concrete implementation.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
	/// Priority (b): agent-id → assistant → tenant lookup.
	async fn tenant_for_agent(&self, agent_id: &str) -> Result<Option<i64>, WebhookError>;

	/// Priority (c): called-phone-number → phone-number-record → tenant
	/// lookup.
	async fn tenant_for_phone_number(&self, phone_number: &str) -> Result<Option<i64>, WebhookError>;

	/// The inbound-assistant gate consulted before `Acquire` on an inbound
	/// `call-started` (spec §4.5 point 3).
	async fn inbound_assistant_for(&self, agent_phone_number_id: &str) -> Result<InboundAssistant, WebhookError>;
}

/// SQLite-backed [`TenantDirectory`] (spec §6 "relational tables" posture);
/// the assistant/phone-number tables themselves are this crate's own
/// addition, with no mandated shape.
#[derive(Clone)]
pub struct SqlTenantDirectory {
	pool: SqlitePool,
}

impl SqlTenantDirectory {
	#[must_use]
	pub const fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// # Errors
	/// Returns an error on a database failure.
	pub async fn init_schema(&self) -> Result<(), WebhookError> {
		sqlx::query(
			r"
			CREATE TABLE IF NOT EXISTS assistants (
				agent_id TEXT PRIMARY KEY,
				agent_phone_number_id TEXT,
				tenant_id INTEGER NOT NULL,
				active INTEGER NOT NULL DEFAULT 1
			)
			",
		)
		.execute(&self.pool)
		.await?;

		sqlx::query(
			r"
			CREATE TABLE IF NOT EXISTS phone_numbers (
				phone_number TEXT PRIMARY KEY,
				tenant_id INTEGER NOT NULL
			)
			",
		)
		.execute(&self.pool)
		.await?;

		sqlx::query("CREATE INDEX IF NOT EXISTS idx_assistants_phone_number_id ON assistants(agent_phone_number_id)")
			.execute(&self.pool)
			.await?;

		Ok(())
	}
}

#[async_trait]
impl TenantDirectory for SqlTenantDirectory {
	async fn tenant_for_agent(&self, agent_id: &str) -> Result<Option<i64>, WebhookError> {
		let row = sqlx::query("SELECT tenant_id FROM assistants WHERE agent_id = ?").bind(agent_id).fetch_optional(&self.pool).await?;
		Ok(row.map(|r| r.get::<i64, _>("tenant_id")))
	}

	async fn tenant_for_phone_number(&self, phone_number: &str) -> Result<Option<i64>, WebhookError> {
		let row = sqlx::query("SELECT tenant_id FROM phone_numbers WHERE phone_number = ?")
			.bind(phone_number)
			.fetch_optional(&self.pool)
			.await?;
		Ok(row.map(|r| r.get::<i64, _>("tenant_id")))
	}

	async fn inbound_assistant_for(&self, agent_phone_number_id: &str) -> Result<InboundAssistant, WebhookError> {
		let row = sqlx::query("SELECT tenant_id, active FROM assistants WHERE agent_phone_number_id = ?")
			.bind(agent_phone_number_id)
			.fetch_optional(&self.pool)
			.await?;

		Ok(match row {
			None => InboundAssistant::NotConfigured,
			Some(row) if row.get::<i64, _>("active") == 0 => InboundAssistant::Inactive,
			Some(row) => InboundAssistant::Active { tenant_id: row.get("tenant_id") },
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use sqlx::sqlite::SqlitePoolOptions;

	async fn directory() -> SqlTenantDirectory {
		let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
		let directory = SqlTenantDirectory::new(pool);
		directory.init_schema().await.unwrap();
		directory
	}

	#[tokio::test]
	async fn unconfigured_number_reports_not_configured() {
		let directory = directory().await;
		let result = directory.inbound_assistant_for("+15555550100").await.unwrap();
		assert_eq!(result, InboundAssistant::NotConfigured);
	}

	#[tokio::test]
	async fn inactive_assistant_is_reported() {
		let directory = directory().await;
		sqlx::query("INSERT INTO assistants (agent_id, agent_phone_number_id, tenant_id, active) VALUES ('a1', '+15555550100', 9, 0)")
			.execute(&directory.pool)
			.await
			.unwrap();

		let result = directory.inbound_assistant_for("+15555550100").await.unwrap();
		assert_eq!(result, InboundAssistant::Inactive);
	}

	#[tokio::test]
	async fn active_assistant_resolves_tenant() {
		let directory = directory().await;
		sqlx::query("INSERT INTO assistants (agent_id, agent_phone_number_id, tenant_id, active) VALUES ('a1', '+15555550100', 9, 1)")
			.execute(&directory.pool)
			.await
			.unwrap();

		let result = directory.inbound_assistant_for("+15555550100").await.unwrap();
		assert_eq!(result, InboundAssistant::Active { tenant_id: 9 });
	}
}
