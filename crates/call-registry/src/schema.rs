use crate::error::Error;
use sqlx::SqlitePool;

/// Creates every table owned by this crate: sessions (C2), the webhook
/// idempotency table and the batch-call tables (spec §3, §4.7, §6).
///
/// # Errors
/// Returns an error on a database failure.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), Error> {
	sqlx::query(
		r"
		CREATE TABLE IF NOT EXISTS sessions (
			call_id TEXT PRIMARY KEY,
			tenant_id INTEGER NOT NULL,
			plan TEXT NOT NULL,
			direction TEXT NOT NULL,
			status TEXT NOT NULL,
			started_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
			ended_at DATETIME,
			metadata TEXT NOT NULL DEFAULT '{}'
		)
		",
	)
	.execute(pool)
	.await?;

	sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_tenant_status ON sessions(tenant_id, status)")
		.execute(pool)
		.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_status_started_at ON sessions(status, started_at)")
		.execute(pool)
		.await?;

	sqlx::query(
		r"
		CREATE TABLE IF NOT EXISTS webhook_events (
			tenant_id INTEGER,
			event_type TEXT NOT NULL,
			external_event_id TEXT NOT NULL,
			processed_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
			PRIMARY KEY (tenant_id, event_type, external_event_id)
		)
		",
	)
	.execute(pool)
	.await?;

	sqlx::query(
		r"
		CREATE TABLE IF NOT EXISTS batch_calls (
			batch_id TEXT PRIMARY KEY,
			status TEXT NOT NULL,
			recipients TEXT NOT NULL DEFAULT '[]',
			completed INTEGER NOT NULL DEFAULT 0,
			failed INTEGER NOT NULL DEFAULT 0,
			successful INTEGER NOT NULL DEFAULT 0,
			completed_at DATETIME
		)
		",
	)
	.execute(pool)
	.await?;

	Ok(())
}
