use crate::error::Error;
use sqlx::error::DatabaseError;
use sqlx::SqlitePool;

/// Idempotency ledger keyed by `(tenant_id, event_type, external_event_id)`
/// (spec §4.5 point 2, §6).
#[derive(Clone)]
pub struct WebhookEventRepository {
	pool: SqlitePool,
}

impl WebhookEventRepository {
	#[must_use]
	pub const fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Records the event if it hasn't been seen before. Returns `true` when
	/// this call recorded a fresh event (caller should process it) and
	/// `false` when it was a duplicate (caller should ack without side
	/// effects).
	///
	/// # Errors
	/// Returns an error on a database failure unrelated to the uniqueness
	/// constraint.
	pub async fn record_if_new(&self, tenant_id: Option<i64>, event_type: &str, external_event_id: &str) -> Result<bool, Error> {
		let result = sqlx::query("INSERT INTO webhook_events (tenant_id, event_type, external_event_id) VALUES (?, ?, ?)")
			.bind(tenant_id)
			.bind(event_type)
			.bind(external_event_id)
			.execute(&self.pool)
			.await;

		match result {
			Ok(_) => Ok(true),
			Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => Ok(false),
			Err(e) => Err(e.into()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use sqlx::sqlite::SqlitePoolOptions;

	async fn repo() -> WebhookEventRepository {
		let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
		crate::schema::init_schema(&pool).await.unwrap();
		WebhookEventRepository::new(pool)
	}

	#[tokio::test]
	async fn first_delivery_is_fresh_second_is_duplicate() {
		let repo = repo().await;
		let first = repo.record_if_new(Some(1), "call-ended", "evt-1").await.unwrap();
		assert!(first);

		let second = repo.record_if_new(Some(1), "call-ended", "evt-1").await.unwrap();
		assert!(!second);
	}
}
