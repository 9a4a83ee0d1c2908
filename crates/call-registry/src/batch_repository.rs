use crate::error::Error;
use crate::model::{BatchCall, BatchStatus, Recipient};
use sqlx::{Row, SqlitePool};

/// Storage for C7's per-batch aggregate row. The recipient list is kept
/// serialized in a single column (spec §3: "serialized recipient list") —
/// the aggregator crate owns the recompute logic, this repository owns the
/// read/write of the row as a whole.
#[derive(Clone)]
pub struct BatchCallRepository {
	pool: SqlitePool,
}

impl BatchCallRepository {
	#[must_use]
	pub const fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// # Errors
	/// Returns an error on a database failure.
	pub async fn upsert_pending(&self, batch_id: &str, recipients: &[Recipient]) -> Result<(), Error> {
		let recipients_json = serde_json::to_string(recipients)?;
		sqlx::query(
			r"
			INSERT INTO batch_calls (batch_id, status, recipients)
			VALUES (?, 'PENDING', ?)
			ON CONFLICT(batch_id) DO NOTHING
			",
		)
		.bind(batch_id)
		.bind(&recipients_json)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	/// # Errors
	/// Returns an error on a database failure.
	pub async fn get(&self, batch_id: &str) -> Result<Option<BatchCall>, Error> {
		let row = sqlx::query("SELECT batch_id, status, recipients, completed, failed, successful, completed_at FROM batch_calls WHERE batch_id = ?")
			.bind(batch_id)
			.fetch_optional(&self.pool)
			.await?;

		row.map(row_to_batch).transpose()
	}

	/// Persists the full batch row, including the recomputed aggregate
	/// counters and recipients list. Called by the aggregator after each
	/// recipient status change (spec §4.7).
	///
	/// # Errors
	/// Returns an error on a database failure.
	pub async fn save(&self, batch: &BatchCall) -> Result<(), Error> {
		let recipients_json = serde_json::to_string(&batch.recipients)?;
		sqlx::query(
			r"
			UPDATE batch_calls
			SET status = ?, recipients = ?, completed = ?, failed = ?, successful = ?, completed_at = ?
			WHERE batch_id = ?
			",
		)
		.bind(batch.status.as_str())
		.bind(&recipients_json)
		.bind(batch.completed)
		.bind(batch.failed)
		.bind(batch.successful)
		.bind(batch.completed_at)
		.bind(&batch.batch_id)
		.execute(&self.pool)
		.await?;
		Ok(())
	}
}

fn row_to_batch(row: sqlx::sqlite::SqliteRow) -> Result<BatchCall, Error> {
	let status_raw: String = row.try_get("status")?;
	let recipients_raw: String = row.try_get("recipients")?;

	Ok(BatchCall {
		batch_id: row.try_get("batch_id")?,
		status: BatchStatus::parse(&status_raw),
		recipients: serde_json::from_str(&recipients_raw)?,
		completed: row.try_get("completed")?,
		failed: row.try_get("failed")?,
		successful: row.try_get("successful")?,
		completed_at: row.try_get("completed_at")?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::RecipientStatus;
	use chrono::Utc;
	use sqlx::sqlite::SqlitePoolOptions;

	async fn repo() -> BatchCallRepository {
		let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
		crate::schema::init_schema(&pool).await.unwrap();
		BatchCallRepository::new(pool)
	}

	fn recipient(id: &str) -> Recipient {
		Recipient {
			recipient_id: id.to_string(),
			external_phone_number: "+15555550100".to_string(),
			status: RecipientStatus::Pending,
			call_id: None,
			updated_at: Utc::now(),
		}
	}

	#[tokio::test]
	async fn upsert_then_get_round_trips() {
		let repo = repo().await;
		let recipients = vec![recipient("r1"), recipient("r2")];
		repo.upsert_pending("batch-1", &recipients).await.unwrap();

		let batch = repo.get("batch-1").await.unwrap().unwrap();
		assert_eq!(batch.status, BatchStatus::Pending);
		assert_eq!(batch.recipients.len(), 2);
	}

	#[tokio::test]
	async fn save_persists_aggregate_counters() {
		let repo = repo().await;
		repo.upsert_pending("batch-2", &[recipient("r1")]).await.unwrap();
		let mut batch = repo.get("batch-2").await.unwrap().unwrap();
		batch.status = BatchStatus::Completed;
		batch.completed = 1;
		batch.successful = 1;
		batch.completed_at = Some(Utc::now());
		repo.save(&batch).await.unwrap();

		let reloaded = repo.get("batch-2").await.unwrap().unwrap();
		assert_eq!(reloaded.status, BatchStatus::Completed);
		assert_eq!(reloaded.completed, 1);
		assert!(reloaded.completed_at.is_some());
	}
}
