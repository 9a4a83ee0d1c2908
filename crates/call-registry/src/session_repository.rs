use crate::error::Error;
use crate::model::{Direction, NewSession, Session, SessionStatus};
use chrono::{DateTime, Utc};
use concurrency_core::Plan;
use sqlx::error::DatabaseError;
use sqlx::{Row, SqlitePool};

/// System of record for completed-session facts (C2, spec §3). `Create`
/// fails on a duplicate `call_id`; `MarkEnded` is idempotent.
#[derive(Clone)]
pub struct SessionRepository {
	pool: SqlitePool,
}

impl SessionRepository {
	#[must_use]
	pub const fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// # Errors
	/// Returns [`Error::DuplicateCallId`] if `call_id` already has a row
	/// (spec §4.2 — this is the persistence-layer half of webhook
	/// idempotency), or [`Error::Database`] on any other failure.
	pub async fn create(&self, session: NewSession) -> Result<Session, Error> {
		let metadata_json = serde_json::to_string(&session.metadata)?;
		// A row inserted directly with a terminal status (the inbound-disabled
		// and capacity-overflow paths never go through `mark_ended`) must
		// still satisfy "`ended_at` is set iff `status != active`" (spec §3).
		let terminal = session.status.is_terminal();

		let result = sqlx::query(
			r"
			INSERT INTO sessions (call_id, tenant_id, plan, direction, status, metadata, ended_at)
			VALUES (?, ?, ?, ?, ?, ?, CASE WHEN ? THEN CURRENT_TIMESTAMP ELSE NULL END)
			",
		)
		.bind(&session.call_id)
		.bind(session.tenant_id)
		.bind(session.plan.as_str())
		.bind(session.direction.as_str())
		.bind(session.status.as_str())
		.bind(&metadata_json)
		.bind(terminal)
		.execute(&self.pool)
		.await;

		if let Err(sqlx::Error::Database(ref db_err)) = result {
			if db_err.is_unique_violation() {
				return Err(Error::DuplicateCallId(session.call_id));
			}
		}
		result?;

		self.get(&session.call_id).await?.ok_or_else(|| Error::DuplicateCallId(session.call_id.clone()))
	}

	/// Idempotent: marking an already-terminal session ended again is a
	/// no-op (spec §4.2, §4.4).
	///
	/// # Errors
	/// Returns an error on a database failure.
	pub async fn mark_ended(&self, call_id: &str, status: SessionStatus) -> Result<(), Error> {
		debug_assert!(status.is_terminal());
		sqlx::query("UPDATE sessions SET status = ?, ended_at = CURRENT_TIMESTAMP WHERE call_id = ? AND status = 'active'")
			.bind(status.as_str())
			.bind(call_id)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	/// # Errors
	/// Returns an error on a database failure.
	pub async fn get(&self, call_id: &str) -> Result<Option<Session>, Error> {
		let row = sqlx::query("SELECT call_id, tenant_id, plan, direction, status, started_at, ended_at, metadata FROM sessions WHERE call_id = ?")
			.bind(call_id)
			.fetch_optional(&self.pool)
			.await?;

		row.map(row_to_session).transpose()
	}

	/// # Errors
	/// Returns an error on a database failure.
	pub async fn list_active(&self, tenant_id: Option<i64>) -> Result<Vec<Session>, Error> {
		let rows = match tenant_id {
			Some(tenant_id) => {
				sqlx::query("SELECT call_id, tenant_id, plan, direction, status, started_at, ended_at, metadata FROM sessions WHERE status = 'active' AND tenant_id = ?")
					.bind(tenant_id)
					.fetch_all(&self.pool)
					.await?
			}
			None => {
				sqlx::query("SELECT call_id, tenant_id, plan, direction, status, started_at, ended_at, metadata FROM sessions WHERE status = 'active'")
					.fetch_all(&self.pool)
					.await?
			}
		};

		rows.into_iter().map(row_to_session).collect()
	}

	/// Active sessions started before `older_than`, the candidate set for
	/// the reconciliation sweep (spec §4.2, §4.6).
	///
	/// # Errors
	/// Returns an error on a database failure.
	pub async fn list_orphaned(&self, older_than: DateTime<Utc>) -> Result<Vec<Session>, Error> {
		let rows = sqlx::query(
			"SELECT call_id, tenant_id, plan, direction, status, started_at, ended_at, metadata FROM sessions WHERE status = 'active' AND started_at < ?",
		)
		.bind(older_than)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(row_to_session).collect()
	}
}

fn row_to_session(row: sqlx::sqlite::SqliteRow) -> Result<Session, Error> {
	let plan_raw: String = row.try_get("plan")?;
	let direction_raw: String = row.try_get("direction")?;
	let status_raw: String = row.try_get("status")?;
	let metadata_raw: String = row.try_get("metadata")?;

	Ok(Session {
		call_id: row.try_get("call_id")?,
		tenant_id: row.try_get("tenant_id")?,
		plan: parse_plan(&plan_raw),
		direction: if direction_raw == "inbound" { Direction::Inbound } else { Direction::Outbound },
		status: SessionStatus::parse(&status_raw),
		started_at: row.try_get("started_at")?,
		ended_at: row.try_get("ended_at")?,
		metadata: serde_json::from_str(&metadata_raw).unwrap_or(serde_json::Value::Null),
	})
}

fn parse_plan(raw: &str) -> Plan {
	match raw {
		"PAYG" => Plan::Payg,
		"STARTER" => Plan::Starter,
		"PRO" => Plan::Pro,
		_ => Plan::Enterprise,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use sqlx::sqlite::SqlitePoolOptions;

	async fn repo() -> SessionRepository {
		let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
		crate::schema::init_schema(&pool).await.unwrap();
		SessionRepository::new(pool)
	}

	fn new_session(call_id: &str) -> NewSession {
		NewSession {
			call_id: call_id.to_string(),
			tenant_id: 1,
			plan: Plan::Pro,
			direction: Direction::Inbound,
			status: SessionStatus::Active,
			metadata: serde_json::json!({}),
		}
	}

	#[tokio::test]
	async fn create_then_get_round_trips() {
		let repo = repo().await;
		let created = repo.create(new_session("call-1")).await.unwrap();
		assert_eq!(created.status, SessionStatus::Active);
		assert!(created.ended_at.is_none());

		let fetched = repo.get("call-1").await.unwrap().unwrap();
		assert_eq!(fetched.call_id, "call-1");
	}

	#[tokio::test]
	async fn create_with_a_terminal_status_sets_ended_at() {
		let repo = repo().await;
		let mut session = new_session("call-rejected");
		session.status = SessionStatus::TerminatedCapacity;
		let created = repo.create(session).await.unwrap();

		assert_eq!(created.status, SessionStatus::TerminatedCapacity);
		assert!(created.ended_at.is_some());
	}

	#[tokio::test]
	async fn duplicate_call_id_is_rejected() {
		let repo = repo().await;
		repo.create(new_session("call-dup")).await.unwrap();

		let second = repo.create(new_session("call-dup")).await;
		assert!(matches!(second, Err(Error::DuplicateCallId(_))));
	}

	#[tokio::test]
	async fn mark_ended_is_idempotent() {
		let repo = repo().await;
		repo.create(new_session("call-end")).await.unwrap();

		repo.mark_ended("call-end", SessionStatus::Ended).await.unwrap();
		repo.mark_ended("call-end", SessionStatus::Ended).await.unwrap();

		let fetched = repo.get("call-end").await.unwrap().unwrap();
		assert_eq!(fetched.status, SessionStatus::Ended);
		assert!(fetched.ended_at.is_some());
	}

	#[tokio::test]
	async fn list_active_filters_by_tenant() {
		let repo = repo().await;
		repo.create(new_session("call-a")).await.unwrap();
		let mut other = new_session("call-b");
		other.tenant_id = 2;
		repo.create(other).await.unwrap();

		let active_for_tenant_1 = repo.list_active(Some(1)).await.unwrap();
		assert_eq!(active_for_tenant_1.len(), 1);
		assert_eq!(active_for_tenant_1[0].call_id, "call-a");

		let all_active = repo.list_active(None).await.unwrap();
		assert_eq!(all_active.len(), 2);
	}
}
