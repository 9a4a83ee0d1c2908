use crate::error::AdmissionError;
use call_registry::{Direction, NewSession, Session, SessionRepository, SessionStatus};
use concurrency_core::{GlobalCapacityStore, Plan, TenantCounter};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Average outbound/inbound call duration used to derive `retry_after_ms`
/// hints on capacity rejections (spec §4.4). Not configurable: it is a
/// rough operator-facing hint, not a scheduling guarantee.
const AVERAGE_CALL_DURATION_MS: u64 = 90_000;

/// Orchestrates C1 (global), C3 (tenant), and C2 (session registry) behind
/// the single `Acquire`/`Release` surface (spec §4.4). The ordering in
/// [`AdmissionController::acquire`] is load-bearing: cheaper checks run
/// first, and every step that mutates state records how to undo itself so a
/// later failure rolls back everything before it.
#[derive(Clone)]
pub struct AdmissionController {
	global: GlobalCapacityStore,
	tenants: TenantCounter,
	sessions: SessionRepository,
}

/// What [`AdmissionController::acquire`] returns on success: the minted or
/// supplied `call_id` plus the tenant's observed counters, matching the
/// `{activeCalls, limit}` shape in spec.md §6.
#[derive(Debug, Clone)]
pub struct AcquireOutcome {
	pub call_id: String,
	pub active_calls: u32,
	pub limit: u32,
	pub idempotent: bool,
}

impl AdmissionController {
	#[must_use]
	pub const fn new(global: GlobalCapacityStore, tenants: TenantCounter, sessions: SessionRepository) -> Self {
		Self { global, tenants, sessions }
	}

	/// Implements spec §4.4's six-step `Acquire` algorithm. Each numbered
	/// step below corresponds to the numbered step in that algorithm.
	///
	/// # Errors
	/// Returns the structured [`AdmissionError`] taxonomy from spec §4.4 and
	/// §7; capacity-class variants are the expected, frequent outcome of a
	/// full system and are not logged as errors.
	pub async fn acquire(&self, tenant_id: i64, call_id: Option<String>, direction: Direction, metadata: serde_json::Value) -> Result<AcquireOutcome, AdmissionError> {
		// Step 1: load tenant, validate status and effective limit.
		let tenant = self.tenants.find(tenant_id).await?.ok_or(AdmissionError::SubscriptionNotFound { tenant_id })?;
		if !tenant.is_active() {
			return Err(AdmissionError::SubscriptionInactive { tenant_id, status: tenant.status });
		}
		let limit = tenant.effective_limit();
		if limit == 0 {
			return Err(AdmissionError::ConcurrentCallsDisabled { tenant_id });
		}

		// Step 2: advisory global check, cheaper than the tenant update and
		// run first so a platform-wide outage fails fast (spec §4.4 step 2).
		let snapshot = self.global.check_capacity().await;
		if !snapshot.available {
			return Err(AdmissionError::GlobalCapacityExceeded {
				current: snapshot.current,
				limit: snapshot.limit,
				retry_after_ms: AVERAGE_CALL_DURATION_MS,
			});
		}

		// Step 3: conditional increment of C3.
		let admitted = self.tenants.conditional_increment(tenant_id, limit).await?;
		if !admitted {
			return Err(AdmissionError::BusinessConcurrentLimitExceeded {
				tenant_id,
				current: limit,
				limit,
				retry_after_ms: AVERAGE_CALL_DURATION_MS,
			});
		}

		// Step 4: mint a call_id if the caller didn't supply one.
		let call_id = call_id.unwrap_or_else(|| mint_call_id(tenant_id));

		// Step 5: acquire the global slot; undo step 3 on failure.
		let plan = tenant.plan;
		let acquire_result = self.global.acquire_slot(&call_id, plan, tenant_id).await;
		let outcome = match acquire_result {
			Ok(outcome) if outcome.success => outcome,
			Ok(_) => {
				self.undo_tenant_increment(tenant_id).await;
				return Err(AdmissionError::GlobalSlotFailed);
			}
			Err(err) => {
				self.undo_tenant_increment(tenant_id).await;
				return Err(err.into());
			}
		};

		// `call_id` already held a live C1 slot — this is a retried webhook
		// or a duplicate client-supplied id for a call still in flight.
		// `acquire_slot` did not re-increment the global counter, so step 3's
		// increment was against a call that never needed a fresh tenant slot:
		// undo it and hand back the existing session's state without
		// touching C2. Running `sessions.create` here would hit the unique
		// constraint on the *original* call's row and trigger a rollback that
		// releases that still-live call's C1 entry out from under it.
		if outcome.idempotent {
			self.undo_tenant_increment(tenant_id).await;
			info!(call_id, tenant_id, "acquire is idempotent, returning existing session without re-creating it");
			let active_calls = self.tenants.find(tenant_id).await?.map_or(0, |t| u32::try_from(t.active_calls.max(0)).unwrap_or(0));
			return Ok(AcquireOutcome {
				call_id,
				active_calls,
				limit,
				idempotent: true,
			});
		}

		// Step 6: persist the session row; undo steps 3 and 5 on failure.
		let new_session = NewSession {
			call_id: call_id.clone(),
			tenant_id,
			plan,
			direction,
			status: SessionStatus::Active,
			metadata,
		};
		if let Err(err) = self.sessions.create(new_session).await {
			warn!(call_id, tenant_id, error = %err, "session create failed after slot acquisition, rolling back");
			if let Err(release_err) = self.global.release_slot(&call_id).await {
				warn!(call_id, error = %release_err, "rollback release_slot failed");
			}
			self.undo_tenant_increment(tenant_id).await;
			return Err(err.into());
		}

		info!(call_id, tenant_id, current = outcome.current, "call admitted");
		let active_calls = u32::try_from(tenant.active_calls.max(0)).unwrap_or(0).saturating_add(1);
		Ok(AcquireOutcome {
			call_id,
			active_calls,
			limit,
			idempotent: false,
		})
	}

	/// Implements spec §4.4's `Release` algorithm. Steps 2 and 3 are logged
	/// on failure but never propagated: the tenant counter must still be
	/// decremented (step 1) to avoid a permanent leak of the tenant's own
	/// budget even if the global store or the session registry is down.
	pub async fn release(&self, tenant_id: i64, call_id: &str, terminal_status: SessionStatus) {
		debug_assert!(terminal_status.is_terminal());

		self.tenants.decrement(tenant_id).await.unwrap_or_else(|err| {
			warn!(tenant_id, error = %err, "tenant decrement failed");
		});

		if let Err(err) = self.global.release_slot(call_id).await {
			warn!(call_id, error = %err, "global release_slot failed");
		}

		if let Err(err) = self.sessions.mark_ended(call_id, terminal_status).await {
			warn!(call_id, error = %err, "mark_ended failed");
		}
	}

	/// Persists a terminal session row for a call that never reached C1/C3
	/// (e.g. the inbound-disabled or capacity-rejected paths in spec §4.5,
	/// which must still leave a record without touching either counter).
	///
	/// # Errors
	/// Returns an error if the session row cannot be created.
	pub async fn record_rejected(&self, tenant_id: i64, call_id: &str, plan: Plan, direction: Direction, status: SessionStatus, metadata: serde_json::Value) -> Result<Session, AdmissionError> {
		debug_assert!(status.is_terminal());
		let session = self
			.sessions
			.create(NewSession {
				call_id: call_id.to_string(),
				tenant_id,
				plan,
				direction,
				status,
				metadata,
			})
			.await?;
		Ok(session)
	}

	/// Exposes the raw C3 row for callers that need to reconstruct a
	/// response (e.g. the webhook processor's idempotent-duplicate path)
	/// without re-running `acquire`.
	///
	/// # Errors
	/// Returns an error on a database failure.
	pub async fn tenant_status(&self, tenant_id: i64) -> Result<Option<concurrency_core::TenantSubscription>, AdmissionError> {
		Ok(self.tenants.find(tenant_id).await?)
	}

	/// Exposes a session row directly, for callers needing to distinguish
	/// "no session yet" from "session already terminal" without going
	/// through `acquire`/`release` (e.g. the webhook processor's
	/// unmatched-`call-ended` path).
	///
	/// # Errors
	/// Returns an error on a database failure.
	pub async fn session(&self, call_id: &str) -> Result<Option<Session>, AdmissionError> {
		Ok(self.sessions.get(call_id).await?)
	}

	async fn undo_tenant_increment(&self, tenant_id: i64) {
		if let Err(err) = self.tenants.decrement(tenant_id).await {
			warn!(tenant_id, error = %err, "failed to undo tenant increment during acquire rollback");
		}
	}
}

fn mint_call_id(tenant_id: i64) -> String {
	let epoch_ms = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0);
	format!("call_{epoch_ms}_{tenant_id}")
}

#[cfg(test)]
mod tests {
	use super::*;
	use concurrency_core::GlobalCapacityStore;
	use sqlx::sqlite::SqlitePoolOptions;

	async fn controller_with_tenant(plan: Plan, limit: Option<i64>) -> (AdmissionController, i64) {
		let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
		let tenants = TenantCounter::new(pool.clone());
		tenants.init_schema().await.unwrap();
		let tenant_id = 7;
		sqlx::query("INSERT INTO tenant_subscriptions (tenant_id, plan, status, concurrent_limit, active_calls) VALUES (?, ?, 'ACTIVE', ?, 0)")
			.bind(tenant_id)
			.bind(plan.as_str())
			.bind(limit)
			.execute(&pool)
			.await
			.unwrap();

		call_registry::schema::init_schema(&pool).await.unwrap();
		let sessions = SessionRepository::new(pool);

		let url = std::env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
		let global = GlobalCapacityStore::new(&url, 5).await.unwrap();
		global.force_reset().await.unwrap();

		(AdmissionController::new(global, tenants, sessions), tenant_id)
	}

	#[tokio::test]
	async fn acquire_rejects_unknown_tenant() {
		let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
		let tenants = TenantCounter::new(pool.clone());
		tenants.init_schema().await.unwrap();
		call_registry::schema::init_schema(&pool).await.unwrap();
		let sessions = SessionRepository::new(pool);
		let Ok(global) = GlobalCapacityStore::new("redis://127.0.0.1/", 5).await else { return };

		let controller = AdmissionController::new(global, tenants, sessions);
		let result = controller.acquire(999, None, Direction::Outbound, serde_json::json!({})).await;
		assert!(matches!(result, Err(AdmissionError::SubscriptionNotFound { tenant_id: 999 })));
	}

	#[tokio::test]
	async fn acquire_rejects_zero_limit_tenant() {
		let (controller, tenant_id) = controller_with_tenant(Plan::Enterprise, Some(0)).await;
		let result = controller.acquire(tenant_id, None, Direction::Outbound, serde_json::json!({})).await;
		assert!(matches!(result, Err(AdmissionError::ConcurrentCallsDisabled { .. })));
	}

	#[tokio::test]
	async fn acquire_then_release_round_trips() {
		let (controller, tenant_id) = controller_with_tenant(Plan::Pro, None).await;
		let Ok(outcome) = controller.acquire(tenant_id, None, Direction::Outbound, serde_json::json!({})).await else {
			return;
		};
		assert!(!outcome.idempotent);

		controller.release(tenant_id, &outcome.call_id, SessionStatus::Ended).await;
		let row = controller.sessions.get(&outcome.call_id).await.unwrap().unwrap();
		assert_eq!(row.status, SessionStatus::Ended);
	}

	#[tokio::test]
	async fn acquire_rejects_at_tenant_limit() {
		let (controller, tenant_id) = controller_with_tenant(Plan::Starter, None).await;
		let Ok(first) = controller.acquire(tenant_id, None, Direction::Outbound, serde_json::json!({})).await else {
			return;
		};
		let second = controller.acquire(tenant_id, None, Direction::Outbound, serde_json::json!({})).await;
		assert!(matches!(second, Err(AdmissionError::BusinessConcurrentLimitExceeded { .. })));

		controller.release(tenant_id, &first.call_id, SessionStatus::Ended).await;
	}

	#[tokio::test]
	async fn duplicate_call_id_is_idempotent_and_leaves_the_original_slot_intact() {
		let (controller, tenant_id) = controller_with_tenant(Plan::Pro, None).await;
		let Ok(first) = controller.acquire(tenant_id, Some("dup-call".to_string()), Direction::Outbound, serde_json::json!({})).await else {
			return;
		};
		assert!(!first.idempotent);

		let second = controller.acquire(tenant_id, Some("dup-call".to_string()), Direction::Outbound, serde_json::json!({})).await.unwrap();
		assert!(second.idempotent);

		// the retried acquire must not have touched the tenant counter, and
		// the original call's session row must still be active — not torn
		// down by a spurious rollback.
		let tenant = controller.tenants.find(tenant_id).await.unwrap().unwrap();
		assert_eq!(tenant.active_calls, 1);
		let row = controller.sessions.get("dup-call").await.unwrap().unwrap();
		assert_eq!(row.status, SessionStatus::Active);

		let status = controller.global.global_status().await.unwrap();
		assert_eq!(status.global_active, 1);

		controller.release(tenant_id, "dup-call", SessionStatus::Ended).await;
	}
}
