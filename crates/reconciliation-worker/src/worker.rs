use crate::error::Error;
use call_registry::SessionRepository;
use chrono::Utc;
use concurrency_core::{GlobalCapacityStore, TenantCounter};
use prometheus::{Counter, Registry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Outcome of one pass of [`ReconciliationWorker::run_sweep`], returned so
/// callers (and tests) can assert on what the sweep actually did rather
/// than scraping logs.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
	pub orphaned_sessions: usize,
	pub stale_slots_released: usize,
}

/// C6: the only writer allowed to mutate C1/C3 counters without a matching
/// provider event (spec §4.6). Single-flighted per process via an internal
/// mutex so a slow sweep can never overlap itself.
pub struct ReconciliationWorker {
	global: GlobalCapacityStore,
	tenants: TenantCounter,
	sessions: SessionRepository,
	stuck_call_age: chrono::Duration,
	sweep_lock: Mutex<()>,
	corrections_total: Counter,
}

impl ReconciliationWorker {
	/// # Errors
	/// Returns an error if the `reconciliation_sweep_corrections_total`
	/// metric cannot be registered.
	pub fn new(global: GlobalCapacityStore, tenants: TenantCounter, sessions: SessionRepository, stuck_call_age: Duration, registry: &Registry) -> Result<Self, Error> {
		let corrections_total = Counter::new("reconciliation_sweep_corrections_total", "Counter correction made by the reconciliation sweep")?;
		registry.register(Box::new(corrections_total.clone()))?;

		Ok(Self {
			global,
			tenants,
			sessions,
			stuck_call_age: chrono::Duration::from_std(stuck_call_age).unwrap_or(chrono::Duration::minutes(15)),
			sweep_lock: Mutex::new(()),
			corrections_total,
		})
	}

	/// Startup reconciliation: rebuilds C1 from the `status = active` rows in
	/// C2, rather than clearing C1 and letting it repopulate lazily, since the
	/// latter can transiently exceed the global ceiling while in-flight calls
	/// haven't yet round-tripped a new acquire. Must run to completion before
	/// any webhook handler accepts traffic.
	///
	/// # Errors
	/// Returns an error if C1 cannot be reset or read back.
	pub async fn startup_reconcile(&self) -> Result<usize, Error> {
		info!("startup reconciliation: rebuilding global capacity from session registry");
		self.global.force_reset().await?;

		let active = self.sessions.list_active(None).await?;
		let mut rebuilt = 0usize;
		for session in &active {
			match self.global.acquire_slot(&session.call_id, session.plan, session.tenant_id).await {
				Ok(outcome) if outcome.success => rebuilt += 1,
				Ok(_) => warn!(call_id = %session.call_id, "startup reconciliation hit global cap while rebuilding, some active sessions will be undercounted until the next sweep"),
				Err(err) => warn!(call_id = %session.call_id, error = %err, "failed to re-acquire slot during startup reconciliation"),
			}
		}

		info!(rebuilt, total = active.len(), "startup reconciliation complete");
		Ok(rebuilt)
	}

	/// Periodic sweep (spec §4.6): orphans `status = active` sessions older
	/// than `stuck_call_age`, and releases any C1 entry whose `call_id` has
	/// no matching active row in C2. Single-flighted: a call that arrives
	/// while a sweep is already running waits for it rather than running
	/// concurrently.
	///
	/// # Errors
	/// Returns an error on a C1/C2/C3 failure.
	pub async fn run_sweep(&self) -> Result<SweepReport, Error> {
		let _guard = self.sweep_lock.lock().await;

		let cutoff = Utc::now() - self.stuck_call_age;
		let orphaned = self.sessions.list_orphaned(cutoff).await?;
		for session in &orphaned {
			warn!(call_id = %session.call_id, tenant_id = session.tenant_id, started_at = %session.started_at, "sweep: orphaned session, releasing");
			self.sessions.mark_ended(&session.call_id, call_registry::SessionStatus::Ended).await?;
			self.tenants.decrement(session.tenant_id).await?;
			self.global.release_slot(&session.call_id).await?;
			self.corrections_total.inc();
		}

		let still_active = self.sessions.list_active(None).await?;
		let active_ids: Vec<String> = still_active.iter().map(|s| s.call_id.clone()).collect();
		let released = self.global.cleanup_stuck(&active_ids).await?;
		for call_id in &released {
			warn!(call_id, "sweep: released C1 slot with no matching active session");
			self.corrections_total.inc();
		}

		let report = SweepReport {
			orphaned_sessions: orphaned.len(),
			stale_slots_released: released.len(),
		};
		if report.orphaned_sessions > 0 || report.stale_slots_released > 0 {
			info!(?report, "reconciliation sweep made corrections");
		}
		Ok(report)
	}

	/// Runs [`Self::run_sweep`] on a fixed interval until the process exits.
	/// Intended to be spawned once at startup, after
	/// [`Self::startup_reconcile`] has completed.
	pub async fn run_periodic(self: Arc<Self>, interval: Duration) {
		let mut ticker = tokio::time::interval(interval);
		ticker.tick().await;
		loop {
			ticker.tick().await;
			if let Err(err) = self.run_sweep().await {
				warn!(error = %err, "reconciliation sweep failed");
			}
		}
	}
}
