use crate::error::Error;
use crate::plan::Plan;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

const GLOBAL_KEY: &str = "concurrent:global:active";
const ACTIVE_CALLS_KEY: &str = "concurrent:active_calls";

fn plan_key(plan: Plan) -> String {
	format!("concurrent:plan:{}", plan.as_str())
}

/// Per-`call_id` metadata stored alongside the platform slot, matching the
/// `active_calls` map shape in spec §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotMetadata {
	pub tenant_id: i64,
	pub plan: String,
	pub acquired_at: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct CapacitySnapshot {
	pub current: i64,
	pub limit: i64,
	pub available: bool,
	pub remaining: i64,
}

#[derive(Debug, Clone)]
pub struct AcquireOutcome {
	pub success: bool,
	pub current: i64,
	pub idempotent: bool,
	pub metadata: Option<SlotMetadata>,
}

#[derive(Debug, Clone, Copy)]
pub struct ReleaseOutcome {
	pub success: bool,
	pub current: i64,
}

/// Per-plan breakdown plus the map of currently-held slots, for telemetry
/// and dashboards (spec §4.1 `GlobalStatus`).
#[derive(Debug, Clone)]
pub struct GlobalStatusSnapshot {
	pub global_active: i64,
	pub plan_active: Vec<(String, i64)>,
	pub active_call_count: usize,
}

/// Platform-wide slot counter (C1). Every mutating operation is a single
/// `redis::Script` invocation so check-and-increment / compare-and-decrement
/// happen as one indivisible round trip — see spec §9 "Atomic
/// check-and-increment".
#[derive(Clone)]
pub struct GlobalCapacityStore {
	conn: Arc<Mutex<ConnectionManager>>,
	global_cap: i64,
	acquire_script: Arc<Script>,
	release_script: Arc<Script>,
	cleanup_script: Arc<Script>,
}

const ACQUIRE_LUA: &str = r"
local existing = redis.call('HGET', KEYS[2], ARGV[1])
if existing then
  local current = tonumber(redis.call('GET', KEYS[1]) or '0')
  return {0, current, existing}
end
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
local cap = tonumber(ARGV[3])
if current >= cap then
  return {2, current, false}
end
local new_current = redis.call('INCR', KEYS[1])
redis.call('INCR', KEYS[3])
redis.call('HSET', KEYS[2], ARGV[1], ARGV[4])
return {1, new_current, false}
";

const RELEASE_LUA: &str = r"
local existing = redis.call('HGET', KEYS[2], ARGV[1])
if not existing then
  local current = tonumber(redis.call('GET', KEYS[1]) or '0')
  return current
end
redis.call('HDEL', KEYS[2], ARGV[1])
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current > 0 then
  current = redis.call('DECR', KEYS[1])
else
  current = 0
end
local ok, meta = pcall(cjson.decode, existing)
if ok and meta.plan then
  local plan_key = 'concurrent:plan:' .. meta.plan
  local plan_current = tonumber(redis.call('GET', plan_key) or '0')
  if plan_current > 0 then
    redis.call('DECR', plan_key)
  end
end
return current
";

const CLEANUP_LUA: &str = r"
local keep = cjson.decode(ARGV[1])
local keep_set = {}
for _, id in ipairs(keep) do keep_set[id] = true end
local all_ids = redis.call('HKEYS', KEYS[2])
local released = {}
for _, id in ipairs(all_ids) do
  if not keep_set[id] then
    local meta = redis.call('HGET', KEYS[2], id)
    redis.call('HDEL', KEYS[2], id)
    local current = tonumber(redis.call('GET', KEYS[1]) or '0')
    if current > 0 then redis.call('DECR', KEYS[1]) end
    if meta then
      local ok, decoded = pcall(cjson.decode, meta)
      if ok and decoded.plan then
        local plan_key = 'concurrent:plan:' .. decoded.plan
        local plan_current = tonumber(redis.call('GET', plan_key) or '0')
        if plan_current > 0 then redis.call('DECR', plan_key) end
      end
    end
    table.insert(released, id)
  end
end
return released
";

impl GlobalCapacityStore {
	/// # Errors
	/// Returns an error if the Redis client cannot be constructed or the
	/// initial connection cannot be established.
	pub async fn new(redis_url: &str, global_cap: i64) -> Result<Self, Error> {
		let client = Client::open(redis_url)?;
		let conn = ConnectionManager::new(client).await?;

		Ok(Self {
			conn: Arc::new(Mutex::new(conn)),
			global_cap,
			acquire_script: Arc::new(Script::new(ACQUIRE_LUA)),
			release_script: Arc::new(Script::new(RELEASE_LUA)),
			cleanup_script: Arc::new(Script::new(CLEANUP_LUA)),
		})
	}

	/// Advisory, racy read — never a gate, per spec §5.
	///
	/// # Errors
	/// On store unreachability this fails open: it returns a snapshot that
	/// reports capacity as available rather than propagating the error,
	/// matching spec §4.1's "fail open for capacity checks".
	pub async fn check_capacity(&self) -> CapacitySnapshot {
		let mut conn = self.conn.lock().await;
		let current: Option<i64> = conn.get(GLOBAL_KEY).await.ok();
		let current = current.unwrap_or(0);
		let remaining = (self.global_cap - current).max(0);
		CapacitySnapshot {
			current,
			limit: self.global_cap,
			available: current < self.global_cap,
			remaining,
		}
	}

	/// # Errors
	/// Returns an error if the Redis round trip fails; the caller should
	/// treat this as a transient infrastructure error (spec §7).
	pub async fn acquire_slot(&self, call_id: &str, plan: Plan, tenant_id: i64) -> Result<AcquireOutcome, Error> {
		let acquired_at = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
		let metadata = SlotMetadata {
			tenant_id,
			plan: plan.as_str().to_string(),
			acquired_at,
		};
		let metadata_json = serde_json::to_string(&metadata)?;

		let mut conn = self.conn.lock().await;
		let (status, current, existing): (i64, i64, Option<String>) = self
			.acquire_script
			.key(GLOBAL_KEY)
			.key(ACTIVE_CALLS_KEY)
			.key(plan_key(plan))
			.arg(call_id)
			.arg(plan.as_str())
			.arg(self.global_cap)
			.arg(&metadata_json)
			.invoke_async(&mut *conn)
			.await?;
		drop(conn);

		match status {
			0 => {
				let existing_metadata = existing.and_then(|raw| serde_json::from_str(&raw).ok());
				Ok(AcquireOutcome {
					success: true,
					current,
					idempotent: true,
					metadata: existing_metadata,
				})
			}
			1 => Ok(AcquireOutcome {
				success: true,
				current,
				idempotent: false,
				metadata: Some(metadata),
			}),
			_ => Ok(AcquireOutcome {
				success: false,
				current,
				idempotent: false,
				metadata: None,
			}),
		}
	}

	/// Idempotent: releasing a `call_id` with no held slot is a success
	/// no-op, per spec §4.1.
	///
	/// # Errors
	/// Returns an error on Redis failure. Release is the one path that
	/// fails closed (spec §4.1): callers must retry rather than assume the
	/// slot was freed.
	pub async fn release_slot(&self, call_id: &str) -> Result<ReleaseOutcome, Error> {
		let mut conn = self.conn.lock().await;
		let current: i64 = self.release_script.key(GLOBAL_KEY).key(ACTIVE_CALLS_KEY).arg(call_id).invoke_async(&mut *conn).await?;
		Ok(ReleaseOutcome { success: true, current })
	}

	/// # Errors
	/// Returns an error on Redis failure.
	pub async fn global_status(&self) -> Result<GlobalStatusSnapshot, Error> {
		let mut conn = self.conn.lock().await;
		let global_active: i64 = conn.get(GLOBAL_KEY).await.unwrap_or(0);
		let mut plan_active = Vec::new();
		for plan in [Plan::Payg, Plan::Starter, Plan::Pro, Plan::Enterprise] {
			let count: i64 = conn.get(plan_key(plan)).await.unwrap_or(0);
			plan_active.push((plan.as_str().to_string(), count));
		}
		let active_call_count: usize = conn.hlen(ACTIVE_CALLS_KEY).await.unwrap_or(0);

		Ok(GlobalStatusSnapshot {
			global_active,
			plan_active,
			active_call_count,
		})
	}

	/// Administrative hard reset. Intended for the startup reconciliation
	/// path only (spec §4.6).
	///
	/// # Errors
	/// Returns an error on Redis failure.
	pub async fn force_reset(&self) -> Result<(), Error> {
		let mut conn = self.conn.lock().await;
		let _: () = conn.del(GLOBAL_KEY).await?;
		let _: () = conn.del(ACTIVE_CALLS_KEY).await?;
		for plan in [Plan::Payg, Plan::Starter, Plan::Pro, Plan::Enterprise] {
			let _: () = conn.del(plan_key(plan)).await?;
		}
		Ok(())
	}

	/// Releases every C1 entry whose `call_id` is not present in
	/// `active_ids`, the authoritative set sourced from C2 (spec §4.1,
	/// §4.6). Returns the list of released ids for audit logging.
	///
	/// # Errors
	/// Returns an error on Redis failure or if `active_ids` cannot be
	/// serialized.
	pub async fn cleanup_stuck(&self, active_ids: &[String]) -> Result<Vec<String>, Error> {
		let ids_json = serde_json::to_string(active_ids)?;
		let mut conn = self.conn.lock().await;
		let released: Vec<String> = self.cleanup_script.key(GLOBAL_KEY).key(ACTIVE_CALLS_KEY).arg(&ids_json).invoke_async(&mut *conn).await?;
		Ok(released)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	async fn test_store() -> Option<GlobalCapacityStore> {
		let url = std::env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
		let store = GlobalCapacityStore::new(&url, 5).await.ok()?;
		store.force_reset().await.ok()?;
		Some(store)
	}

	#[tokio::test]
	async fn acquire_then_release_round_trips() {
		let Some(store) = test_store().await else { return };

		let outcome = store.acquire_slot("call-1", Plan::Pro, 42).await.unwrap();
		assert!(outcome.success);
		assert!(!outcome.idempotent);
		assert_eq!(outcome.current, 1);

		let release = store.release_slot("call-1").await.unwrap();
		assert!(release.success);
		assert_eq!(release.current, 0);
	}

	#[tokio::test]
	async fn duplicate_acquire_is_idempotent() {
		let Some(store) = test_store().await else { return };

		let first = store.acquire_slot("call-dup", Plan::Starter, 1).await.unwrap();
		assert!(!first.idempotent);
		let second = store.acquire_slot("call-dup", Plan::Starter, 1).await.unwrap();
		assert!(second.idempotent);
		assert_eq!(second.current, first.current);

		store.release_slot("call-dup").await.unwrap();
	}

	#[tokio::test]
	async fn release_on_unknown_call_is_a_noop() {
		let Some(store) = test_store().await else { return };

		let release = store.release_slot("never-existed").await.unwrap();
		assert!(release.success);
		assert_eq!(release.current, 0);
	}

	#[tokio::test]
	async fn global_cap_rejects_the_sixth_acquire() {
		let Some(store) = test_store().await else { return };

		let mut ids = Vec::new();
		for i in 0..5 {
			let id = format!("flood-{i}");
			let outcome = store.acquire_slot(&id, Plan::Enterprise, i).await.unwrap();
			assert!(outcome.success, "slot {i} should have been admitted");
			ids.push(id);
		}

		let rejected = store.acquire_slot("flood-5", Plan::Enterprise, 99).await.unwrap();
		assert!(!rejected.success);
		assert_eq!(rejected.current, 5);

		for id in ids {
			store.release_slot(&id).await.unwrap();
		}
	}

	#[tokio::test]
	async fn cleanup_stuck_releases_everything_not_in_the_authoritative_set() {
		let Some(store) = test_store().await else { return };

		store.acquire_slot("keep-me", Plan::Pro, 1).await.unwrap();
		store.acquire_slot("orphaned", Plan::Pro, 2).await.unwrap();

		let released = store.cleanup_stuck(&["keep-me".to_string()]).await.unwrap();
		assert_eq!(released, vec!["orphaned".to_string()]);

		let status = store.global_status().await.unwrap();
		assert_eq!(status.active_call_count, 1);

		store.release_slot("keep-me").await.unwrap();
	}
}
