pub mod error;
pub mod global_capacity;
pub mod plan;
pub mod tenant_counter;

pub use error::Error;
pub use global_capacity::{AcquireOutcome, CapacitySnapshot, GlobalCapacityStore, GlobalStatusSnapshot, ReleaseOutcome, SlotMetadata};
pub use plan::{effective_limit, Plan};
pub use tenant_counter::{TenantCounter, TenantSubscription};

/// Platform-wide concurrent-call ceiling imposed by the upstream provider
/// (spec §2, §3). Overridable via `GLOBAL_CAP` at the gateway's config
/// layer; this is the value used when nothing else is configured.
pub const DEFAULT_GLOBAL_CAP: i64 = 5;
