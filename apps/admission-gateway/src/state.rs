use crate::metrics::Metrics;
use admission_controller::OutboundCallService;
use concurrency_core::GlobalCapacityStore;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use webhook_processor::WebhookProcessor;

/// Shared application state injected into every handler via `axum`'s
/// `State` extractor, following the `AppState` shape in `file_host::lib`.
#[derive(Clone)]
pub struct AppState {
	pub processor: Arc<WebhookProcessor>,
	pub outbound: Arc<OutboundCallService>,
	pub global: GlobalCapacityStore,
	pub metrics: Metrics,
	/// Flips to `true` once startup reconciliation has completed; gates
	/// `/healthz` so a load balancer doesn't route traffic into a process
	/// holding a cold/incorrect C1 counter (spec §2 SUPPLEMENT).
	pub ready: Arc<AtomicBool>,
}
