use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};

/// Gateway-level instruments from spec §9 (AMBIENT expansion), registered
/// into a single shared `Registry` the way `task_queue::pool::WorkerPool::new`
/// registers its own counters/gauges. `reconciliation-worker` registers its
/// `reconciliation_sweep_corrections_total` counter into this same registry
/// at construction time, so one `/metrics` exposition covers both.
#[derive(Clone)]
pub struct Metrics {
	pub registry: Registry,
	pub admission_acquire_total: CounterVec,
	pub admission_release_total: Counter,
	pub provider_429_total: Counter,
	pub global_capacity_current: Gauge,
}

impl Metrics {
	/// # Errors
	/// Returns an error if any instrument fails to register.
	pub fn new() -> Result<Self, prometheus::Error> {
		let registry = Registry::new();

		let admission_acquire_total = CounterVec::new(Opts::new("admission_acquire_total", "Outcomes of Acquire calls"), &["result"])?;
		let admission_release_total = Counter::new("admission_release_total", "Total Release calls")?;
		let provider_429_total = Counter::new("provider_429_total", "Total outbound call placements rejected by the upstream provider with HTTP 429")?;
		let global_capacity_current = Gauge::new("global_capacity_current", "Most recently observed global.active value")?;

		registry.register(Box::new(admission_acquire_total.clone()))?;
		registry.register(Box::new(admission_release_total.clone()))?;
		registry.register(Box::new(provider_429_total.clone()))?;
		registry.register(Box::new(global_capacity_current.clone()))?;

		Ok(Self {
			registry,
			admission_acquire_total,
			admission_release_total,
			provider_429_total,
			global_capacity_current,
		})
	}

	/// # Errors
	/// Returns an error if the gathered metric families cannot be encoded.
	pub fn encode(&self) -> Result<String, prometheus::Error> {
		let encoder = TextEncoder::new();
		let families = self.registry.gather();
		let mut buffer = Vec::new();
		encoder.encode(&families, &mut buffer).map_err(|err| prometheus::Error::Msg(err.to_string()))?;
		String::from_utf8(buffer).map_err(|err| prometheus::Error::Msg(err.to_string()))
	}
}
