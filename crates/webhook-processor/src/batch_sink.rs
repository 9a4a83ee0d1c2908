use async_trait::async_trait;
use call_registry::Direction;

/// One call-lifecycle event that may belong to a batch campaign (spec
/// §4.7). Carries enough to let the aggregator match by id or fall back to
/// `external_phone_number` — the processor itself doesn't know the
/// aggregator's matching rules.
#[derive(Debug, Clone)]
pub struct BatchCallEvent {
	pub batch_call_id: Option<String>,
	pub recipient_id: Option<String>,
	pub external_phone_number: Option<String>,
	pub call_id: String,
	pub direction: Direction,
	pub ended: bool,
	pub succeeded: bool,
}

/// Port the webhook processor forwards batch-relevant events through (spec
/// §4.5 point 3 "propagate to C7"). Kept as a trait rather than a direct
/// dependency on `batch-aggregator` so the two crates don't form a cycle —
/// the gateway binds the concrete aggregator as the sink.
#[async_trait]
pub trait BatchEventSink: Send + Sync {
	async fn on_call_event(&self, event: BatchCallEvent);
}

/// No-op sink for events that don't carry batch metadata, or for gateways
/// that don't wire the aggregator in.
pub struct NoopBatchEventSink;

#[async_trait]
impl BatchEventSink for NoopBatchEventSink {
	async fn on_call_event(&self, _event: BatchCallEvent) {}
}
