use crate::error::Error;
use async_trait::async_trait;
use call_registry::{BatchCallRepository, RecipientStatus};
use chrono::{Duration, Utc};
use tracing::{info, warn};
use webhook_processor::{BatchCallEvent, BatchEventSink};

/// Fallback window for matching a recipient by `external_phone_number`
/// when the event doesn't carry `recipient_id` (spec §4.7).
const PHONE_MATCH_WINDOW_HOURS: i64 = 24;

/// C7: maintains `{recipient_id → status}` per batch and the aggregate
/// counters derived from it (spec §4.7).
#[derive(Clone)]
pub struct BatchAggregator {
	repo: BatchCallRepository,
}

impl BatchAggregator {
	#[must_use]
	pub const fn new(repo: BatchCallRepository) -> Self {
		Self { repo }
	}

	/// # Errors
	/// Returns an error on a database failure.
	pub async fn apply_event(&self, event: &BatchCallEvent) -> Result<(), Error> {
		let Some(batch_id) = event.batch_call_id.as_deref() else {
			return Ok(());
		};

		let Some(mut batch) = self.repo.get(batch_id).await? else {
			warn!(batch_id, "received a batch-tagged call event for an unknown batch, ignoring");
			return Ok(());
		};

		let now = Utc::now();
		let target_index = event
			.recipient_id
			.as_deref()
			.and_then(|recipient_id| batch.recipients.iter().position(|r| r.recipient_id == recipient_id))
			.or_else(|| {
				event.external_phone_number.as_deref().and_then(|phone| {
					batch.recipients.iter().position(|r| {
						r.external_phone_number == phone && !r.status.is_settled() && now.signed_duration_since(r.updated_at) <= Duration::hours(PHONE_MATCH_WINDOW_HOURS)
					})
				})
			});

		let Some(index) = target_index else {
			warn!(batch_id, call_id = %event.call_id, "could not match this event to any pending recipient in the batch");
			return Ok(());
		};

		let new_status = if event.ended {
			if event.succeeded {
				RecipientStatus::Completed
			} else {
				RecipientStatus::Failed
			}
		} else {
			RecipientStatus::InProgress
		};

		{
			let recipient = &mut batch.recipients[index];
			recipient.status = new_status;
			recipient.call_id = Some(event.call_id.clone());
			recipient.updated_at = now;
		}

		recompute_aggregates(&mut batch, now);
		self.repo.save(&batch).await?;
		Ok(())
	}
}

fn recompute_aggregates(batch: &mut call_registry::BatchCall, now: chrono::DateTime<Utc>) {
	let completed = batch.recipients.iter().filter(|r| r.status == RecipientStatus::Completed).count();
	let failed = batch.recipients.iter().filter(|r| r.status == RecipientStatus::Failed).count();
	let successful = completed;

	batch.completed = i64::try_from(completed).unwrap_or(i64::MAX);
	batch.failed = i64::try_from(failed).unwrap_or(i64::MAX);
	batch.successful = i64::try_from(successful).unwrap_or(i64::MAX);

	let settled = completed + failed;
	if settled == batch.recipients.len() && !batch.recipients.is_empty() {
		if batch.status != call_registry::BatchStatus::Completed {
			info!(batch_id = %batch.batch_id, "batch completed");
		}
		batch.status = call_registry::BatchStatus::Completed;
		batch.completed_at = Some(now);
	} else if settled > 0 || batch.recipients.iter().any(|r| r.status == RecipientStatus::InProgress) {
		batch.status = call_registry::BatchStatus::InProgress;
	}
}

#[async_trait]
impl BatchEventSink for BatchAggregator {
	async fn on_call_event(&self, event: BatchCallEvent) {
		if let Err(err) = self.apply_event(&event).await {
			warn!(call_id = %event.call_id, error = %err, "failed to apply batch call event");
		}
	}
}
