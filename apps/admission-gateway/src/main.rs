use admission_controller::{AdmissionController, NoopProviderClient, OutboundCallService};
use admission_gateway::{AppState, Config, Metrics};
use batch_aggregator::BatchAggregator;
use call_registry::{schema, BatchCallRepository, SessionRepository, WebhookEventRepository};
use concurrency_core::{GlobalCapacityStore, TenantCounter};
use reconciliation_worker::ReconciliationWorker;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{filter::EnvFilter, fmt::format::JsonFields, util::SubscriberInitExt, Layer};
use webhook_processor::{NoopAnalysisHook, SqlTenantDirectory, WebhookProcessor};

fn init_tracing(config: &Config) {
	use tracing_subscriber::layer::SubscriberExt;

	let filter = EnvFilter::try_new(&config.rust_log).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::registry()
		.with(if config.log_json {
			Box::new(
				tracing_subscriber::fmt::layer()
					.fmt_fields(JsonFields::default())
					.event_format(tracing_subscriber::fmt::format().json().flatten_event(true).with_span_list(false))
					.with_filter(filter),
			) as Box<dyn Layer<_> + Send + Sync>
		} else {
			Box::new(tracing_subscriber::fmt::layer().event_format(tracing_subscriber::fmt::format().pretty()).with_filter(filter))
		})
		.init();
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
	dotenv::dotenv().ok();
	let config = Config::load();
	init_tracing(&config);

	let pool = SqlitePoolOptions::new().connect(&config.database_url).await?;
	schema::init_schema(&pool).await?;

	let tenants = TenantCounter::new(pool.clone());
	tenants.init_schema().await?;

	let directory = SqlTenantDirectory::new(pool.clone());
	directory.init_schema().await?;

	let sessions = SessionRepository::new(pool.clone());
	let events = WebhookEventRepository::new(pool.clone());
	let batch_repo = BatchCallRepository::new(pool.clone());

	let global = GlobalCapacityStore::new(&config.store_url, config.global_cap).await?;
	let webhook_controller = AdmissionController::new(global.clone(), tenants.clone(), sessions.clone());
	let outbound_controller = AdmissionController::new(global.clone(), tenants.clone(), sessions.clone());

	let batch_sink = Arc::new(BatchAggregator::new(batch_repo));

	let processor = Arc::new(WebhookProcessor::new(
		webhook_controller,
		sessions.clone(),
		events,
		Arc::new(directory),
		batch_sink,
		Arc::new(NoopAnalysisHook),
		config.provider_webhook_secret.clone(),
		config.phone_inbound_enabled,
		Duration::from_secs(config.analysis_timeout_secs),
		config.allow_missing_webhook_signature,
	));

	// The actual provider HTTP client is an external collaborator out of
	// scope for this repository (spec §1); `NoopProviderClient` always
	// admits, leaving the acquire/release protocol itself fully exercised.
	let outbound = Arc::new(OutboundCallService::new(outbound_controller, Arc::new(NoopProviderClient)));

	let metrics = Metrics::new()?;

	let reconciler = Arc::new(ReconciliationWorker::new(
		global.clone(),
		tenants,
		sessions,
		Duration::from_secs(config.stuck_call_age_minutes * 60),
		&metrics.registry,
	)?);

	let ready = Arc::new(AtomicBool::new(false));

	let rebuilt = reconciler.startup_reconcile().await?;
	tracing::info!(rebuilt, "startup reconciliation complete, accepting traffic");
	ready.store(true, Ordering::SeqCst);

	let sweep_interval = Duration::from_secs(config.reconcile_interval_minutes * 60);
	tokio::spawn(reconciler.run_periodic(sweep_interval));

	let state = AppState { processor, outbound, global, metrics, ready };

	let app = admission_gateway::routes::router(state).layer(TraceLayer::new_for_http());

	let addr = format!("{}:{}", config.host, config.port);
	let listener = TcpListener::bind(&addr).await?;
	tracing::info!(%addr, "listening");

	axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
	tracing::info!("server stopped");

	Ok(())
}

async fn shutdown_signal() {
	tokio::signal::ctrl_c().await.ok();
	tracing::info!("received ctrl+c, shutting down");
}
