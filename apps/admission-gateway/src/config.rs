use clap::Parser;

/// Closed set of environment/config flags from spec §6, following the
/// `#[arg(long, env = "...", default_value = "...")]` style of
/// `file_host::config::Config` / `task_queue::config::Config`.
#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
	/// Use JSON formatting for tracing
	#[arg(long, env = "LOG_JSON", default_value = "false")]
	pub log_json: bool,

	/// Log level / filter directive for `tracing_subscriber::EnvFilter`
	#[arg(long, env = "RUST_LOG", default_value = "info")]
	pub rust_log: String,

	/// Address the HTTP server binds to
	#[arg(long, env = "HOST", default_value = "0.0.0.0")]
	pub host: String,

	/// Port the HTTP server binds to
	#[arg(long, env = "PORT", default_value = "8080")]
	pub port: u16,

	/// Platform-wide concurrent call ceiling (spec §3, §6)
	#[arg(long, env = "GLOBAL_CAP", default_value = "5")]
	pub global_cap: i64,

	/// Master switch for inbound admission (spec §4.5, §6, §9)
	#[arg(long, env = "PHONE_INBOUND_ENABLED", default_value = "true")]
	pub phone_inbound_enabled: bool,

	/// Shared secret for HMAC webhook signature verification; absence is
	/// fatal once the gateway actually receives a webhook, not at startup,
	/// so a gateway that only serves `/healthz` and `/v1/capacity` can still
	/// come up without it configured.
	#[arg(long, env = "PROVIDER_WEBHOOK_SECRET")]
	pub provider_webhook_secret: Option<String>,

	/// Connection string for the shared store backing C1 (spec §6)
	#[arg(long, env = "STORE_URL", default_value = "redis://127.0.0.1/")]
	pub store_url: String,

	/// SQLite connection string backing C2/C3/C7 and the webhook idempotency
	/// table (additional, standard in this lineage's `sqlx` usage)
	#[arg(long, env = "DATABASE_URL", default_value = "sqlite://admission-gateway.db")]
	pub database_url: String,

	/// Interval between reconciliation sweeps (spec §6)
	#[arg(long, env = "RECONCILE_INTERVAL_MINUTES", default_value = "10")]
	pub reconcile_interval_minutes: u64,

	/// Age past which an active session is considered stuck/orphaned (spec §6, §4.6)
	#[arg(long, env = "STUCK_CALL_AGE_MINUTES", default_value = "15")]
	pub stuck_call_age_minutes: u64,

	/// Budget for the `dispatch_analysis` off-critical-path task (spec §4.5 closing paragraph)
	#[arg(long, env = "ANALYSIS_TIMEOUT_SECS", default_value = "10")]
	pub analysis_timeout_secs: u64,

	/// When `true`, an unsigned webhook is accepted if `PROVIDER_WEBHOOK_SECRET`
	/// is unset rather than rejected with `MissingSecret` (spec §4.5 point 1:
	/// "In production, absence of the shared secret is a hard failure; in
	/// development it MAY be bypassed"). Defaults to off so a misconfigured
	/// production deploy fails closed.
	#[arg(long, env = "ALLOW_MISSING_WEBHOOK_SIGNATURE", default_value = "false")]
	pub allow_missing_webhook_signature: bool,
}

impl Config {
	#[must_use]
	pub fn load() -> Self {
		Self::parse()
	}
}
