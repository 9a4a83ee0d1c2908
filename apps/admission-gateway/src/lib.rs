pub mod config;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::ApiError;
pub use metrics::Metrics;
pub use state::AppState;
