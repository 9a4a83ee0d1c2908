use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
	#[error("redis error: {0}")]
	Redis(#[from] redis::RedisError),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("prometheus error: {0}")]
	Prometheus(#[from] prometheus::Error),

	#[error("conversion error: {0}")]
	Conversion(String),
}
