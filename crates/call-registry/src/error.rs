use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("a session with call_id {0:?} already exists")]
	DuplicateCallId(String),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}
