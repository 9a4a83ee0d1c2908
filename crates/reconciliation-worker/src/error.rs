use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
	#[error(transparent)]
	ConcurrencyCore(#[from] concurrency_core::Error),

	#[error(transparent)]
	CallRegistry(#[from] call_registry::Error),

	#[error(transparent)]
	Prometheus(#[from] prometheus::Error),
}
