use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
	#[error(transparent)]
	CallRegistry(#[from] call_registry::Error),
}
