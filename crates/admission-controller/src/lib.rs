pub mod controller;
pub mod error;
pub mod outbound;

pub use controller::{AcquireOutcome, AdmissionController};
pub use error::AdmissionError;
pub use outbound::{NoopProviderClient, OutboundCallOutcome, OutboundCallService, ProviderCallError, ProviderClient};
