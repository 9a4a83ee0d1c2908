pub mod batch_repository;
pub mod error;
pub mod model;
pub mod schema;
pub mod session_repository;
pub mod webhook_event_repository;

pub use batch_repository::BatchCallRepository;
pub use error::Error;
pub use model::{BatchCall, BatchStatus, Direction, NewSession, Recipient, RecipientStatus, Session, SessionStatus};
pub use session_repository::SessionRepository;
pub use webhook_event_repository::WebhookEventRepository;
