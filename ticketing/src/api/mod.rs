//! HTTP API handlers, grouped by resource:
//! - events: registration, availability, manual queue run, cancellation
//! - queue: join, position, release
//! - checkout: hosted checkout and ticket lookups
//! - webhooks: signed provider notifications

pub mod checkout;
pub mod events;
pub mod queue;
pub mod webhooks;

pub use checkout::{begin_checkout, payment_ticket, session_status, user_ticket};
pub use events::{availability, cancel_event, process_queue, register_event};
pub use queue::{join_queue, queue_position, release_offer};
pub use webhooks::payment_webhook;
