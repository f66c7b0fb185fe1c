//! Process lifecycle: the HTTP server and the expiration scheduler run side
//! by side and stop together.

pub mod lifecycle;

pub use lifecycle::Application;
