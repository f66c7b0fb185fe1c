//! Application initialization.
//!
//! - **`resources`**: infrastructure setup (database, rate limiter, payment provider)
//! - **`builder`**: wiring and the declarative [`ApplicationBuilder`]
//!
//! ```rust,ignore
//! let resources = ResourceManager::from_config(&config).await?;
//! let Wiring { state, scheduler } = wire(&config, resources, identity, None);
//! ```

pub mod builder;
pub mod resources;

pub use builder::{ApplicationBuilder, DEFAULT_LOG_FILTER, Wiring, wire};
pub use resources::ResourceManager;
