//! Ticketing server.
//!
//! ```bash
//! docker compose up -d postgres
//! DATABASE_URL=postgres://... AUTH_TOKENS=alice:<uuid> cargo run --bin server
//! ```

use ticketing::{ApplicationBuilder, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    ApplicationBuilder::new()
        .with_config(config)
        .with_tracing()?
        .with_metrics()?
        .with_resources()
        .await?
        .build()
        .await?
        .run()
        .await
}
