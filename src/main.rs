//! Wrapper entry point.
//!
//! Loads configuration (an optional JSON file path as the sole argument),
//! initializes stderr diagnostics, and runs the supervisor on a
//! single-threaded runtime. Exit code 0 means a clean shutdown propagated
//! through the backend; a fatal backend pipe error exits non-zero.

use std::path::Path;

use outpost_wrapper::backend::ChildLauncher;
use outpost_wrapper::{Result, Supervisor, WrapperConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        tracing::error!("fatal: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => WrapperConfig::load(Path::new(&path))?,
        None => WrapperConfig::default(),
    };

    let supervisor = Supervisor::new(config, Box::new(ChildLauncher))?;
    supervisor.spawn_fronts().await?;
    supervisor.run().await
}
