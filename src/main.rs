use aircon_scheduler::startup;
use tracing::info;

#[tokio::main]
async fn main() -> miette::Result<()> {
    // Initialize logging
    startup::init_logging()?;

    info!("Starting aircon scheduler");

    // Load configuration
    let config = startup::load_config().await?;

    // Run until SIGTERM or SIGINT
    startup::start_service(config).await
}
