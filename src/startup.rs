use crate::components::redis_service::RedisActor;
use crate::components::{AirconScheduler, ComponentManager};
use crate::config::Config;
use crate::error::{component_error, Error};
use crate::shutdown;
use std::sync::Arc;
use tokio::sync::{oneshot, RwLock};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initialize logging with environment-based configuration
pub fn init_logging() -> miette::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn,redis=warn")),
        )
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Other(format!("Failed to set up logging: {}", e)))?;

    Ok(())
}

/// Load and initialize the application config
pub async fn load_config() -> miette::Result<Arc<RwLock<Config>>> {
    match Config::load() {
        Ok(config) => Ok(Arc::new(RwLock::new(config))),
        Err(e) => {
            error!("Failed to load configuration: {:?}", e);
            Err(e.into())
        }
    }
}

/// Start the components and run until a shutdown signal arrives
pub async fn start_service(config: Arc<RwLock<Config>>) -> miette::Result<()> {
    let redis_url = config.read().await.redis_url.clone();

    // Initialize Redis service
    let (mut redis_actor, redis_handle) = RedisActor::new(&redis_url)?;

    // Spawn Redis actor task
    tokio::spawn(async move {
        redis_actor.run().await;
    });

    // Initialize component manager
    let mut component_manager = ComponentManager::new(Arc::clone(&config));
    component_manager.register(AirconScheduler::new());

    let started = component_manager.init_all(redis_handle.clone()).await?;
    if started == 0 {
        let _ = redis_handle.shutdown().await;
        return Err(component_error("No component could be started").into());
    }

    let component_manager = Arc::new(component_manager);

    // Create shutdown channel
    let (shutdown_send, shutdown_recv) = oneshot::channel();

    // Spawn signal handler task
    tokio::spawn(shutdown::handle_signals(
        shutdown_send,
        Arc::clone(&component_manager),
        redis_handle,
    ));

    info!("Aircon scheduler running");

    shutdown_recv
        .await
        .map_err(|e| Error::Other(format!("Shutdown handler stopped: {}", e)))?;

    info!("Shutdown complete");
    Ok(())
}
