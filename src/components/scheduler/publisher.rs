use super::timers::{PowerState, PowerSwitch};
use crate::error::AppResult;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Delivers power commands to air-conditioner controllers
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, device_id: &str, state: PowerState) -> AppResult<()>;
}

/// `PowerSwitch` that hands commands to a background publishing task.
///
/// Commands are published one at a time in the order they were switched, so
/// an off that follows an on for the same device always lands second.
pub struct PublishSwitch {
    command_tx: mpsc::UnboundedSender<(String, PowerState)>,
}

impl PublishSwitch {
    /// Spawn the publishing task. Must be called inside a Tokio runtime.
    pub fn new(publisher: Arc<dyn Publisher>) -> (Self, JoinHandle<()>) {
        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<(String, PowerState)>();

        let task = tokio::spawn(async move {
            while let Some((device_id, state)) = command_rx.recv().await {
                info!(device = device_id.as_str(), "Fire event: power {}", state);
                if let Err(e) = publisher.publish(&device_id, state).await {
                    error!("Failed to publish power {} to device {}: {}", state, device_id, e);
                }
            }
        });

        (Self { command_tx }, task)
    }
}

impl PowerSwitch for PublishSwitch {
    fn switch(&self, device_id: &str, state: PowerState) {
        if self.command_tx.send((device_id.to_string(), state)).is_err() {
            error!(
                "Publishing task has stopped; dropping power {} for device {}",
                state, device_id
            );
        }
    }
}
