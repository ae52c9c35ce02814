mod actor;
mod classifier;
mod devices;
mod merger;
mod poll;
mod publisher;
mod reconciler;
mod timers;

#[cfg(test)]
mod testing;

pub use actor::{EventSummary, SchedulerActor, SchedulerActorHandle, SchedulerCommand, TokioTimerDriver};
pub use classifier::{resolve_instance, Resolution};
pub use devices::{DeviceTable, LOCATION_DELIMITER};
pub use merger::{BackToBackMerger, Chain, MergeReport};
pub use poll::{reconcile_calendar, run_poll_loop};
pub use publisher::{PublishSwitch, Publisher};
pub use reconciler::{Outcome, PassReport, Reconciler, SchedulePolicy};
pub use timers::{
    ArmedTimer, PowerState, PowerSwitch, ScheduledEvent, TimerDriver, TimerFire, TimerId, TimerStore,
};

use crate::components::calendar::{Calendar, GraphCalendar, TokenManager};
use crate::config::Config;
use crate::error::{component_error, AppResult};
use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::redis_service::RedisActorHandle;

/// Powers meeting-room air conditioners from room calendars
#[derive(Default)]
pub struct AirconScheduler {
    handle: RwLock<Option<SchedulerActorHandle>>,
    cancel: CancellationToken,
}

impl AirconScheduler {
    /// Create a new scheduler component
    pub fn new() -> Self {
        Self {
            handle: RwLock::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Get the handle if it exists
    pub async fn get_handle(&self) -> Option<SchedulerActorHandle> {
        let handle_lock = self.handle.read().await;
        handle_lock.clone()
    }
}

#[async_trait]
impl super::Component for AirconScheduler {
    fn name(&self) -> &'static str {
        "aircon_scheduler"
    }

    async fn init(&self, config: Arc<RwLock<Config>>, redis_handle: RedisActorHandle) -> AppResult<()> {
        let config = config.read().await.clone();

        if config.rooms.is_empty() {
            return Err(component_error("No rooms configured"));
        }

        let devices = Arc::new(DeviceTable::from_rooms(&config.rooms));
        let policy = SchedulePolicy {
            lead_time: config.lead_time(),
            back_to_back_gap: config.back_to_back_gap(),
            timezone: config.tz()?,
        };
        info!(
            "Scheduling {} rooms with {} minute lead time and {} minute back-to-back gap",
            devices.len(),
            config.lead_time_minutes,
            config.back_to_back_gap_minutes
        );

        let mut handle_lock = self.handle.write().await;
        if handle_lock.is_some() {
            return Err(component_error("Scheduler already initialized"));
        }

        let publisher: Arc<dyn Publisher> = Arc::new(redis_handle.clone());
        let (mut actor, handle) = SchedulerActor::new(Reconciler::new(devices, policy), publisher);
        tokio::spawn(async move {
            actor.run().await;
        });

        let token_manager = TokenManager::new(
            config.graph_client_id.clone(),
            config.graph_client_secret.clone(),
            redis_handle,
        );
        let calendars: Vec<Box<dyn Calendar>> = config
            .rooms
            .iter()
            .map(|room| {
                Box::new(GraphCalendar::new(
                    room.email.clone(),
                    config.timezone.clone(),
                    Duration::hours(config.lookahead_hours),
                    token_manager.clone(),
                )) as Box<dyn Calendar>
            })
            .collect();

        let interval = std::time::Duration::from_secs(config.refresh_interval_secs);
        tokio::spawn(run_poll_loop(
            calendars,
            handle.clone(),
            interval,
            self.cancel.clone(),
        ));

        *handle_lock = Some(handle);

        Ok(())
    }

    async fn shutdown(&self) -> AppResult<()> {
        self.cancel.cancel();

        let handle_lock = self.handle.read().await;
        if let Some(handle) = &*handle_lock {
            handle.shutdown().await?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
