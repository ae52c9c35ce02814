use super::actor::SchedulerActorHandle;
use super::reconciler::PassReport;
use crate::components::calendar::Calendar;
use crate::error::AppResult;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Fetch one calendar and reconcile its entries
pub async fn reconcile_calendar(
    calendar: &dyn Calendar,
    handle: &SchedulerActorHandle,
) -> AppResult<PassReport> {
    let entries = calendar.fetch().await?;
    handle.reconcile(entries).await
}

/// Reconcile every calendar, then sleep for `interval`, until cancelled.
///
/// Calendars are handled one after another so passes never interleave. A
/// failed fetch is logged and leaves existing timers untouched.
pub async fn run_poll_loop(
    calendars: Vec<Box<dyn Calendar>>,
    handle: SchedulerActorHandle,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!(
        "Polling {} calendars every {} seconds",
        calendars.len(),
        interval.as_secs()
    );

    loop {
        for calendar in &calendars {
            if cancel.is_cancelled() {
                break;
            }

            match reconcile_calendar(calendar.as_ref(), &handle).await {
                Ok(report) => info!(
                    "Reconciled {}: {} scheduled, {} rescheduled, {} unscheduled",
                    calendar.name(),
                    report.scheduled,
                    report.rescheduled,
                    report.unscheduled
                ),
                Err(e) => error!("Failed to reconcile {}: {}", calendar.name(), e),
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Calendar polling stopped");
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
