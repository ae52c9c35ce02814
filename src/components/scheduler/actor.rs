use super::publisher::{PublishSwitch, Publisher};
use super::reconciler::{PassReport, Reconciler};
use super::timers::{TimerDriver, TimerFire, TimerId, TimerStore};
use crate::components::calendar::time::format_minutes;
use crate::components::calendar::CalendarEntry;
use crate::error::{scheduler_error, AppResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The scheduler actor; sole owner of the timer store
pub struct SchedulerActor {
    reconciler: Reconciler,
    store: TimerStore,
    command_rx: mpsc::Receiver<SchedulerCommand>,
    _publish_task: JoinHandle<()>,
}

/// Commands that can be sent to the scheduler actor
pub enum SchedulerCommand {
    Reconcile(Vec<CalendarEntry>, mpsc::Sender<PassReport>),
    TimerFired(TimerFire),
    ActiveEvents(mpsc::Sender<Vec<EventSummary>>),
    Shutdown,
}

/// Snapshot of one scheduled event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSummary {
    pub id: String,
    pub device_id: String,
    pub subject: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub power_on_at: Option<DateTime<Utc>>,
    pub power_off_at: Option<DateTime<Utc>>,
}

/// Handle for communicating with the scheduler actor
#[derive(Clone)]
pub struct SchedulerActorHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerActorHandle {
    /// Run one reconciliation pass over a fetched batch
    pub async fn reconcile(&self, entries: Vec<CalendarEntry>) -> AppResult<PassReport> {
        let (response_tx, mut response_rx) = mpsc::channel(1);
        self.command_tx
            .send(SchedulerCommand::Reconcile(entries, response_tx))
            .await
            .map_err(|e| scheduler_error(&format!("Actor mailbox error: {}", e)))?;

        response_rx
            .recv()
            .await
            .ok_or_else(|| scheduler_error("Response channel closed"))
    }

    /// Currently scheduled events ordered by start
    pub async fn active_events(&self) -> AppResult<Vec<EventSummary>> {
        let (response_tx, mut response_rx) = mpsc::channel(1);
        self.command_tx
            .send(SchedulerCommand::ActiveEvents(response_tx))
            .await
            .map_err(|e| scheduler_error(&format!("Actor mailbox error: {}", e)))?;

        response_rx
            .recv()
            .await
            .ok_or_else(|| scheduler_error("Response channel closed"))
    }

    /// Shutdown the actor
    pub async fn shutdown(&self) -> AppResult<()> {
        let _ = self.command_tx.send(SchedulerCommand::Shutdown).await;
        Ok(())
    }
}

impl SchedulerActor {
    /// Create a new actor and return its handle. Must be called inside a
    /// Tokio runtime, since publishing runs on its own task.
    pub fn new(reconciler: Reconciler, publisher: Arc<dyn Publisher>) -> (Self, SchedulerActorHandle) {
        let (command_tx, command_rx) = mpsc::channel(64);

        let driver = TokioTimerDriver::new(command_tx.clone());
        let (switch, publish_task) = PublishSwitch::new(publisher);

        let actor = Self {
            reconciler,
            store: TimerStore::new(driver, switch),
            command_rx,
            _publish_task: publish_task,
        };

        let handle = SchedulerActorHandle { command_tx };

        (actor, handle)
    }

    /// Start the actor's processing loop
    pub async fn run(&mut self) {
        let policy = self.reconciler.policy();
        info!(
            "Scheduler actor started (lead time {}, back-to-back gap {}, zone {})",
            format_minutes(policy.lead_time),
            format_minutes(policy.back_to_back_gap),
            policy.timezone
        );

        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                SchedulerCommand::Reconcile(entries, response_tx) => {
                    let report = self.reconciler.run_pass(&mut self.store, &entries, Utc::now());
                    info!(
                        "Pass done: {} scheduled, {} rescheduled, {} unscheduled, {} unchanged, {} active",
                        report.scheduled,
                        report.rescheduled,
                        report.unscheduled,
                        report.unchanged,
                        self.store.len()
                    );
                    let _ = response_tx.send(report).await;
                }
                SchedulerCommand::TimerFired(fire) => {
                    self.store.fire(fire, Utc::now());
                }
                SchedulerCommand::ActiveEvents(response_tx) => {
                    let _ = response_tx.send(self.summaries()).await;
                }
                SchedulerCommand::Shutdown => {
                    info!("Scheduler actor shutting down");
                    break;
                }
            }
        }

        self.store.disarm_all();
        info!("Scheduler actor shut down");
    }

    fn summaries(&self) -> Vec<EventSummary> {
        let mut summaries: Vec<EventSummary> = self
            .store
            .events()
            .map(|event| EventSummary {
                id: event.id().to_string(),
                device_id: event.device_id.clone(),
                subject: event.instance.subject().to_string(),
                start: event.start,
                end: event.end,
                power_on_at: event.power_on().map(|timer| timer.at),
                power_off_at: event.power_off().map(|timer| timer.at),
            })
            .collect();
        summaries.sort_by(|a, b| (a.start, &a.id).cmp(&(b.start, &b.id)));
        summaries
    }
}

/// Timers as sleeping Tokio tasks that post back to the actor's mailbox
pub struct TokioTimerDriver {
    command_tx: mpsc::Sender<SchedulerCommand>,
    tasks: HashMap<TimerId, JoinHandle<()>>,
}

impl TokioTimerDriver {
    pub fn new(command_tx: mpsc::Sender<SchedulerCommand>) -> Self {
        Self {
            command_tx,
            tasks: HashMap::new(),
        }
    }
}

impl TimerDriver for TokioTimerDriver {
    fn arm(&mut self, fire: TimerFire, at: DateTime<Utc>) {
        let delay = (at - Utc::now()).to_std().unwrap_or(StdDuration::ZERO);
        let timer = fire.timer;
        let command_tx = self.command_tx.clone();

        debug!("Arming {} timer {} in {:?}", fire.state, timer, delay);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if command_tx.send(SchedulerCommand::TimerFired(fire)).await.is_err() {
                warn!("Scheduler stopped before timer {} fired", timer);
            }
        });

        if let Some(previous) = self.tasks.insert(timer, task) {
            previous.abort();
        }
    }

    fn disarm(&mut self, timer: TimerId) {
        if let Some(task) = self.tasks.remove(&timer) {
            task.abort();
        }
    }

    fn fired(&mut self, timer: TimerId) {
        self.tasks.remove(&timer);
    }
}
