use super::classifier::{resolve_instance, Resolution};
use super::devices::DeviceTable;
use super::merger::BackToBackMerger;
use super::timers::{ScheduledEvent, TimerStore};
use crate::components::calendar::time::{format_clock, format_minutes};
use crate::components::calendar::CalendarEntry;
use crate::config::{DEFAULT_BACK_TO_BACK_GAP_MINUTES, DEFAULT_LEAD_TIME_MINUTES};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{error, info, info_span, warn};

/// Timing rules applied to every pass
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulePolicy {
    /// Power on this long before a meeting starts
    pub lead_time: Duration,
    /// Meetings closer than this share one on-window
    pub back_to_back_gap: Duration,
    /// Zone for entries without an IANA timezone label, and for log output
    pub timezone: Tz,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            lead_time: Duration::minutes(DEFAULT_LEAD_TIME_MINUTES),
            back_to_back_gap: Duration::minutes(DEFAULT_BACK_TO_BACK_GAP_MINUTES),
            timezone: chrono_tz::UTC,
        }
    }
}

/// What to do with a resolved entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<'a> {
    AllDay,
    Cancelled,
    /// Would have powered on before now
    Past,
    /// No registered room in locations or attendees
    Unsupported,
    Schedulable {
        device_id: &'a str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Counts from one reconciliation pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub scheduled: usize,
    pub rescheduled: usize,
    /// Previously scheduled events cancelled by this pass
    pub unscheduled: usize,
    /// Entries left unscheduled (all-day, cancelled, past, unsupported)
    pub skipped: usize,
    /// Entries whose change key matched the scheduled event
    pub unchanged: usize,
    /// Entries that could not be resolved or parsed
    pub unresolved: usize,
    pub merged_chains: usize,
    pub pruned: usize,
}

/// Diffs fetched entries against the timer store
pub struct Reconciler {
    devices: Arc<DeviceTable>,
    policy: SchedulePolicy,
    merger: BackToBackMerger,
}

impl Reconciler {
    pub fn new(devices: Arc<DeviceTable>, policy: SchedulePolicy) -> Self {
        let merger = BackToBackMerger::new(policy.back_to_back_gap);
        Self {
            devices,
            policy,
            merger,
        }
    }

    /// Timing rules this reconciler applies
    pub fn policy(&self) -> &SchedulePolicy {
        &self.policy
    }

    /// Decide what an entry needs. Checks run in priority order: all-day,
    /// cancelled, past, unsupported.
    pub fn classify(
        &self,
        instance: &CalendarEntry,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Outcome<'_> {
        let scheduled_start = start - self.policy.lead_time;

        if instance.is_all_day {
            Outcome::AllDay
        } else if instance.is_cancelled {
            Outcome::Cancelled
        } else if scheduled_start < now {
            Outcome::Past
        } else {
            match self.devices.resolve(instance) {
                Some(device_id) => Outcome::Schedulable {
                    device_id,
                    start: scheduled_start,
                    end,
                },
                None => Outcome::Unsupported,
            }
        }
    }

    /// Reconcile one fetched batch, then merge back-to-back events
    pub fn run_pass(
        &self,
        store: &mut TimerStore,
        entries: &[CalendarEntry],
        now: DateTime<Utc>,
    ) -> PassReport {
        let mut report = PassReport::default();

        for entry in entries {
            self.reconcile_entry(store, entry, entries, now, &mut report);
        }

        let merge = self.merger.merge(store, now);
        report.merged_chains = merge.merged_chains;
        report.pruned = merge.pruned;

        report
    }

    fn reconcile_entry(
        &self,
        store: &mut TimerStore,
        entry: &CalendarEntry,
        batch: &[CalendarEntry],
        now: DateTime<Utc>,
        report: &mut PassReport,
    ) {
        let instance = match resolve_instance(entry, batch) {
            Resolution::Master => return,
            Resolution::Removed => {
                if store.cancel(&entry.id, now) {
                    info!("Unscheduling removed event {}", short_id(&entry.id));
                    report.unscheduled += 1;
                }
                return;
            }
            Resolution::Instance(instance) => instance,
            Resolution::MissingMaster { series_master_id } => {
                error!(
                    "Skipping entry {} without instance to describe it (series master {})",
                    short_id(&entry.id),
                    short_id(series_master_id)
                );
                report.unresolved += 1;
                return;
            }
        };

        if let Some(existing) = store.get(&entry.id) {
            if existing.change_key == instance.change_key {
                report.unchanged += 1;
                return;
            }
        }

        let tz = self.policy.timezone;
        let (start, end) = match (entry.start.resolve(tz), entry.end.resolve(tz)) {
            (Ok(start), Ok(end)) => (start, end),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Skipping entry {} with unreadable times: {}", short_id(&entry.id), e);
                report.unresolved += 1;
                return;
            }
        };

        let span = info_span!(
            "entry",
            entry = %short_id(&entry.id),
            instance = %short_id(&instance.id),
            subject = %instance.subject(),
            start = %format_clock(start, tz),
            end = %format_clock(end, tz),
            duration = %format_minutes(end - start),
        );
        let _enter = span.enter();

        match self.classify(instance, start, end, now) {
            Outcome::AllDay => {
                if store.cancel(&entry.id, now) {
                    info!("Unscheduling all-day event");
                    report.unscheduled += 1;
                }
                info!("Skipping all-day event");
                report.skipped += 1;
            }
            Outcome::Cancelled => {
                if store.cancel(&entry.id, now) {
                    info!("Unscheduling cancelled event");
                    report.unscheduled += 1;
                }
                info!("Skipping cancelled event");
                report.skipped += 1;
            }
            Outcome::Past => {
                if store.cancel(&entry.id, now) {
                    info!("Unscheduling past event");
                    report.unscheduled += 1;
                }
                info!("Skipping past event");
                report.skipped += 1;
            }
            Outcome::Unsupported => {
                let location = instance.location_name().unwrap_or("");
                if store.cancel(&entry.id, now) {
                    info!(location, "Unscheduling event in unsupported location");
                    report.unscheduled += 1;
                }
                info!(location, "Skipping event in unsupported location");
                report.skipped += 1;
            }
            Outcome::Schedulable {
                device_id,
                start,
                end,
            } => {
                // Never leave two timer pairs in flight for one entry
                let existed = store.cancel(&entry.id, now);
                store.create(ScheduledEvent::new(
                    entry.clone(),
                    instance.clone(),
                    device_id,
                    start,
                    end,
                ));

                if existed {
                    info!(device = device_id, "Rescheduled event");
                    report.rescheduled += 1;
                } else {
                    info!(device = device_id, "Scheduled event");
                    report.scheduled += 1;
                }
            }
        }
    }
}

/// Leading part of a calendar id; full ids are long and mostly shared prefix
fn short_id(id: &str) -> &str {
    match id.char_indices().nth(10) {
        Some((index, _)) => &id[..index],
        None => id,
    }
}
