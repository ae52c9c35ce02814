use super::timers::{PowerState, PowerSwitch, TimerDriver, TimerFire, TimerId, TimerStore};
use crate::components::calendar::{
    Attendee, CalendarEntry, EmailAddress, EntryDateTime, EntryKind, Location,
};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Fixed test day, UTC
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, minute, 0).unwrap()
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimerOp {
    Arm(TimerFire, DateTime<Utc>),
    Disarm(TimerId),
}

#[derive(Clone, Default)]
pub struct RecordingDriver {
    ops: Arc<Mutex<Vec<TimerOp>>>,
    live: Arc<Mutex<BTreeMap<TimerId, (TimerFire, DateTime<Utc>)>>>,
}

impl RecordingDriver {
    pub fn ops(&self) -> Vec<TimerOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&TimerOp) -> bool) -> usize {
        self.ops.lock().unwrap().iter().filter(|op| pred(op)).count()
    }

    pub fn clear(&self) {
        self.ops.lock().unwrap().clear();
    }

    /// Timers armed and neither disarmed nor fired, ordered by fire time
    pub fn live(&self) -> Vec<(TimerFire, DateTime<Utc>)> {
        let mut live: Vec<_> = self.live.lock().unwrap().values().cloned().collect();
        live.sort_by_key(|(fire, at)| (*at, fire.timer));
        live
    }
}

impl TimerDriver for RecordingDriver {
    fn arm(&mut self, fire: TimerFire, at: DateTime<Utc>) {
        self.live.lock().unwrap().insert(fire.timer, (fire.clone(), at));
        self.ops.lock().unwrap().push(TimerOp::Arm(fire, at));
    }

    fn disarm(&mut self, timer: TimerId) {
        self.live.lock().unwrap().remove(&timer);
        self.ops.lock().unwrap().push(TimerOp::Disarm(timer));
    }

    fn fired(&mut self, timer: TimerId) {
        self.live.lock().unwrap().remove(&timer);
    }
}

#[derive(Clone, Default)]
pub struct RecordingSwitch {
    calls: Arc<Mutex<Vec<(String, PowerState)>>>,
}

impl RecordingSwitch {
    pub fn calls(&self) -> Vec<(String, PowerState)> {
        self.calls.lock().unwrap().clone()
    }
}

impl PowerSwitch for RecordingSwitch {
    fn switch(&self, device_id: &str, state: PowerState) {
        self.calls.lock().unwrap().push((device_id.to_string(), state));
    }
}

pub fn recording_store() -> (TimerStore, RecordingDriver, RecordingSwitch) {
    let driver = RecordingDriver::default();
    let switch = RecordingSwitch::default();
    let store = TimerStore::new(driver.clone(), switch.clone());
    (store, driver, switch)
}

/// Builder for calendar entries; defaults to a 10:00-10:30 single instance
pub struct EntryBuilder {
    entry: CalendarEntry,
}

impl EntryBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            entry: CalendarEntry {
                id: id.to_string(),
                kind: EntryKind::SingleInstance,
                start: EntryDateTime::utc(at(10, 0)),
                end: EntryDateTime::utc(at(10, 30)),
                change_key: Some("ck1".to_string()),
                subject: Some("Meeting".to_string()),
                is_cancelled: false,
                is_all_day: false,
                locations: Vec::new(),
                attendees: Vec::new(),
            },
        }
    }

    pub fn kind(mut self, kind: EntryKind) -> Self {
        self.entry.kind = kind;
        self
    }

    pub fn occurrence_of(self, master: &str) -> Self {
        self.kind(EntryKind::Occurrence {
            series_master_id: master.to_string(),
        })
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.entry.subject = Some(subject.to_string());
        self
    }

    pub fn change_key(mut self, change_key: &str) -> Self {
        self.entry.change_key = Some(change_key.to_string());
        self
    }

    pub fn window(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.entry.start = EntryDateTime::utc(start);
        self.entry.end = EntryDateTime::utc(end);
        self
    }

    pub fn location(mut self, name: &str) -> Self {
        self.entry.locations.push(Location {
            display_name: name.to_string(),
        });
        self
    }

    pub fn attendee(mut self, name: &str) -> Self {
        self.entry.attendees.push(Attendee {
            email_address: EmailAddress {
                name: name.to_string(),
                address: None,
            },
        });
        self
    }

    pub fn cancelled(mut self) -> Self {
        self.entry.is_cancelled = true;
        self
    }

    pub fn all_day(mut self) -> Self {
        self.entry.is_all_day = true;
        self
    }

    pub fn build(self) -> CalendarEntry {
        self.entry
    }
}
