use crate::components::calendar::CalendarEntry;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

pub type TimerId = u64;

/// Binary power state of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerState {
    On,
    Off,
}

impl PowerState {
    /// Wire payload published for this state
    pub fn payload(self) -> &'static str {
        match self {
            PowerState::On => "1",
            PowerState::Off => "0",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::On => write!(f, "on"),
            PowerState::Off => write!(f, "off"),
        }
    }
}

/// Payload a timer hands back when it fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFire {
    pub timer: TimerId,
    pub event_id: String,
    pub device_id: String,
    pub state: PowerState,
}

/// Something that can run a payload at a point in time
pub trait TimerDriver: Send {
    fn arm(&mut self, fire: TimerFire, at: DateTime<Utc>);

    /// Cancel a timer; unknown ids are ignored
    fn disarm(&mut self, timer: TimerId);

    /// Release bookkeeping for a timer whose firing has been handled
    fn fired(&mut self, _timer: TimerId) {}
}

/// Immediate power action. Must not block the caller.
pub trait PowerSwitch: Send {
    fn switch(&self, device_id: &str, state: PowerState);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedTimer {
    pub id: TimerId,
    pub at: DateTime<Utc>,
}

/// A booking the store is powering a room for
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub entry: CalendarEntry,
    /// Entry carrying subject, location and change key
    pub instance: CalendarEntry,
    pub device_id: String,
    /// Meeting start minus lead time
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Change key of the instance entry when this event was built
    pub change_key: Option<String>,
    power_on: Option<ArmedTimer>,
    power_off: Option<ArmedTimer>,
}

impl ScheduledEvent {
    pub fn new(
        entry: CalendarEntry,
        instance: CalendarEntry,
        device_id: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        let change_key = instance.change_key.clone();
        Self {
            entry,
            instance,
            device_id: device_id.into(),
            start,
            end,
            change_key,
            power_on: None,
            power_off: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.entry.id
    }

    pub fn power_on(&self) -> Option<ArmedTimer> {
        self.power_on
    }

    pub fn power_off(&self) -> Option<ArmedTimer> {
        self.power_off
    }

    /// Whether the room is presumed powered for this event at `now`
    pub fn is_in_progress(&self, now: DateTime<Utc>) -> bool {
        self.start < now && now < self.end
    }
}

/// Active scheduled events and the timers behind them.
///
/// Every mutation goes through one owner (the scheduler actor), including the
/// self-removal performed when a power-off timer fires.
pub struct TimerStore {
    events: HashMap<String, ScheduledEvent>,
    device_power: HashMap<String, PowerState>,
    driver: Box<dyn TimerDriver>,
    switch: Box<dyn PowerSwitch>,
    next_timer: TimerId,
}

impl TimerStore {
    pub fn new(driver: impl TimerDriver + 'static, switch: impl PowerSwitch + 'static) -> Self {
        Self {
            events: HashMap::new(),
            device_power: HashMap::new(),
            driver: Box::new(driver),
            switch: Box::new(switch),
            next_timer: 0,
        }
    }

    pub fn get(&self, id: &str) -> Option<&ScheduledEvent> {
        self.events.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.events.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> impl Iterator<Item = &ScheduledEvent> {
        self.events.values()
    }

    /// Last state switched for a device by this store
    pub fn device_power(&self, device_id: &str) -> Option<PowerState> {
        self.device_power.get(device_id).copied()
    }

    /// Register an event with a power-on timer at its start and a power-off
    /// timer at its end
    pub fn create(&mut self, mut event: ScheduledEvent) {
        if let Some(existing) = self.events.remove(event.id()) {
            warn!("Replacing scheduled event {} without cancelling it", existing.id());
            self.disarm(existing.power_on);
            self.disarm(existing.power_off);
        }

        let power_on = self.arm(event.id(), &event.device_id, PowerState::On, event.start);
        let power_off = self.arm(event.id(), &event.device_id, PowerState::Off, event.end);
        event.power_on = Some(power_on);
        event.power_off = Some(power_off);
        self.events.insert(event.id().to_string(), event);
    }

    /// Cancel an event's timers and drop it. Returns whether it existed.
    ///
    /// An event that is in progress has its room switched off right away, so
    /// no device is left on without a pending power-off.
    pub fn cancel(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        let Some(event) = self.events.remove(id) else {
            return false;
        };

        self.disarm(event.power_on);
        self.disarm(event.power_off);

        if event.is_in_progress(now) {
            info!(
                "Powering off device {} for cancelled in-progress event {}",
                event.device_id, id
            );
            self.switch_power(&event.device_id, PowerState::Off);
        }

        true
    }

    /// Handle a timer firing. Returns false when the timer is no longer live.
    pub fn fire(&mut self, fire: TimerFire, now: DateTime<Utc>) -> bool {
        self.driver.fired(fire.timer);

        let live = self
            .events
            .get(&fire.event_id)
            .and_then(|event| match fire.state {
                PowerState::On => event.power_on,
                PowerState::Off => event.power_off,
            })
            .is_some_and(|armed| armed.id == fire.timer);

        if !live {
            debug!(
                "Ignoring stale {} timer {} for event {}",
                fire.state, fire.timer, fire.event_id
            );
            return false;
        }

        match fire.state {
            PowerState::On => {
                if let Some(event) = self.events.get_mut(&fire.event_id) {
                    event.power_on = None;
                }
                self.switch_power(&fire.device_id, PowerState::On);
            }
            PowerState::Off => {
                self.switch_power(&fire.device_id, PowerState::Off);
                if let Some(event) = self.events.remove(&fire.event_id) {
                    self.disarm(event.power_on);
                }

                // Members of a merged window that ended under this power-off
                self.events.retain(|_, event| {
                    event.device_id != fire.device_id
                        || event.end > now
                        || event.power_on.is_some()
                        || event.power_off.is_some()
                });
            }
        }

        true
    }

    /// Cancel every timer, leaving events in place. Used on shutdown.
    pub fn disarm_all(&mut self) {
        let timers: Vec<ArmedTimer> = self
            .events
            .values_mut()
            .flat_map(|event| [event.power_on.take(), event.power_off.take()])
            .flatten()
            .collect();

        for timer in timers {
            self.driver.disarm(timer.id);
        }
    }

    /// Drop events that ended with no power-off still pending
    pub(crate) fn prune_finished(&mut self, now: DateTime<Utc>) -> usize {
        let finished: Vec<String> = self
            .events
            .values()
            .filter(|event| event.end <= now && event.power_off.is_none())
            .map(|event| event.id().to_string())
            .collect();

        for id in &finished {
            if let Some(event) = self.events.remove(id) {
                self.disarm(event.power_on);
            }
        }

        finished.len()
    }

    pub(crate) fn arm_power_on(&mut self, id: &str, at: DateTime<Utc>) {
        self.rearm(id, PowerState::On, at);
    }

    pub(crate) fn arm_power_off(&mut self, id: &str, at: DateTime<Utc>) {
        self.rearm(id, PowerState::Off, at);
    }

    pub(crate) fn disarm_power_on(&mut self, id: &str) {
        let timer = self.events.get_mut(id).and_then(|e| e.power_on.take());
        self.disarm(timer);
    }

    pub(crate) fn disarm_power_off(&mut self, id: &str) {
        let timer = self.events.get_mut(id).and_then(|e| e.power_off.take());
        self.disarm(timer);
    }

    /// Switch a device now and remember the state
    pub(crate) fn switch_power(&mut self, device_id: &str, state: PowerState) {
        self.device_power.insert(device_id.to_string(), state);
        self.switch.switch(device_id, state);
    }

    fn rearm(&mut self, id: &str, state: PowerState, at: DateTime<Utc>) {
        let Some(event) = self.events.get(id) else {
            return;
        };
        let device_id = event.device_id.clone();
        let previous = match state {
            PowerState::On => event.power_on,
            PowerState::Off => event.power_off,
        };
        let armed = self.arm(id, &device_id, state, at);

        self.disarm(previous);
        if let Some(event) = self.events.get_mut(id) {
            match state {
                PowerState::On => event.power_on = Some(armed),
                PowerState::Off => event.power_off = Some(armed),
            }
        }
    }

    fn arm(&mut self, event_id: &str, device_id: &str, state: PowerState, at: DateTime<Utc>) -> ArmedTimer {
        self.next_timer += 1;
        let fire = TimerFire {
            timer: self.next_timer,
            event_id: event_id.to_string(),
            device_id: device_id.to_string(),
            state,
        };
        self.driver.arm(fire, at);

        ArmedTimer {
            id: self.next_timer,
            at,
        }
    }

    fn disarm(&mut self, timer: Option<ArmedTimer>) {
        if let Some(timer) = timer {
            self.driver.disarm(timer.id);
        }
    }
}
