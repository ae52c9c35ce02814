use super::timers::{PowerState, ScheduledEvent, TimerStore};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Run of events on one device that share a single on-window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    pub device_id: String,
    /// Event ids ordered by scheduled start
    pub members: Vec<String>,
    pub start: DateTime<Utc>,
    /// Latest end of any member
    pub end: DateTime<Utc>,
}

impl Chain {
    fn starting_with(event: &ScheduledEvent) -> Self {
        Self {
            device_id: event.device_id.clone(),
            members: vec![event.id().to_string()],
            start: event.start,
            end: event.end,
        }
    }

    pub fn is_merged(&self) -> bool {
        self.members.len() > 1
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub chains: usize,
    pub merged_chains: usize,
    /// Timers armed or disarmed
    pub timer_changes: usize,
    pub pruned: usize,
}

/// Keeps a room powered across meetings separated by less than `gap`.
///
/// Each chain gets one power-on at its first member's start, held by that
/// member, and one power-off at the chain's end, held by the last member.
/// Only timers that differ from that layout are touched, so running the
/// merge again over an unchanged store changes nothing.
#[derive(Debug, Clone)]
pub struct BackToBackMerger {
    gap: Duration,
}

impl BackToBackMerger {
    pub fn new(gap: Duration) -> Self {
        Self { gap }
    }

    /// Group events into chains per device.
    ///
    /// An event joins the current chain when its start is less than `gap`
    /// after the chain's end so far; overlapping events always join.
    pub fn chains<'a>(&self, events: impl IntoIterator<Item = &'a ScheduledEvent>) -> Vec<Chain> {
        let mut by_device: BTreeMap<&str, Vec<&ScheduledEvent>> = BTreeMap::new();
        for event in events {
            by_device.entry(event.device_id.as_str()).or_default().push(event);
        }

        let mut chains = Vec::new();
        for (_, mut events) in by_device {
            events.sort_by(|a, b| (a.start, a.end, a.id()).cmp(&(b.start, b.end, b.id())));

            let mut current: Option<Chain> = None;
            for event in events {
                match current.as_mut() {
                    Some(chain) if event.start - chain.end < self.gap => {
                        chain.members.push(event.id().to_string());
                        chain.end = chain.end.max(event.end);
                    }
                    _ => {
                        chains.extend(current.take());
                        current = Some(Chain::starting_with(event));
                    }
                }
            }
            chains.extend(current);
        }

        chains.sort_by(|a, b| (a.start, &a.device_id).cmp(&(b.start, &b.device_id)));
        chains
    }

    /// Bring every active event's timers in line with its chain
    pub fn merge(&self, store: &mut TimerStore, now: DateTime<Utc>) -> MergeReport {
        let mut report = MergeReport {
            pruned: store.prune_finished(now),
            ..Default::default()
        };

        let chains = self.chains(store.events());
        report.chains = chains.len();

        for chain in &chains {
            let changes = apply_chain(store, chain, now);

            if chain.is_merged() {
                report.merged_chains += 1;
                if changes > 0 {
                    info!(
                        "Found back-to-back events on device {}: {:?}",
                        chain.device_id, chain.members
                    );
                }
            }
            report.timer_changes += changes;
        }

        debug!(
            "Merged {} chains ({} back-to-back), {} timer changes, {} pruned",
            report.chains, report.merged_chains, report.timer_changes, report.pruned
        );

        report
    }
}

/// Returns the number of timer changes made
fn apply_chain(store: &mut TimerStore, chain: &Chain, now: DateTime<Utc>) -> usize {
    let mut changes = 0;
    let last = chain.members.len() - 1;

    for (index, id) in chain.members.iter().enumerate() {
        let Some(event) = store.get(id) else {
            continue;
        };
        let power_on = event.power_on();
        let power_off = event.power_off();

        if index == 0 {
            let in_place = power_on.is_some_and(|timer| timer.at == chain.start);
            if !in_place {
                if chain.start > now {
                    store.arm_power_on(id, chain.start);
                    changes += 1;
                } else if power_on.is_some() {
                    store.disarm_power_on(id);
                    changes += 1;
                }
            }
        } else if power_on.is_some() {
            store.disarm_power_on(id);
            changes += 1;
        }

        if index == last {
            let in_place = power_off.is_some_and(|timer| timer.at == chain.end);
            if !in_place && chain.end > now {
                store.arm_power_off(id, chain.end);
                changes += 1;
            }
        } else if power_off.is_some() {
            store.disarm_power_off(id);
            changes += 1;
        }
    }

    // A running window whose room was switched off (a member was cancelled
    // mid-meeting) and has no power-on pending
    let on_pending = store
        .get(&chain.members[0])
        .is_some_and(|event| event.power_on().is_some());
    let running = chain.start <= now && now < chain.end;
    if running && !on_pending && store.device_power(&chain.device_id) != Some(PowerState::On) {
        info!(
            "Resuming power on device {} for running events {:?}",
            chain.device_id, chain.members
        );
        store.switch_power(&chain.device_id, PowerState::On);
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::scheduler::testing::{at, recording_store, EntryBuilder, TimerOp};

    fn event(id: &str, device: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> ScheduledEvent {
        let entry = EntryBuilder::new(id).build();
        ScheduledEvent::new(entry.clone(), entry, device, start, end)
    }

    fn merger() -> BackToBackMerger {
        BackToBackMerger::new(Duration::minutes(10))
    }

    #[test]
    fn test_chain_uses_running_end() {
        // b starts 20 minutes after a ends, but within 10 minutes of the long event's end
        let events = vec![
            event("long", "1", at(9, 0), at(10, 0)),
            event("a", "1", at(9, 10), at(9, 20)),
            event("b", "1", at(9, 40), at(10, 30)),
            event("c", "1", at(10, 45), at(11, 0)),
        ];

        let chains = merger().chains(&events);
        assert_eq!(chains.len(), 2);
        assert_eq!(chains[0].members, vec!["long", "a", "b"]);
        assert_eq!(chains[0].end, at(10, 30));
        assert_eq!(chains[1].members, vec!["c"]);
    }

    #[test]
    fn test_gap_at_threshold_breaks_chain() {
        let events = vec![
            event("a", "1", at(9, 0), at(9, 30)),
            event("b", "1", at(9, 40), at(10, 0)),
        ];
        assert_eq!(merger().chains(&events).len(), 2);
    }

    #[test]
    fn test_devices_never_merge() {
        let events = vec![
            event("a", "1", at(9, 0), at(9, 30)),
            event("b", "2", at(9, 30), at(10, 0)),
        ];
        let chains = merger().chains(&events);
        assert_eq!(chains.len(), 2);
        assert!(chains.iter().all(|chain| !chain.is_merged()));
    }

    #[test]
    fn test_merge_leaves_one_window() {
        let (mut store, driver, _switch) = recording_store();
        store.create(event("a", "1", at(8, 55), at(9, 30)));
        store.create(event("b", "1", at(9, 30), at(10, 0)));
        store.create(event("c", "1", at(9, 57), at(10, 30)));

        let report = merger().merge(&mut store, at(8, 0));
        assert_eq!(report.merged_chains, 1);

        let live = driver.live();
        assert_eq!(live.len(), 2);
        assert_eq!((live[0].0.state, live[0].1), (PowerState::On, at(8, 55)));
        assert_eq!((live[1].0.state, live[1].1), (PowerState::Off, at(10, 30)));
        assert_eq!(live[0].0.event_id, "a");
        assert_eq!(live[1].0.event_id, "c");
    }

    #[test]
    fn test_merge_is_idempotent() {
        let (mut store, driver, _switch) = recording_store();
        store.create(event("a", "1", at(8, 55), at(9, 30)));
        store.create(event("b", "1", at(9, 30), at(10, 0)));
        store.create(event("solo", "2", at(12, 0), at(13, 0)));

        merger().merge(&mut store, at(8, 0));
        driver.clear();

        let report = merger().merge(&mut store, at(8, 0));
        assert_eq!(report.timer_changes, 0);
        assert!(driver.ops().is_empty());
    }

    #[test]
    fn test_singleton_keeps_its_timers() {
        let (mut store, driver, _switch) = recording_store();
        store.create(event("solo", "1", at(12, 0), at(13, 0)));
        driver.clear();

        merger().merge(&mut store, at(8, 0));
        assert!(driver.ops().is_empty());
    }

    #[test]
    fn test_chain_off_removes_every_member() {
        let (mut store, driver, switch) = recording_store();
        store.create(event("a", "1", at(8, 55), at(9, 30)));
        store.create(event("b", "1", at(9, 30), at(10, 0)));
        merger().merge(&mut store, at(8, 0));

        for (fire, when) in driver.live() {
            store.fire(fire, when);
        }

        assert!(store.is_empty());
        assert_eq!(
            switch.calls(),
            vec![
                ("1".to_string(), PowerState::On),
                ("1".to_string(), PowerState::Off)
            ]
        );
    }

    #[test]
    fn test_split_chain_rearms_members() {
        let (mut store, driver, _switch) = recording_store();
        store.create(event("a", "1", at(8, 55), at(9, 30)));
        store.create(event("b", "1", at(9, 30), at(10, 0)));
        merger().merge(&mut store, at(8, 0));

        // Moving b away splits the chain; a gets its own power-off back
        store.cancel("b", at(8, 0));
        store.create(event("b", "1", at(11, 0), at(12, 0)));
        merger().merge(&mut store, at(8, 0));

        let live: Vec<_> = driver
            .live()
            .into_iter()
            .map(|(fire, when)| (fire.event_id, fire.state, when))
            .collect();
        assert_eq!(
            live,
            vec![
                ("a".to_string(), PowerState::On, at(8, 55)),
                ("a".to_string(), PowerState::Off, at(9, 30)),
                ("b".to_string(), PowerState::On, at(11, 0)),
                ("b".to_string(), PowerState::Off, at(12, 0)),
            ]
        );
    }

    #[test]
    fn test_running_chain_resumes_power_after_member_cancelled() {
        let (mut store, driver, switch) = recording_store();
        store.create(event("a", "1", at(8, 55), at(9, 30)));
        store.create(event("b", "1", at(9, 0), at(10, 0)));
        merger().merge(&mut store, at(8, 0));

        let (on, when) = driver.live()[0].clone();
        store.fire(on, when);

        // a is cancelled mid-meeting while b is still running
        store.cancel("a", at(9, 10));
        merger().merge(&mut store, at(9, 10));

        assert_eq!(
            switch.calls(),
            vec![
                ("1".to_string(), PowerState::On),
                ("1".to_string(), PowerState::Off),
                ("1".to_string(), PowerState::On)
            ]
        );
        assert_eq!(driver.count(|op| matches!(op, TimerOp::Arm(..))), 4);
        assert_eq!(store.get("b").unwrap().power_off().unwrap().at, at(10, 0));
    }
}
