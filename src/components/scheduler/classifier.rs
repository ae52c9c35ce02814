use crate::components::calendar::{CalendarEntry, EntryKind};

/// What an entry means for scheduling, before any timing is considered
#[derive(Debug, PartialEq, Eq)]
pub enum Resolution<'a> {
    /// Series template; its occurrences are scheduled instead
    Master,
    /// Entry carrying the display metadata for this booking
    Instance(&'a CalendarEntry),
    /// Occurrence whose series master is not in the same batch
    MissingMaster { series_master_id: &'a str },
    /// Entry deleted from the calendar
    Removed,
}

/// Resolve the entry that describes `entry`, looking up series masters in `batch`
pub fn resolve_instance<'a>(entry: &'a CalendarEntry, batch: &'a [CalendarEntry]) -> Resolution<'a> {
    match &entry.kind {
        EntryKind::SeriesMaster => Resolution::Master,
        EntryKind::Removed => Resolution::Removed,
        EntryKind::SingleInstance | EntryKind::Exception => Resolution::Instance(entry),
        EntryKind::Occurrence { series_master_id } => batch
            .iter()
            .find(|other| &other.id == series_master_id && other.kind != EntryKind::Removed)
            .map(Resolution::Instance)
            .unwrap_or(Resolution::MissingMaster {
                series_master_id: series_master_id.as_str(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::scheduler::testing::EntryBuilder;

    #[test]
    fn test_master_is_not_scheduled() {
        let master = EntryBuilder::new("m").kind(EntryKind::SeriesMaster).build();
        let batch = vec![master.clone()];
        assert_eq!(resolve_instance(&batch[0], &batch), Resolution::Master);
    }

    #[test]
    fn test_instances_describe_themselves() {
        let single = EntryBuilder::new("s").build();
        let exception = EntryBuilder::new("e").kind(EntryKind::Exception).build();
        let batch = vec![single, exception];

        assert_eq!(resolve_instance(&batch[0], &batch), Resolution::Instance(&batch[0]));
        assert_eq!(resolve_instance(&batch[1], &batch), Resolution::Instance(&batch[1]));
    }

    #[test]
    fn test_occurrence_resolves_to_master() {
        let master = EntryBuilder::new("m")
            .kind(EntryKind::SeriesMaster)
            .subject("Standup")
            .build();
        let occurrence = EntryBuilder::new("o").occurrence_of("m").build();
        let batch = vec![occurrence, master];

        match resolve_instance(&batch[0], &batch) {
            Resolution::Instance(instance) => assert_eq!(instance.id, "m"),
            other => panic!("unexpected resolution: {:?}", other),
        }
    }

    #[test]
    fn test_removed_entry() {
        let batch = vec![CalendarEntry::removed("gone")];
        assert_eq!(resolve_instance(&batch[0], &batch), Resolution::Removed);
    }

    #[test]
    fn test_occurrence_without_master() {
        let occurrence = EntryBuilder::new("o").occurrence_of("absent").build();
        let batch = vec![occurrence];

        assert_eq!(
            resolve_instance(&batch[0], &batch),
            Resolution::MissingMaster {
                series_master_id: "absent"
            }
        );
    }
}
