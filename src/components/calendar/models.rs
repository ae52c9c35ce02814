use serde::{Deserialize, Serialize};

/// Role of an entry within a recurrence series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EntryKind {
    /// Template for a recurring series, never scheduled itself
    SeriesMaster,
    SingleInstance,
    /// Occurrence of a series that was edited individually
    Exception,
    /// Plain occurrence of a series; its metadata lives on the master
    Occurrence {
        #[serde(rename = "seriesMasterId")]
        series_master_id: String,
    },
    /// Deleted since the previous delta; only the id is known
    #[serde(skip)]
    Removed,
}

/// Timestamp as delivered by the calendar, in the named timezone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EntryDateTime {
    pub date_time: String,
    pub time_zone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EmailAddress {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Attendee {
    #[serde(default)]
    pub email_address: EmailAddress,
}

impl Attendee {
    /// Display name of the attendee
    pub fn name(&self) -> &str {
        &self.email_address.name
    }
}

/// Calendar entry as fetched from a room calendar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEntry {
    pub id: String,
    #[serde(flatten)]
    pub kind: EntryKind,
    pub start: EntryDateTime,
    pub end: EntryDateTime,
    #[serde(default)]
    pub change_key: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub is_cancelled: bool,
    #[serde(default)]
    pub is_all_day: bool,
    #[serde(default)]
    pub locations: Vec<Location>,
    #[serde(default)]
    pub attendees: Vec<Attendee>,
}

impl CalendarEntry {
    /// Tombstone for an entry deleted from the calendar
    pub fn removed(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: EntryKind::Removed,
            start: EntryDateTime::default(),
            end: EntryDateTime::default(),
            change_key: None,
            subject: None,
            is_cancelled: false,
            is_all_day: false,
            locations: Vec::new(),
            attendees: Vec::new(),
        }
    }

    /// Trimmed subject, empty when the entry has none
    pub fn subject(&self) -> &str {
        self.subject.as_deref().map(str::trim).unwrap_or("")
    }

    /// Display name of the first location, if any
    pub fn location_name(&self) -> Option<&str> {
        self.locations.first().map(|l| l.display_name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_occurrence() {
        let json = serde_json::json!({
            "id": "AAMkOcc1",
            "type": "occurrence",
            "seriesMasterId": "AAMkMaster",
            "start": { "dateTime": "2024-05-01T10:00:00.0000000", "timeZone": "UTC" },
            "end": { "dateTime": "2024-05-01T10:30:00.0000000", "timeZone": "UTC" }
        });

        let entry: CalendarEntry = serde_json::from_value(json).unwrap();
        assert_eq!(
            entry.kind,
            EntryKind::Occurrence {
                series_master_id: "AAMkMaster".to_string()
            }
        );
        assert!(!entry.is_cancelled);
        assert!(entry.locations.is_empty());
        assert_eq!(entry.subject(), "");
    }

    #[test]
    fn test_deserialize_single_instance() {
        let json = serde_json::json!({
            "id": "AAMkOne",
            "type": "singleInstance",
            "changeKey": "ck1",
            "subject": "  Planning  ",
            "isAllDay": false,
            "isCancelled": true,
            "start": { "dateTime": "2024-05-01T10:00:00.0000000", "timeZone": "UTC" },
            "end": { "dateTime": "2024-05-01T10:30:00.0000000", "timeZone": "UTC" },
            "locations": [{ "displayName": "Kauri & Rimu" }],
            "attendees": [{ "emailAddress": { "name": "Totara", "address": "totara@example.com" } }]
        });

        let entry: CalendarEntry = serde_json::from_value(json).unwrap();
        assert_eq!(entry.kind, EntryKind::SingleInstance);
        assert_eq!(entry.subject(), "Planning");
        assert!(entry.is_cancelled);
        assert_eq!(entry.location_name(), Some("Kauri & Rimu"));
        assert_eq!(entry.attendees[0].name(), "Totara");
    }

    #[test]
    fn test_removed_kind_is_never_deserialized() {
        let json = serde_json::json!({
            "id": "x",
            "type": "removed",
            "start": { "dateTime": "2024-05-01T10:00:00", "timeZone": "UTC" },
            "end": { "dateTime": "2024-05-01T10:30:00", "timeZone": "UTC" }
        });

        assert!(serde_json::from_value::<CalendarEntry>(json).is_err());
        assert_eq!(CalendarEntry::removed("x").kind, EntryKind::Removed);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let json = serde_json::json!({
            "id": "x",
            "type": "somethingElse",
            "start": { "dateTime": "2024-05-01T10:00:00", "timeZone": "UTC" },
            "end": { "dateTime": "2024-05-01T10:30:00", "timeZone": "UTC" }
        });

        assert!(serde_json::from_value::<CalendarEntry>(json).is_err());
    }
}
