use crate::components::calendar::CalendarEntry;
use crate::config::RoomConfig;
use std::collections::HashMap;

/// Separator between rooms in a combined location such as "Kauri & Rimu"
pub const LOCATION_DELIMITER: char = '&';

/// Static mapping from room display name to controller id
#[derive(Debug, Clone, Default)]
pub struct DeviceTable {
    devices: HashMap<String, String>,
}

impl DeviceTable {
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            devices: pairs
                .into_iter()
                .map(|(name, device)| (name.into(), device.into()))
                .collect(),
        }
    }

    /// Build the table from enabled rooms
    pub fn from_rooms(rooms: &[RoomConfig]) -> Self {
        Self::new(
            rooms
                .iter()
                .filter(|room| !room.disabled)
                .map(|room| (room.name.clone(), room.device_id.clone())),
        )
    }

    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.devices.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Find the controller for an entry.
    ///
    /// Locations are tried before attendees and the first match wins. Each
    /// location may name several rooms joined with `&`.
    pub fn resolve(&self, instance: &CalendarEntry) -> Option<&str> {
        let from_locations = instance.locations.iter().find_map(|location| {
            location
                .display_name
                .split(LOCATION_DELIMITER)
                .map(str::trim)
                .find_map(|part| self.lookup(part))
        });

        from_locations.or_else(|| {
            instance
                .attendees
                .iter()
                .find_map(|attendee| self.lookup(attendee.name()))
        })
    }
}
