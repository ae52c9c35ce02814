use crate::error::{config_error, env_error, AppResult};
use chrono::Duration;
use chrono_tz::Tz;
use dotenvy::dotenv;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

/// Default Redis connection string
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
/// Default location of the rooms file
pub const DEFAULT_ROOMS_CONFIG: &str = "config/rooms.toml";
/// How often calendars are fetched and reconciled, in seconds
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 1800;
/// How far ahead of now the calendar view reaches, in hours
pub const DEFAULT_LOOKAHEAD_HOURS: i64 = 24;
/// Minutes before a meeting starts that its room is powered on
pub const DEFAULT_LEAD_TIME_MINUTES: i64 = 5;
/// Meetings closer together than this share one continuous on-window
pub const DEFAULT_BACK_TO_BACK_GAP_MINUTES: i64 = 10;

/// A bookable room and the air conditioner controller serving it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomConfig {
    /// Display name as it appears in calendar locations and attendee lists
    pub name: String,
    /// Room mailbox whose calendar is watched
    pub email: String,
    /// Controller id, accepted as either a string or a number in the file
    #[serde(deserialize_with = "string_or_number")]
    pub device_id: String,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Deserialize)]
struct RoomsFile {
    #[serde(default)]
    rooms: Vec<RoomConfig>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

/// Main configuration structure for the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Microsoft Graph application client ID
    pub graph_client_id: String,
    /// Microsoft Graph application client secret
    pub graph_client_secret: String,
    /// Redis connection string, also used for publishing device state
    pub redis_url: String,
    /// IANA timezone calendar times are requested in
    pub timezone: String,
    /// Seconds between reconciliation passes
    pub refresh_interval_secs: u64,
    /// Hours ahead of now covered by each calendar fetch
    pub lookahead_hours: i64,
    pub lead_time_minutes: i64,
    pub back_to_back_gap_minutes: i64,
    /// Enabled rooms
    pub rooms: Vec<RoomConfig>,
    /// Map of component names to their enabled status
    pub components: HashMap<String, bool>,
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> AppResult<Self> {
        // Load .env file if it exists
        dotenv().ok();

        let graph_client_id =
            env::var("GRAPH_CLIENT_ID").map_err(|_| env_error("GRAPH_CLIENT_ID"))?;
        let graph_client_secret =
            env::var("GRAPH_CLIENT_SECRET").map_err(|_| env_error("GRAPH_CLIENT_SECRET"))?;

        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string());
        let timezone = env::var("TIMEZONE").unwrap_or_else(|_| String::from("UTC"));

        let refresh_interval_secs =
            parse_env_or("CALENDAR_REFRESH_INTERVAL", DEFAULT_REFRESH_INTERVAL_SECS)?;
        let lookahead_hours = parse_env_or("CALENDAR_LOOKAHEAD_HOURS", DEFAULT_LOOKAHEAD_HOURS)?;
        let lead_time_minutes = parse_env_or("LEAD_TIME_MINUTES", DEFAULT_LEAD_TIME_MINUTES)?;
        let back_to_back_gap_minutes =
            parse_env_or("BACK_TO_BACK_GAP_MINUTES", DEFAULT_BACK_TO_BACK_GAP_MINUTES)?;

        let rooms_path =
            env::var("ROOMS_CONFIG").unwrap_or_else(|_| DEFAULT_ROOMS_CONFIG.to_string());
        let rooms = load_rooms(Path::new(&rooms_path))?;

        // Initialize default components
        let mut components = HashMap::new();
        components.insert("aircon_scheduler".to_string(), true);

        // Load components configuration from file if it exists
        if let Ok(content) = fs::read_to_string("config/components.toml") {
            if let Ok(file_components) = toml::from_str::<HashMap<String, bool>>(&content) {
                // Merge with defaults
                for (key, value) in file_components {
                    components.insert(key, value);
                }
            }
        }

        let config = Config {
            graph_client_id,
            graph_client_secret,
            redis_url,
            timezone,
            refresh_interval_secs,
            lookahead_hours,
            lead_time_minutes,
            back_to_back_gap_minutes,
            rooms,
            components,
        };

        // Fail early on a bad timezone rather than on the first pass
        config.tz()?;

        Ok(config)
    }

    /// Check if a component is enabled
    pub fn is_component_enabled(&self, name: &str) -> bool {
        *self.components.get(name).unwrap_or(&false)
    }

    /// Parsed timezone
    pub fn tz(&self) -> AppResult<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| config_error(&format!("Unknown timezone: {}", self.timezone)))
    }

    pub fn lead_time(&self) -> Duration {
        Duration::minutes(self.lead_time_minutes)
    }

    pub fn back_to_back_gap(&self) -> Duration {
        Duration::minutes(self.back_to_back_gap_minutes)
    }
}

/// Read a rooms file, dropping disabled rooms
pub fn load_rooms(path: &Path) -> AppResult<Vec<RoomConfig>> {
    let content = fs::read_to_string(path).map_err(|e| {
        config_error(&format!(
            "Rooms config not found in {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_rooms(&content)
}

/// Parse rooms from TOML, dropping disabled rooms
pub fn parse_rooms(content: &str) -> AppResult<Vec<RoomConfig>> {
    let file: RoomsFile = toml::from_str(content)?;
    Ok(file.rooms.into_iter().filter(|room| !room.disabled).collect())
}

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> AppResult<T> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| env_error(&format!("Invalid {} format", var))),
        Err(_) => Ok(default),
    }
}
