mod graph;
pub mod models;
pub mod time;
pub mod token;

pub use graph::{parse_delta_page, sort_by_start, DeltaPage, GraphCalendar};
pub use models::{Attendee, CalendarEntry, EmailAddress, EntryDateTime, EntryKind, Location};
pub use token::TokenManager;

use crate::error::AppResult;
use async_trait::async_trait;

/// Source of calendar entries for one room
#[async_trait]
pub trait Calendar: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Fetch entries ordered by start time ascending
    async fn fetch(&self) -> AppResult<Vec<CalendarEntry>>;
}
