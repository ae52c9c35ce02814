use super::models::CalendarEntry;
use super::token::TokenManager;
use super::Calendar;
use crate::error::{calendar_error, AppResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// A delta link is replaced once its window falls this fraction of the
/// lookahead short of now + lookahead
const WINDOW_RENEW_DIVISOR: i32 = 4;

/// Room calendar read through Microsoft Graph's calendar view delta API.
///
/// The first fetch covers now until now + lookahead; later fetches replay the
/// stored delta link and return only what changed since. A delta link keeps
/// the window it was issued for, so a fresh query is started once that window
/// lags too far behind.
pub struct GraphCalendar {
    email: String,
    timezone: String,
    lookahead: Duration,
    token_manager: TokenManager,
    client: Client,
    delta: Mutex<Option<DeltaState>>,
}

/// Stored delta link and the end of the window it tracks
struct DeltaState {
    link: String,
    window_end: DateTime<Utc>,
}

/// One page of a delta response
#[derive(Debug, Default, PartialEq)]
pub struct DeltaPage {
    pub entries: Vec<CalendarEntry>,
    pub next_link: Option<String>,
    pub delta_link: Option<String>,
}

impl GraphCalendar {
    pub fn new(
        email: impl Into<String>,
        timezone: impl Into<String>,
        lookahead: Duration,
        token_manager: TokenManager,
    ) -> Self {
        Self {
            email: email.into(),
            timezone: timezone.into(),
            lookahead,
            token_manager,
            client: Client::new(),
            delta: Mutex::new(None),
        }
    }

    /// Build the URL of a fresh delta query covering now until now + lookahead
    fn initial_url(&self, now: DateTime<Utc>) -> AppResult<Url> {
        let url_str = format!("{}/users/{}/calendarView/delta", GRAPH_BASE_URL, self.email);

        let mut url = Url::parse(&url_str)
            .map_err(|e| calendar_error(&format!("Failed to parse URL: {}", e)))?;

        url.query_pairs_mut()
            .append_pair("startDateTime", &now.to_rfc3339())
            .append_pair("endDateTime", &(now + self.lookahead).to_rfc3339());

        Ok(url)
    }

    /// Request one page
    async fn get_page(&self, url: &str, access_token: &str) -> AppResult<DeltaPage> {
        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .header("Prefer", format!("outlook.timezone=\"{}\"", self.timezone))
            .send()
            .await
            .map_err(|e| calendar_error(&format!("Failed to fetch entries: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Could not read error response".to_string());
            return Err(calendar_error(&format!(
                "Failed to fetch entries: HTTP {} - {}",
                status, error_body
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| calendar_error(&format!("Failed to parse entries response: {}", e)))?;

        parse_delta_page(&body)
    }
}

#[async_trait]
impl Calendar for GraphCalendar {
    fn name(&self) -> &str {
        &self.email
    }

    async fn fetch(&self) -> AppResult<Vec<CalendarEntry>> {
        let access_token = self.token_manager.get_access_token().await?;

        let now = Utc::now();

        // Hold the lock for the whole walk so two fetches never share a link
        let mut delta = self.delta.lock().await;

        let current = match delta.as_ref() {
            Some(state) if !window_needs_renewal(state.window_end, now, self.lookahead) => {
                Some((state.link.clone(), state.window_end))
            }
            Some(_) => {
                info!("Delta window for {} is behind, starting a fresh query", self.email);
                None
            }
            None => None,
        };

        let (mut url, window_end) = match current {
            Some(current) => current,
            None => (self.initial_url(now)?.to_string(), now + self.lookahead),
        };

        let mut entries = Vec::new();
        loop {
            let page = self.get_page(&url, &access_token).await?;
            entries.extend(page.entries);

            match (page.next_link, page.delta_link) {
                (Some(next), _) => url = next,
                (None, Some(link)) => {
                    *delta = Some(DeltaState { link, window_end });
                    break;
                }
                (None, None) => {
                    return Err(calendar_error(
                        "Delta response carried neither a next link nor a delta link",
                    ))
                }
            }
        }

        sort_by_start(&mut entries);
        info!("Fetched {} entries for {}", entries.len(), self.email);

        Ok(entries)
    }
}

/// True once a window ending at `window_end` no longer reaches close enough
/// to now + lookahead
pub fn window_needs_renewal(
    window_end: DateTime<Utc>,
    now: DateTime<Utc>,
    lookahead: Duration,
) -> bool {
    now + lookahead - window_end >= lookahead / WINDOW_RENEW_DIVISOR
}

/// Split a delta response into entries and paging links.
///
/// Removal tombstones become `Removed` entries. Other items that do not
/// deserialize are skipped.
pub fn parse_delta_page(body: &Value) -> AppResult<DeltaPage> {
    let items = body
        .get("value")
        .and_then(|v| v.as_array())
        .ok_or_else(|| calendar_error("No value in delta response"))?;

    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        if item.get("@removed").is_some() {
            match item.get("id").and_then(|v| v.as_str()) {
                Some(id) => entries.push(CalendarEntry::removed(id)),
                None => debug!("Skipping tombstone without an id"),
            }
            continue;
        }

        match serde_json::from_value::<CalendarEntry>(item.clone()) {
            Ok(entry) => entries.push(entry),
            Err(e) => debug!("Skipping calendar item: {}", e),
        }
    }

    let link = |name: &str| body.get(name).and_then(|v| v.as_str()).map(str::to_string);

    Ok(DeltaPage {
        entries,
        next_link: link("@odata.nextLink"),
        delta_link: link("@odata.deltaLink"),
    })
}

/// Order entries by start time ascending, as they arrive from the wire
pub fn sort_by_start(entries: &mut [CalendarEntry]) {
    entries.sort_by(|a, b| a.start.date_time.cmp(&b.start.date_time));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::calendar::EntryKind;
    use chrono::TimeZone;
    use serde_json::json;

    fn item(id: &str, start: &str) -> Value {
        json!({
            "id": id,
            "type": "singleInstance",
            "changeKey": "ck",
            "start": { "dateTime": start, "timeZone": "UTC" },
            "end": { "dateTime": start, "timeZone": "UTC" }
        })
    }

    #[test]
    fn test_parse_delta_page_with_next_link() {
        let body = json!({
            "@odata.nextLink": "https://graph.microsoft.com/next",
            "value": [item("a", "2024-05-01T10:00:00.0000000")]
        });

        let page = parse_delta_page(&body).unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.next_link.as_deref(), Some("https://graph.microsoft.com/next"));
        assert_eq!(page.delta_link, None);
    }

    #[test]
    fn test_parse_delta_page_keeps_tombstones() {
        let body = json!({
            "@odata.deltaLink": "https://graph.microsoft.com/delta",
            "value": [
                { "id": "gone", "@removed": { "reason": "deleted" } },
                { "@removed": { "reason": "deleted" } },
                item("b", "2024-05-01T11:00:00.0000000")
            ]
        });

        let page = parse_delta_page(&body).unwrap();
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[0].id, "gone");
        assert_eq!(page.entries[0].kind, EntryKind::Removed);
        assert_eq!(page.entries[1].id, "b");
        assert!(page.delta_link.is_some());
    }

    #[test]
    fn test_window_renewal() {
        let issued = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let lookahead = Duration::hours(24);
        let window_end = issued + lookahead;

        assert!(!window_needs_renewal(window_end, issued, lookahead));
        assert!(!window_needs_renewal(
            window_end,
            issued + Duration::hours(5) + Duration::minutes(59),
            lookahead
        ));
        assert!(window_needs_renewal(window_end, issued + Duration::hours(6), lookahead));
        assert!(window_needs_renewal(window_end, issued + Duration::days(3), lookahead));
    }

    #[test]
    fn test_parse_delta_page_requires_value() {
        assert!(parse_delta_page(&json!({})).is_err());
    }

    #[test]
    fn test_sort_by_start() {
        let body = json!({
            "value": [
                item("late", "2024-05-01T15:00:00.0000000"),
                item("early", "2024-05-01T08:00:00.0000000")
            ]
        });
        let mut entries = parse_delta_page(&body).unwrap().entries;
        sort_by_start(&mut entries);
        assert_eq!(entries[0].id, "early");
        assert_eq!(entries[1].id, "late");
    }
}
