//! Google Calendar v3 and Docs/Drive clients via direct HTTP.
//!
//! Busy intervals come from the events list (singleEvents, paginated);
//! cancelled and self-declined events don't block scheduling. Event
//! creation maps a 409 from the API to `ProviderError::Conflict`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::json;

use super::{send_with_retry, CalendarService, DocumentService, ProviderError, RetryPolicy};
use crate::types::{BusyInterval, CreatedDocument, CreatedEvent};

const CALENDAR_EVENTS_URL: &str =
    "https://www.googleapis.com/calendar/v3/calendars/primary/events";
const DOCS_URL: &str = "https://docs.googleapis.com/v1/documents";
const DRIVE_FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";

// ============================================================================
// API response types (deserialized from Google JSON)
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<GoogleEventRaw>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEventRaw {
    #[serde(default)]
    id: String,
    start: Option<EventDateTime>,
    end: Option<EventDateTime>,
    #[serde(default)]
    attendees: Vec<Attendee>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    html_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventDateTime {
    date_time: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Attendee {
    #[serde(default)]
    response_status: Option<String>,
    #[serde(rename = "self", default)]
    is_self: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocCreateResponse {
    document_id: String,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    web_view_link: Option<String>,
}

fn parse_event_datetime(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(&s.replace('Z', "+00:00"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(ProviderError::AuthExpired);
    }
    if status == reqwest::StatusCode::CONFLICT {
        let body = resp.text().await.unwrap_or_default();
        return Err(ProviderError::Conflict { message: body });
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ProviderError::Api {
            status: status.as_u16(),
            message: body,
        });
    }
    Ok(resp)
}

// ============================================================================
// Calendar client
// ============================================================================

pub struct GoogleCalendarClient {
    client: reqwest::Client,
    access_token: String,
    zone: Tz,
    retry: RetryPolicy,
}

impl GoogleCalendarClient {
    pub fn new(access_token: String, zone: Tz) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token,
            zone,
            retry: RetryPolicy::default(),
        }
    }
}

#[async_trait]
impl CalendarService for GoogleCalendarClient {
    async fn list_busy_intervals(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, ProviderError> {
        let time_min = window_start.to_rfc3339();
        let time_max = window_end.to_rfc3339();

        let mut busy = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(CALENDAR_EVENTS_URL)
                .bearer_auth(&self.access_token)
                .query(&[
                    ("timeMin", time_min.as_str()),
                    ("timeMax", time_max.as_str()),
                    ("singleEvents", "true"),
                    ("orderBy", "startTime"),
                    ("maxResults", "250"),
                ]);
            if let Some(ref token) = page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let resp = send_with_retry(request, &self.retry).await?;
            let resp = check_status(resp).await?;
            let body: EventListResponse = resp.json().await?;

            for item in body.items {
                if item.status.as_deref() == Some("cancelled") {
                    continue;
                }
                let self_declined = item.attendees.iter().any(|a| {
                    a.is_self == Some(true) && a.response_status.as_deref() == Some("declined")
                });
                if self_declined {
                    continue;
                }

                // All-day events carry `date` only; they don't block
                // time-of-day scheduling
                let start = item
                    .start
                    .as_ref()
                    .and_then(|s| s.date_time.as_deref())
                    .and_then(parse_event_datetime);
                let end = item
                    .end
                    .as_ref()
                    .and_then(|s| s.date_time.as_deref())
                    .and_then(parse_event_datetime);
                if let (Some(start), Some(end)) = (start, end) {
                    busy.push(BusyInterval { start, end });
                }
            }

            page_token = body.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        Ok(busy)
    }

    async fn create_event(
        &self,
        start: DateTime<Utc>,
        duration_minutes: u32,
        title: &str,
        description: &str,
    ) -> Result<CreatedEvent, ProviderError> {
        let end = start + chrono::Duration::minutes(i64::from(duration_minutes));
        let start_local = start.with_timezone(&self.zone);
        let end_local = end.with_timezone(&self.zone);

        let body = json!({
            "summary": title,
            "description": description,
            "start": {
                "dateTime": start_local.to_rfc3339(),
                "timeZone": self.zone.name(),
            },
            "end": {
                "dateTime": end_local.to_rfc3339(),
                "timeZone": self.zone.name(),
            },
        });

        let request = self
            .client
            .post(CALENDAR_EVENTS_URL)
            .bearer_auth(&self.access_token)
            .json(&body);

        let resp = send_with_retry(request, &self.retry).await?;
        let resp = check_status(resp).await?;

        let created: GoogleEventRaw = resp.json().await?;
        let created_start = created
            .start
            .as_ref()
            .and_then(|s| s.date_time.as_deref())
            .and_then(parse_event_datetime)
            .unwrap_or(start);
        let created_end = created
            .end
            .as_ref()
            .and_then(|s| s.date_time.as_deref())
            .and_then(parse_event_datetime)
            .unwrap_or(end);

        Ok(CreatedEvent {
            event_id: created.id,
            html_link: created.html_link,
            start: created_start,
            end: created_end,
        })
    }
}

// ============================================================================
// Docs client
// ============================================================================

pub struct GoogleDocsClient {
    client: reqwest::Client,
    access_token: String,
    retry: RetryPolicy,
}

impl GoogleDocsClient {
    pub fn new(access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token,
            retry: RetryPolicy::default(),
        }
    }

    /// Find an existing document with this exact title via Drive search.
    async fn find_by_title(&self, title: &str) -> Result<Option<DriveFile>, ProviderError> {
        let query = format!(
            "name = '{}' and mimeType = 'application/vnd.google-apps.document' and trashed = false",
            title.replace('\'', "\\'")
        );
        let request = self
            .client
            .get(DRIVE_FILES_URL)
            .bearer_auth(&self.access_token)
            .query(&[
                ("q", query.as_str()),
                ("fields", "files(id, name, webViewLink)"),
                ("pageSize", "1"),
            ]);

        let resp = send_with_retry(request, &self.retry).await?;
        let resp = check_status(resp).await?;
        let body: DriveListResponse = resp.json().await?;
        Ok(body.files.into_iter().next())
    }

    /// Append text at the end of a document body.
    async fn append_text(&self, document_id: &str, text: &str) -> Result<(), ProviderError> {
        let body = json!({
            "requests": [{
                "insertText": {
                    "endOfSegmentLocation": { "segmentId": "" },
                    "text": text,
                }
            }]
        });
        let request = self
            .client
            .post(format!("{DOCS_URL}/{document_id}:batchUpdate"))
            .bearer_auth(&self.access_token)
            .json(&body);

        let resp = send_with_retry(request, &self.retry).await?;
        check_status(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentService for GoogleDocsClient {
    /// Create (or extend) the day's journal document. A second entry on
    /// the same day appends the new prompt to the existing document
    /// instead of creating a duplicate.
    async fn create_journal_document(
        &self,
        title: &str,
        prompt: &str,
    ) -> Result<CreatedDocument, ProviderError> {
        if let Some(existing) = self.find_by_title(title).await? {
            self.append_text(&existing.id, &format!("\n\n{prompt}\n"))
                .await?;
            let document_url = existing.web_view_link.unwrap_or_else(|| {
                format!("https://docs.google.com/document/d/{}/edit", existing.id)
            });
            return Ok(CreatedDocument {
                document_id: Some(existing.id),
                document_url: Some(document_url),
                title: title.to_string(),
                appended: true,
            });
        }

        let request = self
            .client
            .post(DOCS_URL)
            .bearer_auth(&self.access_token)
            .json(&json!({ "title": title }));

        let resp = send_with_retry(request, &self.retry).await?;
        let resp = check_status(resp).await?;
        let created: DocCreateResponse = resp.json().await?;

        self.append_text(&created.document_id, &format!("{prompt}\n"))
            .await?;

        let document_url = format!(
            "https://docs.google.com/document/d/{}/edit",
            created.document_id
        );
        Ok(CreatedDocument {
            document_id: Some(created.document_id),
            document_url: Some(document_url),
            title: created.title.unwrap_or_else(|| title.to_string()),
            appended: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_parse_event_datetime_rfc3339() {
        let dt = parse_event_datetime("2026-02-08T09:00:00-05:00").unwrap();
        assert_eq!(dt.hour(), 14); // 9 AM EST = 14:00 UTC
    }

    #[test]
    fn test_parse_event_datetime_z_suffix() {
        let dt = parse_event_datetime("2026-02-08T14:00:00Z").unwrap();
        assert_eq!(dt.hour(), 14);
    }

    #[test]
    fn test_parse_event_datetime_empty() {
        assert!(parse_event_datetime("").is_none());
    }

    #[test]
    fn test_event_list_deserialization() {
        let json = r#"{
            "items": [
                {
                    "id": "event123",
                    "summary": "Team Standup",
                    "status": "confirmed",
                    "start": {"dateTime": "2026-02-08T09:00:00-05:00"},
                    "end": {"dateTime": "2026-02-08T09:30:00-05:00"},
                    "attendees": [
                        {"email": "me@example.com", "self": true, "responseStatus": "accepted"}
                    ]
                },
                {
                    "id": "allday1",
                    "status": "confirmed",
                    "start": {"date": "2026-02-08"},
                    "end": {"date": "2026-02-09"}
                }
            ],
            "nextPageToken": "abc"
        }"#;
        let parsed: EventListResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.items.len(), 2);
        assert_eq!(parsed.next_page_token.as_deref(), Some("abc"));
        assert_eq!(parsed.items[0].id, "event123");
        assert!(parsed.items[0].attendees[0].is_self == Some(true));
        assert!(parsed.items[1].start.as_ref().unwrap().date_time.is_none());
    }

    #[test]
    fn test_created_event_deserialization() {
        let json = r#"{
            "id": "new1",
            "htmlLink": "https://calendar.google.com/event?eid=new1",
            "start": {"dateTime": "2026-02-08T14:00:00Z"},
            "end": {"dateTime": "2026-02-08T14:30:00Z"}
        }"#;
        let parsed: GoogleEventRaw = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.id, "new1");
        assert!(parsed.html_link.as_deref().unwrap().contains("new1"));
    }

    #[test]
    fn test_drive_list_deserialization() {
        let json = r#"{
            "files": [
                {"id": "doc1", "name": "Self-Care Journal Entry - March 10, 2026",
                 "webViewLink": "https://docs.google.com/document/d/doc1/edit"}
            ]
        }"#;
        let parsed: DriveListResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].id, "doc1");
    }
}
