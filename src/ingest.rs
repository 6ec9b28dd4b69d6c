//! Ingestion service.
//!
//! Validates raw client payloads and writes them to the store. Event batches
//! are all-or-nothing; individual elements without an `event_name` are
//! dropped silently rather than failing the batch.

use crate::error::ApiError;
use crate::models::{NewEvent, NewRegistration};
use crate::store::EventStore;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;

pub const MAX_BATCH_SIZE: usize = 500;
pub const MAX_EVENT_NAME_LEN: usize = 80;

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Optional string field; missing, null and empty all collapse to `None`.
fn opt_str(obj: &Value, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_event(element: &Value) -> Option<NewEvent> {
    let name = element
        .get("event_name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())?;
    let event_name: String = name.chars().take(MAX_EVENT_NAME_LEN).collect();

    let props = match element.get("props") {
        Some(p) if !p.is_null() => serde_json::to_string(p).unwrap_or_else(|_| "{}".to_string()),
        _ => "{}".to_string(),
    };

    Some(NewEvent {
        client_ts: opt_str(element, "client_ts"),
        campaign_id: opt_str(element, "campaign_id"),
        game_id: opt_str(element, "game_id"),
        session_id: opt_str(element, "session_id"),
        anonymous_user_id: opt_str(element, "anonymous_user_id"),
        event_name,
        props,
    })
}

/// Ingest a batch of events. Returns the submitted batch length (dropped
/// elements are not subtracted). Fails with a validation error when `events`
/// is not an array or exceeds [`MAX_BATCH_SIZE`]; nothing is stored then.
pub fn ingest_events(store: &EventStore, body: &Value) -> Result<usize, ApiError> {
    let events = body
        .get("events")
        .and_then(Value::as_array)
        .ok_or_else(|| ApiError::validation("Invalid events batch"))?;

    if events.len() > MAX_BATCH_SIZE {
        return Err(ApiError::validation("Invalid events batch"));
    }

    let rows: Vec<NewEvent> = events.iter().filter_map(parse_event).collect();

    let received_at = now_rfc3339();
    store.insert_events(&received_at, &rows)?;

    Ok(events.len())
}

/// Store a registration. `name`, `email` and `phone` are required non-empty
/// strings; `score` and `duration_ms` are kept only when they are JSON
/// numbers, anything else is stored as NULL.
pub fn register_entry(store: &EventStore, body: &Value) -> Result<(), ApiError> {
    let required = |key: &str| {
        body.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ApiError::validation("Missing fields"))
    };

    let reg = NewRegistration {
        session_id: opt_str(body, "session_id"),
        campaign_id: opt_str(body, "campaign_id"),
        game_id: opt_str(body, "game_id"),
        name: required("name")?,
        email: required("email")?,
        phone: required("phone")?,
        score: numeric_field(body, "score"),
        duration_ms: numeric_field(body, "duration_ms"),
    };

    let created_at = now_rfc3339();
    store.insert_registration(&created_at, &reg)?;

    Ok(())
}

fn numeric_field(body: &Value, key: &str) -> Option<i64> {
    body.get(key)
        .and_then(Value::as_f64)
        .filter(|f| f.is_finite())
        .map(|f| f as i64)
}
