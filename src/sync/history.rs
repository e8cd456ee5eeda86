//! Normalization of server chat history into [`ChatMessage`]s.
//!
//! Backends have stored history under several field names and entry shapes
//! over time. Each lookup below tries its candidates in order and takes the
//! first one present.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use crate::api::types::CaseDetail;
use crate::sync::chat::{ChatMessage, ChatRole};

const CONTAINER_KEYS: [&str; 4] = ["chat_history", "chatHistory", "messages", "history"];
const CONTENT_KEYS: [&str; 3] = ["content", "message", "text"];
const ROLE_KEYS: [&str; 3] = ["role", "sender", "author"];
const TIMESTAMP_KEYS: [&str; 3] = ["timestamp", "created_at", "createdAt"];

/// History embedded in a case detail, or empty if none is present.
pub fn case_history(case: &CaseDetail, fallback_time: DateTime<Utc>) -> Vec<ChatMessage> {
    CONTAINER_KEYS
        .iter()
        .find_map(|key| case.extra.get(*key).and_then(Value::as_array))
        .map(|entries| normalize_history(entries, fallback_time))
        .unwrap_or_default()
}

pub fn normalize_history(entries: &[Value], fallback_time: DateTime<Utc>) -> Vec<ChatMessage> {
    entries
        .iter()
        .filter_map(|entry| normalize_entry(entry, fallback_time))
        .collect()
}

/// One entry, or `None` when it carries no text.
pub fn normalize_entry(entry: &Value, fallback_time: DateTime<Utc>) -> Option<ChatMessage> {
    let content = first_str(entry, &CONTENT_KEYS)?;
    if content.trim().is_empty() {
        return None;
    }
    let role = first_str(entry, &ROLE_KEYS)
        .map(parse_role)
        .unwrap_or(ChatRole::Ai);
    let timestamp = first_str(entry, &TIMESTAMP_KEYS)
        .and_then(parse_timestamp)
        .unwrap_or(fallback_time);

    Some(ChatMessage {
        role,
        content: content.to_string(),
        timestamp,
    })
}

fn first_str<'a>(entry: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| entry.get(*key).and_then(Value::as_str))
}

fn parse_role(raw: &str) -> ChatRole {
    match raw.trim().to_ascii_lowercase().as_str() {
        "user" | "human" | "client" => ChatRole::User,
        _ => ChatRole::Ai,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    // Python's isoformat() omits the offset for naive datetimes.
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
