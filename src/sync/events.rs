//! Payloads carried by `update` events on the push channel.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    DocumentProgress {
        document_id: String,
        message: Option<String>,
        percent: Option<u8>,
    },
    DocumentStatus {
        document_id: String,
        status: String,
        error: Option<String>,
    },
}

impl PushEvent {
    pub fn document_id(&self) -> &str {
        match self {
            Self::DocumentProgress { document_id, .. } | Self::DocumentStatus { document_id, .. } => {
                document_id
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawPushEvent {
    #[serde(rename = "DOCUMENT_PROGRESS")]
    DocumentProgress {
        document_id: String,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        percent: Option<f64>,
    },
    #[serde(rename = "DOCUMENT_STATUS")]
    DocumentStatus {
        document_id: String,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

fn clamp_percent(raw: f64) -> Option<u8> {
    if raw.is_finite() {
        Some(raw.round().clamp(0.0, 100.0) as u8)
    } else {
        None
    }
}

/// Parse the JSON data of an `update` event.
///
/// Returns `Ok(None)` for well-formed events of a type this client does not
/// handle, and `Err` for data that is not a valid event at all.
pub fn parse_update(data: &str) -> Result<Option<PushEvent>, serde_json::Error> {
    let raw: RawPushEvent = serde_json::from_str(data)?;
    Ok(match raw {
        RawPushEvent::DocumentProgress {
            document_id,
            message,
            percent,
        } => Some(PushEvent::DocumentProgress {
            document_id,
            message,
            percent: percent.and_then(clamp_percent),
        }),
        RawPushEvent::DocumentStatus {
            document_id,
            status,
            error,
        } => Some(PushEvent::DocumentStatus {
            document_id,
            status: status.unwrap_or_default(),
            error,
        }),
        RawPushEvent::Unknown => None,
    })
}
