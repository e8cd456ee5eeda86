//! Request and response DTOs for the case API.

use serde::{Deserialize, Deserializer, Serialize};

// --- Documents ---

/// Processing status of a case document.
///
/// `Uploading` never comes from the server; it marks the local ghost row of
/// an upload that is still in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Uploading,
    #[default]
    Pending,
    Processing,
    Ready,
    Completed,
    Failed,
}

impl DocumentStatus {
    /// Case-insensitive parse of a server status string.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "UPLOADING" => Some(Self::Uploading),
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "READY" => Some(Self::Ready),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Completed | Self::Failed)
    }
}

impl<'de> Deserialize<'de> for DocumentStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        // Statuses this client does not know yet are still being worked on server-side.
        Ok(Self::parse(&raw).unwrap_or(Self::Processing))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(alias = "_id")]
    pub id: String,
    pub file_name: String,
    #[serde(default, alias = "file_type", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub status: DocumentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedDocumentResponse {
    #[serde(rename = "documentId", alias = "document_id")]
    pub document_id: String,
    #[serde(rename = "deletedFindingIds", alias = "deleted_finding_ids", default)]
    pub deleted_finding_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BulkDeleteRequest<'a> {
    pub document_ids: &'a [String],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkDeleteResponse {
    #[serde(default)]
    pub deleted_count: u64,
    #[serde(default)]
    pub deleted_finding_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RenameDocumentRequest<'a> {
    pub new_name: &'a str,
}

/// The server keeps the original extension, so the final name may differ
/// from the requested one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenamedDocument {
    pub id: String,
    pub file_name: String,
}

/// A file selected for upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: bytes::Bytes,
}

/// Progress tick emitted while an upload body is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub sent: u64,
    pub total: u64,
}

impl UploadProgress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let pct = self.sent.saturating_mul(100) / self.total;
        pct.min(100) as u8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveItem {
    #[serde(default, alias = "_id")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub case_id: Option<String>,
    #[serde(default)]
    pub original_doc_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

// --- Cases ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientData {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Case detail as returned by `GET /cases/{id}`.
///
/// Chat history is kept in `extra` untouched because older backends embed it
/// under different field names; see [`crate::sync::history`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseDetail {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub case_number: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub client: Option<ClientData>,
    #[serde(default)]
    pub document_count: u64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// --- Chat ---

/// Server-side inference tier for a chat request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReasoningMode {
    #[default]
    Fast,
    Deep,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    pub jurisdiction: String,
    pub mode: ReasoningMode,
}

// --- Users ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(alias = "_id")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub subscription_tier: Option<String>,
    #[serde(default)]
    pub subscription_status: Option<String>,
    #[serde(default)]
    pub product_plan: Option<String>,
}

impl UserProfile {
    /// DEEP reasoning is a PRO-tier capability.
    pub fn can_use_deep_reasoning(&self) -> bool {
        self.subscription_tier
            .as_deref()
            .is_some_and(|tier| tier.eq_ignore_ascii_case("PRO"))
    }
}

// --- Auth ---

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

// --- Calendar ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    #[serde(alias = "_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start_date: String,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub is_all_day: bool,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub case_id: Option<String>,
    #[serde(default)]
    pub document_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateCalendarEvent {
    pub case_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    pub is_all_day: bool,
    pub event_type: String,
    pub priority: String,
}

// --- Laws ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LawSearchHit {
    #[serde(default, alias = "content")]
    pub text: String,
    #[serde(default)]
    pub law_title: Option<String>,
    #[serde(default)]
    pub article_number: Option<String>,
    #[serde(default)]
    pub chunk_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LawArticle {
    #[serde(default)]
    pub law_title: String,
    #[serde(default)]
    pub article_number: String,
    #[serde(default, alias = "text")]
    pub content: String,
}

/// FastAPI error body.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub detail: serde_json::Value,
}
