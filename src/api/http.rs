use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::{RequestBuilder, Response, StatusCode};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use url::Url;

use crate::api::CaseApi;
use crate::api::types::{
    ArchiveItem, BulkDeleteRequest, BulkDeleteResponse, CalendarEvent, CaseDetail, ChatRequest,
    CreateCalendarEvent, DeletedDocumentResponse, Document, ErrorBody, LawArticle, LawSearchHit,
    RenameDocumentRequest, RenamedDocument, UploadFile, UploadProgress, UserProfile,
};
use crate::auth::TokenProvider;
use crate::error::ApiError;
use crate::transport::{ChatStream, text_stream};

const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// reqwest-backed implementation of the case API.
///
/// The shared `client` must not carry a total timeout because chat responses
/// stream for as long as the model generates; one-shot calls apply
/// `request_timeout` individually.
pub struct HttpCaseApi {
    client: reqwest::Client,
    api_url: Url,
    tokens: Arc<TokenProvider>,
    request_timeout: Duration,
}

impl HttpCaseApi {
    pub fn new(
        client: reqwest::Client,
        api_url: Url,
        tokens: Arc<TokenProvider>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client,
            api_url,
            tokens,
            request_timeout,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.api_url
            .join(path)
            .map_err(|e| ApiError::InvalidRequest(format!("bad endpoint '{path}': {e}")))
    }

    fn case_endpoint(&self, case_id: &str, rest: &str) -> Result<Url, ApiError> {
        if case_id.trim().is_empty() {
            return Err(ApiError::InvalidRequest("case id is empty".to_string()));
        }
        let path = format!("cases/{}{}", urlencoding::encode(case_id), rest);
        self.endpoint(&path)
    }

    fn document_endpoint(
        &self,
        case_id: &str,
        document_id: &str,
        rest: &str,
    ) -> Result<Url, ApiError> {
        let rest = format!("/documents/{}{}", urlencoding::encode(document_id), rest);
        self.case_endpoint(case_id, &rest)
    }

    /// Send with a bearer token, refreshing once if the server answers 401.
    async fn send_authorized<F>(&self, build: F) -> Result<Response, ApiError>
    where
        F: Fn() -> Result<RequestBuilder, ApiError> + Send + Sync,
    {
        for attempt in 0..2 {
            let token = self.tokens.access_token().await?;
            let response = build()?.bearer_auth(token.expose_secret()).send().await?;
            if response.status() == StatusCode::UNAUTHORIZED && attempt == 0 {
                tracing::debug!("Access token rejected, refreshing");
                self.tokens.invalidate().await;
                continue;
            }
            return check_status(response).await;
        }
        Err(ApiError::Unauthenticated)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        let timeout = self.request_timeout;
        let response = self
            .send_authorized(|| Ok(self.client.get(url.clone()).timeout(timeout)))
            .await?;
        decode_json(response).await
    }

    pub async fn current_user(&self) -> Result<UserProfile, ApiError> {
        self.get_json(self.endpoint("users/me")?).await
    }

    pub async fn list_users(&self) -> Result<Vec<UserProfile>, ApiError> {
        self.get_json(self.endpoint("admin/users")?).await
    }

    pub async fn list_calendar_events(&self) -> Result<Vec<CalendarEvent>, ApiError> {
        self.get_json(self.endpoint("calendar/events")?).await
    }

    pub async fn create_calendar_event(
        &self,
        event: &CreateCalendarEvent,
    ) -> Result<CalendarEvent, ApiError> {
        let url = self.endpoint("calendar/events")?;
        let timeout = self.request_timeout;
        let response = self
            .send_authorized(|| Ok(self.client.post(url.clone()).json(event).timeout(timeout)))
            .await?;
        decode_json(response).await
    }

    pub async fn delete_calendar_event(&self, event_id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&format!("calendar/events/{}", urlencoding::encode(event_id)))?;
        let timeout = self.request_timeout;
        self.send_authorized(|| Ok(self.client.delete(url.clone()).timeout(timeout)))
            .await?;
        Ok(())
    }

    pub async fn search_laws(&self, query: &str, limit: u32) -> Result<Vec<LawSearchHit>, ApiError> {
        let mut url = self.endpoint("laws/search")?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("limit", &limit.clamp(1, 200).to_string());
        self.get_json(url).await
    }

    pub async fn law_article(
        &self,
        law_title: &str,
        article_number: &str,
    ) -> Result<LawArticle, ApiError> {
        let mut url = self.endpoint("laws/article")?;
        url.query_pairs_mut()
            .append_pair("law_title", law_title)
            .append_pair("article_number", article_number);
        self.get_json(url).await
    }
}

#[async_trait]
impl CaseApi for HttpCaseApi {
    async fn get_case(&self, case_id: &str) -> Result<CaseDetail, ApiError> {
        self.get_json(self.case_endpoint(case_id, "")?).await
    }

    async fn list_documents(&self, case_id: &str) -> Result<Vec<Document>, ApiError> {
        self.get_json(self.case_endpoint(case_id, "/documents")?)
            .await
    }

    async fn upload_document(
        &self,
        case_id: &str,
        file: UploadFile,
        progress: mpsc::UnboundedSender<UploadProgress>,
    ) -> Result<Document, ApiError> {
        let url = self.case_endpoint(case_id, "/documents/upload")?;
        let response = self
            .send_authorized(|| {
                let total = file.bytes.len() as u64;
                let body = progress_body(file.bytes.clone(), progress.clone());
                let part = reqwest::multipart::Part::stream_with_length(body, total)
                    .file_name(file.file_name.clone())
                    .mime_str(&file.mime_type)
                    .map_err(|e| {
                        ApiError::InvalidRequest(format!(
                            "invalid mime type '{}': {e}",
                            file.mime_type
                        ))
                    })?;
                let form = reqwest::multipart::Form::new().part("file", part);
                Ok(self.client.post(url.clone()).multipart(form))
            })
            .await?;
        decode_json(response).await
    }

    async fn delete_document(
        &self,
        case_id: &str,
        document_id: &str,
    ) -> Result<DeletedDocumentResponse, ApiError> {
        let url = self.document_endpoint(case_id, document_id, "")?;
        let timeout = self.request_timeout;
        let response = self
            .send_authorized(|| Ok(self.client.delete(url.clone()).timeout(timeout)))
            .await?;
        decode_json(response).await
    }

    async fn bulk_delete_documents(
        &self,
        case_id: &str,
        document_ids: &[String],
    ) -> Result<BulkDeleteResponse, ApiError> {
        let url = self.case_endpoint(case_id, "/documents/bulk-delete")?;
        let body = BulkDeleteRequest { document_ids };
        let timeout = self.request_timeout;
        let response = self
            .send_authorized(|| Ok(self.client.post(url.clone()).json(&body).timeout(timeout)))
            .await?;
        decode_json(response).await
    }

    async fn rename_document(
        &self,
        case_id: &str,
        document_id: &str,
        new_name: &str,
    ) -> Result<RenamedDocument, ApiError> {
        let url = self.document_endpoint(case_id, document_id, "/rename")?;
        let body = RenameDocumentRequest { new_name };
        let timeout = self.request_timeout;
        let response = self
            .send_authorized(|| Ok(self.client.put(url.clone()).json(&body).timeout(timeout)))
            .await?;
        decode_json(response).await
    }

    async fn archive_document(
        &self,
        case_id: &str,
        document_id: &str,
    ) -> Result<ArchiveItem, ApiError> {
        let url = self.document_endpoint(case_id, document_id, "/archive")?;
        let timeout = self.request_timeout;
        let response = self
            .send_authorized(|| Ok(self.client.post(url.clone()).timeout(timeout)))
            .await?;
        decode_json(response).await
    }

    async fn clear_chat_history(&self, case_id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&format!(
            "chat/case/{}/history",
            urlencoding::encode(case_id)
        ))?;
        let timeout = self.request_timeout;
        self.send_authorized(|| Ok(self.client.delete(url.clone()).timeout(timeout)))
            .await?;
        Ok(())
    }

    async fn stream_chat(
        &self,
        case_id: &str,
        request: &ChatRequest,
    ) -> Result<ChatStream, ApiError> {
        let url = self.endpoint(&format!("chat/case/{}", urlencoding::encode(case_id)))?;
        let response = self
            .send_authorized(|| Ok(self.client.post(url.clone()).json(request)))
            .await?;
        Ok(text_stream(response.bytes_stream()))
    }
}

/// Chunk the upload body so progress can be reported as it is consumed.
fn progress_chunks(
    bytes: Bytes,
    progress: mpsc::UnboundedSender<UploadProgress>,
) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let total = bytes.len() as u64;
    let chunks: Vec<Bytes> = (0..bytes.len())
        .step_by(UPLOAD_CHUNK_BYTES)
        .map(|start| bytes.slice(start..(start + UPLOAD_CHUNK_BYTES).min(bytes.len())))
        .collect();

    let mut sent = 0u64;
    futures::stream::iter(chunks).map(move |chunk| {
        sent += chunk.len() as u64;
        // The receiver going away only means nobody is watching progress.
        let _ = progress.send(UploadProgress { sent, total });
        Ok(chunk)
    })
}

fn progress_body(bytes: Bytes, progress: mpsc::UnboundedSender<UploadProgress>) -> reqwest::Body {
    reqwest::Body::wrap_stream(progress_chunks(bytes, progress))
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthenticated);
    }

    let raw = response.text().await.unwrap_or_default();
    let detail = match serde_json::from_str::<ErrorBody>(&raw) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(message),
        }) => message,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) if raw.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
        Err(_) => raw,
    };
    Err(ApiError::Status { status, detail })
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
}
