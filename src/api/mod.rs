//! One-shot request/response operations against the case API.
//!
//! The [`CaseApi`] trait is the seam the workspace controller depends on;
//! [`HttpCaseApi`] is the reqwest implementation.

mod http;
pub mod types;

pub use http::HttpCaseApi;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ApiError;
use crate::transport::ChatStream;
use types::{
    ArchiveItem, BulkDeleteResponse, CaseDetail, ChatRequest, DeletedDocumentResponse, Document,
    RenamedDocument, UploadFile, UploadProgress,
};

/// Case-scoped operations consumed by [`crate::workspace::CaseWorkspace`].
#[async_trait]
pub trait CaseApi: Send + Sync {
    async fn get_case(&self, case_id: &str) -> Result<CaseDetail, ApiError>;

    async fn list_documents(&self, case_id: &str) -> Result<Vec<Document>, ApiError>;

    /// Upload one file. Progress ticks are sent on `progress` while the body
    /// is transmitted; the receiver may be dropped at any time.
    async fn upload_document(
        &self,
        case_id: &str,
        file: UploadFile,
        progress: mpsc::UnboundedSender<UploadProgress>,
    ) -> Result<Document, ApiError>;

    async fn delete_document(
        &self,
        case_id: &str,
        document_id: &str,
    ) -> Result<DeletedDocumentResponse, ApiError>;

    async fn bulk_delete_documents(
        &self,
        case_id: &str,
        document_ids: &[String],
    ) -> Result<BulkDeleteResponse, ApiError>;

    async fn rename_document(
        &self,
        case_id: &str,
        document_id: &str,
        new_name: &str,
    ) -> Result<RenamedDocument, ApiError>;

    async fn archive_document(
        &self,
        case_id: &str,
        document_id: &str,
    ) -> Result<ArchiveItem, ApiError>;

    async fn clear_chat_history(&self, case_id: &str) -> Result<(), ApiError>;

    /// Open a streamed chat completion. Resolves once response headers arrive.
    async fn stream_chat(&self, case_id: &str, request: &ChatRequest)
    -> Result<ChatStream, ApiError>;
}
