//! Workspace-level behavior driven by scripted fake transports.
//!
//! The fakes stand in for the HTTP API and the push channel so each test
//! controls exactly when documents load, progress ticks arrive, chat chunks
//! stream, and server calls fail.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_stream::wrappers::UnboundedReceiverStream;

use juristi_sync::api::CaseApi;
use juristi_sync::api::types::{
    ArchiveItem, BulkDeleteResponse, CaseDetail, ChatRequest, DeletedDocumentResponse, Document,
    DocumentStatus, ReasoningMode, RenamedDocument, UploadFile, UploadProgress,
};
use juristi_sync::auth::{TokenProvider, TokenRefresher};
use juristi_sync::error::{ApiError, AuthError, TransportError, WorkspaceError};
use juristi_sync::sync::events::PushEvent;
use juristi_sync::sync::{
    BackoffPolicy, CHAT_FAILURE_MESSAGE, ChannelEvent, ChatHistoryCache, ChatMessage, ChatRole,
    ConnectionStatus, GHOST_UPLOAD_ID, MemoryChatCache, SendRejection,
};
use juristi_sync::transport::{ChatStream, PushConnector, PushStream, SseFrame};
use juristi_sync::workspace::{CaseWorkspace, NoticeLevel, SendOutcome, WorkspaceOptions};

const TIMEOUT: Duration = Duration::from_secs(3);

type ChunkSender = mpsc::UnboundedSender<Result<String, TransportError>>;
type FrameSender = mpsc::UnboundedSender<Result<SseFrame, TransportError>>;

fn document(id: &str, status: DocumentStatus) -> Document {
    Document {
        id: id.to_string(),
        file_name: format!("{id}.pdf"),
        mime_type: Some("application/pdf".to_string()),
        status,
        progress_percent: None,
        progress_message: None,
        error_message: None,
        created_at: None,
        summary: None,
        category: None,
    }
}

fn server_error() -> ApiError {
    ApiError::Status {
        status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
        detail: "boom".to_string(),
    }
}

#[derive(Default)]
struct FakeApi {
    cases: Mutex<HashMap<String, Value>>,
    documents: Mutex<HashMap<String, Vec<Document>>>,
    fail_bulk_delete: AtomicBool,
    fail_upload: AtomicBool,
    fail_clear: AtomicBool,
    upload_gate: Mutex<Option<oneshot::Receiver<()>>>,
    case_gate: Mutex<Option<oneshot::Receiver<()>>>,
    chat_scripts: Mutex<VecDeque<mpsc::UnboundedReceiver<Result<String, TransportError>>>>,
    chat_requests: Mutex<Vec<ChatRequest>>,
    clear_calls: AtomicUsize,
}

impl FakeApi {
    fn with_case(self, case_id: &str, history: Value, documents: Vec<Document>) -> Self {
        self.cases.lock().expect("cases").insert(
            case_id.to_string(),
            json!({ "id": case_id, "title": format!("Çështja {case_id}"), "chat_history": history }),
        );
        self.documents
            .lock()
            .expect("documents")
            .insert(case_id.to_string(), documents);
        self
    }

    /// Queue a chat response; the returned sender feeds its chunks.
    fn script_chat(&self) -> ChunkSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.chat_scripts.lock().expect("scripts").push_back(rx);
        tx
    }

    /// Hold `get_case` until the returned sender fires.
    fn gate_case(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.case_gate.lock().expect("gate") = Some(rx);
        tx
    }

    fn gate_upload(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.upload_gate.lock().expect("gate") = Some(rx);
        tx
    }
}

#[async_trait]
impl CaseApi for FakeApi {
    async fn get_case(&self, case_id: &str) -> Result<CaseDetail, ApiError> {
        let gate = self.case_gate.lock().expect("gate").take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let body = self
            .cases
            .lock()
            .expect("cases")
            .get(case_id)
            .cloned()
            .ok_or(ApiError::Status {
                status: reqwest::StatusCode::NOT_FOUND,
                detail: "Case not found".to_string(),
            })?;
        serde_json::from_value(body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn list_documents(&self, case_id: &str) -> Result<Vec<Document>, ApiError> {
        Ok(self
            .documents
            .lock()
            .expect("documents")
            .get(case_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn upload_document(
        &self,
        _case_id: &str,
        file: UploadFile,
        progress: mpsc::UnboundedSender<UploadProgress>,
    ) -> Result<Document, ApiError> {
        let total = file.bytes.len() as u64;
        for sent in [0, total / 2, total] {
            let _ = progress.send(UploadProgress { sent, total });
        }
        let gate = self.upload_gate.lock().expect("gate").take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(server_error());
        }
        let mut uploaded = document("d-new", DocumentStatus::Pending);
        uploaded.file_name = file.file_name;
        Ok(uploaded)
    }

    async fn delete_document(
        &self,
        _case_id: &str,
        document_id: &str,
    ) -> Result<DeletedDocumentResponse, ApiError> {
        Ok(DeletedDocumentResponse {
            document_id: document_id.to_string(),
            deleted_finding_ids: vec![format!("finding-of-{document_id}")],
        })
    }

    async fn bulk_delete_documents(
        &self,
        _case_id: &str,
        document_ids: &[String],
    ) -> Result<BulkDeleteResponse, ApiError> {
        if self.fail_bulk_delete.load(Ordering::SeqCst) {
            return Err(server_error());
        }
        Ok(BulkDeleteResponse {
            deleted_count: document_ids.len() as u64,
            deleted_finding_ids: vec!["f1".to_string()],
        })
    }

    async fn rename_document(
        &self,
        _case_id: &str,
        document_id: &str,
        new_name: &str,
    ) -> Result<RenamedDocument, ApiError> {
        Ok(RenamedDocument {
            id: document_id.to_string(),
            file_name: format!("{new_name}.pdf"),
        })
    }

    async fn archive_document(
        &self,
        case_id: &str,
        document_id: &str,
    ) -> Result<ArchiveItem, ApiError> {
        serde_json::from_value(json!({
            "id": "arch-1",
            "title": format!("{document_id}.pdf"),
            "item_type": "FILE",
            "case_id": case_id,
            "original_doc_id": document_id
        }))
        .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn clear_chat_history(&self, _case_id: &str) -> Result<(), ApiError> {
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_clear.load(Ordering::SeqCst) {
            return Err(server_error());
        }
        Ok(())
    }

    async fn stream_chat(
        &self,
        _case_id: &str,
        request: &ChatRequest,
    ) -> Result<ChatStream, ApiError> {
        self.chat_requests
            .lock()
            .expect("requests")
            .push(request.clone());
        let script = self
            .chat_scripts
            .lock()
            .expect("scripts")
            .pop_front()
            .ok_or_else(|| ApiError::Network("no scripted response".to_string()))?;
        Ok(UnboundedReceiverStream::new(script).boxed())
    }
}

#[derive(Default)]
struct FakeConnector {
    streams: Mutex<Vec<FrameSender>>,
    connects: AtomicUsize,
}

impl FakeConnector {
    /// The newest stream is open and every older one has been dropped.
    fn only_latest_live(&self) -> bool {
        let streams = self.streams.lock().expect("streams");
        match streams.split_last() {
            Some((latest, older)) => !latest.is_closed() && older.iter().all(|tx| tx.is_closed()),
            None => false,
        }
    }

    fn live(&self) -> Vec<FrameSender> {
        self.streams
            .lock()
            .expect("streams")
            .iter()
            .filter(|tx| !tx.is_closed())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PushConnector for FakeConnector {
    async fn connect(&self, _token: &SecretString) -> Result<PushStream, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().expect("streams").push(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

struct NoRefresh;

#[async_trait]
impl TokenRefresher for NoRefresh {
    async fn refresh(&self) -> Result<SecretString, AuthError> {
        Err(AuthError::MissingRefreshToken)
    }
}

struct Harness {
    api: Arc<FakeApi>,
    connector: Arc<FakeConnector>,
    cache: Arc<MemoryChatCache>,
    workspace: CaseWorkspace,
}

fn harness_with(api: FakeApi, cache: MemoryChatCache, options: WorkspaceOptions) -> Harness {
    let api = Arc::new(api);
    let connector = Arc::new(FakeConnector::default());
    let cache = Arc::new(cache);
    let tokens = Arc::new(TokenProvider::new(
        Arc::new(NoRefresh),
        Some(SecretString::from("token")),
    ));
    let backoff = BackoffPolicy {
        initial: Duration::from_millis(5),
        max: Duration::from_millis(20),
        max_attempts: 0,
    };
    let workspace = CaseWorkspace::new(
        api.clone(),
        connector.clone(),
        tokens,
        cache.clone(),
        backoff,
        options,
    );
    Harness {
        api,
        connector,
        cache,
        workspace,
    }
}

fn harness(api: FakeApi) -> Harness {
    harness_with(api, MemoryChatCache::new(), WorkspaceOptions::default())
}

fn two_documents() -> FakeApi {
    FakeApi::default().with_case(
        "c1",
        json!([]),
        vec![
            document("d1", DocumentStatus::Pending),
            document("d2", DocumentStatus::Ready),
        ],
    )
}

fn update_frame(event: Value) -> SseFrame {
    SseFrame {
        event: "update".to_string(),
        data: event.to_string(),
        id: None,
        retry: None,
    }
}

async fn wait_connected(status: &mut watch::Receiver<ConnectionStatus>) {
    timeout(TIMEOUT, status.wait_for(|s| *s == ConnectionStatus::Connected))
        .await
        .expect("connect timeout")
        .expect("status channel");
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    timeout(TIMEOUT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition timeout");
}

fn ids(documents: &[Document]) -> Vec<String> {
    documents.iter().map(|d| d.id.clone()).collect()
}

// --- Bootstrap ---

#[tokio::test]
async fn server_history_wins_over_cached_history() {
    let api = FakeApi::default().with_case(
        "X",
        json!([
            { "role": "user", "content": "Pyetja nga serveri" },
            { "sender": "assistant", "text": "Përgjigja nga serveri" }
        ]),
        Vec::new(),
    );
    let cache = MemoryChatCache::new();
    cache
        .store("X", &[ChatMessage::user("nga cache", Utc::now())])
        .await
        .expect("seed cache");
    let h = harness_with(api, cache, WorkspaceOptions::default());

    h.workspace.open("X").await.expect("open");

    let contents: Vec<String> = h
        .workspace
        .messages()
        .await
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(
        contents,
        vec!["Pyetja nga serveri".to_string(), "Përgjigja nga serveri".to_string()]
    );
    let cached = h.cache.load("X").await.expect("load");
    assert_eq!(cached.len(), 2);
    assert_eq!(cached[1].role, ChatRole::Ai);
}

#[tokio::test]
async fn cached_history_is_kept_when_server_has_none() {
    let api = FakeApi::default().with_case("X", json!([]), Vec::new());
    let cache = MemoryChatCache::new();
    cache
        .store("X", &[ChatMessage::user("nga cache", Utc::now())])
        .await
        .expect("seed cache");
    let h = harness_with(api, cache, WorkspaceOptions::default());

    h.workspace.open("X").await.expect("open");
    let messages = h.workspace.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "nga cache");
}

#[tokio::test]
async fn open_loads_detail_and_documents() {
    let h = harness(two_documents());
    let mut status = h.workspace.connection_status();

    h.workspace.open("c1").await.expect("open");

    assert_eq!(h.workspace.active_case().await.as_deref(), Some("c1"));
    assert_eq!(ids(&h.workspace.documents().await), vec!["d1", "d2"]);
    let detail = h.workspace.case_detail().await.expect("detail");
    assert_eq!(detail.title, "Çështja c1");
    wait_connected(&mut status).await;
}

#[tokio::test]
async fn unknown_case_is_reported() {
    let h = harness(FakeApi::default());
    let mut notices = h.workspace.notices();

    let result = h.workspace.open("missing").await;
    assert!(matches!(result, Err(WorkspaceError::Api(ApiError::Status { .. }))));
    let notice = notices.recv().await.expect("notice");
    assert_eq!(notice.level, NoticeLevel::Error);
}

#[tokio::test]
async fn blank_case_id_is_a_no_op() {
    let h = harness(two_documents());
    h.workspace.open("   ").await.expect("no-op");
    assert_eq!(h.workspace.active_case().await, None);
    assert_eq!(h.connector.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn operations_without_a_case_are_rejected() {
    let h = harness(two_documents());
    assert!(matches!(
        h.workspace.delete_document("d1").await,
        Err(WorkspaceError::NoActiveCase)
    ));
    assert!(matches!(
        h.workspace.reconnect().await,
        Err(WorkspaceError::NoActiveCase)
    ));
    assert_eq!(
        h.workspace.send_message("hello", ReasoningMode::Fast).await,
        SendOutcome::Rejected(SendRejection::NoActiveCase)
    );
}

// --- Push channel ---

#[tokio::test]
async fn push_events_update_documents() {
    let h = harness(two_documents());
    let mut status = h.workspace.connection_status();
    h.workspace.open("c1").await.expect("open");
    wait_connected(&mut status).await;

    let live = h.connector.live();
    assert_eq!(live.len(), 1);
    live[0]
        .send(Ok(update_frame(json!({
            "type": "DOCUMENT_PROGRESS",
            "document_id": "d1",
            "message": "OCR në progres...",
            "percent": 25
        }))))
        .expect("send");
    live[0]
        .send(Ok(SseFrame {
            event: "update".to_string(),
            data: "{not json".to_string(),
            id: None,
            retry: None,
        }))
        .expect("send");
    live[0]
        .send(Ok(update_frame(json!({
            "type": "DOCUMENT_STATUS",
            "document_id": "d1",
            "status": "FAILED",
            "error": "Skedari është i dëmtuar"
        }))))
        .expect("send");

    let ws = &h.workspace;
    wait_until(move || async move {
        ws.documents()
            .await
            .iter()
            .any(|d| d.id == "d1" && d.status == DocumentStatus::Failed)
    })
    .await;

    let d1 = ws.documents().await.into_iter().find(|d| d.id == "d1").expect("d1");
    assert_eq!(d1.progress_message.as_deref(), Some("OCR në progres..."));
    assert_eq!(d1.progress_percent, Some(100));
    assert_eq!(d1.error_message.as_deref(), Some("Skedari është i dëmtuar"));
    assert_eq!(*status.borrow(), ConnectionStatus::Connected);
}

#[tokio::test]
async fn events_from_previous_case_channel_are_ignored() {
    let api = two_documents().with_case(
        "c2",
        json!([]),
        vec![document("d1", DocumentStatus::Pending)],
    );
    let h = harness(api);

    h.workspace.open("c1").await.expect("open c1");
    let c1_generation = h.workspace.channel_generation().await.expect("generation");
    h.workspace.open("c2").await.expect("open c2");
    let before = h.workspace.documents().await;

    let applied = h
        .workspace
        .apply_channel_event(ChannelEvent {
            generation: c1_generation,
            event: PushEvent::DocumentStatus {
                document_id: "d1".to_string(),
                status: "FAILED".to_string(),
                error: Some("stale".to_string()),
            },
        })
        .await;

    assert!(!applied);
    assert_eq!(h.workspace.documents().await, before);
    let connector = &h.connector;
    wait_until(move || async move { connector.live().len() == 1 }).await;
}

#[tokio::test]
async fn repeated_reconnects_apply_each_event_once() {
    let h = harness(two_documents());
    let mut status = h.workspace.connection_status();
    h.workspace.open("c1").await.expect("open");
    wait_connected(&mut status).await;

    for _ in 0..3 {
        h.workspace.reconnect().await.expect("reconnect");
    }
    // Channels aborted before their first poll never connect, so only the
    // lower bound on connects is fixed.
    let connector = &h.connector;
    wait_until(move || async move {
        connector.connects.load(Ordering::SeqCst) >= 2 && connector.only_latest_live()
    })
    .await;
    wait_connected(&mut status).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.connector.only_latest_live());

    let mut changes = h.workspace.changes();
    for tx in h.connector.live() {
        tx.send(Ok(update_frame(json!({
            "type": "DOCUMENT_PROGRESS",
            "document_id": "d1",
            "percent": 60
        }))))
        .expect("send");
    }
    timeout(TIMEOUT, changes.changed())
        .await
        .expect("timeout")
        .expect("changed");
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(!changes.has_changed().expect("alive"));
    let d1 = h
        .workspace
        .documents()
        .await
        .into_iter()
        .find(|d| d.id == "d1")
        .expect("d1");
    assert_eq!(d1.progress_percent, Some(60));
}

#[tokio::test]
async fn close_tears_down_the_channel() {
    let h = harness(two_documents());
    let mut status = h.workspace.connection_status();
    h.workspace.open("c1").await.expect("open");
    wait_connected(&mut status).await;

    h.workspace.close().await;
    assert_eq!(*status.borrow(), ConnectionStatus::Disconnected);
    assert_eq!(h.workspace.active_case().await, None);
    assert!(h.workspace.documents().await.is_empty());
    let connector = &h.connector;
    wait_until(move || async move { connector.live().is_empty() }).await;
}

// --- Documents ---

#[tokio::test]
async fn upload_shows_ghost_then_real_document() {
    let h = harness(two_documents());
    h.workspace.open("c1").await.expect("open");
    let release = h.api.gate_upload();

    let ws = &h.workspace;
    let upload = ws.upload(UploadFile {
        file_name: "padia.pdf".to_string(),
        mime_type: "application/pdf".to_string(),
        bytes: vec![1u8; 1000].into(),
    });
    let observe = async move {
        wait_until(move || async move {
            ws.documents()
                .await
                .first()
                .is_some_and(|d| d.id == GHOST_UPLOAD_ID && d.progress_percent == Some(100))
        })
        .await;
        let ghost = ws.documents().await.remove(0);
        assert_eq!(ghost.status, DocumentStatus::Uploading);
        release.send(()).expect("release upload");
    };
    let (result, ()) = tokio::join!(upload, observe);

    let uploaded = result.expect("upload");
    assert_eq!(uploaded.file_name, "padia.pdf");
    let documents = ws.documents().await;
    assert_eq!(ids(&documents), vec!["d-new", "d1", "d2"]);
    assert_eq!(documents[0].status, DocumentStatus::Pending);
}

#[tokio::test]
async fn failed_upload_removes_only_the_ghost() {
    let h = harness(two_documents());
    h.workspace.open("c1").await.expect("open");
    h.api.fail_upload.store(true, Ordering::SeqCst);
    let before = h.workspace.documents().await;
    let mut notices = h.workspace.notices();

    let result = h
        .workspace
        .upload(UploadFile {
            file_name: "padia.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            bytes: vec![1u8; 10].into(),
        })
        .await;

    assert!(matches!(result, Err(WorkspaceError::Api(_))));
    assert_eq!(h.workspace.documents().await, before);
    let notice = notices.recv().await.expect("notice");
    assert!(notice.message.contains("padia.pdf"));
}

#[tokio::test]
async fn second_upload_is_refused_while_first_runs() {
    let h = harness(two_documents());
    h.workspace.open("c1").await.expect("open");
    let release = h.api.gate_upload();

    let ws = &h.workspace;
    let file = || UploadFile {
        file_name: "a.pdf".to_string(),
        mime_type: "application/pdf".to_string(),
        bytes: vec![0u8; 4].into(),
    };
    let first = ws.upload(file());
    let second = async {
        wait_until(move || async move { ws.documents().await.iter().any(|d| d.id == GHOST_UPLOAD_ID) }).await;
        let refused = ws.upload(file()).await;
        release.send(()).expect("release");
        refused
    };
    let (first, second) = tokio::join!(first, second);

    assert!(first.is_ok());
    assert!(matches!(second, Err(WorkspaceError::UploadInProgress)));
}

#[tokio::test]
async fn failed_bulk_delete_leaves_documents_untouched() {
    let h = harness(two_documents());
    h.workspace.open("c1").await.expect("open");
    h.api.fail_bulk_delete.store(true, Ordering::SeqCst);
    let before = h.workspace.documents().await;

    let result = h
        .workspace
        .bulk_delete(&["d1".to_string(), "d2".to_string()])
        .await;

    assert!(result.is_err());
    assert_eq!(h.workspace.documents().await, before);
}

#[tokio::test]
async fn bulk_delete_removes_documents_and_returns_findings() {
    let h = harness(two_documents());
    h.workspace.open("c1").await.expect("open");

    let findings = h
        .workspace
        .bulk_delete(&["d1".to_string(), "d2".to_string()])
        .await
        .expect("bulk delete");

    assert_eq!(findings, vec!["f1".to_string()]);
    assert!(h.workspace.documents().await.is_empty());
    assert!(h.workspace.bulk_delete(&[]).await.expect("empty").is_empty());
}

#[tokio::test]
async fn delete_rename_archive_and_context() {
    let h = harness(two_documents());
    h.workspace.open("c1").await.expect("open");

    h.workspace
        .set_document_context(Some("d2"))
        .await
        .expect("context");
    assert_eq!(h.workspace.document_context().await.as_deref(), Some("d2"));
    assert!(matches!(
        h.workspace.set_document_context(Some("nope")).await,
        Err(WorkspaceError::DocumentNotFound(_))
    ));

    let name = h
        .workspace
        .rename_document("d2", "vendimi")
        .await
        .expect("rename");
    assert_eq!(name, "vendimi.pdf");
    assert!(matches!(
        h.workspace.rename_document("d2", "  ").await,
        Err(WorkspaceError::InvalidInput(_))
    ));

    let item = h.workspace.archive_document("d2").await.expect("archive");
    assert_eq!(item.title, "d2.pdf");

    let findings = h.workspace.delete_document("d1").await.expect("delete");
    assert_eq!(findings, vec!["finding-of-d1".to_string()]);
    let documents = h.workspace.documents().await;
    assert_eq!(ids(&documents), vec!["d2"]);
    assert_eq!(documents[0].file_name, "vendimi.pdf");

    h.workspace.set_document_context(None).await.expect("clear context");
    assert_eq!(h.workspace.document_context().await, None);
}

#[tokio::test]
async fn refresh_inserts_only_unseen_documents() {
    let h = harness(two_documents());
    let mut status = h.workspace.connection_status();
    h.workspace.open("c1").await.expect("open");
    wait_connected(&mut status).await;

    for tx in h.connector.live() {
        tx.send(Ok(update_frame(json!({
            "type": "DOCUMENT_PROGRESS",
            "document_id": "d1",
            "percent": 80
        }))))
        .expect("send");
    }
    let ws = &h.workspace;
    wait_until(move || async move {
        ws.documents()
            .await
            .iter()
            .any(|d| d.id == "d1" && d.progress_percent == Some(80))
    })
    .await;

    h.api
        .documents
        .lock()
        .expect("documents")
        .get_mut("c1")
        .expect("c1")
        .push(document("d3", DocumentStatus::Pending));
    let added = ws.refresh_documents().await.expect("refresh");

    assert_eq!(added, 1);
    let documents = ws.documents().await;
    assert_eq!(ids(&documents), vec!["d3", "d1", "d2"]);
    assert_eq!(documents[1].progress_percent, Some(80));
}

// --- Chat ---

#[tokio::test]
async fn second_send_is_rejected_while_first_streams() {
    let h = harness(two_documents());
    h.workspace.open("c1").await.expect("open");
    let chunks = h.api.script_chat();

    let ws = &h.workspace;
    let first = ws.send_message("hello", ReasoningMode::Fast);
    let second = async move {
        wait_until(move || async move { ws.is_thinking().await }).await;
        let outcome = ws.send_message("hello", ReasoningMode::Fast).await;
        chunks.send(Ok("Për".to_string())).expect("chunk");
        chunks.send(Ok("shëndetje".to_string())).expect("chunk");
        drop(chunks);
        outcome
    };
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first, SendOutcome::Completed);
    assert_eq!(second, SendOutcome::Rejected(SendRejection::InFlight));
    let messages = ws.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, ChatRole::User);
    assert_eq!(messages[1].content, "Përshëndetje");
    assert!(!ws.is_sending().await);
    assert_eq!(h.api.chat_requests.lock().expect("requests").len(), 1);
    assert_eq!(h.cache.load("c1").await.expect("cache"), messages);
}

#[tokio::test]
async fn send_during_case_load_is_rejected_and_history_applies() {
    let api = FakeApi::default().with_case(
        "c1",
        json!([
            { "role": "user", "content": "Pyetja e parë" },
            { "role": "ai", "content": "Përgjigjja e parë" }
        ]),
        vec![],
    );
    let release = api.gate_case();
    let h = harness(api);

    let ws = &h.workspace;
    let open = ws.open("c1");
    let early_send = async move {
        wait_until(move || async move { ws.active_case().await.is_some() }).await;
        let outcome = ws.send_message("shpejt", ReasoningMode::Fast).await;
        release.send(()).expect("release case");
        outcome
    };
    let (opened, early) = tokio::join!(open, early_send);

    opened.expect("open");
    assert_eq!(early, SendOutcome::Rejected(SendRejection::Loading));
    let contents: Vec<String> = ws.messages().await.into_iter().map(|m| m.content).collect();
    assert_eq!(contents, vec!["Pyetja e parë", "Përgjigjja e parë"]);
    assert!(h.api.chat_requests.lock().expect("requests").is_empty());

    drop(h.api.script_chat());
    assert_eq!(
        ws.send_message("tani", ReasoningMode::Fast).await,
        SendOutcome::Completed
    );
    assert_eq!(ws.messages().await.len(), 4);
}

#[tokio::test]
async fn stream_error_finalizes_placeholder_and_allows_retry() {
    let h = harness(two_documents());
    h.workspace.open("c1").await.expect("open");

    let chunks = h.api.script_chat();
    chunks.send(Ok("Sipas".to_string())).expect("chunk");
    chunks
        .send(Err(TransportError::Network("connection reset".to_string())))
        .expect("error");
    let outcome = h.workspace.send_message("pyetje", ReasoningMode::Fast).await;

    assert_eq!(outcome, SendOutcome::Failed);
    let messages = h.workspace.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, CHAT_FAILURE_MESSAGE);
    assert!(!h.workspace.is_sending().await);

    let retry = h.api.script_chat();
    retry.send(Ok("Tani funksionon".to_string())).expect("chunk");
    drop(retry);
    assert_eq!(
        h.workspace.send_message("pyetje", ReasoningMode::Fast).await,
        SendOutcome::Completed
    );
    assert_eq!(h.workspace.messages().await.len(), 4);
}

#[tokio::test]
async fn failed_stream_open_uses_failure_text() {
    let h = harness(two_documents());
    h.workspace.open("c1").await.expect("open");

    let outcome = h.workspace.send_message("pyetje", ReasoningMode::Fast).await;
    assert_eq!(outcome, SendOutcome::Failed);
    assert_eq!(
        h.workspace.messages().await.last().map(|m| m.content.clone()),
        Some(CHAT_FAILURE_MESSAGE.to_string())
    );
}

#[tokio::test]
async fn chat_request_carries_context_and_jurisdiction() {
    let options = WorkspaceOptions {
        jurisdiction: "al".to_string(),
        deep_reasoning: true,
    };
    let h = harness_with(two_documents(), MemoryChatCache::new(), options);
    h.workspace.open("c1").await.expect("open");
    h.workspace.set_document_context(Some("d1")).await.expect("context");
    drop(h.api.script_chat());

    assert_eq!(
        h.workspace.send_message("  Analizo  ", ReasoningMode::Deep).await,
        SendOutcome::Completed
    );
    let requests = h.api.chat_requests.lock().expect("requests").clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].message, "Analizo");
    assert_eq!(requests[0].document_id.as_deref(), Some("d1"));
    assert_eq!(requests[0].jurisdiction, "al");
    assert_eq!(requests[0].mode, ReasoningMode::Deep);
}

#[tokio::test]
async fn deep_reasoning_without_capability_is_rejected_up_front() {
    let h = harness(two_documents());
    h.workspace.open("c1").await.expect("open");
    let mut notices = h.workspace.notices();

    let outcome = h.workspace.send_message("pyetje", ReasoningMode::Deep).await;

    assert_eq!(
        outcome,
        SendOutcome::Rejected(SendRejection::ReasoningUnavailable)
    );
    assert!(h.workspace.messages().await.is_empty());
    assert!(h.api.chat_requests.lock().expect("requests").is_empty());
    assert_eq!(notices.recv().await.expect("notice").level, NoticeLevel::Error);
}

#[tokio::test]
async fn blank_message_is_ignored() {
    let h = harness(two_documents());
    h.workspace.open("c1").await.expect("open");
    assert_eq!(
        h.workspace.send_message(" \n ", ReasoningMode::Fast).await,
        SendOutcome::Rejected(SendRejection::Blank)
    );
    assert!(h.workspace.messages().await.is_empty());
}

#[tokio::test]
async fn clear_chat_requires_server_success() {
    let api = FakeApi::default().with_case(
        "c1",
        json!([{ "role": "user", "content": "Pyetje" }]),
        Vec::new(),
    );
    let h = harness(api);
    h.workspace.open("c1").await.expect("open");
    h.api.fail_clear.store(true, Ordering::SeqCst);

    assert!(h.workspace.clear_chat().await.is_err());
    assert_eq!(h.workspace.messages().await.len(), 1);
    assert_eq!(h.cache.load("c1").await.expect("cache").len(), 1);

    h.api.fail_clear.store(false, Ordering::SeqCst);
    h.workspace.clear_chat().await.expect("clear");
    assert!(h.workspace.messages().await.is_empty());
    assert!(h.cache.load("c1").await.expect("cache").is_empty());
    assert_eq!(h.api.clear_calls.load(Ordering::SeqCst), 2);
}
