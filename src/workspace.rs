//! Case workspace controller.
//!
//! A [`CaseWorkspace`] owns the state of the one case that is currently
//! open: its document list, its chat, and the push channel that keeps the
//! documents live. Opening another case replaces all three. Every mutation
//! bumps a revision counter so a front end can re-render from snapshots.
//!
//! Failures of user actions are reported twice: as the returned error and
//! as a [`Notice`] on the broadcast channel, which is what an interactive
//! front end shows.

use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::api::CaseApi;
use crate::api::types::{ArchiveItem, CaseDetail, ChatRequest, Document, ReasoningMode, UploadFile};
use crate::auth::TokenProvider;
use crate::error::WorkspaceError;
use crate::sync::history::case_history;
use crate::sync::{
    BackoffPolicy, ChannelEvent, ChatHistoryCache, ChatMessage, ChatReducer, ConnectionStatus,
    ConnectionSupervisor, DocumentStore, GHOST_UPLOAD_ID, SendRejection,
};
use crate::transport::{ChatStream, PushConnector};

const NOTICE_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct WorkspaceOptions {
    /// Jurisdiction tag sent with every chat request.
    pub jurisdiction: String,
    /// Whether the account may request [`ReasoningMode::Deep`].
    pub deep_reasoning: bool,
}

impl Default for WorkspaceOptions {
    fn default() -> Self {
        Self {
            jurisdiction: "ks".to_string(),
            deep_reasoning: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A user-visible, dismissible notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// How a [`CaseWorkspace::send_message`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Completed,
    /// The stream failed; the assistant message holds the failure text.
    Failed,
    /// The case was closed or replaced while the response was streaming.
    Abandoned,
    Rejected(SendRejection),
}

struct CaseSession {
    case_id: String,
    epoch: u64,
    generation: u64,
    documents: DocumentStore,
    chat: ChatReducer,
    detail: Option<CaseDetail>,
    document_context: Option<String>,
    /// Set until `open` has applied the server history.
    loading: bool,
}

impl CaseSession {
    fn new(case_id: &str, epoch: u64, generation: u64) -> Self {
        Self {
            case_id: case_id.to_string(),
            epoch,
            generation,
            documents: DocumentStore::new(),
            chat: ChatReducer::new(),
            detail: None,
            document_context: None,
            loading: true,
        }
    }
}

struct Shared {
    session: RwLock<Option<CaseSession>>,
    revision: watch::Sender<u64>,
    notices: broadcast::Sender<Notice>,
}

impl Shared {
    fn bump(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }

    fn notify(&self, level: NoticeLevel, message: String) {
        match level {
            NoticeLevel::Info => tracing::info!("{}", message),
            NoticeLevel::Error => tracing::error!("{}", message),
        }
        // No subscribers is fine; notices are fire-and-forget.
        let _ = self.notices.send(Notice { level, message });
    }

    async fn apply_channel_event(&self, event: ChannelEvent) -> bool {
        let mut guard = self.session.write().await;
        let Some(session) = guard.as_mut() else {
            return false;
        };
        if session.generation != event.generation {
            tracing::debug!(
                generation = event.generation,
                current = session.generation,
                "Dropping event from superseded channel"
            );
            return false;
        }
        let changed = session.documents.apply_server_event(&event.event);
        drop(guard);
        if changed {
            self.bump();
        }
        changed
    }
}

async fn pump_events(shared: Arc<Shared>, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
    while let Some(event) = events.recv().await {
        shared.apply_channel_event(event).await;
    }
}

pub struct CaseWorkspace {
    api: Arc<dyn CaseApi>,
    cache: Arc<dyn ChatHistoryCache>,
    options: WorkspaceOptions,
    shared: Arc<Shared>,
    supervisor: Mutex<ConnectionSupervisor>,
    status: watch::Receiver<ConnectionStatus>,
    epochs: AtomicU64,
    pump: JoinHandle<()>,
}

impl CaseWorkspace {
    /// Must be called from within a tokio runtime.
    pub fn new(
        api: Arc<dyn CaseApi>,
        connector: Arc<dyn PushConnector>,
        tokens: Arc<TokenProvider>,
        cache: Arc<dyn ChatHistoryCache>,
        backoff: BackoffPolicy,
        options: WorkspaceOptions,
    ) -> Self {
        let (supervisor, events) = ConnectionSupervisor::new(connector, tokens, backoff);
        let status = supervisor.status();
        let (revision, _) = watch::channel(0);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let shared = Arc::new(Shared {
            session: RwLock::new(None),
            revision,
            notices,
        });
        let pump = tokio::spawn(pump_events(shared.clone(), events));

        Self {
            api,
            cache,
            options,
            shared,
            supervisor: Mutex::new(supervisor),
            status,
            epochs: AtomicU64::new(0),
            pump,
        }
    }

    // --- Observation ---

    pub fn connection_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Revision counter bumped after every state change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.shared.notices.subscribe()
    }

    pub fn options(&self) -> &WorkspaceOptions {
        &self.options
    }

    async fn read<R>(&self, f: impl FnOnce(&CaseSession) -> R) -> Option<R> {
        self.shared.session.read().await.as_ref().map(f)
    }

    pub async fn active_case(&self) -> Option<String> {
        self.read(|s| s.case_id.clone()).await
    }

    pub async fn documents(&self) -> Vec<Document> {
        self.read(|s| s.documents.documents().to_vec())
            .await
            .unwrap_or_default()
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.read(|s| s.chat.messages().to_vec())
            .await
            .unwrap_or_default()
    }

    pub async fn is_sending(&self) -> bool {
        self.read(|s| s.chat.is_sending()).await.unwrap_or(false)
    }

    pub async fn is_thinking(&self) -> bool {
        self.read(|s| s.chat.is_thinking()).await.unwrap_or(false)
    }

    pub async fn case_detail(&self) -> Option<CaseDetail> {
        self.read(|s| s.detail.clone()).await.flatten()
    }

    pub async fn document_context(&self) -> Option<String> {
        self.read(|s| s.document_context.clone()).await.flatten()
    }

    /// Generation of the push channel whose events the open case accepts.
    pub async fn channel_generation(&self) -> Option<u64> {
        self.read(|s| s.generation).await
    }

    /// Apply a push event to the open case. Events tagged with any other
    /// channel generation are dropped.
    pub async fn apply_channel_event(&self, event: ChannelEvent) -> bool {
        self.shared.apply_channel_event(event).await
    }

    // --- Lifecycle ---

    /// Open a case: start its push channel, seed chat from the local cache,
    /// then load the case detail and documents in parallel.
    ///
    /// A blank case id is ignored.
    pub async fn open(&self, case_id: &str) -> Result<(), WorkspaceError> {
        let case_id = case_id.trim();
        if case_id.is_empty() {
            tracing::warn!("Ignoring open without a case id");
            return Ok(());
        }

        let epoch = self.epochs.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut session = self.shared.session.write().await;
            let generation = self.supervisor.lock().await.activate(case_id);
            *session = Some(CaseSession::new(case_id, epoch, generation));
        }
        self.shared.bump();
        tracing::info!(case_id, "Opening case workspace");

        match self.cache.load(case_id).await {
            Ok(cached) if !cached.is_empty() => {
                tracing::debug!(case_id, messages = cached.len(), "Restored cached chat");
                self.mutate(epoch, |s| {
                    if s.chat.messages().is_empty() {
                        s.chat.seed(cached);
                    }
                })
                .await;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(case_id, "Ignoring unreadable chat cache: {}", e),
        }

        let (detail, documents) = tokio::join!(
            self.api.get_case(case_id),
            self.api.list_documents(case_id)
        );

        let mut first_error = None;
        match documents {
            Ok(list) => {
                tracing::debug!(case_id, documents = list.len(), "Loaded documents");
                self.mutate(epoch, |s| s.documents.apply_initial(list)).await;
            }
            Err(e) => {
                self.shared
                    .notify(NoticeLevel::Error, format!("Failed to load documents: {e}"));
                first_error = Some(e);
            }
        }
        match detail {
            Ok(detail) => {
                let history = case_history(&detail, Utc::now());
                let seeded = self
                    .mutate(epoch, |s| {
                        s.detail = Some(detail);
                        !history.is_empty() && s.chat.seed(history)
                    })
                    .await;
                if seeded == Some(true) {
                    self.persist_chat(case_id, epoch).await;
                }
            }
            Err(e) => {
                self.shared
                    .notify(NoticeLevel::Error, format!("Failed to load case: {e}"));
                first_error.get_or_insert(e);
            }
        }

        self.mutate(epoch, |s| s.loading = false).await;

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Force a fresh push channel for the open case.
    pub async fn reconnect(&self) -> Result<(), WorkspaceError> {
        let mut guard = self.shared.session.write().await;
        let session = guard.as_mut().ok_or(WorkspaceError::NoActiveCase)?;
        let mut supervisor = self.supervisor.lock().await;
        session.generation = match supervisor.reconnect() {
            Some(generation) => generation,
            None => supervisor.activate(&session.case_id),
        };
        Ok(())
    }

    /// Close the open case and its push channel.
    pub async fn close(&self) {
        let mut guard = self.shared.session.write().await;
        self.supervisor.lock().await.deactivate();
        if let Some(session) = guard.take() {
            tracing::info!(case_id = %session.case_id, "Closed case workspace");
        }
        drop(guard);
        self.shared.bump();
    }

    // --- Documents ---

    /// Upload a file, showing a ghost row with live progress until the
    /// server answers.
    pub async fn upload(&self, file: UploadFile) -> Result<Document, WorkspaceError> {
        let (case_id, epoch) = self.active().await?;
        let file_name = file.file_name.clone();

        let started = self
            .mutate(epoch, |s| {
                if s.documents.has_ghost() {
                    return false;
                }
                s.documents.begin_upload(&file.file_name, &file.mime_type);
                true
            })
            .await;
        if started != Some(true) {
            self.shared.notify(
                NoticeLevel::Error,
                format!("Cannot upload {file_name}: another upload is in progress"),
            );
            return Err(WorkspaceError::UploadInProgress);
        }

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let upload = self.api.upload_document(&case_id, file, progress_tx);
        tokio::pin!(upload);
        let result = loop {
            tokio::select! {
                result = &mut upload => break result,
                Some(tick) = progress_rx.recv() => {
                    self.mutate(epoch, |s| s.documents.set_upload_progress(tick.percent()))
                        .await;
                }
            }
        };

        match result {
            Ok(document) => {
                tracing::info!(case_id = %case_id, document_id = %document.id, "Uploaded document");
                let inserted = document.clone();
                self.mutate(epoch, move |s| {
                    s.documents.remove_ghost();
                    s.documents.apply_optimistic(inserted);
                })
                .await;
                Ok(document)
            }
            Err(e) => {
                self.mutate(epoch, |s| s.documents.remove_ghost()).await;
                self.shared
                    .notify(NoticeLevel::Error, format!("Upload of {file_name} failed: {e}"));
                Err(e.into())
            }
        }
    }

    /// Delete one document. Returns the ids of findings the server removed
    /// along with it.
    pub async fn delete_document(&self, document_id: &str) -> Result<Vec<String>, WorkspaceError> {
        if document_id == GHOST_UPLOAD_ID {
            return Err(WorkspaceError::DocumentNotFound(document_id.to_string()));
        }
        let (case_id, epoch) = self.active().await?;
        match self.api.delete_document(&case_id, document_id).await {
            Ok(response) => {
                self.mutate(epoch, |s| s.documents.remove(document_id)).await;
                tracing::info!(case_id = %case_id, document_id, "Deleted document");
                Ok(response.deleted_finding_ids)
            }
            Err(e) => {
                self.shared
                    .notify(NoticeLevel::Error, format!("Failed to delete document: {e}"));
                Err(e.into())
            }
        }
    }

    /// Delete several documents in one server call. Nothing is removed
    /// locally unless the call succeeds.
    pub async fn bulk_delete(&self, document_ids: &[String]) -> Result<Vec<String>, WorkspaceError> {
        let ids: Vec<String> = document_ids
            .iter()
            .filter(|id| id.as_str() != GHOST_UPLOAD_ID)
            .cloned()
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let (case_id, epoch) = self.active().await?;
        match self.api.bulk_delete_documents(&case_id, &ids).await {
            Ok(response) => {
                let removed = self.mutate(epoch, |s| s.documents.remove_many(&ids)).await;
                tracing::info!(
                    case_id = %case_id,
                    requested = ids.len(),
                    deleted = response.deleted_count,
                    removed = removed.unwrap_or(0),
                    "Bulk deleted documents"
                );
                Ok(response.deleted_finding_ids)
            }
            Err(e) => {
                self.shared
                    .notify(NoticeLevel::Error, format!("Failed to delete documents: {e}"));
                Err(e.into())
            }
        }
    }

    /// Rename a document. The server keeps the original extension, so the
    /// stored name is the one it returns.
    pub async fn rename_document(
        &self,
        document_id: &str,
        new_name: &str,
    ) -> Result<String, WorkspaceError> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(WorkspaceError::InvalidInput("new name is empty".to_string()));
        }
        let (case_id, epoch) = self.active().await?;
        match self.api.rename_document(&case_id, document_id, new_name).await {
            Ok(renamed) => {
                let file_name = renamed.file_name;
                self.mutate(epoch, |s| s.documents.rename(document_id, &file_name))
                    .await;
                Ok(file_name)
            }
            Err(e) => {
                self.shared
                    .notify(NoticeLevel::Error, format!("Failed to rename document: {e}"));
                Err(e.into())
            }
        }
    }

    pub async fn archive_document(&self, document_id: &str) -> Result<ArchiveItem, WorkspaceError> {
        let (case_id, _) = self.active().await?;
        match self.api.archive_document(&case_id, document_id).await {
            Ok(item) => {
                self.shared.notify(
                    NoticeLevel::Info,
                    format!("Archived {}", item.title),
                );
                Ok(item)
            }
            Err(e) => {
                self.shared
                    .notify(NoticeLevel::Error, format!("Failed to archive document: {e}"));
                Err(e.into())
            }
        }
    }

    /// Re-fetch the document list and insert only the documents not shown
    /// yet. Existing rows keep their live progress.
    pub async fn refresh_documents(&self) -> Result<usize, WorkspaceError> {
        let (case_id, epoch) = self.active().await?;
        match self.api.list_documents(&case_id).await {
            Ok(list) => Ok(self
                .mutate(epoch, |s| s.documents.merge_unseen(list))
                .await
                .unwrap_or(0)),
            Err(e) => {
                self.shared
                    .notify(NoticeLevel::Error, format!("Failed to refresh documents: {e}"));
                Err(e.into())
            }
        }
    }

    /// Scope subsequent chat messages to one document, or to the whole case.
    pub async fn set_document_context(
        &self,
        document_id: Option<&str>,
    ) -> Result<(), WorkspaceError> {
        let (_, epoch) = self.active().await?;
        let applied = self
            .mutate(epoch, |s| match document_id {
                Some(id) if id == GHOST_UPLOAD_ID || !s.documents.contains(id) => false,
                _ => {
                    s.document_context = document_id.map(str::to_string);
                    true
                }
            })
            .await;
        match (applied, document_id) {
            (Some(true), _) => Ok(()),
            (_, Some(id)) => Err(WorkspaceError::DocumentNotFound(id.to_string())),
            (_, None) => Err(WorkspaceError::NoActiveCase),
        }
    }

    // --- Chat ---

    /// Send a chat message and stream the answer into the message list.
    ///
    /// Only one send runs at a time. A blank message, a second concurrent
    /// send, a send while the case is still loading, or a deep-reasoning
    /// request without the capability is rejected before anything changes. Stream failures are not returned as errors:
    /// the assistant message is finalized with a failure text instead.
    pub async fn send_message(&self, content: &str, mode: ReasoningMode) -> SendOutcome {
        if mode == ReasoningMode::Deep && !self.options.deep_reasoning {
            self.shared.notify(
                NoticeLevel::Error,
                "Deep reasoning requires a PRO subscription".to_string(),
            );
            return SendOutcome::Rejected(SendRejection::ReasoningUnavailable);
        }

        let begun = {
            let mut guard = self.shared.session.write().await;
            match guard.as_mut() {
                None => Err(SendRejection::NoActiveCase),
                Some(s) if s.loading => Err(SendRejection::Loading),
                Some(s) => s.chat.begin(content, Utc::now()).map(|message| {
                    (message, s.case_id.clone(), s.epoch, s.document_context.clone())
                }),
            }
        };
        let (message, case_id, epoch, document_id) = match begun {
            Ok(begun) => begun,
            Err(rejection) => {
                tracing::debug!(?rejection, "Chat send rejected");
                return SendOutcome::Rejected(rejection);
            }
        };
        self.shared.bump();
        self.persist_chat(&case_id, epoch).await;

        let request = ChatRequest {
            message,
            document_id,
            jurisdiction: self.options.jurisdiction.clone(),
            mode,
        };
        match self.api.stream_chat(&case_id, &request).await {
            Ok(stream) => self.consume_chat(stream, &case_id, epoch).await,
            Err(e) => self.fail_send(&case_id, epoch, e).await,
        }
    }

    async fn consume_chat(&self, mut stream: ChatStream, case_id: &str, epoch: u64) -> SendOutcome {
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => {
                    if self
                        .mutate(epoch, |s| s.chat.apply_chunk(&chunk))
                        .await
                        .is_none()
                    {
                        tracing::debug!(case_id, "Case closed while streaming, dropping response");
                        return SendOutcome::Abandoned;
                    }
                    self.persist_chat(case_id, epoch).await;
                }
                Err(e) => return self.fail_send(case_id, epoch, e).await,
            }
        }
        if self.mutate(epoch, |s| s.chat.finish()).await.is_none() {
            return SendOutcome::Abandoned;
        }
        self.persist_chat(case_id, epoch).await;
        SendOutcome::Completed
    }

    async fn fail_send(&self, case_id: &str, epoch: u64, error: impl Display) -> SendOutcome {
        tracing::error!(case_id, "Chat stream failed: {}", error);
        if self.mutate(epoch, |s| s.chat.fail()).await.is_none() {
            return SendOutcome::Abandoned;
        }
        self.persist_chat(case_id, epoch).await;
        SendOutcome::Failed
    }

    /// Clear the chat on the server, then locally. Local history is kept if
    /// the server call fails.
    pub async fn clear_chat(&self) -> Result<(), WorkspaceError> {
        let (case_id, epoch) = self.active().await?;
        if let Err(e) = self.api.clear_chat_history(&case_id).await {
            self.shared
                .notify(NoticeLevel::Error, format!("Failed to clear chat history: {e}"));
            return Err(e.into());
        }
        self.mutate(epoch, |s| s.chat.clear()).await;
        if let Err(e) = self.cache.remove(&case_id).await {
            tracing::warn!(case_id = %case_id, "Failed to drop cached chat: {}", e);
        }
        Ok(())
    }

    // --- Internals ---

    async fn active(&self) -> Result<(String, u64), WorkspaceError> {
        self.read(|s| (s.case_id.clone(), s.epoch))
            .await
            .ok_or(WorkspaceError::NoActiveCase)
    }

    /// Mutate the session opened as `epoch`. Returns `None` when that case
    /// has been closed or replaced in the meantime.
    async fn mutate<R>(&self, epoch: u64, f: impl FnOnce(&mut CaseSession) -> R) -> Option<R> {
        let mut guard = self.shared.session.write().await;
        let session = guard.as_mut().filter(|s| s.epoch == epoch)?;
        let result = f(session);
        drop(guard);
        self.shared.bump();
        Some(result)
    }

    async fn persist_chat(&self, case_id: &str, epoch: u64) {
        let Some(messages) = self
            .read(|s| (s.epoch == epoch).then(|| s.chat.messages().to_vec()))
            .await
            .flatten()
        else {
            return;
        };
        if let Err(e) = self.cache.store(case_id, &messages).await {
            tracing::warn!(case_id, "Failed to cache chat history: {}", e);
        }
    }
}

impl Drop for CaseWorkspace {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
