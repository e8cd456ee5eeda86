//! Document reconciliation store.
//!
//! Owns the ordered document list of one case and merges three inputs into
//! it: the initial fetch, optimistic local mutations, and push events. Every
//! merge is keyed by document id and touches only the fields its source owns,
//! so inputs for the same id may arrive in either order.

use crate::api::types::{Document, DocumentStatus};
use crate::sync::events::PushEvent;

/// Id of the local placeholder row shown while an upload is in flight.
pub const GHOST_UPLOAD_ID: &str = "ghost-upload";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentStore {
    documents: Vec<Document>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn has_ghost(&self) -> bool {
        self.contains(GHOST_UPLOAD_ID)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.documents.iter().position(|d| d.id == id)
    }

    fn server_document_mut(&mut self, id: &str) -> Option<&mut Document> {
        if id == GHOST_UPLOAD_ID {
            return None;
        }
        self.documents.iter_mut().find(|d| d.id == id)
    }

    /// Replace the list with a fresh server fetch. Duplicate ids keep their
    /// first occurrence; an in-flight ghost row stays at the head.
    pub fn apply_initial(&mut self, fetched: Vec<Document>) {
        let ghost = self.position(GHOST_UPLOAD_ID).map(|i| self.documents.remove(i));
        let mut documents = Vec::with_capacity(fetched.len() + 1);
        documents.extend(ghost);
        for doc in fetched {
            if doc.id == GHOST_UPLOAD_ID || documents.iter().any(|d: &Document| d.id == doc.id) {
                continue;
            }
            documents.push(doc);
        }
        self.documents = documents;
    }

    /// Insert a document at the head, or update it in place when the id is
    /// already present.
    ///
    /// An in-place update never moves a document out of a terminal status it
    /// already reached through a push event: a late upload response carrying
    /// `PENDING` keeps the newer status, progress and error.
    pub fn apply_optimistic(&mut self, doc: Document) {
        match self.position(&doc.id) {
            Some(index) => {
                let existing = &self.documents[index];
                let mut merged = doc;
                if existing.status.is_terminal() && !merged.status.is_terminal() {
                    merged.status = existing.status;
                    merged.progress_percent = existing.progress_percent;
                    merged.progress_message = existing.progress_message.clone();
                    merged.error_message = existing.error_message.clone();
                }
                self.documents[index] = merged;
            }
            None => self.documents.insert(0, doc),
        }
    }

    /// Merge a push event. Returns whether a document changed.
    ///
    /// Events for ids that are not (yet, or any longer) present are dropped.
    pub fn apply_server_event(&mut self, event: &PushEvent) -> bool {
        match event {
            PushEvent::DocumentProgress {
                document_id,
                message,
                percent,
            } => {
                let Some(doc) = self.server_document_mut(document_id) else {
                    return false;
                };
                if let Some(message) = message {
                    doc.progress_message = Some(message.clone());
                }
                if let Some(percent) = percent {
                    doc.progress_percent = Some(*percent);
                }
                true
            }
            PushEvent::DocumentStatus {
                document_id,
                status,
                error,
            } => {
                let Some(doc) = self.server_document_mut(document_id) else {
                    return false;
                };
                match status.trim().to_ascii_uppercase().as_str() {
                    "READY" | "COMPLETED" => doc.status = DocumentStatus::Completed,
                    "FAILED" => {
                        doc.status = DocumentStatus::Failed;
                        doc.error_message = error.clone();
                    }
                    _ => {}
                }
                doc.progress_percent = Some(100);
                true
            }
        }
    }

    /// Insert the ghost row for an upload that has just started.
    pub fn begin_upload(&mut self, file_name: &str, mime_type: &str) {
        self.remove_ghost();
        self.documents.insert(
            0,
            Document {
                id: GHOST_UPLOAD_ID.to_string(),
                file_name: file_name.to_string(),
                mime_type: Some(mime_type.to_string()),
                status: DocumentStatus::Uploading,
                progress_percent: Some(0),
                progress_message: None,
                error_message: None,
                created_at: None,
                summary: None,
                category: None,
            },
        );
    }

    /// Advance the ghost's percent. Progress never moves backwards, so a
    /// body re-sent after a token refresh does not rewind the row.
    pub fn set_upload_progress(&mut self, percent: u8) -> bool {
        let Some(ghost) = self.documents.iter_mut().find(|d| d.id == GHOST_UPLOAD_ID) else {
            return false;
        };
        let percent = percent.min(100);
        if ghost.progress_percent.is_some_and(|current| current >= percent) {
            return false;
        }
        ghost.progress_percent = Some(percent);
        true
    }

    pub fn remove_ghost(&mut self) -> bool {
        self.remove(GHOST_UPLOAD_ID).is_some()
    }

    /// Insert fetched documents whose ids are not present yet, keeping every
    /// existing row (and its live progress) untouched. Returns how many were
    /// added.
    pub fn merge_unseen(&mut self, fetched: Vec<Document>) -> usize {
        let mut unseen: Vec<Document> = Vec::new();
        for doc in fetched {
            if doc.id == GHOST_UPLOAD_ID
                || self.contains(&doc.id)
                || unseen.iter().any(|d| d.id == doc.id)
            {
                continue;
            }
            unseen.push(doc);
        }
        let added = unseen.len();
        self.documents.splice(0..0, unseen);
        added
    }

    pub fn remove(&mut self, id: &str) -> Option<Document> {
        self.position(id).map(|i| self.documents.remove(i))
    }

    pub fn remove_many(&mut self, ids: &[String]) -> usize {
        let before = self.documents.len();
        self.documents.retain(|d| !ids.iter().any(|id| *id == d.id));
        before - self.documents.len()
    }

    pub fn rename(&mut self, id: &str, file_name: &str) -> bool {
        match self.server_document_mut(id) {
            Some(doc) => {
                doc.file_name = file_name.to_string();
                true
            }
            None => false,
        }
    }
}
