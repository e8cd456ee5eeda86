//! Streamed chat reducer.
//!
//! One send at a time: [`ChatReducer::begin`] appends the user's message and
//! an empty assistant placeholder, each chunk rewrites the placeholder with
//! the full concatenated response so far, and [`ChatReducer::finish`] or
//! [`ChatReducer::fail`] ends the send.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Text written into the assistant placeholder when a stream fails.
pub const CHAT_FAILURE_MESSAGE: &str = "Ndodhi një gabim gjatë gjenerimit të përgjigjes. Ju lutem provoni përsëri.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            timestamp,
        }
    }

    pub fn ai(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role: ChatRole::Ai,
            content: content.into(),
            timestamp,
        }
    }
}

/// Why a send was refused before anything was mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRejection {
    Blank,
    InFlight,
    NoActiveCase,
    /// The case is still loading its server history.
    Loading,
    ReasoningUnavailable,
}

#[derive(Debug, Clone, Default)]
pub struct ChatReducer {
    messages: Vec<ChatMessage>,
    sending: bool,
    buffer: String,
}

impl ChatReducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_sending(&self) -> bool {
        self.sending
    }

    /// Sending, with no response text received yet.
    pub fn is_thinking(&self) -> bool {
        self.sending
            && self
                .messages
                .last()
                .is_some_and(|m| m.role == ChatRole::Ai && m.content.is_empty())
    }

    /// Start a send. Returns the trimmed text to transmit.
    pub fn begin(&mut self, content: &str, now: DateTime<Utc>) -> Result<String, SendRejection> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SendRejection::Blank);
        }
        if self.sending {
            return Err(SendRejection::InFlight);
        }
        self.sending = true;
        self.buffer.clear();
        self.messages.push(ChatMessage::user(content, now));
        self.messages.push(ChatMessage::ai(String::new(), now));
        Ok(content.to_string())
    }

    /// Append a decoded chunk. The placeholder is only rewritten while it is
    /// still the last message and still an assistant message.
    pub fn apply_chunk(&mut self, chunk: &str) -> bool {
        if !self.sending || chunk.is_empty() {
            return false;
        }
        self.buffer.push_str(chunk);
        match self.messages.last_mut() {
            Some(last) if last.role == ChatRole::Ai => {
                last.content.clone_from(&self.buffer);
                true
            }
            _ => false,
        }
    }

    pub fn finish(&mut self) {
        self.sending = false;
        self.buffer.clear();
    }

    /// End the send with the failure text in place of any partial response.
    pub fn fail(&mut self) {
        if self.sending
            && let Some(last) = self.messages.last_mut()
            && last.role == ChatRole::Ai
        {
            last.content = CHAT_FAILURE_MESSAGE.to_string();
        }
        self.finish();
    }

    /// Replace the whole history. Refused while a send is in flight.
    pub fn seed(&mut self, messages: Vec<ChatMessage>) -> bool {
        if self.sending {
            return false;
        }
        self.messages = messages;
        true
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.buffer.clear();
    }
}
