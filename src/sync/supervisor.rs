//! Push-channel connection supervisor.
//!
//! Owns at most one live channel. Every activation gets a fresh generation
//! number; the channel task tags the events it forwards with it, and status
//! updates from a task whose generation is no longer current are discarded.
//! Superseded tasks are aborted, which drops their stream and closes the
//! underlying HTTP connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::auth::TokenProvider;
use crate::error::TransportError;
use crate::sync::backoff::BackoffPolicy;
use crate::sync::events::{PushEvent, parse_update};
use crate::transport::{PushConnector, SseFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Connecting,
    /// Closed for good: no token, rejected credentials, or an explicit close.
    Disconnected,
    /// The reconnect attempt budget ran out.
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connected => "CONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Disconnected => "DISCONNECTED",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// A push event together with the channel generation that received it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub generation: u64,
    pub event: PushEvent,
}

struct ActiveChannel {
    scope: String,
    generation: u64,
    task: JoinHandle<()>,
}

pub struct ConnectionSupervisor {
    connector: Arc<dyn PushConnector>,
    tokens: Arc<TokenProvider>,
    backoff: BackoffPolicy,
    status: Arc<watch::Sender<ConnectionStatus>>,
    current: Arc<AtomicU64>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    active: Option<ActiveChannel>,
}

impl ConnectionSupervisor {
    pub fn new(
        connector: Arc<dyn PushConnector>,
        tokens: Arc<TokenProvider>,
        backoff: BackoffPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let supervisor = Self {
            connector,
            tokens,
            backoff,
            status: Arc::new(status),
            current: Arc::new(AtomicU64::new(0)),
            events,
            active: None,
        };
        (supervisor, events_rx)
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub fn current_status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn current_generation(&self) -> Option<u64> {
        self.active.as_ref().map(|a| a.generation)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current_generation() == Some(generation)
    }

    /// Ensure a channel is running for `scope`. An already running channel
    /// for the same scope is kept; anything else is torn down first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn activate(&mut self, scope: &str) -> u64 {
        if let Some(active) = &self.active
            && active.scope == scope
            && !active.task.is_finished()
        {
            return active.generation;
        }
        self.spawn(scope.to_string())
    }

    /// Tear down the current channel and open a new one for the same scope.
    /// Returns `None` when no scope was ever activated.
    pub fn reconnect(&mut self) -> Option<u64> {
        let scope = self.active.as_ref()?.scope.clone();
        tracing::info!(scope = %scope, "Manual push channel reconnect");
        Some(self.spawn(scope))
    }

    pub fn deactivate(&mut self) {
        if let Some(active) = self.active.take() {
            self.current.fetch_add(1, Ordering::SeqCst);
            active.task.abort();
            tracing::debug!(scope = %active.scope, generation = active.generation, "Push channel closed");
        }
        self.status.send_replace(ConnectionStatus::Disconnected);
    }

    fn spawn(&mut self, scope: String) -> u64 {
        if let Some(previous) = self.active.take() {
            previous.task.abort();
        }
        let generation = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        let channel = ChannelTask {
            generation,
            scope: scope.clone(),
            connector: self.connector.clone(),
            tokens: self.tokens.clone(),
            backoff: self.backoff,
            status: self.status.clone(),
            current: self.current.clone(),
            events: self.events.clone(),
        };
        let task = tokio::spawn(channel.run());
        self.active = Some(ActiveChannel {
            scope,
            generation,
            task,
        });
        generation
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.task.abort();
        }
    }
}

enum FrameOutcome {
    /// The server is talking to us with the current token.
    Accepted,
    Ignored,
    Unauthorized,
}

enum Recovery {
    Stop,
    /// Reconnect at once; the next token lookup performs a refresh.
    RefreshToken,
    Backoff,
}

struct ChannelTask {
    generation: u64,
    scope: String,
    connector: Arc<dyn PushConnector>,
    tokens: Arc<TokenProvider>,
    backoff: BackoffPolicy,
    status: Arc<watch::Sender<ConnectionStatus>>,
    current: Arc<AtomicU64>,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl ChannelTask {
    fn publish(&self, next: ConnectionStatus) {
        let generation = self.generation;
        let current = &self.current;
        self.status.send_if_modified(|status| {
            if current.load(Ordering::SeqCst) != generation || *status == next {
                return false;
            }
            *status = next;
            true
        });
    }

    async fn run(self) {
        let mut attempt = 0u32;
        // One refresh-and-retry per rejection streak; cleared once the server
        // accepts the token.
        let mut refreshed = false;
        loop {
            if attempt > 0 {
                let Some(delay) = self.backoff.delay_for(attempt) else {
                    tracing::warn!(scope = %self.scope, attempts = attempt - 1, "Giving up on push channel");
                    self.publish(ConnectionStatus::Error);
                    return;
                };
                self.publish(ConnectionStatus::Connecting);
                tracing::debug!(scope = %self.scope, attempt, delay_ms = delay.as_millis() as u64, "Reconnecting push channel");
                tokio::time::sleep(delay).await;
            }
            self.publish(ConnectionStatus::Connecting);

            let token = match self.tokens.access_token().await {
                Ok(token) => token,
                Err(e) => {
                    tracing::warn!(scope = %self.scope, "No access token for push channel: {}", e);
                    self.publish(ConnectionStatus::Disconnected);
                    return;
                }
            };

            let mut stream = match self.connector.connect(&token).await {
                Ok(stream) => stream,
                Err(e) => {
                    match self.recover(&e, &mut refreshed).await {
                        Recovery::Stop => return,
                        Recovery::RefreshToken => {}
                        Recovery::Backoff => attempt += 1,
                    }
                    continue;
                }
            };

            tracing::info!(scope = %self.scope, generation = self.generation, "Push channel connected");
            self.publish(ConnectionStatus::Connected);
            attempt = 0;

            let error = loop {
                match stream.next().await {
                    Some(Ok(frame)) => match self.handle_frame(frame) {
                        FrameOutcome::Accepted => refreshed = false,
                        FrameOutcome::Ignored => {}
                        FrameOutcome::Unauthorized => {
                            break TransportError::Status {
                                status: reqwest::StatusCode::UNAUTHORIZED,
                            };
                        }
                    },
                    Some(Err(e)) => break e,
                    None => break TransportError::Closed,
                }
            };
            drop(stream);

            match self.recover(&error, &mut refreshed).await {
                Recovery::Stop => return,
                Recovery::RefreshToken => {}
                Recovery::Backoff => attempt += 1,
            }
        }
    }

    /// Classify a channel failure. The first rejected token is dropped and
    /// retried with a refreshed one. After that, fatal failures end the task
    /// as `Disconnected` and the rest go through backoff.
    async fn recover(&self, error: &TransportError, refreshed: &mut bool) -> Recovery {
        if error.is_unauthorized() {
            self.tokens.invalidate().await;
            if !*refreshed {
                *refreshed = true;
                tracing::info!(scope = %self.scope, "Push channel rejected the token, refreshing");
                self.publish(ConnectionStatus::Connecting);
                return Recovery::RefreshToken;
            }
        }
        if error.is_fatal() {
            tracing::warn!(scope = %self.scope, "Push channel closed: {}", error);
            self.publish(ConnectionStatus::Disconnected);
            return Recovery::Stop;
        }
        tracing::warn!(scope = %self.scope, "Push channel dropped: {}", error);
        self.publish(ConnectionStatus::Connecting);
        Recovery::Backoff
    }

    fn handle_frame(&self, frame: SseFrame) -> FrameOutcome {
        match frame.event.as_str() {
            "update" => {
                match parse_update(&frame.data) {
                    Ok(Some(event)) => {
                        let _ = self.events.send(ChannelEvent {
                            generation: self.generation,
                            event,
                        });
                    }
                    Ok(None) => tracing::debug!("Ignoring unhandled push event type"),
                    Err(e) => tracing::warn!("Dropping malformed push event: {}", e),
                }
                FrameOutcome::Accepted
            }
            "connected" => {
                tracing::debug!(scope = %self.scope, "Push channel handshake received");
                FrameOutcome::Accepted
            }
            // The server accepts the stream and then reports bad credentials in-band.
            "error" if frame.data.to_ascii_lowercase().contains("unauthorized") => {
                FrameOutcome::Unauthorized
            }
            "error" => {
                tracing::warn!(scope = %self.scope, "Push channel error event: {}", frame.data);
                FrameOutcome::Ignored
            }
            other => {
                tracing::debug!(event = other, "Ignoring push frame");
                FrameOutcome::Ignored
            }
        }
    }
}
