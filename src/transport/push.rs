//! Authenticated server-push channel (`GET /stream/updates`).

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::error::TransportError;
use crate::transport::sse::{SseDecoder, SseFrame};

/// Frames of one open push channel. The stream always ends with an `Err`
/// item: either the transport failure or [`TransportError::Closed`].
pub type PushStream = BoxStream<'static, Result<SseFrame, TransportError>>;

/// Opens push channels. Implemented over HTTP for production and by scripted
/// fakes in tests.
#[async_trait]
pub trait PushConnector: Send + Sync {
    /// Resolves once the server has accepted the connection.
    async fn connect(&self, token: &SecretString) -> Result<PushStream, TransportError>;
}

pub struct HttpPushConnector {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpPushConnector {
    /// `client` must not carry a total request timeout; the channel is long-lived.
    pub fn new(client: reqwest::Client, api_url: &Url) -> Result<Self, TransportError> {
        let endpoint = api_url
            .join("stream/updates")
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl PushConnector for HttpPushConnector {
    async fn connect(&self, token: &SecretString) -> Result<PushStream, TransportError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("token", token.expose_secret());

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status { status });
        }
        tracing::debug!(endpoint = %self.endpoint, "Push channel accepted");

        Ok(frame_stream(response.bytes_stream()))
    }
}

/// Decode a raw SSE body into frames, terminating with an error item.
pub fn frame_stream<S, E>(body: S) -> PushStream
where
    S: futures::Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: Into<TransportError> + 'static,
{
    let state = (body.boxed(), SseDecoder::new(), VecDeque::new(), false);
    futures::stream::unfold(
        state,
        |(mut body, mut decoder, mut pending, finished)| async move {
            loop {
                if let Some(frame) = pending.pop_front() {
                    return Some((Ok(frame), (body, decoder, pending, finished)));
                }
                if finished {
                    return None;
                }
                match body.next().await {
                    Some(Ok(chunk)) => pending.extend(decoder.push(&chunk)),
                    Some(Err(e)) => return Some((Err(e.into()), (body, decoder, pending, true))),
                    None => {
                        return Some((
                            Err(TransportError::Closed),
                            (body, decoder, pending, true),
                        ));
                    }
                }
            }
        },
    )
    .boxed()
}
