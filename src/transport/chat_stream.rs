//! Incremental text decoding for streamed chat responses.

use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};

use crate::error::TransportError;

/// Text increments of one chat response, ending with `None` on success or an
/// `Err` item on failure.
pub type ChatStream = BoxStream<'static, Result<String, TransportError>>;

/// Decodes UTF-8 across chunk boundaries, holding back an incomplete trailing
/// sequence until the next chunk arrives.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    carry: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.carry);
        input.extend_from_slice(chunk);

        let mut out = String::with_capacity(input.len());
        let mut rest = input.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.carry = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush whatever is still buffered once the body has ended.
    pub fn finish(self) -> Option<String> {
        if self.carry.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.carry).into_owned())
        }
    }
}

/// Turn a raw body stream into a [`ChatStream`] of non-empty text increments.
pub fn text_stream<S, E>(body: S) -> ChatStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<TransportError> + 'static,
{
    let state = (body.boxed(), Some(Utf8ChunkDecoder::default()));
    futures::stream::unfold(state, |(mut body, mut decoder)| async move {
        loop {
            let active = decoder.as_mut()?;
            match body.next().await {
                Some(Ok(chunk)) => {
                    let text = active.push(&chunk);
                    if !text.is_empty() {
                        return Some((Ok(text), (body, decoder)));
                    }
                }
                Some(Err(e)) => return Some((Err(e.into()), (body, None))),
                None => {
                    let tail = decoder.take().and_then(Utf8ChunkDecoder::finish)?;
                    return Some((Ok(tail), (body, None)));
                }
            }
        }
    })
    .boxed()
}
