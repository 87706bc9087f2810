use axum::body::Bytes;
use futures::stream::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Wraps an upstream body stream and notices when the caller goes away.
///
/// The upstream stream is owned by this wrapper, so dropping it (which axum
/// does when the client disconnects) drops the upstream connection as well and
/// the backend call is aborted instead of running to completion.
pub struct DisconnectStream<S> {
    stream: S,
    request_id: String,
    bytes_sent: usize,
    completed: bool,
}

impl<S> DisconnectStream<S> {
    pub fn new(stream: S, request_id: impl Into<String>) -> Self {
        Self {
            stream,
            request_id: request_id.into(),
            bytes_sent: 0,
            completed: false,
        }
    }

    /// True once the upstream stream ended or failed.
    pub fn is_completed(&self) -> bool {
        self.completed
    }
}

impl<S, E> Stream for DisconnectStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = Pin::new(&mut self.stream).poll_next(cx);
        match &poll {
            Poll::Ready(Some(Ok(chunk))) => self.bytes_sent += chunk.len(),
            Poll::Ready(Some(Err(_))) | Poll::Ready(None) => self.completed = true,
            Poll::Pending => {}
        }
        poll
    }
}

impl<S> Drop for DisconnectStream<S> {
    fn drop(&mut self) {
        if self.completed {
            tracing::debug!(
                request_id = %self.request_id,
                bytes_sent = self.bytes_sent,
                "Upstream stream finished"
            );
        } else {
            tracing::info!(
                request_id = %self.request_id,
                bytes_sent = self.bytes_sent,
                "Client disconnected mid-stream, aborting upstream call"
            );
        }
    }
}
