//! Bridges a streaming completion to a pull-based consumer.
//!
//! The gateway runs in its own task and pushes delta units through a channel
//! of capacity one, so at most one unit is in flight ahead of the consumer.
//! Dropping the returned stream cancels the upstream request.

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ChatRequest, LlmClient, LlmError, StreamChunk, StreamSummary};

const RELAY_CAPACITY: usize = 1;

#[derive(Debug)]
pub enum RelayEvent {
    Delta(StreamChunk),
    /// Emitted once, only after the upstream finished cleanly.
    Done(StreamSummary),
}

pub fn relay(client: LlmClient, request: ChatRequest) -> impl Stream<Item = Result<RelayEvent, LlmError>> + Send {
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let (tx, mut rx) = mpsc::channel::<StreamChunk>(RELAY_CAPACITY);

    let model = request.model.clone();
    let producer = tokio::spawn(async move { client.stream_chat(request, tx, cancel).await });

    async_stream::stream! {
        let _guard = guard;

        while let Some(chunk) = rx.recv().await {
            yield Ok(RelayEvent::Delta(chunk));
        }

        match producer.await {
            Ok(Ok(summary)) => {
                tracing::debug!(model = %model, chunks = summary.chunks, "stream finished");
                yield Ok(RelayEvent::Done(summary));
            }
            Ok(Err(e)) => {
                tracing::warn!(model = %model, "stream aborted: {}", e.log_detail());
                yield Err(e);
            }
            Err(e) => {
                tracing::error!(model = %model, "stream task failed: {}", e);
                yield Err(LlmError::StreamAbort(format!("stream task failed: {e}")));
            }
        }
    }
}
