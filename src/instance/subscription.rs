use std::{
    collections::VecDeque,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::{sync::broadcast, task::JoinHandle};
use tokio_stream::{
    Stream, StreamExt,
    wrappers::{BroadcastStream, errors::BroadcastStreamRecvError},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::stream::{EventPayload, InstanceEvent, LogLine};

/// Buffered backlog followed by live lines, in production order.
///
/// A consumer that falls more than the channel capacity behind loses the
/// oldest undelivered lines; the count is kept in [`dropped`](Self::dropped).
#[derive(Debug)]
pub struct OutputSubscription {
    backlog: VecDeque<LogLine>,
    live: BroadcastStream<InstanceEvent>,
    dropped: u64,
}

impl OutputSubscription {
    pub(crate) fn new(backlog: VecDeque<LogLine>, live: broadcast::Receiver<InstanceEvent>) -> Self {
        Self {
            backlog,
            live: BroadcastStream::new(live),
            dropped: 0,
        }
    }

    /// Lines still to be replayed before live output.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Stream for OutputSubscription {
    type Item = LogLine;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(line) = this.backlog.pop_front() {
            return Poll::Ready(Some(line));
        }

        loop {
            match Pin::new(&mut this.live).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => match event.payload {
                    EventPayload::Line { line } => return Poll::Ready(Some(line)),
                    EventPayload::StateChange { .. } => continue,
                },
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(n)))) => {
                    this.dropped += n;
                    warn!(skipped = n, "output subscriber lagged; oldest lines dropped");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Callback-style consumer of output lines.
///
/// Runs on its own task, so a slow sink never holds up the relay.
pub trait OutputSink: Send + 'static {
    fn deliver(&mut self, line: &LogLine);
}

impl<F> OutputSink for F
where
    F: FnMut(&LogLine) + Send + 'static,
{
    fn deliver(&mut self, line: &LogLine) {
        self(line)
    }
}

/// Guard of a sink subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct SinkSubscription {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SinkSubscription {
    /// `token` is usually a child of the owner's token, so either side can end it.
    pub(crate) fn spawn<S: OutputSink>(
        mut output: OutputSubscription,
        mut sink: S,
        token: CancellationToken,
    ) -> Self {
        let cancelled = token.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    next = output.next() => match next {
                        Some(line) => sink.deliver(&line),
                        None => break,
                    },
                }
            }
            debug!(dropped = output.dropped(), "sink subscription ended");
        });

        Self { token, task }
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled() && !self.task.is_finished()
    }

    pub fn unsubscribe(self) {
        self.token.cancel();
    }
}

impl Drop for SinkSubscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
