use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::{debug, error, warn};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::transport::{ChatTransport, MessageHandle, ParseMode, TransportError};

/// Longest single backoff the transport can talk us into.
const MAX_BACKOFF: Duration = Duration::from_secs(120);
/// Flat pause between attempts for non-throttle transport errors.
const ERROR_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// One transport message owned by a single generation task: its handle plus
/// the text last actually delivered, kept for no-op edit suppression.
#[derive(Debug)]
pub struct OutboundMessage {
    pub handle: MessageHandle,
    last_text: String,
}

impl OutboundMessage {
    fn new(handle: MessageHandle, text: String) -> Self {
        Self {
            handle,
            last_text: text,
        }
    }

    pub fn last_text(&self) -> &str {
        &self.last_text
    }
}

/// Wraps transport send/edit with per-conversation send spacing and a bounded
/// backoff-on-throttle retry loop.
///
/// Only a successful send records the conversation's last-send instant; edits
/// wait out that window when it is still open but never extend it, so once
/// the post-send window passes, edits are paced by the edit throttler alone.
pub struct DeliveryClient {
    transport: Arc<dyn ChatTransport>,
    last_send: DashMap<i64, Instant>,
    rate_limit: Duration,
    max_attempts: u32,
}

impl DeliveryClient {
    pub fn new(transport: Arc<dyn ChatTransport>, rate_limit: Duration, max_attempts: u32) -> Self {
        Self {
            transport,
            last_send: DashMap::new(),
            rate_limit,
            max_attempts,
        }
    }

    /// Sends a new message. Returns `None` once the retry budget is spent;
    /// the caller must treat that as "not delivered".
    pub async fn send(
        &self,
        chat_id: i64,
        text: &str,
        mode: ParseMode,
        cancel: &CancellationToken,
    ) -> Option<OutboundMessage> {
        let text = strip_heading_runs(text);
        self.wait_for_send_window(chat_id).await;

        let result = retry_transport("send", chat_id, self.max_attempts, cancel, || {
            self.transport.send_message(chat_id, &text, mode)
        })
        .await;

        match result {
            Ok(handle) => {
                self.last_send.insert(chat_id, Instant::now());
                Some(OutboundMessage::new(handle, text))
            }
            Err(err) => {
                error!("giving up on send to chat {chat_id}: {err}");
                None
            }
        }
    }

    /// Edits an already-sent message in place. Failure is reported, never
    /// raised: a lost partial edit is made up for by the next flush.
    pub async fn edit(
        &self,
        message: &mut OutboundMessage,
        text: &str,
        mode: ParseMode,
        cancel: &CancellationToken,
    ) -> bool {
        let text = strip_heading_runs(text);
        if message.last_text == text {
            return true;
        }
        let chat_id = message.handle.chat_id;
        self.wait_for_send_window(chat_id).await;

        let result = retry_transport("edit", chat_id, self.max_attempts, cancel, || {
            self.transport.edit_message(&message.handle, &text, mode)
        })
        .await;

        match result {
            Ok(()) => {
                message.last_text = text;
                true
            }
            // The transport already displays this text; remember that and
            // move on without retrying.
            Err(TransportError::NotModified) => {
                message.last_text = text;
                true
            }
            Err(err) => {
                warn!("giving up on edit for chat {chat_id}: {err}");
                false
            }
        }
    }

    /// Suspends until the conversation's minimum inter-send interval has
    /// elapsed since the last successful send.
    async fn wait_for_send_window(&self, chat_id: i64) {
        let remaining = self
            .last_send
            .get(&chat_id)
            .and_then(|last| self.rate_limit.checked_sub(last.elapsed()));
        if let Some(remaining) = remaining {
            if !remaining.is_zero() {
                debug!("rate limiting chat {chat_id}, waiting {remaining:?}");
                sleep(remaining).await;
            }
        }
    }
}

/// Runs one transport operation with the shared retry discipline: throttle
/// responses wait `min(retry_after + failures * 5, 120)` seconds, other
/// errors wait one second, and the budget is a fixed attempt count. A no-op
/// rejection and a cancellation observed between attempts both end the loop
/// immediately.
async fn retry_transport<T, F, Fut>(
    what: &str,
    chat_id: i64,
    max_attempts: u32,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut failures: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(TransportError::NotModified) => return Err(TransportError::NotModified),
            Err(err) => {
                failures += 1;
                if failures >= max_attempts {
                    warn!("{what} to chat {chat_id} failed after {failures} attempts: {err}");
                    return Err(err);
                }
                let pause = match &err {
                    TransportError::Throttled { retry_after } => {
                        let backoff =
                            Duration::from_secs(retry_after + u64::from(failures - 1) * 5);
                        warn!(
                            "{what} to chat {chat_id} throttled (attempt {failures}/{max_attempts}), \
                             waiting {}s",
                            backoff.min(MAX_BACKOFF).as_secs()
                        );
                        backoff.min(MAX_BACKOFF)
                    }
                    _ => {
                        error!("{what} to chat {chat_id} failed (attempt {failures}/{max_attempts}): {err}");
                        ERROR_RETRY_PAUSE
                    }
                };
                sleep(pause).await;
                if cancel.is_cancelled() {
                    debug!("{what} to chat {chat_id} abandoned between retries, task cancelled");
                    return Err(err);
                }
            }
        }
    }
}

/// The upstream model sprinkles `###` into replies; the transport renders
/// them literally, so they are dropped from every outbound text.
fn strip_heading_runs(text: &str) -> String {
    text.replace("###", "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_heading_runs() {
        assert_eq!(strip_heading_runs("### Status"), " Status");
        assert_eq!(strip_heading_runs("no headings"), "no headings");
    }
}
