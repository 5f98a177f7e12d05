use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use crate::accumulate::ChunkAccumulator;
use crate::config::Config;
use crate::delivery::DeliveryClient;
use crate::format::{format_for_transport, sanitize_markup};
use crate::tasks::TaskManager;
use crate::throttle::should_flush;
use crate::transport::{ChatTransport, ParseMode};
use crate::upstream::AnswerSource;

const PLACEHOLDER: &str = "...";
const APOLOGY: &str = "Sorry, I ran into a problem while finishing this answer. Please try again.";
const TYPING_INTERVAL: Duration = Duration::from_secs(3);

/// Composes the task manager, accumulator, throttler and delivery client into
/// the end-to-end flow for one user message: cancel-and-replace the live
/// generation, stream fragments into partial text, push throttled edits, and
/// finish with one formatted final edit.
pub struct Relay {
    tasks: TaskManager,
    delivery: DeliveryClient,
    transport: Arc<dyn ChatTransport>,
    source: Arc<dyn AnswerSource>,
    edit_interval: Duration,
    idle_timeout: Duration,
}

impl Relay {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        source: Arc<dyn AnswerSource>,
        config: &Config,
    ) -> Self {
        Self {
            tasks: TaskManager::new(),
            delivery: DeliveryClient::new(
                transport.clone(),
                config.rate_limit,
                config.max_attempts,
            ),
            transport,
            source,
            edit_interval: config.edit_interval,
            idle_timeout: config.idle_timeout,
        }
    }

    /// Entry point for an inbound user message. Supersedes the conversation's
    /// live generation, if any, and returns the new run id.
    pub fn on_user_message(self: &Arc<Self>, chat_id: i64, text: String) -> Uuid {
        let relay = Arc::clone(self);
        self.tasks.start(chat_id, move |cancel, run_id| async move {
            relay.run_generation(chat_id, text, cancel, run_id).await;
            relay.tasks.finish(chat_id, run_id);
        })
    }

    /// Entry point for an explicit stop command. Reports whether a live
    /// generation was actually stopped.
    pub fn on_stop_command(&self, chat_id: i64) -> bool {
        self.tasks.stop(chat_id)
    }

    /// Sends a standalone notice (greeting, stop acknowledgment) through the
    /// same rate-limited path generations use.
    pub async fn send_notice(&self, chat_id: i64, text: &str) {
        let cancel = CancellationToken::new();
        if self
            .delivery
            .send(chat_id, text, ParseMode::Plain, &cancel)
            .await
            .is_none()
        {
            warn!("notice to chat {chat_id} was not delivered");
        }
    }

    pub fn has_live_generation(&self, chat_id: i64) -> bool {
        self.tasks.has_live_task(chat_id)
    }

    async fn run_generation(
        &self,
        chat_id: i64,
        prompt: String,
        cancel: CancellationToken,
        run_id: Uuid,
    ) {
        info!("[{run_id}] starting generation for chat {chat_id}");
        let _typing = self.keep_typing(chat_id);

        let opened = self.source.open(&prompt).await;
        if cancel.is_cancelled() {
            info!("[{run_id}] cancelled before first send");
            return;
        }

        // Nothing exists to edit until this succeeds; a failed placeholder
        // send aborts the whole task.
        let Some(mut outbound) = self
            .delivery
            .send(chat_id, PLACEHOLDER, ParseMode::Plain, &cancel)
            .await
        else {
            error!("[{run_id}] placeholder send failed, aborting generation");
            return;
        };

        let mut accumulated = ChunkAccumulator::new();
        let mut upstream_failed = false;
        let mut last_flush = Instant::now();

        match opened {
            Err(err) => {
                warn!("[{run_id}] upstream refused the stream: {err}");
                upstream_failed = true;
            }
            Ok(mut fragments) => loop {
                if cancel.is_cancelled() {
                    info!("[{run_id}] cancelled mid-stream");
                    return;
                }
                let next = match timeout(self.idle_timeout, fragments.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(
                            "[{run_id}] upstream idle for {}s, unwinding",
                            self.idle_timeout.as_secs()
                        );
                        upstream_failed = true;
                        break;
                    }
                };
                match next {
                    None => break,
                    Some(Err(err)) => {
                        warn!("[{run_id}] upstream failed mid-stream: {err}");
                        upstream_failed = true;
                        break;
                    }
                    Some(Ok(fragment)) => {
                        accumulated.push_fragment(&fragment);
                        if cancel.is_cancelled() {
                            info!("[{run_id}] cancelled mid-stream");
                            return;
                        }
                        if should_flush(last_flush, Instant::now(), self.edit_interval) {
                            // Partial text goes out plain; it may end
                            // mid-markup.
                            self.delivery
                                .edit(&mut outbound, accumulated.text(), ParseMode::Plain, &cancel)
                                .await;
                            last_flush = Instant::now();
                        }
                    }
                }
            },
        }

        if cancel.is_cancelled() {
            info!("[{run_id}] cancelled at stream end, skipping final flush");
            return;
        }

        let mut final_text = accumulated.text().to_string();
        if upstream_failed {
            if !final_text.is_empty() {
                final_text.push_str("\n\n");
            }
            final_text.push_str(APOLOGY);
        }
        if final_text.is_empty() {
            debug!("[{run_id}] upstream produced nothing, leaving placeholder as is");
            return;
        }

        let formatted = format_for_transport(&sanitize_markup(&final_text));
        if !self
            .delivery
            .edit(&mut outbound, &formatted, ParseMode::Markdown, &cancel)
            .await
        {
            warn!("[{run_id}] final edit for chat {chat_id} was not delivered");
        }
        info!("[{run_id}] generation for chat {chat_id} complete");
    }

    /// Keeps the conversation's typing indicator alive until the returned
    /// guard drops. Best-effort: failures are logged and ignored.
    fn keep_typing(&self, chat_id: i64) -> DropGuard {
        let token = CancellationToken::new();
        let guard = token.clone().drop_guard();
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            loop {
                if let Err(err) = transport.send_typing(chat_id).await {
                    debug!("typing indicator for chat {chat_id} failed: {err}");
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = sleep(TYPING_INTERVAL) => {}
                }
            }
        });
        guard
    }
}
