use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use tokio::time::sleep;

use crate::relay::Relay;
use crate::transport::telegram::TelegramTransport;

const GREETING: &str =
    "Hello! I am your LLM-powered assistant. Ask me about government services.";
const STOPPED: &str = "Generation stopped.";
const NOTHING_TO_STOP: &str = "No active generation to stop.";

/// Server-side hold time for each getUpdates call.
const POLL_TIMEOUT_SECS: u64 = 30;
/// Pause before re-polling after a transport-level failure.
const POLL_RETRY_PAUSE: Duration = Duration::from_secs(5);

/// Long-poll ingestion loop: acknowledges updates by offset and dispatches
/// text messages into the relay. Poll failures back off and continue; they
/// never terminate the loop.
pub async fn run_polling_loop(transport: Arc<TelegramTransport>, relay: Arc<Relay>) {
    info!("polling for updates");
    let mut offset: i64 = 0;
    loop {
        let updates = match transport.get_updates(offset, POLL_TIMEOUT_SECS).await {
            Ok(updates) => updates,
            Err(err) => {
                error!("getUpdates failed: {err}");
                sleep(POLL_RETRY_PAUSE).await;
                continue;
            }
        };
        for update in updates {
            offset = offset.max(update.update_id + 1);
            dispatch(&relay, update);
        }
    }
}

fn dispatch(relay: &Arc<Relay>, update: crate::transport::telegram::Update) {
    let Some(message) = update.message else {
        debug!("skipping update {} without a message", update.update_id);
        return;
    };
    let Some(text) = message.text else {
        debug!(
            "skipping non-text message {} from chat {}",
            message.message_id, message.chat.id
        );
        return;
    };
    let chat_id = message.chat.id;
    debug!(
        "update {} from chat {chat_id} sent at {}",
        update.update_id, message.date
    );

    match text.trim() {
        "/start" => {
            let relay = Arc::clone(relay);
            tokio::spawn(async move { relay.send_notice(chat_id, GREETING).await });
        }
        "/stop" => {
            let stopped = relay.on_stop_command(chat_id);
            let relay = Arc::clone(relay);
            tokio::spawn(async move {
                let ack = if stopped { STOPPED } else { NOTHING_TO_STOP };
                relay.send_notice(chat_id, ack).await;
            });
        }
        _ => {
            relay.on_user_message(chat_id, text);
        }
    }
}
