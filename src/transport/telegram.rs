use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ChatTransport, MessageHandle, ParseMode, TransportError};

const NOT_MODIFIED_MARKER: &str = "message is not modified";

/// Telegram Bot API client. One instance per bot token; cheap to clone the
/// inner reqwest client across tasks.
#[derive(Clone)]
pub struct TelegramTransport {
    http: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiReply<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct SentMessage {
    pub message_id: i64,
    pub chat: ChatRef,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRef {
    pub id: i64,
}

/// One inbound update from `getUpdates`. Only text messages matter to the
/// relay; everything else deserializes with `message: None` or
/// `text: None` and is skipped by the poll loop.
#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    pub message_id: i64,
    pub chat: ChatRef,
    pub text: Option<String>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub date: DateTime<Utc>,
}

impl TelegramTransport {
    pub fn new(token: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: format!("https://api.telegram.org/bot{token}"),
        }
    }

    /// Long-polls for inbound updates. `offset` acknowledges everything below
    /// it; `timeout_secs` is the server-side hold time.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, TransportError> {
        let body = json!({ "offset": offset, "timeout": timeout_secs });
        self.call("getUpdates", &body).await
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        body: &Value,
    ) -> Result<T, TransportError> {
        let url = format!("{}/{method}", self.base_url);
        let response = self.http.post(&url).json(body).send().await?;
        let reply: ApiReply<T> = response.json().await?;
        if reply.ok {
            return reply
                .result
                .ok_or_else(|| TransportError::Api(format!("{method}: ok reply without result")));
        }
        let description = reply.description.unwrap_or_else(|| "unknown error".to_string());
        if let Some(retry_after) = reply.parameters.and_then(|p| p.retry_after) {
            debug!("{method} throttled by transport, retry_after={retry_after}s");
            return Err(TransportError::Throttled { retry_after });
        }
        if description.to_lowercase().contains(NOT_MODIFIED_MARKER) {
            return Err(TransportError::NotModified);
        }
        Err(TransportError::Api(format!("{method}: {description}")))
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        mode: ParseMode,
    ) -> Result<MessageHandle, TransportError> {
        let mut body = json!({ "chat_id": chat_id, "text": text });
        if mode == ParseMode::Markdown {
            body["parse_mode"] = json!("Markdown");
        }
        let sent: SentMessage = self.call("sendMessage", &body).await?;
        debug!(
            "sent message {} to chat {} at {}",
            sent.message_id, sent.chat.id, sent.date
        );
        Ok(MessageHandle {
            chat_id: sent.chat.id,
            message_id: sent.message_id,
        })
    }

    async fn edit_message(
        &self,
        handle: &MessageHandle,
        text: &str,
        mode: ParseMode,
    ) -> Result<(), TransportError> {
        let mut body = json!({
            "chat_id": handle.chat_id,
            "message_id": handle.message_id,
            "text": text,
        });
        if mode == ParseMode::Markdown {
            body["parse_mode"] = json!("Markdown");
        }
        let _edited: Value = self.call("editMessageText", &body).await?;
        Ok(())
    }

    async fn send_typing(&self, chat_id: i64) -> Result<(), TransportError> {
        let body = json!({ "chat_id": chat_id, "action": "typing" });
        let _ok: Value = self.call("sendChatAction", &body).await?;
        Ok(())
    }
}
