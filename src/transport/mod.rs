use async_trait::async_trait;
use thiserror::Error;

pub mod telegram;

/// Markup flag for outbound text. Partial flushes go out plain because the
/// accumulated text may end mid-syntax; only the final flush uses markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Plain,
    Markdown,
}

/// Transport-assigned identity of one outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle {
    pub chat_id: i64,
    pub message_id: i64,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("throttled, retry after {retry_after}s")]
    Throttled { retry_after: u64 },

    #[error("message is not modified")]
    NotModified,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api error: {0}")]
    Api(String),
}

/// The three capabilities the relay needs from a chat transport.
///
/// `send_typing` is best-effort liveness signalling; every caller ignores its
/// failure. Send and edit surface throttling and no-op rejections as distinct
/// variants so the delivery client can back off or skip accordingly.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        mode: ParseMode,
    ) -> Result<MessageHandle, TransportError>;

    async fn edit_message(
        &self,
        handle: &MessageHandle,
        text: &str,
        mode: ParseMode,
    ) -> Result<(), TransportError>;

    async fn send_typing(&self, chat_id: i64) -> Result<(), TransportError>;
}
