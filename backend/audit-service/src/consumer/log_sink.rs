use tracing::info;

use crate::error::{AuditError, Result};
use crate::models::InboundMessage;

/// Side-effect handler for `log-topic`: logs the message, persists nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl LogSink {
    pub async fn handle(&self, msg: &InboundMessage) -> Result<()> {
        let body = msg.value.as_deref().unwrap_or_default();
        let text = std::str::from_utf8(body).map_err(|e| {
            AuditError::Deserialization(format!("Log message is not valid UTF-8: {}", e))
        })?;

        info!(
            topic = %msg.topic,
            partition = msg.partition,
            offset = msg.offset,
            key = msg.key.as_deref().unwrap_or(""),
            body = text,
            "Processing log message"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handles_text_and_rejects_binary() {
        let sink = LogSink;

        let text = InboundMessage::new("log-topic", 0, 0, "GET /v1/audit 200").with_key("api");
        assert!(sink.handle(&text).await.is_ok());

        let binary = InboundMessage::new("log-topic", 0, 1, vec![0xff, 0xfe, 0x00]);
        assert!(matches!(
            sink.handle(&binary).await,
            Err(AuditError::Deserialization(_))
        ));
    }
}
