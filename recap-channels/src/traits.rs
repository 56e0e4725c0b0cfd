use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Messenger: Send + Sync {
    /// Unique channel identifier: "whatsapp".
    fn channel_id(&self) -> &str;

    /// Send a plain-text message to a recipient on this platform.
    /// Implementations truncate to the platform's hard length limit.
    async fn send_text(&self, recipient_id: &str, body: &str) -> Result<()>;
}
