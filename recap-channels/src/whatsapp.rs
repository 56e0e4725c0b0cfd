use crate::traits::Messenger;
use anyhow::{Result, anyhow};
use reqwest::Url;

/// Hard cap for a WhatsApp text message body.
pub const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Clone)]
pub struct WhatsAppCloudAdapter {
    http: reqwest::Client,
    access_token: String,
    phone_number_id: String,
}

impl WhatsAppCloudAdapter {
    pub fn new(access_token: &str, phone_number_id: &str) -> Result<Self> {
        let access_token = access_token.trim();
        if access_token.is_empty() {
            return Err(anyhow!("whatsapp access token is required"));
        }
        let phone_number_id = phone_number_id.trim();
        if phone_number_id.is_empty() {
            return Err(anyhow!("whatsapp phone number id is required"));
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            access_token: access_token.to_string(),
            phone_number_id: phone_number_id.to_string(),
        })
    }

    fn messages_url(&self) -> Result<Url> {
        Url::parse(&format!(
            "https://graph.facebook.com/v20.0/{}/messages",
            self.phone_number_id
        ))
        .map_err(|e| anyhow!("invalid whatsapp graph API URL: {e}"))
    }
}

#[async_trait::async_trait]
impl Messenger for WhatsAppCloudAdapter {
    fn channel_id(&self) -> &str {
        "whatsapp"
    }

    async fn send_text(&self, recipient_id: &str, body: &str) -> Result<()> {
        let to = recipient_id.trim();
        if to.is_empty() {
            return Err(anyhow!("recipient_id (E.164 phone number) is required"));
        }
        let text = truncate_chars(body.trim(), MAX_MESSAGE_CHARS);
        if text.is_empty() {
            return Err(anyhow!("message body is empty"));
        }

        let url = self.messages_url()?;
        let payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": {
                "preview_url": false,
                "body": text,
            }
        });

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(anyhow!(
                "whatsapp send failed: status={} body={}",
                status,
                body
            ));
        }

        Ok(())
    }
}

/// Truncate at a char boundary so multi-byte text never splits mid-codepoint.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_requires_credentials() {
        assert!(WhatsAppCloudAdapter::new("", "12345").is_err());
        assert!(WhatsAppCloudAdapter::new("token", "  ").is_err());
        assert!(WhatsAppCloudAdapter::new("token", "12345").is_ok());
    }

    #[test]
    fn truncation_is_char_safe() {
        let long: String = "é".repeat(MAX_MESSAGE_CHARS + 10);
        let cut = truncate_chars(&long, MAX_MESSAGE_CHARS);
        assert_eq!(cut.chars().count(), MAX_MESSAGE_CHARS);

        assert_eq!(truncate_chars("short", MAX_MESSAGE_CHARS), "short");
    }
}
