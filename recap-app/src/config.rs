//! Service configuration loader.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecapConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub legal: LegalConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeysConfig {
    pub openai_api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub phone_number_id: String,
    /// App secret used to verify `X-Hub-Signature-256` on inbound
    /// webhooks. When empty, inbound payloads are accepted unverified.
    #[serde(default)]
    pub app_secret: String,
    /// Token echoed during the provider's GET subscription handshake.
    #[serde(default)]
    pub verify_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    #[serde(default)]
    pub signing_secret: String,
    #[serde(default = "default_checkout_url")]
    pub checkout_url: String,
    /// Test-vs-live mode; surfaced in STATUS/health, never gates logic.
    #[serde(default)]
    pub test_mode: bool,
}

fn default_checkout_url() -> String {
    "https://checkout.example.com/buy/recap-monthly".to_string()
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            signing_secret: String::new(),
            checkout_url: default_checkout_url(),
            test_mode: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    /// Free-tier summaries seeded into each new user.
    #[serde(default = "default_free_messages")]
    pub free_messages: i64,
}

fn default_free_messages() -> i64 {
    5
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free_messages: default_free_messages(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummarizerConfig {
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub dry_run: bool,
}

fn default_max_input_chars() -> usize {
    6000
}

fn default_max_output_tokens() -> u32 {
    200
}

fn default_max_retries() -> u32 {
    2
}

fn default_concurrency() -> usize {
    1
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            max_input_chars: default_max_input_chars(),
            max_output_tokens: default_max_output_tokens(),
            max_retries: default_max_retries(),
            concurrency: default_concurrency(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Attempts before a row is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,
    /// Base requeue delay; doubles per attempt, capped at one hour.
    #[serde(default = "default_retry_base_seconds")]
    pub retry_base_seconds: i64,
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
    #[serde(default = "default_busy_poll_ms")]
    pub busy_poll_ms: u64,
}

fn default_max_attempts() -> i64 {
    5
}

fn default_retry_base_seconds() -> i64 {
    60
}

fn default_idle_poll_ms() -> u64 {
    2000
}

fn default_busy_poll_ms() -> u64 {
    100
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_base_seconds: default_retry_base_seconds(),
            idle_poll_ms: default_idle_poll_ms(),
            busy_poll_ms: default_busy_poll_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8090".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    20
}

fn default_http_max_in_flight() -> usize {
    256
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_dir: None,
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegalConfig {
    #[serde(default = "default_tos_version")]
    pub tos_version: String,
}

fn default_tos_version() -> String {
    "2025-06".to_string()
}

impl Default for LegalConfig {
    fn default() -> Self {
        Self {
            tos_version: default_tos_version(),
        }
    }
}

impl RecapConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = path.unwrap_or_else(default_config_path);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;

        let mut cfg: RecapConfig = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?;

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("RECAP_MODEL") {
            if !v.trim().is_empty() {
                self.general.model = v;
            }
        }
        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            if !v.trim().is_empty() {
                self.keys.openai_api_key = Some(v);
            }
        }
        if let Ok(v) = std::env::var("WHATSAPP_ACCESS_TOKEN") {
            if !v.trim().is_empty() {
                self.whatsapp.access_token = v;
            }
        }
        if let Ok(v) = std::env::var("WHATSAPP_PHONE_NUMBER_ID") {
            if !v.trim().is_empty() {
                self.whatsapp.phone_number_id = v;
            }
        }
        if let Ok(v) = std::env::var("WHATSAPP_APP_SECRET") {
            if !v.trim().is_empty() {
                self.whatsapp.app_secret = v;
            }
        }
        if let Ok(v) = std::env::var("WHATSAPP_VERIFY_TOKEN") {
            if !v.trim().is_empty() {
                self.whatsapp.verify_token = v;
            }
        }
        if let Ok(v) = std::env::var("BILLING_SIGNING_SECRET") {
            if !v.trim().is_empty() {
                self.billing.signing_secret = v;
            }
        }
        if let Ok(v) = std::env::var("RECAP_DRY_RUN") {
            if let Ok(flag) = v.trim().parse::<bool>() {
                self.summarizer.dry_run = flag;
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.general.model.trim().is_empty() {
            return Err(anyhow::anyhow!("general.model is required"));
        }
        if self.runtime.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(anyhow::anyhow!(
                "runtime.bind_addr is not a valid socket address: {}",
                self.runtime.bind_addr
            ));
        }
        if self.quota.free_messages < 0 {
            return Err(anyhow::anyhow!("quota.free_messages must be >= 0"));
        }
        if self.queue.max_attempts < 1 {
            return Err(anyhow::anyhow!("queue.max_attempts must be >= 1"));
        }
        if self.queue.retry_base_seconds < 1 {
            return Err(anyhow::anyhow!("queue.retry_base_seconds must be >= 1"));
        }
        if self.runtime.http_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("runtime.http_timeout_seconds must be > 0"));
        }
        Ok(())
    }

    pub fn data_dir_path(&self) -> PathBuf {
        match &self.runtime.data_dir {
            Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir.trim()),
            _ => default_data_dir(),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir_path().join("recap.db")
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".recap").join("config.toml")
}

pub fn default_data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".recap").join("data")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_parses_with_defaults() {
        let cfg: RecapConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.general.model, "gpt-4o-mini");
        assert_eq!(cfg.quota.free_messages, 5);
        assert_eq!(cfg.queue.max_attempts, 5);
        assert!(!cfg.summarizer.dry_run);
        cfg.validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_bind_addr() {
        let mut cfg = RecapConfig::default();
        cfg.runtime.bind_addr = "not-an-addr".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_unbounded_retries() {
        let mut cfg = RecapConfig::default();
        cfg.queue.max_attempts = 0;
        assert!(cfg.validate().is_err());
    }
}
