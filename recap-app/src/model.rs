//! Domain types shared by the store, worker, and pipeline.

use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Source of a queued event. Closed set; unknown provider strings are
/// rejected at the store boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Chat,
    Billing,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Chat => "chat",
            Provider::Billing => "billing",
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Provider::Chat),
            "billing" => Ok(Provider::Billing),
            other => Err(anyhow!("unknown event provider: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Pending,
    Processing,
    Done,
    Error,
    Dead,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Processing => "processing",
            EventStatus::Done => "done",
            EventStatus::Error => "error",
            EventStatus::Dead => "dead",
        }
    }
}

/// A new row for the durable queue, produced by the ingestion gateway.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub provider: Provider,
    /// Dedup key within the provider: message id for chat, payload hash
    /// for billing deliveries without a native id.
    pub provider_event_id: String,
    pub event_type: String,
    pub payload_hash: String,
    pub sender: Option<String>,
    pub message_type: Option<String>,
    pub text: Option<String>,
    /// Extracted billing fields, serialized; `None` for chat events.
    pub detail: Option<String>,
    pub provider_ts: Option<i64>,
}

/// A queue row exclusively owned by the claiming worker.
#[derive(Debug, Clone)]
pub struct ClaimedEvent {
    pub id: i64,
    pub provider: Provider,
    pub provider_event_id: String,
    pub event_type: String,
    pub sender: Option<String>,
    pub message_type: Option<String>,
    pub text: Option<String>,
    pub detail: Option<String>,
    pub attempts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Free,
    Paid,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Paid => "paid",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "free" => Ok(Plan::Free),
            "paid" => Ok(Plan::Paid),
            other => bail!("unknown plan: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStatus {
    Active,
    Blocked,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "active" => Ok(UserStatus::Active),
            "blocked" => Ok(UserStatus::Blocked),
            other => bail!("unknown user status: {other}"),
        }
    }
}

/// Reply-language preference. `Auto` resolves to English.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LangChoice {
    Auto,
    En,
    Ar,
    Es,
}

impl LangChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            LangChoice::Auto => "auto",
            LangChoice::En => "en",
            LangChoice::Ar => "ar",
            LangChoice::Es => "es",
        }
    }

    /// Case-insensitive parse of a user-supplied code. Anything outside
    /// the supported set is rejected.
    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(LangChoice::Auto),
            "en" => Some(LangChoice::En),
            "ar" => Some(LangChoice::Ar),
            "es" => Some(LangChoice::Es),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub phone: String,
    pub phone_hash: String,
    pub plan: Plan,
    pub status: UserStatus,
    pub free_remaining: i64,
    pub privacy_notice_sent_at: Option<i64>,
    pub tos_accepted_at: Option<i64>,
    pub tos_version: Option<String>,
    pub lang: LangChoice,
    pub created_at: i64,
}

/// Fields extracted from a billing webhook, carried through the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingFields {
    pub subscription_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub renews_at: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    /// Phone embedded in the checkout link's custom metadata.
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SubscriptionUpdate {
    pub subscription_id: String,
    pub user_phone: Option<String>,
    pub status: Option<String>,
    pub plan: Option<String>,
    pub renews_at: Option<String>,
    pub customer_id: Option<String>,
}

/// One-way hash of a phone number for log lines; never log raw numbers.
pub fn phone_hash(phone: &str) -> String {
    let digest = Sha256::digest(phone.trim().trim_start_matches('+').as_bytes());
    hex::encode(&digest[..8])
}

/// Canonical storage form of a sender identifier: trimmed, no leading
/// `+`.
pub fn normalize_phone(phone: &str) -> String {
    phone.trim().trim_start_matches('+').to_string()
}

/// Both representations a sender identifier may arrive under.
pub fn phone_variants(phone: &str) -> [String; 2] {
    let bare = normalize_phone(phone);
    let plus = format!("+{bare}");
    [bare, plus]
}

/// Hex SHA-256 of a raw webhook body.
pub fn payload_hash(raw: &[u8]) -> String {
    hex::encode(Sha256::digest(raw))
}

pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn provider_round_trip_rejects_unknown() {
        assert_eq!(Provider::from_str("chat").unwrap(), Provider::Chat);
        assert_eq!(Provider::from_str("billing").unwrap(), Provider::Billing);
        assert!(Provider::from_str("lemonsqueezy").is_err());
    }

    #[test]
    fn lang_parse_accepts_only_supported_codes() {
        assert_eq!(LangChoice::parse("AR"), Some(LangChoice::Ar));
        assert_eq!(LangChoice::parse(" es "), Some(LangChoice::Es));
        assert_eq!(LangChoice::parse("AUTO"), Some(LangChoice::Auto));
        assert_eq!(LangChoice::parse("fr"), None);
        assert_eq!(LangChoice::parse(""), None);
    }

    #[test]
    fn phone_variants_tolerate_plus_prefix() {
        assert_eq!(phone_variants("+15551230001"), phone_variants("15551230001"));
        let [bare, plus] = phone_variants("15551230001");
        assert_eq!(bare, "15551230001");
        assert_eq!(plus, "+15551230001");
    }

    #[test]
    fn phone_hash_is_stable_and_short() {
        assert_eq!(phone_hash("+15551230001"), phone_hash("15551230001"));
        assert_eq!(phone_hash("15551230001").len(), 16);
        assert_ne!(phone_hash("15551230001"), phone_hash("15551230002"));
    }
}
