//! SQLite-backed durable store: the event queue plus user, subscription,
//! and summary tables.
//!
//! All access goes through `spawn_blocking`; the connection sits behind a
//! mutex so each statement runs alone. `claim_next_event` is the single
//! concurrency primitive the rest of the system relies on: a one-statement
//! UPDATE-of-SELECT that flips exactly one eligible row to `processing`,
//! atomic under SQLite's write lock even with multiple worker processes
//! on the same file.

use crate::config::QueueConfig;
use crate::model::{
    ClaimedEvent, EventStatus, LangChoice, NewEvent, Plan, Provider, SubscriptionUpdate, User,
    UserStatus, normalize_phone, phone_hash, phone_variants,
};
use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider TEXT NOT NULL,
    provider_event_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    payload_hash TEXT NOT NULL,
    sender TEXT,
    message_type TEXT,
    text TEXT,
    detail TEXT,
    provider_ts INTEGER,
    status TEXT NOT NULL DEFAULT 'pending',
    attempts INTEGER NOT NULL DEFAULT 0,
    locked_at INTEGER,
    next_attempt_at INTEGER,
    last_error TEXT,
    created_at INTEGER NOT NULL,
    processed_at INTEGER,
    UNIQUE (provider, provider_event_id)
);
CREATE INDEX IF NOT EXISTS idx_events_claim
    ON events (status, next_attempt_at, id);

CREATE TABLE IF NOT EXISTS users (
    phone TEXT PRIMARY KEY,
    phone_hash TEXT NOT NULL,
    plan TEXT NOT NULL DEFAULT 'free',
    status TEXT NOT NULL DEFAULT 'active',
    free_remaining INTEGER NOT NULL DEFAULT 0,
    privacy_notice_sent_at INTEGER,
    tos_accepted_at INTEGER,
    tos_version TEXT,
    lang TEXT NOT NULL DEFAULT 'auto',
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS subscriptions (
    subscription_id TEXT PRIMARY KEY,
    user_phone TEXT,
    status TEXT,
    plan TEXT,
    renews_at TEXT,
    customer_id TEXT,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS summaries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id INTEGER UNIQUE,
    user_phone TEXT NOT NULL,
    input_chars INTEGER NOT NULL,
    summary TEXT NOT NULL,
    cost_estimate REAL,
    created_at INTEGER NOT NULL
);
"#;

const LAST_ERROR_MAX_CHARS: usize = 500;
const RETRY_DELAY_CAP_SECONDS: i64 = 3600;

#[derive(Debug, Clone, Default)]
pub struct QueueDepth {
    pub pending: i64,
    pub processing: i64,
    pub error: i64,
    pub dead: i64,
    pub done: i64,
}

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    max_attempts: i64,
    retry_base_seconds: i64,
}

impl Store {
    pub fn open(path: &Path, queue: &QueueConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create data dir {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open store {}", path.display()))?;
        Self::from_connection(conn, queue)
    }

    pub fn open_in_memory(queue: &QueueConfig) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, queue)
    }

    fn from_connection(conn: Connection, queue: &QueueConfig) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            max_attempts: queue.max_attempts,
            retry_base_seconds: queue.retry_base_seconds,
        })
    }

    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| anyhow!("store mutex poisoned"))?;
            f(&conn)
        })
        .await?
    }

    // ---- event queue ----

    /// Insert a webhook event; returns false when the provider event id
    /// was already queued (redelivery dedup).
    pub async fn insert_event(&self, event: NewEvent, now: i64) -> Result<bool> {
        self.call(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO events (provider, provider_event_id, event_type, payload_hash, \
                 sender, message_type, text, detail, provider_ts, status, attempts, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', 0, ?10) \
                 ON CONFLICT (provider, provider_event_id) DO NOTHING",
                params![
                    event.provider.as_str(),
                    event.provider_event_id,
                    event.event_type,
                    event.payload_hash,
                    event.sender,
                    event.message_type,
                    event.text,
                    event.detail,
                    event.provider_ts,
                    now,
                ],
            )?;
            Ok(inserted > 0)
        })
        .await
    }

    /// Claim the next eligible row, flipping it to `processing` so no
    /// concurrent claimer can see it. Returns `None` when the queue is
    /// drained.
    pub async fn claim_next_event(&self, now: i64) -> Result<Option<ClaimedEvent>> {
        self.call(move |conn| {
            let row = conn
                .query_row(
                    "UPDATE events SET status = 'processing', locked_at = ?1 \
                     WHERE id = ( \
                         SELECT id FROM events \
                         WHERE status IN ('pending', 'error') \
                           AND (next_attempt_at IS NULL OR next_attempt_at <= ?1) \
                         ORDER BY id LIMIT 1 \
                     ) \
                     RETURNING id, provider, provider_event_id, event_type, sender, \
                               message_type, text, detail, attempts",
                    params![now],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, Option<String>>(4)?,
                            row.get::<_, Option<String>>(5)?,
                            row.get::<_, Option<String>>(6)?,
                            row.get::<_, Option<String>>(7)?,
                            row.get::<_, i64>(8)?,
                        ))
                    },
                )
                .optional()?;

            let Some((id, provider, provider_event_id, event_type, sender, message_type, text, detail, attempts)) =
                row
            else {
                return Ok(None);
            };

            Ok(Some(ClaimedEvent {
                id,
                provider: Provider::from_str(&provider)?,
                provider_event_id,
                event_type,
                sender,
                message_type,
                text,
                detail,
                attempts,
            }))
        })
        .await
    }

    pub async fn mark_done(&self, id: i64, now: i64) -> Result<()> {
        self.call(move |conn| {
            conn.execute(
                "UPDATE events SET status = 'done', processed_at = ?2, locked_at = NULL \
                 WHERE id = ?1",
                params![id, now],
            )?;
            Ok(())
        })
        .await
    }

    /// Record a processing failure. The row is requeued with an
    /// exponentially growing delay until `max_attempts`, then moved to
    /// `dead` and never claimed again.
    pub async fn mark_error(&self, id: i64, message: &str, now: i64) -> Result<()> {
        let message: String = message.chars().take(LAST_ERROR_MAX_CHARS).collect();
        let max_attempts = self.max_attempts;
        let base = self.retry_base_seconds;
        self.call(move |conn| {
            conn.execute(
                "UPDATE events SET \
                     attempts = attempts + 1, \
                     last_error = ?2, \
                     locked_at = NULL, \
                     status = CASE WHEN attempts + 1 >= ?3 THEN 'dead' ELSE 'error' END, \
                     next_attempt_at = CASE WHEN attempts + 1 >= ?3 THEN NULL \
                         ELSE ?4 + min(?5 * (1 << min(attempts, 6)), ?6) END \
                 WHERE id = ?1",
                params![id, message, max_attempts, now, base, RETRY_DELAY_CAP_SECONDS],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn queue_depth(&self) -> Result<QueueDepth> {
        self.call(|conn| {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM events GROUP BY status")?;
            let mut depth = QueueDepth::default();
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (status, count) = row?;
                match status.as_str() {
                    s if s == EventStatus::Pending.as_str() => depth.pending = count,
                    s if s == EventStatus::Processing.as_str() => depth.processing = count,
                    s if s == EventStatus::Error.as_str() => depth.error = count,
                    s if s == EventStatus::Dead.as_str() => depth.dead = count,
                    s if s == EventStatus::Done.as_str() => depth.done = count,
                    _ => {}
                }
            }
            Ok(depth)
        })
        .await
    }

    // ---- users ----

    /// Fetch a user, creating the row lazily for an unseen sender with
    /// the configured free-tier seed.
    pub async fn get_or_create_user(
        &self,
        phone: &str,
        free_seed: i64,
        now: i64,
    ) -> Result<User> {
        let phone = normalize_phone(phone);
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO users (phone, phone_hash, plan, status, free_remaining, lang, created_at) \
                 VALUES (?1, ?2, 'free', 'active', ?3, 'auto', ?4) \
                 ON CONFLICT (phone) DO NOTHING",
                params![phone, phone_hash(&phone), free_seed, now],
            )?;
            read_user(conn, &phone)?.ok_or_else(|| anyhow!("user row vanished after insert"))
        })
        .await
    }

    pub async fn get_user(&self, phone: &str) -> Result<Option<User>> {
        let phone = normalize_phone(phone);
        self.call(move |conn| read_user(conn, &phone)).await
    }

    /// Set-once claim on the privacy-notice column. Matches both
    /// identifier representations; succeeds for exactly one caller even
    /// under concurrent claims.
    pub async fn claim_privacy_notice(&self, phone: &str, now: i64) -> Result<bool> {
        let [bare, plus] = phone_variants(phone);
        self.call(move |conn| {
            let updated = conn.execute(
                "UPDATE users SET privacy_notice_sent_at = ?3 \
                 WHERE phone IN (?1, ?2) AND privacy_notice_sent_at IS NULL",
                params![bare, plus, now],
            )?;
            Ok(updated > 0)
        })
        .await
    }

    /// Set-once claim on terms acceptance. A lost race is not an error;
    /// acceptance degrades to implied.
    pub async fn claim_tos(&self, phone: &str, version: &str, now: i64) -> Result<bool> {
        let [bare, plus] = phone_variants(phone);
        let version = version.to_string();
        self.call(move |conn| {
            let updated = conn.execute(
                "UPDATE users SET tos_accepted_at = ?3, tos_version = ?4 \
                 WHERE phone IN (?1, ?2) AND tos_accepted_at IS NULL",
                params![bare, plus, now, version],
            )?;
            Ok(updated > 0)
        })
        .await
    }

    pub async fn set_user_status(&self, phone: &str, status: UserStatus) -> Result<()> {
        let phone = normalize_phone(phone);
        self.call(move |conn| {
            conn.execute(
                "UPDATE users SET status = ?2 WHERE phone = ?1",
                params![phone, status.as_str()],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn set_user_lang(&self, phone: &str, lang: LangChoice) -> Result<()> {
        let phone = normalize_phone(phone);
        self.call(move |conn| {
            conn.execute(
                "UPDATE users SET lang = ?2 WHERE phone = ?1",
                params![phone, lang.as_str()],
            )?;
            Ok(())
        })
        .await
    }

    /// Erase stored preferences and usage counters; the account row and
    /// consent timestamps stay.
    pub async fn reset_user_data(&self, phone: &str, free_seed: i64) -> Result<()> {
        let phone = normalize_phone(phone);
        self.call(move |conn| {
            conn.execute(
                "UPDATE users SET lang = 'auto', free_remaining = ?2 WHERE phone = ?1",
                params![phone, free_seed],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn set_plan(&self, phone: &str, plan: Plan) -> Result<()> {
        let [bare, plus] = phone_variants(phone);
        self.call(move |conn| {
            conn.execute(
                "UPDATE users SET plan = ?3 WHERE phone IN (?1, ?2)",
                params![bare, plus, plan.as_str()],
            )?;
            Ok(())
        })
        .await
    }

    /// Consume one free-tier unit, floored at zero. Paid users are
    /// untouched.
    pub async fn decrement_free(&self, phone: &str) -> Result<()> {
        let phone = normalize_phone(phone);
        self.call(move |conn| {
            conn.execute(
                "UPDATE users SET free_remaining = max(free_remaining - 1, 0) \
                 WHERE phone = ?1 AND plan = 'free'",
                params![phone],
            )?;
            Ok(())
        })
        .await
    }

    // ---- subscriptions ----

    /// Idempotent upsert keyed by the external subscription id. Absent
    /// fields never overwrite known values.
    pub async fn upsert_subscription(&self, sub: SubscriptionUpdate, now: i64) -> Result<()> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO subscriptions \
                     (subscription_id, user_phone, status, plan, renews_at, customer_id, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                 ON CONFLICT (subscription_id) DO UPDATE SET \
                     user_phone = COALESCE(excluded.user_phone, subscriptions.user_phone), \
                     status = COALESCE(excluded.status, subscriptions.status), \
                     plan = COALESCE(excluded.plan, subscriptions.plan), \
                     renews_at = COALESCE(excluded.renews_at, subscriptions.renews_at), \
                     customer_id = COALESCE(excluded.customer_id, subscriptions.customer_id), \
                     updated_at = excluded.updated_at",
                params![
                    sub.subscription_id,
                    sub.user_phone,
                    sub.status,
                    sub.plan,
                    sub.renews_at,
                    sub.customer_id,
                    now,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn subscription_user(&self, subscription_id: &str) -> Result<Option<String>> {
        let subscription_id = subscription_id.to_string();
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT user_phone FROM subscriptions WHERE subscription_id = ?1",
                    params![subscription_id],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?
                .flatten())
        })
        .await
    }

    pub async fn subscription_status(&self, subscription_id: &str) -> Result<Option<String>> {
        let subscription_id = subscription_id.to_string();
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT status FROM subscriptions WHERE subscription_id = ?1",
                    params![subscription_id],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?
                .flatten())
        })
        .await
    }

    // ---- summaries ----

    /// Record a successful summarization, keyed by the queue row that
    /// produced it. Returns false when this event already has a summary
    /// (redelivered claim), so the caller can skip the quota decrement.
    pub async fn insert_summary(
        &self,
        event_id: i64,
        phone: &str,
        input_chars: i64,
        summary: &str,
        cost_estimate: Option<f64>,
        now: i64,
    ) -> Result<bool> {
        let phone = normalize_phone(phone);
        let summary = summary.to_string();
        self.call(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO summaries (event_id, user_phone, input_chars, summary, cost_estimate, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT (event_id) DO NOTHING",
                params![event_id, phone, input_chars, summary, cost_estimate, now],
            )?;
            Ok(inserted > 0)
        })
        .await
    }

    pub async fn summary_for_event(&self, event_id: i64) -> Result<Option<String>> {
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT summary FROM summaries WHERE event_id = ?1",
                    params![event_id],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    pub async fn summary_count(&self, phone: &str) -> Result<i64> {
        let phone = normalize_phone(phone);
        self.call(move |conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM summaries WHERE user_phone = ?1",
                params![phone],
                |row| row.get(0),
            )?)
        })
        .await
    }

    /// Test/diagnostic peek at a queue row's status and error.
    pub async fn event_state(&self, id: i64) -> Result<Option<(String, i64, Option<String>)>> {
        self.call(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT status, attempts, last_error FROM events WHERE id = ?1",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?)
        })
        .await
    }
}

fn read_user(conn: &Connection, phone: &str) -> Result<Option<User>> {
    let row = conn
        .query_row(
            "SELECT phone, phone_hash, plan, status, free_remaining, privacy_notice_sent_at, \
                    tos_accepted_at, tos_version, lang, created_at \
             FROM users WHERE phone = ?1",
            params![phone],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                    row.get::<_, Option<i64>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, i64>(9)?,
                ))
            },
        )
        .optional()?;

    let Some((phone, phone_hash, plan, status, free_remaining, privacy, tos, tos_version, lang, created_at)) =
        row
    else {
        return Ok(None);
    };

    Ok(Some(User {
        phone,
        phone_hash,
        plan: Plan::parse(&plan)?,
        status: UserStatus::parse(&status)?,
        free_remaining,
        privacy_notice_sent_at: privacy,
        tos_accepted_at: tos,
        tos_version,
        lang: LangChoice::parse(&lang).unwrap_or(LangChoice::Auto),
        created_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::now_ts;

    fn test_store() -> Store {
        Store::open_in_memory(&QueueConfig::default()).unwrap()
    }

    fn chat_event(event_id: &str, text: &str) -> NewEvent {
        NewEvent {
            provider: Provider::Chat,
            provider_event_id: event_id.to_string(),
            event_type: "message".to_string(),
            payload_hash: "deadbeef".to_string(),
            sender: Some("15551230001".to_string()),
            message_type: Some("text".to_string()),
            text: Some(text.to_string()),
            detail: None,
            provider_ts: None,
        }
    }

    #[tokio::test]
    async fn claim_transitions_one_row_and_hides_it() {
        let store = test_store();
        let now = now_ts();
        assert!(store.insert_event(chat_event("m1", "hello"), now).await.unwrap());

        let claimed = store.claim_next_event(now).await.unwrap().unwrap();
        assert_eq!(claimed.provider_event_id, "m1");
        assert_eq!(claimed.provider, Provider::Chat);

        // The row is invisible while processing.
        assert!(store.claim_next_event(now).await.unwrap().is_none());

        store.mark_done(claimed.id, now).await.unwrap();
        let (status, _, _) = store.event_state(claimed.id).await.unwrap().unwrap();
        assert_eq!(status, "done");
    }

    #[tokio::test]
    async fn duplicate_provider_event_id_is_not_requeued() {
        let store = test_store();
        let now = now_ts();
        assert!(store.insert_event(chat_event("m1", "hello"), now).await.unwrap());
        assert!(!store.insert_event(chat_event("m1", "hello again"), now).await.unwrap());

        store.claim_next_event(now).await.unwrap().unwrap();
        assert!(store.claim_next_event(now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_claims_never_share_a_row() {
        let store = test_store();
        let now = now_ts();
        store.insert_event(chat_event("m1", "a"), now).await.unwrap();
        store.insert_event(chat_event("m2", "b"), now).await.unwrap();

        let (a, b) = tokio::join!(store.claim_next_event(now), store.claim_next_event(now));
        let a = a.unwrap().unwrap();
        let b = b.unwrap().unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn mark_error_reschedules_with_growing_delay() {
        let store = test_store();
        let now = now_ts();
        store.insert_event(chat_event("m1", "a"), now).await.unwrap();

        let claimed = store.claim_next_event(now).await.unwrap().unwrap();
        store.mark_error(claimed.id, "boom", now).await.unwrap();

        let (status, attempts, last_error) = store.event_state(claimed.id).await.unwrap().unwrap();
        assert_eq!(status, "error");
        assert_eq!(attempts, 1);
        assert_eq!(last_error.as_deref(), Some("boom"));

        // Not yet eligible...
        assert!(store.claim_next_event(now).await.unwrap().is_none());
        // ...but claimable once the base delay has elapsed.
        let later = now + QueueConfig::default().retry_base_seconds + 1;
        assert!(store.claim_next_event(later).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn repeated_failures_dead_letter_the_row() {
        let queue = QueueConfig {
            max_attempts: 3,
            ..QueueConfig::default()
        };
        let store = Store::open_in_memory(&queue).unwrap();
        let mut now = now_ts();
        store.insert_event(chat_event("m1", "a"), now).await.unwrap();

        let mut id = None;
        for _ in 0..3 {
            now += 100_000;
            let claimed = store.claim_next_event(now).await.unwrap().unwrap();
            id = Some(claimed.id);
            store.mark_error(claimed.id, "boom", now).await.unwrap();
        }

        let (status, attempts, _) = store.event_state(id.unwrap()).await.unwrap().unwrap();
        assert_eq!(status, "dead");
        assert_eq!(attempts, 3);
        assert!(store.claim_next_event(now + 1_000_000).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn long_error_messages_are_truncated() {
        let store = test_store();
        let now = now_ts();
        store.insert_event(chat_event("m1", "a"), now).await.unwrap();
        let claimed = store.claim_next_event(now).await.unwrap().unwrap();

        let long = "e".repeat(2000);
        store.mark_error(claimed.id, &long, now).await.unwrap();
        let (_, _, last_error) = store.event_state(claimed.id).await.unwrap().unwrap();
        assert_eq!(last_error.unwrap().chars().count(), 500);
    }

    #[tokio::test]
    async fn privacy_notice_claim_succeeds_exactly_once() {
        let store = test_store();
        let now = now_ts();
        store.get_or_create_user("15551230001", 5, now).await.unwrap();

        let (a, b) = tokio::join!(
            store.claim_privacy_notice("15551230001", now),
            store.claim_privacy_notice("+15551230001", now)
        );
        let wins = [a.unwrap(), b.unwrap()].iter().filter(|v| **v).count();
        assert_eq!(wins, 1);

        assert!(!store.claim_privacy_notice("15551230001", now).await.unwrap());
    }

    #[tokio::test]
    async fn lazily_created_user_is_seeded() {
        let store = test_store();
        let now = now_ts();
        let user = store.get_or_create_user("+15551230001", 3, now).await.unwrap();

        assert_eq!(user.phone, "15551230001");
        assert_eq!(user.plan, Plan::Free);
        assert_eq!(user.status, UserStatus::Active);
        assert_eq!(user.free_remaining, 3);
        assert_eq!(user.lang, LangChoice::Auto);
        assert_eq!(user.created_at, now);
        assert!(user.privacy_notice_sent_at.is_none());

        // A second fetch does not reseed.
        store.decrement_free("15551230001").await.unwrap();
        let again = store.get_or_create_user("15551230001", 3, now + 5).await.unwrap();
        assert_eq!(again.free_remaining, 2);
        assert_eq!(again.created_at, now);
    }

    #[tokio::test]
    async fn tos_claim_matches_identifier_variants() {
        let store = test_store();
        let now = now_ts();
        store.get_or_create_user("+15551230001", 5, now).await.unwrap();

        assert!(store.claim_tos("15551230001", "2025-06", now).await.unwrap());
        assert!(!store.claim_tos("+15551230001", "2025-06", now).await.unwrap());

        let user = store.get_user("+15551230001").await.unwrap().unwrap();
        assert_eq!(user.tos_version.as_deref(), Some("2025-06"));
    }

    #[tokio::test]
    async fn decrement_floors_at_zero_and_skips_paid() {
        let store = test_store();
        let now = now_ts();
        store.get_or_create_user("1555", 1, now).await.unwrap();

        store.decrement_free("1555").await.unwrap();
        store.decrement_free("1555").await.unwrap();
        store.decrement_free("1555").await.unwrap();
        let user = store.get_user("1555").await.unwrap().unwrap();
        assert_eq!(user.free_remaining, 0);

        store.set_plan("1555", Plan::Paid).await.unwrap();
        store.decrement_free("1555").await.unwrap();
        let user = store.get_user("1555").await.unwrap().unwrap();
        assert_eq!(user.free_remaining, 0);
        assert_eq!(user.plan, Plan::Paid);
    }

    #[tokio::test]
    async fn subscription_upsert_is_idempotent_and_preserves_fields() {
        let store = test_store();
        let now = now_ts();

        store
            .upsert_subscription(
                SubscriptionUpdate {
                    subscription_id: "sub_1".to_string(),
                    user_phone: Some("1555".to_string()),
                    status: Some("active".to_string()),
                    plan: Some("monthly".to_string()),
                    renews_at: Some("2026-09-01T00:00:00Z".to_string()),
                    customer_id: Some("cus_9".to_string()),
                },
                now,
            )
            .await
            .unwrap();

        // A later event without the user correlation keeps the stored one.
        store
            .upsert_subscription(
                SubscriptionUpdate {
                    subscription_id: "sub_1".to_string(),
                    user_phone: None,
                    status: Some("cancelled".to_string()),
                    plan: None,
                    renews_at: None,
                    customer_id: None,
                },
                now + 10,
            )
            .await
            .unwrap();

        assert_eq!(
            store.subscription_user("sub_1").await.unwrap().as_deref(),
            Some("1555")
        );
        assert_eq!(
            store.subscription_status("sub_1").await.unwrap().as_deref(),
            Some("cancelled")
        );
    }

    #[tokio::test]
    async fn reset_user_data_clears_prefs_but_keeps_consent() {
        let store = test_store();
        let now = now_ts();
        store.get_or_create_user("1555", 5, now).await.unwrap();
        store.set_user_lang("1555", LangChoice::Ar).await.unwrap();
        store.claim_privacy_notice("1555", now).await.unwrap();

        store.reset_user_data("1555", 5).await.unwrap();
        let user = store.get_user("1555").await.unwrap().unwrap();
        assert_eq!(user.lang, LangChoice::Auto);
        assert_eq!(user.free_remaining, 5);
        assert!(user.privacy_notice_sent_at.is_some());
    }
}
