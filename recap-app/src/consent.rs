//! One-time legal-consent gate.
//!
//! The privacy notice must reach each user exactly once, even when
//! concurrent workers race on the same sender; the set-once claim in the
//! store is the arbiter. Terms acceptance is tracked but never blocks.

use crate::model::{User, UserStatus};
use crate::store::Store;
use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentState {
    NoNotice,
    NoticeSent,
    Compliant,
    Blocked,
}

pub fn state_of(user: &User) -> ConsentState {
    if user.status == UserStatus::Blocked {
        return ConsentState::Blocked;
    }
    if user.privacy_notice_sent_at.is_none() {
        return ConsentState::NoNotice;
    }
    if user.tos_accepted_at.is_none() {
        return ConsentState::NoticeSent;
    }
    ConsentState::Compliant
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentOutcome {
    /// Sender has opted out; stop processing, no reply.
    Blocked,
    /// This worker won the notice claim; send the notice and stop. The
    /// first inbound message never produces a summary.
    SendNotice,
    /// Another worker already claimed the notice; stop silently.
    NoticePending,
    /// Gate passed; continue down the pipeline.
    Proceed,
}

/// Evaluate the gate for one inbound message. Called after the
/// high-priority command short-circuit, so opt-out and status queries
/// never reach here.
pub async fn evaluate(
    store: &Store,
    user: &User,
    tos_version: &str,
    now: i64,
) -> Result<ConsentOutcome> {
    if user.status == UserStatus::Blocked {
        return Ok(ConsentOutcome::Blocked);
    }

    if user.privacy_notice_sent_at.is_none() {
        if store.claim_privacy_notice(&user.phone, now).await? {
            return Ok(ConsentOutcome::SendNotice);
        }
        tracing::debug!(user = %user.phone_hash, "privacy notice claim lost to a concurrent worker");
        return Ok(ConsentOutcome::NoticePending);
    }

    if user.tos_accepted_at.is_none() {
        // First qualifying message after notice delivery. A lost claim
        // degrades to implied acceptance and never blocks.
        let claimed = store.claim_tos(&user.phone, tos_version, now).await?;
        if !claimed {
            tracing::debug!(user = %user.phone_hash, "tos claim lost; proceeding with implied acceptance");
        }
    }

    Ok(ConsentOutcome::Proceed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::model::now_ts;

    fn test_store() -> Store {
        Store::open_in_memory(&QueueConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn first_message_sends_notice_and_stops() {
        let store = test_store();
        let now = now_ts();
        let user = store.get_or_create_user("1555", 5, now).await.unwrap();
        assert_eq!(state_of(&user), ConsentState::NoNotice);

        let outcome = evaluate(&store, &user, "2025-06", now).await.unwrap();
        assert_eq!(outcome, ConsentOutcome::SendNotice);

        // A second evaluation of the stale row loses the claim.
        let outcome = evaluate(&store, &user, "2025-06", now).await.unwrap();
        assert_eq!(outcome, ConsentOutcome::NoticePending);
    }

    #[tokio::test]
    async fn second_message_proceeds_and_accepts_tos() {
        let store = test_store();
        let now = now_ts();
        store.get_or_create_user("1555", 5, now).await.unwrap();
        store.claim_privacy_notice("1555", now).await.unwrap();

        let user = store.get_user("1555").await.unwrap().unwrap();
        assert_eq!(state_of(&user), ConsentState::NoticeSent);

        let outcome = evaluate(&store, &user, "2025-06", now + 60).await.unwrap();
        assert_eq!(outcome, ConsentOutcome::Proceed);

        let user = store.get_user("1555").await.unwrap().unwrap();
        assert_eq!(user.tos_accepted_at, Some(now + 60));
        assert_eq!(state_of(&user), ConsentState::Compliant);
    }

    #[tokio::test]
    async fn blocked_user_short_circuits() {
        let store = test_store();
        let now = now_ts();
        store.get_or_create_user("1555", 5, now).await.unwrap();
        store
            .set_user_status("1555", UserStatus::Blocked)
            .await
            .unwrap();

        let user = store.get_user("1555").await.unwrap().unwrap();
        let outcome = evaluate(&store, &user, "2025-06", now).await.unwrap();
        assert_eq!(outcome, ConsentOutcome::Blocked);
    }

    #[tokio::test]
    async fn racing_notice_claims_yield_one_winner() {
        let store = test_store();
        let now = now_ts();
        let user = store.get_or_create_user("15551230001", 5, now).await.unwrap();

        let (a, b) = tokio::join!(
            evaluate(&store, &user, "2025-06", now),
            evaluate(&store, &user, "2025-06", now)
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        let sends = outcomes
            .iter()
            .filter(|o| **o == ConsentOutcome::SendNotice)
            .count();
        let pendings = outcomes
            .iter()
            .filter(|o| **o == ConsentOutcome::NoticePending)
            .count();
        assert_eq!(sends, 1);
        assert_eq!(pendings, 1);
    }
}
