//! Event processing pipelines: one per provider.
//!
//! Chat events run consent → commands → quota → summarize → reply;
//! billing events run subscription upsert → plan reconciliation. Any
//! error returned here is caught at the worker boundary and written to
//! the row's `last_error`; the sender never sees it.

use crate::commands;
use crate::config::RecapConfig;
use crate::consent::{self, ConsentOutcome};
use crate::model::{BillingFields, ClaimedEvent, Plan, Provider, SubscriptionUpdate, User, now_ts, phone_hash};
use crate::quota::{self, PlanOutcome};
use crate::replies;
use crate::store::Store;
use anyhow::{Result, anyhow};
use recap_channels::Messenger;
use recap_llm::SummaryClient;
use std::sync::Arc;

pub struct Processor {
    cfg: RecapConfig,
    store: Store,
    summarizer: Arc<SummaryClient>,
    messenger: Option<Arc<dyn Messenger>>,
}

impl Processor {
    pub fn new(
        cfg: RecapConfig,
        store: Store,
        summarizer: Arc<SummaryClient>,
        messenger: Option<Arc<dyn Messenger>>,
    ) -> Self {
        Self {
            cfg,
            store,
            summarizer,
            messenger,
        }
    }

    #[tracing::instrument(level = "info", skip_all, fields(event_id = event.id, provider = event.provider.as_str()))]
    pub async fn process(&self, event: &ClaimedEvent) -> Result<()> {
        match event.provider {
            Provider::Chat => self.process_chat(event).await,
            Provider::Billing => self.process_billing(event).await,
        }
    }

    async fn process_chat(&self, event: &ClaimedEvent) -> Result<()> {
        let (Some(sender), Some(text)) = (event.sender.as_deref(), event.text.as_deref()) else {
            tracing::warn!(event_id = event.id, "chat event without sender or text; dropping");
            return Ok(());
        };

        tracing::debug!(
            event_id = event.id,
            message_type = event.message_type.as_deref().unwrap_or("text"),
            chars = text.chars().count(),
            "processing chat event"
        );

        let now = now_ts();
        let user = self
            .store
            .get_or_create_user(sender, self.cfg.quota.free_messages, now)
            .await?;

        // High-priority commands short-circuit the consent gate: opt-out
        // and status queries must always work.
        if let Some(command) = commands::parse(text) {
            let reply = commands::execute(&self.store, &self.cfg, &user, &command).await?;
            self.send(sender, &reply).await?;
            return Ok(());
        }

        match consent::evaluate(&self.store, &user, &self.cfg.legal.tos_version, now).await? {
            ConsentOutcome::Blocked => {
                tracing::info!(user = %user.phone_hash, "sender is opted out; dropping message");
                return Ok(());
            }
            ConsentOutcome::SendNotice => {
                self.send(sender, replies::privacy_notice(user.lang)).await?;
                return Ok(());
            }
            ConsentOutcome::NoticePending => return Ok(()),
            ConsentOutcome::Proceed => {}
        }

        self.summarize_and_reply(event, &user, sender, text).await
    }

    async fn summarize_and_reply(
        &self,
        event: &ClaimedEvent,
        user: &User,
        sender: &str,
        text: &str,
    ) -> Result<()> {
        let meaningful = quota::is_meaningful(text);

        if quota::paywalled(user.plan, user.free_remaining, meaningful) {
            let url = commands::checkout_link(&self.cfg.billing.checkout_url, sender);
            self.send(sender, &replies::paywall(user.lang, &url)).await?;
            return Ok(());
        }

        // A redelivered claim that already produced a summary resends the
        // stored text instead of calling the model or touching quota again.
        if let Some(existing) = self.store.summary_for_event(event.id).await? {
            tracing::info!(event_id = event.id, "event already summarized; resending");
            self.send(sender, &existing).await?;
            return Ok(());
        }

        let summary = self.summarizer.summarize(text).await?;
        let recorded = self
            .store
            .insert_summary(
                event.id,
                sender,
                text.chars().count() as i64,
                &summary.text,
                summary.cost_estimate,
                now_ts(),
            )
            .await?;
        if recorded && meaningful && user.plan == Plan::Free {
            self.store.decrement_free(sender).await?;
        }

        tracing::info!(
            user = %user.phone_hash,
            meaningful,
            fingerprint = %summary.fingerprint,
            cost_estimate = ?summary.cost_estimate,
            "summary produced"
        );
        self.send(sender, &summary.text).await?;
        Ok(())
    }

    async fn process_billing(&self, event: &ClaimedEvent) -> Result<()> {
        let Some(detail) = event.detail.as_deref() else {
            tracing::warn!(event_id = event.id, "billing event without detail; dropping");
            return Ok(());
        };
        let fields: BillingFields = serde_json::from_str(detail)?;
        let now = now_ts();

        // Subscription history is preserved even for no-op events.
        self.store
            .upsert_subscription(
                SubscriptionUpdate {
                    subscription_id: fields.subscription_id.clone(),
                    user_phone: fields.user_id.clone(),
                    status: fields.status.clone(),
                    plan: fields.plan.clone(),
                    renews_at: fields.renews_at.clone(),
                    customer_id: fields.customer_id.clone(),
                },
                now,
            )
            .await?;

        let outcome = quota::classify_billing_event(&event.event_type);
        let plan = match outcome {
            PlanOutcome::Paid => Plan::Paid,
            PlanOutcome::Free => Plan::Free,
            PlanOutcome::Ignore => {
                tracing::debug!(event_type = %event.event_type, "unrecognized billing event; subscription upserted only");
                return Ok(());
            }
        };

        let phone = match fields.user_id.clone() {
            Some(p) => Some(p),
            None => self.store.subscription_user(&fields.subscription_id).await?,
        };
        let Some(phone) = phone else {
            tracing::warn!(
                subscription_id = %fields.subscription_id,
                "billing event has no user correlation; plan unchanged"
            );
            return Ok(());
        };

        self.store
            .get_or_create_user(&phone, self.cfg.quota.free_messages, now)
            .await?;
        self.store.set_plan(&phone, plan).await?;
        tracing::info!(
            user = %phone_hash(&phone),
            subscription_id = %fields.subscription_id,
            plan = plan.as_str(),
            "plan reconciled from billing event"
        );
        Ok(())
    }

    async fn send(&self, recipient: &str, body: &str) -> Result<()> {
        let messenger = self
            .messenger
            .as_ref()
            .ok_or_else(|| anyhow!("whatsapp credentials are not configured; cannot send reply"))?;
        messenger.send_text(recipient, body).await
    }
}
