//! Serial queue consumer.
//!
//! Claims one event at a time and drives it to a terminal transition.
//! The stop signal is only honored between units of work, so an
//! in-flight event always reaches `done` or `error` before the loop
//! exits. Claim atomicity lives in the store; additional worker
//! processes on the same database are safe.

use crate::model::now_ts;
use crate::processor::Processor;
use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct Worker {
    store: Store,
    processor: Arc<Processor>,
    idle_delay: Duration,
    busy_delay: Duration,
}

impl Worker {
    pub fn new(
        store: Store,
        processor: Arc<Processor>,
        idle_delay: Duration,
        busy_delay: Duration,
    ) -> Self {
        Self {
            store,
            processor,
            idle_delay,
            busy_delay,
        }
    }

    pub fn start(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
            tracing::info!("worker loop exited");
        })
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn run(&self, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                return;
            }

            match self.store.claim_next_event(now_ts()).await {
                Ok(Some(event)) => {
                    let event_id = event.id;
                    match self.processor.process(&event).await {
                        Ok(()) => {
                            if let Err(e) = self.store.mark_done(event_id, now_ts()).await {
                                tracing::error!(%e, event_id, "mark_done failed");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(%e, event_id, attempts = event.attempts, "event processing failed");
                            if let Err(e) = self
                                .store
                                .mark_error(event_id, &format!("{e:#}"), now_ts())
                                .await
                            {
                                tracing::error!(%e, event_id, "mark_error failed");
                            }
                        }
                    }
                    tokio::time::sleep(self.busy_delay).await;
                }
                Ok(None) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tokio::time::sleep(self.idle_delay) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(%e, "claim_next_event failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tokio::time::sleep(self.idle_delay) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecapConfig;
    use crate::model::{NewEvent, Provider};
    use recap_llm::{SummaryClient, SummaryOptions};

    fn chat_event(event_id: &str, text: &str) -> NewEvent {
        NewEvent {
            provider: Provider::Chat,
            provider_event_id: event_id.to_string(),
            event_type: "message".to_string(),
            payload_hash: "h".to_string(),
            sender: Some("1555".to_string()),
            message_type: Some("text".to_string()),
            text: Some(text.to_string()),
            detail: None,
            provider_ts: None,
        }
    }

    #[tokio::test]
    async fn drains_queue_then_stops_on_cancel() {
        let cfg = RecapConfig::default();
        let store = Store::open_in_memory(&cfg.queue).unwrap();
        let now = now_ts();
        store.insert_event(chat_event("m1", "HELP"), now).await.unwrap();
        store.insert_event(chat_event("m2", "STATUS"), now).await.unwrap();

        // No messenger configured: every event fails and is rescheduled,
        // which exercises the error path without any network.
        let summarizer = std::sync::Arc::new(SummaryClient::new(
            None,
            SummaryOptions {
                dry_run: true,
                ..SummaryOptions::default()
            },
        ));
        let processor = Arc::new(Processor::new(cfg, store.clone(), summarizer, None));

        let worker = Worker::new(
            store.clone(),
            processor,
            Duration::from_millis(20),
            Duration::from_millis(1),
        );
        let shutdown = CancellationToken::new();
        let handle = worker.start(shutdown.clone());

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let depth = store.queue_depth().await.unwrap();
        // Both rows were claimed, failed, and rescheduled with a delay;
        // none is left mid-processing.
        assert_eq!(depth.processing, 0);
        assert_eq!(depth.pending, 0);
        assert_eq!(depth.error + depth.dead + depth.done, 2);

        let (_, attempts, last_error) = store.event_state(1).await.unwrap().unwrap();
        assert!(attempts >= 1);
        assert!(last_error.unwrap().contains("not configured"));
    }
}
