use crate::backoff::RetryPolicy;
use crate::error::{Result, SummarizeError};
use crate::openai::OpenAiClient;
use crate::pricing;
use crate::types::Summary;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::Semaphore;

const SYSTEM_INSTRUCTION: &str = "Summarize the user's text in 1-2 plain sentences. \
Use simple language. Do not use markdown, lists, or headings.";

const DRY_RUN_PLACEHOLDER: &str = "[dry-run] summary unavailable (no model call was made)";

#[derive(Clone, Debug)]
pub struct SummaryOptions {
    pub model: String,
    pub max_input_chars: usize,
    pub max_output_tokens: u32,
    /// Extra attempts after the first; total calls never exceed this + 1.
    pub max_retries: u32,
    /// Permits on the shared concurrency gate.
    pub concurrency: usize,
    pub dry_run: bool,
    pub backoff: RetryPolicy,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_input_chars: 6000,
            max_output_tokens: 200,
            max_retries: 2,
            concurrency: 1,
            dry_run: false,
            backoff: RetryPolicy::default(),
        }
    }
}

/// Concurrency-limited, retrying wrapper around the summarization model.
///
/// The gate is owned here and constructed exactly once; clones of the
/// client share it, bounding aggregate external-call concurrency no
/// matter how many callers hold a handle.
#[derive(Clone)]
pub struct SummaryClient {
    http: reqwest::Client,
    api_key: Option<String>,
    opts: SummaryOptions,
    limiter: Arc<Semaphore>,
}

impl SummaryClient {
    pub fn new(api_key: Option<String>, opts: SummaryOptions) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(%e, "reqwest client build failed; falling back to default client");
                reqwest::Client::new()
            });
        let limiter = Arc::new(Semaphore::new(opts.concurrency.max(1)));
        Self {
            http,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            opts,
            limiter,
        }
    }

    pub fn model(&self) -> &str {
        &self.opts.model
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %self.opts.model))]
    pub async fn summarize(&self, text: &str) -> Result<Summary> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(SummarizeError::InvalidInput("text is empty".to_string()));
        }
        let clipped = clip_chars(trimmed, self.opts.max_input_chars);
        let fingerprint = fingerprint(&self.opts.model, &clipped);

        if self.opts.dry_run {
            tracing::info!(fingerprint = %fingerprint, "dry-run summarization, skipping model call");
            return Ok(Summary {
                text: DRY_RUN_PLACEHOLDER.to_string(),
                usage: None,
                cost_estimate: None,
                fingerprint,
            });
        }

        let api_key = self.api_key.as_deref().ok_or(SummarizeError::MissingApiKey)?;
        let api = OpenAiClient::new(self.http.clone(), api_key, &self.opts.model);

        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| SummarizeError::Server("concurrency gate closed".to_string()))?;

        let completion = with_retries(self.opts.max_retries, &self.opts.backoff, || {
            api.complete(SYSTEM_INSTRUCTION, &clipped, self.opts.max_output_tokens)
        })
        .await?;

        let cost_estimate = match &completion.usage {
            Some(usage) => pricing::estimate_from_usage(&self.opts.model, usage),
            None => pricing::estimate_from_chars(
                &self.opts.model,
                clipped.chars().count(),
                completion.text.chars().count(),
            ),
        };

        Ok(Summary {
            text: completion.text,
            usage: completion.usage,
            cost_estimate,
            fingerprint,
        })
    }
}

/// Run `op` up to `max_retries + 1` times, sleeping the policy's delay
/// between retryable failures. Non-retryable errors propagate
/// immediately.
async fn with_retries<T, F, Fut>(
    max_retries: u32,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                attempt += 1;
                let delay = policy.next_delay(attempt);
                tracing::warn!(
                    %e,
                    attempt,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "summarization attempt failed; backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Clip at a char boundary before the input ever leaves the process.
fn clip_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.chars().take(max_chars).collect()
}

fn fingerprint(model: &str, clipped_input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update(b"\n");
    hasher.update(clipped_input.as_bytes());
    hex::encode(hasher.finalize())
}
