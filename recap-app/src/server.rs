//! Server assembly: store boot, worker startup, HTTP router, graceful
//! shutdown.

use crate::config::RecapConfig;
use crate::processor::Processor;
use crate::routes;
use crate::store::Store;
use crate::worker::Worker;
use anyhow::Result;
use axum::Extension;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use recap_channels::{Messenger, WhatsAppCloudAdapter};
use recap_llm::{SummaryClient, SummaryOptions};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub struct GatewayState {
    pub cfg: RecapConfig,
    pub store: Store,
    pub started_at: Instant,
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = RecapConfig::load(config_path).await?;
    let store = Store::open(&cfg.db_path(), &cfg.queue)?;
    let depth = store.queue_depth().await?;
    tracing::info!(
        model = %cfg.general.model,
        bind_addr = %cfg.runtime.bind_addr,
        db_path = %cfg.db_path().display(),
        dry_run = cfg.summarizer.dry_run,
        test_mode = cfg.billing.test_mode,
        whatsapp_configured = !cfg.whatsapp.access_token.trim().is_empty(),
        billing_secret_configured = !cfg.billing.signing_secret.trim().is_empty(),
        queue_pending = depth.pending,
        queue_error = depth.error,
        queue_dead = depth.dead,
        "config ok"
    );
    Ok(())
}

pub async fn send_one_shot(
    config_path: Option<PathBuf>,
    recipient: &str,
    message: &str,
) -> Result<()> {
    let cfg = RecapConfig::load(config_path).await?;
    let adapter =
        WhatsAppCloudAdapter::new(&cfg.whatsapp.access_token, &cfg.whatsapp.phone_number_id)?;
    adapter.send_text(recipient, message).await?;
    Ok(())
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = RecapConfig::load(config_path).await?;
    let started_at = Instant::now();
    let addr: SocketAddr = cfg.runtime.bind_addr.parse()?;

    tracing::info!(
        bind_addr = %addr,
        model = %cfg.general.model,
        db_path = %cfg.db_path().display(),
        dry_run = cfg.summarizer.dry_run,
        test_mode = cfg.billing.test_mode,
        free_messages = cfg.quota.free_messages,
        queue_max_attempts = cfg.queue.max_attempts,
        summarizer_concurrency = cfg.summarizer.concurrency,
        chat_signature_enforced = !cfg.whatsapp.app_secret.trim().is_empty(),
        "server configuration loaded"
    );
    if cfg.whatsapp.app_secret.trim().is_empty() {
        tracing::warn!("whatsapp.app_secret is not set; inbound chat webhooks are accepted unverified");
    }

    let listener = preflight_bind_listener(addr).await?;

    // Store credentials are the one thing required at boot; everything
    // else surfaces lazily at first use.
    let store = Store::open(&cfg.db_path(), &cfg.queue)?;

    let summarizer = Arc::new(SummaryClient::new(
        cfg.keys.openai_api_key.clone(),
        SummaryOptions {
            model: cfg.general.model.clone(),
            max_input_chars: cfg.summarizer.max_input_chars,
            max_output_tokens: cfg.summarizer.max_output_tokens,
            max_retries: cfg.summarizer.max_retries,
            concurrency: cfg.summarizer.concurrency,
            dry_run: cfg.summarizer.dry_run,
            ..SummaryOptions::default()
        },
    ));

    let messenger: Option<Arc<dyn Messenger>> = match WhatsAppCloudAdapter::new(
        &cfg.whatsapp.access_token,
        &cfg.whatsapp.phone_number_id,
    ) {
        Ok(adapter) => Some(Arc::new(adapter)),
        Err(e) => {
            tracing::warn!(%e, "whatsapp adapter not configured; replies will fail until credentials are set");
            None
        }
    };

    let processor = Arc::new(Processor::new(
        cfg.clone(),
        store.clone(),
        summarizer,
        messenger,
    ));

    let shutdown = CancellationToken::new();
    let worker = Worker::new(
        store.clone(),
        processor,
        Duration::from_millis(cfg.queue.idle_poll_ms),
        Duration::from_millis(cfg.queue.busy_poll_ms),
    );
    let worker_handle = worker.start(shutdown.child_token());
    tracing::info!("worker started");

    let state = Arc::new(GatewayState {
        cfg: cfg.clone(),
        store,
        started_at,
    });

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = routes::router()
        .layer(Extension(state))
        .layer(GlobalConcurrencyLimitLayer::new(cfg.runtime.http_max_in_flight))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(cfg.runtime.http_timeout_seconds),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    tracing::info!(%addr, "recapd serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;
    tracing::info!("http server shutdown completed");

    shutdown.cancel();
    match worker_handle.await {
        Ok(()) => tracing::info!("worker shutdown completed"),
        Err(e) => tracing::error!(error = %e, "worker task join failed during shutdown"),
    }

    Ok(())
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("preflight bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "preflight bind check passed");
    Ok(listener)
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        } else {
            tracing::warn!("received ctrl-c; beginning graceful shutdown");
        }
    }
    shutdown.cancel();
}
