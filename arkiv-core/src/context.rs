//! Process-wide wiring, owned by a context object instead of globals:
//! stores, queue backend, metrics registry, pipeline, and the shutdown
//! coordinator. Constructed at startup, dropped at shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use arkiv_config::{Config, ExecutionBackend, IdempotencyBackend};

use crate::clock::{SharedClock, SystemClock};
use crate::idempotency::{InMemoryTtlSet, RedisClaimStore, SharedClaimStore};
use crate::inflight::{TICKET_LOCK_PREFIX, TICKET_LOCK_TTL_SECONDS, TicketGuard};
use crate::metrics::Metrics;
use crate::payload::REQUEST_ID_KEY;
use crate::pipeline::{JobProcessor, Pipeline};
use crate::queue::{
    HistoryLog, QueueWorker, RedisStreams, SharedStreamBackend, enqueue_job, worker_config,
};
use crate::render::MinimalPdfRenderer;
use crate::shutdown::{DEFAULT_DRAIN_GRACE, ShutdownController};
use crate::signing::{CommandSigner, SharedSigner};
use crate::zammad::{RetryPolicy, ZammadClient};

const DELIVERY_CLAIM_PREFIX: &str = "arkiv:delivery_id:";

/// How an accepted intake was dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Durable: appended to the work stream at this id.
    Enqueued(String),
    /// In-process: a tracked background task runs the pipeline.
    Spawned,
}

pub struct AppContext {
    pub cfg: Arc<Config>,
    pub metrics: Metrics,
    pub clock: SharedClock,
    pub shutdown: ShutdownController,
    pub pipeline: Arc<Pipeline>,
    pub streams: Option<SharedStreamBackend>,
    pub history: HistoryLog,
    worker_cancel: CancellationToken,
    worker_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext").finish_non_exhaustive()
    }
}

impl AppContext {
    pub async fn new(cfg: Config) -> anyhow::Result<Arc<Self>> {
        let cfg = Arc::new(cfg);
        let clock: SharedClock = Arc::new(SystemClock);
        let metrics = Metrics::new();
        let shutdown = ShutdownController::new();

        // One pooled connection manager per configured Redis URL, shared by
        // claim stores and the stream backend.
        let redis_conn = match cfg.workflow.redis_url.as_deref() {
            Some(url) if !url.trim().is_empty() => match redis::Client::open(url) {
                Ok(client) => match redis::aio::ConnectionManager::new(client).await {
                    Ok(conn) => Some(conn),
                    Err(err) => {
                        if cfg.workflow.execution_backend == ExecutionBackend::RedisQueue {
                            return Err(err).context("redis is required for the durable queue");
                        }
                        warn!(error = %err, "redis unreachable, falling back to in-process stores");
                        None
                    }
                },
                Err(err) => {
                    return Err(err).context("invalid workflow.redis_url");
                }
            },
            _ => None,
        };

        let delivery_claims: SharedClaimStore = match (
            cfg.workflow.idempotency_backend,
            redis_conn.clone(),
        ) {
            (IdempotencyBackend::Redis, Some(conn)) if cfg.workflow.delivery_id_ttl_seconds > 0 => {
                Arc::new(RedisClaimStore::new(
                    conn,
                    DELIVERY_CLAIM_PREFIX,
                    Duration::from_secs(cfg.workflow.delivery_id_ttl_seconds),
                ))
            }
            _ => Arc::new(InMemoryTtlSet::new(Duration::from_secs(
                cfg.workflow.delivery_id_ttl_seconds,
            ))),
        };

        let ticket_lock_store: Option<SharedClaimStore> = match (
            cfg.workflow.idempotency_backend,
            redis_conn.clone(),
        ) {
            (IdempotencyBackend::Redis, Some(conn)) => Some(Arc::new(RedisClaimStore::new(
                conn,
                TICKET_LOCK_PREFIX,
                Duration::from_secs(TICKET_LOCK_TTL_SECONDS),
            ))),
            _ => None,
        };
        let ticket_guard = Arc::new(TicketGuard::new(ticket_lock_store, shutdown.flag()));

        let streams: Option<SharedStreamBackend> = redis_conn
            .map(|conn| Arc::new(RedisStreams::new(conn)) as SharedStreamBackend);

        let history = HistoryLog::new(
            streams.clone(),
            cfg.workflow.history_stream.clone(),
            cfg.workflow.history_retention_maxlen,
            clock.clone(),
        );

        let client = ZammadClient::new(
            &cfg.zammad.base_url,
            cfg.zammad.api_token.expose(),
            Duration::from_secs_f64(cfg.zammad.timeout_seconds),
            cfg.zammad.verify_tls,
            cfg.hardening.transport.trust_env,
            RetryPolicy::default(),
        )
        .context("failed to construct upstream client")?;

        let signer: Option<SharedSigner> = if cfg.signing.enabled {
            let signer =
                CommandSigner::from_config(&cfg.signing).context("invalid signing material")?;
            Some(Arc::new(signer))
        } else {
            None
        };

        let pipeline = Arc::new(Pipeline::new(
            cfg.clone(),
            Arc::new(client),
            Arc::new(MinimalPdfRenderer),
            signer,
            delivery_claims,
            ticket_guard,
            history.clone(),
            metrics.clone(),
            clock.clone(),
            shutdown.token(),
        ));

        Ok(Arc::new(Self {
            cfg,
            metrics,
            clock,
            shutdown,
            pipeline,
            streams,
            history,
            worker_cancel: CancellationToken::new(),
            worker_handle: Mutex::new(None),
        }))
    }

    /// Start the durable queue worker when configured. Idempotent.
    pub fn start_worker(self: &Arc<Self>) {
        if self.cfg.workflow.execution_backend != ExecutionBackend::RedisQueue {
            return;
        }
        let Some(backend) = self.streams.clone() else {
            warn!("durable queue configured but no stream backend available");
            return;
        };

        let mut handle = self.worker_handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let worker = QueueWorker::new(
            backend,
            self.pipeline.clone() as Arc<dyn JobProcessor>,
            self.history.clone(),
            self.metrics.clone(),
            self.clock.clone(),
            worker_config(&self.cfg.workflow),
            self.worker_cancel.clone(),
        );
        *handle = Some(tokio::spawn(worker.run()));
    }

    /// Route an accepted intake either onto the durable stream or into a
    /// tracked background task. Never waits on the pipeline.
    pub async fn dispatch(
        self: &Arc<Self>,
        delivery_id: Option<String>,
        mut payload: serde_json::Map<String, serde_json::Value>,
        request_id: Option<String>,
    ) -> anyhow::Result<Dispatch> {
        anyhow::ensure!(!self.shutdown.is_shutting_down(), "service is shutting down");

        if let Some(request_id) = request_id {
            payload.insert(REQUEST_ID_KEY.to_string(), request_id.into());
        }

        match self.cfg.workflow.execution_backend {
            ExecutionBackend::RedisQueue => {
                let backend = self
                    .streams
                    .as_ref()
                    .context("durable queue backend unavailable")?;
                let id = enqueue_job(
                    backend.as_ref(),
                    &self.cfg.workflow.queue_stream,
                    &self.metrics,
                    self.clock.as_ref(),
                    &payload,
                    delivery_id.as_deref(),
                    0,
                    0.0,
                    None,
                )
                .await?;
                Ok(Dispatch::Enqueued(id))
            }
            ExecutionBackend::Inprocess => {
                let pipeline = self.pipeline.clone();
                self.shutdown.spawn(async move {
                    let outcome = pipeline.process(delivery_id.as_deref(), &payload).await;
                    info!(outcome = outcome.status_label(), "background job finished");
                });
                Ok(Dispatch::Spawned)
            }
        }
    }

    /// Drain: stop the worker loop, wait for in-flight processing under the
    /// grace period, cancel stragglers.
    pub async fn shutdown_and_drain(&self, grace: Duration) {
        info!("shutdown started");
        self.worker_cancel.cancel();
        let handle = self.worker_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.shutdown.shutdown(grace).await;
        info!("shutdown complete");
    }

    pub async fn shutdown_default(&self) {
        self.shutdown_and_drain(DEFAULT_DRAIN_GRACE).await;
    }
}
