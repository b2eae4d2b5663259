//! The per-ticket processing pipeline: claim, fetch, gate, render, sign,
//! commit, acknowledge. A single outermost error handler classifies
//! failures, reports them to the ticket and history, and maps them onto a
//! queue-routable outcome.

mod fields;
mod outcome;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use arkiv_config::{ArticleLimitMode, Config};

pub use fields::{determine_username, parse_archive_path_segments};
pub use outcome::Outcome;

use crate::audit::{AuditAttachment, AuditRecord, compute_sha256};
use crate::classify::{
    action_hint, classify, concise_message, permanent_code_and_hint, retry_after,
};
use crate::clock::{SharedClock, format_timestamp_utc};
use crate::error::{ArchiveError, Classification};
use crate::idempotency::SharedClaimStore;
use crate::inflight::TicketGuard;
use crate::metrics::Metrics;
use crate::notes::{
    ErrorNote, SuccessNote, error_note_html, error_note_subject, success_note_html,
    success_note_subject,
};
use crate::path_policy::sanitize_segment;
use crate::payload::{extract_ticket_id, payload_request_id};
use crate::queue::{HistoryLog, HistoryStatus};
use crate::render::{RenderOptions, SharedRenderer};
use crate::signing::{SharedSigner, SigningError};
use crate::snapshot::{Snapshot, build_snapshot, enrich_attachment_content};
use crate::state::{PROCESSING_TAG, TRIGGER_TAG, apply_done, apply_error, apply_processing};
use crate::storage::{AttachmentFile, StoragePaths, build_storage_paths, commit_archive};
use crate::zammad::TicketingClient;

const APPLY_DONE_MAX_ATTEMPTS: u32 = 3;
const APPLY_ERROR_MAX_ATTEMPTS: u32 = 2;

/// What the queue worker (or an in-process dispatch task) invokes.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, delivery_id: Option<&str>, payload: &Map<String, Value>) -> Outcome;
}

pub struct Pipeline {
    cfg: Arc<Config>,
    client: Arc<dyn TicketingClient>,
    renderer: SharedRenderer,
    signer: Option<SharedSigner>,
    delivery_claims: SharedClaimStore,
    ticket_guard: Arc<TicketGuard>,
    history: HistoryLog,
    metrics: Metrics,
    clock: SharedClock,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}

#[allow(clippy::too_many_arguments)]
impl Pipeline {
    pub fn new(
        cfg: Arc<Config>,
        client: Arc<dyn TicketingClient>,
        renderer: SharedRenderer,
        signer: Option<SharedSigner>,
        delivery_claims: SharedClaimStore,
        ticket_guard: Arc<TicketGuard>,
        history: HistoryLog,
        metrics: Metrics,
        clock: SharedClock,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            client,
            renderer,
            signer,
            delivery_claims,
            ticket_guard,
            history,
            metrics,
            clock,
            cancel,
        }
    }

    pub fn ticket_guard(&self) -> &TicketGuard {
        &self.ticket_guard
    }

    fn trigger_tag(&self) -> &str {
        let configured = self.cfg.workflow.trigger_tag.trim();
        if configured.is_empty() {
            TRIGGER_TAG
        } else {
            configured
        }
    }

    fn check_cancelled(&self) -> Result<(), ArchiveError> {
        if self.cancel.is_cancelled() {
            Err(ArchiveError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn skip(
        &self,
        status: HistoryStatus,
        reason: &'static str,
        ticket_id: Option<u64>,
        delivery_id: Option<&str>,
        request_id: Option<&str>,
    ) -> Outcome {
        self.metrics.skipped_total.with_label_values(&[reason]).inc();
        self.history
            .record(status, ticket_id, None, "", delivery_id, request_id)
            .await;
        match status {
            HistoryStatus::SkippedNoTicketId => Outcome::SkippedNoTicketId,
            HistoryStatus::SkippedInFlight => Outcome::SkippedInFlight,
            HistoryStatus::SkippedIdempotency => Outcome::SkippedIdempotency,
            _ => Outcome::SkippedNotTriggered,
        }
    }

    async fn run(&self, delivery_id: Option<&str>, payload: &Map<String, Value>) -> Outcome {
        let request_id = payload_request_id(payload);
        let request_id = request_id.as_deref();

        let Some(ticket_id) = extract_ticket_id(payload) else {
            info!(?request_id, "skipping job without a resolvable ticket id");
            return self
                .skip(
                    HistoryStatus::SkippedNoTicketId,
                    "no_ticket_id",
                    None,
                    delivery_id,
                    request_id,
                )
                .await;
        };

        if !self.ticket_guard.try_acquire(ticket_id).await {
            info!(ticket_id, ?delivery_id, "ticket already in flight, skipping");
            return self
                .skip(
                    HistoryStatus::SkippedInFlight,
                    "in_flight",
                    Some(ticket_id),
                    delivery_id,
                    request_id,
                )
                .await;
        }

        let outcome = self
            .run_locked(ticket_id, delivery_id, payload, request_id)
            .await;

        // Lock release must happen on every exit path, cancellation
        // included; nothing below this point awaits on cancellable work.
        self.ticket_guard.release(ticket_id).await;
        outcome
    }

    async fn run_locked(
        &self,
        ticket_id: u64,
        delivery_id: Option<&str>,
        payload: &Map<String, Value>,
        request_id: Option<&str>,
    ) -> Outcome {
        if let Some(delivery_id_value) = delivery_id {
            match self.delivery_claims.try_claim(delivery_id_value).await {
                Ok(true) => {}
                Ok(false) => {
                    info!(ticket_id, delivery_id = delivery_id_value, "duplicate delivery, skipping");
                    return self
                        .skip(
                            HistoryStatus::SkippedIdempotency,
                            "idempotency",
                            Some(ticket_id),
                            delivery_id,
                            request_id,
                        )
                        .await;
                }
                Err(err) => {
                    // No upstream state was touched yet; surface as a
                    // transient failure so the queue redelivers.
                    warn!(ticket_id, error = %err, "delivery claim store unavailable");
                    self.metrics.failed_total.inc();
                    let message = concise_message(&err);
                    self.history
                        .record(
                            HistoryStatus::FailedTransient,
                            Some(ticket_id),
                            Some(Classification::Transient.label()),
                            &message,
                            delivery_id,
                            request_id,
                        )
                        .await;
                    return Outcome::FailedTransient {
                        message,
                        retry_after: None,
                    };
                }
            }
        }

        let total_start = Instant::now();
        match self
            .archive_ticket(ticket_id, payload, delivery_id, request_id)
            .await
        {
            Ok(ArchiveStep::Done { storage_path }) => {
                self.metrics.total_seconds.observe(total_start.elapsed().as_secs_f64());
                self.metrics.processed_total.inc();
                self.history
                    .record(
                        HistoryStatus::Processed,
                        Some(ticket_id),
                        None,
                        &storage_path,
                        delivery_id,
                        request_id,
                    )
                    .await;
                info!(ticket_id, storage_path, ?request_id, ?delivery_id, "ticket archived");
                Outcome::Processed
            }
            Ok(ArchiveStep::NotTriggered) => {
                // Not part of the end-to-end latency histogram.
                self.skip(
                    HistoryStatus::SkippedNotTriggered,
                    "not_triggered",
                    Some(ticket_id),
                    delivery_id,
                    request_id,
                )
                .await
            }
            Err(err) => {
                self.metrics.total_seconds.observe(total_start.elapsed().as_secs_f64());
                self.handle_failure(ticket_id, err, delivery_id, request_id)
                    .await
            }
        }
    }

    async fn archive_ticket(
        &self,
        ticket_id: u64,
        payload: &Map<String, Value>,
        delivery_id: Option<&str>,
        request_id: Option<&str>,
    ) -> Result<ArchiveStep, ArchiveError> {
        let trigger_tag = self.trigger_tag();
        let client = self.client.as_ref();

        let ticket = client.get_ticket(ticket_id).await?;
        let tags = client.list_tags(ticket_id).await?;

        if !crate::state::should_process(&tags, trigger_tag, self.cfg.workflow.require_tag) {
            info!(ticket_id, ?tags, "tag state does not call for processing");
            return Ok(ArchiveStep::NotTriggered);
        }

        // A cancellation before this transition leaves the ticket
        // untouched.
        self.check_cancelled()?;
        apply_processing(client, ticket_id, trigger_tag).await?;

        let custom_fields = ticket.custom_fields();
        let username = determine_username(
            &ticket,
            payload,
            &custom_fields,
            &self.cfg.fields.archive_user_mode,
            &self.cfg.fields.archive_user,
        )?;
        let segments =
            parse_archive_path_segments(custom_fields.get(&self.cfg.fields.archive_path))?;

        let now = self.clock.now_utc();
        let paths = build_storage_paths(
            &self.cfg.storage.root,
            &username,
            &segments,
            &self.cfg.storage.path_policy,
            &ticket.number,
            now.date_naive(),
        )?;

        let mut snapshot =
            build_snapshot(client, ticket_id, Some(ticket.clone()), Some(tags)).await?;

        let max_articles = self.cfg.pdf.max_articles;
        let mut truncated_from = None;
        if self.cfg.pdf.article_limit_mode == ArticleLimitMode::CapAndContinue
            && max_articles > 0
            && snapshot.articles.len() > max_articles
        {
            warn!(
                ticket_id,
                total = snapshot.articles.len(),
                cap = max_articles,
                "article cap reached, truncating"
            );
            truncated_from = Some(snapshot.articles.len());
            snapshot = snapshot.truncated(max_articles);
        }

        snapshot = enrich_attachment_content(
            snapshot,
            client,
            self.cfg.pdf.include_attachment_binary,
            self.cfg.pdf.max_attachment_bytes_per_file,
            self.cfg.pdf.max_total_attachment_bytes,
        )
        .await;

        self.check_cancelled()?;
        let render_start = Instant::now();
        let mut pdf_bytes = self.renderer.render(
            &snapshot,
            &RenderOptions {
                template_variant: self.cfg.pdf.template_variant.clone(),
                locale: self.cfg.pdf.locale.clone(),
                timezone: self.cfg.pdf.timezone.clone(),
                max_articles,
                truncated_from,
            },
        )?;
        self.metrics.render_seconds.observe(render_start.elapsed().as_secs_f64());

        let mut cert_fingerprint = None;
        if self.cfg.signing.enabled {
            self.check_cancelled()?;
            let signer = self.signer.as_ref().ok_or_else(|| {
                SigningError::MaterialMissing("signing enabled but no signer configured".into())
            })?;
            let sign_start = Instant::now();
            pdf_bytes = signer.sign(&pdf_bytes).await?;
            self.metrics.sign_seconds.observe(sign_start.elapsed().as_secs_f64());
            cert_fingerprint = signer.material_fingerprint();
        }

        let sha256_hex = compute_sha256(&pdf_bytes);
        let size_bytes = pdf_bytes.len() as u64;

        let (attachment_files, audit_attachments) =
            collect_attachment_files(&snapshot, &paths);

        let audit = AuditRecord {
            ticket_id: snapshot.ticket.id,
            ticket_number: snapshot.ticket.number.clone(),
            title: snapshot.ticket.title.clone().unwrap_or_default(),
            created_at: now,
            storage_path: paths.target_path.display().to_string(),
            sha256: sha256_hex.clone(),
            signing_enabled: self.cfg.signing.enabled,
            tsa_used: self.cfg.signing.timestamp.enabled,
            cert_fingerprint,
            attachments: audit_attachments,
        };
        let sidecar_bytes = audit.to_canonical_bytes();

        self.check_cancelled()?;
        let commit = {
            let storage_root = self.cfg.storage.root.clone();
            let paths = paths.clone();
            let fsync = self.cfg.storage.fsync;
            let pdf = pdf_bytes;
            tokio::task::spawn_blocking(move || {
                commit_archive(
                    &storage_root,
                    &paths.target_path,
                    &paths.sidecar_path,
                    &paths.attachments_dir,
                    ticket_id,
                    &pdf,
                    &sidecar_bytes,
                    &attachment_files,
                    fsync,
                )
            })
        };
        commit.await.map_err(|err| {
            ArchiveError::validation(format!("storage commit task failed: {err}"))
        })??;

        if self.cfg.workflow.acknowledge_on_success {
            let note = success_note_html(&SuccessNote {
                storage_dir: &paths.target_dir.display().to_string(),
                filename: paths.filename(),
                sidecar_path: &paths.sidecar_path.display().to_string(),
                size_bytes,
                sha256_hex: &sha256_hex,
                request_id,
                delivery_id,
                timestamp_utc: &format_timestamp_utc(now),
            });
            client
                .create_internal_article(ticket_id, &success_note_subject(), &note)
                .await?;
        }

        // A stuck Processing tag is worse than a missed Done tag, so the
        // final transition retries a little harder and never fails the run.
        let mut attempt = 0;
        loop {
            match apply_done(client, ticket_id, trigger_tag).await {
                Ok(()) => break,
                Err(err) if attempt + 1 < APPLY_DONE_MAX_ATTEMPTS => {
                    warn!(ticket_id, error = %err, attempt, "done transition failed, retrying");
                    tokio::time::sleep(Duration::from_millis(500) * 2u32.pow(attempt)).await;
                    attempt += 1;
                }
                Err(err) => {
                    error!(ticket_id, error = %err, "done transition failed after retries");
                    break;
                }
            }
        }

        Ok(ArchiveStep::Done {
            storage_path: paths.target_path.display().to_string(),
        })
    }

    async fn handle_failure(
        &self,
        ticket_id: u64,
        err: ArchiveError,
        delivery_id: Option<&str>,
        request_id: Option<&str>,
    ) -> Outcome {
        self.metrics.failed_total.inc();

        if err.is_cancelled() {
            // Shutdown: do not mutate the ticket any further.
            warn!(ticket_id, "processing cancelled by shutdown");
            return Outcome::Cancelled;
        }

        let classification = classify(&err);
        let message = concise_message(&err);
        let action = action_hint(&err, classification);
        let (code, hint) = if classification == Classification::Permanent {
            let (code, hint) = permanent_code_and_hint(&err);
            (Some(code), Some(hint))
        } else {
            (None, None)
        };

        error!(
            ticket_id,
            ?request_id,
            ?delivery_id,
            classification = classification.label(),
            code,
            error = %err,
            "ticket processing failed"
        );

        let now = self.clock.now_utc();
        let note = error_note_html(&ErrorNote {
            classification: classification.label(),
            message: &message,
            action: &action,
            code,
            hint,
            request_id,
            delivery_id,
            timestamp_utc: &format_timestamp_utc(now),
        });
        if let Err(note_err) = self
            .client
            .create_internal_article(ticket_id, &error_note_subject(), &note)
            .await
        {
            error!(ticket_id, error = %note_err, "failed to post error note");
        }

        let keep_trigger = classification == Classification::Transient;
        let trigger_tag = self.trigger_tag();
        for attempt in 0..APPLY_ERROR_MAX_ATTEMPTS {
            match apply_error(self.client.as_ref(), ticket_id, keep_trigger, trigger_tag).await {
                Ok(()) => break,
                Err(transition_err) => {
                    error!(ticket_id, error = %transition_err, attempt, "error transition failed");
                    if attempt + 1 < APPLY_ERROR_MAX_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(300)).await;
                    }
                }
            }
        }

        // Unconditional: a concurrent transition may have re-added the
        // processing tag; a ticket must never sit in Processing forever.
        if let Err(cleanup_err) = self.client.remove_tag(ticket_id, PROCESSING_TAG).await {
            error!(ticket_id, error = %cleanup_err, "processing tag cleanup failed");
        }

        let status = match classification {
            Classification::Transient => HistoryStatus::FailedTransient,
            Classification::Permanent => HistoryStatus::FailedPermanent,
        };
        self.history
            .record(
                status,
                Some(ticket_id),
                Some(classification.label()),
                &message,
                delivery_id,
                request_id,
            )
            .await;

        Outcome::failed(classification, message, retry_after(&err))
    }
}

enum ArchiveStep {
    Done { storage_path: String },
    NotTriggered,
}

fn collect_attachment_files(
    snapshot: &Snapshot,
    paths: &StoragePaths,
) -> (Vec<AttachmentFile>, Vec<AuditAttachment>) {
    let mut files = Vec::new();
    let mut audit = Vec::new();

    for article in &snapshot.articles {
        for att in &article.attachments {
            let Some(content) = &att.content else {
                continue;
            };
            let attachment_id = att.attachment_id.unwrap_or(0);
            let raw_name = format!(
                "{}_{}_{}",
                article.id,
                attachment_id,
                att.filename.as_deref().unwrap_or("bin")
            );
            let mut safe_name = sanitize_segment(&raw_name);
            if safe_name.is_empty() {
                safe_name = format!("article_{}_{attachment_id}", article.id);
            }

            audit.push(AuditAttachment {
                storage_path: paths.attachments_dir.join(&safe_name).display().to_string(),
                article_id: article.id,
                attachment_id: att.attachment_id,
                filename: att.filename.clone(),
                sha256: compute_sha256(content),
            });
            files.push(AttachmentFile {
                filename: safe_name,
                content: content.clone(),
            });
        }
    }

    (files, audit)
}

#[async_trait]
impl JobProcessor for Pipeline {
    async fn process(&self, delivery_id: Option<&str>, payload: &Map<String, Value>) -> Outcome {
        self.run(delivery_id, payload).await
    }
}

#[cfg(test)]
mod tests;
