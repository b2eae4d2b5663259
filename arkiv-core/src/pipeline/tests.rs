use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::queue::StreamBackend;
use arkiv_config::{
    AdminConfig, ArticleLimitMode, Config, FieldsConfig, HardeningConfig, ObservabilityConfig,
    PdfConfig, SecretString, ServerConfig, SigningConfig, StorageConfig, WorkflowConfig,
    ZammadConfig,
};

use super::*;
use crate::audit::compute_sha256;
use crate::clock::{SharedClock, SystemClock};
use crate::idempotency::InMemoryTtlSet;
use crate::inflight::TicketGuard;
use crate::queue::InMemoryStreams;
use crate::render::MinimalPdfRenderer;
use crate::signing::{Signer, SigningError};
use crate::zammad::{MockTicketingClient, Ticket, UpstreamError};

fn test_config(root: &Path) -> Config {
    Config {
        server: ServerConfig::default(),
        zammad: ZammadConfig {
            base_url: Url::parse("https://zammad.example").unwrap(),
            api_token: SecretString::new("tok"),
            webhook_hmac_secret: None,
            timeout_seconds: 10.0,
            verify_tls: true,
        },
        workflow: WorkflowConfig::default(),
        fields: FieldsConfig::default(),
        storage: StorageConfig {
            root: root.to_path_buf(),
            fsync: false,
            path_policy: Default::default(),
        },
        pdf: PdfConfig::default(),
        signing: SigningConfig::default(),
        observability: ObservabilityConfig::default(),
        hardening: HardeningConfig::default(),
        admin: AdminConfig::default(),
    }
}

fn ticket_123() -> Ticket {
    serde_json::from_value(json!({
        "id": 123,
        "number": "20240123",
        "title": "Printer on fire",
        "owner": {"login": "agent"},
        "preferences": {"custom_fields": {
            "archive_user_mode": "owner",
            "archive_path": "A > B > C",
        }},
    }))
    .unwrap()
}

fn html_article() -> crate::zammad::Article {
    serde_json::from_value(json!({
        "id": 1,
        "created_at": "2024-01-23T09:00:00Z",
        "body": "<p>Everything is burning</p>",
        "content_type": "text/html",
        "from": "customer@example.com",
    }))
    .unwrap()
}

type TagLog = Arc<Mutex<Vec<String>>>;
type NoteLog = Arc<Mutex<Vec<(String, String)>>>;

/// Wire the standard happy-path expectations; tag mutations and notes are
/// captured into shared logs.
fn mock_upstream(
    ticket: Ticket,
    tags: Vec<String>,
    articles: Vec<crate::zammad::Article>,
) -> (MockTicketingClient, TagLog, NoteLog) {
    let tag_log: TagLog = Arc::new(Mutex::new(Vec::new()));
    let note_log: NoteLog = Arc::new(Mutex::new(Vec::new()));

    let mut client = MockTicketingClient::new();
    client.expect_get_ticket().returning(move |_| Ok(ticket.clone()));
    client.expect_list_tags().returning(move |_| Ok(tags.clone()));
    client
        .expect_list_articles()
        .returning(move |_| Ok(articles.clone()));

    let log = tag_log.clone();
    client.expect_add_tag().returning(move |_, tag| {
        log.lock().unwrap().push(format!("add:{tag}"));
        Ok(())
    });
    let log = tag_log.clone();
    client.expect_remove_tag().returning(move |_, tag| {
        log.lock().unwrap().push(format!("remove:{tag}"));
        Ok(())
    });
    let notes = note_log.clone();
    client
        .expect_create_internal_article()
        .returning(move |_, subject, body| {
            notes.lock().unwrap().push((subject.to_string(), body.to_string()));
            Ok(())
        });

    (client, tag_log, note_log)
}

struct Env {
    pipeline: Pipeline,
    backend: Arc<InMemoryStreams>,
    metrics: Metrics,
    _root: tempfile::TempDir,
    root_path: std::path::PathBuf,
}

fn build_env(cfg_mutate: impl FnOnce(&mut Config), client: MockTicketingClient) -> Env {
    build_env_with(cfg_mutate, client, None, CancellationToken::new())
}

fn build_env_with(
    cfg_mutate: impl FnOnce(&mut Config),
    client: MockTicketingClient,
    signer: Option<Arc<dyn Signer>>,
    cancel: CancellationToken,
) -> Env {
    let root = tempfile::tempdir().unwrap();
    let root_path = root.path().to_path_buf();
    let mut cfg = test_config(root.path());
    cfg_mutate(&mut cfg);

    let backend = Arc::new(InMemoryStreams::new());
    let clock: SharedClock = Arc::new(SystemClock);
    let metrics = Metrics::new();
    let history = crate::queue::HistoryLog::new(
        Some(backend.clone()),
        "hist",
        1000,
        clock.clone(),
    );

    let pipeline = Pipeline::new(
        Arc::new(cfg),
        Arc::new(client),
        Arc::new(MinimalPdfRenderer),
        signer,
        Arc::new(InMemoryTtlSet::new(Duration::from_secs(3600))),
        Arc::new(TicketGuard::new(None, Arc::new(AtomicBool::new(false)))),
        history,
        metrics.clone(),
        clock,
        cancel,
    );

    Env {
        pipeline,
        backend,
        metrics,
        _root: root,
        root_path,
    }
}

fn payload_123() -> Map<String, Value> {
    json!({"ticket": {"id": 123}}).as_object().unwrap().clone()
}

fn expected_pdf_path(root: &Path) -> std::path::PathBuf {
    let date = Utc::now().date_naive().format("%Y-%m-%d");
    root.join("agent")
        .join("A")
        .join("B")
        .join("C")
        .join(format!("Ticket-20240123_{date}.pdf"))
}

async fn last_history_status(backend: &InMemoryStreams) -> Option<String> {
    backend
        .revrange_head("hist", 1)
        .await
        .unwrap()
        .first()
        .and_then(|entry| entry.field("status").map(str::to_string))
}

#[tokio::test]
async fn happy_path_archives_pdf_sidecar_and_transitions() {
    let (client, tag_log, note_log) = mock_upstream(
        ticket_123(),
        vec!["pdf:sign".into()],
        vec![html_article()],
    );
    let env = build_env(|_| {}, client);

    let outcome = env
        .pipeline
        .process(Some("d-1"), &payload_123())
        .await;
    assert_eq!(outcome, Outcome::Processed);

    // The PDF landed at the policy-derived path and is a real PDF.
    let pdf_path = expected_pdf_path(&env.root_path);
    let pdf_bytes = std::fs::read(&pdf_path).unwrap();
    assert!(pdf_bytes.starts_with(b"%PDF"));

    // Sidecar exists and its sha256 matches the bytes on disk.
    let sidecar_path = pdf_path.with_file_name(format!(
        "{}.json",
        pdf_path.file_name().unwrap().to_str().unwrap()
    ));
    let sidecar: Value =
        serde_json::from_slice(&std::fs::read(&sidecar_path).unwrap()).unwrap();
    assert_eq!(sidecar["sha256"], compute_sha256(&pdf_bytes));
    assert_eq!(sidecar["ticket_id"], 123);
    assert_eq!(sidecar["signing"]["enabled"], false);

    // Tag transitions in the documented order.
    let tags = tag_log.lock().unwrap().clone();
    assert_eq!(
        tags,
        vec![
            "remove:pdf:signed",
            "remove:pdf:error",
            "remove:pdf:sign",
            "add:pdf:processing",
            "remove:pdf:processing",
            "remove:pdf:error",
            "remove:pdf:sign",
            "add:pdf:signed",
        ]
    );

    // One success note carrying sha256 and storage path.
    let notes = note_log.lock().unwrap().clone();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].0.starts_with("PDF archived"));
    assert!(notes[0].1.contains(&compute_sha256(&pdf_bytes)));
    assert!(notes[0].1.contains("agent/A/B/C"));

    assert_eq!(env.metrics.processed_total.get(), 1);
    assert_eq!(last_history_status(&env.backend).await.as_deref(), Some("processed"));
}

#[tokio::test]
async fn duplicate_delivery_is_skipped_without_refetch() {
    let (client, _tags, _notes) = mock_upstream(
        ticket_123(),
        vec!["pdf:sign".into()],
        vec![html_article()],
    );
    let env = build_env(|_| {}, client);

    let first = env.pipeline.process(Some("d-1"), &payload_123()).await;
    assert_eq!(first, Outcome::Processed);

    let pdf_path = expected_pdf_path(&env.root_path);
    let mtime = std::fs::metadata(&pdf_path).unwrap().modified().unwrap();

    let second = env.pipeline.process(Some("d-1"), &payload_123()).await;
    assert_eq!(second, Outcome::SkippedIdempotency);

    // No second archive was written.
    assert_eq!(std::fs::metadata(&pdf_path).unwrap().modified().unwrap(), mtime);
    assert_eq!(
        env.metrics.skipped_total.with_label_values(&["idempotency"]).get(),
        1
    );
}

#[tokio::test]
async fn in_flight_ticket_is_skipped() {
    let (client, _tags, _notes) = mock_upstream(
        ticket_123(),
        vec!["pdf:sign".into()],
        vec![html_article()],
    );
    let env = build_env(|_| {}, client);

    // Simulate a concurrent run holding the per-ticket lock.
    assert!(env.pipeline.ticket_guard().try_acquire(123).await);
    let outcome = env.pipeline.process(None, &payload_123()).await;
    assert_eq!(outcome, Outcome::SkippedInFlight);
    assert_eq!(
        env.metrics.skipped_total.with_label_values(&["in_flight"]).get(),
        1
    );
    env.pipeline.ticket_guard().release(123).await;
}

#[tokio::test]
async fn missing_ticket_id_is_skipped() {
    let (client, _tags, _notes) = mock_upstream(ticket_123(), vec![], vec![]);
    let env = build_env(|_| {}, client);

    let payload = json!({"event": "noise"}).as_object().unwrap().clone();
    let outcome = env.pipeline.process(None, &payload).await;
    assert_eq!(outcome, Outcome::SkippedNoTicketId);
    assert_eq!(
        last_history_status(&env.backend).await.as_deref(),
        Some("skipped_no_ticket_id")
    );
}

#[tokio::test]
async fn done_tag_blocks_processing() {
    let (client, tag_log, _notes) = mock_upstream(
        ticket_123(),
        vec!["pdf:signed".into(), "pdf:sign".into()],
        vec![html_article()],
    );
    let env = build_env(|_| {}, client);

    let outcome = env.pipeline.process(None, &payload_123()).await;
    assert_eq!(outcome, Outcome::SkippedNotTriggered);
    assert!(tag_log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn transient_upstream_failure_keeps_trigger() {
    let mut client = MockTicketingClient::new();
    client.expect_get_ticket().returning(|_| {
        Err(UpstreamError::Server {
            status: Some(500),
            message: "Zammad server error (status=500) after 4 attempts".into(),
        })
    });
    let tag_log: TagLog = Arc::new(Mutex::new(Vec::new()));
    let log = tag_log.clone();
    client.expect_add_tag().returning(move |_, tag| {
        log.lock().unwrap().push(format!("add:{tag}"));
        Ok(())
    });
    let log = tag_log.clone();
    client.expect_remove_tag().returning(move |_, tag| {
        log.lock().unwrap().push(format!("remove:{tag}"));
        Ok(())
    });
    let note_log: NoteLog = Arc::new(Mutex::new(Vec::new()));
    let notes = note_log.clone();
    client
        .expect_create_internal_article()
        .returning(move |_, subject, body| {
            notes.lock().unwrap().push((subject.to_string(), body.to_string()));
            Ok(())
        });

    let env = build_env(|_| {}, client);
    let outcome = env.pipeline.process(Some("d-3"), &payload_123()).await;
    assert!(matches!(outcome, Outcome::FailedTransient { .. }));

    // Error transition keeps the trigger tag; processing tag is cleaned up.
    let tags = tag_log.lock().unwrap().clone();
    assert!(tags.contains(&"add:pdf:sign".to_string()));
    assert!(tags.contains(&"add:pdf:error".to_string()));
    assert!(!tags.contains(&"add:pdf:processing".to_string()));

    let notes = note_log.lock().unwrap().clone();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].0.starts_with("PDF archiver error"));
    assert!(notes[0].1.contains("Transient"));

    // No file was written.
    assert!(!expected_pdf_path(&env.root_path).exists());
    assert_eq!(env.metrics.failed_total.get(), 1);
    assert_eq!(
        last_history_status(&env.backend).await.as_deref(),
        Some("failed_transient")
    );
}

#[tokio::test]
async fn path_validation_failure_is_permanent_with_code() {
    let ticket: Ticket = serde_json::from_value(json!({
        "id": 123,
        "number": "20240123",
        "owner": {"login": "agent"},
        "preferences": {"custom_fields": {
            "archive_user_mode": "owner",
            "archive_path": ["A", "..", "C"],
        }},
    }))
    .unwrap();
    let (client, tag_log, note_log) =
        mock_upstream(ticket, vec!["pdf:sign".into()], vec![html_article()]);
    let env = build_env(|_| {}, client);

    let outcome = env.pipeline.process(None, &payload_123()).await;
    assert!(matches!(outcome, Outcome::FailedPermanent { .. }));

    // Permanent failures drop the trigger tag.
    let tags = tag_log.lock().unwrap().clone();
    assert!(tags.contains(&"add:pdf:error".to_string()));
    let trigger_removals = tags.iter().filter(|t| *t == "remove:pdf:sign").count();
    assert!(trigger_removals >= 2); // apply_processing + apply_error
    assert!(!tags.contains(&"add:pdf:sign".to_string()));

    let notes = note_log.lock().unwrap().clone();
    assert!(notes[0].1.contains("path_validation"));
    assert!(notes[0].1.contains("Permanent"));

    assert!(!expected_pdf_path(&env.root_path).exists());
    assert_eq!(
        last_history_status(&env.backend).await.as_deref(),
        Some("failed_permanent")
    );
}

#[tokio::test]
async fn article_cap_in_fail_mode_is_permanent() {
    let (client, _tags, note_log) = mock_upstream(
        ticket_123(),
        vec!["pdf:sign".into()],
        vec![html_article(), {
            let mut second = html_article();
            second.id = 2;
            second
        }],
    );
    let env = build_env(
        |cfg| {
            cfg.pdf.max_articles = 1;
            cfg.pdf.article_limit_mode = ArticleLimitMode::Fail;
        },
        client,
    );

    let outcome = env.pipeline.process(None, &payload_123()).await;
    match outcome {
        Outcome::FailedPermanent { message } => {
            assert!(message.contains("too many articles"), "{message}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let notes = note_log.lock().unwrap().clone();
    assert!(notes[0].1.contains("too many articles"));
    assert!(!expected_pdf_path(&env.root_path).exists());
}

#[tokio::test]
async fn article_cap_and_continue_truncates_with_notice() {
    let (client, _tags, _notes) = mock_upstream(
        ticket_123(),
        vec!["pdf:sign".into()],
        vec![html_article(), {
            let mut second = html_article();
            second.id = 2;
            second
        }],
    );
    let env = build_env(
        |cfg| {
            cfg.pdf.max_articles = 1;
            cfg.pdf.article_limit_mode = ArticleLimitMode::CapAndContinue;
        },
        client,
    );

    let outcome = env.pipeline.process(None, &payload_123()).await;
    assert_eq!(outcome, Outcome::Processed);

    let pdf = std::fs::read(expected_pdf_path(&env.root_path)).unwrap();
    let text = String::from_utf8_lossy(&pdf);
    assert!(text.contains("showing 1 of 2 articles"));
}

struct RecordingSigner {
    calls: Arc<Mutex<u32>>,
}

#[async_trait::async_trait]
impl Signer for RecordingSigner {
    async fn sign(&self, pdf: &[u8]) -> Result<Vec<u8>, SigningError> {
        *self.calls.lock().unwrap() += 1;
        let mut signed = pdf.to_vec();
        signed.extend_from_slice(b"\n%signature-block\n");
        Ok(signed)
    }

    fn material_fingerprint(&self) -> Option<String> {
        Some("aa".repeat(32))
    }
}

#[tokio::test]
async fn signing_path_records_fingerprint_and_signed_digest() {
    let (client, _tags, _notes) = mock_upstream(
        ticket_123(),
        vec!["pdf:sign".into()],
        vec![html_article()],
    );
    let calls = Arc::new(Mutex::new(0));
    let signer: Arc<dyn Signer> = Arc::new(RecordingSigner { calls: calls.clone() });

    let env = build_env_with(
        |cfg| cfg.signing.enabled = true,
        client,
        Some(signer),
        CancellationToken::new(),
    );

    let outcome = env.pipeline.process(None, &payload_123()).await;
    assert_eq!(outcome, Outcome::Processed);
    assert_eq!(*calls.lock().unwrap(), 1);

    let pdf_path = expected_pdf_path(&env.root_path);
    let pdf_bytes = std::fs::read(&pdf_path).unwrap();
    assert!(pdf_bytes.ends_with(b"%signature-block\n"));

    let sidecar_path = pdf_path.with_file_name(format!(
        "{}.json",
        pdf_path.file_name().unwrap().to_str().unwrap()
    ));
    let sidecar: Value =
        serde_json::from_slice(&std::fs::read(sidecar_path).unwrap()).unwrap();
    // Digest covers the bytes actually stored, i.e. the signed PDF.
    assert_eq!(sidecar["sha256"], compute_sha256(&pdf_bytes));
    assert_eq!(sidecar["signing"]["enabled"], true);
    assert_eq!(sidecar["signing"]["cert_fingerprint"], "aa".repeat(32));
}

#[tokio::test]
async fn tsa_failure_is_transient_and_keeps_trigger() {
    let (client, tag_log, _notes) = mock_upstream(
        ticket_123(),
        vec!["pdf:sign".into()],
        vec![html_article()],
    );

    struct TsaDownSigner;
    #[async_trait::async_trait]
    impl Signer for TsaDownSigner {
        async fn sign(&self, _pdf: &[u8]) -> Result<Vec<u8>, SigningError> {
            Err(SigningError::TsaUnreachable("connect timeout".into()))
        }
        fn material_fingerprint(&self) -> Option<String> {
            None
        }
    }

    let env = build_env_with(
        |cfg| cfg.signing.enabled = true,
        client,
        Some(Arc::new(TsaDownSigner)),
        CancellationToken::new(),
    );

    let outcome = env.pipeline.process(None, &payload_123()).await;
    assert!(matches!(outcome, Outcome::FailedTransient { .. }));
    assert!(tag_log.lock().unwrap().contains(&"add:pdf:sign".to_string()));
    assert!(!expected_pdf_path(&env.root_path).exists());
}

#[tokio::test]
async fn cancellation_before_processing_leaves_ticket_untouched() {
    // Only fetch expectations: any tag/note call would fail the mock.
    let mut client = MockTicketingClient::new();
    let ticket = ticket_123();
    client.expect_get_ticket().returning(move |_| Ok(ticket.clone()));
    client
        .expect_list_tags()
        .returning(|_| Ok(vec!["pdf:sign".into()]));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let env = build_env_with(|_| {}, client, None, cancel);

    let outcome = env.pipeline.process(None, &payload_123()).await;
    assert_eq!(outcome, Outcome::Cancelled);
    assert!(!env.pipeline.ticket_guard().is_in_flight(123));
}

#[tokio::test]
async fn attachments_are_committed_and_audited() {
    let ticket = ticket_123();
    let mut article = html_article();
    article.attachments = Some(vec![crate::zammad::ArticleAttachment {
        id: Some(7),
        filename: Some("scan one.png".into()),
        size: Some(3),
        preferences: None,
        content_type: Some("image/png".into()),
    }]);

    let (mut client, _tags, _notes) = {
        let tag_log: TagLog = Arc::new(Mutex::new(Vec::new()));
        let note_log: NoteLog = Arc::new(Mutex::new(Vec::new()));
        let mut client = MockTicketingClient::new();
        let t = ticket.clone();
        client.expect_get_ticket().returning(move |_| Ok(t.clone()));
        client
            .expect_list_tags()
            .returning(|_| Ok(vec!["pdf:sign".into()]));
        let a = article.clone();
        client
            .expect_list_articles()
            .returning(move |_| Ok(vec![a.clone()]));
        let log = tag_log.clone();
        client.expect_add_tag().returning(move |_, tag| {
            log.lock().unwrap().push(format!("add:{tag}"));
            Ok(())
        });
        let log = tag_log.clone();
        client.expect_remove_tag().returning(move |_, tag| {
            log.lock().unwrap().push(format!("remove:{tag}"));
            Ok(())
        });
        let notes = note_log.clone();
        client
            .expect_create_internal_article()
            .returning(move |_, subject, body| {
                notes.lock().unwrap().push((subject.to_string(), body.to_string()));
                Ok(())
            });
        (client, tag_log, note_log)
    };
    client
        .expect_get_attachment_content()
        .returning(|_, _, _| Ok(vec![1, 2, 3]));

    let env = build_env(
        |cfg| {
            cfg.pdf.include_attachment_binary = true;
        },
        client,
    );

    let outcome = env.pipeline.process(None, &payload_123()).await;
    assert_eq!(outcome, Outcome::Processed);

    let pdf_path = expected_pdf_path(&env.root_path);
    let attachment_path = pdf_path.parent().unwrap().join("attachments").join("1_7_scan_one.png");
    assert_eq!(std::fs::read(&attachment_path).unwrap(), vec![1, 2, 3]);

    let sidecar_path = pdf_path.with_file_name(format!(
        "{}.json",
        pdf_path.file_name().unwrap().to_str().unwrap()
    ));
    let sidecar: Value =
        serde_json::from_slice(&std::fs::read(sidecar_path).unwrap()).unwrap();
    assert_eq!(sidecar["attachments"][0]["article_id"], 1);
    assert_eq!(sidecar["attachments"][0]["attachment_id"], 7);
    assert_eq!(
        sidecar["attachments"][0]["sha256"],
        compute_sha256(&[1, 2, 3])
    );
}
