//! Per-job extraction pipeline.
//!
//! Milestones within one job are strictly ordered: 20 after fetch and
//! payload storage, 50 after text extraction, 80 after field extraction,
//! 100 on success. There is no ordering across jobs.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info_span, warn};

use crate::db::{invoice_repo, Database};
use crate::dispatch::WorkItem;
use crate::extract::FieldExtractorSet;
use crate::jobs::{JobError, JobStore};
use crate::model::{InvoiceRecord, JobResultPayload};
use crate::processor::ProcessorRegistry;
use crate::reconcile::ReconcileEngine;
use crate::source::{parse_message, MessageSource};
use crate::storage::{attachment_key, extraction_key, raw_message_key, ObjectStore};

use super::retry::RetryPolicy;

/// Everything a worker thread needs to process jobs. Shared read-only
/// across the pool.
pub struct WorkerContext {
    pub source: Arc<dyn MessageSource>,
    pub objects: Arc<dyn ObjectStore>,
    pub db: Database,
    pub jobs: JobStore,
    pub processors: ProcessorRegistry,
    pub extractors: FieldExtractorSet,
    pub reconciler: ReconcileEngine,
    pub retry: RetryPolicy,
    pub label_name: String,
}

/// Runs one job to a terminal state. Never panics the worker: every
/// failure lands in the job row's error message.
pub fn run_job(ctx: &WorkerContext, item: &WorkItem) {
    let _span = info_span!("extraction",
        job_id = %item.job_id,
        message_id = %item.message_id,
    )
    .entered();

    if let Err(e) = ctx.jobs.start(&item.job_id) {
        log::error!("Job {} could not start: {}", item.job_id, e);
        return;
    }

    match execute(ctx, item) {
        Ok(payload) => match ctx.jobs.complete_success(&item.job_id, &payload) {
            Ok(()) => {
                if item.label_after {
                    if let Err(e) = ctx.source.label(&item.message_id, &ctx.label_name) {
                        warn!("Failed to label message {}: {}", item.message_id, e);
                    }
                }
            }
            Err(JobError::SuccessExists(message_id)) => {
                // Lost the dispatch race: another job already holds the
                // success slot for this message. Resolve deterministically
                // by marking this job failed; its result is discarded.
                let error = format!(
                    "superseded: message {} already has a successful job",
                    message_id
                );
                warn!("Job {}: {}", item.job_id, error);
                if let Err(e) = ctx.jobs.complete_failed(&item.job_id, &error) {
                    log::error!("Job {} could not be marked superseded: {}", item.job_id, e);
                }
            }
            Err(e) => {
                log::error!("Job {} could not record success: {}", item.job_id, e);
            }
        },
        Err(error) => {
            log::warn!("Job {} failed: {}", item.job_id, error);
            if let Err(e) = ctx.jobs.complete_failed(&item.job_id, &error) {
                log::error!("Job {} could not be marked failed: {}", item.job_id, e);
            }
        }
    }
}

/// The fallible middle of the pipeline. Returns the success payload or a
/// descriptive error message for the job row.
fn execute(ctx: &WorkerContext, item: &WorkItem) -> Result<JobResultPayload, String> {
    // Step 1: fetch message and attachments, persist the raw payload.
    let fetched = {
        let _step = info_span!("fetch_message").entered();
        ctx.retry
            .run("fetch message", || ctx.source.fetch(&item.message_id))
            .map_err(|e| format!("fetch failed: {}", e))?
    };

    {
        let _step = info_span!("store_payload").entered();
        ctx.retry
            .run("store raw message", || {
                ctx.objects
                    .put(&raw_message_key(&item.message_id), &fetched.raw)
            })
            .map_err(|e| format!("storing raw message failed: {}", e))?;

        for attachment in &fetched.attachments {
            ctx.retry
                .run("store attachment", || {
                    ctx.objects.put(
                        &attachment_key(&item.message_id, &attachment.filename),
                        &attachment.content,
                    )
                })
                .map_err(|e| {
                    format!("storing attachment '{}' failed: {}", attachment.filename, e)
                })?;
        }
    }
    progress(ctx, item, 20, "Fetched message and stored payload")?;

    // Step 2: extract plain text from body and attachments.
    let parsed = parse_message(&fetched.raw).map_err(|e| format!("parse failed: {}", e))?;

    let attachment_text = {
        let _step = info_span!("extract_text").entered();
        let mut sections = Vec::new();
        for attachment in &fetched.attachments {
            if !ctx.processors.supports(&attachment.mime_type) {
                log::warn!(
                    "Skipping attachment '{}' with unsupported type {}",
                    attachment.filename,
                    attachment.mime_type
                );
                continue;
            }
            let text = ctx
                .processors
                .extract_text(&attachment.content, &attachment.mime_type)
                .map_err(|e| {
                    format!("text extraction failed for '{}': {}", attachment.filename, e)
                })?;
            sections.push(format!("--- Attachment: {} ---\n{}", attachment.filename, text));
        }
        sections.join("\n")
    };

    let header = if parsed.metadata.has_content() {
        parsed.metadata.to_header_block()
    } else {
        String::new()
    };
    let raw_text = if attachment_text.is_empty() {
        format!("{}{}", header, parsed.body_text)
    } else {
        format!("{}{}\n{}", header, parsed.body_text, attachment_text)
    };
    progress(ctx, item, 50, "Extracted document text")?;

    // Step 3: field extraction. Attachment content is authoritative when
    // present (a body greeting must not become the vendor); the date may
    // still fall back to the message body.
    let mut extracted = {
        let _step = info_span!("extract_fields").entered();
        if attachment_text.trim().is_empty() {
            ctx.extractors.extract_all(&raw_text)
        } else {
            let mut fields = ctx.extractors.extract_all(&attachment_text);
            if !fields.contains_key("date") {
                if let Some(date) = ctx.extractors.extract_named("date", &parsed.body_text) {
                    fields.insert("date".to_string(), date);
                }
            }
            fields
        }
    };
    if extracted.is_empty() {
        log::info!("Job {}: no fields extracted", item.job_id);
    }
    progress(ctx, item, 80, "Extracted invoice fields")?;

    // Step 4: persist the invoice and reconcile it.
    let mut invoice = InvoiceRecord::new(&item.message_id, raw_text, std::mem::take(&mut extracted));
    {
        let _step = info_span!("persist_and_reconcile", invoice_id = %invoice.id).entered();
        invoice_repo::insert(&ctx.db, &invoice)
            .map_err(|e| format!("persisting invoice failed: {}", e))?;

        let updated = ctx
            .reconciler
            .reconcile(&mut invoice)
            .map_err(|e| format!("reconciliation failed: {}", e))?;
        if updated {
            invoice_repo::update_reconciliation(&ctx.db, &invoice)
                .map_err(|e| format!("persisting reconciliation failed: {}", e))?;
        }

        let summary = serde_json::json!({
            "invoice_id": invoice.id,
            "message_id": item.message_id,
            "extracted": invoice.extracted,
            "extracted_at": Utc::now().to_rfc3339(),
        });
        ctx.retry
            .run("store extraction summary", || {
                ctx.objects
                    .put(&extraction_key(&invoice.id), summary.to_string().as_bytes())
            })
            .map_err(|e| format!("storing extraction summary failed: {}", e))?;
    }

    Ok(JobResultPayload::for_invoice(&invoice))
}

fn progress(ctx: &WorkerContext, item: &WorkItem, value: u8, message: &str) -> Result<(), String> {
    ctx.jobs
        .set_progress(&item.job_id, value, message)
        .map_err(|e| format!("progress update failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ReconcileConfig};
    use crate::db::{job_repo, registry_repo};
    use crate::jobs::{JobStatus, ProgressBroadcaster};
    use crate::model::{ReconciliationStatus, RegistryKind};
    use crate::source::{FetchedMessage, MessagePreview, SourceError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    const INVOICE_TEXT: &str = "ACME SUPPLIES\n\
Invoice INV-2025-123\n\
Date: 03/15/2025\n\
Total: $11,210.00\n";

    fn raw_message(attachment: Option<(&str, &str, &str)>) -> Vec<u8> {
        match attachment {
            Some((filename, mime, content)) => format!(
                "From: Billing <billing@acme.example>\r\n\
Subject: Invoice INV-2025-123\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"B\"\r\n\
\r\n\
--B\r\n\
Content-Type: text/plain\r\n\
\r\n\
Please find the invoice attached.\r\n\
--B\r\n\
Content-Type: {mime}; name=\"{filename}\"\r\n\
Content-Disposition: attachment; filename=\"{filename}\"\r\n\
\r\n\
{content}\r\n\
--B--\r\n"
            )
            .into_bytes(),
            None => b"From: a@b.example\r\nSubject: FYI\r\n\r\nNo attachments here.\r\n".to_vec(),
        }
    }

    /// In-memory source: one message, optional transient failures first.
    struct FakeSource {
        message: Vec<u8>,
        transient_failures: AtomicUsize,
        labels: Mutex<Vec<(String, String)>>,
        permanent_failure: bool,
    }

    impl FakeSource {
        fn with_message(message: Vec<u8>) -> Self {
            Self {
                message,
                transient_failures: AtomicUsize::new(0),
                labels: Mutex::new(vec![]),
                permanent_failure: false,
            }
        }

        fn flaky(message: Vec<u8>, failures: usize) -> Self {
            let source = Self::with_message(message);
            source.transient_failures.store(failures, Ordering::SeqCst);
            source
        }
    }

    impl MessageSource for FakeSource {
        fn search(&self, _query: &str, _max: usize) -> crate::source::Result<Vec<MessagePreview>> {
            Ok(vec![])
        }

        fn fetch(&self, message_id: &str) -> crate::source::Result<FetchedMessage> {
            if self.permanent_failure {
                return Err(SourceError::NotFound(message_id.to_string()));
            }
            let remaining = self.transient_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.transient_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(SourceError::Unavailable("flaky network".to_string()));
            }
            FetchedMessage::from_raw(message_id, self.message.clone())
        }

        fn label(&self, message_id: &str, label_name: &str) -> crate::source::Result<()> {
            self.labels
                .lock()
                .unwrap()
                .push((message_id.to_string(), label_name.to_string()));
            Ok(())
        }
    }

    struct Harness {
        ctx: WorkerContext,
        source: Arc<FakeSource>,
        db: Database,
        _objects_dir: TempDir,
    }

    fn harness(source: FakeSource) -> Harness {
        let db = Database::open_in_memory().unwrap();
        let objects_dir = TempDir::new().unwrap();
        let source = Arc::new(source);
        let config = Config::default();
        let ctx = WorkerContext {
            source: source.clone(),
            objects: Arc::new(crate::storage::FsObjectStore::new(objects_dir.path())),
            db: db.clone(),
            jobs: JobStore::new(db.clone(), ProgressBroadcaster::new(256)),
            processors: ProcessorRegistry::new(false, &[], 300),
            extractors: FieldExtractorSet::new(),
            reconciler: ReconcileEngine::new(db.clone(), ReconcileConfig::default()),
            retry: RetryPolicy::immediate(config.retry.max_attempts),
            label_name: config.label_name,
        };
        Harness {
            ctx,
            source,
            db,
            _objects_dir: objects_dir,
        }
    }

    fn dispatch_one(h: &Harness, message_id: &str, label_after: bool) -> WorkItem {
        let job_id = h.ctx.jobs.create_queued(message_id).unwrap();
        WorkItem {
            job_id,
            message_id: message_id.to_string(),
            label_after,
        }
    }

    #[test]
    fn test_successful_extraction_end_to_end() {
        let h = harness(FakeSource::with_message(raw_message(Some((
            "invoice.txt",
            "text/plain",
            INVOICE_TEXT,
        )))));
        registry_repo::insert(
            &h.db,
            RegistryKind::Vendor,
            "ACME Supplies Pvt Ltd",
            &["ACME Supplies"],
        )
        .unwrap();

        let item = dispatch_one(&h, "m1", false);
        run_job(&h.ctx, &item);

        let report = h.ctx.jobs.get_status(&item.job_id).unwrap();
        assert_eq!(report.status, JobStatus::Success, "{:?}", report.error_message);
        assert_eq!(report.progress, 100);

        let result = report.result.unwrap();
        assert_eq!(result.invoice_records.len(), 1);
        let record = &result.invoice_records[0];
        assert_eq!(record.vendor.as_deref(), Some("ACME Supplies Pvt Ltd"));
        assert_eq!(record.total_amount, Some(11210.0));
        assert!(result.summary_text.contains("ACME Supplies Pvt Ltd"));

        // The invoice row was reconciled to the registry entry.
        let invoices = invoice_repo::find_by_message(&h.db, "m1").unwrap();
        assert_eq!(invoices.len(), 1);
        let invoice = &invoices[0];
        assert_eq!(
            invoice.reconciliation_status,
            ReconciliationStatus::AutoMatched
        );
        assert!(invoice.normalized.vendor_id.is_some());
        assert!(
            invoice.extracted.get("invoice_number").unwrap().confidence > 0.9
        );
        assert_eq!(
            invoice.extracted.get("invoice_number").unwrap().as_str(),
            Some("INV-2025-123")
        );

        // Raw payload, attachment and extraction summary are all stored.
        assert!(h.ctx.objects.get(&raw_message_key("m1")).is_ok());
        assert!(h
            .ctx
            .objects
            .get(&attachment_key("m1", "invoice.txt"))
            .is_ok());
        assert!(h.ctx.objects.get(&extraction_key(&invoice.id)).is_ok());
    }

    #[test]
    fn test_progress_milestones_in_order() {
        let h = harness(FakeSource::with_message(raw_message(Some((
            "invoice.txt",
            "text/plain",
            INVOICE_TEXT,
        )))));

        let mut rx = h.ctx.jobs.broadcaster().subscribe();
        let item = dispatch_one(&h, "m1", false);
        run_job(&h.ctx, &item);

        let mut milestones = Vec::new();
        while let Ok(event) = rx.try_recv() {
            milestones.push(event.progress);
        }
        // Sampled progress is non-decreasing and ends at 100.
        let sorted = {
            let mut copy = milestones.clone();
            copy.sort_unstable();
            copy
        };
        assert_eq!(milestones, sorted, "progress went backwards: {:?}", milestones);
        assert_eq!(*milestones.last().unwrap(), 100);
        for expected in [20, 50, 80, 100] {
            assert!(milestones.contains(&expected), "{} missing in {:?}", expected, milestones);
        }
    }

    #[test]
    fn test_transient_fetch_failures_are_retried() {
        let h = harness(FakeSource::flaky(
            raw_message(Some(("invoice.txt", "text/plain", INVOICE_TEXT))),
            2, // fails twice, succeeds on the third of three attempts
        ));

        let item = dispatch_one(&h, "m1", false);
        run_job(&h.ctx, &item);

        let report = h.ctx.jobs.get_status(&item.job_id).unwrap();
        assert_eq!(report.status, JobStatus::Success);
    }

    #[test]
    fn test_exhausted_retries_fail_the_job() {
        let h = harness(FakeSource::flaky(
            raw_message(Some(("invoice.txt", "text/plain", INVOICE_TEXT))),
            10, // more failures than attempts
        ));

        let item = dispatch_one(&h, "m1", false);
        run_job(&h.ctx, &item);

        let report = h.ctx.jobs.get_status(&item.job_id).unwrap();
        assert_eq!(report.status, JobStatus::Failed);
        assert!(report.error_message.unwrap().contains("fetch failed"));
        assert!(report.result.is_none());
    }

    #[test]
    fn test_permanent_fetch_failure_fails_immediately() {
        let mut source = FakeSource::with_message(vec![]);
        source.permanent_failure = true;
        let h = harness(source);

        let item = dispatch_one(&h, "m1", false);
        run_job(&h.ctx, &item);

        let report = h.ctx.jobs.get_status(&item.job_id).unwrap();
        assert_eq!(report.status, JobStatus::Failed);
        assert!(report.error_message.unwrap().contains("not found"));
    }

    #[test]
    fn test_corrupt_supported_attachment_fails_job() {
        let h = harness(FakeSource::with_message(raw_message(Some((
            "invoice.pdf",
            "application/pdf",
            "this is not a pdf",
        )))));

        let item = dispatch_one(&h, "m1", false);
        run_job(&h.ctx, &item);

        let report = h.ctx.jobs.get_status(&item.job_id).unwrap();
        assert_eq!(report.status, JobStatus::Failed);
        assert!(report
            .error_message
            .unwrap()
            .contains("text extraction failed for 'invoice.pdf'"));
    }

    #[test]
    fn test_unsupported_attachment_is_skipped_not_fatal() {
        let h = harness(FakeSource::with_message(raw_message(Some((
            "data.zip",
            "application/zip",
            "PK...",
        )))));

        let item = dispatch_one(&h, "m1", false);
        run_job(&h.ctx, &item);

        // No usable attachment text: extraction runs over the body and
        // the job still succeeds.
        let report = h.ctx.jobs.get_status(&item.job_id).unwrap();
        assert_eq!(report.status, JobStatus::Success);
    }

    #[test]
    fn test_body_only_message_succeeds() {
        let h = harness(FakeSource::with_message(raw_message(None)));

        let item = dispatch_one(&h, "m1", false);
        run_job(&h.ctx, &item);

        let report = h.ctx.jobs.get_status(&item.job_id).unwrap();
        assert_eq!(report.status, JobStatus::Success);

        let invoices = invoice_repo::find_by_message(&h.db, "m1").unwrap();
        assert_eq!(invoices.len(), 1);
        assert!(invoices[0].raw_text.contains("No attachments here."));
    }

    #[test]
    fn test_label_applied_after_success() {
        let h = harness(FakeSource::with_message(raw_message(Some((
            "invoice.txt",
            "text/plain",
            INVOICE_TEXT,
        )))));

        let item = dispatch_one(&h, "m1", true);
        run_job(&h.ctx, &item);

        let labels = h.source.labels.lock().unwrap();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0], ("m1".to_string(), "processed".to_string()));
    }

    #[test]
    fn test_no_label_on_failure() {
        let h = harness(FakeSource::flaky(
            raw_message(Some(("invoice.txt", "text/plain", INVOICE_TEXT))),
            10,
        ));

        let item = dispatch_one(&h, "m1", true);
        run_job(&h.ctx, &item);

        assert!(h.source.labels.lock().unwrap().is_empty());
    }

    #[test]
    fn test_lost_success_race_is_marked_superseded() {
        let h = harness(FakeSource::with_message(raw_message(Some((
            "invoice.txt",
            "text/plain",
            INVOICE_TEXT,
        )))));

        // Two jobs raced past the dispatch-time idempotency check.
        let first = dispatch_one(&h, "m1", false);
        let second = dispatch_one(&h, "m1", false);

        run_job(&h.ctx, &first);
        run_job(&h.ctx, &second);

        let winner = h.ctx.jobs.get_status(&first.job_id).unwrap();
        assert_eq!(winner.status, JobStatus::Success);

        let loser = h.ctx.jobs.get_status(&second.job_id).unwrap();
        assert_eq!(loser.status, JobStatus::Failed);
        assert!(loser
            .error_message
            .unwrap()
            .starts_with("superseded: message m1"));
        assert!(loser.result.is_none());

        // Exactly one success row for the message id.
        assert_eq!(
            job_repo::count_by_status(&h.db, "success").unwrap(),
            1
        );
    }
}
