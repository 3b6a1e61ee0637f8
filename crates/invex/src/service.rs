//! Transport-free pipeline facade.
//!
//! Wires config, database, message source and object store into the
//! three operator-facing operations: list candidates, dispatch
//! processing, poll status. HTTP/UI layers live outside this crate and
//! call into this facade.

use std::sync::Arc;

use crossbeam_channel::unbounded;

use crate::candidates::CandidateSelector;
use crate::config::Config;
use crate::db::Database;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::error::Result;
use crate::extract::FieldExtractorSet;
use crate::jobs::{JobProgressEvent, JobStatusReport, JobStore, ProgressBroadcaster};
use crate::processor::ProcessorRegistry;
use crate::reconcile::ReconcileEngine;
use crate::source::{MessagePreview, MessageSource};
use crate::storage::ObjectStore;
use crate::worker::{RetryPolicy, WorkerContext, WorkerPool};

pub struct PipelineService {
    config: Config,
    selector: CandidateSelector,
    dispatcher: Dispatcher,
    jobs: JobStore,
    pool: WorkerPool,
}

impl PipelineService {
    pub fn new(
        config: Config,
        db: Database,
        source: Arc<dyn MessageSource>,
        objects: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        config.validate()?;

        let jobs = JobStore::new(db.clone(), ProgressBroadcaster::default());
        let (queue_tx, queue_rx) = unbounded();

        let ctx = Arc::new(WorkerContext {
            source: Arc::clone(&source),
            objects,
            db: db.clone(),
            jobs: jobs.clone(),
            processors: ProcessorRegistry::new(
                config.ocr.enabled,
                &config.ocr.languages,
                config.ocr.dpi,
            ),
            extractors: FieldExtractorSet::new(),
            reconciler: ReconcileEngine::new(db, config.reconcile.clone()),
            retry: RetryPolicy::from_config(&config.retry),
            label_name: config.label_name.clone(),
        });
        let pool = WorkerPool::new(ctx, config.worker_count, queue_rx);

        Ok(Self {
            selector: CandidateSelector::new(source),
            dispatcher: Dispatcher::new(jobs.clone(), queue_tx),
            jobs,
            pool,
            config,
        })
    }

    /// Lists candidate previews. `filter_expression` falls back to the
    /// configured default query.
    pub fn list_candidates(
        &self,
        filter_expression: Option<&str>,
        max_count: usize,
    ) -> Result<Vec<MessagePreview>> {
        let query = filter_expression.unwrap_or(&self.config.candidate_query);
        self.selector.query(query, max_count)
    }

    /// Dispatches processing for the selected message ids.
    pub fn process(&self, message_ids: &[String], label_after: bool) -> Result<DispatchOutcome> {
        self.dispatcher.dispatch(message_ids, label_after)
    }

    /// Polls one job's status.
    pub fn status(&self, job_id: &str) -> Result<JobStatusReport> {
        Ok(self.jobs.get_status(job_id)?)
    }

    /// Live progress events, in addition to polling.
    pub fn subscribe_progress(&self) -> tokio::sync::broadcast::Receiver<JobProgressEvent> {
        self.jobs.broadcaster().subscribe()
    }

    /// Stops the workers and waits for them to exit. In-flight jobs run
    /// to completion; queued-but-unstarted items are dropped (their rows
    /// stay queued and can be re-dispatched).
    pub fn shutdown(self) {
        let PipelineService {
            dispatcher, pool, ..
        } = self;
        pool.shutdown();
        drop(dispatcher);
        pool.wait();
    }
}
