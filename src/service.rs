use crate::annotation::GeneAnnotation;
use crate::backend::ScoringBackend;
use crate::dispatch::{JobDispatcher, ScoreRequest, SubmitOutcome};
use crate::error::ServiceError;
use crate::gene_store::{GeneDataStore, DEFAULT_GENE_DATA_DIR};
use crate::reconciler::{Reconciler, ReconcilerContext, DEFAULT_WORKERS, MAX_POLLS, POLL_INTERVAL};
use crate::store::{JobStatus, ResultStore, ResultsPage, DEFAULT_STORE_DIR};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub gene_data_dir: PathBuf,
    pub store_dir: PathBuf,
    pub reconciler_workers: usize,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            gene_data_dir: PathBuf::from(DEFAULT_GENE_DATA_DIR),
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            reconciler_workers: DEFAULT_WORKERS,
            poll_interval: POLL_INTERVAL,
            max_polls: MAX_POLLS,
        }
    }
}

/// Job state as reported to polling clients. A pending record reports as
/// in-progress even when the backend itself already finished: clients must
/// keep polling until the local record reaches a terminal state, because
/// results are only retrievable once local persistence is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportedState {
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusReport {
    pub job_id: String,
    pub status: ReportedState,
    pub total_results: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The service core: every operation the transport layer exposes, minus the
/// transport itself. Dispatch returns immediately with a job identifier;
/// polling and enrichment happen on the reconciler pool.
pub struct AsoScanService {
    dispatcher: JobDispatcher,
    store: Arc<ResultStore>,
    backend: Arc<dyn ScoringBackend>,
    genes: GeneDataStore,
    reconciler: Reconciler,
}

impl AsoScanService {
    pub fn new(
        config: ServiceConfig,
        backend: Arc<dyn ScoringBackend>,
    ) -> Result<Self, ServiceError> {
        let genes = GeneDataStore::new(&config.gene_data_dir);
        let store = Arc::new(ResultStore::open(&config.store_dir)?);
        let dispatcher = JobDispatcher::new(genes.clone(), store.clone(), backend.clone());
        let reconciler = Reconciler::start(
            Arc::new(ReconcilerContext {
                genes: genes.clone(),
                store: store.clone(),
                backend: backend.clone(),
                poll_interval: config.poll_interval,
                max_polls: config.max_polls,
            }),
            config.reconciler_workers,
        );
        Ok(Self {
            dispatcher,
            store,
            backend,
            genes,
            reconciler,
        })
    }

    /// The parsed feature hierarchy for one gene.
    pub fn gene_annotation(&self, gene_name: &str) -> Result<GeneAnnotation, ServiceError> {
        self.genes.load_annotation(gene_name)
    }

    /// Cache lookup without submitting anything.
    pub fn check_cache(&self, request: &ScoreRequest) -> Result<Option<String>, ServiceError> {
        self.dispatcher.check_cache(request)
    }

    /// Submit a scoring request: returns an existing job id on a cache hit,
    /// otherwise submits to the backend and starts background reconciliation.
    pub fn submit_scoring_request(
        &self,
        request: &ScoreRequest,
    ) -> Result<SubmitOutcome, ServiceError> {
        let (outcome, fresh) = self.dispatcher.dispatch(request)?;
        if let Some(record) = fresh {
            self.reconciler.enqueue(&record.job_id);
        }
        Ok(outcome)
    }

    pub fn job_status(&self, job_id: &str) -> Result<JobStatusReport, ServiceError> {
        let record = self.store.load_record(job_id)?;
        let status = match record.status {
            JobStatus::Pending => ReportedState::InProgress,
            JobStatus::Completed => ReportedState::Completed,
            JobStatus::Failed => ReportedState::Failed,
        };
        Ok(JobStatusReport {
            job_id: record.job_id,
            status,
            total_results: record.total_results,
            error: record.failure,
        })
    }

    pub fn results_page(
        &self,
        job_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<ResultsPage, ServiceError> {
        self.store.results_page(job_id, page, page_size)
    }

    pub fn csv_export(&self, job_id: &str) -> Result<String, ServiceError> {
        self.store.csv_export(job_id)
    }

    /// Forward a cancel to the backend and delete any persisted artifacts.
    /// A reconciler already blocked in its poll loop is not interrupted; it
    /// will observe the cancellation through backend status or time out.
    pub fn cancel_job(&self, job_id: &str) -> Result<(), ServiceError> {
        self.backend.cancel(job_id)?;
        self.store.delete_job(job_id)?;
        info!("Canceled job '{job_id}'");
        Ok(())
    }

    /// Recovery sweep: re-enqueue every job still pending in the store.
    /// Run at startup so reconciliation survives process restarts.
    pub fn resume_pending(&self) -> Result<usize, ServiceError> {
        let pending = self.store.pending_job_ids()?;
        for job_id in &pending {
            self.reconciler.enqueue(job_id);
        }
        if !pending.is_empty() {
            info!("Resumed {} pending job(s)", pending.len());
        }
        Ok(pending.len())
    }
}
