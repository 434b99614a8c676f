use crate::backend::{BackendJobState, BackendOutput, ScoringBackend};
use crate::chemistry::encode_chemistry;
use crate::enrichment::{enrich_candidates, EnrichmentContext};
use crate::error::{ErrorCode, ServiceError};
use crate::gene_store::GeneDataStore;
use crate::sequence::resolve_transcript_sequence;
use crate::store::{JobRecord, JobStatus, ResultStore};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// 720 polls at the 5 second cadence is a one hour ceiling.
pub const MAX_POLLS: u32 = 720;
pub const DEFAULT_WORKERS: usize = 4;

/// Shared dependencies for reconciling jobs. Everything is rebuilt from the
/// durable stores, so a reconciliation can resume after a process restart
/// from nothing but the persisted record.
pub struct ReconcilerContext {
    pub genes: GeneDataStore,
    pub store: Arc<ResultStore>,
    pub backend: Arc<dyn ScoringBackend>,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

/// Supervised pool of reconciliation workers. Job ids are queued on a
/// channel and consumed by a fixed number of threads, bounding how many
/// backend jobs are polled concurrently. Workers outlive the client
/// connection that submitted the job.
pub struct Reconciler {
    sender: Sender<String>,
    workers: Vec<JoinHandle<()>>,
}

impl Reconciler {
    pub fn start(context: Arc<ReconcilerContext>, worker_count: usize) -> Self {
        let (sender, receiver) = channel::<String>();
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..worker_count.max(1))
            .map(|worker| {
                let context = context.clone();
                let receiver = receiver.clone();
                thread::spawn(move || worker_loop(worker, context, receiver))
            })
            .collect();
        Self { sender, workers }
    }

    /// Queue a job for reconciliation. Returns immediately.
    pub fn enqueue(&self, job_id: &str) {
        if self.sender.send(job_id.to_string()).is_err() {
            error!("Reconciler workers are gone; job '{job_id}' stays pending");
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

fn worker_loop(worker: usize, context: Arc<ReconcilerContext>, receiver: Arc<Mutex<Receiver<String>>>) {
    loop {
        let job_id = {
            let receiver = receiver.lock().unwrap();
            receiver.recv()
        };
        let Ok(job_id) = job_id else {
            // Channel closed; the pool is shutting down.
            return;
        };
        match reconcile_job(&context, &job_id) {
            Ok(status) => info!("Worker {worker}: job '{job_id}' reached {status:?}"),
            Err(e) => error!("Worker {worker}: job '{job_id}' could not be reconciled: {e}"),
        }
    }
}

/// Drive one job from pending to a terminal state: poll the backend until it
/// reports completion or failure, enrich and persist the results, and update
/// the record. Terminal records are left untouched.
pub fn reconcile_job(
    context: &ReconcilerContext,
    job_id: &str,
) -> Result<JobStatus, ServiceError> {
    let record = context.store.load_record(job_id)?;
    if record.status != JobStatus::Pending {
        return Ok(record.status);
    }

    match poll_until_terminal(context, job_id) {
        Ok(output) => match finalize(context, &record, &output) {
            Ok(total) => {
                info!("Job '{job_id}' completed with {total} results");
                Ok(JobStatus::Completed)
            }
            Err(e) => mark_failed(context, record, e),
        },
        Err(e) => mark_failed(context, record, e),
    }
}

fn poll_until_terminal(
    context: &ReconcilerContext,
    job_id: &str,
) -> Result<BackendOutput, ServiceError> {
    for _ in 0..context.max_polls {
        let status = context.backend.status(job_id)?;
        match status.state {
            BackendJobState::Completed => {
                return status.output.ok_or_else(|| {
                    ServiceError::upstream(format!(
                        "Backend reported job '{job_id}' completed without output"
                    ))
                });
            }
            BackendJobState::Failed => {
                return Err(ServiceError::upstream(
                    status
                        .error
                        .unwrap_or_else(|| format!("Backend reported job '{job_id}' failed")),
                ));
            }
            BackendJobState::Queued | BackendJobState::InProgress => {
                thread::sleep(context.poll_interval);
            }
        }
    }
    Err(ServiceError::timeout(format!(
        "Job '{job_id}' reached no terminal state after {} polls",
        context.max_polls
    )))
}

/// Rebuild the gene context from the durable stores, enrich the output and
/// persist everything. The record flips to completed only after the results
/// are on disk, so status polls never observe a completed job without
/// retrievable results.
fn finalize(
    context: &ReconcilerContext,
    record: &JobRecord,
    output: &BackendOutput,
) -> Result<usize, ServiceError> {
    let annotation = context.genes.load_annotation(&record.gene_name_requested)?;
    let raw_sequence = context.genes.load_sequence(&record.gene_name_requested)?;
    let resolved = resolve_transcript_sequence(
        &annotation,
        &record.gene_name_requested,
        &record.transcript_id,
        &raw_sequence,
    )?;
    let chemistry = encode_chemistry(&record.sugar, &record.backbone);

    let candidates = enrich_candidates(
        &output.positions,
        &output.scores,
        &EnrichmentContext {
            gene: &resolved.gene,
            transcript: &resolved.transcript,
            target: &resolved.sequence,
            oligo_length: chemistry.oligo_length(),
        },
    )?;

    context.store.write_results(&record.job_id, &candidates)?;

    let mut updated = record.clone();
    updated.status = JobStatus::Completed;
    updated.total_results = candidates.len();
    context.store.save_record(&updated)?;
    Ok(candidates.len())
}

fn mark_failed(
    context: &ReconcilerContext,
    record: JobRecord,
    cause: ServiceError,
) -> Result<JobStatus, ServiceError> {
    // A cancel may have deleted the record while we were polling; a failed
    // marker must not resurrect it.
    match context.store.load_record(&record.job_id) {
        Err(e) if e.code == ErrorCode::NotFound => {
            warn!(
                "Job '{}' disappeared during reconciliation (canceled?); dropping failure: {cause}",
                record.job_id
            );
            return Err(cause);
        }
        _ => {}
    }

    context.store.delete_results(&record.job_id);
    let mut updated = record;
    updated.status = JobStatus::Failed;
    updated.failure = Some(cause.message.clone());
    context.store.save_record(&updated)?;
    warn!("Job '{}' failed: {cause}", updated.job_id);
    Ok(JobStatus::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::MockBackend;
    use crate::backend::BackendStatus;
    use flate2::{write::GzEncoder, Compression};
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;
    use tempfile::tempdir;

    fn write_gzip(path: &Path, text: &str) {
        let file = File::create(path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        encoder.finish().unwrap();
    }

    fn seed_gene_data(dir: &Path) {
        write_gzip(
            &dir.join("TNFX.gff3.gz"),
            "chr7\tsrc\tgene\t1000\t1999\t.\t+\t.\tID=g1;Name=TNFX\n\
             chr7\tsrc\tmRNA\t1000\t1599\t.\t+\t.\tID=TNFX-201;Parent=g1;Name=TNFX-201\n\
             chr7\tsrc\texon\t1000\t1599\t.\t+\t.\tParent=TNFX-201\n",
        );
        let sequence = "ACGT".repeat(250);
        write_gzip(&dir.join("TNFX.fa.gz"), &format!(">chr7\n{sequence}\n"));
    }

    fn toy_context(dir: &Path, backend: Arc<MockBackend>) -> ReconcilerContext {
        seed_gene_data(dir);
        ReconcilerContext {
            genes: GeneDataStore::new(dir),
            store: Arc::new(ResultStore::open(dir.join("store")).unwrap()),
            backend,
            poll_interval: Duration::from_millis(1),
            max_polls: 5,
        }
    }

    fn pending_record(store: &ResultStore, job_id: &str) -> JobRecord {
        let record = JobRecord {
            job_id: job_id.to_string(),
            gene_name_requested: "TNFX".to_string(),
            gene_name_resolved: "TNFX".to_string(),
            transcript_id: "TNFX-201".to_string(),
            transcript_name: "TNFX-201".to_string(),
            sugar: "5xMOE".to_string(),
            backbone: "SSSSS".to_string(),
            transfection_method: "Lipofection".to_string(),
            dosage: 10,
            total_results: 0,
            created_at_unix_ms: crate::store::now_unix_ms(),
            status: JobStatus::Pending,
            failure: None,
        };
        store.save_record(&record).unwrap();
        record
    }

    #[test]
    fn completed_backend_job_persists_sorted_results() {
        let td = tempdir().unwrap();
        let backend = Arc::new(MockBackend::with_statuses(vec![
            BackendStatus {
                state: BackendJobState::Queued,
                output: None,
                error: None,
            },
            BackendStatus {
                state: BackendJobState::InProgress,
                output: None,
                error: None,
            },
            BackendStatus {
                state: BackendJobState::Completed,
                output: Some(BackendOutput {
                    positions: vec![0, 40, 80],
                    scores: vec![0.1, 0.9, 0.5],
                }),
                error: None,
            },
        ]));
        let context = toy_context(td.path(), backend);
        pending_record(&context.store, "job-1");

        let status = reconcile_job(&context, "job-1").unwrap();
        assert_eq!(status, JobStatus::Completed);

        let record = context.store.load_record("job-1").unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.total_results, 3);

        let results = context.store.read_results("job-1").unwrap();
        let scores: Vec<f64> = results.iter().map(|c| c.score).collect();
        assert_eq!(scores, vec![0.9, 0.5, 0.1]);
        assert_eq!(results[0].position, 40);
    }

    #[test]
    fn failed_backend_job_records_the_message_and_no_results() {
        let td = tempdir().unwrap();
        let backend = Arc::new(MockBackend::failing_with("worker exploded"));
        let context = toy_context(td.path(), backend);
        pending_record(&context.store, "job-1");

        let status = reconcile_job(&context, "job-1").unwrap();
        assert_eq!(status, JobStatus::Failed);

        let record = context.store.load_record("job-1").unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.failure.as_deref(), Some("worker exploded"));
        assert!(context.store.read_results("job-1").is_err());
    }

    #[test]
    fn poll_ceiling_fails_the_job() {
        let td = tempdir().unwrap();
        let backend = Arc::new(MockBackend::with_statuses(vec![BackendStatus {
            state: BackendJobState::InProgress,
            output: None,
            error: None,
        }]));
        let context = toy_context(td.path(), backend);
        pending_record(&context.store, "job-1");

        let status = reconcile_job(&context, "job-1").unwrap();
        assert_eq!(status, JobStatus::Failed);
        let record = context.store.load_record("job-1").unwrap();
        assert!(record.failure.unwrap().contains("5 polls"));
    }

    #[test]
    fn terminal_records_are_never_reentered() {
        let td = tempdir().unwrap();
        let backend = Arc::new(MockBackend::failing_with("should never be polled"));
        let context = toy_context(td.path(), backend.clone());
        let mut record = pending_record(&context.store, "job-1");
        record.status = JobStatus::Completed;
        record.total_results = 0;
        context.store.save_record(&record).unwrap();

        let status = reconcile_job(&context, "job-1").unwrap();
        assert_eq!(status, JobStatus::Completed);
        assert_eq!(context.store.load_record("job-1").unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn pool_reconciles_enqueued_jobs_in_the_background() {
        let td = tempdir().unwrap();
        let backend = Arc::new(MockBackend::completing_with(vec![0], vec![0.7]));
        let context = Arc::new(toy_context(td.path(), backend));
        pending_record(&context.store, "job-1");

        let pool = Reconciler::start(context.clone(), 2);
        assert_eq!(pool.worker_count(), 2);
        pool.enqueue("job-1");

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            let record = context.store.load_record("job-1").unwrap();
            if record.status == JobStatus::Completed {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "job never completed");
            thread::sleep(Duration::from_millis(5));
        }
    }
}
