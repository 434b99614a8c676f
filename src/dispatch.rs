use crate::backend::{ScoringBackend, ScoringPayload, DEFAULT_BATCH_SIZE};
use crate::chemistry::encode_chemistry;
use crate::error::ServiceError;
use crate::gene_store::GeneDataStore;
use crate::sequence::resolve_transcript_sequence;
use crate::store::{now_unix_ms, JobRecord, JobStatus, RequestFingerprint, ResultStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// One scoring request as received at the service boundary. The six fields
/// form the request fingerprint used for cache matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRequest {
    pub gene_name: String,
    pub transcript_id: String,
    pub sugar: String,
    pub backbone: String,
    pub transfection_method: String,
    pub dosage: i64,
}

impl ScoreRequest {
    pub fn fingerprint(&self) -> RequestFingerprint {
        RequestFingerprint::new(
            &self.gene_name,
            &self.transcript_id,
            &self.sugar,
            &self.backbone,
            &self.transfection_method,
            self.dosage,
        )
    }

    /// Synchronous input validation; nothing invalid reaches the pipeline.
    pub fn validate(&self) -> Result<(), ServiceError> {
        for (label, value) in [
            ("gene name", &self.gene_name),
            ("transcript id", &self.transcript_id),
            ("sugar pattern", &self.sugar),
            ("backbone pattern", &self.backbone),
            ("transfection method", &self.transfection_method),
        ] {
            if value.trim().is_empty() {
                return Err(ServiceError::invalid_input(format!(
                    "Missing required field: {label}"
                )));
            }
        }
        if self.dosage < 1 {
            return Err(ServiceError::invalid_input("Dosage must be a positive number"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub job_id: String,
    pub cached: bool,
}

/// Checks the store for a completed job with the same fingerprint and
/// otherwise submits a new job to the backend, persisting pending metadata.
///
/// The cache check and the pending write are deliberately not atomic: two
/// identical concurrent requests can both miss and both submit. Only
/// completed jobs are ever matched, so the duplicates stay consistent.
pub struct JobDispatcher {
    genes: GeneDataStore,
    store: Arc<ResultStore>,
    backend: Arc<dyn ScoringBackend>,
}

impl JobDispatcher {
    pub fn new(
        genes: GeneDataStore,
        store: Arc<ResultStore>,
        backend: Arc<dyn ScoringBackend>,
    ) -> Self {
        Self {
            genes,
            store,
            backend,
        }
    }

    /// Cache lookup without side effects.
    pub fn check_cache(&self, request: &ScoreRequest) -> Result<Option<String>, ServiceError> {
        request.validate()?;
        Ok(self.store.completed_match(&request.fingerprint()))
    }

    /// Cache hit, or a freshly submitted job in pending state. The caller
    /// hands a non-cached job to the reconciler; this method returns without
    /// waiting for reconciliation.
    pub fn dispatch(&self, request: &ScoreRequest) -> Result<(SubmitOutcome, Option<JobRecord>), ServiceError> {
        request.validate()?;

        if let Some(job_id) = self.store.completed_match(&request.fingerprint()) {
            info!(
                "Cache hit for gene '{}' transcript '{}': job '{job_id}'",
                request.gene_name, request.transcript_id
            );
            return Ok((SubmitOutcome { job_id, cached: true }, None));
        }

        let annotation = self.genes.load_annotation(&request.gene_name)?;
        let raw_sequence = self.genes.load_sequence(&request.gene_name)?;
        let resolved = resolve_transcript_sequence(
            &annotation,
            &request.gene_name,
            &request.transcript_id,
            &raw_sequence,
        )?;

        let chemistry = encode_chemistry(&request.sugar, &request.backbone);
        if !chemistry.is_consistent() {
            return Err(ServiceError::invalid_input(format!(
                "Sugar pattern describes {} positions but the backbone describes {}",
                chemistry.oligo_length(),
                chemistry.backbone_mods.len().saturating_sub(1)
            )));
        }

        let payload = ScoringPayload {
            target_rna: resolved.sequence.clone(),
            aso_length: chemistry.oligo_length(),
            sugar_mods: chemistry.sugar_mods,
            backbone_mods: chemistry.backbone_mods,
            dosage: request.dosage,
            transfection_method: request.transfection_method.clone(),
            batch_size: DEFAULT_BATCH_SIZE,
        };
        let job_id = self.backend.submit(&payload)?;

        let record = JobRecord {
            job_id: job_id.clone(),
            gene_name_requested: request.gene_name.clone(),
            gene_name_resolved: resolved
                .gene
                .name
                .clone()
                .unwrap_or_else(|| request.gene_name.clone()),
            transcript_id: request.transcript_id.clone(),
            transcript_name: resolved.transcript.display_name().to_string(),
            sugar: request.sugar.clone(),
            backbone: request.backbone.clone(),
            transfection_method: request.transfection_method.clone(),
            dosage: request.dosage,
            total_results: 0,
            created_at_unix_ms: now_unix_ms(),
            status: JobStatus::Pending,
            failure: None,
        };
        self.store.save_record(&record)?;
        info!(
            "Submitted job '{job_id}' for gene '{}' transcript '{}'",
            request.gene_name, request.transcript_id
        );

        Ok((SubmitOutcome { job_id, cached: false }, Some(record)))
    }
}
