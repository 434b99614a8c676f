use crate::enrichment::OligoCandidate;
use crate::error::ServiceError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

pub const DEFAULT_STORE_DIR: &str = "data/jobs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
}

/// Durable metadata for one scoring job. Created when the job is submitted,
/// mutated only by the reconciler, and never again after reaching a terminal
/// state. The chemistry parameters are kept verbatim as submitted because
/// fingerprint equality compares them as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub gene_name_requested: String,
    pub gene_name_resolved: String,
    pub transcript_id: String,
    pub transcript_name: String,
    pub sugar: String,
    pub backbone: String,
    pub transfection_method: String,
    pub dosage: i64,
    pub total_results: usize,
    pub created_at_unix_ms: u128,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl JobRecord {
    pub fn fingerprint(&self) -> RequestFingerprint {
        RequestFingerprint::new(
            &self.gene_name_requested,
            &self.transcript_id,
            &self.sugar,
            &self.backbone,
            &self.transfection_method,
            self.dosage,
        )
    }
}

/// Canonical identity of a scoring request: the six submitted parameters,
/// gene name compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestFingerprint {
    gene_name: String,
    transcript_id: String,
    sugar: String,
    backbone: String,
    transfection_method: String,
    dosage: i64,
}

impl RequestFingerprint {
    pub fn new(
        gene_name: &str,
        transcript_id: &str,
        sugar: &str,
        backbone: &str,
        transfection_method: &str,
        dosage: i64,
    ) -> Self {
        Self {
            gene_name: gene_name.to_lowercase(),
            transcript_id: transcript_id.to_string(),
            sugar: sugar.to_string(),
            backbone: backbone.to_string(),
            transfection_method: transfection_method.to_string(),
            dosage,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsPage {
    pub candidates: Vec<OligoCandidate>,
    pub page: usize,
    pub pages: usize,
    pub total: usize,
}

/// Durable, compressed storage of job records and result sets, keyed by job
/// identifier. The files are the single source of truth; the fingerprint
/// index over completed records is a derived cache rebuilt on open.
pub struct ResultStore {
    root: PathBuf,
    completed_index: Mutex<HashMap<RequestFingerprint, String>>,
}

impl ResultStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ServiceError> {
        let root = root.into();
        for dir in [root.join("jobs"), root.join("results")] {
            fs::create_dir_all(&dir).map_err(|e| {
                ServiceError::io(format!("Could not create store dir '{}': {e}", dir.display()))
            })?;
        }
        let store = Self {
            root,
            completed_index: Mutex::new(HashMap::new()),
        };
        store.rebuild_index()?;
        Ok(store)
    }

    fn record_path(&self, job_id: &str) -> PathBuf {
        self.root.join("jobs").join(format!("{job_id}.json"))
    }

    fn results_path(&self, job_id: &str) -> PathBuf {
        self.root.join("results").join(format!("{job_id}.json.gz"))
    }

    /// Persist a record with overwrite semantics (last writer wins).
    pub fn save_record(&self, record: &JobRecord) -> Result<(), ServiceError> {
        validate_job_id(&record.job_id)?;
        let text = serde_json::to_string_pretty(record)
            .map_err(|e| ServiceError::internal(format!("Could not serialize job record: {e}")))?;
        write_atomic(&self.record_path(&record.job_id), text.as_bytes())?;
        if record.status == JobStatus::Completed {
            self.completed_index
                .lock()
                .unwrap()
                .insert(record.fingerprint(), record.job_id.clone());
        }
        Ok(())
    }

    pub fn load_record(&self, job_id: &str) -> Result<JobRecord, ServiceError> {
        validate_job_id(job_id)?;
        let path = self.record_path(job_id);
        if !path.exists() {
            return Err(ServiceError::not_found(format!("Unknown job '{job_id}'")));
        }
        let text = fs::read_to_string(&path)
            .map_err(|e| ServiceError::io(format!("Could not read '{}': {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| ServiceError::internal(format!("Could not parse '{}': {e}", path.display())))
    }

    /// All persisted records, in no particular order. Unreadable files are
    /// skipped with a warning so one corrupt record never hides the rest.
    pub fn list_records(&self) -> Result<Vec<JobRecord>, ServiceError> {
        let dir = self.root.join("jobs");
        let entries = fs::read_dir(&dir)
            .map_err(|e| ServiceError::io(format!("Could not list '{}': {e}", dir.display())))?;
        let mut records = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| ServiceError::io(format!("Could not list '{}': {e}", dir.display())))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let text = match fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Skipping unreadable job record '{}': {e}", path.display());
                    continue;
                }
            };
            match serde_json::from_str::<JobRecord>(&text) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unparsable job record '{}': {e}", path.display()),
            }
        }
        Ok(records)
    }

    pub fn pending_job_ids(&self) -> Result<Vec<String>, ServiceError> {
        Ok(self
            .list_records()?
            .into_iter()
            .filter(|r| r.status == JobStatus::Pending)
            .map(|r| r.job_id)
            .collect())
    }

    /// Cache lookup: the job id of a completed record with this fingerprint,
    /// if any. Pending and failed jobs never match.
    pub fn completed_match(&self, fingerprint: &RequestFingerprint) -> Option<String> {
        self.completed_index.lock().unwrap().get(fingerprint).cloned()
    }

    fn rebuild_index(&self) -> Result<(), ServiceError> {
        let mut index = HashMap::new();
        for record in self.list_records()? {
            if record.status == JobStatus::Completed {
                index.insert(record.fingerprint(), record.job_id);
            }
        }
        *self.completed_index.lock().unwrap() = index;
        Ok(())
    }

    /// Persist a job's result set, gzip-compressed. Written once per job,
    /// when it reaches the completed state.
    pub fn write_results(
        &self,
        job_id: &str,
        candidates: &[OligoCandidate],
    ) -> Result<(), ServiceError> {
        validate_job_id(job_id)?;
        let json = serde_json::to_vec(candidates)
            .map_err(|e| ServiceError::internal(format!("Could not serialize results: {e}")))?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json).map_err(|e| {
            ServiceError::io(format!("Could not compress results for '{job_id}': {e}"))
        })?;
        let compressed = encoder.finish().map_err(|e| {
            ServiceError::io(format!("Could not compress results for '{job_id}': {e}"))
        })?;
        write_atomic(&self.results_path(job_id), &compressed)
    }

    pub fn read_results(&self, job_id: &str) -> Result<Vec<OligoCandidate>, ServiceError> {
        validate_job_id(job_id)?;
        let path = self.results_path(job_id);
        if !path.exists() {
            return Err(ServiceError::not_found(format!(
                "No results stored for job '{job_id}'"
            )));
        }
        let file = File::open(&path)
            .map_err(|e| ServiceError::io(format!("Could not open '{}': {e}", path.display())))?;
        let mut json = Vec::new();
        GzDecoder::new(file).read_to_end(&mut json).map_err(|e| {
            ServiceError::io(format!("Could not decompress '{}': {e}", path.display()))
        })?;
        serde_json::from_slice(&json)
            .map_err(|e| ServiceError::internal(format!("Could not parse '{}': {e}", path.display())))
    }

    /// One page of a job's results. Pages are 1-based; out-of-range pages
    /// return an empty slice with accurate totals rather than an error.
    pub fn results_page(
        &self,
        job_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<ResultsPage, ServiceError> {
        if page == 0 {
            return Err(ServiceError::invalid_input("Page numbers start at 1"));
        }
        if page_size == 0 {
            return Err(ServiceError::invalid_input("Page size must be positive"));
        }
        let all = self.read_results(job_id)?;
        let total = all.len();
        let pages = total.div_ceil(page_size);
        let start = (page - 1).saturating_mul(page_size);
        let candidates = if start >= total {
            vec![]
        } else {
            all[start..total.min(start + page_size)].to_vec()
        };
        Ok(ResultsPage {
            candidates,
            page,
            pages,
            total,
        })
    }

    /// Full result set as CSV, in the same (score-descending) order as the
    /// paginated endpoint. GC content and score are rounded here only.
    pub fn csv_export(&self, job_id: &str) -> Result<String, ServiceError> {
        let candidates = self.read_results(job_id)?;
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record([
                "genomic_coordinate",
                "region",
                "target_sequence",
                "candidate_sequence",
                "gc_content",
                "score",
            ])
            .map_err(|e| ServiceError::internal(format!("Could not write CSV header: {e}")))?;
        for candidate in &candidates {
            writer
                .write_record([
                    candidate.genomic_coordinate.clone(),
                    candidate.region.to_string(),
                    candidate.target_sequence.clone(),
                    candidate.sequence.clone(),
                    format!("{:.1}", candidate.gc_content),
                    format!("{:.4}", candidate.score),
                ])
                .map_err(|e| ServiceError::internal(format!("Could not write CSV row: {e}")))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| ServiceError::internal(format!("Could not finish CSV export: {e}")))?;
        String::from_utf8(bytes)
            .map_err(|e| ServiceError::internal(format!("CSV export is not valid UTF-8: {e}")))
    }

    /// Remove a job's record and results. Idempotent: missing files are fine.
    pub fn delete_job(&self, job_id: &str) -> Result<(), ServiceError> {
        validate_job_id(job_id)?;
        self.completed_index
            .lock()
            .unwrap()
            .retain(|_, id| id != job_id);
        for path in [self.record_path(job_id), self.results_path(job_id)] {
            if path.exists() {
                fs::remove_file(&path).map_err(|e| {
                    ServiceError::io(format!("Could not delete '{}': {e}", path.display()))
                })?;
            }
        }
        Ok(())
    }

    /// Best-effort removal of a results file, for failure paths that must
    /// not leave partial artifacts behind.
    pub fn delete_results(&self, job_id: &str) {
        let path = self.results_path(job_id);
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                warn!("Could not delete partial results '{}': {e}", path.display());
            }
        }
    }
}

/// Job identifiers come from the external backend but become file names
/// here, so anything outside a conservative alphabet is rejected.
fn validate_job_id(job_id: &str) -> Result<(), ServiceError> {
    if job_id.is_empty()
        || !job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ServiceError::invalid_input(format!(
            "Invalid job identifier '{job_id}'"
        )));
    }
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ServiceError> {
    let mut tmp_os: OsString = path.as_os_str().to_os_string();
    tmp_os.push(".part");
    let tmp_path = PathBuf::from(tmp_os);
    fs::write(&tmp_path, bytes)
        .map_err(|e| ServiceError::io(format!("Could not write '{}': {e}", tmp_path.display())))?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        ServiceError::io(format!("Could not finalize '{}': {e}", path.display()))
    })
}

pub(crate) fn now_unix_ms() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::RegionClass;
    use tempfile::tempdir;

    pub(crate) fn toy_record(job_id: &str, status: JobStatus) -> JobRecord {
        JobRecord {
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
            created_at_unix_ms: now_unix_ms(),
            status,
            failure: None,
        }
    }

    fn toy_candidates(n: usize) -> Vec<OligoCandidate> {
        (0..n)
            .map(|i| OligoCandidate {
                position: i as u64,
                sequence: "ACGTA".to_string(),
                score: 1.0 - i as f64 / n as f64,
                genomic_coordinate: format!("chr7:{}", 1000 + i),
                target_sequence: "TACGT".to_string(),
                gc_content: 40.0,
                region: RegionClass::Exonic,
            })
            .collect()
    }

    #[test]
    fn record_round_trips_and_overwrites() {
        let td = tempdir().unwrap();
        let store = ResultStore::open(td.path()).unwrap();

        let mut record = toy_record("job-1", JobStatus::Pending);
        store.save_record(&record).unwrap();
        assert_eq!(store.load_record("job-1").unwrap(), record);

        record.status = JobStatus::Completed;
        record.total_results = 3;
        store.save_record(&record).unwrap();
        assert_eq!(store.load_record("job-1").unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn unknown_job_is_not_found() {
        let td = tempdir().unwrap();
        let store = ResultStore::open(td.path()).unwrap();
        let err = store.load_record("missing").unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::NotFound);
    }

    #[test]
    fn results_compress_round_trip_is_identical() {
        let td = tempdir().unwrap();
        let store = ResultStore::open(td.path()).unwrap();
        let candidates = toy_candidates(7);
        store.write_results("job-1", &candidates).unwrap();
        assert_eq!(store.read_results("job-1").unwrap(), candidates);
    }

    #[test]
    fn pagination_reports_accurate_totals() {
        let td = tempdir().unwrap();
        let store = ResultStore::open(td.path()).unwrap();
        store.write_results("job-1", &toy_candidates(250)).unwrap();

        let page1 = store.results_page("job-1", 1, 100).unwrap();
        assert_eq!(page1.candidates.len(), 100);
        assert_eq!(page1.pages, 3);
        assert_eq!(page1.total, 250);
        assert_eq!(page1.candidates[0].position, 0);

        let page3 = store.results_page("job-1", 3, 100).unwrap();
        assert_eq!(page3.candidates.len(), 50);

        let page4 = store.results_page("job-1", 4, 100).unwrap();
        assert!(page4.candidates.is_empty());
        assert_eq!(page4.pages, 3);
        assert_eq!(page4.total, 250);
    }

    #[test]
    fn zero_page_or_size_is_invalid_input() {
        let td = tempdir().unwrap();
        let store = ResultStore::open(td.path()).unwrap();
        store.write_results("job-1", &toy_candidates(1)).unwrap();
        assert!(store.results_page("job-1", 0, 100).is_err());
        assert!(store.results_page("job-1", 1, 0).is_err());
    }

    #[test]
    fn completed_index_survives_reopen_and_matches_case_insensitively() {
        let td = tempdir().unwrap();
        {
            let store = ResultStore::open(td.path()).unwrap();
            store
                .save_record(&toy_record("job-1", JobStatus::Completed))
                .unwrap();
            let mut pending = toy_record("job-2", JobStatus::Pending);
            pending.transcript_id = "TNFX-202".to_string();
            store.save_record(&pending).unwrap();
        }
        let store = ResultStore::open(td.path()).unwrap();

        let hit = RequestFingerprint::new("tnfx", "TNFX-201", "5xMOE", "SSSSS", "Lipofection", 10);
        assert_eq!(store.completed_match(&hit).as_deref(), Some("job-1"));

        let wrong_dosage =
            RequestFingerprint::new("tnfx", "TNFX-201", "5xMOE", "SSSSS", "Lipofection", 20);
        assert!(store.completed_match(&wrong_dosage).is_none());

        // The pending record never matches, even though it is persisted.
        let pending = RequestFingerprint::new("tnfx", "TNFX-202", "5xMOE", "SSSSS", "Lipofection", 10);
        assert!(store.completed_match(&pending).is_none());
    }

    #[test]
    fn csv_export_matches_page_order_and_rounds_for_presentation() {
        let td = tempdir().unwrap();
        let store = ResultStore::open(td.path()).unwrap();
        let candidates = vec![
            OligoCandidate {
                position: 5,
                sequence: "GGCC".to_string(),
                score: 0.98767,
                genomic_coordinate: "chr7:1005".to_string(),
                target_sequence: "GGCC".to_string(),
                gc_content: 100.0,
                region: RegionClass::ExonicCoding,
            },
            OligoCandidate {
                position: 2,
                sequence: "ATAT".to_string(),
                score: 0.5,
                genomic_coordinate: "chr7:1002".to_string(),
                target_sequence: "ATAT".to_string(),
                gc_content: 33.333333,
                region: RegionClass::Intronic,
            },
        ];
        store.write_results("job-1", &candidates).unwrap();

        let csv = store.csv_export("job-1").unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines[0],
            "genomic_coordinate,region,target_sequence,candidate_sequence,gc_content,score"
        );
        assert_eq!(lines[1], "chr7:1005,Exonic (CDS),GGCC,GGCC,100.0,0.9877");
        assert_eq!(lines[2], "chr7:1002,Intronic,ATAT,ATAT,33.3,0.5000");
    }

    #[test]
    fn delete_job_removes_record_results_and_index_entry() {
        let td = tempdir().unwrap();
        let store = ResultStore::open(td.path()).unwrap();
        let record = toy_record("job-1", JobStatus::Completed);
        store.save_record(&record).unwrap();
        store.write_results("job-1", &toy_candidates(2)).unwrap();

        store.delete_job("job-1").unwrap();
        assert!(store.load_record("job-1").is_err());
        assert!(store.read_results("job-1").is_err());
        assert!(store.completed_match(&record.fingerprint()).is_none());

        // Idempotent.
        store.delete_job("job-1").unwrap();
    }

    #[test]
    fn hostile_job_ids_are_rejected() {
        let td = tempdir().unwrap();
        let store = ResultStore::open(td.path()).unwrap();
        assert!(store.load_record("../escape").is_err());
        assert!(store.load_record("").is_err());
        let err = store.load_record("a/b").unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::InvalidInput);
    }
}
