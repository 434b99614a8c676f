use crate::annotation::{parse_gff3, GeneAnnotation};
use crate::error::ServiceError;
use crate::sequence::fasta_body;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

pub const DEFAULT_GENE_DATA_DIR: &str = "data/gene_sequences";

/// Read-only store of per-gene data blobs: `<gene>.gff3.gz` with the
/// annotation document and `<gene>.fa.gz` with the region's FASTA sequence.
#[derive(Debug, Clone)]
pub struct GeneDataStore {
    root: PathBuf,
}

impl GeneDataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn load_annotation(&self, gene_name: &str) -> Result<GeneAnnotation, ServiceError> {
        let path = self.root.join(format!("{gene_name}.gff3.gz"));
        if !path.exists() {
            return Err(ServiceError::not_found(format!(
                "No annotation found for gene '{gene_name}'"
            )));
        }
        Ok(parse_gff3(&read_gzip_text(&path)?))
    }

    pub fn load_sequence(&self, gene_name: &str) -> Result<String, ServiceError> {
        let path = self.root.join(format!("{gene_name}.fa.gz"));
        if !path.exists() {
            return Err(ServiceError::not_found(format!(
                "No sequence found for gene '{gene_name}'"
            )));
        }
        Ok(fasta_body(&read_gzip_text(&path)?))
    }
}

fn read_gzip_text(path: &Path) -> Result<String, ServiceError> {
    let file = File::open(path)
        .map_err(|e| ServiceError::io(format!("Could not open '{}': {e}", path.display())))?;
    let mut text = String::new();
    GzDecoder::new(file)
        .read_to_string(&mut text)
        .map_err(|e| ServiceError::io(format!("Could not decompress '{}': {e}", path.display())))?;
    Ok(text)
}
