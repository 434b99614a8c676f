use crate::annotation::{Feature, GeneAnnotation, Transcript};
use crate::error::ServiceError;

/// A transcript's target sequence together with the features needed to
/// annotate scored candidates later.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub sequence: String,
    pub gene: Feature,
    pub transcript: Transcript,
}

/// Extract the sequence body from FASTA text: header lines dropped, the
/// remaining lines joined and upper-cased.
pub fn fasta_body(text: &str) -> String {
    text.lines()
        .filter(|line| !line.starts_with('>'))
        .map(str::trim)
        .collect::<String>()
        .to_uppercase()
}

/// Resolve the subsequence covering a transcript's span. The raw sequence is
/// the gene's region, so the gene start is offset zero.
pub fn resolve_transcript_sequence(
    annotation: &GeneAnnotation,
    gene_name: &str,
    transcript_id: &str,
    raw_sequence: &str,
) -> Result<ResolvedTarget, ServiceError> {
    let gene = annotation.gene.as_ref().ok_or_else(|| {
        ServiceError::not_found(format!("No gene feature in the annotation for '{gene_name}'"))
    })?;
    let transcript = annotation.transcript(transcript_id).ok_or_else(|| {
        ServiceError::not_found(format!(
            "Transcript '{transcript_id}' not found for gene '{gene_name}'"
        ))
    })?;

    let start = transcript.feature.start.checked_sub(gene.start).ok_or_else(|| {
        ServiceError::invalid_input(format!(
            "Transcript '{transcript_id}' starts before gene '{gene_name}'"
        ))
    })? as usize;
    let end = (transcript.feature.end - gene.start + 1) as usize;
    let sequence = raw_sequence.get(start..end).ok_or_else(|| {
        ServiceError::invalid_input(format!(
            "Sequence for gene '{gene_name}' is shorter than the span of transcript '{transcript_id}' ({} bases, need {end})",
            raw_sequence.len()
        ))
    })?;

    Ok(ResolvedTarget {
        sequence: sequence.to_string(),
        gene: gene.clone(),
        transcript: transcript.clone(),
    })
}
