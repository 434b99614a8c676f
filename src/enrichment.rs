use crate::annotation::{Feature, Transcript};
use crate::error::ServiceError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Label assigned to a candidate by interval overlap with the transcript's
/// substructure. UTR beats CDS beats plain exon; anything else is intronic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionClass {
    #[serde(rename = "5'UTR")]
    FivePrimeUtr,
    #[serde(rename = "3'UTR")]
    ThreePrimeUtr,
    #[serde(rename = "Exonic (CDS)")]
    ExonicCoding,
    #[serde(rename = "Exonic")]
    Exonic,
    #[serde(rename = "Intronic")]
    Intronic,
}

impl fmt::Display for RegionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RegionClass::FivePrimeUtr => "5'UTR",
            RegionClass::ThreePrimeUtr => "3'UTR",
            RegionClass::ExonicCoding => "Exonic (CDS)",
            RegionClass::Exonic => "Exonic",
            RegionClass::Intronic => "Intronic",
        };
        write!(f, "{label}")
    }
}

/// One scored, annotated antisense candidate. `position` is the zero-based
/// offset of the target site within the transcript sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OligoCandidate {
    pub position: u64,
    pub sequence: String,
    pub score: f64,
    pub genomic_coordinate: String,
    pub target_sequence: String,
    pub gc_content: f64,
    pub region: RegionClass,
}

/// Everything needed to rebuild and annotate candidates for one job.
#[derive(Debug, Clone)]
pub struct EnrichmentContext<'a> {
    pub gene: &'a Feature,
    pub transcript: &'a Transcript,
    pub target: &'a str,
    pub oligo_length: usize,
}

/// Build one candidate per (position, score) pair, sorted descending by
/// score. The sort is stable, so ties keep the backend's order.
pub fn enrich_candidates(
    positions: &[u64],
    scores: &[f64],
    context: &EnrichmentContext<'_>,
) -> Result<Vec<OligoCandidate>, ServiceError> {
    if positions.len() != scores.len() {
        return Err(ServiceError::upstream(format!(
            "Backend returned {} positions but {} scores",
            positions.len(),
            scores.len()
        )));
    }

    let mut candidates = Vec::with_capacity(positions.len());
    for (&position, &score) in positions.iter().zip(scores) {
        let start = position as usize;
        let end = start + context.oligo_length;
        let target_sequence = context.target.get(start..end).ok_or_else(|| {
            ServiceError::upstream(format!(
                "Backend position {position} exceeds the target sequence ({} bases)",
                context.target.len()
            ))
        })?;

        let genomic_start = context.gene.start + position;
        let genomic_end = genomic_start + context.oligo_length as u64 - 1;

        candidates.push(OligoCandidate {
            position,
            sequence: antisense_candidate(target_sequence),
            score,
            genomic_coordinate: format!("{}:{}", context.gene.seqid, genomic_start),
            target_sequence: target_sequence.to_string(),
            gc_content: gc_content(target_sequence),
            region: classify_region(genomic_start, genomic_end, context.transcript),
        });
    }

    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    Ok(candidates)
}

/// Reverse-complement antisense sequence for a target site: T becomes U,
/// then the sequence is reversed and complemented (A-T, G-C, U-A).
pub fn antisense_candidate(target: &str) -> String {
    let bytes: Vec<u8> = target
        .bytes()
        .map(|b| if b == b'T' { b'U' } else { b })
        .rev()
        .map(complement)
        .collect();
    String::from_utf8(bytes).unwrap_or_default()
}

fn complement(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' | b'U' => b'A',
        other => other,
    }
}

/// G+C share of a sequence as a percentage. Rounding happens only at
/// presentation time.
pub fn gc_content(sequence: &str) -> f64 {
    if sequence.is_empty() {
        return 0.0;
    }
    let gc = sequence
        .bytes()
        .filter(|b| matches!(b.to_ascii_uppercase(), b'G' | b'C'))
        .count();
    gc as f64 / sequence.len() as f64 * 100.0
}

fn classify_region(start: u64, end: u64, transcript: &Transcript) -> RegionClass {
    for utr in &transcript.utrs {
        if overlaps(start, end, utr.start, utr.end) {
            return if utr.feature_type == "five_prime_UTR" {
                RegionClass::FivePrimeUtr
            } else {
                RegionClass::ThreePrimeUtr
            };
        }
    }
    for cds in &transcript.cds {
        if overlaps(start, end, cds.start, cds.end) {
            return RegionClass::ExonicCoding;
        }
    }
    for exon in &transcript.exons {
        if overlaps(start, end, exon.start, exon.end) {
            return RegionClass::Exonic;
        }
    }
    RegionClass::Intronic
}

/// Closed integer intervals [a,b] and [c,d] overlap iff max(a,c) <= min(b,d).
fn overlaps(a: u64, b: u64, c: u64, d: u64) -> bool {
    a.max(c) <= b.min(d)
}
