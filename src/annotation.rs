use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Feature types that become transcript roots when they carry an ID.
const TRANSCRIPT_TYPES: [&str; 3] = ["mRNA", "transcript", "lnc_RNA"];

/// Tag attribute values marking the representative isoform.
const CANONICAL_TAGS: [&str; 2] = ["Ensembl_canonical", "MANE_Select"];

/// One annotated genomic interval. Coordinates are 1-based inclusive with
/// start <= end. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub seqid: String,
    pub feature_type: String,
    pub start: u64,
    pub end: u64,
    pub strand: String,
    pub attributes: HashMap<String, String>,
    pub id: Option<String>,
    pub parent_id: Option<String>,
    pub name: Option<String>,
}

/// A transcript-type feature with its attached children, each list sorted
/// ascending by start coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub feature: Feature,
    pub exons: Vec<Feature>,
    pub cds: Vec<Feature>,
    pub utrs: Vec<Feature>,
    pub is_canonical: bool,
}

impl Transcript {
    pub fn id(&self) -> &str {
        self.feature.id.as_deref().unwrap_or_default()
    }

    pub fn display_name(&self) -> &str {
        self.feature.name.as_deref().unwrap_or_else(|| self.id())
    }
}

/// Parse result for one gene's annotation document. `gene` is None when the
/// document contains no gene-type feature; downstream lookups treat that as
/// "annotation not usable".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneAnnotation {
    pub gene: Option<Feature>,
    pub transcripts: HashMap<String, Transcript>,
    pub min_coord: u64,
    pub max_coord: u64,
}

impl GeneAnnotation {
    pub fn transcript(&self, transcript_id: &str) -> Option<&Transcript> {
        self.transcripts.get(transcript_id)
    }
}

/// Parse a GFF3-style annotation document into the feature hierarchy.
///
/// Comment and blank lines are skipped. A data line must have exactly nine
/// tab-separated columns and numeric start/end with start <= end; anything
/// else is silently dropped so that one corrupt line never fails the
/// document. Children without a matching transcript parent are dropped.
pub fn parse_gff3(text: &str) -> GeneAnnotation {
    let mut features: Vec<Feature> = Vec::new();
    let mut gene: Option<Feature> = None;
    let mut min_coord = u64::MAX;
    let mut max_coord = 0u64;

    for line in text.lines() {
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() != 9 {
            continue;
        }
        let (Ok(start), Ok(end)) = (columns[3].parse::<u64>(), columns[4].parse::<u64>()) else {
            continue;
        };
        if start > end {
            continue;
        }

        min_coord = min_coord.min(start);
        max_coord = max_coord.max(end);

        let attributes = parse_attributes(columns[8]);
        let feature = Feature {
            seqid: columns[0].to_string(),
            feature_type: columns[2].to_string(),
            start,
            end,
            strand: columns[6].to_string(),
            id: attributes.get("ID").cloned(),
            parent_id: attributes.get("Parent").cloned(),
            name: attributes.get("Name").cloned(),
            attributes,
        };
        if feature.feature_type == "gene" && gene.is_none() {
            gene = Some(feature.clone());
        }
        features.push(feature);
    }

    let mut transcripts: HashMap<String, Transcript> = HashMap::new();
    for feature in &features {
        if !TRANSCRIPT_TYPES.contains(&feature.feature_type.as_str()) {
            continue;
        }
        let Some(id) = feature.id.clone() else {
            continue;
        };
        let is_canonical = feature
            .attributes
            .get("tag")
            .map(|tags| {
                tags.split(',')
                    .any(|tag| CANONICAL_TAGS.contains(&tag.trim()))
            })
            .unwrap_or(false);
        transcripts.insert(
            id,
            Transcript {
                feature: feature.clone(),
                exons: vec![],
                cds: vec![],
                utrs: vec![],
                is_canonical,
            },
        );
    }

    for feature in features {
        let Some(parent_id) = feature.parent_id.clone() else {
            continue;
        };
        let Some(transcript) = transcripts.get_mut(&parent_id) else {
            continue;
        };
        if feature.feature_type == "exon" {
            transcript.exons.push(feature);
        } else if feature.feature_type == "CDS" {
            transcript.cds.push(feature);
        } else if feature.feature_type.ends_with("_UTR") {
            transcript.utrs.push(feature);
        }
    }

    for transcript in transcripts.values_mut() {
        transcript.exons.sort_by_key(|f| f.start);
        transcript.cds.sort_by_key(|f| f.start);
        transcript.utrs.sort_by_key(|f| f.start);
    }

    GeneAnnotation {
        gene,
        transcripts,
        min_coord: if min_coord == u64::MAX { 0 } else { min_coord },
        max_coord,
    }
}

fn parse_attributes(raw: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for part in raw.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((key, value)) = part.split_once('=') {
            let key = key.trim();
            let value = value.trim();
            if !key.is_empty() {
                map.insert(key.to_string(), value.to_string());
            }
        }
    }
    map
}
