use regex::Regex;
use serde::{Deserialize, Serialize};

/// Terminator token appended after the last backbone position.
pub const PAD_TOKEN: &str = "<pad>";

/// Per-position modification lists in the encoding the external scorer
/// expects. `sugar_mods` has one entry per oligo position; `backbone_mods`
/// has one entry per position plus the trailing pad token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChemistrySpec {
    pub sugar_mods: Vec<String>,
    pub backbone_mods: Vec<String>,
}

impl ChemistrySpec {
    pub fn oligo_length(&self) -> usize {
        self.sugar_mods.len()
    }

    /// The sugar and backbone strings describe the same oligo only when the
    /// position counts line up. The encoder itself never rejects a mismatch;
    /// callers report it as invalid input.
    pub fn is_consistent(&self) -> bool {
        !self.sugar_mods.is_empty() && self.sugar_mods.len() + 1 == self.backbone_mods.len()
    }
}

/// Encode a sugar-pattern string and a backbone string.
///
/// Sugar tokens are comma-separated, each either a bare chemistry code or a
/// `<count>x<code>` repeat shorthand; codes are upper-cased except `CET`,
/// which the backend expects as `cEt`. Backbone characters map `S` to a
/// phosphorothioate link and anything else to a phosphodiester link.
pub fn encode_chemistry(sugar: &str, backbone: &str) -> ChemistrySpec {
    let repeat = Regex::new(r"(?i)^(\d+)x(.+)$").expect("hard-coded regex");

    let mut sugar_mods: Vec<String> = Vec::new();
    for part in sugar.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some(captures) = repeat.captures(part) {
            let count: usize = captures[1].parse().unwrap_or(0);
            let code = canonical_sugar_code(&captures[2]);
            for _ in 0..count {
                sugar_mods.push(code.clone());
            }
        } else {
            sugar_mods.push(canonical_sugar_code(part));
        }
    }

    let mut backbone_mods: Vec<String> = backbone
        .trim()
        .to_uppercase()
        .chars()
        .map(|c| if c == 'S' { "PS" } else { "PD" }.to_string())
        .collect();
    backbone_mods.push(PAD_TOKEN.to_string());

    ChemistrySpec {
        sugar_mods,
        backbone_mods,
    }
}

fn canonical_sugar_code(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    if upper == "CET" {
        "cEt".to_string()
    } else {
        upper
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_shorthand_expands_to_count_entries() {
        let spec = encode_chemistry("3xMOE", "SSS");
        assert_eq!(spec.sugar_mods, vec!["MOE", "MOE", "MOE"]);
        assert_eq!(spec.oligo_length(), 3);
    }

    #[test]
    fn cet_is_canonicalized_to_mixed_case() {
        let spec = encode_chemistry("CET", "S");
        assert_eq!(spec.sugar_mods, vec!["cEt"]);
        let spec = encode_chemistry("2xcet", "SS");
        assert_eq!(spec.sugar_mods, vec!["cEt", "cEt"]);
    }

    #[test]
    fn backbone_maps_links_and_appends_pad() {
        let spec = encode_chemistry("3xMOE", "SSO");
        assert_eq!(spec.backbone_mods, vec!["PS", "PS", "PD", PAD_TOKEN]);
    }

    #[test]
    fn mixed_tokens_expand_in_order() {
        let spec = encode_chemistry("2xMOE, dna ,cet", "SOSS");
        assert_eq!(spec.sugar_mods, vec!["MOE", "MOE", "DNA", "cEt"]);
        assert_eq!(spec.backbone_mods, vec!["PS", "PD", "PS", "PS", PAD_TOKEN]);
        assert!(spec.is_consistent());
    }

    #[test]
    fn mismatched_lengths_are_reported_not_rejected() {
        let spec = encode_chemistry("5xMOE", "SSS");
        assert_eq!(spec.oligo_length(), 5);
        assert_eq!(spec.backbone_mods.len(), 4);
        assert!(!spec.is_consistent());
    }

    #[test]
    fn empty_sugar_string_yields_inconsistent_spec() {
        let spec = encode_chemistry("", "S");
        assert_eq!(spec.oligo_length(), 0);
        assert!(!spec.is_consistent());
    }
}
