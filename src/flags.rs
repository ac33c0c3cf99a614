use std::fmt;

use serde::{Deserialize, Serialize};

use crate::consensus::group_by_path;
use crate::domain::{CandidateHit, RankLevel};

/// Identification methods that mean the specimen was named by an automated
/// match against the reference library rather than by a taxonomist.
pub const AUTOMATED_PROVENANCE_PREFIXES: [&str; 4] = ["BOLD", "ID", "BIN", "Tree"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags {
    pub reverse_taxonomy: bool,
    pub ambiguous: bool,
    pub private_only: bool,
    pub single_support: bool,
}

impl Flags {
    pub fn as_array(&self) -> [bool; 4] {
        [
            self.reverse_taxonomy,
            self.ambiguous,
            self.private_only,
            self.single_support,
        ]
    }

    pub fn any(&self) -> bool {
        self.as_array().iter().any(|flag| *flag)
    }

    /// Positional code: flag `n` prints `n`, a clear flag prints a space,
    /// positions joined by single spaces. A and D set gives `"1     4"`.
    pub fn code(&self) -> String {
        self.as_array()
            .iter()
            .enumerate()
            .map(|(index, set)| {
                if *set {
                    (index + 1).to_string()
                } else {
                    " ".to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// `support` are the threshold-filtered rows on the winning path, `filtered`
/// every row that passed the threshold.
pub fn evaluate(support: &[&CandidateHit], filtered: &[&CandidateHit], level: RankLevel) -> Flags {
    let reverse_taxonomy = support.iter().any(|hit| {
        hit.identification_method()
            .map(is_automated_provenance)
            .unwrap_or(false)
    });

    let ambiguous = group_by_path(filtered, level, level != RankLevel::Class).len() > 1;

    let private_only = !support.is_empty()
        && support.iter().all(|hit| {
            hit.status
                .as_ref()
                .map(|status| status.is_private())
                .unwrap_or(false)
        });

    Flags {
        reverse_taxonomy,
        ambiguous,
        private_only,
        single_support: support.len() == 1,
    }
}

fn is_automated_provenance(method: &str) -> bool {
    let method = method.trim();
    AUTOMATED_PROVENANCE_PREFIXES
        .iter()
        .any(|prefix| method.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RecordStatus, SpecimenRecord, Taxonomy};

    fn hit(genus: &str, status: RecordStatus, method: Option<&str>) -> CandidateHit {
        CandidateHit {
            rank: 1,
            taxonomy: Taxonomy {
                phylum: Some("Arthropoda".into()),
                class: Some("Insecta".into()),
                order: Some("Diptera".into()),
                family: Some("Chironomidae".into()),
                genus: Some(genus.into()),
                species: None,
                subspecies: None,
            },
            similarity: Some(96.0),
            status: Some(status),
            process_id: None,
            score: None,
            e_value: None,
            specimen: method.map(|method| SpecimenRecord {
                process_id: "GBMIN1-13".into(),
                identification_method: Some(method.into()),
                ..SpecimenRecord::default()
            }),
        }
    }

    #[test]
    fn code_is_positional() {
        let flags = Flags {
            reverse_taxonomy: true,
            ambiguous: false,
            private_only: false,
            single_support: true,
        };
        assert_eq!(flags.code(), "1     4");
        assert_eq!(Flags::default().code(), "       ");
        assert_eq!(flags.code().len(), 7);
    }

    #[test]
    fn provenance_prefixes() {
        assert!(is_automated_provenance("BOLD ID Engine"));
        assert!(is_automated_provenance("BIN Taxonomy Match"));
        assert!(is_automated_provenance("Tree based identification"));
        assert!(!is_automated_provenance("Morphology"));
    }

    #[test]
    fn all_private_support() {
        let a = hit("Chironomus", RecordStatus::Private, None);
        let b = hit("Chironomus", RecordStatus::EarlyRelease, None);
        let flags = evaluate(&[&a, &b], &[&a, &b], RankLevel::Genus);
        assert!(flags.private_only);
        assert!(!flags.single_support);
        assert!(!flags.ambiguous);
        assert!(!flags.reverse_taxonomy);
    }

    #[test]
    fn second_group_marks_ambiguity() {
        let a = hit("Chironomus", RecordStatus::Published, Some("BOLD ID Engine"));
        let b = hit("Tanytarsus", RecordStatus::Published, None);
        let flags = evaluate(&[&a], &[&a, &b], RankLevel::Genus);
        assert!(flags.ambiguous);
        assert!(flags.single_support);
        assert!(flags.reverse_taxonomy);
        assert!(!flags.private_only);
    }
}
