use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::BoldError;

/// Value written into every taxonomy field of a synthetic no-match row.
pub const NO_MATCH: &str = "No Match";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceRecord {
    pub id: String,
    pub sequence: String,
}

impl SequenceRecord {
    pub fn new(id: impl Into<String>, sequence: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sequence: sequence.into(),
        }
    }
}

/// Remote identification engines. Each has its own endpoint, form encoding and
/// result page layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Coi,
    Its,
    Rbcl,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Coi => "coi",
            Engine::Its => "its",
            Engine::Rbcl => "rbcl",
        }
    }

    pub fn schema(&self) -> PageSchema {
        match self {
            Engine::Coi => PageSchema::SingleDb,
            Engine::Its | Engine::Rbcl => PageSchema::MultiDb,
        }
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            Engine::Coi => "index.php/IDS_IdentificationRequest",
            Engine::Its | Engine::Rbcl => "index.php/IDS_BlastRequest",
        }
    }

    pub fn tab_type(&self) -> &'static str {
        match self {
            Engine::Coi => "animalTabPane",
            Engine::Its => "fungiTabPane",
            Engine::Rbcl => "plantTabPane",
        }
    }

    pub fn search_db(&self) -> &'static str {
        match self {
            Engine::Coi => "COX1",
            Engine::Its => "ITS",
            Engine::Rbcl => "MATK_RBCL",
        }
    }

    pub fn content_type(&self) -> &'static str {
        "application/x-www-form-urlencoded"
    }

    pub fn submit_timeout(&self) -> Duration {
        match self {
            Engine::Coi => Duration::from_secs(300),
            Engine::Its | Engine::Rbcl => Duration::from_secs(600),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Engine {
    type Err = BoldError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "coi" | "cox1" => Ok(Engine::Coi),
            "its" => Ok(Engine::Its),
            "rbcl" | "matk_rbcl" => Ok(Engine::Rbcl),
            _ => Err(BoldError::InvalidConfiguration(format!(
                "unknown engine: {value}"
            ))),
        }
    }
}

/// Result page layouts. The single-database engine returns a fixed top-20
/// table; the multi-database engines return a ranked table with scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSchema {
    SingleDb,
    MultiDb,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum RankLevel {
    Class,
    Order,
    Family,
    Genus,
    Species,
}

impl RankLevel {
    pub const ALL: [RankLevel; 5] = [
        RankLevel::Class,
        RankLevel::Order,
        RankLevel::Family,
        RankLevel::Genus,
        RankLevel::Species,
    ];

    pub fn threshold(&self) -> u8 {
        match self {
            RankLevel::Species => 98,
            RankLevel::Genus => 95,
            RankLevel::Family => 90,
            RankLevel::Order => 85,
            RankLevel::Class => 50,
        }
    }

    /// Starting level for a top similarity. Boundaries are inclusive.
    pub fn for_similarity(similarity: f64) -> RankLevel {
        if similarity >= 98.0 {
            RankLevel::Species
        } else if similarity >= 95.0 {
            RankLevel::Genus
        } else if similarity >= 90.0 {
            RankLevel::Family
        } else if similarity >= 85.0 {
            RankLevel::Order
        } else {
            RankLevel::Class
        }
    }

    pub fn coarser(&self) -> Option<RankLevel> {
        match self {
            RankLevel::Species => Some(RankLevel::Genus),
            RankLevel::Genus => Some(RankLevel::Family),
            RankLevel::Family => Some(RankLevel::Order),
            RankLevel::Order => Some(RankLevel::Class),
            RankLevel::Class => None,
        }
    }
}

impl fmt::Display for RankLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RankLevel::Class => "Class",
            RankLevel::Order => "Order",
            RankLevel::Family => "Family",
            RankLevel::Genus => "Genus",
            RankLevel::Species => "Species",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxonomy {
    pub phylum: Option<String>,
    pub class: Option<String>,
    pub order: Option<String>,
    pub family: Option<String>,
    pub genus: Option<String>,
    pub species: Option<String>,
    pub subspecies: Option<String>,
}

impl Taxonomy {
    pub fn no_match() -> Self {
        let value = || Some(NO_MATCH.to_string());
        Self {
            phylum: value(),
            class: value(),
            order: value(),
            family: value(),
            genus: value(),
            species: value(),
            subspecies: value(),
        }
    }

    pub fn at(&self, level: RankLevel) -> Option<&str> {
        match level {
            RankLevel::Class => self.class.as_deref(),
            RankLevel::Order => self.order.as_deref(),
            RankLevel::Family => self.family.as_deref(),
            RankLevel::Genus => self.genus.as_deref(),
            RankLevel::Species => self.species.as_deref(),
        }
    }

    /// Phylum followed by every rank down to and including `level`.
    pub fn path(&self, level: RankLevel) -> Vec<Option<&str>> {
        let mut path = vec![self.phylum.as_deref()];
        path.extend(
            RankLevel::ALL
                .iter()
                .filter(|rank| **rank <= level)
                .map(|rank| self.at(*rank)),
        );
        path
    }

    /// Blanks every field finer than `level`, subspecies included.
    pub fn truncated(&self, level: RankLevel) -> Taxonomy {
        let keep = |rank: RankLevel, value: &Option<String>| {
            if rank <= level { value.clone() } else { None }
        };
        Taxonomy {
            phylum: self.phylum.clone(),
            class: keep(RankLevel::Class, &self.class),
            order: keep(RankLevel::Order, &self.order),
            family: keep(RankLevel::Family, &self.family),
            genus: keep(RankLevel::Genus, &self.genus),
            species: keep(RankLevel::Species, &self.species),
            subspecies: None,
        }
    }

    pub fn populated(&self) -> usize {
        [
            &self.phylum,
            &self.class,
            &self.order,
            &self.family,
            &self.genus,
            &self.species,
            &self.subspecies,
        ]
        .iter()
        .filter(|value| value.is_some())
        .count()
    }

    pub fn is_no_match(&self) -> bool {
        self.phylum.as_deref() == Some(NO_MATCH) && self.species.as_deref() == Some(NO_MATCH)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RecordStatus {
    Published,
    Private,
    EarlyRelease,
    NoMatch,
    Other(String),
}

impl RecordStatus {
    pub fn is_private(&self) -> bool {
        matches!(self, RecordStatus::Private | RecordStatus::EarlyRelease)
    }
}

impl From<String> for RecordStatus {
    fn from(value: String) -> Self {
        match value.trim() {
            "Published" => RecordStatus::Published,
            "Private" => RecordStatus::Private,
            "Early-Release" | "Early Release" => RecordStatus::EarlyRelease,
            NO_MATCH => RecordStatus::NoMatch,
            other => RecordStatus::Other(other.to_string()),
        }
    }
}

impl From<RecordStatus> for String {
    fn from(value: RecordStatus) -> Self {
        value.to_string()
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordStatus::Published => write!(f, "Published"),
            RecordStatus::Private => write!(f, "Private"),
            RecordStatus::EarlyRelease => write!(f, "Early-Release"),
            RecordStatus::NoMatch => write!(f, "{NO_MATCH}"),
            RecordStatus::Other(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecimenRecord {
    pub process_id: String,
    pub record_id: Option<String>,
    pub bin_uri: Option<String>,
    pub sex: Option<String>,
    pub life_stage: Option<String>,
    pub country: Option<String>,
    pub identified_by: Option<String>,
    pub identification_method: Option<String>,
    pub institution_storing: Option<String>,
}

impl SpecimenRecord {
    pub fn specimen_url(&self) -> Option<String> {
        self.record_id.as_ref().map(|id| {
            format!(
                "http://www.boldsystems.org/index.php/MAS_DataRetrieval_OpenSpecimen?selectedrecordid={id}"
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateHit {
    pub rank: u32,
    pub taxonomy: Taxonomy,
    pub similarity: Option<f64>,
    pub status: Option<RecordStatus>,
    pub process_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specimen: Option<SpecimenRecord>,
}

impl CandidateHit {
    pub fn sentinel(rank: u32) -> Self {
        Self {
            rank,
            taxonomy: Taxonomy::no_match(),
            similarity: None,
            status: None,
            process_id: None,
            score: None,
            e_value: None,
            specimen: None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.taxonomy.is_no_match()
    }

    pub fn identification_method(&self) -> Option<&str> {
        self.specimen
            .as_ref()
            .and_then(|specimen| specimen.identification_method.as_deref())
    }
}

/// Full candidate set of one record, in rank order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordHits {
    pub id: String,
    pub hits: Vec<CandidateHit>,
    #[serde(default)]
    pub fetch_failed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similarity_bands_are_inclusive() {
        assert_eq!(RankLevel::for_similarity(98.0), RankLevel::Species);
        assert_eq!(RankLevel::for_similarity(97.99), RankLevel::Genus);
        assert_eq!(RankLevel::for_similarity(95.0), RankLevel::Genus);
        assert_eq!(RankLevel::for_similarity(90.0), RankLevel::Family);
        assert_eq!(RankLevel::for_similarity(85.0), RankLevel::Order);
        assert_eq!(RankLevel::for_similarity(84.9), RankLevel::Class);
    }

    #[test]
    fn cascade_order() {
        let mut level = RankLevel::Species;
        let mut thresholds = vec![level.threshold()];
        while let Some(next) = level.coarser() {
            thresholds.push(next.threshold());
            level = next;
        }
        assert_eq!(thresholds, vec![98, 95, 90, 85, 50]);
    }

    #[test]
    fn truncation_blanks_finer_ranks() {
        let taxonomy = Taxonomy {
            phylum: Some("Arthropoda".into()),
            class: Some("Insecta".into()),
            order: Some("Hymenoptera".into()),
            family: Some("Apidae".into()),
            genus: Some("Apis".into()),
            species: Some("mellifera".into()),
            subspecies: Some("carnica".into()),
        };
        let genus = taxonomy.truncated(RankLevel::Genus);
        assert_eq!(genus.genus.as_deref(), Some("Apis"));
        assert_eq!(genus.species, None);
        assert_eq!(genus.subspecies, None);
        assert_eq!(taxonomy.path(RankLevel::Order).len(), 3);
    }

    #[test]
    fn status_round_trips_through_display() {
        let status = RecordStatus::from("Early-Release".to_string());
        assert_eq!(status, RecordStatus::EarlyRelease);
        assert!(status.is_private());
        assert_eq!(status.to_string(), "Early-Release");
    }

    #[test]
    fn parse_engine() {
        assert_eq!("COI".parse::<Engine>().unwrap(), Engine::Coi);
        assert_eq!(Engine::Rbcl.schema(), PageSchema::MultiDb);
        assert!("16s".parse::<Engine>().is_err());
    }
}
