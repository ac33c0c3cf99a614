use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::domain::{CandidateHit, RankLevel, RecordHits, RecordStatus, Taxonomy};
use crate::flags::{self, Flags};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionMethod {
    /// Descending thresholds, relaxing to coarser ranks when a rank has no
    /// usable group.
    #[default]
    Cascade,
    /// Single threshold from the top similarity, no relaxation.
    Jamp,
    /// Top-ranked row as is.
    FirstHit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusCall {
    pub id: String,
    pub rank_level: Option<RankLevel>,
    pub taxonomy: Taxonomy,
    pub similarity: Option<f64>,
    pub threshold: Option<u8>,
    pub status: Option<RecordStatus>,
    pub process_id: Option<String>,
    pub flags: Option<Flags>,
    #[serde(default)]
    pub fetch_failed: bool,
}

impl ConsensusCall {
    pub fn no_match(id: &str, fetch_failed: bool) -> Self {
        Self {
            id: id.to_string(),
            rank_level: None,
            taxonomy: Taxonomy::default(),
            similarity: None,
            threshold: None,
            status: Some(RecordStatus::NoMatch),
            process_id: None,
            flags: None,
            fetch_failed,
        }
    }

    pub fn is_no_match(&self) -> bool {
        self.rank_level.is_none()
    }
}

/// Hits sharing one taxonomic path, in first-seen order.
#[derive(Debug, Clone)]
pub struct Group<'h> {
    pub path: Vec<Option<&'h str>>,
    pub members: Vec<&'h CandidateHit>,
}

/// Groups rows by their path from phylum down to `level`. With
/// `exclude_missing`, rows that have no value at `level` join no group.
pub fn group_by_path<'h>(
    rows: &[&'h CandidateHit],
    level: RankLevel,
    exclude_missing: bool,
) -> Vec<Group<'h>> {
    let mut groups: Vec<Group<'h>> = Vec::new();
    for &hit in rows {
        if exclude_missing && hit.taxonomy.at(level).is_none() {
            continue;
        }
        let path = hit.taxonomy.path(level);
        match groups.iter_mut().find(|group| group.path == path) {
            Some(group) => group.members.push(hit),
            None => groups.push(Group {
                path,
                members: vec![hit],
            }),
        }
    }
    groups
}

/// Largest group; on equal size the earlier group wins.
fn largest<'g, 'h>(groups: &'g [Group<'h>]) -> Option<&'g Group<'h>> {
    let mut best: Option<&Group<'h>> = None;
    for group in groups {
        if best
            .map(|current| group.members.len() > current.members.len())
            .unwrap_or(true)
        {
            best = Some(group);
        }
    }
    best
}

fn above_threshold(hits: &[CandidateHit], threshold: u8) -> Vec<&CandidateHit> {
    hits.iter()
        .filter(|hit| !hit.is_sentinel())
        .filter(|hit| {
            hit.similarity
                .map(|similarity| similarity >= f64::from(threshold))
                .unwrap_or(false)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsensusResolver {
    method: ResolutionMethod,
}

impl ConsensusResolver {
    pub fn new(method: ResolutionMethod) -> Self {
        Self { method }
    }

    pub fn method(&self) -> ResolutionMethod {
        self.method
    }

    pub fn resolve(&self, record: &RecordHits) -> ConsensusCall {
        self.resolve_hits(&record.id, &record.hits, record.fetch_failed)
    }

    pub fn resolve_hits(&self, id: &str, hits: &[CandidateHit], fetch_failed: bool) -> ConsensusCall {
        let Some(top) = hits.first() else {
            return ConsensusCall::no_match(id, fetch_failed);
        };
        if fetch_failed || top.is_sentinel() {
            return ConsensusCall::no_match(id, fetch_failed);
        }

        let start = top
            .similarity
            .map(RankLevel::for_similarity)
            .unwrap_or(RankLevel::Class);

        match self.method {
            ResolutionMethod::FirstHit => first_hit(id, top, start),
            ResolutionMethod::Jamp => {
                let filtered = above_threshold(hits, start.threshold());
                let groups = group_by_path(&filtered, start, false);
                match largest(&groups) {
                    Some(winner) => build_call(id, hits, &filtered, winner, start),
                    None => ConsensusCall::no_match(id, false),
                }
            }
            ResolutionMethod::Cascade => cascade(id, hits, start),
        }
    }
}

fn cascade(id: &str, hits: &[CandidateHit], start: RankLevel) -> ConsensusCall {
    let mut level = start;
    loop {
        let filtered = above_threshold(hits, level.threshold());
        let groups = group_by_path(&filtered, level, level != RankLevel::Class);
        if let Some(winner) = largest(&groups) {
            return build_call(id, hits, &filtered, winner, level);
        }
        match level.coarser() {
            Some(next) => level = next,
            None => return ConsensusCall::no_match(id, false),
        }
    }
}

fn build_call(
    id: &str,
    hits: &[CandidateHit],
    filtered: &[&CandidateHit],
    winner: &Group<'_>,
    level: RankLevel,
) -> ConsensusCall {
    let representative = representative(hits, &winner.path, level).unwrap_or(winner.members[0]);
    let threshold = level.threshold();
    let taxonomy = if threshold == RankLevel::Species.threshold() {
        representative.taxonomy.clone()
    } else {
        representative.taxonomy.truncated(level)
    };

    ConsensusCall {
        id: id.to_string(),
        rank_level: Some(level),
        taxonomy,
        similarity: winner.members[0].similarity,
        threshold: Some(threshold),
        status: representative.status.clone(),
        process_id: representative.process_id.clone(),
        flags: Some(flags::evaluate(&winner.members, filtered, level)),
        fetch_failed: false,
    }
}

/// Most complete row of the unfiltered list on the winning path.
fn representative<'h>(
    hits: &'h [CandidateHit],
    path: &[Option<&str>],
    level: RankLevel,
) -> Option<&'h CandidateHit> {
    let mut best: Option<&CandidateHit> = None;
    for hit in hits.iter().filter(|hit| !hit.is_sentinel()) {
        if hit.taxonomy.path(level) != path {
            continue;
        }
        if best
            .map(|current| hit.taxonomy.populated() > current.taxonomy.populated())
            .unwrap_or(true)
        {
            best = Some(hit);
        }
    }
    best
}

fn first_hit(id: &str, top: &CandidateHit, level: RankLevel) -> ConsensusCall {
    ConsensusCall {
        id: id.to_string(),
        rank_level: Some(level),
        taxonomy: top.taxonomy.clone(),
        similarity: top.similarity,
        threshold: Some(level.threshold()),
        status: top.status.clone(),
        process_id: top.process_id.clone(),
        flags: None,
        fetch_failed: false,
    }
}
