
use std::collections::{BTreeSet, HashMap, HashSet};

use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::similarity::similarity_score;
use crate::taxonomy::QueryRecord;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ClusterParams {
    pub threshold: u8,
    pub max_buckets: usize,
    pub max_candidate_keys: usize,
    pub top_terms: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            threshold: 75,
            max_buckets: 10,
            max_candidate_keys: 200,
            top_terms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterTerm {
    pub normalized_text: String,
    pub frequency: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub id: usize,
    pub members: Vec<ClusterTerm>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterOutcome {
    pub buckets: Vec<Bucket>,
    /// Paired terms that did not land in a bucket: overflow once every
    /// bucket was started, or paired only with keys past the candidate limit.
    pub discarded: Vec<ClusterTerm>,
    pub terms_considered: usize,
    pub pairs_recorded: usize,
    pub unpaired_terms: usize,
}

fn rank_terms(records: &[QueryRecord], top_terms: usize) -> Vec<ClusterTerm> {
    let mut ranked = records
        .iter()
        .filter(|record| !record.normalized_text.is_empty())
        .map(|record| ClusterTerm {
            normalized_text: record.normalized_text.clone(),
            frequency: record.frequency,
        })
        .collect::<Vec<ClusterTerm>>();
    ranked.sort_by(|a, b| {
        b.frequency
            .cmp(&a.frequency)
            .then_with(|| a.normalized_text.cmp(&b.normalized_text))
    });
    let mut seen = HashSet::<String>::new();
    ranked.retain(|term| seen.insert(term.normalized_text.clone()));
    ranked.truncate(top_terms);
    ranked
}

fn similar_pairs(terms: &[ClusterTerm], threshold: u8) -> Vec<(usize, usize)> {
    let mut pairs = (0..terms.len())
        .into_par_iter()
        .flat_map_iter(|left| {
            ((left + 1)..terms.len()).filter_map(move |right| {
                let score =
                    similarity_score(&terms[left].normalized_text, &terms[right].normalized_text);
                (score > threshold).then_some((left, right))
            })
        })
        .collect::<Vec<(usize, usize)>>();
    pairs.sort_unstable();
    pairs
}

fn candidate_keys(pairs: &[(usize, usize)], limit: usize) -> Vec<usize> {
    let mut participation = HashMap::<usize, usize>::new();
    for (left, right) in pairs {
        *participation.entry(*left).or_insert(0) += 1;
        *participation.entry(*right).or_insert(0) += 1;
    }

    let mut ranked = participation.into_iter().collect::<Vec<(usize, usize)>>();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.into_iter().take(limit).map(|(id, _)| id).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Bucket(usize),
    Discard,
}

pub fn cluster(records: &[QueryRecord], params: &ClusterParams) -> ClusterOutcome {
    let terms = rank_terms(records, params.top_terms);
    let pairs = similar_pairs(&terms, params.threshold);
    let keys = candidate_keys(&pairs, params.max_candidate_keys);

    let mut owner = HashMap::<usize, Target>::new();
    let mut members = vec![BTreeSet::<usize>::new(); params.max_buckets];
    let mut consumed = vec![false; pairs.len()];
    let mut started = 0usize;

    for id in keys {
        let target = match owner.get(&id) {
            Some(existing) => *existing,
            None if started < params.max_buckets => {
                started += 1;
                Target::Bucket(started - 1)
            }
            None => Target::Discard,
        };
        place(&mut owner, &mut members, id, target);

        for (index, (left, right)) in pairs.iter().enumerate() {
            if consumed[index] || (*left != id && *right != id) {
                continue;
            }
            consumed[index] = true;
            place(&mut owner, &mut members, *left, target);
            place(&mut owner, &mut members, *right, target);
        }
    }

    let buckets = members
        .into_iter()
        .enumerate()
        .map(|(id, ids)| Bucket {
            id,
            members: ids.into_iter().map(|index| terms[index].clone()).collect(),
        })
        .collect::<Vec<Bucket>>();

    let paired = pairs
        .iter()
        .flat_map(|(left, right)| [*left, *right])
        .collect::<BTreeSet<usize>>();
    let discarded = paired
        .iter()
        .filter(|id| !matches!(owner.get(id), Some(Target::Bucket(_))))
        .map(|id| terms[*id].clone())
        .collect::<Vec<ClusterTerm>>();

    let outcome = ClusterOutcome {
        buckets,
        discarded,
        terms_considered: terms.len(),
        pairs_recorded: pairs.len(),
        unpaired_terms: terms.len() - paired.len(),
    };

    info!(
        terms = outcome.terms_considered,
        pairs = outcome.pairs_recorded,
        buckets_started = started,
        discarded = outcome.discarded.len(),
        unpaired = outcome.unpaired_terms,
        "clustering complete"
    );
    outcome
}

fn place(
    owner: &mut HashMap<usize, Target>,
    members: &mut [BTreeSet<usize>],
    id: usize,
    target: Target,
) {
    if owner.contains_key(&id) {
        return;
    }
    owner.insert(id, target);
    if let Target::Bucket(bucket) = target {
        members[bucket].insert(id);
    }
}
