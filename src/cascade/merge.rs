use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::taxonomy::{Assignment, Stage};

use super::Candidate;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub resolved: usize,
    pub conflicts: usize,
    pub blank: usize,
    pub ignored: usize,
}

pub fn merge(
    assignments: &mut BTreeMap<String, Assignment>,
    stage: Stage,
    offered: &HashSet<&str>,
    incoming: Vec<Candidate>,
) -> MergeSummary {
    let mut summary = MergeSummary::default();
    let mut by_key = HashMap::<String, Candidate>::new();

    for candidate in incoming {
        if !offered.contains(candidate.normalized_text.as_str())
            || assignments.contains_key(&candidate.normalized_text)
        {
            summary.ignored += 1;
            continue;
        }

        match by_key.remove(&candidate.normalized_text) {
            Some(existing) => {
                if !existing.is_blank() && !candidate.is_blank() && !existing.same_label(&candidate)
                {
                    summary.conflicts += 1;
                }
                let merged = coalesce(existing, candidate);
                by_key.insert(merged.normalized_text.clone(), merged);
            }
            None => {
                by_key.insert(candidate.normalized_text.clone(), candidate);
            }
        }
    }

    for (key, candidate) in by_key {
        if candidate.is_blank() {
            summary.blank += 1;
            continue;
        }
        assignments.insert(
            key,
            Assignment {
                normalized_text: candidate.normalized_text,
                preferred_term: candidate.preferred_term.trim().to_string(),
                semantic_types: candidate.semantic_types,
                source_stage: stage,
                source_table: candidate.source,
                concept_id: candidate.concept_id,
                matched_key: candidate.matched_key,
            },
        );
        summary.resolved += 1;
    }

    summary
}

pub fn coalesce(left: Candidate, right: Candidate) -> Candidate {
    match (left.is_blank(), right.is_blank()) {
        (true, false) => return right,
        (false, true) => return left,
        _ => {}
    }

    let left_rank = (left.source.priority(), left.sort_key());
    let right_rank = (right.source.priority(), right.sort_key());
    if right_rank < left_rank { right } else { left }
}
