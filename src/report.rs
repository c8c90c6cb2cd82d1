use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cascade::CascadeOutcome;
use crate::taxonomy::QueryRecord;
use crate::util::percent;

pub const OUTPUT_HEADER: &[&str] = &[
    "normalized_text",
    "preferred_term",
    "semantic_type",
    "frequency",
    "source_stage",
    "concept_id",
];

pub const UNRESOLVED_HEADER: &[&str] = &["normalized_text", "frequency"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifySummary {
    pub total_rows: usize,
    pub total_volume: u64,
    pub assigned_rows: usize,
    pub assigned_volume: u64,
    pub unresolved_rows: usize,
    pub unresolved_volume: u64,
    pub assigned_row_share: f64,
    pub assigned_volume_share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticTypeVolume {
    pub semantic_type: String,
    pub rows: usize,
    pub volume: u64,
    pub volume_share: f64,
}

pub fn summarize(outcome: &CascadeOutcome) -> ClassifySummary {
    let unresolved_volume = outcome
        .unresolved
        .iter()
        .fold(0u64, |total, record| total.saturating_add(record.frequency));
    let assigned_volume = outcome.total_volume.saturating_sub(unresolved_volume);
    let assigned_rows = outcome.assignments.len();

    ClassifySummary {
        total_rows: outcome.total_rows,
        total_volume: outcome.total_volume,
        assigned_rows,
        assigned_volume,
        unresolved_rows: outcome.unresolved.len(),
        unresolved_volume,
        assigned_row_share: percent(assigned_rows as u64, outcome.total_rows as u64),
        assigned_volume_share: percent(assigned_volume, outcome.total_volume),
    }
}

pub fn top_semantic_types(
    outcome: &CascadeOutcome,
    records: &[QueryRecord],
    limit: usize,
) -> Vec<SemanticTypeVolume> {
    let mut totals = HashMap::<&str, (usize, u64)>::new();
    for record in records {
        let Some(assignment) = outcome.assignments.get(&record.normalized_text) else {
            continue;
        };
        for semantic_type in assignment.semantic_types.iter() {
            let slot = totals.entry(semantic_type).or_insert((0, 0));
            slot.0 += 1;
            slot.1 = slot.1.saturating_add(record.frequency);
        }
    }

    let mut ranked = totals
        .into_iter()
        .map(|(semantic_type, (rows, volume))| SemanticTypeVolume {
            semantic_type: semantic_type.to_string(),
            rows,
            volume,
            volume_share: percent(volume, outcome.total_volume),
        })
        .collect::<Vec<SemanticTypeVolume>>();
    ranked.sort_by(|a, b| {
        b.volume
            .cmp(&a.volume)
            .then_with(|| a.semantic_type.cmp(&b.semantic_type))
    });
    ranked.truncate(limit);
    ranked
}

fn by_frequency<'r>(records: impl Iterator<Item = &'r QueryRecord>) -> Vec<&'r QueryRecord> {
    let mut ordered = records.collect::<Vec<&QueryRecord>>();
    ordered.sort_by(|a, b| {
        b.frequency
            .cmp(&a.frequency)
            .then_with(|| a.normalized_text.cmp(&b.normalized_text))
    });
    ordered
}

pub fn output_rows(outcome: &CascadeOutcome, records: &[QueryRecord]) -> Vec<Vec<String>> {
    by_frequency(records.iter())
        .into_iter()
        .filter_map(|record| {
            let assignment = outcome.assignments.get(&record.normalized_text)?;
            Some(vec![
                assignment.normalized_text.clone(),
                assignment.preferred_term.clone(),
                assignment.semantic_types.to_pipe_string(),
                record.frequency.to_string(),
                assignment.source_stage.number().to_string(),
                assignment.concept_id.clone().unwrap_or_default(),
            ])
        })
        .collect()
}

pub fn unresolved_rows(outcome: &CascadeOutcome) -> Vec<Vec<String>> {
    by_frequency(outcome.unresolved.iter())
        .into_iter()
        .map(|record| vec![record.normalized_text.clone(), record.frequency.to_string()])
        .collect()
}
