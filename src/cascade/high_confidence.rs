use anyhow::Result;
use rayon::prelude::*;

use crate::similarity::similarity_score;
use crate::store::ReferenceTable;
use crate::taxonomy::{QueryRecord, Stage, TableKind};

use super::{Candidate, ResolverStage, StageOutput};

pub struct HighConfidenceStage<'a> {
    stored: Option<&'a ReferenceTable>,
    historical: Option<&'a ReferenceTable>,
    threshold: u8,
    min_frequency: u64,
}

impl<'a> HighConfidenceStage<'a> {
    pub fn new(
        stored: Option<&'a ReferenceTable>,
        historical: Option<&'a ReferenceTable>,
        threshold: u8,
        min_frequency: u64,
    ) -> Self {
        Self {
            stored,
            historical,
            threshold: threshold.min(100),
            min_frequency,
        }
    }
}

impl ResolverStage for HighConfidenceStage<'_> {
    fn stage(&self) -> Stage {
        Stage::HighConfidence
    }

    fn resolve(&mut self, pending: &[&QueryRecord]) -> Result<StageOutput> {
        let mut output = StageOutput::default();
        let mut remaining = Vec::<&QueryRecord>::new();

        for record in pending {
            match self
                .stored
                .and_then(|table| table.get(&record.normalized_text))
            {
                Some(entry) => output.candidates.push(Candidate {
                    normalized_text: record.normalized_text.clone(),
                    preferred_term: entry.preferred_term.clone(),
                    semantic_types: entry.semantic_types.clone(),
                    concept_id: entry.concept_id.clone(),
                    source: TableKind::HighConfidence,
                    matched_key: None,
                }),
                None => remaining.push(record),
            }
        }
        output.note("stored_matches", output.candidates.len() as u64);

        let Some(historical) = self.historical else {
            return Ok(output);
        };
        let keys = historical.sorted_keys();
        let eligible = remaining
            .into_iter()
            .filter(|record| record.frequency >= self.min_frequency)
            .collect::<Vec<&QueryRecord>>();
        output.note("near_match_scanned", eligible.len() as u64);

        let threshold = self.threshold;
        let guesses = eligible
            .par_iter()
            .filter_map(|record| {
                best_match(&record.normalized_text, &keys, threshold)
                    .map(|key| (record.normalized_text.clone(), key))
            })
            .collect::<Vec<(String, &str)>>();

        for (normalized_text, key) in guesses {
            let Some(entry) = historical.get(key) else {
                continue;
            };
            output.candidates.push(Candidate {
                normalized_text,
                preferred_term: entry.preferred_term.clone(),
                semantic_types: entry.semantic_types.clone(),
                concept_id: entry.concept_id.clone(),
                source: TableKind::HighConfidence,
                matched_key: Some(key.to_string()),
            });
            output.note("near_matches", 1);
        }

        Ok(output)
    }
}

fn best_match<'k>(text: &str, keys: &[&'k str], threshold: u8) -> Option<&'k str> {
    let mut best: Option<(u8, &'k str)> = None;
    for key in keys {
        if *key == text {
            continue;
        }
        let score = similarity_score(text, key);
        if score < threshold {
            continue;
        }
        if best.is_none_or(|(best_score, _)| score > best_score) {
            best = Some((score, key));
        }
    }
    best.map(|(_, key)| key)
}
