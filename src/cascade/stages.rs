use anyhow::Result;

use crate::store::ReferenceTable;
use crate::taxonomy::{QueryRecord, Stage};

use super::{Candidate, ResolverStage, StageOutput};

pub struct ExactTableStage<'a> {
    stage: Stage,
    table: Option<&'a ReferenceTable>,
}

impl<'a> ExactTableStage<'a> {
    pub fn new(stage: Stage, table: Option<&'a ReferenceTable>) -> Self {
        Self { stage, table }
    }
}

impl ResolverStage for ExactTableStage<'_> {
    fn stage(&self) -> Stage {
        self.stage
    }

    fn resolve(&mut self, pending: &[&QueryRecord]) -> Result<StageOutput> {
        let mut output = StageOutput::default();
        let Some(table) = self.table else {
            return Ok(output);
        };

        for record in pending {
            if let Some(entry) = table.get(&record.normalized_text) {
                output.candidates.push(Candidate {
                    normalized_text: record.normalized_text.clone(),
                    preferred_term: entry.preferred_term.clone(),
                    semantic_types: entry.semantic_types.clone(),
                    concept_id: entry.concept_id.clone(),
                    source: self.stage.table(),
                    matched_key: None,
                });
            }
        }

        output.note("table_entries", table.len() as u64);
        Ok(output)
    }
}
