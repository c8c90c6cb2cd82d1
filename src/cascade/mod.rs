mod high_confidence;
mod merge;
mod rules;
mod stages;

use std::collections::{BTreeMap, HashSet};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::store::StoreSnapshot;
use crate::taxonomy::{Assignment, QueryRecord, SemanticTypes, Stage, TableKind};
use crate::util::percent;

pub use high_confidence::HighConfidenceStage;
use merge::merge;
pub use rules::RuleStage;
pub use stages::ExactTableStage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub normalized_text: String,
    pub preferred_term: String,
    pub semantic_types: SemanticTypes,
    pub concept_id: Option<String>,
    pub source: TableKind,
    pub matched_key: Option<String>,
}

impl Candidate {
    pub fn is_blank(&self) -> bool {
        self.preferred_term.trim().is_empty() || self.semantic_types.is_empty()
    }

    pub fn same_label(&self, other: &Candidate) -> bool {
        self.preferred_term.trim() == other.preferred_term.trim()
            && self.semantic_types == other.semantic_types
    }

    fn sort_key(&self) -> (&str, &SemanticTypes, Option<&str>, Option<&str>) {
        (
            self.preferred_term.trim(),
            &self.semantic_types,
            self.concept_id.as_deref(),
            self.matched_key.as_deref(),
        )
    }
}

#[derive(Debug, Default)]
pub struct StageOutput {
    pub candidates: Vec<Candidate>,
    pub notes: BTreeMap<String, u64>,
}

impl StageOutput {
    pub fn note(&mut self, key: &str, value: u64) {
        *self.notes.entry(key.to_string()).or_insert(0) += value;
    }
}

pub trait ResolverStage {
    fn stage(&self) -> Stage;

    fn resolve(&mut self, pending: &[&QueryRecord]) -> Result<StageOutput>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub stage_number: u8,
    pub offered: usize,
    pub resolved: usize,
    pub conflicts: usize,
    pub blank_candidates: usize,
    pub assigned_rows: usize,
    pub assigned_volume: u64,
    pub assigned_row_share: f64,
    pub assigned_volume_share: f64,
    pub notes: BTreeMap<String, u64>,
}

#[derive(Debug, Clone)]
pub struct CascadeOutcome {
    pub assignments: BTreeMap<String, Assignment>,
    pub unresolved: Vec<QueryRecord>,
    pub stage_reports: Vec<StageReport>,
    pub total_rows: usize,
    pub total_volume: u64,
}

impl CascadeOutcome {
    pub fn learned(&self) -> Vec<&Assignment> {
        self.assignments
            .values()
            .filter(|assignment| assignment.source_stage.feeds_history())
            .collect()
    }
}

pub fn classify(
    records: &[QueryRecord],
    stages: &mut [Box<dyn ResolverStage + '_>],
) -> Result<CascadeOutcome> {
    stages.sort_by_key(|stage| stage.stage());

    let total_rows = records.len();
    let total_volume = records
        .iter()
        .fold(0u64, |total, record| total.saturating_add(record.frequency));
    let mut assignments = BTreeMap::<String, Assignment>::new();
    let mut stage_reports = Vec::<StageReport>::new();
    let mut assigned_volume = 0u64;

    for resolver in stages.iter_mut() {
        let stage = resolver.stage();
        let pending = records
            .iter()
            .filter(|record| !assignments.contains_key(&record.normalized_text))
            .collect::<Vec<&QueryRecord>>();
        let offered = pending
            .iter()
            .map(|record| record.normalized_text.as_str())
            .collect::<HashSet<&str>>();

        let output = if pending.is_empty() {
            StageOutput::default()
        } else {
            resolver.resolve(&pending)?
        };
        let summary = merge(&mut assignments, stage, &offered, output.candidates);

        assigned_volume = pending
            .iter()
            .filter(|record| {
                assignments
                    .get(&record.normalized_text)
                    .is_some_and(|assignment| assignment.source_stage == stage)
            })
            .fold(assigned_volume, |total, record| {
                total.saturating_add(record.frequency)
            });

        let report = StageReport {
            stage,
            stage_number: stage.number(),
            offered: pending.len(),
            resolved: summary.resolved,
            conflicts: summary.conflicts,
            blank_candidates: summary.blank,
            assigned_rows: assignments.len(),
            assigned_volume,
            assigned_row_share: percent(assignments.len() as u64, total_rows as u64),
            assigned_volume_share: percent(assigned_volume, total_volume),
            notes: output.notes,
        };

        info!(
            stage = stage.as_str(),
            offered = report.offered,
            resolved = report.resolved,
            conflicts = report.conflicts,
            assigned_rows = report.assigned_rows,
            volume_share = report.assigned_volume_share,
            "stage complete"
        );
        stage_reports.push(report);
    }

    let unresolved = records
        .iter()
        .filter(|record| !assignments.contains_key(&record.normalized_text))
        .cloned()
        .collect::<Vec<QueryRecord>>();

    Ok(CascadeOutcome {
        assignments,
        unresolved,
        stage_reports,
        total_rows,
        total_volume,
    })
}

pub fn snapshot_stages<'a>(
    snapshot: &'a StoreSnapshot,
    include_builtin_rules: bool,
    high_confidence_threshold: u8,
    high_confidence_min_frequency: u64,
) -> Result<Vec<Box<dyn ResolverStage + 'a>>> {
    Ok(vec![
        Box::new(RuleStage::new(&snapshot.rules, include_builtin_rules)?),
        Box::new(ExactTableStage::new(
            Stage::SiteSpecific,
            snapshot.table(TableKind::SiteSpecific),
        )),
        Box::new(ExactTableStage::new(
            Stage::Historical,
            snapshot.table(TableKind::Historical),
        )),
        Box::new(ExactTableStage::new(
            Stage::ControlledVocabulary,
            snapshot.table(TableKind::Vocabulary),
        )),
        Box::new(HighConfidenceStage::new(
            snapshot.table(TableKind::HighConfidence),
            snapshot.table(TableKind::Historical),
            high_confidence_threshold,
            high_confidence_min_frequency,
        )),
        Box::new(ExactTableStage::new(
            Stage::Quirky,
            snapshot.table(TableKind::Quirky),
        )),
    ])
}
