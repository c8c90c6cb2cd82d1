use std::collections::HashMap;

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cli::ImportArgs;
use crate::delimited::{DelimitedTable, read_table};
use crate::normalize::Normalizer;
use crate::store::{ReferenceStore, RuleDefinition};
use crate::taxonomy::{Provenance, ReferenceEntry, SemanticTypes, TableKind};

pub(crate) const KEY_COLUMNS: &[&str] = &[
    "normalized_text",
    "adjusted query term",
    "query",
    "search term",
    "term",
];
pub(crate) const PREFERRED_TERM_COLUMNS: &[&str] = &["preferred_term", "preferred term", "label"];
pub(crate) const SEMANTIC_TYPE_COLUMNS: &[&str] = &[
    "semantic_type",
    "semantic_types",
    "semantic type",
    "semtypename",
];
pub(crate) const CONCEPT_ID_COLUMNS: &[&str] = &["concept_id", "cui", "ui"];
const PATTERN_COLUMNS: &[&str] = &["pattern", "regex", "rule"];

#[derive(Debug, Default, Clone, Serialize)]
pub struct ImportStats {
    pub rows_read: usize,
    pub rows_kept: usize,
    pub dropped_incomplete: usize,
    pub duplicate_keys: usize,
}

pub fn run(args: ImportArgs) -> Result<()> {
    let db_path = args.store.db_path();
    let kind = args.table.kind();
    let table = read_table(&args.input, args.delimiter)?;
    let mut store = ReferenceStore::open(&db_path)?;

    let (written, stats) = match kind {
        TableKind::Rules => {
            let (rules, stats) = rules_from_table(&table)?;
            (store.append_rules(&rules)?, stats)
        }
        _ => {
            let normalizer = Normalizer::new()?;
            let (entries, stats) =
                reference_entries_from_table(&table, &normalizer, Provenance::Imported)?;
            (store.append(kind, &entries)?, stats)
        }
    };

    if stats.dropped_incomplete > 0 || stats.duplicate_keys > 0 {
        warn!(
            dropped_incomplete = stats.dropped_incomplete,
            duplicate_keys = stats.duplicate_keys,
            "some input rows were not imported"
        );
    }

    info!(
        input = %args.input.display(),
        table = kind.as_str(),
        db_path = %db_path.display(),
        rows_read = stats.rows_read,
        written,
        "import completed"
    );
    Ok(())
}

pub(crate) fn reference_entries_from_table(
    table: &DelimitedTable,
    normalizer: &Normalizer,
    provenance: Provenance,
) -> Result<(Vec<ReferenceEntry>, ImportStats)> {
    let key_index = table.require_column(KEY_COLUMNS)?;
    let term_index = table.require_column(PREFERRED_TERM_COLUMNS)?;
    let types_index = table.require_column(SEMANTIC_TYPE_COLUMNS)?;
    let concept_index = table.column(CONCEPT_ID_COLUMNS);

    let mut stats = ImportStats::default();
    let mut index_by_key = HashMap::<String, usize>::new();
    let mut entries = Vec::<ReferenceEntry>::new();

    for row in &table.rows {
        stats.rows_read += 1;

        let entry = ReferenceEntry {
            normalized_text: normalizer.normalize(row.get(key_index)),
            preferred_term: row.get(term_index).trim().to_string(),
            semantic_types: SemanticTypes::parse(row.get(types_index)),
            concept_id: row.get_opt(concept_index).map(str::to_string),
            provenance,
        };
        if !entry.is_complete() {
            debug!(line = row.line_number, "skipping incomplete reference row");
            stats.dropped_incomplete += 1;
            continue;
        }
        if let Some(existing) = index_by_key.get(&entry.normalized_text) {
            stats.duplicate_keys += 1;
            entries[*existing] = entry;
            continue;
        }

        stats.rows_kept += 1;
        index_by_key.insert(entry.normalized_text.clone(), entries.len());
        entries.push(entry);
    }

    Ok((entries, stats))
}

fn rules_from_table(table: &DelimitedTable) -> Result<(Vec<RuleDefinition>, ImportStats)> {
    let pattern_index = table.require_column(PATTERN_COLUMNS)?;
    let term_index = table.require_column(PREFERRED_TERM_COLUMNS)?;
    let types_index = table.column(SEMANTIC_TYPE_COLUMNS);

    let mut stats = ImportStats::default();
    let mut index_by_pattern = HashMap::<String, usize>::new();
    let mut rules = Vec::<RuleDefinition>::new();

    for row in &table.rows {
        stats.rows_read += 1;

        let pattern = row.get(pattern_index).trim();
        let preferred_term = row.get(term_index).trim();
        if pattern.is_empty() || preferred_term.is_empty() {
            stats.dropped_incomplete += 1;
            continue;
        }
        let rule = RuleDefinition {
            pattern: pattern.to_string(),
            preferred_term: preferred_term.to_string(),
            semantic_types: row
                .get_opt(types_index)
                .map(SemanticTypes::parse)
                .unwrap_or_default(),
            provenance: Provenance::Rule,
        };
        if let Some(existing) = index_by_pattern.get(pattern) {
            stats.duplicate_keys += 1;
            rules[*existing] = rule;
            continue;
        }

        stats.rows_kept += 1;
        index_by_pattern.insert(pattern.to_string(), rules.len());
        rules.push(rule);
    }

    if rules.is_empty() && stats.rows_read > 0 {
        bail!("no usable rules in input ({} rows read)", stats.rows_read);
    }
    Ok((rules, stats))
}
