use std::collections::HashMap;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::ResolveArgs;
use crate::commands::cluster::DISCARD_BUCKET;
use crate::commands::import::{
    PREFERRED_TERM_COLUMNS, SEMANTIC_TYPE_COLUMNS, reference_entries_from_table,
};
use crate::delimited::{DelimitedTable, read_table};
use crate::model::{MANIFEST_VERSION, ResolveRunManifest};
use crate::normalize::Normalizer;
use crate::store::ReferenceStore;
use crate::taxonomy::{Provenance, TableKind};
use crate::util::{
    ensure_directory, now_utc_string, sha256_file, utc_compact_string, write_json_pretty,
};

const BUCKET_COLUMNS: &[&str] = &["bucket"];

pub fn run(args: ResolveArgs) -> Result<()> {
    let started_ts = Utc::now();
    let compact = utc_compact_string(started_ts);
    let run_id = format!("resolve-{compact}");
    let manifest_dir = args.store.manifest_dir();
    ensure_directory(&manifest_dir)?;
    let db_path = args.store.db_path();

    let normalizer = Normalizer::new()?;
    let mut table = read_table(&args.input, args.delimiter)?;
    let filled = fill_from_bucket_labels(&mut table)?;
    let (entries, stats) = reference_entries_from_table(&table, &normalizer, Provenance::Manual)?;

    let mut store = ReferenceStore::open(&db_path)?;
    let appended = store.append(TableKind::Historical, &entries)?;

    let mut warnings = Vec::<String>::new();
    if stats.duplicate_keys > 0 {
        warnings.push(format!(
            "{} rows repeated an earlier key; the later row was kept",
            stats.duplicate_keys
        ));
    }
    for warning in &warnings {
        warn!(warning = %warning, "resolve warning");
    }

    let manifest = ResolveRunManifest {
        manifest_version: MANIFEST_VERSION,
        run_id: run_id.clone(),
        started_at: now_utc_string(),
        input_sha256: sha256_file(&args.input)?,
        input_path: args.input.display().to_string(),
        db_path: db_path.display().to_string(),
        rows_read: stats.rows_read,
        rows_appended: appended,
        rows_filled_from_bucket: filled,
        rows_skipped: stats.dropped_incomplete,
        warnings,
    };
    let manifest_path = manifest_dir.join(format!("resolve_run_{compact}.json"));
    write_json_pretty(&manifest_path, &manifest)?;

    info!(
        run_id = %run_id,
        rows_read = stats.rows_read,
        appended,
        filled_from_bucket = filled,
        skipped = manifest.rows_skipped,
        "manual resolutions appended to historical table"
    );
    Ok(())
}

/// An unlabelled row inherits the first complete label in its bucket.
/// The discard bin is never filled.
fn fill_from_bucket_labels(table: &mut DelimitedTable) -> Result<usize> {
    let Some(bucket_index) = table.column(BUCKET_COLUMNS) else {
        return Ok(0);
    };
    let term_index = table.require_column(PREFERRED_TERM_COLUMNS)?;
    let types_index = table.require_column(SEMANTIC_TYPE_COLUMNS)?;

    let mut labels = HashMap::<String, (String, String)>::new();
    for row in &table.rows {
        let bucket = row.get(bucket_index).trim();
        if bucket.is_empty() || bucket == DISCARD_BUCKET {
            continue;
        }
        let (Some(term), Some(types)) = (
            row.get_opt(Some(term_index)),
            row.get_opt(Some(types_index)),
        ) else {
            continue;
        };
        labels
            .entry(bucket.to_string())
            .or_insert_with(|| (term.to_string(), types.to_string()));
    }

    let mut filled = 0usize;
    for row in &mut table.rows {
        let Some((term, types)) = labels.get(row.get(bucket_index).trim()) else {
            continue;
        };
        if row.get_opt(Some(term_index)).is_some() || row.get_opt(Some(types_index)).is_some() {
            continue;
        }
        let width = term_index.max(types_index) + 1;
        if row.fields.len() < width {
            row.fields.resize(width, String::new());
        }
        row.fields[term_index] = term.clone();
        row.fields[types_index] = types.clone();
        filled += 1;
    }

    Ok(filled)
}
