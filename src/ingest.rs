use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::delimited::{DelimitedTable, read_table};
use crate::normalize::Normalizer;
use crate::taxonomy::QueryRecord;

const QUERY_COLUMNS: &[&str] = &[
    "query",
    "search term",
    "search query",
    "raw query text",
    "adjusted query term",
    "normalized text",
    "text",
];
const FREQUENCY_COLUMNS: &[&str] = &[
    "frequency",
    "total search freq",
    "total unique searches",
    "times searched",
    "clicks",
    "count",
];

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct IngestStats {
    pub rows_read: usize,
    pub rows_kept: usize,
    pub dropped_bad_frequency: usize,
    pub dropped_empty_after_normalize: usize,
    pub merged_duplicates: usize,
    pub unique_queries: usize,
    pub total_volume: u64,
}

#[derive(Debug, Clone)]
pub struct QueryLog {
    pub records: Vec<QueryRecord>,
    pub stats: IngestStats,
}

pub fn load_query_log(
    path: &Path,
    delimiter: Option<char>,
    normalizer: &Normalizer,
) -> Result<QueryLog> {
    let table = read_table(path, delimiter)?;
    let log = build_query_log(&table, normalizer);

    info!(
        path = %path.display(),
        rows = log.stats.rows_read,
        unique = log.stats.unique_queries,
        volume = log.stats.total_volume,
        dropped_bad_frequency = log.stats.dropped_bad_frequency,
        dropped_empty = log.stats.dropped_empty_after_normalize,
        "loaded query log"
    );

    Ok(log)
}

pub fn build_query_log(table: &DelimitedTable, normalizer: &Normalizer) -> QueryLog {
    let headed = (
        table.column(QUERY_COLUMNS),
        table.column(FREQUENCY_COLUMNS),
    );
    let (query_index, frequency_index, header_is_data) = match headed {
        (Some(query), Some(frequency)) => (query, frequency, false),
        _ => (0, 1, parse_frequency(table.header.get(1).map(String::as_str)).is_some()),
    };

    let mut raw_rows = Vec::<(usize, Vec<String>)>::new();
    if header_is_data {
        raw_rows.push((1, table.header.clone()));
    }
    raw_rows.extend(
        table
            .rows
            .iter()
            .map(|row| (row.line_number, row.fields.clone())),
    );

    let mut stats = IngestStats::default();
    let mut index_by_key = HashMap::<String, usize>::new();
    let mut records = Vec::<QueryRecord>::new();

    for (line_number, fields) in raw_rows {
        stats.rows_read += 1;

        let raw_text = fields.get(query_index).map(String::as_str).unwrap_or("");
        let Some(frequency) = parse_frequency(fields.get(frequency_index).map(String::as_str))
        else {
            debug!(line = line_number, "dropping row with unusable frequency");
            stats.dropped_bad_frequency += 1;
            continue;
        };

        let normalized_text = normalizer.normalize(raw_text);
        if normalized_text.is_empty() {
            debug!(line = line_number, "dropping row that normalizes to empty text");
            stats.dropped_empty_after_normalize += 1;
            continue;
        }

        stats.rows_kept += 1;
        stats.total_volume = stats.total_volume.saturating_add(frequency);

        if let Some(existing) = index_by_key.get(&normalized_text) {
            let slot = &mut records[*existing].frequency;
            *slot = slot.saturating_add(frequency);
            stats.merged_duplicates += 1;
            continue;
        }

        index_by_key.insert(normalized_text.clone(), records.len());
        records.push(QueryRecord {
            raw_text: raw_text.trim().to_string(),
            normalized_text,
            frequency,
        });
    }

    stats.unique_queries = records.len();
    QueryLog { records, stats }
}

fn parse_frequency(raw: Option<&str>) -> Option<u64> {
    let cleaned = raw?.trim().replace([',', '_', ' '], "");
    let cleaned = cleaned.strip_suffix(".0").unwrap_or(&cleaned);
    let value = cleaned.parse::<u64>().ok()?;
    (value > 0).then_some(value)
}
