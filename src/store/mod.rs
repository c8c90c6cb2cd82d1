mod schema;
mod snapshot;
#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use regex::Regex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::info;

use crate::taxonomy::{Provenance, ReferenceEntry, SemanticTypes, TableKind};
use crate::util::{ensure_directory, now_utc_string};

pub use schema::STORE_SCHEMA_VERSION;
pub use snapshot::{ReferenceTable, StoreSnapshot};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleDefinition {
    pub pattern: String,
    pub preferred_term: String,
    pub semantic_types: SemanticTypes,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableCount {
    pub table: TableKind,
    pub rows: i64,
}

pub struct ReferenceStore {
    connection: Connection,
    location: String,
}

impl ReferenceStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                ensure_directory(parent)?;
            }
        }

        let connection = Connection::open(db_path)
            .with_context(|| format!("failed to open {}", db_path.display()))?;
        schema::configure_connection(&connection)?;
        schema::ensure_schema(&connection)?;

        Ok(Self {
            connection,
            location: db_path.display().to_string(),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory reference store")?;
        schema::ensure_schema(&connection)?;
        Ok(Self {
            connection,
            location: ":memory:".to_string(),
        })
    }

    pub fn default_path(cache_root: &Path) -> PathBuf {
        cache_root.join("reference_store.sqlite")
    }

    pub fn append(&mut self, table: TableKind, entries: &[ReferenceEntry]) -> Result<usize> {
        if matches!(table, TableKind::Rules | TableKind::ExternalLookup) {
            bail!("table {} does not hold keyed entries", table.as_str());
        }

        let now = now_utc_string();
        let tx = self.connection.transaction()?;
        let mut written = 0usize;

        {
            let mut statement = tx.prepare(
                "
                INSERT INTO reference_entries(
                  table_kind, normalized_text, preferred_term, semantic_types,
                  concept_id, provenance, updated_at
                )
                VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(table_kind, normalized_text) DO UPDATE SET
                  preferred_term=excluded.preferred_term,
                  semantic_types=excluded.semantic_types,
                  concept_id=excluded.concept_id,
                  provenance=excluded.provenance,
                  updated_at=excluded.updated_at
                ",
            )?;

            for entry in entries.iter().filter(|entry| entry.is_complete()) {
                statement.execute(params![
                    table.as_str(),
                    &entry.normalized_text,
                    entry.preferred_term.trim(),
                    entry.semantic_types.to_pipe_string(),
                    entry.concept_id.as_deref(),
                    entry.provenance.as_str(),
                    &now,
                ])?;
                written += 1;
            }
        }

        tx.commit()
            .with_context(|| format!("failed to commit append to {}", table.as_str()))?;

        info!(
            table = table.as_str(),
            offered = entries.len(),
            written,
            "appended reference entries"
        );
        Ok(written)
    }

    pub fn append_rules(&mut self, rules: &[RuleDefinition]) -> Result<usize> {
        for rule in rules {
            Regex::new(&rule.pattern)
                .with_context(|| format!("invalid rule pattern: {}", rule.pattern))?;
        }

        let tx = self.connection.transaction()?;
        let mut written = 0usize;

        {
            let mut statement = tx.prepare(
                "
                INSERT INTO rule_overrides(pattern, preferred_term, semantic_types, provenance)
                VALUES(?1, ?2, ?3, ?4)
                ON CONFLICT(pattern) DO UPDATE SET
                  preferred_term=excluded.preferred_term,
                  semantic_types=excluded.semantic_types,
                  provenance=excluded.provenance
                ",
            )?;

            for rule in rules {
                if rule.preferred_term.trim().is_empty() {
                    continue;
                }
                let semantic_types = if rule.semantic_types.is_empty() {
                    SemanticTypes::single(&rule.preferred_term)
                } else {
                    rule.semantic_types.clone()
                };
                statement.execute(params![
                    &rule.pattern,
                    rule.preferred_term.trim(),
                    semantic_types.to_pipe_string(),
                    rule.provenance.as_str(),
                ])?;
                written += 1;
            }
        }

        tx.commit().context("failed to commit rule overrides")?;
        info!(offered = rules.len(), written, "appended rule overrides");
        Ok(written)
    }

    pub fn load_table(&self, table: TableKind) -> Result<Vec<ReferenceEntry>> {
        let mut statement = self.connection.prepare(
            "
            SELECT normalized_text, preferred_term, semantic_types, concept_id, provenance
            FROM reference_entries
            WHERE table_kind = ?1
            ORDER BY rowid
            ",
        )?;

        let rows = statement.query_map([table.as_str()], |row| {
            let semantic_types: String = row.get(2)?;
            let provenance: String = row.get(4)?;
            Ok(ReferenceEntry {
                normalized_text: row.get(0)?,
                preferred_term: row.get(1)?,
                semantic_types: SemanticTypes::parse(&semantic_types),
                concept_id: row.get(3)?,
                provenance: Provenance::parse_lenient(&provenance),
            })
        })?;

        let mut entries = Vec::<ReferenceEntry>::new();
        for row in rows {
            entries.push(row.with_context(|| format!("failed to decode {} row", table.as_str()))?);
        }
        Ok(entries)
    }

    pub fn load_rules(&self) -> Result<Vec<RuleDefinition>> {
        let mut statement = self.connection.prepare(
            "
            SELECT pattern, preferred_term, semantic_types, provenance
            FROM rule_overrides
            ORDER BY ordinal
            ",
        )?;

        let rows = statement.query_map([], |row| {
            let semantic_types: String = row.get(2)?;
            let provenance: String = row.get(3)?;
            Ok(RuleDefinition {
                pattern: row.get(0)?,
                preferred_term: row.get(1)?,
                semantic_types: SemanticTypes::parse(&semantic_types),
                provenance: Provenance::parse_lenient(&provenance),
            })
        })?;

        let mut rules = Vec::<RuleDefinition>::new();
        for row in rows {
            rules.push(row.context("failed to decode rule override row")?);
        }
        Ok(rules)
    }

    pub fn snapshot(&self) -> Result<StoreSnapshot> {
        let mut snapshot = StoreSnapshot::default();
        snapshot.rules = self.load_rules()?;
        for table in TableKind::STORED {
            if table == TableKind::Rules {
                continue;
            }
            let entries = self.load_table(table)?;
            snapshot.insert_table(table, ReferenceTable::from_entries(entries));
        }

        info!(
            store = %self.location,
            rules = snapshot.rules.len(),
            entries = snapshot.entry_count(),
            "loaded reference store snapshot"
        );
        Ok(snapshot)
    }

    pub fn table_counts(&self) -> Result<Vec<TableCount>> {
        let mut counts = Vec::<TableCount>::new();
        for table in TableKind::STORED {
            let rows = if table == TableKind::Rules {
                self.connection
                    .query_row("SELECT COUNT(*) FROM rule_overrides", [], |row| row.get(0))?
            } else {
                self.connection.query_row(
                    "SELECT COUNT(*) FROM reference_entries WHERE table_kind = ?1",
                    [table.as_str()],
                    |row| row.get(0),
                )?
            };
            counts.push(TableCount { table, rows });
        }
        Ok(counts)
    }

    pub fn metadata(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .connection
            .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.connection.execute(
            "INSERT INTO metadata(key, value) VALUES(?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            [key, value],
        )?;
        Ok(())
    }
}
