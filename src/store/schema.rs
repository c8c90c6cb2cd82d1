use anyhow::{Context, Result, bail};
use rusqlite::Connection;

pub const STORE_SCHEMA_VERSION: &str = "0.2.0";

pub(super) fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

pub(super) fn ensure_schema(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS reference_entries (
          table_kind TEXT NOT NULL,
          normalized_text TEXT NOT NULL,
          preferred_term TEXT NOT NULL,
          semantic_types TEXT NOT NULL,
          PRIMARY KEY (table_kind, normalized_text)
        );

        CREATE TABLE IF NOT EXISTS rule_overrides (
          ordinal INTEGER PRIMARY KEY AUTOINCREMENT,
          pattern TEXT NOT NULL UNIQUE,
          preferred_term TEXT NOT NULL,
          semantic_types TEXT NOT NULL
        );
        ",
    )?;

    ensure_column_exists(connection, "reference_entries", "concept_id TEXT")?;
    ensure_column_exists(
        connection,
        "reference_entries",
        "provenance TEXT NOT NULL DEFAULT 'imported'",
    )?;
    ensure_column_exists(connection, "reference_entries", "updated_at TEXT")?;
    ensure_column_exists(
        connection,
        "rule_overrides",
        "provenance TEXT NOT NULL DEFAULT 'rule'",
    )?;

    connection.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_reference_entries_kind ON reference_entries(table_kind);
        CREATE INDEX IF NOT EXISTS idx_reference_entries_provenance ON reference_entries(table_kind, provenance);
        ",
    )?;

    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('store_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value
         WHERE value != excluded.value",
        [STORE_SCHEMA_VERSION],
    )?;

    Ok(())
}

fn ensure_column_exists(
    connection: &Connection,
    table_name: &str,
    column_definition: &str,
) -> Result<()> {
    let Some(column_name) = column_definition.split_whitespace().next() else {
        bail!("invalid column definition: {column_definition}");
    };

    let pragma_sql = format!("PRAGMA table_info({table_name})");
    let mut statement = connection
        .prepare(&pragma_sql)
        .with_context(|| format!("failed to inspect schema for table {table_name}"))?;

    let mut rows = statement.query([])?;
    while let Some(row) = rows.next()? {
        let existing_name: String = row.get(1)?;
        if existing_name == column_name {
            return Ok(());
        }
    }

    let alter_sql = format!("ALTER TABLE {table_name} ADD COLUMN {column_definition}");
    connection
        .execute(&alter_sql, [])
        .with_context(|| format!("failed to add column {column_name} on {table_name}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column_names(connection: &Connection, table: &str) -> Vec<String> {
        let mut statement = connection
            .prepare(&format!("PRAGMA table_info({table})"))
            .expect("pragma should prepare");
        statement
            .query_map([], |row| row.get::<_, String>(1))
            .expect("pragma should run")
            .collect::<rusqlite::Result<Vec<String>>>()
            .expect("columns should decode")
    }

    #[test]
    fn ensure_schema_upgrades_a_first_release_store() {
        let connection = Connection::open_in_memory().expect("in-memory db");
        connection
            .execute_batch(
                "
                CREATE TABLE reference_entries (
                  table_kind TEXT NOT NULL,
                  normalized_text TEXT NOT NULL,
                  preferred_term TEXT NOT NULL,
                  semantic_types TEXT NOT NULL,
                  PRIMARY KEY (table_kind, normalized_text)
                );
                INSERT INTO reference_entries VALUES('historical', 'flu', 'Influenza', 'Disease or Syndrome');
                ",
            )
            .expect("legacy schema");

        ensure_schema(&connection).expect("schema upgrade");
        ensure_schema(&connection).expect("schema upgrade is repeatable");

        let columns = column_names(&connection, "reference_entries");
        assert!(columns.contains(&"concept_id".to_string()));
        assert!(columns.contains(&"provenance".to_string()));

        let provenance: String = connection
            .query_row(
                "SELECT provenance FROM reference_entries WHERE normalized_text = 'flu'",
                [],
                |row| row.get(0),
            )
            .expect("legacy row survives");
        assert_eq!(provenance, "imported");
    }
}
