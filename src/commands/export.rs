use anyhow::Result;
use tracing::info;

use crate::cli::ExportArgs;
use crate::delimited::write_table;
use crate::store::ReferenceStore;
use crate::taxonomy::TableKind;

pub fn run(args: ExportArgs) -> Result<()> {
    let db_path = args.store.db_path();
    let store = ReferenceStore::open(&db_path)?;
    let kind = args.table.kind();

    let rows = if kind == TableKind::Rules {
        let rows = store
            .load_rules()?
            .into_iter()
            .map(|rule| {
                vec![
                    rule.pattern,
                    rule.preferred_term,
                    rule.semantic_types.to_pipe_string(),
                    rule.provenance.as_str().to_string(),
                ]
            })
            .collect::<Vec<Vec<String>>>();
        write_table(
            &args.output,
            '|',
            &["pattern", "preferred_term", "semantic_type", "provenance"],
            &rows,
        )?;
        rows.len()
    } else {
        let rows = store
            .load_table(kind)?
            .into_iter()
            .map(|entry| {
                vec![
                    entry.normalized_text,
                    entry.preferred_term,
                    entry.semantic_types.to_pipe_string(),
                    entry.concept_id.unwrap_or_default(),
                    entry.provenance.as_str().to_string(),
                ]
            })
            .collect::<Vec<Vec<String>>>();
        write_table(
            &args.output,
            '|',
            &[
                "normalized_text",
                "preferred_term",
                "semantic_type",
                "concept_id",
                "provenance",
            ],
            &rows,
        )?;
        rows.len()
    };

    info!(
        table = kind.as_str(),
        output = %args.output.display(),
        rows,
        "export completed"
    );
    Ok(())
}
