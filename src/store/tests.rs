use super::*;

fn entry(key: &str, term: &str, types: &str) -> ReferenceEntry {
    ReferenceEntry {
        normalized_text: key.to_string(),
        preferred_term: term.to_string(),
        semantic_types: SemanticTypes::parse(types),
        concept_id: None,
        provenance: Provenance::Imported,
    }
}

fn rule(pattern: &str, term: &str, types: &str) -> RuleDefinition {
    RuleDefinition {
        pattern: pattern.to_string(),
        preferred_term: term.to_string(),
        semantic_types: SemanticTypes::parse(types),
        provenance: Provenance::Rule,
    }
}

#[test]
fn append_is_last_write_wins_for_a_key() {
    let mut store = ReferenceStore::open_in_memory().expect("store should open");
    store
        .append(
            TableKind::Historical,
            &[
                entry("flu", "Influenza", "Disease or Syndrome"),
                entry("flu", "Influenza, Human", "Disease or Syndrome"),
            ],
        )
        .expect("append should succeed");
    store
        .append(
            TableKind::Historical,
            &[entry("flu", "Flu Season", "Temporal Concept")],
        )
        .expect("second append should succeed");

    let rows = store
        .load_table(TableKind::Historical)
        .expect("table should load");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].preferred_term, "Flu Season");
    assert_eq!(rows[0].semantic_types.to_pipe_string(), "Temporal Concept");
}

#[test]
fn append_skips_incomplete_entries() {
    let mut store = ReferenceStore::open_in_memory().expect("store should open");
    let written = store
        .append(
            TableKind::Vocabulary,
            &[
                entry("diabetes", "Diabetes Mellitus", "Disease or Syndrome"),
                entry("blank term", "  ", "Finding"),
                entry("blank types", "Something", ""),
            ],
        )
        .expect("append should succeed");
    assert_eq!(written, 1);
}

#[test]
fn append_rejects_unkeyed_tables() {
    let mut store = ReferenceStore::open_in_memory().expect("store should open");
    assert!(
        store
            .append(TableKind::ExternalLookup, &[entry("a", "b", "c")])
            .is_err()
    );
}

#[test]
fn tables_are_kept_apart_by_kind() {
    let mut store = ReferenceStore::open_in_memory().expect("store should open");
    store
        .append(
            TableKind::SiteSpecific,
            &[entry("diabetes", "Diabetes Portal", "Intellectual Product")],
        )
        .expect("append");
    store
        .append(
            TableKind::Vocabulary,
            &[entry("diabetes", "Diabetes Mellitus", "Disease or Syndrome")],
        )
        .expect("append");

    let snapshot = store.snapshot().expect("snapshot");
    let site = snapshot
        .table(TableKind::SiteSpecific)
        .and_then(|table| table.get("diabetes"))
        .expect("site entry");
    let vocabulary = snapshot
        .table(TableKind::Vocabulary)
        .and_then(|table| table.get("diabetes"))
        .expect("vocabulary entry");
    assert_eq!(site.preferred_term, "Diabetes Portal");
    assert_eq!(vocabulary.preferred_term, "Diabetes Mellitus");
    assert_eq!(snapshot.entry_count(), 2);
}

#[test]
fn snapshot_reads_first_match_for_duplicate_rows() {
    let table = ReferenceTable::from_entries(vec![
        entry("flu", "Influenza", "Disease or Syndrome"),
        entry("flu", "Flu Vaccine", "Immunologic Factor"),
    ]);
    assert_eq!(table.len(), 1);
    assert_eq!(
        table.get("flu").map(|value| value.preferred_term.as_str()),
        Some("Influenza")
    );
}

#[test]
fn rules_keep_insertion_order_and_default_their_types() {
    let mut store = ReferenceStore::open_in_memory().expect("store should open");
    store
        .append_rules(&[
            rule("pubmed|pub med", "PubMed/PMC/MEDLINE", "Product-NLM"),
            rule("^covid", "COVID-19", ""),
        ])
        .expect("rules should append");

    let rules = store.load_rules().expect("rules should load");
    let patterns = rules
        .iter()
        .map(|value| value.pattern.as_str())
        .collect::<Vec<&str>>();
    assert_eq!(patterns, vec!["pubmed|pub med", "^covid"]);
    assert_eq!(rules[1].semantic_types.to_pipe_string(), "COVID-19");
}

#[test]
fn append_rules_rejects_invalid_patterns() {
    let mut store = ReferenceStore::open_in_memory().expect("store should open");
    let err = store
        .append_rules(&[rule("(unclosed", "Broken", "Broken")])
        .expect_err("invalid regex should fail");
    assert!(err.to_string().contains("invalid rule pattern"));
    assert!(store.load_rules().expect("rules").is_empty());
}

#[test]
fn table_counts_cover_every_stored_table() {
    let mut store = ReferenceStore::open_in_memory().expect("store should open");
    store
        .append(
            TableKind::Quirky,
            &[entry("xyz clinic", "Clinic", "Health Care Related Organization")],
        )
        .expect("append");
    store
        .append_rules(&[rule("^x{4,6}$", "Unresolved", "Unresolved")])
        .expect("rules");

    let counts = store.table_counts().expect("counts");
    assert_eq!(counts.len(), TableKind::STORED.len());
    let quirky = counts
        .iter()
        .find(|count| count.table == TableKind::Quirky)
        .expect("quirky count");
    let rules = counts
        .iter()
        .find(|count| count.table == TableKind::Rules)
        .expect("rules count");
    assert_eq!(quirky.rows, 1);
    assert_eq!(rules.rows, 1);
}

#[test]
fn open_creates_the_database_file_and_metadata() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("store.sqlite");
    let store = ReferenceStore::open(&path).expect("store should open");

    assert!(path.exists());
    assert_eq!(
        store.metadata("store_schema_version").expect("metadata"),
        Some(STORE_SCHEMA_VERSION.to_string())
    );
    store.set_metadata("last_classify_run", "x").expect("set");
    assert_eq!(
        store.metadata("last_classify_run").expect("metadata"),
        Some("x".to_string())
    );
}

#[test]
fn reopening_a_store_does_not_record_an_open_time() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("store.sqlite");
    let store = ReferenceStore::open(&path).expect("store should open");
    store.set_metadata("last_classify_run", "x").expect("set");
    drop(store);

    let store = ReferenceStore::open(&path).expect("store should reopen");
    assert_eq!(store.metadata("store_opened_at").expect("metadata"), None);
    assert_eq!(
        store.metadata("last_classify_run").expect("metadata"),
        Some("x".to_string())
    );
    assert_eq!(
        store.metadata("store_schema_version").expect("metadata"),
        Some(STORE_SCHEMA_VERSION.to_string())
    );
}
