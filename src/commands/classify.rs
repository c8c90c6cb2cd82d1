use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use crate::cascade::{classify, snapshot_stages};
use crate::cli::ClassifyArgs;
use crate::delimited::write_table;
use crate::ingest::load_query_log;
use crate::lookup::{HttpTerminologyLookup, LookupSettings, LookupStage};
use crate::model::{ClassifyParameters, ClassifyRunManifest, MANIFEST_VERSION, RunPaths};
use crate::normalize::Normalizer;
use crate::report::{
    OUTPUT_HEADER, UNRESOLVED_HEADER, output_rows, summarize, top_semantic_types, unresolved_rows,
};
use crate::store::{ReferenceStore, STORE_SCHEMA_VERSION};
use crate::taxonomy::{ReferenceEntry, TableKind};
use crate::util::{
    ensure_directory, now_utc_string, sha256_file, utc_compact_string, write_json_pretty,
};

const TOP_SEMANTIC_TYPES: usize = 10;

pub fn run(args: ClassifyArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let compact = utc_compact_string(started_ts);
    let run_id = format!("classify-{compact}");

    let manifest_dir = args.store.manifest_dir();
    ensure_directory(&manifest_dir)?;
    let db_path = args.store.db_path();
    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| {
            args.store
                .cache_root
                .join("output")
                .join(format!("classified_{compact}.txt"))
        });
    let unresolved_path = args.unresolved_output.clone().unwrap_or_else(|| {
        args.store
            .cache_root
            .join("output")
            .join(format!("unresolved_{compact}.txt"))
    });
    let manifest_path = args
        .manifest_path
        .clone()
        .unwrap_or_else(|| manifest_dir.join(format!("classify_run_{compact}.json")));

    let mut warnings = Vec::<String>::new();
    let normalizer = Normalizer::new()?;
    let log = load_query_log(&args.input, args.delimiter, &normalizer)?;
    if log.records.is_empty() {
        warnings.push("query log contained no usable rows".to_string());
    }

    let mut store = ReferenceStore::open(&db_path)?;
    let snapshot = store.snapshot()?;
    let lookup_client = build_lookup_client(&args)?;

    let mut stages = snapshot_stages(
        &snapshot,
        !args.no_builtin_rules,
        args.high_confidence_threshold,
        args.high_confidence_min_frequency,
    )?;
    match &lookup_client {
        Some(client) => {
            stages.push(Box::new(LookupStage::new(client, lookup_settings(&args))));
        }
        None => warnings.push("external lookup skipped: no --lookup-endpoint".to_string()),
    }

    let outcome = classify(&log.records, &mut stages)?;
    drop(stages);

    write_table(&output_path, '|', OUTPUT_HEADER, &output_rows(&outcome, &log.records))?;
    write_table(&unresolved_path, '|', UNRESOLVED_HEADER, &unresolved_rows(&outcome))?;

    let conflicts = outcome
        .stage_reports
        .iter()
        .map(|report| report.conflicts)
        .sum::<usize>();
    if conflicts > 0 {
        warnings.push(format!(
            "{conflicts} queries had competing labels inside one stage; table priority decided"
        ));
    }
    for report in &outcome.stage_reports {
        if let Some(gave_up) = report.notes.get("gave_up").filter(|count| **count > 0) {
            warnings.push(format!("{gave_up} lookups gave up after retries"));
        }
        if let Some(skipped) = report
            .notes
            .get("skipped_after_deadline")
            .filter(|count| **count > 0)
        {
            warnings.push(format!("{skipped} lookups skipped after the deadline"));
        }
    }

    let learned_entries = if args.no_learn {
        0
    } else {
        let entries = outcome
            .learned()
            .into_iter()
            .map(|assignment| assignment.to_reference_entry())
            .collect::<Vec<ReferenceEntry>>();
        store.append(TableKind::Historical, &entries)?
    };

    let summary = summarize(&outcome);
    let manifest = ClassifyRunManifest {
        manifest_version: MANIFEST_VERSION,
        run_id: run_id.clone(),
        store_schema_version: STORE_SCHEMA_VERSION.to_string(),
        status: "completed".to_string(),
        started_at,
        updated_at: now_utc_string(),
        command: render_classify_command(&args),
        input_sha256: sha256_file(&args.input)?,
        paths: RunPaths {
            cache_root: args.store.cache_root.display().to_string(),
            manifest_dir: manifest_dir.display().to_string(),
            db_path: db_path.display().to_string(),
            input_path: args.input.display().to_string(),
            output_paths: vec![
                output_path.display().to_string(),
                unresolved_path.display().to_string(),
            ],
        },
        parameters: ClassifyParameters {
            high_confidence_threshold: args.high_confidence_threshold,
            high_confidence_min_frequency: args.high_confidence_min_frequency,
            builtin_rules: !args.no_builtin_rules,
            learn: !args.no_learn,
            lookup_enabled: lookup_client.is_some(),
            lookup_workers: args.lookup.lookup_workers,
            lookup_requests_per_second: args.lookup.lookup_requests_per_second,
            lookup_max_retries: args.lookup.lookup_max_retries,
            lookup_budget: args.lookup.lookup_budget,
        },
        ingest: log.stats.clone(),
        summary: summary.clone(),
        stages: outcome.stage_reports.clone(),
        top_semantic_types: top_semantic_types(&outcome, &log.records, TOP_SEMANTIC_TYPES),
        learned_entries,
        warnings,
    };

    write_json_pretty(&manifest_path, &manifest)?;
    store.set_metadata("last_classify_run", &run_id)?;

    for warning in &manifest.warnings {
        warn!(warning = %warning, "classify warning");
    }
    info!(
        run_id = %run_id,
        assigned = summary.assigned_rows,
        unresolved = summary.unresolved_rows,
        assigned_volume_share = summary.assigned_volume_share,
        learned = learned_entries,
        output = %output_path.display(),
        manifest = %manifest_path.display(),
        "classify completed"
    );
    Ok(())
}

fn build_lookup_client(args: &ClassifyArgs) -> Result<Option<HttpTerminologyLookup>> {
    let Some(endpoint) = args.lookup.lookup_endpoint.as_deref() else {
        return Ok(None);
    };
    let Some(api_key) = args.lookup.lookup_api_key.as_deref() else {
        bail!("--lookup-endpoint needs --lookup-api-key or SITESEARCH_LOOKUP_API_KEY");
    };
    let timeout = Duration::from_millis(args.lookup.lookup_timeout_ms);
    HttpTerminologyLookup::new(endpoint, api_key, timeout).map(Some)
}

fn lookup_settings(args: &ClassifyArgs) -> LookupSettings {
    LookupSettings {
        workers: args.lookup.lookup_workers,
        requests_per_second: args.lookup.lookup_requests_per_second,
        max_retries: args.lookup.lookup_max_retries,
        budget: args.lookup.lookup_budget,
        deadline: args.lookup.lookup_deadline_secs.map(Duration::from_secs),
        ..LookupSettings::default()
    }
}

fn render_classify_command(args: &ClassifyArgs) -> String {
    let mut command = vec![
        "sitesearch".to_string(),
        "classify".to_string(),
        "--cache-root".to_string(),
        args.store.cache_root.display().to_string(),
        "--input".to_string(),
        args.input.display().to_string(),
    ];

    let optional_paths: [(&str, &Option<PathBuf>); 4] = [
        ("--db-path", &args.store.db_path),
        ("--output", &args.output),
        ("--unresolved-output", &args.unresolved_output),
        ("--manifest-path", &args.manifest_path),
    ];
    for (flag, path) in optional_paths {
        if let Some(path) = path {
            command.push(flag.to_string());
            command.push(path.display().to_string());
        }
    }
    if let Some(delimiter) = args.delimiter {
        command.push("--delimiter".to_string());
        command.push(format!("'{delimiter}'"));
    }
    command.push("--high-confidence-threshold".to_string());
    command.push(args.high_confidence_threshold.to_string());
    command.push("--high-confidence-min-frequency".to_string());
    command.push(args.high_confidence_min_frequency.to_string());
    if args.no_builtin_rules {
        command.push("--no-builtin-rules".to_string());
    }
    if args.no_learn {
        command.push("--no-learn".to_string());
    }
    if let Some(endpoint) = &args.lookup.lookup_endpoint {
        command.push("--lookup-endpoint".to_string());
        command.push(endpoint.clone());
        command.push("--lookup-workers".to_string());
        command.push(args.lookup.lookup_workers.to_string());
        command.push("--lookup-requests-per-second".to_string());
        command.push(args.lookup.lookup_requests_per_second.to_string());
        command.push("--lookup-max-retries".to_string());
        command.push(args.lookup.lookup_max_retries.to_string());
        command.push("--lookup-timeout-ms".to_string());
        command.push(args.lookup.lookup_timeout_ms.to_string());
        if let Some(budget) = args.lookup.lookup_budget {
            command.push("--lookup-budget".to_string());
            command.push(budget.to_string());
        }
        if let Some(seconds) = args.lookup.lookup_deadline_secs {
            command.push("--lookup-deadline-secs".to_string());
            command.push(seconds.to_string());
        }
    }

    command.join(" ")
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;
    use crate::cli::{LookupArgs, StoreArgs};
    use crate::taxonomy::{Provenance, SemanticTypes};
    use crate::util::read_json;

    fn args(root: &Path, input: PathBuf, tag: &str) -> ClassifyArgs {
        ClassifyArgs {
            store: StoreArgs {
                cache_root: root.join("cache"),
                db_path: None,
            },
            input,
            delimiter: None,
            output: Some(root.join(format!("classified_{tag}.txt"))),
            unresolved_output: Some(root.join(format!("unresolved_{tag}.txt"))),
            manifest_path: Some(root.join(format!("manifest_{tag}.json"))),
            high_confidence_threshold: 90,
            high_confidence_min_frequency: 2,
            no_builtin_rules: false,
            no_learn: true,
            lookup: LookupArgs {
                lookup_endpoint: None,
                lookup_api_key: Some("secret-key".to_string()),
                lookup_workers: 4,
                lookup_requests_per_second: 20,
                lookup_max_retries: 3,
                lookup_timeout_ms: 5000,
                lookup_budget: None,
                lookup_deadline_secs: None,
            },
        }
    }

    fn seed_store(args: &ClassifyArgs) {
        let mut store = ReferenceStore::open(&args.store.db_path()).expect("store");
        store
            .append(
                TableKind::Vocabulary,
                &[ReferenceEntry {
                    normalized_text: "diabetes".to_string(),
                    preferred_term: "Diabetes Mellitus".to_string(),
                    semantic_types: SemanticTypes::single("Disease or Syndrome"),
                    concept_id: None,
                    provenance: Provenance::Imported,
                }],
            )
            .expect("seed");
    }

    fn write_log(root: &Path) -> PathBuf {
        let input = root.join("queries.csv");
        fs::write(
            &input,
            "Search Term,Total Unique Searches\nDiabetes,5\ndiabetes!,7\nxqzzy42,3\n12345678,1\n",
        )
        .expect("write log");
        input
    }

    #[test]
    fn classify_writes_output_unresolved_and_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = write_log(dir.path());
        let args = args(dir.path(), input, "a");
        seed_store(&args);

        run(args.clone()).expect("classify");

        let output = fs::read_to_string(dir.path().join("classified_a.txt")).expect("output");
        let lines = output.lines().collect::<Vec<&str>>();
        assert_eq!(
            lines[0],
            "normalized_text|preferred_term|semantic_type|frequency|source_stage|concept_id"
        );
        assert_eq!(lines[1], "diabetes|Diabetes Mellitus|Disease or Syndrome|12|4|");
        assert_eq!(lines[2], "12345678|Numeric ID|Numeric ID|1|1|");

        let unresolved =
            fs::read_to_string(dir.path().join("unresolved_a.txt")).expect("unresolved");
        assert_eq!(unresolved, "normalized_text|frequency\nxqzzy42|3\n");

        let manifest: ClassifyRunManifest =
            read_json(&dir.path().join("manifest_a.json")).expect("manifest");
        assert_eq!(manifest.ingest.merged_duplicates, 1);
        assert_eq!(manifest.summary.assigned_rows, 2);
        assert_eq!(manifest.summary.unresolved_volume, 3);
        assert_eq!(manifest.stages.len(), 6);
        assert!(!manifest.parameters.lookup_enabled);
        assert!(!manifest.command.contains("secret-key"));
    }

    #[test]
    fn rerun_on_same_inputs_writes_identical_tables() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = write_log(dir.path());
        let first = args(dir.path(), input.clone(), "first");
        seed_store(&first);

        run(first).expect("first run");
        run(args(dir.path(), input, "second")).expect("second run");

        for name in ["classified", "unresolved"] {
            let left = fs::read_to_string(dir.path().join(format!("{name}_first.txt")))
                .expect("first output");
            let right = fs::read_to_string(dir.path().join(format!("{name}_second.txt")))
                .expect("second output");
            assert_eq!(left, right, "{name} differs between runs");
        }
    }

    #[test]
    fn near_match_is_learned_and_resolved_from_history_next_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("queries.csv");
        fs::write(&input, "Search Term,Total Unique Searches\nheart attacks,4\n")
            .expect("write log");

        let mut first = args(dir.path(), input.clone(), "learn1");
        first.no_learn = false;
        let mut store = ReferenceStore::open(&first.store.db_path()).expect("store");
        store
            .append(
                TableKind::Historical,
                &[ReferenceEntry {
                    normalized_text: "heart attack".to_string(),
                    preferred_term: "Myocardial Infarction".to_string(),
                    semantic_types: SemanticTypes::single("Disease or Syndrome"),
                    concept_id: None,
                    provenance: Provenance::Imported,
                }],
            )
            .expect("seed");
        drop(store);

        run(first).expect("first run");
        let output = fs::read_to_string(dir.path().join("classified_learn1.txt")).expect("output");
        assert!(output.contains("heart attacks|Myocardial Infarction|Disease or Syndrome|4|5|"));
        let manifest: ClassifyRunManifest =
            read_json(&dir.path().join("manifest_learn1.json")).expect("manifest");
        assert_eq!(manifest.learned_entries, 1);

        let store = ReferenceStore::open(&args(dir.path(), input.clone(), "x").store.db_path())
            .expect("store");
        let learned = store
            .load_table(TableKind::Historical)
            .expect("historical")
            .into_iter()
            .find(|entry| entry.normalized_text == "heart attacks")
            .expect("learned entry");
        assert_eq!(learned.provenance, Provenance::HighConfidence);
        assert_eq!(learned.preferred_term, "Myocardial Infarction");
        drop(store);

        let mut second = args(dir.path(), input, "learn2");
        second.no_learn = false;
        run(second).expect("second run");
        let output = fs::read_to_string(dir.path().join("classified_learn2.txt")).expect("output");
        assert!(output.contains("heart attacks|Myocardial Infarction|Disease or Syndrome|4|3|"));
    }

    #[test]
    fn lookup_endpoint_without_key_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = write_log(dir.path());
        let mut args = args(dir.path(), input, "c");
        args.lookup.lookup_endpoint = Some("https://terminology.example.test/rest".to_string());
        args.lookup.lookup_api_key = None;

        let err = run(args).expect_err("missing key should fail");
        assert!(err.to_string().contains("--lookup-api-key"));
    }

    #[test]
    fn render_command_omits_the_api_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut args = args(dir.path(), dir.path().join("q.csv"), "d");
        args.lookup.lookup_endpoint = Some("https://terminology.example.test/rest".to_string());
        args.lookup.lookup_budget = Some(50);
        args.lookup.lookup_deadline_secs = Some(30);

        let command = render_classify_command(&args);
        assert!(command.contains("--lookup-endpoint https://terminology.example.test/rest"));
        assert!(command.contains("--lookup-budget 50"));
        assert!(command.contains("--lookup-timeout-ms 5000"));
        assert!(command.contains("--lookup-deadline-secs 30"));
        assert!(command.contains("--no-learn"));
        assert!(!command.contains("secret-key"));
    }
}
