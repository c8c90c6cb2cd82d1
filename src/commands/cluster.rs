use anyhow::Result;
use chrono::Utc;
use tracing::info;

use crate::cli::ClusterArgs;
use crate::cluster::{ClusterOutcome, ClusterParams, cluster};
use crate::delimited::write_table;
use crate::ingest::load_query_log;
use crate::model::{ClusterRunManifest, MANIFEST_VERSION};
use crate::normalize::Normalizer;
use crate::taxonomy::QueryRecord;
use crate::util::{
    ensure_directory, now_utc_string, sha256_file, utc_compact_string, write_json_pretty,
};

pub const BUCKET_HEADER: &[&str] = &[
    "bucket",
    "normalized_text",
    "frequency",
    "preferred_term",
    "semantic_type",
];

pub(crate) const DISCARD_BUCKET: &str = "discard";

pub fn run(args: ClusterArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let compact = utc_compact_string(started_ts);
    let run_id = format!("cluster-{compact}");

    let manifest_dir = args.cache_root.join("manifests");
    ensure_directory(&manifest_dir)?;
    let output_path = args.output.clone().unwrap_or_else(|| {
        args.cache_root
            .join("output")
            .join(format!("buckets_{compact}.txt"))
    });
    let manifest_path = args
        .manifest_path
        .clone()
        .unwrap_or_else(|| manifest_dir.join(format!("cluster_run_{compact}.json")));

    let normalizer = Normalizer::new()?;
    let log = load_query_log(&args.input, args.delimiter, &normalizer)?;
    let frequent = log
        .records
        .into_iter()
        .filter(|record| record.frequency >= args.min_frequency)
        .collect::<Vec<QueryRecord>>();

    let params = ClusterParams {
        threshold: args.threshold,
        max_buckets: args.buckets,
        max_candidate_keys: args.candidate_keys,
        top_terms: args.top_terms,
    };
    let outcome = cluster(&frequent, &params);
    write_table(&output_path, '|', BUCKET_HEADER, &bucket_rows(&outcome))?;

    let manifest = ClusterRunManifest {
        manifest_version: MANIFEST_VERSION,
        run_id: run_id.clone(),
        started_at,
        updated_at: now_utc_string(),
        command: render_cluster_command(&args),
        input_sha256: sha256_file(&args.input)?,
        input_path: args.input.display().to_string(),
        output_path: output_path.display().to_string(),
        min_frequency: args.min_frequency,
        threshold: params.threshold,
        max_buckets: params.max_buckets,
        max_candidate_keys: params.max_candidate_keys,
        top_terms: params.top_terms,
        terms_considered: outcome.terms_considered,
        pairs_recorded: outcome.pairs_recorded,
        bucket_sizes: outcome
            .buckets
            .iter()
            .map(|bucket| bucket.members.len())
            .collect(),
        discarded: outcome.discarded.len(),
        unpaired_terms: outcome.unpaired_terms,
    };
    write_json_pretty(&manifest_path, &manifest)?;

    info!(
        run_id = %run_id,
        input_terms = frequent.len(),
        output = %output_path.display(),
        manifest = %manifest_path.display(),
        "cluster completed"
    );
    Ok(())
}

pub fn bucket_rows(outcome: &ClusterOutcome) -> Vec<Vec<String>> {
    let bucketed = outcome.buckets.iter().flat_map(|bucket| {
        bucket
            .members
            .iter()
            .map(move |term| (bucket.id.to_string(), term))
    });
    let discarded = outcome
        .discarded
        .iter()
        .map(|term| (DISCARD_BUCKET.to_string(), term));

    bucketed
        .chain(discarded)
        .map(|(bucket, term)| {
            vec![
                bucket,
                term.normalized_text.clone(),
                term.frequency.to_string(),
                String::new(),
                String::new(),
            ]
        })
        .collect()
}

fn render_cluster_command(args: &ClusterArgs) -> String {
    let mut command = vec![
        "sitesearch".to_string(),
        "cluster".to_string(),
        "--cache-root".to_string(),
        args.cache_root.display().to_string(),
        "--input".to_string(),
        args.input.display().to_string(),
        "--threshold".to_string(),
        args.threshold.to_string(),
        "--buckets".to_string(),
        args.buckets.to_string(),
        "--candidate-keys".to_string(),
        args.candidate_keys.to_string(),
        "--top-terms".to_string(),
        args.top_terms.to_string(),
        "--min-frequency".to_string(),
        args.min_frequency.to_string(),
    ];
    if let Some(path) = &args.output {
        command.push("--output".to_string());
        command.push(path.display().to_string());
    }
    if let Some(path) = &args.manifest_path {
        command.push("--manifest-path".to_string());
        command.push(path.display().to_string());
    }

    command.join(" ")
}
