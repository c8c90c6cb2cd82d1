use serde::{Deserialize, Serialize};

use crate::cascade::StageReport;
use crate::ingest::IngestStats;
use crate::report::{ClassifySummary, SemanticTypeVolume};

pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPaths {
    pub cache_root: String,
    pub manifest_dir: String,
    pub db_path: String,
    pub input_path: String,
    pub output_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyParameters {
    pub high_confidence_threshold: u8,
    pub high_confidence_min_frequency: u64,
    pub builtin_rules: bool,
    pub learn: bool,
    pub lookup_enabled: bool,
    pub lookup_workers: usize,
    pub lookup_requests_per_second: u32,
    pub lookup_max_retries: u32,
    pub lookup_budget: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub store_schema_version: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub input_sha256: String,
    pub paths: RunPaths,
    pub parameters: ClassifyParameters,
    pub ingest: IngestStats,
    pub summary: ClassifySummary,
    pub stages: Vec<StageReport>,
    pub top_semantic_types: Vec<SemanticTypeVolume>,
    pub learned_entries: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub input_sha256: String,
    pub input_path: String,
    pub output_path: String,
    pub min_frequency: u64,
    pub threshold: u8,
    pub max_buckets: usize,
    pub max_candidate_keys: usize,
    pub top_terms: usize,
    pub terms_considered: usize,
    pub pairs_recorded: usize,
    pub bucket_sizes: Vec<usize>,
    pub discarded: usize,
    pub unpaired_terms: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub started_at: String,
    pub input_sha256: String,
    pub input_path: String,
    pub db_path: String,
    pub rows_read: usize,
    pub rows_appended: usize,
    pub rows_filled_from_bucket: usize,
    pub rows_skipped: usize,
    pub warnings: Vec<String>,
}
