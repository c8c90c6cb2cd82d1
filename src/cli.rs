use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::store::ReferenceStore;
use crate::taxonomy::TableKind;

#[derive(Parser, Debug)]
#[command(
    name = "sitesearch",
    version,
    about = "Classify site-search queries into a semantic taxonomy"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Import(ImportArgs),
    Export(ExportArgs),
    Classify(ClassifyArgs),
    Cluster(ClusterArgs),
    Resolve(ResolveArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(long, default_value = ".cache/sitesearch")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}

impl StoreArgs {
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| ReferenceStore::default_path(&self.cache_root))
    }

    pub fn manifest_dir(&self) -> PathBuf {
        self.cache_root.join("manifests")
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum StoreTable {
    Rules,
    SiteSpecific,
    Historical,
    Vocabulary,
    HighConfidence,
    Quirky,
}

impl StoreTable {
    pub fn kind(self) -> TableKind {
        match self {
            Self::Rules => TableKind::Rules,
            Self::SiteSpecific => TableKind::SiteSpecific,
            Self::Historical => TableKind::Historical,
            Self::Vocabulary => TableKind::Vocabulary,
            Self::HighConfidence => TableKind::HighConfidence,
            Self::Quirky => TableKind::Quirky,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ImportArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long, value_enum)]
    pub table: StoreTable,

    #[arg(long)]
    pub input: PathBuf,

    #[arg(long)]
    pub delimiter: Option<char>,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long, value_enum)]
    pub table: StoreTable,

    #[arg(long)]
    pub output: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct ClassifyArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub input: PathBuf,

    #[arg(long)]
    pub delimiter: Option<char>,

    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub unresolved_output: Option<PathBuf>,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[arg(long, default_value_t = 90, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub high_confidence_threshold: u8,

    #[arg(long, default_value_t = 2)]
    pub high_confidence_min_frequency: u64,

    #[arg(long, default_value_t = false)]
    pub no_builtin_rules: bool,

    #[arg(long, default_value_t = false)]
    pub no_learn: bool,

    #[command(flatten)]
    pub lookup: LookupArgs,
}

#[derive(Args, Debug, Clone)]
pub struct LookupArgs {
    #[arg(long)]
    pub lookup_endpoint: Option<String>,

    #[arg(long, env = "SITESEARCH_LOOKUP_API_KEY", hide_env_values = true)]
    pub lookup_api_key: Option<String>,

    #[arg(long, default_value_t = 4)]
    pub lookup_workers: usize,

    #[arg(long, default_value_t = 20)]
    pub lookup_requests_per_second: u32,

    #[arg(long, default_value_t = 3)]
    pub lookup_max_retries: u32,

    #[arg(long, default_value_t = 5000)]
    pub lookup_timeout_ms: u64,

    #[arg(long)]
    pub lookup_budget: Option<usize>,

    #[arg(long)]
    pub lookup_deadline_secs: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct ClusterArgs {
    #[arg(long, default_value = ".cache/sitesearch")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub input: PathBuf,

    #[arg(long)]
    pub delimiter: Option<char>,

    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[arg(long, default_value_t = 75, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub threshold: u8,

    #[arg(long, default_value_t = 10)]
    pub buckets: usize,

    #[arg(long, default_value_t = 200)]
    pub candidate_keys: usize,

    #[arg(long, default_value_t = 2000)]
    pub top_terms: usize,

    #[arg(long, default_value_t = 2)]
    pub min_frequency: u64,
}

#[derive(Args, Debug, Clone)]
pub struct ResolveArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub input: PathBuf,

    #[arg(long)]
    pub delimiter: Option<char>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub store: StoreArgs,
}
