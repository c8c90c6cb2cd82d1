use anyhow::Result;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::model::ClassifyRunManifest;
use crate::store::ReferenceStore;
use crate::util::{latest_manifest_path, read_json};

pub fn run(args: StatusArgs) -> Result<()> {
    let manifest_dir = args.store.manifest_dir();
    let db_path = args.store.db_path();

    info!(cache_root = %args.store.cache_root.display(), "status requested");

    if db_path.exists() {
        let store = ReferenceStore::open(&db_path)?;
        info!(
            path = %db_path.display(),
            schema_version = %store.metadata("store_schema_version")?.unwrap_or_default(),
            last_classify_run = %store.metadata("last_classify_run")?.unwrap_or_default(),
            "reference store status"
        );
        for count in store.table_counts()? {
            info!(table = count.table.as_str(), rows = count.rows, "table rows");
        }
    } else {
        warn!(path = %db_path.display(), "reference store missing");
    }

    match latest_manifest_path(&manifest_dir, "classify_run_")? {
        Some(path) => {
            let manifest: ClassifyRunManifest = read_json(&path)?;
            info!(
                run_id = %manifest.run_id,
                status = %manifest.status,
                updated_at = %manifest.updated_at,
                rows = manifest.summary.total_rows,
                assigned_rows = manifest.summary.assigned_rows,
                assigned_volume_share = manifest.summary.assigned_volume_share,
                learned_entries = manifest.learned_entries,
                warnings = manifest.warnings.len(),
                "latest classify run"
            );
            for stage in &manifest.stages {
                info!(
                    stage = stage.stage.as_str(),
                    resolved = stage.resolved,
                    conflicts = stage.conflicts,
                    assigned_volume_share = stage.assigned_volume_share,
                    "stage result"
                );
            }
        }
        None => warn!(path = %manifest_dir.display(), "no classify manifest found"),
    }

    Ok(())
}
