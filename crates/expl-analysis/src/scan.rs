use expl_core::{CONFIG_JSON, MODEL_STATE};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A directory holding both the structured config and the trained model.
pub fn is_artifact(dir: &Path) -> bool {
    dir.join(CONFIG_JSON).is_file() && dir.join(MODEL_STATE).is_file()
}

/// Every artifact directory at any depth under `roots`, sorted and without
/// duplicates. Matching directories are descended into as well.
pub fn find_artifacts(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for root in roots {
        if !root.is_dir() {
            continue;
        }
        let walker = WalkDir::new(root).follow_links(false).into_iter();
        for entry in walker.filter_map(|e| e.ok()) {
            if entry.file_type().is_dir() && is_artifact(entry.path()) {
                found.push(entry.into_path());
            }
        }
    }
    found.sort();
    found.dedup();
    found
}
