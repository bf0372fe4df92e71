use crate::errors::TriageError;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const RUN_LOG_EXTENSION: &str = "jsonl";

/// Deletes the oldest run logs in `dir` until their combined size fits the
/// budget. Only `*.jsonl` files are considered, so reports that share the
/// directory are never pruned.
pub fn enforce_total_budget(dir: &Path, budget_bytes: u64) -> Result<Vec<PathBuf>, TriageError> {
    let mut logs = fs::read_dir(dir)
        .map_err(|e| TriageError::Io(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_run_log(path))
        .filter_map(|path| {
            let meta = fs::metadata(&path).ok()?;
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((modified, meta.len(), path))
        })
        .collect::<Vec<_>>();

    logs.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.2.cmp(&b.2)));

    let mut total = logs.iter().map(|(_, len, _)| *len).sum::<u64>();
    let mut deleted = Vec::new();
    for (_, len, path) in logs {
        if total <= budget_bytes {
            break;
        }
        fs::remove_file(&path).map_err(|e| TriageError::Io(e.to_string()))?;
        total = total.saturating_sub(len);
        deleted.push(path);
    }

    Ok(deleted)
}

fn is_run_log(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(RUN_LOG_EXTENSION)
}
