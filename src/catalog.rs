//! Save-slot catalog: summary-only reads for listing saved games.

use anyhow::{anyhow, Context, Result};
use log::{debug, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::compress::open_snapshot;
use crate::consts::SAVE_EXT;
use crate::metrics;
use crate::savefile::{read_summary_from, SaveSummary};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryEntry {
    pub path: PathBuf,
    pub summary: SaveSummary,
}

/// Header + summary only; the body (and its CRC) is never touched.
/// A summary with an empty root identifier is an error.
pub fn read_summary(path: &Path) -> Result<SaveSummary> {
    let mut r = open_snapshot(path)?;
    let summary = read_summary_from(&mut r).with_context(|| format!("read summary {}", path.display()))?;
    if !summary.is_valid() {
        return Err(anyhow!(
            "{}: summary has no map (url '{}')",
            path.display(),
            summary.url
        ));
    }
    metrics::record_summary_read();
    Ok(summary)
}

/// Every readable `*.usx` in `dir`, sorted by path. Unreadable files are skipped.
/// A missing directory is an empty catalog.
pub fn list_summaries(dir: &Path) -> Result<Vec<SummaryEntry>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read_dir {}", dir.display()))? {
        let entry = entry?;
        let p = entry.path();
        if !p.is_file() {
            continue;
        }
        let is_save = p
            .extension()
            .map(|e| e.eq_ignore_ascii_case(SAVE_EXT))
            .unwrap_or(false);
        if is_save {
            paths.push(p);
        }
    }
    paths.sort();

    let mut out = Vec::with_capacity(paths.len());
    for path in paths {
        match read_summary(&path) {
            Ok(summary) => {
                debug!("catalog: {} -> {}", path.display(), summary.map());
                out.push(SummaryEntry { path, summary });
            }
            Err(e) => warn!("catalog: skip {}: {:#}", path.display(), e),
        }
    }
    Ok(out)
}
