//! Chart discovery
//!
//! Walks a source tree and returns every directory holding a `Chart.yaml`,
//! skipping excluded and hidden directories.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::domain::ChartDir;

/// File that marks a directory as a chart
pub const CHART_FILE: &str = "Chart.yaml";

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("source dir {0} does not exist or is not a directory")]
    NotADirectory(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("discovery task failed: {0}")]
    Aborted(String),
}

/// Exclusion rules applied while walking the tree
#[derive(Debug, Clone, Default)]
struct Exclusions {
    patterns: Vec<String>,
}

impl Exclusions {
    fn new(patterns: &[String]) -> Self {
        Self {
            patterns: patterns
                .iter()
                .map(|p| p.trim().trim_start_matches("./").trim_end_matches('/').to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// A directory is excluded when its name or its path relative to the
    /// source root equals one of the patterns
    fn matches(&self, name: &str, relative: &Path) -> bool {
        let relative = relative.to_string_lossy();
        self.patterns
            .iter()
            .any(|p| p == name || *p == relative)
    }
}

/// Find all charts below `source_dir`
///
/// A chart directory is not descended into, so its `charts/` subcharts are
/// packaged together with it. The result is sorted by path.
#[instrument]
pub fn find_charts(source_dir: &Path, exclude: &[String]) -> Result<Vec<ChartDir>, DiscoveryError> {
    if !source_dir.is_dir() {
        return Err(DiscoveryError::NotADirectory(source_dir.to_path_buf()));
    }

    let exclusions = Exclusions::new(exclude);
    let mut charts = Vec::new();
    walk(source_dir, source_dir, &exclusions, &mut charts)?;
    charts.sort_by(|a, b| a.path.cmp(&b.path));

    info!("Found {} charts in {}", charts.len(), source_dir.display());
    Ok(charts)
}

fn walk(
    root: &Path,
    dir: &Path,
    exclusions: &Exclusions,
    charts: &mut Vec<ChartDir>,
) -> Result<(), DiscoveryError> {
    if dir.join(CHART_FILE).is_file() {
        debug!("Found chart: {}", dir.display());
        charts.push(ChartDir::new(dir));
        return Ok(());
    }

    let io_err = |source| DiscoveryError::Io {
        path: dir.to_path_buf(),
        source,
    };

    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if !path.is_dir() {
            continue;
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.starts_with('.') {
            continue;
        }

        let relative = path.strip_prefix(root).unwrap_or(&path);
        if exclusions.matches(&name, relative) {
            debug!("Excluding directory: {}", path.display());
            continue;
        }

        walk(root, &path, exclusions, charts)?;
    }

    Ok(())
}
