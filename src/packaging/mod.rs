//! Chart packaging
//!
//! Turns discovered chart directories into archives on local disk. Packaging
//! runs sequentially on a background task and feeds a [`PackageStream`] that
//! the storage workers drain concurrently.

mod helm;

pub use helm::{parse_package_path, HelmPackager};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{ChartDir, PackageDescriptor, PackageFile};
use crate::pipeline::{package_channel, PackageStream};

/// Failure to package one chart. Logged and skipped, never fatal.
#[derive(Debug, Error)]
pub enum PackagingError {
    #[error("failed to run {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("packaging {chart} failed ({status}): {stderr}")]
    Failed {
        chart: String,
        status: String,
        stderr: String,
    },

    #[error("packaging {chart} produced no archive path in output: {stdout}")]
    MissingOutput { chart: String, stdout: String },

    #[error("failed to create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{chart} packages to {key}, already produced by {first}")]
    Duplicate {
        chart: String,
        key: String,
        first: PathBuf,
    },

    #[error("{0}")]
    Other(String),
}

/// Packages one chart directory into an archive
#[async_trait]
pub trait ChartPackager: Send + Sync {
    /// Package `chart` into `destination`, returning the archive path
    async fn package(
        &self,
        chart: &ChartDir,
        destination: &Path,
    ) -> Result<PathBuf, PackagingError>;
}

/// Package `charts` one by one on a background task
///
/// Returns immediately. The stream yields one descriptor per chart, failures
/// included, and closes once the last chart is done. Each chart is packaged
/// into its own subdirectory of `destination`. A chart whose archive name was
/// already produced by an earlier chart is reported as a duplicate.
pub fn package_charts(
    packager: Arc<dyn ChartPackager>,
    charts: Vec<ChartDir>,
    destination: PathBuf,
    buffer: usize,
) -> PackageStream {
    let (tx, stream) = package_channel(buffer);

    tokio::spawn(async move {
        let total = charts.len();
        let mut packaged = 0;
        let mut emitted: HashMap<String, PathBuf> = HashMap::new();

        for (index, chart) in charts.into_iter().enumerate() {
            debug!("Packaging chart: {}", chart);

            let output_dir = destination.join(format!("{:04}", index));
            let descriptor = match package_one(packager.as_ref(), &chart, &output_dir).await {
                Ok(file) => match emitted.get(&file.key) {
                    Some(first) => {
                        let err = PackagingError::Duplicate {
                            chart: chart.name.clone(),
                            key: file.key,
                            first: first.clone(),
                        };
                        PackageDescriptor::failed(chart, err)
                    }
                    None => {
                        packaged += 1;
                        info!("Packaged {} -> {}", chart.name, file.key);
                        emitted.insert(file.key.clone(), chart.path.clone());
                        PackageDescriptor::ok(chart, file)
                    }
                },
                Err(e) => PackageDescriptor::failed(chart, e),
            };

            if let Err(descriptor) = tx.send(descriptor).await {
                warn!(
                    "Package stream closed, stopping packaging at {}",
                    descriptor.source
                );
                break;
            }
        }

        debug!("Packaging finished: {}/{} charts packaged", packaged, total);
    });

    stream
}

async fn package_one(
    packager: &dyn ChartPackager,
    chart: &ChartDir,
    output_dir: &Path,
) -> Result<PackageFile, PackagingError> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|source| PackagingError::OutputDir {
            path: output_dir.to_path_buf(),
            source,
        })?;
    let archive = packager.package(chart, output_dir).await?;
    Ok(PackageFile::from_archive(&archive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Writes `<name>-1.0.0.tgz` and fails for charts named `broken`
    struct FakePackager {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChartPackager for FakePackager {
        async fn package(
            &self,
            chart: &ChartDir,
            destination: &Path,
        ) -> Result<PathBuf, PackagingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if chart.name == "broken" {
                return Err(PackagingError::Other("Chart.yaml is invalid".to_string()));
            }
            let archive = destination.join(format!("{}-1.0.0.tgz", chart.name));
            tokio::fs::write(&archive, chart.name.as_bytes()).await.unwrap();
            Ok(archive)
        }
    }

    #[tokio::test]
    async fn test_package_charts_emits_one_descriptor_per_chart() {
        let dir = tempfile::tempdir().unwrap();
        let packager = Arc::new(FakePackager {
            calls: AtomicUsize::new(0),
        });
        let charts = vec![
            ChartDir::new("/src/web"),
            ChartDir::new("/src/broken"),
            ChartDir::new("/src/api"),
        ];

        let stream = package_charts(packager.clone(), charts, dir.path().to_path_buf(), 1);

        let mut seen = Vec::new();
        while let Some(descriptor) = stream.next().await {
            match descriptor.result {
                Ok(file) => seen.push(file.key),
                Err(e) => seen.push(format!("error:{}:{}", descriptor.source.name, e)),
            }
        }

        assert_eq!(
            seen,
            vec![
                "web-1.0.0.tgz".to_string(),
                "error:broken:Chart.yaml is invalid".to_string(),
                "api-1.0.0.tgz".to_string(),
            ]
        );
        assert_eq!(packager.calls.load(Ordering::SeqCst), 3);
        assert!(dir.path().join("0002/api-1.0.0.tgz").is_file());
    }

    #[tokio::test]
    async fn test_same_archive_name_is_reported_once() {
        let dir = tempfile::tempdir().unwrap();
        let packager = Arc::new(FakePackager {
            calls: AtomicUsize::new(0),
        });
        let charts = vec![
            ChartDir::new("/src/team-a/web"),
            ChartDir::new("/src/team-b/web"),
        ];

        let stream = package_charts(packager, charts, dir.path().to_path_buf(), 2);

        let first = stream.next().await.unwrap();
        let file = first.result.unwrap();
        assert_eq!(file.key, "web-1.0.0.tgz");

        let second = stream.next().await.unwrap();
        assert_eq!(second.source.path, PathBuf::from("/src/team-b/web"));
        match second.result {
            Err(PackagingError::Duplicate { key, first, .. }) => {
                assert_eq!(key, "web-1.0.0.tgz");
                assert_eq!(first, PathBuf::from("/src/team-a/web"));
            }
            other => panic!("expected duplicate, got {:?}", other.map(|f| f.key)),
        }
        assert!(stream.next().await.is_none());

        // the first archive is left intact
        assert!(dir.path().join("0000/web-1.0.0.tgz").is_file());
        assert!(dir.path().join("0001/web-1.0.0.tgz").is_file());
    }

    #[tokio::test]
    async fn test_package_charts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let packager = Arc::new(FakePackager {
            calls: AtomicUsize::new(0),
        });
        let stream = package_charts(packager, Vec::new(), dir.path().to_path_buf(), 5);
        assert!(stream.next().await.is_none());
    }
}
