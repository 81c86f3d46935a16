//! `helm package` invocation

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::domain::ChartDir;

use super::{ChartPackager, PackagingError};

/// Line helm prints once the archive is written
const PACKAGED_MARKER: &str = "Successfully packaged chart and saved it to:";

/// Packages charts with the `helm` CLI
#[derive(Debug, Clone)]
pub struct HelmPackager {
    binary: PathBuf,
    dependency_update: bool,
}

impl HelmPackager {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            dependency_update: false,
        }
    }

    /// Pass `--dependency-update` so `charts/` is rebuilt from `Chart.yaml`
    pub fn with_dependency_update(mut self, enabled: bool) -> Self {
        self.dependency_update = enabled;
        self
    }

    fn command(&self, chart: &ChartDir, destination: &Path) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("package")
            .arg(&chart.path)
            .arg("--destination")
            .arg(destination);
        if self.dependency_update {
            command.arg("--dependency-update");
        }
        command
    }
}

impl Default for HelmPackager {
    fn default() -> Self {
        Self::new("helm")
    }
}

#[async_trait]
impl ChartPackager for HelmPackager {
    #[instrument(skip(self, chart, destination), fields(chart = %chart.name))]
    async fn package(
        &self,
        chart: &ChartDir,
        destination: &Path,
    ) -> Result<PathBuf, PackagingError> {
        let output = self
            .command(chart, destination)
            .output()
            .await
            .map_err(|source| PackagingError::Spawn {
                binary: self.binary.display().to_string(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(stdout = %stdout.trim(), "helm package finished");

        if !output.status.success() {
            return Err(PackagingError::Failed {
                chart: chart.name.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_package_path(&stdout).ok_or_else(|| PackagingError::MissingOutput {
            chart: chart.name.clone(),
            stdout: stdout.trim().to_string(),
        })
    }
}

/// Extract the archive path from `helm package` output
pub fn parse_package_path(stdout: &str) -> Option<PathBuf> {
    stdout
        .lines()
        .find_map(|line| line.split_once(PACKAGED_MARKER))
        .map(|(_, path)| path.trim())
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
}
