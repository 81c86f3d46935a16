//! Chart and package descriptors flowing through the publish pipeline

use std::fmt;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::packaging::PackagingError;

/// A chart source directory found by discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartDir {
    /// Absolute or source-relative path of the directory holding `Chart.yaml`
    pub path: PathBuf,
    /// Directory name, used for logging
    pub name: String,
}

impl ChartDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { path, name }
    }
}

impl fmt::Display for ChartDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Package content, either on local disk or already in memory
#[derive(Debug, Clone)]
pub enum Payload {
    File(PathBuf),
    Bytes(Bytes),
}

impl Payload {
    /// Load the full payload into memory
    pub async fn read(&self) -> std::io::Result<Bytes> {
        match self {
            Payload::File(path) => tokio::fs::read(path).await.map(Bytes::from),
            Payload::Bytes(bytes) => Ok(bytes.clone()),
        }
    }
}

/// A successfully packaged chart, ready to be stored under `key`
#[derive(Debug, Clone)]
pub struct PackageFile {
    /// Destination name relative to the store root, e.g. `nginx-1.2.0.tgz`
    pub key: String,
    pub payload: Payload,
}

impl PackageFile {
    /// Describe an archive on disk
    ///
    /// The key is the archive file name (`<chart>-<version>.tgz`), so the same
    /// chart version always lands on the same object.
    pub fn from_archive(archive: &Path) -> Self {
        let key = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            key,
            payload: Payload::File(archive.to_path_buf()),
        }
    }

    pub fn from_bytes(key: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            payload: Payload::Bytes(data.into()),
        }
    }

    /// MIME type sent along with the object
    pub fn content_type(&self) -> &'static str {
        if self.key.ends_with(".tgz") || self.key.ends_with(".tar.gz") {
            "application/gzip"
        } else {
            "application/octet-stream"
        }
    }
}

/// One packaging outcome, produced exactly once per discovered chart
#[derive(Debug)]
pub struct PackageDescriptor {
    /// Chart the descriptor was produced from
    pub source: ChartDir,
    pub result: Result<PackageFile, PackagingError>,
}

impl PackageDescriptor {
    pub fn ok(source: ChartDir, file: PackageFile) -> Self {
        Self {
            source,
            result: Ok(file),
        }
    }

    pub fn failed(source: ChartDir, error: PackagingError) -> Self {
        Self {
            source,
            result: Err(error),
        }
    }
}

/// Join a key prefix and a file name with exactly one `/` between them
pub fn object_key(prefix: &str, file_name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let file_name = file_name.trim_start_matches('/');
    if prefix.is_empty() {
        file_name.to_string()
    } else {
        format!("{}/{}", prefix, file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key() {
        assert_eq!(object_key("", "nginx-1.0.0.tgz"), "nginx-1.0.0.tgz");
        assert_eq!(object_key("charts", "nginx-1.0.0.tgz"), "charts/nginx-1.0.0.tgz");
        assert_eq!(
            object_key("/stable/charts/", "nginx-1.0.0.tgz"),
            "stable/charts/nginx-1.0.0.tgz"
        );
    }

    #[test]
    fn test_package_file_from_archive() {
        let file = PackageFile::from_archive(Path::new("/tmp/out/redis-2.3.1.tgz"));
        assert_eq!(file.key, "redis-2.3.1.tgz");
        assert_eq!(file.content_type(), "application/gzip");
        assert!(matches!(
            file.payload,
            Payload::File(ref p) if p == Path::new("/tmp/out/redis-2.3.1.tgz")
        ));
    }

    #[test]
    fn test_chart_dir_name() {
        let chart = ChartDir::new("/src/charts/api");
        assert_eq!(chart.name, "api");
        assert_eq!(chart.to_string(), "/src/charts/api");
    }

    #[tokio::test]
    async fn test_payload_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tgz");
        std::fs::write(&path, b"archive").unwrap();

        let from_file = Payload::File(path).read().await.unwrap();
        assert_eq!(&from_file[..], b"archive");

        let from_bytes = Payload::Bytes(Bytes::from_static(b"inline")).read().await.unwrap();
        assert_eq!(&from_bytes[..], b"inline");

        let missing = Payload::File(dir.path().join("missing.tgz")).read().await;
        assert!(missing.is_err());
    }
}
