//! Provider plugin contract.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::coords::Coordinates;
use crate::dataset::{Attrs, Dataset};
use crate::error::{CutoutError, Result};

/// A feature a provider can produce and the variables it yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSpec {
    pub name: String,
    pub variables: Vec<String>,
}

impl FeatureSpec {
    pub fn new<I, S>(name: impl Into<String>, variables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            variables: variables.into_iter().map(Into::into).collect(),
        }
    }
}

/// Shared token serializing access to rate-limited downloads.
///
/// One lock is created per `prepare` call and handed to every fetch.
/// Providers hold it only around the download itself.
#[derive(Debug, Clone, Default)]
pub struct DownloadLock {
    inner: Arc<Mutex<()>>,
}

impl DownloadLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access. Released when the guard drops.
    pub async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.inner.lock().await
    }
}

/// Everything a provider receives for one feature fetch.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    /// Coordinate frame of the cutout.
    pub frame: &'a Coordinates,
    /// Feature to produce.
    pub feature: &'a str,
    /// Scratch directory for intermediate files, removed after `prepare`.
    pub scratch_dir: &'a Path,
    pub lock: &'a DownloadLock,
    /// Cutout creation parameters, passed through unchanged.
    pub params: &'a Attrs,
}

/// A source of grid data for one or more features.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Unique provider name.
    fn name(&self) -> &str;

    /// Features this provider produces.
    fn features(&self) -> &[FeatureSpec];

    /// Produce the dataset for `request.feature`.
    ///
    /// The result's axes must match (or be a subset of) `request.frame`
    /// and it must contain every variable declared for the feature.
    async fn get_data(&self, request: FetchRequest<'_>) -> anyhow::Result<Dataset>;
}

/// Scratch directory for one `prepare` call.
///
/// A caller-supplied directory is left in place; otherwise a temporary
/// directory is created and removed when this value drops.
#[derive(Debug)]
pub enum ScratchDir {
    Borrowed(PathBuf),
    Owned(TempDir),
}

impl ScratchDir {
    pub fn acquire(requested: Option<&Path>) -> Result<Self> {
        match requested {
            Some(path) => {
                std::fs::create_dir_all(path)
                    .map_err(|e| CutoutError::io("create scratch directory", path, e))?;
                Ok(Self::Borrowed(path.to_path_buf()))
            }
            None => {
                let dir = tempfile::Builder::new()
                    .prefix("georetriever-")
                    .tempdir()
                    .map_err(|e| {
                        CutoutError::io("create scratch directory in", std::env::temp_dir(), e)
                    })?;
                debug!(path = %dir.path().display(), "Created scratch directory");
                Ok(Self::Owned(dir))
            }
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Borrowed(path) => path,
            Self::Owned(dir) => dir.path(),
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }
}
