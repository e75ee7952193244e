//! The cutout entity: a grid dataset bound to its backing file.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::{debug, info};

use crate::catalog::{AvailableFeature, FeatureCatalog};
use crate::config::RetrieverConfig;
use crate::coords::{CutoutParams, CRS};
use crate::dataset::{AttrValue, Dataset};
use crate::error::Result;
use crate::mode::{to_object, to_storable};
use crate::persist::{read_cutout, write_atomic, WriteOptions};

/// A cutout and its persisted path.
///
/// The in-memory dataset is loaded from `path` on first access and dropped
/// again after every successful write, so the next access reads the file
/// that was just committed.
#[derive(Debug)]
pub struct CutoutStore {
    path: PathBuf,
    data: OnceLock<Dataset>,
    write_options: WriteOptions,
}

fn load_object(path: &Path) -> Result<Dataset> {
    to_object(read_cutout(path)?)
}

impl CutoutStore {
    /// Build a new, not yet persisted cutout.
    pub fn create(
        path: impl Into<PathBuf>,
        params: &CutoutParams,
        config: &RetrieverConfig,
    ) -> Result<Self> {
        let path = path.into();
        let (coords, mut attrs) = params.build(config.default_step)?;
        attrs.insert(
            crate::dataset::PREPARED_FEATURES.to_string(),
            AttrValue::List(Vec::new()),
        );

        info!(
            path = %path.display(),
            nx = coords.x.len(),
            ny = coords.y.len(),
            nt = coords.time.as_ref().map(Vec::len).unwrap_or(0),
            "Building new cutout"
        );

        let data = OnceLock::from(Dataset::new(coords).with_attrs(attrs));
        Ok(Self {
            path,
            data,
            write_options: config.write_options(),
        })
    }

    /// Bind to an existing file without reading it.
    pub fn bind(path: impl Into<PathBuf>, config: &RetrieverConfig) -> Self {
        Self {
            path: path.into(),
            data: OnceLock::new(),
            write_options: config.write_options(),
        }
    }

    /// Open an existing cutout and load it in object mode.
    pub async fn open(path: impl Into<PathBuf>, config: &RetrieverConfig) -> Result<Self> {
        let store = Self::bind(path, config);
        store.load().await?;
        Ok(store)
    }

    /// Bind to `path` if it exists, otherwise build a new cutout from `params`.
    pub fn open_or_create(
        path: impl Into<PathBuf>,
        params: Option<&CutoutParams>,
        config: &RetrieverConfig,
    ) -> Result<Self> {
        let path = path.into();
        if path.is_file() {
            if params.is_some() {
                info!(
                    path = %path.display(),
                    "Cutout file exists, ignoring construction parameters"
                );
            }
            return Ok(Self::bind(path, config));
        }
        let default_params = CutoutParams::default();
        Self::create(path, params.unwrap_or(&default_params), config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without extensions.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .and_then(|n| n.split('.').next().map(str::to_string))
            .unwrap_or_default()
    }

    pub fn crs(&self) -> &'static str {
        CRS
    }

    pub fn write_options(&self) -> WriteOptions {
        self.write_options
    }

    pub fn is_loaded(&self) -> bool {
        self.data.get().is_some()
    }

    /// The in-memory dataset, reading the file if needed.
    pub fn dataset(&self) -> Result<&Dataset> {
        if let Some(dataset) = self.data.get() {
            return Ok(dataset);
        }
        let dataset = load_object(&self.path)?;
        Ok(self.data.get_or_init(|| dataset))
    }

    /// Async form of [`CutoutStore::dataset`]; file reads run on the blocking pool.
    pub async fn load(&self) -> Result<&Dataset> {
        if let Some(dataset) = self.data.get() {
            return Ok(dataset);
        }
        let path = self.path.clone();
        let dataset = tokio::task::spawn_blocking(move || load_object(&path)).await??;
        debug!(path = %self.path.display(), "Loaded cutout");
        Ok(self.data.get_or_init(|| dataset))
    }

    /// Forget the in-memory dataset after the file was replaced.
    pub(crate) fn mark_persisted(&mut self) {
        self.data = OnceLock::new();
    }

    pub fn prepared_features(&self) -> Result<BTreeSet<String>> {
        Ok(self.dataset()?.prepared_features())
    }

    pub fn dx(&self) -> Result<Option<f64>> {
        Ok(self.dataset()?.coords.dx())
    }

    pub fn dy(&self) -> Result<Option<f64>> {
        Ok(self.dataset()?.coords.dy())
    }

    /// `[x0, x1, y0, y1]` including half a cell on each side.
    pub fn extent(&self) -> Result<Option<[f64; 4]>> {
        Ok(self.dataset()?.coords.extent())
    }

    pub fn bounds(&self) -> Result<Option<[f64; 4]>> {
        Ok(self.dataset()?.coords.bounds())
    }

    pub fn chunks(&self) -> Result<Option<BTreeMap<String, i64>>> {
        Ok(self.dataset()?.chunks())
    }

    /// Catalog features whose variables are all present in the dataset.
    pub fn available_features(&self, catalog: &FeatureCatalog) -> Result<Vec<AvailableFeature>> {
        let dataset = self.dataset()?;
        Ok(catalog
            .list_available(None)?
            .into_iter()
            .filter(|entry| entry.variables.iter().all(|v| dataset.contains(v)))
            .collect())
    }

    /// Whether every catalog feature has been prepared.
    pub fn is_prepared(&self, catalog: &FeatureCatalog) -> Result<bool> {
        let prepared = self.prepared_features()?;
        Ok(catalog.feature_names().iter().all(|f| prepared.contains(f)))
    }

    /// Write a storable copy of the cutout to another path.
    pub async fn export(&self, target: impl Into<PathBuf>) -> Result<()> {
        let target = target.into();
        let snapshot = self.load().await?.clone();
        let options = self.write_options;
        let written = target.clone();
        tokio::task::spawn_blocking(move || {
            write_atomic(&to_storable(snapshot)?, &written, options)
        })
        .await??;
        info!(from = %self.path.display(), to = %target.display(), "Exported cutout");
        Ok(())
    }
}

impl std::fmt::Display for CutoutStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.data.get() {
            Some(ds) => {
                let prepared: Vec<String> = ds.prepared_features().into_iter().collect();
                write!(
                    f,
                    "<Cutout \"{}\" x={} y={} time={} prepared_features={:?}>",
                    self.name(),
                    ds.coords.x.len(),
                    ds.coords.y.len(),
                    ds.coords.time.as_ref().map(Vec::len).unwrap_or(0),
                    prepared
                )
            }
            None => write!(f, "<Cutout \"{}\" (not loaded)>", self.name()),
        }
    }
}
