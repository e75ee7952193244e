//! In-memory provider doubles.
//!
//! [`FakeProvider`] produces `(y, x)` grids for the requested frame and
//! records every call so tests can assert on idempotence, concurrency and
//! scratch-directory handling.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use geo_cutout::{
    AttrValue, Attrs, Coordinates, Dataset, FeatureSpec, FetchRequest, Provider, Variable,
    VariableData, LITHOLOGY_VARIABLE,
};

use crate::generators::create_lithology_cells;

/// How a [`FakeProvider`] misbehaves.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Fail every fetch of this feature with the given message.
    Fail { feature: String, message: String },
    /// Shift the returned x axis by this many degrees.
    ShiftX(f64),
    /// Leave this variable out of the result.
    Omit(String),
}

/// One recorded `get_data` call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub feature: String,
    pub scratch_dir: PathBuf,
    pub params: Attrs,
}

/// Configurable in-memory provider.
#[derive(Debug)]
pub struct FakeProvider {
    name: String,
    features: Vec<FeatureSpec>,
    faults: Vec<Fault>,
    fill: f64,
    attrs: Attrs,
    delay: Duration,
    fetch_delay: Duration,
    calls: Mutex<Vec<RecordedCall>>,
    in_fetch: AtomicUsize,
    max_in_fetch: AtomicUsize,
    in_download: AtomicUsize,
    max_in_download: AtomicUsize,
}

impl FakeProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            features: Vec::new(),
            faults: Vec::new(),
            fill: 0.0,
            attrs: Attrs::new(),
            delay: Duration::from_millis(0),
            fetch_delay: Duration::from_millis(0),
            calls: Mutex::new(Vec::new()),
            in_fetch: AtomicUsize::new(0),
            max_in_fetch: AtomicUsize::new(0),
            in_download: AtomicUsize::new(0),
            max_in_download: AtomicUsize::new(0),
        }
    }

    /// Declare a feature and its variables.
    pub fn with_feature(mut self, feature: &str, variables: &[&str]) -> Self {
        self.features
            .push(FeatureSpec::new(feature, variables.iter().copied()));
        self
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }

    /// Offset added to every float cell, to tell fetches apart.
    pub fn with_fill(mut self, fill: f64) -> Self {
        self.fill = fill;
        self
    }

    /// Dataset attribute attached to every result.
    pub fn with_attr(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }

    /// Time spent holding the download lock per fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Time spent per fetch before taking the download lock.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    /// Total number of `get_data` calls.
    pub fn calls(&self) -> usize {
        self.recorded().len()
    }

    /// Number of calls for one feature.
    pub fn calls_for(&self, feature: &str) -> usize {
        self.recorded().iter().filter(|c| c.feature == feature).count()
    }

    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Highest number of fetches seen inside the download section at once.
    pub fn max_concurrent_downloads(&self) -> usize {
        self.max_in_download.load(Ordering::SeqCst)
    }

    /// Highest number of fetches seen in flight at once, outside the lock.
    pub fn max_concurrent_fetches(&self) -> usize {
        self.max_in_fetch.load(Ordering::SeqCst)
    }

    fn fault_for(&self, feature: &str) -> Option<&str> {
        self.faults.iter().find_map(|f| match f {
            Fault::Fail { feature: failing, message } if failing == feature => {
                Some(message.as_str())
            }
            _ => None,
        })
    }

    fn x_shift(&self) -> f64 {
        self.faults
            .iter()
            .map(|f| match f {
                Fault::ShiftX(dx) => *dx,
                _ => 0.0,
            })
            .sum()
    }

    fn omitted(&self, variable: &str) -> bool {
        self.faults
            .iter()
            .any(|f| matches!(f, Fault::Omit(v) if v == variable))
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn features(&self) -> &[FeatureSpec] {
        &self.features
    }

    async fn get_data(&self, request: FetchRequest<'_>) -> anyhow::Result<Dataset> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                feature: request.feature.to_string(),
                scratch_dir: request.scratch_dir.to_path_buf(),
                params: request.params.clone(),
            });
        }

        let now = self.in_fetch.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_fetch.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.fetch_delay).await;
        self.in_fetch.fetch_sub(1, Ordering::SeqCst);

        {
            let _guard = request.lock.acquire().await;
            let now = self.in_download.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_download.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_download.fetch_sub(1, Ordering::SeqCst);
        }

        if let Some(message) = self.fault_for(request.feature) {
            anyhow::bail!("{}", message);
        }

        let shift = self.x_shift();
        let frame = Coordinates::spatial(
            request.frame.x.iter().map(|x| x + shift).collect(),
            request.frame.y.clone(),
        );
        let cells = frame.x.len() * frame.y.len();

        let spec = self
            .features
            .iter()
            .find(|f| f.name == request.feature)
            .ok_or_else(|| {
                anyhow::anyhow!("{} does not provide {}", self.name, request.feature)
            })?;

        let mut dataset = Dataset::new(frame).with_attrs(self.attrs.clone());
        for (k, name) in spec.variables.iter().enumerate() {
            if self.omitted(name) {
                continue;
            }
            let data = if name == LITHOLOGY_VARIABLE {
                VariableData::Lithology(create_lithology_cells(cells))
            } else {
                VariableData::Float(
                    (0..cells)
                        .map(|i| self.fill + (k * 100 + i) as f64)
                        .collect(),
                )
            };
            dataset.insert_variable(name.clone(), Variable::new(["y", "x"], data))?;
        }
        Ok(dataset)
    }
}
