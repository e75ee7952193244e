//! Aquifer depth from a gridded crustal model.
//!
//! The source is a tab-separated table with one header line and columns
//! `X Y UC LC AVCRUST Topo Basement UC/LC Moho`. The `Basement` depth is
//! interpolated onto the cutout grid by inverse-distance weighting over the
//! nearest samples.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use geo_cutout::{Coordinates, Dataset, FeatureSpec, FetchRequest, Provider, Variable, VariableData};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use crate::config::AquiferDepthConfig;
use crate::error::{ProviderError, Result};

pub const PROVIDER_NAME: &str = "aquifer_depth";
pub const FEATURE: &str = "aquifer_depth";
pub const VARIABLE: &str = "aquifer_depth";

const X_COLUMN: usize = 0;
const Y_COLUMN: usize = 1;
const BASEMENT_COLUMN: usize = 6;

/// One table row reduced to what the interpolation needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthSample {
    pub x: f64,
    pub y: f64,
    pub basement: f64,
}

/// Parse the crustal model table. Rows with a non-finite depth are dropped.
pub fn read_table<R: Read>(reader: R, source: &Path) -> Result<Vec<DepthSample>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut samples = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let column = |index: usize| -> Result<f64> {
            let field = record.get(index).ok_or_else(|| {
                ProviderError::table(source, format!("row {} has no column {}", row + 2, index + 1))
            })?;
            field.parse().map_err(|_| {
                let reason = format!("row {}: {:?} is not a number", row + 2, field);
                ProviderError::table(source, reason)
            })
        };

        let sample = DepthSample {
            x: column(X_COLUMN)?,
            y: column(Y_COLUMN)?,
            basement: column(BASEMENT_COLUMN)?,
        };
        if sample.basement.is_finite() {
            samples.push(sample);
        }
    }

    if samples.is_empty() {
        return Err(ProviderError::table(source, "no usable rows"));
    }
    Ok(samples)
}

/// Read the table from disk.
pub fn load_table(path: &Path) -> Result<Vec<DepthSample>> {
    let file = std::fs::File::open(path).map_err(|source| ProviderError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    read_table(std::io::BufReader::new(file), path)
}

/// Inverse-distance weighting over scattered samples.
#[derive(Debug, Clone)]
pub struct IdwInterpolator {
    neighbours: usize,
    power: f64,
    max_distance: f64,
}

impl IdwInterpolator {
    pub fn new(config: &AquiferDepthConfig) -> Self {
        Self {
            neighbours: config.neighbours.max(1),
            power: config.power,
            max_distance: config.max_distance_deg,
        }
    }

    /// Value at one point, `NaN` when no sample lies within range.
    pub fn at(&self, samples: &[DepthSample], x: f64, y: f64) -> f64 {
        let mut near: Vec<(f64, f64)> = samples
            .iter()
            .map(|s| ((s.x - x).hypot(s.y - y), s.basement))
            .filter(|(d, _)| *d <= self.max_distance)
            .collect();

        if near.is_empty() {
            return f64::NAN;
        }

        near.sort_by(|a, b| a.0.total_cmp(&b.0));
        near.truncate(self.neighbours);

        // Coincident sample.
        if near[0].0 < 1e-12 {
            return near[0].1;
        }

        let (weighted, total) = near.iter().fold((0.0, 0.0), |(sum, weight), (d, v)| {
            let w = d.powf(-self.power);
            (sum + w * v, weight + w)
        });
        weighted / total
    }

    /// Values for every cell of a `(y, x)` grid, row-major.
    pub fn grid(&self, samples: &[DepthSample], frame: &Coordinates) -> Vec<f64> {
        frame
            .y
            .iter()
            .flat_map(|&y| frame.x.iter().map(move |&x| (x, y)))
            .map(|(x, y)| self.at(samples, x, y))
            .collect()
    }
}

/// Provider for the `aquifer_depth` feature.
///
/// The table is read on first use and shared by later fetches.
#[derive(Debug)]
pub struct AquiferDepthProvider {
    table_path: Option<PathBuf>,
    interpolator: IdwInterpolator,
    samples: OnceCell<Arc<Vec<DepthSample>>>,
    features: Vec<FeatureSpec>,
}

impl AquiferDepthProvider {
    pub fn new(config: &AquiferDepthConfig) -> Self {
        Self {
            table_path: config.table_path.clone(),
            interpolator: IdwInterpolator::new(config),
            samples: OnceCell::new(),
            features: vec![FeatureSpec::new(FEATURE, [VARIABLE])],
        }
    }

    /// Provider over samples already in memory.
    pub fn with_samples(config: &AquiferDepthConfig, samples: Vec<DepthSample>) -> Self {
        let mut provider = Self::new(config);
        provider.samples = OnceCell::new_with(Some(Arc::new(samples)));
        provider
    }

    async fn samples(&self) -> Result<Arc<Vec<DepthSample>>> {
        let samples = self
            .samples
            .get_or_try_init(|| async {
                let path = self.table_path.clone().ok_or_else(|| {
                    ProviderError::Config("AQUIFER_DEPTH_TABLE is not set".to_string())
                })?;
                info!(path = %path.display(), "Loading aquifer depth table");
                let samples = tokio::task::spawn_blocking(move || load_table(&path))
                    .await
                    .map_err(|e| ProviderError::Config(format!("table loader panicked: {}", e)))??;
                Ok::<_, ProviderError>(Arc::new(samples))
            })
            .await?;
        Ok(Arc::clone(samples))
    }
}

#[async_trait]
impl Provider for AquiferDepthProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn features(&self) -> &[FeatureSpec] {
        &self.features
    }

    #[instrument(skip(self, request), fields(feature = %request.feature))]
    async fn get_data(&self, request: FetchRequest<'_>) -> anyhow::Result<Dataset> {
        let samples = self.samples().await?;
        let frame = Coordinates::spatial(request.frame.x.clone(), request.frame.y.clone());

        let interpolator = self.interpolator.clone();
        let grid_frame = frame.clone();
        let values =
            tokio::task::spawn_blocking(move || interpolator.grid(&samples, &grid_frame)).await?;

        debug!(
            cells = values.len(),
            empty = values.iter().filter(|v| v.is_nan()).count(),
            "Interpolated aquifer depth"
        );

        let dataset = Dataset::new(frame).with_variable(
            VARIABLE,
            Variable::new(["y", "x"], VariableData::Float(values))
                .with_attr("units", "km")
                .with_attr("long_name", "depth to crystalline basement"),
        )?;
        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::assert_approx_eq;

    const TABLE: &str = "X\tY\tUC\tLC\tAVCRUST\tTopo\tBasement\tUC/LC\tMoho\n\
        0.0\t45.0\t10\t20\t6.4\t0.2\t2.5\t0.5\t32\n\
        1.0\t45.0\t10\t20\t6.4\t0.2\t4.5\t0.5\t32\n\
        0.0\t46.0\t10\t20\t6.4\t0.2\tNaN\t0.5\t32\n";

    fn samples() -> Vec<DepthSample> {
        read_table(TABLE.as_bytes(), Path::new("table.txt")).unwrap()
    }

    #[test]
    fn test_read_table_skips_header_and_nan() {
        let samples = samples();
        assert_eq!(samples.len(), 2);
        assert_eq!(
            samples[1],
            DepthSample {
                x: 1.0,
                y: 45.0,
                basement: 4.5
            }
        );
    }

    #[test]
    fn test_read_table_rejects_bad_number() {
        let table = "X\tY\tUC\tLC\tAVCRUST\tTopo\tBasement\n0\t45\t1\t1\t1\t1\tdeep\n";
        let err = read_table(table.as_bytes(), Path::new("bad.txt")).unwrap_err();
        assert!(err.to_string().contains("row 2"));
    }

    #[test]
    fn test_read_table_rejects_short_rows() {
        let table = "X\tY\n0\t45\n";
        assert!(read_table(table.as_bytes(), Path::new("short.txt")).is_err());
    }

    #[test]
    fn test_idw_exact_midpoint_and_cutoff() {
        let idw = IdwInterpolator::new(&AquiferDepthConfig::default());
        let samples = samples();

        assert_approx_eq!(idw.at(&samples, 0.0, 45.0), 2.5, 1e-9);
        assert_approx_eq!(idw.at(&samples, 0.5, 45.0), 3.5, 1e-9);
        assert!(idw.at(&samples, 10.0, 10.0).is_nan());
    }

    #[test]
    fn test_idw_grid_is_row_major() {
        let idw = IdwInterpolator::new(&AquiferDepthConfig::default());
        let frame = Coordinates::spatial(vec![0.0, 1.0], vec![45.0, 50.0]);
        let grid = idw.grid(&samples(), &frame);
        assert_eq!(grid.len(), 4);
        assert_approx_eq!(grid[0], 2.5, 1e-9);
        assert_approx_eq!(grid[1], 4.5, 1e-9);
        assert!(grid[2].is_nan() && grid[3].is_nan());
    }

    #[test]
    fn test_provider_with_samples() {
        let provider =
            AquiferDepthProvider::with_samples(&AquiferDepthConfig::default(), samples());
        let frame = Coordinates::spatial(vec![0.0, 0.5], vec![45.0]);
        let lock = geo_cutout::DownloadLock::new();
        let params = geo_cutout::Attrs::new();
        let scratch = std::env::temp_dir();

        let dataset = tokio_test::block_on(provider.get_data(FetchRequest {
            frame: &frame,
            feature: FEATURE,
            scratch_dir: &scratch,
            lock: &lock,
            params: &params,
        }))
        .unwrap();

        let variable = dataset.variable(VARIABLE).unwrap();
        assert_eq!(variable.dims, vec!["y", "x"]);
        match &variable.data {
            VariableData::Float(values) => {
                assert_approx_eq!(values[0], 2.5, 1e-9);
                assert_approx_eq!(values[1], 3.5, 1e-9);
            }
            other => panic!("unexpected data {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_provider_without_table_fails() {
        let provider = AquiferDepthProvider::new(&AquiferDepthConfig::default());
        let frame = Coordinates::spatial(vec![0.0], vec![45.0]);
        let lock = geo_cutout::DownloadLock::new();
        let params = geo_cutout::Attrs::new();
        let scratch = std::env::temp_dir();
        let err = provider
            .get_data(FetchRequest {
                frame: &frame,
                feature: FEATURE,
                scratch_dir: &scratch,
                lock: &lock,
                params: &params,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("AQUIFER_DEPTH_TABLE"));
    }
}
