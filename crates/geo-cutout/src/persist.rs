//! On-disk cutout format and atomic replacement.
//!
//! A cutout is one JSON document, gzip-compressed by default:
//!
//! ```text
//! {
//!   "format": "geo-cutout", "version": 1,
//!   "attrs": {...},
//!   "coords": {"x": [...], "y": [...], "time": [...], "lon": [...], "lat": [...]},
//!   "variables": {
//!     "<name>": {"dims": [...], "dtype": "float64"|"string", "data": [...], "attrs": {...}}
//!   }
//! }
//! ```
//!
//! Only storable datasets are written. Files are staged next to the target
//! and renamed over it, so readers see either the old or the new document.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::coords::Coordinates;
use crate::dataset::{normalize_attrs, Attrs, Dataset, Mode, Variable, VariableData};
use crate::error::{CutoutError, Result};

/// Format tag written into every document.
pub const FORMAT_TAG: &str = "geo-cutout";
/// Current document version.
pub const FORMAT_VERSION: u32 = 1;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Output options for cutout files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    pub compress: bool,
    /// gzip level, 1-9.
    pub level: u32,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            compress: true,
            level: 6,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CutoutDocument {
    format: String,
    version: u32,
    #[serde(default)]
    attrs: Attrs,
    coords: CoordsDocument,
    #[serde(default)]
    variables: BTreeMap<String, VariableDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CoordsDocument {
    x: Vec<f64>,
    y: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time: Option<Vec<DateTime<Utc>>>,
    lon: Vec<f64>,
    lat: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Dtype {
    #[serde(rename = "float64")]
    Float64,
    #[serde(rename = "string")]
    String,
}

#[derive(Debug, Serialize, Deserialize)]
struct VariableDocument {
    dims: Vec<String>,
    dtype: Dtype,
    data: serde_json::Value,
    #[serde(default)]
    attrs: Attrs,
}

/// Serialize a storable dataset to file bytes.
pub fn encode(dataset: &Dataset, options: WriteOptions) -> Result<Vec<u8>> {
    if dataset.mode() == Mode::Object {
        return Err(CutoutError::Mode(
            "object-mode datasets must be converted to storable mode before writing".into(),
        ));
    }

    let mut variables = BTreeMap::new();
    for (name, variable) in &dataset.variables {
        let (dtype, data) = match &variable.data {
            VariableData::Float(values) => {
                let values: Vec<Option<f64>> = values
                    .iter()
                    .map(|v| if v.is_finite() { Some(*v) } else { None })
                    .collect();
                (Dtype::Float64, serde_json::to_value(values))
            }
            VariableData::Text(values) => (Dtype::String, serde_json::to_value(values)),
            VariableData::Lithology(_) => {
                return Err(CutoutError::Mode(format!(
                    "variable '{}' holds composite values",
                    name
                )))
            }
        };
        let data = data.map_err(|e| CutoutError::Mode(e.to_string()))?;
        variables.insert(
            name.clone(),
            VariableDocument {
                dims: variable.dims.clone(),
                dtype,
                data,
                attrs: normalize_attrs(&variable.attrs),
            },
        );
    }

    let doc = CutoutDocument {
        format: FORMAT_TAG.to_string(),
        version: FORMAT_VERSION,
        attrs: normalize_attrs(&dataset.attrs),
        coords: CoordsDocument {
            x: dataset.coords.x.clone(),
            y: dataset.coords.y.clone(),
            time: dataset.coords.time.clone(),
            lon: dataset.coords.x.clone(),
            lat: dataset.coords.y.clone(),
        },
        variables,
    };

    let json = serde_json::to_vec(&doc).map_err(|e| CutoutError::Mode(e.to_string()))?;
    if !options.compress {
        return Ok(json);
    }

    let gzip_failed = |e: std::io::Error| CutoutError::Mode(format!("gzip failed: {}", e));
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(options.level));
    encoder.write_all(&json).map_err(gzip_failed)?;
    encoder.finish().map_err(gzip_failed)
}

/// Parse file bytes into a storable dataset.
pub fn decode(path: &Path, bytes: &[u8]) -> Result<Dataset> {
    let json = if bytes.starts_with(&GZIP_MAGIC) {
        let mut out = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut out)
            .map_err(|e| CutoutError::format(path, format!("corrupt gzip stream: {}", e)))?;
        out
    } else {
        bytes.to_vec()
    };

    let doc: CutoutDocument = serde_json::from_slice(&json)
        .map_err(|e| CutoutError::format(path, e.to_string()))?;

    if doc.format != FORMAT_TAG {
        return Err(CutoutError::format(
            path,
            format!("unexpected format tag '{}'", doc.format),
        ));
    }
    if doc.version > FORMAT_VERSION {
        return Err(CutoutError::format(
            path,
            format!("unsupported version {} (newest known is {})", doc.version, FORMAT_VERSION),
        ));
    }
    if doc.coords.lon != doc.coords.x || doc.coords.lat != doc.coords.y {
        return Err(CutoutError::format(path, "lon/lat aliases disagree with x/y"));
    }

    let coords = Coordinates {
        x: doc.coords.x,
        y: doc.coords.y,
        time: doc.coords.time,
    };
    let mut dataset = Dataset::new(coords).with_attrs(doc.attrs);

    for (name, var) in doc.variables {
        let data = match var.dtype {
            Dtype::Float64 => {
                let values: Vec<Option<f64>> = serde_json::from_value(var.data)
                    .map_err(|e| CutoutError::format(path, format!("variable '{}': {}", name, e)))?;
                VariableData::Float(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
            }
            Dtype::String => {
                let values: Vec<Option<String>> = serde_json::from_value(var.data)
                    .map_err(|e| CutoutError::format(path, format!("variable '{}': {}", name, e)))?;
                VariableData::Text(values)
            }
        };
        let variable = Variable {
            dims: var.dims,
            data,
            attrs: var.attrs,
        };
        dataset
            .insert_variable(name, variable)
            .map_err(|e| CutoutError::format(path, e.to_string()))?;
    }

    Ok(dataset)
}

/// Read a cutout file.
pub fn read_cutout(path: &Path) -> Result<Dataset> {
    let bytes = fs::read(path).map_err(|e| CutoutError::io("read", path, e))?;
    let dataset = decode(path, &bytes)?;
    debug!(
        path = %path.display(),
        variables = dataset.variables.len(),
        "Read cutout"
    );
    Ok(dataset)
}

/// A fully written temporary file waiting to replace its target.
///
/// Dropping it without [`StagedCutout::commit`] removes the temp file and
/// leaves the target untouched.
#[derive(Debug)]
pub struct StagedCutout {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedCutout {
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Rename the staged file onto the target.
    pub fn commit(self) -> Result<PathBuf> {
        let target = self.target;
        match self.temp.persist(&target) {
            Ok(_) => {}
            Err(err) if target.exists() => {
                // Platforms without replacing rename: drop the stale target first.
                if let Err(e) = fs::remove_file(&target) {
                    warn!(
                        path = %target.display(),
                        error = %e,
                        "Could not remove stale cutout file, retrying rename"
                    );
                }
                err.file
                    .persist(&target)
                    .map_err(|e| CutoutError::io("replace", &target, e.error))?;
            }
            Err(err) => return Err(CutoutError::io("rename onto", &target, err.error)),
        }
        debug!(path = %target.display(), "Committed cutout file");
        Ok(target)
    }
}

/// Write `dataset` to a temp file in the target's directory.
pub fn stage(dataset: &Dataset, target: &Path, options: WriteOptions) -> Result<StagedCutout> {
    let bytes = encode(dataset, options)?;

    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let prefix = format!(
        ".{}.",
        target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cutout".to_string())
    );

    let mut temp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(&dir)
        .map_err(|e| CutoutError::io("create temp file in", &dir, e))?;

    let temp_path = temp.path().to_path_buf();
    let write_failed = |e| CutoutError::io("write", &temp_path, e);
    temp.write_all(&bytes).map_err(write_failed)?;
    temp.flush().map_err(write_failed)?;
    temp.as_file().sync_all().map_err(write_failed)?;

    Ok(StagedCutout {
        temp,
        target: target.to_path_buf(),
    })
}

/// Stage and commit in one step.
pub fn write_atomic(dataset: &Dataset, target: &Path, options: WriteOptions) -> Result<()> {
    stage(dataset, target, options)?.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::AttrValue;
    use tempfile::TempDir;

    fn sample() -> Dataset {
        let t0 = DateTime::parse_from_rfc3339("2019-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let coords = Coordinates::spatial(vec![0.0, 0.5], vec![10.0]).with_time(vec![t0]);
        let mut ds = Dataset::new(coords);
        ds.attrs.insert("dx".into(), AttrValue::Float(0.5));
        ds.attrs.insert("module".into(), AttrValue::Bool(true));
        ds.insert_variable(
            "aquifer_depth",
            Variable::new(["y", "x"], VariableData::Float(vec![1.5, f64::NAN])),
        )
        .unwrap();
        ds.insert_variable(
            "major",
            Variable::new(["y", "x"], VariableData::Text(vec![Some("clay".into()), None])),
        )
        .unwrap();
        ds
    }

    #[test]
    fn test_write_and_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cutout.json.gz");
        write_atomic(&sample(), &path, WriteOptions::default()).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(&GZIP_MAGIC));

        let ds = read_cutout(&path).unwrap();
        assert_eq!(ds.coords, sample().coords);
        assert_eq!(ds.attrs["module"], AttrValue::Int(1));
        match &ds.variable("aquifer_depth").unwrap().data {
            VariableData::Float(v) => {
                assert_eq!(v[0], 1.5);
                assert!(v[1].is_nan());
            }
            other => panic!("unexpected data {:?}", other),
        }
        assert_eq!(ds.variable("major"), sample().variable("major"));
    }

    #[test]
    fn test_non_finite_attrs_read_back_as_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cutout.json.gz");
        let mut ds = sample();
        ds.attrs.insert("nodata".into(), AttrValue::Float(f64::NAN));
        ds.variables
            .get_mut("aquifer_depth")
            .unwrap()
            .attrs
            .insert("max".into(), AttrValue::Float(f64::INFINITY));
        write_atomic(&ds, &path, WriteOptions::default()).unwrap();

        let back = read_cutout(&path).unwrap();
        assert_eq!(back.attrs["nodata"], AttrValue::Text("NaN".into()));
        assert_eq!(
            back.variable("aquifer_depth").unwrap().attrs["max"],
            AttrValue::Text("inf".into())
        );
    }

    #[test]
    fn test_plain_json_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cutout.json");
        let options = WriteOptions {
            compress: false,
            level: 6,
        };
        write_atomic(&sample(), &path, options).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"format\":\"geo-cutout\""));
        assert!(text.contains("\"lon\""));
        assert!(read_cutout(&path).is_ok());
    }

    #[test]
    fn test_uncommitted_stage_leaves_target() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cutout.json.gz");
        write_atomic(&sample(), &path, WriteOptions::default()).unwrap();
        let before = fs::read(&path).unwrap();

        let mut changed = sample();
        changed.variables.remove("major");
        let staged = stage(&changed, &path, WriteOptions::default()).unwrap();
        let temp = staged.temp_path().to_path_buf();
        assert!(temp.exists());
        assert_eq!(temp.parent(), path.parent());
        drop(staged);

        assert!(!temp.exists());
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_commit_replaces_target() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cutout.json.gz");
        write_atomic(&sample(), &path, WriteOptions::default()).unwrap();

        let mut changed = sample();
        changed.variables.remove("major");
        stage(&changed, &path, WriteOptions::default())
            .unwrap()
            .commit()
            .unwrap();
        let ds = read_cutout(&path).unwrap();
        assert!(!ds.contains("major"));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_rejects_foreign_documents() {
        let path = Path::new("foreign.json");
        let foreign = br#"{"format":"zarr","version":1,
            "coords":{"x":[],"y":[],"lon":[],"lat":[]}}"#;
        let err = decode(path, foreign).unwrap_err();
        assert!(matches!(err, CutoutError::Format { .. }));

        let skewed = br#"{"format":"geo-cutout","version":1,
            "coords":{"x":[1.0],"y":[],"lon":[2.0],"lat":[]}}"#;
        let err = decode(path, skewed).unwrap_err();
        assert!(err.to_string().contains("lon/lat"));

        assert!(decode(path, b"not json").is_err());
    }

    #[test]
    fn test_object_mode_not_writable() {
        use crate::lithology::Lithology;
        let mut ds = sample();
        ds.insert_variable(
            "lithology",
            Variable::new(["y", "x"], VariableData::Lithology(vec![Lithology::new(); 2])),
        )
        .unwrap();
        assert!(matches!(
            encode(&ds, WriteOptions::default()),
            Err(CutoutError::Mode(_))
        ));
    }
}
