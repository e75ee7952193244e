//! In-memory grid dataset: coordinates, variables and attributes.
//!
//! Datasets have value semantics. Merging returns a new snapshot and leaves
//! both inputs untouched; callers rebind.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::coords::Coordinates;
use crate::error::{CutoutError, Result};
use crate::lithology::Lithology;

/// Attribute listing the features merged into a cutout so far.
pub const PREPARED_FEATURES: &str = "prepared_features";
/// Variable attribute naming the provider that produced it.
pub const PROVIDER_ATTR: &str = "provider";
/// Variable attribute naming the feature it belongs to.
pub const FEATURE_ATTR: &str = "feature";

/// Metadata attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<AttrValue>),
}

impl AttrValue {
    /// Replace values the persisted format does not carry: booleans become
    /// 0/1 and non-finite floats become `"NaN"`, `"inf"` or `"-inf"`.
    pub fn normalized(&self) -> AttrValue {
        match self {
            Self::Bool(b) => Self::Int(i64::from(*b)),
            Self::Float(f) if f.is_nan() => Self::Text("NaN".into()),
            Self::Float(f) if f.is_infinite() => {
                Self::Text(if *f > 0.0 { "inf" } else { "-inf" }.into())
            }
            Self::List(items) => Self::List(items.iter().map(Self::normalized).collect()),
            other => other.clone(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Items of a list of strings; a single string is a one-item list.
    pub fn as_string_list(&self) -> Vec<String> {
        match self {
            Self::Text(s) => vec![s.clone()],
            Self::List(items) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<AttrValue>> From<Vec<T>> for AttrValue {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

/// Attribute mapping, ordered by key.
pub type Attrs = BTreeMap<String, AttrValue>;

/// Copy of `attrs` with every value normalized for persistence.
pub fn normalize_attrs(attrs: &Attrs) -> Attrs {
    attrs
        .iter()
        .map(|(k, v)| (k.clone(), v.normalized()))
        .collect()
}

/// Whether a dataset's cells may hold composite values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// At least one variable holds composite cell values.
    Object,
    /// Every variable holds primitive values and can be written.
    Storable,
}

/// Cell values of one variable, flattened row-major over its dims.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableData {
    Float(Vec<f64>),
    Text(Vec<Option<String>>),
    Lithology(Vec<Lithology>),
}

impl VariableData {
    pub fn len(&self) -> usize {
        match self {
            Self::Float(v) => v.len(),
            Self::Text(v) => v.len(),
            Self::Lithology(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Composite values cannot be persisted as-is.
    pub fn is_composite(&self) -> bool {
        matches!(self, Self::Lithology(_))
    }

    pub fn dtype(&self) -> &'static str {
        match self {
            Self::Float(_) => "float64",
            Self::Text(_) => "string",
            Self::Lithology(_) => "lithology",
        }
    }
}

/// A named grid variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub dims: Vec<String>,
    pub data: VariableData,
    pub attrs: Attrs,
}

impl Variable {
    pub fn new<I, S>(dims: I, data: VariableData) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dims: dims.into_iter().map(Into::into).collect(),
            data,
            attrs: Attrs::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    /// Feature recorded on the variable after fetch.
    pub fn feature(&self) -> Option<&str> {
        self.attrs.get(FEATURE_ATTR).and_then(AttrValue::as_str)
    }

    /// Provider recorded on the variable after fetch.
    pub fn provider(&self) -> Option<&str> {
        self.attrs.get(PROVIDER_ATTR).and_then(AttrValue::as_str)
    }
}

/// Grid dataset bound to a coordinate frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dataset {
    pub coords: Coordinates,
    pub variables: BTreeMap<String, Variable>,
    pub attrs: Attrs,
}

impl Dataset {
    /// Empty dataset over `coords`.
    pub fn new(coords: Coordinates) -> Self {
        Self {
            coords,
            variables: BTreeMap::new(),
            attrs: Attrs::new(),
        }
    }

    pub fn with_attrs(mut self, attrs: Attrs) -> Self {
        self.attrs = attrs;
        self
    }

    /// Builder form of [`Dataset::insert_variable`].
    pub fn with_variable(mut self, name: impl Into<String>, variable: Variable) -> Result<Self> {
        self.insert_variable(name, variable)?;
        Ok(self)
    }

    /// Insert or replace a variable after checking its shape against the coords.
    pub fn insert_variable(&mut self, name: impl Into<String>, variable: Variable) -> Result<()> {
        let name = name.into();
        self.check_shape(&name, &variable)?;
        self.variables.insert(name, variable);
        Ok(())
    }

    fn check_shape(&self, name: &str, variable: &Variable) -> Result<()> {
        let mut seen = BTreeSet::new();
        if let Some(dup) = variable.dims.iter().find(|d| !seen.insert(d.as_str())) {
            return Err(CutoutError::Mode(format!(
                "variable '{}' repeats dimension '{}'",
                name, dup
            )));
        }
        let expected = self.coords.extent_of(&variable.dims).map_err(|dim| {
            CutoutError::coordinate_mismatch(
                dim,
                format!("variable '{}' uses an axis the cutout does not have", name),
            )
        })?;
        if expected != variable.data.len() {
            return Err(CutoutError::ShapeMismatch {
                variable: name.to_string(),
                dims: variable.dims.clone(),
                expected,
                actual: variable.data.len(),
            });
        }
        Ok(())
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    /// Object mode if any variable holds composite values.
    pub fn mode(&self) -> Mode {
        if self.variables.values().any(|v| v.data.is_composite()) {
            Mode::Object
        } else {
            Mode::Storable
        }
    }

    /// Features recorded as merged into this dataset.
    pub fn prepared_features(&self) -> BTreeSet<String> {
        self.attrs
            .get(PREPARED_FEATURES)
            .map(|v| v.as_string_list().into_iter().collect())
            .unwrap_or_default()
    }

    /// Record `features` as prepared (sorted for stable output).
    pub fn set_prepared_features(&mut self, features: &BTreeSet<String>) {
        let list: Vec<AttrValue> = features.iter().map(|f| AttrValue::from(f.as_str())).collect();
        self.attrs
            .insert(PREPARED_FEATURES.to_string(), AttrValue::List(list));
    }

    /// Chunking hints from `chunksize_<dim>` attrs, if any.
    pub fn chunks(&self) -> Option<BTreeMap<String, i64>> {
        let chunks: BTreeMap<String, i64> = self
            .attrs
            .iter()
            .filter_map(|(k, v)| {
                let dim = k.strip_prefix("chunksize_")?;
                let size = v.as_f64()? as i64;
                Some((dim.to_string(), size))
            })
            .collect();
        if chunks.is_empty() {
            None
        } else {
            Some(chunks)
        }
    }

    /// Merge `incoming` variables into a copy of this dataset.
    ///
    /// Coordinates must agree on every axis `incoming` carries. A variable
    /// name present in both is an error unless `overwrite` is set, in which
    /// case the incoming variable replaces ours. Attrs are not touched.
    pub fn merge(&self, incoming: &Dataset, overwrite: bool) -> Result<Dataset> {
        self.coords.check_compatible(&incoming.coords)?;

        let mut merged = self.clone();
        for (name, variable) in &incoming.variables {
            if !overwrite && merged.contains(name) {
                return Err(CutoutError::VariableExists(name.clone()));
            }
            merged.insert_variable(name.clone(), variable.clone())?;
        }
        Ok(merged)
    }

    /// Human-readable label of a flat cell index for a variable's dims.
    pub fn cell_label(&self, dims: &[String], index: usize) -> String {
        let mut remaining = index;
        let mut parts = Vec::with_capacity(dims.len());
        for dim in dims.iter().rev() {
            let len = self.coords.axis_len(dim).unwrap_or(1).max(1);
            parts.push(format!("{}={}", dim, remaining % len));
            remaining /= len;
        }
        parts.reverse();
        format!("({})", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Coordinates;

    fn frame() -> Coordinates {
        Coordinates::spatial(vec![0.0, 1.0, 2.0], vec![10.0, 11.0])
    }

    fn grid(value: f64) -> Variable {
        Variable::new(["y", "x"], VariableData::Float(vec![value; 6]))
    }

    #[test]
    fn test_shape_checked() {
        let mut ds = Dataset::new(frame());
        let bad = Variable::new(["y", "x"], VariableData::Float(vec![0.0; 5]));
        assert!(matches!(
            ds.insert_variable("v", bad),
            Err(CutoutError::ShapeMismatch { expected: 6, actual: 5, .. })
        ));
        let unknown = Variable::new(["time"], VariableData::Float(vec![]));
        assert!(ds.insert_variable("t", unknown).is_err());
        assert!(ds.insert_variable("ok", grid(1.0)).is_ok());
    }

    #[test]
    fn test_merge_rejects_existing_without_overwrite() {
        let base = Dataset::new(frame()).with_variable("a", grid(1.0)).unwrap();
        let incoming = Dataset::new(frame()).with_variable("a", grid(2.0)).unwrap();

        assert!(matches!(
            base.merge(&incoming, false),
            Err(CutoutError::VariableExists(ref name)) if name == "a"
        ));

        let merged = base.merge(&incoming, true).unwrap();
        assert_eq!(merged.variable("a"), incoming.variable("a"));
        // base is untouched
        assert_eq!(base.variable("a"), Some(&grid(1.0)));
    }

    #[test]
    fn test_merge_coordinate_mismatch() {
        let base = Dataset::new(frame());
        let shifted = Coordinates::spatial(vec![0.0, 1.0, 2.5], vec![10.0, 11.0]);
        let incoming = Dataset::new(shifted).with_variable("a", grid(1.0)).unwrap();
        assert!(matches!(
            base.merge(&incoming, true),
            Err(CutoutError::CoordinateMismatch { .. })
        ));
    }

    #[test]
    fn test_mode_follows_variable_types() {
        let mut ds = Dataset::new(frame()).with_variable("a", grid(0.0)).unwrap();
        assert_eq!(ds.mode(), Mode::Storable);
        let lith = Variable::new(["y", "x"], VariableData::Lithology(vec![Lithology::new(); 6]));
        ds.insert_variable("lithology", lith).unwrap();
        assert_eq!(ds.mode(), Mode::Object);
    }

    #[test]
    fn test_prepared_features_round_trip() {
        let mut ds = Dataset::new(frame());
        assert!(ds.prepared_features().is_empty());
        let set: BTreeSet<String> = ["lithology", "aquifer_depth"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        ds.set_prepared_features(&set);
        assert_eq!(ds.prepared_features(), set);
    }

    #[test]
    fn test_normalize_attrs() {
        let mut attrs = Attrs::new();
        attrs.insert("flag".into(), AttrValue::Bool(true));
        attrs.insert("flags".into(), AttrValue::from(vec![false, true]));
        attrs.insert("dx".into(), AttrValue::Float(0.25));
        let normalized = normalize_attrs(&attrs);
        assert_eq!(normalized["flag"], AttrValue::Int(1));
        assert_eq!(
            normalized["flags"],
            AttrValue::List(vec![AttrValue::Int(0), AttrValue::Int(1)])
        );
        assert_eq!(normalized["dx"], AttrValue::Float(0.25));
    }

    #[test]
    fn test_normalize_non_finite_floats() {
        let mut attrs = Attrs::new();
        attrs.insert("missing".into(), AttrValue::Float(f64::NAN));
        attrs.insert("ceiling".into(), AttrValue::Float(f64::INFINITY));
        attrs.insert(
            "bounds".into(),
            AttrValue::List(vec![AttrValue::Float(f64::NEG_INFINITY), AttrValue::Float(1.0)]),
        );
        let normalized = normalize_attrs(&attrs);
        assert_eq!(normalized["missing"], AttrValue::Text("NaN".into()));
        assert_eq!(normalized["ceiling"], AttrValue::Text("inf".into()));
        assert_eq!(
            normalized["bounds"],
            AttrValue::List(vec![AttrValue::Text("-inf".into()), AttrValue::Float(1.0)])
        );
    }

    #[test]
    fn test_chunks_and_cell_label() {
        let mut ds = Dataset::new(frame());
        assert_eq!(ds.chunks(), None);
        ds.attrs.insert("chunksize_time".into(), AttrValue::Int(100));
        assert_eq!(ds.chunks().unwrap()["time"], 100);

        let dims = vec!["y".to_string(), "x".to_string()];
        assert_eq!(ds.cell_label(&dims, 4), "(y=1, x=1)");
    }
}
