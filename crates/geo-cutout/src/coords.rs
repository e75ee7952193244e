//! Cutout coordinate frame and construction parameters.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::dataset::{AttrValue, Attrs};
use crate::error::{CutoutError, Result};

/// Longitude axis.
pub const X: &str = "x";
/// Latitude axis.
pub const Y: &str = "y";
/// Time axis.
pub const TIME: &str = "time";
/// Persisted alias of `x`.
pub const LON: &str = "lon";
/// Persisted alias of `y`.
pub const LAT: &str = "lat";

/// Coordinate reference system of every cutout.
pub const CRS: &str = "EPSG:4326";

/// Decimals kept on lattice coordinates.
const LATTICE_DECIMALS: i32 = 9;
/// Decimals kept on derived step sizes.
const STEP_DECIMALS: i32 = 8;
/// Largest number of points a single axis may hold.
pub const MAX_AXIS_POINTS: usize = 1_000_000;

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Ordered coordinate axes of a cutout.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Coordinates {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub time: Option<Vec<DateTime<Utc>>>,
}

impl Coordinates {
    /// Spatial-only coordinates.
    pub fn spatial(x: Vec<f64>, y: Vec<f64>) -> Self {
        Self { x, y, time: None }
    }

    /// Attach a time axis.
    pub fn with_time(mut self, time: Vec<DateTime<Utc>>) -> Self {
        self.time = Some(time);
        self
    }

    /// Length of a named axis, if the axis exists.
    pub fn axis_len(&self, axis: &str) -> Option<usize> {
        match axis {
            X => Some(self.x.len()),
            Y => Some(self.y.len()),
            TIME => self.time.as_ref().map(Vec::len),
            _ => None,
        }
    }

    /// Number of cells spanned by `dims`, or the first unknown dim.
    pub fn extent_of<'a>(&self, dims: &'a [String]) -> std::result::Result<usize, &'a str> {
        dims.iter().try_fold(1usize, |acc, dim| {
            self.axis_len(dim).map(|len| acc * len).ok_or(dim.as_str())
        })
    }

    /// Step size on x, rounded to 8 decimals. `None` with fewer than two points.
    pub fn dx(&self) -> Option<f64> {
        step(&self.x)
    }

    /// Step size on y, rounded to 8 decimals. `None` with fewer than two points.
    pub fn dy(&self) -> Option<f64> {
        step(&self.y)
    }

    /// Total area covered by the cell centres plus half a step: `[x0, x1, y0, y1]`.
    pub fn extent(&self) -> Option<[f64; 4]> {
        let (dx, dy) = (self.dx()?, self.dy()?);
        let (x0, x1) = (*self.x.first()?, *self.x.last()?);
        let (y0, y1) = (*self.y.first()?, *self.y.last()?);
        Some([x0 - dx / 2.0, x1 + dx / 2.0, y0 - dy / 2.0, y1 + dy / 2.0])
    }

    /// Extent reordered as `[min_x, min_y, max_x, max_y]`.
    pub fn bounds(&self) -> Option<[f64; 4]> {
        self.extent().map(|e| [e[0], e[2], e[1], e[3]])
    }

    /// Check that every axis present in `incoming` equals ours exactly.
    ///
    /// Incoming data may omit axes (e.g. a static field without time) but
    /// must never disagree on the ones it has.
    pub fn check_compatible(&self, incoming: &Coordinates) -> Result<()> {
        compare_axis(X, &self.x, &incoming.x)?;
        compare_axis(Y, &self.y, &incoming.y)?;
        match (&self.time, &incoming.time) {
            (_, None) => Ok(()),
            (None, Some(_)) => Err(CutoutError::coordinate_mismatch(
                TIME,
                "incoming data has a time axis but the cutout has none",
            )),
            (Some(ours), Some(theirs)) => {
                if ours == theirs {
                    Ok(())
                } else {
                    Err(CutoutError::coordinate_mismatch(
                        TIME,
                        format!(
                            "cutout has {} steps from {:?}, incoming has {} steps from {:?}",
                            ours.len(),
                            ours.first(),
                            theirs.len(),
                            theirs.first()
                        ),
                    ))
                }
            }
        }
    }
}

fn step(axis: &[f64]) -> Option<f64> {
    if axis.len() < 2 {
        return None;
    }
    let span = axis[axis.len() - 1] - axis[0];
    Some(round_to(span / (axis.len() - 1) as f64, STEP_DECIMALS))
}

fn compare_axis(name: &str, ours: &[f64], theirs: &[f64]) -> Result<()> {
    if theirs.is_empty() {
        return Ok(());
    }
    if ours.len() != theirs.len() {
        return Err(CutoutError::coordinate_mismatch(
            name,
            format!("cutout has {} values, incoming has {}", ours.len(), theirs.len()),
        ));
    }
    if let Some(i) = ours.iter().zip(theirs).position(|(a, b)| a != b) {
        return Err(CutoutError::coordinate_mismatch(
            name,
            format!("value {} differs: cutout {} vs incoming {}", i, ours[i], theirs[i]),
        ));
    }
    Ok(())
}

// ============================================================================
// Construction parameters
// ============================================================================

/// Parameters for building a new cutout.
///
/// `x`, `y` and `time` select the frame; everything else is kept in the
/// cutout attrs and handed to providers unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CutoutParams {
    /// Longitude range (either order).
    pub x: Option<(f64, f64)>,
    /// Latitude range (either order).
    pub y: Option<(f64, f64)>,
    /// A period (`2011`, `2011-01`, `2011-01-05`) or `start/end` periods.
    pub time: Option<String>,
    /// Longitude step in degrees.
    pub dx: Option<f64>,
    /// Latitude step in degrees.
    pub dy: Option<f64>,
    /// Time frequency: `h`, `3h`, `d`.
    pub dt: Option<String>,
    /// Additional creation parameters, e.g. `chunksize_time`.
    #[serde(default)]
    pub extra: BTreeMap<String, AttrValue>,
}

impl CutoutParams {
    /// Build the coordinate frame and the creation attrs.
    pub fn build(&self, default_step: f64) -> Result<(Coordinates, Attrs)> {
        let (x0, x1) = self.x.ok_or_else(|| CutoutError::MissingParameter(X.into()))?;
        let (y0, y1) = self.y.ok_or_else(|| CutoutError::MissingParameter(Y.into()))?;
        let time = self
            .time
            .as_deref()
            .ok_or_else(|| CutoutError::MissingParameter(TIME.into()))?;

        let dx = self.dx.unwrap_or(default_step);
        let dy = self.dy.unwrap_or(default_step);
        let dt = self.dt.clone().unwrap_or_else(|| "h".to_string());

        let x = lattice(X, -180.0, 180.0, dx, x0, x1)?;
        let y = lattice(Y, -90.0, 90.0, dy, y0, y1)?;
        let time = time_axis(time, &dt)?;

        let mut attrs = self.extra.clone();
        attrs.insert("dx".into(), AttrValue::Float(dx));
        attrs.insert("dy".into(), AttrValue::Float(dy));
        attrs.insert("dt".into(), AttrValue::Text(dt));

        Ok((Coordinates { x, y, time: Some(time) }, attrs))
    }
}

/// Global lattice `[start, stop)` with `step`, cut to the closed range `[a, b]`.
fn lattice(
    name: &str,
    start: f64,
    stop: f64,
    step: f64,
    a: f64,
    b: f64,
) -> Result<Vec<f64>> {
    if !(step.is_finite() && step > 0.0) {
        return Err(CutoutError::invalid_parameter(
            format!("d{}", name),
            format!("step must be positive, got {}", step),
        ));
    }
    if !(a.is_finite() && b.is_finite()) {
        return Err(CutoutError::invalid_parameter(
            name,
            format!("range [{}, {}] is not finite", a, b),
        ));
    }
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let total = ((stop - start) / step).ceil();
    let first = ((lo - start) / step).floor().clamp(0.0, total);
    let last = ((hi - start) / step).ceil().clamp(first, total);
    if last - first > MAX_AXIS_POINTS as f64 {
        return Err(CutoutError::invalid_parameter(
            format!("d{}", name),
            format!(
                "step {} gives more than {} points on [{}, {}]",
                step, MAX_AXIS_POINTS, lo, hi
            ),
        ));
    }

    let values: Vec<f64> = (first as usize..=last as usize)
        .map(|i| round_to(start + i as f64 * step, LATTICE_DECIMALS))
        .filter(|v| *v < stop && *v >= lo && *v <= hi)
        .collect();

    if values.is_empty() {
        return Err(CutoutError::invalid_parameter(
            name,
            format!("range [{}, {}] contains no grid points at step {}", lo, hi, step),
        ));
    }
    Ok(values)
}

/// Parse a frequency: `h`, `Nh`, `d`, `Nd` (case-insensitive).
pub fn parse_frequency(dt: &str) -> Result<Duration> {
    let dt = dt.trim().to_lowercase();
    if dt.is_empty() || !dt.is_ascii() {
        return Err(CutoutError::invalid_parameter(
            "dt",
            format!("unsupported frequency '{}'", dt),
        ));
    }
    let (count, unit) = dt.split_at(dt.len().saturating_sub(1));
    let count: i64 = if count.is_empty() {
        1
    } else {
        count
            .parse()
            .map_err(|_| CutoutError::invalid_parameter("dt", format!("bad count in '{}'", dt)))?
    };
    if count <= 0 {
        return Err(CutoutError::invalid_parameter("dt", "frequency must be positive"));
    }
    let step = match unit {
        "h" => Duration::try_hours(count),
        "d" => Duration::try_days(count),
        _ => {
            return Err(CutoutError::invalid_parameter(
                "dt",
                format!("unsupported frequency '{}' (use h, Nh, d or Nd)", dt),
            ))
        }
    };
    step.ok_or_else(|| CutoutError::invalid_parameter("dt", format!("'{}' is too long", dt)))
}

/// A calendar period `[start, end)`.
fn parse_period(text: &str) -> Result<(NaiveDate, NaiveDate)> {
    let text = text.trim();
    let invalid =
        || CutoutError::invalid_parameter(TIME, format!("cannot parse period '{}'", text));
    let parts: Vec<&str> = text.split('-').collect();
    let number = |s: &str| s.parse::<u32>().map_err(|_| invalid());
    let year = |s: &str| s.parse::<i32>().map_err(|_| invalid());
    let next = |y: i32| y.checked_add(1).ok_or_else(invalid);

    let (start, end) = match parts.as_slice() {
        [y] => {
            let y = year(y)?;
            (
                NaiveDate::from_ymd_opt(y, 1, 1),
                NaiveDate::from_ymd_opt(next(y)?, 1, 1),
            )
        }
        [y, month] => {
            let (y, month) = (year(y)?, number(month)?);
            let (next_year, next_month) = if month == 12 {
                (next(y)?, 1)
            } else {
                (y, month + 1)
            };
            (
                NaiveDate::from_ymd_opt(y, month, 1),
                NaiveDate::from_ymd_opt(next_year, next_month, 1),
            )
        }
        [y, month, day] => {
            let date = NaiveDate::from_ymd_opt(year(y)?, number(month)?, number(day)?);
            (date, date.and_then(|d| d.succ_opt()))
        }
        _ => return Err(invalid()),
    };

    match (start, end) {
        (Some(start), Some(end)) => Ok((start, end)),
        _ => Err(invalid()),
    }
}

/// Time axis covering `spec` (one period or `start/end`) at frequency `dt`.
pub fn time_axis(spec: &str, dt: &str) -> Result<Vec<DateTime<Utc>>> {
    let step = parse_frequency(dt)?;
    let (first, last) = match spec.split_once('/') {
        Some((a, b)) => (parse_period(a)?, parse_period(b)?),
        None => {
            let period = parse_period(spec)?;
            (period, period)
        }
    };

    let midnight = |date: NaiveDate| {
        date.and_hms_opt(0, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive))
            .ok_or_else(|| CutoutError::invalid_parameter(TIME, format!("bad date {}", date)))
    };
    let start = midnight(first.0)?;
    let end = midnight(last.1)?;
    if end <= start {
        return Err(CutoutError::invalid_parameter(
            TIME,
            format!("'{}' ends before it starts", spec),
        ));
    }

    let count = (end - start).num_seconds() / step.num_seconds().max(1);
    if count > MAX_AXIS_POINTS as i64 {
        return Err(CutoutError::invalid_parameter(
            TIME,
            format!("'{}' at '{}' gives more than {} steps", spec, dt, MAX_AXIS_POINTS),
        ));
    }

    let mut axis = Vec::new();
    let mut t = start;
    while t < end {
        axis.push(t);
        match t.checked_add_signed(step) {
            Some(next) => t = next,
            None => break,
        }
    }
    Ok(axis)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> CutoutParams {
        CutoutParams {
            x: Some((-1.0, -1.5)),
            y: Some((51.0, 50.0)),
            time: Some("2019-01-01".to_string()),
            dx: Some(0.1),
            dy: Some(0.1),
            dt: Some("h".to_string()),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_build_frame() {
        let (coords, attrs) = params().build(0.25).unwrap();
        assert_eq!(coords.x.first(), Some(&-1.5));
        assert_eq!(coords.x.last(), Some(&-1.0));
        assert_eq!(coords.x.len(), 6);
        assert_eq!(coords.y.len(), 11);
        assert_eq!(coords.time.as_ref().map(Vec::len), Some(24));
        assert_eq!(coords.dx(), Some(0.1));
        assert_eq!(attrs.get("dt"), Some(&AttrValue::Text("h".into())));
        assert_eq!(attrs.get("dx"), Some(&AttrValue::Float(0.1)));
    }

    #[test]
    fn test_missing_parameters() {
        let mut p = params();
        p.time = None;
        assert!(matches!(
            p.build(0.25),
            Err(CutoutError::MissingParameter(ref name)) if name == "time"
        ));
    }

    #[test]
    fn test_empty_range_rejected() {
        let mut p = params();
        p.x = Some((0.01, 0.02));
        assert!(p.build(0.25).is_err());
    }

    #[test]
    fn test_extent_and_bounds() {
        let coords = Coordinates::spatial(vec![0.0, 0.5, 1.0], vec![10.0, 11.0]);
        assert_eq!(coords.extent(), Some([-0.25, 1.25, 9.5, 11.5]));
        assert_eq!(coords.bounds(), Some([-0.25, 9.5, 1.25, 11.5]));
        assert_eq!(Coordinates::spatial(vec![0.0], vec![0.0]).dx(), None);
    }

    #[test]
    fn test_frequency() {
        assert_eq!(parse_frequency("h").unwrap(), Duration::hours(1));
        assert_eq!(parse_frequency("3H").unwrap(), Duration::hours(3));
        assert_eq!(parse_frequency("d").unwrap(), Duration::days(1));
        assert!(parse_frequency("m").is_err());
        assert!(parse_frequency("0h").is_err());
    }

    #[test]
    fn test_time_ranges() {
        assert_eq!(time_axis("2019-01-01/2019-01-02", "h").unwrap().len(), 48);
        assert_eq!(time_axis("2019-02", "d").unwrap().len(), 28);
        assert_eq!(time_axis("2020", "d").unwrap().len(), 366);
        assert!(time_axis("2019-13-01", "h").is_err());
        assert!(time_axis("2019-01-02/2019-01-01", "h").is_err());
    }

    #[test]
    fn test_oversized_axes_rejected() {
        let mut p = params();
        p.dx = Some(1e-9);
        assert!(matches!(
            p.build(0.25),
            Err(CutoutError::InvalidParameter { ref name, .. }) if name == "dx"
        ));

        let mut p = params();
        p.x = Some((-180.0, 180.0));
        p.dx = Some(0.0001);
        assert!(p.build(0.25).is_err());

        // Fine steps are fine over a small window.
        let mut p = params();
        p.x = Some((0.0, 0.001));
        p.dx = Some(0.0001);
        let (coords, _) = p.build(0.25).unwrap();
        assert_eq!(coords.x.len(), 11);

        let mut p = params();
        p.x = Some((f64::NAN, 1.0));
        assert!(p.build(0.25).is_err());

        assert!(time_axis("1900/2100", "h").is_err());
    }

    #[test]
    fn test_extreme_years_do_not_panic() {
        assert!(time_axis("2147483647", "d").is_err());
        assert!(time_axis("2147483647-12", "d").is_err());
        assert!(time_axis("4294967295", "d").is_err());
        assert!(time_axis("99999999999", "d").is_err());
        assert!(parse_frequency("9999999999999999h").is_err());
        assert_eq!(time_axis("2019", "1000000000000h").unwrap().len(), 1);
    }

    #[test]
    fn test_check_compatible() {
        let ours = Coordinates::spatial(vec![0.0, 1.0], vec![0.0, 1.0]);
        assert!(ours.check_compatible(&ours).is_ok());
        assert!(ours
            .check_compatible(&Coordinates::spatial(vec![], vec![0.0, 1.0]))
            .is_ok());

        let shifted = Coordinates::spatial(vec![0.0, 1.5], vec![0.0, 1.0]);
        let err = ours.check_compatible(&shifted).unwrap_err();
        assert!(matches!(err, CutoutError::CoordinateMismatch { ref axis, .. } if axis == "x"));

        let timed = ours.clone().with_time(vec![Utc::now()]);
        assert!(ours.check_compatible(&timed).is_err());
    }
}
