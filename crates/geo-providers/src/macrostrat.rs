//! Lithology from the Macrostrat geologic-unit map.
//!
//! Each lookup returns the map units under one point together with their
//! footprints. A unit's interpretation is reused for every other grid cell
//! its footprint covers, so most grids need far fewer requests than cells.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use geo::{Contains, MultiPolygon, Point};
use geo_cutout::lithology::{hex_to_rgb, Rgb};
use geo_cutout::{
    Coordinates, Dataset, FeatureSpec, FetchRequest, Lithology, Provider, Variable, VariableData,
    LITHOLOGY_VARIABLE,
};
use geojson::GeoJson;
use reqwest::Client;
use tracing::{debug, info, instrument};

use crate::config::MacrostratConfig;
use crate::error::{ProviderError, Result};

pub const PROVIDER_NAME: &str = "macrostrat";
pub const FEATURE: &str = "lithology";

/// One map unit returned for a point.
#[derive(Debug, Clone, PartialEq)]
pub struct GeologicUnit {
    /// Free-text lithology description.
    pub lith: String,
    pub color: Option<Rgb>,
    pub footprint: MultiPolygon<f64>,
}

impl GeologicUnit {
    pub fn covers(&self, x: f64, y: f64) -> bool {
        self.footprint.contains(&Point::new(x, y))
    }
}

/// Source of geologic units at a point.
#[async_trait]
pub trait UnitLookup: Send + Sync {
    async fn units_at(&self, lng: f64, lat: f64) -> Result<Vec<GeologicUnit>>;
}

/// Parse a `geojson_bare` response into units.
///
/// Features without an areal geometry are skipped. An unparseable colour
/// leaves the unit without one.
pub fn parse_units(bytes: &[u8]) -> Result<Vec<GeologicUnit>> {
    let features = match GeoJson::from_reader(bytes).map_err(geojson::Error::from)? {
        GeoJson::FeatureCollection(collection) => collection.features,
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::Geometry(_) => Vec::new(),
    };

    let mut units = Vec::with_capacity(features.len());
    for feature in features {
        let Some(geometry) = feature.geometry else {
            continue;
        };
        let footprint = match geo::Geometry::<f64>::try_from(geometry)? {
            geo::Geometry::Polygon(polygon) => MultiPolygon::new(vec![polygon]),
            geo::Geometry::MultiPolygon(multi) => multi,
            _ => continue,
        };

        let properties = feature.properties.unwrap_or_default();
        let lith = properties
            .get("lith")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let color = properties
            .get("color")
            .and_then(|v| v.as_str())
            .and_then(|hex| match hex_to_rgb(hex) {
                Ok(rgb) => Some(rgb),
                Err(reason) => {
                    debug!(%reason, "Ignoring unit colour");
                    None
                }
            });

        units.push(GeologicUnit {
            lith,
            color,
            footprint,
        });
    }
    Ok(units)
}

/// HTTP client for the Macrostrat API.
#[derive(Debug, Clone)]
pub struct MacrostratClient {
    client: Client,
    base_url: String,
}

impl MacrostratClient {
    pub fn new(config: &MacrostratConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl UnitLookup for MacrostratClient {
    #[instrument(skip(self))]
    async fn units_at(&self, lng: f64, lat: f64) -> Result<Vec<GeologicUnit>> {
        let url = format!("{}/geologic_units/map", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("format", "geojson_bare".to_string()),
                ("lat", lat.to_string()),
                ("lng", lng.to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        let body = response.bytes().await?;
        let units = parse_units(&body)?;
        debug!(units = units.len(), "Fetched geologic units");
        Ok(units)
    }
}

/// Provider for the `lithology` feature.
pub struct MacrostratProvider<L = MacrostratClient> {
    lookup: Arc<L>,
    features: Vec<FeatureSpec>,
}

impl MacrostratProvider<MacrostratClient> {
    pub fn from_config(config: &MacrostratConfig) -> Result<Self> {
        Ok(Self::new(MacrostratClient::new(config)?))
    }
}

impl<L: UnitLookup> MacrostratProvider<L> {
    pub fn new(lookup: L) -> Self {
        Self {
            lookup: Arc::new(lookup),
            features: vec![FeatureSpec::new(FEATURE, [LITHOLOGY_VARIABLE])],
        }
    }

    /// Interpret the units under one point.
    ///
    /// Returns the composition and the unit whose footprint it applies to.
    fn interpret(units: &[GeologicUnit]) -> (Lithology, Option<&GeologicUnit>) {
        let mut lithology = Lithology::new();
        let rows: Vec<&str> = units.iter().map(|u| u.lith.as_str()).collect();
        let best = lithology.interpret_rows(&rows).map(|i| &units[i]);
        if let Some(rgb) = best.and_then(|u| u.color) {
            lithology.add_color(rgb);
        }
        (lithology, best)
    }

    /// Assign a composition to every cell of a `(y, x)` grid.
    async fn fill_grid(
        &self,
        frame: &Coordinates,
        request: &FetchRequest<'_>,
    ) -> Result<(Vec<Lithology>, usize)> {
        let (nx, ny) = (frame.x.len(), frame.y.len());
        let mut cells: Vec<Option<Lithology>> = vec![None; nx * ny];
        let mut lookups = 0;

        for index in 0..cells.len() {
            if cells[index].is_some() {
                continue;
            }
            let (lng, lat) = (frame.x[index % nx], frame.y[index / nx]);

            let units = {
                let _guard = request.lock.acquire().await;
                self.lookup.units_at(lng, lat).await?
            };
            lookups += 1;

            let (lithology, unit) = Self::interpret(&units);
            if let Some(unit) = unit {
                for (k, cell) in cells.iter_mut().enumerate() {
                    if cell.is_none() && unit.covers(frame.x[k % nx], frame.y[k / nx]) {
                        *cell = Some(lithology.clone());
                    }
                }
            }
            cells[index] = Some(lithology);
        }

        let cells = cells.into_iter().map(Option::unwrap_or_default).collect();
        Ok((cells, lookups))
    }
}

#[async_trait]
impl<L: UnitLookup + 'static> Provider for MacrostratProvider<L> {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn features(&self) -> &[FeatureSpec] {
        &self.features
    }

    #[instrument(skip(self, request), fields(feature = %request.feature))]
    async fn get_data(&self, request: FetchRequest<'_>) -> anyhow::Result<Dataset> {
        let frame = Coordinates::spatial(request.frame.x.clone(), request.frame.y.clone());
        let (cells, lookups) = self.fill_grid(&frame, &request).await?;

        info!(
            cells = cells.len(),
            lookups,
            "Assigned lithology to grid"
        );

        let dataset = Dataset::new(frame).with_variable(
            LITHOLOGY_VARIABLE,
            Variable::new(["y", "x"], VariableData::Lithology(cells)),
        )?;
        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use geo::polygon;
    use geo_cutout::{Attrs, DownloadLock};

    const RESPONSE: &str = r##"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[-1, -1], [1, -1], [1, 1], [-1, 1], [-1, -1]]]
                },
                "properties": {"lith": "Major:{sandstone} Minor:{shale}", "color": "#FDB462"}
            },
            {
                "type": "Feature",
                "geometry": {"type": "Point", "coordinates": [0, 0]},
                "properties": {"lith": "granite"}
            },
            {
                "type": "Feature",
                "geometry": {
                    "type": "MultiPolygon",
                    "coordinates": [[[[2, 2], [3, 2], [3, 3], [2, 2]]]]
                },
                "properties": {"lith": "clay", "color": "tan"}
            }
        ]
    }"##;

    #[test]
    fn test_parse_units() {
        let units = parse_units(RESPONSE.as_bytes()).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].lith, "Major:{sandstone} Minor:{shale}");
        assert_eq!(units[0].color, Some([0xfd, 0xb4, 0x62]));
        assert!(units[0].covers(0.5, 0.5));
        assert!(!units[0].covers(1.5, 0.5));
        assert_eq!(units[1].color, None);
    }

    #[test]
    fn test_parse_units_rejects_garbage() {
        assert!(parse_units(b"not json").is_err());
    }

    /// Returns one unit covering `x <= 0.3`, nothing elsewhere.
    #[derive(Default)]
    struct WestOnly {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl UnitLookup for WestOnly {
        async fn units_at(&self, lng: f64, _lat: f64) -> Result<Vec<GeologicUnit>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if lng > 0.3 {
                return Ok(Vec::new());
            }
            let footprint = polygon![
                (x: -1.0, y: 40.0),
                (x: 0.3, y: 40.0),
                (x: 0.3, y: 50.0),
                (x: -1.0, y: 50.0),
            ];
            Ok(vec![
                GeologicUnit {
                    lith: "weathered debris".to_string(),
                    color: Some([0, 0, 0]),
                    footprint: MultiPolygon::new(vec![footprint.clone()]),
                },
                GeologicUnit {
                    lith: "Major:{sandstone} Minor:{shale}".to_string(),
                    color: Some([200, 100, 50]),
                    footprint: MultiPolygon::new(vec![footprint]),
                },
            ])
        }
    }

    #[tokio::test]
    async fn test_provider_reuses_unit_footprints() {
        let provider = MacrostratProvider::new(WestOnly::default());
        let frame = Coordinates::spatial(vec![0.0, 0.25, 0.5], vec![45.0, 45.25]);
        let lock = DownloadLock::new();
        let params = Attrs::new();
        let scratch = std::env::temp_dir();

        let dataset = provider
            .get_data(FetchRequest {
                frame: &frame,
                feature: FEATURE,
                scratch_dir: &scratch,
                lock: &lock,
                params: &params,
            })
            .await
            .unwrap();

        // One lookup covers the western four cells; x=0.5 needs one per row.
        assert_eq!(provider.lookup.calls.load(Ordering::SeqCst), 3);

        let cells = match &dataset.variable(LITHOLOGY_VARIABLE).unwrap().data {
            VariableData::Lithology(cells) => cells.clone(),
            other => panic!("unexpected data {:?}", other),
        };
        assert_eq!(cells.len(), 6);
        for (i, cell) in cells.iter().enumerate() {
            if i % 3 == 2 {
                assert!(cell.is_empty());
                assert_eq!(cell.color_samples(), 0);
            } else {
                assert_eq!(cell.major(), Some("sandstone"));
                assert_eq!(cell.minors(), ["shale"]);
                assert_eq!(cell.others(), ["weathered", "debris"]);
                assert_eq!(cell.color(), [200, 100, 50]);
            }
        }
    }

    #[tokio::test]
    async fn test_lookup_failure_propagates() {
        struct Down;

        #[async_trait]
        impl UnitLookup for Down {
            async fn units_at(&self, _lng: f64, _lat: f64) -> Result<Vec<GeologicUnit>> {
                Err(ProviderError::Status {
                    url: "http://macrostrat.test/geologic_units/map".to_string(),
                    status: 503,
                })
            }
        }

        let provider = MacrostratProvider::new(Down);
        let frame = Coordinates::spatial(vec![0.0], vec![45.0]);
        let lock = DownloadLock::new();
        let params = Attrs::new();
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
        assert!(err.to_string().contains("503"));
    }
}
