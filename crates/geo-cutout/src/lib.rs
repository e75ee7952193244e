//! Cutout Preparation Core
//!
//! A cutout is a rectangular lon/lat/time grid persisted as one file. This
//! crate decides which features a cutout is still missing, fetches them
//! from provider plugins, merges the results and replaces the file
//! atomically. It also owns the lithology composite value and its flat
//! 8-slot encoding:
//!
//! - **Idempotent**: features listed in `prepared_features` are not fetched again
//! - **All-or-nothing rounds**: a provider round updates the file completely or not at all
//! - **Lossless codec**: lithology compositions survive the flat encoding
//!
//! # Architecture
//!
//! ```text
//! FeaturePreparer::prepare(store, features)
//!      │
//!      ├─► FeatureCatalog::plan()   resolve + group by provider
//!      │
//!      └─► per provider round
//!               │
//!               ├─► Provider::get_data() for each feature (concurrent)
//!               │
//!               ├─► Dataset::merge()     new snapshot, coords checked
//!               │
//!               ├─► mode::to_storable()  lithology → 8 string variables
//!               │
//!               └─► persist::write_atomic()  temp file + rename
//! ```
//!
//! # Example
//!
//! ```ignore
//! use geo_cutout::{CutoutParams, CutoutStore, FeatureCatalog, FeaturePreparer,
//!                  PrepareOptions, ProviderRegistry, RetrieverConfig};
//!
//! let config = RetrieverConfig::from_env();
//! let registry = ProviderRegistry::new().with(Arc::new(my_provider))?;
//! let preparer = FeaturePreparer::new(FeatureCatalog::new(registry), config.clone());
//!
//! let mut store = CutoutStore::open_or_create("uk-2019.cutout", Some(&params), &config)?;
//! preparer.prepare(&mut store, PrepareOptions::features(["lithology"])).await?;
//! ```

pub mod catalog;
pub mod config;
pub mod coords;
pub mod dataset;
pub mod error;
pub mod lithology;
pub mod mode;
pub mod persist;
pub mod prepare;
pub mod provider;
pub mod store;

// Re-export commonly used types at crate root
pub use catalog::{AvailableFeature, FeatureCatalog, ProviderRegistry, ProviderRound};
pub use config::RetrieverConfig;
pub use coords::{Coordinates, CutoutParams};
pub use dataset::{AttrValue, Attrs, Dataset, Mode, Variable, VariableData};
pub use error::{CutoutError, Result, RoundStage};
pub use lithology::{
    parse_free_text, Lithology, LithologyRecord, LITHOLOGY_SLOTS, LITHOLOGY_VARIABLE,
};
pub use mode::{to_object, to_storable};
pub use persist::{read_cutout, write_atomic, StagedCutout, WriteOptions};
pub use prepare::{FeaturePreparer, PrepareOptions, PrepareReport};
pub use provider::{DownloadLock, FeatureSpec, FetchRequest, Provider, ScratchDir};
pub use store::CutoutStore;
