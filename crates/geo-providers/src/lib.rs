//! Concrete data providers for georetriever cutouts.
//!
//! - [`aquifer_depth`]: depth to crystalline basement, interpolated from a
//!   local crustal model table
//! - [`macrostrat`]: per-cell lithology from the Macrostrat geologic map
//!
//! [`build_registry`] wires both into a [`ProviderRegistry`] from their
//! configurations.

pub mod aquifer_depth;
pub mod config;
pub mod error;
pub mod macrostrat;

use std::sync::Arc;

use geo_cutout::ProviderRegistry;

pub use aquifer_depth::{AquiferDepthProvider, DepthSample, IdwInterpolator};
pub use config::{AquiferDepthConfig, MacrostratConfig};
pub use error::{ProviderError, Result};
pub use macrostrat::{GeologicUnit, MacrostratClient, MacrostratProvider, UnitLookup};

/// Register every built-in provider.
pub fn build_registry(
    aquifer: &AquiferDepthConfig,
    macrostrat: &MacrostratConfig,
) -> Result<ProviderRegistry> {
    aquifer.validate()?;
    macrostrat.validate()?;

    let registry = ProviderRegistry::new()
        .with(Arc::new(AquiferDepthProvider::new(aquifer)))?
        .with(Arc::new(MacrostratProvider::from_config(macrostrat)?))?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_cutout::FeatureCatalog;

    #[test]
    fn test_build_registry() {
        let registry =
            build_registry(&AquiferDepthConfig::default(), &MacrostratConfig::default()).unwrap();
        assert_eq!(registry.names(), vec!["aquifer_depth", "macrostrat"]);

        let catalog = FeatureCatalog::new(registry);
        assert_eq!(catalog.resolve("lithology").unwrap(), "macrostrat");
        assert_eq!(catalog.resolve("aquifer_depth").unwrap(), "aquifer_depth");
    }

    #[test]
    fn test_build_registry_rejects_bad_config() {
        let mut macrostrat = MacrostratConfig::default();
        macrostrat.timeout_secs = 0;
        assert!(build_registry(&AquiferDepthConfig::default(), &macrostrat).is_err());
    }
}
