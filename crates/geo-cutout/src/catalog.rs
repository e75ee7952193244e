//! Provider registry and feature catalog.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::{CutoutError, Result};
use crate::provider::Provider;

/// Explicit set of providers, in registration order.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.providers.iter().map(|p| p.name()))
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider.
    ///
    /// Rejects a second provider with the same name and any variable that
    /// is already declared by another feature.
    pub fn register(&mut self, provider: Arc<dyn Provider>) -> Result<()> {
        if self.get(provider.name()).is_some() {
            return Err(CutoutError::DuplicateProvider(provider.name().to_string()));
        }

        let mut owners: BTreeMap<String, String> = BTreeMap::new();
        for existing in &self.providers {
            for spec in existing.features() {
                for var in &spec.variables {
                    owners.insert(var.clone(), format!("{}/{}", existing.name(), spec.name));
                }
            }
        }
        for spec in provider.features() {
            for var in &spec.variables {
                let owner = format!("{}/{}", provider.name(), spec.name);
                if let Some(first) = owners.insert(var.clone(), owner.clone()) {
                    return Err(CutoutError::DuplicateVariable {
                        variable: var.clone(),
                        first,
                        second: owner,
                    });
                }
            }
        }

        self.providers.push(provider);
        Ok(())
    }

    /// Builder form of [`ProviderRegistry::register`].
    pub fn with(mut self, provider: Arc<dyn Provider>) -> Result<Self> {
        self.register(provider)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Provider>> {
        self.providers.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableFeature {
    pub provider: String,
    pub feature: String,
    pub variables: BTreeSet<String>,
}

/// Features grouped for one provider, in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRound {
    pub provider: String,
    pub features: Vec<String>,
}

/// Answers which provider produces a feature and what is available.
#[derive(Debug, Clone)]
pub struct FeatureCatalog {
    registry: ProviderRegistry,
}

impl FeatureCatalog {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn provider(&self, name: &str) -> Result<&Arc<dyn Provider>> {
        self.registry
            .get(name)
            .ok_or_else(|| CutoutError::UnknownProvider {
                provider: name.to_string(),
                available: self.registry.names(),
            })
    }

    /// Catalog entries ordered by provider registration, then feature name.
    ///
    /// `providers` restricts the listing; unknown names are an error.
    pub fn list_available(&self, providers: Option<&[&str]>) -> Result<Vec<AvailableFeature>> {
        if let Some(names) = providers {
            for name in names {
                self.provider(name)?;
            }
        }

        let mut out = Vec::new();
        for provider in self.registry.iter() {
            if let Some(names) = providers {
                if !names.iter().any(|n| *n == provider.name()) {
                    continue;
                }
            }
            let mut entries: Vec<AvailableFeature> = provider
                .features()
                .iter()
                .map(|spec| AvailableFeature {
                    provider: provider.name().to_string(),
                    feature: spec.name.clone(),
                    variables: spec.variables.iter().cloned().collect(),
                })
                .collect();
            entries.sort_by(|a, b| a.feature.cmp(&b.feature));
            out.extend(entries);
        }
        Ok(out)
    }

    /// Every feature name, deduplicated and sorted.
    pub fn feature_names(&self) -> Vec<String> {
        let names: BTreeSet<String> = self
            .registry
            .iter()
            .flat_map(|p| p.features().iter().map(|f| f.name.clone()))
            .collect();
        names.into_iter().collect()
    }

    /// Name of the single provider declaring `feature`.
    pub fn resolve(&self, feature: &str) -> Result<&str> {
        let providers: Vec<&str> = self
            .registry
            .iter()
            .filter(|p| p.features().iter().any(|f| f.name == feature))
            .map(|p| p.name())
            .collect();

        match providers.as_slice() {
            [] => Err(CutoutError::UnknownFeature {
                feature: feature.to_string(),
                available: self.feature_names(),
            }),
            [single] => Ok(*single),
            _ => Err(CutoutError::AmbiguousFeature {
                feature: feature.to_string(),
                providers: providers.iter().map(|p| p.to_string()).collect(),
            }),
        }
    }

    /// Variables declared by `provider` for `feature`.
    pub fn variables_for(&self, provider: &str, feature: &str) -> Result<Vec<String>> {
        let p = self.provider(provider)?;
        p.features()
            .iter()
            .find(|f| f.name == feature)
            .map(|f| f.variables.clone())
            .ok_or_else(|| CutoutError::UnknownFeature {
                feature: feature.to_string(),
                available: p.features().iter().map(|f| f.name.clone()).collect(),
            })
    }

    /// Resolve and group features into one round per provider.
    ///
    /// Rounds follow provider registration order. Duplicated requests are
    /// collapsed. Every name is resolved before anything is returned.
    pub fn plan(&self, features: &[String]) -> Result<Vec<ProviderRound>> {
        let mut by_provider: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for feature in features {
            let provider = self.resolve(feature)?;
            let group = by_provider.entry(provider).or_default();
            if !group.contains(feature) {
                group.push(feature.clone());
            }
        }

        Ok(self
            .registry
            .iter()
            .filter_map(|p| {
                by_provider.remove(p.name()).map(|features| ProviderRound {
                    provider: p.name().to_string(),
                    features,
                })
            })
            .collect())
    }
}
