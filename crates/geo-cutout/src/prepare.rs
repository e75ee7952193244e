//! Feature preparation: fetch what is missing, merge it, persist atomically.
//!
//! Work is done in provider rounds. Every round fetches all of its features
//! concurrently, merges them into a fresh snapshot of the cutout and
//! replaces the cutout file. A round either lands completely (file and
//! `prepared_features` updated together) or not at all.

use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info};

use crate::catalog::{FeatureCatalog, ProviderRound};
use crate::config::RetrieverConfig;
use crate::dataset::{normalize_attrs, Attrs, Dataset, FEATURE_ATTR, PROVIDER_ATTR};
use crate::error::{CutoutError, Result, RoundStage};
use crate::mode::to_storable;
use crate::persist::write_atomic;
use crate::provider::{DownloadLock, FetchRequest, ScratchDir};
use crate::store::CutoutStore;

/// What to prepare.
#[derive(Debug, Clone, Default)]
pub struct PrepareOptions {
    /// Features to prepare; every catalog feature when `None`.
    pub features: Option<Vec<String>>,
    /// Refetch prepared features and replace existing variables.
    pub overwrite: bool,
    /// Scratch directory override for this call.
    pub scratch_dir: Option<PathBuf>,
}

impl PrepareOptions {
    /// Prepare every feature in the catalog.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn features<I, S>(features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            features: Some(features.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }
}

/// Outcome of one `prepare` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrepareReport {
    /// Features fetched and persisted by this call.
    pub prepared: Vec<String>,
    /// Requested features that were already prepared.
    pub skipped: Vec<String>,
    /// Provider rounds that ran, in order.
    pub rounds: Vec<ProviderRound>,
}

impl PrepareReport {
    pub fn is_noop(&self) -> bool {
        self.rounds.is_empty()
    }
}

/// Orchestrates provider rounds against a cutout.
#[derive(Debug, Clone)]
pub struct FeaturePreparer {
    catalog: FeatureCatalog,
    config: RetrieverConfig,
}

impl FeaturePreparer {
    pub fn new(catalog: FeatureCatalog, config: RetrieverConfig) -> Self {
        Self { catalog, config }
    }

    pub fn catalog(&self) -> &FeatureCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Prepare the requested features on `store`.
    ///
    /// Features already listed in `prepared_features` are skipped unless
    /// `overwrite` is set. All names are resolved before anything is
    /// fetched. On error, rounds that completed before the failing one stay
    /// persisted and the failing round leaves no trace.
    pub async fn prepare(
        &self,
        store: &mut CutoutStore,
        options: PrepareOptions,
    ) -> Result<PrepareReport> {
        let requested = match options.features {
            Some(features) => dedup(features),
            None => self.catalog.feature_names(),
        };
        for feature in &requested {
            self.catalog.resolve(feature)?;
        }

        let already = store.load().await?.prepared_features();
        let (skipped, missing): (Vec<String>, Vec<String>) = requested
            .into_iter()
            .partition(|f| !options.overwrite && already.contains(f));

        let mut report = PrepareReport {
            skipped,
            ..PrepareReport::default()
        };

        if missing.is_empty() {
            info!(
                path = %store.path().display(),
                skipped = ?report.skipped,
                "All requested features already prepared"
            );
            return Ok(report);
        }

        let rounds = self.catalog.plan(&missing)?;
        let requested_dir = options
            .scratch_dir
            .as_deref()
            .or(self.config.scratch_dir.as_deref());
        let scratch = ScratchDir::acquire(requested_dir)?;
        let lock = DownloadLock::new();

        for round in rounds {
            self.run_round(store, &round, scratch.path(), &lock, options.overwrite)
                .await?;
            report.prepared.extend(round.features.iter().cloned());
            report.rounds.push(round);
        }

        info!(
            path = %store.path().display(),
            prepared = ?report.prepared,
            rounds = report.rounds.len(),
            "Cutout prepared"
        );
        Ok(report)
    }

    async fn run_round(
        &self,
        store: &mut CutoutStore,
        round: &ProviderRound,
        scratch_dir: &Path,
        lock: &DownloadLock,
        overwrite: bool,
    ) -> Result<()> {
        let provider = self.catalog.provider(&round.provider)?;
        let current = store.load().await?.clone();

        info!(
            provider = %round.provider,
            features = ?round.features,
            "Starting provider round"
        );

        let fetches = round.features.iter().map(|feature| {
            let request = FetchRequest {
                frame: &current.coords,
                feature,
                scratch_dir,
                lock,
                params: &current.attrs,
            };
            async move {
                debug!(provider = %provider.name(), feature = %feature, "Fetching feature");
                match provider.get_data(request).await {
                    Ok(data) => Ok((feature.clone(), data)),
                    Err(source) => Err(CutoutError::Provider {
                        provider: provider.name().to_string(),
                        feature: feature.clone(),
                        source,
                    }),
                }
            }
        });
        let results: Vec<(String, Dataset)> = stream::iter(fetches)
            .buffered(self.config.parallel_fetches.max(1))
            .try_collect()
            .await?;

        let snapshot = self
            .merge_round(&current, round, results, overwrite)
            .map_err(|e| e.in_round(&round.provider, &round.features, RoundStage::Merge))?;

        let target = store.path().to_path_buf();
        let options = store.write_options();
        tokio::task::spawn_blocking(move || write_atomic(&to_storable(snapshot)?, &target, options))
            .await
            .map_err(CutoutError::from)
            .and_then(|written| written)
            .map_err(|e| e.in_round(&round.provider, &round.features, RoundStage::Persist))?;

        store.mark_persisted();
        info!(
            provider = %round.provider,
            features = ?round.features,
            path = %store.path().display(),
            "Provider round persisted"
        );
        Ok(())
    }

    /// Build the post-round snapshot from the fetch results.
    fn merge_round(
        &self,
        current: &Dataset,
        round: &ProviderRound,
        results: Vec<(String, Dataset)>,
        overwrite: bool,
    ) -> Result<Dataset> {
        let mut incoming = Dataset::new(current.coords.clone());
        let mut incoming_attrs = Attrs::new();

        for (feature, data) in results {
            let declared = self.catalog.variables_for(&round.provider, &feature)?;
            let mut selected = Dataset::new(data.coords.clone());
            for name in &declared {
                let variable = data
                    .variable(name)
                    .cloned()
                    .ok_or_else(|| CutoutError::MissingVariable {
                        provider: round.provider.clone(),
                        feature: feature.clone(),
                        variable: name.clone(),
                    })?
                    .with_attr(PROVIDER_ATTR, round.provider.as_str())
                    .with_attr(FEATURE_ATTR, feature.as_str());
                selected.insert_variable(name.clone(), variable)?;
            }

            let extra = data.variables.len() - declared.len().min(data.variables.len());
            if extra > 0 {
                debug!(feature = %feature, extra, "Dropping undeclared provider variables");
            }

            incoming = incoming.merge(&selected, false)?;
            incoming_attrs.extend(data.attrs);
        }

        let mut merged = current.merge(&incoming, overwrite)?;
        merged.attrs.extend(normalize_attrs(&incoming_attrs));

        let mut prepared = current.prepared_features();
        prepared.extend(round.features.iter().cloned());
        merged.set_prepared_features(&prepared);
        Ok(merged)
    }
}

/// Drop repeated names, keeping first occurrences.
fn dedup(features: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(features.len());
    for feature in features {
        if !out.contains(&feature) {
            out.push(feature);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_keeps_order() {
        let input = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(dedup(input), vec!["b", "a"]);
    }

    #[test]
    fn test_options_builders() {
        let options = PrepareOptions::features(["lithology"])
            .with_overwrite(true)
            .with_scratch_dir("/tmp/scratch");
        assert_eq!(options.features, Some(vec!["lithology".to_string()]));
        assert!(options.overwrite);
        assert_eq!(options.scratch_dir, Some(PathBuf::from("/tmp/scratch")));
        assert!(PrepareOptions::all().features.is_none());
    }
}
