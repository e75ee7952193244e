//! Subcommand implementations.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args as ClapArgs;
use geo_cutout::{
    AttrValue, AvailableFeature, CutoutParams, CutoutStore, FeatureCatalog, FeaturePreparer,
    PrepareOptions, PrepareReport, RetrieverConfig,
};
use geo_providers::{build_registry, AquiferDepthConfig, MacrostratConfig};
use tracing::info;

#[derive(ClapArgs, Debug)]
pub struct FeaturesArgs {
    /// Only list these providers
    #[arg(long = "provider", value_name = "NAME")]
    pub providers: Vec<String>,
}

#[derive(ClapArgs, Debug)]
pub struct PrepareArgs {
    /// Cutout file to open or create
    #[arg(long)]
    pub path: PathBuf,

    /// Longitude range
    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"], allow_negative_numbers = true)]
    pub x: Option<Vec<f64>>,

    /// Latitude range
    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"], allow_negative_numbers = true)]
    pub y: Option<Vec<f64>>,

    /// Period: `2019`, `2019-01`, `2019-01-05` or `start/end`
    #[arg(long)]
    pub time: Option<String>,

    /// Longitude step in degrees
    #[arg(long)]
    pub dx: Option<f64>,

    /// Latitude step in degrees
    #[arg(long)]
    pub dy: Option<f64>,

    /// Time frequency (`h`, `3h`, `d`)
    #[arg(long)]
    pub dt: Option<String>,

    /// Chunking hint stored with the cutout
    #[arg(long = "chunk", value_name = "DIM=SIZE")]
    pub chunks: Vec<String>,

    /// Feature to prepare (default: all)
    #[arg(long = "feature", value_name = "NAME")]
    pub features: Vec<String>,

    /// Fetch features again even if already prepared
    #[arg(long)]
    pub overwrite: bool,

    /// Scratch directory handed to providers
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,
}

impl PrepareArgs {
    /// Construction parameters, `None` when no frame option was given.
    pub fn params(&self) -> Result<Option<CutoutParams>> {
        let given = self.x.is_some()
            || self.y.is_some()
            || self.time.is_some()
            || self.dx.is_some()
            || self.dy.is_some()
            || self.dt.is_some()
            || !self.chunks.is_empty();
        if !given {
            return Ok(None);
        }

        let mut extra = BTreeMap::new();
        for chunk in &self.chunks {
            let (dim, size) = chunk
                .split_once('=')
                .with_context(|| format!("chunk '{}' is not DIM=SIZE", chunk))?;
            let size: i64 = size
                .trim()
                .parse()
                .with_context(|| format!("chunk size for '{}' is not an integer", dim))?;
            if size <= 0 {
                bail!("chunk size for '{}' must be positive", dim);
            }
            extra.insert(format!("chunksize_{}", dim.trim()), AttrValue::Int(size));
        }

        Ok(Some(CutoutParams {
            x: self.x.as_deref().map(range),
            y: self.y.as_deref().map(range),
            time: self.time.clone(),
            dx: self.dx,
            dy: self.dy,
            dt: self.dt.clone(),
            extra,
        }))
    }

    pub fn options(&self) -> PrepareOptions {
        let options = if self.features.is_empty() {
            PrepareOptions::all()
        } else {
            PrepareOptions::features(self.features.iter().cloned())
        };
        let options = options.with_overwrite(self.overwrite);
        match &self.scratch_dir {
            Some(dir) => options.with_scratch_dir(dir),
            None => options,
        }
    }
}

#[derive(ClapArgs, Debug)]
pub struct InspectArgs {
    /// Cutout file
    #[arg(long)]
    pub path: PathBuf,
}

#[derive(ClapArgs, Debug)]
pub struct ExportArgs {
    /// Cutout file
    #[arg(long)]
    pub path: PathBuf,

    /// Destination file
    #[arg(long)]
    pub to: PathBuf,
}

fn range(values: &[f64]) -> (f64, f64) {
    (values[0], values[values.len() - 1])
}

/// Retriever settings from a YAML file, or from the environment.
pub fn load_config(path: Option<&Path>) -> Result<RetrieverConfig> {
    match path {
        Some(path) => RetrieverConfig::from_yaml(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => {
            let config = RetrieverConfig::from_env();
            config.validate()?;
            Ok(config)
        }
    }
}

fn catalog() -> Result<FeatureCatalog> {
    let registry = build_registry(&AquiferDepthConfig::from_env(), &MacrostratConfig::from_env())
        .context("Failed to set up providers")?;
    Ok(FeatureCatalog::new(registry))
}

pub fn features(args: FeaturesArgs) -> Result<()> {
    let catalog = catalog()?;
    let filter: Vec<&str> = args.providers.iter().map(String::as_str).collect();
    let entries = catalog.list_available((!filter.is_empty()).then_some(filter.as_slice()))?;
    print!("{}", render_catalog(&entries));
    Ok(())
}

pub async fn prepare(args: PrepareArgs, config: RetrieverConfig) -> Result<()> {
    let params = args.params()?;
    let mut store = CutoutStore::open_or_create(&args.path, params.as_ref(), &config)?;
    let preparer = FeaturePreparer::new(catalog()?, config);

    let report = preparer.prepare(&mut store, args.options()).await?;
    info!(
        path = %store.path().display(),
        prepared = ?report.prepared,
        skipped = ?report.skipped,
        "Preparation finished"
    );
    print!("{}", render_report(&store, &report));
    Ok(())
}

pub async fn inspect(args: InspectArgs, config: &RetrieverConfig) -> Result<()> {
    let store = CutoutStore::open(&args.path, config).await?;
    print!("{}", render_summary(&store)?);
    Ok(())
}

pub async fn export(args: ExportArgs, config: &RetrieverConfig) -> Result<()> {
    let store = CutoutStore::open(&args.path, config).await?;
    store.export(&args.to).await?;
    info!(from = %args.path.display(), to = %args.to.display(), "Exported cutout");
    Ok(())
}

pub fn render_catalog(entries: &[AvailableFeature]) -> String {
    let mut out = String::new();
    for entry in entries {
        let variables: Vec<&str> = entry.variables.iter().map(String::as_str).collect();
        let _ = writeln!(
            out,
            "{:<16} {:<16} {}",
            entry.provider,
            entry.feature,
            variables.join(", ")
        );
    }
    out
}

fn render_report(store: &CutoutStore, report: &PrepareReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "cutout:   {}", store.path().display());
    let _ = writeln!(out, "prepared: {}", list_or_dash(&report.prepared));
    let _ = writeln!(out, "skipped:  {}", list_or_dash(&report.skipped));
    for round in &report.rounds {
        let _ = writeln!(out, "  {} -> {}", round.provider, round.features.join(", "));
    }
    out
}

fn list_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

fn attr_text(value: &AttrValue) -> String {
    match value {
        AttrValue::Text(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

pub fn render_summary(store: &CutoutStore) -> Result<String> {
    let dataset = store.dataset()?;
    let coords = &dataset.coords;
    let mut out = String::new();

    let _ = writeln!(out, "name:     {}", store.name());
    let _ = writeln!(out, "path:     {}", store.path().display());
    let _ = writeln!(out, "crs:      {}", store.crs());
    let _ = writeln!(
        out,
        "x:        {} points, dx={}",
        coords.x.len(),
        coords.dx().map(|d| d.to_string()).unwrap_or_else(|| "-".into())
    );
    let _ = writeln!(
        out,
        "y:        {} points, dy={}",
        coords.y.len(),
        coords.dy().map(|d| d.to_string()).unwrap_or_else(|| "-".into())
    );
    match &coords.time {
        Some(time) if !time.is_empty() => {
            let _ = writeln!(
                out,
                "time:     {} steps, {} .. {}",
                time.len(),
                time[0].to_rfc3339(),
                time[time.len() - 1].to_rfc3339()
            );
        }
        _ => {
            let _ = writeln!(out, "time:     -");
        }
    }
    if let Some([x0, y0, x1, y1]) = coords.bounds() {
        let _ = writeln!(out, "bounds:   [{}, {}, {}, {}]", x0, y0, x1, y1);
    }

    let prepared: Vec<String> = dataset.prepared_features().into_iter().collect();
    let _ = writeln!(out, "prepared: {}", list_or_dash(&prepared));

    let _ = writeln!(out, "variables:");
    for (name, variable) in &dataset.variables {
        let _ = writeln!(
            out,
            "  {:<16} ({}) {} [{}]",
            name,
            variable.dims.join(", "),
            variable.data.dtype(),
            variable.provider().unwrap_or("-")
        );
    }

    let _ = writeln!(out, "attrs:");
    for (key, value) in &dataset.attrs {
        let _ = writeln!(out, "  {} = {}", key, attr_text(value));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use test_utils::{cutout_path, temp_test_dir, tiny_params};

    #[derive(Parser, Debug)]
    struct Cli {
        #[command(flatten)]
        prepare: PrepareArgs,
    }

    fn parse(args: &[&str]) -> PrepareArgs {
        let argv = std::iter::once("georetriever").chain(args.iter().copied());
        Cli::try_parse_from(argv).unwrap().prepare
    }

    #[test]
    fn test_prepare_args_without_frame() {
        let args = parse(&["--path", "uk.cutout.gz", "--feature", "lithology"]);
        assert!(args.params().unwrap().is_none());
        assert_eq!(args.features, vec!["lithology"]);
    }

    #[test]
    fn test_prepare_args_build_params() {
        let args = parse(&[
            "--path", "uk.cutout.gz", "--x", "-1.5", "-1.0", "--y", "50", "51", "--time",
            "2019-01-01", "--chunk", "time=100",
        ]);
        let params = args.params().unwrap().unwrap();
        assert_eq!(params.x, Some((-1.5, -1.0)));
        assert_eq!(params.y, Some((50.0, 51.0)));
        assert_eq!(params.extra.get("chunksize_time"), Some(&AttrValue::Int(100)));
    }

    #[test]
    fn test_prepare_args_reject_bad_chunk() {
        let args = parse(&["--path", "a", "--chunk", "time"]);
        assert!(args.params().is_err());
        let args = parse(&["--path", "a", "--chunk", "time=0"]);
        assert!(args.params().is_err());
    }

    #[test]
    fn test_render_catalog() {
        let entries = vec![AvailableFeature {
            provider: "macrostrat".to_string(),
            feature: "lithology".to_string(),
            variables: ["lithology".to_string()].into_iter().collect(),
        }];
        let text = render_catalog(&entries);
        assert!(text.starts_with("macrostrat"));
        assert!(text.trim_end().ends_with("lithology"));
    }

    #[test]
    fn test_render_summary_of_new_cutout() {
        let dir = temp_test_dir();
        let store = CutoutStore::create(
            cutout_path(dir.path(), "tiny"),
            &tiny_params(),
            &RetrieverConfig::default(),
        )
        .unwrap();

        let text = render_summary(&store).unwrap();
        assert!(text.contains("name:     tiny"));
        assert!(text.contains("x:        3 points, dx=0.25"));
        assert!(text.contains("time:     24 steps"));
        assert!(text.contains("prepared: -"));
        assert!(text.contains("dt = h"));
    }
}
