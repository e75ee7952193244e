//! Error types for cutout preparation and persistence.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Stage of a provider round in which an error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundStage {
    /// Provider data retrieval.
    Fetch,
    /// Merging fetched variables into the cutout snapshot.
    Merge,
    /// Writing the merged snapshot to disk.
    Persist,
}

impl RoundStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Merge => "merge",
            Self::Persist => "persist",
        }
    }
}

impl fmt::Display for RoundStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while building, preparing or persisting a cutout.
#[derive(Error, Debug)]
pub enum CutoutError {
    /// No registered provider declares the requested feature.
    #[error("unknown feature '{feature}'; available features: {}", .available.join(", "))]
    UnknownFeature {
        feature: String,
        available: Vec<String>,
    },

    /// More than one provider declares the requested feature.
    #[error("feature '{feature}' is declared by several providers: {}", .providers.join(", "))]
    AmbiguousFeature {
        feature: String,
        providers: Vec<String>,
    },

    /// A provider name that is not in the registry.
    #[error("unknown provider '{provider}'; registered providers: {}", .available.join(", "))]
    UnknownProvider {
        provider: String,
        available: Vec<String>,
    },

    /// Two providers registered under the same name.
    #[error("provider '{0}' is already registered")]
    DuplicateProvider(String),

    /// Two features declare the same output variable.
    #[error("variable '{variable}' is declared by both '{first}' and '{second}'")]
    DuplicateVariable {
        variable: String,
        first: String,
        second: String,
    },

    /// Incoming coordinates disagree with the cutout's coordinates.
    #[error("coordinate mismatch on axis '{axis}': {detail}")]
    CoordinateMismatch { axis: String, detail: String },

    /// A variable with this name is already present and overwriting is off.
    #[error("variable '{0}' already exists in the cutout (prepare with overwrite to replace it)")]
    VariableExists(String),

    /// A provider result lacks one of the variables its feature declares.
    #[error("provider '{provider}' returned no variable '{variable}' for feature '{feature}'")]
    MissingVariable {
        provider: String,
        feature: String,
        variable: String,
    },

    /// Variable data does not match the extent of its dimensions.
    #[error("variable '{variable}' holds {actual} values but dims {dims:?} span {expected}")]
    ShapeMismatch {
        variable: String,
        dims: Vec<String>,
        expected: usize,
        actual: usize,
    },

    /// A flat composite record could not be decoded.
    #[error("malformed '{slot}' slot at cell {cell}: {reason}")]
    Codec {
        slot: String,
        cell: String,
        reason: String,
    },

    /// Conversion between object and storable mode is not possible.
    #[error("mode conversion failed: {0}")]
    Mode(String),

    /// A provider failed to retrieve a feature. The source is kept as returned.
    #[error("provider '{provider}' failed to fetch feature '{feature}': {source}")]
    Provider {
        provider: String,
        feature: String,
        #[source]
        source: anyhow::Error,
    },

    /// A provider round failed after all fetches succeeded.
    #[error("preparing {features:?} from provider '{provider}' failed during {stage}: {source}")]
    Round {
        provider: String,
        features: Vec<String>,
        stage: RoundStage,
        #[source]
        source: Box<CutoutError>,
    },

    /// A cutout construction parameter is required but absent.
    #[error("missing cutout parameter '{0}' (x, y and time are required to build a new cutout)")]
    MissingParameter(String),

    /// A cutout construction parameter has an unusable value.
    #[error("invalid cutout parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// The cutout file exists but is not a valid cutout document.
    #[error("invalid cutout file {}: {reason}", .path.display())]
    Format { path: PathBuf, reason: String },

    /// Filesystem failure.
    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A blocking background task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl CutoutError {
    /// Create a Codec error.
    pub fn codec(
        slot: impl Into<String>,
        cell: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Codec {
            slot: slot.into(),
            cell: cell.into(),
            reason: reason.into(),
        }
    }

    /// Create a CoordinateMismatch error.
    pub fn coordinate_mismatch(axis: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::CoordinateMismatch {
            axis: axis.into(),
            detail: detail.into(),
        }
    }

    /// Create an InvalidParameter error.
    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a Format error.
    pub fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an Io error.
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// Wrap an error raised during a provider round.
    pub fn in_round(self, provider: &str, features: &[String], stage: RoundStage) -> Self {
        Self::Round {
            provider: provider.to_string(),
            features: features.to_vec(),
            stage,
            source: Box::new(self),
        }
    }

    /// The innermost cutout error, looking through round wrappers.
    pub fn root(&self) -> &CutoutError {
        match self {
            Self::Round { source, .. } => source.root(),
            other => other,
        }
    }

    /// The stage of the failing provider round, if the error came from one.
    pub fn stage(&self) -> Option<RoundStage> {
        match self {
            Self::Round { stage, .. } => Some(*stage),
            Self::Provider { .. } => Some(RoundStage::Fetch),
            _ => None,
        }
    }
}

impl From<tokio::task::JoinError> for CutoutError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

/// Result type for cutout operations.
pub type Result<T> = std::result::Result<T, CutoutError>;
