//! Error types for pipeline and filter operations.

use thiserror::Error;

/// Error type for pipeline and filter operations.
///
/// Configuration problems (bad wiring, bad property values, out-of-range
/// channels) are reported here. Missing data never is: filters return
/// blank tiles with the matching status instead.
#[derive(Error, Debug)]
pub enum FilterError {
    /// Error from the buffer layer.
    #[error(transparent)]
    Core(#[from] tilechain_core::Error),

    /// Stage id does not exist in the pipeline.
    #[error("unknown stage #{0}")]
    UnknownStage(usize),

    /// Stage wired to an unacceptable set of inputs.
    #[error("invalid inputs for stage '{stage}': {reason}")]
    InvalidInputs {
        /// Stage name
        stage: String,
        /// What is wrong with the wiring
        reason: String,
    },

    /// Stage evaluated while it is already being evaluated.
    #[error("stage '{0}' is busy (re-entrant evaluation)")]
    StageBusy(String),

    /// 1-based channel index outside `[1, bands]`.
    #[error("channel index {index} out of range for {bands}-band input")]
    ChannelIndex {
        /// Offending index (1-based)
        index: usize,
        /// Input band count
        bands: usize,
    },

    /// Output band mapping is not a permutation of `{0, 1, 2}`.
    #[error("invalid band mapping {0:?}: expected a permutation of [0, 1, 2]")]
    InvalidBandMapping(Vec<usize>),

    /// Property name not recognised by the stage.
    #[error("stage '{stage}' has no property '{name}'")]
    UnknownProperty {
        /// Stage kind
        stage: String,
        /// Property name
        name: String,
    },

    /// Property value has the wrong type or is out of range.
    #[error("invalid value for property '{name}': {reason}")]
    InvalidProperty {
        /// Property name
        name: String,
        /// Reason why the value was rejected
        reason: String,
    },

    /// Keyword list could not be applied.
    #[error("state error: {0}")]
    State(String),

    /// YAML (de)serialisation failure.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// File I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FilterError {
    /// Creates an [`FilterError::InvalidInputs`] error.
    pub fn invalid_inputs(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInputs {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    /// Creates an [`FilterError::UnknownProperty`] error.
    pub fn unknown_property(stage: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UnknownProperty {
            stage: stage.into(),
            name: name.into(),
        }
    }

    /// Creates an [`FilterError::InvalidProperty`] error.
    pub fn invalid_property(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidProperty {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for errors caused by pipeline or filter configuration.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInputs { .. }
                | Self::ChannelIndex { .. }
                | Self::InvalidBandMapping(_)
                | Self::UnknownProperty { .. }
                | Self::InvalidProperty { .. }
        )
    }
}

/// Result type for pipeline and filter operations.
pub type FilterResult<T> = Result<T, FilterError>;
