//! Loader and writer configuration.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::writer::OutputFormat;

/// Environment variable overriding the number of significant digits written.
pub const REAL_PRECISION_ENV: &str = "SKYWALKER_REAL_PRECISION";

/// Default name of the top-level block that describes the ensemble.
pub const DEFAULT_ENSEMBLE_BLOCK: &str = "input";

/// Controls which blocks of a configuration document are read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Name of the settings block, or `None` to load no settings.
    pub settings_block: Option<String>,

    /// Name of the block holding the ensemble sections.
    pub ensemble_block: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            settings_block: None,
            ensemble_block: DEFAULT_ENSEMBLE_BLOCK.to_string(),
        }
    }
}

impl LoaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings_block(mut self, block: impl Into<String>) -> Self {
        self.settings_block = Some(block.into());
        self
    }

    pub fn with_ensemble_block(mut self, block: impl Into<String>) -> Self {
        self.ensemble_block = block.into();
        self
    }
}

/// Controls how ensemble data is serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Significant digits used for real numbers (C `%.Ng` semantics).
    pub precision: usize,

    pub format: OutputFormat,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            precision: 10,
            format: OutputFormat::PythonModule,
        }
    }
}

impl WriterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, with the precision taken from `SKYWALKER_REAL_PRECISION` when
    /// it holds a positive integer.
    pub fn from_env() -> Self {
        let config = Self::default();
        match std::env::var(REAL_PRECISION_ENV) {
            Ok(text) => match text.trim().parse::<usize>() {
                Ok(precision) if precision > 0 => config.with_precision(precision),
                _ => {
                    warn!("Ignoring {}='{}': expected a positive integer", REAL_PRECISION_ENV, text);
                    config
                }
            },
            Err(_) => config,
        }
    }

    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }
}
