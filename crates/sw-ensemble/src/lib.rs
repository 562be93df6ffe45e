//! # sw-ensemble
//!
//! Generation, traversal and serialization of Skywalker parameter ensembles.
//!
//! A typical driver loads a configuration, visits every member, records
//! metrics, and writes the results:
//!
//! ```no_run
//! use sw_ensemble::load_ensemble;
//!
//! let mut load = load_ensemble("input.yaml", Some("settings"))?;
//! while let Some((input, output)) = load.ensemble.next_member() {
//!     let x = input.get("x")?;
//!     output.set("y", x * x);
//! }
//! load.ensemble.write("ensemble_output.py")?;
//! # Ok::<(), sw_types::SwError>(())
//! ```

pub mod config;
pub mod ensemble;
pub mod generator;
pub mod loader;
pub mod spec;
pub mod writer;

pub use config::{LoaderConfig, WriterConfig};
pub use ensemble::Ensemble;
pub use generator::generate;
pub use loader::{load_ensemble, EnsembleLoad, EnsembleLoader};
pub use spec::{
    AxisScale, AxisValues, EnsembleKind, EnsembleSpec, FnGenerator, ParameterAxis, UserGenerator,
};
pub use writer::{format_real, EnsembleWriter, JsonWriter, OutputFormat, PythonModuleWriter};

/// Library version, as published in the crate manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The one-line banner printed by drivers at startup.
pub fn banner() -> String {
    format!("Skywalker v{VERSION}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banner_carries_version() {
        assert!(banner().starts_with("Skywalker v"));
        assert!(banner().ends_with(VERSION));
    }
}
