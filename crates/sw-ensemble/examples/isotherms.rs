//! Computes the pressure of a Van der Waals gas over a lattice of molar
//! volumes and temperatures, then writes the table as a Python module.
//!
//! ```text
//! cargo run --example isotherms -- [input.yaml]
//! ```
//!
//! The output lands next to the input as `<stem>_rs.py`.

use anyhow::Context;
use std::path::{Path, PathBuf};

use sw_ensemble::load_ensemble;
use sw_types::SwResult;

// Universal gas constant [J / (mol K)].
const R: f64 = 8.31446261815324;

fn output_file_name(input_file: &Path) -> PathBuf {
    let stem = input_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "isotherms".to_string());
    input_file.with_file_name(format!("{stem}_rs.py"))
}

fn main() -> anyhow::Result<()> {
    let input_file = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new(env!("CARGO_MANIFEST_DIR")).join("examples/isotherms.yaml"));

    println!("{}", sw_ensemble::banner());
    println!("isotherms: Loading ensemble from {}...", input_file.display());
    let mut load = load_ensemble(&input_file, Some("settings"))
        .with_context(|| format!("could not load {}", input_file.display()))?;
    println!("isotherms: found {} ensemble members.", load.ensemble.size());

    load.ensemble.process(|input, output| -> SwResult<()> {
        let v = input.get("V")?;
        let t = input.get("T")?;

        // Ideal gas when the Van der Waals parameters are absent.
        let a = if input.has("a") { input.get("a")? } else { 0.0 };
        let b = if input.has("b") { input.get("b")? } else { 0.0 };

        output.set("p", R * t / (v - b) - a / (v * v));
        Ok(())
    })?;

    let output_file = output_file_name(&input_file);
    println!("isotherms: Writing data to {}...", output_file.display());
    load.ensemble.write(&output_file)?;
    Ok(())
}
