//! Serialization of ensemble inputs, outputs and settings.
//!
//! Two formats are supported: an importable Python module (the default) and
//! a JSON document. Both lay data out as columns sorted by name, with one
//! entry per member in generation order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

use sw_types::{is_valid_name, InputRecord, OutputRecord, ParamValue, Settings, SwError, SwResult};

use crate::config::WriterConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    PythonModule,
    Json,
}

impl OutputFormat {
    /// `.json` files get JSON; everything else gets a Python module.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::PythonModule,
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PythonModule => f.write_str("python"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = SwError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "python" | "py" | "python_module" => Ok(Self::PythonModule),
            "json" => Ok(Self::Json),
            other => Err(sw_types::invalid_value!("Unknown output format '{}'", other)),
        }
    }
}

/// One named column of the table: a cell per member, `None` where the member
/// has no value under that name.
#[derive(Debug, Clone)]
pub struct Column<'a> {
    pub name: &'a str,
    pub cells: Vec<Option<&'a ParamValue>>,
}

/// A columnar view over an ensemble, ready to be rendered.
#[derive(Debug, Clone)]
pub struct Table<'a> {
    pub settings: &'a Settings,
    pub inputs: Vec<Column<'a>>,
    pub outputs: Vec<Column<'a>>,
}

impl<'a> Table<'a> {
    pub fn new(settings: &'a Settings, records: &'a [(InputRecord, OutputRecord)]) -> Self {
        let input_names: Vec<&str> = records
            .first()
            .map(|(input, _)| input.schema().names().iter().map(String::as_str).collect())
            .unwrap_or_default();
        let inputs = input_names
            .into_iter()
            .map(|name| Column {
                name,
                cells: records.iter().map(|(input, _)| input.value(name)).collect(),
            })
            .collect();

        // Every metric set on any member becomes a column.
        let output_names: BTreeSet<&str> =
            records.iter().flat_map(|(_, output)| output.names()).collect();
        let outputs = output_names
            .into_iter()
            .map(|name| Column {
                name,
                cells: records.iter().map(|(_, output)| output.value(name)).collect(),
            })
            .collect();

        Self {
            settings,
            inputs,
            outputs,
        }
    }
}

/// Renders a [`Table`] into the text of one output format.
pub trait EnsembleWriter {
    fn format(&self) -> OutputFormat;

    fn render(&self, table: &Table<'_>) -> SwResult<String>;
}

/// Picks the writer for `config.format`.
pub fn writer_for(config: &WriterConfig) -> Box<dyn EnsembleWriter> {
    match config.format {
        OutputFormat::PythonModule => Box::new(PythonModuleWriter::new(config.precision)),
        OutputFormat::Json => Box::new(JsonWriter),
    }
}

/// Renders `table` with `config` and writes the result to `path`.
pub fn write_table(path: &Path, table: &Table<'_>, config: &WriterConfig) -> SwResult<()> {
    let writer = writer_for(config);
    let text = writer.render(table)?;
    std::fs::write(path, text)
        .map_err(|e| SwError::io("write ensemble data to", path.display().to_string(), e))?;
    info!("Wrote ensemble data to {} ({})", path.display(), writer.format());
    Ok(())
}

/// Writes a module that Python can import directly:
/// `settings`, `input` and `output` objects whose attributes are the columns.
#[derive(Debug, Clone)]
pub struct PythonModuleWriter {
    precision: usize,
}

impl PythonModuleWriter {
    pub fn new(precision: usize) -> Self {
        Self { precision }
    }

    fn cell(&self, cell: Option<&ParamValue>) -> String {
        match cell {
            None => "nan".to_string(),
            Some(ParamValue::Real(v)) => format_real(*v, self.precision),
            Some(ParamValue::Array(values)) => {
                let items: Vec<String> =
                    values.iter().map(|v| format_real(*v, self.precision)).collect();
                format!("[{}]", items.join(", "))
            }
        }
    }

    fn column(&self, out: &mut String, object: &str, column: &Column<'_>) {
        let items: Vec<String> = column.cells.iter().map(|cell| self.cell(*cell)).collect();
        assign(out, object, column.name, &format!("[{}]", items.join(", ")));
    }
}

impl EnsembleWriter for PythonModuleWriter {
    fn format(&self) -> OutputFormat {
        OutputFormat::PythonModule
    }

    fn render(&self, table: &Table<'_>) -> SwResult<String> {
        let mut out = String::new();
        out.push_str("# This file was automatically generated by skywalker.\n\n");
        out.push_str("from math import nan as nan, inf as inf\n\n");
        out.push_str("# Object is just a dynamic container that stores input/output data.\n");
        out.push_str("class Object(object):\n    pass\n\n");

        out.push_str("# Settings are stored here.\nsettings = Object()\n");
        for (name, value) in table.settings.iter() {
            assign(&mut out, "settings", name, &python_string(value));
        }

        out.push_str("\n# Input is stored here.\ninput = Object()\n");
        for column in &table.inputs {
            self.column(&mut out, "input", column);
        }

        out.push_str("\n# Output data is stored here.\noutput = Object()\n");
        for column in &table.outputs {
            self.column(&mut out, "output", column);
        }
        Ok(out)
    }
}

const PYTHON_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

fn assign(out: &mut String, object: &str, name: &str, rhs: &str) {
    if is_valid_name(name) && !PYTHON_KEYWORDS.contains(&name) {
        let _ = writeln!(out, "{object}.{name} = {rhs}");
    } else {
        let _ = writeln!(out, "setattr({object}, {}, {rhs})", python_string(name));
    }
}

fn python_string(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('\'');
    for c in text.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '\'' => quoted.push_str("\\'"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            c => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

/// Writes `{"settings": {...}, "input": {...}, "output": {...}}`.
///
/// Reals keep full precision; non-finite values and missing metrics are `null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonWriter;

impl JsonWriter {
    fn columns(columns: &[Column<'_>]) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = columns
            .iter()
            .map(|column| {
                let cells: serde_json::Value = column
                    .cells
                    .iter()
                    .map(|cell| match cell {
                        None => serde_json::Value::Null,
                        Some(ParamValue::Real(v)) => serde_json::Value::from(*v),
                        Some(ParamValue::Array(values)) => {
                            serde_json::Value::Array(values.iter().map(|v| (*v).into()).collect())
                        }
                    })
                    .collect();
                (column.name.to_string(), cells)
            })
            .collect();
        serde_json::Value::Object(map)
    }
}

impl EnsembleWriter for JsonWriter {
    fn format(&self) -> OutputFormat {
        OutputFormat::Json
    }

    fn render(&self, table: &Table<'_>) -> SwResult<String> {
        let settings: serde_json::Map<String, serde_json::Value> = table
            .settings
            .iter()
            .map(|(name, value)| (name.to_string(), value.into()))
            .collect();
        let document = serde_json::json!({
            "settings": settings,
            "input": Self::columns(&table.inputs),
            "output": Self::columns(&table.outputs),
        });
        let mut text = serde_json::to_string_pretty(&document)
            .map_err(|e| sw_types::invalid_value!("Could not encode ensemble as JSON: {}", e))?;
        text.push('\n');
        Ok(text)
    }
}

/// Formats `value` the way C's `printf("%.{precision}g", value)` does.
pub fn format_real(value: f64, precision: usize) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let precision = precision.max(1);
    let scientific = format!("{:.*e}", precision - 1, value);
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return scientific;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if exponent < -4 || exponent >= precision as i32 {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exponent.abs())
    } else {
        let decimals = (precision as i32 - 1 - exponent) as usize;
        trim_fraction(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn trim_fraction(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use sw_types::ParamSchema;

    #[test]
    fn format_real_matches_printf_g() {
        assert_eq!(format_real(1.0, 10), "1");
        assert_eq!(format_real(0.5, 10), "0.5");
        assert_eq!(format_real(245520.0, 10), "245520");
        assert_eq!(format_real(3.14159265357, 10), "3.141592654");
        assert_eq!(format_real(1e-5, 10), "1e-05");
        assert_eq!(format_real(0.0001, 10), "0.0001");
        assert_eq!(format_real(123456789012.0, 10), "1.23456789e+11");
        assert_eq!(format_real(-2.5e100, 10), "-2.5e+100");
        assert_eq!(format_real(1e10, 10), "1e+10");
        assert_eq!(format_real(0.1, 3), "0.1");
        assert_eq!(format_real(f64::NAN, 10), "nan");
        assert_eq!(format_real(f64::INFINITY, 10), "inf");
        assert_eq!(format_real(f64::NEG_INFINITY, 10), "-inf");
        assert_eq!(format_real(0.0, 10), "0");
    }

    fn records() -> Vec<(InputRecord, OutputRecord)> {
        let schema = Arc::new(ParamSchema::new(["x", "shape"]));
        (0..3)
            .map(|i| {
                let values = vec![ParamValue::Array(vec![1.0, 0.5]), ParamValue::Real(i as f64)];
                let input = InputRecord::new(schema.clone(), values).unwrap();
                let mut output = OutputRecord::new();
                if i != 1 {
                    output.set("y", (i * 10) as f64);
                }
                if i == 2 {
                    output.set("d.2", 7.0);
                }
                (input, output)
            })
            .collect()
    }

    #[test]
    fn python_module_layout() {
        let settings = Settings::from_pairs([("param1", "hello"), ("quote", "it's")]).unwrap();
        let records = records();
        let table = Table::new(&settings, &records);
        let text = PythonModuleWriter::new(10).render(&table).unwrap();

        assert!(text.starts_with("# This file was automatically generated by skywalker.\n"));
        assert!(text.contains("from math import nan as nan, inf as inf\n"));
        assert!(text.contains("class Object(object):\n    pass\n"));
        assert!(text.contains("settings.param1 = 'hello'\n"));
        assert!(text.contains("settings.quote = 'it\\'s'\n"));
        assert!(text.contains("input.shape = [[1, 0.5], [1, 0.5], [1, 0.5]]\n"));
        assert!(text.contains("input.x = [0, 1, 2]\n"));
        assert!(text.contains("output.y = [0, nan, 20]\n"));
        assert!(text.contains("setattr(output, 'd.2', [nan, nan, 7])\n"));

        // Columns are sorted by name.
        let shape = text.find("input.shape").unwrap();
        let x = text.find("input.x").unwrap();
        assert!(shape < x);
    }

    #[test]
    fn json_layout() {
        let settings = Settings::from_pairs([("param2", "81")]).unwrap();
        let records = records();
        let table = Table::new(&settings, &records);
        let text = JsonWriter.render(&table).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["settings"]["param2"], "81");
        assert_eq!(value["input"]["x"], serde_json::json!([0.0, 1.0, 2.0]));
        assert_eq!(value["input"]["shape"][0], serde_json::json!([1.0, 0.5]));
        assert_eq!(value["output"]["y"], serde_json::json!([0.0, null, 20.0]));
    }

    #[test]
    fn format_from_path_and_name() {
        assert_eq!(OutputFormat::from_path(Path::new("out.json")), OutputFormat::Json);
        assert_eq!(OutputFormat::from_path(Path::new("out.py")), OutputFormat::PythonModule);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("python".parse::<OutputFormat>().unwrap(), OutputFormat::PythonModule);
        assert!("csv".parse::<OutputFormat>().is_err());

        let config = WriterConfig::default().with_format(OutputFormat::Json);
        assert_eq!(writer_for(&config).format(), OutputFormat::Json);
        assert_eq!(
            writer_for(&WriterConfig::default()).format(),
            OutputFormat::PythonModule
        );
    }

    #[test]
    fn write_failure_is_io_error() {
        let settings = Settings::new();
        let records = records();
        let table = Table::new(&settings, &records);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing_dir").join("out.py");
        let err = write_table(&path, &table, &WriterConfig::default()).unwrap_err();
        assert_eq!(err.code(), sw_types::ErrorCode::IoError);
    }
}
