//! Typed, read-only access to the scalar settings of a Skywalker input.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::{LookupKind, SwError, SwResult};

/// A table of settings read from a named settings block.
///
/// Values are kept as the text that appeared in the configuration and are
/// interpreted only when read, so `get("param2")` returns `"81"` even though
/// `get_int("param2")` also succeeds. Settings never change after loading and
/// can be shared between threads behind an `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a settings table, rejecting names that appear more than once.
    pub fn from_pairs<I, K, V>(pairs: I) -> SwResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut values = BTreeMap::new();
        for (name, value) in pairs {
            let name = name.into();
            if values.contains_key(&name) {
                return Err(SwError::InvalidSettingsBlock {
                    message: format!("Setting {name} appears more than once!"),
                });
            }
            values.insert(name, value.into());
        }
        Ok(Self { values })
    }

    pub fn has(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Returns the setting's text exactly as it was loaded.
    pub fn get(&self, name: &str) -> SwResult<&str> {
        self.values
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| SwError::not_found(LookupKind::Setting, name))
    }

    pub fn get_int(&self, name: &str) -> SwResult<i64> {
        let text = self.get(name)?;
        text.trim().parse::<i64>().map_err(|_| SwError::InvalidValue {
            message: format!("The setting '{name}' is not an integer: '{text}'"),
        })
    }

    pub fn get_real(&self, name: &str) -> SwResult<f64> {
        let text = self.get(name)?;
        text.trim().parse::<f64>().map_err(|_| SwError::InvalidValue {
            message: format!("The setting '{name}' is not a real number: '{text}'"),
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over `(name, text)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;

    fn sample() -> Settings {
        Settings::from_pairs([
            ("param1", "hello"),
            ("param2", "81"),
            ("param3", "3.14159265357"),
        ])
        .unwrap()
    }

    #[test]
    fn get_returns_text_verbatim() {
        let settings = sample();
        assert_eq!(settings.get("param1").unwrap(), "hello");
        assert_eq!(settings.get("param2").unwrap(), "81");
        assert_eq!(settings.get("param3").unwrap(), "3.14159265357");
        assert_eq!(settings.len(), 3);
    }

    #[test]
    fn typed_accessors() {
        let settings = sample();
        assert_eq!(settings.get_int("param2").unwrap(), 81);
        assert_eq!(settings.get_real("param2").unwrap(), 81.0);
        assert!((settings.get_real("param3").unwrap() - 3.14159265357).abs() < 1e-14);
        // Numeric reads leave the stored text alone.
        assert_eq!(settings.get("param2").unwrap(), "81");
    }

    #[test]
    fn type_mismatch_is_invalid_value() {
        let settings = sample();
        let err = settings.get_real("param1").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidValue);
        let err = settings.get_int("param3").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidValue);
    }

    #[test]
    fn missing_setting_is_not_found() {
        let settings = sample();
        assert!(!settings.has("nonexistent_setting"));
        let err = settings.get("nonexistent_setting").unwrap_err();
        assert_eq!(err.code(), ErrorCode::ParamNotFound);
        assert!(!err.to_string().is_empty());
        let err = settings.get_int("nonexistent_setting").unwrap_err();
        assert_eq!(err.code(), ErrorCode::ParamNotFound);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = Settings::from_pairs([("a", "1"), ("a", "2")]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidSettingsBlock);
    }

    #[test]
    fn iteration_is_sorted_by_name() {
        let settings = Settings::from_pairs([("b", "2"), ("a", "1")]).unwrap();
        let names: Vec<&str> = settings.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
