//! Dispatcher settings: invocation order, unregister-by-type behavior and
//! panic isolation. Loaded from `EVENTLINE_*` env vars or a TOML file.

use std::env;
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Order in which the handlers of one category are invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOrder {
    /// First-registration order. Priority is carried as metadata only.
    #[default]
    Registration,
    /// Highest priority first; registration order among equals.
    Priority,
}

impl FromStr for DispatchOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "registration" => Ok(DispatchOrder::Registration),
            "priority" => Ok(DispatchOrder::Priority),
            other => bail!("unknown dispatch order: {other}"),
        }
    }
}

/// What unregistering a whole type does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeUnregistration {
    /// Look up the type's handlers and log what is missing. Nothing is removed.
    Inspect,
    /// Drop every entry declared by the type.
    #[default]
    Remove,
}

impl FromStr for TypeUnregistration {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inspect" => Ok(TypeUnregistration::Inspect),
            "remove" => Ok(TypeUnregistration::Remove),
            other => bail!("unknown type unregistration mode: {other}"),
        }
    }
}

/// Dispatcher settings. Every field has a default, so an empty TOML file or
/// an empty environment is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatcherConfig {
    /// Attached to every log line the dispatcher emits.
    pub name: String,
    pub order: DispatchOrder,
    pub type_unregistration: TypeUnregistration,
    /// Treat a panicking handler like a failing one.
    pub catch_panics: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            order: DispatchOrder::default(),
            type_unregistration: TypeUnregistration::default(),
            catch_panics: true,
        }
    }
}

impl DispatcherConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_order(mut self, order: DispatchOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_type_unregistration(mut self, mode: TypeUnregistration) -> Self {
        self.type_unregistration = mode;
        self
    }

    pub fn with_catch_panics(mut self, catch_panics: bool) -> Self {
        self.catch_panics = catch_panics;
        self
    }

    /// Load overrides from `EVENTLINE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(name) = lookup("EVENTLINE_NAME") {
            config.name = name;
        }
        if let Some(order) = lookup("EVENTLINE_ORDER") {
            config.order = order.parse().context("EVENTLINE_ORDER")?;
        }
        if let Some(mode) = lookup("EVENTLINE_TYPE_UNREGISTRATION") {
            config.type_unregistration = mode.parse().context("EVENTLINE_TYPE_UNREGISTRATION")?;
        }
        if let Some(flag) = lookup("EVENTLINE_CATCH_PANICS") {
            config.catch_panics = flag
                .trim()
                .parse()
                .with_context(|| format!("EVENTLINE_CATCH_PANICS must be true or false, got {flag}"))?;
        }
        Ok(config)
    }
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<DispatcherConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: DispatcherConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = DispatcherConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, DispatcherConfig::default());
        assert_eq!(config.order, DispatchOrder::Registration);
        assert_eq!(config.type_unregistration, TypeUnregistration::Remove);
        assert!(config.catch_panics);
    }

    #[test]
    fn environment_overrides_every_field() {
        let config = DispatcherConfig::from_lookup(lookup(&[
            ("EVENTLINE_NAME", "ui"),
            ("EVENTLINE_ORDER", "Priority"),
            ("EVENTLINE_TYPE_UNREGISTRATION", "inspect"),
            ("EVENTLINE_CATCH_PANICS", "false"),
        ]))
        .unwrap();

        assert_eq!(
            config,
            DispatcherConfig::named("ui")
                .with_order(DispatchOrder::Priority)
                .with_type_unregistration(TypeUnregistration::Inspect)
                .with_catch_panics(false)
        );
    }

    #[test]
    fn bad_environment_values_are_reported() {
        let err = DispatcherConfig::from_lookup(lookup(&[("EVENTLINE_ORDER", "random")]))
            .unwrap_err();
        assert!(format!("{err:#}").contains("unknown dispatch order"));

        assert!(DispatcherConfig::from_lookup(lookup(&[("EVENTLINE_CATCH_PANICS", "maybe")])).is_err());
    }

    #[test]
    fn toml_file_with_partial_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = \"workers\"\norder = \"priority\"").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.name, "workers");
        assert_eq!(config.order, DispatchOrder::Priority);
        assert_eq!(config.type_unregistration, TypeUnregistration::Remove);
    }

    #[test]
    fn toml_file_rejects_unknown_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "nmae = \"typo\"").unwrap();
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
