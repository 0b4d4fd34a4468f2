use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::types::SettingValue;

/// Version of the settings contract this catalog describes. Sent with every
/// settings request so the backend can tell key schemas apart.
pub const SETTINGS_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingDefinition {
    pub key: String,
    pub label: String,
    #[serde(flatten)]
    pub kind: DefinitionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DefinitionKind {
    Numeric {
        min: f64,
        max: f64,
        #[serde(default)]
        integer: bool,
        default: Option<f64>,
    },
    Boolean {
        default: Option<bool>,
    },
    Enumerated {
        options: Vec<String>,
        default: Option<String>,
    },
}

impl SettingDefinition {
    fn numeric(key: &str, label: &str, min: f64, max: f64, integer: bool, default: f64) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            kind: DefinitionKind::Numeric {
                min,
                max,
                integer,
                default: Some(default),
            },
        }
    }

    fn boolean(key: &str, label: &str, default: bool) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            kind: DefinitionKind::Boolean {
                default: Some(default),
            },
        }
    }

    fn enumerated(key: &str, label: &str, options: &[&str], default: &str) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            kind: DefinitionKind::Enumerated {
                options: options.iter().map(|o| o.to_string()).collect(),
                default: Some(default.to_string()),
            },
        }
    }

    /// Value applied by "reset to defaults", if the catalog names one.
    pub fn default_value(&self) -> Option<SettingValue> {
        match &self.kind {
            DefinitionKind::Numeric { default, .. } => default.map(SettingValue::Number),
            DefinitionKind::Boolean { default } => default.map(SettingValue::Flag),
            DefinitionKind::Enumerated { default, .. } => default.clone().map(SettingValue::Choice),
        }
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("cannot read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse catalog: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid catalog: {}", .0.join(", "))]
    Invalid(Vec<String>),
}

fn default_schema_version() -> u32 {
    SETTINGS_SCHEMA_VERSION
}

/// Client-side description of every tunable the console knows how to edit.
///
/// The backend only reports `key -> value`; labels, bounds and options come
/// from here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsCatalog {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(rename = "setting", default)]
    settings: Vec<SettingDefinition>,
}

impl SettingsCatalog {
    pub fn builtin() -> Self {
        Self {
            schema_version: SETTINGS_SCHEMA_VERSION,
            settings: vec![
                SettingDefinition::numeric("AI_COOLDOWN_SEC_OPEN", "AI Cool-down (Open)", 10.0, 300.0, true, 30.0),
                SettingDefinition::numeric("AI_COOLDOWN_SEC_FLAT", "AI Cool-down (Flat)", 10.0, 300.0, true, 60.0),
                SettingDefinition::numeric("AI_REGIME_COOLDOWN_SEC", "AI Cool-down (Regime Change)", 10.0, 3600.0, true, 60.0),
                SettingDefinition::numeric("POSITION_REVIEW_SEC", "Position Review Interval", 10.0, 600.0, true, 60.0),
                SettingDefinition::numeric("AI_PROFIT_TRIGGER_RATIO", "AI Profit Trigger Ratio", 0.0, 1.0, false, 0.3),
                SettingDefinition::numeric("AI_EXIT_TEMPERATURE", "AI Exit Temperature", 0.0, 2.0, false, 0.0),
                SettingDefinition::boolean("HIGHER_TF_ENABLED", "Higher Timeframe Filter", true),
                SettingDefinition::boolean("TRAIL_ENABLED", "Trailing Stop", true),
                SettingDefinition::boolean("EARLY_EXIT_ENABLED", "Early Exit", true),
                SettingDefinition::boolean("POSITION_REVIEW_ENABLED", "Position Review", true),
                SettingDefinition::boolean("USE_LOCAL_MODEL", "Use Local Model", false),
                SettingDefinition::enumerated(
                    "AI_MODEL",
                    "AI Model",
                    &["gpt-4.1-nano", "gpt-4.1-mini", "gpt-4o-mini", "gpt-4o"],
                    "gpt-4.1-nano",
                ),
            ],
        }
    }

    pub fn from_toml_str(source: &str) -> Result<Self, CatalogError> {
        let catalog: SettingsCatalog = toml::from_str(source)?;
        catalog.validate().map_err(CatalogError::Invalid)?;
        Ok(catalog)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn settings(&self) -> &[SettingDefinition] {
        &self.settings
    }

    pub fn get(&self, key: &str) -> Option<&SettingDefinition> {
        self.settings.iter().find(|d| d.key == key)
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        if self.schema_version != SETTINGS_SCHEMA_VERSION {
            errors.push(format!(
                "schema_version {} is not supported (expected {})",
                self.schema_version, SETTINGS_SCHEMA_VERSION
            ));
        }

        for def in &self.settings {
            if !seen.insert(def.key.as_str()) {
                errors.push(format!("duplicate key {}", def.key));
            }
            match &def.kind {
                DefinitionKind::Numeric { min, max, integer, default } => {
                    if !min.is_finite() || !max.is_finite() || min > max {
                        errors.push(format!("{}: min must be <= max", def.key));
                    } else if let Some(d) = default {
                        if d < min || d > max {
                            errors.push(format!("{}: default {} outside [{}, {}]", def.key, d, min, max));
                        }
                    }
                    // Integer settings are sent truncated, so every bound must survive that.
                    if *integer {
                        let fractional = [Some(*min), Some(*max), *default]
                            .into_iter()
                            .flatten()
                            .any(|v| v.is_finite() && v.fract() != 0.0);
                        if fractional {
                            errors.push(format!("{}: integer setting needs whole-number bounds and default", def.key));
                        }
                    }
                }
                DefinitionKind::Boolean { .. } => {}
                DefinitionKind::Enumerated { options, default } => {
                    if options.is_empty() {
                        errors.push(format!("{}: needs at least one option", def.key));
                    }
                    if let Some(d) = default {
                        if !options.contains(d) {
                            errors.push(format!("{}: default {} is not an option", def.key, d));
                        }
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Default for SettingsCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
