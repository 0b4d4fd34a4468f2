use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{DefinitionKind, SettingDefinition, SettingsCatalog};

/// Partial update body: setting key to wire value.
pub type SettingsPatch = BTreeMap<String, Value>;

/// Value carried by a single edit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Flag(bool),
    Number(f64),
    Choice(String),
}

impl SettingValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            SettingValue::Flag(_) => "boolean",
            SettingValue::Number(_) => "numeric",
            SettingValue::Choice(_) => "enumerated",
        }
    }

    /// Reads a value typed on the command line: `true`/`false`, then a
    /// number, otherwise the raw text as a choice.
    pub fn from_cli(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.to_ascii_lowercase().as_str() {
            "true" | "on" => return SettingValue::Flag(true),
            "false" | "off" => return SettingValue::Flag(false),
            _ => {}
        }
        match raw.parse::<f64>() {
            Ok(n) => SettingValue::Number(n),
            Err(_) => SettingValue::Choice(raw.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditRejected {
    #[error("setting {key} is locked")]
    Locked { key: String },
    #[error("unknown setting {key}")]
    UnknownKey { key: String },
    #[error("setting {key} is {expected}, got a {got} value")]
    KindMismatch {
        key: String,
        expected: &'static str,
        got: &'static str,
    },
    #[error("setting {key} needs a finite number")]
    NotFinite { key: String },
    #[error("{value} is not an option for {key}")]
    NotAnOption { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericSetting {
    pub key: String,
    pub label: String,
    pub min: f64,
    pub max: f64,
    pub integer: bool,
    pub value: f64,
}

impl NumericSetting {
    /// Brings a raw value into `[min, max]`, rounding first for integer settings.
    pub fn clamp(&self, raw: f64) -> f64 {
        let value = if self.integer { raw.round() } else { raw };
        value.clamp(self.min, self.max)
    }

    pub fn wire_value(&self) -> Value {
        if self.integer {
            Value::from(self.value as i64)
        } else {
            serde_json::Number::from_f64(self.value)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BooleanSetting {
    pub key: String,
    pub label: String,
    pub value: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumeratedSetting {
    pub key: String,
    pub label: String,
    /// `None` means unset.
    pub value: Option<String>,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Setting {
    Numeric(NumericSetting),
    Boolean(BooleanSetting),
    Enumerated(EnumeratedSetting),
}

impl Setting {
    pub fn key(&self) -> &str {
        match self {
            Setting::Numeric(s) => &s.key,
            Setting::Boolean(s) => &s.key,
            Setting::Enumerated(s) => &s.key,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Setting::Numeric(s) => &s.label,
            Setting::Boolean(s) => &s.label,
            Setting::Enumerated(s) => &s.label,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Setting::Numeric(_) => "numeric",
            Setting::Boolean(_) => "boolean",
            Setting::Enumerated(_) => "enumerated",
        }
    }

    pub fn wire_value(&self) -> Value {
        match self {
            Setting::Numeric(s) => s.wire_value(),
            Setting::Boolean(s) => Value::Bool(s.value),
            Setting::Enumerated(s) => s.value.clone().map(Value::String).unwrap_or(Value::Null),
        }
    }

    /// Stores `value` locally and returns what goes on the wire.
    ///
    /// Numeric values are clamped like a range input would; nothing is
    /// stored when the edit is rejected.
    pub fn assign(&mut self, value: SettingValue) -> Result<Value, EditRejected> {
        match (self, value) {
            (Setting::Numeric(s), SettingValue::Number(n)) => {
                if !n.is_finite() {
                    return Err(EditRejected::NotFinite { key: s.key.clone() });
                }
                s.value = s.clamp(n);
                Ok(s.wire_value())
            }
            (Setting::Boolean(s), SettingValue::Flag(flag)) => {
                s.value = flag;
                Ok(Value::Bool(flag))
            }
            (Setting::Enumerated(s), SettingValue::Choice(choice)) => {
                if !s.options.contains(&choice) {
                    return Err(EditRejected::NotAnOption {
                        key: s.key.clone(),
                        value: choice,
                    });
                }
                s.value = Some(choice.clone());
                Ok(Value::String(choice))
            }
            (setting, value) => Err(EditRejected::KindMismatch {
                key: setting.key().to_string(),
                expected: setting.kind_name(),
                got: value.kind_name(),
            }),
        }
    }

    fn from_definition(def: &SettingDefinition, raw: &Value) -> Option<Setting> {
        let key = def.key.clone();
        let label = def.label.clone();
        match &def.kind {
            DefinitionKind::Numeric { min, max, integer, .. } => {
                let raw = as_number(raw)?;
                let mut setting = NumericSetting {
                    key,
                    label,
                    min: *min,
                    max: *max,
                    integer: *integer,
                    value: raw,
                };
                setting.value = setting.clamp(raw);
                if setting.value != raw {
                    warn!(
                        key = %setting.key,
                        received = raw,
                        stored = setting.value,
                        "Backend value outside [{}, {}], clamped",
                        setting.min,
                        setting.max
                    );
                }
                Some(Setting::Numeric(setting))
            }
            DefinitionKind::Boolean { .. } => Some(Setting::Boolean(BooleanSetting {
                key,
                label,
                value: as_flag(raw)?,
            })),
            DefinitionKind::Enumerated { options, .. } => {
                let value = match raw {
                    Value::Null => None,
                    Value::String(s) if s.is_empty() => None,
                    Value::String(s) if options.contains(s) => Some(s.clone()),
                    Value::String(s) => {
                        warn!(key = %key, value = %s, "Backend value is not a known option, leaving unset");
                        None
                    }
                    _ => return None,
                };
                Some(Setting::Enumerated(EnumeratedSetting {
                    key,
                    label,
                    value,
                    options: options.clone(),
                }))
            }
        }
    }
}

fn as_number(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

fn as_flag(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

/// Every setting as last read from the backend, in catalog order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SettingsSnapshot {
    settings: Vec<Setting>,
}

impl SettingsSnapshot {
    /// Builds the typed snapshot from the backend's flat `key -> value` mapping.
    ///
    /// Catalog keys decide kind, label and bounds. Unknown boolean keys are
    /// kept (labelled by key); any other unknown key is ignored.
    pub fn derive(catalog: &SettingsCatalog, raw: &Map<String, Value>) -> Self {
        let mut settings = Vec::with_capacity(raw.len());

        for def in catalog.settings() {
            let Some(value) = raw.get(&def.key) else {
                debug!(key = %def.key, "Setting not reported by backend");
                continue;
            };
            match Setting::from_definition(def, value) {
                Some(setting) => settings.push(setting),
                None => warn!(key = %def.key, value = %value, "Backend value has the wrong type, skipping"),
            }
        }

        for (key, value) in raw {
            if catalog.get(key).is_some() {
                continue;
            }
            match value {
                Value::Bool(flag) => settings.push(Setting::Boolean(BooleanSetting {
                    key: key.clone(),
                    label: key.clone(),
                    value: *flag,
                })),
                _ => debug!(key = %key, "Ignoring setting missing from catalog"),
            }
        }

        Self { settings }
    }

    pub fn get(&self, key: &str) -> Option<&Setting> {
        self.settings.iter().find(|s| s.key() == key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Setting> {
        self.settings.iter_mut().find(|s| s.key() == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Setting> {
        self.settings.iter()
    }

    pub fn len(&self) -> usize {
        self.settings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }

    pub fn numeric(&self) -> impl Iterator<Item = &NumericSetting> {
        self.settings.iter().filter_map(|s| match s {
            Setting::Numeric(n) => Some(n),
            _ => None,
        })
    }

    pub fn boolean(&self) -> impl Iterator<Item = &BooleanSetting> {
        self.settings.iter().filter_map(|s| match s {
            Setting::Boolean(b) => Some(b),
            _ => None,
        })
    }

    pub fn enumerated(&self) -> impl Iterator<Item = &EnumeratedSetting> {
        self.settings.iter().filter_map(|s| match s {
            Setting::Enumerated(e) => Some(e),
            _ => None,
        })
    }
}
