//! Override layer for schema defaults, ranges, read-only flags and enum
//! value sets.
//!
//! The schema parser consults an [`Overrides`] object before falling back to
//! the values written in schema text. An override only applies to a key of
//! the same kind.
//!
//! # Text format
//!
//! Overrides are stored as TOML. Key tables are named by path, enum tables
//! by enum id:
//!
//! ```toml
//! [key."/device/gain"]
//! type = "integer"
//! default = 5
//! min = 0
//! max = 10
//! step = 1
//! readonly = false
//!
//! [key."/device/label"]
//! type = "string"
//! default = "Port A"
//!
//! [enum.direction]
//! values = [
//!     { code = 1, id = "left", name = "Left", description = "Port side" },
//!     { code = 2, id = "right", name = "Right" },
//! ]
//! ```
//!
//! Missing `min`/`max`/`step` mean the full range; missing `readonly` means
//! writable.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::OverrideError;
use crate::schema::{EnumValue, IntegerRange, RealRange};
use crate::value::ValueKind;

/// A substitute declaration for one key.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyOverride {
    Bool {
        default: bool,
        readonly: bool,
    },
    Integer {
        default: i64,
        range: IntegerRange,
        readonly: bool,
    },
    Real {
        default: f64,
        range: RealRange,
        readonly: bool,
    },
    String {
        default: String,
        readonly: bool,
    },
    /// Enum default given by symbolic id
    Enum {
        default: String,
        readonly: bool,
    },
}

impl KeyOverride {
    pub fn kind(&self) -> ValueKind {
        match self {
            KeyOverride::Bool { .. } => ValueKind::Bool,
            KeyOverride::Integer { .. } => ValueKind::Integer,
            KeyOverride::Real { .. } => ValueKind::Real,
            KeyOverride::String { .. } => ValueKind::String,
            KeyOverride::Enum { .. } => ValueKind::Enum,
        }
    }

    pub fn readonly(&self) -> bool {
        match self {
            KeyOverride::Bool { readonly, .. }
            | KeyOverride::Integer { readonly, .. }
            | KeyOverride::Real { readonly, .. }
            | KeyOverride::String { readonly, .. }
            | KeyOverride::Enum { readonly, .. } => *readonly,
        }
    }
}

/// Flat collection of key overrides and enum value-set overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    keys: BTreeMap<String, KeyOverride>,
    enums: BTreeMap<String, Vec<EnumValue>>,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(&self, path: &str) -> Option<&KeyOverride> {
        self.keys.get(path)
    }

    pub fn keys(&self) -> impl Iterator<Item = (&str, &KeyOverride)> {
        self.keys.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn enum_values(&self, enum_id: &str) -> Option<&[EnumValue]> {
        self.enums.get(enum_id).map(|v| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.keys.len() + self.enums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.enums.is_empty()
    }

    pub fn remove_key(&mut self, path: &str) -> Option<KeyOverride> {
        self.keys.remove(path)
    }

    pub fn remove_enum_values(&mut self, enum_id: &str) -> Option<Vec<EnumValue>> {
        self.enums.remove(enum_id)
    }

    pub fn set_bool(&mut self, path: &str, default: bool, readonly: bool) -> Result<(), OverrideError> {
        self.upsert(path, KeyOverride::Bool { default, readonly })
    }

    pub fn set_integer(
        &mut self,
        path: &str,
        default: i64,
        range: IntegerRange,
        readonly: bool,
    ) -> Result<(), OverrideError> {
        if range.min > range.max {
            return Err(OverrideError::RangeInverted {
                id: path.to_string(),
            });
        }
        if range.step < 0 {
            return Err(OverrideError::InvalidStep {
                id: path.to_string(),
            });
        }
        if !range.contains(default) {
            return Err(OverrideError::DefaultOutOfRange {
                id: path.to_string(),
            });
        }
        self.upsert(
            path,
            KeyOverride::Integer {
                default,
                range,
                readonly,
            },
        )
    }

    pub fn set_real(
        &mut self,
        path: &str,
        default: f64,
        range: RealRange,
        readonly: bool,
    ) -> Result<(), OverrideError> {
        if range.min.is_nan() || range.max.is_nan() || range.min > range.max {
            return Err(OverrideError::RangeInverted {
                id: path.to_string(),
            });
        }
        if range.step.is_nan() || range.step < 0.0 {
            return Err(OverrideError::InvalidStep {
                id: path.to_string(),
            });
        }
        if !range.contains(default) {
            return Err(OverrideError::DefaultOutOfRange {
                id: path.to_string(),
            });
        }
        self.upsert(
            path,
            KeyOverride::Real {
                default,
                range,
                readonly,
            },
        )
    }

    pub fn set_string(
        &mut self,
        path: &str,
        default: impl Into<String>,
        readonly: bool,
    ) -> Result<(), OverrideError> {
        self.upsert(
            path,
            KeyOverride::String {
                default: default.into(),
                readonly,
            },
        )
    }

    pub fn set_enum(
        &mut self,
        path: &str,
        default: impl Into<String>,
        readonly: bool,
    ) -> Result<(), OverrideError> {
        self.upsert(
            path,
            KeyOverride::Enum {
                default: default.into(),
                readonly,
            },
        )
    }

    /// Replace the value set of `enum_id` wholesale.
    pub fn set_enum_values(&mut self, enum_id: &str, values: Vec<EnumValue>) {
        self.enums.insert(enum_id.to_string(), values);
    }

    fn upsert(&mut self, path: &str, entry: KeyOverride) -> Result<(), OverrideError> {
        if let Some(existing) = self.keys.get(path)
            && existing.kind() != entry.kind()
        {
            return Err(OverrideError::TypeConflict {
                id: path.to_string(),
                existing: existing.kind(),
            });
        }
        self.keys.insert(path.to_string(), entry);
        Ok(())
    }


    /// Parse the TOML override format.
    pub fn parse(text: &str) -> Result<Self, OverrideError> {
        let doc: OverridesDoc = toml::from_str(text).map_err(|e| OverrideError::Parse {
            line: e.span().map(|span| line_of(text, span.start)),
            reason: e.message().to_string(),
        })?;

        let mut overrides = Overrides::new();
        for (path, key) in doc.key {
            key.apply(&path, &mut overrides)
                .inspect_err(|e| warn!("[OVERRIDES] rejected '{}': {}", path, e))?;
        }
        for (id, entry) in doc.enums {
            let values = entry
                .values
                .into_iter()
                .map(|v| EnumValue::new(v.code, v.id, v.name).with_description(v.description))
                .collect();
            overrides.set_enum_values(&id, values);
        }

        debug!(
            "[OVERRIDES] parsed {} key and {} enum overrides",
            overrides.keys.len(),
            overrides.enums.len()
        );
        Ok(overrides)
    }

    /// Serialize to the TOML override format. Tables are sorted by id and
    /// full ranges are left out.
    pub fn to_text(&self) -> Result<String, OverrideError> {
        let doc = OverridesDoc {
            key: self
                .keys
                .iter()
                .map(|(path, entry)| (path.clone(), KeyOverrideDoc::from(entry)))
                .collect(),
            enums: self
                .enums
                .iter()
                .map(|(id, values)| {
                    let values = values
                        .iter()
                        .map(|v| EnumValueDoc {
                            code: v.code,
                            id: v.id.clone(),
                            name: v.name.clone(),
                            description: v.description.clone(),
                        })
                        .collect();
                    (id.clone(), EnumOverrideDoc { values })
                })
                .collect(),
        };
        toml::to_string(&doc).map_err(|e| OverrideError::Emit(e.to_string()))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct OverridesDoc {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    key: BTreeMap<String, KeyOverrideDoc>,
    #[serde(rename = "enum", default, skip_serializing_if = "BTreeMap::is_empty")]
    enums: BTreeMap<String, EnumOverrideDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct KeyOverrideDoc {
    #[serde(rename = "type")]
    kind: String,
    default: toml::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min: Option<toml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max: Option<toml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    step: Option<toml::Value>,
    #[serde(default)]
    readonly: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct EnumOverrideDoc {
    #[serde(default)]
    values: Vec<EnumValueDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct EnumValueDoc {
    code: i64,
    id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,
}

impl From<&KeyOverride> for KeyOverrideDoc {
    fn from(entry: &KeyOverride) -> Self {
        let mut doc = KeyOverrideDoc {
            kind: entry.kind().to_string(),
            default: toml::Value::Boolean(false),
            min: None,
            max: None,
            step: None,
            readonly: entry.readonly(),
        };
        match entry {
            KeyOverride::Bool { default, .. } => doc.default = toml::Value::Boolean(*default),
            KeyOverride::Integer { default, range, .. } => {
                let full = IntegerRange::FULL;
                doc.default = toml::Value::Integer(*default);
                doc.min = (range.min != full.min).then_some(toml::Value::Integer(range.min));
                doc.max = (range.max != full.max).then_some(toml::Value::Integer(range.max));
                doc.step = (range.step != full.step).then_some(toml::Value::Integer(range.step));
            }
            KeyOverride::Real { default, range, .. } => {
                let full = RealRange::FULL;
                doc.default = toml::Value::Float(*default);
                doc.min = (range.min != full.min).then_some(toml::Value::Float(range.min));
                doc.max = (range.max != full.max).then_some(toml::Value::Float(range.max));
                doc.step = (range.step != full.step).then_some(toml::Value::Float(range.step));
            }
            KeyOverride::String { default, .. } | KeyOverride::Enum { default, .. } => {
                doc.default = toml::Value::String(default.clone());
            }
        }
        doc
    }
}

impl KeyOverrideDoc {
    fn apply(self, path: &str, overrides: &mut Overrides) -> Result<(), OverrideError> {
        let invalid = |reason: String| OverrideError::Invalid {
            id: path.to_string(),
            reason,
        };
        let kind = ValueKind::from_str(&self.kind)
            .map_err(|_| invalid(format!("unknown type '{}'", self.kind)))?;
        let ranged = matches!(kind, ValueKind::Integer | ValueKind::Real);
        if !ranged && (self.min.is_some() || self.max.is_some() || self.step.is_some()) {
            return Err(invalid(format!("{kind} keys take no range")));
        }

        match kind {
            ValueKind::Bool => {
                let default = read(path, "default", &self.default, toml::Value::as_bool)?;
                overrides.set_bool(path, default, self.readonly)
            }
            ValueKind::Integer => {
                let mut range = IntegerRange::FULL;
                if let Some(v) = &self.min {
                    range.min = read(path, "min", v, toml::Value::as_integer)?;
                }
                if let Some(v) = &self.max {
                    range.max = read(path, "max", v, toml::Value::as_integer)?;
                }
                if let Some(v) = &self.step {
                    range.step = read(path, "step", v, toml::Value::as_integer)?;
                }
                let default = read(path, "default", &self.default, toml::Value::as_integer)?;
                overrides.set_integer(path, default, range, self.readonly)
            }
            ValueKind::Real => {
                let mut range = RealRange::FULL;
                if let Some(v) = &self.min {
                    range.min = read(path, "min", v, as_real)?;
                }
                if let Some(v) = &self.max {
                    range.max = read(path, "max", v, as_real)?;
                }
                if let Some(v) = &self.step {
                    range.step = read(path, "step", v, as_real)?;
                }
                let default = read(path, "default", &self.default, as_real)?;
                overrides.set_real(path, default, range, self.readonly)
            }
            ValueKind::String => {
                let default = read(path, "default", &self.default, |v| v.as_str())?;
                overrides.set_string(path, default, self.readonly)
            }
            ValueKind::Enum => {
                let default = read(path, "default", &self.default, |v| v.as_str())?;
                overrides.set_enum(path, default, self.readonly)
            }
        }
    }
}

fn read<'v, T>(
    path: &str,
    field: &str,
    value: &'v toml::Value,
    get: impl Fn(&'v toml::Value) -> Option<T>,
) -> Result<T, OverrideError> {
    get(value).ok_or_else(|| OverrideError::Invalid {
        id: path.to_string(),
        reason: format!("{field} = {value} has the wrong type"),
    })
}

/// Integers are accepted where a real is expected.
fn as_real(value: &toml::Value) -> Option<f64> {
    value
        .as_float()
        .or_else(|| value.as_integer().map(|i| i as f64))
}

/// 1-based line of a byte offset.
fn line_of(text: &str, offset: usize) -> usize {
    let end = offset.min(text.len());
    text.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count() + 1
}
