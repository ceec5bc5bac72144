//! Schema text parser.
//!
//! Expansion starts from the root definition at `/` and recurses through
//! inline nodes and definition references. A stack of the definitions being
//! expanded guards against inclusion cycles. Any invalid key aborts the
//! whole parse; no partial schema is ever returned.

use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use serde_yaml::Value as YamlValue;
use tracing::{debug, info, warn};

use super::document::{DefinitionDoc, EnumDoc, KeyDoc, NodeDoc, RangeDoc, SchemaDocument};
use super::{Access, EnumType, EnumValue, IntegerRange, Key, KeySpec, Node, RealRange, Schema};
use crate::error::SchemaError;
use crate::overrides::{KeyOverride, Overrides};
use crate::path;
use crate::value::ValueKind;

pub(super) fn parse(text: &str, overrides: Option<&Overrides>) -> Result<Schema, SchemaError> {
    parse_document(text, overrides)
        .inspect(|schema| {
            info!(
                "[SCHEMA] parsed '{}': {} keys, {} enums",
                schema.id(),
                schema.len(),
                schema.enum_types().count()
            )
        })
        .inspect_err(|e| warn!("[SCHEMA] parse failed: {}", e))
}

fn parse_document(text: &str, overrides: Option<&Overrides>) -> Result<Schema, SchemaError> {
    let doc: SchemaDocument = serde_yaml::from_str(text)?;

    let mut definitions: BTreeMap<&str, &DefinitionDoc> = BTreeMap::new();
    for def in &doc.schemas {
        if definitions.insert(def.id.as_str(), def).is_some() {
            return Err(SchemaError::Duplicate {
                what: "definition",
                id: def.id.clone(),
            });
        }
    }
    let root_def = match &doc.root {
        Some(id) => *definitions
            .get(id.as_str())
            .ok_or_else(|| SchemaError::UnknownDefinition(id.clone()))?,
        None => doc.schemas.first().ok_or(SchemaError::NoDefinitions)?,
    };

    let mut parser = Parser {
        definitions,
        overrides,
        enums: load_enums(&doc.enums, overrides)?,
        keys: BTreeMap::new(),
        stack: Vec::new(),
    };

    let mut root = Node::root();
    root.name = root_def.name.clone();
    root.description = root_def.description.clone();
    parser.expand_definition(&root_def.id, &mut root)?;

    Ok(Schema::from_parts(
        doc.id,
        text.to_string(),
        root,
        parser.keys,
        parser.enums,
    ))
}

fn load_enums(
    docs: &[EnumDoc],
    overrides: Option<&Overrides>,
) -> Result<BTreeMap<String, EnumType>, SchemaError> {
    let mut enums = BTreeMap::new();
    for doc in docs {
        if enums.contains_key(&doc.id) {
            return Err(SchemaError::Duplicate {
                what: "enum",
                id: doc.id.clone(),
            });
        }
        let values: Vec<EnumValue> = match overrides.and_then(|o| o.enum_values(&doc.id)) {
            Some(replacement) => {
                debug!("[SCHEMA] enum '{}' values taken from overrides", doc.id);
                replacement.to_vec()
            }
            None => doc
                .values
                .iter()
                .map(|v| EnumValue {
                    id: v.id.clone(),
                    code: v.code,
                    name: v.name.clone(),
                    description: v.description.clone(),
                })
                .collect(),
        };

        let mut symbols = HashSet::new();
        let mut codes = HashSet::new();
        for v in &values {
            if v.id.is_empty() {
                return Err(SchemaError::InvalidEnum {
                    id: doc.id.clone(),
                    reason: "empty symbolic id".to_string(),
                });
            }
            if !symbols.insert(v.id.as_str()) {
                return Err(SchemaError::InvalidEnum {
                    id: doc.id.clone(),
                    reason: format!("duplicate symbolic id '{}'", v.id),
                });
            }
            if !codes.insert(v.code) {
                return Err(SchemaError::InvalidEnum {
                    id: doc.id.clone(),
                    reason: format!("duplicate code {}", v.code),
                });
            }
        }

        enums.insert(
            doc.id.clone(),
            EnumType {
                id: doc.id.clone(),
                values,
            },
        );
    }
    Ok(enums)
}

struct Parser<'a> {
    definitions: BTreeMap<&'a str, &'a DefinitionDoc>,
    overrides: Option<&'a Overrides>,
    enums: BTreeMap<String, EnumType>,
    keys: BTreeMap<String, Key>,
    /// Definitions currently being expanded, outermost first
    stack: Vec<String>,
}

impl<'a> Parser<'a> {
    fn expand_definition(&mut self, id: &str, node: &mut Node) -> Result<(), SchemaError> {
        if self.stack.iter().any(|s| s == id) {
            let mut cycle = self.stack.clone();
            cycle.push(id.to_string());
            return Err(SchemaError::Cycle(cycle));
        }
        let def = *self
            .definitions
            .get(id)
            .ok_or_else(|| SchemaError::UnknownDefinition(id.to_string()))?;

        self.stack.push(id.to_string());
        let result = self.expand_items(node, &def.keys, &def.nodes);
        self.stack.pop();
        result
    }

    fn expand_items(
        &mut self,
        parent: &mut Node,
        keys: &[KeyDoc],
        nodes: &[NodeDoc],
    ) -> Result<(), SchemaError> {
        for doc in keys {
            let key = self.parse_key(&parent.path, doc)?;
            if self.keys.contains_key(&key.path) || parent.child(&doc.id).is_some() {
                return Err(SchemaError::Duplicate {
                    what: "key",
                    id: key.path,
                });
            }
            parent.keys.push(key.path.clone());
            self.keys.insert(key.path.clone(), key);
        }

        for doc in nodes {
            let node_path = path::join(&parent.path, &doc.id);
            path::validate(&node_path)?;
            if self.keys.contains_key(&node_path) || parent.child(&doc.id).is_some() {
                return Err(SchemaError::Duplicate {
                    what: "node",
                    id: node_path,
                });
            }

            let mut child = Node::new(node_path);
            child.name = doc.name.clone();
            child.description = doc.description.clone();
            if let Some(reference) = &doc.schema {
                self.expand_definition(reference, &mut child)?;
            }
            self.expand_items(&mut child, &doc.keys, &doc.nodes)?;
            parent.nodes.push(child);
        }
        Ok(())
    }

    fn parse_key(&self, parent: &str, doc: &KeyDoc) -> Result<Key, SchemaError> {
        let key_path = path::join(parent, &doc.id);
        path::validate(&key_path)?;
        let invalid = |reason: String| SchemaError::InvalidKey {
            path: key_path.clone(),
            reason,
        };

        let kind = match (&doc.kind, &doc.enum_id) {
            (Some(name), None) => {
                let kind = ValueKind::from_str(name)
                    .map_err(|_| invalid(format!("unknown type '{name}'")))?;
                if kind == ValueKind::Enum {
                    return Err(invalid("enum keys are declared with 'enum: <id>'".into()));
                }
                kind
            }
            (None, Some(_)) => ValueKind::Enum,
            (Some(_), Some(_)) => return Err(invalid("both 'type' and 'enum' given".into())),
            (None, None) => return Err(invalid("neither 'type' nor 'enum' given".into())),
        };

        let mut access = Access::READ_WRITE;
        for flag in &doc.flags {
            match flag.as_str() {
                "readonly" => access.writable = false,
                "writeonly" => access.readable = false,
                "hidden" => access.hidden = true,
                other => return Err(invalid(format!("unknown flag '{other}'"))),
            }
        }

        let overridden = self.overrides.and_then(|o| o.key(&key_path)).filter(|o| {
            let matches = o.kind() == kind;
            if !matches {
                warn!(
                    "[SCHEMA] ignoring {} override for {} key '{}'",
                    o.kind(),
                    kind,
                    key_path
                );
            }
            matches
        });
        if let Some(o) = overridden {
            access.writable = !o.readonly();
        }

        let spec = match kind {
            ValueKind::Bool => {
                let default = match overridden {
                    Some(KeyOverride::Bool { default, .. }) => *default,
                    _ => match &doc.default {
                        Some(v) => v
                            .as_bool()
                            .ok_or_else(|| invalid(format!("default {v:?} is not a boolean")))?,
                        None => false,
                    },
                };
                KeySpec::Bool { default }
            }
            ValueKind::Integer => {
                let (default, range) = match overridden {
                    Some(KeyOverride::Integer { default, range, .. }) => (Some(*default), *range),
                    _ => {
                        let range = integer_range(doc.range.as_ref()).map_err(invalid)?;
                        let default = doc
                            .default
                            .as_ref()
                            .map(|v| yaml_i64(v).map_err(&invalid))
                            .transpose()?;
                        (default, range)
                    }
                };
                if range.min > range.max {
                    return Err(invalid(format!(
                        "range inverted: {} > {}",
                        range.min, range.max
                    )));
                }
                if range.step < 0 {
                    return Err(invalid(format!("negative step {}", range.step)));
                }
                let default = default.unwrap_or_else(|| 0i64.clamp(range.min, range.max));
                if !range.contains(default) {
                    return Err(invalid(format!(
                        "default {default} outside [{}, {}]",
                        range.min, range.max
                    )));
                }
                KeySpec::Integer { default, range }
            }
            ValueKind::Real => {
                let (default, range) = match overridden {
                    Some(KeyOverride::Real { default, range, .. }) => (Some(*default), *range),
                    _ => {
                        let range = real_range(doc.range.as_ref()).map_err(invalid)?;
                        let default = doc
                            .default
                            .as_ref()
                            .map(|v| yaml_f64(v).map_err(&invalid))
                            .transpose()?;
                        (default, range)
                    }
                };
                if range.min.is_nan() || range.max.is_nan() || range.min > range.max {
                    return Err(invalid(format!(
                        "range inverted: {} > {}",
                        range.min, range.max
                    )));
                }
                if range.step.is_nan() || range.step < 0.0 {
                    return Err(invalid(format!("invalid step {}", range.step)));
                }
                let default = default.unwrap_or_else(|| 0f64.clamp(range.min, range.max));
                if !range.contains(default) {
                    return Err(invalid(format!(
                        "default {default} outside [{}, {}]",
                        range.min, range.max
                    )));
                }
                KeySpec::Real { default, range }
            }
            ValueKind::String => {
                let default = match overridden {
                    Some(KeyOverride::String { default, .. }) => default.clone(),
                    _ => match &doc.default {
                        Some(v) => v
                            .as_str()
                            .ok_or_else(|| invalid(format!("default {v:?} is not a string")))?
                            .to_string(),
                        None => String::new(),
                    },
                };
                KeySpec::String { default }
            }
            ValueKind::Enum => {
                let enum_id = doc.enum_id.clone().unwrap_or_default();
                let enum_type =
                    self.enums
                        .get(&enum_id)
                        .ok_or_else(|| SchemaError::UnknownEnum {
                            path: key_path.clone(),
                            enum_id: enum_id.clone(),
                        })?;
                let symbol = match overridden {
                    Some(KeyOverride::Enum { default, .. }) => Some(default.clone()),
                    _ => match &doc.default {
                        Some(v) => Some(
                            v.as_str()
                                .ok_or_else(|| {
                                    invalid(format!("default {v:?} is not a symbolic id"))
                                })?
                                .to_string(),
                        ),
                        None => None,
                    },
                };
                let default = match symbol {
                    Some(symbol) => enum_type
                        .by_id(&symbol)
                        .ok_or_else(|| {
                            invalid(format!("default '{symbol}' is not a value of '{enum_id}'"))
                        })?
                        .code,
                    None => {
                        enum_type
                            .values
                            .first()
                            .ok_or_else(|| invalid(format!("enum '{enum_id}' has no values")))?
                            .code
                    }
                };
                KeySpec::Enum { enum_id, default }
            }
        };

        Ok(Key {
            name: if doc.name.is_empty() {
                doc.id.clone()
            } else {
                doc.name.clone()
            },
            description: doc.description.clone().unwrap_or_default(),
            view: doc.view.clone().unwrap_or_default(),
            access,
            spec,
            path: key_path,
        })
    }
}

fn yaml_i64(v: &YamlValue) -> Result<i64, String> {
    v.as_i64()
        .ok_or_else(|| format!("{v:?} is not an integer"))
}

fn yaml_f64(v: &YamlValue) -> Result<f64, String> {
    v.as_f64().ok_or_else(|| format!("{v:?} is not a number"))
}

fn integer_range(doc: Option<&RangeDoc>) -> Result<IntegerRange, String> {
    let mut range = IntegerRange::FULL;
    if let Some(doc) = doc {
        if let Some(v) = &doc.min {
            range.min = yaml_i64(v)?;
        }
        if let Some(v) = &doc.max {
            range.max = yaml_i64(v)?;
        }
        if let Some(v) = &doc.step {
            range.step = yaml_i64(v)?;
        }
    }
    Ok(range)
}

fn real_range(doc: Option<&RangeDoc>) -> Result<RealRange, String> {
    let mut range = RealRange::FULL;
    if let Some(doc) = doc {
        if let Some(v) = &doc.min {
            range.min = yaml_f64(v)?;
        }
        if let Some(v) = &doc.max {
            range.max = yaml_f64(v)?;
        }
        if let Some(v) = &doc.step {
            range.step = yaml_f64(v)?;
        }
    }
    Ok(range)
}
