//! Incremental schema construction.
//!
//! A [`SchemaBuilder`] stages keys, nodes and enum types, can splice
//! subtrees out of existing schemas with [`SchemaBuilder::join`], and emits
//! canonical schema text. A [`Schema`] is only ever materialized from that
//! text, so anything a builder produces can also be written to disk and
//! parsed back.

use std::collections::BTreeMap;

use serde_yaml::Value as YamlValue;
use tracing::debug;

use crate::error::BuildError;
use crate::path;
use crate::schema::document::{
    DefinitionDoc, EnumDoc, EnumValueDoc, KeyDoc, NodeDoc, RangeDoc, SchemaDocument,
};
use crate::schema::{
    Access, EnumType, EnumValue, IntegerRange, Key, KeySpec, Node, RealRange, Schema,
};
use crate::value::{Value, ValueKind};

/// Id of the single definition written by [`SchemaBuilder::to_text`].
const CANONICAL_DEFINITION: &str = "root";

/// Builder for creating schemas programmatically.
///
/// Every mutator validates its input and leaves the builder untouched on
/// failure, so a rejected call never poisons the rest of the construction.
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    id: String,
    root: Node,
    keys: BTreeMap<String, Key>,
    enums: BTreeMap<String, EnumType>,
}

impl SchemaBuilder {
    /// Create an empty builder for a schema with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            root: Node::root(),
            keys: BTreeMap::new(),
            enums: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.keys.contains_key(path)
    }

    pub fn key(&self, path: &str) -> Option<&Key> {
        self.keys.get(path)
    }

    pub fn enum_type(&self, id: &str) -> Option<&EnumType> {
        self.enums.get(id)
    }

    /// Whether a node exists at `path`. The root always does.
    pub fn has_node(&self, path: &str) -> bool {
        self.root.find(path).is_some()
    }

    // ------------------------------------------------------------------
    // Enum types
    // ------------------------------------------------------------------

    /// Declare an empty enum type.
    pub fn create_enum(&mut self, id: &str) -> Result<(), BuildError> {
        if self.enums.contains_key(id) {
            return Err(BuildError::EnumExists(id.to_string()));
        }
        self.enums.insert(id.to_string(), EnumType::new(id));
        Ok(())
    }

    /// Append a value to an enum type. Symbolic ids and codes must both be
    /// unique within the enum.
    pub fn add_enum_value(&mut self, enum_id: &str, value: EnumValue) -> Result<(), BuildError> {
        let enum_type = self
            .enums
            .get_mut(enum_id)
            .ok_or_else(|| BuildError::UnknownEnum(enum_id.to_string()))?;
        if value.id.is_empty() || enum_type.by_id(&value.id).is_some() {
            return Err(BuildError::DuplicateEnumValue {
                enum_id: enum_id.to_string(),
                value: value.id,
            });
        }
        if enum_type.by_code(value.code).is_some() {
            return Err(BuildError::DuplicateEnumValue {
                enum_id: enum_id.to_string(),
                value: value.code.to_string(),
            });
        }
        enum_type.values.push(value);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Keys
    // ------------------------------------------------------------------

    pub fn create_bool(
        &mut self,
        path: &str,
        name: impl Into<String>,
        default: bool,
    ) -> Result<(), BuildError> {
        self.insert_key(path, name.into(), KeySpec::Bool { default })
    }

    /// Create an integer key with the full `i64` range. Narrow it with
    /// [`set_integer_range`](Self::set_integer_range).
    pub fn create_integer(
        &mut self,
        path: &str,
        name: impl Into<String>,
        default: i64,
    ) -> Result<(), BuildError> {
        self.insert_key(
            path,
            name.into(),
            KeySpec::Integer {
                default,
                range: IntegerRange::FULL,
            },
        )
    }

    /// Create a real key with an unbounded continuous range.
    pub fn create_real(
        &mut self,
        path: &str,
        name: impl Into<String>,
        default: f64,
    ) -> Result<(), BuildError> {
        if default.is_nan() {
            return Err(BuildError::DefaultOutOfRange {
                path: path.to_string(),
            });
        }
        self.insert_key(
            path,
            name.into(),
            KeySpec::Real {
                default,
                range: RealRange::FULL,
            },
        )
    }

    pub fn create_string(
        &mut self,
        path: &str,
        name: impl Into<String>,
        default: impl Into<String>,
    ) -> Result<(), BuildError> {
        self.insert_key(
            path,
            name.into(),
            KeySpec::String {
                default: default.into(),
            },
        )
    }

    /// Create an enum key. The enum type must already exist and `default`
    /// must be one of its symbolic ids.
    pub fn create_enum_key(
        &mut self,
        path: &str,
        name: impl Into<String>,
        enum_id: &str,
        default: &str,
    ) -> Result<(), BuildError> {
        let enum_type = self
            .enums
            .get(enum_id)
            .ok_or_else(|| BuildError::UnknownEnum(enum_id.to_string()))?;
        let code = enum_type
            .by_id(default)
            .ok_or_else(|| BuildError::DefaultOutOfRange {
                path: path.to_string(),
            })?
            .code;
        self.insert_key(
            path,
            name.into(),
            KeySpec::Enum {
                enum_id: enum_id.to_string(),
                default: code,
            },
        )
    }

    pub fn set_integer_range(
        &mut self,
        path: &str,
        min: i64,
        max: i64,
        step: i64,
    ) -> Result<(), BuildError> {
        let key = self.key_mut(path, ValueKind::Integer)?;
        let KeySpec::Integer { default, range } = &mut key.spec else {
            return Err(BuildError::UnknownKey(path.to_string()));
        };
        if min > max {
            return Err(BuildError::RangeInverted {
                path: path.to_string(),
                min: min.to_string(),
                max: max.to_string(),
            });
        }
        if step < 0 {
            return Err(BuildError::InvalidStep {
                path: path.to_string(),
            });
        }
        let candidate = IntegerRange { min, max, step };
        if !candidate.contains(*default) {
            return Err(BuildError::DefaultOutOfRange {
                path: path.to_string(),
            });
        }
        *range = candidate;
        Ok(())
    }

    pub fn set_real_range(
        &mut self,
        path: &str,
        min: f64,
        max: f64,
        step: f64,
    ) -> Result<(), BuildError> {
        let key = self.key_mut(path, ValueKind::Real)?;
        let KeySpec::Real { default, range } = &mut key.spec else {
            return Err(BuildError::UnknownKey(path.to_string()));
        };
        if min.is_nan() || max.is_nan() || min > max {
            return Err(BuildError::RangeInverted {
                path: path.to_string(),
                min: min.to_string(),
                max: max.to_string(),
            });
        }
        if step.is_nan() || step < 0.0 {
            return Err(BuildError::InvalidStep {
                path: path.to_string(),
            });
        }
        let candidate = RealRange { min, max, step };
        if !candidate.contains(*default) {
            return Err(BuildError::DefaultOutOfRange {
                path: path.to_string(),
            });
        }
        *range = candidate;
        Ok(())
    }

    /// Replace the default of a key. The value must match the key's kind
    /// and lie within its range or value set; enum defaults are codes of
    /// the enum as declared in this builder.
    pub fn set_default(&mut self, path: &str, value: impl Into<Value>) -> Result<(), BuildError> {
        let value = value.into();
        let enums = &self.enums;
        let key = self
            .keys
            .get_mut(path)
            .ok_or_else(|| BuildError::UnknownKey(path.to_string()))?;
        let out_of_range = || BuildError::DefaultOutOfRange {
            path: path.to_string(),
        };
        match (&mut key.spec, value) {
            (KeySpec::Bool { default }, Value::Bool(v)) => *default = v,
            (KeySpec::String { default }, Value::String(v)) => *default = v,
            (KeySpec::Integer { default, range }, Value::Integer(v)) => {
                if !range.contains(v) {
                    return Err(out_of_range());
                }
                *default = v;
            }
            (KeySpec::Real { default, range }, Value::Real(v)) => {
                if !range.contains(v) {
                    return Err(out_of_range());
                }
                *default = v;
            }
            (KeySpec::Enum { enum_id, default }, Value::Enum(code)) => {
                if !enums
                    .get(enum_id.as_str())
                    .is_some_and(|e| e.by_code(code).is_some())
                {
                    return Err(out_of_range());
                }
                *default = code;
            }
            (spec, value) => {
                return Err(BuildError::KindMismatch {
                    path: path.to_string(),
                    expected: spec.kind(),
                    actual: value.kind(),
                });
            }
        }
        Ok(())
    }

    /// Replace the default of an enum key by symbolic id.
    pub fn set_enum_default(&mut self, path: &str, symbol: &str) -> Result<(), BuildError> {
        let enum_id = self
            .keys
            .get(path)
            .ok_or_else(|| BuildError::UnknownKey(path.to_string()))?
            .enum_id()
            .ok_or_else(|| BuildError::KindMismatch {
                path: path.to_string(),
                expected: ValueKind::Enum,
                actual: self.keys[path].kind(),
            })?;
        let code = self
            .enums
            .get(enum_id)
            .and_then(|e| e.by_id(symbol))
            .ok_or_else(|| BuildError::DefaultOutOfRange {
                path: path.to_string(),
            })?
            .code;
        self.set_default(path, Value::Enum(code))
    }

    pub fn set_description(
        &mut self,
        path: &str,
        description: impl Into<String>,
    ) -> Result<(), BuildError> {
        self.existing_key_mut(path)?.description = description.into();
        Ok(())
    }

    pub fn set_view(&mut self, path: &str, view: impl Into<String>) -> Result<(), BuildError> {
        self.existing_key_mut(path)?.view = view.into();
        Ok(())
    }

    pub fn set_access(&mut self, path: &str, access: Access) -> Result<(), BuildError> {
        self.existing_key_mut(path)?.access = access;
        Ok(())
    }

    /// Attach display metadata to the node at `path`, creating it and any
    /// missing ancestors.
    pub fn set_node_name(
        &mut self,
        path: &str,
        name: impl Into<String>,
        description: Option<&str>,
    ) -> Result<(), BuildError> {
        self.check_node_slot(path)?;
        let node = ensure_node(&mut self.root, path);
        node.name = Some(name.into());
        if let Some(description) = description {
            node.description = Some(description.to_string());
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Join
    // ------------------------------------------------------------------

    /// Copy every key and node strictly below `src_root` in `source` to the
    /// same relative position below `dst_root`.
    ///
    /// Enum types travel with the keys that reference them, codes and all.
    /// An enum id already declared here with a different value set is never
    /// widened; the copied keys get their own id, `"{enum_id}@{dst_root}"`.
    /// Node metadata fills in only where none is set yet. Nothing is copied
    /// when any destination path is taken.
    pub fn join(&mut self, source: &Schema, src_root: &str, dst_root: &str) -> Result<(), BuildError> {
        path::validate(src_root)?;
        path::validate(dst_root)?;
        let src = source
            .node(src_root)
            .ok_or_else(|| BuildError::UnknownNode(src_root.to_string()))?;
        self.check_node_slot(dst_root)?;

        let mut plan: Vec<(String, &Node)> = Vec::new();
        src.walk(&mut |node| {
            let target = if node.path == src.path {
                Some(dst_root.to_string())
            } else {
                path::rebase(&node.path, &src.path, dst_root)
            };
            if let Some(target) = target {
                plan.push((target, node));
            }
        });

        let mut copies: Vec<(String, &Key)> = Vec::new();
        for (target, node) in &plan {
            if self.keys.contains_key(target) {
                return Err(BuildError::Exists(target.clone()));
            }
            for key_path in &node.keys {
                let key = source
                    .key(key_path)
                    .ok_or_else(|| BuildError::UnknownKey(key_path.clone()))?;
                let dst = path::rebase(key_path, &src.path, dst_root)
                    .ok_or_else(|| BuildError::UnknownKey(key_path.clone()))?;
                if self.keys.contains_key(&dst) || self.root.find(&dst).is_some() {
                    return Err(BuildError::Exists(dst));
                }
                copies.push((dst, key));
            }
        }

        for (target, node) in &plan {
            let dst = ensure_node(&mut self.root, target);
            if dst.name.is_none() {
                dst.name = node.name.clone();
            }
            if dst.description.is_none() {
                dst.description = node.description.clone();
            }
        }

        let count = copies.len();
        for (dst, key) in copies {
            let mut copy = key.clone();
            copy.path = dst;
            if let KeySpec::Enum { enum_id, .. } = &mut copy.spec {
                let source_enum = source
                    .enum_type(enum_id)
                    .ok_or_else(|| BuildError::UnknownEnum(enum_id.clone()))?;
                *enum_id = self.import_enum(source_enum, dst_root);
            }
            self.attach(copy);
        }

        debug!(
            "[BUILDER] joined {} keys from '{}':{} into {}",
            count,
            source.id(),
            src.path,
            dst_root
        );
        Ok(())
    }

    /// Id under which `source` is declared here. Reuses the source id, or a
    /// `@dst_root` variant of it, when that enum holds exactly the same
    /// values; otherwise declares a fresh copy.
    fn import_enum(&mut self, source: &EnumType, dst_root: &str) -> String {
        let derived = format!("{}@{}", source.id, dst_root);
        let mut candidate = source.id.clone();
        let mut attempt = 1;
        loop {
            match self.enums.get(&candidate) {
                None => break,
                Some(existing) if existing.values == source.values => return candidate,
                Some(_) => {
                    candidate = if attempt == 1 {
                        derived.clone()
                    } else {
                        format!("{derived}#{attempt}")
                    };
                    attempt += 1;
                }
            }
        }
        if candidate != source.id {
            debug!(
                "[BUILDER] enum '{}' differs from the one declared here; importing as '{}'",
                source.id, candidate
            );
        }
        self.enums.insert(
            candidate.clone(),
            EnumType {
                id: candidate.clone(),
                values: source.values.clone(),
            },
        );
        candidate
    }

    // ------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------

    /// Emit canonical schema text.
    ///
    /// The output depends only on the builder's content, so repeated calls
    /// without intervening mutation return identical text.
    pub fn to_text(&self) -> Result<String, BuildError> {
        let enums = self
            .enums
            .values()
            .map(|e| EnumDoc {
                id: e.id.clone(),
                values: e
                    .values
                    .iter()
                    .map(|v| EnumValueDoc {
                        code: v.code,
                        id: v.id.clone(),
                        name: v.name.clone(),
                        description: v.description.clone(),
                    })
                    .collect(),
            })
            .collect();

        let doc = SchemaDocument {
            id: self.id.clone(),
            root: None,
            enums,
            schemas: vec![DefinitionDoc {
                id: CANONICAL_DEFINITION.to_string(),
                name: self.root.name.clone(),
                description: self.root.description.clone(),
                keys: self.key_docs(&self.root)?,
                nodes: self.node_docs(&self.root)?,
            }],
        };
        Ok(serde_yaml::to_string(&doc)?)
    }

    /// Parse the canonical text into a [`Schema`].
    pub fn build(&self) -> Result<Schema, BuildError> {
        Ok(Schema::parse(&self.to_text()?)?)
    }

    fn node_docs(&self, node: &Node) -> Result<Vec<NodeDoc>, BuildError> {
        node.nodes
            .iter()
            .map(|child| {
                Ok(NodeDoc {
                    id: path::leaf(&child.path).to_string(),
                    name: child.name.clone(),
                    description: child.description.clone(),
                    schema: None,
                    keys: self.key_docs(child)?,
                    nodes: self.node_docs(child)?,
                })
            })
            .collect()
    }

    fn key_docs(&self, node: &Node) -> Result<Vec<KeyDoc>, BuildError> {
        node.keys
            .iter()
            .map(|p| {
                let key = self
                    .keys
                    .get(p)
                    .ok_or_else(|| BuildError::UnknownKey(p.clone()))?;
                self.key_doc(key)
            })
            .collect()
    }

    fn key_doc(&self, key: &Key) -> Result<KeyDoc, BuildError> {
        let mut doc = KeyDoc {
            id: path::leaf(&key.path).to_string(),
            name: key.name.clone(),
            flags: key.access.flags(),
            view: (!key.view.is_empty()).then(|| key.view.clone()),
            description: (!key.description.is_empty()).then(|| key.description.clone()),
            ..Default::default()
        };
        match &key.spec {
            KeySpec::Bool { default } => {
                doc.kind = Some(ValueKind::Bool.to_string());
                doc.default = Some(YamlValue::Bool(*default));
            }
            KeySpec::String { default } => {
                doc.kind = Some(ValueKind::String.to_string());
                doc.default = Some(YamlValue::String(default.clone()));
            }
            KeySpec::Integer { default, range } => {
                doc.kind = Some(ValueKind::Integer.to_string());
                doc.default = Some(YamlValue::Number((*default).into()));
                let full = IntegerRange::FULL;
                doc.range = range_doc(
                    (range.min != full.min).then(|| YamlValue::Number(range.min.into())),
                    (range.max != full.max).then(|| YamlValue::Number(range.max.into())),
                    (range.step != full.step).then(|| YamlValue::Number(range.step.into())),
                );
            }
            KeySpec::Real { default, range } => {
                doc.kind = Some(ValueKind::Real.to_string());
                doc.default = Some(YamlValue::Number((*default).into()));
                let full = RealRange::FULL;
                doc.range = range_doc(
                    (range.min != full.min).then(|| YamlValue::Number(range.min.into())),
                    (range.max != full.max).then(|| YamlValue::Number(range.max.into())),
                    (range.step != full.step).then(|| YamlValue::Number(range.step.into())),
                );
            }
            KeySpec::Enum { enum_id, default } => {
                let symbol = self
                    .enums
                    .get(enum_id)
                    .ok_or_else(|| BuildError::UnknownEnum(enum_id.clone()))?
                    .by_code(*default)
                    .ok_or_else(|| BuildError::DefaultOutOfRange {
                        path: key.path.clone(),
                    })?;
                doc.enum_id = Some(enum_id.clone());
                doc.default = Some(YamlValue::String(symbol.id.clone()));
            }
        }
        Ok(doc)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn insert_key(&mut self, path: &str, name: String, spec: KeySpec) -> Result<(), BuildError> {
        path::validate(path)?;
        if path == path::ROOT {
            return Err(BuildError::Exists(path.to_string()));
        }
        if self.keys.contains_key(path) || self.root.find(path).is_some() {
            return Err(BuildError::Exists(path.to_string()));
        }
        if let Some(parent) = path::parent(path) {
            self.check_node_slot(parent)?;
        }
        // Schema text names an unnamed key after its id
        let name = if name.is_empty() {
            path::leaf(path).to_string()
        } else {
            name
        };
        self.attach(Key {
            path: path.to_string(),
            name,
            description: String::new(),
            view: String::new(),
            access: Access::default(),
            spec,
        });
        Ok(())
    }

    /// Link a validated key into the tree and the index.
    fn attach(&mut self, key: Key) {
        let parent = path::parent(&key.path).unwrap_or(path::ROOT);
        ensure_node(&mut self.root, parent).keys.push(key.path.clone());
        self.keys.insert(key.path.clone(), key);
    }

    /// Fails when `path` or one of its ancestors is a key.
    fn check_node_slot(&self, path: &str) -> Result<(), BuildError> {
        path::validate(path)?;
        let mut current = Some(path);
        while let Some(p) = current {
            if self.keys.contains_key(p) {
                return Err(BuildError::Exists(p.to_string()));
            }
            current = path::parent(p);
        }
        Ok(())
    }

    fn existing_key_mut(&mut self, path: &str) -> Result<&mut Key, BuildError> {
        self.keys
            .get_mut(path)
            .ok_or_else(|| BuildError::UnknownKey(path.to_string()))
    }

    fn key_mut(&mut self, path: &str, expected: ValueKind) -> Result<&mut Key, BuildError> {
        let key = self.existing_key_mut(path)?;
        if key.kind() != expected {
            return Err(BuildError::KindMismatch {
                path: path.to_string(),
                expected,
                actual: key.kind(),
            });
        }
        Ok(key)
    }
}

impl Schema {
    /// Create a builder for programmatic schema construction.
    pub fn builder(id: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(id)
    }
}

fn range_doc(
    min: Option<YamlValue>,
    max: Option<YamlValue>,
    step: Option<YamlValue>,
) -> Option<RangeDoc> {
    if min.is_none() && max.is_none() && step.is_none() {
        return None;
    }
    Some(RangeDoc { min, max, step })
}

/// Node at `target`, creating it and any missing ancestors.
fn ensure_node<'a>(root: &'a mut Node, target: &str) -> &'a mut Node {
    let mut current = root;
    for segment in path::segments(target) {
        let idx = match current
            .nodes
            .iter()
            .position(|n| path::leaf(&n.path) == segment)
        {
            Some(idx) => idx,
            None => {
                let child = Node::new(path::join(&current.path, segment));
                current.nodes.push(child);
                current.nodes.len() - 1
            }
        };
        current = &mut current.nodes[idx];
    }
    current
}
