//! Immutable parameter schemas.
//!
//! A [`Schema`] describes a tree of typed keys. It is built once, from
//! schema text (optionally filtered through an [`Overrides`] layer) or from a
//! [`SchemaBuilder`](crate::builder::SchemaBuilder), and is then shared by
//! reference (`Arc<Schema>`) between every provider that needs it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Schema                                       │
//! │ ├── root: Node "/"                           │
//! │ │   ├── keys: ["/gain", ...]                 │
//! │ │   └── nodes: [Node "/device", ...]         │
//! │ ├── keys:  path    → Key                     │
//! │ └── enums: enum id → EnumType                │
//! └──────────────────────────────────────────────┘
//! ```

pub(crate) mod document;
mod parse;

use std::collections::BTreeMap;
use std::fmt::Write as _;

use sha2::Digest;

use crate::common::GlobalCounter;
use crate::error::SchemaError;
use crate::overrides::Overrides;
use crate::path;
use crate::value::{Value, ValueKind};

static SCHEMA_VERSION: GlobalCounter = GlobalCounter::new();

/// Access flags of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Access {
    pub readable: bool,
    pub writable: bool,
    pub hidden: bool,
}

impl Access {
    pub const READ_WRITE: Access = Access {
        readable: true,
        writable: true,
        hidden: false,
    };

    pub const READ_ONLY: Access = Access {
        readable: true,
        writable: false,
        hidden: false,
    };

    pub fn is_readonly(&self) -> bool {
        !self.writable
    }

    /// Flags as written in schema text.
    pub fn flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if !self.writable {
            flags.push("readonly".to_string());
        }
        if !self.readable {
            flags.push("writeonly".to_string());
        }
        if self.hidden {
            flags.push("hidden".to_string());
        }
        flags
    }
}

impl Default for Access {
    fn default() -> Self {
        Self::READ_WRITE
    }
}

/// Range constraint for integer keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegerRange {
    pub min: i64,
    pub max: i64,
    pub step: i64,
}

impl IntegerRange {
    pub const FULL: IntegerRange = IntegerRange {
        min: i64::MIN,
        max: i64::MAX,
        step: 1,
    };

    pub fn contains(&self, value: i64) -> bool {
        self.min <= value && value <= self.max
    }
}

impl Default for IntegerRange {
    fn default() -> Self {
        Self::FULL
    }
}

/// Range constraint for real keys.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RealRange {
    pub min: f64,
    pub max: f64,
    /// 0.0 means continuous
    pub step: f64,
}

impl RealRange {
    pub const FULL: RealRange = RealRange {
        min: f64::NEG_INFINITY,
        max: f64::INFINITY,
        step: 0.0,
    };

    pub fn contains(&self, value: f64) -> bool {
        !value.is_nan() && self.min <= value && value <= self.max
    }
}

impl Default for RealRange {
    fn default() -> Self {
        Self::FULL
    }
}

/// Per-kind declaration of a key.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySpec {
    Bool { default: bool },
    Integer { default: i64, range: IntegerRange },
    Real { default: f64, range: RealRange },
    String { default: String },
    Enum { enum_id: String, default: i64 },
}

impl KeySpec {
    pub fn kind(&self) -> ValueKind {
        match self {
            KeySpec::Bool { .. } => ValueKind::Bool,
            KeySpec::Integer { .. } => ValueKind::Integer,
            KeySpec::Real { .. } => ValueKind::Real,
            KeySpec::String { .. } => ValueKind::String,
            KeySpec::Enum { .. } => ValueKind::Enum,
        }
    }

    pub fn default_value(&self) -> Value {
        match self {
            KeySpec::Bool { default } => Value::Bool(*default),
            KeySpec::Integer { default, .. } => Value::Integer(*default),
            KeySpec::Real { default, .. } => Value::Real(*default),
            KeySpec::String { default } => Value::String(default.clone()),
            KeySpec::Enum { default, .. } => Value::Enum(*default),
        }
    }
}

/// A single typed parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    pub path: String,
    pub name: String,
    pub description: String,
    /// Free-form rendering hint (`hex`, `date`, `file`, ...)
    pub view: String,
    pub access: Access,
    pub spec: KeySpec,
}

impl Key {
    pub fn kind(&self) -> ValueKind {
        self.spec.kind()
    }

    pub fn default_value(&self) -> Value {
        self.spec.default_value()
    }

    pub fn enum_id(&self) -> Option<&str> {
        match &self.spec {
            KeySpec::Enum { enum_id, .. } => Some(enum_id),
            _ => None,
        }
    }
}

/// One allowed value of an enum type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    /// Portable symbolic id
    pub id: String,
    /// Schema-local numeric code
    pub code: i64,
    pub name: String,
    pub description: String,
}

impl EnumValue {
    pub fn new(code: i64, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            code,
            name: name.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A named, ordered set of enum values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumType {
    pub id: String,
    pub values: Vec<EnumValue>,
}

impl EnumType {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            values: Vec::new(),
        }
    }

    pub fn by_id(&self, symbol: &str) -> Option<&EnumValue> {
        self.values.iter().find(|v| v.id == symbol)
    }

    pub fn by_code(&self, code: i64) -> Option<&EnumValue> {
        self.values.iter().find(|v| v.code == code)
    }

    /// Symbolic ids in declaration order.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|v| v.id.as_str())
    }
}

/// A path segment grouping keys and child nodes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Node {
    pub path: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub nodes: Vec<Node>,
    /// Paths of the keys that are immediate children of this node
    pub keys: Vec<String>,
}

impl Node {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn root() -> Self {
        Self::new(path::ROOT)
    }

    /// Direct child node with the given segment.
    pub fn child(&self, segment: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| path::leaf(&n.path) == segment)
    }

    /// Descendant (or self) at `path`.
    pub fn find(&self, target: &str) -> Option<&Node> {
        if target == self.path {
            return Some(self);
        }
        if !path::is_strictly_under(target, &self.path) {
            return None;
        }
        let relative = path::rebase(target, &self.path, path::ROOT)?;
        let mut current = self;
        for segment in path::segments(&relative) {
            current = current.child(segment)?;
        }
        Some(current)
    }

    pub(crate) fn find_mut(&mut self, target: &str) -> Option<&mut Node> {
        if target == self.path {
            return Some(self);
        }
        let relative = path::rebase(target, &self.path, path::ROOT)?;
        let mut current = self;
        for segment in path::segments(&relative) {
            current = current
                .nodes
                .iter_mut()
                .find(|n| path::leaf(&n.path) == segment)?;
        }
        Some(current)
    }

    /// Walk this node and every descendant, parents first.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Node)) {
        visit(self);
        for child in &self.nodes {
            child.walk(visit);
        }
    }
}

/// Immutable description of a parameter tree.
#[derive(Debug)]
pub struct Schema {
    id: String,
    text: String,
    version: u64,
    root: Node,
    keys: BTreeMap<String, Key>,
    enums: BTreeMap<String, EnumType>,
}

impl Schema {
    /// Parse schema text.
    pub fn parse(text: &str) -> Result<Self, SchemaError> {
        parse::parse(text, None)
    }

    /// Parse schema text, consulting `overrides` before the values written
    /// in the text.
    pub fn parse_with_overrides(text: &str, overrides: &Overrides) -> Result<Self, SchemaError> {
        parse::parse(text, Some(overrides))
    }

    pub(crate) fn from_parts(
        id: String,
        text: String,
        root: Node,
        keys: BTreeMap<String, Key>,
        enums: BTreeMap<String, EnumType>,
    ) -> Self {
        Self {
            id,
            text,
            version: SCHEMA_VERSION.increment(),
            root,
            keys,
            enums,
        }
    }

    /// Schema identifier from the document.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The text this schema was parsed from.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Construction stamp, strictly increasing across all schemas built by
    /// this process.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// SHA-256 fingerprint of the source text, `PRMZ01_<hex>`.
    pub fn fingerprint(&self) -> String {
        let hash = sha2::Sha256::digest(self.text.as_bytes());
        let mut out = String::with_capacity(7 + 64);
        out.push_str("PRMZ01_");
        for byte in hash.iter() {
            let _ = write!(out, "{byte:02x}");
        }
        out
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn node(&self, path: &str) -> Option<&Node> {
        self.root.find(path)
    }

    /// All key paths in sorted order.
    pub fn key_paths(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(|k| k.as_str())
    }

    /// All keys in path order.
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.keys.values()
    }

    /// Keys strictly below `root`, in path order.
    pub fn keys_under<'a>(&'a self, root: &'a str) -> impl Iterator<Item = &'a Key> + 'a {
        self.keys
            .values()
            .filter(move |k| path::is_strictly_under(&k.path, root))
    }

    pub fn key(&self, path: &str) -> Option<&Key> {
        self.keys.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.keys.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn kind(&self, path: &str) -> Option<ValueKind> {
        self.key(path).map(Key::kind)
    }

    pub fn name(&self, path: &str) -> Option<&str> {
        self.key(path).map(|k| k.name.as_str())
    }

    pub fn description(&self, path: &str) -> Option<&str> {
        self.key(path).map(|k| k.description.as_str())
    }

    pub fn view(&self, path: &str) -> Option<&str> {
        self.key(path).map(|k| k.view.as_str())
    }

    pub fn access(&self, path: &str) -> Option<Access> {
        self.key(path).map(|k| k.access)
    }

    pub fn default_value(&self, path: &str) -> Option<Value> {
        self.key(path).map(Key::default_value)
    }

    pub fn integer_range(&self, path: &str) -> Option<IntegerRange> {
        match &self.key(path)?.spec {
            KeySpec::Integer { range, .. } => Some(*range),
            _ => None,
        }
    }

    pub fn real_range(&self, path: &str) -> Option<RealRange> {
        match &self.key(path)?.spec {
            KeySpec::Real { range, .. } => Some(*range),
            _ => None,
        }
    }

    pub fn enum_type(&self, id: &str) -> Option<&EnumType> {
        self.enums.get(id)
    }

    pub fn enum_types(&self) -> impl Iterator<Item = &EnumType> {
        self.enums.values()
    }

    pub fn enum_values(&self, id: &str) -> Option<&[EnumValue]> {
        self.enums.get(id).map(|e| e.values.as_slice())
    }

    pub fn enum_value_by_id(&self, enum_id: &str, symbol: &str) -> Option<&EnumValue> {
        self.enums.get(enum_id)?.by_id(symbol)
    }

    pub fn enum_value_by_code(&self, enum_id: &str, code: i64) -> Option<&EnumValue> {
        self.enums.get(enum_id)?.by_code(code)
    }

    /// Enum type referenced by the key at `path`.
    pub fn key_enum(&self, path: &str) -> Option<&EnumType> {
        self.enums.get(self.key(path)?.enum_id()?)
    }

    /// Symbolic id of `code` for the enum key at `path`.
    pub fn enum_symbol(&self, path: &str, code: i64) -> Option<&str> {
        self.key_enum(path)?.by_code(code).map(|v| v.id.as_str())
    }

    /// Numeric code of `symbol` for the enum key at `path`.
    pub fn enum_code(&self, path: &str, symbol: &str) -> Option<i64> {
        self.key_enum(path)?.by_id(symbol).map(|v| v.code)
    }

    /// Whether `value` is acceptable for the key at `path`.
    ///
    /// Unknown paths and kind mismatches are simply not valid. A read-only
    /// key only accepts its default.
    pub fn check(&self, path: &str, value: &Value) -> bool {
        let Some(key) = self.keys.get(path) else {
            return false;
        };
        if value.kind() != key.kind() {
            return false;
        }
        if key.access.is_readonly() && *value != key.default_value() {
            return false;
        }
        match (&key.spec, value) {
            (KeySpec::Bool { .. }, Value::Bool(_)) => true,
            (KeySpec::String { .. }, Value::String(_)) => true,
            (KeySpec::Integer { range, .. }, Value::Integer(v)) => range.contains(*v),
            (KeySpec::Real { range, .. }, Value::Real(v)) => range.contains(*v),
            (KeySpec::Enum { enum_id, .. }, Value::Enum(code)) => self
                .enums
                .get(enum_id)
                .is_some_and(|e| e.by_code(*code).is_some()),
            _ => false,
        }
    }
}
