//! Error types.

use crate::path::PathError;
use crate::value::ValueKind;

/// Errors raised while parsing schema text.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The text is not a well-formed schema document
    #[error("malformed schema document: {0}")]
    Malformed(#[from] serde_yaml::Error),

    /// The document declares no schema definition
    #[error("schema document has no definitions")]
    NoDefinitions,

    /// A node references a definition that does not exist
    #[error("unknown schema definition '{0}'")]
    UnknownDefinition(String),

    /// Definition inclusion loops back onto itself
    #[error("schema definition cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    /// Two definitions, enums, keys or nodes share an id or path
    #[error("duplicate {what} '{id}'")]
    Duplicate { what: &'static str, id: String },

    /// A key or node id is not a valid path segment
    #[error(transparent)]
    Path(#[from] PathError),

    /// A key references an enum that is not declared
    #[error("key '{path}' references unknown enum '{enum_id}'")]
    UnknownEnum { path: String, enum_id: String },

    /// A key declaration violates its own invariants
    #[error("invalid key '{path}': {reason}")]
    InvalidKey { path: String, reason: String },

    /// An enum declaration is inconsistent
    #[error("invalid enum '{id}': {reason}")]
    InvalidEnum { id: String, reason: String },
}

/// Errors raised by the schema builder.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error("path '{0}' already exists")]
    Exists(String),

    #[error("no key at '{0}'")]
    UnknownKey(String),

    #[error("no node at '{0}' in the source schema")]
    UnknownNode(String),

    #[error("unknown enum '{0}'")]
    UnknownEnum(String),

    #[error("enum '{0}' already exists")]
    EnumExists(String),

    #[error("enum '{enum_id}' already has a value '{value}'")]
    DuplicateEnumValue { enum_id: String, value: String },

    #[error("key '{path}' is a {actual} key, not {expected}")]
    KindMismatch {
        path: String,
        expected: ValueKind,
        actual: ValueKind,
    },

    #[error("range of '{path}' is inverted: min {min} > max {max}")]
    RangeInverted {
        path: String,
        min: String,
        max: String,
    },

    #[error("step of '{path}' must be non-negative")]
    InvalidStep { path: String },

    #[error("default of '{path}' is outside its range or value set")]
    DefaultOutOfRange { path: String },

    #[error("failed to emit schema text: {0}")]
    Emit(#[from] serde_yaml::Error),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Errors raised by the overrides layer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OverrideError {
    #[error("override for '{id}' already exists as {existing}")]
    TypeConflict { id: String, existing: ValueKind },

    #[error("override range for '{id}' is inverted")]
    RangeInverted { id: String },

    #[error("override default for '{id}' is outside [min, max]")]
    DefaultOutOfRange { id: String },

    #[error("override step for '{id}' must be non-negative")]
    InvalidStep { id: String },

    #[error("invalid override for '{id}': {reason}")]
    Invalid { id: String, reason: String },

    #[error(
        "malformed overrides{}: {reason}",
        .line.map(|l| format!(" at line {l}")).unwrap_or_default()
    )]
    Parse { line: Option<usize>, reason: String },

    #[error("failed to emit overrides: {0}")]
    Emit(String),
}

/// Errors raised by parameter providers.
#[derive(Debug, thiserror::Error)]
pub enum ParamError {
    #[error("unknown key '{0}'")]
    UnknownKey(String),

    #[error("key '{path}' expects {expected}, got {actual}")]
    TypeMismatch {
        path: String,
        expected: ValueKind,
        actual: ValueKind,
    },

    #[error("value for '{0}' is outside its range or value set")]
    InvalidValue(String),

    #[error("key '{0}' is read-only")]
    ReadOnly(String),

    #[error("batch rejected by pre-commit hook")]
    Vetoed,

    #[error("provider has no schema")]
    Unbound,

    #[error("key '{0}' has no accessor")]
    NoAccessor(String),

    #[error("accessor for '{0}' rejected the value")]
    AccessorRejected(String),

    #[error("no value for '{0}'")]
    MissingValue(String),

    #[error("backend {index} failed: {source}")]
    Backend {
        index: usize,
        #[source]
        source: Box<ParamError>,
    },

    #[error("path '{0}' is already provided by another backend")]
    Conflict(String),

    #[error("no backends registered")]
    NoBackends,

    #[error(transparent)]
    Build(#[from] BuildError),
}
