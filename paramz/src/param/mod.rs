//! Parameter providers.
//!
//! Every provider implements [`Param`]: it exposes the [`Schema`] it
//! conforms to and moves values in and out in batches carried by a
//! [`ParamList`].
//!
//! | Provider        | Values live in                       |
//! |-----------------|--------------------------------------|
//! | [`ListParam`]   | an in-memory [`ParamList`]           |
//! | [`Store`]       | its own validated table              |
//! | [`Controller`]  | user storage behind accessor closures |
//! | [`Proxy`]       | several backends under path prefixes |
//! | [`Merge`]       | several redundant backends           |

mod controller;
mod list;
mod merge;
mod proxy;
mod store;

use std::sync::Arc;

pub use controller::{Controller, Getter, Setter};
pub use list::ListParam;
pub use merge::{Merge, MergeBuilder};
pub use proxy::{Proxy, ProxyBuilder};
pub use store::{PreCommitHook, Store};

use crate::error::ParamError;
use crate::schema::{Key, Schema};
use crate::value::Value;

/// A provider of schema-conforming parameter values.
pub trait Param: Send + Sync {
    /// The schema this provider conforms to, `None` while unbound.
    fn schema(&self) -> Option<Arc<Schema>>;

    /// Write every entry of `list`. An entry without a value resets that
    /// key. Fails as a whole when any entry is rejected.
    fn set(&self, list: &ParamList) -> Result<(), ParamError>;

    /// Fill in the current value of every name in `list`.
    fn get(&self, list: &mut ParamList) -> Result<(), ParamError>;
}

/// Ordered set of unique names, each optionally carrying a value.
///
/// A name without a value is a request ("give me the current value") in
/// `get`, and a reset in `set`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamList {
    entries: Vec<(String, Option<Value>)>,
}

impl ParamList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bare name, dropping any value it carried.
    pub fn add(&mut self, name: impl Into<String>) -> &mut Self {
        self.set_value(name, None)
    }

    /// Set `name` to `value`, appending the name if it is new.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.set_value(name, Some(value.into()))
    }

    pub fn set_value(&mut self, name: impl Into<String>, value: Option<Value>) -> &mut Self {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((name, value)),
        }
        self
    }

    /// Value carried by `name`, if any.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Option<Value>> {
        let idx = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_ref()))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Option<Value>)> {
        self.entries.iter_mut().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for ParamList {
    /// Collect bare names into a request list.
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut list = ParamList::new();
        for name in iter {
            list.add(name);
        }
        list
    }
}

/// Key at `name`, or `UnknownKey`.
pub(crate) fn lookup<'a>(schema: &'a Schema, name: &str) -> Result<&'a Key, ParamError> {
    schema
        .key(name)
        .ok_or_else(|| ParamError::UnknownKey(name.to_string()))
}

/// Validate one incoming value: the key exists, the kind matches, a
/// read-only key keeps its default, and the value passes the schema check.
pub(crate) fn validate<'a>(
    schema: &'a Schema,
    name: &str,
    value: &Value,
) -> Result<&'a Key, ParamError> {
    let key = lookup(schema, name)?;
    if value.kind() != key.kind() {
        return Err(ParamError::TypeMismatch {
            path: name.to_string(),
            expected: key.kind(),
            actual: value.kind(),
        });
    }
    if key.access.is_readonly() && *value != key.default_value() {
        return Err(ParamError::ReadOnly(name.to_string()));
    }
    if !schema.check(name, value) {
        return Err(ParamError::InvalidValue(name.to_string()));
    }
    Ok(key)
}

/// Validate every entry of a `set` batch. Empty entries only need a known
/// name.
pub(crate) fn validate_batch(schema: &Schema, list: &ParamList) -> Result<(), ParamError> {
    for (name, value) in list.iter() {
        match value {
            Some(value) => validate(schema, name, value)?,
            None => lookup(schema, name)?,
        };
    }
    Ok(())
}

/// Re-express `value` of key `from_path` in `from` as a value of key
/// `to_path` in `to`. Enum codes go through their symbolic id; every other
/// kind passes through unchanged.
pub(crate) fn translate(
    value: Value,
    from: &Schema,
    from_path: &str,
    to: &Schema,
    to_path: &str,
) -> Result<Value, ParamError> {
    let Value::Enum(code) = value else {
        return Ok(value);
    };
    let symbol = from
        .enum_symbol(from_path, code)
        .ok_or_else(|| ParamError::InvalidValue(from_path.to_string()))?;
    to.enum_code(to_path, symbol)
        .map(Value::Enum)
        .ok_or_else(|| ParamError::InvalidValue(to_path.to_string()))
}
