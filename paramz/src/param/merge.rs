//! Provider reconciling redundant backends into one schema.
//!
//! All backends are assumed to be instances of the same logical device, so
//! paths are shared verbatim. Binding computes the schema every backend can
//! honour:
//!
//! - a key survives only if every backend declares it with the same kind,
//!   access flags and view hint
//! - integer and real ranges are intersected (`max` of the mins, `min` of
//!   the maxes, `max` of the steps); an empty intersection drops the key
//! - enum value sets are intersected by symbolic id; codes are taken from
//!   the first backend and translated per backend on every write
//!
//! Keys whose current values already differ between backends are marked
//! "keep" and are never written by a uniform `set`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use super::{Param, ParamList, lookup, translate, validate_batch};
use crate::builder::SchemaBuilder;
use crate::error::ParamError;
use crate::schema::{EnumValue, Key, KeySpec, Schema};
use crate::value::Value;

struct Backend {
    param: Arc<dyn Param>,
    schema: Arc<Schema>,
}

/// Collects backends for a [`Merge`]. Consumed by [`bind`](Self::bind).
pub struct MergeBuilder {
    id: String,
    backends: Vec<Backend>,
}

impl MergeBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            backends: Vec::new(),
        }
    }

    /// Add a backend. The first one added answers every `get`.
    pub fn add(&mut self, backend: Arc<dyn Param>) -> Result<&mut Self, ParamError> {
        let schema = backend.schema().ok_or(ParamError::Unbound)?;
        self.backends.push(Backend {
            param: backend,
            schema,
        });
        Ok(self)
    }

    /// Build the merged schema, then compare the backends' current values
    /// to flag diverged keys.
    pub fn bind(self) -> Result<Merge, ParamError> {
        let Some(first) = self.backends.first() else {
            return Err(ParamError::NoBackends);
        };
        let schemas: Vec<&Schema> = self.backends.iter().map(|b| b.schema.as_ref()).collect();

        let mut builder = SchemaBuilder::new(self.id.clone());
        let mut dropped = 0usize;
        for key in first.schema.keys() {
            let decls: Option<Vec<&Key>> = schemas.iter().map(|s| s.key(&key.path)).collect();
            let merged = match decls {
                Some(decls) => merge_key(&mut builder, &schemas, &decls)?,
                None => {
                    debug!("[MERGE] '{}' is missing from some backend", key.path);
                    false
                }
            };
            if !merged {
                dropped += 1;
            }
        }
        copy_node_names(&mut builder, &first.schema)?;

        let schema = Arc::new(builder.build()?);
        let keep = schema
            .key_paths()
            .map(|path| {
                let diverged = diverges(&self.backends, &schema, path);
                if diverged {
                    warn!("[MERGE] '{}' differs across backends; keeping", path);
                }
                (path.to_string(), AtomicBool::new(diverged))
            })
            .collect();

        info!(
            "[MERGE] bound '{}': {} keys over {} backends, {} dropped",
            schema.id(),
            schema.len(),
            self.backends.len(),
            dropped
        );
        Ok(Merge {
            schema,
            backends: self.backends,
            keep,
        })
    }
}

/// Merge one key into `builder`. Returns false when the declarations
/// cannot be reconciled.
fn merge_key(
    builder: &mut SchemaBuilder,
    schemas: &[&Schema],
    decls: &[&Key],
) -> Result<bool, ParamError> {
    let first = decls[0];
    let path = first.path.as_str();
    let compatible = decls.iter().all(|k| {
        k.kind() == first.kind() && k.access == first.access && k.view == first.view
    });
    if !compatible {
        warn!("[MERGE] dropping '{}': declarations disagree", path);
        return Ok(false);
    }

    match &first.spec {
        KeySpec::Bool { default } => builder.create_bool(path, &first.name, *default)?,
        KeySpec::String { default } => {
            builder.create_string(path, &first.name, default.as_str())?
        }
        KeySpec::Integer { default, .. } => {
            let ranges = decls.iter().filter_map(|k| match &k.spec {
                KeySpec::Integer { range, .. } => Some(*range),
                _ => None,
            });
            let (mut min, mut max, mut step) = (i64::MIN, i64::MAX, 0);
            for r in ranges {
                min = min.max(r.min);
                max = max.min(r.max);
                step = step.max(r.step);
            }
            if min > max {
                warn!("[MERGE] dropping '{}': ranges do not overlap", path);
                return Ok(false);
            }
            builder.create_integer(path, &first.name, (*default).clamp(min, max))?;
            builder.set_integer_range(path, min, max, step)?;
        }
        KeySpec::Real { default, .. } => {
            let ranges = decls.iter().filter_map(|k| match &k.spec {
                KeySpec::Real { range, .. } => Some(*range),
                _ => None,
            });
            let (mut min, mut max, mut step) = (f64::NEG_INFINITY, f64::INFINITY, 0.0f64);
            for r in ranges {
                min = min.max(r.min);
                max = max.min(r.max);
                step = step.max(r.step);
            }
            if min > max {
                warn!("[MERGE] dropping '{}': ranges do not overlap", path);
                return Ok(false);
            }
            builder.create_real(path, &first.name, default.clamp(min, max))?;
            builder.set_real_range(path, min, max, step)?;
        }
        KeySpec::Enum { enum_id, default } => {
            let Some(values) = intersect_enum(schemas, path) else {
                warn!("[MERGE] dropping '{}': no enum value in common", path);
                return Ok(false);
            };
            let merged_id = merged_enum(builder, enum_id, path, &values)?;
            let symbol = schemas[0]
                .enum_symbol(path, *default)
                .filter(|s| values.iter().any(|v| v.id == *s))
                .unwrap_or(values[0].id.as_str());
            builder.create_enum_key(path, &first.name, &merged_id, symbol)?;
        }
    }

    builder.set_access(path, first.access)?;
    builder.set_view(path, first.view.as_str())?;
    builder.set_description(path, first.description.as_str())?;
    Ok(true)
}

/// Values of the first backend's enum for `path` whose symbolic id every
/// backend knows, in the first backend's order. `None` if nothing survives.
fn intersect_enum(schemas: &[&Schema], path: &str) -> Option<Vec<EnumValue>> {
    let enums = schemas
        .iter()
        .map(|s| s.key_enum(path))
        .collect::<Option<Vec<_>>>()?;
    let values: Vec<EnumValue> = enums[0]
        .values
        .iter()
        .filter(|v| enums.iter().all(|e| e.by_id(&v.id).is_some()))
        .cloned()
        .collect();
    (!values.is_empty()).then_some(values)
}

/// Declare the merged enum in `builder`, reusing `enum_id` unless another
/// key already declared it with a different intersection.
fn merged_enum(
    builder: &mut SchemaBuilder,
    enum_id: &str,
    path: &str,
    values: &[EnumValue],
) -> Result<String, ParamError> {
    let id = match builder.enum_type(enum_id) {
        None => enum_id.to_string(),
        Some(existing) if existing.values == values => return Ok(enum_id.to_string()),
        Some(_) => format!("{enum_id}@{path}"),
    };
    builder.create_enum(&id)?;
    for value in values {
        builder.add_enum_value(&id, value.clone())?;
    }
    Ok(id)
}

/// Carry node metadata of the first backend over to nodes that survived.
fn copy_node_names(builder: &mut SchemaBuilder, schema: &Schema) -> Result<(), ParamError> {
    let mut named = Vec::new();
    schema.root().walk(&mut |node| {
        if let Some(name) = &node.name {
            named.push((node.path.clone(), name.clone(), node.description.clone()));
        }
    });
    for (path, name, description) in named {
        if builder.has_node(&path) {
            builder.set_node_name(&path, name, description.as_deref())?;
        }
    }
    Ok(())
}

/// Whether the backends disagree on the current value of `path`. A backend
/// that cannot be read counts as disagreeing.
fn diverges(backends: &[Backend], merged: &Schema, path: &str) -> bool {
    let mut seen: Option<Value> = None;
    for (index, backend) in backends.iter().enumerate() {
        let mut request = ParamList::new();
        request.add(path);
        let value = backend
            .param
            .get(&mut request)
            .ok()
            .and_then(|_| request.get(path).cloned())
            .and_then(|v| translate(v, &backend.schema, path, merged, path).ok());
        let Some(value) = value else {
            warn!("[MERGE] could not read '{}' on backend {}", path, index);
            return true;
        };
        match &seen {
            Some(previous) if *previous != value => return true,
            Some(_) => {}
            None => seen = Some(value),
        }
    }
    false
}

/// Bound merge provider. Built by [`MergeBuilder::bind`].
pub struct Merge {
    schema: Arc<Schema>,
    backends: Vec<Backend>,
    keep: BTreeMap<String, AtomicBool>,
}

impl Merge {
    pub fn builder(id: impl Into<String>) -> MergeBuilder {
        MergeBuilder::new(id)
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    /// Whether writes to `path` are withheld.
    pub fn is_kept(&self, path: &str) -> Option<bool> {
        self.keep.get(path).map(|k| k.load(Ordering::Acquire))
    }

    /// Paths currently withheld from writes.
    pub fn kept(&self) -> Vec<String> {
        self.keep
            .iter()
            .filter(|(_, k)| k.load(Ordering::Acquire))
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub fn set_keep(&self, path: &str, keep: bool) -> Result<(), ParamError> {
        self.keep
            .get(path)
            .ok_or_else(|| ParamError::UnknownKey(path.to_string()))?
            .store(keep, Ordering::Release);
        Ok(())
    }
}

impl Param for Merge {
    fn schema(&self) -> Option<Arc<Schema>> {
        Some(self.schema.clone())
    }

    fn set(&self, list: &ParamList) -> Result<(), ParamError> {
        validate_batch(&self.schema, list)?;

        let outgoing: Vec<(&str, Option<&Value>)> = list
            .iter()
            .filter(|(name, _)| !self.is_kept(name).unwrap_or(false))
            .collect();
        if outgoing.is_empty() {
            debug!("[MERGE] nothing to write after keep filtering");
            return Ok(());
        }

        for (index, backend) in self.backends.iter().enumerate() {
            let mut batch = ParamList::new();
            for (name, value) in &outgoing {
                let value = value
                    .cloned()
                    .map(|v| translate(v, &self.schema, name, &backend.schema, name))
                    .transpose()?;
                batch.set_value(*name, value);
            }
            backend
                .param
                .set(&batch)
                .map_err(|e| ParamError::Backend {
                    index,
                    source: Box::new(e),
                })?;
        }
        debug!(
            "[MERGE] wrote {} of {} keys to {} backends",
            outgoing.len(),
            list.len(),
            self.backends.len()
        );
        Ok(())
    }

    fn get(&self, list: &mut ParamList) -> Result<(), ParamError> {
        for name in list.names() {
            lookup(&self.schema, name)?;
        }
        let backend = &self.backends[0];
        backend
            .param
            .get(list)
            .map_err(|e| ParamError::Backend {
                index: 0,
                source: Box::new(e),
            })
    }
}
