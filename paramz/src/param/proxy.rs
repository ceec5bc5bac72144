//! Composite provider namespacing several backends under path prefixes.
//!
//! ```text
//!   Proxy schema                    backends
//!   /port/gain      ──────────────▶ [0] /device/gain
//!   /port/beam/side ──────────────▶ [0] /device/beam/side
//!   /stbd/gain      ──────────────▶ [1] /device/gain
//! ```
//!
//! Registration splices each backend's subtree into a composite schema
//! through [`SchemaBuilder::join`]. Once bound, every batch is split by
//! backend, renamed, forwarded, and the answers renamed back.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::{Param, ParamList, translate, validate_batch};
use crate::builder::SchemaBuilder;
use crate::error::{BuildError, ParamError};
use crate::path;
use crate::schema::Schema;

#[derive(Debug, Clone)]
struct Route {
    backend: usize,
    /// Key path inside the backend's own schema
    source: String,
}

struct Backend {
    param: Arc<dyn Param>,
    /// Backend schema as seen at registration
    schema: Arc<Schema>,
}

/// Collects backends for a [`Proxy`]. Consumed by [`bind`](Self::bind).
pub struct ProxyBuilder {
    builder: SchemaBuilder,
    backends: Vec<Backend>,
    routes: BTreeMap<String, Route>,
}

impl ProxyBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            builder: SchemaBuilder::new(id),
            backends: Vec::new(),
            routes: BTreeMap::new(),
        }
    }

    /// Expose the keys below `source_root` in `backend` under `prefix`.
    ///
    /// Fails without registering anything if the backend is unbound, if
    /// `source_root` is not a node of its schema, or if any resulting path
    /// is already taken.
    pub fn register(
        &mut self,
        prefix: &str,
        backend: Arc<dyn Param>,
        source_root: &str,
    ) -> Result<&mut Self, ParamError> {
        let schema = backend.schema().ok_or(ParamError::Unbound)?;
        self.builder
            .join(&schema, source_root, prefix)
            .map_err(|e| match e {
                BuildError::Exists(path) => ParamError::Conflict(path),
                other => ParamError::Build(other),
            })?;

        let index = self.backends.len();
        let mut count = 0;
        for key in schema.keys_under(source_root) {
            if let Some(composite) = path::rebase(&key.path, source_root, prefix) {
                self.routes.insert(
                    composite,
                    Route {
                        backend: index,
                        source: key.path.clone(),
                    },
                );
                count += 1;
            }
        }
        debug!(
            "[PROXY] backend {} '{}':{} registered under {} ({} keys)",
            index,
            schema.id(),
            source_root,
            prefix,
            count
        );
        self.backends.push(Backend {
            param: backend,
            schema,
        });
        Ok(self)
    }

    /// Freeze registration and build the composite schema.
    pub fn bind(self) -> Result<Proxy, ParamError> {
        if self.backends.is_empty() {
            return Err(ParamError::NoBackends);
        }
        let schema = Arc::new(self.builder.build()?);
        info!(
            "[PROXY] bound '{}': {} keys over {} backends",
            schema.id(),
            schema.len(),
            self.backends.len()
        );
        Ok(Proxy {
            schema,
            backends: self.backends,
            routes: self.routes,
        })
    }
}

/// Bound composite provider. Built by [`ProxyBuilder::bind`].
pub struct Proxy {
    schema: Arc<Schema>,
    backends: Vec<Backend>,
    routes: BTreeMap<String, Route>,
}

impl Proxy {
    pub fn builder(id: impl Into<String>) -> ProxyBuilder {
        ProxyBuilder::new(id)
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    /// Backend index and original name behind a composite path.
    pub fn route(&self, path: &str) -> Option<(usize, &str)> {
        self.routes
            .get(path)
            .map(|r| (r.backend, r.source.as_str()))
    }

    fn route_of(&self, name: &str) -> Result<&Route, ParamError> {
        self.routes
            .get(name)
            .ok_or_else(|| ParamError::UnknownKey(name.to_string()))
    }
}

impl Param for Proxy {
    fn schema(&self) -> Option<Arc<Schema>> {
        Some(self.schema.clone())
    }

    fn set(&self, list: &ParamList) -> Result<(), ParamError> {
        validate_batch(&self.schema, list)?;

        let mut batches: BTreeMap<usize, ParamList> = BTreeMap::new();
        for (name, value) in list.iter() {
            let route = self.route_of(name)?;
            let backend = &self.backends[route.backend];
            let value = value
                .cloned()
                .map(|v| translate(v, &self.schema, name, &backend.schema, &route.source))
                .transpose()?;
            batches
                .entry(route.backend)
                .or_default()
                .set_value(route.source.as_str(), value);
        }

        for (index, batch) in &batches {
            debug!("[PROXY] set {} keys on backend {}", batch.len(), index);
            self.backends[*index]
                .param
                .set(batch)
                .map_err(|e| ParamError::Backend {
                    index: *index,
                    source: Box::new(e),
                })?;
        }
        Ok(())
    }

    fn get(&self, list: &mut ParamList) -> Result<(), ParamError> {
        let mut batches: BTreeMap<usize, ParamList> = BTreeMap::new();
        for name in list.names() {
            let route = self.route_of(name)?;
            batches
                .entry(route.backend)
                .or_default()
                .add(route.source.as_str());
        }

        for (index, batch) in batches.iter_mut() {
            debug!("[PROXY] get {} keys from backend {}", batch.len(), index);
            self.backends[*index]
                .param
                .get(batch)
                .map_err(|e| ParamError::Backend {
                    index: *index,
                    source: Box::new(e),
                })?;
        }

        for (name, slot) in list.iter_mut() {
            let route = self.route_of(name)?;
            let backend = &self.backends[route.backend];
            let value = batches
                .get(&route.backend)
                .and_then(|b| b.get(&route.source))
                .cloned()
                .ok_or_else(|| ParamError::MissingValue(name.to_string()))?;
            *slot = Some(translate(
                value,
                &backend.schema,
                &route.source,
                &self.schema,
                name,
            )?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::Store;
    use crate::value::Value;

    const DEVICE: &str = r#"
id: device
enums:
  - id: direction
    values:
      - { code: 10, id: left, name: Left }
      - { code: 20, id: right, name: Right }
schemas:
  - id: main
    nodes:
      - id: x
        name: Head
        keys:
          - { id: gain, type: integer, default: 5, range: { min: 0, max: 10 } }
          - { id: side, enum: direction, default: left }
    keys:
      - { id: outside, type: boolean }
"#;

    const OTHER: &str = r#"
id: other
enums:
  - id: direction
    values:
      - { code: 1, id: right, name: Right }
      - { code: 2, id: left, name: Left }
schemas:
  - id: main
    nodes:
      - id: x
        keys:
          - { id: gain, type: integer, default: 1, range: { min: 0, max: 100 } }
          - { id: side, enum: direction, default: right }
"#;

    const NARROW: &str = r#"
id: narrow
enums:
  - id: direction
    values:
      - { code: 1, id: left, name: Left }
      - { code: 2, id: right, name: Right }
schemas:
  - id: m
    keys: [{ id: dir, enum: direction, default: left }]
"#;

    const WIDE: &str = r#"
id: wide
enums:
  - id: direction
    values:
      - { code: 5, id: left, name: Left }
      - { code: 7, id: up, name: Up }
schemas:
  - id: m
    keys: [{ id: dir, enum: direction, default: up }]
"#;

    fn store(text: &str) -> Arc<Store> {
        Arc::new(Store::new(Arc::new(Schema::parse(text).unwrap())))
    }

    #[test]
    fn test_composite_routes_by_prefix() {
        let a = store(DEVICE);
        let b = store(OTHER);
        let mut builder = Proxy::builder("rig");
        builder
            .register("/a", a.clone(), "/x")
            .unwrap()
            .register("/b", b.clone(), "/x")
            .unwrap();
        let proxy = builder.bind().unwrap();

        let schema = proxy.schema().unwrap();
        assert_eq!(
            schema.key_paths().collect::<Vec<_>>(),
            vec!["/a/gain", "/a/side", "/b/gain", "/b/side"]
        );
        assert_eq!(proxy.route("/b/gain"), Some((1, "/x/gain")));
        assert_eq!(schema.node("/a").unwrap().name.as_deref(), Some("Head"));

        let mut list = ParamList::new();
        list.set("/a/gain", 7);
        proxy.set(&list).unwrap();
        assert_eq!(a.value("/x/gain"), Some(Value::Integer(7)));
        assert_eq!(a.counter("/x/gain"), Some(1));
        assert_eq!(b.counter("/x/gain"), Some(0));

        let mut request: ParamList = ["/a/gain", "/b/gain"].into_iter().collect();
        proxy.get(&mut request).unwrap();
        assert_eq!(request.get("/a/gain"), Some(&Value::Integer(7)));
        assert_eq!(request.get("/b/gain"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_enum_codes_translate_per_backend() {
        let a = store(DEVICE);
        let b = store(OTHER);
        let mut builder = Proxy::builder("rig");
        builder.register("/a", a.clone(), "/x").unwrap();
        builder.register("/b", b.clone(), "/x").unwrap();
        let proxy = builder.bind().unwrap();
        let schema = proxy.schema().unwrap();

        let left = schema.enum_code("/b/side", "left").unwrap();
        let mut list = ParamList::new();
        list.set("/b/side", Value::Enum(left));
        proxy.set(&list).unwrap();
        assert_eq!(b.value("/x/side"), Some(Value::Enum(2)));

        let mut request: ParamList = ["/b/side"].into_iter().collect();
        proxy.get(&mut request).unwrap();
        assert_eq!(request.get("/b/side"), Some(&Value::Enum(left)));
    }

    #[test]
    fn test_registration_conflicts_and_unknown_names() {
        let a = store(DEVICE);
        let mut builder = Proxy::builder("rig");
        builder.register("/a", a.clone(), "/x").unwrap();
        assert!(matches!(
            builder.register("/a", a.clone(), "/x"),
            Err(ParamError::Conflict(_))
        ));
        assert!(matches!(
            builder.register("/c", Arc::new(crate::param::ListParam::new()), "/"),
            Err(ParamError::Unbound)
        ));
        let proxy = builder.bind().unwrap();
        assert_eq!(proxy.backend_count(), 1);

        let mut list = ParamList::new();
        list.set("/a/outside", true);
        assert!(matches!(proxy.set(&list), Err(ParamError::UnknownKey(_))));

        assert!(matches!(
            ProxyBuilder::new("empty").bind(),
            Err(ParamError::NoBackends)
        ));
    }

    #[test]
    fn test_wider_enum_on_second_backend_stays_separate() {
        let narrow = store(NARROW);
        let wide = store(WIDE);
        let mut builder = Proxy::builder("rig");
        builder.register("/a", narrow.clone(), "/").unwrap();
        builder.register("/b", wide.clone(), "/").unwrap();
        let proxy = builder.bind().unwrap();
        let schema = proxy.schema().unwrap();

        assert_eq!(schema.enum_code("/a/dir", "up"), None);
        assert_eq!(schema.enum_code("/b/dir", "up"), Some(7));
        assert!(!schema.check("/a/dir", &Value::Enum(7)));

        let mut list = ParamList::new();
        list.set("/a/dir", Value::Enum(7));
        assert!(matches!(proxy.set(&list), Err(ParamError::InvalidValue(_))));
        assert_eq!(narrow.value("/dir"), Some(Value::Enum(1)));

        let mut list = ParamList::new();
        list.set("/b/dir", Value::Enum(5));
        proxy.set(&list).unwrap();
        assert_eq!(wide.value("/dir"), Some(Value::Enum(5)));
    }

    #[test]
    fn test_malformed_source_root_is_rejected() {
        let a = store(DEVICE);
        let mut builder = Proxy::builder("rig");
        assert!(matches!(
            builder.register("/a", a.clone(), "/x/"),
            Err(ParamError::Build(_))
        ));
        builder.register("/a", a, "/x").unwrap();
        let proxy = builder.bind().unwrap();
        assert_eq!(proxy.backend_count(), 1);
        assert_eq!(proxy.route("/a/gain"), Some((0, "/x/gain")));
    }

    #[test]
    fn test_backend_failure_fails_the_call() {
        let a = store(DEVICE);
        a.set_pre_commit(|_| false);
        let mut builder = Proxy::builder("rig");
        builder.register("/a", a.clone(), "/x").unwrap();
        let proxy = builder.bind().unwrap();

        let mut list = ParamList::new();
        list.set("/a/gain", 2);
        match proxy.set(&list) {
            Err(ParamError::Backend { index, source }) => {
                assert_eq!(index, 0);
                assert!(matches!(*source, ParamError::Vetoed));
            }
            other => panic!("expected backend failure, got {other:?}"),
        }
    }
}
