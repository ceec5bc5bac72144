//! Provider dispatching keys to accessor closures.
//!
//! A `Controller` owns no values. Each schema key may be bound to a getter
//! and a setter that read and write a user-supplied storage handle. Unbound
//! keys read as their schema default and refuse writes.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::{Param, ParamList, lookup, validate_batch};
use crate::error::ParamError;
use crate::schema::Schema;
use crate::value::Value;

/// Reads the value of a key out of the storage handle.
pub type Getter<T> = Box<dyn Fn(&T, &str) -> Value + Send + Sync>;

/// Writes a validated value into the storage handle. Returning `false`
/// rejects the write.
pub type Setter<T> = Box<dyn Fn(&mut T, &str, Value) -> bool + Send + Sync>;

struct Accessor<T> {
    get: Getter<T>,
    set: Setter<T>,
}

/// Parameter provider backed by accessor closures over a storage `T`.
pub struct Controller<T> {
    schema: Arc<Schema>,
    storage: Mutex<T>,
    accessors: BTreeMap<String, Accessor<T>>,
    /// Externally owned lock held around every batch
    lock: Option<Arc<Mutex<()>>>,
}

impl<T: Send> Controller<T> {
    pub fn new(schema: Arc<Schema>, storage: T) -> Self {
        Self {
            schema,
            storage: Mutex::new(storage),
            accessors: BTreeMap::new(),
            lock: None,
        }
    }

    /// Like [`new`](Self::new), but every `set` and `get` batch runs while
    /// holding `lock`.
    pub fn with_lock(schema: Arc<Schema>, storage: T, lock: Arc<Mutex<()>>) -> Self {
        Self {
            lock: Some(lock),
            ..Self::new(schema, storage)
        }
    }

    /// Bind the accessor pair for the key at `path`, replacing any earlier
    /// binding.
    pub fn bind<G, S>(&mut self, path: &str, get: G, set: S) -> Result<(), ParamError>
    where
        G: Fn(&T, &str) -> Value + Send + Sync + 'static,
        S: Fn(&mut T, &str, Value) -> bool + Send + Sync + 'static,
    {
        lookup(&self.schema, path)?;
        self.accessors.insert(
            path.to_string(),
            Accessor {
                get: Box::new(get),
                set: Box::new(set),
            },
        );
        Ok(())
    }

    pub fn is_bound(&self, path: &str) -> bool {
        self.accessors.contains_key(path)
    }

    /// Direct access to the storage handle.
    pub fn storage(&self) -> MutexGuard<'_, T> {
        self.storage.lock()
    }

    pub fn into_storage(self) -> T {
        self.storage.into_inner()
    }
}

impl<T: Send> Param for Controller<T> {
    fn schema(&self) -> Option<Arc<Schema>> {
        Some(self.schema.clone())
    }

    fn set(&self, list: &ParamList) -> Result<(), ParamError> {
        let _guard = self.lock.as_ref().map(|l| l.lock());

        validate_batch(&self.schema, list)?;
        for name in list.names() {
            if !self.accessors.contains_key(name) {
                return Err(ParamError::NoAccessor(name.to_string()));
            }
        }

        let mut storage = self.storage.lock();
        for (name, value) in list.iter() {
            let Some(accessor) = self.accessors.get(name) else {
                continue;
            };
            // An empty entry writes the default back through the setter
            let value = match value {
                Some(value) => value.clone(),
                None => lookup(&self.schema, name)?.default_value(),
            };
            if !(accessor.set)(&mut storage, name, value) {
                warn!("[CONTROLLER] setter for '{}' rejected the value", name);
                return Err(ParamError::AccessorRejected(name.to_string()));
            }
        }
        debug!("[CONTROLLER] set {} keys", list.len());
        Ok(())
    }

    fn get(&self, list: &mut ParamList) -> Result<(), ParamError> {
        let _guard = self.lock.as_ref().map(|l| l.lock());

        for name in list.names() {
            lookup(&self.schema, name)?;
        }
        let storage = self.storage.lock();
        for (name, slot) in list.iter_mut() {
            let key = lookup(&self.schema, name)?;
            let value = match self.accessors.get(name) {
                Some(accessor) => (accessor.get)(&storage, name),
                None => key.default_value(),
            };
            if value.kind() != key.kind() {
                return Err(ParamError::TypeMismatch {
                    path: name.to_string(),
                    expected: key.kind(),
                    actual: value.kind(),
                });
            }
            *slot = Some(value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Device {
        gain: i64,
        label: String,
    }

    const SCHEMA: &str = r#"
id: device
schemas:
  - id: main
    keys:
      - { id: gain, type: integer, default: 5, range: { min: 0, max: 10 } }
      - { id: label, type: string, default: port }
      - { id: spare, type: boolean, default: true }
"#;

    fn controller() -> Controller<Device> {
        let schema = Arc::new(Schema::parse(SCHEMA).unwrap());
        let mut controller = Controller::new(schema, Device::default());
        controller
            .bind(
                "/gain",
                |d: &Device, _| Value::Integer(d.gain),
                |d: &mut Device, _, v| match v {
                    // Odd gains are not supported by the hardware
                    Value::Integer(g) if g % 2 == 0 => {
                        d.gain = g;
                        true
                    }
                    _ => false,
                },
            )
            .unwrap();
        controller
            .bind(
                "/label",
                |d: &Device, _| Value::String(d.label.clone()),
                |d: &mut Device, _, v| {
                    d.label = v.as_str().unwrap_or_default().to_string();
                    true
                },
            )
            .unwrap();
        controller
    }

    #[test]
    fn test_dispatch_to_accessors() {
        let controller = controller();
        let mut list = ParamList::new();
        list.set("/gain", 4).set("/label", "bow");
        controller.set(&list).unwrap();
        assert_eq!(controller.storage().gain, 4);
        assert_eq!(controller.storage().label, "bow");

        let mut request: ParamList = ["/gain", "/label", "/spare"].into_iter().collect();
        controller.get(&mut request).unwrap();
        assert_eq!(request.get("/gain"), Some(&Value::Integer(4)));
        assert_eq!(request.get("/spare"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_validation_before_dispatch() {
        let controller = controller();
        let mut list = ParamList::new();
        list.set("/label", "x").set("/gain", 12);
        assert!(matches!(
            controller.set(&list),
            Err(ParamError::InvalidValue(_))
        ));
        assert_eq!(controller.storage().label, "");

        let mut unbound = ParamList::new();
        unbound.set("/spare", false);
        assert!(matches!(
            controller.set(&unbound),
            Err(ParamError::NoAccessor(_))
        ));
    }

    #[test]
    fn test_setter_rejection() {
        let controller = controller();
        let mut list = ParamList::new();
        list.set("/gain", 3);
        assert!(matches!(
            controller.set(&list),
            Err(ParamError::AccessorRejected(_))
        ));
        assert_eq!(controller.storage().gain, 0);
    }

    #[test]
    fn test_empty_entry_writes_default() {
        let controller = controller();
        let mut list = ParamList::new();
        list.add("/label");
        controller.set(&list).unwrap();
        assert_eq!(controller.storage().label, "port");
    }

    #[test]
    fn test_external_lock_is_held_per_batch() {
        let schema = Arc::new(Schema::parse(SCHEMA).unwrap());
        let lock = Arc::new(Mutex::new(()));
        let held = lock.clone();
        let mut controller = Controller::with_lock(schema, 0i64, lock);
        controller
            .bind(
                "/gain",
                move |g: &i64, _| {
                    assert!(held.is_locked());
                    Value::Integer(*g)
                },
                |g: &mut i64, _, v| {
                    *g = v.as_integer().unwrap_or_default();
                    true
                },
            )
            .unwrap();
        let mut request: ParamList = ["/gain"].into_iter().collect();
        controller.get(&mut request).unwrap();
        assert_eq!(request.get("/gain"), Some(&Value::Integer(0)));
        assert!(matches!(
            controller.bind("/missing", |_: &i64, _| Value::Integer(0), |_, _, _| true),
            Err(ParamError::UnknownKey(_))
        ));
    }
}
