//! Validated, thread-safe parameter table.
//!
//! A `Store` holds one value slot per key of its schema. Reads of an unused
//! slot fall back to the schema default. Writes go through four phases:
//!
//! 1. validate the whole batch (unknown names, kinds, ranges, read-only)
//! 2. offer the batch to the pre-commit hook, which may veto it
//! 3. commit under the write lock, bumping counters once per touched key
//! 4. notify observers after the lock is released
//!
//! Counters count accepted writes, not value changes: writing the current
//! value again still bumps them.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use tracing::{debug, warn};

use super::{Param, ParamList, lookup, validate_batch};
use crate::common::DataHandler;
use crate::error::ParamError;
use crate::schema::Schema;
use crate::value::Value;

/// Pre-commit veto hook. Returning `false` rejects the whole batch.
///
/// The hook runs while the store still admits readers, so it may call
/// [`Param::get`] on the same store, but not [`Param::set`].
pub type PreCommitHook = Arc<dyn Fn(&ParamList) -> bool + Send + Sync>;

#[derive(Debug, Clone)]
struct Slot {
    /// Explicit value, `None` while unused
    value: Option<Value>,
    counter: u64,
}

#[derive(Debug)]
struct StoreState {
    slots: BTreeMap<String, Slot>,
    counter: u64,
}

/// Parameter store bound to one schema.
pub struct Store {
    schema: Arc<Schema>,
    state: RwLock<StoreState>,
    pre_commit: RwLock<Option<PreCommitHook>>,
    observers: Mutex<Vec<DataHandler<String>>>,
}

impl Store {
    pub fn new(schema: Arc<Schema>) -> Self {
        let slots = schema
            .key_paths()
            .map(|p| {
                (
                    p.to_string(),
                    Slot {
                        value: None,
                        counter: 0,
                    },
                )
            })
            .collect();
        Self {
            schema,
            state: RwLock::new(StoreState { slots, counter: 0 }),
            pre_commit: RwLock::new(None),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Install the pre-commit veto hook, replacing any previous one.
    pub fn set_pre_commit<F>(&self, hook: F)
    where
        F: Fn(&ParamList) -> bool + Send + Sync + 'static,
    {
        *self.pre_commit.write() = Some(Arc::new(hook));
    }

    pub fn clear_pre_commit(&self) {
        *self.pre_commit.write() = None;
    }

    /// Call `callback` with the path of every key touched by a committed
    /// write. Callbacks run after the store lock is released and may call
    /// back into the store.
    pub fn on_change<F>(&self, callback: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.observers
            .lock()
            .push(DataHandler::Callback(Arc::new(callback)));
    }

    /// Channel of touched key paths. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> flume::Receiver<String> {
        let (tx, rx) = flume::unbounded();
        self.observers.lock().push(DataHandler::Queue(tx));
        rx
    }

    /// Number of accepted writes to `path`.
    pub fn counter(&self, path: &str) -> Option<u64> {
        self.state.read().slots.get(path).map(|s| s.counter)
    }

    /// Number of accepted key writes across the whole store.
    pub fn global_counter(&self) -> u64 {
        self.state.read().counter
    }

    /// Whether `path` holds an explicitly set value.
    pub fn is_used(&self, path: &str) -> Option<bool> {
        self.state.read().slots.get(path).map(|s| s.value.is_some())
    }

    /// Current value of a single key.
    pub fn value(&self, path: &str) -> Option<Value> {
        let state = self.state.read_recursive();
        let slot = state.slots.get(path)?;
        slot.value
            .clone()
            .or_else(|| self.schema.default_value(path))
    }

    /// Explicitly set values, in path order. Replaying the snapshot through
    /// `set` on a fresh store reproduces this store's values.
    pub fn snapshot(&self) -> ParamList {
        let state = self.state.read();
        let mut list = ParamList::new();
        for (path, slot) in &state.slots {
            if let Some(value) = &slot.value {
                list.set(path.as_str(), value.clone());
            }
        }
        list
    }

    /// Return every used key to its default. Each key that was in use
    /// counts as touched.
    pub fn reset(&self) {
        let touched: Vec<String> = {
            let mut state = self.state.write();
            let mut touched = Vec::new();
            for (path, slot) in state.slots.iter_mut() {
                if slot.value.take().is_some() {
                    slot.counter += 1;
                    touched.push(path.clone());
                }
            }
            state.counter += touched.len() as u64;
            touched
        };
        debug!("[STORE] reset {} keys", touched.len());
        self.notify(&touched);
    }

    fn notify(&self, touched: &[String]) {
        if touched.is_empty() {
            return;
        }
        let handlers = self.observers.lock().clone();
        let mut closed = false;
        for path in touched {
            for handler in &handlers {
                closed |= !handler.handle(path.clone());
            }
        }
        if closed {
            self.observers.lock().retain(|h| match h {
                DataHandler::Queue(tx) => !tx.is_disconnected(),
                DataHandler::Callback(_) => true,
            });
        }
    }
}

impl Param for Store {
    fn schema(&self) -> Option<Arc<Schema>> {
        Some(self.schema.clone())
    }

    fn set(&self, list: &ParamList) -> Result<(), ParamError> {
        // Only one writer at a time; readers keep going until commit
        let state = self.state.upgradable_read();

        validate_batch(&self.schema, list)
            .inspect_err(|e| debug!("[STORE] set rejected: {}", e))?;

        let hook = self.pre_commit.read().clone();
        if let Some(hook) = hook
            && !hook(list)
        {
            warn!("[STORE] set of {} keys vetoed", list.len());
            return Err(ParamError::Vetoed);
        }

        let mut state = RwLockUpgradableReadGuard::upgrade(state);
        let mut touched = Vec::with_capacity(list.len());
        for (name, value) in list.iter() {
            if let Some(slot) = state.slots.get_mut(name) {
                slot.value = value.cloned();
                slot.counter += 1;
                touched.push(name.to_string());
            }
        }
        state.counter += touched.len() as u64;
        drop(state);

        debug!("[STORE] committed {} keys", touched.len());
        self.notify(&touched);
        Ok(())
    }

    fn get(&self, list: &mut ParamList) -> Result<(), ParamError> {
        // Recursive so a pre-commit hook can read while its writer waits
        let state = self.state.read_recursive();
        for name in list.names() {
            lookup(&self.schema, name)?;
        }
        for (name, slot) in list.iter_mut() {
            *slot = match state.slots.get(name).and_then(|s| s.value.clone()) {
                Some(value) => Some(value),
                None => self.schema.default_value(name),
            };
        }
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("schema", &self.schema.id())
            .field("state", &*self.state.read())
            .finish_non_exhaustive()
    }
}
