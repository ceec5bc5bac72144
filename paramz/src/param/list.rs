//! In-memory provider backed by a [`ParamList`].

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::{Param, ParamList, lookup, validate_batch};
use crate::error::ParamError;
use crate::schema::Schema;

/// A provider holding its values in a plain [`ParamList`].
///
/// Without a schema it accepts any name and value and only answers for
/// names it has seen. With a schema it validates like a [`Store`] and
/// answers unset keys with their defaults, but keeps no counters and
/// sends no notifications.
///
/// [`Store`]: super::Store
#[derive(Debug, Default)]
pub struct ListParam {
    schema: Option<Arc<Schema>>,
    values: RwLock<ParamList>,
}

impl ListParam {
    /// Unbound provider.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(schema: Arc<Schema>) -> Self {
        Self {
            schema: Some(schema),
            values: RwLock::new(ParamList::new()),
        }
    }

    /// Copy of the explicitly set values.
    pub fn values(&self) -> ParamList {
        self.values.read().clone()
    }
}

impl Param for ListParam {
    fn schema(&self) -> Option<Arc<Schema>> {
        self.schema.clone()
    }

    fn set(&self, list: &ParamList) -> Result<(), ParamError> {
        if let Some(schema) = &self.schema {
            validate_batch(schema, list)?;
        }
        let mut values = self.values.write();
        for (name, value) in list.iter() {
            match value {
                Some(value) => {
                    values.set(name, value.clone());
                }
                None => {
                    values.remove(name);
                }
            }
        }
        debug!("[LIST] stored {} entries", list.len());
        Ok(())
    }

    fn get(&self, list: &mut ParamList) -> Result<(), ParamError> {
        let values = self.values.read();
        for name in list.names() {
            match &self.schema {
                Some(schema) => {
                    lookup(schema, name)?;
                }
                None if !values.contains(name) => {
                    return Err(ParamError::MissingValue(name.to_string()));
                }
                None => {}
            }
        }
        for (name, slot) in list.iter_mut() {
            *slot = values
                .get(name)
                .cloned()
                .or_else(|| self.schema.as_ref()?.default_value(name));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_unbound_list_accepts_anything() {
        let param = ListParam::new();
        assert!(param.schema().is_none());

        let mut list = ParamList::new();
        list.set("/anything", 1).set("/else", "text");
        param.set(&list).unwrap();

        let mut request: ParamList = ["/else"].into_iter().collect();
        param.get(&mut request).unwrap();
        assert_eq!(request.get("/else"), Some(&Value::String("text".into())));

        let mut missing: ParamList = ["/never"].into_iter().collect();
        assert!(matches!(
            param.get(&mut missing),
            Err(ParamError::MissingValue(_))
        ));

        let mut clear = ParamList::new();
        clear.add("/anything");
        param.set(&clear).unwrap();
        assert_eq!(param.values().len(), 1);
    }

    #[test]
    fn test_bound_list_validates() {
        let schema = Schema::parse(
            "id: s\nschemas:\n  - id: m\n    keys:\n      - { id: on, type: boolean, default: true }\n",
        )
        .unwrap();
        let param = ListParam::with_schema(Arc::new(schema));

        let mut request: ParamList = ["/on"].into_iter().collect();
        param.get(&mut request).unwrap();
        assert_eq!(request.get("/on"), Some(&Value::Bool(true)));

        let mut bad = ParamList::new();
        bad.set("/on", 3);
        assert!(matches!(
            param.set(&bad),
            Err(ParamError::TypeMismatch { .. })
        ));
        bad.set("/off", false);
        assert!(param.set(&bad).is_err());
        assert!(param.values().is_empty());
    }
}
