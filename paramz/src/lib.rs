//! # paramz: typed parameter schemas and providers
//!
//! `paramz` describes the configuration of a device as a [`Schema`]: a tree
//! of typed keys with defaults, ranges and enumerations. Components read and
//! write values through the [`Param`] trait, implemented by a validated
//! [`Store`], by accessor-backed [`Controller`]s, and by two composites:
//! [`Proxy`] mounts several providers side by side under path prefixes,
//! [`Merge`] treats several providers as redundant copies of one device.
//!
//! ## Getting started
//!
//! ```rust
//! use std::sync::Arc;
//! use paramz::prelude::*;
//!
//! let schema = Schema::parse(r#"
//! id: sonar
//! schemas:
//!   - id: main
//!     keys:
//!       - { id: gain, name: Gain, type: integer, default: 5, range: { min: 0, max: 10 } }
//! "#)?;
//! let store = Store::new(Arc::new(schema));
//!
//! let mut list = ParamList::new();
//! list.set("/gain", 7);
//! store.set(&list)?;
//! assert_eq!(store.value("/gain"), Some(Value::Integer(7)));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Schema text
//!
//! Schemas are YAML documents; see [`schema`] for the model and
//! [`SchemaBuilder`] for building one in code. [`Overrides`] substitute
//! defaults, ranges and enum value sets at parse time.

pub mod builder;
mod common;
pub mod error;
pub mod overrides;
pub mod param;
pub mod path;
pub mod prelude;
pub mod schema;
pub mod value;

pub use builder::SchemaBuilder;
pub use error::{BuildError, OverrideError, ParamError, SchemaError};
pub use overrides::{KeyOverride, Overrides};
pub use param::{
    Controller, ListParam, Merge, MergeBuilder, Param, ParamList, Proxy, ProxyBuilder, Store,
};
pub use schema::{Access, EnumType, EnumValue, IntegerRange, Key, KeySpec, Node, RealRange, Schema};
pub use value::{Value, ValueKind};
