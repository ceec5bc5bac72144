//! Convenience re-exports for common paramz types.
//!
//! Import everything with `use paramz::prelude::*;`.

/// The provider trait, required to call `set`/`get` on any provider.
pub use crate::param::{Param, ParamList};

/// Schema model and construction.
pub use crate::builder::SchemaBuilder;
pub use crate::overrides::Overrides;
pub use crate::schema::{Access, EnumValue, Schema};

/// Providers.
pub use crate::param::{Controller, ListParam, Merge, MergeBuilder, Proxy, ProxyBuilder, Store};

/// Values.
pub use crate::value::{Value, ValueKind};

/// Errors.
pub use crate::error::{BuildError, OverrideError, ParamError, SchemaError};
