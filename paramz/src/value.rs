//! Typed parameter values.
//!
//! A [`Value`] carries exactly one of the five key kinds. Enum values are
//! numeric codes local to the schema they were read from; they only make
//! sense together with that schema's enum table.

use std::fmt;

/// The kind of a key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::EnumString, strum::Display,
)]
pub enum ValueKind {
    #[strum(serialize = "boolean")]
    Bool,
    #[strum(serialize = "integer")]
    Integer,
    #[strum(serialize = "double")]
    Real,
    #[strum(serialize = "string")]
    String,
    #[strum(serialize = "enum")]
    Enum,
}

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    Real(f64),
    String(String),
    /// Schema-local numeric code of an enum value
    Enum(i64),
}

macro_rules! impl_value_accessors {
    ($($method:ident -> $variant:ident : $ty:ty),* $(,)?) => {
        impl Value {
            $(
                #[doc = concat!("Try to extract as ", stringify!($ty), ".")]
                pub fn $method(&self) -> Option<$ty> {
                    match self {
                        Value::$variant(v) => Some(*v),
                        _ => None,
                    }
                }
            )*
        }
    };
}

impl_value_accessors! {
    as_bool -> Bool: bool,
    as_integer -> Integer: i64,
    as_real -> Real: f64,
    as_enum_code -> Enum: i64,
}

impl Value {
    /// Kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Integer(_) => ValueKind::Integer,
            Value::Real(_) => ValueKind::Real,
            Value::String(_) => ValueKind::String,
            Value::Enum(_) => ValueKind::Enum,
        }
    }

    /// Try to extract as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v:?}"),
            Value::Enum(code) => write!(f, "#{code}"),
        }
    }
}

macro_rules! impl_value_from {
    ($($ty:ty => $variant:ident);* $(;)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

impl_value_from! {
    bool => Bool;
    i64 => Integer;
    i32 => Integer;
    u32 => Integer;
    f64 => Real;
    f32 => Real;
    String => String;
    &str => String;
}
