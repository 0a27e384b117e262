//! Dynamic value model and coercion
//!
//! A closed tagged union covering the kinds that flow through dispatch:
//! integer widths, a float, strings, booleans, and object references.
//! Conversions between kinds are explicit (`change_type`), never implicit.

use crate::error::{DispatchError, DispatchResult};
use crate::runtime::InstanceId;

/// A dynamically typed value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// No value (unassigned slot, void return).
    #[default]
    Empty,
    /// An explicit null reference.
    Null,
    Bool(bool),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    U64(u64),
    F64(f64),
    Str(String),
    /// Reference to a runtime instance. Holding one in runtime-managed
    /// storage counts as an owned reference.
    Object(InstanceId),
}

/// Statically declared kind of a property, argument, or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Method returns nothing.
    Void,
    /// Any value; no coercion applied.
    Variant,
    Bool,
    I16,
    U16,
    I32,
    U32,
    U64,
    F64,
    Str,
    /// Object reference, optionally narrowed to a required sub-interface
    /// recorded alongside the argument.
    Object,
}

impl Value {
    /// The declared kind this value matches exactly.
    pub fn kind(&self) -> ParamKind {
        match self {
            Value::Empty | Value::Null => ParamKind::Variant,
            Value::Bool(_) => ParamKind::Bool,
            Value::I16(_) => ParamKind::I16,
            Value::U16(_) => ParamKind::U16,
            Value::I32(_) => ParamKind::I32,
            Value::U32(_) => ParamKind::U32,
            Value::U64(_) => ParamKind::U64,
            Value::F64(_) => ParamKind::F64,
            Value::Str(_) => ParamKind::Str,
            Value::Object(_) => ParamKind::Object,
        }
    }

    /// Whether this value already has the declared kind (no coercion needed).
    pub fn matches(&self, kind: ParamKind) -> bool {
        if kind == ParamKind::Variant {
            return true;
        }
        match (self, kind) {
            (Value::Null, ParamKind::Object) => true,
            _ => self.kind() == kind,
        }
    }

    /// The referenced instance, if this is an object value.
    pub fn as_object(&self) -> Option<InstanceId> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::I16(v) => Some(*v as i64),
            Value::U16(v) => Some(*v as i64),
            Value::I32(v) => Some(*v as i64),
            Value::U32(v) => Some(*v as i64),
            Value::U64(v) => i64::try_from(*v).ok(),
            Value::F64(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            Value::Str(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            Value::Str(s) => s.trim().parse::<f64>().ok(),
            other => other.as_i64().map(|v| v as f64),
        }
    }
}

/// Externally supplied conversion service.
///
/// Gets first refusal on every coercion; returning `None` falls back to the
/// built-in rules.
pub trait ValueConverter {
    /// Convert `value` to the declared `to` kind, or decline with `None`.
    fn change_type(&self, value: &Value, to: ParamKind) -> Option<DispatchResult<Value>>;
}

fn coercion_failed(value: &Value, to: ParamKind) -> DispatchError {
    DispatchError::CoercionFailed { from: value.kind(), to }
}

/// Coerce `value` to the declared `to` kind.
///
/// An external converter, when present, is consulted first. Built-in rules:
/// string to boolean is "non-empty"; empty/null to an object kind yields a
/// null reference; everything else goes through standard numeric/string
/// conversion. Failure is local to the single conversion.
pub fn change_type(
    value: &Value,
    to: ParamKind,
    converter: Option<&dyn ValueConverter>,
) -> DispatchResult<Value> {
    if let Some(conv) = converter {
        if let Some(res) = conv.change_type(value, to) {
            return res;
        }
    }

    if value.matches(to) {
        return Ok(value.clone());
    }

    match to {
        ParamKind::Variant => Ok(value.clone()),
        ParamKind::Bool => match value {
            Value::Str(s) => Ok(Value::Bool(!s.is_empty())),
            Value::Empty | Value::Null => Ok(Value::Bool(false)),
            other => other
                .as_f64()
                .map(|v| Value::Bool(v != 0.0))
                .ok_or_else(|| coercion_failed(value, to)),
        },
        ParamKind::Object => match value {
            Value::Empty | Value::Null => Ok(Value::Null),
            _ => Err(coercion_failed(value, to)),
        },
        ParamKind::I16 => int_coerce(value, to, |v| i16::try_from(v).ok().map(Value::I16)),
        ParamKind::U16 => int_coerce(value, to, |v| u16::try_from(v).ok().map(Value::U16)),
        ParamKind::I32 => int_coerce(value, to, |v| i32::try_from(v).ok().map(Value::I32)),
        ParamKind::U32 => int_coerce(value, to, |v| u32::try_from(v).ok().map(Value::U32)),
        ParamKind::U64 => int_coerce(value, to, |v| u64::try_from(v).ok().map(Value::U64)),
        ParamKind::F64 => value
            .as_f64()
            .map(Value::F64)
            .ok_or_else(|| coercion_failed(value, to)),
        ParamKind::Str => match value {
            Value::Bool(b) => Ok(Value::Str(b.to_string())),
            Value::I16(v) => Ok(Value::Str(v.to_string())),
            Value::U16(v) => Ok(Value::Str(v.to_string())),
            Value::I32(v) => Ok(Value::Str(v.to_string())),
            Value::U32(v) => Ok(Value::Str(v.to_string())),
            Value::U64(v) => Ok(Value::Str(v.to_string())),
            Value::F64(v) => Ok(Value::Str(v.to_string())),
            Value::Empty | Value::Null => Ok(Value::Str(String::new())),
            _ => Err(coercion_failed(value, to)),
        },
        ParamKind::Void => Err(coercion_failed(value, to)),
    }
}

fn int_coerce(
    value: &Value,
    to: ParamKind,
    make: impl Fn(i64) -> Option<Value>,
) -> DispatchResult<Value> {
    value
        .as_i64()
        .and_then(make)
        .ok_or_else(|| coercion_failed(value, to))
}
