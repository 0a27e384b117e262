//! Error types for dispatch, catalog access, and host slot calls

use crate::handle::{Handle, InterfaceId, InvokeKind, SlotOffset};
use crate::runtime::InstanceId;
use crate::value::ParamKind;
use thiserror::Error;

/// Result alias used throughout the dispatcher.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors surfaced to dispatch callers.
///
/// Every variant is recoverable and returned to the immediate caller;
/// nothing here aborts the runtime. Callers can distinguish "no such
/// member" from "member exists but the operation is unsupported" from
/// argument-shape problems.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// No member with this name exists on the instance.
    #[error("unknown member name `{0}`")]
    UnknownName(String),

    /// No member with this handle exists on the instance.
    #[error("member {0:?} not found")]
    MemberNotFound(Handle),

    /// Too few arguments even after applying declared defaults.
    #[error("argument count mismatch: expected {expected}, got {supplied}")]
    ArgCount { expected: u16, supplied: usize },

    /// A value could not be coerced to the declared kind.
    #[error("cannot coerce {from:?} to {to:?}")]
    CoercionFailed { from: ParamKind, to: ParamKind },

    /// The invocation kind is not implemented for this member kind.
    #[error("operation {0:?} not supported for this member")]
    Unsupported(InvokeKind),

    /// A stored value was invoked but is not callable.
    #[error("value is not callable")]
    NotCallable,

    /// A `call`/`apply` style invocation had a malformed receiver or
    /// argument source.
    #[error("illegal function call")]
    IllegalCall,

    /// Put on a property with no setter under a strict compatibility mode.
    #[error("property is read-only")]
    ReadOnly,

    /// Member removal is not available under the instance's compatibility
    /// mode.
    #[error("member removal not supported")]
    RemovalUnsupported,

    /// An interface-reference argument does not support the required
    /// sub-interface.
    #[error("required interface {0:?} unavailable")]
    InterfaceUnavailable(InterfaceId),

    /// Metadata catalog failure, propagated through dependent dispatches.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Compiled call target failure.
    #[error("host slot error: {0}")]
    Slot(#[from] SlotError),

    /// The instance id refers to a destroyed or never-allocated slot.
    #[error("instance {0:?} is not alive")]
    DeadInstance(InstanceId),
}

/// Errors from the external metadata catalog.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CatalogError {
    /// The catalog has no metadata for this interface.
    #[error("unknown interface {0:?}")]
    UnknownInterface(InterfaceId),

    /// A stale or foreign metadata handle was presented.
    #[error("invalid metadata handle")]
    InvalidHandle,

    /// The catalog has no such member under the given type.
    #[error("unknown member {0:?}")]
    UnknownMember(Handle),

    /// Generic invocation failed inside the catalog.
    #[error("generic invocation failed: {0}")]
    InvokeFailed(String),
}

/// Errors from a compiled call target.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SlotError {
    /// The call table has no slot at this offset.
    #[error("no slot at offset {0}")]
    BadSlot(SlotOffset),

    /// The target itself reported a failure.
    #[error("{0}")]
    Failed(String),
}
