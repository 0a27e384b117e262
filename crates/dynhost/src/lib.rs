//! Dynamic host-object runtime
//!
//! `dynhost` gives statically compiled host objects a dynamic member
//! surface: compiled members described by an external metadata catalog are
//! merged into immutable per-type tables, instances grow expando
//! properties at runtime, method members reify as callable function
//! objects with `apply`/`call`, and a reference-counting lifetime model
//! with a cycle collector keeps the object graph sound.
//!
//! The core flow is name to handle to invocation:
//!
//! ```ignore
//! let handle = rt.get_handle(obj, "width", LookupFlags::new().caseless())?;
//! let value = rt.get(obj, handle)?;
//! rt.put(obj, handle, Value::I32(640))?;
//! ```
//!
//! Behavior differences between legacy hosts are captured by
//! [`CompatMode`]; member tables are built and cached per mode.

pub mod catalog;
mod dispatch;
pub mod error;
mod expando;
mod function;
mod gc;
pub mod handle;
pub mod member;
pub mod object;
pub mod runtime;
pub mod value;

pub use catalog::{
    CatalogAdapter, MemoryCatalog, MetadataCatalog, RawMember, RawMemberKind, RawParam,
    TypeMetaHandle,
};
pub use error::{CatalogError, DispatchError, DispatchResult, SlotError};
pub use gc::CollectStats;
pub use handle::{CompatMode, Handle, HandleClass, InterfaceId, InvokeKind, LookupFlags, SlotOffset};
pub use member::{HookSpec, MemberDescriptor, MemberHook, MemberTable, TableBuilder, MAX_ARGS};
pub use object::{
    DefaultOps, DispatchOverride, HostSlots, InitTableFn, Instance, NullSlots, TypeDesc, TypeOps,
};
pub use runtime::{InstanceId, Runtime};
pub use value::{change_type, ParamKind, Value, ValueConverter};
