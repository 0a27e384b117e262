//! Type descriptors, per-type behavior hooks, and instance state
//!
//! A `TypeDesc` is static metadata for one object type: its label, source
//! interfaces, behavior vtable, and a per-compatibility-mode cache of the
//! compiled member table. Instances reference a descriptor and carry the
//! mutable state: host call table, expando data, wrapper entries, and the
//! reference count.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::catalog::CatalogAdapter;
use crate::error::{DispatchError, DispatchResult, SlotError};
use crate::expando::ExpandoStore;
use crate::handle::{CompatMode, Handle, InterfaceId, InvokeKind, LookupFlags, SlotOffset};
use crate::member::{MemberTable, TableBuilder};
use crate::runtime::{InstanceId, Runtime};
use crate::value::Value;

/// Compiled call targets of a host object.
///
/// Dispatch never calls host code directly; every builtin member invocation
/// lands here with the declaring interface and slot offset.
pub trait HostSlots: Send {
    fn call_slot(
        &mut self,
        iface: InterfaceId,
        offset: SlotOffset,
        args: &[Value],
    ) -> Result<Value, SlotError>;
}

/// Host with no compiled slots. Useful for purely dynamic objects.
pub struct NullSlots;

impl HostSlots for NullSlots {
    fn call_slot(
        &mut self,
        _iface: InterfaceId,
        offset: SlotOffset,
        _args: &[Value],
    ) -> Result<Value, SlotError> {
        Err(SlotError::BadSlot(offset))
    }
}

/// Per-type behavior hooks. All methods have non-participating defaults;
/// a type overrides only what it customizes.
pub trait TypeOps: Sync {
    /// Invoke the default-value member (the object used as a value).
    fn value(
        &self,
        _rt: &mut Runtime,
        _this: InstanceId,
        kind: InvokeKind,
        _args: &[Value],
    ) -> DispatchResult<Value> {
        Err(DispatchError::Unsupported(kind))
    }

    /// Resolve a name before the member table is consulted.
    fn lookup_handle(
        &self,
        _rt: &mut Runtime,
        _this: InstanceId,
        _name: &str,
        _flags: LookupFlags,
    ) -> Option<DispatchResult<Handle>> {
        None
    }

    /// Resolve a name after builtin lookup missed, before expando creation.
    fn fallback_handle(
        &self,
        _rt: &mut Runtime,
        _this: InstanceId,
        _name: &str,
        _flags: LookupFlags,
    ) -> Option<DispatchResult<Handle>> {
        None
    }

    /// Invoke a member in the type-defined custom handle range.
    fn invoke_custom(
        &self,
        _rt: &mut Runtime,
        _this: InstanceId,
        handle: Handle,
        _kind: InvokeKind,
        _args: &[Value],
    ) -> DispatchResult<Value> {
        Err(DispatchError::MemberNotFound(handle))
    }

    /// Name of a custom-range member.
    fn custom_name(
        &self,
        _rt: &Runtime,
        _this: InstanceId,
        handle: Handle,
    ) -> DispatchResult<String> {
        Err(DispatchError::MemberNotFound(handle))
    }

    /// Next enumerable custom-range member after `after`.
    fn next_custom(&self, _rt: &Runtime, _this: InstanceId, _after: Option<Handle>) -> Option<Handle> {
        None
    }

    /// Remove a custom-range member.
    fn delete_custom(
        &self,
        _rt: &mut Runtime,
        _this: InstanceId,
        handle: Handle,
    ) -> DispatchResult<bool> {
        Err(DispatchError::MemberNotFound(handle))
    }

    /// Force creation of lazily added members before enumeration.
    fn populate(&self, _rt: &mut Runtime, _this: InstanceId) {}

    /// Whether instances start without a compatibility mode and resolve it
    /// on first dispatch.
    fn defers_mode(&self) -> bool {
        false
    }

    /// Resolve the deferred compatibility mode.
    fn resolve_mode(&self, _rt: &Runtime, _this: InstanceId) -> CompatMode {
        CompatMode::Modern
    }

    /// Whether the instance can stand in for `iface` beyond the interfaces
    /// its descriptor declares.
    fn supports_iface(&self, _iface: InterfaceId) -> bool {
        false
    }

    /// Called once when the reference count first reaches zero, before the
    /// instance is torn down.
    fn last_release(&self, _rt: &mut Runtime, _this: InstanceId) {}

    /// Report type-held object references to the cycle collector.
    fn traverse(&self, _rt: &Runtime, _this: InstanceId, _visit: &mut dyn FnMut(InstanceId)) {}

    /// Drop type-held object references during cycle teardown.
    fn unlink(&self, _rt: &mut Runtime, _this: InstanceId) {}
}

/// The all-defaults behavior vtable.
pub struct DefaultOps;

impl TypeOps for DefaultOps {}

/// A host-managed dispatch layer that fully shadows an instance.
///
/// When attached, the layer gets first refusal on lookup, invocation,
/// removal, and enumeration; operations it declines fall through to
/// normal dispatch.
pub trait DispatchOverride: Send {
    fn get_handle(&mut self, name: &str, flags: LookupFlags) -> Option<Handle>;

    fn invoke(
        &mut self,
        handle: Handle,
        kind: InvokeKind,
        args: &[Value],
    ) -> Option<DispatchResult<Value>>;

    fn remove(&mut self, _handle: Handle) -> Option<DispatchResult<bool>> {
        None
    }

    fn remove_by_name(&mut self, _name: &str) -> Option<DispatchResult<bool>> {
        None
    }

    fn next_handle(&mut self, _after: Option<Handle>) -> Option<Handle> {
        None
    }

    fn member_name(&mut self, _handle: Handle) -> Option<String> {
        None
    }

    /// Report layer-held object references to the cycle collector.
    fn traverse(&self, _visit: &mut dyn FnMut(InstanceId)) {}
}

/// Extra member-table setup for a type, run once per compatibility mode.
pub type InitTableFn = fn(&mut TableBuilder, CompatMode) -> DispatchResult<()>;

/// Static metadata of one object type.
pub struct TypeDesc {
    pub name: &'static str,
    /// Source interfaces merged into the member table, in priority order.
    pub ifaces: &'static [InterfaceId],
    pub ops: &'static dyn TypeOps,
    init_table: Option<InitTableFn>,
    cache: [OnceCell<Arc<MemberTable>>; CompatMode::COUNT],
}

impl TypeDesc {
    pub const fn new(
        name: &'static str,
        ifaces: &'static [InterfaceId],
        ops: &'static dyn TypeOps,
        init_table: Option<InitTableFn>,
    ) -> Self {
        TypeDesc {
            name,
            ifaces,
            ops,
            init_table,
            cache: [OnceCell::new(), OnceCell::new(), OnceCell::new()],
        }
    }

    /// The member table for `mode`, building and publishing it on first use.
    ///
    /// A failed build publishes nothing, so a later call retries.
    pub fn table(
        &self,
        mode: CompatMode,
        catalog: &CatalogAdapter,
    ) -> DispatchResult<Arc<MemberTable>> {
        let table = self.cache[mode as usize].get_or_try_init(|| {
            let mut builder = TableBuilder::new(catalog);
            // Init-supplied interfaces go first so their members win
            // duplicate resolution against the declared list.
            if let Some(init) = self.init_table {
                init(&mut builder, mode)?;
            }
            for &iface in self.ifaces {
                builder.add_interface(iface, &[])?;
            }
            Ok::<_, DispatchError>(Arc::new(builder.finish()))
        })?;
        Ok(table.clone())
    }
}

/// Lazily created mutable extras of an instance.
#[derive(Default)]
pub(crate) struct DynamicData {
    pub expando: ExpandoStore,
    /// Indexed by a member's wrapper index. Grown on demand.
    pub wrappers: Vec<WrapperEntry>,
}

/// State of one method-kind member on one instance.
pub(crate) struct WrapperEntry {
    /// The function object wrapping the member, created on first read.
    pub wrapper: Option<InstanceId>,
    /// Current value of the member slot. `Empty` means canonical: reads
    /// produce the wrapper, calls dispatch the builtin.
    pub bound: Value,
}

/// Identity of the builtin member a function object wraps.
pub(crate) struct FunctionData {
    /// Back-reference to the owning instance; not an owned reference, the
    /// owner clears it on teardown.
    pub target: Option<InstanceId>,
    pub member: Handle,
    pub iface: InterfaceId,
    pub name: String,
}

pub(crate) enum InstanceKind {
    Plain,
    Function(FunctionData),
}

/// One live object in the runtime arena.
pub struct Instance {
    pub(crate) desc: &'static TypeDesc,
    /// `None` until a deferred compatibility mode resolves.
    pub(crate) table: Option<Arc<MemberTable>>,
    pub(crate) mode: Option<CompatMode>,
    pub(crate) host: Box<dyn HostSlots>,
    pub(crate) dynamic: Option<Box<DynamicData>>,
    pub(crate) override_layer: Option<Box<dyn DispatchOverride>>,
    pub(crate) kind: InstanceKind,
    pub(crate) refcount: u32,
    pub(crate) last_release_fired: bool,
}

impl Instance {
    /// The type label, as used by stringification.
    pub fn type_name(&self) -> &'static str {
        self.desc.name
    }

    /// Resolved compatibility mode, if any.
    pub fn mode(&self) -> Option<CompatMode> {
        self.mode
    }

    /// Current reference count.
    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    pub(crate) fn dynamic_mut(&mut self) -> &mut DynamicData {
        self.dynamic.get_or_insert_with(Default::default)
    }

    /// Whether the instance can stand in for `iface`.
    pub fn supports_iface(&self, iface: InterfaceId) -> bool {
        self.desc.ifaces.contains(&iface) || self.desc.ops.supports_iface(iface)
    }
}
