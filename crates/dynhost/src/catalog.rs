//! Metadata catalog boundary and caching adapter
//!
//! The catalog is the external provider of compiled interface metadata: it
//! resolves a stable interface id to an opaque handle, lists the member
//! descriptions behind that handle, and offers a generic invocation path
//! for members whose call shape the fast dispatcher does not support.
//! The adapter caches resolved handles so repeated resolution of the same
//! interface is idempotent and hits the catalog once.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::CatalogError;
use crate::handle::{Handle, InterfaceId, InvokeKind, SlotOffset};
use crate::object::HostSlots;
use crate::value::{ParamKind, Value};

/// Opaque handle to resolved type metadata inside the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeMetaHandle(pub u32);

/// One declared parameter of a compiled method.
#[derive(Debug, Clone)]
pub struct RawParam {
    pub kind: ParamKind,
    /// Required sub-interface for object-reference parameters.
    pub iface: Option<InterfaceId>,
    /// Declared default, filled in for trailing missing arguments.
    pub default: Option<Value>,
}

impl RawParam {
    pub fn plain(kind: ParamKind) -> Self {
        RawParam { kind, iface: None, default: None }
    }

    pub fn with_default(kind: ParamKind, default: Value) -> Self {
        RawParam { kind, iface: None, default: Some(default) }
    }

    pub fn object_of(iface: InterfaceId) -> Self {
        RawParam { kind: ParamKind::Object, iface: Some(iface), default: None }
    }
}

/// Shape of one member description as delivered by the catalog.
#[derive(Debug, Clone)]
pub enum RawMemberKind {
    Method {
        /// Offset of the compiled call target.
        slot: SlotOffset,
        params: Vec<RawParam>,
        ret: ParamKind,
        /// Count of optional trailing parameters; any forces the generic path.
        optional_params: u16,
    },
    Getter {
        slot: SlotOffset,
        ty: ParamKind,
    },
    Setter {
        slot: SlotOffset,
        ty: ParamKind,
    },
}

/// One member description as delivered by the catalog.
#[derive(Debug, Clone)]
pub struct RawMember {
    pub handle: Handle,
    pub name: String,
    pub kind: RawMemberKind,
    /// Internally restricted; skipped unless a hook names it explicitly.
    pub restricted: bool,
    /// Excluded from enumeration.
    pub hidden: bool,
}

impl RawMember {
    pub fn method(handle: Handle, name: &str, slot: SlotOffset, params: Vec<RawParam>, ret: ParamKind) -> Self {
        RawMember {
            handle,
            name: name.to_string(),
            kind: RawMemberKind::Method { slot, params, ret, optional_params: 0 },
            restricted: false,
            hidden: false,
        }
    }

    pub fn getter(handle: Handle, name: &str, slot: SlotOffset, ty: ParamKind) -> Self {
        RawMember {
            handle,
            name: name.to_string(),
            kind: RawMemberKind::Getter { slot, ty },
            restricted: false,
            hidden: false,
        }
    }

    pub fn setter(handle: Handle, name: &str, slot: SlotOffset, ty: ParamKind) -> Self {
        RawMember {
            handle,
            name: name.to_string(),
            kind: RawMemberKind::Setter { slot, ty },
            restricted: false,
            hidden: false,
        }
    }

    pub fn restricted(mut self) -> Self {
        self.restricted = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// The external metadata provider.
pub trait MetadataCatalog: Send + Sync {
    /// Resolve an interface id to type metadata. Must be idempotent.
    fn resolve_type(&self, iface: InterfaceId) -> Result<TypeMetaHandle, CatalogError>;

    /// Ordered member descriptions of a resolved type.
    fn members_of(&self, handle: TypeMetaHandle) -> Result<Vec<RawMember>, CatalogError>;

    /// Fallback invocation for members with unsupported call shapes.
    fn generic_invoke(
        &self,
        handle: TypeMetaHandle,
        member: Handle,
        kind: InvokeKind,
        host: &mut dyn HostSlots,
        args: &[Value],
    ) -> Result<Value, CatalogError>;
}

/// Caching adapter over a [`MetadataCatalog`].
///
/// Handle resolution is cached behind a concurrent map; the first resolver
/// wins and every later call returns the published handle.
pub struct CatalogAdapter {
    provider: Arc<dyn MetadataCatalog>,
    handles: DashMap<InterfaceId, TypeMetaHandle>,
}

impl CatalogAdapter {
    pub fn new(provider: Arc<dyn MetadataCatalog>) -> Self {
        CatalogAdapter { provider, handles: DashMap::new() }
    }

    /// The underlying provider, for calls that need a long-lived borrow.
    pub fn provider(&self) -> Arc<dyn MetadataCatalog> {
        self.provider.clone()
    }

    /// Resolve an interface, consulting the cache first.
    pub fn resolve(&self, iface: InterfaceId) -> Result<TypeMetaHandle, CatalogError> {
        if let Some(handle) = self.handles.get(&iface) {
            return Ok(*handle);
        }
        let handle = self.provider.resolve_type(iface)?;
        Ok(*self.handles.entry(iface).or_insert(handle))
    }

    /// Member descriptions of an interface.
    pub fn members_of(&self, iface: InterfaceId) -> Result<Vec<RawMember>, CatalogError> {
        let handle = self.resolve(iface)?;
        self.provider.members_of(handle)
    }
}

/// In-memory catalog for embedders that describe interfaces directly
/// rather than through an external metadata store. Interfaces can be
/// registered after the catalog is shared with a runtime.
#[derive(Default)]
pub struct MemoryCatalog {
    types: RwLock<Vec<(InterfaceId, Vec<RawMember>)>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an interface with its member descriptions.
    pub fn define(&self, iface: InterfaceId, members: Vec<RawMember>) {
        self.types.write().push((iface, members));
    }
}

impl MetadataCatalog for MemoryCatalog {
    fn resolve_type(&self, iface: InterfaceId) -> Result<TypeMetaHandle, CatalogError> {
        self.types
            .read()
            .iter()
            .position(|(id, _)| *id == iface)
            .map(|idx| TypeMetaHandle(idx as u32))
            .ok_or(CatalogError::UnknownInterface(iface))
    }

    fn members_of(&self, handle: TypeMetaHandle) -> Result<Vec<RawMember>, CatalogError> {
        self.types
            .read()
            .get(handle.0 as usize)
            .map(|(_, members)| members.clone())
            .ok_or(CatalogError::InvalidHandle)
    }

    fn generic_invoke(
        &self,
        handle: TypeMetaHandle,
        member: Handle,
        kind: InvokeKind,
        host: &mut dyn HostSlots,
        args: &[Value],
    ) -> Result<Value, CatalogError> {
        // Copy the description out so no lock is held across the host call.
        let (iface, raw) = {
            let types = self.types.read();
            let (iface, members) = types
                .get(handle.0 as usize)
                .ok_or(CatalogError::InvalidHandle)?;
            let raw = members
                .iter()
                .find(|m| m.handle == member)
                .cloned()
                .ok_or(CatalogError::UnknownMember(member))?;
            (*iface, raw)
        };

        let fail = |e: crate::error::SlotError| CatalogError::InvokeFailed(e.to_string());
        match (&raw.kind, kind) {
            (RawMemberKind::Method { slot, params, .. }, InvokeKind::Call | InvokeKind::CallOrGet) => {
                let argc = params.len().min(args.len());
                host.call_slot(iface, *slot, &args[..argc]).map_err(fail)
            }
            (RawMemberKind::Getter { slot, .. }, InvokeKind::Get) => {
                host.call_slot(iface, *slot, &[]).map_err(fail)
            }
            (RawMemberKind::Setter { slot, .. }, InvokeKind::Put) => {
                host.call_slot(iface, *slot, args).map_err(fail)
            }
            _ => Err(CatalogError::InvokeFailed(format!(
                "member {:?} does not support {:?}",
                member, kind
            ))),
        }
    }
}
