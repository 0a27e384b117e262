//! Member tables: merged, immutable per-type dispatch metadata
//!
//! A table merges the member descriptions of every source interface a type
//! exposes into one descriptor array, deduplicated by handle and name,
//! sorted by handle for handle lookup with a name-sorted index on top for
//! name lookup. Tables build at most once per (type, compatibility mode)
//! and are shared read-only across instances.

use std::cmp::Ordering;

use crate::catalog::{CatalogAdapter, RawMember, RawMemberKind};
use crate::error::{DispatchError, DispatchResult};
use crate::handle::{Handle, InterfaceId, InvokeKind, SlotOffset};
use crate::runtime::{InstanceId, Runtime};
use crate::value::{ParamKind, Value};

/// Hard cap on fast-path call arity; longer signatures use generic invocation.
pub const MAX_ARGS: usize = 16;

/// Per-member invocation hook.
///
/// Gets first refusal on dispatch for its member: return `Some(result)` to
/// fully handle the call, `None` to decline and let normal dispatch proceed.
pub type MemberHook =
    fn(&mut Runtime, InstanceId, InvokeKind, &[Value]) -> Option<DispatchResult<Value>>;

/// Build-time customization of a single member.
///
/// A spec with neither `rename` nor `invoke` excludes the member from the
/// table. A `rename` also readmits an internally-restricted member.
#[derive(Clone, Copy)]
pub struct HookSpec {
    pub handle: Handle,
    pub rename: Option<&'static str>,
    pub invoke: Option<MemberHook>,
}

impl HookSpec {
    pub const fn hook(handle: Handle, invoke: MemberHook) -> Self {
        HookSpec { handle, rename: None, invoke: Some(invoke) }
    }

    pub const fn rename(handle: Handle, name: &'static str) -> Self {
        HookSpec { handle, rename: Some(name), invoke: None }
    }

    pub const fn exclude(handle: Handle) -> Self {
        HookSpec { handle, rename: None, invoke: None }
    }
}

/// Extra metadata for one declared argument.
#[derive(Debug, Clone, Default)]
pub struct ArgInfo {
    /// Required sub-interface for object-reference arguments.
    pub iface: Option<InterfaceId>,
    /// Declared default value.
    pub default: Option<Value>,
}

/// One merged member of a type. Immutable after table construction.
pub struct MemberDescriptor {
    pub handle: Handle,
    /// Ground-truth name; lookup is case-insensitive unless demanded otherwise.
    pub name: String,
    /// Interface the member was first declared on.
    pub iface: InterfaceId,
    pub invoke_hook: Option<MemberHook>,
    pub call_slot: Option<SlotOffset>,
    pub get_slot: Option<SlotOffset>,
    pub put_slot: Option<SlotOffset>,
    /// Dense index into an instance's wrapper array; `Some` iff method-kind.
    pub wrapper_idx: Option<u32>,
    /// Excluded from enumeration.
    pub hidden: bool,
    pub argc: u16,
    pub default_count: u16,
    /// Property type, or method return kind.
    pub prop_kind: ParamKind,
    /// Declared argument kinds; `None` means the call shape is unsupported
    /// and dispatch goes through the catalog's generic path.
    pub arg_kinds: Option<Vec<ParamKind>>,
    pub arg_info: Vec<ArgInfo>,
}

impl MemberDescriptor {
    fn new(handle: Handle, name: String, iface: InterfaceId, hook: Option<MemberHook>) -> Self {
        MemberDescriptor {
            handle,
            name,
            iface,
            invoke_hook: hook,
            call_slot: None,
            get_slot: None,
            put_slot: None,
            wrapper_idx: None,
            hidden: false,
            argc: 0,
            default_count: 0,
            prop_kind: ParamKind::Variant,
            arg_kinds: None,
            arg_info: Vec::new(),
        }
    }

    /// Whether this member is method-kind.
    pub fn is_method(&self) -> bool {
        self.wrapper_idx.is_some()
    }
}

fn is_supported_arg(kind: ParamKind) -> bool {
    matches!(
        kind,
        ParamKind::Bool
            | ParamKind::I16
            | ParamKind::U16
            | ParamKind::I32
            | ParamKind::U32
            | ParamKind::F64
            | ParamKind::Str
            | ParamKind::Object
    )
}

fn is_supported_ret(kind: ParamKind) -> bool {
    kind == ParamKind::Void || is_supported_arg(kind)
}

fn caseless_cmp(a: &str, b: &str) -> Ordering {
    a.bytes()
        .map(|c| c.to_ascii_lowercase())
        .cmp(b.bytes().map(|c| c.to_ascii_lowercase()))
}

/// Merged member metadata for one (type, compatibility mode).
pub struct MemberTable {
    /// Descriptors sorted by handle.
    members: Vec<MemberDescriptor>,
    /// Positions into `members`, sorted case-insensitively by name with a
    /// case-sensitive tie-break for determinism.
    name_index: Vec<u32>,
    wrapper_count: u32,
}

impl MemberTable {
    /// Look a member up by handle (binary search).
    pub fn by_handle(&self, handle: Handle) -> Option<&MemberDescriptor> {
        self.members
            .binary_search_by(|m| m.handle.cmp(&handle))
            .ok()
            .map(|idx| &self.members[idx])
    }

    /// Next enumerable member in handle order, starting after `after`.
    pub(crate) fn next_enumerable(&self, after: Option<Handle>) -> Option<&MemberDescriptor> {
        let start = match after {
            None => 0,
            Some(h) => match self.members.binary_search_by(|m| m.handle.cmp(&h)) {
                Ok(pos) => pos + 1,
                Err(pos) => pos,
            },
        };
        self.members[start..].iter().find(|m| !m.hidden)
    }

    /// Look a member up by name.
    ///
    /// Comparison is case-insensitive; when `case_sensitive` the
    /// case-insensitive hit must also match exactly.
    pub fn by_name(&self, name: &str, case_sensitive: bool) -> Option<&MemberDescriptor> {
        let idx = self
            .name_index
            .binary_search_by(|&pos| caseless_cmp(&self.members[pos as usize].name, name))
            .ok()?;

        // Walk to the start of the caseless-equal run.
        let mut start = idx;
        while start > 0
            && caseless_cmp(&self.members[self.name_index[start - 1] as usize].name, name)
                == Ordering::Equal
        {
            start -= 1;
        }

        let mut run = self.name_index[start..]
            .iter()
            .map(|&pos| &self.members[pos as usize])
            .take_while(|m| caseless_cmp(&m.name, name) == Ordering::Equal);

        if case_sensitive {
            run.find(|m| m.name == name)
        } else {
            run.next()
        }
    }

    /// Descriptors in handle order.
    pub fn members(&self) -> &[MemberDescriptor] {
        &self.members
    }

    /// Number of method-kind members (sizes the per-instance wrapper array).
    pub fn wrapper_count(&self) -> u32 {
        self.wrapper_count
    }
}

/// Accumulates and merges interface member lists into a [`MemberTable`].
pub struct TableBuilder<'a> {
    catalog: &'a CatalogAdapter,
    members: Vec<MemberDescriptor>,
    wrapper_count: u32,
}

impl<'a> TableBuilder<'a> {
    pub fn new(catalog: &'a CatalogAdapter) -> Self {
        TableBuilder { catalog, members: Vec::new(), wrapper_count: 0 }
    }

    /// Merge every member of `iface` into the table, applying `hooks`.
    pub fn add_interface(&mut self, iface: InterfaceId, hooks: &[HookSpec]) -> DispatchResult<()> {
        let raw_members = self.catalog.members_of(iface).map_err(DispatchError::Catalog)?;
        for raw in &raw_members {
            let hook = hooks.iter().find(|h| h.handle == raw.handle);
            if let Some(hook) = hook {
                if hook.invoke.is_none() && hook.rename.is_none() {
                    continue; // excluded for this type/mode
                }
            }
            self.add_member(iface, raw, hook);
        }
        Ok(())
    }

    fn add_member(&mut self, iface: InterfaceId, raw: &RawMember, hook: Option<&HookSpec>) {
        let name = match hook.and_then(|h| h.rename) {
            Some(name) => name.to_string(),
            None if raw.restricted => return,
            None => raw.name.clone(),
        };

        let idx = match self
            .members
            .iter()
            .position(|m| m.handle == raw.handle || m.name == name)
        {
            Some(idx) if self.members[idx].iface != iface => return, // duplicated in another interface
            Some(idx) => idx,
            None => {
                self.members.push(MemberDescriptor::new(
                    raw.handle,
                    name,
                    iface,
                    hook.and_then(|h| h.invoke),
                ));
                self.members.len() - 1
            }
        };
        let member = &mut self.members[idx];

        match &raw.kind {
            RawMemberKind::Method { slot, params, ret, optional_params } => {
                member.wrapper_idx = Some(self.wrapper_count);
                self.wrapper_count += 1;
                member.argc = params.len() as u16;
                member.prop_kind = *ret;
                member.call_slot = Some(*slot);

                let mut supported = params.len() < MAX_ARGS
                    && *optional_params == 0
                    && is_supported_ret(*ret);
                let mut kinds = Vec::with_capacity(params.len());
                member.arg_info.clear();
                member.default_count = 0;
                for param in params {
                    if !is_supported_arg(param.kind) {
                        supported = false;
                    }
                    if param.default.is_some() {
                        member.default_count += 1;
                    }
                    kinds.push(param.kind);
                    member.arg_info.push(ArgInfo {
                        iface: param.iface,
                        default: param.default.clone(),
                    });
                }
                member.arg_kinds = supported.then_some(kinds);
            }
            RawMemberKind::Getter { slot, ty } => {
                member.get_slot = Some(*slot);
                member.prop_kind = *ty;
                member.hidden |= raw.hidden;
            }
            RawMemberKind::Setter { slot, ty } => {
                member.put_slot = Some(*slot);
                member.prop_kind = *ty;
                member.hidden |= raw.hidden;
            }
        }
    }

    /// Sort and publish the table. All-or-nothing: the table only becomes
    /// visible to instances through the type descriptor's cache slot.
    pub fn finish(mut self) -> MemberTable {
        self.members.sort_by(|a, b| a.handle.cmp(&b.handle));

        let mut name_index: Vec<u32> = (0..self.members.len() as u32).collect();
        name_index.sort_by(|&a, &b| {
            let (ma, mb) = (&self.members[a as usize], &self.members[b as usize]);
            caseless_cmp(&ma.name, &mb.name).then_with(|| ma.name.cmp(&mb.name))
        });

        MemberTable { members: self.members, name_index, wrapper_count: self.wrapper_count }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{MemoryCatalog, RawParam};
    use std::sync::Arc;

    const IFACE_A: InterfaceId = InterfaceId(1);
    const IFACE_B: InterfaceId = InterfaceId(2);

    fn adapter() -> CatalogAdapter {
        let cat = MemoryCatalog::new();
        cat.define(
            IFACE_A,
            vec![
                RawMember::getter(Handle(20), "width", 4, ParamKind::I32),
                RawMember::setter(Handle(20), "width", 5, ParamKind::I32),
                RawMember::method(
                    Handle(10),
                    "resize",
                    6,
                    vec![RawParam::plain(ParamKind::I32)],
                    ParamKind::Void,
                ),
                RawMember::getter(Handle(30), "secret", 7, ParamKind::Str).restricted(),
            ],
        );
        cat.define(
            IFACE_B,
            vec![
                // Same handle as IFACE_A's "width": duplicate, first wins.
                RawMember::getter(Handle(20), "breadth", 8, ParamKind::I32),
                RawMember::method(
                    Handle(40),
                    "merge",
                    9,
                    vec![RawParam::plain(ParamKind::Variant)],
                    ParamKind::Void,
                ),
            ],
        );
        CatalogAdapter::new(Arc::new(cat))
    }

    fn build(hooks: &[HookSpec]) -> MemberTable {
        let adapter = adapter();
        let mut builder = TableBuilder::new(&adapter);
        builder.add_interface(IFACE_A, hooks).unwrap();
        builder.add_interface(IFACE_B, &[]).unwrap();
        builder.finish()
    }

    #[test]
    fn test_get_put_union_same_interface() {
        let table = build(&[]);
        let width = table.by_handle(Handle(20)).unwrap();
        assert_eq!(width.name, "width");
        assert!(width.get_slot.is_some());
        assert!(width.put_slot.is_some());
        assert!(!width.is_method());
    }

    #[test]
    fn test_cross_interface_duplicate_discarded() {
        let table = build(&[]);
        // IFACE_B's handle-20 "breadth" lost to IFACE_A's "width".
        assert!(table.by_name("breadth", false).is_none());
        assert_eq!(table.by_handle(Handle(20)).unwrap().iface, IFACE_A);
    }

    #[test]
    fn test_restricted_skipped_without_rename() {
        let table = build(&[]);
        assert!(table.by_handle(Handle(30)).is_none());

        let table = build(&[HookSpec::rename(Handle(30), "secret")]);
        assert_eq!(table.by_handle(Handle(30)).unwrap().name, "secret");
    }

    #[test]
    fn test_exclusion_hook() {
        let table = build(&[HookSpec::exclude(Handle(10))]);
        assert!(table.by_handle(Handle(10)).is_none());
    }

    #[test]
    fn test_unsupported_shape_goes_generic() {
        let table = build(&[]);
        // Variant argument is outside the fast-call kind set.
        let merge = table.by_handle(Handle(40)).unwrap();
        assert!(merge.is_method());
        assert!(merge.arg_kinds.is_none());
        // Plain i32 argument stays on the fast path.
        let resize = table.by_handle(Handle(10)).unwrap();
        assert_eq!(resize.arg_kinds.as_deref(), Some(&[ParamKind::I32][..]));
    }

    #[test]
    fn test_name_lookup_case_rules() {
        let table = build(&[]);
        assert_eq!(table.by_name("WIDTH", false).map(|m| m.handle), Some(Handle(20)));
        assert!(table.by_name("WIDTH", true).is_none());
        assert_eq!(table.by_name("width", true).map(|m| m.handle), Some(Handle(20)));
        assert!(table.by_name("depth", false).is_none());
    }

    #[test]
    fn test_build_determinism() {
        let a = build(&[]);
        let b = build(&[]);
        let handles_a: Vec<Handle> = a.members().iter().map(|m| m.handle).collect();
        let handles_b: Vec<Handle> = b.members().iter().map(|m| m.handle).collect();
        assert_eq!(handles_a, handles_b);
        assert_eq!(a.name_index, b.name_index);
    }
}
