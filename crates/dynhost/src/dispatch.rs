//! The dispatcher: name resolution, invocation, removal, and enumeration
//!
//! Resolution order for a name is fixed: the override layer when attached,
//! then the type's pre-lookup hook, then the builtin member table, then the
//! type's fallback hook, then expando entries, with creation of a new
//! expando entry last and only on request. Builtin members always shadow
//! expando entries; an ensure-mode lookup never creates an entry that
//! would be shadowed.
//!
//! Ownership convention: every `Value::Object` returned from `invoke` (and
//! the `get`/`call` shorthands) carries an owned reference the caller must
//! release. Values passed in as arguments are borrowed.

use crate::error::{DispatchError, DispatchResult};
use crate::expando::EXPANDO_HIDDEN;
use crate::handle::{CompatMode, Handle, HandleClass, InterfaceId, InvokeKind, LookupFlags, SlotOffset};
use crate::member::{MemberDescriptor, MemberTable};
use crate::object::{InstanceKind, WrapperEntry};
use crate::runtime::{InstanceId, Runtime};
use crate::value::{change_type, Value};
use std::sync::Arc;

impl Runtime {
    /// The instance's member table, resolving a deferred compatibility mode
    /// first if the type requested one.
    pub(crate) fn ensure_table(&mut self, id: InstanceId) -> DispatchResult<Arc<MemberTable>> {
        let inst = self.instance(id)?;
        if let Some(table) = &inst.table {
            return Ok(table.clone());
        }
        let desc = inst.desc;
        let mode = desc.ops.resolve_mode(self, id);
        let table = desc.table(mode, self.catalog())?;
        let inst = self.instance_mut(id)?;
        inst.mode = Some(mode);
        inst.table = Some(table.clone());
        Ok(table)
    }

    fn mode_of(&self, id: InstanceId) -> DispatchResult<CompatMode> {
        Ok(self.instance(id)?.mode.unwrap_or(CompatMode::Modern))
    }

    /// Resolve a member name to a handle.
    pub fn get_handle(
        &mut self,
        id: InstanceId,
        name: &str,
        flags: LookupFlags,
    ) -> DispatchResult<Handle> {
        let table = self.ensure_table(id)?;

        if let Some(layer) = self.instance_mut(id)?.override_layer.as_mut() {
            if let Some(handle) = layer.get_handle(name, flags) {
                return Ok(handle);
            }
        }

        let ops = self.instance(id)?.desc.ops;
        if let Some(res) = ops.lookup_handle(self, id, name, flags) {
            return res;
        }

        if let Some(member) = table.by_name(name, !flags.case_insensitive) {
            return Ok(member.handle);
        }

        if let Some(res) = ops.fallback_handle(self, id, name, flags) {
            return res;
        }

        // Implicit lookups resolve but never create.
        let ensure = flags.ensure && !flags.implicit;
        let expando = &mut self.instance_mut(id)?.dynamic_mut().expando;
        if let Some((idx, deleted)) = expando.find(name, flags.case_insensitive) {
            if !deleted {
                return Ok(Handle::expando(idx));
            }
            if ensure {
                expando.revive(idx);
                return Ok(Handle::expando(idx));
            }
            return Err(DispatchError::UnknownName(name.to_string()));
        }
        if ensure {
            let idx = expando.ensure(name, 0);
            return Ok(Handle::expando(idx));
        }
        Err(DispatchError::UnknownName(name.to_string()))
    }

    /// Create or overwrite an expando entry directly, bypassing builtin
    /// shadowing. Hidden entries resolve by name but never enumerate.
    pub fn define_expando(
        &mut self,
        id: InstanceId,
        name: &str,
        value: Value,
        hidden: bool,
    ) -> DispatchResult<Handle> {
        self.retain_value(&value);
        let expando = &mut self.instance_mut(id)?.dynamic_mut().expando;
        let idx = expando.ensure(name, if hidden { EXPANDO_HIDDEN } else { 0 });
        let old = expando.put(idx, value).unwrap_or(Value::Empty);
        self.release_value(&old);
        Ok(Handle::expando(idx))
    }

    /// Invoke a member by handle.
    pub fn invoke(
        &mut self,
        id: InstanceId,
        handle: Handle,
        kind: InvokeKind,
        args: &[Value],
    ) -> DispatchResult<Value> {
        self.ensure_table(id)?;

        if let Some(layer) = self.instance_mut(id)?.override_layer.as_mut() {
            if let Some(res) = layer.invoke(handle, kind, args) {
                return res;
            }
        }

        match handle.class() {
            HandleClass::Expando => self.invoke_expando(id, handle, kind, args),
            HandleClass::Custom => {
                let ops = self.instance(id)?.desc.ops;
                ops.invoke_custom(self, id, handle, kind, args)
            }
            HandleClass::Builtin => self.invoke_builtin(id, handle, kind, args),
        }
    }

    /// Read a member.
    pub fn get(&mut self, id: InstanceId, handle: Handle) -> DispatchResult<Value> {
        self.invoke(id, handle, InvokeKind::Get, &[])
    }

    /// Assign a member.
    pub fn put(&mut self, id: InstanceId, handle: Handle, value: Value) -> DispatchResult<()> {
        self.invoke(id, handle, InvokeKind::Put, std::slice::from_ref(&value))?;
        Ok(())
    }

    /// Call a member.
    pub fn call(
        &mut self,
        id: InstanceId,
        handle: Handle,
        args: &[Value],
    ) -> DispatchResult<Value> {
        self.invoke(id, handle, InvokeKind::Call, args)
    }

    /// Invoke an object as a value (its default member).
    pub fn invoke_value(
        &mut self,
        func: InstanceId,
        kind: InvokeKind,
        args: &[Value],
    ) -> DispatchResult<Value> {
        self.invoke(func, Handle::VALUE, kind, args)
    }

    fn invoke_expando(
        &mut self,
        id: InstanceId,
        handle: Handle,
        kind: InvokeKind,
        args: &[Value],
    ) -> DispatchResult<Value> {
        let idx = handle
            .expando_index()
            .ok_or(DispatchError::MemberNotFound(handle))?;
        let live = self
            .instance(id)?
            .dynamic
            .as_ref()
            .map(|d| d.expando.is_live(idx))
            .unwrap_or(false);
        match kind {
            InvokeKind::Get => {
                if !live {
                    return Err(DispatchError::MemberNotFound(handle));
                }
                let value = self
                    .instance(id)?
                    .dynamic
                    .as_ref()
                    .and_then(|d| d.expando.get(idx))
                    .map(|e| e.value.clone())
                    .ok_or(DispatchError::MemberNotFound(handle))?;
                self.retain_value(&value);
                Ok(value)
            }
            InvokeKind::Put => {
                // Put revives a tombstoned slot; the slot itself must exist.
                let exists = self
                    .instance(id)?
                    .dynamic
                    .as_ref()
                    .and_then(|d| d.expando.get(idx))
                    .is_some();
                if !exists {
                    return Err(DispatchError::MemberNotFound(handle));
                }
                let new = args
                    .first()
                    .cloned()
                    .ok_or(DispatchError::ArgCount { expected: 1, supplied: 0 })?;
                self.retain_value(&new);
                let expando = &mut self.instance_mut(id)?.dynamic_mut().expando;
                let old = expando.put(idx, new).unwrap_or(Value::Empty);
                self.release_value(&old);
                Ok(Value::Empty)
            }
            InvokeKind::Call | InvokeKind::CallOrGet => {
                if !live {
                    return Err(DispatchError::MemberNotFound(handle));
                }
                let stored = self
                    .instance(id)?
                    .dynamic
                    .as_ref()
                    .and_then(|d| d.expando.get(idx))
                    .map(|e| e.value.clone())
                    .ok_or(DispatchError::MemberNotFound(handle))?;
                match stored {
                    Value::Object(func) => self.call_stored_value(id, func, kind, args),
                    other if kind == InvokeKind::CallOrGet => {
                        self.retain_value(&other);
                        Ok(other)
                    }
                    _ => Err(DispatchError::NotCallable),
                }
            }
            InvokeKind::Construct => Err(DispatchError::Unsupported(kind)),
        }
    }

    fn invoke_builtin(
        &mut self,
        id: InstanceId,
        handle: Handle,
        kind: InvokeKind,
        args: &[Value],
    ) -> DispatchResult<Value> {
        let table = self.ensure_table(id)?;
        let Some(member) = table.by_handle(handle) else {
            if handle == Handle::VALUE {
                return self.invoke_default_value(id, kind, args);
            }
            return Err(DispatchError::MemberNotFound(handle));
        };

        if member.is_method() {
            return self.invoke_method_member(id, &table, member, kind, args);
        }

        if let Some(hook) = member.invoke_hook {
            if let Some(res) = hook(self, id, kind, args) {
                return res;
            }
        }
        match kind {
            InvokeKind::Get | InvokeKind::CallOrGet => self.get_builtin_prop(id, member),
            InvokeKind::Put => self.put_builtin_prop(id, member, args),
            InvokeKind::Call => self.call_builtin_prop(id, member, args),
            InvokeKind::Construct => Err(DispatchError::Unsupported(kind)),
        }
    }

    fn invoke_default_value(
        &mut self,
        id: InstanceId,
        kind: InvokeKind,
        args: &[Value],
    ) -> DispatchResult<Value> {
        let ops = self.instance(id)?.desc.ops;
        match ops.value(self, id, kind, args) {
            Err(DispatchError::Unsupported(_)) if kind == InvokeKind::Get => {
                Ok(Value::Str(self.to_label(id)?))
            }
            other => other,
        }
    }

    fn invoke_method_member(
        &mut self,
        id: InstanceId,
        table: &MemberTable,
        member: &MemberDescriptor,
        kind: InvokeKind,
        args: &[Value],
    ) -> DispatchResult<Value> {
        // is_method() guarantees a wrapper index.
        let widx = member.wrapper_idx.ok_or(DispatchError::NotCallable)?;
        let count = table.wrapper_count();
        match kind {
            InvokeKind::Get => {
                // A plain read of a method-kind default-value member
                // stringifies instead of producing the wrapper.
                if member.handle == Handle::VALUE {
                    return Ok(Value::Str(self.to_label(id)?));
                }
                let (bound, existing) = {
                    let entry = self.wrapper_entry_mut(id, widx, count)?;
                    (entry.bound.clone(), entry.wrapper)
                };
                if bound != Value::Empty {
                    self.retain_value(&bound);
                    return Ok(bound);
                }
                if let Some(wrapper) = existing {
                    let _ = self.add_ref(wrapper);
                    return Ok(Value::Object(wrapper));
                }
                let wrapper =
                    self.create_function(id, member.handle, member.iface, member.name.clone())?;
                self.wrapper_entry_mut(id, widx, count)?.wrapper = Some(wrapper);
                let _ = self.add_ref(wrapper);
                Ok(Value::Object(wrapper))
            }
            InvokeKind::Put => {
                let new = args
                    .first()
                    .cloned()
                    .ok_or(DispatchError::ArgCount { expected: 1, supplied: 0 })?;
                self.retain_value(&new);
                let entry = self.wrapper_entry_mut(id, widx, count)?;
                let old = std::mem::replace(&mut entry.bound, new);
                self.release_value(&old);
                Ok(Value::Empty)
            }
            InvokeKind::Call | InvokeKind::CallOrGet => {
                let (bound, wrapper) = {
                    let entry = self.wrapper_entry_mut(id, widx, count)?;
                    (entry.bound.clone(), entry.wrapper)
                };
                match bound {
                    Value::Empty => self.call_builtin_member(id, member, args),
                    // The canonical wrapper bound back over its own slot
                    // still calls the builtin directly.
                    Value::Object(func) if Some(func) == wrapper => {
                        self.call_builtin_member(id, member, args)
                    }
                    Value::Object(func) => {
                        self.call_stored_value(id, func, InvokeKind::Call, args)
                    }
                    _ => Err(DispatchError::NotCallable),
                }
            }
            InvokeKind::Construct => Err(DispatchError::Unsupported(kind)),
        }
    }

    fn wrapper_entry_mut(
        &mut self,
        id: InstanceId,
        widx: u32,
        total: u32,
    ) -> DispatchResult<&mut WrapperEntry> {
        let dynamic = self.instance_mut(id)?.dynamic_mut();
        if dynamic.wrappers.len() < total as usize {
            dynamic
                .wrappers
                .resize_with(total as usize, || WrapperEntry { wrapper: None, bound: Value::Empty });
        }
        Ok(&mut dynamic.wrappers[widx as usize])
    }

    fn get_builtin_prop(
        &mut self,
        id: InstanceId,
        member: &MemberDescriptor,
    ) -> DispatchResult<Value> {
        match member.get_slot {
            Some(slot) => self.call_host_slot(id, member.iface, slot, &[]),
            None => Err(DispatchError::Unsupported(InvokeKind::Get)),
        }
    }

    fn put_builtin_prop(
        &mut self,
        id: InstanceId,
        member: &MemberDescriptor,
        args: &[Value],
    ) -> DispatchResult<Value> {
        let Some(slot) = member.put_slot else {
            // Without a setter, newer modes swallow the write.
            return if self.mode_of(id)? >= CompatMode::Modern {
                Ok(Value::Empty)
            } else {
                Err(DispatchError::ReadOnly)
            };
        };
        let arg = args
            .first()
            .ok_or(DispatchError::ArgCount { expected: 1, supplied: 0 })?;
        let coerced = change_type(arg, member.prop_kind, self.converter())?;
        let out = self.call_host_slot(id, member.iface, slot, &[coerced])?;
        self.release_value(&out);
        Ok(Value::Empty)
    }

    /// Call a property-kind member: fetch its value and invoke that, or
    /// defer to generic invocation when the property has no typed get
    /// accessor.
    fn call_builtin_prop(
        &mut self,
        id: InstanceId,
        member: &MemberDescriptor,
        args: &[Value],
    ) -> DispatchResult<Value> {
        if member.get_slot.is_none() {
            return self.generic_invoke(id, member.iface, member.handle, InvokeKind::Call, args);
        }
        let fetched = self.get_builtin_prop(id, member)?;
        let Value::Object(func) = fetched else {
            return Err(DispatchError::NotCallable);
        };
        let result = self.call_stored_value(id, func, InvokeKind::Call, args);
        let _ = self.release(func);
        result
    }

    /// Invoke a stored callable on behalf of `id`, prepending `id` as the
    /// receiver argument. Function objects dispatch on their own owner and
    /// take the argument list unchanged.
    fn call_stored_value(
        &mut self,
        id: InstanceId,
        func: InstanceId,
        kind: InvokeKind,
        args: &[Value],
    ) -> DispatchResult<Value> {
        if matches!(self.instance(func)?.kind, InstanceKind::Function(_)) {
            return self.invoke_value(func, kind, args);
        }
        let mut call_args = Vec::with_capacity(args.len() + 1);
        call_args.push(Value::Object(id));
        call_args.extend_from_slice(args);
        self.invoke_value(func, kind, &call_args)
    }

    /// Call a method-kind member through the fast path, falling back to the
    /// catalog's generic invocation when the call shape is unsupported.
    pub(crate) fn call_builtin_member(
        &mut self,
        id: InstanceId,
        member: &MemberDescriptor,
        args: &[Value],
    ) -> DispatchResult<Value> {
        if let Some(hook) = member.invoke_hook {
            if let Some(res) = hook(self, id, InvokeKind::Call, args) {
                return res;
            }
        }

        let Some(kinds) = &member.arg_kinds else {
            return self.generic_invoke(id, member.iface, member.handle, InvokeKind::Call, args);
        };

        let argc = member.argc as usize;
        let mut call_args = Vec::with_capacity(argc);
        for (i, &declared) in kinds.iter().enumerate() {
            let value = match args.get(i) {
                Some(arg) => change_type(arg, declared, self.converter())?,
                // Missing trailing arguments take their declared defaults.
                None => member.arg_info[i].default.clone().ok_or(
                    DispatchError::ArgCount { expected: member.argc, supplied: args.len() },
                )?,
            };
            if let (Some(iface), Value::Object(obj)) = (member.arg_info[i].iface, &value) {
                if !self.instance(*obj)?.supports_iface(iface) {
                    return Err(DispatchError::InterfaceUnavailable(iface));
                }
            }
            call_args.push(value);
        }
        // Surplus arguments are ignored.
        let slot = member.call_slot.ok_or(DispatchError::NotCallable)?;
        self.call_host_slot(id, member.iface, slot, &call_args)
    }

    fn generic_invoke(
        &mut self,
        id: InstanceId,
        iface: InterfaceId,
        member: Handle,
        kind: InvokeKind,
        args: &[Value],
    ) -> DispatchResult<Value> {
        let provider = self.catalog().provider();
        let meta = self.catalog().resolve(iface)?;
        let inst = self.instance_mut(id)?;
        let value = provider.generic_invoke(meta, member, kind, &mut *inst.host, args)?;
        self.retain_value(&value);
        Ok(value)
    }

    fn call_host_slot(
        &mut self,
        id: InstanceId,
        iface: InterfaceId,
        slot: SlotOffset,
        args: &[Value],
    ) -> DispatchResult<Value> {
        let inst = self.instance_mut(id)?;
        let value = inst.host.call_slot(iface, slot, args)?;
        // Host results are borrowed; dispatch owns what it hands back.
        self.retain_value(&value);
        Ok(value)
    }

    /// Remove a member by handle. `Ok(true)` means state changed: an
    /// expando entry was tombstoned, or a method member was reset to its
    /// canonical wrapper.
    pub fn remove(&mut self, id: InstanceId, handle: Handle) -> DispatchResult<bool> {
        let table = self.ensure_table(id)?;

        if let Some(layer) = self.instance_mut(id)?.override_layer.as_mut() {
            if let Some(res) = layer.remove(handle) {
                return res;
            }
        }

        // Custom members delete through the type capability, regardless of
        // the compatibility mode.
        if handle.class() == HandleClass::Custom {
            let ops = self.instance(id)?.desc.ops;
            return ops.delete_custom(self, id, handle);
        }

        if self.mode_of(id)? < CompatMode::Legacy {
            return Err(DispatchError::RemovalUnsupported);
        }

        if let Some(idx) = handle.expando_index() {
            let expando = &mut self.instance_mut(id)?.dynamic_mut().expando;
            return match expando.remove(idx) {
                Some(old) => {
                    self.release_value(&old);
                    Ok(true)
                }
                None => Ok(false),
            };
        }

        let member = table
            .by_handle(handle)
            .ok_or(DispatchError::MemberNotFound(handle))?;
        if let Some(widx) = member.wrapper_idx {
            let (bound, wrapper) = {
                let entry = self.wrapper_entry_mut(id, widx, table.wrapper_count())?;
                if entry.bound == Value::Empty {
                    return Ok(false);
                }
                let old = std::mem::replace(&mut entry.bound, Value::Empty);
                (old, entry.wrapper)
            };
            // Rebinding the canonical wrapper over its own slot is not a
            // change; resetting it reports nothing removed.
            let canonical =
                matches!((&bound, wrapper), (&Value::Object(b), Some(w)) if b == w);
            self.release_value(&bound);
            return Ok(!canonical);
        }
        // Builtin properties reset through their setter, untyped.
        if let Some(slot) = member.put_slot {
            let out = self.call_host_slot(id, member.iface, slot, &[Value::Empty])?;
            self.release_value(&out);
            return Ok(true);
        }
        // Setterless: the name may still shadow an expando entry.
        self.clear_expando_shadow(id, &member.name)
    }

    /// Tombstone a live expando entry named after a builtin member, if any.
    fn clear_expando_shadow(&mut self, id: InstanceId, name: &str) -> DispatchResult<bool> {
        let expando = &mut self.instance_mut(id)?.dynamic_mut().expando;
        if let Some((idx, false)) = expando.find(name, false) {
            if let Some(old) = expando.remove(idx) {
                self.release_value(&old);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Remove a member by name.
    ///
    /// Unknown names degrade by mode: the oldest mode does not support
    /// removal at all, the middle mode reports the unknown name, and the
    /// newest mode reports nothing removed.
    pub fn remove_by_name(&mut self, id: InstanceId, name: &str) -> DispatchResult<bool> {
        self.ensure_table(id)?;

        if let Some(layer) = self.instance_mut(id)?.override_layer.as_mut() {
            if let Some(res) = layer.remove_by_name(name) {
                return res;
            }
        }

        match self.get_handle(id, name, LookupFlags::new()) {
            Ok(handle) => self.remove(id, handle),
            Err(DispatchError::UnknownName(_)) => match self.mode_of(id)? {
                CompatMode::Quirks => Err(DispatchError::RemovalUnsupported),
                CompatMode::Legacy => Err(DispatchError::UnknownName(name.to_string())),
                CompatMode::Modern => Ok(false),
            },
            Err(e) => Err(e),
        }
    }

    /// Ground-truth name of a member.
    pub fn member_name(&mut self, id: InstanceId, handle: Handle) -> DispatchResult<String> {
        let table = self.ensure_table(id)?;

        if let Some(layer) = self.instance_mut(id)?.override_layer.as_mut() {
            if let Some(name) = layer.member_name(handle) {
                return Ok(name);
            }
        }

        match handle.class() {
            HandleClass::Builtin => table
                .by_handle(handle)
                .map(|m| m.name.clone())
                .ok_or(DispatchError::MemberNotFound(handle)),
            HandleClass::Expando => {
                let idx = handle
                    .expando_index()
                    .ok_or(DispatchError::MemberNotFound(handle))?;
                self.instance(id)?
                    .dynamic
                    .as_ref()
                    .and_then(|d| d.expando.get(idx))
                    .map(|e| e.name.clone())
                    .ok_or(DispatchError::MemberNotFound(handle))
            }
            HandleClass::Custom => {
                let ops = self.instance(id)?.desc.ops;
                ops.custom_name(self, id, handle)
            }
        }
    }

    /// Next enumerable member after `after`, or the first when `after` is
    /// `None`. Walks builtin members in handle order, then type-defined
    /// custom members, then live expando entries in creation order.
    pub fn next_handle(
        &mut self,
        id: InstanceId,
        after: Option<Handle>,
    ) -> DispatchResult<Option<Handle>> {
        let table = self.ensure_table(id)?;
        let ops = self.instance(id)?.desc.ops;

        if after.is_none() {
            ops.populate(self, id);
        }

        if let Some(layer) = self.instance_mut(id)?.override_layer.as_mut() {
            if let Some(handle) = layer.next_handle(after) {
                return Ok(Some(handle));
            }
        }

        let phase = after.map(Handle::class);

        if matches!(phase, None | Some(HandleClass::Builtin)) {
            let builtin_after = after.filter(|h| h.class() == HandleClass::Builtin);
            if let Some(member) = table.next_enumerable(builtin_after) {
                return Ok(Some(member.handle));
            }
        }

        if matches!(phase, None | Some(HandleClass::Builtin) | Some(HandleClass::Custom)) {
            let custom_after = after.filter(|h| h.class() == HandleClass::Custom);
            if let Some(handle) = ops.next_custom(self, id, custom_after) {
                return Ok(Some(handle));
            }
        }

        let expando_after = after.and_then(Handle::expando_index);
        let next = self
            .instance(id)?
            .dynamic
            .as_ref()
            .and_then(|d| d.expando.next_live(expando_after));
        Ok(next.map(Handle::expando))
    }

    /// Stringification label of the instance.
    pub fn to_label(&self, id: InstanceId) -> DispatchResult<String> {
        let inst = self.instance(id)?;
        Ok(match inst.mode.unwrap_or(CompatMode::Modern) {
            CompatMode::Modern => format!("[object {}]", inst.type_name()),
            _ => "[object]".to_string(),
        })
    }
}
