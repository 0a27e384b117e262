//! Instance arena and reference-count lifetime management
//!
//! The runtime owns every instance in a slotted arena. An `InstanceId` is
//! an index into the arena; object references in values count toward an
//! instance's reference count, and the id stays dead after teardown until
//! the slot is reused.

use std::sync::Arc;

use crate::catalog::{CatalogAdapter, MetadataCatalog};
use crate::error::{DispatchError, DispatchResult};
use crate::handle::CompatMode;
use crate::object::{DispatchOverride, HostSlots, Instance, InstanceKind, TypeDesc};
use crate::value::{Value, ValueConverter};

/// Arena index of a live (or dead) instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(pub(crate) u32);

/// Owner of all instances, the catalog adapter, and the conversion service.
pub struct Runtime {
    objects: Vec<Option<Instance>>,
    free: Vec<u32>,
    catalog: CatalogAdapter,
    converter: Option<Box<dyn ValueConverter + Send>>,
}

impl Runtime {
    pub fn new(provider: Arc<dyn MetadataCatalog>) -> Self {
        Runtime {
            objects: Vec::new(),
            free: Vec::new(),
            catalog: CatalogAdapter::new(provider),
            converter: None,
        }
    }

    /// Install the external conversion service consulted before built-in
    /// coercion rules.
    pub fn set_converter(&mut self, converter: Box<dyn ValueConverter + Send>) {
        self.converter = Some(converter);
    }

    pub(crate) fn converter(&self) -> Option<&dyn ValueConverter> {
        self.converter.as_deref().map(|c| c as &dyn ValueConverter)
    }

    pub fn catalog(&self) -> &CatalogAdapter {
        &self.catalog
    }

    /// Create an instance of `desc` with an initial reference count of one.
    ///
    /// Types that defer their compatibility mode ignore `mode` and resolve
    /// one on first dispatch; everyone else gets their member table now.
    pub fn create(
        &mut self,
        desc: &'static TypeDesc,
        mode: CompatMode,
        host: Box<dyn HostSlots>,
    ) -> DispatchResult<InstanceId> {
        let (table, mode) = if desc.ops.defers_mode() {
            (None, None)
        } else {
            (Some(desc.table(mode, &self.catalog)?), Some(mode))
        };
        Ok(self.alloc(Instance {
            desc,
            table,
            mode,
            host,
            dynamic: None,
            override_layer: None,
            kind: InstanceKind::Plain,
            refcount: 1,
            last_release_fired: false,
        }))
    }

    pub(crate) fn alloc(&mut self, instance: Instance) -> InstanceId {
        match self.free.pop() {
            Some(idx) => {
                self.objects[idx as usize] = Some(instance);
                InstanceId(idx)
            }
            None => {
                self.objects.push(Some(instance));
                InstanceId(self.objects.len() as u32 - 1)
            }
        }
    }

    /// Attach a shadowing dispatch layer. Replaces any previous layer.
    pub fn attach_override(
        &mut self,
        id: InstanceId,
        layer: Box<dyn DispatchOverride>,
    ) -> DispatchResult<()> {
        self.instance_mut(id)?.override_layer = Some(layer);
        Ok(())
    }

    pub fn instance(&self, id: InstanceId) -> DispatchResult<&Instance> {
        self.objects
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(DispatchError::DeadInstance(id))
    }

    pub(crate) fn instance_mut(&mut self, id: InstanceId) -> DispatchResult<&mut Instance> {
        self.objects
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(DispatchError::DeadInstance(id))
    }

    pub fn is_live(&self, id: InstanceId) -> bool {
        self.objects
            .get(id.0 as usize)
            .map(Option::is_some)
            .unwrap_or(false)
    }

    /// Number of live instances.
    pub fn live_instances(&self) -> usize {
        self.objects.iter().filter(|slot| slot.is_some()).count()
    }

    pub(crate) fn all_live(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.objects
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(idx, _)| InstanceId(idx as u32))
    }

    /// Take an owned reference to the instance.
    pub fn add_ref(&mut self, id: InstanceId) -> DispatchResult<u32> {
        let inst = self.instance_mut(id)?;
        inst.refcount += 1;
        Ok(inst.refcount)
    }

    /// Drop an owned reference. The first time the count reaches zero the
    /// type's last-release hook runs, with the instance kept alive for the
    /// duration; the hook may resurrect by taking a new reference.
    pub fn release(&mut self, id: InstanceId) -> DispatchResult<u32> {
        let inst = self.instance_mut(id)?;
        debug_assert!(inst.refcount > 0);
        inst.refcount -= 1;
        let remaining = inst.refcount;
        if remaining > 0 {
            return Ok(remaining);
        }

        if !inst.last_release_fired {
            inst.last_release_fired = true;
            inst.refcount = 1;
            let ops = inst.desc.ops;
            ops.last_release(self, id);
            let inst = self.instance_mut(id)?;
            inst.refcount -= 1;
            if inst.refcount > 0 {
                return Ok(inst.refcount);
            }
        }
        self.destroy(id);
        Ok(0)
    }

    /// Count an object value stored into caller- or runtime-managed storage.
    pub fn retain_value(&mut self, value: &Value) {
        if let Value::Object(id) = value {
            let _ = self.add_ref(*id);
        }
    }

    /// Drop the reference an owned object value held. Values returned by
    /// `invoke` carry such a reference.
    pub fn release_value(&mut self, value: &Value) {
        if let Value::Object(id) = value {
            let _ = self.release(*id);
        }
    }

    /// Tear the instance down and free its arena slot.
    pub(crate) fn destroy(&mut self, id: InstanceId) {
        let Ok(inst) = self.instance(id) else { return };
        let ops = inst.desc.ops;
        ops.unlink(self, id);

        let Some(mut inst) = self.objects.get_mut(id.0 as usize).and_then(Option::take) else {
            return;
        };
        self.free.push(id.0);

        if let Some(dynamic) = inst.dynamic.take() {
            for entry in dynamic.expando.entries() {
                self.release_value(&entry.value);
            }
            for entry in &dynamic.wrappers {
                if let Some(wrapper_id) = entry.wrapper {
                    if let Ok(wrapper) = self.instance_mut(wrapper_id) {
                        if let InstanceKind::Function(data) = &mut wrapper.kind {
                            data.target = None;
                        }
                    }
                    let _ = self.release(wrapper_id);
                }
                self.release_value(&entry.bound);
            }
        }

        if let Some(layer) = inst.override_layer.take() {
            let mut held = Vec::new();
            layer.traverse(&mut |edge| held.push(edge));
            for edge in held {
                let _ = self.release(edge);
            }
        }
    }
}
