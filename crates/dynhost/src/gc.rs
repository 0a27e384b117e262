//! Cycle collection over the instance arena
//!
//! Reference counting alone leaks cycles through expando values, wrapper
//! bindings, and override layers. The collector counts, for every live
//! instance, how many of its references come from other live instances;
//! anything holding more references than that is externally rooted. A mark
//! pass from the roots then identifies unreachable garbage, which is torn
//! down through the normal destruction path.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::runtime::{InstanceId, Runtime};
use crate::value::Value;

/// Outcome of one collection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollectStats {
    /// Live instances examined.
    pub examined: usize,
    /// Instances found unreachable and torn down.
    pub collected: usize,
}

impl Runtime {
    /// Find and tear down instance cycles no external reference can reach.
    pub fn collect(&mut self) -> CollectStats {
        let live: Vec<InstanceId> = self.all_live().collect();

        let mut internal: FxHashMap<InstanceId, u32> = FxHashMap::default();
        for &id in &live {
            self.traverse_instance(id, &mut |edge| {
                *internal.entry(edge).or_default() += 1;
            });
        }

        let mut marked: FxHashSet<InstanceId> = FxHashSet::default();
        let mut worklist: Vec<InstanceId> = Vec::new();
        for &id in &live {
            let held = internal.get(&id).copied().unwrap_or(0);
            if self.instance(id).map(|inst| inst.refcount() > held).unwrap_or(false) {
                marked.insert(id);
                worklist.push(id);
            }
        }
        while let Some(id) = worklist.pop() {
            self.traverse_instance(id, &mut |edge| {
                if marked.insert(edge) {
                    worklist.push(edge);
                }
            });
        }

        let garbage: Vec<InstanceId> = live
            .iter()
            .copied()
            .filter(|id| !marked.contains(id))
            .collect();
        for &id in &garbage {
            // Idempotent: cascading releases may have freed it already.
            self.destroy(id);
        }

        CollectStats { examined: live.len(), collected: garbage.len() }
    }

    /// Report every owned instance-to-instance reference edge.
    pub(crate) fn traverse_instance(&self, id: InstanceId, visit: &mut dyn FnMut(InstanceId)) {
        let Ok(inst) = self.instance(id) else { return };
        if let Some(dynamic) = &inst.dynamic {
            for entry in dynamic.expando.entries() {
                if let Value::Object(edge) = &entry.value {
                    visit(*edge);
                }
            }
            for entry in &dynamic.wrappers {
                if let Some(wrapper) = entry.wrapper {
                    visit(wrapper);
                }
                if let Value::Object(edge) = &entry.bound {
                    visit(*edge);
                }
            }
        }
        if let Some(layer) = &inst.override_layer {
            layer.traverse(visit);
        }
        inst.desc.ops.traverse(self, id, visit);
    }
}
