//! Per-instance expando property storage
//!
//! Expando entries live in an append-only vector; the vector index is the
//! stable part of the entry's handle, so deletion tombstones the slot
//! instead of compacting. Re-adding a deleted name revives the same slot
//! and therefore the same handle.

use crate::value::Value;

pub const EXPANDO_DELETED: u8 = 0x01;
/// Entry participates in lookup but not enumeration.
pub const EXPANDO_HIDDEN: u8 = 0x02;

pub(crate) struct ExpandoEntry {
    pub name: String,
    pub value: Value,
    pub flags: u8,
}

/// Ordered expando entries of one instance.
#[derive(Default)]
pub(crate) struct ExpandoStore {
    entries: Vec<ExpandoEntry>,
}

impl ExpandoStore {
    /// Find an entry by name. Returns its slot index and whether it is
    /// currently tombstoned.
    pub fn find(&self, name: &str, caseless: bool) -> Option<(usize, bool)> {
        self.entries.iter().position(|e| {
            if caseless {
                e.name.eq_ignore_ascii_case(name)
            } else {
                e.name == name
            }
        })
        .map(|idx| (idx, self.entries[idx].flags & EXPANDO_DELETED != 0))
    }

    /// Find or create a live entry for `name`, applying `flags` and
    /// reviving a tombstone in place.
    pub fn ensure(&mut self, name: &str, flags: u8) -> usize {
        if let Some((idx, deleted)) = self.find(name, false) {
            let entry = &mut self.entries[idx];
            entry.flags = flags;
            if deleted {
                entry.value = Value::Empty;
            }
            return idx;
        }
        if self.entries.is_empty() {
            self.entries.reserve(4);
        }
        self.entries.push(ExpandoEntry {
            name: name.to_string(),
            value: Value::Empty,
            flags,
        });
        self.entries.len() - 1
    }

    /// Un-tombstone a slot, resetting it to a live, visible, empty entry.
    pub fn revive(&mut self, idx: usize) {
        if let Some(entry) = self.entries.get_mut(idx) {
            entry.flags = 0;
            entry.value = Value::Empty;
        }
    }

    /// Store a value, reviving a tombstoned slot. Returns the old value so
    /// the caller can release any reference it held.
    pub fn put(&mut self, idx: usize, value: Value) -> Option<Value> {
        let entry = self.entries.get_mut(idx)?;
        entry.flags &= !EXPANDO_DELETED;
        Some(std::mem::replace(&mut entry.value, value))
    }

    pub fn get(&self, idx: usize) -> Option<&ExpandoEntry> {
        self.entries.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut ExpandoEntry> {
        self.entries.get_mut(idx)
    }

    /// Tombstone a slot. The stored value is handed back so the caller can
    /// release any object reference it held.
    pub fn remove(&mut self, idx: usize) -> Option<Value> {
        let entry = self.entries.get_mut(idx)?;
        if entry.flags & EXPANDO_DELETED != 0 {
            return None;
        }
        entry.flags |= EXPANDO_DELETED;
        Some(std::mem::take(&mut entry.value))
    }

    /// Whether the slot exists and is not tombstoned.
    pub fn is_live(&self, idx: usize) -> bool {
        self.entries
            .get(idx)
            .map(|e| e.flags & EXPANDO_DELETED == 0)
            .unwrap_or(false)
    }

    /// Next enumerable slot after `after` (or from the start), skipping
    /// tombstoned and hidden entries.
    pub fn next_live(&self, after: Option<usize>) -> Option<usize> {
        let start = after.map(|idx| idx + 1).unwrap_or(0);
        (start..self.entries.len())
            .find(|&idx| self.entries[idx].flags & (EXPANDO_DELETED | EXPANDO_HIDDEN) == 0)
    }

    /// All slots, tombstoned included. Used during instance teardown and
    /// cycle traversal.
    pub fn entries(&self) -> &[ExpandoEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [ExpandoEntry] {
        &mut self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revival_keeps_slot() {
        let mut store = ExpandoStore::default();
        let idx = store.ensure("x", 0);
        store.get_mut(idx).unwrap().value = Value::I32(1);
        assert_eq!(store.remove(idx), Some(Value::I32(1)));
        assert!(!store.is_live(idx));

        let again = store.ensure("x", 0);
        assert_eq!(again, idx);
        assert!(store.is_live(again));
        assert_eq!(store.get(again).unwrap().value, Value::Empty);
    }

    #[test]
    fn test_double_remove_is_noop() {
        let mut store = ExpandoStore::default();
        let idx = store.ensure("y", 0);
        assert_eq!(store.remove(idx), Some(Value::Empty));
        assert_eq!(store.remove(idx), None);
    }

    #[test]
    fn test_caseless_find() {
        let mut store = ExpandoStore::default();
        store.ensure("Alpha", 0);
        assert_eq!(store.find("alpha", true), Some((0, false)));
        assert_eq!(store.find("alpha", false), None);
    }

    #[test]
    fn test_enumeration_skips_dead_and_hidden() {
        let mut store = ExpandoStore::default();
        let a = store.ensure("a", 0);
        let b = store.ensure("b", EXPANDO_HIDDEN);
        let c = store.ensure("c", 0);
        store.remove(a);

        assert_eq!(store.next_live(None), Some(c));
        assert_eq!(store.next_live(Some(c)), None);
        let _ = b;
    }

    #[test]
    fn test_later_slots_stable_across_removal() {
        let mut store = ExpandoStore::default();
        let first = store.ensure("first", 0);
        let second = store.ensure("second", 0);
        store.get_mut(second).unwrap().value = Value::I32(2);

        store.remove(first);
        assert!(store.is_live(second));
        assert_eq!(store.get(second).unwrap().value, Value::I32(2));
        assert_eq!(store.find("second", false), Some((second, false)));
    }

    #[test]
    fn test_enumeration_ends_after_sole_removal() {
        let mut store = ExpandoStore::default();
        let idx = store.ensure("only", 0);
        assert_eq!(store.next_live(None), Some(idx));
        store.remove(idx);
        assert_eq!(store.next_live(None), None);
    }

    #[test]
    fn test_ensure_updates_flags_of_live_entry() {
        let mut store = ExpandoStore::default();
        let idx = store.ensure("x", 0);
        store.get_mut(idx).unwrap().value = Value::I32(3);

        let same = store.ensure("x", EXPANDO_HIDDEN);
        assert_eq!(same, idx);
        // The value survives; the entry drops out of enumeration.
        assert_eq!(store.get(idx).unwrap().value, Value::I32(3));
        assert_eq!(store.next_live(None), None);
    }

    #[test]
    fn test_empty_store_walk() {
        let store = ExpandoStore::default();
        assert_eq!(store.next_live(None), None);
        assert!(store.find("anything", true).is_none());
    }
}
