//! Member handles, invocation kinds, and lookup flags
//!
//! A handle is a stable numeric identifier correlating a member name to a
//! builtin table entry, an expando slot, or a type-defined custom member.
//! The numeric space is partitioned into three ranges so the dispatcher can
//! classify a handle without consulting any table.

/// Identifier of a source interface in the external metadata catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterfaceId(pub u32);

/// Offset into a host object's per-interface call table.
pub type SlotOffset = u16;

/// Stable numeric member identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub i32);

const EXPANDO_BASE: i32 = 0x5000_0000;
const EXPANDO_MAX: i32 = 0x5fff_ffff;
const CUSTOM_BASE: i32 = 0x6000_0000;
const CUSTOM_MAX: i32 = 0x6fff_ffff;

/// Classification of a handle by reserved range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleClass {
    /// Declared in compiled interface metadata.
    Builtin,
    /// Per-instance expando slot.
    Expando,
    /// Type-defined custom member (e.g. function `apply`/`call`).
    Custom,
}

impl Handle {
    /// The default-value member of an object (the object itself as a value).
    pub const VALUE: Handle = Handle(0);

    /// Classify this handle by reserved range.
    pub fn class(self) -> HandleClass {
        match self.0 {
            EXPANDO_BASE..=EXPANDO_MAX => HandleClass::Expando,
            CUSTOM_BASE..=CUSTOM_MAX => HandleClass::Custom,
            _ => HandleClass::Builtin,
        }
    }

    /// Handle for the expando entry at `index`.
    pub fn expando(index: usize) -> Handle {
        debug_assert!(index <= (EXPANDO_MAX - EXPANDO_BASE) as usize);
        Handle(EXPANDO_BASE + index as i32)
    }

    /// Handle for the type-defined custom member at `index`.
    pub fn custom(index: u32) -> Handle {
        debug_assert!(index <= (CUSTOM_MAX - CUSTOM_BASE) as u32);
        Handle(CUSTOM_BASE + index as i32)
    }

    /// Expando slot index, if this is an expando handle.
    pub fn expando_index(self) -> Option<usize> {
        match self.class() {
            HandleClass::Expando => Some((self.0 - EXPANDO_BASE) as usize),
            _ => None,
        }
    }

    /// Custom member index, if this is a custom handle.
    pub fn custom_index(self) -> Option<u32> {
        match self.class() {
            HandleClass::Custom => Some((self.0 - CUSTOM_BASE) as u32),
            _ => None,
        }
    }
}

/// What a caller wants done with a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeKind {
    /// Read the member as a value.
    Get,
    /// Assign a value to the member.
    Put,
    /// Call the member with arguments.
    Call,
    /// Call, or read as a value when called with no arguments.
    CallOrGet,
    /// Use the member as a constructor.
    Construct,
}

/// Flags controlling name-to-handle resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LookupFlags {
    /// Compare names case-insensitively.
    pub case_insensitive: bool,
    /// Create an expando entry when the name resolves nowhere else.
    pub ensure: bool,
    /// The lookup is on behalf of an implicit language construct.
    pub implicit: bool,
}

impl LookupFlags {
    /// Case-sensitive, non-creating lookup.
    pub const fn new() -> Self {
        LookupFlags { case_insensitive: false, ensure: false, implicit: false }
    }

    /// Enable case-insensitive comparison.
    pub const fn caseless(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    /// Create a missing name as an expando entry.
    pub const fn ensure(mut self) -> Self {
        self.ensure = true;
        self
    }
}

/// Behavior variant selector for a type.
///
/// Ordered: later modes relax setter strictness and extend stringification
/// and member-removal support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CompatMode {
    /// Oldest behavior: no member removal, strict setters, bare labels.
    Quirks,
    /// Member removal supported; setters still strict.
    Legacy,
    /// Current behavior: lenient setters, labels carry the type name.
    Modern,
}

impl CompatMode {
    /// Number of modes, for per-mode cache sizing.
    pub const COUNT: usize = 3;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_classification() {
        assert_eq!(Handle(0).class(), HandleClass::Builtin);
        assert_eq!(Handle(1500).class(), HandleClass::Builtin);
        assert_eq!(Handle(-3).class(), HandleClass::Builtin);
        assert_eq!(Handle::expando(0).class(), HandleClass::Expando);
        assert_eq!(Handle::expando(17).expando_index(), Some(17));
        assert_eq!(Handle::custom(1).class(), HandleClass::Custom);
        assert_eq!(Handle::custom(1).custom_index(), Some(1));
        assert_eq!(Handle(1500).expando_index(), None);
    }

    #[test]
    fn test_compat_mode_ordering() {
        assert!(CompatMode::Quirks < CompatMode::Legacy);
        assert!(CompatMode::Legacy < CompatMode::Modern);
    }
}
