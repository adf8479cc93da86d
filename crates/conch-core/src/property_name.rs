//! Canonical property keys

use std::hash::{Hash, Hasher};

use conch_gc::{GcHeader, GcPtr};

use crate::number::canonical_array_index;
use crate::string::JsString;
use crate::symbol::Symbol;
use crate::value::Value;

/// A canonical property key.
///
/// Array indices (`0..2^32-1`) are kept as integers. Strings are either
/// atomic (interned, compared by identity) or general (compared by
/// content). A string key never equals a symbol key.
#[derive(Clone, Copy)]
pub enum PropertyName {
    /// Canonical array index
    Index(u32),
    /// Interned string
    Atomic(GcPtr<JsString>),
    /// Non-interned string
    String(GcPtr<JsString>),
    /// Symbol
    Symbol(GcPtr<Symbol>),
}

impl PropertyName {
    /// Key for a string, recognizing canonical array indices
    pub fn from_string(s: GcPtr<JsString>) -> Self {
        if let Some(index) = canonical_array_index(s.as_str()) {
            return PropertyName::Index(index);
        }
        if s.is_atomic() {
            PropertyName::Atomic(s)
        } else {
            PropertyName::String(s)
        }
    }

    /// Key for a symbol
    pub fn from_symbol(s: GcPtr<Symbol>) -> Self {
        PropertyName::Symbol(s)
    }

    /// Key for an integer. `u32::MAX` is not an array index and must be
    /// passed through [`PropertyName::from_string`] by the caller.
    pub fn from_index(index: u32) -> Option<Self> {
        (index != u32::MAX).then_some(PropertyName::Index(index))
    }

    /// The array index, if this is one
    #[inline]
    pub fn as_index(&self) -> Option<u32> {
        match self {
            PropertyName::Index(i) => Some(*i),
            _ => None,
        }
    }

    /// The string, if this is a string key
    pub fn as_string(&self) -> Option<GcPtr<JsString>> {
        match self {
            PropertyName::Atomic(s) | PropertyName::String(s) => Some(*s),
            _ => None,
        }
    }

    /// The symbol, if this is a symbol key
    pub fn as_symbol(&self) -> Option<GcPtr<Symbol>> {
        match self {
            PropertyName::Symbol(s) => Some(*s),
            _ => None,
        }
    }

    /// Whether this is a symbol key
    #[inline]
    pub fn is_symbol(&self) -> bool {
        matches!(self, PropertyName::Symbol(_))
    }

    /// Whether this key names the given string
    pub fn matches_str(&self, name: &str) -> bool {
        match self {
            PropertyName::Atomic(s) | PropertyName::String(s) => s.as_str() == name,
            PropertyName::Index(i) => canonical_array_index(name) == Some(*i),
            PropertyName::Symbol(_) => false,
        }
    }

    /// The cell this key references, for tracing
    pub fn traced_pointer(&self) -> Option<*const GcHeader> {
        match self {
            PropertyName::Index(_) => None,
            PropertyName::Atomic(s) | PropertyName::String(s) => Some(s.as_header_ptr()),
            PropertyName::Symbol(s) => Some(s.as_header_ptr()),
        }
    }

    /// The key as a value; index keys need a string allocation, done by the
    /// caller through `make_string`.
    pub fn to_value(&self, make_string: impl FnOnce(&str) -> GcPtr<JsString>) -> Value {
        match self {
            PropertyName::Index(i) => {
                let mut buffer = itoa::Buffer::new();
                Value::string(make_string(buffer.format(*i)))
            }
            PropertyName::Atomic(s) | PropertyName::String(s) => Value::string(*s),
            PropertyName::Symbol(s) => Value::symbol(*s),
        }
    }

    /// Printable form, for messages
    pub fn describe(&self) -> String {
        match self {
            PropertyName::Index(i) => i.to_string(),
            PropertyName::Atomic(s) | PropertyName::String(s) => s.as_str().to_string(),
            PropertyName::Symbol(s) => s.descriptive_string(),
        }
    }
}

impl PartialEq for PropertyName {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PropertyName::Index(a), PropertyName::Index(b)) => a == b,
            (PropertyName::Atomic(a), PropertyName::Atomic(b)) => GcPtr::ptr_eq(a, b),
            (
                PropertyName::Atomic(a) | PropertyName::String(a),
                PropertyName::Atomic(b) | PropertyName::String(b),
            ) => a.as_str() == b.as_str(),
            (PropertyName::Symbol(a), PropertyName::Symbol(b)) => GcPtr::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for PropertyName {}

impl Hash for PropertyName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            PropertyName::Index(i) => {
                0u8.hash(state);
                i.hash(state);
            }
            PropertyName::Atomic(s) | PropertyName::String(s) => {
                1u8.hash(state);
                s.hash_value().hash(state);
            }
            PropertyName::Symbol(s) => {
                2u8.hash(state);
                s.addr().hash(state);
            }
        }
    }
}

impl std::fmt::Debug for PropertyName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyName::Index(i) => write!(f, "Index({i})"),
            PropertyName::Atomic(s) => write!(f, "Atomic({:?})", s.as_str()),
            PropertyName::String(s) => write!(f, "String({:?})", s.as_str()),
            PropertyName::Symbol(s) => write!(f, "{s:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::string::AtomicStringTable;
    use conch_gc::{HeapKind, MarkProcedure, heap};
    use rustc_hash::FxHashSet;

    fn register() {
        if !heap().is_kind_registered(HeapKind::String) {
            heap().register_kind(HeapKind::String, MarkProcedure::Leaf);
        }
        if !heap().is_kind_registered(HeapKind::Symbol) {
            heap().register_kind(
                HeapKind::Symbol,
                MarkProcedure::Descriptor(crate::symbol::SYMBOL_DESCRIPTOR),
            );
        }
    }

    #[test]
    fn test_index_recognition() {
        register();
        assert_eq!(PropertyName::from_string(JsString::new_gc("12")).as_index(), Some(12));
        assert_eq!(PropertyName::from_string(JsString::new_gc("012")).as_index(), None);
        assert_eq!(
            PropertyName::from_string(JsString::new_gc("4294967295")).as_index(),
            None
        );
        assert!(PropertyName::from_index(u32::MAX).is_none());
    }

    #[test]
    fn test_atomic_and_general_equality() {
        register();
        let mut table = AtomicStringTable::new();
        let atomic = PropertyName::from_string(table.intern("foo"));
        let general = PropertyName::from_string(JsString::new_gc("foo"));
        let other = PropertyName::from_string(JsString::new_gc("bar"));
        assert!(matches!(atomic, PropertyName::Atomic(_)));
        assert!(matches!(general, PropertyName::String(_)));
        assert_eq!(atomic, general);
        assert_ne!(general, other);

        let mut set = FxHashSet::default();
        set.insert(atomic);
        assert!(set.contains(&general));
    }

    #[test]
    fn test_symbol_never_equals_string() {
        register();
        let description = JsString::new_gc("foo");
        let symbol = PropertyName::from_symbol(Symbol::new_gc(Some(description)));
        let string = PropertyName::from_string(description);
        assert_ne!(symbol, string);
        assert_eq!(symbol, symbol);
        let twin = PropertyName::from_symbol(Symbol::new_gc(Some(description)));
        assert_ne!(symbol, twin);
    }
}
