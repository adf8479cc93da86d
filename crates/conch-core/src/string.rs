//! JavaScript strings and the atomic string table
//!
//! Strings are immutable GC cells. Strings that serve as property names are
//! made *atomic*: interned in the context's [`AtomicStringTable`], which
//! keeps them alive for the lifetime of the context, so two atomic strings
//! are equal exactly when they are the same cell.

use std::cell::Cell;
use std::hash::{Hash, Hasher};

use conch_gc::{GcHeader, GcPtr, HeapKind, heap};
use rustc_hash::{FxHashMap, FxHasher};

/// A JavaScript string cell
pub struct JsString {
    /// The actual string data
    data: Box<str>,
    /// Length in UTF-16 code units
    utf16_len: u32,
    /// Precomputed hash for fast lookup
    hash: u64,
    /// Interned in an atomic string table
    atomic: Cell<bool>,
}

impl JsString {
    /// Allocate a new, non-atomic string
    pub fn new_gc(s: &str) -> GcPtr<JsString> {
        heap().alloc(HeapKind::String, Self::from_str(s))
    }

    fn from_str(s: &str) -> Self {
        Self {
            data: Box::from(s),
            utf16_len: s.encode_utf16().count() as u32,
            hash: Self::compute_hash(s),
            atomic: Cell::new(false),
        }
    }

    /// Hash of the string contents
    pub fn compute_hash(s: &str) -> u64 {
        let mut hasher = FxHasher::default();
        s.hash(&mut hasher);
        hasher.finish()
    }

    /// Get the string contents
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.data
    }

    /// Length in UTF-16 code units (the JS `length`)
    #[inline]
    pub fn len(&self) -> u32 {
        self.utf16_len
    }

    /// Whether the string is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.utf16_len == 0
    }

    /// Precomputed content hash
    #[inline]
    pub fn hash_value(&self) -> u64 {
        self.hash
    }

    /// Whether this cell is interned
    #[inline]
    pub fn is_atomic(&self) -> bool {
        self.atomic.get()
    }

    /// The UTF-16 code unit at `index` as a one-unit string
    pub fn code_unit_string(&self, index: u32) -> Option<String> {
        let unit = self.data.encode_utf16().nth(index as usize)?;
        Some(String::from_utf16_lossy(&[unit]))
    }
}

impl std::fmt::Debug for JsString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", &*self.data)
    }
}

/// Intern table of atomic strings.
///
/// Every string in the table is a root; the table never shrinks.
#[derive(Default)]
pub struct AtomicStringTable {
    strings: FxHashMap<Box<str>, GcPtr<JsString>>,
}

impl AtomicStringTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic string with the given contents, allocating it on first use
    pub fn intern(&mut self, s: &str) -> GcPtr<JsString> {
        if let Some(existing) = self.strings.get(s) {
            return *existing;
        }
        let string = JsString::new_gc(s);
        string.atomic.set(true);
        self.strings.insert(Box::from(s), string);
        string
    }

    /// Atomic string equal to `string`, reusing the cell when no atomic
    /// string with these contents exists yet
    pub fn intern_string(&mut self, string: GcPtr<JsString>) -> GcPtr<JsString> {
        if string.is_atomic() {
            return string;
        }
        if let Some(existing) = self.strings.get(string.as_str()) {
            return *existing;
        }
        string.atomic.set(true);
        self.strings.insert(Box::from(string.as_str()), string);
        string
    }

    /// Atomic string with the given contents, if already interned
    pub fn get(&self, s: &str) -> Option<GcPtr<JsString>> {
        self.strings.get(s).copied()
    }

    /// Number of interned strings
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Headers of every interned string
    pub fn roots(&self) -> impl Iterator<Item = *const GcHeader> + '_ {
        self.strings.values().map(|s| s.as_header_ptr())
    }
}

impl std::fmt::Debug for AtomicStringTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicStringTable")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conch_gc::MarkProcedure;

    fn register_strings() {
        if !heap().is_kind_registered(HeapKind::String) {
            heap().register_kind(HeapKind::String, MarkProcedure::Leaf);
        }
    }

    #[test]
    fn test_utf16_length() {
        register_strings();
        assert_eq!(JsString::new_gc("abc").len(), 3);
        assert_eq!(JsString::new_gc("😀").len(), 2);
        assert!(JsString::new_gc("").is_empty());
    }

    #[test]
    fn test_code_unit_string() {
        register_strings();
        let s = JsString::new_gc("héllo");
        assert_eq!(s.code_unit_string(1).as_deref(), Some("é"));
        assert_eq!(s.code_unit_string(5), None);
    }

    #[test]
    fn test_intern_returns_same_cell() {
        register_strings();
        let mut table = AtomicStringTable::new();
        let a = table.intern("length");
        let b = table.intern("length");
        assert!(GcPtr::ptr_eq(&a, &b));
        assert!(a.is_atomic());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_intern_string_reuses_existing_atomic() {
        register_strings();
        let mut table = AtomicStringTable::new();
        let atomic = table.intern("name");
        let fresh = JsString::new_gc("name");
        assert!(!fresh.is_atomic());
        assert!(GcPtr::ptr_eq(&table.intern_string(fresh), &atomic));

        let other = JsString::new_gc("other");
        let interned = table.intern_string(other);
        assert!(GcPtr::ptr_eq(&interned, &other));
        assert!(other.is_atomic());
    }
}
