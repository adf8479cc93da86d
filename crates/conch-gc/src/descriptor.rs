//! Bit-per-word mark descriptors for fixed-layout cells.
//!
//! A descriptor records which words of a payload hold cell pointers. It is
//! built once from the field offsets of the payload type:
//!
//! ```text
//! struct Symbol { hash: u64, description: Option<GcPtr<JsString>> }
//!   word 0: hash         -> 0
//!   word 1: description  -> 1
//! ```
//!
//! A pointer word is either zero (`None`) or the address of a cell header.

use crate::object::GcHeader;

const WORD: usize = std::mem::size_of::<usize>();

/// Maximum payload size (in words) a descriptor can describe.
pub const MAX_DESCRIPTOR_WORDS: usize = 64;

/// Bitmap of pointer words in a fixed-layout payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkDescriptor {
    bitmap: u64,
    words: u8,
}

impl MarkDescriptor {
    /// Empty descriptor for a payload of `size` bytes.
    pub const fn for_size(size: usize) -> Self {
        let words = size.div_ceil(WORD);
        assert!(words <= MAX_DESCRIPTOR_WORDS, "payload too large for a mark descriptor");
        Self {
            bitmap: 0,
            words: words as u8,
        }
    }

    /// Mark the word at byte `offset` as a pointer word.
    pub const fn with_pointer_at(self, offset: usize) -> Self {
        assert!(offset % WORD == 0, "pointer field is not word aligned");
        let word = offset / WORD;
        assert!(word < self.words as usize, "pointer field outside the payload");
        Self {
            bitmap: self.bitmap | (1u64 << word),
            words: self.words,
        }
    }

    /// Payload length in words.
    #[inline]
    pub const fn word_len(&self) -> usize {
        self.words as usize
    }

    /// Whether word `index` holds a pointer.
    #[inline]
    pub const fn is_pointer_word(&self, index: usize) -> bool {
        index < 64 && self.bitmap & (1u64 << index) != 0
    }

    /// Number of pointer words.
    #[inline]
    pub const fn pointer_count(&self) -> u32 {
        self.bitmap.count_ones()
    }

    /// Report every non-null pointer word of `payload`.
    ///
    /// # Safety
    /// `payload` must point to a live payload of the type this descriptor was
    /// built for.
    pub unsafe fn trace(&self, payload: *const u8, tracer: &mut dyn FnMut(*const GcHeader)) {
        let mut bits = self.bitmap;
        while bits != 0 {
            let word = bits.trailing_zeros() as usize;
            bits &= bits - 1;
            // SAFETY: the bit was set from a field offset inside the payload
            let value = unsafe { (payload.add(word * WORD) as *const usize).read() };
            if value != 0 {
                tracer(value as *const GcHeader);
            }
        }
    }
}

/// Build a [`MarkDescriptor`] for a type from the names of its pointer fields.
///
/// ```ignore
/// const SYMBOL_DESCRIPTOR: MarkDescriptor = mark_descriptor!(Symbol, description);
/// ```
#[macro_export]
macro_rules! mark_descriptor {
    ($ty:ty $(, $field:ident)* $(,)?) => {
        $crate::MarkDescriptor::for_size(::std::mem::size_of::<$ty>())
            $(.with_pointer_at(::std::mem::offset_of!($ty, $field)))*
    };
}

#[cfg(test)]
mod tests {
    #[repr(C)]
    #[allow(dead_code)]
    struct Pair {
        count: u64,
        first: usize,
        flags: u64,
        second: usize,
    }

    #[test]
    fn test_descriptor_from_offsets() {
        let descriptor = crate::mark_descriptor!(Pair, first, second);
        assert_eq!(descriptor.word_len(), 4);
        assert!(!descriptor.is_pointer_word(0));
        assert!(descriptor.is_pointer_word(1));
        assert!(!descriptor.is_pointer_word(2));
        assert!(descriptor.is_pointer_word(3));
        assert_eq!(descriptor.pointer_count(), 2);
    }

    #[test]
    fn test_descriptor_skips_null_words() {
        let descriptor = crate::mark_descriptor!(Pair, first, second);
        let pair = Pair {
            count: 0xdead_beef,
            first: 0,
            flags: 0x1000,
            second: 0x4000,
        };
        let mut seen = Vec::new();
        unsafe {
            descriptor.trace(&pair as *const Pair as *const u8, &mut |ptr| {
                seen.push(ptr as usize)
            });
        }
        assert_eq!(seen, vec![0x4000]);
    }
}
