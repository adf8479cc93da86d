//! Symbols

use conch_gc::{GcHeader, GcPtr, HeapKind, MarkDescriptor, heap, mark_descriptor};

use crate::string::JsString;

/// A JavaScript symbol cell
pub struct Symbol {
    /// `Symbol.prototype.description`
    description: Option<GcPtr<JsString>>,
}

/// Mark descriptor of [`Symbol`] cells: the description is the only pointer.
pub const SYMBOL_DESCRIPTOR: MarkDescriptor = mark_descriptor!(Symbol, description);

impl Symbol {
    /// Allocate a new unique symbol
    pub fn new_gc(description: Option<GcPtr<JsString>>) -> GcPtr<Symbol> {
        heap().alloc(HeapKind::Symbol, Symbol { description })
    }

    /// The symbol's description, if any
    pub fn description(&self) -> Option<GcPtr<JsString>> {
        self.description
    }

    /// `Symbol(description)` as shown by `String(symbol)`
    pub fn descriptive_string(&self) -> String {
        format!(
            "Symbol({})",
            self.description.as_ref().map_or("", |d| d.as_str())
        )
    }
}

impl std::fmt::Debug for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.descriptive_string())
    }
}

/// Well-known symbols used by the conversion algorithms
#[derive(Debug, Clone, Copy)]
pub struct WellKnownSymbols {
    /// `@@toPrimitive`
    pub to_primitive: GcPtr<Symbol>,
    /// `@@toStringTag`
    pub to_string_tag: GcPtr<Symbol>,
}

impl WellKnownSymbols {
    /// Allocate the well-known symbols
    pub fn new(describe: &mut dyn FnMut(&str) -> GcPtr<JsString>) -> Self {
        Self {
            to_primitive: Symbol::new_gc(Some(describe("Symbol.toPrimitive"))),
            to_string_tag: Symbol::new_gc(Some(describe("Symbol.toStringTag"))),
        }
    }

    /// Headers of every well-known symbol
    pub fn roots(&self) -> [*const GcHeader; 2] {
        [
            self.to_primitive.as_header_ptr(),
            self.to_string_tag.as_header_ptr(),
        ]
    }
}
