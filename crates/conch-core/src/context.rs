//! Per-thread runtime context
//!
//! The context owns everything that must outlive a single operation: the
//! atom table, the well-known symbols, the intrinsic prototypes, the shared
//! root structures, explicit roots, the job queue and the native frame
//! stack. It is also the only place that starts a collection, so every
//! root the collector needs is gathered here.
//!
//! The heap is thread-local, so one context may be live per thread.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use conch_gc::{GcHeader, GcPtr, HeapKind, MarkProcedure, heap, iterate_vector_buffer};
use tracing::{debug, warn};

use crate::array;
use crate::config::ContextConfig;
use crate::encoded_value::{EncodedSmallValue, EncodedValue};
use crate::error::{ErrorKind, StackFrame, VmError, VmResult};
use crate::finalization_registry;
use crate::function::{self, NativeFunction};
use crate::job::{Job, JobQueue, SandBox, SandBoxResult};
use crate::object::{self, ObjectData, ObjectRef, STRING_LENGTH};
use crate::property_descriptor::{ACCESSOR_PAIR_DESCRIPTOR, PropertyAttributes, StructurePropertyDescriptor};
use crate::property_name::PropertyName;
use crate::string::{AtomicStringTable, JsString};
use crate::structure::ObjectStructure;
use crate::symbol::{SYMBOL_DESCRIPTOR, Symbol, WellKnownSymbols};
use crate::value::{Value, is_object_kind};
use crate::weak_ref;

/// Native call depth at which calls start failing with a RangeError
const MAX_CALL_DEPTH: usize = 512;

thread_local! {
    static CONTEXT_ACTIVE: Cell<bool> = const { Cell::new(false) };
}

/// Register the mark procedure of every heap kind the core allocates.
/// Kinds registered by an earlier context on this thread are kept.
fn register_heap_kinds() {
    let heap = heap();
    let procedures = [
        (HeapKind::String, MarkProcedure::Leaf),
        (HeapKind::NumberBox, MarkProcedure::Leaf),
        (HeapKind::PointerFreeBuffer, MarkProcedure::Leaf),
        (HeapKind::Symbol, MarkProcedure::Descriptor(SYMBOL_DESCRIPTOR)),
        (HeapKind::AccessorPair, MarkProcedure::Descriptor(ACCESSOR_PAIR_DESCRIPTOR)),
        (HeapKind::Object, MarkProcedure::Callback(object::trace_object)),
        (HeapKind::ArrayObject, MarkProcedure::Callback(object::trace_object)),
        (HeapKind::FunctionObject, MarkProcedure::Callback(object::trace_object)),
        (HeapKind::WeakRefObject, MarkProcedure::Callback(object::trace_object)),
        (HeapKind::FinalizationRegistryObject, MarkProcedure::Callback(object::trace_object)),
        (HeapKind::ValueVector, MarkProcedure::Iterable(iterate_vector_buffer::<EncodedValue>)),
        (HeapKind::ArrayStorage, MarkProcedure::Iterable(iterate_vector_buffer::<EncodedSmallValue>)),
    ];
    for (kind, procedure) in procedures {
        if !heap.is_kind_registered(kind) {
            heap.register_kind(kind, procedure);
        }
    }
}

// ============================================================================
// Static strings and intrinsics
// ============================================================================

/// Atomic strings the core looks up by identity
#[derive(Debug)]
pub struct StaticStrings {
    /// `"length"`
    pub length: GcPtr<JsString>,
    /// `"prototype"`
    pub prototype: GcPtr<JsString>,
    /// `"constructor"`
    pub constructor: GcPtr<JsString>,
    /// `"name"`
    pub name: GcPtr<JsString>,
    /// `"message"`
    pub message: GcPtr<JsString>,
    /// `"valueOf"`
    pub value_of: GcPtr<JsString>,
    /// `"toString"`
    pub to_string: GcPtr<JsString>,
    /// `""`
    pub empty: GcPtr<JsString>,
}

impl StaticStrings {
    fn new(table: &mut AtomicStringTable) -> Self {
        Self {
            length: table.intern("length"),
            prototype: table.intern("prototype"),
            constructor: table.intern("constructor"),
            name: table.intern("name"),
            message: table.intern("message"),
            value_of: table.intern("valueOf"),
            to_string: table.intern("toString"),
            empty: table.intern(""),
        }
    }
}

/// The intrinsic prototype objects
#[derive(Debug, Clone, Copy)]
pub struct Intrinsics {
    /// `Object.prototype`
    pub object_prototype: ObjectRef,
    /// `Function.prototype`
    pub function_prototype: ObjectRef,
    /// `Array.prototype`
    pub array_prototype: ObjectRef,
    /// `Error.prototype`
    pub error_prototype: ObjectRef,
    /// `TypeError.prototype`
    pub type_error_prototype: ObjectRef,
    /// `RangeError.prototype`
    pub range_error_prototype: ObjectRef,
    /// `String.prototype`
    pub string_prototype: ObjectRef,
    /// `Number.prototype`
    pub number_prototype: ObjectRef,
    /// `Boolean.prototype`
    pub boolean_prototype: ObjectRef,
    /// `Symbol.prototype`
    pub symbol_prototype: ObjectRef,
    /// `WeakRef.prototype`
    pub weak_ref_prototype: ObjectRef,
    /// `FinalizationRegistry.prototype`
    pub finalization_registry_prototype: ObjectRef,
}

impl Intrinsics {
    fn all(&self) -> [ObjectRef; 12] {
        [
            self.object_prototype,
            self.function_prototype,
            self.array_prototype,
            self.error_prototype,
            self.type_error_prototype,
            self.range_error_prototype,
            self.string_prototype,
            self.number_prototype,
            self.boolean_prototype,
            self.symbol_prototype,
            self.weak_ref_prototype,
            self.finalization_registry_prototype,
        ]
    }

    /// Headers of every intrinsic
    pub fn roots(&self) -> impl Iterator<Item = *const GcHeader> {
        self.all().into_iter().map(|object| object.header_ptr())
    }
}

/// Shared structures every new object of a class starts from
struct RootStructures {
    ordinary: Rc<ObjectStructure>,
    array: Rc<ObjectStructure>,
    string_wrapper: Rc<ObjectStructure>,
}

impl RootStructures {
    fn new(names: &StaticStrings) -> Self {
        let ordinary = ObjectStructure::root();
        let array = array::initial_structure(&ordinary, names);
        let mut string_wrapper = Rc::clone(&ordinary);
        ObjectStructure::add_property(
            &mut string_wrapper,
            PropertyName::Atomic(names.length),
            StructurePropertyDescriptor::native(&STRING_LENGTH),
        );
        Self {
            ordinary,
            array,
            string_wrapper,
        }
    }
}

fn function_prototype_call(_: &mut Context, _: Value, _: &[Value]) -> VmResult<Value> {
    Ok(Value::undefined())
}

/// Allocate the intrinsic prototypes. Their methods are installed once the
/// context exists.
fn alloc_intrinsics(structures: &RootStructures, empty: GcPtr<JsString>) -> Intrinsics {
    let ordinary = |prototype: Option<ObjectRef>| {
        ObjectRef::alloc(Rc::clone(&structures.ordinary), prototype, ObjectData::Ordinary)
    };
    let wrapper = |prototype: ObjectRef, value: Value| {
        ObjectRef::alloc(Rc::clone(&structures.ordinary), Some(prototype), ObjectData::PrimitiveWrapper(value))
    };

    let object_prototype = ordinary(None);
    let function_prototype = ObjectRef::alloc(
        Rc::clone(&structures.ordinary),
        Some(object_prototype),
        ObjectData::Function(NativeFunction {
            name: String::new(),
            length: 0,
            func: Rc::new(function_prototype_call),
        }),
    );
    let array_prototype = array::alloc_prototype_array(Rc::clone(&structures.array), object_prototype);
    let error_prototype = ordinary(Some(object_prototype));
    let string_prototype = ObjectRef::alloc(
        Rc::clone(&structures.string_wrapper),
        Some(object_prototype),
        ObjectData::PrimitiveWrapper(Value::string(empty)),
    );
    string_prototype.borrow_mut().values.push(EncodedValue::EMPTY);

    let intrinsics = Intrinsics {
        object_prototype,
        function_prototype,
        array_prototype,
        error_prototype,
        type_error_prototype: ordinary(Some(error_prototype)),
        range_error_prototype: ordinary(Some(error_prototype)),
        string_prototype,
        number_prototype: wrapper(object_prototype, Value::int32(0)),
        boolean_prototype: wrapper(object_prototype, Value::boolean(false)),
        symbol_prototype: ordinary(Some(object_prototype)),
        weak_ref_prototype: ordinary(Some(object_prototype)),
        finalization_registry_prototype: ordinary(Some(object_prototype)),
    };
    for object in intrinsics.all() {
        object.borrow_mut().is_prototype = true;
    }
    intrinsics
}

// ============================================================================
// Explicit roots
// ============================================================================

#[derive(Default)]
struct RootSlots {
    values: Vec<Value>,
    free: Vec<usize>,
}

/// Keeps a value alive across collections until dropped
pub struct Rooted {
    slots: Rc<RefCell<RootSlots>>,
    index: usize,
}

impl Rooted {
    /// The rooted value
    pub fn get(&self) -> Value {
        self.slots.borrow().values[self.index]
    }
}

impl Drop for Rooted {
    fn drop(&mut self) {
        let mut slots = self.slots.borrow_mut();
        slots.values[self.index] = Value::undefined();
        slots.free.push(self.index);
    }
}

impl std::fmt::Debug for Rooted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Rooted").field(&self.get()).finish()
    }
}

// ============================================================================
// Context
// ============================================================================

/// Runtime context: the roots and shared state of one thread's heap
pub struct Context {
    config: ContextConfig,
    strings: AtomicStringTable,
    names: StaticStrings,
    symbols: WellKnownSymbols,
    intrinsics: Intrinsics,
    structures: RootStructures,
    /// Set once any prototype object gains an index property
    prototype_has_index: bool,
    roots: Rc<RefCell<RootSlots>>,
    jobs: JobQueue,
    /// Targets kept alive until the next job queue drain
    kept_objects: Vec<Value>,
    frames: Vec<StackFrame>,
}

impl Context {
    /// Create a context with the default configuration
    pub fn new() -> Self {
        Self::with_config(ContextConfig::default())
    }

    /// Create a context.
    ///
    /// # Panics
    /// Panics if another context is live on this thread.
    pub fn with_config(config: ContextConfig) -> Self {
        CONTEXT_ACTIVE.with(|active| {
            assert!(!active.replace(true), "only one Context may be live per thread");
        });
        heap().configure(config.gc.clone());
        register_heap_kinds();

        let mut strings = AtomicStringTable::new();
        let names = StaticStrings::new(&mut strings);
        let symbols = WellKnownSymbols::new(&mut |description: &str| strings.intern(description));
        let structures = RootStructures::new(&names);
        let intrinsics = alloc_intrinsics(&structures, names.empty);

        let mut ctx = Self {
            config,
            strings,
            names,
            symbols,
            intrinsics,
            structures,
            prototype_has_index: false,
            roots: Rc::default(),
            jobs: JobQueue::new(),
            kept_objects: Vec::new(),
            frames: Vec::new(),
        };
        if let Err(error) = function::install_builtins(&mut ctx) {
            panic!("failed to install builtins: {error}");
        }
        debug!(target: "conch::core", atoms = ctx.strings.len(), "context ready");
        ctx
    }

    /// Active configuration
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// The intrinsic prototypes
    pub fn intrinsics(&self) -> Intrinsics {
        self.intrinsics
    }

    /// The well-known symbols
    pub fn symbols(&self) -> WellKnownSymbols {
        self.symbols
    }

    /// Atomic strings the core looks up by identity
    pub fn names(&self) -> &StaticStrings {
        &self.names
    }

    /// Structure new arrays start with
    pub fn array_structure(&self) -> Rc<ObjectStructure> {
        Rc::clone(&self.structures.array)
    }

    /// Whether any prototype object has ever had an index property. New
    /// arrays start in general mode once this is set.
    pub fn some_prototype_has_index_property(&self) -> bool {
        self.prototype_has_index
    }

    // ---------------------------------------------------------------
    // Strings and property names
    // ---------------------------------------------------------------

    /// Atomic string with the given contents
    pub fn intern(&mut self, s: &str) -> GcPtr<JsString> {
        self.strings.intern(s)
    }

    /// Fresh non-atomic string
    pub fn new_string(&mut self, s: &str) -> GcPtr<JsString> {
        JsString::new_gc(s)
    }

    /// Property key for a Rust string
    pub fn name(&mut self, s: &str) -> PropertyName {
        PropertyName::from_string(self.intern(s))
    }

    /// The form a key is stored under in a structure: string keys become
    /// atomic.
    pub fn canonical_name(&mut self, name: PropertyName) -> PropertyName {
        match name {
            PropertyName::String(s) => PropertyName::Atomic(self.strings.intern_string(s)),
            other => other,
        }
    }

    /// Key for an integer index, which may lie past the array index range
    pub fn index_key(&mut self, index: u64) -> PropertyName {
        match u32::try_from(index).ok().and_then(PropertyName::from_index) {
            Some(key) => key,
            None => {
                let mut buffer = itoa::Buffer::new();
                self.name(buffer.format(index))
            }
        }
    }

    // ---------------------------------------------------------------
    // Allocation
    // ---------------------------------------------------------------

    /// Allocate an object with the empty root structure
    pub fn new_object(&mut self, prototype: Option<ObjectRef>, data: ObjectData) -> ObjectRef {
        let structure = Rc::clone(&self.structures.ordinary);
        self.new_object_with_structure(structure, prototype, data)
    }

    /// Allocate an object starting from `structure`. The caller pushes one
    /// value slot per property the structure already names.
    pub fn new_object_with_structure(
        &mut self,
        structure: Rc<ObjectStructure>,
        prototype: Option<ObjectRef>,
        data: ObjectData,
    ) -> ObjectRef {
        let object = ObjectRef::alloc(structure, prototype, data);
        if let Some(prototype) = prototype {
            self.mark_as_prototype(prototype);
        }
        object
    }

    /// `{}`
    pub fn new_plain_object(&mut self) -> ObjectRef {
        let prototype = self.intrinsics.object_prototype;
        self.new_object(Some(prototype), ObjectData::Ordinary)
    }

    /// `new Array(length)`: an array of holes
    pub fn new_array(&mut self, length: u32) -> ObjectRef {
        array::alloc_array(self, length, false)
    }

    /// Array literal holding `values`
    pub fn new_array_from(&mut self, values: &[Value]) -> VmResult<ObjectRef> {
        let object = array::alloc_array(self, 0, false);
        for value in values {
            array::push(self, object, *value)?;
        }
        Ok(object)
    }

    /// Spread-argument array: null prototype, never affected by prototype
    /// index properties
    pub fn new_spread_array(&mut self, values: &[Value]) -> VmResult<ObjectRef> {
        let object = array::alloc_array(self, 0, true);
        for value in values {
            array::push(self, object, *value)?;
        }
        Ok(object)
    }

    /// Function object backed by a Rust closure
    pub fn new_function(
        &mut self,
        name: &str,
        length: u32,
        func: impl Fn(&mut Context, Value, &[Value]) -> VmResult<Value> + 'static,
    ) -> VmResult<ObjectRef> {
        let prototype = self.intrinsics.function_prototype;
        let function = self.new_object(
            Some(prototype),
            ObjectData::Function(NativeFunction {
                name: name.to_string(),
                length,
                func: Rc::new(func),
            }),
        );
        function::init_function_properties(self, function, name, length)?;
        Ok(function)
    }

    /// Error instance of `kind` with an own `message`
    pub fn new_error(&mut self, kind: ErrorKind, message: &str) -> ObjectRef {
        let prototype = match kind {
            ErrorKind::TypeError => self.intrinsics.type_error_prototype,
            ErrorKind::RangeError => self.intrinsics.range_error_prototype,
            ErrorKind::Other => self.intrinsics.error_prototype,
        };
        let error = self.new_object(Some(prototype), ObjectData::Error);
        let message = Value::string(self.new_string(message));
        error.borrow_mut().push_property(
            PropertyName::Atomic(self.names.message),
            StructurePropertyDescriptor::data(PropertyAttributes::builtin_method()),
            EncodedValue::new(message),
        );
        error
    }

    /// Fresh symbol
    pub fn new_symbol(&mut self, description: Option<&str>) -> GcPtr<Symbol> {
        let description = description.map(|d| self.new_string(d));
        Symbol::new_gc(description)
    }

    /// `new WeakRef(target)`
    pub fn new_weak_ref(&mut self, target: Value) -> VmResult<ObjectRef> {
        weak_ref::create(self, target)
    }

    /// `new FinalizationRegistry(cleanup)`
    pub fn new_finalization_registry(&mut self, cleanup: Value) -> VmResult<ObjectRef> {
        finalization_registry::create(self, cleanup)
    }

    /// Wrapper object for a primitive
    pub(crate) fn wrap_primitive(&mut self, value: Value) -> ObjectRef {
        let intrinsics = self.intrinsics;
        if value.is_string() {
            let structure = Rc::clone(&self.structures.string_wrapper);
            let object = self.new_object_with_structure(
                structure,
                Some(intrinsics.string_prototype),
                ObjectData::PrimitiveWrapper(value),
            );
            object.borrow_mut().values.push(EncodedValue::EMPTY);
            return object;
        }
        let prototype = if value.is_boolean() {
            intrinsics.boolean_prototype
        } else if value.is_symbol() {
            intrinsics.symbol_prototype
        } else {
            intrinsics.number_prototype
        };
        self.new_object(Some(prototype), ObjectData::PrimitiveWrapper(value))
    }

    // ---------------------------------------------------------------
    // Prototype tracking
    // ---------------------------------------------------------------

    /// Record that `object` is used as a prototype
    pub fn mark_as_prototype(&mut self, object: ObjectRef) {
        if object.is_prototype_object() {
            return;
        }
        object.borrow_mut().is_prototype = true;
        if object.own_property_keys().iter().any(|key| key.as_index().is_some()) {
            self.note_prototype_index_property();
        }
    }

    /// A prototype object gained an index property: fast-mode holes would
    /// now hide inherited elements, so every non-spread array leaves fast
    /// mode and new arrays start in general mode.
    pub fn note_prototype_index_property(&mut self) {
        if self.prototype_has_index {
            return;
        }
        self.prototype_has_index = true;
        let mut arrays = Vec::new();
        heap().for_each_cell(HeapKind::ArrayObject, &mut |header| arrays.push(header));
        debug!(
            target: "conch::core",
            arrays = arrays.len(),
            "prototype index property: leaving fast mode"
        );
        for header in arrays {
            // SAFETY: cells of the array kind are array objects
            let object = unsafe { ObjectRef::from_header(header) };
            let spread = object.borrow().as_array().is_some_and(|a| a.is_spread());
            if !spread {
                array::convert_into_non_fast_mode(object, "prototype has index property");
            }
        }
    }

    // ---------------------------------------------------------------
    // Roots and collection
    // ---------------------------------------------------------------

    /// Keep `value` alive until the guard is dropped
    pub fn root(&mut self, value: Value) -> Rooted {
        let mut slots = self.roots.borrow_mut();
        let index = match slots.free.pop() {
            Some(index) => {
                slots.values[index] = value;
                index
            }
            None => {
                slots.values.push(value);
                slots.values.len() - 1
            }
        };
        drop(slots);
        Rooted {
            slots: Rc::clone(&self.roots),
            index,
        }
    }

    fn gather_roots(&self) -> Vec<*const GcHeader> {
        let mut roots: Vec<*const GcHeader> = self.strings.roots().collect();
        roots.extend(self.symbols.roots());
        roots.extend(self.intrinsics.roots());
        roots.extend(self.roots.borrow().values.iter().filter_map(Value::as_header));
        roots.extend(self.kept_objects.iter().filter_map(Value::as_header));
        self.jobs.trace(&mut roots);
        roots
    }

    /// Run a full collection and queue cleanup for every finalizer that
    /// fired. Returns the number of bytes reclaimed.
    ///
    /// Values held only in Rust locals must be [rooted](Context::root)
    /// across this call.
    pub fn collect_garbage(&mut self) -> usize {
        let roots = self.gather_roots();
        let reclaimed = heap().collect(&roots);
        self.dispatch_fired_finalizers();
        reclaimed
    }

    /// Collect if the heap has grown past its threshold. Returns whether a
    /// collection ran.
    pub fn safepoint(&mut self) -> bool {
        if !heap().should_collect() {
            return false;
        }
        self.collect_garbage();
        true
    }

    fn dispatch_fired_finalizers(&mut self) {
        for fired in heap().take_fired_finalizers() {
            finalization_registry::dispatch_fired(self, fired);
        }
    }

    /// Collect, then visit every live object of `kind`. Returns the number
    /// of objects visited; 0 for kinds that are not objects.
    pub fn iterate_objects_of_kind(&mut self, kind: HeapKind, mut f: impl FnMut(ObjectRef)) -> usize {
        if !is_object_kind(kind) {
            return 0;
        }
        let roots = self.gather_roots();
        let count = heap().iterate_kind(kind, &roots, &mut |header| {
            // SAFETY: cells of an object kind are objects
            f(unsafe { ObjectRef::from_header(header) })
        });
        self.dispatch_fired_finalizers();
        count
    }

    /// Collect, then visit every live array
    pub fn iterate_arrays(&mut self, f: impl FnMut(ObjectRef)) -> usize {
        self.iterate_objects_of_kind(HeapKind::ArrayObject, f)
    }

    // ---------------------------------------------------------------
    // Jobs
    // ---------------------------------------------------------------

    /// Queue a job
    pub fn enqueue_job(&mut self, job: Job) {
        self.jobs.enqueue(job);
    }

    /// Number of queued jobs
    pub fn pending_job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Run queued jobs until the queue is empty, each in its own sandbox.
    /// Kept objects are cleared before the drain and after every job.
    /// Returns the number of jobs run.
    pub fn drain_jobs(&mut self) -> usize {
        self.kept_objects.clear();
        let mut ran = 0;
        while let Some(job) = self.jobs.pop() {
            let _rooted: Vec<Rooted> = job.values().into_iter().map(|value| self.root(value)).collect();
            if let SandBoxResult::Error(error) = SandBox::run(self, |ctx| job.run(ctx)) {
                warn!(target: "conch::core", %error, "job failed");
            }
            self.kept_objects.clear();
            ran += 1;
        }
        ran
    }

    /// AddToKeptObjects: keep `value` alive until the next drain
    pub fn add_to_kept_objects(&mut self, value: Value) {
        self.kept_objects.push(value);
    }

    /// Number of kept objects
    pub fn kept_object_count(&self) -> usize {
        self.kept_objects.len()
    }

    // ---------------------------------------------------------------
    // Calls and errors
    // ---------------------------------------------------------------

    /// `Call(callee, this, args)`
    pub fn call(&mut self, callee: Value, this: Value, args: &[Value]) -> VmResult<Value> {
        let Some(function) = callee.as_object().and_then(|object| object.native_function()) else {
            return Err(self.throw_type_error("value is not a function"));
        };
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(self.throw_range_error("Maximum call stack size exceeded"));
        }
        self.frames.push(StackFrame {
            function_name: function.name.clone(),
        });
        let result = (function.func)(self, this, args);
        self.frames.pop();
        result
    }

    /// Depth of the native frame stack
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Pop frames down to `depth`
    pub fn truncate_frames(&mut self, depth: usize) {
        self.frames.truncate(depth);
    }

    /// The native frame stack, innermost last
    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// Build a thrown TypeError
    pub fn throw_type_error(&mut self, message: impl Into<String>) -> VmError {
        self.throw_error(ErrorKind::TypeError, message.into())
    }

    /// Build a thrown RangeError
    pub fn throw_range_error(&mut self, message: impl Into<String>) -> VmError {
        self.throw_error(ErrorKind::RangeError, message.into())
    }

    fn throw_error(&mut self, kind: ErrorKind, message: String) -> VmError {
        let error = self.new_error(kind, &message);
        let class = match kind {
            ErrorKind::TypeError => "TypeError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::Other => "Error",
        };
        VmError::exception(
            Value::object(error),
            format!("{class}: {message}"),
            kind,
            self.frames.clone(),
        )
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("atoms", &self.strings.len())
            .field("jobs", &self.jobs.len())
            .field("frames", &self.frames.len())
            .finish()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.jobs.clear();
        self.kept_objects.clear();
        // Twice: owners of fired finalizers are roots until taken
        heap().collect(&[]);
        drop(heap().take_fired_finalizers());
        heap().collect(&[]);
        CONTEXT_ACTIVE.with(|active| active.set(false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_key_past_array_range() {
        let mut ctx = Context::new();
        assert_eq!(ctx.index_key(7).as_index(), Some(7));
        let key = ctx.index_key(u64::from(u32::MAX));
        assert!(key.as_index().is_none());
        assert!(key.matches_str("4294967295"));
    }

    #[test]
    fn test_rooted_slots_are_reused() {
        let mut ctx = Context::new();
        let first = ctx.root(Value::int32(1));
        let index = first.index;
        drop(first);
        let second = ctx.root(Value::int32(2));
        assert_eq!(second.index, index);
        assert_eq!(second.get().as_int32(), Some(2));
    }

    #[test]
    fn test_call_non_callable_throws_type_error() {
        let mut ctx = Context::new();
        let error = ctx.call(Value::int32(3), Value::undefined(), &[]).unwrap_err();
        assert!(error.is_type_error());
        assert_eq!(ctx.frame_depth(), 0);
    }

    #[test]
    fn test_unbounded_recursion_hits_range_error() {
        let mut ctx = Context::new();
        let recurse = ctx
            .new_function("recurse", 0, |ctx, this, _| ctx.call(this, this, &[]))
            .unwrap();
        let f = Value::object(recurse);
        let error = ctx.call(f, f, &[]).unwrap_err();
        assert!(error.is_range_error());
        assert_eq!(ctx.frame_depth(), 0);
    }
}
