//! # Conch Core
//!
//! Value, object and array runtime core of the Conch JavaScript engine.
//!
//! ## Design Principles
//!
//! - **NaN-boxing**: [`Value`] is a single 64-bit word; heap slots use the
//!   narrower [`EncodedValue`] and [`EncodedSmallValue`] encodings
//! - **Shared structures**: objects with the same property history share
//!   an [`ObjectStructure`]; values live in a parallel slot vector
//! - **Fast-mode arrays**: dense arrays keep their elements in a flat
//!   buffer until a sparse write, an attribute change or a prototype index
//!   property forces them into general mode
//! - **Explicit safepoints**: collection only runs from
//!   [`Context::collect_garbage`] and [`Context::safepoint`]; weak
//!   references and finalization registries are serviced there and by the
//!   job queue

#![warn(clippy::all)]
#![warn(missing_docs)]
// All unsafe code must have SAFETY comments

#[cfg(not(target_pointer_width = "64"))]
compile_error!("conch-core requires a 64-bit target");

pub mod array;
pub mod config;
pub mod context;
pub mod conversion;
pub mod encoded_value;
pub mod error;
pub mod finalization_registry;
pub mod function;
pub mod job;
pub mod number;
pub mod object;
pub mod object_cell;
pub mod property_descriptor;
pub mod property_name;
pub mod string;
pub mod structure;
pub mod symbol;
pub mod value;
pub mod weak_ref;

pub use array::ArrayData;
pub use config::{ArrayModeConfig, ContextConfig};
pub use context::{Context, Intrinsics, Rooted, StaticStrings};
pub use encoded_value::{EncodedSmallValue, EncodedValue, NumberBox};
pub use error::{ErrorKind, StackFrame, VmError, VmResult};
pub use function::{Arguments, NativeFn, NativeFunction};
pub use job::{Job, JobQueue, SandBox, SandBoxResult};
pub use object::{JsObject, ObjectData, ObjectRef};
pub use property_descriptor::{PropertyAttributes, PropertyDescriptor, StructurePropertyDescriptor};
pub use property_name::PropertyName;
pub use string::{AtomicStringTable, JsString};
pub use structure::ObjectStructure;
pub use symbol::{Symbol, WellKnownSymbols};
pub use value::{PreferredType, Value};
