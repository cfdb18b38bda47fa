//! Core data model
//!
//! Type descriptors, the script value model, the native argument slot and
//! native memory helpers shared by every other module.

pub mod arg;
pub mod memory;
pub mod types;
pub mod value;

pub use arg::NativeArg;
pub use memory::{NativeArray, NativeError, NativeHashTable, NativeList};
pub use types::{ArrayKind, ArrayLength, ArrayType, Direction, ScopeType, Transfer, TypeDescriptor, TypeTag};
pub use value::{ByteString, FnCallable, ScriptCallable, Text, Value};

#[cfg(test)]
mod tests;
