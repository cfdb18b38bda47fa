//! Argument marshaling between a dynamic scripting runtime and native
//! functions described by introspection metadata.
//!
//! A `CallableCache` is built once per callable signature and then drives
//! every call: the `Invoker` converts script values into the native argument
//! buffer, calls through a `NativeBackend`, converts results back and
//! releases what the call allocated. Script callables passed as callbacks go
//! through the closure bridge.

// Core modules
pub mod core;
pub mod errors;
pub mod introspection;

// Engine
pub mod cache;
pub mod closure;
pub mod invoke;
pub mod marshal;

// Ambient
pub mod config;
pub mod logging;
pub mod stats;

// Re-export commonly used items
pub use crate::core::{
    ArrayKind, ArrayLength, Direction, NativeArg, NativeError, ScopeType, Transfer, TypeDescriptor,
    TypeTag, Value,
};
pub use cache::{ArgCache, ArgMeta, CacheRegistry, CallableCache, ChildLink, LinkRole};
pub use closure::{connect_signal, ClosureMode, ClosureRecord, SignalConnection};
pub use config::MarshalConfig;
pub use errors::{CollectingSink, ErrorKind, MarshalError, Result, Warning, WarningKind, WarningSink};
pub use introspection::{
    ArgInfo, CallableInfo, EnumInfo, FieldInfo, FunctionKind, InMemoryRepository, InterfaceInfo,
    ObjectInfo, Repository, StructInfo,
};
pub use invoke::{script_lock, FunctionTable, Invoker, MarshalEnv, NativeBackend, NativeFrame};
pub use marshal::{classify, MarshalFamily};
pub use stats::{stats, MarshalStats};

/// Build the conversion plan for `info`
///
/// Pure and deterministic: two builds of the same signature are equivalent.
/// Callers that build repeatedly should keep the result or use
/// `CacheRegistry`.
pub fn build_callable_cache(info: &CallableInfo) -> Result<CallableCache> {
    CallableCache::build(info)
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
