//! Read-only query interface over introspection metadata
//!
//! Design: the engine only ever reads metadata. `Repository` is the seam to a
//! real metadata store; `InMemoryRepository` is a thread-safe registry that
//! bindings (and tests) fill by hand.

mod info;

pub use info::{
    ArgInfo, CallableInfo, EnumInfo, FieldInfo, FunctionKind, InterfaceInfo, ObjectInfo,
    StructInfo,
};

use crate::errors::{MarshalError, Result};
use dashmap::DashMap;
use std::sync::Arc;

/// Anything a repository can hand out by name
#[derive(Debug, Clone)]
pub enum BaseInfo {
    Callable(Arc<CallableInfo>),
    Interface(InterfaceInfo),
}

/// Metadata lookups; every query may fail with `NotFound`
pub trait Repository: Send + Sync {
    fn find_by_name(&self, namespace: &str, name: &str) -> Result<BaseInfo>;

    fn find_callable(&self, namespace: &str, name: &str) -> Result<Arc<CallableInfo>> {
        match self.find_by_name(namespace, name)? {
            BaseInfo::Callable(info) => Ok(info),
            BaseInfo::Interface(InterfaceInfo::Callback(info)) => Ok(info),
            BaseInfo::Interface(_) => Err(MarshalError::not_found(format!("{}.{}", namespace, name))),
        }
    }

    fn find_interface(&self, namespace: &str, name: &str) -> Result<InterfaceInfo> {
        match self.find_by_name(namespace, name)? {
            BaseInfo::Interface(info) => Ok(info),
            BaseInfo::Callable(_) => Err(MarshalError::not_found(format!("{}.{}", namespace, name))),
        }
    }

    /// Fields of a struct or union
    fn fields(&self, namespace: &str, name: &str) -> Result<Vec<FieldInfo>> {
        match self.find_interface(namespace, name)? {
            InterfaceInfo::Struct(info) | InterfaceInfo::Union(info) => Ok(info.fields.clone()),
            _ => Err(MarshalError::not_found(format!("{}.{}", namespace, name))),
        }
    }

    /// Declared arguments of a callable
    fn arguments(&self, namespace: &str, name: &str) -> Result<Vec<ArgInfo>> {
        Ok(self.find_callable(namespace, name)?.args.clone())
    }

    /// Signal declared on an object class or one of its ancestors
    fn find_signal(&self, namespace: &str, object: &str, signal: &str) -> Result<Arc<CallableInfo>> {
        match self.find_interface(namespace, object)? {
            InterfaceInfo::Object(info) => info
                .find_signal(signal)
                .ok_or_else(|| MarshalError::not_found(format!("{}.{}::{}", namespace, object, signal))),
            _ => Err(MarshalError::not_found(format!("{}.{}", namespace, object))),
        }
    }
}

/// Hand-populated, concurrent repository
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    entries: DashMap<(String, String), BaseInfo>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_callable(&self, info: CallableInfo) -> Arc<CallableInfo> {
        let info = Arc::new(info);
        self.entries.insert(
            (info.namespace.clone(), info.name.clone()),
            BaseInfo::Callable(info.clone()),
        );
        info
    }

    pub fn register_interface(&self, info: InterfaceInfo) {
        self.entries.insert(
            (info.namespace().to_string(), info.name().to_string()),
            BaseInfo::Interface(info),
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Repository for InMemoryRepository {
    fn find_by_name(&self, namespace: &str, name: &str) -> Result<BaseInfo> {
        self.entries
            .get(&(namespace.to_string(), name.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| MarshalError::not_found(format!("{}.{}", namespace, name)))
    }
}
