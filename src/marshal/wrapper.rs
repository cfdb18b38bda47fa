//! Generic object wrapper and the object marshaler
//!
//! A `Wrapper` holds one native pointer plus the class functions that know how
//! to copy (take a reference) and free (drop a reference) it. Classes are
//! registered once per native type name.

use super::CleanupData;
use crate::cache::ArgCache;
use crate::core::{NativeArg, Transfer, Value};
use crate::errors::{MarshalError, Result};
use crate::introspection::{InterfaceInfo, ObjectInfo};
use crate::invoke::InvokeState;
use core::ffi::c_void;
use dashmap::DashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

/// Copy/free pair of a wrapped native type
///
/// For reference-counted objects these are ref/unref.
#[derive(Debug, Clone, Copy, Default)]
pub struct WrapperFuncs {
    pub copy: Option<unsafe extern "C" fn(*mut c_void) -> *mut c_void>,
    pub free: Option<unsafe extern "C" fn(*mut c_void)>,
}

impl WrapperFuncs {
    pub const NONE: Self = Self {
        copy: None,
        free: None,
    };

    pub fn new(
        copy: unsafe extern "C" fn(*mut c_void) -> *mut c_void,
        free: unsafe extern "C" fn(*mut c_void),
    ) -> Self {
        Self {
            copy: Some(copy),
            free: Some(free),
        }
    }
}

/// Script-side class of a wrapped native type
#[derive(Debug)]
pub struct WrapperClass {
    name: String,
    funcs: WrapperFuncs,
    object: Option<Arc<ObjectInfo>>,
}

impl WrapperClass {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn funcs(&self) -> WrapperFuncs {
        self.funcs
    }

    pub fn object_info(&self) -> Option<&Arc<ObjectInfo>> {
        self.object.as_ref()
    }

    /// Instance check following the object hierarchy when metadata is known
    pub fn is_a(&self, expected: &ObjectInfo) -> bool {
        match &self.object {
            Some(info) => info.is_a(expected),
            None => self.name == expected.type_name,
        }
    }

    /// Wrappers are only produced by marshaling
    pub fn instantiate(&self, _args: &[Value]) -> Result<Wrapper> {
        Err(MarshalError::not_implemented(format!(
            "{} can not be constructed",
            self.name
        )))
    }
}

/// Registry of wrapper classes keyed by native type name
#[derive(Debug, Default)]
pub struct WrapperRegistry {
    classes: DashMap<String, Arc<WrapperClass>>,
}

impl WrapperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the class registered for `name`, creating it on first use
    pub fn class_new_full(&self, name: &str, funcs: WrapperFuncs) -> Arc<WrapperClass> {
        self.classes
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(WrapperClass {
                    name: name.to_string(),
                    funcs,
                    object: None,
                })
            })
            .clone()
    }

    /// Class for an object type, carrying its metadata for instance checks
    pub fn class_from_object_info(&self, info: &Arc<ObjectInfo>) -> Arc<WrapperClass> {
        self.classes
            .entry(info.type_name.clone())
            .or_insert_with(|| {
                Arc::new(WrapperClass {
                    name: info.type_name.clone(),
                    funcs: info.funcs,
                    object: Some(info.clone()),
                })
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<WrapperClass>> {
        self.classes.get(name).map(|c| c.value().clone())
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// Script value owning (a reference to) one native pointer
pub struct Wrapper {
    class: Arc<WrapperClass>,
    wrapped: AtomicPtr<c_void>,
}

impl Wrapper {
    /// Wrap `ptr`, taking over the reference the caller holds
    pub fn new(class: Arc<WrapperClass>, ptr: *mut c_void) -> Self {
        Self {
            class,
            wrapped: AtomicPtr::new(ptr),
        }
    }

    /// Wrap `ptr` with a reference of our own
    pub fn new_copy(class: Arc<WrapperClass>, ptr: *mut c_void) -> Self {
        let owned = copy_with(class.funcs, ptr);
        Self::new(class, owned)
    }

    pub fn class(&self) -> &Arc<WrapperClass> {
        &self.class
    }

    /// The wrapped pointer, still owned by the wrapper
    #[inline]
    pub fn peek_wrapped(&self) -> *mut c_void {
        self.wrapped.load(Ordering::Acquire)
    }

    /// A new reference/copy of the wrapped pointer, owned by the caller
    pub fn copy_wrapped(&self) -> *mut c_void {
        copy_with(self.class.funcs, self.peek_wrapped())
    }

    /// Replace the wrapped pointer, releasing the previous one
    pub fn set_wrapped(&self, ptr: *mut c_void) {
        let old = self.wrapped.swap(ptr, Ordering::AcqRel);
        free_with(self.class.funcs, old);
    }

    /// Take the wrapped pointer out; the wrapper is left empty
    pub fn steal(&self) -> *mut c_void {
        self.wrapped.swap(ptr::null_mut(), Ordering::AcqRel)
    }
}

fn copy_with(funcs: WrapperFuncs, ptr: *mut c_void) -> *mut c_void {
    match funcs.copy {
        // SAFETY: copy functions accept any pointer of their class
        Some(copy) if !ptr.is_null() => unsafe { copy(ptr) },
        _ => ptr,
    }
}

fn free_with(funcs: WrapperFuncs, ptr: *mut c_void) {
    if let Some(free) = funcs.free {
        if !ptr.is_null() {
            // SAFETY: the wrapper owned this pointer
            unsafe { free(ptr) };
        }
    }
}

impl Drop for Wrapper {
    fn drop(&mut self) {
        free_with(self.class.funcs, *self.wrapped.get_mut());
    }
}

impl PartialEq for Wrapper {
    fn eq(&self, other: &Self) -> bool {
        self.peek_wrapped() == other.peek_wrapped()
    }
}

impl Eq for Wrapper {}

impl Hash for Wrapper {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.peek_wrapped() as usize).hash(state);
    }
}

impl fmt::Display for Wrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} at {:p}>", self.class.name, self.peek_wrapped())
    }
}

impl fmt::Debug for Wrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

fn object_info(arg: &ArgCache) -> Result<&Arc<ObjectInfo>> {
    match arg.type_desc.interface.as_ref() {
        Some(InterfaceInfo::Object(info)) => Ok(info),
        _ => Err(MarshalError::unsupported(arg.type_desc.display_name())),
    }
}

pub(crate) fn object_in(
    _state: &mut InvokeState<'_>,
    arg: &ArgCache,
    value: &Value,
) -> Result<(NativeArg, CleanupData)> {
    let info = object_info(arg)?;
    match value {
        Value::None if arg.allow_none => Ok((NativeArg::null(), CleanupData::None)),
        Value::Wrapper(wrapper) if wrapper.class().is_a(info) => match arg.transfer {
            Transfer::Nothing => Ok((
                NativeArg::from_ptr(wrapper.peek_wrapped()),
                CleanupData::Borrowed(value.clone()),
            )),
            _ => {
                let funcs = wrapper.class().funcs();
                let ptr = wrapper.copy_wrapped();
                // Only a reference we actually took is ours to drop
                let data = match funcs.copy {
                    Some(_) if !ptr.is_null() => CleanupData::Boxed(ptr, funcs),
                    _ => CleanupData::None,
                };
                Ok((NativeArg::from_ptr(ptr), data))
            }
        },
        other => Err(MarshalError::type_error(
            info.qualified_name(),
            match other {
                Value::Wrapper(w) => w.class().name().to_string(),
                _ => other.type_name().to_string(),
            },
        )),
    }
}

/// Drop the reference taken for the callee when the call never happened
pub(crate) fn object_cleanup(_state: &InvokeState<'_>, _arg: &ArgCache, data: CleanupData, was_processed: bool) {
    if let CleanupData::Boxed(ptr, funcs) = data {
        if !was_processed {
            free_with(funcs, ptr);
        }
    }
}

pub(crate) fn object_out(state: &InvokeState<'_>, arg: &ArgCache, native: NativeArg) -> Result<Value> {
    let info = object_info(arg)?;
    if native.is_null() {
        return Ok(Value::None);
    }
    let class = state.env().wrappers.class_from_object_info(info);
    let wrapper = match arg.transfer {
        Transfer::Nothing => Wrapper::new_copy(class, native.pointer()),
        _ => Wrapper::new(class, native.pointer()),
    };
    Ok(Value::Wrapper(Arc::new(wrapper)))
}
