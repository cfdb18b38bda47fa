//! Structs by reference: `StructInstance`, boxed copies and foreign structs
//!
//! Design: a native struct is an owned (or borrowed) byte buffer with typed
//! accessors per field; callers never do pointer arithmetic themselves.

use super::basic;
use super::wrapper::WrapperFuncs;
use super::CleanupData;
use crate::cache::ArgCache;
use crate::core::memory;
use crate::core::{NativeArg, Transfer, TypeTag, Value};
use crate::errors::{MarshalError, Result};
use crate::introspection::{FieldInfo, InterfaceInfo, StructInfo};
use crate::invoke::InvokeState;
use core::ffi::c_void;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

/// A native struct seen from script code
pub struct StructInstance {
    info: Arc<StructInfo>,
    ptr: *mut u8,
    /// Free the memory when the instance goes away
    owned: bool,
}

// The buffer is only touched under the script lock
unsafe impl Send for StructInstance {}
unsafe impl Sync for StructInstance {}

impl StructInstance {
    /// Allocate a zero-filled struct owned by the instance
    pub fn new_zeroed(info: Arc<StructInfo>) -> Result<Self> {
        if info.size == 0 {
            return Err(MarshalError::type_error(
                format!("a constructor for {}", info.qualified_name()),
                "struct cannot be created directly; try using a constructor",
            ));
        }
        let ptr = memory::alloc_zeroed(info.size)?;
        Ok(Self {
            info,
            ptr,
            owned: true,
        })
    }

    /// Wrap existing memory
    ///
    /// # Safety
    /// `ptr` must point at `info.size` valid bytes for the instance's
    /// lifetime, and if `owned` must be releasable with the struct's free
    /// function (or `free`).
    pub unsafe fn from_raw(info: Arc<StructInfo>, ptr: *mut c_void, owned: bool) -> Self {
        Self {
            info,
            ptr: ptr.cast(),
            owned,
        }
    }

    pub fn info(&self) -> &Arc<StructInfo> {
        &self.info
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut c_void {
        self.ptr.cast()
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    fn field(&self, name: &str) -> Result<&FieldInfo> {
        let field = self.info.find_field(name).ok_or_else(|| {
            MarshalError::not_found(format!("{}.{}", self.info.qualified_name(), name))
        })?;
        if field.offset + field.ty.storage_size() > self.info.size {
            return Err(MarshalError::invalid_config(format!(
                "field '{}' lies outside {} bytes of {}",
                name,
                self.info.size,
                self.info.qualified_name()
            )));
        }
        Ok(field)
    }

    /// Read a scalar, enum or string field
    pub fn get_field(&self, name: &str) -> Result<Value> {
        let field = self.field(name)?;
        let size = field.ty.storage_size();
        // SAFETY: bounds checked against the struct size in `field`
        let native = unsafe { NativeArg::read_from(self.ptr.add(field.offset), size) };
        match (&field.ty.interface, field.ty.tag) {
            (None, TypeTag::Utf8 | TypeTag::Filename) => {
                if native.is_null() {
                    return Ok(Value::None);
                }
                // SAFETY: string fields hold NUL-terminated buffers
                let bytes = unsafe { memory::c_str_bytes(native.pointer()) };
                Ok(Value::str(&String::from_utf8_lossy(bytes)))
            }
            (None, tag) if tag.is_numeric() || tag == TypeTag::Boolean => {
                Ok(basic::native_to_value(tag, native))
            }
            (Some(InterfaceInfo::Enum(info) | InterfaceInfo::Flags(info)), _) => {
                Ok(Value::Int(native.to_integer(info.storage)))
            }
            _ => Err(MarshalError::unsupported(field.ty.display_name())),
        }
    }

    /// Write a scalar or enum field
    pub fn set_field(&self, name: &str, value: &Value) -> Result<()> {
        let field = self.field(name)?;
        if !field.writable {
            return Err(MarshalError::value(format!("field '{}' is not writable", name)));
        }
        let native = match (&field.ty.interface, field.ty.tag) {
            (None, TypeTag::Utf8 | TypeTag::Filename) => {
                return Err(MarshalError::not_implemented(format!(
                    "setting string field '{}'",
                    name
                )))
            }
            (None, tag) if tag.is_numeric() || tag == TypeTag::Boolean => {
                basic::value_to_native(tag, value)?
            }
            (Some(InterfaceInfo::Enum(info)), _) => basic::enum_to_native(info, false, value)?,
            (Some(InterfaceInfo::Flags(info)), _) => basic::enum_to_native(info, true, value)?,
            _ => return Err(MarshalError::unsupported(field.ty.display_name())),
        };
        // SAFETY: bounds checked in `field`
        unsafe { native.write_to(self.ptr.add(field.offset), field.ty.storage_size()) };
        Ok(())
    }
}

impl Drop for StructInstance {
    fn drop(&mut self) {
        if self.owned && !self.ptr.is_null() {
            release_struct(self.info.funcs, self.ptr.cast());
        }
    }
}

impl fmt::Debug for StructInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} at {:p}>", self.info.qualified_name(), self.ptr)
    }
}

fn release_struct(funcs: Option<WrapperFuncs>, ptr: *mut c_void) {
    match funcs.and_then(|f| f.free) {
        // SAFETY: boxed memory is released with the type's own free function
        Some(free) => unsafe { free(ptr) },
        // SAFETY: plain structs are C heap copies
        None => unsafe { memory::free(ptr) },
    }
}

fn copy_struct(info: &StructInfo, src: *mut c_void) -> Result<*mut c_void> {
    match info.funcs.and_then(|f| f.copy) {
        // SAFETY: copy functions accept any instance of their type
        Some(copy) => Ok(unsafe { copy(src) }),
        None => {
            let dst = memory::alloc_zeroed(info.size)?;
            // SAFETY: both buffers hold `size` bytes
            unsafe { std::ptr::copy_nonoverlapping(src as *const u8, dst, info.size) };
            Ok(dst.cast())
        }
    }
}

/// Converts script objects of some foreign library to and from native structs
pub trait ForeignStructAdapter: Send + Sync {
    fn to_native(&self, value: &Value) -> Result<*mut c_void>;

    fn from_native(&self, ptr: *mut c_void, owned: bool) -> Result<Value>;

    /// Release a struct produced by `to_native`
    fn release(&self, ptr: *mut c_void);
}

/// Foreign adapters keyed by `Namespace.Name`
#[derive(Default)]
pub struct ForeignRegistry {
    adapters: DashMap<String, Arc<dyn ForeignStructAdapter>>,
}

impl ForeignRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, namespace: &str, name: &str, adapter: Arc<dyn ForeignStructAdapter>) {
        self.adapters.insert(format!("{}.{}", namespace, name), adapter);
    }

    pub fn get(&self, qualified_name: &str) -> Result<Arc<dyn ForeignStructAdapter>> {
        self.adapters
            .get(qualified_name)
            .map(|a| a.value().clone())
            .ok_or_else(|| {
                MarshalError::not_found(format!("foreign converter for {}", qualified_name))
            })
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl fmt::Debug for ForeignRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignRegistry")
            .field("adapters", &self.adapters.len())
            .finish()
    }
}

fn struct_info(arg: &ArgCache) -> Result<&Arc<StructInfo>> {
    match arg.type_desc.interface.as_ref() {
        Some(InterfaceInfo::Struct(info) | InterfaceInfo::Union(info)) => Ok(info),
        _ => Err(MarshalError::unsupported(arg.type_desc.display_name())),
    }
}

pub(crate) fn struct_in(
    _state: &mut InvokeState<'_>,
    arg: &ArgCache,
    value: &Value,
) -> Result<(NativeArg, CleanupData)> {
    let info = struct_info(arg)?;
    match value {
        Value::None if arg.allow_none => Ok((NativeArg::null(), CleanupData::None)),
        Value::Struct(instance) if instance.info().qualified_name() == info.qualified_name() => {
            match arg.transfer {
                Transfer::Nothing => Ok((
                    NativeArg::from_ptr(instance.as_ptr()),
                    CleanupData::Borrowed(value.clone()),
                )),
                _ => {
                    let copy = copy_struct(info, instance.as_ptr())?;
                    Ok((
                        NativeArg::from_ptr(copy),
                        CleanupData::Boxed(copy, info.funcs.unwrap_or_default()),
                    ))
                }
            }
        }
        Value::Struct(instance) => Err(MarshalError::type_error(
            info.qualified_name(),
            instance.info().qualified_name(),
        )),
        other => Err(MarshalError::type_error(info.qualified_name(), other.type_name())),
    }
}

pub(crate) fn struct_out(_state: &InvokeState<'_>, arg: &ArgCache, native: NativeArg) -> Result<Value> {
    let info = struct_info(arg)?;
    if native.is_null() {
        return Ok(Value::None);
    }
    let owned = arg.transfer == Transfer::Everything;
    // SAFETY: the callee returned a valid instance of this struct type
    let instance = unsafe { StructInstance::from_raw(info.clone(), native.pointer(), owned) };
    Ok(Value::Struct(Arc::new(instance)))
}

pub(crate) fn foreign_in(
    state: &mut InvokeState<'_>,
    arg: &ArgCache,
    value: &Value,
) -> Result<(NativeArg, CleanupData)> {
    let info = struct_info(arg)?;
    if value.is_none() && arg.allow_none {
        return Ok((NativeArg::null(), CleanupData::None));
    }
    let adapter = state.env().foreign.get(&info.qualified_name())?;
    let ptr = adapter.to_native(value)?;
    Ok((NativeArg::from_ptr(ptr), CleanupData::Foreign(ptr, adapter)))
}

pub(crate) fn foreign_out(state: &InvokeState<'_>, arg: &ArgCache, native: NativeArg) -> Result<Value> {
    let info = struct_info(arg)?;
    if native.is_null() {
        return Ok(Value::None);
    }
    let adapter = state.env().foreign.get(&info.qualified_name())?;
    adapter.from_native(native.pointer(), arg.transfer == Transfer::Everything)
}

pub(crate) fn struct_cleanup(_state: &InvokeState<'_>, arg: &ArgCache, data: CleanupData, was_processed: bool) {
    match data {
        // A copy handed over by a completed call belongs to the callee
        CleanupData::Boxed(ptr, funcs) if !was_processed => release_struct(Some(funcs), ptr),
        CleanupData::Foreign(ptr, adapter) => {
            if arg.transfer == Transfer::Nothing || !was_processed {
                adapter.release(ptr);
            }
        }
        _ => {}
    }
}
