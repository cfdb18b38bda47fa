//! Container marshalers: C arrays, sized arrays, lists and hash tables
//!
//! Elements go through the element type's own ArgCache, so containers nest.
//! A failed element conversion releases every element converted before it.

use super::basic;
use super::CleanupData;
use crate::cache::{ArgCache, LinkRole};
use crate::core::memory::{self, NativeArray, NativeHashTable, NativeList};
use crate::core::{ArrayKind, ArrayLength, ArrayType, NativeArg, Transfer, TypeTag, Value};
use crate::errors::{MarshalError, Result};
use crate::invoke::InvokeState;
use core::ffi::c_void;
use std::fmt;
use std::sync::Arc;

/// Struct-module style format code of a numeric element tag
pub fn format_code(tag: TypeTag) -> Option<&'static str> {
    Some(match tag {
        TypeTag::Int8 => "b",
        TypeTag::Int16 => "h",
        TypeTag::Int32 => "i",
        TypeTag::Int64 => "q",
        TypeTag::UInt8 => "B",
        TypeTag::UInt16 => "H",
        TypeTag::UInt32 => "I",
        TypeTag::UInt64 => "Q",
        TypeTag::Float => "f",
        TypeTag::Double => "d",
        _ => return None,
    })
}

/// Zero-copy view over a refcounted native array of numbers
pub struct ArrayView {
    array: *mut NativeArray,
    tag: TypeTag,
}

// The view owns one reference; the array itself is immutable through it
unsafe impl Send for ArrayView {}
unsafe impl Sync for ArrayView {}

impl ArrayView {
    /// View over `array`, taking over one reference the caller owns
    ///
    /// # Safety
    /// `array` must be a live `NativeArray` whose elements are `tag` values.
    pub unsafe fn from_owned(array: *mut NativeArray, tag: TypeTag) -> Self {
        Self { array, tag }
    }

    /// View over `array`, adding a reference of its own
    ///
    /// # Safety
    /// Same as `from_owned`.
    pub unsafe fn new(array: *mut NativeArray, tag: TypeTag) -> Self {
        Self::from_owned(NativeArray::array_ref(array), tag)
    }

    /// Copy numbers into a fresh native array and view it
    pub fn from_values(tag: TypeTag, values: &[Value]) -> Result<Self> {
        if format_code(tag).is_none() {
            return Err(MarshalError::unsupported(format!("array view of {}", tag)));
        }
        let size = tag.storage_size();
        let array = NativeArray::new(size, values.len())?;
        for (i, value) in values.iter().enumerate() {
            let native = match basic::value_to_native(tag, value) {
                Ok(native) => native,
                Err(e) => {
                    // SAFETY: the array was created above and not shared
                    unsafe { NativeArray::array_unref(array) };
                    return Err(e);
                }
            };
            // SAFETY: index within len, element size matches
            unsafe { native.write_to((*array).element_ptr(i), size) };
        }
        // SAFETY: fresh array with a single reference
        Ok(unsafe { Self::from_owned(array, tag) })
    }

    fn inner(&self) -> &NativeArray {
        // SAFETY: the view holds a reference for its whole lifetime
        unsafe { &*self.array }
    }

    pub fn len(&self) -> usize {
        self.inner().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner().is_empty()
    }

    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    pub fn item_size(&self) -> usize {
        self.inner().elem_size()
    }

    pub fn format(&self) -> &'static str {
        format_code(self.tag).unwrap_or("B")
    }

    /// The underlying memory, without copying
    pub fn as_bytes(&self) -> &[u8] {
        self.inner().as_bytes()
    }

    /// Element `index` as a script value; `None` when out of range
    pub fn get(&self, index: usize) -> Value {
        if index >= self.len() {
            return Value::None;
        }
        let array = self.inner();
        // SAFETY: index checked above
        let native = unsafe { NativeArg::read_from(array.element_ptr(index), array.elem_size()) };
        basic::native_to_value(self.tag, native)
    }

    pub fn to_list(&self) -> Value {
        Value::list((0..self.len()).map(|i| self.get(i)))
    }

    pub fn as_native(&self) -> *mut NativeArray {
        self.array
    }

    pub fn refcount(&self) -> u32 {
        self.inner().refcount()
    }
}

impl Drop for ArrayView {
    fn drop(&mut self) {
        // SAFETY: releases the reference taken at construction
        unsafe { NativeArray::array_unref(self.array) };
    }
}

impl fmt::Debug for ArrayView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<array format='{}' len={}>", self.format(), self.len())
    }
}

fn array_type(arg: &ArgCache) -> Result<&ArrayType> {
    arg.type_desc
        .array
        .as_ref()
        .ok_or_else(|| MarshalError::unsupported(arg.type_desc.display_name()))
}

fn sequence(value: &Value) -> Result<Vec<Value>> {
    value
        .elements()
        .ok_or_else(|| MarshalError::type_error("sequence", value.type_name()))
}

/// Release converted elements, last first
fn release_elements(state: &InvokeState<'_>, caches: &[ArgCache], data: Vec<CleanupData>, was_processed: bool) {
    let n = caches.len().max(1);
    for (i, item) in data.into_iter().enumerate().rev() {
        if !item.is_none() {
            caches[i % n].release(state, item, was_processed);
        }
    }
}

/// Convert every item with `elem`, releasing the finished ones on failure
fn convert_elements(
    state: &mut InvokeState<'_>,
    elem: &ArgCache,
    items: &[Value],
) -> Result<(Vec<NativeArg>, Vec<CleanupData>)> {
    let mut natives = Vec::with_capacity(items.len());
    let mut cleanups = Vec::with_capacity(items.len());
    for item in items {
        match elem.to_native(state, item) {
            Ok((native, data)) => {
                natives.push(native);
                cleanups.push(data);
            }
            Err(e) => {
                release_elements(state, std::slice::from_ref(elem), cleanups, false);
                return Err(e);
            }
        }
    }
    Ok((natives, cleanups))
}

/// Store the element count in the linked length slot, range-checked against its tag
fn write_length(state: &mut InvokeState<'_>, arg: &ArgCache, len: usize) -> Result<()> {
    if let Some(target) = arg.link(LinkRole::Length) {
        let tag = state.cache().args[target].type_desc.tag;
        let native = basic::integer_to_native(tag, &Value::Int(len as i128))?;
        state.set_slot_value(target, native);
    }
    Ok(())
}

fn read_length(state: &InvokeState<'_>, arg: &ArgCache) -> usize {
    match arg.link(LinkRole::Length) {
        Some(target) => {
            let tag = state.cache().args[target].type_desc.tag;
            state.slot_value(target).to_integer(tag).max(0) as usize
        }
        None => 0,
    }
}

pub(crate) fn array_in(
    state: &mut InvokeState<'_>,
    arg: &ArgCache,
    value: &Value,
) -> Result<(NativeArg, CleanupData)> {
    let array = array_type(arg)?;
    let elem = arg.element()?;

    if value.is_none() {
        if !arg.allow_none {
            return Err(MarshalError::type_error("sequence", "NoneType"));
        }
        write_length(state, arg, 0)?;
        return Ok((NativeArg::null(), CleanupData::None));
    }

    // Views of the right element type are passed without copying
    if let (ArrayKind::Sized, Value::Buffer(view)) = (array.kind, value) {
        if view.tag() == elem.type_desc.tag && elem.type_desc.interface.is_none() {
            write_length(state, arg, view.len())?;
            let ptr = view.as_native();
            return Ok(match arg.transfer {
                Transfer::Nothing => (NativeArg::from_ptr(ptr), CleanupData::Borrowed(value.clone())),
                _ => {
                    // SAFETY: the view keeps the array alive; the callee gets its own reference
                    let garray = unsafe { NativeArray::array_ref(ptr) };
                    (NativeArg::from_ptr(garray), CleanupData::SizedArray(garray, Vec::new()))
                }
            });
        }
    }

    let items = sequence(value)?;
    if let Some(ArrayLength::Fixed(n)) = array.length {
        if items.len() != n {
            return Err(MarshalError::value(format!(
                "Must contain {} items, not {}",
                n,
                items.len()
            )));
        }
    }

    let size = elem.type_desc.storage_size();
    let (natives, cleanups) = convert_elements(state, elem, &items)?;
    if let Err(e) = write_length(state, arg, natives.len()) {
        release_elements(state, std::slice::from_ref(elem), cleanups, false);
        return Err(e);
    }
    let result = match array.kind {
        ArrayKind::C => {
            let terminator = usize::from(array.length == Some(ArrayLength::ZeroTerminated));
            memory::alloc_zeroed(size * (natives.len() + terminator)).map(|buf| {
                for (i, native) in natives.iter().enumerate() {
                    // SAFETY: buffer sized for every element plus terminator
                    unsafe { native.write_to(buf.add(i * size), size) };
                }
                let ptr: *mut c_void = buf.cast();
                (NativeArg::from_ptr(ptr), CleanupData::CArray(ptr, Vec::new()))
            })
        }
        ArrayKind::Sized => NativeArray::new(size, natives.len()).map(|garray| {
            for (i, native) in natives.iter().enumerate() {
                // SAFETY: array created with natives.len() elements of `size`
                unsafe { native.write_to((*garray).element_ptr(i), size) };
            }
            (NativeArg::from_ptr(garray), CleanupData::SizedArray(garray, Vec::new()))
        }),
    };

    match result {
        Ok((native, data)) => {
            let data = match data {
                CleanupData::CArray(ptr, _) => CleanupData::CArray(ptr, cleanups),
                CleanupData::SizedArray(garray, _) => CleanupData::SizedArray(garray, cleanups),
                other => other,
            };
            Ok((native, data))
        }
        Err(e) => {
            release_elements(state, std::slice::from_ref(elem), cleanups, false);
            Err(e)
        }
    }
}

fn zero_terminated_len(ptr: *const u8, size: usize) -> usize {
    let mut len = 0;
    // SAFETY: zero-terminated arrays end with an all-zero element
    while unsafe { NativeArg::read_from(ptr.add(len * size), size) }.bits() != 0 {
        len += 1;
    }
    len
}

fn convert_out_elements(
    state: &InvokeState<'_>,
    elem: &ArgCache,
    natives: impl Iterator<Item = NativeArg>,
) -> Result<Vec<Value>> {
    natives.map(|native| elem.to_script(state, native)).collect()
}

pub(crate) fn array_out(state: &InvokeState<'_>, arg: &ArgCache, native: NativeArg) -> Result<Value> {
    let array = array_type(arg)?;
    let elem = arg.element()?;
    let size = elem.type_desc.storage_size();

    if native.is_null() {
        return Ok(Value::list(Vec::new()));
    }

    match array.kind {
        ArrayKind::C => {
            let ptr = native.pointer() as *const u8;
            let len = match array.length {
                Some(ArrayLength::Fixed(n)) => n,
                Some(ArrayLength::ZeroTerminated) => zero_terminated_len(ptr, size),
                Some(ArrayLength::Indexed(_)) | None => read_length(state, arg),
            };
            let values = convert_out_elements(
                state,
                elem,
                // SAFETY: the callee returned `len` elements of `size` bytes
                (0..len).map(|i| unsafe { NativeArg::read_from(ptr.add(i * size), size) }),
            );
            if arg.transfer != Transfer::Nothing {
                // SAFETY: the container was handed over to us
                unsafe { memory::free(native.pointer()) };
            }
            Ok(Value::list(values?))
        }
        ArrayKind::Sized => {
            let garray = native.pointer() as *mut NativeArray;
            let tag = elem.type_desc.tag;
            if state.env().config.containers.array_views
                && elem.type_desc.interface.is_none()
                && format_code(tag).is_some()
            {
                // SAFETY: a live array of `tag` elements
                let view = unsafe {
                    match arg.transfer {
                        Transfer::Nothing => ArrayView::new(garray, tag),
                        _ => ArrayView::from_owned(garray, tag),
                    }
                };
                return Ok(Value::Buffer(Arc::new(view)));
            }
            // SAFETY: a live array handed out by the callee
            let inner = unsafe { &*garray };
            let values = convert_out_elements(
                state,
                elem,
                // SAFETY: index below len
                (0..inner.len()).map(|i| unsafe { NativeArg::read_from(inner.element_ptr(i), size) }),
            );
            if arg.transfer != Transfer::Nothing {
                // SAFETY: drops the reference handed over to us
                unsafe { NativeArray::array_unref(garray) };
            }
            Ok(Value::list(values?))
        }
    }
}

pub(crate) fn list_in(
    state: &mut InvokeState<'_>,
    arg: &ArgCache,
    value: &Value,
) -> Result<(NativeArg, CleanupData)> {
    if value.is_none() && arg.allow_none {
        return Ok((NativeArg::null(), CleanupData::None));
    }
    let elem = arg.element()?;
    let items = sequence(value)?;
    let size = elem.type_desc.storage_size();
    let (natives, cleanups) = convert_elements(state, elem, &items)?;
    let payloads: Vec<*mut c_void> = natives.iter().map(|n| n.to_pointer_payload(size)).collect();
    let head = NativeList::from_payloads(&payloads);
    Ok((NativeArg::from_ptr(head), CleanupData::List(head, cleanups)))
}

pub(crate) fn list_out(state: &InvokeState<'_>, arg: &ArgCache, native: NativeArg) -> Result<Value> {
    let elem = arg.element()?;
    let size = elem.type_desc.storage_size();
    let head = native.pointer() as *mut NativeList;
    // SAFETY: null or a list handed out by the callee
    let payloads = unsafe { NativeList::payloads(head) };
    let values = convert_out_elements(
        state,
        elem,
        payloads.into_iter().map(|p| NativeArg::from_pointer_payload(p, size)),
    );
    if arg.transfer != Transfer::Nothing {
        // SAFETY: the nodes were handed over to us
        unsafe { NativeList::free(head) };
    }
    Ok(Value::list(values?))
}

pub(crate) fn hash_in(
    state: &mut InvokeState<'_>,
    arg: &ArgCache,
    value: &Value,
) -> Result<(NativeArg, CleanupData)> {
    if value.is_none() && arg.allow_none {
        return Ok((NativeArg::null(), CleanupData::None));
    }
    let (key_cache, value_cache) = arg.hash_elements()?;
    let items = value
        .items()
        .ok_or_else(|| MarshalError::type_error("dict", value.type_name()))?;
    let (key_size, value_size) = (
        key_cache.type_desc.storage_size(),
        value_cache.type_desc.storage_size(),
    );

    let table = NativeHashTable::new();
    let mut cleanups = Vec::with_capacity(items.len() * 2);
    for (k, v) in items {
        let converted = key_cache.to_native(state, k).and_then(|(key, key_data)| {
            match value_cache.to_native(state, v) {
                Ok((val, val_data)) => Ok((key, key_data, val, val_data)),
                Err(e) => {
                    key_cache.release(state, key_data, false);
                    Err(e)
                }
            }
        });
        match converted {
            Ok((key, key_data, val, val_data)) => {
                // SAFETY: table created above and not shared yet
                unsafe {
                    (*table).insert(key.to_pointer_payload(key_size), val.to_pointer_payload(value_size))
                };
                cleanups.push(key_data);
                cleanups.push(val_data);
            }
            Err(e) => {
                release_elements(state, &arg.items, cleanups, false);
                // SAFETY: created above
                unsafe { NativeHashTable::free(table) };
                return Err(e);
            }
        }
    }
    Ok((NativeArg::from_ptr(table), CleanupData::Hash(table, cleanups)))
}

pub(crate) fn hash_out(state: &InvokeState<'_>, arg: &ArgCache, native: NativeArg) -> Result<Value> {
    let table = native.pointer() as *mut NativeHashTable;
    if table.is_null() {
        return Ok(Value::None);
    }
    let (key_cache, value_cache) = arg.hash_elements()?;
    let (key_size, value_size) = (
        key_cache.type_desc.storage_size(),
        value_cache.type_desc.storage_size(),
    );
    // SAFETY: a live table handed out by the callee
    let entries = unsafe { (*table).entries().to_vec() };
    let pairs: Result<Vec<(Value, Value)>> = entries
        .into_iter()
        .map(|(k, v)| {
            Ok((
                key_cache.to_script(state, NativeArg::from_pointer_payload(k, key_size))?,
                value_cache.to_script(state, NativeArg::from_pointer_payload(v, value_size))?,
            ))
        })
        .collect();
    if arg.transfer != Transfer::Nothing {
        // SAFETY: the table was handed over to us
        unsafe { NativeHashTable::free(table) };
    }
    Ok(Value::dict(pairs?))
}

pub(crate) fn container_cleanup(
    state: &InvokeState<'_>,
    arg: &ArgCache,
    data: CleanupData,
    was_processed: bool,
) {
    // After a completed call the callee owns containers passed with CONTAINER or EVERYTHING
    let release_container = arg.transfer == Transfer::Nothing || !was_processed;
    match data {
        CleanupData::CArray(ptr, elements) => {
            release_elements(state, &arg.items, elements, was_processed);
            if release_container {
                // SAFETY: allocated by array_in
                unsafe { memory::free(ptr) };
            }
        }
        CleanupData::SizedArray(garray, elements) => {
            release_elements(state, &arg.items, elements, was_processed);
            if release_container {
                // SAFETY: created by array_in with one reference
                unsafe { NativeArray::array_unref(garray) };
            }
        }
        CleanupData::List(head, elements) => {
            release_elements(state, &arg.items, elements, was_processed);
            if release_container {
                // SAFETY: built by list_in
                unsafe { NativeList::free(head) };
            }
        }
        CleanupData::Hash(table, elements) => {
            release_elements(state, &arg.items, elements, was_processed);
            if release_container {
                // SAFETY: created by hash_in
                unsafe { NativeHashTable::free(table) };
            }
        }
        _ => {}
    }
}
