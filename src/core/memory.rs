//! Native heap and native container representations
//!
//! Design: memory handed to native callees comes from the C heap
//! (`malloc`/`free`) so callees taking ownership can release it themselves.
//! Containers mirror their C counterparts: a refcounted sized array, a linked
//! list and a flat hash table.

use crate::errors::{MarshalError, Result};
use crate::logging::trace;
use core::ffi::c_void;
use core::ptr;
use std::sync::atomic::{fence, AtomicU32, Ordering};

/// Allocate `size` zeroed bytes on the C heap
pub fn alloc_zeroed(size: usize) -> Result<*mut u8> {
    // calloc(0) may legitimately return null; always ask for at least a byte
    let ptr = unsafe { libc::calloc(size.max(1), 1) } as *mut u8;
    if ptr.is_null() {
        return Err(MarshalError::value(format!("failed to allocate {} bytes", size)));
    }
    trace!(target: "allocator", size, ptr = ?ptr, "allocated native memory");
    Ok(ptr)
}

/// Release memory obtained from `alloc_zeroed` or `strdup`
///
/// # Safety
/// `ptr` must be null or come from the C heap and not be freed already.
pub unsafe fn free(ptr: *mut c_void) {
    if !ptr.is_null() {
        trace!(target: "allocator", ptr = ?ptr, "freed native memory");
        libc::free(ptr);
    }
}

/// Copy `bytes` into a fresh NUL-terminated C heap buffer
pub fn strdup(bytes: &[u8]) -> Result<*mut c_void> {
    let dst = alloc_zeroed(bytes.len() + 1)?;
    // SAFETY: dst holds len + 1 bytes, the last one already zeroed
    unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len()) };
    Ok(dst.cast())
}

/// Bytes of a NUL-terminated C string, without the terminator
///
/// # Safety
/// `ptr` must be non-null and point at a NUL-terminated buffer.
pub unsafe fn c_str_bytes<'a>(ptr: *const c_void) -> &'a [u8] {
    std::ffi::CStr::from_ptr(ptr.cast()).to_bytes()
}

/// Self-describing, reference-counted array of fixed-size elements
#[repr(C)]
pub struct NativeArray {
    data: *mut u8,
    len: usize,
    elem_size: usize,
    refcount: AtomicU32,
}

impl NativeArray {
    /// Create a zero-filled array with a refcount of one
    pub fn new(elem_size: usize, len: usize) -> Result<*mut NativeArray> {
        let data = alloc_zeroed(elem_size * len)?;
        Ok(Box::into_raw(Box::new(Self {
            data,
            len,
            elem_size,
            refcount: AtomicU32::new(1),
        })))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn elem_size(&self) -> usize {
        self.elem_size
    }

    #[inline]
    pub fn data(&self) -> *mut u8 {
        self.data
    }

    /// Raw element bytes
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: data holds len * elem_size initialised bytes for the array's lifetime
        unsafe { std::slice::from_raw_parts(self.data, self.len * self.elem_size) }
    }

    /// Pointer to element `index`
    #[inline]
    pub fn element_ptr(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.len);
        // SAFETY: bounds checked above
        unsafe { self.data.add(index * self.elem_size) }
    }

    /// Get current reference count (for debugging/testing)
    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Relaxed)
    }

    /// Increment reference count
    ///
    /// # Safety
    /// `array` must be null or a live array from `NativeArray::new`.
    pub unsafe fn array_ref(array: *mut NativeArray) -> *mut NativeArray {
        if !array.is_null() {
            let old = (*array).refcount.fetch_add(1, Ordering::Relaxed);
            debug_assert!(old < u32::MAX, "refcount overflow");
        }
        array
    }

    /// Decrement reference count, freeing the array when it reaches zero
    ///
    /// # Safety
    /// `array` must be null or a live array from `NativeArray::new`.
    pub unsafe fn array_unref(array: *mut NativeArray) {
        if array.is_null() {
            return;
        }
        let old = (*array).refcount.fetch_sub(1, Ordering::Release);
        debug_assert!(old > 0, "refcount underflow");
        if old == 1 {
            // Synchronize with all previous decrements
            fence(Ordering::Acquire);
            destroy_array(array);
        }
    }
}

/// Destroy array (cold path, separated for better code generation)
#[cold]
#[inline(never)]
unsafe fn destroy_array(array: *mut NativeArray) {
    let boxed = Box::from_raw(array);
    free(boxed.data.cast());
}

/// Linked list node; used for both doubly and singly linked lists
#[repr(C)]
pub struct NativeList {
    pub data: *mut c_void,
    pub next: *mut NativeList,
    pub prev: *mut NativeList,
}

impl NativeList {
    /// Build a list holding `payloads` in order; empty input yields null
    pub fn from_payloads(payloads: &[*mut c_void]) -> *mut NativeList {
        let mut head: *mut NativeList = ptr::null_mut();
        for &data in payloads.iter().rev() {
            let node = Box::into_raw(Box::new(NativeList {
                data,
                next: head,
                prev: ptr::null_mut(),
            }));
            if !head.is_null() {
                // SAFETY: head was produced by Box::into_raw just above
                unsafe { (*head).prev = node };
            }
            head = node;
        }
        head
    }

    /// Payloads of every node, front to back
    ///
    /// # Safety
    /// `head` must be null or a list built by `from_payloads`.
    pub unsafe fn payloads(head: *const NativeList) -> Vec<*mut c_void> {
        let mut out = Vec::new();
        let mut node = head;
        while !node.is_null() {
            out.push((*node).data);
            node = (*node).next;
        }
        out
    }

    /// Free the nodes (not the payloads)
    ///
    /// # Safety
    /// `head` must be null or a list built by `from_payloads`, not yet freed.
    pub unsafe fn free(head: *mut NativeList) {
        let mut node = head;
        while !node.is_null() {
            let boxed = Box::from_raw(node);
            node = boxed.next;
        }
    }
}

/// Flat hash table of pointer-sized keys and values
#[derive(Debug, Default)]
pub struct NativeHashTable {
    entries: Vec<(*mut c_void, *mut c_void)>,
}

impl NativeHashTable {
    pub fn new() -> *mut NativeHashTable {
        Box::into_raw(Box::default())
    }

    /// Insert or replace the value for `key`
    pub fn insert(&mut self, key: *mut c_void, value: *mut c_void) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn entries(&self) -> &[(*mut c_void, *mut c_void)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Free the table (not keys or values)
    ///
    /// # Safety
    /// `table` must be null or come from `NativeHashTable::new`.
    pub unsafe fn free(table: *mut NativeHashTable) {
        if !table.is_null() {
            drop(Box::from_raw(table));
        }
    }
}

/// Error record a throwing native callable stores in its error slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    pub domain: String,
    pub code: i32,
    pub message: String,
}

impl NativeError {
    pub fn new(domain: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            code,
            message: message.into(),
        }
    }

    /// Store `self` into an error slot, the way native callees report failure
    ///
    /// # Safety
    /// `slot` must be null or valid for one pointer write.
    pub unsafe fn raise(self, slot: *mut *mut NativeError) {
        if !slot.is_null() {
            *slot = Box::into_raw(Box::new(self));
        }
    }

    /// Take ownership of a raised error
    ///
    /// # Safety
    /// `ptr` must be null or have been stored by `raise`.
    pub unsafe fn take(ptr: *mut NativeError) -> Option<NativeError> {
        if ptr.is_null() {
            None
        } else {
            Some(*Box::from_raw(ptr))
        }
    }
}
