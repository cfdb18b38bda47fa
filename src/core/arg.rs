//! Native argument slot
//!
//! Design: one untagged 8-byte union per native argument, the tag lives in the
//! ArgCache so the hot path never re-inspects types.

use super::types::TypeTag;
use core::ffi::c_void;

/// Native value container (untagged union)
#[repr(C)]
pub union NativeArg {
    pub v_boolean: bool,
    pub v_int8: i8,
    pub v_uint8: u8,
    pub v_int16: i16,
    pub v_uint16: u16,
    pub v_int32: i32,
    pub v_uint32: u32,
    pub v_int64: i64,
    pub v_uint64: u64,
    pub v_float: f32,
    pub v_double: f64,
    pub v_size: usize,
    pub v_pointer: *mut c_void,
}

impl NativeArg {
    /// All-zero slot (null pointer, 0, false)
    #[inline]
    pub const fn zeroed() -> Self {
        Self { v_uint64: 0 }
    }

    #[inline]
    pub const fn null() -> Self {
        Self::zeroed()
    }

    #[inline]
    pub fn from_ptr<T>(ptr: *mut T) -> Self {
        let mut arg = Self::zeroed();
        arg.v_pointer = ptr.cast();
        arg
    }

    #[inline]
    pub fn pointer(&self) -> *mut c_void {
        // SAFETY: every bit pattern is a valid pointer value
        unsafe { self.v_pointer }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.pointer().is_null()
    }

    /// Raw 64-bit payload, used for equality in tests and diagnostics
    #[inline]
    pub fn bits(&self) -> u64 {
        // SAFETY: the union is always fully initialised through `zeroed`
        unsafe { self.v_uint64 }
    }

    /// Build a slot holding an integer of width `tag`, truncating `value`
    ///
    /// Callers range-check beforehand; this only picks the member.
    pub fn from_integer(tag: TypeTag, value: i128) -> Self {
        let mut arg = Self::zeroed();
        match tag {
            TypeTag::Boolean => arg.v_boolean = value != 0,
            TypeTag::Int8 => arg.v_int8 = value as i8,
            TypeTag::UInt8 => arg.v_uint8 = value as u8,
            TypeTag::Int16 => arg.v_int16 = value as i16,
            TypeTag::UInt16 => arg.v_uint16 = value as u16,
            TypeTag::Int32 => arg.v_int32 = value as i32,
            TypeTag::UInt32 => arg.v_uint32 = value as u32,
            TypeTag::Int64 => arg.v_int64 = value as i64,
            TypeTag::UInt64 => arg.v_uint64 = value as u64,
            _ => arg.v_size = value as usize,
        }
        arg
    }

    /// Read the slot as an integer of width `tag`
    pub fn to_integer(&self, tag: TypeTag) -> i128 {
        // SAFETY: reading the member that matches `tag`; all are plain data
        unsafe {
            match tag {
                TypeTag::Boolean => (self.v_uint8 != 0) as i128,
                TypeTag::Int8 => self.v_int8 as i128,
                TypeTag::UInt8 => self.v_uint8 as i128,
                TypeTag::Int16 => self.v_int16 as i128,
                TypeTag::UInt16 => self.v_uint16 as i128,
                TypeTag::Int32 => self.v_int32 as i128,
                TypeTag::UInt32 => self.v_uint32 as i128,
                TypeTag::Int64 => self.v_int64 as i128,
                TypeTag::UInt64 => self.v_uint64 as i128,
                _ => self.v_size as i128,
            }
        }
    }

    /// Pack a scalar into a pointer-sized payload, as stored in list nodes
    pub fn to_pointer_payload(&self, size: usize) -> *mut c_void {
        // SAFETY: reads the low bytes of the slot matching its storage size
        unsafe {
            match size {
                1 => self.v_uint8 as usize as *mut c_void,
                2 => self.v_uint16 as usize as *mut c_void,
                4 => self.v_uint32 as usize as *mut c_void,
                _ => self.v_pointer,
            }
        }
    }

    /// Inverse of `to_pointer_payload`
    pub fn from_pointer_payload(ptr: *mut c_void, size: usize) -> Self {
        let raw = ptr as usize;
        let mut arg = Self::zeroed();
        match size {
            1 => arg.v_uint8 = raw as u8,
            2 => arg.v_uint16 = raw as u16,
            4 => arg.v_uint32 = raw as u32,
            _ => arg.v_pointer = ptr,
        }
        arg
    }

    /// Store the low `size` bytes of the slot at `dst`
    ///
    /// # Safety
    /// `dst` must be valid for writes of `size` bytes.
    pub unsafe fn write_to(&self, dst: *mut u8, size: usize) {
        match size {
            0 => {}
            1 => dst.write_unaligned(self.v_uint8),
            2 => (dst as *mut u16).write_unaligned(self.v_uint16),
            4 => (dst as *mut u32).write_unaligned(self.v_uint32),
            _ => (dst as *mut u64).write_unaligned(self.v_uint64),
        }
    }

    /// Load a value of `size` bytes from `src`
    ///
    /// # Safety
    /// `src` must be valid for reads of `size` bytes.
    pub unsafe fn read_from(src: *const u8, size: usize) -> Self {
        let mut arg = Self::zeroed();
        match size {
            0 => {}
            1 => arg.v_uint8 = src.read_unaligned(),
            2 => arg.v_uint16 = (src as *const u16).read_unaligned(),
            4 => arg.v_uint32 = (src as *const u32).read_unaligned(),
            _ => arg.v_uint64 = (src as *const u64).read_unaligned(),
        }
        arg
    }
}

impl Default for NativeArg {
    #[inline]
    fn default() -> Self {
        Self::zeroed()
    }
}

// Manual implementations for Copy, Clone, and Debug since union doesn't auto-derive
impl Copy for NativeArg {}
impl Clone for NativeArg {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl core::fmt::Debug for NativeArg {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "NativeArg({:#018x})", self.bits())
    }
}

impl PartialEq for NativeArg {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

// Slots only cross threads inside a single call; pointees are owned by the call
unsafe impl Send for NativeArg {}
unsafe impl Sync for NativeArg {}
