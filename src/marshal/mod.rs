//! Marshalers - script ↔ native conversions
//!
//! Design: every type descriptor is classified once, at cache-build time, into
//! a `MarshalFamily`. The family resolves to a table of plain function
//! pointers which the ArgCache stores, so the per-call path never switches on
//! types again.
//!
//! Architecture:
//! - `basic.rs` - booleans, integers, floats, enums, flags, raw pointers
//! - `string.rs` - utf8 and filename strings
//! - `container.rs` - C arrays, sized arrays, lists, hash tables, `ArrayView`
//! - `boxed.rs` - structs by reference, foreign structs, `StructInstance`
//! - `wrapper.rs` - reference-counted objects, `Wrapper`
//! - `callback.rs` - script callables passed as native callbacks

pub mod basic;
pub mod boxed;
pub mod callback;
pub mod container;
pub mod string;
pub mod wrapper;

use crate::cache::ArgCache;
use crate::core::memory::{NativeArray, NativeHashTable, NativeList};
use crate::core::{NativeArg, TypeDescriptor, TypeTag, Value};
use crate::errors::{MarshalError, Result};
use crate::introspection::InterfaceInfo;
use crate::invoke::InvokeState;
use core::ffi::c_void;
use std::fmt;
use std::sync::Arc;

pub use boxed::{ForeignRegistry, ForeignStructAdapter, StructInstance};
pub use container::ArrayView;
pub use wrapper::{Wrapper, WrapperClass, WrapperFuncs, WrapperRegistry};

/// Script → native conversion
pub type ConvertInFn = fn(&mut InvokeState<'_>, &ArgCache, &Value) -> Result<(NativeArg, CleanupData)>;

/// Native → script conversion
pub type ConvertOutFn = fn(&InvokeState<'_>, &ArgCache, NativeArg) -> Result<Value>;

/// Release whatever `ConvertInFn` recorded; `was_processed` is false when the
/// native call never happened
pub type CleanupFn = fn(&InvokeState<'_>, &ArgCache, CleanupData, bool);

/// Transient resources created by one `convert_in`
pub enum CleanupData {
    None,
    /// Script value kept alive while native code borrows its buffer
    Borrowed(Value),
    /// C heap block (`malloc`)
    Allocation(*mut c_void),
    /// Copied boxed struct or object reference, released with its own free function
    Boxed(*mut c_void, WrapperFuncs),
    /// Native struct produced by a foreign adapter
    Foreign(*mut c_void, Arc<dyn ForeignStructAdapter>),
    CArray(*mut c_void, Vec<CleanupData>),
    SizedArray(*mut NativeArray, Vec<CleanupData>),
    List(*mut NativeList, Vec<CleanupData>),
    Hash(*mut NativeHashTable, Vec<CleanupData>),
    /// Live closure id
    Closure(u64),
}

impl CleanupData {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Debug for CleanupData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Borrowed(v) => write!(f, "Borrowed({:?})", v),
            Self::Allocation(p) => write!(f, "Allocation({:p})", p),
            Self::Boxed(p, _) => write!(f, "Boxed({:p})", p),
            Self::Foreign(p, _) => write!(f, "Foreign({:p})", p),
            Self::CArray(p, e) => write!(f, "CArray({:p}, {} elements)", p, e.len()),
            Self::SizedArray(p, e) => write!(f, "SizedArray({:p}, {} elements)", p, e.len()),
            Self::List(p, e) => write!(f, "List({:p}, {} elements)", p, e.len()),
            Self::Hash(p, e) => write!(f, "Hash({:p}, {} entries)", p, e.len() / 2),
            Self::Closure(id) => write!(f, "Closure({})", id),
        }
    }
}

/// Conversion strategy selected for a type descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarshalFamily {
    Void,
    Basic,
    Enum,
    Flags,
    /// Untyped `gpointer`
    Pointer,
    Utf8,
    CArray,
    SizedArray,
    List,
    Hash,
    Struct,
    Foreign,
    Object,
    Callback,
}

/// Capability set of one family
#[derive(Clone, Copy)]
pub struct Marshaler {
    pub convert_in: Option<ConvertInFn>,
    pub convert_out: Option<ConvertOutFn>,
    pub cleanup: Option<CleanupFn>,
}

impl MarshalFamily {
    /// Entry points implementing this family
    pub fn marshaler(self) -> Marshaler {
        match self {
            Self::Void => Marshaler {
                convert_in: Some(basic::void_in),
                convert_out: Some(basic::void_out),
                cleanup: None,
            },
            Self::Basic => Marshaler {
                convert_in: Some(basic::scalar_in),
                convert_out: Some(basic::scalar_out),
                cleanup: None,
            },
            Self::Enum | Self::Flags => Marshaler {
                convert_in: Some(basic::enum_in),
                convert_out: Some(basic::enum_out),
                cleanup: None,
            },
            Self::Pointer => Marshaler {
                convert_in: Some(basic::pointer_in),
                convert_out: Some(basic::pointer_out),
                cleanup: None,
            },
            Self::Utf8 => Marshaler {
                convert_in: Some(string::utf8_in),
                convert_out: Some(string::utf8_out),
                cleanup: Some(string::utf8_cleanup),
            },
            Self::CArray | Self::SizedArray => Marshaler {
                convert_in: Some(container::array_in),
                convert_out: Some(container::array_out),
                cleanup: Some(container::container_cleanup),
            },
            Self::List => Marshaler {
                convert_in: Some(container::list_in),
                convert_out: Some(container::list_out),
                cleanup: Some(container::container_cleanup),
            },
            Self::Hash => Marshaler {
                convert_in: Some(container::hash_in),
                convert_out: Some(container::hash_out),
                cleanup: Some(container::container_cleanup),
            },
            Self::Struct => Marshaler {
                convert_in: Some(boxed::struct_in),
                convert_out: Some(boxed::struct_out),
                cleanup: Some(boxed::struct_cleanup),
            },
            Self::Foreign => Marshaler {
                convert_in: Some(boxed::foreign_in),
                convert_out: Some(boxed::foreign_out),
                cleanup: Some(boxed::struct_cleanup),
            },
            Self::Object => Marshaler {
                convert_in: Some(wrapper::object_in),
                convert_out: Some(wrapper::object_out),
                cleanup: Some(wrapper::object_cleanup),
            },
            Self::Callback => Marshaler {
                convert_in: Some(callback::callback_in),
                convert_out: Some(callback::callback_out),
                cleanup: Some(callback::callback_cleanup),
            },
        }
    }

    /// Whether values of this family travel as native pointers
    pub const fn is_pointer(self) -> bool {
        !matches!(self, Self::Void | Self::Basic | Self::Enum | Self::Flags)
    }
}

/// Map a type descriptor to exactly one conversion family
pub fn classify(ty: &TypeDescriptor) -> Result<MarshalFamily> {
    match ty.tag {
        TypeTag::Void if ty.is_pointer => Ok(MarshalFamily::Pointer),
        TypeTag::Void => Ok(MarshalFamily::Void),
        TypeTag::Boolean
        | TypeTag::Int8
        | TypeTag::UInt8
        | TypeTag::Int16
        | TypeTag::UInt16
        | TypeTag::Int32
        | TypeTag::UInt32
        | TypeTag::Int64
        | TypeTag::UInt64
        | TypeTag::Float
        | TypeTag::Double => Ok(MarshalFamily::Basic),
        TypeTag::Utf8 | TypeTag::Filename => Ok(MarshalFamily::Utf8),
        TypeTag::Array => match &ty.array {
            Some(array) => match (array.kind, array.length) {
                (crate::core::ArrayKind::C, None) => Err(MarshalError::invalid_config(
                    "C array needs a fixed size, a zero terminator or a length argument",
                )),
                (crate::core::ArrayKind::C, Some(_)) => Ok(MarshalFamily::CArray),
                (crate::core::ArrayKind::Sized, _) => Ok(MarshalFamily::SizedArray),
            },
            None => Err(MarshalError::unsupported(ty.display_name())),
        },
        TypeTag::GList | TypeTag::GSList => match ty.element() {
            Some(_) => Ok(MarshalFamily::List),
            None => Err(MarshalError::unsupported(ty.display_name())),
        },
        TypeTag::GHash => match ty.hash_params() {
            Some(_) => Ok(MarshalFamily::Hash),
            None => Err(MarshalError::unsupported(ty.display_name())),
        },
        TypeTag::Interface => match &ty.interface {
            Some(InterfaceInfo::Struct(info)) | Some(InterfaceInfo::Union(info)) => {
                if info.foreign {
                    Ok(MarshalFamily::Foreign)
                } else {
                    Ok(MarshalFamily::Struct)
                }
            }
            Some(InterfaceInfo::Object(_)) => Ok(MarshalFamily::Object),
            Some(InterfaceInfo::Enum(_)) => Ok(MarshalFamily::Enum),
            Some(InterfaceInfo::Flags(_)) => Ok(MarshalFamily::Flags),
            Some(InterfaceInfo::Callback(_)) => Ok(MarshalFamily::Callback),
            Some(InterfaceInfo::Interface { .. }) | None => {
                Err(MarshalError::unsupported(ty.display_name()))
            }
        },
    }
}

#[cfg(test)]
mod tests;
