//! Type descriptors consumed from introspection metadata
//!
//! Design: descriptors are cheap to clone (interface payloads are `Arc`ed) and
//! carry everything cache construction needs, so no repository round-trips
//! happen on the per-call path.

use crate::introspection::InterfaceInfo;
use std::fmt;

/// Primitive kind of a type descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeTag {
    Void,
    Boolean,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    Utf8,
    Filename,
    Array,
    GList,
    GSList,
    GHash,
    Interface,
}

impl TypeTag {
    /// Check if tag is an integer of any width
    #[inline]
    pub const fn is_integral(self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::UInt8
                | Self::Int16
                | Self::UInt16
                | Self::Int32
                | Self::UInt32
                | Self::Int64
                | Self::UInt64
        )
    }

    /// Check if tag is floating point
    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }

    /// Check if tag is a plain numeric scalar (no boolean)
    #[inline]
    pub const fn is_numeric(self) -> bool {
        self.is_integral() || self.is_float()
    }

    /// Check if tag is a container
    #[inline]
    pub const fn is_container(self) -> bool {
        matches!(self, Self::Array | Self::GList | Self::GSList | Self::GHash)
    }

    /// Size in bytes of a value of this tag when stored inline in native memory
    ///
    /// Everything that is not a scalar is stored as a pointer.
    #[inline]
    pub const fn storage_size(self) -> usize {
        match self {
            Self::Void => 0,
            Self::Boolean | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float => 4,
            Self::Int64 | Self::UInt64 | Self::Double => 8,
            _ => core::mem::size_of::<usize>(),
        }
    }

    /// Lowercase tag name, used in diagnostics
    pub const fn name(self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Boolean => "boolean",
            Self::Int8 => "int8",
            Self::UInt8 => "uint8",
            Self::Int16 => "int16",
            Self::UInt16 => "uint16",
            Self::Int32 => "int32",
            Self::UInt32 => "uint32",
            Self::Int64 => "int64",
            Self::UInt64 => "uint64",
            Self::Float => "float",
            Self::Double => "double",
            Self::Utf8 => "utf8",
            Self::Filename => "filename",
            Self::Array => "array",
            Self::GList => "glist",
            Self::GSList => "gslist",
            Self::GHash => "ghash",
            Self::Interface => "interface",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which way values flow through an argument slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    FromScript,
    ToScript,
    Bidirectional,
}

impl Direction {
    #[inline]
    pub const fn is_from_script(self) -> bool {
        matches!(self, Self::FromScript | Self::Bidirectional)
    }

    #[inline]
    pub const fn is_to_script(self) -> bool {
        matches!(self, Self::ToScript | Self::Bidirectional)
    }

    /// Swap sides, used for callback signatures where native code is the caller
    #[inline]
    pub const fn reversed(self) -> Self {
        match self {
            Self::FromScript => Self::ToScript,
            Self::ToScript => Self::FromScript,
            Self::Bidirectional => Self::Bidirectional,
        }
    }
}

/// Ownership transfer policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transfer {
    /// Caller retains ownership
    Nothing,
    /// Container ownership moves, elements do not
    Container,
    /// Full ownership moves
    Everything,
}

impl Transfer {
    /// Transfer applied to the elements of a container with this transfer
    #[inline]
    pub const fn for_elements(self) -> Self {
        match self {
            Self::Everything => Self::Everything,
            Self::Nothing | Self::Container => Self::Nothing,
        }
    }
}

/// Lifetime rule of a callback closure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeType {
    /// Freed once the native call returns
    Call,
    /// Freed by an explicit destroy notification
    Notified,
    /// Freed after the first dispatch back into script code
    Async,
}

/// Kind of C-style array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayKind {
    /// Bare element buffer; length comes from `ArrayLength`
    C,
    /// Self-describing refcounted array (`NativeArray`)
    Sized,
}

/// How the element count of a C array is known
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayLength {
    /// Compile-time constant element count
    Fixed(usize),
    /// Terminated by a zeroed element
    ZeroTerminated,
    /// Carried by another argument, given as its metadata argument index
    Indexed(usize),
}

/// Array sub-description
#[derive(Debug, Clone)]
pub struct ArrayType {
    pub kind: ArrayKind,
    /// Required for `ArrayKind::C`, ignored for sized arrays
    pub length: Option<ArrayLength>,
    pub element: Box<TypeDescriptor>,
}

/// Abstract type descriptor from the introspection repository
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub tag: TypeTag,
    pub is_pointer: bool,
    pub array: Option<ArrayType>,
    /// Element type for lists, key/value types for hash tables
    pub params: Vec<TypeDescriptor>,
    pub interface: Option<InterfaceInfo>,
}

impl TypeDescriptor {
    /// Scalar or string descriptor
    pub fn new(tag: TypeTag) -> Self {
        Self {
            tag,
            is_pointer: matches!(tag, TypeTag::Utf8 | TypeTag::Filename) || tag.is_container(),
            array: None,
            params: Vec::new(),
            interface: None,
        }
    }

    /// Untyped native pointer (`void*`)
    pub fn pointer() -> Self {
        Self {
            is_pointer: true,
            ..Self::new(TypeTag::Void)
        }
    }

    /// C array of `element`
    pub fn c_array(element: TypeDescriptor, length: ArrayLength) -> Self {
        Self {
            array: Some(ArrayType {
                kind: ArrayKind::C,
                length: Some(length),
                element: Box::new(element),
            }),
            ..Self::new(TypeTag::Array)
        }
    }

    /// Self-sized refcounted array of `element`
    pub fn sized_array(element: TypeDescriptor) -> Self {
        Self {
            array: Some(ArrayType {
                kind: ArrayKind::Sized,
                length: None,
                element: Box::new(element),
            }),
            ..Self::new(TypeTag::Array)
        }
    }

    /// Doubly (`GList`) or singly (`GSList`) linked list of `element`
    pub fn list(tag: TypeTag, element: TypeDescriptor) -> Self {
        debug_assert!(matches!(tag, TypeTag::GList | TypeTag::GSList));
        Self {
            params: vec![element],
            ..Self::new(tag)
        }
    }

    /// Hash table from `key` to `value`
    pub fn hash(key: TypeDescriptor, value: TypeDescriptor) -> Self {
        Self {
            params: vec![key, value],
            ..Self::new(TypeTag::GHash)
        }
    }

    /// Interface (struct, object, enum, callback, ...) descriptor
    pub fn interface(info: InterfaceInfo) -> Self {
        let is_pointer = info.is_passed_by_pointer();
        Self {
            tag: TypeTag::Interface,
            is_pointer,
            array: None,
            params: Vec::new(),
            interface: Some(info),
        }
    }

    /// Element type of a list or array
    pub fn element(&self) -> Option<&TypeDescriptor> {
        match self.tag {
            TypeTag::Array => self.array.as_ref().map(|a| a.element.as_ref()),
            TypeTag::GList | TypeTag::GSList => self.params.first(),
            _ => None,
        }
    }

    /// Key and value types of a hash table
    pub fn hash_params(&self) -> Option<(&TypeDescriptor, &TypeDescriptor)> {
        match (self.tag, self.params.as_slice()) {
            (TypeTag::GHash, [key, value]) => Some((key, value)),
            _ => None,
        }
    }

    /// Native storage size of one value of this type
    pub fn storage_size(&self) -> usize {
        match (&self.interface, self.is_pointer) {
            (Some(_), true) => core::mem::size_of::<usize>(),
            // enums and flags are stored as 32-bit integers
            (Some(_), false) => 4,
            (None, _) => self.tag.storage_size(),
        }
    }

    /// Human readable name for diagnostics
    pub fn display_name(&self) -> String {
        match (&self.interface, self.element()) {
            (Some(info), _) => info.qualified_name(),
            (None, Some(elem)) => format!("{}[{}]", self.tag, elem.display_name()),
            (None, None) => match self.hash_params() {
                Some((k, v)) => format!("ghash[{}, {}]", k.display_name(), v.display_name()),
                None if self.tag == TypeTag::Void && self.is_pointer => "gpointer".to_string(),
                None => self.tag.name().to_string(),
            },
        }
    }
}

impl From<TypeTag> for TypeDescriptor {
    fn from(tag: TypeTag) -> Self {
        Self::new(tag)
    }
}
