//! Script-side values
//!
//! Design: a small, thread-safe value model standing in for the scripting
//! runtime's object model. Heap payloads are `Arc`ed so cloning a value is a
//! reference-count bump, the equivalent of taking a new strong reference.

use crate::errors::{MarshalError, Result};
use crate::marshal::boxed::StructInstance;
use crate::marshal::container::ArrayView;
use crate::marshal::wrapper::Wrapper;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Immutable text with a NUL-terminated internal buffer
///
/// Borrowed marshaling hands out a pointer into this buffer, so it has to be
/// C-compatible without copying.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Text(Arc<str>);

impl Text {
    pub fn new(text: &str) -> Self {
        let mut buf = String::with_capacity(text.len() + 1);
        buf.push_str(text);
        buf.push('\0');
        Self(Arc::from(buf))
    }

    pub fn as_str(&self) -> &str {
        &self.0[..self.0.len() - 1]
    }

    /// Pointer to the NUL-terminated buffer, valid while `self` is alive
    pub fn as_ptr(&self) -> *const u8 {
        self.0.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.0.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Embedded NULs cannot be represented as a C string
    pub fn has_interior_nul(&self) -> bool {
        self.as_str().contains('\0')
    }
}

impl fmt::Debug for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

/// Immutable byte string with a trailing NUL in its internal buffer
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ByteString(Arc<[u8]>);

impl ByteString {
    pub fn new(bytes: &[u8]) -> Self {
        let mut buf = Vec::with_capacity(bytes.len() + 1);
        buf.extend_from_slice(bytes);
        buf.push(0);
        Self(Arc::from(buf))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..self.0.len() - 1]
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.0.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.0.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_interior_nul(&self) -> bool {
        self.as_bytes().contains(&0)
    }
}

impl fmt::Debug for ByteString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{:?}", String::from_utf8_lossy(self.as_bytes()))
    }
}

/// A script-level callable
pub trait ScriptCallable: Send + Sync {
    fn call(&self, args: &[Value]) -> Result<Value>;

    fn name(&self) -> &str {
        "<callable>"
    }
}

/// Rust closure exposed as a script callable
pub struct FnCallable<F> {
    name: String,
    func: F,
}

impl<F> ScriptCallable for FnCallable<F>
where
    F: Fn(&[Value]) -> Result<Value> + Send + Sync,
{
    fn call(&self, args: &[Value]) -> Result<Value> {
        (self.func)(args)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Universal script value
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i128),
    Float(f64),
    Str(Text),
    Bytes(ByteString),
    List(Arc<[Value]>),
    Tuple(Arc<[Value]>),
    /// Insertion-ordered mapping
    Dict(Arc<[(Value, Value)]>),
    Callable(Arc<dyn ScriptCallable>),
    Struct(Arc<StructInstance>),
    Wrapper(Arc<Wrapper>),
    /// Zero-copy view over native array memory
    Buffer(Arc<ArrayView>),
    /// Foreign object understood by a registered adapter
    Opaque(Arc<dyn Any + Send + Sync>),
    /// Placeholder substituted for an omitted optional argument
    Default,
}

impl Value {
    pub fn str(text: &str) -> Self {
        Self::Str(Text::new(text))
    }

    pub fn bytes(bytes: &[u8]) -> Self {
        Self::Bytes(ByteString::new(bytes))
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Self::List(items.into_iter().collect())
    }

    pub fn tuple(items: impl IntoIterator<Item = Value>) -> Self {
        Self::Tuple(items.into_iter().collect())
    }

    pub fn dict(items: impl IntoIterator<Item = (Value, Value)>) -> Self {
        Self::Dict(items.into_iter().collect())
    }

    pub fn function<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self::Callable(Arc::new(FnCallable {
            name: name.into(),
            func,
        }))
    }

    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Self::Opaque(Arc::new(value))
    }

    /// Parse an integer literal: optional sign, then decimal or a
    /// `0x`/`0o`/`0b` prefixed digit string (underscores allowed)
    pub fn parse_int(literal: &str) -> Result<Self> {
        let trimmed = literal.trim();
        let (negative, body) = match trimmed.as_bytes().first() {
            Some(b'-') => (true, &trimmed[1..]),
            Some(b'+') => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };
        let lower = body.to_ascii_lowercase();
        let (radix, digits) = if let Some(rest) = lower.strip_prefix("0x") {
            (16, rest)
        } else if let Some(rest) = lower.strip_prefix("0o") {
            (8, rest)
        } else if let Some(rest) = lower.strip_prefix("0b") {
            (2, rest)
        } else {
            (10, lower.as_str())
        };
        let digits: String = digits.chars().filter(|c| *c != '_').collect();
        let magnitude = i128::from_str_radix(&digits, radix)
            .map_err(|_| MarshalError::value(format!("invalid integer literal: '{}'", literal)))?;
        Ok(Self::Int(if negative { -magnitude } else { magnitude }))
    }

    /// Script-visible type name, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Callable(_) => "function",
            Self::Struct(_) => "Struct",
            Self::Wrapper(_) => "Wrapper",
            Self::Buffer(_) => "Array",
            Self::Opaque(_) => "object",
            Self::Default => "default",
        }
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    #[inline]
    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }

    #[inline]
    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Callable(_))
    }

    /// Truthiness with the usual dynamic-language rules
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None | Self::Default => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Bytes(b) => !b.is_empty(),
            Self::List(items) | Self::Tuple(items) => !items.is_empty(),
            Self::Dict(items) => !items.is_empty(),
            Self::Buffer(view) => view.len() != 0,
            Self::Callable(_) | Self::Struct(_) | Self::Wrapper(_) | Self::Opaque(_) => true,
        }
    }

    /// Elements of an iterable-like value, `None` if it is not iterable
    pub fn elements(&self) -> Option<Vec<Value>> {
        match self {
            Self::List(items) | Self::Tuple(items) => Some(items.to_vec()),
            Self::Dict(items) => Some(items.iter().map(|(k, _)| k.clone()).collect()),
            Self::Str(text) => Some(
                text.as_str()
                    .chars()
                    .map(|c| Value::str(c.encode_utf8(&mut [0u8; 4])))
                    .collect(),
            ),
            Self::Bytes(bytes) => Some(bytes.as_bytes().iter().map(|b| Value::Int(*b as i128)).collect()),
            Self::Buffer(view) => Some((0..view.len()).map(|i| view.get(i)).collect()),
            _ => None,
        }
    }

    /// Key/value pairs of a mapping
    pub fn items(&self) -> Option<&[(Value, Value)]> {
        match self {
            Self::Dict(items) => Some(&items[..]),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i128> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Bool(b) => Some(*b as i128),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            Self::Bool(b) => Some(*b as i32 as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(text) => Some(text.as_str()),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{:?}", x),
            Self::Str(text) => write!(f, "{:?}", text),
            Self::Bytes(bytes) => write!(f, "{:?}", bytes),
            Self::List(items) => f.debug_list().entries(items.iter()).finish(),
            Self::Tuple(items) => {
                let mut t = f.debug_tuple("");
                for item in items.iter() {
                    t.field(item);
                }
                t.finish()
            }
            Self::Dict(items) => f
                .debug_map()
                .entries(items.iter().map(|(k, v)| (k, v)))
                .finish(),
            Self::Callable(c) => write!(f, "<function {}>", c.name()),
            Self::Struct(s) => write!(f, "{:?}", s),
            Self::Wrapper(w) => write!(f, "{}", w),
            Self::Buffer(view) => write!(f, "{:?}", view),
            Self::Opaque(_) => f.write_str("<object>"),
            Self::Default => f.write_str("<default>"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) | (Self::Default, Self::Default) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => *a as f64 == *b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::List(a), Self::List(b)) | (Self::Tuple(a), Self::Tuple(b)) => a == b,
            (Self::Dict(a), Self::Dict(b)) => a == b,
            (Self::Callable(a), Self::Callable(b)) => Arc::ptr_eq(a, b),
            (Self::Struct(a), Self::Struct(b)) => a.as_ptr() == b.as_ptr(),
            (Self::Wrapper(a), Self::Wrapper(b)) => a.peek_wrapped() == b.peek_wrapped(),
            (Self::Buffer(a), Self::Buffer(b)) => Arc::ptr_eq(a, b),
            (Self::Opaque(a), Self::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(i: $t) -> Self {
                Self::Int(i as i128)
            }
        })*
    };
}

impl_from_int!(i8, u8, i16, u16, i32, u32, i64, u64, isize, usize);

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Self::Float(f as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::str(&s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items.into())
    }
}
