//! Introspection records: callables, arguments, structs, objects, enums
//!
//! These are plain data handed out by a `Repository`. Builder-style
//! constructors keep hand-written metadata (bindings, tests) short.

use crate::core::types::{Direction, ScopeType, Transfer, TypeDescriptor, TypeTag};
use crate::marshal::wrapper::WrapperFuncs;
use std::sync::Arc;

/// What kind of callable a signature describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    Function,
    Method,
    Constructor,
    VFunc,
    /// Signature of a native callback type; native code is the caller
    Callback,
}

impl FunctionKind {
    /// Whether an implicit instance argument precedes the declared arguments
    #[inline]
    pub const fn has_instance(self) -> bool {
        matches!(self, Self::Method | Self::VFunc)
    }
}

/// One declared argument of a callable
#[derive(Debug, Clone)]
pub struct ArgInfo {
    pub name: String,
    pub ty: TypeDescriptor,
    pub direction: Direction,
    pub transfer: Transfer,
    pub may_be_null: bool,
    pub optional: bool,
    pub scope: ScopeType,
    /// Index of the user-data argument paired with this callback
    pub closure: Option<usize>,
    /// Index of the destroy-notify argument paired with this callback
    pub destroy: Option<usize>,
}

impl ArgInfo {
    pub fn new(name: impl Into<String>, ty: impl Into<TypeDescriptor>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            direction: Direction::FromScript,
            transfer: Transfer::Nothing,
            may_be_null: false,
            optional: false,
            scope: ScopeType::Call,
            closure: None,
            destroy: None,
        }
    }

    pub fn out(mut self) -> Self {
        self.direction = Direction::ToScript;
        self
    }

    pub fn inout(mut self) -> Self {
        self.direction = Direction::Bidirectional;
        self
    }

    pub fn with_transfer(mut self, transfer: Transfer) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.may_be_null = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Mark as a callback with the given scope and companion argument indices
    pub fn with_scope(mut self, scope: ScopeType) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_closure(mut self, index: usize) -> Self {
        self.closure = Some(index);
        self
    }

    pub fn with_destroy(mut self, index: usize) -> Self {
        self.destroy = Some(index);
        self
    }
}

/// Signature of a function, method, constructor, vfunc or callback type
#[derive(Debug, Clone)]
pub struct CallableInfo {
    pub namespace: String,
    pub name: String,
    /// Native symbol to resolve through the backend
    pub symbol: String,
    pub kind: FunctionKind,
    /// Type of the implicit instance for methods and vfuncs
    pub container: Option<InterfaceInfo>,
    pub args: Vec<ArgInfo>,
    pub return_type: TypeDescriptor,
    pub return_transfer: Transfer,
    pub may_return_null: bool,
    pub skip_return: bool,
    /// Reports failures through a trailing native error slot
    pub throws: bool,
}

impl CallableInfo {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, kind: FunctionKind) -> Self {
        let namespace = namespace.into();
        let name = name.into();
        let symbol = format!("{}_{}", namespace.to_lowercase(), name);
        Self {
            namespace,
            name,
            symbol,
            kind,
            container: None,
            args: Vec::new(),
            return_type: TypeDescriptor::new(TypeTag::Void),
            return_transfer: Transfer::Nothing,
            may_return_null: false,
            skip_return: false,
            throws: false,
        }
    }

    pub fn function(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(namespace, name, FunctionKind::Function)
    }

    pub fn method(
        namespace: impl Into<String>,
        name: impl Into<String>,
        container: InterfaceInfo,
    ) -> Self {
        let mut info = Self::new(namespace, name, FunctionKind::Method);
        info.symbol = format!(
            "{}_{}_{}",
            info.namespace.to_lowercase(),
            container.name().to_lowercase(),
            info.name
        );
        info.container = Some(container);
        info
    }

    pub fn callback(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(namespace, name, FunctionKind::Callback)
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = symbol.into();
        self
    }

    pub fn arg(mut self, arg: ArgInfo) -> Self {
        self.args.push(arg);
        self
    }

    pub fn returns(mut self, ty: impl Into<TypeDescriptor>, transfer: Transfer) -> Self {
        self.return_type = ty.into();
        self.return_transfer = transfer;
        self
    }

    pub fn returns_nullable(mut self) -> Self {
        self.may_return_null = true;
        self
    }

    pub fn throws(mut self) -> Self {
        self.throws = true;
        self
    }

    pub fn skip_return(mut self) -> Self {
        self.skip_return = true;
        self
    }

    /// `Namespace.name`, used as cache key and in diagnostics
    pub fn qualified_name(&self) -> String {
        match &self.container {
            Some(container) => format!("{}.{}.{}", self.namespace, container.name(), self.name),
            None => format!("{}.{}", self.namespace, self.name),
        }
    }
}

/// One field of a native struct
#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    pub offset: usize,
    pub ty: TypeDescriptor,
    pub writable: bool,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, offset: usize, ty: impl Into<TypeDescriptor>) -> Self {
        Self {
            name: name.into(),
            offset,
            ty: ty.into(),
            writable: true,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }
}

/// Struct or union layout
#[derive(Debug, Clone)]
pub struct StructInfo {
    pub namespace: String,
    pub name: String,
    pub size: usize,
    pub fields: Vec<FieldInfo>,
    /// Converted through a registered `ForeignStructAdapter`
    pub foreign: bool,
    /// Copy/free pair for boxed types; plain structs are memcpy'd and freed
    pub funcs: Option<WrapperFuncs>,
}

impl StructInfo {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, size: usize) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            size,
            fields: Vec::new(),
            foreign: false,
            funcs: None,
        }
    }

    pub fn field(mut self, field: FieldInfo) -> Self {
        self.fields.push(field);
        self
    }

    pub fn boxed(mut self, funcs: WrapperFuncs) -> Self {
        self.funcs = Some(funcs);
        self
    }

    pub fn foreign(mut self) -> Self {
        self.foreign = true;
        self
    }

    pub fn find_field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

/// Reference-counted native object class
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub namespace: String,
    pub name: String,
    /// Registered native type name
    pub type_name: String,
    pub parent: Option<Arc<ObjectInfo>>,
    /// Ref/unref pair
    pub funcs: WrapperFuncs,
    pub signals: Vec<Arc<CallableInfo>>,
}

impl ObjectInfo {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, funcs: WrapperFuncs) -> Self {
        let namespace = namespace.into();
        let name = name.into();
        Self {
            type_name: format!("{}{}", namespace, name),
            namespace,
            name,
            parent: None,
            funcs,
            signals: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent: Arc<ObjectInfo>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn signal(mut self, signal: CallableInfo) -> Self {
        self.signals.push(Arc::new(signal));
        self
    }

    /// Look a signal up on this class and then its ancestors
    pub fn find_signal(&self, name: &str) -> Option<Arc<CallableInfo>> {
        self.signals
            .iter()
            .find(|s| s.name == name)
            .cloned()
            .or_else(|| self.parent.as_ref().and_then(|p| p.find_signal(name)))
    }

    /// Whether `self` is `other` or derives from it
    pub fn is_a(&self, other: &ObjectInfo) -> bool {
        if self.type_name == other.type_name {
            return true;
        }
        self.parent.as_ref().map_or(false, |p| p.is_a(other))
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

/// Enumeration or flags type
#[derive(Debug, Clone)]
pub struct EnumInfo {
    pub namespace: String,
    pub name: String,
    pub members: Vec<(String, i64)>,
    pub storage: TypeTag,
}

impl EnumInfo {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            members: Vec::new(),
            storage: TypeTag::Int32,
        }
    }

    pub fn member(mut self, name: impl Into<String>, value: i64) -> Self {
        self.members.push((name.into(), value));
        self
    }

    pub fn unsigned(mut self) -> Self {
        self.storage = TypeTag::UInt32;
        self
    }

    pub fn contains(&self, value: i64) -> bool {
        self.members.iter().any(|(_, v)| *v == value)
    }

    /// Union of every declared flag bit
    pub fn all_bits(&self) -> i64 {
        self.members.iter().fold(0, |acc, (_, v)| acc | v)
    }
}

/// Payload of an interface-tagged type descriptor
#[derive(Debug, Clone)]
pub enum InterfaceInfo {
    Struct(Arc<StructInfo>),
    Union(Arc<StructInfo>),
    Object(Arc<ObjectInfo>),
    Enum(Arc<EnumInfo>),
    Flags(Arc<EnumInfo>),
    Callback(Arc<CallableInfo>),
    /// Abstract interface types; no marshaler exists for them
    Interface { namespace: String, name: String },
}

impl InterfaceInfo {
    pub fn name(&self) -> &str {
        match self {
            Self::Struct(s) | Self::Union(s) => &s.name,
            Self::Object(o) => &o.name,
            Self::Enum(e) | Self::Flags(e) => &e.name,
            Self::Callback(c) => &c.name,
            Self::Interface { name, .. } => name,
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            Self::Struct(s) | Self::Union(s) => &s.namespace,
            Self::Object(o) => &o.namespace,
            Self::Enum(e) | Self::Flags(e) => &e.namespace,
            Self::Callback(c) => &c.namespace,
            Self::Interface { namespace, .. } => namespace,
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace(), self.name())
    }

    /// Enums and flags travel by value; everything else by pointer
    pub fn is_passed_by_pointer(&self) -> bool {
        !matches!(self, Self::Enum(_) | Self::Flags(_))
    }
}
