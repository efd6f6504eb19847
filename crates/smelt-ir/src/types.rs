use serde::{Deserialize, Serialize};
use std::fmt;

/// Resolved type of a variable or operation operand.
///
/// The lattice covers the runtime value kinds of the source language plus the
/// compile-time-only kinds lowering must recognize: callee markers, phantom
/// results, exception classes. Compile-time-only kinds have no runtime
/// representation and lower to the backend's dummy value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Boolean,
    Int(u8),
    Uint(u8),
    Float(u8),
    /// The universal object type; every variable has this type in fallback
    /// (dynamically-typed) compilation.
    Opaque,
    NoneType,
    /// Fixed-size heterogeneous tuple.
    Tuple(Vec<Type>),
    /// Fixed-size homogeneous tuple; iterable, unlike `Tuple`.
    UniTuple { element: Box<Type>, count: usize },
    Array { element: Box<Type>, ndim: u8 },
    Optional(Box<Type>),
    /// (value, validity-flag) structure used by the iterator protocol.
    Pair(Box<Type>, Box<Type>),
    Iterator { yield_type: Box<Type> },
    Module(String),
    Function(String),
    /// A user-compiled callee whose parameter names are known, so call-site
    /// keyword arguments can be bound to positional order.
    Dispatcher { name: String, params: Vec<String> },
    Dummy(String),
    /// A call result that carries no value at all; calls returning this are
    /// never emitted.
    Phantom,
    ExceptionInstance(ExcClass),
    ExceptionClass(ExcClass),
    /// Bound method resolved through attribute access; calls prepend the
    /// receiver to the argument list.
    BoundFunction { receiver: Box<Type> },
    /// Extension-object method; calls go through the backend's method-call
    /// path instead of ordinary resolution.
    Method { receiver: Box<Type>, name: String },
    ExternalFunction { symbol: String, sig: Box<Signature> },
    FunctionPointer { address: u64, cconv: Option<String> },
}

impl Type {
    /// The index-sized integer type.
    pub fn intp() -> Type {
        Type::Int(64)
    }

    /// In-place operators are only observable on mutable types; everything
    /// else reuses the copying operator path.
    pub fn is_mutable(&self) -> bool {
        matches!(self, Type::Array { .. })
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, Type::Optional(_))
    }

    pub fn optional_inner(&self) -> Option<&Type> {
        match self {
            Type::Optional(inner) => Some(inner),
            _ => None,
        }
    }

    /// The iterator type produced by `getiter` on this type, if iterable.
    pub fn iterator_type(&self) -> Option<Type> {
        match self {
            Type::Array { element, .. } | Type::UniTuple { element, .. } => Some(Type::Iterator {
                yield_type: element.clone(),
            }),
            Type::Iterator { .. } => Some(self.clone()),
            _ => None,
        }
    }

    pub fn yield_type(&self) -> Option<&Type> {
        match self {
            Type::Iterator { yield_type } => Some(yield_type),
            _ => None,
        }
    }

    pub fn pair_types(&self) -> Option<(&Type, &Type)> {
        match self {
            Type::Pair(first, second) => Some((first, second)),
            _ => None,
        }
    }

    /// Per-slot element types of a fixed-size tuple type.
    pub fn element_types(&self) -> Option<Vec<Type>> {
        match self {
            Type::Tuple(items) => Some(items.clone()),
            Type::UniTuple { element, count } => Some(vec![(**element).clone(); *count]),
            _ => None,
        }
    }

    /// Parameter names of a callee whose signature is bindable; `None` means
    /// keyword arguments cannot be folded for this callee.
    pub fn param_names(&self) -> Option<&[String]> {
        match self {
            Type::Dispatcher { params, .. } => Some(params),
            _ => None,
        }
    }

    /// Types with no runtime representation; assignments of these lower to
    /// the backend's dummy value.
    pub fn is_dummy_like(&self) -> bool {
        matches!(
            self,
            Type::Dummy(_)
                | Type::Module(_)
                | Type::Function(_)
                | Type::Dispatcher { .. }
                | Type::Phantom
                | Type::ExceptionClass(_)
                | Type::ExternalFunction { .. }
        )
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Boolean => write!(f, "bool"),
            Type::Int(bits) => write!(f, "int{}", bits),
            Type::Uint(bits) => write!(f, "uint{}", bits),
            Type::Float(bits) => write!(f, "float{}", bits),
            Type::Opaque => write!(f, "object"),
            Type::NoneType => write!(f, "none"),
            Type::Tuple(items) => {
                let inner = items
                    .iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "({})", inner)
            }
            Type::UniTuple { element, count } => write!(f, "({} x {})", element, count),
            Type::Array { element, ndim } => write!(f, "array({}, {}d)", element, ndim),
            Type::Optional(inner) => write!(f, "?{}", inner),
            Type::Pair(first, second) => write!(f, "pair<{}, {}>", first, second),
            Type::Iterator { yield_type } => write!(f, "iter<{}>", yield_type),
            Type::Module(name) => write!(f, "module({})", name),
            Type::Function(name) => write!(f, "function({})", name),
            Type::Dispatcher { name, .. } => write!(f, "dispatcher({})", name),
            Type::Dummy(name) => write!(f, "{}", name),
            Type::Phantom => write!(f, "phantom"),
            Type::ExceptionInstance(class) => write!(f, "exc_instance({})", class),
            Type::ExceptionClass(class) => write!(f, "exc_class({})", class),
            Type::BoundFunction { receiver } => write!(f, "bound({})", receiver),
            Type::Method { receiver, name } => write!(f, "method({}.{})", receiver, name),
            Type::ExternalFunction { symbol, .. } => write!(f, "{}", symbol),
            Type::FunctionPointer { address, .. } => write!(f, "funcptr@{:#x}", address),
        }
    }
}

/// Exception classes the generated code can raise through the calling
/// convention's structured-exception return.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExcClass {
    ValueError,
    TypeError,
    StopIteration,
    RuntimeError,
    ZeroDivisionError,
    Custom(String),
}

impl fmt::Display for ExcClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExcClass::ValueError => write!(f, "ValueError"),
            ExcClass::TypeError => write!(f, "TypeError"),
            ExcClass::StopIteration => write!(f, "StopIteration"),
            ExcClass::RuntimeError => write!(f, "RuntimeError"),
            ExcClass::ZeroDivisionError => write!(f, "ZeroDivisionError"),
            ExcClass::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Resolved parameter and return types for one operation or call site, as
/// handed over by type inference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<Type>,
    pub return_type: Type,
    /// Bound receiver type, present when the callee is a bound function; the
    /// receiver value is prepended to the argument list at the call.
    pub recv: Option<Type>,
}

impl Signature {
    pub fn new(return_type: Type, params: Vec<Type>) -> Self {
        Self {
            params,
            return_type,
            recv: None,
        }
    }

    pub fn with_recv(mut self, recv: Type) -> Self {
        self.recv = Some(recv);
        self
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .params
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "({}) -> {}", params, self.return_type)
    }
}
