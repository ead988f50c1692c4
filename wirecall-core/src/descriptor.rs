//! Static description of service contracts.
//!
//! A contract is described once, as data, and shared by the stub side and the
//! binding side. Route overrides and parameter names are part of the description
//! rather than being discovered at runtime.

use crate::error::ErrorKind;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Bool,
    I32,
    I64,
    U64,
    F64,
    String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    /// No value (`()` / void).
    Unit,
    /// The call context. Only legal as the first parameter.
    Context,
    Primitive(Primitive),
    Enum(String),
    /// A named type that implements the serializable capability.
    Serializable(String),
    /// A named type that does not.
    Opaque(String),
    Array(Box<TypeDescriptor>),
    Generic {
        name: String,
        args: Vec<TypeDescriptor>,
    },
    Wildcard,
    /// An asynchronous result handle of the inner type.
    Async(Box<TypeDescriptor>),
}

impl TypeDescriptor {
    pub const BOOL: TypeDescriptor = TypeDescriptor::Primitive(Primitive::Bool);
    pub const I32: TypeDescriptor = TypeDescriptor::Primitive(Primitive::I32);
    pub const I64: TypeDescriptor = TypeDescriptor::Primitive(Primitive::I64);
    pub const U64: TypeDescriptor = TypeDescriptor::Primitive(Primitive::U64);
    pub const F64: TypeDescriptor = TypeDescriptor::Primitive(Primitive::F64);
    pub const STRING: TypeDescriptor = TypeDescriptor::Primitive(Primitive::String);

    pub fn serializable(name: impl Into<String>) -> Self {
        TypeDescriptor::Serializable(name.into())
    }

    pub fn opaque(name: impl Into<String>) -> Self {
        TypeDescriptor::Opaque(name.into())
    }

    pub fn enumeration(name: impl Into<String>) -> Self {
        TypeDescriptor::Enum(name.into())
    }

    pub fn array(element: TypeDescriptor) -> Self {
        TypeDescriptor::Array(Box::new(element))
    }

    pub fn list(element: TypeDescriptor) -> Self {
        TypeDescriptor::generic("List", vec![element])
    }

    pub fn optional(inner: TypeDescriptor) -> Self {
        TypeDescriptor::generic("Option", vec![inner])
    }

    pub fn map(key: TypeDescriptor, value: TypeDescriptor) -> Self {
        TypeDescriptor::generic("Map", vec![key, value])
    }

    pub fn generic(name: impl Into<String>, args: Vec<TypeDescriptor>) -> Self {
        TypeDescriptor::Generic {
            name: name.into(),
            args,
        }
    }

    pub fn async_of(inner: TypeDescriptor) -> Self {
        TypeDescriptor::Async(Box::new(inner))
    }

    /// Wire shape of an envelope, used as a decode target.
    pub fn envelope() -> Self {
        TypeDescriptor::serializable("Envelope")
    }

    /// Wire shape of a named-argument map, used as a decode target.
    pub fn arguments() -> Self {
        TypeDescriptor::map(TypeDescriptor::STRING, TypeDescriptor::serializable("Value"))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, TypeDescriptor::Async(_))
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, TypeDescriptor::Unit)
    }

    /// The type a caller eventually receives: the inner type of an async handle.
    pub fn resolved(&self) -> &TypeDescriptor {
        match self {
            TypeDescriptor::Async(inner) => inner.resolved(),
            other => other,
        }
    }

    /// Checks that a decoded value has the shape this type describes. Named
    /// serializable types are not introspected and accept any value.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            TypeDescriptor::Unit => value.is_null(),
            TypeDescriptor::Context | TypeDescriptor::Wildcard => false,
            TypeDescriptor::Primitive(primitive) => match primitive {
                Primitive::Bool => value.is_boolean(),
                Primitive::I32 => value
                    .as_i64()
                    .is_some_and(|n| i32::try_from(n).is_ok()),
                Primitive::I64 => value.is_i64(),
                Primitive::U64 => value.is_u64(),
                Primitive::F64 => value.is_number(),
                Primitive::String => value.is_string(),
            },
            TypeDescriptor::Enum(_) => value.is_string(),
            TypeDescriptor::Serializable(_) | TypeDescriptor::Opaque(_) => true,
            TypeDescriptor::Array(element) => value
                .as_array()
                .is_some_and(|items| items.iter().all(|item| element.accepts(item))),
            TypeDescriptor::Generic { name, args } => match (name.as_str(), args.as_slice()) {
                ("Option", [inner]) => value.is_null() || inner.accepts(value),
                ("List" | "Set", [element]) => value
                    .as_array()
                    .is_some_and(|items| items.iter().all(|item| element.accepts(item))),
                ("Map", [_, element]) => value
                    .as_object()
                    .is_some_and(|entries| entries.values().all(|item| element.accepts(item))),
                _ => true,
            },
            TypeDescriptor::Async(inner) => inner.accepts(value),
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Primitive::Bool => "bool",
            Primitive::I32 => "i32",
            Primitive::I64 => "i64",
            Primitive::U64 => "u64",
            Primitive::F64 => "f64",
            Primitive::String => "string",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Unit => write!(f, "()"),
            TypeDescriptor::Context => write!(f, "Context"),
            TypeDescriptor::Primitive(p) => write!(f, "{}", p),
            TypeDescriptor::Enum(name)
            | TypeDescriptor::Serializable(name)
            | TypeDescriptor::Opaque(name) => write!(f, "{}", name),
            TypeDescriptor::Array(element) => write!(f, "[{}]", element),
            TypeDescriptor::Generic { name, args } => {
                write!(f, "{}<", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ">")
            }
            TypeDescriptor::Wildcard => write!(f, "?"),
            TypeDescriptor::Async(inner) => write!(f, "Async<{}>", inner),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDescriptor {
    pub name: Option<String>,
    pub ty: TypeDescriptor,
}

impl ParamDescriptor {
    pub fn context() -> Self {
        ParamDescriptor {
            name: None,
            ty: TypeDescriptor::Context,
        }
    }

    pub fn named(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        ParamDescriptor {
            name: Some(name.into()),
            ty,
        }
    }

    pub fn unnamed(ty: TypeDescriptor) -> Self {
        ParamDescriptor { name: None, ty }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: String,
    pub params: Vec<ParamDescriptor>,
    pub returns: TypeDescriptor,
    /// Replaces the method segment of the derived route.
    pub route: Option<String>,
    /// Error kinds the method signature declares; a synchronous caller receives
    /// these unchanged instead of a wrapping invocation error.
    pub declared_errors: Vec<ErrorKind>,
}

impl MethodDescriptor {
    /// A method whose first parameter is the call context, returning `()`.
    pub fn new(name: impl Into<String>) -> Self {
        MethodDescriptor {
            name: name.into(),
            params: vec![ParamDescriptor::context()],
            returns: TypeDescriptor::Unit,
            route: None,
            declared_errors: Vec::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, ty: TypeDescriptor) -> Self {
        self.params.push(ParamDescriptor::named(name, ty));
        self
    }

    /// Replaces the whole parameter list, context included.
    pub fn with_params(mut self, params: Vec<ParamDescriptor>) -> Self {
        self.params = params;
        self
    }

    pub fn returns(mut self, ty: TypeDescriptor) -> Self {
        self.returns = ty;
        self
    }

    pub fn route(mut self, segment: impl Into<String>) -> Self {
        self.route = Some(segment.into());
        self
    }

    pub fn throws(mut self, kind: ErrorKind) -> Self {
        if !self.declared_errors.contains(&kind) {
            self.declared_errors.push(kind);
        }
        self
    }

    pub fn is_async(&self) -> bool {
        self.returns.is_async()
    }

    pub fn declares(&self, kind: ErrorKind) -> bool {
        self.declared_errors.contains(&kind)
    }

    /// Parameters after the leading context.
    pub fn argument_params(&self) -> &[ParamDescriptor] {
        match self.params.first() {
            Some(first) if first.ty == TypeDescriptor::Context => &self.params[1..],
            _ => &self.params,
        }
    }

    pub fn argument_names(&self) -> Vec<&str> {
        self.argument_params()
            .iter()
            .filter_map(|p| p.name.as_deref())
            .collect()
    }

    pub fn has_arguments(&self) -> bool {
        !self.argument_params().is_empty()
    }
}

/// Contract-level route override.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContractRoute {
    /// Replaces the contract-derived path wholesale.
    Replace(String),
    /// Substitutes the first run of whole segments equal to `from` in the
    /// derived path with `to`.
    Substitute { from: String, to: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractKind {
    /// A pure capability set without state.
    Interface,
    /// A concrete, stateful type. Never valid as a remote contract.
    Concrete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractDescriptor {
    /// Fully-qualified, dot-separated contract name.
    pub name: String,
    pub kind: ContractKind,
    pub methods: Vec<MethodDescriptor>,
    pub route: Option<ContractRoute>,
}

impl ContractDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        ContractDescriptor {
            name: name.into(),
            kind: ContractKind::Interface,
            methods: Vec::new(),
            route: None,
        }
    }

    pub fn concrete(mut self) -> Self {
        self.kind = ContractKind::Concrete;
        self
    }

    pub fn method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }

    pub fn route(mut self, route: ContractRoute) -> Self {
        self.route = Some(route);
        self
    }

    pub fn find_method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Last segment of the fully-qualified name.
    pub fn simple_name(&self) -> &str {
        self.name
            .rsplit(['.', '$'])
            .next()
            .unwrap_or(self.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_builder() {
        let method = MethodDescriptor::new("plus")
            .param("a", TypeDescriptor::F64)
            .param("b", TypeDescriptor::F64)
            .returns(TypeDescriptor::F64)
            .throws(ErrorKind::Business)
            .throws(ErrorKind::Business);

        assert_eq!(method.params.len(), 3);
        assert_eq!(method.argument_names(), vec!["a", "b"]);
        assert!(method.has_arguments());
        assert!(!method.is_async());
        assert_eq!(method.declared_errors, vec![ErrorKind::Business]);
    }

    #[test]
    fn test_async_return() {
        let method =
            MethodDescriptor::new("minus").returns(TypeDescriptor::async_of(TypeDescriptor::F64));
        assert!(method.is_async());
        assert_eq!(method.returns.resolved(), &TypeDescriptor::F64);
        assert!(!method.has_arguments());
    }

    #[test]
    fn test_argument_params_without_context() {
        let method = MethodDescriptor::new("odd")
            .with_params(vec![ParamDescriptor::named("a", TypeDescriptor::I32)]);
        assert_eq!(method.argument_names(), vec!["a"]);
    }

    #[test]
    fn test_accepts_primitives() {
        assert!(TypeDescriptor::F64.accepts(&json!(700.5)));
        assert!(TypeDescriptor::F64.accepts(&json!(7)));
        assert!(!TypeDescriptor::F64.accepts(&json!("7")));
        assert!(TypeDescriptor::I32.accepts(&json!(-5)));
        assert!(!TypeDescriptor::I32.accepts(&json!(5_000_000_000i64)));
        assert!(!TypeDescriptor::U64.accepts(&json!(-1)));
        assert!(TypeDescriptor::Unit.accepts(&json!(null)));
        assert!(!TypeDescriptor::Unit.accepts(&json!(1)));
    }

    #[test]
    fn test_accepts_containers() {
        let list = TypeDescriptor::list(TypeDescriptor::STRING);
        assert!(list.accepts(&json!(["a", "b"])));
        assert!(!list.accepts(&json!(["a", 1])));

        let optional = TypeDescriptor::optional(TypeDescriptor::I64);
        assert!(optional.accepts(&json!(null)));
        assert!(optional.accepts(&json!(3)));

        assert!(TypeDescriptor::arguments().accepts(&json!({"a": 1, "b": [true]})));
        assert!(!TypeDescriptor::arguments().accepts(&json!([1, 2])));
    }

    #[test]
    fn test_display() {
        let ty = TypeDescriptor::async_of(TypeDescriptor::map(
            TypeDescriptor::STRING,
            TypeDescriptor::array(TypeDescriptor::serializable("Order")),
        ));
        assert_eq!(ty.to_string(), "Async<Map<string, [Order]>>");
    }

    #[test]
    fn test_simple_name() {
        let contract = ContractDescriptor::new("com.example.math.CalculatorService");
        assert_eq!(contract.simple_name(), "CalculatorService");
        let nested = ContractDescriptor::new("com.example.Outer$InnerService");
        assert_eq!(nested.simple_name(), "InnerService");
    }
}
