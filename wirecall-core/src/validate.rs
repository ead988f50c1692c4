use crate::descriptor::{ContractDescriptor, ContractKind, MethodDescriptor, TypeDescriptor};
use crate::error::RpcError;
use std::collections::HashSet;

/// Rejects contracts that cannot be carried over the wire. Runs once per contract,
/// before a stub is handed out or a binding is exported.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureValidator;

impl SignatureValidator {
    pub fn validate(contract: &ContractDescriptor) -> Result<(), RpcError> {
        if contract.kind != ContractKind::Interface {
            return Err(RpcError::invocation(format!(
                "Contract {} must be an interface",
                contract.name
            )));
        }
        if contract.methods.is_empty() {
            return Err(RpcError::invocation(format!(
                "Contract {} declares no methods",
                contract.name
            )));
        }

        let mut seen = HashSet::new();
        for method in &contract.methods {
            if !seen.insert(method.name.as_str()) {
                return Err(RpcError::invocation(format!(
                    "Method {} is overloaded on contract {}; routes are name-based",
                    method.name, contract.name
                )));
            }
            Self::validate_method(contract, method)?;
        }
        Ok(())
    }

    fn validate_method(contract: &ContractDescriptor, method: &MethodDescriptor) -> Result<(), RpcError> {
        let qualified = format!("{}.{}", contract.name, method.name);

        match method.params.first() {
            Some(first) if first.ty == TypeDescriptor::Context => {}
            _ => {
                return Err(RpcError::invocation(format!(
                    "First parameter of {} must be Context",
                    qualified
                )))
            }
        }

        for (index, param) in method.params.iter().enumerate().skip(1) {
            let name = match param.name.as_deref() {
                Some(name) if !name.trim().is_empty() => name,
                _ => {
                    return Err(RpcError::invocation(format!(
                        "Parameter {} of {} has no declared name",
                        index, qualified
                    )))
                }
            };
            if !is_serializable_safe(&param.ty) {
                return Err(RpcError::invocation(format!(
                    "Parameter '{}' of {} has a type that is not serializable: {}",
                    name, qualified, param.ty
                )));
            }
        }

        if !is_valid_return(&method.returns) {
            return Err(RpcError::invocation(format!(
                "Return type of {} is not serializable: {}",
                qualified, method.returns
            )));
        }
        Ok(())
    }
}

/// Primitives, enums and serializable types, recursively through arrays and
/// generic arguments. Raw generics and wildcards are rejected.
pub fn is_serializable_safe(ty: &TypeDescriptor) -> bool {
    match ty {
        TypeDescriptor::Primitive(_) | TypeDescriptor::Enum(_) | TypeDescriptor::Serializable(_) => true,
        TypeDescriptor::Array(element) => is_serializable_safe(element),
        TypeDescriptor::Generic { args, .. } => !args.is_empty() && args.iter().all(is_serializable_safe),
        TypeDescriptor::Unit
        | TypeDescriptor::Context
        | TypeDescriptor::Opaque(_)
        | TypeDescriptor::Wildcard
        | TypeDescriptor::Async(_) => false,
    }
}

fn is_valid_return(ty: &TypeDescriptor) -> bool {
    match ty {
        TypeDescriptor::Unit => true,
        TypeDescriptor::Async(inner) => inner.is_unit() || is_serializable_safe(inner),
        other => is_serializable_safe(other),
    }
}
