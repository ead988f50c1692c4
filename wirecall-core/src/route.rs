//! Route derivation.
//!
//! A route is the contract's fully-qualified name without its `Service` suffix,
//! followed by the method name, split on `.` and `$`, stripped of blank segments
//! and lower-cased: `com.example.CalculatorService::plus` becomes
//! `com.example.calculator.plus`.

use crate::descriptor::{ContractDescriptor, ContractRoute, MethodDescriptor};
use dashmap::DashMap;
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

const SERVICE_SUFFIX: &str = "Service";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("Route for {contract}.{method} is empty")]
    Empty { contract: String, method: String },
    #[error("Route '{0}' is empty")]
    Blank(String),
    #[error("Route {route} is already bound to {existing}")]
    Duplicate { route: Route, existing: String },
}

/// Canonical identifier of one remote method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Route(Arc<str>);

impl Route {
    /// Sanitizes an arbitrary string into a route.
    pub fn parse(raw: &str) -> Result<Route, RouteError> {
        sanitize(raw)
            .map(|s| Route(Arc::from(s)))
            .ok_or_else(|| RouteError::Blank(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Route {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Route {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Splits on `.` and `$`, drops blank segments, rejoins with `.`, lower-cases.
/// Returns `None` when nothing is left.
pub fn sanitize(raw: &str) -> Option<String> {
    let joined = raw
        .split(['.', '$'])
        .filter(|segment| !segment.trim().is_empty())
        .collect::<Vec<_>>()
        .join(".");

    if joined.is_empty() {
        None
    } else {
        Some(joined.to_lowercase())
    }
}

/// Contract part of the route before sanitization.
fn contract_path(contract: &ContractDescriptor) -> String {
    let derived = contract
        .name
        .strip_suffix(SERVICE_SUFFIX)
        .unwrap_or(&contract.name);

    match &contract.route {
        None => derived.to_string(),
        Some(ContractRoute::Replace(path)) => path.clone(),
        Some(ContractRoute::Substitute { from, to }) => substitute_segments(derived, from, to),
    }
}

/// Replaces the first run of segments equal to `from`'s segments. A match
/// inside a segment does not count.
fn substitute_segments(path: &str, from: &str, to: &str) -> String {
    let segments: Vec<&str> = path.split(['.', '$']).collect();
    let wanted: Vec<&str> = from.split(['.', '$']).collect();

    let found = segments
        .windows(wanted.len())
        .position(|window| window == wanted.as_slice());
    match found {
        Some(start) => {
            let mut rewritten = segments[..start].to_vec();
            rewritten.push(to);
            rewritten.extend_from_slice(&segments[start + wanted.len()..]);
            rewritten.join(".")
        }
        None => path.to_string(),
    }
}

/// Derives the route of one method without consulting any cache.
pub fn derive_route(
    contract: &ContractDescriptor,
    method: &MethodDescriptor,
) -> Result<Route, RouteError> {
    let method_segment = method.route.as_deref().unwrap_or(&method.name);
    let composed = format!("{}.{}", contract_path(contract), method_segment);

    sanitize(&composed)
        .map(|s| Route(Arc::from(s)))
        .ok_or_else(|| RouteError::Empty {
            contract: contract.name.clone(),
            method: method.name.clone(),
        })
}

/// Everything a derived route depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RouteKey {
    contract: String,
    contract_route: Option<ContractRoute>,
    method: String,
    method_route: Option<String>,
}

impl RouteKey {
    fn new(contract: &ContractDescriptor, method: &MethodDescriptor) -> Self {
        RouteKey {
            contract: contract.name.clone(),
            contract_route: contract.route.clone(),
            method: method.name.clone(),
            method_route: method.route.clone(),
        }
    }
}

/// Resolves and caches routes per contract and method, overrides included.
#[derive(Debug, Default)]
pub struct RouteResolver {
    cache: DashMap<RouteKey, Route>,
}

impl RouteResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(
        &self,
        contract: &ContractDescriptor,
        method: &MethodDescriptor,
    ) -> Result<Route, RouteError> {
        let key = RouteKey::new(contract, method);
        if let Some(route) = self.cache.get(&key) {
            return Ok(route.value().clone());
        }

        let route = derive_route(contract, method)?;
        trace!(contract = %contract.name, method = %method.name, %route, "resolved route");
        Ok(self.cache.entry(key).or_insert(route).value().clone())
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn calculator() -> ContractDescriptor {
        ContractDescriptor::new("com.example.math.CalculatorService")
    }

    #[test]
    fn test_default_route() {
        let route = derive_route(&calculator(), &MethodDescriptor::new("plus")).unwrap();
        assert_eq!(route.as_str(), "com.example.math.calculator.plus");
    }

    #[test]
    fn test_suffix_only_stripped_at_end() {
        let contract = ContractDescriptor::new("com.example.ServiceRegistry");
        let route = derive_route(&contract, &MethodDescriptor::new("lookup")).unwrap();
        assert_eq!(route.as_str(), "com.example.serviceregistry.lookup");
    }

    #[test]
    fn test_nested_contract_dollar_separator() {
        let contract = ContractDescriptor::new("com.example.Outer$BillingService");
        let route = derive_route(&contract, &MethodDescriptor::new("charge")).unwrap();
        assert_eq!(route.as_str(), "com.example.outer.billing.charge");
    }

    #[test]
    fn test_replace_override() {
        let contract = calculator().route(ContractRoute::Replace("api.calc".to_string()));
        let route = derive_route(&contract, &MethodDescriptor::new("plus")).unwrap();
        assert_eq!(route.as_str(), "api.calc.plus");
    }

    #[test]
    fn test_substitute_override() {
        let contract = calculator().route(ContractRoute::Substitute {
            from: "com.example".to_string(),
            to: "public".to_string(),
        });
        let route = derive_route(&contract, &MethodDescriptor::new("plus")).unwrap();
        assert_eq!(route.as_str(), "public.math.calculator.plus");
    }

    #[test]
    fn test_substitute_without_match_keeps_path() {
        let contract = calculator().route(ContractRoute::Substitute {
            from: "org.other".to_string(),
            to: "x".to_string(),
        });
        let route = derive_route(&contract, &MethodDescriptor::new("plus")).unwrap();
        assert_eq!(route.as_str(), "com.example.math.calculator.plus");
    }

    #[test]
    fn test_method_override_replaces_only_method_segment() {
        let method = MethodDescriptor::new("plus").route("Add");
        let route = derive_route(&calculator(), &method).unwrap();
        assert_eq!(route.as_str(), "com.example.math.calculator.add");
    }

    #[test]
    fn test_successive_separators_collapse() {
        let contract = ContractDescriptor::new("..com..example$$.Weird.Service");
        let route = derive_route(&contract, &MethodDescriptor::new("go")).unwrap();
        assert_eq!(route.as_str(), "com.example.weird.go");
    }

    #[test]
    fn test_empty_route_is_error() {
        let contract = ContractDescriptor::new("Service").route(ContractRoute::Replace(". $".to_string()));
        let method = MethodDescriptor::new("x").route("..");
        let err = derive_route(&contract, &method).unwrap_err();
        assert!(matches!(err, RouteError::Empty { .. }));
    }

    #[test]
    fn test_resolver_caches() {
        let resolver = RouteResolver::new();
        let contract = calculator();
        let method = MethodDescriptor::new("plus");

        let first = resolver.resolve(&contract, &method).unwrap();
        let second = resolver.resolve(&contract, &method).unwrap();
        assert_eq!(first, second);
        assert_eq!(resolver.cached(), 1);
    }

    #[test]
    fn test_resolver_distinguishes_overrides() {
        let resolver = RouteResolver::new();
        let plus = MethodDescriptor::new("plus");

        let plain = resolver.resolve(&calculator(), &plus).unwrap();
        let renamed = calculator().route(ContractRoute::Replace("api.calc".to_string()));
        let replaced = resolver.resolve(&renamed, &plus).unwrap();
        let aliased = resolver
            .resolve(&calculator(), &MethodDescriptor::new("plus").route("add"))
            .unwrap();

        assert_eq!(plain.as_str(), "com.example.math.calculator.plus");
        assert_eq!(replaced.as_str(), "api.calc.plus");
        assert_eq!(aliased.as_str(), "com.example.math.calculator.add");
        assert_eq!(resolver.cached(), 3);
    }

    #[test]
    fn test_substitute_matches_whole_segments() {
        let substitute = |name: &str| {
            let contract = ContractDescriptor::new(name).route(ContractRoute::Substitute {
                from: "math".to_string(),
                to: "arith".to_string(),
            });
            derive_route(&contract, &MethodDescriptor::new("plus")).unwrap()
        };

        assert_eq!(
            substitute("com.mathematics.CalculatorService").as_str(),
            "com.mathematics.calculator.plus"
        );
        assert_eq!(
            substitute("com.math.CalculatorService").as_str(),
            "com.arith.calculator.plus"
        );
        assert_eq!(
            substitute("com.math.Outer$math.CalculatorService").as_str(),
            "com.arith.outer.math.calculator.plus"
        );
    }

    #[test]
    fn test_parse_route() {
        assert_eq!(Route::parse("Some..Route").unwrap().as_str(), "some.route");
        assert!(Route::parse("..").is_err());
    }

    proptest! {
        #[test]
        fn prop_sanitized_routes_have_no_empty_segments(raw in "[a-zA-Z.$ ]{0,40}") {
            if let Some(route) = sanitize(&raw) {
                prop_assert!(route.split('.').all(|s| !s.trim().is_empty()));
                prop_assert!(!route.contains('$'));
                prop_assert_eq!(route.to_lowercase(), route.clone());
            }
        }

        #[test]
        fn prop_sanitize_is_idempotent(raw in "[a-zA-Z0-9.$]{0,40}") {
            if let Some(once) = sanitize(&raw) {
                prop_assert_eq!(sanitize(&once), Some(once.clone()));
            }
        }

        #[test]
        fn prop_resolve_is_pure(name in "[a-z]{1,8}(\\.[A-Z][a-z]{1,8}){1,3}", method in "[a-z]{1,10}") {
            let contract = ContractDescriptor::new(name);
            let method = MethodDescriptor::new(method);
            prop_assert_eq!(derive_route(&contract, &method).unwrap(), derive_route(&contract, &method).unwrap());
        }
    }
}
