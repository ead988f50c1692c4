//! Core of the wirecall invocation protocol.
//!
//! Everything here is transport-agnostic: contract descriptions, route
//! derivation, signature validation, the request context, the response
//! envelope with its exception projection, and the correlation table used by
//! transports that deliver responses out-of-band.

pub mod args;
pub mod codec;
pub mod context;
pub mod correlation;
pub mod descriptor;
pub mod envelope;
pub mod error;
pub mod exception;
pub mod ids;
pub mod route;
pub mod validate;

pub use args::{json_kind, Arguments};
pub use codec::{Deserializer, DeserializerRegistry, JsonDeserializer, JsonSerializer, Serializer, JSON_CONTENT_TYPE};
pub use context::{Context, CONTENT_TYPE, REQUEST_ID};
pub use correlation::{CorrelationStore, Delivery, PendingResponse};
pub use descriptor::{
    ContractDescriptor, ContractKind, ContractRoute, MethodDescriptor, ParamDescriptor, Primitive,
    TypeDescriptor,
};
pub use envelope::Envelope;
pub use error::{ErrorKind, RpcError};
pub use exception::{ExceptionDataHolder, ExceptionKind, StackFrame};
pub use ids::{default_id_generator, IdGenerator, SequentialIdGenerator, UuidGenerator};
pub use route::{Route, RouteError, RouteResolver};
pub use validate::SignatureValidator;

// Re-exported for the `args!` macro in downstream crates.
#[doc(hidden)]
pub use serde_json as __serde_json;
