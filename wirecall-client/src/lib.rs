//! Client side of wirecall.
//!
//! A [`ClientInvocationCore`] turns a method call on a contract into a routed
//! request for an [`Invoker`](wirecall_transport::Invoker), and a
//! [`ServiceStub`] layers typed results on top of it. [`HttpInvoker`] talks to
//! a `wirecall-server` over HTTP.

pub mod http;
pub mod invocation;
pub mod macros;
pub mod stubs;

pub use http::{ClientConfig, HttpInvoker};
pub use invocation::{ClientBuilder, ClientInvocationCore, Completion, PendingReply, Reply};
pub use stubs::{ServiceStub, TypedReply};

pub use wirecall_core::{
    Arguments, Context, ContractDescriptor, ErrorKind, MethodDescriptor, RpcError, TypeDescriptor,
};

#[doc(hidden)]
pub use wirecall_core::__serde_json;
