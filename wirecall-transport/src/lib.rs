pub mod local;
#[cfg(feature = "topic")]
pub mod topic;
pub mod transport;

pub use local::LocalInvoker;
#[cfg(feature = "topic")]
pub use topic::{
    BusMessage, BusPayload, TopicBus, TopicDispatcherAdapter, TopicFilter, TopicInvoker,
    TopicSubscription, REPLY_TO,
};
pub use transport::{is_hop_by_hop, Dispatcher, Invoker, TransportError, HOP_BY_HOP};
