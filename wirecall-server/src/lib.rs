pub mod binding;
pub mod dispatch;
pub mod logging;
pub mod pool;
pub mod preprocess;
pub mod server;

pub use binding::{BindingTable, BoundMethod, Handler, ServiceBinder, ServiceBinding};
pub use dispatch::{DispatchBuilder, ServerDispatchCore};
pub use logging::{init_logging, init_test_logging};
pub use pool::WorkerPool;
pub use preprocess::{Preprocessor, RateLimit, RequireHeader};
pub use server::{Server, ServerConfig};
