use std::any::Any;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::error;
use wirecall_core::RpcError;

/// Bounded pool for handlers that block. At most `size` jobs run at once;
/// the rest wait for a permit.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        WorkerPool {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// A panicking job fails with a business error carrying the panic message.
    pub async fn run<F, R>(&self, job: F) -> Result<R, RpcError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| RpcError::invocation("Worker pool is shut down"))?;

        match tokio::task::spawn_blocking(job).await {
            Ok(result) => Ok(result),
            Err(err) if err.is_panic() => {
                let message = panic_message(err.into_panic());
                error!(panic = %message, "handler panicked");
                Err(RpcError::business(format!("Handler panicked: {}", message)))
            }
            Err(_) => Err(RpcError::invocation("Worker task was cancelled")),
        }
    }

    pub fn close(&self) {
        self.permits.close();
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
