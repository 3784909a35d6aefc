//! Resource management

use crate::error::AirMetricsError;

use tokio::sync::{Semaphore, SemaphorePermit};

/// [crate::resource_manager::ResourceManager] provides a simple way to allocate various resources
/// to tasks. Resource management is performed using a Tokio Semaphore for each type of resource.
#[derive(Debug)]
pub struct ResourceManager {
    /// Optional semaphore for producer connections.
    connections: Option<Semaphore>,

    /// Optional semaphore for aggregation tasks.
    tasks: Option<Semaphore>,
}

impl ResourceManager {
    /// Returns a new ResourceManager object.
    pub fn new(connection_limit: Option<usize>, task_limit: Option<usize>) -> Self {
        Self {
            connections: connection_limit.map(Semaphore::new),
            tasks: task_limit.map(Semaphore::new),
        }
    }

    /// Acquire a producer connection resource.
    pub async fn connection(&self) -> Result<Option<SemaphorePermit>, AirMetricsError> {
        optional_acquire(&self.connections, 1).await
    }

    /// Acquire a task resource.
    pub async fn task(&self) -> Result<Option<SemaphorePermit>, AirMetricsError> {
        optional_acquire(&self.tasks, 1).await
    }
}

/// Acquire permits on an optional Semaphore, if present.
async fn optional_acquire(
    sem: &Option<Semaphore>,
    n: usize,
) -> Result<Option<SemaphorePermit>, AirMetricsError> {
    let n = n.try_into()?;
    if let Some(sem) = sem {
        sem.acquire_many(n)
            .await
            .map(Some)
            .map_err(|err| err.into())
    } else {
        Ok(None)
    }
}
