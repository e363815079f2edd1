//! Resource-class concurrency pools.
//!
//! Each class is a fair `tokio::sync::Semaphore`, so waiters are served in
//! the order they started waiting. A [`SlotGuard`] owns its permit and
//! returns it when dropped, whatever path the holder exits through.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use vidgen_core::error::CoreError;
use vidgen_core::stage::ResourceClass;

/// A held execution slot.
#[derive(Debug)]
pub struct SlotGuard {
    class: ResourceClass,
    _permit: OwnedSemaphorePermit,
}

impl SlotGuard {
    pub fn class(&self) -> ResourceClass {
        self.class
    }
}

#[derive(Debug, Clone)]
struct Pool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl Pool {
    fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }
}

/// CPU and GPU slot pools shared by every pipeline run.
#[derive(Debug, Clone)]
pub struct ResourcePools {
    cpu: Pool,
    gpu: Pool,
}

impl ResourcePools {
    pub fn new(cpu_slots: usize, gpu_slots: usize) -> Self {
        Self {
            cpu: Pool::new(cpu_slots),
            gpu: Pool::new(gpu_slots),
        }
    }

    fn pool(&self, class: ResourceClass) -> &Pool {
        match class {
            ResourceClass::Cpu => &self.cpu,
            ResourceClass::Gpu => &self.gpu,
        }
    }

    /// Wait for a slot in `class`.
    ///
    /// Fails only after [`ResourcePools::close`].
    pub async fn acquire(&self, class: ResourceClass) -> Result<SlotGuard, CoreError> {
        let permit = Arc::clone(&self.pool(class).semaphore)
            .acquire_owned()
            .await
            .map_err(|_| CoreError::Internal(format!("{class} slot pool is closed")))?;
        Ok(SlotGuard {
            class,
            _permit: permit,
        })
    }

    pub fn capacity(&self, class: ResourceClass) -> usize {
        self.pool(class).capacity
    }

    /// Slots currently free in `class`.
    pub fn available(&self, class: ResourceClass) -> usize {
        self.pool(class).semaphore.available_permits()
    }

    /// Slots currently held in `class`.
    pub fn in_use(&self, class: ResourceClass) -> usize {
        self.capacity(class) - self.available(class)
    }

    /// Stop handing out slots; pending and future acquisitions fail.
    pub fn close(&self) {
        self.cpu.semaphore.close();
        self.gpu.semaphore.close();
    }
}
