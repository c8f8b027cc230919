use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::device::DeviceOps;
use crate::error::Result;
use crate::types::{DeviceId, RawEvent};

/// Per-device cache of recycled device events.
///
/// Event creation carries non-zero cost in the underlying runtime, so
/// completed events return here instead of being destroyed. A single mutex
/// guards all per-device stacks. A released event must have completed its
/// previous record before it is next recorded; the finalizer guarantees
/// this by releasing only after synchronizing.
pub struct EventPool {
    ops: Arc<dyn DeviceOps>,
    inner: Mutex<PoolInner>,
}

#[derive(Default)]
struct PoolInner {
    stacks: HashMap<DeviceId, Vec<RawEvent>>,
    outstanding: usize,
}

impl EventPool {
    pub fn new(ops: Arc<dyn DeviceOps>) -> Self {
        Self {
            ops,
            inner: Mutex::new(PoolInner::default()),
        }
    }

    /// Return a recycled event for `device`, creating one on a miss.
    pub fn acquire(&self, device: DeviceId) -> Result<RawEvent> {
        let recycled = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let event = inner.stacks.entry(device).or_default().pop();
            if event.is_some() {
                inner.outstanding += 1;
            }
            event
        };
        if let Some(event) = recycled {
            return Ok(event);
        }

        let event = self.ops.create_event(device)?;
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.outstanding += 1;
        Ok(event)
    }

    /// Return a completed event to `device`'s stack.
    pub fn release(&self, device: DeviceId, event: RawEvent) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.outstanding = inner.outstanding.saturating_sub(1);
        inner.stacks.entry(device).or_default().push(event);
    }

    /// Number of acquired-but-unreleased events, i.e. events currently held
    /// in live event queues.
    pub fn outstanding(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .outstanding
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::StubDeviceOps;
    use std::sync::atomic::Ordering;

    #[test]
    fn recycles_lifo() {
        let ops = Arc::new(StubDeviceOps::default());
        let pool = EventPool::new(ops.clone());

        let a = pool.acquire(0).unwrap();
        let b = pool.acquire(0).unwrap();
        assert_eq!(pool.outstanding(), 2);

        pool.release(0, a);
        pool.release(0, b);
        assert_eq!(pool.outstanding(), 0);

        // Last released comes back first.
        assert_eq!(pool.acquire(0).unwrap(), b);
        assert_eq!(pool.acquire(0).unwrap(), a);
        assert_eq!(ops.events_created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stacks_are_per_device() {
        let pool = EventPool::new(Arc::new(StubDeviceOps::default()));
        let a = pool.acquire(0).unwrap();
        pool.release(0, a);

        // Device 1 must not see device 0's recycled event.
        let b = pool.acquire(1).unwrap();
        assert_ne!(a, b);
    }
}
