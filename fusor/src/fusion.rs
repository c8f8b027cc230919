use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::device::DeviceOps;
use crate::error::Result;
use crate::types::{DeviceId, FUSION_ATOM};

/// Per-device fusion buffer: one grow-on-demand allocation into which a
/// batch's tensors are concatenated for a single collective call.
///
/// Capacities are rounded up so the hierarchical strategy can always pad a
/// fused batch to a multiple of `local_size * FUSION_ATOM` elements without
/// overrunning the buffer.
pub struct FusionArena {
    ops: Arc<dyn DeviceOps>,
    initial_bytes: usize,
    buffers: Mutex<HashMap<DeviceId, Allocation>>,
}

#[derive(Clone, Copy)]
struct Allocation {
    ptr: u64,
    capacity: usize,
}

impl FusionArena {
    pub fn new(ops: Arc<dyn DeviceOps>, initial_bytes: usize) -> Self {
        Self {
            ops,
            initial_bytes,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    /// Round `num_elements` up to the padding-safe capacity for a group of
    /// `local_size` peers.
    pub fn padded_elements(num_elements: usize, local_size: usize) -> usize {
        let atom = local_size.max(1) * FUSION_ATOM;
        num_elements.div_ceil(atom) * atom
    }

    /// Resolve the fusion buffer for `device`, guaranteeing at least
    /// `min_bytes` of capacity.
    pub fn acquire(&self, device: DeviceId, min_bytes: usize) -> Result<u64> {
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(alloc) = buffers.get(&device) {
            if alloc.capacity >= min_bytes {
                return Ok(alloc.ptr);
            }
        }

        let capacity = min_bytes.max(self.initial_bytes);
        let ptr = self.ops.alloc(device, capacity)?;
        tracing::debug!(device, capacity, "fusion buffer (re)allocated");

        if let Some(old) = buffers.insert(device, Allocation { ptr, capacity }) {
            // The previous buffer has no in-flight work: acquire happens
            // before any enqueue and batches are externally serialized.
            unsafe { self.ops.free(device, old.ptr)? };
        }
        Ok(ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::StubDeviceOps;

    #[test]
    fn padded_elements_rounds_to_atom_multiple() {
        assert_eq!(FusionArena::padded_elements(1026, 2), 1152);
        assert_eq!(FusionArena::padded_elements(1152, 2), 1152);
        assert_eq!(FusionArena::padded_elements(1, 4), 256);
        assert_eq!(FusionArena::padded_elements(0, 2), 0);
    }

    #[test]
    fn reuses_buffer_when_capacity_suffices() {
        let arena = FusionArena::new(Arc::new(StubDeviceOps::default()), 1024);
        let a = arena.acquire(0, 100).unwrap();
        let b = arena.acquire(0, 1024).unwrap();
        assert_eq!(a, b);
    }
}
