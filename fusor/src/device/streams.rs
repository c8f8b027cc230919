use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::device::DeviceOps;
use crate::error::Result;
use crate::types::{DeviceId, RawStream};

/// One reduction stream per device, created on first touch.
///
/// The engine must not share the training framework's compute stream:
/// synchronizing on it would stall reductions behind unrelated compute and
/// vice-versa. A dedicated non-blocking stream at the most urgent priority
/// lets the runtime interleave copies and reductions with user compute.
pub struct StreamRegistry {
    ops: Arc<dyn DeviceOps>,
    streams: Mutex<HashMap<DeviceId, RawStream>>,
}

impl StreamRegistry {
    pub fn new(ops: Arc<dyn DeviceOps>) -> Self {
        Self {
            ops,
            streams: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, device: DeviceId) -> Result<RawStream> {
        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(&stream) = streams.get(&device) {
            return Ok(stream);
        }

        let (_, greatest) = self.ops.stream_priority_range(device)?;
        let stream = self.ops.create_stream(device, greatest)?;
        tracing::debug!(device, priority = greatest, "created reduction stream");
        streams.insert(device, stream);
        Ok(stream)
    }
}
