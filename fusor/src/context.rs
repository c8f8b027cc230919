use std::sync::Arc;

use crate::channel::HostChannel;
use crate::collective::{CollectiveOps, CommCache};
use crate::device::{DeviceOps, EventPool, StreamRegistry};
use crate::fusion::FusionArena;

/// Process-scope capabilities shared by every job: the provider handles
/// plus the engine-owned caches. Jobs borrow this; they never own it.
pub struct EngineContext {
    pub devices: Arc<dyn DeviceOps>,
    pub collectives: Arc<dyn CollectiveOps>,
    pub channel: Arc<dyn HostChannel>,
    pub events: EventPool,
    pub streams: StreamRegistry,
    pub comms: CommCache,
    pub fusion: FusionArena,
}

impl EngineContext {
    pub fn new(
        devices: Arc<dyn DeviceOps>,
        collectives: Arc<dyn CollectiveOps>,
        channel: Arc<dyn HostChannel>,
        fusion_buffer_bytes: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            events: EventPool::new(devices.clone()),
            streams: StreamRegistry::new(devices.clone()),
            comms: CommCache::new(),
            fusion: FusionArena::new(devices.clone(), fusion_buffer_bytes),
            devices,
            collectives,
            channel,
        })
    }
}
