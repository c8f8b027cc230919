//! In-process simulation of a multi-node worker set.
//!
//! Host memory stands in for device memory and a shared rendezvous fabric
//! stands in for both transports, so the fusion layout, communicator
//! negotiation and hierarchical split run and get tested without GPUs. One engine per simulated worker, one OS thread per worker.

mod device;
mod fabric;

pub use device::SimDeviceOps;
pub use fabric::{SimChannel, SimCollective, SimFabric};

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::engine::ReduceEngine;
use crate::entry::Response;
use crate::error::Result;
use crate::timeline::{NullTimeline, Timeline};
use crate::topology::WorkerTopology;
use crate::types::{DeviceId, Rank};

/// A simulated worker set sharing one rendezvous fabric.
pub struct SimCluster {
    fabric: Arc<SimFabric>,
    node_sizes: Vec<usize>,
    config: EngineConfig,
}

/// One simulated worker: its engine plus introspection handles.
pub struct SimWorker {
    pub rank: Rank,
    pub topo: WorkerTopology,
    pub engine: ReduceEngine,
    pub devices: Arc<SimDeviceOps>,
    pub fabric: Arc<SimFabric>,
}

impl SimWorker {
    /// The device this worker's tensors live on.
    pub fn device(&self) -> DeviceId {
        self.topo.local_rank as DeviceId
    }
}

impl SimCluster {
    pub fn new(node_sizes: &[usize], config: EngineConfig) -> Self {
        Self {
            fabric: SimFabric::new(node_sizes),
            node_sizes: node_sizes.to_vec(),
            config,
        }
    }

    pub fn fabric(&self) -> &Arc<SimFabric> {
        &self.fabric
    }

    pub fn world_size(&self) -> usize {
        self.fabric.world_size()
    }

    /// The coordinator descriptor for this cluster: each rank's device is
    /// its local ordinal.
    pub fn response(&self) -> Response {
        let devices = (0..self.world_size())
            .map(|r| self.fabric.local_rank_of(r) as DeviceId)
            .collect();
        Response::new(devices)
    }

    /// Bootstrap one worker with a disabled timeline.
    pub fn worker(&self, rank: Rank) -> Result<SimWorker> {
        self.worker_with_timeline(rank, Arc::new(NullTimeline))
    }

    /// Bootstrap one worker with the given timeline sink.
    pub fn worker_with_timeline(
        &self,
        rank: Rank,
        timeline: Arc<dyn Timeline>,
    ) -> Result<SimWorker> {
        let topo = WorkerTopology::from_node_sizes(&self.node_sizes, rank);
        let devices = Arc::new(SimDeviceOps::new());
        let engine = ReduceEngine::new(
            devices.clone(),
            Arc::new(SimCollective::new(self.fabric.clone())),
            Arc::new(SimChannel::new(self.fabric.clone(), rank)),
            topo.clone(),
            self.config.clone(),
            timeline,
        )?;
        Ok(SimWorker {
            rank,
            topo,
            engine,
            devices,
            fabric: self.fabric.clone(),
        })
    }

    /// Run `f` once per rank, each on its own thread, keeping every worker
    /// alive until all return. Collectives rendezvous through the shared
    /// fabric, so `f` must drive the same batch sequence on every rank.
    pub fn run<F>(&self, f: F)
    where
        F: Fn(&SimWorker) + Send + Sync,
    {
        std::thread::scope(|scope| {
            for rank in 0..self.world_size() {
                let f = &f;
                scope.spawn(move || {
                    let worker = self.worker(rank).expect("bootstrap sim worker");
                    f(&worker);
                });
            }
        });
    }
}
