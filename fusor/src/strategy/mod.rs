//! Allreduce strategies over the shared pipeline.

mod flat;
mod hierarchical;

use crate::config::EngineConfig;
use crate::entry::{Response, TensorEntry};
use crate::error::{FusorError, Result};
use crate::job::ReduceJob;
use crate::topology::WorkerTopology;
use crate::types::{CPU_DEVICE_ID, DeviceId, Scope};

use crate::collective::CommPlan;

/// How a batch is reduced. Strategies share the pipeline; they differ in
/// the communicator group they build and the collective sequence they
/// enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllreduceStrategy {
    /// One device-native allreduce across every worker.
    Flat,
    /// Intra-node device collectives around a cross-node host allreduce,
    /// sharded so every intra-node peer carries part of the network
    /// traffic.
    Hierarchical,
}

impl AllreduceStrategy {
    /// Whether this strategy can run the given batch. The dispatching
    /// layer tries strategies in priority order and takes the first
    /// enabled one.
    pub fn enabled(&self, config: &EngineConfig, entries: &[TensorEntry]) -> bool {
        let on_gpu = entries.first().is_some_and(|e| e.device != CPU_DEVICE_ID);
        match self {
            AllreduceStrategy::Flat => on_gpu,
            AllreduceStrategy::Hierarchical => on_gpu && config.hierarchical_allreduce,
        }
    }

    /// Priority-order selection: hierarchical when toggled, else flat.
    pub fn select(config: &EngineConfig, entries: &[TensorEntry]) -> Option<AllreduceStrategy> {
        [AllreduceStrategy::Hierarchical, AllreduceStrategy::Flat]
            .into_iter()
            .find(|s| s.enabled(config, entries))
    }

    /// The device tuple keying this job's communicator.
    pub(crate) fn device_key(
        &self,
        response: &Response,
        topo: &WorkerTopology,
    ) -> Result<Vec<DeviceId>> {
        match self {
            AllreduceStrategy::Flat => {
                if response.devices.len() != topo.world_size {
                    return Err(FusorError::topology(format!(
                        "response lists {} devices for world size {}",
                        response.devices.len(),
                        topo.world_size
                    )));
                }
                Ok(response.devices.clone())
            }
            AllreduceStrategy::Hierarchical => topo
                .local_comm_ranks
                .iter()
                .map(|&r| {
                    response.devices.get(r).copied().ok_or_else(|| {
                        FusorError::topology(format!("no device for intra-node peer rank {r}"))
                    })
                })
                .collect(),
        }
    }

    /// Group shape and unique-id distribution scope.
    pub(crate) fn comm_plan(&self, topo: &WorkerTopology) -> CommPlan {
        match self {
            AllreduceStrategy::Flat => CommPlan {
                rank: topo.rank,
                group_size: topo.world_size,
                scope: Scope::Global,
            },
            AllreduceStrategy::Hierarchical => CommPlan {
                rank: topo.local_rank,
                group_size: topo.local_size,
                scope: Scope::Local,
            },
        }
    }

    /// Enqueue the reduction onto the job's stream.
    ///
    /// # Safety
    /// The job's buffer pointers must be valid device pointers for
    /// `buffer_len` bytes (plus padding headroom for fused hierarchical
    /// batches).
    pub(crate) unsafe fn do_allreduce(
        &self,
        job: &mut ReduceJob<'_>,
        topo: &WorkerTopology,
    ) -> Result<()> {
        match self {
            AllreduceStrategy::Flat => unsafe { flat::do_allreduce(job, topo) },
            AllreduceStrategy::Hierarchical => unsafe { hierarchical::do_allreduce(job, topo) },
        }
    }
}

/// Single-worker groups reduce to a copy; there is nothing to sum with.
pub(crate) unsafe fn copy_through(job: &mut ReduceJob<'_>) -> Result<()> {
    if job.fused_input != job.buffer_data {
        unsafe {
            job.ctx.devices.memcpy_d2d_async(
                job.buffer_data,
                job.fused_input,
                job.buffer_len,
                job.stream,
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    fn gpu_entry() -> TensorEntry {
        TensorEntry::new("t", 0, 0, 1, DataType::F32, 0, Box::new(|_| {}))
    }

    fn cpu_entry() -> TensorEntry {
        TensorEntry::new("t", 0, 0, 1, DataType::F32, CPU_DEVICE_ID, Box::new(|_| {}))
    }

    #[test]
    fn flat_requires_gpu_batch() {
        let cfg = EngineConfig::default();
        assert!(AllreduceStrategy::Flat.enabled(&cfg, &[gpu_entry()]));
        assert!(!AllreduceStrategy::Flat.enabled(&cfg, &[cpu_entry()]));
        assert!(!AllreduceStrategy::Flat.enabled(&cfg, &[]));
    }

    #[test]
    fn hierarchical_requires_toggle() {
        let mut cfg = EngineConfig::default();
        assert!(!AllreduceStrategy::Hierarchical.enabled(&cfg, &[gpu_entry()]));
        cfg.hierarchical_allreduce = true;
        assert!(AllreduceStrategy::Hierarchical.enabled(&cfg, &[gpu_entry()]));
        assert!(!AllreduceStrategy::Hierarchical.enabled(&cfg, &[cpu_entry()]));
    }

    #[test]
    fn selection_priority() {
        let mut cfg = EngineConfig::default();
        assert_eq!(
            AllreduceStrategy::select(&cfg, &[gpu_entry()]),
            Some(AllreduceStrategy::Flat)
        );
        cfg.hierarchical_allreduce = true;
        assert_eq!(
            AllreduceStrategy::select(&cfg, &[gpu_entry()]),
            Some(AllreduceStrategy::Hierarchical)
        );
        assert_eq!(AllreduceStrategy::select(&cfg, &[cpu_entry()]), None);
    }

    #[test]
    fn hierarchical_key_uses_intra_node_peers() {
        let topo = WorkerTopology::from_node_sizes(&[2, 2], 2);
        let response = Response::new(vec![0, 1, 0, 1]);
        let key = AllreduceStrategy::Hierarchical
            .device_key(&response, &topo)
            .unwrap();
        assert_eq!(key, vec![0, 1]);

        let flat = AllreduceStrategy::Flat.device_key(&response, &topo).unwrap();
        assert_eq!(flat, vec![0, 1, 0, 1]);
    }
}
