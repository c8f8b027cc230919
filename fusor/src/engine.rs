use std::sync::Arc;

use crate::channel::HostChannel;
use crate::collective::CollectiveOps;
use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::device::DeviceOps;
use crate::entry::{Response, TensorEntry, batch_signature};
use crate::error::{FusorError, Result};
use crate::executor::{CompletionExecutor, CompletionTask};
use crate::fusion::FusionArena;
use crate::job::ReduceJob;
use crate::strategy::AllreduceStrategy;
use crate::timeline::Timeline;
use crate::topology::WorkerTopology;
use crate::types::Status;

/// The collective-reduction engine.
///
/// Takes batches of per-tensor reduction requests and executes them as
/// fused, overlapped collective operations on a dedicated stream,
/// delivering per-tensor completion callbacks from an owned finalizer
/// thread. One submission thread drives one batch at a time; the external
/// coordinator owns that serialization.
pub struct ReduceEngine {
    ctx: Arc<EngineContext>,
    executor: CompletionExecutor,
    topo: WorkerTopology,
    config: EngineConfig,
    timeline: Arc<dyn Timeline>,
}

impl ReduceEngine {
    pub fn new(
        devices: Arc<dyn DeviceOps>,
        collectives: Arc<dyn CollectiveOps>,
        channel: Arc<dyn HostChannel>,
        topo: WorkerTopology,
        config: EngineConfig,
        timeline: Arc<dyn Timeline>,
    ) -> Result<Self> {
        let ctx = EngineContext::new(devices, collectives, channel, config.fusion_buffer_bytes);
        let executor = CompletionExecutor::spawn(ctx.clone(), timeline.clone())?;
        Ok(Self {
            ctx,
            executor,
            topo,
            config,
            timeline,
        })
    }

    pub fn topology(&self) -> &WorkerTopology {
        &self.topo
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The shared capability context (streams, events, communicators,
    /// fusion buffer).
    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Pick the highest-priority strategy whose `enabled` accepts the
    /// batch.
    pub fn select_strategy(&self, entries: &[TensorEntry]) -> Option<AllreduceStrategy> {
        AllreduceStrategy::select(&self.config, entries)
    }

    /// Execute one batch: bind stream and communicator, fuse, reduce,
    /// scatter back, and hand completion to the finalizer.
    ///
    /// Entries must share element type and device. Errors raised here
    /// (unsupported type, malformed batch, any runtime failure before the
    /// finalizer handoff) abort the batch before any callback fires.
    /// On success the entry callbacks fire later with the final status.
    ///
    /// # Safety
    /// Every entry's `input` and `output` must be valid device pointers
    /// for the entry's byte length, on the entry's device, and must stay
    /// valid until its callback fires.
    pub unsafe fn execute(
        &self,
        strategy: AllreduceStrategy,
        entries: Vec<TensorEntry>,
        response: &Response,
    ) -> Result<Status> {
        let (dtype, device) = batch_signature(&entries)?;
        if !dtype.collective_supported() {
            return Err(FusorError::UnsupportedDType { dtype });
        }
        if device < 0 {
            return Err(FusorError::InvalidDevice {
                device,
                what: "device-collective reduction",
            });
        }

        // Initialize: device, stream, communicator, fresh event queue.
        self.ctx.devices.set_device(device)?;
        let stream = self.ctx.streams.get_or_create(device)?;

        let key = strategy.device_key(response, &self.topo)?;
        let plan = strategy.comm_plan(&self.topo);
        let tensor_names: Vec<String> = entries.iter().map(|e| e.name.clone()).collect();
        let comm = self.ctx.comms.get_or_build(
            &key,
            &plan,
            self.ctx.collectives.as_ref(),
            self.ctx.channel.as_ref(),
            self.timeline.as_ref(),
            &tensor_names,
        )?;

        let mut job = ReduceJob::new(
            &self.ctx,
            &self.timeline,
            device,
            stream,
            comm,
            dtype,
            tensor_names,
        );
        // Lets the timeline show stream-enqueue latency.
        job.record_event_end("QUEUE")?;

        let element_size = self.ctx.channel.type_size(dtype);
        job.num_elements = entries.iter().map(|e| e.num_elements).sum();
        job.buffer_len = job.num_elements * element_size;

        let fused = entries.len() > 1;
        if fused {
            // Capacity includes padding headroom for the hierarchical
            // shard alignment.
            let capacity =
                FusionArena::padded_elements(job.num_elements, self.topo.local_size) * element_size;
            let buffer = self.ctx.fusion.acquire(device, capacity)?;
            job.fused_input = buffer;
            job.buffer_data = buffer;
            unsafe { job.memcpy_in(&entries)? };
            job.record_event_end("MEMCPY_IN_FUSION_BUFFER")?;
        } else {
            job.fused_input = entries[0].input;
            job.buffer_data = entries[0].output;
        }

        unsafe { strategy.do_allreduce(&mut job, &self.topo)? };

        if fused {
            unsafe { job.memcpy_out(&entries)? };
            job.record_event_end("MEMCPY_OUT_FUSION_BUFFER")?;
        }

        // Finalize: terminal completion marker, then hand the queue to the
        // finalizer instead of blocking this thread on the stream.
        job.record_terminal()?;
        self.executor.submit(CompletionTask {
            device,
            tensor_names: job.tensor_names,
            events: job.events,
            host_buffer: job.host_buffer,
            entries,
        })?;

        Ok(Status::InProgress)
    }
}
