use std::sync::Arc;

use crate::context::EngineContext;
use crate::entry::TensorEntry;
use crate::error::Result;
use crate::timeline::Timeline;
use crate::types::{DataType, DeviceId, RawComm, RawEvent, RawStream};

/// One slot of a job's event queue: an optional stage name plus the device
/// event recorded at the end of that stage. Unnamed slots mark completion
/// only; named slots become timeline spans when drained.
pub(crate) type EventSlot = (Option<&'static str>, RawEvent);

/// Mutable state of one in-flight reduction batch.
///
/// Built by `initialize`, threaded through the strategy stages on the
/// submission thread, then decomposed into a completion task. The event
/// queue is single-writer (submission thread) / single-reader (finalizer).
pub(crate) struct ReduceJob<'a> {
    pub ctx: &'a EngineContext,
    pub timeline: &'a Arc<dyn Timeline>,
    pub device: DeviceId,
    pub stream: RawStream,
    pub comm: RawComm,
    pub dtype: DataType,
    pub tensor_names: Vec<String>,
    pub events: Vec<EventSlot>,
    pub host_buffer: Option<Vec<u8>>,
    /// Source of the reduction: the fusion buffer after memcpy-in, or the
    /// single entry's input.
    pub fused_input: u64,
    /// Destination and workspace: the fusion buffer, or the single entry's
    /// output.
    pub buffer_data: u64,
    pub num_elements: usize,
    pub buffer_len: usize,
}

impl<'a> ReduceJob<'a> {
    pub fn new(
        ctx: &'a EngineContext,
        timeline: &'a Arc<dyn Timeline>,
        device: DeviceId,
        stream: RawStream,
        comm: RawComm,
        dtype: DataType,
        tensor_names: Vec<String>,
    ) -> Self {
        Self {
            ctx,
            timeline,
            device,
            stream,
            comm,
            dtype,
            tensor_names,
            events: Vec::new(),
            host_buffer: None,
            fused_input: 0,
            buffer_data: 0,
            num_elements: 0,
            buffer_len: 0,
        }
    }

    /// Append a stage-named event, but only when a timeline sink is
    /// attached; the untraced path records nothing here.
    pub fn record_event_end(&mut self, stage: &'static str) -> Result<()> {
        if !self.timeline.initialized() {
            return Ok(());
        }
        let event = self.ctx.events.acquire(self.device)?;
        self.ctx.devices.record_event(event, self.stream)?;
        self.events.push((Some(stage), event));
        Ok(())
    }

    /// Append the terminal unnamed event. Its completion dominates all
    /// prior stream work, so draining it implies the output buffers are
    /// ready.
    pub fn record_terminal(&mut self) -> Result<()> {
        let event = self.ctx.events.acquire(self.device)?;
        self.ctx.devices.record_event(event, self.stream)?;
        self.events.push((None, event));
        Ok(())
    }

    /// Drain the events recorded so far, blocking the submission thread
    /// until the associated device work is visible on the host.
    pub fn wait_for_events(&mut self) -> Result<()> {
        drain_events(
            self.ctx,
            self.timeline.as_ref(),
            &self.tensor_names,
            &mut self.events,
            self.device,
        )
    }

    /// Enqueue the copies concatenating every entry into the fusion buffer.
    ///
    /// # Safety
    /// Entry input pointers must be valid device pointers; the fusion
    /// buffer must hold the batch.
    pub unsafe fn memcpy_in(&mut self, entries: &[TensorEntry]) -> Result<()> {
        let mut offset = 0u64;
        for e in entries {
            let bytes = e.size_bytes();
            unsafe {
                self.ctx.devices.memcpy_d2d_async(
                    self.buffer_data + offset,
                    e.input,
                    bytes,
                    self.stream,
                )?;
            }
            offset += bytes as u64;
        }
        Ok(())
    }

    /// Enqueue the copies scattering each entry's own length back to its
    /// output buffer. Padding introduced after memcpy-in is never copied
    /// out.
    ///
    /// # Safety
    /// Entry output pointers must be valid device pointers.
    pub unsafe fn memcpy_out(&mut self, entries: &[TensorEntry]) -> Result<()> {
        let mut offset = 0u64;
        for e in entries {
            let bytes = e.size_bytes();
            unsafe {
                self.ctx.devices.memcpy_d2d_async(
                    e.output,
                    self.buffer_data + offset,
                    bytes,
                    self.stream,
                )?;
            }
            offset += bytes as u64;
        }
        Ok(())
    }
}

/// FIFO-consume an event queue: open the span for named slots, block on
/// the event, close the span, recycle the event.
pub(crate) fn drain_events(
    ctx: &EngineContext,
    timeline: &dyn Timeline,
    tensors: &[String],
    events: &mut Vec<EventSlot>,
    device: DeviceId,
) -> Result<()> {
    for (stage, event) in events.drain(..) {
        if let Some(stage) = stage {
            timeline.activity_start(tensors, stage);
        }
        let waited = ctx.devices.synchronize_event(event);
        if stage.is_some() {
            timeline.activity_end(tensors);
        }
        ctx.events.release(device, event);
        waited?;
    }
    Ok(())
}
