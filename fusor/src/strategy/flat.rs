use crate::error::Result;
use crate::job::ReduceJob;
use crate::strategy::copy_through;
use crate::topology::WorkerTopology;
use crate::types::ReduceOp;

/// One device-native sum-allreduce over the fused buffer, all workers in a
/// single communicator.
///
/// # Safety
/// Job buffer pointers must be valid device pointers for `buffer_len`
/// bytes.
pub(crate) unsafe fn do_allreduce(job: &mut ReduceJob<'_>, topo: &WorkerTopology) -> Result<()> {
    if topo.is_single_worker() {
        return unsafe { copy_through(job) };
    }

    unsafe {
        job.ctx.collectives.allreduce(
            job.fused_input,
            job.buffer_data,
            job.num_elements,
            job.dtype,
            ReduceOp::Sum,
            job.comm,
            job.stream,
        )?;
    }
    job.record_event_end("ALLREDUCE")
}
