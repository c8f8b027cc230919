use crate::error::Result;
use crate::job::ReduceJob;
use crate::strategy::copy_through;
use crate::topology::WorkerTopology;
use crate::types::{FUSION_ATOM, Rank, ReduceOp, Scope};

/// How a batch's elements split across the intra-node group.
///
/// The divisible region is reduce-scattered so every local peer carries
/// `1 / local_size` of the cross-node traffic in parallel; the remainder is
/// reduced to `root` alone, saving a second round-trip for a few trailing
/// elements. Heterogeneous clusters cannot shard evenly, so everything goes
/// through the root path there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SplitPlan {
    /// Element count after padding.
    pub num_elements: usize,
    /// Shard size owned by each local rank.
    pub per_rank: usize,
    /// Trailing elements handled by `root` alone.
    pub remainder: usize,
    /// Local rank owning the remainder.
    pub root: Rank,
}

impl SplitPlan {
    pub fn compute(num_elements: usize, topo: &WorkerTopology, fused: bool) -> SplitPlan {
        let mut num_elements = num_elements;

        // Fused batches on homogeneous clusters round up to keep the
        // per-rank shard atom-aligned; the fusion buffer is sized for the
        // padding and the trailing garbage never reaches an output buffer.
        // Single-entry batches run in the caller's own buffers and must
        // not grow.
        if topo.is_homogeneous && fused {
            let div = topo.local_size * FUSION_ATOM;
            num_elements = num_elements.div_ceil(div) * div;
        }

        let (per_rank, remainder) = if topo.is_homogeneous {
            (
                num_elements / topo.local_size,
                num_elements % topo.local_size,
            )
        } else {
            (0, num_elements)
        };

        let root = if topo.is_homogeneous {
            topo.local_size - 1
        } else {
            0
        };

        SplitPlan {
            num_elements,
            per_rank,
            remainder,
            root,
        }
    }
}

/// Intra-node reduce-scatter, cross-node host allreduce, intra-node
/// allgather, plus a reduce/broadcast tail for the indivisible remainder.
///
/// # Safety
/// Job buffer pointers must be valid device pointers for `buffer_len`
/// bytes plus padding headroom when the batch is fused.
pub(crate) unsafe fn do_allreduce(job: &mut ReduceJob<'_>, topo: &WorkerTopology) -> Result<()> {
    if topo.is_single_worker() {
        return unsafe { copy_through(job) };
    }

    let element_size = job.ctx.channel.type_size(job.dtype);
    let fused = job.tensor_names.len() > 1;
    let split = SplitPlan::compute(job.num_elements, topo, fused);
    job.num_elements = split.num_elements;
    job.buffer_len = split.num_elements * element_size;

    let per_rank_bytes = split.per_rank * element_size;
    let buffer_at_rank = job.buffer_data + (per_rank_bytes * topo.local_rank) as u64;
    let tail_offset = (per_rank_bytes * topo.local_size) as u64;
    let buffer_tail = job.buffer_data + tail_offset;
    let fused_tail = job.fused_input + tail_offset;
    let is_root = topo.local_rank == split.root;

    // Phase 1: each local rank ends up owning a reduced shard.
    if split.per_rank > 0 {
        unsafe {
            job.ctx.collectives.reduce_scatter(
                job.fused_input,
                buffer_at_rank,
                split.per_rank,
                job.dtype,
                ReduceOp::Sum,
                job.comm,
                job.stream,
            )?;
        }
        job.record_event_end("REDUCE_SCATTER")?;
    }

    // Phase 2: the tail collapses onto root, appended after the shards.
    if split.remainder > 0 {
        unsafe {
            job.ctx.collectives.reduce(
                fused_tail,
                buffer_tail,
                split.remainder,
                job.dtype,
                ReduceOp::Sum,
                split.root,
                job.comm,
                job.stream,
            )?;
        }
        job.record_event_end("REDUCE")?;
    }

    // Phase 3: cross-node allreduce of this rank's responsibility over the
    // host transport. Root's region is its shard plus the tail, which sit
    // contiguously.
    if topo.is_homogeneous || is_root {
        let own_elements = split.per_rank + if is_root { split.remainder } else { 0 };
        let own_bytes = own_elements * element_size;
        let mut host_buffer = vec![0u8; own_bytes];

        // The host transport is not stream-aware, so the device work has
        // to land before the copy. This is the only mid-job host sync.
        job.wait_for_events()?;

        // With a pageable destination this copy is synchronous with
        // respect to the host, which keeps the span accurate.
        job.timeline
            .activity_start(&job.tensor_names, "MEMCPY_IN_HOST_BUFFER");
        unsafe {
            job.ctx.devices.memcpy_d2h_async(
                host_buffer.as_mut_ptr() as u64,
                buffer_at_rank,
                own_bytes,
                job.stream,
            )?;
        }
        job.timeline.activity_end(&job.tensor_names);

        job.timeline
            .activity_start(&job.tensor_names, "CROSS_ALLREDUCE");
        job.ctx.channel.allreduce(
            &mut host_buffer,
            own_elements,
            job.dtype,
            ReduceOp::Sum,
            Scope::Cross,
        )?;
        job.timeline.activity_end(&job.tensor_names);

        job.timeline
            .activity_start(&job.tensor_names, "MEMCPY_OUT_HOST_BUFFER");
        unsafe {
            job.ctx.devices.memcpy_h2d_async(
                buffer_at_rank,
                host_buffer.as_ptr() as u64,
                own_bytes,
                job.stream,
            )?;
        }
        job.timeline.activity_end(&job.tensor_names);

        // Ownership moves to the finalizer, which drops it after the
        // event drain.
        job.host_buffer = Some(host_buffer);
    }

    // Phase 4: reconstruct the full buffer from the reduced shards.
    if split.per_rank > 0 {
        unsafe {
            job.ctx.collectives.allgather(
                buffer_at_rank,
                job.buffer_data,
                split.per_rank,
                job.dtype,
                job.comm,
                job.stream,
            )?;
        }
        job.record_event_end("ALLGATHER")?;
    }

    // Phase 5: disseminate the tail from root.
    if split.remainder > 0 {
        unsafe {
            job.ctx.collectives.broadcast(
                buffer_tail,
                buffer_tail,
                split.remainder,
                job.dtype,
                split.root,
                job.comm,
                job.stream,
            )?;
        }
        job.record_event_end("BROADCAST")?;
    }

    Ok(())
}
