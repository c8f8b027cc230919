use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::channel::HostChannel;
use crate::collective::{CollectiveOps, UniqueId};
use crate::error::{FusorError, Result};
use crate::timeline::Timeline;
use crate::types::{DeviceId, Rank, RawComm, Scope};

/// How a job's communicator group maps onto the worker set.
#[derive(Debug, Clone)]
pub struct CommPlan {
    /// This worker's rank within the group.
    pub rank: Rank,
    /// Number of peers in the group.
    pub group_size: usize,
    /// Host-transport scope over which the unique id is distributed.
    pub scope: Scope,
}

/// Lazily built communicators keyed by the participating device tuple.
///
/// Two keys are equal iff the id sequences are element-wise equal; `Vec`'s
/// derived `Hash`/`Eq` make both total. An entry, once inserted, is never
/// replaced or removed.
pub struct CommCache {
    comms: Mutex<HashMap<Vec<DeviceId>, RawComm>>,
}

impl CommCache {
    pub fn new() -> Self {
        Self {
            comms: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the communicator for `key`, negotiating a fresh one on a
    /// miss.
    ///
    /// The build is a rendezvous: every peer of `plan.scope` must reach it
    /// in the same batch. Rank 0 of the group generates the unique id, the
    /// host transport distributes it byte-wise, every peer initializes its
    /// member, and a global barrier closes the build (initialization is
    /// prone to deadlock without it).
    pub fn get_or_build(
        &self,
        key: &[DeviceId],
        plan: &CommPlan,
        collectives: &dyn CollectiveOps,
        channel: &dyn HostChannel,
        timeline: &dyn Timeline,
        tensors: &[String],
    ) -> Result<RawComm> {
        if let Some(&bad) = key.iter().find(|&&d| d < 0) {
            return Err(FusorError::topology(format!(
                "communicator key contains non-device id {bad}"
            )));
        }

        let mut comms = self.comms.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(&comm) = comms.get(key) {
            return Ok(comm);
        }

        timeline.activity_start(tensors, "INIT_COMM");

        let mut id = UniqueId::zeroed();
        if plan.rank == 0 {
            id = collectives.unique_id()?;
        }
        channel.broadcast(id.as_mut_bytes(), plan.scope, 0)?;

        let comm = collectives.comm_init_rank(plan.group_size, &id, plan.rank)?;
        channel.barrier(Scope::Global)?;

        timeline.activity_end(tensors);
        tracing::debug!(
            ?key,
            rank = plan.rank,
            group_size = plan.group_size,
            "built communicator"
        );

        comms.insert(key.to_vec(), comm);
        Ok(comm)
    }

    /// Number of cached communicators.
    pub fn len(&self) -> usize {
        self.comms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CommCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::NullTimeline;
    use crate::types::{DataType, RawStream, ReduceOp};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingCollective {
        ids_issued: AtomicUsize,
        inits: AtomicUsize,
    }

    impl CollectiveOps for CountingCollective {
        fn unique_id(&self) -> Result<UniqueId> {
            self.ids_issued.fetch_add(1, Ordering::SeqCst);
            Ok(UniqueId::zeroed())
        }

        fn comm_init_rank(
            &self,
            _group_size: usize,
            _id: &UniqueId,
            _rank: Rank,
        ) -> Result<RawComm> {
            Ok(self.inits.fetch_add(1, Ordering::SeqCst) as RawComm + 1)
        }

        unsafe fn allreduce(
            &self,
            _src: u64,
            _dst: u64,
            _count: usize,
            _dtype: DataType,
            _op: ReduceOp,
            _comm: RawComm,
            _stream: RawStream,
        ) -> Result<()> {
            Ok(())
        }

        unsafe fn reduce_scatter(
            &self,
            _src: u64,
            _dst: u64,
            _recv_count: usize,
            _dtype: DataType,
            _op: ReduceOp,
            _comm: RawComm,
            _stream: RawStream,
        ) -> Result<()> {
            Ok(())
        }

        unsafe fn allgather(
            &self,
            _src: u64,
            _dst: u64,
            _send_count: usize,
            _dtype: DataType,
            _comm: RawComm,
            _stream: RawStream,
        ) -> Result<()> {
            Ok(())
        }

        unsafe fn reduce(
            &self,
            _src: u64,
            _dst: u64,
            _count: usize,
            _dtype: DataType,
            _op: ReduceOp,
            _root: Rank,
            _comm: RawComm,
            _stream: RawStream,
        ) -> Result<()> {
            Ok(())
        }

        unsafe fn broadcast(
            &self,
            _src: u64,
            _dst: u64,
            _count: usize,
            _dtype: DataType,
            _root: Rank,
            _comm: RawComm,
            _stream: RawStream,
        ) -> Result<()> {
            Ok(())
        }
    }

    struct LoopbackChannel;

    impl HostChannel for LoopbackChannel {
        fn broadcast(&self, _buf: &mut [u8], _scope: Scope, _root: Rank) -> Result<()> {
            Ok(())
        }

        fn barrier(&self, _scope: Scope) -> Result<()> {
            Ok(())
        }

        fn allreduce(
            &self,
            _buf: &mut [u8],
            _count: usize,
            _dtype: DataType,
            _op: ReduceOp,
            _scope: Scope,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn plan() -> CommPlan {
        CommPlan {
            rank: 0,
            group_size: 1,
            scope: Scope::Global,
        }
    }

    #[test]
    fn builds_once_per_key() {
        let cache = CommCache::new();
        let coll = CountingCollective::default();

        let a = cache
            .get_or_build(&[0, 1], &plan(), &coll, &LoopbackChannel, &NullTimeline, &[])
            .unwrap();
        let b = cache
            .get_or_build(&[0, 1], &plan(), &coll, &LoopbackChannel, &NullTimeline, &[])
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(coll.ids_issued.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_keys_build_distinct_comms() {
        let cache = CommCache::new();
        let coll = CountingCollective::default();

        let a = cache
            .get_or_build(&[0, 1], &plan(), &coll, &LoopbackChannel, &NullTimeline, &[])
            .unwrap();
        let b = cache
            .get_or_build(&[1, 0], &plan(), &coll, &LoopbackChannel, &NullTimeline, &[])
            .unwrap();
        assert_ne!(a, b, "key equality is element-wise, order matters");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn negative_ids_rejected() {
        let cache = CommCache::new();
        let coll = CountingCollective::default();
        let err = cache
            .get_or_build(
                &[0, -1],
                &plan(),
                &coll,
                &LoopbackChannel,
                &NullTimeline,
                &[],
            )
            .unwrap_err();
        assert!(matches!(err, FusorError::Topology { .. }));
        assert_eq!(coll.ids_issued.load(Ordering::SeqCst), 0);
    }
}
