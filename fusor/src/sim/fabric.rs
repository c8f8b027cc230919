use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::channel::HostChannel;
use crate::collective::{CollectiveOps, UNIQUE_ID_BYTES, UniqueId};
use crate::error::{FusorError, Result};
use crate::reduce::reduce_slice;
use crate::types::{DataType, Rank, RawComm, RawStream, ReduceOp, Scope};

/// Shared rendezvous fabric for an in-process worker set.
///
/// Every blocking operation is an *exchange*: each member of a group
/// deposits a payload under a key, blocks until the group is complete, and
/// leaves with every member's payload in member order. Keys carry a round
/// number so back-to-back operations on the same group never collide.
pub struct SimFabric {
    node_sizes: Vec<usize>,
    uid_counter: AtomicU64,
    collective_calls: AtomicU64,
    inner: Mutex<FabricState>,
    ready: Condvar,
}

#[derive(Default)]
struct FabricState {
    exchanges: HashMap<ExchangeKey, ExchangeState>,
    comms: Vec<CommInstance>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ExchangeKey {
    Global { round: u64 },
    Local { node: usize, round: u64 },
    Cross { local_rank: usize, round: u64 },
    CommInit { uid: u64 },
    Collective { uid: u64, round: u64 },
}

struct ExchangeState {
    expected: usize,
    payloads: BTreeMap<usize, Vec<u8>>,
    complete: bool,
    departed: usize,
}

/// One rank's member of a simulated communicator.
struct CommInstance {
    uid: u64,
    size: usize,
    rank: Rank,
    round: u64,
}

/// Group shape seen by one collective call.
#[derive(Clone, Copy)]
struct CommShape {
    uid: u64,
    size: usize,
    rank: Rank,
    round: u64,
}

impl SimFabric {
    pub fn new(node_sizes: &[usize]) -> Arc<Self> {
        Arc::new(Self {
            node_sizes: node_sizes.to_vec(),
            uid_counter: AtomicU64::new(0),
            collective_calls: AtomicU64::new(0),
            inner: Mutex::new(FabricState::default()),
            ready: Condvar::new(),
        })
    }

    pub fn world_size(&self) -> usize {
        self.node_sizes.iter().sum()
    }

    /// Number of unique ids handed out so far. One per communicator build,
    /// which makes cache idempotence observable.
    pub fn unique_ids_issued(&self) -> u64 {
        self.uid_counter.load(Ordering::SeqCst)
    }

    /// Number of device-collective calls executed across all ranks.
    pub fn collective_calls(&self) -> u64 {
        self.collective_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn node_of(&self, rank: Rank) -> usize {
        let mut first = 0;
        for (i, &n) in self.node_sizes.iter().enumerate() {
            if rank < first + n {
                return i;
            }
            first += n;
        }
        panic!("rank {rank} out of range");
    }

    pub(crate) fn local_rank_of(&self, rank: Rank) -> usize {
        let node = self.node_of(rank);
        let first: usize = self.node_sizes[..node].iter().sum();
        rank - first
    }

    /// Resolve `(key-template, member index, member count)` for a host
    /// scope as seen from `rank`.
    fn scope_shape(&self, scope: Scope, rank: Rank) -> (ScopeGroup, usize, usize) {
        match scope {
            Scope::Global => (ScopeGroup::Global, rank, self.world_size()),
            Scope::Local => {
                let node = self.node_of(rank);
                (
                    ScopeGroup::Local(node),
                    self.local_rank_of(rank),
                    self.node_sizes[node],
                )
            }
            Scope::Cross => {
                let local_rank = self.local_rank_of(rank);
                let my_node = self.node_of(rank);
                // Peers: one per node that has a worker at this local rank.
                let mut index = 0;
                let mut count = 0;
                for (node, &n) in self.node_sizes.iter().enumerate() {
                    if n > local_rank {
                        if node == my_node {
                            index = count;
                        }
                        count += 1;
                    }
                }
                (ScopeGroup::Cross(local_rank), index, count)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, FabricState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deposit `payload`, block for the group, return all payloads in
    /// member order.
    fn exchange(
        &self,
        key: ExchangeKey,
        expected: usize,
        index: usize,
        payload: Vec<u8>,
    ) -> Vec<Vec<u8>> {
        let mut state = self.lock();
        {
            let ex = state
                .exchanges
                .entry(key.clone())
                .or_insert_with(|| ExchangeState {
                    expected,
                    payloads: BTreeMap::new(),
                    complete: false,
                    departed: 0,
                });
            ex.payloads.insert(index, payload);
            if ex.payloads.len() == expected {
                ex.complete = true;
                self.ready.notify_all();
            }
        }

        loop {
            match state.exchanges.get(&key) {
                Some(ex) if ex.complete => break,
                _ => state = self.ready.wait(state).unwrap_or_else(PoisonError::into_inner),
            }
        }

        let (result, empty) = {
            let ex = state
                .exchanges
                .get_mut(&key)
                .expect("exchange removed before all members departed");
            let result: Vec<Vec<u8>> = ex.payloads.values().cloned().collect();
            ex.departed += 1;
            (result, ex.departed == ex.expected)
        };
        if empty {
            state.exchanges.remove(&key);
        }
        result
    }

    fn register_comm(&self, uid: u64, size: usize, rank: Rank) -> RawComm {
        let mut state = self.lock();
        state.comms.push(CommInstance {
            uid,
            size,
            rank,
            round: 0,
        });
        state.comms.len() as RawComm
    }

    fn comm_shape(&self, comm: RawComm) -> Result<CommShape> {
        let mut state = self.lock();
        let instance = (comm as usize)
            .checked_sub(1)
            .and_then(|idx| state.comms.get_mut(idx))
            .ok_or_else(|| FusorError::collective("comm_lookup", format!("bad handle {comm}")))?;
        let shape = CommShape {
            uid: instance.uid,
            size: instance.size,
            rank: instance.rank,
            round: instance.round,
        };
        instance.round += 1;
        Ok(shape)
    }

    fn collective_exchange(&self, shape: CommShape, payload: Vec<u8>) -> Vec<Vec<u8>> {
        self.collective_calls.fetch_add(1, Ordering::SeqCst);
        self.exchange(
            ExchangeKey::Collective {
                uid: shape.uid,
                round: shape.round,
            },
            shape.size,
            shape.rank,
            payload,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ScopeGroup {
    Global,
    Local(usize),
    Cross(usize),
}

impl ScopeGroup {
    fn key(self, round: u64) -> ExchangeKey {
        match self {
            ScopeGroup::Global => ExchangeKey::Global { round },
            ScopeGroup::Local(node) => ExchangeKey::Local { node, round },
            ScopeGroup::Cross(local_rank) => ExchangeKey::Cross { local_rank, round },
        }
    }
}

unsafe fn read_device(ptr: u64, bytes: usize) -> Vec<u8> {
    if bytes == 0 {
        return Vec::new();
    }
    unsafe { std::slice::from_raw_parts(ptr as *const u8, bytes) }.to_vec()
}

unsafe fn write_device(ptr: u64, data: &[u8]) {
    if !data.is_empty() {
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr as *mut u8, data.len()) };
    }
}

/// Rank-order fold of every member's payload. Fixed order keeps results
/// bit-identical across ranks and repetitions.
fn fold_payloads(
    payloads: &[Vec<u8>],
    count: usize,
    dtype: DataType,
    op: ReduceOp,
) -> Result<Vec<u8>> {
    let mut acc = payloads[0].clone();
    for p in &payloads[1..] {
        reduce_slice(&mut acc, p, count, dtype, op)?;
    }
    Ok(acc)
}

/// One rank's host transport over the shared fabric.
pub struct SimChannel {
    fabric: Arc<SimFabric>,
    rank: Rank,
    rounds: Mutex<HashMap<ScopeGroup, u64>>,
}

impl SimChannel {
    pub fn new(fabric: Arc<SimFabric>, rank: Rank) -> Self {
        Self {
            fabric,
            rank,
            rounds: Mutex::new(HashMap::new()),
        }
    }

    fn next_round(&self, group: ScopeGroup) -> u64 {
        let mut rounds = self.rounds.lock().unwrap_or_else(PoisonError::into_inner);
        let round = rounds.entry(group).or_insert(0);
        let current = *round;
        *round += 1;
        current
    }

    fn scoped_exchange(&self, scope: Scope, payload: Vec<u8>) -> (Vec<Vec<u8>>, usize) {
        let (group, index, expected) = self.fabric.scope_shape(scope, self.rank);
        let round = self.next_round(group);
        let all = self.fabric.exchange(group.key(round), expected, index, payload);
        (all, index)
    }
}

impl HostChannel for SimChannel {
    fn broadcast(&self, buf: &mut [u8], scope: Scope, root: Rank) -> Result<()> {
        let payload = {
            let (_, index, _) = self.fabric.scope_shape(scope, self.rank);
            if index == root { buf.to_vec() } else { Vec::new() }
        };
        let (all, _) = self.scoped_exchange(scope, payload);
        let data = all
            .get(root)
            .ok_or_else(|| FusorError::transport("broadcast", format!("no root {root}")))?;
        if data.len() != buf.len() {
            return Err(FusorError::transport(
                "broadcast",
                format!("root sent {} bytes, expected {}", data.len(), buf.len()),
            ));
        }
        buf.copy_from_slice(data);
        Ok(())
    }

    fn barrier(&self, scope: Scope) -> Result<()> {
        let (_, _) = self.scoped_exchange(scope, Vec::new());
        Ok(())
    }

    fn allreduce(
        &self,
        buf: &mut [u8],
        count: usize,
        dtype: DataType,
        op: ReduceOp,
        scope: Scope,
    ) -> Result<()> {
        let (all, _) = self.scoped_exchange(scope, buf.to_vec());
        let acc = fold_payloads(&all, count, dtype, op)?;
        buf.copy_from_slice(&acc);
        Ok(())
    }
}

/// One rank's device-collective transport over the shared fabric.
///
/// Collectives run synchronously on the calling thread; the stream
/// argument is accepted and ignored, so enqueue order and stream order
/// coincide.
pub struct SimCollective {
    fabric: Arc<SimFabric>,
}

impl SimCollective {
    pub fn new(fabric: Arc<SimFabric>) -> Self {
        Self { fabric }
    }
}

impl CollectiveOps for SimCollective {
    fn unique_id(&self) -> Result<UniqueId> {
        let uid = self.fabric.uid_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let mut bytes = [0u8; UNIQUE_ID_BYTES];
        bytes[..8].copy_from_slice(&uid.to_le_bytes());
        Ok(UniqueId::from_bytes(bytes))
    }

    fn comm_init_rank(&self, group_size: usize, id: &UniqueId, rank: Rank) -> Result<RawComm> {
        let uid = u64::from_le_bytes(id.as_bytes()[..8].try_into().map_err(|_| {
            FusorError::collective("comm_init_rank", "malformed unique id".to_string())
        })?);
        if uid == 0 {
            return Err(FusorError::collective(
                "comm_init_rank",
                "unique id was never generated".to_string(),
            ));
        }
        // Rendezvous: all peers must arrive before any initializes.
        self.fabric
            .exchange(ExchangeKey::CommInit { uid }, group_size, rank, Vec::new());
        Ok(self.fabric.register_comm(uid, group_size, rank))
    }

    unsafe fn allreduce(
        &self,
        src: u64,
        dst: u64,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
        comm: RawComm,
        _stream: RawStream,
    ) -> Result<()> {
        let shape = self.fabric.comm_shape(comm)?;
        let payload = unsafe { read_device(src, count * dtype.size_in_bytes()) };
        let all = self.fabric.collective_exchange(shape, payload);
        let acc = fold_payloads(&all, count, dtype, op)?;
        unsafe { write_device(dst, &acc) };
        Ok(())
    }

    unsafe fn reduce_scatter(
        &self,
        src: u64,
        dst: u64,
        recv_count: usize,
        dtype: DataType,
        op: ReduceOp,
        comm: RawComm,
        _stream: RawStream,
    ) -> Result<()> {
        let shape = self.fabric.comm_shape(comm)?;
        let total = recv_count * shape.size;
        let payload = unsafe { read_device(src, total * dtype.size_in_bytes()) };
        let all = self.fabric.collective_exchange(shape, payload);
        let acc = fold_payloads(&all, total, dtype, op)?;
        let shard_bytes = recv_count * dtype.size_in_bytes();
        let offset = shape.rank * shard_bytes;
        unsafe { write_device(dst, &acc[offset..offset + shard_bytes]) };
        Ok(())
    }

    unsafe fn allgather(
        &self,
        src: u64,
        dst: u64,
        send_count: usize,
        dtype: DataType,
        comm: RawComm,
        _stream: RawStream,
    ) -> Result<()> {
        let shape = self.fabric.comm_shape(comm)?;
        let payload = unsafe { read_device(src, send_count * dtype.size_in_bytes()) };
        let all = self.fabric.collective_exchange(shape, payload);
        let gathered: Vec<u8> = all.concat();
        unsafe { write_device(dst, &gathered) };
        Ok(())
    }

    unsafe fn reduce(
        &self,
        src: u64,
        dst: u64,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
        root: Rank,
        comm: RawComm,
        _stream: RawStream,
    ) -> Result<()> {
        let shape = self.fabric.comm_shape(comm)?;
        let payload = unsafe { read_device(src, count * dtype.size_in_bytes()) };
        let all = self.fabric.collective_exchange(shape, payload);
        if shape.rank == root {
            let acc = fold_payloads(&all, count, dtype, op)?;
            unsafe { write_device(dst, &acc) };
        }
        Ok(())
    }

    unsafe fn broadcast(
        &self,
        src: u64,
        dst: u64,
        count: usize,
        dtype: DataType,
        root: Rank,
        comm: RawComm,
        _stream: RawStream,
    ) -> Result<()> {
        let shape = self.fabric.comm_shape(comm)?;
        let payload = unsafe { read_device(src, count * dtype.size_in_bytes()) };
        let all = self.fabric.collective_exchange(shape, payload);
        let data = all
            .get(root)
            .ok_or_else(|| FusorError::collective("broadcast", format!("no root {root}")))?;
        unsafe { write_device(dst, data) };
        Ok(())
    }
}
