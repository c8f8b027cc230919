//! Device-collective contract and the communicator cache.

mod cache;

pub use cache::{CommCache, CommPlan};

use crate::error::Result;
use crate::types::{DataType, Rank, RawComm, RawStream, ReduceOp};

/// Byte length of a communicator unique identifier.
pub const UNIQUE_ID_BYTES: usize = 128;

/// Opaque identifier negotiated once per communicator group.
///
/// Generated by the group's rank 0 and distributed byte-wise over the host
/// transport before every peer calls `comm_init_rank` with it.
#[derive(Clone)]
pub struct UniqueId([u8; UNIQUE_ID_BYTES]);

impl UniqueId {
    pub fn zeroed() -> Self {
        Self([0; UNIQUE_ID_BYTES])
    }

    pub fn from_bytes(bytes: [u8; UNIQUE_ID_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; UNIQUE_ID_BYTES] {
        &self.0
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8; UNIQUE_ID_BYTES] {
        &mut self.0
    }
}

impl std::fmt::Debug for UniqueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // First eight bytes are enough to tell ids apart in logs.
        write!(f, "UniqueId({:02x?}..)", &self.0[..8])
    }
}

/// The device-collective transport (NCCL-like) as the engine needs it.
///
/// Collectives are enqueued on the given stream; every peer of the
/// communicator must enqueue the same operation sequence.
pub trait CollectiveOps: Send + Sync {
    /// Generate a fresh unique identifier. Called only by the group's
    /// rank 0.
    fn unique_id(&self) -> Result<UniqueId>;

    /// Initialize this peer's member of the communicator. A rendezvous
    /// among all `group_size` peers sharing `id`.
    fn comm_init_rank(&self, group_size: usize, id: &UniqueId, rank: Rank) -> Result<RawComm>;

    /// Element-wise reduction of `count` elements; every peer receives the
    /// result.
    ///
    /// # Safety
    /// `src` and `dst` must be valid device pointers for
    /// `count * dtype.size_in_bytes()` bytes until the operation lands.
    unsafe fn allreduce(
        &self,
        src: u64,
        dst: u64,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
        comm: RawComm,
        stream: RawStream,
    ) -> Result<()>;

    /// Reduction where peer `r` receives the shard
    /// `[r * recv_count, (r + 1) * recv_count)`.
    ///
    /// # Safety
    /// `src` must cover `group_size * recv_count` elements, `dst` must
    /// cover `recv_count`.
    unsafe fn reduce_scatter(
        &self,
        src: u64,
        dst: u64,
        recv_count: usize,
        dtype: DataType,
        op: ReduceOp,
        comm: RawComm,
        stream: RawStream,
    ) -> Result<()>;

    /// Concatenation of every peer's `send_count` elements, in rank order.
    ///
    /// # Safety
    /// `src` must cover `send_count` elements, `dst` must cover
    /// `group_size * send_count`.
    unsafe fn allgather(
        &self,
        src: u64,
        dst: u64,
        send_count: usize,
        dtype: DataType,
        comm: RawComm,
        stream: RawStream,
    ) -> Result<()>;

    /// Element-wise reduction delivered only at `root`.
    ///
    /// # Safety
    /// As for [`CollectiveOps::allreduce`]; `dst` is only written at `root`.
    unsafe fn reduce(
        &self,
        src: u64,
        dst: u64,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
        root: Rank,
        comm: RawComm,
        stream: RawStream,
    ) -> Result<()>;

    /// Copy `count` elements from `root` to every peer.
    ///
    /// # Safety
    /// As for [`CollectiveOps::allreduce`].
    unsafe fn broadcast(
        &self,
        src: u64,
        dst: u64,
        count: usize,
        dtype: DataType,
        root: Rank,
        comm: RawComm,
        stream: RawStream,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_id_roundtrip() {
        let mut bytes = [0u8; UNIQUE_ID_BYTES];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let id = UniqueId::from_bytes(bytes);
        assert_eq!(id.as_bytes(), &bytes);
    }

    #[test]
    fn unique_id_debug_is_short() {
        let id = UniqueId::zeroed();
        let s = format!("{id:?}");
        assert!(s.len() < 64, "debug repr too long: {s}");
    }
}
