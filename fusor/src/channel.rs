//! Host-transport contract.
//!
//! The cross-node channel (MPI-like) used for identifier distribution,
//! rendezvous barriers and the host-side leg of hierarchical reduction.
//! fusor treats it as blocking and thread-safe among the peers of the
//! addressed scope.

use crate::error::Result;
use crate::types::{DataType, Rank, ReduceOp, Scope};

pub trait HostChannel: Send + Sync {
    /// Broadcast `buf` byte-wise from `root` (scope-relative rank) to every
    /// peer in `scope`. All peers in the scope must enter; this is a
    /// rendezvous.
    fn broadcast(&self, buf: &mut [u8], scope: Scope, root: Rank) -> Result<()>;

    /// Block until every peer in `scope` has entered.
    fn barrier(&self, scope: Scope) -> Result<()>;

    /// In-place element-wise reduction of `buf` (`count` elements of
    /// `dtype`) across the peers of `scope`.
    fn allreduce(
        &self,
        buf: &mut [u8],
        count: usize,
        dtype: DataType,
        op: ReduceOp,
        scope: Scope,
    ) -> Result<()>;

    /// Element size as the transport sees it.
    fn type_size(&self, dtype: DataType) -> usize {
        dtype.size_in_bytes()
    }
}
