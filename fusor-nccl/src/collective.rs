use std::ffi::c_void;
use std::mem::MaybeUninit;

use cudarc::nccl::{result as nccl, safe::Id, sys};

use fusor::{
    CollectiveOps, DataType, FusorError, Rank, RawComm, RawStream, ReduceOp, Result, UNIQUE_ID_BYTES,
    UniqueId,
};

/// Device-collective transport over NCCL.
///
/// Communicators are process-scope: the engine's cache never destroys an
/// entry, so no teardown hooks are needed here.
pub struct NcclCollectiveOps;

// SAFETY: ncclComm_t is thread-safe per NCCL documentation when used with
// proper stream synchronization; this type itself holds no state.
unsafe impl Send for NcclCollectiveOps {}
unsafe impl Sync for NcclCollectiveOps {}

impl NcclCollectiveOps {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NcclCollectiveOps {
    fn default() -> Self {
        Self::new()
    }
}

fn nccl_err(op: &'static str, e: nccl::NcclError) -> FusorError {
    FusorError::collective(op, format!("{e:?}"))
}

fn to_nccl_dtype(dt: DataType) -> sys::ncclDataType_t {
    match dt {
        DataType::I8 => sys::ncclDataType_t::ncclInt8,
        DataType::U8 => sys::ncclDataType_t::ncclUint8,
        DataType::I32 => sys::ncclDataType_t::ncclInt32,
        DataType::I64 => sys::ncclDataType_t::ncclInt64,
        DataType::F16 => sys::ncclDataType_t::ncclFloat16,
        DataType::BF16 => sys::ncclDataType_t::ncclBfloat16,
        DataType::F32 => sys::ncclDataType_t::ncclFloat32,
        DataType::F64 => sys::ncclDataType_t::ncclFloat64,
    }
}

fn to_nccl_op(op: ReduceOp) -> sys::ncclRedOp_t {
    match op {
        ReduceOp::Sum => sys::ncclRedOp_t::ncclSum,
        ReduceOp::Prod => sys::ncclRedOp_t::ncclProd,
        ReduceOp::Min => sys::ncclRedOp_t::ncclMin,
        ReduceOp::Max => sys::ncclRedOp_t::ncclMax,
    }
}

/// Serialize an NCCL unique id into the engine's identifier bytes.
pub fn id_to_bytes(id: &Id) -> [u8; UNIQUE_ID_BYTES] {
    let internal = id.internal();
    let mut bytes = [0u8; UNIQUE_ID_BYTES];
    for (b, &c) in bytes.iter_mut().zip(internal.iter()) {
        *b = c as u8;
    }
    bytes
}

/// Rebuild an NCCL unique id from the engine's identifier bytes.
pub fn id_from_bytes(bytes: &[u8; UNIQUE_ID_BYTES]) -> Id {
    let mut internal = [0i8; UNIQUE_ID_BYTES];
    for (c, &b) in internal.iter_mut().zip(bytes.iter()) {
        *c = b as i8;
    }
    Id::uninit(internal)
}

/// View the safe-layer id as the sys-level struct.
///
/// `ncclUniqueId` is `#[repr(C)]` with a single `[c_char; 128]` field, so
/// the pointer cast is layout-exact.
fn id_to_sys(id: &Id) -> &sys::ncclUniqueId {
    let internal = id.internal();
    unsafe { &*(internal as *const [std::ffi::c_char; 128] as *const sys::ncclUniqueId) }
}

impl CollectiveOps for NcclCollectiveOps {
    fn unique_id(&self) -> Result<UniqueId> {
        let id = Id::new().map_err(|e| nccl_err("ncclGetUniqueId", e))?;
        Ok(UniqueId::from_bytes(id_to_bytes(&id)))
    }

    fn comm_init_rank(&self, group_size: usize, id: &UniqueId, rank: Rank) -> Result<RawComm> {
        let id = id_from_bytes(id.as_bytes());
        let mut comm = MaybeUninit::uninit();
        unsafe {
            nccl::comm_init_rank(
                comm.as_mut_ptr(),
                group_size as i32,
                *id_to_sys(&id),
                rank as i32,
            )
            .map_err(|e| nccl_err("ncclCommInitRank", e))?;
        }
        Ok(unsafe { comm.assume_init() } as RawComm)
    }

    unsafe fn allreduce(
        &self,
        src: u64,
        dst: u64,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
        comm: RawComm,
        stream: RawStream,
    ) -> Result<()> {
        unsafe {
            nccl::all_reduce(
                src as *const c_void,
                dst as *mut c_void,
                count,
                to_nccl_dtype(dtype),
                to_nccl_op(op),
                comm as sys::ncclComm_t,
                stream as sys::cudaStream_t,
            )
            .map_err(|e| nccl_err("ncclAllReduce", e))
        }
    }

    unsafe fn reduce_scatter(
        &self,
        src: u64,
        dst: u64,
        recv_count: usize,
        dtype: DataType,
        op: ReduceOp,
        comm: RawComm,
        stream: RawStream,
    ) -> Result<()> {
        unsafe {
            nccl::reduce_scatter(
                src as *const c_void,
                dst as *mut c_void,
                recv_count,
                to_nccl_dtype(dtype),
                to_nccl_op(op),
                comm as sys::ncclComm_t,
                stream as sys::cudaStream_t,
            )
            .map_err(|e| nccl_err("ncclReduceScatter", e))
        }
    }

    unsafe fn allgather(
        &self,
        src: u64,
        dst: u64,
        send_count: usize,
        dtype: DataType,
        comm: RawComm,
        stream: RawStream,
    ) -> Result<()> {
        unsafe {
            nccl::all_gather(
                src as *const c_void,
                dst as *mut c_void,
                send_count,
                to_nccl_dtype(dtype),
                comm as sys::ncclComm_t,
                stream as sys::cudaStream_t,
            )
            .map_err(|e| nccl_err("ncclAllGather", e))
        }
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
        stream: RawStream,
    ) -> Result<()> {
        unsafe {
            nccl::reduce(
                src as *const c_void,
                dst as *mut c_void,
                count,
                to_nccl_dtype(dtype),
                to_nccl_op(op),
                root as i32,
                comm as sys::ncclComm_t,
                stream as sys::cudaStream_t,
            )
            .map_err(|e| nccl_err("ncclReduce", e))
        }
    }

    unsafe fn broadcast(
        &self,
        src: u64,
        dst: u64,
        count: usize,
        dtype: DataType,
        root: Rank,
        comm: RawComm,
        stream: RawStream,
    ) -> Result<()> {
        unsafe {
            nccl::broadcast(
                src as *const c_void,
                dst as *mut c_void,
                count,
                to_nccl_dtype(dtype),
                root as i32,
                comm as sys::ncclComm_t,
                stream as sys::cudaStream_t,
            )
            .map_err(|e| nccl_err("ncclBroadcast", e))
        }
    }
}
