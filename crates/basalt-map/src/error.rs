use basalt_core::allocator::AllocError;
use basalt_core::glam::IVec3;
use thiserror::Error;

#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum StoreError {
    #[error("probe limit of {limit} exceeded while inserting payload with hash {hash:#010x}")]
    ProbeLimitExceeded { hash: u32, limit: u32 },
    #[error("payload allocation failed: {0}")]
    Capacity(#[from] AllocError),
}

/// Why a batch of staged edits was rejected. Nothing from a rejected batch is visible in the hierarchy.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum CommitError {
    #[error("commit of {chunks} chunks rejected by the payload store: {source}")]
    Store {
        chunks: usize,
        #[source]
        source: StoreError,
    },
    #[error("commit rejected: {0}")]
    Capacity(#[from] AllocError),
}

#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum StagingError {
    #[error("voxel {0} is outside of the world")]
    OutOfBounds(IVec3),
    #[error("chunk {0} is outside of the world")]
    ChunkOutOfBounds(IVec3),
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed snapshot: {0}")]
    Malformed(String),
}
