//! Error taxonomy. See `SPEC_FULL.md` §7 for the propagation rules: most of
//! these are fatal to the caller; `OffsetWithoutBuffer` and
//! `UploadFillFailed` are recoverable and only short-circuit the offending
//! operation.

use crate::handle::{Handle, ResourceKind};
use crate::resolver::BindingPath;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("stale or invalid handle: {handle:?}")]
    InvalidHandle { handle: Handle },

    #[error("{kind:?} registry capacity exceeded ({capacity} slots)")]
    CapacityExceeded { kind: ResourceKind, capacity: usize },

    #[error("persistent argument buffer cannot bind transient resource {handle:?}")]
    PersistencyViolation { handle: Handle },

    #[error("setBufferOffset with no prior setBuffer at binding path {path:?}")]
    OffsetWithoutBuffer { path: BindingPath },

    #[error("no pipeline state bound at draw/dispatch time")]
    MissingPipelineState,

    #[error("upload fill closure failed: {0}")]
    UploadFillFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
