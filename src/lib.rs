//! Resource registry, binding resolver, and staging-upload core for a
//! render-graph runtime.
//!
//! This crate owns GPU resource identity and lifetime (`handle`, `column`,
//! `registry`), per-resource usage tracking (`usage`), per-encoder binding
//! resolution (`resolver`), the argument buffer engine (`argument_buffer`),
//! the staging upload engine (`upload`), and the queue registry (`queue`).
//! It ships no concrete GPU backend: `backend` defines the collaborator
//! traits (`RenderBackend`, `PipelineReflection`) a Metal/Vulkan/D3D12/
//! WebGPU translation layer implements and calls this crate through.

pub mod argument_buffer;
pub mod backend;
pub mod column;
pub mod error;
pub mod handle;
pub mod queue;
pub mod registry;
pub mod resolver;
pub mod sync;
pub mod upload;
pub mod usage;

pub use error::{Error, Result};
pub use handle::{Handle, HandleFlags, ResourceKind};
