//! Collaborator interfaces (§6): the backend translation layer and the
//! pipeline-reflection database. Both are out of scope for this crate — it
//! ships no concrete implementation, only the traits the resolver and
//! argument buffer engine are written against.

use std::ops::Range;

use crate::handle::{Handle, ResourceKind};
use crate::resolver::BindingPath;
use crate::usage::{ShaderStages, UsageType};

/// The GPU backend translation layer. Implemented by whatever crate owns
/// the concrete Metal/Vulkan/D3D12/WebGPU objects; this crate only calls
/// through it.
pub trait RenderBackend: Send + Sync {
    fn update_label(&self, handle: Handle, label: Option<&str>);

    /// Releases the backend object(s) behind `handle`. Called only once a
    /// registry has determined the handle is no longer in use.
    fn dispose(&self, kind: ResourceKind, handle: Handle);

    /// A CPU-visible pointer into `buffer`'s contents over `range`, or null
    /// if the buffer is not CPU-visible.
    fn buffer_contents(&self, buffer: Handle, range: Range<u64>) -> *mut u8;

    /// Notifies the backend that `range` of `buffer` was written through
    /// `buffer_contents` and must be flushed/synchronised if the platform
    /// requires it.
    fn buffer_did_modify_range(&self, buffer: Handle, range: Range<u64>);

    /// Swaps in `new_backing` as the resource's backing object, returning
    /// whatever was there before. Used for history-buffer ping-ponging and
    /// similar resource aliasing.
    fn replace_backing_resource(&self, handle: Handle, new_backing: Option<u64>) -> Option<u64>;

    /// Produces (or reuses, if `current` is `Some`) the opaque encoder for
    /// writing into an argument buffer at `path`.
    fn argument_buffer_encoder(&self, path: BindingPath, current: Option<u64>) -> u64;

    fn argument_buffer_path(&self, index: u32, stages: ShaderStages) -> BindingPath;
}

/// Reflection metadata about a compiled pipeline, consulted by the resolver
/// to turn binding keys into concrete `BindingPath`s.
pub trait PipelineReflection: Send + Sync {
    /// Resolves `(argument_name, array_index)` (optionally scoped inside an
    /// enclosing argument buffer's path) to a concrete path, or `None` if
    /// the binding is inactive in this pipeline.
    fn binding_path(&self, argument_name: &str, array_index: u32, argument_buffer_path: Option<BindingPath>) -> Option<BindingPath>;

    fn binding_is_active(&self, path: BindingPath) -> bool;

    fn argument_reflection(&self, path: BindingPath) -> Option<ArgumentReflection>;

    /// Re-scopes `path_in_original_argument_buffer` under a (possibly new)
    /// enclosing argument buffer path, for step 6's pipeline-change re-walk.
    fn rebase_path(&self, path_in_original_argument_buffer: BindingPath, new_argument_buffer_path: BindingPath) -> BindingPath;
}

#[derive(Clone, Debug)]
pub struct ArgumentReflection {
    pub usage_type: UsageType,
    pub active_stages: ShaderStages,
    pub active_range: Range<u64>,
    pub is_active: bool,
    pub ty: ArgumentType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgumentType {
    Buffer,
    Texture,
    Sampler,
    ArgumentBuffer,
    ArgumentBufferArray,
    AccelerationStructure,
}
