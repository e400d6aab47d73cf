//! `ResourceUsage` records and the append/widen-in-place "usage recorder".

use std::ops::Range;

use bitflags::bitflags;

use crate::column::ChunkList;
use crate::handle::Handle;

bitflags! {
    /// Which shader stages a binding is active in.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ShaderStages: u32 {
        const VERTEX   = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE  = 1 << 2;
    }
}

bitflags! {
    /// How a resource is used by one recorded access.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct UsageType: u32 {
        const SHADER_READ            = 1 << 0;
        const SHADER_WRITE           = 1 << 1;
        const SHADER_READ_WRITE      = 1 << 2;
        const VERTEX_BUFFER          = 1 << 3;
        const INDEX_BUFFER           = 1 << 4;
        const INDIRECT_BUFFER        = 1 << 5;
        const BLIT_SOURCE            = 1 << 6;
        const BLIT_DESTINATION       = 1 << 7;
        const BLIT_SYNCHRONISATION   = 1 << 8;
        const RENDER_TARGET_READ     = 1 << 9;
        const RENDER_TARGET_WRITE    = 1 << 10;
        const INPUT_ATTACHMENT       = 1 << 11;
        const UNUSED_ARGUMENT_BUFFER = 1 << 12;
        const MIP_GENERATION         = 1 << 13;
    }
}

impl UsageType {
    pub fn is_read_write(&self) -> bool {
        self.contains(UsageType::SHADER_READ_WRITE)
    }
}

/// Which subresources of `handle` a usage touches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Subresources {
    Whole,
    BufferRange(Range<u64>),
    TextureSliceRange {
        mip_levels: Range<u32>,
        array_layers: Range<u32>,
    },
}

/// One shader-visible use of a resource. `active_range` is the GPU command
/// range over which this use is in effect; it starts as
/// `first_command..first_command + 1` and is only ever widened, never
/// shrunk, as later commands extend the same logical binding.
#[derive(Clone, Debug)]
pub struct ResourceUsage {
    pub handle: Handle,
    pub subresources: Subresources,
    pub ty: UsageType,
    pub stages: ShaderStages,
    pub active_range: Range<u64>,
    pub pass_index: u32,
}

impl Default for ResourceUsage {
    fn default() -> Self {
        ResourceUsage {
            handle: Handle::decode(0),
            subresources: Subresources::Whole,
            ty: UsageType::empty(),
            stages: ShaderStages::empty(),
            active_range: 0..0,
            pass_index: 0,
        }
    }
}

/// A stable reference to one entry in a resource's `usages` chunk list,
/// returned by the recorder so the binding resolver can widen its range
/// later without re-searching the list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UsageNode {
    pub handle: Handle,
    index: usize,
}

impl UsageNode {
    /// Widens the usage's `active_range.end` to `new_end`, never shrinking
    /// it (a no-op if `new_end` is not past the current end).
    pub fn widen_to(&self, usages: &ChunkList<ResourceUsage>, new_end: u64) {
        usages.with_mut(self.index, |usage| {
            if new_end > usage.active_range.end {
                usage.active_range.end = new_end;
            }
        });
    }

    pub fn read(&self, usages: &ChunkList<ResourceUsage>) -> ResourceUsage {
        usages.get(self.index).clone()
    }
}

/// Appends a new usage record for `handle` into `usages`, returning the
/// node the caller must hold to widen it later. Per §4.E, writers to a
/// single resource's usage list are serialized by the caller (the encoder
/// that owns the binding during a pass).
pub fn record(usages: &ChunkList<ResourceUsage>, usage: ResourceUsage) -> UsageNode {
    let handle = usage.handle;
    let index = usages.push(usage);
    UsageNode { handle, index }
}
