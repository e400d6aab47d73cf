//! Packed 64-bit resource identity (`Handle`) and the small value types that
//! parameterize it: `ResourceKind` and `HandleFlags`.
//!
//! Layout is stable across a process (not across major versions), per the
//! wire format in the external-interfaces section of the spec this crate
//! implements:
//!
//! ```text
//! bit 0..=28   index
//! bit 29..=36  generation
//! bit 37..=39  transient_registry_id
//! bit 40..=55  flags
//! bit 56..=63  kind
//! ```

use bitflags::bitflags;

const INDEX_BITS: u32 = 29;
const GENERATION_BITS: u32 = 8;
const TRANSIENT_REGISTRY_ID_BITS: u32 = 3;
const FLAGS_BITS: u32 = 16;
const KIND_BITS: u32 = 8;

const INDEX_SHIFT: u32 = 0;
const GENERATION_SHIFT: u32 = INDEX_SHIFT + INDEX_BITS;
const TRANSIENT_REGISTRY_ID_SHIFT: u32 = GENERATION_SHIFT + GENERATION_BITS;
const FLAGS_SHIFT: u32 = TRANSIENT_REGISTRY_ID_SHIFT + TRANSIENT_REGISTRY_ID_BITS;
const KIND_SHIFT: u32 = FLAGS_SHIFT + FLAGS_BITS;

const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;
const GENERATION_MASK: u64 = (1 << GENERATION_BITS) - 1;
const TRANSIENT_REGISTRY_ID_MASK: u64 = (1 << TRANSIENT_REGISTRY_ID_BITS) - 1;
const FLAGS_MASK: u64 = (1 << FLAGS_BITS) - 1;
const KIND_MASK: u64 = (1 << KIND_BITS) - 1;

/// Largest slot index a single registry can address.
pub const MAX_INDEX: u32 = (1 << INDEX_BITS) - 1;

/// `0` always means "this handle is persistent", never a real transient
/// registry. Persistent handles carry `HandleFlags::PERSISTENT` as well, so
/// the two are kept consistent by construction (`Handle::new` asserts it in
/// debug builds).
pub const PERSISTENT_REGISTRY_ID: TransientRegistryId = 0;

pub type TransientRegistryId = u8;

/// Which capability table / column subset a resource belongs to.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer = 1,
    Texture = 2,
    ArgumentBuffer = 3,
    ArgumentBufferArray = 4,
    Heap = 5,
    AccelerationStructure = 6,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Buffer,
        ResourceKind::Texture,
        ResourceKind::ArgumentBuffer,
        ResourceKind::ArgumentBufferArray,
        ResourceKind::Heap,
        ResourceKind::AccelerationStructure,
    ];

    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => ResourceKind::Buffer,
            2 => ResourceKind::Texture,
            3 => ResourceKind::ArgumentBuffer,
            4 => ResourceKind::ArgumentBufferArray,
            5 => ResourceKind::Heap,
            6 => ResourceKind::AccelerationStructure,
            other => panic!("invalid resource kind discriminant {other}"),
        }
    }
}

bitflags! {
    /// Per-handle flags, packed into the 16 bits below `kind`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct HandleFlags: u16 {
        const PERSISTENT        = 1 << 0;
        const HISTORY_BUFFER    = 1 << 1;
        const RESOURCE_VIEW     = 1 << 2;
        const TEXTURE_VIEW      = 1 << 3;
        const PIXEL_FORMAT_VIEW = 1 << 4;
        const WRITE_COMBINED    = 1 << 5;
    }
}

/// Packed 64-bit identity of a GPU resource. `Copy`, identity-hashable (the
/// hash is just the raw word), and non-owning: a registry must validate a
/// handle's generation against its own slot state before dereferencing it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(u64);

impl Handle {
    pub(crate) fn new(
        index: u32,
        generation: u8,
        transient_registry_id: TransientRegistryId,
        flags: HandleFlags,
        kind: ResourceKind,
    ) -> Self {
        debug_assert!(index <= MAX_INDEX, "index {index} exceeds the 29-bit handle field");
        debug_assert!(
            (transient_registry_id as u64) <= TRANSIENT_REGISTRY_ID_MASK,
            "transient registry id {transient_registry_id} exceeds the 3-bit handle field"
        );
        debug_assert_eq!(
            flags.contains(HandleFlags::PERSISTENT),
            transient_registry_id == PERSISTENT_REGISTRY_ID,
            "HandleFlags::PERSISTENT must agree with transient_registry_id == 0"
        );
        debug_assert!(
            !(kind == ResourceKind::ArgumentBuffer && flags.contains(HandleFlags::HISTORY_BUFFER)),
            "argument buffers may not be history buffers"
        );
        let raw = ((index as u64 & INDEX_MASK) << INDEX_SHIFT)
            | ((generation as u64 & GENERATION_MASK) << GENERATION_SHIFT)
            | ((transient_registry_id as u64 & TRANSIENT_REGISTRY_ID_MASK) << TRANSIENT_REGISTRY_ID_SHIFT)
            | ((flags.bits() as u64 & FLAGS_MASK) << FLAGS_SHIFT)
            | (((kind as u8) as u64 & KIND_MASK) << KIND_SHIFT);
        Handle(raw)
    }

    pub fn index(&self) -> u32 {
        ((self.0 >> INDEX_SHIFT) & INDEX_MASK) as u32
    }

    pub fn generation(&self) -> u8 {
        ((self.0 >> GENERATION_SHIFT) & GENERATION_MASK) as u8
    }

    pub fn transient_registry_id(&self) -> TransientRegistryId {
        ((self.0 >> TRANSIENT_REGISTRY_ID_SHIFT) & TRANSIENT_REGISTRY_ID_MASK) as u8
    }

    pub fn flags(&self) -> HandleFlags {
        HandleFlags::from_bits_truncate(((self.0 >> FLAGS_SHIFT) & FLAGS_MASK) as u16)
    }

    pub fn kind(&self) -> ResourceKind {
        ResourceKind::from_raw(((self.0 >> KIND_SHIFT) & KIND_MASK) as u8)
    }

    pub fn is_persistent(&self) -> bool {
        self.flags().contains(HandleFlags::PERSISTENT)
    }

    pub fn encode(&self) -> u64 {
        self.0
    }

    pub fn decode(raw: u64) -> Self {
        Handle(raw)
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("kind", &self.kind())
            .field("index", &self.index())
            .field("generation", &self.generation())
            .field("transient_registry_id", &self.transient_registry_id())
            .field("flags", &self.flags())
            .finish()
    }
}
