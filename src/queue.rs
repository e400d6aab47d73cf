//! Per-queue submitted/completed command indices and the wait primitive
//! that arbitrates CPU/GPU lifetime (§4.I).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::sync::SpinLock;

/// Up to 8 queues may be registered at once, matching the 8-entry
/// `readWaitIndices`/`writeWaitIndices` arrays on every resource slot.
pub const MAX_QUEUES: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueueId(pub u8);

struct QueueSlot {
    in_use: std::sync::atomic::AtomicBool,
    last_submitted_command: AtomicU64,
    last_completed_command: AtomicU64,
    last_submission_at: std::sync::Mutex<Option<Instant>>,
    last_completion_at: std::sync::Mutex<Option<Instant>>,
}

impl Default for QueueSlot {
    fn default() -> Self {
        QueueSlot {
            in_use: std::sync::atomic::AtomicBool::new(false),
            last_submitted_command: AtomicU64::new(0),
            last_completed_command: AtomicU64::new(0),
            last_submission_at: std::sync::Mutex::new(None),
            last_completion_at: std::sync::Mutex::new(None),
        }
    }
}

/// How long `wait_for_command` busy-spins before falling back to sleeping
/// between polls.
const SPIN_BUDGET: u32 = 1000;

/// Registry of up to `MAX_QUEUES` command queues, each exposing monotonic
/// submitted/completed command-index atomics.
pub struct QueueRegistry {
    slots: [QueueSlot; MAX_QUEUES],
    alloc_lock: SpinLock,
}

impl Default for QueueRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueRegistry {
    pub fn new() -> Self {
        QueueRegistry {
            slots: Default::default(),
            alloc_lock: SpinLock::new(),
        }
    }

    /// Allocates a fresh queue. Errors with `CapacityExceeded` if all 8
    /// slots are occupied.
    pub fn allocate(&self) -> Result<QueueId> {
        let _guard = self.alloc_lock.lock();
        for (index, slot) in self.slots.iter().enumerate() {
            if !slot.in_use.swap(true, Ordering::AcqRel) {
                slot.last_submitted_command.store(0, Ordering::Relaxed);
                slot.last_completed_command.store(0, Ordering::Relaxed);
                return Ok(QueueId(index as u8));
            }
        }
        Err(Error::CapacityExceeded {
            kind: crate::handle::ResourceKind::Buffer,
            capacity: MAX_QUEUES,
        })
    }

    pub fn dispose(&self, queue: QueueId) {
        let _guard = self.alloc_lock.lock();
        self.slots[queue.0 as usize].in_use.store(false, Ordering::Release);
    }

    pub fn iterate_active(&self) -> impl Iterator<Item = QueueId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.in_use.load(Ordering::Acquire))
            .map(|(index, _)| QueueId(index as u8))
    }

    fn slot(&self, queue: QueueId) -> &QueueSlot {
        &self.slots[queue.0 as usize]
    }

    pub fn last_submitted_command(&self, queue: QueueId) -> u64 {
        self.slot(queue).last_submitted_command.load(Ordering::Relaxed)
    }

    pub fn last_completed_command(&self, queue: QueueId) -> u64 {
        self.slot(queue).last_completed_command.load(Ordering::Relaxed)
    }

    /// Records that `index` has just been submitted on `queue`. Monotonic:
    /// out-of-order or repeated submissions of an already-recorded index are
    /// ignored.
    pub fn mark_submitted(&self, queue: QueueId, index: u64) {
        let slot = self.slot(queue);
        slot.last_submitted_command.fetch_max(index, Ordering::AcqRel);
        *slot.last_submission_at.lock().unwrap() = Some(Instant::now());
    }

    /// Records that `index` has just completed on the GPU.
    pub fn mark_completed(&self, queue: QueueId, index: u64) {
        let slot = self.slot(queue);
        slot.last_completed_command.fetch_max(index, Ordering::AcqRel);
        *slot.last_completion_at.lock().unwrap() = Some(Instant::now());
    }

    /// Busy-spins (yielding between polls, then sleeping briefly past the
    /// spin budget) until `queue`'s `last_completed_command >= index`.
    pub fn wait_for_command(&self, queue: QueueId, index: u64) {
        let mut spins = 0u32;
        while self.last_completed_command(queue) < index {
            if spins < SPIN_BUDGET {
                std::thread::yield_now();
                spins += 1;
            } else {
                std::thread::sleep(Duration::from_micros(200));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_up_to_capacity() {
        let reg = QueueRegistry::new();
        let mut ids = Vec::new();
        for _ in 0..MAX_QUEUES {
            ids.push(reg.allocate().unwrap());
        }
        assert!(reg.allocate().is_err());
        reg.dispose(ids[0]);
        assert!(reg.allocate().is_ok());
    }

    #[test]
    fn wait_for_command_unblocks_on_completion() {
        let reg = std::sync::Arc::new(QueueRegistry::new());
        let q = reg.allocate().unwrap();
        reg.mark_submitted(q, 5);
        let reg2 = reg.clone();
        let handle = std::thread::spawn(move || {
            reg2.wait_for_command(q, 5);
        });
        std::thread::sleep(Duration::from_millis(5));
        reg.mark_completed(q, 5);
        handle.join().unwrap();
        assert_eq!(reg.last_completed_command(q), 5);
    }
}
