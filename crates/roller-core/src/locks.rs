//! Fixed-size table of per-name mutexes.
//!
//! [`ShardLocks`] maps a target name onto one of a fixed number of slots using
//! a 32-bit FNV-1a hash. The same name always lands on the same slot; two names
//! that collide simply share a lock. The table is built once and shared through
//! an `Arc`. It only excludes tasks within one process; cross-process safety
//! comes from the plan store's conditional writes.

use tokio::sync::Mutex;

/// Default number of slots.
pub const DEFAULT_SLOTS: usize = 1024;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a over the bytes of `name`.
pub fn fnv1a_32(name: &str) -> u32 {
    name.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Table of mutexes indexed by a stable hash of a name.
#[derive(Debug)]
pub struct ShardLocks {
    slots: Box<[Mutex<()>]>,
}

impl ShardLocks {
    /// Creates a table with [`DEFAULT_SLOTS`] slots.
    pub fn new() -> Self {
        Self::with_slots(DEFAULT_SLOTS)
    }

    /// Creates a table with `slots` slots (at least one).
    pub fn with_slots(slots: usize) -> Self {
        let slots = (0..slots.max(1)).map(|_| Mutex::new(())).collect();
        Self { slots }
    }

    /// Number of slots in the table.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false; a table has at least one slot.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Index of the slot guarding `name`.
    pub fn slot_for(&self, name: &str) -> usize {
        fnv1a_32(name) as usize % self.slots.len()
    }

    /// The mutex guarding `name`.
    ///
    /// ```rust
    /// use roller_core::locks::ShardLocks;
    ///
    /// let locks = ShardLocks::new();
    /// assert!(std::ptr::eq(locks.lock_for("mount-a"), locks.lock_for("mount-a")));
    /// ```
    pub fn lock_for(&self, name: &str) -> &Mutex<()> {
        &self.slots[self.slot_for(name)]
    }
}

impl Default for ShardLocks {
    fn default() -> Self {
        Self::new()
    }
}
