//! Kiln-vmem: read-only virtual memory access for song data
//!
//! Song, pattern, instrument and sample bytes live in externally-owned
//! read-only storage (flash on hardware, a plain buffer on hosts). The engine
//! never assumes this data is resident; every access goes through [`RoMem`],
//! a "copy these bytes, report success/failure" interface.
//!
//! Copies may fail (bad address, transient backing-store trouble). Failures
//! are reported to the caller, never panicked on - a failed copy ends one
//! playback session, not the process.
//!
//! # Block anchors
//!
//! Backing stores are block-cached. A [`BlockAnchor`] pins the cache block
//! containing the most recently copied bytes so that a tight decode loop
//! (e.g. streaming notes out of one pattern) does not race cache eviction
//! re-fetching the same block. Callers release the anchor once they are done
//! with a burst of reads; holding one across ticks pins memory needlessly.

use core::fmt;

/// Virtual address into the read-only store.
pub type VirtAddr = u32;

/// Size of one cache block in the backing store.
///
/// Anchors pin exactly one block of this size. 256 bytes matches the flash
/// page granularity the engine was designed around; hosts may back it with
/// anything, the value only affects anchor switch-over points.
pub const BLOCK_SIZE: u32 = 256;

/// A failed read from the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemFault {
    /// The requested range is not mapped.
    OutOfRange { va: VirtAddr, len: u32 },
    /// The backing store failed transiently (cold cache, bus error, ...).
    Transient { va: VirtAddr },
}

impl fmt::Display for MemFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemFault::OutOfRange { va, len } => {
                write!(f, "unmapped read of {} bytes at 0x{:08x}", len, va)
            }
            MemFault::Transient { va } => {
                write!(f, "transient backing-store failure at 0x{:08x}", va)
            }
        }
    }
}

impl std::error::Error for MemFault {}

/// Dogpile-avoidance reference: pins one cache block between reads.
///
/// Obtained from [`BlockAnchor::new`], threaded through
/// [`RoMem::copy_anchored`], and released with [`BlockAnchor::release`] (or
/// on drop). The anchor itself only records which block is pinned; the store
/// interprets it.
#[derive(Debug, Default)]
pub struct BlockAnchor {
    block: Option<u32>,
}

impl BlockAnchor {
    /// Create an anchor pinning nothing.
    pub fn new() -> Self {
        Self { block: None }
    }

    /// Block index currently pinned, if any.
    pub fn block(&self) -> Option<u32> {
        self.block
    }

    /// Re-point the anchor at the block containing `va`.
    ///
    /// Returns the previously pinned block when the pin moved, so stores
    /// that refcount blocks can unpin the old one.
    pub fn repin(&mut self, va: VirtAddr) -> Option<u32> {
        let block = va / BLOCK_SIZE;
        match self.block {
            Some(old) if old == block => None,
            old => {
                self.block = Some(block);
                old
            }
        }
    }

    /// Drop the pin.
    pub fn release(&mut self) -> Option<u32> {
        self.block.take()
    }
}

/// Read-only byte store addressed by virtual address.
///
/// All engine-side access to song data goes through this trait. Copies are
/// bounded-latency and non-blocking from the engine's point of view; a store
/// that cannot satisfy a read promptly fails it instead.
pub trait RoMem {
    /// Copy `dst.len()` bytes starting at `va` into `dst`.
    fn copy(&self, va: VirtAddr, dst: &mut [u8]) -> Result<(), MemFault>;

    /// Copy like [`RoMem::copy`], keeping `anchor` pinned to the block
    /// containing `va` until the anchor is released or re-pinned.
    ///
    /// The default implementation just tracks the pin in the anchor; stores
    /// with real caches override this to refcount blocks.
    fn copy_anchored(
        &self,
        anchor: &mut BlockAnchor,
        va: VirtAddr,
        dst: &mut [u8],
    ) -> Result<(), MemFault> {
        anchor.repin(va);
        self.copy(va, dst)
    }

    /// Notify the store that `anchor` no longer needs its block.
    fn release_anchor(&self, anchor: &mut BlockAnchor) {
        anchor.release();
    }
}

impl<T: RoMem + ?Sized> RoMem for &T {
    fn copy(&self, va: VirtAddr, dst: &mut [u8]) -> Result<(), MemFault> {
        (**self).copy(va, dst)
    }

    fn copy_anchored(
        &self,
        anchor: &mut BlockAnchor,
        va: VirtAddr,
        dst: &mut [u8],
    ) -> Result<(), MemFault> {
        (**self).copy_anchored(anchor, va, dst)
    }

    fn release_anchor(&self, anchor: &mut BlockAnchor) {
        (**self).release_anchor(anchor)
    }
}

/// Heap-backed store for hosts and tests.
///
/// Optionally fails reads after a programmed count, to exercise the engine's
/// mid-playback failure paths. Pin accounting is kept so tests can assert
/// that readers release their anchors between ticks.
#[derive(Debug)]
pub struct RamStore {
    data: Vec<u8>,
    /// Fail every copy once this many have succeeded. `u32::MAX` = never.
    fail_after: std::cell::Cell<u32>,
    pins: std::cell::Cell<u32>,
}

impl Default for RamStore {
    fn default() -> RamStore {
        RamStore::new(Vec::new())
    }
}

impl RamStore {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            fail_after: std::cell::Cell::new(u32::MAX),
            pins: std::cell::Cell::new(0),
        }
    }

    /// Current end of the store; the next appended byte lands here.
    pub fn top(&self) -> VirtAddr {
        self.data.len() as VirtAddr
    }

    /// Append bytes, returning the virtual address they start at.
    pub fn append(&mut self, bytes: &[u8]) -> VirtAddr {
        let va = self.top();
        self.data.extend_from_slice(bytes);
        va
    }

    /// Make the next `n` copies succeed and every one after that fail.
    pub fn fail_after(&self, n: u32) {
        self.fail_after.set(n);
    }

    /// Number of blocks currently pinned by outstanding anchors.
    pub fn pinned_blocks(&self) -> u32 {
        self.pins.get()
    }
}

impl RoMem for RamStore {
    fn copy(&self, va: VirtAddr, dst: &mut [u8]) -> Result<(), MemFault> {
        let remaining = self.fail_after.get();
        if remaining == 0 {
            return Err(MemFault::Transient { va });
        }
        if remaining != u32::MAX {
            self.fail_after.set(remaining - 1);
        }

        let start = va as usize;
        let end = start + dst.len();
        if end > self.data.len() {
            return Err(MemFault::OutOfRange {
                va,
                len: dst.len() as u32,
            });
        }
        dst.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn copy_anchored(
        &self,
        anchor: &mut BlockAnchor,
        va: VirtAddr,
        dst: &mut [u8],
    ) -> Result<(), MemFault> {
        if anchor.block().is_none() {
            self.pins.set(self.pins.get() + 1);
        }
        anchor.repin(va);
        self.copy(va, dst)
    }

    fn release_anchor(&self, anchor: &mut BlockAnchor) {
        if anchor.release().is_some() {
            self.pins.set(self.pins.get().saturating_sub(1));
        }
    }
}
