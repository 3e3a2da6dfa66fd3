//! Filepath: src/arena.rs
//!
//! Monotonic bump allocator backing all tree storage.
//!
//! An [`Arena`] serves raw, zero-initialized, 64-byte-aligned allocations out
//! of large fixed-size slabs. There is no per-object free: everything handed
//! out lives until the arena itself is dropped. Nodes, centroids, and child
//! pointer arrays are all placed here, so a built tree is torn down by
//! dropping the arenas that fed it.
//!
//! ## Concurrency
//!
//! The slab list sits behind a `parking_lot::Mutex`, so an arena *may* be
//! shared between threads. In practice each inserting worker carries its own
//! arena and the lock is uncontended; the tree tolerates node storage spread
//! across many arenas provided every one of them outlives the tree.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use parking_lot::Mutex;

/// Default slab size: 1 GiB. Allocation is lazy on most platforms, so an
/// arena that only ever serves a few nodes does not commit the full slab.
pub const DEFAULT_SLAB_SIZE: usize = 1 << 30;

/// Every allocation is aligned to this many bytes. Covers cache-line
/// isolation for nodes and the widest SIMD load the vector code performs.
const ARENA_ALIGN: usize = 64;

/// One backing allocation obtained from the global allocator.
struct Slab {
    base: *mut u8,
    layout: Layout,
}

/// Interior state: the slab list plus the bump cursor into the last slab.
struct ArenaState {
    slabs: Vec<Slab>,
    /// Bytes of the current (last) slab already handed out.
    used: usize,
    /// Total bytes handed out across all slabs.
    allocated: usize,
}

/// Monotonic zone allocator.
///
/// # Example
///
/// ```
/// use k_tree::Arena;
///
/// let arena = Arena::new();
/// let p = arena.alloc(128);
/// // The storage is zeroed and stays valid until `arena` drops.
/// unsafe { assert_eq!(*p.as_ptr(), 0) };
/// ```
pub struct Arena {
    slab_size: usize,
    state: Mutex<ArenaState>,
}

// SAFETY: All state mutation goes through the Mutex. The raw slab pointers
// are owned by the arena and only deallocated in Drop, which takes `&mut`.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Create an arena with the default slab size.
    ///
    /// No memory is reserved until the first allocation.
    #[must_use]
    pub fn new() -> Self {
        Self::with_slab_size(DEFAULT_SLAB_SIZE)
    }

    /// Create an arena with a custom slab size (mainly for tests).
    ///
    /// # Panics
    /// Panics if `slab_size` is zero.
    #[must_use]
    pub fn with_slab_size(slab_size: usize) -> Self {
        assert!(slab_size > 0, "slab size must be non-zero");

        Self {
            slab_size,
            state: Mutex::new(ArenaState {
                slabs: Vec::new(),
                used: 0,
                allocated: 0,
            }),
        }
    }

    /// Allocate `bytes` of zero-initialized storage.
    ///
    /// The returned pointer is 64-byte aligned and valid for reads and
    /// writes until the arena is dropped. Requests larger than the slab
    /// size get a dedicated slab of their own.
    ///
    /// # Panics
    /// Panics if `bytes` is zero or the OS allocator fails (arena
    /// exhaustion is only fatal when the machine itself is out of memory).
    pub fn alloc(&self, bytes: usize) -> NonNull<u8> {
        assert!(bytes > 0, "zero-sized arena allocation");

        let mut state = self.state.lock();

        // Round the cursor up so every allocation starts aligned.
        let offset = state.used.next_multiple_of(ARENA_ALIGN);
        let fits = state
            .slabs
            .last()
            .is_some_and(|slab| offset + bytes <= slab.layout.size());

        if !fits {
            let size = self.slab_size.max(bytes);
            let layout = Layout::from_size_align(size, ARENA_ALIGN)
                .expect("slab layout overflow");

            // SAFETY: layout has non-zero size (bytes > 0).
            let base = unsafe { alloc::alloc_zeroed(layout) };
            if base.is_null() {
                alloc::handle_alloc_error(layout);
            }

            state.slabs.push(Slab { base, layout });
            state.used = 0;
        }

        let offset = state.used.next_multiple_of(ARENA_ALIGN);
        let slab = state.slabs.last().expect("slab just ensured");

        // SAFETY: offset + bytes <= slab size, so the result is in bounds.
        let ptr = unsafe { slab.base.add(offset) };
        state.used = offset + bytes;
        state.allocated += bytes;

        // SAFETY: slab.base is non-null and add() stays in the allocation.
        unsafe { NonNull::new_unchecked(ptr) }
    }

    /// Move `value` into the arena and return the raw placement pointer.
    ///
    /// `T` must not need dropping: the arena never runs destructors.
    pub(crate) fn place<T>(&self, value: T) -> *mut T {
        debug_assert!(
            !std::mem::needs_drop::<T>(),
            "arena-placed values are never dropped"
        );
        debug_assert!(std::mem::align_of::<T>() <= ARENA_ALIGN);

        let ptr = self.alloc(std::mem::size_of::<T>()).cast::<T>().as_ptr();

        // SAFETY: ptr is a fresh, aligned, exclusive allocation of size_of::<T>().
        unsafe { ptr.write(value) };
        ptr
    }

    /// Total bytes handed out so far (excluding alignment padding).
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.state.lock().allocated
    }

    /// Number of slabs obtained from the OS.
    #[must_use]
    pub fn slab_count(&self) -> usize {
        self.state.lock().slabs.len()
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Arena")
            .field("slab_size", &self.slab_size)
            .field("slabs", &state.slabs.len())
            .field("allocated", &state.allocated)
            .finish()
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        for slab in self.state.get_mut().slabs.drain(..) {
            // SAFETY: base was returned by alloc_zeroed with exactly this
            // layout and has not been freed (slabs are freed only here).
            unsafe { alloc::dealloc(slab.base, slab.layout) };
        }
    }
}

// ============================================================================
//  Tests
// ============================================================================
