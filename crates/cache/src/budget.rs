//! Unified memory budget across media types.
//!
//! Every resident media texture registers its memory footprint here under a
//! `(media type, id)` key. The budget is soft: registration always succeeds,
//! and callers ask for eviction candidates when usage crosses the limit.
//! Candidate selection is priority-aware LRU: images go first, then video
//! frames, then web surfaces, least recently used first within each class.

use std::collections::{BTreeSet, HashMap};

/// Default unified media budget: 256 MB.
pub const DEFAULT_BUDGET_BYTES: usize = 256 * 1024 * 1024;

/// Media classes sharing the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MediaType {
    Image,
    Video,
    WebKit,
}

impl MediaType {
    /// Eviction priority: lower values are evicted first.
    ///
    /// Images are cheapest to restore (re-decode from the source file),
    /// video frames are replaced by the decoder within a frame or two, and
    /// web surfaces are the most expensive to rebuild.
    pub fn eviction_priority(self) -> u8 {
        match self {
            MediaType::Image => 0,
            MediaType::Video => 1,
            MediaType::WebKit => 2,
        }
    }
}

/// Per-entry bookkeeping.
#[derive(Debug, Clone, Copy)]
struct EntryMeta {
    size: usize,
    last_access: u64,
}

/// Point-in-time view of budget state.
#[derive(Debug, Clone, Copy, Default)]
pub struct BudgetStats {
    pub current_bytes: usize,
    pub max_bytes: usize,
    pub entry_count: usize,
}

/// Memory accounting for resident media textures.
///
/// Purely bookkeeping: the budget never owns textures and never evicts by
/// itself. [`MediaBudget::get_eviction_candidates`] reports which entries
/// the owner should release; the owner performs the release and calls
/// [`MediaBudget::unregister`].
#[derive(Debug)]
pub struct MediaBudget {
    max_memory: usize,
    current_memory: usize,
    entries: HashMap<(MediaType, u32), EntryMeta>,
    /// Eviction order index: (priority, access stamp, type, id), so the
    /// natural `BTreeSet` order is exactly eviction order.
    index: BTreeSet<(u8, u64, MediaType, u32)>,
    access_counter: u64,
}

impl MediaBudget {
    /// Create a budget with the given limit in bytes.
    pub fn new(max_memory: usize) -> Self {
        Self {
            max_memory,
            current_memory: 0,
            entries: HashMap::new(),
            index: BTreeSet::new(),
            access_counter: 0,
        }
    }

    /// Register a resident entry's memory footprint.
    ///
    /// Registration never fails, even when it pushes usage over the limit;
    /// the caller is expected to check [`MediaBudget::is_over_budget`] and
    /// evict. Re-registering an existing key replaces its size and marks it
    /// most recently used.
    pub fn register(&mut self, media_type: MediaType, id: u32, size: usize) {
        if let Some(old) = self.entries.remove(&(media_type, id)) {
            self.current_memory = self.current_memory.saturating_sub(old.size);
            self.index.remove(&(
                media_type.eviction_priority(),
                old.last_access,
                media_type,
                id,
            ));
        }

        self.access_counter += 1;
        let stamp = self.access_counter;
        self.entries.insert(
            (media_type, id),
            EntryMeta {
                size,
                last_access: stamp,
            },
        );
        self.index
            .insert((media_type.eviction_priority(), stamp, media_type, id));
        self.current_memory += size;
    }

    /// Remove an entry and release its accounted memory.
    ///
    /// Unknown keys are ignored; usage never goes below zero.
    pub fn unregister(&mut self, media_type: MediaType, id: u32) {
        if let Some(old) = self.entries.remove(&(media_type, id)) {
            self.current_memory = self.current_memory.saturating_sub(old.size);
            self.index.remove(&(
                media_type.eviction_priority(),
                old.last_access,
                media_type,
                id,
            ));
        }
    }

    /// Mark an entry as most recently used. Unknown keys are ignored.
    pub fn touch(&mut self, media_type: MediaType, id: u32) {
        let Some(meta) = self.entries.get_mut(&(media_type, id)) else {
            return;
        };
        self.index.remove(&(
            media_type.eviction_priority(),
            meta.last_access,
            media_type,
            id,
        ));
        self.access_counter += 1;
        meta.last_access = self.access_counter;
        self.index.insert((
            media_type.eviction_priority(),
            meta.last_access,
            media_type,
            id,
        ));
    }

    /// Current accounted usage in bytes.
    pub fn current_usage(&self) -> usize {
        self.current_memory
    }

    /// The budget limit in bytes.
    pub fn max_memory(&self) -> usize {
        self.max_memory
    }

    /// Whether usage strictly exceeds the limit. Exactly at the limit is
    /// within budget.
    pub fn is_over_budget(&self) -> bool {
        self.current_memory > self.max_memory
    }

    /// Accounted size of one entry, if registered.
    pub fn usage_for(&self, media_type: MediaType, id: u32) -> Option<usize> {
        self.entries.get(&(media_type, id)).map(|m| m.size)
    }

    /// Entries to evict, in order, to bring `usage + incoming` within the
    /// limit.
    ///
    /// Pure: no budget state changes. Returns the shortest prefix of the
    /// eviction order whose combined size frees enough memory; empty when
    /// the incoming allocation already fits. The caller releases the
    /// textures and unregisters each entry. If every entry together still
    /// cannot free enough, all of them are returned.
    pub fn get_eviction_candidates(&self, incoming: usize) -> Vec<(MediaType, u32)> {
        let needed = (self.current_memory + incoming).saturating_sub(self.max_memory);
        if needed == 0 {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        let mut freed = 0usize;
        for &(_, _, media_type, id) in &self.index {
            if freed >= needed {
                break;
            }
            if let Some(meta) = self.entries.get(&(media_type, id)) {
                freed += meta.size;
                candidates.push((media_type, id));
            }
        }
        candidates
    }

    /// Snapshot of current budget state.
    pub fn stats(&self) -> BudgetStats {
        BudgetStats {
            current_bytes: self.current_memory,
            max_bytes: self.max_memory,
            entry_count: self.entries.len(),
        }
    }
}

impl Default for MediaBudget {
    fn default() -> Self {
        Self::new(DEFAULT_BUDGET_BYTES)
    }
}
