/// Size of the smallest page requested from the operating system. Larger
/// requests map `PAGE_SIZE * 2^k` bytes.
pub const PAGE_SIZE: usize = 16384;

/// Maximum depth of the call stack.
pub const FRAMES_MAX: usize = 500;

/// Capacity floor applied whenever a growable container grows.
pub const STACK_MIN_CAPACITY: usize = 64;

/// Smallest slot count of a hash table.
pub const TABLE_MIN_CAPACITY: usize = 8;

/// Slot count of the global table.
pub const GLOBALS_CAPACITY: usize = 128;

/// Tables grow once `count > capacity * LOAD_FACTOR`.
pub const LOAD_FACTOR: f64 = 0.75;

/// After a collection `next_gc` becomes `bytes_allocated * HEAP_GROW_FACTOR`.
pub const HEAP_GROW_FACTOR: usize = 2;

/// Collection threshold before the first cycle, and the floor after every
/// later one.
pub const INITIAL_NEXT_GC: usize = PAGE_SIZE * 16;

/// When the collector runs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GcMode {
    /// Collect when the allocation threshold is crossed.
    Normal,
    /// Collect before every allocation.
    Stress,
    /// Never collect.
    Off,
}

impl Default for GcMode {
    fn default() -> Self {
        if cfg!(feature = "gc-off") {
            GcMode::Off
        } else if cfg!(feature = "gc-stress") {
            GcMode::Stress
        } else {
            GcMode::Normal
        }
    }
}

/// Runtime tunables of a [`VM`](crate::VM).
#[derive(Clone, Debug)]
pub struct Config {
    /// Must be a power of two.
    pub page_size: usize,
    pub initial_next_gc: usize,
    pub heap_grow_factor: usize,
    pub globals_capacity: usize,
    pub gc_mode: GcMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            initial_next_gc: INITIAL_NEXT_GC,
            heap_grow_factor: HEAP_GROW_FACTOR,
            globals_capacity: GLOBALS_CAPACITY,
            gc_mode: GcMode::default(),
        }
    }
}

impl Config {
    pub fn with_gc_mode(mut self, gc_mode: GcMode) -> Self {
        self.gc_mode = gc_mode;
        self
    }
}
