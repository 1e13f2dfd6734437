/// Placement policy for the frame scoped transient heap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransientPolicy {
    /// Allow textures to be placed in the transient heap.
    pub textures: bool,
    /// Allow buffers to be placed in the transient heap.
    pub buffers: bool,
    /// Size the heap may not grow past, exceeding it fails the frame.
    pub heap_size_limit: u64,
    /// Free space left over after placing a resource is only kept when it is at least this large,
    /// smaller remainders are absorbed into the allocation. Must be a power of two.
    pub alignment_granularity: u64,
}

impl Default for TransientPolicy {
    fn default() -> Self {
        Self {
            textures: true,
            buffers: true,
            heap_size_limit: 512 * 1024 * 1024,
            alignment_granularity: 256,
        }
    }
}

/// Configuration of a [`GraphContext`](crate::graph::GraphContext).
///
/// Every tuned heuristic of the compiler is exposed here instead of being a constant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphConfig {
    /// Remove passes which do not contribute to any externally visible resource.
    pub cull_passes: bool,
    /// Merge consecutive raster passes with identical render targets into one render pass.
    pub merge_render_passes: bool,
    /// Run `ASYNC_COMPUTE` passes on the async compute pipeline, otherwise they run on graphics.
    pub async_compute: bool,
    /// Record deferred passes in parallel sets.
    pub parallel_execute: bool,
    /// Smallest number of passes worth recording as a parallel set.
    pub parallel_execute_pass_min: u32,
    /// Summed workload after which a parallel set is closed.
    pub parallel_execute_pass_max: u32,
    /// Create the barrier batches on the device from the thread pool.
    pub parallel_setup: bool,
    pub transient_allocation: TransientPolicy,
    /// Debugging mode: no culling, no async compute, every transition happens in the prologue
    /// of the pass that needs it.
    pub immediate_mode: bool,
    /// Check the builder for misuse and panic on violations.
    pub validation: bool,
    /// Size of the thread pool owned by the context, `None` lets rayon decide.
    pub threads: Option<usize>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            cull_passes: true,
            merge_render_passes: true,
            async_compute: true,
            parallel_execute: true,
            parallel_execute_pass_min: 1,
            parallel_execute_pass_max: 32,
            parallel_setup: true,
            transient_allocation: TransientPolicy::default(),
            immediate_mode: false,
            validation: cfg!(debug_assertions),
            threads: None,
        }
    }
}

impl GraphConfig {
    /// Configuration for debugging synchronization issues, see [`GraphConfig::immediate_mode`].
    pub fn immediate() -> Self {
        Self {
            cull_passes: false,
            merge_render_passes: false,
            async_compute: false,
            parallel_execute: false,
            parallel_setup: false,
            immediate_mode: true,
            ..Default::default()
        }
    }
    pub(crate) fn cull_enabled(&self) -> bool {
        self.cull_passes && !self.immediate_mode
    }
    pub(crate) fn async_compute_enabled(&self) -> bool {
        self.async_compute && !self.immediate_mode
    }
    pub(crate) fn merge_enabled(&self) -> bool {
        self.merge_render_passes && !self.immediate_mode
    }
    pub(crate) fn parallel_execute_enabled(&self) -> bool {
        self.parallel_execute && !self.immediate_mode
    }
}

#[test]
fn test_immediate_overrides() {
    let mut config = GraphConfig::default();
    assert!(config.cull_enabled());
    config.immediate_mode = true;
    assert!(!config.cull_enabled());
    assert!(!config.async_compute_enabled());
    assert!(!config.merge_enabled());
    assert!(!config.parallel_execute_enabled());
    assert_eq!(GraphConfig::immediate().transient_allocation, TransientPolicy::default());
}
