use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! gen_stats {
    ($($(#[$attr:meta])* $name:ident),+ $(,)?) => {
        /// Per-frame counters of the graph compiler.
        ///
        /// Owned by the caller and shared with the [`GraphContext`](crate::graph::GraphContext)
        /// through an `Arc`, every frame starts by resetting it.
        #[derive(Debug, Default)]
        pub struct GraphStats {
            $(
                $(#[$attr])*
                $name: AtomicU64,
            )+
        }

        /// A plain copy of [`GraphStats`].
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct StatsSnapshot {
            $(
                $(#[$attr])*
                pub $name: u64,
            )+
        }

        impl GraphStats {
            pub fn reset(&self) {
                $(
                    self.$name.store(0, Ordering::Relaxed);
                )+
            }
            pub fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot {
                    $(
                        $name: self.$name.load(Ordering::Relaxed),
                    )+
                }
            }
        }
    };
}

gen_stats! {
    /// Passes recorded, including the prologue and epilogue passes.
    passes,
    culled_passes,
    /// Passes which had their render pass merged with a neighbour.
    render_pass_merges,
    parallel_pass_sets,
    barrier_batches,
    transitions,
    aliasing_acquires,
    aliasing_discards,
    pooled_allocations,
    /// Pooled allocations which reused a resource from an earlier frame or owner.
    pooled_reuses,
    transient_allocations,
    transient_heap_high_water,
    unused_resources,
}

impl GraphStats {
    pub fn new() -> Self {
        Self::default()
    }
    pub(crate) fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }
    pub(crate) fn max(counter: &AtomicU64, value: u64) {
        counter.fetch_max(value, Ordering::Relaxed);
    }
}

macro_rules! gen_accessors {
    ($($name:ident),+) => {
        impl GraphStats {
            $(
                #[inline]
                pub(crate) fn $name(&self) -> &AtomicU64 {
                    &self.$name
                }
            )+
        }
    };
}

gen_accessors! {
    passes, culled_passes, render_pass_merges, parallel_pass_sets, barrier_batches, transitions,
    aliasing_acquires, aliasing_discards, pooled_allocations, pooled_reuses, transient_allocations,
    transient_heap_high_water, unused_resources
}

#[test]
fn test_stats_reset() {
    let stats = GraphStats::new();
    GraphStats::add(stats.passes(), 3);
    GraphStats::max(stats.transient_heap_high_water(), 1024);
    GraphStats::max(stats.transient_heap_high_water(), 512);

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.passes, 3);
    assert_eq!(snapshot.transient_heap_high_water, 1024);

    stats.reset();
    assert_eq!(stats.snapshot(), StatsSnapshot::default());
}
