pub mod format_utils;
pub mod format_writer;

use std::hash::BuildHasher;

pub(crate) fn constant_ahash_randomstate() -> ahash::RandomState {
    // seed pulled from the crate source
    const PI: [u64; 4] = [
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    ];
    ahash::RandomState::with_seeds(PI[0], PI[1], PI[2], PI[3])
}

pub(crate) fn constant_ahash_hasher() -> ahash::AHasher {
    constant_ahash_randomstate().build_hasher()
}

pub(crate) fn constant_ahash_hashmap<K, V>() -> ahash::HashMap<K, V> {
    ahash::HashMap::with_hasher(constant_ahash_randomstate())
}

#[inline]
pub(crate) fn round_up_pow2(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

#[test]
fn test_rounding() {
    assert_eq!(round_up_pow2(0, 256), 0);
    assert_eq!(round_up_pow2(1, 256), 256);
    assert_eq!(round_up_pow2(256, 256), 256);
    assert_eq!(round_up_pow2(257, 256), 512);
}

#[test]
fn test_constant_hasher_is_stable() {
    use std::hash::{Hash, Hasher};

    let hash = |value: &str| {
        let mut hasher = constant_ahash_hasher();
        value.hash(&mut hasher);
        hasher.finish()
    };
    assert_eq!(hash("Graph Prologue"), hash("Graph Prologue"));
    assert_ne!(hash("Graph Prologue"), hash("Graph Epilogue"));
}
