//! Image fingerprinting.
//!
//! Derives the two fingerprints used by the dedup pipeline: a high-entropy
//! content fingerprint keyed into the shared remote table, and a coarse
//! 64-bit perceptual fingerprint used for local near-duplicate matching.

mod engine;

pub use engine::{
    hamming_distance, is_similar, similarity, FingerprintPair, HashEngine, FEATURE_GRID,
    PERCEPTUAL_HASH_BITS,
};
