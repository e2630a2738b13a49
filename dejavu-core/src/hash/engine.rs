//! Fingerprint computation for candidate images.
//!
//! # Algorithm
//!
//! The perceptual fingerprint is an 8×8 average hash: downsample to an 8×8
//! grayscale grid, threshold each cell against the grid mean, pack the 64
//! resulting bits row-major (MSB first) and render as 16 hex characters.
//! It survives re-encoding and minor edits but not crops or rotation.
//!
//! The content fingerprint is a SHA3-256 digest of a 32×32 luminance
//! feature grid, rendered as 64 hex characters. It is order-sensitive and
//! near-collision-free, which makes it safe as the key of the shared
//! population-wide table. If feature extraction fails the engine falls back
//! to the perceptual fingerprint so callers always receive a value.

use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use tracing::warn;

use crate::error::{DejavuError, Result};

/// Perceptual fingerprint size in bits.
pub const PERCEPTUAL_HASH_BITS: u32 = 64;

/// Side length of the average-hash grid.
const HASH_GRID: u32 = 8;

/// Side length of the luminance feature grid digested into the content
/// fingerprint.
pub const FEATURE_GRID: u32 = 32;

/// Default similarity threshold; see [`is_similar`].
const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.9;

/// The two fingerprints derived from one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintPair {
    /// 64 hex chars; key of the remote signature table.
    pub content: String,
    /// 16 hex chars; key of the local signature cache.
    pub perceptual: String,
}

/// Fingerprint engine with a configured similarity threshold.
#[derive(Debug, Clone)]
pub struct HashEngine {
    similarity_threshold: f64,
}

impl HashEngine {
    /// Create an engine with the given fuzzy-match threshold.
    pub fn new(similarity_threshold: f64) -> Self {
        Self {
            similarity_threshold,
        }
    }

    /// Compute both fingerprints for an image.
    ///
    /// Fails only when the bytes cannot be decoded as an image at all;
    /// callers treat that as fail-open since no fingerprint exists.
    pub fn fingerprint(&self, image_bytes: &[u8]) -> Result<FingerprintPair> {
        let image = image::load_from_memory(image_bytes)
            .map_err(|e| DejavuError::Decode(format!("failed to decode image: {e}")))?;

        let perceptual = format!("{:016x}", average_hash(&image));

        let content = match feature_print(&image) {
            Some(features) => hex::encode(Sha3_256::digest(&features)),
            None => {
                warn!(
                    fingerprint = %perceptual,
                    "feature extraction failed, falling back to perceptual fingerprint"
                );
                perceptual.clone()
            }
        };

        Ok(FingerprintPair {
            content,
            perceptual,
        })
    }

    /// Check two perceptual fingerprints against this engine's threshold.
    pub fn is_similar(&self, a: &str, b: &str) -> bool {
        is_similar(a, b, self.similarity_threshold)
    }

    /// The configured similarity threshold.
    pub fn similarity_threshold(&self) -> f64 {
        self.similarity_threshold
    }
}

impl Default for HashEngine {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

/// Compute the 64-bit average hash of an image.
fn average_hash(image: &DynamicImage) -> u64 {
    let grid = image
        .resize_exact(HASH_GRID, HASH_GRID, FilterType::Triangle)
        .into_luma8();

    let total: u32 = grid.pixels().map(|p| u32::from(p.0[0])).sum();
    let mean = f64::from(total) / f64::from(HASH_GRID * HASH_GRID);

    let mut bits = 0u64;
    for (i, pixel) in grid.pixels().enumerate() {
        if f64::from(pixel.0[0]) >= mean {
            bits |= 1 << (63 - i);
        }
    }
    bits
}

/// Extract the luminance feature grid digested into the content fingerprint.
///
/// Returns `None` when the image yields no usable grid, in which case the
/// engine falls back to the perceptual fingerprint.
fn feature_print(image: &DynamicImage) -> Option<Vec<u8>> {
    if image.width() == 0 || image.height() == 0 {
        return None;
    }

    let grid = image
        .resize_exact(FEATURE_GRID, FEATURE_GRID, FilterType::Triangle)
        .into_luma8();

    let raw = grid.into_raw();
    (raw.len() == (FEATURE_GRID * FEATURE_GRID) as usize).then_some(raw)
}

/// Parse a 16-hex-character perceptual fingerprint into its bit
/// representation.
fn parse_bits(fingerprint: &str) -> Option<u64> {
    if fingerprint.len() != 16 {
        return None;
    }
    u64::from_str_radix(fingerprint, 16).ok()
}

/// Compute the Hamming distance between two perceptual fingerprints.
///
/// Returns `None` if either fingerprint is not 16 hex characters.
pub fn hamming_distance(a: &str, b: &str) -> Option<u32> {
    Some((parse_bits(a)? ^ parse_bits(b)?).count_ones())
}

/// Similarity ratio `(64 - hamming) / 64` between two perceptual
/// fingerprints, or `None` if either is malformed.
pub fn similarity(a: &str, b: &str) -> Option<f64> {
    hamming_distance(a, b)
        .map(|d| f64::from(PERCEPTUAL_HASH_BITS - d) / f64::from(PERCEPTUAL_HASH_BITS))
}

/// Whether two perceptual fingerprints are similar at the given threshold.
///
/// Malformed fingerprints are never similar.
pub fn is_similar(a: &str, b: &str, threshold: f64) -> bool {
    similarity(a, b).is_some_and(|s| s >= threshold)
}
