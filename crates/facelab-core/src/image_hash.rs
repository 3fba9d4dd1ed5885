//! Average-hash (aHash) image similarity.
//!
//! Unrelated to face embeddings: compares two pictures by their 8x8
//! luminance structure, which survives resizing and recompression.

use image::imageops::FilterType;
use image::DynamicImage;
use serde::Serialize;
use thiserror::Error;

const HASH_SIDE: u32 = 8;
const HASH_BITS: u32 = HASH_SIDE * HASH_SIDE;

#[derive(Error, Debug)]
pub enum ImageHashError {
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// 64-bit average hash. Bit 63 is the top-left cell, row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AverageHash(pub u64);

impl AverageHash {
    pub fn of_image(img: &DynamicImage) -> Self {
        let small = img
            .resize_exact(HASH_SIDE, HASH_SIDE, FilterType::Triangle)
            .to_luma8();

        let sum: u32 = small.pixels().map(|p| p.0[0] as u32).sum();
        let mean = sum as f64 / HASH_BITS as f64;

        let mut bits = 0u64;
        for (i, p) in small.pixels().enumerate() {
            if p.0[0] as f64 >= mean {
                bits |= 1u64 << (HASH_BITS as usize - 1 - i);
            }
        }
        Self(bits)
    }

    pub fn of_bytes(bytes: &[u8]) -> Result<Self, ImageHashError> {
        let img = image::load_from_memory(bytes)?;
        Ok(Self::of_image(&img))
    }

    /// Number of differing bits.
    pub fn distance(&self, other: &AverageHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    /// Share of equal bits, 0–100.
    pub fn similarity_percent(&self, other: &AverageHash) -> f64 {
        (HASH_BITS - self.distance(other)) as f64 * 100.0 / HASH_BITS as f64
    }
}

/// Result of comparing two images.
#[derive(Debug, Clone, Serialize)]
pub struct ImageComparison {
    /// Similarity percentage rounded to two decimals.
    pub similarity: f64,
    pub message: &'static str,
}

/// Describe a similarity percentage.
pub fn verdict(score: f64) -> &'static str {
    if score >= 100.0 {
        "The images are identical"
    } else if score >= 95.0 {
        "The images are nearly identical (possibly resized or recompressed)"
    } else if score >= 80.0 {
        "The images are very similar (minor variations)"
    } else if score >= 50.0 {
        "The images share some resemblance"
    } else {
        "The images are different"
    }
}

/// Hash both encoded images and compare them.
pub fn compare_images(first: &[u8], second: &[u8]) -> Result<ImageComparison, ImageHashError> {
    let a = AverageHash::of_bytes(first)?;
    let b = AverageHash::of_bytes(second)?;
    let score = a.similarity_percent(&b);
    Ok(ImageComparison {
        similarity: (score * 100.0).round() / 100.0,
        message: verdict(score),
    })
}
