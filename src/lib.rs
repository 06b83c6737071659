//! A Rust library for adaptive color quantization.
//!
//! This crate reduces a true-color image to a palette of at most 256
//! representative colors plus a per-pixel index map, minimizing squared
//! color error. Two strategies are provided — median-cut partitioning and
//! maximum-coverage (farthest-point) seeding — and either result can be
//! refined by bounded k-means.
//!
//! # Quick Start
//!
//! ```
//! use colorquant::{quantize, Mode, Pixel};
//!
//! let pixels = vec![
//!     Pixel::new(255, 0, 0),
//!     Pixel::new(250, 4, 2),
//!     Pixel::new(0, 0, 255),
//!     Pixel::new(2, 1, 250),
//! ];
//!
//! let out = quantize(&pixels, 2, Mode::MedianCut, 0)?;
//! assert_eq!(out.palette.len(), 2);
//! assert_eq!(out.indices.len(), pixels.len());
//! // The two reds share an entry, as do the two blues.
//! assert_eq!(out.indices[0], out.indices[1]);
//! assert_eq!(out.indices[2], out.indices[3]);
//! # Ok::<(), colorquant::QuantError>(())
//! ```
//!
//! # Guarantees
//!
//! - Every returned index is an exact nearest neighbor: no other palette
//!   entry is closer (in squared RGB distance) to its source pixel.
//! - Pixels equal in (R, G, B) always map to the same index; the fourth
//!   byte of a [`Pixel`] is never inspected.
//! - Output is deterministic for a given input.
//!
//! The caller keeps the image geometry: pass the pixel buffer in row-major
//! order and interpret `indices` with the same layout. Loading, dithering,
//! and palette-image packaging live outside this crate.

// Core modules
pub mod image;
pub mod quant;
pub mod utils;

// Public quantization API
pub use quant::{quantize, Mode, Quantized};

// Pixel type
pub use image::pixel::Pixel;

// Error types
pub use utils::error::{QuantError, Result};

// Constants
pub const COLORQUANT_VERSION: &str = "0.3.0";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(COLORQUANT_VERSION, "0.3.0");
    }

    #[test]
    fn test_public_api_round_trip() {
        let pixels = vec![Pixel::black(), Pixel::white(), Pixel::black()];
        let out = quantize(&pixels, 2, Mode::MedianCut, 0).unwrap();
        assert_eq!(out.palette.len(), 2);
        assert_eq!(out.indices[0], out.indices[2]);
        assert_ne!(out.indices[0], out.indices[1]);
    }

    #[test]
    fn test_error_display() {
        let err = QuantError::InvalidArgument("color count 0 outside 1..=256".into());
        assert!(err.to_string().contains("invalid argument"));
    }
}
