// src/quant/mod.rs

//! Color quantization: palette generation plus per-pixel assignment.
//!
//! Two strategies are available. [`Mode::MedianCut`] recursively bisects the
//! color space into boxes of roughly equal population and averages each box
//! into one palette entry. [`Mode::MaxCoverage`] seeds entries by
//! farthest-point traversal, spreading them across the observed gamut.
//! Either result can be polished by bounded k-means.
//!
//! The pipeline runs strictly forward: count distinct colors in an adaptive
//! hash, thread them onto per-axis sorted chains, partition (median cut
//! only), derive the palette, then map every pixel through the pruned
//! nearest-neighbor search. All intermediate state is owned by the call and
//! dropped before it returns.

pub mod boxes;
pub mod hash;
pub mod heap;
mod kmeans;
pub mod list;
mod mapper;
mod palette;

use crate::image::pixel::Pixel;
use crate::quant::hash::PixelMap;
use crate::quant::list::PixelArena;
use crate::quant::mapper::DistanceTables;
use crate::utils::error::{QuantError, Result};
use fallible_collections::FallibleVec;
use log::debug;

/// Quantization strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Recursive population-median partitioning of the color space.
    MedianCut,
    /// Farthest-point palette seeding over the distinct colors.
    MaxCoverage,
}

/// Result of a quantization run.
#[derive(Debug, Clone)]
pub struct Quantized {
    /// At most the requested number of entries; fewer when the input has
    /// fewer distinct colors (or median cut ran out of divisible boxes).
    /// The reserved byte of each entry is zero.
    pub palette: Vec<Pixel>,
    /// One palette index per input pixel, each `< palette.len()`.
    pub indices: Vec<u32>,
}

/// Quantizes `pixels` to a palette of at most `n_colors` entries and an
/// index per pixel, minimizing squared-distance color error.
///
/// `kmeans = 0` skips refinement; `kmeans = k > 0` runs Lloyd iterations
/// until a pass reassigns at most `k - 1` pixels (so `kmeans = 1` iterates
/// to a fixed point).
///
/// Every pixel's reserved byte is ignored and pixels equal in (R, G, B)
/// always receive the same index.
pub fn quantize(pixels: &[Pixel], n_colors: usize, mode: Mode, kmeans: u32) -> Result<Quantized> {
    if !(1..=256).contains(&n_colors) {
        return Err(QuantError::InvalidArgument(format!(
            "color count {n_colors} outside 1..=256"
        )));
    }
    if pixels.is_empty() {
        return Err(QuantError::InvalidArgument("empty pixel buffer".into()));
    }
    if u32::try_from(pixels.len()).is_err() {
        return Err(QuantError::InvalidArgument(
            "pixel buffer too large for 32-bit indexing".into(),
        ));
    }

    let mut result = match mode {
        Mode::MedianCut => median_cut_pipeline(pixels, n_colors)?,
        Mode::MaxCoverage => max_coverage_pipeline(pixels, n_colors)?,
    };
    if kmeans > 0 {
        kmeans::refine(
            pixels,
            &mut result.palette,
            &mut result.indices,
            (kmeans - 1) as u64,
        )?;
    }
    Ok(result)
}

fn median_cut_pipeline(pixels: &[Pixel], n_colors: usize) -> Result<Quantized> {
    let mut map = PixelMap::adaptive()?;
    for px in pixels {
        map.upsert(*px, || 1, |v| *v += 1)?;
    }
    debug!(
        "counted {} distinct colors at scale {}",
        map.len(),
        map.scale()
    );

    let (mut arena, heads) = PixelArena::build_from_map(&map)?;
    let tree = boxes::median_cut(&mut arena, heads, pixels.len() as u32, n_colors)?;
    let n_entries = tree.annotate(&arena, &mut map)?;
    if n_entries == 0 {
        return Err(QuantError::Internal(
            "median cut produced no palette entries".into(),
        ));
    }
    let palette = palette::average_from_assignment(pixels, &map, n_entries)?;
    drop(tree);
    drop(arena);

    let tables = DistanceTables::build(&palette)?;
    let mut indices = try_index_buffer(pixels.len())?;
    mapper::map_pixels_from_boxes(pixels, &palette, &tables, &map, &mut indices)?;
    Ok(Quantized { palette, indices })
}

fn max_coverage_pipeline(pixels: &[Pixel], n_colors: usize) -> Result<Quantized> {
    let palette = palette::farthest_point_palette(pixels, n_colors)?;
    debug!("seeded {} palette entries", palette.len());

    let tables = DistanceTables::build(&palette)?;
    let mut indices = try_index_buffer(pixels.len())?;
    mapper::map_pixels(pixels, &palette, &tables, &mut indices)?;
    Ok(Quantized { palette, indices })
}

fn try_index_buffer(len: usize) -> Result<Vec<u32>> {
    let mut indices: Vec<u32> =
        FallibleVec::try_with_capacity(len).map_err(|_| QuantError::OutOfMemory)?;
    indices.resize(len, 0);
    Ok(indices)
}
