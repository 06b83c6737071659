// src/quant/kmeans.rs

//! Bounded k-means refinement of a palette and its pixel assignment.
//!
//! Each pass recenters every palette entry on the mean of its assigned
//! pixels, repairs the distance tables, and remaps pixels starting from
//! their current entry. Iteration stops once a pass reassigns no more than
//! `threshold` pixels; a threshold of zero therefore runs to a fixed point.

use crate::image::pixel::Pixel;
use crate::quant::mapper::{remap_assignments, DistanceTables};
use crate::quant::palette::Accumulator;
use crate::utils::error::{QuantError, Result};
use log::debug;

pub(crate) fn refine(
    pixels: &[Pixel],
    palette: &mut [Pixel],
    indices: &mut [u32],
    threshold: u64,
) -> Result<()> {
    let n = palette.len();
    let mut acc = Accumulator::try_new(n)?;
    for (px, &idx) in pixels.iter().zip(indices.iter()) {
        if idx as usize >= n {
            return Err(QuantError::Internal(format!(
                "assignment index {idx} out of range (entries: {n})"
            )));
        }
        acc.add(idx as usize, px);
    }
    recenter(palette, &acc);
    let mut tables = DistanceTables::build(palette)?;

    loop {
        let changes = remap_assignments(pixels, palette, &tables, indices, &mut acc)?;
        debug!("k-means pass reassigned {changes} pixels");
        if changes <= threshold {
            return Ok(());
        }
        recenter(palette, &acc);
        tables.resort(palette);
    }
}

/// Moves each entry to its members' mean. Entries without members keep their
/// previous color.
fn recenter(palette: &mut [Pixel], acc: &Accumulator) {
    for (i, entry) in palette.iter_mut().enumerate() {
        if let Some(mean) = acc.mean_pixel(i) {
            *entry = mean;
        }
    }
}
