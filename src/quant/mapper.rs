// src/quant/mapper.rs

//! Nearest-palette-entry search pruned by inter-palette distances.
//!
//! For a palette of n entries the mapper keeps an n×n table of squared
//! distances plus, per row, the column indices sorted ascending by that
//! distance. A pixel's scan starts from an initial guess entry `m`: walking
//! the guess's sorted row, any candidate `c` with `D[m][c] > 4·d₀` (d₀ the
//! distance to the guess) can be skipped along with everything after it,
//! because the triangle inequality puts `c` at distance at least d₀ already.
//! Results are memoized per distinct color, so the scan runs once per color
//! rather than once per pixel.

use crate::image::pixel::Pixel;
use crate::quant::hash::PixelMap;
use crate::quant::palette::Accumulator;
use crate::utils::error::{QuantError, Result};
use fallible_collections::FallibleVec;

/// Squared-distance matrix `D` and per-row sorted column order `S` for one
/// palette. `S[i][0] == i` always (an entry is its own closest candidate).
pub(crate) struct DistanceTables {
    n: usize,
    dist: Vec<u32>,
    order: Vec<u16>,
}

impl DistanceTables {
    /// Builds both tables from scratch.
    pub fn build(palette: &[Pixel]) -> Result<Self> {
        let n = palette.len();
        let mut dist: Vec<u32> =
            FallibleVec::try_with_capacity(n * n).map_err(|_| QuantError::OutOfMemory)?;
        dist.resize(n * n, 0);
        let mut order: Vec<u16> =
            FallibleVec::try_with_capacity(n * n).map_err(|_| QuantError::OutOfMemory)?;
        order.resize(n * n, 0);

        let mut tables = DistanceTables { n, dist, order };
        tables.fill_distances(palette);
        for i in 0..n {
            let row = &mut tables.order[i * n..(i + 1) * n];
            // Own index first so a stable sort keeps it there even when other
            // entries sit at distance zero (duplicate palette colors).
            row[0] = i as u16;
            let mut w = 1;
            for c in 0..n {
                if c != i {
                    row[w] = c as u16;
                    w += 1;
                }
            }
            let drow = &tables.dist[i * n..(i + 1) * n];
            row.sort_by_key(|&c| drow[c as usize]);
        }
        Ok(tables)
    }

    /// Recomputes distances for a moved palette and repairs each row by
    /// insertion sort. Rows start from their previous order, so this is
    /// near-linear when the palette only shifted slightly.
    pub fn resort(&mut self, palette: &[Pixel]) {
        self.fill_distances(palette);
        let n = self.n;
        for i in 0..n {
            let drow = &self.dist[i * n..(i + 1) * n];
            let row = &mut self.order[i * n..(i + 1) * n];
            for j in 1..n {
                let elt = row[j];
                let key = drow[elt as usize];
                let mut k = j;
                while k > 0 && drow[row[k - 1] as usize] > key {
                    row[k] = row[k - 1];
                    k -= 1;
                }
                row[k] = elt;
            }
        }
    }

    fn fill_distances(&mut self, palette: &[Pixel]) {
        let n = self.n;
        for i in 0..n {
            self.dist[i * n + i] = 0;
            for j in 0..i {
                let d = palette[i].dist_sq(&palette[j]);
                self.dist[i * n + j] = d;
                self.dist[j * n + i] = d;
            }
        }
    }

    /// Exact nearest entry for `px`, scanning the guess's sorted row under
    /// the `4·d₀` bound. Returns the winning index and its squared distance.
    pub fn find_nearest(&self, palette: &[Pixel], px: &Pixel, guess: u32) -> (u32, u32) {
        let m = guess as usize;
        let d0 = palette[m].dist_sq(px);
        let bound = d0 << 2;
        let mut best = guess;
        let mut best_dist = d0;
        let row = &self.order[m * self.n..(m + 1) * self.n];
        let drow = &self.dist[m * self.n..(m + 1) * self.n];
        for &c in row {
            if drow[c as usize] > bound {
                break;
            }
            let d = palette[c as usize].dist_sq(px);
            if d < best_dist {
                best_dist = d;
                best = c as u32;
            }
        }
        (best, best_dist)
    }
}

/// Maps every pixel to its nearest palette entry starting each scan from
/// entry 0. Used after farthest-point seeding, where no prior assignment
/// exists.
pub(crate) fn map_pixels(
    pixels: &[Pixel],
    palette: &[Pixel],
    tables: &DistanceTables,
    indices: &mut [u32],
) -> Result<()> {
    let mut cache = PixelMap::exact()?;
    for (slot, px) in indices.iter_mut().zip(pixels) {
        let best = match cache.lookup(px) {
            Some(hit) => hit,
            None => {
                let (best, _) = tables.find_nearest(palette, px, 0);
                cache.insert(*px, best)?;
                best
            }
        };
        *slot = best;
    }
    Ok(())
}

/// Maps every pixel starting its scan from the median-cut box the color was
/// annotated with, which is already a near-optimal guess.
pub(crate) fn map_pixels_from_boxes(
    pixels: &[Pixel],
    palette: &[Pixel],
    tables: &DistanceTables,
    box_map: &PixelMap,
    indices: &mut [u32],
) -> Result<()> {
    let mut cache = PixelMap::exact()?;
    for (slot, px) in indices.iter_mut().zip(pixels) {
        let best = match cache.lookup(px) {
            Some(hit) => hit,
            None => {
                let guess = box_map
                    .lookup(px)
                    .ok_or_else(|| QuantError::Internal("pixel lookup failed".into()))?;
                if guess as usize >= palette.len() {
                    return Err(QuantError::Internal(format!(
                        "annotated index {guess} out of range"
                    )));
                }
                let (best, _) = tables.find_nearest(palette, px, guess);
                cache.insert(*px, best)?;
                best
            }
        };
        *slot = best;
    }
    Ok(())
}

/// One k-means remap pass: each pixel's scan starts from its current
/// assignment; moved pixels update the running sums incrementally. Returns
/// the number of reassignments.
pub(crate) fn remap_assignments(
    pixels: &[Pixel],
    palette: &[Pixel],
    tables: &DistanceTables,
    indices: &mut [u32],
    acc: &mut Accumulator,
) -> Result<u64> {
    let mut cache = PixelMap::exact()?;
    let mut changes = 0u64;
    for (slot, px) in indices.iter_mut().zip(pixels) {
        let best = match cache.lookup(px) {
            Some(hit) => hit,
            None => {
                let (best, _) = tables.find_nearest(palette, px, *slot);
                cache.insert(*px, best)?;
                best
            }
        };
        if *slot != best {
            changes += 1;
            acc.add(best as usize, px);
            acc.remove(*slot as usize, px);
            *slot = best;
        }
    }
    Ok(changes)
}
