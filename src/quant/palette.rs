// src/quant/palette.rs

//! Palette construction: channel-mean averaging for median-cut boxes and
//! farthest-point seeding for maximum-coverage quantization.

use crate::image::pixel::{Pixel, AXES};
use crate::quant::hash::PixelMap;
use crate::utils::error::{QuantError, Result};
use fallible_collections::FallibleVec;

/// Per-entry channel sums and member counts. The k-means refiner updates
/// these incrementally as pixels move between entries.
pub(crate) struct Accumulator {
    pub sums: Vec<[u64; AXES]>,
    pub counts: Vec<u64>,
}

impl Accumulator {
    pub fn try_new(n_entries: usize) -> Result<Self> {
        let mut sums: Vec<[u64; AXES]> =
            FallibleVec::try_with_capacity(n_entries).map_err(|_| QuantError::OutOfMemory)?;
        sums.resize(n_entries, [0; AXES]);
        let mut counts: Vec<u64> =
            FallibleVec::try_with_capacity(n_entries).map_err(|_| QuantError::OutOfMemory)?;
        counts.resize(n_entries, 0);
        Ok(Accumulator { sums, counts })
    }

    pub fn clear(&mut self) {
        self.sums.fill([0; AXES]);
        self.counts.fill(0);
    }

    #[inline]
    pub fn add(&mut self, entry: usize, px: &Pixel) {
        let s = &mut self.sums[entry];
        s[0] += px.r as u64;
        s[1] += px.g as u64;
        s[2] += px.b as u64;
        self.counts[entry] += 1;
    }

    #[inline]
    pub fn remove(&mut self, entry: usize, px: &Pixel) {
        let s = &mut self.sums[entry];
        s[0] -= px.r as u64;
        s[1] -= px.g as u64;
        s[2] -= px.b as u64;
        self.counts[entry] -= 1;
    }

    /// Rounded channel-wise mean of the entry, or `None` when it has no
    /// members.
    pub fn mean_pixel(&self, entry: usize) -> Option<Pixel> {
        let count = self.counts[entry];
        if count == 0 {
            return None;
        }
        let s = &self.sums[entry];
        Some(Pixel::new(
            round_mean(s[0], count),
            round_mean(s[1], count),
            round_mean(s[2], count),
        ))
    }
}

#[inline]
fn round_mean(sum: u64, count: u64) -> u8 {
    (0.5 + sum as f64 / count as f64) as u8
}

/// Builds the median-cut palette: accumulates every source pixel into its
/// annotated box entry, then takes rounded channel means.
pub(crate) fn average_from_assignment(
    pixels: &[Pixel],
    map: &PixelMap,
    n_entries: u32,
) -> Result<Vec<Pixel>> {
    let n = n_entries as usize;
    let mut acc = Accumulator::try_new(n)?;
    for px in pixels {
        let entry = map
            .lookup(px)
            .ok_or_else(|| QuantError::Internal("pixel missing from box annotation".into()))?;
        if entry >= n_entries {
            return Err(QuantError::Internal(format!(
                "palette index {entry} out of range (entries: {n_entries})"
            )));
        }
        acc.add(entry as usize, px);
    }
    let mut palette: Vec<Pixel> =
        FallibleVec::try_with_capacity(n).map_err(|_| QuantError::OutOfMemory)?;
    for i in 0..n {
        // Every box owns at least one pixel by construction.
        let mean = acc
            .mean_pixel(i)
            .ok_or_else(|| QuantError::Internal("palette entry with no members".into()))?;
        palette.push(mean);
    }
    Ok(palette)
}

/// Farthest-point palette seeding over the distinct colors of `pixels`.
///
/// A distance map starts at a large sentinel per distinct color. The probe
/// begins at the rounded mean of all input pixels; each round stores the
/// distance to the latest entry (minimum against the previous rounds from
/// the second follow-up on) and picks the color farthest from everything
/// chosen so far. The mean itself never enters the palette.
///
/// The requested entry count is clamped to the number of distinct colors, so
/// the result never contains duplicate entries.
pub(crate) fn farthest_point_palette(pixels: &[Pixel], n_colors: usize) -> Result<Vec<Pixel>> {
    let mut map = PixelMap::exact()?;
    let mut mean = [0u64; AXES];
    for px in pixels {
        map.insert(*px, u32::MAX)?;
        mean[0] += px.r as u64;
        mean[1] += px.g as u64;
        mean[2] += px.b as u64;
    }
    let n_pixels = pixels.len() as u64;
    let mut probe = Pixel::new(
        round_mean(mean[0], n_pixels),
        round_mean(mean[1], n_pixels),
        round_mean(mean[2], n_pixels),
    );

    let n = n_colors.min(map.len());
    let mut palette: Vec<Pixel> =
        FallibleVec::try_with_capacity(n).map_err(|_| QuantError::OutOfMemory)?;
    for i in 0..n {
        // The second round overwrites unconditionally: it discards the
        // distances to the mean probe, leaving only distances to entry 0.
        let overwrite = i == 1;
        let mut furthest: Option<Pixel> = None;
        let mut furthest_dist = 0u32;
        map.for_each_update(|key, val| {
            let d = probe.dist_sq(key);
            if overwrite || d < *val {
                *val = d;
            }
            if furthest.is_none() || *val > furthest_dist {
                furthest_dist = *val;
                furthest = Some(*key);
            }
        });
        let chosen =
            furthest.ok_or_else(|| QuantError::Internal("empty distance map".into()))?;
        palette.push(Pixel::new(chosen.r, chosen.g, chosen.b));
        probe = chosen;
    }
    Ok(palette)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_color_set(palette: &[Pixel]) -> Vec<[u8; 3]> {
        let mut set: Vec<[u8; 3]> = palette.iter().map(|p| p.channels()).collect();
        set.sort_unstable();
        set
    }

    #[test]
    fn test_average_rounds_half_up() {
        let pixels = [Pixel::new(0, 0, 10), Pixel::new(1, 2, 11)];
        let mut map = PixelMap::adaptive().unwrap();
        for px in &pixels {
            map.upsert(*px, || 0, |_| {}).unwrap();
        }
        let palette = average_from_assignment(&pixels, &map, 1).unwrap();
        // Means are (0.5, 1.0, 10.5); halves round up.
        assert_eq!(palette, vec![Pixel::new(1, 1, 11)]);
    }

    #[test]
    fn test_average_rejects_out_of_range_entry() {
        let pixels = [Pixel::new(5, 5, 5)];
        let mut map = PixelMap::adaptive().unwrap();
        map.insert(pixels[0], 3).unwrap();
        assert!(average_from_assignment(&pixels, &map, 2).is_err());
    }

    #[test]
    fn test_farthest_point_two_extremes() {
        let pixels = [Pixel::black(), Pixel::white()];
        let palette = farthest_point_palette(&pixels, 2).unwrap();
        assert_eq!(palette.len(), 2);
        assert_eq!(as_color_set(&palette), vec![[0, 0, 0], [255, 255, 255]]);
    }

    #[test]
    fn test_farthest_point_single_color_collapses() {
        let pixels = [Pixel::new(17, 42, 200); 100];
        let palette = farthest_point_palette(&pixels, 8).unwrap();
        assert_eq!(palette, vec![Pixel::new(17, 42, 200)]);
    }

    #[test]
    fn test_farthest_point_checker() {
        let mut pixels = Vec::new();
        for i in 0..128 {
            pixels.push(if i % 2 == 0 {
                Pixel::new(10, 10, 10)
            } else {
                Pixel::new(250, 250, 250)
            });
        }
        let palette = farthest_point_palette(&pixels, 2).unwrap();
        assert_eq!(as_color_set(&palette), vec![[10, 10, 10], [250, 250, 250]]);
    }

    #[test]
    fn test_farthest_point_spreads_over_gradient() {
        let pixels: Vec<Pixel> = (0u16..=255).map(|k| Pixel::new(k as u8, k as u8, k as u8)).collect();
        let palette = farthest_point_palette(&pixels, 3).unwrap();
        let greys: Vec<u8> = palette.iter().map(|p| p.r).collect();
        // First pick is an end of the ramp, second the opposite end, third
        // lands near the middle.
        assert!(greys[0] == 0 || greys[0] == 255);
        assert_eq!(greys[1], 255 - greys[0]);
        assert!((100..=155).contains(&greys[2]));
    }

    #[test]
    fn test_accumulator_incremental_moves() {
        let mut acc = Accumulator::try_new(2).unwrap();
        let a = Pixel::new(10, 0, 0);
        let b = Pixel::new(30, 0, 0);
        acc.add(0, &a);
        acc.add(0, &b);
        assert_eq!(acc.mean_pixel(0), Some(Pixel::new(20, 0, 0)));
        acc.remove(0, &b);
        acc.add(1, &b);
        assert_eq!(acc.mean_pixel(0), Some(Pixel::new(10, 0, 0)));
        assert_eq!(acc.mean_pixel(1), Some(Pixel::new(30, 0, 0)));
        acc.remove(1, &b);
        assert_eq!(acc.mean_pixel(1), None);
    }
}
