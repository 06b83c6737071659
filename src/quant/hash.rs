// src/quant/hash.rs

//! Chained hash from pixel keys to small integer payloads.
//!
//! The map exists in two flavors. The *adaptive* flavor keys on a
//! channel-shifted hash and raises its shift ("scale") whenever the distinct
//! entry count passes [`MAX_HASH_ENTRIES`], merging colliding entries by
//! summing their values. The *exact* flavor compares channels directly and is
//! used as a per-color memo during pixel mapping.
//!
//! Chains are kept ordered by the key comparator so probes can stop as soon
//! as the current entry compares greater than the key. The bucket count walks
//! a prime sequence starting at 11, growing when the load factor passes 3 and
//! shrinking on the mirrored predicate.

use crate::image::pixel::Pixel;
use crate::utils::error::{QuantError, Result};
use fallible_collections::FallibleVec;
use log::debug;
use std::cmp::Ordering;

/// Hard cap on distinct entries in the adaptive map. Exceeding it bumps the
/// channel shift and collapses the key space.
pub const MAX_HASH_ENTRIES: usize = 65_536;

/// Maximum channel shift; at 7 every channel collapses to one bit.
pub const MAX_SCALE: u32 = 7;

const MIN_LENGTH: usize = 11;
const RESIZE_FACTOR: usize = 3;

/// Multiplier-XOR pixel hash. The shift-with-XOR structure keeps some of
/// every channel in the low bits, which matters because the bucket index is
/// the hash modulo a small prime.
#[inline]
fn pixel_hash(p: &Pixel, scale: u32) -> u32 {
    let r = (p.r >> scale) as u32;
    let g = (p.g >> scale) as u32;
    let b = (p.b >> scale) as u32;
    r.wrapping_mul(463) ^ (g << 8).wrapping_mul(10_069) ^ (b << 16).wrapping_mul(64_997)
}

fn is_prime(n: usize) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d = 3;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

/// First prime at or beyond `start`, stepping by `dir` (+1 or -1).
fn find_prime(mut start: usize, dir: isize) -> usize {
    loop {
        if start <= 2 {
            return 2;
        }
        if is_prime(start) {
            return start;
        }
        start = start.wrapping_add_signed(dir);
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum KeyOrder {
    /// Keys compare by their shifted hash value; distinct colors that hash
    /// equally under the current scale are the same key.
    Scaled,
    /// Keys compare channel-wise on (R, G, B); exact color identity.
    Exact,
}

#[derive(Clone, Copy)]
struct Entry {
    key: Pixel,
    value: u32,
}

/// Hash map from pixel keys to `u32` payloads (occurrence counts, palette
/// indices, or cached distances depending on the phase).
pub struct PixelMap {
    buckets: Vec<Vec<Entry>>,
    count: usize,
    scale: u32,
    order: KeyOrder,
}

impl PixelMap {
    /// Creates the adaptive map used for color counting and box annotation.
    pub fn adaptive() -> Result<Self> {
        Self::with_order(KeyOrder::Scaled)
    }

    /// Creates an exact-identity map (scale stays 0, no entry cap).
    pub fn exact() -> Result<Self> {
        Self::with_order(KeyOrder::Exact)
    }

    fn with_order(order: KeyOrder) -> Result<Self> {
        let mut buckets: Vec<Vec<Entry>> =
            FallibleVec::try_with_capacity(MIN_LENGTH).map_err(|_| QuantError::OutOfMemory)?;
        buckets.resize_with(MIN_LENGTH, Vec::new);
        Ok(PixelMap {
            buckets,
            count: 0,
            scale: 0,
            order,
        })
    }

    /// Number of distinct keys currently stored.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Current channel shift. Monotonically non-decreasing.
    pub fn scale(&self) -> u32 {
        self.scale
    }

    fn key_cmp(&self, a: &Pixel, b: &Pixel) -> Ordering {
        match self.order {
            KeyOrder::Scaled => pixel_hash(a, self.scale).cmp(&pixel_hash(b, self.scale)),
            KeyOrder::Exact => a.channels().cmp(&b.channels()),
        }
    }

    fn bucket_of(&self, key: &Pixel) -> usize {
        (pixel_hash(key, self.scale) as usize) % self.buckets.len()
    }

    /// Ordered chain probe: `Ok(pos)` on a key match, `Err(pos)` with the
    /// insertion point once an entry compares greater.
    fn chain_search(&self, chain: &[Entry], key: &Pixel) -> std::result::Result<usize, usize> {
        for (i, e) in chain.iter().enumerate() {
            match self.key_cmp(&e.key, key) {
                Ordering::Less => continue,
                Ordering::Equal => return Ok(i),
                Ordering::Greater => return Err(i),
            }
        }
        Err(chain.len())
    }

    /// Inserts `key` with `on_new()` if absent, otherwise applies `on_exists`
    /// to the stored value. On the adaptive map this is the operation that
    /// enforces the entry cap: passing [`MAX_HASH_ENTRIES`] bumps the scale
    /// and re-merges until the invariant holds again.
    pub fn upsert(
        &mut self,
        key: Pixel,
        on_new: impl FnOnce() -> u32,
        on_exists: impl FnOnce(&mut u32),
    ) -> Result<()> {
        let bucket = self.bucket_of(&key);
        match self.chain_search(&self.buckets[bucket], &key) {
            Ok(pos) => {
                on_exists(&mut self.buckets[bucket][pos].value);
            }
            Err(pos) => {
                let chain = &mut self.buckets[bucket];
                chain.try_reserve(1).map_err(|_| QuantError::OutOfMemory)?;
                chain.insert(
                    pos,
                    Entry {
                        key,
                        value: on_new(),
                    },
                );
                self.count += 1;
                self.maybe_resize()?;
                if self.order == KeyOrder::Scaled {
                    while self.count > MAX_HASH_ENTRIES && self.scale < MAX_SCALE {
                        self.scale += 1;
                        debug!("pixel hash over capacity, rehashing at scale {}", self.scale);
                        self.rehash_merging()?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Looks up the value stored for `key`, if any.
    pub fn lookup(&self, key: &Pixel) -> Option<u32> {
        let bucket = self.bucket_of(key);
        match self.chain_search(&self.buckets[bucket], key) {
            Ok(pos) => Some(self.buckets[bucket][pos].value),
            Err(_) => None,
        }
    }

    /// Unconditional insert; an existing entry for the key is overwritten.
    pub fn insert(&mut self, key: Pixel, value: u32) -> Result<()> {
        let bucket = self.bucket_of(&key);
        match self.chain_search(&self.buckets[bucket], &key) {
            Ok(pos) => {
                self.buckets[bucket][pos].value = value;
            }
            Err(pos) => {
                let chain = &mut self.buckets[bucket];
                chain.try_reserve(1).map_err(|_| QuantError::OutOfMemory)?;
                chain.insert(pos, Entry { key, value });
                self.count += 1;
                self.maybe_resize()?;
            }
        }
        Ok(())
    }

    /// Visits every entry in bucket-then-chain order.
    pub fn for_each(&self, mut f: impl FnMut(&Pixel, u32)) {
        for chain in &self.buckets {
            for e in chain {
                f(&e.key, e.value);
            }
        }
    }

    /// Visits every entry, allowing the value to be replaced in place.
    /// Iteration order is identical to [`for_each`](Self::for_each).
    pub fn for_each_update(&mut self, mut f: impl FnMut(&Pixel, &mut u32)) {
        for chain in &mut self.buckets {
            for e in chain.iter_mut() {
                f(&e.key, &mut e.value);
            }
        }
    }

    /// Grows or shrinks the bucket array along the prime sequence when the
    /// load factor crosses `RESIZE_FACTOR` in either direction.
    fn maybe_resize(&mut self) -> Result<()> {
        let len = self.buckets.len();
        let mut new_len = len;
        if self.count * RESIZE_FACTOR < len {
            new_len = find_prime((len / 2).saturating_sub(1), -1);
        } else if len * RESIZE_FACTOR < self.count {
            new_len = find_prime(len * 2 + 1, 1);
        }
        if new_len < MIN_LENGTH {
            new_len = len;
        }
        if new_len != len {
            self.rebucket(new_len)
        } else {
            Ok(())
        }
    }

    /// Re-places every entry under the current scale without changing the
    /// bucket count. Entries whose keys became equal are merged by summing
    /// their values into the earlier entry.
    fn rehash_merging(&mut self) -> Result<()> {
        self.rebucket(self.buckets.len())
    }

    fn rebucket(&mut self, new_len: usize) -> Result<()> {
        let mut new_buckets: Vec<Vec<Entry>> =
            FallibleVec::try_with_capacity(new_len).map_err(|_| QuantError::OutOfMemory)?;
        new_buckets.resize_with(new_len, Vec::new);
        let old = std::mem::replace(&mut self.buckets, new_buckets);
        self.count = 0;
        for chain in old {
            for e in chain {
                let bucket = self.bucket_of(&e.key);
                match self.chain_search(&self.buckets[bucket], &e.key) {
                    Ok(pos) => {
                        // Keys that collapsed under a bumped scale: keep the
                        // earlier key, sum the values.
                        self.buckets[bucket][pos].value =
                            self.buckets[bucket][pos].value.wrapping_add(e.value);
                    }
                    Err(pos) => {
                        let target = &mut self.buckets[bucket];
                        target.try_reserve(1).map_err(|_| QuantError::OutOfMemory)?;
                        target.insert(pos, e);
                        self.count += 1;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_up(map: &mut PixelMap, p: Pixel) {
        map.upsert(p, || 1, |v| *v += 1).unwrap();
    }

    #[test]
    fn test_counting_upsert() {
        let mut m = PixelMap::adaptive().unwrap();
        let a = Pixel::new(1, 2, 3);
        let b = Pixel::new(3, 2, 1);
        count_up(&mut m, a);
        count_up(&mut m, a);
        count_up(&mut m, b);
        assert_eq!(m.len(), 2);
        assert_eq!(m.lookup(&a), Some(2));
        assert_eq!(m.lookup(&b), Some(1));
        assert_eq!(m.lookup(&Pixel::new(7, 7, 7)), None);
    }

    #[test]
    fn test_growth_keeps_all_entries() {
        let mut m = PixelMap::adaptive().unwrap();
        for r in 0..64u8 {
            for g in 0..4u8 {
                count_up(&mut m, Pixel::new(r, g, 0));
            }
        }
        assert_eq!(m.len(), 256);
        for r in 0..64u8 {
            for g in 0..4u8 {
                assert_eq!(m.lookup(&Pixel::new(r, g, 0)), Some(1));
            }
        }
    }

    #[test]
    fn test_insert_overwrites() {
        let mut m = PixelMap::exact().unwrap();
        let p = Pixel::new(10, 20, 30);
        m.insert(p, 5).unwrap();
        m.insert(p, 9).unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m.lookup(&p), Some(9));
    }

    #[test]
    fn test_exact_map_ignores_reserved_byte() {
        let mut m = PixelMap::exact().unwrap();
        let mut a = Pixel::new(10, 20, 30);
        a.reserved = 0x7f;
        m.insert(a, 1).unwrap();
        assert_eq!(m.lookup(&Pixel::new(10, 20, 30)), Some(1));
    }

    #[test]
    fn test_scale_bump_merges_and_preserves_totals() {
        let mut m = PixelMap::adaptive().unwrap();
        // 65_536 distinct colors, then one more to cross the cap.
        for r in 0..=255u8 {
            for g in 0..=255u8 {
                count_up(&mut m, Pixel::new(r, g, 0));
            }
        }
        assert_eq!(m.len(), MAX_HASH_ENTRIES);
        assert_eq!(m.scale(), 0);
        count_up(&mut m, Pixel::new(0, 0, 1));
        assert!(m.scale() >= 1);
        assert!(m.len() <= MAX_HASH_ENTRIES);
        let mut total = 0u64;
        m.for_each(|_, v| total += v as u64);
        assert_eq!(total, 65_537);
        // Colors equal under the new shift resolve to one merged entry.
        assert_eq!(m.lookup(&Pixel::new(0, 0, 0)), m.lookup(&Pixel::new(1, 1, 1)));
    }

    #[test]
    fn test_for_each_update_rewrites_values() {
        let mut m = PixelMap::exact().unwrap();
        for i in 0..10u8 {
            m.insert(Pixel::new(i, 0, 0), i as u32).unwrap();
        }
        m.for_each_update(|_, v| *v *= 2);
        assert_eq!(m.lookup(&Pixel::new(4, 0, 0)), Some(8));
    }

    #[test]
    fn test_prime_sequence() {
        assert_eq!(find_prime(23, 1), 23);
        assert_eq!(find_prime(24, 1), 29);
        assert_eq!(find_prime(10, -1), 7);
        assert!(is_prime(11));
        assert!(!is_prime(49));
    }
}
