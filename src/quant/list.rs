// src/quant/list.rs

//! Arena-backed list of distinct pixels, threaded on three axis chains.
//!
//! Every distinct color becomes one node carrying its occurrence count and a
//! doubly-linked chain per color axis. Nodes live in a flat arena and link by
//! `u32` index (`NIL` = absent), so the box tree can own arbitrary sub-chains
//! without any pointer aliasing and the whole structure frees in one drop.
//!
//! After construction each axis chain is independently mergesorted so it runs
//! descending in that axis' channel value.

use crate::image::pixel::{Pixel, AXES};
use crate::quant::hash::PixelMap;
use crate::utils::error::{QuantError, Result};
use fallible_collections::FallibleVec;

/// Sentinel for "no node" in arena links.
pub const NIL: u32 = u32::MAX;

/// One distinct color. `pixel` holds the scale-shifted channels, so values
/// range over `0..=255 >> scale`.
pub struct ListNode {
    pub pixel: Pixel,
    pub count: u32,
    pub next: [u32; AXES],
    pub prev: [u32; AXES],
}

/// Owns every [`ListNode`]; chains reference each other only through indices
/// into this arena.
pub struct PixelArena {
    nodes: Vec<ListNode>,
}

impl PixelArena {
    /// Builds the arena from the distinct entries of `map` and returns it
    /// together with the three sorted chain heads.
    pub fn build_from_map(map: &PixelMap) -> Result<(Self, [u32; AXES])> {
        let mut nodes: Vec<ListNode> =
            FallibleVec::try_with_capacity(map.len()).map_err(|_| QuantError::OutOfMemory)?;
        let scale = map.scale();
        let mut heads = [NIL; AXES];
        map.for_each(|key, count| {
            let id = nodes.len() as u32;
            let mut node = ListNode {
                pixel: Pixel::new(key.r >> scale, key.g >> scale, key.b >> scale),
                count,
                next: [NIL; AXES],
                prev: [NIL; AXES],
            };
            for axis in 0..AXES {
                node.next[axis] = heads[axis];
                if heads[axis] != NIL {
                    nodes[heads[axis] as usize].prev[axis] = id;
                }
                heads[axis] = id;
            }
            nodes.push(node);
        });
        let mut arena = PixelArena { nodes };
        for (axis, head) in heads.iter_mut().enumerate() {
            *head = arena.mergesort(*head, axis);
        }
        Ok((arena, heads))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn node(&self, id: u32) -> &ListNode {
        &self.nodes[id as usize]
    }

    #[inline]
    pub fn node_mut(&mut self, id: u32) -> &mut ListNode {
        &mut self.nodes[id as usize]
    }

    /// Channel value of a node on the given axis.
    #[inline]
    pub fn channel(&self, id: u32, axis: usize) -> u8 {
        self.nodes[id as usize].pixel.channel(axis)
    }

    /// Forward iterator over one axis chain, starting at `head`.
    pub fn walk(&self, head: u32, axis: usize) -> AxisWalk<'_> {
        AxisWalk {
            arena: self,
            cursor: head,
            axis,
        }
    }

    /// Sorts one axis chain descending by that axis' channel, repairing both
    /// link directions. Splits by the slow/fast walker, recurses, then merges.
    fn mergesort(&mut self, head: u32, axis: usize) -> u32 {
        if head == NIL || self.nodes[head as usize].next[axis] == NIL {
            if head != NIL {
                self.nodes[head as usize].next[axis] = NIL;
                self.nodes[head as usize].prev[axis] = NIL;
            }
            return head;
        }

        let mut c = head;
        let mut t = head;
        while c != NIL && t != NIL {
            c = self.nodes[c as usize].next[axis];
            let tn = self.nodes[t as usize].next[axis];
            t = if tn != NIL {
                self.nodes[tn as usize].next[axis]
            } else {
                NIL
            };
        }
        if c != NIL {
            let cp = self.nodes[c as usize].prev[axis];
            if cp != NIL {
                self.nodes[cp as usize].next[axis] = NIL;
            }
            self.nodes[c as usize].prev[axis] = NIL;
        }

        let mut a = self.mergesort(head, axis);
        let mut b = self.mergesort(c, axis);

        let mut merged = NIL;
        let mut last = NIL;
        while a != NIL && b != NIL {
            let pick = if self.channel(a, axis) > self.channel(b, axis) {
                let n = a;
                a = self.nodes[a as usize].next[axis];
                n
            } else {
                let n = b;
                b = self.nodes[b as usize].next[axis];
                n
            };
            self.nodes[pick as usize].prev[axis] = last;
            self.nodes[pick as usize].next[axis] = NIL;
            if last != NIL {
                self.nodes[last as usize].next[axis] = pick;
            }
            last = pick;
            if merged == NIL {
                merged = pick;
            }
        }
        let rest = if a != NIL { a } else { b };
        if rest != NIL {
            self.nodes[last as usize].next[axis] = rest;
            self.nodes[rest as usize].prev[axis] = last;
        }
        merged
    }
}

/// Iterator produced by [`PixelArena::walk`].
pub struct AxisWalk<'a> {
    arena: &'a PixelArena,
    cursor: u32,
    axis: usize,
}

impl Iterator for AxisWalk<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.cursor == NIL {
            return None;
        }
        let id = self.cursor;
        self.cursor = self.arena.node(id).next[self.axis];
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena_from_colors(colors: &[(u8, u8, u8, u32)]) -> (PixelArena, [u32; AXES]) {
        let mut map = PixelMap::adaptive().unwrap();
        for &(r, g, b, n) in colors {
            for _ in 0..n {
                map.upsert(Pixel::new(r, g, b), || 1, |v| *v += 1).unwrap();
            }
        }
        PixelArena::build_from_map(&map).unwrap()
    }

    fn chain_values(arena: &PixelArena, head: u32, axis: usize) -> Vec<u8> {
        arena.walk(head, axis).map(|id| arena.channel(id, axis)).collect()
    }

    #[test]
    fn test_axis_chains_sorted_descending() {
        let (arena, heads) = arena_from_colors(&[
            (10, 200, 7, 1),
            (250, 3, 99, 2),
            (128, 128, 128, 1),
            (5, 255, 0, 3),
            (5, 5, 255, 1),
        ]);
        for axis in 0..AXES {
            let values = chain_values(&arena, heads[axis], axis);
            assert_eq!(values.len(), 5);
            assert!(values.windows(2).all(|w| w[0] >= w[1]), "axis {axis} not sorted");
        }
    }

    #[test]
    fn test_chains_visit_same_node_set() {
        let (arena, heads) = arena_from_colors(&[
            (1, 2, 3, 1),
            (9, 8, 7, 1),
            (100, 50, 25, 1),
            (25, 50, 100, 1),
        ]);
        let mut sets: Vec<Vec<u32>> = (0..AXES)
            .map(|axis| {
                let mut ids: Vec<u32> = arena.walk(heads[axis], axis).collect();
                ids.sort_unstable();
                ids
            })
            .collect();
        let reference = sets.pop().unwrap();
        for set in sets {
            assert_eq!(set, reference);
        }
    }

    #[test]
    fn test_prev_links_are_inverse_of_next() {
        let (arena, heads) = arena_from_colors(&[
            (3, 1, 4, 1),
            (1, 5, 9, 2),
            (2, 6, 5, 1),
            (3, 5, 8, 1),
            (9, 7, 9, 1),
        ]);
        for axis in 0..AXES {
            let forward: Vec<u32> = arena.walk(heads[axis], axis).collect();
            let tail = *forward.last().unwrap();
            let mut backward = Vec::new();
            let mut cursor = tail;
            while cursor != NIL {
                backward.push(cursor);
                cursor = arena.node(cursor).prev[axis];
            }
            backward.reverse();
            assert_eq!(forward, backward, "axis {axis} links inconsistent");
        }
    }

    #[test]
    fn test_counts_carried_from_map() {
        let (arena, heads) = arena_from_colors(&[(7, 7, 7, 4), (9, 9, 9, 1)]);
        let total: u32 = arena.walk(heads[0], 0).map(|id| arena.node(id).count).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn test_single_node_chain() {
        let (arena, heads) = arena_from_colors(&[(42, 42, 42, 1)]);
        for axis in 0..AXES {
            assert_eq!(heads[axis], 0);
            let n = arena.node(heads[axis]);
            assert_eq!(n.next[axis], NIL);
            assert_eq!(n.prev[axis], NIL);
        }
    }
}
