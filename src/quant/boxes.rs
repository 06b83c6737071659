// src/quant/boxes.rs

//! Recursive median-cut partitioning of the color space.
//!
//! Boxes form a binary tree over sub-chains of the pixel arena. Each split
//! picks the most populous box, chooses the axis with the widest
//! luminance-weighted range, and bisects the box's pixels at the population
//! median, keeping runs of equal channel values on one side. Leaves are then
//! numbered depth-first and written back into the pixel hash so every color
//! knows its palette slot.

use crate::image::pixel::AXES;
use crate::quant::hash::PixelMap;
use crate::quant::heap::Heap;
use crate::quant::list::{PixelArena, NIL};
use crate::utils::error::{QuantError, Result};
use bitvec::prelude::*;
use fallible_collections::FallibleVec;
use log::{debug, warn};

/// Fixed-point Rec. 601 luma coefficients, used only to weight the per-axis
/// range when choosing a split axis.
const LUMA_WEIGHTS: [u32; AXES] = [77, 150, 29];

/// One box of the partition tree. Head/tail delimit this box's sub-chain on
/// each axis; a split moves them down to the children.
pub struct BoxNode {
    pub head: [u32; AXES],
    pub tail: [u32; AXES],
    pub pixel_count: u32,
    /// Axis of the last split; `None` for a leaf.
    pub axis: Option<usize>,
    /// Cached color-space volume; `None` = stale.
    volume: Option<u32>,
    pub left: u32,
    pub right: u32,
}

/// The median-cut partition tree. Box nodes index into an internal arena the
/// same way pixel nodes do.
pub struct BoxTree {
    boxes: Vec<BoxNode>,
    root: u32,
}

impl BoxTree {
    pub fn root(&self) -> u32 {
        self.root
    }

    pub fn boxes(&self) -> &[BoxNode] {
        &self.boxes
    }

    /// Color-space volume of a box: the product of per-axis
    /// `(max − min + 1)` extents. Cached after first computation.
    fn volume(&mut self, arena: &PixelArena, id: u32) -> u32 {
        if let Some(v) = self.boxes[id as usize].volume {
            return v;
        }
        let b = &self.boxes[id as usize];
        let mut v = 1u32;
        for axis in 0..AXES {
            let hi = arena.channel(b.head[axis], axis) as u32;
            let lo = arena.channel(b.tail[axis], axis) as u32;
            v *= hi - lo + 1;
        }
        self.boxes[id as usize].volume = Some(v);
        v
    }

    /// Splits `id` at its population median and returns the two child ids.
    fn split(&mut self, arena: &mut PixelArena, flags: &mut BitVec, id: u32) -> Result<(u32, u32)> {
        let (head, tail, pixel_count) = {
            let b = &self.boxes[id as usize];
            (b.head, b.tail, b.pixel_count)
        };

        // Widest luminance-weighted extent wins; ties keep the lowest axis.
        let mut axis = 0;
        let mut best = 0u32;
        for a in 0..AXES {
            let hi = arena.channel(head[a], a) as u32;
            let lo = arena.channel(tail[a], a) as u32;
            let f = (hi - lo) * LUMA_WEIGHTS[a];
            if f > best {
                best = f;
                axis = a;
            }
        }
        self.boxes[id as usize].axis = Some(axis);

        let (new_heads, new_tails, counts) =
            split_chains(arena, flags, &head, &tail, axis, pixel_count)?;

        let left = self.push_box(BoxNode {
            head: new_heads[0],
            tail: new_tails[0],
            pixel_count: counts[0],
            axis: None,
            volume: None,
            left: NIL,
            right: NIL,
        })?;
        let right = self.push_box(BoxNode {
            head: new_heads[1],
            tail: new_tails[1],
            pixel_count: counts[1],
            axis: None,
            volume: None,
            left: NIL,
            right: NIL,
        })?;

        let parent = &mut self.boxes[id as usize];
        parent.head = [NIL; AXES];
        parent.tail = [NIL; AXES];
        parent.left = left;
        parent.right = right;
        Ok((left, right))
    }

    fn push_box(&mut self, node: BoxNode) -> Result<u32> {
        if self.boxes.len() == self.boxes.capacity() {
            self.boxes
                .try_reserve(self.boxes.len().max(1))
                .map_err(|_| QuantError::OutOfMemory)?;
        }
        let id = self.boxes.len() as u32;
        self.boxes.push(node);
        Ok(id)
    }

    /// Numbers the leaves depth-first (left child first) and records each
    /// member color's leaf index in `map`, with channels shifted back up to
    /// full precision so the original pixels hash onto them.
    ///
    /// Returns the number of leaves, which is the palette length.
    pub fn annotate(&self, arena: &PixelArena, map: &mut PixelMap) -> Result<u32> {
        let mut next_index = 0u32;
        self.annotate_node(self.root, arena, map, &mut next_index)?;
        Ok(next_index)
    }

    fn annotate_node(
        &self,
        id: u32,
        arena: &PixelArena,
        map: &mut PixelMap,
        next_index: &mut u32,
    ) -> Result<()> {
        let b = &self.boxes[id as usize];
        if b.left != NIL && b.right != NIL {
            self.annotate_node(b.left, arena, map, next_index)?;
            return self.annotate_node(b.right, arena, map, next_index);
        }
        if b.left != NIL || b.right != NIL {
            return Err(QuantError::Internal(
                "box tree node with a single child".into(),
            ));
        }
        let scale = map.scale();
        for node_id in arena.walk(b.head[0], 0) {
            let mut key = arena.node(node_id).pixel;
            key.r <<= scale;
            key.g <<= scale;
            key.b <<= scale;
            map.insert(key, *next_index)?;
        }
        if b.head[0] != NIL {
            *next_index += 1;
        }
        Ok(())
    }
}

/// Runs the median cut: repeatedly splits the most populous box until
/// `n_quant` leaves exist or every remaining box has unit volume.
pub fn median_cut(
    arena: &mut PixelArena,
    heads: [u32; AXES],
    total_count: u32,
    n_quant: usize,
) -> Result<BoxTree> {
    let mut tails = [NIL; AXES];
    for axis in 0..AXES {
        let mut t = heads[axis];
        while t != NIL && arena.node(t).next[axis] != NIL {
            t = arena.node(t).next[axis];
        }
        tails[axis] = t;
    }

    let mut boxes: Vec<BoxNode> =
        FallibleVec::try_with_capacity(2 * n_quant - 1).map_err(|_| QuantError::OutOfMemory)?;
    boxes.push(BoxNode {
        head: heads,
        tail: tails,
        pixel_count: total_count,
        axis: None,
        volume: None,
        left: NIL,
        right: NIL,
    });
    let mut tree = BoxTree { boxes, root: 0 };

    let mut heap = Heap::new(|a: &(u32, u32), b: &(u32, u32)| a.0.cmp(&b.0))?;
    heap.push((total_count, tree.root))?;
    let mut flags = bitvec![0; arena.len()];

    let mut splits = 0usize;
    'splitting: for _ in 1..n_quant {
        let target = loop {
            let Some((_, id)) = heap.pop() else {
                break 'splitting;
            };
            if tree.volume(arena, id) != 1 {
                break id;
            }
        };
        let (left, right) = tree.split(arena, &mut flags, target)?;
        heap.push((tree.boxes[left as usize].pixel_count, left))?;
        heap.push((tree.boxes[right as usize].pixel_count, right))?;
        splits += 1;
    }
    debug!("median cut performed {splits} splits over {} colors", arena.len());
    Ok(tree)
}

/// Bisects a box's chains at the population median of `axis`.
///
/// Walks the axis chain accumulating occurrence counts until the running sum
/// passes half the box population, then keeps the run of equal boundary
/// values on the left. If everything lands left, the trailing run of
/// tail-equal values is pulled back to the right. Finally each of the three
/// chains is re-threaded into left/right chains, preserving relative order.
#[allow(clippy::type_complexity)]
fn split_chains(
    arena: &mut PixelArena,
    flags: &mut BitVec,
    head: &[u32; AXES],
    tail: &[u32; AXES],
    axis: usize,
    pixel_count: u32,
) -> Result<([[u32; AXES]; 2], [[u32; AXES]; 2], [u32; 2])> {
    let mut counts = [0u32; 2];
    let mut left = 0u64;
    let mut boundary_val = 0u8;

    let mut c = head[axis];
    while c != NIL {
        let node = arena.node(c);
        left += node.count as u64;
        counts[0] += node.count;
        boundary_val = node.pixel.channel(axis);
        flags.set(c as usize, false);
        c = node.next[axis];
        if left * 2 > pixel_count as u64 {
            break;
        }
    }
    // The tie block straddling the median stays on the left.
    while c != NIL && arena.channel(c, axis) == boundary_val {
        let node = arena.node(c);
        counts[0] += node.count;
        flags.set(c as usize, false);
        c = node.next[axis];
    }
    while c != NIL {
        let node = arena.node(c);
        counts[1] += node.count;
        flags.set(c as usize, true);
        c = node.next[axis];
    }
    if counts[1] == 0 {
        // Everything went left; hand the trailing tie block to the right.
        let tail_val = arena.channel(tail[axis], axis);
        let mut c = tail[axis];
        while c != NIL && arena.channel(c, axis) == tail_val {
            let node = arena.node(c);
            counts[0] -= node.count;
            counts[1] += node.count;
            flags.set(c as usize, true);
            c = node.prev[axis];
        }
    }
    if counts[0] == 0 || counts[1] == 0 {
        warn!("degenerate split along axis {axis}");
        return Err(QuantError::Internal(
            "median split produced an empty partition".into(),
        ));
    }

    let mut new_heads = [[NIL; AXES]; 2];
    let mut new_tails = [[NIL; AXES]; 2];
    for a in 0..AXES {
        let mut last = [NIL; 2];
        let mut c = head[a];
        while c != NIL {
            let next = arena.node(c).next[a];
            let side = flags[c as usize] as usize;
            if last[side] != NIL {
                arena.node_mut(last[side]).next[a] = c;
            } else {
                new_heads[side][a] = c;
            }
            arena.node_mut(c).prev[a] = last[side];
            last[side] = c;
            c = next;
        }
        for side in 0..2 {
            if last[side] != NIL {
                arena.node_mut(last[side]).next[a] = NIL;
            }
            new_tails[side][a] = last[side];
        }
    }
    Ok((new_heads, new_tails, counts))
}
