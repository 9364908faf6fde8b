//! Pixel-edge boundary tracing
//!
//! Rings follow pixel edges, so a traced polygon covers exactly the pixels of
//! its component. Edges are directed with the region on the right (screen
//! coordinates, y down); outer rings then have positive shoelace area and
//! holes negative. Where two region pixels touch only at a corner the trace
//! turns towards the current pixel, keeping 4-connected regions apart.

use std::collections::HashSet;

/// Ring of grid vertices `(x, y)`, closed (first == last).
pub type Ring = Vec<(i64, i64)>;

const STEP: [(i64, i64); 4] = [(1, 0), (0, 1), (-1, 0), (0, -1)];

/// Directed edge: start vertex and direction index into [`STEP`].
type Edge = (i64, i64, usize);

/// Trace every boundary ring of the region where `inside(row, col)` holds.
///
/// `rows × cols` is the extent to scan; pixels outside it count as outside.
pub fn trace_rings<F>(rows: usize, cols: usize, inside: F) -> Vec<Ring>
where
    F: Fn(usize, usize) -> bool,
{
    let at = |r: i64, c: i64| {
        r >= 0 && c >= 0 && (r as usize) < rows && (c as usize) < cols && inside(r as usize, c as usize)
    };

    // Emitted in row-major pixel order, which fixes where each ring starts
    let mut ordered: Vec<Edge> = Vec::new();
    for r in 0..rows as i64 {
        for c in 0..cols as i64 {
            if !at(r, c) {
                continue;
            }
            if !at(r - 1, c) {
                ordered.push((c, r, 0));
            }
            if !at(r, c + 1) {
                ordered.push((c + 1, r, 1));
            }
            if !at(r + 1, c) {
                ordered.push((c + 1, r + 1, 2));
            }
            if !at(r, c - 1) {
                ordered.push((c, r + 1, 3));
            }
        }
    }
    let edges: HashSet<Edge> = ordered.iter().copied().collect();
    let mut used: HashSet<Edge> = HashSet::with_capacity(edges.len());
    let mut rings = Vec::new();

    for &start in &ordered {
        if used.contains(&start) {
            continue;
        }
        let mut ring: Ring = vec![(start.0, start.1)];
        let mut edge = start;
        loop {
            used.insert(edge);
            let (dx, dy) = STEP[edge.2];
            let (x, y) = (edge.0 + dx, edge.1 + dy);
            // Prefer right turn, then straight, then left
            let Some(dir) = [(edge.2 + 1) % 4, edge.2, (edge.2 + 3) % 4]
                .into_iter()
                .find(|&d| edges.contains(&(x, y, d)))
            else {
                break;
            };
            let next = (x, y, dir);
            if next == start {
                // Start vertex is not a corner if the ring passes straight through
                if dir == edge.2 {
                    ring.remove(0);
                }
                break;
            }
            if dir != edge.2 {
                ring.push((x, y));
            }
            edge = next;
        }
        if let Some(&first) = ring.first() {
            ring.push(first);
        }
        rings.push(ring);
    }
    rings
}

/// Shoelace area of a closed ring (positive for outer rings).
pub fn signed_area(ring: &Ring) -> f64 {
    let twice: i64 = ring
        .windows(2)
        .map(|w| w[0].0 * w[1].1 - w[1].0 * w[0].1)
        .sum();
    twice as f64 / 2.0
}
