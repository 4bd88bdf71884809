//! Dynamic time warping
//!
//! Dynamic time warping (DTW) pairs the samples of two
//! sequences so that the sum of pointwise distances is
//! minimized. The pairing, or *warp path*, is a list of index
//! pairs `(i, j)` which
//!
//! * starts at `(0, 0)`;
//! * ends at `(x.len() - 1, y.len() - 1)`; and
//! * advances `i`, `j`, or both by exactly one per step.
//!
//! ```txt
//!        y →
//!      0 1 2 3 4
//!   0  * *
//! x 1      *
//! ↓ 2      *
//!   3        * *
//! ```
//!
//! Exact DTW costs `O(N·M)`. [`fastdtw()`] implements the
//! multi-resolution approximation of
//!
//! * S. Salvador and P. Chan, "FastDTW: Toward Accurate Dynamic
//!   Time Warping in Linear Time and Space," KDD Workshop on
//!   Mining Temporal and Sequential Data, 2004.
//!
//! Both sequences are coarsened by averaging adjacent pairs,
//! warped recursively, and the coarse path is projected back
//! to full resolution. The projected path, widened by a
//! `radius`, bounds the search at the finer level.
//!
//! The point distance is the absolute difference. When several
//! predecessors tie, the diagonal step wins: two identical
//! sequences always warp along the diagonal.

use std::collections::HashSet;
use std::ops::Range;

use thiserror::Error;

/// Error warping two sequences
#[derive(Error, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AlignError {
    /// One of the sequences has no samples
    #[error("cannot warp an empty sequence")]
    EmptySequence,

    /// A sample is NaN or infinite
    #[error("sequence contains a non-finite sample")]
    NonFiniteSample,

    /// The search window does not connect start and end
    #[error("search window does not reach the end of the sequences")]
    Unreachable,
}

/// A warp path and its total distance
#[derive(Clone, Debug, PartialEq)]
pub struct Warp {
    /// Sum of point distances along the path
    pub distance: f64,

    /// Index pairs `(i, j)` into the first and second sequence
    pub path: Vec<(usize, usize)>,
}

impl Warp {
    /// Project both sequences through the warp path
    ///
    /// Returns two sequences of equal length, `path.len()`,
    /// in which element `k` of each are warped to each other.
    /// `x` and `y` must be the sequences which produced this
    /// warp.
    pub fn project(&self, x: &[f64], y: &[f64]) -> (Vec<f64>, Vec<f64>) {
        self.path.iter().map(|&(i, j)| (x[i], y[j])).unzip()
    }

    /// Number of steps in the path
    pub fn len(&self) -> usize {
        self.path.len()
    }

    /// True if the path is empty
    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }
}

/// Exact dynamic time warping
///
/// Searches every cell. Prefer [`fastdtw()`] for long
/// sequences.
pub fn dtw(x: &[f64], y: &[f64]) -> Result<Warp, AlignError> {
    check_sequence(x)?;
    check_sequence(y)?;
    solve(x, y, &SearchBand::full(x.len(), y.len()))
}

/// Approximate dynamic time warping
///
/// `radius` widens the projected coarse path at each level of
/// refinement. Larger values are slower but closer to exact.
/// Sequences shorter than `radius + 2` are warped exactly.
///
/// ```
/// use tagphase::fastdtw;
///
/// let x = [1.0, 2.0, 3.0, 4.0];
/// let y = [1.0, 1.0, 2.0, 3.0, 3.0, 4.0];
/// let warp = fastdtw(&x, &y, 1).unwrap();
/// assert_eq!(0.0, warp.distance);
///
/// let (wx, wy) = warp.project(&x, &y);
/// assert_eq!(wx, wy);
/// ```
pub fn fastdtw(x: &[f64], y: &[f64], radius: usize) -> Result<Warp, AlignError> {
    check_sequence(x)?;
    check_sequence(y)?;
    fastdtw_level(x, y, radius)
}

// One level of the FastDTW recursion
fn fastdtw_level(x: &[f64], y: &[f64], radius: usize) -> Result<Warp, AlignError> {
    let min_size = radius + 2;
    if x.len() < min_size || y.len() < min_size {
        return solve(x, y, &SearchBand::full(x.len(), y.len()));
    }

    let coarse = fastdtw_level(&reduce_by_half(x), &reduce_by_half(y), radius)?;
    let band = SearchBand::from_coarse_path(&coarse.path, x.len(), y.len(), radius);
    solve(x, y, &band)
}

// Halve the resolution by averaging adjacent pairs
//
// An odd trailing sample is dropped.
fn reduce_by_half(x: &[f64]) -> Vec<f64> {
    x.chunks_exact(2).map(|p| (p[0] + p[1]) / 2.0).collect()
}

fn check_sequence(x: &[f64]) -> Result<(), AlignError> {
    if x.is_empty() {
        Err(AlignError::EmptySequence)
    } else if x.iter().any(|v| !v.is_finite()) {
        Err(AlignError::NonFiniteSample)
    } else {
        Ok(())
    }
}

/// Cells which the DTW solver may visit
///
/// Row `i` permits the contiguous columns `rows[i]`.
#[derive(Clone, Debug, PartialEq, Eq)]
struct SearchBand {
    rows: Vec<Range<usize>>,
}

impl SearchBand {
    // Every cell of an `len_x` by `len_y` grid
    fn full(len_x: usize, len_y: usize) -> Self {
        Self {
            rows: vec![0..len_y; len_x],
        }
    }

    // Project a coarse path onto a grid of twice the resolution
    //
    // Each coarse cell, widened by `radius` in both directions,
    // covers a 2×2 block of fine cells. Within each fine row,
    // the band is the first contiguous run of covered cells at
    // or after the previous row's start.
    fn from_coarse_path(
        path: &[(usize, usize)],
        len_x: usize,
        len_y: usize,
        radius: usize,
    ) -> Self {
        let radius = radius as isize;

        let mut coarse = HashSet::new();
        for &(i, j) in path {
            for a in -radius..=radius {
                for b in -radius..=radius {
                    let (ci, cj) = (i as isize + a, j as isize + b);
                    if ci >= 0 && cj >= 0 {
                        coarse.insert((ci as usize, cj as usize));
                    }
                }
            }
        }

        let mut fine = HashSet::with_capacity(coarse.len() * 4);
        for &(i, j) in &coarse {
            fine.insert((2 * i, 2 * j));
            fine.insert((2 * i, 2 * j + 1));
            fine.insert((2 * i + 1, 2 * j));
            fine.insert((2 * i + 1, 2 * j + 1));
        }

        let mut rows = Vec::with_capacity(len_x);
        let mut start_j = 0;
        for i in 0..len_x {
            let mut run: Option<Range<usize>> = None;
            for j in start_j..len_y {
                if fine.contains(&(i, j)) {
                    match run.as_mut() {
                        Some(r) => r.end = j + 1,
                        None => run = Some(j..j + 1),
                    }
                } else if run.is_some() {
                    break;
                }
            }

            match run {
                Some(r) => {
                    start_j = r.start;
                    rows.push(r);
                }
                None => rows.push(start_j..start_j),
            }
        }

        Self { rows }
    }

    #[inline]
    fn contains(&self, i: usize, j: usize) -> bool {
        self.rows.get(i).map_or(false, |r| r.contains(&j))
    }
}

// Predecessor of a cell on the optimal path
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    Start,
    Diagonal,
    Up,
    Left,
}

#[derive(Clone, Copy, Debug)]
struct Cell {
    cost: f64,
    step: Step,
}

// Solve DTW within `band`
fn solve(x: &[f64], y: &[f64], band: &SearchBand) -> Result<Warp, AlignError> {
    let mut table: Vec<Vec<Cell>> = Vec::with_capacity(x.len());

    for (i, cols) in band.rows.iter().enumerate() {
        let mut row = Vec::with_capacity(cols.len());
        for j in cols.clone() {
            let dist = (x[i] - y[j]).abs();
            let cell = if i == 0 && j == 0 {
                Cell {
                    cost: dist,
                    step: Step::Start,
                }
            } else {
                let candidates = [
                    (Step::Diagonal, cost_at(&table, &row, band, i, j, 1, 1)),
                    (Step::Up, cost_at(&table, &row, band, i, j, 1, 0)),
                    (Step::Left, cost_at(&table, &row, band, i, j, 0, 1)),
                ];
                let mut best = candidates[0];
                for cand in &candidates[1..] {
                    if cand.1 < best.1 {
                        best = *cand;
                    }
                }
                Cell {
                    cost: best.1 + dist,
                    step: best.0,
                }
            };
            row.push(cell);
        }
        table.push(row);
    }

    let (last_i, last_j) = (x.len() - 1, y.len() - 1);
    if !band.contains(last_i, last_j) {
        return Err(AlignError::Unreachable);
    }
    let distance = table[last_i][last_j - band.rows[last_i].start].cost;
    if !distance.is_finite() {
        return Err(AlignError::Unreachable);
    }

    let mut path = Vec::with_capacity(x.len() + y.len());
    let (mut i, mut j) = (last_i, last_j);
    loop {
        path.push((i, j));
        match table[i][j - band.rows[i].start].step {
            Step::Start => break,
            Step::Diagonal => {
                i -= 1;
                j -= 1;
            }
            Step::Up => i -= 1,
            Step::Left => j -= 1,
        }
    }
    path.reverse();

    Ok(Warp { distance, path })
}

// Accumulated cost of the cell `(i - di, j - dj)`
//
// `row` is the row under construction (row `i`). Cells
// outside of the grid or the band cost infinity.
#[inline]
fn cost_at(
    table: &[Vec<Cell>],
    row: &[Cell],
    band: &SearchBand,
    i: usize,
    j: usize,
    di: usize,
    dj: usize,
) -> f64 {
    if i < di || j < dj {
        return f64::INFINITY;
    }
    let (pi, pj) = (i - di, j - dj);
    if !band.contains(pi, pj) {
        return f64::INFINITY;
    }

    let offset = pj - band.rows[pi].start;
    if pi == i {
        row[offset].cost
    } else {
        table[pi][offset].cost
    }
}
