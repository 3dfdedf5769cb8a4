//! Minimum-cost bipartite assignment.
//!
//! Solves the rectangular linear sum assignment problem with the
//! shortest-augmenting-path form of the Hungarian algorithm, O(n²·m) for an
//! `n × m` matrix with `n <= m`. Taller matrices are solved transposed.

use alloc::vec;
use alloc::vec::Vec;

use crate::error::DetrCoreError;

/// Assign rows to columns at minimum total cost.
///
/// `cost` is row-major with `rows * cols` entries. Every element of the
/// smaller side is assigned exactly once. Returns `(row, col)` pairs sorted
/// by row.
///
/// # Errors
/// - [`DetrCoreError::DimensionMismatch`] if `cost.len() != rows * cols`
/// - [`DetrCoreError::NonFiniteCost`] if any entry is NaN or infinite
pub fn linear_sum_assignment(
    cost: &[f32],
    rows: usize,
    cols: usize,
) -> Result<Vec<(usize, usize)>, DetrCoreError> {
    if cost.len() != rows * cols {
        return Err(DetrCoreError::DimensionMismatch {
            expected: rows * cols,
            got: cost.len(),
        });
    }
    if let Some(idx) = cost.iter().position(|c| !c.is_finite()) {
        return Err(DetrCoreError::NonFiniteCost {
            row: idx / cols,
            col: idx % cols,
        });
    }
    if rows == 0 || cols == 0 {
        return Ok(Vec::new());
    }

    let transposed = rows > cols;
    let (n, m) = if transposed { (cols, rows) } else { (rows, cols) };
    let at = |i: usize, j: usize| -> f64 {
        if transposed {
            cost[j * cols + i] as f64
        } else {
            cost[i * cols + j] as f64
        }
    };

    // Potentials and matching are 1-indexed; slot 0 is the virtual source.
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; m + 1];
    let mut owner = vec![0usize; m + 1];
    let mut way = vec![0usize; m + 1];

    for i in 1..=n {
        owner[0] = i;
        let mut j0 = 0usize;
        let mut min_slack = vec![f64::INFINITY; m + 1];
        let mut used = vec![false; m + 1];

        loop {
            used[j0] = true;
            let i0 = owner[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0usize;

            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let reduced = at(i0 - 1, j - 1) - u[i0] - v[j];
                if reduced < min_slack[j] {
                    min_slack[j] = reduced;
                    way[j] = j0;
                }
                if min_slack[j] < delta {
                    delta = min_slack[j];
                    j1 = j;
                }
            }

            for j in 0..=m {
                if used[j] {
                    u[owner[j]] += delta;
                    v[j] -= delta;
                } else {
                    min_slack[j] -= delta;
                }
            }

            j0 = j1;
            if owner[j0] == 0 {
                break;
            }
        }

        // Flip the augmenting path.
        loop {
            let j1 = way[j0];
            owner[j0] = owner[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut pairs: Vec<(usize, usize)> = (1..=m)
        .filter(|&j| owner[j] != 0)
        .map(|j| {
            let (a, b) = (owner[j] - 1, j - 1);
            if transposed {
                (b, a)
            } else {
                (a, b)
            }
        })
        .collect();
    pairs.sort_unstable();
    Ok(pairs)
}

/// Total cost of an assignment over a row-major `cols`-wide matrix.
pub fn assignment_cost(cost: &[f32], cols: usize, pairs: &[(usize, usize)]) -> f32 {
    pairs.iter().map(|&(r, c)| cost[r * cols + c]).sum()
}
