//! Minimum-cost bipartite assignment (Hungarian / Kuhn-Munkres).
//!
//! Potential-based O(n²·m) shortest augmenting path formulation. Rectangular
//! problems are solved over the smaller dimension: exactly
//! `min(rows, cols)` pairs are returned. Ties are broken towards the lowest
//! column index because relaxation only replaces a candidate on a strictly
//! smaller reduced cost.

use ndarray::Array2;

/// Solves the linear assignment problem for `cost` (rows × cols).
///
/// Returns `(row, col)` pairs sorted by row. Non-finite costs are treated as
/// prohibitively large rather than propagated.
pub fn hungarian(cost: &Array2<f64>) -> Vec<(usize, usize)> {
    let (rows, cols) = cost.dim();
    if rows == 0 || cols == 0 {
        return Vec::new();
    }

    // The solver needs rows <= cols; solve the transpose otherwise.
    let transposed = rows > cols;
    let (n, m) = if transposed { (cols, rows) } else { (rows, cols) };
    let finite_max = cost
        .iter()
        .copied()
        .filter(|c| c.is_finite())
        .fold(0.0_f64, |acc, c| acc.max(c.abs()));
    let penalty = (finite_max + 1.0) * (n.max(m) as f64 + 1.0);
    let at = |i: usize, j: usize| -> f64 {
        let c = if transposed { cost[[j, i]] } else { cost[[i, j]] };
        if c.is_finite() { c } else { penalty }
    };

    // 1-indexed potentials; column 0 is the virtual source.
    let mut u = vec![0.0_f64; n + 1];
    let mut v = vec![0.0_f64; m + 1];
    let mut owner = vec![0_usize; m + 1];
    let mut way = vec![0_usize; m + 1];

    for i in 1..=n {
        owner[0] = i;
        let mut j0 = 0_usize;
        let mut min_val = vec![f64::INFINITY; m + 1];
        let mut used = vec![false; m + 1];

        loop {
            used[j0] = true;
            let i0 = owner[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0_usize;

            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let reduced = at(i0 - 1, j - 1) - u[i0] - v[j];
                if reduced < min_val[j] {
                    min_val[j] = reduced;
                    way[j] = j0;
                }
                if min_val[j] < delta {
                    delta = min_val[j];
                    j1 = j;
                }
            }

            for j in 0..=m {
                if used[j] {
                    u[owner[j]] += delta;
                    v[j] -= delta;
                } else {
                    min_val[j] -= delta;
                }
            }

            j0 = j1;
            if owner[j0] == 0 {
                break;
            }
        }

        // Augment along the path back to the source.
        loop {
            let prev = way[j0];
            owner[j0] = owner[prev];
            j0 = prev;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut pairs: Vec<(usize, usize)> = (1..=m)
        .filter(|&j| owner[j] != 0)
        .map(|j| {
            let (r, c) = (owner[j] - 1, j - 1);
            if transposed { (c, r) } else { (r, c) }
        })
        .collect();
    pairs.sort_unstable_by_key(|&(r, _)| r);
    pairs
}

/// Total cost of a set of pairs.
pub fn assignment_cost(cost: &Array2<f64>, pairs: &[(usize, usize)]) -> f64 {
    pairs.iter().map(|&(r, c)| cost[[r, c]]).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn brute_force_min(cost: &Array2<f64>) -> f64 {
        // Square matrices only; enumerate all permutations.
        fn permute(k: usize, cols: &mut Vec<usize>, cost: &Array2<f64>, best: &mut f64) {
            if k == cols.len() {
                let total: f64 = cols.iter().enumerate().map(|(r, &c)| cost[[r, c]]).sum();
                *best = best.min(total);
                return;
            }
            for i in k..cols.len() {
                cols.swap(k, i);
                permute(k + 1, cols, cost, best);
                cols.swap(k, i);
            }
        }
        let mut cols: Vec<usize> = (0..cost.ncols()).collect();
        let mut best = f64::INFINITY;
        permute(0, &mut cols, cost, &mut best);
        best
    }

    #[test]
    fn identity_is_chosen_for_diagonal_costs() {
        let cost = array![[0.0, 5.0], [5.0, 0.0]];
        assert_eq!(hungarian(&cost), vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn beats_greedy_choice() {
        // Greedy row-by-row would take (0,0)=1 then (1,1)=10.
        let cost = array![[1.0, 2.0], [2.0, 10.0]];
        let pairs = hungarian(&cost);
        assert_eq!(pairs, vec![(0, 1), (1, 0)]);
        assert_eq!(assignment_cost(&cost, &pairs), 4.0);
    }

    #[test]
    fn matches_brute_force_on_square_problems() {
        let cost = array![
            [7.0, 53.0, 183.0, 439.0],
            [497.0, 383.0, 563.0, 79.0],
            [627.0, 343.0, 773.0, 959.0],
            [447.0, 283.0, 463.0, 29.0],
        ];
        let pairs = hungarian(&cost);
        assert_eq!(pairs.len(), 4);
        assert_eq!(assignment_cost(&cost, &pairs), brute_force_min(&cost));
    }

    #[test]
    fn more_rows_than_columns_matches_each_column_once() {
        let cost = array![[4.0, 1.0], [2.0, 8.0], [0.5, 0.6]];
        let pairs = hungarian(&cost);
        assert_eq!(pairs.len(), 2);
        let mut cols: Vec<usize> = pairs.iter().map(|&(_, c)| c).collect();
        cols.sort_unstable();
        assert_eq!(cols, vec![0, 1]);
        // Best is row 2 -> col 0 (0.5) and row 0 -> col 1 (1.0).
        assert_eq!(pairs, vec![(0, 1), (2, 0)]);
    }

    #[test]
    fn more_columns_than_rows_matches_each_row_once() {
        let cost = array![[3.0, 1.0, 2.0]];
        assert_eq!(hungarian(&cost), vec![(0, 1)]);
    }

    #[test]
    fn empty_problems_produce_no_pairs() {
        assert!(hungarian(&Array2::<f64>::zeros((0, 3))).is_empty());
        assert!(hungarian(&Array2::<f64>::zeros((2, 0))).is_empty());
    }

    #[test]
    fn ties_prefer_lowest_indices() {
        let cost = Array2::<f64>::zeros((2, 2));
        assert_eq!(hungarian(&cost), vec![(0, 0), (1, 1)]);
    }
}
