//! Small dense linear-algebra helpers for the region classifier and the
//! conic backend.
//!
//! Matrices here are tiny (the dimension of an uncertainty region), so
//! dense factorizations are fine.

use faer::{prelude::*, solvers::PartialPivLu, Mat};

/// Solve the dense linear system `Ax = b` with partial-pivoted LU.
///
/// Returns `None` for dimension mismatches or non-finite results
/// (singular systems surface as NaN/inf in the back-substitution).
pub fn solve(matrix: &[Vec<f64>], rhs: &[f64]) -> Option<Vec<f64>> {
    let n = matrix.len();
    if n == 0 {
        return Some(Vec::new());
    }
    if rhs.len() != n || matrix.iter().any(|row| row.len() != n) {
        return None;
    }

    let mat = Mat::from_fn(n, n, |i, j| matrix[i][j]);
    let rhs_mat = Mat::from_fn(n, 1, |i, _| rhs[i]);
    let lu = PartialPivLu::new(mat.as_ref());
    let sol = lu.solve(&rhs_mat);

    let mut solution = Vec::with_capacity(n);
    for i in 0..n {
        let v = sol.read(i, 0);
        if !v.is_finite() {
            return None;
        }
        solution.push(v);
    }
    Some(solution)
}

/// Invert a dense matrix by solving against unit columns.
pub fn invert(matrix: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = matrix.len();
    let mut columns = Vec::with_capacity(n);
    for j in 0..n {
        let mut e = vec![0.0; n];
        e[j] = 1.0;
        columns.push(solve(matrix, &e)?);
    }
    // columns[j][i] = inv[i][j]
    let mut inv = vec![vec![0.0; n]; n];
    for (j, col) in columns.iter().enumerate() {
        for (i, &v) in col.iter().enumerate() {
            inv[i][j] = v;
        }
    }
    Some(inv)
}

/// Solve `L x = b` for lower-triangular `L` by forward substitution.
///
/// Zero pivots are tolerated when the corresponding right-hand side entry
/// is already satisfied (the rank-deficient columns of a semidefinite
/// Cholesky factor); otherwise the system is inconsistent and `None` is
/// returned.
pub fn forward_substitute(l: &[Vec<f64>], rhs: &[f64]) -> Option<Vec<f64>> {
    let n = l.len();
    if rhs.len() != n || l.iter().any(|row| row.len() != n) {
        return None;
    }
    let scale = rhs.iter().fold(1.0f64, |acc, v| acc.max(v.abs()));

    let mut x = vec![0.0; n];
    for i in 0..n {
        let mut residual = rhs[i];
        for k in 0..i {
            residual -= l[i][k] * x[k];
        }
        if l[i][i].abs() <= 1e-12 {
            if residual.abs() > 1e-8 * scale {
                return None;
            }
            x[i] = 0.0;
        } else {
            x[i] = residual / l[i][i];
        }
    }
    Some(x)
}

/// Strict Cholesky factorization `A = L L^T` of a symmetric
/// positive-definite matrix. Returns the lower factor, or `None` if the
/// matrix is not positive definite.
pub fn cholesky(matrix: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    factorize(matrix, false)
}

/// Cholesky with a pivot tolerance: positive-semidefinite matrices yield a
/// factor with zero columns on the deficient directions. Returns `None`
/// only if the matrix is indefinite.
pub fn cholesky_psd(matrix: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    factorize(matrix, true)
}

fn factorize(matrix: &[Vec<f64>], allow_semidefinite: bool) -> Option<Vec<Vec<f64>>> {
    let n = matrix.len();
    if matrix.iter().any(|row| row.len() != n) {
        return None;
    }
    let scale = matrix
        .iter()
        .flat_map(|row| row.iter())
        .fold(1.0f64, |acc, v| acc.max(v.abs()));
    let tol = 1e-10 * scale;

    let mut l = vec![vec![0.0; n]; n];
    for j in 0..n {
        let mut diag = matrix[j][j];
        for k in 0..j {
            diag -= l[j][k] * l[j][k];
        }
        if diag <= tol {
            if !allow_semidefinite || diag < -tol {
                return None;
            }
            // Deficient direction: the rest of the column must vanish too.
            for i in j + 1..n {
                let mut off = matrix[i][j];
                for k in 0..j {
                    off -= l[i][k] * l[j][k];
                }
                if off.abs() > 1e-8 * scale {
                    return None;
                }
            }
            continue;
        }
        let root = diag.sqrt();
        l[j][j] = root;
        for i in j + 1..n {
            let mut off = matrix[i][j];
            for k in 0..j {
                off -= l[i][k] * l[j][k];
            }
            l[i][j] = off / root;
        }
    }
    Some(l)
}
