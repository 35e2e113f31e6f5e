//! Dense linear algebra for the small systems of the pipeline.
//!
//! Matrix inversion for the weighted telescope solve and a pseudoinverse
//! for the flux least squares. Sizes are at most a dozen rows.

use fringe_types::error::{RtdError, RtdResult};
use ndarray::{Array1, Array2};

const JACOBI_MAX_SWEEPS: usize = 100;

/// Inverse of a square matrix by Gauss-Jordan elimination with partial
/// pivoting.
///
/// Fails with [`RtdError::SingularSystem`] when a pivot falls below
/// `n * eps * max|a|`.
pub fn invert(a: &Array2<f64>) -> RtdResult<Array2<f64>> {
    let (n, m) = a.dim();
    if n != m {
        return Err(RtdError::InvalidInput(format!(
            "cannot invert a {n}x{m} matrix"
        )));
    }
    let scale = a.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if n == 0 || scale == 0.0 || !scale.is_finite() {
        return Err(RtdError::SingularSystem);
    }
    let tol = n as f64 * f64::EPSILON * scale;

    let mut work = a.clone();
    let mut inv = Array2::<f64>::eye(n);
    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&i, &j| work[[i, col]].abs().total_cmp(&work[[j, col]].abs()))
            .unwrap_or(col);
        let pivot = work[[pivot_row, col]];
        if pivot.abs() <= tol {
            return Err(RtdError::SingularSystem);
        }
        if pivot_row != col {
            for k in 0..n {
                work.swap([pivot_row, k], [col, k]);
                inv.swap([pivot_row, k], [col, k]);
            }
        }
        for k in 0..n {
            work[[col, k]] /= pivot;
            inv[[col, k]] /= pivot;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = work[[row, col]];
            if factor == 0.0 {
                continue;
            }
            for k in 0..n {
                work[[row, k]] -= factor * work[[col, k]];
                inv[[row, k]] -= factor * inv[[col, k]];
            }
        }
    }
    Ok(inv)
}

/// Eigen-decomposition of a symmetric matrix by cyclic Jacobi rotations.
///
/// Returns (eigenvalues, eigenvectors as columns), unsorted.
pub fn symmetric_eigen(s: &Array2<f64>) -> (Array1<f64>, Array2<f64>) {
    let n = s.nrows();
    let mut a = s.clone();
    let mut v = Array2::<f64>::eye(n);

    for _ in 0..JACOBI_MAX_SWEEPS {
        let off: f64 = (0..n)
            .flat_map(|p| ((p + 1)..n).map(move |q| (p, q)))
            .map(|(p, q)| a[[p, q]] * a[[p, q]])
            .sum();
        let diag: f64 = (0..n).map(|i| a[[i, i]] * a[[i, i]]).sum();
        if off <= 1e-30 * diag.max(f64::MIN_POSITIVE) {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq.abs() < 1e-300 {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let sign = if theta >= 0.0 { 1.0 } else { -1.0 };
                let t = sign / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let sn = t * c;

                // A <- J^T A J, V <- V J
                for k in 0..n {
                    let (akp, akq) = (a[[k, p]], a[[k, q]]);
                    a[[k, p]] = c * akp - sn * akq;
                    a[[k, q]] = sn * akp + c * akq;
                }
                for k in 0..n {
                    let (apk, aqk) = (a[[p, k]], a[[q, k]]);
                    a[[p, k]] = c * apk - sn * aqk;
                    a[[q, k]] = sn * apk + c * aqk;
                }
                for k in 0..n {
                    let (vkp, vkq) = (v[[k, p]], v[[k, q]]);
                    v[[k, p]] = c * vkp - sn * vkq;
                    v[[k, q]] = sn * vkp + c * vkq;
                }
            }
        }
    }

    (a.diag().to_owned(), v)
}

/// Moore-Penrose pseudoinverse through the eigen-decomposition of AᵀA.
///
/// Eigenvalues below `rcond² * max eigenvalue` are treated as zero, which
/// gives the minimum-norm solution for rank-deficient systems.
pub fn pinv(a: &Array2<f64>, rcond: f64) -> Array2<f64> {
    let (m, n) = a.dim();
    if m == 0 || n == 0 {
        return Array2::zeros((n, m));
    }
    let ata = a.t().dot(a);
    let (values, vectors) = symmetric_eigen(&ata);
    let top = values.iter().fold(0.0_f64, |acc, v| acc.max(*v));
    let cutoff = rcond * rcond * top;

    let mut inner = Array2::<f64>::zeros((n, n));
    for (k, &lambda) in values.iter().enumerate() {
        if lambda <= cutoff || lambda <= 0.0 {
            continue;
        }
        let vk = vectors.column(k);
        for i in 0..n {
            for j in 0..n {
                inner[[i, j]] += vk[i] * vk[j] / lambda;
            }
        }
    }
    inner.dot(&a.t())
}

/// Least-squares solution of `a x = b`.
pub fn lstsq(a: &Array2<f64>, b: &Array1<f64>) -> RtdResult<Array1<f64>> {
    if a.nrows() != b.len() {
        return Err(RtdError::InvalidInput(format!(
            "lstsq: {} equations but {} right-hand values",
            a.nrows(),
            b.len()
        )));
    }
    Ok(pinv(a, 1e-12).dot(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn assert_close(a: &Array2<f64>, b: &Array2<f64>, tol: f64) {
        assert_eq!(a.dim(), b.dim());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < tol, "{x} vs {y}");
        }
    }

    #[test]
    fn test_invert_identity_product() {
        let a = array![[4.0, -1.0, 0.5], [-1.0, 3.0, 0.0], [0.5, 0.0, 2.0]];
        let inv = invert(&a).unwrap();
        assert_close(&a.dot(&inv), &Array2::eye(3), 1e-12);
    }

    #[test]
    fn test_invert_needs_pivoting() {
        let a = array![[0.0, 1.0], [1.0, 0.0]];
        let inv = invert(&a).unwrap();
        assert_close(&inv, &a, 1e-15);
    }

    #[test]
    fn test_invert_singular() {
        let a = array![[1.0, 2.0], [2.0, 4.0]];
        assert!(matches!(invert(&a), Err(RtdError::SingularSystem)));
        assert!(matches!(
            invert(&Array2::zeros((3, 3))),
            Err(RtdError::SingularSystem)
        ));
    }

    #[test]
    fn test_symmetric_eigen_reconstructs() {
        let s = array![[2.0, 1.0, 0.0], [1.0, 2.0, 1.0], [0.0, 1.0, 2.0]];
        let (values, vectors) = symmetric_eigen(&s);
        let rebuilt = vectors.dot(&Array2::from_diag(&values)).dot(&vectors.t());
        assert_close(&rebuilt, &s, 1e-10);
    }

    #[test]
    fn test_pinv_of_full_rank_square_is_inverse() {
        let a = array![[3.0, 1.0], [1.0, 2.0]];
        assert_close(&pinv(&a, 1e-12), &invert(&a).unwrap(), 1e-10);
    }

    #[test]
    fn test_lstsq_overdetermined() {
        // pair sums of three unknowns
        let a = array![[1.0, 1.0, 0.0], [1.0, 0.0, 1.0], [0.0, 1.0, 1.0], [1.0, 1.0, 1.0]];
        let truth = array![1.0, 2.0, 3.0];
        let b = a.dot(&truth);
        let x = lstsq(&a, &b).unwrap();
        for (xi, ti) in x.iter().zip(truth.iter()) {
            assert!((xi - ti).abs() < 1e-8);
        }
    }

    #[test]
    fn test_lstsq_rank_deficient_min_norm() {
        let a = array![[1.0, 1.0], [1.0, 1.0]];
        let x = lstsq(&a, &array![2.0, 2.0]).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-10);
        assert!((x[1] - 1.0).abs() < 1e-10);
    }
}
