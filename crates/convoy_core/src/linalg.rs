//! Dense linear algebra for small systems.
//!
//! Matrices are row-major `Vec<Vec<f64>>`; a Jacobian has one row per
//! function value and one column per parameter.

use crate::error::OptimError;

/// Dense row-major matrix.
pub type Matrix = Vec<Vec<f64>>;

/// Euclidean norm.
pub fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Dot product.
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `JᵀJ` and `Jᵀr` for a `m x n` matrix `j` and length-`m` vector `r`.
#[allow(clippy::needless_range_loop)]
pub fn normal_equations(j: &[Vec<f64>], r: &[f64]) -> (Matrix, Vec<f64>) {
    let n = j.first().map_or(0, |row| row.len());
    let mut jtj = vec![vec![0.0; n]; n];
    let mut jtr = vec![0.0; n];

    for (row, ri) in j.iter().zip(r) {
        for a in 0..n {
            jtr[a] += row[a] * ri;
            for b in a..n {
                jtj[a][b] += row[a] * row[b];
            }
        }
    }
    for a in 0..n {
        for b in 0..a {
            jtj[a][b] = jtj[b][a];
        }
    }
    (jtj, jtr)
}

/// Linear system solver (Gaussian elimination with partial pivoting).
pub fn solve_linear_system(a: &[Vec<f64>], b: &[f64]) -> Result<Vec<f64>, OptimError> {
    let n = b.len();
    if a.len() != n || a.iter().any(|row| row.len() != n) {
        return Err(OptimError::InvalidProblem(
            "Matrix dimension mismatch".to_string(),
        ));
    }

    // Augmented matrix
    let mut aug: Matrix = a
        .iter()
        .zip(b.iter())
        .map(|(row, bi)| {
            let mut new_row = row.clone();
            new_row.push(*bi);
            new_row
        })
        .collect();

    // Forward elimination with partial pivoting
    for i in 0..n {
        let mut max_row = i;
        for k in (i + 1)..n {
            if aug[k][i].abs() > aug[max_row][i].abs() {
                max_row = k;
            }
        }
        aug.swap(i, max_row);

        if aug[i][i].abs() < 1e-300 || !aug[i][i].is_finite() {
            return Err(OptimError::SingularMatrix);
        }

        for k in (i + 1)..n {
            let factor = aug[k][i] / aug[i][i];
            for j in i..=n {
                aug[k][j] -= factor * aug[i][j];
            }
        }
    }

    // Back substitution
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        x[i] = aug[i][n];
        for j in (i + 1)..n {
            x[i] -= aug[i][j] * x[j];
        }
        x[i] /= aug[i][i];
    }

    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_linear_system() {
        // Solve 2x + y = 5, x + 3y = 5 => x = 2, y = 1
        let a = vec![vec![2.0, 1.0], vec![1.0, 3.0]];
        let b = vec![5.0, 5.0];
        let x = solve_linear_system(&a, &b).unwrap();
        assert_relative_eq!(x[0], 2.0, epsilon = 1e-10);
        assert_relative_eq!(x[1], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_singular_system() {
        let a = vec![vec![1.0, 2.0], vec![2.0, 4.0]];
        assert_eq!(
            solve_linear_system(&a, &[1.0, 2.0]),
            Err(OptimError::SingularMatrix)
        );
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = vec![vec![1.0, 2.0]];
        assert!(solve_linear_system(&a, &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_normal_equations() {
        // J = [[1, 2], [3, 4], [5, 6]], r = [1, 1, 1]
        let j = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]];
        let (jtj, jtr) = normal_equations(&j, &[1.0, 1.0, 1.0]);
        assert_eq!(jtj, vec![vec![35.0, 44.0], vec![44.0, 56.0]]);
        assert_eq!(jtr, vec![9.0, 12.0]);
    }

    #[test]
    fn test_norm_and_dot() {
        assert_relative_eq!(norm(&[3.0, 4.0]), 5.0);
        assert_relative_eq!(dot(&[1.0, 2.0], &[3.0, 4.0]), 11.0);
    }
}
