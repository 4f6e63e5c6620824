//! thin façade over nalgebra for the dense operations the plant and the
//! LP builder need. everything is f64 and dynamically sized.

pub type Matrix = nalgebra::DMatrix<f64>;
pub type Vector = nalgebra::DVector<f64>;

/// V · diag(d) · V⁻¹ where V is unit upper triangular. this is how the
/// continuous A and every function of its eigenvalues are reconstructed
/// from the eigendecomposition.
pub fn conjugate_by_eigenbasis(v: &Matrix, diag: &Vector) -> Matrix {
    div_right_unit_upper(&(v * Matrix::from_diagonal(diag)), v)
}

/// solve X · V = M for X, with V unit upper triangular. transposing
/// turns the right division into a lower triangular solve.
pub fn div_right_unit_upper(m: &Matrix, v: &Matrix) -> Matrix {
    v.transpose()
        .solve_lower_triangular(&m.transpose())
        .expect("unit triangular systems are always solvable")
        .transpose()
}

/// row-major pretty printer. the nalgebra Display impl does not line up
/// columns, which makes traces unreadable.
pub fn pretty(m: &Matrix, width: usize, precision: usize) -> String {
    (0..m.nrows())
        .map(|i| {
            (0..m.ncols())
                .map(|j| format!(" {:>w$.p$}", m[(i, j)], w = width, p = precision))
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// single-row variant of [pretty]
pub fn pretty_vec(v: &Vector, width: usize, precision: usize) -> String {
    v.iter()
        .map(|x| format!(" {:>w$.p$}", x, w = width, p = precision))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conjugation_reconstructs_diagonalizable_matrix() {
        let v = Matrix::from_row_slice(2, 2, &[1., 2., 0., 1.]);
        let d = Vector::from_row_slice(&[1., 3.]);
        let a = conjugate_by_eigenbasis(&v, &d);
        let expected = Matrix::from_row_slice(2, 2, &[1., 4., 0., 3.]);
        assert!((a - expected).norm() < 1e-12);
    }

    #[test]
    fn conjugation_by_identity_is_diagonal() {
        let v = Matrix::identity(3, 3);
        let d = Vector::from_row_slice(&[-1., 0., 2.]);
        let a = conjugate_by_eigenbasis(&v, &d);
        assert!((a - Matrix::from_diagonal(&d)).norm() < 1e-15);
    }

    #[test]
    fn right_division_inverts_multiplication() {
        let v = Matrix::from_row_slice(3, 3, &[1., 2., -1., 0., 1., 4., 0., 0., 1.]);
        let m = Matrix::from_row_slice(3, 3, &[3., 1., 0., -2., 5., 1., 0., 0., 7.]);
        let x = div_right_unit_upper(&m, &v);
        assert!((x * v - m).norm() < 1e-12);
    }
}
