//! linear time-invariant plant. the continuous form is optional and only
//! reachable through its eigendecomposition; the discrete form, with the
//! power caches the LP builder consumes, is what the runtime needs.

use crate::config::ModelConfig;
use crate::linalg;
use crate::linalg::Matrix;
use crate::linalg::Vector;

/// eigendecomposition A = V·diag(values)·V⁻¹ with V unit upper triangular
#[derive(Debug, Clone)]
struct Eigen {
    values: Vector,
    basis: Matrix,
}

#[derive(Debug, Clone)]
pub struct Plant {
    n: usize,
    m: usize,
    tau: f64,
    horizon: usize,
    eigen: Option<Eigen>,
    a: Option<Matrix>,
    b: Option<Matrix>,
    /// ad[k] = Ad^(k+1) for k in 0..H
    ad: Vec<Matrix>,
    /// abd[k] = Ad^k · Bd for k in 0..H
    abd: Vec<Matrix>,
}

impl Plant {
    /// continuous-time init from the eigendecomposition of A. the matrix
    /// A itself is reconstructed, not taken as input. discretization is
    /// a separate step.
    pub fn from_eigen(
        n: usize,
        m: usize,
        values: &[f64],
        basis: &[f64],
        b: &[f64],
    ) -> anyhow::Result<Self> {
        if values.len() != n {
            anyhow::bail!("expected {} eigenvalues, got {}", n, values.len());
        }
        if basis.len() != n * n {
            anyhow::bail!("expected {}x{} eigenbasis, got {} elements", n, n, basis.len());
        }
        if b.len() != n * m {
            anyhow::bail!("expected {}x{} input matrix, got {} elements", n, m, b.len());
        }
        let values = Vector::from_row_slice(values);
        let basis = Matrix::from_row_slice(n, n, basis);
        let a = linalg::conjugate_by_eigenbasis(&basis, &values);
        Ok(Self {
            n,
            m,
            tau: f64::NAN,
            horizon: 0,
            eigen: Some(Eigen { values, basis }),
            a: Some(a),
            b: Some(Matrix::from_row_slice(n, m, b)),
            ad: vec![],
            abd: vec![],
        })
    }

    /// discrete-time init straight from the JSON model. the continuous
    /// form stays empty; only the power caches are rebuilt.
    pub fn from_config(config: &ModelConfig) -> Self {
        let (n, m) = (config.state_num, config.input_num);
        let mut plant = Self {
            n,
            m,
            tau: f64::NAN,
            horizon: config.len_horizon,
            eigen: None,
            a: None,
            b: None,
            ad: vec![Matrix::from_row_slice(n, n, &config.state_ad)],
            abd: vec![Matrix::from_row_slice(n, m, &config.input_bd)],
        };
        plant.cache_powers();
        plant
    }

    /// discretize by the sampling interval tau over a horizon of H
    /// intervals: Ad = e^(A·tau) and Bd = (∫ e^(A·(tau−s)) ds)·B, both
    /// computed in the eigenbasis. eigenvalues close to zero integrate
    /// the constant 1 over [0, tau].
    ///
    /// Bd computed this way differs by ~1e-4 from alternative solvers
    /// when an eigenvalue sits near zero. observed, not retried.
    pub fn discretize(&mut self, tau: f64, horizon: usize) -> anyhow::Result<()> {
        let eigen = self
            .eigen
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("discretization needs the eigendecomposition"))?;
        let exp = eigen.values.map(|l| (tau * l).exp());
        let int = eigen.values.map(|l| match l.abs() < crate::EIGEN_ZERO_TOL {
            true => tau,
            false => (tau * l).exp_m1() / l,
        });
        let ad = linalg::conjugate_by_eigenbasis(&eigen.basis, &exp);
        let bd = linalg::conjugate_by_eigenbasis(&eigen.basis, &int)
            * self.b.as_ref().expect("continuous B set together with eigen");
        self.tau = tau;
        self.horizon = horizon;
        self.ad = vec![ad];
        self.abd = vec![bd];
        self.cache_powers();
        Ok(())
    }

    /// ad[k] = Ad·ad[k−1] and abd[k] = Ad·abd[k−1] for k = 1..H−1
    fn cache_powers(&mut self) {
        for k in 1..self.horizon {
            let ad = &self.ad[0] * &self.ad[k - 1];
            let abd = &self.ad[0] * &self.abd[k - 1];
            self.ad.push(ad);
            self.abd.push(abd);
        }
    }

    pub fn n(&self) -> usize {
        self.n
    }
    pub fn m(&self) -> usize {
        self.m
    }
    pub fn tau(&self) -> f64 {
        self.tau
    }
    pub fn horizon(&self) -> usize {
        self.horizon
    }
    /// Ad^(k+1), k in 0..H
    pub fn ad(&self, k: usize) -> &Matrix {
        &self.ad[k]
    }
    /// Ad^k · Bd, k in 0..H
    pub fn abd(&self, k: usize) -> &Matrix {
        &self.abd[k]
    }
    pub fn a(&self) -> Option<&Matrix> {
        self.a.as_ref()
    }
    pub fn b(&self) -> Option<&Matrix> {
        self.b.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(n: usize, m: usize, horizon: usize, ad: &[f64], bd: &[f64]) -> ModelConfig {
        serde_json::from_value(serde_json::json!({
            "state_num": n,
            "input_num": m,
            "len_horizon": horizon,
            "len_ctrl": 1,
            "state_Ad": ad,
            "input_Bd": bd,
            "input_bounds": vec![(Some(-1.0), Some(1.0)); m],
            "state_weight": vec![1.0; n],
            "cost_model": { "type": "min_steps_to_zero", "coef": 1.0 }
        }))
        .unwrap()
    }

    #[test]
    fn ad_cache_holds_matrix_powers() {
        let plant = Plant::from_config(&config(
            2,
            1,
            6,
            &[0.9, 0.1, -0.2, 0.8],
            &[0.0, 1.0],
        ));
        let mut power = plant.ad(0).clone();
        for k in 0..6 {
            assert!((plant.ad(k) - &power).norm() < 1e-10, "k={}", k);
            power = &power * plant.ad(0);
        }
    }

    #[test]
    fn abd_cache_follows_recurrence() {
        let plant = Plant::from_config(&config(
            2,
            2,
            5,
            &[0.5, 0.0, 0.3, 1.1],
            &[1.0, 0.0, 0.0, 1.0],
        ));
        for k in 1..5 {
            let expected = plant.ad(0) * plant.abd(k - 1);
            assert!((plant.abd(k) - expected).norm() < 1e-12);
        }
    }

    #[test]
    fn power_invariants_hold_for_random_plants() {
        use rand::Rng;
        use rand::SeedableRng;
        let mut rng = rand::rngs::SmallRng::seed_from_u64(0xC1A0);
        for _ in 0..8 {
            let n = rng.random_range(1..4);
            let m = rng.random_range(1..3);
            let ad: Vec<f64> = (0..n * n).map(|_| rng.random_range(-0.6..0.6)).collect();
            let bd: Vec<f64> = (0..n * m).map(|_| rng.random_range(-1.0..1.0)).collect();
            let plant = Plant::from_config(&config(n, m, 6, &ad, &bd));
            let mut power = plant.ad(0).clone();
            for k in 0..6 {
                assert!((plant.ad(k) - &power).norm() < 1e-10);
                power = &power * plant.ad(0);
            }
            for k in 1..6 {
                let expected = plant.ad(0) * plant.abd(k - 1);
                assert!((plant.abd(k) - expected).norm() < 1e-10);
            }
        }
    }

    #[test]
    fn eigen_init_reconstructs_a() {
        let plant = Plant::from_eigen(2, 1, &[1., 3.], &[1., 2., 0., 1.], &[0., 1.]).unwrap();
        let a = plant.a().unwrap();
        let expected = Matrix::from_row_slice(2, 2, &[1., 4., 0., 3.]);
        assert!((a - expected).norm() < 1e-12);
    }

    #[test]
    fn zero_eigenvalue_integrates_tau() {
        // a pure integrator: A = 0, B = 1, so Ad = 1 and Bd = tau
        let mut plant = Plant::from_eigen(1, 1, &[0.], &[1.], &[1.]).unwrap();
        plant.discretize(0.25, 4).unwrap();
        assert!((plant.ad(0)[(0, 0)] - 1.0).abs() < 1e-15);
        assert!((plant.abd(0)[(0, 0)] - 0.25).abs() < 1e-15);
    }

    #[test]
    fn tiny_eigenvalue_takes_the_integral_cutoff() {
        let mut plant = Plant::from_eigen(1, 1, &[1e-9], &[1.], &[1.]).unwrap();
        plant.discretize(0.1, 2).unwrap();
        assert!((plant.abd(0)[(0, 0)] - 0.1).abs() < 1e-9);
    }

    #[test]
    fn stable_mode_discretizes_exactly() {
        // scalar dx = -2x + u over tau: Ad = e^(-2 tau), Bd = (1 - e^(-2 tau)) / 2
        let tau = 0.3;
        let mut plant = Plant::from_eigen(1, 1, &[-2.], &[1.], &[1.]).unwrap();
        plant.discretize(tau, 3).unwrap();
        assert!((plant.ad(0)[(0, 0)] - (-2.0 * tau).exp()).abs() < 1e-14);
        assert!((plant.abd(0)[(0, 0)] - (1.0 - (-2.0 * tau).exp()) / 2.0).abs() < 1e-14);
    }

    #[test]
    fn wrong_eigen_shape_is_rejected() {
        assert!(Plant::from_eigen(2, 1, &[1.], &[1., 0., 0., 1.], &[0., 1.]).is_err());
    }
}
