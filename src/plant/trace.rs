//! recorded state/input evolution of a plant under some control law.
//! the control law is a capability object driven synchronously per step,
//! so the same driver runs an in-process solver, the shared-memory
//! rendezvous, or nothing at all (free evolution).

use super::Plant;
use crate::Secs;
use crate::Steps;
use crate::linalg::Matrix;
use crate::linalg::Vector;
use crate::lp::SolStatus;
use std::time::Instant;

/// control law invoked once per step. implementations write the input
/// for step k into column k of the trace; the driver owns everything
/// else.
pub trait Controller {
    fn compute(&mut self, k: usize, trace: &mut Trace) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct Trace {
    /// states x(0)..x(H), one per column
    pub x: Matrix,
    /// inputs u(0)..u(H-1), one per column
    pub u: Matrix,
    /// wall time spent computing each input
    pub time: Vec<Secs>,
    /// simplex iterations consumed per step, when the law reports them
    pub steps: Vec<Steps>,
    /// primal/dual status pairs per step, when the law reports them
    pub opt: Vec<(SolStatus, SolStatus)>,
}

impl Trace {
    pub fn new(n: usize, m: usize, horizon: usize) -> Self {
        Self {
            x: Matrix::zeros(n, horizon + 1),
            u: Matrix::zeros(m, horizon),
            time: vec![0.; horizon],
            steps: vec![0; horizon],
            opt: vec![(SolStatus::Undefined, SolStatus::Undefined); horizon],
        }
    }

    pub fn horizon(&self) -> usize {
        self.u.ncols()
    }

    pub fn state(&self, k: usize) -> Vector {
        self.x.column(k).into_owned()
    }

    pub fn input(&self, k: usize) -> Vector {
        self.u.column(k).into_owned()
    }
}

impl Plant {
    /// simulate the closed loop for trace.horizon() steps starting from
    /// x0. with no controller the input is identically zero.
    pub fn run_closed_loop(
        &self,
        x0: &Vector,
        mut controller: Option<&mut dyn Controller>,
        trace: &mut Trace,
    ) -> anyhow::Result<()> {
        trace.x.set_column(0, x0);
        for k in 0..trace.horizon() {
            if let Some(law) = controller.as_deref_mut() {
                let tic = Instant::now();
                law.compute(k, trace)?;
                trace.time[k] += tic.elapsed().as_secs_f64();
            }
            let next = self.ad(0) * trace.state(k) + self.abd(0) * trace.input(k);
            trace.x.set_column(k + 1, &next);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;

    fn plant() -> Plant {
        let config: ModelConfig = serde_json::from_value(serde_json::json!({
            "state_num": 2,
            "input_num": 1,
            "len_horizon": 5,
            "len_ctrl": 1,
            "state_Ad": [0.9, 0.1, 0.0, 0.8],
            "input_Bd": [0.0, 1.0],
            "input_bounds": [[-1.0, 1.0]],
            "state_weight": [1.0, 1.0],
            "cost_model": { "type": "min_steps_to_zero", "coef": 1.0 }
        }))
        .unwrap();
        Plant::from_config(&config)
    }

    struct Constant(f64);
    impl Controller for Constant {
        fn compute(&mut self, k: usize, trace: &mut Trace) -> anyhow::Result<()> {
            trace.u[(0, k)] = self.0;
            Ok(())
        }
    }

    #[test]
    fn free_evolution_matches_power_cache() {
        let plant = plant();
        let x0 = Vector::from_row_slice(&[1., -2.]);
        let mut trace = Trace::new(2, 1, 5);
        plant.run_closed_loop(&x0, None, &mut trace).unwrap();
        for k in 1..=5 {
            let expected = plant.ad(k - 1) * &x0;
            assert!((trace.state(k) - expected).norm() < 1e-12, "k={}", k);
        }
    }

    #[test]
    fn forced_evolution_follows_recurrence() {
        let plant = plant();
        let x0 = Vector::from_row_slice(&[0., 0.]);
        let mut trace = Trace::new(2, 1, 4);
        plant
            .run_closed_loop(&x0, Some(&mut Constant(0.5)), &mut trace)
            .unwrap();
        for k in 0..4 {
            let expected = plant.ad(0) * trace.state(k) + plant.abd(0) * trace.input(k);
            assert!((trace.state(k + 1) - expected).norm() < 1e-12);
        }
    }
}
