//! formulation of the receding-horizon control problem as an LP, and
//! the driver that re-solves it every tick.
//!
//! decision variables, in column order:
//!   - inputs U_j(i) for i in 0..=p, where p is the control horizon.
//!     the first p vectors are free; the last one, written U_j[XX], is
//!     held from step p through H-1.
//!   - per step i in 1..=H one auxiliary Z_i bounding the weighted
//!     infinity norm of the state X(i).
//!   - optionally |U_j(i)| auxiliaries when the cost penalizes inputs.
//!
//! the rows tie Z_i to the forced response of the plant; their right
//! hand sides carry the free response −Ad^i·x0 and are the only part of
//! the LP that changes between ticks, which is what keeps the simplex
//! basis warm.

use crate::Secs;
use crate::Steps;
use crate::config::CostModel;
use crate::config::ModelConfig;
use crate::linalg::Matrix;
use crate::linalg::Vector;
use crate::lp::Bounds;
use crate::lp::Problem;
use crate::lp::SimplexParams;
use crate::lp::Termination;
use crate::plant::Plant;

pub struct MpcProblem {
    plant: Plant,
    x0: Vector,
    /// state box sides, ±inf where a side is absent
    state_box: Option<(Vector, Vector)>,
    /// per-state norm weights, zero disables the component
    weight: Vector,
    /// per-input max rate, negative means unconstrained
    max_rate: Option<Vec<f64>>,
    /// control horizon p <= H
    h_ctrl: usize,
    lp: Problem,
    params: SimplexParams,
    v_u: usize,
    v_ninf: usize,
    v_abs: Option<usize>,
    id_norm: usize,
    id_abs: Option<usize>,
    id_delta: Option<usize>,
    id_state_bnds: Option<usize>,
}

impl MpcProblem {
    /// build the whole LP from the JSON model and warm the solver up on
    /// the zero state so the first tick starts from a dual feasible
    /// basis
    pub fn new(config: &ModelConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let plant = Plant::from_config(config);
        let p = config.len_ctrl;
        let (n, m) = (plant.n(), plant.m());
        let mut lp = Problem::new("model predictive control");
        let v_u = add_input_vars(&mut lp, m, p);
        set_input_bounds(&mut lp, v_u, m, p, &config.input_bounds);
        let max_rate = config.rates();
        let id_delta = max_rate
            .as_ref()
            .and_then(|rates| add_rate_rows(&mut lp, v_u, m, p, rates));
        let weight = Vector::from_vec(config.state_weight.clone());
        let (v_ninf, id_norm) = add_norm_block(&mut lp, &plant, v_u, p, &weight);
        let state_box = config.state_bounds.as_ref().map(|bounds| {
            (
                Vector::from_iterator(n, bounds.iter().map(|b| side(b.0, f64::NEG_INFINITY))),
                Vector::from_iterator(n, bounds.iter().map(|b| side(b.1, f64::INFINITY))),
            )
        });
        let id_state_bnds = match state_box.is_some() {
            true => Some(add_state_box(&mut lp, &plant, v_ninf, id_norm)),
            false => None,
        };
        let (v_abs, id_abs) = set_goal(&mut lp, &config.cost_model, v_u, v_ninf, m, p, plant.horizon());
        let mut mpc = Self {
            x0: Vector::zeros(n),
            state_box,
            weight,
            max_rate,
            h_ctrl: p,
            params: (&config.solver).into(),
            plant,
            lp,
            v_u,
            v_ninf,
            v_abs,
            id_norm,
            id_abs,
            id_delta,
            id_state_bnds,
        };
        mpc.warmup();
        Ok(mpc)
    }

    /// solve once from x0 = 0. the resulting basis is optimal, hence
    /// dual feasible, and stays dual feasible under every later x0
    /// refresh; that is the invariant the warm-start and offload paths
    /// rely on.
    pub fn warmup(&mut self) -> Termination {
        self.x0.fill(0.);
        self.update_x0();
        self.solve()
    }

    /// refresh every right hand side that depends on the initial state.
    /// no variables or rows are added or removed, so the basis remains
    /// valid.
    pub fn update_x0(&mut self) {
        let n = self.plant.n();
        let mut id_norm = self.id_norm;
        let mut id_box = self.id_state_bnds;
        for i in 1..=self.plant.horizon() {
            let y = self.plant.ad(i - 1) * &self.x0;
            for k in 0..n {
                let x_ik = y[k];
                if self.weight[k] > 0. {
                    self.lp.set_row_bounds(id_norm, Bounds::Upper(-x_ik));
                    self.lp.set_row_bounds(id_norm + 1, Bounds::Lower(-x_ik));
                } else {
                    // unweighted component: relax both rows instead of
                    // restructuring the problem
                    self.lp
                        .set_row_bounds(id_norm, Bounds::Upper(crate::NORM_RELAX_BOUND));
                    self.lp
                        .set_row_bounds(id_norm + 1, Bounds::Upper(crate::NORM_RELAX_BOUND));
                }
                id_norm += 2;
                if let Some(id) = id_box.as_mut() {
                    let (lo, up) = self.state_box.as_ref().expect("box rows imply box sides");
                    self.lp
                        .set_row_bounds(*id, Bounds::from_sides(Some(lo[k] - x_ik), Some(up[k] - x_ik)));
                    *id += 1;
                }
            }
        }
    }

    pub fn set_x0(&mut self, x0: &Vector) {
        self.x0.copy_from(x0);
        self.update_x0();
    }

    pub fn solve(&mut self) -> Termination {
        self.lp.solve(&self.params)
    }

    /// first control vector U(0), the one applied to the plant
    pub fn input(&self) -> Vector {
        Vector::from_iterator(
            self.plant.m(),
            (0..self.plant.m()).map(|j| self.lp.col_prim(self.v_u + j)),
        )
    }

    pub fn plant(&self) -> &Plant {
        &self.plant
    }

    pub fn x0(&self) -> &Vector {
        &self.x0
    }

    pub fn lp(&self) -> &Problem {
        &self.lp
    }

    pub(crate) fn lp_mut(&mut self) -> &mut Problem {
        &mut self.lp
    }

    pub fn params(&self) -> &SimplexParams {
        &self.params
    }

    pub(crate) fn set_budgets(&mut self, steps: Steps, time: Secs) {
        self.params.iter_limit = steps.max(0);
        self.params.time_limit = time.max(0.);
    }

    pub fn h_ctrl(&self) -> usize {
        self.h_ctrl
    }

    pub fn max_rate(&self) -> Option<&[f64]> {
        self.max_rate.as_deref()
    }

    pub fn v_u(&self) -> usize {
        self.v_u
    }

    pub fn v_ninf(&self) -> usize {
        self.v_ninf
    }

    pub fn id_norm(&self) -> usize {
        self.id_norm
    }

    pub fn id_state_bnds(&self) -> Option<usize> {
        self.id_state_bnds
    }

    pub fn id_delta(&self) -> Option<usize> {
        self.id_delta
    }

    pub fn v_abs(&self) -> Option<usize> {
        self.v_abs
    }

    pub fn id_abs(&self) -> Option<usize> {
        self.id_abs
    }
}

fn side(x: Option<f64>, missing: f64) -> f64 {
    match x {
        Some(x) if x.is_finite() => x,
        _ => missing,
    }
}

/// (p+1)·m input variables; the last vector U[XX] is the held one
fn add_input_vars(lp: &mut Problem, m: usize, p: usize) -> usize {
    let mut first = 0;
    for i in 0..=p {
        for j in 0..m {
            let id = lp.add_cols(1);
            if i == 0 && j == 0 {
                first = id;
            }
            match i < p {
                true => lp.set_col_name(id, &format!("U{}[{:02}]", j, i)),
                false => lp.set_col_name(id, &format!("U{}[XX]", j)),
            }
        }
    }
    first
}

/// the same box applies to every step of one input component
fn set_input_bounds(
    lp: &mut Problem,
    v_u: usize,
    m: usize,
    p: usize,
    bounds: &[(Option<f64>, Option<f64>)],
) {
    for i in 0..=p {
        for (j, (lo, up)) in bounds.iter().enumerate() {
            lp.set_col_bounds(v_u + i * m + j, Bounds::from_sides(*lo, *up));
        }
    }
}

/// rate rows −r_j ≤ U_j(i+1) − U_j(i) ≤ r_j linking successive free
/// inputs; components with a negative rate are unconstrained
fn add_rate_rows(lp: &mut Problem, v_u: usize, m: usize, p: usize, rates: &[f64]) -> Option<usize> {
    let mut first = None;
    for i in 0..p {
        for (j, r) in rates.iter().enumerate() {
            if *r < 0. {
                continue;
            }
            let id = lp.add_rows(1);
            first = first.or(Some(id));
            lp.set_row_name(id, &format!("U{}[{:02}] rate", j, i));
            lp.set_row_coefs(id, vec![(v_u + i * m + j, -1.), (v_u + (i + 1) * m + j, 1.)]);
            lp.set_row_bounds(id, Bounds::from_sides(Some(-r), Some(*r)));
        }
    }
    first
}

/// one Z_i per step plus a pair of rows per (step, component) tying Z_i
/// to the forced response. the linear operator from the stacked inputs
/// to X(i) is maintained incrementally: a new leading block Ad^(i−1)·Bd
/// appears while the trailing block accumulates once the control
/// horizon is exhausted and U(p) is held.
fn add_norm_block(
    lp: &mut Problem,
    plant: &Plant,
    v_u: usize,
    p: usize,
    weight: &Vector,
) -> (usize, usize) {
    let (n, m, h) = (plant.n(), plant.m(), plant.horizon());
    let mut ops: Vec<Matrix> = vec![];
    let mut v_ninf = 0;
    let mut id_norm = 0;
    for i in 1..=h {
        let z = lp.add_cols(1);
        if i == 1 {
            v_ninf = z;
            ops.push(plant.abd(0).clone());
        } else if i <= p + 1 {
            let head = plant.ad(0) * &ops[0];
            ops.insert(0, head);
        } else if p == 0 {
            ops[0] += plant.abd(i - 1);
        } else {
            let head = plant.ad(0) * &ops[0];
            let held = ops.pop().expect("p+1 blocks are live");
            let tail = ops.pop().expect("p >= 1 here") + held;
            ops.insert(0, head);
            ops.push(tail);
        }
        lp.set_col_name(z, &format!("|X({:02})|inf", i));
        lp.set_col_bounds(z, Bounds::Free);
        for k in 0..n {
            let mut coefs = vec![];
            for (block, op) in ops.iter().enumerate() {
                for j in 0..m {
                    coefs.push((v_u + block * m + j, op[(k, j)]));
                }
            }
            // the placeholder coefficient keeps the row shape stable
            // when the component carries no weight; the x0 refresh
            // relaxes such rows instead
            let zc = match weight[k] > 0. {
                true => -1.0 / weight[k],
                false => 1.0,
            };
            let up = lp.add_rows(1);
            if i == 1 && k == 0 {
                id_norm = up;
            }
            lp.set_row_name(up, &format!("X{}({:02}) ub", k, i));
            let mut row = coefs.clone();
            row.push((z, zc));
            lp.set_row_coefs(up, row);
            let lo = lp.add_rows(1);
            lp.set_row_name(lo, &format!("X{}({:02}) lb", k, i));
            coefs.push((z, -zc));
            lp.set_row_coefs(lo, coefs);
        }
    }
    (v_ninf, id_norm)
}

/// the state box reuses the norm-row coefficients with the Z column
/// stripped; the right hand sides come later from the x0 refresh
fn add_state_box(lp: &mut Problem, plant: &Plant, v_ninf: usize, id_norm: usize) -> usize {
    let (n, h) = (plant.n(), plant.horizon());
    let mut id = id_norm;
    let mut first = 0;
    for i in 1..=h {
        for k in 0..n {
            let z = v_ninf + i - 1;
            let coefs: Vec<_> = lp
                .row_coefs(id)
                .iter()
                .filter(|(j, _)| *j != z)
                .copied()
                .collect();
            id += 2;
            let row = lp.add_rows(1);
            if i == 1 && k == 0 {
                first = row;
            }
            lp.set_row_name(row, &format!("X{}({:02}) box", k, i));
            lp.set_row_coefs(row, coefs);
        }
    }
    first
}

/// |U_j(i)| auxiliaries bracketed by U−|U| ≤ 0 and U+|U| ≥ 0
fn add_abs_block(lp: &mut Problem, v_u: usize, m: usize, p: usize) -> (usize, usize) {
    let mut v_abs = 0;
    let mut id_abs = 0;
    for i in 0..=p {
        for j in 0..m {
            let v = lp.add_cols(1);
            let rows = lp.add_rows(2);
            if i == 0 && j == 0 {
                v_abs = v;
                id_abs = rows;
            }
            match i < p {
                true => lp.set_col_name(v, &format!("|U{}({:02})|", j, i)),
                false => lp.set_col_name(v, &format!("|U{}(XX)|", j)),
            }
            lp.set_col_bounds(v, Bounds::Free);
            let u = v_u + i * m + j;
            lp.set_row_name(rows, &format!("|U{}({:02})| ub", j, i));
            lp.set_row_coefs(rows, vec![(u, 1.), (v, -1.)]);
            lp.set_row_bounds(rows, Bounds::Upper(0.));
            lp.set_row_name(rows + 1, &format!("|U{}({:02})| lb", j, i));
            lp.set_row_coefs(rows + 1, vec![(u, 1.), (v, 1.)]);
            lp.set_row_bounds(rows + 1, Bounds::Lower(0.));
        }
    }
    (v_abs, id_abs)
}

/// exponentially growing weights on the state norms, plus L1 input
/// penalties under the richer cost shape
fn set_goal(
    lp: &mut Problem,
    cost: &CostModel,
    v_u: usize,
    v_ninf: usize,
    m: usize,
    p: usize,
    h: usize,
) -> (Option<usize>, Option<usize>) {
    let coef = match cost {
        CostModel::MinStepsToZero { coef } => *coef,
        CostModel::MinStateInputNorms { coef, .. } => *coef,
    };
    let mut cur = 1.;
    for i in 0..h {
        lp.set_obj(v_ninf + i, cur);
        cur *= coef;
    }
    match cost {
        CostModel::MinStepsToZero { .. } => (None, None),
        CostModel::MinStateInputNorms { input_weight, .. } => {
            let (v_abs, id_abs) = add_abs_block(lp, v_u, m, p);
            for (j, w) in input_weight.iter().enumerate() {
                for i in 0..=p {
                    lp.set_obj(v_abs + i * m + j, *w);
                }
            }
            (Some(v_abs), Some(id_abs))
        }
    }
}
