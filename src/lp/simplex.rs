//! dense bounded-variable simplex over [problem::Problem]. the working
//! system is aux_i − Σ a_ij·x_j = 0 over all rows-then-columns
//! variables, so the basis always holds exactly n_rows variables. the
//! dual method warm-starts from whatever statuses the problem carries;
//! a dual-infeasible start is repaired by bound flips when the bounds
//! allow it and otherwise falls back to the two-phase primal method.
//!
//! the basis is refactorized on every iteration. problems here are a
//! few hundred variables at most and the robustness is worth more than
//! the flops.

use super::problem::Method;
use super::problem::Problem;
use super::problem::SimplexParams;
use super::problem::SolStatus;
use super::problem::Termination;
use super::problem::VarStatus;
use crate::linalg::Matrix;
use crate::linalg::Vector;
use std::time::Instant;

const PRIM_TOL: f64 = 1e-7;
const DUAL_TOL: f64 = 1e-9;
const PIVOT_TOL: f64 = 1e-9;
const RATIO_TIE: f64 = 1e-10;

type Factors = nalgebra::linalg::LU<f64, nalgebra::Dyn, nalgebra::Dyn>;

impl Problem {
    /// run the simplex method from the current basis under the given
    /// budgets. either budget running out stops the solver with the
    /// last basis intact; primal/dual statuses are refreshed on every
    /// exit path.
    pub fn solve(&mut self, params: &SimplexParams) -> Termination {
        let mut solver = Solver::new(self, params);
        let outcome = match params.method {
            Method::Primal => solver.primal(),
            Method::Dual => match solver.dual() {
                DualEnd::Done(end) => end,
                DualEnd::NeedPrimal => solver.primal(),
            },
        };
        solver.writeback(self, outcome);
        outcome
    }
}

enum DualEnd {
    Done(Termination),
    NeedPrimal,
}

/// what the primal ratio test decided
enum Ratio {
    Unbounded,
    Flip,
    Pivot(usize, VarStatus),
}

struct Solver {
    m: usize,
    total: usize,
    lo: Vec<f64>,
    up: Vec<f64>,
    cost: Vec<f64>,
    /// column of the working system per variable: identity for rows,
    /// negated coefficients for structural columns
    cols: Vec<Vec<(usize, f64)>>,
    status: Vec<VarStatus>,
    value: Vec<f64>,
    basis: Vec<usize>,
    spent: u64,
    limit_iters: u64,
    limit_time: f64,
    tic: Instant,
    verbose: bool,
}

impl Solver {
    fn new(p: &Problem, params: &SimplexParams) -> Self {
        let m = p.rows.len();
        let n = p.cols.len();
        let mut cols = vec![vec![]; m + n];
        for (i, _) in p.rows.iter().enumerate() {
            cols[i].push((i, 1.));
        }
        for (i, row) in p.mat.iter().enumerate() {
            for (j, a) in row.iter() {
                cols[m + j].push((i, -a));
            }
        }
        let mut solver = Self {
            m,
            total: m + n,
            lo: p
                .rows
                .iter()
                .chain(p.cols.iter())
                .map(|v| v.bounds.lo())
                .collect(),
            up: p
                .rows
                .iter()
                .chain(p.cols.iter())
                .map(|v| v.bounds.up())
                .collect(),
            cost: std::iter::repeat(0.)
                .take(m)
                .chain(p.obj.iter().copied())
                .collect(),
            cols,
            status: p
                .rows
                .iter()
                .chain(p.cols.iter())
                .map(|v| v.status)
                .collect(),
            value: vec![0.; m + n],
            basis: vec![],
            spent: 0,
            limit_iters: params.iter_limit.max(0) as u64,
            limit_time: params.time_limit,
            tic: Instant::now(),
            verbose: params.verbose,
        };
        solver.adopt_basis();
        solver
    }

    /// rebuild the basis list from statuses; an inconsistent count
    /// falls back to the standard basis of all auxiliary variables
    fn adopt_basis(&mut self) {
        self.basis = (0..self.total)
            .filter(|v| self.status[*v] == VarStatus::Basic)
            .collect();
        if self.basis.len() != self.m {
            self.standard_basis();
        }
    }

    fn standard_basis(&mut self) {
        for v in 0..self.total {
            self.status[v] = match v < self.m {
                true => VarStatus::Basic,
                false => self.resting(v),
            };
        }
        self.basis = (0..self.m).collect();
    }

    fn resting(&self, v: usize) -> VarStatus {
        match (self.lo[v].is_finite(), self.up[v].is_finite()) {
            (false, false) => VarStatus::Free,
            (true, false) => VarStatus::AtLower,
            (false, true) => VarStatus::AtUpper,
            (true, true) if self.lo[v] == self.up[v] => VarStatus::Fixed,
            (true, true) => VarStatus::AtLower,
        }
    }

    /// value a nonbasic variable rests at
    fn seat(&self, v: usize) -> f64 {
        match self.status[v] {
            VarStatus::AtLower | VarStatus::Fixed => self.lo[v],
            VarStatus::AtUpper => self.up[v],
            VarStatus::Free => 0.,
            VarStatus::Basic => unreachable!("basic variables have no seat"),
        }
    }

    fn out_of_budget(&self) -> Option<Termination> {
        if self.spent >= self.limit_iters {
            Some(Termination::IterLimit)
        } else if self.tic.elapsed().as_secs_f64() >= self.limit_time {
            Some(Termination::TimeLimit)
        } else {
            None
        }
    }

    /// LU factors of the basis matrix and of its transpose
    fn factor(&self) -> Option<(Factors, Factors)> {
        let mut b = Matrix::zeros(self.m, self.m);
        for (pos, v) in self.basis.iter().enumerate() {
            for (i, a) in self.cols[*v].iter() {
                b[(*i, pos)] = *a;
            }
        }
        let bt = b.transpose();
        let lu = b.lu();
        let lut = bt.lu();
        match lu.is_invertible() && lut.is_invertible() {
            true => Some((lu, lut)),
            false => None,
        }
    }

    /// recompute every variable's value at the current basis
    fn refresh(&mut self, lu: &Factors) -> bool {
        let mut rhs = Vector::zeros(self.m);
        for v in 0..self.total {
            if self.status[v] != VarStatus::Basic {
                let x = self.seat(v);
                self.value[v] = x;
                if x != 0. {
                    for (i, a) in self.cols[v].iter() {
                        rhs[*i] -= a * x;
                    }
                }
            }
        }
        match lu.solve(&rhs) {
            Some(xb) => {
                for (pos, v) in self.basis.iter().enumerate() {
                    self.value[*v] = xb[pos];
                }
                true
            }
            None => false,
        }
    }

    /// simplex multipliers for an arbitrary cost vector
    fn duals(&self, lut: &Factors, cost: &[f64]) -> Option<Vector> {
        let mut cb = Vector::zeros(self.m);
        for (pos, v) in self.basis.iter().enumerate() {
            cb[pos] = cost[*v];
        }
        lut.solve(&cb)
    }

    fn reduced(&self, y: &Vector, v: usize, cost: &[f64]) -> f64 {
        cost[v]
            - self.cols[v]
                .iter()
                .map(|(i, a)| y[*i] * a)
                .sum::<f64>()
    }

    /// B⁻¹ · (column of the entering variable)
    fn pivot_column(&self, lu: &Factors, v: usize) -> Vector {
        let mut a = Vector::zeros(self.m);
        for (i, coef) in self.cols[v].iter() {
            a[*i] = *coef;
        }
        lu.solve(&a).expect("factorized basis solves")
    }

    /// per-basis-position infeasibility sign at the current values
    fn infeasibility(&self) -> Vec<i8> {
        self.basis
            .iter()
            .map(|v| {
                if self.value[*v] < self.lo[*v] - PRIM_TOL {
                    -1
                } else if self.value[*v] > self.up[*v] + PRIM_TOL {
                    1
                } else {
                    0
                }
            })
            .collect()
    }

    /// Bland entering rule: first nonbasic variable whose reduced cost
    /// pays off in its admissible direction
    fn price(&self, y: &Vector, cost: &[f64]) -> Option<(usize, f64)> {
        for v in 0..self.total {
            let d = match self.status[v] {
                VarStatus::Basic | VarStatus::Fixed => continue,
                _ => self.reduced(y, v, cost),
            };
            match self.status[v] {
                VarStatus::AtLower if d < -DUAL_TOL => return Some((v, 1.)),
                VarStatus::AtUpper if d > DUAL_TOL => return Some((v, -1.)),
                VarStatus::Free if d < -DUAL_TOL => return Some((v, 1.)),
                VarStatus::Free if d > DUAL_TOL => return Some((v, -1.)),
                _ => continue,
            }
        }
        None
    }

    /// primal ratio test. infeasible basics block only at the bound
    /// they are converging to; feasible basics block at the bound they
    /// would leave through; the entering variable may flip to its own
    /// opposite bound first.
    fn ratio_primal(&self, e: usize, dir: f64, w: &Vector, sigma: &[i8]) -> Ratio {
        let own = self.up[e] - self.lo[e];
        let mut best = f64::INFINITY;
        let mut leave = usize::MAX;
        let mut choice = None;
        for (pos, v) in self.basis.iter().enumerate() {
            let delta = -w[pos] * dir;
            let cap = if delta > PIVOT_TOL {
                match sigma[pos] {
                    -1 => self.lo[*v],
                    0 => self.up[*v],
                    _ => f64::INFINITY,
                }
            } else if delta < -PIVOT_TOL {
                match sigma[pos] {
                    1 => self.up[*v],
                    0 => self.lo[*v],
                    _ => f64::NEG_INFINITY,
                }
            } else {
                continue;
            };
            if !cap.is_finite() {
                continue;
            }
            let t = ((cap - self.value[*v]) / delta).max(0.);
            if t < best - RATIO_TIE || (t < best + RATIO_TIE && *v < leave) {
                best = t;
                leave = *v;
                let fixed = self.lo[*v] == self.up[*v];
                choice = Some((
                    pos,
                    if fixed {
                        VarStatus::Fixed
                    } else if cap == self.lo[*v] {
                        VarStatus::AtLower
                    } else {
                        VarStatus::AtUpper
                    },
                ));
            }
        }
        if best.is_infinite() && own.is_infinite() {
            Ratio::Unbounded
        } else if own <= best {
            Ratio::Flip
        } else {
            match choice {
                Some((pos, hit)) => Ratio::Pivot(pos, hit),
                None => Ratio::Unbounded,
            }
        }
    }

    /// two-phase primal method. phase one drives the summed bound
    /// violation of the basics to zero with a cost recomputed every
    /// iteration; phase two is the ordinary minimization.
    fn primal(&mut self) -> Termination {
        loop {
            if let Some(end) = self.out_of_budget() {
                return end;
            }
            let Some((lu, lut)) = self.factor() else {
                self.standard_basis();
                continue;
            };
            if !self.refresh(&lu) {
                self.standard_basis();
                continue;
            }
            let sigma = self.infeasibility();
            let feasible = sigma.iter().all(|s| *s == 0);
            let cost = match feasible {
                true => self.cost.clone(),
                false => {
                    let mut c = vec![0.; self.total];
                    for (pos, v) in self.basis.iter().enumerate() {
                        c[*v] = sigma[pos] as f64;
                    }
                    c
                }
            };
            let Some(y) = self.duals(&lut, &cost) else {
                self.standard_basis();
                continue;
            };
            let Some((e, dir)) = self.price(&y, &cost) else {
                return match feasible {
                    true => Termination::Converged,
                    false => Termination::Infeasible,
                };
            };
            let w = self.pivot_column(&lu, e);
            match self.ratio_primal(e, dir, &w, &sigma) {
                Ratio::Unbounded => return Termination::Unbounded,
                Ratio::Flip => {
                    self.status[e] = match self.status[e] {
                        VarStatus::AtLower => VarStatus::AtUpper,
                        _ => VarStatus::AtLower,
                    };
                }
                Ratio::Pivot(pos, hit) => {
                    if self.verbose {
                        log::debug!("primal pivot: {} in, {} out", e, self.basis[pos]);
                    }
                    self.status[self.basis[pos]] = hit;
                    self.status[e] = VarStatus::Basic;
                    self.basis[pos] = e;
                }
            }
            self.spent += 1;
        }
    }

    /// dual method from the current basis. bound flips repair a dual
    /// infeasible start where the bounds allow; a free nonbasic with a
    /// nonzero reduced cost cannot be repaired and defers to primal.
    fn dual(&mut self) -> DualEnd {
        loop {
            if let Some(end) = self.out_of_budget() {
                return DualEnd::Done(end);
            }
            let Some((lu, lut)) = self.factor() else {
                self.standard_basis();
                continue;
            };
            if !self.refresh(&lu) {
                self.standard_basis();
                continue;
            }
            let cost = self.cost.clone();
            let Some(y) = self.duals(&lut, &cost) else {
                self.standard_basis();
                continue;
            };
            let mut flipped = false;
            for v in 0..self.total {
                let d = match self.status[v] {
                    VarStatus::Basic | VarStatus::Fixed => continue,
                    _ => self.reduced(&y, v, &cost),
                };
                match self.status[v] {
                    VarStatus::AtLower if d < -DUAL_TOL => match self.up[v].is_finite() {
                        true => {
                            self.status[v] = VarStatus::AtUpper;
                            flipped = true;
                        }
                        false => return DualEnd::NeedPrimal,
                    },
                    VarStatus::AtUpper if d > DUAL_TOL => match self.lo[v].is_finite() {
                        true => {
                            self.status[v] = VarStatus::AtLower;
                            flipped = true;
                        }
                        false => return DualEnd::NeedPrimal,
                    },
                    VarStatus::Free if d.abs() > DUAL_TOL => return DualEnd::NeedPrimal,
                    _ => continue,
                }
            }
            if flipped {
                continue;
            }
            // leaving: Bland on the most senior violated basic
            let mut leave = None;
            for (pos, v) in self.basis.iter().enumerate() {
                let below = self.value[*v] < self.lo[*v] - PRIM_TOL;
                let above = self.value[*v] > self.up[*v] + PRIM_TOL;
                if (below || above) && leave.map(|(_, l, _)| *v < l).unwrap_or(true) {
                    leave = Some((pos, *v, below));
                }
            }
            let Some((pos, vr, below)) = leave else {
                return DualEnd::Done(Termination::Converged);
            };
            let mut er = Vector::zeros(self.m);
            er[pos] = 1.;
            let rho = lut.solve(&er).expect("factorized basis solves");
            let mut best = f64::INFINITY;
            let mut enter = None;
            for v in 0..self.total {
                match self.status[v] {
                    VarStatus::Basic | VarStatus::Fixed => continue,
                    _ => {}
                }
                let alpha = self.cols[v]
                    .iter()
                    .map(|(i, a)| rho[*i] * a)
                    .sum::<f64>();
                if alpha.abs() <= PIVOT_TOL {
                    continue;
                }
                let admissible = match (below, self.status[v]) {
                    (true, VarStatus::AtLower) => alpha < 0.,
                    (true, VarStatus::AtUpper) => alpha > 0.,
                    (false, VarStatus::AtLower) => alpha > 0.,
                    (false, VarStatus::AtUpper) => alpha < 0.,
                    (_, VarStatus::Free) => true,
                    _ => false,
                };
                if !admissible {
                    continue;
                }
                let ratio = (self.reduced(&y, v, &cost) / alpha).abs();
                if ratio < best - RATIO_TIE
                    || (ratio < best + RATIO_TIE && enter.map(|e| v < e).unwrap_or(true))
                {
                    best = ratio;
                    enter = Some(v);
                }
            }
            let Some(e) = enter else {
                return DualEnd::Done(Termination::Infeasible);
            };
            if self.verbose {
                log::debug!("dual pivot: {} in, {} out", e, vr);
            }
            let fixed = self.lo[vr] == self.up[vr];
            self.status[vr] = if fixed {
                VarStatus::Fixed
            } else if below {
                VarStatus::AtLower
            } else {
                VarStatus::AtUpper
            };
            self.status[e] = VarStatus::Basic;
            self.basis[pos] = e;
            self.spent += 1;
        }
    }

    /// push statuses, values, solution statuses, and the iteration
    /// count back into the problem
    fn writeback(&mut self, p: &mut Problem, outcome: Termination) {
        let mut dual_ok = false;
        if let Some((lu, lut)) = self.factor() {
            if self.refresh(&lu) {
                if let Some(y) = self.duals(&lut, &self.cost.clone()) {
                    dual_ok = (0..self.total).all(|v| {
                        let d = self.reduced(&y, v, &self.cost);
                        match self.status[v] {
                            VarStatus::Basic | VarStatus::Fixed => true,
                            VarStatus::AtLower => d >= -DUAL_TOL,
                            VarStatus::AtUpper => d <= DUAL_TOL,
                            VarStatus::Free => d.abs() <= DUAL_TOL,
                        }
                    });
                }
            }
        }
        let prim_ok = (0..self.total).all(|v| {
            self.value[v] >= self.lo[v] - PRIM_TOL && self.value[v] <= self.up[v] + PRIM_TOL
        });
        p.prim_stat = match (outcome, prim_ok) {
            (Termination::Infeasible, _) => SolStatus::NoFeasible,
            (_, true) => SolStatus::Feasible,
            (_, false) => SolStatus::Infeasible,
        };
        p.dual_stat = match (outcome, dual_ok) {
            (Termination::Unbounded, _) => SolStatus::NoFeasible,
            (_, true) => SolStatus::Feasible,
            (_, false) => SolStatus::Infeasible,
        };
        for (i, row) in p.rows.iter_mut().enumerate() {
            row.status = self.status[i];
            row.prim = self.value[i];
        }
        for (j, col) in p.cols.iter_mut().enumerate() {
            col.status = self.status[self.m + j];
            col.prim = self.value[self.m + j];
        }
        p.it_cnt += self.spent;
    }
}
