//! linear program over bounded variables. rows are auxiliary variables
//! carrying the constraint bounds, columns are the structural variables;
//! the simplex solver in this module's sibling works directly on this
//! representation and leaves its basis behind for warm restarts.

use crate::Secs;
use crate::Steps;
use serde::Deserialize;

/// bound kind of a row or column
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bounds {
    Free,
    Lower(f64),
    Upper(f64),
    Double(f64, f64),
    Fixed(f64),
}

impl Bounds {
    /// select the kind from optional sides; non-finite sides count as
    /// absent. equal sides collapse to a fixed variable.
    pub fn from_sides(lo: Option<f64>, up: Option<f64>) -> Self {
        let lo = lo.filter(|x| x.is_finite());
        let up = up.filter(|x| x.is_finite());
        match (lo, up) {
            (None, None) => Self::Free,
            (Some(l), None) => Self::Lower(l),
            (None, Some(u)) => Self::Upper(u),
            (Some(l), Some(u)) if l == u => Self::Fixed(l),
            (Some(l), Some(u)) => Self::Double(l, u),
        }
    }

    pub fn lo(&self) -> f64 {
        match self {
            Self::Free | Self::Upper(_) => f64::NEG_INFINITY,
            Self::Lower(l) | Self::Double(l, _) | Self::Fixed(l) => *l,
        }
    }

    pub fn up(&self) -> f64 {
        match self {
            Self::Free | Self::Lower(_) => f64::INFINITY,
            Self::Upper(u) | Self::Double(_, u) | Self::Fixed(u) => *u,
        }
    }

    /// the status a nonbasic variable naturally rests at
    pub fn resting(&self) -> VarStatus {
        match self {
            Self::Free => VarStatus::Free,
            Self::Fixed(_) => VarStatus::Fixed,
            Self::Upper(_) => VarStatus::AtUpper,
            Self::Lower(_) | Self::Double(_, _) => VarStatus::AtLower,
        }
    }

    /// where a nonbasic variable sits after its bounds change: keep the
    /// current seat when the new kind still offers it, else rest
    pub fn reseat(&self, status: VarStatus) -> VarStatus {
        match (self, status) {
            (Self::Fixed(_), _) => VarStatus::Fixed,
            (Self::Free, _) => VarStatus::Free,
            (b, VarStatus::AtLower) if b.lo().is_finite() => VarStatus::AtLower,
            (b, VarStatus::AtUpper) if b.up().is_finite() => VarStatus::AtUpper,
            (b, _) => b.resting(),
        }
    }
}

/// basic/nonbasic status of one variable, with the stable wire codes
/// used by the snapshot block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarStatus {
    Basic,
    AtLower,
    AtUpper,
    Free,
    Fixed,
}

impl VarStatus {
    pub fn code(self) -> u32 {
        match self {
            Self::Basic => 1,
            Self::AtLower => 2,
            Self::AtUpper => 3,
            Self::Free => 4,
            Self::Fixed => 5,
        }
    }

    pub fn from_code(code: u32) -> anyhow::Result<Self> {
        match code {
            1 => Ok(Self::Basic),
            2 => Ok(Self::AtLower),
            3 => Ok(Self::AtUpper),
            4 => Ok(Self::Free),
            5 => Ok(Self::Fixed),
            n => Err(anyhow::anyhow!("unknown basis status code {}", n)),
        }
    }
}

/// feasibility of the primal or dual solution at the current basis,
/// with the stable wire codes used by the snapshot block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolStatus {
    Undefined,
    Feasible,
    Infeasible,
    NoFeasible,
}

impl SolStatus {
    pub fn code(self) -> i32 {
        match self {
            Self::Undefined => 1,
            Self::Feasible => 2,
            Self::Infeasible => 3,
            Self::NoFeasible => 4,
        }
    }

    pub fn from_code(code: i32) -> anyhow::Result<Self> {
        match code {
            1 => Ok(Self::Undefined),
            2 => Ok(Self::Feasible),
            3 => Ok(Self::Infeasible),
            4 => Ok(Self::NoFeasible),
            n => Err(anyhow::anyhow!("unknown solution status code {}", n)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Primal,
    Dual,
}

/// per-solve knobs. both budgets apply at once; whichever runs out
/// first stops the solver with the last basis intact.
#[derive(Debug, Clone)]
pub struct SimplexParams {
    pub method: Method,
    pub iter_limit: Steps,
    pub time_limit: Secs,
    pub verbose: bool,
}

impl Default for SimplexParams {
    fn default() -> Self {
        Self {
            method: Method::Dual,
            iter_limit: Steps::MAX,
            time_limit: Secs::INFINITY,
            verbose: false,
        }
    }
}

impl From<&crate::config::SolverConfig> for SimplexParams {
    fn from(config: &crate::config::SolverConfig) -> Self {
        Self {
            method: config.method,
            iter_limit: config.iter_limit,
            time_limit: config.time_limit,
            verbose: config.verbose,
        }
    }
}

/// how a solve ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Converged,
    IterLimit,
    TimeLimit,
    Infeasible,
    Unbounded,
}

#[derive(Debug, Clone)]
pub(crate) struct Var {
    pub name: String,
    pub bounds: Bounds,
    pub status: VarStatus,
    pub prim: f64,
}

impl Var {
    fn new(bounds: Bounds) -> Self {
        Self {
            name: String::new(),
            bounds,
            status: bounds.resting(),
            prim: 0.,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Problem {
    pub(crate) name: String,
    pub(crate) rows: Vec<Var>,
    pub(crate) cols: Vec<Var>,
    /// sparse coefficient list per row, over column indices
    pub(crate) mat: Vec<Vec<(usize, f64)>>,
    /// objective coefficient per column, always minimized
    pub(crate) obj: Vec<f64>,
    pub(crate) prim_stat: SolStatus,
    pub(crate) dual_stat: SolStatus,
    /// monotone count of simplex iterations over the problem's life
    pub(crate) it_cnt: u64,
}

impl Problem {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rows: vec![],
            cols: vec![],
            mat: vec![],
            obj: vec![],
            prim_stat: SolStatus::Undefined,
            dual_stat: SolStatus::Undefined,
            it_cnt: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// append k columns, fixed at zero like any fresh structural
    /// variable, returning the index of the first
    pub fn add_cols(&mut self, k: usize) -> usize {
        let first = self.cols.len();
        for _ in 0..k {
            self.cols.push(Var::new(Bounds::Fixed(0.)));
            self.obj.push(0.);
        }
        first
    }

    /// append k free rows, returning the index of the first
    pub fn add_rows(&mut self, k: usize) -> usize {
        let first = self.rows.len();
        for _ in 0..k {
            self.rows.push(Var::new(Bounds::Free));
            self.mat.push(vec![]);
        }
        first
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.cols.len()
    }

    pub fn set_col_name(&mut self, j: usize, name: &str) {
        self.cols[j].name = name.to_string();
    }

    pub fn set_row_name(&mut self, i: usize, name: &str) {
        self.rows[i].name = name.to_string();
    }

    /// set column bounds; a nonbasic column is re-seated compatibly
    pub fn set_col_bounds(&mut self, j: usize, bounds: Bounds) {
        self.cols[j].bounds = bounds;
        if self.cols[j].status != VarStatus::Basic {
            self.cols[j].status = bounds.reseat(self.cols[j].status);
        }
    }

    /// set row bounds; a nonbasic row is re-seated compatibly
    pub fn set_row_bounds(&mut self, i: usize, bounds: Bounds) {
        self.rows[i].bounds = bounds;
        if self.rows[i].status != VarStatus::Basic {
            self.rows[i].status = bounds.reseat(self.rows[i].status);
        }
    }

    pub fn col_bounds(&self, j: usize) -> Bounds {
        self.cols[j].bounds
    }

    pub fn row_bounds(&self, i: usize) -> Bounds {
        self.rows[i].bounds
    }

    pub fn set_row_coefs(&mut self, i: usize, coefs: Vec<(usize, f64)>) {
        debug_assert!(coefs.iter().all(|(j, _)| *j < self.cols.len()));
        self.mat[i] = coefs;
    }

    pub fn row_coefs(&self, i: usize) -> &[(usize, f64)] {
        &self.mat[i]
    }

    pub fn set_obj(&mut self, j: usize, coef: f64) {
        self.obj[j] = coef;
    }

    pub fn obj(&self, j: usize) -> f64 {
        self.obj[j]
    }

    /// primal value of a column at the last computed basis
    pub fn col_prim(&self, j: usize) -> f64 {
        self.cols[j].prim
    }

    /// primal value of a row's auxiliary variable
    pub fn row_prim(&self, i: usize) -> f64 {
        self.rows[i].prim
    }

    pub fn col_status(&self, j: usize) -> VarStatus {
        self.cols[j].status
    }

    pub fn row_status(&self, i: usize) -> VarStatus {
        self.rows[i].status
    }

    pub fn set_col_status(&mut self, j: usize, status: VarStatus) {
        self.cols[j].status = status;
    }

    pub fn set_row_status(&mut self, i: usize, status: VarStatus) {
        self.rows[i].status = status;
    }

    pub fn prim_status(&self) -> SolStatus {
        self.prim_stat
    }

    pub fn dual_status(&self) -> SolStatus {
        self.dual_stat
    }

    pub fn it_cnt(&self) -> u64 {
        self.it_cnt
    }

    /// minimized objective value at the last computed basis
    pub fn obj_value(&self) -> f64 {
        self.cols
            .iter()
            .zip(self.obj.iter())
            .map(|(var, c)| var.prim * c)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_kind_selection_covers_all_side_combinations() {
        assert_eq!(Bounds::from_sides(None, None), Bounds::Free);
        assert_eq!(Bounds::from_sides(Some(1.), None), Bounds::Lower(1.));
        assert_eq!(Bounds::from_sides(None, Some(2.)), Bounds::Upper(2.));
        assert_eq!(Bounds::from_sides(Some(1.), Some(2.)), Bounds::Double(1., 2.));
        assert_eq!(Bounds::from_sides(Some(3.), Some(3.)), Bounds::Fixed(3.));
        assert_eq!(Bounds::from_sides(Some(f64::NEG_INFINITY), Some(2.)), Bounds::Upper(2.));
        assert_eq!(Bounds::from_sides(Some(f64::NEG_INFINITY), Some(f64::INFINITY)), Bounds::Free);
    }

    #[test]
    fn status_codes_round_trip() {
        for status in [
            VarStatus::Basic,
            VarStatus::AtLower,
            VarStatus::AtUpper,
            VarStatus::Free,
            VarStatus::Fixed,
        ] {
            assert_eq!(VarStatus::from_code(status.code()).unwrap(), status);
        }
        for status in [
            SolStatus::Undefined,
            SolStatus::Feasible,
            SolStatus::Infeasible,
            SolStatus::NoFeasible,
        ] {
            assert_eq!(SolStatus::from_code(status.code()).unwrap(), status);
        }
        assert!(VarStatus::from_code(0).is_err());
        assert!(SolStatus::from_code(9).is_err());
    }

    #[test]
    fn fresh_rows_and_cols_rest_off_basis() {
        let mut lp = Problem::new("probe");
        let r = lp.add_rows(2);
        let c = lp.add_cols(3);
        assert_eq!((r, c), (0, 0));
        assert_eq!(lp.row_status(0), VarStatus::Free);
        assert_eq!(lp.col_status(0), VarStatus::Fixed);
        lp.set_col_bounds(0, Bounds::Double(-1., 1.));
        assert_eq!(lp.col_status(0), VarStatus::AtLower);
        lp.set_row_bounds(1, Bounds::Upper(0.));
        assert_eq!(lp.row_status(1), VarStatus::AtUpper);
    }
}
