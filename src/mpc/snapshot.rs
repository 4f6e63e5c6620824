//! serializable solver state: initial state, first input, budgets,
//! primal/dual statuses, and the per-row/per-column basis statuses.
//! the byte layout is wire stable and little endian on both endpoints;
//! two peers built from the same plant agree on the size exactly, so
//! one UDP datagram is one snapshot.

use super::problem::MpcProblem;
use crate::Secs;
use crate::Steps;
use crate::lp::SolStatus;
use crate::lp::VarStatus;
use byteorder::LE;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// plant state x0 the solve starts from
    pub state: Vec<f64>,
    /// first input of the last solution
    pub input: Vec<f64>,
    /// seconds: available on the way out, consumed on the way back
    pub time_budget: Secs,
    /// iterations: available on the way out, consumed on the way back
    pub steps_budget: Steps,
    pub prim_stat: SolStatus,
    pub dual_stat: SolStatus,
    /// basis status codes, 1-indexed like the solver reports them
    pub row_stat: Vec<u32>,
    pub col_stat: Vec<u32>,
}

impl Snapshot {
    /// block size in bytes; fixed once allocated
    pub fn size(&self) -> usize {
        8 * (self.state.len() + self.input.len())
            + 8 // time budget
            + 4 // steps budget
            + 4 // primal status
            + 4 // dual status
            + 4 * (self.row_stat.len() + self.col_stat.len())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size());
        for x in self.state.iter().chain(self.input.iter()) {
            buf.write_f64::<LE>(*x).expect("vec write");
        }
        buf.write_f64::<LE>(self.time_budget).expect("vec write");
        buf.write_i32::<LE>(self.steps_budget).expect("vec write");
        buf.write_i32::<LE>(self.prim_stat.code()).expect("vec write");
        buf.write_i32::<LE>(self.dual_stat.code()).expect("vec write");
        for s in self.row_stat.iter().chain(self.col_stat.iter()) {
            buf.write_u32::<LE>(*s).expect("vec write");
        }
        buf
    }

    /// fill this block from wire bytes. the length must match exactly;
    /// a peer built from a different plant is a protocol error.
    pub fn decode(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        if bytes.len() != self.size() {
            anyhow::bail!(
                "snapshot size mismatch: expected {} bytes, got {}",
                self.size(),
                bytes.len()
            );
        }
        let mut r = std::io::Cursor::new(bytes);
        for x in self.state.iter_mut() {
            *x = r.read_f64::<LE>()?;
        }
        for x in self.input.iter_mut() {
            *x = r.read_f64::<LE>()?;
        }
        self.time_budget = r.read_f64::<LE>()?;
        self.steps_budget = r.read_i32::<LE>()?;
        self.prim_stat = SolStatus::from_code(r.read_i32::<LE>()?)?;
        self.dual_stat = SolStatus::from_code(r.read_i32::<LE>()?)?;
        for s in self.row_stat.iter_mut() {
            *s = r.read_u32::<LE>()?;
        }
        for s in self.col_stat.iter_mut() {
            *s = r.read_u32::<LE>()?;
        }
        Ok(())
    }

    /// budgets arriving from the wire may be negative; they mean zero
    pub fn clamp_budgets(&mut self) {
        self.steps_budget = self.steps_budget.max(0);
        self.time_budget = self.time_budget.max(0.);
    }
}

impl MpcProblem {
    /// allocate a zeroed status block sized for the current problem
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: vec![0.; self.plant().n()],
            input: vec![0.; self.plant().m()],
            time_budget: 0.,
            steps_budget: 0,
            prim_stat: SolStatus::Undefined,
            dual_stat: SolStatus::Undefined,
            row_stat: vec![0; self.lp().n_rows() + 1],
            col_stat: vec![0; self.lp().n_cols() + 1],
        }
    }

    /// copy the first input, the solution statuses, and the basis out
    /// of the solver. the state field belongs to the caller.
    pub fn save(&self, st: &mut Snapshot) {
        for (j, u) in st.input.iter_mut().enumerate() {
            *u = self.lp().col_prim(self.v_u() + j);
        }
        st.prim_stat = self.lp().prim_status();
        st.dual_stat = self.lp().dual_status();
        for i in 0..self.lp().n_rows() {
            st.row_stat[i + 1] = self.lp().row_status(i).code();
        }
        for j in 0..self.lp().n_cols() {
            st.col_stat[j + 1] = self.lp().col_status(j).code();
        }
    }

    /// take only the state from the block and refresh the right hand
    /// sides; the basis is left untouched. the common fast path when
    /// nothing but x0 changed since the last tick.
    pub fn set_x0_from(&mut self, st: &Snapshot) {
        let x0 = crate::linalg::Vector::from_row_slice(&st.state);
        self.set_x0(&x0);
    }

    /// full restore: budgets, state, and the basis statuses
    pub fn resume(&mut self, st: &Snapshot) -> anyhow::Result<()> {
        if st.row_stat.len() != self.lp().n_rows() + 1
            || st.col_stat.len() != self.lp().n_cols() + 1
        {
            anyhow::bail!(
                "basis shape mismatch: {}x{} statuses for a {}x{} problem",
                st.row_stat.len(),
                st.col_stat.len(),
                self.lp().n_rows() + 1,
                self.lp().n_cols() + 1,
            );
        }
        self.set_budgets(st.steps_budget, st.time_budget);
        self.set_x0_from(st);
        for i in 0..self.lp().n_rows() {
            let status = VarStatus::from_code(st.row_stat[i + 1])?;
            self.lp_mut().set_row_status(i, status);
        }
        for j in 0..self.lp().n_cols() {
            let status = VarStatus::from_code(st.col_stat[j + 1])?;
            self.lp_mut().set_col_status(j, status);
        }
        Ok(())
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "state  {:?}", self.state)?;
        writeln!(f, "input  {:?}", self.input)?;
        writeln!(f, "steps  {}", self.steps_budget)?;
        writeln!(f, "time   {}", self.time_budget)?;
        writeln!(f, "primal {:?}", self.prim_stat)?;
        write!(f, "dual   {:?}", self.dual_stat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::linalg::Vector;

    fn integrator() -> ModelConfig {
        serde_json::from_value(serde_json::json!({
            "state_num": 1,
            "input_num": 1,
            "len_horizon": 3,
            "len_ctrl": 1,
            "state_Ad": [1.0],
            "input_Bd": [1.0],
            "input_bounds": [[-1.0, 1.0]],
            "state_weight": [1.0],
            "cost_model": { "type": "min_steps_to_zero", "coef": 1.0 }
        }))
        .unwrap()
    }

    #[test]
    fn encoded_size_matches_the_formula() {
        let mpc = MpcProblem::new(&integrator()).unwrap();
        let st = mpc.snapshot();
        assert_eq!(st.encode().len(), st.size());
    }

    #[test]
    fn byte_round_trip_through_resume_is_identity() {
        let mut mpc = MpcProblem::new(&integrator()).unwrap();
        mpc.set_x0(&Vector::from_row_slice(&[2.]));
        mpc.solve();
        let mut st = mpc.snapshot();
        mpc.save(&mut st);
        st.state[0] = 2.;
        let bytes = st.encode();
        let mut st2 = mpc.snapshot();
        st2.decode(&bytes).unwrap();
        mpc.resume(&st2).unwrap();
        mpc.save(&mut st2);
        assert_eq!(st2.encode(), bytes);
    }

    #[test]
    fn save_resume_round_trip_preserves_the_solution() {
        let mut direct = MpcProblem::new(&integrator()).unwrap();
        direct.set_x0(&Vector::from_row_slice(&[2.]));
        direct.solve();
        let expected = direct.input();

        let mut via = MpcProblem::new(&integrator()).unwrap();
        let mut st = via.snapshot();
        via.save(&mut st);
        st.state[0] = 2.;
        st.steps_budget = Steps::MAX;
        st.time_budget = Secs::INFINITY;
        st.prim_stat = SolStatus::Infeasible;
        st.dual_stat = SolStatus::Feasible;
        via.resume(&st).unwrap();
        via.solve();
        assert!((via.input() - expected).norm() < 1e-9);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let mpc = MpcProblem::new(&integrator()).unwrap();
        let mut st = mpc.snapshot();
        let mut bytes = st.encode();
        bytes.pop();
        assert!(st.decode(&bytes).is_err());
    }

    #[test]
    fn negative_budgets_clamp_to_zero() {
        let mut st = MpcProblem::new(&integrator()).unwrap().snapshot();
        st.steps_budget = -7;
        st.time_budget = -0.5;
        st.clamp_budgets();
        assert_eq!(st.steps_budget, 0);
        assert_eq!(st.time_budget, 0.);
    }

    #[test]
    fn resume_applies_clamped_budgets() {
        let mut mpc = MpcProblem::new(&integrator()).unwrap();
        let mut st = mpc.snapshot();
        mpc.save(&mut st);
        st.steps_budget = -3;
        st.time_budget = -1.;
        mpc.resume(&st).unwrap();
        assert_eq!(mpc.params().iter_limit, 0);
        assert_eq!(mpc.params().time_limit, 0.);
    }
}
