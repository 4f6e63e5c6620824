//! remote solver: a UDP echo-solve over snapshot blocks. one
//! outstanding request, one reply of exactly the request size. the
//! server builds the same problem from the same model as the
//! controller, so the basis statuses on the wire line up.

use crate::Secs;
use crate::Steps;
use crate::config::ModelConfig;
use crate::lp::SolStatus;
use crate::mpc::MpcProblem;
use crate::mpc::Snapshot;
use anyhow::Context;
use std::net::SocketAddr;
use std::net::UdpSocket;
use std::time::Instant;

pub struct Server {
    mpc: MpcProblem,
    st: Snapshot,
    socket: UdpSocket,
    buf: Vec<u8>,
    /// newer protocol mode: skip the status/budget gate and run
    /// set-x0-then-solve on every request. pairs with a controller in
    /// the x0-only fast path, whose snapshots carry no fresh basis.
    always_solve: bool,
}

impl Server {
    pub fn bind(config: &ModelConfig, port: u16, always_solve: bool) -> anyhow::Result<Self> {
        let mpc = MpcProblem::new(config)?;
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .with_context(|| format!("binding udp port {}", port))?;
        let mut st = mpc.snapshot();
        mpc.save(&mut st);
        let buf = vec![0u8; st.size()];
        Ok(Self {
            mpc,
            st,
            socket,
            buf,
            always_solve,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.socket.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        log::info!("solver server listening on port {}", self.local_port());
        loop {
            self.serve_one()?;
        }
    }

    /// handle exactly one request. malformed datagrams are dropped; a
    /// request carrying nothing to do is echoed with zeroed budgets.
    pub fn serve_one(&mut self) -> anyhow::Result<()> {
        let (got, peer) = self.recv()?;
        if got != self.st.size() {
            log::warn!(
                "dropping datagram of {} bytes, expected {}",
                got,
                self.st.size()
            );
            return Ok(());
        }
        if let Err(err) = self.st.decode(&self.buf) {
            log::warn!("dropping undecodable snapshot: {}", err);
            return Ok(());
        }
        log::trace!("received\n{}", self.st);
        self.st.clamp_budgets();
        if self.always_solve {
            self.mpc.set_x0_from(&self.st);
            let (steps, secs) = self.timed_solve();
            self.st.steps_budget = steps;
            self.st.time_budget = secs;
            self.mpc.save(&mut self.st);
        } else if self.wants_work() {
            match self.mpc.resume(&self.st) {
                Ok(()) => {
                    let (steps, secs) = self.timed_solve();
                    self.st.steps_budget = steps;
                    self.st.time_budget = secs;
                    self.mpc.save(&mut self.st);
                }
                Err(err) => {
                    log::warn!("cannot resume received basis: {}", err);
                    self.st.steps_budget = 0;
                    self.st.time_budget = 0.;
                }
            }
        } else {
            self.st.steps_budget = 0;
            self.st.time_budget = 0.;
        }
        self.socket
            .send_to(&self.st.encode(), peer)
            .context("sending reply")?;
        log::debug!("served {} with input {:?}", peer, self.st.input);
        Ok(())
    }

    /// the original gate: only work when the peer's solution is not
    /// already optimal and both budgets are positive
    fn wants_work(&self) -> bool {
        (self.st.prim_stat != SolStatus::Feasible || self.st.dual_stat != SolStatus::Feasible)
            && self.st.steps_budget > 0
            && self.st.time_budget > 0.
    }

    fn timed_solve(&mut self) -> (Steps, Secs) {
        let before = self.mpc.lp().it_cnt();
        let tic = Instant::now();
        self.mpc.solve();
        (
            (self.mpc.lp().it_cnt() - before) as Steps,
            tic.elapsed().as_secs_f64(),
        )
    }

    fn recv(&mut self) -> anyhow::Result<(usize, SocketAddr)> {
        loop {
            match self.socket.recv_from(&mut self.buf) {
                Ok(got) => return Ok(got),
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err).context("receiving request"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::Vector;
    use crate::offload::Endpoint;
    use std::time::Duration;

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

    fn outbound(mpc: &MpcProblem, x0: f64) -> Snapshot {
        let mut st = mpc.snapshot();
        mpc.save(&mut st);
        st.state[0] = x0;
        st.steps_budget = Steps::MAX;
        st.time_budget = Secs::INFINITY;
        st.prim_stat = SolStatus::Infeasible;
        st.dual_stat = SolStatus::Feasible;
        st
    }

    #[test]
    fn offload_round_trip_matches_the_local_solve() {
        let config = integrator();
        let mut server = Server::bind(&config, 0, false).unwrap();
        let port = server.local_port();
        let handle = std::thread::spawn(move || server.serve_one().map(|_| server));
        let mut local = MpcProblem::new(&config).unwrap();
        let client = Endpoint::connect("127.0.0.1", port).unwrap();
        client.set_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut st = outbound(&local, 2.);
        client.exchange(&mut st).unwrap();
        handle.join().unwrap().unwrap();
        local.set_x0(&Vector::from_row_slice(&[2.]));
        local.solve();
        assert_eq!(st.state, vec![2.]);
        assert!((st.input[0] - local.input()[0]).abs() < 1e-9);
        assert!((st.input[0] + 1.).abs() < 1e-9);
        // the reply reports consumed budgets, not the leftovers
        assert!(st.steps_budget > 0);
        assert!(st.time_budget >= 0.);
    }

    #[test]
    fn optimal_snapshot_is_echoed_with_zero_budgets() {
        let config = integrator();
        let mut server = Server::bind(&config, 0, false).unwrap();
        let port = server.local_port();
        let handle = std::thread::spawn(move || server.serve_one().map(|_| ()));
        let local = MpcProblem::new(&config).unwrap();
        let client = Endpoint::connect("127.0.0.1", port).unwrap();
        client.set_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut st = outbound(&local, 0.);
        st.prim_stat = SolStatus::Feasible;
        st.dual_stat = SolStatus::Feasible;
        let input = st.input.clone();
        client.exchange(&mut st).unwrap();
        handle.join().unwrap().unwrap();
        assert_eq!(st.steps_budget, 0);
        assert_eq!(st.time_budget, 0.);
        assert_eq!(st.input, input);
    }

    #[test]
    fn always_solve_mode_ignores_the_gate() {
        let config = integrator();
        let mut server = Server::bind(&config, 0, true).unwrap();
        let port = server.local_port();
        let handle = std::thread::spawn(move || server.serve_one().map(|_| ()));
        let local = MpcProblem::new(&config).unwrap();
        let client = Endpoint::connect("127.0.0.1", port).unwrap();
        client.set_timeout(Some(Duration::from_secs(5))).unwrap();
        // the x0-only controller ships no budgets and a stale status
        let mut st = local.snapshot();
        st.state[0] = 2.;
        client.exchange(&mut st).unwrap();
        handle.join().unwrap().unwrap();
        assert!((st.input[0] + 1.).abs() < 1e-9);
    }

    #[test]
    fn runt_datagrams_are_dropped_without_killing_the_server() {
        let config = integrator();
        let mut server = Server::bind(&config, 0, false).unwrap();
        let port = server.local_port();
        let handle = std::thread::spawn(move || {
            server.serve_one()?; // the runt
            server.serve_one() // the real request
        });
        let probe = UdpSocket::bind(("0.0.0.0", 0)).unwrap();
        probe.send_to(&[1, 2, 3], ("127.0.0.1", port)).unwrap();
        let local = MpcProblem::new(&integrator()).unwrap();
        let client = Endpoint::connect("127.0.0.1", port).unwrap();
        client.set_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut st = outbound(&local, 1.);
        client.exchange(&mut st).unwrap();
        handle.join().unwrap().unwrap();
        assert!((st.input[0] + 1.).abs() < 1e-9);
    }
}
