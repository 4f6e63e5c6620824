//! the controller runtime: wake on a fresh state, compute the input
//! locally or through the offload path, publish it, and account the
//! tick. the loop never exits on its own; terminating signals tear the
//! rendezvous region down at the process edge.

use crate::Secs;
use crate::Steps;
use crate::config::ModelConfig;
use crate::lp::SolStatus;
use crate::mpc::MpcProblem;
use crate::mpc::Snapshot;
use crate::offload::Endpoint;
use crate::shm::Region;
use std::time::Instant;

pub struct Ctrl {
    mpc: MpcProblem,
    region: Region,
    snapshot: Snapshot,
    endpoint: Endpoint,
    /// restore the full basis every tick instead of the x0-only fast
    /// path. the fast path is the default: the problem is identical
    /// between ticks except for x0, and the basis is already in place.
    resume_basis: bool,
}

impl Ctrl {
    pub fn new(
        config: &ModelConfig,
        key: i32,
        server: &str,
        port: u16,
        resume_basis: bool,
    ) -> anyhow::Result<Self> {
        let mpc = MpcProblem::new(config)?;
        let region = Region::create(key, mpc.plant().n(), mpc.plant().m())?;
        let endpoint = Endpoint::connect(server, port)?;
        let mut snapshot = mpc.snapshot();
        mpc.save(&mut snapshot);
        Ok(Self {
            mpc,
            region,
            snapshot,
            endpoint,
            resume_basis,
        })
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        log::info!(
            "controller running: {} states, {} inputs, horizon {}",
            self.mpc.plant().n(),
            self.mpc.plant().m(),
            self.mpc.plant().horizon()
        );
        loop {
            self.tick()?;
        }
    }

    /// one rendezvous iteration: the input published at the end was
    /// computed from the state received at the top, always.
    pub fn tick(&mut self) -> anyhow::Result<()> {
        self.region.wait_state()?;
        let tic = Instant::now();
        if self.resume_basis {
            self.mpc.save(&mut self.snapshot);
        }
        let state = self.region.read_state();
        self.snapshot.state.copy_from_slice(&state);
        self.snapshot.steps_budget = Steps::MAX;
        self.snapshot.time_budget = Secs::INFINITY;
        // declare the warm-start assumption: the basis is dual feasible
        // and x0 has just moved under it
        self.snapshot.prim_stat = SolStatus::Infeasible;
        self.snapshot.dual_stat = SolStatus::Feasible;
        if self.region.offload() {
            self.region.set_stat_offloaded(true);
            self.endpoint.exchange(&mut self.snapshot)?;
        } else {
            self.region.set_stat_offloaded(false);
            match self.resume_basis {
                true => self.mpc.resume(&self.snapshot)?,
                false => self.mpc.set_x0_from(&self.snapshot),
            }
            self.mpc.solve();
            self.mpc.save(&mut self.snapshot);
        }
        self.region.set_stat_time(tic.elapsed().as_secs_f64());
        self.region.write_input(&self.snapshot.input);
        self.region.post_input()?;
        log::debug!(
            "tick: x[0] = {:+.3}, u[0] = {:+.3}, {:.1} us, {}",
            state.first().copied().unwrap_or(f64::NAN),
            self.snapshot.input.first().copied().unwrap_or(f64::NAN),
            tic.elapsed().as_secs_f64() * 1e6,
            if self.region.stat_offloaded() { "offloaded" } else { "local" },
        );
        Ok(())
    }
}
