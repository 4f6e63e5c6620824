use clap::Parser;
use mpcrt::config::ModelConfig;
use mpcrt::ctrl::Ctrl;

/// MPC controller: owns the rendezvous region and computes the input
/// for every state the plant publishes, locally or through the solver
/// server when the resource manager says so
#[derive(Parser)]
struct Args {
    /// JSON model of the plant and problem
    model: String,
    /// address of the solver server for the offload path
    #[arg(default_value = mpcrt::SOLVER_ADDR)]
    server: String,
    /// restore the full basis every tick instead of the x0-only path
    #[arg(long)]
    resume_basis: bool,
}

fn main() -> anyhow::Result<()> {
    mpcrt::init();
    let args = Args::parse();
    let config = ModelConfig::load(&args.model)?;
    let mut ctrl = Ctrl::new(
        &config,
        mpcrt::RENDEZVOUS_SHM_KEY,
        &args.server,
        mpcrt::SOLVER_PORT,
        args.resume_basis,
    )?;
    mpcrt::rt::arm_teardown(ctrl.region().id());
    if let Err(err) = mpcrt::rt::pin_to_cpu(mpcrt::CTRL_CPU) {
        log::warn!("running unpinned: {}", err);
    }
    mpcrt::rt::promote_to_fifo(mpcrt::rt::max_fifo_priority());
    ctrl.run()
}
