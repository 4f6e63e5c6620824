use clap::Parser;
use mpcrt::config::ModelConfig;
use mpcrt::offload::Server;

/// solver server: answers each snapshot datagram with the same block,
/// solved. lives on a CPU disjoint from the controller and never
/// terminates except on fatal signals.
#[derive(Parser)]
struct Args {
    /// JSON model of the plant and problem, identical to the
    /// controller's
    model: String,
    #[arg(long, default_value_t = mpcrt::SOLVER_PORT)]
    port: u16,
    /// newer protocol: refresh x0 and solve on every request instead
    /// of gating on the received statuses and budgets
    #[arg(long)]
    always_solve: bool,
}

fn main() -> anyhow::Result<()> {
    mpcrt::init();
    let args = Args::parse();
    let config = ModelConfig::load(&args.model)?;
    let mut server = Server::bind(&config, args.port, args.always_solve)?;
    if let Err(err) = mpcrt::rt::pin_to_cpu(mpcrt::SERVER_CPU) {
        log::warn!("running unpinned: {}", err);
    }
    server.run()
}
