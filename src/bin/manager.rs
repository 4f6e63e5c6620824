use clap::Parser;
use mpcrt::manager::Manager;

/// resource manager: samples the worker pool's queue depth every
/// period and toggles the controller's offload flag with hysteresis
#[derive(Parser)]
struct Args {
    /// CSV transition log
    #[arg(long, default_value = "log_rm.csv")]
    log: String,
}

fn main() -> anyhow::Result<()> {
    mpcrt::init();
    let args = Args::parse();
    mpcrt::rt::exit_on_interrupt();
    let mut manager = Manager::new(
        mpcrt::PENDING_SHM_KEY,
        mpcrt::RENDEZVOUS_SHM_KEY,
        &args.log,
    )?;
    manager.run()
}
