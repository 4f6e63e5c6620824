use anyhow::Context;
use clap::Parser;
use mpcrt::shm::PendingBoard;
use mpcrt::workload;
use mpcrt::workload::Schedule;

/// workload driver: releases requests on the schedule, runs the worker
/// pool next to the controller, and records every job. queue pressure
/// from this pool is what the resource manager watches.
#[derive(Parser)]
struct Args {
    /// request schedule CSV: each row is count,separation_seconds
    schedule: Option<String>,
    /// worker processes to spawn
    #[arg(long, default_value_t = 1)]
    workers: usize,
    /// also spawn the resource manager as a child
    #[arg(long)]
    manager: bool,
    /// internal: run as one pool worker
    #[arg(long, hide = true)]
    work: bool,
}

fn main() -> anyhow::Result<()> {
    mpcrt::init();
    let args = Args::parse();
    if args.work {
        return worker();
    }
    let path = args.schedule.context("missing schedule CSV")?;
    let schedule = Schedule::load(&path)?;
    let board = PendingBoard::create(mpcrt::PENDING_SHM_KEY, schedule.jobs())?;
    mpcrt::rt::arm_teardown(board.id());
    let exe = std::env::current_exe().context("locating own binary")?;
    let workers: Vec<_> = (0..args.workers)
        .map(|_| {
            std::process::Command::new(&exe)
                .arg("--work")
                .spawn()
                .context("spawning worker")
        })
        .collect::<anyhow::Result<_>>()?;
    let mut manager = match args.manager {
        true => {
            let sibling = exe.with_file_name("manager");
            Some(
                std::process::Command::new(sibling)
                    .spawn()
                    .context("spawning resource manager")?,
            )
        }
        false => None,
    };
    // the releaser must not interfere with the controller's core
    if let Err(err) = mpcrt::rt::pin_to_cpu(mpcrt::CTRL_CPU.saturating_sub(1)) {
        log::warn!("releaser unpinned: {}", err);
    }
    mpcrt::rt::promote_to_fifo(mpcrt::rt::max_fifo_priority());
    log::info!(
        "releasing {} jobs over {} bursts to {} workers",
        schedule.jobs(),
        schedule.bursts.len(),
        args.workers
    );
    workload::release(&board, &schedule)?;
    for mut child in workers {
        child.wait().context("waiting for worker")?;
    }
    if let Some(child) = manager.as_mut() {
        child.kill().ok();
        child.wait().ok();
    }
    workload::dump_records(&board, "log_reqs.csv")?;
    log::info!("workload complete, records in log_reqs.csv");
    Ok(())
}

/// one pool worker: pinned onto the controller's CPU one notch below
/// it, serving requests until the schedule is drained
fn worker() -> anyhow::Result<()> {
    let board = PendingBoard::attach(mpcrt::PENDING_SHM_KEY)?;
    if let Err(err) = mpcrt::rt::pin_to_cpu(mpcrt::CTRL_CPU) {
        log::warn!("worker unpinned: {}", err);
    }
    mpcrt::rt::promote_to_fifo(mpcrt::rt::max_fifo_priority() - 1);
    workload::work(&board, workload::busy_spin)
}
