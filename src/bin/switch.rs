use colored::Colorize;
use mpcrt::shm::Region;

/// interactive override of the offload flag, handy when no resource
/// manager is running
fn main() -> anyhow::Result<()> {
    let region = Region::attach(mpcrt::RENDEZVOUS_SHM_KEY)?;
    let report = |on: bool| match on {
        true => println!("currently executing MPC: {}", "SERVER".yellow()),
        false => println!("currently executing MPC: {}", "LOCAL".green()),
    };
    report(region.offload());
    let pick = dialoguer::Select::new()
        .with_prompt("where should the next solves run")
        .items(&["local", "server"])
        .default(region.offload() as usize)
        .interact()?;
    region.set_offload(pick == 1);
    report(region.offload());
    Ok(())
}
