use clap::Parser;
use mpcrt::config::ModelConfig;
use mpcrt::linalg;
use mpcrt::linalg::Vector;
use mpcrt::plant::Controller;
use mpcrt::plant::Plant;
use mpcrt::plant::Trace;
use mpcrt::shm::Region;

/// plant simulator: drives a running controller through the shared
/// rendezvous for a number of steps and prints the closed-loop trace
#[derive(Parser)]
struct Args {
    /// JSON model of the plant, identical to the controller's
    model: String,
    /// steps to simulate
    steps: usize,
}

/// control law that defers to whatever sits on the other side of the
/// rendezvous region
struct Rendezvous(Region);

impl Controller for Rendezvous {
    fn compute(&mut self, k: usize, trace: &mut Trace) -> anyhow::Result<()> {
        self.0.write_state(trace.state(k).as_slice());
        self.0.post_state()?;
        self.0.wait_input()?;
        for (j, u) in self.0.read_input().iter().enumerate() {
            trace.u[(j, k)] = *u;
        }
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    mpcrt::init();
    let args = Args::parse();
    let config = ModelConfig::load(&args.model)?;
    let plant = Plant::from_config(&config);
    let region = Region::attach(mpcrt::RENDEZVOUS_SHM_KEY)?;
    region.validate(plant.n(), plant.m())?;
    let x0 = Vector::from_vec(
        config
            .state_init
            .clone()
            .unwrap_or_else(|| vec![0.; plant.n()]),
    );
    let mut law = Rendezvous(region);
    let mut trace = Trace::new(plant.n(), plant.m(), args.steps);
    plant.run_closed_loop(&x0, Some(&mut law), &mut trace)?;
    println!("\nSTATE EVOLUTION");
    println!("{}", linalg::pretty(&trace.x, 9, 3));
    println!("\nINPUT APPLIED");
    println!("{}", linalg::pretty(&trace.u, 9, 3));
    println!("\nTIME NEEDED");
    for secs in trace.time.iter() {
        print!(" {:e}", secs);
    }
    println!();
    Ok(())
}
