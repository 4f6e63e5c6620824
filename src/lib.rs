pub mod config;
pub mod ctrl;
pub mod linalg;
pub mod lp;
pub mod manager;
pub mod mpc;
pub mod offload;
pub mod plant;
pub mod rt;
pub mod shm;
pub mod workload;

/// dimensional analysis types
type Secs = f64;
type Steps = i32;

// shared-memory rendezvous parameters
pub const RENDEZVOUS_SHM_KEY: i32 = 0xC1A0;
pub const PENDING_SHM_KEY: i32 = 0xF1D0;
pub const SHM_PERMS: i32 = 0o666;

// processor placement: the controller and the workers contend for one
// core, the server lives on another
pub const CTRL_CPU: usize = 1;
pub const SERVER_CPU: usize = 0;

// offload endpoint parameters
pub const SOLVER_ADDR: &str = "127.0.0.1";
pub const SOLVER_PORT: u16 = 6001;

// resource manager parameters
pub const MANAGER_PERIOD_MS: u64 = 10;
pub const MANAGER_ONBOARD_STREAK: u32 = 10;

// numerical thresholds of the LP formulation
const NORM_RELAX_BOUND: f64 = 1e10;
const EIGEN_ZERO_TOL: f64 = 1e-6;

/// initialize logging to terminal and timestamped file
pub fn init() {
    std::fs::create_dir_all("logs").expect("create logs directory");
    let config = simplelog::ConfigBuilder::new()
        .set_location_level(log::LevelFilter::Off)
        .set_target_level(log::LevelFilter::Off)
        .set_thread_level(log::LevelFilter::Off)
        .build();
    let time = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("time moves slow")
        .as_secs();
    let file = simplelog::WriteLogger::new(
        log::LevelFilter::Debug,
        config.clone(),
        std::fs::File::create(format!("logs/{}.{}.log", time, std::process::id()))
            .expect("create log file"),
    );
    let term = simplelog::TermLogger::new(
        log::LevelFilter::Info,
        config.clone(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
    simplelog::CombinedLogger::init(vec![term, file]).expect("initialize logger");
}
