pub mod problem;
pub mod snapshot;

pub use problem::MpcProblem;
pub use snapshot::Snapshot;
