pub mod problem;
pub mod simplex;

pub use problem::Bounds;
pub use problem::Method;
pub use problem::Problem;
pub use problem::SimplexParams;
pub use problem::SolStatus;
pub use problem::Termination;
pub use problem::VarStatus;
