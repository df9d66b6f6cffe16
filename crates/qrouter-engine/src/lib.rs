pub mod address;
pub mod dependency;
mod journey;
pub mod machine;
pub mod parallel;
pub mod queue;
pub mod task;

pub use address::Address;
pub use parallel::ParallelRouter;
pub use queue::EventQueue;
pub use task::TaskRouter;
