//! Background reclamation of idle callers' bucket state.

mod sweeper;

pub use sweeper::{SweepReport, Sweeper, SweeperConfig, SweeperHandle, MAX_INTERVAL};
