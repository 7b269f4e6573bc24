//! Periodic background jobs: matrix rollups, FX rate sampling and
//! partition maintenance.

pub mod jobs;
mod scheduler;

pub use scheduler::CronScheduler;
