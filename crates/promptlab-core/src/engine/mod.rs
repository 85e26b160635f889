//! Execution engine: fan a definition out over (test case x model) on a bounded worker pool.

mod execute;
pub mod runner;
mod slots;

pub use runner::{RunSettings, Runner};
