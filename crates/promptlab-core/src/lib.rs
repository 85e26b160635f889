pub mod compare;
pub mod config;
pub mod cost;
pub mod engine;
pub mod errors;
pub mod fingerprint;
pub mod judge;
pub mod matcher;
pub mod model;
pub mod providers;
pub mod storage;
pub mod template;
pub mod validate;

pub use compare::{Comparator, ComparisonReport};
pub use engine::{RunSettings, Runner};
pub use model::{MatchMode, PromptDefinition, Run, RunResult, TestCase};
pub use storage::Store;
