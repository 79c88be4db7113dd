// Collect → merge → load, plus the hourly scheduler adapter

pub mod collector;
pub mod merger;
pub mod orchestrator;
pub mod scheduler;

pub use orchestrator::{KindOutcome, Pipeline, RunReport};
