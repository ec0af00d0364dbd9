//! Drives one text-to-image generation through a queue endpoint and,
//! optionally, hands the produced image to the upscale service.

pub mod config;
pub mod job;
pub mod runner;

pub use config::{ConfigError, RunnerConfig, UpscaleSettings};
pub use job::GenerationJob;
pub use runner::{run, PosterExit, RunError, RunReport};
