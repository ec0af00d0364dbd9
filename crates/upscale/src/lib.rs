//! Client for an asynchronous image-upscaling job API.
//!
//! A job is submitted with a source image URL and answered with a
//! ticket (`tid`). The ticket is then polled until the job reports
//! `success` and a result URL, or the retry budget runs out.

pub mod api;
pub mod config;

pub use api::{PollOutcome, UpscaleClient, UpscaleError};
pub use config::UpscaleConfig;
