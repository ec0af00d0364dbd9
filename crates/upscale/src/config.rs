//! Tunable parameters for upscale submission and polling.

use std::time::Duration;

/// Public upscaling service used when no base URL is configured.
pub const DEFAULT_BASE_URL: &str = "https://bigjpg.com";

/// Submission and polling settings.
#[derive(Debug, Clone)]
pub struct UpscaleConfig {
    /// Service root; tasks live under `{base_url}/api/task/`.
    pub base_url: String,
    /// Rendering style (`art` or `photo`).
    pub style: String,
    /// Noise-reduction level, as the service expects it (`"-1"`..`"3"`).
    pub noise: String,
    /// Magnification selector sent as the `x2` field.
    pub scale: String,
    /// Maximum number of status polls before giving up.
    pub retry_budget: u32,
    /// Delay between two status polls.
    pub poll_interval: Duration,
}

impl Default for UpscaleConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            style: "art".to_string(),
            noise: "3".to_string(),
            scale: "1".to_string(),
            retry_budget: 20,
            poll_interval: Duration::from_secs(3),
        }
    }
}

impl UpscaleConfig {
    /// Same settings against a different service root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Address tasks are submitted to.
    pub fn submit_url(&self) -> String {
        format!("{}/api/task/", self.base_url.trim_end_matches('/'))
    }

    /// Status address of one submitted task.
    pub fn task_url(&self, ticket: &str) -> String {
        format!("{}{ticket}", self.submit_url())
    }
}
