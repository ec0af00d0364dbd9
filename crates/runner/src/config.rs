use std::time::Duration;

use reqwest::Url;
use sdq_queue::TransportMode;
use serde_json::Value;

/// Session timeout used when `SESSION_TIMEOUT_SECS` is unset.
const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

/// Errors raised while reading the runner configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Where and how to upscale the produced image.
#[derive(Debug, Clone)]
pub struct UpscaleSettings {
    pub api_key: String,
    pub base_url: String,
}

/// Runner configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Queue base address, e.g. `wss://space.hf.space`.
    pub base_url: Url,
    /// Transport to join with; inferred from the scheme unless overridden.
    pub transport: TransportMode,
    /// Index of the server function to call.
    pub fn_index: u32,
    /// Input values sent with `send_data`, in the function's argument order.
    pub inputs: Vec<Value>,
    /// `trigger_id` sent with the inputs, when the server expects one.
    pub trigger_id: Option<u32>,
    /// Upper bound on one queue session.
    pub session_timeout: Duration,
    /// Upscale the result when set.
    pub upscale: Option<UpscaleSettings>,
}

impl RunnerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                | Default                              |
    /// |------------------------|--------------------------------------|
    /// | `QUEUE_BASE_URL`       | required                             |
    /// | `QUEUE_TRANSPORT`      | from scheme (`duplex` / `streamed`)  |
    /// | `QUEUE_FN_INDEX`       | `0`                                  |
    /// | `QUEUE_PROMPT`         | required unless `QUEUE_DATA` is set  |
    /// | `QUEUE_DATA`           | `[QUEUE_PROMPT]`                     |
    /// | `QUEUE_TRIGGER_ID`     | unset: not sent                      |
    /// | `SESSION_TIMEOUT_SECS` | `60`                                 |
    /// | `UPSCALE_API_KEY`      | unset: no upscale                    |
    /// | `UPSCALE_BASE_URL`     | `https://bigjpg.com`                 |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let raw_base = var("QUEUE_BASE_URL").ok_or(ConfigError::Missing("QUEUE_BASE_URL"))?;
        let base_url = Url::parse(raw_base.trim()).map_err(|e| ConfigError::Invalid {
            name: "QUEUE_BASE_URL",
            reason: e.to_string(),
        })?;

        let transport = match var("QUEUE_TRANSPORT") {
            Some(raw) => raw.parse::<TransportMode>().map_err(|reason| ConfigError::Invalid {
                name: "QUEUE_TRANSPORT",
                reason,
            })?,
            None => TransportMode::from_scheme(base_url.scheme()).ok_or_else(|| {
                ConfigError::Invalid {
                    name: "QUEUE_BASE_URL",
                    reason: format!("unsupported scheme `{}`", base_url.scheme()),
                }
            })?,
        };

        let fn_index: u32 = match var("QUEUE_FN_INDEX") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                name: "QUEUE_FN_INDEX",
                reason: format!("`{raw}` is not a non-negative integer"),
            })?,
            None => 0,
        };

        let inputs = match var("QUEUE_DATA") {
            Some(raw) => parse_inputs(&raw)?,
            None => {
                let prompt = var("QUEUE_PROMPT").ok_or(ConfigError::Missing("QUEUE_PROMPT"))?;
                vec![Value::String(prompt)]
            }
        };

        let trigger_id = match var("QUEUE_TRIGGER_ID") {
            Some(raw) => Some(raw.trim().parse::<u32>().map_err(|_| ConfigError::Invalid {
                name: "QUEUE_TRIGGER_ID",
                reason: format!("`{raw}` is not a non-negative integer"),
            })?),
            None => None,
        };

        let timeout_secs: u64 = match var("SESSION_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                name: "SESSION_TIMEOUT_SECS",
                reason: format!("`{raw}` is not a number of seconds"),
            })?,
            None => DEFAULT_SESSION_TIMEOUT_SECS,
        };

        let upscale = var("UPSCALE_API_KEY").map(|api_key| UpscaleSettings {
            api_key,
            base_url: var("UPSCALE_BASE_URL")
                .unwrap_or_else(|| sdq_upscale::config::DEFAULT_BASE_URL.to_string()),
        });

        Ok(Self {
            base_url,
            transport,
            fn_index,
            inputs,
            trigger_id,
            session_timeout: Duration::from_secs(timeout_secs),
            upscale,
        })
    }
}

/// `QUEUE_DATA` must be a JSON array of input values.
fn parse_inputs(raw: &str) -> Result<Vec<Value>, ConfigError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(_) => Err(ConfigError::Invalid {
            name: "QUEUE_DATA",
            reason: "expected a JSON array".to_string(),
        }),
        Err(e) => Err(ConfigError::Invalid {
            name: "QUEUE_DATA",
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<RunnerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RunnerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = load(&[
            ("QUEUE_BASE_URL", "wss://space.hf.space"),
            ("QUEUE_PROMPT", "a lighthouse"),
        ])
        .unwrap();

        assert_eq!(config.transport, TransportMode::Duplex);
        assert_eq!(config.fn_index, 0);
        assert_eq!(config.inputs, vec![json!("a lighthouse")]);
        assert_eq!(config.trigger_id, None);
        assert_eq!(config.session_timeout, Duration::from_secs(60));
        assert!(config.upscale.is_none());
    }

    #[test]
    fn http_base_selects_streamed_transport() {
        let config = load(&[
            ("QUEUE_BASE_URL", "https://space.hf.space"),
            ("QUEUE_PROMPT", "x"),
        ])
        .unwrap();
        assert_eq!(config.transport, TransportMode::Streamed);
    }

    #[test]
    fn explicit_transport_overrides_scheme() {
        let config = load(&[
            ("QUEUE_BASE_URL", "https://space.hf.space"),
            ("QUEUE_TRANSPORT", "duplex"),
            ("QUEUE_PROMPT", "x"),
        ])
        .unwrap();
        assert_eq!(config.transport, TransportMode::Duplex);
    }

    #[test]
    fn missing_base_url_is_reported() {
        assert_matches!(
            load(&[("QUEUE_PROMPT", "x")]),
            Err(ConfigError::Missing("QUEUE_BASE_URL"))
        );
    }

    #[test]
    fn blank_prompt_counts_as_missing() {
        assert_matches!(
            load(&[("QUEUE_BASE_URL", "ws://localhost:7860"), ("QUEUE_PROMPT", "  ")]),
            Err(ConfigError::Missing("QUEUE_PROMPT"))
        );
    }

    #[test]
    fn data_array_replaces_prompt() {
        let config = load(&[
            ("QUEUE_BASE_URL", "ws://localhost:7860"),
            ("QUEUE_DATA", r#"["1girl", 1, 3, -1, ""]"#),
        ])
        .unwrap();
        assert_eq!(config.inputs, vec![json!("1girl"), json!(1), json!(3), json!(-1), json!("")]);
    }

    #[test]
    fn invalid_values_name_their_variable() {
        assert_matches!(
            load(&[
                ("QUEUE_BASE_URL", "ws://localhost:7860"),
                ("QUEUE_PROMPT", "x"),
                ("QUEUE_FN_INDEX", "-1"),
            ]),
            Err(ConfigError::Invalid { name: "QUEUE_FN_INDEX", .. })
        );
        assert_matches!(
            load(&[
                ("QUEUE_BASE_URL", "ws://localhost:7860"),
                ("QUEUE_DATA", r#"{"prompt": "x"}"#),
            ]),
            Err(ConfigError::Invalid { name: "QUEUE_DATA", .. })
        );
        assert_matches!(
            load(&[("QUEUE_BASE_URL", "ftp://host"), ("QUEUE_PROMPT", "x")]),
            Err(ConfigError::Invalid { name: "QUEUE_BASE_URL", .. })
        );
        assert_matches!(
            load(&[
                ("QUEUE_BASE_URL", "ws://localhost:7860"),
                ("QUEUE_PROMPT", "x"),
                ("QUEUE_TRANSPORT", "carrier-pigeon"),
            ]),
            Err(ConfigError::Invalid { name: "QUEUE_TRANSPORT", .. })
        );
    }

    #[test]
    fn trigger_id_is_optional_and_numeric() {
        let config = load(&[
            ("QUEUE_BASE_URL", "https://space.hf.space"),
            ("QUEUE_PROMPT", "x"),
            ("QUEUE_TRIGGER_ID", "7"),
        ])
        .unwrap();
        assert_eq!(config.trigger_id, Some(7));

        assert_matches!(
            load(&[
                ("QUEUE_BASE_URL", "https://space.hf.space"),
                ("QUEUE_PROMPT", "x"),
                ("QUEUE_TRIGGER_ID", "button"),
            ]),
            Err(ConfigError::Invalid { name: "QUEUE_TRIGGER_ID", .. })
        );
    }

    #[test]
    fn upscale_enabled_by_api_key() {
        let config = load(&[
            ("QUEUE_BASE_URL", "ws://localhost:7860"),
            ("QUEUE_PROMPT", "x"),
            ("UPSCALE_API_KEY", "k"),
            ("SESSION_TIMEOUT_SECS", "5"),
        ])
        .unwrap();
        let upscale = config.upscale.unwrap();
        assert_eq!(upscale.api_key, "k");
        assert_eq!(upscale.base_url, "https://bigjpg.com");
        assert_eq!(config.session_timeout, Duration::from_secs(5));
    }
}
