//! `sdq-runner` -- generate one image through a queue endpoint.
//!
//! Joins the queue, answers the server's requests for the session hash
//! and inputs, waits for the result and prints its download address.
//! When `UPSCALE_API_KEY` is set the result is upscaled as well.
//!
//! A `fn_index` or `session_hash` pair in `QUEUE_BASE_URL`'s query
//! overrides `QUEUE_FN_INDEX` and the generated session hash.
//!
//! # Environment variables
//!
//! | Variable               | Required | Default              | Description                               |
//! |------------------------|----------|----------------------|-------------------------------------------|
//! | `QUEUE_BASE_URL`       | yes      | --                   | Queue root, e.g. `wss://space.hf.space`   |
//! | `QUEUE_TRANSPORT`      | no       | from scheme          | `duplex` or `streamed`                    |
//! | `QUEUE_FN_INDEX`       | no       | `0`                  | Server function to call                   |
//! | `QUEUE_PROMPT`         | yes*     | --                   | Prompt, sent as the only input            |
//! | `QUEUE_DATA`           | no       | --                   | JSON array of inputs; replaces the prompt |
//! | `QUEUE_TRIGGER_ID`     | no       | --                   | `trigger_id` sent with the inputs         |
//! | `SESSION_TIMEOUT_SECS` | no       | `60`                 | Upper bound on the queue session          |
//! | `UPSCALE_API_KEY`      | no       | --                   | Enables upscaling                         |
//! | `UPSCALE_BASE_URL`     | no       | `https://bigjpg.com` | Upscale service root                      |

use sdq_runner::RunnerConfig;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sdq_runner=info,sdq_queue=info,sdq_upscale=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RunnerConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    match sdq_runner::run(&config, &cancel).await {
        Ok(report) => {
            println!("{}", report.file_url);
            if let Some(upscaled) = report.upscaled_url {
                println!("{upscaled}");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Generation failed");
            std::process::exit(1);
        }
    }
}
