//! One end-to-end generation run.

use std::time::Duration;

use reqwest::Url;
use sdq_queue::api::{QueueApi, QueueApiError};
use sdq_queue::{QueueSession, Response, SessionError, TransportMode};
use sdq_upscale::{UpscaleClient, UpscaleConfig, UpscaleError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RunnerConfig;
use crate::job::GenerationJob;

/// Errors that end a run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Failed to submit inputs: {0}")]
    QueueApi(#[from] QueueApiError),

    #[error(transparent)]
    Upscale(#[from] UpscaleError),

    #[error("Queue session did not complete within {0:?}")]
    Timeout(Duration),

    #[error("Generation completed without producing a file")]
    NoOutput,
}

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Download address of the generated image.
    pub file_url: String,
    /// Address of the upscaled image, when upscaling is configured.
    pub upscaled_url: Option<String>,
}

/// How the data poster task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PosterExit {
    /// The session dropped its sender and every payload was posted.
    Drained,
    /// The session token fired before the outbox was drained.
    Interrupted,
}

/// Generate one image as configured, then upscale it if requested.
///
/// `cancel` aborts the whole run. The queue session, including any
/// out-of-band input post, is additionally bounded by
/// `config.session_timeout`.
pub async fn run(config: &RunnerConfig, cancel: &CancellationToken) -> Result<RunReport, RunError> {
    let job = new_job(config);
    let base = session_base(config, &job);

    let mut session = QueueSession::new(base.as_str())?.with_mode(config.transport);
    let outbox = job.attach(&mut session);

    let session_cancel = cancel.child_token();
    let poster = match outbox {
        Some(rx) => Some(spawn_data_poster(
            QueueApi::new(session.base_url())?,
            rx,
            session_cancel.clone(),
        )),
        None => None,
    };

    tracing::info!(
        endpoint = %base,
        mode = %config.transport,
        fn_index = job.fn_index(),
        session_hash = %job.session_hash(),
        "Starting generation",
    );

    let watchdog = {
        let token = session_cancel.clone();
        let timeout = config.session_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            tracing::warn!(timeout_secs = timeout.as_secs(), "Queue session timed out");
            token.cancel();
        })
    };

    let outcome = session.run(&session_cancel).await;
    // Dropping the session drops the reactions holding the poster's sender.
    drop(session);
    if outcome.is_err() {
        // A failed session has no use for inputs still queued or in flight.
        session_cancel.cancel();
    }

    let poster_exit = match poster {
        Some(poster) => poster.await,
        None => Ok(Ok(PosterExit::Drained)),
    };
    watchdog.abort();

    let interrupted = match poster_exit {
        Ok(Err(e)) => return Err(e.into()),
        Ok(Ok(exit)) => exit == PosterExit::Interrupted,
        Err(e) => {
            tracing::error!(error = %e, "Data poster task failed");
            false
        }
    };

    match outcome {
        Err(SessionError::Cancelled) => return Err(stop_reason(config, cancel)),
        Err(e) => return Err(e.into()),
        Ok(()) if interrupted => return Err(stop_reason(config, cancel)),
        Ok(()) => {}
    }

    let produced = job.produced().ok_or(RunError::NoOutput)?;
    let file_url = if is_absolute(&produced) {
        produced
    } else {
        QueueApi::new(&config.base_url)?.file_url(&produced)?
    };
    tracing::info!(file_url = %file_url, "Generated image available");

    let upscaled_url = match &config.upscale {
        Some(settings) => {
            let client = UpscaleClient::with_config(
                settings.api_key.clone(),
                UpscaleConfig::default().with_base_url(settings.base_url.clone()),
            );
            Some(client.magnify(&file_url, cancel).await?)
        }
        None => None,
    };

    Ok(RunReport {
        file_url,
        upscaled_url,
    })
}

/// Post queued `send_data` payloads until the session drops its sender
/// or `session_cancel` fires.
///
/// Each post races `session_cancel`, so a stalled data endpoint cannot
/// outlive the session. A failed post cancels `session_cancel`; the
/// server would otherwise wait for inputs that never arrive.
pub fn spawn_data_poster(
    api: QueueApi,
    mut outbox: mpsc::UnboundedReceiver<Response>,
    session_cancel: CancellationToken,
) -> JoinHandle<Result<PosterExit, QueueApiError>> {
    tokio::spawn(async move {
        loop {
            let payload = tokio::select! {
                biased;
                _ = session_cancel.cancelled() => return Ok(PosterExit::Interrupted),
                payload = outbox.recv() => payload,
            };
            let Some(payload) = payload else {
                return Ok(PosterExit::Drained);
            };

            let posted = tokio::select! {
                biased;
                _ = session_cancel.cancelled() => {
                    tracing::warn!(url = %api.data_url(), "Abandoned queue data post");
                    return Ok(PosterExit::Interrupted);
                }
                posted = api.post_data(&payload) => posted,
            };
            if let Err(e) = posted {
                tracing::error!(url = %api.data_url(), error = %e, "Failed to post queue data");
                session_cancel.cancel();
                return Err(e);
            }
            tracing::info!(url = %api.data_url(), "Inputs submitted");
        }
    })
}

// ---- private helpers ----

/// Build the job, adopting `fn_index` and `session_hash` from the base
/// query when the caller pinned them there.
fn new_job(config: &RunnerConfig) -> GenerationJob {
    let mut fn_index = config.fn_index;
    let mut session_hash = None;
    for (key, value) in config.base_url.query_pairs() {
        match key.as_ref() {
            "fn_index" => match value.parse() {
                Ok(index) => fn_index = index,
                Err(_) => tracing::warn!(value = %value, "Ignoring non-numeric fn_index in base URL"),
            },
            "session_hash" if !value.is_empty() => session_hash = Some(value.into_owned()),
            _ => {}
        }
    }

    GenerationJob::new(
        fn_index,
        session_hash.unwrap_or_else(sdq_core::session_hash::session_hash),
        config.inputs.clone(),
    )
    .with_trigger_id(config.trigger_id)
}

/// Streamed joins identify the caller in the query string. The
/// `fn_index` and `session_hash` pairs are always the job's, so the join
/// and the out-of-band post name the same session; other pairs are kept.
fn session_base(config: &RunnerConfig, job: &GenerationJob) -> Url {
    let mut url = config.base_url.clone();
    if config.transport == TransportMode::Streamed {
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != "fn_index" && key != "session_hash")
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair("fn_index", &job.fn_index().to_string())
            .append_pair("session_hash", job.session_hash());
    }
    url
}

/// Error for a session stopped by its token: the caller's cancellation,
/// or else the watchdog.
fn stop_reason(config: &RunnerConfig, cancel: &CancellationToken) -> RunError {
    if cancel.is_cancelled() {
        RunError::Session(SessionError::Cancelled)
    } else {
        RunError::Timeout(config.session_timeout)
    }
}

fn is_absolute(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}
