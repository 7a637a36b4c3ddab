//! `medflow-client` -- headless clinical session.
//!
//! Opens an authenticated session against the EMR backend, keeps the
//! notification channel alive and logs the status events it receives.
//! With `submit` it also sends one inference job and prints the outcome.
//!
//! See [`ClientConfig::from_env`] for the environment variables. Set
//! `LOG_FORMAT=json` for JSON log lines.

use std::sync::Arc;

use anyhow::Context;
use medflow_client::cli::{self, Command};
use medflow_client::config::ClientConfig;
use medflow_client::supervisor;
use medflow_core::job::JobState;
use medflow_realtime::api::{ClinicalApi, HttpApi, JobRequest};
use medflow_realtime::client::PushClient;
use medflow_realtime::session::Session;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let command = cli::parse(std::env::args().skip(1)).unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(2);
    });

    let config = ClientConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        api_url = %config.api_url,
        ws_url = %config.ws_url,
        authenticated = config.token.is_some(),
        "Starting medflow-client",
    );

    if let Err(e) = run(config, command).await {
        tracing::error!(error = format!("{e:#}"), "medflow-client failed");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "medflow_client=info,medflow_realtime=info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run(config: ClientConfig, command: Command) -> anyhow::Result<()> {
    let http = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()
        .context("Failed to build HTTP client")?;
    let api: Arc<dyn ClinicalApi> = Arc::new(HttpApi::with_client(
        http,
        config.api_url.clone(),
        config.token.clone(),
    ));

    let session = Session::start(
        api,
        PushClient::new(&config.ws_url),
        config.token.clone(),
        config.session_config(),
    )
    .await
    .context("Failed to start session")?;
    tracing::info!(session_id = %session.id(), "Session started");

    let supervise = supervisor::run(Arc::clone(&session));
    tokio::pin!(supervise);

    let result = match command {
        Command::Listen => {
            tokio::select! {
                _ = &mut supervise => Ok(()),
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted, shutting down");
                    Ok(())
                }
            }
        }
        Command::Submit(request) => {
            tokio::select! {
                _ = &mut supervise => Ok(()),
                outcome = submit_and_wait(&session, request) => outcome,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted before the job finished");
                    Ok(())
                }
            }
        }
    };

    session.shutdown().await;
    result
}

async fn submit_and_wait(session: &Session, request: JobRequest) -> anyhow::Result<()> {
    let submission = session
        .gateway()
        .submit(request)
        .await
        .context("Submission failed")?;
    if let Some(job_id) = submission.job_id() {
        tracing::info!(job_id = %job_id, "Job accepted, waiting for the result");
    }

    let job = submission.wait().await;
    let outcome = serde_json::json!({
        "job_id": job.job_id(),
        "state": job.state(),
        "cached": job.cached(),
        "result": job.result(),
        "error": job.error(),
    });
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    match job.state() {
        JobState::Completed => Ok(()),
        JobState::Failed => anyhow::bail!(job.error().unwrap_or("job failed").to_string()),
        _ => anyhow::bail!("Session ended before the job finished"),
    }
}
