//! Threadrelay CLI entry point.

use anyhow::Context as _;
use clap::Parser;
use futures::StreamExt as _;
use threadrelay::assistant::OpenAiAssistantClient;
use threadrelay::config::{Config, TelemetryConfig};
use threadrelay::conversation::ConversationMap;
use threadrelay::messaging::{Messaging, SlackAdapter};
use threadrelay::orchestrator::RunOrchestrator;
use threadrelay::router::EventRouter;

use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;

#[derive(Parser)]
#[command(name = "threadrelay")]
#[command(about = "Relays Slack threads to an OpenAI Assistant")]
struct Cli {
    /// Read environment variables from this file instead of `./.env`
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("failed to load env file {}", path.display()))?;
        }
        // A missing ./.env is fine; the process environment may be complete.
        None => {
            let _ = dotenvy::dotenv();
        }
    }

    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(error) => {
            let logging = threadrelay::logging::init_tracing(cli.debug, None, &TelemetryConfig::default());
            tracing::error!(%error, "cannot start relay");
            logging.shutdown();
            return Err(error).context("failed to load configuration from environment");
        }
    };

    let logging = threadrelay::logging::init_tracing(
        cli.debug,
        config.log_dir.as_deref(),
        &config.telemetry,
    );

    let result = run(config).await;
    if let Err(error) = &result {
        tracing::error!(error = %format!("{error:#}"), "relay stopped with an error");
    }

    logging.shutdown();
    result
}

async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!("starting threadrelay");

    // In-flight runs finish or time out within this window after shutdown.
    let drain_timeout = config.run.run_timeout + config.openai.request_timeout;

    let slack = Arc::new(
        SlackAdapter::new(&config.slack.bot_token, &config.slack.app_token)
            .context("failed to create slack adapter")?,
    );
    let bot_user_id = slack
        .resolve_bot_user_id()
        .await
        .context("failed to resolve slack bot user id")?;

    let assistant = Arc::new(
        OpenAiAssistantClient::new(
            &config.openai.api_key,
            &config.openai.base_url,
            config.openai.request_timeout,
        )
        .context("failed to create assistant client")?,
    );

    tracing::info!(
        bot_user_id = %bot_user_id,
        assistant_id = %config.openai.assistant_id,
        policy = ?config.message_policy,
        poll_interval = ?config.run.poll_interval,
        run_timeout = ?config.run.run_timeout,
        "relay configured"
    );

    let orchestrator = Arc::new(
        RunOrchestrator::new(
            slack.clone(),
            assistant,
            Arc::new(ConversationMap::in_memory()),
            config.openai.assistant_id.clone(),
            config.run,
        )
        .with_placeholder_text(config.placeholder_text.clone()),
    );
    let router = Arc::new(EventRouter::new(
        orchestrator,
        Some(bot_user_id),
        config.message_policy,
    ));

    slack
        .health_check()
        .await
        .context("slack API health check failed")?;
    let mut events = slack.start().await.context("failed to start slack adapter")?;

    tracing::info!(adapter = slack.name(), "threadrelay started");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else {
                    tracing::warn!("inbound event stream closed");
                    break;
                };
                let router = router.clone();
                in_flight.spawn(async move {
                    router.dispatch(event).await;
                });
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(error) = joined {
                    tracing::error!(%error, "event task failed");
                }
            }
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    tracing::info!("shutting down...");
    if let Err(error) = slack.shutdown().await {
        tracing::warn!(%error, "slack adapter shutdown failed");
    }

    if !in_flight.is_empty() {
        tracing::info!(pending = in_flight.len(), "waiting for in-flight requests");
        let drained = tokio::time::timeout(drain_timeout, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(pending = in_flight.len(), "in-flight requests did not finish, aborting");
            in_flight.abort_all();
        }
    }
    tracing::info!("threadrelay stopped");
    Ok(())
}
