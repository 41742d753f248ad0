mod batch;
mod config;
mod conversation_state;
mod dispatcher;
mod error;
mod generator;
mod handlers;
mod openai_types;
mod orchestrator;
mod status_log;
mod telephony;
mod twilio_types;
mod types;

use crate::config::Config;
use crate::conversation_state::ConversationSettings;
use crate::dispatcher::Dispatcher;
use crate::error::{AppError, ConfigError};
use crate::generator::OpenAIGenerator;
use crate::orchestrator::Orchestrator;
use crate::status_log::CsvStatusLog;
use crate::telephony::TwilioClient;
use crate::types::{AppState, DispatchOutcome, DispatchRequest};

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

pub mod consts {
    pub const ANSWER_PATH: &str = "/answer";
    pub const OUTGOING_CALL_PATH: &str = "/outgoing_call";
    pub const SPEECH_PATH: &str = "/process_speech";
    pub const LISTEN_TIMEOUT_PATH: &str = "/listen_timeout";
    pub const STATUS_PATH: &str = "/call_status";

    pub const LISTEN_TIMEOUT_SECS: u16 = 3;
    pub const LISTEN_LANGUAGE: &str = "en-US";
    pub const SWEEP_INTERVAL_SECS: u64 = 60;

    pub const INBOUND_GREETING: &str = "Hello, thanks for calling. How can I help you today?";
    pub const OUTBOUND_GREETING: &str = "Hello, this is an automated assistant calling. How can I help you today?";
    pub const REPROMPT: &str = "I didn't catch that. Let's try again.";
    pub const APOLOGY: &str = "I'm sorry, I encountered an error while processing your request.";
    pub const CONTINUE_PROMPT: &str = "Is there anything else I can help you with?";
    pub const CLOSING_LINE: &str = "Thank you for calling. Goodbye!";
    pub const SYSTEM_PROMPT: &str = "You are a helpful phone assistant. Answer every question in a friendly manner, in no more than two short sentences.";
    pub const HEALTH_MESSAGE: &str =
        "AI Phone Call System is running! Configure your Twilio webhook to point to /answer";
}

#[derive(Parser)]
#[command(name = "phone-agent", about = "Voice call agent: answers calls and dials out")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the webhook server
    Serve,
    /// Place one call now
    Call {
        to: String,
        #[arg(long)]
        message: Option<String>,
        #[arg(long)]
        from: Option<String>,
    },
    /// Place calls from a CSV with columns `phone_number, message`
    Batch {
        csv: PathBuf,
        #[arg(long, default_value_t = 60)]
        delay_secs: u64,
        #[arg(long, default_value = ".")]
        log_dir: PathBuf,
    },
    /// Have the carrier place a call at a future time
    Schedule {
        to: String,
        /// RFC 3339 timestamp, e.g. 2026-10-17T15:00:00Z
        #[arg(long, value_parser = parse_timestamp)]
        at: OffsetDateTime,
        #[arg(long)]
        message: Option<String>,
    },
}

fn parse_timestamp(s: &str) -> Result<OffsetDateTime, String> {
    OffsetDateTime::parse(s, &Rfc3339).map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

#[tokio::main]
async fn main() {
    // a missing .env file is fine; the variables may come from the real environment
    let _ = dotenvy::dotenv();
    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_file(true)
                .with_line_number(true),
        )
        .with(tracing_subscriber::filter::Targets::new().with_targets([
            ("hyper", tracing_subscriber::filter::LevelFilter::OFF),
            ("phone_agent", tracing_subscriber::filter::LevelFilter::DEBUG),
        ]));
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install tracing subscriber: {e}");
    }

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(error=%e, "phone-agent failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let config = Config::from_env()?;
    let http_client = reqwest::Client::new();

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            token.cancel();
        }
    });

    match cli.command {
        Command::Serve => serve(config, http_client, shutdown).await,
        Command::Call { to, message, from } => {
            let dispatcher = outbound_dispatcher(&config, http_client)?;
            let request = DispatchRequest { to, message, from };
            let handle = dispatcher.originate(&request).await?;
            info!(call_sid=%handle.call_sid, to=%handle.to, status=%handle.status, "call placed");
            Ok(())
        }
        Command::Batch {
            csv,
            delay_secs,
            log_dir,
        } => {
            let dispatcher = outbound_dispatcher(&config, http_client)?;
            let requests = batch::read_batch_file(&csv)?;
            let (mut log, log_path) = batch::BatchLog::create_in(&log_dir)?;
            let outcomes = dispatcher
                .run_batch(
                    &requests,
                    Duration::from_secs(delay_secs),
                    &mut log,
                    &shutdown,
                )
                .await?;
            for outcome in &outcomes {
                match outcome {
                    DispatchOutcome::Initiated(handle) => {
                        info!(call_sid=%handle.call_sid, to=%handle.to, "initiated")
                    }
                    DispatchOutcome::Failed { to, reason } => warn!(to=%to, reason=%reason, "failed"),
                    DispatchOutcome::Skipped { reason } => warn!(reason=%reason, "skipped"),
                }
            }
            info!(path=%log_path.display(), rows=log.rows(), "call log saved");
            Ok(())
        }
        Command::Schedule { to, at, message } => {
            if at <= OffsetDateTime::now_utc() {
                warn!(at=%at, "scheduled time is not in the future");
            }
            let dispatcher = outbound_dispatcher(&config, http_client)?;
            let request = DispatchRequest {
                to,
                message,
                from: None,
            };
            let handle = dispatcher.schedule(&request, at).await?;
            info!(call_sid=%handle.call_sid, to=%handle.to, at=?handle.scheduled_for, "call scheduled with carrier");
            Ok(())
        }
    }
}

/// Checks outbound configuration before anything is dialed
fn outbound_dispatcher(
    config: &Config,
    http_client: reqwest::Client,
) -> Result<Dispatcher, ConfigError> {
    let outbound = config.outbound()?;
    let twilio = TwilioClient::new(http_client, outbound.account_sid, outbound.auth_token);
    Ok(Dispatcher::new(
        Arc::new(twilio),
        outbound.webhook_url,
        outbound.from_number,
    ))
}

async fn serve(
    config: Config,
    http_client: reqwest::Client,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let generator = OpenAIGenerator::new(
        http_client,
        config.openai_api_key()?.to_string(),
        config.openai_model.clone(),
        config.openai_timeout,
    );
    let status_log = CsvStatusLog::open(&config.status_log)?;
    let settings = ConversationSettings {
        system_prompt: consts::SYSTEM_PROMPT.to_string(),
        generation_timeout: config.openai_timeout,
        max_empty_turns: config.max_empty_turns.max(1),
    };
    let app_state = Arc::new(AppState {
        orchestrator: Orchestrator::new(Arc::new(generator), Arc::new(status_log), settings),
    });

    let sweeper_state = app_state.clone();
    let max_idle = config.session_idle;
    let token = shutdown.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(consts::SWEEP_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    sweeper_state.orchestrator.evict_idle(max_idle);
                }
                _ = token.cancelled() => break,
            }
        }
    });

    let app = handlers::router(app_state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(addr=%addr, status_log=%config.status_log.display(), "listening for carrier webhooks");
    axum::Server::try_bind(&addr)
        .map_err(|e| AppError::Server(e.to_string()))?
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Server(e.to_string()))
}
