//! Alertcast - emergency alert ingestion and on-air scheduling.
//!
//! Connects to a CAP alert stream such as Canada's NAAD network, keeps track
//! of the alerts concerning the station and airs them through the playback
//! queue, with triggers run around each play cycle.
//!
//! # Configuration
//!
//! Create a `config.yaml` file with your settings:
//!
//! ```yaml
//! location:
//!   kind: CA
//!   geocodes: ["3520005"]
//!
//! playback:
//!   repeat_interval: 30
//!   repeat_times: 2
//!   play_moderates: true
//!
//! language:
//!   primary: english
//!   primary_voice: en
//!   secondary: french
//!   secondary_voice: fr
//!
//! triggers:
//!   - name: relay
//!     on_start: ["relayctl", "on"]
//!     on_stop: ["relayctl", "off"]
//! ```
//!
//! Override any value with environment variables prefixed by `ALERTCAST_`:
//!
//! ```bash
//! export ALERTCAST_TTS__AWS_ACCESS_KEY_ID="..."
//! export ALERTCAST_TTS__AWS_SECRET_ACCESS_KEY="..."
//! export ALERTCAST_TTS__AWS_REGION="ca-central-1"
//! ```
//!
//! # Usage
//!
//! ```bash
//! alertcast --config config.yaml --data /var/lib/alertcast
//! alertcast --config config.yaml --data /var/lib/alertcast --inject test-alert.xml
//! ```
//!
//! # Runtime Behavior
//!
//! Three tasks run until Ctrl-C:
//!
//! 1. **Feed Task**: reads the alert stream, reconnecting on failure
//! 2. **Processor Task**: handles incoming alerts and schedules play cycles
//! 3. **Playback Task**: airs the queued requests
//!
//! `RUST_LOG` controls the logging level (default: `info`).

use std::{path::PathBuf, sync::Arc};

use alertcast::{
    config::Config,
    feed::{FeedConnection, FeedLink},
    http::ReqwestFetcher,
    media::{
        MediaGenerator,
        tts::{EspeakSynthesizer, PollySynthesizer, SpeechRouter},
    },
    playback::QueuePlaybackController,
    processor::{
        AlertProcessor, FIRST_NATIONS_DIR, HeartbeatWatchdog, IntakeQueue, ProcessorSettings,
        SoxAlarm,
    },
    triggers::{CommandTrigger, Trigger, TriggerSet},
};
use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::{error, info};
use tokio_util::sync::CancellationToken;

/// Command-line arguments of alertcast.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Path to the data directory.
    ///
    /// This directory contains:
    /// - `alerts/` - raw alert XML and generated media
    /// - `media/` - attention signal
    /// - `first_nations/` - pre-recorded first nations messages
    #[arg(short, long)]
    data: PathBuf,

    /// Test alert file to air once at startup. May be repeated.
    #[arg(short, long)]
    inject: Vec<PathBuf>,
}

#[tokio::main]
async fn main() {
    // Put logger at info level by default
    let env = Env::default().filter_or("RUST_LOG", "info");
    env_logger::init_from_env(env);

    info!("starting alertcast {}...", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load config file {}", args.config.display()))?;
    let settings = ProcessorSettings::from_config(&config, &args.data);
    tokio::fs::create_dir_all(&settings.alerts_dir)
        .await
        .with_context(|| format!("failed to create {}", settings.alerts_dir.display()))?;

    let cloud = match config.tts.aws_credentials() {
        Some((key_id, secret, region)) => {
            info!("cloud voices enabled in {}", region);
            Some(PollySynthesizer::new(key_id, secret, region).await)
        }
        None => None,
    };
    let media = MediaGenerator::new(
        SpeechRouter::new(EspeakSynthesizer::new(), cloud),
        &settings.alerts_dir,
        args.data.join(FIRST_NATIONS_DIR),
        settings.playback.truncate,
    );

    let triggers = TriggerSet::new(
        config
            .triggers
            .iter()
            .map(|trigger| Box::new(CommandTrigger::new(trigger)) as Box<dyn Trigger>)
            .collect(),
    );
    info!("{} trigger(s) configured", triggers.len());

    let controller = Arc::new(QueuePlaybackController::new("alerts", 100));
    let link = Arc::new(FeedLink::new());
    let intake = Arc::new(IntakeQueue::new());
    let feed = FeedConnection::new(
        &config.feed,
        &settings.alerts_dir,
        link.clone(),
        intake.clone(),
    );
    let processor = Arc::new(AlertProcessor::new(
        settings,
        ReqwestFetcher::new(),
        media,
        controller.clone(),
        triggers,
        HeartbeatWatchdog::new(link, Box::new(SoxAlarm)),
        intake,
    ));

    for path in &args.inject {
        if let Err(e) = processor.inject_alert(path).await {
            error!("failed to inject {}: {}", path.display(), e);
        }
    }

    let cancel = CancellationToken::new();
    let tasks = [
        tokio::spawn({
            let cancel = cancel.clone();
            async move { feed.run(cancel).await }
        }),
        tokio::spawn({
            let processor = Arc::clone(&processor);
            let cancel = cancel.clone();
            async move { processor.run(cancel).await }
        }),
        tokio::spawn({
            let controller = Arc::clone(&controller);
            let cancel = cancel.clone();
            async move { controller.run(cancel).await }
        }),
    ];

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down...");
    cancel.cancel();

    for task in tasks {
        if let Err(e) = task.await {
            error!("task failed: {}", e);
        }
    }
    Ok(())
}
