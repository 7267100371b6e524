//! Pondside CLI entry point.
//!
//! Provides `start`, `snapshot`, and `dose` subcommands for running the
//! service, building one round of snapshots from storage, or evaluating
//! the dosing rules once.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use pondside::aggregator::Aggregator;
use pondside::api::{create_router, AppState};
use pondside::config::PondsideConfig;
use pondside::dosing::dispatch::AutoDoser;
use pondside::dosing::{self, ClarityVerdict, DoseInputs};
use pondside::ingest::{Ingestor, TankReading};
use pondside::notify::{FormLogin, HttpPoster, JsonPoster, Notifier, TokenSource};
use pondside::publisher::{CommandSink, MqttPublisher};
use pondside::state::SharedState;
use pondside::status::{build_pond_status, build_shrimp_size, format_timestamp, RecordStore, StatusCache};

/// Capacity of the inbound tank reading channel.
const INBOUND_CAPACITY: usize = 64;

/// How long `dose` waits for the broker before giving up.
const DOSE_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pondside: pond dosing controller and telemetry aggregator.
#[derive(Parser)]
#[command(name = "pondside", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the full service: HTTP ingestion, command channel and aggregation loop.
    Start,
    /// Build both snapshots for one pond from storage and print them.
    Snapshot {
        /// Pond to build.
        #[arg(long, default_value_t = 1)]
        pond: i64,
    },
    /// Evaluate the dosing rules once and print the resulting commands.
    Dose {
        /// Target pond.
        #[arg(long, default_value_t = 1)]
        pond: i64,
        /// Water pH.
        #[arg(long)]
        ph: f64,
        /// Water temperature, °C.
        #[arg(long)]
        temp: f64,
        /// Dissolved oxygen, mg/L.
        #[arg(long = "do", default_value_t = 5.0)]
        dissolved_oxygen: f64,
        /// Water colour classifier output.
        #[arg(long, default_value = "")]
        clarity: String,
        /// Pond size, rai (defaults to the configured size).
        #[arg(long)]
        size: Option<f64>,
        /// Print commands without publishing them.
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Start => handle_start().await,
        Command::Snapshot { pond } => handle_snapshot(pond).await,
        Command::Dose {
            pond,
            ph,
            temp,
            dissolved_oxygen,
            clarity,
            size,
            dry_run,
        } => {
            let inputs = DoseInputs {
                pond_id: pond,
                pond_size_rai: 0.0,
                ph,
                temperature: temp,
                dissolved_oxygen,
                clarity: ClarityVerdict::from_text(&clarity),
                now: Utc::now(),
            };
            handle_dose(inputs, size, dry_run).await
        }
    }
}

/// Run the service until Ctrl-C.
async fn handle_start() -> anyhow::Result<()> {
    let config = Arc::new(PondsideConfig::load().context("failed to load configuration")?);
    let _logging_guard = pondside::logging::init_service(&config.storage.logs_dir)?;

    let store = RecordStore::new(config.storage.root.clone(), config.storage.data_ponds_dir.clone());
    store.ensure_layout()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Command channel.
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<TankReading>(INBOUND_CAPACITY);
    let (publisher, supervisor) = MqttPublisher::new(&config.mqtt, inbound_tx);
    let supervisor_handle = tokio::spawn(supervisor.run(shutdown_rx.clone()));

    // Outbound HTTP.
    let http = HttpPoster::new(Duration::from_secs(config.alerts.timeout_secs))
        .context("failed to build HTTP client")?;
    let tokens: Arc<dyn TokenSource> = Arc::new(FormLogin::new(http.client().clone(), &config.alerts));
    let poster: Arc<dyn JsonPoster> = Arc::new(http);
    let notifier = Arc::new(Notifier::new(
        Arc::clone(&poster),
        tokens,
        config.alerts.clone(),
        config.aggregation.utc_offset_hours,
    ));

    // Shared state, doser, ingestion.
    let state = Arc::new(SharedState::new(&config.aggregation.ponds, config.heartbeat.timeout_secs));
    let sink: Arc<dyn CommandSink> = Arc::new(publisher);
    let doser = Arc::new(AutoDoser::new(
        config.dosing.clone(),
        Arc::clone(&state.cooldowns),
        sink,
    ));
    let ingestor = Arc::new(Ingestor::new(
        Arc::clone(&config),
        store.clone(),
        Arc::clone(&state),
        doser,
        Arc::clone(&notifier),
        Arc::clone(&poster),
    ));

    // Inbound tank readings from the controller.
    let tank_ingestor = Arc::clone(&ingestor);
    let inbound_handle = tokio::spawn(async move {
        while let Some(reading) = inbound_rx.recv().await {
            if let Err(e) = tank_ingestor.tank_reading(&reading, Utc::now()).await {
                warn!(pond_id = reading.pond_id, error = %e, "tank reading not stored");
            }
        }
    });

    // Aggregation loop.
    let aggregator = Aggregator::new(
        Arc::clone(&config),
        Arc::new(store.clone()),
        store,
        state,
        poster,
        notifier,
    );
    let aggregator_handle = tokio::spawn(aggregator.run(shutdown_rx.clone()));

    // HTTP server.
    let app = create_router(AppState::new(ingestor));
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    info!(bind = %config.server.bind, "pondside started");

    let mut server_shutdown = shutdown_rx.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        while server_shutdown.changed().await.is_ok() {
            if *server_shutdown.borrow() {
                break;
            }
        }
    });
    let server_handle = tokio::spawn(async move { server.await });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");
    if shutdown_tx.send(true).is_err() {
        warn!("no task was listening for shutdown");
    }

    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "http server stopped with error"),
        Err(e) => warn!(error = %e, "http server task panicked"),
    }
    if let Err(e) = aggregator_handle.await {
        warn!(error = %e, "aggregation task panicked");
    }
    if let Err(e) = supervisor_handle.await {
        warn!(error = %e, "command channel task panicked");
    }
    inbound_handle.abort();

    info!("pondside stopped");
    Ok(())
}

/// Build and print both snapshots for one pond.
async fn handle_snapshot(pond: i64) -> anyhow::Result<()> {
    pondside::logging::init_cli();
    let config = PondsideConfig::load().context("failed to load configuration")?;
    let store = RecordStore::new(config.storage.root.clone(), config.storage.data_ponds_dir.clone());

    let mut cache = StatusCache::new(pond);
    cache.refresh(&store).await;
    let timestamp = format_timestamp(Utc::now(), config.aggregation.utc_offset_hours);

    let output = serde_json::json!({
        "status": build_pond_status(&cache, timestamp.clone()),
        "shrimp_size": build_shrimp_size(&cache, timestamp),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Evaluate the rules once; optionally publish over a fresh connection.
async fn handle_dose(mut inputs: DoseInputs, size: Option<f64>, dry_run: bool) -> anyhow::Result<()> {
    pondside::logging::init_cli();
    let config = PondsideConfig::load().context("failed to load configuration")?;
    inputs.pond_size_rai = size.unwrap_or(config.dosing.default_pond_size_rai);

    let plan = dosing::evaluate(&config.dosing, &inputs, &Default::default());
    let commands = plan.commands();
    for command in &commands {
        println!("{}", serde_json::to_string(command)?);
    }
    if commands.is_empty() {
        println!("nothing to dose");
    }
    if dry_run || commands.is_empty() {
        return Ok(());
    }

    let (inbound_tx, _inbound_rx) = mpsc::channel(1);
    let (publisher, supervisor) = MqttPublisher::new(&config.mqtt, inbound_tx);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor_handle = tokio::spawn(supervisor.run(shutdown_rx));

    let connected = tokio::time::timeout(DOSE_CONNECT_TIMEOUT, async {
        while !publisher.is_connected() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await;
    if connected.is_err() {
        let _ = shutdown_tx.send(true);
        anyhow::bail!("broker {}:{} not reachable", config.mqtt.host, config.mqtt.port);
    }

    for command in &commands {
        publisher
            .publish(command)
            .await
            .with_context(|| format!("failed to publish {:?} command", command.kind()))?;
        println!("published {:?} for pond {}", command.kind(), command.pond_id());
    }

    // Give the event loop a moment to flush the QoS 1 publishes.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let _ = shutdown_tx.send(true);
    if let Err(e) = supervisor_handle.await {
        warn!(error = %e, "command channel task panicked");
    }
    Ok(())
}
