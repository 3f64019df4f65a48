//! Operator shell: a line REPL over the charge point engine.
//!
//! The shell is a thin façade; everything protocol-relevant happens in
//! `station-engine` and is observed here through the event stream.

use anyhow::{Context, Result};
use clap::Parser;
use station_engine::store::{FileStore, KvStore};
use station_engine::{ChargePoint, EngineConfig, EngineEvent, Settings};
use station_types::v16::AvailabilityType;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "station", about = "OCPP 1.6 charge point simulator")]
struct Args {
    /// Central System base URL (with trailing slash)
    #[arg(long)]
    url: Option<String>,

    /// Charge point identifier
    #[arg(long)]
    cp_id: Option<String>,

    /// Default idTag
    #[arg(long)]
    tag: Option<String>,

    /// Durable settings file
    #[arg(long, default_value = "station-settings.json")]
    store: PathBuf,

    /// Engine configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seconds to wait before executing a RemoteStartTransaction
    #[arg(long)]
    remote_start_delay: Option<u64>,

    /// Reply to RemoteStart/RemoteStop: Accepted or Rejected
    #[arg(long)]
    remote_response: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<EngineConfig>(&raw)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => EngineConfig::default(),
    };

    let durable: Arc<dyn KvStore> = Arc::new(FileStore::open(&args.store)?);
    let mut settings = Settings::load(durable.as_ref());
    if let Some(url) = args.url {
        settings.ws_url = url;
    }
    if let Some(cp_id) = args.cp_id {
        settings.cp_id = cp_id;
    }
    if let Some(tag) = args.tag {
        settings.tag = tag;
    }

    config.ws_url = settings.ws_url.clone();
    config.cp_id = settings.cp_id.clone();
    config.default_id_tag = settings.tag.clone();
    if let Some(delay) = args.remote_start_delay {
        config.remote_start_delay_secs = delay;
    }
    if let Some(response) = &args.remote_response {
        config.remote_start_stop_response = response
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
    }

    let cp = ChargePoint::with_durable_store(config, Arc::clone(&durable));

    let mut events = cp.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                EngineEvent::Log { message } => println!("{message}"),
                EngineEvent::StatusChanged { status, detail } => match detail {
                    Some(detail) => println!("* status {status} ({detail})"),
                    None => println!("* status {status}"),
                },
                EngineEvent::AvailabilityChanged {
                    connector_id,
                    availability,
                } => println!("* connector {connector_id} now {availability}"),
                EngineEvent::MeterValueChanged { meter_value_wh } => {
                    println!("* meter {meter_value_wh} Wh")
                }
            }
        }
    });

    println!("station ready; type 'help' for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else { continue };
        let rest: Vec<&str> = parts.collect();

        let outcome = run_command(&cp, durable.as_ref(), &mut settings, command, &rest).await;
        match outcome {
            Ok(true) => break,
            Ok(false) => {}
            Err(e) => println!("error: {e}"),
        }
    }

    cp.disconnect().await;
    Ok(())
}

/// Execute one REPL command; returns Ok(true) to quit
async fn run_command(
    cp: &ChargePoint,
    durable: &dyn KvStore,
    settings: &mut Settings,
    command: &str,
    rest: &[&str],
) -> Result<bool> {
    match command {
        "help" => {
            println!("commands:");
            println!("  connect [url cp_id]      open the session");
            println!("  disconnect               close the session");
            println!("  auth [tag]               authorize a tag");
            println!("  start [tag [connector]]  start a transaction");
            println!("  stop [tag]               stop the running transaction");
            println!("  stopid <txid> [tag]      stop an explicit transaction");
            println!("  hb                       send a heartbeat");
            println!("  mv [connector]           send meter values");
            println!("  meter <wh> [push]        set the meter, optionally notify");
            println!("  status                   show engine state");
            println!("  conn <c>                 show a connector");
            println!("  avail <c> <kind>         set availability (Operative/Inoperative)");
            println!("  save                     persist settings");
            println!("  quit                     leave");
        }
        "connect" => {
            if let (Some(url), Some(cp_id)) = (rest.first(), rest.get(1)) {
                settings.ws_url = url.to_string();
                settings.cp_id = cp_id.to_string();
                settings.save(durable);
            }
            cp.connect(&settings.ws_url, &settings.cp_id).await?;
        }
        "disconnect" => cp.disconnect().await,
        "auth" => {
            let tag = rest.first().copied().unwrap_or(settings.tag.as_str());
            cp.authorize(tag).await?;
        }
        "start" => {
            let tag = rest.first().copied().unwrap_or(settings.tag.as_str());
            match rest.get(1) {
                Some(connector) => {
                    cp.start_transaction_on(tag, connector.parse()?, 0).await?;
                }
                None => cp.start_transaction(tag).await?,
            }
        }
        "stop" => {
            let tag = rest.first().copied().unwrap_or(settings.tag.as_str());
            cp.stop_transaction(tag).await?;
        }
        "stopid" => {
            let transaction_id = rest
                .first()
                .context("usage: stopid <txid> [tag]")?
                .parse()?;
            cp.stop_transaction_with_id(transaction_id, rest.get(1).copied())
                .await?;
        }
        "hb" => cp.send_heartbeat().await?,
        "mv" => {
            let connector_id = match rest.first() {
                Some(connector) => connector.parse()?,
                None => 0,
            };
            cp.send_meter_values(connector_id).await?;
        }
        "meter" => {
            let meter_value_wh = rest.first().context("usage: meter <wh> [push]")?.parse()?;
            let push = rest.get(1) == Some(&"push");
            cp.set_meter_value(meter_value_wh, push).await?;
        }
        "status" => {
            println!("status:      {}", cp.status());
            println!("meter:       {} Wh", cp.meter_value());
            match cp.transaction_id() {
                Some(id) => println!("transaction: {id}"),
                None => println!("transaction: none"),
            }
        }
        "conn" => {
            let connector_id: u32 = rest.first().context("usage: conn <c>")?.parse()?;
            println!(
                "connector {connector_id}: status {} availability {}",
                cp.connector_status(connector_id)?,
                cp.availability(connector_id)?
            );
        }
        "avail" => {
            let connector_id: u32 = rest.first().context("usage: avail <c> <kind>")?.parse()?;
            let availability: AvailabilityType = rest
                .get(1)
                .context("usage: avail <c> <Operative|Inoperative>")?
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;
            cp.set_availability(connector_id, availability).await?;
        }
        "save" => {
            settings.save(durable);
            println!("settings saved");
        }
        "quit" | "exit" => return Ok(true),
        other => println!("unknown command '{other}'; type 'help'"),
    }
    Ok(false)
}
