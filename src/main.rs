use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use fleetsync::api::{ApiClient, EntityId, EntityType, HttpTransport};
use fleetsync::cache::{LocalStore, SqliteStore};
use fleetsync::config::Config;
use fleetsync::sync::{Connectivity, DrainReport, SyncEvent, WriteOutcome};
use fleetsync::{logging, FleetClient};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "fleetsync")]
#[command(about = "Offline-first client for coffee machine fleet maintenance")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fleetsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Skip the connectivity check and work offline
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show the full dataset
  Data,
  /// List machines with their region and point
  Machines,
  /// Show one machine with its maintenance history
  Machine { id: String },
  Parts,
  Users,
  /// Refresh one region and merge it into the cached dataset
  SyncRegion { region_id: String },
  /// Create an entity from a JSON object
  Create { entity: EntityType, json: String },
  /// Update an entity from a JSON object
  Update {
    entity: EntityType,
    id: String,
    json: String,
  },
  Delete { entity: EntityType, id: String },
  /// Log a maintenance visit from a JSON object
  AddRecord { json: String },
  /// List writes waiting to be replayed
  Pending,
  /// Drop a queued write by sequence id
  Discard { seq: i64 },
  /// Replay queued writes now
  Drain,
  /// Run the replay worker until interrupted
  Worker,
  /// Clear cached data and queued writes
  Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log)?;

  let store: Arc<dyn LocalStore> = Arc::new(match &config.store.path {
    Some(path) => SqliteStore::open(path)?,
    None => SqliteStore::open_default()?,
  });
  let transport = Arc::new(HttpTransport::new(
    &config.server.url,
    config.server.timeout(),
  )?);
  let api = ApiClient::new(
    transport,
    &config.server.api_prefix,
    Config::get_api_token(),
  );

  let online = !args.offline && api.check_connectivity().await?;
  if !online {
    warn!("server unreachable, working offline");
  }
  let connectivity = Connectivity::new(online);
  let mut client = FleetClient::new(api, store, connectivity);

  match args.command {
    Command::Data => print_json(&client.get_all_data().await?.data),
    Command::Machines => {
      let result = client.get_all_data().await?;
      if let Some(at) = result.cached_at {
        eprintln!("offline: showing data cached at {}", at.format("%Y-%m-%d %H:%M"));
      }
      let data = &result.data;
      for m in &data.machines {
        let point = match &m.point_id {
          Some(id) => data.point_label(id),
          None => "-".to_string(),
        };
        println!(
          "{:>8}  {:<16} {} / {}",
          m.id,
          m.serial_number,
          data.region_label(&m.region_id),
          point
        );
      }
      Ok(())
    }
    Command::Machine { id } => {
      print_json(&client.get_machine_details(&EntityId::from(id.as_str())).await?.data)
    }
    Command::Parts => print_json(&client.get_parts().await?.data),
    Command::Users => print_json(&client.get_users().await?.data),
    Command::SyncRegion { region_id } => {
      print_json(&client.sync_region(&EntityId::from(region_id.as_str())).await?)
    }
    Command::Create { entity, json } => {
      let outcome = client
        .create_entity::<Value>(entity, parse_json(&json)?)
        .await?;
      report_write(outcome)
    }
    Command::Update { entity, id, json } => {
      let outcome = client
        .update_entity::<Value>(entity, &EntityId::from(id.as_str()), parse_json(&json)?)
        .await?;
      report_write(outcome)
    }
    Command::Delete { entity, id } => {
      let outcome = client
        .delete_entity(entity, &EntityId::from(id.as_str()))
        .await?;
      report_write(outcome)
    }
    Command::AddRecord { json } => {
      let outcome = client.add_maintenance_record(parse_json(&json)?).await?;
      report_write(outcome)
    }
    Command::Pending => {
      for m in client.pending_mutations()? {
        println!(
          "{:>6}  {}  {:<6} {}",
          m.seq,
          m.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
          m.method,
          m.resource_path
        );
      }
      Ok(())
    }
    Command::Discard { seq } => client.discard_mutation(seq).map_err(Into::into),
    Command::Drain => {
      if !online {
        return Err(eyre!("Cannot drain while offline"));
      }
      let report = client.replay_engine().drain().await?;
      println!("{} change(s) uploaded", report.replayed());
      if !matches!(report, DrainReport::Completed { .. }) {
        println!("{:?}", report);
      }
      Ok(())
    }
    Command::Worker => run_worker(&mut client, config.sync.retry_interval()).await,
    Command::Logout => client.clear_local_state().map_err(Into::into),
  }
}

/// Keep the replay worker running and re-check connectivity between drains.
async fn run_worker(
  client: &mut FleetClient,
  retry_interval: Option<std::time::Duration>,
) -> Result<()> {
  let task = client.start_replay_worker(retry_interval);
  let mut events = client.subscribe();
  let check_every = retry_interval.unwrap_or(std::time::Duration::from_secs(30));
  let mut recheck = tokio::time::interval(check_every);

  info!(pending = client.pending_count()?, "worker running; Ctrl-C to stop");
  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      _ = recheck.tick() => {
        let online = client.api().check_connectivity().await?;
        client.connectivity().set_online(online);
      }
      event = events.recv() => match event {
        Ok(SyncEvent::SyncComplete { replayed }) => {
          println!("sync complete: {} change(s) uploaded", replayed)
        }
        Ok(SyncEvent::DrainHalted { seq, reason }) => {
          println!("sync halted at #{}: {}", seq, reason)
        }
        Err(e) => warn!(error = %e, "missed sync events"),
      },
    }
  }

  if let Some(handle) = client.replay_handle() {
    handle.shutdown();
  }
  task
    .await
    .map_err(|e| eyre!("Replay worker panicked: {}", e))?;
  Ok(())
}

fn parse_json(raw: &str) -> Result<Value> {
  serde_json::from_str(raw).map_err(|e| eyre!("Invalid JSON argument: {}", e))
}

fn report_write<T: Serialize>(outcome: WriteOutcome<T>) -> Result<()> {
  if let WriteOutcome::Queued { seq, .. } = &outcome {
    eprintln!("offline: queued as #{}", seq);
  }
  print_json(outcome.value())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
