mod cache;
mod config;
mod error;
mod gateway;
mod remote;
mod router;
mod store;
mod sync;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use url::Url;

use crate::gateway::{Gateway, Response};
use crate::remote::types::{Restaurant, Review};
use crate::router::{Request, Strategy};

#[derive(Parser, Debug)]
#[command(name = "outpost")]
#[command(about = "Offline-first caching and sync gateway for the restaurant reviews service")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/outpost/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Route one request through the gateway and print the response
  Fetch {
    /// Request URL
    url: String,

    /// HTTP method
    #[arg(short, long, default_value = "GET")]
    method: String,

    /// JSON request body
    #[arg(short, long)]
    body: Option<String>,
  },
  /// Replay queued offline writes now
  Sync,
  /// List queued offline writes
  Pending,
  /// Drop cache buckets that fell out of the current allow-list
  Gc,
  /// Run the recurring replay trigger, printing sync status messages
  Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_tracing();

  let config = config::Config::load(args.config.as_deref())?;
  let gateway = Gateway::open(config)?;

  match args.command {
    Command::Fetch { url, method, body } => fetch(&gateway, &url, &method, body).await,
    Command::Sync => sync_now(&gateway).await,
    Command::Pending => pending(&gateway),
    Command::Gc => gc(&gateway),
    Command::Watch => watch(&gateway).await,
  }
}

/// Logs go to a file so command output stays clean.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
  let data_dir = dirs::data_dir().or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))?;
  let appender =
    tracing_appender::rolling::daily(data_dir.join("outpost").join("logs"), "outpost.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = tracing_subscriber::EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("outpost=info"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Some(guard)
}

async fn fetch(gateway: &Gateway, url: &str, method: &str, body: Option<String>) -> Result<()> {
  gateway.startup().await;

  let url = Url::parse(url).map_err(|e| eyre!("Bad url {}: {}", url, e))?;
  let method = method
    .to_uppercase()
    .parse::<reqwest::Method>()
    .map_err(|_| eyre!("Bad method: {}", method))?;
  let request = Request {
    method,
    url,
    body: body.map(String::into_bytes),
  };

  let strategy = gateway.classify(&request);
  let response = gateway.handle(request).await?;
  print_response(&strategy, &response);
  Ok(())
}

fn print_response(strategy: &Strategy, response: &Response) {
  println!("status: {}  origin: {:?}", response.status, response.origin);

  // Typed summaries for the data endpoints, raw body otherwise
  match strategy {
    Strategy::Restaurants => {
      if let Ok(restaurants) = serde_json::from_slice::<Vec<Restaurant>>(&response.body) {
        for r in restaurants {
          let favorite = if r.is_favorite() { "*" } else { " " };
          let neighborhood = r.neighborhood.as_deref().unwrap_or("-");
          println!("{:>4} {} {}  ({})", r.id, favorite, r.name, neighborhood);
        }
        return;
      }
    }
    Strategy::Reviews { .. } => {
      if let Ok(reviews) = serde_json::from_slice::<Vec<Review>>(&response.body) {
        for r in reviews {
          println!("{}/5 {} - {}", r.rating, r.name, r.comments);
        }
        return;
      }
    }
    _ => {}
  }

  match std::str::from_utf8(&response.body) {
    Ok(text) => println!("{}", text),
    Err(_) => println!("<{} bytes>", response.body.len()),
  }
}

async fn sync_now(gateway: &Gateway) -> Result<()> {
  let report = gateway.sync().replay_all().await?;
  println!("replayed: {}  still queued: {}", report.replayed, report.failed);
  Ok(())
}

fn pending(gateway: &Gateway) -> Result<()> {
  let pending = gateway.store().list_pending_mutations()?;
  if pending.is_empty() {
    println!("no pending writes");
    return Ok(());
  }
  for m in pending {
    println!("{:>4}  {}  {}", m.id, m.kind.label(), m.created_at.to_rfc3339());
  }
  Ok(())
}

fn gc(gateway: &Gateway) -> Result<()> {
  let removed = gateway.collect_garbage()?;
  if removed.is_empty() {
    println!("nothing to remove");
  } else {
    for bucket in removed {
      println!("removed {}", bucket);
    }
  }
  Ok(())
}

async fn watch(gateway: &Gateway) -> Result<()> {
  gateway.startup().await;

  let sync = Arc::clone(gateway.sync());
  let mut status = sync.subscribe();
  let interval = Duration::from_secs(gateway.config().sync.replay_interval_secs);
  let trigger = sync.spawn_replay_trigger(interval);
  trigger.fire();

  println!(
    "watching; replaying every {}s (ctrl-c to exit)",
    interval.as_secs()
  );
  loop {
    tokio::select! {
      message = status.recv() => match message {
        Ok(m) => println!("{}", m),
        Err(RecvError::Lagged(_)) => continue,
        Err(RecvError::Closed) => break,
      },
      _ = tokio::signal::ctrl_c() => break,
    }
  }
  Ok(())
}
