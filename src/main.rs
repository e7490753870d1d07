mod cache;
mod config;
mod error;
mod net;
mod queue;
mod store;
mod sync;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use cache::{CacheManager, ChatMessage};
use chrono::Utc;
use config::Config;
use net::{NetworkMonitor, RemoteClient};
use queue::{PendingItem, UploadQueue};
use store::PersistentStore;
use sync::{SyncCoordinator, SyncEvent, SyncOutcome};

#[derive(Parser, Debug)]
#[command(name = "satchel")]
#[command(about = "Offline-first upload queue and document cache for a single-user client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/satchel/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Inspect or extend the pending upload queue
  Queue {
    #[command(subcommand)]
    action: QueueAction,
  },
  /// Queue an outgoing chat message
  Send {
    /// Originating agent identifier
    agent: String,
    /// Message body as JSON (or a bare string)
    body: String,
  },
  /// Run one drain pass against the remote API
  Sync,
  /// Refresh the local cache from the remote document listing
  Pull,
  /// Inspect the local document cache
  Docs {
    #[command(subcommand)]
    action: DocsAction,
  },
  /// List cached chat history
  Chat,
  /// Show connectivity and pending counts
  Status,
  /// Stay resident: probe connectivity, sync on reconnect, evict on a timer
  Watch,
}

#[derive(Subcommand, Debug)]
enum QueueAction {
  /// Queue a file for upload once connectivity returns
  Add {
    file: PathBuf,
    /// Title sent with the upload (defaults to the file name)
    #[arg(short, long)]
    title: Option<String>,
    /// Tags, in display order; repeatable
    #[arg(short = 'g', long = "tag")]
    tags: Vec<String>,
  },
  /// List pending items
  List,
  /// Remove a pending item by id
  Remove { id: String },
}

#[derive(Subcommand, Debug)]
enum DocsAction {
  /// List cached documents
  List,
  /// Print one cached document by id
  Show { id: String },
  /// Case-insensitive local search over title, content, and tags
  Search { query: String },
  /// Evict cache entries older than the configured age
  Gc,
}

/// Everything the subcommands operate on.
struct Subsystem {
  queue: UploadQueue,
  cache: CacheManager,
  monitor: NetworkMonitor,
  client: RemoteClient,
  coordinator: Arc<SyncCoordinator<RemoteClient>>,
}

impl Subsystem {
  fn build(config: &Config) -> Result<Self> {
    let store_path = config.store_path()?;
    let store = Arc::new(PersistentStore::open_at(&store_path)?);

    let queue = UploadQueue::new(Arc::clone(&store));
    let cache = CacheManager::new(store);
    let monitor = NetworkMonitor::new(
      &config.remote.url,
      Duration::from_secs(config.remote.probe_timeout_secs),
    )?;
    let client = RemoteClient::new(&config.remote.url)?;
    let coordinator = Arc::new(SyncCoordinator::new(queue.clone(), client.clone()));

    Ok(Self {
      queue,
      cache,
      monitor,
      client,
      coordinator,
    })
  }
}

fn init_tracing(log_dir: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard> {
  std::fs::create_dir_all(log_dir)?;

  let appender = tracing_appender::rolling::daily(log_dir, "satchel.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let log_dir = config
    .store_path()?
    .parent()
    .map(|p| p.join("logs"))
    .ok_or_else(|| eyre!("store path has no parent directory"))?;
  let _log_guard = init_tracing(&log_dir)?;

  let subsystem = Subsystem::build(&config)?;

  match args.command {
    Command::Queue { action } => run_queue(&subsystem, action),
    Command::Send { agent, body } => run_send(&subsystem, &agent, &body),
    Command::Sync => run_sync(&subsystem).await,
    Command::Pull => run_pull(&subsystem).await,
    Command::Docs { action } => run_docs(&subsystem, &config, action),
    Command::Chat => run_chat(&subsystem),
    Command::Status => run_status(&subsystem).await,
    Command::Watch => run_watch(&subsystem, &config).await,
  }
}

fn run_queue(subsystem: &Subsystem, action: QueueAction) -> Result<()> {
  match action {
    QueueAction::Add { file, title, tags } => {
      let bytes = std::fs::read(&file)?;
      let title = match title {
        Some(t) => t,
        None => file
          .file_name()
          .map(|n| n.to_string_lossy().into_owned())
          .ok_or_else(|| eyre!("cannot derive a title from {}", file.display()))?,
      };

      let id = subsystem.queue.enqueue_upload(bytes, &title, tags)?;
      println!("queued {}", id);
    }
    QueueAction::List => {
      for item in subsystem.queue.list()? {
        match &item {
          PendingItem::Upload(u) => {
            println!(
              "{}  upload   {}  ({} bytes, tags: {})",
              u.id,
              u.title,
              u.file.len(),
              u.tags.join(", ")
            );
          }
          PendingItem::Message(m) => {
            println!("{}  message  from {}", m.id, m.agent);
          }
        }
      }
    }
    QueueAction::Remove { id } => {
      subsystem.queue.remove(&id)?;
      println!("removed {} (if it was present)", id);
    }
  }

  Ok(())
}

fn run_send(subsystem: &Subsystem, agent: &str, body: &str) -> Result<()> {
  // Accept either proper JSON or a bare string for convenience.
  let body = serde_json::from_str(body).unwrap_or_else(|_| serde_json::Value::String(body.into()));

  let id = subsystem.queue.enqueue_message(agent, body.clone())?;

  // Local echo into chat history, so the message shows up before it syncs.
  subsystem.cache.record_message(ChatMessage {
    id: id.clone(),
    agent: agent.to_string(),
    body,
    sent_at: Utc::now(),
    cached_at: Utc::now(),
  })?;

  println!("queued {}", id);
  Ok(())
}

async fn run_sync(subsystem: &Subsystem) -> Result<()> {
  match subsystem.coordinator.sync_now().await? {
    SyncOutcome::AlreadyRunning => println!("a sync pass is already in flight"),
    SyncOutcome::Completed {
      attempted,
      synced,
      pending_left,
    } => {
      println!(
        "attempted {}, synced {}, {} still pending",
        attempted, synced, pending_left
      );
    }
  }

  Ok(())
}

async fn run_pull(subsystem: &Subsystem) -> Result<()> {
  let docs = subsystem.client.fetch_documents().await?;
  let count = docs.len();

  for doc in docs {
    subsystem.cache.upsert(doc)?;
  }

  println!("cached {} documents", count);
  Ok(())
}

fn run_chat(subsystem: &Subsystem) -> Result<()> {
  for msg in subsystem.cache.messages()? {
    println!("[{}] {}: {}", msg.sent_at, msg.agent, msg.body);
  }
  Ok(())
}

fn run_docs(subsystem: &Subsystem, config: &Config, action: DocsAction) -> Result<()> {
  match action {
    DocsAction::List => {
      for doc in subsystem.cache.get_all()? {
        println!("{}  {}  (cached {})", doc.id, doc.title, doc.cached_at);
      }
    }
    DocsAction::Show { id } => match subsystem.cache.get(&id)? {
      Some(doc) => {
        println!("{}  (tags: {})", doc.title, doc.tags.join(", "));
        println!("{}", doc.content);
      }
      None => println!("no cached document with id {}", id),
    },
    DocsAction::Search { query } => {
      for doc in subsystem.cache.search(&query)? {
        println!("{}  {}", doc.id, doc.title);
      }
    }
    DocsAction::Gc => {
      let evicted = subsystem.cache.evict_older_than(config.cache.max_age_days)?;
      println!("evicted {} entries", evicted);
    }
  }

  Ok(())
}

async fn run_status(subsystem: &Subsystem) -> Result<()> {
  let reachable = subsystem.monitor.probe_and_update().await;
  let pending = subsystem.queue.pending_count()?;
  let cached = subsystem.cache.get_all()?.len();

  println!("remote:   {}", if reachable { "reachable" } else { "unreachable" });
  println!("pending:  {}", pending);
  println!("cached:   {} documents", cached);

  Ok(())
}

async fn run_watch(subsystem: &Subsystem, config: &Config) -> Result<()> {
  let _evictor = subsystem.cache.spawn_evictor(
    config.cache.max_age_days,
    Duration::from_secs(config.cache.evict_interval_hours * 3600),
  );
  let _trigger =
    Arc::clone(&subsystem.coordinator).spawn_online_trigger(subsystem.monitor.subscribe());

  let mut events = subsystem.coordinator.subscribe();
  let mut probe_timer = tokio::time::interval(Duration::from_secs(30));
  let mut sync_timer = tokio::time::interval(Duration::from_secs(config.sync.interval_secs));

  println!("watching; press ctrl-c to stop");

  loop {
    tokio::select! {
      _ = probe_timer.tick() => {
        subsystem.monitor.probe_and_update().await;
      }
      _ = sync_timer.tick() => {
        if subsystem.monitor.is_online() && !subsystem.coordinator.is_syncing() {
          if let Err(e) = subsystem.coordinator.sync_now().await {
            warn!(error = %e, "periodic sync pass failed");
          }
        }
      }
      event = events.recv() => {
        match event {
          Ok(SyncEvent::UploadSynced { id }) => println!("synced upload {}", id),
          Ok(SyncEvent::MessageSynced { id }) => println!("synced message {}", id),
          Ok(SyncEvent::SyncComplete { completed_at, pending_left }) => {
            println!("sync complete at {} ({} pending)", completed_at, pending_left);
          }
          // Lagged or closed; keep watching.
          Err(_) => {}
        }
      }
      _ = tokio::signal::ctrl_c() => {
        println!("stopping");
        break;
      }
    }
  }

  Ok(())
}
