use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use qcache::{
  query_client, use_mutation, use_query, MutationOptions, QueryClient, QueryClientProvider,
  QueryConfig, QueryError, QueryOptions, QueryResult,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "qcache")]
#[command(about = "Walk through a cached users list: fetch, mutate, invalidate, refetch")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./qcache.yaml or $XDG_CONFIG_HOME/qcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Override the configured stale time, in milliseconds
  #[arg(long)]
  stale_time: Option<u64>,

  /// Simulated latency of the fake users API, in milliseconds
  #[arg(long, default_value_t = 200)]
  latency: u64,

  /// Make every users fetch fail
  #[arg(long)]
  fail: bool,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
  id: u32,
  name: String,
}

/// In-memory stand-in for a remote users endpoint.
#[derive(Clone)]
struct FakeUserApi {
  users: Arc<Mutex<Vec<User>>>,
  latency: Duration,
  fail: bool,
}

impl FakeUserApi {
  fn new(latency: Duration, fail: bool) -> Self {
    Self {
      users: Arc::new(Mutex::new(vec![User {
        id: 1,
        name: "Ann".to_string(),
      }])),
      latency,
      fail,
    }
  }

  async fn list(&self) -> Result<Vec<User>, QueryError> {
    tokio::time::sleep(self.latency).await;
    if self.fail {
      return Err(QueryError::new("users endpoint unavailable"));
    }
    let users = self
      .users
      .lock()
      .map_err(|e| QueryError::new(format!("Lock poisoned: {}", e)))?;
    Ok(users.clone())
  }

  async fn create(&self, name: String) -> Result<User, QueryError> {
    tokio::time::sleep(self.latency).await;
    let mut users = self
      .users
      .lock()
      .map_err(|e| QueryError::new(format!("Lock poisoned: {}", e)))?;
    let id = u32::try_from(users.len())
      .ok()
      .and_then(|n| n.checked_add(1))
      .ok_or_else(|| QueryError::new("User id space exhausted"))?;
    let user = User { id, name };
    users.push(user.clone());
    Ok(user)
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing(args.log_file.as_deref())?;

  let config = QueryConfig::load(args.config.as_deref())?;
  let config = match args.stale_time {
    Some(ms) => QueryConfig {
      stale_time_ms: ms,
      ..config
    },
    None => config,
  };
  info!(?config, "Starting");

  let api = FakeUserApi::new(Duration::from_millis(args.latency), args.fail);
  let client = QueryClient::with_config(config);
  QueryClientProvider::scope(client, run(api)).await
}

fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("qcache=info"));

  match log_file {
    Some(path) => {
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Log file path has no file name: {}", path.display()))?;
      let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
      };
      let appender = tracing_appender::rolling::never(dir, file_name);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      Ok(None)
    }
  }
}

async fn run(api: FakeUserApi) -> Result<()> {
  let client = query_client()?;

  let list_api = api.clone();
  let fetch_users = move || {
    let api = list_api.clone();
    async move { api.list().await }
  };
  let options = || {
    QueryOptions::new()
      .on_success(|users: &Vec<User>| info!(count = users.len(), "Users loaded"))
      .on_error(|e| info!(error = %e, "Users failed to load"))
  };

  let mut users = use_query(&client, "users", fetch_users.clone(), options());
  render(&users.result());
  render(&users.settled().await);
  if users.result().is_error {
    return Err(eyre!("Could not load users"));
  }

  let refetch = users.refetch();
  println!("refetch started, is_fetching={}", users.result().is_fetching);
  refetch.await;
  render(&users.result());

  let invalidate = client.clone();
  let create_api = api.clone();
  let create_user = use_mutation(
    move |name: String| {
      let api = create_api.clone();
      async move { api.create(name).await }
    },
    MutationOptions::new().on_success(move |user: &User, _: &String| {
      info!(id = user.id, "User created");
      invalidate.invalidate_queries("users");
    }),
  );

  let created = create_user.mutate("New User".to_string()).await?;
  println!(
    "created: {}",
    serde_json::to_string(&created).map_err(|e| eyre!("Failed to encode user: {}", e))?
  );

  // A fresh observer sees the invalidated entry and fetches again
  drop(users);
  let mut users = use_query(&client, "users", fetch_users, options());
  render(&users.settled().await);

  Ok(())
}

fn render(result: &QueryResult<Vec<User>>) {
  if result.is_loading {
    println!("Loading...");
    return;
  }
  if result.is_error {
    let message = result
      .error
      .as_ref()
      .map(|e| e.to_string())
      .unwrap_or_default();
    println!("Error: {}", message);
    return;
  }

  let users = result.data.as_deref().unwrap_or_default();
  match serde_json::to_string_pretty(users) {
    Ok(json) => println!("users (updated {}):\n{}", result.last_updated, json),
    Err(e) => println!("Error: {}", e),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_create_assigns_next_id() {
    let api = FakeUserApi::new(Duration::ZERO, false);
    let created = api.create("Bob".to_string()).await.unwrap();
    assert_eq!(created.id, 2);
    assert_eq!(api.list().await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_failing_list_is_an_error() {
    let api = FakeUserApi::new(Duration::ZERO, true);
    let err = api.list().await.unwrap_err();
    assert_eq!(err, QueryError::new("users endpoint unavailable"));
  }
}
