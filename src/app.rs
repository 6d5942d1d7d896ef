use crate::cache::{CacheResult, SqliteStorage};
use crate::commands::{self, Invocation};
use crate::config::Config;
use crate::event::{Event, EventHandler};
use crate::net::{Fetch, HttpClient, Request, Response};
use crate::worker::{MessageOutcome, Worker};
use color_eyre::Result;
use serde::Serialize;
use tracing::warn;

/// What an invocation produced
#[derive(Debug)]
pub enum Reply {
  Response(CacheResult<Response>),
  Text(String),
  Quit,
}

impl Reply {
  /// One-screen summary for the interactive host.
  pub fn render(&self) -> String {
    match self {
      Reply::Response(result) => {
        let mut out = format!(
          "HTTP {} via {} ({} bytes",
          result.data.status,
          result.source,
          result.data.body.len()
        );
        if let Some(content_type) = result.data.header("content-type") {
          out.push_str(&format!(", {}", content_type));
        }
        out.push(')');
        if let Some(cached_at) = result.cached_at {
          out.push_str(&format!(", cached {}", cached_at.format("%Y-%m-%d %H:%M:%S")));
        }
        let body = result.data.text();
        if !body.is_empty() {
          out.push('\n');
          out.push_str(&body);
        }
        out
      }
      Reply::Text(text) => text.clone(),
      Reply::Quit => String::new(),
    }
  }
}

fn json<T: Serialize>(value: &T) -> Result<Reply> {
  Ok(Reply::Text(serde_json::to_string_pretty(value)?))
}

/// Host around the single worker of this process
pub struct App<N: Fetch> {
  worker: Worker<N>,
}

impl App<HttpClient> {
  pub fn new(config: Config) -> Result<Self> {
    let storage = SqliteStorage::open(&config.database_path()?)?;
    let network = HttpClient::new(&config)?;
    Self::from_parts(config, storage, network)
  }
}

impl<N: Fetch> App<N> {
  pub fn from_parts(config: Config, storage: SqliteStorage, network: N) -> Result<Self> {
    Ok(Self {
      worker: Worker::new(config, storage, network)?,
    })
  }

  /// Bring the worker up. A failed install leaves it uncontrolled, and
  /// requests then go straight to the network.
  pub async fn start(&self) {
    if let Err(e) = self.worker.boot().await {
      warn!(error = %e, "Worker failed to start, requests will not be intercepted");
    }
  }

  /// Restore a previously activated version without touching the network.
  pub fn restore(&self) -> Result<()> {
    self.worker.restore()?;
    Ok(())
  }

  pub async fn execute(&self, invocation: Invocation) -> Result<Reply> {
    match invocation {
      Invocation::Install { force } => {
        if force {
          self.worker.install().await?;
          self.worker.activate()?;
        } else {
          self.worker.boot().await?;
        }
        let status = self.worker.status()?;
        Ok(Reply::Text(format!(
          "{} is {} ({} partitions)",
          status.version,
          status.state,
          status.partitions.len()
        )))
      }
      Invocation::Fetch {
        url,
        method,
        kind,
        body,
      } => {
        let mut request = Request::new(&method, self.worker.resolve(&url)?, kind);
        if let Some(body) = body {
          request = request
            .with_header("content-type", "application/json")
            .with_body(body);
        }
        let result = self.worker.handle_fetch(&request).await?;
        Ok(Reply::Response(result))
      }
      Invocation::Sync { tag } => {
        let report = self.worker.handle_sync(&tag).await?;
        Ok(Reply::Text(format!(
          "{}: {} replayed, {} remaining",
          tag, report.replayed, report.remaining
        )))
      }
      Invocation::Message { payload } => {
        let text = match self.worker.handle_message(&payload)? {
          MessageOutcome::Activated => format!("{} activated", self.worker.config().version),
          MessageOutcome::NothingWaiting => "No worker is waiting".to_string(),
          MessageOutcome::CachesCleared(names) if names.is_empty() => "No caches to clear".to_string(),
          MessageOutcome::CachesCleared(names) => format!("Cleared {}", names.join(", ")),
          MessageOutcome::Ignored => "Message ignored".to_string(),
        };
        Ok(Reply::Text(text))
      }
      Invocation::Push { body } => json(&self.worker.handle_push(body.as_deref())),
      Invocation::Click { action } => match self.worker.handle_notification_click(action.as_deref())? {
        Some(client) => json(&client),
        None => Ok(Reply::Text("Notification dismissed".to_string())),
      },
      Invocation::Open { path } => json(&self.worker.open_client(&path)?),
      Invocation::Status => json(&self.worker.status()?),
      Invocation::Help => Ok(Reply::Text(commands::help())),
      Invocation::Quit => Ok(Reply::Quit),
    }
  }

  /// Read commands from stdin until `quit` or end of input.
  pub async fn run(&self) -> Result<()> {
    let mut events = EventHandler::new();

    println!(
      "shellcache {} serving {} (type `help` for commands)",
      self.worker.config().version,
      self.worker.config().origin
    );

    while let Some(event) = events.next().await {
      match event {
        Event::Command(invocation) => match self.execute(invocation).await {
          Ok(Reply::Quit) => break,
          Ok(reply) => println!("{}", reply.render()),
          Err(e) => eprintln!("error: {:#}", e),
        },
        Event::Invalid(msg) => eprintln!("error: {}", msg),
        Event::Closed => break,
      }
    }

    self.shutdown().await;
    Ok(())
  }

  /// Wait for background cache writes.
  pub async fn shutdown(&self) {
    self.worker.settle().await;
  }
}
