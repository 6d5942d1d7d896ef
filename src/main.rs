mod app;
mod cache;
mod commands;
mod config;
mod event;
mod logging;
mod net;
mod worker;

use app::Reply;
use clap::{Parser, Subcommand};
use color_eyre::Result;
use commands::Invocation;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "An offline-first caching worker for storefront app shells")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./shellcache.yaml, then $XDG_CONFIG_HOME/shellcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Storefront origin (overrides SHELLCACHE_ORIGIN and the config file)
  #[arg(long)]
  origin: Option<String>,

  /// Cache database path
  #[arg(long)]
  database: Option<PathBuf>,

  /// Without a subcommand, commands are read from stdin
  #[command(subcommand)]
  command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
  /// Install and activate the configured version
  Install {
    /// Re-run install even if this version is already active
    #[arg(long)]
    force: bool,
  },
  /// Send a request through the worker; the body goes to stdout
  Fetch {
    url: String,
    /// Request destination: document, image, style, script, font
    #[arg(short, long, default_value = "empty")]
    kind: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Request body
    #[arg(short, long)]
    data: Option<String>,
  },
  /// Fire a background sync event
  Sync { tag: String },
  /// Post a message (a type such as CLEAR_CACHE, or a JSON object)
  Message {
    #[arg(value_name = "TYPE")]
    message: String,
  },
  /// Deliver a push event and print the notification
  Push { body: Option<String> },
  /// Click a notification
  Click {
    #[arg(long)]
    action: Option<String>,
  },
  /// Show lifecycle state, partitions and queued orders
  Status,
}

impl CliCommand {
  fn into_invocation(self) -> Result<Invocation> {
    let invocation = match self {
      CliCommand::Install { force } => Invocation::Install { force },
      CliCommand::Fetch {
        url,
        kind,
        method,
        data,
      } => Invocation::Fetch {
        url,
        method,
        kind: kind.parse()?,
        body: data,
      },
      CliCommand::Sync { tag } => Invocation::Sync { tag },
      CliCommand::Message { message } => Invocation::Message {
        payload: commands::message_payload(&message)?,
      },
      CliCommand::Push { body } => Invocation::Push { body },
      CliCommand::Click { action } => Invocation::Click { action },
      CliCommand::Status => Invocation::Status,
    };
    Ok(invocation)
  }
}

fn write_reply(reply: &Reply) -> Result<()> {
  match reply {
    Reply::Response(result) => {
      eprintln!("HTTP {} via {}", result.data.status, result.source);
      let mut stdout = std::io::stdout().lock();
      stdout.write_all(&result.data.body)?;
      stdout.flush()?;
    }
    Reply::Text(text) => println!("{}", text),
    Reply::Quit => {}
  }
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration; flags beat the environment, which beats the file
  let origin = args
    .origin
    .or_else(|| std::env::var("SHELLCACHE_ORIGIN").ok());
  let config = config::Config::load(args.config.as_deref())?.with_origin(origin)?;

  let config = if let Some(database) = args.database {
    config::Config {
      database: Some(database),
      ..config
    }
  } else {
    config
  };

  let _log_guard = logging::init(&config)?;

  let app = app::App::new(config)?;

  match args.command {
    None => {
      app.start().await;
      app.run().await?;
    }
    Some(CliCommand::Status) => {
      app.restore()?;
      write_reply(&app.execute(Invocation::Status).await?)?;
    }
    Some(command @ CliCommand::Install { .. }) => {
      write_reply(&app.execute(command.into_invocation()?).await?)?;
    }
    Some(command) => {
      let invocation = command.into_invocation()?;
      app.start().await;
      let reply = app.execute(invocation).await;
      app.shutdown().await;
      write_reply(&reply?)?;
    }
  }

  Ok(())
}
