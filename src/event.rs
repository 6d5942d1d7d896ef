use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use crate::commands::{self, Invocation};

/// Application events
#[derive(Debug, PartialEq)]
pub enum Event {
  /// A parsed input line
  Command(Invocation),
  /// A line that did not parse, with the reason
  Invalid(String),
  /// Input reached end of file
  Closed,
}

/// Event handler that turns input lines into events
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Read commands from stdin
  pub fn new() -> Self {
    Self::from_reader(BufReader::new(tokio::io::stdin()))
  }

  pub fn from_reader<R>(reader: R) -> Self
  where
    R: AsyncBufRead + Unpin + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    // Spawn input reader
    tokio::spawn(async move {
      let mut lines = reader.lines();
      loop {
        let event = match lines.next_line().await {
          Ok(Some(line)) => match commands::parse_line(&line) {
            Ok(Some(invocation)) => Event::Command(invocation),
            Ok(None) => continue,
            Err(e) => Event::Invalid(e.to_string()),
          },
          Ok(None) => {
            let _ = tx.send(Event::Closed);
            break;
          }
          Err(e) => {
            warn!(error = %e, "Failed to read input");
            let _ = tx.send(Event::Closed);
            break;
          }
        };

        if tx.send(event).is_err() {
          break;
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
