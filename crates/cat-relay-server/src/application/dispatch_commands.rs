//! CommandDispatcher: turns the server's raw message stream into command
//! executions and replies.
//!
//! The relay forwards every read verbatim.  This use case sits between the
//! relay and whatever interprets the CAT protocol:
//!
//! ```text
//! ServerEvent::Message { "FA;MD", #2 }
//!      │
//!      ▼  CommandAssembler for #2
//! ["FA"]  (pending "MD")
//!      │
//!      ▼  CommandInterpreter::execute("FA")
//! Some("FA00014074000;")
//!      │
//!      ▼  ReplySink::reply(#2, ...)
//! ```
//!
//! # Architecture
//!
//! The dispatcher depends only on the [`CommandInterpreter`] and
//! [`ReplySink`] traits.  `RelayServer` implements `ReplySink` in the
//! infrastructure layer; tests inject recording doubles.

use std::collections::HashMap;
use std::sync::Arc;

use cat_relay_core::{CommandAssembler, ConnectionId, SendError, ServerEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Executes one complete command (terminator already stripped).
///
/// Returns the text to send back to the issuing peer, or `None` when the
/// command produces no answer (a "set" command, typically).
#[cfg_attr(test, mockall::automock)]
pub trait CommandInterpreter: Send + Sync {
    fn execute(&self, command: &str) -> Option<String>;
}

/// Delivers an answer to a single peer.
pub trait ReplySink: Send + Sync {
    /// # Errors
    ///
    /// Returns the [`SendError`] of the underlying transport.  The dispatcher
    /// logs it and carries on.
    fn reply(&self, identity: ConnectionId, text: &str) -> Result<(), SendError>;
}

/// Diagnostic interpreter that answers every command with itself.
///
/// `FA` is answered with `FA;`, which makes a running relay easy to exercise
/// with a plain TCP client.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoInterpreter;

impl CommandInterpreter for EchoInterpreter {
    fn execute(&self, command: &str) -> Option<String> {
        Some(format!("{command};"))
    }
}

/// Per-peer command assembly, execution and reply routing.
pub struct CommandDispatcher {
    interpreter: Arc<dyn CommandInterpreter>,
    sink: Arc<dyn ReplySink>,
    assemblers: HashMap<ConnectionId, CommandAssembler>,
}

impl CommandDispatcher {
    pub fn new(interpreter: Arc<dyn CommandInterpreter>, sink: Arc<dyn ReplySink>) -> Self {
        Self {
            interpreter,
            sink,
            assemblers: HashMap::new(),
        }
    }

    /// Number of peers with an assembler (i.e. currently connected).
    pub fn tracked_peers(&self) -> usize {
        self.assemblers.len()
    }

    /// Processes one server event and returns how many replies were queued.
    pub fn handle_event(&mut self, event: ServerEvent) -> usize {
        match event {
            ServerEvent::ClientConnected { identity, peer } => {
                debug!("{identity} ({peer}): tracking commands");
                self.assemblers.insert(identity, CommandAssembler::new());
                0
            }
            ServerEvent::Message { text, identity } => self.dispatch(identity, &text),
            ServerEvent::ClientDisconnected { identity, .. } => {
                if let Some(assembler) = self.assemblers.remove(&identity) {
                    if !assembler.pending().is_empty() {
                        debug!(
                            "{identity}: dropping unterminated input {:?}",
                            assembler.pending()
                        );
                    }
                }
                0
            }
        }
    }

    fn dispatch(&mut self, identity: ConnectionId, text: &str) -> usize {
        let commands = match self.assemblers.entry(identity).or_default().push(text) {
            Ok(commands) => commands,
            Err(e) => {
                warn!("{identity}: {e}");
                return 0;
            }
        };

        let mut replies = 0;
        for command in commands {
            let Some(answer) = self.interpreter.execute(&command) else {
                continue;
            };
            if answer.is_empty() {
                continue;
            }
            match self.sink.reply(identity, &answer) {
                Ok(()) => replies += 1,
                Err(e) => warn!("{identity}: reply to {command:?} not sent: {e}"),
            }
        }
        replies
    }

    /// Drives the dispatcher until the event stream ends.
    pub async fn run(mut self, mut events: mpsc::Receiver<ServerEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        info!("server event stream ended; dispatcher stopped");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
