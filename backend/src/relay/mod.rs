//! Command relay between the status reconciler and the field hardware.
//!
//! The actuator link is a polled mailbox: the reconciler writes at most
//! one pending command, the hardware's next poll drains it. A write
//! overwrites any unread command (last-writer-wins, no queue) and a
//! drain atomically returns-and-clears, so each command is delivered at
//! most once. The slot is process-local and deliberately unpersisted: a
//! restart loses an undelivered command, and the next reconciler tick
//! re-derives and re-issues the correct one from durable state.

use std::fmt;
use std::str::FromStr;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Instruction for the valve actuator. Serializes to the lowercase wire
/// strings the hardware expects ("open" / "close").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Open,
    Close,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Command::Open => "open",
            Command::Close => "close",
        })
    }
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Command::Open),
            "close" => Ok(Command::Close),
            other => Err(anyhow::anyhow!("invalid command value: {}", other)),
        }
    }
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("command relay unavailable: {0}")]
    Unavailable(String),
}

/// Writer/reader interface for the command mailbox.
///
/// The reconciler depends on this trait, not on a concrete slot, so the
/// mailbox is injected at wiring time rather than living as a global.
pub trait CommandSink: Send + Sync {
    /// Place a command in the mailbox, overwriting any unread one.
    fn set_command(&self, cmd: Command) -> Result<(), RelayError>;

    /// Atomically take and clear the pending command, if any.
    fn drain_command(&self) -> Option<Command>;
}

/// In-process single-slot mailbox.
#[derive(Default)]
pub struct SingleSlotRelay {
    slot: Mutex<Option<Command>>,
}

impl SingleSlotRelay {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CommandSink for SingleSlotRelay {
    fn set_command(&self, cmd: Command) -> Result<(), RelayError> {
        let mut slot = self.slot.lock();
        if let Some(prev) = slot.replace(cmd) {
            tracing::debug!(overwritten = %prev, new = %cmd, "relay slot overwritten before drain");
        }
        Ok(())
    }

    fn drain_command(&self) -> Option<Command> {
        self.slot.lock().take()
    }
}
