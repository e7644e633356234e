// exchange.rs: single-slot mailboxes between the poller and the web server

use std::sync::Mutex;

use tokio::sync::{watch, Notify};

use crate::*;

/// How long a web handler waits for the poller to drain a conflicting command.
pub const COMMAND_SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    ResetEnergy,
    ToggleEmulation,
}

impl Command {
    /// Map the `buttID` argument of the push-button endpoint.
    pub fn from_button_id(id: &str) -> Option<Self> {
        match id {
            "rstEnergy" => Some(Command::ResetEnergy),
            "emul" => Some(Command::ToggleEmulation),
            _ => None,
        }
    }

    /// Issuing the command twice has the same effect as issuing it once.
    pub fn is_idempotent(self) -> bool {
        matches!(self, Command::ResetEnergy)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// An identical idempotent command was already waiting.
    Coalesced,
}

/// Overwrite-latest mailbox: only the most recently published reading is kept.
pub struct ReadingMailbox {
    tx: watch::Sender<Option<Reading>>,
}

impl Default for ReadingMailbox {
    fn default() -> Self {
        Self {
            tx: watch::Sender::new(None),
        }
    }
}

impl ReadingMailbox {
    pub fn publish(&self, reading: Reading) {
        self.tx.send_replace(Some(reading));
    }

    pub fn latest(&self) -> Option<Reading> {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Reading>> {
        self.tx.subscribe()
    }
}

/// At-most-one-pending command slot.
#[derive(Default)]
pub struct CommandSlot {
    pending: Mutex<Option<Command>>,
    drained: Notify,
}

impl CommandSlot {
    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Command>> {
        // the slot holds a plain Copy value, a poisoned lock still has a valid one
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Place `cmd` in the slot, waiting up to `wait` for a different pending
    /// command to be drained first.
    pub async fn send(&self, cmd: Command, wait: Duration) -> Result<SendOutcome, ExchangeError> {
        let deadline = Instant::now() + wait;
        loop {
            let drained = self.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            let pending = {
                let mut slot = self.lock();
                match *slot {
                    None => {
                        *slot = Some(cmd);
                        return Ok(SendOutcome::Queued);
                    }
                    Some(p) if p == cmd && cmd.is_idempotent() => {
                        return Ok(SendOutcome::Coalesced);
                    }
                    Some(p) => p,
                }
            };

            debug!("Command {cmd:?} waiting for {pending:?} to drain");
            if tokio::time::timeout_at(deadline, drained).await.is_err() {
                return Err(ExchangeError::Busy {
                    pending,
                    rejected: cmd,
                });
            }
        }
    }

    /// Non-blocking drain used by the poller once per cycle.
    pub fn try_take(&self) -> Option<Command> {
        let cmd = self.lock().take();
        if cmd.is_some() {
            self.drained.notify_waiters();
        }
        cmd
    }

    pub fn pending(&self) -> Option<Command> {
        *self.lock()
    }
}

#[derive(Default)]
pub struct ReadingExchange {
    pub readings: ReadingMailbox,
    pub commands: CommandSlot,
}

impl ReadingExchange {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(v: u32) -> Reading {
        Reading {
            voltage_deci: v,
            ..Default::default()
        }
    }

    #[test]
    fn latest_value_wins() {
        let mb = ReadingMailbox::default();
        assert_eq!(mb.latest(), None);
        mb.publish(reading(1));
        mb.publish(reading(2));
        assert_eq!(mb.latest(), Some(reading(2)));
    }

    #[test]
    fn button_ids() {
        assert_eq!(Command::from_button_id("rstEnergy"), Some(Command::ResetEnergy));
        assert_eq!(Command::from_button_id("emul"), Some(Command::ToggleEmulation));
        assert_eq!(Command::from_button_id("reboot"), None);
    }

    #[tokio::test]
    async fn identical_reset_requests_coalesce() {
        let slot = CommandSlot::default();
        let wait = Duration::from_millis(10);
        assert_eq!(slot.send(Command::ResetEnergy, wait).await, Ok(SendOutcome::Queued));
        assert_eq!(slot.send(Command::ResetEnergy, wait).await, Ok(SendOutcome::Coalesced));
        assert_eq!(slot.try_take(), Some(Command::ResetEnergy));
        assert_eq!(slot.try_take(), None);
    }

    #[tokio::test]
    async fn conflicting_command_times_out() {
        let slot = CommandSlot::default();
        let wait = Duration::from_millis(20);
        slot.send(Command::ResetEnergy, wait).await.unwrap();
        assert_eq!(
            slot.send(Command::ToggleEmulation, wait).await,
            Err(ExchangeError::Busy {
                pending: Command::ResetEnergy,
                rejected: Command::ToggleEmulation
            })
        );
        assert_eq!(slot.pending(), Some(Command::ResetEnergy));
    }

    #[tokio::test]
    async fn toggles_never_coalesce() {
        let slot = CommandSlot::default();
        let wait = Duration::from_millis(20);
        slot.send(Command::ToggleEmulation, wait).await.unwrap();
        assert!(slot.send(Command::ToggleEmulation, wait).await.is_err());
    }
}
// EOF
