use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{ApiError, BackendApi};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    PanicStop,
    Start,
    Stop,
    Restart,
}

impl ControlCommand {
    pub const ALL: [ControlCommand; 4] = [
        ControlCommand::PanicStop,
        ControlCommand::Start,
        ControlCommand::Stop,
        ControlCommand::Restart,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlCommand::PanicStop => "panic_stop",
            ControlCommand::Start => "start",
            ControlCommand::Stop => "stop",
            ControlCommand::Restart => "restart",
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            ControlCommand::PanicStop => "/control/panic_stop",
            ControlCommand::Start => "/control/start",
            ControlCommand::Stop => "/control/stop",
            ControlCommand::Restart => "/control/restart",
        }
    }

    fn index(&self) -> usize {
        match self {
            ControlCommand::PanicStop => 0,
            ControlCommand::Start => 1,
            ControlCommand::Stop => 2,
            ControlCommand::Restart => 3,
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "panic_stop" | "panic" => Ok(ControlCommand::PanicStop),
            "start" => Ok(ControlCommand::Start),
            "stop" => Ok(ControlCommand::Stop),
            "restart" => Ok(ControlCommand::Restart),
            other => Err(format!("unknown control command: {}", other)),
        }
    }
}

/// Fire-and-forget command with a busy flag.
///
/// While a submission is in flight further triggers are ignored. The flag
/// clears when the backend answers, the request fails, or the timeout hits.
#[derive(Clone)]
pub struct CommandControl {
    command: ControlCommand,
    api: Arc<dyn BackendApi>,
    in_flight: Arc<AtomicBool>,
    timeout: Option<Duration>,
}

impl CommandControl {
    pub fn new(command: ControlCommand, api: Arc<dyn BackendApi>, timeout: Option<Duration>) -> Self {
        Self {
            command,
            api,
            in_flight: Arc::new(AtomicBool::new(false)),
            timeout,
        }
    }

    pub fn command(&self) -> ControlCommand {
        self.command
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Returns `None` without touching the network when already busy.
    pub fn trigger(&self) -> Option<JoinHandle<()>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(command = %self.command, "Command already in flight, ignoring trigger");
            return None;
        }

        info!(command = %self.command, "Sending control command");
        let command = self.command;
        let api = Arc::clone(&self.api);
        let in_flight = Arc::clone(&self.in_flight);
        let timeout = self.timeout;

        Some(tokio::spawn(async move {
            let outcome = match timeout {
                Some(limit) => tokio::time::timeout(limit, api.send_command(command))
                    .await
                    .unwrap_or_else(|_| {
                        Err(ApiError::Timeout {
                            path: command.path().to_string(),
                        })
                    }),
                None => api.send_command(command).await,
            };

            match outcome {
                Ok(()) => info!(command = %command, "Control command accepted"),
                Err(e) => warn!(command = %command, error = %e, "Control command failed"),
            }
            in_flight.store(false, Ordering::Release);
        }))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandStatus {
    pub command: ControlCommand,
    pub busy: bool,
}

/// Panic stop plus the bot's job controls, each with its own busy flag.
pub struct ControlPanel {
    controls: Vec<CommandControl>,
}

impl ControlPanel {
    pub fn new(api: Arc<dyn BackendApi>, timeout: Option<Duration>) -> Self {
        Self {
            controls: ControlCommand::ALL
                .iter()
                .map(|command| CommandControl::new(*command, Arc::clone(&api), timeout))
                .collect(),
        }
    }

    pub fn get(&self, command: ControlCommand) -> &CommandControl {
        &self.controls[command.index()]
    }

    pub fn trigger(&self, command: ControlCommand) -> Option<JoinHandle<()>> {
        self.get(command).trigger()
    }

    pub fn status(&self) -> Vec<CommandStatus> {
        self.controls
            .iter()
            .map(|control| CommandStatus {
                command: control.command(),
                busy: control.is_busy(),
            })
            .collect()
    }
}
