/// Supervisor runtime state

use super::log_buffer::LogBuffer;
use serde::Serialize;
use std::fmt;
use tokio::process::Child;

/// Lifecycle of one supervised Tor process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// No process
    Stopped,
    /// Staging the binary, writing the torrc, checking the identity
    Preparing,
    /// Process alive, waiting for bootstrap to finish
    Bootstrapping,
    /// Tor is up; server or hostname not confirmed yet
    ServingPending,
    /// Server running on the confirmed hidden service
    Serving,
}

impl Lifecycle {
    /// Whether a Tor process is alive
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            Lifecycle::Bootstrapping | Lifecycle::ServingPending | Lifecycle::Serving
        )
    }

    pub fn is_stopped(&self) -> bool {
        *self == Lifecycle::Stopped
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifecycle::Stopped => "stopped",
            Lifecycle::Preparing => "preparing",
            Lifecycle::Bootstrapping => "bootstrapping",
            Lifecycle::ServingPending => "serving_pending",
            Lifecycle::Serving => "serving",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of the supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TorStatus {
    pub lifecycle: Lifecycle,
    pub bootstrap_progress: u8,
    pub onion_address: Option<String>,
    pub server_started: bool,
}

/// Mutable state behind the supervisor's single lock
#[derive(Debug)]
pub(crate) struct TorRuntimeState {
    pub lifecycle: Lifecycle,
    /// Bumped on every start and stop; background tasks carry the run they
    /// belong to and go quiet once it no longer matches
    pub run: u64,
    pub child: Option<Child>,
    pub bootstrap_progress: u8,
    pub onion_address: Option<String>,
    pub logs: LogBuffer,
    /// Latch: server start has been scheduled for this run
    pub server_scheduled: bool,
    pub server_running: bool,
    /// A hostname read failure has been logged for this run
    pub hostname_error_logged: bool,
}

impl TorRuntimeState {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            lifecycle: Lifecycle::Stopped,
            run: 0,
            child: None,
            bootstrap_progress: 0,
            onion_address: None,
            logs: LogBuffer::new(log_capacity),
            server_scheduled: false,
            server_running: false,
            hostname_error_logged: false,
        }
    }

    /// Enter `Preparing` for a new run and return its id
    pub fn begin_run(&mut self) -> u64 {
        self.run += 1;
        self.lifecycle = Lifecycle::Preparing;
        self.bootstrap_progress = 0;
        self.server_scheduled = false;
        self.server_running = false;
        self.hostname_error_logged = false;
        self.run
    }

    /// Back to `Stopped`, invalidating the current run's tasks.
    /// Returns the process handle, if any, for the caller to dispose of.
    pub fn end_run(&mut self) -> Option<Child> {
        self.run += 1;
        self.lifecycle = Lifecycle::Stopped;
        self.server_scheduled = false;
        self.server_running = false;
        self.child.take()
    }

    pub fn is_current(&self, run: u64) -> bool {
        self.run == run && !self.lifecycle.is_stopped()
    }

    pub fn record_progress(&mut self, progress: u8) {
        self.bootstrap_progress = self.bootstrap_progress.max(progress.min(100));
    }

    /// Mark Tor as up. Returns `true` exactly once per run: the first
    /// time, which is when the server start gets scheduled. Progress is
    /// left to whatever the log lines reported.
    pub fn complete_bootstrap(&mut self) -> bool {
        if self.lifecycle == Lifecycle::Bootstrapping {
            self.lifecycle = Lifecycle::ServingPending;
        }
        if self.server_scheduled {
            return false;
        }
        self.server_scheduled = true;
        true
    }

    /// `ServingPending` -> `Serving` once the server runs and the address is known
    pub fn promote_if_ready(&mut self) -> bool {
        if self.lifecycle == Lifecycle::ServingPending
            && self.server_running
            && self.onion_address.is_some()
        {
            self.lifecycle = Lifecycle::Serving;
            return true;
        }
        false
    }

    pub fn status(&self) -> TorStatus {
        TorStatus {
            lifecycle: self.lifecycle,
            bootstrap_progress: self.bootstrap_progress,
            onion_address: self.onion_address.clone(),
            server_started: self.server_running,
        }
    }
}
