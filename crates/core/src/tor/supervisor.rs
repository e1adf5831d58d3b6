/// Tor process supervisor
///
/// Owns exactly one Tor process at a time: stages the binary, writes the
/// torrc, spawns the process and follows its stdout. Once bootstrap
/// completes it waits a settle delay and asks the injected
/// [`ServiceLauncher`] to start serving on the hidden-service port.

use super::binary::{reported_abi, select_variant, stage_binary};
use super::identity::HiddenServiceDir;
use super::log_parser::{classify, LogEvent};
use super::state::{Lifecycle, TorRuntimeState, TorStatus};
use super::torrc::{self, TorrcParams};
use super::absolute;
use crate::events::{EventSink, ServiceLauncher};
use crate::settings_store::SettingsStore;
use darkmsg_common::{DarkMsgError, Result, SupervisorConfig};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Supervises the Tor process and the hidden-service server it gates.
///
/// Dropping the supervisor kills the process.
pub struct TorSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    config: SupervisorConfig,
    hidden_service: HiddenServiceDir,
    state: Mutex<TorRuntimeState>,
    events: Arc<dyn EventSink>,
    settings: Arc<dyn SettingsStore>,
    launcher: Arc<dyn ServiceLauncher>,
}

impl TorSupervisor {
    pub fn new(
        config: SupervisorConfig,
        events: Arc<dyn EventSink>,
        settings: Arc<dyn SettingsStore>,
        launcher: Arc<dyn ServiceLauncher>,
    ) -> Self {
        let hidden_service = HiddenServiceDir::new(config.hidden_service_dir());
        let state = Mutex::new(TorRuntimeState::new(config.max_log_entries));

        Self {
            inner: Arc::new(Inner {
                config,
                hidden_service,
                state,
                events,
                settings,
                launcher,
            }),
        }
    }

    /// Start Tor, stopping any process from a previous run first.
    ///
    /// Returns `false` when staging, configuration or spawning fails; the
    /// failure is in the log and nothing is retried.
    pub async fn start(&self) -> bool {
        let stopped = self.inner.state.lock().await.lifecycle.is_stopped();
        if !stopped {
            self.stop().await;
        }

        let run = self.inner.state.lock().await.begin_run();
        match self.inner.clone().launch(run).await {
            Ok(()) => true,
            Err(e) => {
                self.inner.fail_run(run, &e).await;
                false
            }
        }
    }

    /// Kill the process and return to `Stopped` without waiting for it to exit
    pub async fn stop(&self) {
        let mut state = self.inner.state.lock().await;
        if let Some(mut child) = state.end_run() {
            if let Err(e) = child.start_kill() {
                debug!("Tor process already gone: {}", e);
            }
        }
        let message = "TOR: Stopped";
        state.logs.push(message);
        drop(state);

        self.inner.emit(message);
        self.inner.launcher.stop_service().await;
    }

    pub async fn is_running(&self) -> bool {
        self.inner.state.lock().await.lifecycle.is_running()
    }

    pub async fn lifecycle(&self) -> Lifecycle {
        self.inner.state.lock().await.lifecycle
    }

    pub async fn bootstrap_progress(&self) -> u8 {
        self.inner.state.lock().await.bootstrap_progress
    }

    pub async fn status(&self) -> TorStatus {
        self.inner.state.lock().await.status()
    }

    pub async fn get_logs(&self) -> Vec<String> {
        self.inner.state.lock().await.logs.snapshot()
    }

    pub async fn clear_logs(&self) {
        self.inner.state.lock().await.logs.clear();
    }

    pub async fn generated_onion_address(&self) -> Option<String> {
        self.inner.state.lock().await.onion_address.clone()
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }
}

impl Drop for TorSupervisor {
    fn drop(&mut self) {
        if let Ok(mut state) = self.inner.state.try_lock() {
            if let Some(mut child) = state.end_run() {
                let _ = child.start_kill();
            }
        }
    }
}

impl Inner {
    fn emit(&self, message: &str) {
        if message.starts_with("ERROR") {
            error!("{}", message);
        } else if message.starts_with("WARNING") {
            warn!("{}", message);
        } else if message.starts_with("TOR:") {
            debug!("{}", message);
        } else {
            info!("{}", message);
        }
        self.events.on_log_line(message);
    }

    async fn log(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        self.state.lock().await.logs.push(message);
        self.emit(message);
    }

    async fn is_current(&self, run: u64) -> bool {
        self.state.lock().await.is_current(run)
    }

    async fn fail_run(&self, run: u64, err: &DarkMsgError) {
        let mut state = self.state.lock().await;
        if state.run == run {
            if let Some(mut child) = state.end_run() {
                let _ = child.start_kill();
            }
        }
        let message = format!("ERROR starting Tor: {}", err);
        state.logs.push(&message);
        drop(state);
        self.emit(&message);
    }

    async fn launch(self: Arc<Self>, run: u64) -> Result<()> {
        self.config
            .validate()
            .map_err(|e| DarkMsgError::config(e.to_string()))?;
        let params = TorrcParams::from_config(&self.config)?;

        let created = !params.data_dir.is_dir();
        tokio::fs::create_dir_all(&params.data_dir).await.map_err(|e| {
            DarkMsgError::config(format!(
                "failed to create {}: {}",
                params.data_dir.display(),
                e
            ))
        })?;
        if created {
            self.log(format!("Created directory: {}", params.data_dir.display()))
                .await;
        } else {
            self.log(format!("Directory already exists: {}", params.data_dir.display()))
                .await;
        }

        let variant = select_variant(&reported_abi(self.config.abi.as_deref()));
        let binary = absolute(&self.config.staged_binary_path())?;
        stage_binary(&self.config.assets_dir, variant, &binary).await?;
        self.log(format!(
            "Copied Tor binary for ABI: {} to {}",
            variant,
            binary.display()
        ))
        .await;

        if self.hidden_service.ensure().await? {
            self.log(format!(
                "Created hidden service directory: {}",
                self.hidden_service.path().display()
            ))
            .await;
        }

        let torrc_path = torrc::write(&params).await?;
        self.log(format!("Created torrc file at: {}", torrc_path.display()))
            .await;

        self.check_existing_identity().await;

        if !self.is_current(run).await {
            return Err(DarkMsgError::internal("start cancelled by stop"));
        }

        self.log(format!(
            "Starting Tor with command: {} -f {}",
            binary.display(),
            torrc_path.display()
        ))
        .await;
        self.log(format!("Working directory: {}", params.data_dir.display()))
            .await;

        let mut child = Command::new(&binary)
            .arg("-f")
            .arg(&torrc_path)
            .current_dir(&params.data_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DarkMsgError::spawn(format!("{}: {}", binary.display(), e)))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        {
            let mut state = self.state.lock().await;
            if !state.is_current(run) {
                let _ = child.start_kill();
                return Err(DarkMsgError::internal("start cancelled by stop"));
            }
            state.child = Some(child);
            state.lifecycle = Lifecycle::Bootstrapping;
        }

        if let Some(stderr) = stderr {
            tokio::spawn(self.clone().drain_stderr(run, stderr));
        }
        match stdout {
            Some(stdout) => {
                tokio::spawn(self.clone().follow_stdout(run, stdout));
            }
            None => {
                return Err(DarkMsgError::spawn("Tor stdout was not captured"));
            }
        }

        Ok(())
    }

    /// Report an identity left by a previous run before Tor even starts
    async fn check_existing_identity(&self) {
        match self.hidden_service.read_hostname().await {
            Ok(Some(address)) => {
                self.log(format!("Existing hidden service found: {}", address))
                    .await;
                self.record_address(address).await;
            }
            Ok(None) => {
                self.log("No existing hidden service found. New one will be created.")
                    .await;
            }
            Err(e) => {
                self.log(format!("ERROR reading existing hidden service: {}", e))
                    .await;
            }
        }
    }

    /// Re-read `hostname`; `true` once an address is on disk
    async fn check_hostname(&self, run: u64) -> bool {
        if !self.is_current(run).await {
            return false;
        }
        match self.hidden_service.read_hostname().await {
            Ok(Some(address)) => {
                self.record_address(address).await;
                true
            }
            Ok(None) => false,
            Err(e) => {
                let mut state = self.state.lock().await;
                if state.hostname_error_logged {
                    debug!("Hidden service hostname still unreadable: {}", e);
                    return false;
                }
                state.hostname_error_logged = true;
                let message = format!("ERROR reading hidden service hostname: {}", e);
                state.logs.push(&message);
                drop(state);
                self.emit(&message);
                false
            }
        }
    }

    async fn record_address(&self, address: String) {
        let mut state = self.state.lock().await;
        if state.onion_address.as_deref() == Some(address.as_str()) {
            return;
        }
        state.onion_address = Some(address.clone());
        state.promote_if_ready();
        let message = format!("Hidden service address: {}", address);
        state.logs.push(&message);
        drop(state);

        self.emit(&message);
        self.events.on_onion_address_changed(&address);
        if let Err(e) = self.settings.update_onion_address(&address) {
            self.log(format!("ERROR storing onion address: {}", e)).await;
        }
    }

    async fn follow_stdout(self: Arc<Self>, run: u64, stdout: impl AsyncRead + Unpin) {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if !self.handle_line(run, &line).await {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    self.log(format!("ERROR reading Tor output: {}", e)).await;
                    break;
                }
            }
        }
        self.on_process_exit(run).await;
    }

    async fn drain_stderr(self: Arc<Self>, run: u64, stderr: impl AsyncRead + Unpin) {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let message = format!("TOR(stderr): {}", line);
            let mut state = self.state.lock().await;
            if !state.is_current(run) {
                break;
            }
            state.logs.push(&message);
            drop(state);
            self.emit(&message);
        }
    }

    /// Log and act on one stdout line. `false` once the run is over.
    async fn handle_line(self: &Arc<Self>, run: u64, line: &str) -> bool {
        let event = classify(line);
        let message = format!("TOR: {}", line);

        let mut state = self.state.lock().await;
        if !state.is_current(run) {
            return false;
        }
        state.logs.push(&message);
        let schedule_server = match event {
            LogEvent::Bootstrap(progress) => {
                if let Some(progress) = progress {
                    state.record_progress(progress);
                }
                state.complete_bootstrap()
            }
            LogEvent::HiddenServiceMention | LogEvent::Other => false,
        };
        drop(state);
        self.emit(&message);

        match event {
            LogEvent::HiddenServiceMention => {
                self.check_hostname(run).await;
            }
            LogEvent::Bootstrap(_) => {
                self.check_hostname(run).await;
                if schedule_server {
                    self.log(format!(
                        "Tor bootstrapped; starting hidden service server in {} ms",
                        self.config.settle_delay_ms
                    ))
                    .await;
                    tokio::spawn(self.clone().start_server_after_settle(run));
                    tokio::spawn(self.clone().watch_hostname(run));
                }
            }
            LogEvent::Other => {}
        }

        true
    }

    async fn start_server_after_settle(self: Arc<Self>, run: u64) {
        tokio::time::sleep(self.config.settle_delay()).await;
        if !self.is_current(run).await {
            return;
        }

        let started = self.launcher.start_service().await;

        let mut state = self.state.lock().await;
        if !state.is_current(run) {
            drop(state);
            if started {
                self.launcher.stop_service().await;
            }
            return;
        }

        let message = if started {
            state.server_running = true;
            state.promote_if_ready();
            format!(
                "Hidden service HTTP server started on port {}",
                self.config.hidden_service_port
            )
        } else {
            "ERROR: failed to start hidden service HTTP server".to_string()
        };
        state.logs.push(&message);
        drop(state);
        self.emit(&message);
    }

    /// Poll for the hostname after bootstrap. Warns once when the wait window
    /// runs out, then keeps polling until the address appears or the run ends.
    async fn watch_hostname(self: Arc<Self>, run: u64) {
        let deadline = Instant::now() + self.config.hostname_wait();
        let mut warned = false;

        loop {
            if !self.is_current(run).await || self.check_hostname(run).await {
                return;
            }
            if !warned && Instant::now() >= deadline {
                warned = true;
                self.log(format!(
                    "WARNING: no hidden service hostname after {}s, still waiting",
                    self.config.hostname_wait_secs
                ))
                .await;
            }
            tokio::time::sleep(self.config.hostname_poll()).await;
        }
    }

    async fn on_process_exit(&self, run: u64) {
        let mut state = self.state.lock().await;
        if !state.is_current(run) {
            return;
        }
        let child = state.end_run();
        let message = match child.and_then(|mut c| c.try_wait().ok().flatten()) {
            Some(status) => format!("TOR: Process ended ({})", status),
            None => "TOR: Process ended".to_string(),
        };
        state.logs.push(&message);
        drop(state);

        self.emit(&message);
        self.launcher.stop_service().await;
    }
}
