//! Daemon orchestration -- input assembly and lifecycle management.
//!
//! The [`Orchestrator`] is the central coordinator of `lumberyard-daemon`.
//! It loads configuration, installs the metrics recorder, binds the
//! listener, builds the lumberjack input, and runs the main loop until a
//! shutdown signal arrives.
//!
//! # Shutdown Order
//!
//! 1. Stop accepting and drain connection workers
//! 2. Flush decoders holding partial events (multiline groups)
//! 3. Drain the queue into the sink
//! 4. Remove the PID file

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;

use lumberyard_core::config::LumberyardConfig;
use lumberyard_core::pipeline::{HealthStatus, Pipeline};
use lumberyard_input::{
    Listener, LumberjackInput, LumberjackInputBuilder, Sink, StdoutSink, TcpJsonListener,
};

use crate::health::{ComponentHealth, DaemonHealth, aggregate_status};
use crate::metrics_server;

/// Name reported for the input in health reports.
pub const INPUT_COMPONENT: &str = "lumberjack-input";

/// Interval between periodic health checks in the main loop.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// The main daemon orchestrator.
///
/// Owns the lumberjack input and manages PID file handling,
/// health monitoring, and graceful shutdown.
pub struct Orchestrator<S: Sink = StdoutSink> {
    /// Loaded and validated configuration.
    config: LumberyardConfig,
    /// The lumberjack input.
    input: LumberjackInput<TcpJsonListener, S>,
    /// Address the listener is bound to.
    local_addr: SocketAddr,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
}

impl Orchestrator<StdoutSink> {
    /// Load configuration and build the orchestrator.
    ///
    /// 1. Load `lumberyard.toml` and apply environment variable overrides
    /// 2. Validate the configuration
    /// 3. Bind the listener and build the input
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read or parsed
    /// - Configuration validation fails
    /// - The listener cannot be bound
    pub async fn build(config_path: &Path) -> Result<Self> {
        let mut config = LumberyardConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        config.apply_env_overrides();
        Self::build_from_config(config).await
    }

    /// Build from an already-loaded configuration, writing events to stdout.
    pub async fn build_from_config(config: LumberyardConfig) -> Result<Self> {
        Self::build_with_sink(config, StdoutSink::stdout()).await
    }
}

impl<S: Sink> Orchestrator<S> {
    /// Build from an already-loaded configuration with a custom sink.
    pub async fn build_with_sink(config: LumberyardConfig, sink: S) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            tracing::info!(port = config.metrics.port, "metrics endpoint enabled");
        }

        let listener =
            TcpJsonListener::bind(&config.input.bind_addr, config.input.max_line_bytes).await?;
        let local_addr = listener.local_addr()?;

        let input = LumberjackInputBuilder::new()
            .config(config.input.clone())
            .listener(listener)
            .sink(sink)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build lumberjack input: {}", e))?;

        tracing::info!(
            bind_addr = %local_addr,
            codec = config.input.codec.name(),
            "orchestrator initialized"
        );

        Ok(Self {
            config,
            input,
            local_addr,
            start_time: Instant::now(),
        })
    }

    /// Start the input and block until `SIGTERM` or `SIGINT`.
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(async {
            match wait_for_shutdown_signal().await {
                Ok(signal) => tracing::info!(signal = signal, "shutdown signal received"),
                Err(e) => tracing::error!(error = %e, "signal handling failed, shutting down"),
            }
        })
        .await
    }

    /// Start the input and run the main loop until `shutdown` resolves.
    ///
    /// The PID file is written before start and removed on every exit path.
    pub async fn run_until(&mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let pid_file = self.config.general.pid_file.clone();
        if !pid_file.is_empty() {
            write_pid_file(Path::new(&pid_file))?;
        }

        let result = self.serve(shutdown).await;

        if !pid_file.is_empty() {
            remove_pid_file(Path::new(&pid_file));
        }
        result
    }

    async fn serve(&mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tracing::info!("starting lumberjack input");
        self.input
            .start()
            .await
            .map_err(|e| anyhow::anyhow!("failed to start lumberjack input: {}", e))?;

        tracing::info!(bind_addr = %self.local_addr, "entering main loop");
        let mut health_interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        health_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = health_interval.tick() => {
                    let health = self.health().await;
                    match &health.status {
                        HealthStatus::Healthy => tracing::debug!(uptime_secs = health.uptime_secs, "daemon healthy"),
                        HealthStatus::Degraded(reason) => tracing::warn!(reason = %reason, "daemon degraded"),
                        HealthStatus::Unhealthy(reason) => tracing::error!(reason = %reason, "daemon unhealthy"),
                    }
                }
            }
        }

        self.shutdown().await
    }

    /// Stop the input; buffered partial events are flushed to the sink.
    async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("stopping lumberjack input");
        self.input
            .stop()
            .await
            .map_err(|e| anyhow::anyhow!("failed to stop lumberjack input: {}", e))?;
        tracing::info!(
            uptime_secs = self.start_time.elapsed().as_secs(),
            "lumberyard-daemon shut down"
        );
        Ok(())
    }

    /// Get the current aggregated health status.
    pub async fn health(&self) -> DaemonHealth {
        let components = vec![ComponentHealth {
            name: INPUT_COMPONENT.to_owned(),
            status: self.input.health_check().await,
        }];

        DaemonHealth {
            status: aggregate_status(&components),
            uptime_secs: self.start_time.elapsed().as_secs(),
            components,
        }
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &LumberyardConfig {
        &self.config
    }

    /// Take the sink back after the daemon has shut down.
    pub fn take_sink(&mut self) -> Option<S> {
        self.input.take_sink()
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Write the current process PID to a file.
///
/// Used to prevent duplicate daemon instances.
///
/// # Security
///
/// - Uses `create_new(true)` to atomically create file (prevents TOCTOU races)
/// - Verifies the created file is a regular file (prevents symlink attacks)
/// - Creates parent directory with restrictive permissions (0o700)
///
/// # Errors
///
/// Returns an error if the PID file exists or cannot be written.
pub fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            let mut builder = fs::DirBuilder::new();
            builder.mode(0o700).recursive(true);
            builder.create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let pid = std::process::id();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let metadata = file.metadata()?;
    if !metadata.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file (possible symlink attack)",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    writeln!(file, "{}", pid)?;

    tracing::info!(pid = pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file on daemon shutdown.
///
/// Logs a warning but does not fail if the file cannot be removed.
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file");
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}
