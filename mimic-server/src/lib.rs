//! mimic-server - OpenAI-compatible HTTP serving for local test models.
//!
//! This crate owns the serving lifecycle: it allocates an ephemeral port,
//! spawns the router on a background worker (in-process thread or `mimic
//! serve` child process), blocks the caller until the worker is verifiably
//! ready, and tears everything down deterministically. Several independent
//! [`LlmServer`] instances can run in one test process.
//!
//! # Example
//!
//! ```ignore
//! use mimic_server::{LlmServer, ServerOptions};
//!
//! let mut server = LlmServer::start(ServerOptions::new(["gemma-3-270m"]))?;
//! let client = server.client_config();
//! // point any OpenAI client at client.base_url with client.api_key ...
//! server.shutdown();
//! ```

mod config;
mod error;
mod lifecycle;
mod state;

pub mod http;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

pub use config::ServingConfig;
pub use error::{Result, ServerError};
pub use http::create_router;
pub use state::AppState;

use lifecycle::{READY_POLL_PROCESS, READY_POLL_THREAD, StartInfo, Worker};

/// Placeholder credential returned in the connection descriptor. The server
/// performs no authentication; any bearer token is accepted.
pub const API_KEY: &str = "mimic-key";

/// Serve the router on an already-bound listener until `shutdown` resolves.
///
/// This is the foreground path used by `mimic serve`; the harness path goes
/// through [`LlmServer::start`], which runs the same loop on a background
/// worker.
pub async fn serve<F>(
    listener: tokio::net::TcpListener,
    config: ServingConfig,
    shutdown: F,
) -> io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let router = create_router(AppState::new(config));
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Name of the server binary looked up on `PATH` for process mode.
const SERVER_BIN: &str = "mimic";

/// How the background worker executes.
#[derive(Debug, Clone, Default)]
pub enum WorkerMode {
    /// An in-process thread. Readiness is a shared flag, shutdown is a
    /// cooperative cancellation.
    #[default]
    Thread,
    /// An isolated `mimic serve` child process. Readiness is inferred by
    /// polling the model-listing endpoint; shutdown is SIGTERM, a bounded
    /// grace period, then a forced kill.
    Process {
        /// Path to the server binary; `None` resolves `mimic` from `PATH`.
        program: Option<PathBuf>,
    },
}

/// Construction options for [`LlmServer`].
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Model identifiers to serve. Duplicates are harmless.
    pub models: Vec<String>,
    /// Alias → identifier mapping. Targets must be in `models`.
    pub aliases: HashMap<String, String>,
    /// Worker execution mode.
    pub mode: WorkerMode,
    /// Ceiling on the readiness wait. Generous by default because a cold
    /// start may download and load a multi-hundred-MB artifact.
    pub startup_timeout: Duration,
    /// Bound on the shutdown join/grace period.
    pub shutdown_grace: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::new(["gemma-3-270m"])
    }
}

impl ServerOptions {
    /// Options serving the given identifiers with default lifecycle knobs.
    pub fn new<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            models: models.into_iter().map(Into::into).collect(),
            aliases: HashMap::new(),
            mode: WorkerMode::Thread,
            startup_timeout: Duration::from_secs(300),
            shutdown_grace: Duration::from_secs(5),
        }
    }

    /// Add an alias for an already-listed identifier.
    pub fn alias(mut self, alias: impl Into<String>, target: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), target.into());
        self
    }

    /// Select the worker execution mode.
    pub fn worker_mode(mut self, mode: WorkerMode) -> Self {
        self.mode = mode;
        self
    }

    /// Override the readiness ceiling.
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Override the shutdown grace period.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

/// Connection parameters for an OpenAI-compatible client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL including the `/v1` prefix.
    pub base_url: String,
    /// Placeholder credential.
    pub api_key: String,
}

/// How readiness is observed for the current worker mode.
enum ReadinessProbe {
    /// Shared flag flipped by the in-process worker after binding.
    Flag,
    /// Network polling of `/v1/models`; the only option across a process
    /// boundary.
    Http { client: reqwest::blocking::Client },
}

/// A running OpenAI-compatible test server.
///
/// Construction blocks until the worker is ready (or fails with a specific
/// error, attempting cleanup first). [`shutdown`](Self::shutdown) is
/// idempotent and also runs on drop, so the worker never outlives the
/// handle.
pub struct LlmServer {
    start_info: Arc<StartInfo>,
    worker: Option<Worker>,
    probe: ReadinessProbe,
    shutdown_grace: Duration,
}

impl LlmServer {
    /// Resolve and load the configured models, start the worker, and wait
    /// for readiness.
    pub fn start(options: ServerOptions) -> Result<Self> {
        match options.mode.clone() {
            WorkerMode::Thread => {
                let config = ServingConfig::build(&options.models, &options.aliases)?;
                Self::start_with_config(config, &options)
            }
            WorkerMode::Process { program } => Self::start_process(program, &options),
        }
    }

    /// Start a thread-mode server over an already-built configuration.
    ///
    /// Only the lifecycle knobs of `options` are consulted; the model and
    /// alias lists were consumed when `config` was built. This is the entry
    /// point for tests that supply stub models.
    pub fn start_with_config(config: ServingConfig, options: &ServerOptions) -> Result<Self> {
        let port = lifecycle::allocate_port()?;
        let start_info = Arc::new(StartInfo::new(port));
        let cancel = CancellationToken::new();
        let handle = lifecycle::spawn_worker_thread(
            AppState::new(config),
            Arc::clone(&start_info),
            cancel.clone(),
        )?;

        let mut server = Self {
            start_info,
            worker: Some(Worker::Thread { handle, cancel }),
            probe: ReadinessProbe::Flag,
            shutdown_grace: options.shutdown_grace,
        };
        server.wait_until_ready(options.startup_timeout, READY_POLL_THREAD)?;
        Ok(server)
    }

    /// Start a child-process server.
    fn start_process(program: Option<PathBuf>, options: &ServerOptions) -> Result<Self> {
        // Validate and fetch artifacts in the parent: construction errors
        // keep their taxonomy and the child starts against a warm cache.
        config::validate(&options.models, &options.aliases)?;
        config::fetch_artifacts(&options.models)?;

        let program = match program {
            Some(path) => path,
            None => which::which(SERVER_BIN).map_err(|e| ServerError::Spawn {
                what: format!("server binary '{SERVER_BIN}'"),
                source: io::Error::new(io::ErrorKind::NotFound, e.to_string()),
            })?,
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(1))
            .build()
            .map_err(|e| ServerError::Spawn {
                what: "readiness probe client".to_string(),
                source: io::Error::other(e.to_string()),
            })?;

        let port = lifecycle::allocate_port()?;
        let mut command = Command::new(&program);
        command
            .arg("serve")
            .arg("--host")
            .arg("127.0.0.1")
            .arg("--port")
            .arg(port.to_string());
        for model in &options.models {
            command.arg("--model").arg(model);
        }
        for (alias, target) in &options.aliases {
            command.arg("--alias").arg(format!("{alias}={target}"));
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let child = command.spawn().map_err(|source| ServerError::Spawn {
            what: format!("server process '{}'", program.display()),
            source,
        })?;
        tracing::debug!(pid = child.id(), port, "spawned server process");

        let mut server = Self {
            start_info: Arc::new(StartInfo::new(port)),
            worker: Some(Worker::Process { child }),
            probe: ReadinessProbe::Http { client },
            shutdown_grace: options.shutdown_grace,
        };
        server.wait_until_ready(options.startup_timeout, READY_POLL_PROCESS)?;
        Ok(server)
    }

    /// Sleep-poll until the worker is ready, it dies, or the ceiling
    /// elapses. Failure paths shut the worker down before returning.
    fn wait_until_ready(&mut self, timeout: Duration, poll: Duration) -> Result<()> {
        let started = Instant::now();
        loop {
            if self.probe_ready() {
                tracing::debug!(elapsed = ?started.elapsed(), port = self.port(), "server ready");
                return Ok(());
            }

            let alive = self.worker.as_mut().is_some_and(Worker::is_alive);
            if !alive {
                let reason = self
                    .start_info
                    .failure()
                    .unwrap_or_else(|| "worker exited before signaling readiness".to_string());
                self.shutdown();
                return Err(ServerError::WorkerDied(reason));
            }

            if started.elapsed() >= timeout {
                self.shutdown();
                return Err(ServerError::StartupTimeout {
                    waited: started.elapsed(),
                });
            }

            std::thread::sleep(poll);
        }
    }

    fn probe_ready(&self) -> bool {
        if self.start_info.is_ready() {
            return true;
        }
        match &self.probe {
            ReadinessProbe::Flag => false,
            ReadinessProbe::Http { client } => {
                let url = format!("{}/models", self.base_url());
                match client.get(&url).send() {
                    Ok(response) if response.status().is_success() => {
                        self.start_info.mark_ready();
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    /// The allocated port.
    pub fn port(&self) -> u16 {
        self.start_info.port()
    }

    /// Base URL of the OpenAI-compatible surface, `/v1` included.
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}/v1", self.port())
    }

    /// Connection parameters for any OpenAI-compatible client.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url(),
            api_key: API_KEY.to_string(),
        }
    }

    /// Stop the worker and wait for it, bounded by the shutdown grace
    /// period. Safe to call repeatedly and from a different thread than the
    /// one that started the server; never blocks past the grace period.
    pub fn shutdown(&mut self) {
        let Some(mut worker) = self.worker.take() else {
            return;
        };
        tracing::debug!(port = self.port(), "shutting down server");
        worker.signal_shutdown();
        worker.join(self.shutdown_grace);
    }
}

impl Drop for LlmServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_default_to_the_smallest_catalog_model() {
        let options = ServerOptions::default();
        assert_eq!(options.models, vec!["gemma-3-270m".to_string()]);
        assert!(options.aliases.is_empty());
        assert!(matches!(options.mode, WorkerMode::Thread));
        assert_eq!(options.startup_timeout, Duration::from_secs(300));
        assert_eq!(options.shutdown_grace, Duration::from_secs(5));
    }

    #[test]
    fn options_builders_compose() {
        let options = ServerOptions::new(["m"])
            .alias("a", "m")
            .worker_mode(WorkerMode::Process { program: None })
            .startup_timeout(Duration::from_secs(30))
            .shutdown_grace(Duration::from_secs(1));
        assert_eq!(options.aliases.get("a"), Some(&"m".to_string()));
        assert!(matches!(options.mode, WorkerMode::Process { .. }));
        assert_eq!(options.startup_timeout, Duration::from_secs(30));
        assert_eq!(options.shutdown_grace, Duration::from_secs(1));
    }

    #[test]
    fn start_rejects_an_empty_model_set() {
        let err = LlmServer::start(ServerOptions::new(Vec::<String>::new())).unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[test]
    fn start_rejects_bad_aliases_before_any_io() {
        let options = ServerOptions::new(["m"]).alias("a2", "a1").alias("a1", "m");
        let err = LlmServer::start(options).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("'a2'"));
        assert!(text.contains("'a1'"));
    }

    #[test]
    fn process_mode_resolution_failure_keeps_the_model_taxonomy() {
        // Artifacts are fetched before the child is spawned, so an
        // unresolvable identifier fails with the model error even when the
        // binary path is bogus.
        let options = ServerOptions::new(["not-a-model"]).worker_mode(WorkerMode::Process {
            program: Some(PathBuf::from("/nonexistent/mimic")),
        });
        let err = LlmServer::start(options).unwrap_err();
        assert!(matches!(err, ServerError::Model(_)));
    }
}
