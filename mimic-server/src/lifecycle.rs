//! Worker lifecycle: port allocation, spawn, readiness, teardown.
//!
//! A server instance runs its router on a background worker, either an
//! in-process thread (with its own single-threaded tokio runtime) or a
//! `mimic serve` child process. Both variants share one contract: the
//! spawning context can ask whether the worker is ready, whether it is
//! still alive, signal shutdown, and wait for it with a bounded grace
//! period. Shutdown never blocks indefinitely and never fails.

use std::io;
use std::process::Child;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ServerError};
use crate::http::create_router;
use crate::state::AppState;

/// Poll interval while waiting for an in-process worker.
pub(crate) const READY_POLL_THREAD: Duration = Duration::from_millis(100);

/// Poll interval while waiting for a child-process worker.
pub(crate) const READY_POLL_PROCESS: Duration = Duration::from_secs(1);

/// Poll interval while waiting for a worker to exit.
const JOIN_POLL: Duration = Duration::from_millis(50);

/// Shared startup state between the spawning context and the worker.
///
/// The port is written once before the worker is spawned; the readiness
/// flag is flipped once by the worker after its listener is bound. Both
/// sides may read concurrently.
#[derive(Debug)]
pub(crate) struct StartInfo {
    port: u16,
    ready: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl StartInfo {
    pub(crate) fn new(port: u16) -> Self {
        Self {
            port,
            ready: AtomicBool::new(false),
            failure: Mutex::new(None),
        }
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Record why startup failed, for the `WorkerDied` report.
    pub(crate) fn record_failure(&self, message: String) {
        if let Ok(mut slot) = self.failure.lock() {
            slot.get_or_insert(message);
        }
    }

    pub(crate) fn failure(&self) -> Option<String> {
        self.failure.lock().ok().and_then(|slot| slot.clone())
    }
}

/// Allocate an ephemeral port on the loopback interface.
///
/// Binds port 0, reads back the OS-assigned port, and releases the probe
/// socket so the worker can bind it. Another process can grab the port in
/// that window; the race is inherent to probe-and-rebind discovery and is
/// accepted rather than eliminated.
pub(crate) fn allocate_port() -> Result<u16> {
    let probe = std::net::TcpListener::bind(("127.0.0.1", 0)).map_err(bind_error)?;
    let port = probe.local_addr().map_err(bind_error)?.port();
    Ok(port)
}

fn bind_error(source: io::Error) -> ServerError {
    ServerError::Bind {
        addr: "127.0.0.1:0".to_string(),
        source,
    }
}

/// Spawn the in-process worker thread.
pub(crate) fn spawn_worker_thread(
    state: AppState,
    start_info: std::sync::Arc<StartInfo>,
    cancel: CancellationToken,
) -> Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("mimic-server".to_string())
        .spawn(move || run_worker(state, start_info, cancel))
        .map_err(|source| ServerError::Spawn {
            what: "worker thread".to_string(),
            source,
        })
}

/// Worker thread body: bind, signal readiness, serve until cancelled.
fn run_worker(
    state: AppState,
    start_info: std::sync::Arc<StartInfo>,
    cancel: CancellationToken,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            start_info.record_failure(format!("failed to build worker runtime: {e}"));
            return;
        }
    };

    runtime.block_on(async move {
        let addr = format!("127.0.0.1:{}", start_info.port());
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                start_info.record_failure(format!("failed to bind {addr}: {e}"));
                return;
            }
        };
        tracing::debug!(%addr, "worker listening");
        start_info.mark_ready();

        let router = create_router(state);
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
        {
            tracing::warn!(error = %e, "server loop exited with error");
        }
    });
}

/// The background serving unit, in one of its two execution modes.
pub(crate) enum Worker {
    /// In-process thread sharing memory with the spawner.
    Thread {
        handle: std::thread::JoinHandle<()>,
        cancel: CancellationToken,
    },
    /// Isolated child process; no shared memory.
    Process { child: Child },
}

impl Worker {
    /// Whether the worker is still running.
    pub(crate) fn is_alive(&mut self) -> bool {
        match self {
            Worker::Thread { handle, .. } => !handle.is_finished(),
            Worker::Process { child } => matches!(child.try_wait(), Ok(None)),
        }
    }

    /// Ask the worker to stop: cooperative cancellation for the thread,
    /// SIGTERM for the process.
    pub(crate) fn signal_shutdown(&mut self) {
        match self {
            Worker::Thread { cancel, .. } => cancel.cancel(),
            Worker::Process { child } => {
                if !terminate(child.id()) {
                    tracing::warn!(pid = child.id(), "failed to signal server process");
                }
            }
        }
    }

    /// Wait for the worker to exit, bounded by `grace`. On expiry the
    /// thread is detached with a warning; the process is killed.
    pub(crate) fn join(self, grace: Duration) {
        match self {
            Worker::Thread { handle, .. } => {
                let deadline = Instant::now() + grace;
                while !handle.is_finished() {
                    if Instant::now() >= deadline {
                        tracing::warn!(?grace, "worker thread did not exit in time, detaching");
                        return;
                    }
                    std::thread::sleep(JOIN_POLL);
                }
                if handle.join().is_err() {
                    tracing::warn!("worker thread panicked");
                }
            }
            Worker::Process { mut child } => {
                let deadline = Instant::now() + grace;
                loop {
                    match child.try_wait() {
                        Ok(Some(status)) => {
                            tracing::debug!(%status, "server process exited");
                            return;
                        }
                        Ok(None) if Instant::now() >= deadline => {
                            tracing::warn!(?grace, "server process did not exit in time, killing");
                            let _ = child.kill();
                            let _ = child.wait();
                            return;
                        }
                        Ok(None) => std::thread::sleep(JOIN_POLL),
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to poll server process, killing");
                            let _ = child.kill();
                            let _ = child.wait();
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Send SIGTERM to a process.
#[cfg(unix)]
fn terminate(pid: u32) -> bool {
    // SAFETY: kill only sends a signal; no memory is shared with the target.
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 }
}

/// Non-Unix platforms have no polite termination signal; the bounded wait
/// in `join` falls through to `Child::kill`.
#[cfg(not(unix))]
fn terminate(_pid: u32) -> bool {
    false
}
