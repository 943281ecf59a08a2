//! Plugin cleanup and process-level shutdown hooks.
//!
//! The loader records every plugin that reaches the active state in a list
//! shared with a [`CleanupHandle`]. Cleanup runs at most once per loader,
//! whether triggered by the host, a termination signal, or a panic escaping
//! a [`CleanupHandle::guard`]ed future. Callers that arrive while a pass is
//! in flight wait for it to finish.

use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::error::{PluginError, PluginResult};
use crate::plugin::{ExtensionPlugin, PluginId, PluginState};

/// Run plugin code, catching a panic.
pub(crate) fn contain<R>(f: impl FnOnce() -> R) -> std::thread::Result<R> {
    catch_unwind(AssertUnwindSafe(f))
}

/// Async form of [`contain`].
pub(crate) async fn contain_async<F: Future>(fut: F) -> std::thread::Result<F::Output> {
    AssertUnwindSafe(fut).catch_unwind().await
}

/// Run a synchronous plugin hook, turning a panic into [`PluginError::Panicked`].
pub(crate) fn contain_hook<R>(
    plugin: &str,
    hook: &'static str,
    f: impl FnOnce() -> R,
) -> PluginResult<R> {
    contain(f).map_err(|panic| PluginError::Panicked {
        plugin: plugin.to_string(),
        hook,
        message: panic_message(panic.as_ref()),
    })
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// A plugin that reached the active state.
#[derive(Clone)]
pub struct ActivePlugin {
    /// Plugin id.
    pub id: PluginId,
    /// The plugin object.
    pub plugin: Arc<dyn ExtensionPlugin>,
    /// `Active`, `CleaningUp` or `Terminated`.
    pub state: PluginState,
}

impl fmt::Debug for ActivePlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivePlugin")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Outcome of a cleanup pass.
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Plugins whose `cleanup` hook was invoked.
    pub attempted: Vec<PluginId>,
    /// Timeouts, errors and panics, all treated as warnings.
    pub failures: Vec<PluginError>,
}

struct Shared {
    plugins: RwLock<Vec<ActivePlugin>>,
    started: AtomicBool,
    finished: AtomicBool,
    finished_notify: Notify,
    hooks_installed: AtomicBool,
    timeout: Duration,
}

/// Marks the pass finished even if the running future is dropped.
struct FinishGuard<'a>(&'a Shared);

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.0.finished.store(true, Ordering::SeqCst);
        self.0.finished_notify.notify_waiters();
    }
}

/// Shared handle to the active plugin list; cloned into shutdown hooks.
#[derive(Clone)]
pub struct CleanupHandle {
    shared: Arc<Shared>,
}

impl CleanupHandle {
    /// Create an empty handle with the given per-plugin cleanup timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                plugins: RwLock::new(Vec::new()),
                started: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                finished_notify: Notify::new(),
                hooks_installed: AtomicBool::new(false),
                timeout,
            }),
        }
    }

    pub(crate) fn push(&self, id: PluginId, plugin: Arc<dyn ExtensionPlugin>) {
        self.shared
            .plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ActivePlugin {
                id,
                plugin,
                state: PluginState::Active,
            });
    }

    /// Snapshot of tracked plugins in load order.
    #[must_use]
    pub fn plugins(&self) -> Vec<ActivePlugin> {
        self.shared
            .plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ids of plugins still in the active state.
    #[must_use]
    pub fn active_ids(&self) -> Vec<PluginId> {
        self.plugins()
            .into_iter()
            .filter(|p| p.state == PluginState::Active)
            .map(|p| p.id)
            .collect()
    }

    /// Whether a cleanup pass has finished.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.shared.finished.load(Ordering::SeqCst)
    }

    async fn wait_until_finished(&self) {
        loop {
            let notified = self.shared.finished_notify.notified();
            let mut notified = std::pin::pin!(notified);
            // Register before checking so a pass finishing in between still wakes us.
            notified.as_mut().enable();
            if self.is_done() {
                return;
            }
            notified.await;
        }
    }

    fn set_state(&self, index: usize, state: PluginState) {
        if let Some(entry) = self
            .shared
            .plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(index)
        {
            entry.state = state;
        }
    }

    /// Call every active plugin's `cleanup` hook in load order.
    ///
    /// Each hook is raced against the cleanup timeout. Failures are logged as
    /// warnings and never stop the pass. Runs at most once; a later call
    /// waits until the first pass has finished and returns an empty report.
    pub async fn run(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        if self.shared.started.swap(true, Ordering::SeqCst) {
            debug!("Plugin cleanup already started, waiting for it");
            self.wait_until_finished().await;
            return report;
        }
        let _finish = FinishGuard(&self.shared);

        let plugins = self.plugins();
        info!(count = plugins.len(), "Cleaning up plugins");

        for (index, entry) in plugins.into_iter().enumerate() {
            if entry.state != PluginState::Active {
                continue;
            }
            self.set_state(index, PluginState::CleaningUp);
            report.attempted.push(entry.id.clone());

            let cleanup = contain_async(entry.plugin.cleanup());
            let outcome = tokio::time::timeout(self.shared.timeout, cleanup).await;
            let failure = match outcome {
                Ok(Ok(Ok(()))) => None,
                Ok(Ok(Err(e))) => Some(PluginError::Cleanup {
                    plugin_id: entry.id.to_string(),
                    message: e.to_string(),
                }),
                Ok(Err(panic)) => Some(PluginError::Cleanup {
                    plugin_id: entry.id.to_string(),
                    message: format!("panicked: {}", panic_message(panic.as_ref())),
                }),
                Err(_) => Some(PluginError::CleanupTimeout {
                    plugin_id: entry.id.to_string(),
                    timeout: self.shared.timeout,
                }),
            };
            if let Some(e) = failure {
                warn!(plugin_id = %entry.id, error = %e, "Plugin cleanup failed");
                report.failures.push(e);
            } else {
                debug!(plugin_id = %entry.id, "Plugin cleaned up");
            }
            self.set_state(index, PluginState::Terminated);
        }
        report
    }

    /// Drive `fut` to completion. If it panics, run cleanup and then resume
    /// the panic.
    ///
    /// Panics caught elsewhere, such as inside a spawned task whose
    /// `JoinHandle` reports the failure, never reach this path.
    pub async fn guard<F: Future>(&self, fut: F) -> F::Output {
        match contain_async(fut).await {
            Ok(output) => output,
            Err(panic) => {
                warn!(
                    error = %panic_message(panic.as_ref()),
                    "Host panicked, cleaning up plugins"
                );
                self.run().await;
                std::panic::resume_unwind(panic)
            },
        }
    }

    /// Run cleanup on SIGINT or SIGTERM, then exit the process.
    ///
    /// Does nothing after the first call on this handle.
    pub fn install_process_hooks(&self) {
        self.install_process_hooks_with(wait_for_shutdown_signal(), |report| {
            info!(cleaned = report.attempted.len(), "Exiting after shutdown signal");
            std::process::exit(0);
        });
    }

    /// Spawn a task that waits for `trigger`, runs cleanup and hands the
    /// report to `on_shutdown`.
    ///
    /// Returns `false` if hooks were already installed on this handle or no
    /// Tokio runtime is available.
    pub fn install_process_hooks_with<S, E>(&self, trigger: S, on_shutdown: E) -> bool
    where
        S: Future<Output = ()> + Send + 'static,
        E: FnOnce(CleanupReport) + Send + 'static,
    {
        if self.shared.hooks_installed.swap(true, Ordering::SeqCst) {
            return false;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let handle = self.clone();
                runtime.spawn(async move {
                    trigger.await;
                    info!("Shutdown signal received, cleaning up plugins");
                    let report = handle.run().await;
                    on_shutdown(report);
                });
                debug!("Installed plugin cleanup hooks");
                true
            },
            Err(_) => {
                warn!("No Tokio runtime; plugin cleanup will not run on signals");
                self.shared.hooks_installed.store(false, Ordering::SeqCst);
                false
            },
        }
    }
}

impl fmt::Debug for CleanupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupHandle")
            .field("timeout", &self.shared.timeout)
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {},
                _ = term.recv() => {},
            }
        },
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
        },
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
