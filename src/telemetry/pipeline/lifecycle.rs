//! Process exit hooks that flush registered pipelines.
//!
//! A [`LifecycleGuard`] holds only a `Weak` to its controller. Hooks close
//! their pipeline on guard drop, on [`run_exit_hooks`] and from the optional
//! signal task. A hook whose controller is gone does nothing; one whose
//! controller already closed gets the cached close result back.
//!
//! The chained panic hook only closes when the panic ends the process. Other
//! panics may be caught, so their pipelines are flushed and left running.

use parking_lot::Mutex;
use std::sync::{Arc, Once, OnceLock, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::telemetry::pipeline::controller::{
    CloseReport, PipelineController, WORKER_THREAD_NAME,
};
use crate::telemetry::pipeline::state::PipelineState;

struct ExitHook {
    id: u64,
    target: Weak<PipelineController>,
    timeout: Duration,
}

#[derive(Default)]
struct ExitRegistry {
    next_id: u64,
    hooks: Vec<ExitHook>,
}

fn registry() -> &'static Mutex<ExitRegistry> {
    static REGISTRY: OnceLock<Mutex<ExitRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(ExitRegistry::default()))
}

fn fire(
    target: &Weak<PipelineController>,
    timeout: Duration,
) -> Option<Result<CloseReport, PipelineError>> {
    let controller = target.upgrade()?;
    Some(controller.close(timeout))
}

/// Closes a pipeline when the process is on its way out.
pub struct LifecycleGuard {
    id: u64,
    target: Weak<PipelineController>,
    timeout: Duration,
}

impl LifecycleGuard {
    /// Register `controller` with its configured exit flush timeout.
    pub fn register(controller: &Arc<PipelineController>) -> Self {
        let timeout = controller.config().exit_flush_timeout();
        Self::register_with_timeout(controller, timeout)
    }

    pub fn register_with_timeout(controller: &Arc<PipelineController>, timeout: Duration) -> Self {
        install_panic_hook();
        let target = Arc::downgrade(controller);
        let mut registry = registry().lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.hooks.push(ExitHook {
            id,
            target: target.clone(),
            timeout,
        });
        debug!(hook_id = id, timeout_ms = timeout.as_millis() as u64, "Registered exit hook");
        Self {
            id,
            target,
            timeout,
        }
    }

    /// Run this guard's hook now. `None` if the controller is gone.
    pub fn flush_now(&self) -> Option<Result<CloseReport, PipelineError>> {
        fire(&self.target, self.timeout)
    }

    pub fn is_attached(&self) -> bool {
        self.target.strong_count() > 0
    }
}

impl Drop for LifecycleGuard {
    fn drop(&mut self) {
        registry().lock().hooks.retain(|hook| hook.id != self.id);
        if let Some(Err(e)) = fire(&self.target, self.timeout) {
            warn!(error = %e, "Exit flush did not complete");
        }
    }
}

fn take_hooks() -> Vec<ExitHook> {
    std::mem::take(&mut registry().lock().hooks)
}

/// Flush every registered pipeline. Call before `std::process::exit`.
///
/// Returns how many live pipelines were closed.
pub fn run_exit_hooks() -> usize {
    let hooks = take_hooks();
    let mut flushed = 0;
    for hook in hooks {
        match fire(&hook.target, hook.timeout) {
            Some(Ok(_)) => flushed += 1,
            Some(Err(e)) => {
                flushed += 1;
                warn!(hook_id = hook.id, error = %e, "Exit flush did not complete");
            }
            None => {}
        }
    }
    flushed
}

/// Whether a panic on the current thread takes the process down with it.
fn panic_is_fatal() -> bool {
    cfg!(panic = "abort") || std::thread::current().name() == Some("main")
}

/// Panic path. Only pipelines still running are touched, so a panic raised
/// while a close is under way never re-enters it.
fn run_panic_hooks() {
    if std::thread::current().name() == Some(WORKER_THREAD_NAME) {
        return;
    }
    if panic_is_fatal() {
        for hook in take_hooks() {
            if let Some(controller) = hook.target.upgrade() {
                if controller.state() == PipelineState::Running {
                    let _ = controller.close(hook.timeout);
                }
            }
        }
        return;
    }

    let live: Vec<(Weak<PipelineController>, Duration)> = registry()
        .lock()
        .hooks
        .iter()
        .map(|hook| (hook.target.clone(), hook.timeout))
        .collect();
    for (target, timeout) in live {
        if let Some(controller) = target.upgrade() {
            if controller.state() == PipelineState::Running && !controller.flush(timeout) {
                warn!("Panic flush did not complete before its deadline");
            }
        }
    }
}

fn install_panic_hook() {
    static INSTALLED: Once = Once::new();
    INSTALLED.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            previous(info);
            run_panic_hooks();
        }));
    });
}

/// Flush registered pipelines on SIGINT or SIGTERM. Must run inside a tokio runtime.
///
/// The task only flushes; exiting remains the application's decision.
pub fn spawn_signal_flush() -> tokio::task::JoinHandle<usize> {
    tokio::spawn(async {
        wait_for_termination().await;
        info!("Termination signal received, flushing analytics pipelines");
        tokio::task::spawn_blocking(run_exit_hooks)
            .await
            .unwrap_or(0)
    })
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, listening for ctrl-c only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}
