//! Single-threaded reactor.
//!
//! [`EventLoop`] owns a current-thread tokio runtime and drives it on the thread that calls
//! [`EventLoop::run`]. Everything scheduled through a [`LoopHandle`] executes on that thread:
//!
//! - [`LoopHandle::defer`] queues a callback; callbacks run in FIFO enqueue order.
//! - [`LoopHandle::spawn`] starts a tracked task, so slow async work (message handlers,
//!   directory writes) never holds up the queue.
//! - [`LoopHandle::safe_stop`] is a cooperative stop: callbacks already queued still run, and
//!   tracked tasks get up to the shutdown grace to finish.
//! - [`LoopHandle::stop`] is a forced stop: queued callbacks are dropped.
//!
//! Handles are `Send + Clone` and only push into channels, so they can be used from any thread.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::error::{DbotError, Result};

/// Upper bound on how long a cooperative stop waits for tracked tasks.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Command {
    Run(Job),
    Stop,
}

struct Shared {
    running: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
    force: Notify,
}

/// Decrements the in-flight count when a tracked task finishes or is dropped.
struct TaskGuard(Arc<Shared>);

impl TaskGuard {
    fn enter(shared: Arc<Shared>) -> Self {
        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(shared)
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_one();
        }
    }
}

/// Cloneable, thread-safe access to a running (or not yet started) [`EventLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    queue: mpsc::UnboundedSender<Command>,
    runtime: tokio::runtime::Handle,
    shared: Arc<Shared>,
}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopHandle")
            .field("running", &self.is_running())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl LoopHandle {
    /// Queues `job` to run on the loop thread and returns immediately.
    ///
    /// Jobs queued before the loop starts run once it does. Fails with
    /// [`DbotError::LoopClosed`] once the loop has stopped.
    pub fn defer<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue
            .send(Command::Run(Box::new(job)))
            .map_err(|_| DbotError::LoopClosed)
    }

    /// Starts `future` as a task on the loop's runtime.
    ///
    /// A cooperative stop waits (up to the shutdown grace) for tracked tasks to finish.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = TaskGuard::enter(Arc::clone(&self.shared));
        self.runtime.spawn(async move {
            let _guard = guard;
            future.await;
        });
    }

    /// Requests a cooperative stop if the loop is running; a no-op otherwise.
    pub fn safe_stop(&self) {
        if self.is_running() {
            debug!("event loop: cooperative stop requested");
            // The receiver only disappears after the loop has stopped.
            let _ = self.queue.send(Command::Stop);
        }
    }

    /// Stops the loop without running queued callbacks or waiting for tracked tasks.
    pub fn stop(&self) {
        if self.is_running() {
            warn!("event loop: forced stop requested");
            self.shared.force.notify_one();
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Number of tracked tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }
}

/// Single-threaded reactor; see the module docs.
///
/// An `EventLoop` runs at most once. Must be created, run and dropped outside of any other
/// tokio runtime.
pub struct EventLoop {
    runtime: Runtime,
    handle: LoopHandle,
    queue: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    shutdown_grace: Duration,
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("handle", &self.handle)
            .field("shutdown_grace", &self.shutdown_grace)
            .finish()
    }
}

impl EventLoop {
    pub fn new() -> Result<Self> {
        Self::with_shutdown_grace(DEFAULT_SHUTDOWN_GRACE)
    }

    pub fn with_shutdown_grace(shutdown_grace: Duration) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .thread_name("dbot-reactor")
            .build()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = LoopHandle {
            queue: tx,
            runtime: runtime.handle().clone(),
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                force: Notify::new(),
            }),
        };
        Ok(Self {
            runtime,
            handle,
            queue: Mutex::new(Some(rx)),
            shutdown_grace,
        })
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Drives `future` to completion on the loop's runtime without starting the loop.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Starts the loop, spawns `block` on it, and blocks the calling thread until the loop
    /// stops.
    ///
    /// `block` is where callers wire their I/O; it runs as a tracked task.
    pub fn run<F, Fut>(&self, block: F) -> Result<()>
    where
        F: FnOnce(LoopHandle) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut queue = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(DbotError::LoopConsumed)?;

        let handle = self.handle.clone();
        let shared = Arc::clone(&self.handle.shared);
        let grace = self.shutdown_grace;

        self.runtime.block_on(async move {
            shared.running.store(true, Ordering::SeqCst);
            info!("event loop started");
            handle.spawn(block(handle.clone()));

            let forced = loop {
                tokio::select! {
                    biased;
                    _ = shared.force.notified() => break true,
                    command = queue.recv() => match command {
                        Some(Command::Run(job)) => job(),
                        Some(Command::Stop) | None => break false,
                    },
                }
            };

            shared.running.store(false, Ordering::SeqCst);
            queue.close();

            if forced {
                let mut dropped = 0usize;
                while queue.try_recv().is_ok() {
                    dropped += 1;
                }
                warn!(dropped, "event loop stopped (forced)");
                return;
            }

            while let Ok(command) = queue.try_recv() {
                if let Command::Run(job) = command {
                    job();
                }
            }

            if tokio::time::timeout(grace, wait_idle(&shared)).await.is_err() {
                warn!(
                    in_flight = shared.in_flight.load(Ordering::SeqCst),
                    grace_ms = grace.as_millis() as u64,
                    "event loop: shutdown grace elapsed with tasks still running"
                );
            }
            info!("event loop stopped");
        });

        Ok(())
    }
}

async fn wait_idle(shared: &Shared) {
    while shared.in_flight.load(Ordering::SeqCst) > 0 {
        shared.idle.notified().await;
    }
}
