//! Backpressure-aware hand-off between the logging layer and a
//! [`LogSink`].
//!
//! In asynchronous mode a bounded queue feeds one background worker thread
//! that owns the sink; emission never waits longer than the enqueue
//! timeout and never observes a delivery failure. In synchronous mode the
//! sink is driven inline and emission absorbs its latency; on runtime
//! threads the send detaches instead and [`Shipper::close`] waits for it.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use tokio::runtime;
use tokio::task::JoinHandle;

use crate::record::StructuredRecord;
use crate::sink::LogSink;

/// Interval at which the idle worker re-checks the closed flag, covering a
/// shutdown whose sentinel could not be enqueued.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Whether emission blocks on delivery or hands records to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Emission drives the sink inline and absorbs its latency. Meant for
    /// low-volume thread-based hosts and short-lived tools.
    Sync,
    /// Emission enqueues onto the bounded queue; the background worker
    /// owns the sink. The default.
    #[default]
    Async,
}

/// Queue and shutdown tuning for [`Shipper`].
#[derive(Clone, Debug)]
pub struct ShipperConfig {
    pub mode: DeliveryMode,
    /// Maximum queued records before producers start timing out.
    pub queue_capacity: usize,
    /// How long an emission waits for queue space before dropping.
    pub enqueue_timeout: Duration,
    /// How long [`Shipper::close`] waits for the worker to finish.
    pub shutdown_timeout: Duration,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        ShipperConfig {
            mode: DeliveryMode::Async,
            queue_capacity: 100,
            enqueue_timeout: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

enum QueueEntry {
    Record(StructuredRecord),
    /// Shutdown sentinel; the worker exits when it dequeues this.
    Stop,
}

tokio::task_local! {
    static SHIPPING_TASK: bool;
}

thread_local! {
    static SHIPPING_THREAD: Cell<bool> = Cell::new(false);
}

/// True while the current thread or task is inside a sink delivery.
///
/// The HTTP stack underneath a sink emits its own trace events; if the
/// layer observed them it would enqueue records into the very queue being
/// drained, recursing through the same broken sink on every failure. The
/// layer consults this flag and skips such events.
pub(crate) fn is_shipping() -> bool {
    if SHIPPING_TASK.try_with(|shipping| *shipping).unwrap_or(false) {
        return true;
    }
    SHIPPING_THREAD.with(Cell::get)
}

/// Mark the current thread as inside a delivery until the guard drops.
pub(crate) fn mark_thread_shipping() -> ThreadShippingGuard {
    SHIPPING_THREAD.with(|cell| cell.set(true));
    ThreadShippingGuard
}

pub(crate) struct ThreadShippingGuard;

impl Drop for ThreadShippingGuard {
    fn drop(&mut self) {
        SHIPPING_THREAD.with(|cell| cell.set(false));
    }
}

/// Hands rendered records to a [`LogSink`] without letting delivery
/// latency or delivery failures reach the emitting code.
///
/// All failure reporting goes to stderr: the shipper sits underneath the
/// logging pipeline and must not log through it.
pub struct Shipper {
    sink: Arc<dyn LogSink>,
    mode: DeliveryMode,
    enqueue_timeout: Duration,
    shutdown_timeout: Duration,
    sender: Option<Sender<QueueEntry>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    /// Sync-mode sends detached onto an ambient runtime; drained by close().
    detached: Mutex<Vec<JoinHandle<()>>>,
    closed: Arc<AtomicBool>,
    enqueued: AtomicU64,
    dropped: AtomicU64,
    /// Drives the sink for inline sends on threads without a runtime.
    inline_runtime: Option<runtime::Runtime>,
}

impl Shipper {
    /// Create a shipper around `sink`.
    ///
    /// Asynchronous mode spawns the single worker thread immediately; it
    /// runs until [`close`](Shipper::close) hands it the stop sentinel.
    pub fn new(sink: Arc<dyn LogSink>, config: ShipperConfig) -> Self {
        let closed = Arc::new(AtomicBool::new(false));
        match config.mode {
            DeliveryMode::Async => {
                let (sender, receiver) = bounded(config.queue_capacity.max(1));
                let worker_sink = Arc::clone(&sink);
                let worker_closed = Arc::clone(&closed);
                let spawned = thread::Builder::new()
                    .name("logship-ship".to_string())
                    .spawn(move || worker_loop(receiver, worker_sink, worker_closed));
                let worker = match spawned {
                    Ok(handle) => Some(handle),
                    Err(err) => {
                        eprintln!("logship: failed to spawn shipper worker: {err}");
                        None
                    }
                };
                Shipper {
                    sink,
                    mode: DeliveryMode::Async,
                    enqueue_timeout: config.enqueue_timeout,
                    shutdown_timeout: config.shutdown_timeout,
                    sender: Some(sender),
                    worker: Mutex::new(worker),
                    detached: Mutex::new(Vec::new()),
                    closed,
                    enqueued: AtomicU64::new(0),
                    dropped: AtomicU64::new(0),
                    inline_runtime: None,
                }
            }
            DeliveryMode::Sync => {
                let inline_runtime = match runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => Some(rt),
                    Err(err) => {
                        eprintln!("logship: failed to build inline runtime: {err}");
                        None
                    }
                };
                Shipper {
                    sink,
                    mode: DeliveryMode::Sync,
                    enqueue_timeout: config.enqueue_timeout,
                    shutdown_timeout: config.shutdown_timeout,
                    sender: None,
                    worker: Mutex::new(None),
                    detached: Mutex::new(Vec::new()),
                    closed,
                    enqueued: AtomicU64::new(0),
                    dropped: AtomicU64::new(0),
                    inline_runtime,
                }
            }
        }
    }

    /// Hand one record to the sink according to the delivery mode.
    ///
    /// Never blocks longer than the enqueue timeout in asynchronous mode
    /// and never propagates delivery failures: overflow and sink errors
    /// are counted and reported on stderr instead.
    pub fn ship(&self, record: StructuredRecord) {
        if self.closed.load(Ordering::Acquire) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        match self.mode {
            DeliveryMode::Async => self.enqueue(record),
            DeliveryMode::Sync => self.send_inline(record),
        }
    }

    fn enqueue(&self, record: StructuredRecord) {
        let sender = match &self.sender {
            Some(sender) => sender,
            None => return,
        };
        match sender.send_timeout(QueueEntry::Record(record), self.enqueue_timeout) {
            Ok(()) => {
                self.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(SendTimeoutError::Timeout(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                eprintln!("logship: queue full, dropping log record");
            }
            // Worker gone during shutdown; drop quietly.
            Err(SendTimeoutError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn send_inline(&self, record: StructuredRecord) {
        match runtime::Handle::try_current() {
            // Blocking a runtime thread is not allowed; detach the send
            // onto the ambient runtime instead. The handle is kept so
            // close() can wait for the send.
            Ok(handle) => {
                let sink = Arc::clone(&self.sink);
                let task = handle.spawn(SHIPPING_TASK.scope(true, async move {
                    if let Err(err) = sink.send(&record).await {
                        eprintln!("logship: log delivery failed: {err}");
                    }
                }));
                if let Ok(mut detached) = self.detached.lock() {
                    detached.retain(|t| !t.is_finished());
                    detached.push(task);
                }
                self.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                let rt = match &self.inline_runtime {
                    Some(rt) => rt,
                    None => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                };
                let _guard = mark_thread_shipping();
                if let Err(err) = rt.block_on(self.sink.send(&record)) {
                    eprintln!("logship: log delivery failed: {err}");
                }
                self.enqueued.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Stop accepting records, ask the worker to drain, and wait for it,
    /// bounded by the shutdown timeout. Sync-mode sends that were detached
    /// onto an ambient runtime are waited on the same way.
    ///
    /// Idempotent: the second and later calls return immediately. An
    /// in-flight send is not interrupted; a worker or detached send that
    /// outlives the timeout is abandoned rather than waited on forever.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(sender) = &self.sender {
            // Best effort: if the queue is full the worker notices the
            // closed flag on its next poll instead.
            let _ = sender.send_timeout(QueueEntry::Stop, self.enqueue_timeout);
        }

        let handle = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            let deadline = Instant::now() + self.shutdown_timeout;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                eprintln!(
                    "logship: worker did not stop within {:?}, abandoning it",
                    self.shutdown_timeout
                );
            }
        }

        let detached = match self.detached.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => Vec::new(),
        };
        if !detached.is_empty() {
            let deadline = Instant::now() + self.shutdown_timeout;
            while detached.iter().any(|t| !t.is_finished()) && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if detached.iter().any(|t| !t.is_finished()) {
                eprintln!(
                    "logship: detached sends did not finish within {:?}, abandoning them",
                    self.shutdown_timeout
                );
            }
        }
    }

    /// Records accepted for delivery so far.
    pub fn enqueued_count(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Records dropped because the queue stayed full past the timeout or
    /// the shipper was already closed.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Shipper {
    fn drop(&mut self) {
        // Best effort only; the bounded join belongs to close().
        if !self.closed.swap(true, Ordering::AcqRel) {
            if let Some(sender) = &self.sender {
                let _ = sender.try_send(QueueEntry::Stop);
            }
        }
        if let Some(rt) = self.inline_runtime.take() {
            // Dropping a runtime blocks, which panics on a runtime thread.
            if runtime::Handle::try_current().is_ok() {
                rt.shutdown_background();
            }
        }
    }
}

fn worker_loop(receiver: Receiver<QueueEntry>, sink: Arc<dyn LogSink>, closed: Arc<AtomicBool>) {
    // Everything the HTTP stack logs on this thread would otherwise
    // re-enter the layer and feed the queue being drained here.
    SHIPPING_THREAD.with(|cell| cell.set(true));

    let rt = match runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("logship: failed to build worker runtime: {err}");
            return;
        }
    };

    loop {
        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(QueueEntry::Record(record)) => {
                if let Err(err) = rt.block_on(sink.send(&record)) {
                    eprintln!("logship: log delivery failed: {err}");
                }
            }
            Ok(QueueEntry::Stop) => break,
            Err(RecvTimeoutError::Timeout) => {
                if closed.load(Ordering::Acquire) && receiver.is_empty() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if let Err(err) = rt.block_on(sink.flush()) {
        eprintln!("logship: flush on shutdown failed: {err}");
    }
}
