//! Background worker threads.
//!
//! Every worker is the same loop: drain a [`Subscription`], call a handler
//! per message, optionally run a periodic sweep, stop on shutdown.

pub mod dispatch_worker;
pub mod inbound_worker;

pub use dispatch_worker::DispatchWorker;
pub use inbound_worker::InboundWorker;

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use counterflow_events::Subscription;

/// How long a worker without a sweep blocks before checking for shutdown.
const IDLE_POLL: Duration = Duration::from_millis(250);

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// Messages queued on the subscription at that point are handled first.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            if j.join().is_err() {
                warn!(worker = self.name, "worker thread panicked");
            }
        }
    }
}

/// Spawn a worker thread.
///
/// - `on_message`: called for each received message; must be idempotent
///   (at-least-once delivery)
/// - `sweep`: `(interval, job)` run every `interval` whether or not messages
///   arrive
///
/// The worker stops on shutdown, when its handle is dropped, or when the
/// subscription disconnects.
pub fn spawn_worker<M, H, HE, T, TE>(
    name: &'static str,
    subscription: Subscription<M>,
    mut on_message: H,
    sweep: Option<(Duration, T)>,
) -> io::Result<WorkerHandle>
where
    M: Send + 'static,
    H: FnMut(M) -> Result<(), HE> + Send + 'static,
    HE: core::fmt::Debug,
    T: FnMut() -> Result<(), TE> + Send + 'static,
    TE: core::fmt::Debug,
{
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    let join = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || worker_loop(name, subscription, shutdown_rx, &mut on_message, sweep))?;

    Ok(WorkerHandle {
        name,
        shutdown: shutdown_tx,
        join: Some(join),
    })
}

fn worker_loop<M, H, HE, T, TE>(
    name: &'static str,
    subscription: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    on_message: &mut H,
    mut sweep: Option<(Duration, T)>,
) where
    H: FnMut(M) -> Result<(), HE>,
    HE: core::fmt::Debug,
    T: FnMut() -> Result<(), TE>,
    TE: core::fmt::Debug,
{
    let mut next_sweep = sweep.as_ref().map(|(interval, _)| Instant::now() + *interval);

    loop {
        if !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty)) {
            // Messages already queued are still handled.
            for msg in subscription.drain() {
                if let Err(err) = on_message(msg) {
                    warn!(worker = name, error = ?err, "worker handler failed");
                }
            }
            break;
        }

        let wait = next_sweep
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or(IDLE_POLL);

        match subscription.recv_timeout(wait) {
            Ok(msg) => {
                if let Err(err) = on_message(msg) {
                    warn!(worker = name, error = ?err, "worker handler failed");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                debug!(worker = name, "subscription closed");
                break;
            }
        }

        if let (Some(at), Some((interval, job))) = (next_sweep, sweep.as_mut()) {
            let now = Instant::now();
            if now >= at {
                if let Err(err) = job() {
                    warn!(worker = name, error = ?err, "worker sweep failed");
                }
                next_sweep = Some(now + *interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use counterflow_events::{EventBus, InMemoryEventBus};

    type NoSweep = fn() -> Result<(), ()>;

    #[test]
    fn handles_messages_until_shutdown() {
        let bus = InMemoryEventBus::<u32>::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = mpsc::channel();

        let counter = seen.clone();
        let handle = spawn_worker(
            "test-worker",
            bus.subscribe(),
            move |n: u32| -> Result<(), ()> {
                counter.fetch_add(n as usize, Ordering::SeqCst);
                let _ = done_tx.send(());
                Ok(())
            },
            None::<(Duration, NoSweep)>,
        )
        .unwrap();

        bus.publish(2).unwrap();
        bus.publish(3).unwrap();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        handle.shutdown();
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn sweep_runs_without_messages() {
        let bus = InMemoryEventBus::<u32>::new();
        let (tick_tx, tick_rx) = mpsc::channel();

        let handle = spawn_worker(
            "sweeper",
            bus.subscribe(),
            |_: u32| -> Result<(), ()> { Ok(()) },
            Some((Duration::from_millis(10), move || -> Result<(), ()> {
                let _ = tick_tx.send(());
                Ok(())
            })),
        )
        .unwrap();

        tick_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        tick_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.shutdown();
    }

    #[test]
    fn shutdown_handles_queued_messages() {
        let bus = InMemoryEventBus::<u32>::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = seen.clone();
        let handle = spawn_worker(
            "drainer",
            bus.subscribe(),
            move |_: u32| -> Result<(), ()> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            None::<(Duration, NoSweep)>,
        )
        .unwrap();

        for n in 0..100 {
            bus.publish(n).unwrap();
        }
        handle.shutdown();

        assert_eq!(seen.load(Ordering::SeqCst), 100);
    }
}
