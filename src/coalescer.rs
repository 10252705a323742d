//! Debounced durable writes.
//!
//! Mutations only mark the store dirty. A worker thread waits for a quiet
//! window after the last mutation (re-armed by every new one, optionally
//! capped by a max delay from the first) and then runs the flush callback
//! once. The callback reads the document at flush time, so the write always
//! reflects the latest state. Signals that arrive while a flush runs queue
//! up and start the next window.

use crate::error::{Result, StoreError};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

enum Signal {
    Dirty,
    Flush(Sender<Result<()>>),
    Shutdown,
}

/// Dirty span waiting to be flushed.
#[derive(Clone, Copy, Debug)]
struct Pending {
    first: Instant,
    last: Instant,
}

impl Pending {
    fn deadline(&self, window: Duration, max_delay: Option<Duration>) -> Instant {
        let quiet = self.last + window;
        match max_delay {
            Some(max) => quiet.min(self.first + max),
            None => quiet,
        }
    }
}

/// Handle to the coalescing worker.
pub struct WriteCoalescer {
    tx: Sender<Signal>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WriteCoalescer {
    /// Start the worker.
    pub fn spawn<F>(window: Duration, max_delay: Option<Duration>, flush: F) -> Result<Self>
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        let (tx, rx) = unbounded();
        let worker = thread::Builder::new()
            .name("storefront-coalescer".to_string())
            .spawn(move || run(rx, window, max_delay, flush))?;

        Ok(Self {
            tx,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Record a mutation; (re)arms the quiet window.
    pub fn mark_dirty(&self) {
        if self.tx.send(Signal::Dirty).is_err() {
            warn!("write coalescer is gone, mutation will not be persisted");
        }
    }

    /// Flush right away and wait for the result.
    pub fn flush_now(&self) -> Result<()> {
        let (ack_tx, ack_rx) = bounded(1);
        self.tx
            .send(Signal::Flush(ack_tx))
            .map_err(|_| StoreError::ShutDown)?;
        ack_rx.recv().map_err(|_| StoreError::ShutDown)?
    }

    /// Flush pending work and stop the worker.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Signal::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("write coalescer panicked");
            }
        }
    }
}

impl Drop for WriteCoalescer {
    fn drop(&mut self) {
        let _ = self.tx.send(Signal::Shutdown);
    }
}

fn run<F>(rx: Receiver<Signal>, window: Duration, max_delay: Option<Duration>, mut flush: F)
where
    F: FnMut() -> Result<()>,
{
    let mut pending: Option<Pending> = None;

    loop {
        let signal = match pending {
            Some(p) => match rx.recv_deadline(p.deadline(window, max_delay)) {
                Ok(signal) => Some(signal),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => Some(Signal::Shutdown),
            },
            None => match rx.recv() {
                Ok(signal) => Some(signal),
                Err(_) => Some(Signal::Shutdown),
            },
        };

        match signal {
            // Quiet window elapsed
            None => {
                pending = None;
                if let Err(error) = flush() {
                    debug!(%error, "coalesced flush failed");
                }
            }
            Some(Signal::Dirty) => {
                let now = Instant::now();
                pending = Some(match pending {
                    Some(p) => Pending { first: p.first, last: now },
                    None => Pending { first: now, last: now },
                });
            }
            Some(Signal::Flush(ack)) => {
                pending = None;
                let _ = ack.send(flush());
            }
            Some(Signal::Shutdown) => {
                if pending.is_some() {
                    if let Err(error) = flush() {
                        warn!(%error, "final flush failed");
                    }
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(window: Duration, max_delay: Option<Duration>) -> (WriteCoalescer, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let coalescer = WriteCoalescer::spawn(window, max_delay, move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        (coalescer, count)
    }

    #[test]
    fn test_burst_flushes_once() {
        let (coalescer, count) = counting(Duration::from_millis(40), None);

        for _ in 0..20 {
            coalescer.mark_dirty();
        }
        thread::sleep(Duration::from_millis(200));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_spaced_mutations_flush_each() {
        let (coalescer, count) = counting(Duration::from_millis(20), None);

        for _ in 0..3 {
            coalescer.mark_dirty();
            thread::sleep(Duration::from_millis(120));
        }

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_max_delay_caps_continuous_bursts() {
        let (coalescer, count) = counting(Duration::from_millis(50), Some(Duration::from_millis(100)));

        // Keep re-arming faster than the window for ~300ms
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(300) {
            coalescer.mark_dirty();
            thread::sleep(Duration::from_millis(10));
        }
        coalescer.shutdown();

        assert!(count.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_flush_now_reports_result() {
        let coalescer = WriteCoalescer::spawn(Duration::from_secs(60), None, || {
            Err(StoreError::QuotaExceeded { needed: 10, limit: 5 })
        })
        .unwrap();

        let result = coalescer.flush_now();
        assert!(matches!(result, Err(StoreError::QuotaExceeded { .. })));
    }

    #[test]
    fn test_shutdown_flushes_pending() {
        let (coalescer, count) = counting(Duration::from_secs(60), None);
        coalescer.mark_dirty();
        coalescer.shutdown();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(matches!(coalescer.flush_now(), Err(StoreError::ShutDown)));
    }

    #[test]
    fn test_idle_shutdown_does_not_flush() {
        let (coalescer, count) = counting(Duration::from_millis(10), None);
        coalescer.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
