//! Work-signal fan-in
//!
//! Every execution context (and the optional auxiliary BLAS backend) owns a
//! "work available" channel that fires when it has queued deferred calls. The
//! [`WorkSignalHub`] runs one relay task per source. A relay marks its
//! [`PendingFlag`] and forwards one wake-up onto a single shared channel that
//! the execution loop waits on. The shared channel is a wake-up only: it says
//! *something* is ready, the flags say *what*.
//!
//! The shared channel is bounded (capacity 1 by default), so a slow consumer
//! applies backpressure to every relay. Each relay also watches a shutdown
//! signal while waiting on its source and while sending, so [`WorkSignalHub::shutdown`]
//! never leaves a task parked on a send nobody will receive.
//!
//! A relay hands its source back when it exits. `shutdown` returns the
//! auxiliary source so a later hub can relay it again; device sources belong
//! to their contexts and are dropped with them.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::device::profile::DeviceId;

/// Sender half of a work-available channel
pub type WorkSender = mpsc::Sender<()>;
/// Receiver half of a work-available channel
pub type WorkReceiver = mpsc::Receiver<()>;

/// "Has pending work" marker shared between one relay and the flush routine
#[derive(Debug, Clone, Default)]
pub struct PendingFlag(Arc<AtomicBool>);

impl PendingFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clear the flag, returning whether it was set
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Which source a relay forwards for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaySource {
    Device(DeviceId),
    Auxiliary,
}

impl fmt::Display for RelaySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelaySource::Device(device) => write!(f, "{}", device),
            RelaySource::Auxiliary => write!(f, "auxiliary backend"),
        }
    }
}

/// Fan-in of per-source work signals into one consumer channel
pub struct WorkSignalHub {
    tx: Option<WorkSender>,
    rx: WorkReceiver,
    shutdown: watch::Sender<bool>,
    relays: Vec<(RelaySource, JoinHandle<WorkReceiver>)>,
    auxiliary_pending: PendingFlag,
    runtime: Handle,
}

impl WorkSignalHub {
    /// Create a hub whose relays run on `runtime`
    ///
    /// `capacity` bounds the shared channel; zero is treated as one.
    pub fn new(capacity: usize, runtime: Handle) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        Self {
            tx: Some(tx),
            rx,
            shutdown,
            relays: Vec::new(),
            auxiliary_pending: PendingFlag::new(),
            runtime,
        }
    }

    /// Share `flag` as the auxiliary pending flag instead of a fresh one
    pub fn with_auxiliary_pending(mut self, flag: PendingFlag) -> Self {
        self.auxiliary_pending = flag;
        self
    }

    /// Start a relay for one device's work channel
    pub fn spawn_device_relay(&mut self, device: DeviceId, source: WorkReceiver, flag: PendingFlag) {
        self.spawn_relay(RelaySource::Device(device), source, flag);
    }

    /// Start the relay for the auxiliary backend; it sets the hub's global flag
    pub fn spawn_auxiliary_relay(&mut self, source: WorkReceiver) {
        let flag = self.auxiliary_pending.clone();
        self.spawn_relay(RelaySource::Auxiliary, source, flag);
    }

    fn spawn_relay(&mut self, label: RelaySource, source: WorkReceiver, flag: PendingFlag) {
        let Some(out) = self.tx.clone() else {
            tracing::warn!(source = %label, "hub is closed, relay not started");
            return;
        };
        let shutdown = self.shutdown.subscribe();
        let handle = self.runtime.spawn(relay(label, source, flag, out, shutdown));
        self.relays.push((label, handle));
    }

    /// Flag set by the auxiliary relay
    pub fn auxiliary_pending(&self) -> &PendingFlag {
        &self.auxiliary_pending
    }

    /// Wait for the next wake-up. `None` once the hub is closed and drained.
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Option<()> {
        self.rx.try_recv().ok()
    }

    /// Inject one wake-up directly, bypassing the relays
    ///
    /// Returns `false` if the hub is closed.
    pub async fn signal(&self) -> bool {
        match &self.tx {
            Some(tx) => tx.send(()).await.is_ok(),
            None => false,
        }
    }

    /// Inject one wake-up if the channel has room, without waiting
    pub fn try_signal(&self) -> bool {
        match &self.tx {
            Some(tx) => tx.try_send(()).is_ok(),
            None => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    /// Relays that have not exited yet
    pub fn active_relays(&self) -> usize {
        self.relays.iter().filter(|(_, h)| !h.is_finished()).count()
    }

    /// Close the hub without waiting for relays to exit.
    ///
    /// Relays observe the shutdown signal and stop; further `recv` calls drain
    /// what is buffered and then return `None`. Sources held by the relays
    /// are dropped.
    pub fn close(&mut self) {
        self.shutdown.send_replace(true);
        self.tx = None;
        self.rx.close();
        self.relays.clear();
    }

    /// Close the hub and wait for every relay task to finish.
    ///
    /// Returns the auxiliary source, if an auxiliary relay was running.
    pub async fn shutdown(&mut self) -> Option<WorkReceiver> {
        self.shutdown.send_replace(true);
        self.tx = None;
        self.rx.close();

        let mut auxiliary = None;
        for (label, handle) in self.relays.drain(..) {
            match handle.await {
                Ok(source) if label == RelaySource::Auxiliary => auxiliary = Some(source),
                Ok(_) => {}
                Err(e) => tracing::warn!(source = %label, error = %e, "relay task ended abnormally"),
            }
        }
        auxiliary
    }
}

impl Drop for WorkSignalHub {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

impl fmt::Debug for WorkSignalHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkSignalHub")
            .field("closed", &self.is_closed())
            .field("relays", &self.relays.len())
            .field("auxiliary_pending", &self.auxiliary_pending.is_set())
            .finish()
    }
}

/// Forward every signal from `source` to `out`, marking `flag` first.
/// Returns `source` on exit.
async fn relay(
    label: RelaySource,
    mut source: WorkReceiver,
    flag: PendingFlag,
    out: WorkSender,
    mut shutdown: watch::Receiver<bool>,
) -> WorkReceiver {
    tracing::trace!(source = %label, "relay started");
    loop {
        if *shutdown.borrow() {
            break;
        }

        let received = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            received = source.recv() => received,
        };

        if received.is_none() {
            tracing::debug!(source = %label, "work channel closed, relay exiting");
            break;
        }

        flag.set();

        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            sent = out.send(()) => {
                if sent.is_err() {
                    tracing::debug!(source = %label, "consumer gone, relay exiting");
                    break;
                }
            }
        }
    }
    tracing::trace!(source = %label, "relay stopped");
    source
}
