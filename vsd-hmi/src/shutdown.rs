//! Cooperative stop signal for the polling tasks, after the pattern in
//! mini-redis.

use tokio::sync::broadcast;

/// Listens for a stop signal sent (or dropped) by the owner of the matching
/// `broadcast::Sender`. Selecting on `recv()` next to an in-flight request
/// cancels that request, so results arriving after a stop are never applied.
#[derive(Debug)]
pub(crate) struct Shutdown {
    /// `true` once the signal has been received.
    shutdown: bool,

    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub(crate) fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            shutdown: false,
            notify,
        }
    }

    /// Receive the stop notice, waiting if necessary.
    pub(crate) async fn recv(&mut self) {
        if self.shutdown {
            return;
        }

        // Closed and lagged both count as a stop: only one value is ever sent.
        let _ = self.notify.recv().await;

        self.shutdown = true;
    }
}

/// Owner side of a scheduler task's stop signal.
#[derive(Debug)]
pub(crate) struct TaskHandle {
    stop: broadcast::Sender<()>,
}

impl TaskHandle {
    pub(crate) fn new() -> (TaskHandle, Shutdown) {
        let (stop, notify) = broadcast::channel(1);
        (TaskHandle { stop }, Shutdown::new(notify))
    }

    pub(crate) fn stop(self) {
        // The task may already have exited on its own.
        let _ = self.stop.send(());
    }
}
