//! Cooperative process shutdown.
//!
//! Every loop checks the signal at its iteration boundary; nothing is
//! preempted mid-flight. A clean stop releases the hardware, an abrupt one
//! skips the teardown.

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopKind {
    /// Stop the concentrator and flush state before exiting.
    Clean,
    /// Exit without touching the hardware.
    Abrupt,
}

#[derive(Debug, Clone)]
pub struct ShutdownController {
    tx: watch::Sender<Option<StopKind>>,
}

#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<Option<StopKind>>,
}

pub fn shutdown_channel() -> (ShutdownController, ShutdownSignal) {
    let (tx, rx) = watch::channel(None);
    (ShutdownController { tx }, ShutdownSignal { rx })
}

impl ShutdownController {
    /// Request termination. An `Abrupt` request upgrades a pending `Clean`
    /// one; the reverse never downgrades.
    pub fn request(&self, kind: StopKind) {
        self.tx.send_if_modified(|state| match (*state, kind) {
            (None, _) | (Some(StopKind::Clean), StopKind::Abrupt) => {
                *state = Some(kind);
                true
            }
            _ => false,
        });
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal { rx: self.tx.subscribe() }
    }
}

impl ShutdownSignal {
    pub fn stop_requested(&self) -> Option<StopKind> {
        *self.rx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.stop_requested().is_none()
    }

    /// Resolves once any stop is requested.
    pub async fn wait(&mut self) -> StopKind {
        loop {
            if let Some(kind) = *self.rx.borrow_and_update() {
                return kind;
            }
            if self.rx.changed().await.is_err() {
                // controller dropped; treat as an abrupt end
                return StopKind::Abrupt;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_reaches_all_subscribers() {
        let (ctl, mut sig) = shutdown_channel();
        let mut other = ctl.subscribe();
        assert!(sig.is_running());

        ctl.request(StopKind::Clean);
        assert_eq!(sig.wait().await, StopKind::Clean);
        assert_eq!(other.wait().await, StopKind::Clean);
    }

    #[tokio::test]
    async fn abrupt_upgrades_clean_but_not_vice_versa() {
        let (ctl, sig) = shutdown_channel();
        ctl.request(StopKind::Clean);
        ctl.request(StopKind::Abrupt);
        assert_eq!(sig.stop_requested(), Some(StopKind::Abrupt));

        ctl.request(StopKind::Clean);
        assert_eq!(sig.stop_requested(), Some(StopKind::Abrupt));
    }
}
