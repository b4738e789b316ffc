//! Periodic manifest-save ticker — an independent scheduled event source
//! whose delivery is serialized into the upload's event queue (§4.7, §5).

use crossbeam_channel::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Delivered on every tick; the FSM treats it as just another event.
#[derive(Debug, Clone, Copy)]
pub struct ManifestSaveTick;

/// Background thread emitting [`ManifestSaveTick`] on a fixed wall-clock
/// interval until cancelled or dropped.
pub struct ManifestTicker {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl ManifestTicker {
    pub fn start(interval: Duration, event_tx: Sender<ManifestSaveTick>) -> Self {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);

        let handle = thread::Builder::new()
            .name("blockvault-ticker".into())
            .spawn(move || {
                let ticks = crossbeam_channel::tick(interval);
                loop {
                    crossbeam_channel::select! {
                        recv(ticks) -> _ => {
                            if event_tx.send(ManifestSaveTick).is_err() {
                                break;
                            }
                        }
                        recv(stop_rx) -> _ => break,
                    }
                }
            })
            .expect("failed to spawn ticker thread");

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Cancel the ticker (§5: shutting down an upload cancels its timer).
    pub fn cancel(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for ManifestTicker {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_at_the_configured_interval() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut ticker = ManifestTicker::start(Duration::from_millis(10), tx);
        rx.recv_timeout(Duration::from_secs(2)).expect("expected at least one tick");
        ticker.cancel();
    }

    #[test]
    fn cancel_stops_further_ticks() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut ticker = ManifestTicker::start(Duration::from_millis(10), tx);
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        ticker.cancel();
        while rx.try_recv().is_ok() {}
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }
}
