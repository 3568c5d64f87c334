//! Broadcast dispatcher
//!
//! Takes frames off the intake queue one at a time and repeats each CRC at
//! most once per cache epoch. The cache lock is held from the duplicate
//! check until the frame is either recorded or abandoned, which also keeps
//! a single transmission in flight: the next send cannot start before the
//! TX path has been seen free.

use super::cache::SharedCache;
use super::stats::RepeaterStats;
use crate::error::{RadioError, RepeaterError};
use crate::frame::Frame;
use crate::radio::{self, Radio};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What happened to one frame
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Repeated, and its CRC recorded
    Forwarded,
    /// Already repeated this epoch, dropped
    Duplicate,
    /// The TX path refused the frame
    SendFailed(RadioError),
    /// Sent, but the TX path never reported free
    WaitFailed(RadioError),
}

/// Transmit-side worker
pub struct Dispatcher<R: Radio> {
    radio: Arc<R>,
    frames: mpsc::Receiver<Frame>,
    cache: SharedCache,
    token: CancellationToken,
    tx_poll: Duration,
    rf_power: i8,
    stats: Arc<RepeaterStats>,
}

impl<R: Radio> Dispatcher<R> {
    pub fn new(
        radio: Arc<R>,
        frames: mpsc::Receiver<Frame>,
        cache: SharedCache,
        token: CancellationToken,
        tx_poll: Duration,
        rf_power: i8,
        stats: Arc<RepeaterStats>,
    ) -> Self {
        Self {
            radio,
            frames,
            cache,
            token,
            tx_poll,
            rf_power,
            stats,
        }
    }

    /// Dispatch frames until cancelled or the intake side closes
    ///
    /// Waiting for the next frame and cancellation are raced, so an idle
    /// dispatcher stops as soon as the token fires. Transmit errors are
    /// per-frame and never end the loop.
    pub async fn run(mut self) -> Result<(), RepeaterError> {
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                frame = self.frames.recv() => match frame {
                    Some(frame) => frame,
                    None => {
                        debug!("Intake queue closed");
                        break;
                    }
                },
            };
            self.dispatch(&frame).await;
        }
        // Unblocks an intake waiting on a full queue
        self.frames.close();
        debug!("Broadcast dispatcher stopped");
        Ok(())
    }

    /// Run one frame through the duplicate check and the TX path
    pub async fn dispatch(&self, frame: &Frame) -> DispatchOutcome {
        let mut cache = self.cache.lock().await;

        if cache.contains(frame.crc) {
            self.stats.record_duplicate();
            info!("Dropped duplicate crc={:04x}", frame.crc);
            return DispatchOutcome::Duplicate;
        }

        if let Err(e) = radio::transmit(self.radio.as_ref(), frame, self.rf_power) {
            self.stats.record_send_failure();
            warn!("Repeat of crc={:04x} failed: {}", frame.crc, e);
            return DispatchOutcome::SendFailed(e);
        }

        if let Err(e) = radio::wait_ready(self.radio.as_ref(), self.tx_poll).await {
            self.stats.record_wait_failure();
            warn!("TX path not ready after crc={:04x}: {}", frame.crc, e);
            return DispatchOutcome::WaitFailed(e);
        }

        cache.insert(frame.crc);
        self.stats.record_forwarded();
        info!("Repeated {}", frame);
        DispatchOutcome::Forwarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BoardConfig, HalSettings};
    use crate::radio::{configure, RadioEvent, SimRadio, TxStatus};

    fn frame(crc: u16) -> Frame {
        Frame {
            freq_hz: 922_400_000,
            crc,
            payload: crc.to_be_bytes().to_vec(),
            ..Default::default()
        }
    }

    fn dispatcher(radio: &Arc<SimRadio>) -> (Dispatcher<SimRadio>, mpsc::Sender<Frame>, CancellationToken) {
        let (tx, rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        let dispatcher = Dispatcher::new(
            Arc::clone(radio),
            rx,
            SharedCache::new(),
            token.clone(),
            Duration::from_micros(100),
            14,
            Arc::new(RepeaterStats::new()),
        );
        (dispatcher, tx, token)
    }

    fn started() -> Arc<SimRadio> {
        let mut radio = SimRadio::new();
        let settings = HalSettings::from_board(&BoardConfig::default()).unwrap();
        configure(&mut radio, &settings).unwrap();
        Arc::new(radio)
    }

    #[tokio::test]
    async fn test_dispatch_drops_duplicates() {
        let radio = started();
        let (dispatcher, _tx, _token) = dispatcher(&radio);

        assert_eq!(dispatcher.dispatch(&frame(0xA)).await, DispatchOutcome::Forwarded);
        assert_eq!(dispatcher.dispatch(&frame(0xA)).await, DispatchOutcome::Duplicate);
        assert_eq!(dispatcher.dispatch(&frame(0xB)).await, DispatchOutcome::Forwarded);

        let payloads: Vec<_> = radio.transmitted().into_iter().map(|r| r.payload).collect();
        assert_eq!(payloads, vec![vec![0x00, 0x0A], vec![0x00, 0x0B]]);
        assert_eq!(dispatcher.stats.snapshot().duplicates_dropped, 1);
    }

    #[tokio::test]
    async fn test_failed_send_stays_retryable() {
        let radio = started();
        let (dispatcher, _tx, _token) = dispatcher(&radio);

        radio.fail_next_sends(1);
        assert!(matches!(
            dispatcher.dispatch(&frame(7)).await,
            DispatchOutcome::SendFailed(RadioError::SendFailed(_))
        ));
        assert_eq!(dispatcher.dispatch(&frame(7)).await, DispatchOutcome::Forwarded);
    }

    #[tokio::test]
    async fn test_failed_wait_stays_retryable() {
        let radio = started();
        let (dispatcher, _tx, _token) = dispatcher(&radio);

        radio.fail_next_ready(TxStatus::Unknown);
        assert_eq!(
            dispatcher.dispatch(&frame(7)).await,
            DispatchOutcome::WaitFailed(RadioError::TxStatusUnknown)
        );
        // Modem stays pinned until the next send goes through
        radio.set_tx_status(TxStatus::Free);
        assert_eq!(dispatcher.dispatch(&frame(7)).await, DispatchOutcome::Forwarded);
        assert_eq!(radio.transmitted().len(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_waits_for_free_between_sends() {
        let radio = started();
        radio.set_busy_polls(3);
        let (dispatcher, _tx, _token) = dispatcher(&radio);

        for crc in 1..=3 {
            dispatcher.dispatch(&frame(crc)).await;
        }

        let mut free_seen = true;
        for event in radio.events() {
            match event {
                RadioEvent::Send { .. } => {
                    assert!(free_seen, "send issued while TX path busy");
                    free_seen = false;
                }
                RadioEvent::Status(TxStatus::Free) => free_seen = true,
                _ => {}
            }
        }
        assert_eq!(radio.transmitted().len(), 3);
    }

    #[tokio::test]
    async fn test_dispatcher_stops_when_idle_and_cancelled() {
        let radio = started();
        let (dispatcher, tx, token) = dispatcher(&radio);
        let task = tokio::spawn(dispatcher.run());

        tx.send(frame(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        token.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(radio.transmitted().len(), 1);
        assert!(tx.send(frame(2)).await.is_err());
    }

    #[tokio::test]
    async fn test_dispatcher_stops_when_queue_closed() {
        let radio = started();
        let (dispatcher, tx, _token) = dispatcher(&radio);
        tx.send(frame(1)).await.unwrap();
        tx.send(frame(1)).await.unwrap();
        drop(tx);

        dispatcher.run().await.unwrap();
        assert_eq!(radio.transmitted().len(), 1);
    }
}
