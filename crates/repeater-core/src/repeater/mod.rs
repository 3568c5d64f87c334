//! Repeater pipeline
//!
//! ```text
//! Radio.receive ──> Intake ──(bounded queue)──> Dispatcher ──> Radio.send / wait ready
//!                                                   │
//!                                          DuplicateCache <── Janitor (periodic clear)
//! ```
//!
//! [`Repeater::run`] spawns the workers, waits for the first of: a worker
//! finishing (cleanly or not) or an external shutdown request, then cancels
//! the shared token and tears everything down. Failed workers are never
//! restarted.

pub mod cache;
pub mod dispatch;
pub mod intake;
pub mod stats;

pub use cache::{run_janitor, DuplicateCache, SharedCache};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use intake::Intake;
pub use stats::{RepeaterStats, StatsSnapshot};

use crate::config::RepeaterConfig;
use crate::error::{ConfigResult, RepeaterError};
use crate::radio::Radio;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pipeline worker reporting to the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Worker {
    Intake,
    Dispatcher,
}

impl Worker {
    pub fn name(self) -> &'static str {
        match self {
            Worker::Intake => "uplink intake",
            Worker::Dispatcher => "broadcast dispatcher",
        }
    }
}

impl fmt::Display for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why the pipeline stopped
#[derive(Debug)]
pub enum Shutdown {
    /// External shutdown request
    Interrupted,
    /// A worker returned cleanly (cancelled or its queue closed)
    Completed(Worker),
    /// A worker hit a terminal error
    Failed(Worker, RepeaterError),
}

impl Shutdown {
    pub fn is_failure(&self) -> bool {
        matches!(self, Shutdown::Failed(..))
    }

    fn from_join(worker: Worker, joined: Result<Result<(), RepeaterError>, JoinError>) -> Self {
        match joined {
            Ok(Ok(())) => Shutdown::Completed(worker),
            Ok(Err(e)) => Shutdown::Failed(worker, e),
            Err(_) => Shutdown::Failed(worker, RepeaterError::WorkerCrashed(worker.name())),
        }
    }
}

impl fmt::Display for Shutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shutdown::Interrupted => write!(f, "interrupted"),
            Shutdown::Completed(worker) => write!(f, "{} finished", worker),
            Shutdown::Failed(worker, e) => write!(f, "{} failed: {}", worker, e),
        }
    }
}

/// The repeater core bound to one started radio
pub struct Repeater<R: Radio + 'static> {
    radio: Arc<R>,
    config: RepeaterConfig,
    cache: SharedCache,
    stats: Arc<RepeaterStats>,
    token: CancellationToken,
}

impl<R: Radio + 'static> Repeater<R> {
    /// Bind the pipeline to `radio`; fails on zero intervals or sizes
    pub fn new(radio: Arc<R>, config: RepeaterConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            radio,
            config,
            cache: SharedCache::new(),
            stats: Arc::new(RepeaterStats::new()),
            token: CancellationToken::new(),
        })
    }

    /// Live counters, usable while the pipeline runs
    pub fn stats(&self) -> Arc<RepeaterStats> {
        Arc::clone(&self.stats)
    }

    /// Token shared by all workers; cancelling it stops the pipeline
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Run the pipeline until a worker stops or `shutdown` resolves
    ///
    /// The first signal wins. Once it arrives the token is cancelled, the
    /// remaining worker gets the configured grace period to return and is
    /// aborted past it, and the janitor is stopped.
    pub async fn run<F>(self, shutdown: F) -> Shutdown
    where
        F: Future<Output = ()>,
    {
        let (frames_tx, frames_rx) = mpsc::channel(self.config.queue_capacity);

        let janitor = tokio::spawn(run_janitor(
            self.cache.clone(),
            self.config.eviction_period(),
            self.token.clone(),
            Arc::clone(&self.stats),
        ));

        let intake = Intake::new(
            Arc::clone(&self.radio),
            frames_tx,
            self.token.clone(),
            self.config.uplink_poll_interval(),
            self.config.rx_batch_size,
            Arc::clone(&self.stats),
        );
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.radio),
            frames_rx,
            self.cache.clone(),
            self.token.clone(),
            self.config.tx_poll_interval(),
            self.config.tx_rf_power,
            Arc::clone(&self.stats),
        );

        let mut intake_task = tokio::spawn(intake.run());
        let mut dispatch_task = tokio::spawn(dispatcher.run());
        info!("Repeater pipeline started");

        tokio::pin!(shutdown);
        let outcome = tokio::select! {
            _ = &mut shutdown => Shutdown::Interrupted,
            joined = &mut intake_task => Shutdown::from_join(Worker::Intake, joined),
            joined = &mut dispatch_task => Shutdown::from_join(Worker::Dispatcher, joined),
        };

        match &outcome {
            Shutdown::Failed(_, _) => error!("Stopping repeater: {}", outcome),
            _ => info!("Stopping repeater: {}", outcome),
        }
        self.token.cancel();

        let remaining = match &outcome {
            Shutdown::Interrupted => vec![
                (Worker::Intake, intake_task),
                (Worker::Dispatcher, dispatch_task),
            ],
            Shutdown::Completed(Worker::Intake) | Shutdown::Failed(Worker::Intake, _) => {
                vec![(Worker::Dispatcher, dispatch_task)]
            }
            Shutdown::Completed(Worker::Dispatcher) | Shutdown::Failed(Worker::Dispatcher, _) => {
                vec![(Worker::Intake, intake_task)]
            }
        };
        drain(remaining, Instant::now() + self.config.shutdown_grace()).await;

        if janitor.await.is_err() {
            warn!("Duplicate cache janitor terminated abnormally");
        }

        info!("Repeater stats: {}", self.stats.snapshot());
        outcome
    }
}

/// Give each remaining worker until `deadline` to return, then abort it
async fn drain(workers: Vec<(Worker, JoinHandle<Result<(), RepeaterError>>)>, deadline: Instant) {
    for (worker, mut handle) in workers {
        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(joined) => match Shutdown::from_join(worker, joined) {
                Shutdown::Failed(_, e) => warn!("{} stopped with an error: {}", worker, e),
                _ => debug!("{} stopped", worker),
            },
            Err(_) => {
                warn!("{} did not stop in time, aborting it", worker);
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BoardConfig, HalSettings};
    use crate::error::{ConfigError, RadioError};
    use crate::frame::Frame;
    use crate::radio::{configure, SimRadio, TxStatus};
    use std::time::Duration;

    fn started() -> Arc<SimRadio> {
        let mut radio = SimRadio::new();
        let settings = HalSettings::from_board(&BoardConfig::default()).unwrap();
        configure(&mut radio, &settings).unwrap();
        Arc::new(radio)
    }

    fn frame(crc: u16) -> Frame {
        Frame {
            crc,
            payload: vec![1],
            ..Default::default()
        }
    }

    #[test]
    fn test_shutdown_display() {
        assert_eq!(Shutdown::Interrupted.to_string(), "interrupted");
        assert_eq!(
            Shutdown::Completed(Worker::Dispatcher).to_string(),
            "broadcast dispatcher finished"
        );
        let failed = Shutdown::Failed(Worker::Intake, RadioError::NotRunning.into());
        assert!(failed.is_failure());
        assert_eq!(
            failed.to_string(),
            "uplink intake failed: concentrator is not running"
        );
    }

    #[test]
    fn test_invalid_settings_rejected_before_start() {
        let radio = started();
        let zero_period = RepeaterConfig {
            eviction_period_ms: 0,
            ..Default::default()
        };
        let zero_queue = RepeaterConfig {
            queue_capacity: 0,
            ..Default::default()
        };

        for (config, field) in [(zero_period, "eviction_period_ms"), (zero_queue, "queue_capacity")] {
            match Repeater::new(Arc::clone(&radio), config) {
                Err(ConfigError::InvalidSetting(msg)) => assert!(msg.contains(field), "{}", msg),
                Err(other) => panic!("unexpected error: {}", other),
                Ok(_) => panic!("{} = 0 accepted", field),
            }
        }
        assert_eq!(radio.receive_polls(), 0);
    }

    #[tokio::test]
    async fn test_external_shutdown_interrupts() {
        let radio = started();
        let repeater = Repeater::new(Arc::clone(&radio), RepeaterConfig::default()).unwrap();
        let token = repeater.cancellation_token();

        let outcome = repeater
            .run(tokio::time::sleep(Duration::from_millis(20)))
            .await;
        assert!(matches!(outcome, Shutdown::Interrupted));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_receive_failure_fails_pipeline() {
        let radio = started();
        radio.push_receive_failure("SPI bus gone");
        let repeater = Repeater::new(Arc::clone(&radio), RepeaterConfig::default()).unwrap();

        let outcome = repeater.run(std::future::pending::<()>()).await;
        assert!(matches!(
            outcome,
            Shutdown::Failed(Worker::Intake, RepeaterError::Radio(RadioError::ReceiveFailed(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_dispatcher_is_aborted() {
        let radio = started();
        radio.push_batch(vec![frame(1)]);
        // TX path never frees up again
        radio.fail_next_ready(TxStatus::Emitting);
        let config = RepeaterConfig {
            shutdown_grace_ms: 50,
            ..Default::default()
        };
        let repeater = Repeater::new(Arc::clone(&radio), config).unwrap();
        let stats = repeater.stats();

        let outcome = repeater
            .run(tokio::time::sleep(Duration::from_millis(10)))
            .await;
        assert!(matches!(outcome, Shutdown::Interrupted));
        assert_eq!(radio.transmitted().len(), 1);
        assert_eq!(stats.snapshot().frames_forwarded, 0);
    }
}
