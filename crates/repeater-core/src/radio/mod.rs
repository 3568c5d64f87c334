//! Concentrator radio contract
//!
//! The [`Radio`] trait is the narrow surface the repeater needs from a
//! concentrator HAL: a handful of configuration calls made once at startup,
//! then three runtime primitives (receive poll, transmit, TX status read).
//!
//! The transmit discipline is built on top of those primitives here:
//!
//! - [`transmit`] checks the TX path is not already emitting, then submits
//!   an immediate retransmission of a frame.
//! - [`wait_ready`] polls the TX status until the modem is free again.
//!
//! Runtime methods take `&self`; implementations serialize access to the
//! hardware internally, so intake and dispatch can share one handle.

pub mod sim;

pub use sim::{RadioEvent, SimRadio};

use crate::config::{BoardSettings, HalSettings, IfChainSettings, RfChainSettings, TxGain};
use crate::config::settings::{IF_FSK_STD, IF_LORA_STD};
use crate::error::{ConfigResult, RadioError, RadioResult};
use crate::frame::{Frame, TxRequest};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// State of the concentrator's TX modem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Status could not be determined
    Unknown,
    /// TX modem disabled, it will ignore commands
    Off,
    /// Ready to accept a command
    Free,
    /// Loaded, waiting for its trigger
    Scheduled,
    /// Emitting
    Emitting,
}

/// A concentrator board
pub trait Radio: Send + Sync {
    /// Apply board-wide settings
    fn set_board(&mut self, board: &BoardSettings) -> ConfigResult<()>;

    /// Load the TX gain table
    fn set_tx_gains(&mut self, gains: &[TxGain]) -> ConfigResult<()>;

    /// Enable an RF chain
    fn set_rf_chain(&mut self, index: u8, chain: &RfChainSettings) -> ConfigResult<()>;

    /// Enable an IF chain
    fn set_if_chain(&mut self, index: u8, chain: &IfChainSettings) -> ConfigResult<()>;

    /// Start the concentrator with the applied settings
    fn start(&mut self) -> ConfigResult<()>;

    /// Fetch up to `max` pending frames; an empty batch is not an error
    fn receive(&self, max: usize) -> RadioResult<Vec<Frame>>;

    /// Submit a downlink to the TX modem
    fn send(&self, request: &TxRequest) -> RadioResult<()>;

    /// Read the TX modem status
    fn tx_status(&self) -> RadioResult<TxStatus>;

    /// Stop the concentrator
    fn stop(&self) -> RadioResult<()>;
}

/// Apply a full configuration to a radio and start it
///
/// Stages run in the order the concentrator expects them; the first
/// failure aborts.
pub fn configure<R: Radio + ?Sized>(radio: &mut R, settings: &HalSettings) -> ConfigResult<()> {
    radio.set_board(&settings.board)?;
    info!("SX1301 board configured successfully");

    radio.set_tx_gains(&settings.tx_gains)?;
    info!(entries = settings.tx_gains.len(), "TX gain LUT configured successfully");

    for (index, chain) in &settings.rf_chains {
        radio.set_rf_chain(*index, chain)?;
        debug!(index, freq_hz = chain.freq_hz, radio_type = %chain.radio_type, "RF chain enabled");
    }
    for (index, channel) in &settings.multi_sf_channels {
        radio.set_if_chain(*index, channel)?;
    }
    info!(
        rf_chains = settings.rf_chains.len(),
        channels = settings.multi_sf_channels.len(),
        "RF and SF channels configured successfully"
    );

    match &settings.lora_std_channel {
        Some(channel) => radio.set_if_chain(IF_LORA_STD, channel)?,
        None => warn!("No configuration for LoRa standard channel, ignoring"),
    }
    match &settings.fsk_channel {
        Some(channel) => radio.set_if_chain(IF_FSK_STD, channel)?,
        None => warn!("No configuration for FSK channel, ignoring"),
    }
    info!("LoRa std and FSK channels configured successfully");

    radio.start()?;
    info!("LoRa concentrator started successfully");
    Ok(())
}

/// Submit an immediate retransmission of `frame`
///
/// Refuses when the TX modem is already emitting. A scheduled downlink is
/// overwritten with a warning; an unreadable status is logged and the send
/// goes ahead.
pub fn transmit<R: Radio + ?Sized>(radio: &R, frame: &Frame, rf_power: i8) -> RadioResult<()> {
    let request = TxRequest::repeat(frame, rf_power)?;

    match radio.tx_status() {
        Ok(TxStatus::Emitting) => return Err(RadioError::AlreadyEmitting),
        Ok(TxStatus::Scheduled) => warn!("A downlink was already scheduled, overwriting it"),
        Ok(_) => {}
        Err(e) => warn!("{}", e),
    }

    radio.send(&request)
}

/// Wait until the TX modem is free
///
/// Polls every `poll`. Fails when the modem reports it is off or in an
/// unknown state; unreadable statuses are logged and polling continues.
pub async fn wait_ready<R: Radio + ?Sized>(radio: &R, poll: Duration) -> RadioResult<()> {
    loop {
        match radio.tx_status() {
            Ok(TxStatus::Free) => return Ok(()),
            Ok(TxStatus::Off) => return Err(RadioError::TxOff),
            Ok(TxStatus::Unknown) => return Err(RadioError::TxStatusUnknown),
            Ok(TxStatus::Scheduled | TxStatus::Emitting) => {}
            Err(e) => warn!("{}", e),
        }
        tokio::time::sleep(poll).await;
    }
}

/// A started concentrator
///
/// Hands out shared handles to the pipeline and stops the radio exactly
/// once, either through [`RadioSession::shutdown`] or on drop.
pub struct RadioSession<R: Radio> {
    radio: Arc<R>,
    stopped: AtomicBool,
}

impl<R: Radio> RadioSession<R> {
    /// Wrap a configured and started radio
    pub fn new(radio: R) -> Self {
        Self {
            radio: Arc::new(radio),
            stopped: AtomicBool::new(false),
        }
    }

    /// Configure and start `radio`, then wrap it
    pub fn start(mut radio: R, settings: &HalSettings) -> ConfigResult<Self> {
        configure(&mut radio, settings)?;
        Ok(Self::new(radio))
    }

    /// Shared handle to the radio
    pub fn radio(&self) -> Arc<R> {
        Arc::clone(&self.radio)
    }

    /// Stop the concentrator; later calls are no-ops
    pub fn shutdown(&self) -> RadioResult<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.radio.stop();
        match &result {
            Ok(()) => info!("LoRa concentrator stopped"),
            Err(e) => warn!("{}", e),
        }
        result
    }
}

impl<R: Radio> Drop for RadioSession<R> {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
