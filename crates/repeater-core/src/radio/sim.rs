//! Simulated concentrator
//!
//! An in-memory [`Radio`] that behaves like an SX1301 board from the
//! repeater's point of view: uplinks are scripted batches, the TX modem
//! goes *emitting* for a configurable number of status reads after each
//! send, and failures can be injected on every primitive.
//!
//! Every non-idle radio call is appended to a bounded event log so tests
//! can check ordering (e.g. that no two sends happen without the modem
//! being seen free in between).

use super::{Radio, TxStatus};
use crate::config::{BoardSettings, IfChainSettings, RfChainSettings, TxGain};
use crate::error::{ConfigError, ConfigResult, RadioError, RadioResult};
use crate::frame::{Frame, TxRequest};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Oldest entries are discarded past this many logged events / sends
const LOG_CAPACITY: usize = 4096;

/// A radio call observed by the simulator
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    /// Receive poll that returned frames
    Receive {
        /// Number of frames returned
        frames: usize,
    },
    /// Receive poll that failed
    ReceiveFailed,
    /// Downlink accepted by the TX modem
    Send {
        /// Payload of the downlink
        payload: Vec<u8>,
    },
    /// Downlink refused
    SendFailed,
    /// TX status read
    Status(TxStatus),
    /// Concentrator stopped
    Stop,
}

/// A scripted receive poll result
#[derive(Debug, Clone)]
enum Uplink {
    Batch(Vec<Frame>),
    Failure(String),
}

#[derive(Debug)]
struct SimState {
    running: bool,
    board: Option<BoardSettings>,
    tx_gains: Vec<TxGain>,
    rf_chains: BTreeMap<u8, RfChainSettings>,
    if_chains: BTreeMap<u8, IfChainSettings>,
    rejected_stage: Option<String>,

    uplinks: VecDeque<Uplink>,
    receive_polls: u64,

    tx_status: TxStatus,
    /// Status stays as set until the next send
    pinned: bool,
    busy_polls: u32,
    busy_remaining: u32,
    send_failures: u32,
    status_failures: u32,
    after_send: Option<TxStatus>,

    transmitted: VecDeque<TxRequest>,
    events: VecDeque<RadioEvent>,
    stops: u32,
}

impl SimState {
    fn log(&mut self, event: RadioEvent) {
        if self.events.len() == LOG_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn check_stage(&self, stage: &'static str) -> ConfigResult<()> {
        match self.rejected_stage.as_deref() {
            Some(rejected) if rejected == stage => Err(ConfigError::Rejected {
                stage,
                reason: "refused by simulated concentrator".into(),
            }),
            _ => Ok(()),
        }
    }
}

/// Software stand-in for a concentrator board
#[derive(Debug)]
pub struct SimRadio {
    state: Mutex<SimState>,
}

impl SimRadio {
    /// A stopped, unconfigured board whose TX modem is busy for one status
    /// read after each send
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                running: false,
                board: None,
                tx_gains: Vec::new(),
                rf_chains: BTreeMap::new(),
                if_chains: BTreeMap::new(),
                rejected_stage: None,
                uplinks: VecDeque::new(),
                receive_polls: 0,
                tx_status: TxStatus::Free,
                pinned: false,
                busy_polls: 1,
                busy_remaining: 0,
                send_failures: 0,
                status_failures: 0,
                after_send: None,
                transmitted: VecDeque::new(),
                events: VecDeque::new(),
                stops: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&mut self) -> &mut SimState {
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a batch for a future receive poll
    pub fn push_batch(&self, frames: Vec<Frame>) {
        self.state().uplinks.push_back(Uplink::Batch(frames));
    }

    /// Queue a receive failure after the already queued batches
    pub fn push_receive_failure(&self, reason: impl Into<String>) {
        self.state().uplinks.push_back(Uplink::Failure(reason.into()));
    }

    /// Scripted polls not consumed yet
    pub fn pending_uplinks(&self) -> usize {
        self.state().uplinks.len()
    }

    /// Make a configuration stage fail (`board`, `TX gain LUT`, `RF chain`,
    /// `IF chain`, `start`)
    pub fn reject_stage(&self, stage: &str) {
        self.state().rejected_stage = Some(stage.to_string());
    }

    /// Status reads the TX modem stays busy after a send
    pub fn set_busy_polls(&self, polls: u32) {
        self.state().busy_polls = polls;
    }

    /// Force the TX status until the next send
    pub fn set_tx_status(&self, status: TxStatus) {
        let mut state = self.state();
        state.tx_status = status;
        state.pinned = true;
    }

    /// Refuse the next `count` sends
    pub fn fail_next_sends(&self, count: u32) {
        self.state().send_failures = count;
    }

    /// Fail the next `count` TX status reads
    pub fn fail_status_reads(&self, count: u32) {
        self.state().status_failures = count;
    }

    /// Leave the TX modem in `status` after the next successful send
    pub fn fail_next_ready(&self, status: TxStatus) {
        self.state().after_send = Some(status);
    }

    /// Concentrator started and not stopped
    pub fn is_running(&self) -> bool {
        self.state().running
    }

    /// Entries in the loaded TX gain table
    pub fn tx_gain_count(&self) -> usize {
        self.state().tx_gains.len()
    }

    /// Enabled RF chains
    pub fn rf_chain_count(&self) -> usize {
        self.state().rf_chains.len()
    }

    /// Enabled IF chains
    pub fn if_chain_count(&self) -> usize {
        self.state().if_chains.len()
    }

    /// Downlinks accepted so far, oldest first
    pub fn transmitted(&self) -> Vec<TxRequest> {
        self.state().transmitted.iter().cloned().collect()
    }

    /// Logged radio calls, oldest first
    pub fn events(&self) -> Vec<RadioEvent> {
        self.state().events.iter().cloned().collect()
    }

    /// Receive polls, including empty ones
    pub fn receive_polls(&self) -> u64 {
        self.state().receive_polls
    }

    /// Times `stop` was called
    pub fn stop_count(&self) -> u32 {
        self.state().stops
    }
}

impl Default for SimRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl Radio for SimRadio {
    fn set_board(&mut self, board: &BoardSettings) -> ConfigResult<()> {
        let state = self.state_mut();
        state.check_stage("board")?;
        state.board = Some(*board);
        Ok(())
    }

    fn set_tx_gains(&mut self, gains: &[TxGain]) -> ConfigResult<()> {
        let state = self.state_mut();
        state.check_stage("TX gain LUT")?;
        state.tx_gains = gains.to_vec();
        Ok(())
    }

    fn set_rf_chain(&mut self, index: u8, chain: &RfChainSettings) -> ConfigResult<()> {
        let state = self.state_mut();
        state.check_stage("RF chain")?;
        state.rf_chains.insert(index, *chain);
        Ok(())
    }

    fn set_if_chain(&mut self, index: u8, chain: &IfChainSettings) -> ConfigResult<()> {
        let state = self.state_mut();
        state.check_stage("IF chain")?;
        state.if_chains.insert(index, *chain);
        Ok(())
    }

    fn start(&mut self) -> ConfigResult<()> {
        let state = self.state_mut();
        if state.board.is_none() {
            return Err(ConfigError::StartFailed("board not configured".into()));
        }
        state.check_stage("start")?;
        state.running = true;
        Ok(())
    }

    fn receive(&self, max: usize) -> RadioResult<Vec<Frame>> {
        let mut state = self.state();
        if !state.running {
            return Err(RadioError::NotRunning);
        }
        state.receive_polls += 1;

        match state.uplinks.pop_front() {
            None => Ok(Vec::new()),
            Some(Uplink::Failure(reason)) => {
                state.log(RadioEvent::ReceiveFailed);
                Err(RadioError::ReceiveFailed(reason))
            }
            Some(Uplink::Batch(mut frames)) => {
                if frames.len() > max {
                    let rest = frames.split_off(max);
                    state.uplinks.push_front(Uplink::Batch(rest));
                }
                state.log(RadioEvent::Receive { frames: frames.len() });
                Ok(frames)
            }
        }
    }

    fn send(&self, request: &TxRequest) -> RadioResult<()> {
        let mut state = self.state();
        if !state.running {
            return Err(RadioError::NotRunning);
        }
        if state.send_failures > 0 {
            state.send_failures -= 1;
            state.log(RadioEvent::SendFailed);
            return Err(RadioError::SendFailed("simulated refusal".into()));
        }

        state.pinned = false;
        match state.after_send.take() {
            Some(status) => {
                state.tx_status = status;
                state.pinned = true;
            }
            None if state.busy_polls > 0 => {
                state.tx_status = TxStatus::Emitting;
                state.busy_remaining = state.busy_polls;
            }
            None => state.tx_status = TxStatus::Free,
        }

        if state.transmitted.len() == LOG_CAPACITY {
            state.transmitted.pop_front();
        }
        state.transmitted.push_back(request.clone());
        state.log(RadioEvent::Send {
            payload: request.payload.clone(),
        });
        Ok(())
    }

    fn tx_status(&self) -> RadioResult<TxStatus> {
        let mut state = self.state();
        if state.status_failures > 0 {
            state.status_failures -= 1;
            return Err(RadioError::StatusUnavailable("simulated SPI error".into()));
        }
        if !state.running {
            return Ok(TxStatus::Off);
        }

        if !state.pinned && state.tx_status == TxStatus::Emitting {
            if state.busy_remaining == 0 {
                state.tx_status = TxStatus::Free;
            } else {
                state.busy_remaining -= 1;
            }
        }
        let status = state.tx_status;
        state.log(RadioEvent::Status(status));
        Ok(status)
    }

    fn stop(&self) -> RadioResult<()> {
        let mut state = self.state();
        state.stops += 1;
        state.log(RadioEvent::Stop);
        if !state.running {
            return Err(RadioError::NotRunning);
        }
        state.running = false;
        Ok(())
    }
}
