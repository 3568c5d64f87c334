//! # LoRa Concentrator Repeater
//!
//! This crate drives an SX1301-class LoRa concentrator as a simple repeater:
//! every distinct uplink it hears is retransmitted once, and repeats of the
//! same frame (identified by its 16-bit CRC) are suppressed for the current
//! eviction epoch.
//!
//! ## Overview
//!
//! - **Configuration**: `global_conf.json`-style board description,
//!   marshalled into concentrator settings and applied stage by stage
//! - **Radio contract**: receive poll, transmit and TX status primitives,
//!   with a simulated concentrator for tests and bench runs
//! - **Repeater core**: uplink intake, duplicate cache with periodic
//!   eviction, broadcast dispatcher and a supervisor tying them together
//!
//! ## Pipeline
//!
//! ```text
//! receive poll → Intake → queue → Dispatcher → duplicate check → send → wait ready
//!                                                   ↑
//!                                        Janitor (clear every epoch)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use repeater_core::{ConfigFile, RadioSession, Repeater, SimRadio};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigFile::load("global_conf.json")?;
//! let session = RadioSession::start(SimRadio::new(), &config.hal_settings()?)?;
//!
//! let repeater = Repeater::new(session.radio(), config.repeater.clone())?;
//! let outcome = repeater.run(tokio::time::sleep(Duration::from_secs(60))).await;
//! println!("repeater stopped: {}", outcome);
//!
//! session.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod frame;
pub mod radio;
pub mod repeater;

pub use config::{BoardConfig, ConfigFile, HalSettings, RepeaterConfig};
pub use error::{ConfigError, ConfigResult, RadioError, RadioResult, RepeaterError};
pub use frame::{Bandwidth, CrcStatus, Frame, Modulation, TxMode, TxRequest};
pub use radio::{Radio, RadioEvent, RadioSession, SimRadio, TxStatus};
pub use repeater::{Repeater, RepeaterStats, Shutdown, StatsSnapshot, Worker};
