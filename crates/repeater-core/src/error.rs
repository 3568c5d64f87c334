//! Error types for the repeater crate.

use thiserror::Error;

/// Startup configuration error
///
/// Raised while loading, validating or applying the board configuration.
/// Always fatal: the pipeline never starts after one of these.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON or has the wrong shape
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// RF chain type other than SX1255/SX1257
    #[error("invalid radio type {0:?} (should be SX1255 or SX1257)")]
    InvalidRadioType(String),

    /// FSK channel enabled without a bandwidth
    #[error("no bandwidth information in the configuration for the FSK channel")]
    MissingFskBandwidth,

    /// FSK bandwidth above the widest supported filter
    #[error("FSK bandwidth {0} Hz is not supported (max 500000 Hz)")]
    UnsupportedFskBandwidth(u32),

    /// Too many entries in the TX gain table
    #[error("TX gain table has {0} entries, at most 16 are supported")]
    TooManyGainEntries(usize),

    /// IF channel bound to an RF chain that does not exist
    #[error("channel {channel} references RF chain {rf_chain}, which does not exist")]
    UnknownRfChain {
        /// IF channel index
        channel: u8,
        /// Referenced RF chain
        rf_chain: u8,
    },

    /// Indexed section key that cannot be decoded
    #[error("invalid section {key}: {reason}")]
    InvalidSection {
        /// JSON key of the section
        key: String,
        /// What was wrong with it
        reason: String,
    },

    /// Repeater pipeline setting out of range
    #[error("invalid repeater setting: {0}")]
    InvalidSetting(String),

    /// The concentrator refused a configuration stage
    #[error("{stage} configuration failed: {reason}")]
    Rejected {
        /// Stage that failed (board, TX gain LUT, RF chain, ...)
        stage: &'static str,
        /// Reason reported by the radio
        reason: String,
    },

    /// The concentrator could not be started
    #[error("failed to start concentrator: {0}")]
    StartFailed(String),
}

/// Radio I/O error
///
/// Fatal when returned by a receive poll, recoverable (per frame) when
/// returned by the transmit path.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RadioError {
    /// Packet fetch from the concentrator failed
    #[error("failed packet fetch from the concentrator: {0}")]
    ReceiveFailed(String),

    /// Payload does not fit in a TX packet
    #[error("payload too big to transmit ({0} bytes, max 256)")]
    PayloadTooLarge(usize),

    /// TX path busy with a previous emission
    #[error("concentrator is already emitting")]
    AlreadyEmitting,

    /// Downlink submission refused
    #[error("downlink transmission to the concentrator failed: {0}")]
    SendFailed(String),

    /// TX status register could not be read
    #[error("couldn't get concentrator status: {0}")]
    StatusUnavailable(String),

    /// TX modem disabled
    #[error("concentrator is off")]
    TxOff,

    /// TX modem in an unknown state
    #[error("concentrator status unknown")]
    TxStatusUnknown,

    /// Session already stopped or never started
    #[error("concentrator is not running")]
    NotRunning,

    /// Stopping the concentrator failed
    #[error("failed to stop concentrator gracefully: {0}")]
    StopFailed(String),
}

/// Terminal pipeline error reported to the supervisor
#[derive(Error, Debug)]
pub enum RepeaterError {
    /// Fatal radio failure (receive path)
    #[error(transparent)]
    Radio(#[from] RadioError),

    /// A worker task panicked or was aborted
    #[error("{0} task terminated abnormally")]
    WorkerCrashed(&'static str),
}

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for radio operations
pub type RadioResult<T> = std::result::Result<T, RadioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidRadioType("SX1272".into());
        assert!(err.to_string().contains("SX1255 or SX1257"));

        let err = ConfigError::UnknownRfChain { channel: 3, rf_chain: 4 };
        assert_eq!(
            err.to_string(),
            "channel 3 references RF chain 4, which does not exist"
        );
    }

    #[test]
    fn test_repeater_error_is_transparent() {
        let err: RepeaterError = RadioError::TxOff.into();
        assert_eq!(err.to_string(), "concentrator is off");
    }
}
