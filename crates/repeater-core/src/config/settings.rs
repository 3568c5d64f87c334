//! Board configuration → concentrator settings
//!
//! Turns a [`BoardConfig`] into the values the HAL consumes: enumerated
//! radio types, bandwidth and datarate codes, defaulted gains. Disabled
//! chains and channels are dropped here so the radio only sees what it has
//! to enable.

use super::board::{BoardConfig, ChannelConf, GainTableConf, RadioConf};
use crate::error::{ConfigError, ConfigResult};
use crate::frame::{lora_datarate, Bandwidth};
use std::fmt;

/// Number of RF chains on the board
pub const LGW_RF_CHAIN_NB: u8 = 2;
/// Number of multi-SF LoRa IF chains
pub const LGW_MULTI_NB: usize = 8;
/// IF chain index of the LoRa standard channel
pub const IF_LORA_STD: u8 = 8;
/// IF chain index of the FSK channel
pub const IF_FSK_STD: u8 = 9;
/// Capacity of the TX gain table
pub const TX_GAIN_LUT_SIZE_MAX: usize = 16;
/// DAC gain used when a gain entry does not set one
pub const DEFAULT_DAC_GAIN: u8 = 3;

/// Board-wide settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardSettings {
    /// RF chain providing the clock
    pub clksrc: u8,
    /// Public LoRaWAN sync word
    pub lorawan_public: bool,
}

/// One TX gain table step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxGain {
    pub pa_gain: u8,
    pub mix_gain: u8,
    pub rf_power: i8,
    pub dig_gain: u8,
    pub dac_gain: u8,
}

impl From<&GainTableConf> for TxGain {
    fn from(conf: &GainTableConf) -> Self {
        Self {
            pa_gain: conf.pa_gain,
            mix_gain: conf.mix_gain,
            rf_power: conf.rf_power,
            dig_gain: conf.dig_gain,
            dac_gain: conf.dac_gain.unwrap_or(DEFAULT_DAC_GAIN),
        }
    }
}

/// Radio front-end chip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioType {
    Sx1255,
    Sx1257,
}

impl RadioType {
    /// Parse the `type` field of an RF chain
    pub fn parse(name: &str) -> ConfigResult<Self> {
        match name {
            "SX1255" => Ok(RadioType::Sx1255),
            "SX1257" => Ok(RadioType::Sx1257),
            other => Err(ConfigError::InvalidRadioType(other.to_string())),
        }
    }
}

impl fmt::Display for RadioType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioType::Sx1255 => write!(f, "SX1255"),
            RadioType::Sx1257 => write!(f, "SX1257"),
        }
    }
}

/// An enabled RF chain
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RfChainSettings {
    pub freq_hz: u32,
    pub rssi_offset: f32,
    pub radio_type: RadioType,
    pub tx_enable: bool,
}

impl RfChainSettings {
    fn from_conf(conf: &RadioConf) -> ConfigResult<Self> {
        Ok(Self {
            freq_hz: conf.freq,
            rssi_offset: conf.rssi_offset,
            radio_type: RadioType::parse(&conf.radio_type)?,
            tx_enable: conf.tx_enable,
        })
    }
}

/// An enabled IF chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfChainSettings {
    /// RF chain the IF chain is fed from
    pub rf_chain: u8,
    /// Offset from the RF chain center (Hz)
    pub freq_offset_hz: i32,
    /// Bandwidth, undefined for multi-SF channels
    pub bandwidth: Bandwidth,
    /// Datarate code, 0 when undefined
    pub datarate: u32,
}

/// Everything the concentrator needs before it can start
#[derive(Debug, Clone, PartialEq)]
pub struct HalSettings {
    pub board: BoardSettings,
    pub tx_gains: Vec<TxGain>,
    /// Enabled RF chains, by chain index
    pub rf_chains: Vec<(u8, RfChainSettings)>,
    /// Enabled multi-SF channels, by IF chain index
    pub multi_sf_channels: Vec<(u8, IfChainSettings)>,
    /// LoRa standard channel, when enabled
    pub lora_std_channel: Option<IfChainSettings>,
    /// FSK channel, when enabled
    pub fsk_channel: Option<IfChainSettings>,
}

impl HalSettings {
    /// Validate and marshal a board configuration
    pub fn from_board(config: &BoardConfig) -> ConfigResult<Self> {
        if config.clksrc >= LGW_RF_CHAIN_NB {
            return Err(ConfigError::InvalidSetting(format!(
                "clksrc {} does not name an RF chain",
                config.clksrc
            )));
        }

        let luts = config.tx_luts()?;
        if luts.len() > TX_GAIN_LUT_SIZE_MAX {
            return Err(ConfigError::TooManyGainEntries(luts.len()));
        }

        let mut rf_chains = Vec::new();
        for (index, radio) in config.radios().into_iter().enumerate() {
            if let Some(radio) = radio.filter(|r| r.enable) {
                rf_chains.push((index as u8, RfChainSettings::from_conf(radio)?));
            }
        }
        let chain_enabled = |rf: u8| rf_chains.iter().any(|(index, _)| *index == rf);

        let mut multi_sf_channels = Vec::new();
        for (index, channel) in config.multi_sf_channels()? {
            if index >= LGW_MULTI_NB {
                return Err(ConfigError::InvalidSection {
                    key: format!("chan_multiSF_{}", index),
                    reason: format!("at most {} multi-SF channels are supported", LGW_MULTI_NB),
                });
            }
            if !channel.enable {
                continue;
            }
            let index = index as u8;
            if !chain_enabled(channel.radio) {
                return Err(ConfigError::UnknownRfChain { channel: index, rf_chain: channel.radio });
            }
            multi_sf_channels.push((index, IfChainSettings {
                rf_chain: channel.radio,
                freq_offset_hz: channel.if_hz,
                bandwidth: Bandwidth::Undefined,
                datarate: 0,
            }));
        }

        let lora_std_channel = match config.lora_std_channel.as_ref().filter(|c| c.enable) {
            Some(channel) => {
                if !chain_enabled(channel.radio) {
                    return Err(ConfigError::UnknownRfChain {
                        channel: IF_LORA_STD,
                        rf_chain: channel.radio,
                    });
                }
                Some(lora_std_settings(channel))
            }
            None => None,
        };

        let fsk_channel = match config.fsk_channel.as_ref().filter(|c| c.enable) {
            Some(channel) => {
                if !chain_enabled(channel.radio) {
                    return Err(ConfigError::UnknownRfChain {
                        channel: IF_FSK_STD,
                        rf_chain: channel.radio,
                    });
                }
                Some(fsk_settings(channel)?)
            }
            None => None,
        };

        Ok(Self {
            board: BoardSettings {
                clksrc: config.clksrc,
                lorawan_public: config.lorawan_public,
            },
            tx_gains: luts.iter().map(TxGain::from).collect(),
            rf_chains,
            multi_sf_channels,
            lora_std_channel,
            fsk_channel,
        })
    }
}

fn lora_std_settings(channel: &ChannelConf) -> IfChainSettings {
    let sf = channel.datarate.or(channel.spread_factor.map(u32::from));
    IfChainSettings {
        rf_chain: channel.radio,
        freq_offset_hz: channel.if_hz,
        bandwidth: Bandwidth::lora_from_hz(channel.bandwidth.unwrap_or(0)),
        datarate: sf.and_then(lora_datarate).unwrap_or(0),
    }
}

fn fsk_settings(channel: &ChannelConf) -> ConfigResult<IfChainSettings> {
    let hz = channel.bandwidth.ok_or(ConfigError::MissingFskBandwidth)?;
    let bandwidth = Bandwidth::fsk_covering(hz).ok_or(ConfigError::UnsupportedFskBandwidth(hz))?;
    Ok(IfChainSettings {
        rf_chain: channel.radio,
        freq_offset_hz: channel.if_hz,
        bandwidth,
        datarate: channel.datarate.unwrap_or(0),
    })
}
