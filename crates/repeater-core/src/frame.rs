//! Radio frames
//!
//! A [`Frame`] is one packet as reported by the concentrator's receive path.
//! Frames are immutable once received; repeating one builds a [`TxRequest`]
//! carrying the same RF parameters and payload.
//!
//! The numeric codes used here (bandwidth, datarate, modulation, status) are
//! the SX1301 HAL encodings, so a frame can be handed back to the transmit
//! path without re-mapping.

use crate::error::{RadioError, RadioResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest payload the TX path accepts
pub const MAX_TX_PAYLOAD: usize = 256;

/// Modulation of a received or transmitted frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modulation {
    /// Not reported by the modem
    #[default]
    Undefined,
    /// LoRa chirp spread spectrum
    Lora,
    /// Frequency shift keying
    Fsk,
}

impl Modulation {
    /// HAL code for this modulation
    pub fn code(self) -> u8 {
        match self {
            Modulation::Undefined => 0x00,
            Modulation::Lora => 0x10,
            Modulation::Fsk => 0x20,
        }
    }

    /// Decode a HAL modulation code
    pub fn from_code(code: u8) -> Self {
        match code {
            0x10 => Modulation::Lora,
            0x20 => Modulation::Fsk,
            _ => Modulation::Undefined,
        }
    }
}

/// Modulation bandwidth
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bandwidth {
    /// Unset or unsupported
    #[default]
    #[serde(rename = "undefined")]
    Undefined,
    /// 500 kHz
    #[serde(rename = "500khz")]
    Bw500kHz,
    /// 250 kHz
    #[serde(rename = "250khz")]
    Bw250kHz,
    /// 125 kHz
    #[serde(rename = "125khz")]
    Bw125kHz,
    /// 62.5 kHz
    #[serde(rename = "62.5khz")]
    Bw62k5Hz,
    /// 31.2 kHz
    #[serde(rename = "31.2khz")]
    Bw31k2Hz,
    /// 15.6 kHz
    #[serde(rename = "15.6khz")]
    Bw15k6Hz,
    /// 7.8 kHz
    #[serde(rename = "7.8khz")]
    Bw7k8Hz,
}

impl Bandwidth {
    /// Filters the FSK demodulator can be set to, narrowest first
    const FSK_STEPS: [Bandwidth; 7] = [
        Bandwidth::Bw7k8Hz,
        Bandwidth::Bw15k6Hz,
        Bandwidth::Bw31k2Hz,
        Bandwidth::Bw62k5Hz,
        Bandwidth::Bw125kHz,
        Bandwidth::Bw250kHz,
        Bandwidth::Bw500kHz,
    ];

    /// HAL code for this bandwidth
    pub fn code(self) -> u8 {
        match self {
            Bandwidth::Undefined => 0x00,
            Bandwidth::Bw500kHz => 0x01,
            Bandwidth::Bw250kHz => 0x02,
            Bandwidth::Bw125kHz => 0x03,
            Bandwidth::Bw62k5Hz => 0x04,
            Bandwidth::Bw31k2Hz => 0x05,
            Bandwidth::Bw15k6Hz => 0x06,
            Bandwidth::Bw7k8Hz => 0x07,
        }
    }

    /// Decode a HAL bandwidth code
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => Bandwidth::Bw500kHz,
            0x02 => Bandwidth::Bw250kHz,
            0x03 => Bandwidth::Bw125kHz,
            0x04 => Bandwidth::Bw62k5Hz,
            0x05 => Bandwidth::Bw31k2Hz,
            0x06 => Bandwidth::Bw15k6Hz,
            0x07 => Bandwidth::Bw7k8Hz,
            _ => Bandwidth::Undefined,
        }
    }

    /// Bandwidth in Hz (0 when undefined)
    pub fn hz(self) -> u32 {
        match self {
            Bandwidth::Undefined => 0,
            Bandwidth::Bw500kHz => 500_000,
            Bandwidth::Bw250kHz => 250_000,
            Bandwidth::Bw125kHz => 125_000,
            Bandwidth::Bw62k5Hz => 62_500,
            Bandwidth::Bw31k2Hz => 31_200,
            Bandwidth::Bw15k6Hz => 15_600,
            Bandwidth::Bw7k8Hz => 7_800,
        }
    }

    /// LoRa channel bandwidth; only 125, 250 and 500 kHz are valid
    pub fn lora_from_hz(hz: u32) -> Self {
        match hz {
            125_000 => Bandwidth::Bw125kHz,
            250_000 => Bandwidth::Bw250kHz,
            500_000 => Bandwidth::Bw500kHz,
            _ => Bandwidth::Undefined,
        }
    }

    /// Narrowest FSK filter that covers `hz`
    ///
    /// Returns `Some(Undefined)` for 0 and `None` above 500 kHz.
    pub fn fsk_covering(hz: u32) -> Option<Self> {
        if hz == 0 {
            return Some(Bandwidth::Undefined);
        }
        Self::FSK_STEPS.iter().copied().find(|bw| hz <= bw.hz())
    }
}

/// LoRa datarate code for a spreading factor (SF7..SF12)
pub fn lora_datarate(sf: u32) -> Option<u32> {
    match sf {
        7..=12 => Some(1 << (sf - 6)),
        _ => None,
    }
}

/// Spreading factor encoded in a LoRa datarate code
pub fn lora_spreading_factor(datarate: u32) -> Option<u32> {
    (7..=12).find(|&sf| lora_datarate(sf) == Some(datarate))
}

/// CRC check result reported by the modem
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrcStatus {
    /// Not reported
    #[default]
    Undefined,
    /// Frame carried no CRC
    NoCrc,
    /// CRC present but wrong
    CrcBad,
    /// CRC present and valid
    CrcOk,
}

impl CrcStatus {
    /// HAL code for this status
    pub fn code(self) -> u8 {
        match self {
            CrcStatus::Undefined => 0x00,
            CrcStatus::NoCrc => 0x01,
            CrcStatus::CrcBad => 0x11,
            CrcStatus::CrcOk => 0x10,
        }
    }

    /// Decode a HAL status code
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => CrcStatus::NoCrc,
            0x11 => CrcStatus::CrcBad,
            0x10 => CrcStatus::CrcOk,
            _ => CrcStatus::Undefined,
        }
    }
}

/// One packet received by the concentrator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Frame {
    /// Central frequency of the IF chain (Hz)
    pub freq_hz: u32,
    /// IF chain the frame was received on
    pub if_chain: u8,
    /// RF chain the frame was received on
    pub rf_chain: u8,
    /// CRC check result
    pub status: CrcStatus,
    /// Concentrator counter at reception, 1 µs resolution
    pub count_us: u32,
    /// Modulation used by the frame
    pub modulation: Modulation,
    /// Modulation bandwidth (LoRa only)
    pub bandwidth: Bandwidth,
    /// Datarate code (SF for LoRa, bits/s for FSK)
    pub datarate: u32,
    /// Error-correcting code rate (LoRa only)
    pub coderate: u8,
    /// Average RSSI (dB)
    pub rssi: f32,
    /// Average SNR (dB, LoRa only)
    pub snr: f32,
    /// Minimum SNR (dB, LoRa only)
    pub snr_min: f32,
    /// Maximum SNR (dB, LoRa only)
    pub snr_max: f32,
    /// CRC carried in the payload; the duplicate detection key
    pub crc: u16,
    /// Raw payload
    pub payload: Vec<u8>,
}

impl Frame {
    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "crc={:04x} freq={:.3}MHz {:?}",
            self.crc,
            self.freq_hz as f64 / 1_000_000.0,
            self.modulation
        )?;
        match (self.modulation, lora_spreading_factor(self.datarate)) {
            (Modulation::Lora, Some(sf)) => write!(f, " SF{}", sf)?,
            _ => write!(f, " dr={}", self.datarate)?,
        }
        write!(
            f,
            " bw={}Hz rssi={:.1} snr={:.1} size={}",
            self.bandwidth.hz(),
            self.rssi,
            self.snr,
            self.size()
        )
    }
}

/// When the concentrator should emit a TX request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TxMode {
    /// As soon as possible
    #[default]
    Immediate,
    /// At a given concentrator counter value
    Timestamped,
    /// On the next GPS PPS
    OnGps,
}

/// A downlink handed to the concentrator's transmit path
#[derive(Debug, Clone, PartialEq)]
pub struct TxRequest {
    /// TX frequency (Hz)
    pub freq_hz: u32,
    /// Emission trigger
    pub tx_mode: TxMode,
    /// Counter value for timestamped mode
    pub count_us: u32,
    /// RF chain used for emission
    pub rf_chain: u8,
    /// TX power (dBm)
    pub rf_power: i8,
    /// Modulation
    pub modulation: Modulation,
    /// Modulation bandwidth
    pub bandwidth: Bandwidth,
    /// Datarate code
    pub datarate: u32,
    /// Code rate
    pub coderate: u8,
    /// Disable the payload CRC
    pub no_crc: bool,
    /// Implicit header mode
    pub no_header: bool,
    /// Payload, at most [`MAX_TX_PAYLOAD`] bytes
    pub payload: Vec<u8>,
}

impl TxRequest {
    /// Build an immediate retransmission of a received frame
    pub fn repeat(frame: &Frame, rf_power: i8) -> RadioResult<Self> {
        if frame.payload.len() > MAX_TX_PAYLOAD {
            return Err(RadioError::PayloadTooLarge(frame.payload.len()));
        }
        Ok(Self {
            freq_hz: frame.freq_hz,
            tx_mode: TxMode::Immediate,
            count_us: frame.count_us,
            rf_chain: 0,
            rf_power,
            modulation: frame.modulation,
            bandwidth: frame.bandwidth,
            datarate: frame.datarate,
            coderate: frame.coderate,
            no_crc: false,
            no_header: false,
            payload: frame.payload.clone(),
        })
    }
}
