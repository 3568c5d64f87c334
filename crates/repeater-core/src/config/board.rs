//! SX1301 board configuration
//!
//! Mirrors the `SX1301_conf` object of a concentrator `global_conf.json`.
//! Indexed sections (`chan_multiSF_N`, `tx_lut_N`) are kept as raw JSON and
//! decoded on demand, so a file carrying sections this crate does not use
//! (`lbt_cfg`, extra multi-SF entries, ...) still loads.

use crate::error::{ConfigError, ConfigResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

const MULTI_SF_PREFIX: &str = "chan_multiSF_";
const TX_LUT_PREFIX: &str = "tx_lut_";

/// RF chain (radio front-end) configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioConf {
    /// Chain enabled
    pub enable: bool,
    /// Front-end chip, `SX1257` or `SX1255`
    #[serde(rename = "type")]
    pub radio_type: String,
    /// Center frequency (Hz)
    pub freq: u32,
    /// RSSI calibration offset (dB)
    pub rssi_offset: f32,
    /// Chain may transmit
    pub tx_enable: bool,
    /// Lowest allowed TX frequency (Hz)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_freq_min: Option<u32>,
    /// Highest allowed TX frequency (Hz)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_freq_max: Option<u32>,
    /// TX notch filter frequency (Hz)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_notch_freq: Option<u32>,
}

/// IF channel configuration (multi-SF, LoRa standard or FSK)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelConf {
    /// Channel enabled
    pub enable: bool,
    /// RF chain the channel hangs off
    pub radio: u8,
    /// Offset from the RF chain center frequency (Hz)
    #[serde(rename = "if")]
    pub if_hz: i32,
    /// Channel bandwidth (Hz)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<u32>,
    /// Datarate: spreading factor for LoRa, bits/s for FSK
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datarate: Option<u32>,
    /// Spreading factor, used when `datarate` is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spread_factor: Option<u8>,
    /// Free-form description
    #[serde(rename = "desc", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One TX gain table entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GainTableConf {
    /// Power amplifier gain
    pub pa_gain: u8,
    /// Mixer gain
    pub mix_gain: u8,
    /// Resulting output power (dBm)
    pub rf_power: i8,
    /// Digital gain
    pub dig_gain: u8,
    /// DAC gain, 3 when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dac_gain: Option<u8>,
    /// Free-form description
    #[serde(rename = "desc", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl GainTableConf {
    /// Entry with no digital gain and the default DAC gain
    pub fn new(pa_gain: u8, mix_gain: u8, rf_power: i8) -> Self {
        Self {
            pa_gain,
            mix_gain,
            rf_power,
            dig_gain: 0,
            dac_gain: None,
            description: None,
        }
    }
}

/// The `SX1301_conf` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Use the public LoRaWAN sync word
    pub lorawan_public: bool,
    /// RF chain providing the clock
    pub clksrc: u8,
    /// Antenna gain (dBi)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub antenna_gain: Option<i32>,
    /// RF chain 0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radio_0: Option<RadioConf>,
    /// RF chain 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radio_1: Option<RadioConf>,
    /// LoRa standard (single SF) channel
    #[serde(rename = "chan_Lora_std", default, skip_serializing_if = "Option::is_none")]
    pub lora_std_channel: Option<ChannelConf>,
    /// FSK channel
    #[serde(rename = "chan_FSK", default, skip_serializing_if = "Option::is_none")]
    pub fsk_channel: Option<ChannelConf>,
    /// Indexed and unrecognised sections, as raw JSON
    #[serde(flatten)]
    pub sections: BTreeMap<String, serde_json::Value>,
}

impl BoardConfig {
    /// RF chain configurations, by chain index
    pub fn radios(&self) -> [Option<&RadioConf>; 2] {
        [self.radio_0.as_ref(), self.radio_1.as_ref()]
    }

    /// Multi-SF channels present in the file, sorted by index
    pub fn multi_sf_channels(&self) -> ConfigResult<Vec<(usize, ChannelConf)>> {
        self.indexed(MULTI_SF_PREFIX)
    }

    /// TX gain table entries, sorted by index
    pub fn tx_luts(&self) -> ConfigResult<Vec<GainTableConf>> {
        Ok(self
            .indexed(TX_LUT_PREFIX)?
            .into_iter()
            .map(|(_, lut)| lut)
            .collect())
    }

    /// Set (or replace) multi-SF channel `index`
    pub fn set_multi_sf_channel(&mut self, index: usize, channel: &ChannelConf) -> ConfigResult<()> {
        self.set_indexed(MULTI_SF_PREFIX, index, channel)
    }

    /// Set (or replace) TX gain table entry `index`
    pub fn set_tx_lut(&mut self, index: usize, lut: &GainTableConf) -> ConfigResult<()> {
        self.set_indexed(TX_LUT_PREFIX, index, lut)
    }

    fn indexed<T: DeserializeOwned>(&self, prefix: &str) -> ConfigResult<Vec<(usize, T)>> {
        let mut entries = Vec::new();
        for (key, value) in &self.sections {
            let Some(suffix) = key.strip_prefix(prefix) else {
                continue;
            };
            let index = suffix.parse::<usize>().map_err(|_| ConfigError::InvalidSection {
                key: key.clone(),
                reason: "index is not a number".into(),
            })?;
            let entry = T::deserialize(value).map_err(|e| ConfigError::InvalidSection {
                key: key.clone(),
                reason: e.to_string(),
            })?;
            entries.push((index, entry));
        }
        entries.sort_by_key(|(index, _)| *index);
        Ok(entries)
    }

    fn set_indexed<T: Serialize>(&mut self, prefix: &str, index: usize, entry: &T) -> ConfigResult<()> {
        let value = serde_json::to_value(entry)?;
        self.sections.insert(format!("{}{}", prefix, index), value);
        Ok(())
    }
}

impl Default for BoardConfig {
    /// Two SX1257 front-ends around 920 MHz, eight multi-SF channels and
    /// the reference 16-step TX gain table
    fn default() -> Self {
        let mut config = Self {
            lorawan_public: true,
            clksrc: 1,
            antenna_gain: None,
            radio_0: Some(RadioConf {
                enable: true,
                radio_type: "SX1257".into(),
                freq: 922_400_000,
                rssi_offset: -166.0,
                tx_enable: true,
                tx_freq_min: Some(919_000_000),
                tx_freq_max: Some(923_000_000),
                tx_notch_freq: None,
            }),
            radio_1: Some(RadioConf {
                enable: true,
                radio_type: "SX1257".into(),
                freq: 919_800_000,
                rssi_offset: -166.0,
                tx_enable: false,
                tx_freq_min: None,
                tx_freq_max: None,
                tx_notch_freq: None,
            }),
            lora_std_channel: Some(ChannelConf {
                bandwidth: Some(0),
                spread_factor: Some(7),
                ..Default::default()
            }),
            fsk_channel: Some(ChannelConf {
                bandwidth: Some(0),
                ..Default::default()
            }),
            sections: BTreeMap::new(),
        };

        let offsets = [-300_000, -100_000, 100_000, 300_000];
        for (index, (radio, if_hz)) in [0u8, 1]
            .iter()
            .flat_map(|&radio| offsets.iter().map(move |&if_hz| (radio, if_hz)))
            .enumerate()
        {
            config.sections.insert(
                format!("{}{}", MULTI_SF_PREFIX, index),
                json!({ "enable": true, "radio": radio, "if": if_hz }),
            );
        }

        let luts = [
            (0, 15, 2),
            (1, 8, 1),
            (1, 10, 4),
            (1, 12, 6),
            (1, 13, 7),
            (2, 8, 8),
            (2, 9, 10),
            (2, 10, 11),
            (2, 11, 13),
            (2, 12, 14),
            (2, 15, 15),
            (3, 8, 17),
            (3, 9, 19),
            (3, 10, 20),
            (3, 12, 22),
            (3, 14, 24),
        ];
        for (index, (pa_gain, mix_gain, rf_power)) in luts.into_iter().enumerate() {
            config.sections.insert(
                format!("{}{}", TX_LUT_PREFIX, index),
                json!({ "pa_gain": pa_gain, "mix_gain": mix_gain, "rf_power": rf_power, "dig_gain": 0 }),
            );
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_board() {
        let config = BoardConfig::default();
        assert!(config.lorawan_public);
        assert_eq!(config.clksrc, 1);
        assert_eq!(config.tx_luts().unwrap().len(), 16);

        let channels = config.multi_sf_channels().unwrap();
        assert_eq!(channels.len(), 8);
        assert_eq!(channels[0].1.if_hz, -300_000);
        assert_eq!(channels[7].1.radio, 1);
    }

    #[test]
    fn test_default_sections_decode_to_typed_entries() {
        let config = BoardConfig::default();

        let luts = config.tx_luts().unwrap();
        assert_eq!(luts[0], GainTableConf::new(0, 15, 2));
        assert_eq!(luts[15], GainTableConf::new(3, 14, 24));

        let channels = config.multi_sf_channels().unwrap();
        assert_eq!(
            channels[3],
            (3, ChannelConf {
                enable: true,
                radio: 0,
                if_hz: 300_000,
                ..Default::default()
            })
        );
        assert_eq!(channels[4].1.if_hz, -300_000);
        assert_eq!(channels[4].1.radio, 1);
    }

    #[test]
    fn test_indexed_sections_sorted_numerically() {
        let mut config = BoardConfig::default();
        config.sections.clear();
        let lut = GainTableConf::new(2, 10, 11);
        config.set_tx_lut(10, &lut).unwrap();
        config.set_tx_lut(2, &GainTableConf::new(1, 8, 1)).unwrap();

        let luts = config.tx_luts().unwrap();
        assert_eq!(luts.len(), 2);
        assert_eq!(luts[1], lut);
    }

    #[test]
    fn test_unknown_sections_are_kept() {
        let json = r#"{
            "lorawan_public": false,
            "clksrc": 0,
            "lbt_cfg": {"enable": false},
            "chan_multiSF_0": {"enable": true, "radio": 0, "if": -200000}
        }"#;
        let config: BoardConfig = serde_json::from_str(json).unwrap();
        assert!(config.sections.contains_key("lbt_cfg"));
        assert!(config.radio_0.is_none());

        let channels = config.multi_sf_channels().unwrap();
        assert_eq!(channels, vec![(0, ChannelConf {
            enable: true,
            radio: 0,
            if_hz: -200_000,
            ..Default::default()
        })]);
    }

    #[test]
    fn test_malformed_indexed_section() {
        let json = r#"{"lorawan_public": true, "clksrc": 1, "tx_lut_0": {"pa_gain": "high"}}"#;
        let config: BoardConfig = serde_json::from_str(json).unwrap();
        match config.tx_luts() {
            Err(ConfigError::InvalidSection { key, .. }) => assert_eq!(key, "tx_lut_0"),
            other => panic!("expected InvalidSection, got {:?}", other),
        }
    }

    #[test]
    fn test_board_json_round_trip_keeps_keys() {
        let json = serde_json::to_value(BoardConfig::default()).unwrap();
        assert!(json.get("radio_0").is_some());
        assert!(json.get("chan_multiSF_7").is_some());
        assert!(json.get("tx_lut_15").is_some());
        assert!(json.get("chan_FSK").is_some());
    }
}
