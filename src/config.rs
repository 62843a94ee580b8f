//! Persisted bridge configuration and start-up validation.

use std::collections::BTreeMap;
use std::fs;
use std::net::UdpSocket;
use std::path::Path;

use log::debug;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BridgeError, Result};
use crate::routes::{ChannelMode, CHANNELS};

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const DEFAULT_OSC_IN_PORT: &str = "5550";
pub const DEFAULT_OSC_OUT_PORT: &str = "3330";
const FALLBACK_IP: &str = "127.0.0.1";

/// Best guess at this host's outbound IPv4 address. No packet is sent.
pub fn local_ip() -> String {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect(("8.8.8.8", 80))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|e| {
            debug!("local IP lookup failed: {}", e);
            FALLBACK_IP.to_string()
        })
}

fn scalar_to_string<E: de::Error>(value: Value) -> std::result::Result<String, E> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(E::custom(format!("expected a string or number, got {}", other))),
    }
}

// Ports were written as strings but hand-edited files often hold numbers.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    scalar_to_string(Value::deserialize(deserializer)?)
}

fn channel_map<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    BTreeMap::<String, Value>::deserialize(deserializer)?
        .into_iter()
        .map(|(device, channel)| Ok((device, scalar_to_string::<D::Error>(channel)?)))
        .collect()
}

/// On-disk record. Port fields stay as text so that a bad value survives a
/// round trip and is reported at start instead of at load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(deserialize_with = "string_or_number")]
    pub osc_in_port: String,
    #[serde(deserialize_with = "string_or_number")]
    pub midi_input_port: String,
    #[serde(deserialize_with = "string_or_number")]
    pub midi_output_port: String,
    #[serde(deserialize_with = "string_or_number")]
    pub osc_out_ip: String,
    #[serde(deserialize_with = "string_or_number")]
    pub osc_out_port: String,
    /// Input device name -> last OSC channel used with it.
    #[serde(deserialize_with = "channel_map")]
    pub osc_out_channels: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            osc_in_port: DEFAULT_OSC_IN_PORT.to_string(),
            midi_input_port: String::new(),
            midi_output_port: String::new(),
            osc_out_ip: local_ip(),
            osc_out_port: DEFAULT_OSC_OUT_PORT.to_string(),
            osc_out_channels: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load from `path`, or defaults when the file does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("no config at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write pretty-printed JSON with four-space indentation.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut serializer)?;
        fs::write(path, buf)?;
        Ok(())
    }

    /// Channel last used with `input`, if one was remembered and is valid.
    pub fn remembered_channel(&self, input: &str) -> Option<u8> {
        self.osc_out_channels
            .get(input)?
            .trim()
            .parse::<u8>()
            .ok()
            .filter(|ch| CHANNELS.contains(ch))
    }

    /// Settings for a start attempt, preselecting the remembered channel for
    /// the configured input device.
    pub fn settings(&self) -> BridgeSettings {
        let channel_mode = self
            .remembered_channel(&self.midi_input_port)
            .map(ChannelMode::Single)
            .unwrap_or_default();
        BridgeSettings {
            osc_in_port: self.osc_in_port.clone(),
            osc_out_ip: self.osc_out_ip.clone(),
            osc_out_port: self.osc_out_port.clone(),
            midi_input: self.midi_input_port.clone(),
            midi_output: self.midi_output_port.clone(),
            channel_mode,
        }
    }

    /// Remember what a successful start used.
    pub fn apply(&mut self, settings: &ValidatedSettings) {
        self.osc_in_port = settings.osc_in_port.to_string();
        self.osc_out_ip = settings.osc_out_ip.clone();
        self.osc_out_port = settings.osc_out_port.to_string();
        self.midi_input_port = settings.midi_input.clone();
        self.midi_output_port = settings.midi_output.clone();
        if let ChannelMode::Single(ch) = settings.channel_mode {
            self.osc_out_channels
                .insert(settings.midi_input.clone(), ch.to_string());
        }
    }
}

/// Start parameters as entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    pub osc_in_port: String,
    pub osc_out_ip: String,
    pub osc_out_port: String,
    pub midi_input: String,
    pub midi_output: String,
    pub channel_mode: ChannelMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSettings {
    pub osc_in_port: u16,
    pub osc_out_ip: String,
    pub osc_out_port: u16,
    pub midi_input: String,
    pub midi_output: String,
    pub channel_mode: ChannelMode,
}

impl BridgeSettings {
    pub fn validate(&self) -> Result<ValidatedSettings> {
        let port = |text: &str| {
            text.trim()
                .parse::<u16>()
                .map_err(|_| BridgeError::Configuration("OSC ports must be integers.".into()))
        };
        let osc_out_port = port(&self.osc_out_port)?;
        let osc_in_port = port(&self.osc_in_port)?;

        if self.midi_input.is_empty() || self.midi_output.is_empty() {
            return Err(BridgeError::Configuration(
                "Select both MIDI Input and Output ports.".into(),
            ));
        }
        if let ChannelMode::Single(ch) = self.channel_mode {
            ChannelMode::single(ch)?;
        }

        Ok(ValidatedSettings {
            osc_in_port,
            osc_out_ip: self.osc_out_ip.trim().to_string(),
            osc_out_port,
            midi_input: self.midi_input.clone(),
            midi_output: self.midi_output.clone(),
            channel_mode: self.channel_mode,
        })
    }
}
