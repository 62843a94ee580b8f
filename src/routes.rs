//! OSC address keys and the inbound route table.
//!
//! Addresses follow `/ch<N><cmd>` where `N` is a 1-indexed MIDI channel and
//! `cmd` is one of `note`, `noff`, `cc<M>`, `pressure` or `pitch`. Routing is
//! a set lookup on the parsed [`RouteKey`], never string matching.

use std::collections::HashSet;
use std::fmt;

use crate::error::{BridgeError, Result};

pub const CHANNELS: std::ops::RangeInclusive<u8> = 1..=16;
pub const CONTROLLERS: std::ops::RangeInclusive<u8> = 0..=127;

/// Command part of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Note,
    NoteOff,
    ControlChange(u8),
    Pressure,
    Pitch,
}

/// Parsed form of an OSC address. `channel` is 1-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub channel: u8,
    pub command: Command,
}

impl RouteKey {
    pub fn new(channel: u8, command: Command) -> Self {
        RouteKey { channel, command }
    }

    /// Parse a full address. Anything outside the grammar, including channel
    /// numbers outside 1..=16, controllers above 127, leading zeros and
    /// trailing text, yields `None`.
    pub fn parse(address: &str) -> Option<RouteKey> {
        let rest = address.strip_prefix("/ch")?;
        let digits = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
        let (number, command) = rest.split_at(digits);
        let channel: u8 = canonical_number(number)?;
        if !CHANNELS.contains(&channel) {
            return None;
        }

        let command = match command {
            "note" => Command::Note,
            "noff" => Command::NoteOff,
            "pressure" => Command::Pressure,
            "pitch" => Command::Pitch,
            other => {
                let controller: u8 = canonical_number(other.strip_prefix("cc")?)?;
                if !CONTROLLERS.contains(&controller) {
                    return None;
                }
                Command::ControlChange(controller)
            }
        };

        Some(RouteKey { channel, command })
    }

    pub fn address(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.command {
            Command::Note => write!(f, "/ch{}note", self.channel),
            Command::NoteOff => write!(f, "/ch{}noff", self.channel),
            Command::ControlChange(cc) => write!(f, "/ch{}cc{}", self.channel, cc),
            Command::Pressure => write!(f, "/ch{}pressure", self.channel),
            Command::Pitch => write!(f, "/ch{}pitch", self.channel),
        }
    }
}

/// Decimal digits as written by `Display`: no sign, no leading zeros.
fn canonical_number(text: &str) -> Option<u8> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if text.len() > 1 && text.starts_with('0') {
        return None;
    }
    text.parse().ok()
}

/// Which channels the bridge listens to. Fixed for the life of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// One 1-indexed channel.
    Single(u8),
    All16,
}

impl ChannelMode {
    pub fn single(channel: u8) -> Result<Self> {
        if CHANNELS.contains(&channel) {
            Ok(ChannelMode::Single(channel))
        } else {
            Err(BridgeError::Configuration(format!(
                "OSC channel must be 1-16, got {}",
                channel
            )))
        }
    }

    pub fn channels(&self) -> Vec<u8> {
        match *self {
            ChannelMode::Single(ch) => vec![ch],
            ChannelMode::All16 => CHANNELS.collect(),
        }
    }

    /// Channel used by outbound test emissions.
    pub fn primary_channel(&self) -> u8 {
        match *self {
            ChannelMode::Single(ch) => ch,
            ChannelMode::All16 => 1,
        }
    }
}

impl Default for ChannelMode {
    fn default() -> Self {
        ChannelMode::Single(1)
    }
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelMode::Single(ch) => write!(f, "channel {}", ch),
            ChannelMode::All16 => write!(f, "16 channels"),
        }
    }
}

/// Inbound routes registered for a session.
///
/// Only `note`, `noff` and `cc0..cc127` are routed; `pressure` and `pitch`
/// are translated outbound but never accepted inbound.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashSet<RouteKey>,
}

impl RouteTable {
    pub fn for_mode(mode: ChannelMode) -> Self {
        let mut routes = HashSet::new();
        for channel in mode.channels() {
            routes.insert(RouteKey::new(channel, Command::Note));
            routes.insert(RouteKey::new(channel, Command::NoteOff));
            for cc in CONTROLLERS {
                routes.insert(RouteKey::new(channel, Command::ControlChange(cc)));
            }
        }
        RouteTable { routes }
    }

    pub fn contains(&self, key: &RouteKey) -> bool {
        self.routes.contains(key)
    }

    /// Parse and look up an address in one step.
    pub fn lookup(&self, address: &str) -> Option<RouteKey> {
        RouteKey::parse(address).filter(|key| self.contains(key))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
