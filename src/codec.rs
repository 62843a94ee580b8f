//! Address codec: musical events <-> OSC address/argument pairs.
//!
//! Pure functions only. Channels are 0-indexed on the MIDI side and
//! 1-indexed in OSC addresses.

use std::fmt;
use std::time::Duration;

use midly::live::LiveEvent;
use midly::num::u4;
use midly::MidiMessage;
use rosc::{OscMessage, OscType};

use crate::routes::{Command, RouteKey};

/// Velocity used for notes arriving over OSC, which carry only a note number.
pub const INBOUND_VELOCITY: i32 = 100;
pub const PITCH_BEND_MIN: i32 = -8192;
pub const PITCH_BEND_MAX: i32 = 8191;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NoteOn,
    NoteOff,
    ControlChange,
    Aftertouch,
    PitchBend,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::NoteOn => "note_on",
            EventKind::NoteOff => "note_off",
            EventKind::ControlChange => "control_change",
            EventKind::Aftertouch => "aftertouch",
            EventKind::PitchBend => "pitchwheel",
        };
        f.write_str(name)
    }
}

/// A channel-voice event.
///
/// | kind          | primary    | secondary |
/// |---------------|------------|-----------|
/// | NoteOn/Off    | note       | velocity  |
/// | ControlChange | controller | value     |
/// | Aftertouch    | pressure   | 0         |
/// | PitchBend     | -8192..8191| 0         |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MusicalEvent {
    pub channel: u8,
    pub kind: EventKind,
    pub primary: i32,
    pub secondary: i32,
    pub source_time: Duration,
}

impl MusicalEvent {
    fn new(channel: u8, kind: EventKind, primary: i32, secondary: i32) -> Self {
        MusicalEvent {
            channel: channel & 0x0F,
            kind,
            primary,
            secondary,
            source_time: Duration::ZERO,
        }
    }

    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(channel, EventKind::NoteOn, note as i32, velocity as i32)
    }

    pub fn note_off(channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(channel, EventKind::NoteOff, note as i32, velocity as i32)
    }

    pub fn control_change(channel: u8, controller: u8, value: u8) -> Self {
        Self::new(channel, EventKind::ControlChange, controller as i32, value as i32)
    }

    pub fn aftertouch(channel: u8, pressure: u8) -> Self {
        Self::new(channel, EventKind::Aftertouch, pressure as i32, 0)
    }

    pub fn pitch_bend(channel: u8, bend: i16) -> Self {
        Self::new(channel, EventKind::PitchBend, bend as i32, 0)
    }

    pub fn at(mut self, source_time: Duration) -> Self {
        self.source_time = source_time;
        self
    }

    /// Kind as it travels on the wire: a zero-velocity NoteOn is a NoteOff.
    pub fn outbound_kind(&self) -> EventKind {
        match self.kind {
            EventKind::NoteOn if self.secondary <= 0 => EventKind::NoteOff,
            kind => kind,
        }
    }

    /// Convert a parsed channel message. Program changes and polyphonic
    /// aftertouch have no OSC mapping and yield `None`.
    pub fn from_midi_message(channel: u4, message: &MidiMessage) -> Option<Self> {
        let ch = channel.as_int();
        let event = match *message {
            MidiMessage::NoteOn { key, vel } => Self::note_on(ch, key.as_int(), vel.as_int()),
            MidiMessage::NoteOff { key, vel } => Self::note_off(ch, key.as_int(), vel.as_int()),
            MidiMessage::Controller { controller, value } => {
                Self::control_change(ch, controller.as_int(), value.as_int())
            }
            MidiMessage::ChannelAftertouch { vel } => Self::aftertouch(ch, vel.as_int()),
            MidiMessage::PitchBend { bend } => Self::pitch_bend(ch, bend.as_int()),
            _ => return None,
        };
        Some(event)
    }

    /// Parse raw bytes from a hardware port.
    pub fn from_midi_bytes(bytes: &[u8]) -> Option<Self> {
        match LiveEvent::parse(bytes).ok()? {
            LiveEvent::Midi { channel, message } => Self::from_midi_message(channel, &message),
            _ => None,
        }
    }

    /// Raw bytes for a hardware output port.
    pub fn to_midi_bytes(&self) -> Vec<u8> {
        let ch = self.channel & 0x0F;
        let data = |v: i32| v.clamp(0, 127) as u8;
        match self.kind {
            EventKind::NoteOn => vec![0x90 | ch, data(self.primary), data(self.secondary)],
            EventKind::NoteOff => vec![0x80 | ch, data(self.primary), data(self.secondary)],
            EventKind::ControlChange => {
                vec![0xB0 | ch, data(self.primary), data(self.secondary)]
            }
            EventKind::Aftertouch => vec![0xD0 | ch, data(self.primary)],
            EventKind::PitchBend => {
                let raw = (self.primary - PITCH_BEND_MIN).clamp(0, 0x3FFF) as u16;
                vec![0xE0 | ch, (raw & 0x7F) as u8, (raw >> 7) as u8]
            }
        }
    }
}

/// An outbound OSC message: one address, integer arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkMessage {
    pub address: String,
    pub args: Vec<i32>,
}

impl NetworkMessage {
    pub fn new(address: impl Into<String>, args: Vec<i32>) -> Self {
        NetworkMessage {
            address: address.into(),
            args,
        }
    }

    pub fn osc_args(&self) -> Vec<OscType> {
        self.args.iter().map(|v| OscType::Int(*v)).collect()
    }

    pub fn to_osc(&self) -> OscMessage {
        OscMessage {
            addr: self.address.clone(),
            args: self.osc_args(),
        }
    }
}

impl fmt::Display for NetworkMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.address, self.args)
    }
}

/// Encode an event as an OSC message. Total: every event has an address.
pub fn encode(event: &MusicalEvent) -> NetworkMessage {
    let channel = (event.channel & 0x0F) + 1;
    let (command, arg) = match event.outbound_kind() {
        EventKind::NoteOn => (Command::Note, event.primary),
        EventKind::NoteOff => (Command::NoteOff, event.primary),
        EventKind::ControlChange => (
            Command::ControlChange(event.primary.clamp(0, 127) as u8),
            event.secondary,
        ),
        EventKind::Aftertouch => (Command::Pressure, event.primary),
        EventKind::PitchBend => (Command::Pitch, event.primary),
    };
    NetworkMessage::new(RouteKey::new(channel, command).address(), vec![arg])
}

/// Why an inbound message could not be turned into an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unrecognized {
    Address,
    ArgumentCount(usize),
    ArgumentType,
    ValueOutOfRange(i32),
}

impl fmt::Display for Unrecognized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unrecognized::Address => write!(f, "address does not match /ch<N><cmd>"),
            Unrecognized::ArgumentCount(n) => write!(f, "expected 1 argument, got {}", n),
            Unrecognized::ArgumentType => write!(f, "argument is not an integer"),
            Unrecognized::ValueOutOfRange(v) => write!(f, "value {} out of range", v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    Event(MusicalEvent),
    Unrecognized(Unrecognized),
}

impl Decoded {
    pub fn event(self) -> Option<MusicalEvent> {
        match self {
            Decoded::Event(event) => Some(event),
            Decoded::Unrecognized(_) => None,
        }
    }
}

/// Integer value of an OSC argument. Whole-number floats are accepted since
/// many control surfaces only send floats.
pub fn osc_int(arg: &OscType) -> Option<i32> {
    fn whole(v: f64) -> Option<i32> {
        if v.is_finite() && v.fract() == 0.0 && v >= i32::MIN as f64 && v <= i32::MAX as f64 {
            Some(v as i32)
        } else {
            None
        }
    }
    match arg {
        OscType::Int(v) => Some(*v),
        OscType::Long(v) => i32::try_from(*v).ok(),
        OscType::Float(v) => whole(*v as f64),
        OscType::Double(v) => whole(*v),
        _ => None,
    }
}

/// Decode an inbound address and its arguments. Never panics.
pub fn decode(address: &str, args: &[OscType]) -> Decoded {
    let Some(key) = RouteKey::parse(address) else {
        return Decoded::Unrecognized(Unrecognized::Address);
    };
    let [arg] = args else {
        return Decoded::Unrecognized(Unrecognized::ArgumentCount(args.len()));
    };
    let Some(value) = osc_int(arg) else {
        return Decoded::Unrecognized(Unrecognized::ArgumentType);
    };

    let data = |v: i32| -> Result<u8, Unrecognized> {
        u8::try_from(v)
            .ok()
            .filter(|b| *b <= 127)
            .ok_or(Unrecognized::ValueOutOfRange(v))
    };
    let channel = key.channel - 1;
    let event = match key.command {
        Command::Note => data(value).map(|note| {
            MusicalEvent::note_on(channel, note, INBOUND_VELOCITY as u8)
        }),
        Command::NoteOff => data(value).map(|note| MusicalEvent::note_off(channel, note, 0)),
        Command::ControlChange(cc) => {
            data(value).map(|v| MusicalEvent::control_change(channel, cc, v))
        }
        Command::Pressure => data(value).map(|v| MusicalEvent::aftertouch(channel, v)),
        Command::Pitch => {
            if (PITCH_BEND_MIN..=PITCH_BEND_MAX).contains(&value) {
                Ok(MusicalEvent::pitch_bend(channel, value as i16))
            } else {
                Err(Unrecognized::ValueOutOfRange(value))
            }
        }
    };

    match event {
        Ok(event) => Decoded::Event(event),
        Err(reason) => Decoded::Unrecognized(reason),
    }
}

/// Decode one of our own outbound messages.
pub fn decode_message(message: &NetworkMessage) -> Decoded {
    decode(&message.address, &message.osc_args())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_events(channel: u8) -> Vec<MusicalEvent> {
        vec![
            MusicalEvent::note_on(channel, 60, 100),
            MusicalEvent::note_off(channel, 0, 0),
            MusicalEvent::control_change(channel, 7, 127),
            MusicalEvent::control_change(channel, 0, 0),
            MusicalEvent::aftertouch(channel, 64),
            MusicalEvent::pitch_bend(channel, -8192),
            MusicalEvent::pitch_bend(channel, 8191),
            MusicalEvent::pitch_bend(channel, 0),
        ]
    }

    #[test]
    fn encodes_addresses() {
        let cases = [
            (MusicalEvent::note_on(0, 60, 100), "/ch1note", 60),
            (MusicalEvent::note_on(3, 61, 0), "/ch4noff", 61),
            (MusicalEvent::note_off(15, 62, 64), "/ch16noff", 62),
            (MusicalEvent::control_change(1, 74, 33), "/ch2cc74", 33),
            (MusicalEvent::aftertouch(9, 90), "/ch10pressure", 90),
            (MusicalEvent::pitch_bend(0, -100), "/ch1pitch", -100),
        ];
        for (event, address, arg) in cases {
            let msg = encode(&event);
            assert_eq!(msg.address, address);
            assert_eq!(msg.args, vec![arg]);
        }
    }

    #[test]
    fn decode_inverts_encode_for_every_channel() {
        for channel in 0..16u8 {
            for event in sample_events(channel) {
                let decoded = decode_message(&encode(&event))
                    .event()
                    .unwrap_or_else(|| panic!("{:?} did not decode", event));
                assert_eq!(decoded.channel, event.channel);
                assert_eq!(decoded.kind, event.kind);
                assert_eq!(decoded.primary, event.primary);
                if event.kind == EventKind::ControlChange {
                    assert_eq!(decoded.secondary, event.secondary);
                }
            }
        }
    }

    #[test]
    fn zero_velocity_note_on_round_trips_as_note_off() {
        let msg = encode(&MusicalEvent::note_on(2, 40, 0));
        let decoded = decode_message(&msg).event().unwrap();
        assert_eq!(decoded.kind, EventKind::NoteOff);
        assert_eq!(decoded.primary, 40);
    }

    #[test]
    fn inbound_notes_use_fixed_velocity() {
        let decoded = decode("/ch1note", &[OscType::Int(64)]).event().unwrap();
        assert_eq!(decoded.secondary, INBOUND_VELOCITY);
        assert_eq!(decoded.to_midi_bytes(), vec![0x90, 64, 100]);
    }

    #[test]
    fn non_matching_addresses_are_unrecognized() {
        for address in ["", "/foo", "/ch0note", "/ch1nope", "/ch1cc200", "note", "/ch1notex"] {
            assert_eq!(
                decode(address, &[OscType::Int(1)]),
                Decoded::Unrecognized(Unrecognized::Address),
                "{:?}",
                address
            );
        }
    }

    #[test]
    fn malformed_arguments_are_unrecognized() {
        assert_eq!(
            decode("/ch1note", &[]),
            Decoded::Unrecognized(Unrecognized::ArgumentCount(0))
        );
        assert_eq!(
            decode("/ch1note", &[OscType::Int(1), OscType::Int(2)]),
            Decoded::Unrecognized(Unrecognized::ArgumentCount(2))
        );
        assert_eq!(
            decode("/ch1note", &[OscType::String("60".into())]),
            Decoded::Unrecognized(Unrecognized::ArgumentType)
        );
        assert_eq!(
            decode("/ch1note", &[OscType::Float(60.5)]),
            Decoded::Unrecognized(Unrecognized::ArgumentType)
        );
        assert_eq!(
            decode("/ch1cc1", &[OscType::Int(128)]),
            Decoded::Unrecognized(Unrecognized::ValueOutOfRange(128))
        );
        assert_eq!(
            decode("/ch1pitch", &[OscType::Int(9000)]),
            Decoded::Unrecognized(Unrecognized::ValueOutOfRange(9000))
        );
    }

    #[test]
    fn whole_floats_are_accepted() {
        let decoded = decode("/ch1cc10", &[OscType::Float(99.0)]).event().unwrap();
        assert_eq!(decoded.secondary, 99);
        assert_eq!(osc_int(&OscType::Long(1 << 40)), None);
        assert_eq!(osc_int(&OscType::Double(f64::NAN)), None);
    }

    #[test]
    fn midi_bytes_round_trip() {
        for channel in [0u8, 9, 15] {
            for event in sample_events(channel) {
                let bytes = event.to_midi_bytes();
                let parsed = MusicalEvent::from_midi_bytes(&bytes).unwrap();
                assert_eq!(parsed, event, "{:02X?}", bytes);
            }
        }
    }

    #[test]
    fn ignores_non_channel_voice_bytes() {
        assert_eq!(MusicalEvent::from_midi_bytes(&[0xF8]), None);
        assert_eq!(MusicalEvent::from_midi_bytes(&[0xC0, 5]), None);
        assert_eq!(MusicalEvent::from_midi_bytes(&[0xA0, 60, 10]), None);
        assert_eq!(MusicalEvent::from_midi_bytes(&[]), None);
    }

    #[test]
    fn pitch_bend_bytes_are_centered() {
        assert_eq!(MusicalEvent::pitch_bend(0, 0).to_midi_bytes(), vec![0xE0, 0x00, 0x40]);
        assert_eq!(
            MusicalEvent::pitch_bend(1, -8192).to_midi_bytes(),
            vec![0xE1, 0x00, 0x00]
        );
        assert_eq!(
            MusicalEvent::pitch_bend(1, 8191).to_midi_bytes(),
            vec![0xE1, 0x7F, 0x7F]
        );
    }
}
